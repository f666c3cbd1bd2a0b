//! Human-readable program disassembly.
//!
//! The listing is a diagnostic view only: it is deterministic, carries no
//! information absent from the binary form, and is never consulted during
//! execution.

use std::fmt::Write as _;

use super::instruction_set::Instruction;
use super::program::Program;

impl Program {
    /// Produce the disassembly listing: constants, entry points, extension
    /// declarations, then one line per instruction grouped by block.
    pub fn generate_listing(&self) -> String {
        let mut out = String::new();

        let status = if self.partial { "partial" } else { "complete" };
        let _ = writeln!(out, "program (format {}, {})", Self::FORMAT_VERSION, status);

        if !self.constants.is_empty() {
            let _ = writeln!(out, "constants:");
            for (i, constant) in self.constants.iter().enumerate() {
                let _ = writeln!(out, "  [{}] = {}", i, constant);
            }
        }

        if !self.entry_points.is_empty() {
            let _ = writeln!(out, "entry points:");
            for entry in &self.entry_points {
                let _ = writeln!(out, "  {} -> block {}", entry.path, entry.block);
            }
        }

        if !self.extension_decls.is_empty() {
            let _ = writeln!(out, "extensions:");
            for (i, decl) in self.extension_decls.iter().enumerate() {
                let _ = writeln!(out, "  [{}] = {}", i, decl.name);
            }
        }

        for (block_index, block) in self.blocks.iter().enumerate() {
            let _ = writeln!(
                out,
                "block {} (locals: {}):",
                block_index, block.num_locals
            );
            for (addr, instruction) in block.instructions.iter().enumerate() {
                match self.annotate(instruction) {
                    Some(note) => {
                        let line = format!("{instruction}");
                        let _ = writeln!(out, "  {:4}  {:<32} ; {}", addr, line, note);
                    }
                    None => {
                        let _ = writeln!(out, "  {:4}  {}", addr, instruction);
                    }
                }
            }
        }

        out
    }

    /// Resolve operand indices for the listing's trailing comment.
    fn annotate(&self, instruction: &Instruction) -> Option<String> {
        match instruction {
            Instruction::LoadConst(idx) => self.constant(*idx).map(|v| v.to_string()),
            Instruction::CallExtension { decl, .. } => self
                .extension_decls
                .get(*decl as usize)
                .map(|d| d.name.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::values::Value;
    use crate::vm::instruction_set::BinOp;
    use crate::vm::program::Block;

    use super::*;

    fn sample() -> Program {
        let mut program = Program::new();
        let name = program.add_constant(Value::from("alice"));
        let mut block = Block::new(0);
        block.add_instruction(Instruction::LoadInput, None);
        block.add_instruction(Instruction::LoadConst(name), None);
        block.add_instruction(Instruction::BinaryOp(BinOp::Eq), None);
        block.add_instruction(Instruction::Emit, None);
        block.add_instruction(Instruction::Return, None);
        let entry = program.add_block(block);
        program.add_entry_point("data.example.allow", entry);
        program
    }

    #[test]
    fn test_listing_is_deterministic() {
        let program = sample();
        assert_eq!(program.generate_listing(), program.generate_listing());
    }

    #[test]
    fn test_listing_contents() {
        let listing = sample().generate_listing();
        assert!(listing.starts_with("program (format 1, complete)"));
        assert!(listing.contains("[0] = \"alice\""));
        assert!(listing.contains("data.example.allow -> block 0"));
        assert!(listing.contains("; \"alice\""));
        assert!(listing.contains("Return"));
    }

    #[test]
    fn test_partial_marker_in_listing() {
        let mut program = sample();
        program.set_partial(true);
        assert!(program.generate_listing().starts_with("program (format 1, partial)"));
    }
}
