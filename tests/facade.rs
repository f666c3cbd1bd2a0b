//! The facade crate re-exports everything needed to embed the engine
//! without naming `veto-core` directly.

use pretty_assertions::assert_eq;

use veto::vm::{BinOp, Block, Instruction};
use veto::{CompileError, Compiler, Engine, Program, Source, Value};

struct AllowCompiler;

impl Compiler for AllowCompiler {
    fn compile(
        &self,
        _modules: &[Source],
        entry_points: &[&str],
    ) -> Result<Program, CompileError> {
        if entry_points != ["data.example.allow"] {
            return Err(CompileError::unresolved_entry_point(
                entry_points.first().unwrap_or(&"<none>"),
            ));
        }
        let mut program = Program::new();
        let user = program.add_constant(Value::from("user"));
        let alice = program.add_constant(Value::from("alice"));
        let mut block = Block::new(0);
        block.add_instruction(Instruction::LoadInput, None);
        block.add_instruction(Instruction::LoadConst(user), None);
        block.add_instruction(Instruction::Index, None);
        block.add_instruction(Instruction::LoadConst(alice), None);
        block.add_instruction(Instruction::BinaryOp(BinOp::Eq), None);
        block.add_instruction(Instruction::Emit, None);
        block.add_instruction(Instruction::Return, None);
        let entry = program.add_block(block);
        program.add_entry_point("data.example.allow", entry);
        Ok(program)
    }
}

#[test]
fn test_engine_through_facade() {
    let mut engine = Engine::new(AllowCompiler);
    engine.add_policy("example.rules", r#"allow := input.user == "alice""#);

    engine.set_input_json(r#"{"user": "alice"}"#).unwrap();
    assert_eq!(
        engine.eval_rule("data.example.allow").unwrap(),
        Value::from(true)
    );

    engine.set_input_json(r#"{"user": "bob"}"#).unwrap();
    assert_eq!(
        engine.eval_rule("data.example.allow").unwrap(),
        Value::from(false)
    );
}
