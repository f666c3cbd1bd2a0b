//! Coverage instrumentation.
//!
//! When enabled, the machine increments a hit counter for every instruction
//! it executes. Counters are scoped to one engine or machine instance, reset
//! by `clear` without touching program or data, and exposed through derived
//! report views: two report calls over unchanged state are byte-identical.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::vm::Program;

/// Per-instance hit counters keyed by (block, instruction offset).
#[derive(Debug, Clone, Default)]
pub struct CoverageState {
    enabled: bool,
    hits: BTreeMap<(u16, u32), u64>,
}

impl CoverageState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[inline]
    pub fn hit(&mut self, block: u16, pc: u32) {
        if self.enabled {
            *self.hits.entry((block, pc)).or_insert(0) += 1;
        }
    }

    /// Drop all counters; the enabled flag is unchanged.
    pub fn clear(&mut self) {
        self.hits.clear();
    }

    /// Fold counters harvested from a finished machine into this state.
    pub fn absorb(&mut self, other: &CoverageState) {
        for (key, count) in &other.hits {
            *self.hits.entry(*key).or_insert(0) += count;
        }
    }

    /// Derive a report. With a program at hand the report also lists the
    /// instructions that were never reached.
    pub fn report(&self, program: Option<&Program>) -> Report {
        let mut blocks: BTreeMap<u16, BlockCoverage> = BTreeMap::new();

        for ((block, pc), count) in &self.hits {
            blocks
                .entry(*block)
                .or_insert_with(|| BlockCoverage::new(*block))
                .covered
                .insert(*pc, *count);
        }

        if let Some(program) = program {
            for (index, block) in program.blocks.iter().enumerate() {
                let entry = blocks
                    .entry(index as u16)
                    .or_insert_with(|| BlockCoverage::new(index as u16));
                for pc in 0..block.instructions.len() as u32 {
                    if !entry.covered.contains_key(&pc) {
                        entry.not_covered.insert(pc);
                    }
                }
            }
        }

        Report {
            blocks: blocks.into_values().collect(),
        }
    }
}

/// Coverage of one instruction block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockCoverage {
    pub block: u16,
    /// Instruction offset to hit count.
    pub covered: BTreeMap<u32, u64>,
    /// Instruction offsets never executed (populated when the report was
    /// derived with the program available).
    pub not_covered: BTreeSet<u32>,
}

impl BlockCoverage {
    fn new(block: u16) -> Self {
        Self {
            block,
            covered: BTreeMap::new(),
            not_covered: BTreeSet::new(),
        }
    }
}

/// Derived coverage view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub blocks: Vec<BlockCoverage>,
}

impl Report {
    /// JSON rendering. Deterministic: map keys are ordered, so repeated
    /// calls over the same state produce identical bytes.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// ANSI-colored text rendering: covered instructions green, uncovered
    /// red. Instruction text is included when the program is supplied.
    pub fn to_string_pretty(&self, program: Option<&Program>) -> String {
        let mut out = String::from("COVERAGE REPORT:\n");
        for block in &self.blocks {
            if block.not_covered.is_empty() {
                let _ = writeln!(out, "block {} has full coverage", block.block);
                continue;
            }
            let _ = writeln!(out, "block {}:", block.block);
            let limit = block
                .covered
                .keys()
                .chain(block.not_covered.iter())
                .max()
                .map_or(0, |max| max + 1);
            for pc in 0..limit {
                let text = program
                    .and_then(|p| p.block(block.block))
                    .and_then(|b| b.instructions.get(pc as usize))
                    .map_or_else(String::new, |i| i.to_string());
                if let Some(count) = block.covered.get(&pc) {
                    let _ = writeln!(out, "\x1b[32m {pc:4}  {text}  ({count} hits)\x1b[0m");
                } else if block.not_covered.contains(&pc) {
                    let _ = writeln!(out, "\x1b[31m {pc:4}  {text}\x1b[0m");
                } else {
                    let _ = writeln!(out, " {pc:4}  {text}");
                }
            }
        }
        out
    }
}
