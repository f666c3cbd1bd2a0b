//! The policy virtual machine: compiled programs, their binary codec and
//! listing, and the stack machine that executes them.

pub mod errors;
pub mod instruction_set;
pub mod listing;
pub mod machine;
pub mod program;
pub mod serialize;
mod stack;

pub use errors::{ErrorLocation, RuntimeError, VmError};
pub use instruction_set::{BinOp, Instruction};
pub use machine::{ExecutionMode, ExecutionStatus, Outcome, PendingRequest, VM, VmState};
pub use program::{Block, EntryPoint, ExtensionDecl, Program, SourceSpan};
pub use serialize::CodecError;

pub(crate) use stack::Stack;
