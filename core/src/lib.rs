//! Core of the veto policy engine: the value model, the compiled program
//! representation and its binary codec, the suspendable virtual machine,
//! host extensions, and instrumentation.
//!
//! The language frontend is deliberately absent; see [`api::Compiler`].

pub mod api;
pub mod coverage;
pub mod extensions;
pub mod values;
pub mod vm;

pub use api::{Engine, EngineOptions};
pub use values::{Number, Value};
pub use vm::{ExecutionMode, Program, VM};
