//! Public API for the policy evaluation engine.
//!
//! The engine compiles policies through an external [`Compiler`], evaluates
//! them against JSON-shaped input and data documents, and exposes host
//! extensions and instrumentation. Suspendable (host-await) evaluation is
//! driven through [`crate::vm::VM`] directly.

pub mod compiler;
pub mod engine;
pub mod error;
pub mod options;

pub use compiler::{CompileError, Compiler, Source};
pub use engine::{Engine, Expression, QueryResult, QueryResults};
pub use error::{Error, Result};
pub use options::{EngineOptions, ExecutionOptions};
