//! Veto - an embeddable policy evaluation engine
//!
//! # Overview
//!
//! Veto compiles a declarative rule language into a portable bytecode
//! program, executes it against a document store and a request-scoped
//! input, and returns the resulting values. Common use cases include:
//!
//! - Admission control and authorization decisions
//! - Configuration and deployment validation
//! - Data filtering and routing rules
//!
//! # Quick Start
//!
//! ```ignore
//! use veto::{Engine, Value};
//!
//! // Create an engine around a compiler frontend.
//! let mut engine = Engine::new(compiler);
//!
//! // Add policies and data.
//! engine.add_policy("example.rules", r#"allow := input.user == "alice""#);
//! engine.set_input_json(r#"{"user": "alice"}"#)?;
//!
//! // Evaluate.
//! let allowed = engine.eval_rule("data.example.allow")?;
//! assert_eq!(allowed, Value::from(true));
//! ```
//!
//! # Suspendable evaluation
//!
//! Policies may await host-supplied data mid-run. Drive those through the
//! machine interface:
//!
//! ```ignore
//! use veto::vm::{ExecutionMode, Outcome, VM};
//!
//! let mut vm = VM::new();
//! vm.load_program(program)?;
//! vm.set_execution_mode(ExecutionMode::HostAwait);
//! if let Outcome::Suspended(request) = vm.execute()? {
//!     let data = fetch(&request.key, &request.topic);
//!     vm.resume(&data)?;
//! }
//! ```
//!
//! # Host extensions
//!
//! Register native functions callable from policies by name and arity with
//! [`Engine::add_extension`]; a misbehaving callback fails the run, never
//! the process.

pub use veto_core::api::{
    CompileError, Compiler, Engine, EngineOptions, Error, ExecutionOptions, Expression,
    QueryResult, QueryResults, Result, Source,
};
pub use veto_core::coverage;
pub use veto_core::extensions::{Callable, ExtensionError, ExtensionRegistry, HostError};
pub use veto_core::values::{Number, Value};
pub use veto_core::vm;
pub use veto_core::vm::{ExecutionMode, Outcome, Program, VM};
