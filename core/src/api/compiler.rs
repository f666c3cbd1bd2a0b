//! The compiler seam.
//!
//! The source-language frontend is an external collaborator: the engine
//! hands it module sources and entry-point paths and receives a compiled
//! [`Program`] back. Everything behind this trait (grammar, type checking,
//! lowering) is out of scope for the engine.

use thiserror::Error;

use crate::vm::Program;

/// One policy module: where it came from and its text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub path: String,
    pub text: String,
}

impl Source {
    pub fn new(path: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            text: text.into(),
        }
    }
}

/// A compilation failure. Unresolved entry-point paths are compile-time
/// errors, never runtime ones.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("compile error: {message}")]
pub struct CompileError {
    pub message: String,
}

impl CompileError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn unresolved_entry_point(path: &str) -> Self {
        Self::new(format!("entry point '{path}' cannot be resolved"))
    }
}

/// A frontend that lowers policy modules to a [`Program`] whose entry
/// points resolve exactly the requested paths.
pub trait Compiler: Send + Sync {
    fn compile(&self, modules: &[Source], entry_points: &[&str])
    -> Result<Program, CompileError>;
}
