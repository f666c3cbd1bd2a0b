//! Machine execution errors.

use core::fmt;

use ecow::EcoString;
use thiserror::Error;

use crate::extensions::ExtensionError;

use super::program::SourceSpan;

/// Reasons a run fails. These are the error kinds surfaced through
/// [`RuntimeError`]; the machine never retries and never swallows them.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VmError {
    #[error("program is partial and cannot be executed")]
    PartialProgram,

    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(EcoString),

    #[error("type error: {0}")]
    RuntimeType(EcoString),

    #[error("undefined reference: {0}")]
    UndefinedReference(EcoString),

    #[error("entry point '{name}' not found; available: {available:?}")]
    EntryPointNotFound {
        name: EcoString,
        available: Vec<String>,
    },

    #[error("execution stopped: exceeded maximum instruction limit of {limit}")]
    InstructionLimitExceeded { limit: u64 },

    #[error(transparent)]
    Extension(#[from] ExtensionError),

    #[error("internal machine error: {0}")]
    Internal(EcoString),
}

/// Where in the program a run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorLocation {
    pub block: u16,
    pub pc: usize,
    pub span: Option<SourceSpan>,
}

impl fmt::Display for ErrorLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block {} pc {}", self.block, self.pc)?;
        if let Some(span) = self.span {
            write!(f, " (line {}, column {})", span.line, span.column)?;
        }
        Ok(())
    }
}

/// A failed run: the error kind plus a best-effort source location.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    pub kind: VmError,
    pub location: Option<ErrorLocation>,
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

impl RuntimeError {
    pub fn new(kind: VmError) -> Self {
        Self {
            kind,
            location: None,
        }
    }

    pub fn at(kind: VmError, location: ErrorLocation) -> Self {
        Self {
            kind,
            location: Some(location),
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} at {}", self.kind, location),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl From<VmError> for RuntimeError {
    fn from(kind: VmError) -> Self {
        RuntimeError::new(kind)
    }
}

pub type Result<T> = core::result::Result<T, RuntimeError>;
