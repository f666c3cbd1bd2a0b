//! Public error type for the engine API.
//!
//! Layer errors (codec, machine, extensions, compiler) keep their own types;
//! this enum wraps them at the API boundary so callers match on one type.

use thiserror::Error;

use crate::extensions::ExtensionError;
use crate::values::DataConflict;
use crate::vm::{CodecError, RuntimeError};

use super::compiler::CompileError;

/// Any failure surfaced by the engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid API usage: unreadable files, malformed JSON arguments, data
    /// documents of the wrong shape.
    #[error("API error: {0}")]
    Api(String),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Extension(#[from] ExtensionError),

    #[error(transparent)]
    Data(#[from] DataConflict),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Api(format!("invalid JSON: {err}"))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Api(format!("I/O error: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
