//! Host extension functions.
//!
//! Extensions let the host expose native functions that compiled policies
//! call by name. Each registration fixes the extension's arity; call sites
//! are compiled independently, so the argument count is checked when the
//! call executes, not when it is registered.
//!
//! Callbacks run behind an explicit capability interface ([`Callable`]) and
//! an unwind barrier: a panicking or failing callback fails the current run
//! with [`ExtensionError::ExtensionRaised`], never the process.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use ecow::EcoString;
use hashbrown::HashMap;
use thiserror::Error;

use crate::values::{Value, json};

/// Failure reported by a host callback: the host-side error type's name and
/// its message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostError {
    pub kind: EcoString,
    pub message: EcoString,
}

impl HostError {
    pub fn new(kind: impl Into<EcoString>, message: impl Into<EcoString>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Capability interface for host callbacks.
///
/// Implemented automatically for matching closures, so most callers never
/// name this trait:
///
/// ```ignore
/// registry.register("double", 1, |args: &[Value]| {
///     let n = args[0]
///         .as_number()
///         .ok_or_else(|| HostError::new("TypeError", "expected a number"))?;
///     Ok(Value::from(n.add(n)))
/// })?;
/// ```
pub trait Callable: Send + Sync {
    /// Invoke the callback. The engine guarantees `args.len()` equals the
    /// registered arity.
    fn call(&self, args: &[Value]) -> Result<Value, HostError>;

    /// `Fn` trait objects cannot be cloned in boxed form; `clone_box` exists
    /// to overcome that.
    fn clone_box(&self) -> Box<dyn Callable>;
}

impl<F> Callable for F
where
    F: Fn(&[Value]) -> Result<Value, HostError> + Clone + Send + Sync + 'static,
{
    fn call(&self, args: &[Value]) -> Result<Value, HostError> {
        self(args)
    }

    fn clone_box(&self) -> Box<dyn Callable> {
        Box::new(self.clone())
    }
}

impl Clone for Box<dyn Callable> {
    fn clone(&self) -> Self {
        (**self).clone_box()
    }
}

impl fmt::Debug for dyn Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<callable>")
    }
}

/// Errors from registering or invoking extensions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtensionError {
    #[error("extension '{0}' is already registered")]
    DuplicateExtension(EcoString),

    /// The supplied callback is not invocable. Registration through the
    /// typed [`Callable`] interface cannot produce this; it is surfaced by
    /// binding layers that accept dynamically-typed callbacks.
    #[error("callback registered for '{0}' is not callable")]
    NotCallable(EcoString),

    #[error("extension '{name}' expects {expected} arguments, got {actual}")]
    ArityMismatch {
        name: EcoString,
        expected: u8,
        actual: usize,
    },

    #[error("cannot marshal arguments or result of extension '{name}': {message}")]
    MarshalError { name: EcoString, message: EcoString },

    #[error("extension '{name}' raised {kind}: {message}")]
    ExtensionRaised {
        name: EcoString,
        kind: EcoString,
        message: EcoString,
    },
}

/// A registered extension: fixed arity plus the callback.
#[derive(Debug, Clone)]
pub struct ExtensionEntry {
    arity: u8,
    callback: Arc<dyn Callable>,
}

impl ExtensionEntry {
    pub fn arity(&self) -> u8 {
        self.arity
    }

    /// Invoke with arity checking and host-fault isolation.
    pub fn invoke(&self, name: &str, args: &[Value]) -> Result<Value, ExtensionError> {
        if args.len() != self.arity as usize {
            return Err(ExtensionError::ArityMismatch {
                name: name.into(),
                expected: self.arity,
                actual: args.len(),
            });
        }

        let callback = Arc::clone(&self.callback);
        match catch_unwind(AssertUnwindSafe(|| callback.call(args))) {
            Ok(Ok(value)) => Ok(value),
            // Marshalling failures from the JSON adapter travel through
            // HostError under a reserved kind; everything else is a genuine
            // host-raised exception.
            Ok(Err(host)) if host.kind == MARSHAL_KIND => Err(ExtensionError::MarshalError {
                name: name.into(),
                message: host.message,
            }),
            Ok(Err(host)) => Err(ExtensionError::ExtensionRaised {
                name: name.into(),
                kind: host.kind,
                message: host.message,
            }),
            Err(payload) => Err(ExtensionError::ExtensionRaised {
                name: name.into(),
                kind: "panic".into(),
                message: panic_message(payload.as_ref()).into(),
            }),
        }
    }
}

/// Reserved `HostError` kind carrying marshalling failures out of adapted
/// callbacks; see [`ExtensionEntry::invoke`].
const MARSHAL_KIND: &str = "veto::marshal";

fn panic_message(payload: &(dyn std::any::Any + Send)) -> EcoString {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).into()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str().into()
    } else {
        "unknown panic payload".into()
    }
}

/// Name-keyed table of host extensions.
///
/// The registry is populated before evaluation begins and treated as frozen
/// once an engine starts evaluating; machines hold it behind `Arc` for the
/// duration of a run.
#[derive(Debug, Clone, Default)]
pub struct ExtensionRegistry {
    entries: HashMap<EcoString, ExtensionEntry>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback under `name` with a fixed arity.
    pub fn register(
        &mut self,
        name: impl Into<EcoString>,
        arity: u8,
        callback: impl Callable + 'static,
    ) -> Result<(), ExtensionError> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(ExtensionError::DuplicateExtension(name));
        }
        tracing::debug!(extension = %name, arity, "registering extension");
        self.entries.insert(
            name,
            ExtensionEntry {
                arity,
                callback: Arc::new(callback),
            },
        );
        Ok(())
    }

    /// Register a callback that speaks `serde_json::Value` instead of
    /// [`Value`]. Arguments and results are marshalled across the boundary;
    /// a result outside the value taxonomy is a
    /// [`ExtensionError::MarshalError`].
    pub fn register_json<F>(
        &mut self,
        name: impl Into<EcoString>,
        arity: u8,
        callback: F,
    ) -> Result<(), ExtensionError>
    where
        F: Fn(Vec<serde_json::Value>) -> Result<serde_json::Value, HostError>
            + Clone
            + Send
            + Sync
            + 'static,
    {
        let adapted = move |args: &[Value]| -> Result<Value, HostError> {
            let json_args = args
                .iter()
                .map(serde_json::to_value)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| HostError::new(MARSHAL_KIND, e.to_string()))?;
            let result = callback(json_args)?;
            json::from_json_value(&result)
                .map_err(|e| HostError::new(MARSHAL_KIND, e.to_string()))
        };
        self.register(name, arity, adapted)
    }

    pub fn get(&self, name: &str) -> Option<&ExtensionEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
