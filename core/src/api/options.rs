//! Configuration options for the engine.

/// Options controlling resource limits and runtime behavior during
/// evaluation.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    /// Maximum number of instructions a single run may execute.
    ///
    /// Set to `None` for unlimited execution (be careful with untrusted
    /// policies: the machine has no other preemption point).
    ///
    /// Default: None
    pub max_instructions: Option<u64>,
}

/// Configuration options for the engine.
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Default options for evaluation, applied to every machine the engine
    /// spins up.
    pub default_execution_options: ExecutionOptions,
}
