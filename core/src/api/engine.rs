//! The policy evaluation engine.
//!
//! The engine ties the pieces together: policy module sources handed to an
//! external [`Compiler`], a merged policy data document, a request-scoped
//! input, host extensions, and per-engine instrumentation. Evaluations are
//! one-shot; suspendable host-await evaluation is driven through
//! [`crate::vm::VM`] directly.

use std::mem;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::coverage::{CoverageState, Report};
use crate::extensions::{Callable, ExtensionRegistry, HostError};
use crate::values::{Value, json};
use crate::vm::{ExecutionMode, Outcome, Program, RuntimeError, VM, VmError};

use super::compiler::{Compiler, Source};
use super::error::{Error, Result};
use super::options::EngineOptions;

/// One expression of a query result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Expression {
    pub value: Value,
    pub text: String,
}

/// One binding produced by a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub expressions: Vec<Expression>,
}

/// Results of evaluating a query: one [`QueryResult`] per binding, in the
/// order the program emitted them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResults {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub result: Vec<QueryResult>,
}

/// The policy evaluation engine.
///
/// Cloning an engine produces an independent copy: data, coverage counters
/// and print buffers are duplicated by value, while the immutable compiler
/// and registered callbacks are shared.
#[derive(Clone)]
pub struct Engine {
    compiler: Arc<dyn Compiler>,
    options: EngineOptions,
    modules: Vec<Source>,
    data: Value,
    input: Value,
    extensions: ExtensionRegistry,
    coverage: CoverageState,
    prints: Vec<String>,
    gather_prints: bool,
    last_program: Option<Arc<Program>>,
}

impl Engine {
    /// Create an engine around a compiler frontend.
    pub fn new(compiler: impl Compiler + 'static) -> Self {
        Self::with_options(compiler, EngineOptions::default())
    }

    pub fn with_options(compiler: impl Compiler + 'static, options: EngineOptions) -> Self {
        Self {
            compiler: Arc::new(compiler),
            options,
            modules: Vec::new(),
            data: Value::new_object(),
            input: Value::Null,
            extensions: ExtensionRegistry::new(),
            coverage: CoverageState::new(),
            prints: Vec::new(),
            gather_prints: false,
            last_program: None,
        }
    }

    // ------------------------------------------------------------------
    // Policies
    // ------------------------------------------------------------------

    /// Add a policy module by source text.
    pub fn add_policy(&mut self, path: impl Into<String>, text: impl Into<String>) {
        let source = Source::new(path, text);
        debug!(path = %source.path, "adding policy");
        self.modules.push(source);
    }

    /// Add a policy module from a file.
    pub fn add_policy_from_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        self.add_policy(path.display().to_string(), text);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Input & data
    // ------------------------------------------------------------------

    pub fn set_input(&mut self, input: Value) {
        self.input = input;
    }

    /// Parse and attach the request input; validated here, before any run.
    pub fn set_input_json(&mut self, input_json: &str) -> Result<()> {
        self.input = json::from_json_str(input_json)?;
        Ok(())
    }

    /// Drop all policy data.
    pub fn clear_data(&mut self) {
        self.data = Value::new_object();
    }

    /// Merge a data document into the engine's policy data. The document
    /// must be an object; overlapping leaves must agree.
    pub fn add_data(&mut self, data: Value) -> Result<()> {
        if data.as_object().is_none() {
            return Err(Error::Api(format!(
                "data document must be an object, got {}",
                data.type_name()
            )));
        }
        self.data.merge(data)?;
        Ok(())
    }

    pub fn add_data_json(&mut self, data_json: &str) -> Result<()> {
        let data = json::from_json_str(data_json)?;
        self.add_data(data)
    }

    pub fn add_data_from_json_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let text = std::fs::read_to_string(path.as_ref())?;
        self.add_data_json(&text)
    }

    pub fn get_data(&self) -> &Value {
        &self.data
    }

    // ------------------------------------------------------------------
    // Extensions
    // ------------------------------------------------------------------

    /// Register a host extension callable from policies as `name` with a
    /// fixed arity.
    pub fn add_extension(
        &mut self,
        name: impl Into<ecow::EcoString>,
        arity: u8,
        callback: impl Callable + 'static,
    ) -> Result<()> {
        self.extensions.register(name, arity, callback)?;
        Ok(())
    }

    /// Register an extension whose callback speaks `serde_json::Value`.
    pub fn add_json_extension<F>(
        &mut self,
        name: impl Into<ecow::EcoString>,
        arity: u8,
        callback: F,
    ) -> Result<()>
    where
        F: Fn(Vec<serde_json::Value>) -> std::result::Result<serde_json::Value, HostError>
            + Clone
            + Send
            + Sync
            + 'static,
    {
        self.extensions.register_json(name, arity, callback)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    /// Evaluate a rule by its fully-qualified path. The rule must produce
    /// exactly one binding; zero or several is a type error, never a silent
    /// first-match.
    pub fn eval_rule(&mut self, path: &str) -> Result<Value> {
        let mut bindings = self.eval_entry_point(path)?;
        match bindings.len() {
            1 => Ok(bindings.remove(0)),
            n => Err(RuntimeError::new(VmError::RuntimeType(
                format!("rule '{path}' produced {n} bindings, expected exactly one").into(),
            ))
            .into()),
        }
    }

    /// Evaluate a rule and render the result as canonical JSON.
    pub fn eval_rule_as_json(&mut self, path: &str) -> Result<String> {
        let value = self.eval_rule(path)?;
        Ok(json::to_json_str(&value)?)
    }

    /// Evaluate a query. Every binding the program emits becomes one
    /// [`QueryResult`], in emission order.
    pub fn eval_query(&mut self, query: &str) -> Result<QueryResults> {
        let bindings = self.eval_entry_point(query)?;
        Ok(QueryResults {
            result: bindings
                .into_iter()
                .map(|value| QueryResult {
                    expressions: vec![Expression {
                        value,
                        text: query.to_string(),
                    }],
                })
                .collect(),
        })
    }

    pub fn eval_query_as_json(&mut self, query: &str) -> Result<String> {
        let results = self.eval_query(query)?;
        Ok(serde_json::to_string(&results)?)
    }

    /// Evaluate a query expected to produce exactly one boolean.
    pub fn eval_bool_query(&mut self, query: &str) -> Result<bool> {
        let results = self.eval_query(query)?;
        let value = match results.result.as_slice() {
            [single] => match single.expressions.as_slice() {
                [expression] => expression.value.clone(),
                _ => {
                    return Err(RuntimeError::new(VmError::RuntimeType(
                        "query produced multiple expressions".into(),
                    ))
                    .into());
                }
            },
            _ => {
                return Err(RuntimeError::new(VmError::RuntimeType(
                    format!("query produced {} results, expected one", results.result.len())
                        .into(),
                ))
                .into());
            }
        };
        value.as_bool().ok_or_else(|| {
            RuntimeError::new(VmError::RuntimeType(
                format!("query produced {}, expected a bool", value.type_name()).into(),
            ))
            .into()
        })
    }

    /// Never-fail convenience: true only if the query cleanly evaluates to
    /// true.
    pub fn eval_allow_query(&mut self, query: &str) -> bool {
        matches!(self.eval_bool_query(query), Ok(true))
    }

    /// Never-fail convenience: false only if the query cleanly evaluates to
    /// false.
    pub fn eval_deny_query(&mut self, query: &str) -> bool {
        !matches!(self.eval_bool_query(query), Ok(false))
    }

    /// Compile `entry_point` against the current modules and run it to
    /// completion, harvesting instrumentation from the machine.
    fn eval_entry_point(&mut self, entry_point: &str) -> Result<Vec<Value>> {
        debug!(entry_point, modules = self.modules.len(), "evaluating");
        let program = Arc::new(self.compiler.compile(&self.modules, &[entry_point])?);
        self.last_program = Some(Arc::clone(&program));

        let mut vm = VM::new();
        vm.load_program(Arc::clone(&program))?;
        vm.set_execution_mode(ExecutionMode::Normal);
        vm.set_entry_point(entry_point)?;
        vm.set_input(self.input.clone());
        vm.set_data(self.data.clone());
        vm.set_extensions(Arc::new(self.extensions.clone()));
        vm.set_max_instructions(self.options.default_execution_options.max_instructions);
        vm.set_enable_coverage(self.coverage.is_enabled());
        vm.set_gather_prints(self.gather_prints);

        let outcome = vm.execute();

        // Instrumentation survives failed runs.
        self.coverage.absorb(vm.coverage_state());
        self.prints.extend(vm.take_prints());

        match outcome? {
            Outcome::Completed(bindings) => Ok(bindings),
            Outcome::Suspended(_) => Err(RuntimeError::new(VmError::Internal(
                "machine suspended in normal execution mode".into(),
            ))
            .into()),
        }
    }

    // ------------------------------------------------------------------
    // Instrumentation
    // ------------------------------------------------------------------

    pub fn set_enable_coverage(&mut self, enable: bool) {
        self.coverage.set_enabled(enable);
    }

    pub fn get_coverage_report(&self) -> Report {
        self.coverage.report(self.last_program.as_deref())
    }

    pub fn get_coverage_report_as_json(&self) -> Result<String> {
        Ok(self.get_coverage_report().to_json()?)
    }

    pub fn get_coverage_report_pretty(&self) -> String {
        self.get_coverage_report()
            .to_string_pretty(self.last_program.as_deref())
    }

    pub fn clear_coverage_data(&mut self) {
        self.coverage.clear();
    }

    pub fn set_gather_prints(&mut self, gather: bool) {
        self.gather_prints = gather;
    }

    /// Drain gathered prints: returns everything buffered so far exactly
    /// once.
    pub fn take_prints(&mut self) -> Vec<String> {
        mem::take(&mut self.prints)
    }
}
