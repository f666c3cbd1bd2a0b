//! The policy machine.
//!
//! A machine executes one program entry point against an input document and
//! a read-only data tree. Execution is synchronous and single-threaded; the
//! machine owns its run state exclusively and shares the program behind
//! `Arc`, so one program can back many machines in parallel.
//!
//! Suspension is a logical pause, not a scheduler yield: reaching a
//! host-await instruction in [`ExecutionMode::HostAwait`] captures the live
//! interpreter state into an owned [`Continuation`] and hands control back
//! to the caller together with the pending request. `execute` and `resume`
//! are the only operations that touch the continuation; there is a single
//! continuation slot, so nested suspensions are out of scope.

use std::mem;
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::debug;

use crate::coverage::CoverageState;
use crate::extensions::ExtensionRegistry;
use crate::values::{Value, json};

use super::Stack;
use super::errors::{ErrorLocation, Result, RuntimeError, VmError};
use super::instruction_set::{BinOp, Instruction};
use super::program::Program;

/// How the machine treats host-await instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Host-await instructions fail the run.
    #[default]
    Normal,
    /// Host-await instructions suspend the run.
    HostAwait,
}

/// Lifecycle of a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VmState {
    #[default]
    Ready,
    Loaded,
    Running,
    Completed,
    Suspended,
    Failed,
}

impl VmState {
    pub const fn name(&self) -> &'static str {
        match self {
            VmState::Ready => "ready",
            VmState::Loaded => "loaded",
            VmState::Running => "running",
            VmState::Completed => "completed",
            VmState::Suspended => "suspended",
            VmState::Failed => "failed",
        }
    }
}

/// The data a suspended run is waiting for.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    pub key: Value,
    pub topic: Value,
}

/// Snapshot returned by [`VM::get_execution_state`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionStatus {
    pub state: VmState,
    /// Present while suspended.
    pub pending: Option<PendingRequest>,
}

/// How a run left the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The entry point finished; these are its bindings in emission order.
    Completed(Vec<Value>),
    /// A host-await was reached; resume with the requested value.
    Suspended(PendingRequest),
}

/// Saved caller context for a helper-block call.
#[derive(Debug, Clone)]
struct Frame {
    block: u16,
    return_pc: usize,
    stack_base: usize,
    locals: Vec<Value>,
}

/// Captured interpreter state of a suspended run: frame chain, operand
/// stack, program counter and emitted bindings.
#[derive(Debug, Clone)]
struct Continuation {
    frames: Vec<Frame>,
    stack: Vec<Value>,
    block: u16,
    pc: usize,
    locals: Vec<Value>,
    results: Vec<Value>,
}

/// The virtual machine.
#[derive(Debug, Clone, Default)]
pub struct VM {
    program: Option<Arc<Program>>,
    extensions: Arc<ExtensionRegistry>,
    mode: ExecutionMode,
    input: Value,
    data: Value,
    entry_block: Option<u16>,
    max_instructions: Option<u64>,
    state: VmState,
    continuation: Option<Continuation>,
    pending: Option<PendingRequest>,
    results: Vec<Value>,
    executed: u64,
    coverage: CoverageState,
    prints: Vec<String>,
    gather_prints: bool,
}

impl VM {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a program. Fails with [`VmError::PartialProgram`] for partial
    /// programs, leaving the machine in `Ready`.
    pub fn load_program(&mut self, program: impl Into<Arc<Program>>) -> Result<()> {
        let program = program.into();
        if program.is_partial() {
            return Err(RuntimeError::new(VmError::PartialProgram));
        }
        debug!(
            blocks = program.blocks.len(),
            entry_points = program.entry_points.len(),
            "loading program"
        );
        self.program = Some(program);
        self.entry_block = None;
        self.discard_run();
        self.state = VmState::Loaded;
        Ok(())
    }

    pub fn set_execution_mode(&mut self, mode: ExecutionMode) {
        self.mode = mode;
    }

    pub fn set_input(&mut self, input: Value) {
        self.input = input;
    }

    /// Parse and attach the input document; validated before any run.
    pub fn set_input_json(&mut self, input_json: &str) -> Result<()> {
        let input = json::from_json_str(input_json)
            .map_err(|e| VmError::RuntimeType(format!("invalid input JSON: {e}").into()))?;
        self.input = input;
        Ok(())
    }

    /// Attach the engine's policy data; read-only from the machine's side.
    pub fn set_data(&mut self, data: Value) {
        self.data = data;
    }

    pub fn set_extensions(&mut self, extensions: Arc<ExtensionRegistry>) {
        self.extensions = extensions;
    }

    /// Select the entry point to execute; defaults to the first declared
    /// one.
    pub fn set_entry_point(&mut self, path: &str) -> Result<()> {
        let program = self.require_program("set entry point")?;
        match program.entry_point(path) {
            Some(block) => {
                self.entry_block = Some(block);
                Ok(())
            }
            None => Err(RuntimeError::new(VmError::EntryPointNotFound {
                name: path.into(),
                available: program.entry_point_paths().map(String::from).collect(),
            })),
        }
    }

    pub fn set_max_instructions(&mut self, limit: Option<u64>) {
        self.max_instructions = limit;
    }

    pub fn set_enable_coverage(&mut self, enable: bool) {
        self.coverage.set_enabled(enable);
    }

    pub fn coverage_report(&self) -> crate::coverage::Report {
        self.coverage.report(self.program.as_deref())
    }

    pub fn clear_coverage_data(&mut self) {
        self.coverage.clear();
    }

    pub(crate) fn coverage_state(&self) -> &CoverageState {
        &self.coverage
    }

    pub fn set_gather_prints(&mut self, gather: bool) {
        self.gather_prints = gather;
    }

    /// Drain the print buffer: returns everything gathered so far exactly
    /// once.
    pub fn take_prints(&mut self) -> Vec<String> {
        mem::take(&mut self.prints)
    }

    /// Current state and, while suspended, the pending host request.
    pub fn get_execution_state(&self) -> ExecutionStatus {
        ExecutionStatus {
            state: self.state,
            pending: self.pending.clone(),
        }
    }

    pub fn state(&self) -> VmState {
        self.state
    }

    /// Bindings of the last completed run.
    pub fn results(&self) -> &[Value] {
        &self.results
    }

    /// Return a finished or suspended machine to `Loaded`, dropping any run
    /// state. Program, input, data and instrumentation settings survive.
    pub fn reset(&mut self) -> Result<()> {
        self.require_program("reset")?;
        self.discard_run();
        self.state = VmState::Loaded;
        Ok(())
    }

    /// Run the configured entry point to completion or suspension.
    pub fn execute(&mut self) -> Result<Outcome> {
        match self.state {
            VmState::Loaded => {}
            VmState::Suspended => {
                // A host-await suspension carries no value to re-inject;
                // only resume can continue it.
                return self.fail(RuntimeError::new(VmError::Internal(
                    "a suspended host-await run requires resume with a value".into(),
                )));
            }
            other => {
                return Err(RuntimeError::new(VmError::InvalidState {
                    operation: "execute",
                    state: other.name(),
                }));
            }
        }

        let program = self.require_program("execute")?;
        let entry = match self.entry_block {
            Some(block) => block,
            None => match program.entry_points.first() {
                Some(entry) => entry.block,
                None => {
                    return self.fail(RuntimeError::new(VmError::EntryPointNotFound {
                        name: "<default>".into(),
                        available: Vec::new(),
                    }));
                }
            },
        };
        let num_locals = match program.block(entry) {
            Some(block) => block.num_locals,
            None => {
                return self.fail(RuntimeError::new(VmError::Internal(
                    format!("entry block {entry} out of range").into(),
                )));
            }
        };

        let continuation = Continuation {
            frames: Vec::new(),
            stack: Vec::new(),
            block: entry,
            pc: 0,
            locals: vec![Value::Null; num_locals as usize],
            results: Vec::new(),
        };

        debug!(block = entry, mode = ?self.mode, "executing");
        self.state = VmState::Running;
        self.executed = 0;
        let outcome = self.run(&program, continuation);
        self.settle(outcome)
    }

    /// Continue a suspended run with the host-supplied value, given as JSON.
    pub fn resume(&mut self, host_value_json: &str) -> Result<Outcome> {
        let value = match json::from_json_str(host_value_json) {
            Ok(value) => value,
            Err(e) => {
                return self.fail(RuntimeError::new(VmError::RuntimeType(
                    format!("invalid resume value JSON: {e}").into(),
                )));
            }
        };
        self.resume_value(value)
    }

    /// Continue a suspended run with the host-supplied value.
    pub fn resume_value(&mut self, host_value: Value) -> Result<Outcome> {
        if self.state != VmState::Suspended {
            return Err(RuntimeError::new(VmError::InvalidState {
                operation: "resume",
                state: self.state.name(),
            }));
        }
        let program = self.require_program("resume")?;
        let mut continuation = match self.continuation.take() {
            Some(continuation) => continuation,
            None => {
                return self.fail(RuntimeError::new(VmError::Internal(
                    "suspended machine has no continuation".into(),
                )));
            }
        };

        debug!(block = continuation.block, pc = continuation.pc, "resuming");
        // The host value takes the place of the awaited expression.
        continuation.stack.push(host_value);
        self.pending = None;
        self.state = VmState::Running;
        let outcome = self.run(&program, continuation);
        self.settle(outcome)
    }

    fn require_program(&self, operation: &'static str) -> Result<Arc<Program>> {
        self.program.clone().ok_or_else(|| {
            RuntimeError::new(VmError::InvalidState {
                operation,
                state: self.state.name(),
            })
        })
    }

    fn discard_run(&mut self) {
        self.continuation = None;
        self.pending = None;
        self.results.clear();
        self.executed = 0;
    }

    fn settle(&mut self, outcome: Result<Outcome>) -> Result<Outcome> {
        match outcome {
            Ok(Outcome::Completed(results)) => {
                debug!(bindings = results.len(), "completed");
                self.state = VmState::Completed;
                self.results = results.clone();
                Ok(Outcome::Completed(results))
            }
            Ok(Outcome::Suspended(request)) => {
                debug!(key = %request.key, topic = %request.topic, "suspended");
                self.state = VmState::Suspended;
                self.pending = Some(request.clone());
                Ok(Outcome::Suspended(request))
            }
            Err(error) => self.fail(error),
        }
    }

    fn fail(&mut self, error: RuntimeError) -> Result<Outcome> {
        debug!(%error, "run failed");
        self.state = VmState::Failed;
        self.continuation = None;
        self.pending = None;
        Err(error)
    }

    /// The interpreter loop. Consumes a continuation and either completes,
    /// suspends (storing the next continuation on `self`), or fails.
    fn run(&mut self, program: &Program, continuation: Continuation) -> Result<Outcome> {
        let Continuation {
            mut frames,
            stack,
            mut block,
            mut pc,
            mut locals,
            mut results,
        } = continuation;
        let mut stack: Stack<Value> = stack.into();
        let extensions = Arc::clone(&self.extensions);

        loop {
            let blk = program.block(block).ok_or_else(|| {
                RuntimeError::new(VmError::Internal(format!("block {block} out of range").into()))
            })?;
            let Some(&instruction) = blk.instructions.get(pc) else {
                return Err(RuntimeError::new(VmError::Internal(
                    format!("pc {pc} past the end of block {block}").into(),
                )));
            };

            let here = ErrorLocation {
                block,
                pc,
                span: blk.span_at(pc),
            };
            let fail = |kind: VmError| RuntimeError::at(kind, here);
            let underflow = || {
                RuntimeError::at(VmError::Internal("operand stack underflow".into()), here)
            };

            self.coverage.hit(block, pc as u32);
            self.executed += 1;
            if let Some(limit) = self.max_instructions {
                if self.executed > limit {
                    return Err(fail(VmError::InstructionLimitExceeded { limit }));
                }
            }
            pc += 1;

            match instruction {
                Instruction::LoadConst(idx) => {
                    let value = program
                        .constant(idx)
                        .cloned()
                        .ok_or_else(|| {
                            fail(VmError::Internal(
                                format!("constant {idx} out of range").into(),
                            ))
                        })?;
                    stack.push(value);
                }
                Instruction::LoadInput => stack.push(self.input.clone()),
                Instruction::LoadData => stack.push(self.data.clone()),
                Instruction::LoadLocal(slot) => {
                    let value = locals.get(slot as usize).cloned().ok_or_else(|| {
                        fail(VmError::Internal(format!("local {slot} out of range").into()))
                    })?;
                    stack.push(value);
                }
                Instruction::StoreLocal(slot) => {
                    let value = stack.pop().ok_or_else(underflow)?;
                    let target = locals.get_mut(slot as usize).ok_or_else(|| {
                        fail(VmError::Internal(format!("local {slot} out of range").into()))
                    })?;
                    *target = value;
                }
                Instruction::Pop => {
                    stack.pop().ok_or_else(underflow)?;
                }
                Instruction::Dup => {
                    if !stack.dup() {
                        return Err(underflow());
                    }
                }
                Instruction::BinaryOp(op) => {
                    let b = stack.pop().ok_or_else(underflow)?;
                    let a = stack.pop().ok_or_else(underflow)?;
                    stack.push(binary_op(op, &a, &b).map_err(fail)?);
                }
                Instruction::Not => {
                    let value = stack.pop().ok_or_else(underflow)?;
                    let b = value.as_bool().ok_or_else(|| {
                        fail(VmError::RuntimeType(
                            format!("cannot negate {}", value.type_name()).into(),
                        ))
                    })?;
                    stack.push(Value::Bool(!b));
                }
                Instruction::Neg => {
                    let value = stack.pop().ok_or_else(underflow)?;
                    let n = value.as_number().ok_or_else(|| {
                        fail(VmError::RuntimeType(
                            format!("cannot negate {}", value.type_name()).into(),
                        ))
                    })?;
                    stack.push(Value::Number(n.neg()));
                }
                Instruction::Index => {
                    let key = stack.pop().ok_or_else(underflow)?;
                    let container = stack.pop().ok_or_else(underflow)?;
                    stack.push(index(&container, &key).map_err(fail)?);
                }
                Instruction::MakeArray(n) => {
                    let items = stack.pop_n(n as usize).ok_or_else(underflow)?;
                    stack.push(Value::from(items));
                }
                Instruction::MakeSet(n) => {
                    let items = stack.pop_n(n as usize).ok_or_else(underflow)?;
                    stack.push(Value::from(
                        items.into_iter().collect::<std::collections::BTreeSet<_>>(),
                    ));
                }
                Instruction::MakeObject(n) => {
                    let mut items = stack.pop_n(2 * n as usize).ok_or_else(underflow)?;
                    let mut object = std::collections::BTreeMap::new();
                    // Pairs were pushed key-first; later pairs overwrite
                    // earlier ones.
                    while !items.is_empty() {
                        let value = items.pop().unwrap_or_default();
                        let key = items.pop().unwrap_or_default();
                        object.entry(key).or_insert(value);
                    }
                    stack.push(Value::from(object));
                }
                Instruction::Jump(target) => pc = target as usize,
                Instruction::JumpIfFalse(target) => {
                    let value = stack.pop().ok_or_else(underflow)?;
                    let cond = value.as_bool().ok_or_else(|| {
                        fail(VmError::RuntimeType(
                            format!("condition must be a bool, got {}", value.type_name()).into(),
                        ))
                    })?;
                    if !cond {
                        pc = target as usize;
                    }
                }
                Instruction::JumpIfTrue(target) => {
                    let value = stack.pop().ok_or_else(underflow)?;
                    let cond = value.as_bool().ok_or_else(|| {
                        fail(VmError::RuntimeType(
                            format!("condition must be a bool, got {}", value.type_name()).into(),
                        ))
                    })?;
                    if cond {
                        pc = target as usize;
                    }
                }
                Instruction::CallBlock(target) => {
                    let callee = program.block(target).ok_or_else(|| {
                        fail(VmError::Internal(format!("block {target} out of range").into()))
                    })?;
                    frames.push(Frame {
                        block,
                        return_pc: pc,
                        stack_base: stack.len(),
                        locals: mem::take(&mut locals),
                    });
                    block = target;
                    pc = 0;
                    locals = vec![Value::Null; callee.num_locals as usize];
                }
                Instruction::CallExtension { decl, argc } => {
                    let name = program
                        .extension_decls
                        .get(decl as usize)
                        .map(|d| d.name.as_str())
                        .ok_or_else(|| {
                            fail(VmError::Internal(
                                format!("extension declaration {decl} out of range").into(),
                            ))
                        })?;
                    let args: SmallVec<[Value; 4]> = stack
                        .pop_n(argc as usize)
                        .ok_or_else(underflow)?
                        .into_iter()
                        .collect();
                    let entry = extensions.get(name).ok_or_else(|| {
                        fail(VmError::UndefinedReference(
                            format!("extension '{name}' is not registered").into(),
                        ))
                    })?;
                    let result = entry
                        .invoke(name, &args)
                        .map_err(|e| fail(VmError::Extension(e)))?;
                    stack.push(result);
                }
                Instruction::HostAwait => {
                    if self.mode == ExecutionMode::Normal {
                        return Err(fail(VmError::UnsupportedOperation(
                            "host-await is not allowed in normal execution mode".into(),
                        )));
                    }
                    let topic = stack.pop().ok_or_else(underflow)?;
                    let key = stack.pop().ok_or_else(underflow)?;
                    // pc already points past the await; the resumed run
                    // continues with the host value in this expression's
                    // place.
                    self.continuation = Some(Continuation {
                        frames,
                        stack: stack.into_inner(),
                        block,
                        pc,
                        locals,
                        results,
                    });
                    return Ok(Outcome::Suspended(PendingRequest { key, topic }));
                }
                Instruction::Emit => {
                    let value = stack.pop().ok_or_else(underflow)?;
                    results.push(value);
                }
                Instruction::Print => {
                    let value = stack.pop().ok_or_else(underflow)?;
                    if self.gather_prints {
                        self.prints.push(render_print(&value));
                    }
                }
                Instruction::Return => match frames.pop() {
                    Some(frame) => {
                        let result = stack.pop().ok_or_else(|| {
                            fail(VmError::Internal("helper block returned no value".into()))
                        })?;
                        stack.truncate(frame.stack_base);
                        stack.push(result);
                        block = frame.block;
                        pc = frame.return_pc;
                        locals = frame.locals;
                    }
                    None => return Ok(Outcome::Completed(results)),
                },
                Instruction::Nop => {}
            }
        }
    }
}

/// Dispatch a binary operator. Arithmetic is numbers-only; equality is
/// structural; the relational operators use the value total order, which
/// keeps them defined (and deterministic) across types.
fn binary_op(op: BinOp, a: &Value, b: &Value) -> core::result::Result<Value, VmError> {
    use std::cmp::Ordering;

    match op {
        BinOp::Eq => return Ok(Value::Bool(a == b)),
        BinOp::Ne => return Ok(Value::Bool(a != b)),
        BinOp::Lt => return Ok(Value::Bool(a.cmp(b) == Ordering::Less)),
        BinOp::Le => return Ok(Value::Bool(a.cmp(b) != Ordering::Greater)),
        BinOp::Gt => return Ok(Value::Bool(a.cmp(b) == Ordering::Greater)),
        BinOp::Ge => return Ok(Value::Bool(a.cmp(b) != Ordering::Less)),
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {}
    }

    let (Some(x), Some(y)) = (a.as_number(), b.as_number()) else {
        return Err(VmError::RuntimeType(
            format!("cannot apply {op} to {} and {}", a.type_name(), b.type_name()).into(),
        ));
    };
    let result = match op {
        BinOp::Add => x.add(y),
        BinOp::Sub => x.sub(y),
        BinOp::Mul => x.mul(y),
        BinOp::Div => x
            .checked_div(y)
            .ok_or_else(|| VmError::RuntimeType("divide by zero".into()))?,
        BinOp::Mod => x
            .checked_rem(y)
            .ok_or_else(|| VmError::RuntimeType("modulo by zero".into()))?,
        _ => unreachable!("comparison operators handled above"),
    };
    Ok(Value::Number(result))
}

/// Container lookup semantics shared by the `Index` instruction.
fn index(container: &Value, key: &Value) -> core::result::Result<Value, VmError> {
    match container {
        Value::Object(fields) => fields.get(key).cloned().ok_or_else(|| {
            VmError::UndefinedReference(format!("object has no key {key}").into())
        }),
        Value::Array(items) => {
            let n = key.as_number().ok_or_else(|| {
                VmError::RuntimeType(
                    format!("array index must be a number, got {}", key.type_name()).into(),
                )
            })?;
            n.as_index()
                .and_then(|i| items.get(i))
                .cloned()
                .ok_or_else(|| {
                    VmError::UndefinedReference(format!("array has no index {n}").into())
                })
        }
        Value::Set(items) => {
            if items.contains(key) {
                Ok(key.clone())
            } else {
                Err(VmError::UndefinedReference(
                    format!("set does not contain {key}").into(),
                ))
            }
        }
        other => Err(VmError::RuntimeType(
            format!("cannot index into {}", other.type_name()).into(),
        )),
    }
}

/// Strings print bare; everything else prints canonically.
fn render_print(value: &Value) -> String {
    match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    }
}
