//! End-to-end engine tests, driven through a test compiler that assembles
//! programs by hand, the same way any frontend would produce them.

use std::collections::HashMap;

use pretty_assertions::assert_eq;

use veto_core::api::{CompileError, Compiler, Engine, Source};
use veto_core::extensions::HostError;
use veto_core::values::Value;
use veto_core::vm::{BinOp, Block, Instruction, Program, VmError};

/// Maps entry-point paths to prebuilt programs; unknown paths are a compile
/// error, exactly as a real frontend reports unresolved entry points.
#[derive(Default)]
struct TestCompiler {
    programs: HashMap<String, Program>,
}

impl TestCompiler {
    fn with(mut self, path: &str, program: Program) -> Self {
        self.programs.insert(path.to_string(), program);
        self
    }
}

impl Compiler for TestCompiler {
    fn compile(
        &self,
        _modules: &[Source],
        entry_points: &[&str],
    ) -> Result<Program, CompileError> {
        let path = entry_points
            .first()
            .ok_or_else(|| CompileError::new("no entry point requested"))?;
        self.programs
            .get(*path)
            .cloned()
            .ok_or_else(|| CompileError::unresolved_entry_point(path))
    }
}

/// `allow := input.user == "alice"`
fn allow_program() -> Program {
    let mut program = Program::new();
    let user = program.add_constant(Value::from("user"));
    let alice = program.add_constant(Value::from("alice"));

    let mut block = Block::new(0);
    block.add_instruction(Instruction::LoadInput, None);
    block.add_instruction(Instruction::LoadConst(user), None);
    block.add_instruction(Instruction::Index, None);
    block.add_instruction(Instruction::LoadConst(alice), None);
    block.add_instruction(Instruction::BinaryOp(BinOp::Eq), None);
    block.add_instruction(Instruction::Emit, None);
    block.add_instruction(Instruction::Return, None);
    let entry = program.add_block(block);
    program.add_entry_point("data.example.allow", entry);
    program
}

/// `input.user` as a bare query.
fn user_query_program() -> Program {
    let mut program = Program::new();
    let user = program.add_constant(Value::from("user"));
    let mut block = Block::new(0);
    block.add_instruction(Instruction::LoadInput, None);
    block.add_instruction(Instruction::LoadConst(user), None);
    block.add_instruction(Instruction::Index, None);
    block.add_instruction(Instruction::Emit, None);
    block.add_instruction(Instruction::Return, None);
    let entry = program.add_block(block);
    program.add_entry_point("input.user", entry);
    program
}

/// A rule that emits nothing when `input.flag` is false.
fn guarded_program() -> Program {
    let mut program = Program::new();
    let flag = program.add_constant(Value::from("flag"));
    let yes = program.add_constant(Value::from(true));

    let mut block = Block::new(0);
    block.add_instruction(Instruction::LoadInput, None); // 0
    block.add_instruction(Instruction::LoadConst(flag), None); // 1
    block.add_instruction(Instruction::Index, None); // 2
    block.add_instruction(Instruction::JumpIfFalse(6), None); // 3
    block.add_instruction(Instruction::LoadConst(yes), None); // 4
    block.add_instruction(Instruction::Emit, None); // 5
    block.add_instruction(Instruction::Return, None); // 6
    let entry = program.add_block(block);
    program.add_entry_point("data.example.maybe", entry);
    program
}

/// `threshold := data.config.threshold`
fn threshold_program() -> Program {
    let mut program = Program::new();
    let config = program.add_constant(Value::from("config"));
    let threshold = program.add_constant(Value::from("threshold"));

    let mut block = Block::new(0);
    block.add_instruction(Instruction::LoadData, None);
    block.add_instruction(Instruction::LoadConst(config), None);
    block.add_instruction(Instruction::Index, None);
    block.add_instruction(Instruction::LoadConst(threshold), None);
    block.add_instruction(Instruction::Index, None);
    block.add_instruction(Instruction::Emit, None);
    block.add_instruction(Instruction::Return, None);
    let entry = program.add_block(block);
    program.add_entry_point("data.example.threshold", entry);
    program
}

/// `greeting := greet(input.user)` via a host extension, printing the
/// argument on the way.
fn greet_program() -> Program {
    let mut program = Program::new();
    let user = program.add_constant(Value::from("user"));
    let decl = program.add_extension_decl("greet");

    let mut block = Block::new(0);
    block.add_instruction(Instruction::LoadInput, None);
    block.add_instruction(Instruction::LoadConst(user), None);
    block.add_instruction(Instruction::Index, None);
    block.add_instruction(Instruction::Dup, None);
    block.add_instruction(Instruction::Print, None);
    block.add_instruction(Instruction::CallExtension { decl, argc: 1 }, None);
    block.add_instruction(Instruction::Emit, None);
    block.add_instruction(Instruction::Return, None);
    let entry = program.add_block(block);
    program.add_entry_point("data.example.greeting", entry);
    program
}

fn null_ext(_: &[Value]) -> Result<Value, HostError> {
    Ok(Value::Null)
}

fn standard_engine() -> Engine {
    let compiler = TestCompiler::default()
        .with("data.example.allow", allow_program())
        .with("input.user", user_query_program())
        .with("data.example.maybe", guarded_program())
        .with("data.example.threshold", threshold_program())
        .with("data.example.greeting", greet_program());
    let mut engine = Engine::new(compiler);
    engine.add_policy("example.rules", r#"allow := input.user == "alice""#);
    engine
}

#[test]
fn test_eval_rule_allow() {
    let mut engine = standard_engine();

    engine.set_input_json(r#"{"user": "alice"}"#).unwrap();
    assert_eq!(engine.eval_rule("data.example.allow").unwrap(), Value::from(true));

    engine.set_input_json(r#"{"user": "bob"}"#).unwrap();
    assert_eq!(engine.eval_rule("data.example.allow").unwrap(), Value::from(false));
}

#[test]
fn test_eval_rule_as_json() {
    let mut engine = standard_engine();
    engine.set_input_json(r#"{"user": "alice"}"#).unwrap();
    assert_eq!(
        engine.eval_rule_as_json("data.example.allow").unwrap(),
        "true"
    );
}

#[test]
fn test_unresolved_entry_point_is_compile_error() {
    let mut engine = standard_engine();
    let err = engine.eval_rule("data.example.nonexistent").unwrap_err();
    assert!(matches!(err, veto_core::api::Error::Compile(_)), "{err}");
}

#[test]
fn test_eval_query_shape() {
    let mut engine = standard_engine();
    engine.set_input_json(r#"{"user": "alice"}"#).unwrap();

    let results = engine.eval_query("input.user").unwrap();
    assert_eq!(results.result.len(), 1);
    assert_eq!(results.result[0].expressions[0].value, Value::from("alice"));
    assert_eq!(results.result[0].expressions[0].text, "input.user");

    assert_eq!(
        engine.eval_query_as_json("input.user").unwrap(),
        r#"{"result":[{"expressions":[{"value":"alice","text":"input.user"}]}]}"#
    );
}

#[test]
fn test_eval_rule_requires_exactly_one_binding() {
    let mut engine = standard_engine();
    engine.set_input_json(r#"{"flag": false}"#).unwrap();

    let err = engine.eval_rule("data.example.maybe").unwrap_err();
    match err {
        veto_core::api::Error::Runtime(e) => {
            assert!(matches!(e.kind, VmError::RuntimeType(_)), "{e}");
        }
        other => panic!("unexpected error {other}"),
    }

    // As a query, zero bindings is simply an empty result set.
    let results = engine.eval_query("data.example.maybe").unwrap();
    assert!(results.result.is_empty());
    assert_eq!(
        engine.eval_query_as_json("data.example.maybe").unwrap(),
        "{}"
    );
}

#[test]
fn test_bool_query_conveniences() {
    let mut engine = standard_engine();

    engine.set_input_json(r#"{"user": "alice"}"#).unwrap();
    assert!(engine.eval_bool_query("data.example.allow").unwrap());
    assert!(engine.eval_allow_query("data.example.allow"));
    assert!(engine.eval_deny_query("data.example.allow"));

    engine.set_input_json(r#"{"user": "bob"}"#).unwrap();
    assert!(!engine.eval_bool_query("data.example.allow").unwrap());
    assert!(!engine.eval_allow_query("data.example.allow"));
    assert!(!engine.eval_deny_query("data.example.allow"));

    // Non-boolean results are type errors for the bool form, and default
    // answers for the never-fail forms.
    engine.set_input_json(r#"{"user": "alice"}"#).unwrap();
    assert!(engine.eval_bool_query("input.user").is_err());
    assert!(!engine.eval_allow_query("input.user"));
    assert!(engine.eval_deny_query("input.user"));
}

#[test]
fn test_data_merging() {
    let mut engine = standard_engine();
    engine
        .add_data_json(r#"{"config": {"threshold": 10}}"#)
        .unwrap();
    engine
        .add_data_json(r#"{"config": {"mode": "strict"}}"#)
        .unwrap();

    assert_eq!(
        engine.eval_rule("data.example.threshold").unwrap(),
        Value::from(10i64)
    );

    // Conflicting leaf values are rejected.
    let err = engine
        .add_data_json(r#"{"config": {"threshold": 20}}"#)
        .unwrap_err();
    assert!(matches!(err, veto_core::api::Error::Data(_)), "{err}");

    // Non-object documents are rejected outright.
    let err = engine.add_data_json("[1, 2, 3]").unwrap_err();
    assert!(matches!(err, veto_core::api::Error::Api(_)), "{err}");

    engine.clear_data();
    assert!(engine.get_data().is_empty_object());
}

#[test]
fn test_extension_through_engine() {
    let mut engine = standard_engine();
    engine
        .add_extension("greet", 1, |args: &[Value]| -> Result<Value, HostError> {
            let name = args[0]
                .as_str()
                .ok_or_else(|| HostError::new("TypeError", "expected a string"))?;
            Ok(Value::from(format!("hello, {name}")))
        })
        .unwrap();

    engine.set_input_json(r#"{"user": "alice"}"#).unwrap();
    assert_eq!(
        engine.eval_rule("data.example.greeting").unwrap(),
        Value::from("hello, alice")
    );
}

#[test]
fn test_duplicate_extension_rejected() {
    let mut engine = standard_engine();
    engine.add_extension("greet", 1, null_ext).unwrap();
    let err = engine.add_extension("greet", 2, null_ext).unwrap_err();
    assert!(matches!(err, veto_core::api::Error::Extension(_)), "{err}");
}

#[test]
fn test_raising_extension_does_not_poison_engine() {
    let mut engine = standard_engine();
    engine
        .add_extension("greet", 1, |_: &[Value]| -> Result<Value, HostError> {
            panic!("extension always explodes")
        })
        .unwrap();

    engine.set_input_json(r#"{"user": "alice"}"#).unwrap();
    let err = engine.eval_rule("data.example.greeting").unwrap_err();
    assert!(err.to_string().contains("extension always explodes"), "{err}");

    // The same engine keeps evaluating other rules.
    assert_eq!(engine.eval_rule("data.example.allow").unwrap(), Value::from(true));
    // And the failing extension fails identically next time, not worse.
    let err = engine.eval_rule("data.example.greeting").unwrap_err();
    assert!(err.to_string().contains("extension always explodes"), "{err}");
}

#[test]
fn test_coverage_reports() {
    let mut engine = standard_engine();
    engine.set_enable_coverage(true);
    engine.set_input_json(r#"{"user": "alice"}"#).unwrap();
    engine.eval_rule("data.example.allow").unwrap();

    let a = engine.get_coverage_report_as_json().unwrap();
    let b = engine.get_coverage_report_as_json().unwrap();
    assert_eq!(a, b);
    assert!(a.contains("\"covered\""));

    let pretty = engine.get_coverage_report_pretty();
    assert!(pretty.starts_with("COVERAGE REPORT:"));

    engine.clear_coverage_data();
    let cleared = engine.get_coverage_report_as_json().unwrap();
    assert_ne!(a, cleared);
}

#[test]
fn test_prints_drain_once() {
    let mut engine = standard_engine();
    engine.add_extension("greet", 1, null_ext).unwrap();
    engine.set_gather_prints(true);
    engine.set_input_json(r#"{"user": "alice"}"#).unwrap();
    engine.eval_rule("data.example.greeting").unwrap();

    assert_eq!(engine.take_prints(), vec!["alice".to_string()]);
    assert_eq!(engine.take_prints(), Vec::<String>::new());
}

#[test]
fn test_prints_disabled_by_default() {
    let mut engine = standard_engine();
    engine.add_extension("greet", 1, null_ext).unwrap();
    engine.set_input_json(r#"{"user": "alice"}"#).unwrap();
    engine.eval_rule("data.example.greeting").unwrap();
    assert_eq!(engine.take_prints(), Vec::<String>::new());
}

#[test]
fn test_cloned_engine_is_independent() {
    let mut engine = standard_engine();
    engine.add_data_json(r#"{"config": {"threshold": 10}}"#).unwrap();

    let mut clone = engine.clone();
    clone.clear_data();
    clone.add_data_json(r#"{"config": {"threshold": 99}}"#).unwrap();

    assert_eq!(
        engine.eval_rule("data.example.threshold").unwrap(),
        Value::from(10i64)
    );
    assert_eq!(
        clone.eval_rule("data.example.threshold").unwrap(),
        Value::from(99i64)
    );
}

#[test]
fn test_partial_program_from_compiler_is_rejected() {
    let mut partial = allow_program();
    partial.set_partial(true);
    let compiler = TestCompiler::default().with("data.example.allow", partial);
    let mut engine = Engine::new(compiler);

    engine.set_input_json(r#"{"user": "alice"}"#).unwrap();
    let err = engine.eval_rule("data.example.allow").unwrap_err();
    match err {
        veto_core::api::Error::Runtime(e) => assert_eq!(e.kind, VmError::PartialProgram),
        other => panic!("unexpected error {other}"),
    }
}
