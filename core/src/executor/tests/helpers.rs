//! Test helpers for executor tests
//!
//! Common utilities for compiling sources and driving VMs

use indexmap::IndexMap;
use serde_json::{json, Value as JsonValue};

use crate::codegen::generate;
use crate::executor::{resume, run_until_done, Control, Outcome, Step, VM};
use crate::parser::parse_program;
use crate::parser::semantic_validator::analyze;
use crate::types::ir::CompiledUnit;

/// Agents and prompts shared by the invocation tests
pub const AGENTS: &str = r#"
schema Verdict:
    ok: bool
    notes: list[string]?

prompt plan: "Plan for ${input_prompt}"
prompt judge expecting Verdict: "Judge ${draft}"
prompt triage escalate if ~ "needs human": "Triage ${input_prompt}"

agent planner:
    instruction plan
    prompt plan
    produces $plan

agent reviewer:
    instruction judge

agent triager:
    instruction triage
"#;

pub fn with_agents(rest: &str) -> String {
    format!("{}{}", AGENTS, rest)
}

/// Parse, analyze and lower `source`, then round-trip the unit through JSON
/// the way a host would store it
pub fn compile(source: &str) -> CompiledUnit {
    let program = parse_program(source).expect("Parse should succeed");
    let analysis = analyze(&program);
    assert!(analysis.is_valid, "analysis failed: {:?}", analysis.errors);
    let (unit, _) = generate(&program, "test.sr", analysis.symbols.merged_prompts())
        .expect("Lowering failed");

    let json = serde_json::to_string(&unit).expect("Unit serialization failed");
    serde_json::from_str(&json).expect("Unit deserialization failed")
}

/// Built-in variables a host would provide
pub fn globals() -> IndexMap<String, JsonValue> {
    IndexMap::from([("input_prompt".to_string(), json!("ship it"))])
}

/// VM for flow `name` with the default globals
pub fn start(unit: &CompiledUnit, name: &str, args: Vec<JsonValue>) -> VM {
    VM::for_flow(unit, name, args, globals()).expect("Flow should exist")
}

pub fn run(vm: &mut VM, unit: &CompiledUnit) -> Step {
    run_until_done(vm, unit).expect("Execution failed")
}

/// Answer the pending request, then run to the next stop
pub fn answer(vm: &mut VM, unit: &CompiledUnit, outcome: Outcome) -> Step {
    resume(vm, unit, outcome).expect("Resume failed");
    run(vm, unit)
}

/// Serialize and deserialize a VM
pub fn roundtrip(vm: &VM) -> VM {
    let json = serde_json::to_string(vm).expect("VM serialization failed");
    serde_json::from_str(&json).expect("VM deserialization failed")
}

/// Value of a finished `Control::Return`
pub fn returned(vm: &VM) -> &JsonValue {
    match &vm.control {
        Control::Return(value) => value,
        other => panic!("expected return, got {:?}", other),
    }
}
