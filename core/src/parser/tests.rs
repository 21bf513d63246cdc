//! Parser tests - verify parsing and AST structure
//!
//! These tests only check that source text becomes the expected AST. Name
//! resolution lives in the semantic validator tests, execution in the
//! executor tests.

use super::{parse_program, parse_tree, SyntaxError};
use crate::diagnostics::ErrorCode;
use crate::types::ast::{
    BackoffKind, BinaryOperator, ConditionOp, EscalationAction, EventTiming, EventType, Expr,
    Literal, Program, RunTarget, SourcePosition, Stmt, ToolKind, TopLevel, UnaryOperator,
};

/* ===================== Helpers ===================== */

fn parse(source: &str) -> Program {
    parse_program(source).expect("Should parse")
}

fn parse_err(source: &str) -> SyntaxError {
    parse_program(source).expect_err("Should not parse")
}

/// Wrap statements in `flow main:` and return its body
fn body(statements: &str) -> Vec<Stmt> {
    let mut source = String::from("flow main:\n");
    for line in statements.lines() {
        source.push_str("    ");
        source.push_str(line);
        source.push('\n');
    }
    let program = parse(&source);
    let flow = program.flows().next().expect("flow missing");
    flow.body.clone()
}

/// Parse `return <expr>` and hand back the expression
fn expr(source: &str) -> Expr {
    match body(&format!("return {}", source)).remove(0) {
        Stmt::Return { value, .. } => value,
        other => panic!("Expected Return, got {:?}", other),
    }
}

fn num(v: f64) -> Literal {
    Literal::Number(v)
}

/* ===================== Program Structure ===================== */

#[test]
fn test_empty_program() {
    assert!(parse("").items.is_empty());
    assert!(parse("\n\n# only a comment\n\n").items.is_empty());
}

#[test]
fn test_version_and_import() {
    let program = parse("streetrace v1\nimport helpers from \"./helpers.sr\"\n");

    assert_eq!(program.version().map(|v| v.version.as_str()), Some("v1"));
    let import = program.imports().next().expect("import missing");
    assert_eq!(import.name, "helpers");
    assert_eq!(import.source, "./helpers.sr");
    assert_eq!(import.position, Some(SourcePosition::new(2, 1)));
}

#[test]
fn test_item_positions() {
    let program = parse(
        r#"
# leading comment
model main = anthropic/claude-sonnet

flow main:
    return 1
"#,
    );

    let positions: Vec<_> = program.items.iter().map(|item| item.position()).collect();
    assert_eq!(
        positions,
        vec![Some(SourcePosition::new(3, 1)), Some(SourcePosition::new(5, 1))]
    );
}

#[test]
fn test_reparse_is_stable() {
    let source = r#"
prompt plan: "Plan ${input_prompt}"

agent:
    instruction plan

flow main:
    $x = run agent default with $input_prompt
    return $x
"#;
    assert_eq!(parse(source), parse(source));
}

/* ===================== Definitions ===================== */

#[test]
fn test_model_shorthand_and_properties() {
    let program = parse(
        r#"
model main = anthropic/claude-sonnet
model quoted = "openai/gpt-4o"
model tuned:
    provider: anthropic
    temperature: 0.2
    name: "claude haiku"
"#,
    );
    let models: Vec<_> = program.models().collect();

    assert_eq!(models[0].spec.as_deref(), Some("anthropic/claude-sonnet"));
    assert_eq!(models[1].spec.as_deref(), Some("openai/gpt-4o"));
    assert_eq!(models[2].spec, None);

    let props: Vec<_> = models[2]
        .properties
        .iter()
        .map(|p| (p.key.as_str(), p.value.clone()))
        .collect();
    assert_eq!(
        props,
        vec![
            ("provider", Literal::String("anthropic".to_string())),
            ("temperature", num(0.2)),
            ("name", Literal::String("claude haiku".to_string())),
        ]
    );
    assert_eq!(
        models[2].properties[1].position,
        Some(SourcePosition::new(6, 5))
    );
}

#[test]
fn test_schema_field_types() {
    let program = parse(
        r#"
schema Report:
    title: string
    score: float?
    tags: string[]
    notes: list[string]?
"#,
    );
    let schema = program.schemas().next().expect("schema missing");
    let fields: Vec<_> = schema
        .fields
        .iter()
        .map(|f| {
            (
                f.name.as_str(),
                f.field_type.base_type.as_str(),
                f.field_type.is_list,
                f.field_type.is_optional,
            )
        })
        .collect();

    assert_eq!(
        fields,
        vec![
            ("title", "string", false, false),
            ("score", "float", false, true),
            ("tags", "string", true, false),
            ("notes", "string", true, true),
        ]
    );
}

#[test]
fn test_tool_shorthands() {
    let program = parse(
        r#"
tool fs = builtin streetrace.fs
tool github = mcp "https://api.github.com/mcp" with auth bearer "${GITHUB_TOKEN}"
"#,
    );
    let tools: Vec<_> = program.tools().collect();

    assert_eq!(tools[0].kind, Some(ToolKind::Builtin));
    assert_eq!(tools[0].reference.as_deref(), Some("streetrace.fs"));

    assert_eq!(tools[1].kind, Some(ToolKind::Mcp));
    assert_eq!(tools[1].url.as_deref(), Some("https://api.github.com/mcp"));
    let auth = tools[1].auth.as_ref().expect("auth missing");
    assert_eq!(auth.scheme, "bearer");
    assert_eq!(auth.value, "${GITHUB_TOKEN}");
}

#[test]
fn test_tool_property_block() {
    let program = parse(
        r#"
tool search:
    type: mcp
    url: "https://search.example.com/mcp"
    auth: "basic dXNlcjpwYXNz"
"#,
    );
    let tool = program.tools().next().expect("tool missing");

    assert_eq!(tool.kind, Some(ToolKind::Mcp));
    assert_eq!(tool.url.as_deref(), Some("https://search.example.com/mcp"));
    let auth = tool.auth.as_ref().expect("auth missing");
    assert_eq!(auth.scheme, "basic");
    assert_eq!(auth.value, "dXNlcjpwYXNz");
}

#[test]
fn test_unknown_tool_property() {
    let err = parse_err("tool search:\n    colour: red\n");
    assert!(err.message.contains("unknown tool property `colour`"), "{}", err);
    assert_eq!(err.line, 2);
}

#[test]
fn test_retry_and_timeout_policies() {
    let program = parse(
        r#"
retry standard = 3 times, exponential backoff
retry quick = 2 times
timeout short = 2 minutes
timeout tiny = 500 ms
"#,
    );

    let mut retries = Vec::new();
    let mut timeouts = Vec::new();
    for item in &program.items {
        match item {
            TopLevel::RetryPolicy(policy) => retries.push((policy.count, policy.backoff)),
            TopLevel::TimeoutPolicy(policy) => timeouts.push(policy.millis),
            other => panic!("Unexpected item {:?}", other),
        }
    }
    assert_eq!(
        retries,
        vec![(3, BackoffKind::Exponential), (2, BackoffKind::Fixed)]
    );
    assert_eq!(timeouts, vec![120_000, 500]);
}

#[test]
fn test_prompt_with_modifiers() {
    let program = parse(
        r#"
prompt judge expecting Verdict using model fast inherit $history escalate if ~ "needs human": """
    Judge the draft.
      Be strict.
    """
"#,
    );
    let prompt = match &program.items[0] {
        TopLevel::Prompt(prompt) => prompt,
        other => panic!("Expected Prompt, got {:?}", other),
    };

    assert_eq!(prompt.name, "judge");
    assert_eq!(prompt.expecting.as_deref(), Some("Verdict"));
    assert_eq!(prompt.model.as_deref(), Some("fast"));
    assert_eq!(prompt.inherit.as_deref(), Some("$history"));
    let condition = prompt.escalation.as_ref().expect("condition missing");
    assert_eq!(condition.op, ConditionOp::Normalized);
    assert_eq!(condition.value, "needs human");
    assert_eq!(prompt.body, "Judge the draft.\n  Be strict.");
}

#[test]
fn test_prompt_quoted_model_and_condition_ops() {
    let program = parse(
        r#"
prompt a using model "anthropic/claude-haiku": "A"
prompt b escalate if contains "stuck": "B"
prompt c escalate if != "ok": "C"
prompt d
"#,
    );
    let prompts: Vec<_> = program
        .items
        .iter()
        .filter_map(|item| match item {
            TopLevel::Prompt(prompt) => Some(prompt),
            _ => None,
        })
        .collect();

    assert_eq!(prompts[0].model.as_deref(), Some("anthropic/claude-haiku"));
    assert_eq!(
        prompts[1].escalation.as_ref().map(|c| c.op),
        Some(ConditionOp::Contains)
    );
    assert_eq!(
        prompts[2].escalation.as_ref().map(|c| c.op),
        Some(ConditionOp::NotEquals)
    );
    assert_eq!(prompts[3].body, "");
}

#[test]
fn test_agent_properties() {
    let program = parse(
        r#"
agent researcher:
    tools fs, github
    instruction research
    prompt research
    retry standard
    timeout short
    description "Finds sources"
    delegate summarizer, checker
    use helper
    produces $findings
"#,
    );
    let agent = program.agents().next().expect("agent missing");

    assert_eq!(agent.name.as_deref(), Some("researcher"));
    assert_eq!(agent.tools, vec!["fs", "github"]);
    assert_eq!(agent.instruction.as_deref(), Some("research"));
    assert_eq!(agent.prompt.as_deref(), Some("research"));
    assert_eq!(agent.retry.as_deref(), Some("standard"));
    assert_eq!(agent.timeout.as_deref(), Some("short"));
    assert_eq!(agent.description.as_deref(), Some("Finds sources"));
    assert_eq!(agent.sub_agents, vec!["summarizer", "checker"]);
    assert_eq!(agent.agent_tools, vec!["helper"]);
    assert_eq!(agent.produces.as_deref(), Some("$findings"));
}

#[test]
fn test_unnamed_agent_is_default() {
    let program = parse("agent:\n    instruction plan\n");
    let agent = program.agents().next().expect("agent missing");
    assert_eq!(agent.name, None);
    assert_eq!(agent.resolved_name(), "default");
}

#[test]
fn test_flow_params_and_multi_word_name() {
    let program = parse("flow get   agent goal $topic $depth:\n    return $topic\n");
    let flow = program.flows().next().expect("flow missing");

    assert_eq!(flow.name, "get agent goal");
    assert_eq!(flow.params, vec!["$topic", "$depth"]);
    assert_eq!(flow.body.len(), 1);
}

#[test]
fn test_flow_body_ends_at_unindented_line() {
    let program = parse(
        r#"
flow first:
    log "one"

    # a comment between statements
    log "two"
flow second:
    log "three"
"#,
    );
    let bodies: Vec<_> = program.flows().map(|f| f.body.len()).collect();
    assert_eq!(bodies, vec![2, 1]);
}

#[test]
fn test_event_handlers() {
    let program = parse(
        r#"
on start do
    $greeting = "hi"
end

after output do
    log "done"
end

on tool-call do
    log "calling"
end
"#,
    );
    let handlers: Vec<_> = program
        .handlers()
        .map(|h| (h.timing, h.event, h.body.len()))
        .collect();

    assert_eq!(
        handlers,
        vec![
            (EventTiming::On, EventType::Start, 1),
            (EventTiming::After, EventType::Output, 1),
            (EventTiming::On, EventType::ToolCall, 1),
        ]
    );
    assert!(program.handlers().next().map(|h| h.is_on_start()).unwrap_or(false));
}

/* ===================== Statements ===================== */

#[test]
fn test_assignment_and_property_assignment() {
    let stmts = body("$x = 1\n$report.summary.text = \"ok\"");

    match &stmts[0] {
        Stmt::Assignment {
            target,
            value: Expr::Literal { value, .. },
            position,
        } => {
            assert_eq!(target, "$x");
            assert_eq!(*value, num(1.0));
            assert_eq!(*position, Some(SourcePosition::new(2, 5)));
        }
        other => panic!("Expected Assignment, got {:?}", other),
    }
    match &stmts[1] {
        Stmt::PropertyAssignment { target, path, .. } => {
            assert_eq!(target, "$report");
            assert_eq!(path, &vec!["summary".to_string(), "text".to_string()]);
        }
        other => panic!("Expected PropertyAssignment, got {:?}", other),
    }
}

#[test]
fn test_run_agent_with_escalation_handlers() {
    let stmts = body(
        r#"$a = run agent planner with $input_prompt, on escalate return "fallback"
run agent reviewer with $a, $input_prompt on escalate continue
run agent triager on escalate abort
run agent plain"#,
    );

    match &stmts[0] {
        Stmt::Run(run) => {
            assert_eq!(run.target, RunTarget::Agent("planner".to_string()));
            assert_eq!(run.assign_to.as_deref(), Some("$a"));
            assert_eq!(run.input.len(), 1);
            match &run.on_escalate {
                Some(EscalationAction::Return {
                    value: Expr::Literal { value, .. },
                }) => assert_eq!(*value, Literal::String("fallback".to_string())),
                other => panic!("Expected on escalate return, got {:?}", other),
            }
        }
        other => panic!("Expected Run, got {:?}", other),
    }
    match &stmts[1] {
        Stmt::Run(run) => {
            assert_eq!(run.assign_to, None);
            assert_eq!(run.input.len(), 2);
            assert_eq!(run.on_escalate, Some(EscalationAction::Continue));
        }
        other => panic!("Expected Run, got {:?}", other),
    }
    match &stmts[2] {
        Stmt::Run(run) => {
            assert!(run.input.is_empty());
            assert_eq!(run.on_escalate, Some(EscalationAction::Abort));
        }
        other => panic!("Expected Run, got {:?}", other),
    }
    match &stmts[3] {
        Stmt::Run(run) => assert_eq!(run.on_escalate, None),
        other => panic!("Expected Run, got {:?}", other),
    }
}

#[test]
fn test_run_flow_multi_word() {
    let stmts = body("$goal = run get   agent goal with $input_prompt\nrun cleanup");

    match &stmts[0] {
        Stmt::Run(run) => {
            assert_eq!(run.target, RunTarget::Flow("get agent goal".to_string()));
            assert_eq!(run.assign_to.as_deref(), Some("$goal"));
        }
        other => panic!("Expected Run, got {:?}", other),
    }
    match &stmts[1] {
        Stmt::Run(run) => assert_eq!(run.target, RunTarget::Flow("cleanup".to_string())),
        other => panic!("Expected Run, got {:?}", other),
    }
}

#[test]
fn test_call_llm() {
    let stmts = body(
        "$v = call llm judge with $draft using model fast\ncall llm summarize using model \"openai/gpt-4o\"",
    );

    match &stmts[0] {
        Stmt::Call(call) => {
            assert_eq!(call.prompt, "judge");
            assert_eq!(call.assign_to.as_deref(), Some("$v"));
            assert_eq!(call.input, vec![Expr::VarRef {
                name: "$draft".to_string(),
                position: Some(SourcePosition::new(2, 30)),
            }]);
            assert_eq!(call.model.as_deref(), Some("fast"));
        }
        other => panic!("Expected Call, got {:?}", other),
    }
    match &stmts[1] {
        Stmt::Call(call) => {
            assert!(call.input.is_empty());
            assert_eq!(call.model.as_deref(), Some("openai/gpt-4o"));
        }
        other => panic!("Expected Call, got {:?}", other),
    }
}

#[test]
fn test_push_and_return() {
    let stmts = body("push $item.name to $names\nreturn $names");

    match &stmts[0] {
        Stmt::Push { value, target, .. } => {
            assert_eq!(target, "$names");
            assert!(matches!(value, Expr::PropertyAccess { property, .. } if property == "name"));
        }
        other => panic!("Expected Push, got {:?}", other),
    }
    assert!(matches!(&stmts[1], Stmt::Return { value: Expr::VarRef { name, .. }, .. } if name == "$names"));
}

#[test]
fn test_for_loop_both_openers() {
    let stmts = body(
        r#"for $item in $items do
    log "a"
end
for $item in [1, 2]:
    log "b"
    log "c"
end"#,
    );

    match &stmts[0] {
        Stmt::ForLoop {
            variable,
            iterable,
            body,
            ..
        } => {
            assert_eq!(variable, "$item");
            assert!(matches!(iterable, Expr::VarRef { name, .. } if name == "$items"));
            assert_eq!(body.len(), 1);
        }
        other => panic!("Expected ForLoop, got {:?}", other),
    }
    match &stmts[1] {
        Stmt::ForLoop { iterable, body, .. } => {
            assert!(matches!(iterable, Expr::ListLiteral { elements, .. } if elements.len() == 2));
            assert_eq!(body.len(), 2);
        }
        other => panic!("Expected ForLoop, got {:?}", other),
    }
}

#[test]
fn test_if_else() {
    let stmts = body(
        r#"if $score > 0.5:
    return "pass"
else:
    log "low"
    return "fail"
end
if $done do
    return 1
end"#,
    );

    match &stmts[0] {
        Stmt::IfBlock {
            condition,
            body,
            else_body,
            ..
        } => {
            assert!(matches!(condition, Expr::BinaryOp { op: BinaryOperator::Gt, .. }));
            assert_eq!(body.len(), 1);
            assert_eq!(else_body.as_ref().map(Vec::len), Some(2));
        }
        other => panic!("Expected IfBlock, got {:?}", other),
    }
    assert!(matches!(&stmts[1], Stmt::IfBlock { else_body: None, .. }));
}

#[test]
fn test_nested_blocks() {
    let stmts = body(
        r#"for $item in $items do
    if $item > 1:
        push $item to $big
    end
end
return $big"#,
    );

    assert_eq!(stmts.len(), 2);
    match &stmts[0] {
        Stmt::ForLoop { body, .. } => match &body[0] {
            Stmt::IfBlock { body, .. } => assert!(matches!(body[0], Stmt::Push { .. })),
            other => panic!("Expected IfBlock, got {:?}", other),
        },
        other => panic!("Expected ForLoop, got {:?}", other),
    }
}

#[test]
fn test_match_cases() {
    let stmts = body(
        r#"match $kind
    when "bug" -> log "bug"
    when "feature":
        log "feature"
        return 1
    else -> return 0
end"#,
    );

    match &stmts[0] {
        Stmt::MatchBlock {
            subject,
            cases,
            else_body,
            ..
        } => {
            assert!(matches!(subject, Expr::VarRef { name, .. } if name == "$kind"));
            let shapes: Vec<_> = cases
                .iter()
                .map(|c| (c.pattern.as_str(), c.body.len()))
                .collect();
            assert_eq!(shapes, vec![("bug", 1), ("feature", 2)]);
            assert_eq!(cases[1].position, Some(SourcePosition::new(4, 9)));
            assert!(matches!(
                else_body.as_deref(),
                Some([Stmt::Return { .. }])
            ));
        }
        other => panic!("Expected MatchBlock, got {:?}", other),
    }
}

#[test]
fn test_parallel_block() {
    let stmts = body(
        r#"parallel do
    $a = run agent planner with $input_prompt
    run agent reviewer
end"#,
    );

    match &stmts[0] {
        Stmt::ParallelBlock { body, .. } => {
            assert_eq!(body.len(), 2);
            assert!(matches!(&body[0], Stmt::Run(run) if run.assign_to.as_deref() == Some("$a")));
        }
        other => panic!("Expected ParallelBlock, got {:?}", other),
    }
}

#[test]
fn test_parallel_rejects_other_statements() {
    let err = parse_err("flow main:\n    parallel do\n        log \"x\"\n    end\n");
    assert_eq!(err.line, 3);
}

#[test]
fn test_failure_and_loop_blocks() {
    let stmts = body(
        r#"on failure do
    log "retrying"
    retry step
end
loop max 3 do
    continue
end
loop do
    abort "gave up"
end"#,
    );

    match &stmts[0] {
        Stmt::FailureBlock { body, .. } => {
            assert!(matches!(body[1], Stmt::RetryStep { .. }));
        }
        other => panic!("Expected FailureBlock, got {:?}", other),
    }
    match &stmts[1] {
        Stmt::LoopBlock {
            max_iterations,
            body,
            ..
        } => {
            assert_eq!(*max_iterations, Some(3));
            assert!(matches!(body[0], Stmt::Continue { .. }));
        }
        other => panic!("Expected LoopBlock, got {:?}", other),
    }
    match &stmts[2] {
        Stmt::LoopBlock {
            max_iterations: None,
            body,
            ..
        } => {
            assert!(matches!(&body[0], Stmt::Abort { message: Some(m), .. } if m == "gave up"));
        }
        other => panic!("Expected LoopBlock, got {:?}", other),
    }
}

#[test]
fn test_event_statements() {
    let stmts = body(
        r#"log "step ${n}"
notify "ready"
escalate to reviewer "stuck"
escalate "no target"
escalate
abort"#,
    );

    assert!(matches!(&stmts[0], Stmt::Log { message, .. } if message == "step ${n}"));
    assert!(matches!(&stmts[1], Stmt::Notify { message, .. } if message == "ready"));
    assert!(matches!(
        &stmts[2],
        Stmt::Escalate { target: Some(t), message: Some(m), .. } if t == "reviewer" && m == "stuck"
    ));
    assert!(matches!(
        &stmts[3],
        Stmt::Escalate { target: None, message: Some(_), .. }
    ));
    assert!(matches!(
        &stmts[4],
        Stmt::Escalate { target: None, message: None, .. }
    ));
    assert!(matches!(&stmts[5], Stmt::Abort { message: None, .. }));
}

#[test]
fn test_trailing_comments() {
    let stmts = body("$x = 1 # set it\nreturn $x # done");
    assert_eq!(stmts.len(), 2);
}

/* ===================== Expressions ===================== */

#[test]
fn test_literals() {
    assert!(matches!(expr("42"), Expr::Literal { value, .. } if value == num(42.0)));
    assert!(matches!(expr("2.5"), Expr::Literal { value, .. } if value == num(2.5)));
    assert!(matches!(expr("true"), Expr::Literal { value: Literal::Bool(true), .. }));
    assert!(matches!(expr("false"), Expr::Literal { value: Literal::Bool(false), .. }));
    assert!(matches!(expr("null"), Expr::Literal { value: Literal::Null, .. }));
    assert!(matches!(expr("none"), Expr::Literal { value: Literal::Null, .. }));
    assert!(
        matches!(expr(r#""""#), Expr::Literal { value: Literal::String(s), .. } if s.is_empty())
    );
}

#[test]
fn test_negative_number_is_unary() {
    match expr("-3") {
        Expr::UnaryOp {
            op: UnaryOperator::Neg,
            operand,
            ..
        } => assert!(matches!(*operand, Expr::Literal { value, .. } if value == num(3.0))),
        other => panic!("Expected UnaryOp, got {:?}", other),
    }
}

#[test]
fn test_string_escapes() {
    match expr(r#""say \"hi\"\n\tdone \\ ok""#) {
        Expr::Literal {
            value: Literal::String(s),
            ..
        } => assert_eq!(s, "say \"hi\"\n\tdone \\ ok"),
        other => panic!("Expected string, got {:?}", other),
    }
}

#[test]
fn test_precedence() {
    // $a + $b * 2 > 3 and not $c
    match expr("$a + $b * 2 > 3 and not $c") {
        Expr::BinaryOp {
            op: BinaryOperator::And,
            left,
            right,
            ..
        } => {
            match *left {
                Expr::BinaryOp {
                    op: BinaryOperator::Gt,
                    left: sum,
                    ..
                } => match *sum {
                    Expr::BinaryOp {
                        op: BinaryOperator::Add,
                        right: product,
                        ..
                    } => assert!(matches!(
                        *product,
                        Expr::BinaryOp { op: BinaryOperator::Mul, .. }
                    )),
                    other => panic!("Expected Add, got {:?}", other),
                },
                other => panic!("Expected Gt, got {:?}", other),
            }
            assert!(matches!(
                *right,
                Expr::UnaryOp { op: UnaryOperator::Not, .. }
            ));
        }
        other => panic!("Expected And, got {:?}", other),
    }
}

#[test]
fn test_or_binds_looser_than_and() {
    match expr("$a or $b and $c") {
        Expr::BinaryOp {
            op: BinaryOperator::Or,
            right,
            ..
        } => assert!(matches!(
            *right,
            Expr::BinaryOp { op: BinaryOperator::And, .. }
        )),
        other => panic!("Expected Or, got {:?}", other),
    }
}

#[test]
fn test_subtraction_is_left_associative() {
    // (10 - 4) - 3
    match expr("10 - 4 - 3") {
        Expr::BinaryOp {
            op: BinaryOperator::Sub,
            left,
            right,
            ..
        } => {
            assert!(matches!(*left, Expr::BinaryOp { op: BinaryOperator::Sub, .. }));
            assert!(matches!(*right, Expr::Literal { value, .. } if value == num(3.0)));
        }
        other => panic!("Expected Sub, got {:?}", other),
    }
}

#[test]
fn test_parentheses_override_precedence() {
    match expr("($a + 1) * 2") {
        Expr::BinaryOp {
            op: BinaryOperator::Mul,
            left,
            ..
        } => assert!(matches!(*left, Expr::BinaryOp { op: BinaryOperator::Add, .. })),
        other => panic!("Expected Mul, got {:?}", other),
    }
}

#[test]
fn test_comparison_operators() {
    let cases = [
        ("$a == 1", BinaryOperator::Eq),
        ("$a != 1", BinaryOperator::Ne),
        ("$a < 1", BinaryOperator::Lt),
        ("$a <= 1", BinaryOperator::Lte),
        ("$a > 1", BinaryOperator::Gt),
        ("$a >= 1", BinaryOperator::Gte),
        ("$a contains \"x\"", BinaryOperator::Contains),
        ("$a / 2", BinaryOperator::Div),
    ];
    for (source, expected) in cases {
        match expr(source) {
            Expr::BinaryOp { op, .. } => assert_eq!(op, expected, "{}", source),
            other => panic!("Expected BinaryOp for {}, got {:?}", source, other),
        }
    }
}

#[test]
fn test_comparisons_do_not_chain() {
    let err = parse_err("flow main:\n    return 1 < 2 < 3\n");
    assert_eq!(err.line, 2);
}

#[test]
fn test_property_access_chain() {
    match expr("$plan.steps.count") {
        Expr::PropertyAccess {
            object, property, ..
        } => {
            assert_eq!(property, "count");
            assert!(matches!(
                *object,
                Expr::PropertyAccess { ref property, .. } if property == "steps"
            ));
        }
        other => panic!("Expected PropertyAccess, got {:?}", other),
    }
}

#[test]
fn test_function_calls() {
    match expr("join(upper($a), \", \")") {
        Expr::FunctionCall { name, args, .. } => {
            assert_eq!(name, "join");
            assert_eq!(args.len(), 2);
            assert!(matches!(&args[0], Expr::FunctionCall { name, .. } if name == "upper"));
        }
        other => panic!("Expected FunctionCall, got {:?}", other),
    }
    assert!(matches!(expr("now()"), Expr::FunctionCall { args, .. } if args.is_empty()));
}

#[test]
fn test_list_and_object_literals() {
    assert!(matches!(expr("[]"), Expr::ListLiteral { elements, .. } if elements.is_empty()));
    assert!(matches!(expr("{}"), Expr::ObjectLiteral { entries, .. } if entries.is_empty()));

    match expr(r#"{name: $n, "with space": [1, 2,], nested: {ok: true}}"#) {
        Expr::ObjectLiteral { entries, .. } => {
            let keys: Vec<_> = entries.iter().map(|(k, _)| k.as_str()).collect();
            assert_eq!(keys, vec!["name", "with space", "nested"]);
            assert!(matches!(&entries[1].1, Expr::ListLiteral { elements, .. } if elements.len() == 2));
        }
        other => panic!("Expected ObjectLiteral, got {:?}", other),
    }
}

#[test]
fn test_multi_line_list() {
    let stmts = body("$xs = [\n    1,\n    2\n]\nreturn $xs");
    assert_eq!(stmts.len(), 2);
    assert!(matches!(
        &stmts[0],
        Stmt::Assignment { value: Expr::ListLiteral { elements, .. }, .. } if elements.len() == 2
    ));
}

/* ===================== Keyword Boundaries ===================== */

#[test]
fn test_keyword_prefixes_are_identifiers() {
    // `nothing` starts with `not`, `agent_helper` with `agent`
    assert!(matches!(expr("nothing()"), Expr::FunctionCall { name, .. } if name == "nothing"));

    let stmts = body("run agent_helper\nrun endpoint check");
    assert!(matches!(&stmts[0], Stmt::Run(run) if run.target == RunTarget::Flow("agent_helper".to_string())));
    assert!(matches!(&stmts[1], Stmt::Run(run) if run.target == RunTarget::Flow("endpoint check".to_string())));
}

#[test]
fn test_variables_may_use_keywords() {
    let stmts = body("$end = 1\n$in = $end + 1\nreturn $in");
    assert!(matches!(&stmts[0], Stmt::Assignment { target, .. } if target == "$end"));
}

#[test]
fn test_flow_name_stops_at_keyword() {
    let stmts = body("run summarize report with $x");
    match &stmts[0] {
        Stmt::Run(run) => {
            assert_eq!(run.target.name(), "summarize report");
            assert_eq!(run.input.len(), 1);
        }
        other => panic!("Expected Run, got {:?}", other),
    }
}

/* ===================== Syntax Errors ===================== */

#[test]
fn test_syntax_error_position() {
    let err = parse_err("flow main:\n    return 1\n    $x = = 2\n");
    assert_eq!((err.line, err.column), (3, 10));
    assert!(err.to_string().starts_with("syntax error at line 3, column 10"));
}

#[test]
fn test_syntax_error_diagnostic() {
    let err = parse_err("flow main:\n    $x = = 2\n");
    let diagnostic = err.to_diagnostic();
    assert_eq!(diagnostic.code, ErrorCode::E0100);
    assert_eq!(diagnostic.position, Some(err.position()));
}

#[test]
fn test_unterminated_string() {
    let err = parse_err("flow main:\n    log \"never closed\n");
    assert_eq!(err.line, 2);
}

#[test]
fn test_missing_end() {
    assert!(parse_program("on start do\n    log \"x\"\n").is_err());
    assert!(parse_program("flow main:\n    loop do\n        continue\n").is_err());
}

#[test]
fn test_flow_needs_body() {
    assert!(parse_program("flow main:\n").is_err());
}

#[test]
fn test_unknown_top_level() {
    let err = parse_err("flow main:\n    return 1\nwidget main\n");
    assert_eq!((err.line, err.column), (3, 1));
}

/* ===================== Parse Tree ===================== */

#[test]
fn test_parse_tree_find() {
    let tree = parse_tree("flow get agent goal:\n    return 1\n").expect("Should parse");

    assert_eq!(tree.rule, "program");
    let name = tree.find("flow_name").expect("flow_name missing");
    assert_eq!(name.text, "get agent goal");
    assert_eq!(name.position, SourcePosition::new(1, 6));

    let ret = tree.find("return_stmt").expect("return_stmt missing");
    assert_eq!(ret.position, SourcePosition::new(2, 5));
    assert!(ret.text.is_empty());
    assert!(tree.find("for_loop").is_none());
}

#[test]
fn test_parse_tree_serializes() {
    let tree = parse_tree("streetrace v1\n").expect("Should parse");
    let json = serde_json::to_value(&tree).expect("serialize");
    assert_eq!(json["rule"], "program");
    let back: super::ParseNode = serde_json::from_value(json).expect("deserialize");
    assert_eq!(back, tree);
}
