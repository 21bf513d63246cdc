//! Tests for `on failure` blocks, `retry step` and uncaught errors

use serde_json::json;

use super::helpers::{answer, compile, returned, run, start, with_agents};
use crate::config::CompilerConfig;
use crate::executor::{Control, Outcome, Request, Step};

const RECOVERING: &str = r#"
flow main:
    $v = run agent reviewer with "x"
    on failure do
        return "recovered"
    end
    return $v
"#;

#[test]
fn test_failed_invocation_runs_handler() {
    let unit = compile(&with_agents(RECOVERING));
    let mut vm = start(&unit, "main", vec![]);
    run(&mut vm, &unit);

    answer(&mut vm, &unit, Outcome::Failed("agent crashed".into()));
    assert_eq!(returned(&vm), &json!("recovered"));
}

#[test]
fn test_success_skips_handler() {
    let unit = compile(&with_agents(RECOVERING));
    let mut vm = start(&unit, "main", vec![]);
    run(&mut vm, &unit);

    answer(&mut vm, &unit, Outcome::Value(json!("ok")));
    assert_eq!(returned(&vm), &json!("ok"));
    assert!(vm.handlers.is_empty());
    assert!(vm.recovering.is_empty());
}

#[test]
fn test_uncaught_failure_throws() {
    let unit = compile(&with_agents("flow main:\n    $v = run agent reviewer with 1\n"));
    let mut vm = start(&unit, "main", vec![]);
    run(&mut vm, &unit);

    assert_eq!(answer(&mut vm, &unit, Outcome::Failed("boom".into())), Step::Done);
    let Control::Throw(error) = &vm.control else {
        panic!("expected throw, got {:?}", vm.control);
    };
    assert_eq!(error.message, "boom");
    assert_eq!(error.pc, Some(0));
}

/* ===================== Retry ===================== */

const RETRYING: &str = r#"
flow main:
    $v = run agent reviewer with "x"
    on failure do
        log "retrying"
        retry step
    end
    return $v
"#;

#[test]
fn test_retry_step_reenters_region() {
    let unit = compile(&with_agents(RETRYING));
    let mut vm = start(&unit, "main", vec![]);
    run(&mut vm, &unit);

    assert_eq!(answer(&mut vm, &unit, Outcome::Failed("flaky".into())), Step::Suspended);
    assert!(matches!(vm.request(), Some(Request::Invoke { .. })));
    assert_eq!(vm.retries.values().copied().collect::<Vec<_>>(), vec![1]);

    answer(&mut vm, &unit, Outcome::Value(json!("second time")));
    assert_eq!(returned(&vm), &json!("second time"));
    assert_eq!(vm.drain_events().len(), 1);
}

#[test]
fn test_retry_limit_throws() {
    let unit = compile(&with_agents(RETRYING));
    let mut vm = start(&unit, "main", vec![]).with_max_retry_attempts(2);
    run(&mut vm, &unit);

    let mut attempts = 1;
    while answer(&mut vm, &unit, Outcome::Failed("down".into())) == Step::Suspended {
        attempts += 1;
    }

    assert_eq!(attempts, 3);
    let Control::Throw(error) = &vm.control else {
        panic!("expected throw, got {:?}", vm.control);
    };
    assert_eq!(error.message, "retry limit reached after 2 attempts");
}

#[test]
fn test_retry_budget_from_config() {
    let unit = compile(&with_agents(RETRYING));
    let config = CompilerConfig {
        max_retry_attempts: 1,
        ..Default::default()
    };
    let mut vm = start(&unit, "main", vec![]).configured(&config);
    assert_eq!(vm.max_retry_attempts, 1);
    run(&mut vm, &unit);

    let mut attempts = 1;
    while answer(&mut vm, &unit, Outcome::Failed("down".into())) == Step::Suspended {
        attempts += 1;
    }

    assert_eq!(attempts, 2);
    let Control::Throw(error) = &vm.control else {
        panic!("expected throw, got {:?}", vm.control);
    };
    assert_eq!(error.message, "retry limit reached after 1 attempts");
}

/* ===================== Runtime Errors ===================== */

#[test]
fn test_runtime_error_caught_in_region() {
    let unit = compile(
        r#"
flow main:
    $x = 0
    $y = 1 / $x
    on failure do
        $y = -1
    end
    return $y
"#,
    );
    let mut vm = start(&unit, "main", vec![]);
    run(&mut vm, &unit);
    assert_eq!(returned(&vm), &json!(-1));
}

#[test]
fn test_uncaught_runtime_error_carries_pc() {
    let unit = compile("flow main:\n    $x = 0\n    return 1 / $x\n");
    let mut vm = start(&unit, "main", vec![]);
    run(&mut vm, &unit);

    let Control::Throw(error) = &vm.control else {
        panic!("expected throw, got {:?}", vm.control);
    };
    assert_eq!(error.message, "division by zero");
    assert_eq!(error.pc, Some(1));
}

#[test]
fn test_catch_drops_inner_loops() {
    let unit = compile(
        r#"
flow main:
    for $n in [1, 2] do
        $bad = $n / 0
    end
    on failure do
        return "caught"
    end
"#,
    );
    let mut vm = start(&unit, "main", vec![]);
    run(&mut vm, &unit);
    assert_eq!(returned(&vm), &json!("caught"));
    assert!(vm.loops.is_empty());
}

#[test]
fn test_error_in_handler_is_not_caught_by_same_region() {
    let unit = compile(
        r#"
flow main:
    $x = 0
    $y = 1 / $x
    on failure do
        $z = 2 / $x
    end
"#,
    );
    let mut vm = start(&unit, "main", vec![]);
    run(&mut vm, &unit);
    let Control::Throw(error) = &vm.control else {
        panic!("expected throw, got {:?}", vm.control);
    };
    assert_eq!(error.pc, Some(5));
}

#[test]
fn test_handler_can_abort() {
    let unit = compile(&with_agents(
        r#"
flow main:
    $v = run agent reviewer with "x"
    on failure do
        abort "gave up"
    end
"#,
    ));
    let mut vm = start(&unit, "main", vec![]);
    run(&mut vm, &unit);
    answer(&mut vm, &unit, Outcome::Failed("down".into()));
    assert_eq!(vm.control, Control::Abort(Some("gave up".into())));
}
