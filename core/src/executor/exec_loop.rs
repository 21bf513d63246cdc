//! Core execution loop
//!
//! `step` executes the op at `vm.pc`. Ops that need the host (`Invoke`,
//! `CallPrompt`, `Parallel`) leave `pc` in place and set `Control::Suspend`;
//! `resume` stores the host's answer and moves past them.
//!
//! Two kinds of failure are kept apart:
//! - a [`RuntimeError`] belongs to the program and can be caught by an
//!   `on failure` block,
//! - an [`ExecError`] means the VM and the unit disagree and stops the host.

use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument, warn};

use crate::types::ir::{CompiledUnit, InvokeTarget, IrExpr, Op, ParallelBranch, RETURN_SLOT};

use super::expressions::{display, eval_expr, is_truthy, type_name};
use super::vm::{
    Control, Event, HandlerFrame, LoopFrame, Outcome, ParallelRequest, Request, RuntimeError,
    Step, VM,
};
use super::ExecError;

/// Failure while executing one op
enum Fault {
    Runtime(RuntimeError),
    Exec(ExecError),
}

impl From<RuntimeError> for Fault {
    fn from(error: RuntimeError) -> Self {
        Fault::Runtime(error)
    }
}

impl From<ExecError> for Fault {
    fn from(error: ExecError) -> Self {
        Fault::Exec(error)
    }
}

/* ===================== Public API ===================== */

/// Run the VM until it suspends or completes
///
/// After `Step::Done`, inspect `vm.control` for the final state. After
/// `Step::Suspended`, answer `vm.request()` with [`resume`].
#[instrument(skip_all, fields(unit = %vm.unit))]
pub fn run_until_done(vm: &mut VM, compiled: &CompiledUnit) -> Result<Step, ExecError> {
    loop {
        match step(vm, compiled)? {
            Step::Continue => continue,
            other => return Ok(other),
        }
    }
}

/// Execute the op at `vm.pc`
pub fn step(vm: &mut VM, compiled: &CompiledUnit) -> Result<Step, ExecError> {
    match vm.control {
        Control::None => {}
        Control::Suspend(_) => return Ok(Step::Suspended),
        _ => return Ok(Step::Done),
    }

    let ops = compiled
        .ops(&vm.unit)
        .ok_or_else(|| ExecError::UnknownUnit(vm.unit.clone()))?;

    if vm.pc == ops.len() {
        // Falling off the end returns null
        vm.control = Control::Return(JsonValue::Null);
        return Ok(Step::Done);
    }
    let op = ops.get(vm.pc).ok_or(ExecError::ProgramCounter(vm.pc))?;

    match execute(vm, op, compiled) {
        Ok(()) => {}
        Err(Fault::Runtime(error)) => vm.throw(error),
        Err(Fault::Exec(error)) => return Err(error),
    }

    Ok(match vm.control {
        Control::None => Step::Continue,
        Control::Suspend(_) => Step::Suspended,
        _ => Step::Done,
    })
}

/// Answer the pending request and move past the suspending op
///
/// A `Failed` outcome is raised as a runtime error at the suspended op, so
/// an enclosing `on failure` block sees it like any other error.
#[instrument(skip_all, fields(unit = %vm.unit, pc = vm.pc))]
pub fn resume(vm: &mut VM, compiled: &CompiledUnit, outcome: Outcome) -> Result<(), ExecError> {
    if !vm.is_suspended() {
        return Err(ExecError::NotSuspended);
    }
    let ops = compiled
        .ops(&vm.unit)
        .ok_or_else(|| ExecError::UnknownUnit(vm.unit.clone()))?;
    let op = ops.get(vm.pc).ok_or(ExecError::ProgramCounter(vm.pc))?;

    let request = std::mem::replace(&mut vm.control, Control::None);

    if let Outcome::Failed(message) = &outcome {
        warn!(error = %message, "invocation failed");
        vm.escalated = false;
        vm.throw(RuntimeError::new(message.clone()));
        return Ok(());
    }

    match store_outcome(vm, op, compiled, outcome) {
        Ok(()) => vm.pc += 1,
        Err(Fault::Runtime(error)) => vm.throw(error),
        Err(Fault::Exec(error)) => {
            // Still waiting; the host may answer again
            vm.control = request;
            return Err(error);
        }
    }
    Ok(())
}

/* ===================== Resume ===================== */

fn store_outcome(
    vm: &mut VM,
    op: &Op,
    compiled: &CompiledUnit,
    outcome: Outcome,
) -> Result<(), Fault> {
    match (op, outcome) {
        (Op::Invoke { target, assign_to, .. }, Outcome::Value(value)) => {
            vm.escalated = agent_escalates(compiled, target, &value);
            assign(vm, assign_to.as_deref(), value);
        }
        (Op::Invoke { target, assign_to, .. }, Outcome::Escalated(value)) => {
            debug!(agent = target.name(), "escalated");
            vm.escalated = true;
            assign(vm, assign_to.as_deref(), value);
        }

        (Op::CallPrompt { prompt, assign_to, .. }, Outcome::Value(value)) => {
            store_prompt_result(vm, compiled, prompt, assign_to.as_deref(), value, false)?;
        }
        (Op::CallPrompt { prompt, assign_to, .. }, Outcome::Escalated(value)) => {
            store_prompt_result(vm, compiled, prompt, assign_to.as_deref(), value, true)?;
        }

        (Op::Parallel { branches }, Outcome::Parallel(mut results)) => {
            vm.escalated = false;
            for (index, branch) in branches.iter().enumerate() {
                let key = branch_key(index, branch);
                let value = results.swap_remove(&key).ok_or_else(|| {
                    RuntimeError::new(format!("parallel result missing for `{}`", key))
                })?;
                assign(vm, branch.assign_to.as_deref(), value);
            }
        }

        (op, outcome) => {
            return Err(ExecError::UnexpectedOutcome {
                op: op_name(op),
                outcome: outcome_name(&outcome),
            }
            .into())
        }
    }
    Ok(())
}

/// Result key of a parallel branch: its target variable, else its position
fn branch_key(index: usize, branch: &ParallelBranch) -> String {
    branch
        .assign_to
        .clone()
        .unwrap_or_else(|| index.to_string())
}

/// Whether an agent's output meets the `escalate if` condition of its
/// instruction or default prompt
fn agent_escalates(compiled: &CompiledUnit, target: &InvokeTarget, output: &JsonValue) -> bool {
    let InvokeTarget::Agent(name) = target else {
        return false;
    };
    let Some(agent) = compiled.agents.get(name) else {
        return false;
    };
    let text = display(output);
    std::iter::once(&agent.instruction)
        .chain(agent.prompt.as_ref())
        .filter_map(|prompt| compiled.prompts.get(prompt))
        .filter_map(|spec| spec.escalation.as_ref())
        .any(|condition| condition.matches(&text))
}

/// Prompt output: escalation condition, then `expecting` schema
fn store_prompt_result(
    vm: &mut VM,
    compiled: &CompiledUnit,
    prompt: &str,
    assign_to: Option<&str>,
    mut value: JsonValue,
    escalated: bool,
) -> Result<(), RuntimeError> {
    let spec = compiled
        .prompts
        .get(prompt)
        .ok_or_else(|| RuntimeError::new(format!("unknown prompt `{}`", prompt)))?;

    vm.escalated = escalated
        || spec
            .escalation
            .as_ref()
            .map_or(false, |condition| condition.matches(&display(&value)));

    if let Some(schema) = &spec.expecting {
        // Models often answer with JSON text
        if let JsonValue::String(text) = &value {
            if let Ok(parsed) = serde_json::from_str::<JsonValue>(text) {
                value = parsed;
            }
        }
        compiled.schemas.validate(schema, &value).map_err(|violation| {
            RuntimeError::new(format!(
                "output of prompt `{}` does not match `{}`: {}",
                prompt, schema, violation
            ))
        })?;
    }
    assign(vm, assign_to, value);
    Ok(())
}

fn assign(vm: &mut VM, target: Option<&str>, value: JsonValue) {
    if let Some(name) = target {
        vm.env.insert(name.to_string(), value);
    }
}

/* ===================== Operations ===================== */

fn execute(vm: &mut VM, op: &Op, compiled: &CompiledUnit) -> Result<(), Fault> {
    match op {
        Op::Assign {
            target,
            path,
            value,
        } => {
            let value = eval_expr(value, &vm.env, compiled)?;
            assign_path(vm, target, path, value)?;
            vm.pc += 1;
        }

        Op::Invoke { target, input, .. } => {
            let input = eval_all(vm, input, compiled)?;
            debug!(agent = target.name(), "suspend: invoke");
            vm.control = Control::Suspend(Request::Invoke {
                target: target.clone(),
                input,
            });
        }

        Op::CallPrompt {
            prompt,
            model,
            input,
            ..
        } => {
            let input = eval_all(vm, input, compiled)?;
            let model = model
                .clone()
                .or_else(|| compiled.prompts.get(prompt).and_then(|p| p.model.clone()));
            debug!(prompt = %prompt, "suspend: call prompt");
            vm.control = Control::Suspend(Request::CallPrompt {
                prompt: prompt.clone(),
                model,
                input,
            });
        }

        Op::Parallel { branches } => {
            let branches = branches
                .iter()
                .enumerate()
                .map(|(index, branch)| {
                    Ok(ParallelRequest {
                        key: branch_key(index, branch),
                        target: branch.target.clone(),
                        input: eval_all(vm, &branch.input, compiled)?,
                    })
                })
                .collect::<Result<Vec<_>, RuntimeError>>()?;
            debug!(branches = branches.len(), "suspend: parallel");
            vm.control = Control::Suspend(Request::Parallel { branches });
        }

        Op::BranchUnlessEscalated { target } => {
            if vm.escalated {
                vm.pc += 1;
            } else {
                vm.pc = *target;
            }
        }

        Op::Return { value } => {
            let value = eval_expr(value, &vm.env, compiled)?;
            vm.env.insert(RETURN_SLOT.to_string(), value.clone());
            vm.control = Control::Return(value);
        }

        Op::Push { target, value } => {
            let value = eval_expr(value, &vm.env, compiled)?;
            match vm.env.get_mut(target) {
                Some(JsonValue::Array(items)) => items.push(value),
                Some(other) => {
                    return Err(RuntimeError::new(format!(
                        "cannot push to `${}`: it is a {}",
                        target,
                        type_name(other)
                    ))
                    .into())
                }
                None => {
                    return Err(
                        RuntimeError::new(format!("undefined variable `${}`", target)).into(),
                    )
                }
            }
            vm.pc += 1;
        }

        Op::Jump { target } => vm.pc = *target,

        Op::JumpUnless { condition, target } => {
            if is_truthy(&eval_expr(condition, &vm.env, compiled)?) {
                vm.pc += 1;
            } else {
                vm.pc = *target;
            }
        }

        Op::Match {
            subject,
            cases,
            default,
        } => {
            let subject = display(&eval_expr(subject, &vm.env, compiled)?);
            vm.pc = cases
                .iter()
                .find(|(pattern, _)| *pattern == subject)
                .map_or(*default, |(_, target)| *target);
        }

        Op::IterStart { iterable } => {
            let items = match eval_expr(iterable, &vm.env, compiled)? {
                JsonValue::Array(items) => items,
                other => {
                    return Err(RuntimeError::new(format!(
                        "cannot iterate over {}",
                        type_name(&other)
                    ))
                    .into())
                }
            };
            vm.loops.push(LoopFrame::Iter { items, index: 0 });
            vm.pc += 1;
        }

        Op::IterNext { variable, exit } => {
            let Some(LoopFrame::Iter { items, index }) = vm.loops.last_mut() else {
                return Err(ExecError::CorruptState("`for` head without a loop frame").into());
            };
            match items.get(*index).cloned() {
                Some(item) => {
                    *index += 1;
                    vm.env.insert(variable.clone(), item);
                    vm.pc += 1;
                }
                None => {
                    vm.loops.pop();
                    vm.pc = *exit;
                }
            }
        }

        Op::LoopStart { max } => {
            vm.loops.push(LoopFrame::Count {
                max: *max,
                count: 0,
            });
            vm.pc += 1;
        }

        Op::LoopNext { exit } => {
            let Some(LoopFrame::Count { max, count }) = vm.loops.last_mut() else {
                return Err(ExecError::CorruptState("`loop` head without a loop frame").into());
            };
            if max.map_or(false, |max| *count >= max) {
                vm.loops.pop();
                vm.pc = *exit;
            } else {
                *count += 1;
                vm.pc += 1;
            }
        }

        Op::TryBegin { handler } => {
            vm.handlers.push(HandlerFrame {
                handler: *handler,
                try_pc: vm.pc,
                loop_depth: vm.loops.len(),
                recovering_depth: vm.recovering.len(),
            });
            vm.pc += 1;
        }

        Op::TryEnd => {
            vm.handlers
                .pop()
                .ok_or(ExecError::CorruptState("`TryEnd` without a protected region"))?;
            vm.pc += 1;
        }

        Op::EndHandler => {
            vm.recovering
                .pop()
                .ok_or(ExecError::CorruptState("`EndHandler` outside of a failure handler"))?;
            vm.pc += 1;
        }

        Op::RetryStep => {
            let frame = *vm
                .recovering
                .last()
                .ok_or(ExecError::CorruptState("`retry step` outside of a failure handler"))?;
            let used = vm.retries.entry(frame.try_pc).or_insert(0);
            if *used >= vm.max_retry_attempts {
                return Err(RuntimeError::new(format!(
                    "retry limit reached after {} attempts",
                    used
                ))
                .into());
            }
            *used += 1;
            debug!(attempt = *used, region = frame.try_pc, "retry step");
            vm.recovering.pop();
            vm.loops.truncate(frame.loop_depth);
            vm.pc = frame.try_pc;
        }

        Op::Log { message } => {
            let message = display(&eval_expr(message, &vm.env, compiled)?);
            info!(text = %message, "log");
            vm.outbox.push(Event::Log { message });
            vm.pc += 1;
        }

        Op::Notify { message } => {
            let message = display(&eval_expr(message, &vm.env, compiled)?);
            info!(text = %message, "notify");
            vm.outbox.push(Event::Notify { message });
            vm.pc += 1;
        }

        Op::Escalate { target, message } => {
            let message = match message {
                Some(expr) => Some(display(&eval_expr(expr, &vm.env, compiled)?)),
                None => None,
            };
            info!(to = target.as_deref(), "escalate");
            vm.outbox.push(Event::Escalate {
                target: target.clone(),
                message,
            });
            vm.pc += 1;
        }

        Op::Abort { message } => {
            info!(reason = message.as_deref(), "abort");
            vm.control = Control::Abort(message.clone());
        }
    }
    Ok(())
}

fn eval_all(
    vm: &VM,
    exprs: &[IrExpr],
    compiled: &CompiledUnit,
) -> Result<Vec<JsonValue>, RuntimeError> {
    exprs
        .iter()
        .map(|expr| eval_expr(expr, &vm.env, compiled))
        .collect()
}

/// `$target.a.b = value`, creating intermediate objects
fn assign_path(
    vm: &mut VM,
    target: &str,
    path: &[String],
    value: JsonValue,
) -> Result<(), RuntimeError> {
    let Some((last, parents)) = path.split_last() else {
        vm.env.insert(target.to_string(), value);
        return Ok(());
    };

    let mut slot = vm
        .env
        .entry(target.to_string())
        .or_insert_with(|| JsonValue::Object(Default::default()));
    for segment in parents {
        slot = object_mut(slot, target, segment)?
            .entry(segment.clone())
            .or_insert_with(|| JsonValue::Object(Default::default()));
    }
    object_mut(slot, target, last)?.insert(last.clone(), value);
    Ok(())
}

fn object_mut<'a>(
    value: &'a mut JsonValue,
    target: &str,
    property: &str,
) -> Result<&'a mut serde_json::Map<String, JsonValue>, RuntimeError> {
    let kind = type_name(value);
    value.as_object_mut().ok_or_else(|| {
        RuntimeError::new(format!(
            "cannot set `{}` on `${}`: it is a {}",
            property, target, kind
        ))
    })
}

/* ===================== Names ===================== */

fn op_name(op: &Op) -> &'static str {
    match op {
        Op::Invoke { .. } => "Invoke",
        Op::CallPrompt { .. } => "CallPrompt",
        Op::Parallel { .. } => "Parallel",
        _ => "non-suspending op",
    }
}

fn outcome_name(outcome: &Outcome) -> &'static str {
    match outcome {
        Outcome::Value(_) => "Value",
        Outcome::Escalated(_) => "Escalated",
        Outcome::Parallel(_) => "Parallel",
        Outcome::Failed(_) => "Failed",
    }
}
