//! Virtual Machine state
//!
//! The VM holds everything needed to run one flow or handler and to pick it
//! up again after a suspension. It never holds the [`CompiledUnit`]; the
//! caller passes it to every step, so a suspended VM serializes on its own.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

use crate::config::CompilerConfig;
use crate::types::ir::{CompiledUnit, InvokeTarget, UnitRef};

use super::ExecError;

/// Retry budget per protected region when no configuration says otherwise
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 3;

/* ===================== Control Flow ===================== */

/// Control flow state
///
/// Anything other than `None` stops the step loop. `Suspend` is the only
/// state [`resume`](super::resume) accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Control {
    None,
    Suspend(Request),
    Return(JsonValue),
    Throw(RuntimeError),
    Abort(Option<String>),
}

/// Work the host must do before the VM can continue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Request {
    Invoke {
        target: InvokeTarget,
        input: Vec<JsonValue>,
    },
    CallPrompt {
        prompt: String,
        model: Option<String>,
        input: Vec<JsonValue>,
    },
    /// Run every branch; reply with [`Outcome::Parallel`] keyed by each
    /// branch's `key`
    Parallel { branches: Vec<ParallelRequest> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelRequest {
    /// Target variable (sigil stripped), or the branch index when the run
    /// has no target
    pub key: String,
    pub target: InvokeTarget,
    pub input: Vec<JsonValue>,
}

/// Host reply to a [`Request`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Outcome {
    Value(JsonValue),
    /// The agent handed control back; the value is its last output
    Escalated(JsonValue),
    Parallel(IndexMap<String, JsonValue>),
    Failed(String),
}

/// Error raised by the program itself. Failure handlers can catch it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct RuntimeError {
    pub message: String,
    /// Index of the op that raised it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pc: Option<usize>,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            pc: None,
        }
    }
}

/// Side effects that do not suspend execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Log {
        message: String,
    },
    Notify {
        message: String,
    },
    Escalate {
        target: Option<String>,
        message: Option<String>,
    },
}

/* ===================== Frames ===================== */

/// State of an active `for` or `loop`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum LoopFrame {
    Iter { items: Vec<JsonValue>, index: usize },
    Count { max: Option<u64>, count: u64 },
}

/// An active protected region, or a failure handler that is running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerFrame {
    /// First op of the failure handler body
    pub handler: usize,
    /// The `TryBegin` that opened the region
    pub try_pc: usize,
    /// Loop frames below the region
    pub loop_depth: usize,
    /// Running handlers below the region
    pub recovering_depth: usize,
}

/* ===================== VM ===================== */

/// Virtual Machine state
///
/// This contains everything needed to execute (and serialize/resume) one
/// operation list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VM {
    pub unit: UnitRef,
    pub pc: usize,
    /// Variables, sigil stripped
    pub env: IndexMap<String, JsonValue>,
    pub loops: Vec<LoopFrame>,
    /// Protected regions, innermost last
    pub handlers: Vec<HandlerFrame>,
    /// Failure handlers currently running, innermost last
    pub recovering: Vec<HandlerFrame>,
    /// Retries used per `TryBegin` index
    pub retries: BTreeMap<usize, u32>,
    /// Whether the last resumed invocation escalated
    pub escalated: bool,
    pub control: Control,
    /// Events not yet taken by the host
    pub outbox: Vec<Event>,
    pub max_retry_attempts: u32,
}

impl VM {
    /// Create a VM positioned at the first op of `unit`
    pub fn new(unit: UnitRef, env: IndexMap<String, JsonValue>) -> Self {
        VM {
            unit,
            pc: 0,
            env,
            loops: Vec::new(),
            handlers: Vec::new(),
            recovering: Vec::new(),
            retries: BTreeMap::new(),
            escalated: false,
            control: Control::None,
            outbox: Vec::new(),
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
        }
    }

    /// VM for a flow, binding `args` to its parameters in order.
    ///
    /// `globals` (built-ins such as `input_prompt`, or whatever an `on start`
    /// handler assigned) are visible to the flow; parameters shadow them.
    pub fn for_flow(
        compiled: &CompiledUnit,
        name: &str,
        args: Vec<JsonValue>,
        globals: IndexMap<String, JsonValue>,
    ) -> Result<Self, ExecError> {
        let flow = compiled
            .flow(name)
            .ok_or_else(|| ExecError::UnknownUnit(UnitRef::Flow(name.to_string())))?;
        if args.len() != flow.params.len() {
            return Err(ExecError::Arity {
                flow: name.to_string(),
                expected: flow.params.len(),
                got: args.len(),
            });
        }

        let mut env = globals;
        for (param, value) in flow.params.iter().zip(args) {
            env.insert(param.clone(), value);
        }
        Ok(VM::new(UnitRef::Flow(name.to_string()), env))
    }

    pub fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts;
        self
    }

    /// Apply the executor settings from `config`
    pub fn configured(self, config: &CompilerConfig) -> Self {
        self.with_max_retry_attempts(config.max_retry_attempts)
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self.control, Control::Suspend(_))
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.control,
            Control::Return(_) | Control::Throw(_) | Control::Abort(_)
        )
    }

    /// Pending request, if suspended
    pub fn request(&self) -> Option<&Request> {
        match &self.control {
            Control::Suspend(request) => Some(request),
            _ => None,
        }
    }

    /// Take the queued events, leaving the outbox empty
    pub fn drain_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.outbox)
    }

    /// Raise a runtime error at the current op.
    ///
    /// The innermost protected region catches it: loops opened inside the
    /// region are dropped and execution continues at its failure handler.
    /// Without one, the VM stops with `Control::Throw`.
    pub(super) fn throw(&mut self, mut error: RuntimeError) {
        if error.pc.is_none() {
            error.pc = Some(self.pc);
        }
        match self.handlers.pop() {
            Some(frame) => {
                tracing::debug!(pc = self.pc, handler = frame.handler, error = %error, "caught");
                self.loops.truncate(frame.loop_depth);
                self.recovering.truncate(frame.recovering_depth);
                self.recovering.push(frame);
                self.pc = frame.handler;
            }
            None => self.control = Control::Throw(error),
        }
    }
}

/* ===================== Step Result ===================== */

/// Result of executing one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Continue to next step
    Continue,
    /// Waiting on the host; see [`VM::request`]
    Suspended,
    /// Execution complete; inspect `vm.control`
    Done,
}
