//! Lowered representation
//!
//! A [`CompiledUnit`] holds the definitions a host runtime needs plus one flat
//! operation list per flow and per event handler. Jump targets are indices
//! into the list they appear in. Execution suspends at `Invoke`, `CallPrompt`
//! and `Parallel`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

use super::ast::{
    BackoffKind, BinaryOperator, EscalationCondition, EventTiming, EventType, ToolAuth, ToolKind,
    UnaryOperator,
};
use super::schema::SchemaRegistry;
use super::template::FormatPart;

/// Reserved environment slot written by `Return`
pub const RETURN_SLOT: &str = "__return__";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledUnit {
    pub source_name: String,
    pub version: Option<String>,
    /// SHA-256 of the source text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<ImportSpec>,
    pub models: IndexMap<String, ModelSpec>,
    pub schemas: SchemaRegistry,
    pub tools: IndexMap<String, ToolSpec>,
    pub prompts: IndexMap<String, PromptSpec>,
    pub agents: IndexMap<String, AgentSpec>,
    pub retry_policies: IndexMap<String, RetryPolicy>,
    pub timeout_policies: IndexMap<String, TimeoutPolicy>,
    pub flows: IndexMap<String, FlowUnit>,
    pub handlers: Vec<HandlerUnit>,
}

impl CompiledUnit {
    pub fn new(source_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            version: None,
            source_hash: None,
            imports: Vec::new(),
            models: IndexMap::new(),
            schemas: SchemaRegistry::new(),
            tools: IndexMap::new(),
            prompts: IndexMap::new(),
            agents: IndexMap::new(),
            retry_policies: IndexMap::new(),
            timeout_policies: IndexMap::new(),
            flows: IndexMap::new(),
            handlers: Vec::new(),
        }
    }

    pub fn flow(&self, name: &str) -> Option<&FlowUnit> {
        self.flows.get(name)
    }

    pub fn handler(&self, name: &str) -> Option<&HandlerUnit> {
        self.handlers.iter().find(|h| h.name == name)
    }

    /// Operations of a flow or handler
    pub fn ops(&self, unit: &UnitRef) -> Option<&[Op]> {
        match unit {
            UnitRef::Flow(name) => self.flow(name).map(|f| f.ops.as_slice()),
            UnitRef::Handler(name) => self.handler(name).map(|h| h.ops.as_slice()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSpec {
    pub name: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelSpec {
    /// `provider/model` shorthand
    pub spec: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub properties: IndexMap<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub kind: ToolKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<ToolAuth>,
}

/// A merged prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptSpec {
    pub template: String,
    pub parts: Vec<FormatPart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Schema name the output must satisfy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expecting: Option<String>,
    /// Variable name (no sigil) whose history the call inherits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inherit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation: Option<EscalationCondition>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AgentSpec {
    pub instruction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_agents: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agent_tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Variable name (no sigil) receiving results of target-less runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub produces: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub count: u32,
    pub backoff: BackoffKind,
}

impl RetryPolicy {
    /// Delay before retry `attempt` (1-based) for a given base delay
    pub fn delay_millis(&self, attempt: u32, base_millis: u64) -> u64 {
        let attempt = u64::from(attempt.max(1));
        match self.backoff {
            BackoffKind::Fixed => base_millis,
            BackoffKind::Linear => base_millis.saturating_mul(attempt),
            BackoffKind::Exponential => {
                let factor = 1u64.checked_shl((attempt - 1) as u32).unwrap_or(u64::MAX);
                base_millis.saturating_mul(factor)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutPolicy {
    pub millis: u64,
}

/// Addresses one operation list inside a unit
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum UnitRef {
    Flow(String),
    Handler(String),
}

impl fmt::Display for UnitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitRef::Flow(name) => write!(f, "flow `{}`", name),
            UnitRef::Handler(name) => write!(f, "handler `{}`", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowUnit {
    pub name: String,
    /// Parameter names without sigil
    pub params: Vec<String>,
    pub ops: Vec<Op>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerUnit {
    /// `on start`, with `#2`, `#3`... appended for repeated handlers
    pub name: String,
    pub timing: EventTiming,
    pub event: EventType,
    pub ops: Vec<Op>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum InvokeTarget {
    Agent(String),
    Flow(String),
}

impl InvokeTarget {
    pub fn name(&self) -> &str {
        match self {
            InvokeTarget::Agent(name) | InvokeTarget::Flow(name) => name,
        }
    }
}

/// One member of a `Parallel` operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelBranch {
    pub target: InvokeTarget,
    pub input: Vec<IrExpr>,
    pub assign_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Op {
    /// `target.path... = value`; an empty path assigns the variable
    Assign {
        target: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        path: Vec<String>,
        value: IrExpr,
    },
    Invoke {
        target: InvokeTarget,
        input: Vec<IrExpr>,
        assign_to: Option<String>,
    },
    CallPrompt {
        prompt: String,
        model: Option<String>,
        input: Vec<IrExpr>,
        assign_to: Option<String>,
    },
    /// Continue at `target` unless the last invocation escalated
    BranchUnlessEscalated { target: usize },
    Return { value: IrExpr },
    Push { target: String, value: IrExpr },
    Jump { target: usize },
    JumpUnless { condition: IrExpr, target: usize },
    Match {
        subject: IrExpr,
        cases: Vec<(String, usize)>,
        default: usize,
    },
    IterStart { iterable: IrExpr },
    /// Loop head: binds the next item or exits
    IterNext { variable: String, exit: usize },
    LoopStart { max: Option<u64> },
    LoopNext { exit: usize },
    Parallel { branches: Vec<ParallelBranch> },
    /// Protect the following region; errors jump to `handler`
    TryBegin { handler: usize },
    TryEnd,
    /// Leaves a failure handler body
    EndHandler,
    /// Re-enter the protected region of the innermost failure handler
    RetryStep,
    Log { message: IrExpr },
    Notify { message: IrExpr },
    Escalate {
        target: Option<String>,
        message: Option<IrExpr>,
    },
    Abort { message: Option<String> },
}

impl Op {
    pub fn suspends(&self) -> bool {
        matches!(self, Op::Invoke { .. } | Op::CallPrompt { .. } | Op::Parallel { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "e")]
pub enum IrExpr {
    Const {
        value: JsonValue,
    },
    /// Variable name without sigil
    Var {
        name: String,
    },
    Property {
        object: Box<IrExpr>,
        property: String,
    },
    Binary {
        op: BinaryOperator,
        left: Box<IrExpr>,
        right: Box<IrExpr>,
    },
    Unary {
        op: UnaryOperator,
        operand: Box<IrExpr>,
    },
    Call {
        name: String,
        args: Vec<IrExpr>,
    },
    List {
        items: Vec<IrExpr>,
    },
    Object {
        entries: Vec<(String, IrExpr)>,
    },
    Format {
        parts: Vec<FormatPart>,
    },
    /// Render a prompt template against the current environment
    RenderPrompt {
        prompt: String,
    },
}

impl IrExpr {
    pub fn constant(value: impl Into<JsonValue>) -> Self {
        IrExpr::Const {
            value: value.into(),
        }
    }

    pub fn var(name: impl Into<String>) -> Self {
        IrExpr::Var { name: name.into() }
    }
}
