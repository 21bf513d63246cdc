//! Abstract Syntax Tree node types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name given to an agent declared as `agent:` without a name.
pub const DEFAULT_AGENT_NAME: &str = "default";

/// Source location for diagnostics and the source map (1-indexed)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct SourcePosition {
    pub line: usize,
    pub column: usize,
}

impl SourcePosition {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Strip the `$` sigil from a variable name
pub fn strip_sigil(name: &str) -> &str {
    name.strip_prefix('$').unwrap_or(name)
}

/* ===================== Program ===================== */

/// A parsed source file: top-level items in source order
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    pub items: Vec<TopLevel>,
}

impl Program {
    pub fn version(&self) -> Option<&VersionDecl> {
        self.items.iter().find_map(|item| match item {
            TopLevel::Version(decl) => Some(decl),
            _ => None,
        })
    }

    pub fn imports(&self) -> impl Iterator<Item = &ImportDef> {
        self.items.iter().filter_map(|item| match item {
            TopLevel::Import(def) => Some(def),
            _ => None,
        })
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelDef> {
        self.items.iter().filter_map(|item| match item {
            TopLevel::Model(def) => Some(def),
            _ => None,
        })
    }

    pub fn schemas(&self) -> impl Iterator<Item = &SchemaDef> {
        self.items.iter().filter_map(|item| match item {
            TopLevel::Schema(def) => Some(def),
            _ => None,
        })
    }

    pub fn tools(&self) -> impl Iterator<Item = &ToolDef> {
        self.items.iter().filter_map(|item| match item {
            TopLevel::Tool(def) => Some(def),
            _ => None,
        })
    }

    pub fn agents(&self) -> impl Iterator<Item = &AgentDef> {
        self.items.iter().filter_map(|item| match item {
            TopLevel::Agent(def) => Some(def),
            _ => None,
        })
    }

    pub fn flows(&self) -> impl Iterator<Item = &FlowDef> {
        self.items.iter().filter_map(|item| match item {
            TopLevel::Flow(def) => Some(def),
            _ => None,
        })
    }

    pub fn handlers(&self) -> impl Iterator<Item = &EventHandler> {
        self.items.iter().filter_map(|item| match item {
            TopLevel::Handler(def) => Some(def),
            _ => None,
        })
    }
}

/// Top-level item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum TopLevel {
    Version(VersionDecl),
    Import(ImportDef),
    Model(ModelDef),
    Schema(SchemaDef),
    Tool(ToolDef),
    RetryPolicy(RetryPolicyDef),
    TimeoutPolicy(TimeoutPolicyDef),
    Prompt(PromptDef),
    Agent(AgentDef),
    Flow(FlowDef),
    Handler(EventHandler),
}

impl TopLevel {
    pub fn position(&self) -> Option<SourcePosition> {
        match self {
            TopLevel::Version(d) => d.position,
            TopLevel::Import(d) => d.position,
            TopLevel::Model(d) => d.position,
            TopLevel::Schema(d) => d.position,
            TopLevel::Tool(d) => d.position,
            TopLevel::RetryPolicy(d) => d.position,
            TopLevel::TimeoutPolicy(d) => d.position,
            TopLevel::Prompt(d) => d.position,
            TopLevel::Agent(d) => d.position,
            TopLevel::Flow(d) => d.position,
            TopLevel::Handler(d) => d.position,
        }
    }
}

/* ===================== Definitions ===================== */

/// `streetrace v1`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionDecl {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<SourcePosition>,
}

/// `import helpers from "./helpers.sr"`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportDef {
    pub name: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<SourcePosition>,
}

/// `model main = provider/model` or a block of `key: value` properties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDef {
    pub name: String,
    pub spec: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<Property>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<SourcePosition>,
}

/// `key: value` line inside a model or tool block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub key: String,
    pub value: Literal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<SourcePosition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDef {
    pub name: String,
    pub fields: Vec<SchemaField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<SourcePosition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    pub field_type: TypeExpr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<SourcePosition>,
}

/// `string`, `list[int]`, `float[]`, `bool?`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeExpr {
    pub base_type: String,
    pub is_list: bool,
    pub is_optional: bool,
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_list {
            write!(f, "list[{}]", self.base_type)?;
        } else {
            write!(f, "{}", self.base_type)?;
        }
        if self.is_optional {
            write!(f, "?")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    Mcp,
    Builtin,
}

/// `with auth bearer "..."`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolAuth {
    pub scheme: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    /// `None` only for block definitions without a `type:` line
    pub kind: Option<ToolKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<ToolAuth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<SourcePosition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Linear,
    Exponential,
}

/// `retry standard = 3 times, exponential backoff`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicyDef {
    pub name: String,
    pub count: u32,
    pub backoff: BackoffKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<SourcePosition>,
}

/// `timeout short = 30 seconds`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutPolicyDef {
    pub name: String,
    pub millis: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<SourcePosition>,
}

/// Comparison used by `escalate if`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOp {
    /// `~` - case and punctuation insensitive equality
    Normalized,
    Equals,
    NotEquals,
    Contains,
}

impl fmt::Display for ConditionOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            ConditionOp::Normalized => "~",
            ConditionOp::Equals => "==",
            ConditionOp::NotEquals => "!=",
            ConditionOp::Contains => "contains",
        };
        f.write_str(symbol)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationCondition {
    pub op: ConditionOp,
    pub value: String,
}

impl EscalationCondition {
    /// Whether an agent or prompt output triggers escalation
    pub fn matches(&self, output: &str) -> bool {
        match self.op {
            ConditionOp::Normalized => normalize(output) == normalize(&self.value),
            ConditionOp::Equals => output == self.value,
            ConditionOp::NotEquals => output != self.value,
            ConditionOp::Contains => output.contains(&self.value),
        }
    }
}

/// Lowercase, drop punctuation, collapse whitespace
fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

impl fmt::Display for EscalationCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} \"{}\"", self.op, self.value)
    }
}

/// A prompt declaration or body.
///
/// The same name may appear several times; the analyzer merges them.
/// `body` is empty for declaration-only occurrences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptDef {
    pub name: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expecting: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inherit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation: Option<EscalationCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<SourcePosition>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AgentDef {
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,
    pub instruction: Option<String>,
    /// Default prompt used as input when a `run` gives none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_agents: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agent_tools: Vec<String>,
    /// Variable (with sigil) that receives the result when `run` has no target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub produces: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<SourcePosition>,
}

impl AgentDef {
    pub fn resolved_name(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_AGENT_NAME)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDef {
    /// Words separated by single spaces (`get agent goal`)
    pub name: String,
    /// Parameter names with sigil
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<SourcePosition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventTiming {
    On,
    After,
}

impl fmt::Display for EventTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventTiming::On => f.write_str("on"),
            EventTiming::After => f.write_str("after"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    Start,
    Input,
    Output,
    ToolCall,
    ToolResult,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventType::Start => "start",
            EventType::Input => "input",
            EventType::Output => "output",
            EventType::ToolCall => "tool-call",
            EventType::ToolResult => "tool-result",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventHandler {
    pub timing: EventTiming,
    pub event: EventType,
    pub body: Vec<Stmt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<SourcePosition>,
}

impl EventHandler {
    /// `on start`, `after tool-call`, ...
    pub fn label(&self) -> String {
        format!("{} {}", self.timing, self.event)
    }

    pub fn is_on_start(&self) -> bool {
        self.timing == EventTiming::On && self.event == EventType::Start
    }
}

/* ===================== Statements ===================== */

/// Statement AST node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Stmt {
    Assignment {
        target: String,
        value: Expr,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<SourcePosition>,
    },
    /// `$obj.a.b = value`
    PropertyAssignment {
        target: String,
        path: Vec<String>,
        value: Expr,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<SourcePosition>,
    },
    Run(RunStmt),
    Call(CallStmt),
    Return {
        value: Expr,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<SourcePosition>,
    },
    Push {
        value: Expr,
        target: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<SourcePosition>,
    },
    ForLoop {
        variable: String,
        iterable: Expr,
        body: Vec<Stmt>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<SourcePosition>,
    },
    IfBlock {
        condition: Expr,
        body: Vec<Stmt>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        else_body: Option<Vec<Stmt>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<SourcePosition>,
    },
    MatchBlock {
        subject: Expr,
        cases: Vec<MatchCase>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        else_body: Option<Vec<Stmt>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<SourcePosition>,
    },
    /// Only `Run` children are lowerable
    ParallelBlock {
        body: Vec<Stmt>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<SourcePosition>,
    },
    /// `on failure do ... end`
    FailureBlock {
        body: Vec<Stmt>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<SourcePosition>,
    },
    LoopBlock {
        max_iterations: Option<u64>,
        body: Vec<Stmt>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<SourcePosition>,
    },
    Log {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<SourcePosition>,
    },
    Notify {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<SourcePosition>,
    },
    Escalate {
        target: Option<String>,
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<SourcePosition>,
    },
    Continue {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<SourcePosition>,
    },
    Abort {
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<SourcePosition>,
    },
    RetryStep {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<SourcePosition>,
    },
}

impl Stmt {
    pub fn position(&self) -> Option<SourcePosition> {
        match self {
            Stmt::Run(run) => run.position,
            Stmt::Call(call) => call.position,
            Stmt::Assignment { position, .. }
            | Stmt::PropertyAssignment { position, .. }
            | Stmt::Return { position, .. }
            | Stmt::Push { position, .. }
            | Stmt::ForLoop { position, .. }
            | Stmt::IfBlock { position, .. }
            | Stmt::MatchBlock { position, .. }
            | Stmt::ParallelBlock { position, .. }
            | Stmt::FailureBlock { position, .. }
            | Stmt::LoopBlock { position, .. }
            | Stmt::Log { position, .. }
            | Stmt::Notify { position, .. }
            | Stmt::Escalate { position, .. }
            | Stmt::Continue { position }
            | Stmt::Abort { position, .. }
            | Stmt::RetryStep { position } => *position,
        }
    }

    /// Short name used in diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            Stmt::Assignment { .. } => "assignment",
            Stmt::PropertyAssignment { .. } => "property assignment",
            Stmt::Run(_) => "run",
            Stmt::Call(_) => "call",
            Stmt::Return { .. } => "return",
            Stmt::Push { .. } => "push",
            Stmt::ForLoop { .. } => "for",
            Stmt::IfBlock { .. } => "if",
            Stmt::MatchBlock { .. } => "match",
            Stmt::ParallelBlock { .. } => "parallel",
            Stmt::FailureBlock { .. } => "on failure",
            Stmt::LoopBlock { .. } => "loop",
            Stmt::Log { .. } => "log",
            Stmt::Notify { .. } => "notify",
            Stmt::Escalate { .. } => "escalate",
            Stmt::Continue { .. } => "continue",
            Stmt::Abort { .. } => "abort",
            Stmt::RetryStep { .. } => "retry step",
        }
    }
}

/// What `run` invokes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum RunTarget {
    Agent(String),
    Flow(String),
}

impl RunTarget {
    pub fn name(&self) -> &str {
        match self {
            RunTarget::Agent(name) | RunTarget::Flow(name) => name,
        }
    }
}

/// `on escalate ...` attached to a `run`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum EscalationAction {
    Return { value: Expr },
    Continue,
    Abort,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStmt {
    pub target: RunTarget,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input: Vec<Expr>,
    /// Variable (with sigil) receiving the result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assign_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_escalate: Option<EscalationAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<SourcePosition>,
}

/// `call llm prompt with ... using model "name"`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallStmt {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input: Vec<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assign_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<SourcePosition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCase {
    pub pattern: String,
    pub body: Vec<Stmt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<SourcePosition>,
}

/* ===================== Expressions ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOperator {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    Contains,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOperator::Or => "or",
            BinaryOperator::And => "and",
            BinaryOperator::Eq => "==",
            BinaryOperator::Ne => "!=",
            BinaryOperator::Lt => "<",
            BinaryOperator::Lte => "<=",
            BinaryOperator::Gt => ">",
            BinaryOperator::Gte => ">=",
            BinaryOperator::Contains => "contains",
            BinaryOperator::Add => "+",
            BinaryOperator::Sub => "-",
            BinaryOperator::Mul => "*",
            BinaryOperator::Div => "/",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOperator {
    Not,
    Neg,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Literal {
    String(String),
    Number(f64),
    Bool(bool),
    Null,
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::String(s) => write!(f, "\"{}\"", s),
            Literal::Number(n) => write!(f, "{}", n),
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Null => f.write_str("null"),
        }
    }
}

/// Expression AST node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Expr {
    /// `$name` (sigil kept)
    VarRef {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<SourcePosition>,
    },
    PropertyAccess {
        object: Box<Expr>,
        property: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<SourcePosition>,
    },
    BinaryOp {
        op: BinaryOperator,
        left: Box<Expr>,
        right: Box<Expr>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<SourcePosition>,
    },
    UnaryOp {
        op: UnaryOperator,
        operand: Box<Expr>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<SourcePosition>,
    },
    FunctionCall {
        name: String,
        args: Vec<Expr>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<SourcePosition>,
    },
    ListLiteral {
        elements: Vec<Expr>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<SourcePosition>,
    },
    ObjectLiteral {
        entries: Vec<(String, Expr)>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<SourcePosition>,
    },
    Literal {
        value: Literal,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<SourcePosition>,
    },
}

impl Expr {
    pub fn position(&self) -> Option<SourcePosition> {
        match self {
            Expr::VarRef { position, .. }
            | Expr::PropertyAccess { position, .. }
            | Expr::BinaryOp { position, .. }
            | Expr::UnaryOp { position, .. }
            | Expr::FunctionCall { position, .. }
            | Expr::ListLiteral { position, .. }
            | Expr::ObjectLiteral { position, .. }
            | Expr::Literal { position, .. } => *position,
        }
    }

    /// Convenience constructor for position-less string literals
    pub fn string(value: impl Into<String>) -> Self {
        Expr::Literal {
            value: Literal::String(value.into()),
            position: None,
        }
    }

    /// Convenience constructor for position-less variable references
    pub fn var(name: impl Into<String>) -> Self {
        Expr::VarRef {
            name: name.into(),
            position: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn condition(op: ConditionOp, value: &str) -> EscalationCondition {
        EscalationCondition {
            op,
            value: value.to_string(),
        }
    }

    #[test]
    fn test_normalized_match_ignores_case_and_punctuation() {
        let cond = condition(ConditionOp::Normalized, "DRIFTING");
        assert!(cond.matches("drifting."));
        assert!(cond.matches("  Drifting!  "));
        assert!(!cond.matches("still drifting along"));
    }

    #[test]
    fn test_exact_and_contains() {
        assert!(condition(ConditionOp::Equals, "STOP").matches("STOP"));
        assert!(!condition(ConditionOp::Equals, "STOP").matches("stop"));
        assert!(condition(ConditionOp::NotEquals, "OK").matches("FAIL"));
        assert!(condition(ConditionOp::Contains, "ERROR").matches("fatal ERROR here"));
    }

    #[test]
    fn test_agent_default_name() {
        let agent = AgentDef::default();
        assert_eq!(agent.resolved_name(), DEFAULT_AGENT_NAME);
    }

    #[test]
    fn test_strip_sigil() {
        assert_eq!(strip_sigil("$goal"), "goal");
        assert_eq!(strip_sigil("goal"), "goal");
    }
}
