//! Code generation
//!
//! Lowers an analyzed [`Program`] into a [`CompiledUnit`]: definitions become
//! specs keyed by name, each flow and event handler becomes a flat list of
//! [`Op`](crate::types::ir::Op)s with resolved jump targets, and every
//! statement gets one [`SourceMap`] entry.
//!
//! Run semantic analysis first. Generation trusts that references resolve and
//! only fails on constructs that have no lowering (see [`LoweringError`]).

mod lower;

use indexmap::{IndexMap, IndexSet};
use serde_json::Value as JsonValue;
use tracing::{debug, instrument};

use crate::diagnostics::{Diagnostic, ErrorCode};
use crate::parser::semantic_validator::MergedPrompts;
use crate::types::ast::{strip_sigil, Literal, Program, SourcePosition, TopLevel};
use crate::types::ir::{
    AgentSpec, CompiledUnit, FlowUnit, HandlerUnit, ImportSpec, ModelSpec, PromptSpec,
    RetryPolicy, TimeoutPolicy, ToolSpec, UnitRef,
};
use crate::types::schema::StructuredType;
use crate::types::source_map::SourceMap;
use crate::types::template::parse_template;

use lower::Lowerer;

/// A construct that cannot be lowered. Always fatal.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct LoweringError {
    pub message: String,
    pub position: Option<SourcePosition>,
}

impl LoweringError {
    pub fn at(position: Option<SourcePosition>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::new(ErrorCode::E0200, self.message.clone()).at(self.position)
    }
}

pub type LowerResult<T> = Result<T, LoweringError>;

/// Lower `program` into a compiled unit and its source map.
///
/// Prompts come from the analyzer's merged view, never from the raw AST, so
/// repeated prompt definitions arrive already folded together.
#[instrument(skip_all, fields(source = source_name))]
pub fn generate(
    program: &Program,
    source_name: &str,
    prompts: MergedPrompts<'_>,
) -> LowerResult<(CompiledUnit, SourceMap)> {
    let mut unit = CompiledUnit::new(source_name);
    let mut source_map = SourceMap::new(source_name);

    unit.version = program.version().map(|v| v.version.clone());
    unit.imports = program
        .imports()
        .map(|import| ImportSpec {
            name: import.name.clone(),
            source: import.source.clone(),
        })
        .collect();

    lower_definitions(program, prompts, &mut unit)?;

    let flow_names: IndexSet<&str> = program.flows().map(|f| f.name.as_str()).collect();

    for flow in program.flows() {
        if unit.flows.contains_key(&flow.name) {
            continue;
        }
        let unit_ref = UnitRef::Flow(flow.name.clone());
        let mut lowerer = Lowerer::new(unit_ref, &unit.agents, &flow_names, &mut source_map);
        lowerer.lower_body(&flow.body)?;
        let ops = lowerer.finish();
        debug!(flow = %flow.name, ops = ops.len(), "lowered flow");

        unit.flows.insert(
            flow.name.clone(),
            FlowUnit {
                name: flow.name.clone(),
                params: flow.params.iter().map(|p| strip_sigil(p).to_string()).collect(),
                ops,
            },
        );
    }

    let mut seen: IndexMap<String, usize> = IndexMap::new();
    for handler in program.handlers() {
        let label = handler.label();
        let count = seen.entry(label.clone()).or_insert(0);
        *count += 1;
        let name = if *count == 1 {
            label
        } else {
            format!("{}#{}", label, count)
        };

        let unit_ref = UnitRef::Handler(name.clone());
        let mut lowerer = Lowerer::new(unit_ref, &unit.agents, &flow_names, &mut source_map);
        lowerer.lower_body(&handler.body)?;
        let ops = lowerer.finish();
        debug!(handler = %name, ops = ops.len(), "lowered handler");

        unit.handlers.push(HandlerUnit {
            name,
            timing: handler.timing,
            event: handler.event,
            ops,
        });
    }

    Ok((unit, source_map))
}

/// Definitions into specs. The first definition of a name wins.
fn lower_definitions(
    program: &Program,
    prompts: MergedPrompts<'_>,
    unit: &mut CompiledUnit,
) -> LowerResult<()> {
    for model in program.models() {
        unit.models.entry(model.name.clone()).or_insert_with(|| ModelSpec {
            spec: model.spec.clone(),
            properties: model
                .properties
                .iter()
                .map(|p| (p.key.clone(), literal_to_json(&p.value)))
                .collect(),
        });
    }

    for schema in program.schemas() {
        if !unit.schemas.contains(&schema.name) {
            unit.schemas.insert(StructuredType::from(schema));
        }
    }

    for tool in program.tools() {
        if unit.tools.contains_key(&tool.name) {
            continue;
        }
        let kind = tool.kind.ok_or_else(|| {
            LoweringError::at(tool.position, format!("tool `{}` has no type", tool.name))
        })?;
        unit.tools.insert(
            tool.name.clone(),
            ToolSpec {
                kind,
                url: tool.url.clone(),
                reference: tool.reference.clone(),
                command: tool.command.clone(),
                auth: tool.auth.clone(),
            },
        );
    }

    for (name, prompt) in prompts.iter() {
        let parts = parse_template(&prompt.body, false)
            .map_err(|err| LoweringError::at(prompt.position, err.to_string()))?;
        unit.prompts.insert(
            name.to_string(),
            PromptSpec {
                template: prompt.body.clone(),
                parts,
                model: prompt.model.clone(),
                expecting: prompt.expecting.clone(),
                inherit: prompt.inherit.as_deref().map(|v| strip_sigil(v).to_string()),
                escalation: prompt.escalation.clone(),
            },
        );
    }

    for agent in program.agents() {
        let name = agent.resolved_name();
        if unit.agents.contains_key(name) {
            continue;
        }
        let instruction = agent.instruction.clone().ok_or_else(|| {
            LoweringError::at(
                agent.position,
                format!("agent `{}` has no instruction", name),
            )
        })?;
        unit.agents.insert(
            name.to_string(),
            AgentSpec {
                instruction,
                prompt: agent.prompt.clone(),
                tools: agent.tools.clone(),
                sub_agents: agent.sub_agents.clone(),
                agent_tools: agent.agent_tools.clone(),
                retry: agent.retry.clone(),
                timeout: agent.timeout.clone(),
                description: agent.description.clone(),
                produces: agent.produces.as_deref().map(|v| strip_sigil(v).to_string()),
            },
        );
    }

    for item in &program.items {
        match item {
            TopLevel::RetryPolicy(def) => {
                unit.retry_policies
                    .entry(def.name.clone())
                    .or_insert(RetryPolicy {
                        count: def.count,
                        backoff: def.backoff,
                    });
            }
            TopLevel::TimeoutPolicy(def) => {
                unit.timeout_policies
                    .entry(def.name.clone())
                    .or_insert(TimeoutPolicy { millis: def.millis });
            }
            _ => {}
        }
    }

    Ok(())
}

/// Integral numbers become JSON integers
pub(crate) fn number_to_json(n: f64) -> JsonValue {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9.0e15 {
        JsonValue::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null)
    }
}

pub(crate) fn literal_to_json(literal: &Literal) -> JsonValue {
    match literal {
        Literal::String(s) => JsonValue::String(s.clone()),
        Literal::Number(n) => number_to_json(*n),
        Literal::Bool(b) => JsonValue::Bool(*b),
        Literal::Null => JsonValue::Null,
    }
}
