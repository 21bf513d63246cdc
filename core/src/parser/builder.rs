//! Parse tree to AST
//!
//! One build function per grammar production. Nothing is validated here: the
//! builder only maps structure. Shapes the grammar already guarantees are still
//! checked, so a grammar change shows up as a `SyntaxError` instead of a panic.

use std::iter::Peekable;

use pest::iterators::Pair;

use super::{position_of, ParseResult, Rule, SyntaxError};
use crate::types::ast::{
    AgentDef, BackoffKind, BinaryOperator, CallStmt, ConditionOp, EscalationAction,
    EscalationCondition, EventHandler, EventTiming, EventType, Expr, FlowDef, ImportDef, Literal,
    MatchCase, ModelDef, Program, PromptDef, Property, RetryPolicyDef, RunStmt, RunTarget,
    SchemaDef, SchemaField, SourcePosition, Stmt, TimeoutPolicyDef, ToolAuth, ToolDef, ToolKind,
    TopLevel, TypeExpr, UnaryOperator, VersionDecl,
};

/* ===================== Child Cursor ===================== */

/// Keywords and `end` lines carry no data once the rule has matched
fn is_noise(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::kw_streetrace
            | Rule::kw_import
            | Rule::kw_from
            | Rule::kw_model
            | Rule::kw_schema
            | Rule::kw_tool
            | Rule::kw_tools
            | Rule::kw_builtin
            | Rule::kw_mcp
            | Rule::kw_with
            | Rule::kw_auth
            | Rule::kw_retry
            | Rule::kw_times
            | Rule::kw_backoff
            | Rule::kw_timeout
            | Rule::kw_prompt
            | Rule::kw_expecting
            | Rule::kw_using
            | Rule::kw_inherit
            | Rule::kw_escalate
            | Rule::kw_if
            | Rule::kw_agent
            | Rule::kw_instruction
            | Rule::kw_description
            | Rule::kw_delegate
            | Rule::kw_use
            | Rule::kw_produces
            | Rule::kw_flow
            | Rule::kw_do
            | Rule::kw_end
            | Rule::kw_run
            | Rule::kw_on
            | Rule::kw_call
            | Rule::kw_llm
            | Rule::kw_return
            | Rule::kw_push
            | Rule::kw_to
            | Rule::kw_for
            | Rule::kw_in
            | Rule::kw_else
            | Rule::kw_match
            | Rule::kw_when
            | Rule::kw_parallel
            | Rule::kw_failure
            | Rule::kw_loop
            | Rule::kw_max
            | Rule::kw_log
            | Rule::kw_notify
            | Rule::kw_continue
            | Rule::kw_abort
            | Rule::kw_step
            | Rule::end_line
    )
}

/// Significant children of a pair, in order
struct Children<'i> {
    position: SourcePosition,
    context: &'static str,
    inner: Peekable<std::vec::IntoIter<Pair<'i, Rule>>>,
}

impl<'i> Children<'i> {
    fn of(pair: Pair<'i, Rule>, context: &'static str) -> Self {
        let position = position_of(&pair);
        let inner: Vec<_> = pair
            .into_inner()
            .filter(|child| !is_noise(child.as_rule()))
            .collect();
        Self {
            position,
            context,
            inner: inner.into_iter().peekable(),
        }
    }

    fn expect(&mut self, what: &str) -> ParseResult<Pair<'i, Rule>> {
        let (position, context) = (self.position, self.context);
        self.inner
            .next()
            .ok_or_else(|| SyntaxError::at(position, format!("{}: missing {}", context, what)))
    }

    fn next_if(&mut self, rule: Rule) -> Option<Pair<'i, Rule>> {
        self.inner.next_if(|child| child.as_rule() == rule)
    }
}

impl<'i> Iterator for Children<'i> {
    type Item = Pair<'i, Rule>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

fn unexpected(pair: &Pair<'_, Rule>, context: &str) -> SyntaxError {
    SyntaxError::at(
        position_of(pair),
        format!("unexpected {:?} in {}", pair.as_rule(), context),
    )
}

fn text(pair: &Pair<'_, Rule>) -> String {
    pair.as_str().to_string()
}

/* ===================== Program ===================== */

pub(super) fn build_program(pair: Pair<'_, Rule>) -> ParseResult<Program> {
    let mut items = Vec::new();
    for child in pair.into_inner() {
        match child.as_rule() {
            Rule::top_item => items.push(build_top_item(child)?),
            Rule::top_line => {
                let item = Children::of(child, "top-level line").expect("definition")?;
                items.push(build_top_item(item)?);
            }
            Rule::EOI => {}
            _ => return Err(unexpected(&child, "program")),
        }
    }
    Ok(Program { items })
}

fn build_top_item(pair: Pair<'_, Rule>) -> ParseResult<TopLevel> {
    let inner = Children::of(pair, "top-level item").expect("definition")?;
    let item = match inner.as_rule() {
        Rule::version_decl => TopLevel::Version(build_version(inner)?),
        Rule::import_stmt => TopLevel::Import(build_import(inner)?),
        Rule::model_def => TopLevel::Model(build_model(inner)?),
        Rule::schema_def => TopLevel::Schema(build_schema(inner)?),
        Rule::tool_def => TopLevel::Tool(build_tool(inner)?),
        Rule::retry_def => TopLevel::RetryPolicy(build_retry_policy(inner)?),
        Rule::timeout_def => TopLevel::TimeoutPolicy(build_timeout_policy(inner)?),
        Rule::prompt_def => TopLevel::Prompt(build_prompt(inner)?),
        Rule::agent_def => TopLevel::Agent(build_agent(inner)?),
        Rule::flow_def => TopLevel::Flow(build_flow(inner)?),
        Rule::event_handler => TopLevel::Handler(build_handler(inner)?),
        _ => return Err(unexpected(&inner, "top-level item")),
    };
    Ok(item)
}

/* ===================== Literals ===================== */

fn build_string(pair: Pair<'_, Rule>) -> ParseResult<String> {
    match pair.as_rule() {
        Rule::string => {
            let raw = pair.into_inner().next().map(|inner| inner.as_str()).unwrap_or("");
            Ok(unescape(raw))
        }
        Rule::triple_string => {
            let raw = pair.into_inner().next().map(|inner| inner.as_str()).unwrap_or("");
            Ok(dedent(raw))
        }
        _ => Err(unexpected(&pair, "string")),
    }
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Strip the indentation shared by all non-blank lines after the first, then trim.
pub(crate) fn dedent(raw: &str) -> String {
    let mut lines = raw.lines();
    let first = lines.next().unwrap_or("");
    let rest: Vec<&str> = lines.collect();
    let margin = rest
        .iter()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);

    let mut out = first.trim().to_string();
    for line in rest {
        out.push('\n');
        out.push_str(line.get(margin..).unwrap_or_else(|| line.trim_start()));
    }
    out.trim().to_string()
}

fn parse_integer(pair: &Pair<'_, Rule>) -> ParseResult<u64> {
    pair.as_str().parse::<u64>().map_err(|e| {
        SyntaxError::at(
            position_of(pair),
            format!("invalid integer `{}`: {}", pair.as_str(), e),
        )
    })
}

/// `key: value` where value was not quoted
fn bare_literal(raw: &str) -> Literal {
    match raw {
        "true" => Literal::Bool(true),
        "false" => Literal::Bool(false),
        _ => match raw.parse::<f64>() {
            Ok(n) if raw.chars().all(|c| c.is_ascii_digit() || c == '.' || c == '-') => {
                Literal::Number(n)
            }
            _ => Literal::String(raw.to_string()),
        },
    }
}

/* ===================== Definitions ===================== */

fn build_version(pair: Pair<'_, Rule>) -> ParseResult<VersionDecl> {
    let position = Some(position_of(&pair));
    let version = Children::of(pair, "version").expect("version")?;
    Ok(VersionDecl {
        version: text(&version),
        position,
    })
}

fn build_import(pair: Pair<'_, Rule>) -> ParseResult<ImportDef> {
    let position = Some(position_of(&pair));
    let mut children = Children::of(pair, "import");
    let name = text(&children.expect("import name")?);
    let source = build_string(children.expect("import source")?)?;
    Ok(ImportDef {
        name,
        source,
        position,
    })
}

fn build_model(pair: Pair<'_, Rule>) -> ParseResult<ModelDef> {
    let position = Some(position_of(&pair));
    let mut children = Children::of(pair, "model");
    let name = text(&children.expect("model name")?);

    let mut spec = None;
    let mut properties = Vec::new();
    for child in children {
        match child.as_rule() {
            Rule::string => spec = Some(build_string(child)?),
            Rule::bare_value => spec = Some(text(&child)),
            Rule::property_line => properties.push(build_property_line(child)?),
            _ => return Err(unexpected(&child, "model")),
        }
    }

    Ok(ModelDef {
        name,
        spec,
        properties,
        position,
    })
}

fn build_property_line(pair: Pair<'_, Rule>) -> ParseResult<Property> {
    let property = Children::of(pair, "property line").expect("property")?;
    let position = Some(position_of(&property));
    let mut children = Children::of(property, "property");
    let key = text(&children.expect("property name")?);
    let value_pair = children.expect("property value")?;
    let value = match value_pair.as_rule() {
        Rule::string => Literal::String(build_string(value_pair)?),
        Rule::bare_value => bare_literal(value_pair.as_str()),
        _ => return Err(unexpected(&value_pair, "property")),
    };
    Ok(Property {
        key,
        value,
        position,
    })
}

fn build_schema(pair: Pair<'_, Rule>) -> ParseResult<SchemaDef> {
    let position = Some(position_of(&pair));
    let mut children = Children::of(pair, "schema");
    let name = text(&children.expect("schema name")?);

    let mut fields = Vec::new();
    for line in children {
        let field = Children::of(line, "schema line").expect("field")?;
        let field_position = Some(position_of(&field));
        let mut parts = Children::of(field, "schema field");
        let field_name = text(&parts.expect("field name")?);
        let field_type = build_type_expr(parts.expect("field type")?)?;
        fields.push(SchemaField {
            name: field_name,
            field_type,
            position: field_position,
        });
    }

    Ok(SchemaDef {
        name,
        fields,
        position,
    })
}

fn build_type_expr(pair: Pair<'_, Rule>) -> ParseResult<TypeExpr> {
    let mut children = Children::of(pair, "type");
    let shape = children.expect("type")?;
    let (base_type, is_list) = match shape.as_rule() {
        Rule::base_type => (text(&shape), false),
        Rule::list_type | Rule::array_type => {
            let base = Children::of(shape, "list type").expect("element type")?;
            (text(&base), true)
        }
        _ => return Err(unexpected(&shape, "type")),
    };
    let is_optional = children.next_if(Rule::optional_marker).is_some();
    Ok(TypeExpr {
        base_type,
        is_list,
        is_optional,
    })
}

fn build_tool(pair: Pair<'_, Rule>) -> ParseResult<ToolDef> {
    let position = Some(position_of(&pair));
    let mut children = Children::of(pair, "tool");
    let name = text(&children.expect("tool name")?);

    let mut tool = ToolDef {
        name,
        kind: None,
        url: None,
        reference: None,
        command: None,
        auth: None,
        position,
    };

    for child in children {
        match child.as_rule() {
            Rule::builtin_tool => {
                let reference = Children::of(child, "builtin tool").expect("tool reference")?;
                tool.kind = Some(ToolKind::Builtin);
                tool.reference = Some(text(&reference));
            }
            Rule::mcp_tool => {
                let mut parts = Children::of(child, "mcp tool");
                tool.kind = Some(ToolKind::Mcp);
                tool.url = Some(build_string(parts.expect("server url")?)?);
                if let Some(auth) = parts.next_if(Rule::tool_auth) {
                    let mut auth_parts = Children::of(auth, "tool auth");
                    let scheme = text(&auth_parts.expect("auth scheme")?);
                    let value = build_string(auth_parts.expect("auth value")?)?;
                    tool.auth = Some(ToolAuth { scheme, value });
                }
            }
            Rule::property_line => apply_tool_property(&mut tool, build_property_line(child)?)?,
            _ => return Err(unexpected(&child, "tool")),
        }
    }

    Ok(tool)
}

fn apply_tool_property(tool: &mut ToolDef, property: Property) -> ParseResult<()> {
    let position = property.position.unwrap_or_default();
    let value = match property.value {
        Literal::String(s) => s,
        other => other.to_string(),
    };
    match property.key.as_str() {
        "type" => {
            tool.kind = Some(match value.as_str() {
                "mcp" => ToolKind::Mcp,
                "builtin" => ToolKind::Builtin,
                other => {
                    return Err(SyntaxError::at(
                        position,
                        format!("unknown tool type `{}` (expected mcp or builtin)", other),
                    ))
                }
            })
        }
        "url" => tool.url = Some(value),
        "ref" | "reference" => tool.reference = Some(value),
        "command" => tool.command = Some(value),
        "auth" => {
            let (scheme, secret) = match value.split_once(char::is_whitespace) {
                Some((scheme, secret)) => (scheme.to_string(), secret.trim().to_string()),
                None => ("bearer".to_string(), value),
            };
            tool.auth = Some(ToolAuth {
                scheme,
                value: secret,
            });
        }
        other => {
            return Err(SyntaxError::at(
                position,
                format!("unknown tool property `{}`", other),
            ))
        }
    }
    Ok(())
}

fn build_retry_policy(pair: Pair<'_, Rule>) -> ParseResult<RetryPolicyDef> {
    let position = Some(position_of(&pair));
    let mut children = Children::of(pair, "retry policy");
    let name = text(&children.expect("policy name")?);
    let count_pair = children.expect("retry count")?;
    let count = u32::try_from(parse_integer(&count_pair)?).map_err(|_| {
        SyntaxError::at(position_of(&count_pair), "retry count is too large")
    })?;
    let backoff = match children.next_if(Rule::backoff_kind).as_ref().map(|p| p.as_str()) {
        Some("exponential") => BackoffKind::Exponential,
        Some("linear") => BackoffKind::Linear,
        _ => BackoffKind::Fixed,
    };
    Ok(RetryPolicyDef {
        name,
        count,
        backoff,
        position,
    })
}

fn build_timeout_policy(pair: Pair<'_, Rule>) -> ParseResult<TimeoutPolicyDef> {
    let position = Some(position_of(&pair));
    let mut children = Children::of(pair, "timeout policy");
    let name = text(&children.expect("policy name")?);
    let amount_pair = children.expect("duration")?;
    let amount = parse_integer(&amount_pair)?;
    let unit = children.expect("time unit")?;
    let scale = match unit.as_str() {
        "ms" => 1,
        "s" | "sec" | "secs" | "second" | "seconds" => 1_000,
        "m" | "min" | "mins" | "minute" | "minutes" => 60_000,
        "h" | "hour" | "hours" => 3_600_000,
        other => {
            return Err(SyntaxError::at(
                position_of(&unit),
                format!("unknown time unit `{}`", other),
            ))
        }
    };
    let millis = amount
        .checked_mul(scale)
        .ok_or_else(|| SyntaxError::at(position_of(&amount_pair), "duration is too large"))?;
    Ok(TimeoutPolicyDef {
        name,
        millis,
        position,
    })
}

fn build_prompt(pair: Pair<'_, Rule>) -> ParseResult<PromptDef> {
    let position = Some(position_of(&pair));
    let mut children = Children::of(pair, "prompt");
    let mut prompt = PromptDef {
        name: text(&children.expect("prompt name")?),
        body: String::new(),
        model: None,
        expecting: None,
        inherit: None,
        escalation: None,
        position,
    };

    for child in children {
        match child.as_rule() {
            Rule::expecting_mod => {
                let schema = Children::of(child, "expecting").expect("schema name")?;
                prompt.expecting = Some(text(&schema));
            }
            Rule::using_mod => {
                let model = Children::of(child, "using model").expect("model name")?;
                prompt.model = Some(name_or_string(model)?);
            }
            Rule::inherit_mod => {
                let variable = Children::of(child, "inherit").expect("variable")?;
                prompt.inherit = Some(text(&variable));
            }
            Rule::escalate_mod => {
                let mut parts = Children::of(child, "escalate if");
                let op = match parts.expect("condition operator")?.as_str() {
                    "~" => ConditionOp::Normalized,
                    "==" => ConditionOp::Equals,
                    "!=" => ConditionOp::NotEquals,
                    _ => ConditionOp::Contains,
                };
                let value = build_string(parts.expect("condition value")?)?;
                prompt.escalation = Some(EscalationCondition { op, value });
            }
            Rule::string | Rule::triple_string => prompt.body = build_string(child)?,
            _ => return Err(unexpected(&child, "prompt")),
        }
    }

    Ok(prompt)
}

fn name_or_string(pair: Pair<'_, Rule>) -> ParseResult<String> {
    match pair.as_rule() {
        Rule::string => build_string(pair),
        _ => Ok(text(&pair)),
    }
}

fn build_name_list(pair: Pair<'_, Rule>) -> Vec<String> {
    pair.into_inner().map(|name| text(&name)).collect()
}

fn build_agent(pair: Pair<'_, Rule>) -> ParseResult<AgentDef> {
    let position = Some(position_of(&pair));
    let mut children = Children::of(pair, "agent");
    let mut agent = AgentDef {
        name: children.next_if(Rule::identifier).map(|name| text(&name)),
        position,
        ..AgentDef::default()
    };

    for line in children {
        let property = Children::of(line, "agent line").expect("agent property")?;
        let prop = Children::of(property, "agent property").expect("agent property")?;
        let rule = prop.as_rule();
        let mut parts = Children::of(prop, "agent property");
        let value = parts.expect("value")?;
        match rule {
            Rule::tools_prop => agent.tools.extend(build_name_list(value)),
            Rule::instruction_prop => agent.instruction = Some(text(&value)),
            Rule::prompt_prop => agent.prompt = Some(text(&value)),
            Rule::retry_prop => agent.retry = Some(text(&value)),
            Rule::timeout_prop => agent.timeout = Some(text(&value)),
            Rule::description_prop => agent.description = Some(build_string(value)?),
            Rule::delegate_prop => agent.sub_agents.extend(build_name_list(value)),
            Rule::use_prop => agent.agent_tools.extend(build_name_list(value)),
            Rule::produces_prop => agent.produces = Some(text(&value)),
            _ => return Err(unexpected(&value, "agent")),
        }
    }

    Ok(agent)
}

/// Collapse the whitespace between flow-name words
fn normalize_flow_name(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn build_flow(pair: Pair<'_, Rule>) -> ParseResult<FlowDef> {
    let position = Some(position_of(&pair));
    let mut children = Children::of(pair, "flow");
    let name = normalize_flow_name(children.expect("flow name")?.as_str());

    let mut params = Vec::new();
    let mut body = Vec::new();
    for child in children {
        match child.as_rule() {
            Rule::variable => params.push(text(&child)),
            Rule::block => body = build_block(child)?,
            _ => return Err(unexpected(&child, "flow")),
        }
    }

    Ok(FlowDef {
        name,
        params,
        body,
        position,
    })
}

fn build_handler(pair: Pair<'_, Rule>) -> ParseResult<EventHandler> {
    let position = Some(position_of(&pair));
    let mut children = Children::of(pair, "event handler");
    let timing = match children.expect("event timing")?.as_str() {
        "after" => EventTiming::After,
        _ => EventTiming::On,
    };
    let event_pair = children.expect("event type")?;
    let event = match event_pair.as_str() {
        "start" => EventType::Start,
        "input" => EventType::Input,
        "output" => EventType::Output,
        "tool-call" => EventType::ToolCall,
        "tool-result" => EventType::ToolResult,
        _ => return Err(unexpected(&event_pair, "event handler")),
    };
    let body = build_block(children.expect("handler body")?)?;
    Ok(EventHandler {
        timing,
        event,
        body,
        position,
    })
}

/* ===================== Statements ===================== */

fn build_block(pair: Pair<'_, Rule>) -> ParseResult<Vec<Stmt>> {
    Children::of(pair, "block")
        .map(|line| {
            let statement = Children::of(line, "statement line").expect("statement")?;
            build_statement(statement)
        })
        .collect()
}

fn build_statement(pair: Pair<'_, Rule>) -> ParseResult<Stmt> {
    let inner = Children::of(pair, "statement").expect("statement")?;
    let position = Some(position_of(&inner));

    match inner.as_rule() {
        Rule::run_assign => {
            let mut children = Children::of(inner, "run assignment");
            let target = text(&children.expect("variable")?);
            let run = build_run(children.expect("run")?, Some(target))?;
            Ok(Stmt::Run(RunStmt { position, ..run }))
        }
        Rule::call_assign => {
            let mut children = Children::of(inner, "call assignment");
            let target = text(&children.expect("variable")?);
            let call = build_call(children.expect("call")?, Some(target))?;
            Ok(Stmt::Call(CallStmt { position, ..call }))
        }
        Rule::run_stmt => Ok(Stmt::Run(build_run(inner, None)?)),
        Rule::call_stmt => Ok(Stmt::Call(build_call(inner, None)?)),
        Rule::property_assignment => {
            let mut children = Children::of(inner, "property assignment");
            let mut path = Children::of(children.expect("property path")?, "property path");
            let target = text(&path.expect("variable")?);
            let path: Vec<String> = path.map(|part| text(&part)).collect();
            let value = build_expression(children.expect("value")?)?;
            Ok(Stmt::PropertyAssignment {
                target,
                path,
                value,
                position,
            })
        }
        Rule::assignment => {
            let mut children = Children::of(inner, "assignment");
            let target = text(&children.expect("variable")?);
            let value = build_expression(children.expect("value")?)?;
            Ok(Stmt::Assignment {
                target,
                value,
                position,
            })
        }
        Rule::return_stmt => {
            let value = build_expression(Children::of(inner, "return").expect("value")?)?;
            Ok(Stmt::Return { value, position })
        }
        Rule::push_stmt => {
            let mut children = Children::of(inner, "push");
            let value = build_expression(children.expect("value")?)?;
            let target = text(&children.expect("list variable")?);
            Ok(Stmt::Push {
                value,
                target,
                position,
            })
        }
        Rule::for_loop => {
            let mut children = Children::of(inner, "for");
            let variable = text(&children.expect("loop variable")?);
            let iterable = build_expression(children.expect("iterable")?)?;
            let body = build_block(children.expect("loop body")?)?;
            Ok(Stmt::ForLoop {
                variable,
                iterable,
                body,
                position,
            })
        }
        Rule::if_block => {
            let mut children = Children::of(inner, "if");
            let condition = build_expression(children.expect("condition")?)?;
            let body = build_block(children.expect("if body")?)?;
            let else_body = match children.next_if(Rule::else_branch) {
                Some(branch) => {
                    let clause = Children::of(branch, "else").expect("else clause")?;
                    let block = Children::of(clause, "else").expect("else body")?;
                    Some(build_block(block)?)
                }
                None => None,
            };
            Ok(Stmt::IfBlock {
                condition,
                body,
                else_body,
                position,
            })
        }
        Rule::match_block => build_match(inner, position),
        Rule::parallel_block => {
            let mut body = Vec::new();
            for line in Children::of(inner, "parallel") {
                let member = Children::of(line, "parallel line").expect("run statement")?;
                body.push(build_statement(member)?);
            }
            Ok(Stmt::ParallelBlock { body, position })
        }
        Rule::failure_block => {
            let body = build_block(Children::of(inner, "on failure").expect("handler body")?)?;
            Ok(Stmt::FailureBlock { body, position })
        }
        Rule::loop_block => {
            let mut children = Children::of(inner, "loop");
            let max_iterations = match children.next_if(Rule::integer) {
                Some(max) => Some(parse_integer(&max)?),
                None => None,
            };
            let body = build_block(children.expect("loop body")?)?;
            Ok(Stmt::LoopBlock {
                max_iterations,
                body,
                position,
            })
        }
        Rule::log_stmt => {
            let message = build_string(Children::of(inner, "log").expect("message")?)?;
            Ok(Stmt::Log { message, position })
        }
        Rule::notify_stmt => {
            let message = build_string(Children::of(inner, "notify").expect("message")?)?;
            Ok(Stmt::Notify { message, position })
        }
        Rule::escalate_stmt => {
            let mut children = Children::of(inner, "escalate");
            let target = children.next_if(Rule::identifier).map(|t| text(&t));
            let message = match children.next() {
                Some(message) => Some(build_string(message)?),
                None => None,
            };
            Ok(Stmt::Escalate {
                target,
                message,
                position,
            })
        }
        Rule::continue_stmt => Ok(Stmt::Continue { position }),
        Rule::abort_stmt => {
            let message = match Children::of(inner, "abort").next() {
                Some(message) => Some(build_string(message)?),
                None => None,
            };
            Ok(Stmt::Abort { message, position })
        }
        Rule::retry_step_stmt => Ok(Stmt::RetryStep { position }),
        _ => Err(unexpected(&inner, "statement")),
    }
}

fn build_match(pair: Pair<'_, Rule>, position: Option<SourcePosition>) -> ParseResult<Stmt> {
    let mut children = Children::of(pair, "match");
    let subject = build_expression(children.expect("match subject")?)?;

    let mut cases = Vec::new();
    let mut else_body = None;
    for line in children {
        match line.as_rule() {
            Rule::match_case_line => {
                let case = Children::of(line, "when line").expect("when")?;
                let case_position = Some(position_of(&case));
                let mut parts = Children::of(case, "when");
                let pattern = build_string(parts.expect("pattern")?)?;
                let body = build_case_body(parts)?;
                cases.push(MatchCase {
                    pattern,
                    body,
                    position: case_position,
                });
            }
            Rule::match_else_line => {
                let otherwise = Children::of(line, "else line").expect("else")?;
                else_body = Some(build_case_body(Children::of(otherwise, "else"))?);
            }
            _ => return Err(unexpected(&line, "match")),
        }
    }

    Ok(Stmt::MatchBlock {
        subject,
        cases,
        else_body,
        position,
    })
}

/// `-> statement` or a `:`/`do` block
fn build_case_body(mut parts: Children<'_>) -> ParseResult<Vec<Stmt>> {
    let body = parts.expect("case body")?;
    match body.as_rule() {
        Rule::statement => Ok(vec![build_statement(body)?]),
        Rule::block => build_block(body),
        _ => Err(unexpected(&body, "match case")),
    }
}

fn build_run(pair: Pair<'_, Rule>, assign_to: Option<String>) -> ParseResult<RunStmt> {
    let position = Some(position_of(&pair));
    let mut children = Children::of(pair, "run");
    let target_pair = children.expect("run target")?;
    let target = match target_pair.as_rule() {
        Rule::agent_target => {
            let name = Children::of(target_pair, "run agent").expect("agent name")?;
            RunTarget::Agent(text(&name))
        }
        Rule::flow_target => RunTarget::Flow(normalize_flow_name(target_pair.as_str())),
        _ => return Err(unexpected(&target_pair, "run")),
    };

    let mut input = Vec::new();
    let mut on_escalate = None;
    for child in children {
        match child.as_rule() {
            Rule::run_input => input = build_arguments(child)?,
            Rule::escalation_handler => {
                let action = Children::of(child, "on escalate").expect("escalation action")?;
                on_escalate = Some(match action.as_rule() {
                    Rule::escalate_return => {
                        let value = Children::of(action, "on escalate return").expect("value")?;
                        EscalationAction::Return {
                            value: build_expression(value)?,
                        }
                    }
                    Rule::escalate_continue => EscalationAction::Continue,
                    Rule::escalate_abort => EscalationAction::Abort,
                    _ => return Err(unexpected(&action, "on escalate")),
                });
            }
            _ => return Err(unexpected(&child, "run")),
        }
    }

    Ok(RunStmt {
        target,
        input,
        assign_to,
        on_escalate,
        position,
    })
}

fn build_call(pair: Pair<'_, Rule>, assign_to: Option<String>) -> ParseResult<CallStmt> {
    let position = Some(position_of(&pair));
    let mut children = Children::of(pair, "call");
    let prompt = text(&children.expect("prompt name")?);

    let mut input = Vec::new();
    let mut model = None;
    for child in children {
        match child.as_rule() {
            Rule::run_input => input = build_arguments(child)?,
            Rule::model_override => {
                let name = Children::of(child, "using model").expect("model name")?;
                model = Some(name_or_string(name)?);
            }
            _ => return Err(unexpected(&child, "call")),
        }
    }

    Ok(CallStmt {
        prompt,
        input,
        model,
        assign_to,
        position,
    })
}

fn build_arguments(pair: Pair<'_, Rule>) -> ParseResult<Vec<Expr>> {
    Children::of(pair, "arguments").map(build_expression).collect()
}

/* ===================== Expressions ===================== */

fn build_expression(pair: Pair<'_, Rule>) -> ParseResult<Expr> {
    let position = Some(position_of(&pair));
    match pair.as_rule() {
        Rule::expression => build_expression(Children::of(pair, "expression").expect("expression")?),
        Rule::or_expr
        | Rule::and_expr
        | Rule::comparison
        | Rule::additive
        | Rule::multiplicative => build_binary_chain(pair),
        Rule::unary => build_unary(pair),
        Rule::postfix => build_postfix(pair),
        Rule::variable => Ok(Expr::VarRef {
            name: text(&pair),
            position,
        }),
        Rule::string | Rule::triple_string => Ok(Expr::Literal {
            value: Literal::String(build_string(pair)?),
            position,
        }),
        Rule::number => {
            let value = pair.as_str().parse::<f64>().map_err(|e| {
                SyntaxError::at(position_of(&pair), format!("invalid number: {}", e))
            })?;
            Ok(Expr::Literal {
                value: Literal::Number(value),
                position,
            })
        }
        Rule::boolean => Ok(Expr::Literal {
            value: Literal::Bool(pair.as_str() == "true"),
            position,
        }),
        Rule::null_lit => Ok(Expr::Literal {
            value: Literal::Null,
            position,
        }),
        Rule::function_call => {
            let mut children = Children::of(pair, "function call");
            let name = text(&children.expect("function name")?);
            let args = children.map(build_expression).collect::<ParseResult<Vec<_>>>()?;
            Ok(Expr::FunctionCall {
                name,
                args,
                position,
            })
        }
        Rule::list_literal => {
            let elements = Children::of(pair, "list")
                .map(build_expression)
                .collect::<ParseResult<Vec<_>>>()?;
            Ok(Expr::ListLiteral { elements, position })
        }
        Rule::object_literal => {
            let mut entries = Vec::new();
            for entry in Children::of(pair, "object") {
                let mut parts = Children::of(entry, "object entry");
                let key_pair = parts.expect("key")?;
                let key = match key_pair.as_rule() {
                    Rule::string => build_string(key_pair)?,
                    _ => text(&key_pair),
                };
                let value = build_expression(parts.expect("value")?)?;
                entries.push((key, value));
            }
            Ok(Expr::ObjectLiteral { entries, position })
        }
        _ => Err(unexpected(&pair, "expression")),
    }
}

fn binary_operator(pair: &Pair<'_, Rule>) -> ParseResult<BinaryOperator> {
    let op = match pair.as_rule() {
        Rule::op_or => BinaryOperator::Or,
        Rule::op_and => BinaryOperator::And,
        Rule::op_eq => BinaryOperator::Eq,
        Rule::op_ne => BinaryOperator::Ne,
        Rule::op_lt => BinaryOperator::Lt,
        Rule::op_lte => BinaryOperator::Lte,
        Rule::op_gt => BinaryOperator::Gt,
        Rule::op_gte => BinaryOperator::Gte,
        Rule::op_contains => BinaryOperator::Contains,
        Rule::op_add => BinaryOperator::Add,
        Rule::op_sub => BinaryOperator::Sub,
        Rule::op_mul => BinaryOperator::Mul,
        Rule::op_div => BinaryOperator::Div,
        _ => return Err(unexpected(pair, "binary expression")),
    };
    Ok(op)
}

/// `a op b op c` folded to the left
fn build_binary_chain(pair: Pair<'_, Rule>) -> ParseResult<Expr> {
    let mut children = Children::of(pair, "binary expression");
    let mut left = build_expression(children.expect("operand")?)?;
    while let Some(op_pair) = children.next() {
        let op = binary_operator(&op_pair)?;
        let right = build_expression(children.expect("right operand")?)?;
        let position = left.position();
        left = Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
            position,
        };
    }
    Ok(left)
}

fn build_unary(pair: Pair<'_, Rule>) -> ParseResult<Expr> {
    let position = Some(position_of(&pair));
    let mut ops = Vec::new();
    let mut operand = None;
    for child in Children::of(pair, "unary expression") {
        match child.as_rule() {
            Rule::op_not => ops.push(UnaryOperator::Not),
            Rule::op_neg => ops.push(UnaryOperator::Neg),
            _ => operand = Some(build_expression(child)?),
        }
    }
    let mut expr = operand.ok_or_else(|| {
        SyntaxError::at(position.unwrap_or_default(), "unary expression: missing operand")
    })?;
    for op in ops.into_iter().rev() {
        expr = Expr::UnaryOp {
            op,
            operand: Box::new(expr),
            position,
        };
    }
    Ok(expr)
}

fn build_postfix(pair: Pair<'_, Rule>) -> ParseResult<Expr> {
    let mut children = Children::of(pair, "property access");
    let mut expr = build_expression(children.expect("operand")?)?;
    for suffix in children {
        let position = expr.position();
        let property = Children::of(suffix, "property access").expect("property name")?;
        expr = Expr::PropertyAccess {
            object: Box::new(expr),
            property: text(&property),
            position,
        };
    }
    Ok(expr)
}
