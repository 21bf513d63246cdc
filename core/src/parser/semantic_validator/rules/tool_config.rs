//! Rule: Tool Configuration
//!
//! A tool must say what it is. `mcp` tools need a server `url` or a `command`
//! that starts one; `builtin` tools need the `ref` of the implementation.

use crate::diagnostics::{Diagnostic, ErrorCode};
use crate::types::ast::{ToolDef, ToolKind};

use super::super::{RuleContext, ValidationRule};

pub struct ToolConfigRule;

fn missing(tool: &ToolDef, property: &str, help: &str) -> Diagnostic {
    Diagnostic::new(
        ErrorCode::E0010,
        format!(
            "tool `{}` is missing required property `{}`",
            tool.name, property
        ),
    )
    .at(tool.position)
    .with_help(help)
}

impl ValidationRule for ToolConfigRule {
    fn id(&self) -> &'static str {
        "tool-config"
    }

    fn description(&self) -> &'static str {
        "Tools need a kind and the properties that kind requires"
    }

    fn validate(&self, ctx: &RuleContext<'_>) -> Vec<Diagnostic> {
        let mut errors = Vec::new();
        for tool in ctx.symbols.tools.values() {
            match tool.kind {
                None => errors.push(missing(tool, "type", "add `type: mcp` or `type: builtin`")),
                Some(ToolKind::Mcp) if tool.url.is_none() && tool.command.is_none() => {
                    errors.push(missing(tool, "url", "add `url: \"...\"` or `command: \"...\"`"))
                }
                Some(ToolKind::Builtin) if tool.reference.is_none() => {
                    errors.push(missing(tool, "ref", "add `ref: module.name`"))
                }
                Some(_) => {}
            }
        }
        errors
    }
}
