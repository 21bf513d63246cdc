//! Rule: Agent References
//!
//! Every agent needs an `instruction` naming a prompt. Its other properties
//! must point at existing definitions:
//!
//! | property      | bucket          |
//! |---------------|-----------------|
//! | `tools`       | tools           |
//! | `prompt`      | prompts         |
//! | `retry`       | retry policies  |
//! | `timeout`     | timeout policies|
//! | `delegate`    | agents          |
//! | `use`         | agents          |

use crate::diagnostics::{Diagnostic, ErrorCode};

use super::super::{DefinitionKind, RuleContext, ValidationRule};

pub struct AgentReferencesRule;

impl ValidationRule for AgentReferencesRule {
    fn id(&self) -> &'static str {
        "agent-references"
    }

    fn description(&self) -> &'static str {
        "Agents need an instruction and valid references"
    }

    fn validate(&self, ctx: &RuleContext<'_>) -> Vec<Diagnostic> {
        let mut errors = Vec::new();

        for (name, agent) in &ctx.symbols.agents {
            let at = agent.position;
            match &agent.instruction {
                Some(prompt) => ctx.require(DefinitionKind::Prompt, prompt, at, &mut errors),
                None => errors.push(
                    Diagnostic::new(
                        ErrorCode::E0010,
                        format!(
                            "agent `{}` is missing required property `instruction`",
                            name
                        ),
                    )
                    .at(at)
                    .with_help("add `instruction <prompt name>` to the agent definition"),
                ),
            }

            for tool in &agent.tools {
                ctx.require(DefinitionKind::Tool, tool, at, &mut errors);
            }
            if let Some(prompt) = &agent.prompt {
                ctx.require(DefinitionKind::Prompt, prompt, at, &mut errors);
            }
            if let Some(policy) = &agent.retry {
                ctx.require(DefinitionKind::RetryPolicy, policy, at, &mut errors);
            }
            if let Some(policy) = &agent.timeout {
                ctx.require(DefinitionKind::TimeoutPolicy, policy, at, &mut errors);
            }
            for other in agent.sub_agents.iter().chain(&agent.agent_tools) {
                ctx.require(DefinitionKind::Agent, other, at, &mut errors);
            }
        }

        errors
    }
}
