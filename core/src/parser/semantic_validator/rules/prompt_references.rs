//! Rule: Prompt References
//!
//! A prompt's `using model` must name a model and its `expecting` must name a
//! schema. Checked on the merged prompt, so each reference is reported once.
//!
//! ```streetrace
//! # Error: no model called `fast`
//! prompt summarize using model "fast": "Summarize ${input_prompt}"
//! ```

use crate::diagnostics::Diagnostic;

use super::super::{DefinitionKind, RuleContext, ValidationRule};

pub struct PromptReferencesRule;

impl ValidationRule for PromptReferencesRule {
    fn id(&self) -> &'static str {
        "prompt-references"
    }

    fn description(&self) -> &'static str {
        "Prompt model and schema references must resolve"
    }

    fn validate(&self, ctx: &RuleContext<'_>) -> Vec<Diagnostic> {
        let mut errors = Vec::new();
        for (_, prompt) in ctx.symbols.merged_prompts().iter() {
            if let Some(model) = &prompt.model {
                ctx.require(DefinitionKind::Model, model, prompt.position, &mut errors);
            }
            if let Some(schema) = &prompt.expecting {
                ctx.require(DefinitionKind::Schema, schema, prompt.position, &mut errors);
            }
        }
        errors
    }
}
