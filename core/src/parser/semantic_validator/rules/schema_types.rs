//! Rule: Schema Field Types
//!
//! Field types are `string`, `int`, `float`, `bool` or the name of another
//! schema, optionally wrapped in `list[...]` and/or suffixed with `?`.

use crate::diagnostics::{Diagnostic, ErrorCode};
use crate::types::schema::SCALAR_TYPES;

use super::super::{DefinitionKind, RuleContext, ValidationRule};

pub struct SchemaFieldTypesRule;

impl ValidationRule for SchemaFieldTypesRule {
    fn id(&self) -> &'static str {
        "schema-field-types"
    }

    fn description(&self) -> &'static str {
        "Schema fields must use a known type"
    }

    fn validate(&self, ctx: &RuleContext<'_>) -> Vec<Diagnostic> {
        let mut errors = Vec::new();
        let mut known: Vec<&str> = SCALAR_TYPES.to_vec();
        known.extend(ctx.symbols.names(DefinitionKind::Schema));

        for (schema_name, schema) in &ctx.symbols.schemas {
            for field in &schema.fields {
                let base = field.field_type.base_type.as_str();
                if known.contains(&base) {
                    continue;
                }
                errors.push(
                    Diagnostic::new(
                        ErrorCode::E0012,
                        format!(
                            "unknown type `{}` for field `{}` in schema `{}`",
                            base, field.name, schema_name
                        ),
                    )
                    .at(field.position)
                    .with_optional_help(ctx.suggester.suggest("type", base, &known)),
                );
            }
        }

        errors
    }
}
