//! Structured output types
//!
//! Each `schema` definition lowers to a [`StructuredType`]. The
//! [`SchemaRegistry`] checks JSON values produced by the host against them.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

use super::ast::{SchemaDef, TypeExpr};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    Schema { name: String },
    List { item: Box<FieldType> },
    Optional { inner: Box<FieldType> },
}

pub const SCALAR_TYPES: [&str; 4] = ["string", "int", "float", "bool"];

impl FieldType {
    /// `list[T]` wraps the base type, `?` wraps the result
    pub fn from_type_expr(expr: &TypeExpr) -> Self {
        let base = match expr.base_type.as_str() {
            "string" => FieldType::String,
            "int" => FieldType::Int,
            "float" => FieldType::Float,
            "bool" => FieldType::Bool,
            other => FieldType::Schema {
                name: other.to_string(),
            },
        };
        let base = if expr.is_list {
            FieldType::List {
                item: Box::new(base),
            }
        } else {
            base
        };
        if expr.is_optional {
            FieldType::Optional {
                inner: Box::new(base),
            }
        } else {
            base
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::String => f.write_str("string"),
            FieldType::Int => f.write_str("int"),
            FieldType::Float => f.write_str("float"),
            FieldType::Bool => f.write_str("bool"),
            FieldType::Schema { name } => f.write_str(name),
            FieldType::List { item } => write!(f, "list[{}]", item),
            FieldType::Optional { inner } => write!(f, "{}?", inner),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredField {
    pub name: String,
    pub field_type: FieldType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredType {
    pub name: String,
    pub fields: Vec<StructuredField>,
}

impl From<&SchemaDef> for StructuredType {
    fn from(def: &SchemaDef) -> Self {
        StructuredType {
            name: def.name.clone(),
            fields: def
                .fields
                .iter()
                .map(|field| StructuredField {
                    name: field.name.clone(),
                    field_type: FieldType::from_type_expr(&field.field_type),
                })
                .collect(),
        }
    }
}

/// Mismatch between a value and a structured type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{path}: {message}")]
pub struct SchemaViolation {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaRegistry {
    types: IndexMap<String, StructuredType>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, schema: StructuredType) {
        self.types.insert(schema.name.clone(), schema);
    }

    pub fn get(&self, name: &str) -> Option<&StructuredType> {
        self.types.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StructuredType> {
        self.types.values()
    }

    /// Check `value` against the schema called `name`
    pub fn validate(&self, name: &str, value: &JsonValue) -> Result<(), SchemaViolation> {
        let ty = FieldType::Schema {
            name: name.to_string(),
        };
        self.check(&ty, value, name)
    }

    fn check(&self, ty: &FieldType, value: &JsonValue, path: &str) -> Result<(), SchemaViolation> {
        let violation = |message: String| SchemaViolation {
            path: path.to_string(),
            message,
        };
        match ty {
            FieldType::Optional { inner } => {
                if value.is_null() {
                    Ok(())
                } else {
                    self.check(inner, value, path)
                }
            }
            FieldType::String if value.is_string() => Ok(()),
            FieldType::Bool if value.is_boolean() => Ok(()),
            FieldType::Float if value.is_number() => Ok(()),
            FieldType::Int if is_integral(value) => Ok(()),
            FieldType::List { item } => {
                let items = value
                    .as_array()
                    .ok_or_else(|| violation(format!("expected {}, got {}", ty, kind_of(value))))?;
                for (i, element) in items.iter().enumerate() {
                    self.check(item, element, &format!("{}[{}]", path, i))?;
                }
                Ok(())
            }
            FieldType::Schema { name } => {
                let schema = self
                    .types
                    .get(name)
                    .ok_or_else(|| violation(format!("unknown schema `{}`", name)))?;
                let object = value.as_object().ok_or_else(|| {
                    violation(format!("expected object `{}`, got {}", name, kind_of(value)))
                })?;
                for field in &schema.fields {
                    let field_path = format!("{}.{}", path, field.name);
                    match object.get(&field.name) {
                        Some(field_value) => self.check(&field.field_type, field_value, &field_path)?,
                        None if matches!(field.field_type, FieldType::Optional { .. }) => {}
                        None => {
                            return Err(SchemaViolation {
                                path: field_path,
                                message: "missing required field".to_string(),
                            })
                        }
                    }
                }
                Ok(())
            }
            _ => Err(violation(format!("expected {}, got {}", ty, kind_of(value)))),
        }
    }
}

fn is_integral(value: &JsonValue) -> bool {
    value.is_i64()
        || value.is_u64()
        || value.as_f64().map(|n| n.fract() == 0.0).unwrap_or(false)
}

fn kind_of(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "list",
        JsonValue::Object(_) => "object",
    }
}
