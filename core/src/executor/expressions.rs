//! Expression evaluation
//!
//! Evaluates lowered expressions against the VM environment. Values are plain
//! JSON. A missing variable is a runtime error; a missing property is `null`.

use indexmap::IndexMap;
use serde_json::{Map, Value as JsonValue};

use crate::codegen::number_to_json;
use crate::types::ast::{BinaryOperator, UnaryOperator};
use crate::types::ir::{CompiledUnit, IrExpr};
use crate::types::template::FormatPart;

use super::stdlib::call_builtin;
use super::vm::RuntimeError;

pub type EvalResult = Result<JsonValue, RuntimeError>;

/// Evaluate an expression to a value
pub fn eval_expr(
    expr: &IrExpr,
    env: &IndexMap<String, JsonValue>,
    compiled: &CompiledUnit,
) -> EvalResult {
    match expr {
        IrExpr::Const { value } => Ok(value.clone()),

        IrExpr::Var { name } => lookup(env, name),

        IrExpr::Property { object, property } => {
            let object = eval_expr(object, env, compiled)?;
            Ok(property_of(&object, property))
        }

        IrExpr::Binary { op, left, right } => {
            let left = eval_expr(left, env, compiled)?;
            // Short-circuit before touching the right operand
            match op {
                BinaryOperator::And if !is_truthy(&left) => return Ok(JsonValue::Bool(false)),
                BinaryOperator::Or if is_truthy(&left) => return Ok(JsonValue::Bool(true)),
                _ => {}
            }
            let right = eval_expr(right, env, compiled)?;
            binary(*op, &left, &right)
        }

        IrExpr::Unary { op, operand } => {
            let value = eval_expr(operand, env, compiled)?;
            match op {
                UnaryOperator::Not => Ok(JsonValue::Bool(!is_truthy(&value))),
                UnaryOperator::Neg => match value.as_f64() {
                    Some(n) => Ok(number_to_json(-n)),
                    None => Err(RuntimeError::new(format!(
                        "cannot negate {}",
                        type_name(&value)
                    ))),
                },
            }
        }

        IrExpr::Call { name, args } => {
            let args = args
                .iter()
                .map(|arg| eval_expr(arg, env, compiled))
                .collect::<Result<Vec<_>, _>>()?;
            call_builtin(name, &args)
        }

        IrExpr::List { items } => Ok(JsonValue::Array(
            items
                .iter()
                .map(|item| eval_expr(item, env, compiled))
                .collect::<Result<_, _>>()?,
        )),

        IrExpr::Object { entries } => {
            let mut object = Map::new();
            for (key, value) in entries {
                object.insert(key.clone(), eval_expr(value, env, compiled)?);
            }
            Ok(JsonValue::Object(object))
        }

        IrExpr::Format { parts } => render(parts, env).map(JsonValue::String),

        IrExpr::RenderPrompt { prompt } => {
            let spec = compiled
                .prompts
                .get(prompt)
                .ok_or_else(|| RuntimeError::new(format!("unknown prompt `{}`", prompt)))?;
            render(&spec.parts, env).map(JsonValue::String)
        }
    }
}

/// Interpolate format parts into a string
pub fn render(parts: &[FormatPart], env: &IndexMap<String, JsonValue>) -> Result<String, RuntimeError> {
    let mut out = String::new();
    for part in parts {
        match part {
            FormatPart::Text { text } => out.push_str(text),
            FormatPart::Path { root, path } => {
                out.push_str(&display(&resolve_path(env, root, path)?));
            }
            FormatPart::Call {
                function,
                root,
                path,
            } => {
                let arg = resolve_path(env, root, path)?;
                out.push_str(&display(&call_builtin(function, &[arg])?));
            }
        }
    }
    Ok(out)
}

fn lookup(env: &IndexMap<String, JsonValue>, name: &str) -> EvalResult {
    env.get(name)
        .cloned()
        .ok_or_else(|| RuntimeError::new(format!("undefined variable `${}`", name)))
}

fn resolve_path(env: &IndexMap<String, JsonValue>, root: &str, path: &[String]) -> EvalResult {
    let mut value = lookup(env, root)?;
    for segment in path {
        value = property_of(&value, segment);
    }
    Ok(value)
}

fn property_of(value: &JsonValue, property: &str) -> JsonValue {
    match value {
        JsonValue::Object(map) => map.get(property).cloned().unwrap_or(JsonValue::Null),
        _ => JsonValue::Null,
    }
}

/* ===================== Value Helpers ===================== */

/// `null`, `false`, zero and empty strings, lists and objects are falsy
pub fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().map_or(false, |n| n != 0.0),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(items) => !items.is_empty(),
        JsonValue::Object(map) => !map.is_empty(),
    }
}

/// Text form used by interpolation: strings unquoted, everything else JSON
pub fn display(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "list",
        JsonValue::Object(_) => "object",
    }
}

/// Equality with `1 == 1.0`
fn values_equal(left: &JsonValue, right: &JsonValue) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) if left.is_number() && right.is_number() => l == r,
        _ => left == right,
    }
}

fn binary(op: BinaryOperator, left: &JsonValue, right: &JsonValue) -> EvalResult {
    let mismatch = || {
        RuntimeError::new(format!(
            "cannot apply `{}` to {} and {}",
            op.symbol(),
            type_name(left),
            type_name(right)
        ))
    };

    match op {
        BinaryOperator::And => Ok(JsonValue::Bool(is_truthy(right))),
        BinaryOperator::Or => Ok(JsonValue::Bool(is_truthy(right))),
        BinaryOperator::Eq => Ok(JsonValue::Bool(values_equal(left, right))),
        BinaryOperator::Ne => Ok(JsonValue::Bool(!values_equal(left, right))),

        BinaryOperator::Lt | BinaryOperator::Gt | BinaryOperator::Lte | BinaryOperator::Gte => {
            let ordering = match (left, right) {
                (JsonValue::String(l), JsonValue::String(r)) => l.partial_cmp(r),
                _ => match (left.as_f64(), right.as_f64()) {
                    (Some(l), Some(r)) => l.partial_cmp(&r),
                    _ => None,
                },
            };
            let ordering = ordering.ok_or_else(mismatch)?;
            let result = match op {
                BinaryOperator::Lt => ordering.is_lt(),
                BinaryOperator::Gt => ordering.is_gt(),
                BinaryOperator::Lte => ordering.is_le(),
                _ => ordering.is_ge(),
            };
            Ok(JsonValue::Bool(result))
        }

        BinaryOperator::Contains => match left {
            JsonValue::String(haystack) => Ok(JsonValue::Bool(haystack.contains(&display(right)))),
            JsonValue::Array(items) => Ok(JsonValue::Bool(
                items.iter().any(|item| values_equal(item, right)),
            )),
            JsonValue::Object(map) => Ok(JsonValue::Bool(map.contains_key(&display(right)))),
            _ => Err(mismatch()),
        },

        BinaryOperator::Add => match (left, right) {
            (JsonValue::Array(l), JsonValue::Array(r)) => {
                Ok(JsonValue::Array(l.iter().chain(r).cloned().collect()))
            }
            (JsonValue::String(_), _) | (_, JsonValue::String(_)) => {
                Ok(JsonValue::String(format!("{}{}", display(left), display(right))))
            }
            _ => arithmetic(left, right, |l, r| l + r).ok_or_else(mismatch),
        },
        BinaryOperator::Sub => arithmetic(left, right, |l, r| l - r).ok_or_else(mismatch),
        BinaryOperator::Mul => arithmetic(left, right, |l, r| l * r).ok_or_else(mismatch),
        BinaryOperator::Div => {
            if right.as_f64() == Some(0.0) {
                return Err(RuntimeError::new("division by zero"));
            }
            arithmetic(left, right, |l, r| l / r).ok_or_else(mismatch)
        }
    }
}

fn arithmetic(left: &JsonValue, right: &JsonValue, f: impl Fn(f64, f64) -> f64) -> Option<JsonValue> {
    match (left, right) {
        (JsonValue::Number(l), JsonValue::Number(r)) => {
            Some(number_to_json(f(l.as_f64()?, r.as_f64()?)))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::hashmap;
    use serde_json::json;

    fn env() -> IndexMap<String, JsonValue> {
        hashmap! {
            "user".to_string() => json!({"name": "ada", "tags": ["a", "b"]}),
            "n".to_string() => json!(4),
        }
        .into_iter()
        .collect()
    }

    fn eval(expr: IrExpr) -> EvalResult {
        eval_expr(&expr, &env(), &CompiledUnit::new("test"))
    }

    fn bin(op: BinaryOperator, left: IrExpr, right: IrExpr) -> IrExpr {
        IrExpr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn prop(object: IrExpr, property: &str) -> IrExpr {
        IrExpr::Property {
            object: Box::new(object),
            property: property.to_string(),
        }
    }

    #[test]
    fn test_missing_property_is_null() {
        assert_eq!(eval(prop(IrExpr::var("user"), "email")).unwrap(), JsonValue::Null);
        assert_eq!(
            eval(prop(prop(IrExpr::var("user"), "email"), "domain")).unwrap(),
            JsonValue::Null
        );
    }

    #[test]
    fn test_missing_variable_is_error() {
        let err = eval(IrExpr::var("ghost")).unwrap_err();
        assert!(err.message.contains("`$ghost`"));
    }

    #[test]
    fn test_arithmetic_keeps_integers() {
        let sum = bin(BinaryOperator::Add, IrExpr::var("n"), IrExpr::constant(1));
        assert_eq!(eval(sum).unwrap(), json!(5));
        let half = bin(BinaryOperator::Div, IrExpr::var("n"), IrExpr::constant(8));
        assert_eq!(eval(half).unwrap(), json!(0.5));
    }

    #[test]
    fn test_division_by_zero() {
        let div = bin(BinaryOperator::Div, IrExpr::var("n"), IrExpr::constant(0));
        assert_eq!(eval(div).unwrap_err().message, "division by zero");
    }

    #[test]
    fn test_string_concatenation() {
        let greeting = bin(
            BinaryOperator::Add,
            IrExpr::constant("n="),
            IrExpr::var("n"),
        );
        assert_eq!(eval(greeting).unwrap(), json!("n=4"));
    }

    #[test]
    fn test_comparison_and_contains() {
        let gt = bin(BinaryOperator::Gt, IrExpr::var("n"), IrExpr::constant(3.5));
        assert_eq!(eval(gt).unwrap(), json!(true));
        let eq = bin(BinaryOperator::Eq, IrExpr::var("n"), IrExpr::constant(4.0));
        assert_eq!(eval(eq).unwrap(), json!(true));
        let has = bin(
            BinaryOperator::Contains,
            prop(IrExpr::var("user"), "tags"),
            IrExpr::constant("b"),
        );
        assert_eq!(eval(has).unwrap(), json!(true));
    }

    #[test]
    fn test_and_short_circuits() {
        let guarded = bin(
            BinaryOperator::And,
            IrExpr::constant(false),
            IrExpr::var("ghost"),
        );
        assert_eq!(eval(guarded).unwrap(), json!(false));
    }

    #[test]
    fn test_format_parts() {
        let parts = vec![
            FormatPart::Text {
                text: "hi ".into(),
            },
            FormatPart::Call {
                function: "upper".into(),
                root: "user".into(),
                path: vec!["name".into()],
            },
        ];
        assert_eq!(eval(IrExpr::Format { parts }).unwrap(), json!("hi ADA"));
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!([])));
        assert!(is_truthy(&json!({"a": 1})));
        assert!(is_truthy(&json!("no")));
    }
}
