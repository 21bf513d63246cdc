//! Collection functions

use serde_json::Value as JsonValue;

use super::{expect_args, wrong_type};
use crate::executor::expressions::{display, EvalResult};
use crate::executor::vm::RuntimeError;

/// Length of a list, string (in characters) or object
pub fn len(args: &[JsonValue]) -> EvalResult {
    let [value] = expect_args::<1>("len", args)?;
    let n = match value {
        JsonValue::Array(items) => items.len(),
        JsonValue::String(s) => s.chars().count(),
        JsonValue::Object(map) => map.len(),
        other => return Err(wrong_type("len", "a list, string or object", other)),
    };
    Ok(JsonValue::from(n))
}

fn list_arg<'a>(name: &str, value: &'a JsonValue) -> Result<&'a Vec<JsonValue>, RuntimeError> {
    value.as_array().ok_or_else(|| wrong_type(name, "a list", value))
}

/// First item, or null for an empty list
pub fn first(args: &[JsonValue]) -> EvalResult {
    let [value] = expect_args::<1>("first", args)?;
    Ok(list_arg("first", value)?.first().cloned().unwrap_or(JsonValue::Null))
}

pub fn last(args: &[JsonValue]) -> EvalResult {
    let [value] = expect_args::<1>("last", args)?;
    Ok(list_arg("last", value)?.last().cloned().unwrap_or(JsonValue::Null))
}

/// Object keys in insertion order
pub fn keys(args: &[JsonValue]) -> EvalResult {
    let [value] = expect_args::<1>("keys", args)?;
    let map = value
        .as_object()
        .ok_or_else(|| wrong_type("keys", "an object", value))?;
    Ok(JsonValue::Array(
        map.keys().map(|k| JsonValue::String(k.clone())).collect(),
    ))
}

/// `join(list)` or `join(list, separator)`; the default separator is `", "`
pub fn join(args: &[JsonValue]) -> EvalResult {
    let (list, separator) = match args {
        [list] => (list, ", "),
        [list, JsonValue::String(separator)] => (list, separator.as_str()),
        [_, other] => return Err(wrong_type("join", "a string separator", other)),
        _ => {
            return Err(RuntimeError::new(format!(
                "join() takes 1 or 2 arguments, got {}",
                args.len()
            )))
        }
    };
    let items = list_arg("join", list)?;
    Ok(JsonValue::String(
        items.iter().map(display).collect::<Vec<_>>().join(separator),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_len() {
        assert_eq!(len(&[json!([1, 2, 3])]).unwrap(), json!(3));
        assert_eq!(len(&[json!("héllo")]).unwrap(), json!(5));
        assert_eq!(len(&[json!({"a": 1})]).unwrap(), json!(1));
        assert!(len(&[json!(true)]).is_err());
    }

    #[test]
    fn test_first_and_last() {
        assert_eq!(first(&[json!(["a", "b"])]).unwrap(), json!("a"));
        assert_eq!(last(&[json!(["a", "b"])]).unwrap(), json!("b"));
        assert_eq!(first(&[json!([])]).unwrap(), JsonValue::Null);
    }

    #[test]
    fn test_keys() {
        let value: JsonValue = serde_json::from_str(r#"{"b": 1, "a": 2}"#).unwrap();
        let result = keys(&[value]).unwrap();
        assert_eq!(result.as_array().unwrap().len(), 2);
        assert!(result.as_array().unwrap().contains(&json!("a")));
    }

    #[test]
    fn test_join() {
        assert_eq!(join(&[json!(["a", 1])]).unwrap(), json!("a, 1"));
        assert_eq!(join(&[json!(["a", "b"]), json!("-")]).unwrap(), json!("a-b"));
        assert!(join(&[json!(["a"]), json!(1)]).is_err());
        assert!(join(&[]).is_err());
    }
}
