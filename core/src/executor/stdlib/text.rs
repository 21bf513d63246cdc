//! String functions

use serde_json::Value as JsonValue;

use super::{expect_args, wrong_type};
use crate::executor::expressions::{display, EvalResult};
use crate::executor::vm::RuntimeError;

fn string_arg<'a>(name: &str, args: &'a [JsonValue]) -> Result<&'a str, RuntimeError> {
    let [value] = expect_args::<1>(name, args)?;
    value.as_str().ok_or_else(|| wrong_type(name, "a string", value))
}

pub fn upper(args: &[JsonValue]) -> EvalResult {
    Ok(JsonValue::String(string_arg("upper", args)?.to_uppercase()))
}

pub fn lower(args: &[JsonValue]) -> EvalResult {
    Ok(JsonValue::String(string_arg("lower", args)?.to_lowercase()))
}

pub fn trim(args: &[JsonValue]) -> EvalResult {
    Ok(JsonValue::String(string_arg("trim", args)?.trim().to_string()))
}

/// Interpolation text of any value
pub fn stringify(args: &[JsonValue]) -> EvalResult {
    let [value] = expect_args::<1>("str", args)?;
    Ok(JsonValue::String(display(value)))
}
