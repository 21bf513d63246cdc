//! Built-in functions
//!
//! Callable from expressions (`len($items)`) and from interpolation
//! placeholders (`${upper(name)}`).

pub mod list;
pub mod text;

use serde_json::Value as JsonValue;

use super::expressions::EvalResult;
use super::vm::RuntimeError;

/// Names the executor can call
pub const BUILTIN_FUNCTIONS: [&str; 9] = [
    "len", "upper", "lower", "trim", "str", "join", "first", "last", "keys",
];

/* ===================== Dispatcher ===================== */

/// Call a built-in function with evaluated arguments
pub fn call_builtin(name: &str, args: &[JsonValue]) -> EvalResult {
    match name {
        "len" => list::len(args),
        "first" => list::first(args),
        "last" => list::last(args),
        "keys" => list::keys(args),
        "join" => list::join(args),
        "upper" => text::upper(args),
        "lower" => text::lower(args),
        "trim" => text::trim(args),
        "str" => text::stringify(args),
        other => Err(RuntimeError::new(format!("unknown function `{}`", other))),
    }
}

/* ===================== Argument Helpers ===================== */

/// Exactly `N` arguments
pub(crate) fn expect_args<'a, const N: usize>(
    name: &str,
    args: &'a [JsonValue],
) -> Result<&'a [JsonValue; N], RuntimeError> {
    args.try_into().map_err(|_| {
        RuntimeError::new(format!(
            "{}() takes {} argument{}, got {}",
            name,
            N,
            if N == 1 { "" } else { "s" },
            args.len()
        ))
    })
}

pub(crate) fn wrong_type(name: &str, expected: &str, got: &JsonValue) -> RuntimeError {
    RuntimeError::new(format!(
        "{}() expects {}, got {}",
        name,
        expected,
        super::expressions::type_name(got)
    ))
}
