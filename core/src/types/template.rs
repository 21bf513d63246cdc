//! `${...}` interpolation in messages and prompt bodies
//!
//! A placeholder is a dotted variable path (`${user.name}`, the `$` is
//! optional) or one function call wrapping such a path (`${upper(name)}`).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum FormatPart {
    Text { text: String },
    Path { root: String, path: Vec<String> },
    Call { function: String, root: String, path: Vec<String> },
}

impl FormatPart {
    /// Variable the part reads, if any
    pub fn root(&self) -> Option<&str> {
        match self {
            FormatPart::Text { .. } => None,
            FormatPart::Path { root, .. } | FormatPart::Call { root, .. } => Some(root),
        }
    }
}

/// Placeholder that is neither a path nor a call wrapping one
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid interpolation `${{{placeholder}}}`: {reason}")]
pub struct TemplateError {
    pub placeholder: String,
    pub reason: String,
}

/// Split `text` into literal and placeholder parts.
///
/// With `strict` set, malformed placeholders are errors; otherwise they are
/// kept as literal text.
pub fn parse_template(text: &str, strict: bool) -> Result<Vec<FormatPart>, TemplateError> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut rest = text;

    while let Some(start) = rest.find("${") {
        literal.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            if strict {
                return Err(TemplateError {
                    placeholder: after.to_string(),
                    reason: "missing closing `}`".to_string(),
                });
            }
            literal.push_str(&rest[start..]);
            rest = "";
            break;
        };

        let inner = &after[..end];
        match parse_placeholder(inner) {
            Ok(part) => {
                if !literal.is_empty() {
                    parts.push(FormatPart::Text {
                        text: std::mem::take(&mut literal),
                    });
                }
                parts.push(part);
            }
            Err(reason) if strict => {
                return Err(TemplateError {
                    placeholder: inner.to_string(),
                    reason,
                })
            }
            Err(_) => literal.push_str(&rest[start..start + 2 + end + 1]),
        }
        rest = &after[end + 1..];
    }

    literal.push_str(rest);
    if !literal.is_empty() {
        parts.push(FormatPart::Text { text: literal });
    }
    Ok(parts)
}

fn parse_placeholder(inner: &str) -> Result<FormatPart, String> {
    let inner = inner.trim();
    if let Some(open) = inner.find('(') {
        let function = inner[..open].trim();
        let args = inner[open + 1..]
            .strip_suffix(')')
            .ok_or_else(|| "unbalanced parentheses".to_string())?;
        if !is_name(function) {
            return Err(format!("`{}` is not a function name", function));
        }
        let (root, path) = parse_path(args.trim())?;
        return Ok(FormatPart::Call {
            function: function.to_string(),
            root,
            path,
        });
    }
    let (root, path) = parse_path(inner)?;
    Ok(FormatPart::Path { root, path })
}

fn parse_path(raw: &str) -> Result<(String, Vec<String>), String> {
    let raw = raw.strip_prefix('$').unwrap_or(raw);
    let mut segments = raw.split('.');
    let root = segments.next().unwrap_or_default();
    if !is_name(root) {
        return Err("expected a variable path".to_string());
    }
    let path: Vec<String> = segments.map(str::to_string).collect();
    if let Some(bad) = path.iter().find(|segment| !is_name(segment)) {
        return Err(format!("`{}` is not a property name", bad));
    }
    Ok((root.to_string(), path))
}

fn is_name(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
