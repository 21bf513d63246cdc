//! Compiler diagnostics
//!
//! Every problem the compiler reports carries a stable [`ErrorCode`]. Semantic
//! diagnostics are accumulated; syntax and lowering failures are fatal and are
//! converted into a single diagnostic by `CompileError::diagnostics`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::ast::SourcePosition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Undefined reference (prompt, model, schema, tool, agent, flow, policy)
    E0001,
    /// Duplicate definition
    E0002,
    /// Undefined variable
    E0003,
    /// Missing required property
    E0010,
    /// Unsupported or missing version
    E0011,
    /// Unknown schema field type
    E0012,
    /// Prompt has no body
    E0013,
    /// Conflicting prompt modifiers
    E0014,
    /// Syntax error
    E0100,
    /// Lowering error
    E0200,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::E0001 => "E0001",
            ErrorCode::E0002 => "E0002",
            ErrorCode::E0003 => "E0003",
            ErrorCode::E0010 => "E0010",
            ErrorCode::E0011 => "E0011",
            ErrorCode::E0012 => "E0012",
            ErrorCode::E0013 => "E0013",
            ErrorCode::E0014 => "E0014",
            ErrorCode::E0100 => "E0100",
            ErrorCode::E0200 => "E0200",
        }
    }

    pub fn summary(&self) -> &'static str {
        match self {
            ErrorCode::E0001 => "undefined reference",
            ErrorCode::E0002 => "duplicate definition",
            ErrorCode::E0003 => "undefined variable",
            ErrorCode::E0010 => "missing required property",
            ErrorCode::E0011 => "unsupported version",
            ErrorCode::E0012 => "unknown field type",
            ErrorCode::E0013 => "missing prompt body",
            ErrorCode::E0014 => "conflicting prompt modifiers",
            ErrorCode::E0100 => "syntax error",
            ErrorCode::E0200 => "lowering error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single reported problem.
///
/// Independent of any output format so both the CLI and embedding hosts can
/// render it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<SourcePosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
}

impl Diagnostic {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            position: None,
            help: None,
        }
    }

    pub fn at(mut self, position: Option<SourcePosition>) -> Self {
        self.position = position;
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Attach help only when there is some
    pub fn with_optional_help(mut self, help: Option<String>) -> Self {
        self.help = help;
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.position {
            Some(pos) => write!(
                f,
                "error[{}] at line {}, col {}: {}",
                self.code, pos.line, pos.column, self.message
            )?,
            None => write!(f, "error[{}]: {}", self.code, self.message)?,
        }
        if let Some(help) = &self.help {
            write!(f, "\n  help: {}", help)?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_position_and_help() {
        let diag = Diagnostic::new(ErrorCode::E0013, "prompt `greet` has no body")
            .at(Some(SourcePosition::new(3, 1)))
            .with_help("add a body");
        assert_eq!(
            diag.to_string(),
            "error[E0013] at line 3, col 1: prompt `greet` has no body\n  help: add a body"
        );
    }

    #[test]
    fn test_display_without_position() {
        let diag = Diagnostic::new(ErrorCode::E0011, "missing version header");
        assert_eq!(diag.to_string(), "error[E0011]: missing version header");
    }

    #[test]
    fn test_code_serializes_as_name() {
        let json = serde_json::to_string(&ErrorCode::E0200).unwrap();
        assert_eq!(json, "\"E0200\"");
    }
}
