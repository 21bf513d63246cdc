//! PEST-based parser for the StreetRace DSL
//!
//! `parse_tree` exposes the raw, position-annotated parse tree; `parse_program`
//! runs the AST builder over it and returns a typed [`Program`].

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::diagnostics::{Diagnostic, ErrorCode};
use crate::types::ast::{Program, SourcePosition};

mod builder;
pub mod semantic_validator;

#[cfg(test)]
mod tests;

/* ===================== PEST Parser ===================== */

#[derive(Parser)]
#[grammar = "parser/streetrace.pest"]
pub struct DslParser;

/* ===================== Error Types ===================== */

/// Fatal parse failure at the furthest position the grammar could reach
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("syntax error at line {line}, column {column}: {message}")]
pub struct SyntaxError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl SyntaxError {
    pub(crate) fn at(position: SourcePosition, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: position.line,
            column: position.column,
        }
    }

    pub fn position(&self) -> SourcePosition {
        SourcePosition::new(self.line, self.column)
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::new(ErrorCode::E0100, self.message.clone()).at(Some(self.position()))
    }
}

impl From<pest::error::Error<Rule>> for SyntaxError {
    fn from(err: pest::error::Error<Rule>) -> Self {
        let err = err.renamed_rules(describe_rule);
        let (line, column) = match &err.line_col {
            pest::error::LineColLocation::Pos(pos) => *pos,
            pest::error::LineColLocation::Span(start, _) => *start,
        };
        SyntaxError {
            message: err.variant.message().into_owned(),
            line,
            column,
        }
    }
}

pub type ParseResult<T> = Result<T, SyntaxError>;

/// Human-readable rule names for pest's "expected ..." messages
fn describe_rule(rule: &Rule) -> String {
    match rule {
        Rule::EOI => "end of input".to_string(),
        Rule::top_item | Rule::top_line => "top-level definition".to_string(),
        Rule::stmt_line | Rule::statement | Rule::block => "statement".to_string(),
        Rule::end_line => "`end`".to_string(),
        Rule::expression | Rule::or_expr => "expression".to_string(),
        Rule::string | Rule::triple_string => "string".to_string(),
        Rule::variable => "variable".to_string(),
        other => {
            let name = format!("{:?}", other);
            match name.strip_prefix("kw_") {
                Some(keyword) => format!("`{}`", keyword),
                None => name.replace('_', " "),
            }
        }
    }
}

/* ===================== Position Helpers ===================== */

/// 1-based line/column of the start of a pair
pub(crate) fn position_of(pair: &Pair<'_, Rule>) -> SourcePosition {
    let (line, column) = pair.as_span().start_pos().line_col();
    SourcePosition::new(line, column)
}

/* ===================== Parse Tree ===================== */

/// Generic parse-tree node, one per non-silent grammar rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseNode {
    pub rule: String,
    /// Matched text; only filled for leaves
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    pub position: SourcePosition,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ParseNode>,
}

impl ParseNode {
    fn from_pair(pair: Pair<'_, Rule>) -> Self {
        let rule = format!("{:?}", pair.as_rule());
        let position = position_of(&pair);
        let text = pair.as_str().to_string();
        let children: Vec<ParseNode> = pair.into_inner().map(ParseNode::from_pair).collect();
        ParseNode {
            rule,
            text: if children.is_empty() { text } else { String::new() },
            position,
            children,
        }
    }

    /// Depth-first search for the first node produced by `rule`
    pub fn find(&self, rule: &str) -> Option<&ParseNode> {
        if self.rule == rule {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(rule))
    }
}

/// Parse source text into a position-annotated parse tree
pub fn parse_tree(source: &str) -> ParseResult<ParseNode> {
    let mut pairs = DslParser::parse(Rule::program, source)?;
    let root = pairs
        .next()
        .ok_or_else(|| SyntaxError::at(SourcePosition::new(1, 1), "empty parse result"))?;
    Ok(ParseNode::from_pair(root))
}

/// Parse source text into the typed AST
#[instrument(skip(source), fields(bytes = source.len()))]
pub fn parse_program(source: &str) -> ParseResult<Program> {
    let mut pairs = DslParser::parse(Rule::program, source)?;
    let root = pairs
        .next()
        .ok_or_else(|| SyntaxError::at(SourcePosition::new(1, 1), "empty parse result"))?;
    let program = builder::build_program(root)?;
    debug!(items = program.items.len(), "parsed program");
    Ok(program)
}
