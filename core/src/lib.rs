//! # StreetRace DSL
//!
//! Compiler for the StreetRace agent workflow language: a pest grammar and
//! AST builder, a two-pass semantic analyzer, and a code generator producing
//! a serializable [`CompiledUnit`] with a [`SourceMap`]. A small reference
//! [`executor`] runs compiled flows against a host that performs the agent
//! and LLM calls.

pub mod cli;
pub mod codegen;
pub mod compiler;
pub mod config;
pub mod diagnostics;
pub mod executor;
pub mod parser;
pub mod types;

// Re-export main types
pub use compiler::{compile, Compilation, CompileError, Compiler};
pub use config::{CompilerConfig, SuggestionMode};
pub use diagnostics::{Diagnostic, ErrorCode};
pub use types::*;
