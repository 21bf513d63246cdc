//! Compilation pipeline
//!
//! Source text → [`parse_program`] → [`Analyzer`] → [`generate`]. Parse and
//! lowering failures stop the pipeline at once; semantic diagnostics are
//! collected over the whole program and returned together.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, instrument};

use crate::codegen::{generate, LoweringError};
use crate::config::CompilerConfig;
use crate::diagnostics::Diagnostic;
use crate::parser::semantic_validator::Analyzer;
use crate::parser::{parse_program, SyntaxError};
use crate::types::ir::CompiledUnit;
use crate::types::source_map::SourceMap;

/// Successful compiler output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Compilation {
    pub unit: CompiledUnit,
    pub source_map: SourceMap,
}

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error("{} semantic error(s)", .0.len())]
    Semantic(Vec<Diagnostic>),

    #[error(transparent)]
    Lowering(#[from] LoweringError),
}

impl CompileError {
    /// Every problem as a positioned diagnostic; never empty
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        match self {
            CompileError::Syntax(err) => vec![err.to_diagnostic()],
            CompileError::Semantic(errors) => errors.clone(),
            CompileError::Lowering(err) => vec![err.to_diagnostic()],
        }
    }
}

/// Reusable compiler. Keeps no state between sources.
#[derive(Default)]
pub struct Compiler {
    analyzer: Analyzer,
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &CompilerConfig) -> Self {
        Self {
            analyzer: Analyzer::from_config(config),
        }
    }

    /// Compile `source`; `source_name` only labels diagnostics and the output
    #[instrument(skip(self, source), fields(bytes = source.len()))]
    pub fn compile(&self, source: &str, source_name: &str) -> Result<Compilation, CompileError> {
        let program = parse_program(source)?;

        let analysis = self.analyzer.analyze(&program);
        if !analysis.is_valid {
            return Err(CompileError::Semantic(analysis.errors));
        }

        let (mut unit, source_map) =
            generate(&program, source_name, analysis.symbols.merged_prompts())?;
        unit.source_hash = Some(hash_source(source));

        info!(
            flows = unit.flows.len(),
            handlers = unit.handlers.len(),
            "compiled"
        );
        Ok(Compilation { unit, source_map })
    }
}

/// Compile with the default settings
pub fn compile(source: &str, source_name: &str) -> Result<Compilation, CompileError> {
    Compiler::new().compile(source, source_name)
}

/// Hash source using SHA256
fn hash_source(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SuggestionMode;
    use crate::diagnostics::ErrorCode;

    const SOURCE: &str = r#"streetrace v1

model main = anthropic/claude-sonnet

prompt greet: "Say hello to ${input_prompt}"

agent:
    instruction greet

flow main:
    $reply = run agent default with $input_prompt
    return $reply
"#;

    #[test]
    fn test_compile_success() {
        let compilation = compile(SOURCE, "hello.sr").unwrap();
        assert_eq!(compilation.unit.source_name, "hello.sr");
        assert_eq!(compilation.unit.version.as_deref(), Some("v1"));
        assert!(compilation.unit.flow("main").is_some());
        assert!(!compilation.source_map.is_empty());
    }

    #[test]
    fn test_source_hash_is_stable() {
        let a = compile(SOURCE, "a.sr").unwrap();
        let b = compile(SOURCE, "b.sr").unwrap();
        let hash = a.unit.source_hash.clone().unwrap();
        assert_eq!(hash.len(), 64);
        assert_eq!(a.unit.source_hash, b.unit.source_hash);

        let changed = compile(&SOURCE.replace("hello", "hi"), "a.sr").unwrap();
        assert_ne!(changed.unit.source_hash, a.unit.source_hash);
    }

    #[test]
    fn test_syntax_error_stops_pipeline() {
        let err = compile("flow main:\n    $x = \n", "bad.sr").unwrap_err();
        assert!(matches!(err, CompileError::Syntax(_)));
        let diagnostics = err.diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].code, ErrorCode::E0100);
        assert_eq!(diagnostics[0].position.map(|p| p.line), Some(2));
    }

    #[test]
    fn test_semantic_errors_accumulate() {
        let source = r#"
prompt a: "x"
prompt a: "y"

flow main:
    return $missing
"#;
        let err = compile(source, "bad.sr").unwrap_err();
        let codes: Vec<_> = err.diagnostics().iter().map(|d| d.code).collect();
        assert!(codes.contains(&ErrorCode::E0003));
        assert!(matches!(err, CompileError::Semantic(ref errors) if errors.len() >= 1));
    }

    #[test]
    fn test_lowering_error_is_fatal() {
        let err = compile("flow main:\n    continue\n", "bad.sr").unwrap_err();
        assert!(matches!(err, CompileError::Lowering(_)));
        assert_eq!(err.diagnostics()[0].code, ErrorCode::E0200);
    }

    #[test]
    fn test_config_requires_version() {
        let config = CompilerConfig {
            require_version: true,
            suggestions: SuggestionMode::Off,
            ..Default::default()
        };
        let err = Compiler::from_config(&config)
            .compile("flow main:\n    return 1\n", "x.sr")
            .unwrap_err();
        assert_eq!(err.diagnostics()[0].code, ErrorCode::E0011);
    }

    #[test]
    fn test_compilation_json_roundtrip() {
        let compilation = compile(SOURCE, "hello.sr").unwrap();
        let json = serde_json::to_string(&compilation).unwrap();
        let back: Compilation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, compilation);
    }
}
