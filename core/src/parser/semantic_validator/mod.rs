//! Semantic analysis for StreetRace programs
//!
//! Runs after parsing to catch what the grammar can't enforce.
//!
//! # Usage
//!
//! ```ignore
//! use streetrace_dsl::parser::{parse_program, semantic_validator::analyze};
//!
//! let program = parse_program(source)?;
//! let result = analyze(&program);
//! if !result.is_valid {
//!     // report result.errors
//! }
//! ```
//!
//! # Architecture
//!
//! 1. **Pass 1** (`symbols.rs`) - collects definitions into a [`SymbolTable`],
//!    merging repeated prompts and reporting duplicates
//! 2. **Pass 2** - a [`Validator`] runs every [`ValidationRule`] against the
//!    program and the symbol table
//! 3. **Diagnostics** from both passes are accumulated, never short-circuited
//!
//! # Adding a New Rule
//!
//! 1. Create a new file in `semantic_validator/rules/`
//! 2. Implement `ValidationRule` for your struct
//! 3. Add it to the `Validator::new()` constructor

pub mod rules;
pub mod scope;
pub mod suggest;
pub mod symbols;

use tracing::{debug, instrument};

use crate::config::{CompilerConfig, SuggestionMode};
use crate::diagnostics::{Diagnostic, ErrorCode};
use crate::types::ast::{Program, SourcePosition};

pub use scope::{ScopeArena, ScopeId, ScopeType, SymbolKind, BUILTIN_VARIABLES};
pub use suggest::{NoSuggestion, PrefixSuggestion, SuggestionStrategy};
pub use symbols::{collect_symbols, DefinitionKind, MergedPrompts, SymbolTable};

// ============================================================================
// Rule Context
// ============================================================================

/// Everything a rule may look at
pub struct RuleContext<'a> {
    pub program: &'a Program,
    pub symbols: &'a SymbolTable,
    pub suggester: &'a dyn SuggestionStrategy,
}

impl<'a> RuleContext<'a> {
    /// E0001 for a name missing from `kind`'s bucket, with a suggestion
    pub fn undefined(
        &self,
        kind: DefinitionKind,
        name: &str,
        position: Option<SourcePosition>,
    ) -> Diagnostic {
        let candidates = self.symbols.names(kind);
        Diagnostic::new(
            ErrorCode::E0001,
            format!("undefined {} `{}`", kind, name),
        )
        .at(position)
        .with_optional_help(self.suggester.suggest(kind.as_str(), name, &candidates))
    }

    /// Check that `name` resolves in `kind`'s bucket
    pub fn require(
        &self,
        kind: DefinitionKind,
        name: &str,
        position: Option<SourcePosition>,
        errors: &mut Vec<Diagnostic>,
    ) {
        if !self.symbols.contains(kind, name) {
            errors.push(self.undefined(kind, name, position));
        }
    }
}

// ============================================================================
// ValidationRule Trait
// ============================================================================

/// Trait that all validation rules must implement.
///
/// Each rule checks one aspect of the program and must not depend on other
/// rules' results.
pub trait ValidationRule: Send + Sync {
    /// Unique identifier for this rule (e.g., "agent-references")
    fn id(&self) -> &'static str;

    /// Human-readable description of what this rule checks
    fn description(&self) -> &'static str;

    /// Run the validation and return any problems found.
    fn validate(&self, ctx: &RuleContext<'_>) -> Vec<Diagnostic>;
}

// ============================================================================
// Validator - Runs All Rules
// ============================================================================

/// Runs the pass-2 rules in sequence.
pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    /// Create a new validator with all built-in rules.
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(rules::PromptReferencesRule),
                Box::new(rules::AgentReferencesRule),
                Box::new(rules::SchemaFieldTypesRule),
                Box::new(rules::ToolConfigRule),
                Box::new(rules::FlowScopesRule),
            ],
        }
    }

    pub fn validate(&self, ctx: &RuleContext<'_>) -> Vec<Diagnostic> {
        self.rules
            .iter()
            .flat_map(|rule| {
                let found = rule.validate(ctx);
                debug!(rule = rule.id(), errors = found.len(), "rule finished");
                found
            })
            .collect()
    }

    /// Registered rules as `(id, description)` pairs
    pub fn rules(&self) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.rules.iter().map(|r| (r.id(), r.description()))
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Analyzer
// ============================================================================

/// Outcome of [`analyze`]
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub is_valid: bool,
    pub errors: Vec<Diagnostic>,
    pub symbols: SymbolTable,
}

/// Two-pass analyzer. Holds no state between programs.
pub struct Analyzer {
    validator: Validator,
    require_version: bool,
    suggester: Box<dyn SuggestionStrategy>,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyzer {
    pub fn new() -> Self {
        Self {
            validator: Validator::new(),
            require_version: false,
            suggester: Box::new(PrefixSuggestion),
        }
    }

    pub fn from_config(config: &CompilerConfig) -> Self {
        let suggester: Box<dyn SuggestionStrategy> = match config.suggestions {
            SuggestionMode::Prefix => Box::new(PrefixSuggestion),
            SuggestionMode::Off => Box::new(NoSuggestion),
        };
        Self {
            validator: Validator::new(),
            require_version: config.require_version,
            suggester,
        }
    }

    pub fn with_suggester(mut self, suggester: Box<dyn SuggestionStrategy>) -> Self {
        self.suggester = suggester;
        self
    }

    #[instrument(skip_all, fields(items = program.items.len()))]
    pub fn analyze(&self, program: &Program) -> AnalysisResult {
        let (symbols, mut errors) = collect_symbols(program, self.require_version);

        let ctx = RuleContext {
            program,
            symbols: &symbols,
            suggester: self.suggester.as_ref(),
        };
        errors.extend(self.validator.validate(&ctx));

        debug!(errors = errors.len(), "analysis finished");
        AnalysisResult {
            is_valid: errors.is_empty(),
            errors,
            symbols,
        }
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Analyze a program with the default settings.
pub fn analyze(program: &Program) -> AnalysisResult {
    Analyzer::new().analyze(program)
}
