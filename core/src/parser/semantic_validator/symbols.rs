//! Pass 1: symbol collection
//!
//! Walks the top-level items once, filling one insertion-ordered bucket per
//! definition kind. Repeated prompt names merge; every other repeated name is
//! a duplicate-definition error and the first definition is kept.

use indexmap::IndexMap;
use std::fmt;
use tracing::debug;

use crate::diagnostics::{Diagnostic, ErrorCode};
use crate::types::ast::{
    AgentDef, FlowDef, ModelDef, Program, PromptDef, RetryPolicyDef, SchemaDef, SourcePosition,
    TimeoutPolicyDef, ToolDef, TopLevel,
};

/// Only supported major language version
pub const SUPPORTED_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefinitionKind {
    Model,
    Schema,
    Tool,
    Prompt,
    Agent,
    Flow,
    RetryPolicy,
    TimeoutPolicy,
}

impl DefinitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DefinitionKind::Model => "model",
            DefinitionKind::Schema => "schema",
            DefinitionKind::Tool => "tool",
            DefinitionKind::Prompt => "prompt",
            DefinitionKind::Agent => "agent",
            DefinitionKind::Flow => "flow",
            DefinitionKind::RetryPolicy => "retry policy",
            DefinitionKind::TimeoutPolicy => "timeout policy",
        }
    }
}

impl fmt::Display for DefinitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    pub models: IndexMap<String, ModelDef>,
    pub schemas: IndexMap<String, SchemaDef>,
    pub tools: IndexMap<String, ToolDef>,
    prompts: IndexMap<String, PromptDef>,
    pub agents: IndexMap<String, AgentDef>,
    pub flows: IndexMap<String, FlowDef>,
    pub retry_policies: IndexMap<String, RetryPolicyDef>,
    pub timeout_policies: IndexMap<String, TimeoutPolicyDef>,
}

impl SymbolTable {
    /// Merged prompt definitions; the only way to hand prompts to codegen
    pub fn merged_prompts(&self) -> MergedPrompts<'_> {
        MergedPrompts {
            prompts: &self.prompts,
        }
    }

    pub fn prompt(&self, name: &str) -> Option<&PromptDef> {
        self.prompts.get(name)
    }

    pub fn contains(&self, kind: DefinitionKind, name: &str) -> bool {
        match kind {
            DefinitionKind::Model => self.models.contains_key(name),
            DefinitionKind::Schema => self.schemas.contains_key(name),
            DefinitionKind::Tool => self.tools.contains_key(name),
            DefinitionKind::Prompt => self.prompts.contains_key(name),
            DefinitionKind::Agent => self.agents.contains_key(name),
            DefinitionKind::Flow => self.flows.contains_key(name),
            DefinitionKind::RetryPolicy => self.retry_policies.contains_key(name),
            DefinitionKind::TimeoutPolicy => self.timeout_policies.contains_key(name),
        }
    }

    /// Defined names of one kind, in definition order
    pub fn names(&self, kind: DefinitionKind) -> Vec<&str> {
        fn keys<V>(map: &IndexMap<String, V>) -> Vec<&str> {
            map.keys().map(String::as_str).collect()
        }
        match kind {
            DefinitionKind::Model => keys(&self.models),
            DefinitionKind::Schema => keys(&self.schemas),
            DefinitionKind::Tool => keys(&self.tools),
            DefinitionKind::Prompt => keys(&self.prompts),
            DefinitionKind::Agent => keys(&self.agents),
            DefinitionKind::Flow => keys(&self.flows),
            DefinitionKind::RetryPolicy => keys(&self.retry_policies),
            DefinitionKind::TimeoutPolicy => keys(&self.timeout_policies),
        }
    }

    fn position_of(&self, kind: DefinitionKind, name: &str) -> Option<SourcePosition> {
        match kind {
            DefinitionKind::Model => self.models.get(name).and_then(|d| d.position),
            DefinitionKind::Schema => self.schemas.get(name).and_then(|d| d.position),
            DefinitionKind::Tool => self.tools.get(name).and_then(|d| d.position),
            DefinitionKind::Prompt => self.prompts.get(name).and_then(|d| d.position),
            DefinitionKind::Agent => self.agents.get(name).and_then(|d| d.position),
            DefinitionKind::Flow => self.flows.get(name).and_then(|d| d.position),
            DefinitionKind::RetryPolicy => self.retry_policies.get(name).and_then(|d| d.position),
            DefinitionKind::TimeoutPolicy => {
                self.timeout_policies.get(name).and_then(|d| d.position)
            }
        }
    }
}

/// Read-only view of the merged prompts of a [`SymbolTable`]
#[derive(Debug, Clone, Copy)]
pub struct MergedPrompts<'a> {
    prompts: &'a IndexMap<String, PromptDef>,
}

impl<'a> MergedPrompts<'a> {
    pub fn get(&self, name: &str) -> Option<&'a PromptDef> {
        self.prompts.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a PromptDef)> {
        self.prompts.iter().map(|(name, def)| (name.as_str(), def))
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}

/// Run pass 1 over `program`
pub fn collect_symbols(program: &Program, require_version: bool) -> (SymbolTable, Vec<Diagnostic>) {
    let mut collector = Collector::default();

    for item in &program.items {
        match item {
            TopLevel::Version(decl) => collector.check_version(&decl.version, decl.position),
            TopLevel::Import(_) => {}
            TopLevel::Model(def) => {
                collector.insert(DefinitionKind::Model, &def.name, def.position, |t| &mut t.models, def)
            }
            TopLevel::Schema(def) => collector.insert(
                DefinitionKind::Schema,
                &def.name,
                def.position,
                |t| &mut t.schemas,
                def,
            ),
            TopLevel::Tool(def) => {
                collector.insert(DefinitionKind::Tool, &def.name, def.position, |t| &mut t.tools, def)
            }
            TopLevel::RetryPolicy(def) => collector.insert(
                DefinitionKind::RetryPolicy,
                &def.name,
                def.position,
                |t| &mut t.retry_policies,
                def,
            ),
            TopLevel::TimeoutPolicy(def) => collector.insert(
                DefinitionKind::TimeoutPolicy,
                &def.name,
                def.position,
                |t| &mut t.timeout_policies,
                def,
            ),
            TopLevel::Prompt(def) => collector.merge_prompt(def),
            TopLevel::Agent(def) => {
                let mut agent = def.clone();
                let name = agent.resolved_name().to_string();
                agent.name = Some(name.clone());
                collector.insert(DefinitionKind::Agent, &name, def.position, |t| &mut t.agents, &agent)
            }
            TopLevel::Flow(def) => {
                collector.insert(DefinitionKind::Flow, &def.name, def.position, |t| &mut t.flows, def)
            }
            TopLevel::Handler(_) => {}
        }
    }

    if program.version().is_none() && require_version {
        collector.errors.push(
            Diagnostic::new(ErrorCode::E0011, "missing version header")
                .with_help(format!("start the file with `streetrace v{}`", SUPPORTED_VERSION)),
        );
    }

    collector.check_prompt_bodies();

    debug!(
        prompts = collector.table.prompts.len(),
        agents = collector.table.agents.len(),
        flows = collector.table.flows.len(),
        errors = collector.errors.len(),
        "collected symbols"
    );
    (collector.table, collector.errors)
}

#[derive(Default)]
struct Collector {
    table: SymbolTable,
    errors: Vec<Diagnostic>,
}

impl Collector {
    fn insert<T: Clone>(
        &mut self,
        kind: DefinitionKind,
        name: &str,
        position: Option<SourcePosition>,
        bucket: impl Fn(&mut SymbolTable) -> &mut IndexMap<String, T>,
        def: &T,
    ) {
        if bucket(&mut self.table).contains_key(name) {
            let mut diag = Diagnostic::new(
                ErrorCode::E0002,
                format!("duplicate {} definition `{}`", kind, name),
            )
            .at(position);
            if let Some(first) = self.table.position_of(kind, name) {
                diag = diag.with_help(format!("first defined at line {}", first.line));
            }
            self.errors.push(diag);
            return;
        }
        bucket(&mut self.table).insert(name.to_string(), def.clone());
    }

    fn check_version(&mut self, version: &str, position: Option<SourcePosition>) {
        let major = version
            .trim_start_matches('v')
            .split('.')
            .next()
            .and_then(|major| major.parse::<u32>().ok());
        if major != Some(SUPPORTED_VERSION) {
            self.errors.push(
                Diagnostic::new(
                    ErrorCode::E0011,
                    format!("unsupported version `{}`", version),
                )
                .at(position)
                .with_help(format!("supported version: v{}", SUPPORTED_VERSION)),
            );
        }
    }

    /// Fold one prompt occurrence into the merged definition
    fn merge_prompt(&mut self, incoming: &PromptDef) {
        let Some(merged) = self.table.prompts.get_mut(&incoming.name) else {
            self.table
                .prompts
                .insert(incoming.name.clone(), incoming.clone());
            return;
        };

        if !incoming.body.trim().is_empty() {
            merged.body = incoming.body.clone();
        }

        let name = incoming.name.as_str();
        let position = incoming.position;
        merge_modifier(
            name,
            "model",
            &mut merged.model,
            &incoming.model,
            position,
            &mut self.errors,
        );
        merge_modifier(
            name,
            "expecting",
            &mut merged.expecting,
            &incoming.expecting,
            position,
            &mut self.errors,
        );
        merge_modifier(
            name,
            "inherit",
            &mut merged.inherit,
            &incoming.inherit,
            position,
            &mut self.errors,
        );
        merge_modifier(
            name,
            "escalation condition",
            &mut merged.escalation,
            &incoming.escalation,
            position,
            &mut self.errors,
        );
    }

    /// E0013 once per prompt whose merged body is still empty
    fn check_prompt_bodies(&mut self) {
        for (name, prompt) in &self.table.prompts {
            if prompt.body.trim().is_empty() {
                self.errors.push(
                    Diagnostic::new(ErrorCode::E0013, format!("prompt `{}` has no body", name))
                        .at(prompt.position)
                        .with_help(format!("add a body: prompt {}: \"\"\"...\"\"\"", name)),
                );
            }
        }
    }
}

fn merge_modifier<T: Clone + PartialEq + fmt::Display>(
    prompt: &str,
    field: &str,
    current: &mut Option<T>,
    incoming: &Option<T>,
    position: Option<SourcePosition>,
    errors: &mut Vec<Diagnostic>,
) {
    let Some(value) = incoming else {
        return;
    };
    match current {
        None => *current = Some(value.clone()),
        Some(existing) if existing != value => {
            let message = format!(
                "conflicting {} for prompt `{}`: `{}` vs `{}`",
                field, prompt, existing, value
            );
            // Same pair from a later definition
            if errors
                .iter()
                .any(|d| d.code == ErrorCode::E0014 && d.message == message)
            {
                return;
            }
            errors.push(
                Diagnostic::new(ErrorCode::E0014, message)
                    .at(position)
                    .with_help("declare each modifier on one definition only"),
            );
        }
        Some(_) => {}
    }
}
