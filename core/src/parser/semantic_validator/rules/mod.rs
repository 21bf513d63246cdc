//! Validation Rules
//!
//! Each file in this module contains one validation rule:
//!
//! - `prompt_references.rs` - prompt `using model` / `expecting` targets exist
//! - `agent_references.rs` - agent properties point at real definitions
//! - `schema_types.rs` - schema field types are known
//! - `tool_config.rs` - tools carry the properties their kind needs
//! - `flow_scopes.rs` - variables and run/call targets inside flows and handlers

mod agent_references;
mod flow_scopes;
mod prompt_references;
mod schema_types;
mod tool_config;

pub use agent_references::AgentReferencesRule;
pub use flow_scopes::FlowScopesRule;
pub use prompt_references::PromptReferencesRule;
pub use schema_types::SchemaFieldTypesRule;
pub use tool_config::ToolConfigRule;
