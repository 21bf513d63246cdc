//! Rule: Flow Scopes
//!
//! Walks flow and handler bodies in nested lexical scopes and reports
//! variables used before they are defined, plus `run`/`call` targets that do
//! not resolve.
//!
//! ```streetrace
//! # Error: `$plan` is only defined inside the `if` block
//! flow main:
//!     if $ready:
//!         $plan = run agent planner
//!     end
//!     return $plan
//! ```
//!
//! Walk order matters: `on start` handlers run in the global scope first, so
//! what they assign is visible everywhere. Each flow then gets its own scope
//! seeded with its parameters, and every other handler gets a fresh one.

use crate::diagnostics::{Diagnostic, ErrorCode};
use crate::types::ast::{strip_sigil, EscalationAction, Expr, RunTarget, SourcePosition, Stmt};
use crate::types::template::parse_template;

use super::super::scope::{ScopeArena, ScopeId, ScopeType, SymbolKind};
use super::super::{DefinitionKind, RuleContext, ValidationRule};

pub struct FlowScopesRule;

impl ValidationRule for FlowScopesRule {
    fn id(&self) -> &'static str {
        "flow-scopes"
    }

    fn description(&self) -> &'static str {
        "Variables must be defined before use; run and call targets must exist"
    }

    fn validate(&self, ctx: &RuleContext<'_>) -> Vec<Diagnostic> {
        let mut walker = ScopeWalker {
            ctx,
            arena: ScopeArena::new(),
            errors: Vec::new(),
        };
        let global = walker.arena.global();

        for handler in ctx.program.handlers().filter(|h| h.is_on_start()) {
            walker.check_body(&handler.body, global);
        }

        for flow in ctx.program.flows() {
            let scope = walker.arena.push(ScopeType::Flow, global);
            for param in &flow.params {
                walker
                    .arena
                    .define(scope, strip_sigil(param), SymbolKind::Parameter, flow.position);
            }
            walker.check_body(&flow.body, scope);
        }

        for handler in ctx.program.handlers().filter(|h| !h.is_on_start()) {
            let scope = walker.arena.push(ScopeType::Handler, global);
            walker.check_body(&handler.body, scope);
        }

        walker.errors
    }
}

// ============================================================================
// AST Traversal
// ============================================================================

struct ScopeWalker<'a, 'c> {
    ctx: &'a RuleContext<'c>,
    arena: ScopeArena,
    errors: Vec<Diagnostic>,
}

impl<'a, 'c> ScopeWalker<'a, 'c> {
    fn check_body(&mut self, body: &[Stmt], scope: ScopeId) {
        for stmt in body {
            self.check_stmt(stmt, scope);
        }
    }

    /// Check `body` in a fresh BLOCK scope under `parent`
    fn check_block(&mut self, body: &[Stmt], parent: ScopeId) {
        let block = self.arena.push(ScopeType::Block, parent);
        self.check_body(body, block);
    }

    fn define(&mut self, scope: ScopeId, name: &str, position: Option<SourcePosition>) {
        self.arena
            .define(scope, strip_sigil(name), SymbolKind::Variable, position);
    }

    fn require_variable(&mut self, scope: ScopeId, name: &str, position: Option<SourcePosition>) {
        let bare = strip_sigil(name);
        if self.arena.lookup(scope, bare).is_some() {
            return;
        }
        let visible = self.arena.visible_names(scope);
        let help = self.ctx.suggester.suggest("variable", bare, &visible);
        self.errors.push(
            Diagnostic::new(ErrorCode::E0003, format!("undefined variable `${}`", bare))
                .at(position)
                .with_optional_help(help),
        );
    }

    fn require(&mut self, kind: DefinitionKind, name: &str, position: Option<SourcePosition>) {
        self.ctx.require(kind, name, position, &mut self.errors);
    }

    fn check_stmt(&mut self, stmt: &Stmt, scope: ScopeId) {
        match stmt {
            Stmt::Assignment {
                target,
                value,
                position,
            } => {
                // Value first: `$x = $x + 1` needs an earlier `$x`
                self.check_expr(value, scope);
                self.define(scope, target, *position);
            }

            Stmt::PropertyAssignment {
                target,
                value,
                position,
                ..
            } => {
                self.require_variable(scope, target, *position);
                self.check_expr(value, scope);
            }

            Stmt::Run(run) => {
                let symbols = self.ctx.symbols;
                let agent = match &run.target {
                    RunTarget::Agent(name) => {
                        self.require(DefinitionKind::Agent, name, run.position);
                        symbols.agents.get(name)
                    }
                    RunTarget::Flow(name) if symbols.flows.contains_key(name) => None,
                    RunTarget::Flow(name) => match symbols.agents.get(name) {
                        Some(agent) => Some(agent),
                        None => {
                            self.require(DefinitionKind::Flow, name, run.position);
                            None
                        }
                    },
                };

                for input in &run.input {
                    self.check_expr(input, scope);
                }
                if let Some(EscalationAction::Return { value }) = &run.on_escalate {
                    self.check_expr(value, scope);
                }

                match (&run.assign_to, agent.and_then(|a| a.produces.as_ref())) {
                    (Some(target), _) => self.define(scope, target, run.position),
                    (None, Some(produced)) => self.define(scope, produced, run.position),
                    (None, None) => {}
                }
            }

            Stmt::Call(call) => {
                self.require(DefinitionKind::Prompt, &call.prompt, call.position);
                if let Some(model) = &call.model {
                    self.require(DefinitionKind::Model, model, call.position);
                }
                for input in &call.input {
                    self.check_expr(input, scope);
                }
                if let Some(target) = &call.assign_to {
                    self.define(scope, target, call.position);
                }
            }

            Stmt::Return { value, .. } => self.check_expr(value, scope),

            Stmt::Push {
                value,
                target,
                position,
            } => {
                self.check_expr(value, scope);
                self.require_variable(scope, target, *position);
            }

            Stmt::ForLoop {
                variable,
                iterable,
                body,
                position,
            } => {
                self.check_expr(iterable, scope);
                let block = self.arena.push(ScopeType::Block, scope);
                self.define(block, variable, *position);
                self.check_body(body, block);
            }

            Stmt::IfBlock {
                condition,
                body,
                else_body,
                ..
            } => {
                self.check_expr(condition, scope);
                self.check_block(body, scope);
                if let Some(else_body) = else_body {
                    self.check_block(else_body, scope);
                }
            }

            Stmt::MatchBlock {
                subject,
                cases,
                else_body,
                ..
            } => {
                self.check_expr(subject, scope);
                let match_scope = self.arena.push(ScopeType::Block, scope);
                for case in cases {
                    self.check_block(&case.body, match_scope);
                }
                if let Some(else_body) = else_body {
                    self.check_block(else_body, match_scope);
                }
            }

            // Members run side by side; their results are visible afterwards
            Stmt::ParallelBlock { body, .. } => self.check_body(body, scope),

            Stmt::FailureBlock { body, .. } | Stmt::LoopBlock { body, .. } => {
                self.check_block(body, scope);
            }

            Stmt::Log { message, position } | Stmt::Notify { message, position } => {
                self.check_template(message, scope, *position);
            }

            Stmt::Escalate {
                message, position, ..
            } => {
                if let Some(message) = message {
                    self.check_template(message, scope, *position);
                }
            }

            Stmt::Continue { .. } | Stmt::Abort { .. } | Stmt::RetryStep { .. } => {}
        }
    }

    /// Variables read by `${...}` placeholders. Malformed placeholders are
    /// reported by lowering.
    fn check_template(&mut self, message: &str, scope: ScopeId, position: Option<SourcePosition>) {
        let Ok(parts) = parse_template(message, false) else {
            return;
        };
        for part in &parts {
            if let Some(root) = part.root() {
                self.require_variable(scope, root, position);
            }
        }
    }

    fn check_expr(&mut self, expr: &Expr, scope: ScopeId) {
        match expr {
            Expr::VarRef { name, position } => self.require_variable(scope, name, *position),
            Expr::PropertyAccess { object, .. } => self.check_expr(object, scope),
            Expr::BinaryOp { left, right, .. } => {
                self.check_expr(left, scope);
                self.check_expr(right, scope);
            }
            Expr::UnaryOp { operand, .. } => self.check_expr(operand, scope),
            Expr::FunctionCall { args, .. } => {
                for arg in args {
                    self.check_expr(arg, scope);
                }
            }
            Expr::ListLiteral { elements, .. } => {
                for element in elements {
                    self.check_expr(element, scope);
                }
            }
            Expr::ObjectLiteral { entries, .. } => {
                for (_, value) in entries {
                    self.check_expr(value, scope);
                }
            }
            Expr::Literal { .. } => {}
        }
    }
}
