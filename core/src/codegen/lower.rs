//! Statement and expression lowering for one flow or handler body

use indexmap::{IndexMap, IndexSet};

use crate::types::ast::{
    strip_sigil, CallStmt, EscalationAction, Expr, Literal, RunStmt, RunTarget, SourcePosition,
    Stmt,
};
use crate::types::ir::{AgentSpec, InvokeTarget, IrExpr, Op, ParallelBranch, UnitRef};
use crate::types::source_map::SourceMap;
use crate::types::template::parse_template;

use super::{literal_to_json, LowerResult, LoweringError};

/// Enclosing construct of the statement being lowered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Context {
    /// `for` or `loop`; `head` is the `IterNext`/`LoopNext` index
    Loop { head: usize },
    /// Protected region before an `on failure` block
    Try,
    /// Body of an `on failure` block
    Handler,
}

pub(super) struct Lowerer<'a> {
    unit: UnitRef,
    ops: Vec<Op>,
    contexts: Vec<Context>,
    agents: &'a IndexMap<String, AgentSpec>,
    flows: &'a IndexSet<&'a str>,
    source_map: &'a mut SourceMap,
}

impl<'a> Lowerer<'a> {
    pub(super) fn new(
        unit: UnitRef,
        agents: &'a IndexMap<String, AgentSpec>,
        flows: &'a IndexSet<&'a str>,
        source_map: &'a mut SourceMap,
    ) -> Self {
        Self {
            unit,
            ops: Vec::new(),
            contexts: Vec::new(),
            agents,
            flows,
            source_map,
        }
    }

    pub(super) fn finish(self) -> Vec<Op> {
        self.ops
    }

    /* ===================== Emission ===================== */

    fn here(&self) -> usize {
        self.ops.len()
    }

    fn emit(&mut self, op: Op) -> usize {
        self.ops.push(op);
        self.ops.len() - 1
    }

    /// Record a mapping; statements without a position get none
    fn map(&mut self, index: usize, position: Option<SourcePosition>) {
        if let Some(position) = position {
            self.source_map.add(&self.unit, index, position);
        }
    }

    /// Point the jump at `at` to the next emitted op
    fn patch(&mut self, at: usize) {
        let here = self.here();
        match self.ops.get_mut(at) {
            Some(Op::Jump { target })
            | Some(Op::JumpUnless { target, .. })
            | Some(Op::BranchUnlessEscalated { target }) => *target = here,
            Some(Op::IterNext { exit, .. }) | Some(Op::LoopNext { exit }) => *exit = here,
            Some(Op::TryBegin { handler }) => *handler = here,
            Some(Op::Match { default, .. }) => *default = here,
            _ => {}
        }
    }

    fn with_context<T>(
        &mut self,
        context: Context,
        f: impl FnOnce(&mut Self) -> LowerResult<T>,
    ) -> LowerResult<T> {
        self.contexts.push(context);
        let result = f(self);
        self.contexts.pop();
        result
    }

    /* ===================== Statements ===================== */

    /// Lower a statement list. The first `on failure` block splits it into a
    /// protected region, the handler, and whatever follows.
    pub(super) fn lower_body(&mut self, body: &[Stmt]) -> LowerResult<()> {
        let split = body
            .iter()
            .position(|stmt| matches!(stmt, Stmt::FailureBlock { .. }));

        let Some(index) = split else {
            for stmt in body {
                self.lower_stmt(stmt)?;
            }
            return Ok(());
        };

        let (before, rest) = body.split_at(index);
        let Some((Stmt::FailureBlock { body: handler, position }, after)) = rest.split_first()
        else {
            return Ok(());
        };

        let try_begin = self.emit(Op::TryBegin { handler: 0 });
        self.with_context(Context::Try, |this| {
            for stmt in before {
                this.lower_stmt(stmt)?;
            }
            Ok(())
        })?;
        let try_end = self.emit(Op::TryEnd);
        self.map(try_end, *position);
        let skip = self.emit(Op::Jump { target: 0 });

        self.patch(try_begin);
        self.with_context(Context::Handler, |this| this.lower_body(handler))?;
        self.emit(Op::EndHandler);
        self.patch(skip);

        self.lower_body(after)
    }

    fn lower_stmt(&mut self, stmt: &Stmt) -> LowerResult<()> {
        let position = stmt.position();
        match stmt {
            Stmt::Assignment { target, value, .. } => {
                let value = self.lower_expr(value)?;
                let at = self.emit(Op::Assign {
                    target: strip_sigil(target).to_string(),
                    path: Vec::new(),
                    value,
                });
                self.map(at, position);
            }

            Stmt::PropertyAssignment {
                target,
                path,
                value,
                ..
            } => {
                let value = self.lower_expr(value)?;
                let at = self.emit(Op::Assign {
                    target: strip_sigil(target).to_string(),
                    path: path.clone(),
                    value,
                });
                self.map(at, position);
            }

            Stmt::Run(run) => self.lower_run(run)?,

            Stmt::Call(call) => self.lower_call(call)?,

            Stmt::Return { value, .. } => {
                let value = self.lower_expr(value)?;
                let at = self.emit(Op::Return { value });
                self.map(at, position);
            }

            Stmt::Push { value, target, .. } => {
                let value = self.lower_expr(value)?;
                let at = self.emit(Op::Push {
                    target: strip_sigil(target).to_string(),
                    value,
                });
                self.map(at, position);
            }

            Stmt::ForLoop {
                variable,
                iterable,
                body,
                ..
            } => {
                let iterable = self.lower_expr(iterable)?;
                let start = self.emit(Op::IterStart { iterable });
                self.map(start, position);

                let head = self.emit(Op::IterNext {
                    variable: strip_sigil(variable).to_string(),
                    exit: 0,
                });
                self.with_context(Context::Loop { head }, |this| this.lower_body(body))?;
                self.emit(Op::Jump { target: head });
                self.patch(head);
            }

            Stmt::IfBlock {
                condition,
                body,
                else_body,
                ..
            } => {
                let condition = self.lower_expr(condition)?;
                let branch = self.emit(Op::JumpUnless {
                    condition,
                    target: 0,
                });
                self.map(branch, position);
                self.lower_body(body)?;

                match else_body {
                    Some(else_body) => {
                        let skip = self.emit(Op::Jump { target: 0 });
                        self.patch(branch);
                        self.lower_body(else_body)?;
                        self.patch(skip);
                    }
                    None => self.patch(branch),
                }
            }

            Stmt::MatchBlock {
                subject,
                cases,
                else_body,
                ..
            } => {
                let subject = self.lower_expr(subject)?;
                let dispatch = self.emit(Op::Match {
                    subject,
                    cases: Vec::new(),
                    default: 0,
                });
                self.map(dispatch, position);

                let mut targets = Vec::with_capacity(cases.len());
                let mut exits = Vec::with_capacity(cases.len());
                for case in cases {
                    targets.push((case.pattern.clone(), self.here()));
                    self.lower_body(&case.body)?;
                    exits.push(self.emit(Op::Jump { target: 0 }));
                }

                self.patch(dispatch);
                if let Some(else_body) = else_body {
                    self.lower_body(else_body)?;
                }
                for exit in exits {
                    self.patch(exit);
                }
                if let Some(Op::Match { cases, .. }) = self.ops.get_mut(dispatch) {
                    *cases = targets;
                }
            }

            Stmt::ParallelBlock { body, .. } => {
                let mut branches = Vec::with_capacity(body.len());
                for child in body {
                    let Stmt::Run(run) = child else {
                        return Err(LoweringError::at(
                            child.position().or(position),
                            format!(
                                "only `run` statements can appear in a parallel block, found {}",
                                child.kind_name()
                            ),
                        ));
                    };
                    if run.on_escalate.is_some() {
                        return Err(LoweringError::at(
                            run.position.or(position),
                            "escalation handlers are not supported inside a parallel block",
                        ));
                    }
                    let (target, input, assign_to) = self.run_parts(run)?;
                    branches.push(ParallelBranch {
                        target,
                        input,
                        assign_to,
                    });
                }

                let at = self.emit(Op::Parallel { branches });
                self.map(at, position);
                for child in body {
                    self.map(at, child.position());
                }
            }

            // `lower_body` splits bodies before their statements get here
            Stmt::FailureBlock { .. } => self.lower_body(std::slice::from_ref(stmt))?,

            Stmt::LoopBlock {
                max_iterations,
                body,
                ..
            } => {
                let start = self.emit(Op::LoopStart {
                    max: *max_iterations,
                });
                self.map(start, position);

                let head = self.emit(Op::LoopNext { exit: 0 });
                self.with_context(Context::Loop { head }, |this| this.lower_body(body))?;
                self.emit(Op::Jump { target: head });
                self.patch(head);
            }

            Stmt::Log { message, .. } => {
                let message = self.lower_message(message, position)?;
                let at = self.emit(Op::Log { message });
                self.map(at, position);
            }

            Stmt::Notify { message, .. } => {
                let message = self.lower_message(message, position)?;
                let at = self.emit(Op::Notify { message });
                self.map(at, position);
            }

            Stmt::Escalate {
                target, message, ..
            } => {
                let message = match message {
                    Some(message) => Some(self.lower_message(message, position)?),
                    None => None,
                };
                let at = self.emit(Op::Escalate {
                    target: target.clone(),
                    message,
                });
                self.map(at, position);
            }

            Stmt::Continue { .. } => {
                let at = self.lower_continue(position)?;
                self.map(at, position);
            }

            Stmt::Abort { message, .. } => {
                let at = self.emit(Op::Abort {
                    message: message.clone(),
                });
                self.map(at, position);
            }

            Stmt::RetryStep { .. } => {
                if !self.contexts.contains(&Context::Handler) {
                    return Err(LoweringError::at(
                        position,
                        "`retry step` outside of an `on failure` block",
                    ));
                }
                let at = self.emit(Op::RetryStep);
                self.map(at, position);
            }
        }
        Ok(())
    }

    /// Jump back to the innermost loop head, leaving any protected regions and
    /// failure handlers opened inside the loop. Returns the first op emitted.
    fn lower_continue(&mut self, position: Option<SourcePosition>) -> LowerResult<usize> {
        let mut exits = Vec::new();
        let mut head = None;
        for context in self.contexts.iter().rev() {
            match context {
                Context::Loop { head: h } => {
                    head = Some(*h);
                    break;
                }
                Context::Try => exits.push(Op::TryEnd),
                Context::Handler => exits.push(Op::EndHandler),
            }
        }
        let Some(head) = head else {
            return Err(LoweringError::at(position, "`continue` outside of a loop"));
        };

        let first = self.here();
        for op in exits {
            self.emit(op);
        }
        self.emit(Op::Jump { target: head });
        Ok(first)
    }

    /// Target, inputs and result variable of a run
    fn run_parts(
        &mut self,
        run: &RunStmt,
    ) -> LowerResult<(InvokeTarget, Vec<IrExpr>, Option<String>)> {
        let target = match &run.target {
            RunTarget::Agent(name) => InvokeTarget::Agent(name.clone()),
            RunTarget::Flow(name) if self.flows.contains(name.as_str()) => {
                InvokeTarget::Flow(name.clone())
            }
            RunTarget::Flow(name) if self.agents.contains_key(name) => {
                InvokeTarget::Agent(name.clone())
            }
            RunTarget::Flow(name) => InvokeTarget::Flow(name.clone()),
        };

        let agent = match &target {
            InvokeTarget::Agent(name) => self.agents.get(name),
            InvokeTarget::Flow(_) => None,
        };

        let mut input = self.lower_exprs(&run.input)?;
        if input.is_empty() {
            if let Some(prompt) = agent.and_then(|a| a.prompt.as_ref()) {
                input.push(IrExpr::RenderPrompt {
                    prompt: prompt.clone(),
                });
            }
        }

        let assign_to = match &run.assign_to {
            Some(target) => Some(strip_sigil(target).to_string()),
            None => agent.and_then(|a| a.produces.clone()),
        };

        Ok((target, input, assign_to))
    }

    fn lower_run(&mut self, run: &RunStmt) -> LowerResult<()> {
        let (target, input, assign_to) = self.run_parts(run)?;
        let at = self.emit(Op::Invoke {
            target,
            input,
            assign_to,
        });
        self.map(at, run.position);

        let Some(action) = &run.on_escalate else {
            return Ok(());
        };
        let branch = self.emit(Op::BranchUnlessEscalated { target: 0 });
        match action {
            EscalationAction::Return { value } => {
                let value = self.lower_expr(value)?;
                self.emit(Op::Return { value });
            }
            EscalationAction::Continue => {
                self.lower_continue(run.position)?;
            }
            EscalationAction::Abort => {
                self.emit(Op::Abort { message: None });
            }
        }
        self.patch(branch);
        Ok(())
    }

    fn lower_call(&mut self, call: &CallStmt) -> LowerResult<()> {
        let mut input = self.lower_exprs(&call.input)?;
        if input.is_empty() {
            input.push(IrExpr::RenderPrompt {
                prompt: call.prompt.clone(),
            });
        }
        let at = self.emit(Op::CallPrompt {
            prompt: call.prompt.clone(),
            model: call.model.clone(),
            input,
            assign_to: call.assign_to.as_deref().map(|v| strip_sigil(v).to_string()),
        });
        self.map(at, call.position);
        Ok(())
    }

    /// `${...}` messages of log, notify and escalate
    fn lower_message(
        &self,
        message: &str,
        position: Option<SourcePosition>,
    ) -> LowerResult<IrExpr> {
        let parts = parse_template(message, true)
            .map_err(|err| LoweringError::at(position, err.to_string()))?;
        Ok(IrExpr::Format { parts })
    }

    /* ===================== Expressions ===================== */

    fn lower_exprs(&self, exprs: &[Expr]) -> LowerResult<Vec<IrExpr>> {
        exprs.iter().map(|e| self.lower_expr(e)).collect()
    }

    fn lower_expr(&self, expr: &Expr) -> LowerResult<IrExpr> {
        Ok(match expr {
            Expr::VarRef { name, .. } => IrExpr::var(strip_sigil(name)),
            Expr::PropertyAccess {
                object, property, ..
            } => IrExpr::Property {
                object: Box::new(self.lower_expr(object)?),
                property: property.clone(),
            },
            Expr::BinaryOp {
                op, left, right, ..
            } => IrExpr::Binary {
                op: *op,
                left: Box::new(self.lower_expr(left)?),
                right: Box::new(self.lower_expr(right)?),
            },
            Expr::UnaryOp { op, operand, .. } => IrExpr::Unary {
                op: *op,
                operand: Box::new(self.lower_expr(operand)?),
            },
            Expr::FunctionCall { name, args, .. } => IrExpr::Call {
                name: name.clone(),
                args: self.lower_exprs(args)?,
            },
            Expr::ListLiteral { elements, .. } => IrExpr::List {
                items: self.lower_exprs(elements)?,
            },
            Expr::ObjectLiteral { entries, .. } => IrExpr::Object {
                entries: entries
                    .iter()
                    .map(|(key, value)| Ok((key.clone(), self.lower_expr(value)?)))
                    .collect::<LowerResult<_>>()?,
            },
            // Interpolated strings; malformed placeholders stay literal text
            Expr::Literal {
                value: Literal::String(text),
                position,
            } if text.contains("${") => {
                let parts = parse_template(text, false)
                    .map_err(|err| LoweringError::at(*position, err.to_string()))?;
                IrExpr::Format { parts }
            }
            Expr::Literal { value, .. } => IrExpr::Const {
                value: literal_to_json(value),
            },
        })
    }
}
