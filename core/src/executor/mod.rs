//! # Reference executor
//!
//! Runs a compiled flow or event handler one op at a time. The VM never
//! blocks: agent runs, LLM calls and parallel blocks suspend it with a
//! [`Request`], and the host answers with an [`Outcome`] through [`resume`].
//! A suspended VM is plain data and survives a JSON round trip.
//!
//! ```text
//! let mut vm = VM::for_flow(&unit, "main", vec![], globals)?;
//! while run_until_done(&mut vm, &unit)? == Step::Suspended {
//!     let outcome = host.handle(vm.request());
//!     resume(&mut vm, &unit, outcome)?;
//! }
//! ```

pub mod exec_loop;
pub mod expressions;
pub mod stdlib;
pub mod vm;

#[cfg(test)]
mod tests;

use crate::types::ir::UnitRef;

// Re-export commonly used items
pub use exec_loop::{resume, run_until_done, step};
pub use expressions::EvalResult;
pub use vm::{
    Control, Event, HandlerFrame, LoopFrame, Outcome, ParallelRequest, Request, RuntimeError,
    Step, DEFAULT_MAX_RETRY_ATTEMPTS, VM,
};

/// The VM and the compiled unit disagree. Not catchable by the program.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecError {
    #[error("{0} does not exist")]
    UnknownUnit(UnitRef),

    #[error("flow `{flow}` takes {expected} argument(s), got {got}")]
    Arity {
        flow: String,
        expected: usize,
        got: usize,
    },

    #[error("the VM is not waiting for an outcome")]
    NotSuspended,

    #[error("cannot resume {op} with a {outcome} outcome")]
    UnexpectedOutcome {
        op: &'static str,
        outcome: &'static str,
    },

    #[error("program counter {0} is out of range")]
    ProgramCounter(usize),

    #[error("corrupt VM state: {0}")]
    CorruptState(&'static str),
}
