//! The back-end solver interface.
//!
//! The engine needs very little from a solver: assert Boolean formulas,
//! decide satisfiability, and produce a valuation of the asserted
//! variables on SAT. Back-ends are distinct implementors chosen at
//! construction time.

use thiserror::Error;

use argus_core::{Context, ExprId, Valuation};

/// Outcome of a satisfiability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverStatus {
    Sat,
    Unsat,
    /// Timeout or incompleteness; reported per query, never fatal.
    Unknown,
}

/// Back-end failure, wrapping the underlying message. Treated as `Unknown`
/// for the current query.
#[derive(Debug, Error)]
#[error("solver error: {message}")]
pub struct SolverError {
    pub message: String,
}

impl SolverError {
    pub fn new(message: impl Into<String>) -> Self {
        SolverError {
            message: message.into(),
        }
    }
}

pub trait Solver {
    /// Assert a Boolean formula. Must be total on its free variables.
    fn add(&mut self, ctx: &Context, expr: ExprId) -> Result<(), SolverError>;

    fn check(&mut self) -> Result<SolverStatus, SolverError>;

    /// Valid only after `check` returned [`SolverStatus::Sat`]. Total over
    /// the variables that appeared in asserted formulas.
    fn model(&mut self, ctx: &Context) -> Result<Valuation, SolverError>;

    fn push(&mut self);

    fn pop(&mut self);
}

/// Creates solver instances, one per reachability query.
pub trait SolverFactory {
    fn create(&self) -> Box<dyn Solver>;
}
