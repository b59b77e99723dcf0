//! Bounded model checking over control-flow automata.
//!
//! The encoder unfolds the automata system from its main automaton,
//! inlining call transitions up to a per-callee unwind bound, and produces
//! one satisfiability query per reachable error location. A satisfying
//! model is turned into an ordered counterexample trace by walking the
//! predecessor witnesses the encoder planted.

pub mod encode;
pub mod solver;
pub mod trace;
pub mod z3;

use thiserror::Error;
use tracing::info;

use argus_automaton::AutomataSystem;
use argus_core::{eval::eval, Context, Literal};

pub use crate::z3::{Z3Solver, Z3SolverFactory};
pub use encode::{encode_reachability, BmcSettings, EncodedInstance, Encoding, ErrorQuery};
pub use solver::{Solver, SolverError, SolverFactory, SolverStatus};
pub use trace::{extract_trace, Trace, TraceEvent};

/// Error raised by the checking engine itself; solver-level failures are
/// demoted to `Unknown` verdicts per query instead.
#[derive(Debug, Error)]
pub enum BmcError {
    #[error(transparent)]
    Context(#[from] argus_core::ContextError),

    #[error("automata system has no main automaton")]
    NoMainAutomaton,

    #[error(transparent)]
    Solver(#[from] SolverError),
}

pub type BmcResult<T> = Result<T, BmcError>;

/// Final verdict of a verification run.
#[derive(Debug)]
pub enum VerificationResult {
    /// No error location is reachable within the unwind bound.
    Success,
    /// An error location is reachable; the trace witnesses it.
    Fail {
        trace: Trace,
        error_code: Option<Literal>,
    },
    /// At least one query could not be decided.
    Inconclusive { reasons: Vec<String> },
}

impl VerificationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, VerificationResult::Success)
    }

    pub fn is_fail(&self) -> bool {
        matches!(self, VerificationResult::Fail { .. })
    }
}

/// The top-level checking engine, parameterized by a solver back-end.
pub struct BoundedModelChecker<F: SolverFactory> {
    factory: F,
    settings: BmcSettings,
}

impl<F: SolverFactory> BoundedModelChecker<F> {
    pub fn new(factory: F, settings: BmcSettings) -> Self {
        BoundedModelChecker { factory, settings }
    }

    /// Check every error location of the system's main automaton. The first
    /// satisfiable query short-circuits into a failure verdict; undecided
    /// queries are collected so one timeout cannot hide another reachable
    /// assertion.
    pub fn check(
        &self,
        ctx: &Context,
        system: &AutomataSystem,
    ) -> BmcResult<VerificationResult> {
        let encoding = encode_reachability(ctx, system, &self.settings)?;
        info!(queries = encoding.queries.len(), "encoded reachability queries");

        let mut reasons = Vec::new();
        for (index, query) in encoding.queries.iter().enumerate() {
            let mut solver = self.factory.create();
            if let Err(e) = solver.add(ctx, query.formula) {
                reasons.push(format!("query {}: {}", index, e));
                continue;
            }
            match solver.check() {
                Ok(SolverStatus::Sat) => {
                    let model = solver.model(ctx)?;
                    let trace = extract_trace(ctx, system, &encoding, query, &model);
                    let error_code = query
                        .error_code
                        .and_then(|code| eval(ctx, code, &model));
                    info!(query = index, "error location is reachable");
                    return Ok(VerificationResult::Fail { trace, error_code });
                }
                Ok(SolverStatus::Unsat) => {
                    info!(query = index, "error location unreachable within bound");
                }
                Ok(SolverStatus::Unknown) => {
                    reasons.push(format!("query {}: solver returned unknown", index));
                }
                Err(e) => {
                    reasons.push(format!("query {}: {}", index, e));
                }
            }
        }

        if reasons.is_empty() {
            Ok(VerificationResult::Success)
        } else {
            Ok(VerificationResult::Inconclusive { reasons })
        }
    }
}
