//! SSA program representation consumed by the automaton builder.
//!
//! The front end hands the verifier a [`Module`] of functions in static
//! single assignment form. This crate defines that in-memory form plus the
//! CFG analyses the lowering needs: dominators, the natural-loop forest and
//! a block topological order.

pub mod analysis;
pub mod ir;

use thiserror::Error;

pub use analysis::{dominators, predecessors, topological_order, Loop, LoopForest, LoopId};
pub use ir::{
    BinaryOp, Block, BlockId, Callee, CastOp, FCmpPred, FuncId, Function, ICmpPred, Inst,
    InstKind, IrType, LocalId, Module, Phi, SourceLoc, Terminator, Value,
};

/// Error raised by the CFG analyses.
#[derive(Debug, Error)]
pub enum IrError {
    #[error("irreducible control flow in function '{function}'")]
    IrreducibleControlFlow { function: String },

    #[error("function '{function}' has no blocks")]
    EmptyFunction { function: String },
}

pub type IrResult<T> = Result<T, IrError>;
