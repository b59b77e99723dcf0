//! Core expression layer for the Argus bounded model checker.
//!
//! A [`Context`] owns the three interning tables every other stage builds on:
//! the type interner, the symbol table, and the hash-consed expression arena.
//! Expressions are immutable DAG nodes identified by [`ExprId`]; the default
//! [`ExprBuilder`] folds constants and algebraic identities before allocating,
//! so structurally equal terms share identity.

pub mod builder;
pub mod eval;
pub mod expr;
pub mod literal;
pub mod print;
pub mod symbols;
pub mod types;

use thiserror::Error;

pub use builder::ExprBuilder;
pub use expr::{Context, ExprId, ExprKind, RoundingMode};
pub use literal::{Literal, Valuation};
pub use symbols::{VarId, Variable};
pub use types::{FloatKind, Type, TypeId};

/// Construction-time error. Fatal to the verification run.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("type mismatch in {op}: expected {expected}, found {found}")]
    TypeMismatch {
        op: &'static str,
        expected: String,
        found: String,
    },

    #[error("operand width mismatch in {op}: {lhs} vs {rhs} bits")]
    WidthMismatch {
        op: &'static str,
        lhs: u32,
        rhs: u32,
    },

    #[error("duplicate variable name: '{name}'")]
    DuplicateName { name: String },

    #[error("ill-formed automaton '{automaton}': {reason}")]
    MalformedCfa { automaton: String, reason: String },
}

pub type CoreResult<T> = Result<T, ContextError>;
