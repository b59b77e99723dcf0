//! Control-flow automata and the SSA-to-automaton lowering.
//!
//! A [`Cfa`] is a graph of locations connected by guarded, simultaneous
//! assignment transitions and by call transitions into other automata. The
//! [`builder`] lowers each SSA function to a CFA, turning every natural loop
//! into its own automaton with explicit input and output variables; the
//! [`translate`] module lowers individual instructions to expressions.

pub mod builder;
pub mod cfa;
pub mod memory;
pub mod translate;

use thiserror::Error;

pub use builder::{translate_module, ModuleToCfa};
pub use cfa::{
    AutomataSystem, CallTransition, Cfa, CfaId, DebugBinding, Location, LocationId, LocationKind,
    NondetCall, Transition, TransitionId, TransitionKind, VariableAssignment,
};
pub use memory::{HavocMemoryModel, MemoryModel, ScopedVars};
pub use translate::{InstTranslator, IntRepresentation, Settings, TranslateEnv};

/// Name of the output variable carrying a function's return value.
pub const FUNCTION_RETURN_VALUE_NAME: &str = "RET_VAL";

/// Name of the auxiliary loop output that records which exit was taken.
pub const LOOP_OUTPUT_SELECTOR_NAME: &str = "__output_selector";

/// Whether a callee name marks a verification failure.
pub fn is_error_function_name(name: &str) -> bool {
    name == "__VERIFIER_error"
        || name == "__assert_fail"
        || name == "__argus_error"
        || name == "argus.error_code"
}

/// Whether a callee name is a nondeterministic input source.
pub fn is_nondet_function_name(name: &str) -> bool {
    name.starts_with("__VERIFIER_nondet_")
}

/// Name of the debug annotation binding a value to a source-level global.
pub const INLINED_GLOBAL_WRITE_NAME: &str = "argus.inlined_global.write";

/// Error raised while lowering a module to automata.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Context(#[from] argus_core::ContextError),

    #[error(transparent)]
    Ir(#[from] argus_ir::IrError),

    #[error("unsupported construct in '{location}': {construct}")]
    Unsupported {
        construct: String,
        location: String,
    },
}

pub type BuildResult<T> = Result<T, BuildError>;
