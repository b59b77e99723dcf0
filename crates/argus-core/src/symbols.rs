//! Symbol table: named, typed variables owned by the context.

use std::collections::HashMap;

use crate::types::TypeId;
use crate::ContextError;

/// Stable identity of a variable within its owning context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub(crate) u32);

/// A named, typed variable. Names are unique within a context; automaton
/// locals are scoped as `<cfa>/<local>` by their owner.
#[derive(Debug, Clone)]
pub struct Variable {
    name: String,
    ty: TypeId,
}

impl Variable {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> TypeId {
        self.ty
    }
}

#[derive(Debug, Default)]
pub(crate) struct SymbolTable {
    variables: Vec<Variable>,
    by_name: HashMap<String, VarId>,
}

impl SymbolTable {
    pub(crate) fn create(&mut self, name: &str, ty: TypeId) -> Result<VarId, ContextError> {
        if self.by_name.contains_key(name) {
            return Err(ContextError::DuplicateName {
                name: name.to_string(),
            });
        }
        let id = VarId(self.variables.len() as u32);
        self.variables.push(Variable {
            name: name.to_string(),
            ty,
        });
        self.by_name.insert(name.to_string(), id);
        Ok(id)
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<VarId> {
        self.by_name.get(name).copied()
    }

    pub(crate) fn get(&self, id: VarId) -> &Variable {
        &self.variables[id.0 as usize]
    }

    pub(crate) fn len(&self) -> usize {
        self.variables.len()
    }
}
