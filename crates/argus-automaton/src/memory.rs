//! Pluggable memory model.
//!
//! The instruction translator funnels every memory-touching construct
//! through this narrow interface. The default [`HavocMemoryModel`] gives
//! loads and pointer arithmetic no semantics at all: every load produces an
//! unconstrained value, allocations become unconstrained array variables and
//! pointers become opaque integer constants. Precise models must keep loads
//! deterministic functions of the stores along a path.

use argus_core::{Context, ContextError, ExprId, FloatKind, TypeId, VarId};
use argus_ir::{CastOp, IrType};

use crate::translate::IntRepresentation;
use crate::BuildResult;

/// Variable allocation hook handed to memory-model callbacks. Implemented by
/// the automaton builder so model-created variables become locals of the CFA
/// under construction.
pub trait ScopedVars {
    fn context(&self) -> &Context;

    /// Create a fresh local in the enclosing automaton. The hint is made
    /// unique by the implementor.
    fn fresh_local(&mut self, hint: &str, ty: TypeId) -> Result<VarId, ContextError>;
}

pub trait MemoryModel {
    /// Translate a front-end type into the expression-layer type universe.
    fn translate_type(&self, ctx: &Context, ty: IrType) -> TypeId;

    /// Value produced by a load from `address`.
    fn handle_load(
        &mut self,
        scope: &mut dyn ScopedVars,
        address: ExprId,
        result_ty: IrType,
    ) -> BuildResult<ExprId>;

    /// Optional path constraint produced by a store.
    fn handle_store(
        &mut self,
        scope: &mut dyn ScopedVars,
        address: ExprId,
        value: ExprId,
    ) -> BuildResult<Option<ExprId>>;

    /// Pointer value produced by a stack allocation.
    fn handle_alloca(
        &mut self,
        scope: &mut dyn ScopedVars,
        allocated: IrType,
        name_hint: &str,
    ) -> BuildResult<ExprId>;

    /// Pointer value produced by pointer arithmetic.
    fn handle_get_element_ptr(
        &mut self,
        scope: &mut dyn ScopedVars,
        base: ExprId,
        indices: &[ExprId],
        result_ty: IrType,
    ) -> BuildResult<ExprId>;

    /// Expression for a pointer-typed constant or global.
    fn handle_pointer_value(
        &mut self,
        scope: &mut dyn ScopedVars,
        name_hint: &str,
    ) -> BuildResult<ExprId>;

    /// Value produced by a cast into or out of pointer type.
    fn handle_pointer_cast(
        &mut self,
        scope: &mut dyn ScopedVars,
        op: CastOp,
        value: ExprId,
        to: IrType,
    ) -> BuildResult<ExprId>;
}

/// The default model: all memory reads are unconstrained.
#[derive(Debug)]
pub struct HavocMemoryModel {
    ints: IntRepresentation,
}

impl HavocMemoryModel {
    pub fn new(ints: IntRepresentation) -> Self {
        HavocMemoryModel { ints }
    }

    /// Pointers are opaque mathematical integers under this model.
    fn pointer_type(&self, ctx: &Context) -> TypeId {
        ctx.int_type()
    }
}

impl MemoryModel for HavocMemoryModel {
    fn translate_type(&self, ctx: &Context, ty: IrType) -> TypeId {
        match ty {
            IrType::Int(1) => ctx.bool_type(),
            IrType::Int(width) => match self.ints {
                IntRepresentation::BitVectors => ctx.bv_type(width),
                IntRepresentation::Integers => ctx.int_type(),
            },
            IrType::Float(kind) => float_type(ctx, kind),
            IrType::Ptr => self.pointer_type(ctx),
        }
    }

    fn handle_load(
        &mut self,
        scope: &mut dyn ScopedVars,
        _address: ExprId,
        result_ty: IrType,
    ) -> BuildResult<ExprId> {
        let ctx = scope.context();
        let ty = self.translate_type(ctx, result_ty);
        Ok(ctx.builder().undef(ty))
    }

    fn handle_store(
        &mut self,
        _scope: &mut dyn ScopedVars,
        _address: ExprId,
        _value: ExprId,
    ) -> BuildResult<Option<ExprId>> {
        Ok(None)
    }

    fn handle_alloca(
        &mut self,
        scope: &mut dyn ScopedVars,
        allocated: IrType,
        name_hint: &str,
    ) -> BuildResult<ExprId> {
        // The allocation's contents become an unconstrained array variable;
        // the produced pointer is a fresh opaque constant.
        let elem_ty = self.translate_type(scope.context(), allocated);
        let array_ty = {
            let ctx = scope.context();
            let domain = self.pointer_type(ctx);
            ctx.array_type(domain, elem_ty)
        };
        scope.fresh_local(&format!("{}_mem", name_hint), array_ty)?;
        let ptr_ty = self.pointer_type(scope.context());
        let ptr = scope.fresh_local(&format!("{}_addr", name_hint), ptr_ty)?;
        let ctx = scope.context();
        Ok(ctx.builder().var_ref(ptr))
    }

    fn handle_get_element_ptr(
        &mut self,
        scope: &mut dyn ScopedVars,
        _base: ExprId,
        _indices: &[ExprId],
        result_ty: IrType,
    ) -> BuildResult<ExprId> {
        let ctx = scope.context();
        let ty = self.translate_type(ctx, result_ty);
        Ok(ctx.builder().undef(ty))
    }

    fn handle_pointer_value(
        &mut self,
        scope: &mut dyn ScopedVars,
        name_hint: &str,
    ) -> BuildResult<ExprId> {
        let ptr_ty = self.pointer_type(scope.context());
        let var = scope.fresh_local(name_hint, ptr_ty)?;
        Ok(scope.context().builder().var_ref(var))
    }

    fn handle_pointer_cast(
        &mut self,
        scope: &mut dyn ScopedVars,
        _op: CastOp,
        _value: ExprId,
        to: IrType,
    ) -> BuildResult<ExprId> {
        let ctx = scope.context();
        let ty = self.translate_type(ctx, to);
        Ok(ctx.builder().undef(ty))
    }
}

fn float_type(ctx: &Context, kind: FloatKind) -> TypeId {
    ctx.float_type(kind)
}
