//! Expression builders.
//!
//! The folding builder (the default) applies algebraic rewrites and constant
//! folding before allocating, and hash-conses every node it produces. The
//! plain builder allocates a fresh node per call and is meant for tests that
//! need to observe unfolded structure.

use smallvec::{smallvec, SmallVec};

use crate::expr::{Context, ExprId, ExprKind, Operands, RoundingMode};
use crate::literal::float_is_nan;
use crate::symbols::VarId;
use crate::types::{FloatKind, Type, TypeId};
use crate::{ContextError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BuilderMode {
    Folding,
    Plain,
}

/// Typed expression constructor over a [`Context`].
pub struct ExprBuilder<'ctx> {
    ctx: &'ctx Context,
    mode: BuilderMode,
}

/// Sign-extend a bit-vector payload of the given width into an `i128`.
fn bv_signed(width: u32, value: u128) -> i128 {
    if width >= 128 {
        return value as i128;
    }
    let sign_bit = 1u128 << (width - 1);
    if value & sign_bit != 0 {
        (value | !(bv_mask(width))) as i128
    } else {
        value as i128
    }
}

/// All-ones mask for the given width.
fn bv_mask(width: u32) -> u128 {
    if width >= 128 {
        u128::MAX
    } else {
        (1u128 << width) - 1
    }
}

impl<'ctx> ExprBuilder<'ctx> {
    pub(crate) fn new(ctx: &'ctx Context, mode: BuilderMode) -> Self {
        ExprBuilder { ctx, mode }
    }

    pub fn context(&self) -> &'ctx Context {
        self.ctx
    }

    fn folding(&self) -> bool {
        self.mode == BuilderMode::Folding
    }

    fn mk(&self, kind: ExprKind, ty: TypeId, args: Operands) -> ExprId {
        match self.mode {
            BuilderMode::Folding => self.ctx.intern_node(kind, ty, args),
            BuilderMode::Plain => self.ctx.fresh_node(kind, ty, args),
        }
    }

    fn mismatch(&self, op: &'static str, expected: &str, found: TypeId) -> ContextError {
        ContextError::TypeMismatch {
            op,
            expected: expected.to_string(),
            found: self.ctx.type_string(found),
        }
    }

    fn require_bool(&self, op: &'static str, x: ExprId) -> CoreResult<()> {
        let ty = self.ctx.expr_type(x);
        if self.ctx.resolve_type(ty).is_bool() {
            Ok(())
        } else {
            Err(self.mismatch(op, "Bool", ty))
        }
    }

    fn require_same_type(&self, op: &'static str, a: ExprId, b: ExprId) -> CoreResult<TypeId> {
        let ta = self.ctx.expr_type(a);
        let tb = self.ctx.expr_type(b);
        if ta != tb {
            if let (Type::Bv(wa), Type::Bv(wb)) =
                (self.ctx.resolve_type(ta), self.ctx.resolve_type(tb))
            {
                return Err(ContextError::WidthMismatch {
                    op,
                    lhs: wa,
                    rhs: wb,
                });
            }
            return Err(self.mismatch(op, &self.ctx.type_string(ta), tb));
        }
        Ok(ta)
    }

    // === Leaves ===

    pub fn bool_lit(&self, value: bool) -> ExprId {
        self.mk(ExprKind::BoolLit(value), self.ctx.bool_type(), smallvec![])
    }

    pub fn true_lit(&self) -> ExprId {
        self.bool_lit(true)
    }

    pub fn false_lit(&self) -> ExprId {
        self.bool_lit(false)
    }

    pub fn int_lit(&self, value: i128) -> ExprId {
        self.mk(ExprKind::IntLit(value), self.ctx.int_type(), smallvec![])
    }

    /// Bit-vector literal; the value is truncated to `width` bits.
    pub fn bv_lit(&self, value: u128, width: u32) -> ExprId {
        let masked = value & bv_mask(width);
        self.mk(
            ExprKind::BvLit {
                width,
                value: masked,
            },
            self.ctx.bv_type(width),
            smallvec![],
        )
    }

    pub fn float_lit(&self, kind: FloatKind, bits: u128) -> ExprId {
        self.mk(
            ExprKind::FloatLit { kind, bits },
            self.ctx.float_type(kind),
            smallvec![],
        )
    }

    pub fn float_from_f32(&self, value: f32) -> ExprId {
        self.float_lit(FloatKind::Single, value.to_bits() as u128)
    }

    pub fn float_from_f64(&self, value: f64) -> ExprId {
        self.float_lit(FloatKind::Double, value.to_bits() as u128)
    }

    pub fn undef(&self, ty: TypeId) -> ExprId {
        self.mk(ExprKind::Undef, ty, smallvec![])
    }

    pub fn var_ref(&self, var: VarId) -> ExprId {
        let ty = self.ctx.var_type(var);
        self.mk(ExprKind::VarRef(var), ty, smallvec![])
    }

    fn as_bool_lit(&self, x: ExprId) -> Option<bool> {
        match self.ctx.expr_kind(x) {
            ExprKind::BoolLit(b) => Some(b),
            _ => None,
        }
    }

    fn as_int_lit(&self, x: ExprId) -> Option<i128> {
        match self.ctx.expr_kind(x) {
            ExprKind::IntLit(v) => Some(v),
            _ => None,
        }
    }

    fn as_bv_lit(&self, x: ExprId) -> Option<(u32, u128)> {
        match self.ctx.expr_kind(x) {
            ExprKind::BvLit { width, value } => Some((width, value)),
            _ => None,
        }
    }

    fn as_float_lit(&self, x: ExprId) -> Option<(FloatKind, u128)> {
        match self.ctx.expr_kind(x) {
            ExprKind::FloatLit { kind, bits } => Some((kind, bits)),
            _ => None,
        }
    }

    // === Boolean connectives ===

    pub fn not(&self, x: ExprId) -> CoreResult<ExprId> {
        self.require_bool("Not", x)?;
        if self.folding() {
            if let Some(b) = self.as_bool_lit(x) {
                return Ok(self.bool_lit(!b));
            }
            if self.ctx.expr_kind(x) == ExprKind::Not {
                return Ok(self.ctx.operands(x)[0]);
            }
        }
        Ok(self.mk(ExprKind::Not, self.ctx.bool_type(), smallvec![x]))
    }

    pub fn and(&self, a: ExprId, b: ExprId) -> CoreResult<ExprId> {
        self.require_bool("And", a)?;
        self.require_bool("And", b)?;
        if self.folding() {
            match (self.as_bool_lit(a), self.as_bool_lit(b)) {
                (Some(false), _) | (_, Some(false)) => return Ok(self.false_lit()),
                (Some(true), _) => return Ok(b),
                (_, Some(true)) => return Ok(a),
                _ => {}
            }
            if a == b {
                return Ok(a);
            }
            if self.complementary(a, b) {
                return Ok(self.false_lit());
            }
        }
        Ok(self.mk(ExprKind::And, self.ctx.bool_type(), smallvec![a, b]))
    }

    pub fn or(&self, a: ExprId, b: ExprId) -> CoreResult<ExprId> {
        self.require_bool("Or", a)?;
        self.require_bool("Or", b)?;
        if self.folding() {
            match (self.as_bool_lit(a), self.as_bool_lit(b)) {
                (Some(true), _) | (_, Some(true)) => return Ok(self.true_lit()),
                (Some(false), _) => return Ok(b),
                (_, Some(false)) => return Ok(a),
                _ => {}
            }
            if a == b {
                return Ok(a);
            }
            if self.complementary(a, b) {
                return Ok(self.true_lit());
            }
        }
        Ok(self.mk(ExprKind::Or, self.ctx.bool_type(), smallvec![a, b]))
    }

    /// Whether one operand is the negation of the other.
    fn complementary(&self, a: ExprId, b: ExprId) -> bool {
        (self.ctx.expr_kind(a) == ExprKind::Not && self.ctx.operands(a)[0] == b)
            || (self.ctx.expr_kind(b) == ExprKind::Not && self.ctx.operands(b)[0] == a)
    }

    pub fn xor(&self, a: ExprId, b: ExprId) -> CoreResult<ExprId> {
        self.require_bool("Xor", a)?;
        self.require_bool("Xor", b)?;
        if self.folding() {
            if let (Some(va), Some(vb)) = (self.as_bool_lit(a), self.as_bool_lit(b)) {
                return Ok(self.bool_lit(va ^ vb));
            }
        }
        Ok(self.mk(ExprKind::Xor, self.ctx.bool_type(), smallvec![a, b]))
    }

    /// Variadic conjunction: empty sequences yield `true`, singletons the
    /// element itself. The folding builder drops neutral elements,
    /// deduplicates order-preservingly and short-circuits on `false`.
    pub fn and_many(&self, exprs: &[ExprId]) -> CoreResult<ExprId> {
        for x in exprs {
            self.require_bool("And", *x)?;
        }
        let args: Operands = if self.folding() {
            let mut seen: SmallVec<[ExprId; 8]> = smallvec![];
            for x in exprs {
                match self.as_bool_lit(*x) {
                    Some(false) => return Ok(self.false_lit()),
                    Some(true) => continue,
                    None => {
                        if !seen.contains(x) {
                            seen.push(*x);
                        }
                    }
                }
            }
            seen.into_iter().collect()
        } else {
            exprs.iter().copied().collect()
        };
        match args.len() {
            0 => Ok(self.true_lit()),
            1 => Ok(args[0]),
            _ => Ok(self.mk(ExprKind::And, self.ctx.bool_type(), args)),
        }
    }

    /// Variadic disjunction, dual of [`ExprBuilder::and_many`].
    pub fn or_many(&self, exprs: &[ExprId]) -> CoreResult<ExprId> {
        for x in exprs {
            self.require_bool("Or", *x)?;
        }
        let args: Operands = if self.folding() {
            let mut seen: SmallVec<[ExprId; 8]> = smallvec![];
            for x in exprs {
                match self.as_bool_lit(*x) {
                    Some(true) => return Ok(self.true_lit()),
                    Some(false) => continue,
                    None => {
                        if !seen.contains(x) {
                            seen.push(*x);
                        }
                    }
                }
            }
            seen.into_iter().collect()
        } else {
            exprs.iter().copied().collect()
        };
        match args.len() {
            0 => Ok(self.false_lit()),
            1 => Ok(args[0]),
            _ => Ok(self.mk(ExprKind::Or, self.ctx.bool_type(), args)),
        }
    }

    pub fn eq(&self, a: ExprId, b: ExprId) -> CoreResult<ExprId> {
        self.require_same_type("Eq", a, b)?;
        if self.folding() {
            if let (Some(va), Some(vb)) = (self.as_bool_lit(a), self.as_bool_lit(b)) {
                return Ok(self.bool_lit(va == vb));
            }
            if let (Some(va), Some(vb)) = (self.as_int_lit(a), self.as_int_lit(b)) {
                return Ok(self.bool_lit(va == vb));
            }
            if let (Some((_, va)), Some((_, vb))) = (self.as_bv_lit(a), self.as_bv_lit(b)) {
                return Ok(self.bool_lit(va == vb));
            }
        }
        Ok(self.mk(ExprKind::Eq, self.ctx.bool_type(), smallvec![a, b]))
    }

    pub fn not_eq(&self, a: ExprId, b: ExprId) -> CoreResult<ExprId> {
        self.require_same_type("NotEq", a, b)?;
        if self.folding() {
            if let (Some(va), Some(vb)) = (self.as_bool_lit(a), self.as_bool_lit(b)) {
                return Ok(self.bool_lit(va != vb));
            }
            if let (Some(va), Some(vb)) = (self.as_int_lit(a), self.as_int_lit(b)) {
                return Ok(self.bool_lit(va != vb));
            }
            if let (Some((_, va)), Some((_, vb))) = (self.as_bv_lit(a), self.as_bv_lit(b)) {
                return Ok(self.bool_lit(va != vb));
            }
        }
        Ok(self.mk(ExprKind::NotEq, self.ctx.bool_type(), smallvec![a, b]))
    }

    pub fn select(&self, cond: ExprId, then: ExprId, elze: ExprId) -> CoreResult<ExprId> {
        self.require_bool("Select", cond)?;
        let ty = self.require_same_type("Select", then, elze)?;
        if self.folding() {
            match self.as_bool_lit(cond) {
                Some(true) => return Ok(then),
                Some(false) => return Ok(elze),
                None => {}
            }
            if then == elze {
                return Ok(then);
            }
        }
        Ok(self.mk(ExprKind::Select, ty, smallvec![cond, then, elze]))
    }

    // === Arithmetic (Int and Bv) ===

    fn arith_ty(&self, op: &'static str, a: ExprId, b: ExprId) -> CoreResult<TypeId> {
        let ty = self.require_same_type(op, a, b)?;
        match self.ctx.resolve_type(ty) {
            Type::Int | Type::Bv(_) => Ok(ty),
            _ => Err(self.mismatch(op, "Int or Bv", ty)),
        }
    }

    pub fn add(&self, a: ExprId, b: ExprId) -> CoreResult<ExprId> {
        let ty = self.arith_ty("Add", a, b)?;
        if self.folding() {
            if let (Some(va), Some(vb)) = (self.as_int_lit(a), self.as_int_lit(b)) {
                if let Some(v) = va.checked_add(vb) {
                    return Ok(self.int_lit(v));
                }
            }
            if let (Some((w, va)), Some((_, vb))) = (self.as_bv_lit(a), self.as_bv_lit(b)) {
                return Ok(self.bv_lit(va.wrapping_add(vb), w));
            }
            if self.is_zero(b) {
                return Ok(a);
            }
            if self.is_zero(a) {
                return Ok(b);
            }
        }
        Ok(self.mk(ExprKind::Add, ty, smallvec![a, b]))
    }

    pub fn sub(&self, a: ExprId, b: ExprId) -> CoreResult<ExprId> {
        let ty = self.arith_ty("Sub", a, b)?;
        if self.folding() {
            if let (Some(va), Some(vb)) = (self.as_int_lit(a), self.as_int_lit(b)) {
                if let Some(v) = va.checked_sub(vb) {
                    return Ok(self.int_lit(v));
                }
            }
            if let (Some((w, va)), Some((_, vb))) = (self.as_bv_lit(a), self.as_bv_lit(b)) {
                return Ok(self.bv_lit(va.wrapping_sub(vb), w));
            }
            if self.is_zero(b) {
                return Ok(a);
            }
        }
        Ok(self.mk(ExprKind::Sub, ty, smallvec![a, b]))
    }

    pub fn mul(&self, a: ExprId, b: ExprId) -> CoreResult<ExprId> {
        let ty = self.arith_ty("Mul", a, b)?;
        if self.folding() {
            if let (Some(va), Some(vb)) = (self.as_int_lit(a), self.as_int_lit(b)) {
                if let Some(v) = va.checked_mul(vb) {
                    return Ok(self.int_lit(v));
                }
            }
            if let (Some((w, va)), Some((_, vb))) = (self.as_bv_lit(a), self.as_bv_lit(b)) {
                return Ok(self.bv_lit(va.wrapping_mul(vb), w));
            }
            if self.is_zero(a) {
                return Ok(a);
            }
            if self.is_zero(b) {
                return Ok(b);
            }
            if self.is_one(a) {
                return Ok(b);
            }
            if self.is_one(b) {
                return Ok(a);
            }
        }
        Ok(self.mk(ExprKind::Mul, ty, smallvec![a, b]))
    }

    fn is_zero(&self, x: ExprId) -> bool {
        matches!(
            self.ctx.expr_kind(x),
            ExprKind::IntLit(0) | ExprKind::BvLit { value: 0, .. }
        )
    }

    fn is_one(&self, x: ExprId) -> bool {
        matches!(
            self.ctx.expr_kind(x),
            ExprKind::IntLit(1) | ExprKind::BvLit { value: 1, .. }
        )
    }

    fn int_binary(
        &self,
        op: &'static str,
        kind: ExprKind,
        a: ExprId,
        b: ExprId,
        fold: impl Fn(i128, i128) -> Option<i128>,
    ) -> CoreResult<ExprId> {
        let ty = self.require_same_type(op, a, b)?;
        if !self.ctx.resolve_type(ty).is_int() {
            return Err(self.mismatch(op, "Int", ty));
        }
        if self.folding() {
            if let (Some(va), Some(vb)) = (self.as_int_lit(a), self.as_int_lit(b)) {
                if let Some(v) = fold(va, vb) {
                    return Ok(self.int_lit(v));
                }
            }
        }
        Ok(self.mk(kind, ty, smallvec![a, b]))
    }

    /// Integer division with Euclidean semantics (remainder non-negative),
    /// matching SMT-LIB `div`.
    pub fn div(&self, a: ExprId, b: ExprId) -> CoreResult<ExprId> {
        self.int_binary("Div", ExprKind::Div, a, b, |x, y| {
            (y != 0).then(|| x.div_euclid(y))
        })
    }

    /// Integer modulus with Euclidean semantics, matching SMT-LIB `mod`.
    pub fn modulo(&self, a: ExprId, b: ExprId) -> CoreResult<ExprId> {
        self.int_binary("Mod", ExprKind::Mod, a, b, |x, y| {
            (y != 0).then(|| x.rem_euclid(y))
        })
    }

    fn int_compare(
        &self,
        op: &'static str,
        kind: ExprKind,
        a: ExprId,
        b: ExprId,
        fold: impl Fn(i128, i128) -> bool,
    ) -> CoreResult<ExprId> {
        let ty = self.require_same_type(op, a, b)?;
        if !self.ctx.resolve_type(ty).is_int() {
            return Err(self.mismatch(op, "Int", ty));
        }
        if self.folding() {
            if let (Some(va), Some(vb)) = (self.as_int_lit(a), self.as_int_lit(b)) {
                return Ok(self.bool_lit(fold(va, vb)));
            }
        }
        Ok(self.mk(kind, self.ctx.bool_type(), smallvec![a, b]))
    }

    pub fn lt(&self, a: ExprId, b: ExprId) -> CoreResult<ExprId> {
        self.int_compare("Lt", ExprKind::Lt, a, b, |x, y| x < y)
    }

    pub fn lt_eq(&self, a: ExprId, b: ExprId) -> CoreResult<ExprId> {
        self.int_compare("LtEq", ExprKind::LtEq, a, b, |x, y| x <= y)
    }

    pub fn gt(&self, a: ExprId, b: ExprId) -> CoreResult<ExprId> {
        self.int_compare("Gt", ExprKind::Gt, a, b, |x, y| x > y)
    }

    pub fn gt_eq(&self, a: ExprId, b: ExprId) -> CoreResult<ExprId> {
        self.int_compare("GtEq", ExprKind::GtEq, a, b, |x, y| x >= y)
    }

    // === Bit-vector operations ===

    fn bv_binary(
        &self,
        op: &'static str,
        kind: ExprKind,
        a: ExprId,
        b: ExprId,
        fold: impl Fn(u32, u128, u128) -> Option<u128>,
    ) -> CoreResult<ExprId> {
        let ty = self.require_same_type(op, a, b)?;
        let width = self
            .ctx
            .resolve_type(ty)
            .bv_width()
            .ok_or_else(|| self.mismatch(op, "Bv", ty))?;
        if self.folding() {
            if let (Some((_, va)), Some((_, vb))) = (self.as_bv_lit(a), self.as_bv_lit(b)) {
                if let Some(v) = fold(width, va, vb) {
                    return Ok(self.bv_lit(v, width));
                }
            }
        }
        Ok(self.mk(kind, ty, smallvec![a, b]))
    }

    pub fn bv_sdiv(&self, a: ExprId, b: ExprId) -> CoreResult<ExprId> {
        self.bv_binary("BvSDiv", ExprKind::BvSDiv, a, b, |w, x, y| {
            (y != 0).then(|| {
                let q = bv_signed(w, x).wrapping_div(bv_signed(w, y));
                q as u128
            })
        })
    }

    pub fn bv_udiv(&self, a: ExprId, b: ExprId) -> CoreResult<ExprId> {
        self.bv_binary("BvUDiv", ExprKind::BvUDiv, a, b, |_, x, y| {
            (y != 0).then(|| x / y)
        })
    }

    pub fn bv_srem(&self, a: ExprId, b: ExprId) -> CoreResult<ExprId> {
        self.bv_binary("BvSRem", ExprKind::BvSRem, a, b, |w, x, y| {
            (y != 0).then(|| bv_signed(w, x).wrapping_rem(bv_signed(w, y)) as u128)
        })
    }

    pub fn bv_urem(&self, a: ExprId, b: ExprId) -> CoreResult<ExprId> {
        self.bv_binary("BvURem", ExprKind::BvURem, a, b, |_, x, y| {
            (y != 0).then(|| x % y)
        })
    }

    pub fn shl(&self, a: ExprId, b: ExprId) -> CoreResult<ExprId> {
        self.bv_binary("Shl", ExprKind::Shl, a, b, |w, x, y| {
            Some(if y >= w as u128 { 0 } else { x << y })
        })
    }

    pub fn lshr(&self, a: ExprId, b: ExprId) -> CoreResult<ExprId> {
        self.bv_binary("LShr", ExprKind::LShr, a, b, |w, x, y| {
            Some(if y >= w as u128 { 0 } else { x >> y })
        })
    }

    pub fn ashr(&self, a: ExprId, b: ExprId) -> CoreResult<ExprId> {
        self.bv_binary("AShr", ExprKind::AShr, a, b, |w, x, y| {
            let signed = bv_signed(w, x);
            Some(if y >= w as u128 {
                if signed < 0 {
                    bv_mask(w)
                } else {
                    0
                }
            } else {
                (signed >> (y as u32)) as u128
            })
        })
    }

    pub fn bv_and(&self, a: ExprId, b: ExprId) -> CoreResult<ExprId> {
        self.bv_binary("BvAnd", ExprKind::BvAnd, a, b, |_, x, y| Some(x & y))
    }

    pub fn bv_or(&self, a: ExprId, b: ExprId) -> CoreResult<ExprId> {
        self.bv_binary("BvOr", ExprKind::BvOr, a, b, |_, x, y| Some(x | y))
    }

    pub fn bv_xor(&self, a: ExprId, b: ExprId) -> CoreResult<ExprId> {
        self.bv_binary("BvXor", ExprKind::BvXor, a, b, |_, x, y| Some(x ^ y))
    }

    fn bv_compare(
        &self,
        op: &'static str,
        kind: ExprKind,
        a: ExprId,
        b: ExprId,
        fold: impl Fn(u32, u128, u128) -> bool,
    ) -> CoreResult<ExprId> {
        let ty = self.require_same_type(op, a, b)?;
        if !self.ctx.resolve_type(ty).is_bv() {
            return Err(self.mismatch(op, "Bv", ty));
        }
        if self.folding() {
            if let (Some((w, va)), Some((_, vb))) = (self.as_bv_lit(a), self.as_bv_lit(b)) {
                return Ok(self.bool_lit(fold(w, va, vb)));
            }
        }
        Ok(self.mk(kind, self.ctx.bool_type(), smallvec![a, b]))
    }

    pub fn bv_slt(&self, a: ExprId, b: ExprId) -> CoreResult<ExprId> {
        self.bv_compare("BvSLt", ExprKind::BvSLt, a, b, |w, x, y| {
            bv_signed(w, x) < bv_signed(w, y)
        })
    }

    pub fn bv_slt_eq(&self, a: ExprId, b: ExprId) -> CoreResult<ExprId> {
        self.bv_compare("BvSLtEq", ExprKind::BvSLtEq, a, b, |w, x, y| {
            bv_signed(w, x) <= bv_signed(w, y)
        })
    }

    pub fn bv_sgt(&self, a: ExprId, b: ExprId) -> CoreResult<ExprId> {
        self.bv_compare("BvSGt", ExprKind::BvSGt, a, b, |w, x, y| {
            bv_signed(w, x) > bv_signed(w, y)
        })
    }

    pub fn bv_sgt_eq(&self, a: ExprId, b: ExprId) -> CoreResult<ExprId> {
        self.bv_compare("BvSGtEq", ExprKind::BvSGtEq, a, b, |w, x, y| {
            bv_signed(w, x) >= bv_signed(w, y)
        })
    }

    pub fn bv_ult(&self, a: ExprId, b: ExprId) -> CoreResult<ExprId> {
        self.bv_compare("BvULt", ExprKind::BvULt, a, b, |_, x, y| x < y)
    }

    pub fn bv_ult_eq(&self, a: ExprId, b: ExprId) -> CoreResult<ExprId> {
        self.bv_compare("BvULtEq", ExprKind::BvULtEq, a, b, |_, x, y| x <= y)
    }

    pub fn bv_ugt(&self, a: ExprId, b: ExprId) -> CoreResult<ExprId> {
        self.bv_compare("BvUGt", ExprKind::BvUGt, a, b, |_, x, y| x > y)
    }

    pub fn bv_ugt_eq(&self, a: ExprId, b: ExprId) -> CoreResult<ExprId> {
        self.bv_compare("BvUGtEq", ExprKind::BvUGtEq, a, b, |_, x, y| x >= y)
    }

    // === Bit-vector casts ===

    fn cast_widths(&self, op: &'static str, x: ExprId, to: TypeId) -> CoreResult<(u32, u32)> {
        let from_ty = self.ctx.expr_type(x);
        let from = self
            .ctx
            .resolve_type(from_ty)
            .bv_width()
            .ok_or_else(|| self.mismatch(op, "Bv", from_ty))?;
        let target = self
            .ctx
            .resolve_type(to)
            .bv_width()
            .ok_or_else(|| self.mismatch(op, "Bv", to))?;
        Ok((from, target))
    }

    pub fn zext(&self, x: ExprId, to: TypeId) -> CoreResult<ExprId> {
        let (from, target) = self.cast_widths("ZExt", x, to)?;
        if target < from {
            return Err(ContextError::WidthMismatch {
                op: "ZExt",
                lhs: from,
                rhs: target,
            });
        }
        if self.folding() {
            if from == target {
                return Ok(x);
            }
            if let Some((_, v)) = self.as_bv_lit(x) {
                return Ok(self.bv_lit(v, target));
            }
        }
        Ok(self.mk(ExprKind::ZExt, to, smallvec![x]))
    }

    pub fn sext(&self, x: ExprId, to: TypeId) -> CoreResult<ExprId> {
        let (from, target) = self.cast_widths("SExt", x, to)?;
        if target < from {
            return Err(ContextError::WidthMismatch {
                op: "SExt",
                lhs: from,
                rhs: target,
            });
        }
        if self.folding() {
            if from == target {
                return Ok(x);
            }
            if let Some((w, v)) = self.as_bv_lit(x) {
                return Ok(self.bv_lit(bv_signed(w, v) as u128, target));
            }
            // The sign bit of a widening ZExt result is always clear, so
            // sign extension degenerates to zero extension.
            if self.ctx.expr_kind(x) == ExprKind::ZExt {
                let inner = self.ctx.operands(x)[0];
                if let Some(inner_w) = self.ctx.type_of(inner).bv_width() {
                    if inner_w < from {
                        return self.zext(inner, to);
                    }
                }
            }
        }
        Ok(self.mk(ExprKind::SExt, to, smallvec![x]))
    }

    pub fn trunc(&self, x: ExprId, to: TypeId) -> CoreResult<ExprId> {
        let (from, target) = self.cast_widths("Trunc", x, to)?;
        if target > from {
            return Err(ContextError::WidthMismatch {
                op: "Trunc",
                lhs: from,
                rhs: target,
            });
        }
        if self.folding() {
            if from == target {
                return Ok(x);
            }
            if let Some((_, v)) = self.as_bv_lit(x) {
                return Ok(self.bv_lit(v, target));
            }
        }
        Ok(self.mk(ExprKind::Trunc, to, smallvec![x]))
    }

    // === Floating point ===

    /// Fold two float literals through native arithmetic. Only `Single` and
    /// `Double` under round-nearest-ties-even have a faithful host analogue.
    fn fold_float_binary(
        &self,
        a: ExprId,
        b: ExprId,
        rm: RoundingMode,
        f32_op: impl Fn(f32, f32) -> f32,
        f64_op: impl Fn(f64, f64) -> f64,
    ) -> Option<ExprId> {
        if rm != RoundingMode::NearestTiesToEven {
            return None;
        }
        let (kind, xa) = self.as_float_lit(a)?;
        let (_, xb) = self.as_float_lit(b)?;
        match kind {
            FloatKind::Single => {
                let v = f32_op(f32::from_bits(xa as u32), f32::from_bits(xb as u32));
                Some(self.float_from_f32(v))
            }
            FloatKind::Double => {
                let v = f64_op(f64::from_bits(xa as u64), f64::from_bits(xb as u64));
                Some(self.float_from_f64(v))
            }
            _ => None,
        }
    }

    fn float_arith(
        &self,
        op: &'static str,
        kind: impl Fn(RoundingMode) -> ExprKind,
        a: ExprId,
        b: ExprId,
        rm: RoundingMode,
        f32_op: impl Fn(f32, f32) -> f32,
        f64_op: impl Fn(f64, f64) -> f64,
    ) -> CoreResult<ExprId> {
        let ty = self.require_same_type(op, a, b)?;
        if !self.ctx.resolve_type(ty).is_float() {
            return Err(self.mismatch(op, "Float", ty));
        }
        if self.folding() {
            if let Some(folded) = self.fold_float_binary(a, b, rm, f32_op, f64_op) {
                return Ok(folded);
            }
        }
        Ok(self.mk(kind(rm), ty, smallvec![a, b]))
    }

    pub fn fadd(&self, a: ExprId, b: ExprId, rm: RoundingMode) -> CoreResult<ExprId> {
        self.float_arith("FAdd", ExprKind::FAdd, a, b, rm, |x, y| x + y, |x, y| x + y)
    }

    pub fn fsub(&self, a: ExprId, b: ExprId, rm: RoundingMode) -> CoreResult<ExprId> {
        self.float_arith("FSub", ExprKind::FSub, a, b, rm, |x, y| x - y, |x, y| x - y)
    }

    pub fn fmul(&self, a: ExprId, b: ExprId, rm: RoundingMode) -> CoreResult<ExprId> {
        self.float_arith("FMul", ExprKind::FMul, a, b, rm, |x, y| x * y, |x, y| x * y)
    }

    pub fn fdiv(&self, a: ExprId, b: ExprId, rm: RoundingMode) -> CoreResult<ExprId> {
        self.float_arith("FDiv", ExprKind::FDiv, a, b, rm, |x, y| x / y, |x, y| x / y)
    }

    fn float_compare(
        &self,
        op: &'static str,
        kind: ExprKind,
        a: ExprId,
        b: ExprId,
        f32_op: impl Fn(f32, f32) -> bool,
        f64_op: impl Fn(f64, f64) -> bool,
    ) -> CoreResult<ExprId> {
        let ty = self.require_same_type(op, a, b)?;
        if !self.ctx.resolve_type(ty).is_float() {
            return Err(self.mismatch(op, "Float", ty));
        }
        if self.folding() {
            if let (Some((fk, xa)), Some((_, xb))) = (self.as_float_lit(a), self.as_float_lit(b)) {
                match fk {
                    FloatKind::Single => {
                        let r = f32_op(f32::from_bits(xa as u32), f32::from_bits(xb as u32));
                        return Ok(self.bool_lit(r));
                    }
                    FloatKind::Double => {
                        let r = f64_op(f64::from_bits(xa as u64), f64::from_bits(xb as u64));
                        return Ok(self.bool_lit(r));
                    }
                    _ => {}
                }
            }
        }
        Ok(self.mk(kind, self.ctx.bool_type(), smallvec![a, b]))
    }

    pub fn feq(&self, a: ExprId, b: ExprId) -> CoreResult<ExprId> {
        self.float_compare("FEq", ExprKind::FEq, a, b, |x, y| x == y, |x, y| x == y)
    }

    pub fn fgt(&self, a: ExprId, b: ExprId) -> CoreResult<ExprId> {
        self.float_compare("FGt", ExprKind::FGt, a, b, |x, y| x > y, |x, y| x > y)
    }

    pub fn fgt_eq(&self, a: ExprId, b: ExprId) -> CoreResult<ExprId> {
        self.float_compare("FGtEq", ExprKind::FGtEq, a, b, |x, y| x >= y, |x, y| x >= y)
    }

    pub fn flt(&self, a: ExprId, b: ExprId) -> CoreResult<ExprId> {
        self.float_compare("FLt", ExprKind::FLt, a, b, |x, y| x < y, |x, y| x < y)
    }

    pub fn flt_eq(&self, a: ExprId, b: ExprId) -> CoreResult<ExprId> {
        self.float_compare("FLtEq", ExprKind::FLtEq, a, b, |x, y| x <= y, |x, y| x <= y)
    }

    pub fn fis_nan(&self, x: ExprId) -> CoreResult<ExprId> {
        let ty = self.ctx.expr_type(x);
        if !self.ctx.resolve_type(ty).is_float() {
            return Err(self.mismatch("FIsNan", "Float", ty));
        }
        if self.folding() {
            if let Some((kind, bits)) = self.as_float_lit(x) {
                return Ok(self.bool_lit(float_is_nan(kind, bits)));
            }
        }
        Ok(self.mk(ExprKind::FIsNan, self.ctx.bool_type(), smallvec![x]))
    }

    pub fn fcast(&self, x: ExprId, to: TypeId, rm: RoundingMode) -> CoreResult<ExprId> {
        let from_ty = self.ctx.expr_type(x);
        if !self.ctx.resolve_type(from_ty).is_float() {
            return Err(self.mismatch("FCast", "Float", from_ty));
        }
        let to_kind = self
            .ctx
            .resolve_type(to)
            .float_kind()
            .ok_or_else(|| self.mismatch("FCast", "Float", to))?;
        if self.folding() && rm == RoundingMode::NearestTiesToEven {
            if let Some((from_kind, bits)) = self.as_float_lit(x) {
                match (from_kind, to_kind) {
                    (FloatKind::Single, FloatKind::Double) => {
                        return Ok(self.float_from_f64(f32::from_bits(bits as u32) as f64));
                    }
                    (FloatKind::Double, FloatKind::Single) => {
                        return Ok(self.float_from_f32(f64::from_bits(bits as u64) as f32));
                    }
                    (a, b) if a == b => return Ok(x),
                    _ => {}
                }
            }
        }
        Ok(self.mk(ExprKind::FCast(rm), to, smallvec![x]))
    }

    pub fn signed_to_fp(&self, x: ExprId, to: TypeId, rm: RoundingMode) -> CoreResult<ExprId> {
        self.int_to_fp("SignedToFp", ExprKind::SignedToFp, x, to, rm, true)
    }

    pub fn unsigned_to_fp(&self, x: ExprId, to: TypeId, rm: RoundingMode) -> CoreResult<ExprId> {
        self.int_to_fp("UnsignedToFp", ExprKind::UnsignedToFp, x, to, rm, false)
    }

    fn int_to_fp(
        &self,
        op: &'static str,
        kind: impl Fn(RoundingMode) -> ExprKind,
        x: ExprId,
        to: TypeId,
        rm: RoundingMode,
        signed: bool,
    ) -> CoreResult<ExprId> {
        let from_ty = self.ctx.expr_type(x);
        match self.ctx.resolve_type(from_ty) {
            Type::Bv(_) | Type::Int => {}
            _ => return Err(self.mismatch(op, "Int or Bv", from_ty)),
        }
        let to_kind = self
            .ctx
            .resolve_type(to)
            .float_kind()
            .ok_or_else(|| self.mismatch(op, "Float", to))?;
        if self.folding() && rm == RoundingMode::NearestTiesToEven {
            let source: Option<i128> = match self.ctx.expr_kind(x) {
                ExprKind::IntLit(v) => Some(v),
                ExprKind::BvLit { width, value } => Some(if signed {
                    bv_signed(width, value)
                } else {
                    value as i128
                }),
                _ => None,
            };
            if let Some(v) = source {
                match to_kind {
                    FloatKind::Single => return Ok(self.float_from_f32(v as f32)),
                    FloatKind::Double => return Ok(self.float_from_f64(v as f64)),
                    _ => {}
                }
            }
        }
        Ok(self.mk(kind(rm), to, smallvec![x]))
    }

    pub fn fp_to_signed(&self, x: ExprId, to: TypeId, rm: RoundingMode) -> CoreResult<ExprId> {
        self.fp_to_int("FpToSigned", ExprKind::FpToSigned, x, to, rm)
    }

    pub fn fp_to_unsigned(&self, x: ExprId, to: TypeId, rm: RoundingMode) -> CoreResult<ExprId> {
        self.fp_to_int("FpToUnsigned", ExprKind::FpToUnsigned, x, to, rm)
    }

    fn fp_to_int(
        &self,
        op: &'static str,
        kind: impl Fn(RoundingMode) -> ExprKind,
        x: ExprId,
        to: TypeId,
        rm: RoundingMode,
    ) -> CoreResult<ExprId> {
        let from_ty = self.ctx.expr_type(x);
        if !self.ctx.resolve_type(from_ty).is_float() {
            return Err(self.mismatch(op, "Float", from_ty));
        }
        match self.ctx.resolve_type(to) {
            Type::Bv(_) | Type::Int => {}
            _ => return Err(self.mismatch(op, "Int or Bv", to)),
        }
        // Out-of-range conversion semantics are target-defined; never folded.
        Ok(self.mk(kind(rm), to, smallvec![x]))
    }

    // === Arrays ===

    pub fn read(&self, array: ExprId, index: ExprId) -> CoreResult<ExprId> {
        let arr_ty = self.ctx.expr_type(array);
        let (domain, range) = match self.ctx.resolve_type(arr_ty) {
            Type::Array(d, r) => (d, r),
            _ => return Err(self.mismatch("Read", "Array", arr_ty)),
        };
        let idx_ty = self.ctx.expr_type(index);
        if idx_ty != domain {
            return Err(self.mismatch("Read", &self.ctx.type_string(domain), idx_ty));
        }
        Ok(self.mk(ExprKind::Read, range, smallvec![array, index]))
    }

    pub fn write(&self, array: ExprId, index: ExprId, value: ExprId) -> CoreResult<ExprId> {
        let arr_ty = self.ctx.expr_type(array);
        let (domain, range) = match self.ctx.resolve_type(arr_ty) {
            Type::Array(d, r) => (d, r),
            _ => return Err(self.mismatch("Write", "Array", arr_ty)),
        };
        let idx_ty = self.ctx.expr_type(index);
        if idx_ty != domain {
            return Err(self.mismatch("Write", &self.ctx.type_string(domain), idx_ty));
        }
        let val_ty = self.ctx.expr_type(value);
        if val_ty != range {
            return Err(self.mismatch("Write", &self.ctx.type_string(range), val_ty));
        }
        Ok(self.mk(ExprKind::Write, arr_ty, smallvec![array, index, value]))
    }
}

#[cfg(test)]
mod tests {
    use crate::expr::Context;
    use crate::types::FloatKind;
    use crate::{ContextError, ExprKind};

    #[test]
    fn boolean_identities() {
        let ctx = Context::new();
        let b = ctx.builder();
        let x = b.var_ref(ctx.create_variable("x", ctx.bool_type()).unwrap());

        assert_eq!(b.and(b.true_lit(), x).unwrap(), x);
        assert_eq!(b.and(b.false_lit(), x).unwrap(), b.false_lit());
        assert_eq!(b.or(b.false_lit(), x).unwrap(), x);
        assert_eq!(b.or(b.true_lit(), x).unwrap(), b.true_lit());
        assert_eq!(b.not(b.not(x).unwrap()).unwrap(), x);
        assert_eq!(b.and(x, x).unwrap(), x);
        assert_eq!(b.or(x, x).unwrap(), x);
    }

    #[test]
    fn select_laws() {
        let ctx = Context::new();
        let b = ctx.builder();
        let ty = ctx.bv_type(32);
        let x = b.var_ref(ctx.create_variable("x", ty).unwrap());
        let y = b.var_ref(ctx.create_variable("y", ty).unwrap());
        let c = b.var_ref(ctx.create_variable("c", ctx.bool_type()).unwrap());

        assert_eq!(b.select(b.true_lit(), x, y).unwrap(), x);
        assert_eq!(b.select(b.false_lit(), x, y).unwrap(), y);
        assert_eq!(b.select(c, x, x).unwrap(), x);
    }

    #[test]
    fn hash_consing_shares_structure() {
        let ctx = Context::new();
        let b = ctx.builder();
        let x = b.var_ref(ctx.create_variable("x", ctx.bool_type()).unwrap());
        let y = b.var_ref(ctx.create_variable("y", ctx.bool_type()).unwrap());

        let first = b.and(x, y).unwrap();
        let second = b.and(x, y).unwrap();
        assert_eq!(first, second);

        // The plain builder allocates fresh nodes per call.
        let p = ctx.plain_builder();
        assert_ne!(p.and(x, y).unwrap(), p.and(x, y).unwrap());
    }

    #[test]
    fn excluded_middle_folds_away() {
        let ctx = Context::new();
        let b = ctx.builder();
        let a = b.var_ref(ctx.create_variable("a", ctx.bool_type()).unwrap());
        let bee = b.var_ref(ctx.create_variable("b", ctx.bool_type()).unwrap());

        let tautology = b.or(a, b.not(a).unwrap()).unwrap();
        assert_eq!(b.and(tautology, bee).unwrap(), bee);
        assert_eq!(b.and(a, b.not(a).unwrap()).unwrap(), b.false_lit());
    }

    #[test]
    fn arithmetic_identities_and_folding() {
        let ctx = Context::new();
        let b = ctx.builder();
        let x = b.var_ref(ctx.create_variable("x", ctx.int_type()).unwrap());

        assert_eq!(b.add(x, b.int_lit(0)).unwrap(), x);
        assert_eq!(b.sub(x, b.int_lit(0)).unwrap(), x);
        assert_eq!(b.mul(x, b.int_lit(1)).unwrap(), x);
        assert_eq!(b.mul(x, b.int_lit(0)).unwrap(), b.int_lit(0));

        assert_eq!(b.add(b.int_lit(2), b.int_lit(40)).unwrap(), b.int_lit(42));
        assert_eq!(b.div(b.int_lit(7), b.int_lit(2)).unwrap(), b.int_lit(3));
        // Euclidean semantics: the remainder is never negative.
        assert_eq!(b.modulo(b.int_lit(-7), b.int_lit(4)).unwrap(), b.int_lit(1));
        assert_eq!(
            b.lt(b.int_lit(-1), b.int_lit(0)).unwrap(),
            b.true_lit()
        );
    }

    #[test]
    fn bitvector_folding_wraps() {
        let ctx = Context::new();
        let b = ctx.builder();

        let max = b.bv_lit(0xFF, 8);
        let one = b.bv_lit(1, 8);
        assert_eq!(b.add(max, one).unwrap(), b.bv_lit(0, 8));
        assert_eq!(b.mul(b.bv_lit(16, 8), b.bv_lit(16, 8)).unwrap(), b.bv_lit(0, 8));

        // -1 sdiv -1 == 1 at any width.
        assert_eq!(b.bv_sdiv(max, max).unwrap(), one);
        assert_eq!(b.bv_udiv(max, one).unwrap(), max);

        // Signed comparison sees 0xFF as -1.
        assert_eq!(b.bv_slt(max, b.bv_lit(0, 8)).unwrap(), b.true_lit());
        assert_eq!(b.bv_ult(max, b.bv_lit(0, 8)).unwrap(), b.false_lit());
    }

    #[test]
    fn cast_folding() {
        let ctx = Context::new();
        let b = ctx.builder();

        let small = b.bv_lit(0x80, 8);
        assert_eq!(b.zext(small, ctx.bv_type(16)).unwrap(), b.bv_lit(0x80, 16));
        assert_eq!(b.sext(small, ctx.bv_type(16)).unwrap(), b.bv_lit(0xFF80, 16));
        assert_eq!(
            b.trunc(b.bv_lit(0x1234, 16), ctx.bv_type(8)).unwrap(),
            b.bv_lit(0x34, 8)
        );
    }

    #[test]
    fn widening_zext_absorbs_sext() {
        let ctx = Context::new();
        let b = ctx.builder();
        let x = b.var_ref(ctx.create_variable("x", ctx.bv_type(8)).unwrap());

        let widened = b.zext(x, ctx.bv_type(16)).unwrap();
        let sext = b.sext(widened, ctx.bv_type(32)).unwrap();
        assert_eq!(sext, b.zext(x, ctx.bv_type(32)).unwrap());
    }

    #[test]
    fn float_nan_comparisons() {
        let ctx = Context::new();
        let b = ctx.builder();
        let nan = b.float_from_f64(f64::NAN);
        let one = b.float_from_f64(1.0);

        assert_eq!(b.fis_nan(nan).unwrap(), b.true_lit());
        assert_eq!(b.fis_nan(one).unwrap(), b.false_lit());
        assert_eq!(b.feq(nan, one).unwrap(), b.false_lit());
        assert_eq!(b.flt(nan, one).unwrap(), b.false_lit());
        assert_eq!(b.feq(nan, nan).unwrap(), b.false_lit());
    }

    #[test]
    fn variadic_connectives_normalize() {
        let ctx = Context::new();
        let b = ctx.builder();
        let x = b.var_ref(ctx.create_variable("x", ctx.bool_type()).unwrap());

        assert_eq!(b.and_many(&[]).unwrap(), b.true_lit());
        assert_eq!(b.or_many(&[]).unwrap(), b.false_lit());
        assert_eq!(b.and_many(&[x]).unwrap(), x);
        assert_eq!(b.and_many(&[x, b.true_lit(), x]).unwrap(), x);
        assert_eq!(b.or_many(&[x, b.true_lit()]).unwrap(), b.true_lit());
    }

    #[test]
    fn type_errors_are_reported() {
        let ctx = Context::new();
        let b = ctx.builder();
        let flag = b.var_ref(ctx.create_variable("flag", ctx.bool_type()).unwrap());
        let word = b.var_ref(ctx.create_variable("word", ctx.bv_type(32)).unwrap());

        assert!(matches!(
            b.and(flag, word),
            Err(ContextError::TypeMismatch { .. })
        ));
        let narrow = b.var_ref(ctx.create_variable("narrow", ctx.bv_type(8)).unwrap());
        assert!(matches!(
            b.add(word, narrow),
            Err(ContextError::WidthMismatch { .. })
        ));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let ctx = Context::new();
        ctx.create_variable("main/x", ctx.bool_type()).unwrap();
        assert!(matches!(
            ctx.create_variable("main/x", ctx.int_type()),
            Err(ContextError::DuplicateName { .. })
        ));
    }

    #[test]
    fn types_are_interned() {
        let ctx = Context::new();
        assert_eq!(ctx.bv_type(32), ctx.bv_type(32));
        assert_ne!(ctx.bv_type(32), ctx.bv_type(33));
        assert_eq!(
            ctx.array_type(ctx.int_type(), ctx.bv_type(8)),
            ctx.array_type(ctx.int_type(), ctx.bv_type(8))
        );
        assert_eq!(
            ctx.float_type(FloatKind::Double),
            ctx.float_type(FloatKind::Double)
        );
    }

    #[test]
    fn undef_nodes_carry_their_type() {
        let ctx = Context::new();
        let b = ctx.builder();
        let u = b.undef(ctx.bv_type(8));
        assert_eq!(ctx.expr_kind(u), ExprKind::Undef);
        assert_eq!(ctx.expr_type(u), ctx.bv_type(8));
    }
}
