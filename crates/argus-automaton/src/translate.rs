//! Instruction-to-expression translation.
//!
//! Lowers a single SSA instruction to an expression equal to the value the
//! instruction defines. Two orthogonal integer interpretations exist: the
//! bit-vector mode models fixed-width two's complement arithmetic, the
//! integer mode maps program integers to unbounded mathematical integers
//! with explicit narrowing where the program truncates.

use argus_core::{Context, ExprId, RoundingMode, Type, TypeId};
use argus_ir::{
    BinaryOp, CastOp, FCmpPred, Function, ICmpPred, Inst, InstKind, IrType, LocalId, Value,
};

use crate::memory::{MemoryModel, ScopedVars};
use crate::{BuildError, BuildResult};

/// How program integers map into the expression layer. Immutable for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntRepresentation {
    /// Fixed-width bit-vectors with two's complement semantics.
    #[default]
    BitVectors,
    /// Unbounded mathematical integers.
    Integers,
}

/// Translation settings, fixed for the lifetime of a verification run.
#[derive(Debug, Clone, Copy, Default)]
pub struct Settings {
    pub int_representation: IntRepresentation,
}

/// Rounding used for float operations the front end does not annotate.
const DEFAULT_ROUNDING: RoundingMode = RoundingMode::NearestTiesToEven;

/// Variable resolution hooks provided by the automaton under construction.
pub trait TranslateEnv: ScopedVars {
    /// The CFA variable holding an SSA local, if it has one.
    fn variable_for_local(&self, local: LocalId) -> Option<argus_core::VarId>;

    /// The CFA variable holding a function parameter.
    fn variable_for_param(&self, index: u32) -> Option<argus_core::VarId>;

    /// Saved expression for an inlined (eliminated) intermediate value.
    fn inlined_value(&self, local: LocalId) -> Option<ExprId>;
}

pub struct InstTranslator<'a> {
    pub settings: Settings,
    pub func: &'a Function,
    pub mem: &'a mut dyn MemoryModel,
    pub env: &'a mut dyn TranslateEnv,
}

impl<'a> InstTranslator<'a> {
    fn ctx(&self) -> &Context {
        self.env.context()
    }

    fn unsupported(&self, construct: impl Into<String>) -> BuildError {
        BuildError::Unsupported {
            construct: construct.into(),
            location: self.func.name.clone(),
        }
    }

    pub fn translate_type(&self, ty: IrType) -> TypeId {
        self.mem.translate_type(self.ctx(), ty)
    }

    fn result_type(&self, inst: &Inst) -> TypeId {
        let local = inst
            .result
            .expect("transform requires a value-producing instruction");
        self.translate_type(self.func.local(local).ty)
    }

    /// Lower one instruction to the expression its defined value equals.
    pub fn transform(&mut self, inst: &Inst) -> BuildResult<ExprId> {
        match &inst.kind {
            InstKind::Binary { op, lhs, rhs } => self.visit_binary(inst, *op, lhs, rhs),
            InstKind::ICmp { pred, lhs, rhs } => self.visit_icmp(*pred, lhs, rhs),
            InstKind::FCmp { pred, lhs, rhs } => self.visit_fcmp(*pred, lhs, rhs),
            InstKind::Cast { op, value, to } => self.visit_cast(*op, value, *to),
            InstKind::Select {
                cond,
                on_true,
                on_false,
            } => self.visit_select(inst, cond, on_true, on_false),
            InstKind::Call { .. } => {
                // Known automata are handled as call transitions before
                // translation; everything else is unconstrained.
                Ok(self.ctx().builder().undef(self.result_type(inst)))
            }
            InstKind::Load { address, ty } => {
                let address = self.operand(address)?;
                self.mem.handle_load(self.env, address, *ty)
            }
            InstKind::Alloca { allocated } => {
                let local = inst.result.expect("alloca defines a value");
                let hint = self.func.local(local).name.clone();
                self.mem.handle_alloca(self.env, *allocated, &hint)
            }
            InstKind::GetElementPtr { base, indices } => {
                let base = self.operand(base)?;
                let indices = indices
                    .iter()
                    .map(|v| self.operand(v))
                    .collect::<BuildResult<Vec<_>>>()?;
                self.mem
                    .handle_get_element_ptr(self.env, base, &indices, IrType::Ptr)
            }
            InstKind::Store { .. } | InstKind::DebugBind { .. } => {
                unreachable!("instruction defines no value; handled by the block encoder")
            }
        }
    }

    fn visit_binary(
        &mut self,
        inst: &Inst,
        op: BinaryOp,
        lhs: &Value,
        rhs: &Value,
    ) -> BuildResult<ExprId> {
        let lhs = self.operand(lhs)?;
        let rhs = self.operand(rhs)?;
        let builder = self.ctx().builder();
        let result_ty = self.result_type(inst);

        if op.is_logic() && self.ctx().resolve_type(result_ty).is_bool() {
            let a = self.as_bool(lhs)?;
            let b = self.as_bool(rhs)?;
            return Ok(match op {
                BinaryOp::And => builder.and(a, b)?,
                BinaryOp::Or => builder.or(a, b)?,
                BinaryOp::Xor => builder.xor(a, b)?,
                _ => unreachable!("logic opcode"),
            });
        }

        if op.is_float() {
            return Ok(match op {
                BinaryOp::FAdd => builder.fadd(lhs, rhs, DEFAULT_ROUNDING)?,
                BinaryOp::FSub => builder.fsub(lhs, rhs, DEFAULT_ROUNDING)?,
                BinaryOp::FMul => builder.fmul(lhs, rhs, DEFAULT_ROUNDING)?,
                BinaryOp::FDiv => builder.fdiv(lhs, rhs, DEFAULT_ROUNDING)?,
                _ => unreachable!("float opcode"),
            });
        }

        match self.ctx().resolve_type(result_ty) {
            Type::Bv(width) => {
                let a = self.as_bv(lhs, width)?;
                let b = self.as_bv(rhs, width)?;
                Ok(match op {
                    BinaryOp::Add => builder.add(a, b)?,
                    BinaryOp::Sub => builder.sub(a, b)?,
                    BinaryOp::Mul => builder.mul(a, b)?,
                    BinaryOp::SDiv => builder.bv_sdiv(a, b)?,
                    BinaryOp::UDiv => builder.bv_udiv(a, b)?,
                    BinaryOp::SRem => builder.bv_srem(a, b)?,
                    BinaryOp::URem => builder.bv_urem(a, b)?,
                    BinaryOp::Shl => builder.shl(a, b)?,
                    BinaryOp::LShr => builder.lshr(a, b)?,
                    BinaryOp::AShr => builder.ashr(a, b)?,
                    BinaryOp::And => builder.bv_and(a, b)?,
                    BinaryOp::Or => builder.bv_or(a, b)?,
                    BinaryOp::Xor => builder.bv_xor(a, b)?,
                    _ => return Err(self.unsupported(format!("bit-vector opcode {:?}", op))),
                })
            }
            Type::Int => {
                let a = self.as_int(lhs)?;
                let b = self.as_int(rhs)?;
                match op {
                    BinaryOp::Add => Ok(builder.add(a, b)?),
                    BinaryOp::Sub => Ok(builder.sub(a, b)?),
                    BinaryOp::Mul => Ok(builder.mul(a, b)?),
                    BinaryOp::SDiv | BinaryOp::UDiv => Ok(builder.div(a, b)?),
                    BinaryOp::SRem | BinaryOp::URem => {
                        Err(self.unsupported("integer-mode remainder"))
                    }
                    // Bitwise structure is invisible to mathematical
                    // integers; the result is unconstrained.
                    BinaryOp::Shl
                    | BinaryOp::LShr
                    | BinaryOp::AShr
                    | BinaryOp::And
                    | BinaryOp::Or
                    | BinaryOp::Xor => Ok(builder.undef(result_ty)),
                    _ => Err(self.unsupported(format!("integer opcode {:?}", op))),
                }
            }
            _ => Err(self.unsupported("binary operation on non-arithmetic type")),
        }
    }

    fn visit_icmp(&mut self, pred: ICmpPred, lhs: &Value, rhs: &Value) -> BuildResult<ExprId> {
        let width = match self.func.value_ty(lhs) {
            IrType::Int(w) => w,
            IrType::Ptr => 64,
            IrType::Float(_) => return Err(self.unsupported("icmp on float operand")),
        };
        let lhs = self.operand(lhs)?;
        let rhs = self.operand(rhs)?;
        let builder = self.ctx().builder();

        if pred == ICmpPred::Eq {
            return Ok(builder.eq(lhs, rhs)?);
        }
        if pred == ICmpPred::Ne {
            return Ok(builder.not_eq(lhs, rhs)?);
        }

        if self.ctx().type_of(lhs).is_bv() {
            return Ok(match pred {
                ICmpPred::Ugt => builder.bv_ugt(lhs, rhs)?,
                ICmpPred::Uge => builder.bv_ugt_eq(lhs, rhs)?,
                ICmpPred::Ult => builder.bv_ult(lhs, rhs)?,
                ICmpPred::Ule => builder.bv_ult_eq(lhs, rhs)?,
                ICmpPred::Sgt => builder.bv_sgt(lhs, rhs)?,
                ICmpPred::Sge => builder.bv_sgt_eq(lhs, rhs)?,
                ICmpPred::Slt => builder.bv_slt(lhs, rhs)?,
                ICmpPred::Sle => builder.bv_slt_eq(lhs, rhs)?,
                _ => unreachable!("equality handled above"),
            });
        }

        if self.ctx().type_of(lhs).is_int() {
            let (left, right) = if pred.is_unsigned() {
                // Unsigned comparison reinterprets negative operands: -5 at
                // width 8 compares as 251.
                (
                    self.unsigned_compare_operand(lhs, width)?,
                    self.unsigned_compare_operand(rhs, width)?,
                )
            } else {
                (lhs, rhs)
            };
            return Ok(match pred {
                ICmpPred::Ugt | ICmpPred::Sgt => builder.gt(left, right)?,
                ICmpPred::Uge | ICmpPred::Sge => builder.gt_eq(left, right)?,
                ICmpPred::Ult | ICmpPred::Slt => builder.lt(left, right)?,
                ICmpPred::Ule | ICmpPred::Sle => builder.lt_eq(left, right)?,
                _ => unreachable!("equality handled above"),
            });
        }

        Err(self.unsupported("icmp ordering on non-arithmetic operands"))
    }

    /// Wrap a possibly negative operand to its unsigned interpretation at
    /// the given width before an unsigned comparison.
    fn unsigned_compare_operand(&self, expr: ExprId, width: u32) -> BuildResult<ExprId> {
        let builder = self.ctx().builder();
        let max = builder.int_lit(if width >= 128 {
            i128::MAX
        } else {
            (1i128 << width) - 1
        });
        let zero = builder.int_lit(0);
        let wrapped = builder.add(max, expr)?;
        let is_negative = builder.lt(expr, zero)?;
        Ok(builder.select(is_negative, wrapped, expr)?)
    }

    fn visit_fcmp(&mut self, pred: FCmpPred, lhs: &Value, rhs: &Value) -> BuildResult<ExprId> {
        let left = self.operand(lhs)?;
        let right = self.operand(rhs)?;
        let builder = self.ctx().builder();

        if pred == FCmpPred::False {
            return Ok(builder.false_lit());
        }
        if pred == FCmpPred::True {
            return Ok(builder.true_lit());
        }
        if pred == FCmpPred::Ord {
            let l = builder.not(builder.fis_nan(left)?)?;
            let r = builder.not(builder.fis_nan(right)?)?;
            return Ok(builder.and(l, r)?);
        }
        if pred == FCmpPred::Uno {
            let l = builder.fis_nan(left)?;
            let r = builder.fis_nan(right)?;
            return Ok(builder.or(l, r)?);
        }

        let cmp = match pred {
            FCmpPred::Oeq | FCmpPred::Ueq => builder.feq(left, right)?,
            FCmpPred::Ogt | FCmpPred::Ugt => builder.fgt(left, right)?,
            FCmpPred::Oge | FCmpPred::Uge => builder.fgt_eq(left, right)?,
            FCmpPred::Olt | FCmpPred::Ult => builder.flt(left, right)?,
            FCmpPred::Ole | FCmpPred::Ule => builder.flt_eq(left, right)?,
            FCmpPred::One | FCmpPred::Une => builder.not(builder.feq(left, right)?)?,
            _ => unreachable!("remaining predicates handled above"),
        };

        if pred.is_ordered() {
            // Ordered comparisons are already false on NaN operands.
            Ok(cmp)
        } else {
            let l = builder.fis_nan(left)?;
            let r = builder.fis_nan(right)?;
            Ok(builder.or_many(&[l, r, cmp])?)
        }
    }

    fn visit_cast(&mut self, op: CastOp, value: &Value, to: IrType) -> BuildResult<ExprId> {
        let source_is_ptr = matches!(self.func.value_ty(value), IrType::Ptr);
        let operand = self.operand(value)?;

        if source_is_ptr || matches!(to, IrType::Ptr) {
            return self.mem.handle_pointer_cast(self.env, op, operand, to);
        }

        let builder = self.ctx().builder();

        if let IrType::Float(_) = to {
            let float_ty = self.translate_type(to);
            match op {
                CastOp::FpExt | CastOp::FpTrunc => {
                    return Ok(builder.fcast(operand, float_ty, DEFAULT_ROUNDING)?);
                }
                CastOp::SiToFp => {
                    return Ok(builder.signed_to_fp(operand, float_ty, DEFAULT_ROUNDING)?);
                }
                CastOp::UiToFp => {
                    return Ok(builder.unsigned_to_fp(operand, float_ty, DEFAULT_ROUNDING)?);
                }
                _ => {}
            }
        }

        if op == CastOp::FpToSi {
            let target = self.translate_type(to);
            return Ok(builder.fp_to_signed(operand, target, DEFAULT_ROUNDING)?);
        }
        if op == CastOp::FpToUi {
            let target = self.translate_type(to);
            return Ok(builder.fp_to_unsigned(operand, target, DEFAULT_ROUNDING)?);
        }

        let operand_ty = self.ctx().type_of(operand);

        if operand_ty.is_bool() {
            return self.bool_to_int_cast(op, operand, self.translate_type(to));
        }

        // Truncation to i1 is a Boolean cast.
        if to == IrType::Int(1) && op == CastOp::Trunc {
            return self.as_bool(operand);
        }

        if operand_ty.is_bv() {
            let target = self.translate_type(to);
            return Ok(match op {
                CastOp::ZExt => builder.zext(operand, target)?,
                CastOp::SExt => builder.sext(operand, target)?,
                CastOp::Trunc => builder.trunc(operand, target)?,
                _ => return Err(self.unsupported(format!("bit-vector cast {:?}", op))),
            });
        }

        if operand_ty.is_int() {
            return match op {
                // Widening is invisible to unbounded integers.
                CastOp::ZExt | CastOp::SExt => Ok(operand),
                CastOp::Trunc => self.integer_trunc(operand, to),
                CastOp::BitCast => Ok(builder.undef(self.ctx().expr_type(operand))),
                _ => Err(self.unsupported(format!("integer-mode cast {:?}", op))),
            };
        }

        Err(self.unsupported(format!("cast {:?}", op)))
    }

    /// Integer-mode truncation to width `w`: take `x mod 2^w`, then subtract
    /// `2^w` when the top bit of the truncated value is set, recovering the
    /// two's complement reading.
    fn integer_trunc(&self, operand: ExprId, to: IrType) -> BuildResult<ExprId> {
        let width = match to {
            IrType::Int(w) if w < 128 => w,
            _ => return Err(self.unsupported("integer-mode trunc target")),
        };
        let builder = self.ctx().builder();
        let two_w = builder.int_lit(1i128 << width);
        let half = builder.int_lit(1i128 << (width - 1));
        let two = builder.int_lit(2);
        let zero = builder.int_lit(0);

        let modv = builder.modulo(operand, two_w)?;
        let top_clear = builder.eq(builder.modulo(builder.div(modv, half)?, two)?, zero)?;
        let wrapped = builder.sub(modv, two_w)?;
        Ok(builder.select(top_clear, modv, wrapped)?)
    }

    fn bool_to_int_cast(&self, op: CastOp, operand: ExprId, target: TypeId) -> BuildResult<ExprId> {
        let builder = self.ctx().builder();
        match self.ctx().resolve_type(target) {
            Type::Bv(width) => {
                let one = builder.bv_lit(1, width);
                let zero = builder.bv_lit(0, width);
                // Sign-extending a 1-bit one yields all ones.
                let all_ones = builder.bv_lit(u128::MAX, width);
                match op {
                    CastOp::ZExt => Ok(builder.select(operand, one, zero)?),
                    CastOp::SExt => Ok(builder.select(operand, all_ones, zero)?),
                    _ => Err(self.unsupported(format!("boolean cast {:?}", op))),
                }
            }
            Type::Int => match op {
                CastOp::ZExt => {
                    Ok(builder.select(operand, builder.int_lit(1), builder.int_lit(0))?)
                }
                // In two's complement 11..11 reads -1 and 11..10 reads -2.
                CastOp::SExt => {
                    Ok(builder.select(operand, builder.int_lit(-1), builder.int_lit(-2))?)
                }
                _ => Err(self.unsupported(format!("boolean cast {:?}", op))),
            },
            Type::Bool => Ok(operand),
            _ => Err(self.unsupported("boolean cast target")),
        }
    }

    fn visit_select(
        &mut self,
        inst: &Inst,
        cond: &Value,
        on_true: &Value,
        on_false: &Value,
    ) -> BuildResult<ExprId> {
        let result_ty = self.result_type(inst);
        let cond = self.operand(cond)?;
        let cond = self.as_bool(cond)?;
        let then = self.operand(on_true)?;
        let then = self.cast_result(then, result_ty)?;
        let elze = self.operand(on_false)?;
        let elze = self.cast_result(elze, result_ty)?;
        Ok(self.ctx().builder().select(cond, then, elze)?)
    }

    /// Resolve an operand to its expression.
    pub fn operand(&mut self, value: &Value) -> BuildResult<ExprId> {
        let builder = self.ctx().builder();
        match value {
            Value::ConstInt { width: 1, value } => Ok(builder.bool_lit(value & 1 == 1)),
            Value::ConstInt { width, value } => match self.settings.int_representation {
                IntRepresentation::BitVectors => Ok(builder.bv_lit(*value as u128, *width)),
                IntRepresentation::Integers => Ok(builder.int_lit(sext(*value, *width))),
            },
            Value::ConstFloat { kind, bits } => Ok(builder.float_lit(*kind, *bits)),
            Value::Local(local) => {
                if let Some(expr) = self.env.inlined_value(*local) {
                    return Ok(expr);
                }
                if let Some(var) = self.env.variable_for_local(*local) {
                    return Ok(builder.var_ref(var));
                }
                Err(self.unsupported(format!(
                    "use of value '{}' before its definition",
                    self.func.local(*local).name
                )))
            }
            Value::Param(index) => match self.env.variable_for_param(*index) {
                Some(var) => Ok(builder.var_ref(var)),
                None => Err(self.unsupported("unresolved parameter reference")),
            },
            Value::Undef(IrType::Ptr) => self.mem.handle_pointer_value(self.env, "undef_ptr"),
            Value::Undef(ty) => Ok(builder.undef(self.translate_type(*ty))),
        }
    }

    // === Coercion helpers, idempotent on matching types ===

    pub fn as_bool(&self, operand: ExprId) -> BuildResult<ExprId> {
        let builder = self.ctx().builder();
        match self.ctx().type_of(operand) {
            Type::Bool => Ok(operand),
            Type::Bv(width) => {
                let zero = builder.bv_lit(0, width);
                let is_zero = builder.eq(operand, zero)?;
                Ok(builder.select(is_zero, builder.false_lit(), builder.true_lit())?)
            }
            Type::Int => {
                let is_zero = builder.eq(operand, builder.int_lit(0))?;
                Ok(builder.select(is_zero, builder.false_lit(), builder.true_lit())?)
            }
            _ => Err(BuildError::Context(argus_core::ContextError::TypeMismatch {
                op: "asBool",
                expected: "Bool, Bv or Int".to_string(),
                found: self.ctx().type_string(self.ctx().expr_type(operand)),
            })),
        }
    }

    pub fn as_bv(&self, operand: ExprId, width: u32) -> BuildResult<ExprId> {
        let builder = self.ctx().builder();
        match self.ctx().type_of(operand) {
            Type::Bool => {
                Ok(builder.select(operand, builder.bv_lit(1, width), builder.bv_lit(0, width))?)
            }
            Type::Bv(w) if w == width => Ok(operand),
            Type::Bv(w) => Err(BuildError::Context(argus_core::ContextError::WidthMismatch {
                op: "asBv",
                lhs: w,
                rhs: width,
            })),
            _ => Err(BuildError::Context(argus_core::ContextError::TypeMismatch {
                op: "asBv",
                expected: format!("Bv({})", width),
                found: self.ctx().type_string(self.ctx().expr_type(operand)),
            })),
        }
    }

    pub fn as_int(&self, operand: ExprId) -> BuildResult<ExprId> {
        let builder = self.ctx().builder();
        match self.ctx().type_of(operand) {
            Type::Bool => Ok(builder.select(operand, builder.int_lit(1), builder.int_lit(0))?),
            Type::Int => Ok(operand),
            _ => Err(BuildError::Context(argus_core::ContextError::TypeMismatch {
                op: "asInt",
                expected: "Bool or Int".to_string(),
                found: self.ctx().type_string(self.ctx().expr_type(operand)),
            })),
        }
    }

    /// Coerce an expression to the type of the defined variable.
    pub fn cast_result(&self, expr: ExprId, ty: TypeId) -> BuildResult<ExprId> {
        match self.ctx().resolve_type(ty) {
            Type::Bool => self.as_bool(expr),
            Type::Bv(width) => self.as_bv(expr, width),
            Type::Int => self.as_int(expr),
            _ if self.ctx().expr_type(expr) == ty => Ok(expr),
            _ => Err(BuildError::Context(argus_core::ContextError::TypeMismatch {
                op: "castResult",
                expected: self.ctx().type_string(ty),
                found: self.ctx().type_string(self.ctx().expr_type(expr)),
            })),
        }
    }
}

/// Sign extension of a stored constant payload from `width` bits.
fn sext(value: i128, width: u32) -> i128 {
    if width >= 128 {
        return value;
    }
    let shift = 128 - width;
    (value << shift) >> shift
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::HavocMemoryModel;
    use argus_core::eval::eval;
    use argus_core::{ContextError, Literal, Valuation, VarId};

    struct TestEnv<'a> {
        ctx: &'a Context,
        counter: u32,
    }

    impl ScopedVars for TestEnv<'_> {
        fn context(&self) -> &Context {
            self.ctx
        }

        fn fresh_local(&mut self, hint: &str, ty: argus_core::TypeId) -> Result<VarId, ContextError> {
            let name = format!("t/{}_{}", hint, self.counter);
            self.counter += 1;
            self.ctx.create_variable(&name, ty)
        }
    }

    impl TranslateEnv for TestEnv<'_> {
        fn variable_for_local(&self, _local: LocalId) -> Option<VarId> {
            None
        }

        fn variable_for_param(&self, _index: u32) -> Option<VarId> {
            None
        }

        fn inlined_value(&self, _local: LocalId) -> Option<ExprId> {
            None
        }
    }

    fn translate(
        ctx: &Context,
        ints: IntRepresentation,
        result_ty: IrType,
        kind: InstKind,
    ) -> ExprId {
        let mut func = Function::new("t", vec![], None);
        let result = func.add_local("r", result_ty);
        let inst = Inst {
            result: Some(result),
            kind,
            debug_loc: None,
        };
        let mut mem = HavocMemoryModel::new(ints);
        let mut env = TestEnv { ctx, counter: 0 };
        let mut translator = InstTranslator {
            settings: Settings {
                int_representation: ints,
            },
            func: &func,
            mem: &mut mem,
            env: &mut env,
        };
        translator.transform(&inst).unwrap()
    }

    fn const_bool(ctx: &Context, expr: ExprId) -> bool {
        eval(ctx, expr, &Valuation::new())
            .and_then(|l| l.as_bool())
            .expect("expression folds to a Boolean literal")
    }

    #[test]
    fn icmp_equality_is_mode_agnostic() {
        for ints in [IntRepresentation::BitVectors, IntRepresentation::Integers] {
            let ctx = Context::new();
            let expr = translate(
                &ctx,
                ints,
                IrType::Int(1),
                InstKind::ICmp {
                    pred: ICmpPred::Eq,
                    lhs: Value::ConstInt { width: 32, value: 7 },
                    rhs: Value::ConstInt { width: 32, value: 7 },
                },
            );
            assert!(const_bool(&ctx, expr));
        }
    }

    #[test]
    fn integer_mode_unsigned_compare_wraps_negatives() {
        // `ult i8 -5, 2` compares 251 against 2.
        let ctx = Context::new();
        let expr = translate(
            &ctx,
            IntRepresentation::Integers,
            IrType::Int(1),
            InstKind::ICmp {
                pred: ICmpPred::Ult,
                lhs: Value::ConstInt { width: 8, value: -5 },
                rhs: Value::ConstInt { width: 8, value: 2 },
            },
        );
        assert!(!const_bool(&ctx, expr));

        // The signed reading of the same operands is true.
        let ctx = Context::new();
        let expr = translate(
            &ctx,
            IntRepresentation::Integers,
            IrType::Int(1),
            InstKind::ICmp {
                pred: ICmpPred::Slt,
                lhs: Value::ConstInt { width: 8, value: -5 },
                rhs: Value::ConstInt { width: 8, value: 2 },
            },
        );
        assert!(const_bool(&ctx, expr));
    }

    #[test]
    fn unsigned_compare_equals_signed_on_wrapped_operand() {
        // For negative x at width w, `ult x y` agrees with the signed
        // comparison of (2^w - 1) + x against the wrapped y.
        for x in [-128i128, -77, -5, -1] {
            for y in [-100i128, -1, 0, 1, 101] {
                let ctx = Context::new();
                let unsigned = translate(
                    &ctx,
                    IntRepresentation::Integers,
                    IrType::Int(1),
                    InstKind::ICmp {
                        pred: ICmpPred::Ult,
                        lhs: Value::ConstInt { width: 8, value: x },
                        rhs: Value::ConstInt { width: 8, value: y },
                    },
                );
                let wrap = |v: i128| if v < 0 { (1 << 8) - 1 + v } else { v };
                assert_eq!(const_bool(&ctx, unsigned), wrap(x) < wrap(y));
            }
        }
    }

    #[test]
    fn bitvector_mode_uses_bv_comparisons() {
        let ctx = Context::new();
        let expr = translate(
            &ctx,
            IntRepresentation::BitVectors,
            IrType::Int(1),
            InstKind::ICmp {
                pred: ICmpPred::Ult,
                lhs: Value::ConstInt { width: 8, value: -5 },
                rhs: Value::ConstInt { width: 8, value: 2 },
            },
        );
        // 0xFB < 2 is false unsigned.
        assert!(!const_bool(&ctx, expr));
    }

    #[test]
    fn fcmp_ord_uno_expand_to_nan_tests() {
        let ctx = Context::new();
        let nan = Value::ConstFloat {
            kind: argus_core::FloatKind::Double,
            bits: f64::NAN.to_bits() as u128,
        };
        let one = Value::ConstFloat {
            kind: argus_core::FloatKind::Double,
            bits: 1.0f64.to_bits() as u128,
        };
        let ord = translate(
            &ctx,
            IntRepresentation::BitVectors,
            IrType::Int(1),
            InstKind::FCmp {
                pred: FCmpPred::Ord,
                lhs: nan,
                rhs: one,
            },
        );
        assert!(!const_bool(&ctx, ord));

        let uno = translate(
            &ctx,
            IntRepresentation::BitVectors,
            IrType::Int(1),
            InstKind::FCmp {
                pred: FCmpPred::Uno,
                lhs: nan,
                rhs: one,
            },
        );
        assert!(const_bool(&ctx, uno));
    }

    #[test]
    fn fcmp_unordered_is_true_on_nan() {
        let ctx = Context::new();
        let nan = Value::ConstFloat {
            kind: argus_core::FloatKind::Double,
            bits: f64::NAN.to_bits() as u128,
        };
        let one = Value::ConstFloat {
            kind: argus_core::FloatKind::Double,
            bits: 1.0f64.to_bits() as u128,
        };
        let ueq = translate(
            &ctx,
            IntRepresentation::BitVectors,
            IrType::Int(1),
            InstKind::FCmp {
                pred: FCmpPred::Ueq,
                lhs: nan,
                rhs: one,
            },
        );
        assert!(const_bool(&ctx, ueq));

        let oeq = translate(
            &ctx,
            IntRepresentation::BitVectors,
            IrType::Int(1),
            InstKind::FCmp {
                pred: FCmpPred::Oeq,
                lhs: nan,
                rhs: one,
            },
        );
        assert!(!const_bool(&ctx, oeq));
    }

    #[test]
    fn integer_mode_trunc_recovers_two_complement() {
        // trunc i6 51 to i4 keeps 3; trunc i6 60 to i4 wraps to -4.
        let cases = [(51i128, 3i128), (60, -4)];
        for (input, expected) in cases {
            let ctx = Context::new();
            let expr = translate(
                &ctx,
                IntRepresentation::Integers,
                IrType::Int(4),
                InstKind::Cast {
                    op: CastOp::Trunc,
                    value: Value::ConstInt {
                        width: 6,
                        value: input,
                    },
                    to: IrType::Int(4),
                },
            );
            let value = eval(&ctx, expr, &Valuation::new()).and_then(|l| l.as_int());
            assert_eq!(value, Some(expected));
        }
    }

    #[test]
    fn trunc_to_i1_is_boolean_cast() {
        let ctx = Context::new();
        let expr = translate(
            &ctx,
            IntRepresentation::BitVectors,
            IrType::Int(1),
            InstKind::Cast {
                op: CastOp::Trunc,
                value: Value::ConstInt { width: 8, value: 3 },
                to: IrType::Int(1),
            },
        );
        assert!(const_bool(&ctx, expr));
    }

    #[test]
    fn bool_extension_casts() {
        // zext i1 true → 1; sext i1 true → -1 (all ones).
        let ctx = Context::new();
        let zext = translate(
            &ctx,
            IntRepresentation::Integers,
            IrType::Int(32),
            InstKind::Cast {
                op: CastOp::ZExt,
                value: Value::ConstInt { width: 1, value: 1 },
                to: IrType::Int(32),
            },
        );
        assert_eq!(
            eval(&ctx, zext, &Valuation::new()),
            Some(Literal::Int(1))
        );

        let sext = translate(
            &ctx,
            IntRepresentation::Integers,
            IrType::Int(32),
            InstKind::Cast {
                op: CastOp::SExt,
                value: Value::ConstInt { width: 1, value: 1 },
                to: IrType::Int(32),
            },
        );
        assert_eq!(
            eval(&ctx, sext, &Valuation::new()),
            Some(Literal::Int(-1))
        );

        let ctx = Context::new();
        let sext_bv = translate(
            &ctx,
            IntRepresentation::BitVectors,
            IrType::Int(8),
            InstKind::Cast {
                op: CastOp::SExt,
                value: Value::ConstInt { width: 1, value: 1 },
                to: IrType::Int(8),
            },
        );
        assert_eq!(
            eval(&ctx, sext_bv, &Valuation::new()),
            Some(Literal::Bv {
                width: 8,
                value: 0xFF
            })
        );
    }

    #[test]
    fn integer_mode_rem_is_unsupported() {
        let ctx = Context::new();
        let mut func = Function::new("t", vec![], None);
        let result = func.add_local("r", IrType::Int(32));
        let inst = Inst {
            result: Some(result),
            kind: InstKind::Binary {
                op: BinaryOp::SRem,
                lhs: Value::ConstInt { width: 32, value: 7 },
                rhs: Value::ConstInt { width: 32, value: 3 },
            },
            debug_loc: None,
        };
        let mut mem = HavocMemoryModel::new(IntRepresentation::Integers);
        let mut env = TestEnv { ctx: &ctx, counter: 0 };
        let mut translator = InstTranslator {
            settings: Settings {
                int_representation: IntRepresentation::Integers,
            },
            func: &func,
            mem: &mut mem,
            env: &mut env,
        };
        assert!(matches!(
            translator.transform(&inst),
            Err(crate::BuildError::Unsupported { .. })
        ));
    }

    #[test]
    fn integer_mode_bitwise_ops_are_unconstrained() {
        let ctx = Context::new();
        let expr = translate(
            &ctx,
            IntRepresentation::Integers,
            IrType::Int(32),
            InstKind::Binary {
                op: BinaryOp::And,
                lhs: Value::ConstInt { width: 32, value: 6 },
                rhs: Value::ConstInt { width: 32, value: 3 },
            },
        );
        assert_eq!(ctx.expr_kind(expr), argus_core::ExprKind::Undef);
    }

    #[test]
    fn havoc_load_is_unconstrained() {
        let ctx = Context::new();
        let expr = translate(
            &ctx,
            IntRepresentation::BitVectors,
            IrType::Int(32),
            InstKind::Load {
                address: Value::Undef(IrType::Ptr),
                ty: IrType::Int(32),
            },
        );
        assert_eq!(ctx.expr_kind(expr), argus_core::ExprKind::Undef);
        assert_eq!(ctx.expr_type(expr), ctx.bv_type(32));
    }

    #[test]
    fn coercions_are_idempotent_on_matching_types() {
        let ctx = Context::new();
        let func = Function::new("t", vec![], None);
        let mut mem = HavocMemoryModel::new(IntRepresentation::BitVectors);
        let mut env = TestEnv { ctx: &ctx, counter: 0 };
        let translator = InstTranslator {
            settings: Settings::default(),
            func: &func,
            mem: &mut mem,
            env: &mut env,
        };
        let builder = ctx.builder();
        let flag = builder.var_ref(ctx.create_variable("flag", ctx.bool_type()).unwrap());
        let word = builder.var_ref(ctx.create_variable("word", ctx.bv_type(32)).unwrap());

        assert_eq!(translator.as_bool(flag).unwrap(), flag);
        assert_eq!(translator.as_bv(word, 32).unwrap(), word);
        assert!(translator.as_bv(word, 16).is_err());
        assert!(translator.as_int(word).is_err());
    }
}
