//! Z3 back-end for the [`Solver`] interface.
//!
//! Lowers the expression DAG to Z3 ASTs with per-solver memoization and
//! reads models back as [`Valuation`]s. Boolean, integer, and bit-vector
//! theories are covered; floating-point and array expressions are not
//! lowered by this back-end and surface as a [`SolverError`], which the
//! engine reports as `Unknown` for the affected query.

use std::collections::HashMap;

use ::z3::ast::{Bool, Dynamic, Int, BV};
use ::z3::SatResult;

use argus_core::{Context, ExprId, ExprKind, Literal, Type, Valuation, VarId};

use crate::solver::{Solver, SolverError, SolverFactory, SolverStatus};

pub struct Z3SolverFactory;

impl SolverFactory for Z3SolverFactory {
    fn create(&self) -> Box<dyn Solver> {
        Box::new(Z3Solver::new())
    }
}

pub struct Z3Solver {
    solver: ::z3::Solver,
    cache: HashMap<ExprId, Dynamic>,
    decls: HashMap<VarId, Dynamic>,
    /// Declaration order, for deterministic valuations.
    order: Vec<VarId>,
}

impl Z3Solver {
    pub fn new() -> Self {
        Z3Solver {
            solver: ::z3::Solver::new(),
            cache: HashMap::new(),
            decls: HashMap::new(),
            order: Vec::new(),
        }
    }

    fn declare(&mut self, ctx: &Context, var: VarId) -> Result<Dynamic, SolverError> {
        if let Some(d) = self.decls.get(&var) {
            return Ok(d.clone());
        }
        let variable = ctx.variable(var);
        let ast = match ctx.resolve_type(variable.ty()) {
            Type::Bool => Dynamic::from_ast(&Bool::new_const(variable.name())),
            Type::Int => Dynamic::from_ast(&Int::new_const(variable.name())),
            Type::Bv(width) => Dynamic::from_ast(&BV::new_const(variable.name(), width)),
            other => {
                return Err(SolverError::new(format!(
                    "variable '{}' has type {:?}, which this back-end does not lower",
                    variable.name(),
                    other
                )))
            }
        };
        self.decls.insert(var, ast.clone());
        self.order.push(var);
        Ok(ast)
    }

    fn lower(&mut self, ctx: &Context, expr: ExprId) -> Result<Dynamic, SolverError> {
        if let Some(cached) = self.cache.get(&expr) {
            return Ok(cached.clone());
        }
        let kind = ctx.expr_kind(expr);
        let args = ctx.operands(expr);

        let result: Dynamic = match kind {
            ExprKind::BoolLit(b) => Dynamic::from_ast(&Bool::from_bool(b)),
            ExprKind::IntLit(v) => {
                let v = i64::try_from(v).map_err(|_| {
                    SolverError::new("integer literal exceeds the 64-bit lowering range")
                })?;
                Dynamic::from_ast(&Int::from_i64(v))
            }
            ExprKind::BvLit { width, value } => {
                if width > 64 {
                    return Err(SolverError::new(
                        "bit-vector literal wider than 64 bits is not lowered",
                    ));
                }
                Dynamic::from_ast(&BV::from_u64(value as u64, width))
            }
            ExprKind::FloatLit { .. } => {
                return Err(SolverError::new("floating-point terms are not lowered"))
            }
            // Each `Undef` node is an unconstrained fresh constant.
            ExprKind::Undef => match ctx.type_of(expr) {
                Type::Bool => Dynamic::from_ast(&Bool::new_const(format!("__undef{}", raw(expr)))),
                Type::Int => Dynamic::from_ast(&Int::new_const(format!("__undef{}", raw(expr)))),
                Type::Bv(w) => {
                    Dynamic::from_ast(&BV::new_const(format!("__undef{}", raw(expr)), w))
                }
                other => {
                    return Err(SolverError::new(format!(
                        "undef of type {:?} is not lowered",
                        other
                    )))
                }
            },
            ExprKind::VarRef(var) => self.declare(ctx, var)?,

            ExprKind::Not => {
                let v = self.lower_bool(ctx, args[0])?;
                Dynamic::from_ast(&v.not())
            }
            ExprKind::And => {
                let parts = self.lower_bools(ctx, &args)?;
                Dynamic::from_ast(&Bool::and(&parts))
            }
            ExprKind::Or => {
                let parts = self.lower_bools(ctx, &args)?;
                Dynamic::from_ast(&Bool::or(&parts))
            }
            ExprKind::Xor => {
                let a = self.lower_bool(ctx, args[0])?;
                let b = self.lower_bool(ctx, args[1])?;
                Dynamic::from_ast(&a.xor(&b))
            }
            ExprKind::Eq | ExprKind::NotEq => {
                let l = self.lower(ctx, args[0])?;
                let r = self.lower(ctx, args[1])?;
                let eq = if let (Some(li), Some(ri)) = (l.as_int(), r.as_int()) {
                    li.eq(&ri)
                } else if let (Some(lb), Some(rb)) = (l.as_bool(), r.as_bool()) {
                    lb.eq(&rb)
                } else if let (Some(lv), Some(rv)) = (l.as_bv(), r.as_bv()) {
                    lv.eq(&rv)
                } else {
                    return Err(SolverError::new("equality on unsupported sorts"));
                };
                if kind == ExprKind::Eq {
                    Dynamic::from_ast(&eq)
                } else {
                    Dynamic::from_ast(&eq.not())
                }
            }
            ExprKind::Select => {
                let c = self.lower_bool(ctx, args[0])?;
                let t = self.lower(ctx, args[1])?;
                let e = self.lower(ctx, args[2])?;
                if let (Some(ti), Some(ei)) = (t.as_int(), e.as_int()) {
                    Dynamic::from_ast(&c.ite(&ti, &ei))
                } else if let (Some(tb), Some(eb)) = (t.as_bool(), e.as_bool()) {
                    Dynamic::from_ast(&c.ite(&tb, &eb))
                } else if let (Some(tv), Some(ev)) = (t.as_bv(), e.as_bv()) {
                    Dynamic::from_ast(&c.ite(&tv, &ev))
                } else {
                    return Err(SolverError::new("ite on unsupported sorts"));
                }
            }

            ExprKind::Add | ExprKind::Sub | ExprKind::Mul => {
                let l = self.lower(ctx, args[0])?;
                let r = self.lower(ctx, args[1])?;
                if let (Some(li), Some(ri)) = (l.as_int(), r.as_int()) {
                    let v = match kind {
                        ExprKind::Add => Int::add(&[li, ri]),
                        ExprKind::Sub => Int::sub(&[li, ri]),
                        _ => Int::mul(&[li, ri]),
                    };
                    Dynamic::from_ast(&v)
                } else if let (Some(lv), Some(rv)) = (l.as_bv(), r.as_bv()) {
                    let v = match kind {
                        ExprKind::Add => lv.bvadd(&rv),
                        ExprKind::Sub => lv.bvsub(&rv),
                        _ => lv.bvmul(&rv),
                    };
                    Dynamic::from_ast(&v)
                } else {
                    return Err(SolverError::new("arithmetic on unsupported sorts"));
                }
            }
            ExprKind::Div => {
                let l = self.lower_int(ctx, args[0])?;
                let r = self.lower_int(ctx, args[1])?;
                Dynamic::from_ast(&l.div(&r))
            }
            ExprKind::Mod => {
                let l = self.lower_int(ctx, args[0])?;
                let r = self.lower_int(ctx, args[1])?;
                Dynamic::from_ast(&l.modulo(&r))
            }
            ExprKind::Lt | ExprKind::LtEq | ExprKind::Gt | ExprKind::GtEq => {
                let l = self.lower_int(ctx, args[0])?;
                let r = self.lower_int(ctx, args[1])?;
                let v = match kind {
                    ExprKind::Lt => l.lt(&r),
                    ExprKind::LtEq => l.le(&r),
                    ExprKind::Gt => l.gt(&r),
                    _ => l.ge(&r),
                };
                Dynamic::from_ast(&v)
            }

            ExprKind::BvSDiv
            | ExprKind::BvUDiv
            | ExprKind::BvSRem
            | ExprKind::BvURem
            | ExprKind::Shl
            | ExprKind::LShr
            | ExprKind::AShr
            | ExprKind::BvAnd
            | ExprKind::BvOr
            | ExprKind::BvXor => {
                let l = self.lower_bv(ctx, args[0])?;
                let r = self.lower_bv(ctx, args[1])?;
                let v = match kind {
                    ExprKind::BvSDiv => l.bvsdiv(&r),
                    ExprKind::BvUDiv => l.bvudiv(&r),
                    ExprKind::BvSRem => l.bvsrem(&r),
                    ExprKind::BvURem => l.bvurem(&r),
                    ExprKind::Shl => l.bvshl(&r),
                    ExprKind::LShr => l.bvlshr(&r),
                    ExprKind::AShr => l.bvashr(&r),
                    ExprKind::BvAnd => l.bvand(&r),
                    ExprKind::BvOr => l.bvor(&r),
                    _ => l.bvxor(&r),
                };
                Dynamic::from_ast(&v)
            }
            ExprKind::BvSLt
            | ExprKind::BvSLtEq
            | ExprKind::BvSGt
            | ExprKind::BvSGtEq
            | ExprKind::BvULt
            | ExprKind::BvULtEq
            | ExprKind::BvUGt
            | ExprKind::BvUGtEq => {
                let l = self.lower_bv(ctx, args[0])?;
                let r = self.lower_bv(ctx, args[1])?;
                let v = match kind {
                    ExprKind::BvSLt => l.bvslt(&r),
                    ExprKind::BvSLtEq => l.bvsle(&r),
                    ExprKind::BvSGt => l.bvsgt(&r),
                    ExprKind::BvSGtEq => l.bvsge(&r),
                    ExprKind::BvULt => l.bvult(&r),
                    ExprKind::BvULtEq => l.bvule(&r),
                    ExprKind::BvUGt => l.bvugt(&r),
                    _ => l.bvuge(&r),
                };
                Dynamic::from_ast(&v)
            }
            ExprKind::ZExt | ExprKind::SExt | ExprKind::Trunc => {
                let v = self.lower_bv(ctx, args[0])?;
                let from = v.get_size();
                let target = ctx
                    .type_of(expr)
                    .bv_width()
                    .expect("cast result is a bit-vector");
                let v = match kind {
                    ExprKind::ZExt => v.zero_ext(target - from),
                    ExprKind::SExt => v.sign_ext(target - from),
                    _ => v.extract(target - 1, 0),
                };
                Dynamic::from_ast(&v)
            }

            ExprKind::FAdd(_)
            | ExprKind::FSub(_)
            | ExprKind::FMul(_)
            | ExprKind::FDiv(_)
            | ExprKind::FEq
            | ExprKind::FGt
            | ExprKind::FGtEq
            | ExprKind::FLt
            | ExprKind::FLtEq
            | ExprKind::FIsNan
            | ExprKind::FCast(_)
            | ExprKind::SignedToFp(_)
            | ExprKind::UnsignedToFp(_)
            | ExprKind::FpToSigned(_)
            | ExprKind::FpToUnsigned(_) => {
                return Err(SolverError::new("floating-point terms are not lowered"))
            }
            ExprKind::Read | ExprKind::Write => {
                return Err(SolverError::new("array terms are not lowered"))
            }
        };

        self.cache.insert(expr, result.clone());
        Ok(result)
    }

    fn lower_bool(&mut self, ctx: &Context, expr: ExprId) -> Result<Bool, SolverError> {
        self.lower(ctx, expr)?
            .as_bool()
            .ok_or_else(|| SolverError::new("expected a Boolean term"))
    }

    fn lower_bools(&mut self, ctx: &Context, args: &[ExprId]) -> Result<Vec<Bool>, SolverError> {
        args.iter().map(|a| self.lower_bool(ctx, *a)).collect()
    }

    fn lower_int(&mut self, ctx: &Context, expr: ExprId) -> Result<Int, SolverError> {
        self.lower(ctx, expr)?
            .as_int()
            .ok_or_else(|| SolverError::new("expected an integer term"))
    }

    fn lower_bv(&mut self, ctx: &Context, expr: ExprId) -> Result<BV, SolverError> {
        self.lower(ctx, expr)?
            .as_bv()
            .ok_or_else(|| SolverError::new("expected a bit-vector term"))
    }
}

impl Default for Z3Solver {
    fn default() -> Self {
        Z3Solver::new()
    }
}

impl Solver for Z3Solver {
    fn add(&mut self, ctx: &Context, expr: ExprId) -> Result<(), SolverError> {
        let formula = self.lower_bool(ctx, expr)?;
        self.solver.assert(&formula);
        Ok(())
    }

    fn check(&mut self) -> Result<SolverStatus, SolverError> {
        Ok(match self.solver.check() {
            SatResult::Sat => SolverStatus::Sat,
            SatResult::Unsat => SolverStatus::Unsat,
            SatResult::Unknown => SolverStatus::Unknown,
        })
    }

    fn model(&mut self, ctx: &Context) -> Result<Valuation, SolverError> {
        let model = self
            .solver
            .get_model()
            .ok_or_else(|| SolverError::new("no model available"))?;
        let mut valuation = Valuation::new();
        for var in &self.order {
            let ast = &self.decls[var];
            let literal = match ctx.resolve_type(ctx.variable(*var).ty()) {
                Type::Bool => model
                    .eval(ast, true)
                    .and_then(|v| v.as_bool())
                    .and_then(|b| b.as_bool())
                    .map(Literal::Bool),
                Type::Int => model
                    .eval(ast, true)
                    .and_then(|v| v.as_int())
                    .and_then(|i| i.as_i64())
                    .map(|v| Literal::Int(v as i128)),
                Type::Bv(width) => model
                    .eval(ast, true)
                    .and_then(|v| v.as_bv())
                    .and_then(|bv| bv.as_u64())
                    .map(|value| Literal::Bv {
                        width,
                        value: value as u128,
                    }),
                _ => None,
            };
            if let Some(literal) = literal {
                valuation.insert(*var, literal);
            }
        }
        Ok(valuation)
    }

    fn push(&mut self) {
        self.solver.push();
    }

    fn pop(&mut self) {
        self.solver.pop(1);
    }
}

fn raw(expr: ExprId) -> String {
    format!("{:?}", expr)
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect()
}
