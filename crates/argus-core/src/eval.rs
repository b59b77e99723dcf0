//! Concrete expression evaluator.
//!
//! Evaluates an expression under a [`Valuation`]. Used as the reference
//! semantics for folding tests and to validate counterexample traces:
//! a satisfying model must evaluate every edge formula on the trace to
//! `true`. Returns `None` where the value is not determined (an `Undef`
//! leaf, a variable missing from the valuation, division by zero, or a
//! float format with no faithful host analogue).

use crate::expr::{Context, ExprId, ExprKind, RoundingMode};
use crate::literal::{float_is_nan, Literal, Valuation};
use crate::types::FloatKind;

/// Evaluate `expr` under `valuation`.
pub fn eval(ctx: &Context, expr: ExprId, valuation: &Valuation) -> Option<Literal> {
    let kind = ctx.expr_kind(expr);
    let args = ctx.operands(expr);

    match kind {
        ExprKind::BoolLit(b) => Some(Literal::Bool(b)),
        ExprKind::IntLit(v) => Some(Literal::Int(v)),
        ExprKind::BvLit { width, value } => Some(Literal::Bv { width, value }),
        ExprKind::FloatLit { kind, bits } => Some(Literal::Float { kind, bits }),
        ExprKind::Undef => None,
        ExprKind::VarRef(var) => valuation.get(var),

        ExprKind::Not => {
            let v = eval_bool(ctx, args[0], valuation)?;
            Some(Literal::Bool(!v))
        }
        ExprKind::And => {
            let mut out = true;
            for arg in &args {
                out &= eval_bool(ctx, *arg, valuation)?;
            }
            Some(Literal::Bool(out))
        }
        ExprKind::Or => {
            let mut out = false;
            for arg in &args {
                out |= eval_bool(ctx, *arg, valuation)?;
            }
            Some(Literal::Bool(out))
        }
        ExprKind::Xor => {
            let a = eval_bool(ctx, args[0], valuation)?;
            let b = eval_bool(ctx, args[1], valuation)?;
            Some(Literal::Bool(a ^ b))
        }
        ExprKind::Eq | ExprKind::NotEq => {
            let a = eval(ctx, args[0], valuation)?;
            let b = eval(ctx, args[1], valuation)?;
            let equal = a == b;
            Some(Literal::Bool(if kind == ExprKind::Eq { equal } else { !equal }))
        }
        ExprKind::Select => {
            let cond = eval_bool(ctx, args[0], valuation)?;
            eval(ctx, if cond { args[1] } else { args[2] }, valuation)
        }

        ExprKind::Add | ExprKind::Sub | ExprKind::Mul => {
            let a = eval(ctx, args[0], valuation)?;
            let b = eval(ctx, args[1], valuation)?;
            match (a, b) {
                (Literal::Int(x), Literal::Int(y)) => {
                    let v = match kind {
                        ExprKind::Add => x.checked_add(y)?,
                        ExprKind::Sub => x.checked_sub(y)?,
                        _ => x.checked_mul(y)?,
                    };
                    Some(Literal::Int(v))
                }
                (Literal::Bv { width, value: x }, Literal::Bv { value: y, .. }) => {
                    let v = match kind {
                        ExprKind::Add => x.wrapping_add(y),
                        ExprKind::Sub => x.wrapping_sub(y),
                        _ => x.wrapping_mul(y),
                    };
                    Some(Literal::Bv {
                        width,
                        value: v & mask(width),
                    })
                }
                _ => None,
            }
        }
        ExprKind::Div => {
            let x = eval_int(ctx, args[0], valuation)?;
            let y = eval_int(ctx, args[1], valuation)?;
            (y != 0).then(|| Literal::Int(x.div_euclid(y)))
        }
        ExprKind::Mod => {
            let x = eval_int(ctx, args[0], valuation)?;
            let y = eval_int(ctx, args[1], valuation)?;
            (y != 0).then(|| Literal::Int(x.rem_euclid(y)))
        }
        ExprKind::Lt | ExprKind::LtEq | ExprKind::Gt | ExprKind::GtEq => {
            let x = eval_int(ctx, args[0], valuation)?;
            let y = eval_int(ctx, args[1], valuation)?;
            Some(Literal::Bool(match kind {
                ExprKind::Lt => x < y,
                ExprKind::LtEq => x <= y,
                ExprKind::Gt => x > y,
                _ => x >= y,
            }))
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
            let (width, x) = eval_bv(ctx, args[0], valuation)?;
            let (_, y) = eval_bv(ctx, args[1], valuation)?;
            let v = match kind {
                ExprKind::BvSDiv => {
                    (y != 0).then(|| signed(width, x).wrapping_div(signed(width, y)) as u128)?
                }
                ExprKind::BvUDiv => (y != 0).then(|| x / y)?,
                ExprKind::BvSRem => {
                    (y != 0).then(|| signed(width, x).wrapping_rem(signed(width, y)) as u128)?
                }
                ExprKind::BvURem => (y != 0).then(|| x % y)?,
                ExprKind::Shl => {
                    if y >= width as u128 {
                        0
                    } else {
                        x << y
                    }
                }
                ExprKind::LShr => {
                    if y >= width as u128 {
                        0
                    } else {
                        x >> y
                    }
                }
                ExprKind::AShr => {
                    if y >= width as u128 {
                        if signed(width, x) < 0 {
                            mask(width)
                        } else {
                            0
                        }
                    } else {
                        (signed(width, x) >> (y as u32)) as u128
                    }
                }
                ExprKind::BvAnd => x & y,
                ExprKind::BvOr => x | y,
                _ => x ^ y,
            };
            Some(Literal::Bv {
                width,
                value: v & mask(width),
            })
        }
        ExprKind::BvSLt | ExprKind::BvSLtEq | ExprKind::BvSGt | ExprKind::BvSGtEq => {
            let (width, x) = eval_bv(ctx, args[0], valuation)?;
            let (_, y) = eval_bv(ctx, args[1], valuation)?;
            let (sx, sy) = (signed(width, x), signed(width, y));
            Some(Literal::Bool(match kind {
                ExprKind::BvSLt => sx < sy,
                ExprKind::BvSLtEq => sx <= sy,
                ExprKind::BvSGt => sx > sy,
                _ => sx >= sy,
            }))
        }
        ExprKind::BvULt | ExprKind::BvULtEq | ExprKind::BvUGt | ExprKind::BvUGtEq => {
            let (_, x) = eval_bv(ctx, args[0], valuation)?;
            let (_, y) = eval_bv(ctx, args[1], valuation)?;
            Some(Literal::Bool(match kind {
                ExprKind::BvULt => x < y,
                ExprKind::BvULtEq => x <= y,
                ExprKind::BvUGt => x > y,
                _ => x >= y,
            }))
        }
        ExprKind::ZExt | ExprKind::SExt | ExprKind::Trunc => {
            let (width, x) = eval_bv(ctx, args[0], valuation)?;
            let target = ctx.type_of(expr).bv_width()?;
            let v = match kind {
                ExprKind::ZExt => x,
                ExprKind::SExt => signed(width, x) as u128,
                _ => x,
            };
            Some(Literal::Bv {
                width: target,
                value: v & mask(target),
            })
        }

        ExprKind::FAdd(rm) | ExprKind::FSub(rm) | ExprKind::FMul(rm) | ExprKind::FDiv(rm) => {
            if rm != RoundingMode::NearestTiesToEven {
                return None;
            }
            let (fk, x) = eval_float(ctx, args[0], valuation)?;
            let (_, y) = eval_float(ctx, args[1], valuation)?;
            match fk {
                FloatKind::Single => {
                    let (a, b) = (f32::from_bits(x as u32), f32::from_bits(y as u32));
                    let v = match kind {
                        ExprKind::FAdd(_) => a + b,
                        ExprKind::FSub(_) => a - b,
                        ExprKind::FMul(_) => a * b,
                        _ => a / b,
                    };
                    Some(Literal::from_f32(v))
                }
                FloatKind::Double => {
                    let (a, b) = (f64::from_bits(x as u64), f64::from_bits(y as u64));
                    let v = match kind {
                        ExprKind::FAdd(_) => a + b,
                        ExprKind::FSub(_) => a - b,
                        ExprKind::FMul(_) => a * b,
                        _ => a / b,
                    };
                    Some(Literal::from_f64(v))
                }
                _ => None,
            }
        }
        ExprKind::FEq | ExprKind::FGt | ExprKind::FGtEq | ExprKind::FLt | ExprKind::FLtEq => {
            let (fk, x) = eval_float(ctx, args[0], valuation)?;
            let (_, y) = eval_float(ctx, args[1], valuation)?;
            match fk {
                FloatKind::Single => {
                    let (a, b) = (f32::from_bits(x as u32), f32::from_bits(y as u32));
                    Some(Literal::Bool(match kind {
                        ExprKind::FEq => a == b,
                        ExprKind::FGt => a > b,
                        ExprKind::FGtEq => a >= b,
                        ExprKind::FLt => a < b,
                        _ => a <= b,
                    }))
                }
                FloatKind::Double => {
                    let (a, b) = (f64::from_bits(x as u64), f64::from_bits(y as u64));
                    Some(Literal::Bool(match kind {
                        ExprKind::FEq => a == b,
                        ExprKind::FGt => a > b,
                        ExprKind::FGtEq => a >= b,
                        ExprKind::FLt => a < b,
                        _ => a <= b,
                    }))
                }
                _ => None,
            }
        }
        ExprKind::FIsNan => {
            let (fk, x) = eval_float(ctx, args[0], valuation)?;
            Some(Literal::Bool(float_is_nan(fk, x)))
        }
        ExprKind::FCast(_)
        | ExprKind::SignedToFp(_)
        | ExprKind::UnsignedToFp(_)
        | ExprKind::FpToSigned(_)
        | ExprKind::FpToUnsigned(_) => None,

        // No literal form for arrays.
        ExprKind::Read | ExprKind::Write => None,
    }
}

fn eval_bool(ctx: &Context, expr: ExprId, valuation: &Valuation) -> Option<bool> {
    eval(ctx, expr, valuation)?.as_bool()
}

fn eval_int(ctx: &Context, expr: ExprId, valuation: &Valuation) -> Option<i128> {
    eval(ctx, expr, valuation)?.as_int()
}

fn eval_bv(ctx: &Context, expr: ExprId, valuation: &Valuation) -> Option<(u32, u128)> {
    eval(ctx, expr, valuation)?.as_bv()
}

fn eval_float(ctx: &Context, expr: ExprId, valuation: &Valuation) -> Option<(FloatKind, u128)> {
    match eval(ctx, expr, valuation)? {
        Literal::Float { kind, bits } => Some((kind, bits)),
        _ => None,
    }
}

fn mask(width: u32) -> u128 {
    if width >= 128 {
        u128::MAX
    } else {
        (1u128 << width) - 1
    }
}

fn signed(width: u32, value: u128) -> i128 {
    if width >= 128 {
        return value as i128;
    }
    let sign_bit = 1u128 << (width - 1);
    if value & sign_bit != 0 {
        (value | !mask(width)) as i128
    } else {
        value as i128
    }
}
