//! Debug rendering of types and expressions.

use crate::expr::{Context, ExprId, ExprKind};
use crate::types::{Type, TypeId};

impl Context {
    /// Render a type, e.g. `Bv(32)` or `[Int -> Bv(8)]`.
    pub fn type_string(&self, id: TypeId) -> String {
        match self.resolve_type(id) {
            Type::Bool => "Bool".to_string(),
            Type::Int => "Int".to_string(),
            Type::Bv(w) => format!("Bv({})", w),
            Type::Float(k) => format!("Float({:?})", k),
            Type::Array(d, r) => {
                format!("[{} -> {}]", self.type_string(d), self.type_string(r))
            }
        }
    }

    /// Render an expression as an s-expression. Intended for diagnostics and
    /// test failure messages, not for round-tripping.
    pub fn expr_string(&self, id: ExprId) -> String {
        let kind = self.expr_kind(id);
        match kind {
            ExprKind::BoolLit(b) => b.to_string(),
            ExprKind::IntLit(v) => v.to_string(),
            ExprKind::BvLit { width, value } => format!("{}bv{}", value, width),
            ExprKind::FloatLit { kind, bits } => format!("fp{:?}(0x{:x})", kind, bits),
            ExprKind::Undef => format!("undef:{}", self.type_string(self.expr_type(id))),
            ExprKind::VarRef(var) => self.variable(var).name().to_string(),
            _ => {
                let mut out = format!("({}", op_name(kind));
                for arg in self.operands(id) {
                    out.push(' ');
                    out.push_str(&self.expr_string(arg));
                }
                out.push(')');
                out
            }
        }
    }
}

fn op_name(kind: ExprKind) -> &'static str {
    match kind {
        ExprKind::Not => "not",
        ExprKind::And => "and",
        ExprKind::Or => "or",
        ExprKind::Xor => "xor",
        ExprKind::Eq => "=",
        ExprKind::NotEq => "!=",
        ExprKind::Select => "ite",
        ExprKind::Add => "+",
        ExprKind::Sub => "-",
        ExprKind::Mul => "*",
        ExprKind::Div => "div",
        ExprKind::Mod => "mod",
        ExprKind::Lt => "<",
        ExprKind::LtEq => "<=",
        ExprKind::Gt => ">",
        ExprKind::GtEq => ">=",
        ExprKind::BvSDiv => "bvsdiv",
        ExprKind::BvUDiv => "bvudiv",
        ExprKind::BvSRem => "bvsrem",
        ExprKind::BvURem => "bvurem",
        ExprKind::Shl => "bvshl",
        ExprKind::LShr => "bvlshr",
        ExprKind::AShr => "bvashr",
        ExprKind::BvAnd => "bvand",
        ExprKind::BvOr => "bvor",
        ExprKind::BvXor => "bvxor",
        ExprKind::BvSLt => "bvslt",
        ExprKind::BvSLtEq => "bvsle",
        ExprKind::BvSGt => "bvsgt",
        ExprKind::BvSGtEq => "bvsge",
        ExprKind::BvULt => "bvult",
        ExprKind::BvULtEq => "bvule",
        ExprKind::BvUGt => "bvugt",
        ExprKind::BvUGtEq => "bvuge",
        ExprKind::ZExt => "zext",
        ExprKind::SExt => "sext",
        ExprKind::Trunc => "trunc",
        ExprKind::FAdd(_) => "fadd",
        ExprKind::FSub(_) => "fsub",
        ExprKind::FMul(_) => "fmul",
        ExprKind::FDiv(_) => "fdiv",
        ExprKind::FEq => "feq",
        ExprKind::FGt => "fgt",
        ExprKind::FGtEq => "fge",
        ExprKind::FLt => "flt",
        ExprKind::FLtEq => "fle",
        ExprKind::FIsNan => "fisnan",
        ExprKind::FCast(_) => "fcast",
        ExprKind::SignedToFp(_) => "sitofp",
        ExprKind::UnsignedToFp(_) => "uitofp",
        ExprKind::FpToSigned(_) => "fptosi",
        ExprKind::FpToUnsigned(_) => "fptoui",
        ExprKind::Read => "select",
        ExprKind::Write => "store",
        _ => "?",
    }
}
