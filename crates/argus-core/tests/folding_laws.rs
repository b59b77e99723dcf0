//! Property: the folding builder agrees with the reference evaluator.
//!
//! Constant folding must be semantics-preserving: for literal operands the
//! builder's result is a literal equal to what evaluating the unfolded
//! structure yields. Bit-vector arithmetic additionally has to agree with a
//! plain integer implementation modulo 2^w.

use proptest::prelude::*;

use argus_core::eval::eval;
use argus_core::{Context, ExprId, Literal, Valuation};

fn as_int(ctx: &Context, expr: ExprId) -> i128 {
    eval(ctx, expr, &Valuation::new())
        .and_then(|l| l.as_int())
        .expect("folded expression is an integer literal")
}

fn as_bv(ctx: &Context, expr: ExprId) -> u128 {
    eval(ctx, expr, &Valuation::new())
        .and_then(|l| l.as_bv())
        .map(|(_, v)| v)
        .expect("folded expression is a bit-vector literal")
}

fn as_bool(ctx: &Context, expr: ExprId) -> bool {
    eval(ctx, expr, &Valuation::new())
        .and_then(|l| l.as_bool())
        .expect("folded expression is a Boolean literal")
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 512,
        .. ProptestConfig::default()
    })]

    #[test]
    fn integer_folding_matches_reference(a in -1_000_000i128..1_000_000, b in -1_000_000i128..1_000_000) {
        let ctx = Context::new();
        let builder = ctx.builder();
        let (x, y) = (builder.int_lit(a), builder.int_lit(b));

        prop_assert_eq!(as_int(&ctx, builder.add(x, y).unwrap()), a + b);
        prop_assert_eq!(as_int(&ctx, builder.sub(x, y).unwrap()), a - b);
        prop_assert_eq!(as_int(&ctx, builder.mul(x, y).unwrap()), a * b);
        if b != 0 {
            prop_assert_eq!(as_int(&ctx, builder.div(x, y).unwrap()), a.div_euclid(b));
            prop_assert_eq!(as_int(&ctx, builder.modulo(x, y).unwrap()), a.rem_euclid(b));
        }
        prop_assert_eq!(as_bool(&ctx, builder.lt(x, y).unwrap()), a < b);
        prop_assert_eq!(as_bool(&ctx, builder.gt_eq(x, y).unwrap()), a >= b);
        prop_assert_eq!(as_bool(&ctx, builder.eq(x, y).unwrap()), a == b);
    }

    #[test]
    fn bitvector_arithmetic_wraps_modulo_width(a in any::<u32>(), b in any::<u32>()) {
        let ctx = Context::new();
        let builder = ctx.builder();
        let (x, y) = (builder.bv_lit(a as u128, 32), builder.bv_lit(b as u128, 32));

        prop_assert_eq!(as_bv(&ctx, builder.add(x, y).unwrap()), a.wrapping_add(b) as u128);
        prop_assert_eq!(as_bv(&ctx, builder.sub(x, y).unwrap()), a.wrapping_sub(b) as u128);
        prop_assert_eq!(as_bv(&ctx, builder.mul(x, y).unwrap()), a.wrapping_mul(b) as u128);
        if b != 0 {
            prop_assert_eq!(as_bv(&ctx, builder.bv_udiv(x, y).unwrap()), (a / b) as u128);
            prop_assert_eq!(as_bv(&ctx, builder.bv_urem(x, y).unwrap()), (a % b) as u128);
        }
        prop_assert_eq!(as_bv(&ctx, builder.bv_and(x, y).unwrap()), (a & b) as u128);
        prop_assert_eq!(as_bv(&ctx, builder.bv_or(x, y).unwrap()), (a | b) as u128);
        prop_assert_eq!(as_bv(&ctx, builder.bv_xor(x, y).unwrap()), (a ^ b) as u128);
    }

    #[test]
    fn signed_bitvector_ops_match_two_complement(a in any::<i32>(), b in any::<i32>()) {
        let ctx = Context::new();
        let builder = ctx.builder();
        let x = builder.bv_lit(a as u32 as u128, 32);
        let y = builder.bv_lit(b as u32 as u128, 32);

        if b != 0 && !(a == i32::MIN && b == -1) {
            prop_assert_eq!(
                as_bv(&ctx, builder.bv_sdiv(x, y).unwrap()),
                (a.wrapping_div(b)) as u32 as u128
            );
            prop_assert_eq!(
                as_bv(&ctx, builder.bv_srem(x, y).unwrap()),
                (a.wrapping_rem(b)) as u32 as u128
            );
        }
        prop_assert_eq!(as_bool(&ctx, builder.bv_slt(x, y).unwrap()), a < b);
        prop_assert_eq!(as_bool(&ctx, builder.bv_sgt_eq(x, y).unwrap()), a >= b);
        prop_assert_eq!(as_bool(&ctx, builder.bv_ult(x, y).unwrap()), (a as u32) < (b as u32));
    }

    #[test]
    fn shifts_match_reference(a in any::<u32>(), amount in 0u32..40) {
        let ctx = Context::new();
        let builder = ctx.builder();
        let x = builder.bv_lit(a as u128, 32);
        let s = builder.bv_lit(amount as u128, 32);

        let shl = if amount >= 32 { 0 } else { a << amount };
        let lshr = if amount >= 32 { 0 } else { a >> amount };
        let ashr = if amount >= 32 {
            if (a as i32) < 0 { u32::MAX } else { 0 }
        } else {
            ((a as i32) >> amount) as u32
        };

        prop_assert_eq!(as_bv(&ctx, builder.shl(x, s).unwrap()), shl as u128);
        prop_assert_eq!(as_bv(&ctx, builder.lshr(x, s).unwrap()), lshr as u128);
        prop_assert_eq!(as_bv(&ctx, builder.ashr(x, s).unwrap()), ashr as u128);
    }

    #[test]
    fn extension_casts_match_reference(a in any::<u8>()) {
        let ctx = Context::new();
        let builder = ctx.builder();
        let x = builder.bv_lit(a as u128, 8);

        prop_assert_eq!(as_bv(&ctx, builder.zext(x, ctx.bv_type(32)).unwrap()), a as u128);
        prop_assert_eq!(
            as_bv(&ctx, builder.sext(x, ctx.bv_type(32)).unwrap()),
            (a as i8) as i32 as u32 as u128
        );
    }

    #[test]
    fn sext_of_widening_zext_is_zext(width1 in 9u32..24, width2 in 24u32..48) {
        let ctx = Context::new();
        let builder = ctx.builder();
        let x = builder.var_ref(ctx.create_variable("x", ctx.bv_type(8)).unwrap());

        let zext = builder.zext(x, ctx.bv_type(width1)).unwrap();
        let sext = builder.sext(zext, ctx.bv_type(width2)).unwrap();
        prop_assert_eq!(sext, builder.zext(x, ctx.bv_type(width2)).unwrap());
    }

    #[test]
    fn float_folding_matches_host_arithmetic(a in any::<f64>(), b in any::<f64>()) {
        let ctx = Context::new();
        let builder = ctx.builder();
        let x = builder.float_from_f64(a);
        let y = builder.float_from_f64(b);
        let rm = argus_core::RoundingMode::NearestTiesToEven;

        let sum = builder.fadd(x, y, rm).unwrap();
        prop_assert_eq!(sum, builder.float_from_f64(a + b));

        let lt = builder.flt(x, y).unwrap();
        prop_assert_eq!(as_bool(&ctx, lt), a < b);
    }

    #[test]
    fn folded_result_equals_unfolded_evaluation(a in any::<i64>(), b in any::<i64>()) {
        // Build the same term with both builders; evaluating the unfolded
        // node must agree with the folded literal.
        let ctx = Context::new();
        let folded = {
            let builder = ctx.builder();
            builder.add(builder.int_lit(a as i128), builder.int_lit(b as i128)).unwrap()
        };
        let plain = {
            let builder = ctx.plain_builder();
            builder.add(builder.int_lit(a as i128), builder.int_lit(b as i128)).unwrap()
        };
        prop_assert_eq!(
            eval(&ctx, folded, &Valuation::new()),
            eval(&ctx, plain, &Valuation::new())
        );
        prop_assert_eq!(
            eval(&ctx, folded, &Valuation::new()),
            Some(Literal::Int(a as i128 + b as i128))
        );
    }
}
