//! The encoder's verdict must agree with brute-force path enumeration on
//! small hand-built automata: an error location's formula is satisfiable
//! exactly when some entry-to-error path has a satisfiable conjunction of
//! edge formulas.

use argus_automaton::{
    AutomataSystem, Cfa, LocationId, TransitionKind, VariableAssignment,
};
use argus_bmc::{encode_reachability, BmcSettings, Solver, SolverStatus, Z3Solver};
use argus_core::{Context, ExprId};

/// Conjunction of a transition's guard and assignment equalities.
fn edge_formula(ctx: &Context, t: &argus_automaton::Transition) -> ExprId {
    let builder = ctx.builder();
    let mut parts = vec![t.guard];
    if let TransitionKind::Assign(assigns) = &t.kind {
        for a in assigns {
            parts.push(builder.eq(builder.var_ref(a.variable), a.value).unwrap());
        }
    }
    builder.and_many(&parts).unwrap()
}

/// All entry-to-target paths as edge-formula conjunctions. The automata
/// under test are DAGs, so plain depth-first enumeration terminates.
fn path_formulas(ctx: &Context, cfa: &Cfa, target: LocationId) -> Vec<ExprId> {
    let mut out = Vec::new();
    let mut stack: Vec<(LocationId, Vec<ExprId>)> = vec![(cfa.entry(), Vec::new())];
    while let Some((loc, parts)) = stack.pop() {
        if loc == target {
            out.push(ctx.builder().and_many(&parts).unwrap());
            continue;
        }
        for t_id in cfa.location(loc).outgoing() {
            let t = cfa.transition(*t_id);
            let mut extended = parts.clone();
            extended.push(edge_formula(ctx, t));
            stack.push((t.target, extended));
        }
    }
    out
}

fn is_sat(ctx: &Context, formula: ExprId) -> bool {
    let mut solver = Z3Solver::new();
    solver.add(ctx, formula).unwrap();
    solver.check().unwrap() == SolverStatus::Sat
}

/// entry -(x>0, y:=x+1)-> a -(y<0)-> error
/// entry -(x<=0)-> b -(guard on y)-> error
fn diamond_cfa(ctx: &Context, second_arm_guard: impl Fn(&Context, ExprId, ExprId) -> ExprId) -> AutomataSystem {
    let mut system = AutomataSystem::new();
    let id = system.create_cfa("test");
    let cfa = system.cfa_mut(id);
    let builder = ctx.builder();

    let x = builder.var_ref(cfa.create_input(ctx, "x", ctx.int_type()).unwrap());
    let y_var = cfa.create_local(ctx, "y", ctx.int_type()).unwrap();
    let y = builder.var_ref(y_var);

    let a = cfa.create_location();
    let b = cfa.create_location();
    let error = cfa.create_error_location();

    let zero = builder.int_lit(0);
    let entry = cfa.entry();
    let exit = cfa.exit();

    cfa.create_assign_transition(
        ctx,
        entry,
        a,
        builder.gt(x, zero).unwrap(),
        vec![VariableAssignment {
            variable: y_var,
            value: builder.add(x, builder.int_lit(1)).unwrap(),
        }],
    )
    .unwrap();
    cfa.create_assign_transition(ctx, entry, b, builder.lt_eq(x, zero).unwrap(), vec![])
        .unwrap();
    // First arm: y < 0 contradicts y = x + 1 under x > 0.
    cfa.create_assign_transition(ctx, a, error, builder.lt(y, zero).unwrap(), vec![])
        .unwrap();
    let second = second_arm_guard(ctx, x, y);
    cfa.create_assign_transition(ctx, b, error, second, vec![])
        .unwrap();
    cfa.create_assign_transition(ctx, a, exit, builder.true_lit(), vec![])
        .unwrap();
    cfa.create_assign_transition(ctx, b, exit, builder.true_lit(), vec![])
        .unwrap();

    system.set_main(id);
    system
}

fn compare_encoder_with_paths(system: &AutomataSystem, ctx: &Context) {
    let settings = BmcSettings {
        int_representation: argus_automaton::IntRepresentation::Integers,
        ..BmcSettings::default()
    };
    let encoding = encode_reachability(ctx, system, &settings).unwrap();
    let cfa = system.cfa(system.main().unwrap());
    let error = cfa.error_locations().next().unwrap();

    let encoder_sat = match encoding
        .queries
        .iter()
        .find(|q| q.location == error)
    {
        Some(query) => is_sat(ctx, query.formula),
        // The reachability precondition already folded to false.
        None => false,
    };
    let brute_force_sat = path_formulas(ctx, cfa, error)
        .into_iter()
        .any(|f| is_sat(ctx, f));

    assert_eq!(encoder_sat, brute_force_sat);
}

#[test]
fn reachable_error_agrees_with_path_enumeration() {
    let ctx = Context::new();
    // Second arm leaves y unconstrained: reachable.
    let system = diamond_cfa(&ctx, |ctx, _x, y| {
        ctx.builder().gt(y, ctx.builder().int_lit(5)).unwrap()
    });
    compare_encoder_with_paths(&system, &ctx);

    let settings = BmcSettings {
        int_representation: argus_automaton::IntRepresentation::Integers,
        ..BmcSettings::default()
    };
    let encoding = encode_reachability(&ctx, &system, &settings).unwrap();
    assert!(is_sat(&ctx, encoding.queries[0].formula));
}

#[test]
fn unreachable_error_agrees_with_path_enumeration() {
    let ctx = Context::new();
    // Second arm requires x > 0 under the x <= 0 branch: contradiction on
    // both arms, so the error is unreachable.
    let system = diamond_cfa(&ctx, |ctx, x, _y| {
        ctx.builder().gt(x, ctx.builder().int_lit(0)).unwrap()
    });
    compare_encoder_with_paths(&system, &ctx);

    let settings = BmcSettings {
        int_representation: argus_automaton::IntRepresentation::Integers,
        ..BmcSettings::default()
    };
    let encoding = encode_reachability(&ctx, &system, &settings).unwrap();
    if let Some(query) = encoding.queries.first() {
        assert!(!is_sat(&ctx, query.formula));
    }
}
