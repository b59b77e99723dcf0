//! End-to-end checking scenarios over small SSA programs.

use argus_automaton::{
    translate_module, HavocMemoryModel, IntRepresentation, Settings,
};
use argus_bmc::{
    encode_reachability, BmcSettings, BoundedModelChecker, Solver, SolverStatus,
    VerificationResult, Z3Solver, Z3SolverFactory,
};
use argus_core::{Context, Literal};
use argus_ir::{
    BinaryOp, Callee, FuncId, Function, ICmpPred, Inst, InstKind, IrType, Module, Phi, Terminator,
    Value,
};

fn inst(result: Option<argus_ir::LocalId>, kind: InstKind) -> Inst {
    Inst {
        result,
        kind,
        debug_loc: None,
    }
}

fn const_i32(value: i128) -> Value {
    Value::ConstInt { width: 32, value }
}

fn check(
    module: &Module,
    ints: IntRepresentation,
    unwind_bound: u32,
) -> (Context, VerificationResult) {
    let ctx = Context::new();
    let mut mem = HavocMemoryModel::new(ints);
    let system = translate_module(
        &ctx,
        module,
        Settings {
            int_representation: ints,
        },
        &mut mem,
    )
    .expect("lowering succeeds");

    let checker = BoundedModelChecker::new(
        Z3SolverFactory,
        BmcSettings {
            int_representation: ints,
            unwind_bound,
        },
    );
    let result = checker.check(&ctx, &system).expect("checking completes");
    (ctx, result)
}

fn declare_nondet(module: &mut Module) -> FuncId {
    module.add_function(Function::declare(
        "__VERIFIER_nondet_int",
        vec![],
        Some(IrType::Int(32)),
    ))
}

fn declare_error(module: &mut Module) -> FuncId {
    module.add_function(Function::declare("__VERIFIER_error", vec![], None))
}

/// int x = nondet(); if (x < 0 && x >= 0) error();
fn straight_line_unsat_module() -> Module {
    let mut module = Module::new();
    let nondet = declare_nondet(&mut module);
    let error = declare_error(&mut module);

    let mut main = Function::new("main", vec![], Some(IrType::Int(32)));
    let entry = main.add_block("entry");
    let err_block = main.add_block("err");
    let ret_block = main.add_block("ret");

    let x = main.add_local("x", IrType::Int(32));
    let neg = main.add_local("neg", IrType::Int(1));
    let nonneg = main.add_local("nonneg", IrType::Int(1));
    let both = main.add_local("both", IrType::Int(1));

    main.push_inst(
        entry,
        inst(
            Some(x),
            InstKind::Call {
                callee: Callee::Direct(nondet),
                args: vec![],
            },
        ),
    );
    main.push_inst(
        entry,
        inst(
            Some(neg),
            InstKind::ICmp {
                pred: ICmpPred::Slt,
                lhs: Value::Local(x),
                rhs: const_i32(0),
            },
        ),
    );
    main.push_inst(
        entry,
        inst(
            Some(nonneg),
            InstKind::ICmp {
                pred: ICmpPred::Sge,
                lhs: Value::Local(x),
                rhs: const_i32(0),
            },
        ),
    );
    main.push_inst(
        entry,
        inst(
            Some(both),
            InstKind::Binary {
                op: BinaryOp::And,
                lhs: Value::Local(neg),
                rhs: Value::Local(nonneg),
            },
        ),
    );
    main.set_terminator(
        entry,
        Terminator::CondBr {
            cond: Value::Local(both),
            on_true: err_block,
            on_false: ret_block,
        },
    );

    main.push_inst(
        err_block,
        inst(
            None,
            InstKind::Call {
                callee: Callee::Direct(error),
                args: vec![],
            },
        ),
    );
    main.set_terminator(err_block, Terminator::Unreachable);
    main.set_terminator(
        ret_block,
        Terminator::Ret {
            value: Some(const_i32(0)),
        },
    );
    module.add_function(main);
    module
}

#[test]
fn straight_line_contradiction_is_successful() {
    for ints in [IntRepresentation::BitVectors, IntRepresentation::Integers] {
        let module = straight_line_unsat_module();
        let (_ctx, result) = check(&module, ints, 8);
        assert!(result.is_success(), "expected success, got {:?}", result);
    }
}

/// int loc = nondet(); if (loc != 0) error();
fn nonzero_reaches_error_module() -> Module {
    let mut module = Module::new();
    let nondet = declare_nondet(&mut module);
    let error = declare_error(&mut module);

    let mut main = Function::new("main", vec![], Some(IrType::Int(32)));
    let entry = main.add_block("entry");
    let err_block = main.add_block("err");
    let ret_block = main.add_block("ret");

    let loc = main.add_local("loc", IrType::Int(32));
    let bad = main.add_local("bad", IrType::Int(1));

    main.push_inst(
        entry,
        inst(
            Some(loc),
            InstKind::Call {
                callee: Callee::Direct(nondet),
                args: vec![],
            },
        ),
    );
    main.push_inst(
        entry,
        inst(
            Some(bad),
            InstKind::ICmp {
                pred: ICmpPred::Ne,
                lhs: Value::Local(loc),
                rhs: const_i32(0),
            },
        ),
    );
    main.set_terminator(
        entry,
        Terminator::CondBr {
            cond: Value::Local(bad),
            on_true: err_block,
            on_false: ret_block,
        },
    );
    main.push_inst(
        err_block,
        inst(
            None,
            InstKind::Call {
                callee: Callee::Direct(error),
                args: vec![],
            },
        ),
    );
    main.set_terminator(err_block, Terminator::Unreachable);
    main.set_terminator(
        ret_block,
        Terminator::Ret {
            value: Some(const_i32(0)),
        },
    );
    module.add_function(main);
    module
}

#[test]
fn nonzero_symbolic_input_fails_with_witness() {
    let module = nonzero_reaches_error_module();
    let (_ctx, result) = check(&module, IntRepresentation::BitVectors, 8);

    let VerificationResult::Fail { trace, error_code } = result else {
        panic!("expected a failing verdict, got {:?}", result);
    };
    assert!(error_code.is_none());
    assert!(!trace.is_truncated());

    // The nondet input must appear with a concrete nonzero 32-bit value.
    let (callee, value) = trace
        .calls()
        .next()
        .expect("trace records the nondeterministic input");
    assert_eq!(callee, "__VERIFIER_nondet_int");
    match value {
        Some(Literal::Bv { width: 32, value }) => assert_ne!(value, 0),
        other => panic!("unexpected nondet value {:?}", other),
    }
}

/// int i = 0; while (i < 10) i++; if (i != 10) error();
fn counting_loop_module() -> Module {
    let mut module = Module::new();
    let error = declare_error(&mut module);

    let mut main = Function::new("main", vec![], Some(IrType::Int(32)));
    let entry = main.add_block("entry");
    let header = main.add_block("header");
    let body = main.add_block("body");
    let exit = main.add_block("exit");
    let err_block = main.add_block("err");
    let ret_block = main.add_block("ret");

    let i = main.add_local("i", IrType::Int(32));
    let i_next = main.add_local("i_next", IrType::Int(32));
    let in_bounds = main.add_local("in_bounds", IrType::Int(1));
    let bad = main.add_local("bad", IrType::Int(1));

    main.set_terminator(entry, Terminator::Br { target: header });
    main.push_phi(
        header,
        Phi {
            result: i,
            ty: IrType::Int(32),
            incoming: vec![
                (const_i32(0), entry),
                (Value::Local(i_next), body),
            ],
        },
    );
    main.push_inst(
        header,
        inst(
            Some(in_bounds),
            InstKind::ICmp {
                pred: ICmpPred::Slt,
                lhs: Value::Local(i),
                rhs: const_i32(10),
            },
        ),
    );
    main.set_terminator(
        header,
        Terminator::CondBr {
            cond: Value::Local(in_bounds),
            on_true: body,
            on_false: exit,
        },
    );
    main.push_inst(
        body,
        inst(
            Some(i_next),
            InstKind::Binary {
                op: BinaryOp::Add,
                lhs: Value::Local(i),
                rhs: const_i32(1),
            },
        ),
    );
    main.set_terminator(body, Terminator::Br { target: header });
    main.push_inst(
        exit,
        inst(
            Some(bad),
            InstKind::ICmp {
                pred: ICmpPred::Ne,
                lhs: Value::Local(i),
                rhs: const_i32(10),
            },
        ),
    );
    main.set_terminator(
        exit,
        Terminator::CondBr {
            cond: Value::Local(bad),
            on_true: err_block,
            on_false: ret_block,
        },
    );
    main.push_inst(
        err_block,
        inst(
            None,
            InstKind::Call {
                callee: Callee::Direct(error),
                args: vec![],
            },
        ),
    );
    main.set_terminator(err_block, Terminator::Unreachable);
    main.set_terminator(
        ret_block,
        Terminator::Ret {
            value: Some(const_i32(0)),
        },
    );
    module.add_function(main);
    module
}

#[test]
fn single_exit_loop_is_successful_within_bound() {
    let module = counting_loop_module();
    let (_ctx, result) = check(&module, IntRepresentation::BitVectors, 16);
    assert!(result.is_success(), "expected success, got {:?}", result);
}

/// while (i < 10) { if (nondet()) break; i++; } with the error on normal
/// completion, so the counterexample must run the loop dry and report the
/// exit it took.
fn multi_exit_loop_module() -> Module {
    let mut module = Module::new();
    let nondet = declare_nondet(&mut module);
    let error = declare_error(&mut module);

    let mut main = Function::new("main", vec![], Some(IrType::Int(32)));
    let entry = main.add_block("entry");
    let header = main.add_block("header");
    let body = main.add_block("body");
    let latch = main.add_block("latch");
    let done = main.add_block("done");
    let broke = main.add_block("broke");

    let i = main.add_local("i", IrType::Int(32));
    let i_next = main.add_local("i_next", IrType::Int(32));
    let in_bounds = main.add_local("in_bounds", IrType::Int(1));
    let choice = main.add_local("choice", IrType::Int(32));
    let take_break = main.add_local("take_break", IrType::Int(1));

    main.set_terminator(entry, Terminator::Br { target: header });
    main.push_phi(
        header,
        Phi {
            result: i,
            ty: IrType::Int(32),
            incoming: vec![
                (const_i32(0), entry),
                (Value::Local(i_next), latch),
            ],
        },
    );
    main.push_inst(
        header,
        inst(
            Some(in_bounds),
            InstKind::ICmp {
                pred: ICmpPred::Slt,
                lhs: Value::Local(i),
                rhs: const_i32(10),
            },
        ),
    );
    main.set_terminator(
        header,
        Terminator::CondBr {
            cond: Value::Local(in_bounds),
            on_true: body,
            on_false: done,
        },
    );
    main.push_inst(
        body,
        inst(
            Some(choice),
            InstKind::Call {
                callee: Callee::Direct(nondet),
                args: vec![],
            },
        ),
    );
    main.push_inst(
        body,
        inst(
            Some(take_break),
            InstKind::ICmp {
                pred: ICmpPred::Ne,
                lhs: Value::Local(choice),
                rhs: const_i32(0),
            },
        ),
    );
    main.set_terminator(
        body,
        Terminator::CondBr {
            cond: Value::Local(take_break),
            on_true: broke,
            on_false: latch,
        },
    );
    main.push_inst(
        latch,
        inst(
            Some(i_next),
            InstKind::Binary {
                op: BinaryOp::Add,
                lhs: Value::Local(i),
                rhs: const_i32(1),
            },
        ),
    );
    main.set_terminator(latch, Terminator::Br { target: header });

    main.push_inst(
        done,
        inst(
            None,
            InstKind::Call {
                callee: Callee::Direct(error),
                args: vec![],
            },
        ),
    );
    main.set_terminator(done, Terminator::Unreachable);
    main.set_terminator(
        broke,
        Terminator::Ret {
            value: Some(const_i32(1)),
        },
    );
    module.add_function(main);
    module
}

#[test]
fn multi_exit_loop_reports_taken_exit() {
    let module = multi_exit_loop_module();
    let (_ctx, result) = check(&module, IntRepresentation::BitVectors, 16);

    let VerificationResult::Fail { trace, .. } = result else {
        panic!("expected a failing verdict, got {:?}", result);
    };

    // The exit selector surfaces in the trace with the constant of the
    // normal-completion exit, which is discovered first.
    let selector = trace
        .assignments()
        .find(|(name, _)| name.ends_with("header_selector"))
        .expect("trace reports the exit selector");
    assert_eq!(selector.1, Some(Literal::Bv { width: 32, value: 0 }));

    // Running the loop dry takes exactly ten increments.
    let final_i = trace
        .assignments()
        .filter(|(name, _)| *name == "main/i")
        .last()
        .expect("loop live-out appears in the trace");
    assert_eq!(final_i.1, Some(Literal::Bv { width: 32, value: 10 }));
}

#[test]
fn satisfying_model_satisfies_the_query_formula() {
    // A SAT model must evaluate the query formula to true under the
    // concrete reference evaluator.
    let module = nonzero_reaches_error_module();
    let ctx = Context::new();
    let mut mem = HavocMemoryModel::new(IntRepresentation::BitVectors);
    let system = translate_module(&ctx, &module, Settings::default(), &mut mem).unwrap();
    let encoding = encode_reachability(&ctx, &system, &BmcSettings::default()).unwrap();
    assert_eq!(encoding.queries.len(), 1);

    let query = &encoding.queries[0];
    let mut solver = Z3Solver::new();
    solver.add(&ctx, query.formula).unwrap();
    assert_eq!(solver.check().unwrap(), SolverStatus::Sat);
    let model = solver.model(&ctx).unwrap();

    assert_eq!(
        argus_core::eval::eval(&ctx, query.formula, &model),
        Some(Literal::Bool(true))
    );
}

#[test]
fn error_codes_are_carried_to_the_verdict() {
    let mut module = Module::new();
    let marker = module.add_function(Function::declare(
        "argus.error_code",
        vec![("code".to_string(), IrType::Int(32))],
        None,
    ));

    let mut main = Function::new("main", vec![], Some(IrType::Int(32)));
    let entry = main.add_block("entry");
    main.push_inst(
        entry,
        inst(
            None,
            InstKind::Call {
                callee: Callee::Direct(marker),
                args: vec![const_i32(7)],
            },
        ),
    );
    main.set_terminator(
        entry,
        Terminator::Ret {
            value: Some(const_i32(0)),
        },
    );
    module.add_function(main);

    let (_ctx, result) = check(&module, IntRepresentation::BitVectors, 4);
    let VerificationResult::Fail { error_code, .. } = result else {
        panic!("expected a failing verdict, got {:?}", result);
    };
    assert_eq!(error_code, Some(Literal::Bv { width: 32, value: 7 }));
}
