//! End-to-end tests: program → validation → lowering → VM execution
//!
//! Each test builds a program with the AST builders, compiles it with the
//! default options and runs the entry function on the reference VM.

use primec::compiler::{CompileOptions, Compiler, IrOpcode};
use primec::parser::{Definition, Expr, Program};
use primec::runtime::{Vm, VmOutput};
use primec::{ErrorCategory, IrModule};

// =============================================================================
// HELPERS
// =============================================================================

fn compile(program: &Program) -> primec::Result<IrModule> {
    Compiler::new(CompileOptions::default())
        .compile(program)
        .map(|r| r.module)
}

fn compile_unvalidated(program: &Program) -> primec::Result<IrModule> {
    let options = CompileOptions {
        run_validator: false,
        ..CompileOptions::default()
    };
    Compiler::new(options).compile(program).map(|r| r.module)
}

fn run(program: &Program, args: &[&str]) -> VmOutput {
    let module = compile(program).expect("program should compile");
    let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
    Vm::new(&module).run(&args).expect("program should run")
}

fn int_main(stmts: Vec<Expr>) -> Program {
    Program::new().with_definition(Definition::new("/main").returns("int").with_statements(stmts))
}

fn args_main(stmts: Vec<Expr>) -> Program {
    Program::new().with_definition(
        Definition::new("/main")
            .with_parameter(Expr::param("args", &["array<string>"]))
            .with_statements(stmts),
    )
}

fn call(name: &str, args: Vec<Expr>) -> Expr {
    Expr::call(name, args)
}

fn ops(module: &IrModule) -> Vec<IrOpcode> {
    module.functions[0].instructions.iter().map(|i| i.op).collect()
}

// =============================================================================
// BASIC LOWERING
// =============================================================================

#[test]
fn test_return_literal() {
    let program = int_main(vec![Expr::ret(Expr::i32(7))]);
    let module = compile(&program).unwrap();
    assert_eq!(module.functions.len(), 1);
    assert_eq!(module.functions[0].name, "/main");
    assert_eq!(module.entry_index, 0);
    assert_eq!(ops(&module), vec![IrOpcode::PushI32, IrOpcode::ReturnI32]);
    assert_eq!(Vm::new(&module).run(&[]).unwrap().as_i32(), Some(7));
}

#[test]
fn test_trailing_return_expr() {
    let program = Program::new().with_definition(
        Definition::new("/main")
            .returns("int")
            .with_return_expr(call("multiply", vec![Expr::i32(6), Expr::i32(7)])),
    );
    assert_eq!(run(&program, &[]).as_i32(), Some(42));
}

#[test]
fn test_void_entry_gets_trailing_return() {
    let program = Program::new().with_definition(
        Definition::new("/main").with_statement(call("print_line", vec![Expr::string("hello")])),
    );
    let module = compile(&program).unwrap();
    assert_eq!(ops(&module).last(), Some(&IrOpcode::ReturnVoid));
    assert_eq!(module.string_table, vec!["hello".to_string()]);

    let out = Vm::new(&module).run(&[]).unwrap();
    assert_eq!(out.stdout, "hello\n");
    assert_eq!(out.return_value, None);
}

#[test]
fn test_non_void_entry_without_return_rejected_by_lowerer() {
    let program = int_main(vec![Expr::binding("x", &["i32"], Expr::i32(1))]);
    let err = compile_unvalidated(&program).unwrap_err();
    assert_eq!(err.to_string(), "native backend requires an explicit return statement");
    assert_eq!(err.category(), ErrorCategory::Lowering);
}

// =============================================================================
// POINTERS AND REFERENCES
// =============================================================================

#[test]
fn test_pointer_write_through_dereference() {
    let program = int_main(vec![
        Expr::binding("value", &["i32", "mut"], Expr::i32(4)),
        Expr::binding("ptr", &["Pointer<i32>", "mut"], call("location", vec![Expr::name("value")])),
        Expr::assign(call("dereference", vec![Expr::name("ptr")]), Expr::i32(9)),
        Expr::ret(Expr::name("value")),
    ]);
    let module = compile(&program).unwrap();
    let seen = ops(&module);
    assert!(seen.contains(&IrOpcode::AddressOfLocal));
    assert!(seen.contains(&IrOpcode::StoreIndirect));
    assert_eq!(Vm::new(&module).run(&[]).unwrap().as_i32(), Some(9));
}

#[test]
fn test_reference_assignment_and_read() {
    let program = int_main(vec![
        Expr::binding("value", &["i32", "mut"], Expr::i32(3)),
        Expr::binding("r", &["Reference<i32>", "mut"], call("location", vec![Expr::name("value")])),
        Expr::assign(Expr::name("r"), Expr::i32(7)),
        Expr::ret(Expr::name("value")),
    ]);
    assert_eq!(run(&program, &[]).as_i32(), Some(7));

    let program = int_main(vec![
        Expr::binding("value", &["i32"], Expr::i32(5)),
        Expr::binding("r", &["Reference<i32>"], call("location", vec![Expr::name("value")])),
        Expr::ret(call("plus", vec![Expr::name("r"), Expr::i32(1)])),
    ]);
    assert_eq!(run(&program, &[]).as_i32(), Some(6));
}

#[test]
fn test_pointer_arithmetic_uses_64_bit_ops() {
    let program = int_main(vec![
        Expr::binding("value", &["i32"], Expr::i32(1)),
        Expr::binding(
            "ptr",
            &[],
            call("plus", vec![call("location", vec![Expr::name("value")]), Expr::i32(0)]),
        ),
        Expr::ret(call("dereference", vec![Expr::name("ptr")])),
    ]);
    let module = compile(&program).unwrap();
    assert!(ops(&module).contains(&IrOpcode::AddI64));
    assert_eq!(Vm::new(&module).run(&[]).unwrap().as_i32(), Some(1));
}

// =============================================================================
// CONTROL FLOW
// =============================================================================

#[test]
fn test_repeat_with_negative_literal_skips_body() {
    let program = int_main(vec![
        Expr::binding("value", &["i32", "mut"], Expr::i32(0)),
        Expr::repeat(Expr::i32(-2), vec![Expr::assign(Expr::name("value"), Expr::i32(9))]),
        Expr::ret(Expr::name("value")),
    ]);
    let module = compile(&program).unwrap();
    assert!(!ops(&module).contains(&IrOpcode::Jump));
    assert_eq!(Vm::new(&module).run(&[]).unwrap().as_i32(), Some(0));
}

#[test]
fn test_repeat_accumulates() {
    let program = int_main(vec![
        Expr::binding("value", &["i32", "mut"], Expr::i32(0)),
        Expr::repeat(
            Expr::i32(3),
            vec![Expr::assign(
                Expr::name("value"),
                call("plus", vec![Expr::name("value"), Expr::i32(2)]),
            )],
        ),
        Expr::ret(Expr::name("value")),
    ]);
    assert_eq!(run(&program, &[]).as_i32(), Some(6));
}

#[test]
fn test_repeat_with_negative_runtime_count_skips_body() {
    let program = int_main(vec![
        Expr::binding("value", &["i32", "mut"], Expr::i32(0)),
        Expr::binding("n", &["i32"], call("negate", vec![Expr::i32(3)])),
        Expr::repeat(Expr::name("n"), vec![Expr::assign(Expr::name("value"), Expr::i32(9))]),
        Expr::ret(Expr::name("value")),
    ]);
    let module = compile(&program).unwrap();
    assert!(ops(&module).contains(&IrOpcode::JumpIfZero));
    assert_eq!(Vm::new(&module).run(&[]).unwrap().as_i32(), Some(0));
}

#[test]
fn test_if_selects_branch_on_argc() {
    let program = Program::new().with_definition(
        Definition::new("/main")
            .returns("int")
            .with_parameter(Expr::param("args", &["array<string>"]))
            .with_statement(Expr::if_else(
                call("greater_than", vec![call("count", vec![Expr::name("args")]), Expr::i32(1)]),
                vec![Expr::ret(Expr::i32(1))],
                vec![Expr::ret(Expr::i32(2))],
            )),
    );
    assert_eq!(run(&program, &["prog", "x"]).as_i32(), Some(1));
    assert_eq!(run(&program, &["prog"]).as_i32(), Some(2));
}

#[test]
fn test_if_expression_value() {
    let program = int_main(vec![
        Expr::binding(
            "x",
            &[],
            Expr::if_else(
                call("less_than", vec![Expr::i32(1), Expr::i32(2)]),
                vec![Expr::i32(10)],
                vec![Expr::i32(20)],
            ),
        ),
        Expr::ret(Expr::name("x")),
    ]);
    assert_eq!(run(&program, &[]).as_i32(), Some(10));
}

#[test]
fn test_block_scope_and_value() {
    let program = int_main(vec![
        Expr::binding(
            "x",
            &[],
            Expr::block(vec![
                Expr::binding("inner", &["i32"], Expr::i32(5)),
                call("multiply", vec![Expr::name("inner"), Expr::i32(3)]),
            ]),
        ),
        Expr::ret(Expr::name("x")),
    ]);
    assert_eq!(run(&program, &[]).as_i32(), Some(15));
}

#[test]
fn test_and_short_circuits() {
    let guarded = call(
        "equal",
        vec![call("divide", vec![Expr::i32(1), Expr::i32(0)]), Expr::i32(0)],
    );
    let program = int_main(vec![Expr::if_else(
        call("and", vec![Expr::bool(false), guarded]),
        vec![Expr::ret(Expr::i32(1))],
        vec![Expr::ret(Expr::i32(2))],
    )]);
    assert_eq!(run(&program, &[]).as_i32(), Some(2));

    let program = int_main(vec![Expr::if_else(
        call("or", vec![Expr::bool(false), call("not", vec![Expr::bool(false)])]),
        vec![Expr::ret(Expr::i32(1))],
        vec![Expr::ret(Expr::i32(2))],
    )]);
    assert_eq!(run(&program, &[]).as_i32(), Some(1));
}

// =============================================================================
// NUMERICS
// =============================================================================

#[test]
fn test_i32_widens_to_i64() {
    let program = Program::new().with_definition(
        Definition::new("/main")
            .returns("i64")
            .with_statement(Expr::ret(call("plus", vec![Expr::i32(1), Expr::i64(2)]))),
    );
    let module = compile(&program).unwrap();
    assert!(ops(&module).contains(&IrOpcode::AddI64));
    assert_eq!(ops(&module).last(), Some(&IrOpcode::ReturnI64));
    assert_eq!(Vm::new(&module).run(&[]).unwrap().as_i64(), Some(3));
}

#[test]
fn test_float_arithmetic_and_convert() {
    let program = Program::new().with_definition(
        Definition::new("/main")
            .returns("f64")
            .with_statement(Expr::ret(call("plus", vec![Expr::f64(1.5), Expr::f64(2.25)]))),
    );
    assert_eq!(run(&program, &[]).as_f64(), Some(3.75));

    let program = Program::new().with_definition(
        Definition::new("/main")
            .returns("f64")
            .with_statement(Expr::ret(Expr::call_template("convert", &["f64"], vec![Expr::i32(7)]))),
    );
    let module = compile(&program).unwrap();
    assert!(ops(&module).contains(&IrOpcode::ConvertI32ToF64));
    assert_eq!(Vm::new(&module).run(&[]).unwrap().as_f64(), Some(7.0));
}

#[test]
fn test_convert_to_bool_compares_against_zero() {
    let program = int_main(vec![Expr::if_else(
        Expr::call_template("convert", &["bool"], vec![Expr::i64(5)]),
        vec![Expr::ret(Expr::i32(1))],
        vec![Expr::ret(Expr::i32(0))],
    )]);
    assert_eq!(run(&program, &[]).as_i32(), Some(1));
}

#[test]
fn test_math_builtins() {
    let cases = vec![
        (call("clamp", vec![Expr::i32(15), Expr::i32(0), Expr::i32(10)]), 10),
        (call("clamp", vec![Expr::i32(-5), Expr::i32(0), Expr::i32(10)]), 0),
        (call("clamp", vec![Expr::i32(4), Expr::i32(0), Expr::i32(10)]), 4),
        (call("abs", vec![Expr::i32(-4)]), 4),
        (call("min", vec![Expr::i32(3), Expr::i32(8)]), 3),
        (call("max", vec![Expr::i32(3), Expr::i32(8)]), 8),
        (call("sign", vec![Expr::i32(-9)]), -1),
        (call("sign", vec![Expr::i32(0)]), 0),
        (call("sign", vec![Expr::i32(12)]), 1),
    ];
    for (expr, expected) in cases {
        let program = int_main(vec![Expr::ret(expr)]);
        assert_eq!(run(&program, &[]).as_i32(), Some(expected));
    }
}

#[test]
fn test_division_by_zero_reported_by_vm() {
    let program = int_main(vec![Expr::ret(call("divide", vec![Expr::i32(1), Expr::i32(0)]))]);
    let module = compile(&program).unwrap();
    assert_eq!(
        Vm::new(&module).run(&[]).unwrap_err().to_string(),
        "division by zero in IR"
    );
}

#[test]
fn test_out_of_range_i32_literal_rejected() {
    let literal = Expr {
        kind: primec::ExprKind::Literal(primec::Literal::Int {
            value: i64::from(i32::MAX) + 1,
            width: primec::parser::IntWidth::I32,
        }),
        transforms: Vec::new(),
    };
    let program = int_main(vec![Expr::ret(literal)]);
    assert_eq!(
        compile_unvalidated(&program).unwrap_err().to_string(),
        "i32 literal out of range for native backend"
    );
}

// =============================================================================
// INLINING
// =============================================================================

#[test]
fn test_user_calls_are_inlined() {
    let program = int_main(vec![Expr::ret(call("square", vec![Expr::i32(6)]))]).with_definition(
        Definition::new("/square")
            .returns("int")
            .with_parameter(Expr::param("x", &["i32"]))
            .with_statement(Expr::ret(call("multiply", vec![Expr::name("x"), Expr::name("x")]))),
    );
    let module = compile(&program).unwrap();
    assert_eq!(module.functions.len(), 1);
    assert_eq!(Vm::new(&module).run(&[]).unwrap().as_i32(), Some(36));
}

#[test]
fn test_named_and_default_arguments() {
    let sub = Definition::new("/sub")
        .returns("int")
        .with_parameter(Expr::param("a", &["i32"]))
        .with_parameter(Expr::binding("b", &["i32"], Expr::i32(5)))
        .with_statement(Expr::ret(call("minus", vec![Expr::name("a"), Expr::name("b")])));

    let named = Expr::call_named("sub", vec![(Some("b"), Expr::i32(1)), (Some("a"), Expr::i32(10))]);
    let program = int_main(vec![Expr::ret(named)]).with_definition(sub.clone());
    assert_eq!(run(&program, &[]).as_i32(), Some(9));

    let defaulted = call("sub", vec![Expr::i32(12)]);
    let program = int_main(vec![Expr::ret(defaulted)]).with_definition(sub);
    assert_eq!(run(&program, &[]).as_i32(), Some(7));
}

#[test]
fn test_early_return_inside_inlined_body() {
    let pick = Definition::new("/pick")
        .returns("int")
        .with_parameter(Expr::param("flag", &["bool"]))
        .with_statement(Expr::if_else(
            Expr::name("flag"),
            vec![Expr::ret(Expr::i32(1))],
            vec![Expr::ret(Expr::i32(2))],
        ));
    let program = int_main(vec![Expr::ret(call(
        "plus",
        vec![call("pick", vec![Expr::bool(true)]), call("pick", vec![Expr::bool(false)])],
    ))])
    .with_definition(pick);
    assert_eq!(run(&program, &[]).as_i32(), Some(3));
}

#[test]
fn test_inferred_return_kind() {
    let program = Program::new()
        .with_definition(
            Definition::new("/main")
                .returns("i64")
                .with_statement(Expr::ret(call("big", vec![]))),
        )
        .with_definition(Definition::new("/big").with_statement(Expr::ret(Expr::i64(1 << 40))));
    assert_eq!(run(&program, &[]).as_i64(), Some(1 << 40));
}

#[test]
fn test_method_call_on_primitive() {
    let program = int_main(vec![Expr::ret(Expr::method(Expr::i32(4), "twice", vec![]))]).with_definition(
        Definition::new("/i32/twice")
            .returns("int")
            .with_parameter(Expr::param("self", &["i32"]))
            .with_statement(Expr::ret(call("multiply", vec![Expr::name("self"), Expr::i32(2)]))),
    );
    assert_eq!(run(&program, &[]).as_i32(), Some(8));
}

#[test]
fn test_struct_constructor_lowers_to_placeholder() {
    let point = Definition::new("/Point")
        .with_transform("struct")
        .with_statement(Expr::binding("x", &["i32"], Expr::i32(1)));
    let program = int_main(vec![
        Expr::binding("p", &[], call("Point", vec![])),
        Expr::ret(Expr::i32(0)),
    ])
    .with_definition(point);
    assert_eq!(run(&program, &[]).as_i32(), Some(0));
}

#[test]
fn test_recursion_rejected() {
    let program = int_main(vec![Expr::ret(call("spin", vec![Expr::i32(1)]))]).with_definition(
        Definition::new("/spin")
            .returns("int")
            .with_parameter(Expr::param("n", &["i32"]))
            .with_statement(Expr::ret(call("spin", vec![Expr::name("n")]))),
    );
    let err = compile(&program).unwrap_err();
    assert_eq!(err.to_string(), "native backend does not support recursive calls: /spin");
    assert_eq!(err.category(), ErrorCategory::Lowering);
}

#[test]
fn test_recursion_through_method_rejected() {
    let program = int_main(vec![Expr::ret(Expr::method(Expr::i32(1), "again", vec![]))]).with_definition(
        Definition::new("/i32/again")
            .returns("int")
            .with_parameter(Expr::param("self", &["i32"]))
            .with_statement(Expr::ret(Expr::method(Expr::name("self"), "again", vec![]))),
    );
    assert_eq!(
        compile(&program).unwrap_err().to_string(),
        "native backend does not support recursive calls: /i32/again"
    );
}

#[test]
fn test_void_call_in_value_position_rejected() {
    let program = int_main(vec![Expr::ret(call("noop", vec![]))])
        .with_definition(Definition::new("/noop").with_statement(Expr::ret_void()));
    assert_eq!(
        compile_unvalidated(&program).unwrap_err().to_string(),
        "void call not allowed in expression context: /noop"
    );
}

#[test]
fn test_block_arguments_on_user_call_rejected_by_lowerer() {
    let program = int_main(vec![
        Expr::block_call("helper", vec![], vec![Expr::i32(1)]),
        Expr::ret(Expr::i32(0)),
    ])
    .with_definition(Definition::new("/helper").with_statement(Expr::ret_void()));
    assert_eq!(
        compile_unvalidated(&program).unwrap_err().to_string(),
        "native backend does not support block arguments on calls"
    );
}

#[test]
fn test_heap_builtins_rejected_by_lowerer() {
    let program = Program::new().with_definition(
        Definition::new("/main")
            .with_effects(&["heap_alloc"])
            .with_statement(Expr::binding(
                "v",
                &["mut"],
                Expr::call_template("vector", &["i32"], vec![Expr::i32(1)]),
            ))
            .with_statement(call("push", vec![Expr::name("v"), Expr::i32(2)])),
    );
    assert_eq!(
        compile(&program).unwrap_err().to_string(),
        "native backend does not support heap allocation: push"
    );
}

// =============================================================================
// LOOPS AND STEPS
// =============================================================================

#[test]
fn test_while_sums_countdown() {
    let program = int_main(vec![
        Expr::binding("n", &["i32", "mut"], Expr::i32(5)),
        Expr::binding("total", &["i32", "mut"], Expr::i32(0)),
        Expr::while_loop(
            call("greater_than", vec![Expr::name("n"), Expr::i32(0)]),
            vec![
                Expr::assign(Expr::name("total"), call("plus", vec![Expr::name("total"), Expr::name("n")])),
                call("decrement", vec![Expr::name("n")]),
            ],
        ),
        Expr::ret(Expr::name("total")),
    ]);
    let module = compile(&program).unwrap();
    let seen = ops(&module);
    assert!(seen.contains(&IrOpcode::Jump));
    assert!(seen.contains(&IrOpcode::JumpIfZero));
    assert_eq!(Vm::new(&module).run(&[]).unwrap().as_i32(), Some(15));
}

#[test]
fn test_for_with_binding_condition() {
    let program = int_main(vec![
        Expr::binding("sum", &["i32", "mut"], Expr::i32(0)),
        Expr::for_loop(
            Expr::binding("i", &["i32", "mut"], Expr::i32(0)),
            Expr::binding("keep", &["bool"], call("less_than", vec![Expr::name("i"), Expr::i32(4)])),
            call("increment", vec![Expr::name("i")]),
            vec![Expr::assign(Expr::name("sum"), call("plus", vec![Expr::name("sum"), Expr::name("i")]))],
        ),
        Expr::ret(Expr::name("sum")),
    ]);
    assert_eq!(run(&program, &[]).as_i32(), Some(6));
}

#[test]
fn test_loop_runs_count_times() {
    let program = int_main(vec![
        Expr::binding("hits", &["i64", "mut"], Expr::i64(0)),
        Expr::block_call("loop", vec![Expr::i32(3)], vec![call("increment", vec![Expr::name("hits")])]),
        Expr::ret(Expr::call_template("convert", &["i32"], vec![Expr::name("hits")])),
    ]);
    assert_eq!(run(&program, &[]).as_i32(), Some(3));
}

#[test]
fn test_negative_loop_count_exits_with_3() {
    let program = int_main(vec![
        Expr::binding("n", &["i32"], call("negate", vec![Expr::i32(2)])),
        Expr::block_call("loop", vec![Expr::name("n")], vec![call("print_line", vec![Expr::i32(1)])]),
        Expr::ret(Expr::i32(0)),
    ]);
    let out = run(&program, &[]);
    assert_eq!(out.as_i32(), Some(3));
    assert_eq!(out.stderr, "loop count must be non-negative\n");
    assert_eq!(out.stdout, "");
}

#[test]
fn test_steps_through_references_and_pointers() {
    let program = int_main(vec![
        Expr::binding("value", &["i32", "mut"], Expr::i32(1)),
        Expr::binding("r", &["Reference<i32>", "mut"], call("location", vec![Expr::name("value")])),
        call("increment", vec![Expr::name("r")]),
        Expr::binding("ptr", &["Pointer<i32>"], call("location", vec![Expr::name("value")])),
        call("increment", vec![call("dereference", vec![Expr::name("ptr")])]),
        Expr::ret(call("increment", vec![Expr::name("value")])),
    ]);
    assert_eq!(run(&program, &[]).as_i32(), Some(4));

    let program = int_main(vec![
        Expr::binding("x", &["f64", "mut"], Expr::f64(1.5)),
        call("decrement", vec![Expr::name("x")]),
        Expr::ret(Expr::call_template(
            "convert",
            &["i32"],
            vec![call("multiply", vec![Expr::name("x"), Expr::f64(10.0)])],
        )),
    ]);
    assert_eq!(run(&program, &[]).as_i32(), Some(5));
}

// =============================================================================
// COLLECTIONS AND STRINGS
// =============================================================================

fn heap_main(returns: &str, stmts: Vec<Expr>) -> Program {
    Program::new().with_definition(
        Definition::new("/main")
            .returns(returns)
            .with_effects(&["heap_alloc", "io_err"])
            .with_statements(stmts),
    )
}

fn numbers() -> Expr {
    Expr::binding(
        "values",
        &[],
        Expr::call_template("array", &["i32"], vec![Expr::i32(10), Expr::i32(20), Expr::i32(30)]),
    )
}

#[test]
fn test_array_count_and_at() {
    let program = int_main(vec![
        numbers(),
        Expr::ret(call(
            "plus",
            vec![
                call("at", vec![Expr::name("values"), Expr::i32(2)]),
                call("count", vec![Expr::name("values")]),
            ],
        )),
    ]);
    let module = compile(&program).unwrap();
    let seen = ops(&module);
    assert!(seen.contains(&IrOpcode::AddressOfLocal));
    assert!(seen.contains(&IrOpcode::LoadIndirect));
    assert_eq!(Vm::new(&module).run(&[]).unwrap().as_i32(), Some(33));

    let unchecked = int_main(vec![
        numbers(),
        Expr::ret(call("at_unsafe", vec![Expr::name("values"), Expr::i32(0)])),
    ]);
    assert_eq!(run(&unchecked, &[]).as_i32(), Some(10));
}

#[test]
fn test_array_index_out_of_bounds_exits_with_3() {
    for index in [3, -1] {
        let program = int_main(vec![
            numbers(),
            Expr::ret(call("at", vec![Expr::name("values"), Expr::i32(index)])),
        ]);
        let out = run(&program, &[]);
        assert_eq!(out.as_i32(), Some(3));
        assert_eq!(out.stderr, "array index out of bounds\n");
    }
}

#[test]
fn test_vector_skips_capacity_header() {
    let program = heap_main(
        "i64",
        vec![
            Expr::binding(
                "grow",
                &["vector<i64>"],
                Expr::call_template("vector", &["i64"], vec![Expr::i64(7), Expr::i64(8)]),
            ),
            Expr::ret(call(
                "plus",
                vec![
                    call("at", vec![Expr::name("grow"), Expr::i32(1)]),
                    call("count", vec![Expr::name("grow")]),
                ],
            )),
        ],
    );
    assert_eq!(run(&program, &[]).as_i64(), Some(10));
}

#[test]
fn test_map_parameter_lookup() {
    let lookup = Definition::new("/lookup")
        .returns("int")
        .with_parameter(Expr::param("m", &["map<i32, i32>"]))
        .with_parameter(Expr::param("key", &["i32"]))
        .with_statement(Expr::ret(call("at", vec![Expr::name("m"), Expr::name("key")])));
    let program = |key: i32| {
        heap_main(
            "int",
            vec![Expr::ret(call(
                "lookup",
                vec![
                    Expr::call_template(
                        "map",
                        &["i32", "i32"],
                        vec![Expr::i32(1), Expr::i32(2), Expr::i32(3), Expr::i32(4)],
                    ),
                    Expr::i32(key),
                ],
            ))],
        )
        .with_definition(lookup.clone())
    };
    assert_eq!(run(&program(1), &[]).as_i32(), Some(2));
    assert_eq!(run(&program(3), &[]).as_i32(), Some(4));

    let out = run(&program(5), &[]);
    assert_eq!(out.as_i32(), Some(3));
    assert_eq!(out.stderr, "map key not found\n");
}

#[test]
fn test_map_binding_lookup() {
    let program = heap_main(
        "i64",
        vec![
            Expr::binding(
                "table",
                &["map<i32, i64>"],
                Expr::call_template(
                    "map",
                    &["i32", "i64"],
                    vec![Expr::i32(1), Expr::i64(10), Expr::i32(2), Expr::i64(20)],
                ),
            ),
            Expr::ret(call(
                "plus",
                vec![
                    call("at_unsafe", vec![Expr::name("table"), Expr::i32(2)]),
                    call("count", vec![Expr::name("table")]),
                ],
            )),
        ],
    );
    assert_eq!(run(&program, &[]).as_i64(), Some(22));
}

#[test]
fn test_string_count_and_bytes() {
    let program = int_main(vec![
        Expr::binding("word", &["string"], Expr::string("hey")),
        Expr::ret(call(
            "plus",
            vec![
                call("count", vec![Expr::name("word")]),
                call("at", vec![Expr::name("word"), Expr::i32(1)]),
            ],
        )),
    ]);
    let module = compile(&program).unwrap();
    assert!(ops(&module).contains(&IrOpcode::LoadStringByte));
    assert_eq!(Vm::new(&module).run(&[]).unwrap().as_i32(), Some(3 + b'e' as i32));

    let past_end = int_main(vec![
        Expr::binding("word", &["string"], Expr::string("hey")),
        Expr::ret(call("at", vec![Expr::name("word"), Expr::i32(3)])),
    ]);
    let out = run(&past_end, &[]);
    assert_eq!(out.as_i32(), Some(3));
    assert_eq!(out.stderr, "string index out of bounds\n");
}

// =============================================================================
// MATH SEQUENCES
// =============================================================================

fn f64_result(expr: Expr) -> f64 {
    let program =
        Program::new().with_definition(Definition::new("/main").returns("f64").with_statement(Expr::ret(expr)));
    run(&program, &[]).as_f64().expect("f64 result")
}

#[test]
fn test_rounding_family() {
    let cases = [
        ("floor", 2.5, 2.0),
        ("floor", -2.5, -3.0),
        ("ceil", 2.1, 3.0),
        ("ceil", -2.1, -2.0),
        ("round", 2.5, 3.0),
        ("round", -2.5, -3.0),
        ("trunc", -2.7, -2.0),
        ("fract", 2.25, 0.25),
    ];
    for (name, input, expected) in cases {
        assert_eq!(f64_result(call(name, vec![Expr::f64(input)])), expected, "{}({})", name, input);
    }

    let program = int_main(vec![Expr::ret(call(
        "plus",
        vec![call("floor", vec![Expr::i32(7)]), call("fract", vec![Expr::i32(7)])],
    ))]);
    assert_eq!(run(&program, &[]).as_i32(), Some(7));
}

#[test]
fn test_roots_and_series_approximate_host() {
    let close = |name: &str, args: Vec<Expr>, expected: f64, tolerance: f64| {
        let got = f64_result(call(name, args));
        assert!((got - expected).abs() < tolerance, "{}: got {}, expected {}", name, got, expected);
    };
    close("sqrt", vec![Expr::f64(16.0)], 4.0, 1e-9);
    close("sqrt", vec![Expr::f64(2.0)], std::f64::consts::SQRT_2, 1e-9);
    close("sqrt", vec![Expr::f64(0.0)], 0.0, 1e-12);
    close("cbrt", vec![Expr::f64(27.0)], 3.0, 1e-6);
    close("exp", vec![Expr::f64(1.0)], std::f64::consts::E, 1e-6);
    close("log", vec![Expr::f64(2.0)], std::f64::consts::LN_2, 1e-4);
    close("pow", vec![Expr::f64(2.0), Expr::f64(3.0)], 8.0, 1e-3);
    close("pow", vec![Expr::f64(0.0), Expr::f64(0.0)], 1.0, 1e-12);
    close("sin", vec![Expr::f64(std::f64::consts::FRAC_PI_6)], 0.5, 1e-4);
    close("sin", vec![Expr::f64(7.0)], 7.0f64.sin(), 1e-4);
    close("cos", vec![Expr::f64(std::f64::consts::PI)], -1.0, 1e-4);
    close("cos", vec![Expr::f64(0.0)], 1.0, 1e-9);
    close("tan", vec![Expr::f64(std::f64::consts::FRAC_PI_4)], 1.0, 1e-3);

    assert!(f64_result(call("sqrt", vec![Expr::f64(-1.0)])).is_nan());
    assert!(f64_result(call("log", vec![Expr::f64(-1.0)])).is_nan());
}

#[test]
fn test_integer_pow() {
    let program = int_main(vec![Expr::ret(call("pow", vec![Expr::i32(3), Expr::i32(4)]))]);
    assert_eq!(run(&program, &[]).as_i32(), Some(81));

    let program = int_main(vec![Expr::ret(call("pow", vec![Expr::i32(2), Expr::i32(-1)]))]);
    let out = run(&program, &[]);
    assert_eq!(out.as_i32(), Some(3));
    assert_eq!(out.stderr, "pow exponent must be non-negative\n");
}

// =============================================================================
// OUTPUT AND ENTRY ARGUMENTS
// =============================================================================

#[test]
fn test_print_integer_and_string_binding() {
    let program = Program::new().with_definition(
        Definition::new("/main")
            .with_statement(Expr::binding("greeting", &["string"], Expr::string("hi")))
            .with_statement(call("print", vec![Expr::name("greeting")]))
            .with_statement(call("print_line", vec![call("plus", vec![Expr::i32(1), Expr::i32(2)])]))
            .with_statement(call("print_line_error", vec![Expr::u64(9)])),
    );
    let out = run(&program, &[]);
    assert_eq!(out.stdout, "hi3\n");
    assert_eq!(out.stderr, "9\n");
}

#[test]
fn test_checked_argv_print() {
    let program = args_main(vec![call(
        "print_line",
        vec![call("at", vec![Expr::name("args"), Expr::i32(1)])],
    )]);
    let module = compile(&program).unwrap();
    assert!(ops(&module).contains(&IrOpcode::PrintArgv));
    assert!(module.string_table.contains(&"array index out of bounds".to_string()));

    let out = Vm::new(&module)
        .run(&["prog".to_string(), "hello".to_string()])
        .unwrap();
    assert_eq!(out.stdout, "hello\n");
    assert_eq!(out.return_value, None);
}

#[test]
fn test_argv_bounds_failure_returns_3() {
    let program = args_main(vec![call(
        "print_line",
        vec![call("at", vec![Expr::name("args"), Expr::i32(1)])],
    )]);
    let out = run(&program, &["prog"]);
    assert_eq!(out.as_i32(), Some(3));
    assert_eq!(out.stderr, "array index out of bounds\n");
    assert_eq!(out.stdout, "");

    let negative = args_main(vec![call(
        "print_line",
        vec![call("at", vec![Expr::name("args"), Expr::i32(-1)])],
    )]);
    assert_eq!(run(&negative, &["prog"]).as_i32(), Some(3));
}

#[test]
fn test_unsafe_argv_binding_prints_unchecked() {
    let program = args_main(vec![
        Expr::binding("name", &["string"], call("at_unsafe", vec![Expr::name("args"), Expr::i32(1)])),
        call("print_line", vec![Expr::name("name")]),
    ]);
    let module = compile(&program).unwrap();
    let seen = ops(&module);
    assert!(seen.contains(&IrOpcode::PrintArgvUnsafe));
    assert!(!seen.contains(&IrOpcode::PrintArgv));
    assert!(module.string_table.is_empty());

    let out = Vm::new(&module).run(&["prog".to_string(), "x".to_string()]).unwrap();
    assert_eq!(out.stdout, "x\n");
}

#[test]
fn test_string_parameter_from_literal() {
    let program = Program::new()
        .with_definition(Definition::new("/main").with_statement(call("say", vec![Expr::string("yo")])))
        .with_definition(
            Definition::new("/say")
                .with_parameter(Expr::param("text", &["string"]))
                .with_statement(call("print_line", vec![Expr::name("text")])),
        );
    assert_eq!(run(&program, &[]).stdout, "yo\n");
}

#[test]
fn test_callee_effects_are_enforced_while_inlining() {
    let program = Program::new()
        .with_definition(Definition::new("/main").with_statement(call("quiet", vec![])))
        .with_definition(
            Definition::new("/quiet")
                .with_effects(&[])
                .with_statement(call("print_line", vec![Expr::string("no")])),
        );
    assert_eq!(
        compile_unvalidated(&program).unwrap_err().to_string(),
        "print_line requires io_out effect"
    );
}

#[test]
fn test_compile_json_entry_point() {
    let json = int_main(vec![Expr::ret(Expr::i32(11))]).to_json().unwrap();
    let result = Compiler::new(CompileOptions::default()).compile_json(&json).unwrap();
    assert_eq!(result.instruction_count, 2);
    assert_eq!(Vm::new(&result.module).run(&[]).unwrap().as_i32(), Some(11));
}
