//! Semantics validator integration tests
//!
//! Programs are built with the AST helpers or decoded from JSON and checked
//! through the public `validate` entry point.

use primec::parser::{Definition, Execution, Expr, Program};
use primec::{validate, CompileOptions, Compiler, ErrorCategory, SemanticsValidator, Vm};

const DEFAULTS: [&str; 2] = ["io_out", "io_err"];

fn check(program: &Program) -> primec::Result<()> {
    validate(program, "/main", &DEFAULTS, &DEFAULTS)
}

fn error_of(program: &Program) -> (ErrorCategory, String) {
    let err = check(program).expect_err("program should be rejected");
    (err.category(), err.to_string())
}

fn int_main(stmts: Vec<Expr>) -> Program {
    Program::new().with_definition(Definition::new("/main").returns("int").with_statements(stmts))
}

fn call(name: &str, args: Vec<Expr>) -> Expr {
    Expr::call(name, args)
}

fn square() -> Definition {
    Definition::new("/square")
        .returns("int")
        .with_parameter(Expr::param("x", &["i32"]))
        .with_statement(Expr::ret(call("multiply", vec![Expr::name("x"), Expr::name("x")])))
}

// =============================================================================
// JSON INPUT
// =============================================================================

#[test]
fn test_hand_written_json_program() {
    let json = r#"{
        "definitions": [{
            "full_path": "/main",
            "transforms": [{"name": "return", "template_args": ["int"]}],
            "statements": [{
                "kind": {"Call": {
                    "name": "return",
                    "args": [{"kind": {"Literal": {"Int": {"value": 5, "width": "I32"}}}}]
                }}
            }]
        }]
    }"#;
    let program = Program::from_json(json).unwrap();
    assert!(check(&program).is_ok());

    let result = Compiler::new(CompileOptions::default()).compile_json(json).unwrap();
    assert_eq!(Vm::new(&result.module).run(&[]).unwrap().as_i32(), Some(5));
}

#[test]
fn test_malformed_json_is_input_error() {
    let err = Program::from_json(r#"{"definitions": [{"transforms": []}]}"#).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Input);
}

// =============================================================================
// SCOPE AND IMPORTS
// =============================================================================

#[test]
fn test_import_aliases_namespace_children() {
    let program = int_main(vec![Expr::ret(call("double", vec![Expr::i32(21)]))])
        .with_import("/util")
        .with_definition(
            Definition::new("/util/double")
                .returns("int")
                .with_parameter(Expr::param("n", &["i32"]))
                .with_statement(Expr::ret(call("plus", vec![Expr::name("n"), Expr::name("n")]))),
        );
    assert!(check(&program).is_ok());

    let module = Compiler::new(CompileOptions::default()).compile(&program).unwrap().module;
    assert_eq!(Vm::new(&module).run(&[]).unwrap().as_i32(), Some(42));
}

#[test]
fn test_import_errors() {
    let program = int_main(vec![Expr::ret(Expr::i32(0))]).with_import("/nowhere");
    assert_eq!(
        error_of(&program),
        (ErrorCategory::Structural, "unknown import path: /nowhere".to_string())
    );

    let program = int_main(vec![Expr::ret(Expr::i32(0))])
        .with_import("/util")
        .with_definition(square())
        .with_definition(
            Definition::new("/util/square")
                .returns("int")
                .with_statement(Expr::ret(Expr::i32(1))),
        );
    assert_eq!(
        error_of(&program),
        (ErrorCategory::Structural, "import creates name conflict: square".to_string())
    );
}

#[test]
fn test_import_conflict_when_namespace_declared_first() {
    let program = Program::new()
        .with_import("/util")
        .with_definition(
            Definition::new("/util/square")
                .returns("int")
                .with_statement(Expr::ret(Expr::i32(1))),
        )
        .with_definition(square())
        .with_definition(Definition::new("/main").returns("int").with_statement(Expr::ret(Expr::i32(0))));
    assert_eq!(
        error_of(&program),
        (ErrorCategory::Structural, "import creates name conflict: square".to_string())
    );
}

#[test]
fn test_relative_names_search_enclosing_namespaces() {
    let program = int_main(vec![Expr::ret(call("/math/outer", vec![]))])
        .with_definition(
            Definition::new("/math/outer")
                .returns("int")
                .with_statement(Expr::ret(call("inner", vec![]))),
        )
        .with_definition(
            Definition::new("/math/inner")
                .returns("int")
                .with_statement(Expr::ret(Expr::i32(12))),
        );
    assert!(check(&program).is_ok());

    let module = Compiler::new(CompileOptions::default()).compile(&program).unwrap().module;
    assert_eq!(Vm::new(&module).run(&[]).unwrap().as_i32(), Some(12));

    // `inner` is not visible from the root namespace.
    let program = int_main(vec![Expr::ret(call("inner", vec![]))]).with_definition(
        Definition::new("/math/inner")
            .returns("int")
            .with_statement(Expr::ret(Expr::i32(12))),
    );
    assert_eq!(
        error_of(&program),
        (ErrorCategory::Structural, "unknown call target: inner".to_string())
    );
}

#[test]
fn test_duplicate_definitions_and_bindings() {
    let program = int_main(vec![Expr::ret(Expr::i32(0))])
        .with_definition(square())
        .with_definition(square());
    assert_eq!(error_of(&program).1, "duplicate definition: /square");

    let program = int_main(vec![
        Expr::binding("x", &["i32"], Expr::i32(1)),
        Expr::binding("x", &["i32"], Expr::i32(2)),
        Expr::ret(Expr::name("x")),
    ]);
    assert_eq!(
        error_of(&program),
        (ErrorCategory::Structural, "duplicate binding name: x".to_string())
    );
}

#[test]
fn test_unknown_identifier() {
    let program = int_main(vec![Expr::ret(Expr::name("ghost"))]);
    assert_eq!(
        error_of(&program),
        (ErrorCategory::Type, "unknown identifier: ghost".to_string())
    );
}

#[test]
fn test_unresolved_method() {
    let program = int_main(vec![Expr::ret(Expr::method(Expr::i32(1), "nope", vec![]))]);
    assert_eq!(error_of(&program).1, "unknown call target: nope");
}

// =============================================================================
// CALL SHAPE
// =============================================================================

#[test]
fn test_argument_count_and_types() {
    let program = int_main(vec![Expr::ret(call("square", vec![]))]).with_definition(square());
    assert_eq!(
        error_of(&program),
        (ErrorCategory::CallShape, "argument count mismatch for /square".to_string())
    );

    let program = int_main(vec![Expr::ret(call("square", vec![Expr::bool(true)]))]).with_definition(square());
    assert_eq!(
        error_of(&program),
        (ErrorCategory::Type, "argument type mismatch for /square parameter x".to_string())
    );

    let program = int_main(vec![Expr::ret(Expr::call_named(
        "square",
        vec![(Some("x"), Expr::i32(1)), (Some("x"), Expr::i32(2))],
    ))])
    .with_definition(square());
    assert_eq!(error_of(&program).1, "duplicate named argument: x");
}

#[test]
fn test_builtin_arity() {
    let program = int_main(vec![Expr::ret(call("plus", vec![Expr::i32(1)]))]);
    assert_eq!(
        error_of(&program),
        (ErrorCategory::CallShape, "argument count mismatch for builtin plus".to_string())
    );
}

#[test]
fn test_void_call_in_value_position() {
    let program = int_main(vec![Expr::ret(call("noop", vec![]))])
        .with_definition(Definition::new("/noop").with_statement(Expr::ret_void()));
    assert_eq!(
        error_of(&program).1,
        "void call not allowed in expression context: /noop"
    );
}

// =============================================================================
// TYPES
// =============================================================================

#[test]
fn test_return_type_mismatch() {
    let program = int_main(vec![Expr::ret(Expr::bool(true))]);
    assert_eq!(error_of(&program).1, "return type mismatch in /main");

    let program = Program::new().with_definition(
        Definition::new("/main").with_statement(Expr::ret(Expr::i32(1))),
    );
    // No return transform: the value return makes `/main` infer `i32`.
    assert!(check(&program).is_ok());
}

#[test]
fn test_pointer_rules() {
    let program = int_main(vec![
        Expr::binding("x", &["i32"], Expr::i32(1)),
        Expr::binding("p", &["Pointer<i32>"], Expr::name("x")),
        Expr::ret(Expr::i32(0)),
    ]);
    assert_eq!(error_of(&program).1, "binding initializer type mismatch: p");

    let program = int_main(vec![
        Expr::binding("x", &["i32"], Expr::i32(1)),
        Expr::ret(call("dereference", vec![Expr::name("x")])),
    ]);
    assert_eq!(error_of(&program).1, "dereference requires a pointer or reference");

    let program = int_main(vec![
        Expr::binding("x", &["i32"], Expr::i32(1)),
        Expr::binding(
            "p",
            &[],
            call(
                "plus",
                vec![
                    call("location", vec![Expr::name("x")]),
                    call("location", vec![Expr::name("x")]),
                ],
            ),
        ),
        Expr::ret(Expr::i32(0)),
    ]);
    assert_eq!(
        error_of(&program),
        (ErrorCategory::Type, "pointer arithmetic does not support pointer + pointer".to_string())
    );

    let program = int_main(vec![
        Expr::binding("x", &["i32"], Expr::i32(1)),
        call("print_line", vec![call("location", vec![Expr::name("x")])]),
        Expr::ret(Expr::i32(0)),
    ]);
    assert_eq!(error_of(&program).1, "print_line does not support pointer values");
}

#[test]
fn test_repeat_and_argument_builtins() {
    let program = int_main(vec![
        Expr::repeat(Expr::string("many"), vec![]),
        Expr::ret(Expr::i32(0)),
    ]);
    assert_eq!(error_of(&program).1, "repeat count requires integer or bool");

    let program = int_main(vec![
        Expr::binding("x", &["i32"], Expr::i32(1)),
        Expr::ret(call("count", vec![Expr::name("x")])),
    ]);
    assert_eq!(error_of(&program).1, "count requires an array argument");

    let program = Program::new().with_definition(
        Definition::new("/main")
            .with_parameter(Expr::param("args", &["array<string>"]))
            .with_statement(call(
                "print_line",
                vec![call("at", vec![Expr::name("args"), Expr::bool(true)])],
            )),
    );
    assert_eq!(error_of(&program).1, "at index requires an integer");
}

#[test]
fn test_struct_bodies_only_hold_fields() {
    let program = int_main(vec![Expr::ret(Expr::i32(0))]).with_definition(
        Definition::new("/Point")
            .with_transform("struct")
            .with_statement(call("print_line", vec![Expr::string("no")])),
    );
    assert_eq!(
        error_of(&program),
        (
            ErrorCategory::Structural,
            "struct definitions may only contain field bindings: /Point".to_string()
        )
    );
}

#[test]
fn test_struct_typed_binding() {
    let program = int_main(vec![
        Expr::binding("p", &["Point"], call("Point", vec![])),
        Expr::ret(Expr::i32(0)),
    ])
    .with_definition(
        Definition::new("/Point")
            .with_transform("struct")
            .with_statement(Expr::binding("x", &["i32"], Expr::i32(0))),
    );
    assert!(check(&program).is_ok());
}

// =============================================================================
// EFFECTS
// =============================================================================

#[test]
fn test_entry_and_definition_defaults_differ() {
    let program = Program::new()
        .with_definition(
            Definition::new("/main")
                .with_statement(call("print_line", vec![Expr::string("main")]))
                .with_statement(call("helper", vec![])),
        )
        .with_definition(
            Definition::new("/helper").with_statement(call("print_line", vec![Expr::string("helper")])),
        );
    let none: [&str; 0] = [];
    let err = validate(&program, "/main", &none, &["io_out"]).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Effect);
    assert_eq!(err.to_string(), "print_line requires io_out effect");

    assert!(validate(&program, "/main", &["io_out"], &["io_out"]).is_ok());
}

#[test]
fn test_nested_effects_may_only_narrow() {
    let program = Program::new().with_definition(
        Definition::new("/main")
            .with_effects(&["io_out", "io_err"])
            .with_statement(call("print_line", vec![Expr::string("ok")]).with_effects(&["io_out"])),
    );
    assert!(check(&program).is_ok());

    let program = Program::new().with_definition(
        Definition::new("/main")
            .with_effects(&["io_out"])
            .with_statement(call("print_line_error", vec![Expr::string("no")]).with_effects(&["io_out"])),
    );
    assert_eq!(error_of(&program).1, "print_line_error requires io_err effect");
}

#[test]
fn test_binding_effects_must_narrow() {
    let program = Program::new().with_definition(
        Definition::new("/main")
            .returns("int")
            .with_effects(&["io_out"])
            .with_statement(
                Expr::binding("x", &["i32"], Expr::i32(1)).with_effects(&["heap_alloc"]),
            )
            .with_statement(Expr::ret(Expr::name("x"))),
    );
    let (category, message) = error_of(&program);
    assert_eq!(category, ErrorCategory::Effect);
    assert!(
        message.starts_with("execution effects must be a subset of enclosing effects"),
        "{}",
        message
    );

    // A narrowing annotation on a binding still gates its initializer.
    let program = Program::new().with_definition(
        Definition::new("/main")
            .returns("int")
            .with_effects(&["io_out", "heap_alloc"])
            .with_statement(
                Expr::binding("v", &[], Expr::call_template("vector", &["i32"], vec![Expr::i32(1)]))
                    .with_effects(&["io_out"]),
            )
            .with_statement(Expr::ret(Expr::i32(0))),
    );
    assert_eq!(error_of(&program).1, "vector requires heap_alloc effect");
}

#[test]
fn test_malformed_default_effects() {
    let program = int_main(vec![Expr::ret(Expr::i32(0))]);
    assert!(SemanticsValidator::new(&program, "/main", &["io_out", "io_out"], &DEFAULTS).is_err());
    let err = validate(&program, "/main", &["mind_control"], &DEFAULTS).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Effect);
}

#[test]
fn test_execution_arguments_are_matched() {
    let task = Definition::new("/task")
        .with_parameter(Expr::param("n", &["i32"]))
        .with_statement(Expr::ret_void());

    let program = int_main(vec![Expr::ret(Expr::i32(0))])
        .with_definition(task.clone())
        .with_execution(Execution::new("/task", vec![]));
    assert_eq!(
        error_of(&program),
        (ErrorCategory::CallShape, "argument count mismatch for /task".to_string())
    );

    let program = int_main(vec![Expr::ret(Expr::i32(0))])
        .with_definition(task)
        .with_execution(
            Execution::new("/task", vec![Expr::i32(1)])
                .with_body(vec![call("print_line", vec![Expr::string("x")])])
                .with_effects(&["io_err"]),
        );
    assert_eq!(error_of(&program).1, "print_line requires io_out effect");
}

// =============================================================================
// TEMPLATES
// =============================================================================

#[test]
fn test_templated_bodies_are_checked() {
    let identity = Definition::new("/identity")
        .with_template("T")
        .returns("T")
        .with_parameter(Expr::param("value", &["T"]))
        .with_statement(Expr::ret(call("plus", vec![Expr::name("value"), Expr::name("value")])));
    let program = int_main(vec![Expr::ret(Expr::i32(0))]).with_definition(identity);
    assert!(check(&program).is_ok());

    let broken = Definition::new("/broken")
        .with_template("T")
        .returns("T")
        .with_parameter(Expr::param("value", &["T"]))
        .with_statement(Expr::ret(Expr::name("missing")));
    let program = int_main(vec![Expr::ret(Expr::i32(0))]).with_definition(broken);
    assert_eq!(error_of(&program).1, "unknown identifier: missing");

    let unfinished = Definition::new("/unfinished")
        .with_template("T")
        .returns("T")
        .with_parameter(Expr::param("value", &["T"]))
        .with_statement(Expr::if_else(
            Expr::bool(true),
            vec![Expr::ret(Expr::name("value"))],
            vec![],
        ));
    let program = int_main(vec![Expr::ret(Expr::i32(0))]).with_definition(unfinished);
    assert_eq!(error_of(&program).1, "not all control paths return in /unfinished");
}

// =============================================================================
// LOOPS AND COLLECTIONS
// =============================================================================

#[test]
fn test_loop_conditions_and_counts() {
    let program = int_main(vec![
        Expr::while_loop(Expr::i32(1), vec![]),
        Expr::ret(Expr::i32(0)),
    ]);
    assert_eq!(error_of(&program).1, "while condition requires bool");

    let program = int_main(vec![
        Expr::block_call("loop", vec![Expr::bool(true)], vec![]),
        Expr::ret(Expr::i32(0)),
    ]);
    assert_eq!(error_of(&program).1, "loop count requires integer");

    let program = int_main(vec![
        Expr::for_loop(
            Expr::binding("i", &["i32", "mut"], Expr::i32(0)),
            Expr::name("i"),
            call("increment", vec![Expr::name("i")]),
            vec![],
        ),
        Expr::ret(Expr::i32(0)),
    ]);
    assert_eq!(error_of(&program).1, "for condition requires bool");

    let program = int_main(vec![
        Expr::while_loop(Expr::bool(false), vec![]),
        Expr::ret(Expr::i32(0)),
    ]);
    assert!(check(&program).is_ok());

    let program = int_main(vec![Expr::call("while", vec![Expr::bool(false)]), Expr::ret(Expr::i32(0))]);
    assert_eq!(
        error_of(&program),
        (ErrorCategory::CallShape, "while requires a block".to_string())
    );
}

#[test]
fn test_for_scope_covers_body_and_step_only() {
    let counted = Expr::for_loop(
        Expr::binding("i", &["i32", "mut"], Expr::i32(0)),
        call("less_than", vec![Expr::name("i"), Expr::i32(3)]),
        call("increment", vec![Expr::name("i")]),
        vec![call("print_line", vec![Expr::name("i")])],
    );
    let program = int_main(vec![counted.clone(), Expr::ret(Expr::i32(0))]);
    assert!(check(&program).is_ok());

    let program = int_main(vec![counted, Expr::ret(Expr::name("i"))]);
    assert_eq!(error_of(&program).1, "unknown identifier: i");
}

#[test]
fn test_step_targets() {
    let program = int_main(vec![
        Expr::binding("x", &["i32"], Expr::i32(1)),
        call("increment", vec![Expr::name("x")]),
        Expr::ret(Expr::name("x")),
    ]);
    assert_eq!(error_of(&program).1, "increment target must be mutable: x");

    let program = int_main(vec![
        Expr::binding("flag", &["bool", "mut"], Expr::bool(true)),
        call("decrement", vec![Expr::name("flag")]),
        Expr::ret(Expr::i32(0)),
    ]);
    assert_eq!(error_of(&program).1, "decrement requires numeric operand");
}

#[test]
fn test_collection_literals() {
    let program = int_main(vec![
        Expr::binding(
            "values",
            &[],
            Expr::call_template("array", &["i32"], vec![Expr::i32(1), Expr::f64(2.0)]),
        ),
        Expr::ret(Expr::i32(0)),
    ]);
    assert_eq!(error_of(&program).1, "array literal element type mismatch");

    let program = Program::new().with_definition(
        Definition::new("/main")
            .returns("int")
            .with_effects(&["heap_alloc"])
            .with_statement(Expr::binding(
                "table",
                &[],
                Expr::call_template("map", &["i32", "i32"], vec![Expr::i32(1)]),
            ))
            .with_statement(Expr::ret(Expr::i32(0))),
    );
    assert_eq!(
        error_of(&program),
        (ErrorCategory::CallShape, "map literal requires an even number of arguments".to_string())
    );

    let program = Program::new().with_definition(
        Definition::new("/main")
            .returns("int")
            .with_effects(&["heap_alloc"])
            .with_statement(Expr::binding(
                "table",
                &["map<i32, i64>"],
                Expr::call_template("map", &["i32", "i64"], vec![Expr::i32(1), Expr::i64(2)]),
            ))
            .with_statement(Expr::ret(call("at", vec![Expr::name("table"), Expr::bool(true)]))),
    );
    assert_eq!(error_of(&program).1, "at key type mismatch");

    let program = int_main(vec![
        Expr::binding(
            "values",
            &["array<i64>"],
            Expr::call_template("array", &["f64"], vec![Expr::f64(1.0)]),
        ),
        Expr::ret(Expr::i32(0)),
    ]);
    assert_eq!(error_of(&program).1, "binding initializer type mismatch: values");

    // Arrays need no effect; vectors and maps need heap_alloc.
    let program = int_main(vec![
        Expr::binding("values", &[], Expr::call_template("array", &["i32"], vec![Expr::i32(4)])),
        Expr::ret(call("at", vec![Expr::name("values"), Expr::i32(0)])),
    ]);
    assert!(check(&program).is_ok());
}

#[test]
fn test_map_parameter_checks_argument() {
    let lookup = Definition::new("/lookup")
        .returns("int")
        .with_parameter(Expr::param("m", &["map<i32, i32>"]))
        .with_statement(Expr::ret(call("at", vec![Expr::name("m"), Expr::i32(1)])));
    let program = Program::new()
        .with_definition(
            Definition::new("/main")
                .returns("int")
                .with_effects(&["heap_alloc"])
                .with_statement(Expr::ret(call(
                    "lookup",
                    vec![Expr::call_template("vector", &["i32"], vec![Expr::i32(1)])],
                ))),
        )
        .with_definition(lookup);
    assert_eq!(error_of(&program).1, "argument type mismatch for /lookup parameter m");
}
