//! End-to-end embedding tests: compile scripts through the full pipeline
//! and observe them running in a thread.

use std::cell::RefCell;
use std::rc::Rc;

use tiny::{CompileError, State, Value};

fn run(state: &State) -> tiny::Thread<'_> {
    let mut thread = state.spawn_thread();
    thread.start();
    thread.run().expect("runtime error");
    thread
}

#[test]
fn test_globals_functions_and_calls() {
    let mut state = State::new();
    state
        .compile_string(
            "main",
            "x := 10\n\
             y := 20\n\
             func add(a: int, b: int): int { return a + b }",
        )
        .expect("compile error");

    let add = state.get_function_index("add").expect("add is defined");
    let mut thread = run(&state);

    let result = thread
        .call_function(add, &[Value::Int(3), Value::Int(4)])
        .expect("call error");
    assert_eq!(result, Value::Int(7));

    let x = state.get_global_index("x").expect("x is a global");
    assert_eq!(thread.get_global(x), Some(Value::Int(10)));
}

#[test]
fn test_equal_string_literals_share_pool_entry() {
    let mut state = State::new();
    state
        .compile_string("main", "s := \"he\"\nt := \"he\"")
        .expect("compile error");

    let thread = run(&state);

    let s = thread
        .get_global(state.get_global_index("s").unwrap())
        .unwrap();
    let t = thread
        .get_global(state.get_global_index("t").unwrap())
        .unwrap();

    assert_eq!(
        thread.string_handle(s),
        thread.string_handle(t),
        "equal literals must be the same pooled string"
    );
}

#[test]
fn test_struct_construction_and_field_access() {
    let mut state = State::new();
    state
        .compile_string(
            "main",
            "struct P { x: int y: int }\n\
             p := new P{1, 2}\n\
             q := p.x + p.y",
        )
        .expect("compile error");

    let thread = run(&state);

    let q = state.get_global_index("q").unwrap();
    assert_eq!(thread.get_global(q), Some(Value::Int(3)));
}

#[test]
fn test_vararg_foreign_receives_tagged_values() {
    let seen: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));
    let seen_in = Rc::clone(&seen);

    let mut state = State::new();
    state
        .bind_function("print(...)", move |_thread: &mut tiny::Thread, args: &[Value]| {
            let mut seen = seen_in.borrow_mut();
            for &arg in args {
                seen.push(match arg {
                    Value::Null => "null",
                    Value::Bool(_) => "bool",
                    Value::Char(_) => "char",
                    Value::Int(_) => "int",
                    Value::Float(_) => "float",
                    Value::Str(_) => "str",
                    Value::LightNative(_) | Value::Native(_) => "native",
                    Value::Struct(_) => "struct",
                });
            }
            Ok(Value::Null)
        })
        .expect("bind error");

    state
        .compile_string("main", "print(1, \"a\", true)")
        .expect("compile error");

    let thread = run(&state);

    assert_eq!(*seen.borrow(), vec!["int", "str", "bool"]);
    assert_eq!(thread.stack_depth(), 0, "call must be stack-neutral");
}

#[test]
fn test_loop_to_one_thousand() {
    let mut state = State::new();
    state
        .compile_string(
            "main",
            "func count(): int {\n\
                 i := 0\n\
                 for i = 0; i < 1000; i = i + 1 { }\n\
                 return i\n\
             }",
        )
        .expect("compile error");

    let count = state.get_function_index("count").unwrap();
    let mut thread = state.spawn_thread();
    thread.start();
    thread.run().expect("runtime error");

    assert_eq!(thread.call_function(count, &[]).unwrap(), Value::Int(1000));
    assert_eq!(thread.frame_depth(), 0);
}

#[test]
fn test_cast_of_non_primitive_is_compile_error() {
    let mut state = State::new();
    let err = state
        .compile_string("main", "x := cast(\"hello\", int)")
        .expect_err("cast of a string must not compile");

    assert!(matches!(err, CompileError::Sem(_)));
    assert!(err.to_string().contains("non-primitive"));
}

#[test]
fn test_single_stepping_with_execute_cycle() {
    let mut state = State::new();
    state
        .compile_string("main", "x := 1\ny := x + 1")
        .expect("compile error");

    let mut thread = state.spawn_thread();
    thread.start();

    let mut cycles = 0;
    while thread.execute_cycle().expect("runtime error") {
        cycles += 1;
        assert!(cycles < 1000, "runaway execution");
    }

    assert!(thread.is_done());
    let y = state.get_global_index("y").unwrap();
    assert_eq!(thread.get_global(y), Some(Value::Int(2)));
}

#[test]
fn test_runtime_error_reported_with_position() {
    let mut state = State::new();
    state
        .compile_string("crash", "x := 1\ny := x / 0")
        .expect("compile error");

    let mut thread = state.spawn_thread();
    thread.start();

    let err = thread.run().expect_err("division by zero must trap");
    assert_eq!(err, tiny::VmError::DivisionByZero);
    assert!(thread.is_done());

    let message = thread.error().expect("error message recorded");
    assert!(message.contains("crash"));
    assert!(message.contains("division by zero"));
}

#[test]
fn test_two_threads_share_one_state() {
    let mut state = State::new();
    state
        .compile_string("main", "x := 7\nfunc get(): int { return x }")
        .expect("compile error");

    let get = state.get_function_index("get").unwrap();

    let mut first = state.spawn_thread();
    let mut second = state.spawn_thread();

    first.start();
    second.start();

    first.run().expect("runtime error");
    second.run().expect("runtime error");

    // Globals are per-thread.
    let x = state.get_global_index("x").unwrap();
    first.set_global(x, Value::Int(100));

    assert_eq!(first.call_function(get, &[]).unwrap(), Value::Int(100));
    assert_eq!(second.call_function(get, &[]).unwrap(), Value::Int(7));
}

#[test]
fn test_imports_and_duplicate_import_error() {
    let mut state = State::new();
    state
        .compile_string("main", "import math\nx := 1")
        .expect("single import compiles");

    let mut bad = State::new();
    let err = bad
        .compile_string("main", "import m\nimport m")
        .expect_err("duplicate import must fail");
    assert!(err.to_string().contains("already imported"));
}

#[test]
fn test_foreign_function_returning_string() {
    let mut state = State::new();
    state
        .bind_function("greeting(): str", |thread: &mut tiny::Thread, _: &[Value]| {
            Ok(thread.new_string("hello from the host"))
        })
        .expect("bind error");

    state
        .compile_string("main", "s := greeting()")
        .expect("compile error");

    let thread = run(&state);

    let s = thread
        .get_global(state.get_global_index("s").unwrap())
        .unwrap();
    assert_eq!(
        thread.string_value(s).as_deref(),
        Some("hello from the host")
    );
}

#[test]
fn test_garbage_collection_keeps_rooted_strings() {
    let mut state = State::new();
    state
        .compile_string(
            "main",
            "keep := \"rooted\"\n\
             struct B { v: int }\n\
             t := new B{0}\n\
             for i := 0; i < 200; i = i + 1 { t = new B{i} }\n\
             check := keep == \"rooted\"",
        )
        .expect("compile error");

    let thread = run(&state);

    let check = state.get_global_index("check").unwrap();
    assert_eq!(thread.get_global(check), Some(Value::Bool(true)));

    let keep = thread
        .get_global(state.get_global_index("keep").unwrap())
        .unwrap();
    assert_eq!(thread.string_value(keep).as_deref(), Some("rooted"));
}

#[test]
fn test_failed_compilation_state_is_discardable() {
    let mut state = State::new();
    let err = state.compile_string("main", "x := (1 + ").unwrap_err();
    assert!(matches!(err, CompileError::Parse(_)));
    // Dropping the state releases everything the failed unit left behind.
    drop(state);
}
