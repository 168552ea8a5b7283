//! Naming of values bound by assignment statements at module level.
//!
//! Each program constructs with `AutoName(2)` where a destructuring is
//! involved, so the value can produce the siblings the pattern asks for.
use std::rc::Rc;

use autoname::{RunError, SENTINEL, Value, Vm, assemble};
use pretty_assertions::assert_eq;

/// Prefix that leaves `AutoName(2)` on the operand stack.
const CONSTRUCT_PAIR: &str = "
    LOAD_GLOBAL AutoName
    LOAD_CONST 2
    CALL_FUNCTION 1
";

/// Assembles `source`, runs it and returns the VM for inspection.
fn run(source: &str) -> Vm {
    let code = assemble(source).expect("program should assemble");
    let mut vm = Vm::default();
    vm.run_module(code).expect("program should run");
    vm
}

/// Resolved names of the self-naming values bound to `globals`.
fn names(vm: &mut Vm, globals: &[&str]) -> Vec<String> {
    globals
        .iter()
        .map(|global| {
            vm.name_of(global)
                .expect("global should hold a self-naming value")
                .expect("name should resolve")
        })
        .collect()
}

fn same_object(vm: &Vm, a: &str, b: &str) -> bool {
    match (vm.global(a), vm.global(b)) {
        (Some(Value::Object(a)), Some(Value::Object(b))) => Rc::ptr_eq(&a, &b),
        _ => false,
    }
}

/// `obj = AutoName()`
#[test]
fn single_assignment() {
    let mut vm = run("
        LOAD_GLOBAL AutoName
        CALL_FUNCTION 0
        STORE_NAME obj
    ");
    assert_eq!(names(&mut vm, &["obj"]), vec!["obj"]);
}

/// `a = b = c = AutoName()` binds `c` last, so every alias reports `c`.
#[test]
fn chained_assignment_takes_last_target() {
    let mut vm = run("
        LOAD_GLOBAL AutoName
        CALL_FUNCTION 0
        DUP_TOP
        STORE_NAME a
        DUP_TOP
        STORE_NAME b
        STORE_NAME c
    ");
    assert_eq!(names(&mut vm, &["a", "b", "c"]), vec!["c", "c", "c"]);
    assert!(same_object(&vm, "a", "c"));
}

/// `x, y = AutoName(2)`
#[test]
fn unpacking_names_each_position() {
    let mut vm = run(&format!(
        "{CONSTRUCT_PAIR}
        UNPACK_SEQUENCE 2
        STORE_NAME x
        STORE_NAME y"
    ));
    assert_eq!(names(&mut vm, &["x", "y"]), vec!["x", "y"]);
}

/// `a = b, c = AutoName(2)`
#[test]
fn name_then_unpack() {
    let mut vm = run(&format!(
        "{CONSTRUCT_PAIR}
        DUP_TOP
        STORE_NAME a
        UNPACK_SEQUENCE 2
        STORE_NAME b
        STORE_NAME c"
    ));
    assert_eq!(names(&mut vm, &["a", "b", "c"]), vec!["a", "b", "c"]);
}

/// `a, b = c = AutoName(2)`: the residual store names the value itself and
/// the group still names the siblings.
#[test]
fn unpack_then_name() {
    let mut vm = run(&format!(
        "{CONSTRUCT_PAIR}
        DUP_TOP
        UNPACK_SEQUENCE 2
        STORE_NAME a
        STORE_NAME b
        STORE_NAME c"
    ));
    assert_eq!(names(&mut vm, &["a", "b", "c"]), vec!["a", "b", "c"]);
}

/// `a = b = c, d = AutoName(2)`
#[test]
fn chain_then_unpack() {
    let mut vm = run(&format!(
        "{CONSTRUCT_PAIR}
        DUP_TOP
        STORE_NAME a
        DUP_TOP
        STORE_NAME b
        UNPACK_SEQUENCE 2
        STORE_NAME c
        STORE_NAME d"
    ));
    assert_eq!(names(&mut vm, &["a", "b", "c", "d"]), vec!["b", "b", "c", "d"]);
}

/// `a, b = c = d = AutoName(2)`
#[test]
fn unpack_then_chain() {
    let mut vm = run(&format!(
        "{CONSTRUCT_PAIR}
        DUP_TOP
        UNPACK_SEQUENCE 2
        STORE_NAME a
        STORE_NAME b
        DUP_TOP
        STORE_NAME c
        STORE_NAME d"
    ));
    assert_eq!(names(&mut vm, &["a", "b", "c", "d"]), vec!["a", "b", "d", "d"]);
}

/// `a = b = c, d = e = f = AutoName(2)`
#[test]
fn chain_around_unpack() {
    let mut vm = run(&format!(
        "{CONSTRUCT_PAIR}
        DUP_TOP
        STORE_NAME a
        DUP_TOP
        STORE_NAME b
        DUP_TOP
        UNPACK_SEQUENCE 2
        STORE_NAME c
        STORE_NAME d
        DUP_TOP
        STORE_NAME e
        STORE_NAME f"
    ));
    assert_eq!(
        names(&mut vm, &["a", "b", "c", "d", "e", "f"]),
        vec!["f", "f", "c", "d", "f", "f"]
    );
}

/// `a, b = c = d = e, f = AutoName(2)`: with two destructurings of the same
/// value, the last one supplies the sibling names and both patterns receive
/// the same cached siblings.
#[test]
fn two_unpacks_use_the_last_group() {
    let mut vm = run(&format!(
        "{CONSTRUCT_PAIR}
        DUP_TOP
        UNPACK_SEQUENCE 2
        STORE_NAME a
        STORE_NAME b
        DUP_TOP
        STORE_NAME c
        DUP_TOP
        STORE_NAME d
        UNPACK_SEQUENCE 2
        STORE_NAME e
        STORE_NAME f"
    ));
    assert_eq!(
        names(&mut vm, &["a", "b", "c", "d", "e", "f"]),
        vec!["e", "f", "d", "d", "e", "f"]
    );
    assert!(same_object(&vm, "a", "e"));
    assert!(same_object(&vm, "b", "f"));
}

/// `a, (b, c) = AutoName(2)`: a nested pattern position has no single name.
#[test]
fn nested_pattern_position_is_unnamed() {
    let mut vm = run(&format!(
        "{CONSTRUCT_PAIR}
        UNPACK_SEQUENCE 2
        STORE_NAME a
        UNPACK_SEQUENCE 2
        STORE_NAME b
        STORE_NAME c"
    ));
    assert_eq!(names(&mut vm, &["a", "b", "c"]), vec!["a", SENTINEL, SENTINEL]);
}

/// Destructuring needs the count up front; the default produces no siblings.
#[test]
fn unpacking_without_count_fails() {
    let code = assemble(
        "LOAD_GLOBAL AutoName
         CALL_FUNCTION 0
         UNPACK_SEQUENCE 2
         STORE_NAME x
         STORE_NAME y",
    )
    .unwrap();
    let err = Vm::default().run_module(code).unwrap_err();
    assert!(matches!(err, RunError::Value { .. }), "unexpected error: {err}");
}

/// A statement after the assignment does not contribute a name.
#[test]
fn later_statement_is_not_captured() {
    let mut vm = run("
        LOAD_GLOBAL AutoName
        CALL_FUNCTION 0
        STORE_NAME obj
        LOAD_CONST 1
        STORE_NAME other
        LOAD_NAME obj
        STORE_NAME alias
    ");
    assert_eq!(names(&mut vm, &["obj", "alias"]), vec!["obj", "obj"]);
}

/// Reading the name twice yields the same string, and the object is
/// identical across aliases.
#[test]
fn name_is_stable_across_reads() {
    let mut vm = run("
        LOAD_GLOBAL AutoName
        CALL_FUNCTION 0
        STORE_NAME obj
        LOAD_NAME obj
        LOAD_ATTR name
        STORE_NAME first
        LOAD_NAME obj
        LOAD_ATTR __name__
        STORE_NAME second
    ");
    let first = vm.global("first").unwrap().to_string();
    let second = vm.global("second").unwrap().to_string();
    assert_eq!(first, r#""obj""#);
    assert_eq!(first, second);
    assert_eq!(names(&mut vm, &["obj"]), vec!["obj"]);
}

/// A negative count is rejected when the value is constructed.
#[test]
fn negative_count_is_a_usage_error() {
    let code = assemble(
        "LOAD_GLOBAL AutoName
         LOAD_CONST -1
         CALL_FUNCTION 1
         STORE_NAME obj",
    )
    .unwrap();
    let err = Vm::default().run_module(code).unwrap_err();
    assert_eq!(err, RunError::Name(autoname::NameError::Usage { count: -1 }));
}

/// `pair = x, y = AutoName(2)`: iterating the value yields the pre-named
/// siblings, exactly `count` of them, and restarting yields the same objects.
#[test]
fn iteration_is_finite_and_restartable() {
    let mut vm = run(&format!(
        "{CONSTRUCT_PAIR}
        DUP_TOP
        STORE_NAME pair
        UNPACK_SEQUENCE 2
        STORE_NAME x
        STORE_NAME y"
    ));
    assert_eq!(names(&mut vm, &["pair"]), vec!["pair"]);
    let Some(Value::Object(pair)) = vm.global("pair") else {
        panic!("pair should be a self-naming value");
    };

    let mut first = pair.iterate();
    let siblings: Vec<_> = first.by_ref().collect();
    assert!(first.next().is_none());
    let sibling_names: Vec<_> = siblings.iter().map(|s| s.resolved_name().unwrap().to_owned()).collect();
    assert_eq!(sibling_names, vec!["x", "y"]);

    let again: Vec<_> = pair.iterate().collect();
    assert!(siblings.iter().zip(&again).all(|(a, b)| Rc::ptr_eq(a, b)));
    let Some(Value::Object(x)) = vm.global("x") else {
        panic!("x should be a self-naming value");
    };
    assert!(Rc::ptr_eq(&x, &siblings[0]));
}

/// `(x := AutoName())`: the discarded expression result ends the run and is
/// not a second binding.
#[test]
fn assignment_expression() {
    let mut vm = run("
        LOAD_GLOBAL AutoName
        CALL_FUNCTION 0
        DUP_TOP
        STORE_NAME x
        POP_TOP
        LOAD_CONST 1
        STORE_NAME y
    ");
    assert_eq!(names(&mut vm, &["x"]), vec!["x"]);
}
