//! Regression coverage for fixes to behavior that earlier slipped past
//! S1-S8/P1-P9: bare global builtins, `this` outside a method, negative
//! array-index reads, and Set display.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use izi::{Interpreter, RuntimeError};

fn run(source: &str) -> (String, Result<(), RuntimeError>) {
    let buf = Rc::new(RefCell::new(Vec::new()));
    let cwd = std::env::current_dir().unwrap();
    let result = Interpreter::new()
        .with_output(buf.clone())
        .run(source, Path::new("main.izi"), &cwd, Vec::new());
    let out = String::from_utf8(buf.borrow().clone()).expect("utf8 stdout");
    (out, result)
}

#[test]
fn spawn_builds_a_pending_task_without_running_its_body() {
    let (out, result) = run(
        r#"
            fn f() { print("ran"); return 1; }
            var t = spawn(f);
            print("before await");
            print(await t);
        "#,
    );
    assert_eq!(out, "before await\nran\n1\n");
    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn spawn_rejects_a_non_callable_argument() {
    let (_out, result) = run("spawn(5);");
    match result {
        Err(RuntimeError::Uncaught(msg)) => assert!(msg.contains("TypeError"), "got: {msg}"),
        other => panic!("expected a TypeError, got {other:?}"),
    }
}

#[test]
fn this_outside_a_method_is_a_runtime_error() {
    let (_out, result) = run("print(this);");
    match result {
        Err(RuntimeError::Uncaught(msg)) => assert!(msg.contains("TypeError"), "got: {msg}"),
        other => panic!("expected a TypeError for bare `this`, got {other:?}"),
    }
}

#[test]
fn negative_array_index_read_is_out_of_range_not_a_wraparound() {
    let (_out, result) = run(
        r#"
            var a = [1, 2, 3];
            print(a[-1]);
        "#,
    );
    match result {
        Err(RuntimeError::Uncaught(msg)) => assert!(msg.contains("ValueError"), "got: {msg}"),
        other => panic!("expected a ValueError, got {other:?}"),
    }
}

#[test]
fn negative_array_index_read_and_write_agree() {
    let (_out_read, read_result) = run("var a = [1, 2, 3]; print(a[-1]);");
    let (_out_write, write_result) = run("var a = [1, 2, 3]; a[-1] = 9;");
    assert!(read_result.is_err());
    assert!(write_result.is_err());
}

#[test]
fn set_display_prints_canonical_literal_syntax_not_internal_keys() {
    let (out, result) = run(r#"print({"hello", "world"});"#);
    assert_eq!(out, "{\"hello\", \"world\"}\n");
    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn set_display_of_non_string_members_is_unaffected() {
    let (out, result) = run("print({1, 2, true, nil});");
    assert_eq!(out, "{1, 2, true, nil}\n");
    assert!(result.is_ok(), "{result:?}");
}
