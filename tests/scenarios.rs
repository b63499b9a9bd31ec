//! End-to-end scenarios (SPEC_FULL.md §8, S1-S8): run a complete program
//! through `Interpreter::run` and assert on its captured stdout and
//! exit/throw status.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use izi::{Interpreter, RuntimeError};

fn run(source: &str) -> (String, Result<(), RuntimeError>) {
    run_in(source, Path::new("main.izi"))
}

fn run_in(source: &str, entry_path: &Path) -> (String, Result<(), RuntimeError>) {
    let buf = Rc::new(RefCell::new(Vec::new()));
    let cwd = std::env::current_dir().unwrap();
    let result = Interpreter::new()
        .with_output(buf.clone())
        .run(source, entry_path, &cwd, Vec::new());
    let out = String::from_utf8(buf.borrow().clone()).expect("utf8 stdout");
    (out, result)
}

#[test]
fn s1_arithmetic() {
    let (out, result) = run("print(2 + 3);");
    assert_eq!(out, "5\n");
    assert!(result.is_ok());
}

#[test]
fn s2_string_interpolation() {
    let (out, result) = run(r#"var s = "hi"; print("${s}!");"#);
    assert_eq!(out, "hi!\n");
    assert!(result.is_ok());
}

#[test]
fn s3_recursive_factorial() {
    let (out, result) = run(
        r#"fn f(n) { if (n<=1) return 1; return n*f(n-1); } print(f(5));"#,
    );
    assert_eq!(out, "120\n");
    assert!(result.is_ok());
}

#[test]
fn s4_closures_share_mutable_state() {
    let (out, result) = run(
        r#"fn mk() { var c=0; return fn() { c = c+1; return c; }; }
           var g=mk(); print(g()); print(g()); print(g());"#,
    );
    assert_eq!(out, "1\n2\n3\n");
    assert!(result.is_ok());
}

#[test]
fn s5_try_finally_runs_before_uncaught_throw_propagates() {
    let (out, result) = run(r#"try { throw "e"; } finally { print("f"); }"#);
    assert_eq!(out, "f\n");
    match result {
        Err(RuntimeError::Uncaught(msg)) => assert!(msg.contains('e')),
        other => panic!("expected an uncaught throw, got {other:?}"),
    }
}

#[test]
fn s6_awaited_async_call_yields_its_result() {
    let (out, result) = run("async fn a() { return 7; } print(await a());");
    assert_eq!(out, "7\n");
    assert!(result.is_ok());
}

#[test]
fn s6_unawaited_async_call_prints_a_task_handle() {
    let (out, result) = run("async fn a() { return 7; } print(a());");
    assert!(out.starts_with("<task"), "expected a task handle, got {out:?}");
    assert!(result.is_ok());
}

#[test]
fn s7_pattern_match_with_guard_and_wildcard() {
    let (out, result) = run(
        r#"fn d(x){return match x { 0=>"z", n if n>0=>"+", _=>"-" };}
           print(d(0)); print(d(3)); print(d(-1));"#,
    );
    assert_eq!(out, "z\n+\n-\n");
    assert!(result.is_ok());
}

#[test]
fn s8_circular_module_import_throws_import_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("a.izi"), r#"import "./b.izi";"#).unwrap();
    std::fs::write(dir.path().join("b.izi"), r#"import "./a.izi";"#).unwrap();

    let entry = dir.path().join("a.izi");
    let source = std::fs::read_to_string(&entry).unwrap();
    let (_out, result) = run_in(&source, &entry);

    match result {
        Err(RuntimeError::Load(e)) => {
            assert!(e.to_string().contains("Circular"), "got: {e}")
        }
        other => panic!("expected a circular-import load error, got {other:?}"),
    }
}

#[test]
fn stdin_entry_with_no_directory_resolves_imports_against_cwd() {
    // An entry path with no directory component (as with `-` on the CLI)
    // falls back to `cwd` for relative imports (lib.rs's `base_dir` logic).
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("helper.izi"), "export var value = 5;").unwrap();

    let buf = Rc::new(RefCell::new(Vec::new()));
    let source = r#"import { value } from "./helper.izi"; print(value);"#;
    let result = Interpreter::new()
        .with_output(buf.clone())
        .run(source, &PathBuf::new(), dir.path(), Vec::new());
    let out = String::from_utf8(buf.borrow().clone()).unwrap();

    assert_eq!(out, "5\n");
    assert!(result.is_ok(), "{result:?}");
}
