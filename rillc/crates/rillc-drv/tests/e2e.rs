//! End-to-end tests driving the `rillc` binary.
//!
//! Every language scenario runs under both backends and must produce
//! byte-identical stdout.

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn rillc() -> Command {
    Command::new(env!("CARGO_BIN_EXE_rillc"))
}

fn source_file(dir: &TempDir, text: &str) -> PathBuf {
    let path = dir.path().join("prog.rill");
    fs::write(&path, text).expect("failed to write source file");
    path
}

/// Run `source` in interpret mode under `backend`, feeding `stdin`.
fn run_backend(backend: &str, source: &str, stdin: &str) -> String {
    let dir = TempDir::new().expect("failed to create temp dir");
    let path = source_file(&dir, source);
    let output = rillc()
        .arg("-i")
        .arg("-b")
        .arg(backend)
        .arg(&path)
        .write_stdin(stdin)
        .output()
        .expect("failed to run rillc");
    assert!(
        output.status.success(),
        "backend {backend} failed on {source:?}: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).expect("stdout is not utf-8")
}

/// Assert both backends agree on the program's output.
fn assert_both_backends(source: &str, stdin: &str, expected: &str) {
    let walk = run_backend("walk", source, stdin);
    let lir = run_backend("lir", source, stdin);
    assert_eq!(walk, expected, "walk backend output mismatch");
    assert_eq!(lir, expected, "lir backend output mismatch");
}

#[test]
fn scenario_write_int() {
    assert_both_backends("write_int 42", "", "42");
}

#[test]
fn scenario_let_arithmetic() {
    assert_both_backends("let var x = 3 in write_int (x + 4)", "", "7");
}

#[test]
fn scenario_array_store_load() {
    assert_both_backends(
        "let var y = make_array 3 in do y[0]=10; y[1]=20; y[2]=30; \
         write_int y[0]; write_int y[1]; write_int y[2] end",
        "",
        "102030",
    );
}

#[test]
fn scenario_function_application() {
    assert_both_backends("let fun f x = x + 1 in write_int (f 3)", "", "4");
}

#[test]
fn scenario_read_int() {
    assert_both_backends("let var n = read_int nil in write_int (n * n)", "5\n", "25");
}

#[test]
fn scenario_for_loop() {
    assert_both_backends("for var i from 0 to 3 then write_int i", "", "012");
}

#[test]
fn cli_help_succeeds() {
    rillc()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("rillc"));
}

#[test]
fn cli_without_mode_is_a_usage_error() {
    let dir = TempDir::new().unwrap();
    let path = source_file(&dir, "write_int 1");
    rillc().arg(&path).assert().failure().code(1);
}

#[test]
fn cli_missing_file_fails() {
    rillc()
        .arg("-i")
        .arg("/no/such/file.rill")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("can't read"));
}

#[test]
fn type_error_exits_with_diagnostic() {
    let dir = TempDir::new().unwrap();
    let path = source_file(&dir, "write_int true");
    rillc()
        .arg("-i")
        .arg(&path)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("error"));
}

#[test]
fn undeclared_variable_reports_its_name() {
    let dir = TempDir::new().unwrap();
    let path = source_file(&dir, "write_int ghost");
    rillc()
        .arg("-i")
        .arg(&path)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("ghost"));
}

#[test]
fn compile_mode_emits_lir_text() {
    let dir = TempDir::new().unwrap();
    let path = source_file(&dir, "write_int 42");
    rillc()
        .arg("-c")
        .arg("-b")
        .arg("lir")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("printv"))
        .stdout(predicate::str::contains("jump"));
}

#[test]
fn compile_mode_writes_output_file() {
    let dir = TempDir::new().unwrap();
    let path = source_file(&dir, "write_int 42");
    let out_path = dir.path().join("prog.lir");
    rillc()
        .arg("-c")
        .arg("-b")
        .arg("lir")
        .arg("-o")
        .arg(&out_path)
        .arg(&path)
        .assert()
        .success();
    let text = fs::read_to_string(&out_path).expect("output file missing");
    assert!(text.contains("printv"));
    assert!(text.lines().any(|l| l.starts_with("L") && l.ends_with(":")));
}

#[test]
fn compile_mode_rejects_walk_backend() {
    let dir = TempDir::new().unwrap();
    let path = source_file(&dir, "write_int 42");
    rillc()
        .arg("-c")
        .arg(&path)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("cannot compile"));
}

#[test]
fn verbose_logs_phases_to_stderr() {
    let dir = TempDir::new().unwrap();
    let path = source_file(&dir, "write_int 42");
    rillc()
        .arg("-i")
        .arg("-V")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("42"))
        .stderr(predicate::str::contains("parsing"))
        .stderr(predicate::str::contains("type checking"));
}

#[test]
fn double_verbose_dumps_lir() {
    let dir = TempDir::new().unwrap();
    let path = source_file(&dir, "write_int 42");
    rillc()
        .arg("-i")
        .arg("-b")
        .arg("lir")
        .arg("-V")
        .arg("-V")
        .arg(&path)
        .assert()
        .success()
        .stderr(predicate::str::contains("printv"));
}

#[test]
fn exit_builtin_sets_exit_code() {
    let dir = TempDir::new().unwrap();
    let path = source_file(&dir, "exit 3");
    rillc().arg("-i").arg("-b").arg("walk").arg(&path).assert().code(3);
}

#[test]
fn repl_echoes_values() {
    rillc()
        .arg("-i")
        .arg("-")
        .write_stdin("1 + 2\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("==> 3"));
}

#[test]
fn repl_lir_backend_echoes_values() {
    rillc()
        .arg("-i")
        .arg("-b")
        .arg("lir")
        .arg("-")
        .write_stdin("6 * 7\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("==> 42"));
}
