/*
 * cli_tests.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Tests that spawn the pyprepro and dprepro binaries.
 */

use pretty_assertions::assert_eq;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

fn pyprepro(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_pyprepro"))
        .current_dir(dir)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run pyprepro")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_render_to_stdout() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("in.inp"), "% x = 2\nx={x} y={x * 1.5}\n").unwrap();
    let output = pyprepro(dir.path(), &["in.inp"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output), "x=2 y=3\n");
}

#[test]
fn test_render_to_outfile() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("in.inp"), "{'done'}\n").unwrap();
    let output = pyprepro(dir.path(), &["in.inp", "out.txt"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output), "");
    assert_eq!(fs::read_to_string(dir.path().join("out.txt")).unwrap(), "done\n");
}

#[test]
fn test_var_overrides_template_default() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("in.inp"),
        "% mesh = 10\n% label = 'default'\n{mesh} {label}\n",
    )
    .unwrap();
    let output = pyprepro(dir.path(), &["--var", "mesh=40", "--var", "label=fine", "in.inp"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output), "40 fine\n");
}

#[test]
fn test_include_layer_precedence() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("first.inp"), "% a = 'first'\n% b = 'first'\n").unwrap();
    fs::write(dir.path().join("second.inp"), "% b = 'second'\n% c = 'second'\n").unwrap();
    fs::write(dir.path().join("in.inp"), "% c = 'template'\n{a} {b} {c}\n").unwrap();
    let output = pyprepro(
        dir.path(),
        &["-I", "first.inp", "--include", "second.inp", "in.inp"],
    );
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output), "first first second\n");
}

#[test]
fn test_custom_delimiters() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("in.inp"), "$ n = 3\nset = {1, 2}\nn = [[n]]\n").unwrap();
    let output = pyprepro(dir.path(), &["--code", "$", "--inline", "[[ ]]", "in.inp"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output), "set = {1, 2}\nn = 3\n");
}

#[test]
fn test_fmt_option() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("in.inp"), "{pi}\n").unwrap();
    let output = pyprepro(dir.path(), &["--fmt", "%0.3f", "in.inp"]);
    assert_eq!(stdout(&output), "3.142\n");
}

#[test]
fn test_stdin_input() {
    let dir = tempfile::tempdir().unwrap();
    let mut child = Command::new(env!("CARGO_BIN_EXE_pyprepro"))
        .current_dir(dir.path())
        .arg("-")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"{6 * 7}\n")
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());
    assert_eq!(stdout(&output), "42\n");
}

#[test]
fn test_error_reported_with_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("in.inp"), "line\n{missing}\n").unwrap();
    let output = pyprepro(dir.path(), &["in.inp"]);
    assert_eq!(output.status.code(), Some(2));
    let message = stderr(&output);
    assert!(message.starts_with("Error occurred:\n  NameError: "), "{message}");
    assert!(message.contains("name 'missing' is not defined"));
    assert!(message.contains("line ~2"));
}

#[test]
fn test_bad_delimiter_is_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("in.inp"), "text\n").unwrap();
    let output = pyprepro(dir.path(), &["--code-block", "{{ }}", "in.inp"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("ConfigurationError"));
}

#[test]
fn test_dprepro_params_file() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("params.in"),
        "                     2 variables\n\
         \x20                     1.500000000000000e+00 x1\n\
         \x20                     2.000000000000000e+00 x2\n\
         \x20                    1 functions\n\
         \x20                    1 ASV_1:f\n\
         \x20                    4 eval_id\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("in.inp"),
        "% x1 = 99\nsum = {x1 + x2} eval {eval_id} asv {ASV_1_f} {ASV_1:f}\n",
    )
    .unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_dprepro"))
        .current_dir(dir.path())
        .args(["params.in", "in.inp"])
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output), "sum = 3.5 eval 4 asv 1 1\n");
}
