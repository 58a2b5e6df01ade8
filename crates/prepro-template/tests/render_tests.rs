/*
 * render_tests.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * End-to-end rendering tests: escaping, assignments, includes, locking
 * and formatting.
 */

use pretty_assertions::assert_eq;
use prepro_template::{
    Environment, RenderOptions, Session, Value, render, render_file, render_str,
};
use std::fs;
use std::path::Path;

fn options() -> RenderOptions {
    RenderOptions::new().with_search_dirs(Vec::new())
}

/// Render literal text with no starting bindings.
fn run(source: &str) -> String {
    render_str(source, &Environment::new(), &options())
        .unwrap_or_else(|err| panic!("render failed for {source:?}: {err}"))
        .0
}

fn write(dir: &Path, name: &str, content: &str) {
    fs::write(dir.join(name), content).unwrap();
}

#[test]
fn test_plain_text_is_unchanged() {
    let text = "Plain deck\n  with indentation\n\ttabs and 100% numbers\nno trailing newline";
    assert_eq!(run(text), text);
}

#[test]
fn test_escaped_inline_delimiters() {
    assert_eq!(run(r"\{a=5}"), "{a=5}");
    assert_eq!(run(r"\{a=5\}"), "{a=5}");
    assert_eq!(run(r"\\{a=5}"), r"\{a=5}");
}

#[test]
fn test_assignment_echo() {
    assert_eq!(run("{a = 5}"), "5");
    assert_eq!(run("{a = 5}{a + 1}"), "56");
}

#[test]
fn test_comparison_is_not_assignment() {
    assert_eq!(run("% a = 2\n{a == 2} {a <= 1} {a != 3}\n"), "True False True\n");
}

#[test]
fn test_multi_assignment_chaining() {
    let source = "% p = 1\n{p}\n{p = p + 1}\nSTART,{p = p + 1},{p = p + 1},END\n{p}\n";
    assert_eq!(run(source), "1\n2\nSTART,3,4,END\n4\n");
}

#[test]
fn test_augmented_inline_assignment() {
    assert_eq!(run("% n = 3\n{n += 2} {n *= 2}\n"), "5 10\n");
}

#[test]
fn test_empty_inline_expression() {
    let err = render_str("A = {}", &Environment::new(), &options()).unwrap_err();
    assert_eq!(err.class_name(), "EmptyExpressionError");
    assert_eq!(run("A = {\"\"}"), "A = ");
}

#[test]
fn test_variable_name_fixups() {
    assert_eq!(run("{ ASV_1:fun1 = 1}\n{ ASV_1_fun1 }\n"), "1\n1\n");
    assert_eq!(run("{ ASV_1:fun1 = 1}\n{ \"ASV_1:fun1\" }\n"), "1\nASV_1:fun1\n");
    assert_eq!(run("{ 2x = 4 }{ i2x }"), "44");
}

#[test]
fn test_immutable_survives_template_defaults() {
    let mut env = Environment::new();
    env.set_immutable("thickness", Value::Float(2.5));
    let source = "% thickness = 1.0\n% width = 3\nt = {thickness}, w = {width}\n";
    let (out, env) = render_str(source, &env, &options()).unwrap();
    assert_eq!(out, "t = 2.5, w = 3\n");
    assert!(env.is_locked("thickness"));
    assert!(!env.is_locked("width"));
}

#[test]
fn test_mutable_unlocks() {
    let source = "% a = Immutable(1)\n% a = 2\n{a}\n% a = Mutable(3)\n% a = 4\n{a}\n";
    assert_eq!(run(source), "1\n4\n");
}

#[test]
fn test_code_blocks_and_line_continuation() {
    let source = "{%\nvalues = [1, 2, 3]\ntotal = sum(values)\n%}\nsum=\\\n{total}\n";
    assert_eq!(run(source), "sum=6\n");
}

#[test]
fn test_block_structure_in_text() {
    let source = "\
% for i, name in enumerate(['a', 'b']):
item {i}: {name}
% end
% if len('xy') > 1:
long
% else:
short
% end
";
    assert_eq!(run(source), "item 0: a\nitem 1: b\nlong\n");
}

#[test]
fn test_conditional_expression_does_not_open_block() {
    assert_eq!(run("% x = 1 if True else 2\n{x}\n"), "1\n");
}

#[test]
fn test_default_numeric_format() {
    assert_eq!(run("{1/3}"), "0.3333333333");
    assert_eq!(run("{[0.5, 2]}"), "[0.5, 2]");
    assert_eq!(run("{!1/3}"), "0.3333333333333333");
    assert_eq!(run("% setfmt('{:.3e}')\n{12345.678}\n"), "1.235e+04\n");
    assert_eq!(run("{fmt(pi, '.2f')} {fmt(2, '%05d')}"), "3.14 00002");
}

#[test]
fn test_strings_and_none() {
    assert_eq!(run("{'abc'.upper()} [{None}]"), "ABC []");
    assert_eq!(run("{ {'a': 1} }"), "{'a': 1}");
}

#[test]
fn test_defined_and_get() {
    let source = "% a = 1\n{defined('a')} {defined('b')} {get('b', 7)}\n";
    assert_eq!(run(source), "True False 7\n");
}

#[test]
fn test_all_vars_excludes_builtins() {
    assert_eq!(run("% b = 1\n% a = 2\n{all_var_names()}\n"), "['b', 'a']\n");
}

#[test]
fn test_custom_delimiters() {
    let syntax = prepro_template::Syntax::from_pairs("<% %>", "$", "[[ ]]").unwrap();
    let options = options().with_syntax(syntax);
    let source = "$ a = 3\n<%\nb = a * 2\n%>\n{not code} [[ b ]]\n";
    let (out, _) = render_str(source, &Environment::new(), &options).unwrap();
    assert_eq!(out, "{not code} 6\n");
}

#[test]
fn test_bracket_code_block_delimiter_rejected() {
    let err = prepro_template::Syntax::from_pairs("{ }", "%", "{ }").unwrap_err();
    assert_eq!(err.class_name(), "ConfigurationError");
}

#[test]
fn test_deterministic_rerender() {
    let source = "% x = [i ** 2 for i in range(5)]\n{x} {sum(x) / 3}\n{ {'k': 1, 'j': 2} }\n";
    let mut session = Session::new(options()).unwrap();
    let program = session.compile(source, "<string>").unwrap();
    let mut first_env = Environment::with_builtins();
    let first = session.run(&program, &mut first_env, None).unwrap();
    let mut second_env = Environment::with_builtins();
    let second = session.run(&program, &mut second_env, None).unwrap();
    assert_eq!(first, "[0, 1, 4, 9, 16] 10\n{'k': 1, 'j': 2}\n");
    assert_eq!(first, second);
    assert_eq!(first, run(source));
}

#[test]
fn test_deeply_nested_expression_is_rejected() {
    let handle = std::thread::Builder::new()
        .stack_size(2 * 1024 * 1024)
        .spawn(|| {
            let nested = |depth: usize| format!("{{{}1{}}}", "(".repeat(depth), ")".repeat(depth));
            let shallow = run(&nested(100));
            let err = render_str(&nested(3000), &Environment::new(), &options()).unwrap_err();
            (shallow, err.class_name())
        })
        .unwrap();
    let (shallow, class) = handle.join().unwrap();
    assert_eq!(shallow, "1");
    assert_eq!(class, "SyntaxError");
}

#[test]
fn test_include_scope_sharing() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "defaults.inp", "% depth = Immutable(4)\n% width = 2\n");
    write(
        dir.path(),
        "main.inp",
        "% include('defaults.inp')\n% depth = 10\n% width = 5\ndepth={depth} width={width}\n",
    );
    let (out, env) = render_file(&dir.path().join("main.inp"), &Environment::new(), &options()).unwrap();
    assert_eq!(out, "depth=4 width=5\n");
    assert!(env.is_locked("depth"));
}

#[test]
fn test_include_overrides_and_relative_lookup() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("parts")).unwrap();
    write(&dir.path().join("parts"), "leaf.inp", "leaf {n}\n");
    write(&dir.path().join("parts"), "branch.inp", "{include('leaf.inp', n=n + 1)}");
    write(dir.path(), "root.inp", "% n = 1\n{include('parts/branch.inp')}done {n}\n");
    let (out, _) = render_file(&dir.path().join("root.inp"), &Environment::new(), &options()).unwrap();
    assert_eq!(out, "leaf 2\ndone 2\n");
}

#[test]
fn test_include_from_search_dir() {
    let templates = tempfile::tempdir().unwrap();
    write(templates.path(), "shared.inp", "shared\n");
    let options = options().with_search_dirs(vec![templates.path().to_path_buf()]);
    let (out, _) = render_str("{include('shared.inp')}", &Environment::new(), &options).unwrap();
    assert_eq!(out, "shared\n");
}

#[test]
fn test_include_without_call_syntax() {
    let err = render_str("% include file.inp\n", &Environment::new(), &options()).unwrap_err();
    assert_eq!(err.class_name(), "IncludeSyntaxError");
}

#[test]
fn test_render_accepts_path_or_text() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "t.inp", "{1 + 1}");
    let path = dir.path().join("t.inp");
    let (from_path, _) = render(path.to_str().unwrap(), &Environment::new(), &options()).unwrap();
    assert_eq!(from_path, "2");
    let (from_text, _) = render("{2 + 2}", &Environment::new(), &options()).unwrap();
    assert_eq!(from_text, "4");
}

#[test]
fn test_error_reports_file_and_line() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "bad.inp", "ok\nok\n{undefined}\n");
    let err = render_file(&dir.path().join("bad.inp"), &Environment::new(), &options()).unwrap_err();
    assert_eq!(err.class_name(), "NameError");
    let location = err.location().unwrap();
    assert!(location.file.ends_with("bad.inp"));
    assert_eq!(location.line, 3);
}
