/*
 * driver.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Building the starting environment, rendering, and reporting failures.
//!
//! Variables are layered so that the earliest source wins: `--var` values,
//! then the parameters file, then `--json-include` files, then `--include`
//! templates. Each layer is locked before the next is applied.

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use prepro_template::params::{Params, bind_immutable, read_json_include, read_params};
use prepro_template::{Environment, RenderOptions, Syntax, TemplateError, Value, render_file, render_str};
use tracing::debug;

use crate::cli::TemplateArgs;

/// Exit status for any reported error.
pub const ERROR_EXIT_CODE: u8 = 2;

/// Render according to `args`, optionally seeding a Dakota parameters file.
pub fn run(args: &TemplateArgs, params_file: Option<&Path>) -> Result<()> {
    let syntax = Syntax::from_pairs(&args.code_block, &args.code, &args.inline)?;
    let params = params_file.map(read_params).transpose()?;
    let options = RenderOptions::new()
        .with_syntax(syntax)
        .with_fmt(args.fmt.clone())
        .with_name_fixups(params.as_ref().map(|p| p.fixups.clone()).unwrap_or_default());

    let env = build_environment(args, params.as_ref(), &options)?;

    let (output, _) = if args.infile == "-" {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read template from standard input")?;
        render_str(&text, &env, &options)?
    } else {
        render_file(Path::new(&args.infile), &env, &options)?
    };

    match &args.outfile {
        Some(path) => {
            fs::write(path, output)
                .with_context(|| format!("Failed to write output file: {}", path.display()))?;
            debug!(path = %path.display(), "wrote output");
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout
                .write_all(output.as_bytes())
                .and_then(|()| stdout.flush())
                .context("Failed to write to standard output")?;
        }
    }
    Ok(())
}

/// Apply every variable layer in precedence order. `options` should carry
/// the parameter renames so that `--include` templates can use the
/// original names.
pub fn build_environment(
    args: &TemplateArgs,
    params: Option<&Params>,
    options: &RenderOptions,
) -> Result<Environment> {
    let mut env = Environment::new();

    bind_immutable(
        &mut env,
        args.vars
            .iter()
            .map(|(name, value)| (name.clone(), Value::from_cli_text(value))),
    );
    debug!(count = args.vars.len(), "bound command-line variables");

    if let Some(params) = params {
        bind_immutable(&mut env, params.entries.iter().cloned());
        debug!(count = params.len(), "bound parameters file");
    }

    for path in &args.json_includes {
        bind_immutable(&mut env, read_json_include(path)?);
    }

    for path in &args.includes {
        let (_, rendered) = render_file(path, &env, options)?;
        env = rendered;
        env.lock_all();
        debug!(path = %path.display(), "applied include file");
    }

    Ok(env)
}

/// Print `err` the way both drivers report failures.
pub fn report(err: &anyhow::Error) {
    match err.downcast_ref::<TemplateError>() {
        Some(template_err) => {
            eprintln!("Error occurred:\n  {}: {template_err}", template_err.class_name());
        }
        None => eprintln!("Error occurred:\n  {err:#}"),
    }
}

/// Convert the outcome of [`run`] into the process exit status.
pub fn exit_code(result: Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err);
            ExitCode::from(ERROR_EXIT_CODE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        template: TemplateArgs,
    }

    fn args(argv: &[&str]) -> TemplateArgs {
        let mut full = vec!["test"];
        full.extend_from_slice(argv);
        Harness::parse_from(full).template
    }

    #[test]
    fn test_var_layer_wins_over_include() {
        let dir = tempfile::tempdir().unwrap();
        let include = dir.path().join("defaults.inp");
        fs::write(&include, "% a = 10\n% b = 20\n").unwrap();
        let args = args(&[
            "--var",
            "a=1",
            "-I",
            include.to_str().unwrap(),
            "in.inp",
        ]);
        let env = build_environment(&args, None, &RenderOptions::new()).unwrap();
        assert!(env.get("a").unwrap().py_eq(&Value::Int(1)));
        assert!(env.get("b").unwrap().py_eq(&Value::Int(20)));
        assert!(env.is_locked("b"));
    }

    #[test]
    fn test_json_layer_below_vars() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("vals.json");
        fs::write(&json, r#"{"a": 5, "c": "text"}"#).unwrap();
        let args = args(&["--var", "a=1", "--json-include", json.to_str().unwrap(), "in.inp"]);
        let env = build_environment(&args, None, &RenderOptions::new()).unwrap();
        assert!(env.get("a").unwrap().py_eq(&Value::Int(1)));
        assert_eq!(env.get("c").unwrap().to_str(), "text");
    }

    #[test]
    fn test_params_layer_and_renames() {
        let dir = tempfile::tempdir().unwrap();
        let include = dir.path().join("derived.inp");
        fs::write(&include, "{scaled = 10 * ASV_1:response_fn_1}\n").unwrap();
        let params = prepro_template::params::parse_params(
            "2 variables\n1.5 x1\n2 x2\n1 functions\n1 ASV_1:response_fn_1\n",
        )
        .unwrap();
        let args = args(&["--var", "x1=7", "-I", include.to_str().unwrap(), "in.inp"]);
        let options = RenderOptions::new().with_name_fixups(params.fixups.clone());
        let env = build_environment(&args, Some(&params), &options).unwrap();
        assert!(env.get("x1").unwrap().py_eq(&Value::Int(7)));
        assert!(env.get("x2").unwrap().py_eq(&Value::Int(2)));
        assert!(env.get("scaled").unwrap().py_eq(&Value::Int(10)));
        assert!(env.is_locked("ASV_1_response_fn_1"));
    }

    #[test]
    fn test_template_error_is_downcast() {
        let err = anyhow::Error::from(TemplateError::name_error("x"));
        assert_eq!(
            err.downcast_ref::<TemplateError>().map(TemplateError::class_name),
            Some("NameError")
        );
    }
}
