/*
 * cli.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Arguments shared by both drivers.

use std::path::PathBuf;

use clap::Args;
use prepro_template::format::DEFAULT_FMT;
use prepro_template::syntax::{DEFAULT_CODE, DEFAULT_CODE_BLOCK, DEFAULT_INLINE};

#[derive(Args, Debug, Clone)]
pub struct TemplateArgs {
    /// Template file, or '-' to read standard input
    #[arg(value_name = "INFILE")]
    pub infile: String,

    /// Output file (standard output when omitted)
    #[arg(value_name = "OUTFILE")]
    pub outfile: Option<PathBuf>,

    /// Delimiter marking a single line of code
    #[arg(long, value_name = "CHAR", default_value = DEFAULT_CODE)]
    pub code: String,

    /// Opening and closing delimiters of a code block, separated by a space
    #[arg(long, value_name = "OPEN CLOSE", default_value = DEFAULT_CODE_BLOCK)]
    pub code_block: String,

    /// Opening and closing delimiters of an inline expression, separated by a space
    #[arg(long, value_name = "OPEN CLOSE", default_value = DEFAULT_INLINE)]
    pub inline: String,

    /// Default format for numbers, '%' or '{}' style
    #[arg(long, value_name = "FMT", default_value = DEFAULT_FMT)]
    pub fmt: String,

    /// Immutable variable (NAME=VALUE); numbers are converted when possible
    #[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_var)]
    pub vars: Vec<(String, String)>,

    /// Render FILE first and lock every variable it defines
    #[arg(short = 'I', long = "include", value_name = "FILE")]
    pub includes: Vec<PathBuf>,

    /// JSON file whose top-level members become immutable variables
    #[arg(long = "json-include", value_name = "FILE")]
    pub json_includes: Vec<PathBuf>,

    /// Verbose logging to stderr (-v for debug, -vv for trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Split `NAME=VALUE` at the first `=`.
pub fn parse_var(text: &str) -> Result<(String, String), String> {
    let (name, value) = text
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got {text:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing variable name in {text:?}"));
    }
    Ok((name.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_var() {
        assert_eq!(
            parse_var("x = 1.5").unwrap(),
            ("x".to_string(), " 1.5".to_string())
        );
        assert_eq!(
            parse_var("eq=a=b").unwrap(),
            ("eq".to_string(), "a=b".to_string())
        );
        assert!(parse_var("novalue").is_err());
        assert!(parse_var("=3").is_err());
    }
}
