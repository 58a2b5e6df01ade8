/*
 * dprepro.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! dprepro - render a template with variables from a Dakota parameters file

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use pyprepro::cli::TemplateArgs;
use pyprepro::{driver, init_logging};

#[derive(Parser, Debug)]
#[command(name = "dprepro")]
#[command(version)]
#[command(about = "Preprocess a template using variables from a Dakota parameters file")]
struct Cli {
    /// Dakota parameters file, standard or APREPRO layout
    #[arg(value_name = "PARAMSFILE")]
    params: PathBuf,

    #[command(flatten)]
    template: TemplateArgs,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.template.verbose);
    driver::exit_code(driver::run(&cli.template, Some(&cli.params)))
}
