/*
 * main.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! pyprepro - render a template using command-line and included variables

use std::process::ExitCode;

use clap::Parser;

use pyprepro::cli::TemplateArgs;
use pyprepro::{driver, init_logging};

#[derive(Parser, Debug)]
#[command(name = "pyprepro")]
#[command(version)]
#[command(about = "Preprocess a template, substituting expressions and running embedded code")]
struct Cli {
    #[command(flatten)]
    template: TemplateArgs,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.template.verbose);
    driver::exit_code(driver::run(&cli.template, None))
}
