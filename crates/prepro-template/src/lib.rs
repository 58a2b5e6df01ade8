/*
 * lib.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template preprocessor for engineering input decks.
//!
//! Templates are free-form text with three kinds of embedded code:
//!
//! - Inline expressions: `{x}`, `{x * 2}`, `{!name}` for raw output
//! - Inline assignments, echoed after assignment: `{x = 5}`
//! - Statements on lines starting with `%`, or in `{% ... %}` blocks, with
//!   `if`/`for`/`while`/`try`/`def` blocks closed by `end`
//!
//! Variables live in one [`Environment`] shared by a template and every
//! file it includes. Each variable can be locked with `Immutable(..)` so
//! that later plain assignments leave it alone, which is how command-line
//! values override defaults written in the template.
//!
//! # Architecture
//!
//! Rendering runs as a pipeline: the [`preparse`] passes normalize escapes
//! and split inline assignments, the [`compiler`] turns text and code into a
//! [`Program`] tree, and the [`interp`] module executes that tree against the
//! environment. Numbers are written using a per-render default format
//! (`%0.10g` unless changed with `setfmt`).
//!
//! # Example
//!
//! ```ignore
//! use prepro_template::{Environment, RenderOptions, Value, render_str};
//!
//! let mut env = Environment::new();
//! env.set_immutable("x", Value::Int(3));
//!
//! let template = "% x = 10\nx is {x}, twice is {y = 2 * x}\n";
//! let (output, _env) = render_str(template, &env, &RenderOptions::new())?;
//! assert_eq!(output, "x is 3, twice is 6\n");
//! ```

pub mod compiler;
pub mod env;
pub mod error;
pub mod format;
pub mod interp;
pub mod lang;
pub mod params;
pub mod preparse;
pub mod render;
pub mod resolver;
pub mod scanner;
mod stack;
pub mod syntax;
pub mod value;

// Re-export main types at crate root
pub use env::Environment;
pub use error::{ErrorKind, Location, TemplateError, TemplateResult};
pub use lang::ast::Program;
pub use render::{RenderOptions, Session, render, render_file, render_str};
pub use resolver::{FileSystemResolver, IncludeResolver, MemoryResolver};
pub use syntax::Syntax;
pub use value::{Dict, Value};
