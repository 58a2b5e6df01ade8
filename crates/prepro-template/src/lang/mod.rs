/*
 * mod.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! The embedded expression language: tokens, syntax tree and parser.

pub mod ast;
pub mod lexer;
pub mod parser;
