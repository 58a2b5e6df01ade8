/*
 * lexer.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Tokenizer for the embedded expression language.
//!
//! [`tokenize_lines`] splits a code region into logical lines: a newline
//! ends a line only outside brackets, and a backslash before a newline
//! joins two physical lines. Comments run from `#` to the end of the line.
//! Indentation carries no meaning.

use crate::error::{TemplateError, TemplateResult};

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    Op(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    /// 1-based template line the token starts on.
    pub line: usize,
}

impl Token {
    pub fn is_op(&self, op: &str) -> bool {
        matches!(&self.tok, Tok::Op(o) if *o == op)
    }

    pub fn is_name(&self, name: &str) -> bool {
        matches!(&self.tok, Tok::Name(n) if n == name)
    }

    /// Short description for error messages.
    pub fn describe(&self) -> String {
        match &self.tok {
            Tok::Name(name) => format!("'{name}'"),
            Tok::Int(i) => i.to_string(),
            Tok::Float(x) => x.to_string(),
            Tok::Str(_) => "string literal".to_string(),
            Tok::Op(op) => format!("'{op}'"),
        }
    }
}

/// Tokens of one logical source line.
#[derive(Debug, Clone)]
pub struct LogicalLine {
    pub tokens: Vec<Token>,
    pub line: usize,
}

// Longest first, so that prefixes never shadow longer operators.
const OPERATORS: &[&str] = &[
    "**=", "//=", ">>=", "<<=", "**", "//", "==", "!=", "<=", ">=", "<<", ">>", "+=", "-=", "*=",
    "/=", "%=", "&=", "|=", "^=", "@=", "->", "+", "-", "*", "/", "%", "<", ">", "=", "(", ")",
    "[", "]", "{", "}", ",", ":", ".", ";", "&", "|", "^", "~", "@",
];

/// Split `source` into logical lines. `first_line` is the template line of
/// the first character.
pub fn tokenize_lines(source: &str, first_line: usize) -> TemplateResult<Vec<LogicalLine>> {
    Lexer::new(source, first_line, true).run()
}

/// Tokenize a single expression or inline statement list; newlines count as
/// whitespace.
pub fn tokenize(source: &str, line: usize) -> TemplateResult<Vec<Token>> {
    Ok(Lexer::new(source, line, false)
        .run()?
        .into_iter()
        .flat_map(|logical| logical.tokens)
        .collect())
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
    depth: usize,
    split_lines: bool,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str, line: usize, split_lines: bool) -> Self {
        Self {
            src,
            pos: 0,
            line,
            depth: 0,
            split_lines,
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(n)
    }

    fn error(&self, message: impl Into<String>) -> TemplateError {
        TemplateError::Syntax {
            message: message.into(),
            location: None,
        }
    }

    fn run(mut self) -> TemplateResult<Vec<LogicalLine>> {
        let mut lines = Vec::new();
        let mut current: Vec<Token> = Vec::new();
        while let Some(ch) = self.peek() {
            match ch {
                '\n' => {
                    self.pos += 1;
                    self.line += 1;
                    if self.split_lines && self.depth == 0 && !current.is_empty() {
                        let line = current[0].line;
                        lines.push(LogicalLine {
                            tokens: std::mem::take(&mut current),
                            line,
                        });
                    }
                }
                ' ' | '\t' | '\r' | '\x0c' => self.pos += 1,
                '#' => {
                    let rest = &self.src[self.pos..];
                    self.pos += rest.find('\n').unwrap_or(rest.len());
                }
                '\\' => {
                    let rest = &self.src[self.pos + 1..];
                    let skip = if rest.starts_with('\n') {
                        1
                    } else if rest.starts_with("\r\n") {
                        2
                    } else {
                        return Err(self.error(
                            "unexpected character after line continuation character",
                        ));
                    };
                    self.pos += 1 + skip;
                    self.line += 1;
                }
                '\'' | '"' => {
                    let line = self.line;
                    let text = self.string(false)?;
                    current.push(Token {
                        tok: Tok::Str(text),
                        line,
                    });
                }
                c if c.is_ascii_digit() || (c == '.' && self.peek_nth(1).is_some_and(|d| d.is_ascii_digit())) => {
                    let line = self.line;
                    let tok = self.number()?;
                    current.push(Token { tok, line });
                }
                c if c.is_alphabetic() || c == '_' => {
                    let line = self.line;
                    let start = self.pos;
                    while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
                        self.pos += self.peek().map_or(1, char::len_utf8);
                    }
                    let word = &self.src[start..self.pos];
                    let is_prefix = matches!(
                        word.to_ascii_lowercase().as_str(),
                        "r" | "u" | "b" | "br" | "rb"
                    );
                    if is_prefix && matches!(self.peek(), Some('\'' | '"')) {
                        let raw = word.to_ascii_lowercase().contains('r');
                        let text = self.string(raw)?;
                        current.push(Token {
                            tok: Tok::Str(text),
                            line,
                        });
                    } else {
                        current.push(Token {
                            tok: Tok::Name(word.to_string()),
                            line,
                        });
                    }
                }
                c => {
                    let rest = &self.src[self.pos..];
                    let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(**op)) else {
                        return Err(self.error(format!("invalid character '{c}' in code")));
                    };
                    match *op {
                        "(" | "[" | "{" => self.depth += 1,
                        ")" | "]" | "}" => self.depth = self.depth.saturating_sub(1),
                        _ => {}
                    }
                    self.pos += op.len();
                    current.push(Token {
                        tok: Tok::Op(*op),
                        line: self.line,
                    });
                }
            }
        }
        if !current.is_empty() {
            let line = current[0].line;
            lines.push(LogicalLine {
                tokens: current,
                line,
            });
        }
        Ok(lines)
    }

    fn number(&mut self) -> TemplateResult<Tok> {
        let rest = &self.src[self.pos..];
        let lower = rest.get(..2).map(str::to_ascii_lowercase);
        let radix = match lower.as_deref() {
            Some("0x") => Some(16),
            Some("0o") => Some(8),
            Some("0b") => Some(2),
            _ => None,
        };
        if let Some(radix) = radix {
            let digits: String = rest[2..]
                .chars()
                .take_while(|c| c.is_digit(radix) || *c == '_')
                .collect();
            self.pos += 2 + digits.len();
            let clean = digits.replace('_', "");
            return i64::from_str_radix(&clean, radix)
                .map(Tok::Int)
                .map_err(|_| self.error(format!("invalid number literal {}", &rest[..2 + digits.len()])));
        }
        let bytes = rest.as_bytes();
        let mut end = 0;
        let mut is_float = false;
        let digits_from = |mut i: usize| {
            while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'_') {
                i += 1;
            }
            i
        };
        end = digits_from(end);
        if bytes.get(end) == Some(&b'.') {
            is_float = true;
            end = digits_from(end + 1);
        }
        if matches!(bytes.get(end), Some(b'e' | b'E')) {
            let mut exp = end + 1;
            if matches!(bytes.get(exp), Some(b'+' | b'-')) {
                exp += 1;
            }
            if bytes.get(exp).is_some_and(u8::is_ascii_digit) {
                is_float = true;
                end = digits_from(exp);
            }
        }
        if matches!(bytes.get(end), Some(b'j' | b'J')) {
            return Err(self.error("complex numbers are not supported"));
        }
        let text = rest[..end].replace('_', "");
        self.pos += end;
        if !is_float {
            if let Ok(i) = text.parse::<i64>() {
                return Ok(Tok::Int(i));
            }
        }
        text.parse::<f64>()
            .map(Tok::Float)
            .map_err(|_| self.error(format!("invalid number literal {text}")))
    }

    /// Read a string literal starting at the opening quote.
    fn string(&mut self, raw: bool) -> TemplateResult<String> {
        let rest = &self.src[self.pos..];
        let quote = if rest.starts_with("'''") {
            "'''"
        } else if rest.starts_with("\"\"\"") {
            "\"\"\""
        } else if rest.starts_with('\'') {
            "'"
        } else {
            "\""
        };
        let triple = quote.len() == 3;
        self.pos += quote.len();
        let mut out = String::new();
        loop {
            let rest = &self.src[self.pos..];
            if rest.starts_with(quote) {
                self.pos += quote.len();
                return Ok(out);
            }
            let Some(ch) = rest.chars().next() else {
                return Err(self.error("EOF while scanning string literal"));
            };
            self.pos += ch.len_utf8();
            match ch {
                '\n' if !triple => return Err(self.error("EOL while scanning string literal")),
                '\n' => {
                    self.line += 1;
                    out.push('\n');
                }
                '\\' => {
                    let Some(next) = self.peek() else {
                        return Err(self.error("EOF while scanning string literal"));
                    };
                    self.pos += next.len_utf8();
                    if next == '\n' {
                        self.line += 1;
                    }
                    if raw {
                        out.push('\\');
                        out.push(next);
                        continue;
                    }
                    self.escape(next, &mut out)?;
                }
                other => out.push(other),
            }
        }
    }

    fn escape(&mut self, ch: char, out: &mut String) -> TemplateResult<()> {
        match ch {
            '\n' => {}
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'v' => out.push('\x0b'),
            '0'..='7' => {
                let mut value = ch.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match self.peek().and_then(|c| c.to_digit(8)) {
                        Some(d) => {
                            value = value * 8 + d;
                            self.pos += 1;
                        }
                        None => break,
                    }
                }
                out.push(char::from_u32(value).unwrap_or('\u{FFFD}'));
            }
            'x' | 'u' | 'U' => {
                let width = match ch {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let hex = self.src.get(self.pos..self.pos + width).unwrap_or("");
                let code = u32::from_str_radix(hex, 16)
                    .ok()
                    .filter(|_| hex.len() == width)
                    .and_then(char::from_u32)
                    .ok_or_else(|| self.error(format!("truncated \\{ch} escape")))?;
                self.pos += width;
                out.push(code);
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(source: &str) -> Vec<Tok> {
        tokenize(source, 1).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn test_operators_and_names() {
        assert_eq!(
            toks("a **= b//2"),
            vec![
                Tok::Name("a".into()),
                Tok::Op("**="),
                Tok::Name("b".into()),
                Tok::Op("//"),
                Tok::Int(2),
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(toks("1_000 0x1F 2.5e3 .5 7."), vec![
            Tok::Int(1000),
            Tok::Int(31),
            Tok::Float(2500.0),
            Tok::Float(0.5),
            Tok::Float(7.0),
        ]);
    }

    #[test]
    fn test_strings_and_escapes() {
        assert_eq!(toks(r#"'a\tb' "it's" r'\d'"#), vec![
            Tok::Str("a\tb".into()),
            Tok::Str("it's".into()),
            Tok::Str("\\d".into()),
        ]);
        assert!(tokenize("'open", 1).is_err());
    }

    #[test]
    fn test_logical_lines_join_inside_brackets() {
        let lines = tokenize_lines("x = [1,\n  2]\ny = 3 \\\n  + 4 # note\n\nz = 5", 10).unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].line, 10);
        assert_eq!(lines[1].line, 12);
        assert_eq!(lines[2].line, 15);
        assert_eq!(lines[1].tokens.len(), 5);
    }

    #[test]
    fn test_triple_quoted_string_spans_lines() {
        let lines = tokenize_lines("s = '''a\nb'''\nt = 1", 1).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].tokens[2].tok, Tok::Str("a\nb".into()));
        assert_eq!(lines[1].line, 3);
    }
}
