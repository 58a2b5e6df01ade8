/*
 * scanner.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Delimiter-aware scanning.
//!
//! [`scan`] finds `OPEN ... CLOSE` spans in free-form text. A close delimiter
//! inside a correctly paired quoted string (single, double or triple quoted)
//! does not end a span, and an open delimiter immediately preceded by a
//! backslash never starts one. When the two delimiters differ, nested
//! `OPEN ... CLOSE` pairs inside a span are balanced, so `{ {'a': 1}['a'] }`
//! is one capture.
//!
//! All offsets are byte offsets. Delimiters and quotes are compared as byte
//! strings, which is safe for UTF-8 because a multi-byte sequence can never
//! match starting from a continuation byte.

use std::ops::Range;

/// Generator of masking tokens that are guaranteed not to occur in the text
/// they mask. Tokens are numbered from a per-render counter, so masking is
/// reproducible.
#[derive(Debug, Clone)]
pub struct Placeholders {
    prefix: String,
    counter: usize,
}

const PLACEHOLDER_MARK: char = '\u{1A}';

impl Placeholders {
    /// Create a generator whose tokens cannot collide with anything in `text`.
    pub fn new(text: &str) -> Self {
        let mut prefix = format!("{PLACEHOLDER_MARK}PP");
        while text.contains(&prefix) {
            prefix.insert(0, PLACEHOLDER_MARK);
        }
        Self { prefix, counter: 0 }
    }

    pub fn next_token(&mut self) -> String {
        self.counter += 1;
        format!("{}{}{PLACEHOLDER_MARK}", self.prefix, self.counter)
    }
}

/// Find the end (exclusive) of the quoted string starting at `at`, if `at`
/// starts a correctly paired one. Single-character quotes may not span lines.
pub(crate) fn quoted_end(text: &str, at: usize) -> Option<usize> {
    let rest = &text.as_bytes()[at..];
    for triple in [&b"'''"[..], &b"\"\"\""[..]] {
        if rest.starts_with(triple) {
            return find_unescaped(text, at + 3, triple, true).map(|end| end + 3);
        }
    }
    let quote: &[u8] = match rest.first() {
        Some(b'\'') => b"'",
        Some(b'"') => b"\"",
        _ => return None,
    };
    find_unescaped(text, at + 1, quote, false).map(|end| end + 1)
}

fn find_unescaped(text: &str, from: usize, needle: &[u8], multiline: bool) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut i = from;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' if !multiline => return None,
            _ if bytes[i..].starts_with(needle) => return Some(i),
            _ => i += 1,
        }
    }
    None
}

fn is_escaped(bytes: &[u8], at: usize) -> bool {
    at > 0 && bytes[at - 1] == b'\\'
}

/// Next unescaped occurrence of `open` at or after `from`.
pub fn find_open(text: &str, from: usize, open: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let open = open.as_bytes();
    let mut i = from;
    while i + open.len() <= bytes.len() {
        if bytes[i..].starts_with(open) && !is_escaped(bytes, i) {
            return Some(i);
        }
        i += 1;
    }
    None
}

/// Position of the `close` delimiter matching an `open` that ended at `from`.
pub fn find_close(text: &str, from: usize, open: &str, close: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let (open_b, close_b) = (open.as_bytes(), close.as_bytes());
    let nests = open != close;
    let mut depth = 0usize;
    let mut i = from;
    while i < bytes.len() {
        if let Some(end) = quoted_end(text, i) {
            i = end;
            continue;
        }
        if nests && bytes[i..].starts_with(open_b) && !is_escaped(bytes, i) {
            depth += 1;
            i += open_b.len();
            continue;
        }
        if bytes[i..].starts_with(close_b) {
            if depth == 0 {
                return Some(i);
            }
            depth -= 1;
            i += close_b.len();
            continue;
        }
        i += 1;
    }
    None
}

/// Byte ranges (delimiters included) of every top-level capture in `text`.
///
/// An open delimiter with no matching close ends the scan; the remainder is
/// left alone.
pub fn capture_ranges(text: &str, open: &str, close: &str) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut pos = 0;
    while let Some(start) = find_open(text, pos, open) {
        let Some(close_at) = find_close(text, start + open.len(), open, close) else {
            break;
        };
        let end = close_at + close.len();
        ranges.push(start..end);
        pos = end;
    }
    ranges
}

/// Replace every capture with the output of `replacer`.
///
/// Returns the captured spans (delimiters included) and the rewritten text.
pub fn scan<F>(text: &str, open: &str, close: &str, mut replacer: F) -> (Vec<String>, String)
where
    F: FnMut(&str) -> String,
{
    let mut captures = Vec::new();
    let mut output = String::with_capacity(text.len());
    let mut pos = 0;
    for range in capture_ranges(text, open, close) {
        output.push_str(&text[pos..range.start]);
        let capture = &text[range.clone()];
        output.push_str(&replacer(capture));
        captures.push(capture.to_string());
        pos = range.end;
    }
    output.push_str(&text[pos..]);
    (captures, output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn identity(text: &str, open: &str, close: &str) -> Vec<String> {
        scan(text, open, close, |c| c.to_string()).0
    }

    #[test]
    fn test_quote_aware_capture() {
        let text = "{%te\"%}\"ing%}";
        assert_eq!(identity(text, "{%", "%}"), vec![text.to_string()]);
    }

    #[test]
    fn test_triple_quotes_span_lines() {
        let text = "{% s = '''a\n%}\n''' %} tail";
        assert_eq!(identity(text, "{%", "%}"), vec!["{% s = '''a\n%}\n''' %}"]);
    }

    #[test]
    fn test_unpaired_quote_is_ordinary() {
        assert_eq!(identity("{x}'s and {y}", "{", "}"), vec!["{x}", "{y}"]);
        assert_eq!(identity("{ it's }", "{", "}"), vec!["{ it's }"]);
    }

    #[test]
    fn test_nested_same_character_delimiters() {
        assert_eq!(
            identity("A { {'a': 1}['a'] } B {c}", "{", "}"),
            vec!["{ {'a': 1}['a'] }", "{c}"]
        );
    }

    #[test]
    fn test_escaped_open_is_skipped() {
        assert_eq!(identity(r"\{a} {b}", "{", "}"), vec!["{b}"]);
    }

    #[test]
    fn test_unclosed_open_leaves_remainder() {
        let (captures, output) = scan("x {a} y {b", "{", "}", |_| "#".to_string());
        assert_eq!(captures, vec!["{a}"]);
        assert_eq!(output, "x # y {b");
    }

    #[test]
    fn test_placeholders_avoid_input() {
        let text = format!("{PLACEHOLDER_MARK}PP1{PLACEHOLDER_MARK}");
        let mut placeholders = Placeholders::new(&text);
        let token = placeholders.next_token();
        assert!(!text.contains(&token));
        assert_ne!(token, placeholders.next_token());
    }

    #[test]
    fn test_multibyte_text() {
        assert_eq!(identity("é{ \"ü}\" }ß", "{", "}"), vec!["{ \"ü}\" }"]);
    }
}
