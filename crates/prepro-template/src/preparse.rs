/*
 * preparse.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Text-level normalization that runs before compilation.
//!
//! The passes run in a fixed order; each assumes the previous ones are done:
//!
//! 1. Existing code blocks are swapped for placeholders.
//! 2. Single-line code markers become placeholder code blocks.
//! 3. Backslash-escaped inline delimiters become inert markers.
//! 4. Inline assignments are split into a statement span plus an echo span,
//!    and disallowed variable names are fixed up.
//! 5. Code blocks are restored.
//!
//! Inert markers survive into the compiled program's literal text and are
//! turned back into delimiters by [`EscapeMarkers::restore`].

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::error::{TemplateError, TemplateResult};
use crate::scanner::{Placeholders, quoted_end, scan};
use crate::syntax::Syntax;

static ASSIGN_TARGET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+(?::[A-Za-z0-9_]+)*$").expect("valid regex"));

/// Markers standing in for backslash-escaped inline delimiters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscapeMarkers {
    open_marker: String,
    close_marker: String,
    open: String,
    close: String,
}

impl EscapeMarkers {
    /// Replace markers with the literal delimiters they stand for.
    pub fn restore(&self, text: &str) -> String {
        if !text.contains(&self.open_marker) && !text.contains(&self.close_marker) {
            return text.to_string();
        }
        text.replace(&self.open_marker, &self.open)
            .replace(&self.close_marker, &self.close)
    }
}

/// Output of [`preparse`].
#[derive(Debug, Clone)]
pub struct Preparsed {
    pub text: String,
    pub escapes: EscapeMarkers,
}

/// Rewrite a variable name that is not a valid identifier.
///
/// Colons become underscores and a leading digit gets an `i` prefix, so
/// `ASV_1:fn1` becomes `ASV_1_fn1` and `2x` becomes `i2x`.
pub fn fix_name(name: &str) -> String {
    let mut fixed = name.replace(':', "_");
    if fixed.starts_with(|c: char| c.is_ascii_digit()) {
        fixed.insert(0, 'i');
    }
    fixed
}

/// Names rewritten by [`fix_name`] during one render.
///
/// Later reads of an original name inside inline spans are rewritten the
/// same way. Quoted occurrences are left alone, so `"ASV_1:fn1"` stays a
/// string.
#[derive(Debug, Clone, Default)]
pub struct NameFixups {
    renames: IndexMap<String, String>,
}

impl NameFixups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix `name`, remembering the rename if it changed anything.
    pub fn fix(&mut self, name: &str) -> String {
        let fixed = fix_name(name);
        if fixed != name {
            self.renames.insert(name.to_string(), fixed.clone());
        }
        fixed
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.renames.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.renames.is_empty()
    }

    /// Rewrite unquoted, identifier-bounded occurrences of renamed names.
    pub fn apply(&self, expr: &str) -> String {
        if self.renames.is_empty() {
            return expr.to_string();
        }
        let mut output = String::with_capacity(expr.len());
        let mut segment_start = 0;
        let mut i = 0;
        while i < expr.len() {
            if let Some(end) = quoted_end(expr, i) {
                output.push_str(&self.apply_unquoted(&expr[segment_start..i]));
                output.push_str(&expr[i..end]);
                segment_start = end;
                i = end;
            } else {
                i += 1;
            }
        }
        output.push_str(&self.apply_unquoted(&expr[segment_start..]));
        output
    }

    fn apply_unquoted(&self, segment: &str) -> String {
        let mut text = segment.to_string();
        for (original, fixed) in &self.renames {
            text = replace_bounded(&text, original, fixed);
        }
        text
    }
}

fn is_name_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == ':'
}

fn replace_bounded(text: &str, needle: &str, replacement: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut pos = 0;
    while let Some(offset) = text[pos..].find(needle) {
        let start = pos + offset;
        let end = start + needle.len();
        let before_ok = text[..start].chars().next_back().is_none_or(|c| !is_name_char(c));
        let after_ok = text[end..].chars().next().is_none_or(|c| !is_name_char(c));
        output.push_str(&text[pos..start]);
        if before_ok && after_ok {
            output.push_str(replacement);
        } else {
            output.push_str(needle);
        }
        pos = end;
    }
    output.push_str(&text[pos..]);
    output
}

struct Preparser<'a> {
    syntax: &'a Syntax,
    placeholders: Placeholders,
    code_blocks: IndexMap<String, String>,
}

impl Preparser<'_> {
    fn protect_code_blocks(&mut self, text: &str) -> String {
        let (block_open, block_close) = (&self.syntax.block_open, &self.syntax.block_close);
        let mut protected = IndexMap::new();
        let placeholders = &mut self.placeholders;
        let (captures, text) = scan(text, block_open, block_close, |capture| {
            let token = placeholders.next_token();
            protected.insert(token.clone(), capture.to_string());
            token
        });
        debug!(count = captures.len(), "protected code blocks");
        self.code_blocks.extend(protected);
        text
    }

    fn promote_code_lines(&mut self, text: &str) -> TemplateResult<String> {
        let marker = regex::escape(&self.syntax.line_marker);
        let pattern = Regex::new(&format!(r"(?m)^([ \t]*){marker}(.*)$"))
            .map_err(|err| TemplateError::configuration(format!("Invalid code delimiter: {err}")))?;
        let mut promoted = 0usize;
        let text = pattern.replace_all(text, |caps: &regex::Captures| {
            let indent = &caps[1];
            let body = &caps[2];
            let (body, cr) = match body.strip_suffix('\r') {
                Some(stripped) => (stripped, "\r"),
                None => (body, ""),
            };
            let token = self.placeholders.next_token();
            let block = format!(
                "{}{}{}",
                self.syntax.block_open, body, self.syntax.block_close
            );
            self.code_blocks.insert(token.clone(), block);
            promoted += 1;
            format!("{indent}{token}{cr}")
        });
        debug!(count = promoted, "promoted single-line code");
        Ok(text.into_owned())
    }

    fn normalize_escapes(&mut self, text: &str) -> (String, EscapeMarkers) {
        let (open, close) = (&self.syntax.inline_open, &self.syntax.inline_close);
        let mut masked = IndexMap::new();
        let placeholders = &mut self.placeholders;
        let (_, text) = scan(text, open, close, |capture| {
            let token = placeholders.next_token();
            masked.insert(token.clone(), capture.to_string());
            token
        });
        let escapes = EscapeMarkers {
            open_marker: self.placeholders.next_token(),
            close_marker: self.placeholders.next_token(),
            open: open.clone(),
            close: close.clone(),
        };
        let text = unescape_delimiter(&text, open, &escapes.open_marker);
        let text = unescape_delimiter(&text, close, &escapes.close_marker);
        (restore(&text, &masked), escapes)
    }

    fn rewrite_inline(&self, text: &str, fixups: &mut NameFixups) -> String {
        let (open, close) = (&self.syntax.inline_open, &self.syntax.inline_close);
        let (_, text) = scan(text, open, close, |capture| {
            let inner = &capture[open.len()..capture.len() - close.len()];
            match split_assignment(inner) {
                Some(assignment) => {
                    let target = fixups.fix(assignment.target);
                    let value = fixups.apply(assignment.value);
                    let statement = if assignment.op.is_empty() {
                        format!("{target} = {value}")
                    } else {
                        format!("{target} = {target} {} ({value})", assignment.op)
                    };
                    format!("{open}{statement}{close}{open}{target}{close}")
                }
                None => format!("{open}{}{close}", fixups.apply(inner)),
            }
        });
        text
    }
}

/// `\OPEN` becomes the marker; `\\OPEN` becomes a literal backslash followed
/// by the marker.
fn unescape_delimiter(text: &str, delim: &str, marker: &str) -> String {
    let bytes = text.as_bytes();
    let mut output = String::with_capacity(text.len());
    let mut pos = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' {
            i += 1;
            continue;
        }
        let run_start = i;
        while i < bytes.len() && bytes[i] == b'\\' {
            i += 1;
        }
        if bytes[i..].starts_with(delim.as_bytes()) {
            let run = i - run_start;
            output.push_str(&text[pos..run_start]);
            output.push_str(&"\\".repeat(run - 1));
            output.push_str(marker);
            i += delim.len();
            pos = i;
        }
    }
    output.push_str(&text[pos..]);
    output
}

fn restore(text: &str, masked: &IndexMap<String, String>) -> String {
    let mut text = text.to_string();
    for (token, original) in masked.iter().rev() {
        if text.contains(token.as_str()) {
            text = text.replace(token.as_str(), original);
        }
    }
    text
}

#[derive(Debug, PartialEq, Eq)]
struct Assignment<'a> {
    target: &'a str,
    op: &'a str,
    value: &'a str,
}

/// Split `var OP val` where OP is `=` or an augmented assignment operator.
///
/// Comparisons (`==`, `<=`, `>=`, `!=`) and anything whose left-hand side
/// is not a plain (possibly colon-joined) name are left alone.
fn split_assignment(inner: &str) -> Option<Assignment<'_>> {
    if inner.trim_start().starts_with('!') {
        return None;
    }
    let bytes = inner.as_bytes();
    let mut i = 0;
    let eq = loop {
        if i >= bytes.len() {
            return None;
        }
        if let Some(end) = quoted_end(inner, i) {
            i = end;
            continue;
        }
        if bytes[i] == b'=' {
            break i;
        }
        i += 1;
    };
    if bytes.get(eq + 1) == Some(&b'=') {
        return None;
    }
    let mut op_start = eq;
    while op_start > 0 && b"+-*/%&|^<>@!".contains(&bytes[op_start - 1]) {
        op_start -= 1;
    }
    let op = &inner[op_start..eq];
    if matches!(op, "<" | ">" | "!") || !is_augmented(op) {
        return None;
    }
    let target = inner[..op_start].trim();
    let value = inner[eq + 1..].trim();
    if value.is_empty()
        || !ASSIGN_TARGET.is_match(target)
        || target.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    Some(Assignment { target, op, value })
}

fn is_augmented(op: &str) -> bool {
    matches!(
        op,
        "" | "+" | "-" | "*" | "/" | "//" | "%" | "**" | "&" | "|" | "^" | "<<" | ">>" | "@"
    )
}

/// Run all preparse passes over `text`.
pub fn preparse(text: &str, syntax: &Syntax, fixups: &mut NameFixups) -> TemplateResult<Preparsed> {
    syntax.validate()?;
    let mut preparser = Preparser {
        syntax,
        placeholders: Placeholders::new(text),
        code_blocks: IndexMap::new(),
    };
    let text = preparser.protect_code_blocks(text);
    let text = preparser.promote_code_lines(&text)?;
    let (text, escapes) = preparser.normalize_escapes(&text);
    let text = preparser.rewrite_inline(&text, fixups);
    let text = restore(&text, &preparser.code_blocks);
    Ok(Preparsed { text, escapes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn run(text: &str) -> Preparsed {
        preparse(text, &Syntax::default(), &mut NameFixups::new()).unwrap()
    }

    #[test]
    fn test_plain_text_unchanged() {
        let text = "no syntax here\n  at all\n";
        assert_eq!(run(text).text, text);
    }

    #[test]
    fn test_assignment_split() {
        assert_eq!(run("{a = 5}").text, "{a = 5}{a}");
        assert_eq!(run("{ p += 1 }").text, "{p = p + (1)}{p}");
        assert_eq!(run("{x **= 2}").text, "{x = x ** (2)}{x}");
    }

    #[test]
    fn test_comparisons_not_split() {
        for text in ["{a == 5}", "{a <= 5}", "{a >= 5}", "{a != 5}"] {
            assert_eq!(run(text).text, text);
        }
    }

    #[test]
    fn test_non_name_targets_not_split() {
        for text in ["{f(x=1)}", "{'a=b'}", "{d['k'] = 1}", "{!x}"] {
            assert_eq!(run(text).text, text);
        }
    }

    #[test]
    fn test_name_fixups() {
        let mut fixups = NameFixups::new();
        let out = preparse(
            "{ ASV_1:fun1 = 1}\n{ ASV_1:fun1 }\n{ 'ASV_1:fun1' }\n{2x = 3}",
            &Syntax::default(),
            &mut fixups,
        )
        .unwrap();
        assert_eq!(
            out.text,
            "{ASV_1_fun1 = 1}{ASV_1_fun1}\n{ ASV_1_fun1 }\n{ 'ASV_1:fun1' }\n{i2x = 3}{i2x}"
        );
        assert_eq!(fixups.get("2x"), Some("i2x"));
    }

    #[test]
    fn test_code_lines_promoted_and_restored() {
        let out = run("  % x = 1\ntext {x}\n");
        assert_eq!(out.text, "  {% x = 1%}\ntext {x}\n");
    }

    #[test]
    fn test_code_blocks_protected_from_inline_rewrite() {
        let text = "{%\nd = {'a': 1}\n%}\n{d['a']}";
        assert_eq!(run(text).text, text);
    }

    #[test]
    fn test_escaped_delimiters() {
        let out = run(r"\{a=5} \{b\} \\{c}");
        let restored = out.escapes.restore(&out.text);
        assert_eq!(restored, r"{a=5} {b} \{c}");
        assert!(!out.text.contains('{'));
    }

    #[test]
    fn test_custom_syntax() {
        let syntax = Syntax::from_pairs("<% %>", "$", "[[ ]]").unwrap();
        let out = preparse("$ y = 2\n[[x = 3]]", &syntax, &mut NameFixups::new()).unwrap();
        assert_eq!(out.text, "<% y = 2%>\n[[x = 3]][[x]]");
    }

    #[test]
    fn test_bracket_block_delimiter_fails_fast() {
        let syntax = Syntax {
            block_open: "{{".to_string(),
            block_close: "}}".to_string(),
            ..Syntax::default()
        };
        let err = preparse("x", &syntax, &mut NameFixups::new()).unwrap_err();
        assert_eq!(err.class_name(), "ConfigurationError");
    }
}
