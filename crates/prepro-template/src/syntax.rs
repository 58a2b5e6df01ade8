/*
 * syntax.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Delimiter configuration.
//!
//! All delimiters are literal substrings. Nothing here is ever interpreted as
//! a regular expression; callers that build patterns from them must escape.

use crate::error::{TemplateError, TemplateResult};

pub const DEFAULT_CODE_BLOCK: &str = "{% %}";
pub const DEFAULT_CODE: &str = "%";
pub const DEFAULT_INLINE: &str = "{ }";

/// The five delimiters recognized by the preparser and the compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Syntax {
    pub block_open: String,
    pub block_close: String,
    pub line_marker: String,
    pub inline_open: String,
    pub inline_close: String,
}

impl Default for Syntax {
    fn default() -> Self {
        Self {
            block_open: "{%".to_string(),
            block_close: "%}".to_string(),
            line_marker: "%".to_string(),
            inline_open: "{".to_string(),
            inline_close: "}".to_string(),
        }
    }
}

impl Syntax {
    /// Build a syntax from command-line style pairs, e.g. `("{% %}", "%", "{ }")`.
    pub fn from_pairs(code_block: &str, code: &str, inline: &str) -> TemplateResult<Self> {
        let (block_open, block_close) = split_pair(code_block, "code block")?;
        let (inline_open, inline_close) = split_pair(inline, "inline")?;
        let line_marker = code.trim();
        if line_marker.is_empty() || line_marker.contains(char::is_whitespace) {
            return Err(TemplateError::configuration(format!(
                "Invalid code delimiter {code:?}: must be a single non-empty token"
            )));
        }
        let syntax = Self {
            block_open,
            block_close,
            line_marker: line_marker.to_string(),
            inline_open,
            inline_close,
        };
        syntax.validate()?;
        Ok(syntax)
    }

    /// Reject configurations the scanner cannot disambiguate.
    ///
    /// The innermost characters of the code-block delimiters sit right next
    /// to Python code, so they may not be brackets.
    pub fn validate(&self) -> TemplateResult<()> {
        let inner_open = self.block_open.chars().last();
        let inner_close = self.block_close.chars().next();
        for ch in [inner_open, inner_close].into_iter().flatten() {
            if matches!(ch, '{' | '}' | '[' | ']' | '(' | ')') {
                return Err(TemplateError::configuration(format!(
                    "Code block delimiters {} {} may not have '{ch}' as the innermost \
                     character; it is ambiguous with brackets inside the code",
                    self.block_open, self.block_close
                )));
            }
        }
        if self.block_open == self.inline_open {
            return Err(TemplateError::configuration(
                "Code block and inline delimiters must differ",
            ));
        }
        for (label, delim) in [
            ("code block open", &self.block_open),
            ("code block close", &self.block_close),
            ("inline open", &self.inline_open),
            ("inline close", &self.inline_close),
        ] {
            if delim.is_empty() {
                return Err(TemplateError::configuration(format!(
                    "The {label} delimiter may not be empty"
                )));
            }
        }
        Ok(())
    }
}

fn split_pair(pair: &str, label: &str) -> TemplateResult<(String, String)> {
    let parts: Vec<&str> = pair.split_whitespace().collect();
    match parts.as_slice() {
        [open, close] => Ok((open.to_string(), close.to_string())),
        _ => Err(TemplateError::configuration(format!(
            "Invalid {label} delimiter {pair:?}: expected OPEN and CLOSE separated by a space"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_round_trip() {
        let syntax = Syntax::from_pairs(DEFAULT_CODE_BLOCK, DEFAULT_CODE, DEFAULT_INLINE).unwrap();
        assert_eq!(syntax, Syntax::default());
    }

    #[test]
    fn test_custom_pairs() {
        let syntax = Syntax::from_pairs("<% %>", "$", "{{ }}").unwrap();
        assert_eq!(syntax.block_open, "<%");
        assert_eq!(syntax.block_close, "%>");
        assert_eq!(syntax.line_marker, "$");
        assert_eq!(syntax.inline_open, "{{");
        assert_eq!(syntax.inline_close, "}}");
    }

    #[test]
    fn test_bracket_inner_character_rejected() {
        let err = Syntax::from_pairs("{{ }}", "%", "[ ]").unwrap_err();
        assert_eq!(err.class_name(), "ConfigurationError");
        let err = Syntax::from_pairs("%( )%", "%", "{ }").unwrap_err();
        assert_eq!(err.class_name(), "ConfigurationError");
    }

    #[test]
    fn test_malformed_pair_rejected() {
        assert!(Syntax::from_pairs("{%", "%", "{ }").is_err());
        assert!(Syntax::from_pairs("{% %}", "", "{ }").is_err());
    }
}
