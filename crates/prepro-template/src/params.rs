/*
 * params.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Parameter files and JSON includes.
//!
//! Dakota writes parameter files in two layouts. The standard layout has
//! counted sections of `value name` rows:
//!
//! ```text
//!                     2 variables
//!  1.500000000000000e+00 x1
//!  1.500000000000000e+00 x2
//!                     1 functions
//!                     1 ASV_1:response_fn_1
//!                     1 eval_id
//! ```
//!
//! The APREPRO layout wraps every row in braces:
//!
//! ```text
//! { DAKOTA_VARS     =                      2 }
//! { x1              =  1.500000000000000e+00 }
//! ```
//!
//! Both produce `(name, value)` pairs with names fixed up the same way
//! inline assignments are, ready to be bound as immutable variables. The
//! renames travel with the entries so that templates can still spell a
//! response as `{ASV_1:response_fn_1}`.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::env::Environment;
use crate::error::{TemplateError, TemplateResult};
use crate::preparse::NameFixups;
use crate::render::STRING_SOURCE;
use crate::value::Value;

/// Section keywords of the standard layout that are followed by a count.
const COUNTED_SECTIONS: &[&str] = &[
    "variables",
    "functions",
    "derivative_variables",
    "analysis_components",
    "metadata",
];

/// APREPRO count keywords and the section each one announces.
const APREPRO_COUNTS: &[(&str, &str)] = &[
    ("DAKOTA_VARS", "variables"),
    ("DAKOTA_FNS", "functions"),
    ("DAKOTA_DER_VARS", "derivative_variables"),
    ("DAKOTA_AN_COMPS", "analysis_components"),
    ("DAKOTA_METADATA", "metadata"),
];

static APREPRO_ROW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\{\s*(\S+)\s*=\s*(.*?)\s*\}$").expect("valid regex"));

/// A counted section still waiting for rows.
struct Pending {
    section: &'static str,
    expected: usize,
    seen: usize,
}

impl Pending {
    fn check_complete(&self) -> Result<(), String> {
        if self.seen < self.expected {
            return Err(format!(
                "expected {} {} but found {}",
                self.expected, self.section, self.seen
            ));
        }
        Ok(())
    }
}

fn parse_count(text: &str, line_no: usize) -> Result<usize, String> {
    text.trim()
        .parse::<usize>()
        .map_err(|_| format!("line {line_no}: invalid count {text:?}"))
}

/// Entries of a parameters file, in file order, with the name renames
/// applied while reading them.
#[derive(Debug, Clone, Default)]
pub struct Params {
    pub entries: Vec<(String, Value)>,
    pub fixups: NameFixups,
}

impl Params {
    fn push(&mut self, name: &str, value: &str) {
        let value = value.trim();
        let unquoted = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')));
        let value = match unquoted {
            Some(text) => Value::from(text),
            None => Value::from_cli_text(value),
        };
        let name = self.fixups.fix(name);
        self.entries.push((name, value));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_standard(text: &str) -> Result<Params, String> {
    let mut params = Params::default();
    let mut pending: Option<Pending> = None;
    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((value, name)) = line.rsplit_once(char::is_whitespace) else {
            return Err(format!("line {line_no}: unrecognized line {line:?}"));
        };
        if let Some(section) = pending.as_mut().filter(|p| p.seen < p.expected) {
            section.seen += 1;
            params.push(name, value);
            continue;
        }
        if let Some(&section) = COUNTED_SECTIONS.iter().find(|s| **s == name) {
            pending = Some(Pending {
                section,
                expected: parse_count(value, line_no)?,
                seen: 0,
            });
            continue;
        }
        params.push(name, value);
    }
    match pending {
        Some(section) => section.check_complete().map(|()| params),
        None => Ok(params),
    }
}

fn parse_aprepro(text: &str) -> Result<Params, String> {
    let mut params = Params::default();
    let mut pending: Option<Pending> = None;
    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let captures = APREPRO_ROW
            .captures(line)
            .ok_or_else(|| format!("line {line_no}: unrecognized line {line:?}"))?;
        let (name, value) = (&captures[1], &captures[2]);
        if let Some(section) = pending.as_mut().filter(|p| p.seen < p.expected) {
            section.seen += 1;
            params.push(name, value);
            continue;
        }
        if let Some(&(_, section)) = APREPRO_COUNTS.iter().find(|(key, _)| *key == name) {
            if let Some(previous) = &pending {
                previous.check_complete()?;
            }
            pending = Some(Pending {
                section,
                expected: parse_count(value, line_no)?,
                seen: 0,
            });
            continue;
        }
        let name = if name == "DAKOTA_EVAL_ID" { "eval_id" } else { name };
        params.push(name, value);
    }
    match pending {
        Some(section) => section.check_complete().map(|()| params),
        None => Ok(params),
    }
}

fn parse(text: &str) -> Result<Params, String> {
    let first = text.lines().map(str::trim).find(|line| !line.is_empty());
    match first {
        None => Ok(Params::default()),
        Some(line) if line.starts_with('{') => parse_aprepro(text),
        Some(_) => parse_standard(text),
    }
}

/// Parse parameter-file text in either layout.
pub fn parse_params(text: &str) -> TemplateResult<Params> {
    parse(text).map_err(|message| TemplateError::ParamsFormat {
        path: PathBuf::from(STRING_SOURCE),
        message,
    })
}

/// Read and parse a parameter file.
pub fn read_params(path: &Path) -> TemplateResult<Params> {
    let text = std::fs::read_to_string(path)?;
    let params = parse(&text).map_err(|message| TemplateError::ParamsFormat {
        path: path.to_path_buf(),
        message,
    })?;
    debug!(path = %path.display(), count = params.len(), "read parameters file");
    Ok(params)
}

/// Parse a JSON include: a single object whose members become variables.
pub fn parse_json_include(text: &str) -> TemplateResult<Vec<(String, Value)>> {
    let json: serde_json::Value = serde_json::from_str(text)?;
    let serde_json::Value::Object(members) = json else {
        return Err(TemplateError::value_error(
            "JSON include must contain an object at the top level",
        ));
    };
    Ok(members
        .iter()
        .map(|(name, value)| (name.clone(), Value::from_json(value)))
        .collect())
}

pub fn read_json_include(path: &Path) -> TemplateResult<Vec<(String, Value)>> {
    let text = std::fs::read_to_string(path)?;
    let entries = parse_json_include(&text)?;
    debug!(path = %path.display(), count = entries.len(), "read JSON include");
    Ok(entries)
}

/// Bind entries as immutable. Names already locked keep their values, so
/// the first layer to bind a name wins.
pub fn bind_immutable(env: &mut Environment, entries: impl IntoIterator<Item = (String, Value)>) {
    for (name, value) in entries {
        env.set_immutable(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn names(entries: &[(String, Value)]) -> Vec<&str> {
        entries.iter().map(|(name, _)| name.as_str()).collect()
    }

    #[test]
    fn test_standard_format() {
        let text = "\
                     2 variables
                      1.500000000000000e+00 x1
                      text_value x2
                     1 functions
                     1 ASV_1:response_fn_1
                     0 analysis_components
                     7 eval_id
";
        let Params { entries, fixups } = parse_params(text).unwrap();
        assert_eq!(names(&entries), vec!["x1", "x2", "ASV_1_response_fn_1", "eval_id"]);
        assert_eq!(fixups.get("ASV_1:response_fn_1"), Some("ASV_1_response_fn_1"));
        assert_eq!(fixups.get("x1"), None);
        assert!(entries[0].1.py_eq(&Value::Float(1.5)));
        assert_eq!(entries[1].1.to_str(), "text_value");
        assert!(entries[3].1.py_eq(&Value::Int(7)));
    }

    #[test]
    fn test_aprepro_format() {
        let text = "\
{ DAKOTA_VARS     =                      2 }
{ x1              =  1.500000000000000e+00 }
{ 2nd             =  \"a b\" }
{ DAKOTA_FNS      =                      1 }
{ ASV_1:response_fn_1 =                  1 }
{ DAKOTA_EVAL_ID  =                      3 }
";
        let Params { entries, fixups } = parse_params(text).unwrap();
        assert_eq!(fixups.get("2nd"), Some("i2nd"));
        assert_eq!(
            names(&entries),
            vec!["x1", "i2nd", "ASV_1_response_fn_1", "eval_id"]
        );
        assert_eq!(entries[1].1.to_str(), "a b");
    }

    #[test]
    fn test_count_mismatch() {
        let err = parse_params("3 variables\n1.0 x1\n").unwrap_err();
        assert_eq!(err.class_name(), "ParamsFormatError");
        assert!(err.to_string().contains("expected 3 variables but found 1"));
    }

    #[test]
    fn test_unrecognized_line() {
        let err = parse_params("lonely\n").unwrap_err();
        assert_eq!(err.class_name(), "ParamsFormatError");
        let err = parse_params("{ DAKOTA_VARS = 1 }\nnot braces\n").unwrap_err();
        assert_eq!(err.class_name(), "ParamsFormatError");
    }

    #[test]
    fn test_json_include() {
        let entries = parse_json_include(r#"{"a": 1, "b": [1.5, "x"], "c": null}"#).unwrap();
        assert_eq!(names(&entries), vec!["a", "b", "c"]);
        assert_eq!(entries[1].1.repr(), "[1.5, 'x']");
        assert!(parse_json_include("[1, 2]").is_err());
        assert_eq!(parse_json_include("{").unwrap_err().class_name(), "JSONDecodeError");
    }

    #[test]
    fn test_first_binding_wins() {
        let mut env = Environment::new();
        bind_immutable(&mut env, vec![("a".to_string(), Value::Int(1))]);
        bind_immutable(&mut env, vec![("a".to_string(), Value::Int(2))]);
        assert!(env.get("a").unwrap().py_eq(&Value::Int(1)));
    }
}
