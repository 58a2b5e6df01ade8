/*
 * format.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Number and string formatting.
//!
//! Implements the two Python formatting dialects template authors use:
//! printf-style (`'%0.3f' % x`) and brace-style (`'{:0.3f}'.format(x)`),
//! plus [`echo`], which decides how an inline expression is written to the
//! output given the current default numeric format.

use crate::error::{TemplateError, TemplateResult};
use crate::value::{Dict, Value, float_repr};

/// Default numeric format applied to echoed numbers.
pub const DEFAULT_FMT: &str = "%0.10g";

/// Render a value for an inline expression.
///
/// Numbers go through `fmt`. Sequences made up entirely of numbers are
/// bracketed with each element formatted. `None` renders as nothing so that
/// calls like `{include('x.inp')}` leave no trace. Everything else uses its
/// natural string form, or `str()` when `raw` is set.
pub fn echo(value: &Value, fmt: &str, raw: bool) -> TemplateResult<String> {
    match value {
        Value::None => Ok(String::new()),
        Value::Marked(_, inner) => echo(inner, fmt, raw),
        _ if raw => Ok(value.to_str()),
        Value::Int(_) | Value::Float(_) => apply_default(fmt, value),
        Value::List(items) => echo_sequence(&items.borrow(), fmt, ('[', ']'), value),
        Value::Tuple(items) => echo_sequence(items, fmt, ('(', ')'), value),
        _ => Ok(value.to_str()),
    }
}

fn echo_sequence(
    items: &[Value],
    fmt: &str,
    (open, close): (char, char),
    whole: &Value,
) -> TemplateResult<String> {
    if items.is_empty() || !items.iter().all(Value::is_number) {
        return Ok(whole.repr());
    }
    let formatted = items
        .iter()
        .map(|item| apply_default(fmt, item))
        .collect::<TemplateResult<Vec<_>>>()?;
    Ok(format!("{open}{}{close}", formatted.join(", ")))
}

/// Apply a default-format string (either dialect) to a single value.
pub fn apply_default(fmt: &str, value: &Value) -> TemplateResult<String> {
    if fmt.contains('{') {
        format_braces(fmt, std::slice::from_ref(value), &Dict::new())
    } else if fmt.contains('%') {
        percent_format(fmt, value)
    } else {
        Err(TemplateError::value_error(format!(
            "Invalid numeric format {fmt:?}: expected a '%' or '{{}}' style format"
        )))
    }
}

/// Check that a format string can be used as the default numeric format.
pub fn validate_default(fmt: &str) -> TemplateResult<()> {
    apply_default(fmt, &Value::Float(1.5)).map(|_| ())
}

#[derive(Debug, Clone)]
struct Spec {
    fill: char,
    align: Option<char>,
    sign: char,
    alternate: bool,
    zero: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    kind: Option<char>,
}

impl Default for Spec {
    fn default() -> Self {
        Self {
            fill: ' ',
            align: None,
            sign: '-',
            alternate: false,
            zero: false,
            width: 0,
            grouping: None,
            precision: None,
            kind: None,
        }
    }
}

fn strip_fraction_zeros(body: &str) -> String {
    match body.split_once(['e', 'E']) {
        Some((mantissa, exponent)) => {
            let marker = if body.contains('E') { 'E' } else { 'e' };
            format!("{}{marker}{exponent}", strip_fraction_zeros(mantissa))
        }
        None if body.contains('.') => body.trim_end_matches('0').trim_end_matches('.').to_string(),
        None => body.to_string(),
    }
}

fn exponent_of(x: f64, precision: usize) -> i32 {
    if x == 0.0 {
        return 0;
    }
    let sci = format!("{:.*e}", precision, x);
    sci.split_once('e')
        .and_then(|(_, exp)| exp.parse().ok())
        .unwrap_or(0)
}

fn fixed(x: f64, precision: usize) -> String {
    format!("{:.*}", precision, x)
}

fn scientific(x: f64, precision: usize, upper: bool) -> String {
    let sci = format!("{:.*e}", precision, x);
    let (mantissa, exponent) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    format!(
        "{mantissa}{}{}{:02}",
        if upper { 'E' } else { 'e' },
        if exponent < 0 { '-' } else { '+' },
        exponent.abs()
    )
}

/// `%g`: fixed notation when the decimal exponent lies in `[-4, precision)`,
/// exponent notation otherwise, trailing zeros removed unless `alternate`.
fn general(x: f64, precision: usize, upper: bool, alternate: bool) -> String {
    let precision = precision.max(1);
    let exponent = exponent_of(x, precision - 1);
    let body = if (-4..precision as i32).contains(&exponent) {
        let mut body = fixed(x, (precision as i32 - 1 - exponent) as usize);
        if alternate && !body.contains('.') {
            body.push('.');
        }
        body
    } else {
        scientific(x, precision - 1, upper)
    };
    if alternate {
        body
    } else {
        strip_fraction_zeros(&body)
    }
}

/// Unsigned text of `|x|` for a float presentation type.
fn float_body(x: f64, kind: char, precision: Option<usize>, alternate: bool) -> String {
    let upper = kind.is_ascii_uppercase();
    if !x.is_finite() {
        let text = if x.is_nan() { "nan" } else { "inf" };
        return if upper { text.to_uppercase() } else { text.to_string() };
    }
    let x = x.abs();
    match kind {
        'f' | 'F' => {
            let mut body = fixed(x, precision.unwrap_or(6));
            if alternate && !body.contains('.') {
                body.push('.');
            }
            body
        }
        'e' | 'E' => scientific(x, precision.unwrap_or(6), upper),
        '%' => format!("{}%", fixed(x * 100.0, precision.unwrap_or(6))),
        // `None` presentation with a precision: like 'g' but always keeps a
        // fractional digit.
        'r' => {
            let body = general(x, precision.unwrap_or(12), false, alternate);
            if body.contains(['.', 'e', 'n', 'i']) {
                body
            } else {
                format!("{body}.0")
            }
        }
        _ => general(x, precision.unwrap_or(6), upper, alternate),
    }
}

fn int_body(i: i64, kind: char, alternate: bool) -> TemplateResult<String> {
    let magnitude = i.unsigned_abs();
    Ok(match kind {
        'x' => format!("{}{magnitude:x}", if alternate { "0x" } else { "" }),
        'X' => format!("{}{magnitude:X}", if alternate { "0X" } else { "" }),
        'o' => format!("{}{magnitude:o}", if alternate { "0o" } else { "" }),
        'b' => format!("{}{magnitude:b}", if alternate { "0b" } else { "" }),
        'c' => char::from_u32(i as u32)
            .ok_or_else(|| TemplateError::runtime(crate::error::ErrorKind::OverflowError, "%c arg not in range"))?
            .to_string(),
        _ => magnitude.to_string(),
    })
}

fn group_digits(body: &str, separator: char) -> String {
    let split = body.find(|c: char| !c.is_ascii_digit()).unwrap_or(body.len());
    let (digits, rest) = body.split_at(split);
    let mut grouped = String::new();
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(separator);
        }
        grouped.push(ch);
    }
    grouped.push_str(rest);
    grouped
}

fn sign_text(negative: bool, sign: char) -> &'static str {
    match (negative, sign) {
        (true, _) => "-",
        (false, '+') => "+",
        (false, ' ') => " ",
        _ => "",
    }
}

/// Apply width, fill and alignment.
fn pad(sign: &str, body: &str, spec: &Spec, numeric: bool) -> String {
    let len = sign.chars().count() + body.chars().count();
    if len >= spec.width {
        return format!("{sign}{body}");
    }
    let (fill, align) = match spec.align {
        Some(align) => (spec.fill, align),
        None if spec.zero && numeric => ('0', '='),
        None if numeric => (spec.fill, '>'),
        None => (spec.fill, '<'),
    };
    let padding = spec.width - len;
    let fill_str = |n: usize| fill.to_string().repeat(n);
    match align {
        '<' => format!("{sign}{body}{}", fill_str(padding)),
        '^' => format!(
            "{}{sign}{body}{}",
            fill_str(padding / 2),
            fill_str(padding - padding / 2)
        ),
        '=' => format!("{sign}{}{body}", fill_str(padding)),
        _ => format!("{}{sign}{body}", fill_str(padding)),
    }
}

fn format_number(value: &Value, spec: &Spec) -> TemplateResult<String> {
    let kind = spec.kind;
    let float_kind = matches!(kind, Some('e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%' | 'n'));
    let (negative, body) = match value {
        Value::Float(x) => {
            let kind = match kind {
                None if spec.precision.is_none() => {
                    let repr = float_repr(x.abs());
                    return Ok(pad(
                        sign_text(x.is_sign_negative() && !x.is_nan(), spec.sign),
                        &repr,
                        spec,
                        true,
                    ));
                }
                None => 'r',
                Some('n') => 'g',
                Some(k) if float_kind => k,
                Some(k) => {
                    return Err(TemplateError::value_error(format!(
                        "Unknown format code '{k}' for object of type 'float'"
                    )));
                }
            };
            (
                x.is_sign_negative() && !x.is_nan(),
                float_body(*x, kind, spec.precision, spec.alternate),
            )
        }
        _ => {
            let i = value.as_int().unwrap_or(0);
            if float_kind {
                let kind = if kind == Some('n') { 'g' } else { kind.unwrap_or('g') };
                (i < 0, float_body(i as f64, kind, spec.precision, spec.alternate))
            } else {
                (i < 0, int_body(i, kind.unwrap_or('d'), spec.alternate)?)
            }
        }
    };
    let body = match spec.grouping {
        Some(separator) => group_digits(&body, separator),
        None => body,
    };
    Ok(pad(sign_text(negative, spec.sign), &body, spec, true))
}

fn parse_spec(text: &str) -> TemplateResult<Spec> {
    let chars: Vec<char> = text.chars().collect();
    let mut spec = Spec::default();
    let mut i = 0;
    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
    if chars.len() >= 2 && is_align(chars[1]) {
        spec.fill = chars[0];
        spec.align = Some(chars[1]);
        i = 2;
    } else if chars.first().copied().is_some_and(is_align) {
        spec.align = Some(chars[0]);
        i = 1;
    }
    if let Some(&c @ ('+' | '-' | ' ')) = chars.get(i) {
        spec.sign = c;
        i += 1;
    }
    if chars.get(i) == Some(&'#') {
        spec.alternate = true;
        i += 1;
    }
    if chars.get(i) == Some(&'0') {
        spec.zero = true;
        i += 1;
    }
    let start = i;
    while chars.get(i).is_some_and(char::is_ascii_digit) {
        i += 1;
    }
    spec.width = digits(&chars[start..i]);
    if let Some(&c @ (',' | '_')) = chars.get(i) {
        spec.grouping = Some(c);
        i += 1;
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        let start = i;
        while chars.get(i).is_some_and(char::is_ascii_digit) {
            i += 1;
        }
        if start == i {
            return Err(TemplateError::value_error("Format specifier missing precision"));
        }
        spec.precision = Some(digits(&chars[start..i]));
    }
    match &chars[i..] {
        [] => {}
        [kind] => spec.kind = Some(*kind),
        _ => {
            return Err(TemplateError::value_error(format!(
                "Invalid format specifier '{text}'"
            )));
        }
    }
    Ok(spec)
}

fn digits(chars: &[char]) -> usize {
    chars
        .iter()
        .filter_map(|c| c.to_digit(10))
        .fold(0usize, |acc, d| acc.saturating_mul(10).saturating_add(d as usize))
}

/// Python `format(value, spec)`.
pub fn format_spec(value: &Value, text: &str) -> TemplateResult<String> {
    let value = match value {
        Value::Marked(_, inner) => inner.as_ref(),
        other => other,
    };
    let spec = parse_spec(text)?;
    match value {
        Value::Bool(b) if spec.kind.is_none() => {
            Ok(pad("", if *b { "True" } else { "False" }, &spec, false))
        }
        Value::Int(_) | Value::Float(_) | Value::Bool(_) => format_number(value, &spec),
        Value::Str(s) => {
            if spec.kind.is_some_and(|k| k != 's') {
                return Err(TemplateError::value_error(format!(
                    "Unknown format code '{}' for object of type 'str'",
                    spec.kind.unwrap_or('s')
                )));
            }
            let body: String = match spec.precision {
                Some(n) => s.chars().take(n).collect(),
                None => s.clone(),
            };
            Ok(pad("", &body, &spec, false))
        }
        other if text.is_empty() => Ok(other.to_str()),
        other => Err(TemplateError::type_error(format!(
            "unsupported format string passed to {}.__format__",
            other.type_name()
        ))),
    }
}

/// Python `str.format(*positional, **named)`.
pub fn format_braces(template: &str, positional: &[Value], named: &Dict) -> TemplateResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();
    let mut auto_index = 0usize;
    while let Some((i, ch)) = chars.next() {
        match ch {
            '{' if chars.peek().map(|(_, c)| *c) == Some('{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek().map(|(_, c)| *c) == Some('}') => {
                chars.next();
                out.push('}');
            }
            '}' => {
                return Err(TemplateError::value_error(
                    "Single '}' encountered in format string",
                ));
            }
            '{' => {
                let end = template[i..]
                    .find('}')
                    .map(|offset| i + offset)
                    .ok_or_else(|| TemplateError::value_error("Single '{' encountered in format string"))?;
                let field = &template[i + 1..end];
                while chars.peek().is_some_and(|(j, _)| *j <= end) {
                    chars.next();
                }
                let (field, spec) = field.split_once(':').unwrap_or((field, ""));
                let (field, conversion) = match field.split_once('!') {
                    Some((name, conversion)) => (name, Some(conversion)),
                    None => (field, None),
                };
                let value = if field.is_empty() {
                    auto_index += 1;
                    positional_arg(positional, auto_index - 1)?
                } else if let Ok(index) = field.parse::<usize>() {
                    positional_arg(positional, index)?
                } else {
                    named.get_item(&Value::from(field))?
                };
                let value = match conversion {
                    Some("r") | Some("a") => Value::Str(value.repr()),
                    Some("s") => Value::Str(value.to_str()),
                    None => value,
                    Some(other) => {
                        return Err(TemplateError::value_error(format!(
                            "Unknown conversion specifier {other}"
                        )));
                    }
                };
                out.push_str(&format_spec(&value, spec)?);
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

fn positional_arg(positional: &[Value], index: usize) -> TemplateResult<Value> {
    positional.get(index).cloned().ok_or_else(|| {
        TemplateError::runtime(
            crate::error::ErrorKind::IndexError,
            format!("Replacement index {index} out of range for positional args tuple"),
        )
    })
}

/// Python `template % args`.
pub fn percent_format(template: &str, args: &Value) -> TemplateResult<String> {
    let (positional, mapping): (Vec<Value>, Option<Value>) = match args {
        Value::Tuple(items) => (items.as_ref().clone(), None),
        Value::Dict(_) => (vec![args.clone()], Some(args.clone())),
        other => (vec![other.clone()], None),
    };
    let mut next = positional.iter();
    let mut out = String::with_capacity(template.len());
    let chars: Vec<char> = template.chars().collect();
    let mut i = 0;
    let incomplete = || TemplateError::value_error("incomplete format");
    while i < chars.len() {
        if chars[i] != '%' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        i += 1;
        let mut key = None;
        if chars.get(i) == Some(&'(') {
            let close = chars[i..].iter().position(|c| *c == ')').ok_or_else(incomplete)?;
            key = Some(chars[i + 1..i + close].iter().collect::<String>());
            i += close + 1;
        }
        let mut spec = Spec::default();
        let mut left = false;
        while let Some(&flag @ ('-' | '+' | ' ' | '#' | '0')) = chars.get(i) {
            match flag {
                '-' => left = true,
                '+' => spec.sign = '+',
                ' ' if spec.sign != '+' => spec.sign = ' ',
                '#' => spec.alternate = true,
                '0' => spec.zero = true,
                _ => {}
            }
            i += 1;
        }
        let start = i;
        while chars.get(i).is_some_and(char::is_ascii_digit) {
            i += 1;
        }
        spec.width = digits(&chars[start..i]);
        if chars.get(i) == Some(&'.') {
            i += 1;
            let start = i;
            while chars.get(i).is_some_and(char::is_ascii_digit) {
                i += 1;
            }
            spec.precision = Some(digits(&chars[start..i]));
        }
        while matches!(chars.get(i), Some('h' | 'l' | 'L')) {
            i += 1;
        }
        let kind = *chars.get(i).ok_or_else(incomplete)?;
        i += 1;
        if kind == '%' {
            out.push('%');
            continue;
        }
        if left {
            spec.align = Some('<');
            spec.zero = false;
        } else if !spec.zero {
            spec.align = Some('>');
        }
        let value = match (&key, &mapping) {
            (Some(key), Some(Value::Dict(dict))) => dict.borrow().get_item(&Value::from(key.as_str()))?,
            (Some(_), _) => return Err(TemplateError::type_error("format requires a mapping")),
            (None, _) => next.next().cloned().ok_or_else(|| {
                TemplateError::type_error("not enough arguments for format string")
            })?,
        };
        out.push_str(&percent_one(&value, kind, &mut spec)?);
    }
    if mapping.is_none() && next.next().is_some() {
        return Err(TemplateError::type_error(
            "not all arguments converted during string formatting",
        ));
    }
    Ok(out)
}

fn percent_one(value: &Value, kind: char, spec: &mut Spec) -> TemplateResult<String> {
    let value = match value {
        Value::Marked(_, inner) => inner.as_ref(),
        other => other,
    };
    match kind {
        's' | 'r' | 'a' => {
            let text = if kind == 's' { value.to_str() } else { value.repr() };
            let text: String = match spec.precision {
                Some(n) => text.chars().take(n).collect(),
                None => text,
            };
            spec.zero = false;
            Ok(pad("", &text, spec, false))
        }
        'd' | 'i' | 'u' | 'x' | 'X' | 'o' | 'c' => {
            let int = match value {
                Value::Float(f) if kind != 'c' => Value::Int(f.trunc() as i64),
                Value::Str(s) if kind == 'c' && s.chars().count() == 1 => {
                    return Ok(pad("", s, spec, false));
                }
                v if v.as_int().is_some() => Value::Int(v.as_int().unwrap_or(0)),
                v => {
                    return Err(TemplateError::type_error(format!(
                        "%{kind} format: a number is required, not {}",
                        v.type_name()
                    )));
                }
            };
            spec.kind = Some(if kind == 'i' || kind == 'u' { 'd' } else { kind });
            format_number(&int, spec)
        }
        'e' | 'E' | 'f' | 'F' | 'g' | 'G' => {
            let x = value.as_f64().ok_or_else(|| {
                TemplateError::type_error(format!(
                    "must be real number, not {}",
                    value.type_name()
                ))
            })?;
            spec.kind = Some(kind);
            format_number(&Value::Float(x), spec)
        }
        other => Err(TemplateError::value_error(format!(
            "unsupported format character '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pct(template: &str, value: Value) -> String {
        percent_format(template, &value).unwrap()
    }

    #[test]
    fn test_default_format_general() {
        assert_eq!(pct(DEFAULT_FMT, Value::Int(5)), "5");
        assert_eq!(pct(DEFAULT_FMT, Value::Float(0.1)), "0.1");
        assert_eq!(pct(DEFAULT_FMT, Value::Float(1.0 / 3.0)), "0.3333333333");
        assert_eq!(pct(DEFAULT_FMT, Value::Float(1e20)), "1e+20");
        assert_eq!(pct(DEFAULT_FMT, Value::Float(-2.5e-7)), "-2.5e-07");
        assert_eq!(pct(DEFAULT_FMT, Value::Float(12345678901.0)), "1.23456789e+10");
    }

    #[test]
    fn test_percent_conversions() {
        assert_eq!(pct("%5.2f|", Value::Float(3.14159)), " 3.14|");
        assert_eq!(pct("%-6d|", Value::Int(42)), "42    |");
        assert_eq!(pct("%05d", Value::Int(-42)), "-0042");
        assert_eq!(pct("%+.3e", Value::Float(12345.678)), "+1.235e+04");
        assert_eq!(pct("%x", Value::Int(255)), "ff");
        assert_eq!(pct("%s and %r", Value::tuple(vec!["a".into(), "b".into()])), "a and 'b'");
        assert_eq!(pct("100%%", Value::tuple(vec![])), "100%");
        assert_eq!(pct("%d", Value::Float(3.7)), "3");
    }

    #[test]
    fn test_percent_errors() {
        assert!(percent_format("%d", &Value::from("x")).is_err());
        assert!(percent_format("%d %d", &Value::Int(1)).is_err());
        assert!(percent_format("%d", &Value::tuple(vec![Value::Int(1), Value::Int(2)])).is_err());
    }

    #[test]
    fn test_brace_format() {
        let out = format_braces("{:0.3f} {} {!r}", &[Value::Float(2.0), Value::Int(7), Value::from("s")], &Dict::new()).unwrap();
        assert_eq!(out, "2.000 7 's'");
        assert_eq!(format_spec(&Value::Int(1234567), ",").unwrap(), "1,234,567");
        assert_eq!(format_spec(&Value::from("ab"), ">4").unwrap(), "  ab");
        assert_eq!(format_spec(&Value::Float(0.25), ".1%").unwrap(), "25.0%");
        assert_eq!(format_spec(&Value::Float(2.0), "").unwrap(), "2.0");
        assert_eq!(format_spec(&Value::Int(5), "*^5").unwrap(), "**5**");
    }

    #[test]
    fn test_echo_rules() {
        assert_eq!(echo(&Value::Bool(true), DEFAULT_FMT, false).unwrap(), "True");
        assert_eq!(echo(&Value::None, DEFAULT_FMT, false).unwrap(), "");
        assert_eq!(echo(&Value::from("txt"), DEFAULT_FMT, false).unwrap(), "txt");
        let numbers = Value::list(vec![Value::Float(0.5), Value::Int(2)]);
        assert_eq!(echo(&numbers, DEFAULT_FMT, false).unwrap(), "[0.5, 2]");
        assert_eq!(echo(&numbers, "%0.2f", false).unwrap(), "[0.50, 2.00]");
        let mixed = Value::list(vec![Value::Int(1), Value::from("a")]);
        assert_eq!(echo(&mixed, DEFAULT_FMT, false).unwrap(), "[1, 'a']");
        assert_eq!(echo(&Value::Float(1.0 / 3.0), DEFAULT_FMT, true).unwrap(), "0.3333333333333333");
    }

    #[test]
    fn test_brace_style_default() {
        assert_eq!(apply_default("{:0.2f}", &Value::Float(1.0)).unwrap(), "1.00");
        assert!(validate_default("no format here").is_err());
    }
}
