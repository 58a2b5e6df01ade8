/*
 * methods.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Methods on builtin value types (`'a,b'.split(',')`, `xs.append(1)`, ...).

use crate::error::{ErrorKind, TemplateError, TemplateResult};
use crate::format::format_braces;
use crate::value::{Dict, Value};

use super::builtins::sort_values;
use super::{Args, Machine};

const STR_METHODS: &[&str] = &[
    "upper",
    "lower",
    "title",
    "capitalize",
    "strip",
    "lstrip",
    "rstrip",
    "split",
    "rsplit",
    "splitlines",
    "join",
    "replace",
    "startswith",
    "endswith",
    "find",
    "rfind",
    "index",
    "count",
    "format",
    "zfill",
    "ljust",
    "rjust",
    "center",
    "isdigit",
    "isalpha",
    "isalnum",
    "isspace",
    "isupper",
    "islower",
];

const LIST_METHODS: &[&str] = &[
    "append", "extend", "insert", "pop", "remove", "index", "count", "sort", "reverse", "clear",
    "copy",
];

const DICT_METHODS: &[&str] = &[
    "keys",
    "values",
    "items",
    "get",
    "pop",
    "update",
    "setdefault",
    "copy",
    "clear",
];

const TUPLE_METHODS: &[&str] = &["index", "count"];

const FLOAT_METHODS: &[&str] = &["is_integer"];

/// Whether `receiver.name` names a method.
pub fn has_method(receiver: &Value, name: &str) -> bool {
    let table = match receiver {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Tuple(_) => TUPLE_METHODS,
        Value::Float(_) => FLOAT_METHODS,
        _ => return false,
    };
    table.contains(&name)
}

fn attribute_error(receiver: &Value, name: &str) -> TemplateError {
    TemplateError::runtime(
        ErrorKind::AttributeError,
        format!("'{}' object has no attribute '{name}'", receiver.type_name()),
    )
}

fn expect_str<'a>(method: &str, value: &'a Value) -> TemplateResult<&'a str> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(TemplateError::type_error(format!(
            "{method}() argument must be str, not {}",
            other.type_name()
        ))),
    }
}

fn expect_int(method: &str, value: &Value) -> TemplateResult<i64> {
    value.as_int().ok_or_else(|| {
        TemplateError::type_error(format!(
            "{method}() argument must be an integer, not '{}'",
            value.type_name()
        ))
    })
}

pub(crate) fn call_method(
    machine: &mut Machine<'_>,
    receiver: &Value,
    name: &str,
    args: Args,
) -> TemplateResult<Value> {
    match receiver {
        Value::Str(s) => str_method(s, name, args),
        Value::List(_) => list_method(machine, receiver, name, args),
        Value::Dict(_) => dict_method(receiver, name, args),
        Value::Tuple(items) => sequence_query(receiver, items, name, &args),
        Value::Float(x) if name == "is_integer" => {
            args.check(name, 0, 0)?;
            Ok(Value::Bool(x.is_finite() && x.fract() == 0.0))
        }
        other => Err(attribute_error(other, name)),
    }
}

fn strip_set(args: &Args, method: &str) -> TemplateResult<Option<Vec<char>>> {
    args.check(method, 0, 1)?;
    match args.positional.first() {
        None | Some(Value::None) => Ok(None),
        Some(chars) => Ok(Some(expect_str(method, chars)?.chars().collect())),
    }
}

fn justify(s: &str, args: &Args, method: &str) -> TemplateResult<(usize, char)> {
    args.check(method, 1, 2)?;
    let width = usize::try_from(expect_int(method, &args.positional[0])?).unwrap_or(0);
    let fill = match args.positional.get(1) {
        Some(v) => {
            let fill = expect_str(method, v)?;
            let mut chars = fill.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => c,
                _ => {
                    return Err(TemplateError::type_error(
                        "The fill character must be exactly one character long",
                    ));
                }
            }
        }
        None => ' ',
    };
    Ok((width.saturating_sub(s.chars().count()), fill))
}

fn char_index(s: &str, byte: usize) -> i64 {
    s[..byte].chars().count() as i64
}

fn str_method(s: &str, name: &str, mut args: Args) -> TemplateResult<Value> {
    let text = |t: String| -> TemplateResult<Value> { Ok(Value::Str(t)) };
    match name {
        "upper" | "lower" | "title" | "capitalize" => {
            args.check(name, 0, 0)?;
            match name {
                "upper" => text(s.to_uppercase()),
                "lower" => text(s.to_lowercase()),
                "capitalize" => {
                    let mut chars = s.chars();
                    text(match chars.next() {
                        Some(first) => {
                            first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect()
                        }
                        None => String::new(),
                    })
                }
                _ => {
                    let mut out = String::with_capacity(s.len());
                    let mut previous_cased = false;
                    for ch in s.chars() {
                        if previous_cased {
                            out.extend(ch.to_lowercase());
                        } else {
                            out.extend(ch.to_uppercase());
                        }
                        previous_cased = ch.is_alphabetic();
                    }
                    text(out)
                }
            }
        }
        "strip" | "lstrip" | "rstrip" => {
            let set = strip_set(&args, name)?;
            let matches = |c: char| match &set {
                Some(set) => set.contains(&c),
                None => c.is_whitespace(),
            };
            text(match name {
                "strip" => s.trim_matches(matches),
                "lstrip" => s.trim_start_matches(matches),
                _ => s.trim_end_matches(matches),
            }
            .to_string())
        }
        "split" | "rsplit" => {
            let sep = args.keyword("sep").or_else(|| args.positional.first().cloned());
            let maxsplit = args
                .keyword("maxsplit")
                .or_else(|| args.positional.get(1).cloned())
                .map(|v| expect_int(name, &v))
                .transpose()?
                .unwrap_or(-1);
            args.no_keywords(name)?;
            let limit = usize::try_from(maxsplit).ok();
            let parts: Vec<String> = match sep {
                None | Some(Value::None) => split_whitespace(s, limit, name == "rsplit"),
                Some(sep) => {
                    let sep = expect_str(name, &sep)?;
                    if sep.is_empty() {
                        return Err(TemplateError::value_error("empty separator"));
                    }
                    match (limit, name == "rsplit") {
                        (None, _) => s.split(sep).map(str::to_string).collect(),
                        (Some(n), false) => s.splitn(n + 1, sep).map(str::to_string).collect(),
                        (Some(n), true) => {
                            let mut parts: Vec<String> = s.rsplitn(n + 1, sep).map(str::to_string).collect();
                            parts.reverse();
                            parts
                        }
                    }
                }
            };
            Ok(Value::list(parts.into_iter().map(Value::Str).collect()))
        }
        "splitlines" => {
            args.check(name, 0, 0)?;
            Ok(Value::list(s.lines().map(Value::from).collect()))
        }
        "join" => {
            args.check(name, 1, 1)?;
            let items = args.positional[0].iterate()?;
            let mut parts = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                match item {
                    Value::Str(part) => parts.push(part.as_str()),
                    other => {
                        return Err(TemplateError::type_error(format!(
                            "sequence item {i}: expected str instance, {} found",
                            other.type_name()
                        )));
                    }
                }
            }
            text(parts.join(s))
        }
        "replace" => {
            args.check(name, 2, 3)?;
            let old = expect_str(name, &args.positional[0])?;
            let new = expect_str(name, &args.positional[1])?;
            match args.positional.get(2).map(|n| expect_int(name, n)).transpose()? {
                Some(n) if n >= 0 => text(s.replacen(old, new, n as usize)),
                _ => text(s.replace(old, new)),
            }
        }
        "startswith" | "endswith" => {
            args.check(name, 1, 1)?;
            let candidates = match &args.positional[0] {
                Value::Tuple(items) => items.as_ref().clone(),
                other => vec![other.clone()],
            };
            for candidate in &candidates {
                let candidate = expect_str(name, candidate)?;
                let hit = if name == "startswith" {
                    s.starts_with(candidate)
                } else {
                    s.ends_with(candidate)
                };
                if hit {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "find" | "rfind" | "index" => {
            args.check(name, 1, 1)?;
            let needle = expect_str(name, &args.positional[0])?;
            let found = if name == "rfind" { s.rfind(needle) } else { s.find(needle) };
            match found {
                Some(byte) => Ok(Value::Int(char_index(s, byte))),
                None if name == "index" => Err(TemplateError::value_error("substring not found")),
                None => Ok(Value::Int(-1)),
            }
        }
        "count" => {
            args.check(name, 1, 1)?;
            let needle = expect_str(name, &args.positional[0])?;
            let count = if needle.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(needle).count()
            };
            Ok(Value::Int(count as i64))
        }
        "format" => {
            let mut named = Dict::new();
            for (key, value) in std::mem::take(&mut args.keywords) {
                named.insert(Value::Str(key), value)?;
            }
            format_braces(s, &args.positional, &named).map(Value::Str)
        }
        "zfill" => {
            args.check(name, 1, 1)?;
            let width = usize::try_from(expect_int(name, &args.positional[0])?).unwrap_or(0);
            let len = s.chars().count();
            if len >= width {
                return text(s.to_string());
            }
            let (sign, digits) = match s.chars().next() {
                Some(c @ ('+' | '-')) => (c.to_string(), &s[1..]),
                _ => (String::new(), s),
            };
            text(format!("{sign}{}{digits}", "0".repeat(width - len)))
        }
        "ljust" | "rjust" | "center" => {
            let (missing, fill) = justify(s, &args, name)?;
            let pad = |n: usize| fill.to_string().repeat(n);
            text(match name {
                "ljust" => format!("{s}{}", pad(missing)),
                "rjust" => format!("{}{s}", pad(missing)),
                _ => {
                    let width = missing + s.chars().count();
                    let left = missing / 2 + (missing & width & 1);
                    format!("{}{s}{}", pad(left), pad(missing - left))
                }
            })
        }
        "isdigit" | "isalpha" | "isalnum" | "isspace" | "isupper" | "islower" => {
            args.check(name, 0, 0)?;
            let result = match name {
                "isdigit" => !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()),
                "isalpha" => !s.is_empty() && s.chars().all(char::is_alphabetic),
                "isalnum" => !s.is_empty() && s.chars().all(char::is_alphanumeric),
                "isspace" => !s.is_empty() && s.chars().all(char::is_whitespace),
                "isupper" => {
                    s.chars().any(char::is_alphabetic) && !s.chars().any(char::is_lowercase)
                }
                _ => s.chars().any(char::is_alphabetic) && !s.chars().any(char::is_uppercase),
            };
            Ok(Value::Bool(result))
        }
        _ => Err(attribute_error(&Value::from(s), name)),
    }
}

fn split_whitespace(s: &str, limit: Option<usize>, from_right: bool) -> Vec<String> {
    let words: Vec<&str> = s.split_whitespace().collect();
    let n = match limit {
        Some(n) if n + 1 < words.len() => n,
        _ => return words.into_iter().map(str::to_string).collect(),
    };
    if from_right {
        let keep = words.len() - n;
        let mut parts = vec![s[..nth_word_end(s, keep)].to_string()];
        parts.extend(words[keep..].iter().map(|w| w.to_string()));
        parts
    } else {
        let mut parts: Vec<String> = words[..n].iter().map(|w| w.to_string()).collect();
        parts.push(s[nth_word_start(s, n)..].to_string());
        parts
    }
}

/// Byte offset where the `n`th (0-based) whitespace-separated word starts.
fn nth_word_start(s: &str, n: usize) -> usize {
    let mut seen = 0;
    let mut in_word = false;
    for (i, ch) in s.char_indices() {
        if ch.is_whitespace() {
            in_word = false;
        } else if !in_word {
            if seen == n {
                return i;
            }
            seen += 1;
            in_word = true;
        }
    }
    s.len()
}

/// Byte offset just past the `n`th (1-based) word.
fn nth_word_end(s: &str, n: usize) -> usize {
    let mut seen = 0;
    let mut in_word = false;
    for (i, ch) in s.char_indices() {
        if ch.is_whitespace() {
            if in_word && seen == n {
                return i;
            }
            in_word = false;
        } else if !in_word {
            seen += 1;
            in_word = true;
        }
    }
    s.len()
}

fn sequence_query(receiver: &Value, items: &[Value], name: &str, args: &Args) -> TemplateResult<Value> {
    match name {
        "index" => {
            args.check(name, 1, 1)?;
            items
                .iter()
                .position(|item| item.py_eq(&args.positional[0]))
                .map(|i| Value::Int(i as i64))
                .ok_or_else(|| {
                    TemplateError::value_error(format!(
                        "{} is not in {}",
                        args.positional[0].repr(),
                        receiver.type_name()
                    ))
                })
        }
        "count" => {
            args.check(name, 1, 1)?;
            let count = items.iter().filter(|item| item.py_eq(&args.positional[0])).count();
            Ok(Value::Int(count as i64))
        }
        _ => Err(attribute_error(receiver, name)),
    }
}

fn list_method(machine: &mut Machine<'_>, receiver: &Value, name: &str, mut args: Args) -> TemplateResult<Value> {
    let Value::List(list) = receiver else {
        return Err(attribute_error(receiver, name));
    };
    match name {
        "append" => {
            args.check(name, 1, 1)?;
            list.borrow_mut().push(args.positional.swap_remove(0));
            Ok(Value::None)
        }
        "extend" => {
            args.check(name, 1, 1)?;
            let items = args.positional[0].iterate()?;
            list.borrow_mut().extend(items);
            Ok(Value::None)
        }
        "insert" => {
            args.check(name, 2, 2)?;
            let len = list.borrow().len() as i64;
            let at = expect_int(name, &args.positional[0])?;
            let at = if at < 0 { (at + len).max(0) } else { at.min(len) };
            list.borrow_mut().insert(at as usize, args.positional.swap_remove(1));
            Ok(Value::None)
        }
        "pop" => {
            args.check(name, 0, 1)?;
            let mut items = list.borrow_mut();
            if items.is_empty() {
                return Err(TemplateError::runtime(ErrorKind::IndexError, "pop from empty list"));
            }
            let len = items.len() as i64;
            let at = match args.positional.first() {
                Some(i) => expect_int(name, i)?,
                None => -1,
            };
            let adjusted = if at < 0 { at + len } else { at };
            if !(0..len).contains(&adjusted) {
                return Err(TemplateError::runtime(ErrorKind::IndexError, "pop index out of range"));
            }
            Ok(items.remove(adjusted as usize))
        }
        "remove" => {
            args.check(name, 1, 1)?;
            let mut items = list.borrow_mut();
            match items.iter().position(|item| item.py_eq(&args.positional[0])) {
                Some(i) => {
                    items.remove(i);
                    Ok(Value::None)
                }
                None => Err(TemplateError::value_error("list.remove(x): x not in list")),
            }
        }
        "index" | "count" => {
            let items = list.borrow().clone();
            sequence_query(receiver, &items, name, &args)
        }
        "sort" => {
            args.check(name, 0, 0)?;
            let key = args.keyword("key").filter(|k| !matches!(k, Value::None));
            let reverse = args.keyword("reverse").is_some_and(|r| r.truthy());
            args.no_keywords(name)?;
            let items = list.borrow().clone();
            let sorted = sort_values(machine, items, key.as_ref(), reverse)?;
            *list.borrow_mut() = sorted;
            Ok(Value::None)
        }
        "reverse" => {
            args.check(name, 0, 0)?;
            list.borrow_mut().reverse();
            Ok(Value::None)
        }
        "clear" => {
            args.check(name, 0, 0)?;
            list.borrow_mut().clear();
            Ok(Value::None)
        }
        "copy" => {
            args.check(name, 0, 0)?;
            Ok(Value::list(list.borrow().clone()))
        }
        _ => Err(attribute_error(receiver, name)),
    }
}

fn dict_method(receiver: &Value, name: &str, mut args: Args) -> TemplateResult<Value> {
    let Value::Dict(dict) = receiver else {
        return Err(attribute_error(receiver, name));
    };
    match name {
        "keys" => {
            args.check(name, 0, 0)?;
            Ok(Value::list(dict.borrow().keys()))
        }
        "values" => {
            args.check(name, 0, 0)?;
            Ok(Value::list(dict.borrow().values()))
        }
        "items" => {
            args.check(name, 0, 0)?;
            Ok(Value::list(
                dict.borrow()
                    .iter()
                    .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
                    .collect(),
            ))
        }
        "get" => {
            args.check(name, 1, 2)?;
            let found = dict.borrow().get(&args.positional[0])?.cloned();
            Ok(found.or_else(|| args.positional.get(1).cloned()).unwrap_or(Value::None))
        }
        "pop" => {
            args.check(name, 1, 2)?;
            let removed = dict.borrow_mut().remove(&args.positional[0])?;
            match (removed, args.positional.get(1)) {
                (Some(value), _) => Ok(value),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(TemplateError::runtime(ErrorKind::KeyError, args.positional[0].repr())),
            }
        }
        "setdefault" => {
            args.check(name, 1, 2)?;
            let key = args.positional[0].clone();
            if let Some(existing) = dict.borrow().get(&key)?.cloned() {
                return Ok(existing);
            }
            let default = args.positional.get(1).cloned().unwrap_or(Value::None);
            dict.borrow_mut().insert(key, default.clone())?;
            Ok(default)
        }
        "update" => {
            args.check(name, 0, 1)?;
            let mut pending = Vec::new();
            match args.positional.first() {
                Some(Value::Dict(other)) => {
                    pending.extend(other.borrow().iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                Some(pairs) => {
                    for pair in pairs.iterate()? {
                        let kv = pair.iterate()?;
                        if kv.len() != 2 {
                            return Err(TemplateError::value_error(format!(
                                "dictionary update sequence element has length {}; 2 is required",
                                kv.len()
                            )));
                        }
                        pending.push((kv[0].clone(), kv[1].clone()));
                    }
                }
                None => {}
            }
            pending.extend(std::mem::take(&mut args.keywords).into_iter().map(|(k, v)| (Value::Str(k), v)));
            let mut target = dict.borrow_mut();
            for (k, v) in pending {
                target.insert(k, v)?;
            }
            Ok(Value::None)
        }
        "copy" => {
            args.check(name, 0, 0)?;
            Ok(Value::dict(dict.borrow().clone()))
        }
        "clear" => {
            args.check(name, 0, 0)?;
            *dict.borrow_mut() = Dict::new();
            Ok(Value::None)
        }
        _ => Err(attribute_error(receiver, name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_method() {
        assert!(has_method(&Value::from("x"), "upper"));
        assert!(has_method(&Value::list(vec![]), "append"));
        assert!(!has_method(&Value::Int(1), "append"));
    }

    #[test]
    fn test_split_whitespace_limits() {
        assert_eq!(split_whitespace("  a b  c ", None, false), vec!["a", "b", "c"]);
        assert_eq!(split_whitespace("a b  c", Some(1), false), vec!["a", "b  c"]);
        assert_eq!(split_whitespace("a b  c", Some(1), true), vec!["a b", "c"]);
    }

    #[test]
    fn test_str_methods() {
        let call = |s: &str, name: &str, args: Vec<Value>| {
            str_method(s, name, Args::positional(args)).unwrap().to_str()
        };
        assert_eq!(call(" a ", "strip", vec![]), "a");
        assert_eq!(call("xxaxx", "strip", vec!["x".into()]), "a");
        assert_eq!(call("-", "join", vec![Value::list(vec!["a".into(), "b".into()])]), "a-b");
        assert_eq!(call("hello world", "title", vec![]), "Hello World");
        assert_eq!(call("-5", "zfill", vec![Value::Int(4)]), "-005");
        assert_eq!(call("ab", "center", vec![Value::Int(5), "*".into()]), "**ab*");
        assert_eq!(call("{}+{}", "format", vec![Value::Int(1), Value::Int(2)]), "1+2");
    }
}
