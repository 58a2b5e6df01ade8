/*
 * builtins.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Functions and constants seeded into every environment.
//!
//! Three groups share one enum: `math` module functions, a subset of the
//! Python builtins, and the template helpers (`include`, `defined`,
//! `Immutable`, `setfmt`, ...) that need access to the running machine.

use std::cmp::Ordering;
use std::f64::consts;

use crate::error::{ErrorKind, TemplateError, TemplateResult};
use crate::format::{apply_default, format_spec, validate_default};
use crate::value::{Dict, Lock, Value, parse_float};

use super::{Args, Machine};

/// A builtin function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    // math
    Sqrt,
    Exp,
    Log,
    Log10,
    Log2,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Sinh,
    Cosh,
    Tanh,
    Asinh,
    Acosh,
    Atanh,
    Floor,
    Ceil,
    Fabs,
    Pow,
    Degrees,
    Radians,
    Hypot,
    IsNan,
    IsInf,
    // Python builtins
    Abs,
    Min,
    Max,
    Round,
    Int,
    Float,
    Str,
    Bool,
    Len,
    Range,
    Sum,
    Sorted,
    Reversed,
    List,
    Tuple,
    Dict,
    Enumerate,
    Zip,
    Repr,
    Any,
    All,
    DivMod,
    Format,
    // template helpers
    Include,
    Rebase,
    Defined,
    Get,
    Immutable,
    Mutable,
    SetFmt,
    Fmt,
    AllVars,
    AllVarNames,
}

impl Builtin {
    pub const ALL: &'static [Builtin] = &[
        Builtin::Sqrt,
        Builtin::Exp,
        Builtin::Log,
        Builtin::Log10,
        Builtin::Log2,
        Builtin::Sin,
        Builtin::Cos,
        Builtin::Tan,
        Builtin::Asin,
        Builtin::Acos,
        Builtin::Atan,
        Builtin::Atan2,
        Builtin::Sinh,
        Builtin::Cosh,
        Builtin::Tanh,
        Builtin::Asinh,
        Builtin::Acosh,
        Builtin::Atanh,
        Builtin::Floor,
        Builtin::Ceil,
        Builtin::Fabs,
        Builtin::Pow,
        Builtin::Degrees,
        Builtin::Radians,
        Builtin::Hypot,
        Builtin::IsNan,
        Builtin::IsInf,
        Builtin::Abs,
        Builtin::Min,
        Builtin::Max,
        Builtin::Round,
        Builtin::Int,
        Builtin::Float,
        Builtin::Str,
        Builtin::Bool,
        Builtin::Len,
        Builtin::Range,
        Builtin::Sum,
        Builtin::Sorted,
        Builtin::Reversed,
        Builtin::List,
        Builtin::Tuple,
        Builtin::Dict,
        Builtin::Enumerate,
        Builtin::Zip,
        Builtin::Repr,
        Builtin::Any,
        Builtin::All,
        Builtin::DivMod,
        Builtin::Format,
        Builtin::Include,
        Builtin::Rebase,
        Builtin::Defined,
        Builtin::Get,
        Builtin::Immutable,
        Builtin::Mutable,
        Builtin::SetFmt,
        Builtin::Fmt,
        Builtin::AllVars,
        Builtin::AllVarNames,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Sqrt => "sqrt",
            Builtin::Exp => "exp",
            Builtin::Log => "log",
            Builtin::Log10 => "log10",
            Builtin::Log2 => "log2",
            Builtin::Sin => "sin",
            Builtin::Cos => "cos",
            Builtin::Tan => "tan",
            Builtin::Asin => "asin",
            Builtin::Acos => "acos",
            Builtin::Atan => "atan",
            Builtin::Atan2 => "atan2",
            Builtin::Sinh => "sinh",
            Builtin::Cosh => "cosh",
            Builtin::Tanh => "tanh",
            Builtin::Asinh => "asinh",
            Builtin::Acosh => "acosh",
            Builtin::Atanh => "atanh",
            Builtin::Floor => "floor",
            Builtin::Ceil => "ceil",
            Builtin::Fabs => "fabs",
            Builtin::Pow => "pow",
            Builtin::Degrees => "degrees",
            Builtin::Radians => "radians",
            Builtin::Hypot => "hypot",
            Builtin::IsNan => "isnan",
            Builtin::IsInf => "isinf",
            Builtin::Abs => "abs",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Round => "round",
            Builtin::Int => "int",
            Builtin::Float => "float",
            Builtin::Str => "str",
            Builtin::Bool => "bool",
            Builtin::Len => "len",
            Builtin::Range => "range",
            Builtin::Sum => "sum",
            Builtin::Sorted => "sorted",
            Builtin::Reversed => "reversed",
            Builtin::List => "list",
            Builtin::Tuple => "tuple",
            Builtin::Dict => "dict",
            Builtin::Enumerate => "enumerate",
            Builtin::Zip => "zip",
            Builtin::Repr => "repr",
            Builtin::Any => "any",
            Builtin::All => "all",
            Builtin::DivMod => "divmod",
            Builtin::Format => "format",
            Builtin::Include => "include",
            Builtin::Rebase => "rebase",
            Builtin::Defined => "defined",
            Builtin::Get => "get",
            Builtin::Immutable => "Immutable",
            Builtin::Mutable => "Mutable",
            Builtin::SetFmt => "setfmt",
            Builtin::Fmt => "fmt",
            Builtin::AllVars => "all_vars",
            Builtin::AllVarNames => "all_var_names",
        }
    }

    /// Whether keyword arguments passed to this builtin keep their
    /// `Immutable(..)`/`Mutable(..)` wrappers.
    pub fn keeps_marks(self) -> bool {
        matches!(self, Builtin::Include | Builtin::Rebase | Builtin::Immutable | Builtin::Mutable)
    }
}

/// Named constants seeded alongside the functions.
pub fn constants() -> Vec<(&'static str, Value)> {
    vec![
        ("pi", Value::Float(consts::PI)),
        ("e", Value::Float(consts::E)),
        ("tau", Value::Float(consts::TAU)),
        ("inf", Value::Float(f64::INFINITY)),
        ("nan", Value::Float(f64::NAN)),
    ]
}

/// Whether `name` is one of the seeded names.
pub fn is_reserved(name: &str) -> bool {
    Builtin::ALL.iter().any(|b| b.name() == name)
        || constants().iter().any(|(constant, _)| *constant == name)
}

fn domain_error() -> TemplateError {
    TemplateError::value_error("math domain error")
}

fn number(name: &str, value: &Value) -> TemplateResult<f64> {
    value.as_f64().ok_or_else(|| {
        TemplateError::type_error(format!(
            "{name}() argument must be a real number, not '{}'",
            value.type_name()
        ))
    })
}

/// Apply a one-argument real function, rejecting results outside its domain.
fn unary_math(name: &str, args: &Args, f: fn(f64) -> f64, valid: fn(f64) -> bool) -> TemplateResult<Value> {
    args.check(name, 1, 1)?;
    let x = number(name, &args.positional[0])?;
    if !valid(x) {
        return Err(domain_error());
    }
    Ok(Value::Float(f(x)))
}

fn integral(name: &str, x: f64) -> TemplateResult<Value> {
    if x.is_nan() {
        return Err(TemplateError::value_error(format!(
            "cannot convert float NaN to integer ({name})"
        )));
    }
    if x.is_infinite() || x.abs() >= 9.223_372_036_854_776e18 {
        return Err(TemplateError::runtime(
            ErrorKind::OverflowError,
            "cannot convert float infinity to integer",
        ));
    }
    Ok(Value::Int(x as i64))
}

fn always(_: f64) -> bool {
    true
}

/// Call a builtin with already-evaluated arguments.
pub(crate) fn call(machine: &mut Machine<'_>, builtin: Builtin, mut args: Args) -> TemplateResult<Value> {
    let name = builtin.name();
    match builtin {
        Builtin::Sqrt => unary_math(name, &args, f64::sqrt, |x| x >= 0.0),
        Builtin::Exp => {
            let value = unary_math(name, &args, f64::exp, always)?;
            match value {
                Value::Float(x) if x.is_infinite() => Err(TemplateError::runtime(
                    ErrorKind::OverflowError,
                    "math range error",
                )),
                other => Ok(other),
            }
        }
        Builtin::Log => {
            args.check(name, 1, 2)?;
            let x = number(name, &args.positional[0])?;
            if x <= 0.0 {
                return Err(domain_error());
            }
            match args.positional.get(1) {
                None => Ok(Value::Float(x.ln())),
                Some(base) => {
                    let base = number(name, base)?;
                    if base <= 0.0 {
                        return Err(domain_error());
                    }
                    if base == 1.0 {
                        return Err(TemplateError::runtime(
                            ErrorKind::ZeroDivisionError,
                            "float division by zero",
                        ));
                    }
                    Ok(Value::Float(x.ln() / base.ln()))
                }
            }
        }
        Builtin::Log10 => unary_math(name, &args, f64::log10, |x| x > 0.0),
        Builtin::Log2 => unary_math(name, &args, f64::log2, |x| x > 0.0),
        Builtin::Sin => unary_math(name, &args, f64::sin, f64::is_finite),
        Builtin::Cos => unary_math(name, &args, f64::cos, f64::is_finite),
        Builtin::Tan => unary_math(name, &args, f64::tan, f64::is_finite),
        Builtin::Asin => unary_math(name, &args, f64::asin, |x| (-1.0..=1.0).contains(&x)),
        Builtin::Acos => unary_math(name, &args, f64::acos, |x| (-1.0..=1.0).contains(&x)),
        Builtin::Atan => unary_math(name, &args, f64::atan, always),
        Builtin::Sinh => unary_math(name, &args, f64::sinh, always),
        Builtin::Cosh => unary_math(name, &args, f64::cosh, always),
        Builtin::Tanh => unary_math(name, &args, f64::tanh, always),
        Builtin::Asinh => unary_math(name, &args, f64::asinh, always),
        Builtin::Acosh => unary_math(name, &args, f64::acosh, |x| x >= 1.0),
        Builtin::Atanh => unary_math(name, &args, f64::atanh, |x| x > -1.0 && x < 1.0),
        Builtin::Fabs => unary_math(name, &args, f64::abs, always),
        Builtin::Degrees => unary_math(name, &args, f64::to_degrees, always),
        Builtin::Radians => unary_math(name, &args, f64::to_radians, always),
        Builtin::IsNan => {
            args.check(name, 1, 1)?;
            Ok(Value::Bool(number(name, &args.positional[0])?.is_nan()))
        }
        Builtin::IsInf => {
            args.check(name, 1, 1)?;
            Ok(Value::Bool(number(name, &args.positional[0])?.is_infinite()))
        }
        Builtin::Floor | Builtin::Ceil => {
            args.check(name, 1, 1)?;
            let value = &args.positional[0];
            if let Some(i) = value.as_int() {
                return Ok(Value::Int(i));
            }
            let x = number(name, value)?;
            integral(name, if builtin == Builtin::Floor { x.floor() } else { x.ceil() })
        }
        Builtin::Atan2 | Builtin::Pow | Builtin::Hypot => {
            args.check(name, 2, 2)?;
            let x = number(name, &args.positional[0])?;
            let y = number(name, &args.positional[1])?;
            Ok(Value::Float(match builtin {
                Builtin::Atan2 => x.atan2(y),
                Builtin::Hypot => x.hypot(y),
                _ => {
                    if (x < 0.0 && y.fract() != 0.0) || (x == 0.0 && y < 0.0) {
                        return Err(domain_error());
                    }
                    x.powf(y)
                }
            }))
        }
        Builtin::Abs => {
            args.check(name, 1, 1)?;
            match &args.positional[0] {
                Value::Float(x) => Ok(Value::Float(x.abs())),
                v => match v.as_int() {
                    Some(i) => i.checked_abs().map(Value::Int).ok_or_else(super::ops::int_overflow),
                    None => Err(TemplateError::type_error(format!(
                        "bad operand type for abs(): '{}'",
                        v.type_name()
                    ))),
                },
            }
        }
        Builtin::Min | Builtin::Max => extremum(machine, builtin, args),
        Builtin::Round => {
            args.check(name, 1, 2)?;
            let digits = match args.positional.get(1) {
                None | Some(Value::None) => None,
                Some(n) => Some(n.as_int().ok_or_else(|| {
                    TemplateError::type_error("'ndigits' must be an integer")
                })?),
            };
            let value = &args.positional[0];
            if let Some(i) = value.as_int() {
                return Ok(match digits {
                    Some(n) if n < 0 => {
                        let factor = 10f64.powi(-n as i32);
                        Value::Int(((i as f64 / factor).round_ties_even() * factor) as i64)
                    }
                    _ => Value::Int(i),
                });
            }
            let x = number(name, value)?;
            match digits {
                None => integral(name, x.round_ties_even()),
                Some(n) => {
                    let factor = 10f64.powi(n as i32);
                    let scaled = x * factor;
                    if !scaled.is_finite() {
                        return Ok(Value::Float(x));
                    }
                    Ok(Value::Float(scaled.round_ties_even() / factor))
                }
            }
        }
        Builtin::Int => {
            args.check(name, 0, 2)?;
            let Some(value) = args.positional.first() else {
                return Ok(Value::Int(0));
            };
            if let Some(base) = args.positional.get(1) {
                let base = base.as_int().ok_or_else(|| TemplateError::type_error("int() base must be an integer"))?;
                let Value::Str(text) = value else {
                    return Err(TemplateError::type_error(
                        "int() can't convert non-string with explicit base",
                    ));
                };
                return parse_int(text, base as u32);
            }
            match value {
                Value::Float(x) => integral(name, x.trunc()),
                Value::Str(text) => parse_int(text, 10),
                v => v.as_int().map(Value::Int).ok_or_else(|| {
                    TemplateError::type_error(format!(
                        "int() argument must be a string or a number, not '{}'",
                        v.type_name()
                    ))
                }),
            }
        }
        Builtin::Float => {
            args.check(name, 0, 1)?;
            match args.positional.first() {
                None => Ok(Value::Float(0.0)),
                Some(Value::Str(text)) => parse_float(text).map(Value::Float).ok_or_else(|| {
                    TemplateError::value_error(format!(
                        "could not convert string to float: {}",
                        Value::Str(text.clone()).repr()
                    ))
                }),
                Some(v) => v.as_f64().map(Value::Float).ok_or_else(|| {
                    TemplateError::type_error(format!(
                        "float() argument must be a string or a number, not '{}'",
                        v.type_name()
                    ))
                }),
            }
        }
        Builtin::Str => {
            args.check(name, 0, 1)?;
            Ok(Value::Str(args.positional.first().map(Value::to_str).unwrap_or_default()))
        }
        Builtin::Repr => {
            args.check(name, 1, 1)?;
            Ok(Value::Str(args.positional[0].repr()))
        }
        Builtin::Bool => {
            args.check(name, 0, 1)?;
            Ok(Value::Bool(args.positional.first().is_some_and(Value::truthy)))
        }
        Builtin::Len => {
            args.check(name, 1, 1)?;
            let len = match &args.positional[0] {
                Value::Str(s) => s.chars().count(),
                Value::List(items) => items.borrow().len(),
                Value::Tuple(items) => items.len(),
                Value::Dict(dict) => dict.borrow().len(),
                other => {
                    return Err(TemplateError::type_error(format!(
                        "object of type '{}' has no len()",
                        other.type_name()
                    )));
                }
            };
            Ok(Value::Int(len as i64))
        }
        Builtin::Range => {
            args.check(name, 1, 3)?;
            let bounds = args
                .positional
                .iter()
                .map(|v| {
                    v.as_int().ok_or_else(|| {
                        TemplateError::type_error(format!(
                            "'{}' object cannot be interpreted as an integer",
                            v.type_name()
                        ))
                    })
                })
                .collect::<TemplateResult<Vec<i64>>>()?;
            let (start, stop, step) = match bounds.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => (0, 0, 1),
            };
            if step == 0 {
                return Err(TemplateError::value_error("range() arg 3 must not be zero"));
            }
            let mut items = Vec::new();
            let mut i = start;
            while (step > 0 && i < stop) || (step < 0 && i > stop) {
                items.push(Value::Int(i));
                i += step;
            }
            Ok(Value::list(items))
        }
        Builtin::Sum => {
            args.check(name, 1, 2)?;
            let start = args.keyword("start").or_else(|| args.positional.get(1).cloned());
            let mut total = start.unwrap_or(Value::Int(0));
            if matches!(total, Value::Str(_)) {
                return Err(TemplateError::type_error(
                    "sum() can't sum strings [use ''.join(seq) instead]",
                ));
            }
            for item in args.positional[0].iterate()? {
                total = super::ops::binary(crate::lang::ast::BinOp::Add, total, item)?;
            }
            Ok(total)
        }
        Builtin::Sorted => {
            args.check(name, 1, 1)?;
            let key = args.keyword("key").filter(|k| !matches!(k, Value::None));
            let reverse = args.keyword("reverse").is_some_and(|r| r.truthy());
            args.no_keywords(name)?;
            let items = args.positional[0].iterate()?;
            Ok(Value::list(sort_values(machine, items, key.as_ref(), reverse)?))
        }
        Builtin::Reversed => {
            args.check(name, 1, 1)?;
            let mut items = args.positional[0].iterate()?;
            items.reverse();
            Ok(Value::list(items))
        }
        Builtin::List => {
            args.check(name, 0, 1)?;
            let items = match args.positional.first() {
                Some(v) => v.iterate()?,
                None => Vec::new(),
            };
            Ok(Value::list(items))
        }
        Builtin::Tuple => {
            args.check(name, 0, 1)?;
            let items = match args.positional.first() {
                Some(v) => v.iterate()?,
                None => Vec::new(),
            };
            Ok(Value::tuple(items))
        }
        Builtin::Dict => {
            args.check(name, 0, 1)?;
            let mut dict = Dict::new();
            match args.positional.first() {
                Some(Value::Dict(source)) => {
                    for (k, v) in source.borrow().iter() {
                        dict.insert(k.clone(), v.clone())?;
                    }
                }
                Some(pairs) => {
                    for pair in pairs.iterate()? {
                        let kv = pair.iterate()?;
                        let [k, v] = <[Value; 2]>::try_from(kv).map_err(|kv| {
                            TemplateError::value_error(format!(
                                "dictionary update sequence element has length {}; 2 is required",
                                kv.len()
                            ))
                        })?;
                        dict.insert(k, v)?;
                    }
                }
                None => {}
            }
            for (k, v) in std::mem::take(&mut args.keywords) {
                dict.insert(Value::Str(k), v)?;
            }
            Ok(Value::dict(dict))
        }
        Builtin::Enumerate => {
            args.check(name, 1, 2)?;
            let start = args
                .keyword("start")
                .or_else(|| args.positional.get(1).cloned())
                .and_then(|v| v.as_int())
                .unwrap_or(0);
            let items = args.positional[0].iterate()?;
            Ok(Value::list(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| Value::tuple(vec![Value::Int(start + i as i64), v]))
                    .collect(),
            ))
        }
        Builtin::Zip => {
            args.no_keywords(name)?;
            let columns = args
                .positional
                .iter()
                .map(Value::iterate)
                .collect::<TemplateResult<Vec<_>>>()?;
            let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
            Ok(Value::list(
                (0..rows)
                    .map(|row| Value::tuple(columns.iter().map(|col| col[row].clone()).collect()))
                    .collect(),
            ))
        }
        Builtin::Any | Builtin::All => {
            args.check(name, 1, 1)?;
            let items = args.positional[0].iterate()?;
            Ok(Value::Bool(if builtin == Builtin::Any {
                items.iter().any(Value::truthy)
            } else {
                items.iter().all(Value::truthy)
            }))
        }
        Builtin::DivMod => {
            args.check(name, 2, 2)?;
            use crate::lang::ast::BinOp;
            let a = args.positional[0].clone();
            let b = args.positional[1].clone();
            let quotient = super::ops::binary(BinOp::FloorDiv, a.clone(), b.clone())?;
            let remainder = super::ops::binary(BinOp::Mod, a, b)?;
            Ok(Value::tuple(vec![quotient, remainder]))
        }
        Builtin::Format => {
            args.check(name, 1, 2)?;
            let spec = args.positional.get(1).map(Value::to_str).unwrap_or_default();
            format_spec(&args.positional[0], &spec).map(Value::Str)
        }
        Builtin::Include => {
            args.check(name, 1, 1)?;
            let target = args.positional[0].to_str();
            machine.include(&target, std::mem::take(&mut args.keywords))?;
            Ok(Value::None)
        }
        Builtin::Rebase => {
            args.check(name, 1, 1)?;
            let target = args.positional[0].to_str();
            machine.request_rebase(target, std::mem::take(&mut args.keywords));
            Ok(Value::None)
        }
        Builtin::Defined => {
            args.check(name, 1, 1)?;
            args.no_keywords(name)?;
            let var = args.positional[0].to_str();
            Ok(Value::Bool(machine.lookup(&var).is_some()))
        }
        Builtin::Get => {
            args.check(name, 1, 2)?;
            let default = args
                .keyword("default")
                .or_else(|| args.positional.get(1).cloned())
                .unwrap_or(Value::None);
            args.no_keywords(name)?;
            let var = args.positional[0].to_str();
            Ok(machine.lookup(&var).unwrap_or(default))
        }
        Builtin::Immutable | Builtin::Mutable => {
            args.check(name, 1, 1)?;
            args.no_keywords(name)?;
            let lock = if builtin == Builtin::Immutable {
                Lock::Immutable
            } else {
                Lock::Mutable
            };
            let inner = args.positional.swap_remove(0).unmarked();
            Ok(Value::Marked(lock, Box::new(inner)))
        }
        Builtin::SetFmt => {
            args.check(name, 1, 1)?;
            let fmt = args.positional[0].to_str();
            validate_default(&fmt)?;
            machine.set_fmt(fmt);
            Ok(Value::None)
        }
        Builtin::Fmt => {
            args.check(name, 1, 2)?;
            let spec = args
                .keyword("spec")
                .or_else(|| args.positional.get(1).cloned())
                .filter(|s| !matches!(s, Value::None));
            args.no_keywords(name)?;
            let value = &args.positional[0];
            let text = match spec {
                None => apply_default(machine.fmt(), value)?,
                Some(spec) => {
                    let spec = spec.to_str();
                    if spec.contains('%') || spec.contains('{') {
                        apply_default(&spec, value)?
                    } else {
                        format_spec(value, &spec)?
                    }
                }
            };
            Ok(Value::Str(text))
        }
        Builtin::AllVars => {
            args.check(name, 0, 0)?;
            let mut dict = Dict::new();
            for (key, value) in machine.env().user_vars() {
                dict.insert(Value::from(key), value.clone())?;
            }
            Ok(Value::dict(dict))
        }
        Builtin::AllVarNames => {
            args.check(name, 0, 0)?;
            Ok(Value::list(
                machine.env().user_vars().map(|(key, _)| Value::from(key)).collect(),
            ))
        }
    }
}

fn parse_int(text: &str, base: u32) -> TemplateResult<Value> {
    let invalid = || {
        TemplateError::value_error(format!(
            "invalid literal for int() with base {base}: {}",
            Value::from(text).repr()
        ))
    };
    if !(base == 0 || (2..=36).contains(&base)) {
        return Err(TemplateError::value_error("int() base must be >= 2 and <= 36, or 0"));
    }
    let trimmed = text.trim().replace('_', "");
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(&trimmed)),
    };
    let lower = digits.to_ascii_lowercase();
    let (radix, body) = match (base, lower.get(..2)) {
        (0 | 16, Some("0x")) => (16, &lower[2..]),
        (0 | 8, Some("0o")) => (8, &lower[2..]),
        (0 | 2, Some("0b")) => (2, &lower[2..]),
        (0, _) => (10, lower.as_str()),
        (b, _) => (b, lower.as_str()),
    };
    if body.is_empty() {
        return Err(invalid());
    }
    let magnitude = i64::from_str_radix(body, radix).map_err(|_| invalid())?;
    Ok(Value::Int(if negative { -magnitude } else { magnitude }))
}

pub(crate) fn sort_values(
    machine: &mut Machine<'_>,
    items: Vec<Value>,
    key: Option<&Value>,
    reverse: bool,
) -> TemplateResult<Vec<Value>> {
    let mut decorated = Vec::with_capacity(items.len());
    for item in items {
        let sort_key = match key {
            Some(func) => machine.call_value(func, Args::positional(vec![item.clone()]))?,
            None => item.clone(),
        };
        decorated.push((sort_key, item));
    }
    let mut failure = None;
    decorated.sort_by(|(a, _), (b, _)| {
        let ordering = a.py_cmp(b).unwrap_or_else(|err| {
            failure.get_or_insert(err);
            Ordering::Equal
        });
        if reverse { ordering.reverse() } else { ordering }
    });
    if let Some(err) = failure {
        return Err(err);
    }
    Ok(decorated.into_iter().map(|(_, item)| item).collect())
}

fn extremum(machine: &mut Machine<'_>, builtin: Builtin, mut args: Args) -> TemplateResult<Value> {
    let name = builtin.name();
    let key = args.keyword("key").filter(|k| !matches!(k, Value::None));
    let default = args.keyword("default");
    args.no_keywords(name)?;
    let items = match args.positional.len() {
        0 => {
            return Err(TemplateError::type_error(format!(
                "{name} expected at least 1 argument, got 0"
            )));
        }
        1 => args.positional[0].iterate()?,
        _ => std::mem::take(&mut args.positional),
    };
    if items.is_empty() {
        return default.ok_or_else(|| {
            TemplateError::value_error(format!("{name}() arg is an empty sequence"))
        });
    }
    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let item_key = match &key {
            Some(func) => machine.call_value(func, Args::positional(vec![item.clone()]))?,
            None => item.clone(),
        };
        let replace = match &best {
            None => true,
            Some((best_key, _)) => {
                let ordering = item_key.py_cmp(best_key)?;
                if builtin == Builtin::Min {
                    ordering == Ordering::Less
                } else {
                    ordering == Ordering::Greater
                }
            }
        };
        if replace {
            best = Some((item_key, item));
        }
    }
    Ok(best.map(|(_, item)| item).unwrap_or(Value::None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_unique() {
        let mut names: Vec<&str> = Builtin::ALL.iter().map(|b| b.name()).collect();
        names.sort_unstable();
        let before = names.len();
        names.dedup();
        assert_eq!(before, names.len());
    }

    #[test]
    fn test_reserved_names() {
        assert!(is_reserved("sqrt"));
        assert!(is_reserved("pi"));
        assert!(is_reserved("include"));
        assert!(!is_reserved("x"));
    }

    #[test]
    fn test_parse_int() {
        assert!(matches!(parse_int(" 42 ", 10).unwrap(), Value::Int(42)));
        assert!(matches!(parse_int("-0x1f", 0).unwrap(), Value::Int(-31)));
        assert!(matches!(parse_int("ff", 16).unwrap(), Value::Int(255)));
        assert_eq!(parse_int("4.5", 10).unwrap_err().class_name(), "ValueError");
    }
}
