/*
 * ops.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Operator semantics.
//!
//! Integer arithmetic is checked; a result that does not fit in an `i64`
//! raises `OverflowError` instead of wrapping.

use std::rc::Rc;

use crate::error::{ErrorKind, TemplateError, TemplateResult};
use crate::format::percent_format;
use crate::lang::ast::{BinOp, CmpOp, UnaryOp};
use crate::value::Value;

fn unsupported(op: &str, a: &Value, b: &Value) -> TemplateError {
    TemplateError::type_error(format!(
        "unsupported operand type(s) for {op}: '{}' and '{}'",
        a.type_name(),
        b.type_name()
    ))
}

fn zero_division(message: &str) -> TemplateError {
    TemplateError::runtime(ErrorKind::ZeroDivisionError, message)
}

/// An integer result outside the `i64` range.
pub fn int_overflow() -> TemplateError {
    TemplateError::runtime(ErrorKind::OverflowError, "integer result too large for a 64-bit int")
}

pub fn unary(op: UnaryOp, value: Value) -> TemplateResult<Value> {
    match (op, &value) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.truthy())),
        (UnaryOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
        (UnaryOp::Pos, Value::Float(x)) => Ok(Value::Float(*x)),
        (UnaryOp::Neg, v) if v.as_int().is_some() => {
            let i = v.as_int().unwrap_or(0);
            i.checked_neg().map(Value::Int).ok_or_else(int_overflow)
        }
        (UnaryOp::Pos, v) if v.as_int().is_some() => Ok(Value::Int(v.as_int().unwrap_or(0))),
        (UnaryOp::Invert, v) if v.as_int().is_some() => Ok(Value::Int(!v.as_int().unwrap_or(0))),
        (op, v) => {
            let symbol = match op {
                UnaryOp::Neg => "-",
                UnaryOp::Pos => "+",
                _ => "~",
            };
            Err(TemplateError::type_error(format!(
                "bad operand type for unary {symbol}: '{}'",
                v.type_name()
            )))
        }
    }
}

/// Both operands as integers (booleans included), if they are.
fn ints(a: &Value, b: &Value) -> Option<(i64, i64)> {
    Some((a.as_int()?, b.as_int()?))
}

fn floats(a: &Value, b: &Value) -> Option<(f64, f64)> {
    Some((a.as_f64()?, b.as_f64()?))
}

fn repeat(items: &[Value], times: i64) -> Vec<Value> {
    let times = usize::try_from(times).unwrap_or(0);
    let mut out = Vec::with_capacity(items.len() * times);
    for _ in 0..times {
        out.extend(items.iter().cloned());
    }
    out
}

pub fn binary(op: BinOp, a: Value, b: Value) -> TemplateResult<Value> {
    match op {
        BinOp::Add => add(a, b),
        BinOp::Sub => arith(a, b, "-", i64::checked_sub, |x, y| x - y),
        BinOp::Mul => mul(a, b),
        BinOp::Div => {
            let (x, y) = floats(&a, &b).ok_or_else(|| unsupported("/", &a, &b))?;
            if y == 0.0 {
                return Err(zero_division("division by zero"));
            }
            Ok(Value::Float(x / y))
        }
        BinOp::FloorDiv => {
            if let Some((x, y)) = ints(&a, &b) {
                if y == 0 {
                    return Err(zero_division("integer division or modulo by zero"));
                }
                let q = x.checked_div(y).ok_or_else(int_overflow)?;
                return Ok(Value::Int(if (x % y != 0) && ((x < 0) != (y < 0)) { q - 1 } else { q }));
            }
            let (x, y) = floats(&a, &b).ok_or_else(|| unsupported("//", &a, &b))?;
            if y == 0.0 {
                return Err(zero_division("float floor division by zero"));
            }
            Ok(Value::Float((x / y).floor()))
        }
        BinOp::Mod => {
            if let Value::Str(template) = &a {
                return percent_format(template, &b).map(Value::Str);
            }
            if let Some((x, y)) = ints(&a, &b) {
                if y == 0 {
                    return Err(zero_division("integer division or modulo by zero"));
                }
                let r = x.checked_rem(y).unwrap_or(0);
                return Ok(Value::Int(if r != 0 && ((r < 0) != (y < 0)) { r + y } else { r }));
            }
            let (x, y) = floats(&a, &b).ok_or_else(|| unsupported("%", &a, &b))?;
            if y == 0.0 {
                return Err(zero_division("float modulo"));
            }
            let r = x % y;
            Ok(Value::Float(if r != 0.0 && ((r < 0.0) != (y < 0.0)) { r + y } else { r }))
        }
        BinOp::Pow => pow(a, b),
        BinOp::LShift | BinOp::RShift => {
            let (x, y) = ints(&a, &b).ok_or_else(|| unsupported(op.symbol(), &a, &b))?;
            if y < 0 {
                return Err(TemplateError::value_error("negative shift count"));
            }
            if op == BinOp::RShift {
                return Ok(Value::Int(if y >= 64 { if x < 0 { -1 } else { 0 } } else { x >> y }));
            }
            let shifted = u32::try_from(y)
                .ok()
                .and_then(|y| 1i64.checked_shl(y))
                .filter(|factor| *factor > 0)
                .and_then(|factor| x.checked_mul(factor));
            shifted.map(Value::Int).ok_or_else(int_overflow)
        }
        BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => {
            let both_bool = matches!((&a, &b), (Value::Bool(_), Value::Bool(_)));
            let (x, y) = ints(&a, &b).ok_or_else(|| unsupported(op.symbol(), &a, &b))?;
            let result = match op {
                BinOp::BitAnd => x & y,
                BinOp::BitOr => x | y,
                _ => x ^ y,
            };
            Ok(if both_bool {
                Value::Bool(result != 0)
            } else {
                Value::Int(result)
            })
        }
        BinOp::MatMul => Err(unsupported("@", &a, &b)),
    }
}

fn arith(
    a: Value,
    b: Value,
    symbol: &str,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> TemplateResult<Value> {
    if let Some((x, y)) = ints(&a, &b) {
        return int_op(x, y).map(Value::Int).ok_or_else(int_overflow);
    }
    let (x, y) = floats(&a, &b).ok_or_else(|| unsupported(symbol, &a, &b))?;
    Ok(Value::Float(float_op(x, y)))
}

fn add(a: Value, b: Value) -> TemplateResult<Value> {
    match (&a, &b) {
        (Value::Str(x), Value::Str(y)) => Ok(Value::Str(format!("{x}{y}"))),
        (Value::List(x), Value::List(y)) => {
            let mut items = x.borrow().clone();
            items.extend(y.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        (Value::Tuple(x), Value::Tuple(y)) => {
            Ok(Value::tuple(x.iter().chain(y.iter()).cloned().collect()))
        }
        _ => arith(a, b, "+", i64::checked_add, |x, y| x + y),
    }
}

fn mul(a: Value, b: Value) -> TemplateResult<Value> {
    let (seq, times) = match (&a, &b) {
        (seq, n) | (n, seq)
            if matches!(seq, Value::Str(_) | Value::List(_) | Value::Tuple(_)) && n.as_int().is_some() =>
        {
            (seq, n.as_int().unwrap_or(0))
        }
        _ => return arith(a, b, "*", i64::checked_mul, |x, y| x * y),
    };
    Ok(match seq {
        Value::Str(s) => Value::Str(s.repeat(usize::try_from(times).unwrap_or(0))),
        Value::List(items) => Value::list(repeat(&items.borrow(), times)),
        Value::Tuple(items) => Value::tuple(repeat(items, times)),
        _ => Value::None,
    })
}

fn pow(a: Value, b: Value) -> TemplateResult<Value> {
    if let Some((x, y)) = ints(&a, &b) {
        if y >= 0 {
            let result = match x {
                0 | 1 => Some(x),
                -1 => Some(if y % 2 == 0 { 1 } else { -1 }),
                _ => u32::try_from(y).ok().and_then(|y| x.checked_pow(y)),
            };
            return result.map(Value::Int).ok_or_else(int_overflow);
        }
        if x == 0 {
            return Err(zero_division("0.0 cannot be raised to a negative power"));
        }
        return Ok(Value::Float((x as f64).powf(y as f64)));
    }
    let (x, y) = floats(&a, &b).ok_or_else(|| unsupported("** or pow()", &a, &b))?;
    if x == 0.0 && y < 0.0 {
        return Err(zero_division("0.0 cannot be raised to a negative power"));
    }
    if x < 0.0 && y.fract() != 0.0 {
        return Err(TemplateError::value_error(
            "negative number cannot be raised to a fractional power",
        ));
    }
    let result = x.powf(y);
    if result.is_infinite() && x.is_finite() && y.is_finite() {
        return Err(TemplateError::runtime(
            ErrorKind::OverflowError,
            "(34, 'Numerical result out of range')",
        ));
    }
    Ok(Value::Float(result))
}

/// Membership test for `item in container`.
pub fn contains(container: &Value, item: &Value) -> TemplateResult<bool> {
    match container {
        Value::Str(haystack) => match item {
            Value::Str(needle) => Ok(haystack.contains(needle.as_str())),
            other => Err(TemplateError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) => Ok(items.borrow().iter().any(|v| v.py_eq(item))),
        Value::Tuple(items) => Ok(items.iter().any(|v| v.py_eq(item))),
        Value::Dict(dict) => dict.borrow().contains(item),
        other => Err(TemplateError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn identical(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x.to_bits() == y.to_bits(),
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(x), Value::List(y)) => Rc::ptr_eq(x, y),
        (Value::Tuple(x), Value::Tuple(y)) => Rc::ptr_eq(x, y),
        (Value::Dict(x), Value::Dict(y)) => Rc::ptr_eq(x, y),
        (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
        (Value::Builtin(x), Value::Builtin(y)) => x == y,
        _ => false,
    }
}

pub fn compare(op: CmpOp, a: &Value, b: &Value) -> TemplateResult<bool> {
    use std::cmp::Ordering::{Equal, Greater, Less};
    Ok(match op {
        CmpOp::Eq => a.py_eq(b),
        CmpOp::NotEq => !a.py_eq(b),
        CmpOp::Lt => a.py_cmp(b)? == Less,
        CmpOp::LtE => matches!(a.py_cmp(b)?, Less | Equal),
        CmpOp::Gt => a.py_cmp(b)? == Greater,
        CmpOp::GtE => matches!(a.py_cmp(b)?, Greater | Equal),
        CmpOp::In => contains(b, a)?,
        CmpOp::NotIn => !contains(b, a)?,
        CmpOp::Is => identical(a, b),
        CmpOp::IsNot => !identical(a, b),
    })
}

fn index_of(len: usize, index: &Value, kind: &str) -> TemplateResult<usize> {
    let i = index.as_int().ok_or_else(|| {
        TemplateError::type_error(format!(
            "{kind} indices must be integers or slices, not {}",
            index.type_name()
        ))
    })?;
    let len_i = len as i64;
    let adjusted = if i < 0 { i + len_i } else { i };
    if adjusted < 0 || adjusted >= len_i {
        return Err(TemplateError::runtime(
            ErrorKind::IndexError,
            format!("{kind} index out of range"),
        ));
    }
    Ok(adjusted as usize)
}

pub fn get_item(object: &Value, index: &Value) -> TemplateResult<Value> {
    match object {
        Value::List(items) => {
            let items = items.borrow();
            Ok(items[index_of(items.len(), index, "list")?].clone())
        }
        Value::Tuple(items) => Ok(items[index_of(items.len(), index, "tuple")?].clone()),
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(Value::Str(chars[index_of(chars.len(), index, "string")?].to_string()))
        }
        Value::Dict(dict) => dict.borrow().get_item(index),
        other => Err(TemplateError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

pub fn set_item(object: &Value, index: Value, value: Value) -> TemplateResult<()> {
    match object {
        Value::List(items) => {
            let mut items = items.borrow_mut();
            let at = index_of(items.len(), &index, "list")?;
            items[at] = value;
            Ok(())
        }
        Value::Dict(dict) => dict.borrow_mut().insert(index, value),
        other => Err(TemplateError::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

pub fn del_item(object: &Value, index: &Value) -> TemplateResult<()> {
    match object {
        Value::List(items) => {
            let mut items = items.borrow_mut();
            let at = index_of(items.len(), index, "list")?;
            items.remove(at);
            Ok(())
        }
        Value::Dict(dict) => match dict.borrow_mut().remove(index)? {
            Some(_) => Ok(()),
            None => Err(TemplateError::runtime(ErrorKind::KeyError, index.repr())),
        },
        other => Err(TemplateError::type_error(format!(
            "'{}' object doesn't support item deletion",
            other.type_name()
        ))),
    }
}

/// Positions selected by a slice over a sequence of length `len`.
pub fn slice_indices(
    len: usize,
    lower: Option<i64>,
    upper: Option<i64>,
    step: Option<i64>,
) -> TemplateResult<Vec<usize>> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(TemplateError::value_error("slice step cannot be zero"));
    }
    let len = len as i64;
    let clamp = |bound: i64, low: i64, high: i64| {
        let bound = if bound < 0 { bound + len } else { bound };
        bound.clamp(low, high)
    };
    let (start, stop) = if step > 0 {
        (
            lower.map_or(0, |b| clamp(b, 0, len)),
            upper.map_or(len, |b| clamp(b, 0, len)),
        )
    } else {
        (
            lower.map_or(len - 1, |b| clamp(b, -1, len - 1)),
            upper.map_or(-1, |b| clamp(b, -1, len - 1)),
        )
    };
    let mut positions = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        positions.push(i as usize);
        i += step;
    }
    Ok(positions)
}

pub fn slice(
    object: &Value,
    lower: Option<i64>,
    upper: Option<i64>,
    step: Option<i64>,
) -> TemplateResult<Value> {
    match object {
        Value::List(items) => {
            let items = items.borrow();
            let picked = slice_indices(items.len(), lower, upper, step)?;
            Ok(Value::list(picked.into_iter().map(|i| items[i].clone()).collect()))
        }
        Value::Tuple(items) => {
            let picked = slice_indices(items.len(), lower, upper, step)?;
            Ok(Value::tuple(picked.into_iter().map(|i| items[i].clone()).collect()))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let picked = slice_indices(chars.len(), lower, upper, step)?;
            Ok(Value::Str(picked.into_iter().map(|i| chars[i]).collect()))
        }
        other => Err(TemplateError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bin(op: BinOp, a: impl Into<Value>, b: impl Into<Value>) -> Value {
        binary(op, a.into(), b.into()).unwrap()
    }

    #[test]
    fn test_integer_arithmetic() {
        assert!(matches!(bin(BinOp::Add, 2i64, 3i64), Value::Int(5)));
        assert!(matches!(bin(BinOp::FloorDiv, -7i64, 2i64), Value::Int(-4)));
        assert!(matches!(bin(BinOp::Mod, -7i64, 3i64), Value::Int(2)));
        assert!(matches!(bin(BinOp::Div, 7i64, 2i64), Value::Float(x) if x == 3.5));
        assert!(matches!(bin(BinOp::Pow, 2i64, 10i64), Value::Int(1024)));
        assert!(matches!(bin(BinOp::Pow, 2i64, -1i64), Value::Float(x) if x == 0.5));
    }

    #[test]
    fn test_integer_overflow_is_an_error() {
        let overflow = |op, a: i64, b: i64| {
            binary(op, Value::Int(a), Value::Int(b)).unwrap_err().class_name()
        };
        assert_eq!(overflow(BinOp::Add, i64::MAX, 1), "OverflowError");
        assert_eq!(overflow(BinOp::Sub, i64::MIN, 1), "OverflowError");
        assert_eq!(overflow(BinOp::Mul, i64::MAX, 2), "OverflowError");
        assert_eq!(overflow(BinOp::Pow, 2, 64), "OverflowError");
        assert_eq!(overflow(BinOp::Pow, 10, 400), "OverflowError");
        assert_eq!(overflow(BinOp::LShift, 1, 63), "OverflowError");
        assert_eq!(overflow(BinOp::FloorDiv, i64::MIN, -1), "OverflowError");
        let err = unary(UnaryOp::Neg, Value::Int(i64::MIN)).unwrap_err();
        assert_eq!(err.class_name(), "OverflowError");
        assert!(matches!(bin(BinOp::Pow, 2i64, 62i64), Value::Int(x) if x == 1 << 62));
        assert!(matches!(bin(BinOp::Pow, -1i64, 5_000_000_001i64), Value::Int(-1)));
        assert!(matches!(bin(BinOp::Mul, 1e300, 1e300), Value::Float(x) if x.is_infinite()));
    }

    #[test]
    fn test_division_by_zero() {
        let err = binary(BinOp::Div, Value::Int(1), Value::Int(0)).unwrap_err();
        assert_eq!(err.class_name(), "ZeroDivisionError");
    }

    #[test]
    fn test_sequences() {
        assert_eq!(bin(BinOp::Mul, "ab", 3i64).to_str(), "ababab");
        let list = Value::list(vec![Value::Int(1)]);
        assert_eq!(bin(BinOp::Mul, 2i64, list).repr(), "[1, 1]");
        assert_eq!(bin(BinOp::Mod, "%d-%s", Value::tuple(vec![Value::Int(1), "a".into()])).to_str(), "1-a");
        assert!(binary(BinOp::Add, Value::Int(1), Value::from("a")).is_err());
    }

    #[test]
    fn test_slices() {
        let list = Value::list((0..6).map(Value::Int).collect());
        assert_eq!(slice(&list, Some(1), Some(4), None).unwrap().repr(), "[1, 2, 3]");
        assert_eq!(slice(&list, None, None, Some(-2)).unwrap().repr(), "[5, 3, 1]");
        assert_eq!(slice(&list, Some(-2), None, None).unwrap().repr(), "[4, 5]");
        assert_eq!(slice(&Value::from("hello"), None, Some(-1), None).unwrap().to_str(), "hell");
    }

    #[test]
    fn test_indexing() {
        let list = Value::list(vec![Value::Int(1), Value::Int(2)]);
        assert!(get_item(&list, &Value::Int(-1)).unwrap().py_eq(&Value::Int(2)));
        assert_eq!(get_item(&list, &Value::Int(5)).unwrap_err().class_name(), "IndexError");
        assert!(compare(CmpOp::In, &Value::Int(2), &list).unwrap());
        assert!(compare(CmpOp::Lt, &Value::Int(1), &Value::Float(1.5)).unwrap());
    }
}
