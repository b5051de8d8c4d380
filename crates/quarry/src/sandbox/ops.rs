// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

//! Operator semantics for scalars, containers and element-wise columns.

use crate::sandbox::error::ScriptError;
use crate::sandbox::value::{DictKey, Value};
use crate::script::ast::{BinOp, CmpOp, UnaryOp};
use crate::tabular::{Cell, ColumnData};
use chrono::{Duration, NaiveTime};
use std::cmp::Ordering;
use std::rc::Rc;

fn unsupported(op: &str, left: &Value, right: &Value) -> ScriptError {
    ScriptError::type_error(format!(
        "unsupported operand type(s) for {op}: '{}' and '{}'",
        left.type_name(),
        right.type_name()
    ))
}

fn overflow() -> ScriptError {
    ScriptError::new("OverflowError", "integer result too large")
}

fn too_large(max_len: usize) -> ScriptError {
    ScriptError::memory_error(format!(
        "repeated sequence would exceed the {max_len} element limit"
    ))
}

fn int_op(op: BinOp, a: i64, b: i64) -> Result<Value, ScriptError> {
    let value = match op {
        BinOp::Add => Value::Int(a.checked_add(b).ok_or_else(overflow)?),
        BinOp::Sub => Value::Int(a.checked_sub(b).ok_or_else(overflow)?),
        BinOp::Mul => Value::Int(a.checked_mul(b).ok_or_else(overflow)?),
        BinOp::Div => {
            if b == 0 {
                return Err(ScriptError::zero_division("division by zero"));
            }
            Value::Float(a as f64 / b as f64)
        }
        BinOp::FloorDiv | BinOp::Mod => {
            if b == 0 {
                return Err(ScriptError::zero_division(
                    "integer division or modulo by zero",
                ));
            }
            // Only `i64::MIN % -1` overflows here, and its remainder is 0.
            let r = a.checked_rem_euclid(b).unwrap_or(0);
            // Python rounds the quotient toward negative infinity.
            let adjust = b < 0 && r != 0;
            if op == BinOp::Mod {
                return Ok(Value::Int(if adjust { r + b } else { r }));
            }
            let q = a.checked_div_euclid(b).ok_or_else(overflow)?;
            Value::Int(if adjust { q + 1 } else { q })
        }
        BinOp::Pow => match u32::try_from(b) {
            Ok(exp) => Value::Int(a.checked_pow(exp).ok_or_else(overflow)?),
            Err(_) => Value::Float((a as f64).powf(b as f64)),
        },
        BinOp::BitAnd => Value::Int(a & b),
        BinOp::BitOr => Value::Int(a | b),
    };
    Ok(value)
}

fn float_op(op: BinOp, a: f64, b: f64) -> Result<Value, ScriptError> {
    let value = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div | BinOp::FloorDiv | BinOp::Mod if b == 0.0 => {
            return Err(ScriptError::zero_division("float division by zero"))
        }
        BinOp::Div => a / b,
        BinOp::FloorDiv => (a / b).floor(),
        BinOp::Mod => a - b * (a / b).floor(),
        BinOp::Pow => a.powf(b),
        BinOp::BitAnd | BinOp::BitOr => {
            return Err(unsupported(op.symbol(), &Value::Float(a), &Value::Float(b)))
        }
    };
    Ok(Value::Float(value))
}

fn repeated_len(unit: usize, times: i64, max_len: usize) -> Result<usize, ScriptError> {
    let times = usize::try_from(times).unwrap_or(0);
    unit.checked_mul(times)
        .filter(|len| *len <= max_len)
        .ok_or_else(|| too_large(max_len))
}

fn repeat<T: Clone>(items: &[T], times: i64, max_len: usize) -> Result<Vec<T>, ScriptError> {
    let len = repeated_len(items.len(), times, max_len)?;
    Ok(items.iter().cloned().cycle().take(len).collect())
}

fn repeat_str(text: &str, times: i64, max_len: usize) -> Result<String, ScriptError> {
    repeated_len(text.len(), times, max_len)?;
    Ok(text.repeat(usize::try_from(times).unwrap_or(0)))
}

fn delta_scale(delta: Duration, factor: f64) -> Result<Duration, ScriptError> {
    let millis = delta.num_milliseconds() as f64 * factor;
    if !millis.is_finite() {
        return Err(overflow());
    }
    Duration::try_milliseconds(millis.round() as i64).ok_or_else(overflow)
}

fn text_len(data: &ColumnData) -> u64 {
    match data {
        ColumnData::Str(cells) => cells.iter().flatten().map(|s| s.len() as u64).sum(),
        _ => 0,
    }
}

/// Size of the sequence `op` would build by repetition or concatenation.
///
/// String sizes are in bytes; element-wise repetition of text columns sums every cell.
pub fn produced_len(op: BinOp, left: &Value, right: &Value) -> Option<u64> {
    use Value as V;
    match (op, left, right) {
        (BinOp::Mul, seq, V::Int(n)) | (BinOp::Mul, V::Int(n), seq) => {
            let unit = match seq {
                V::Str(text) => text.len() as u64,
                V::List(items) => items.borrow().len() as u64,
                V::Tuple(items) => items.len() as u64,
                V::Series(series) => text_len(&series.data),
                V::Frame(table) => table.borrow().columns().iter().map(|(_, data)| text_len(data)).sum(),
                _ => return None,
            };
            Some(unit.saturating_mul(u64::try_from(*n).unwrap_or(0)))
        }
        (BinOp::Add, V::Str(a), V::Str(b)) => Some((a.len() + b.len()) as u64),
        (BinOp::Add, V::List(a), V::List(b)) => Some((a.borrow().len() + b.borrow().len()) as u64),
        (BinOp::Add, V::Tuple(a), V::Tuple(b)) => Some((a.len() + b.len()) as u64),
        _ => None,
    }
}

/// Applies `op`; sequences built by repetition may hold at most `max_len` elements.
pub fn binary(op: BinOp, left: &Value, right: &Value, max_len: usize) -> Result<Value, ScriptError> {
    if is_vector(left) || is_vector(right) {
        return vector_binary(op, left, right, max_len);
    }
    use Value as V;
    match (op, left, right) {
        (_, V::Int(_) | V::Bool(_), V::Int(_) | V::Bool(_))
            if !(matches!(op, BinOp::BitAnd | BinOp::BitOr)
                && matches!((left, right), (V::Bool(_), V::Bool(_)))) =>
        {
            int_op(op, left.as_i64().unwrap_or_default(), right.as_i64().unwrap_or_default())
        }
        (BinOp::BitAnd, V::Bool(a), V::Bool(b)) => Ok(V::Bool(*a && *b)),
        (BinOp::BitOr, V::Bool(a), V::Bool(b)) => Ok(V::Bool(*a || *b)),
        (_, V::Int(_) | V::Bool(_) | V::Float(_), V::Int(_) | V::Bool(_) | V::Float(_)) => {
            float_op(op, left.as_f64().unwrap_or_default(), right.as_f64().unwrap_or_default())
        }
        (BinOp::Add, V::Str(a), V::Str(b)) => Ok(V::Str(format!("{a}{b}"))),
        (BinOp::Mul, V::Str(s), V::Int(n)) | (BinOp::Mul, V::Int(n), V::Str(s)) => {
            repeat_str(s, *n, max_len).map(V::Str)
        }
        (BinOp::Mod, V::Str(template), args) => {
            crate::sandbox::format::percent_format(template, args).map(V::Str)
        }
        (BinOp::Add, V::List(a), V::List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Ok(V::list(items))
        }
        (BinOp::Mul, V::List(items), V::Int(n)) | (BinOp::Mul, V::Int(n), V::List(items)) => {
            Ok(V::list(repeat(&items.borrow(), *n, max_len)?))
        }
        (BinOp::Add, V::Tuple(a), V::Tuple(b)) => {
            Ok(V::tuple(a.iter().chain(b.iter()).cloned().collect()))
        }
        (BinOp::Mul, V::Tuple(items), V::Int(n)) | (BinOp::Mul, V::Int(n), V::Tuple(items)) => {
            Ok(V::tuple(repeat(items, *n, max_len)?))
        }
        (BinOp::Add, V::Date(d), V::Delta(delta)) | (BinOp::Add, V::Delta(delta), V::Date(d)) => {
            d.checked_add_signed(*delta).map(V::Date).ok_or_else(overflow)
        }
        (BinOp::Sub, V::Date(d), V::Delta(delta)) => {
            d.checked_sub_signed(*delta).map(V::Date).ok_or_else(overflow)
        }
        (BinOp::Add, V::DateTime(d), V::Delta(delta))
        | (BinOp::Add, V::Delta(delta), V::DateTime(d)) => d
            .checked_add_signed(*delta)
            .map(V::DateTime)
            .ok_or_else(overflow),
        (BinOp::Sub, V::DateTime(d), V::Delta(delta)) => d
            .checked_sub_signed(*delta)
            .map(V::DateTime)
            .ok_or_else(overflow),
        (BinOp::Sub, V::Date(a), V::Date(b)) => Ok(V::Delta(*a - *b)),
        (BinOp::Sub, V::DateTime(a), V::DateTime(b)) => Ok(V::Delta(*a - *b)),
        (BinOp::Sub, V::DateTime(a), V::Date(b)) => Ok(V::Delta(*a - b.and_time(NaiveTime::MIN))),
        (BinOp::Sub, V::Date(a), V::DateTime(b)) => Ok(V::Delta(a.and_time(NaiveTime::MIN) - *b)),
        (BinOp::Add, V::Delta(a), V::Delta(b)) => a.checked_add(b).map(V::Delta).ok_or_else(overflow),
        (BinOp::Sub, V::Delta(a), V::Delta(b)) => a.checked_sub(b).map(V::Delta).ok_or_else(overflow),
        (BinOp::Mul, V::Delta(d), n) | (BinOp::Mul, n, V::Delta(d)) if n.as_f64().is_some() => {
            delta_scale(*d, n.as_f64().unwrap_or_default()).map(V::Delta)
        }
        (BinOp::Div, V::Delta(a), V::Delta(b)) => {
            if b.is_zero() {
                return Err(ScriptError::zero_division("division by zero"));
            }
            Ok(V::Float(a.num_milliseconds() as f64 / b.num_milliseconds() as f64))
        }
        _ => Err(unsupported(op.symbol(), left, right)),
    }
}

pub fn unary(op: UnaryOp, value: &Value) -> Result<Value, ScriptError> {
    if let Value::Series(series) = value {
        let cells: Vec<Cell> = series
            .data
            .cells()
            .into_iter()
            .map(|cell| match (op, cell) {
                (_, Cell::Null) => Ok(Cell::Null),
                (UnaryOp::Invert | UnaryOp::Not, Cell::Bool(b)) => Ok(Cell::Bool(!b)),
                (_, cell) => {
                    let scalar = unary(op, &Value::from_cell(cell))?;
                    Ok(scalar.to_cell().unwrap_or(Cell::Null))
                }
            })
            .collect::<Result<_, ScriptError>>()?;
        return Ok(Value::series(series.name.clone(), ColumnData::from_cells(&cells)));
    }
    let bad = || {
        ScriptError::type_error(format!(
            "bad operand type for unary {}: '{}'",
            match op {
                UnaryOp::Neg => "-",
                UnaryOp::Pos => "+",
                UnaryOp::Not => "not",
                UnaryOp::Invert => "~",
            },
            value.type_name()
        ))
    };
    match (op, value) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.truthy()?)),
        (UnaryOp::Neg, Value::Int(v)) => v.checked_neg().map(Value::Int).ok_or_else(overflow),
        (UnaryOp::Neg, Value::Bool(v)) => Ok(Value::Int(-i64::from(*v))),
        (UnaryOp::Neg, Value::Float(v)) => Ok(Value::Float(-v)),
        (UnaryOp::Neg, Value::Delta(d)) => Ok(Value::Delta(-*d)),
        (UnaryOp::Pos, Value::Int(_) | Value::Float(_) | Value::Delta(_)) => Ok(value.clone()),
        (UnaryOp::Pos, Value::Bool(v)) => Ok(Value::Int(i64::from(*v))),
        (UnaryOp::Invert, Value::Int(v)) => Ok(Value::Int(!v)),
        (UnaryOp::Invert, Value::Bool(v)) => Ok(Value::Int(!i64::from(*v))),
        _ => Err(bad()),
    }
}

pub fn values_equal(a: &Value, b: &Value) -> bool {
    use Value as V;
    match (a, b) {
        (V::None, V::None) => true,
        (V::Str(x), V::Str(y)) => x == y,
        (V::List(x), V::List(y)) => {
            Rc::ptr_eq(x, y) || sequences_equal(&x.borrow(), &y.borrow())
        }
        (V::Tuple(x), V::Tuple(y)) => sequences_equal(x, y),
        (V::Dict(x), V::Dict(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| values_equal(v, other)))
        }
        (V::Date(x), V::Date(y)) => x == y,
        (V::DateTime(x), V::DateTime(y)) => x == y,
        (V::Date(x), V::DateTime(y)) | (V::DateTime(y), V::Date(x)) => {
            x.and_time(NaiveTime::MIN) == *y
        }
        (V::Delta(x), V::Delta(y)) => x == y,
        (V::Frame(x), V::Frame(y)) => Rc::ptr_eq(x, y),
        (V::Series(x), V::Series(y)) => Rc::ptr_eq(x, y),
        (V::Module(x), V::Module(y)) => x == y,
        (V::Builtin(x), V::Builtin(y)) => x == y,
        (V::ExceptionClass(x), V::ExceptionClass(y)) => x == y,
        (V::Function(x), V::Function(y)) => Rc::ptr_eq(x, y),
        (V::Connection, V::Connection) => true,
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

fn sequences_equal(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
}

/// Ordering for `<`, `sorted`, `min` and `max`.
pub fn order(a: &Value, b: &Value) -> Result<Ordering, ScriptError> {
    use Value as V;
    let ordering = match (a, b) {
        (V::Str(x), V::Str(y)) => Some(x.cmp(y)),
        (V::Date(x), V::Date(y)) => Some(x.cmp(y)),
        (V::DateTime(x), V::DateTime(y)) => Some(x.cmp(y)),
        (V::Date(x), V::DateTime(y)) => Some(x.and_time(NaiveTime::MIN).cmp(y)),
        (V::DateTime(x), V::Date(y)) => Some(x.cmp(&y.and_time(NaiveTime::MIN))),
        (V::Delta(x), V::Delta(y)) => Some(x.cmp(y)),
        (V::List(x), V::List(y)) => Some(sequence_order(&x.borrow(), &y.borrow())?),
        (V::Tuple(x), V::Tuple(y)) => Some(sequence_order(x, y)?),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => Some(x.partial_cmp(&y).unwrap_or(Ordering::Equal)),
            _ => None,
        },
    };
    ordering.ok_or_else(|| {
        ScriptError::type_error(format!(
            "'<' not supported between instances of '{}' and '{}'",
            a.type_name(),
            b.type_name()
        ))
    })
}

fn sequence_order(a: &[Value], b: &[Value]) -> Result<Ordering, ScriptError> {
    for (x, y) in a.iter().zip(b) {
        match order(x, y)? {
            Ordering::Equal => continue,
            other => return Ok(other),
        }
    }
    Ok(a.len().cmp(&b.len()))
}

pub fn contains(container: &Value, item: &Value) -> Result<bool, ScriptError> {
    match container {
        Value::Str(text) => match item {
            Value::Str(needle) => Ok(text.contains(needle.as_str())),
            other => Err(ScriptError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) => Ok(items.borrow().iter().any(|v| values_equal(v, item))),
        Value::Tuple(items) => Ok(items.iter().any(|v| values_equal(v, item))),
        Value::Dict(entries) => Ok(entries.borrow().contains_key(&DictKey::from_value(item)?)),
        Value::Series(series) => Ok(series
            .data
            .cells()
            .into_iter()
            .any(|cell| values_equal(&Value::from_cell(cell), item))),
        Value::Frame(table) => Ok(item
            .as_str()
            .is_some_and(|name| table.borrow().column(name).is_some())),
        other => Err(ScriptError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

pub fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<Value, ScriptError> {
    if !matches!(op, CmpOp::In | CmpOp::NotIn | CmpOp::Is | CmpOp::IsNot)
        && (is_vector(left) || is_vector(right))
    {
        return vector_compare(op, left, right);
    }
    let result = match op {
        CmpOp::Eq => values_equal(left, right),
        CmpOp::NotEq => !values_equal(left, right),
        CmpOp::Lt => order(left, right)? == Ordering::Less,
        CmpOp::LtE => order(left, right)? != Ordering::Greater,
        CmpOp::Gt => order(left, right)? == Ordering::Greater,
        CmpOp::GtE => order(left, right)? != Ordering::Less,
        CmpOp::In => contains(right, left)?,
        CmpOp::NotIn => !contains(right, left)?,
        CmpOp::Is => identical(left, right),
        CmpOp::IsNot => !identical(left, right),
    };
    Ok(Value::Bool(result))
}

fn identical(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::List(x), Value::List(y)) => Rc::ptr_eq(x, y),
        (Value::Dict(x), Value::Dict(y)) => Rc::ptr_eq(x, y),
        (Value::None | Value::Bool(_), _) | (_, Value::None | Value::Bool(_)) => false,
        _ => values_equal(a, b),
    }
}

pub fn is_vector(value: &Value) -> bool {
    matches!(value, Value::Series(_))
}

/// Lines both operands up as equal-length cell vectors.
fn broadcast(left: &Value, right: &Value) -> Result<(Vec<Cell>, Vec<Cell>, Option<String>), ScriptError> {
    let as_cells = |value: &Value, len: Option<usize>| -> Result<Vec<Cell>, ScriptError> {
        match value {
            Value::Series(series) => Ok(series.data.cells()),
            Value::List(items) => items
                .borrow()
                .iter()
                .map(|v| {
                    v.to_cell().ok_or_else(|| {
                        ScriptError::type_error(format!("unsupported element '{}'", v.type_name()))
                    })
                })
                .collect(),
            scalar => {
                let cell = scalar.to_cell().ok_or_else(|| {
                    ScriptError::type_error(format!(
                        "cannot combine Series with '{}'",
                        scalar.type_name()
                    ))
                })?;
                Ok(vec![cell; len.unwrap_or(0)])
            }
        }
    };
    let len = match (left, right) {
        (Value::Series(s), _) | (_, Value::Series(s)) => Some(s.len()),
        _ => None,
    };
    let a = as_cells(left, len)?;
    let b = as_cells(right, len)?;
    if a.len() != b.len() {
        return Err(ScriptError::value_error(format!(
            "operands could not be broadcast together with shapes ({},) ({},)",
            a.len(),
            b.len()
        )));
    }
    let name = match (left, right) {
        (Value::Series(x), Value::Series(y)) if x.name == y.name => x.name.clone(),
        (Value::Series(_), Value::Series(_)) => None,
        (Value::Series(s), _) | (_, Value::Series(s)) => s.name.clone(),
        _ => None,
    };
    Ok((a, b, name))
}

fn vector_binary(op: BinOp, left: &Value, right: &Value, max_len: usize) -> Result<Value, ScriptError> {
    let (a, b, name) = broadcast(left, right)?;
    let cells = a
        .into_iter()
        .zip(b)
        .map(|(x, y)| {
            if matches!(op, BinOp::BitAnd | BinOp::BitOr) {
                if let (Cell::Bool(_) | Cell::Null, Cell::Bool(_) | Cell::Null) = (&x, &y) {
                    let (p, q) = (x == Cell::Bool(true), y == Cell::Bool(true));
                    return Ok(Cell::Bool(if op == BinOp::BitAnd { p && q } else { p || q }));
                }
            }
            if x.is_null() || y.is_null() {
                return Ok(Cell::Null);
            }
            let (xv, yv) = (Value::from_cell(x), Value::from_cell(y));
            match binary(op, &xv, &yv, max_len) {
                Ok(result) => Ok(result.to_cell().unwrap_or(Cell::Null)),
                Err(err) if err.kind == "ZeroDivisionError" => {
                    let numerator = xv.as_f64().unwrap_or_default();
                    Ok(Cell::Float(if numerator == 0.0 {
                        f64::NAN
                    } else {
                        numerator.signum() * f64::INFINITY
                    }))
                }
                Err(err) => Err(err),
            }
        })
        .collect::<Result<Vec<_>, ScriptError>>()?;
    Ok(Value::series(name, ColumnData::from_cells(&cells)))
}

fn vector_compare(op: CmpOp, left: &Value, right: &Value) -> Result<Value, ScriptError> {
    let (a, b, name) = broadcast(left, right)?;
    let flags = a
        .into_iter()
        .zip(b)
        .map(|(x, y)| {
            if x.is_null() || y.is_null() {
                return Ok(Some(op == CmpOp::NotEq));
            }
            let result = compare(op, &Value::from_cell(x), &Value::from_cell(y))?;
            Ok(Some(result.truthy()?))
        })
        .collect::<Result<Vec<_>, ScriptError>>()?;
    Ok(Value::series(name, ColumnData::Bool(flags)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: usize = 1_000;

    #[test]
    fn integer_division_floors_like_scripts() {
        assert!(values_equal(&binary(BinOp::FloorDiv, &Value::Int(-7), &Value::Int(2), LIMIT).unwrap(), &Value::Int(-4)));
        assert!(values_equal(&binary(BinOp::Mod, &Value::Int(-7), &Value::Int(2), LIMIT).unwrap(), &Value::Int(1)));
        assert!(values_equal(&binary(BinOp::Mod, &Value::Int(7), &Value::Int(-2), LIMIT).unwrap(), &Value::Int(-1)));
        let err = binary(BinOp::Div, &Value::Int(1), &Value::Int(0), LIMIT).unwrap_err();
        assert_eq!(err.kind, "ZeroDivisionError");
    }

    #[test]
    fn integer_edges_raise_instead_of_wrapping() {
        let err = binary(BinOp::FloorDiv, &Value::Int(i64::MIN), &Value::Int(-1), LIMIT).unwrap_err();
        assert_eq!(err.kind, "OverflowError");
        let rem = binary(BinOp::Mod, &Value::Int(i64::MIN), &Value::Int(-1), LIMIT).unwrap();
        assert!(values_equal(&rem, &Value::Int(0)));
        let err = unary(UnaryOp::Neg, &Value::Int(i64::MIN)).unwrap_err();
        assert_eq!(err.kind, "OverflowError");
        let week = Value::Delta(Duration::weeks(1));
        let err = binary(BinOp::Mul, &week, &Value::Float(1e300), LIMIT).unwrap_err();
        assert_eq!(err.kind, "OverflowError");
    }

    #[test]
    fn repetition_sizes_are_checked_before_allocating() {
        let list = Value::list(vec![Value::Int(0), Value::Int(1)]);
        let err = binary(BinOp::Mul, &list, &Value::Int(i64::MAX), LIMIT).unwrap_err();
        assert_eq!(err.kind, "MemoryError");
        let err = binary(BinOp::Mul, &Value::str("ab"), &Value::Int(i64::MAX), LIMIT).unwrap_err();
        assert_eq!(err.kind, "MemoryError");
        let zeros = Value::list(vec![Value::Int(0)]);
        assert!(binary(BinOp::Mul, &zeros, &Value::Int(1_000), LIMIT).is_ok());
        let err = binary(BinOp::Mul, &zeros, &Value::Int(1_001), LIMIT).unwrap_err();
        assert_eq!(err.message, "repeated sequence would exceed the 1000 element limit");

        assert_eq!(produced_len(BinOp::Mul, &list, &Value::Int(3)), Some(6));
        assert_eq!(produced_len(BinOp::Mul, &Value::Int(-2), &list), Some(0));
        assert_eq!(
            produced_len(BinOp::Mul, &Value::str("ab"), &Value::Int(i64::MAX)),
            Some(u64::MAX)
        );
        assert_eq!(produced_len(BinOp::Add, &Value::str("ab"), &Value::str("c")), Some(3));
        assert_eq!(produced_len(BinOp::Mul, &Value::Int(2), &Value::Int(3)), None);

        let tuple = binary(BinOp::Mul, &Value::tuple(vec![Value::Int(7)]), &Value::Int(3), LIMIT).unwrap();
        assert!(matches!(tuple, Value::Tuple(items) if items.len() == 3));
    }

    #[test]
    fn mixed_types_report_both_names() {
        let err = binary(BinOp::Add, &Value::Int(1), &Value::str("a"), LIMIT).unwrap_err();
        assert_eq!(err.message, "unsupported operand type(s) for +: 'int' and 'str'");
    }

    #[test]
    fn series_comparisons_are_elementwise() {
        let series = Value::series(Some("units".into()), ColumnData::Int(vec![Some(1), None, Some(5)]));
        let mask = compare(CmpOp::Gt, &series, &Value::Int(2)).unwrap();
        match mask {
            Value::Series(s) => {
                assert_eq!(s.data, ColumnData::Bool(vec![Some(false), Some(false), Some(true)]));
                assert_eq!(s.name.as_deref(), Some("units"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn series_division_by_zero_yields_infinity() {
        let series = Value::series(None, ColumnData::Int(vec![Some(4), Some(0)]));
        let ratio = binary(BinOp::Div, &series, &Value::Int(0), LIMIT).unwrap();
        let Value::Series(s) = ratio else { panic!("expected series") };
        assert_eq!(s.data.get(0), Cell::Float(f64::INFINITY));
        assert!(s.data.get(1).is_null());
    }
}
