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

//! Builtin functions plus methods on strings, lists, dicts and tuples.

use crate::sandbox::args::Args;
use crate::sandbox::error::ScriptError;
use crate::sandbox::format::{format_value, repr, to_str};
use crate::sandbox::interpreter::{normalize_index, Interpreter};
use crate::sandbox::ops::{self, values_equal};
use crate::sandbox::value::{DictKey, Module, Shared, Value};
use crate::script::ast::BinOp;
use indexmap::IndexMap;
use std::cmp::Ordering;

pub const BUILTINS: &[&str] = &[
    "abs", "all", "any", "bool", "dict", "divmod", "enumerate", "filter", "float", "format",
    "int", "isinstance", "len", "list", "map", "max", "min", "pow", "print", "range",
    "repr", "reversed", "round", "set", "sorted", "str", "sum", "tuple", "zip",
];

pub const EXCEPTIONS: &[&str] = &[
    "ArithmeticError", "AssertionError", "AttributeError", "BaseException", "Exception",
    "ImportError", "IndexError", "KeyError", "LookupError", "MemoryError", "ModuleNotFoundError",
    "NameError", "NotImplementedError", "OverflowError", "RecursionError", "RuntimeError",
    "StopIteration", "TypeError", "ValueError", "ZeroDivisionError",
];

const STR_METHODS: &[&str] = &[
    "capitalize", "center", "count", "endswith", "find", "format", "index", "isalpha",
    "isdigit", "isnumeric", "isspace", "join", "ljust", "lower", "lstrip", "replace",
    "rjust", "rstrip", "split", "splitlines", "startswith", "strip", "title", "upper",
    "zfill",
];
const LIST_METHODS: &[&str] = &[
    "append", "clear", "copy", "count", "extend", "index", "insert", "pop", "remove",
    "reverse", "sort",
];
const DICT_METHODS: &[&str] = &[
    "copy", "get", "items", "keys", "pop", "setdefault", "update", "values",
];
const TUPLE_METHODS: &[&str] = &["count", "index"];

const SUGGESTION_THRESHOLD: f64 = 0.8;

pub fn resolve(name: &str) -> Option<Value> {
    if let Some(builtin) = BUILTINS.iter().find(|candidate| **candidate == name) {
        return Some(Value::Builtin(*builtin));
    }
    EXCEPTIONS
        .contains(&name)
        .then(|| Value::ExceptionClass(name.to_string()))
}

/// Closest known name for a misspelling, if any is close enough.
pub fn suggest(name: &str, candidates: &[String]) -> Option<String> {
    candidates
        .iter()
        .filter(|candidate| candidate.as_str() != name)
        .map(|candidate| (candidate, strsim::jaro_winkler(name, candidate)))
        .filter(|(_, score)| *score >= SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
        .map(|(candidate, _)| candidate.clone())
}

pub fn attribute(value: &Value, attr: &str) -> Option<Value> {
    let known: &[&str] = match value {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Tuple(_) => TUPLE_METHODS,
        Value::Float(_) => &["is_integer"],
        Value::Connection => &["close", "cursor", "execute"],
        _ => &[],
    };
    known
        .contains(&attr)
        .then(|| Value::method(value.clone(), attr))
}

fn expect_int(value: &Value, func: &str) -> Result<i64, ScriptError> {
    value.as_i64().ok_or_else(|| {
        ScriptError::type_error(format!(
            "{func}() argument must be an integer, not '{}'",
            value.type_name()
        ))
    })
}

fn one_arg<'a>(args: &'a Args, func: &str) -> Result<&'a Value, ScriptError> {
    args.positional.first().ok_or_else(|| {
        ScriptError::type_error(format!("{func}() takes exactly one argument (0 given)"))
    })
}

/// Sorts by an optional key function, stable, surfacing the first comparison error.
pub fn sort_values(
    interp: &mut Interpreter,
    items: Vec<Value>,
    key: Option<&Value>,
    reverse: bool,
) -> Result<Vec<Value>, ScriptError> {
    interp.consume(items.len() as u64)?;
    let keys = match key {
        Some(func) => items
            .iter()
            .map(|item| interp.call_value(func, Args::of(vec![item.clone()])))
            .collect::<Result<Vec<_>, _>>()?,
        None => items.clone(),
    };
    let mut order: Vec<usize> = (0..items.len()).collect();
    let mut failure = None;
    order.sort_by(|&a, &b| match ops::order(&keys[a], &keys[b]) {
        Ok(ordering) if reverse => ordering.reverse(),
        Ok(ordering) => ordering,
        Err(err) => {
            failure.get_or_insert(err);
            Ordering::Equal
        }
    });
    if let Some(err) = failure {
        return Err(err);
    }
    Ok(order.into_iter().map(|i| items[i].clone()).collect())
}

fn extreme(
    interp: &mut Interpreter,
    args: &Args,
    func: &str,
    wanted: Ordering,
) -> Result<Value, ScriptError> {
    let items = match args.positional.as_slice() {
        [single] => interp.iterate(single)?,
        many => many.to_vec(),
    };
    let key = args.kw("key").filter(|k| !k.is_none());
    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let score = match key {
            Some(func) => interp.call_value(func, Args::of(vec![item.clone()]))?,
            None => item.clone(),
        };
        let replace = match &best {
            None => true,
            Some((_, current)) => ops::order(&score, current)? == wanted,
        };
        if replace {
            best = Some((item, score));
        }
    }
    match (best, args.kw("default")) {
        (Some((item, _)), _) => Ok(item),
        (None, Some(default)) => Ok(default.clone()),
        (None, None) => Err(ScriptError::value_error(format!(
            "{func}() arg is an empty sequence"
        ))),
    }
}

fn round_value(value: &Value, digits: Option<i64>) -> Result<Value, ScriptError> {
    match (value, digits) {
        (Value::Int(_) | Value::Bool(_), _) => Ok(Value::Int(value.as_i64().unwrap_or_default())),
        (Value::Float(v), None) => {
            if !v.is_finite() {
                return Err(ScriptError::value_error("cannot convert float NaN or infinity to integer"));
            }
            Ok(Value::Int(v.round_ties_even() as i64))
        }
        (Value::Float(v), Some(n)) => {
            let factor = 10f64.powi(i32::try_from(n).unwrap_or(i32::MAX));
            Ok(Value::Float((v * factor).round_ties_even() / factor))
        }
        (Value::None, _) => Err(ScriptError::type_error(
            "type NoneType doesn't define __round__ method",
        )),
        (other, _) => Err(ScriptError::type_error(format!(
            "type {} doesn't define __round__ method",
            other.type_name()
        ))),
    }
}

pub fn parse_int(text: &str) -> Result<i64, ScriptError> {
    text.trim().replace('_', "").parse::<i64>().map_err(|_| {
        ScriptError::value_error(format!(
            "invalid literal for int() with base 10: {}",
            repr(&Value::str(text))
        ))
    })
}

pub fn parse_float(text: &str) -> Result<f64, ScriptError> {
    let trimmed = text.trim();
    let parsed = match trimmed.to_ascii_lowercase().as_str() {
        "nan" | "+nan" | "-nan" => Some(f64::NAN),
        "inf" | "+inf" | "infinity" => Some(f64::INFINITY),
        "-inf" | "-infinity" => Some(f64::NEG_INFINITY),
        _ => trimmed.parse::<f64>().ok(),
    };
    parsed.ok_or_else(|| {
        ScriptError::value_error(format!(
            "could not convert string to float: {}",
            repr(&Value::str(text))
        ))
    })
}

fn is_instance(value: &Value, class: &Value) -> bool {
    match class {
        Value::Tuple(classes) => classes.iter().any(|class| is_instance(value, class)),
        Value::Builtin(name) => matches!(
            (*name, value),
            ("int", Value::Int(_) | Value::Bool(_))
                | ("float", Value::Float(_))
                | ("str", Value::Str(_))
                | ("bool", Value::Bool(_))
                | ("list", Value::List(_))
                | ("dict", Value::Dict(_))
                | ("tuple", Value::Tuple(_))
        ),
        Value::Module(Module::DatetimeClass) => matches!(value, Value::DateTime(_)),
        Value::Module(Module::DateClass) => matches!(value, Value::Date(_) | Value::DateTime(_)),
        Value::Module(Module::TimedeltaClass) => matches!(value, Value::Delta(_)),
        Value::Method(bound) => matches!(
            (bound.1.as_str(), value),
            ("DataFrame", Value::Frame(_))
                | ("Series", Value::Series(_))
                | ("Timestamp", Value::DateTime(_))
                | ("Timedelta", Value::Delta(_))
        ),
        Value::ExceptionClass(kind) => match value {
            Value::Exception(exc) => ScriptError::new(&exc.kind, "").matches(kind),
            _ => false,
        },
        _ => false,
    }
}

pub fn length(value: &Value) -> Result<usize, ScriptError> {
    let len = match value {
        Value::Str(text) => text.chars().count(),
        Value::List(items) => items.borrow().len(),
        Value::Tuple(items) => items.len(),
        Value::Dict(entries) => entries.borrow().len(),
        Value::Frame(table) => table.borrow().height(),
        Value::Series(series) => series.len(),
        other => {
            return Err(ScriptError::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )))
        }
    };
    Ok(len)
}

fn unique(values: Vec<Value>) -> Result<Vec<Value>, ScriptError> {
    let mut seen = IndexMap::new();
    for value in values {
        seen.entry(DictKey::from_value(&value)?).or_insert(value);
    }
    Ok(seen.into_values().collect())
}

fn dict_from(interp: &mut Interpreter, source: &Value) -> Result<IndexMap<DictKey, Value>, ScriptError> {
    if let Value::Dict(entries) = source {
        return Ok(entries.borrow().clone());
    }
    let mut out = IndexMap::new();
    for pair in interp.iterate(source)? {
        let parts = interp.iterate(&pair)?;
        let [key, value] = parts.as_slice() else {
            return Err(ScriptError::value_error(format!(
                "dictionary update sequence element has length {}; 2 is required",
                parts.len()
            )));
        };
        out.insert(DictKey::from_value(key)?, value.clone());
    }
    Ok(out)
}

pub fn call(interp: &mut Interpreter, name: &str, args: Args) -> Result<Value, ScriptError> {
    match name {
        "print" => {
            let sep = args.text(usize::MAX, "sep")?.unwrap_or_else(|| " ".to_string());
            let end = args.text(usize::MAX, "end")?.unwrap_or_else(|| "\n".to_string());
            let line = args
                .positional
                .iter()
                .map(to_str)
                .collect::<Vec<_>>()
                .join(&sep);
            interp.write_output(&format!("{line}{end}"));
            Ok(Value::None)
        }
        "len" => length(one_arg(&args, name)?).map(|len| Value::Int(len as i64)),
        "range" => {
            let bounds = args
                .positional
                .iter()
                .map(|v| expect_int(v, name))
                .collect::<Result<Vec<_>, _>>()?;
            let (start, stop, step) = match bounds.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => {
                    return Err(ScriptError::type_error(format!(
                        "range expected 1 to 3 arguments, got {}",
                        bounds.len()
                    )))
                }
            };
            if step == 0 {
                return Err(ScriptError::value_error("range() arg 3 must not be zero"));
            }
            let (start, stop, step) = (i128::from(start), i128::from(stop), i128::from(step));
            let count = if step > 0 {
                (stop - start + step - 1).max(0) / step
            } else {
                (start - stop - step - 1).max(0) / -step
            };
            interp.consume(u64::try_from(count).unwrap_or(u64::MAX))?;
            Ok(Value::list(
                (0..count).map(|i| Value::Int((start + i * step) as i64)).collect(),
            ))
        }
        "str" => Ok(Value::Str(args.positional.first().map(to_str).unwrap_or_default())),
        "repr" => Ok(Value::Str(repr(one_arg(&args, name)?))),
        "int" => match args.positional.first() {
            None => Ok(Value::Int(0)),
            Some(Value::Str(text)) => parse_int(text).map(Value::Int),
            Some(Value::Float(v)) => {
                if !v.is_finite() {
                    return Err(ScriptError::value_error("cannot convert float NaN to integer"));
                }
                Ok(Value::Int(v.trunc() as i64))
            }
            Some(other) => other.as_i64().map(Value::Int).ok_or_else(|| {
                ScriptError::type_error(format!(
                    "int() argument must be a string or a real number, not '{}'",
                    other.type_name()
                ))
            }),
        },
        "float" => match args.positional.first() {
            None => Ok(Value::Float(0.0)),
            Some(Value::Str(text)) => parse_float(text).map(Value::Float),
            Some(other) => other.as_f64().map(Value::Float).ok_or_else(|| {
                ScriptError::type_error(format!(
                    "float() argument must be a string or a real number, not '{}'",
                    other.type_name()
                ))
            }),
        },
        "bool" => match args.positional.first() {
            None => Ok(Value::Bool(false)),
            Some(value) => value.truthy().map(Value::Bool),
        },
        "list" => match args.positional.first() {
            None => Ok(Value::list(Vec::new())),
            Some(value) => Ok(Value::list(interp.iterate(value)?)),
        },
        "tuple" => match args.positional.first() {
            None => Ok(Value::tuple(Vec::new())),
            Some(value) => Ok(Value::tuple(interp.iterate(value)?)),
        },
        "set" => match args.positional.first() {
            None => Ok(Value::list(Vec::new())),
            Some(value) => Ok(Value::list(unique(interp.iterate(value)?)?)),
        },
        "dict" => {
            let mut entries = match args.positional.first() {
                Some(source) => dict_from(interp, source)?,
                None => IndexMap::new(),
            };
            for (key, value) in args.keywords {
                entries.insert(DictKey::Str(key), value);
            }
            Ok(Value::dict(entries))
        }
        "sorted" => {
            let items = interp.iterate(one_arg(&args, name)?)?;
            let reverse = args.flag(usize::MAX, "reverse", false)?;
            let key = args.opt(usize::MAX, "key").cloned();
            sort_values(interp, items, key.as_ref(), reverse).map(Value::list)
        }
        "reversed" => {
            let mut items = interp.iterate(one_arg(&args, name)?)?;
            items.reverse();
            Ok(Value::list(items))
        }
        "enumerate" => {
            let items = interp.iterate(args.require(0, "iterable", name)?)?;
            let start = args.int(1, "start", 0)?;
            Ok(Value::list(
                items
                    .into_iter()
                    .zip(start..)
                    .map(|(item, i)| Value::tuple(vec![Value::Int(i), item]))
                    .collect(),
            ))
        }
        "zip" => {
            let columns = args
                .positional
                .iter()
                .map(|value| interp.iterate(value))
                .collect::<Result<Vec<_>, _>>()?;
            let len = columns.iter().map(Vec::len).min().unwrap_or(0);
            Ok(Value::list(
                (0..len)
                    .map(|i| Value::tuple(columns.iter().map(|c| c[i].clone()).collect()))
                    .collect(),
            ))
        }
        "sum" => {
            let items = interp.iterate(args.require(0, "iterable", name)?)?;
            let mut total = args.get(1, "start").cloned().unwrap_or(Value::Int(0));
            for item in items {
                total = interp.binary(BinOp::Add, &total, &item)?;
            }
            Ok(total)
        }
        "min" => extreme(interp, &args, name, Ordering::Less),
        "max" => extreme(interp, &args, name, Ordering::Greater),
        "abs" => match one_arg(&args, name)? {
            Value::Int(v) => v
                .checked_abs()
                .map(Value::Int)
                .ok_or_else(|| ScriptError::new("OverflowError", "integer result too large")),
            Value::Bool(v) => Ok(Value::Int(i64::from(*v))),
            Value::Float(v) => Ok(Value::Float(v.abs())),
            Value::Delta(d) => Ok(Value::Delta(d.abs())),
            series @ Value::Series(_) => interp.call_method(series, "abs", Args::default()),
            other => Err(ScriptError::type_error(format!(
                "bad operand type for abs(): '{}'",
                other.type_name()
            ))),
        },
        "round" => {
            let value = args.require(0, "number", name)?;
            let digits = match args.opt(1, "ndigits") {
                Some(n) => Some(expect_int(n, name)?),
                None => None,
            };
            if let Value::Series(_) | Value::Frame(_) = value {
                let positional = digits.map(Value::Int).into_iter().collect();
                return interp.call_method(value, "round", Args::of(positional));
            }
            round_value(value, digits)
        }
        "pow" => {
            let base = args.require(0, "base", name)?;
            let exp = args.require(1, "exp", name)?;
            interp.binary(BinOp::Pow, base, exp)
        }
        "divmod" => {
            let a = args.require(0, "a", name)?;
            let b = args.require(1, "b", name)?;
            Ok(Value::tuple(vec![
                interp.binary(BinOp::FloorDiv, a, b)?,
                interp.binary(BinOp::Mod, a, b)?,
            ]))
        }
        "isinstance" => {
            let value = args.require(0, "obj", name)?;
            let class = args.require(1, "class_or_tuple", name)?;
            Ok(Value::Bool(is_instance(value, class)))
        }
        "any" | "all" => {
            let items = interp.iterate(one_arg(&args, name)?)?;
            let want_any = name == "any";
            for item in items {
                if item.truthy()? == want_any {
                    return Ok(Value::Bool(want_any));
                }
            }
            Ok(Value::Bool(!want_any))
        }
        "map" => {
            let func = args.require(0, "function", name)?.clone();
            let items = interp.iterate(args.require(1, "iterable", name)?)?;
            items
                .into_iter()
                .map(|item| interp.call_value(&func, Args::of(vec![item])))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::list)
        }
        "filter" => {
            let func = args.require(0, "function", name)?.clone();
            let items = interp.iterate(args.require(1, "iterable", name)?)?;
            let mut kept = Vec::new();
            for item in items {
                let keep = if func.is_none() {
                    item.truthy()?
                } else {
                    interp.call_value(&func, Args::of(vec![item.clone()]))?.truthy()?
                };
                if keep {
                    kept.push(item);
                }
            }
            Ok(Value::list(kept))
        }
        "format" => {
            let value = args.require(0, "value", name)?;
            let spec = args.text(1, "format_spec")?.unwrap_or_default();
            format_value(value, &spec).map(Value::Str)
        }
        other => Err(ScriptError::new(
            "NameError",
            format!("name '{other}' is not defined"),
        )),
    }
}

pub fn call_method(
    interp: &mut Interpreter,
    receiver: &Value,
    name: &str,
    args: Args,
) -> Result<Value, ScriptError> {
    match receiver {
        Value::Str(text) => {
            if let Some(len) = str_growth(text, name, &args)? {
                interp.reserve(len)?;
            }
            str_method(text, name, &args)
        }
        Value::List(items) => list_method(interp, items, name, args),
        Value::Dict(entries) => dict_method(interp, entries, name, args),
        Value::Tuple(items) => sequence_query(items, name, &args),
        Value::Float(v) if name == "is_integer" => Ok(Value::Bool(v.fract() == 0.0)),
        Value::Connection if name == "close" => Ok(Value::None),
        Value::Connection => Err(ScriptError::not_supported(
            "direct cursor access is disabled; use pd.read_sql(query, conn)",
        )),
        other => Err(ScriptError::attribute_error(&other.type_name(), name)),
    }
}

fn sequence_query(items: &[Value], name: &str, args: &Args) -> Result<Value, ScriptError> {
    let needle = args.require(0, "value", name)?;
    match name {
        "count" => Ok(Value::Int(
            items.iter().filter(|v| values_equal(v, needle)).count() as i64,
        )),
        "index" => items
            .iter()
            .position(|v| values_equal(v, needle))
            .map(|i| Value::Int(i as i64))
            .ok_or_else(|| ScriptError::value_error(format!("{} is not in list", repr(needle)))),
        other => Err(ScriptError::attribute_error("tuple", other)),
    }
}

fn strip_chars<'a>(text: &'a str, chars: Option<&str>, left: bool, right: bool) -> &'a str {
    let matcher = |c: char| match chars {
        Some(set) => set.contains(c),
        None => c.is_whitespace(),
    };
    let text = if left { text.trim_start_matches(matcher) } else { text };
    if right {
        text.trim_end_matches(matcher)
    } else {
        text
    }
}

fn affix_match(text: &str, pattern: &Value, name: &str) -> Result<bool, ScriptError> {
    let check = |affix: &str| {
        if name == "startswith" {
            text.starts_with(affix)
        } else {
            text.ends_with(affix)
        }
    };
    match pattern {
        Value::Str(affix) => Ok(check(affix)),
        Value::Tuple(options) => Ok(options.iter().filter_map(Value::as_str).any(check)),
        other => Err(ScriptError::type_error(format!(
            "{name} first arg must be str or a tuple of str, not {}",
            other.type_name()
        ))),
    }
}

/// Result size of string methods whose output can outgrow their input.
fn str_growth(text: &str, name: &str, args: &Args) -> Result<Option<u64>, ScriptError> {
    let len = match name {
        "ljust" | "rjust" | "center" | "zfill" => {
            u64::try_from(args.int(0, "width", 0)?).unwrap_or(0)
        }
        "replace" => {
            let old = args.text(0, "old")?.unwrap_or_default();
            let new = args.text(1, "new")?.unwrap_or_default();
            if new.len() <= old.len() {
                return Ok(None);
            }
            let hits = if old.is_empty() {
                text.chars().count() + 1
            } else {
                text.matches(old.as_str()).count()
            };
            (text.len() as u64).saturating_add((hits as u64).saturating_mul((new.len() - old.len()) as u64))
        }
        _ => return Ok(None),
    };
    Ok(Some(len))
}

fn justify(text: &str, args: &Args, name: &str) -> Result<Value, ScriptError> {
    let width = usize::try_from(args.int(0, "width", 0)?).unwrap_or(0);
    let fill = args.text(1, "fillchar")?.and_then(|f| f.chars().next()).unwrap_or(' ');
    let len = text.chars().count();
    if len >= width {
        return Ok(Value::str(text));
    }
    let gap = width - len;
    let pad = |n: usize| std::iter::repeat(fill).take(n).collect::<String>();
    let out = match name {
        "ljust" => format!("{text}{}", pad(gap)),
        "rjust" => format!("{}{text}", pad(gap)),
        _ => format!("{}{text}{}", pad(gap / 2), pad(gap - gap / 2)),
    };
    Ok(Value::Str(out))
}

fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut previous_alpha = false;
    for c in text.chars() {
        if previous_alpha {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        previous_alpha = c.is_alphabetic();
    }
    out
}

pub fn str_method(text: &str, name: &str, args: &Args) -> Result<Value, ScriptError> {
    let value = match name {
        "upper" => Value::str(text.to_uppercase()),
        "lower" => Value::str(text.to_lowercase()),
        "title" => Value::Str(title_case(text)),
        "capitalize" => {
            let mut chars = text.chars();
            Value::Str(match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
                None => String::new(),
            })
        }
        "strip" | "lstrip" | "rstrip" => {
            let chars = args.text(0, "chars")?;
            let stripped = strip_chars(text, chars.as_deref(), name != "rstrip", name != "lstrip");
            Value::str(stripped)
        }
        "split" => {
            let sep = args.text(0, "sep")?;
            let maxsplit = args.int(1, "maxsplit", -1)?;
            let limit = usize::try_from(maxsplit).map_or(usize::MAX, |n| n + 1);
            let parts: Vec<Value> = match sep.as_deref() {
                Some("") => return Err(ScriptError::value_error("empty separator")),
                Some(sep) => text.splitn(limit, sep).map(Value::str).collect(),
                None => {
                    let mut parts = Vec::new();
                    let mut rest = text.trim_start();
                    while !rest.is_empty() {
                        if parts.len() + 1 == limit {
                            parts.push(Value::str(rest.trim_end()));
                            break;
                        }
                        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                        parts.push(Value::str(&rest[..end]));
                        rest = rest[end..].trim_start();
                    }
                    parts
                }
            };
            Value::list(parts)
        }
        "splitlines" => Value::list(text.lines().map(Value::str).collect()),
        "join" => {
            let items = match args.require(0, "iterable", name)? {
                Value::List(items) => items.borrow().clone(),
                Value::Tuple(items) => items.to_vec(),
                other => {
                    return Err(ScriptError::type_error(format!(
                        "can only join an iterable of str, not '{}'",
                        other.type_name()
                    )))
                }
            };
            let mut pieces = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                match item {
                    Value::Str(piece) => pieces.push(piece.as_str()),
                    other => {
                        return Err(ScriptError::type_error(format!(
                            "sequence item {i}: expected str instance, {} found",
                            other.type_name()
                        )))
                    }
                }
            }
            Value::Str(pieces.join(text))
        }
        "replace" => {
            let old = args.text(0, "old")?.unwrap_or_default();
            let new = args.text(1, "new")?.unwrap_or_default();
            let count = args.int(2, "count", -1)?;
            match usize::try_from(count) {
                Ok(n) => Value::Str(text.replacen(&old, &new, n)),
                Err(_) => Value::Str(text.replace(&old, &new)),
            }
        }
        "startswith" | "endswith" => {
            Value::Bool(affix_match(text, args.require(0, "prefix", name)?, name)?)
        }
        "find" | "index" => {
            let needle = args.text(0, "sub")?.unwrap_or_default();
            match text.find(&needle) {
                Some(byte) => Value::Int(text[..byte].chars().count() as i64),
                None if name == "find" => Value::Int(-1),
                None => return Err(ScriptError::value_error("substring not found")),
            }
        }
        "count" => {
            let needle = args.text(0, "sub")?.unwrap_or_default();
            Value::Int(if needle.is_empty() {
                text.chars().count() as i64 + 1
            } else {
                text.matches(&needle).count() as i64
            })
        }
        "isdigit" | "isnumeric" => {
            Value::Bool(!text.is_empty() && text.chars().all(|c| c.is_numeric()))
        }
        "isalpha" => Value::Bool(!text.is_empty() && text.chars().all(char::is_alphabetic)),
        "isspace" => Value::Bool(!text.is_empty() && text.chars().all(char::is_whitespace)),
        "zfill" => {
            let width = usize::try_from(args.int(0, "width", 0)?).unwrap_or(0);
            let (sign, digits) = match text.strip_prefix(['-', '+']) {
                Some(rest) => (&text[..1], rest),
                None => ("", text),
            };
            let pad = width.saturating_sub(text.chars().count());
            Value::Str(format!("{sign}{}{digits}", "0".repeat(pad)))
        }
        "ljust" | "rjust" | "center" => justify(text, args, name)?,
        "format" => Value::Str(str_format(text, args)?),
        other => return Err(ScriptError::attribute_error("str", other)),
    };
    Ok(value)
}

/// `"{} of {total:,}".format(...)` with auto and explicit field numbering.
pub fn str_format(template: &str, args: &Args) -> Result<String, ScriptError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    let mut auto_index = 0;
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    field.push(c);
                }
                if !closed {
                    return Err(ScriptError::value_error(
                        "expected '}' before end of string",
                    ));
                }
                let (field, spec) = match field.split_once(':') {
                    Some((field, spec)) => (field.to_string(), spec.to_string()),
                    None => (field, String::new()),
                };
                let (field, conversion) = match field.split_once('!') {
                    Some((field, conv)) => (field.to_string(), conv.chars().next()),
                    None => (field, None),
                };
                let value = if field.is_empty() {
                    let value = args.positional.get(auto_index);
                    auto_index += 1;
                    value
                } else if let Ok(index) = field.parse::<usize>() {
                    args.positional.get(index)
                } else {
                    args.kw(&field)
                };
                let value = value.ok_or_else(|| {
                    if field.is_empty() || field.parse::<usize>().is_ok() {
                        ScriptError::index_error(
                            "Replacement index out of range for positional args tuple",
                        )
                    } else {
                        ScriptError::key_error(&field)
                    }
                })?;
                let value = match conversion {
                    Some('r') => Value::Str(repr(value)),
                    Some(_) => Value::Str(to_str(value)),
                    None => value.clone(),
                };
                out.push_str(&format_value(&value, &spec)?);
            }
            '}' => {
                return Err(ScriptError::value_error(
                    "Single '}' encountered in format string",
                ))
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

fn list_method(
    interp: &mut Interpreter,
    items: &Shared<Vec<Value>>,
    name: &str,
    args: Args,
) -> Result<Value, ScriptError> {
    match name {
        "append" => {
            let value = args.require(0, "object", name)?.clone();
            items.borrow_mut().push(value);
            Ok(Value::None)
        }
        "extend" => {
            let extra = interp.iterate(args.require(0, "iterable", name)?)?;
            interp.reserve((items.borrow().len() + extra.len()) as u64)?;
            items.borrow_mut().extend(extra);
            Ok(Value::None)
        }
        "insert" => {
            let index = args.int(0, "index", 0)?;
            let value = args.require(1, "object", name)?.clone();
            let mut items = items.borrow_mut();
            let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
            let position = if index < 0 { (index + len).max(0) } else { index.min(len) };
            items.insert(position as usize, value);
            Ok(Value::None)
        }
        "pop" => {
            let mut items = items.borrow_mut();
            if items.is_empty() {
                return Err(ScriptError::index_error("pop from empty list"));
            }
            let index = args.int(0, "index", -1)?;
            let position = normalize_index(index, items.len(), "pop")?;
            Ok(items.remove(position))
        }
        "remove" => {
            let needle = args.require(0, "value", name)?;
            let mut items = items.borrow_mut();
            let position = items
                .iter()
                .position(|v| values_equal(v, needle))
                .ok_or_else(|| ScriptError::value_error("list.remove(x): x not in list"))?;
            items.remove(position);
            Ok(Value::None)
        }
        "reverse" => {
            items.borrow_mut().reverse();
            Ok(Value::None)
        }
        "clear" => {
            items.borrow_mut().clear();
            Ok(Value::None)
        }
        "copy" => Ok(Value::list(items.borrow().clone())),
        "sort" => {
            let current = items.borrow().clone();
            let key = args.opt(usize::MAX, "key").cloned();
            let reverse = args.flag(usize::MAX, "reverse", false)?;
            let sorted = sort_values(interp, current, key.as_ref(), reverse)?;
            *items.borrow_mut() = sorted;
            Ok(Value::None)
        }
        "count" | "index" => {
            let snapshot = items.borrow().clone();
            sequence_query(&snapshot, name, &args)
        }
        other => Err(ScriptError::attribute_error("list", other)),
    }
}

fn dict_method(
    interp: &mut Interpreter,
    entries: &Shared<IndexMap<DictKey, Value>>,
    name: &str,
    args: Args,
) -> Result<Value, ScriptError> {
    match name {
        "get" => {
            let key = DictKey::from_value(args.require(0, "key", name)?)?;
            let fallback = args.get(1, "default").cloned().unwrap_or(Value::None);
            Ok(entries.borrow().get(&key).cloned().unwrap_or(fallback))
        }
        "keys" => Ok(Value::list(entries.borrow().keys().map(DictKey::to_value).collect())),
        "values" => Ok(Value::list(entries.borrow().values().cloned().collect())),
        "items" => Ok(Value::list(
            entries
                .borrow()
                .iter()
                .map(|(k, v)| Value::tuple(vec![k.to_value(), v.clone()]))
                .collect(),
        )),
        "update" => {
            let mut incoming = match args.positional.first() {
                Some(source) => dict_from(interp, source)?,
                None => IndexMap::new(),
            };
            for (key, value) in args.keywords {
                incoming.insert(DictKey::Str(key), value);
            }
            entries.borrow_mut().extend(incoming);
            Ok(Value::None)
        }
        "pop" => {
            let raw = args.require(0, "key", name)?;
            let key = DictKey::from_value(raw)?;
            match (entries.borrow_mut().shift_remove(&key), args.get(1, "default")) {
                (Some(value), _) => Ok(value),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(ScriptError::new("KeyError", repr(raw))),
            }
        }
        "setdefault" => {
            let key = DictKey::from_value(args.require(0, "key", name)?)?;
            let default = args.get(1, "default").cloned().unwrap_or(Value::None);
            Ok(entries.borrow_mut().entry(key).or_insert(default).clone())
        }
        "copy" => Ok(Value::dict(entries.borrow().clone())),
        other => Err(ScriptError::attribute_error("dict", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::interpreter::SandboxLimits;
    use crate::script::parse;

    fn eval_global(source: &str, name: &str) -> Value {
        let program = parse(source).unwrap();
        let mut interpreter = Interpreter::new(SandboxLimits::default(), None);
        interpreter.run(&program).unwrap();
        interpreter.global(name).unwrap()
    }

    #[test]
    fn range_handles_extreme_bounds() {
        let value = eval_global("xs = list(range(9223372036854775805, 9223372036854775807))\n", "xs");
        let Value::List(items) = value else { panic!("expected list") };
        assert_eq!(items.borrow().len(), 2);

        let program = parse("xs = range(-9223372036854775807 - 1, 9223372036854775807)\n").unwrap();
        let mut interpreter = Interpreter::new(SandboxLimits::default(), None);
        let err = interpreter.run(&program).unwrap_err();
        assert!(err.fatal);
    }

    #[test]
    fn sorted_with_key_and_reverse() {
        let value = eval_global(
            "rows = [('b', 2), ('a', 3), ('c', 1)]\nout = [r[0] for r in sorted(rows, key=lambda r: r[1], reverse=True)]\n",
            "out",
        );
        assert_eq!(repr(&value), "['a', 'b', 'c']");
    }

    #[test]
    fn string_helpers() {
        let args = Args::of(vec![Value::str(","), Value::Int(1)]);
        let split = str_method("a,b,c", "split", &args).unwrap();
        assert_eq!(repr(&split), "['a', 'b,c']");
        let stripped = str_method("  padded\t", "strip", &Args::default()).unwrap();
        assert_eq!(stripped.as_str(), Some("padded"));
        let zfilled = str_method("-42", "zfill", &Args::of(vec![Value::Int(6)])).unwrap();
        assert_eq!(zfilled.as_str(), Some("-00042"));
    }

    #[test]
    fn format_method_mixes_positional_and_named_fields() {
        let args = Args::new(
            vec![Value::str("east")],
            vec![("total".into(), Value::Float(1234.5))],
        );
        let text = str_format("{} sold {total:,.1f} {{units}}", &args).unwrap();
        assert_eq!(text, "east sold 1,234.5 {units}");
    }

    #[test]
    fn rounding_uses_bankers_rule() {
        assert!(values_equal(&round_value(&Value::Float(2.5), None).unwrap(), &Value::Int(2)));
        assert!(values_equal(&round_value(&Value::Float(3.5), None).unwrap(), &Value::Int(4)));
        let rounded = round_value(&Value::Float(2.675), Some(1)).unwrap();
        assert!(values_equal(&rounded, &Value::Float(2.7)));
    }

    #[test]
    fn dict_and_range_builtins() {
        let value = eval_global(
            "counts = {}\nfor i in range(10, 0, -3):\n    counts[i % 2] = counts.get(i % 2, 0) + i\n",
            "counts",
        );
        assert_eq!(repr(&value), "{0: 14, 1: 8}");
    }
}
