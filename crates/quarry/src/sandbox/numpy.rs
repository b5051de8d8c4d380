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

//! The slice of numpy that generated analysis code leans on.

use crate::sandbox::args::Args;
use crate::sandbox::builtins::{parse_float, parse_int};
use crate::sandbox::error::ScriptError;
use crate::sandbox::interpreter::Interpreter;
use crate::sandbox::stats::{self, Reduction};
use crate::sandbox::value::{Module, Value};
use crate::tabular::{Cell, ColumnData, KeyCell};
use std::cmp::Ordering;
use std::collections::HashSet;

const FUNCTIONS: &[&str] = &[
    "abs", "arange", "array", "ceil", "exp", "float64", "floor", "int64", "isnan", "log",
    "log10", "max", "mean", "median", "min", "percentile", "round", "select", "sqrt", "std",
    "sum", "unique", "where",
];

pub fn attribute(attr: &str) -> Option<Value> {
    match attr {
        "nan" | "NaN" => Some(Value::Float(f64::NAN)),
        "inf" => Some(Value::Float(f64::INFINITY)),
        "pi" => Some(Value::Float(std::f64::consts::PI)),
        "e" => Some(Value::Float(std::f64::consts::E)),
        name if FUNCTIONS.contains(&name) => Some(Value::method(Value::Module(Module::Numpy), name)),
        _ => None,
    }
}

/// Flattens scalars, lists and Series into one column.
pub fn to_column(interp: &mut Interpreter, value: &Value) -> Result<ColumnData, ScriptError> {
    match value {
        Value::Series(series) => Ok(series.data.clone()),
        Value::List(_) | Value::Tuple(_) => {
            let cells = interp
                .iterate(value)?
                .iter()
                .map(|item| {
                    item.to_cell().ok_or_else(|| {
                        ScriptError::type_error(format!(
                            "unsupported array element '{}'",
                            item.type_name()
                        ))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ColumnData::from_cells(&cells))
        }
        scalar => scalar
            .to_cell()
            .map(|cell| ColumnData::from_cells(&[cell]))
            .ok_or_else(|| {
                ScriptError::type_error(format!("unsupported operand '{}'", scalar.type_name()))
            }),
    }
}

fn elementwise(value: &Value, name: &str, f: impl Fn(f64) -> f64) -> Result<Value, ScriptError> {
    let apply = |cell: Cell| -> Result<Cell, ScriptError> {
        match cell {
            Cell::Null => Ok(Cell::Null),
            other => other.as_f64().map(|v| Cell::Float(f(v))).ok_or_else(|| {
                ScriptError::type_error(format!("ufunc '{name}' not supported for the input types"))
            }),
        }
    };
    match value {
        Value::Series(series) => {
            let cells = series
                .data
                .cells()
                .into_iter()
                .map(apply)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::series(series.name.clone(), ColumnData::Float(cells.iter().map(Cell::as_f64).collect())))
        }
        Value::List(items) => {
            let cells = items
                .borrow()
                .iter()
                .map(|item| apply(item.to_cell().unwrap_or(Cell::Null)))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::series(None, ColumnData::Float(cells.iter().map(Cell::as_f64).collect())))
        }
        scalar => match apply(scalar.to_cell().unwrap_or(Cell::Null))? {
            Cell::Float(v) => Ok(Value::Float(v)),
            _ => Ok(Value::Float(f64::NAN)),
        },
    }
}

fn round_half_even(v: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (v * factor).round_ties_even() / factor
}

fn reduce_arg(interp: &mut Interpreter, args: &Args, name: &str, reduction: Reduction) -> Result<Value, ScriptError> {
    let column = to_column(interp, args.require(0, "a", name)?)?;
    stats::reduce(&column, reduction)
}

fn choose(condition: &Cell, yes: Cell, no: Cell) -> Cell {
    if *condition == Cell::Bool(true) {
        yes
    } else {
        no
    }
}

/// Broadcasts a scalar against a target length.
fn spread(interp: &mut Interpreter, value: &Value, len: usize) -> Result<Vec<Cell>, ScriptError> {
    let column = to_column(interp, value)?;
    let cells = column.cells();
    match cells.len() {
        1 if len != 1 => Ok(vec![cells[0].clone(); len]),
        n if n == len => Ok(cells),
        n => Err(ScriptError::value_error(format!(
            "operands could not be broadcast together with shapes ({len},) ({n},)"
        ))),
    }
}

pub fn call(interp: &mut Interpreter, name: &str, args: Args) -> Result<Value, ScriptError> {
    match name {
        "abs" => elementwise(args.require(0, "x", name)?, name, f64::abs),
        "sqrt" => elementwise(args.require(0, "x", name)?, name, f64::sqrt),
        "log" => elementwise(args.require(0, "x", name)?, name, f64::ln),
        "log10" => elementwise(args.require(0, "x", name)?, name, f64::log10),
        "exp" => elementwise(args.require(0, "x", name)?, name, f64::exp),
        "floor" => elementwise(args.require(0, "x", name)?, name, f64::floor),
        "ceil" => elementwise(args.require(0, "x", name)?, name, f64::ceil),
        "round" => {
            let decimals = i32::try_from(args.int(1, "decimals", 0)?).unwrap_or(0);
            elementwise(args.require(0, "a", name)?, name, |v| round_half_even(v, decimals))
        }
        "isnan" => match args.require(0, "x", name)? {
            Value::Series(series) => Ok(Value::series(
                series.name.clone(),
                ColumnData::Bool(series.data.cells().iter().map(|c| Some(c.is_null())).collect()),
            )),
            Value::None => Ok(Value::Bool(true)),
            scalar => scalar
                .as_f64()
                .map(|v| Value::Bool(v.is_nan()))
                .ok_or_else(|| ScriptError::type_error("ufunc 'isnan' not supported for the input types")),
        },
        "sum" => reduce_arg(interp, &args, name, Reduction::Sum),
        "mean" => reduce_arg(interp, &args, name, Reduction::Mean),
        "median" => reduce_arg(interp, &args, name, Reduction::Median),
        "min" => reduce_arg(interp, &args, name, Reduction::Min),
        "max" => reduce_arg(interp, &args, name, Reduction::Max),
        "std" => {
            let ddof = u32::try_from(args.int(usize::MAX, "ddof", 0)?).unwrap_or(0);
            reduce_arg(interp, &args, name, Reduction::Std(ddof))
        }
        "percentile" => {
            let q = args
                .require(1, "q", name)?
                .as_f64()
                .ok_or_else(|| ScriptError::type_error("percentile q must be a number"))?;
            if !(0.0..=100.0).contains(&q) {
                return Err(ScriptError::value_error("Percentiles must be in the range [0, 100]"));
            }
            reduce_arg(interp, &args, name, Reduction::Quantile(q / 100.0))
        }
        "where" => {
            let condition = args.require(0, "condition", name)?;
            let name_hint = match condition {
                Value::Series(series) => series.name.clone(),
                _ => None,
            };
            let mask = to_column(interp, condition)?.cells();
            let yes = spread(interp, args.require(1, "x", name)?, mask.len())?;
            let no = spread(interp, args.require(2, "y", name)?, mask.len())?;
            let cells: Vec<Cell> = mask
                .iter()
                .zip(yes.into_iter().zip(no))
                .map(|(c, (y, n))| choose(c, y, n))
                .collect();
            Ok(Value::series(name_hint, ColumnData::from_cells(&cells)))
        }
        "select" => {
            let conditions = interp.iterate(args.require(0, "condlist", name)?)?;
            let choices = interp.iterate(args.require(1, "choicelist", name)?)?;
            if conditions.len() != choices.len() {
                return Err(ScriptError::value_error(
                    "list of cases must be same length as list of conditions",
                ));
            }
            let len = match conditions.first() {
                Some(first) => to_column(interp, first)?.len(),
                None => 0,
            };
            let default = args.get(2, "default").cloned().unwrap_or(Value::Int(0));
            let mut out = spread(interp, &default, len)?;
            for (condition, choice) in conditions.iter().zip(&choices).rev() {
                let mask = spread(interp, condition, len)?;
                let picked = spread(interp, choice, len)?;
                for ((slot, flag), value) in out.iter_mut().zip(&mask).zip(picked) {
                    if *flag == Cell::Bool(true) {
                        *slot = value;
                    }
                }
            }
            Ok(Value::series(None, ColumnData::from_cells(&out)))
        }
        "array" => {
            let column = to_column(interp, args.require(0, "object", name)?)?;
            Ok(Value::series(None, column))
        }
        "arange" => {
            let numbers: Vec<f64> = args
                .positional
                .iter()
                .map(|v| v.as_f64().ok_or_else(|| ScriptError::type_error("arange() requires numbers")))
                .collect::<Result<_, _>>()?;
            let (start, stop, step) = match numbers.as_slice() {
                [stop] => (0.0, *stop, 1.0),
                [start, stop] => (*start, *stop, 1.0),
                [start, stop, step] => (*start, *stop, *step),
                _ => return Err(ScriptError::type_error("arange() requires 1 to 3 arguments")),
            };
            if step == 0.0 {
                return Err(ScriptError::new("ZeroDivisionError", "arange() step cannot be zero"));
            }
            let count = ((stop - start) / step).ceil().max(0.0) as usize;
            interp.consume(count as u64)?;
            let integral = args.positional.iter().all(|v| matches!(v, Value::Int(_)));
            let data = if integral {
                ColumnData::Int((0..count).map(|i| Some(start as i64 + i as i64 * step as i64)).collect())
            } else {
                ColumnData::Float((0..count).map(|i| Some(start + i as f64 * step)).collect())
            };
            Ok(Value::series(None, data))
        }
        "unique" => {
            let column = to_column(interp, args.require(0, "ar", name)?)?;
            let mut seen = HashSet::new();
            let mut cells: Vec<Cell> = column
                .cells()
                .into_iter()
                .filter(|cell| seen.insert(KeyCell::from(cell)))
                .collect();
            cells.sort_by(|a, b| match (a.is_null(), b.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => a.compare(b).unwrap_or(Ordering::Equal),
            });
            Ok(Value::series(None, ColumnData::from_cells(&cells)))
        }
        "int64" => {
            let value = args.require(0, "x", name)?;
            match value {
                Value::Float(v) => Ok(Value::Int(v.trunc() as i64)),
                Value::Str(text) => parse_int(text).map(Value::Int),
                other => other.as_i64().map(Value::Int).ok_or_else(|| {
                    ScriptError::type_error(format!("cannot convert '{}' to int64", other.type_name()))
                }),
            }
        }
        "float64" => {
            let value = args.require(0, "x", name)?;
            match value {
                Value::Str(text) => parse_float(text).map(Value::Float),
                other => other.as_f64().map(Value::Float).ok_or_else(|| {
                    ScriptError::type_error(format!("cannot convert '{}' to float64", other.type_name()))
                }),
            }
        }
        other => Err(ScriptError::new(
            "AttributeError",
            format!("module 'numpy' has no attribute '{other}'"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::interpreter::SandboxLimits;

    fn interpreter() -> Interpreter {
        Interpreter::new(SandboxLimits::default(), None)
    }

    #[test]
    fn where_broadcasts_scalars() {
        let mut interp = interpreter();
        let mask = Value::series(Some("flag".into()), ColumnData::Bool(vec![Some(true), Some(false), None]));
        let out = call(&mut interp, "where", Args::of(vec![mask, Value::str("hi"), Value::str("lo")])).unwrap();
        let Value::Series(series) = out else { panic!("expected series") };
        assert_eq!(
            series.data,
            ColumnData::Str(vec![Some("hi".into()), Some("lo".into()), Some("lo".into())])
        );
    }

    #[test]
    fn percentile_uses_linear_interpolation() {
        let mut interp = interpreter();
        let values = Value::list(vec![Value::Int(10), Value::Int(20), Value::Int(30), Value::Int(40)]);
        let p90 = call(&mut interp, "percentile", Args::of(vec![values, Value::Int(90)])).unwrap();
        assert!((p90.as_f64().unwrap() - 37.0).abs() < 1e-9);
    }

    #[test]
    fn population_std_by_default() {
        let mut interp = interpreter();
        let values = Value::list(vec![Value::Int(1), Value::Int(3)]);
        let std = call(&mut interp, "std", Args::of(vec![values])).unwrap();
        assert_eq!(std.as_f64(), Some(1.0));
    }
}
