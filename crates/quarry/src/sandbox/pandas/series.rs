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

use super::{mask_of, table_error};
use crate::sandbox::args::Args;
use crate::sandbox::builtins::{parse_float, parse_int};
use crate::sandbox::dates::parse_datetime;
use crate::sandbox::error::ScriptError;
use crate::sandbox::format::{cell_display, repr};
use crate::sandbox::interpreter::{normalize_index, Interpreter};
use crate::sandbox::stats::{self, Reduction};
use crate::sandbox::value::{Accessor, AccessorKind, DictKey, SeriesValue, Value};
use crate::tabular::{Cell, ColumnData, KeyCell, Table};
use chrono::NaiveTime;
use indexmap::IndexMap;
use std::cmp::Ordering;
use std::rc::Rc;

const METHODS: &[&str] = &[
    "abs", "all", "any", "apply", "astype", "between", "bfill", "clip", "copy", "count",
    "cummax", "cummin", "cumsum", "diff", "drop_duplicates", "dropna", "ffill", "fillna",
    "head", "idxmax", "idxmin", "isin", "isna", "isnull", "item", "map", "max", "mean",
    "median", "min", "mode", "nlargest", "notna", "notnull", "nsmallest", "nunique",
    "pct_change", "prod", "quantile", "rename", "replace", "reset_index", "round", "shift",
    "sort_values", "std", "sum", "tail", "to_dict", "to_frame", "to_list", "tolist",
    "unique", "value_counts", "var", "where",
];

pub(super) fn attribute(value: &Value, attr: &str) -> Result<Option<Value>, ScriptError> {
    let Value::Series(series) = value else {
        return Ok(None);
    };
    if METHODS.contains(&attr) {
        return Ok(Some(Value::method(value.clone(), attr)));
    }
    let accessor = |kind| {
        Some(Value::Accessor(Rc::new(Accessor {
            kind,
            target: value.clone(),
        })))
    };
    let all_null = series.data.cells().iter().all(Cell::is_null);
    let found = match attr {
        "name" => Some(series.name.clone().map_or(Value::None, Value::Str)),
        "values" => Some(cells_list(&series.data)),
        "dtype" => Some(Value::str(series.data.dtype_name())),
        "shape" => Some(Value::tuple(vec![Value::Int(series.len() as i64)])),
        "size" => Some(Value::Int(series.len() as i64)),
        "empty" => Some(Value::Bool(series.is_empty())),
        "index" => Some(Value::list((0..series.len() as i64).map(Value::Int).collect())),
        "is_unique" => Some(Value::Bool(distinct(&series.data).len() == series.len())),
        "hasnans" => Some(Value::Bool(series.data.cells().iter().any(Cell::is_null))),
        "loc" => accessor(AccessorKind::Loc),
        "iloc" => accessor(AccessorKind::Iloc),
        "str" if matches!(series.data, ColumnData::Str(_)) || all_null => accessor(AccessorKind::Str),
        "str" => {
            return Err(ScriptError::new(
                "AttributeError",
                "Can only use .str accessor with string values!",
            ))
        }
        "dt" if series.data.is_temporal() || all_null => accessor(AccessorKind::Dt),
        "dt" => {
            return Err(ScriptError::new(
                "AttributeError",
                "Can only use .dt accessor with datetimelike values",
            ))
        }
        _ => None,
    };
    Ok(found)
}

fn cells_list(data: &ColumnData) -> Value {
    Value::list(data.cells().into_iter().map(Value::from_cell).collect())
}

/// First occurrence of each distinct cell, in order of appearance.
fn distinct(data: &ColumnData) -> Vec<Cell> {
    let mut seen: IndexMap<KeyCell, Cell> = IndexMap::new();
    for cell in data.cells() {
        seen.entry(KeyCell::from(&cell)).or_insert(cell);
    }
    seen.into_values().collect()
}

pub(super) fn get_item(series: &SeriesValue, index: &Value) -> Result<Value, ScriptError> {
    let derived = |data: ColumnData| Value::series(series.name.clone(), data);
    match index {
        Value::Int(i) => {
            let position = normalize_index(*i, series.len(), "index")
                .map_err(|_| ScriptError::key_error(&i.to_string()))?;
            Ok(Value::from_cell(series.data.get(position)))
        }
        Value::Slice(slice) => Ok(derived(series.data.take(&slice.indices(series.len())?))),
        other => {
            if let Some(mask) = mask_of(other, series.len())? {
                return Ok(derived(series.data.filter(&mask)));
            }
            let positions = match other {
                Value::List(items) => items
                    .borrow()
                    .iter()
                    .map(|item| {
                        item.as_i64()
                            .ok_or_else(|| ScriptError::new("KeyError", repr(item)))
                            .and_then(|i| normalize_index(i, series.len(), "index"))
                    })
                    .collect::<Result<Vec<_>, _>>()?,
                other => return Err(ScriptError::new("KeyError", repr(other))),
            };
            Ok(derived(series.data.take(&positions)))
        }
    }
}

fn dtype_label(dtype: &Value) -> Result<String, ScriptError> {
    match dtype {
        Value::Str(name) => Ok(name.clone()),
        Value::Builtin(name) => Ok((*name).to_string()),
        Value::Method(method) => Ok(method.1.clone()),
        other => Err(ScriptError::type_error(format!(
            "data type '{}' not understood",
            other.type_name()
        ))),
    }
}

/// `astype` over a single column.
pub(super) fn cast(data: &ColumnData, dtype: &Value) -> Result<ColumnData, ScriptError> {
    let label = dtype_label(dtype)?;
    let convert: Box<dyn Fn(Cell) -> Result<Cell, ScriptError>> = match label.as_str() {
        "int" | "int64" | "int32" | "Int64" => Box::new(|cell| match cell {
            Cell::Int(_) => Ok(cell),
            Cell::Bool(v) => Ok(Cell::Int(i64::from(v))),
            Cell::Float(v) if v.is_finite() => Ok(Cell::Int(v.trunc() as i64)),
            Cell::Str(text) => parse_int(text.trim()).map(Cell::Int),
            Cell::Null | Cell::Float(_) => Err(ScriptError::value_error(
                "Cannot convert non-finite values (NA or inf) to integer",
            )),
            other => Err(ScriptError::type_error(format!(
                "cannot convert {} to int",
                cell_display(&other)
            ))),
        }),
        "float" | "float64" | "float32" => Box::new(|cell| match cell {
            Cell::Null | Cell::Float(_) => Ok(cell),
            Cell::Int(v) => Ok(Cell::Float(v as f64)),
            Cell::Bool(v) => Ok(Cell::Float(f64::from(u8::from(v)))),
            Cell::Str(text) => parse_float(text.trim()).map(Cell::Float),
            other => Err(ScriptError::type_error(format!(
                "cannot convert {} to float",
                cell_display(&other)
            ))),
        }),
        "str" | "string" | "object" => Box::new(|cell| {
            Ok(match cell {
                Cell::Null => Cell::Str("nan".to_string()),
                Cell::Str(_) => cell,
                other => Cell::Str(cell_display(&other)),
            })
        }),
        "bool" => Box::new(|cell| {
            Ok(match cell {
                Cell::Null => Cell::Bool(true),
                Cell::Bool(_) => cell,
                Cell::Int(v) => Cell::Bool(v != 0),
                Cell::Float(v) => Cell::Bool(v != 0.0),
                Cell::Str(text) => Cell::Bool(!text.is_empty()),
                Cell::Date(_) | Cell::DateTime(_) => Cell::Bool(true),
            })
        }),
        "datetime64" | "datetime64[ns]" | "datetime" => Box::new(|cell| match cell {
            Cell::Null | Cell::DateTime(_) => Ok(cell),
            Cell::Date(d) => Ok(Cell::DateTime(d.and_time(NaiveTime::MIN))),
            Cell::Str(text) => parse_datetime(&text, None).map(Cell::DateTime).ok_or_else(|| {
                ScriptError::value_error(format!("Unknown datetime string format, unable to parse: {text}"))
            }),
            other => Err(ScriptError::type_error(format!(
                "cannot convert {} to datetime",
                cell_display(&other)
            ))),
        }),
        "category" => Box::new(Ok),
        other => {
            return Err(ScriptError::type_error(format!(
                "data type '{other}' not understood"
            )))
        }
    };
    let cells = data
        .cells()
        .into_iter()
        .map(convert)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ColumnData::from_cells(&cells))
}

fn fill_nulls(data: &ColumnData, fill: &Cell) -> ColumnData {
    let cells: Vec<Cell> = data
        .cells()
        .into_iter()
        .map(|cell| if cell.is_null() { fill.clone() } else { cell })
        .collect();
    ColumnData::from_cells(&cells)
}

fn propagate(data: &ColumnData, forward: bool) -> ColumnData {
    let mut cells = data.cells();
    let mut last: Option<Cell> = None;
    let positions: Vec<usize> = if forward {
        (0..cells.len()).collect()
    } else {
        (0..cells.len()).rev().collect()
    };
    for i in positions {
        if cells[i].is_null() {
            if let Some(previous) = &last {
                cells[i] = previous.clone();
            }
        } else {
            last = Some(cells[i].clone());
        }
    }
    ColumnData::from_cells(&cells)
}

fn numeric(series: &SeriesValue, what: &str) -> Result<Vec<Option<f64>>, ScriptError> {
    if !series.data.is_numeric() {
        return Err(ScriptError::type_error(format!(
            "{what} is not supported for dtype {}",
            series.data.dtype_name()
        )));
    }
    Ok(series
        .data
        .cells()
        .iter()
        .map(|cell| if cell.is_null() { None } else { cell.as_f64() })
        .collect())
}

fn cumulative(series: &SeriesValue, name: &str) -> Result<ColumnData, ScriptError> {
    let values = numeric(series, name)?;
    let mut running: Option<f64> = None;
    let out: Vec<Option<f64>> = values
        .into_iter()
        .map(|value| {
            let value = value?;
            let next = match (running, name) {
                (None, _) => value,
                (Some(acc), "cumsum") => acc + value,
                (Some(acc), "cummax") => acc.max(value),
                (Some(acc), _) => acc.min(value),
            };
            running = Some(next);
            Some(next)
        })
        .collect();
    let keep_int = matches!(series.data, ColumnData::Int(_));
    Ok(if keep_int {
        ColumnData::Int(out.into_iter().map(|v| v.map(|v| v as i64)).collect())
    } else {
        ColumnData::Float(out)
    })
}

fn shifted(values: &[Option<f64>], periods: i64) -> Vec<Option<f64>> {
    let len = values.len() as i64;
    (0..len)
        .map(|i| {
            let source = i - periods;
            if (0..len).contains(&source) {
                values[source as usize]
            } else {
                None
            }
        })
        .collect()
}

fn shift_cells(data: &ColumnData, periods: i64) -> ColumnData {
    let len = data.len() as i64;
    let cells: Vec<Cell> = (0..len)
        .map(|i| {
            let source = i - periods;
            if (0..len).contains(&source) {
                data.get(source as usize)
            } else {
                Cell::Null
            }
        })
        .collect();
    ColumnData::from_cells(&cells)
}

fn position_of_extreme(series: &SeriesValue, wanted: Ordering) -> Result<Value, ScriptError> {
    let mut best: Option<(usize, Cell)> = None;
    for (i, cell) in series.data.cells().into_iter().enumerate() {
        if cell.is_null() {
            continue;
        }
        let better = match &best {
            None => true,
            Some((_, current)) => cell.compare(current) == Some(wanted),
        };
        if better {
            best = Some((i, cell));
        }
    }
    best.map(|(i, _)| Value::Int(i as i64))
        .ok_or_else(|| ScriptError::value_error("attempt to get argmax of an empty sequence"))
}

fn cells_equal(a: &Cell, b: &Cell) -> bool {
    a.compare(b) == Some(Ordering::Equal)
}

/// `value_counts` as a two-column frame: the values, then counts or proportions.
fn value_counts(series: &SeriesValue, args: &Args) -> Result<Value, ScriptError> {
    let normalize = args.flag(0, "normalize", false)?;
    let sort = args.flag(1, "sort", true)?;
    let ascending = args.flag(2, "ascending", false)?;
    let dropna = args.flag(usize::MAX, "dropna", true)?;
    let mut counts: IndexMap<KeyCell, (Cell, i64)> = IndexMap::new();
    for cell in series.data.cells() {
        if dropna && cell.is_null() {
            continue;
        }
        counts.entry(KeyCell::from(&cell)).or_insert((cell, 0)).1 += 1;
    }
    let mut entries: Vec<(Cell, i64)> = counts.into_values().collect();
    if sort {
        entries.sort_by(|a, b| if ascending { a.1.cmp(&b.1) } else { b.1.cmp(&a.1) });
    }
    let total: i64 = entries.iter().map(|(_, n)| n).sum();
    let values: Vec<Cell> = entries.iter().map(|(cell, _)| cell.clone()).collect();
    let (label, column) = if normalize {
        (
            "proportion",
            ColumnData::Float(entries.iter().map(|(_, n)| Some(*n as f64 / total as f64)).collect()),
        )
    } else {
        ("count", ColumnData::Int(entries.iter().map(|(_, n)| Some(*n)).collect()))
    };
    let name = series.name.clone().unwrap_or_else(|| "index".to_string());
    Table::new(vec![(name, ColumnData::from_cells(&values)), (label.to_string(), column)])
        .map(Value::frame)
        .map_err(table_error)
}

fn sorted(series: &SeriesValue, ascending: bool) -> Result<ColumnData, ScriptError> {
    let table = Table::new(vec![("v".to_string(), series.data.clone())]).map_err(table_error)?;
    let ordered = table.sort_by(&[("v".to_string(), ascending)]).map_err(table_error)?;
    Ok(ordered.require("v").map_err(table_error)?.clone())
}

fn reduction_for(name: &str, args: &Args) -> Result<Option<Reduction>, ScriptError> {
    Ok(match name {
        "std" => Some(Reduction::Std(u32::try_from(args.int(usize::MAX, "ddof", 1)?).unwrap_or(1))),
        "var" => Some(Reduction::Var(u32::try_from(args.int(usize::MAX, "ddof", 1)?).unwrap_or(1))),
        "quantile" => {
            let q = args.opt(0, "q").map_or(Some(0.5), Value::as_f64).ok_or_else(|| {
                ScriptError::type_error("quantile 'q' must be a number")
            })?;
            Some(Reduction::Quantile(q))
        }
        "sum" | "mean" | "median" | "min" | "max" | "count" | "nunique" | "prod" => {
            Reduction::from_name(name)
        }
        _ => None,
    })
}

pub(super) fn call(
    interp: &mut Interpreter,
    series: &Rc<SeriesValue>,
    name: &str,
    args: Args,
) -> Result<Value, ScriptError> {
    interp.consume(series.len() as u64 / 8 + 1)?;
    if let Some(reduction) = reduction_for(name, &args)? {
        return stats::reduce(&series.data, reduction);
    }
    let derived = |data: ColumnData| Value::series(series.name.clone(), data);
    let count = |args: &Args| usize::try_from(args.int(0, "n", 5)?).map_err(|_| ScriptError::value_error("n must be non-negative"));
    let value = match name {
        "head" => derived(series.data.take(&(0..count(&args)?.min(series.len())).collect::<Vec<_>>())),
        "tail" => {
            let n = count(&args)?.min(series.len());
            derived(series.data.take(&(series.len() - n..series.len()).collect::<Vec<_>>()))
        }
        "copy" => Value::Series(series.clone()),
        "tolist" | "to_list" => cells_list(&series.data),
        "item" => match series.len() {
            1 => Value::from_cell(series.data.get(0)),
            _ => {
                return Err(ScriptError::value_error(
                    "can only convert an array of size 1 to a Python scalar",
                ))
            }
        },
        "unique" => Value::series(series.name.clone(), ColumnData::from_cells(&distinct(&series.data))),
        "drop_duplicates" => derived(ColumnData::from_cells(&distinct(&series.data))),
        "mode" => {
            let mut counts: IndexMap<KeyCell, (Cell, usize)> = IndexMap::new();
            for cell in series.data.cells().into_iter().filter(|c| !c.is_null()) {
                counts.entry(KeyCell::from(&cell)).or_insert((cell, 0)).1 += 1;
            }
            let top = counts.values().map(|(_, n)| *n).max().unwrap_or(0);
            let winners: Vec<Cell> = counts
                .into_values()
                .filter(|(_, n)| *n == top)
                .map(|(cell, _)| cell)
                .collect();
            let winners = SeriesValue::new(None, ColumnData::from_cells(&winners));
            derived(sorted(&winners, true)?)
        }
        "value_counts" => value_counts(series, &args)?,
        "sort_values" => derived(sorted(series, args.flag(0, "ascending", true)?)?),
        "nlargest" | "nsmallest" => {
            let n = count(&args)?;
            let ordered = sorted(series, name == "nsmallest")?;
            let keep: Vec<usize> = (0..n.min(ordered.len()))
                .filter(|&i| !ordered.get(i).is_null())
                .collect();
            derived(ordered.take(&keep))
        }
        "round" => {
            let decimals = i32::try_from(args.int(0, "decimals", 0)?).unwrap_or(0);
            match &series.data {
                ColumnData::Float(values) => {
                    let factor = 10f64.powi(decimals);
                    derived(ColumnData::Float(
                        values
                            .iter()
                            .map(|v| v.map(|v| (v * factor).round_ties_even() / factor))
                            .collect(),
                    ))
                }
                other => derived(other.clone()),
            }
        }
        "abs" => match &series.data {
            ColumnData::Int(values) => derived(ColumnData::Int(values.iter().map(|v| v.map(i64::abs)).collect())),
            ColumnData::Float(values) => derived(ColumnData::Float(values.iter().map(|v| v.map(f64::abs)).collect())),
            other => {
                return Err(ScriptError::type_error(format!(
                    "bad operand type for abs(): '{}'",
                    other.dtype_name()
                )))
            }
        },
        "astype" => derived(cast(&series.data, args.require(0, "dtype", name)?)?),
        "fillna" => {
            let fill = args.require(0, "value", name)?;
            let cell = fill.to_cell().ok_or_else(|| {
                ScriptError::type_error(format!("cannot fill with '{}'", fill.type_name()))
            })?;
            derived(fill_nulls(&series.data, &cell))
        }
        "ffill" | "bfill" => derived(propagate(&series.data, name == "ffill")),
        "isna" | "isnull" | "notna" | "notnull" => {
            let want_missing = name.starts_with("is");
            derived(ColumnData::Bool(
                series.data.cells().iter().map(|c| Some(c.is_null() == want_missing)).collect(),
            ))
        }
        "dropna" => {
            let mask: Vec<bool> = series.data.cells().iter().map(|c| !c.is_null()).collect();
            derived(series.data.filter(&mask))
        }
        "isin" => {
            let wanted: Vec<Cell> = interp
                .iterate(args.require(0, "values", name)?)?
                .iter()
                .filter_map(Value::to_cell)
                .collect();
            derived(ColumnData::Bool(
                series
                    .data
                    .cells()
                    .iter()
                    .map(|cell| Some(wanted.iter().any(|w| cells_equal(cell, w))))
                    .collect(),
            ))
        }
        "between" => {
            let low = args.require(0, "left", name)?.to_cell().unwrap_or(Cell::Null);
            let high = args.require(1, "right", name)?.to_cell().unwrap_or(Cell::Null);
            let inclusive = args.text(2, "inclusive")?.unwrap_or_else(|| "both".to_string());
            let (low_ok, high_ok): (&[Ordering], &[Ordering]) = match inclusive.as_str() {
                "both" => (&[Ordering::Greater, Ordering::Equal], &[Ordering::Less, Ordering::Equal]),
                "left" => (&[Ordering::Greater, Ordering::Equal], &[Ordering::Less]),
                "right" => (&[Ordering::Greater], &[Ordering::Less, Ordering::Equal]),
                "neither" => (&[Ordering::Greater], &[Ordering::Less]),
                other => {
                    return Err(ScriptError::value_error(format!(
                        "Inclusive has to be either string of 'both','left', 'right', or 'neither', got '{other}'"
                    )))
                }
            };
            derived(ColumnData::Bool(
                series
                    .data
                    .cells()
                    .iter()
                    .map(|cell| {
                        let above = cell.compare(&low).is_some_and(|o| low_ok.contains(&o));
                        let below = cell.compare(&high).is_some_and(|o| high_ok.contains(&o));
                        Some(!cell.is_null() && above && below)
                    })
                    .collect(),
            ))
        }
        "apply" | "map" => {
            let mapper = args.require(0, "func", name)?.clone();
            let skip_missing = args.text(1, "na_action")?.as_deref() == Some("ignore");
            let mut cells = Vec::with_capacity(series.len());
            for cell in series.data.cells() {
                if skip_missing && cell.is_null() {
                    cells.push(Cell::Null);
                    continue;
                }
                let result = match &mapper {
                    Value::Dict(entries) => {
                        let key = DictKey::from_value(&Value::from_cell(cell))?;
                        entries.borrow().get(&key).cloned().unwrap_or(Value::None)
                    }
                    func => interp.call_value(func, Args::of(vec![Value::from_cell(cell)]))?,
                };
                cells.push(result.to_cell().ok_or_else(|| {
                    ScriptError::type_error(format!(
                        "{name} must produce scalars, got '{}'",
                        result.type_name()
                    ))
                })?);
            }
            derived(ColumnData::from_cells(&cells))
        }
        "replace" => {
            let mapping: Vec<(Cell, Cell)> = match (args.require(0, "to_replace", name)?, args.opt(1, "value")) {
                (Value::Dict(entries), None) => entries
                    .borrow()
                    .iter()
                    .filter_map(|(from, to)| Some((from.to_value().to_cell()?, to.to_cell()?)))
                    .collect(),
                (Value::List(items), Some(to)) => {
                    let to = to.to_cell().unwrap_or(Cell::Null);
                    items.borrow().iter().filter_map(Value::to_cell).map(|from| (from, to.clone())).collect()
                }
                (from, to) => vec![(
                    from.to_cell().unwrap_or(Cell::Null),
                    to.and_then(Value::to_cell).unwrap_or(Cell::Null),
                )],
            };
            let cells: Vec<Cell> = series
                .data
                .cells()
                .into_iter()
                .map(|cell| {
                    mapping
                        .iter()
                        .find(|(from, _)| cells_equal(&cell, from))
                        .map_or(cell.clone(), |(_, to)| to.clone())
                })
                .collect();
            derived(ColumnData::from_cells(&cells))
        }
        "where" => {
            let mask = mask_of(args.require(0, "cond", name)?, series.len())?.ok_or_else(|| {
                ScriptError::value_error("where() expects a boolean condition")
            })?;
            let other = args.opt(1, "other").and_then(Value::to_cell).unwrap_or(Cell::Null);
            let cells: Vec<Cell> = series
                .data
                .cells()
                .into_iter()
                .zip(mask)
                .map(|(cell, keep)| if keep { cell } else { other.clone() })
                .collect();
            derived(ColumnData::from_cells(&cells))
        }
        "cumsum" | "cummax" | "cummin" => derived(cumulative(series, name)?),
        "diff" => {
            let values = numeric(series, name)?;
            let previous = shifted(&values, args.int(0, "periods", 1)?);
            derived(ColumnData::Float(
                values
                    .iter()
                    .zip(previous)
                    .map(|(v, p)| Some((*v)? - p?))
                    .collect(),
            ))
        }
        "pct_change" => {
            let values = numeric(series, name)?;
            let previous = shifted(&values, args.int(0, "periods", 1)?);
            derived(ColumnData::Float(
                values
                    .iter()
                    .zip(previous)
                    .map(|(v, p)| Some((*v)? / p? - 1.0))
                    .collect(),
            ))
        }
        "shift" => derived(shift_cells(&series.data, args.int(0, "periods", 1)?)),
        "idxmax" => position_of_extreme(series, Ordering::Greater)?,
        "idxmin" => position_of_extreme(series, Ordering::Less)?,
        "any" | "all" => {
            let flags: Vec<bool> = series
                .data
                .cells()
                .iter()
                .filter(|c| !c.is_null())
                .map(|c| Value::from_cell(c.clone()).truthy())
                .collect::<Result<_, _>>()?;
            Value::Bool(if name == "any" {
                flags.iter().any(|f| *f)
            } else {
                flags.iter().all(|f| *f)
            })
        }
        "clip" => {
            let lower = args.opt(0, "lower").and_then(Value::as_f64);
            let upper = args.opt(1, "upper").and_then(Value::as_f64);
            let values = numeric(series, name)?;
            let clipped: Vec<Option<f64>> = values
                .into_iter()
                .map(|v| v.map(|v| v.max(lower.unwrap_or(f64::NEG_INFINITY)).min(upper.unwrap_or(f64::INFINITY))))
                .collect();
            match series.data {
                ColumnData::Int(_) => derived(ColumnData::Int(clipped.into_iter().map(|v| v.map(|v| v as i64)).collect())),
                _ => derived(ColumnData::Float(clipped)),
            }
        }
        "rename" => Value::series(
            args.opt(0, "index").map(crate::sandbox::format::to_str),
            series.data.clone(),
        ),
        "to_frame" => {
            let column = args
                .text(0, "name")?
                .or_else(|| series.name.clone())
                .unwrap_or_else(|| "0".to_string());
            Value::frame(Table::new(vec![(column, series.data.clone())]).map_err(table_error)?)
        }
        "reset_index" => {
            if args.flag(usize::MAX, "drop", false)? {
                Value::Series(series.clone())
            } else {
                let column = args
                    .text(usize::MAX, "name")?
                    .or_else(|| series.name.clone())
                    .unwrap_or_else(|| "0".to_string());
                let index = ColumnData::Int((0..series.len() as i64).map(Some).collect());
                Value::frame(
                    Table::new(vec![("index".to_string(), index), (column, series.data.clone())])
                        .map_err(table_error)?,
                )
            }
        }
        "to_dict" => Value::dict(
            series
                .data
                .cells()
                .into_iter()
                .enumerate()
                .map(|(i, cell)| (DictKey::Int(i as i64), Value::from_cell(cell)))
                .collect(),
        ),
        other => return Err(ScriptError::attribute_error("Series", other)),
    };
    Ok(value)
}
