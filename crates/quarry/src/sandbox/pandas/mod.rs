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

//! The pandas surface: module functions and dispatch for frames, series,
//! group-bys and accessors.

mod accessors;
mod frame;
mod groupby;
mod series;

use crate::sandbox::args::Args;
use crate::sandbox::dates::{self, parse_datetime};
use crate::sandbox::error::ScriptError;
use crate::sandbox::format::{cell_display, to_str};
use crate::sandbox::interpreter::Interpreter;
use crate::sandbox::ops;
use crate::sandbox::value::{AccessorKind, DictKey, Module, Value};
use crate::script::ast::BinOp;
use crate::tabular::{Cell, ColumnData, JoinHow, Table, TableError};
use chrono::{Datelike, Duration, Months, NaiveDateTime, NaiveTime};
use tracing::debug;

const MODULE_FUNCTIONS: &[&str] = &[
    "DataFrame", "Series", "Timedelta", "Timestamp", "concat", "date_range", "isna",
    "isnull", "merge", "notna", "notnull", "pivot_table", "read_sql", "read_sql_query",
    "to_datetime", "to_numeric",
];

pub(crate) fn table_error(err: TableError) -> ScriptError {
    match err {
        TableError::MissingColumn(name) => ScriptError::key_error(&name),
        TableError::LengthMismatch { .. } => ScriptError::value_error(err.to_string()),
    }
}

/// Column names from a label or list of labels.
pub(crate) fn names_arg(value: &Value) -> Result<Vec<String>, ScriptError> {
    match value {
        Value::Str(name) => Ok(vec![name.clone()]),
        Value::List(items) => items.borrow().iter().map(label).collect(),
        Value::Tuple(items) => items.iter().map(label).collect(),
        other => Err(ScriptError::type_error(format!(
            "expected a column label or list of labels, not '{}'",
            other.type_name()
        ))),
    }
}

fn label(value: &Value) -> Result<String, ScriptError> {
    match value {
        Value::Str(name) => Ok(name.clone()),
        Value::Int(_) | Value::Float(_) | Value::Bool(_) => Ok(to_str(value)),
        other => Err(ScriptError::type_error(format!(
            "column labels must be strings, not '{}'",
            other.type_name()
        ))),
    }
}

fn scalar_cell(value: &Value) -> Result<Cell, ScriptError> {
    value.to_cell().ok_or_else(|| {
        ScriptError::type_error(format!(
            "cannot store '{}' in a column",
            value.type_name()
        ))
    })
}

/// Cells of a list, tuple or Series; `None` for anything else.
pub(crate) fn sequence_cells(value: &Value) -> Result<Option<Vec<Cell>>, ScriptError> {
    let items = match value {
        Value::Series(series) => return Ok(Some(series.data.cells())),
        Value::List(items) => items.borrow().clone(),
        Value::Tuple(items) => items.to_vec(),
        _ => return Ok(None),
    };
    items.iter().map(scalar_cell).collect::<Result<Vec<_>, _>>().map(Some)
}

/// A column of `len` rows from a Series, sequence or broadcast scalar.
pub(crate) fn column_for(value: &Value, len: usize) -> Result<ColumnData, ScriptError> {
    match sequence_cells(value)? {
        Some(cells) if cells.len() == len => Ok(match value {
            Value::Series(series) => series.data.clone(),
            _ => ColumnData::from_cells(&cells),
        }),
        Some(cells) => Err(ScriptError::value_error(format!(
            "Length of values ({}) does not match length of index ({len})",
            cells.len()
        ))),
        None => {
            let cell = scalar_cell(value)?;
            Ok(ColumnData::from_cells(&vec![cell; len]))
        }
    }
}

/// Boolean row mask from a Series or list of bools.
pub(crate) fn mask_of(value: &Value, len: usize) -> Result<Option<Vec<bool>>, ScriptError> {
    let cells = match value {
        Value::Series(series) if matches!(series.data, ColumnData::Bool(_)) => series.data.cells(),
        Value::List(items)
            if !items.borrow().is_empty()
                && items.borrow().iter().all(|v| matches!(v, Value::Bool(_))) =>
        {
            items.borrow().iter().filter_map(Value::to_cell).collect()
        }
        _ => return Ok(None),
    };
    if cells.len() != len {
        return Err(ScriptError::index_error(format!(
            "Boolean index has wrong length: {} instead of {len}",
            cells.len()
        )));
    }
    Ok(Some(cells.iter().map(|c| *c == Cell::Bool(true)).collect()))
}

pub(crate) fn row_dict(table: &Table, row: usize) -> Value {
    Value::dict(
        table
            .row(row)
            .into_iter()
            .map(|(name, cell)| (DictKey::Str(name), Value::from_cell(cell)))
            .collect(),
    )
}

pub fn attribute(
    interp: &mut Interpreter,
    value: &Value,
    attr: &str,
) -> Result<Option<Value>, ScriptError> {
    match value {
        Value::Module(Module::Pandas) => Ok(match attr {
            "NaT" | "NA" => Some(Value::None),
            name if MODULE_FUNCTIONS.contains(&name) => {
                Some(Value::method(value.clone(), name))
            }
            _ => None,
        }),
        Value::Frame(_) => frame::attribute(value, attr),
        Value::Series(_) => series::attribute(value, attr),
        Value::GroupBy(_) => groupby::attribute(value, attr),
        Value::Accessor(accessor) => accessors::attribute(interp, accessor, value, attr),
        _ => Ok(None),
    }
}

pub fn call_method(
    interp: &mut Interpreter,
    receiver: &Value,
    name: &str,
    args: Args,
) -> Result<Value, ScriptError> {
    match receiver {
        Value::Module(_) => module_call(interp, name, args),
        Value::Frame(table) => frame::call(interp, table, name, args),
        Value::Series(series) => series::call(interp, series, name, args),
        Value::GroupBy(group) => groupby::call(interp, group, name, args),
        Value::Accessor(accessor) => accessors::call(interp, accessor, name, args),
        other => Err(ScriptError::attribute_error(&other.type_name(), name)),
    }
}

pub fn get_item(
    interp: &mut Interpreter,
    container: &Value,
    index: &Value,
) -> Result<Value, ScriptError> {
    match container {
        Value::Frame(table) => frame::get_item(interp, table, index),
        Value::Series(series) => series::get_item(series, index),
        Value::GroupBy(group) => groupby::select(group, index),
        Value::Accessor(accessor) => accessors::get_item(interp, accessor, index),
        other => Err(ScriptError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

pub fn set_item(
    interp: &mut Interpreter,
    container: &Value,
    index: &Value,
    value: Value,
) -> Result<(), ScriptError> {
    match container {
        Value::Frame(table) => frame::set_item(interp, table, index, value),
        Value::Accessor(accessor) if accessor.kind == AccessorKind::Loc => {
            accessors::loc_set(interp, accessor, index, value)
        }
        other => Err(ScriptError::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

pub fn set_attr(
    interp: &mut Interpreter,
    owner: &Value,
    attr: &str,
    value: Value,
) -> Result<(), ScriptError> {
    match (owner, attr) {
        (Value::Frame(table), "columns") => {
            let names = interp
                .iterate(&value)?
                .iter()
                .map(label)
                .collect::<Result<Vec<_>, _>>()?;
            table.borrow_mut().rename_columns(&names).map_err(|_| {
                ScriptError::value_error(format!(
                    "Length mismatch: Expected axis has {} elements, new values have {} elements",
                    table.borrow().width(),
                    names.len()
                ))
            })
        }
        (other, _) => Err(ScriptError::new(
            "AttributeError",
            format!("cannot set attribute '{attr}' on '{}' object", other.type_name()),
        )),
    }
}

pub fn iterate(value: &Value) -> Result<Vec<Value>, ScriptError> {
    match value {
        Value::Frame(table) => Ok(table
            .borrow()
            .column_names()
            .into_iter()
            .map(Value::Str)
            .collect()),
        Value::Series(series) => Ok(series.data.cells().into_iter().map(Value::from_cell).collect()),
        Value::GroupBy(group) => groupby::iterate(group),
        other => Err(ScriptError::type_error(format!(
            "'{}' object is not iterable",
            other.type_name()
        ))),
    }
}

/// Element-wise arithmetic between a frame and a scalar or a same-shaped frame.
pub fn frame_binary(
    op: BinOp,
    left: &Value,
    right: &Value,
    max_len: usize,
) -> Result<Value, ScriptError> {
    let series_of = |name: &str, data: &ColumnData| Value::series(Some(name.to_string()), data.clone());
    let (table, other, frame_left) = match (left, right) {
        (Value::Frame(table), other) => (table.borrow().clone(), other, true),
        (other, Value::Frame(table)) => (table.borrow().clone(), other, false),
        _ => return ops::binary(op, left, right, max_len),
    };
    let mut columns = Vec::with_capacity(table.width());
    for (name, data) in table.columns() {
        let operand = match other {
            Value::Frame(peer) => {
                let peer = peer.borrow();
                let data = peer.require(name).map_err(table_error)?;
                series_of(name, data)
            }
            scalar => scalar.clone(),
        };
        let column = series_of(name, data);
        let result = if frame_left {
            ops::binary(op, &column, &operand, max_len)?
        } else {
            ops::binary(op, &operand, &column, max_len)?
        };
        match result {
            Value::Series(series) => columns.push((name.clone(), series.data.clone())),
            other => {
                return Err(ScriptError::type_error(format!(
                    "unexpected '{}' from frame arithmetic",
                    other.type_name()
                )))
            }
        }
    }
    Table::new(columns).map(Value::frame).map_err(table_error)
}

pub(crate) fn frame_arg(value: &Value, what: &str) -> Result<Table, ScriptError> {
    match value {
        Value::Frame(table) => Ok(table.borrow().clone()),
        Value::Series(series) => Table::new(vec![(
            series.name.clone().unwrap_or_else(|| "0".to_string()),
            series.data.clone(),
        )])
        .map_err(table_error),
        other => Err(ScriptError::type_error(format!(
            "{what} expects DataFrame objects, not '{}'",
            other.type_name()
        ))),
    }
}

fn read_sql(interp: &mut Interpreter, args: &Args) -> Result<Value, ScriptError> {
    let sql = args
        .text(0, "sql")?
        .ok_or_else(|| ScriptError::type_error("read_sql() missing required argument: 'sql'"))?;
    match args.get(1, "con") {
        Some(Value::Connection) => {}
        Some(other) => {
            return Err(ScriptError::type_error(format!(
                "read_sql() 'con' must be the provided connection, not '{}'",
                other.type_name()
            )))
        }
        None => return Err(ScriptError::type_error("read_sql() missing required argument: 'con'")),
    }
    let connection = interp.connection()?;
    let frame = connection.query(&sql).map_err(|err| {
        ScriptError::new(
            "DatabaseError",
            format!("Execution failed on sql '{sql}': {err}"),
        )
    })?;
    let table = Table::from_frame(&frame)
        .map_err(|err| ScriptError::new("DatabaseError", err.to_string()))?;
    debug!(rows = table.height(), columns = table.width(), "read_sql completed");
    interp.consume(table.height() as u64)?;
    Ok(Value::frame(table))
}

fn build_dataframe(interp: &mut Interpreter, args: &Args) -> Result<Table, ScriptError> {
    let columns = match args.opt(1, "columns") {
        Some(value) => Some(names_arg(value)?),
        None => None,
    };
    let table = match args.opt(0, "data") {
        None => Table::new(
            columns
                .unwrap_or_default()
                .into_iter()
                .map(|name| (name, ColumnData::Float(Vec::new())))
                .collect(),
        )
        .map_err(table_error)?,
        Some(Value::Frame(table)) => table.borrow().clone(),
        Some(Value::Dict(entries)) => {
            let entries = entries.borrow().clone();
            let height = entries
                .values()
                .filter_map(|v| sequence_cells(v).ok().flatten().map(|c| c.len()))
                .max()
                .unwrap_or(1);
            let mut built = Vec::with_capacity(entries.len());
            for (key, value) in &entries {
                built.push((to_str(&key.to_value()), column_for(value, height)?));
            }
            let table = Table::new(built).map_err(|_| {
                ScriptError::value_error("All arrays must be of the same length")
            })?;
            match columns {
                Some(names) => table.select(&names).map_err(table_error)?,
                None => table,
            }
        }
        Some(data @ (Value::List(_) | Value::Tuple(_))) => {
            let rows = interp.iterate(data)?;
            records_table(interp, &rows, columns)?
        }
        Some(other) => {
            return Err(ScriptError::value_error(format!(
                "DataFrame constructor not properly called with '{}'",
                other.type_name()
            )))
        }
    };
    Ok(table)
}

/// Rows given as dicts (keys become columns) or as sequences (named by `columns`).
fn records_table(
    interp: &mut Interpreter,
    rows: &[Value],
    columns: Option<Vec<String>>,
) -> Result<Table, ScriptError> {
    let mut names: Vec<String> = columns.clone().unwrap_or_default();
    let mut records: Vec<Vec<(String, Cell)>> = Vec::with_capacity(rows.len());
    for row in rows {
        let record = match row {
            Value::Dict(entries) => entries
                .borrow()
                .iter()
                .map(|(k, v)| Ok((to_str(&k.to_value()), scalar_cell(v)?)))
                .collect::<Result<Vec<_>, ScriptError>>()?,
            other => {
                let cells = interp.iterate(other)?;
                if columns.is_none() {
                    for i in names.len()..cells.len() {
                        names.push(i.to_string());
                    }
                }
                if cells.len() != names.len() {
                    return Err(ScriptError::value_error(format!(
                        "{} columns passed, passed data had {} columns",
                        names.len(),
                        cells.len()
                    )));
                }
                names
                    .iter()
                    .cloned()
                    .zip(cells.iter().map(scalar_cell).collect::<Result<Vec<_>, _>>()?)
                    .collect()
            }
        };
        if columns.is_none() {
            for (name, _) in &record {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
        records.push(record);
    }
    let built = names
        .iter()
        .map(|name| {
            let cells: Vec<Cell> = records
                .iter()
                .map(|record| {
                    record
                        .iter()
                        .find(|(key, _)| key == name)
                        .map_or(Cell::Null, |(_, cell)| cell.clone())
                })
                .collect();
            (name.clone(), ColumnData::from_cells(&cells))
        })
        .collect();
    Table::new(built).map_err(table_error)
}

fn to_datetime_cell(cell: &Cell, format: Option<&str>, coerce: bool) -> Result<Cell, ScriptError> {
    match cell {
        Cell::Null | Cell::DateTime(_) => Ok(cell.clone()),
        Cell::Date(d) => Ok(Cell::DateTime(d.and_time(NaiveTime::MIN))),
        Cell::Str(text) => match parse_datetime(text, format) {
            Some(parsed) => Ok(Cell::DateTime(parsed)),
            None if coerce => Ok(Cell::Null),
            None => Err(ScriptError::value_error(match format {
                Some(format) => format!("time data \"{text}\" doesn't match format \"{format}\""),
                None => format!("Unknown datetime string format, unable to parse: {text}"),
            })),
        },
        _ if coerce => Ok(Cell::Null),
        other => Err(ScriptError::type_error(format!(
            "cannot convert {} to datetime",
            cell_display(other)
        ))),
    }
}

fn to_numeric_cell(cell: &Cell, coerce: bool) -> Result<Cell, ScriptError> {
    match cell {
        Cell::Null | Cell::Int(_) | Cell::Float(_) => Ok(cell.clone()),
        Cell::Bool(v) => Ok(Cell::Int(i64::from(*v))),
        Cell::Str(text) => {
            let trimmed = text.trim();
            if let Ok(v) = trimmed.parse::<i64>() {
                return Ok(Cell::Int(v));
            }
            match trimmed.parse::<f64>() {
                Ok(v) => Ok(Cell::Float(v)),
                Err(_) if coerce => Ok(Cell::Null),
                Err(_) => Err(ScriptError::value_error(format!(
                    "Unable to parse string \"{text}\""
                ))),
            }
        }
        _ if coerce => Ok(Cell::Null),
        other => Err(ScriptError::type_error(format!(
            "Invalid object type {}",
            cell_display(other)
        ))),
    }
}

/// Applies a cell conversion to a scalar, sequence or Series.
fn convert(
    value: &Value,
    convert: impl Fn(&Cell) -> Result<Cell, ScriptError>,
) -> Result<Value, ScriptError> {
    match value {
        Value::Series(series) => {
            let cells = series.data.cells().iter().map(&convert).collect::<Result<Vec<_>, _>>()?;
            Ok(Value::series(series.name.clone(), ColumnData::from_cells(&cells)))
        }
        other => match sequence_cells(other)? {
            Some(cells) => {
                let cells = cells.iter().map(&convert).collect::<Result<Vec<_>, _>>()?;
                Ok(Value::series(None, ColumnData::from_cells(&cells)))
            }
            None => Ok(Value::from_cell(convert(&scalar_cell(other)?)?)),
        },
    }
}

fn coerce_flag(args: &Args) -> Result<bool, ScriptError> {
    match args.text(usize::MAX, "errors")?.as_deref() {
        None | Some("raise") => Ok(false),
        Some("coerce") => Ok(true),
        Some(other) => Err(ScriptError::value_error(format!(
            "errors must be one of 'raise' or 'coerce', got '{other}'"
        ))),
    }
}

const FREQUENCIES: &[&str] = &["D", "W", "H", "h", "MS", "M", "ME"];

/// The `n`th stamp of a frequency anchored at `at`.
fn advance(at: NaiveDateTime, freq: &str, n: i64) -> Option<NaiveDateTime> {
    match freq {
        "D" => at.checked_add_signed(Duration::days(n)),
        "W" => at.checked_add_signed(Duration::weeks(n)),
        "H" | "h" => at.checked_add_signed(Duration::hours(n)),
        "MS" => {
            let first = at.date().with_day(1)?;
            let first = if at.day() == 1 {
                first
            } else {
                first.checked_add_months(Months::new(1))?
            };
            first
                .checked_add_months(Months::new(u32::try_from(n).ok()?))
                .map(|d| d.and_time(at.time()))
        }
        "M" | "ME" => {
            let first = at.date().with_day(1)?;
            let next = first.checked_add_months(Months::new(u32::try_from(n).ok()? + 1))?;
            next.pred_opt().map(|d| d.and_time(at.time()))
        }
        _ => None,
    }
}

fn date_range(interp: &mut Interpreter, args: &Args) -> Result<Value, ScriptError> {
    let start = args.opt(0, "start").map(timestamp).transpose()?;
    let end = args.opt(1, "end").map(timestamp).transpose()?;
    let periods = match args.opt(2, "periods") {
        Some(value) => Some(
            value
                .as_i64()
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| ScriptError::value_error("periods must be a non-negative integer"))?,
        ),
        None => None,
    };
    let freq = args.text(3, "freq")?.unwrap_or_else(|| "D".to_string());
    if !FREQUENCIES.contains(&freq.as_str()) {
        return Err(ScriptError::value_error(format!("Invalid frequency: {freq}")));
    }
    let origin = match (start, end, periods) {
        (Some(start), Some(_), _) | (Some(start), None, Some(_)) => start,
        (None, Some(end), Some(periods)) => {
            let back = 1 - i64::try_from(periods).unwrap_or(1);
            advance(end, &freq, back).ok_or_else(|| {
                ScriptError::value_error("month frequencies need a start date")
            })?
        }
        _ => {
            return Err(ScriptError::value_error(
                "Of the four parameters: start, end, periods, and freq, exactly three must be specified",
            ))
        }
    };
    let mut stamps = Vec::new();
    for n in 0_i64.. {
        if periods.is_some_and(|limit| stamps.len() >= limit) {
            break;
        }
        let Some(current) = advance(origin, &freq, n) else {
            break;
        };
        if end.is_some_and(|end| current > end) {
            break;
        }
        interp.consume(1)?;
        stamps.push(Some(current));
    }
    Ok(Value::series(None, ColumnData::DateTime(stamps)))
}

fn timestamp(value: &Value) -> Result<NaiveDateTime, ScriptError> {
    match to_datetime_cell(&scalar_cell(value)?, None, false)? {
        Cell::DateTime(dt) => Ok(dt),
        _ => Err(ScriptError::value_error("could not convert to Timestamp")),
    }
}

fn module_call(interp: &mut Interpreter, name: &str, args: Args) -> Result<Value, ScriptError> {
    match name {
        "read_sql" | "read_sql_query" => read_sql(interp, &args),
        "DataFrame" => build_dataframe(interp, &args).map(Value::frame),
        "Series" => {
            let name = args.text(usize::MAX, "name")?;
            let data = match args.opt(0, "data") {
                None => ColumnData::Float(Vec::new()),
                Some(Value::Dict(entries)) => {
                    let cells = entries
                        .borrow()
                        .values()
                        .map(scalar_cell)
                        .collect::<Result<Vec<_>, _>>()?;
                    ColumnData::from_cells(&cells)
                }
                Some(value) => match sequence_cells(value)? {
                    Some(cells) => ColumnData::from_cells(&cells),
                    None => ColumnData::from_cells(&[scalar_cell(value)?]),
                },
            };
            let name = name.or_else(|| match args.opt(0, "data") {
                Some(Value::Series(series)) => series.name.clone(),
                _ => None,
            });
            Ok(Value::series(name, data))
        }
        "to_datetime" => {
            let value = args.require(0, "arg", name)?;
            let format = args.text(usize::MAX, "format")?;
            let coerce = coerce_flag(&args)?;
            convert(value, |cell| to_datetime_cell(cell, format.as_deref(), coerce))
        }
        "Timestamp" => timestamp(args.require(0, "ts_input", name)?).map(Value::DateTime),
        "Timedelta" => dates::delta_from_args(&args).map(Value::Delta),
        "to_numeric" => {
            let value = args.require(0, "arg", name)?;
            let coerce = coerce_flag(&args)?;
            convert(value, |cell| to_numeric_cell(cell, coerce))
        }
        "isna" | "isnull" | "notna" | "notnull" => {
            let want_missing = name.starts_with("is");
            let value = args.require(0, "obj", name)?;
            match value {
                Value::Series(series) => Ok(Value::series(
                    series.name.clone(),
                    ColumnData::Bool(
                        series
                            .data
                            .cells()
                            .iter()
                            .map(|c| Some(c.is_null() == want_missing))
                            .collect(),
                    ),
                )),
                scalar => {
                    let missing = scalar.to_cell().is_some_and(|c| c.is_null());
                    Ok(Value::Bool(missing == want_missing))
                }
            }
        }
        "concat" => {
            let parts = interp.iterate(args.require(0, "objs", name)?)?;
            let axis = match args.opt(usize::MAX, "axis") {
                Some(Value::Str(axis)) if axis == "columns" => 1,
                Some(value) => value.as_i64().unwrap_or(0),
                None => 0,
            };
            if parts.is_empty() {
                return Err(ScriptError::value_error("No objects to concatenate"));
            }
            if parts.iter().all(|p| matches!(p, Value::Series(_))) && axis == 0 {
                let cells: Vec<Cell> = parts
                    .iter()
                    .filter_map(|p| match p {
                        Value::Series(series) => Some(series.data.cells()),
                        _ => None,
                    })
                    .flatten()
                    .collect();
                let name = match &parts[0] {
                    Value::Series(series) => series.name.clone(),
                    _ => None,
                };
                return Ok(Value::series(name, ColumnData::from_cells(&cells)));
            }
            let tables = parts
                .iter()
                .map(|p| frame_arg(p, "concat"))
                .collect::<Result<Vec<_>, _>>()?;
            interp.consume(tables.iter().map(|t| t.height() as u64).sum())?;
            if axis == 1 {
                let mut columns = Vec::new();
                for table in &tables {
                    columns.extend(table.columns().iter().cloned());
                }
                return Table::new(columns).map(Value::frame).map_err(table_error);
            }
            Ok(Value::frame(Table::concat(&tables)))
        }
        "merge" => {
            let left = frame_arg(args.require(0, "left", name)?, "merge")?;
            let right = args.require(1, "right", name)?.clone();
            let rest = Args::new(
                std::iter::once(right).chain(args.positional.iter().skip(2).cloned()).collect(),
                args.keywords.clone(),
            );
            frame::merge(interp, &left, &rest)
        }
        "pivot_table" => {
            let data = frame_arg(args.require(0, "data", name)?, "pivot_table")?;
            let rest = Args::new(args.positional.iter().skip(1).cloned().collect(), args.keywords.clone());
            frame::pivot_table(interp, &data, &rest)
        }
        "date_range" => date_range(interp, &args),
        other => Err(ScriptError::new(
            "AttributeError",
            format!("module 'pandas' has no attribute '{other}'"),
        )),
    }
}

pub(crate) fn join_how(args: &Args, index: usize) -> Result<JoinHow, ScriptError> {
    match args.text(index, "how")?.as_deref() {
        None | Some("inner") => Ok(JoinHow::Inner),
        Some("left") => Ok(JoinHow::Left),
        Some(other) => Err(ScriptError::not_supported(format!(
            "merge how='{other}' is not supported; use 'inner' or 'left'"
        ))),
    }
}

#[cfg(test)]
mod tests;
