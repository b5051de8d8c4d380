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

use super::{
    column_for, frame_arg, join_how, mask_of, names_arg, row_dict, sequence_cells, table_error,
};
use crate::sandbox::args::Args;
use crate::sandbox::error::ScriptError;
use crate::sandbox::format::{repr, to_str};
use crate::sandbox::interpreter::Interpreter;
use crate::sandbox::stats::{self, Reduction};
use crate::sandbox::value::{Accessor, AccessorKind, DictKey, GroupByValue, Shared, Value};
use crate::tabular::{Cell, ColumnData, Table, TableError};
use indexmap::IndexMap;
use std::rc::Rc;

const METHODS: &[&str] = &[
    "apply", "assign", "astype", "copy", "count", "drop", "drop_duplicates", "dropna",
    "fillna", "groupby", "head", "info", "insert", "isna", "isnull", "iterrows", "max",
    "mean", "median", "merge", "min", "nlargest", "notna", "notnull", "nsmallest", "nunique",
    "pivot_table", "prod", "rename", "reset_index", "round", "select_dtypes", "set_index",
    "sort_index", "sort_values", "std", "sum", "tail", "to_dict", "var",
];

/// Writers and string evaluators stay out of reach of scripts.
const BLOCKED: &[&str] = &[
    "eval", "query", "to_clipboard", "to_csv", "to_excel", "to_feather", "to_hdf", "to_json",
    "to_parquet", "to_pickle", "to_sql",
];

pub(super) fn attribute(value: &Value, attr: &str) -> Result<Option<Value>, ScriptError> {
    let Value::Frame(table) = value else {
        return Ok(None);
    };
    if METHODS.contains(&attr) || BLOCKED.contains(&attr) {
        return Ok(Some(Value::method(value.clone(), attr)));
    }
    let table = table.borrow();
    let found = match attr {
        "columns" => Some(Value::list(table.column_names().into_iter().map(Value::Str).collect())),
        "shape" => Some(Value::tuple(vec![
            Value::Int(table.height() as i64),
            Value::Int(table.width() as i64),
        ])),
        "empty" => Some(Value::Bool(table.height() == 0 || table.width() == 0)),
        "size" => Some(Value::Int((table.height() * table.width()) as i64)),
        "index" => Some(Value::list((0..table.height() as i64).map(Value::Int).collect())),
        "dtypes" => Some(Value::dict(
            table
                .columns()
                .iter()
                .map(|(name, data)| (DictKey::Str(name.clone()), Value::str(data.dtype_name())))
                .collect(),
        )),
        "values" => Some(Value::list(
            (0..table.height())
                .map(|row| {
                    Value::list(
                        table
                            .row(row)
                            .into_iter()
                            .map(|(_, cell)| Value::from_cell(cell))
                            .collect(),
                    )
                })
                .collect(),
        )),
        "loc" | "iloc" => Some(Value::Accessor(Rc::new(Accessor {
            kind: if attr == "loc" {
                AccessorKind::Loc
            } else {
                AccessorKind::Iloc
            },
            target: value.clone(),
        }))),
        name => table
            .column(name)
            .map(|data| Value::series(Some(name.to_string()), data.clone())),
    };
    Ok(found)
}

pub(super) fn get_item(
    interp: &mut Interpreter,
    table: &Shared<Table>,
    index: &Value,
) -> Result<Value, ScriptError> {
    let table = table.borrow();
    interp.consume(table.height() as u64 / 16)?;
    if let Value::Str(name) = index {
        return table
            .column(name)
            .map(|data| Value::series(Some(name.clone()), data.clone()))
            .ok_or_else(|| ScriptError::key_error(name));
    }
    if let Value::Slice(slice) = index {
        return Ok(Value::frame(table.take(&slice.indices(table.height())?)));
    }
    if let Some(mask) = mask_of(index, table.height())? {
        return Ok(Value::frame(table.filter(&mask)));
    }
    match index {
        Value::List(_) | Value::Tuple(_) => {
            let names = names_arg(index)?;
            table.select(&names).map(Value::frame).map_err(|err| match err {
                TableError::MissingColumn(name) => {
                    ScriptError::key_error(&format!("None of [{name}] are in the [columns]"))
                }
                other => table_error(other),
            })
        }
        other => Err(ScriptError::new("KeyError", repr(other))),
    }
}

pub(super) fn set_item(
    _interp: &mut Interpreter,
    table: &Shared<Table>,
    index: &Value,
    value: Value,
) -> Result<(), ScriptError> {
    match index {
        Value::Str(name) => {
            let height = {
                let current = table.borrow();
                if current.width() == 0 {
                    sequence_cells(&value)?.map_or(1, |cells| cells.len())
                } else {
                    current.height()
                }
            };
            let data = column_for(&value, height)?;
            table.borrow_mut().set_column(name, data).map_err(table_error)
        }
        Value::List(_) | Value::Tuple(_) => {
            let names = names_arg(index)?;
            let source = match &value {
                Value::Frame(other) => other.borrow().clone(),
                other => {
                    return Err(ScriptError::type_error(format!(
                        "cannot assign '{}' to multiple columns",
                        other.type_name()
                    )))
                }
            };
            if source.width() != names.len() {
                return Err(ScriptError::value_error("Columns must be same length as key"));
            }
            let mut target = table.borrow_mut();
            for (name, (_, data)) in names.iter().zip(source.columns()) {
                target.set_column(name, data.clone()).map_err(table_error)?;
            }
            Ok(())
        }
        other => Err(ScriptError::type_error(format!(
            "column labels must be strings, not '{}'",
            other.type_name()
        ))),
    }
}

fn ascending_flags(args: &Args, count: usize) -> Result<Vec<bool>, ScriptError> {
    match args.opt(1, "ascending") {
        None => Ok(vec![true; count]),
        Some(Value::List(flags)) => {
            let flags = flags.borrow();
            if flags.len() != count {
                return Err(ScriptError::value_error(format!(
                    "Length of ascending ({}) != length of by ({count})",
                    flags.len()
                )));
            }
            flags.iter().map(Value::truthy).collect()
        }
        Some(flag) => Ok(vec![flag.truthy()?; count]),
    }
}

pub(super) fn sort_table(table: &Table, args: &Args) -> Result<Table, ScriptError> {
    let by = names_arg(args.require(0, "by", "sort_values")?)?;
    let ascending = ascending_flags(args, by.len())?;
    let keys: Vec<(String, bool)> = by.into_iter().zip(ascending).collect();
    table.sort_by(&keys).map_err(table_error)
}

fn fill_column(data: &ColumnData, fill: &Value) -> Result<ColumnData, ScriptError> {
    let fill = fill.to_cell().ok_or_else(|| {
        ScriptError::type_error(format!("cannot fill with '{}'", fill.type_name()))
    })?;
    let cells: Vec<Cell> = data
        .cells()
        .into_iter()
        .map(|cell| if cell.is_null() { fill.clone() } else { cell })
        .collect();
    Ok(ColumnData::from_cells(&cells))
}

fn reduce_frame(table: &Table, reduction: Reduction, numeric_only: bool) -> Result<Value, ScriptError> {
    let mut out = IndexMap::new();
    for (name, data) in table.columns() {
        let skip = (reduction.numeric_only() || numeric_only) && !data.is_numeric();
        if skip {
            continue;
        }
        out.insert(DictKey::Str(name.clone()), stats::reduce(data, reduction)?);
    }
    Ok(Value::dict(out))
}

fn round_column(data: &ColumnData, decimals: i32) -> ColumnData {
    match data {
        ColumnData::Float(values) => {
            let factor = 10f64.powi(decimals);
            ColumnData::Float(
                values
                    .iter()
                    .map(|v| v.map(|v| (v * factor).round_ties_even() / factor))
                    .collect(),
            )
        }
        other => other.clone(),
    }
}

fn to_dict(table: &Table, orient: &str) -> Result<Value, ScriptError> {
    let value = match orient {
        "dict" | "index" => Value::dict(
            table
                .columns()
                .iter()
                .map(|(name, data)| {
                    let inner = data
                        .cells()
                        .into_iter()
                        .enumerate()
                        .map(|(i, cell)| (DictKey::Int(i as i64), Value::from_cell(cell)))
                        .collect();
                    (DictKey::Str(name.clone()), Value::dict(inner))
                })
                .collect(),
        ),
        "list" | "series" => Value::dict(
            table
                .columns()
                .iter()
                .map(|(name, data)| {
                    let items = data.cells().into_iter().map(Value::from_cell).collect();
                    (DictKey::Str(name.clone()), Value::list(items))
                })
                .collect(),
        ),
        "records" => Value::list((0..table.height()).map(|row| row_dict(table, row)).collect()),
        other => {
            return Err(ScriptError::value_error(format!(
                "orient '{other}' not understood"
            )))
        }
    };
    Ok(value)
}

fn call_with_rows(
    interp: &mut Interpreter,
    table: &Table,
    func: &Value,
) -> Result<ColumnData, ScriptError> {
    let mut cells = Vec::with_capacity(table.height());
    for row in 0..table.height() {
        let result = interp.call_value(func, Args::of(vec![row_dict(table, row)]))?;
        cells.push(result.to_cell().ok_or_else(|| {
            ScriptError::type_error(format!(
                "apply(axis=1) must return scalars, got '{}'",
                result.type_name()
            ))
        })?);
    }
    Ok(ColumnData::from_cells(&cells))
}

fn axis_is_columns(args: &Args, index: usize) -> Result<bool, ScriptError> {
    match args.opt(index, "axis") {
        None => Ok(false),
        Some(Value::Str(axis)) => Ok(axis == "columns"),
        Some(value) => Ok(value.as_i64() == Some(1)),
    }
}

pub(crate) fn merge(interp: &mut Interpreter, left: &Table, args: &Args) -> Result<Value, ScriptError> {
    let mut right = frame_arg(args.require(0, "right", "merge")?, "merge")?;
    interp.consume((left.height() + right.height()) as u64)?;
    let how = join_how(args, 1)?;
    let on = match (args.opt(2, "on"), args.opt(usize::MAX, "left_on"), args.opt(usize::MAX, "right_on")) {
        (Some(on), _, _) => names_arg(on)?,
        (None, Some(left_on), Some(right_on)) => {
            let left_on = names_arg(left_on)?;
            let right_on = names_arg(right_on)?;
            if left_on.len() != right_on.len() {
                return Err(ScriptError::value_error("len(right_on) must equal len(left_on)"));
            }
            let mapping: Vec<(String, String)> = right_on.into_iter().zip(left_on.iter().cloned()).collect();
            right = right.rename(&mapping);
            left_on
        }
        (None, None, None) => {
            let common: Vec<String> = left
                .column_names()
                .into_iter()
                .filter(|name| right.column(name).is_some())
                .collect();
            if common.is_empty() {
                return Err(ScriptError::new(
                    "MergeError",
                    "No common columns to perform merge on",
                ));
            }
            common
        }
        _ => {
            return Err(ScriptError::new(
                "MergeError",
                "left_on and right_on must be given together",
            ))
        }
    };
    left.join(&right, &on, how).map(Value::frame).map_err(table_error)
}

pub(crate) fn pivot_table(
    interp: &mut Interpreter,
    data: &Table,
    args: &Args,
) -> Result<Value, ScriptError> {
    let index = names_arg(args.require(1, "index", "pivot_table")?)?;
    let pivot = match args.opt(2, "columns") {
        Some(value) => {
            let names = names_arg(value)?;
            match names.as_slice() {
                [single] => Some(single.clone()),
                _ => {
                    return Err(ScriptError::not_supported(
                        "pivot_table supports a single 'columns' key",
                    ))
                }
            }
        }
        None => None,
    };
    let values = match args.opt(0, "values") {
        Some(value) => names_arg(value)?,
        None => data
            .columns()
            .iter()
            .filter(|(name, column)| {
                column.is_numeric() && !index.contains(name) && pivot.as_ref() != Some(name)
            })
            .map(|(name, _)| name.clone())
            .collect(),
    };
    let aggfunc = args.text(3, "aggfunc")?.unwrap_or_else(|| "mean".to_string());
    let reduction = Reduction::from_name(&aggfunc).ok_or_else(|| {
        ScriptError::value_error(format!("unsupported aggfunc '{aggfunc}'"))
    })?;
    let fill = args.opt(usize::MAX, "fill_value").and_then(Value::to_cell);
    interp.consume(data.height() as u64)?;

    let groups = data.group_indices(&index).map_err(table_error)?;
    let mut key_cells: Vec<Vec<Cell>> = vec![Vec::new(); index.len()];
    for (key, _) in &groups {
        for (slot, cell) in key_cells.iter_mut().zip(key) {
            slot.push(cell.clone());
        }
    }
    let mut columns: Vec<(String, ColumnData)> = index
        .iter()
        .cloned()
        .zip(key_cells.iter().map(|cells| ColumnData::from_cells(cells)))
        .collect();

    let labels = match &pivot {
        Some(name) => data
            .group_indices(std::slice::from_ref(name))
            .map_err(table_error)?
            .into_iter()
            .map(|(key, _)| key.into_iter().next().unwrap_or(Cell::Null))
            .collect(),
        None => Vec::new(),
    };
    for value_name in &values {
        let column = data.require(value_name).map_err(table_error)?;
        if pivot.is_none() {
            let cells = groups
                .iter()
                .map(|(_, rows)| stats::reduce(&column.take(rows), reduction).map(|v| v.to_cell().unwrap_or(Cell::Null)))
                .collect::<Result<Vec<_>, _>>()?;
            columns.push((value_name.clone(), ColumnData::from_cells(&cells)));
            continue;
        }
        let pivot_column = data.require(pivot.as_deref().unwrap_or_default()).map_err(table_error)?;
        for label in &labels {
            let mut cells = Vec::with_capacity(groups.len());
            for (_, rows) in &groups {
                let matching: Vec<usize> = rows
                    .iter()
                    .copied()
                    .filter(|&row| pivot_column.get(row) == *label)
                    .collect();
                let cell = if matching.is_empty() {
                    fill.clone().unwrap_or(Cell::Null)
                } else {
                    stats::reduce(&column.take(&matching), reduction)?
                        .to_cell()
                        .unwrap_or(Cell::Null)
                };
                cells.push(cell);
            }
            let label_text = to_str(&Value::from_cell(label.clone()));
            let name = if values.len() == 1 {
                label_text
            } else {
                format!("{value_name}_{label_text}")
            };
            columns.push((name, ColumnData::from_cells(&cells)));
        }
    }
    Table::new(columns).map(Value::frame).map_err(table_error)
}

fn select_dtypes(table: &Table, args: &Args) -> Result<Table, ScriptError> {
    let include = match args.opt(0, "include") {
        Some(value) => names_arg(value)?,
        None => Vec::new(),
    };
    let exclude = match args.opt(1, "exclude") {
        Some(value) => names_arg(value)?,
        None => Vec::new(),
    };
    let wanted = |kinds: &[String], data: &ColumnData| {
        kinds.iter().any(|kind| match kind.as_str() {
            "number" | "float" | "int" | "float64" | "int64" => data.is_numeric(),
            "object" | "str" | "string" => matches!(data, ColumnData::Str(_)),
            "datetime" | "datetime64" | "datetime64[ns]" => data.is_temporal(),
            "bool" => matches!(data, ColumnData::Bool(_)),
            _ => false,
        })
    };
    let kept: Vec<String> = table
        .columns()
        .iter()
        .filter(|(_, data)| (include.is_empty() || wanted(&include, data)) && !wanted(&exclude, data))
        .map(|(name, _)| name.clone())
        .collect();
    table.select(&kept).map_err(table_error)
}

pub(super) fn call(
    interp: &mut Interpreter,
    frame: &Shared<Table>,
    name: &str,
    args: Args,
) -> Result<Value, ScriptError> {
    if BLOCKED.contains(&name) {
        return Err(ScriptError::not_supported(format!(
            "DataFrame.{name} is not available here; hand data back through `result`"
        )));
    }
    let table = frame.borrow().clone();
    interp.consume(table.height() as u64 / 8 + 1)?;
    let value = match name {
        "head" => Value::frame(table.head(usize::try_from(args.int(0, "n", 5)?).unwrap_or(0))),
        "tail" => Value::frame(table.tail(usize::try_from(args.int(0, "n", 5)?).unwrap_or(0))),
        "copy" | "reset_index" | "sort_index" => Value::frame(table),
        "set_index" => {
            return Err(ScriptError::not_supported(
                "DataFrame.set_index is not supported; frames keep every field as a column",
            ))
        }
        "sort_values" => Value::frame(sort_table(&table, &args)?),
        "groupby" => {
            let keys = names_arg(args.require(0, "by", name)?)?;
            for key in &keys {
                table.require(key).map_err(table_error)?;
            }
            Value::GroupBy(Rc::new(GroupByValue {
                table,
                keys,
                selection: None,
                single: false,
            }))
        }
        "rename" => {
            let mapping = match args.opt(usize::MAX, "columns").or_else(|| args.opt(0, "mapper")) {
                Some(Value::Dict(entries)) => entries
                    .borrow()
                    .iter()
                    .map(|(from, to)| (to_str(&from.to_value()), to_str(to)))
                    .collect::<Vec<_>>(),
                Some(other) => {
                    return Err(ScriptError::type_error(format!(
                        "rename expects a dict of column names, not '{}'",
                        other.type_name()
                    )))
                }
                None => Vec::new(),
            };
            Value::frame(table.rename(&mapping))
        }
        "drop" => {
            let columns = match (args.opt(usize::MAX, "columns"), args.opt(0, "labels")) {
                (Some(columns), _) => Some(names_arg(columns)?),
                (None, Some(labels)) if axis_is_columns(&args, 1)? => Some(names_arg(labels)?),
                (None, Some(labels)) => {
                    let rows: Vec<usize> = match labels {
                        Value::List(items) => items.borrow().iter().filter_map(Value::as_i64).filter_map(|i| usize::try_from(i).ok()).collect(),
                        single => single.as_i64().and_then(|i| usize::try_from(i).ok()).into_iter().collect(),
                    };
                    let keep: Vec<usize> = (0..table.height()).filter(|row| !rows.contains(row)).collect();
                    return Ok(Value::frame(table.take(&keep)));
                }
                (None, None) => None,
            };
            match columns {
                Some(columns) => Value::frame(table.drop(&columns).map_err(|err| match err {
                    TableError::MissingColumn(name) => {
                        ScriptError::key_error(&format!("['{name}'] not found in axis"))
                    }
                    other => table_error(other),
                })?),
                None => Value::frame(table),
            }
        }
        "fillna" => {
            let fill = args.require(0, "value", name)?;
            let mut columns = Vec::with_capacity(table.width());
            for (column, data) in table.columns() {
                let filled = match fill {
                    Value::Dict(entries) => match entries.borrow().get(&DictKey::Str(column.clone())) {
                        Some(value) => fill_column(data, value)?,
                        None => data.clone(),
                    },
                    scalar => fill_column(data, scalar)?,
                };
                columns.push((column.clone(), filled));
            }
            Value::frame(Table::new(columns).map_err(table_error)?)
        }
        "dropna" => {
            let subset = match args.opt(usize::MAX, "subset") {
                Some(value) => names_arg(value)?,
                None => table.column_names(),
            };
            let require_all = args.text(usize::MAX, "how")?.as_deref() == Some("all");
            let checked = subset
                .iter()
                .map(|name| table.require(name).map_err(table_error))
                .collect::<Result<Vec<_>, _>>()?;
            let mask: Vec<bool> = (0..table.height())
                .map(|row| {
                    let nulls = checked.iter().filter(|data| data.get(row).is_null()).count();
                    if require_all {
                        nulls < checked.len()
                    } else {
                        nulls == 0
                    }
                })
                .collect();
            Value::frame(table.filter(&mask))
        }
        "drop_duplicates" => {
            let subset = match args.opt(0, "subset") {
                Some(value) => Some(names_arg(value)?),
                None => None,
            };
            let keep_last = args.text(1, "keep")?.as_deref() == Some("last");
            if keep_last {
                let reversed: Vec<usize> = (0..table.height()).rev().collect();
                let deduped = table.take(&reversed).drop_duplicates(subset.as_deref()).map_err(table_error)?;
                let restored: Vec<usize> = (0..deduped.height()).rev().collect();
                Value::frame(deduped.take(&restored))
            } else {
                Value::frame(table.drop_duplicates(subset.as_deref()).map_err(table_error)?)
            }
        }
        "merge" => merge(interp, &table, &args)?,
        "pivot_table" => pivot_table(interp, &table, &args)?,
        "to_dict" => to_dict(&table, args.text(0, "orient")?.as_deref().unwrap_or("dict"))?,
        "nlargest" | "nsmallest" => {
            let n = usize::try_from(args.int(0, "n", 5)?).unwrap_or(0);
            let columns = names_arg(args.require(1, "columns", name)?)?;
            let keys: Vec<(String, bool)> = columns.into_iter().map(|c| (c, name == "nsmallest")).collect();
            Value::frame(table.sort_by(&keys).map_err(table_error)?.head(n))
        }
        "sum" | "mean" | "median" | "min" | "max" | "count" | "std" | "var" | "nunique" | "prod" => {
            let reduction = Reduction::from_name(name).unwrap_or(Reduction::Count);
            reduce_frame(&table, reduction, args.flag(usize::MAX, "numeric_only", false)?)?
        }
        "iterrows" => Value::list(
            (0..table.height())
                .map(|row| Value::tuple(vec![Value::Int(row as i64), row_dict(&table, row)]))
                .collect(),
        ),
        "apply" => {
            let func = args.require(0, "func", name)?.clone();
            if axis_is_columns(&args, 1)? {
                Value::series(None, call_with_rows(interp, &table, &func)?)
            } else {
                let mut out = IndexMap::new();
                for (column, data) in table.columns() {
                    let series = Value::series(Some(column.clone()), data.clone());
                    out.insert(DictKey::Str(column.clone()), interp.call_value(&func, Args::of(vec![series]))?);
                }
                Value::dict(out)
            }
        }
        "assign" => {
            let mut updated = table;
            for (column, value) in &args.keywords {
                let value = match value {
                    Value::Function(_) | Value::Builtin(_) | Value::Method(_) => {
                        interp.call_value(value, Args::of(vec![Value::frame(updated.clone())]))?
                    }
                    other => other.clone(),
                };
                let data = column_for(&value, updated.height())?;
                updated.set_column(column, data).map_err(table_error)?;
            }
            Value::frame(updated)
        }
        "insert" => {
            let column = args.text(1, "column")?.ok_or_else(|| {
                ScriptError::type_error("insert() missing required argument: 'column'")
            })?;
            if table.column(&column).is_some() {
                return Err(ScriptError::value_error(format!("cannot insert {column}, already exists")));
            }
            let position = usize::try_from(args.int(0, "loc", 0)?).unwrap_or(0).min(table.width());
            let data = column_for(args.require(2, "value", name)?, table.height())?;
            let mut columns: Vec<(String, ColumnData)> = table.columns().to_vec();
            columns.insert(position, (column, data));
            *frame.borrow_mut() = Table::new(columns).map_err(table_error)?;
            Value::None
        }
        "round" => {
            let columns = table
                .columns()
                .iter()
                .map(|(column, data)| {
                    let decimals = match args.opt(0, "decimals") {
                        Some(Value::Dict(entries)) => entries
                            .borrow()
                            .get(&DictKey::Str(column.clone()))
                            .and_then(Value::as_i64),
                        Some(value) => value.as_i64(),
                        None => Some(0),
                    };
                    let rounded = match decimals {
                        Some(d) => round_column(data, i32::try_from(d).unwrap_or(0)),
                        None => data.clone(),
                    };
                    (column.clone(), rounded)
                })
                .collect();
            Value::frame(Table::new(columns).map_err(table_error)?)
        }
        "astype" => {
            let target = args.require(0, "dtype", name)?;
            let mut columns = Vec::with_capacity(table.width());
            for (column, data) in table.columns() {
                let dtype = match target {
                    Value::Dict(entries) => entries.borrow().get(&DictKey::Str(column.clone())).cloned(),
                    other => Some(other.clone()),
                };
                let converted = match dtype {
                    Some(dtype) => super::series::cast(data, &dtype)?,
                    None => data.clone(),
                };
                columns.push((column.clone(), converted));
            }
            Value::frame(Table::new(columns).map_err(table_error)?)
        }
        "isna" | "isnull" | "notna" | "notnull" => {
            let want_missing = name.starts_with("is");
            let columns = table
                .columns()
                .iter()
                .map(|(column, data)| {
                    let flags = data.cells().iter().map(|c| Some(c.is_null() == want_missing)).collect();
                    (column.clone(), ColumnData::Bool(flags))
                })
                .collect();
            Value::frame(Table::new(columns).map_err(table_error)?)
        }
        "select_dtypes" => Value::frame(select_dtypes(&table, &args)?),
        "info" => {
            let mut text = format!(
                "<class 'pandas.core.frame.DataFrame'>\nRangeIndex: {} entries\nData columns (total {} columns):\n",
                table.height(),
                table.width()
            );
            for (column, data) in table.columns() {
                let non_null = data.cells().iter().filter(|c| !c.is_null()).count();
                text.push_str(&format!(" {column}  {non_null} non-null  {}\n", data.dtype_name()));
            }
            interp.write_output(&text);
            Value::None
        }
        other => return Err(ScriptError::attribute_error("DataFrame", other)),
    };
    Ok(value)
}
