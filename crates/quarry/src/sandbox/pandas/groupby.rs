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

use super::{names_arg, table_error};
use crate::sandbox::args::Args;
use crate::sandbox::error::ScriptError;
use crate::sandbox::format::{repr, to_str};
use crate::sandbox::interpreter::Interpreter;
use crate::sandbox::stats::{self, Reduction};
use crate::sandbox::value::{GroupByValue, Value};
use crate::tabular::{Cell, ColumnData, Table};
use indexmap::IndexMap;
use std::rc::Rc;

const METHODS: &[&str] = &[
    "agg", "aggregate", "apply", "count", "filter", "first", "head", "last", "max", "mean",
    "median", "min", "nunique", "prod", "size", "std", "sum", "transform", "var",
];

type Groups = Vec<(Vec<Cell>, Vec<usize>)>;

#[derive(Clone)]
enum AggFunc {
    Reduce(Reduction),
    Size,
    Callable(Value),
}

impl AggFunc {
    fn parse(value: &Value) -> Result<(String, AggFunc), ScriptError> {
        let label = match value {
            Value::Str(name) => name.clone(),
            Value::Builtin(name) => (*name).to_string(),
            Value::Method(method) => method.1.clone(),
            Value::Function(function) => {
                return Ok((function.name.clone(), AggFunc::Callable(value.clone())))
            }
            other => {
                return Err(ScriptError::type_error(format!(
                    "aggregation must be a name or callable, not '{}'",
                    other.type_name()
                )))
            }
        };
        let func = match label.as_str() {
            "size" | "len" => AggFunc::Size,
            name => match Reduction::from_name(name) {
                Some(reduction) => AggFunc::Reduce(reduction),
                None if matches!(value, Value::Str(_)) => {
                    return Err(ScriptError::new(
                        "AttributeError",
                        format!("'SeriesGroupBy' object has no attribute '{name}'"),
                    ))
                }
                None => AggFunc::Callable(value.clone()),
            },
        };
        Ok((label, func))
    }

    fn apply(
        &self,
        interp: &mut Interpreter,
        column: &str,
        data: &ColumnData,
    ) -> Result<Cell, ScriptError> {
        let result = match self {
            AggFunc::Reduce(reduction) => stats::reduce(data, *reduction)?,
            AggFunc::Size => Value::Int(data.len() as i64),
            AggFunc::Callable(func) => interp.call_value(
                func,
                Args::of(vec![Value::series(Some(column.to_string()), data.clone())]),
            )?,
        };
        result.to_cell().ok_or_else(|| {
            ScriptError::type_error(format!(
                "aggregation must return a scalar, got '{}'",
                result.type_name()
            ))
        })
    }
}

pub(super) fn attribute(value: &Value, attr: &str) -> Result<Option<Value>, ScriptError> {
    let Value::GroupBy(group) = value else {
        return Ok(None);
    };
    if METHODS.contains(&attr) {
        return Ok(Some(Value::method(value.clone(), attr)));
    }
    if attr == "ngroups" {
        let groups = group.table.group_indices(&group.keys).map_err(table_error)?;
        return Ok(Some(Value::Int(groups.len() as i64)));
    }
    if group.table.column(attr).is_some() {
        return select(group, &Value::str(attr)).map(Some);
    }
    Ok(None)
}

/// `grouped['col']` or `grouped[['a', 'b']]`.
pub(super) fn select(group: &GroupByValue, index: &Value) -> Result<Value, ScriptError> {
    let single = matches!(index, Value::Str(_));
    let names = names_arg(index)?;
    for name in &names {
        if group.table.column(name).is_none() {
            return Err(ScriptError::key_error(&format!("Column not found: {name}")));
        }
    }
    Ok(Value::GroupBy(Rc::new(GroupByValue {
        table: group.table.clone(),
        keys: group.keys.clone(),
        selection: Some(names),
        single,
    })))
}

fn key_value(key: &[Cell]) -> Value {
    match key {
        [single] => Value::from_cell(single.clone()),
        many => Value::tuple(many.iter().cloned().map(Value::from_cell).collect()),
    }
}

pub(super) fn iterate(group: &GroupByValue) -> Result<Vec<Value>, ScriptError> {
    let groups = group.table.group_indices(&group.keys).map_err(table_error)?;
    Ok(groups
        .into_iter()
        .map(|(key, rows)| Value::tuple(vec![key_value(&key), Value::frame(group.table.take(&rows))]))
        .collect())
}

fn value_columns(group: &GroupByValue) -> Vec<String> {
    match &group.selection {
        Some(names) => names.clone(),
        None => group
            .table
            .column_names()
            .into_iter()
            .filter(|name| !group.keys.contains(name))
            .collect(),
    }
}

fn key_columns(group: &GroupByValue, groups: &Groups) -> Vec<(String, ColumnData)> {
    group
        .keys
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let cells: Vec<Cell> = groups.iter().map(|(key, _)| key[i].clone()).collect();
            (name.clone(), ColumnData::from_cells(&cells))
        })
        .collect()
}

/// One output column per `(output name, source column, function)`, appended after the keys.
fn aggregate(
    interp: &mut Interpreter,
    group: &GroupByValue,
    groups: &Groups,
    specs: Vec<(String, String, AggFunc)>,
) -> Result<Value, ScriptError> {
    let mut columns = key_columns(group, groups);
    for (output, source, func) in specs {
        let data = group.table.require(&source).map_err(table_error)?;
        let mut cells = Vec::with_capacity(groups.len());
        for (_, rows) in groups {
            interp.consume(rows.len() as u64 / 8 + 1)?;
            cells.push(func.apply(interp, &source, &data.take(rows))?);
        }
        columns.retain(|(name, _)| *name != output);
        columns.push((output, ColumnData::from_cells(&cells)));
    }
    Table::new(columns).map(Value::frame).map_err(table_error)
}

fn reduction_specs(
    group: &GroupByValue,
    func: AggFunc,
) -> Result<Vec<(String, String, AggFunc)>, ScriptError> {
    let mut specs = Vec::new();
    let columns = value_columns(group);
    let explicit = group.selection.is_some();
    for column in columns {
        let data = group.table.require(&column).map_err(table_error)?;
        if let AggFunc::Reduce(reduction) = &func {
            if reduction.numeric_only() && !explicit && !data.is_numeric() {
                continue;
            }
        }
        specs.push((column.clone(), column, func.clone()));
    }
    Ok(specs)
}

fn agg_specs(
    group: &GroupByValue,
    args: &Args,
) -> Result<Vec<(String, String, AggFunc)>, ScriptError> {
    if args.positional.is_empty() && !args.keywords.is_empty() {
        let mut specs = Vec::new();
        for (output, spec) in &args.keywords {
            let (source, func) = match spec {
                Value::Tuple(pair) if pair.len() == 2 => (pair[0].clone(), pair[1].clone()),
                other if group.single => (
                    Value::Str(value_columns(group).into_iter().next().unwrap_or_default()),
                    other.clone(),
                ),
                other => {
                    return Err(ScriptError::type_error(format!(
                        "named aggregation expects (column, func), not '{}'",
                        other.type_name()
                    )))
                }
            };
            let source = source.as_str().map(str::to_string).ok_or_else(|| {
                ScriptError::type_error("named aggregation column must be a string")
            })?;
            specs.push((output.clone(), source, AggFunc::parse(&func)?.1));
        }
        return Ok(specs);
    }
    let spec = args.require(0, "func", "agg")?;
    match spec {
        Value::Dict(entries) => {
            let mut specs = Vec::new();
            for (column, funcs) in entries.borrow().iter() {
                let column = match column.to_value() {
                    Value::Str(name) => name,
                    other => repr(&other),
                };
                match funcs {
                    Value::List(list) => {
                        for func in list.borrow().iter() {
                            let (label, func) = AggFunc::parse(func)?;
                            specs.push((format!("{column}_{label}"), column.clone(), func));
                        }
                    }
                    single => specs.push((column.clone(), column.clone(), AggFunc::parse(single)?.1)),
                }
            }
            Ok(specs)
        }
        Value::List(list) => {
            let columns = value_columns(group);
            let mut specs = Vec::new();
            for column in &columns {
                for func in list.borrow().iter() {
                    let (label, func) = AggFunc::parse(func)?;
                    let output = if group.single {
                        label
                    } else {
                        format!("{column}_{label}")
                    };
                    specs.push((output, column.clone(), func));
                }
            }
            Ok(specs)
        }
        single => {
            let (_, func) = AggFunc::parse(single)?;
            reduction_specs(group, func)
        }
    }
}

/// Broadcasts a per-group result back onto the original rows.
fn transform(
    interp: &mut Interpreter,
    group: &GroupByValue,
    groups: &Groups,
    func: &Value,
) -> Result<Value, ScriptError> {
    let (_, agg) = AggFunc::parse(func)?;
    let height = group.table.height();
    let mut columns = Vec::new();
    for column in value_columns(group) {
        let data = group.table.require(&column).map_err(table_error)?;
        let mut cells = vec![Cell::Null; height];
        for (_, rows) in groups {
            interp.consume(rows.len() as u64 / 8 + 1)?;
            let subset = data.take(rows);
            let filled: Vec<Cell> = match &agg {
                AggFunc::Callable(callable) => {
                    let result = interp.call_value(
                        callable,
                        Args::of(vec![Value::series(Some(column.clone()), subset.clone())]),
                    )?;
                    match result {
                        Value::Series(series) if series.len() == rows.len() => series.data.cells(),
                        scalar => vec![scalar.to_cell().unwrap_or(Cell::Null); rows.len()],
                    }
                }
                other => vec![other.apply(interp, &column, &subset)?; rows.len()],
            };
            for (row, cell) in rows.iter().zip(filled) {
                cells[*row] = cell;
            }
        }
        columns.push((column, ColumnData::from_cells(&cells)));
    }
    if group.single {
        let (name, data) = columns.into_iter().next().ok_or_else(|| {
            ScriptError::value_error("transform needs a column to work on")
        })?;
        return Ok(Value::series(Some(name), data));
    }
    Table::new(columns).map(Value::frame).map_err(table_error)
}

fn apply_frames(
    interp: &mut Interpreter,
    group: &GroupByValue,
    groups: &Groups,
    func: &Value,
) -> Result<Value, ScriptError> {
    let mut columns = key_columns(group, groups);
    let mut results: IndexMap<String, Vec<Cell>> = IndexMap::new();
    for (position, (_, rows)) in groups.iter().enumerate() {
        interp.consume(rows.len() as u64 / 8 + 1)?;
        let subset = match &group.selection {
            Some(names) if group.single => {
                let name = &names[0];
                let data = group.table.require(name).map_err(table_error)?;
                Value::series(Some(name.clone()), data.take(rows))
            }
            _ => Value::frame(group.table.take(rows)),
        };
        let produced = interp.call_value(func, Args::of(vec![subset]))?;
        let entries: Vec<(String, Cell)> = match &produced {
            Value::Dict(entries) => entries
                .borrow()
                .iter()
                .map(|(key, value)| {
                    (
                        to_str(&key.to_value()),
                        value.to_cell().unwrap_or(Cell::Null),
                    )
                })
                .collect(),
            scalar => vec![(
                "0".to_string(),
                scalar.to_cell().ok_or_else(|| {
                    ScriptError::type_error(format!(
                        "groupby apply must return a scalar or dict, got '{}'",
                        scalar.type_name()
                    ))
                })?,
            )],
        };
        for (name, cell) in entries {
            let slot = results
                .entry(name)
                .or_insert_with(|| vec![Cell::Null; groups.len()]);
            slot[position] = cell;
        }
    }
    for (name, cells) in results {
        columns.push((name, ColumnData::from_cells(&cells)));
    }
    Table::new(columns).map(Value::frame).map_err(table_error)
}

pub(super) fn call(
    interp: &mut Interpreter,
    group: &Rc<GroupByValue>,
    name: &str,
    args: Args,
) -> Result<Value, ScriptError> {
    let groups = group.table.group_indices(&group.keys).map_err(table_error)?;
    interp.consume(group.table.height() as u64 / 8 + 1)?;
    match name {
        "size" => {
            let mut columns = key_columns(group, &groups);
            columns.push((
                "size".to_string(),
                ColumnData::Int(groups.iter().map(|(_, rows)| Some(rows.len() as i64)).collect()),
            ));
            Table::new(columns).map(Value::frame).map_err(table_error)
        }
        "agg" | "aggregate" => {
            let specs = agg_specs(group, &args)?;
            aggregate(interp, group, &groups, specs)
        }
        "transform" => transform(interp, group, &groups, args.require(0, "func", name)?),
        "apply" => apply_frames(interp, group, &groups, args.require(0, "func", name)?),
        "filter" => {
            let func = args.require(0, "func", name)?.clone();
            let mut keep = Vec::new();
            for (_, rows) in &groups {
                let subset = Value::frame(group.table.take(rows));
                if interp.call_value(&func, Args::of(vec![subset]))?.truthy()? {
                    keep.extend(rows.iter().copied());
                }
            }
            keep.sort_unstable();
            Ok(Value::frame(group.table.take(&keep)))
        }
        "head" => {
            let n = usize::try_from(args.int(0, "n", 5)?).unwrap_or(0);
            let mut keep: Vec<usize> = groups
                .iter()
                .flat_map(|(_, rows)| rows.iter().take(n).copied())
                .collect();
            keep.sort_unstable();
            Ok(Value::frame(group.table.take(&keep)))
        }
        reduction => {
            let func = match reduction {
                "std" | "var" => {
                    let ddof = u32::try_from(args.int(usize::MAX, "ddof", 1)?).unwrap_or(1);
                    AggFunc::Reduce(if reduction == "std" {
                        Reduction::Std(ddof)
                    } else {
                        Reduction::Var(ddof)
                    })
                }
                other => match Reduction::from_name(other) {
                    Some(reduction) => AggFunc::Reduce(reduction),
                    None => return Err(ScriptError::attribute_error("DataFrameGroupBy", other)),
                },
            };
            let specs = reduction_specs(group, func)?;
            aggregate(interp, group, &groups, specs)
        }
    }
}
