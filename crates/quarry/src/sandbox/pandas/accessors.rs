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

use super::{mask_of, names_arg, row_dict, sequence_cells, table_error};
use crate::sandbox::args::Args;
use crate::sandbox::dates::chrono_format;
use crate::sandbox::error::ScriptError;
use crate::sandbox::format::repr;
use crate::sandbox::interpreter::{normalize_index, Interpreter};
use crate::sandbox::value::{Accessor, AccessorKind, SliceValue, Value};
use crate::tabular::{Cell, ColumnData, Table};
use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Timelike};
use regex::RegexBuilder;
use std::rc::Rc;

const STR_METHODS: &[&str] = &[
    "capitalize", "contains", "endswith", "extract", "get", "isalpha", "isdigit", "isnumeric",
    "len", "lower", "lstrip", "replace", "rstrip", "slice", "split", "startswith", "strip",
    "title", "upper", "zfill",
];

const DT_METHODS: &[&str] = &["day_name", "floor", "month_name", "normalize", "strftime", "to_period"];

const DT_FIELDS: &[&str] = &[
    "date", "day", "day_of_week", "day_of_year", "dayofweek", "dayofyear", "hour", "minute",
    "month", "quarter", "second", "weekday", "year",
];

fn target_series(accessor: &Accessor) -> Result<(Option<String>, ColumnData), ScriptError> {
    match &accessor.target {
        Value::Series(series) => Ok((series.name.clone(), series.data.clone())),
        other => Err(ScriptError::type_error(format!(
            "accessor bound to '{}' instead of a Series",
            other.type_name()
        ))),
    }
}

fn as_datetime(cell: &Cell) -> Option<NaiveDateTime> {
    match cell {
        Cell::DateTime(at) => Some(*at),
        Cell::Date(day) => Some(day.and_time(NaiveTime::MIN)),
        _ => None,
    }
}

fn dt_field(at: NaiveDateTime, field: &str) -> Cell {
    let number = |v: u32| Cell::Int(i64::from(v));
    match field {
        "year" => Cell::Int(i64::from(at.year())),
        "month" => number(at.month()),
        "day" => number(at.day()),
        "hour" => number(at.hour()),
        "minute" => number(at.minute()),
        "second" => number(at.second()),
        "quarter" => number((at.month() - 1) / 3 + 1),
        "dayofyear" | "day_of_year" => number(at.ordinal()),
        "date" => Cell::Date(at.date()),
        _ => number(at.weekday().num_days_from_monday()),
    }
}

fn map_cells(data: &ColumnData, f: impl Fn(&Cell) -> Result<Cell, ScriptError>) -> Result<ColumnData, ScriptError> {
    let cells = data
        .cells()
        .iter()
        .map(|cell| if cell.is_null() { Ok(Cell::Null) } else { f(cell) })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ColumnData::from_cells(&cells))
}

pub(super) fn attribute(
    _interp: &mut Interpreter,
    accessor: &Rc<Accessor>,
    value: &Value,
    attr: &str,
) -> Result<Option<Value>, ScriptError> {
    match accessor.kind {
        AccessorKind::Str if STR_METHODS.contains(&attr) => Ok(Some(Value::method(value.clone(), attr))),
        AccessorKind::Dt if DT_METHODS.contains(&attr) => Ok(Some(Value::method(value.clone(), attr))),
        AccessorKind::Dt if DT_FIELDS.contains(&attr) => {
            let (name, data) = target_series(accessor)?;
            let fields = map_cells(&data, |cell| {
                as_datetime(cell).map(|at| dt_field(at, attr)).ok_or_else(|| {
                    ScriptError::new("AttributeError", "Can only use .dt accessor with datetimelike values")
                })
            })?;
            Ok(Some(Value::series(name, fields)))
        }
        _ => Ok(None),
    }
}

fn text_of(cell: &Cell) -> Result<&str, ScriptError> {
    match cell {
        Cell::Str(text) => Ok(text),
        _ => Err(ScriptError::new(
            "AttributeError",
            "Can only use .str accessor with string values!",
        )),
    }
}

fn char_slice(text: &str, slice: &SliceValue) -> Result<String, ScriptError> {
    let chars: Vec<char> = text.chars().collect();
    Ok(slice.indices(chars.len())?.into_iter().map(|i| chars[i]).collect())
}

fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut boundary = true;
    for c in text.chars() {
        if c.is_alphabetic() {
            if boundary {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            boundary = false;
        } else {
            out.push(c);
            boundary = true;
        }
    }
    out
}

fn str_call(
    name: Option<String>,
    data: &ColumnData,
    method: &str,
    args: &Args,
) -> Result<Value, ScriptError> {
    let series = |data: ColumnData| Value::series(name.clone(), data);
    let text_map = |f: &dyn Fn(&str) -> String| {
        map_cells(data, |cell| Ok(Cell::Str(f(text_of(cell)?))))
    };
    let pattern_arg = |index: usize, key: &str| -> Result<String, ScriptError> {
        args.text(index, key)?.ok_or_else(|| {
            ScriptError::type_error(format!("str.{method}() missing required argument: '{key}'"))
        })
    };
    let value = match method {
        "lower" => series(text_map(&|s| s.to_lowercase())?),
        "upper" => series(text_map(&|s| s.to_uppercase())?),
        "title" => series(text_map(&title_case)?),
        "capitalize" => series(text_map(&|s| {
            let mut chars = s.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })?),
        "strip" | "lstrip" | "rstrip" => {
            let chars: Option<Vec<char>> = args.text(0, "to_strip")?.map(|s| s.chars().collect());
            let strip = |s: &str| -> String {
                let matcher = |c: char| match &chars {
                    Some(set) => set.contains(&c),
                    None => c.is_whitespace(),
                };
                match method {
                    "lstrip" => s.trim_start_matches(matcher).to_string(),
                    "rstrip" => s.trim_end_matches(matcher).to_string(),
                    _ => s.trim_matches(matcher).to_string(),
                }
            };
            series(text_map(&strip)?)
        }
        "zfill" => {
            let width = usize::try_from(args.int(0, "width", 0)?).unwrap_or(0);
            series(text_map(&|s| {
                let len = s.chars().count();
                if len >= width {
                    return s.to_string();
                }
                let (sign, digits) = match s.strip_prefix(['-', '+']) {
                    Some(rest) => (&s[..1], rest),
                    None => ("", s),
                };
                format!("{sign}{}{digits}", "0".repeat(width - len))
            })?)
        }
        "len" => series(map_cells(data, |cell| Ok(Cell::Int(text_of(cell)?.chars().count() as i64)))?),
        "isdigit" | "isnumeric" => series(map_cells(data, |cell| {
            let text = text_of(cell)?;
            Ok(Cell::Bool(!text.is_empty() && text.chars().all(|c| c.is_ascii_digit())))
        })?),
        "isalpha" => series(map_cells(data, |cell| {
            let text = text_of(cell)?;
            Ok(Cell::Bool(!text.is_empty() && text.chars().all(char::is_alphabetic)))
        })?),
        "startswith" | "endswith" => {
            let prefix = pattern_arg(0, "pat")?;
            series(map_cells(data, |cell| {
                let text = text_of(cell)?;
                Ok(Cell::Bool(if method == "startswith" {
                    text.starts_with(prefix.as_str())
                } else {
                    text.ends_with(prefix.as_str())
                }))
            })?)
        }
        "contains" => {
            let pattern = pattern_arg(0, "pat")?;
            let case = args.flag(1, "case", true)?;
            let na = args.opt(3, "na").and_then(Value::to_cell);
            let use_regex = args.flag(4, "regex", true)?;
            let matcher = RegexBuilder::new(&if use_regex { pattern.clone() } else { regex::escape(&pattern) })
                .case_insensitive(!case)
                .build()
                .map_err(|err| ScriptError::new("re.error", err.to_string()))?;
            let cells = data
                .cells()
                .iter()
                .map(|cell| match cell {
                    Cell::Str(text) => Ok(Cell::Bool(matcher.is_match(text))),
                    Cell::Null => Ok(na.clone().unwrap_or(Cell::Null)),
                    other => text_of(other).map(|_| Cell::Null),
                })
                .collect::<Result<Vec<_>, _>>()?;
            series(ColumnData::from_cells(&cells))
        }
        "replace" => {
            let pattern = pattern_arg(0, "pat")?;
            let replacement = pattern_arg(1, "repl")?;
            let case = args.flag(3, "case", true)?;
            let use_regex = args.flag(usize::MAX, "regex", false)?;
            if use_regex || !case {
                let source = if use_regex { pattern } else { regex::escape(&pattern) };
                let matcher = RegexBuilder::new(&source)
                    .case_insensitive(!case)
                    .build()
                    .map_err(|err| ScriptError::new("re.error", err.to_string()))?;
                let template = replacement.replace('\\', "$");
                series(text_map(&|s| matcher.replace_all(s, template.as_str()).into_owned())?)
            } else {
                series(text_map(&|s| s.replace(pattern.as_str(), &replacement))?)
            }
        }
        "extract" => {
            let pattern = pattern_arg(0, "pat")?;
            let matcher = RegexBuilder::new(&pattern)
                .build()
                .map_err(|err| ScriptError::new("re.error", err.to_string()))?;
            if matcher.captures_len() < 2 {
                return Err(ScriptError::value_error("pattern contains no capture groups"));
            }
            series(map_cells(data, |cell| {
                let text = text_of(cell)?;
                Ok(matcher
                    .captures(text)
                    .and_then(|caps| caps.get(1))
                    .map_or(Cell::Null, |m| Cell::Str(m.as_str().to_string())))
            })?)
        }
        "slice" => {
            let bounds = SliceValue {
                lower: args.opt(0, "start").and_then(Value::as_i64),
                upper: args.opt(1, "stop").and_then(Value::as_i64),
                step: args.opt(2, "step").and_then(Value::as_i64),
            };
            series(map_cells(data, |cell| char_slice(text_of(cell)?, &bounds).map(Cell::Str))?)
        }
        "get" => {
            let position = args.int(0, "i", 0)?;
            series(map_cells(data, |cell| {
                let chars: Vec<char> = text_of(cell)?.chars().collect();
                Ok(normalize_index(position, chars.len(), "string")
                    .map_or(Cell::Null, |i| Cell::Str(chars[i].to_string())))
            })?)
        }
        "split" => {
            if !args.flag(2, "expand", false)? {
                return Err(ScriptError::not_supported(
                    "str.split without expand=True is not supported; use expand=True or str.extract",
                ));
            }
            let separator = args.text(0, "pat")?;
            let limit = args.opt(1, "n").and_then(Value::as_i64).filter(|n| *n > 0);
            let pieces: Vec<Option<Vec<String>>> = data
                .cells()
                .iter()
                .map(|cell| match cell {
                    Cell::Null => Ok(None),
                    other => {
                        let text = text_of(other)?;
                        let parts: Vec<String> = match (&separator, limit) {
                            (Some(sep), Some(n)) => text.splitn(n as usize + 1, sep.as_str()).map(str::to_string).collect(),
                            (Some(sep), None) => text.split(sep.as_str()).map(str::to_string).collect(),
                            (None, _) => text.split_whitespace().map(str::to_string).collect(),
                        };
                        Ok(Some(parts))
                    }
                })
                .collect::<Result<_, ScriptError>>()?;
            let width = pieces.iter().flatten().map(Vec::len).max().unwrap_or(0);
            let columns = (0..width)
                .map(|i| {
                    let column = pieces
                        .iter()
                        .map(|parts| parts.as_ref().and_then(|p| p.get(i).cloned()))
                        .collect();
                    (i.to_string(), ColumnData::Str(column))
                })
                .collect();
            return Table::new(columns).map(Value::frame).map_err(table_error);
        }
        other => return Err(ScriptError::attribute_error("StringMethods", other)),
    };
    Ok(value)
}

fn period_label(at: NaiveDateTime, freq: &str) -> Result<String, ScriptError> {
    let label = match freq {
        "M" | "ME" | "MS" => at.format("%Y-%m").to_string(),
        "Q" | "QE" => format!("{}Q{}", at.year(), (at.month() - 1) / 3 + 1),
        "Y" | "A" | "YE" => at.year().to_string(),
        "D" => at.format("%Y-%m-%d").to_string(),
        "W" => {
            let start = at.date() - Duration::days(i64::from(at.weekday().num_days_from_monday()));
            let end = start + Duration::days(6);
            format!("{}/{}", start.format("%Y-%m-%d"), end.format("%Y-%m-%d"))
        }
        other => {
            return Err(ScriptError::value_error(format!(
                "Invalid frequency: {other}"
            )))
        }
    };
    Ok(label)
}

fn dt_call(
    name: Option<String>,
    data: &ColumnData,
    method: &str,
    args: &Args,
) -> Result<Value, ScriptError> {
    let temporal = |cell: &Cell| {
        as_datetime(cell).ok_or_else(|| {
            ScriptError::new("AttributeError", "Can only use .dt accessor with datetimelike values")
        })
    };
    let mapped = match method {
        "strftime" => {
            let format = args.text(0, "date_format")?.ok_or_else(|| {
                ScriptError::type_error("strftime() missing required argument: 'date_format'")
            })?;
            let format = chrono_format(&format);
            map_cells(data, |cell| Ok(Cell::Str(temporal(cell)?.format(&format).to_string())))?
        }
        "to_period" => {
            let freq = args.text(0, "freq")?.unwrap_or_else(|| "M".to_string());
            map_cells(data, |cell| period_label(temporal(cell)?, &freq).map(Cell::Str))?
        }
        "normalize" | "floor" => {
            map_cells(data, |cell| Ok(Cell::DateTime(temporal(cell)?.date().and_time(NaiveTime::MIN))))?
        }
        "day_name" => map_cells(data, |cell| Ok(Cell::Str(temporal(cell)?.format("%A").to_string())))?,
        "month_name" => map_cells(data, |cell| Ok(Cell::Str(temporal(cell)?.format("%B").to_string())))?,
        other => return Err(ScriptError::attribute_error("DatetimeProperties", other)),
    };
    Ok(Value::series(name, mapped))
}

pub(super) fn call(
    interp: &mut Interpreter,
    accessor: &Rc<Accessor>,
    name: &str,
    args: Args,
) -> Result<Value, ScriptError> {
    let (series_name, data) = target_series(accessor)?;
    interp.consume(data.len() as u64 / 8 + 1)?;
    if accessor.kind == AccessorKind::Str && name == "zfill" {
        let width = u64::try_from(args.int(0, "width", 0)?).unwrap_or(0);
        interp.reserve(width.saturating_mul(data.len() as u64))?;
    }
    match accessor.kind {
        AccessorKind::Str => str_call(series_name, &data, name, &args),
        AccessorKind::Dt => dt_call(series_name, &data, name, &args),
        AccessorKind::Loc | AccessorKind::Iloc => {
            Err(ScriptError::type_error("'_LocIndexer' object is not callable"))
        }
    }
}

enum Rows {
    One(usize),
    Many(Vec<usize>),
}

enum Columns {
    One(String),
    Many(Vec<String>),
}

fn select_rows(kind: AccessorKind, index: &Value, height: usize) -> Result<Rows, ScriptError> {
    if let Some(mask) = mask_of(index, height)? {
        return Ok(Rows::Many(
            mask.iter().enumerate().filter(|(_, keep)| **keep).map(|(i, _)| i).collect(),
        ));
    }
    let position = |i: i64| match kind {
        AccessorKind::Loc => usize::try_from(i)
            .ok()
            .filter(|p| *p < height)
            .ok_or_else(|| ScriptError::key_error(&i.to_string())),
        _ => normalize_index(i, height, "single positional indexer"),
    };
    match index {
        Value::Int(i) => position(*i).map(Rows::One),
        Value::Slice(slice) => {
            let mut bounds = SliceValue::clone(slice);
            // Label slices include their upper bound.
            if kind == AccessorKind::Loc {
                bounds.upper = bounds.upper.map(|u| u + 1);
            }
            Ok(Rows::Many(bounds.indices(height)?))
        }
        Value::List(items) => items
            .borrow()
            .iter()
            .map(|item| {
                item.as_i64()
                    .ok_or_else(|| ScriptError::new("KeyError", repr(item)))
                    .and_then(position)
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Rows::Many),
        other => Err(ScriptError::new("KeyError", repr(other))),
    }
}

fn select_columns(kind: AccessorKind, index: &Value, table: &Table) -> Result<Columns, ScriptError> {
    let names = table.column_names();
    let by_position = |i: i64| {
        normalize_index(i, names.len(), "single positional indexer").map(|p| names[p].clone())
    };
    let checked = |name: &str| {
        table
            .column(name)
            .map(|_| name.to_string())
            .ok_or_else(|| ScriptError::key_error(name))
    };
    match (kind, index) {
        (_, Value::Slice(slice)) => Ok(Columns::Many(
            slice.indices(names.len())?.into_iter().map(|i| names[i].clone()).collect(),
        )),
        (AccessorKind::Iloc, Value::Int(i)) => by_position(*i).map(Columns::One),
        (AccessorKind::Loc, Value::Str(name)) => checked(name).map(Columns::One),
        (_, Value::List(items)) => items
            .borrow()
            .iter()
            .map(|item| match (kind, item) {
                (AccessorKind::Iloc, Value::Int(i)) => by_position(*i),
                (AccessorKind::Loc, Value::Str(name)) => checked(name),
                (_, other) => Err(ScriptError::new("KeyError", repr(other))),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Columns::Many),
        (_, other) => Err(ScriptError::new("KeyError", repr(other))),
    }
}

fn frame_item(kind: AccessorKind, table: &Table, index: &Value) -> Result<Value, ScriptError> {
    let (row_index, column_index) = match index {
        Value::Tuple(pair) if pair.len() == 2 => (&pair[0], Some(&pair[1])),
        other => (other, None),
    };
    let rows = select_rows(kind, row_index, table.height())?;
    let columns = match column_index {
        Some(columns) => select_columns(kind, columns, table)?,
        None => Columns::Many(table.column_names()),
    };
    let value = match (rows, columns) {
        (Rows::One(row), Columns::One(name)) => {
            Value::from_cell(table.require(&name).map_err(table_error)?.get(row))
        }
        (Rows::One(row), Columns::Many(names)) => {
            row_dict(&table.select(&names).map_err(table_error)?, row)
        }
        (Rows::Many(rows), Columns::One(name)) => {
            let data = table.require(&name).map_err(table_error)?;
            Value::series(Some(name), data.take(&rows))
        }
        (Rows::Many(rows), Columns::Many(names)) => {
            Value::frame(table.select(&names).map_err(table_error)?.take(&rows))
        }
    };
    Ok(value)
}

pub(super) fn get_item(
    interp: &mut Interpreter,
    accessor: &Rc<Accessor>,
    index: &Value,
) -> Result<Value, ScriptError> {
    match (&accessor.target, accessor.kind) {
        (Value::Frame(table), kind) => {
            let table = table.borrow();
            interp.consume(table.height() as u64 / 16)?;
            frame_item(kind, &table, index)
        }
        (Value::Series(series), AccessorKind::Loc | AccessorKind::Iloc) => {
            match select_rows(accessor.kind, index, series.len())? {
                Rows::One(row) => Ok(Value::from_cell(series.data.get(row))),
                Rows::Many(rows) => Ok(Value::series(series.name.clone(), series.data.take(&rows))),
            }
        }
        (Value::Series(series), AccessorKind::Str) => {
            let data = match index {
                Value::Slice(slice) => {
                    map_cells(&series.data, |cell| char_slice(text_of(cell)?, slice).map(Cell::Str))?
                }
                other => {
                    let position = other.as_i64().ok_or_else(|| {
                        ScriptError::type_error("string indices must be integers")
                    })?;
                    map_cells(&series.data, |cell| {
                        let chars: Vec<char> = text_of(cell)?.chars().collect();
                        Ok(normalize_index(position, chars.len(), "string")
                            .map_or(Cell::Null, |i| Cell::Str(chars[i].to_string())))
                    })?
                }
            };
            Ok(Value::series(series.name.clone(), data))
        }
        (other, _) => Err(ScriptError::type_error(format!(
            "'{}' accessor is not subscriptable",
            other.type_name()
        ))),
    }
}

/// `df.loc[rows, 'col'] = value`; a missing column is created and filled with nulls elsewhere.
pub(super) fn loc_set(
    interp: &mut Interpreter,
    accessor: &Rc<Accessor>,
    index: &Value,
    value: Value,
) -> Result<(), ScriptError> {
    let Value::Frame(frame) = &accessor.target else {
        return Err(ScriptError::type_error("only DataFrame.loc supports assignment"));
    };
    let (row_index, column) = match index {
        Value::Tuple(pair) if pair.len() == 2 => (pair[0].clone(), pair[1].clone()),
        _ => {
            return Err(ScriptError::not_supported(
                "loc assignment needs both a row selector and a column label",
            ))
        }
    };
    let names = match &column {
        Value::Str(name) => vec![name.clone()],
        other => names_arg(other)?,
    };
    let mut table = frame.borrow().clone();
    interp.consume(table.height() as u64 / 8 + 1)?;
    let rows = match select_rows(AccessorKind::Loc, &row_index, table.height())? {
        Rows::One(row) => vec![row],
        Rows::Many(rows) => rows,
    };
    let incoming: Vec<Cell> = match sequence_cells(&value)? {
        Some(cells) if cells.len() == table.height() && cells.len() != rows.len() => {
            rows.iter().map(|row| cells[*row].clone()).collect()
        }
        Some(cells) if cells.len() == rows.len() => cells,
        Some(cells) => {
            return Err(ScriptError::value_error(format!(
                "Must have equal len keys and value when setting with an iterable ({} != {})",
                cells.len(),
                rows.len()
            )))
        }
        None => {
            let cell = value.to_cell().ok_or_else(|| {
                ScriptError::type_error(format!("cannot store '{}' in a column", value.type_name()))
            })?;
            vec![cell; rows.len()]
        }
    };
    for name in names {
        let mut cells = match table.column(&name) {
            Some(data) => data.cells(),
            None => vec![Cell::Null; table.height()],
        };
        for (row, cell) in rows.iter().zip(&incoming) {
            cells[*row] = cell.clone();
        }
        table
            .set_column(&name, ColumnData::from_cells(&cells))
            .map_err(table_error)?;
    }
    *frame.borrow_mut() = table;
    Ok(())
}
