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

//! Owned column data bridging polars frames and row-level values.

use crate::error::Result;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use quarry_contracts::TabularPayload;
use serde_json::Value;
use std::cmp::Ordering;

const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        match self {
            Cell::Null => true,
            Cell::Float(v) => v.is_nan(),
            _ => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(v) => Some(*v as f64),
            Cell::Float(v) => Some(*v),
            Cell::Bool(v) => Some(f64::from(u8::from(*v))),
            _ => None,
        }
    }

    /// Null-last ordering used by sorting; `None` for incomparable kinds.
    pub fn compare(&self, other: &Cell) -> Option<Ordering> {
        match (self, other) {
            (Cell::Str(a), Cell::Str(b)) => Some(a.cmp(b)),
            (Cell::Date(a), Cell::Date(b)) => Some(a.cmp(b)),
            (Cell::DateTime(a), Cell::DateTime(b)) => Some(a.cmp(b)),
            (Cell::Date(a), Cell::DateTime(b)) => a.and_time(chrono::NaiveTime::MIN).partial_cmp(b),
            (Cell::DateTime(a), Cell::Date(b)) => a.partial_cmp(&b.and_time(chrono::NaiveTime::MIN)),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        }
    }

    pub fn to_json(&self, date_format: &str) -> Value {
        match self {
            Cell::Null => Value::Null,
            Cell::Int(v) => Value::from(*v),
            Cell::Float(v) => serde_json::Number::from_f64(*v).map_or(Value::Null, Value::Number),
            Cell::Bool(v) => Value::Bool(*v),
            Cell::Str(v) => Value::String(v.clone()),
            Cell::Date(v) => Value::String(v.format(date_format).to_string()),
            Cell::DateTime(v) => Value::String(v.format(date_format).to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Int(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    Bool(Vec<Option<bool>>),
    Str(Vec<Option<String>>),
    Date(Vec<Option<NaiveDate>>),
    DateTime(Vec<Option<NaiveDateTime>>),
}

fn days_to_date(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days.checked_add(UNIX_EPOCH_DAYS_FROM_CE)?)
}

fn date_to_days(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE
}

fn timestamp_to_datetime(value: i64, unit: TimeUnit) -> Option<NaiveDateTime> {
    let per_second: i64 = match unit {
        TimeUnit::Milliseconds => 1_000,
        TimeUnit::Microseconds => 1_000_000,
        TimeUnit::Nanoseconds => 1_000_000_000,
    };
    let nanos_per_tick = 1_000_000_000 / per_second;
    let secs = value.div_euclid(per_second);
    let nanos = u32::try_from(value.rem_euclid(per_second) * nanos_per_tick).ok()?;
    DateTime::from_timestamp(secs, nanos).map(|d| d.naive_utc())
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Int(v) => v.len(),
            ColumnData::Float(v) => v.len(),
            ColumnData::Bool(v) => v.len(),
            ColumnData::Str(v) => v.len(),
            ColumnData::Date(v) => v.len(),
            ColumnData::DateTime(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dtype names as the script side reports them.
    pub fn dtype_name(&self) -> &'static str {
        match self {
            ColumnData::Int(_) => "int64",
            ColumnData::Float(_) => "float64",
            ColumnData::Bool(_) => "bool",
            ColumnData::Str(_) => "object",
            ColumnData::Date(_) | ColumnData::DateTime(_) => "datetime64[ns]",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnData::Int(_) | ColumnData::Float(_) | ColumnData::Bool(_))
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, ColumnData::Date(_) | ColumnData::DateTime(_))
    }

    pub fn get(&self, index: usize) -> Cell {
        let cell = match self {
            ColumnData::Int(v) => v.get(index).copied().flatten().map(Cell::Int),
            ColumnData::Float(v) => v.get(index).copied().flatten().map(Cell::Float),
            ColumnData::Bool(v) => v.get(index).copied().flatten().map(Cell::Bool),
            ColumnData::Str(v) => v.get(index).cloned().flatten().map(Cell::Str),
            ColumnData::Date(v) => v.get(index).copied().flatten().map(Cell::Date),
            ColumnData::DateTime(v) => v.get(index).copied().flatten().map(Cell::DateTime),
        };
        cell.unwrap_or(Cell::Null)
    }

    pub fn cells(&self) -> Vec<Cell> {
        (0..self.len()).map(|i| self.get(i)).collect()
    }

    /// Infers the narrowest column type holding every cell; mixed kinds fall back to text.
    pub fn from_cells(cells: &[Cell]) -> ColumnData {
        let mut kinds = cells.iter().filter(|c| !matches!(c, Cell::Null));
        let first = kinds.next();
        let all = |pred: fn(&Cell) -> bool| {
            cells
                .iter()
                .all(|c| matches!(c, Cell::Null) || pred(c))
        };
        match first {
            Some(Cell::Bool(_)) if all(|c| matches!(c, Cell::Bool(_))) => ColumnData::Bool(
                cells
                    .iter()
                    .map(|c| match c {
                        Cell::Bool(v) => Some(*v),
                        _ => None,
                    })
                    .collect(),
            ),
            Some(Cell::Int(_)) if all(|c| matches!(c, Cell::Int(_))) => ColumnData::Int(
                cells
                    .iter()
                    .map(|c| match c {
                        Cell::Int(v) => Some(*v),
                        _ => None,
                    })
                    .collect(),
            ),
            Some(Cell::Int(_) | Cell::Float(_))
                if all(|c| matches!(c, Cell::Int(_) | Cell::Float(_))) =>
            {
                ColumnData::Float(cells.iter().map(Cell::as_f64).collect())
            }
            Some(Cell::Date(_)) if all(|c| matches!(c, Cell::Date(_))) => ColumnData::Date(
                cells
                    .iter()
                    .map(|c| match c {
                        Cell::Date(v) => Some(*v),
                        _ => None,
                    })
                    .collect(),
            ),
            Some(Cell::Date(_) | Cell::DateTime(_))
                if all(|c| matches!(c, Cell::Date(_) | Cell::DateTime(_))) =>
            {
                ColumnData::DateTime(
                    cells
                        .iter()
                        .map(|c| match c {
                            Cell::Date(v) => Some(v.and_time(chrono::NaiveTime::MIN)),
                            Cell::DateTime(v) => Some(*v),
                            _ => None,
                        })
                        .collect(),
                )
            }
            None => ColumnData::Float(vec![None; cells.len()]),
            _ => ColumnData::Str(
                cells
                    .iter()
                    .map(|c| match c {
                        Cell::Null => None,
                        Cell::Str(v) => Some(v.clone()),
                        Cell::Int(v) => Some(v.to_string()),
                        Cell::Float(v) => Some(v.to_string()),
                        Cell::Bool(v) => Some(if *v { "True" } else { "False" }.to_string()),
                        Cell::Date(v) => Some(v.to_string()),
                        Cell::DateTime(v) => Some(v.to_string()),
                    })
                    .collect(),
            ),
        }
    }

    pub fn take(&self, indices: &[usize]) -> ColumnData {
        fn pick<T: Clone>(values: &[Option<T>], indices: &[usize]) -> Vec<Option<T>> {
            indices
                .iter()
                .map(|&i| values.get(i).cloned().flatten())
                .collect()
        }
        match self {
            ColumnData::Int(v) => ColumnData::Int(pick(v, indices)),
            ColumnData::Float(v) => ColumnData::Float(pick(v, indices)),
            ColumnData::Bool(v) => ColumnData::Bool(pick(v, indices)),
            ColumnData::Str(v) => ColumnData::Str(pick(v, indices)),
            ColumnData::Date(v) => ColumnData::Date(pick(v, indices)),
            ColumnData::DateTime(v) => ColumnData::DateTime(pick(v, indices)),
        }
    }

    pub fn filter(&self, mask: &[bool]) -> ColumnData {
        let indices: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, keep)| keep.then_some(i))
            .collect();
        self.take(&indices)
    }

    pub fn from_series(series: &Series) -> Result<ColumnData> {
        let data = match series.dtype() {
            DataType::Boolean => ColumnData::Bool(series.bool()?.into_iter().collect()),
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64 => {
                let cast = series.cast(&DataType::Int64)?;
                ColumnData::Int(cast.i64()?.into_iter().collect())
            }
            DataType::Float32 | DataType::Float64 => {
                let cast = series.cast(&DataType::Float64)?;
                ColumnData::Float(cast.f64()?.into_iter().collect())
            }
            DataType::Date => {
                let cast = series.cast(&DataType::Int32)?;
                ColumnData::Date(
                    cast.i32()?
                        .into_iter()
                        .map(|days| days.and_then(days_to_date))
                        .collect(),
                )
            }
            DataType::Datetime(unit, _) => {
                let unit = *unit;
                let cast = series.cast(&DataType::Int64)?;
                ColumnData::DateTime(
                    cast.i64()?
                        .into_iter()
                        .map(|ts| ts.and_then(|v| timestamp_to_datetime(v, unit)))
                        .collect(),
                )
            }
            DataType::Null => ColumnData::Float(vec![None; series.len()]),
            _ => {
                let cast = series.cast(&DataType::String)?;
                ColumnData::Str(
                    cast.str()?
                        .into_iter()
                        .map(|v| v.map(str::to_string))
                        .collect(),
                )
            }
        };
        Ok(data)
    }

    pub fn to_series(&self, name: &str) -> Result<Series> {
        let series = match self {
            ColumnData::Int(v) => Series::new(name.into(), v.as_slice()),
            ColumnData::Float(v) => Series::new(name.into(), v.as_slice()),
            ColumnData::Bool(v) => Series::new(name.into(), v.as_slice()),
            ColumnData::Str(v) => Series::new(name.into(), v.as_slice()),
            ColumnData::Date(v) => {
                let days: Vec<Option<i32>> = v.iter().map(|d| d.map(date_to_days)).collect();
                Series::new(name.into(), days).cast(&DataType::Date)?
            }
            ColumnData::DateTime(v) => {
                let millis: Vec<Option<i64>> = v
                    .iter()
                    .map(|d| d.map(|dt| dt.and_utc().timestamp_millis()))
                    .collect();
                Series::new(name.into(), millis)
                    .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?
            }
        };
        Ok(series)
    }

    pub fn to_json_values(&self, date_format: &str) -> Vec<Value> {
        (0..self.len())
            .map(|i| self.get(i).to_json(date_format))
            .collect()
    }
}

pub fn frame_columns(df: &DataFrame) -> Result<Vec<(String, ColumnData)>> {
    df.get_columns()
        .iter()
        .map(|column| {
            let data = ColumnData::from_series(column.as_materialized_series())?;
            Ok((column.name().to_string(), data))
        })
        .collect()
}

pub fn build_frame(columns: &[(String, ColumnData)]) -> Result<DataFrame> {
    let columns = columns
        .iter()
        .map(|(name, data)| data.to_series(name).map(|s| s.into_column()))
        .collect::<Result<Vec<_>>>()?;
    Ok(DataFrame::new(columns)?)
}

/// Rows of plain JSON values; temporal cells become `date_format` strings, NaN becomes null.
pub fn frame_to_payload(df: &DataFrame, date_format: &str) -> Result<TabularPayload> {
    Ok(Table::from_frame(df)?.to_payload(date_format))
}

/// Hashable projection of a cell, used for grouping, joins and de-duplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyCell {
    Null,
    Int(i64),
    Float(u64),
    Bool(bool),
    Str(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl From<&Cell> for KeyCell {
    fn from(cell: &Cell) -> Self {
        match cell {
            Cell::Null => KeyCell::Null,
            Cell::Int(v) => KeyCell::Int(*v),
            Cell::Float(v) if v.is_nan() => KeyCell::Null,
            Cell::Float(v) if v.fract() == 0.0 && v.abs() < 9.0e15 => KeyCell::Int(*v as i64),
            Cell::Float(v) => KeyCell::Float(v.to_bits()),
            Cell::Bool(v) => KeyCell::Bool(*v),
            Cell::Str(v) => KeyCell::Str(v.clone()),
            Cell::Date(v) => KeyCell::Date(*v),
            Cell::DateTime(v) => KeyCell::DateTime(*v),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    #[error("{0}")]
    MissingColumn(String),
    #[error("Length of values ({actual}) does not match length of index ({expected})")]
    LengthMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinHow {
    Inner,
    Left,
}

/// Ordered named columns of equal length. Rows carry no index labels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<(String, ColumnData)>,
}

impl Table {
    pub fn new(columns: Vec<(String, ColumnData)>) -> std::result::Result<Self, TableError> {
        let mut table = Table::default();
        for (name, data) in columns {
            table.set_column(&name, data)?;
        }
        Ok(table)
    }

    pub fn from_frame(df: &DataFrame) -> Result<Self> {
        Ok(Self {
            columns: frame_columns(df)?,
        })
    }

    pub fn to_frame(&self) -> Result<DataFrame> {
        build_frame(&self.columns)
    }

    pub fn to_payload(&self, date_format: &str) -> TabularPayload {
        let rows = (0..self.height())
            .map(|row| {
                self.columns
                    .iter()
                    .map(|(_, data)| data.get(row).to_json(date_format))
                    .collect()
            })
            .collect();
        TabularPayload {
            columns: self.column_names(),
            rows,
        }
    }

    pub fn height(&self) -> usize {
        self.columns.first().map_or(0, |(_, data)| data.len())
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[(String, ColumnData)] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnData> {
        self.columns
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, data)| data)
    }

    pub fn require(&self, name: &str) -> std::result::Result<&ColumnData, TableError> {
        self.column(name)
            .ok_or_else(|| TableError::MissingColumn(name.to_string()))
    }

    /// Replaces a column in place or appends it.
    pub fn set_column(&mut self, name: &str, data: ColumnData) -> std::result::Result<(), TableError> {
        if !self.columns.is_empty() && data.len() != self.height() {
            return Err(TableError::LengthMismatch {
                expected: self.height(),
                actual: data.len(),
            });
        }
        match self.columns.iter_mut().find(|(existing, _)| existing == name) {
            Some((_, slot)) => *slot = data,
            None => self.columns.push((name.to_string(), data)),
        }
        Ok(())
    }

    pub fn rename_columns(&mut self, names: &[String]) -> std::result::Result<(), TableError> {
        if names.len() != self.columns.len() {
            return Err(TableError::LengthMismatch {
                expected: self.columns.len(),
                actual: names.len(),
            });
        }
        for ((name, _), new_name) in self.columns.iter_mut().zip(names) {
            name.clone_from(new_name);
        }
        Ok(())
    }

    pub fn rename(&self, mapping: &[(String, String)]) -> Table {
        let columns = self
            .columns
            .iter()
            .map(|(name, data)| {
                let renamed = mapping
                    .iter()
                    .find(|(from, _)| from == name)
                    .map_or_else(|| name.clone(), |(_, to)| to.clone());
                (renamed, data.clone())
            })
            .collect();
        Table { columns }
    }

    pub fn select(&self, names: &[String]) -> std::result::Result<Table, TableError> {
        let columns = names
            .iter()
            .map(|name| Ok((name.clone(), self.require(name)?.clone())))
            .collect::<std::result::Result<Vec<_>, TableError>>()?;
        Ok(Table { columns })
    }

    pub fn drop(&self, names: &[String]) -> std::result::Result<Table, TableError> {
        if let Some(missing) = names.iter().find(|name| self.column(name).is_none()) {
            return Err(TableError::MissingColumn(missing.clone()));
        }
        let columns = self
            .columns
            .iter()
            .filter(|(name, _)| !names.contains(name))
            .cloned()
            .collect();
        Ok(Table { columns })
    }

    pub fn take(&self, indices: &[usize]) -> Table {
        let columns = self
            .columns
            .iter()
            .map(|(name, data)| (name.clone(), data.take(indices)))
            .collect();
        Table { columns }
    }

    pub fn filter(&self, mask: &[bool]) -> Table {
        let indices: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, keep)| keep.then_some(i))
            .collect();
        self.take(&indices)
    }

    pub fn head(&self, n: usize) -> Table {
        let indices: Vec<usize> = (0..self.height().min(n)).collect();
        self.take(&indices)
    }

    pub fn tail(&self, n: usize) -> Table {
        let height = self.height();
        let indices: Vec<usize> = (height.saturating_sub(n)..height).collect();
        self.take(&indices)
    }

    pub fn row(&self, index: usize) -> Vec<(String, Cell)> {
        self.columns
            .iter()
            .map(|(name, data)| (name.clone(), data.get(index)))
            .collect()
    }

    fn key_of(&self, keys: &[&ColumnData], row: usize) -> Vec<Cell> {
        keys.iter().map(|data| data.get(row)).collect()
    }

    /// Stable multi-key sort; nulls go last whatever the direction.
    pub fn sort_by(&self, keys: &[(String, bool)]) -> std::result::Result<Table, TableError> {
        let columns = keys
            .iter()
            .map(|(name, _)| self.require(name))
            .collect::<std::result::Result<Vec<_>, TableError>>()?;
        let mut indices: Vec<usize> = (0..self.height()).collect();
        indices.sort_by(|&a, &b| {
            for (data, (_, ascending)) in columns.iter().zip(keys) {
                let (left, right) = (data.get(a), data.get(b));
                let ordering = match (left.is_null(), right.is_null()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) => {
                        let ord = left.compare(&right).unwrap_or(Ordering::Equal);
                        if *ascending {
                            ord
                        } else {
                            ord.reverse()
                        }
                    }
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
        Ok(self.take(&indices))
    }

    /// Row indices per group, groups ordered by key; rows with a null key are dropped.
    pub fn group_indices(
        &self,
        keys: &[String],
    ) -> std::result::Result<Vec<(Vec<Cell>, Vec<usize>)>, TableError> {
        let columns = keys
            .iter()
            .map(|name| self.require(name))
            .collect::<std::result::Result<Vec<_>, TableError>>()?;
        let mut groups: indexmap::IndexMap<Vec<KeyCell>, (Vec<Cell>, Vec<usize>)> =
            indexmap::IndexMap::new();
        for row in 0..self.height() {
            let key = self.key_of(&columns, row);
            if key.iter().any(Cell::is_null) {
                continue;
            }
            let hashable = key.iter().map(KeyCell::from).collect();
            groups
                .entry(hashable)
                .or_insert_with(|| (key, Vec::new()))
                .1
                .push(row);
        }
        let mut groups: Vec<(Vec<Cell>, Vec<usize>)> = groups.into_values().collect();
        groups.sort_by(|(a, _), (b, _)| {
            a.iter()
                .zip(b)
                .map(|(x, y)| x.compare(y).unwrap_or(Ordering::Equal))
                .find(|ord| *ord != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
        Ok(groups)
    }

    pub fn drop_duplicates(&self, subset: Option<&[String]>) -> std::result::Result<Table, TableError> {
        let names = subset.map_or_else(|| self.column_names(), <[String]>::to_vec);
        let columns = names
            .iter()
            .map(|name| self.require(name))
            .collect::<std::result::Result<Vec<_>, TableError>>()?;
        let mut seen = std::collections::HashSet::new();
        let indices: Vec<usize> = (0..self.height())
            .filter(|&row| {
                let key: Vec<KeyCell> = self.key_of(&columns, row).iter().map(KeyCell::from).collect();
                seen.insert(key)
            })
            .collect();
        Ok(self.take(&indices))
    }

    /// Stacks tables by column name; columns missing from a part are filled with nulls.
    pub fn concat(parts: &[Table]) -> Table {
        let mut names: Vec<String> = Vec::new();
        for part in parts {
            for name in part.column_names() {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        let columns = names
            .into_iter()
            .map(|name| {
                let cells: Vec<Cell> = parts
                    .iter()
                    .flat_map(|part| match part.column(&name) {
                        Some(data) => data.cells(),
                        None => vec![Cell::Null; part.height()],
                    })
                    .collect();
                (name, ColumnData::from_cells(&cells))
            })
            .collect();
        Table { columns }
    }

    /// Hash join on equally named key columns. Clashing value columns get `_x`/`_y` suffixes.
    pub fn join(&self, other: &Table, on: &[String], how: JoinHow) -> std::result::Result<Table, TableError> {
        let left_keys = on
            .iter()
            .map(|name| self.require(name))
            .collect::<std::result::Result<Vec<_>, TableError>>()?;
        let right_keys = on
            .iter()
            .map(|name| other.require(name))
            .collect::<std::result::Result<Vec<_>, TableError>>()?;

        let mut index: std::collections::HashMap<Vec<KeyCell>, Vec<usize>> =
            std::collections::HashMap::new();
        for row in 0..other.height() {
            let key = other.key_of(&right_keys, row);
            if key.iter().any(Cell::is_null) {
                continue;
            }
            index
                .entry(key.iter().map(KeyCell::from).collect())
                .or_default()
                .push(row);
        }

        let mut left_rows = Vec::new();
        let mut right_rows: Vec<Option<usize>> = Vec::new();
        for row in 0..self.height() {
            let key: Vec<KeyCell> = self.key_of(&left_keys, row).iter().map(KeyCell::from).collect();
            match index.get(&key) {
                Some(matches) => {
                    for &other_row in matches {
                        left_rows.push(row);
                        right_rows.push(Some(other_row));
                    }
                }
                None if how == JoinHow::Left => {
                    left_rows.push(row);
                    right_rows.push(None);
                }
                None => {}
            }
        }

        let mut columns = Vec::new();
        for (name, data) in &self.columns {
            let clashes = !on.contains(name) && other.column(name).is_some();
            let label = if clashes { format!("{name}_x") } else { name.clone() };
            columns.push((label, data.take(&left_rows)));
        }
        for (name, data) in &other.columns {
            if on.contains(name) {
                continue;
            }
            let label = if self.column(name).is_some() {
                format!("{name}_y")
            } else {
                name.clone()
            };
            let cells: Vec<Cell> = right_rows
                .iter()
                .map(|row| row.map_or(Cell::Null, |r| data.get(r)))
                .collect();
            let joined = if right_rows.iter().all(Option::is_some) {
                let picked: Vec<usize> = right_rows.iter().flatten().copied().collect();
                data.take(&picked)
            } else {
                ColumnData::from_cells(&cells)
            };
            columns.push((label, joined));
        }
        Ok(Table { columns })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn temporal_columns_survive_a_polars_round_trip() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        let stamp = date.and_hms_opt(13, 45, 0).unwrap();
        let columns = vec![
            ("day".to_string(), ColumnData::Date(vec![Some(date), None])),
            ("at".to_string(), ColumnData::DateTime(vec![Some(stamp), None])),
        ];
        let df = build_frame(&columns).unwrap();
        assert_eq!(df.column("day").unwrap().dtype(), &DataType::Date);
        assert_eq!(frame_columns(&df).unwrap(), columns);
    }

    #[test]
    fn payload_uses_plain_values() {
        let df = df!(
            "region" => ["East", "West"],
            "units" => [3i32, 4],
            "revenue" => [10.5f64, f64::NAN],
        )
        .unwrap();
        let payload = frame_to_payload(&df, "%Y-%m-%d").unwrap();
        assert_eq!(payload.columns, vec!["region", "units", "revenue"]);
        assert_eq!(payload.rows[0], vec![json!("East"), json!(3), json!(10.5)]);
        assert_eq!(payload.rows[1][2], Value::Null);
    }

    #[test]
    fn inference_promotes_and_falls_back() {
        let mixed = ColumnData::from_cells(&[Cell::Int(1), Cell::Float(2.5), Cell::Null]);
        assert_eq!(mixed, ColumnData::Float(vec![Some(1.0), Some(2.5), None]));
        let text = ColumnData::from_cells(&[Cell::Int(1), Cell::Str("a".into())]);
        assert_eq!(text.dtype_name(), "object");
    }

    #[test]
    fn filter_and_take_select_rows() {
        let data = ColumnData::Int(vec![Some(1), Some(2), Some(3)]);
        assert_eq!(data.filter(&[true, false, true]), ColumnData::Int(vec![Some(1), Some(3)]));
        assert_eq!(data.take(&[2, 0]).get(0), Cell::Int(3));
    }

    fn sales() -> Table {
        Table::new(vec![
            (
                "region".to_string(),
                ColumnData::Str(vec![Some("West".into()), Some("East".into()), Some("West".into()), None]),
            ),
            ("units".to_string(), ColumnData::Int(vec![Some(5), Some(2), Some(7), Some(1)])),
        ])
        .unwrap()
    }

    #[test]
    fn groups_are_sorted_and_skip_null_keys() {
        let groups = sales().group_indices(&["region".to_string()]).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, vec![Cell::Str("East".into())]);
        assert_eq!(groups[1].1, vec![0, 2]);
    }

    #[test]
    fn sort_puts_nulls_last() {
        let sorted = sales().sort_by(&[("region".to_string(), false)]).unwrap();
        let regions = sorted.column("region").unwrap();
        assert_eq!(regions.get(0), Cell::Str("West".into()));
        assert_eq!(regions.get(3), Cell::Null);
    }

    #[test]
    fn left_join_fills_missing_rows() {
        let targets = Table::new(vec![
            ("region".to_string(), ColumnData::Str(vec![Some("West".into())])),
            ("target".to_string(), ColumnData::Int(vec![Some(10)])),
        ])
        .unwrap();
        let joined = sales()
            .join(&targets, &["region".to_string()], JoinHow::Left)
            .unwrap();
        assert_eq!(joined.height(), 4);
        assert_eq!(joined.column("target").unwrap().get(1), Cell::Null);
        assert_eq!(joined.column("target").unwrap().get(2), Cell::Int(10));
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let mut table = sales();
        let err = table
            .set_column("bad", ColumnData::Int(vec![Some(1)]))
            .unwrap_err();
        assert_eq!(err, TableError::LengthMismatch { expected: 4, actual: 1 });
    }
}
