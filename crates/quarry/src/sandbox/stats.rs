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

//! Column reductions shared by Series, GroupBy and numpy helpers. Nulls are skipped.

use crate::sandbox::error::ScriptError;
use crate::sandbox::format::cell_display;
use crate::sandbox::value::Value;
use crate::tabular::{Cell, ColumnData, KeyCell};
use std::cmp::Ordering;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reduction {
    Sum,
    Prod,
    Mean,
    Median,
    Min,
    Max,
    Std(u32),
    Var(u32),
    Count,
    Nunique,
    First,
    Last,
    Quantile(f64),
}

impl Reduction {
    /// Aggregation names accepted by `agg` and friends; pandas defaults to `ddof=1`.
    pub fn from_name(name: &str) -> Option<Self> {
        let reduction = match name {
            "sum" => Reduction::Sum,
            "prod" => Reduction::Prod,
            "mean" | "average" => Reduction::Mean,
            "median" => Reduction::Median,
            "min" => Reduction::Min,
            "max" => Reduction::Max,
            "std" => Reduction::Std(1),
            "var" => Reduction::Var(1),
            "count" => Reduction::Count,
            "nunique" => Reduction::Nunique,
            "first" => Reduction::First,
            "last" => Reduction::Last,
            _ => return None,
        };
        Some(reduction)
    }

    /// Whether the reduction needs numeric input.
    pub fn numeric_only(self) -> bool {
        matches!(
            self,
            Reduction::Prod
                | Reduction::Mean
                | Reduction::Median
                | Reduction::Std(_)
                | Reduction::Var(_)
                | Reduction::Quantile(_)
        )
    }
}

fn present(data: &ColumnData) -> Vec<Cell> {
    data.cells().into_iter().filter(|c| !c.is_null()).collect()
}

fn numbers(cells: &[Cell], what: &str) -> Result<Vec<f64>, ScriptError> {
    cells
        .iter()
        .map(|cell| {
            cell.as_f64().ok_or_else(|| {
                ScriptError::type_error(format!(
                    "Could not convert {} to numeric for {what}",
                    cell_display(cell)
                ))
            })
        })
        .collect()
}

/// Linear interpolation between closest ranks, as numpy and pandas default to.
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let weight = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

pub fn variance(values: &[f64], ddof: u32) -> f64 {
    let n = values.len() as f64;
    let dof = n - f64::from(ddof);
    if dof <= 0.0 {
        return f64::NAN;
    }
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / dof
}

pub fn reduce(data: &ColumnData, reduction: Reduction) -> Result<Value, ScriptError> {
    let cells = present(data);
    let value = match reduction {
        Reduction::Count => Value::Int(cells.len() as i64),
        Reduction::Nunique => {
            let distinct: HashSet<KeyCell> = cells.iter().map(KeyCell::from).collect();
            Value::Int(distinct.len() as i64)
        }
        Reduction::First => cells.first().cloned().map_or(Value::None, Value::from_cell),
        Reduction::Last => cells.last().cloned().map_or(Value::None, Value::from_cell),
        Reduction::Min | Reduction::Max => {
            let wanted = if reduction == Reduction::Min {
                Ordering::Less
            } else {
                Ordering::Greater
            };
            let mut best: Option<&Cell> = None;
            for cell in &cells {
                best = match best {
                    None => Some(cell),
                    Some(current) => match cell.compare(current) {
                        Some(ordering) if ordering == wanted => Some(cell),
                        Some(_) => Some(current),
                        None => {
                            return Err(ScriptError::type_error(
                                "'<' not supported between mixed column values",
                            ))
                        }
                    },
                };
            }
            best.cloned().map_or(Value::Float(f64::NAN), Value::from_cell)
        }
        Reduction::Sum => match data {
            ColumnData::Int(_) | ColumnData::Bool(_) => Value::Int(
                cells
                    .iter()
                    .map(|cell| match cell {
                        Cell::Int(v) => *v,
                        Cell::Bool(v) => i64::from(*v),
                        _ => 0,
                    })
                    .sum(),
            ),
            ColumnData::Str(_) => Value::Str(
                cells
                    .iter()
                    .map(cell_display)
                    .collect(),
            ),
            _ => Value::Float(numbers(&cells, "sum")?.iter().sum()),
        },
        Reduction::Prod => {
            let product: f64 = numbers(&cells, "prod")?.iter().product();
            match data {
                ColumnData::Int(_) | ColumnData::Bool(_) => Value::Int(product as i64),
                _ => Value::Float(product),
            }
        }
        Reduction::Mean => {
            let values = numbers(&cells, "mean")?;
            Value::Float(if values.is_empty() {
                f64::NAN
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            })
        }
        Reduction::Median => reduce(data, Reduction::Quantile(0.5))?,
        Reduction::Quantile(q) => {
            let mut values = numbers(&cells, "quantile")?;
            values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
            Value::Float(quantile(&values, q))
        }
        Reduction::Var(ddof) => Value::Float(variance(&numbers(&cells, "var")?, ddof)),
        Reduction::Std(ddof) => Value::Float(variance(&numbers(&cells, "std")?, ddof).sqrt()),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn floats(values: &[Option<f64>]) -> ColumnData {
        ColumnData::Float(values.to_vec())
    }

    #[test]
    fn nulls_are_skipped() {
        let data = floats(&[Some(1.0), None, Some(3.0), Some(f64::NAN)]);
        assert_eq!(reduce(&data, Reduction::Mean).unwrap().as_f64(), Some(2.0));
        assert_eq!(reduce(&data, Reduction::Count).unwrap().as_i64(), Some(2));
    }

    #[test]
    fn sample_standard_deviation_by_default() {
        let data = floats(&[Some(2.0), Some(4.0), Some(4.0), Some(4.0), Some(5.0), Some(5.0), Some(7.0), Some(9.0)]);
        let sample = reduce(&data, Reduction::from_name("std").unwrap()).unwrap().as_f64().unwrap();
        let population = reduce(&data, Reduction::Std(0)).unwrap().as_f64().unwrap();
        assert!((population - 2.0).abs() < 1e-12);
        assert!(sample > population);
    }

    #[test]
    fn quantiles_interpolate() {
        let data = ColumnData::Int(vec![Some(1), Some(2), Some(3), Some(4)]);
        assert_eq!(reduce(&data, Reduction::Median).unwrap().as_f64(), Some(2.5));
        assert_eq!(reduce(&data, Reduction::Quantile(0.25)).unwrap().as_f64(), Some(1.75));
        assert_eq!(reduce(&data, Reduction::Sum).unwrap().as_i64(), Some(10));
    }

    #[test]
    fn text_columns_reject_numeric_reductions() {
        let data = ColumnData::Str(vec![Some("a".into())]);
        assert_eq!(reduce(&data, Reduction::Mean).unwrap_err().kind, "TypeError");
        assert_eq!(reduce(&data, Reduction::Max).unwrap().as_str(), Some("a"));
    }
}
