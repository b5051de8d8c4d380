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

//! Restricted evaluator for generated analysis scripts.
//!
//! Scripts see four bindings (`conn`, `pd`, `np`, `datetime`) and nothing
//! else. Every statement, call and row-level table operation is charged
//! against a gas budget, printed output is captured, and the interesting
//! bindings are exported as plain data once the run ends so the interpreter's
//! single-threaded values never leave the worker thread.

mod args;
mod builtins;
mod dates;
pub mod error;
mod format;
pub mod interpreter;
mod numpy;
mod ops;
mod pandas;
mod stats;
mod value;

pub use error::{ScriptError, TraceFrame};
pub use interpreter::{Interpreter, SandboxLimits};

use crate::script::parse;
use crate::store::ReadOnlyConnection;
use crate::tabular::Table;
use serde_json::{Map, Number, Value as JsonValue};
use std::sync::Arc;
use tracing::debug;
use value::Value;

/// A binding read back after the run.
#[derive(Debug, Clone, PartialEq)]
pub enum Exported {
    Missing,
    Frame(Table),
    Mapping(Map<String, JsonValue>),
    /// A mapping with an entry that cannot travel as plain data.
    Unportable { key: String, type_name: String },
    Other(String),
}

impl Exported {
    pub fn type_name(&self) -> &str {
        match self {
            Exported::Missing => "NoneType",
            Exported::Frame(_) => "DataFrame",
            Exported::Mapping(_) | Exported::Unportable { .. } => "dict",
            Exported::Other(name) => name,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunFailure {
    pub kind: String,
    pub message: String,
    pub traceback: String,
    pub budget_exhausted: bool,
}

#[derive(Debug, Clone)]
pub struct SandboxRun {
    pub output: String,
    pub gas_used: u64,
    pub outcome: Result<(Exported, Exported), RunFailure>,
}

/// Plain-data form of a script value; `None` when the value has no such form.
fn portable(value: &Value, date_format: &str) -> Option<JsonValue> {
    let json = match value {
        Value::None => JsonValue::Null,
        Value::Bool(v) => JsonValue::Bool(*v),
        Value::Int(v) => JsonValue::from(*v),
        Value::Float(v) => Number::from_f64(*v).map_or(JsonValue::Null, JsonValue::Number),
        Value::Str(v) => JsonValue::String(v.clone()),
        Value::Date(v) => JsonValue::String(v.format(date_format).to_string()),
        Value::DateTime(v) => JsonValue::String(v.format(date_format).to_string()),
        Value::Delta(_) => JsonValue::String(format::to_str(value)),
        Value::List(items) => JsonValue::Array(
            items
                .borrow()
                .iter()
                .map(|item| portable(item, date_format))
                .collect::<Option<_>>()?,
        ),
        Value::Tuple(items) => JsonValue::Array(
            items
                .iter()
                .map(|item| portable(item, date_format))
                .collect::<Option<_>>()?,
        ),
        Value::Series(series) => JsonValue::Array(series.data.to_json_values(date_format)),
        Value::Dict(entries) => {
            let mut map = Map::new();
            for (key, item) in entries.borrow().iter() {
                map.insert(format::to_str(&key.to_value()), portable(item, date_format)?);
            }
            JsonValue::Object(map)
        }
        _ => return None,
    };
    Some(json)
}

fn export(binding: Option<Value>, date_format: &str) -> Exported {
    match binding {
        None => Exported::Missing,
        Some(Value::Frame(table)) => Exported::Frame(table.borrow().clone()),
        Some(Value::Dict(entries)) => {
            let mut map = Map::new();
            for (key, item) in entries.borrow().iter() {
                let key = format::to_str(&key.to_value());
                match portable(item, date_format) {
                    Some(json) => {
                        map.insert(key, json);
                    }
                    None => {
                        return Exported::Unportable {
                            key,
                            type_name: item.type_name(),
                        }
                    }
                }
            }
            Exported::Mapping(map)
        }
        Some(other) => Exported::Other(other.type_name()),
    }
}

/// Parses and runs `source`, then exports `result_binding` and `summary_binding`.
///
/// Blocking; the harness calls it from a worker thread.
pub fn run_script(
    source: &str,
    limits: SandboxLimits,
    connection: Option<Arc<dyn ReadOnlyConnection>>,
    bindings: (&str, &str),
    date_format: &str,
) -> SandboxRun {
    let program = match parse(source) {
        Ok(program) => program,
        Err(err) => {
            return SandboxRun {
                output: String::new(),
                gas_used: 0,
                outcome: Err(RunFailure {
                    kind: "SyntaxError".to_string(),
                    message: err.to_string(),
                    traceback: format!("SyntaxError: {err}"),
                    budget_exhausted: false,
                }),
            }
        }
    };
    let mut interpreter = Interpreter::new(limits, connection);
    let outcome = interpreter.run(&program);
    let gas_used = interpreter.gas_used();
    debug!(gas_used, ok = outcome.is_ok(), "Script finished");
    let outcome = match outcome {
        Ok(()) => Ok((
            export(interpreter.global(bindings.0), date_format),
            export(interpreter.global(bindings.1), date_format),
        )),
        Err(err) => Err(RunFailure {
            kind: err.kind.clone(),
            message: err.to_string(),
            traceback: err.render_traceback(source),
            budget_exhausted: err.fatal,
        }),
    };
    SandboxRun {
        output: interpreter.take_output(),
        gas_used,
        outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BINDINGS: (&str, &str) = ("result", "data_summary");

    fn run(source: &str) -> SandboxRun {
        run_script(source, SandboxLimits::default(), None, BINDINGS, "%Y-%m-%d")
    }

    #[test]
    fn exports_frame_and_summary() {
        let run = run(
            "result = pd.DataFrame({'a': [1, 2]})\n\
             data_summary = {'rows': len(result), 'day': datetime(2024, 3, 1), 'tags': ['x']}\n\
             print('done')\n",
        );
        let (result, summary) = run.outcome.unwrap();
        assert!(matches!(result, Exported::Frame(ref t) if t.height() == 2));
        let Exported::Mapping(summary) = summary else {
            panic!("summary not exported");
        };
        assert_eq!(summary["rows"], JsonValue::from(2));
        assert_eq!(summary["day"], JsonValue::from("2024-03-01"));
        assert_eq!(summary["tags"], serde_json::json!(["x"]));
        assert_eq!(run.output, "done\n");
    }

    #[test]
    fn reports_actual_binding_types() {
        let run = run("result = 42\n");
        let (result, summary) = run.outcome.unwrap();
        assert_eq!(result, Exported::Other("int".to_string()));
        assert_eq!(summary, Exported::Missing);
    }

    #[test]
    fn frames_inside_summaries_are_unportable() {
        let run = run("result = pd.DataFrame({'a': [1]})\ndata_summary = {'raw': result}\n");
        let (_, summary) = run.outcome.unwrap();
        assert_eq!(
            summary,
            Exported::Unportable {
                key: "raw".to_string(),
                type_name: "DataFrame".to_string()
            }
        );
    }

    #[test]
    fn failures_carry_a_traceback() {
        let run = run("x = 1\ny = x / 0\n");
        let failure = run.outcome.unwrap_err();
        assert_eq!(failure.kind, "ZeroDivisionError");
        assert!(failure.traceback.contains("line 2, in <module>"));
        assert!(failure.traceback.contains("y = x / 0"));
    }
}
