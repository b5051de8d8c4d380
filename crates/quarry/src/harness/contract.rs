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

//! Output contract: a tabular `result` and a mapping `data_summary`.

use crate::sandbox::Exported;
use crate::tabular::Table;
use quarry_contracts::ContractViolation;
use serde_json::{Map, Value};

pub const SUMMARY_BINDING: &str = "data_summary";

fn scalar_hint(expected: &str) -> String {
    format!("Return {expected} instead of int, float, or string")
}

fn result_hint(actual: &str) -> String {
    match actual {
        "dict" => "Return data frame instead of dictionary".to_string(),
        "list" | "tuple" => "Return data frame instead of list".to_string(),
        "int" | "float" | "str" | "bool" => scalar_hint("data frame"),
        "Series" => "Convert the Series with .to_frame() or .reset_index()".to_string(),
        other => format!("Return data frame instead of {other}"),
    }
}

fn summary_hint(actual: &str) -> String {
    match actual {
        "list" | "tuple" => "Return dictionary instead of list".to_string(),
        "int" | "float" | "str" | "bool" => scalar_hint("dictionary"),
        other => format!("Return dictionary instead of {other}"),
    }
}

fn missing(binding: &str, hint: String) -> ContractViolation {
    ContractViolation {
        binding: binding.to_string(),
        actual_type: "NoneType".to_string(),
        message: format!("Code did not produce '{binding}' variable"),
        hint,
    }
}

pub fn check_result(binding: &str, exported: Exported) -> Result<Table, ContractViolation> {
    match exported {
        Exported::Frame(table) => Ok(table),
        Exported::Missing => Err(missing(
            binding,
            format!("Assign a data frame to '{binding}'"),
        )),
        other => {
            let actual = other.type_name().to_string();
            Err(ContractViolation {
                binding: binding.to_string(),
                message: format!("Code generated {actual} instead of DataFrame!"),
                hint: result_hint(&actual),
                actual_type: actual,
            })
        }
    }
}

pub fn check_summary(
    binding: &str,
    exported: Exported,
) -> Result<Map<String, Value>, ContractViolation> {
    match exported {
        Exported::Mapping(map) => Ok(map),
        Exported::Missing => Err(missing(
            binding,
            format!("Assign a dictionary of summary figures to '{binding}'"),
        )),
        Exported::Unportable { key, type_name } => Err(ContractViolation {
            binding: binding.to_string(),
            message: format!("Summary entry '{key}' holds a {type_name}"),
            hint: format!("Reduce '{key}' to numbers, strings, lists or dictionaries"),
            actual_type: "dict".to_string(),
        }),
        other => {
            let actual = other.type_name().to_string();
            Err(ContractViolation {
                binding: binding.to_string(),
                message: format!("Code generated {actual} instead of dictionary!"),
                hint: summary_hint(&actual),
                actual_type: actual,
            })
        }
    }
}

/// Checks both bindings; every violation is reported, not just the first.
pub fn enforce(
    (result_binding, result): (&str, Exported),
    (summary_binding, summary): (&str, Exported),
) -> Result<(Table, Map<String, Value>), Vec<ContractViolation>> {
    match (
        check_result(result_binding, result),
        check_summary(summary_binding, summary),
    ) {
        (Ok(table), Ok(map)) => Ok((table, map)),
        (result, summary) => Err([result.err(), summary.err()]
            .into_iter()
            .flatten()
            .collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tabular::ColumnData;

    fn frame() -> Exported {
        Exported::Frame(Table::new(vec![("a".into(), ColumnData::Int(vec![Some(1)]))]).unwrap())
    }

    #[test]
    fn scalar_result_names_its_type() {
        let err = check_result("result", Exported::Other("int".into())).unwrap_err();
        assert_eq!(err.actual_type, "int");
        assert_eq!(err.message, "Code generated int instead of DataFrame!");
        assert_eq!(err.hint, "Return data frame instead of int, float, or string");
    }

    #[test]
    fn mapping_result_gets_dictionary_hint() {
        let err = check_result("result", Exported::Mapping(Map::new())).unwrap_err();
        assert_eq!(err.actual_type, "dict");
        assert_eq!(err.hint, "Return data frame instead of dictionary");
    }

    #[test]
    fn both_violations_are_reported() {
        let violations = enforce(
            ("result", Exported::Missing),
            (SUMMARY_BINDING, Exported::Other("list".into())),
        )
        .unwrap_err();
        assert_eq!(violations.len(), 2);
        assert_eq!(violations[0].message, "Code did not produce 'result' variable");
        assert_eq!(violations[1].hint, "Return dictionary instead of list");
    }

    #[test]
    fn summary_failure_does_not_mask_a_good_result() {
        let violations = enforce(("result", frame()), (SUMMARY_BINDING, Exported::Missing)).unwrap_err();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].binding, "data_summary");
    }

    #[test]
    fn valid_bindings_pass_through() {
        let mut summary = Map::new();
        summary.insert("rows".into(), Value::from(1));
        let (table, map) = enforce(
            ("result", frame()),
            (SUMMARY_BINDING, Exported::Mapping(summary)),
        )
        .unwrap();
        assert_eq!(table.height(), 1);
        assert_eq!(map["rows"], Value::from(1));
    }
}
