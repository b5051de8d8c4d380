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

use proptest::prelude::*;
use quarry::{analyze_code_structure, CodeSafetyValidator};

fn validate(code: &str) -> quarry::ValidationVerdict {
    CodeSafetyValidator::new().validate(code)
}

#[test]
fn word_boundaries_protect_lookalike_columns() {
    assert!(validate("query = 'DROP TABLE x'\nresult = 1").mentions("DROP"));
    let verdict = validate("query = 'SELECT DROPBOX_COL FROM x'\nresult=1");
    assert!(verdict.valid, "{:?}", verdict.issues);
}

#[test]
fn every_problem_is_reported_at_once() {
    let code = "import socket\nfrom pickle import loads\nx = eval('2')\nopen('f').write('y')\nq = 'DELETE FROM t'\n";
    let verdict = validate(code);
    assert!(!verdict.valid);
    for needle in [
        "Forbidden import: socket",
        "Forbidden import: pickle",
        "Dangerous function call: eval",
        "Code must assign output to 'result' variable",
        "File operation not allowed: file.write",
        "SQL contains forbidden operation(s): DELETE",
    ] {
        assert!(
            verdict.issues.iter().any(|issue| issue == needle),
            "missing {needle} in {:?}",
            verdict.issues
        );
    }
}

#[test]
fn interpolated_queries_are_scanned() {
    let code = "table = 'sales'\nsql = f\"DELETE FROM {table} WHERE id = {1}\"\nresult = 1\n";
    assert!(validate(code).mentions("DELETE"));

    let code = "region = 'west'\nsql = f\"SELECT * FROM sales WHERE region = '{region}'\"\nresult = 1\n";
    assert!(validate(code).valid);
}

#[test]
fn syntax_errors_short_circuit() {
    let verdict = validate("result = (1,\nimport os\n");
    assert_eq!(verdict.issues.len(), 1);
    assert!(verdict.issues[0].starts_with("Syntax error:"));
    assert!(analyze_code_structure("def (:").is_err());
}

#[test]
fn structure_lists_what_the_code_touches() {
    let structure = analyze_code_structure(
        "import numpy as np\ndf = pd.read_sql('SELECT 1', conn)\nresult = df.head(3)\n",
    )
    .unwrap();
    assert!(structure.imports.iter().any(|m| m == "numpy"));
    assert!(structure.function_calls.iter().any(|c| c == "pd.read_sql"));
    assert!(structure.assignments.iter().any(|a| a == "result"));
    assert!(structure.string_literals.iter().any(|s| s == "SELECT 1"));
}

proptest! {
    #[test]
    fn plain_select_columns_never_trip_the_scanner(column in "[a-z][a-z_]{0,12}") {
        let code = format!("q = 'SELECT {column}_total FROM sales'\nresult = 1\n");
        let verdict = validate(&code);
        prop_assert!(verdict.valid, "{:?}", verdict.issues);
    }

    #[test]
    fn destructive_statements_are_always_caught(
        keyword in prop::sample::select(vec!["DROP", "TRUNCATE", "ALTER", "GRANT", "delete", "Update"]),
        table in "[a-z]{1,10}",
    ) {
        let code = format!("q = \"SELECT 1; {keyword} {table}\"\nresult = 1\n");
        let verdict = validate(&code);
        prop_assert!(!verdict.valid);
        prop_assert!(verdict.mentions(&keyword.to_uppercase()));
    }
}
