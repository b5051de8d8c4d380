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

use crate::sandbox::error::ScriptError;
use crate::sandbox::interpreter::{Interpreter, SandboxLimits};
use crate::sandbox::value::Value;
use crate::script::parse;
use crate::tabular::{Cell, Table};

fn run(source: &str) -> (Interpreter, Result<(), ScriptError>) {
    let program = parse(source).unwrap();
    let mut interpreter = Interpreter::new(SandboxLimits::default(), None);
    let outcome = interpreter.run(&program);
    (interpreter, outcome)
}

fn frame(interpreter: &Interpreter, name: &str) -> Table {
    match interpreter.global(name) {
        Some(Value::Frame(table)) => table.borrow().clone(),
        other => panic!("{name} is not a frame: {other:?}"),
    }
}

fn strings(interpreter: &Interpreter, name: &str) -> Vec<Option<String>> {
    match interpreter.global(name) {
        Some(Value::List(items)) => items
            .borrow()
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect(),
        other => panic!("{name} is not a list: {other:?}"),
    }
}

#[test]
fn groupby_keeps_keys_as_columns() {
    let (interpreter, outcome) = run(
        "df = pd.DataFrame({'region': ['east', 'west', 'east'], 'sales': [10, 5, 7]})\n\
         out = df.groupby('region')['sales'].sum()\n",
    );
    outcome.unwrap();
    let out = frame(&interpreter, "out");
    assert_eq!(out.column_names(), vec!["region", "sales"]);
    assert_eq!(out.require("region").unwrap().get(0), Cell::Str("east".into()));
    assert_eq!(out.require("sales").unwrap().get(0), Cell::Int(17));
    assert_eq!(out.require("sales").unwrap().get(1), Cell::Int(5));
}

#[test]
fn named_aggregation_and_iloc() {
    let (interpreter, outcome) = run(
        "df = pd.DataFrame({'k': ['a', 'b', 'a'], 'v': [1.0, 2.0, 3.0]})\n\
         g = df.groupby('k').agg(total=('v', 'sum'), n=('v', 'count'))\n\
         first_total = g.iloc[0, 1]\n",
    );
    outcome.unwrap();
    assert_eq!(frame(&interpreter, "g").column_names(), vec!["k", "total", "n"]);
    assert_eq!(interpreter.global("first_total").and_then(|v| v.as_f64()), Some(4.0));
}

#[test]
fn left_merge_keeps_unmatched_rows() {
    let (interpreter, outcome) = run(
        "left = pd.DataFrame({'id': [1, 2, 3], 'v': [1.5, 2.5, 3.5]})\n\
         right = pd.DataFrame({'id': [1, 3], 'name': ['a', 'c']})\n\
         m = left.merge(right, on='id', how='left')\n\
         n = len(m)\n\
         missing = m['name'].isna().sum()\n",
    );
    outcome.unwrap();
    assert_eq!(interpreter.global("n").and_then(|v| v.as_i64()), Some(3));
    assert_eq!(interpreter.global("missing").and_then(|v| v.as_i64()), Some(1));
}

#[test]
fn outer_merge_is_refused() {
    let (_, outcome) = run(
        "a = pd.DataFrame({'id': [1]})\nb = pd.DataFrame({'id': [2]})\nc = a.merge(b, on='id', how='outer')\n",
    );
    assert_eq!(outcome.unwrap_err().kind, "NotImplementedError");
}

#[test]
fn loc_assignment_creates_the_column() {
    let (interpreter, outcome) = run(
        "df = pd.DataFrame({'x': [1, 5, 10]})\n\
         df.loc[df['x'] > 4, 'flag'] = 'big'\n\
         flags = df['flag'].tolist()\n",
    );
    outcome.unwrap();
    assert_eq!(
        strings(&interpreter, "flags"),
        vec![None, Some("big".to_string()), Some("big".to_string())]
    );
}

#[test]
fn string_accessor_chains_into_value_counts() {
    let (interpreter, outcome) = run(
        "s = pd.Series(['East ', 'east', 'West'])\n\
         counts = s.str.strip().str.lower().value_counts()\n\
         top = counts['count'].tolist()[0]\n\
         label = counts['index'].tolist()[0]\n",
    );
    outcome.unwrap();
    assert_eq!(interpreter.global("top").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(
        interpreter.global("label").and_then(|v| v.as_str().map(str::to_string)),
        Some("east".to_string())
    );
}

#[test]
fn datetime_accessor_fields_and_periods() {
    let (interpreter, outcome) = run(
        "d = pd.to_datetime(pd.Series(['2024-01-15', '2024-05-03']))\n\
         months = d.dt.to_period('M').tolist()\n\
         quarters = d.dt.to_period('Q').tolist()\n\
         years = d.dt.year.tolist()\n",
    );
    outcome.unwrap();
    assert_eq!(
        strings(&interpreter, "months"),
        vec![Some("2024-01".to_string()), Some("2024-05".to_string())]
    );
    assert_eq!(
        strings(&interpreter, "quarters"),
        vec![Some("2024Q1".to_string()), Some("2024Q2".to_string())]
    );
}

#[test]
fn pivot_table_spreads_labels_into_columns() {
    let (interpreter, outcome) = run(
        "df = pd.DataFrame({'r': ['a', 'a', 'b'], 'q': ['x', 'y', 'x'], 'v': [1, 2, 3]})\n\
         p = df.pivot_table(values='v', index='r', columns='q', aggfunc='sum', fill_value=0)\n",
    );
    outcome.unwrap();
    let p = frame(&interpreter, "p");
    assert_eq!(p.column_names(), vec!["r", "x", "y"]);
    assert_eq!(p.require("y").unwrap().get(1), Cell::Int(0));
    assert_eq!(p.require("x").unwrap().get(1), Cell::Int(3));
}

#[test]
fn row_wise_apply_sees_rows_as_dicts() {
    let (interpreter, outcome) = run(
        "df = pd.DataFrame({'a': [1, 2], 'b': [10, 20]})\n\
         df['c'] = df.apply(lambda row: row['a'] + row['b'], axis=1)\n\
         total = df['c'].sum()\n",
    );
    outcome.unwrap();
    assert_eq!(interpreter.global("total").and_then(|v| v.as_i64()), Some(33));
}

#[test]
fn writers_are_not_available() {
    let (_, outcome) = run("df = pd.DataFrame({'a': [1]})\ndf.to_csv('out.csv')\n");
    assert_eq!(outcome.unwrap_err().kind, "NotImplementedError");
}

#[test]
fn missing_column_is_a_key_error() {
    let (_, outcome) = run("df = pd.DataFrame({'a': [1]})\nx = df['b']\n");
    assert_eq!(outcome.unwrap_err().kind, "KeyError");
}
