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

use polars::prelude::*;
use quarry::{
    CodeSafetyValidator, EngineConfig, ExecutionHarness, FailureKind, FrameWarehouse,
    MemoryObjectStore, QuarryEngine, RuntimeContext, StaticSource,
};
use serde_json::json;
use std::sync::Arc;

fn sales() -> DataFrame {
    df!(
        "region" => ["east", "west", "north", "east", "west", "south"],
        "amount" => [12i64, 30, 5, 20, 15, 40],
    )
    .unwrap()
}

fn context() -> RuntimeContext {
    RuntimeContext::new("conv-1", "sess-1")
        .with_user("user-7")
        .with_message("msg-3")
        .with_agent("sales_agent")
}

fn harness(store: Arc<MemoryObjectStore>) -> ExecutionHarness {
    let warehouse = Arc::new(FrameWarehouse::new().with_table("sales", sales()));
    ExecutionHarness::new(CodeSafetyValidator::new(), store).with_connection(warehouse)
}

#[tokio::test]
async fn small_results_come_back_inline() {
    let store = Arc::new(MemoryObjectStore::new(7));
    let code = r#"
df = pd.read_sql("SELECT region, amount FROM sales WHERE amount > 10", conn)
result = df.groupby('region')['amount'].sum()
data_summary = {'regions': len(result), 'total': result['amount'].sum()}
print('regions', len(result))
"#;
    let outcome = harness(store.clone()).execute(code, &context()).await;

    assert!(outcome.is_success(), "{outcome:?}");
    assert!(!outcome.is_externalized());
    assert!(store.is_empty());
    let rows = outcome.result.as_ref().unwrap();
    assert_eq!(rows.columns, ["region", "amount"]);
    assert_eq!(
        rows.rows,
        vec![
            vec![json!("east"), json!(32)],
            vec![json!("south"), json!(40)],
            vec![json!("west"), json!(45)],
        ]
    );
    assert_eq!(outcome.record_count, Some(3));
    assert_eq!(outcome.output, "regions 3\n");

    let summary = outcome.summary.as_ref().unwrap();
    assert_eq!(summary["regions"], json!(3));
    assert_eq!(summary["total"], json!(117));
    assert_eq!(summary["agent"], json!("sales_agent"));
    assert!(summary["timestamp"].as_str().unwrap().contains('T'));
}

#[tokio::test]
async fn large_results_are_externalized() {
    let store = Arc::new(MemoryObjectStore::new(7));
    let code = "result = pd.DataFrame({'n': list(range(50))})\ndata_summary = {'rows': len(result)}\n";
    let outcome = harness(store.clone()).execute(code, &context()).await;

    assert!(outcome.is_success(), "{outcome:?}");
    assert!(outcome.result.is_none());
    assert_eq!(outcome.record_count, Some(50));
    let reference = outcome.externalized.as_ref().unwrap();
    assert_eq!(reference.record_count, 50);
    assert_eq!(reference.format, "csv");
    assert!(reference.location.starts_with("user-7/sess-1/msg-3/"));
    assert!(reference.filename.contains("sales_agent"));
    assert!(reference.file_size_bytes > 0);
    assert_eq!(store.len(), 1);
    assert!(store.get(&reference.location).is_some());
}

#[tokio::test]
async fn scalar_result_is_a_contract_violation() {
    let store = Arc::new(MemoryObjectStore::new(7));
    let outcome = harness(store)
        .execute("result = 42\ndata_summary = {}\n", &context())
        .await;

    assert!(!outcome.is_success());
    assert_eq!(outcome.failure, Some(FailureKind::ContractViolation));
    assert!(outcome.message.as_deref().unwrap().contains("int"));
    assert_eq!(outcome.violations.len(), 1);
    assert_eq!(outcome.violations[0].actual_type, "int");
    assert_eq!(
        outcome.issues,
        ["Return data frame instead of int, float, or string"]
    );
}

#[tokio::test]
async fn missing_summary_is_reported_alongside_the_result() {
    let store = Arc::new(MemoryObjectStore::new(7));
    let outcome = harness(store)
        .execute("result = [1, 2]\nsummary = {}\n", &context())
        .await;

    assert_eq!(outcome.failure, Some(FailureKind::ContractViolation));
    let bindings: Vec<_> = outcome.violations.iter().map(|v| v.binding.as_str()).collect();
    assert_eq!(bindings, ["result", "data_summary"]);
    assert_eq!(outcome.violations[0].hint, "Return data frame instead of list");
}

#[tokio::test]
async fn runtime_errors_carry_traceback_and_output() {
    let store = Arc::new(MemoryObjectStore::new(7));
    let code = "df = pd.read_sql('SELECT * FROM sales', conn)\nprint('loaded', len(df))\nresult = df['missing_column']\ndata_summary = {}\n";
    let outcome = harness(store).execute(code, &context()).await;

    assert_eq!(outcome.failure, Some(FailureKind::RuntimeFailure));
    assert!(outcome.message.as_deref().unwrap().starts_with("KeyError"));
    let traceback = outcome.traceback.as_deref().unwrap();
    assert!(traceback.starts_with("Traceback (most recent call last):"));
    assert!(traceback.contains("line 3, in <module>"));
    assert!(traceback.contains("result = df['missing_column']"));
    assert_eq!(outcome.output, "loaded 6\n");
}

#[tokio::test]
async fn unsafe_code_never_runs() {
    let store = Arc::new(MemoryObjectStore::new(7));
    let code = "import os\nprint('ran')\nresult = pd.DataFrame()\ndata_summary = {}\n";
    let outcome = harness(store).execute(code, &context()).await;

    assert_eq!(outcome.failure, Some(FailureKind::ValidationFailure));
    assert!(outcome.output.is_empty());
    assert!(outcome.issues.iter().any(|issue| issue.contains("os")));
}

#[tokio::test]
async fn runaway_loops_exhaust_the_budget() {
    let store = Arc::new(MemoryObjectStore::new(7));
    let mut limits = quarry::ExecutionLimits::default();
    limits.gas_limit = 5_000;
    let harness = ExecutionHarness::new(CodeSafetyValidator::new(), store).with_limits(limits);
    let outcome = harness
        .execute("n = 0\nwhile True:\n    n += 1\nresult = pd.DataFrame()\n", &context())
        .await;

    assert_eq!(outcome.failure, Some(FailureKind::RuntimeFailure));
    assert!(outcome.message.as_deref().unwrap().contains("budget of 5000 steps"));
}

#[tokio::test]
async fn dates_are_rendered_as_plain_strings() {
    let store = Arc::new(MemoryObjectStore::new(7));
    let code = "result = pd.DataFrame({'day': pd.to_datetime(['2024-03-01', '2024-03-02']), 'v': [1.5, None]})\ndata_summary = {'first': result['day'].min()}\n";
    let outcome = harness(store).execute(code, &context()).await;

    assert!(outcome.is_success(), "{outcome:?}");
    let rows = &outcome.result.as_ref().unwrap().rows;
    assert_eq!(rows[0], vec![json!("2024-03-01"), json!(1.5)]);
    assert_eq!(rows[1], vec![json!("2024-03-02"), json!(null)]);
    assert_eq!(outcome.summary.as_ref().unwrap()["first"], json!("2024-03-01"));
}

#[tokio::test]
async fn engine_runs_against_registered_tables() {
    let warehouse = Arc::new(FrameWarehouse::new().with_table("sales", sales()));
    let source = Arc::new(StaticSource::new().with_category("customer_name", ["Globex"]));
    let engine = QuarryEngine::assemble(
        &EngineConfig::default(),
        warehouse,
        source,
        Arc::new(MemoryObjectStore::new(7)),
    )
    .unwrap();

    let code = "result = pd.read_sql('SELECT region FROM sales WHERE amount >= 30', conn)\ndata_summary = {'n': len(result)}\n";
    let outcome = engine.execute(code, &context()).await;
    assert!(outcome.is_success(), "{outcome:?}");
    assert_eq!(outcome.result.unwrap().rows.len(), 2);
    assert!(engine.validate("result = 1\ndata_summary = {}").valid);
}

#[tokio::test]
async fn queries_cannot_reach_the_file_system() {
    let store = Arc::new(MemoryObjectStore::new(7));
    let code = "result = pd.read_sql(\"SELECT * FROM read_csv('/etc/passwd')\", conn)\ndata_summary = {}\n";
    let outcome = harness(store).execute(code, &context()).await;

    assert_eq!(outcome.failure, Some(FailureKind::RuntimeFailure));
    let message = outcome.message.as_deref().unwrap();
    assert!(message.starts_with("DatabaseError"), "{message}");
    assert!(message.contains("table function read_csv"), "{message}");
    assert!(outcome.result.is_none());
}

#[tokio::test]
async fn deeply_nested_code_fails_validation() {
    let store = Arc::new(MemoryObjectStore::new(7));
    let code = format!(
        "result = pd.DataFrame({{'v': [{}1{}]}})\ndata_summary = {{}}\n",
        "(".repeat(5_000),
        ")".repeat(5_000)
    );
    let outcome = harness(store).execute(&code, &context()).await;

    assert_eq!(outcome.failure, Some(FailureKind::ValidationFailure));
    assert!(outcome.issues[0].starts_with("Syntax error: too many nested parentheses"));
}

#[tokio::test]
async fn arithmetic_edges_fail_with_a_traceback() {
    let store = Arc::new(MemoryObjectStore::new(7));
    let cases = [
        ("low = -9223372036854775807 - 1\nresult = low // -1\n", "OverflowError"),
        ("result = [0] * 10**12\n", "MemoryError"),
        ("result = 'a' * 10**10\n", "MemoryError"),
    ];
    for (code, kind) in cases {
        let outcome = harness(store.clone()).execute(code, &context()).await;

        assert_eq!(outcome.failure, Some(FailureKind::RuntimeFailure), "{code}");
        assert!(outcome.message.as_deref().unwrap().starts_with(kind), "{code}");
        let traceback = outcome.traceback.as_deref().unwrap();
        assert!(traceback.contains("in <module>"), "{traceback}");
    }
}

#[tokio::test]
async fn collection_limit_is_configurable() {
    let store = Arc::new(MemoryObjectStore::new(7));
    let mut limits = quarry::ExecutionLimits::default();
    limits.max_collection_len = 10;
    let harness = ExecutionHarness::new(CodeSafetyValidator::new(), store).with_limits(limits);
    let outcome = harness
        .execute("labels = ['x'] * 11\nresult = pd.DataFrame({'label': labels})\ndata_summary = {}\n", &context())
        .await;

    assert_eq!(outcome.failure, Some(FailureKind::RuntimeFailure));
    assert!(outcome.message.as_deref().unwrap().starts_with("MemoryError"));
}

#[tokio::test]
async fn outcomes_survive_a_json_round_trip() {
    let store = Arc::new(MemoryObjectStore::new(7));
    let code = r#"
result = pd.DataFrame({
    'region': ['east', 'west', None],
    'units': [3, -2, 7],
    'price': [1.5, np.nan, 2.25],
    'day': pd.to_datetime(['2024-03-01', '2024-03-02', '2024-03-03'])
})
data_summary = {
    'total_units': result['units'].sum(),
    'mean_price': np.mean([1.5, 2.5]),
    'gap': np.nan,
    'first_day': result['day'].min(),
    'regions': ['east', 'west']
}
print('rows', len(result))
"#;
    let outcome = harness(store).execute(code, &context()).await;
    assert!(outcome.is_success(), "{outcome:?}");

    let rows = &outcome.result.as_ref().unwrap().rows;
    assert_eq!(rows[1], vec![json!("west"), json!(-2), json!(null), json!("2024-03-02")]);
    assert_eq!(rows[2][0], json!(null));
    let summary = outcome.summary.as_ref().unwrap();
    assert_eq!(summary["total_units"], json!(8));
    assert_eq!(summary["mean_price"], json!(2.0));
    assert_eq!(summary["gap"], json!(null));
    assert_eq!(summary["first_day"], json!("2024-03-01"));

    let encoded = serde_json::to_string(&outcome).unwrap();
    let decoded: quarry::ExecutionOutcome = serde_json::from_str(&encoded).unwrap();
    assert_eq!(decoded, outcome);
    assert_eq!(serde_json::to_string(&decoded).unwrap(), encoded);
}
