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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ValidationFailure,
    ContractViolation,
    RuntimeFailure,
}

/// Row-major table with every cell already reduced to plain JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TabularPayload {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl TabularPayload {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().filter_map(|row| row.get(idx)).collect())
    }

    pub fn records(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect::<Map<String, Value>>()
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalizedResult {
    pub location: String,
    pub filename: String,
    pub format: String,
    pub record_count: usize,
    pub file_size_bytes: u64,
    pub generated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractViolation {
    pub binding: String,
    pub actual_type: String,
    pub message: String,
    pub hint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TabularPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<ContractViolation>,
    #[serde(default)]
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub externalized: Option<ExternalizedResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_count: Option<usize>,
}

impl ExecutionOutcome {
    fn error(failure: FailureKind, message: impl Into<String>, output: String) -> Self {
        Self {
            status: ExecutionStatus::Error,
            failure: Some(failure),
            result: None,
            summary: None,
            message: Some(message.into()),
            traceback: None,
            issues: Vec::new(),
            violations: Vec::new(),
            output,
            externalized: None,
            record_count: None,
        }
    }

    pub fn success(
        result: Option<TabularPayload>,
        summary: Map<String, Value>,
        record_count: usize,
        externalized: Option<ExternalizedResult>,
        output: String,
    ) -> Self {
        Self {
            status: ExecutionStatus::Success,
            failure: None,
            result,
            summary: Some(summary),
            message: None,
            traceback: None,
            issues: Vec::new(),
            violations: Vec::new(),
            output,
            externalized,
            record_count: Some(record_count),
        }
    }

    pub fn validation_failed(issues: Vec<String>) -> Self {
        let mut outcome = Self::error(
            FailureKind::ValidationFailure,
            "Code validation failed",
            String::new(),
        );
        outcome.issues = issues;
        outcome
    }

    pub fn contract_violated(violations: Vec<ContractViolation>, output: String) -> Self {
        let message = violations
            .iter()
            .map(|v| v.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        let mut outcome = Self::error(FailureKind::ContractViolation, message, output);
        outcome.issues = violations.iter().map(|v| v.hint.clone()).collect();
        outcome.violations = violations;
        outcome
    }

    pub fn runtime_failure(
        message: impl Into<String>,
        traceback: impl Into<String>,
        output: String,
    ) -> Self {
        let mut outcome = Self::error(FailureKind::RuntimeFailure, message, output);
        outcome.traceback = Some(traceback.into());
        outcome
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    pub fn is_externalized(&self) -> bool {
        self.externalized.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn records_pair_columns_with_cells() {
        let payload = TabularPayload {
            columns: vec!["region".into(), "revenue".into()],
            rows: vec![vec![json!("West"), json!(12.5)]],
        };
        let records = payload.records();
        assert_eq!(records[0]["region"], json!("West"));
        assert_eq!(payload.column("revenue"), Some(vec![&json!(12.5)]));
    }

    #[test]
    fn contract_violation_keeps_every_violation() {
        let outcome = ExecutionOutcome::contract_violated(
            vec![
                ContractViolation {
                    binding: "result".into(),
                    actual_type: "int".into(),
                    message: "Code generated int instead of DataFrame!".into(),
                    hint: "Return data frame instead of int, float, or string".into(),
                },
                ContractViolation {
                    binding: "data_summary".into(),
                    actual_type: "list".into(),
                    message: "Code generated list instead of dictionary!".into(),
                    hint: "Return dictionary instead of list".into(),
                },
            ],
            String::new(),
        );
        assert_eq!(outcome.failure, Some(FailureKind::ContractViolation));
        assert_eq!(outcome.violations.len(), 2);
        assert!(outcome.message.as_deref().unwrap_or_default().contains("int"));
    }
}
