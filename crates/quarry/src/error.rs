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

use thiserror::Error;

pub type Result<T> = std::result::Result<T, QuarryError>;

#[derive(Error, Debug)]
pub enum QuarryError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Category '{category}' is not registered")]
    UnknownCategory { category: String },
    #[error("Lookup failed for category '{category}': {reason}")]
    LookupFailure { category: String, reason: String },
    #[error("Code validation failed: {}", .0.join("; "))]
    ValidationFailure(Vec<String>),
    #[error("Output contract violated for '{binding}': {message}")]
    ContractViolation { binding: String, message: String },
    #[error("Execution failed: {0}")]
    RuntimeFailure(String),
    #[error("Query rejected: {0}")]
    QueryRejected(String),
    #[error("Table '{0}' is not registered")]
    UnknownTable(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to load configuration: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Failed to parse YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Serialisation error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QuarryError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn lookup(category: impl Into<String>, reason: impl ToString) -> Self {
        Self::LookupFailure {
            category: category.into(),
            reason: reason.to_string(),
        }
    }

    pub fn storage(reason: impl ToString) -> Self {
        Self::Storage(reason.to_string())
    }

    /// Transient faults that a caller may retry unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LookupFailure { .. } | Self::Storage(_) | Self::Io(_) | Self::Polars(_)
        )
    }

    /// Deterministic faults that require the code to be regenerated.
    pub fn requires_regeneration(&self) -> bool {
        matches!(
            self,
            Self::ValidationFailure(_) | Self::ContractViolation { .. } | Self::RuntimeFailure(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_failures_are_retryable() {
        let err = QuarryError::lookup("vendor_name", "connection reset");
        assert!(err.is_retryable());
        assert!(!err.requires_regeneration());
        assert_eq!(
            err.to_string(),
            "Lookup failed for category 'vendor_name': connection reset"
        );
    }

    #[test]
    fn validation_failures_list_every_issue() {
        let err = QuarryError::ValidationFailure(vec![
            "Forbidden import: os".into(),
            "Dangerous function call: eval".into(),
        ]);
        assert!(err.requires_regeneration());
        assert!(err.to_string().contains("os; Dangerous"));
    }
}
