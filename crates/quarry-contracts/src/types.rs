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

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPhase {
    ExactMatch,
    HighConfidence,
    MediumConfidence,
    NoMatch,
    Failed,
}

/// Outcome of resolving one free-text value against a category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResolutionResult {
    ExactMatch {
        category: String,
        value: String,
        confidence: f64,
    },
    HighConfidenceMatch {
        category: String,
        value: String,
        score: f64,
    },
    NeedsClarification {
        category: String,
        original_query: String,
        message: String,
        options: Vec<ClarificationOption>,
    },
    NotFound {
        category: String,
        original_query: String,
        message: String,
    },
    Error {
        category: String,
        message: String,
    },
}

impl ResolutionResult {
    pub fn phase(&self) -> ResolutionPhase {
        match self {
            ResolutionResult::ExactMatch { .. } => ResolutionPhase::ExactMatch,
            ResolutionResult::HighConfidenceMatch { .. } => ResolutionPhase::HighConfidence,
            ResolutionResult::NeedsClarification { .. } => ResolutionPhase::MediumConfidence,
            ResolutionResult::NotFound { .. } => ResolutionPhase::NoMatch,
            ResolutionResult::Error { .. } => ResolutionPhase::Failed,
        }
    }

    pub fn category(&self) -> &str {
        match self {
            ResolutionResult::ExactMatch { category, .. }
            | ResolutionResult::HighConfidenceMatch { category, .. }
            | ResolutionResult::NeedsClarification { category, .. }
            | ResolutionResult::NotFound { category, .. }
            | ResolutionResult::Error { category, .. } => category,
        }
    }

    /// The canonical value when the resolver settled on a single answer.
    pub fn resolved_value(&self) -> Option<&str> {
        match self {
            ResolutionResult::ExactMatch { value, .. }
            | ResolutionResult::HighConfidenceMatch { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn confidence(&self) -> Option<f64> {
        match self {
            ResolutionResult::ExactMatch { confidence, .. } => Some(*confidence),
            ResolutionResult::HighConfidenceMatch { score, .. } => Some(*score),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_value().is_some()
    }

    /// Lookup faults are retried on the next call, everything else may be memoized.
    pub fn is_cacheable(&self) -> bool {
        !matches!(self, ResolutionResult::Error { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationOption {
    pub value: String,
    pub similarity: f64,
    pub similarity_percent: String,
}

impl ClarificationOption {
    pub fn new(value: impl Into<String>, similarity: f64) -> Self {
        Self {
            value: value.into(),
            similarity,
            similarity_percent: format!("{:.1}%", similarity * 100.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VerifiedEntity {
    pub category: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub valid: bool,
    pub issues: Vec<String>,
}

impl ValidationVerdict {
    pub fn from_issues(issues: Vec<String>) -> Self {
        Self {
            valid: issues.is_empty(),
            issues,
        }
    }

    pub fn rejected(issue: impl Into<String>) -> Self {
        Self {
            valid: false,
            issues: vec![issue.into()],
        }
    }

    pub fn mentions(&self, needle: &str) -> bool {
        self.issues.iter().any(|issue| issue.contains(needle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clarification_percent_has_one_decimal() {
        let option = ClarificationOption::new("Freeman Corp", 0.5457);
        assert_eq!(option.similarity_percent, "54.6%");
    }

    #[test]
    fn resolution_result_is_tagged_by_status() {
        let result = ResolutionResult::ExactMatch {
            category: "customer_name".into(),
            value: "Acme".into(),
            confidence: 1.0,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "exact_match");
        assert_eq!(result.phase(), ResolutionPhase::ExactMatch);
        assert!(result.is_cacheable());
    }

    #[test]
    fn errors_are_never_cacheable() {
        let result = ResolutionResult::Error {
            category: "vendor_name".into(),
            message: "connection reset".into(),
        };
        assert!(!result.is_cacheable());
        assert!(result.resolved_value().is_none());
    }
}
