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

use crate::error::QuarryError;
use crate::resolution::cache::CanonicalValueCache;
use crate::resolution::matcher::{decide, MatchDecision};
use crate::resolution::values::normalize_key;
use crate::resolution::verified::VerifiedEntityLog;
use crate::telemetry::log_resolution_event;
use moka::future::Cache;
use quarry_contracts::{CacheSettings, ClarificationOption, MatchThresholds, ResolutionResult};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Serialize)]
pub struct ResolutionCacheInfo {
    pub entries: u64,
    pub ttl_secs: u64,
}

/// Resolves free-text values to canonical ones using a shared value cache and
/// a short-lived memo of previous answers.
pub struct EntityResolver {
    values: Arc<CanonicalValueCache>,
    thresholds: MatchThresholds,
    results: Cache<String, ResolutionResult>,
    ttl: Duration,
}

impl EntityResolver {
    pub fn new(
        values: Arc<CanonicalValueCache>,
        thresholds: MatchThresholds,
        settings: &CacheSettings,
    ) -> Self {
        let results = Cache::builder()
            .max_capacity(settings.resolution_capacity)
            .time_to_live(settings.resolution_ttl())
            .build();
        Self {
            values,
            thresholds,
            results,
            ttl: settings.resolution_ttl(),
        }
    }

    pub fn values(&self) -> &Arc<CanonicalValueCache> {
        &self.values
    }

    pub fn thresholds(&self) -> &MatchThresholds {
        &self.thresholds
    }

    pub async fn resolve(&self, category: &str, raw_value: &str) -> ResolutionResult {
        let Some(spec) = self.values.registry().get(category) else {
            let message = match self.values.registry().suggest(category) {
                Some(close) => {
                    format!("Category '{category}' is not registered. Did you mean '{close}'?")
                }
                None => format!("Category '{category}' is not registered"),
            };
            return ResolutionResult::NotFound {
                category: category.to_string(),
                original_query: raw_value.to_string(),
                message,
            };
        };
        let category = spec.name.clone();
        let needle = normalize_key(raw_value);
        let key = format!("{}:{}", category.to_lowercase(), needle);

        if let Some(hit) = self.results.get(&key).await {
            log_resolution_event(
                "cache_hit",
                json!({ "category": category, "value": raw_value }),
            );
            return hit;
        }

        let result = match self.values.snapshot(&category).await {
            Ok(snapshot) => {
                self.shape(&category, raw_value, decide(&snapshot, &needle, &self.thresholds))
            }
            Err(e) => {
                warn!(category = %category, error = %e, "Canonical lookup failed");
                ResolutionResult::Error {
                    category: category.clone(),
                    message: lookup_message(&e),
                }
            }
        };

        log_resolution_event(
            "resolved",
            json!({
                "category": category,
                "value": raw_value,
                "phase": result.phase(),
                "confidence": result.confidence(),
            }),
        );
        if result.is_cacheable() {
            self.results.insert(key, result.clone()).await;
        }
        result
    }

    /// Resolves and records confirmed answers into the conversation log.
    pub async fn resolve_and_record(
        &self,
        category: &str,
        raw_value: &str,
        log: &mut VerifiedEntityLog,
    ) -> ResolutionResult {
        let result = self.resolve(category, raw_value).await;
        if let Some(value) = result.resolved_value() {
            log.record(result.category(), value);
        }
        result
    }

    fn shape(&self, category: &str, raw_value: &str, decision: MatchDecision) -> ResolutionResult {
        match decision {
            MatchDecision::Exact(value) => ResolutionResult::ExactMatch {
                category: category.to_string(),
                value,
                confidence: 1.0,
            },
            MatchDecision::High { value, score } => ResolutionResult::HighConfidenceMatch {
                category: category.to_string(),
                value,
                score,
            },
            MatchDecision::Medium(candidates) => ResolutionResult::NeedsClarification {
                category: category.to_string(),
                original_query: raw_value.to_string(),
                message: format!(
                    "I found multiple possible matches for '{raw_value}'. Which one did you mean?"
                ),
                options: candidates
                    .into_iter()
                    .map(|(value, score)| ClarificationOption::new(value, score))
                    .collect(),
            },
            MatchDecision::NoMatch => ResolutionResult::NotFound {
                category: category.to_string(),
                original_query: raw_value.to_string(),
                message: format!(
                    "No matching {} found for '{raw_value}'",
                    category.replace('_', " ")
                ),
            },
        }
    }

    pub fn clear_resolution_cache(&self) {
        self.results.invalidate_all();
    }

    pub async fn resolution_cache_info(&self) -> ResolutionCacheInfo {
        self.results.run_pending_tasks().await;
        ResolutionCacheInfo {
            entries: self.results.entry_count(),
            ttl_secs: self.ttl.as_secs(),
        }
    }
}

fn lookup_message(error: &QuarryError) -> String {
    match error {
        QuarryError::LookupFailure { reason, .. } => format!("Entity lookup failed: {reason}"),
        other => format!("Entity lookup failed: {other}"),
    }
}
