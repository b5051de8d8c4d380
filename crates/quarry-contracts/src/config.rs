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
use std::time::Duration;

/// Score bands for the three-phase matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchThresholds {
    #[serde(default = "default_high_confidence")]
    pub high_confidence: f64,
    #[serde(default = "default_substring_floor")]
    pub substring_floor: f64,
    #[serde(default = "default_substring_boost")]
    pub substring_boost: f64,
    #[serde(default = "default_medium_confidence")]
    pub medium_confidence: f64,
    #[serde(default = "default_max_options")]
    pub max_options: usize,
}

fn default_high_confidence() -> f64 {
    0.60
}

fn default_substring_floor() -> f64 {
    0.50
}

fn default_substring_boost() -> f64 {
    0.85
}

fn default_medium_confidence() -> f64 {
    0.40
}

fn default_max_options() -> usize {
    5
}

impl Default for MatchThresholds {
    fn default() -> Self {
        Self {
            high_confidence: default_high_confidence(),
            substring_floor: default_substring_floor(),
            substring_boost: default_substring_boost(),
            medium_confidence: default_medium_confidence(),
            max_options: default_max_options(),
        }
    }
}

impl MatchThresholds {
    pub fn check(&self) -> Result<(), String> {
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if ![
            self.high_confidence,
            self.substring_floor,
            self.substring_boost,
            self.medium_confidence,
        ]
        .into_iter()
        .all(in_unit)
        {
            return Err("thresholds must lie in [0, 1]".to_string());
        }
        if self.medium_confidence > self.high_confidence {
            return Err(format!(
                "medium_confidence ({}) exceeds high_confidence ({})",
                self.medium_confidence, self.high_confidence
            ));
        }
        if self.max_options == 0 {
            return Err("max_options must be at least 1".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_resolution_ttl_secs")]
    pub resolution_ttl_secs: u64,
    #[serde(default = "default_canonical_ttl_secs")]
    pub canonical_ttl_secs: u64,
    #[serde(default = "default_resolution_capacity")]
    pub resolution_capacity: u64,
}

fn default_resolution_ttl_secs() -> u64 {
    120
}

fn default_canonical_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_resolution_capacity() -> u64 {
    10_000
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            resolution_ttl_secs: default_resolution_ttl_secs(),
            canonical_ttl_secs: default_canonical_ttl_secs(),
            resolution_capacity: default_resolution_capacity(),
        }
    }
}

impl CacheSettings {
    pub fn resolution_ttl(&self) -> Duration {
        Duration::from_secs(self.resolution_ttl_secs)
    }

    pub fn canonical_ttl(&self) -> Duration {
        Duration::from_secs(self.canonical_ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLimits {
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    #[serde(default = "default_date_format")]
    pub date_format: String,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    #[serde(default = "default_max_collection_len")]
    pub max_collection_len: usize,
}

fn default_gas_limit() -> u64 {
    1_000_000
}

fn default_date_format() -> String {
    "%Y-%m-%d".to_string()
}

fn default_max_output_bytes() -> usize {
    64 * 1024
}

fn default_max_collection_len() -> usize {
    10_000_000
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            gas_limit: default_gas_limit(),
            date_format: default_date_format(),
            max_output_bytes: default_max_output_bytes(),
            max_collection_len: default_max_collection_len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalizationPolicy {
    #[serde(default = "default_inline_row_limit")]
    pub inline_row_limit: usize,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_link_expiry_days")]
    pub link_expiry_days: i64,
}

fn default_inline_row_limit() -> usize {
    5
}

fn default_format() -> String {
    "csv".to_string()
}

fn default_link_expiry_days() -> i64 {
    7
}

impl Default for ExternalizationPolicy {
    fn default() -> Self {
        Self {
            inline_row_limit: default_inline_row_limit(),
            format: default_format(),
            link_expiry_days: default_link_expiry_days(),
        }
    }
}

impl ExternalizationPolicy {
    pub fn should_externalize(&self, rows: usize) -> bool {
        rows > self.inline_row_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let thresholds: MatchThresholds = serde_yaml::from_str("high_confidence: 0.7").unwrap();
        assert_eq!(thresholds.high_confidence, 0.7);
        assert_eq!(thresholds.substring_boost, 0.85);
        assert_eq!(thresholds.max_options, 5);
    }

    #[test]
    fn execution_limits_fill_missing_fields() {
        let limits: ExecutionLimits = serde_yaml::from_str("max_collection_len: 500").unwrap();
        assert_eq!(limits.max_collection_len, 500);
        assert_eq!(limits.gas_limit, 1_000_000);
        assert_eq!(ExecutionLimits::default().max_collection_len, 10_000_000);
    }

    #[test]
    fn inverted_bands_are_rejected() {
        let thresholds = MatchThresholds {
            medium_confidence: 0.9,
            ..MatchThresholds::default()
        };
        assert!(thresholds.check().is_err());
        assert!(MatchThresholds::default().check().is_ok());
    }

    #[test]
    fn externalizes_strictly_above_limit() {
        let policy = ExternalizationPolicy::default();
        assert!(!policy.should_externalize(5));
        assert!(policy.should_externalize(6));
    }
}
