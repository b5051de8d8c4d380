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
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

/// Lowercased, trimmed form used for comparison. Numeric-looking input that
/// round-trips as a whole number collapses to its integer spelling, so "42.0"
/// and "42" compare equal.
pub fn normalize_key(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Ok(number) = trimmed.parse::<f64>() {
        if number.is_finite() && number.fract() == 0.0 && number.abs() < 1e15 {
            return format!("{}", number as i64);
        }
    }
    trimmed.to_lowercase()
}

/// Snapshot of the distinct values of one category. Replaced wholesale on refresh.
#[derive(Debug, Clone)]
pub struct CanonicalValueSet {
    category: String,
    values: Vec<String>,
    keys: Vec<String>,
    exact: HashMap<String, usize>,
    loaded_at: DateTime<Utc>,
    loaded: Instant,
}

impl CanonicalValueSet {
    /// Values are deduplicated and kept in lexical order, which fixes tie-breaking.
    pub fn new(category: impl Into<String>, values: impl IntoIterator<Item = String>) -> Self {
        let values: Vec<String> = values
            .into_iter()
            .filter(|v| !v.trim().is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let keys: Vec<String> = values.iter().map(|v| normalize_key(v)).collect();
        let mut exact = HashMap::with_capacity(keys.len());
        for (idx, key) in keys.iter().enumerate() {
            exact.entry(key.clone()).or_insert(idx);
        }
        Self {
            category: category.into(),
            values,
            keys,
            exact,
            loaded_at: Utc::now(),
            loaded: Instant::now(),
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn age(&self) -> Duration {
        self.loaded.elapsed()
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.age() >= ttl
    }

    /// Canonical casing for a normalized key.
    pub fn exact(&self, key: &str) -> Option<&str> {
        self.exact.get(key).map(|&idx| self.values[idx].as_str())
    }

    /// `(canonical, normalized)` pairs in deterministic order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values
            .iter()
            .map(String::as_str)
            .zip(self.keys.iter().map(String::as_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_spellings_collapse() {
        assert_eq!(normalize_key("42.0"), "42");
        assert_eq!(normalize_key(" 42 "), "42");
        assert_eq!(normalize_key("42.5"), "42.5");
        assert_eq!(normalize_key("NaN"), "nan");
        assert_eq!(normalize_key("Road Bikes"), "road bikes");
    }

    #[test]
    fn set_is_sorted_and_deduplicated() {
        let set = CanonicalValueSet::new(
            "product_category",
            vec!["Clothing".to_string(), "Bikes".into(), "Clothing".into(), " ".into()],
        );
        assert_eq!(set.values(), ["Bikes", "Clothing"]);
        assert_eq!(set.exact("bikes"), Some("Bikes"));
        assert!(!set.is_expired(Duration::from_secs(60)));
    }
}
