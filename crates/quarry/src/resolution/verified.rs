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

use quarry_contracts::VerifiedEntity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Append-only record of entities confirmed during one conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerifiedEntityLog {
    conversation_id: String,
    entries: Vec<VerifiedEntity>,
}

impl VerifiedEntityLog {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            entries: Vec::new(),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Returns false when the pair was already recorded.
    pub fn record(&mut self, category: &str, value: &str) -> bool {
        if self.contains(category, value) {
            return false;
        }
        self.entries.push(VerifiedEntity {
            category: category.to_string(),
            value: value.to_string(),
        });
        true
    }

    pub fn contains(&self, category: &str, value: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.category.eq_ignore_ascii_case(category) && e.value == value)
    }

    /// Most recently confirmed value for a category.
    pub fn latest(&self, category: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.category.eq_ignore_ascii_case(category))
            .map(|e| e.value.as_str())
    }

    pub fn entries(&self) -> &[VerifiedEntity] {
        &self.entries
    }

    pub fn by_category(&self) -> BTreeMap<&str, Vec<&str>> {
        let mut grouped: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for entry in &self.entries {
            grouped
                .entry(entry.category.as_str())
                .or_default()
                .push(entry.value.as_str());
        }
        grouped
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_are_not_appended() {
        let mut log = VerifiedEntityLog::new("conv-1");
        assert!(log.record("customer_name", "Freeman Corporation"));
        assert!(!log.record("customer_name", "Freeman Corporation"));
        assert!(log.record("vendor_name", "Contoso"));
        assert!(log.record("customer_name", "Northwind Traders"));
        assert_eq!(log.len(), 3);
        assert_eq!(log.latest("customer_name"), Some("Northwind Traders"));
        assert_eq!(
            log.by_category()["customer_name"],
            vec!["Freeman Corporation", "Northwind Traders"]
        );
    }
}
