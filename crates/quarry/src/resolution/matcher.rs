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

use crate::resolution::similarity::ratio;
use crate::resolution::values::CanonicalValueSet;
use quarry_contracts::MatchThresholds;

#[derive(Debug, Clone, PartialEq)]
pub enum MatchDecision {
    Exact(String),
    High { value: String, score: f64 },
    Medium(Vec<(String, f64)>),
    NoMatch,
}

/// Three-phase decision for a normalized needle against one snapshot.
pub fn decide(set: &CanonicalValueSet, needle: &str, thresholds: &MatchThresholds) -> MatchDecision {
    if let Some(value) = set.exact(needle) {
        return MatchDecision::Exact(value.to_string());
    }

    let mut best: Option<(&str, f64)> = None;
    let mut medium: Vec<(&str, f64)> = Vec::new();
    for (value, key) in set.entries() {
        let raw = ratio(needle, key);
        let contained = !needle.is_empty() && (key.contains(needle) || needle.contains(key));
        let effective = if contained && raw >= thresholds.substring_floor {
            Some(raw.max(thresholds.substring_boost))
        } else if raw >= thresholds.high_confidence {
            Some(raw)
        } else {
            None
        };
        match effective {
            Some(score) => {
                if best.map_or(true, |(_, top)| score > top) {
                    best = Some((value, score));
                }
            }
            None if raw >= thresholds.medium_confidence => medium.push((value, raw)),
            None => {}
        }
    }

    if let Some((value, score)) = best {
        return MatchDecision::High {
            value: value.to_string(),
            score,
        };
    }
    if medium.is_empty() {
        return MatchDecision::NoMatch;
    }
    medium.sort_by(|a, b| b.1.total_cmp(&a.1));
    medium.truncate(thresholds.max_options);
    MatchDecision::Medium(
        medium
            .into_iter()
            .map(|(value, score)| (value.to_string(), score))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolution::values::normalize_key;

    fn set(values: &[&str]) -> CanonicalValueSet {
        CanonicalValueSet::new("customer_name", values.iter().map(|v| v.to_string()))
    }

    #[test]
    fn exact_match_returns_canonical_casing() {
        let decision = decide(
            &set(&["Freeman Corporation", "Contoso"]),
            &normalize_key("CONTOSO"),
            &MatchThresholds::default(),
        );
        assert_eq!(decision, MatchDecision::Exact("Contoso".into()));
    }

    #[test]
    fn prefix_gets_substring_boost() {
        let decision = decide(
            &set(&["Freeman Corporation", "Northwind Traders"]),
            "freeman",
            &MatchThresholds::default(),
        );
        match decision {
            MatchDecision::High { value, score } => {
                assert_eq!(value, "Freeman Corporation");
                assert_eq!(score, 0.85);
            }
            other => panic!("unexpected decision {other:?}"),
        }
    }

    #[test]
    fn ties_resolve_to_lexically_first() {
        let decision = decide(&set(&["abcx", "abcy"]), "abcz", &MatchThresholds::default());
        assert_eq!(
            decision,
            MatchDecision::High {
                value: "abcx".into(),
                score: 0.75
            }
        );
    }

    #[test]
    fn medium_band_is_ranked_and_capped() {
        let thresholds = MatchThresholds {
            max_options: 1,
            ..MatchThresholds::default()
        };
        let decision = decide(
            &set(&["abcdefghizzzzzzzzzzz", "abcdefghijkzzzzzzzzz"]),
            "abcdefghijklmnopqrst",
            &thresholds,
        );
        assert_eq!(
            decision,
            MatchDecision::Medium(vec![("abcdefghijkzzzzzzzzz".into(), 0.55)])
        );
    }

    #[test]
    fn low_scores_are_no_match() {
        let decision = decide(&set(&["Contoso"]), "xyz", &MatchThresholds::default());
        assert_eq!(decision, MatchDecision::NoMatch);
    }
}
