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

use async_trait::async_trait;
use polars::prelude::*;
use quarry::resolution::category::default_categories;
use quarry::{
    CacheSettings, CanonicalValueCache, CanonicalValueSource, CategoryRegistry, CategorySpec,
    EntityResolver, FrameWarehouse, MatchThresholds, QuarryError, ResolutionRequest,
    ResolutionResult, StaticSource, VerifiedEntityLog, WarehouseSource,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const CUSTOMERS: [&str; 6] = [
    "Acme Industries",
    "Freeman Corporation",
    "Globex",
    "Contoso Ltd",
    "Contour Labs",
    "Northwind Traders",
];

fn resolver_over(source: Arc<dyn CanonicalValueSource>) -> EntityResolver {
    let registry = Arc::new(CategoryRegistry::new(default_categories()).unwrap());
    let values = Arc::new(CanonicalValueCache::new(
        registry,
        source,
        Duration::from_secs(3600),
    ));
    EntityResolver::new(values, MatchThresholds::default(), &CacheSettings::default())
}

fn resolver() -> EntityResolver {
    resolver_over(Arc::new(
        StaticSource::new()
            .with_category("customer_name", CUSTOMERS)
            .with_category("employee_name", ["42", "Ana Lima"]),
    ))
}

/// Fails the first `failures` loads, then serves a fixed list.
struct FlakySource {
    calls: AtomicUsize,
    failures: usize,
}

#[async_trait]
impl CanonicalValueSource for FlakySource {
    async fn load(&self, category: &CategorySpec) -> quarry::Result<Vec<String>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(QuarryError::lookup(&category.name, "connection reset"));
        }
        Ok(vec!["Globex".to_string()])
    }
}

#[tokio::test]
async fn exact_match_ignores_case() {
    let resolver = resolver();
    for raw in ["Contoso Ltd", "CONTOSO LTD", "  contoso ltd "] {
        match resolver.resolve("customer_name", raw).await {
            ResolutionResult::ExactMatch {
                value, confidence, ..
            } => {
                assert_eq!(value, "Contoso Ltd");
                assert_eq!(confidence, 1.0);
            }
            other => panic!("{raw}: {other:?}"),
        }
    }
}

#[tokio::test]
async fn prefixes_get_the_substring_boost() {
    match resolver().resolve("customer_name", "Freeman").await {
        ResolutionResult::HighConfidenceMatch { value, score, .. } => {
            assert_eq!(value, "Freeman Corporation");
            assert!(score >= 0.85, "{score}");
        }
        other => panic!("{other:?}"),
    }
}

#[tokio::test]
async fn middling_scores_ask_for_clarification() {
    match resolver().resolve("customer_name", "contx").await {
        ResolutionResult::NeedsClarification {
            options, message, ..
        } => {
            let values: Vec<_> = options.iter().map(|o| o.value.as_str()).collect();
            assert_eq!(values, ["Contoso Ltd", "Contour Labs"]);
            assert!(options[0].similarity > options[1].similarity);
            assert_eq!(options[0].similarity_percent, "50.0%");
            assert_eq!(
                message,
                "I found multiple possible matches for 'contx'. Which one did you mean?"
            );
        }
        other => panic!("{other:?}"),
    }
}

#[tokio::test]
async fn unrelated_input_is_not_found() {
    match resolver()
        .resolve("customer_name", "totally-unrelated-garbage-string-xyz")
        .await
    {
        ResolutionResult::NotFound { message, .. } => assert_eq!(
            message,
            "No matching customer name found for 'totally-unrelated-garbage-string-xyz'"
        ),
        other => panic!("{other:?}"),
    }
}

#[tokio::test]
async fn numeric_text_is_normalized() {
    let result = resolver().resolve("employee_name", "42.0").await;
    assert_eq!(result.resolved_value(), Some("42"));
    assert_eq!(result.confidence(), Some(1.0));
}

#[tokio::test]
async fn unknown_categories_are_not_found_with_a_hint() {
    match resolver().resolve("customer_nam", "Globex").await {
        ResolutionResult::NotFound { message, .. } => {
            assert!(message.contains("not registered"), "{message}");
            assert!(message.contains("customer_name"), "{message}");
        }
        other => panic!("{other:?}"),
    }
}

#[tokio::test]
async fn lookup_failures_are_retried_not_cached() {
    let source = Arc::new(FlakySource {
        calls: AtomicUsize::new(0),
        failures: 1,
    });
    let resolver = resolver_over(source.clone());

    let first = resolver.resolve("vendor_name", "Globex").await;
    assert!(matches!(first, ResolutionResult::Error { .. }), "{first:?}");
    assert_eq!(resolver.resolution_cache_info().await.entries, 0);

    let second = resolver.resolve("vendor_name", "Globex").await;
    assert_eq!(second.resolved_value(), Some("Globex"));
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    assert_eq!(resolver.resolution_cache_info().await.entries, 1);

    resolver.resolve("vendor_name", "GLOBEX").await;
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn invalidation_forces_a_reload() {
    let source = Arc::new(FlakySource {
        calls: AtomicUsize::new(0),
        failures: 0,
    });
    let resolver = resolver_over(source.clone());
    resolver.resolve("vendor_name", "Globex").await;
    resolver.clear_resolution_cache();
    assert!(resolver.values().invalidate("vendor_name"));
    resolver.resolve("vendor_name", "Globex").await;
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn warming_skips_categories_that_fail() {
    let resolver = resolver();
    let loaded = resolver.values().warm_all().await;
    assert_eq!(loaded, 2);
    let stats = resolver.values().stats();
    assert!(stats.loaded);
    assert_eq!(stats.total_values, CUSTOMERS.len() + 2);
    assert_eq!(stats.by_category["customer_name"], CUSTOMERS.len());
}

#[tokio::test]
async fn confirmed_answers_are_logged_once() {
    let resolver = resolver();
    let mut log = VerifiedEntityLog::new("conv-1");
    let requests = [
        ResolutionRequest::new("customer_name", "globex"),
        ResolutionRequest::new("customer_name", "Freeman"),
        ResolutionRequest::new("customer_name", "GLOBEX"),
        ResolutionRequest::new("customer_name", "contx"),
    ];
    for request in &requests {
        resolver
            .resolve_and_record(&request.category, &request.raw_value, &mut log)
            .await;
    }
    assert_eq!(log.len(), 2);
    assert_eq!(
        log.by_category()["customer_name"],
        ["Globex", "Freeman Corporation"]
    );
}

#[tokio::test]
async fn canonical_values_load_from_the_warehouse() {
    let customers = df!(
        "customer_name" => [Some("Globex"), None, Some("Acme Industries"), Some("Globex")],
    )
    .unwrap();
    let warehouse = Arc::new(FrameWarehouse::new().with_table("vw_customers_master", customers));
    let resolver = resolver_over(Arc::new(WarehouseSource::new(warehouse)));

    let category = resolver
        .values()
        .registry()
        .map_column("Customer_Full_Name")
        .unwrap()
        .to_string();
    let result = resolver.resolve(&category, "acme industries").await;
    assert_eq!(result.resolved_value(), Some("Acme Industries"));
    let snapshot = resolver.values().snapshot("customer_name").await.unwrap();
    assert_eq!(snapshot.len(), 2);
}
