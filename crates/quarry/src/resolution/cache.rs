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

use crate::error::{QuarryError, Result};
use crate::resolution::category::CategoryRegistry;
use crate::resolution::source::CanonicalValueSource;
use crate::resolution::values::CanonicalValueSet;
use crate::telemetry::{log_cache_event, log_degraded};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

/// Per-category canonical value snapshots.
///
/// Readers clone an `Arc` to the current snapshot. A refresh builds the new
/// set completely before swapping it into the map, and at most one refresh per
/// category runs at a time.
pub struct CanonicalValueCache {
    registry: Arc<CategoryRegistry>,
    source: Arc<dyn CanonicalValueSource>,
    ttl: Duration,
    snapshots: DashMap<String, Arc<CanonicalValueSet>>,
    refresh_locks: DashMap<String, Arc<Mutex<()>>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub loaded: bool,
    pub loaded_at: Option<DateTime<Utc>>,
    pub categories: Vec<String>,
    pub expired: Vec<String>,
    pub total_values: usize,
    pub by_category: BTreeMap<String, usize>,
}

impl CanonicalValueCache {
    pub fn new(
        registry: Arc<CategoryRegistry>,
        source: Arc<dyn CanonicalValueSource>,
        ttl: Duration,
    ) -> Self {
        Self {
            registry,
            source,
            ttl,
            snapshots: DashMap::new(),
            refresh_locks: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &CategoryRegistry {
        &self.registry
    }

    fn fresh(&self, key: &str) -> Option<Arc<CanonicalValueSet>> {
        self.snapshots
            .get(key)
            .filter(|snapshot| !snapshot.is_expired(self.ttl))
            .map(|snapshot| Arc::clone(snapshot.value()))
    }

    fn refresh_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.refresh_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Current snapshot for `category`, loading or refreshing it when missing or expired.
    pub async fn snapshot(&self, category: &str) -> Result<Arc<CanonicalValueSet>> {
        let spec = self
            .registry
            .get(category)
            .ok_or_else(|| QuarryError::UnknownCategory {
                category: category.to_string(),
            })?;
        let key = spec.name.to_lowercase();
        if let Some(snapshot) = self.fresh(&key) {
            return Ok(snapshot);
        }

        let lock = self.refresh_lock(&key);
        let _guard = lock.lock().await;
        if let Some(snapshot) = self.fresh(&key) {
            return Ok(snapshot);
        }

        let values = self.source.load(spec).await?;
        let snapshot = Arc::new(CanonicalValueSet::new(spec.name.clone(), values));
        if snapshot.is_empty() {
            return Err(QuarryError::lookup(&spec.name, "source returned no values"));
        }
        log_cache_event(
            "canonical_refreshed",
            json!({ "category": spec.name, "values": snapshot.len() }),
        );
        self.snapshots.insert(key, Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// Loads every registered category. Failures are logged and skipped.
    pub async fn warm_all(&self) -> usize {
        let names: Vec<String> = self.registry.names().map(str::to_string).collect();
        let loads = names.iter().map(|name| self.snapshot(name));
        let results = futures::future::join_all(loads).await;
        let mut loaded = 0;
        for (name, result) in names.iter().zip(results) {
            match result {
                Ok(_) => loaded += 1,
                Err(e) => log_degraded(&format!("warm {name}"), &e),
            }
        }
        info!(loaded, total = names.len(), "Canonical value cache warmed");
        loaded
    }

    pub fn invalidate(&self, category: &str) -> bool {
        let removed = self
            .snapshots
            .remove(&category.to_lowercase())
            .is_some();
        log_cache_event(
            "canonical_invalidated",
            json!({ "category": category, "removed": removed }),
        );
        removed
    }

    pub fn invalidate_all(&self) {
        self.snapshots.clear();
        log_cache_event("canonical_cleared", json!({}));
    }

    pub fn stats(&self) -> CacheStats {
        let mut by_category = BTreeMap::new();
        let mut expired = Vec::new();
        let mut loaded_at: Option<DateTime<Utc>> = None;
        for entry in self.snapshots.iter() {
            let snapshot = entry.value();
            by_category.insert(snapshot.category().to_string(), snapshot.len());
            if snapshot.is_expired(self.ttl) {
                expired.push(snapshot.category().to_string());
            }
            loaded_at = Some(match loaded_at {
                Some(at) if at >= snapshot.loaded_at() => at,
                _ => snapshot.loaded_at(),
            });
        }
        expired.sort();
        CacheStats {
            loaded: !by_category.is_empty(),
            loaded_at,
            categories: by_category.keys().cloned().collect(),
            expired,
            total_values: by_category.values().sum(),
            by_category,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolution::category::{default_categories, CategorySpec};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts loads; each load is slow enough for concurrent callers to overlap.
    struct CountingSource {
        loads: AtomicUsize,
        empty: bool,
    }

    impl CountingSource {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                loads: AtomicUsize::new(0),
                empty: false,
            })
        }

        fn loads(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CanonicalValueSource for CountingSource {
        async fn load(&self, _category: &CategorySpec) -> Result<Vec<String>> {
            let generation = self.loads.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.empty {
                return Ok(Vec::new());
            }
            Ok(vec![format!("Acme Industries {generation}"), "Globex".to_string()])
        }
    }

    fn cache_over(source: Arc<CountingSource>, ttl: Duration) -> CanonicalValueCache {
        let registry = Arc::new(CategoryRegistry::new(default_categories()).unwrap());
        CanonicalValueCache::new(registry, source, ttl)
    }

    #[tokio::test]
    async fn expired_snapshots_are_reloaded() {
        let source = CountingSource::new();
        let cache = cache_over(source.clone(), Duration::from_millis(150));

        let first = cache.snapshot("customer_name").await.unwrap();
        let again = cache.snapshot("Customer_Name").await.unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(source.loads(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(cache.stats().expired, ["customer_name"]);

        let refreshed = cache.snapshot("customer_name").await.unwrap();
        assert_eq!(source.loads(), 2);
        assert!(!Arc::ptr_eq(&first, &refreshed));
        assert_eq!(refreshed.values()[0], "Acme Industries 2");
        assert_eq!(first.values()[0], "Acme Industries 1");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_cold_reads_share_one_load() {
        let source = CountingSource::new();
        let cache = Arc::new(cache_over(source.clone(), Duration::from_secs(3600)));

        let readers: Vec<_> = (0..16)
            .map(|i| {
                let cache = Arc::clone(&cache);
                let category = if i % 2 == 0 { "customer_name" } else { "CUSTOMER_NAME" };
                tokio::spawn(async move { cache.snapshot(category).await })
            })
            .collect();
        let snapshots: Vec<Arc<CanonicalValueSet>> = futures::future::join_all(readers)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        assert_eq!(source.loads(), 1);
        assert!(snapshots.iter().all(|s| Arc::ptr_eq(s, &snapshots[0])));
        assert_eq!(snapshots[0].len(), 2);
    }

    #[tokio::test]
    async fn categories_refresh_independently() {
        let source = CountingSource::new();
        let cache = cache_over(source.clone(), Duration::from_secs(3600));

        let (customers, products) =
            tokio::join!(cache.snapshot("customer_name"), cache.snapshot("product_name"));
        customers.unwrap();
        products.unwrap();
        assert_eq!(source.loads(), 2);

        assert!(cache.invalidate("product_name"));
        cache.snapshot("customer_name").await.unwrap();
        cache.snapshot("product_name").await.unwrap();
        assert_eq!(source.loads(), 3);
        assert_eq!(cache.stats().total_values, 4);
    }

    #[tokio::test]
    async fn empty_loads_fail_and_are_not_cached() {
        let source = Arc::new(CountingSource {
            loads: AtomicUsize::new(0),
            empty: true,
        });
        let cache = cache_over(source.clone(), Duration::from_secs(3600));

        let err = cache.snapshot("customer_name").await.unwrap_err();
        assert!(matches!(err, QuarryError::LookupFailure { .. }));
        assert!(cache.snapshot("customer_name").await.is_err());
        assert_eq!(source.loads(), 2);
        assert!(!cache.stats().loaded);

        assert!(matches!(
            cache.snapshot("planet_name").await,
            Err(QuarryError::UnknownCategory { .. })
        ));
    }
}
