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

use crate::config::{EngineConfig, StorageBackend};
use crate::error::Result;
use crate::guard::{analyze_code_structure, CodeSafetyValidator, CodeStructure};
use crate::harness::ExecutionHarness;
use crate::resolution::{
    CacheStats, CanonicalValueCache, CanonicalValueSource, CategoryRegistry, EntityResolver,
    VerifiedEntityLog, WarehouseSource,
};
use crate::store::{FileObjectStore, FrameWarehouse, LargeObjectStore, MemoryObjectStore};
use quarry_contracts::{
    ExecutionOutcome, ResolutionRequest, ResolutionResult, RuntimeContext, ValidationVerdict,
};
use std::sync::Arc;
use tracing::info;

/// Resolver, validator and harness wired over one warehouse.
pub struct QuarryEngine {
    warehouse: Arc<FrameWarehouse>,
    values: Arc<CanonicalValueCache>,
    resolver: EntityResolver,
    validator: CodeSafetyValidator,
    harness: ExecutionHarness,
}

impl QuarryEngine {
    /// Registers the configured CSV tables and loads canonical values from them.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let warehouse = Arc::new(FrameWarehouse::new());
        for table in &config.tables {
            warehouse.register_csv(&table.name, &table.path)?;
        }
        let store: Arc<dyn LargeObjectStore> = match config.storage.backend {
            StorageBackend::File => Arc::new(FileObjectStore::new(
                config.storage.root.clone(),
                config.externalization.link_expiry_days,
            )),
            StorageBackend::Memory => Arc::new(MemoryObjectStore::new(
                config.externalization.link_expiry_days,
            )),
        };
        let source = Arc::new(WarehouseSource::new(warehouse.clone()));
        Self::assemble(config, warehouse, source, store)
    }

    pub fn assemble(
        config: &EngineConfig,
        warehouse: Arc<FrameWarehouse>,
        source: Arc<dyn CanonicalValueSource>,
        store: Arc<dyn LargeObjectStore>,
    ) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(CategoryRegistry::new(config.categories.clone())?);
        let values = Arc::new(CanonicalValueCache::new(
            registry,
            source,
            config.cache.canonical_ttl(),
        ));
        let resolver = EntityResolver::new(values.clone(), config.matching.clone(), &config.cache);
        let validator = CodeSafetyValidator::new();
        let harness = ExecutionHarness::new(validator.clone(), store)
            .with_connection(warehouse.clone())
            .with_limits(config.execution.clone())
            .with_policy(config.externalization.clone());
        info!(
            categories = values.registry().len(),
            tables = config.tables.len(),
            "Engine assembled"
        );
        Ok(Self {
            warehouse,
            values,
            resolver,
            validator,
            harness,
        })
    }

    pub fn warehouse(&self) -> &Arc<FrameWarehouse> {
        &self.warehouse
    }

    pub fn resolver(&self) -> &EntityResolver {
        &self.resolver
    }

    pub fn harness(&self) -> &ExecutionHarness {
        &self.harness
    }

    /// Loads every category up front; returns how many loaded.
    pub async fn warm(&self) -> usize {
        self.values.warm_all().await
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.values.stats()
    }

    pub async fn resolve(&self, category: &str, raw_value: &str) -> ResolutionResult {
        self.resolver.resolve(category, raw_value).await
    }

    /// Resolves each request in order, recording confirmed values into `log`.
    pub async fn resolve_all(
        &self,
        requests: &[ResolutionRequest],
        log: &mut VerifiedEntityLog,
    ) -> Vec<ResolutionResult> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(
                self.resolver
                    .resolve_and_record(&request.category, &request.raw_value, log)
                    .await,
            );
        }
        results
    }

    pub fn map_column_to_category(&self, column: &str) -> Option<&str> {
        self.values.registry().map_column(column)
    }

    pub fn validate(&self, code: &str) -> ValidationVerdict {
        self.validator.validate(code)
    }

    pub fn analyze(&self, code: &str) -> std::result::Result<CodeStructure, String> {
        analyze_code_structure(code)
    }

    pub async fn execute(&self, code: &str, ctx: &RuntimeContext) -> ExecutionOutcome {
        self.harness.execute(code, ctx).await
    }
}
