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
use crate::resolution::category::{default_categories, CategorySpec};
use quarry_contracts::{CacheSettings, ExecutionLimits, ExternalizationPolicy, MatchThresholds};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "QUARRY";
pub const CONFIG_PATH_VAR: &str = "QUARRY_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub matching: MatchThresholds,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub execution: ExecutionLimits,
    #[serde(default)]
    pub externalization: ExternalizationPolicy,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default = "default_categories")]
    pub categories: Vec<CategorySpec>,
    #[serde(default)]
    pub tables: Vec<TableSource>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            matching: MatchThresholds::default(),
            cache: CacheSettings::default(),
            execution: ExecutionLimits::default(),
            externalization: ExternalizationPolicy::default(),
            storage: StorageSettings::default(),
            categories: default_categories(),
            tables: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    File,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("analysis_results")
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            root: default_storage_root(),
        }
    }
}

/// A CSV file registered as a warehouse table at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSource {
    pub name: String,
    pub path: PathBuf,
}

impl EngineConfig {
    /// Layers an optional config file under `QUARRY__`-prefixed environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );
        let config: EngineConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Resolves the file from `QUARRY_CONFIG` when it is set.
    pub fn load_from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) if !path.trim().is_empty() => Self::load(Some(Path::new(path.trim()))),
            _ => Self::load(None),
        }
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.matching.check().map_err(QuarryError::Configuration)?;
        if self.cache.resolution_ttl_secs == 0 || self.cache.canonical_ttl_secs == 0 {
            return Err(QuarryError::configuration("cache TTLs must be positive"));
        }
        if self.cache.resolution_ttl_secs >= self.cache.canonical_ttl_secs {
            return Err(QuarryError::configuration(format!(
                "resolution TTL ({}s) must be shorter than canonical TTL ({}s)",
                self.cache.resolution_ttl_secs, self.cache.canonical_ttl_secs
            )));
        }
        if self.execution.gas_limit == 0 {
            return Err(QuarryError::configuration("gas_limit must be positive"));
        }
        if self.categories.is_empty() {
            return Err(QuarryError::configuration("no categories registered"));
        }
        let mut seen = std::collections::HashSet::new();
        for category in &self.categories {
            if !seen.insert(category.name.to_lowercase()) {
                return Err(QuarryError::configuration(format!(
                    "category '{}' registered twice",
                    category.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_cover_every_known_category() {
        let config = EngineConfig::default();
        assert_eq!(config.categories.len(), 12);
        assert_eq!(config.cache.resolution_ttl_secs, 120);
        assert_eq!(config.externalization.inline_row_limit, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn yaml_overrides_thresholds_only() {
        let config = EngineConfig::from_yaml_str(
            "matching:\n  substring_boost: 0.9\nexternalization:\n  inline_row_limit: 10\n",
        )
        .unwrap();
        assert_eq!(config.matching.substring_boost, 0.9);
        assert_eq!(config.matching.high_confidence, 0.60);
        assert_eq!(config.externalization.inline_row_limit, 10);
    }

    #[test]
    fn rejects_duplicate_categories() {
        let yaml = r#"
categories:
  - name: vendor_name
    column: vendor_name
    view: vw_vendors_master
  - name: Vendor_Name
    column: vendor_name
    view: vw_vendors_master
"#;
        assert!(matches!(
            EngineConfig::from_yaml_str(yaml),
            Err(QuarryError::Configuration(_))
        ));
    }

    #[test]
    fn loads_file_through_config_builder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "cache:\n  resolution_ttl_secs: 30\nstorage:\n  backend: memory").unwrap();
        let config = EngineConfig::load(Some(&path)).unwrap();
        assert_eq!(config.cache.resolution_ttl_secs, 30);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
    }
}
