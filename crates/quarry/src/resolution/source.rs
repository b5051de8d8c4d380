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
use crate::resolution::category::CategorySpec;
use crate::store::ReadOnlyConnection;
use async_trait::async_trait;
use polars::prelude::DataType;
use std::collections::HashMap;
use std::sync::Arc;

/// Supplies the complete distinct value set for one category.
#[async_trait]
pub trait CanonicalValueSource: Send + Sync {
    async fn load(&self, category: &CategorySpec) -> Result<Vec<String>>;
}

/// Runs each category's loader query against the read-only warehouse.
pub struct WarehouseSource {
    conn: Arc<dyn ReadOnlyConnection>,
}

impl WarehouseSource {
    pub fn new(conn: Arc<dyn ReadOnlyConnection>) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl CanonicalValueSource for WarehouseSource {
    async fn load(&self, category: &CategorySpec) -> Result<Vec<String>> {
        let frame = self
            .conn
            .query(&category.loader_query())
            .map_err(|e| QuarryError::lookup(&category.name, e))?;
        let column = frame
            .get_columns()
            .first()
            .ok_or_else(|| QuarryError::lookup(&category.name, "query returned no columns"))?;
        let strings = column
            .as_materialized_series()
            .cast(&DataType::String)
            .map_err(|e| QuarryError::lookup(&category.name, e))?;
        let values = strings
            .str()
            .map_err(|e| QuarryError::lookup(&category.name, e))?
            .into_iter()
            .flatten()
            .map(str::to_string)
            .collect();
        Ok(values)
    }
}

/// Fixed value lists, for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    values: HashMap<String, Vec<String>>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_category<I, S>(mut self, category: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.values.insert(
            category.to_lowercase(),
            values.into_iter().map(Into::into).collect(),
        );
        self
    }
}

#[async_trait]
impl CanonicalValueSource for StaticSource {
    async fn load(&self, category: &CategorySpec) -> Result<Vec<String>> {
        self.values
            .get(&category.name.to_lowercase())
            .cloned()
            .ok_or_else(|| QuarryError::lookup(&category.name, "no static values configured"))
    }
}
