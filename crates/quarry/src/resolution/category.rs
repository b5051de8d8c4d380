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
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A registered class of business entity and where its canonical values live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySpec {
    pub name: String,
    pub column: String,
    pub view: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl CategorySpec {
    pub fn new(name: &str, column: &str, view: &str) -> Self {
        Self {
            name: name.to_string(),
            column: column.to_string(),
            view: view.to_string(),
            aliases: Vec::new(),
        }
    }

    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn loader_query(&self) -> String {
        format!(
            "SELECT DISTINCT {col} FROM {view} WHERE {col} IS NOT NULL",
            col = self.column,
            view = self.view
        )
    }
}

pub fn default_categories() -> Vec<CategorySpec> {
    vec![
        CategorySpec::new("customer_name", "customer_name", "vw_customers_master")
            .with_aliases(&["customer_full_name"]),
        CategorySpec::new("salesperson_name", "salesperson_name", "vw_salesperson_master")
            .with_aliases(&["salesperson_full_name"]),
        CategorySpec::new("territory_name", "territory_name", "vw_sales_territory_master")
            .with_aliases(&["sales_territory_name"]),
        CategorySpec::new("product_name", "product_name", "vw_products_master"),
        CategorySpec::new("product_category", "product_category", "vw_products_master"),
        CategorySpec::new("product_subcategory", "product_subcategory", "vw_products_master"),
        CategorySpec::new("model_name", "model_name", "vw_products_master"),
        CategorySpec::new("location_name", "location_name", "vw_inventory_current"),
        CategorySpec::new("vendor_name", "vendor_name", "vw_vendors_master"),
        CategorySpec::new("employee_name", "employee_name", "vw_employees_master")
            .with_aliases(&["employee_full_name"]),
        CategorySpec::new("department_name", "department_name", "vw_departments_master"),
        CategorySpec::new("shift_name", "shift_name", "vw_employee_dept_history"),
    ]
}

/// Immutable after construction; lookups are case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct CategoryRegistry {
    specs: IndexMap<String, CategorySpec>,
    columns: HashMap<String, String>,
}

impl CategoryRegistry {
    pub fn new(specs: Vec<CategorySpec>) -> Result<Self> {
        let mut registry = Self::default();
        for spec in specs {
            let key = spec.name.to_lowercase();
            if registry.specs.contains_key(&key) {
                return Err(QuarryError::configuration(format!(
                    "category '{}' registered twice",
                    spec.name
                )));
            }
            registry.columns.insert(key.clone(), key.clone());
            registry
                .columns
                .insert(spec.column.to_lowercase(), key.clone());
            for alias in &spec.aliases {
                registry.columns.insert(alias.to_lowercase(), key.clone());
            }
            registry.specs.insert(key, spec);
        }
        Ok(registry)
    }

    pub fn get(&self, category: &str) -> Option<&CategorySpec> {
        self.specs.get(&category.to_lowercase())
    }

    pub fn contains(&self, category: &str) -> bool {
        self.get(category).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.specs.values().map(|spec| spec.name.as_str())
    }

    pub fn specs(&self) -> impl Iterator<Item = &CategorySpec> {
        self.specs.values()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Category that a result column refers to, if any.
    pub fn map_column(&self, column: &str) -> Option<&str> {
        let key = self.columns.get(&column.trim().to_lowercase())?;
        self.specs.get(key).map(|spec| spec.name.as_str())
    }

    /// Closest registered name, for error messages.
    pub fn suggest(&self, category: &str) -> Option<&str> {
        let needle = category.to_lowercase();
        self.names()
            .map(|name| (name, strsim::jaro_winkler(&needle, name)))
            .filter(|(_, score)| *score >= 0.8)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(name, _)| name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> CategoryRegistry {
        CategoryRegistry::new(default_categories()).unwrap()
    }

    #[test]
    fn loader_query_selects_distinct_non_null() {
        let spec = CategorySpec::new("vendor_name", "vendor_name", "vw_vendors_master");
        assert_eq!(
            spec.loader_query(),
            "SELECT DISTINCT vendor_name FROM vw_vendors_master WHERE vendor_name IS NOT NULL"
        );
    }

    #[test]
    fn column_aliases_map_to_categories() {
        let registry = registry();
        assert_eq!(registry.map_column("Customer_Full_Name"), Some("customer_name"));
        assert_eq!(registry.map_column("sales_territory_name"), Some("territory_name"));
        assert_eq!(registry.map_column("shift_name"), Some("shift_name"));
        assert_eq!(registry.map_column("order_total"), None);
    }

    #[test]
    fn lookup_ignores_case() {
        let registry = registry();
        assert!(registry.contains("VENDOR_NAME"));
        assert!(!registry.contains("vendor"));
        assert_eq!(registry.suggest("vendor_nme"), Some("vendor_name"));
    }
}
