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
use parking_lot::RwLock;
use polars::prelude::*;
use polars::sql::SQLContext;
use sqlparser::ast::{ObjectName, Query, Statement, TableFactor, Visit, Visitor};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::collections::HashSet;
use std::ops::ControlFlow;
use std::path::Path;
use tracing::debug;

/// Query access handed to executed code. Implementations must refuse mutation.
pub trait ReadOnlyConnection: Send + Sync {
    fn query(&self, sql: &str) -> Result<DataFrame>;

    fn table_names(&self) -> Vec<String>;
}

/// Accepts exactly one statement, and only a read query.
pub fn ensure_read_only(sql: &str) -> Result<()> {
    parse_read_query(sql).map(|_| ())
}

fn parse_read_query(sql: &str) -> Result<Statement> {
    let mut statements = Parser::parse_sql(&GenericDialect {}, sql)
        .map_err(|e| QuarryError::QueryRejected(format!("unparseable query: {e}")))?;
    match statements.as_slice() {
        [Statement::Query(_)] => {}
        [] => return Err(QuarryError::QueryRejected("empty query".to_string())),
        [_] => {
            let keyword = sql
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_uppercase();
            return Err(QuarryError::QueryRejected(format!(
                "{keyword} statements are not allowed on a read-only connection"
            )));
        }
        many => {
            return Err(QuarryError::QueryRejected(format!(
                "expected a single statement, found {}",
                many.len()
            )))
        }
    }
    Ok(statements.swap_remove(0))
}

/// Read query whose relations are all registered tables or its own CTEs.
/// Table functions such as `read_csv(...)` are refused.
pub fn ensure_registered_relations(sql: &str, tables: &[String]) -> Result<()> {
    let statement = parse_read_query(sql)?;
    let mut check = RelationCheck {
        tables: tables.iter().map(|t| t.to_lowercase()).collect(),
        ctes: HashSet::new(),
    };
    match statement.visit(&mut check) {
        ControlFlow::Continue(()) => Ok(()),
        ControlFlow::Break(err) => Err(err),
    }
}

struct RelationCheck {
    tables: HashSet<String>,
    ctes: HashSet<String>,
}

impl RelationCheck {
    fn resolve(&self, name: &ObjectName) -> ControlFlow<QuarryError> {
        let bare = relation_key(name);
        if self.tables.contains(&bare) || self.ctes.contains(&bare) {
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break(QuarryError::UnknownTable(name.to_string()))
        }
    }
}

impl Visitor for RelationCheck {
    type Break = QuarryError;

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.ctes.insert(cte.alias.name.value.to_lowercase());
            }
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<Self::Break> {
        match factor {
            TableFactor::Table {
                name,
                args: Some(_),
                ..
            }
            | TableFactor::Function { name, .. } => ControlFlow::Break(QuarryError::QueryRejected(
                format!("table function {name} is not available on a read-only connection"),
            )),
            TableFactor::TableFunction { .. } => ControlFlow::Break(QuarryError::QueryRejected(
                "table functions are not available on a read-only connection".to_string(),
            )),
            TableFactor::Table { name, .. } => self.resolve(name),
            _ => ControlFlow::Continue(()),
        }
    }
}

fn relation_key(name: &ObjectName) -> String {
    name.to_string()
        .chars()
        .filter(|c| !matches!(c, '"' | '`' | '[' | ']'))
        .collect::<String>()
        .to_lowercase()
}

/// In-memory tables answered through the polars SQL engine.
#[derive(Default)]
pub struct FrameWarehouse {
    tables: RwLock<IndexMap<String, DataFrame>>,
}

impl FrameWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, frame: DataFrame) {
        debug!(table = name, rows = frame.height(), "Registered warehouse table");
        self.tables.write().insert(name.to_string(), frame);
    }

    pub fn register_csv(&self, name: &str, path: &Path) -> Result<()> {
        let file = std::fs::File::open(path)?;
        let frame = CsvReader::new(file).finish()?;
        self.register(name, frame);
        Ok(())
    }

    pub fn with_table(self, name: &str, frame: DataFrame) -> Self {
        self.register(name, frame);
        self
    }
}

impl ReadOnlyConnection for FrameWarehouse {
    fn query(&self, sql: &str) -> Result<DataFrame> {
        ensure_registered_relations(sql, &self.table_names())?;
        let mut ctx = SQLContext::new();
        for (name, frame) in self.tables.read().iter() {
            ctx.register(name, frame.clone().lazy());
        }
        let frame = ctx.execute(sql)?.collect()?;
        Ok(frame)
    }

    fn table_names(&self) -> Vec<String> {
        self.tables.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warehouse() -> FrameWarehouse {
        let frame = df!(
            "vendor_name" => ["Contoso", "Fabrikam", "Contoso"],
            "spend" => [10.0, 20.0, 5.0]
        )
        .unwrap();
        FrameWarehouse::new().with_table("vw_vendors_master", frame)
    }

    #[test]
    fn answers_select_queries() {
        let frame = warehouse()
            .query("SELECT DISTINCT vendor_name FROM vw_vendors_master WHERE vendor_name IS NOT NULL")
            .unwrap();
        assert_eq!(frame.height(), 2);
    }

    #[test]
    fn refuses_mutation() {
        let err = warehouse()
            .query("DELETE FROM vw_vendors_master")
            .unwrap_err();
        assert!(err.to_string().contains("DELETE"));
        assert!(ensure_read_only("SELECT 1; DROP TABLE x").is_err());
    }

    #[test]
    fn refuses_file_reading_table_functions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.csv");
        std::fs::write(&path, "token\nhunter2\n").unwrap();

        for sql in [
            format!("SELECT * FROM read_csv('{}')", path.display()),
            format!(
                "SELECT v.vendor_name FROM vw_vendors_master v JOIN read_csv('{}') s ON true",
                path.display()
            ),
            format!(
                "SELECT * FROM (SELECT * FROM read_parquet('{}')) AS nested",
                path.display()
            ),
        ] {
            let err = warehouse().query(&sql).unwrap_err();
            assert!(
                matches!(err, QuarryError::QueryRejected(ref m) if m.contains("table function")),
                "{sql}: {err}"
            );
        }
    }

    #[test]
    fn refuses_unregistered_tables() {
        let err = warehouse()
            .query("SELECT * FROM vw_customers_master")
            .unwrap_err();
        assert!(matches!(err, QuarryError::UnknownTable(ref t) if t == "vw_customers_master"));
    }

    #[test]
    fn accepts_ctes_and_quoted_names() {
        let tables = vec!["vw_vendors_master".to_string()];
        ensure_registered_relations(
            "WITH big AS (SELECT * FROM \"vw_vendors_master\" WHERE spend > 5) SELECT * FROM big",
            &tables,
        )
        .unwrap();
        let frame = warehouse()
            .query("WITH big AS (SELECT * FROM vw_vendors_master WHERE spend > 5) SELECT vendor_name FROM big")
            .unwrap();
        assert_eq!(frame.height(), 2);
    }
}
