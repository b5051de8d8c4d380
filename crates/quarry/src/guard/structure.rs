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

use crate::script::ast::{walk_expr, walk_program, walk_stmt, Constant, Expr, Stmt, StmtKind, Visitor};
use crate::script::parse;
use crate::telemetry::log_guard_event;
use serde::Serialize;
use serde_json::json;

/// Debug view of a code string: what it imports, calls, assigns and quotes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CodeStructure {
    pub imports: Vec<String>,
    pub function_calls: Vec<String>,
    pub assignments: Vec<String>,
    pub string_literals: Vec<String>,
}

impl Visitor for CodeStructure {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Import(names) => {
                self.imports.extend(names.iter().map(|alias| alias.name.clone()));
            }
            StmtKind::ImportFrom { module, .. } if !module.is_empty() => {
                self.imports.push(module.clone());
            }
            StmtKind::Assign { targets, .. } => {
                self.assignments.extend(targets.iter().filter_map(|target| match target {
                    Expr::Name(name) => Some(name.clone()),
                    _ => None,
                }));
            }
            _ => {}
        }
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Call { func, .. } => {
                let name = match func.as_ref() {
                    Expr::Attribute { attr, .. } => func.dotted_name().unwrap_or_else(|| attr.clone()),
                    other => other.dotted_name().unwrap_or_default(),
                };
                if !name.is_empty() {
                    self.function_calls.push(name);
                }
            }
            Expr::Constant(Constant::Str(text)) => self.string_literals.push(text.clone()),
            _ => {}
        }
        walk_expr(self, expr);
    }
}

pub fn analyze_code_structure(code: &str) -> Result<CodeStructure, String> {
    let program = parse(code).map_err(|err| format!("Syntax error: {err}"))?;
    let mut structure = CodeStructure::default();
    walk_program(&mut structure, &program);
    log_guard_event(
        "structure_analyzed",
        json!({
            "imports": structure.imports.len(),
            "function_calls": structure.function_calls.len(),
            "assignments": structure.assignments.len(),
        }),
    );
    Ok(structure)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_calls_imports_and_literals() {
        let structure = analyze_code_structure(
            "import pandas as pd\ndf = pd.read_sql('SELECT 1', conn)\nresult = df.head(3)\n",
        )
        .unwrap();
        assert_eq!(structure.imports, vec!["pandas"]);
        assert_eq!(structure.function_calls, vec!["pd.read_sql", "df.head"]);
        assert_eq!(structure.assignments, vec!["df", "result"]);
        assert_eq!(structure.string_literals, vec!["SELECT 1"]);
    }

    #[test]
    fn unparsable_code_yields_error() {
        let err = analyze_code_structure("def broken(:\n").unwrap_err();
        assert!(err.starts_with("Syntax error"));
    }
}
