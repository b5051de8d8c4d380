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

pub mod denylist;
pub mod query_scan;
pub mod structure;

pub use structure::{analyze_code_structure, CodeStructure};

use crate::script::ast::{walk_expr, walk_program, walk_stmt, Expr, Program, Stmt, StmtKind, Visitor};
use crate::script::parse;
use crate::telemetry::log_guard_event;
use denylist::{is_forbidden_module, DANGEROUS_CALLS, DANGEROUS_METHODS, FILE_METHODS, FILE_PRIMITIVES};
use quarry_contracts::ValidationVerdict;
use serde_json::json;
use tracing::{info, warn};

pub const RESULT_BINDING: &str = "result";

/// Per-check findings, kept apart so the verdict lists them check by check.
#[derive(Default)]
struct Findings {
    dangerous_calls: Vec<String>,
    forbidden_imports: Vec<String>,
    file_operations: Vec<String>,
}

impl Visitor for Findings {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Import(names) => {
                self.forbidden_imports.extend(
                    names
                        .iter()
                        .filter(|alias| is_forbidden_module(&alias.name))
                        .map(|alias| alias.name.clone()),
                );
            }
            StmtKind::ImportFrom { module, .. } if is_forbidden_module(module) => {
                self.forbidden_imports.push(module.clone());
            }
            _ => {}
        }
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        if let Expr::Call { func, .. } = expr {
            match func.as_ref() {
                Expr::Name(name) => {
                    if DANGEROUS_CALLS.contains(&name.as_str()) {
                        self.dangerous_calls.push(name.clone());
                    }
                    if FILE_PRIMITIVES.contains(&name.as_str()) {
                        self.file_operations.push(name.clone());
                    }
                }
                Expr::Attribute { attr, .. } => {
                    if DANGEROUS_METHODS.contains(&attr.as_str()) {
                        self.dangerous_calls.push(attr.clone());
                    }
                    if FILE_METHODS.contains(&attr.as_str()) {
                        self.file_operations.push(format!("file.{attr}"));
                    }
                }
                _ => {}
            }
        }
        walk_expr(self, expr);
    }
}

fn binds_name(target: &Expr, binding: &str) -> bool {
    match target {
        Expr::Name(name) => name == binding,
        Expr::Tuple(items) | Expr::List(items) => items.iter().any(|item| binds_name(item, binding)),
        _ => false,
    }
}

/// Module-scope assignment, looking through control flow but not into function bodies.
fn assigns_at_module_scope(body: &[Stmt], binding: &str) -> bool {
    body.iter().any(|stmt| match &stmt.kind {
        StmtKind::Assign { targets, .. } => targets.iter().any(|t| binds_name(t, binding)),
        StmtKind::If { body, orelse, .. } => {
            assigns_at_module_scope(body, binding) || assigns_at_module_scope(orelse, binding)
        }
        StmtKind::For { body, .. } | StmtKind::While { body, .. } => {
            assigns_at_module_scope(body, binding)
        }
        StmtKind::Try {
            body,
            handlers,
            finalbody,
        } => {
            assigns_at_module_scope(body, binding)
                || handlers
                    .iter()
                    .any(|handler| assigns_at_module_scope(&handler.body, binding))
                || assigns_at_module_scope(finalbody, binding)
        }
        _ => false,
    })
}

/// Static checks over generated code. Never runs the code.
#[derive(Debug, Clone)]
pub struct CodeSafetyValidator {
    result_binding: String,
}

impl Default for CodeSafetyValidator {
    fn default() -> Self {
        Self {
            result_binding: RESULT_BINDING.to_string(),
        }
    }
}

impl CodeSafetyValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn result_binding(&self) -> &str {
        &self.result_binding
    }

    pub fn validate(&self, code: &str) -> ValidationVerdict {
        self.inspect(code).0
    }

    /// Validates and hands back the parsed program so callers need not parse twice.
    pub fn inspect(&self, code: &str) -> (ValidationVerdict, Option<Program>) {
        info!(code_len = code.len(), "Starting code validation");
        match parse(code) {
            Ok(program) => {
                let verdict = self.check_program(&program);
                (verdict, Some(program))
            }
            Err(err) => {
                warn!(line = err.line, error = %err.message, "Code failed to parse");
                log_guard_event(
                    "syntax_error",
                    json!({ "line": err.line, "message": err.message }),
                );
                (ValidationVerdict::rejected(format!("Syntax error: {err}")), None)
            }
        }
    }

    pub fn check_program(&self, program: &Program) -> ValidationVerdict {
        let mut findings = Findings::default();
        walk_program(&mut findings, program);

        let mut issues: Vec<String> = findings
            .dangerous_calls
            .iter()
            .map(|call| format!("Dangerous function call: {call}"))
            .collect();
        issues.extend(
            findings
                .forbidden_imports
                .iter()
                .map(|module| format!("Forbidden import: {module}")),
        );
        if !assigns_at_module_scope(&program.body, &self.result_binding) {
            issues.push(format!(
                "Code must assign output to '{}' variable",
                self.result_binding
            ));
        }
        issues.extend(
            findings
                .file_operations
                .iter()
                .map(|op| format!("File operation not allowed: {op}")),
        );
        issues.extend(query_scan::scan_queries(program));

        log_guard_event(
            "validation_completed",
            json!({
                "valid": issues.is_empty(),
                "issue_count": issues.len(),
                "dangerous_calls": findings.dangerous_calls,
                "forbidden_imports": findings.forbidden_imports,
            }),
        );
        if issues.is_empty() {
            info!("Code validation passed");
        } else {
            warn!(issues = issues.len(), "Code validation failed");
        }
        ValidationVerdict::from_issues(issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate(code: &str) -> ValidationVerdict {
        CodeSafetyValidator::new().validate(code)
    }

    #[test]
    fn trivial_contract_is_valid() {
        let verdict = validate("result = 1\ndata_summary = {}");
        assert!(verdict.valid, "{:?}", verdict.issues);
    }

    #[test]
    fn forbidden_import_is_named() {
        let verdict = validate("import os\nresult = 1");
        assert!(!verdict.valid);
        assert_eq!(verdict.issues, vec!["Forbidden import: os"]);

        let verdict = validate("from subprocess import run\nresult = 1");
        assert!(verdict.mentions("subprocess"));
    }

    #[test]
    fn dangerous_calls_match_by_name_and_attribute() {
        assert!(validate("result = eval('1+1')").mentions("eval"));
        let verdict = validate("thing.system('ls')\nresult = 1");
        assert_eq!(verdict.issues, vec!["Dangerous function call: system"]);
    }

    #[test]
    fn denylisted_names_outside_calls_are_fine() {
        let verdict = validate("system = 'eval'\n# import os\nresult = system");
        assert!(verdict.valid, "{:?}", verdict.issues);
    }

    #[test]
    fn result_must_be_assigned_at_module_scope() {
        let verdict = validate("def f():\n    result = 1\n    return result\nx = f()\n");
        assert_eq!(verdict.issues, vec!["Code must assign output to 'result' variable"]);

        let verdict = validate("if True:\n    result = 1\nelse:\n    result = 2\n");
        assert!(verdict.valid);

        let verdict = validate("result, data_summary = 1, {}\n");
        assert!(verdict.valid);
    }

    #[test]
    fn open_is_both_dangerous_and_a_file_operation() {
        let verdict = validate("fh = open('x.txt')\ntext = fh.read()\nresult = text");
        assert_eq!(
            verdict.issues,
            vec![
                "Dangerous function call: open",
                "File operation not allowed: open",
                "File operation not allowed: file.read",
            ]
        );
    }

    #[test]
    fn embedded_sql_is_scanned_with_word_boundaries() {
        assert!(validate("query = 'DROP TABLE x'\nresult = 1").mentions("DROP"));
        let verdict = validate("query = 'SELECT DROPBOX_COL FROM x'\nresult=1");
        assert!(verdict.valid, "{:?}", verdict.issues);
    }

    #[test]
    fn findings_accumulate_in_check_order() {
        let verdict = validate("import pickle\nx = exec('pass')\nq = 'DELETE FROM t'\n");
        assert_eq!(
            verdict.issues,
            vec![
                "Dangerous function call: exec",
                "Forbidden import: pickle",
                "Code must assign output to 'result' variable",
                "SQL contains forbidden operation(s): DELETE",
            ]
        );
    }

    #[test]
    fn syntax_errors_short_circuit() {
        let verdict = validate("import os\nresult = (1 +\n");
        assert!(!verdict.valid);
        assert_eq!(verdict.issues.len(), 1);
        assert!(verdict.issues[0].starts_with("Syntax error:"));
    }

    #[test]
    fn pathological_nesting_is_rejected_not_crashed() {
        for depth in [100, 2000] {
            let code = format!("result = {}1{}\n", "(".repeat(depth), ")".repeat(depth));
            let verdict = validate(&code);
            assert!(!verdict.valid);
            assert_eq!(verdict.issues.len(), 1);
            assert!(
                verdict.issues[0].starts_with("Syntax error: too many nested parentheses"),
                "{:?}",
                verdict.issues
            );
        }
        let code = format!("result = {}1\n", "-".repeat(50_000));
        assert!(validate(&code).issues[0].starts_with("Syntax error: too many nested"));
    }
}
