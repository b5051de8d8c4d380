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

use crate::guard::denylist::{DESTRUCTIVE_SQL_KEYWORDS, QUERY_START_KEYWORDS};
use crate::script::ast::{walk_expr, walk_program, Constant, Expr, FStringPart, Program, Visitor};
use once_cell::sync::Lazy;
use regex::Regex;

static DESTRUCTIVE_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    DESTRUCTIVE_SQL_KEYWORDS
        .iter()
        .filter_map(|keyword| {
            let pattern = format!(r"\b{}\b", regex::escape(&keyword.to_uppercase()));
            Regex::new(&pattern).ok().map(|re| (*keyword, re))
        })
        .collect()
});

/// Interpolations become `?` so the literal skeleton can be inspected.
pub fn render_with_placeholders(parts: &[FStringPart]) -> String {
    parts
        .iter()
        .map(|part| match part {
            FStringPart::Literal(text) => text.as_str(),
            FStringPart::Interpolation { .. } => "?",
        })
        .collect()
}

pub fn looks_like_query(text: &str) -> bool {
    let upper = text.trim().to_uppercase();
    QUERY_START_KEYWORDS
        .iter()
        .any(|keyword| upper.starts_with(keyword))
}

pub fn forbidden_keywords(query: &str) -> Vec<&'static str> {
    let upper = query.to_uppercase();
    DESTRUCTIVE_PATTERNS
        .iter()
        .filter(|(_, re)| re.is_match(&upper))
        .map(|(keyword, _)| *keyword)
        .collect()
}

#[derive(Default)]
struct QueryCollector {
    queries: Vec<String>,
}

impl Visitor for QueryCollector {
    fn visit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Constant(Constant::Str(text)) if looks_like_query(text) => {
                self.queries.push(text.clone());
            }
            Expr::FString(parts) => {
                let rendered = render_with_placeholders(parts);
                if looks_like_query(&rendered) {
                    self.queries.push(rendered);
                }
            }
            _ => {}
        }
        walk_expr(self, expr);
    }
}

pub fn embedded_queries(program: &Program) -> Vec<String> {
    let mut collector = QueryCollector::default();
    walk_program(&mut collector, program);
    collector.queries
}

pub fn scan_queries(program: &Program) -> Vec<String> {
    embedded_queries(program)
        .iter()
        .filter(|query| !query.is_empty())
        .filter_map(|query| {
            let found = forbidden_keywords(query);
            (!found.is_empty())
                .then(|| format!("SQL contains forbidden operation(s): {}", found.join(", ")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parse;

    #[test]
    fn word_boundaries_avoid_substring_hits() {
        assert!(forbidden_keywords("SELECT DROPBOX_COL FROM x").is_empty());
        assert!(forbidden_keywords("select updated_at from orders").is_empty());
        assert_eq!(forbidden_keywords("drop table x; delete from y"), vec!["DROP", "DELETE"]);
        assert_eq!(forbidden_keywords("EXEC xp_cmdshell 'dir'"), vec!["EXEC", "xp_cmdshell"]);
    }

    #[test]
    fn fstring_queries_use_placeholders() {
        let program =
            parse("q = f\"SELECT * FROM sales WHERE region = '{region}'\"\nnote = 'hello'\n")
                .unwrap();
        let queries = embedded_queries(&program);
        assert_eq!(queries, vec!["SELECT * FROM sales WHERE region = '?'".to_string()]);
    }

    #[test]
    fn non_query_strings_are_ignored() {
        let program = parse("label = 'please drop me a line'\n").unwrap();
        assert!(scan_queries(&program).is_empty());
    }
}
