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

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    pub line: usize,
    pub scope: String,
}

/// An exception raised inside a script, with the call stack captured where it surfaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptError {
    pub kind: String,
    pub message: String,
    pub trace: Vec<TraceFrame>,
    /// Fatal errors bypass `except` clauses.
    pub fatal: bool,
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for ScriptError {}

impl ScriptError {
    pub fn new(kind: &str, message: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            message: message.into(),
            trace: Vec::new(),
            fatal: false,
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new("ValueError", message)
    }

    pub fn name_error(name: &str, hint: Option<&str>) -> Self {
        let message = match hint {
            Some(hint) => format!("name '{name}' is not defined. Did you mean: '{hint}'?"),
            None => format!("name '{name}' is not defined"),
        };
        Self::new("NameError", message)
    }

    pub fn key_error(key: &str) -> Self {
        Self::new("KeyError", format!("'{key}'"))
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Self::new("IndexError", message)
    }

    pub fn attribute_error(type_name: &str, attr: &str) -> Self {
        Self::new(
            "AttributeError",
            format!("'{type_name}' object has no attribute '{attr}'"),
        )
    }

    pub fn zero_division(message: impl Into<String>) -> Self {
        Self::new("ZeroDivisionError", message)
    }

    pub fn memory_error(message: impl Into<String>) -> Self {
        Self::new("MemoryError", message)
    }

    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::new("NotImplementedError", message)
    }

    pub fn module_not_found(module: &str) -> Self {
        Self::new(
            "ModuleNotFoundError",
            format!("No module named '{module}' is available in this environment"),
        )
    }

    pub fn budget_exhausted(limit: u64) -> Self {
        Self {
            fatal: true,
            ..Self::new(
                "ExecutionBudgetExceeded",
                format!("script exceeded its budget of {limit} steps"),
            )
        }
    }

    pub fn with_trace(mut self, trace: Vec<TraceFrame>) -> Self {
        if self.trace.is_empty() {
            self.trace = trace;
        }
        self
    }

    /// Whether an `except <handler>` clause catches this error.
    pub fn matches(&self, handler: &str) -> bool {
        if self.fatal {
            return false;
        }
        handler.split(',').any(|name| {
            let name = name.rsplit('.').next().unwrap_or(name).trim();
            match name {
                "Exception" | "BaseException" => true,
                "LookupError" => matches!(self.kind.as_str(), "KeyError" | "IndexError"),
                "ArithmeticError" => {
                    matches!(self.kind.as_str(), "ZeroDivisionError" | "OverflowError")
                }
                "ImportError" => self.kind == "ModuleNotFoundError",
                other => self.kind == other,
            }
        })
    }

    pub fn render_traceback(&self, source: &str) -> String {
        let lines: Vec<&str> = source.lines().collect();
        let mut out = String::from("Traceback (most recent call last):\n");
        for frame in &self.trace {
            out.push_str(&format!(
                "  File \"<generated>\", line {}, in {}\n",
                frame.line, frame.scope
            ));
            if let Some(text) = frame.line.checked_sub(1).and_then(|i| lines.get(i)) {
                let text = text.trim();
                if !text.is_empty() {
                    out.push_str(&format!("    {text}\n"));
                }
            }
        }
        out.push_str(&self.to_string());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_hierarchy() {
        let err = ScriptError::key_error("region");
        assert!(err.matches("LookupError"));
        assert!(err.matches("ValueError,KeyError"));
        assert!(!err.matches("ValueError"));
        assert!(!ScriptError::budget_exhausted(10).matches("Exception"));
    }

    #[test]
    fn traceback_lists_frames_with_source() {
        let err = ScriptError::zero_division("division by zero").with_trace(vec![
            TraceFrame {
                line: 2,
                scope: "<module>".into(),
            },
            TraceFrame {
                line: 4,
                scope: "ratio".into(),
            },
        ]);
        let rendered = err.render_traceback("x = 1\ny = ratio(x)\n\n    return x / 0\n");
        assert_eq!(
            rendered,
            "Traceback (most recent call last):\n  File \"<generated>\", line 2, in <module>\n    y = ratio(x)\n  File \"<generated>\", line 4, in ratio\n    return x / 0\nZeroDivisionError: division by zero"
        );
    }
}
