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

use crate::sandbox::error::ScriptError;
use crate::sandbox::value::Value;

/// Evaluated call arguments, addressable by position or keyword.
#[derive(Default)]
pub struct Args {
    pub positional: Vec<Value>,
    pub keywords: Vec<(String, Value)>,
}

impl Args {
    pub fn new(positional: Vec<Value>, keywords: Vec<(String, Value)>) -> Self {
        Self {
            positional,
            keywords,
        }
    }

    pub fn of(positional: Vec<Value>) -> Self {
        Self::new(positional, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keywords.is_empty()
    }

    pub fn kw(&self, name: &str) -> Option<&Value> {
        self.keywords
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn get(&self, index: usize, name: &str) -> Option<&Value> {
        self.positional.get(index).or_else(|| self.kw(name))
    }

    /// Like `get`, but an explicit `None` counts as absent.
    pub fn opt(&self, index: usize, name: &str) -> Option<&Value> {
        self.get(index, name).filter(|value| !value.is_none())
    }

    pub fn require(&self, index: usize, name: &str, func: &str) -> Result<&Value, ScriptError> {
        self.get(index, name).ok_or_else(|| {
            ScriptError::type_error(format!("{func}() missing required argument: '{name}'"))
        })
    }

    pub fn int(&self, index: usize, name: &str, default: i64) -> Result<i64, ScriptError> {
        match self.opt(index, name) {
            None => Ok(default),
            Some(value) => value.as_i64().ok_or_else(|| {
                ScriptError::type_error(format!(
                    "'{name}' must be an integer, not '{}'",
                    value.type_name()
                ))
            }),
        }
    }

    pub fn flag(&self, index: usize, name: &str, default: bool) -> Result<bool, ScriptError> {
        match self.opt(index, name) {
            None => Ok(default),
            Some(value) => value.truthy(),
        }
    }

    pub fn text(&self, index: usize, name: &str) -> Result<Option<String>, ScriptError> {
        match self.opt(index, name) {
            None => Ok(None),
            Some(Value::Str(text)) => Ok(Some(text.clone())),
            Some(other) => Err(ScriptError::type_error(format!(
                "'{name}' must be str, not '{}'",
                other.type_name()
            ))),
        }
    }

    pub fn at_most(&self, count: usize, func: &str) -> Result<(), ScriptError> {
        if self.positional.len() > count {
            return Err(ScriptError::type_error(format!(
                "{func}() takes at most {count} positional arguments ({} given)",
                self.positional.len()
            )));
        }
        Ok(())
    }
}
