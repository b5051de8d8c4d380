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

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionRequest {
    pub category: String,
    pub raw_value: String,
}

impl ResolutionRequest {
    pub fn new(category: impl Into<String>, raw_value: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            raw_value: raw_value.into(),
        }
    }
}

/// Organizational keys for one execution call. Used to scope verified entities
/// and to place externalized results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeContext {
    pub conversation_id: String,
    pub session_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub turn_id: Option<String>,
    #[serde(default = "default_agent_label")]
    pub agent_label: String,
}

fn default_agent_label() -> String {
    "unknown".to_string()
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self {
            conversation_id: Uuid::new_v4().to_string(),
            session_id: "default_session".to_string(),
            user_id: None,
            message_id: None,
            turn_id: None,
            agent_label: default_agent_label(),
        }
    }
}

impl RuntimeContext {
    pub fn new(conversation_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            session_id: session_id.into(),
            ..Self::default()
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_message(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn with_turn(mut self, turn_id: impl Into<String>) -> Self {
        self.turn_id = Some(turn_id.into());
        self
    }

    pub fn with_agent(mut self, agent_label: impl Into<String>) -> Self {
        self.agent_label = agent_label.into();
        self
    }

    /// Turn id, falling back to the message id.
    pub fn effective_turn_id(&self) -> Option<&str> {
        self.turn_id.as_deref().or(self.message_id.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_falls_back_to_message() {
        let ctx = RuntimeContext::new("conv-1", "sess-1").with_message("msg-9");
        assert_eq!(ctx.effective_turn_id(), Some("msg-9"));
        let ctx = ctx.with_turn("turn-2");
        assert_eq!(ctx.effective_turn_id(), Some("turn-2"));
    }

    #[test]
    fn agent_label_defaults_when_missing() {
        let ctx: RuntimeContext =
            serde_json::from_str(r#"{"conversation_id":"c","session_id":"s"}"#).unwrap();
        assert_eq!(ctx.agent_label, "unknown");
        assert!(ctx.user_id.is_none());
    }
}
