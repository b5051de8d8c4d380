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

use serde_json::Value;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. Safe to call more than once.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

fn render(payload: &Value) -> String {
    serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string())
}

pub fn log_resolution_event(event: &str, payload: Value) {
    debug!(event = event, payload = %render(&payload), "Resolution event");
}

pub fn log_cache_event(event: &str, payload: Value) {
    debug!(event = event, payload = %render(&payload), "Cache event");
}

pub fn log_guard_event(event: &str, payload: Value) {
    debug!(event = event, payload = %render(&payload), "Guard event");
}

pub fn log_harness_event(event: &str, payload: Value) {
    debug!(event = event, payload = %render(&payload), "Harness event");
}

pub fn log_degraded(context: &str, error: &dyn std::error::Error) {
    warn!(context = context, error = %error, "Degraded operation");
}
