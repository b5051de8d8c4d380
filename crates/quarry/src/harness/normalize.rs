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

use crate::tabular::Table;
use chrono::{DateTime, SecondsFormat, Utc};
use quarry_contracts::TabularPayload;
use serde_json::{Map, Value};

/// Appends `agent` and `timestamp` after the script's own keys.
pub fn enrich_summary(mut summary: Map<String, Value>, agent: &str, at: DateTime<Utc>) -> Map<String, Value> {
    summary.insert("agent".to_string(), Value::String(agent.to_string()));
    summary.insert(
        "timestamp".to_string(),
        Value::String(at.to_rfc3339_opts(SecondsFormat::Micros, true)),
    );
    summary
}

pub fn inline_payload(table: &Table, date_format: &str) -> TabularPayload {
    table.to_payload(date_format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tabular::ColumnData;
    use chrono::{NaiveDate, TimeZone};

    #[test]
    fn summary_keys_keep_their_order() {
        let mut summary = Map::new();
        summary.insert("total".into(), Value::from(3));
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let summary = enrich_summary(summary, "sales_agent", at);
        let keys: Vec<_> = summary.keys().cloned().collect();
        assert_eq!(keys, ["total", "agent", "timestamp"]);
        assert_eq!(summary["timestamp"], Value::from("2024-05-01T12:00:00.000000Z"));
    }

    #[test]
    fn temporal_and_missing_cells_are_transport_safe() {
        let day = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let table = Table::new(vec![
            ("day".into(), ColumnData::Date(vec![Some(day), None])),
            ("ratio".into(), ColumnData::Float(vec![Some(f64::NAN), Some(0.5)])),
        ])
        .unwrap();
        let payload = inline_payload(&table, "%Y-%m-%d");
        assert_eq!(payload.rows[0], vec![Value::from("2024-02-29"), Value::Null]);
        assert_eq!(payload.rows[1], vec![Value::Null, Value::from(0.5)]);
        let text = serde_json::to_string(&payload).unwrap();
        assert_eq!(serde_json::from_str::<TabularPayload>(&text).unwrap(), payload);
    }
}
