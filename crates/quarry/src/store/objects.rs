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
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use polars::prelude::{CsvWriter, DataFrame, SerWriter};
use quarry_contracts::{ExternalizedResult, RuntimeContext};
use std::path::PathBuf;
use tracing::info;

/// Organizational keys under which an oversized result is filed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectKey {
    pub user_id: Option<String>,
    pub session_id: String,
    pub message_id: Option<String>,
    pub agent_label: String,
}

impl ObjectKey {
    pub fn from_context(ctx: &RuntimeContext) -> Self {
        Self {
            user_id: ctx.user_id.clone(),
            session_id: ctx.session_id.clone(),
            message_id: ctx.effective_turn_id().map(str::to_string),
            agent_label: ctx.agent_label.clone(),
        }
    }

    pub fn filename(&self, at: DateTime<Utc>, format: &str) -> String {
        let token = uuid::Uuid::new_v4().simple().to_string();
        format!(
            "{}_{}_{}.{}",
            at.format("%Y%m%d_%H%M%S"),
            sanitize_segment(&self.agent_label),
            &token[..8],
            format
        )
    }

    /// `user/session/message/file`, or `session/file` without user and message ids.
    pub fn location(&self, filename: &str) -> String {
        match (&self.user_id, &self.message_id) {
            (Some(user), Some(message)) => format!(
                "{}/{}/{}/{}",
                sanitize_segment(user),
                sanitize_segment(&self.session_id),
                sanitize_segment(message),
                filename
            ),
            _ => format!("{}/{}", sanitize_segment(&self.session_id), filename),
        }
    }
}

fn sanitize_segment(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

pub fn encode_csv(frame: &mut DataFrame) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    CsvWriter::new(&mut buffer)
        .include_header(true)
        .finish(frame)?;
    Ok(buffer)
}

/// Receives tabular results too large to return inline.
#[async_trait]
pub trait LargeObjectStore: Send + Sync {
    async fn put(&self, key: &ObjectKey, frame: DataFrame) -> Result<ExternalizedResult>;
}

struct Prepared {
    filename: String,
    location: String,
    bytes: Vec<u8>,
    record_count: usize,
    generated_at: DateTime<Utc>,
}

fn prepare(key: &ObjectKey, mut frame: DataFrame) -> Result<Prepared> {
    let generated_at = Utc::now();
    let filename = key.filename(generated_at, "csv");
    let location = key.location(&filename);
    let record_count = frame.height();
    let bytes = encode_csv(&mut frame)?;
    Ok(Prepared {
        filename,
        location,
        bytes,
        record_count,
        generated_at,
    })
}

fn describe(prepared: &Prepared, location: String, expiry_days: i64) -> ExternalizedResult {
    ExternalizedResult {
        location,
        filename: prepared.filename.clone(),
        format: "csv".to_string(),
        record_count: prepared.record_count,
        file_size_bytes: prepared.bytes.len() as u64,
        generated_at: prepared.generated_at,
        expires_at: prepared.generated_at + Duration::days(expiry_days),
    }
}

/// Writes CSV files beneath a root directory.
pub struct FileObjectStore {
    root: PathBuf,
    expiry_days: i64,
}

impl FileObjectStore {
    pub fn new(root: impl Into<PathBuf>, expiry_days: i64) -> Self {
        Self {
            root: root.into(),
            expiry_days,
        }
    }
}

#[async_trait]
impl LargeObjectStore for FileObjectStore {
    async fn put(&self, key: &ObjectKey, frame: DataFrame) -> Result<ExternalizedResult> {
        let prepared = prepare(key, frame)?;
        let path = self.root.join(&prepared.location);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &prepared.bytes).await?;
        info!(
            location = %prepared.location,
            records = prepared.record_count,
            bytes = prepared.bytes.len(),
            "Externalized result"
        );
        Ok(describe(
            &prepared,
            path.to_string_lossy().into_owned(),
            self.expiry_days,
        ))
    }
}

/// Keeps encoded objects in memory, keyed by location.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: DashMap<String, Vec<u8>>,
    expiry_days: i64,
}

impl MemoryObjectStore {
    pub fn new(expiry_days: i64) -> Self {
        Self {
            objects: DashMap::new(),
            expiry_days,
        }
    }

    pub fn get(&self, location: &str) -> Option<Vec<u8>> {
        self.objects.get(location).map(|bytes| bytes.value().clone())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl LargeObjectStore for MemoryObjectStore {
    async fn put(&self, key: &ObjectKey, frame: DataFrame) -> Result<ExternalizedResult> {
        let prepared = prepare(key, frame)?;
        if self.objects.contains_key(&prepared.location) {
            return Err(QuarryError::storage(format!(
                "object already exists at {}",
                prepared.location
            )));
        }
        self.objects
            .insert(prepared.location.clone(), prepared.bytes.clone());
        Ok(describe(&prepared, prepared.location.clone(), self.expiry_days))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn key(user: Option<&str>, message: Option<&str>) -> ObjectKey {
        ObjectKey {
            user_id: user.map(str::to_string),
            session_id: "sess-1".into(),
            message_id: message.map(str::to_string),
            agent_label: "sales agent".into(),
        }
    }

    #[test]
    fn filename_carries_timestamp_and_agent() {
        let at = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();
        let name = key(None, None).filename(at, "csv");
        assert!(name.starts_with("20250304_050607_sales_agent_"));
        assert!(name.ends_with(".csv"));
        assert_eq!(name.len(), "20250304_050607_sales_agent_".len() + 8 + 4);
    }

    #[test]
    fn location_falls_back_to_session() {
        assert_eq!(
            key(Some("u1"), Some("m1")).location("f.csv"),
            "u1/sess-1/m1/f.csv"
        );
        assert_eq!(key(Some("u1"), None).location("f.csv"), "sess-1/f.csv");
        assert_eq!(
            key(Some("../etc"), Some("m1")).location("f.csv"),
            "___etc/sess-1/m1/f.csv"
        );
    }

    #[tokio::test]
    async fn file_store_writes_csv() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileObjectStore::new(dir.path(), 7);
        let frame = polars::df!("a" => [1i64, 2, 3]).unwrap();
        let meta = store.put(&key(Some("u"), Some("m")), frame).await.unwrap();
        assert_eq!(meta.record_count, 3);
        assert_eq!(meta.format, "csv");
        assert_eq!(meta.expires_at - meta.generated_at, Duration::days(7));
        let written = std::fs::read_to_string(&meta.location).unwrap();
        assert_eq!(written.lines().next(), Some("a"));
        assert_eq!(written.len() as u64, meta.file_size_bytes);
    }
}
