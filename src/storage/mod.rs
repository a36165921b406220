//! Storage module for podcast content persisted in Sled.
//!
//! This module is the authoritative home of every durable record: episodes
//! (including their like and play counters), team members, gallery items,
//! subscribers and uploaded media. Counter updates are atomic per episode,
//! so concurrent increments from any number of clients never lose updates.

mod sled_store;

pub use sled_store::{ContentStore, StorageError, StorageResult, StorageStats};

use serde::{Deserialize, Serialize};

use crate::catalog::Episode;

/// Length of generated document identifiers
const DOCUMENT_ID_LEN: usize = 20;

/// Generate an opaque identifier for a new document
pub fn new_document_id() -> String {
    uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(DOCUMENT_ID_LEN)
        .collect()
}

/// Numeric fields of an episode that support atomic increments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterField {
    Likes,
    Plays,
}

impl CounterField {
    pub fn read(&self, episode: &Episode) -> u64 {
        match self {
            CounterField::Likes => episode.likes,
            CounterField::Plays => episode.plays,
        }
    }

    fn slot<'a>(&self, episode: &'a mut Episode) -> &'a mut u64 {
        match self {
            CounterField::Likes => &mut episode.likes,
            CounterField::Plays => &mut episode.plays,
        }
    }

    /// Apply a signed delta, saturating at zero and at `u64::MAX`
    pub fn apply(&self, episode: &mut Episode, delta: i64) -> u64 {
        let slot = self.slot(episode);
        *slot = if delta >= 0 {
            slot.saturating_add(delta as u64)
        } else {
            slot.saturating_sub(delta.unsigned_abs())
        };
        *slot
    }
}

/// An uploaded binary object (image) and its content type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaObject {
    pub content_type: String,
    pub data: Vec<u8>,
    /// Unix timestamp of the upload
    pub uploaded_at: i64,
}

impl MediaObject {
    pub fn new(content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            content_type: content_type.into(),
            data,
            uploaded_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Configuration for the storage layer
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Path to the Sled database directory
    pub path: String,
    /// Cache size in bytes (default: 256MB)
    pub cache_size: u64,
    /// Flush interval in milliseconds (0 = only on explicit flush)
    pub flush_interval_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "./data/podcast.sled".to_string(),
            cache_size: 256 * 1024 * 1024,
            flush_interval_ms: 500,
        }
    }
}

impl StorageConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_cache_size(mut self, size: u64) -> Self {
        self.cache_size = size;
        self
    }

    pub fn with_flush_interval(mut self, ms: u64) -> Self {
        self.flush_interval_ms = ms;
        self
    }
}
