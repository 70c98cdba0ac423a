//! Domain types for the content cache: keys, entries, and snapshot stats
//! (§4.4).

use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain_types::Artifact;

/// Errors internal to the content cache that do not map onto a shared
/// [`crate::error::Error`] kind named in the taxonomy (§7).
#[derive(Debug, Error)]
pub enum CacheError {
    /// An entry's estimated size exceeds the cache's total byte budget, so
    /// no amount of eviction could make room for it.
    #[error("entry of {size} bytes exceeds the cache budget of {budget} bytes")]
    EntryExceedsBudget {
        /// The rejected entry's estimated size.
        size: usize,
        /// The cache's configured total byte budget.
        budget: usize,
    },
}

/// Builds the colon-joined, lowercase, underscore-normalized key for a
/// depth-ladder-served artifact (§4.4).
#[must_use]
pub fn depth_key(concept: &str, modality: &str, complexity: u32, originator: &str, depth: i32) -> String {
    join_segments(&[
        concept,
        modality,
        &complexity.to_string(),
        originator,
        &depth.to_string(),
    ])
}

/// Builds the colon-joined key for a raw provider artifact, prefixed `llm:`
/// (§4.4).
#[must_use]
pub fn llm_key(concept: &str, modality: &str, complexity: u32) -> String {
    format!(
        "llm:{}",
        join_segments(&[concept, modality, &complexity.to_string()])
    )
}

/// Builds the distinct `primer:`-prefixed key used for "quick primer"
/// content, kept apart from the normal level-0 key (§9 Open Question b).
#[must_use]
pub fn primer_key(concept: &str, modality: &str, originator: &str) -> String {
    format!("primer:{}", join_segments(&[concept, modality, originator]))
}

fn join_segments(segments: &[&str]) -> String {
    segments
        .iter()
        .map(|segment| normalize_segment(segment))
        .collect::<Vec<_>>()
        .join(":")
}

fn normalize_segment(segment: &str) -> String {
    segment
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

/// A single cache entry: the artifact plus the bookkeeping used for TTL
/// expiry, LRU eviction, and `stats()`.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub(crate) artifact: Artifact,
    pub(crate) created_at: SystemTime,
    pub(crate) last_access: SystemTime,
    pub(crate) access_count: u64,
    pub(crate) ttl: Duration,
    pub(crate) size: usize,
}

impl CacheEntry {
    pub(crate) fn is_stale(&self, now: SystemTime) -> bool {
        now.duration_since(self.created_at)
            .map(|elapsed| elapsed > self.ttl)
            .unwrap_or(false)
    }
}

/// Snapshot returned by `stats()`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of entries currently stored.
    pub entry_count: usize,
    /// `hits / (hits + misses)` since construction, or 0.0 with no lookups.
    pub hit_rate: f64,
    /// Sum of every stored entry's estimated size.
    pub total_bytes: usize,
    /// The configured byte budget.
    pub budget: usize,
    /// The oldest entry's creation instant, in epoch milliseconds.
    pub oldest_created_at_ms: Option<u64>,
    /// The newest entry's creation instant, in epoch milliseconds.
    pub newest_created_at_ms: Option<u64>,
}

/// One entry in the self-describing snapshot format (§6): key, artifact,
/// creation/last-access instants, access count, ttl, and size, all plain
/// serializable values so `snapshot()`/`restore()` round-trip through
/// `serde_json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedEntry {
    /// The entry's cache key.
    pub key: String,
    /// The stored artifact.
    pub artifact: Artifact,
    /// Creation instant, ISO-8601 UTC, matching the teacher's `DateTime<Utc>`
    /// convention for every persisted timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-access instant, ISO-8601 UTC.
    pub last_access: DateTime<Utc>,
    /// Access count at the time of the snapshot.
    pub access_count: u64,
    /// Entry TTL in milliseconds.
    pub ttl_ms: u64,
    /// Estimated byte size.
    pub size: usize,
}
