//! Crate-wide domain primitives.
//!
//! These are the newtypes shared across the message bus, admission queue,
//! provider router, content cache, and depth ladder — identifiers, priority
//! levels, and the opaque [`Artifact`] value that flows between the
//! provider router, the cache, and the depth ladder. Module-local domain
//! types that only one component needs live in that component's own
//! `domain_types` module instead.

use std::time::SystemTime;

use bytes::Bytes;
use nutype::nutype;
use serde::{Deserialize, Serialize};

/// Delivery/processing priority shared by the message bus and admission
/// queue.
///
/// Ordered by `weight()`, highest first; ties are broken by enqueue order at
/// the call site, never here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    /// Weight 25.
    Low,
    /// Weight 50.
    Medium,
    /// Weight 75.
    High,
    /// Weight 100.
    Critical,
}

impl Priority {
    /// Numeric weight used to order a max-heap: Critical=100, High=75,
    /// Medium=50, Low=25.
    #[must_use]
    pub fn weight(self) -> u32 {
        match self {
            Priority::Critical => 100,
            Priority::High => 75,
            Priority::Medium => 50,
            Priority::Low => 25,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.weight().cmp(&other.weight())
    }
}

/// Name of a bus participant, an admission-queue originator, or a content
/// originator.
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into,
        AsRef
    )
)]
pub struct ParticipantName(String);

impl ParticipantName {
    /// The reserved recipient name meaning "every subscribed participant".
    #[must_use]
    pub fn broadcast_sentinel() -> Self {
        Self::try_new("broadcast").expect("literal satisfies validation")
    }

    /// The reserved recipient name for bus control-plane messages.
    #[must_use]
    pub fn control_sentinel() -> Self {
        Self::try_new("control").expect("literal satisfies validation")
    }

    /// The default originator identity when a caller supplies none.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::try_new("anonymous").expect("literal satisfies validation")
    }
}

/// Identifier for a concept in the depth ladder and provider request space.
#[nutype(
    sanitize(trim, lowercase),
    validate(len_char_min = 1, len_char_max = 200),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into,
        AsRef
    )
)]
pub struct ConceptId(String);

/// Content modality (e.g. `animation`, `text`, `diagram`).
#[nutype(
    sanitize(trim, lowercase),
    validate(len_char_min = 1, len_char_max = 64),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into,
        AsRef
    )
)]
pub struct Modality(String);

/// A point in time, recorded as `SystemTime` so it can be serialized into a
/// cache snapshot as ISO-8601 UTC.
#[nutype(derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize))]
pub struct Timestamp(SystemTime);

impl Timestamp {
    /// The current instant.
    #[must_use]
    pub fn now() -> Self {
        Self::new(SystemTime::now())
    }

    /// Milliseconds elapsed since this timestamp, saturating at zero if the
    /// clock moved backwards.
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.into_inner())
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
}

/// Where an [`Artifact`] came from, stamped onto every value this crate
/// produces so a caller can tell a live provider result from a cached,
/// preloaded, or synthetic-fallback one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    /// Produced live by the named provider.
    Provider(String),
    /// Synthesized from the router's static fallback table.
    StaticFallback,
    /// A placeholder written by `preload`, not yet backed by real content.
    Preloaded,
    /// Served from the cache; the inner provenance is the entry's original
    /// stamp at the time it was put.
    Cached(Box<Provenance>),
}

/// An opaque content value produced by the provider router, stored in the
/// cache, and served by the depth ladder.
///
/// The bytes are not interpreted by this crate; callers own the format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    data: Bytes,
    provenance: Provenance,
}

impl Artifact {
    /// Builds a new artifact from raw bytes and a provenance stamp.
    #[must_use]
    pub fn new(data: impl Into<Bytes>, provenance: Provenance) -> Self {
        Self {
            data: data.into(),
            provenance,
        }
    }

    /// The artifact's raw byte content.
    #[must_use]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Where this artifact came from.
    #[must_use]
    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    /// Byte length used for cache size estimation.
    #[must_use]
    pub fn estimated_size(&self) -> usize {
        self.data.len()
    }

    /// Wraps this artifact's provenance to mark it as cache-served, leaving
    /// the bytes untouched.
    #[must_use]
    pub fn as_cached(&self) -> Self {
        Self {
            data: self.data.clone(),
            provenance: Provenance::Cached(Box::new(self.provenance.clone())),
        }
    }
}

/// Non-negative monotonic counter used for EMA statistics and simple tallies
/// across the queue, router, and cache.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Default,
    Into
))]
pub struct Count(u64);

impl Count {
    /// Increments by one, saturating at `u64::MAX`.
    #[must_use]
    pub fn increment(self) -> Self {
        Self::new(self.into_inner().saturating_add(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_weight_orders_critical_above_low() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
        assert_eq!(Priority::Critical.weight(), 100);
        assert_eq!(Priority::Low.weight(), 25);
    }

    #[test]
    fn test_participant_name_rejects_empty() {
        assert!(ParticipantName::try_new("").is_err());
    }

    #[test]
    fn test_concept_id_lowercases_on_construction() {
        let id = ConceptId::try_new("Recursion").unwrap();
        assert_eq!(id.as_ref(), "recursion");
    }

    #[test]
    fn test_artifact_as_cached_wraps_provenance() {
        let artifact = Artifact::new(Bytes::from_static(b"hello"), Provenance::StaticFallback);
        let cached = artifact.as_cached();
        assert!(matches!(cached.provenance(), Provenance::Cached(inner) if **inner == Provenance::StaticFallback));
        assert_eq!(cached.estimated_size(), 5);
    }
}
