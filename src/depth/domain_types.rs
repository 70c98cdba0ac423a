//! Domain types for the depth ladder: levels, prerequisite edges, the
//! caller-supplied knowledge set, and the progression-heuristic inputs
//! (§4.5).

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain_types::ConceptId;

/// Errors internal to the depth ladder that do not map onto a shared
/// [`crate::error::Error`] kind named in the taxonomy (§7).
#[derive(Debug, Error)]
pub enum DepthError {
    /// `init` was asked for a `max_levels` of zero, which would leave no
    /// valid level in `[0, max_level]`.
    #[error("max_levels must be at least 1")]
    EmptyLadder,
}

/// One rung of a concept's depth ladder, as returned by introspection; the
/// ladder itself tracks only the current level and materializes artifacts
/// lazily, so this is descriptive metadata rather than owned state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthLevel {
    /// `0` is simplest.
    pub level: u32,
    /// Short human-readable title, e.g. "Level 2: recursion".
    pub title: String,
    /// One-line description of what this level covers.
    pub description: String,
    /// Complexity score in `[1, 10]`.
    pub complexity: u8,
    /// The level directly below this one, if any (the prerequisite link a
    /// ladder enforces internally between its own rungs).
    pub prerequisite_level: Option<u32>,
}

/// An edge in the external Prerequisite Graph: `source` requires (or
/// merely suggests) `target` be known first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrerequisiteEdge {
    /// The concept this edge is a prerequisite for.
    pub source: ConceptId,
    /// The prerequisite concept.
    pub target: ConceptId,
    /// Whether `target` is mandatory (vs. merely recommended).
    pub required: bool,
    /// Estimated time to learn `target`, used to order a [`LearningPath`].
    pub estimated_time: Duration,
    /// Difficulty score, used to order a [`LearningPath`].
    pub difficulty: u8,
}

/// Static prerequisite map, loaded once at process start and consulted by
/// every ladder (§4.5).
#[derive(Debug, Clone, Default)]
pub struct PrerequisiteGraph {
    edges: HashMap<ConceptId, Vec<PrerequisiteEdge>>,
}

impl PrerequisiteGraph {
    /// Builds an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one prerequisite edge.
    pub fn add_edge(&mut self, edge: PrerequisiteEdge) {
        self.edges.entry(edge.source.clone()).or_default().push(edge);
    }

    /// The prerequisite edges recorded for `concept`, in insertion order.
    #[must_use]
    pub fn prerequisites_for(&self, concept: &ConceptId) -> &[PrerequisiteEdge] {
        self.edges.get(concept).map_or(&[], Vec::as_slice)
    }
}

/// The concepts a given originator is already known to understand, supplied
/// by the caller at each gated request — the core does not own or persist
/// this set (§4.5).
#[derive(Debug, Clone, Default)]
pub struct KnowledgeSet(HashSet<ConceptId>);

impl KnowledgeSet {
    /// Builds a knowledge set from an iterator of known concepts.
    #[must_use]
    pub fn new(known: impl IntoIterator<Item = ConceptId>) -> Self {
        Self(known.into_iter().collect())
    }

    /// An empty knowledge set, as used for an anonymous or first-time caller.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// True iff `concept` is recorded as already known.
    #[must_use]
    pub fn knows(&self, concept: &ConceptId) -> bool {
        self.0.contains(concept)
    }
}

/// An ordered sequence of prerequisite concepts to work through before the
/// originally requested concept becomes reachable at level 0 (§4.5):
/// required edges first, then ascending difficulty, then ascending
/// estimated time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearningPath {
    /// The prerequisite concepts, in the order they should be studied.
    pub steps: Vec<ConceptId>,
}

/// How quickly an originator reports absorbing content, an input to the
/// optimal-depth heuristic (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LearningSpeed {
    /// `-1` to the base depth.
    Slow,
    /// No adjustment.
    Normal,
    /// `+1` to the base depth.
    Fast,
}

/// Signal used by `suggest_optimal` to pick a starting depth (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSignal {
    /// Self-reported complexity preference, `1..=10`.
    pub complexity_preference: u8,
    /// Self-reported learning speed.
    pub learning_speed: LearningSpeed,
    /// Count of related concepts the originator already knows.
    pub related_known: u32,
}

/// Feedback reported after an originator finishes a level, used by
/// `can_progress_deeper` (§4.5).
///
/// `modality` is carried here (an addition beyond the distilled contract)
/// because the progression predicate's `expected` duration is a function of
/// modality; without it the formula has no base to scale from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressFeedback {
    /// How long the originator spent at the current level.
    pub time_spent: Duration,
    /// The modality the originator consumed the level's content through.
    pub modality: crate::domain_types::Modality,
    /// Whether the originator reported understanding the material.
    pub understood: bool,
    /// Self-reported rating, `1..=5`.
    pub rating: u8,
}

/// What `content_at` resolves to: either the requested artifact, or — when
/// gated on missing required prerequisites at level 0 — the path the caller
/// must work through first (§4.5).
#[derive(Debug, Clone)]
pub enum ContentOutcome {
    /// The requested level's artifact.
    Ready(crate::domain_types::Artifact),
    /// Required prerequisites are missing; materialize these first.
    Gated(LearningPath),
}

/// `content_at`'s auxiliary marker for the `eli5` entry point: the same
/// level-0 artifact, plus a flag telling the caller to render a simplified
/// narration track alongside it.
#[derive(Debug, Clone)]
pub struct Eli5Content {
    /// The level-0 artifact.
    pub artifact: crate::domain_types::Artifact,
    /// Always `true`; present so callers pattern-match on the wrapper type
    /// rather than a bare bool.
    pub simplified_narration: bool,
}

/// Base expected duration per modality for the progression predicate
/// (§4.5), in seconds. Modalities outside this table use
/// [`DEFAULT_BASE_DURATION_SECS`].
pub const BASE_DURATIONS_SECS: &[(&str, f64)] = &[
    ("animation", 300.0),
    ("simulation", 600.0),
    ("text", 120.0),
    ("concept-map", 180.0),
    ("diagram", 150.0),
];

/// Fallback base duration for a modality absent from
/// [`BASE_DURATIONS_SECS`].
pub const DEFAULT_BASE_DURATION_SECS: f64 = 240.0;

/// Looks up a modality's base expected duration, in seconds.
#[must_use]
pub fn base_duration_secs(modality: &str) -> f64 {
    BASE_DURATIONS_SECS
        .iter()
        .find(|(name, _)| *name == modality)
        .map_or(DEFAULT_BASE_DURATION_SECS, |(_, secs)| *secs)
}

/// Default number of levels a ladder is created with when `init` does not
/// override it.
pub const DEFAULT_MAX_LEVELS: u32 = 5;

/// Derives a level's complexity score in `[1, 10]` from its index, matching
/// the default 5-level table (`1, 3, 5, 7, 9`) and generalizing linearly for
/// ladders with a different `max_levels`.
#[must_use]
pub fn complexity_for_level(level: u32) -> u8 {
    u8::try_from(level.saturating_mul(2) + 1).unwrap_or(u8::MAX).min(10)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complexity_for_level_matches_default_table() {
        assert_eq!(complexity_for_level(0), 1);
        assert_eq!(complexity_for_level(1), 3);
        assert_eq!(complexity_for_level(2), 5);
        assert_eq!(complexity_for_level(3), 7);
        assert_eq!(complexity_for_level(4), 9);
    }

    #[test]
    fn test_base_duration_falls_back_for_unknown_modality() {
        assert_eq!(base_duration_secs("animation"), 300.0);
        assert_eq!(base_duration_secs("interpretive-dance"), DEFAULT_BASE_DURATION_SECS);
    }

    #[test]
    fn test_knowledge_set_reports_known_concepts() {
        let known = KnowledgeSet::new(vec![ConceptId::try_new("algebra").unwrap()]);
        assert!(known.knows(&ConceptId::try_new("algebra").unwrap()));
        assert!(!known.knows(&ConceptId::try_new("calculus").unwrap()));
    }
}
