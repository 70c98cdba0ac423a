//! Depth Ladder (§4.5): a per-concept sequence of levels from introduction
//! to expert, materialized lazily through the Provider Router and cached
//! independently per level, with prerequisite gating and deterministic
//! progression heuristics.

pub mod domain_types;

pub use domain_types::{
    base_duration_secs, complexity_for_level, ContentOutcome, DepthError, DepthLevel,
    Eli5Content, KnowledgeSet, LearningPath, LearningSpeed, PrerequisiteEdge, PrerequisiteGraph,
    ProgressFeedback, UserSignal, DEFAULT_MAX_LEVELS,
};

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::instrument;

use crate::cache::{depth_key, primer_key, ContentCache};
use crate::domain_types::{Artifact, ConceptId, Modality, ParticipantName};
use crate::error::Error;
use crate::observability::{Event, EventSink};
use crate::provider::{ContentRequest, ProviderRouter};

struct LadderState {
    max_level: u32,
    current_level: AtomicU32,
    preferred_depth: DashMap<ParticipantName, u32>,
}

/// Per-concept depth ladder, lazily materializing artifacts through a
/// [`ProviderRouter`] and a [`ContentCache`] (§4.5).
pub struct DepthLadder {
    router: Arc<ProviderRouter>,
    cache: Arc<ContentCache>,
    sink: Arc<dyn EventSink>,
    graph: PrerequisiteGraph,
    ladders: DashMap<ConceptId, LadderState>,
}

impl DepthLadder {
    /// Builds a ladder registry over a shared router and cache, consulting
    /// `graph` for prerequisite gating.
    #[must_use]
    pub fn new(
        router: Arc<ProviderRouter>,
        cache: Arc<ContentCache>,
        sink: Arc<dyn EventSink>,
        graph: PrerequisiteGraph,
    ) -> Self {
        Self {
            router,
            cache,
            sink,
            graph,
            ladders: DashMap::new(),
        }
    }

    /// Creates the ladder for `concept` if absent, idempotent (§4.5).
    ///
    /// # Errors
    ///
    /// Returns [`DepthError::EmptyLadder`] if `max_levels` is zero.
    pub fn init(
        &self,
        concept: &ConceptId,
        initial_level: u32,
        max_levels: u32,
    ) -> Result<(), Error> {
        if max_levels == 0 {
            return Err(DepthError::EmptyLadder.into());
        }
        self.ladders.entry(concept.clone()).or_insert_with(|| LadderState {
            max_level: max_levels - 1,
            current_level: AtomicU32::new(initial_level.min(max_levels - 1)),
            preferred_depth: DashMap::new(),
        });
        Ok(())
    }

    fn ensure_ladder(&self, concept: &ConceptId) {
        self.ladders.entry(concept.clone()).or_insert_with(|| LadderState {
            max_level: DEFAULT_MAX_LEVELS - 1,
            current_level: AtomicU32::new(0),
            preferred_depth: DashMap::new(),
        });
    }

    fn max_level(&self, concept: &ConceptId) -> u32 {
        self.ensure_ladder(concept);
        self.ladders.get(concept).map_or(DEFAULT_MAX_LEVELS - 1, |s| s.max_level)
    }

    fn current_level(&self, concept: &ConceptId) -> u32 {
        self.ensure_ladder(concept);
        self.ladders
            .get(concept)
            .map_or(0, |s| s.current_level.load(Ordering::SeqCst))
    }

    /// Returns the level-`level` artifact for `concept`, clamping `level`
    /// into `[0, max_level]` (§4.5 boundary behavior). Gates level-0
    /// requests on the prerequisite graph when `originator` and `knowledge`
    /// are supplied; an anonymous caller (`originator = None`) is never
    /// gated, matching the teacher's permissive-by-default demo posture.
    #[instrument(skip(self, knowledge))]
    pub async fn content_at(
        &self,
        concept: &ConceptId,
        level: i32,
        modality: &Modality,
        originator: Option<&ParticipantName>,
        knowledge: Option<&KnowledgeSet>,
    ) -> Result<ContentOutcome, Error> {
        self.ensure_ladder(concept);
        let max_level = self.max_level(concept);
        let clamped = level.clamp(0, i32::try_from(max_level).unwrap_or(i32::MAX)) as u32;

        if clamped == 0 {
            if let Some(path) = self.gate(concept, originator, knowledge) {
                self.sink.emit(
                    Event::new("depth_progression_blocked")
                        .with("concept", concept.to_string())
                        .with(
                            "missingPrerequisites",
                            path.steps.iter().map(ToString::to_string).collect::<Vec<_>>().join(","),
                        ),
                );
                return Ok(ContentOutcome::Gated(path));
            }
        }

        let artifact = self.materialize(concept, clamped, modality, originator).await?;
        self.record_progress(concept, clamped, originator);
        Ok(ContentOutcome::Ready(artifact))
    }

    /// Strict variant of [`Self::content_at`]: does not clamp, failing with
    /// [`Error::NoContentAtDepth`] if `level` is outside `[0, max_level]`
    /// (§7, §8 boundary behaviors — "after clamping was disabled").
    pub async fn content_at_strict(
        &self,
        concept: &ConceptId,
        level: i32,
        modality: &Modality,
        originator: Option<&ParticipantName>,
    ) -> Result<Artifact, Error> {
        self.ensure_ladder(concept);
        let max_level = self.max_level(concept);
        if level < 0 || level > i32::try_from(max_level).unwrap_or(i32::MAX) {
            return Err(Error::NoContentAtDepth { level, max_level });
        }
        let artifact = self
            .materialize(concept, level as u32, modality, originator)
            .await?;
        self.record_progress(concept, level as u32, originator);
        Ok(artifact)
    }

    fn gate(
        &self,
        concept: &ConceptId,
        originator: Option<&ParticipantName>,
        knowledge: Option<&KnowledgeSet>,
    ) -> Option<LearningPath> {
        let (Some(_originator), Some(knowledge)) = (originator, knowledge) else {
            return None;
        };
        let missing: Vec<&PrerequisiteEdge> = self
            .graph
            .prerequisites_for(concept)
            .iter()
            .filter(|edge| !knowledge.knows(&edge.target))
            .collect();
        if missing.is_empty() {
            return None;
        }
        let mut ordered = missing;
        ordered.sort_by(|a, b| {
            b.required
                .cmp(&a.required)
                .then(a.difficulty.cmp(&b.difficulty))
                .then(a.estimated_time.cmp(&b.estimated_time))
        });
        Some(LearningPath {
            steps: ordered.into_iter().map(|edge| edge.target.clone()).collect(),
        })
    }

    async fn materialize(
        &self,
        concept: &ConceptId,
        level: u32,
        modality: &Modality,
        originator: Option<&ParticipantName>,
    ) -> Result<Artifact, Error> {
        let complexity = u32::from(complexity_for_level(level));
        let originator_key = originator.map_or("anonymous", |o| o.as_ref());
        let key = depth_key(concept.as_ref(), modality.as_ref(), complexity, originator_key, level as i32);

        if let Some(artifact) = self.cache.get(&key) {
            return Ok(artifact);
        }

        let request = ContentRequest {
            concept: concept.clone(),
            modality: modality.clone(),
            complexity: u8::try_from(complexity).unwrap_or(10),
        };
        let artifact = self.router.generate(&request).await?;
        self.cache.put(key, artifact.clone(), None)?;
        Ok(artifact)
    }

    fn record_progress(&self, concept: &ConceptId, level: u32, originator: Option<&ParticipantName>) {
        self.ensure_ladder(concept);
        if let Some(state) = self.ladders.get(concept) {
            state.current_level.store(level, Ordering::SeqCst);
            if let Some(originator) = originator {
                state.preferred_depth.insert(originator.clone(), level);
            }
        }
        self.sink.emit(
            Event::new("depth_level_served")
                .with("concept", concept.to_string())
                .with("level", i64::from(level))
                .with("originator", originator.map_or("anonymous", |o| o.as_ref())),
        );
    }

    /// Advances `concept` one level past its current level, returning the
    /// new artifact, or `None` at the ceiling (§4.5).
    pub async fn deeper(
        &self,
        concept: &ConceptId,
        modality: &Modality,
        originator: Option<&ParticipantName>,
    ) -> Result<Option<Artifact>, Error> {
        let max_level = self.max_level(concept);
        let current = self.current_level(concept);
        if current >= max_level {
            return Ok(None);
        }
        match self
            .content_at(concept, (current + 1) as i32, modality, originator, None)
            .await?
        {
            ContentOutcome::Ready(artifact) => Ok(Some(artifact)),
            ContentOutcome::Gated(_) => Ok(None),
        }
    }

    /// Retreats `concept` one level below its current level, returning the
    /// new artifact, or `None` at the floor (§4.5).
    pub async fn simpler(
        &self,
        concept: &ConceptId,
        modality: &Modality,
        originator: Option<&ParticipantName>,
    ) -> Result<Option<Artifact>, Error> {
        let current = self.current_level(concept);
        if current == 0 {
            return Ok(None);
        }
        match self
            .content_at(concept, (current - 1) as i32, modality, originator, None)
            .await?
        {
            ContentOutcome::Ready(artifact) => Ok(Some(artifact)),
            ContentOutcome::Gated(_) => Ok(None),
        }
    }

    /// Returns the level-0 artifact for `concept`, cached under a distinct
    /// `primer:`-prefixed key and augmented with a simplified-narration
    /// marker (§4.5, §9 Open Question b). Unconditional: eli5 is meant as
    /// an unblocked escape hatch, so it never consults prerequisite gating.
    pub async fn eli5(&self, concept: &ConceptId, modality: Option<&Modality>) -> Result<Eli5Content, Error> {
        let default_modality = Modality::try_new("animation").expect("literal satisfies validation");
        let modality = modality.unwrap_or(&default_modality);
        self.ensure_ladder(concept);

        let key = primer_key(concept.as_ref(), modality.as_ref(), "anonymous");
        let artifact = if let Some(cached) = self.cache.get(&key) {
            cached
        } else {
            let request = ContentRequest {
                concept: concept.clone(),
                modality: modality.clone(),
                complexity: 1,
            };
            let artifact = self.router.generate(&request).await?;
            self.cache.put(key, artifact.clone(), None)?;
            artifact
        };
        Ok(Eli5Content {
            artifact,
            simplified_narration: true,
        })
    }

    /// Returns the top-level (expert) artifact for `concept` (§4.5).
    pub async fn expert(&self, concept: &ConceptId, modality: &Modality) -> Result<Artifact, Error> {
        let max_level = self.max_level(concept);
        match self
            .content_at(concept, max_level as i32, modality, None, None)
            .await?
        {
            ContentOutcome::Ready(artifact) => Ok(artifact),
            ContentOutcome::Gated(_) => unreachable!("expert level is never gated"),
        }
    }

    /// Deterministically maps a user signal to a suggested starting level
    /// in `[0, max_level - 1]` (§4.5).
    #[must_use]
    pub fn suggest_optimal(&self, concept: &ConceptId, signal: UserSignal) -> u32 {
        let max_level = self.max_level(concept);
        let mut depth = (f64::from(signal.complexity_preference) / 2.0).round() as i32;
        depth += match signal.learning_speed {
            LearningSpeed::Fast => 1,
            LearningSpeed::Slow => -1,
            LearningSpeed::Normal => 0,
        };
        if signal.related_known > 0 {
            depth += 1;
        }
        let ceiling = max_level.saturating_sub(1);
        depth.clamp(0, i32::try_from(ceiling).unwrap_or(i32::MAX)) as u32
    }

    /// Evaluates the progression predicate for `concept`'s current level
    /// (§4.5): understood, rated at least 4, and time spent within
    /// `[0.5, 3.0] × expected`, where `expected` scales with the current
    /// level and the feedback's modality.
    #[must_use]
    pub fn can_progress_deeper(&self, concept: &ConceptId, feedback: &ProgressFeedback) -> bool {
        let current = self.current_level(concept);
        let expected =
            base_duration_secs(feedback.modality.as_ref()) * (1.0 + 0.5 * f64::from(current));
        let spent = feedback.time_spent.as_secs_f64();
        feedback.understood
            && feedback.rating >= 4
            && spent >= 0.5 * expected
            && spent <= 3.0 * expected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::NoopSink;
    use async_trait::async_trait;
    use std::time::Duration as StdDuration;

    struct EchoProvider;
    #[async_trait]
    impl crate::provider::Provider for EchoProvider {
        async fn generate(&self, request: &ContentRequest) -> Result<Artifact, String> {
            Ok(Artifact::new(
                format!("{}@{}", request.concept, request.complexity).into_bytes(),
                crate::domain_types::Provenance::Provider("echo".to_string()),
            ))
        }
    }

    fn ladder() -> DepthLadder {
        let sink: Arc<dyn EventSink> = Arc::new(NoopSink);
        let router = Arc::new(ProviderRouter::new(Arc::clone(&sink)));
        router.register(
            crate::provider::domain_types::ProviderDescriptor {
                name: crate::provider::ProviderName::try_new("echo").unwrap(),
                priority: 0,
                timeout: StdDuration::from_millis(500),
                rate_limit: 1_000,
            },
            Arc::new(EchoProvider),
        );
        let cache = Arc::new(ContentCache::new(crate::config::CoreConfig::testing(), Arc::clone(&sink)));
        DepthLadder::new(router, cache, sink, PrerequisiteGraph::new())
    }

    fn concept(name: &str) -> ConceptId {
        ConceptId::try_new(name).unwrap()
    }

    fn modality() -> Modality {
        Modality::try_new("animation").unwrap()
    }

    #[tokio::test]
    async fn test_depth_progression_deeper_advances_then_ceils_out() {
        let ladder = ladder();
        ladder.init(&concept("recursion"), 1, 5).unwrap();

        let outcome = ladder
            .content_at(&concept("recursion"), 0, &modality(), None, None)
            .await
            .unwrap();
        assert!(matches!(outcome, ContentOutcome::Ready(_)));
        assert_eq!(ladder.current_level(&concept("recursion")), 0);

        let mut last_level = 0;
        loop {
            match ladder
                .deeper(&concept("recursion"), &modality(), None)
                .await
                .unwrap()
            {
                Some(_) => last_level += 1,
                None => break,
            }
        }
        assert_eq!(last_level, 4);
        assert!(ladder
            .deeper(&concept("recursion"), &modality(), None)
            .await
            .unwrap()
            .is_none());

        for _ in 0..4 {
            assert!(ladder
                .simpler(&concept("recursion"), &modality(), None)
                .await
                .unwrap()
                .is_some());
        }
        assert!(ladder
            .simpler(&concept("recursion"), &modality(), None)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_contentat_clamps_out_of_range_levels() {
        let ladder = ladder();
        ladder.init(&concept("gravity"), 0, 3).unwrap();

        let outcome = ladder
            .content_at(&concept("gravity"), -5, &modality(), None, None)
            .await
            .unwrap();
        assert!(matches!(outcome, ContentOutcome::Ready(_)));
        assert_eq!(ladder.current_level(&concept("gravity")), 0);

        let outcome = ladder
            .content_at(&concept("gravity"), 99, &modality(), None, None)
            .await
            .unwrap();
        assert!(matches!(outcome, ContentOutcome::Ready(_)));
        assert_eq!(ladder.current_level(&concept("gravity")), 2);
    }

    #[tokio::test]
    async fn test_content_at_strict_rejects_out_of_range() {
        let ladder = ladder();
        ladder.init(&concept("gravity"), 0, 3).unwrap();
        let err = ladder
            .content_at_strict(&concept("gravity"), 9, &modality(), None)
            .await;
        assert!(matches!(err, Err(Error::NoContentAtDepth { level: 9, max_level: 2 })));
    }

    #[tokio::test]
    async fn test_prerequisite_gating_returns_learning_path_when_required_concept_missing() {
        let ladder = ladder();
        let mut graph = PrerequisiteGraph::new();
        graph.add_edge(PrerequisiteEdge {
            source: concept("calculus"),
            target: concept("algebra"),
            required: true,
            estimated_time: StdDuration::from_secs(600),
            difficulty: 3,
        });
        let ladder = DepthLadder::new(ladder.router, ladder.cache, ladder.sink, graph);
        ladder.init(&concept("calculus"), 0, 5).unwrap();
        let originator = ParticipantName::try_new("student").unwrap();

        let outcome = ladder
            .content_at(
                &concept("calculus"),
                0,
                &modality(),
                Some(&originator),
                Some(&KnowledgeSet::empty()),
            )
            .await
            .unwrap();
        match outcome {
            ContentOutcome::Gated(path) => assert_eq!(path.steps, vec![concept("algebra")]),
            ContentOutcome::Ready(_) => panic!("expected gating"),
        }

        let known = KnowledgeSet::new(vec![concept("algebra")]);
        let outcome = ladder
            .content_at(&concept("calculus"), 0, &modality(), Some(&originator), Some(&known))
            .await
            .unwrap();
        assert!(matches!(outcome, ContentOutcome::Ready(_)));
    }

    #[test]
    fn test_suggest_optimal_applies_heuristic_adjustments() {
        let ladder = ladder();
        ladder.init(&concept("topic"), 0, 5).unwrap();
        let base = ladder.suggest_optimal(
            &concept("topic"),
            UserSignal {
                complexity_preference: 6,
                learning_speed: LearningSpeed::Normal,
                related_known: 0,
            },
        );
        assert_eq!(base, 3);

        let fast_with_background = ladder.suggest_optimal(
            &concept("topic"),
            UserSignal {
                complexity_preference: 6,
                learning_speed: LearningSpeed::Fast,
                related_known: 2,
            },
        );
        assert_eq!(fast_with_background, 3);

        let slow = ladder.suggest_optimal(
            &concept("topic"),
            UserSignal {
                complexity_preference: 1,
                learning_speed: LearningSpeed::Slow,
                related_known: 0,
            },
        );
        assert_eq!(slow, 0);
    }

    #[test]
    fn test_can_progress_deeper_requires_understood_and_rating_and_time_in_range() {
        let ladder = ladder();
        ladder.init(&concept("topic"), 0, 5).unwrap();
        let expected = base_duration_secs("animation");

        let good = ProgressFeedback {
            time_spent: StdDuration::from_secs_f64(expected),
            modality: modality(),
            understood: true,
            rating: 4,
        };
        assert!(ladder.can_progress_deeper(&concept("topic"), &good));

        let too_fast = ProgressFeedback {
            time_spent: StdDuration::from_secs_f64(expected * 0.1),
            modality: modality(),
            understood: true,
            rating: 5,
        };
        assert!(!ladder.can_progress_deeper(&concept("topic"), &too_fast));

        let low_rating = ProgressFeedback {
            time_spent: StdDuration::from_secs_f64(expected),
            modality: modality(),
            understood: true,
            rating: 3,
        };
        assert!(!ladder.can_progress_deeper(&concept("topic"), &low_rating));
    }
}
