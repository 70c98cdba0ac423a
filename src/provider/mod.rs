//! Provider Router (§4.3): ranked failover across registered content
//! providers, with per-provider rate limiting, error-driven cooldown, and a
//! static fallback table for when every provider fails.

pub mod domain_types;

pub use domain_types::{ProviderError, ProviderHealth, ProviderName, ProviderStatus};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::domain_types::{Artifact, ConceptId, Modality, Provenance};
use crate::error::Error;
use crate::observability::{Event, EventSink};
use domain_types::{derive_status, ErrorHistory, ProviderDescriptor, RateLimitWindow};

/// A request for generated content, passed to a provider's adapter method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentRequest {
    /// The concept to generate content for.
    pub concept: ConceptId,
    /// The requested content modality.
    pub modality: Modality,
    /// A coarse complexity level, used by providers that vary output depth.
    pub complexity: u8,
}

/// A content-generating adapter. Implementations perform one call and
/// return; the router enforces the provider's timeout, not the adapter
/// itself (§4.3, §6).
#[async_trait]
pub trait Provider: Send + Sync {
    /// Generates content for `request`, or fails with a provider-specific
    /// reason.
    async fn generate(&self, request: &ContentRequest) -> Result<Artifact, String>;
}

struct ProviderEntry {
    descriptor: ProviderDescriptor,
    adapter: Arc<dyn Provider>,
    enabled: bool,
    window: RateLimitWindow,
    errors: ErrorHistory,
    usage_count: u64,
}

/// Ranked-failover router across registered [`Provider`] adapters (§4.3).
pub struct ProviderRouter {
    sink: Arc<dyn EventSink>,
    providers: DashMap<ProviderName, Mutex<ProviderEntry>>,
    registration_order: Mutex<Vec<ProviderName>>,
    fallback_triggered: AtomicU64,
}

impl ProviderRouter {
    /// Builds an empty router. Providers are added with [`Self::register`].
    #[must_use]
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            providers: DashMap::new(),
            registration_order: Mutex::new(Vec::new()),
            fallback_triggered: AtomicU64::new(0),
        }
    }

    /// Registers a provider adapter under `descriptor.name`, enabled by
    /// default.
    pub fn register(&self, descriptor: ProviderDescriptor, adapter: Arc<dyn Provider>) {
        let name = descriptor.name.clone();
        let now = Instant::now();
        self.providers.insert(
            name.clone(),
            Mutex::new(ProviderEntry {
                descriptor,
                adapter,
                enabled: true,
                window: RateLimitWindow::new(now),
                errors: ErrorHistory::default(),
                usage_count: 0,
            }),
        );
        self.registration_order
            .lock()
            .expect("registration order mutex poisoned")
            .push(name);
    }

    /// Attempts each enabled, non-cooldown, non-rate-limited provider in
    /// priority order; on every failure, records the error and continues; if
    /// every candidate fails, falls back to the static table, then the last
    /// recorded error (§4.3).
    #[instrument(skip(self, request), fields(concept = %request.concept))]
    pub async fn generate(&self, request: &ContentRequest) -> Result<Artifact, Error> {
        let candidates = self.ranked_candidates();
        let mut last_error: Option<String> = None;

        for (attempt, name) in candidates.iter().enumerate() {
            let Some(entry) = self.providers.get(name) else {
                continue;
            };
            let (skip_reason, adapter, timeout) = {
                let mut guard = entry.lock().expect("provider entry mutex poisoned");
                let now = Instant::now();
                if guard.window.is_limited(now, guard.descriptor.rate_limit) {
                    (Some("rate_limited"), None, None)
                } else {
                    guard.window.record_request();
                    (None, Some(Arc::clone(&guard.adapter)), Some(guard.descriptor.timeout))
                }
            };
            if let Some(reason) = skip_reason {
                self.sink.emit(
                    Event::new("provider_failed")
                        .with("provider", name.to_string())
                        .with("error", reason),
                );
                continue;
            }
            let (adapter, timeout) = (adapter.unwrap(), timeout.unwrap());

            self.sink.emit(
                Event::new("provider_selected")
                    .with("provider", name.to_string())
                    .with("attempt", attempt as i64),
            );

            match tokio::time::timeout(timeout, adapter.generate(request)).await {
                Ok(Ok(artifact)) => {
                    let mut guard = entry.lock().expect("provider entry mutex poisoned");
                    guard.usage_count += 1;
                    return Ok(artifact);
                }
                Ok(Err(reason)) => {
                    self.record_failure(name, &reason);
                    last_error = Some(reason);
                }
                Err(_) => {
                    let reason = format!("timed out after {}ms", timeout.as_millis());
                    self.record_failure(name, &reason);
                    last_error = Some(reason);
                }
            }
        }

        if last_error.is_some() {
            self.fallback_triggered.fetch_add(1, Ordering::SeqCst);
        }

        if let Some(artifact) = static_fallback(&request.concept) {
            return Ok(artifact);
        }

        let fingerprint = format!("{}:{}", request.concept, request.modality);
        self.sink
            .emit(Event::new("all_providers_failed").with("request_fingerprint", fingerprint));
        Err(Error::AllProvidersFailed {
            last_error: last_error.unwrap_or_else(|| "no providers registered".to_string()),
        })
    }

    fn record_failure(&self, name: &ProviderName, reason: &str) {
        let mut entered_cooldown = false;
        if let Some(entry) = self.providers.get(name) {
            let mut guard = entry.lock().expect("provider entry mutex poisoned");
            let now = Instant::now();
            let was_in_cooldown = guard.errors.in_cooldown(now);
            guard.errors.record(now);
            guard.usage_count += 1;
            entered_cooldown = !was_in_cooldown && guard.errors.in_cooldown(now);
        }
        warn!(provider = %name, %reason, "provider call failed");
        self.sink.emit(
            Event::new("provider_failed")
                .with("provider", name.to_string())
                .with("error", reason.to_string()),
        );
        if entered_cooldown {
            self.sink.emit(
                Event::new("provider_cooldown_entered").with("provider", name.to_string()),
            );
        }
    }

    fn ranked_candidates(&self) -> Vec<ProviderName> {
        let order = self
            .registration_order
            .lock()
            .expect("registration order mutex poisoned")
            .clone();
        let mut candidates: Vec<(i32, usize, ProviderName)> = order
            .into_iter()
            .enumerate()
            .filter_map(|(index, name)| {
                let entry = self.providers.get(&name)?;
                let mut guard = entry.lock().expect("provider entry mutex poisoned");
                let now = Instant::now();
                if !guard.enabled || guard.errors.in_cooldown(now) {
                    None
                } else {
                    Some((guard.descriptor.priority, index, name.clone()))
                }
            })
            .collect();
        candidates.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
        candidates.into_iter().map(|(_, _, name)| name).collect()
    }

    /// Enables or disables a registered provider; a disabled provider is
    /// always skipped during selection.
    pub fn set_enabled(&self, name: &ProviderName, enabled: bool) -> Result<(), Error> {
        let entry = self
            .providers
            .get(name)
            .ok_or_else(|| ProviderError::UnknownProvider {
                name: name.to_string(),
            })?;
        entry.lock().expect("provider entry mutex poisoned").enabled = enabled;
        Ok(())
    }

    /// Changes a registered provider's selection priority (lower attempted
    /// first).
    pub fn set_priority(&self, name: &ProviderName, priority: i32) -> Result<(), Error> {
        let entry = self
            .providers
            .get(name)
            .ok_or_else(|| ProviderError::UnknownProvider {
                name: name.to_string(),
            })?;
        entry
            .lock()
            .expect("provider entry mutex poisoned")
            .descriptor
            .priority = priority;
        Ok(())
    }

    /// Resets a provider's rate-limit window to empty, starting a fresh
    /// `now + 60s` window.
    pub fn reset_rate_limits(&self, name: &ProviderName) -> Result<(), Error> {
        let entry = self
            .providers
            .get(name)
            .ok_or_else(|| ProviderError::UnknownProvider {
                name: name.to_string(),
            })?;
        entry
            .lock()
            .expect("provider entry mutex poisoned")
            .window
            .reset(Instant::now());
        Ok(())
    }

    /// Clears a provider's recorded error history, exiting cooldown
    /// immediately and resetting its status to `healthy`.
    pub fn clear_error_history(&self, name: &ProviderName) -> Result<(), Error> {
        let entry = self
            .providers
            .get(name)
            .ok_or_else(|| ProviderError::UnknownProvider {
                name: name.to_string(),
            })?;
        entry.lock().expect("provider entry mutex poisoned").errors.clear();
        Ok(())
    }

    /// Number of `generate` calls that exhausted at least one provider
    /// candidate before returning (via static fallback or terminal failure).
    #[must_use]
    pub fn fallback_triggered(&self) -> u64 {
        self.fallback_triggered.load(Ordering::SeqCst)
    }

    /// A point-in-time health snapshot for every registered provider (§4.3).
    #[must_use]
    pub fn provider_health(&self) -> Vec<(ProviderName, ProviderHealth)> {
        let order = self
            .registration_order
            .lock()
            .expect("registration order mutex poisoned")
            .clone();
        order
            .into_iter()
            .filter_map(|name| {
                let entry = self.providers.get(&name)?;
                let mut guard = entry.lock().expect("provider entry mutex poisoned");
                let now = Instant::now();
                let rate_limited = {
                    let limit = guard.descriptor.rate_limit;
                    guard.window.is_limited(now, limit)
                };
                let in_cooldown = guard.errors.in_cooldown(now);
                let recent_error_count = guard.errors.recent_count(now);
                let status =
                    derive_status(guard.enabled, rate_limited, in_cooldown, recent_error_count);
                let health = ProviderHealth {
                    enabled: guard.enabled,
                    rate_limited,
                    in_cooldown,
                    recent_error_count,
                    usage_count: guard.usage_count,
                    status,
                };
                Some((name, health))
            })
            .collect()
    }
}

/// Small deterministic substring-keyed table of pre-written artifacts,
/// returned when every registered provider has failed (§4.3).
fn static_fallback(concept: &ConceptId) -> Option<Artifact> {
    const TABLE: &[(&str, &str)] = &[
        (
            "photosynthesis",
            "Photosynthesis converts light, water, and carbon dioxide into glucose and oxygen.",
        ),
        (
            "recursion",
            "Recursion is a function calling itself on a smaller version of the same problem.",
        ),
        (
            "gravity",
            "Gravity is the attractive force between masses, weakest of the fundamental forces.",
        ),
    ];
    let concept_text = concept.as_ref();
    TABLE.iter().find_map(|(key, text)| {
        concept_text.contains(key).then(|| {
            Artifact::new(text.as_bytes().to_vec(), Provenance::StaticFallback)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::NoopSink;
    use std::time::Duration;

    struct FlakyProvider {
        fail_times: u32,
        calls: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl Provider for FlakyProvider {
        async fn generate(&self, _request: &ContentRequest) -> Result<Artifact, String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_times {
                Err("simulated failure".to_string())
            } else {
                Ok(Artifact::new(b"ok".to_vec(), Provenance::Provider("flaky".to_string())))
            }
        }
    }

    fn descriptor(name: &str, priority: i32) -> ProviderDescriptor {
        ProviderDescriptor {
            name: ProviderName::try_new(name).unwrap(),
            priority,
            timeout: Duration::from_millis(200),
            rate_limit: 100,
        }
    }

    fn request(concept: &str) -> ContentRequest {
        ContentRequest {
            concept: ConceptId::try_new(concept).unwrap(),
            modality: Modality::try_new("animation").unwrap(),
            complexity: 1,
        }
    }

    #[tokio::test]
    async fn test_failover_falls_through_to_static_fallback_for_photosynthesis() {
        let router = ProviderRouter::new(Arc::new(NoopSink));
        router.register(
            descriptor("p1", 0),
            Arc::new(FlakyProvider {
                fail_times: u32::MAX,
                calls: std::sync::atomic::AtomicU32::new(0),
            }),
        );
        router.register(
            descriptor("p2", 1),
            Arc::new(FlakyProvider {
                fail_times: u32::MAX,
                calls: std::sync::atomic::AtomicU32::new(0),
            }),
        );
        let artifact = router.generate(&request("photosynthesis")).await.unwrap();
        assert!(matches!(artifact.provenance(), Provenance::StaticFallback));
        assert_eq!(router.fallback_triggered(), 1);
    }

    #[tokio::test]
    async fn test_higher_priority_candidate_tried_first() {
        let router = ProviderRouter::new(Arc::new(NoopSink));
        router.register(
            descriptor("backup", 5),
            Arc::new(FlakyProvider {
                fail_times: 0,
                calls: std::sync::atomic::AtomicU32::new(0),
            }),
        );
        router.register(
            descriptor("primary", 0),
            Arc::new(FlakyProvider {
                fail_times: 0,
                calls: std::sync::atomic::AtomicU32::new(0),
            }),
        );
        let artifact = router.generate(&request("anything")).await.unwrap();
        assert!(matches!(artifact.provenance(), Provenance::Provider(p) if p == "flaky"));
        let health = router.provider_health();
        assert_eq!(health[0].0.to_string(), "primary");
    }

    #[tokio::test]
    async fn test_no_providers_and_no_fallback_match_is_all_providers_failed() {
        let router = ProviderRouter::new(Arc::new(NoopSink));
        let err = router.generate(&request("unmatched-concept-xyz")).await;
        assert!(matches!(err, Err(Error::AllProvidersFailed { .. })));
    }

    #[tokio::test]
    async fn test_disabled_provider_is_skipped() {
        let router = ProviderRouter::new(Arc::new(NoopSink));
        let name = ProviderName::try_new("primary").unwrap();
        router.register(
            descriptor("primary", 0),
            Arc::new(FlakyProvider {
                fail_times: 0,
                calls: std::sync::atomic::AtomicU32::new(0),
            }),
        );
        router.set_enabled(&name, false).unwrap();
        let err = router.generate(&request("unmatched-concept-xyz")).await;
        assert!(matches!(err, Err(Error::AllProvidersFailed { .. })));
    }

    #[tokio::test]
    async fn test_five_errors_in_two_minutes_emits_cooldown_entered_and_skips_provider() {
        let sink = crate::observability::RecordingSink::new();
        let router = ProviderRouter::new(Arc::clone(&sink) as Arc<dyn EventSink>);
        router.register(
            descriptor("flaky", 0),
            Arc::new(FlakyProvider {
                fail_times: u32::MAX,
                calls: std::sync::atomic::AtomicU32::new(0),
            }),
        );
        for _ in 0..5 {
            let _ = router.generate(&request("unmatched-concept-xyz")).await;
        }
        assert_eq!(sink.events_named("provider_cooldown_entered").len(), 1);

        let health = router.provider_health();
        assert_eq!(health[0].1.status, ProviderStatus::Cooldown);
    }
}
