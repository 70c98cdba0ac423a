//! Domain types for the provider router: provider identity, descriptors,
//! health status, and the internal rate-limit/cooldown bookkeeping (§4.3).

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use nutype::nutype;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A registered provider's name, used as its router key and in observability
/// events and error messages.
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
pub struct ProviderName(String);

/// Errors internal to the provider router that do not map onto a shared
/// [`crate::error::Error`] kind named in the taxonomy (§7).
#[derive(Debug, Error)]
pub enum ProviderError {
    /// `set_priority`/`set_enabled` named a provider the router never
    /// registered.
    #[error("unknown provider: {name}")]
    UnknownProvider {
        /// The provider name that was looked up.
        name: String,
    },
}

/// Derived health status for a single provider (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderStatus {
    /// Zero recent errors.
    Healthy,
    /// 1-3 recent errors in the last 5 minutes.
    Degraded,
    /// More than 3 recent errors in the last 5 minutes.
    Unstable,
    /// At or above the cooldown error threshold.
    Cooldown,
    /// Currently inside its rate-limit window at the request cap.
    RateLimited,
    /// Administratively disabled via `set_enabled(false)`.
    Disabled,
}

/// Immutable-at-registration provider configuration.
#[derive(Debug, Clone)]
pub struct ProviderDescriptor {
    /// The provider's router key.
    pub name: ProviderName,
    /// Selection order; lower attempted first, ties broken by registration
    /// order.
    pub priority: i32,
    /// Per-call deadline enforced by the router, not the adapter.
    pub timeout: Duration,
    /// Requests allowed per 60-second rate-limit window.
    pub rate_limit: u32,
}

/// Point-in-time health snapshot returned by `provider_health()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderHealth {
    /// Administratively enabled.
    pub enabled: bool,
    /// True iff the rate-limit window is currently exhausted.
    pub rate_limited: bool,
    /// True iff the provider is in cooldown.
    pub in_cooldown: bool,
    /// Errors recorded in the last 5 minutes.
    pub recent_error_count: usize,
    /// Total successful + failed calls ever attempted.
    pub usage_count: u64,
    /// The derived overall status.
    pub status: ProviderStatus,
}

/// Fixed 60-second rate-limit window state (§4.3, §9 Open Question c): the
/// window resets at `now + 60s` on the first request observed after the
/// previous window expired, preserving drift under bursty load rather than
/// aligning to a fixed wall-clock schedule.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitWindow {
    pub(crate) reset_at: Instant,
    pub(crate) count: u32,
}

impl RateLimitWindow {
    pub(crate) fn new(now: Instant) -> Self {
        Self {
            reset_at: now + Duration::from_secs(60),
            count: 0,
        }
    }

    /// Advances the window if expired, then reports whether the caller is
    /// rate-limited (without consuming a slot).
    pub(crate) fn is_limited(&mut self, now: Instant, limit: u32) -> bool {
        if now >= self.reset_at {
            self.reset_at = now + Duration::from_secs(60);
            self.count = 0;
        }
        self.count >= limit
    }

    pub(crate) fn record_request(&mut self) {
        self.count += 1;
    }

    pub(crate) fn reset(&mut self, now: Instant) {
        *self = Self::new(now);
    }
}

/// Error history: a bounded ring buffer of recent error instants, used to
/// compute the 5-minute unstable/degraded threshold and the 2-minute
/// cooldown threshold (§4.3).
#[derive(Debug, Clone, Default)]
pub struct ErrorHistory {
    instants: VecDeque<Instant>,
}

const COOLDOWN_WINDOW: Duration = Duration::from_secs(120);
const COOLDOWN_THRESHOLD: usize = 5;
const HEALTH_WINDOW: Duration = Duration::from_secs(300);

impl ErrorHistory {
    pub(crate) fn record(&mut self, now: Instant) {
        self.instants.push_back(now);
        self.prune(now);
    }

    pub(crate) fn clear(&mut self) {
        self.instants.clear();
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&front) = self.instants.front() {
            if now.duration_since(front) > HEALTH_WINDOW {
                self.instants.pop_front();
            } else {
                break;
            }
        }
    }

    /// Errors within the last 5 minutes.
    pub(crate) fn recent_count(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.instants.len()
    }

    /// True iff at least [`COOLDOWN_THRESHOLD`] errors occurred within the
    /// last 2 minutes.
    pub(crate) fn in_cooldown(&mut self, now: Instant) -> bool {
        self.prune(now);
        self.instants
            .iter()
            .filter(|&&instant| now.duration_since(instant) <= COOLDOWN_WINDOW)
            .count()
            >= COOLDOWN_THRESHOLD
    }
}

/// Derives overall status from the component signals (§4.3): disabled beats
/// rate-limited beats cooldown beats the error-count tiers.
#[must_use]
pub fn derive_status(
    enabled: bool,
    rate_limited: bool,
    in_cooldown: bool,
    recent_errors: usize,
) -> ProviderStatus {
    if !enabled {
        ProviderStatus::Disabled
    } else if rate_limited {
        ProviderStatus::RateLimited
    } else if in_cooldown {
        ProviderStatus::Cooldown
    } else if recent_errors > 3 {
        ProviderStatus::Unstable
    } else if recent_errors >= 1 {
        ProviderStatus::Degraded
    } else {
        ProviderStatus::Healthy
    }
}
