//! Construction-time configuration for the whole substrate (§6).
//!
//! A single record, built through a validating builder, with named presets
//! mirroring the teacher's `development()`/`production()`/`testing()`
//! convention. No environment variables, files, or CLI flags are read by
//! this crate — `save_to_file`/`load_from_file` are a convenience for
//! callers who want file-backed config, not an input path into the core.

use std::path::Path;

use nutype::nutype;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Per-handler delivery deadline in milliseconds, used when a message
/// carries no per-message timeout of its own.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 600_000),
    derive(
        Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
        TryFrom, Into
    ),
    default = 30_000
)]
pub struct HandlerTimeoutMs(u64);

impl HandlerTimeoutMs {
    /// Converts to a `Duration`.
    #[must_use]
    pub fn as_duration(self) -> std::time::Duration {
        std::time::Duration::from_millis(self.into_inner())
    }
}

/// Maximum retry attempts before a message is dead-lettered.
#[nutype(
    validate(less_or_equal = 20),
    derive(
        Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
        TryFrom, Into
    ),
    default = 3
)]
pub struct MaxRetries(u8);

/// Interval between background cache reaper ticks, in milliseconds.
#[nutype(
    validate(greater_or_equal = 1_000),
    derive(
        Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
        TryFrom, Into
    ),
    default = 3_600_000
)]
pub struct ReaperIntervalMs(u64);

impl ReaperIntervalMs {
    /// Converts to a `Duration`.
    #[must_use]
    pub fn as_duration(self) -> std::time::Duration {
        std::time::Duration::from_millis(self.into_inner())
    }
}

/// Hard bound on the number of messages the bus will hold before rejecting
/// new enqueues with `QueueOverflow`.
#[nutype(
    validate(greater_or_equal = 1),
    derive(
        Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
        TryFrom, Into
    ),
    default = 10_000
)]
pub struct MaxQueueSize(usize);

/// Total byte budget for the content cache.
#[nutype(
    validate(greater_or_equal = 1),
    derive(
        Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
        TryFrom, Into
    ),
    default = 52_428_800
)]
pub struct CacheBudgetBytes(usize);

/// Default TTL applied to a cache entry when `put` does not specify one, in
/// milliseconds.
#[nutype(
    validate(greater_or_equal = 1_000),
    derive(
        Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
        TryFrom, Into
    ),
    default = 86_400_000
)]
pub struct DefaultEntryTtlMs(u64);

impl DefaultEntryTtlMs {
    /// Converts to a `Duration`.
    #[must_use]
    pub fn as_duration(self) -> std::time::Duration {
        std::time::Duration::from_millis(self.into_inner())
    }
}

/// Maximum number of admission tasks running concurrently.
#[nutype(
    validate(greater_or_equal = 1),
    derive(
        Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
        TryFrom, Into
    ),
    default = 3
)]
pub struct MaxConcurrentAdmissions(usize);

/// Consecutive failures before a participant's circuit breaker trips open.
#[nutype(
    validate(greater_or_equal = 1),
    derive(
        Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
        TryFrom, Into
    ),
    default = 5
)]
pub struct BreakerFailureThreshold(u32);

/// How long an open breaker waits before allowing a half-open probe, in
/// milliseconds.
#[nutype(
    validate(greater_or_equal = 100),
    derive(
        Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
        TryFrom, Into
    ),
    default = 60_000
)]
pub struct BreakerRecoveryMs(u64);

impl BreakerRecoveryMs {
    /// Converts to a `Duration`.
    #[must_use]
    pub fn as_duration(self) -> std::time::Duration {
        std::time::Duration::from_millis(self.into_inner())
    }
}

/// Construction-time configuration for every component in this crate (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Default per-handler delivery deadline.
    pub default_handler_timeout_ms: HandlerTimeoutMs,
    /// Maximum retry attempts before dead-lettering or rejecting a task.
    pub max_retries: MaxRetries,
    /// Whether the bus keeps a dead-letter log of terminal failures.
    pub enable_dead_letter: bool,
    /// Interval between cache reaper ticks.
    pub reaper_interval_ms: ReaperIntervalMs,
    /// Hard bound on bus queue depth.
    pub max_queue_size: MaxQueueSize,
    /// Total byte budget for the content cache.
    pub cache_budget_bytes: CacheBudgetBytes,
    /// Default cache entry TTL.
    pub default_entry_ttl_ms: DefaultEntryTtlMs,
    /// Maximum concurrently-executing admission tasks.
    pub max_concurrent_admissions: MaxConcurrentAdmissions,
    /// Circuit breaker failure threshold.
    pub breaker_failure_threshold: BreakerFailureThreshold,
    /// Circuit breaker recovery interval.
    pub breaker_recovery_ms: BreakerRecoveryMs,
}

impl CoreConfig {
    /// A configuration tuned for local development: short timeouts, small
    /// queues, and a sensitive breaker for fast feedback.
    #[must_use]
    pub fn development() -> Self {
        Self {
            default_handler_timeout_ms: HandlerTimeoutMs::try_new(10_000).unwrap(),
            max_retries: MaxRetries::try_new(2).unwrap(),
            enable_dead_letter: true,
            reaper_interval_ms: ReaperIntervalMs::try_new(60_000).unwrap(),
            max_queue_size: MaxQueueSize::try_new(1_000).unwrap(),
            cache_budget_bytes: CacheBudgetBytes::try_new(10_485_760).unwrap(),
            default_entry_ttl_ms: DefaultEntryTtlMs::try_new(3_600_000).unwrap(),
            max_concurrent_admissions: MaxConcurrentAdmissions::try_new(2).unwrap(),
            breaker_failure_threshold: BreakerFailureThreshold::try_new(3).unwrap(),
            breaker_recovery_ms: BreakerRecoveryMs::try_new(5_000).unwrap(),
        }
    }

    /// The default production configuration, matching the defaults named in
    /// the configuration table.
    #[must_use]
    pub fn production() -> Self {
        Self {
            default_handler_timeout_ms: HandlerTimeoutMs::try_new(30_000).unwrap(),
            max_retries: MaxRetries::try_new(3).unwrap(),
            enable_dead_letter: true,
            reaper_interval_ms: ReaperIntervalMs::try_new(3_600_000).unwrap(),
            max_queue_size: MaxQueueSize::try_new(10_000).unwrap(),
            cache_budget_bytes: CacheBudgetBytes::try_new(52_428_800).unwrap(),
            default_entry_ttl_ms: DefaultEntryTtlMs::try_new(86_400_000).unwrap(),
            max_concurrent_admissions: MaxConcurrentAdmissions::try_new(3).unwrap(),
            breaker_failure_threshold: BreakerFailureThreshold::try_new(5).unwrap(),
            breaker_recovery_ms: BreakerRecoveryMs::try_new(60_000).unwrap(),
        }
    }

    /// A configuration sized for fast, deterministic tests.
    #[must_use]
    pub fn testing() -> Self {
        Self {
            default_handler_timeout_ms: HandlerTimeoutMs::try_new(1_000).unwrap(),
            max_retries: MaxRetries::try_new(1).unwrap(),
            enable_dead_letter: true,
            reaper_interval_ms: ReaperIntervalMs::try_new(1_000).unwrap(),
            max_queue_size: MaxQueueSize::try_new(100).unwrap(),
            cache_budget_bytes: CacheBudgetBytes::try_new(65_536).unwrap(),
            default_entry_ttl_ms: DefaultEntryTtlMs::try_new(60_000).unwrap(),
            max_concurrent_admissions: MaxConcurrentAdmissions::try_new(2).unwrap(),
            breaker_failure_threshold: BreakerFailureThreshold::try_new(3).unwrap(),
            breaker_recovery_ms: BreakerRecoveryMs::try_new(100).unwrap(),
        }
    }

    /// Cross-field validation beyond what each `nutype` field already
    /// enforces on its own.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a field is internally valid but
    /// inconsistent with another (currently none are cross-checked; this
    /// exists as the single seam future cross-field rules attach to,
    /// mirroring the teacher's `RouterConfig::validate`).
    pub fn validate(&self) -> Result<(), Error> {
        Ok(())
    }

    /// Saves this configuration as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] or [`Error::Io`] if writing fails.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Loads a configuration previously written by [`Self::save_to_file`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`], [`Error::Serialization`], or [`Error::Config`]
    /// if the file is missing, malformed, or fails validation.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self::production()
    }
}

/// Fluent, validating builder for [`CoreConfig`], starting from production
/// defaults.
pub struct CoreConfigBuilder {
    config: CoreConfig,
}

impl CoreConfigBuilder {
    /// Starts a new builder from production defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: CoreConfig::production(),
        }
    }

    /// Sets the default per-handler delivery deadline.
    #[must_use]
    pub fn default_handler_timeout_ms(mut self, value: HandlerTimeoutMs) -> Self {
        self.config.default_handler_timeout_ms = value;
        self
    }

    /// Sets the maximum retry attempts.
    #[must_use]
    pub fn max_retries(mut self, value: MaxRetries) -> Self {
        self.config.max_retries = value;
        self
    }

    /// Enables or disables the dead-letter log.
    #[must_use]
    pub fn enable_dead_letter(mut self, value: bool) -> Self {
        self.config.enable_dead_letter = value;
        self
    }

    /// Sets the cache reaper interval.
    #[must_use]
    pub fn reaper_interval_ms(mut self, value: ReaperIntervalMs) -> Self {
        self.config.reaper_interval_ms = value;
        self
    }

    /// Sets the hard bus queue size bound.
    #[must_use]
    pub fn max_queue_size(mut self, value: MaxQueueSize) -> Self {
        self.config.max_queue_size = value;
        self
    }

    /// Sets the cache byte budget.
    #[must_use]
    pub fn cache_budget_bytes(mut self, value: CacheBudgetBytes) -> Self {
        self.config.cache_budget_bytes = value;
        self
    }

    /// Sets the default cache entry TTL.
    #[must_use]
    pub fn default_entry_ttl_ms(mut self, value: DefaultEntryTtlMs) -> Self {
        self.config.default_entry_ttl_ms = value;
        self
    }

    /// Sets the maximum concurrently-executing admission tasks.
    #[must_use]
    pub fn max_concurrent_admissions(mut self, value: MaxConcurrentAdmissions) -> Self {
        self.config.max_concurrent_admissions = value;
        self
    }

    /// Sets the circuit breaker failure threshold.
    #[must_use]
    pub fn breaker_failure_threshold(mut self, value: BreakerFailureThreshold) -> Self {
        self.config.breaker_failure_threshold = value;
        self
    }

    /// Sets the circuit breaker recovery interval.
    #[must_use]
    pub fn breaker_recovery_ms(mut self, value: BreakerRecoveryMs) -> Self {
        self.config.breaker_recovery_ms = value;
        self
    }

    /// Validates and builds the final configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the assembled configuration fails
    /// cross-field validation.
    pub fn build(self) -> Result<CoreConfig, Error> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for CoreConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_defaults_should_match_configuration_table() {
        let config = CoreConfig::production();
        assert_eq!(config.default_handler_timeout_ms.into_inner(), 30_000);
        assert_eq!(config.max_retries.into_inner(), 3);
        assert!(config.enable_dead_letter);
        assert_eq!(config.reaper_interval_ms.into_inner(), 3_600_000);
        assert_eq!(config.max_queue_size.into_inner(), 10_000);
        assert_eq!(config.cache_budget_bytes.into_inner(), 52_428_800);
        assert_eq!(config.default_entry_ttl_ms.into_inner(), 86_400_000);
        assert_eq!(config.max_concurrent_admissions.into_inner(), 3);
        assert_eq!(config.breaker_failure_threshold.into_inner(), 5);
        assert_eq!(config.breaker_recovery_ms.into_inner(), 60_000);
    }

    #[test]
    fn test_builder_should_override_single_field_and_keep_rest_default() {
        let config = CoreConfigBuilder::new()
            .max_retries(MaxRetries::try_new(7).unwrap())
            .build()
            .unwrap();

        assert_eq!(config.max_retries.into_inner(), 7);
        assert_eq!(config.max_queue_size.into_inner(), 10_000);
    }

    #[test]
    fn test_save_and_load_round_trip_should_preserve_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = CoreConfig::testing();

        config.save_to_file(&path).unwrap();
        let loaded = CoreConfig::load_from_file(&path).unwrap();

        assert_eq!(
            loaded.breaker_recovery_ms.into_inner(),
            config.breaker_recovery_ms.into_inner()
        );
    }
}
