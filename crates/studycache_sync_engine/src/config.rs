//! Configuration for the sync engine.

use rand::Rng;
use std::time::Duration;
use studycache_core::ArtifactType;

/// Configuration for sync cycles.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Backoff between failed attempts of the same request.
    pub backoff: BackoffPolicy,
    /// Upper bound for a single backend call.
    pub request_timeout: Duration,
    /// How long a failed cycle holds the owner before returning to idle.
    pub error_cooldown: Duration,
    /// Period of the background sync; `None` disables it.
    pub sync_interval: Option<Duration>,
    /// Period of the background expiry sweep; `None` disables it.
    pub sweep_interval: Option<Duration>,
    /// Artifact types pulled after the queue drains, in order.
    pub artifact_types: Vec<ArtifactType>,
}

impl SyncConfig {
    /// Sets the backoff policy.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the cool-down after a failed cycle.
    pub fn with_error_cooldown(mut self, cooldown: Duration) -> Self {
        self.error_cooldown = cooldown;
        self
    }

    /// Sets the background sync interval.
    pub fn with_sync_interval(mut self, interval: Option<Duration>) -> Self {
        self.sync_interval = interval.filter(|d| !d.is_zero());
        self
    }

    /// Sets the background sweep interval.
    pub fn with_sweep_interval(mut self, interval: Option<Duration>) -> Self {
        self.sweep_interval = interval.filter(|d| !d.is_zero());
        self
    }

    /// Sets the artifact types to pull.
    pub fn with_artifact_types(mut self, types: impl Into<Vec<ArtifactType>>) -> Self {
        self.artifact_types = types.into();
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            request_timeout: Duration::from_secs(30),
            error_cooldown: Duration::from_secs(5),
            sync_interval: Some(Duration::from_secs(15 * 60)),
            sweep_interval: Some(Duration::from_secs(60 * 60)),
            artifact_types: ArtifactType::ALL.to_vec(),
        }
    }
}

/// Capped exponential backoff.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Ceiling for any delay.
    pub max_delay: Duration,
    /// Growth factor per failure.
    pub multiplier: f64,
    /// Whether to add up to 25% random jitter.
    pub jitter: bool,
}

impl BackoffPolicy {
    /// A policy without delays.
    pub fn none() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before the next attempt after `retry` failures (1-based).
    /// Never exceeds `max_delay`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let max = self.max_delay.as_secs_f64();
        let mut delay = if base.is_finite() { base.min(max) } else { max };

        if self.jitter && delay > 0.0 {
            delay += delay * 0.25 * rand::thread_rng().gen::<f64>();
        }
        Duration::from_secs_f64(delay.min(max))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: true,
        }
    }
}
