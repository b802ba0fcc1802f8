//! Configuration for the cache and the action queue.

use crate::model::ArtifactType;
use std::time::Duration;

const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Time-to-live per artifact type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlPolicy {
    /// TTL for solved-problem records.
    pub solution: Duration,
    /// TTL for quiz snapshots.
    pub quiz: Duration,
    /// TTL for analytics summaries.
    pub analytics: Duration,
}

impl TtlPolicy {
    /// Returns the TTL for `artifact_type`.
    #[must_use]
    pub fn ttl_for(&self, artifact_type: ArtifactType) -> Duration {
        match artifact_type {
            ArtifactType::Solution => self.solution,
            ArtifactType::Quiz => self.quiz,
            ArtifactType::Analytics => self.analytics,
        }
    }

    /// Sets the TTL for one artifact type.
    #[must_use]
    pub fn with_ttl(mut self, artifact_type: ArtifactType, ttl: Duration) -> Self {
        match artifact_type {
            ArtifactType::Solution => self.solution = ttl,
            ArtifactType::Quiz => self.quiz = ttl,
            ArtifactType::Analytics => self.analytics = ttl,
        }
        self
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            solution: 14 * DAY,
            quiz: 3 * DAY,
            analytics: 12 * HOUR,
        }
    }
}

/// Maximum cached items per owner, per artifact type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityPolicy {
    /// Limit for solved-problem records.
    pub solution: usize,
    /// Limit for quiz snapshots.
    pub quiz: usize,
    /// Limit for analytics summaries.
    pub analytics: usize,
}

impl CapacityPolicy {
    /// Returns the limit for `artifact_type`.
    #[must_use]
    pub fn limit_for(&self, artifact_type: ArtifactType) -> usize {
        match artifact_type {
            ArtifactType::Solution => self.solution,
            ArtifactType::Quiz => self.quiz,
            ArtifactType::Analytics => self.analytics,
        }
    }

    /// Sets the limit for one artifact type.
    #[must_use]
    pub fn with_limit(mut self, artifact_type: ArtifactType, limit: usize) -> Self {
        match artifact_type {
            ArtifactType::Solution => self.solution = limit,
            ArtifactType::Quiz => self.quiz = limit,
            ArtifactType::Analytics => self.analytics = limit,
        }
        self
    }
}

impl Default for CapacityPolicy {
    fn default() -> Self {
        Self {
            solution: 500,
            quiz: 100,
            analytics: 20,
        }
    }
}

/// Configuration for [`crate::CacheStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Expiry horizon per type.
    pub ttl: TtlPolicy,
    /// Capacity per owner and type.
    pub capacity: CapacityPolicy,
    /// Run capacity eviction for the owner/type after every `put`.
    pub enforce_capacity_on_put: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: TtlPolicy::default(),
            capacity: CapacityPolicy::default(),
            enforce_capacity_on_put: true,
        }
    }
}

impl CacheConfig {
    /// Sets the TTL policy.
    #[must_use]
    pub fn with_ttl(mut self, ttl: TtlPolicy) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets the capacity policy.
    #[must_use]
    pub fn with_capacity(mut self, capacity: CapacityPolicy) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets whether `put` enforces capacity.
    #[must_use]
    pub fn with_enforce_capacity_on_put(mut self, enforce: bool) -> Self {
        self.enforce_capacity_on_put = enforce;
        self
    }
}

/// Configuration for [`crate::ActionQueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Failed attempts tolerated before an action becomes a dead letter.
    pub max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_retries: 5 }
    }
}

impl QueueConfig {
    /// Sets the retry ceiling.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ttls_follow_type_horizons() {
        let ttl = TtlPolicy::default();
        assert!(ttl.ttl_for(ArtifactType::Solution) >= 7 * DAY);
        assert!(ttl.ttl_for(ArtifactType::Quiz) <= 7 * DAY);
        assert!(ttl.ttl_for(ArtifactType::Analytics) < DAY);
    }

    #[test]
    fn policy_builders() {
        let ttl = TtlPolicy::default().with_ttl(ArtifactType::Quiz, HOUR);
        assert_eq!(ttl.ttl_for(ArtifactType::Quiz), HOUR);

        let capacity = CapacityPolicy::default().with_limit(ArtifactType::Analytics, 3);
        assert_eq!(capacity.limit_for(ArtifactType::Analytics), 3);

        let config = CacheConfig::default()
            .with_ttl(ttl.clone())
            .with_capacity(capacity)
            .with_enforce_capacity_on_put(false);
        assert_eq!(config.ttl, ttl);
        assert!(!config.enforce_capacity_on_put);

        assert_eq!(QueueConfig::default().with_max_retries(2).max_retries, 2);
    }
}
