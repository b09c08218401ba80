//! # Configuration Management
//!
//! The single canonical source for every tunable in the processing core.
//! Retry counts, backoff bases, timeouts, worker concurrency, circuit
//! breaker thresholds, and classifier keyword lists all live here; inline
//! literals elsewhere in the crate are a defect.
//!
//! Configuration is plain serde data: defaults are compiled in, and the
//! [`loader`] merges an optional environment-specific TOML file plus
//! `AEGIS_`-prefixed environment variables on top.

pub mod loader;

pub use loader::ConfigLoader;

use crate::constants::Tier;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the processing core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AegisConfig {
    pub database: DatabaseConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub health: HealthConfig,
    pub classifier: ClassifierConfig,
    pub queue: QueueConfig,
    pub emergency: EmergencyConfig,
    pub tiers: TierSettings,
}

impl Default for AegisConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            health: HealthConfig::default(),
            classifier: ClassifierConfig::default(),
            queue: QueueConfig::default(),
            emergency: EmergencyConfig::default(),
            tiers: TierSettings::default(),
        }
    }
}

impl AegisConfig {
    /// Validate cross-field invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if self.circuit_breaker.failure_threshold == 0 {
            return Err("circuit_breaker.failure_threshold must be >= 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.health.max_pool_utilization) {
            return Err("health.max_pool_utilization must be within [0.0, 1.0]".to_string());
        }
        if self.health.min_healthy_score > 100 {
            return Err("health.min_healthy_score must be within [0, 100]".to_string());
        }
        if self.queue.memory_max_depth == 0 {
            return Err("queue.memory_max_depth must be >= 1".to_string());
        }
        for tier in Tier::ALL {
            let tc = self.tiers.for_tier(tier);
            if tc.worker_concurrency == 0 {
                return Err(format!("tiers.{tier}.worker_concurrency must be >= 1"));
            }
            if tc.max_processing_time_ms == 0 {
                return Err(format!("tiers.{tier}.max_processing_time_ms must be >= 1"));
            }
        }
        Ok(())
    }
}

/// Connection settings for the shared PostgreSQL backing store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection URL. `None` means the core runs with the in-memory
    /// backend only (tests, local development).
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            acquire_timeout_ms: 5_000,
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

/// Circuit breaker thresholds for the backing-store guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the circuit from Closed to Open.
    pub failure_threshold: u32,
    /// How long the circuit stays Open before permitting a single trial.
    pub open_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout_ms: 30_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }
}

/// Health scoring and readiness gate thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Added to the health score on every successful store operation.
    pub success_increment: u32,
    /// Base penalty per failure; multiplied by the consecutive-failure
    /// count so sustained failure is penalized more than isolated blips.
    pub failure_base_penalty: u32,
    /// Readiness gate: minimum health score to accept store-dependent work.
    pub min_healthy_score: u32,
    /// Readiness gate: maximum connection-pool utilization.
    pub max_pool_utilization: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            success_increment: 5,
            failure_base_penalty: 10,
            min_healthy_score: 30,
            max_pool_utilization: 0.9,
        }
    }
}

/// A named rectangular geographic zone used by the classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoZone {
    pub name: String,
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl GeoZone {
    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lng >= self.min_lng && lng <= self.max_lng
    }
}

/// Keyword lists and zones for the rule-cascade classifier.
///
/// These are deliberately plain configurable lists, a pluggable heuristic,
/// not a detection system. Deployments are expected to replace them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Content matches here classify as Emergency.
    pub violence_keywords: Vec<String>,
    /// Content matches here classify as Standard, tagged for enrichment.
    pub safety_keywords: Vec<String>,
    /// Reports located inside these zones classify as Emergency.
    pub high_priority_zones: Vec<GeoZone>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            violence_keywords: [
                "attack", "assault", "weapon", "gun", "knife", "threat", "stalk", "follow",
                "kidnap", "abduct", "harass", "violence",
            ]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
            safety_keywords: [
                "unsafe", "suspicious", "scared", "alone", "dark", "broken light", "drunk",
                "shout",
            ]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
            high_priority_zones: Vec::new(),
        }
    }
}

/// Queue-layer settings shared across tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// How often the promotion loop tries to drain fallback jobs back to
    /// the broker after recovery.
    pub promotion_interval_ms: u64,
    /// Maximum jobs promoted per pass.
    pub promotion_batch_size: usize,
    /// Capacity bound of the in-memory fallback queue, per tier.
    pub memory_max_depth: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            promotion_interval_ms: 5_000,
            promotion_batch_size: 50,
            memory_max_depth: 10_000,
        }
    }
}

impl QueueConfig {
    pub fn promotion_interval(&self) -> Duration {
        Duration::from_millis(self.promotion_interval_ms)
    }
}

/// Emergency direct-path settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmergencyConfig {
    /// Time budget for the synchronous inline execution attempt.
    pub inline_timeout_ms: u64,
    /// Whether a redundant audit copy is enqueued alongside inline
    /// execution.
    pub audit_copy: bool,
}

impl Default for EmergencyConfig {
    fn default() -> Self {
        Self {
            inline_timeout_ms: 10_000,
            audit_copy: true,
        }
    }
}

impl EmergencyConfig {
    pub fn inline_timeout(&self) -> Duration {
        Duration::from_millis(self.inline_timeout_ms)
    }
}

/// Backoff strategy applied between retries of a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// `base * 2^attempt + jitter`, capped at `max_delay_ms`.
    Exponential,
    /// Constant `base_delay_ms` between attempts.
    Fixed,
}

/// Retry backoff parameters for one tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub strategy: BackoffStrategy,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl BackoffConfig {
    pub fn exponential(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            base_delay_ms,
            max_delay_ms,
        }
    }

    pub fn fixed(delay_ms: u64) -> Self {
        Self {
            strategy: BackoffStrategy::Fixed,
            base_delay_ms: delay_ms,
            max_delay_ms: delay_ms,
        }
    }
}

/// Per-tier processing profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    /// Default priority for jobs on this tier (lower = more urgent).
    pub priority: i32,
    /// Retry budget per job.
    pub max_retries: u32,
    pub backoff: BackoffConfig,
    /// Handler time budget; exceeding it marks the job Stalled.
    pub max_processing_time_ms: u64,
    /// How often the reaper scans for stalled jobs.
    pub stalled_check_interval_ms: u64,
    /// Stall count after which a job is dead-lettered outright.
    pub max_stalled_count: u32,
    /// Concurrent workers in this tier's pool.
    pub worker_concurrency: usize,
    /// Idle poll interval when the queue is empty.
    pub poll_interval_ms: u64,
}

impl TierConfig {
    pub fn max_processing_time(&self) -> Duration {
        Duration::from_millis(self.max_processing_time_ms)
    }

    pub fn stalled_check_interval(&self) -> Duration {
        Duration::from_millis(self.stalled_check_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// The per-tier configuration table.
///
/// Matched exhaustively so a new tier cannot silently run without a
/// profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierSettings {
    pub emergency: TierConfig,
    pub standard: TierConfig,
    pub background: TierConfig,
    pub analytics: TierConfig,
    pub email: TierConfig,
    pub device: TierConfig,
}

impl TierSettings {
    pub fn for_tier(&self, tier: Tier) -> &TierConfig {
        match tier {
            Tier::Emergency => &self.emergency,
            Tier::Standard => &self.standard,
            Tier::Background => &self.background,
            Tier::Analytics => &self.analytics,
            Tier::Email => &self.email,
            Tier::Device => &self.device,
        }
    }
}

impl Default for TierSettings {
    fn default() -> Self {
        Self {
            emergency: TierConfig {
                priority: 1,
                max_retries: 5,
                backoff: BackoffConfig::exponential(500, 30_000),
                max_processing_time_ms: 30_000,
                stalled_check_interval_ms: 5_000,
                max_stalled_count: 2,
                worker_concurrency: 8,
                poll_interval_ms: 50,
            },
            standard: TierConfig {
                priority: 2,
                max_retries: 3,
                backoff: BackoffConfig::exponential(1_000, 60_000),
                max_processing_time_ms: 60_000,
                stalled_check_interval_ms: 15_000,
                max_stalled_count: 2,
                worker_concurrency: 4,
                poll_interval_ms: 200,
            },
            background: TierConfig {
                priority: 5,
                max_retries: 3,
                backoff: BackoffConfig::exponential(5_000, 300_000),
                max_processing_time_ms: 120_000,
                stalled_check_interval_ms: 30_000,
                max_stalled_count: 1,
                worker_concurrency: 2,
                poll_interval_ms: 500,
            },
            analytics: TierConfig {
                priority: 8,
                max_retries: 2,
                backoff: BackoffConfig::fixed(30_000),
                max_processing_time_ms: 300_000,
                stalled_check_interval_ms: 60_000,
                max_stalled_count: 1,
                worker_concurrency: 1,
                poll_interval_ms: 1_000,
            },
            email: TierConfig {
                priority: 3,
                max_retries: 5,
                backoff: BackoffConfig::exponential(2_000, 120_000),
                max_processing_time_ms: 30_000,
                stalled_check_interval_ms: 15_000,
                max_stalled_count: 2,
                worker_concurrency: 2,
                poll_interval_ms: 200,
            },
            device: TierConfig {
                priority: 3,
                max_retries: 3,
                backoff: BackoffConfig::fixed(5_000),
                max_processing_time_ms: 15_000,
                stalled_check_interval_ms: 10_000,
                max_stalled_count: 2,
                worker_concurrency: 2,
                poll_interval_ms: 200,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        assert!(AegisConfig::default().validate().is_ok());
    }

    #[test]
    fn test_every_tier_has_a_profile() {
        let settings = TierSettings::default();
        for tier in Tier::ALL {
            let tc = settings.for_tier(tier);
            assert!(tc.worker_concurrency >= 1, "{tier} has no workers");
        }
    }

    #[test]
    fn test_emergency_outranks_standard() {
        let settings = TierSettings::default();
        assert!(settings.emergency.priority < settings.standard.priority);
        assert!(settings.emergency.worker_concurrency > settings.standard.worker_concurrency);
    }

    #[test]
    fn test_validation_rejects_zero_workers() {
        let mut config = AegisConfig::default();
        config.tiers.standard.worker_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_utilization() {
        let mut config = AegisConfig::default();
        config.health.max_pool_utilization = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_geo_zone_containment() {
        let zone = GeoZone {
            name: "downtown".to_string(),
            min_lat: 10.0,
            max_lat: 11.0,
            min_lng: 20.0,
            max_lng: 21.0,
        };
        assert!(zone.contains(10.5, 20.5));
        assert!(!zone.contains(9.9, 20.5));
        assert!(!zone.contains(10.5, 21.1));
    }

    #[test]
    fn test_config_round_trips_through_serde() {
        let config = AegisConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: AegisConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(
            parsed.circuit_breaker.failure_threshold,
            config.circuit_breaker.failure_threshold
        );
        assert_eq!(parsed.tiers.emergency.priority, config.tiers.emergency.priority);
    }
}
