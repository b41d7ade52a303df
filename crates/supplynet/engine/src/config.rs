//! Engine configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::scoring::DecayConfig;

/// Engine configuration. Every field has a default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// DAG walk bounds
    #[serde(default)]
    pub graph: GraphConfig,

    /// Contention retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Transparency scoring
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Read-path cache
    #[serde(default)]
    pub cache: CacheConfig,

    /// Plan submission
    #[serde(default)]
    pub plan: PlanConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Longest path any validator or tracer walk may follow
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff delay (milliseconds)
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay (milliseconds)
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Backoff multiplier
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Add jitter to delays
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            multiplier: default_multiplier(),
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default)]
    pub decay: DecayConfig,

    /// Score a branch with missing upstream data contributes
    #[serde(default)]
    pub missing_branch_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entry lifetime in seconds. Zero disables the cache.
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,

    #[serde(default = "default_cache_entries")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl(),
            max_entries: default_cache_entries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanConfig {
    /// Used when the caller supplies no timeout
    #[serde(default = "default_plan_timeout")]
    pub default_timeout_ms: u64,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_plan_timeout(),
        }
    }
}

impl PlanConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_max_depth() -> usize {
    64
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff() -> u64 {
    10
}

fn default_max_backoff() -> u64 {
    500
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_cache_ttl() -> u64 {
    30
}

fn default_cache_entries() -> usize {
    1024
}

fn default_plan_timeout() -> u64 {
    5000
}
