//! Configuration management for ShardB
//!
//! Supports environment variable overrides (`SHARDB_`-prefixed, `__`-separated
//! for nested fields) layered over hardcoded defaults, then validated.

use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration structure for ShardB.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShardbConfig {
    /// Maximum serialized payload size per document, in bytes.
    pub max_doc_bytes: usize,
    /// Upper bound on the number of results a single query may return.
    pub max_query_results: usize,
    /// Upper bound on operations in a single transaction.
    pub max_batch: usize,
    /// Default per-request timeout.
    pub request_timeout_ms: u64,
    /// Default transaction timeout.
    pub transaction_timeout_ms: u64,
    /// Maximum retry attempts for transient infrastructure failures.
    pub max_retries: u32,
    /// Base retry backoff, doubled per attempt.
    pub retry_backoff_ms: u64,
    /// Virtual nodes per physical node on the hash ring.
    pub virtual_nodes_per_physical: u32,
    /// Latency above which a node is considered degraded for scoring purposes.
    pub latency_threshold_ms: u64,
    /// Load factor above which a node is considered overloaded.
    pub load_factor_threshold: f64,
    /// Global query fan-out timeout.
    pub query_timeout_ms: u64,
    /// Reject query plans whose estimated cost exceeds this value.
    pub max_plan_cost: f64,
}

impl Default for ShardbConfig {
    fn default() -> Self {
        Self {
            max_doc_bytes: 1_048_576,
            max_query_results: 1000,
            max_batch: 100,
            request_timeout_ms: 30_000,
            transaction_timeout_ms: 10_000,
            max_retries: 3,
            retry_backoff_ms: 100,
            virtual_nodes_per_physical: 100,
            latency_threshold_ms: 100,
            load_factor_threshold: 0.8,
            query_timeout_ms: 30_000,
            max_plan_cost: 100.0,
        }
    }
}

impl ShardbConfig {
    /// Loads configuration from environment variables layered over defaults,
    /// then validates the result.
    ///
    /// Precedence: `SHARDB_*` environment variables override the defaults
    /// set below. Example: `SHARDB_MAX_RETRIES=5`.
    pub fn load() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let builder = Config::builder()
            .set_default("max_doc_bytes", defaults.max_doc_bytes as i64)?
            .set_default("max_query_results", defaults.max_query_results as i64)?
            .set_default("max_batch", defaults.max_batch as i64)?
            .set_default("request_timeout_ms", defaults.request_timeout_ms as i64)?
            .set_default(
                "transaction_timeout_ms",
                defaults.transaction_timeout_ms as i64,
            )?
            .set_default("max_retries", defaults.max_retries as i64)?
            .set_default("retry_backoff_ms", defaults.retry_backoff_ms as i64)?
            .set_default(
                "virtual_nodes_per_physical",
                defaults.virtual_nodes_per_physical as i64,
            )?
            .set_default("latency_threshold_ms", defaults.latency_threshold_ms as i64)?
            .set_default("load_factor_threshold", defaults.load_factor_threshold)?
            .set_default("query_timeout_ms", defaults.query_timeout_ms as i64)?
            .set_default("max_plan_cost", defaults.max_plan_cost)?
            .add_source(
                Environment::with_prefix("SHARDB")
                    .separator("__")
                    .try_parsing(true),
            );

        let config: ShardbConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validates cross-field invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_doc_bytes == 0 {
            return Err(ConfigError::Message(
                "max_doc_bytes must be > 0".to_string(),
            ));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::Message("max_retries must be > 0".to_string()));
        }
        if self.virtual_nodes_per_physical == 0 {
            return Err(ConfigError::Message(
                "virtual_nodes_per_physical must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }

    #[must_use]
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// Exponential backoff for the given zero-based retry attempt.
    #[must_use]
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let ms = self.retry_backoff_ms.saturating_mul(1u64 << attempt.min(20));
        Duration::from_millis(ms)
    }

    /// Test-mode virtual node count (sharpens ring distribution in tests).
    #[must_use]
    pub fn test_virtual_nodes() -> u32 {
        1000
    }
}
