//! Engine configuration
//!
//! Every tunable named by the external interface contract lives here, with
//! the defaults the rest of the crate documents. `from_env` overlays
//! `STRATA_*` environment variables on those defaults so deployments can
//! tune without recompiling.

use serde::{Deserialize, Serialize};

// ============================================================================
// RETENTION OVERRIDES
// ============================================================================

/// Retention periods in days per importance level
///
/// Critical entries are always permanent and have no knob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionDays {
    /// High importance (default 5 years)
    pub high: i64,
    /// Medium importance (default 2 years)
    pub medium: i64,
    /// Low importance (default 180 days)
    pub low: i64,
    /// Noise (default 30 days)
    pub noise: i64,
}

impl Default for RetentionDays {
    fn default() -> Self {
        Self {
            high: 1825,
            medium: 730,
            low: 180,
            noise: 30,
        }
    }
}

// ============================================================================
// ENGINE CONFIG
// ============================================================================

/// Configuration for the core engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Minimum importance score for an entry to be kept at all
    pub keep_threshold: f64,
    /// Score at and above which an entry is critical
    pub critical_threshold: f64,
    /// Maximum score considered for proactive cleanup suggestions
    pub cleanup_threshold: f64,
    /// Minimum cosine similarity for a semantic relation
    pub min_similarity: f64,
    /// Minimum confidence for a relation to be persisted
    pub min_confidence: f64,
    /// Number of recent events considered for relationship detection
    pub context_window_size: usize,
    /// Maximum clock distance between related events, in days
    pub max_time_window_days: i64,
    /// Chunk size for batched scoring and embedding
    pub batch_size: usize,
    /// Window within which identical content collapses to one entry, in days
    pub dedup_window_days: i64,
    /// Store every event, or only events that produced relations
    pub store_all_events: bool,
    /// Whether to request embeddings and run semantic matching
    pub enable_semantic_matching: bool,
    /// Whether to run causal inference (including the LLM blend)
    pub enable_causal_inference: bool,
    /// Project assigned to events that arrive without one
    pub default_project_id: Option<String>,
    /// Retention periods per importance level
    pub retention: RetentionDays,
    /// Capacity of the ingestion intake queue
    pub pipeline_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            keep_threshold: 0.3,
            critical_threshold: 0.8,
            cleanup_threshold: 0.2,
            min_similarity: 0.75,
            min_confidence: 0.7,
            context_window_size: 10,
            max_time_window_days: 30,
            batch_size: 50,
            dedup_window_days: 7,
            store_all_events: false,
            enable_semantic_matching: true,
            enable_causal_inference: true,
            default_project_id: None,
            retention: RetentionDays::default(),
            pipeline_queue_capacity: 256,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("ignoring unparseable {}={:?}", name, raw);
                None
            }
        },
        Err(_) => None,
    }
}

impl EngineConfig {
    /// Defaults overlaid with `STRATA_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_parse("STRATA_KEEP_THRESHOLD") {
            config.keep_threshold = v;
        }
        if let Some(v) = env_parse("STRATA_CRITICAL_THRESHOLD") {
            config.critical_threshold = v;
        }
        if let Some(v) = env_parse("STRATA_CLEANUP_THRESHOLD") {
            config.cleanup_threshold = v;
        }
        if let Some(v) = env_parse("STRATA_MIN_SIMILARITY") {
            config.min_similarity = v;
        }
        if let Some(v) = env_parse("STRATA_MIN_CONFIDENCE") {
            config.min_confidence = v;
        }
        if let Some(v) = env_parse("STRATA_CONTEXT_WINDOW_SIZE") {
            config.context_window_size = v;
        }
        if let Some(v) = env_parse("STRATA_MAX_TIME_WINDOW_DAYS") {
            config.max_time_window_days = v;
        }
        if let Some(v) = env_parse("STRATA_BATCH_SIZE") {
            config.batch_size = v;
        }
        if let Some(v) = env_parse("STRATA_DEDUP_WINDOW_DAYS") {
            config.dedup_window_days = v;
        }
        if let Some(v) = env_parse("STRATA_STORE_ALL_EVENTS") {
            config.store_all_events = v;
        }
        if let Some(v) = env_parse("STRATA_ENABLE_SEMANTIC_MATCHING") {
            config.enable_semantic_matching = v;
        }
        if let Some(v) = env_parse("STRATA_ENABLE_CAUSAL_INFERENCE") {
            config.enable_causal_inference = v;
        }
        if let Ok(v) = std::env::var("STRATA_DEFAULT_PROJECT_ID") {
            if !v.is_empty() {
                config.default_project_id = Some(v);
            }
        }
        if let Some(v) = env_parse("STRATA_RETENTION_HIGH_DAYS") {
            config.retention.high = v;
        }
        if let Some(v) = env_parse("STRATA_RETENTION_MEDIUM_DAYS") {
            config.retention.medium = v;
        }
        if let Some(v) = env_parse("STRATA_RETENTION_LOW_DAYS") {
            config.retention.low = v;
        }
        if let Some(v) = env_parse("STRATA_RETENTION_NOISE_DAYS") {
            config.retention.noise = v;
        }
        if let Some(v) = env_parse("STRATA_PIPELINE_QUEUE_CAPACITY") {
            config.pipeline_queue_capacity = v;
        }
        config
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.keep_threshold, 0.3);
        assert_eq!(config.min_confidence, 0.7);
        assert_eq!(config.min_similarity, 0.75);
        assert_eq!(config.context_window_size, 10);
        assert_eq!(config.max_time_window_days, 30);
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.retention.high, 1825);
        assert_eq!(config.retention.noise, 30);
        assert!(!config.store_all_events);
    }
}
