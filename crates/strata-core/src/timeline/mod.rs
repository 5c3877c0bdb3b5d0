//! Timeline storage - the system of record
//!
//! Chronological index of entries per project with tiered residency
//! (hot/warm/cold/frozen) and retention policy enforcement. The timeline
//! entry owns the original event snapshot; graph entities and vector rows
//! are projections rebuilt from here whenever they drift.

pub mod migrations;
mod store;

pub use store::{
    CleanupStats, FailedEventRecord, NotificationRecord, Result, StorageError, StoredOutcome,
    TimelineAnalytics, TimelineStore,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::config::RetentionDays;
use crate::scoring::ImportanceLevel;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Entries older than this (days) are demoted to frozen during cleanup
pub const COLD_DEMOTION_DAYS: i64 = 730;

/// Minimum cosine similarity for related-entry linkage
pub const RELATED_ENTRY_SIMILARITY: f32 = 0.75;

/// How many related entries to link per stored entry
pub const RELATED_ENTRY_LIMIT: usize = 5;

// ============================================================================
// CATEGORIES, TIERS, POLICIES
// ============================================================================

/// Coarse age bucket for timeline organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineCategory {
    /// Last 7 days
    Recent,
    /// 8-30 days ago
    LastMonth,
    /// 31-90 days ago
    LastQuarter,
    /// 91-365 days ago
    LastYear,
    /// Over a year ago
    Historical,
}

impl TimelineCategory {
    /// Bucket an age in days
    pub fn from_age_days(days: i64) -> Self {
        if days <= 7 {
            TimelineCategory::Recent
        } else if days <= 30 {
            TimelineCategory::LastMonth
        } else if days <= 90 {
            TimelineCategory::LastQuarter
        } else if days <= 365 {
            TimelineCategory::LastYear
        } else {
            TimelineCategory::Historical
        }
    }

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            TimelineCategory::Recent => "recent",
            TimelineCategory::LastMonth => "last_month",
            TimelineCategory::LastQuarter => "last_quarter",
            TimelineCategory::LastYear => "last_year",
            TimelineCategory::Historical => "historical",
        }
    }

    /// Parse from string name
    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "recent" => Some(TimelineCategory::Recent),
            "last_month" => Some(TimelineCategory::LastMonth),
            "last_quarter" => Some(TimelineCategory::LastQuarter),
            "last_year" => Some(TimelineCategory::LastYear),
            "historical" => Some(TimelineCategory::Historical),
            _ => None,
        }
    }
}

/// Storage residency class controlling expected access latency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageTier {
    /// Frequently accessed, recent data
    Hot,
    /// Occasionally accessed, important historical data
    Warm,
    /// Rarely accessed, archived data
    Cold,
    /// Long-term archive, minimal access
    Frozen,
}

impl StorageTier {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageTier::Hot => "hot",
            StorageTier::Warm => "warm",
            StorageTier::Cold => "cold",
            StorageTier::Frozen => "frozen",
        }
    }

    /// Parse from string name
    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "hot" => Some(StorageTier::Hot),
            "warm" => Some(StorageTier::Warm),
            "cold" => Some(StorageTier::Cold),
            "frozen" => Some(StorageTier::Frozen),
            _ => None,
        }
    }
}

/// Retention policy derived from importance level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Keep forever
    CriticalPermanent,
    /// Keep for 5 years
    HighLongTerm,
    /// Keep for 2 years
    MediumStandard,
    /// Keep for 6 months
    LowShortTerm,
    /// Keep for 1 month
    NoiseMinimal,
}

impl RetentionPolicy {
    /// Policy for an importance level
    pub fn for_level(level: ImportanceLevel) -> Self {
        match level {
            ImportanceLevel::Critical => RetentionPolicy::CriticalPermanent,
            ImportanceLevel::High => RetentionPolicy::HighLongTerm,
            ImportanceLevel::Medium => RetentionPolicy::MediumStandard,
            ImportanceLevel::Low => RetentionPolicy::LowShortTerm,
            ImportanceLevel::Noise => RetentionPolicy::NoiseMinimal,
        }
    }

    /// Maximum age in days; `None` means permanent
    pub fn retention_days(&self, retention: &RetentionDays) -> Option<i64> {
        match self {
            RetentionPolicy::CriticalPermanent => None,
            RetentionPolicy::HighLongTerm => Some(retention.high),
            RetentionPolicy::MediumStandard => Some(retention.medium),
            RetentionPolicy::LowShortTerm => Some(retention.low),
            RetentionPolicy::NoiseMinimal => Some(retention.noise),
        }
    }

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            RetentionPolicy::CriticalPermanent => "critical_permanent",
            RetentionPolicy::HighLongTerm => "high_long_term",
            RetentionPolicy::MediumStandard => "medium_standard",
            RetentionPolicy::LowShortTerm => "low_short_term",
            RetentionPolicy::NoiseMinimal => "noise_minimal",
        }
    }

    /// Parse from string name
    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "critical_permanent" => Some(RetentionPolicy::CriticalPermanent),
            "high_long_term" => Some(RetentionPolicy::HighLongTerm),
            "medium_standard" => Some(RetentionPolicy::MediumStandard),
            "low_short_term" => Some(RetentionPolicy::LowShortTerm),
            "noise_minimal" => Some(RetentionPolicy::NoiseMinimal),
            _ => None,
        }
    }
}

/// Storage tier from the level/category matrix
///
/// Critical data never leaves hot storage; everything else cools with age,
/// faster the less important it is.
pub fn assign_tier(level: ImportanceLevel, category: TimelineCategory) -> StorageTier {
    use ImportanceLevel::*;
    use TimelineCategory::*;
    match (level, category) {
        (Critical, _) => StorageTier::Hot,
        (High, Recent) => StorageTier::Hot,
        (High, LastMonth) => StorageTier::Warm,
        (High, LastQuarter | LastYear) => StorageTier::Cold,
        (High, Historical) => StorageTier::Frozen,
        (Medium, Recent | LastMonth) => StorageTier::Warm,
        (Medium, LastQuarter | LastYear) => StorageTier::Cold,
        (Medium, Historical) => StorageTier::Frozen,
        (Low, Recent) => StorageTier::Warm,
        (Low, LastMonth) => StorageTier::Cold,
        (Low, LastQuarter | LastYear | Historical) => StorageTier::Frozen,
        (Noise, Recent) => StorageTier::Cold,
        (Noise, _) => StorageTier::Frozen,
    }
}

/// Normalized content hash for deduplication
///
/// Whitespace runs collapse to one space, the text is lowercased and
/// trimmed, then SHA-256 hashed.
pub fn content_hash(content: &str) -> String {
    let mut normalized = String::with_capacity(content.len());
    let mut last_was_space = false;
    for ch in content.trim().chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                normalized.push(' ');
                last_was_space = true;
            }
        } else {
            for lower in ch.to_lowercase() {
                normalized.push(lower);
            }
            last_was_space = false;
        }
    }
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

// ============================================================================
// TIMELINE ENTRY
// ============================================================================

/// A stored timeline record
///
/// Owns the original event snapshot under `metadata["original_event"]`; the
/// graph entity and the vector row are derived from it.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// Entry identifier
    pub entry_id: String,
    /// Owning project
    pub project_id: String,
    /// Source event identifier (unique with the project)
    pub event_id: String,
    /// Event type string
    pub data_type: String,
    /// Normalized content hash
    pub content_hash: String,
    /// Importance score at storage time
    pub importance_score: f64,
    /// Importance level at storage time
    pub importance_level: ImportanceLevel,
    /// Age bucket at storage time
    pub timeline_category: TimelineCategory,
    /// Current residency tier
    pub storage_tier: StorageTier,
    /// Retention policy from the importance level
    pub retention_policy: RetentionPolicy,
    /// Chronological position (the event occurrence time)
    pub created_at: DateTime<Utc>,
    /// Last retrieval time
    pub last_accessed: DateTime<Utc>,
    /// Number of retrievals
    pub access_count: i64,
    /// Snapshot and bookkeeping (original_event, duplicate_of, ...)
    pub metadata: Map<String, Value>,
    /// Extracted tags
    pub tags: Vec<String>,
    /// Semantically similar entries at storage time
    pub related_entry_ids: Vec<String>,
}

// ============================================================================
// TESTS
// ============================================================================
