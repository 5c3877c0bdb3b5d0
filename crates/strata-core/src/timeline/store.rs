//! SQLite-backed timeline store
//!
//! The one durable store in the system. Writes land here first; the vector
//! index and the graph store receive best-effort projections that the
//! reconciler can rebuild at any time. Uses separate reader/writer
//! connections behind mutexes so all methods take `&self` and the store is
//! `Send + Sync` behind a plain `Arc`.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::event::{keys, IntegrationEvent};
use crate::graph::{GraphEntity, GraphStore};
use crate::scoring::{ImportanceLevel, ImportanceScore, WeightAdjustment};
use crate::vector::{VectorDoc, VectorIndex};

use super::{
    assign_tier, content_hash, RetentionPolicy, StorageTier, TimelineCategory, TimelineEntry,
    COLD_DEMOTION_DAYS, RELATED_ENTRY_LIMIT, RELATED_ENTRY_SIMILARITY,
};
use crate::config::RetentionDays;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Timeline storage error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Entry not found
    #[error("Entry not found: {0}")]
    NotFound(String),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Initialization error
    #[error("Initialization error: {0}")]
    Init(String),
}

/// Timeline result type
pub type Result<T> = std::result::Result<T, StorageError>;

// ============================================================================
// RESULT TYPES
// ============================================================================

/// Outcome of storing one event
#[derive(Debug, Clone)]
pub struct StoredOutcome {
    /// The surviving entry
    pub entry_id: String,
    /// True when the event collapsed into an existing duplicate
    pub deduplicated: bool,
}

/// Cleanup statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct CleanupStats {
    /// Entries examined
    pub entries_analyzed: usize,
    /// Entries past retention, deleted from every store
    pub entries_deleted: usize,
    /// Entries demoted to frozen
    pub entries_demoted: usize,
}

/// Timeline distribution analytics
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct TimelineAnalytics {
    /// Entries in the analyzed window
    pub total_entries: usize,
    /// Mean importance score
    pub average_importance: f64,
    /// Entry counts by storage tier
    pub storage_distribution: std::collections::HashMap<String, usize>,
    /// Entry counts by importance level
    pub importance_distribution: std::collections::HashMap<String, usize>,
    /// Entry counts by timeline category
    pub timeline_distribution: std::collections::HashMap<String, usize>,
}

/// A persisted notification row
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct NotificationRecord {
    /// Notification identifier
    pub notification_id: String,
    /// Notification type string
    pub notification_type: String,
    /// Short title
    pub title: String,
    /// Body message
    pub message: String,
    /// Severity level
    pub level: String,
    /// Priority label
    pub priority: String,
    /// Recipient user
    pub recipient_id: String,
    /// Owning project, if any
    pub project_id: Option<String>,
    /// Channels the notification went out on
    pub channels: Vec<String>,
    /// Structured payload
    pub data: Map<String, Value>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Whether the recipient has read it
    pub read: bool,
    /// When it was read
    pub read_at: Option<DateTime<Utc>>,
    /// Optional expiry
    pub expires_at: Option<DateTime<Utc>>,
}

/// A failed-event record kept for operator inspection
#[derive(Debug, Clone, serde::Serialize)]
pub struct FailedEventRecord {
    /// Project the event belonged to, when known
    pub project_id: Option<String>,
    /// The event id, when known
    pub event_id: Option<String>,
    /// Original payload as JSON
    pub payload: String,
    /// Pipeline stage that failed
    pub stage: String,
    /// Error description
    pub error: String,
    /// When the failure was recorded
    pub failed_at: DateTime<Utc>,
}

// ============================================================================
// TIMELINE STORE
// ============================================================================

/// The timeline system of record plus its projections
pub struct TimelineStore {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    retention: RetentionDays,
    dedup_window_days: i64,
    vector: Arc<VectorIndex>,
    graph: Arc<GraphStore>,
}

impl TimelineStore {
    /// Apply PRAGMAs to a connection
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Open (or create) the store
    ///
    /// With no explicit path the database lands in the platform data
    /// directory.
    pub fn new(
        db_path: Option<PathBuf>,
        retention: RetentionDays,
        dedup_window_days: i64,
        vector: Arc<VectorIndex>,
        graph: Arc<GraphStore>,
    ) -> Result<Self> {
        let path = match db_path {
            Some(p) => p,
            None => {
                let proj_dirs = directories::ProjectDirs::from("dev", "strata", "core")
                    .ok_or_else(|| {
                        StorageError::Init("Could not determine project directories".to_string())
                    })?;
                let data_dir = proj_dirs.data_dir();
                std::fs::create_dir_all(data_dir)?;
                data_dir.join("strata.db")
            }
        };

        let writer_conn = Connection::open(&path)?;
        Self::configure_connection(&writer_conn)?;
        super::migrations::apply_migrations(&writer_conn)?;

        let reader_conn = Connection::open(&path)?;
        Self::configure_connection(&reader_conn)?;

        Ok(Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
            retention,
            dedup_window_days,
            vector,
            graph,
        })
    }

    fn writer(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| StorageError::Init("Writer lock poisoned".into()))
    }

    fn reader(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| StorageError::Init("Reader lock poisoned".into()))
    }

    // ========================================================================
    // STORE
    // ========================================================================

    /// Store a batch of scored events
    pub fn store(
        &self,
        project_id: &str,
        items: &[(IntegrationEvent, ImportanceScore)],
    ) -> Result<Vec<StoredOutcome>> {
        let now = Utc::now();
        items
            .iter()
            .map(|(event, score)| self.store_at(project_id, event, score, now))
            .collect()
    }

    /// Store one scored event relative to an explicit clock
    ///
    /// Idempotent per `(project_id, event.id)`: resubmission deterministically
    /// supersedes the earlier entry. Duplicate content within the dedup
    /// window collapses to the higher-importance entry, which records the
    /// loser's event id under `duplicate_of`.
    pub fn store_at(
        &self,
        project_id: &str,
        event: &IntegrationEvent,
        score: &ImportanceScore,
        now: DateTime<Utc>,
    ) -> Result<StoredOutcome> {
        let hash = content_hash(&event.full_text());

        // Re-submission of the same (project, event) supersedes in place
        let existing_entry_id = self
            .find_by_event(project_id, &event.id)?
            .map(|entry| entry.entry_id);

        // Duplicate detection by normalized content within the window
        if existing_entry_id.is_none() {
            if let Some(duplicate) = self.find_duplicate(project_id, &hash, event)? {
                if score.score <= duplicate.importance_score {
                    // Existing entry wins; it absorbs the loser's id
                    self.append_duplicate_of(&duplicate.entry_id, &event.id)?;
                    tracing::debug!(
                        event = %event.id,
                        winner = %duplicate.entry_id,
                        "collapsed duplicate content into existing entry"
                    );
                    return Ok(StoredOutcome {
                        entry_id: duplicate.entry_id,
                        deduplicated: true,
                    });
                }
                // New event wins; remove the loser everywhere, remember it
                self.delete_entry(&duplicate.entry_id)?;
                let entry = self.build_entry(
                    project_id,
                    event,
                    score,
                    now,
                    &hash,
                    Some(duplicate.event_id.as_str()),
                    None,
                )?;
                self.insert_entry(&entry)?;
                self.mirror_projections(&entry, event);
                return Ok(StoredOutcome {
                    entry_id: entry.entry_id,
                    deduplicated: true,
                });
            }
        }

        let entry = self.build_entry(
            project_id,
            event,
            score,
            now,
            &hash,
            None,
            existing_entry_id.as_deref(),
        )?;
        self.insert_entry(&entry)?;
        self.mirror_projections(&entry, event);
        Ok(StoredOutcome {
            entry_id: entry.entry_id,
            deduplicated: false,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn build_entry(
        &self,
        project_id: &str,
        event: &IntegrationEvent,
        score: &ImportanceScore,
        now: DateTime<Utc>,
        hash: &str,
        duplicate_of: Option<&str>,
        reuse_entry_id: Option<&str>,
    ) -> Result<TimelineEntry> {
        let category = TimelineCategory::from_age_days(event.age_days(now));
        let tier = assign_tier(score.level, category);
        let policy = RetentionPolicy::for_level(score.level);

        let mut metadata = Map::new();
        metadata.insert(
            "original_event".to_string(),
            serde_json::to_value(event).unwrap_or(Value::Null),
        );
        if let Some(loser) = duplicate_of {
            metadata.insert(keys::DUPLICATE_OF.to_string(), json!([loser]));
        }

        let entry_id = reuse_entry_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Ok(TimelineEntry {
            entry_id,
            project_id: project_id.to_string(),
            event_id: event.id.clone(),
            data_type: event.event_type.as_str().to_string(),
            content_hash: hash.to_string(),
            importance_score: score.score,
            importance_level: score.level,
            timeline_category: category,
            storage_tier: tier,
            retention_policy: policy,
            created_at: event.timestamp,
            last_accessed: now,
            access_count: 0,
            metadata,
            tags: extract_tags(event, score),
            related_entry_ids: self.related_entries(project_id, event),
        })
    }

    /// Semantically similar stored entries, for `related_entry_ids`
    fn related_entries(&self, project_id: &str, event: &IntegrationEvent) -> Vec<String> {
        let Some(embedding) = &event.embedding else {
            return Vec::new();
        };
        let mut filter = Map::new();
        filter.insert("project_id".to_string(), json!(project_id));
        match self.vector.query(embedding, RELATED_ENTRY_LIMIT + 1, &filter) {
            Ok(hits) => hits
                .into_iter()
                .filter(|hit| hit.score >= RELATED_ENTRY_SIMILARITY)
                .filter(|hit| {
                    hit.metadata.get("event_id").and_then(Value::as_str) != Some(&event.id)
                })
                .take(RELATED_ENTRY_LIMIT)
                .map(|hit| hit.id)
                .collect(),
            Err(e) => {
                tracing::warn!("related-entry lookup failed: {}", e);
                Vec::new()
            }
        }
    }

    fn insert_entry(&self, entry: &TimelineEntry) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            "INSERT OR REPLACE INTO timeline_entries (
                entry_id, project_id, event_id, data_type, content_hash,
                importance_score, importance_level, timeline_category,
                storage_tier, retention_policy, created_at, last_accessed,
                access_count, metadata, tags, related_entry_ids
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                entry.entry_id,
                entry.project_id,
                entry.event_id,
                entry.data_type,
                entry.content_hash,
                entry.importance_score,
                entry.importance_level.as_str(),
                entry.timeline_category.as_str(),
                entry.storage_tier.as_str(),
                entry.retention_policy.as_str(),
                entry.created_at.to_rfc3339(),
                entry.last_accessed.to_rfc3339(),
                entry.access_count,
                serde_json::to_string(&entry.metadata).unwrap_or_else(|_| "{}".to_string()),
                serde_json::to_string(&entry.tags).unwrap_or_else(|_| "[]".to_string()),
                serde_json::to_string(&entry.related_entry_ids)
                    .unwrap_or_else(|_| "[]".to_string()),
            ],
        )?;
        Ok(())
    }

    /// Mirror the entry into the vector index and the graph store
    ///
    /// Failures are logged, never surfaced: the timeline row already exists
    /// and the reconciler replays projections from it.
    fn mirror_projections(&self, entry: &TimelineEntry, event: &IntegrationEvent) {
        if let Some(embedding) = &event.embedding {
            let mut metadata = Map::new();
            metadata.insert("project_id".to_string(), json!(entry.project_id));
            metadata.insert("timeline_entry_id".to_string(), json!(entry.entry_id));
            metadata.insert("event_id".to_string(), json!(event.id));
            metadata.insert("data_type".to_string(), json!(entry.data_type));
            metadata.insert("source".to_string(), json!(event.source));
            metadata.insert(
                "importance_score".to_string(),
                json!(entry.importance_score),
            );
            metadata.insert(
                "importance_level".to_string(),
                json!(entry.importance_level.as_str()),
            );
            metadata.insert(
                "timeline_category".to_string(),
                json!(entry.timeline_category.as_str()),
            );
            metadata.insert("created_at".to_string(), json!(entry.created_at.to_rfc3339()));
            metadata.insert("title".to_string(), json!(event.title));
            metadata.insert("text".to_string(), json!(event.full_text()));
            let doc = VectorDoc {
                id: Some(entry.entry_id.clone()),
                vector: embedding.clone(),
                metadata,
            };
            if let Err(e) = self.vector.upsert(vec![doc]) {
                tracing::warn!(entry = %entry.entry_id, "vector projection failed: {}", e);
            }
        }

        let mut entity = GraphEntity::new(&event.id, "event", &entry.project_id);
        entity.timestamp = event.timestamp;
        entity.embedding = event.embedding.clone();
        entity.properties.insert("title".to_string(), json!(event.title));
        entity
            .properties
            .insert("event_type".to_string(), json!(event.event_type.as_str()));
        entity.properties.insert("status".to_string(), json!(event.status));
        entity.properties.insert("author".to_string(), json!(event.author));
        entity.properties.insert("url".to_string(), json!(event.url));
        entity
            .properties
            .insert("component".to_string(), json!(event.component));
        entity.properties.insert("labels".to_string(), json!(event.labels));
        entity
            .properties
            .insert("timestamp".to_string(), json!(event.timestamp.to_rfc3339()));
        entity
            .properties
            .insert("entry_id".to_string(), json!(entry.entry_id));
        entity.properties.insert(
            "importance_level".to_string(),
            json!(entry.importance_level.as_str()),
        );
        if let Err(e) = self.graph.upsert_entity(entity) {
            tracing::warn!(entry = %entry.entry_id, "graph projection failed: {}", e);
        }
    }

    fn find_duplicate(
        &self,
        project_id: &str,
        hash: &str,
        event: &IntegrationEvent,
    ) -> Result<Option<TimelineEntry>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT * FROM timeline_entries
             WHERE project_id = ?1 AND content_hash = ?2 AND data_type = ?3
               AND event_id != ?4",
        )?;
        let entries: Vec<TimelineEntry> = stmt
            .query_map(
                params![project_id, hash, event.event_type.as_str(), event.id],
                read_entry,
            )?
            .filter_map(|r| r.ok())
            .collect();
        let window = Duration::days(self.dedup_window_days);
        Ok(entries.into_iter().find(|entry| {
            (event.timestamp - entry.created_at).abs() <= window
        }))
    }

    fn append_duplicate_of(&self, entry_id: &str, loser_event_id: &str) -> Result<()> {
        let Some(mut entry) = self.get_entry(entry_id)? else {
            return Err(StorageError::NotFound(entry_id.to_string()));
        };
        let list = entry
            .metadata
            .entry(keys::DUPLICATE_OF.to_string())
            .or_insert_with(|| json!([]));
        if let Some(array) = list.as_array_mut() {
            if !array.iter().any(|v| v.as_str() == Some(loser_event_id)) {
                array.push(json!(loser_event_id));
            }
        }
        let writer = self.writer()?;
        writer.execute(
            "UPDATE timeline_entries SET metadata = ?1 WHERE entry_id = ?2",
            params![
                serde_json::to_string(&entry.metadata).unwrap_or_else(|_| "{}".to_string()),
                entry_id
            ],
        )?;
        Ok(())
    }

    // ========================================================================
    // RETRIEVE
    // ========================================================================

    /// Fetch a single entry
    pub fn get_entry(&self, entry_id: &str) -> Result<Option<TimelineEntry>> {
        let reader = self.reader()?;
        reader
            .query_row(
                "SELECT * FROM timeline_entries WHERE entry_id = ?1",
                params![entry_id],
                read_entry,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Fetch the entry for an event, if stored
    pub fn find_by_event(&self, project_id: &str, event_id: &str) -> Result<Option<TimelineEntry>> {
        let reader = self.reader()?;
        reader
            .query_row(
                "SELECT * FROM timeline_entries WHERE project_id = ?1 AND event_id = ?2",
                params![project_id, event_id],
                read_entry,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Whether an event is already stored (idempotence check)
    pub fn contains_event(&self, project_id: &str, event_id: &str) -> Result<bool> {
        Ok(self.find_by_event(project_id, event_id)?.is_some())
    }

    /// Filtered project timeline
    ///
    /// Sorted by `(importance desc, created_at desc, entry_id asc)`. Updates
    /// access tracking on every returned entry.
    pub fn retrieve(
        &self,
        project_id: &str,
        category: Option<TimelineCategory>,
        min_importance: f64,
        include_frozen: bool,
        limit: usize,
    ) -> Result<Vec<TimelineEntry>> {
        let entries: Vec<TimelineEntry> = {
            let reader = self.reader()?;
            let mut stmt = reader.prepare(
                "SELECT * FROM timeline_entries
                 WHERE project_id = ?1
                   AND importance_score >= ?2
                   AND (?3 = '' OR timeline_category = ?3)
                   AND (?4 = 1 OR storage_tier != 'frozen')
                 ORDER BY importance_score DESC, created_at DESC, entry_id ASC
                 LIMIT ?5",
            )?;
            stmt.query_map(
                params![
                    project_id,
                    min_importance,
                    category.map(|c| c.as_str()).unwrap_or(""),
                    include_frozen as i64,
                    limit as i64,
                ],
                read_entry,
            )?
            .filter_map(|r| r.ok())
            .collect()
        };

        if !entries.is_empty() {
            let now = Utc::now().to_rfc3339();
            let writer = self.writer()?;
            for entry in &entries {
                writer.execute(
                    "UPDATE timeline_entries
                     SET last_accessed = ?1, access_count = access_count + 1
                     WHERE entry_id = ?2",
                    params![now, entry.entry_id],
                )?;
            }
        }
        Ok(entries)
    }

    // ========================================================================
    // CLEANUP & ANALYTICS
    // ========================================================================

    /// Enforce retention: delete expired entries everywhere, demote cold
    /// entries to frozen
    pub fn cleanup(&self, project_id: Option<&str>) -> Result<CleanupStats> {
        self.cleanup_at(project_id, Utc::now())
    }

    /// Cleanup relative to an explicit clock
    pub fn cleanup_at(
        &self,
        project_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<CleanupStats> {
        let entries: Vec<TimelineEntry> = {
            let reader = self.reader()?;
            let mut stmt = reader.prepare(
                "SELECT * FROM timeline_entries WHERE (?1 = '' OR project_id = ?1)",
            )?;
            stmt.query_map(params![project_id.unwrap_or("")], read_entry)?
                .filter_map(|r| r.ok())
                .collect()
        };

        let mut stats = CleanupStats::default();
        for entry in entries {
            stats.entries_analyzed += 1;
            let age_days = (now - entry.created_at).num_days();
            let expired = entry
                .retention_policy
                .retention_days(&self.retention)
                .map(|limit| age_days > limit)
                .unwrap_or(false);

            if expired {
                self.delete_entry(&entry.entry_id)?;
                stats.entries_deleted += 1;
            } else if entry.storage_tier != StorageTier::Frozen && age_days > COLD_DEMOTION_DAYS {
                let writer = self.writer()?;
                writer.execute(
                    "UPDATE timeline_entries SET storage_tier = 'frozen' WHERE entry_id = ?1",
                    params![entry.entry_id],
                )?;
                stats.entries_demoted += 1;
            }
        }
        tracing::info!(
            analyzed = stats.entries_analyzed,
            deleted = stats.entries_deleted,
            demoted = stats.entries_demoted,
            "timeline cleanup completed"
        );
        Ok(stats)
    }

    /// Delete one entry from the timeline and both projections
    pub fn delete_entry(&self, entry_id: &str) -> Result<bool> {
        let Some(entry) = self.get_entry(entry_id)? else {
            return Ok(false);
        };
        {
            let writer = self.writer()?;
            writer.execute(
                "DELETE FROM timeline_entries WHERE entry_id = ?1",
                params![entry_id],
            )?;
        }
        if let Err(e) = self.vector.delete(&[entry.entry_id.clone()]) {
            tracing::warn!(entry = %entry_id, "vector delete failed: {}", e);
        }
        if let Err(e) = self.graph.delete_entity(&entry.project_id, &entry.event_id) {
            tracing::warn!(entry = %entry_id, "graph delete failed: {}", e);
        }
        Ok(true)
    }

    /// Remove an entire project from the timeline and both projections
    pub fn delete_project(&self, project_id: &str) -> Result<usize> {
        let removed = {
            let writer = self.writer()?;
            writer.execute(
                "DELETE FROM timeline_entries WHERE project_id = ?1",
                params![project_id],
            )?
        };
        if let Err(e) = self.vector.delete_project(project_id) {
            tracing::warn!(project = %project_id, "vector project delete failed: {}", e);
        }
        if let Err(e) = self.graph.delete_project(project_id) {
            tracing::warn!(project = %project_id, "graph project delete failed: {}", e);
        }
        Ok(removed)
    }

    /// Distribution analytics over the last `days_back` days
    pub fn analytics(&self, project_id: &str, days_back: i64) -> Result<TimelineAnalytics> {
        let cutoff = (Utc::now() - Duration::days(days_back)).to_rfc3339();
        let entries: Vec<TimelineEntry> = {
            let reader = self.reader()?;
            let mut stmt = reader.prepare(
                "SELECT * FROM timeline_entries WHERE project_id = ?1 AND created_at >= ?2",
            )?;
            stmt.query_map(params![project_id, cutoff], read_entry)?
                .filter_map(|r| r.ok())
                .collect()
        };

        let mut analytics = TimelineAnalytics {
            total_entries: entries.len(),
            ..Default::default()
        };
        if entries.is_empty() {
            return Ok(analytics);
        }
        let mut total = 0.0;
        for entry in &entries {
            total += entry.importance_score;
            *analytics
                .storage_distribution
                .entry(entry.storage_tier.as_str().to_string())
                .or_default() += 1;
            *analytics
                .importance_distribution
                .entry(entry.importance_level.as_str().to_string())
                .or_default() += 1;
            *analytics
                .timeline_distribution
                .entry(entry.timeline_category.as_str().to_string())
                .or_default() += 1;
        }
        analytics.average_importance = total / entries.len() as f64;
        Ok(analytics)
    }

    /// Re-project every entry of a project into the vector index and the
    /// graph store
    ///
    /// Repairs projection gaps left by partial failures or cancellations.
    pub fn reconcile(&self, project_id: &str) -> Result<usize> {
        let entries: Vec<TimelineEntry> = {
            let reader = self.reader()?;
            let mut stmt =
                reader.prepare("SELECT * FROM timeline_entries WHERE project_id = ?1")?;
            stmt.query_map(params![project_id], read_entry)?
                .filter_map(|r| r.ok())
                .collect()
        };
        let mut repaired = 0;
        for entry in entries {
            let Some(event_value) = entry.metadata.get("original_event") else {
                continue;
            };
            match serde_json::from_value::<IntegrationEvent>(event_value.clone()) {
                Ok(event) => {
                    self.mirror_projections(&entry, &event);
                    repaired += 1;
                }
                Err(e) => {
                    tracing::warn!(entry = %entry.entry_id, "unreadable event snapshot: {}", e);
                }
            }
        }
        tracing::info!(project = %project_id, repaired, "reconciled projections");
        Ok(repaired)
    }

    // ========================================================================
    // NOTIFICATION ROWS
    // ========================================================================

    /// Persist an in-app notification row
    pub fn store_notification(&self, record: &NotificationRecord) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            "INSERT OR REPLACE INTO notifications (
                notification_id, notification_type, title, message, level,
                priority, recipient_id, project_id, channels, data,
                created_at, read, read_at, expires_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                record.notification_id,
                record.notification_type,
                record.title,
                record.message,
                record.level,
                record.priority,
                record.recipient_id,
                record.project_id,
                serde_json::to_string(&record.channels).unwrap_or_else(|_| "[]".to_string()),
                serde_json::to_string(&record.data).unwrap_or_else(|_| "{}".to_string()),
                record.created_at.to_rfc3339(),
                record.read as i64,
                record.read_at.map(|t| t.to_rfc3339()),
                record.expires_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// List a user's notifications, newest first
    pub fn list_notifications(
        &self,
        recipient_id: &str,
        unread_only: bool,
        limit: usize,
    ) -> Result<Vec<NotificationRecord>> {
        let now = Utc::now().to_rfc3339();
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT * FROM notifications
             WHERE recipient_id = ?1
               AND (?2 = 0 OR read = 0)
               AND (expires_at IS NULL OR expires_at > ?3)
             ORDER BY created_at DESC
             LIMIT ?4",
        )?;
        let records = stmt
            .query_map(
                params![recipient_id, unread_only as i64, now, limit as i64],
                read_notification,
            )?
            .filter_map(|r| r.ok())
            .collect();
        Ok(records)
    }

    /// Mark one notification read; false when it does not belong to the user
    pub fn mark_notification_read(
        &self,
        notification_id: &str,
        recipient_id: &str,
    ) -> Result<bool> {
        let writer = self.writer()?;
        let changed = writer.execute(
            "UPDATE notifications SET read = 1, read_at = ?1
             WHERE notification_id = ?2 AND recipient_id = ?3 AND read = 0",
            params![Utc::now().to_rfc3339(), notification_id, recipient_id],
        )?;
        Ok(changed > 0)
    }

    /// Mark every unread notification read; returns how many changed
    pub fn mark_all_notifications_read(&self, recipient_id: &str) -> Result<usize> {
        let writer = self.writer()?;
        let changed = writer.execute(
            "UPDATE notifications SET read = 1, read_at = ?1
             WHERE recipient_id = ?2 AND read = 0",
            params![Utc::now().to_rfc3339(), recipient_id],
        )?;
        Ok(changed)
    }

    /// Delete notifications created before the cutoff or already expired
    pub fn prune_notifications(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let writer = self.writer()?;
        let removed = writer.execute(
            "DELETE FROM notifications
             WHERE created_at < ?1 OR (expires_at IS NOT NULL AND expires_at < ?2)",
            params![cutoff.to_rfc3339(), Utc::now().to_rfc3339()],
        )?;
        Ok(removed)
    }

    // ========================================================================
    // FEEDBACK LEDGER
    // ========================================================================

    /// Append a scoring weight adjustment to the ledger
    pub fn record_weight_adjustment(&self, adjustment: &WeightAdjustment) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            "INSERT INTO feedback_ledger (factor, error, predicted, actual, weights, adjusted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                adjustment.factor,
                adjustment.error,
                adjustment.predicted,
                adjustment.actual,
                serde_json::to_string(&adjustment.weights).unwrap_or_else(|_| "{}".to_string()),
                adjustment.adjusted_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Latest ledger entries, newest first
    pub fn feedback_history(&self, limit: usize) -> Result<Vec<WeightAdjustment>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT factor, error, predicted, actual, weights, adjusted_at
             FROM feedback_ledger ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                let weights_json: String = row.get(4)?;
                let adjusted_at: String = row.get(5)?;
                Ok(WeightAdjustment {
                    factor: row.get(0)?,
                    error: row.get(1)?,
                    predicted: row.get(2)?,
                    actual: row.get(3)?,
                    weights: serde_json::from_str(&weights_json).unwrap_or_default(),
                    adjusted_at: parse_rfc3339(&adjusted_at),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    // ========================================================================
    // FAILED EVENTS
    // ========================================================================

    /// Record an event the pipeline gave up on, payload included
    pub fn record_failed_event(
        &self,
        project_id: Option<&str>,
        event_id: Option<&str>,
        payload: &str,
        stage: &str,
        error: &str,
    ) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            "INSERT INTO failed_events (project_id, event_id, payload, stage, error, failed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                project_id,
                event_id,
                payload,
                stage,
                error,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Latest failed-event records, newest first
    pub fn failed_events(&self, limit: usize) -> Result<Vec<FailedEventRecord>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT project_id, event_id, payload, stage, error, failed_at
             FROM failed_events ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                let failed_at: String = row.get(5)?;
                Ok(FailedEventRecord {
                    project_id: row.get(0)?,
                    event_id: row.get(1)?,
                    payload: row.get(2)?,
                    stage: row.get(3)?,
                    error: row.get(4)?,
                    failed_at: parse_rfc3339(&failed_at),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}

// ============================================================================
// ROW MAPPING
// ============================================================================

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn read_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<TimelineEntry> {
    let level: String = row.get("importance_level")?;
    let category: String = row.get("timeline_category")?;
    let tier: String = row.get("storage_tier")?;
    let policy: String = row.get("retention_policy")?;
    let created_at: String = row.get("created_at")?;
    let last_accessed: String = row.get("last_accessed")?;
    let metadata: String = row.get("metadata")?;
    let tags: String = row.get("tags")?;
    let related: String = row.get("related_entry_ids")?;

    Ok(TimelineEntry {
        entry_id: row.get("entry_id")?,
        project_id: row.get("project_id")?,
        event_id: row.get("event_id")?,
        data_type: row.get("data_type")?,
        content_hash: row.get("content_hash")?,
        importance_score: row.get("importance_score")?,
        importance_level: ImportanceLevel::parse_name(&level)
            .unwrap_or(ImportanceLevel::Medium),
        timeline_category: TimelineCategory::parse_name(&category)
            .unwrap_or(TimelineCategory::Recent),
        storage_tier: StorageTier::parse_name(&tier).unwrap_or(StorageTier::Warm),
        retention_policy: RetentionPolicy::parse_name(&policy)
            .unwrap_or(RetentionPolicy::MediumStandard),
        created_at: parse_rfc3339(&created_at),
        last_accessed: parse_rfc3339(&last_accessed),
        access_count: row.get("access_count")?,
        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        related_entry_ids: serde_json::from_str(&related).unwrap_or_default(),
    })
}

fn read_notification(row: &rusqlite::Row<'_>) -> rusqlite::Result<NotificationRecord> {
    let channels: String = row.get("channels")?;
    let data: String = row.get("data")?;
    let created_at: String = row.get("created_at")?;
    let read_at: Option<String> = row.get("read_at")?;
    let expires_at: Option<String> = row.get("expires_at")?;
    let read: i64 = row.get("read")?;

    Ok(NotificationRecord {
        notification_id: row.get("notification_id")?,
        notification_type: row.get("notification_type")?,
        title: row.get("title")?,
        message: row.get("message")?,
        level: row.get("level")?,
        priority: row.get("priority")?,
        recipient_id: row.get("recipient_id")?,
        project_id: row.get("project_id")?,
        channels: serde_json::from_str(&channels).unwrap_or_default(),
        data: serde_json::from_str(&data).unwrap_or_default(),
        created_at: parse_rfc3339(&created_at),
        read: read != 0,
        read_at: read_at.as_deref().map(parse_rfc3339),
        expires_at: expires_at.as_deref().map(parse_rfc3339),
    })
}

fn extract_tags(event: &IntegrationEvent, score: &ImportanceScore) -> Vec<String> {
    let mut tags = vec![
        format!("importance_{}", score.level.as_str()),
        format!("type_{}", event.event_type.as_str()),
    ];
    let content = event.full_text().to_lowercase();
    if content.contains("bug") || content.contains("error") {
        tags.push("bug_related".to_string());
    }
    if content.contains("feature") || content.contains("enhancement") {
        tags.push("feature_related".to_string());
    }
    if content.contains("decision") || content.contains("decided") {
        tags.push("decision_related".to_string());
    }
    tags
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use crate::scoring::{ImportanceScorer, ScoringContext};
    use chrono::Duration;

    fn store() -> (TimelineStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = TimelineStore::new(
            Some(dir.path().join("test.db")),
            RetentionDays::default(),
            7,
            Arc::new(VectorIndex::new()),
            Arc::new(GraphStore::new()),
        )
        .unwrap();
        (store, dir)
    }

    fn scored(
        title: &str,
        content: &str,
        age_days: i64,
    ) -> (IntegrationEvent, ImportanceScore) {
        let mut event = IntegrationEvent::new("github", EventType::Issue, title);
        event.content = Some(content.to_string());
        event.timestamp = Utc::now() - Duration::days(age_days);
        let scorer = ImportanceScorer::default();
        let score = scorer.score(&event, &ScoringContext::default());
        (event, score)
    }

    #[test]
    fn test_store_and_get() {
        let (store, _dir) = store();
        let (event, score) = scored("login bug", "users cannot sign in", 0);
        let outcome = store
            .store_at("p1", &event, &score, Utc::now())
            .unwrap();
        assert!(!outcome.deduplicated);

        let entry = store.get_entry(&outcome.entry_id).unwrap().unwrap();
        assert_eq!(entry.project_id, "p1");
        assert_eq!(entry.event_id, event.id);
        assert_eq!(entry.data_type, "issue");
        assert_eq!(entry.timeline_category, TimelineCategory::Recent);
        assert!(entry.metadata.contains_key("original_event"));
        assert!(store.contains_event("p1", &event.id).unwrap());
    }

    #[test]
    fn test_resubmission_supersedes_in_place() {
        let (store, _dir) = store();
        let (mut event, score) = scored("flaky test", "the suite fails sometimes", 0);
        let first = store.store_at("p1", &event, &score, Utc::now()).unwrap();

        event.content = Some("the suite fails on CI only".to_string());
        let second = store.store_at("p1", &event, &score, Utc::now()).unwrap();

        // Same entry, later submission's content wins
        assert_eq!(first.entry_id, second.entry_id);
        let entry = store.get_entry(&second.entry_id).unwrap().unwrap();
        let snapshot = &entry.metadata["original_event"];
        assert!(snapshot["content"]
            .as_str()
            .unwrap()
            .contains("CI only"));
    }

    #[test]
    fn test_duplicate_content_collapses_to_one_entry() {
        let (store, _dir) = store();
        let (event_a, score_a) = scored("deploy failed", "the Deploy   FAILED", 0);
        let (mut event_b, score_b) = scored("deploy failed", "the deploy failed", 0);
        // Same issue type, normalized-identical content, distinct event ids
        event_b.id = "evt-duplicate".to_string();

        store.store_at("p1", &event_a, &score_a, Utc::now()).unwrap();
        let outcome = store.store_at("p1", &event_b, &score_b, Utc::now()).unwrap();
        assert!(outcome.deduplicated);

        // Exactly one entry survives and it names the loser
        let entries = store.retrieve("p1", None, 0.0, true, 100).unwrap();
        assert_eq!(entries.len(), 1);
        let dup = entries[0].metadata[keys::DUPLICATE_OF]
            .as_array()
            .unwrap();
        assert!(dup.iter().any(|v| v.as_str() == Some("evt-duplicate")));
    }

    #[test]
    fn test_retrieve_sort_and_filters() {
        let (store, _dir) = store();
        let (low, low_score) = scored("note", "x", 0);
        let (high, high_score) = scored(
            "critical security bug in release deployment",
            "urgent problem with the architecture decision, milestone at risk. \
             More context. And more.",
            0,
        );
        store.store_at("p1", &low, &low_score, Utc::now()).unwrap();
        store.store_at("p1", &high, &high_score, Utc::now()).unwrap();

        let entries = store.retrieve("p1", None, 0.0, true, 10).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].importance_score >= entries[1].importance_score);

        let filtered = store
            .retrieve("p1", None, entries[0].importance_score, true, 10)
            .unwrap();
        assert_eq!(filtered.len(), 1);

        // Access tracking moved
        let entry = store.get_entry(&entries[0].entry_id).unwrap().unwrap();
        assert!(entry.access_count >= 1);
    }

    #[test]
    fn test_cleanup_deletes_expired_and_demotes_cold() {
        let (store, _dir) = store();
        let vector = store.vector.clone();
        let graph = store.graph.clone();

        // Low importance, 200 days old: tier frozen, retention 180 days
        let (mut event, _) = scored("old note", "tiny", 200);
        event.embedding = Some(vec![1.0, 0.0]);
        let score = ImportanceScore {
            score: 0.25,
            level: ImportanceLevel::Low,
            factors: Default::default(),
            confidence: 0.8,
            reasons: vec![],
            should_keep: false,
        };
        let outcome = store.store_at("p1", &event, &score, Utc::now()).unwrap();
        let entry = store.get_entry(&outcome.entry_id).unwrap().unwrap();
        assert_eq!(entry.storage_tier, StorageTier::Frozen);
        assert_eq!(vector.len(), 1);

        // Cleanup at day 200 (> 180): gone from all three stores
        let stats = store.cleanup_at(Some("p1"), Utc::now()).unwrap();
        assert_eq!(stats.entries_deleted, 1);
        assert!(store.get_entry(&outcome.entry_id).unwrap().is_none());
        assert_eq!(vector.len(), 0);
        assert!(graph.get_entity("p1", &event.id).unwrap().is_none());
    }

    #[test]
    fn test_cleanup_demotes_to_frozen_past_cold_threshold() {
        let (store, _dir) = store();
        // Critical stays hot initially and is never deleted
        let (event, _) = scored("keystone decision", "the big architecture decision", 800);
        let score = ImportanceScore {
            score: 0.9,
            level: ImportanceLevel::Critical,
            factors: Default::default(),
            confidence: 0.9,
            reasons: vec![],
            should_keep: true,
        };
        let outcome = store.store_at("p1", &event, &score, Utc::now()).unwrap();
        assert_eq!(
            store.get_entry(&outcome.entry_id).unwrap().unwrap().storage_tier,
            StorageTier::Hot
        );

        let stats = store.cleanup_at(Some("p1"), Utc::now()).unwrap();
        assert_eq!(stats.entries_deleted, 0);
        assert_eq!(stats.entries_demoted, 1);
        assert_eq!(
            store.get_entry(&outcome.entry_id).unwrap().unwrap().storage_tier,
            StorageTier::Frozen
        );
    }

    #[test]
    fn test_analytics() {
        let (store, _dir) = store();
        for i in 0..3 {
            let (event, score) = scored(&format!("event {i}"), "body content here", 0);
            store.store_at("p1", &event, &score, Utc::now()).unwrap();
        }
        let analytics = store.analytics("p1", 90).unwrap();
        assert_eq!(analytics.total_entries, 3);
        assert!(analytics.average_importance > 0.0);
        assert!(!analytics.importance_distribution.is_empty());
    }

    #[test]
    fn test_reconcile_rebuilds_projections() {
        let (store, _dir) = store();
        let (mut event, score) = scored("searchable issue", "findable content", 0);
        event.embedding = Some(vec![0.0, 1.0]);
        store.store_at("p1", &event, &score, Utc::now()).unwrap();

        // Simulate projection loss
        store.vector.delete_project("p1").unwrap();
        store.graph.delete_project("p1").unwrap();
        assert_eq!(store.vector.len(), 0);

        let repaired = store.reconcile("p1").unwrap();
        assert_eq!(repaired, 1);
        assert_eq!(store.vector.len(), 1);
        assert!(store.graph.get_entity("p1", &event.id).unwrap().is_some());
    }

    #[test]
    fn test_notification_rows() {
        let (store, _dir) = store();
        let record = NotificationRecord {
            notification_id: "n1".to_string(),
            notification_type: "mention".to_string(),
            title: "You were mentioned".to_string(),
            message: "by bob".to_string(),
            level: "info".to_string(),
            priority: "high".to_string(),
            recipient_id: "alice".to_string(),
            project_id: Some("p1".to_string()),
            channels: vec!["in_app".to_string()],
            data: Map::new(),
            created_at: Utc::now(),
            read: false,
            read_at: None,
            expires_at: None,
        };
        store.store_notification(&record).unwrap();

        let unread = store.list_notifications("alice", true, 10).unwrap();
        assert_eq!(unread.len(), 1);

        assert!(store.mark_notification_read("n1", "alice").unwrap());
        assert!(!store.mark_notification_read("n1", "alice").unwrap());
        assert!(store.list_notifications("alice", true, 10).unwrap().is_empty());

        // Pruning removes rows older than the cutoff
        let removed = store
            .prune_notifications(Utc::now() + Duration::seconds(1))
            .unwrap();
        assert_eq!(removed, 1);
    }

    #[test]
    fn test_feedback_ledger_roundtrip() {
        let (store, _dir) = store();
        let adjustment = WeightAdjustment {
            factor: "content_quality".to_string(),
            error: 0.4,
            predicted: 0.8,
            actual: 0.4,
            weights: Default::default(),
            adjusted_at: Utc::now(),
        };
        store.record_weight_adjustment(&adjustment).unwrap();
        let history = store.feedback_history(10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].factor, "content_quality");
    }

    #[test]
    fn test_failed_event_records() {
        let (store, _dir) = store();
        store
            .record_failed_event(Some("p1"), Some("e1"), "{}", "persist", "disk full")
            .unwrap();
        let failures = store.failed_events(5).unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].stage, "persist");
    }
}
