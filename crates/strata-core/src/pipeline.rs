//! Ingestion pipeline - the write path
//!
//! `submit` takes a normalized integration event through embedding fill-in,
//! relationship inference, scoring, and the durable write (timeline first,
//! projections mirrored), then publishes a domain event for the realtime and
//! notification layers. Ingestion is serialized per `(project_id, event.id)`
//! and idempotent; the intake queue is bounded and rejects with a retryable
//! error on overflow.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};

use crate::config::EngineConfig;
use crate::event::{keys, EventRelation, IntegrationEvent, RelationType};
use crate::graph::{GraphRelationship, GraphStore};
use crate::inference::RelationshipInferencer;
use crate::oracle::Embedder;
use crate::scoring::{ImportanceLevel, ImportanceScore, ImportanceScorer, ScoringContext};
use crate::timeline::{StorageError, StoredOutcome, TimelineStore};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Exponential backoff schedule for transient store errors
const RETRY_BACKOFF_MS: [u64; 3] = [100, 400, 1600];

/// Domain event broadcast capacity before old events drop
const DOMAIN_EVENT_CAPACITY: usize = 1024;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Pipeline error taxonomy
///
/// Validation and policy errors surface to the caller and are never retried;
/// transient store errors are retried with backoff before surfacing; an
/// unavailable oracle only degrades the result.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Malformed event, unknown enum value, cross-project reference
    #[error("validation: {0}")]
    Validation(String),
    /// The durable store reported a retryable condition
    #[error("transient store failure: {0}")]
    TransientStore(String),
    /// Intake queue is full; the caller may retry later
    #[error("pipeline queue full")]
    QueueFull,
    /// Rate limited, quota exceeded, forbidden
    #[error("policy: {0}")]
    Policy(String),
    /// Unrecoverable storage corruption
    #[error("fatal: {0}")]
    Fatal(String),
}

impl PipelineError {
    /// Whether a caller should retry the submission
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::TransientStore(_) | PipelineError::QueueFull
        )
    }
}

/// Pipeline result type
pub type Result<T> = std::result::Result<T, PipelineError>;

// ============================================================================
// DOMAIN EVENTS
// ============================================================================

/// A relation in domain-event form
#[derive(Debug, Clone, Serialize)]
pub struct RelationSummary {
    /// Target event id
    pub target_event_id: String,
    /// Relation type string
    pub relation_type: String,
    /// Inference confidence
    pub confidence: f64,
}

/// Facts the pipeline publishes to the realtime and notification layers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum DomainEvent {
    /// An event was scored, stored, and linked
    EventIngested {
        /// Owning project
        project_id: String,
        /// The event id
        event_id: String,
        /// The surviving timeline entry
        entry_id: String,
        /// Event type string
        event_type: String,
        /// Event title
        title: String,
        /// Author handle, when known
        author: Option<String>,
        /// Title and content, for downstream mention detection
        text: String,
        /// Importance score
        importance_score: f64,
        /// Importance level
        importance_level: ImportanceLevel,
        /// Relations persisted alongside the event
        relations: Vec<RelationSummary>,
        /// Whether the event collapsed into an existing duplicate
        deduplicated: bool,
        /// Publication time
        timestamp: DateTime<Utc>,
    },
    /// An event passed inference but was not stored (no relations and
    /// `store_all_events` off)
    EventSkipped {
        /// Owning project
        project_id: String,
        /// The event id
        event_id: String,
        /// Why it was skipped
        reason: String,
        /// Publication time
        timestamp: DateTime<Utc>,
    },
    /// An event failed permanently; the payload is in the failed-event table
    IngestFailed {
        /// Owning project, when resolved
        project_id: Option<String>,
        /// The event id
        event_id: String,
        /// Pipeline stage that failed
        stage: String,
        /// Error description
        error: String,
        /// Publication time
        timestamp: DateTime<Utc>,
    },
}

// ============================================================================
// METRICS
// ============================================================================

/// Processor counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineMetrics {
    /// Events accepted by submit
    pub events_processed: u64,
    /// Events durably stored
    pub events_stored: u64,
    /// Events collapsed into duplicates
    pub events_deduplicated: u64,
    /// Events recorded as failed
    pub events_failed: u64,
    /// Relations detected in total
    pub relationships_detected: u64,
    /// Caused/resolved relations
    pub causal_relationships: u64,
    /// Preceded/followed relations
    pub temporal_relationships: u64,
    /// Referenced relations
    pub reference_relationships: u64,
    /// When the pipeline came up
    pub started_at: Option<DateTime<Utc>>,
    /// Last successful processing time
    pub last_processed: Option<DateTime<Utc>>,
}

// ============================================================================
// OUTCOME
// ============================================================================

/// What happened to one submitted event
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    /// The event id
    pub event_id: String,
    /// Resolved owning project
    pub project_id: String,
    /// Storage outcome; `None` when the event was skipped
    pub stored: Option<StoredOutcome>,
    /// Relations detected for the event
    pub relations: Vec<EventRelation>,
    /// The computed importance, when the event was scored
    pub score: Option<ImportanceScore>,
}

// ============================================================================
// PIPELINE
// ============================================================================

/// The ingestion pipeline
pub struct IngestionPipeline {
    config: EngineConfig,
    scorer: Arc<ImportanceScorer>,
    inferencer: Arc<RelationshipInferencer>,
    timeline: Arc<TimelineStore>,
    graph: Arc<GraphStore>,
    embedder: Option<Arc<dyn Embedder>>,
    events_tx: broadcast::Sender<DomainEvent>,
    metrics: Mutex<PipelineMetrics>,
    /// Per-(project, event) locks serializing duplicate submissions
    submission_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    intake_tx: mpsc::Sender<IntegrationEvent>,
    intake_rx: Mutex<Option<mpsc::Receiver<IntegrationEvent>>>,
}

impl IngestionPipeline {
    /// Assemble the pipeline over its collaborators
    pub fn new(
        config: EngineConfig,
        scorer: Arc<ImportanceScorer>,
        inferencer: Arc<RelationshipInferencer>,
        timeline: Arc<TimelineStore>,
        graph: Arc<GraphStore>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(DOMAIN_EVENT_CAPACITY);
        let (intake_tx, intake_rx) = mpsc::channel(config.pipeline_queue_capacity);
        Self {
            config,
            scorer,
            inferencer,
            timeline,
            graph,
            embedder,
            events_tx,
            metrics: Mutex::new(PipelineMetrics {
                started_at: Some(Utc::now()),
                ..PipelineMetrics::default()
            }),
            submission_locks: Mutex::new(HashMap::new()),
            intake_tx,
            intake_rx: Mutex::new(Some(intake_rx)),
        }
    }

    /// Subscribe to domain events
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.events_tx.subscribe()
    }

    /// Current counter snapshot
    pub fn metrics(&self) -> PipelineMetrics {
        self.metrics
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Push an event onto the bounded intake queue
    ///
    /// Overflow rejects with [`PipelineError::QueueFull`], which is
    /// retryable; producers choose between blocking on [`submit`] and
    /// failing fast here.
    pub fn enqueue(&self, event: IntegrationEvent) -> Result<()> {
        self.intake_tx
            .try_send(event)
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => PipelineError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => {
                    PipelineError::Fatal("pipeline intake closed".into())
                }
            })
    }

    /// Spawn the worker that drains the intake queue
    ///
    /// Call once; subsequent calls return `None`.
    pub fn start(self: &Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
        let mut rx = self.intake_rx.lock().ok()?.take()?;
        let pipeline = Arc::clone(self);
        Some(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let event_id = event.id.clone();
                if let Err(e) = pipeline.submit(event).await {
                    tracing::error!(event = %event_id, "ingestion failed: {}", e);
                }
            }
        }))
    }

    /// Process one event end to end
    pub async fn submit(&self, mut event: IntegrationEvent) -> Result<SubmitOutcome> {
        event
            .validate()
            .map_err(|e| self.reject(&event, "validate", e.to_string()))?;

        let project_id = event
            .project_id
            .clone()
            .or_else(|| self.config.default_project_id.clone())
            .unwrap_or_else(|| "default".to_string());
        event.project_id = Some(project_id.clone());

        // Serialize submissions sharing a (project, event) key
        let lock = self.submission_lock(&project_id, &event.id);
        let _guard = lock.lock().await;

        // Embedding fill-in; an oracle outage only tags the event for later
        if event.embedding.is_none() && self.config.enable_semantic_matching {
            if let Some(embedder) = &self.embedder {
                match embedder.embed(&event.full_text()).await {
                    Ok(vector) => {
                        event.embedding = Some(vector);
                    }
                    Err(e) => {
                        tracing::warn!(event = %event.id, "embedder unavailable: {}", e);
                        event
                            .metadata
                            .insert(keys::PENDING_EMBEDDING.to_string(), serde_json::json!(true));
                    }
                }
            }
        }

        let relations = self.inferencer.infer(&project_id, &event).await;

        let mut stored = None;
        let mut score = None;
        if !relations.is_empty() || self.config.store_all_events {
            let centroid = self.inferencer.window_centroid(&project_id);
            let ctx = ScoringContext {
                project: None,
                window_centroid: centroid.as_deref(),
            };
            let computed = self.scorer.score(&event, &ctx);

            let outcome = self
                .persist_with_retries(&project_id, &event, &computed)
                .await?;
            self.write_relations(&project_id, &relations);
            stored = Some(outcome);
            score = Some(computed);
        }

        // The window sees every event, stored or not
        self.inferencer.remember(&project_id, event.clone());

        self.bump_metrics(&relations, stored.as_ref());
        self.publish_outcome(&project_id, &event, &relations, stored.as_ref(), score.as_ref());

        Ok(SubmitOutcome {
            event_id: event.id,
            project_id,
            stored,
            relations,
            score,
        })
    }

    /// Apply user feedback: adjust the weights and append to the ledger
    pub fn record_feedback(&self, predicted: &ImportanceScore, actual: f64) {
        if let Some(adjustment) = self.scorer.learn_from_feedback(predicted, actual) {
            if let Err(e) = self.timeline.record_weight_adjustment(&adjustment) {
                tracing::warn!("feedback ledger append failed: {}", e);
            }
        }
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    fn submission_lock(&self, project_id: &str, event_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let key = format!("{project_id}/{event_id}");
        let mut locks = match self.submission_locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };
        if locks.len() > 10_000 {
            // Uncontended locks are only reachable from this map
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        Arc::clone(locks.entry(key).or_default())
    }

    async fn persist_with_retries(
        &self,
        project_id: &str,
        event: &IntegrationEvent,
        score: &ImportanceScore,
    ) -> Result<StoredOutcome> {
        let mut last_error: Option<StorageError> = None;
        for (attempt, backoff_ms) in std::iter::once(&0u64)
            .chain(RETRY_BACKOFF_MS.iter())
            .enumerate()
        {
            if *backoff_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(*backoff_ms)).await;
            }
            match self.timeline.store_at(project_id, event, score, Utc::now()) {
                Ok(outcome) => return Ok(outcome),
                Err(e @ StorageError::Database(_)) => {
                    tracing::warn!(
                        event = %event.id,
                        attempt,
                        "timeline write failed, will retry: {}",
                        e
                    );
                    last_error = Some(e);
                }
                Err(e) => {
                    // Non-transient storage failures surface immediately
                    return Err(self.reject(event, "persist", e.to_string()));
                }
            }
        }

        let error = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        self.record_failure(event, "persist", &error);
        Err(PipelineError::TransientStore(error))
    }

    /// Write inferred relations as graph edges
    ///
    /// Edges pointing at events that were never stored are skipped by the
    /// graph store; that is fine, the relation can be re-derived later.
    fn write_relations(&self, project_id: &str, relations: &[EventRelation]) {
        if relations.is_empty() {
            return;
        }
        let edges: Vec<GraphRelationship> = relations
            .iter()
            .map(|relation| relation_to_edge(project_id, relation))
            .collect();
        match self.graph.add_relationships_batch(edges) {
            Ok(accepted) => {
                if accepted < relations.len() {
                    tracing::debug!(
                        accepted,
                        total = relations.len(),
                        "some relations skipped (missing endpoints)"
                    );
                }
            }
            Err(e) => tracing::warn!("relation write failed: {}", e),
        }
    }

    fn reject(
        &self,
        event: &IntegrationEvent,
        stage: &str,
        error: String,
    ) -> PipelineError {
        self.record_failure(event, stage, &error);
        if stage == "validate" {
            PipelineError::Validation(error)
        } else {
            PipelineError::Fatal(error)
        }
    }

    fn record_failure(&self, event: &IntegrationEvent, stage: &str, error: &str) {
        if let Ok(mut metrics) = self.metrics.lock() {
            metrics.events_failed += 1;
        }
        let payload = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
        if let Err(e) = self.timeline.record_failed_event(
            event.project_id.as_deref(),
            Some(&event.id),
            &payload,
            stage,
            error,
        ) {
            tracing::error!("failed-event record write failed: {}", e);
        }
        let _ = self.events_tx.send(DomainEvent::IngestFailed {
            project_id: event.project_id.clone(),
            event_id: event.id.clone(),
            stage: stage.to_string(),
            error: error.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn bump_metrics(&self, relations: &[EventRelation], stored: Option<&StoredOutcome>) {
        let Ok(mut metrics) = self.metrics.lock() else {
            return;
        };
        metrics.events_processed += 1;
        metrics.last_processed = Some(Utc::now());
        metrics.relationships_detected += relations.len() as u64;
        for relation in relations {
            match relation.relation_type {
                RelationType::Caused | RelationType::Resolved => {
                    metrics.causal_relationships += 1
                }
                RelationType::Preceded | RelationType::Followed => {
                    metrics.temporal_relationships += 1
                }
                RelationType::Referenced => metrics.reference_relationships += 1,
                _ => {}
            }
        }
        match stored {
            Some(outcome) if outcome.deduplicated => metrics.events_deduplicated += 1,
            Some(_) => metrics.events_stored += 1,
            None => {}
        }
    }

    fn publish_outcome(
        &self,
        project_id: &str,
        event: &IntegrationEvent,
        relations: &[EventRelation],
        stored: Option<&StoredOutcome>,
        score: Option<&ImportanceScore>,
    ) {
        let domain_event = match (stored, score) {
            (Some(outcome), Some(score)) => DomainEvent::EventIngested {
                project_id: project_id.to_string(),
                event_id: event.id.clone(),
                entry_id: outcome.entry_id.clone(),
                event_type: event.event_type.as_str().to_string(),
                title: event.title.clone(),
                author: event.author.clone(),
                text: event.full_text(),
                importance_score: score.score,
                importance_level: score.level,
                relations: relations
                    .iter()
                    .map(|r| RelationSummary {
                        target_event_id: r.target_event_id.clone(),
                        relation_type: r.relation_type.as_str().to_string(),
                        confidence: r.confidence,
                    })
                    .collect(),
                deduplicated: outcome.deduplicated,
                timestamp: Utc::now(),
            },
            _ => DomainEvent::EventSkipped {
                project_id: project_id.to_string(),
                event_id: event.id.clone(),
                reason: "no relations detected and store_all_events is off".to_string(),
                timestamp: Utc::now(),
            },
        };
        // No receivers is fine
        let _ = self.events_tx.send(domain_event);
    }
}

/// Convert an inferred relation into a graph edge
pub fn relation_to_edge(project_id: &str, relation: &EventRelation) -> GraphRelationship {
    let mut properties = relation.metadata.clone();
    properties.insert(
        "confidence".to_string(),
        serde_json::json!(relation.confidence),
    );
    properties.insert(
        "relation_id".to_string(),
        serde_json::json!(relation.id),
    );
    GraphRelationship {
        from_id: relation.source_event_id.clone(),
        to_id: relation.target_event_id.clone(),
        relationship_type: relation.relation_type.as_str().to_string(),
        properties,
        project_id: project_id.to_string(),
        timestamp: relation.timestamp,
        strength: relation.confidence,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetentionDays;
    use crate::event::EventType;
    use crate::inference::InferencerConfig;
    use crate::oracle::{OracleError, Result as OracleResult};
    use crate::vector::VectorIndex;
    use async_trait::async_trait;
    use chrono::Duration;

    /// Deterministic embedder: a 4-dim vector derived from text bytes
    struct HashEmbedder;

    #[async_trait]
    impl Embedder for HashEmbedder {
        async fn embed(&self, text: &str) -> OracleResult<Vec<f32>> {
            let mut v = [0.0f32; 4];
            for (i, b) in text.bytes().enumerate() {
                v[i % 4] += f32::from(b) / 255.0;
            }
            Ok(v.to_vec())
        }

        fn dimensions(&self) -> usize {
            4
        }
    }

    struct DownEmbedder;

    #[async_trait]
    impl Embedder for DownEmbedder {
        async fn embed(&self, _text: &str) -> OracleResult<Vec<f32>> {
            Err(OracleError::Unavailable("embedder offline".into()))
        }

        fn dimensions(&self) -> usize {
            4
        }
    }

    struct Fixture {
        pipeline: Arc<IngestionPipeline>,
        timeline: Arc<TimelineStore>,
        graph: Arc<GraphStore>,
        _dir: tempfile::TempDir,
    }

    fn fixture(store_all: bool, embedder: Option<Arc<dyn Embedder>>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let vector = Arc::new(VectorIndex::new());
        let graph = Arc::new(GraphStore::new());
        let timeline = Arc::new(
            TimelineStore::new(
                Some(dir.path().join("test.db")),
                RetentionDays::default(),
                7,
                vector.clone(),
                graph.clone(),
            )
            .unwrap(),
        );
        let mut config = EngineConfig::default();
        config.store_all_events = store_all;
        let inferencer = Arc::new(RelationshipInferencer::new(
            InferencerConfig::from(&config),
            None,
        ));
        let pipeline = Arc::new(IngestionPipeline::new(
            config,
            Arc::new(ImportanceScorer::default()),
            inferencer,
            timeline.clone(),
            graph.clone(),
            embedder,
        ));
        Fixture {
            pipeline,
            timeline,
            graph,
            _dir: dir,
        }
    }

    fn issue_event(id: &str, number: u64) -> IntegrationEvent {
        let mut event = IntegrationEvent::new("jira", EventType::Issue, format!("BUG-{number}"));
        event.id = id.to_string();
        event.timestamp = Utc::now() - Duration::hours(1);
        event
            .metadata
            .insert("issue_number".to_string(), serde_json::json!(number));
        event
    }

    #[tokio::test]
    async fn test_submit_stores_and_publishes() {
        let f = fixture(true, Some(Arc::new(HashEmbedder)));
        let mut rx = f.pipeline.subscribe();

        let outcome = f
            .pipeline
            .submit(issue_event("bug-17", 17))
            .await
            .unwrap();
        assert!(outcome.stored.is_some());
        assert_eq!(outcome.project_id, "default");
        assert!(f.timeline.contains_event("default", "bug-17").unwrap());

        match rx.recv().await.unwrap() {
            DomainEvent::EventIngested { event_id, .. } => assert_eq!(event_id, "bug-17"),
            other => panic!("unexpected domain event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_validation_rejected_and_recorded() {
        let f = fixture(true, None);
        let mut bad = issue_event("bad id!", 1);
        bad.id = "bad id!".to_string();
        let err = f.pipeline.submit(bad).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        assert!(!err.is_retryable());
        assert_eq!(f.timeline.failed_events(10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_commit_fixes_issue_end_to_end() {
        let f = fixture(true, None);
        f.pipeline.submit(issue_event("bug-17", 17)).await.unwrap();

        let mut fix = IntegrationEvent::new("github", EventType::Commit, "fix #17 memory leak");
        fix.id = "c1".to_string();
        let outcome = f.pipeline.submit(fix).await.unwrap();

        let resolved = outcome
            .relations
            .iter()
            .find(|r| r.relation_type == RelationType::Resolved)
            .expect("resolved relation");
        assert!(resolved.confidence >= 0.8);

        // Edge persisted in the graph with both endpoints present
        let edges = f
            .graph
            .get_relationships("default", "bug-17", Some("resolved"))
            .unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].from_id, "c1");
        assert!(f.graph.get_entity("default", "c1").unwrap().is_some());
        assert!(f.graph.get_entity("default", "bug-17").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_bug_fix_regression_cascade() {
        use crate::inference::{bug_history, BugState};

        let f = fixture(true, None);
        // t=0: the bug
        f.pipeline.submit(issue_event("bug-17", 17)).await.unwrap();

        // t+1h: the fix commit, carrying its hash
        let mut fix = IntegrationEvent::new("github", EventType::Commit, "fix #17 memory leak");
        fix.id = "c0ffee123".to_string();
        fix.metadata
            .insert("hash".to_string(), serde_json::json!("c0ffee123"));
        f.pipeline.submit(fix).await.unwrap();

        // t+5d: a new issue citing the fix commit
        let mut regression =
            IntegrationEvent::new("jira", EventType::Issue, "regression in leak fix");
        regression.id = "bug-42".to_string();
        regression.content = Some("bisected to commit c0ffee123".to_string());
        regression.timestamp = Utc::now() + Duration::days(5);
        f.pipeline.submit(regression).await.unwrap();

        let history = bug_history(&f.graph, "default", "bug-17")
            .unwrap()
            .expect("bug history");
        assert_eq!(history.state, BugState::Regression);
        assert_eq!(history.fixes.len(), 1);
        assert_eq!(history.fixes[0].id, "c0ffee123");
        assert_eq!(history.fixes[0].caused_bugs.len(), 1);
        assert_eq!(history.fixes[0].caused_bugs[0].id, "bug-42");
    }

    #[tokio::test]
    async fn test_no_relations_skips_storage_without_store_all() {
        let f = fixture(false, None);
        let outcome = f
            .pipeline
            .submit(issue_event("solo-event", 1))
            .await
            .unwrap();
        assert!(outcome.stored.is_none());
        assert!(!f.timeline.contains_event("default", "solo-event").unwrap());
        // The window still saw it
        assert_eq!(f.pipeline.inferencer.window_len("default"), 1);
    }

    #[tokio::test]
    async fn test_resubmission_is_idempotent() {
        let f = fixture(true, None);
        let first = f.pipeline.submit(issue_event("bug-1", 1)).await.unwrap();
        let second = f.pipeline.submit(issue_event("bug-1", 1)).await.unwrap();
        assert_eq!(
            first.stored.unwrap().entry_id,
            second.stored.unwrap().entry_id
        );
        let entries = f
            .timeline
            .retrieve("default", None, 0.0, true, 100)
            .unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_embedder_outage_tags_event() {
        let f = fixture(true, Some(Arc::new(DownEmbedder)));
        let outcome = f.pipeline.submit(issue_event("bug-2", 2)).await.unwrap();
        let entry = f
            .timeline
            .get_entry(&outcome.stored.unwrap().entry_id)
            .unwrap()
            .unwrap();
        let snapshot = &entry.metadata["original_event"];
        assert_eq!(snapshot["metadata"][keys::PENDING_EMBEDDING], true);
    }

    #[tokio::test]
    async fn test_queue_overflow_rejects_retryable() {
        let f = fixture(true, None);
        // Worker not started: the queue fills at its capacity
        let capacity = f.pipeline.config.pipeline_queue_capacity;
        for i in 0..capacity {
            f.pipeline.enqueue(issue_event(&format!("e{i}"), 1)).unwrap();
        }
        let err = f
            .pipeline
            .enqueue(issue_event("overflow", 1))
            .unwrap_err();
        assert!(matches!(err, PipelineError::QueueFull));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_worker_drains_queue() {
        let f = fixture(true, None);
        let handle = f.pipeline.start().expect("first start returns a worker");
        assert!(f.pipeline.start().is_none());

        f.pipeline.enqueue(issue_event("queued-1", 1)).unwrap();
        for _ in 0..50 {
            if f.timeline.contains_event("default", "queued-1").unwrap() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(f.timeline.contains_event("default", "queued-1").unwrap());
        handle.abort();
    }

    #[tokio::test]
    async fn test_metrics_counters() {
        let f = fixture(true, None);
        f.pipeline.submit(issue_event("bug-17", 17)).await.unwrap();
        let mut fix = IntegrationEvent::new("github", EventType::Commit, "fix #17");
        fix.id = "c1".to_string();
        f.pipeline.submit(fix).await.unwrap();

        let metrics = f.pipeline.metrics();
        assert_eq!(metrics.events_processed, 2);
        assert_eq!(metrics.events_stored, 2);
        assert!(metrics.relationships_detected >= 1);
        assert!(metrics.causal_relationships >= 1);
        assert!(metrics.last_processed.is_some());
    }

    #[tokio::test]
    async fn test_feedback_lands_in_ledger() {
        let f = fixture(true, None);
        let outcome = f.pipeline.submit(issue_event("bug-3", 3)).await.unwrap();
        let score = outcome.score.unwrap();
        f.pipeline.record_feedback(&score, (score.score + 0.5).min(1.0));
        let history = f.timeline.feedback_history(10).unwrap();
        assert_eq!(history.len(), 1);
    }
}
