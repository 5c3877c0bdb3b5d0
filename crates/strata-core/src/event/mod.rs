//! Integration event model - the ingestion unit
//!
//! Every adapter (GitHub, Jira, Slack, wiki, file uploads) normalizes its
//! payloads into [`IntegrationEvent`] before handing them to the pipeline.
//! Source-specific fields ride in the open `metadata` map; the well-known
//! keys the scorer and inferencer consult are listed in [`keys`] with
//! tolerant typed accessors on the event itself.

mod metadata;

pub use metadata::{keys, MetaValue};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ============================================================================
// EVENT TYPES
// ============================================================================

/// Types of integration events that can be processed
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A version-control commit
    Commit,
    /// An issue or bug report
    Issue,
    /// A comment on an issue
    IssueComment,
    /// A pull/merge request
    PullRequest,
    /// A code review
    CodeReview,
    /// A meeting record
    Meeting,
    /// A chat message
    Message,
    /// A document or wiki page
    Document,
    /// A CI build
    Build,
    /// A deployment
    Deployment,
    /// A test run
    TestRun,
    /// Anything an adapter cannot classify
    #[default]
    Custom,
}

impl EventType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Commit => "commit",
            EventType::Issue => "issue",
            EventType::IssueComment => "issue_comment",
            EventType::PullRequest => "pull_request",
            EventType::CodeReview => "code_review",
            EventType::Meeting => "meeting",
            EventType::Message => "message",
            EventType::Document => "document",
            EventType::Build => "build",
            EventType::Deployment => "deployment",
            EventType::TestRun => "test_run",
            EventType::Custom => "custom",
        }
    }

    /// Parse from string name; unknown names map to `Custom`
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "commit" => EventType::Commit,
            "issue" => EventType::Issue,
            "issue_comment" => EventType::IssueComment,
            "pull_request" => EventType::PullRequest,
            "code_review" => EventType::CodeReview,
            "meeting" => EventType::Meeting,
            "message" => EventType::Message,
            "document" => EventType::Document,
            "build" => EventType::Build,
            "deployment" => EventType::Deployment,
            "test_run" => EventType::TestRun,
            _ => EventType::Custom,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// RELATION TYPES
// ============================================================================

/// Types of directed relationships between events
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    /// One event directly caused another
    Caused,
    /// One event resolved another (e.g. commit fixed bug)
    Resolved,
    /// One event referenced another
    Referenced,
    /// Temporal relationship only
    Preceded,
    /// Temporal relationship only
    Followed,
    /// Dependency relationship
    DependsOn,
    /// Blocking relationship
    Blocks,
    /// Generic relationship
    RelatedTo,
    /// Events affect the same component
    SameComponent,
    /// Events have the same author
    SameAuthor,
}

impl RelationType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Caused => "caused",
            RelationType::Resolved => "resolved",
            RelationType::Referenced => "referenced",
            RelationType::Preceded => "preceded",
            RelationType::Followed => "followed",
            RelationType::DependsOn => "depends_on",
            RelationType::Blocks => "blocks",
            RelationType::RelatedTo => "related_to",
            RelationType::SameComponent => "same_component",
            RelationType::SameAuthor => "same_author",
        }
    }

    /// Parse from string name
    pub fn parse_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "caused" => Some(RelationType::Caused),
            "resolved" => Some(RelationType::Resolved),
            "referenced" => Some(RelationType::Referenced),
            "preceded" => Some(RelationType::Preceded),
            "followed" => Some(RelationType::Followed),
            "depends_on" => Some(RelationType::DependsOn),
            "blocks" => Some(RelationType::Blocks),
            "related_to" => Some(RelationType::RelatedTo),
            "same_component" => Some(RelationType::SameComponent),
            "same_author" => Some(RelationType::SameAuthor),
            _ => None,
        }
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// VALIDATION
// ============================================================================

/// Event validation error
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum EventError {
    /// Identifier is empty, too long, or carries forbidden characters
    #[error("invalid event id {0:?}: ids are <=256 chars of [A-Za-z0-9._:-]")]
    InvalidId(String),
    /// Title must be present
    #[error("event {0} has an empty title")]
    EmptyTitle(String),
    /// Source tag must be present
    #[error("event {0} has an empty source")]
    EmptySource(String),
}

/// Maximum accepted identifier length on the wire
pub const MAX_ID_LEN: usize = 256;

fn valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b':' | b'-'))
}

// ============================================================================
// INTEGRATION EVENT
// ============================================================================

/// A normalized, source-agnostic record describing one thing that happened
/// in an engineering tool.
///
/// `(project_id, id)` is unique within the system. Timestamps are monotone
/// only per source, never globally.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationEvent {
    /// Globally unique identifier, assigned at source if provided
    #[serde(default = "generated_id")]
    pub id: String,
    /// Origin tag, e.g. "github", "jira", "slack"
    pub source: String,
    /// Classified event type
    #[serde(default)]
    pub event_type: EventType,
    /// Human-readable title
    pub title: String,
    /// Body content, if any
    #[serde(default)]
    pub content: Option<String>,
    /// Occurrence time, UTC
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Author handle, if known
    #[serde(default)]
    pub author: Option<String>,
    /// Link back to the source system
    #[serde(default)]
    pub url: Option<String>,
    /// Owning project; filled from the pipeline default when absent
    #[serde(default)]
    pub project_id: Option<String>,
    /// Repository name for VCS events
    #[serde(default)]
    pub repository: Option<String>,
    /// Branch name for VCS events
    #[serde(default)]
    pub branch: Option<String>,
    /// Explicit component tag
    #[serde(default)]
    pub component: Option<String>,
    /// Free-form labels
    #[serde(default)]
    pub labels: Vec<String>,
    /// Source-side status string (open, closed, merged, ...)
    #[serde(default)]
    pub status: Option<String>,
    /// Open key/value map of source-specific fields; see [`keys`]
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Content embedding, computed lazily when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

fn generated_id() -> String {
    Uuid::new_v4().to_string()
}

impl IntegrationEvent {
    /// Create a minimal event for the given source and title
    pub fn new(source: impl Into<String>, event_type: EventType, title: impl Into<String>) -> Self {
        Self {
            id: generated_id(),
            source: source.into(),
            event_type,
            title: title.into(),
            content: None,
            timestamp: Utc::now(),
            author: None,
            url: None,
            project_id: None,
            repository: None,
            branch: None,
            component: None,
            labels: Vec::new(),
            status: None,
            metadata: Map::new(),
            embedding: None,
        }
    }

    /// Check the wire invariants: id shape, non-empty title and source
    pub fn validate(&self) -> Result<(), EventError> {
        if !valid_id(&self.id) {
            return Err(EventError::InvalidId(self.id.clone()));
        }
        if self.title.trim().is_empty() {
            return Err(EventError::EmptyTitle(self.id.clone()));
        }
        if self.source.trim().is_empty() {
            return Err(EventError::EmptySource(self.id.clone()));
        }
        Ok(())
    }

    /// Title and content joined, the text the embedder and the reference
    /// extractor both look at
    pub fn full_text(&self) -> String {
        match &self.content {
            Some(content) => format!("{} {}", self.title, content),
            None => self.title.clone(),
        }
    }

    /// Age in whole days relative to `now`
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.timestamp).num_days()
    }
}

// ============================================================================
// EVENT RELATION
// ============================================================================

/// A directed, typed edge between two integration events with an inferred
/// confidence.
///
/// Only relations at or above the configured confidence threshold are
/// persisted; for any `(source, target, type)` triple the single
/// highest-confidence edge wins.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRelation {
    /// Unique relation identifier
    #[serde(default = "generated_id")]
    pub id: String,
    /// The event the edge starts at
    pub source_event_id: String,
    /// The event the edge points to
    pub target_event_id: String,
    /// Relationship classification
    pub relation_type: RelationType,
    /// Inference confidence in [0, 1]
    pub confidence: f64,
    /// Inference evidence (matched references, common components, llm score)
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Owning project; both endpoints must resolve within it
    #[serde(default)]
    pub project_id: Option<String>,
    /// When the relation was inferred
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl EventRelation {
    /// Create a relation between two events
    pub fn new(
        source_event_id: impl Into<String>,
        target_event_id: impl Into<String>,
        relation_type: RelationType,
        confidence: f64,
    ) -> Self {
        Self {
            id: generated_id(),
            source_event_id: source_event_id.into(),
            target_event_id: target_event_id.into(),
            relation_type,
            confidence,
            metadata: Map::new(),
            project_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach the owning project
    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Attach an evidence entry
    pub fn with_evidence(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// The identity used for highest-confidence deduplication
    pub fn dedup_key(&self) -> (String, String, RelationType) {
        (
            self.source_event_id.clone(),
            self.target_event_id.clone(),
            self.relation_type,
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_roundtrip() {
        for event_type in [
            EventType::Commit,
            EventType::Issue,
            EventType::IssueComment,
            EventType::PullRequest,
            EventType::Deployment,
            EventType::TestRun,
        ] {
            assert_eq!(EventType::parse_name(event_type.as_str()), event_type);
        }
        assert_eq!(EventType::parse_name("something else"), EventType::Custom);
    }

    #[test]
    fn test_relation_type_roundtrip() {
        for relation_type in [
            RelationType::Caused,
            RelationType::Resolved,
            RelationType::SameComponent,
            RelationType::SameAuthor,
        ] {
            assert_eq!(
                RelationType::parse_name(relation_type.as_str()),
                Some(relation_type)
            );
        }
        assert_eq!(RelationType::parse_name("bogus"), None);
    }

    #[test]
    fn test_id_validation() {
        let mut event = IntegrationEvent::new("github", EventType::Commit, "fix leak");
        assert!(event.validate().is_ok());

        event.id = "abc:123_ok-id.v2".to_string();
        assert!(event.validate().is_ok());

        event.id = "bad id with spaces".to_string();
        assert!(matches!(event.validate(), Err(EventError::InvalidId(_))));

        event.id = "x".repeat(MAX_ID_LEN + 1);
        assert!(matches!(event.validate(), Err(EventError::InvalidId(_))));
    }

    #[test]
    fn test_empty_title_rejected() {
        let mut event = IntegrationEvent::new("jira", EventType::Issue, "  ");
        assert!(matches!(event.validate(), Err(EventError::EmptyTitle(_))));
        event.title = "real title".to_string();
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_full_text_joins_title_and_content() {
        let mut event = IntegrationEvent::new("github", EventType::Commit, "fix #17");
        assert_eq!(event.full_text(), "fix #17");
        event.content = Some("memory leak in parser".to_string());
        assert_eq!(event.full_text(), "fix #17 memory leak in parser");
    }

    #[test]
    fn test_wire_deserialization_defaults() {
        let json = r#"{
            "source": "github",
            "event_type": "pull_request",
            "title": "Add retry logic",
            "metadata": {"pr_number": 42}
        }"#;
        let event: IntegrationEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.event_type, EventType::PullRequest);
        assert!(!event.id.is_empty());
        assert_eq!(event.pr_number(), Some(42));
        assert!(event.labels.is_empty());
    }

    #[test]
    fn test_relation_dedup_key() {
        let a = EventRelation::new("e1", "e2", RelationType::Resolved, 0.8);
        let b = EventRelation::new("e1", "e2", RelationType::Resolved, 0.9);
        assert_eq!(a.dedup_key(), b.dedup_key());
        let c = EventRelation::new("e1", "e2", RelationType::RelatedTo, 0.9);
        assert_ne!(a.dedup_key(), c.dedup_key());
    }
}
