//! Relationship inference - turning an event stream into a causal graph
//!
//! Given a new event and a window of recent events in the same project, five
//! detectors propose typed relations: semantic similarity, explicit
//! references, component overlap, shared authorship, and causal inference
//! (rule-based, with an optional LLM blend for borderline commit/issue
//! pairs). Only relations at or above the confidence threshold survive, one
//! per `(source, target, type)` triple.
//!
//! Detector failures on individual candidates are logged and skipped; an
//! inferencer failure never blocks ingestion - the event is simply stored
//! without inferred relations.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, OnceLock};

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::EngineConfig;
use crate::embedding::{centroid, cosine_similarity};
use crate::event::{EventRelation, EventType, IntegrationEvent, RelationType};
use crate::graph::{GraphEntity, GraphError, GraphStore};
use crate::oracle::CompletionModel;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Verbs that mark a commit as resolving an issue
pub const RESOLUTION_KEYWORDS: &[&str] = &["fix", "resolve", "close", "address", "solve"];

/// Upper bound on cached recent events per project
const CACHE_LIMIT: usize = 1000;

/// A regression is a new issue caused by a fix within this many days
const REGRESSION_WINDOW_DAYS: i64 = 30;

fn issue_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"#(\d+)").expect("static pattern compiles"))
}

fn key_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([A-Z]+-\d+)\b").expect("static pattern compiles"))
}

fn hash_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([a-f0-9]{7,40})\b").expect("static pattern compiles"))
}

fn file_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"([A-Za-z0-9_\-.]+/[A-Za-z0-9_\-.]+/[A-Za-z0-9_\-.]+)")
            .expect("static pattern compiles")
    })
}

fn score_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([01](?:\.\d+)?)").expect("static pattern compiles"))
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Inferencer tunables
#[derive(Debug, Clone)]
pub struct InferencerConfig {
    /// Minimum confidence to accept a relation
    pub threshold_confidence: f64,
    /// Number of recent events to consider
    pub max_context_window: usize,
    /// Whether semantic similarity runs at all
    pub enable_semantic_matching: bool,
    /// Whether the time window bounds candidates
    pub enable_temporal_analysis: bool,
    /// Whether causal inference runs at all
    pub enable_causal_inference: bool,
    /// Minimum cosine similarity for a semantic relation
    pub min_similarity: f64,
    /// Maximum clock distance between related events, in days
    pub max_time_window_days: i64,
}

impl Default for InferencerConfig {
    fn default() -> Self {
        Self {
            threshold_confidence: 0.7,
            max_context_window: 10,
            enable_semantic_matching: true,
            enable_temporal_analysis: true,
            enable_causal_inference: true,
            min_similarity: 0.75,
            max_time_window_days: 30,
        }
    }
}

impl From<&EngineConfig> for InferencerConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            threshold_confidence: config.min_confidence,
            max_context_window: config.context_window_size,
            enable_semantic_matching: config.enable_semantic_matching,
            enable_temporal_analysis: true,
            enable_causal_inference: config.enable_causal_inference,
            min_similarity: config.min_similarity,
            max_time_window_days: config.max_time_window_days,
        }
    }
}

// ============================================================================
// INFERENCER
// ============================================================================

/// Detects relations between a new event and the recent-event window
pub struct RelationshipInferencer {
    config: InferencerConfig,
    /// project -> (event id -> event)
    cache: Mutex<HashMap<String, HashMap<String, IntegrationEvent>>>,
    llm: Option<Arc<dyn CompletionModel>>,
}

impl RelationshipInferencer {
    /// Create an inferencer; pass an LLM oracle to enable blended causal
    /// confirmation for borderline pairs
    pub fn new(config: InferencerConfig, llm: Option<Arc<dyn CompletionModel>>) -> Self {
        Self {
            config,
            cache: Mutex::new(HashMap::new()),
            llm,
        }
    }

    /// Add an event to the recent-window cache, evicting the oldest past the
    /// cache limit
    pub fn remember(&self, project_id: &str, event: IntegrationEvent) {
        let Ok(mut cache) = self.cache.lock() else {
            return;
        };
        let project = cache.entry(project_id.to_string()).or_default();
        project.insert(event.id.clone(), event);

        if project.len() > CACHE_LIMIT {
            let mut by_age: Vec<(String, DateTime<Utc>)> = project
                .iter()
                .map(|(id, e)| (id.clone(), e.timestamp))
                .collect();
            by_age.sort_by_key(|(_, ts)| *ts);
            let excess = project.len() - CACHE_LIMIT;
            for (id, _) in by_age.into_iter().take(excess) {
                project.remove(&id);
            }
        }
    }

    /// Warm the cache from previously stored events
    pub fn preload(&self, project_id: &str, events: Vec<IntegrationEvent>) {
        for event in events {
            self.remember(project_id, event);
        }
    }

    /// Centroid of the cached window's embeddings, for context scoring
    pub fn window_centroid(&self, project_id: &str) -> Option<Vec<f32>> {
        let cache = self.cache.lock().ok()?;
        let project = cache.get(project_id)?;
        let vectors: Vec<&[f32]> = project
            .values()
            .filter_map(|e| e.embedding.as_deref())
            .collect();
        centroid(&vectors)
    }

    /// Number of cached events for a project
    pub fn window_len(&self, project_id: &str) -> usize {
        self.cache
            .lock()
            .ok()
            .and_then(|cache| cache.get(project_id).map(|p| p.len()))
            .unwrap_or(0)
    }

    /// Detect relations between `event` and the recent window
    pub async fn infer(&self, project_id: &str, event: &IntegrationEvent) -> Vec<EventRelation> {
        let candidates = self.candidates(project_id, event);
        if candidates.is_empty() {
            return Vec::new();
        }

        let mut relations = Vec::new();

        if self.config.enable_semantic_matching && event.embedding.is_some() {
            relations.extend(self.detect_semantic(event, &candidates));
        }
        relations.extend(self.detect_references(event, &candidates));
        relations.extend(self.detect_components(event, &candidates));
        if self.config.enable_causal_inference {
            relations.extend(self.detect_causal(event, &candidates).await);
        }
        relations.extend(self.detect_author(event, &candidates));

        // Threshold, then keep the single best edge per (src, dst, type)
        let mut best: HashMap<(String, String, RelationType), EventRelation> = HashMap::new();
        for mut relation in relations {
            if relation.confidence < self.config.threshold_confidence {
                continue;
            }
            relation.project_id = Some(project_id.to_string());
            let key = relation.dedup_key();
            match best.get(&key) {
                Some(existing) if existing.confidence >= relation.confidence => {}
                _ => {
                    best.insert(key, relation);
                }
            }
        }
        best.into_values().collect()
    }

    /// Recent-window candidates: same project, within the time window,
    /// most recent first, bounded by the context window size
    fn candidates(&self, project_id: &str, event: &IntegrationEvent) -> Vec<IntegrationEvent> {
        let Ok(cache) = self.cache.lock() else {
            return Vec::new();
        };
        let Some(project) = cache.get(project_id) else {
            return Vec::new();
        };
        let mut candidates: Vec<IntegrationEvent> = project
            .values()
            .filter(|cached| cached.id != event.id)
            .filter(|cached| {
                if !self.config.enable_temporal_analysis {
                    return true;
                }
                let distance = (event.timestamp - cached.timestamp).abs();
                distance <= Duration::days(self.config.max_time_window_days)
            })
            .cloned()
            .collect();
        candidates.sort_by_key(|c| std::cmp::Reverse(c.timestamp));
        candidates.truncate(self.config.max_context_window);
        candidates
    }

    // ========================================================================
    // DETECTORS
    // ========================================================================

    fn detect_semantic(
        &self,
        event: &IntegrationEvent,
        candidates: &[IntegrationEvent],
    ) -> Vec<EventRelation> {
        let Some(embedding) = &event.embedding else {
            return Vec::new();
        };
        candidates
            .iter()
            .filter_map(|candidate| {
                let other = candidate.embedding.as_ref()?;
                let similarity = f64::from(cosine_similarity(embedding, other));
                if similarity >= self.config.min_similarity {
                    Some(EventRelation::new(
                        &event.id,
                        &candidate.id,
                        RelationType::RelatedTo,
                        similarity,
                    ))
                } else {
                    None
                }
            })
            .collect()
    }

    fn detect_references(
        &self,
        event: &IntegrationEvent,
        candidates: &[IntegrationEvent],
    ) -> Vec<EventRelation> {
        let references = extract_references(event);
        if references.is_empty() {
            return Vec::new();
        }

        let mut relations = Vec::new();
        for candidate in candidates {
            let mut matched: Vec<String> = Vec::new();
            if references.contains(candidate.id.as_str()) {
                matched.push(candidate.id.clone());
            }
            for external in candidate_external_ids(candidate) {
                if references.contains(external.as_str()) {
                    matched.push(external);
                }
            }
            if matched.is_empty() {
                continue;
            }

            // More distinct matches, more confidence
            let mut confidence = (0.7 + 0.05 * matched.len() as f64).min(0.9);
            let mut relation_type = RelationType::Referenced;

            // A commit referencing an issue with a resolution verb fixed it
            if event.event_type == EventType::Commit
                && candidate.event_type == EventType::Issue
                && has_resolution_keyword(event)
            {
                relation_type = RelationType::Resolved;
                confidence = (confidence + 0.1).min(0.95);
            }

            // A new issue citing an earlier commit marks the commit as a
            // suspected cause
            if event.event_type == EventType::Issue
                && candidate.event_type == EventType::Commit
                && candidate.timestamp <= event.timestamp
            {
                relations.push(
                    EventRelation::new(&candidate.id, &event.id, RelationType::Caused, confidence)
                        .with_evidence("matched_references", json!(matched)),
                );
            }

            relations.push(
                EventRelation::new(&event.id, &candidate.id, relation_type, confidence)
                    .with_evidence("matched_references", json!(matched)),
            );
        }
        relations
    }

    fn detect_components(
        &self,
        event: &IntegrationEvent,
        candidates: &[IntegrationEvent],
    ) -> Vec<EventRelation> {
        let components = extract_components(event);
        if components.is_empty() {
            return Vec::new();
        }

        let mut relations = Vec::new();
        for candidate in candidates {
            let other = extract_components(candidate);
            if other.is_empty() {
                continue;
            }
            let common: Vec<&String> = components.intersection(&other).collect();
            if common.is_empty() {
                continue;
            }
            let overlap = common.len() as f64 / components.len().max(other.len()) as f64;
            let confidence = (0.6 + 0.3 * overlap).min(0.9);
            relations.push(
                EventRelation::new(
                    &event.id,
                    &candidate.id,
                    RelationType::SameComponent,
                    confidence,
                )
                .with_evidence("common_components", json!(common)),
            );
        }
        relations
    }

    fn detect_author(
        &self,
        event: &IntegrationEvent,
        candidates: &[IntegrationEvent],
    ) -> Vec<EventRelation> {
        let Some(author) = &event.author else {
            return Vec::new();
        };
        let mut relations = Vec::new();
        for candidate in candidates {
            let Some(other) = &candidate.author else {
                continue;
            };
            if !author.eq_ignore_ascii_case(other) {
                continue;
            }
            let mut confidence = 0.8;
            if self.config.enable_temporal_analysis {
                let distance = (event.timestamp - candidate.timestamp).abs();
                // Bursts of activity by one person bind tighter
                if distance < Duration::hours(1) {
                    confidence = (confidence + 0.15_f64).min(0.95);
                }
            }
            relations.push(EventRelation::new(
                &event.id,
                &candidate.id,
                RelationType::SameAuthor,
                confidence,
            ));
        }
        relations
    }

    async fn detect_causal(
        &self,
        event: &IntegrationEvent,
        candidates: &[IntegrationEvent],
    ) -> Vec<EventRelation> {
        if !matches!(
            event.event_type,
            EventType::Commit | EventType::Deployment | EventType::PullRequest
        ) {
            return Vec::new();
        }

        let mut relations = Vec::new();
        match event.event_type {
            EventType::Commit => {
                let references = extract_references(event);
                for issue in candidates
                    .iter()
                    .filter(|c| c.event_type == EventType::Issue)
                {
                    // An issue filed after the commit cannot have been fixed by it
                    if issue.timestamp > event.timestamp {
                        continue;
                    }
                    let mut confidence = 0.5;
                    let issue_ids = candidate_external_ids(issue);
                    if issue_ids.iter().any(|id| references.contains(id.as_str())) {
                        confidence += 0.3;
                    }
                    if has_resolution_keyword(event) {
                        confidence += 0.2;
                    }

                    // Borderline pairs get the LLM's opinion, weighted heavier
                    if confidence >= 0.5 && confidence < self.config.threshold_confidence {
                        if let Some(llm) = &self.llm {
                            let llm_confidence =
                                llm_causal_score(llm.as_ref(), event, issue).await;
                            confidence = confidence * 0.4 + llm_confidence * 0.6;
                        }
                    }

                    if confidence >= self.config.threshold_confidence {
                        relations.push(EventRelation::new(
                            &event.id,
                            &issue.id,
                            RelationType::Resolved,
                            confidence,
                        ));
                    }
                }
            }
            EventType::Deployment => {
                let deployed = event.commit_hashes();
                if deployed.is_empty() {
                    return relations;
                }
                for commit in candidates
                    .iter()
                    .filter(|c| c.event_type == EventType::Commit)
                {
                    if commit.timestamp > event.timestamp {
                        continue;
                    }
                    let Some(hash) = commit.commit_hash() else {
                        continue;
                    };
                    if deployed.iter().any(|d| d == hash) {
                        relations.push(EventRelation::new(
                            &event.id,
                            &commit.id,
                            RelationType::Caused,
                            0.95,
                        ));
                    }
                }
            }
            _ => {}
        }
        relations
    }
}

// ============================================================================
// EXTRACTION HELPERS
// ============================================================================

/// Extract reference tokens from an event's title and content
///
/// Recognizes `#123` issue numbers (both `#123` and bare `123` forms),
/// `PROJ-123` issue keys, and 7-40 character hex commit hashes.
pub fn extract_references(event: &IntegrationEvent) -> HashSet<String> {
    let text = event.full_text();
    let mut references = HashSet::new();
    for capture in issue_ref_re().captures_iter(&text) {
        references.insert(format!("#{}", &capture[1]));
        references.insert(capture[1].to_string());
    }
    for capture in key_ref_re().captures_iter(&text) {
        references.insert(capture[1].to_string());
    }
    for capture in hash_ref_re().captures_iter(&text) {
        references.insert(capture[1].to_string());
    }
    references
}

/// The identifiers a candidate can be referenced by
fn candidate_external_ids(candidate: &IntegrationEvent) -> Vec<String> {
    let mut ids = Vec::new();
    if let Some(external) = candidate.external_id() {
        ids.push(external.to_string());
    }
    if let Some(number) = candidate.issue_number() {
        ids.push(format!("#{number}"));
        ids.push(number.to_string());
    }
    if let Some(number) = candidate.pr_number() {
        ids.push(format!("#{number}"));
        ids.push(number.to_string());
    }
    if let Some(hash) = candidate.commit_hash() {
        ids.push(hash.to_string());
    }
    ids
}

/// Build an event's component set
///
/// Explicit component tag, metadata components (including Jira's object
/// form), and for commits the first two path segments of touched files plus
/// any path-shaped tokens in the content.
pub fn extract_components(event: &IntegrationEvent) -> HashSet<String> {
    let mut components = HashSet::new();
    if let Some(component) = &event.component {
        components.insert(component.to_lowercase());
    }
    for component in event.meta_components() {
        components.insert(component.to_lowercase());
    }
    if event.event_type == EventType::Commit {
        for file in event.files() {
            add_path_components(&mut components, &file);
        }
        if let Some(content) = &event.content {
            for capture in file_path_re().captures_iter(content) {
                add_path_components(&mut components, &capture[1]);
            }
        }
    }
    components
}

fn add_path_components(components: &mut HashSet<String>, path: &str) {
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() > 1 {
        components.insert(parts[0].to_lowercase());
        if parts.len() > 2 {
            components.insert(parts[1].to_lowercase());
        }
    }
}

fn has_resolution_keyword(event: &IntegrationEvent) -> bool {
    let text = event.full_text().to_lowercase();
    RESOLUTION_KEYWORDS.iter().any(|keyword| text.contains(keyword))
}

/// Ask the LLM oracle for a causal score between a pair of events
///
/// Failures and unparseable completions score 0.0 so an oracle outage only
/// ever removes evidence, never invents it.
async fn llm_causal_score(
    llm: &dyn CompletionModel,
    source: &IntegrationEvent,
    target: &IntegrationEvent,
) -> f64 {
    let prompt = format!(
        "You are an expert software development analyst. Determine whether there is a \
         causal relationship between the following two events.\n\n\
         EVENT 1 (potential cause):\nType: {}\nTitle: {}\nContent: {}\nAuthor: {}\nTimestamp: {}\n\n\
         EVENT 2 (potential effect):\nType: {}\nTitle: {}\nContent: {}\nAuthor: {}\nTimestamp: {}\n\n\
         Does EVENT 1 resolve or cause EVENT 2? Respond with ONLY a confidence score \
         between 0 and 1.",
        source.event_type,
        source.title,
        source.content.as_deref().unwrap_or("N/A"),
        source.author.as_deref().unwrap_or("Unknown"),
        source.timestamp.to_rfc3339(),
        target.event_type,
        target.title,
        target.content.as_deref().unwrap_or("N/A"),
        target.author.as_deref().unwrap_or("Unknown"),
        target.timestamp.to_rfc3339(),
    );

    match llm.complete(&prompt).await {
        Ok(text) => score_re()
            .captures(text.trim())
            .and_then(|capture| capture[1].parse::<f64>().ok())
            .map(|score| score.clamp(0.0, 1.0))
            .unwrap_or(0.0),
        Err(e) => {
            tracing::warn!("llm causal inference unavailable: {}", e);
            0.0
        }
    }
}

// ============================================================================
// BUG HISTORY
// ============================================================================

/// Observable lifecycle state of a bug, derived from the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BugState {
    /// No resolving commit recorded
    Open,
    /// At least one commit resolved the bug
    Resolved,
    /// A fix commit caused a new issue shortly after
    Regression,
}

/// A referenced issue in a bug history
#[derive(Debug, Clone, Serialize)]
pub struct BugRef {
    /// Event id
    pub id: String,
    /// Issue title
    pub title: String,
    /// Source-side status
    pub status: Option<String>,
    /// Edge confidence
    pub confidence: f64,
    /// Occurrence time, when known
    pub timestamp: Option<DateTime<Utc>>,
}

/// A commit that resolved the bug
#[derive(Debug, Clone, Serialize)]
pub struct BugFix {
    /// Commit event id
    pub id: String,
    /// Commit title
    pub title: String,
    /// Commit author
    pub author: Option<String>,
    /// Commit time, when known
    pub timestamp: Option<DateTime<Utc>>,
    /// Source link
    pub url: Option<String>,
    /// Edge confidence
    pub confidence: f64,
    /// Issues this fix later caused
    pub caused_bugs: Vec<BugRef>,
}

/// What caused the bug
#[derive(Debug, Clone, Serialize)]
pub struct BugCause {
    /// Event id
    pub id: String,
    /// Event title
    pub title: String,
    /// Event type string
    pub event_type: String,
    /// Author, when known
    pub author: Option<String>,
    /// Edge confidence
    pub confidence: f64,
}

/// Full history of a bug: its fixes, their fallout, and related issues
#[derive(Debug, Clone, Serialize)]
pub struct BugHistory {
    /// The bug event id
    pub bug_id: String,
    /// Bug title
    pub title: String,
    /// Source-side status
    pub status: Option<String>,
    /// Derived lifecycle state
    pub state: BugState,
    /// Commits that resolved this bug
    pub fixes: Vec<BugFix>,
    /// Events that caused this bug
    pub caused_by: Vec<BugCause>,
    /// Related issues
    pub related_bugs: Vec<BugRef>,
}

fn prop_str(entity: &GraphEntity, key: &str) -> Option<String> {
    entity
        .properties
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

fn prop_time(entity: &GraphEntity, key: &str) -> Option<DateTime<Utc>> {
    prop_str(entity, key)
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn is_issue(entity: &GraphEntity) -> bool {
    prop_str(entity, "event_type").as_deref() == Some("issue")
}

/// Walk the graph around a bug and assemble its history
///
/// `None` when the id does not resolve to an event entity in the project.
pub fn bug_history(
    graph: &GraphStore,
    project_id: &str,
    bug_id: &str,
) -> std::result::Result<Option<BugHistory>, GraphError> {
    let Some(bug) = graph.get_entity(project_id, bug_id)? else {
        return Ok(None);
    };
    if bug.entity_type != "event" {
        return Ok(None);
    }

    let relationships = graph.get_relationships(project_id, bug_id, None)?;
    let mut fixes = Vec::new();
    let mut caused_by = Vec::new();
    let mut related_bugs = Vec::new();

    for relationship in &relationships {
        // Incoming edges: other -> this bug
        if relationship.to_id == bug_id {
            let Some(source) = graph.get_entity(project_id, &relationship.from_id)? else {
                continue;
            };
            match relationship.relationship_type.as_str() {
                "resolved" => {
                    if prop_str(&source, "event_type").as_deref() == Some("commit") {
                        fixes.push(BugFix {
                            id: source.id.clone(),
                            title: prop_str(&source, "title").unwrap_or_default(),
                            author: prop_str(&source, "author"),
                            timestamp: prop_time(&source, "timestamp"),
                            url: prop_str(&source, "url"),
                            confidence: relationship.strength,
                            caused_bugs: Vec::new(),
                        });
                    }
                }
                "caused" => caused_by.push(BugCause {
                    id: source.id.clone(),
                    title: prop_str(&source, "title").unwrap_or_default(),
                    event_type: prop_str(&source, "event_type").unwrap_or_default(),
                    author: prop_str(&source, "author"),
                    confidence: relationship.strength,
                }),
                "related_to" => {
                    if is_issue(&source) {
                        related_bugs.push(BugRef {
                            id: source.id.clone(),
                            title: prop_str(&source, "title").unwrap_or_default(),
                            status: prop_str(&source, "status"),
                            confidence: relationship.strength,
                            timestamp: prop_time(&source, "timestamp"),
                        });
                    }
                }
                _ => {}
            }
        } else if relationship.relationship_type == "related_to" {
            // Outgoing related_to edges surface sibling issues too
            if let Some(target) = graph.get_entity(project_id, &relationship.to_id)? {
                if is_issue(&target) {
                    related_bugs.push(BugRef {
                        id: target.id.clone(),
                        title: prop_str(&target, "title").unwrap_or_default(),
                        status: prop_str(&target, "status"),
                        confidence: relationship.strength,
                        timestamp: prop_time(&target, "timestamp"),
                    });
                }
            }
        }
    }

    // For each fix, surface the issues the fix itself caused
    let mut state = if fixes.is_empty() {
        BugState::Open
    } else {
        BugState::Resolved
    };
    for fix in &mut fixes {
        let fix_edges = graph.get_relationships(project_id, &fix.id, Some("caused"))?;
        for edge in fix_edges {
            if edge.from_id != fix.id {
                continue;
            }
            let Some(target) = graph.get_entity(project_id, &edge.to_id)? else {
                continue;
            };
            if !is_issue(&target) {
                continue;
            }
            let caused = BugRef {
                id: target.id.clone(),
                title: prop_str(&target, "title").unwrap_or_default(),
                status: prop_str(&target, "status"),
                confidence: edge.strength,
                timestamp: prop_time(&target, "timestamp"),
            };
            // A fresh issue caused by the fix flips the bug to regression
            if let (Some(fixed_at), Some(caused_at)) = (fix.timestamp, caused.timestamp) {
                if caused_at >= fixed_at
                    && caused_at - fixed_at <= Duration::days(REGRESSION_WINDOW_DAYS)
                {
                    state = BugState::Regression;
                }
            }
            fix.caused_bugs.push(caused);
        }
    }

    Ok(Some(BugHistory {
        bug_id: bug.id.clone(),
        title: prop_str(&bug, "title").unwrap_or_default(),
        status: prop_str(&bug, "status"),
        state,
        fixes,
        caused_by,
        related_bugs,
    }))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphRelationship;
    use crate::oracle::{OracleError, Result as OracleResult};
    use async_trait::async_trait;
    use serde_json::Map;

    struct FixedLlm(&'static str);

    #[async_trait]
    impl CompletionModel for FixedLlm {
        async fn complete(&self, _prompt: &str) -> OracleResult<String> {
            Ok(self.0.to_string())
        }
    }

    struct DownLlm;

    #[async_trait]
    impl CompletionModel for DownLlm {
        async fn complete(&self, _prompt: &str) -> OracleResult<String> {
            Err(OracleError::Unavailable("offline".into()))
        }
    }

    fn inferencer() -> RelationshipInferencer {
        RelationshipInferencer::new(InferencerConfig::default(), None)
    }

    fn issue(id: &str, number: u64, age_hours: i64) -> IntegrationEvent {
        let mut event = IntegrationEvent::new("jira", EventType::Issue, format!("BUG-{number}"));
        event.id = id.to_string();
        event.timestamp = Utc::now() - Duration::hours(age_hours);
        event
            .metadata
            .insert("issue_number".to_string(), json!(number));
        event
    }

    fn commit(id: &str, title: &str, age_hours: i64) -> IntegrationEvent {
        let mut event = IntegrationEvent::new("github", EventType::Commit, title);
        event.id = id.to_string();
        event.timestamp = Utc::now() - Duration::hours(age_hours);
        event
    }

    #[test]
    fn test_extract_references() {
        let mut event = commit("c1", "fix #17 and deadbeef0", 0);
        event.content = Some("relates to PROJ-42".to_string());
        let refs = extract_references(&event);
        assert!(refs.contains("#17"));
        assert!(refs.contains("17"));
        assert!(refs.contains("PROJ-42"));
        assert!(refs.contains("deadbeef0"));
    }

    #[test]
    fn test_extract_components_from_commit_files() {
        let mut event = commit("c1", "refactor", 0);
        event.metadata.insert(
            "files".to_string(),
            json!(["src/parser/lexer.rs", "src/storage/db.rs", "README.md"]),
        );
        let components = extract_components(&event);
        assert!(components.contains("src"));
        assert!(components.contains("parser"));
        assert!(components.contains("storage"));
        assert!(!components.contains("readme.md"));
    }

    #[tokio::test]
    async fn test_commit_resolves_referenced_issue() {
        let inferencer = inferencer();
        inferencer.remember("p1", issue("bug-17", 17, 1));

        let fix = commit("c1", "fix #17 memory leak", 0);
        let relations = inferencer.infer("p1", &fix).await;

        let resolved = relations
            .iter()
            .find(|r| r.relation_type == RelationType::Resolved)
            .expect("resolved relation");
        assert_eq!(resolved.source_event_id, "c1");
        assert_eq!(resolved.target_event_id, "bug-17");
        assert!(resolved.confidence >= 0.8, "was {}", resolved.confidence);
    }

    #[tokio::test]
    async fn test_regression_issue_marks_commit_as_cause() {
        let inferencer = inferencer();
        let mut fix = commit("deadbeef1", "fix #17 memory leak", 24);
        fix.metadata
            .insert("hash".to_string(), json!("deadbeef1"));
        inferencer.remember("p1", fix);

        let mut regression =
            IntegrationEvent::new("jira", EventType::Issue, "regression in leak fix");
        regression.id = "bug-42".to_string();
        regression.content = Some("started after commit deadbeef1 landed".to_string());
        let relations = inferencer.infer("p1", &regression).await;

        let caused = relations
            .iter()
            .find(|r| r.relation_type == RelationType::Caused)
            .expect("caused relation");
        assert_eq!(caused.source_event_id, "deadbeef1");
        assert_eq!(caused.target_event_id, "bug-42");
        assert!(caused.confidence >= 0.7);
    }

    #[tokio::test]
    async fn test_issue_after_commit_is_not_resolved_by_it() {
        let inferencer = inferencer();
        // The issue is in the future relative to the commit
        inferencer.remember("p1", issue("bug-9", 9, 0));
        let fix = commit("c1", "fix things", 5);
        let relations = inferencer.infer("p1", &fix).await;
        assert!(relations
            .iter()
            .all(|r| r.relation_type != RelationType::Resolved));
    }

    #[tokio::test]
    async fn test_candidates_respect_time_window() {
        let inferencer = inferencer();
        let mut old = issue("ancient", 3, 0);
        old.timestamp = Utc::now() - Duration::days(45);
        inferencer.remember("p1", old);

        let fix = commit("c1", "fix #3", 0);
        let relations = inferencer.infer("p1", &fix).await;
        assert!(relations.is_empty());
    }

    #[tokio::test]
    async fn test_projects_are_isolated() {
        let inferencer = inferencer();
        inferencer.remember("p1", issue("bug-5", 5, 1));
        let fix = commit("c1", "fix #5", 0);
        assert!(inferencer.infer("p2", &fix).await.is_empty());
    }

    #[tokio::test]
    async fn test_semantic_relation_above_threshold() {
        let inferencer = inferencer();
        let mut a = issue("a", 1, 1);
        a.embedding = Some(vec![1.0, 0.0]);
        inferencer.remember("p1", a);

        let mut b = IntegrationEvent::new("slack", EventType::Message, "similar topic");
        b.id = "b".to_string();
        b.embedding = Some(vec![0.99, 0.05]);
        let relations = inferencer.infer("p1", &b).await;
        let semantic = relations
            .iter()
            .find(|r| r.relation_type == RelationType::RelatedTo)
            .expect("semantic relation");
        assert!(semantic.confidence >= 0.75);

        // Orthogonal embeddings produce nothing
        let mut c = IntegrationEvent::new("slack", EventType::Message, "unrelated");
        c.id = "c".to_string();
        c.embedding = Some(vec![0.0, 1.0]);
        let relations = inferencer.infer("p1", &c).await;
        assert!(relations
            .iter()
            .all(|r| r.relation_type != RelationType::RelatedTo));
    }

    #[tokio::test]
    async fn test_component_overlap() {
        let inferencer = inferencer();
        let mut a = commit("c-a", "change parser", 1);
        a.metadata
            .insert("files".to_string(), json!(["src/parser/mod.rs"]));
        inferencer.remember("p1", a);

        let mut b = commit("c-b", "more parser work", 0);
        b.metadata
            .insert("files".to_string(), json!(["src/parser/lexer.rs"]));
        let relations = inferencer.infer("p1", &b).await;
        let component = relations
            .iter()
            .find(|r| r.relation_type == RelationType::SameComponent)
            .expect("component relation");
        // Full overlap: 0.6 + 0.3
        assert!((component.confidence - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_same_author_with_burst_boost() {
        let inferencer = inferencer();
        let mut earlier = commit("c-a", "first change", 0);
        earlier.author = Some("Ada".to_string());
        earlier.timestamp = Utc::now() - Duration::minutes(30);
        inferencer.remember("p1", earlier);

        let mut later = commit("c-b", "followup", 0);
        later.author = Some("ada".to_string());
        let relations = inferencer.infer("p1", &later).await;
        let author = relations
            .iter()
            .find(|r| r.relation_type == RelationType::SameAuthor)
            .expect("author relation");
        assert!((author.confidence - 0.95).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_deployment_caused_commit() {
        let inferencer = inferencer();
        let mut c = commit("c1", "ship feature", 2);
        c.metadata
            .insert("hash".to_string(), json!("abc1234def"));
        inferencer.remember("p1", c);

        let mut deploy = IntegrationEvent::new("ci", EventType::Deployment, "deploy v2");
        deploy.id = "d1".to_string();
        deploy
            .metadata
            .insert("commit_hashes".to_string(), json!(["abc1234def", "fff000"]));
        let relations = inferencer.infer("p1", &deploy).await;
        let caused = relations
            .iter()
            .find(|r| r.relation_type == RelationType::Caused)
            .expect("caused relation");
        assert_eq!(caused.target_event_id, "c1");
        assert!((caused.confidence - 0.95).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_llm_blend_promotes_borderline_pair() {
        let config = InferencerConfig::default();
        let inferencer =
            RelationshipInferencer::new(config, Some(Arc::new(FixedLlm("0.9"))));
        // No reference, no resolution verb: rule score stays at 0.5
        inferencer.remember("p1", issue("bug-1", 1, 1));
        let c = commit("c1", "rework allocation strategy", 0);
        let relations = inferencer.infer("p1", &c).await;

        // 0.4 * 0.5 + 0.6 * 0.9 = 0.74 >= 0.7
        let resolved = relations
            .iter()
            .find(|r| r.relation_type == RelationType::Resolved)
            .expect("blended relation");
        assert!((resolved.confidence - 0.74).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_llm_outage_degrades_to_no_relation() {
        let inferencer =
            RelationshipInferencer::new(InferencerConfig::default(), Some(Arc::new(DownLlm)));
        inferencer.remember("p1", issue("bug-1", 1, 1));
        let c = commit("c1", "rework allocation strategy", 0);
        let relations = inferencer.infer("p1", &c).await;
        // 0.4 * 0.5 + 0.6 * 0.0 = 0.2 < threshold
        assert!(relations
            .iter()
            .all(|r| r.relation_type != RelationType::Resolved));
    }

    #[tokio::test]
    async fn test_dedup_keeps_max_confidence() {
        let inferencer = inferencer();
        // The same pair can match by reference (resolved 0.85+) and by causal
        // rule (resolved 1.0); only the strongest survives
        inferencer.remember("p1", issue("bug-17", 17, 1));
        let fix = commit("c1", "fix #17", 0);
        let relations = inferencer.infer("p1", &fix).await;
        let resolved: Vec<_> = relations
            .iter()
            .filter(|r| {
                r.relation_type == RelationType::Resolved && r.target_event_id == "bug-17"
            })
            .collect();
        assert_eq!(resolved.len(), 1);
    }

    #[test]
    fn test_window_centroid() {
        let inferencer = inferencer();
        let mut a = issue("a", 1, 1);
        a.embedding = Some(vec![1.0, 0.0]);
        let mut b = issue("b", 2, 2);
        b.embedding = Some(vec![0.0, 1.0]);
        inferencer.remember("p1", a);
        inferencer.remember("p1", b);
        let centroid = inferencer.window_centroid("p1").unwrap();
        assert_eq!(centroid, vec![0.5, 0.5]);
        assert!(inferencer.window_centroid("p2").is_none());
    }

    // ------------------------------------------------------------------
    // Bug history
    // ------------------------------------------------------------------

    fn event_entity(
        graph: &GraphStore,
        id: &str,
        event_type: &str,
        title: &str,
        timestamp: DateTime<Utc>,
    ) {
        let mut entity = GraphEntity::new(id, "event", "p1");
        entity.timestamp = timestamp;
        entity.properties.insert("title".to_string(), json!(title));
        entity
            .properties
            .insert("event_type".to_string(), json!(event_type));
        entity
            .properties
            .insert("timestamp".to_string(), json!(timestamp.to_rfc3339()));
        graph.upsert_entity(entity).unwrap();
    }

    fn link(graph: &GraphStore, from: &str, to: &str, kind: &str, strength: f64) {
        graph
            .add_relationship(GraphRelationship {
                from_id: from.to_string(),
                to_id: to.to_string(),
                relationship_type: kind.to_string(),
                properties: Map::new(),
                project_id: "p1".to_string(),
                timestamp: Utc::now(),
                strength,
            })
            .unwrap();
    }

    #[test]
    fn test_bug_history_fixes_and_regression() {
        let graph = GraphStore::new();
        let t0 = Utc::now() - Duration::days(10);
        event_entity(&graph, "bug-17", "issue", "memory leak", t0);
        event_entity(&graph, "c1", "commit", "fix #17 memory leak", t0 + Duration::hours(1));
        event_entity(
            &graph,
            "bug-42",
            "issue",
            "regression in leak fix",
            t0 + Duration::days(5),
        );
        link(&graph, "c1", "bug-17", "resolved", 0.9);
        link(&graph, "c1", "bug-42", "caused", 0.8);

        let history = bug_history(&graph, "p1", "bug-17").unwrap().unwrap();
        assert_eq!(history.state, BugState::Regression);
        assert_eq!(history.fixes.len(), 1);
        assert_eq!(history.fixes[0].id, "c1");
        assert_eq!(history.fixes[0].caused_bugs.len(), 1);
        assert_eq!(history.fixes[0].caused_bugs[0].id, "bug-42");
    }

    #[test]
    fn test_bug_history_states() {
        let graph = GraphStore::new();
        let t0 = Utc::now() - Duration::days(3);
        event_entity(&graph, "bug-1", "issue", "broken build", t0);
        let open = bug_history(&graph, "p1", "bug-1").unwrap().unwrap();
        assert_eq!(open.state, BugState::Open);

        event_entity(&graph, "c9", "commit", "fix the build", t0 + Duration::hours(2));
        link(&graph, "c9", "bug-1", "resolved", 0.85);
        let resolved = bug_history(&graph, "p1", "bug-1").unwrap().unwrap();
        assert_eq!(resolved.state, BugState::Resolved);

        assert!(bug_history(&graph, "p1", "nope").unwrap().is_none());
    }
}
