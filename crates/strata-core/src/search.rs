//! Semantic search - code-intent, cross-source and contextual queries
//!
//! All three modes ride on the vector index and the graph store. Failures
//! never propagate: a search that cannot complete returns an empty response
//! with its timing populated. Every search is recorded in a bounded
//! per-project history ring for future learning.

use std::collections::{HashMap, HashSet, VecDeque};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::graph::GraphStore;
use crate::oracle::Embedder;
use crate::scoring::ImportanceLevel;
use crate::vector::VectorIndex;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Per-project search history ring size
pub const SEARCH_HISTORY_LIMIT: usize = 100;

/// Query-embedding cache capacity
const QUERY_CACHE_CAPACITY: usize = 100;

/// Data types treated as code for code search
const CODE_DATA_TYPES: &[&str] = &["commit", "pull_request", "code_review"];

/// Intent lexicon for code searches
pub const CODE_INTENTS: &[(&str, &[&str])] = &[
    (
        "authentication",
        &["auth", "login", "signin", "verify", "token", "jwt", "session"],
    ),
    (
        "database",
        &["query", "select", "insert", "update", "delete", "sql", "orm", "model"],
    ),
    (
        "api",
        &["endpoint", "route", "request", "response", "rest", "graphql", "handler"],
    ),
    (
        "security",
        &["encrypt", "decrypt", "hash", "secure", "validate", "sanitize", "csrf"],
    ),
    (
        "performance",
        &["optimize", "cache", "async", "parallel", "benchmark", "profile"],
    ),
    (
        "error_handling",
        &["try", "catch", "exception", "error", "throw", "raise", "handle"],
    ),
    (
        "testing",
        &["test", "mock", "assert", "spec", "unit", "integration", "e2e"],
    ),
    (
        "ui",
        &["component", "render", "state", "props", "event", "click", "form", "input"],
    ),
];

// ============================================================================
// TYPES
// ============================================================================

/// Search mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    /// Search code by intent and functionality
    CodeSemantic,
    /// Search across every data source
    CrossSource,
    /// Context-aware search with proactive suggestions
    Contextual,
}

/// One search hit
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    /// Document id (timeline entry id)
    pub id: String,
    /// Data type of the underlying event
    pub content_type: String,
    /// Title
    pub title: String,
    /// Matched text
    pub content: String,
    /// Final relevance after re-ranking
    pub relevance_score: f64,
    /// Importance score carried from scoring
    pub importance_score: f64,
    /// Importance level, when known
    pub importance_level: Option<ImportanceLevel>,
    /// Timeline category, when known
    pub timeline_category: Option<String>,
    /// Source fields (source tag, event id, url)
    pub source_info: Map<String, Value>,
}

/// Complete search response
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    /// The original query
    pub query: String,
    /// Mode that produced this response
    pub search_type: SearchType,
    /// Number of results returned
    pub total_results: usize,
    /// Ranked hits
    pub results: Vec<SearchResult>,
    /// Wall time spent
    pub search_time_ms: u64,
    /// Follow-up suggestions
    pub suggestions: Vec<String>,
    /// Related query strings
    pub related_queries: Vec<String>,
    /// Facet counts keyed by facet name then bucket
    pub facets: HashMap<String, HashMap<String, usize>>,
    /// Mode-specific insight fields
    pub context_insights: Map<String, Value>,
    /// Unique id for this search
    pub search_id: String,
}

impl SearchResponse {
    fn empty(query: &str, search_type: SearchType, started: Instant) -> Self {
        Self {
            query: query.to_string(),
            search_type,
            total_results: 0,
            results: Vec::new(),
            search_time_ms: started.elapsed().as_millis() as u64,
            suggestions: Vec::new(),
            related_queries: Vec::new(),
            facets: HashMap::new(),
            context_insights: Map::new(),
            search_id: Uuid::new_v4().to_string(),
        }
    }
}

/// Caller context for contextual search
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserContext {
    /// The user's role label
    pub role: Option<String>,
    /// File currently open in their editor
    pub current_file: Option<String>,
    /// Recent activity descriptions
    #[serde(default)]
    pub recent_activity: Vec<String>,
}

/// A recorded search, for learning
#[derive(Debug, Clone, Serialize)]
pub struct SearchRecord {
    /// Search id
    pub search_id: String,
    /// Query text
    pub query: String,
    /// Mode
    pub search_type: SearchType,
    /// Results returned
    pub result_count: usize,
    /// When it ran
    pub at: DateTime<Utc>,
}

/// Search configuration
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Default maximum results
    pub max_results: usize,
    /// Weight of importance in re-ranking
    pub importance_boost: f64,
    /// Weight of recency in re-ranking
    pub recency_boost: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: 50,
            importance_boost: 0.2,
            recency_boost: 0.1,
        }
    }
}

// ============================================================================
// SEARCH ENGINE
// ============================================================================

/// The semantic search engine
pub struct SemanticSearch {
    vector: Arc<VectorIndex>,
    graph: Arc<GraphStore>,
    embedder: Option<Arc<dyn Embedder>>,
    config: SearchConfig,
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
    history: Mutex<HashMap<String, VecDeque<SearchRecord>>>,
}

impl SemanticSearch {
    /// Assemble the engine over its stores
    pub fn new(
        vector: Arc<VectorIndex>,
        graph: Arc<GraphStore>,
        embedder: Option<Arc<dyn Embedder>>,
        config: SearchConfig,
    ) -> Self {
        let capacity = NonZeroUsize::new(QUERY_CACHE_CAPACITY).expect("capacity is non-zero");
        Self {
            vector,
            graph,
            embedder,
            config,
            query_cache: Mutex::new(LruCache::new(capacity)),
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Code search: intent-aware retrieval over code-bearing events
    pub async fn code_search(
        &self,
        project_id: &str,
        query: &str,
        language: Option<&str>,
        importance_threshold: f64,
        limit: usize,
    ) -> SearchResponse {
        let started = Instant::now();
        let search_type = SearchType::CodeSemantic;

        let intent = analyze_intent(query);
        let enhanced = enhance_query(query, &intent);
        let Some(vector) = self.query_vector(&enhanced).await else {
            return self.finish(
                project_id,
                SearchResponse::empty(query, search_type, started),
            );
        };

        let hits = self.project_hits(project_id, &vector, limit * 4);

        let query_terms = term_set(query);
        let mut results: Vec<SearchResult> = hits
            .into_iter()
            .filter(|hit| {
                hit.1
                    .get("data_type")
                    .and_then(Value::as_str)
                    .map(|t| CODE_DATA_TYPES.contains(&t))
                    .unwrap_or(false)
            })
            .filter(|hit| match language {
                Some(language) => {
                    hit.1.get("language").and_then(Value::as_str) == Some(language)
                }
                None => true,
            })
            .map(|(score, metadata)| {
                self.rank_hit(score, metadata, &query_terms, Some(&intent))
            })
            .filter(|result| result.importance_score >= importance_threshold)
            .collect();

        results.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit.min(self.config.max_results));

        let mut response = SearchResponse {
            total_results: results.len(),
            facets: build_facets(&results),
            suggestions: vec![
                "Try searching for similar functions".to_string(),
                "Look for related changes in the same component".to_string(),
            ],
            related_queries: vec![
                format!("tests for {query}"),
                format!("documentation about {query}"),
                format!("examples of {query}"),
            ],
            results,
            ..SearchResponse::empty(query, search_type, started)
        };
        response
            .context_insights
            .insert("primary_intent".to_string(), json!(intent.primary));
        response.context_insights.insert(
            "intent_scores".to_string(),
            json!(intent.scores.iter().cloned().collect::<HashMap<_, _>>()),
        );
        self.finish(project_id, response)
    }

    /// Cross-source search: vector index and graph queried together, merged
    /// by id keeping the higher score
    pub async fn cross_source_search(
        &self,
        project_id: &str,
        query: &str,
        content_types: &[String],
        min_importance: f64,
        limit: usize,
    ) -> SearchResponse {
        let started = Instant::now();
        let search_type = SearchType::CrossSource;

        let Some(vector) = self.query_vector(query).await else {
            return self.finish(
                project_id,
                SearchResponse::empty(query, search_type, started),
            );
        };

        let vector_hits = self.project_hits(project_id, &vector, limit * 4);
        let graph_hits = self
            .graph
            .search_by_vector(project_id, &vector, limit * 2)
            .unwrap_or_default();

        // Merge by id, keeping the higher score
        let mut merged: HashMap<String, (f32, Map<String, Value>)> = HashMap::new();
        for (score, metadata) in vector_hits {
            let id = metadata
                .get("timeline_entry_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            match merged.get(&id) {
                Some((existing, _)) if *existing >= score => {}
                _ => {
                    merged.insert(id, (score, metadata));
                }
            }
        }
        for (entity, score) in graph_hits {
            let id = entity
                .properties
                .get("entry_id")
                .and_then(Value::as_str)
                .unwrap_or(&entity.id)
                .to_string();
            match merged.get(&id) {
                Some((existing, _)) if *existing >= score => {}
                _ => {
                    let mut metadata = entity.properties.clone();
                    metadata.insert("event_id".to_string(), json!(entity.id));
                    metadata
                        .entry("data_type".to_string())
                        .or_insert_with(|| {
                            metadata_event_type(&entity.properties)
                        });
                    merged.insert(id, (score, metadata));
                }
            }
        }

        let query_terms = term_set(query);
        let mut results: Vec<SearchResult> = merged
            .into_values()
            .filter(|(_, metadata)| {
                content_types.is_empty()
                    || metadata
                        .get("data_type")
                        .and_then(Value::as_str)
                        .map(|t| content_types.iter().any(|c| c == t))
                        .unwrap_or(false)
            })
            .map(|(score, metadata)| self.rank_hit(score, metadata, &query_terms, None))
            .filter(|result| result.importance_score >= min_importance)
            .collect();
        results.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit.min(self.config.max_results));

        let response = SearchResponse {
            total_results: results.len(),
            facets: build_facets(&results),
            related_queries: vec![format!("{query} decisions"), format!("{query} issues")],
            results,
            ..SearchResponse::empty(query, search_type, started)
        };
        self.finish(project_id, response)
    }

    /// Contextual search: the query is enhanced with the caller's context and
    /// proactive suggestions come from the current file's neighborhood
    pub async fn contextual_search(
        &self,
        project_id: &str,
        query: &str,
        user_context: &UserContext,
        limit: usize,
    ) -> SearchResponse {
        let started = Instant::now();
        let search_type = SearchType::Contextual;

        let mut enhanced = query.to_string();
        if let Some(role) = &user_context.role {
            enhanced.push(' ');
            enhanced.push_str(role);
        }
        if let Some(file) = &user_context.current_file {
            enhanced.push(' ');
            enhanced.push_str(file);
        }

        let Some(vector) = self.query_vector(&enhanced).await else {
            return self.finish(
                project_id,
                SearchResponse::empty(query, search_type, started),
            );
        };
        let hits = self.project_hits(project_id, &vector, limit * 4);

        let query_terms = term_set(query);
        let context_terms: HashSet<String> = user_context
            .recent_activity
            .iter()
            .flat_map(|activity| term_set(activity))
            .collect();

        let mut results: Vec<SearchResult> = hits
            .into_iter()
            .map(|(score, metadata)| {
                let mut result = self.rank_hit(score, metadata, &query_terms, None);
                // Proximity to what the user is doing right now
                let text_terms = term_set(&result.content);
                if !context_terms.is_empty() {
                    let overlap = text_terms.intersection(&context_terms).count() as f64
                        / context_terms.len() as f64;
                    result.relevance_score += overlap * 0.1;
                }
                if let Some(file) = &user_context.current_file {
                    if result.content.contains(file.as_str()) {
                        result.relevance_score += 0.1;
                    }
                }
                result
            })
            .collect();
        results.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit.min(self.config.max_results));

        let suggestions = self.proactive_suggestions(project_id, user_context).await;
        let mut response = SearchResponse {
            total_results: results.len(),
            facets: build_facets(&results),
            suggestions,
            results,
            ..SearchResponse::empty(query, search_type, started)
        };
        if let Some(file) = &user_context.current_file {
            response
                .context_insights
                .insert("current_file".to_string(), json!(file));
        }
        self.finish(project_id, response)
    }

    /// Recorded searches for a project, newest last
    pub fn history(&self, project_id: &str) -> Vec<SearchRecord> {
        self.history
            .lock()
            .ok()
            .and_then(|history| history.get(project_id).map(|ring| ring.iter().cloned().collect()))
            .unwrap_or_default()
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    /// Embed a query, via the cache
    async fn query_vector(&self, query: &str) -> Option<Vec<f32>> {
        if let Ok(mut cache) = self.query_cache.lock() {
            if let Some(vector) = cache.get(query) {
                return Some(vector.clone());
            }
        }
        let embedder = self.embedder.as_ref()?;
        match embedder.embed(query).await {
            Ok(vector) => {
                if let Ok(mut cache) = self.query_cache.lock() {
                    cache.put(query.to_string(), vector.clone());
                }
                Some(vector)
            }
            Err(e) => {
                tracing::warn!("query embedding unavailable: {}", e);
                None
            }
        }
    }

    /// Project-scoped vector hits; failures log and read as no hits
    fn project_hits(
        &self,
        project_id: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Vec<(f32, Map<String, Value>)> {
        let mut filter = Map::new();
        filter.insert("project_id".to_string(), json!(project_id));
        match self.vector.query(vector, top_k, &filter) {
            Ok(hits) => hits
                .into_iter()
                .map(|hit| {
                    let mut metadata = hit.metadata;
                    metadata.insert("timeline_entry_id".to_string(), json!(hit.id));
                    (hit.score, metadata)
                })
                .collect(),
            Err(e) => {
                tracing::warn!("vector search failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Re-rank one hit:
    /// `0.4*vector + 0.3*term_overlap + 0.2*intent + importance + recency`
    fn rank_hit(
        &self,
        vector_score: f32,
        metadata: Map<String, Value>,
        query_terms: &HashSet<String>,
        intent: Option<&IntentAnalysis>,
    ) -> SearchResult {
        let content = metadata
            .get("text")
            .or_else(|| metadata.get("title"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let content_terms = term_set(&content);

        let term_overlap = if query_terms.is_empty() {
            0.0
        } else {
            query_terms.intersection(&content_terms).count() as f64 / query_terms.len() as f64
        };

        let intent_score = intent
            .map(|intent| intent.match_score(&content.to_lowercase()))
            .unwrap_or(0.0);

        let importance_score = metadata
            .get("importance_score")
            .and_then(Value::as_f64)
            .unwrap_or(0.5);

        let recency = metadata
            .get("created_at")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|created| {
                let days_old = (Utc::now() - created.with_timezone(&Utc)).num_days();
                ((30 - days_old).max(0) as f64) / 30.0
            })
            .unwrap_or(0.0);

        let relevance = f64::from(vector_score) * 0.4
            + term_overlap * 0.3
            + intent_score * 0.2
            + importance_score * self.config.importance_boost
            + recency * self.config.recency_boost;

        let mut source_info = Map::new();
        for key in ["source", "event_id", "url"] {
            if let Some(value) = metadata.get(key) {
                source_info.insert(key.to_string(), value.clone());
            }
        }

        SearchResult {
            id: metadata
                .get("timeline_entry_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            content_type: metadata
                .get("data_type")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            title: metadata
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            content,
            relevance_score: relevance,
            importance_score,
            importance_level: metadata
                .get("importance_level")
                .and_then(Value::as_str)
                .and_then(ImportanceLevel::parse_name),
            timeline_category: metadata
                .get("timeline_category")
                .and_then(Value::as_str)
                .map(str::to_string),
            source_info,
        }
    }

    /// Suggestions from the neighborhood of what the user has open
    async fn proactive_suggestions(
        &self,
        project_id: &str,
        user_context: &UserContext,
    ) -> Vec<String> {
        let Some(file) = &user_context.current_file else {
            return Vec::new();
        };
        let Some(vector) = self.query_vector(file).await else {
            return Vec::new();
        };
        let mut filter = Map::new();
        filter.insert("project_id".to_string(), json!(project_id));
        let Ok(hits) = self.vector.query(&vector, 3, &filter) else {
            return Vec::new();
        };
        hits.into_iter()
            .filter_map(|hit| {
                hit.metadata
                    .get("title")
                    .and_then(Value::as_str)
                    .map(|title| format!("Related to your current file: {title}"))
            })
            .collect()
    }

    fn finish(&self, project_id: &str, response: SearchResponse) -> SearchResponse {
        if let Ok(mut history) = self.history.lock() {
            let ring = history.entry(project_id.to_string()).or_default();
            ring.push_back(SearchRecord {
                search_id: response.search_id.clone(),
                query: response.query.clone(),
                search_type: response.search_type,
                result_count: response.total_results,
                at: Utc::now(),
            });
            while ring.len() > SEARCH_HISTORY_LIMIT {
                ring.pop_front();
            }
        }
        response
    }
}

// ============================================================================
// INTENT ANALYSIS
// ============================================================================

struct IntentAnalysis {
    primary: String,
    scores: Vec<(String, f64)>,
}

impl IntentAnalysis {
    fn match_score(&self, content: &str) -> f64 {
        let Some(keywords) = CODE_INTENTS
            .iter()
            .find(|(name, _)| *name == self.primary)
            .map(|(_, keywords)| keywords)
        else {
            return 0.0;
        };
        let hits = keywords.iter().filter(|k| content.contains(*k)).count();
        hits as f64 / keywords.len() as f64
    }
}

fn analyze_intent(query: &str) -> IntentAnalysis {
    let query_lower = query.to_lowercase();
    let mut scores: Vec<(String, f64)> = CODE_INTENTS
        .iter()
        .filter_map(|(name, keywords)| {
            let hits = keywords.iter().filter(|k| query_lower.contains(*k)).count();
            (hits > 0).then(|| (name.to_string(), hits as f64 / keywords.len() as f64))
        })
        .collect();
    scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let primary = scores
        .first()
        .map(|(name, _)| name.clone())
        .unwrap_or_else(|| "general".to_string());
    IntentAnalysis { primary, scores }
}

fn enhance_query(query: &str, intent: &IntentAnalysis) -> String {
    let mut enhanced = query.to_string();
    if let Some((_, keywords)) = CODE_INTENTS.iter().find(|(name, _)| *name == intent.primary) {
        for keyword in keywords.iter().take(3) {
            enhanced.push(' ');
            enhanced.push_str(keyword);
        }
    }
    enhanced
}

fn term_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(str::to_string)
        .collect()
}

fn build_facets(results: &[SearchResult]) -> HashMap<String, HashMap<String, usize>> {
    let mut facets: HashMap<String, HashMap<String, usize>> = HashMap::new();
    for result in results {
        *facets
            .entry("content_type".to_string())
            .or_default()
            .entry(result.content_type.clone())
            .or_default() += 1;
        if let Some(level) = result.importance_level {
            *facets
                .entry("importance_level".to_string())
                .or_default()
                .entry(level.as_str().to_string())
                .or_default() += 1;
        }
        if let Some(category) = &result.timeline_category {
            *facets
                .entry("timeline_category".to_string())
                .or_default()
                .entry(category.clone())
                .or_default() += 1;
        }
    }
    facets
}

fn metadata_event_type(properties: &Map<String, Value>) -> Value {
    properties
        .get("event_type")
        .cloned()
        .unwrap_or_else(|| json!("unknown"))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::Result as OracleResult;
    use crate::vector::VectorDoc;
    use async_trait::async_trait;

    /// Embeds along two fixed axes so tests control similarity
    struct AxisEmbedder;

    #[async_trait]
    impl Embedder for AxisEmbedder {
        async fn embed(&self, text: &str) -> OracleResult<Vec<f32>> {
            if text.contains("auth") || text.contains("login") {
                Ok(vec![1.0, 0.0])
            } else {
                Ok(vec![0.0, 1.0])
            }
        }

        fn dimensions(&self) -> usize {
            2
        }
    }

    fn doc(
        id: &str,
        vector: Vec<f32>,
        data_type: &str,
        title: &str,
        text: &str,
        importance: f64,
    ) -> VectorDoc {
        let mut metadata = Map::new();
        metadata.insert("project_id".to_string(), json!("p1"));
        metadata.insert("data_type".to_string(), json!(data_type));
        metadata.insert("title".to_string(), json!(title));
        metadata.insert("text".to_string(), json!(text));
        metadata.insert("importance_score".to_string(), json!(importance));
        metadata.insert("importance_level".to_string(), json!("high"));
        metadata.insert("timeline_category".to_string(), json!("recent"));
        metadata.insert("created_at".to_string(), json!(Utc::now().to_rfc3339()));
        metadata.insert("event_id".to_string(), json!(format!("evt-{id}")));
        metadata.insert("source".to_string(), json!("github"));
        VectorDoc {
            id: Some(id.to_string()),
            vector,
            metadata,
        }
    }

    fn engine() -> SemanticSearch {
        let vector = Arc::new(VectorIndex::new());
        vector
            .upsert(vec![
                doc(
                    "a",
                    vec![1.0, 0.0],
                    "commit",
                    "add login token validation",
                    "auth token session verify login",
                    0.8,
                ),
                doc(
                    "b",
                    vec![0.9, 0.1],
                    "commit",
                    "refactor session cache",
                    "auth session cache",
                    0.2,
                ),
                doc(
                    "c",
                    vec![0.0, 1.0],
                    "message",
                    "lunch plans",
                    "where do we eat",
                    0.5,
                ),
            ])
            .unwrap();
        SemanticSearch::new(
            vector,
            Arc::new(GraphStore::new()),
            Some(Arc::new(AxisEmbedder)),
            SearchConfig::default(),
        )
    }

    #[test]
    fn test_intent_analysis() {
        let intent = analyze_intent("how does login auth work");
        assert_eq!(intent.primary, "authentication");
        let general = analyze_intent("what happened yesterday");
        assert_eq!(general.primary, "general");
    }

    #[tokio::test]
    async fn test_code_search_restricts_to_code_and_ranks() {
        let engine = engine();
        let response = engine
            .code_search("p1", "login auth token", None, 0.0, 10)
            .await;
        assert_eq!(response.search_type, SearchType::CodeSemantic);
        // The chat message never appears in a code search
        assert!(response.results.iter().all(|r| r.content_type == "commit"));
        // The auth-heavy commit outranks the low-importance one
        assert_eq!(response.results[0].id, "a");
        assert_eq!(
            response.context_insights["primary_intent"],
            json!("authentication")
        );
        assert!(!response.facets.is_empty());
    }

    #[tokio::test]
    async fn test_code_search_importance_threshold() {
        let engine = engine();
        let response = engine
            .code_search("p1", "login auth token", None, 0.5, 10)
            .await;
        assert!(response.results.iter().all(|r| r.importance_score >= 0.5));
    }

    #[tokio::test]
    async fn test_cross_source_merges_and_facets() {
        let engine = engine();
        let response = engine
            .cross_source_search("p1", "login auth", &[], 0.0, 10)
            .await;
        assert!(response.total_results >= 2);
        assert!(response.facets.contains_key("content_type"));

        // Content-type filter narrows the set
        let only_messages = engine
            .cross_source_search("p1", "lunch", &["message".to_string()], 0.0, 10)
            .await;
        assert!(only_messages
            .results
            .iter()
            .all(|r| r.content_type == "message"));
    }

    #[tokio::test]
    async fn test_contextual_search_uses_context() {
        let engine = engine();
        let context = UserContext {
            role: Some("developer".to_string()),
            current_file: Some("auth".to_string()),
            recent_activity: vec!["reviewing login flow".to_string()],
        };
        let response = engine.contextual_search("p1", "token", &context, 10).await;
        assert_eq!(response.search_type, SearchType::Contextual);
        assert!(!response.suggestions.is_empty());
        assert_eq!(response.context_insights["current_file"], json!("auth"));
    }

    #[tokio::test]
    async fn test_no_embedder_returns_empty_with_timing() {
        let engine = SemanticSearch::new(
            Arc::new(VectorIndex::new()),
            Arc::new(GraphStore::new()),
            None,
            SearchConfig::default(),
        );
        let response = engine.code_search("p1", "anything", None, 0.0, 10).await;
        assert_eq!(response.total_results, 0);
        assert!(response.results.is_empty());
        // Timing is always populated, even on failure
        assert!(response.search_time_ms < 10_000);
    }

    #[tokio::test]
    async fn test_history_ring_is_bounded() {
        let engine = engine();
        for i in 0..(SEARCH_HISTORY_LIMIT + 5) {
            engine
                .cross_source_search("p1", &format!("query {i}"), &[], 0.0, 1)
                .await;
        }
        let history = engine.history("p1");
        assert_eq!(history.len(), SEARCH_HISTORY_LIMIT);
        // Oldest entries fell off the front
        assert!(history[0].query.contains("query 5"));
    }
}
