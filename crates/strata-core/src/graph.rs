//! Graph store - typed entities and relationships scoped by project
//!
//! Entities are projections of timeline entries (rebuildable); relationships
//! carry the inferred relation type and confidence as edge strength. Cross
//! project edges are rejected at insertion and no sequence of operations
//! leaves a dangling relationship behind.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::embedding::cosine_similarity;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Graph store error type
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum GraphError {
    /// Relationship endpoint does not exist in the project
    #[error("entity {0} not found in project {1}")]
    EntityNotFound(String, String),
    /// Relationship endpoints live in different projects
    #[error("cross-project relationship rejected: {0} -> {1}")]
    CrossProject(String, String),
    /// Internal lock poisoned
    #[error("graph store lock poisoned")]
    Poisoned,
}

/// Graph result type
pub type Result<T> = std::result::Result<T, GraphError>;

// ============================================================================
// GRAPH TYPES
// ============================================================================

/// A typed entity in the project graph
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEntity {
    /// Entity identifier, unique within the project
    pub id: String,
    /// Entity classification ("event", "person", "component", ...)
    pub entity_type: String,
    /// Owning project
    pub project_id: String,
    /// Open property map; upserts replace prior values wholesale
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// Entity timestamp (event occurrence time for event entities)
    pub timestamp: DateTime<Utc>,
    /// Optional per-entity embedding for vector-similar lookup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl GraphEntity {
    /// Create an entity
    pub fn new(
        id: impl Into<String>,
        entity_type: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            entity_type: entity_type.into(),
            project_id: project_id.into(),
            properties: Map::new(),
            timestamp: Utc::now(),
            embedding: None,
        }
    }
}

/// A directed, typed edge between two entities
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphRelationship {
    /// Source entity id
    pub from_id: String,
    /// Target entity id
    pub to_id: String,
    /// Relationship classification
    pub relationship_type: String,
    /// Edge properties (inference evidence)
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// Owning project
    pub project_id: String,
    /// When the edge was recorded
    pub timestamp: DateTime<Utc>,
    /// Edge strength / inference confidence (0.0 to 1.0)
    pub strength: f64,
}

/// A traversal hit from [`GraphStore::find_related`]
#[derive(Debug, Clone)]
pub struct RelatedEntity {
    /// The reached entity
    pub entity: GraphEntity,
    /// Hops from the start entity (1 = direct neighbor)
    pub depth: usize,
    /// Mean of edge strengths along the discovered path
    pub path_strength: f64,
}

/// Per-project graph statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphStats {
    /// Entities in the project
    pub entity_count: usize,
    /// Relationships in the project
    pub relationship_count: usize,
    /// Entity counts by type
    pub entities_by_type: HashMap<String, usize>,
}

#[derive(Default)]
struct ProjectGraph {
    entities: HashMap<String, GraphEntity>,
    relationships: Vec<GraphRelationship>,
}

// ============================================================================
// GRAPH STORE
// ============================================================================

/// In-memory project-scoped property graph
///
/// All methods take `&self`; interior locking keeps the store `Send + Sync`.
pub struct GraphStore {
    projects: Mutex<HashMap<String, ProjectGraph>>,
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            projects: Mutex::new(HashMap::new()),
        }
    }

    fn with_projects<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, ProjectGraph>) -> T,
    ) -> Result<T> {
        let mut projects = self.projects.lock().map_err(|_| GraphError::Poisoned)?;
        Ok(f(&mut projects))
    }

    /// Insert or merge an entity by `(project_id, id)`
    ///
    /// Properties replace prior values; a missing embedding on the new copy
    /// keeps the stored one.
    pub fn upsert_entity(&self, entity: GraphEntity) -> Result<()> {
        self.with_projects(|projects| {
            let graph = projects.entry(entity.project_id.clone()).or_default();
            match graph.entities.get_mut(&entity.id) {
                Some(existing) => {
                    existing.entity_type = entity.entity_type;
                    existing.properties = entity.properties;
                    existing.timestamp = entity.timestamp;
                    if entity.embedding.is_some() {
                        existing.embedding = entity.embedding;
                    }
                }
                None => {
                    graph.entities.insert(entity.id.clone(), entity);
                }
            }
        })
    }

    /// Batched entity upsert
    pub fn upsert_entities_batch(&self, entities: Vec<GraphEntity>) -> Result<usize> {
        let count = entities.len();
        for entity in entities {
            self.upsert_entity(entity)?;
        }
        Ok(count)
    }

    /// Add a relationship; both endpoints must already exist in the project
    ///
    /// An endpoint that resolves in a different project rejects the edge as
    /// cross-project. A duplicate `(from, to, type)` keeps whichever copy
    /// has the higher strength.
    pub fn add_relationship(&self, relationship: GraphRelationship) -> Result<()> {
        self.with_projects(|projects| {
            for entity_id in [&relationship.from_id, &relationship.to_id] {
                let in_project = projects
                    .get(&relationship.project_id)
                    .is_some_and(|graph| graph.entities.contains_key(entity_id.as_str()));
                if in_project {
                    continue;
                }
                let in_other_project = projects.iter().any(|(project_id, graph)| {
                    project_id != &relationship.project_id
                        && graph.entities.contains_key(entity_id.as_str())
                });
                return Err(if in_other_project {
                    GraphError::CrossProject(
                        relationship.from_id.clone(),
                        relationship.to_id.clone(),
                    )
                } else {
                    GraphError::EntityNotFound(
                        entity_id.to_string(),
                        relationship.project_id.clone(),
                    )
                });
            }

            let graph = projects
                .entry(relationship.project_id.clone())
                .or_default();
            if let Some(existing) = graph.relationships.iter_mut().find(|r| {
                r.from_id == relationship.from_id
                    && r.to_id == relationship.to_id
                    && r.relationship_type == relationship.relationship_type
            }) {
                if relationship.strength > existing.strength {
                    *existing = relationship;
                }
            } else {
                graph.relationships.push(relationship);
            }
            Ok(())
        })?
    }

    /// Batched relationship insert; returns how many were accepted
    ///
    /// Rejections (missing endpoints) are logged and skipped so one bad edge
    /// does not sink the batch.
    pub fn add_relationships_batch(&self, relationships: Vec<GraphRelationship>) -> Result<usize> {
        let mut accepted = 0;
        for relationship in relationships {
            match self.add_relationship(relationship) {
                Ok(()) => accepted += 1,
                Err(GraphError::Poisoned) => return Err(GraphError::Poisoned),
                Err(e) => tracing::warn!("skipping relationship: {}", e),
            }
        }
        Ok(accepted)
    }

    /// Fetch an entity
    pub fn get_entity(&self, project_id: &str, entity_id: &str) -> Result<Option<GraphEntity>> {
        self.with_projects(|projects| {
            projects
                .get(project_id)
                .and_then(|graph| graph.entities.get(entity_id).cloned())
        })
    }

    /// Every relationship touching an entity, optionally filtered by type
    pub fn get_relationships(
        &self,
        project_id: &str,
        entity_id: &str,
        relationship_type: Option<&str>,
    ) -> Result<Vec<GraphRelationship>> {
        self.with_projects(|projects| {
            projects
                .get(project_id)
                .map(|graph| {
                    graph
                        .relationships
                        .iter()
                        .filter(|r| r.from_id == entity_id || r.to_id == entity_id)
                        .filter(|r| {
                            relationship_type
                                .map(|t| r.relationship_type == t)
                                .unwrap_or(true)
                        })
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        })
    }

    /// Bounded BFS traversal from an entity
    ///
    /// Follows edges in either direction whose type is in `types` (empty =
    /// any) and whose strength is at least `min_strength`. Cycles are handled
    /// with a visited set; results carry hop depth and the mean strength of
    /// the path that first reached them.
    pub fn find_related(
        &self,
        project_id: &str,
        entity_id: &str,
        types: &[String],
        max_depth: usize,
        min_strength: f64,
    ) -> Result<Vec<RelatedEntity>> {
        self.with_projects(|projects| {
            let Some(graph) = projects.get(project_id) else {
                return Vec::new();
            };
            if !graph.entities.contains_key(entity_id) {
                return Vec::new();
            }

            let mut visited: HashSet<&str> = HashSet::new();
            visited.insert(entity_id);
            // (entity, depth, summed strength along path)
            let mut queue: VecDeque<(&str, usize, f64)> = VecDeque::new();
            queue.push_back((entity_id, 0, 0.0));
            let mut results = Vec::new();

            while let Some((current, depth, strength_sum)) = queue.pop_front() {
                if depth >= max_depth {
                    continue;
                }
                for edge in &graph.relationships {
                    let neighbor = if edge.from_id == current {
                        edge.to_id.as_str()
                    } else if edge.to_id == current {
                        edge.from_id.as_str()
                    } else {
                        continue;
                    };
                    if edge.strength < min_strength {
                        continue;
                    }
                    if !types.is_empty()
                        && !types.iter().any(|t| t == &edge.relationship_type)
                    {
                        continue;
                    }
                    if visited.contains(neighbor) {
                        continue;
                    }
                    visited.insert(neighbor);
                    let next_depth = depth + 1;
                    let next_sum = strength_sum + edge.strength;
                    if let Some(entity) = graph.entities.get(neighbor) {
                        results.push(RelatedEntity {
                            entity: entity.clone(),
                            depth: next_depth,
                            path_strength: next_sum / next_depth as f64,
                        });
                    }
                    queue.push_back((neighbor, next_depth, next_sum));
                }
            }
            results
        })
    }

    /// Cosine-similar entities by stored embedding
    ///
    /// Equivalent contract to the vector index query: score descending, ties
    /// by id ascending.
    pub fn search_by_vector(
        &self,
        project_id: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<(GraphEntity, f32)>> {
        self.with_projects(|projects| {
            let Some(graph) = projects.get(project_id) else {
                return Vec::new();
            };
            let mut scored: Vec<(GraphEntity, f32)> = graph
                .entities
                .values()
                .filter_map(|entity| {
                    entity
                        .embedding
                        .as_ref()
                        .map(|emb| (entity.clone(), cosine_similarity(vector, emb)))
                })
                .collect();
            scored.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0.id.cmp(&b.0.id))
            });
            scored.truncate(top_k);
            scored
        })
    }

    /// Delete an entity together with every edge touching it
    pub fn delete_entity(&self, project_id: &str, entity_id: &str) -> Result<bool> {
        self.with_projects(|projects| {
            let Some(graph) = projects.get_mut(project_id) else {
                return false;
            };
            graph
                .relationships
                .retain(|r| r.from_id != entity_id && r.to_id != entity_id);
            graph.entities.remove(entity_id).is_some()
        })
    }

    /// Remove an entire project: relationships first, then entities
    ///
    /// Returns `(entities_removed, relationships_removed)`.
    pub fn delete_project(&self, project_id: &str) -> Result<(usize, usize)> {
        self.with_projects(|projects| match projects.remove(project_id) {
            Some(mut graph) => {
                let relationship_count = graph.relationships.len();
                graph.relationships.clear();
                let entity_count = graph.entities.len();
                graph.entities.clear();
                (entity_count, relationship_count)
            }
            None => (0, 0),
        })
    }

    /// Per-project statistics
    pub fn stats(&self, project_id: &str) -> Result<GraphStats> {
        self.with_projects(|projects| {
            projects
                .get(project_id)
                .map(|graph| {
                    let mut entities_by_type: HashMap<String, usize> = HashMap::new();
                    for entity in graph.entities.values() {
                        *entities_by_type.entry(entity.entity_type.clone()).or_default() += 1;
                    }
                    GraphStats {
                        entity_count: graph.entities.len(),
                        relationship_count: graph.relationships.len(),
                        entities_by_type,
                    }
                })
                .unwrap_or_default()
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: &str, project: &str) -> GraphEntity {
        GraphEntity::new(id, "event", project)
    }

    fn edge(from: &str, to: &str, kind: &str, strength: f64, project: &str) -> GraphRelationship {
        GraphRelationship {
            from_id: from.to_string(),
            to_id: to.to_string(),
            relationship_type: kind.to_string(),
            properties: Map::new(),
            project_id: project.to_string(),
            timestamp: Utc::now(),
            strength,
        }
    }

    fn seeded_store() -> GraphStore {
        let store = GraphStore::new();
        for id in ["a", "b", "c", "d"] {
            store.upsert_entity(entity(id, "p1")).unwrap();
        }
        store
    }

    #[test]
    fn test_relationship_requires_endpoints() {
        let store = seeded_store();
        let err = store
            .add_relationship(edge("a", "missing", "related_to", 0.8, "p1"))
            .unwrap_err();
        assert!(matches!(err, GraphError::EntityNotFound(_, _)));
    }

    #[test]
    fn test_cross_project_edges_rejected() {
        let store = seeded_store();
        store.upsert_entity(entity("z", "p2")).unwrap();

        // "z" exists, but in another project: rejected as cross-project
        let err = store
            .add_relationship(edge("a", "z", "related_to", 0.8, "p1"))
            .unwrap_err();
        assert!(matches!(err, GraphError::CrossProject(_, _)));

        // A genuinely unknown id still reads as not-found
        let err = store
            .add_relationship(edge("a", "nowhere", "related_to", 0.8, "p1"))
            .unwrap_err();
        assert!(matches!(err, GraphError::EntityNotFound(_, _)));
    }

    #[test]
    fn test_duplicate_keeps_highest_strength() {
        let store = seeded_store();
        store
            .add_relationship(edge("a", "b", "related_to", 0.7, "p1"))
            .unwrap();
        store
            .add_relationship(edge("a", "b", "related_to", 0.9, "p1"))
            .unwrap();
        store
            .add_relationship(edge("a", "b", "related_to", 0.5, "p1"))
            .unwrap();

        let edges = store.get_relationships("p1", "a", Some("related_to")).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].strength, 0.9);
    }

    #[test]
    fn test_upsert_replaces_properties() {
        let store = GraphStore::new();
        let mut first = entity("a", "p1");
        first
            .properties
            .insert("status".to_string(), serde_json::json!("open"));
        store.upsert_entity(first).unwrap();

        let mut second = entity("a", "p1");
        second
            .properties
            .insert("status".to_string(), serde_json::json!("closed"));
        store.upsert_entity(second).unwrap();

        let stored = store.get_entity("p1", "a").unwrap().unwrap();
        assert_eq!(stored.properties["status"], serde_json::json!("closed"));
    }

    #[test]
    fn test_find_related_depth_and_strength() {
        let store = seeded_store();
        store
            .add_relationship(edge("a", "b", "related_to", 0.8, "p1"))
            .unwrap();
        store
            .add_relationship(edge("b", "c", "related_to", 0.6, "p1"))
            .unwrap();

        let related = store
            .find_related("p1", "a", &[], 2, 0.0)
            .unwrap();
        assert_eq!(related.len(), 2);
        let b = related.iter().find(|r| r.entity.id == "b").unwrap();
        assert_eq!(b.depth, 1);
        assert!((b.path_strength - 0.8).abs() < 1e-9);
        let c = related.iter().find(|r| r.entity.id == "c").unwrap();
        assert_eq!(c.depth, 2);
        assert!((c.path_strength - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_find_related_bounds_depth_and_handles_cycles() {
        let store = seeded_store();
        store
            .add_relationship(edge("a", "b", "related_to", 0.9, "p1"))
            .unwrap();
        store
            .add_relationship(edge("b", "a", "related_to", 0.9, "p1"))
            .unwrap();
        store
            .add_relationship(edge("b", "c", "related_to", 0.9, "p1"))
            .unwrap();
        store
            .add_relationship(edge("c", "d", "related_to", 0.9, "p1"))
            .unwrap();

        // Depth 1 only reaches b even with the a<->b cycle present
        let related = store.find_related("p1", "a", &[], 1, 0.0).unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].entity.id, "b");
    }

    #[test]
    fn test_find_related_filters_type_and_strength() {
        let store = seeded_store();
        store
            .add_relationship(edge("a", "b", "resolved", 0.9, "p1"))
            .unwrap();
        store
            .add_relationship(edge("a", "c", "related_to", 0.4, "p1"))
            .unwrap();

        let only_resolved = store
            .find_related("p1", "a", &["resolved".to_string()], 2, 0.0)
            .unwrap();
        assert_eq!(only_resolved.len(), 1);
        assert_eq!(only_resolved[0].entity.id, "b");

        let strong = store.find_related("p1", "a", &[], 2, 0.5).unwrap();
        assert_eq!(strong.len(), 1);
    }

    #[test]
    fn test_search_by_vector() {
        let store = GraphStore::new();
        let mut a = entity("a", "p1");
        a.embedding = Some(vec![1.0, 0.0]);
        let mut b = entity("b", "p1");
        b.embedding = Some(vec![0.0, 1.0]);
        let c = entity("c", "p1"); // no embedding, never matches
        store.upsert_entity(a).unwrap();
        store.upsert_entity(b).unwrap();
        store.upsert_entity(c).unwrap();

        let hits = store.search_by_vector("p1", &[1.0, 0.0], 5).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0.id, "a");
    }

    #[test]
    fn test_delete_entity_removes_edges() {
        let store = seeded_store();
        store
            .add_relationship(edge("a", "b", "related_to", 0.8, "p1"))
            .unwrap();
        assert!(store.delete_entity("p1", "b").unwrap());
        assert!(store.get_relationships("p1", "a", None).unwrap().is_empty());
    }

    #[test]
    fn test_delete_project_leaves_nothing() {
        let store = seeded_store();
        store
            .add_relationship(edge("a", "b", "related_to", 0.8, "p1"))
            .unwrap();
        let (entities, relationships) = store.delete_project("p1").unwrap();
        assert_eq!(entities, 4);
        assert_eq!(relationships, 1);
        let stats = store.stats("p1").unwrap();
        assert_eq!(stats.entity_count, 0);
        assert_eq!(stats.relationship_count, 0);
    }
}
