//! Vector index - cosine similarity search with metadata filtering
//!
//! Maps `doc_id -> (vector, metadata)`. Queries are exact cosine scans so the
//! metadata filter and the stable tie-break contract hold precisely; the
//! interface stays swappable for an ANN-backed implementation if a deployment
//! outgrows the scan.
//!
//! Every row is a projection of a timeline entry and is rebuildable from the
//! system of record.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::embedding::cosine_similarity;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Vector index error types
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum VectorIndexError {
    /// Vector length differs from the index dimensionality
    InvalidDimensions(usize, usize),
    /// Query filter did not carry the mandatory project scope
    MissingProjectFilter,
    /// Internal lock poisoned
    Poisoned,
}

impl std::fmt::Display for VectorIndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VectorIndexError::InvalidDimensions(expected, got) => {
                write!(f, "Invalid dimensions: expected {}, got {}", expected, got)
            }
            VectorIndexError::MissingProjectFilter => {
                write!(f, "Query filter must include project_id")
            }
            VectorIndexError::Poisoned => write!(f, "Vector index lock poisoned"),
        }
    }
}

impl std::error::Error for VectorIndexError {}

// ============================================================================
// DOCUMENT TYPES
// ============================================================================

/// A document to upsert
#[derive(Debug, Clone)]
pub struct VectorDoc {
    /// Identifier; generated when absent
    pub id: Option<String>,
    /// Embedding vector
    pub vector: Vec<f32>,
    /// Exact-match filterable metadata; `project_id` is expected
    pub metadata: Map<String, Value>,
}

/// One query hit
#[derive(Debug, Clone)]
pub struct VectorHit {
    /// Document identifier
    pub id: String,
    /// Cosine similarity to the query vector
    pub score: f32,
    /// Stored metadata
    pub metadata: Map<String, Value>,
}

/// Index statistics
#[derive(Debug, Clone)]
pub struct VectorIndexStats {
    /// Total number of vectors
    pub total_vectors: usize,
    /// Vector dimensions (0 while empty)
    pub dimensions: usize,
}

struct StoredDoc {
    vector: Vec<f32>,
    metadata: Map<String, Value>,
}

// ============================================================================
// VECTOR INDEX
// ============================================================================

/// In-memory cosine similarity index
///
/// All methods take `&self`; interior locking keeps the index `Send + Sync`
/// so components share it behind a plain `Arc`.
pub struct VectorIndex {
    docs: Mutex<HashMap<String, StoredDoc>>,
    dimensions: Mutex<Option<usize>>,
}

impl Default for VectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl VectorIndex {
    /// Create an empty index; dimensionality locks in on first insert
    pub fn new() -> Self {
        Self {
            docs: Mutex::new(HashMap::new()),
            dimensions: Mutex::new(None),
        }
    }

    /// Number of stored vectors
    pub fn len(&self) -> usize {
        self.docs.lock().map(|d| d.len()).unwrap_or(0)
    }

    /// Whether the index is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or overwrite documents, returning their ids in order
    pub fn upsert(&self, docs: Vec<VectorDoc>) -> Result<Vec<String>, VectorIndexError> {
        let mut dims = self
            .dimensions
            .lock()
            .map_err(|_| VectorIndexError::Poisoned)?;
        let mut stored = self.docs.lock().map_err(|_| VectorIndexError::Poisoned)?;

        let mut ids = Vec::with_capacity(docs.len());
        for doc in docs {
            match *dims {
                Some(expected) if doc.vector.len() != expected => {
                    return Err(VectorIndexError::InvalidDimensions(
                        expected,
                        doc.vector.len(),
                    ));
                }
                None => *dims = Some(doc.vector.len()),
                _ => {}
            }
            let id = doc.id.unwrap_or_else(|| Uuid::new_v4().to_string());
            stored.insert(
                id.clone(),
                StoredDoc {
                    vector: doc.vector,
                    metadata: doc.metadata,
                },
            );
            ids.push(id);
        }
        Ok(ids)
    }

    /// Top-k cosine query with a conjunctive exact-match metadata filter
    ///
    /// The filter must include `project_id`; cross-project scans are
    /// rejected. Results are sorted by score descending, ties broken by id
    /// ascending.
    pub fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &Map<String, Value>,
    ) -> Result<Vec<VectorHit>, VectorIndexError> {
        if !filter.contains_key("project_id") {
            return Err(VectorIndexError::MissingProjectFilter);
        }
        let stored = self.docs.lock().map_err(|_| VectorIndexError::Poisoned)?;

        let mut hits: Vec<VectorHit> = stored
            .iter()
            .filter(|(_, doc)| {
                filter
                    .iter()
                    .all(|(key, value)| doc.metadata.get(key) == Some(value))
            })
            .map(|(id, doc)| VectorHit {
                id: id.clone(),
                score: cosine_similarity(vector, &doc.vector),
                metadata: doc.metadata.clone(),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    /// Remove documents by id, returning how many existed
    pub fn delete(&self, ids: &[String]) -> Result<usize, VectorIndexError> {
        let mut stored = self.docs.lock().map_err(|_| VectorIndexError::Poisoned)?;
        let mut removed = 0;
        for id in ids {
            if stored.remove(id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Remove every document belonging to a project
    pub fn delete_project(&self, project_id: &str) -> Result<usize, VectorIndexError> {
        let mut stored = self.docs.lock().map_err(|_| VectorIndexError::Poisoned)?;
        let before = stored.len();
        stored.retain(|_, doc| {
            doc.metadata.get("project_id").and_then(Value::as_str) != Some(project_id)
        });
        Ok(before - stored.len())
    }

    /// Stored vector for a document, if present
    pub fn get_vector(&self, id: &str) -> Option<Vec<f32>> {
        self.docs
            .lock()
            .ok()
            .and_then(|docs| docs.get(id).map(|d| d.vector.clone()))
    }

    /// Index statistics
    pub fn stats(&self) -> VectorIndexStats {
        VectorIndexStats {
            total_vectors: self.len(),
            dimensions: self.dimensions.lock().ok().and_then(|d| *d).unwrap_or(0),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, vector: Vec<f32>, project: &str) -> VectorDoc {
        let mut metadata = Map::new();
        metadata.insert("project_id".to_string(), json!(project));
        VectorDoc {
            id: Some(id.to_string()),
            vector,
            metadata,
        }
    }

    fn project_filter(project: &str) -> Map<String, Value> {
        let mut filter = Map::new();
        filter.insert("project_id".to_string(), json!(project));
        filter
    }

    #[test]
    fn test_upsert_and_query() {
        let index = VectorIndex::new();
        index
            .upsert(vec![
                doc("a", vec![1.0, 0.0], "p1"),
                doc("b", vec![0.0, 1.0], "p1"),
                doc("c", vec![1.0, 0.0], "p2"),
            ])
            .unwrap();

        let hits = index.query(&[1.0, 0.0], 10, &project_filter("p1")).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "a");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_query_requires_project_filter() {
        let index = VectorIndex::new();
        let result = index.query(&[1.0, 0.0], 5, &Map::new());
        assert!(matches!(result, Err(VectorIndexError::MissingProjectFilter)));
    }

    #[test]
    fn test_ties_break_by_id_ascending() {
        let index = VectorIndex::new();
        index
            .upsert(vec![
                doc("zeta", vec![1.0, 0.0], "p1"),
                doc("alpha", vec![1.0, 0.0], "p1"),
            ])
            .unwrap();
        let hits = index.query(&[1.0, 0.0], 10, &project_filter("p1")).unwrap();
        assert_eq!(hits[0].id, "alpha");
        assert_eq!(hits[1].id, "zeta");
    }

    #[test]
    fn test_upsert_overwrites_existing() {
        let index = VectorIndex::new();
        index.upsert(vec![doc("a", vec![1.0, 0.0], "p1")]).unwrap();
        index.upsert(vec![doc("a", vec![0.0, 1.0], "p1")]).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.get_vector("a").unwrap(), vec![0.0, 1.0]);
    }

    #[test]
    fn test_generated_ids() {
        let index = VectorIndex::new();
        let ids = index
            .upsert(vec![VectorDoc {
                id: None,
                vector: vec![0.5, 0.5],
                metadata: project_filter("p1"),
            }])
            .unwrap();
        assert_eq!(ids.len(), 1);
        assert!(!ids[0].is_empty());
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let index = VectorIndex::new();
        index.upsert(vec![doc("a", vec![1.0, 0.0], "p1")]).unwrap();
        let result = index.upsert(vec![doc("b", vec![1.0, 0.0, 0.0], "p1")]);
        assert!(matches!(
            result,
            Err(VectorIndexError::InvalidDimensions(2, 3))
        ));
    }

    #[test]
    fn test_delete() {
        let index = VectorIndex::new();
        index
            .upsert(vec![
                doc("a", vec![1.0, 0.0], "p1"),
                doc("b", vec![0.0, 1.0], "p1"),
            ])
            .unwrap();
        let removed = index
            .delete(&["a".to_string(), "missing".to_string()])
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_delete_project() {
        let index = VectorIndex::new();
        index
            .upsert(vec![
                doc("a", vec![1.0, 0.0], "p1"),
                doc("b", vec![0.0, 1.0], "p2"),
            ])
            .unwrap();
        assert_eq!(index.delete_project("p1").unwrap(), 1);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_zero_query_vector_scores_zero() {
        let index = VectorIndex::new();
        index.upsert(vec![doc("a", vec![1.0, 0.0], "p1")]).unwrap();
        let hits = index.query(&[0.0, 0.0], 10, &project_filter("p1")).unwrap();
        assert_eq!(hits[0].score, 0.0);
        assert!(!hits[0].score.is_nan());
    }
}
