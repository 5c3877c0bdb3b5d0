//! # Strata Core
//!
//! Engineering-intelligence engine. Ingests normalized events from developer
//! tools and turns the stream into a queryable causal/temporal graph:
//!
//! - **Ingestion pipeline**: dedup, importance scoring, tier assignment,
//!   durable write across the vector index, the graph store and the timeline
//! - **Relationship inference**: semantic, reference, component, author and
//!   causal relation detection with an optional LLM blend
//! - **Tiered timeline store**: hot/warm/cold/frozen residency with
//!   retention policy enforcement; the system of record
//! - **Importance scoring**: six weighted factors with online weight
//!   adjustment from user feedback
//! - **Semantic search**: code-intent, cross-source and contextual queries
//!
//! External capabilities (the embedding model, the LLM used for causal
//! confirmation, file-format text extraction) are oracles behind the traits
//! in [`oracle`]; the engine degrades gracefully when they are unavailable.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use strata_core::prelude::*;
//!
//! let vector = Arc::new(VectorIndex::new());
//! let graph = Arc::new(GraphStore::new());
//! let config = EngineConfig::default();
//! let timeline = Arc::new(TimelineStore::new(
//!     None,
//!     config.retention,
//!     config.dedup_window_days,
//!     vector.clone(),
//!     graph.clone(),
//! )?);
//! let inferencer = Arc::new(RelationshipInferencer::new((&config).into(), None));
//! let pipeline = IngestionPipeline::new(
//!     config,
//!     Arc::new(ImportanceScorer::default()),
//!     inferencer,
//!     timeline,
//!     graph,
//!     None,
//! );
//!
//! let event = IntegrationEvent::new("github", EventType::Commit, "fix #17 leak");
//! let outcome = pipeline.submit(event).await?;
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod config;
pub mod embedding;
pub mod event;
pub mod graph;
pub mod inference;
pub mod oracle;
pub mod pipeline;
pub mod scoring;
pub mod search;
pub mod timeline;
pub mod vector;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Event model
pub use event::{
    keys, EventError, EventRelation, EventType, IntegrationEvent, MetaValue, RelationType,
};

// Embedding math
pub use embedding::{centroid, cosine_similarity, dot_product};

// Oracles
pub use oracle::{CompletionModel, Embedder, ExtractedText, OracleError, TextExtractor};

// Vector index
pub use vector::{VectorDoc, VectorHit, VectorIndex, VectorIndexError, VectorIndexStats};

// Graph store
pub use graph::{
    GraphEntity, GraphError, GraphRelationship, GraphStats, GraphStore, RelatedEntity,
};

// Importance scoring
pub use scoring::{
    ImportanceLevel, ImportanceScore, ImportanceScorer, ProjectContext, ScoringContext,
    ScoringWeights, TeamMember, ThresholdRecommendations, WeightAdjustment,
};

// Timeline storage
pub use timeline::{
    assign_tier, content_hash, CleanupStats, FailedEventRecord, NotificationRecord,
    RetentionPolicy, StorageError, StorageTier, StoredOutcome, TimelineAnalytics,
    TimelineCategory, TimelineEntry, TimelineStore,
};

// Relationship inference
pub use inference::{
    bug_history, BugCause, BugFix, BugHistory, BugRef, BugState, InferencerConfig,
    RelationshipInferencer,
};

// Ingestion pipeline
pub use pipeline::{
    relation_to_edge, DomainEvent, IngestionPipeline, PipelineError, PipelineMetrics,
    RelationSummary, SubmitOutcome,
};

// Semantic search
pub use search::{
    SearchConfig, SearchRecord, SearchResponse, SearchResult, SearchType, SemanticSearch,
    UserContext,
};

// Configuration
pub use config::{EngineConfig, RetentionDays};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        DomainEvent, EngineConfig, EventRelation, EventType, GraphStore, ImportanceLevel,
        ImportanceScore, ImportanceScorer, IngestionPipeline, IntegrationEvent, PipelineError,
        RelationType, RelationshipInferencer, SemanticSearch, StorageTier, TimelineCategory,
        TimelineEntry, TimelineStore, VectorIndex,
    };

    pub use crate::oracle::{CompletionModel, Embedder};
}
