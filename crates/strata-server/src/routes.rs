//! REST surface - glue over the engine and the realtime services
//!
//! Thin handlers only: each endpoint mirrors one operation on the hub, the
//! notification service, the collaboration state, search, or the timeline.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use strata_core::{
    bug_history, GraphStore, IngestionPipeline, IntegrationEvent, PipelineError, SemanticSearch,
    TimelineCategory, TimelineStore, UserContext,
};

use crate::auth::TokenValidator;
use crate::collab::Collaboration;
use crate::hub::RealtimeHub;
use crate::notify::NotificationService;
use crate::ws;

// ============================================================================
// STATE
// ============================================================================

/// Shared application state for the router
#[derive(Clone)]
pub struct AppState {
    /// Realtime hub
    pub hub: Arc<RealtimeHub>,
    /// Notification service
    pub notifications: Arc<NotificationService>,
    /// Collaboration state
    pub collab: Arc<Collaboration>,
    /// Search engine
    pub search: Arc<SemanticSearch>,
    /// Ingestion pipeline
    pub pipeline: Arc<IngestionPipeline>,
    /// Timeline store
    pub timeline: Arc<TimelineStore>,
    /// Graph store
    pub graph: Arc<GraphStore>,
    /// Connection-token validator
    pub validator: Arc<TokenValidator>,
}

/// Build the axum router with all service routes
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/api/health", get(health))
        .route("/api/stats", get(stats))
        .route("/api/events", post(submit_event))
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/{id}/read", post(mark_read))
        .route("/api/notifications/read_all", post(mark_all_read))
        .route("/api/projects/{project_id}/presence", get(presence))
        .route(
            "/api/projects/{project_id}/collaboration",
            get(collaboration_snapshot),
        )
        .route("/api/projects/{project_id}/timeline", get(timeline))
        .route("/api/projects/{project_id}/analytics", get(analytics))
        .route("/api/projects/{project_id}/search", post(search))
        .route(
            "/api/projects/{project_id}/bugs/{bug_id}/history",
            get(bug_history_handler),
        )
        .layer(
            ServiceBuilder::new()
                .concurrency_limit(64)
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

// ============================================================================
// HANDLERS
// ============================================================================

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok", "version": env!("CARGO_PKG_VERSION")}))
}

async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "hub": state.hub.stats(),
        "pipeline": state.pipeline.metrics(),
    }))
}

async fn submit_event(
    State(state): State<AppState>,
    Json(event): Json<IntegrationEvent>,
) -> impl IntoResponse {
    match state.pipeline.enqueue(event) {
        Ok(()) => (StatusCode::ACCEPTED, Json(json!({"status": "queued"}))),
        Err(PipelineError::QueueFull) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"error": "pipeline queue full", "retryable": true})),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string(), "retryable": e.is_retryable()})),
        ),
    }
}

#[derive(Deserialize)]
struct NotificationQuery {
    user_id: String,
    #[serde(default)]
    unread_only: bool,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    50
}

async fn list_notifications(
    State(state): State<AppState>,
    Query(query): Query<NotificationQuery>,
) -> impl IntoResponse {
    Json(state.notifications.list(&query.user_id, query.unread_only, query.limit))
}

#[derive(Deserialize)]
struct UserQuery {
    user_id: String,
}

async fn mark_read(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<UserQuery>,
) -> impl IntoResponse {
    if state.notifications.mark_read(&id, &query.user_id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn mark_all_read(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> impl IntoResponse {
    Json(json!({"marked": state.notifications.mark_all_read(&query.user_id)}))
}

async fn presence(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> impl IntoResponse {
    Json(state.hub.presence(&project_id))
}

async fn collaboration_snapshot(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> impl IntoResponse {
    Json(state.collab.snapshot(&project_id))
}

#[derive(Deserialize)]
struct TimelineQuery {
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    min_importance: f64,
    #[serde(default)]
    include_frozen: bool,
    #[serde(default = "default_limit")]
    limit: usize,
}

async fn timeline(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Query(query): Query<TimelineQuery>,
) -> impl IntoResponse {
    let category = query
        .category
        .as_deref()
        .and_then(TimelineCategory::parse_name);
    match state.timeline.retrieve(
        &project_id,
        category,
        query.min_importance,
        query.include_frozen,
        query.limit,
    ) {
        Ok(entries) => Json(json!({"entries": entries})).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

#[derive(Deserialize)]
struct AnalyticsQuery {
    #[serde(default = "default_days_back")]
    days_back: i64,
}

fn default_days_back() -> i64 {
    90
}

async fn analytics(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Query(query): Query<AnalyticsQuery>,
) -> impl IntoResponse {
    match state.timeline.analytics(&project_id, query.days_back) {
        Ok(analytics) => Json(analytics).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    content_types: Vec<String>,
    #[serde(default)]
    min_importance: f64,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    user_context: Option<UserContext>,
}

async fn search(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(request): Json<SearchRequest>,
) -> impl IntoResponse {
    let response = match request.mode.as_deref() {
        Some("code") => {
            state
                .search
                .code_search(
                    &project_id,
                    &request.query,
                    request.language.as_deref(),
                    request.min_importance,
                    request.limit,
                )
                .await
        }
        Some("contextual") => {
            state
                .search
                .contextual_search(
                    &project_id,
                    &request.query,
                    &request.user_context.unwrap_or_default(),
                    request.limit,
                )
                .await
        }
        _ => {
            state
                .search
                .cross_source_search(
                    &project_id,
                    &request.query,
                    &request.content_types,
                    request.min_importance,
                    request.limit,
                )
                .await
        }
    };
    Json(response)
}

async fn bug_history_handler(
    State(state): State<AppState>,
    Path((project_id, bug_id)): Path<(String, String)>,
) -> impl IntoResponse {
    match bug_history(&state.graph, &project_id, &bug_id) {
        Ok(Some(history)) => Json(history).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("bug {bug_id} not found")})),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}
