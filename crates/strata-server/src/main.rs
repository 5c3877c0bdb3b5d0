//! Strata server binary
//!
//! Assembles the engine (vector index, graph store, timeline, scorer,
//! inferencer, pipeline, search) and the realtime layer (hub, notifications,
//! collaboration), then serves the websocket and REST surface.
//!
//! Oracles (embedder, LLM) are deployment-specific; without them the engine
//! runs with semantic matching and LLM-assisted causal inference disabled,
//! which only removes evidence sources - every other path works.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use strata_core::{
    EngineConfig, GraphStore, ImportanceScorer, IngestionPipeline, RelationshipInferencer,
    SearchConfig, SemanticSearch, TimelineStore, VectorIndex,
};
use strata_server::{
    build_router, spawn_domain_bridge, AppState, Collaboration, NotificationService, RealtimeHub,
    ServerConfig, TokenValidator,
};

/// Strata engineering-intelligence server
#[derive(Parser, Debug)]
#[command(name = "strata-server", version, about)]
struct Args {
    /// Listen address (overrides STRATA_BIND_ADDR)
    #[arg(long)]
    bind: Option<std::net::SocketAddr>,

    /// SQLite database path (overrides STRATA_DB_PATH)
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Connection-token secret (overrides STRATA_AUTH_SECRET)
    #[arg(long)]
    auth_secret: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let mut server_config = ServerConfig::from_env();
    if let Some(bind) = args.bind {
        server_config.bind_addr = bind;
    }
    if let Some(db_path) = args.db_path {
        server_config.db_path = Some(db_path);
    }
    if let Some(secret) = args.auth_secret {
        server_config.auth_secret = secret;
    }
    if server_config.auth_secret == "dev-secret" {
        warn!("running with the default auth secret; set STRATA_AUTH_SECRET in production");
    }

    let engine_config = EngineConfig::from_env();

    // Engine assembly: timeline is the system of record, vector and graph
    // are its projections
    let vector = Arc::new(VectorIndex::new());
    let graph = Arc::new(GraphStore::new());
    let timeline = Arc::new(
        TimelineStore::new(
            server_config.db_path.clone(),
            engine_config.retention,
            engine_config.dedup_window_days,
            vector.clone(),
            graph.clone(),
        )
        .context("opening timeline store")?,
    );
    let scorer = Arc::new(ImportanceScorer::new(engine_config.keep_threshold));
    let inferencer = Arc::new(RelationshipInferencer::new((&engine_config).into(), None));
    let pipeline = Arc::new(IngestionPipeline::new(
        engine_config,
        scorer,
        inferencer,
        timeline.clone(),
        graph.clone(),
        None,
    ));
    let search = Arc::new(SemanticSearch::new(
        vector.clone(),
        graph.clone(),
        None,
        SearchConfig::default(),
    ));
    info!("engine assembled (no embedder/LLM oracle configured; semantic features degraded)");

    // Projection repair after whatever happened before this process
    if let Err(e) = timeline.reconcile("default") {
        warn!("startup reconcile failed: {}", e);
    }

    // Realtime layer
    let hub = Arc::new(RealtimeHub::new(server_config.hub_config()));
    let notifications = Arc::new(NotificationService::new(
        hub.clone(),
        timeline.clone(),
        None,
        None,
    ));
    let collab = Arc::new(Collaboration::new(hub.clone(), notifications.clone()));

    // Background tasks
    let _worker = pipeline.start();
    let _heartbeat = hub.start_heartbeat_monitor();
    let _cleanup = notifications.start_cleanup();
    let _bridge = spawn_domain_bridge(hub.clone(), notifications.clone(), pipeline.subscribe());

    let state = AppState {
        hub,
        notifications,
        collab,
        search,
        pipeline,
        timeline,
        graph,
        validator: Arc::new(TokenValidator::new(server_config.auth_secret.clone())),
    };
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(server_config.bind_addr)
        .await
        .with_context(|| format!("binding {}", server_config.bind_addr))?;
    info!("strata-server listening on {}", server_config.bind_addr);
    axum::serve(listener, router).await.context("serving")?;
    Ok(())
}
