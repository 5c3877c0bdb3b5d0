//! Domain-event bridge
//!
//! Subscribes to the pipeline's domain events and turns them into realtime
//! traffic: ingestion progress for the project room, and mention detection
//! over user-generated text.

use std::sync::Arc;

use serde_json::json;
use strata_core::DomainEvent;
use tokio::sync::broadcast;

use crate::hub::{MessageType, RealtimeHub, RealtimeMessage};
use crate::notify::NotificationService;

/// Event types whose text is user-generated and mention-bearing
const MENTION_BEARING: &[&str] = &["message", "issue_comment", "code_review", "document"];

/// Spawn the bridge task
pub fn spawn_domain_bridge(
    hub: Arc<RealtimeHub>,
    notifications: Arc<NotificationService>,
    mut events: broadcast::Receiver<DomainEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "domain event bridge lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            match event {
                DomainEvent::EventIngested {
                    project_id,
                    event_id,
                    event_type,
                    title,
                    author,
                    text,
                    importance_level,
                    relations,
                    ..
                } => {
                    hub.broadcast_to_project(
                        &project_id,
                        RealtimeMessage::system(
                            MessageType::DataIngestion,
                            Some(project_id.clone()),
                        )
                        .with_data("event_id", json!(event_id))
                        .with_data("event_type", json!(event_type))
                        .with_data("title", json!(title))
                        .with_data("importance_level", json!(importance_level))
                        .with_data("relation_count", json!(relations.len())),
                        None,
                    );

                    if MENTION_BEARING.contains(&event_type.as_str()) {
                        if let Some(author) = author {
                            notifications
                                .detect_mentions(&text, &project_id, &author, &event_type)
                                .await;
                        }
                    }
                }
                DomainEvent::EventSkipped { .. } => {}
                DomainEvent::IngestFailed {
                    project_id,
                    event_id,
                    stage,
                    error,
                    ..
                } => {
                    tracing::error!(
                        project = project_id.as_deref().unwrap_or("unknown"),
                        event = %event_id,
                        stage = %stage,
                        "ingestion failure surfaced to bridge: {}",
                        error
                    );
                }
            }
        }
    })
}
