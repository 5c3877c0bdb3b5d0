//! # Strata Server
//!
//! Realtime service over the strata-core engine:
//!
//! - **Hub**: websocket connection registry, project rooms, heartbeat
//!   supervision, offline queues
//! - **Notifications**: gated multi-channel delivery with rate limiting,
//!   quiet hours, and mention detection
//! - **Collaboration**: cursors, selections, comments, shared insights
//! - **REST glue**: notification feeds, presence, timelines, search
//!
//! The binary in `main.rs` wires everything together; the library exposes
//! the pieces so embedders can assemble their own topology.

#![warn(rustdoc::missing_crate_level_docs)]

pub mod auth;
pub mod bridge;
pub mod collab;
pub mod config;
pub mod hub;
pub mod notify;
pub mod routes;
pub mod ws;

pub use auth::{TokenValidator, AUTH_FAILURE_CODE};
pub use bridge::spawn_domain_bridge;
pub use collab::{Collaboration, CollaborationSnapshot};
pub use config::ServerConfig;
pub use hub::{
    HubConfig, HubStats, MessageType, NotificationLevel, ProjectPresence, RealtimeHub,
    RealtimeMessage, Transport, TransportError,
};
pub use notify::{
    EmailGateway, Notification, NotificationChannel, NotificationPreferences,
    NotificationPriority, NotificationService, NotificationType, PushGateway,
};
pub use routes::{build_router, AppState};
