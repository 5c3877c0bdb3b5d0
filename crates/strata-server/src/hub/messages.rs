//! Realtime wire envelope and message types
//!
//! Every frame on a realtime transport is one JSON [`RealtimeMessage`].
//! Inbound and outbound share the shape; `message_type` drives dispatch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ============================================================================
// MESSAGE TYPES
// ============================================================================

/// Realtime message classification
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    // -- Connection management --
    /// Connection established
    Connect,
    /// Connection closing
    Disconnect,
    /// Liveness probe; echoed by the hub
    Heartbeat,

    // -- Project updates --
    /// Project state changed
    ProjectUpdate,
    /// Ingestion progress
    DataIngestion,
    /// Integration sync progress
    SyncStatus,

    // -- AI interactions --
    /// A shared AI query
    AiQuery,
    /// An AI answer
    AiResponse,

    // -- Collaboration --
    /// Generic user activity
    UserActivity,
    /// Cursor moved
    CursorPosition,
    /// Selection changed
    SelectionChange,
    /// File changed
    FileChange,

    // -- Notifications --
    /// A delivered notification
    Notification,
    /// A mention alert
    Mention,

    // -- System events --
    /// An error report to one connection
    Error,
    /// Hub status information
    Status,
}

impl MessageType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Connect => "connect",
            MessageType::Disconnect => "disconnect",
            MessageType::Heartbeat => "heartbeat",
            MessageType::ProjectUpdate => "project_update",
            MessageType::DataIngestion => "data_ingestion",
            MessageType::SyncStatus => "sync_status",
            MessageType::AiQuery => "ai_query",
            MessageType::AiResponse => "ai_response",
            MessageType::UserActivity => "user_activity",
            MessageType::CursorPosition => "cursor_position",
            MessageType::SelectionChange => "selection_change",
            MessageType::FileChange => "file_change",
            MessageType::Notification => "notification",
            MessageType::Mention => "mention",
            MessageType::Error => "error",
            MessageType::Status => "status",
        }
    }
}

/// Severity attached to notification-bearing messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    /// Informational
    Info,
    /// Success confirmation
    Success,
    /// Needs attention
    Warning,
    /// Something failed
    Error,
    /// Requires action now
    Critical,
}

// ============================================================================
// ENVELOPE
// ============================================================================

/// The JSON envelope carried on every realtime transport frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeMessage {
    /// Unique message id
    #[serde(default = "generated_id")]
    pub message_id: String,
    /// Message classification
    pub message_type: MessageType,
    /// Send time
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Originating user, or "system"
    pub sender_id: String,
    /// Project scope, when applicable
    #[serde(default)]
    pub project_id: Option<String>,
    /// Message payload
    #[serde(default)]
    pub data: Map<String, Value>,
    /// Delivery metadata (notification level, activity type)
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn generated_id() -> String {
    Uuid::new_v4().to_string()
}

impl RealtimeMessage {
    /// Build a system-originated message
    pub fn system(message_type: MessageType, project_id: Option<String>) -> Self {
        Self {
            message_id: generated_id(),
            message_type,
            timestamp: Utc::now(),
            sender_id: "system".to_string(),
            project_id,
            data: Map::new(),
            metadata: Map::new(),
        }
    }

    /// Build a user-originated message
    pub fn from_user(
        message_type: MessageType,
        sender_id: impl Into<String>,
        project_id: Option<String>,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            ..Self::system(message_type, project_id)
        }
    }

    /// Set a payload field
    pub fn with_data(mut self, key: &str, value: Value) -> Self {
        self.data.insert(key.to_string(), value);
        self
    }

    /// Set a metadata field
    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// The notification level riding in metadata, when present
    pub fn notification_level(&self) -> Option<NotificationLevel> {
        self.metadata
            .get("notification_level")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
    }

    /// Messages that must never be dropped from an outbound mailbox:
    /// errors and warning-or-worse notifications
    pub fn is_critical(&self) -> bool {
        match self.message_type {
            MessageType::Error => true,
            MessageType::Notification | MessageType::Mention => self
                .notification_level()
                .map(|level| level >= NotificationLevel::Warning)
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Serialize to a JSON frame
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_roundtrip() {
        let message = RealtimeMessage::from_user(
            MessageType::CursorPosition,
            "alice",
            Some("p1".to_string()),
        )
        .with_data("file", json!("src/lib.rs"))
        .with_data("line", json!(42));

        let frame = message.to_json();
        let parsed: RealtimeMessage = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed.message_type, MessageType::CursorPosition);
        assert_eq!(parsed.sender_id, "alice");
        assert_eq!(parsed.data["line"], json!(42));
    }

    #[test]
    fn test_inbound_defaults() {
        // Clients may omit id and timestamp
        let frame = r#"{"message_type": "heartbeat", "sender_id": "bob"}"#;
        let parsed: RealtimeMessage = serde_json::from_str(frame).unwrap();
        assert!(!parsed.message_id.is_empty());
        assert_eq!(parsed.message_type, MessageType::Heartbeat);
    }

    #[test]
    fn test_criticality() {
        let error = RealtimeMessage::system(MessageType::Error, None);
        assert!(error.is_critical());

        let info = RealtimeMessage::system(MessageType::Notification, None)
            .with_metadata("notification_level", json!("info"));
        assert!(!info.is_critical());

        let warning = RealtimeMessage::system(MessageType::Notification, None)
            .with_metadata("notification_level", json!("warning"));
        assert!(warning.is_critical());

        let cursor = RealtimeMessage::system(MessageType::CursorPosition, None);
        assert!(!cursor.is_critical());
    }
}
