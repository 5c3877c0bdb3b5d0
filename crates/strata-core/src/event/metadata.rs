//! Well-known metadata keys and tolerant typed accessors
//!
//! `IntegrationEvent.metadata` is an open map; adapters drop source-specific
//! fields there untouched. The scorer and the inferencer only ever consult
//! the keys registered here, through accessors that tolerate the loose typing
//! real adapters produce (numbers as strings, timestamps as either RFC-3339
//! strings or epoch numbers). Unknown keys pass through the system untouched.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use super::IntegrationEvent;

/// Registry of metadata keys with documented meaning
pub mod keys {
    /// `Vec<String>` - file paths touched by a commit
    pub const FILES: &str = "files";
    /// Number or string - issue number in the source tracker
    pub const ISSUE_NUMBER: &str = "issue_number";
    /// Number or string - pull-request number
    pub const PR_NUMBER: &str = "pr_number";
    /// String - source-side identifier (e.g. a Jira key)
    pub const EXTERNAL_ID: &str = "external_id";
    /// String - commit hash
    pub const COMMIT_HASH: &str = "commit_hash";
    /// String - commit hash, alternate key some adapters use
    pub const HASH: &str = "hash";
    /// `Vec<String>` - hashes included in a deployment
    pub const COMMIT_HASHES: &str = "commit_hashes";
    /// String or `Vec` - component tags (Jira style)
    pub const COMPONENTS: &str = "components";
    /// String - single component tag in metadata form
    pub const COMPONENT: &str = "component";
    /// Number - replies to a message or comment thread
    pub const REPLY_COUNT: &str = "reply_count";
    /// Number - reactions on a message
    pub const REACTION_COUNT: &str = "reaction_count";
    /// Number - `@` mentions in a message
    pub const MENTION_COUNT: &str = "mention_count";
    /// String - sentiment classification from the source adapter
    pub const SENTIMENT: &str = "sentiment";
    /// String - assignee handle
    pub const ASSIGNEE: &str = "assignee";
    /// Bool - set by the pipeline when the embedder oracle was unavailable,
    /// marking the event for later re-embedding and re-inference
    pub const PENDING_EMBEDDING: &str = "pending_embedding";
    /// String - timeline entry id of a collapsed duplicate
    pub const DUPLICATE_OF: &str = "duplicate_of";
}

/// Loosely-typed metadata value views
///
/// Cached source objects carry timestamps as ISO strings in some adapters and
/// numeric epochs in others; treat such fields as string-or-number-or-absent.
pub enum MetaValue<'a> {
    /// Present as a JSON string
    Text(&'a str),
    /// Present as a JSON number
    Number(f64),
    /// Key missing or carries a shape we do not read
    Absent,
}

fn view<'a>(value: Option<&'a Value>) -> MetaValue<'a> {
    match value {
        Some(Value::String(s)) => MetaValue::Text(s),
        Some(Value::Number(n)) => n.as_f64().map(MetaValue::Number).unwrap_or(MetaValue::Absent),
        _ => MetaValue::Absent,
    }
}

fn as_u64(value: Option<&Value>) -> Option<u64> {
    match view(value) {
        MetaValue::Number(n) if n >= 0.0 => Some(n as u64),
        MetaValue::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                // Jira components arrive as objects with a "name" field
                Value::Object(map) => map
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

impl IntegrationEvent {
    /// Raw metadata value by key
    pub fn meta(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Metadata value as a string, if it is one
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Issue number, tolerating number or string encodings
    pub fn issue_number(&self) -> Option<u64> {
        as_u64(self.metadata.get(keys::ISSUE_NUMBER))
    }

    /// Pull-request number, tolerating number or string encodings
    pub fn pr_number(&self) -> Option<u64> {
        as_u64(self.metadata.get(keys::PR_NUMBER))
    }

    /// Source-side external identifier
    pub fn external_id(&self) -> Option<&str> {
        self.meta_str(keys::EXTERNAL_ID)
    }

    /// Commit hash under either of the keys adapters use
    pub fn commit_hash(&self) -> Option<&str> {
        self.meta_str(keys::HASH)
            .or_else(|| self.meta_str(keys::COMMIT_HASH))
    }

    /// Hashes a deployment claims to contain
    pub fn commit_hashes(&self) -> Vec<String> {
        as_string_list(self.metadata.get(keys::COMMIT_HASHES))
    }

    /// File paths touched by a commit
    pub fn files(&self) -> Vec<String> {
        as_string_list(self.metadata.get(keys::FILES))
    }

    /// Component tags from metadata (string, list, or Jira object list)
    pub fn meta_components(&self) -> Vec<String> {
        let mut components = as_string_list(self.metadata.get(keys::COMPONENTS));
        if let Some(single) = self.meta_str(keys::COMPONENT) {
            components.push(single.to_string());
        }
        components
    }

    /// Engagement counters, absent values read as zero
    pub fn reply_count(&self) -> u64 {
        as_u64(self.metadata.get(keys::REPLY_COUNT)).unwrap_or(0)
    }

    /// Reactions on a message
    pub fn reaction_count(&self) -> u64 {
        as_u64(self.metadata.get(keys::REACTION_COUNT)).unwrap_or(0)
    }

    /// Mentions in a message
    pub fn mention_count(&self) -> u64 {
        as_u64(self.metadata.get(keys::MENTION_COUNT)).unwrap_or(0)
    }

    /// A timestamp-valued metadata field, tolerating RFC-3339 strings,
    /// epoch seconds and epoch milliseconds
    pub fn meta_timestamp(&self, key: &str) -> Option<DateTime<Utc>> {
        match view(self.metadata.get(key)) {
            MetaValue::Text(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            MetaValue::Number(n) => {
                // Heuristic: values past the year 33658 in seconds are millis
                let n = n as i64;
                let secs = if n > 1_000_000_000_000 { n / 1000 } else { n };
                Utc.timestamp_opt(secs, 0).single()
            }
            MetaValue::Absent => None,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::super::{EventType, IntegrationEvent};
    use super::*;
    use serde_json::json;

    fn event_with(key: &str, value: Value) -> IntegrationEvent {
        let mut event = IntegrationEvent::new("test", EventType::Custom, "t");
        event.metadata.insert(key.to_string(), value);
        event
    }

    #[test]
    fn test_issue_number_tolerates_string_and_number() {
        assert_eq!(event_with(keys::ISSUE_NUMBER, json!(17)).issue_number(), Some(17));
        assert_eq!(
            event_with(keys::ISSUE_NUMBER, json!("17")).issue_number(),
            Some(17)
        );
        assert_eq!(event_with(keys::ISSUE_NUMBER, json!(null)).issue_number(), None);
    }

    #[test]
    fn test_commit_hash_reads_both_keys() {
        assert_eq!(
            event_with(keys::HASH, json!("abc1234")).commit_hash(),
            Some("abc1234")
        );
        assert_eq!(
            event_with(keys::COMMIT_HASH, json!("def5678")).commit_hash(),
            Some("def5678")
        );
    }

    #[test]
    fn test_components_jira_object_form() {
        let event = event_with(
            keys::COMPONENTS,
            json!([{"name": "Parser"}, "Storage", 3]),
        );
        assert_eq!(event.meta_components(), vec!["Parser", "Storage"]);
    }

    #[test]
    fn test_engagement_defaults_to_zero() {
        let event = IntegrationEvent::new("slack", EventType::Message, "hi");
        assert_eq!(event.reply_count(), 0);
        assert_eq!(event.reaction_count(), 0);
        assert_eq!(event.mention_count(), 0);
    }

    #[test]
    fn test_meta_timestamp_tolerates_all_shapes() {
        let iso = event_with("seen_at", json!("2026-03-01T12:00:00Z"));
        assert!(iso.meta_timestamp("seen_at").is_some());

        let secs = event_with("seen_at", json!(1_772_000_000));
        assert!(secs.meta_timestamp("seen_at").is_some());

        let millis = event_with("seen_at", json!(1_772_000_000_000i64));
        assert_eq!(
            millis.meta_timestamp("seen_at"),
            secs.meta_timestamp("seen_at")
        );

        let absent = IntegrationEvent::new("x", EventType::Custom, "t");
        assert!(absent.meta_timestamp("seen_at").is_none());
    }
}
