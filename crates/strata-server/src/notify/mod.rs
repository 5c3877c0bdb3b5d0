//! Live notifications - gating, channels, mentions
//!
//! Every notification passes three gates before delivery: user preferences
//! (channel enabled, priority threshold, quiet hours), a sliding one-hour
//! rate limit, and a five-minute duplicate collapse. Deliveries fan out on
//! each enabled channel: websocket via the hub, email/push via external
//! gateways, in-app as rows in the core store (pruned past 30 days).
//!
//! Delivery failures are logged and counted, never propagated to peers.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, OnceLock};

use chrono::{DateTime, Duration, NaiveTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use strata_core::{NotificationRecord, TimelineStore};

use crate::hub::{MessageType, NotificationLevel, RealtimeHub, RealtimeMessage};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Identical notifications within this window collapse to one
const DEDUP_WINDOW_MINUTES: i64 = 5;

/// Notifications older than this are pruned
const RETENTION_DAYS: i64 = 30;

/// Hourly prune cadence
const CLEANUP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(3600);

fn handle_mention_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@(\w+)").expect("static pattern compiles"))
}

fn bracket_mention_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@\[([^\]]+)\]").expect("static pattern compiles"))
}

// ============================================================================
// TYPES
// ============================================================================

/// Notification classification
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    /// An integration sync began
    SyncStarted,
    /// An integration sync finished
    SyncCompleted,
    /// An integration sync failed
    SyncFailed,
    /// New data was processed and indexed
    DataProcessed,
    /// An AI analysis finished
    AiAnalysisComplete,
    /// The user was mentioned
    Mention,
    /// Someone joined a project
    UserJoinedProject,
    /// Quota usage crossed a warning line
    QuotaWarning,
    /// A system error the user should know about
    SystemError,
}

impl NotificationType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::SyncStarted => "sync_started",
            NotificationType::SyncCompleted => "sync_completed",
            NotificationType::SyncFailed => "sync_failed",
            NotificationType::DataProcessed => "data_processed",
            NotificationType::AiAnalysisComplete => "ai_analysis_complete",
            NotificationType::Mention => "mention",
            NotificationType::UserJoinedProject => "user_joined_project",
            NotificationType::QuotaWarning => "quota_warning",
            NotificationType::SystemError => "system_error",
        }
    }
}

/// Delivery urgency, ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    /// Background information
    Low,
    /// Default priority
    Normal,
    /// Needs attention soon
    High,
    /// Delivered even during quiet hours and past rate limits
    Urgent,
}

/// Delivery channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    /// Realtime frame via the hub
    Websocket,
    /// Email gateway
    Email,
    /// Mobile push gateway
    Push,
    /// Persisted row readable from the notification feed
    InApp,
}

impl NotificationChannel {
    fn as_str(&self) -> &'static str {
        match self {
            NotificationChannel::Websocket => "websocket",
            NotificationChannel::Email => "email",
            NotificationChannel::Push => "push",
            NotificationChannel::InApp => "in_app",
        }
    }
}

/// A notification in flight
#[non_exhaustive]
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    /// Unique id
    pub id: String,
    /// Classification
    pub notification_type: NotificationType,
    /// Short title
    pub title: String,
    /// Body text
    pub message: String,
    /// Severity
    pub level: NotificationLevel,
    /// Urgency
    pub priority: NotificationPriority,
    /// Target user
    pub recipient_id: String,
    /// Project scope, when applicable
    pub project_id: Option<String>,
    /// Channels to attempt
    pub channels: Vec<NotificationChannel>,
    /// Structured payload
    pub data: Map<String, Value>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Optional expiry
    pub expires_at: Option<DateTime<Utc>>,
}

impl Notification {
    /// Build a notification with defaults filled in
    pub fn new(
        notification_type: NotificationType,
        recipient_id: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            notification_type,
            title: title.into(),
            message: message.into(),
            level: NotificationLevel::Info,
            priority: NotificationPriority::Normal,
            recipient_id: recipient_id.into(),
            project_id: None,
            channels: vec![NotificationChannel::Websocket, NotificationChannel::InApp],
            data: Map::new(),
            created_at: Utc::now(),
            expires_at: None,
        }
    }
}

/// Per-user notification preferences
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPreferences {
    /// Email deliveries enabled
    pub email_enabled: bool,
    /// Push deliveries enabled
    pub push_enabled: bool,
    /// Websocket deliveries enabled
    pub websocket_enabled: bool,
    /// Quiet hours start, "HH:MM"
    pub quiet_hours_start: Option<String>,
    /// Quiet hours end, "HH:MM"; may be before start (spans midnight)
    pub quiet_hours_end: Option<String>,
    /// Maximum non-urgent notifications per sliding hour
    pub frequency_limit: usize,
    /// Minimum priority delivered at all
    pub priority_threshold: NotificationPriority,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            email_enabled: true,
            push_enabled: true,
            websocket_enabled: true,
            quiet_hours_start: None,
            quiet_hours_end: None,
            frequency_limit: 10,
            priority_threshold: NotificationPriority::Low,
        }
    }
}

/// External email delivery (out of scope; a gateway oracle)
#[async_trait::async_trait]
pub trait EmailGateway: Send + Sync {
    /// Send one email; false on failure
    async fn send_email(&self, notification: &Notification) -> bool;
}

/// External push delivery (out of scope; a gateway oracle)
#[async_trait::async_trait]
pub trait PushGateway: Send + Sync {
    /// Send one push; false on failure
    async fn send_push(&self, notification: &Notification) -> bool;
}

// ============================================================================
// SERVICE
// ============================================================================

type DedupKey = (String, String, Option<String>, String);

/// The live notification service
pub struct NotificationService {
    hub: Arc<RealtimeHub>,
    store: Arc<TimelineStore>,
    preferences: Mutex<HashMap<String, NotificationPreferences>>,
    /// user -> delivery timestamps inside the sliding hour
    rate_windows: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
    /// (type, recipient, project, title) -> last delivery
    recent: Mutex<HashMap<DedupKey, DateTime<Utc>>>,
    email: Option<Arc<dyn EmailGateway>>,
    push: Option<Arc<dyn PushGateway>>,
}

impl NotificationService {
    /// Assemble the service
    pub fn new(
        hub: Arc<RealtimeHub>,
        store: Arc<TimelineStore>,
        email: Option<Arc<dyn EmailGateway>>,
        push: Option<Arc<dyn PushGateway>>,
    ) -> Self {
        Self {
            hub,
            store,
            preferences: Mutex::new(HashMap::new()),
            rate_windows: Mutex::new(HashMap::new()),
            recent: Mutex::new(HashMap::new()),
            email,
            push,
        }
    }

    /// Replace a user's preferences
    pub fn set_preferences(&self, user_id: &str, preferences: NotificationPreferences) {
        if let Ok(mut all) = self.preferences.lock() {
            all.insert(user_id.to_string(), preferences);
        }
    }

    fn preferences_for(&self, user_id: &str) -> NotificationPreferences {
        self.preferences
            .lock()
            .ok()
            .and_then(|all| all.get(user_id).cloned())
            .unwrap_or_default()
    }

    /// Send a notification through its gates and channels
    ///
    /// Returns true when at least one channel delivered.
    pub async fn send(&self, notification: Notification) -> bool {
        self.send_at(notification, Utc::now()).await
    }

    /// Send relative to an explicit clock (the gates are time-sensitive)
    pub async fn send_at(&self, notification: Notification, now: DateTime<Utc>) -> bool {
        let preferences = self.preferences_for(&notification.recipient_id);
        if !self.passes_gates(&notification, &preferences, now) {
            return false;
        }

        // Persist the in-app row first so the feed always has it
        let record = to_record(&notification);
        if let Err(e) = self.store.store_notification(&record) {
            tracing::warn!(notification = %notification.id, "in-app persist failed: {}", e);
        }

        let mut delivered = false;
        for channel in &notification.channels {
            let ok = match channel {
                NotificationChannel::Websocket => {
                    self.deliver_websocket(&notification);
                    true
                }
                NotificationChannel::Email => match &self.email {
                    Some(gateway) => gateway.send_email(&notification).await,
                    None => {
                        tracing::info!(
                            recipient = %notification.recipient_id,
                            "email gateway absent, skipping: {}",
                            notification.title
                        );
                        false
                    }
                },
                NotificationChannel::Push => match &self.push {
                    Some(gateway) => gateway.send_push(&notification).await,
                    None => {
                        tracing::info!(
                            recipient = %notification.recipient_id,
                            "push gateway absent, skipping: {}",
                            notification.title
                        );
                        false
                    }
                },
                NotificationChannel::InApp => true,
            };
            delivered |= ok;
        }

        self.mark_sent(&notification, now);
        tracing::debug!(
            notification = %notification.id,
            recipient = %notification.recipient_id,
            "notification dispatched"
        );
        delivered
    }

    // ========================================================================
    // GATES
    // ========================================================================

    fn passes_gates(
        &self,
        notification: &Notification,
        preferences: &NotificationPreferences,
        now: DateTime<Utc>,
    ) -> bool {
        // Gate 1: preferences
        if notification
            .channels
            .contains(&NotificationChannel::Websocket)
            && !preferences.websocket_enabled
        {
            return false;
        }
        if notification.priority < preferences.priority_threshold {
            return false;
        }
        if in_quiet_hours(preferences, now)
            && notification.priority != NotificationPriority::Urgent
        {
            return false;
        }

        // Gate 2: sliding one-hour rate limit; urgent bypasses
        if notification.priority != NotificationPriority::Urgent
            && self.is_rate_limited(&notification.recipient_id, preferences, now)
        {
            tracing::debug!(
                recipient = %notification.recipient_id,
                "notification suppressed by rate limit"
            );
            return false;
        }

        // Gate 3: five-minute duplicate collapse
        let key = dedup_key(notification);
        if let Ok(recent) = self.recent.lock() {
            if let Some(last) = recent.get(&key) {
                if now - *last < Duration::minutes(DEDUP_WINDOW_MINUTES) {
                    return false;
                }
            }
        }
        true
    }

    fn is_rate_limited(
        &self,
        user_id: &str,
        preferences: &NotificationPreferences,
        now: DateTime<Utc>,
    ) -> bool {
        let Ok(mut windows) = self.rate_windows.lock() else {
            return false;
        };
        let window = windows.entry(user_id.to_string()).or_default();
        let hour_ago = now - Duration::hours(1);
        while window.front().is_some_and(|t| *t < hour_ago) {
            window.pop_front();
        }
        window.len() >= preferences.frequency_limit
    }

    fn mark_sent(&self, notification: &Notification, now: DateTime<Utc>) {
        if let Ok(mut windows) = self.rate_windows.lock() {
            windows
                .entry(notification.recipient_id.clone())
                .or_default()
                .push_back(now);
        }
        if let Ok(mut recent) = self.recent.lock() {
            recent.insert(dedup_key(notification), now);
            // Bound the map: forget entries past the dedup window
            recent.retain(|_, t| now - *t < Duration::minutes(DEDUP_WINDOW_MINUTES));
        }
    }

    fn deliver_websocket(&self, notification: &Notification) {
        let message = RealtimeMessage::system(
            MessageType::Notification,
            notification.project_id.clone(),
        )
        .with_data("notification_id", json!(notification.id))
        .with_data("notification_type", json!(notification.notification_type.as_str()))
        .with_data("title", json!(notification.title))
        .with_data("message", json!(notification.message))
        .with_data("data", Value::Object(notification.data.clone()))
        .with_metadata("notification_level", json!(notification.level))
        .with_metadata("priority", json!(notification.priority));
        self.hub.send_to_user(&notification.recipient_id, message);
    }

    // ========================================================================
    // BUILT-IN HANDLERS
    // ========================================================================

    /// A sync began
    pub async fn notify_sync_started(&self, project_id: &str, integration: &str, user_id: &str) {
        let mut notification = Notification::new(
            NotificationType::SyncStarted,
            user_id,
            format!("{integration} sync started"),
            format!("Synchronization with {integration} has begun"),
        );
        notification.priority = NotificationPriority::Low;
        notification.project_id = Some(project_id.to_string());
        notification
            .data
            .insert("integration".to_string(), json!(integration));
        self.send(notification).await;
        self.broadcast_sync_status(project_id, integration, "started", 0.0, "Sync started");
    }

    /// A sync finished
    pub async fn notify_sync_completed(
        &self,
        project_id: &str,
        integration: &str,
        user_id: &str,
        items_processed: usize,
        duration_secs: f64,
    ) {
        let mut notification = Notification::new(
            NotificationType::SyncCompleted,
            user_id,
            format!("{integration} sync complete"),
            format!("Processed {items_processed} items in {duration_secs:.1}s"),
        );
        notification.level = NotificationLevel::Success;
        notification.project_id = Some(project_id.to_string());
        notification
            .data
            .insert("items_processed".to_string(), json!(items_processed));
        self.send(notification).await;
        self.broadcast_sync_status(
            project_id,
            integration,
            "completed",
            100.0,
            &format!("Completed - {items_processed} items processed"),
        );
    }

    /// A sync failed; email joins the channel set
    pub async fn notify_sync_failed(
        &self,
        project_id: &str,
        integration: &str,
        user_id: &str,
        error: &str,
    ) {
        let mut notification = Notification::new(
            NotificationType::SyncFailed,
            user_id,
            format!("{integration} sync failed"),
            format!("Sync failed: {error}"),
        );
        notification.level = NotificationLevel::Error;
        notification.priority = NotificationPriority::High;
        notification.project_id = Some(project_id.to_string());
        notification.channels.push(NotificationChannel::Email);
        notification.data.insert("error".to_string(), json!(error));
        self.send(notification).await;
        self.broadcast_sync_status(
            project_id,
            integration,
            "failed",
            0.0,
            &format!("Failed: {error}"),
        );
    }

    /// Data is searchable now
    pub async fn notify_data_processed(
        &self,
        project_id: &str,
        source: &str,
        items_count: usize,
        user_ids: &[String],
    ) {
        for user_id in user_ids {
            let mut notification = Notification::new(
                NotificationType::DataProcessed,
                user_id,
                "New data available",
                format!("{items_count} new items from {source} are now searchable"),
            );
            notification.priority = NotificationPriority::Low;
            notification.project_id = Some(project_id.to_string());
            notification.data.insert("source".to_string(), json!(source));
            self.send(notification).await;
        }
    }

    /// An AI analysis finished
    pub async fn notify_ai_analysis_complete(
        &self,
        project_id: &str,
        user_id: &str,
        analysis_type: &str,
        insights_count: usize,
    ) {
        let mut notification = Notification::new(
            NotificationType::AiAnalysisComplete,
            user_id,
            "AI analysis complete",
            format!("{analysis_type} analysis generated {insights_count} new insights"),
        );
        notification.level = NotificationLevel::Success;
        notification.project_id = Some(project_id.to_string());
        self.send(notification).await;
    }

    /// A user was mentioned; email joins the channel set and a realtime
    /// mention frame goes out alongside the notification
    pub async fn notify_mention(
        &self,
        mentioned_user_id: &str,
        mentioning_user_id: &str,
        project_id: &str,
        context: &str,
        location: &str,
    ) {
        let mut notification = Notification::new(
            NotificationType::Mention,
            mentioned_user_id,
            "You were mentioned",
            format!("You were mentioned by {mentioning_user_id} in {location}"),
        );
        notification.priority = NotificationPriority::High;
        notification.project_id = Some(project_id.to_string());
        notification.channels.push(NotificationChannel::Email);
        notification
            .data
            .insert("mentioned_by".to_string(), json!(mentioning_user_id));
        notification
            .data
            .insert("location".to_string(), json!(location));
        self.send(notification).await;

        self.hub.send_to_user(
            mentioned_user_id,
            RealtimeMessage::from_user(
                MessageType::Mention,
                mentioning_user_id,
                Some(project_id.to_string()),
            )
            .with_data("context", json!(context))
            .with_data("location", json!(location)),
        );
    }

    /// Someone joined the project
    pub async fn notify_user_joined_project(
        &self,
        project_id: &str,
        new_user_id: &str,
        existing_user_ids: &[String],
    ) {
        for user_id in existing_user_ids {
            let mut notification = Notification::new(
                NotificationType::UserJoinedProject,
                user_id,
                "New team member",
                "A new member has joined the project",
            );
            notification.priority = NotificationPriority::Low;
            notification.project_id = Some(project_id.to_string());
            notification
                .data
                .insert("new_user_id".to_string(), json!(new_user_id));
            self.send(notification).await;
        }
    }

    /// Quota warning; email joins the channel set
    pub async fn notify_quota_warning(
        &self,
        user_id: &str,
        quota_type: &str,
        usage_percentage: f64,
    ) {
        let mut notification = Notification::new(
            NotificationType::QuotaWarning,
            user_id,
            "Quota warning",
            format!("Your {quota_type} usage is at {usage_percentage:.0}%"),
        );
        notification.level = NotificationLevel::Warning;
        notification.priority = NotificationPriority::High;
        notification.channels.push(NotificationChannel::Email);
        self.send(notification).await;
    }

    /// A system error the user must see; urgent, so it passes every gate
    pub async fn notify_system_error(
        &self,
        user_id: &str,
        error_type: &str,
        error_message: &str,
        project_id: Option<&str>,
    ) {
        let mut notification = Notification::new(
            NotificationType::SystemError,
            user_id,
            format!("System error: {error_type}"),
            error_message.to_string(),
        );
        notification.level = NotificationLevel::Error;
        notification.priority = NotificationPriority::Urgent;
        notification.project_id = project_id.map(str::to_string);
        self.send(notification).await;
    }

    // ========================================================================
    // MENTIONS
    // ========================================================================

    /// Detect mentions in user-generated text and notify each mentioned user
    ///
    /// Recognizes `@handle` and `@[Full Name]`; the author never gets a
    /// notification for mentioning themselves.
    pub async fn detect_mentions(
        &self,
        content: &str,
        project_id: &str,
        author_id: &str,
        location: &str,
    ) -> Vec<String> {
        let mut mentioned = Vec::new();
        for capture in bracket_mention_re()
            .captures_iter(content)
            .chain(handle_mention_re().captures_iter(content))
        {
            let user = capture[1].trim().to_string();
            if user.is_empty() || user == author_id || mentioned.contains(&user) {
                continue;
            }
            mentioned.push(user);
        }
        for user in &mentioned {
            self.notify_mention(user, author_id, project_id, content, location)
                .await;
        }
        mentioned
    }

    // ========================================================================
    // HISTORY & CLEANUP
    // ========================================================================

    /// A user's notification feed
    pub fn list(
        &self,
        user_id: &str,
        unread_only: bool,
        limit: usize,
    ) -> Vec<NotificationRecord> {
        self.store
            .list_notifications(user_id, unread_only, limit)
            .unwrap_or_else(|e| {
                tracing::warn!("notification list failed: {}", e);
                Vec::new()
            })
    }

    /// Mark one notification read
    pub fn mark_read(&self, notification_id: &str, user_id: &str) -> bool {
        self.store
            .mark_notification_read(notification_id, user_id)
            .unwrap_or(false)
    }

    /// Mark everything read; returns how many changed
    pub fn mark_all_read(&self, user_id: &str) -> usize {
        self.store
            .mark_all_notifications_read(user_id)
            .unwrap_or(0)
    }

    /// Spawn the hourly pruning task (rows older than 30 days)
    pub fn start_cleanup(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let service = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(service) = service.upgrade() else {
                    break;
                };
                let cutoff = Utc::now() - Duration::days(RETENTION_DAYS);
                match service.store.prune_notifications(cutoff) {
                    Ok(removed) if removed > 0 => {
                        tracing::info!(removed, "pruned old notifications")
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!("notification pruning failed: {}", e),
                }
            }
        })
    }

    fn broadcast_sync_status(
        &self,
        project_id: &str,
        integration: &str,
        status: &str,
        progress: f64,
        text: &str,
    ) {
        self.hub.broadcast_to_project(
            project_id,
            RealtimeMessage::system(MessageType::SyncStatus, Some(project_id.to_string()))
                .with_data("integration", json!(integration))
                .with_data("status", json!(status))
                .with_data("progress", json!(progress))
                .with_data("message", json!(text)),
            None,
        );
    }
}

fn dedup_key(notification: &Notification) -> DedupKey {
    (
        notification.notification_type.as_str().to_string(),
        notification.recipient_id.clone(),
        notification.project_id.clone(),
        notification.title.clone(),
    )
}

fn to_record(notification: &Notification) -> NotificationRecord {
    NotificationRecord {
        notification_id: notification.id.clone(),
        notification_type: notification.notification_type.as_str().to_string(),
        title: notification.title.clone(),
        message: notification.message.clone(),
        level: format!("{:?}", notification.level).to_lowercase(),
        priority: format!("{:?}", notification.priority).to_lowercase(),
        recipient_id: notification.recipient_id.clone(),
        project_id: notification.project_id.clone(),
        channels: notification
            .channels
            .iter()
            .map(|c| c.as_str().to_string())
            .collect(),
        data: notification.data.clone(),
        created_at: notification.created_at,
        read: false,
        read_at: None,
        expires_at: notification.expires_at,
    }
}

fn in_quiet_hours(preferences: &NotificationPreferences, now: DateTime<Utc>) -> bool {
    let (Some(start), Some(end)) = (
        preferences.quiet_hours_start.as_deref(),
        preferences.quiet_hours_end.as_deref(),
    ) else {
        return false;
    };
    let (Ok(start), Ok(end)) = (
        NaiveTime::parse_from_str(start, "%H:%M"),
        NaiveTime::parse_from_str(end, "%H:%M"),
    ) else {
        return false;
    };
    let current = now.time();
    if start <= end {
        current >= start && current <= end
    } else {
        // Quiet hours span midnight
        current >= start || current <= end
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;
    use strata_core::{GraphStore, RetentionDays, VectorIndex};

    use crate::hub::HubConfig;

    struct Fixture {
        service: Arc<NotificationService>,
        hub: Arc<RealtimeHub>,
        store: Arc<TimelineStore>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            TimelineStore::new(
                Some(dir.path().join("test.db")),
                RetentionDays::default(),
                7,
                Arc::new(VectorIndex::new()),
                Arc::new(GraphStore::new()),
            )
            .unwrap(),
        );
        let hub = Arc::new(RealtimeHub::new(HubConfig::default()));
        let service = Arc::new(NotificationService::new(hub.clone(), store.clone(), None, None));
        Fixture {
            service,
            hub,
            store,
            _dir: dir,
        }
    }

    fn notification(title: &str, priority: NotificationPriority) -> Notification {
        let mut n = Notification::new(
            NotificationType::DataProcessed,
            "alice",
            title,
            "body",
        );
        n.priority = priority;
        n
    }

    fn at_hour(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, hour, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_rate_limit_allows_ten_then_urgent_bypasses() {
        let f = fixture();
        let now = at_hour(12);

        let mut delivered = 0;
        for i in 0..12 {
            if f.service
                .send_at(
                    notification(&format!("update {i}"), NotificationPriority::Normal),
                    now,
                )
                .await
            {
                delivered += 1;
            }
        }
        assert_eq!(delivered, 10);

        // The 13th, urgent, lands regardless
        assert!(
            f.service
                .send_at(notification("urgent!", NotificationPriority::Urgent), now)
                .await
        );
    }

    #[tokio::test]
    async fn test_rate_window_slides() {
        let f = fixture();
        let noon = at_hour(12);
        for i in 0..10 {
            f.service
                .send_at(
                    notification(&format!("n{i}"), NotificationPriority::Normal),
                    noon,
                )
                .await;
        }
        assert!(
            !f.service
                .send_at(notification("blocked", NotificationPriority::Normal), noon)
                .await
        );
        // 61 minutes later the window has emptied
        let later = noon + Duration::minutes(61);
        assert!(
            f.service
                .send_at(notification("fresh", NotificationPriority::Normal), later)
                .await
        );
    }

    #[tokio::test]
    async fn test_duplicate_collapse_within_five_minutes() {
        let f = fixture();
        let now = at_hour(9);
        assert!(
            f.service
                .send_at(notification("same thing", NotificationPriority::Normal), now)
                .await
        );
        assert!(
            !f.service
                .send_at(notification("same thing", NotificationPriority::Normal), now)
                .await
        );
        // Past the window it goes through again
        let later = now + Duration::minutes(6);
        assert!(
            f.service
                .send_at(notification("same thing", NotificationPriority::Normal), later)
                .await
        );
    }

    #[tokio::test]
    async fn test_quiet_hours_span_midnight() {
        let f = fixture();
        f.service.set_preferences(
            "alice",
            NotificationPreferences {
                quiet_hours_start: Some("22:00".to_string()),
                quiet_hours_end: Some("06:00".to_string()),
                ..NotificationPreferences::default()
            },
        );

        // 23:00 is quiet: normal suppressed, urgent delivered
        assert!(
            !f.service
                .send_at(notification("late", NotificationPriority::Normal), at_hour(23))
                .await
        );
        assert!(
            f.service
                .send_at(notification("fire", NotificationPriority::Urgent), at_hour(23))
                .await
        );
        // 05:00 is still quiet (span crosses midnight)
        assert!(
            !f.service
                .send_at(notification("early", NotificationPriority::Normal), at_hour(5))
                .await
        );
        // Noon is not quiet
        assert!(
            f.service
                .send_at(notification("midday", NotificationPriority::Normal), at_hour(12))
                .await
        );
    }

    #[tokio::test]
    async fn test_priority_threshold() {
        let f = fixture();
        f.service.set_preferences(
            "alice",
            NotificationPreferences {
                priority_threshold: NotificationPriority::High,
                ..NotificationPreferences::default()
            },
        );
        assert!(
            !f.service
                .send_at(notification("meh", NotificationPriority::Normal), at_hour(10))
                .await
        );
        assert!(
            f.service
                .send_at(notification("big", NotificationPriority::High), at_hour(10))
                .await
        );
    }

    #[tokio::test]
    async fn test_websocket_disabled_suppresses() {
        let f = fixture();
        f.service.set_preferences(
            "alice",
            NotificationPreferences {
                websocket_enabled: false,
                ..NotificationPreferences::default()
            },
        );
        assert!(
            !f.service
                .send_at(notification("hi", NotificationPriority::Normal), at_hour(10))
                .await
        );
    }

    #[tokio::test]
    async fn test_mention_detection_excludes_author() {
        let f = fixture();
        let mentioned = f
            .service
            .detect_mentions(
                "@alice and @[Bob Smith] please review, cc @carol",
                "p1",
                "carol",
                "comment",
            )
            .await;
        assert_eq!(mentioned, vec!["Bob Smith".to_string(), "alice".to_string()]);

        // Each mention produced an in-app row
        assert_eq!(f.service.list("alice", true, 10).len(), 1);
        assert_eq!(f.service.list("Bob Smith", true, 10).len(), 1);
        assert!(f.service.list("carol", true, 10).is_empty());
    }

    #[tokio::test]
    async fn test_offline_mention_queues_in_hub() {
        let f = fixture();
        // Nobody is connected: both the notification frame and the mention
        // frame queue offline
        f.service
            .notify_mention("alice", "bob", "p1", "@alice please review", "comment")
            .await;
        assert_eq!(f.hub.stats().offline_queues, 1);
        // And the feed row exists regardless of connectivity
        assert_eq!(f.service.list("alice", true, 10).len(), 1);
    }

    #[tokio::test]
    async fn test_read_tracking() {
        let f = fixture();
        f.service
            .send_at(notification("to read", NotificationPriority::Normal), at_hour(8))
            .await;
        let feed = f.service.list("alice", true, 10);
        assert_eq!(feed.len(), 1);
        assert!(f.service.mark_read(&feed[0].notification_id, "alice"));
        assert!(f.service.list("alice", true, 10).is_empty());
        assert_eq!(f.service.list("alice", false, 10).len(), 1);
    }

    #[tokio::test]
    async fn test_sync_failure_includes_email_channel() {
        let f = fixture();
        f.service
            .notify_sync_failed("p1", "github", "alice", "token expired")
            .await;
        let feed = f.service.list("alice", false, 10);
        assert_eq!(feed.len(), 1);
        assert!(feed[0].channels.contains(&"email".to_string()));
        // Stored row survives in the store directly too
        assert_eq!(f.store.list_notifications("alice", false, 10).unwrap().len(), 1);
    }
}
