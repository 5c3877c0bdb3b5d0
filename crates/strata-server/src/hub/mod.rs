//! Realtime hub - connection registry, project rooms, fan-out
//!
//! All state is in-memory and volatile; nothing here survives a restart.
//! Each connection owns one transport and one FIFO outbound mailbox. Rooms
//! are per-project sets of connections. A user may hold several connections
//! at once; messages to an offline user queue in a bounded per-user buffer
//! and flush on their next connect, ahead of any new live traffic.
//!
//! Ordering: per-connection outbound is FIFO; across connections nothing is
//! guaranteed, and room broadcasts may arrive in different orders at
//! different connections.

pub mod messages;

pub use messages::{MessageType, NotificationLevel, RealtimeMessage};

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::sync::Notify;
use uuid::Uuid;

// ============================================================================
// TRANSPORT
// ============================================================================

/// Transport failure
#[derive(Debug, Clone, thiserror::Error)]
#[error("transport closed: {0}")]
pub struct TransportError(pub String);

/// One bidirectional client channel (a websocket, or a test double)
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Send one JSON frame to the client
    async fn send_frame(&self, frame: String) -> Result<(), TransportError>;

    /// Close the underlying channel
    async fn close(&self);
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Hub tunables
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Supervisor scan period
    pub heartbeat_interval: std::time::Duration,
    /// Connections silent longer than this are force-disconnected
    pub heartbeat_timeout: std::time::Duration,
    /// Per-user offline buffer size; oldest drops on overflow
    pub offline_queue_capacity: usize,
    /// Per-connection outbound mailbox size; oldest non-critical drops
    pub outbound_mailbox_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: std::time::Duration::from_secs(30),
            heartbeat_timeout: std::time::Duration::from_secs(60),
            offline_queue_capacity: 100,
            outbound_mailbox_capacity: 256,
        }
    }
}

// ============================================================================
// OUTBOX
// ============================================================================

/// Per-connection FIFO mailbox with a criticality-aware overflow policy
///
/// On overflow the oldest non-critical message drops; error frames and
/// warning-or-worse notifications are never dropped, even if that means
/// briefly exceeding capacity.
struct Outbox {
    queue: Mutex<VecDeque<RealtimeMessage>>,
    notify: Notify,
    capacity: usize,
    closed: AtomicBool,
}

impl Outbox {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity,
            closed: AtomicBool::new(false),
        }
    }

    fn push(&self, message: RealtimeMessage) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let Ok(mut queue) = self.queue.lock() else {
            return;
        };
        if queue.len() >= self.capacity {
            if let Some(position) = queue.iter().position(|m| !m.is_critical()) {
                queue.remove(position);
            }
        }
        queue.push_back(message);
        drop(queue);
        self.notify.notify_one();
    }

    async fn pop(&self) -> Option<RealtimeMessage> {
        loop {
            {
                let Ok(mut queue) = self.queue.lock() else {
                    return None;
                };
                if let Some(message) = queue.pop_front() {
                    return Some(message);
                }
                if self.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}

// ============================================================================
// CONNECTION STATE
// ============================================================================

struct ConnectionState {
    connection_id: String,
    user_id: String,
    project_id: Option<String>,
    connected_at: DateTime<Utc>,
    last_heartbeat: Mutex<DateTime<Utc>>,
    user_info: Map<String, Value>,
    outbox: Arc<Outbox>,
    transport: Arc<dyn Transport>,
}

impl ConnectionState {
    fn touch(&self) {
        if let Ok(mut heartbeat) = self.last_heartbeat.lock() {
            *heartbeat = Utc::now();
        }
    }

    fn last_heartbeat(&self) -> DateTime<Utc> {
        self.last_heartbeat
            .lock()
            .map(|h| *h)
            .unwrap_or_else(|_| Utc::now())
    }
}

// ============================================================================
// PRESENCE & STATS
// ============================================================================

/// One present user in a project room
#[derive(Debug, Clone, Serialize)]
pub struct PresenceUser {
    /// User handle
    pub user_id: String,
    /// Info supplied at connect time
    pub user_info: Map<String, Value>,
    /// When the connection opened
    pub connected_at: DateTime<Utc>,
    /// Last inbound activity
    pub last_activity: DateTime<Utc>,
}

/// Presence snapshot for a project
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProjectPresence {
    /// Present users
    pub users: Vec<PresenceUser>,
    /// Connection count
    pub count: usize,
}

/// Hub-wide counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct HubStats {
    /// Connections accepted since start
    pub total_connections: u64,
    /// Currently open connections
    pub active_connections: usize,
    /// Frames delivered to transports
    pub messages_sent: u64,
    /// Inbound frames dispatched
    pub messages_received: u64,
    /// Rooms with at least one connection
    pub rooms_active: usize,
    /// Users with queued offline messages
    pub offline_queues: usize,
}

// ============================================================================
// HUB
// ============================================================================

/// The realtime hub
pub struct RealtimeHub {
    config: HubConfig,
    connections: Mutex<HashMap<String, Arc<ConnectionState>>>,
    /// project -> member connection ids
    rooms: Mutex<HashMap<String, HashSet<String>>>,
    /// user -> connection ids
    user_connections: Mutex<HashMap<String, Vec<String>>>,
    /// user -> queued messages while offline
    offline: Mutex<HashMap<String, VecDeque<RealtimeMessage>>>,
    stats: Mutex<HubStats>,
}

impl RealtimeHub {
    /// Create a hub
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            connections: Mutex::new(HashMap::new()),
            rooms: Mutex::new(HashMap::new()),
            user_connections: Mutex::new(HashMap::new()),
            offline: Mutex::new(HashMap::new()),
            stats: Mutex::new(HubStats::default()),
        }
    }

    /// Accept a connection
    ///
    /// Registers the transport, joins the project room (announcing
    /// `user_joined` to peers), sends the connect confirmation, and flushes
    /// any queued offline messages for the user before new live traffic can
    /// reach this connection.
    pub fn connect(
        self: &Arc<Self>,
        transport: Arc<dyn Transport>,
        user_id: impl Into<String>,
        project_id: Option<String>,
        user_info: Map<String, Value>,
    ) -> String {
        let user_id = user_id.into();
        let connection_id = Uuid::new_v4().to_string();
        let state = Arc::new(ConnectionState {
            connection_id: connection_id.clone(),
            user_id: user_id.clone(),
            project_id: project_id.clone(),
            connected_at: Utc::now(),
            last_heartbeat: Mutex::new(Utc::now()),
            user_info,
            outbox: Arc::new(Outbox::new(self.config.outbound_mailbox_capacity)),
            transport,
        });

        self.spawn_drain(&state);

        if let Ok(mut connections) = self.connections.lock() {
            connections.insert(connection_id.clone(), state.clone());
        }

        // Confirmation goes out first on this connection's FIFO
        state.outbox.push(
            RealtimeMessage::system(MessageType::Connect, project_id.clone())
                .with_data("connection_id", json!(connection_id))
                .with_data("status", json!("connected"))
                .with_data("project_id", json!(project_id)),
        );

        // Register the user and drain their offline queue under one critical
        // section so no live message can slip in between
        {
            let Ok(mut user_connections) = self.user_connections.lock() else {
                return connection_id;
            };
            user_connections
                .entry(user_id.clone())
                .or_default()
                .push(connection_id.clone());
            if let Ok(mut offline) = self.offline.lock() {
                if let Some(queued) = offline.remove(&user_id) {
                    tracing::info!(
                        user = %user_id,
                        count = queued.len(),
                        "flushing offline messages"
                    );
                    for message in queued {
                        state.outbox.push(message);
                    }
                }
            }
        }

        if let Some(project) = &project_id {
            self.join_room(project, &connection_id, &state);
        }

        if let Ok(mut stats) = self.stats.lock() {
            stats.total_connections += 1;
            stats.active_connections = self
                .connections
                .lock()
                .map(|c| c.len())
                .unwrap_or_default();
        }

        tracing::info!(user = %state.user_id, connection = %connection_id, "user connected");
        connection_id
    }

    /// Tear down a connection: announce `user_left`, close the transport,
    /// destroy the room when it empties
    pub async fn disconnect(&self, connection_id: &str) {
        let Some(state) = self
            .connections
            .lock()
            .ok()
            .and_then(|mut connections| connections.remove(connection_id))
        else {
            return;
        };

        if let Ok(mut user_connections) = self.user_connections.lock() {
            if let Some(ids) = user_connections.get_mut(&state.user_id) {
                ids.retain(|id| id != connection_id);
                if ids.is_empty() {
                    user_connections.remove(&state.user_id);
                }
            }
        }

        if let Some(project) = &state.project_id {
            let emptied = {
                let Ok(mut rooms) = self.rooms.lock() else {
                    return;
                };
                match rooms.get_mut(project) {
                    Some(members) => {
                        members.remove(connection_id);
                        let emptied = members.is_empty();
                        if emptied {
                            rooms.remove(project);
                        }
                        emptied
                    }
                    None => false,
                }
            };
            if !emptied {
                self.broadcast_to_project(
                    project,
                    RealtimeMessage::system(MessageType::UserActivity, Some(project.clone()))
                        .with_data("activity", json!("user_left"))
                        .with_data("user_id", json!(state.user_id)),
                    None,
                );
            }
        }

        state.outbox.close();
        state.transport.close().await;

        if let Ok(mut stats) = self.stats.lock() {
            stats.active_connections = self
                .connections
                .lock()
                .map(|c| c.len())
                .unwrap_or_default();
        }
        tracing::info!(user = %state.user_id, connection = %connection_id, "user disconnected");
    }

    /// Enqueue a message to every room member, optionally excluding a user
    pub fn broadcast_to_project(
        &self,
        project_id: &str,
        message: RealtimeMessage,
        exclude_user: Option<&str>,
    ) {
        let member_ids: Vec<String> = match self.rooms.lock() {
            Ok(rooms) => rooms
                .get(project_id)
                .map(|members| members.iter().cloned().collect())
                .unwrap_or_default(),
            Err(_) => return,
        };
        let Ok(connections) = self.connections.lock() else {
            return;
        };
        for member_id in member_ids {
            let Some(state) = connections.get(&member_id) else {
                continue;
            };
            if exclude_user.is_some_and(|user| user == state.user_id) {
                continue;
            }
            state.outbox.push(message.clone());
        }
    }

    /// Deliver to a user's connections, or queue while they are offline
    ///
    /// The offline buffer is a bounded FIFO per user; the oldest message
    /// drops on overflow.
    pub fn send_to_user(&self, user_id: &str, message: RealtimeMessage) {
        let connection_ids: Vec<String> = self
            .user_connections
            .lock()
            .map(|users| users.get(user_id).cloned().unwrap_or_default())
            .unwrap_or_default();

        if connection_ids.is_empty() {
            if let Ok(mut offline) = self.offline.lock() {
                let queue = offline.entry(user_id.to_string()).or_default();
                if queue.len() >= self.config.offline_queue_capacity {
                    queue.pop_front();
                }
                queue.push_back(message);
                tracing::debug!(user = %user_id, "queued message for offline user");
            }
            return;
        }

        let Ok(connections) = self.connections.lock() else {
            return;
        };
        for connection_id in connection_ids {
            if let Some(state) = connections.get(&connection_id) {
                state.outbox.push(message.clone());
            }
        }
    }

    /// Dispatch one inbound frame from a connection
    ///
    /// Any inbound traffic counts as liveness. Heartbeats are echoed;
    /// activity, cursor, selection, file-change and AI-query frames
    /// rebroadcast to the sender's room.
    pub fn handle(&self, connection_id: &str, mut message: RealtimeMessage) {
        let Some(state) = self
            .connections
            .lock()
            .ok()
            .and_then(|connections| connections.get(connection_id).cloned())
        else {
            return;
        };
        state.touch();
        message.sender_id = state.user_id.clone();
        if message.project_id.is_none() {
            message.project_id = state.project_id.clone();
        }

        if let Ok(mut stats) = self.stats.lock() {
            stats.messages_received += 1;
        }

        match message.message_type {
            MessageType::Heartbeat => {
                state.outbox.push(
                    RealtimeMessage::system(MessageType::Heartbeat, None)
                        .with_data("status", json!("alive")),
                );
            }
            MessageType::UserActivity
            | MessageType::CursorPosition
            | MessageType::SelectionChange
            | MessageType::FileChange
            | MessageType::AiQuery => {
                if let Some(project) = message.project_id.clone() {
                    let sender = message.sender_id.clone();
                    self.broadcast_to_project(&project, message, Some(&sender));
                }
            }
            other => {
                tracing::debug!(connection = %connection_id, "unhandled inbound {:?}", other);
            }
        }
    }

    /// Force-disconnect connections silent past the heartbeat timeout
    ///
    /// Returns the ids that were dropped. Called by the supervisor every
    /// heartbeat interval.
    pub async fn disconnect_stale(&self, now: DateTime<Utc>) -> Vec<String> {
        let timeout = Duration::from_std(self.config.heartbeat_timeout)
            .unwrap_or_else(|_| Duration::seconds(60));
        let stale: Vec<String> = self
            .connections
            .lock()
            .map(|connections| {
                connections
                    .values()
                    .filter(|state| now - state.last_heartbeat() > timeout)
                    .map(|state| state.connection_id.clone())
                    .collect()
            })
            .unwrap_or_default();

        for connection_id in &stale {
            tracing::warn!(connection = %connection_id, "disconnecting stale connection");
            self.disconnect(connection_id).await;
        }
        stale
    }

    /// Spawn the heartbeat supervisor
    pub fn start_heartbeat_monitor(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let hub = Arc::downgrade(self);
        let interval = self.config.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // immediate first tick
            loop {
                ticker.tick().await;
                let Some(hub) = hub.upgrade() else {
                    break;
                };
                hub.disconnect_stale(Utc::now()).await;
            }
        })
    }

    /// Presence snapshot for a project room
    pub fn presence(&self, project_id: &str) -> ProjectPresence {
        let member_ids: Vec<String> = self
            .rooms
            .lock()
            .map(|rooms| {
                rooms
                    .get(project_id)
                    .map(|members| members.iter().cloned().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default();
        let Ok(connections) = self.connections.lock() else {
            return ProjectPresence::default();
        };
        let users: Vec<PresenceUser> = member_ids
            .iter()
            .filter_map(|id| connections.get(id))
            .map(|state| PresenceUser {
                user_id: state.user_id.clone(),
                user_info: state.user_info.clone(),
                connected_at: state.connected_at,
                last_activity: state.last_heartbeat(),
            })
            .collect();
        ProjectPresence {
            count: users.len(),
            users,
        }
    }

    /// Hub counters
    pub fn stats(&self) -> HubStats {
        let mut stats = self
            .stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default();
        stats.active_connections = self
            .connections
            .lock()
            .map(|c| c.len())
            .unwrap_or_default();
        stats.rooms_active = self.rooms.lock().map(|r| r.len()).unwrap_or_default();
        stats.offline_queues = self.offline.lock().map(|o| o.len()).unwrap_or_default();
        stats
    }

    /// Whether a user has at least one open connection
    pub fn is_online(&self, user_id: &str) -> bool {
        self.user_connections
            .lock()
            .map(|users| users.contains_key(user_id))
            .unwrap_or(false)
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    fn join_room(&self, project_id: &str, connection_id: &str, state: &Arc<ConnectionState>) {
        if let Ok(mut rooms) = self.rooms.lock() {
            rooms
                .entry(project_id.to_string())
                .or_default()
                .insert(connection_id.to_string());
        }
        self.broadcast_to_project(
            project_id,
            RealtimeMessage::system(MessageType::UserActivity, Some(project_id.to_string()))
                .with_data("activity", json!("user_joined"))
                .with_data("user_id", json!(state.user_id))
                .with_data("user_info", Value::Object(state.user_info.clone())),
            Some(&state.user_id),
        );
    }

    fn spawn_drain(self: &Arc<Self>, state: &Arc<ConnectionState>) {
        let outbox = state.outbox.clone();
        let transport = state.transport.clone();
        let connection_id = state.connection_id.clone();
        let hub: Weak<RealtimeHub> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(message) = outbox.pop().await {
                if let Err(e) = transport.send_frame(message.to_json()).await {
                    tracing::warn!(connection = %connection_id, "transport send failed: {}", e);
                    if let Some(hub) = hub.upgrade() {
                        hub.disconnect(&connection_id).await;
                    }
                    break;
                }
                if let Some(hub) = hub.upgrade() {
                    if let Ok(mut stats) = hub.stats.lock() {
                        stats.messages_sent += 1;
                    }
                }
            }
        });
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingTransport {
        frames: Mutex<Vec<RealtimeMessage>>,
        fail: AtomicBool,
    }

    impl RecordingTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                frames: Mutex::new(Vec::new()),
                fail: AtomicBool::new(false),
            })
        }

        fn frames(&self) -> Vec<RealtimeMessage> {
            self.frames.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Transport for RecordingTransport {
        async fn send_frame(&self, frame: String) -> Result<(), TransportError> {
            if self.fail.load(Ordering::Acquire) {
                return Err(TransportError("forced failure".into()));
            }
            let message: RealtimeMessage = serde_json::from_str(&frame)
                .map_err(|e| TransportError(e.to_string()))?;
            self.frames.lock().unwrap().push(message);
            Ok(())
        }

        async fn close(&self) {}
    }

    fn hub() -> Arc<RealtimeHub> {
        Arc::new(RealtimeHub::new(HubConfig {
            offline_queue_capacity: 3,
            outbound_mailbox_capacity: 4,
            ..HubConfig::default()
        }))
    }

    async fn drain_until(
        transport: &RecordingTransport,
        count: usize,
    ) -> Vec<RealtimeMessage> {
        for _ in 0..100 {
            if transport.frames().len() >= count {
                return transport.frames();
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        transport.frames()
    }

    #[tokio::test]
    async fn test_connect_confirms_and_announces() {
        let hub = hub();
        let alice_transport = RecordingTransport::new();
        hub.connect(
            alice_transport.clone(),
            "alice",
            Some("p1".to_string()),
            Map::new(),
        );
        let bob_transport = RecordingTransport::new();
        hub.connect(
            bob_transport.clone(),
            "bob",
            Some("p1".to_string()),
            Map::new(),
        );

        let alice_frames = drain_until(&alice_transport, 2).await;
        assert_eq!(alice_frames[0].message_type, MessageType::Connect);
        // Alice hears bob join; bob does not hear his own join
        let join = alice_frames
            .iter()
            .find(|m| m.data.get("activity") == Some(&json!("user_joined")))
            .expect("join announcement");
        assert_eq!(join.data["user_id"], json!("bob"));

        let bob_frames = drain_until(&bob_transport, 1).await;
        assert!(bob_frames
            .iter()
            .all(|m| m.data.get("activity") != Some(&json!("user_joined"))));
    }

    #[tokio::test]
    async fn test_offline_messages_flush_before_live_traffic() {
        let hub = hub();
        // Alice is offline: a mention queues
        hub.send_to_user(
            "alice",
            RealtimeMessage::system(MessageType::Mention, Some("p1".to_string()))
                .with_data("context", json!("@alice please review")),
        );
        assert_eq!(hub.stats().offline_queues, 1);

        // Alice connects, then a live message arrives immediately
        let transport = RecordingTransport::new();
        hub.connect(transport.clone(), "alice", Some("p1".to_string()), Map::new());
        hub.send_to_user(
            "alice",
            RealtimeMessage::system(MessageType::Notification, None)
                .with_data("kind", json!("live")),
        );

        let frames = drain_until(&transport, 3).await;
        let mention_pos = frames
            .iter()
            .position(|m| m.message_type == MessageType::Mention)
            .expect("queued mention delivered");
        let live_pos = frames
            .iter()
            .position(|m| m.message_type == MessageType::Notification)
            .expect("live message delivered");
        assert!(mention_pos < live_pos, "queued message must arrive first");
        assert_eq!(hub.stats().offline_queues, 0);
    }

    #[tokio::test]
    async fn test_offline_queue_drops_oldest_on_overflow() {
        let hub = hub();
        for i in 0..5 {
            hub.send_to_user(
                "carol",
                RealtimeMessage::system(MessageType::Notification, None)
                    .with_data("seq", json!(i)),
            );
        }
        let transport = RecordingTransport::new();
        hub.connect(transport.clone(), "carol", None, Map::new());
        let frames = drain_until(&transport, 4).await;
        let seqs: Vec<i64> = frames
            .iter()
            .filter_map(|m| m.data.get("seq").and_then(Value::as_i64))
            .collect();
        // Capacity 3: 0 and 1 fell off the front
        assert_eq!(seqs, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn test_broadcast_excludes_user() {
        let hub = hub();
        let alice = RecordingTransport::new();
        hub.connect(alice.clone(), "alice", Some("p1".to_string()), Map::new());
        let bob = RecordingTransport::new();
        hub.connect(bob.clone(), "bob", Some("p1".to_string()), Map::new());

        hub.broadcast_to_project(
            "p1",
            RealtimeMessage::system(MessageType::ProjectUpdate, Some("p1".to_string()))
                .with_data("what", json!("sync finished")),
            Some("alice"),
        );

        let bob_frames = drain_until(&bob, 2).await;
        assert!(bob_frames
            .iter()
            .any(|m| m.message_type == MessageType::ProjectUpdate));
        let alice_frames = alice.frames();
        assert!(alice_frames
            .iter()
            .all(|m| m.message_type != MessageType::ProjectUpdate));
    }

    #[tokio::test]
    async fn test_heartbeat_echo_and_activity_rebroadcast() {
        let hub = hub();
        let alice = RecordingTransport::new();
        let alice_id = hub.connect(alice.clone(), "alice", Some("p1".to_string()), Map::new());
        let bob = RecordingTransport::new();
        hub.connect(bob.clone(), "bob", Some("p1".to_string()), Map::new());

        hub.handle(
            &alice_id,
            RealtimeMessage::from_user(MessageType::Heartbeat, "alice", None),
        );
        let alice_frames = drain_until(&alice, 3).await;
        assert!(alice_frames
            .iter()
            .any(|m| m.message_type == MessageType::Heartbeat));

        hub.handle(
            &alice_id,
            RealtimeMessage::from_user(
                MessageType::CursorPosition,
                "alice",
                Some("p1".to_string()),
            )
            .with_data("line", json!(10)),
        );
        let bob_frames = drain_until(&bob, 2).await;
        let cursor = bob_frames
            .iter()
            .find(|m| m.message_type == MessageType::CursorPosition)
            .expect("cursor rebroadcast to peers");
        assert_eq!(cursor.sender_id, "alice");
        // The sender does not get their own cursor back
        assert!(alice
            .frames()
            .iter()
            .all(|m| m.message_type != MessageType::CursorPosition));
    }

    #[tokio::test]
    async fn test_stale_connections_disconnect() {
        let hub = hub();
        let transport = RecordingTransport::new();
        let connection_id =
            hub.connect(transport.clone(), "alice", Some("p1".to_string()), Map::new());
        assert!(hub.is_online("alice"));

        // Nothing stale yet
        assert!(hub.disconnect_stale(Utc::now()).await.is_empty());

        // Two minutes of silence exceeds the 60s timeout
        let later = Utc::now() + Duration::seconds(120);
        let dropped = hub.disconnect_stale(later).await;
        assert_eq!(dropped, vec![connection_id]);
        assert!(!hub.is_online("alice"));
        assert_eq!(hub.stats().active_connections, 0);
        assert_eq!(hub.stats().rooms_active, 0);
    }

    #[tokio::test]
    async fn test_inbound_counts_as_liveness() {
        let hub = hub();
        let transport = RecordingTransport::new();
        let connection_id = hub.connect(transport.clone(), "alice", None, Map::new());

        // Fresh inbound traffic resets the liveness clock
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        hub.handle(
            &connection_id,
            RealtimeMessage::from_user(MessageType::Heartbeat, "alice", None),
        );
        let t70 = Utc::now() + Duration::seconds(59);
        assert!(hub.disconnect_stale(t70).await.is_empty());
    }

    #[tokio::test]
    async fn test_mailbox_overflow_never_drops_critical() {
        let outbox = Outbox::new(3);
        outbox.push(
            RealtimeMessage::system(MessageType::Error, None).with_data("seq", json!(0)),
        );
        for i in 1..6 {
            outbox.push(
                RealtimeMessage::system(MessageType::CursorPosition, None)
                    .with_data("seq", json!(i)),
            );
        }
        // Error survives; oldest cursors dropped
        let kept: Vec<RealtimeMessage> =
            outbox.queue.lock().unwrap().iter().cloned().collect();
        assert!(kept.iter().any(|m| m.message_type == MessageType::Error));
        assert_eq!(kept.len(), 3);
        assert_eq!(kept.last().unwrap().data["seq"], json!(5));
    }

    #[tokio::test]
    async fn test_multiple_connections_per_user() {
        let hub = hub();
        let laptop = RecordingTransport::new();
        hub.connect(laptop.clone(), "alice", None, Map::new());
        let phone = RecordingTransport::new();
        hub.connect(phone.clone(), "alice", None, Map::new());

        hub.send_to_user(
            "alice",
            RealtimeMessage::system(MessageType::Notification, None)
                .with_data("kind", json!("both")),
        );
        let laptop_frames = drain_until(&laptop, 2).await;
        let phone_frames = drain_until(&phone, 2).await;
        assert!(laptop_frames
            .iter()
            .any(|m| m.message_type == MessageType::Notification));
        assert!(phone_frames
            .iter()
            .any(|m| m.message_type == MessageType::Notification));
    }

    #[tokio::test]
    async fn test_failing_transport_disconnects() {
        let hub = hub();
        let transport = RecordingTransport::new();
        transport.fail.store(true, Ordering::Release);
        hub.connect(transport.clone(), "alice", None, Map::new());

        // The connect confirmation fails to send; the drain loop tears the
        // connection down
        for _ in 0..100 {
            if !hub.is_online("alice") {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(!hub.is_online("alice"));
    }
}
