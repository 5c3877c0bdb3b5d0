//! Collaboration state - cursors, selections, insights, comments
//!
//! Volatile per-project state, never persisted. Every mutation is published
//! to the project room through the hub; selection text is truncated to 100
//! characters on the wire. Comments run through mention detection so the
//! mentioned users get notified.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::hub::{MessageType, RealtimeHub, RealtimeMessage};
use crate::notify::NotificationService;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Selection text is clipped to this many characters on the wire
pub const SELECTION_WIRE_LIMIT: usize = 100;

// ============================================================================
// TYPES
// ============================================================================

/// A user's cursor position
#[derive(Debug, Clone, Serialize)]
pub struct CursorPosition {
    /// The user
    pub user_id: String,
    /// File path
    pub file_path: String,
    /// Line number
    pub line: u32,
    /// Column number
    pub column: u32,
    /// Last update
    pub timestamp: DateTime<Utc>,
}

/// A user's text selection
#[derive(Debug, Clone, Serialize)]
pub struct TextSelection {
    /// The user
    pub user_id: String,
    /// File path
    pub file_path: String,
    /// Selection start line
    pub start_line: u32,
    /// Selection start column
    pub start_column: u32,
    /// Selection end line
    pub end_line: u32,
    /// Selection end column
    pub end_column: u32,
    /// Selected text (full copy; clipped on the wire)
    pub selected_text: String,
    /// Last update
    pub timestamp: DateTime<Utc>,
}

/// A shared AI insight
#[derive(Debug, Clone, Serialize)]
pub struct SharedInsight {
    /// Insight id
    pub insight_id: String,
    /// Who shared it
    pub shared_by: String,
    /// Title
    pub title: String,
    /// Body
    pub content: String,
    /// Kind label
    pub insight_type: String,
    /// Share time
    pub shared_at: DateTime<Utc>,
    /// Tags
    pub tags: Vec<String>,
    /// reaction -> users who reacted
    pub reactions: HashMap<String, Vec<String>>,
}

/// A collaborative comment with a reply tree
#[derive(Debug, Clone, Serialize)]
pub struct CollaborativeComment {
    /// Comment id
    pub comment_id: String,
    /// Author
    pub author_id: String,
    /// Body
    pub content: String,
    /// Anchoring context (file path, line number, ...)
    pub context: Map<String, Value>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Child comment ids
    pub replies: Vec<String>,
    /// Users mentioned in the body
    pub mentions: Vec<String>,
    /// Whether the thread is resolved
    pub resolved: bool,
}

/// A shared AI query session
#[derive(Debug, Clone, Serialize)]
pub struct AiSession {
    /// Session id
    pub session_id: String,
    /// Who is driving
    pub user_id: String,
    /// The query
    pub query: String,
    /// Start time
    pub started_at: DateTime<Utc>,
}

/// Full collaboration snapshot for a project
#[derive(Debug, Clone, Default, Serialize)]
pub struct CollaborationSnapshot {
    /// user -> cursor
    pub cursors: HashMap<String, CursorPosition>,
    /// user -> selection
    pub selections: HashMap<String, TextSelection>,
    /// file -> collaborating users
    pub file_collaborators: HashMap<String, Vec<String>>,
    /// Shared insights
    pub insights: Vec<SharedInsight>,
    /// Comments
    pub comments: Vec<CollaborativeComment>,
    /// Active AI sessions
    pub ai_sessions: Vec<AiSession>,
}

#[derive(Default)]
struct ProjectState {
    cursors: HashMap<String, CursorPosition>,
    selections: HashMap<String, TextSelection>,
    file_collaborators: HashMap<String, HashSet<String>>,
    insights: HashMap<String, SharedInsight>,
    comments: HashMap<String, CollaborativeComment>,
    ai_sessions: HashMap<String, AiSession>,
}

// ============================================================================
// SERVICE
// ============================================================================

/// The collaboration service
pub struct Collaboration {
    hub: Arc<RealtimeHub>,
    notifications: Arc<NotificationService>,
    projects: Mutex<HashMap<String, ProjectState>>,
}

impl Collaboration {
    /// Assemble the service
    pub fn new(hub: Arc<RealtimeHub>, notifications: Arc<NotificationService>) -> Self {
        Self {
            hub,
            notifications,
            projects: Mutex::new(HashMap::new()),
        }
    }

    fn with_project<T>(&self, project_id: &str, f: impl FnOnce(&mut ProjectState) -> T) -> T {
        let mut projects = match self.projects.lock() {
            Ok(projects) => projects,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(projects.entry(project_id.to_string()).or_default())
    }

    /// Update and broadcast a user's cursor
    pub fn update_cursor(
        &self,
        user_id: &str,
        project_id: &str,
        file_path: &str,
        line: u32,
        column: u32,
    ) {
        let cursor = CursorPosition {
            user_id: user_id.to_string(),
            file_path: file_path.to_string(),
            line,
            column,
            timestamp: Utc::now(),
        };
        self.with_project(project_id, |state| {
            state
                .file_collaborators
                .entry(file_path.to_string())
                .or_default()
                .insert(user_id.to_string());
            state.cursors.insert(user_id.to_string(), cursor);
        });

        self.hub.broadcast_to_project(
            project_id,
            RealtimeMessage::from_user(
                MessageType::CursorPosition,
                user_id,
                Some(project_id.to_string()),
            )
            .with_data("file_path", json!(file_path))
            .with_data("line", json!(line))
            .with_data("column", json!(column)),
            Some(user_id),
        );
    }

    /// Update and broadcast a user's selection (wire text clipped)
    #[allow(clippy::too_many_arguments)]
    pub fn update_selection(
        &self,
        user_id: &str,
        project_id: &str,
        file_path: &str,
        start_line: u32,
        start_column: u32,
        end_line: u32,
        end_column: u32,
        selected_text: &str,
    ) {
        let selection = TextSelection {
            user_id: user_id.to_string(),
            file_path: file_path.to_string(),
            start_line,
            start_column,
            end_line,
            end_column,
            selected_text: selected_text.to_string(),
            timestamp: Utc::now(),
        };
        self.with_project(project_id, |state| {
            state.selections.insert(user_id.to_string(), selection);
        });

        let wire_text: String = selected_text.chars().take(SELECTION_WIRE_LIMIT).collect();
        self.hub.broadcast_to_project(
            project_id,
            RealtimeMessage::from_user(
                MessageType::SelectionChange,
                user_id,
                Some(project_id.to_string()),
            )
            .with_data("file_path", json!(file_path))
            .with_data("start_line", json!(start_line))
            .with_data("start_column", json!(start_column))
            .with_data("end_line", json!(end_line))
            .with_data("end_column", json!(end_column))
            .with_data("selected_text", json!(wire_text)),
            Some(user_id),
        );
    }

    /// Share an AI query with the room
    pub fn share_ai_query(&self, user_id: &str, project_id: &str, query: &str) -> String {
        let session_id = Uuid::new_v4().to_string();
        let session = AiSession {
            session_id: session_id.clone(),
            user_id: user_id.to_string(),
            query: query.to_string(),
            started_at: Utc::now(),
        };
        self.with_project(project_id, |state| {
            state.ai_sessions.insert(session_id.clone(), session);
        });
        self.hub.broadcast_to_project(
            project_id,
            RealtimeMessage::from_user(MessageType::AiQuery, user_id, Some(project_id.to_string()))
                .with_data("session_id", json!(session_id))
                .with_data("query", json!(query)),
            Some(user_id),
        );
        session_id
    }

    /// Share an insight with the room
    pub fn share_insight(
        &self,
        user_id: &str,
        project_id: &str,
        title: &str,
        content: &str,
        insight_type: &str,
        tags: Vec<String>,
    ) -> String {
        let insight_id = Uuid::new_v4().to_string();
        let insight = SharedInsight {
            insight_id: insight_id.clone(),
            shared_by: user_id.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            insight_type: insight_type.to_string(),
            shared_at: Utc::now(),
            tags,
            reactions: HashMap::new(),
        };
        self.with_project(project_id, |state| {
            state.insights.insert(insight_id.clone(), insight);
        });
        self.hub.broadcast_to_project(
            project_id,
            RealtimeMessage::from_user(
                MessageType::UserActivity,
                user_id,
                Some(project_id.to_string()),
            )
            .with_data("activity", json!("insight_shared"))
            .with_data("insight_id", json!(insight_id))
            .with_data("title", json!(title)),
            Some(user_id),
        );
        insight_id
    }

    /// React to a shared insight; repeated reactions by one user are ignored
    pub fn react_to_insight(
        &self,
        user_id: &str,
        project_id: &str,
        insight_id: &str,
        reaction: &str,
    ) -> bool {
        let updated = self.with_project(project_id, |state| {
            let Some(insight) = state.insights.get_mut(insight_id) else {
                return false;
            };
            let users = insight.reactions.entry(reaction.to_string()).or_default();
            if users.iter().any(|u| u == user_id) {
                return false;
            }
            users.push(user_id.to_string());
            true
        });
        if updated {
            self.hub.broadcast_to_project(
                project_id,
                RealtimeMessage::from_user(
                    MessageType::UserActivity,
                    user_id,
                    Some(project_id.to_string()),
                )
                .with_data("activity", json!("insight_reaction"))
                .with_data("insight_id", json!(insight_id))
                .with_data("reaction", json!(reaction)),
                Some(user_id),
            );
        }
        updated
    }

    /// Add a top-level comment; mentions inside it are detected and notified
    pub async fn add_comment(
        &self,
        author_id: &str,
        project_id: &str,
        content: &str,
        context: Map<String, Value>,
    ) -> String {
        let comment_id = Uuid::new_v4().to_string();
        let mentions = self
            .notifications
            .detect_mentions(content, project_id, author_id, "comment")
            .await;
        let comment = CollaborativeComment {
            comment_id: comment_id.clone(),
            author_id: author_id.to_string(),
            content: content.to_string(),
            context,
            created_at: Utc::now(),
            replies: Vec::new(),
            mentions,
            resolved: false,
        };
        self.with_project(project_id, |state| {
            state.comments.insert(comment_id.clone(), comment);
        });
        self.hub.broadcast_to_project(
            project_id,
            RealtimeMessage::from_user(
                MessageType::UserActivity,
                author_id,
                Some(project_id.to_string()),
            )
            .with_data("activity", json!("comment_added"))
            .with_data("comment_id", json!(comment_id)),
            Some(author_id),
        );
        comment_id
    }

    /// Reply to an existing comment; `None` when the parent does not exist
    pub async fn reply_to_comment(
        &self,
        author_id: &str,
        project_id: &str,
        parent_id: &str,
        content: &str,
    ) -> Option<String> {
        let exists = self.with_project(project_id, |state| state.comments.contains_key(parent_id));
        if !exists {
            return None;
        }
        let reply_id = self
            .add_comment(author_id, project_id, content, Map::new())
            .await;
        self.with_project(project_id, |state| {
            if let Some(parent) = state.comments.get_mut(parent_id) {
                parent.replies.push(reply_id.clone());
            }
        });
        Some(reply_id)
    }

    /// Mark a comment thread resolved
    pub fn resolve_comment(&self, project_id: &str, comment_id: &str) -> bool {
        self.with_project(project_id, |state| {
            match state.comments.get_mut(comment_id) {
                Some(comment) => {
                    comment.resolved = true;
                    true
                }
                None => false,
            }
        })
    }

    /// Users currently collaborating on a file
    pub fn file_collaborators(&self, project_id: &str, file_path: &str) -> Vec<String> {
        self.with_project(project_id, |state| {
            state
                .file_collaborators
                .get(file_path)
                .map(|users| {
                    let mut users: Vec<String> = users.iter().cloned().collect();
                    users.sort();
                    users
                })
                .unwrap_or_default()
        })
    }

    /// Full collaboration state for a project
    pub fn snapshot(&self, project_id: &str) -> CollaborationSnapshot {
        self.with_project(project_id, |state| CollaborationSnapshot {
            cursors: state.cursors.clone(),
            selections: state.selections.clone(),
            file_collaborators: state
                .file_collaborators
                .iter()
                .map(|(file, users)| {
                    let mut users: Vec<String> = users.iter().cloned().collect();
                    users.sort();
                    (file.clone(), users)
                })
                .collect(),
            insights: state.insights.values().cloned().collect(),
            comments: state.comments.values().cloned().collect(),
            ai_sessions: state.ai_sessions.values().cloned().collect(),
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
