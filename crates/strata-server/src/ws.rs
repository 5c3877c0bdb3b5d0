//! WebSocket endpoint - bridges axum sockets onto hub connections
//!
//! Clients connect to `/ws?token=...&project_id=...`. The bearer token is
//! validated before any hub state is touched; failures close the socket with
//! the auth-failure code. After that, the socket's sink becomes the
//! connection transport and every inbound text frame dispatches through
//! [`RealtimeHub::handle`].

use std::collections::HashMap;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::auth::AUTH_FAILURE_CODE;
use crate::hub::{RealtimeMessage, Transport, TransportError};
use crate::routes::AppState;

/// A hub transport over the write half of an axum websocket
struct WsTransport {
    sink: Mutex<SplitSink<WebSocket, Message>>,
}

#[async_trait::async_trait]
impl Transport for WsTransport {
    async fn send_frame(&self, frame: String) -> Result<(), TransportError> {
        self.sink
            .lock()
            .await
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| TransportError(e.to_string()))
    }

    async fn close(&self) {
        let _ = self.sink.lock().await.send(Message::Close(None)).await;
    }
}

/// WebSocket upgrade handler - GET /ws
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params))
}

async fn handle_socket(socket: WebSocket, state: AppState, params: HashMap<String, String>) {
    let token = params.get("token").cloned().unwrap_or_default();
    let Some(user_id) = state.validator.validate(&token) else {
        warn!("websocket rejected: invalid token");
        let (mut sink, _) = socket.split();
        let _ = sink
            .send(Message::Close(Some(CloseFrame {
                code: AUTH_FAILURE_CODE,
                reason: "authentication failed".into(),
            })))
            .await;
        return;
    };

    let project_id = params.get("project_id").cloned();
    let user_info: Map<String, Value> = params
        .get("user_info")
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default();

    let (sink, mut stream) = socket.split();
    let transport = std::sync::Arc::new(WsTransport {
        sink: Mutex::new(sink),
    });

    let connection_id = state
        .hub
        .connect(transport, user_id.clone(), project_id, user_info);
    debug!(user = %user_id, connection = %connection_id, "websocket connected");

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<RealtimeMessage>(&text) {
                Ok(message) => state.hub.handle(&connection_id, message),
                Err(e) => debug!(connection = %connection_id, "unparseable frame: {}", e),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(connection = %connection_id, "websocket error: {}", e);
                break;
            }
        }
    }

    state.hub.disconnect(&connection_id).await;
    debug!(user = %user_id, "websocket disconnected");
}
