//! HTTP and WebSocket handlers for the Courier server.
//!
//! Handlers only translate between transport encodings and the engine.

use crate::config::Config;
use crate::events::{self, ClientEvent, EventError, ServerEvent};
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::rooms::Rooms;
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tenvis_courier_core::{ConversationMeta, Engine, InvalidMessage, Message, StoredMessage};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The conversation engine.
    pub engine: Engine,
    /// Live rooms, registered with the engine as a sink.
    pub rooms: Arc<Rooms>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let engine = Engine::with_config(config.limits.engine_config());
        let rooms = Arc::new(Rooms::new(
            config.limits.room_capacity,
            config.limits.max_rooms_per_connection,
        ));
        engine.on_message_stored(rooms.clone());

        Self {
            engine,
            rooms,
            config,
        }
    }

    /// Submit through the engine, recording metrics for `origin`.
    fn submit(
        &self,
        origin: &'static str,
        conversation_id: &str,
        sender: &str,
        text: &str,
        timestamp: Option<f64>,
    ) -> Result<StoredMessage, InvalidMessage> {
        let start = Instant::now();
        match self
            .engine
            .submit_message(conversation_id, sender, text, timestamp)
        {
            Ok(stored) => {
                metrics::record_submitted(origin, start.elapsed().as_secs_f64());
                metrics::record_engine_stats(&self.engine.stats());
                Ok(stored)
            }
            Err(e) => {
                metrics::record_rejected(origin);
                Err(e)
            }
        }
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    let ws_path = state.config.transport.websocket_path.clone();
    Router::new()
        .route("/send-message", post(send_message))
        .route("/conversations", get(list_conversations))
        .route("/messages/:conversation_id", get(list_messages))
        .route(&ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let app = app(state);

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Courier server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Request body for `POST /send-message`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub timestamp: Option<f64>,
}

/// Response body for `POST /send-message`.
#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub status: &'static str,
    pub message: StoredMessage,
}

/// Response body for `GET /conversations`.
#[derive(Debug, Serialize)]
pub struct ConversationsResponse {
    pub conversations: Vec<ConversationMeta>,
}

/// Response body for `GET /messages/:conversation_id`.
#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub messages: Vec<Message>,
}

/// Query string for `GET /messages/:conversation_id`.
#[derive(Debug, Default, Deserialize)]
pub struct MessagesQuery {
    pub limit: Option<usize>,
}

/// Error returned by HTTP handlers.
#[derive(Debug)]
pub struct ApiError(InvalidMessage);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

/// Store a message and fan it out to the conversation's room.
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, ApiError> {
    let stored = state
        .submit(
            "http",
            &body.conversation_id,
            &body.sender,
            &body.message,
            body.timestamp,
        )
        .map_err(ApiError)?;

    debug!(conversation = %stored.conversation_id, "Message sent over HTTP");

    Ok(Json(SendMessageResponse {
        status: "Message sent",
        message: stored,
    }))
}

/// List conversations, most recently active first.
pub async fn list_conversations(State(state): State<Arc<AppState>>) -> Json<ConversationsResponse> {
    Json(ConversationsResponse {
        conversations: state.engine.list_conversations(),
    })
}

/// List a conversation's messages, newest first.
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Json<MessagesResponse> {
    Json(MessagesResponse {
        messages: state.engine.list_messages(&conversation_id, query.limit),
    })
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Per-connection bookkeeping for joined rooms.
struct Session {
    connection_id: String,
    /// Forwarding task per joined conversation.
    forwarders: HashMap<String, tokio::task::JoinHandle<()>>,
    /// Merged stream of messages from every joined room.
    room_tx: mpsc::UnboundedSender<Arc<StoredMessage>>,
}

impl Session {
    /// Handle one client event, returning the reply to send, if any.
    fn handle_event(&mut self, event: ClientEvent, state: &AppState) -> Option<ServerEvent> {
        match event {
            ClientEvent::JoinConversation { conversation_id } => {
                match state.rooms.join(&self.connection_id, &conversation_id) {
                    Ok(rx) => {
                        let handle = tokio::spawn(forward_room(rx, self.room_tx.clone()));
                        self.forwarders.insert(conversation_id.clone(), handle);
                        debug!(
                            connection = %self.connection_id,
                            conversation = %conversation_id,
                            members = state.rooms.member_count(&conversation_id),
                            "Session joined room"
                        );
                        metrics::set_active_rooms(state.rooms.room_count());
                        Some(ServerEvent::Joined { conversation_id })
                    }
                    Err(e) => {
                        warn!(connection = %self.connection_id, error = %e, "Join failed");
                        Some(ServerEvent::error(e.to_string()))
                    }
                }
            }

            ClientEvent::LeaveConversation { conversation_id } => {
                if let Some(handle) = self.forwarders.remove(&conversation_id) {
                    handle.abort();
                }
                match state.rooms.leave(&self.connection_id, &conversation_id) {
                    Ok(()) => {
                        metrics::set_active_rooms(state.rooms.room_count());
                        Some(ServerEvent::Left { conversation_id })
                    }
                    Err(e) => Some(ServerEvent::error(e.to_string())),
                }
            }

            ClientEvent::NewMessage {
                conversation_id,
                sender,
                text,
                timestamp,
            } => {
                // Members of the room, this socket included, get the
                // message through the rooms sink.
                match state.submit("ws", &conversation_id, &sender, &text, timestamp) {
                    Ok(_) => None,
                    Err(e) => Some(ServerEvent::error(e.to_string())),
                }
            }
        }
    }

    fn close(self, state: &AppState) {
        debug!(
            connection = %self.connection_id,
            joined = state.rooms.joined(&self.connection_id).len(),
            "Closing session"
        );
        for (_, handle) in self.forwarders {
            handle.abort();
        }
        state.rooms.leave_all(&self.connection_id);
        metrics::set_active_rooms(state.rooms.room_count());
    }
}

/// Copy messages from a room's broadcast channel into the session stream.
async fn forward_room(
    mut rx: broadcast::Receiver<Arc<StoredMessage>>,
    tx: mpsc::UnboundedSender<Arc<StoredMessage>>,
) {
    loop {
        match rx.recv().await {
            Ok(msg) => {
                if tx.send(msg).is_err() {
                    break; // Session ended
                }
            }
            Err(broadcast::error::RecvError::Closed) => break,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Room receiver lagged");
            }
        }
    }
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection_id = format!(
        "conn_{:x}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default()
    );

    debug!(connection = %connection_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();
    let (room_tx, mut room_rx) = mpsc::unbounded_channel::<Arc<StoredMessage>>();
    let mut session = Session {
        connection_id: connection_id.clone(),
        forwarders: HashMap::new(),
        room_tx,
    };

    loop {
        let reply = tokio::select! {
            biased;

            Some(stored) = room_rx.recv() => Some(ServerEvent::from(stored.as_ref())),

            msg = receiver.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => match events::decode(&text) {
                        Ok(event) => session.handle_event(event, &state),
                        Err(e) => {
                            debug!(connection = %connection_id, error = %e, "Bad event");
                            Some(ServerEvent::error(e.to_string()))
                        }
                    },
                    Some(Ok(WsMessage::Binary(_))) => {
                        Some(ServerEvent::error(EventError::Binary.to_string()))
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        if sender.send(WsMessage::Pong(data)).await.is_err() {
                            break;
                        }
                        None
                    }
                    Some(Ok(WsMessage::Pong(_))) => None,
                    Some(Ok(WsMessage::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        };

        if let Some(event) = reply {
            match event.encode() {
                Ok(text) => {
                    if sender.send(WsMessage::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(e) => error!(connection = %connection_id, error = %e, "Encode failed"),
            }
        }
    }

    session.close(&state);
    debug!(connection = %connection_id, "WebSocket disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> Arc<AppState> {
        let mut config = Config::default();
        config.metrics.enabled = false;
        Arc::new(AppState::new(config))
    }

    fn request(conversation: &str, sender: &str, text: &str, ts: f64) -> Json<SendMessageRequest> {
        Json(SendMessageRequest {
            conversation_id: conversation.to_string(),
            sender: sender.to_string(),
            message: text.to_string(),
            timestamp: Some(ts),
        })
    }

    #[tokio::test]
    async fn test_send_and_list() {
        let state = state();

        for (conv, sender, text, ts) in [
            ("C1", "a", "hi", 10.0),
            ("C2", "b", "yo", 20.0),
            ("C1", "a", "again", 30.0),
        ] {
            let Json(response) = send_message(State(state.clone()), request(conv, sender, text, ts))
                .await
                .unwrap();
            assert_eq!(response.status, "Message sent");
            assert_eq!(response.message.conversation_id, conv);
        }

        let Json(conversations) = list_conversations(State(state.clone())).await;
        let ids: Vec<_> = conversations
            .conversations
            .iter()
            .map(|c| (c.id.as_str(), c.last_message_time))
            .collect();
        assert_eq!(ids, vec![("C1", 30.0), ("C2", 20.0)]);

        let Json(messages) = list_messages(
            State(state.clone()),
            Path("C1".to_string()),
            Query(MessagesQuery::default()),
        )
        .await;
        let texts: Vec<_> = messages.messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["again", "hi"]);

        let Json(limited) = list_messages(
            State(state),
            Path("C1".to_string()),
            Query(MessagesQuery { limit: Some(1) }),
        )
        .await;
        assert_eq!(limited.messages.len(), 1);
        assert_eq!(limited.messages[0].text, "again");
    }

    #[tokio::test]
    async fn test_send_invalid_is_bad_request() {
        let state = state();

        let err = send_message(
            State(state.clone()),
            Json(SendMessageRequest {
                conversation_id: "C1".to_string(),
                ..SendMessageRequest::default()
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);

        let Json(conversations) = list_conversations(State(state)).await;
        assert!(conversations.conversations.is_empty());
    }

    #[tokio::test]
    async fn test_list_unknown_conversation() {
        let Json(messages) = list_messages(
            State(state()),
            Path("ghost".to_string()),
            Query(MessagesQuery::default()),
        )
        .await;
        assert!(messages.messages.is_empty());
    }

    #[tokio::test]
    async fn test_send_fans_out_to_room() {
        let state = state();
        let mut rx = state.rooms.join("conn-1", "C1").unwrap();

        send_message(State(state.clone()), request("C1", "a", "hi", 1.0))
            .await
            .unwrap();

        let stored = rx.recv().await.unwrap();
        assert_eq!(stored.message.text, "hi");
    }

    #[tokio::test]
    async fn test_session_events() {
        let state = state();
        let (room_tx, mut room_rx) = mpsc::unbounded_channel();
        let mut session = Session {
            connection_id: "conn-1".to_string(),
            forwarders: HashMap::new(),
            room_tx,
        };

        let reply = session.handle_event(
            ClientEvent::JoinConversation {
                conversation_id: "C1".to_string(),
            },
            &state,
        );
        assert_eq!(
            reply,
            Some(ServerEvent::Joined {
                conversation_id: "C1".to_string()
            })
        );

        let reply = session.handle_event(
            ClientEvent::NewMessage {
                conversation_id: "C1".to_string(),
                sender: "a".to_string(),
                text: "hello".to_string(),
                timestamp: Some(5.0),
            },
            &state,
        );
        assert!(reply.is_none());

        let forwarded = room_rx.recv().await.unwrap();
        assert_eq!(forwarded.message.text, "hello");

        let reply = session.handle_event(
            ClientEvent::NewMessage {
                conversation_id: "C1".to_string(),
                sender: String::new(),
                text: "x".to_string(),
                timestamp: None,
            },
            &state,
        );
        assert!(matches!(reply, Some(ServerEvent::Error { .. })));

        let reply = session.handle_event(
            ClientEvent::LeaveConversation {
                conversation_id: "C1".to_string(),
            },
            &state,
        );
        assert!(matches!(reply, Some(ServerEvent::Left { .. })));
        assert_eq!(state.rooms.room_count(), 0);

        session.close(&state);
        assert!(state.rooms.joined("conn-1").is_empty());
    }
}
