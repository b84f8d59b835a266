//! Per-connection WebSocket handler for `/realtime`.
//!
//! Clients send JSON frames to manage subscriptions:
//!
//! ```json
//! {"type":"subscribe","id":"mine","table":"bookmarks","filter":"user_id=eq.<uuid>"}
//! {"type":"unsubscribe","id":"mine"}
//! {"type":"ping"}
//! ```
//!
//! Matching change events come back as `{"type":"change","id":..,"event":..}`.
//!
//! An authenticated connection re-checks its session periodically and
//! whenever its own roles or profile change. Once the session is gone the
//! socket gets an `error` frame and is closed.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::{ChangeEvent, RowFilter, Subscription, Table};
use crate::auth::{authenticate_token, resolve_session, AuthUser};
use crate::errors::AppError;
use crate::AppState;

/// Subscriptions one connection may hold.
const MAX_SUBSCRIPTIONS: usize = 32;

#[derive(Debug, Deserialize)]
pub struct RealtimeParams {
    #[serde(default)]
    pub token: Option<String>,
}

/// Inbound frame.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Subscribe {
        id: String,
        table: String,
        #[serde(default)]
        filter: Option<String>,
    },
    Unsubscribe {
        id: String,
    },
    Ping,
}

/// Outbound frame.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    Subscribed { id: String },
    Unsubscribed { id: String },
    Change { id: String, event: ChangeEvent },
    Lagged { skipped: u64 },
    Pong,
    Error { message: String },
}

/// GET /realtime - Upgrade to a change-feed WebSocket.
///
/// Anonymous connections only see public rows; a `token` query parameter
/// authenticates the connection as that session's user.
pub async fn realtime_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<RealtimeParams>,
) -> Result<Response, AppError> {
    let viewer = match params.token.as_deref().filter(|t| !t.is_empty()) {
        Some(token) => Some(
            authenticate_token(&state, token)
                .await?
                .ok_or_else(|| AppError::Unauthorized("Invalid or expired session".to_string()))?,
        ),
        None => None,
    };

    let events = state.feed.subscribe();
    Ok(ws.on_upgrade(move |socket| RealtimeSession::new(viewer).run(state, socket, events)))
}

struct RealtimeSession {
    viewer: Option<AuthUser>,
    subscriptions: Vec<Subscription>,
}

impl RealtimeSession {
    fn new(viewer: Option<AuthUser>) -> Self {
        Self {
            viewer,
            subscriptions: Vec::new(),
        }
    }

    async fn run(
        mut self,
        state: AppState,
        socket: WebSocket,
        mut events: broadcast::Receiver<Arc<ChangeEvent>>,
    ) {
        let (mut sink, mut stream) = socket.split();

        let period = state.config.realtime_reauth_interval;
        let mut reauth = tokio::time::interval_at(Instant::now() + period, period);
        reauth.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                incoming = stream.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let reply = self.handle_client_text(text.as_str());
                        if send(&mut sink, &reply).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("Realtime socket error: {}", e);
                        break;
                    }
                },
                received = events.recv() => {
                    let outgoing = match received {
                        Ok(event) => {
                            if self.concerns_viewer(&event) && !self.refresh_viewer(&state).await {
                                end_session(&mut sink).await;
                                return;
                            }
                            self.route_event(&event)
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Realtime session lagged, skipped {} events", skipped);
                            vec![ServerMessage::Lagged { skipped }]
                        }
                        Err(RecvError::Closed) => break,
                    };
                    for message in &outgoing {
                        if send(&mut sink, message).await.is_err() {
                            return;
                        }
                    }
                }
                _ = reauth.tick(), if self.viewer.is_some() => {
                    if !self.refresh_viewer(&state).await {
                        end_session(&mut sink).await;
                        return;
                    }
                }
            }
        }

        debug!(
            "Realtime session closed with {} subscriptions",
            self.subscriptions.len()
        );
    }

    /// Whether the event changes the viewer's own roles or account.
    fn concerns_viewer(&self, event: &ChangeEvent) -> bool {
        let Some(viewer) = &self.viewer else {
            return false;
        };
        matches!(event.table, Table::UserRoles | Table::Profiles)
            && event.owner_id.as_deref() == Some(viewer.user_id.as_str())
    }

    /// Reload the viewer from its session. Returns false once the session
    /// no longer exists; a failed lookup keeps the current viewer.
    async fn refresh_viewer(&mut self, state: &AppState) -> bool {
        let Some(token_hash) = self.viewer.as_ref().map(|v| v.token_hash.clone()) else {
            return true;
        };
        match resolve_session(state, token_hash).await {
            Ok(Some(user)) => {
                self.viewer = Some(user);
                true
            }
            Ok(None) => {
                debug!("Realtime session ended");
                false
            }
            Err(e) => {
                warn!("Failed to re-check realtime session: {}", e);
                true
            }
        }
    }

    fn handle_client_text(&mut self, text: &str) -> ServerMessage {
        let message = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                return ServerMessage::Error {
                    message: format!("Invalid message: {}", e),
                }
            }
        };

        match message {
            ClientMessage::Subscribe { id, table, filter } => {
                match self.subscribe(id, &table, filter.as_deref()) {
                    Ok(id) => ServerMessage::Subscribed { id },
                    Err(e) => ServerMessage::Error {
                        message: e.message().to_string(),
                    },
                }
            }
            ClientMessage::Unsubscribe { id } => {
                self.subscriptions.retain(|s| s.id != id);
                ServerMessage::Unsubscribed { id }
            }
            ClientMessage::Ping => ServerMessage::Pong,
        }
    }

    fn subscribe(
        &mut self,
        id: String,
        table: &str,
        filter: Option<&str>,
    ) -> Result<String, AppError> {
        let table = Table::parse(table)
            .ok_or_else(|| AppError::Validation(format!("Unknown table '{}'", table)))?;
        let filter = filter.map(RowFilter::parse).transpose()?;

        // Re-subscribing under an existing id replaces it.
        self.subscriptions.retain(|s| s.id != id);
        if self.subscriptions.len() >= MAX_SUBSCRIPTIONS {
            return Err(AppError::Validation(format!(
                "At most {} subscriptions per connection",
                MAX_SUBSCRIPTIONS
            )));
        }
        self.subscriptions.push(Subscription {
            id: id.clone(),
            table,
            filter,
        });
        Ok(id)
    }

    fn route_event(&self, event: &ChangeEvent) -> Vec<ServerMessage> {
        if !event.is_visible_to(self.viewer.as_ref()) {
            return Vec::new();
        }
        self.subscriptions
            .iter()
            .filter(|s| s.matches(event))
            .map(|s| ServerMessage::Change {
                id: s.id.clone(),
                event: event.clone(),
            })
            .collect()
    }
}

/// Tell the client its session is gone, then close the socket.
async fn end_session(sink: &mut SplitSink<WebSocket, Message>) {
    let notice = ServerMessage::Error {
        message: "Session ended".to_string(),
    };
    if send(sink, &notice).await.is_ok() {
        let _ = sink.close().await;
    }
}

async fn send(
    sink: &mut SplitSink<WebSocket, Message>,
    message: &ServerMessage,
) -> Result<(), axum::Error> {
    match serde_json::to_string(message) {
        Ok(text) => sink.send(Message::Text(text.into())).await,
        Err(e) => {
            warn!("Failed to encode realtime message: {}", e);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use serde_json::json;

    fn viewer_with_id(id: &str) -> AuthUser {
        AuthUser {
            user_id: id.to_string(),
            email: format!("{}@example.com", id),
            roles: vec![Role::User],
            token_hash: String::new(),
        }
    }

    #[test]
    fn test_subscribe_and_ping() {
        let mut session = RealtimeSession::new(None);

        let reply = session.handle_client_text(r#"{"type":"subscribe","id":"s1","table":"opportunities"}"#);
        assert!(matches!(reply, ServerMessage::Subscribed { ref id } if id == "s1"));
        assert_eq!(session.subscriptions.len(), 1);

        let reply = session.handle_client_text(r#"{"type":"ping"}"#);
        assert!(matches!(reply, ServerMessage::Pong));

        let reply = session.handle_client_text(r#"{"type":"unsubscribe","id":"s1"}"#);
        assert!(matches!(reply, ServerMessage::Unsubscribed { .. }));
        assert!(session.subscriptions.is_empty());
    }

    #[test]
    fn test_invalid_frames_answer_with_error() {
        let mut session = RealtimeSession::new(None);

        let reply = session.handle_client_text("not json");
        assert!(matches!(reply, ServerMessage::Error { .. }));

        let reply = session.handle_client_text(r#"{"type":"subscribe","id":"s1","table":"secrets"}"#);
        assert!(matches!(reply, ServerMessage::Error { .. }));

        let reply = session.handle_client_text(
            r#"{"type":"subscribe","id":"s1","table":"bookmarks","filter":"user_id"}"#,
        );
        assert!(matches!(reply, ServerMessage::Error { .. }));
        assert!(session.subscriptions.is_empty());
    }

    #[test]
    fn test_route_event_applies_filter_and_visibility() {
        let mut session = RealtimeSession::new(Some(viewer_with_id("u1")));
        session
            .subscribe("mine".to_string(), "notifications", Some("user_id=eq.u1"))
            .unwrap();

        let own = ChangeEvent::insert(Table::Notifications, &json!({ "userId": "u1" }), Some("u1"));
        assert_eq!(session.route_event(&own).len(), 1);

        let foreign = ChangeEvent::insert(Table::Notifications, &json!({ "userId": "u2" }), Some("u2"));
        assert!(session.route_event(&foreign).is_empty());
    }

    #[test]
    fn test_role_changes_of_the_viewer_trigger_a_recheck() {
        let session = RealtimeSession::new(Some(viewer_with_id("u1")));

        let own = ChangeEvent::update(Table::UserRoles, &json!({ "userId": "u1" }), Some("u1"));
        assert!(session.concerns_viewer(&own));

        let foreign = ChangeEvent::update(Table::UserRoles, &json!({ "userId": "u2" }), Some("u2"));
        assert!(!session.concerns_viewer(&foreign));

        let other_table = ChangeEvent::update(Table::Bookmarks, &json!({ "userId": "u1" }), Some("u1"));
        assert!(!session.concerns_viewer(&other_table));

        assert!(!RealtimeSession::new(None).concerns_viewer(&own));
    }

    #[test]
    fn test_resubscribe_replaces_existing_id() {
        let mut session = RealtimeSession::new(None);
        session.subscribe("s".to_string(), "ads", None).unwrap();
        session.subscribe("s".to_string(), "opportunities", None).unwrap();

        assert_eq!(session.subscriptions.len(), 1);
        assert_eq!(session.subscriptions[0].table, Table::Opportunities);
    }

    #[test]
    fn test_server_message_wire_format() {
        let text = serde_json::to_string(&ServerMessage::Lagged { skipped: 3 }).unwrap();
        assert_eq!(text, r#"{"type":"lagged","skipped":3}"#);
    }
}
