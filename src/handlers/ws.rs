//! WebSocket handler: session via `token` query, history load while connecting, then a
//! recv/send loop that forwards chat frames to the hub until close.

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::trace;

use crate::models::ChatMessage;
use crate::protocol::{InboundKind, ServerEvent, PONG_JSON};
use crate::store;
use crate::utils::auth::{decode_token, session_user};
use crate::ws_registry::Connection;
use crate::AppState;

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// Server-initiated WebSocket ping; the client's pong counts as activity.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Identity established before the upgrade.
struct Session {
    username: String,
    login_at: Option<DateTime<Utc>>,
}

/// GET /ws — Upgrades to WebSocket. Without a token the connection is anonymous and read-only.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(q): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let session = match q.token.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        None => Session {
            username: String::new(),
            login_at: None,
        },
        Some(token) => match authenticate(&state, token).await {
            Ok(session) => session,
            Err(rejection) => return rejection.into_response(),
        },
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, session))
}

async fn authenticate(state: &AppState, token: &str) -> Result<Session, (StatusCode, &'static str)> {
    let claims = decode_token(&state.config.jwt_secret, token).map_err(|e| {
        tracing::debug!("ws token rejected: {:?}", e);
        (StatusCode::UNAUTHORIZED, "Invalid session token")
    })?;
    let login_at = claims.login_at();
    let user = session_user(state, claims.sub).await?;

    Ok(Session {
        username: user.username,
        login_at,
    })
}

/// Re-read the account once the connection is registered. A ban or removal that landed between
/// the handshake check and registration found nothing to disconnect, so finish it here. Any
/// later ban reaches the hub after our `Connect` and closes the socket there.
async fn confirm_admission(state: &AppState, username: &str) -> bool {
    let name = username.to_string();
    let admitted = match store::blocking(state.store.clone(), move |s| s.find_user(&name)).await {
        Ok(Some(user)) => !user.banned,
        Ok(None) => false,
        Err(e) => {
            tracing::error!("recheck ws user: {:?}", e);
            true
        }
    };
    if !admitted {
        tracing::warn!(username, "account banned or removed while connecting");
        let _ = state.hub.disconnect_user(username).await;
    }
    admitted
}

/// History replay for a connecting socket. A failed load replays nothing.
async fn load_history(state: &AppState, session: &Session) -> Vec<ChatMessage> {
    let since = if state.config.history_since_login && !session.username.is_empty() {
        session.login_at
    } else {
        None
    };
    let limit = state.config.history_limit;
    store::blocking(state.store.clone(), move |s| s.fetch_recent_messages(since, limit))
        .await
        .unwrap_or_else(|e| {
            tracing::error!("load chat history: {:?}", e);
            Vec::new()
        })
}

async fn handle_socket(mut socket: WebSocket, state: AppState, session: Session) {
    // Messages broadcast between this load and the `Connect` below (or still queued for the
    // store worker) reach neither the history nor the live stream of this socket.
    let history = load_history(&state, &session).await;

    let (connection, mut rx) = Connection::open(session.username.clone(), state.config.ws_buffer);
    let entry = connection.entry();
    let conn_id = entry.conn_id;
    if state.hub.connect(connection, history).is_err() {
        tracing::error!(conn_id, "chat hub is gone; closing socket");
        return;
    }
    // When refused, the hub has dropped our sender and the loop below sends the close frame.
    if !session.username.is_empty() {
        confirm_admission(&state, &session.username).await;
    }

    let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
    keepalive.tick().await;

    loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Some(text) => {
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        // Dropped by the hub: banned, removed or stale.
                        let _ = socket
                            .send(Message::Close(Some(CloseFrame {
                                code: axum::extract::ws::close_code::POLICY,
                                reason: "disconnected by server".into(),
                            })))
                            .await;
                        break;
                    }
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        entry.touch();
                        if is_ping(text.as_str()) {
                            trace!("ws ping received conn_id={}", conn_id);
                            if socket.send(Message::Text(PONG_JSON.into())).await.is_err() {
                                break;
                            }
                            continue;
                        }
                        if state.hub.inbound(conn_id, text.as_str().to_string()).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        entry.touch();
                        if let Some(json) = (ServerEvent::Error { message: "Binary frames are not supported" }).to_json() {
                            if socket.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => entry.touch(),
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                }
            }
            _ = keepalive.tick() => {
                if socket.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }
    // Close and error both end here; closing an already removed connection is a no-op.
    let _ = state.hub.close(conn_id);
}

fn is_ping(text: &str) -> bool {
    serde_json::from_str::<InboundKind>(text)
        .map(|k| k.type_.as_deref() == Some("ping"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::{NewUser, ROLE_USER};
    use crate::store::{MemoryStore, UserStore};
    use std::sync::Arc;

    #[test]
    fn only_typed_pings_are_keepalive() {
        assert!(is_ping(r#"{"type":"ping"}"#));
        assert!(!is_ping(r#"{"content":"ping"}"#));
        assert!(!is_ping("ping"));
    }

    fn add_user(store: &MemoryStore, username: &str) {
        store
            .create_user(NewUser {
                username: username.to_string(),
                password_hash: String::new(),
                password_salt: String::new(),
                role: ROLE_USER.to_string(),
                join_date: Utc::now(),
                banned: false,
                online_status: false,
            })
            .unwrap();
    }

    #[tokio::test]
    async fn ban_landing_before_registration_still_disconnects() {
        let store = Arc::new(MemoryStore::new());
        add_user(&store, "alice");
        add_user(&store, "bob");
        let state = AppState::start(Config::default(), store.clone()).unwrap();

        let (alice, _ra) = Connection::open("alice", 8);
        state.hub.connect(alice, Vec::new()).unwrap();
        assert!(confirm_admission(&state, "alice").await);

        // bob passed the handshake check; the ban and its kick run before he is registered.
        store.set_banned("bob", true).unwrap();
        assert_eq!(state.hub.disconnect_user("bob").await.unwrap(), 0);

        let (bob, mut rb) = Connection::open("bob", 8);
        state.hub.connect(bob, Vec::new()).unwrap();
        assert!(!confirm_admission(&state, "bob").await);
        assert_eq!(state.hub.presence().await.unwrap(), vec!["alice"]);

        let drained = tokio::time::timeout(Duration::from_secs(1), async {
            while rb.recv().await.is_some() {}
        })
        .await;
        assert!(drained.is_ok(), "bob's outbound channel should be closed");
    }

    #[tokio::test]
    async fn removed_account_is_refused_after_registration() {
        let store = Arc::new(MemoryStore::new());
        add_user(&store, "carol");
        let state = AppState::start(Config::default(), store.clone()).unwrap();
        assert!(store.delete_user("carol").unwrap());

        let (carol, _rc) = Connection::open("carol", 8);
        state.hub.connect(carol, Vec::new()).unwrap();
        assert!(!confirm_admission(&state, "carol").await);
        assert!(state.hub.presence().await.unwrap().is_empty());
    }
}
