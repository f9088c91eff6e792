//! Broadcast/presence coordinator: the per-connection `Connecting -> Open -> Closed` state
//! machine over the connection registry.
//!
//! Everything here is synchronous and runs on the hub task. Persistence is handed to the store
//! worker through a channel and never awaited, so a slow database cannot stall fan-out.

use tokio::sync::mpsc;
use unicode_segmentation::UnicodeSegmentation;

use crate::hub::StoreCommand;
use crate::metrics::Metrics;
use crate::models::ChatMessage;
use crate::protocol::{chat_json, ChatSubmit, ServerEvent};
use crate::ws_registry::{now_secs, BroadcastReport, Connection, ConnectionRegistry};

const ERR_INVALID_PAYLOAD: &str = "Invalid message payload";
const ERR_EMPTY_CONTENT: &str = "Message content is required";
const ERR_TOO_LONG: &str = "Message is too long";
const ERR_NOT_AUTHENTICATED: &str = "Sign in to send messages";

pub struct Coordinator {
    registry: ConnectionRegistry,
    store_tx: mpsc::UnboundedSender<StoreCommand>,
    metrics: Metrics,
    max_message_len: usize,
}

impl Coordinator {
    pub fn new(
        store_tx: mpsc::UnboundedSender<StoreCommand>,
        metrics: Metrics,
        max_message_len: usize,
    ) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            store_tx,
            metrics,
            max_message_len,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn presence(&self) -> Vec<String> {
        self.registry.presence()
    }

    /// Connecting -> Open. `history` was loaded while the socket was still connecting.
    pub fn connect(&mut self, connection: Connection, history: Vec<ChatMessage>) {
        let conn_id = connection.conn_id();
        let username = connection.username().to_string();
        self.registry.add(connection);
        self.metrics.ws_connections.set(self.registry.len() as i64);
        tracing::info!(conn_id, username = %username, "ws connection open");

        if let Some(json) = (ServerEvent::RecentMessages { messages: &history }).to_json() {
            self.registry.send_to(conn_id, json);
        }

        let users = self.registry.presence();
        if username.is_empty() {
            if let Some(json) = (ServerEvent::OnlineUsers {
                users: &users,
                new_user: None,
            })
            .to_json()
            {
                self.registry.send_to(conn_id, json);
            }
            return;
        }

        if let Some(json) = (ServerEvent::UserJoined {
            username: &username,
            users: &users,
        })
        .to_json()
        {
            let report = self.registry.broadcast(&json, Some(conn_id));
            self.record(report);
        }
        if let Some(json) = (ServerEvent::OnlineUsers {
            users: &users,
            new_user: Some(&username),
        })
        .to_json()
        {
            let report = self.registry.broadcast(&json, None);
            self.record(report);
        }

        if self.registry.connection_count_for(&username) == 1 {
            self.request(StoreCommand::SetOnline {
                username,
                online: true,
            });
        }
    }

    /// Open -> Open on an inbound frame. Invalid payloads get a single error back to the sender
    /// and are otherwise dropped.
    pub fn handle_inbound(&mut self, conn_id: u64, payload: &str) {
        let Some(conn) = self.registry.get(conn_id) else {
            tracing::debug!(conn_id, "inbound frame for unknown connection");
            return;
        };
        conn.entry().touch();

        let message = match self.validate(conn, payload) {
            Ok(m) => m,
            Err(reason) => {
                self.metrics.malformed_payloads.inc();
                tracing::debug!(conn_id, reason, "reject chat payload");
                self.send_error(conn_id, reason);
                return;
            }
        };

        self.request(StoreCommand::PersistMessage(message.clone()));
        self.metrics.chat_messages.inc();
        if let Some(json) = chat_json(&message) {
            let report = self.registry.broadcast(&json, Some(conn_id));
            tracing::debug!(
                conn_id,
                sender = %message.sender,
                delivered = report.delivered,
                failed = report.failed,
                "chat message broadcast"
            );
            self.record(report);
        }
    }

    /// Open -> Closed. Closing an unknown or already closed connection does nothing.
    pub fn close(&mut self, conn_id: u64) -> bool {
        let Some(conn) = self.registry.remove(conn_id) else {
            return false;
        };
        self.metrics.ws_connections.set(self.registry.len() as i64);
        let username = conn.username().to_string();
        // Dropping the connection drops its sender, which ends the socket task.
        drop(conn);
        tracing::info!(conn_id, username = %username, "ws connection closed");
        if username.is_empty() {
            return true;
        }

        let users = self.registry.presence();
        if let Some(json) = (ServerEvent::UserLeft {
            username: &username,
            users: &users,
        })
        .to_json()
        {
            let report = self.registry.broadcast(&json, None);
            self.record(report);
        }
        if let Some(json) = (ServerEvent::OnlineUsers {
            users: &users,
            new_user: None,
        })
        .to_json()
        {
            let report = self.registry.broadcast(&json, None);
            self.record(report);
        }

        if self.registry.connection_count_for(&username) == 0 {
            self.request(StoreCommand::SetOnline {
                username,
                online: false,
            });
        }
        true
    }

    /// Close every connection belonging to `username` (ban, account removal).
    pub fn disconnect_user(&mut self, username: &str) -> usize {
        if username.is_empty() {
            return 0;
        }
        let ids = self.registry.connection_ids_for(username);
        ids.into_iter().filter(|id| self.close(*id)).count()
    }

    /// Close connections idle for longer than `max_age_secs`.
    pub fn prune_stale(&mut self, max_age_secs: u64) -> usize {
        let stale = self.registry.stale_connections(now_secs(), max_age_secs);
        for conn_id in &stale {
            tracing::info!(conn_id, "pruning stale ws connection");
            self.close(*conn_id);
        }
        stale.len()
    }

    fn validate(&self, conn: &Connection, payload: &str) -> Result<ChatMessage, &'static str> {
        let submit: ChatSubmit =
            serde_json::from_str(payload).map_err(|_| ERR_INVALID_PAYLOAD)?;
        let content = submit.content.as_deref().map(str::trim).unwrap_or_default();
        if content.is_empty() {
            return Err(ERR_EMPTY_CONTENT);
        }
        if content.graphemes(true).count() > self.max_message_len {
            return Err(ERR_TOO_LONG);
        }
        if !conn.is_authenticated() {
            return Err(ERR_NOT_AUTHENTICATED);
        }
        if let Some(claimed) = submit.sender.as_deref() {
            if claimed != conn.username() {
                tracing::debug!(
                    conn_id = conn.conn_id(),
                    claimed,
                    "ignoring client-supplied sender"
                );
            }
        }
        Ok(ChatMessage::new(content, conn.username()))
    }

    fn send_error(&self, conn_id: u64, message: &str) {
        if let Some(json) = (ServerEvent::Error { message }).to_json() {
            self.registry.send_to(conn_id, json);
        }
    }

    fn request(&self, command: StoreCommand) {
        if self.store_tx.send(command).is_err() {
            tracing::warn!("store worker is gone; dropping store command");
        }
    }

    fn record(&self, report: BroadcastReport) {
        if report.failed > 0 {
            self.metrics.send_failures.inc_by(report.failed as u64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    struct Harness {
        coord: Coordinator,
        store_rx: mpsc::UnboundedReceiver<StoreCommand>,
    }

    fn harness() -> Harness {
        let (store_tx, store_rx) = mpsc::unbounded_channel();
        Harness {
            coord: Coordinator::new(store_tx, Metrics::new().unwrap(), 20),
            store_rx,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(text) = rx.try_recv() {
            out.push(serde_json::from_str(&text).unwrap());
        }
        out
    }

    fn join(h: &mut Harness, name: &str) -> (u64, mpsc::Receiver<String>) {
        let (conn, rx) = Connection::open(name, 32);
        let id = conn.conn_id();
        h.coord.connect(conn, Vec::new());
        (id, rx)
    }

    #[test]
    fn alice_bob_scenario() {
        let mut h = harness();
        let (alice, mut ra) = join(&mut h, "alice");
        let (bob, mut rb) = join(&mut h, "bob");
        drain(&mut ra);
        drain(&mut rb);

        h.coord
            .handle_inbound(alice, r#"{"content":"hi","sender":"alice"}"#);
        let got = drain(&mut rb);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0]["content"], "hi");
        assert_eq!(got[0]["sender"], "alice");
        assert!(got[0]["timestamp"].is_string());
        assert!(got[0].get("type").is_none());
        assert!(drain(&mut ra).is_empty());

        assert!(h.coord.close(bob));
        let got = drain(&mut ra);
        assert_eq!(got[0]["type"], "userLeft");
        assert_eq!(got[0]["username"], "bob");
        assert_eq!(got[1]["type"], "onlineUsers");
        assert_eq!(got[1]["users"], serde_json::json!(["alice"]));
    }

    #[test]
    fn join_sends_history_then_presence() {
        let mut h = harness();
        let (_alice, mut ra) = join(&mut h, "alice");
        drain(&mut ra);

        let (conn, mut rb) = Connection::open("bob", 32);
        let history = vec![ChatMessage::new("earlier", "alice")];
        h.coord.connect(conn, history);

        let to_bob = drain(&mut rb);
        assert_eq!(to_bob[0]["type"], "recentMessages");
        assert_eq!(to_bob[0]["messages"][0]["content"], "earlier");
        assert_eq!(to_bob[1]["type"], "onlineUsers");
        assert_eq!(to_bob[1]["users"], serde_json::json!(["alice", "bob"]));
        assert_eq!(to_bob.len(), 2);

        let to_alice = drain(&mut ra);
        assert_eq!(to_alice[0]["type"], "userJoined");
        assert_eq!(to_alice[0]["username"], "bob");
        assert_eq!(to_alice[1]["type"], "onlineUsers");
        assert_eq!(to_alice[1]["newUser"], "bob");
    }

    #[test]
    fn malformed_payload_yields_one_error_and_no_broadcast() {
        let mut h = harness();
        let (alice, mut ra) = join(&mut h, "alice");
        let (_bob, mut rb) = join(&mut h, "bob");
        drain(&mut ra);
        drain(&mut rb);
        while h.store_rx.try_recv().is_ok() {}

        for bad in [r#"{"sender":"alice"}"#, "not json", r#"{"content":"   "}"#] {
            h.coord.handle_inbound(alice, bad);
            let got = drain(&mut ra);
            assert_eq!(got.len(), 1, "payload {bad}");
            assert_eq!(got[0]["type"], "error");
        }
        h.coord
            .handle_inbound(alice, &format!(r#"{{"content":"{}"}}"#, "x".repeat(21)));
        assert_eq!(drain(&mut ra)[0]["message"], ERR_TOO_LONG);

        assert!(drain(&mut rb).is_empty());
        assert!(h.store_rx.try_recv().is_err());
    }

    #[test]
    fn accepted_message_is_persisted_with_session_sender() {
        let mut h = harness();
        let (alice, _ra) = join(&mut h, "alice");
        while h.store_rx.try_recv().is_ok() {}

        h.coord
            .handle_inbound(alice, r#"{"content":"  hello  ","sender":"mallory"}"#);
        match h.store_rx.try_recv() {
            Ok(StoreCommand::PersistMessage(m)) => {
                assert_eq!(m.content, "hello");
                assert_eq!(m.sender, "alice");
            }
            other => panic!("expected persist, got {other:?}"),
        }
    }

    #[test]
    fn anonymous_connections_read_but_cannot_post() {
        let mut h = harness();
        let (_alice, mut ra) = join(&mut h, "alice");
        drain(&mut ra);
        let (anon, mut rn) = join(&mut h, "");

        let to_anon = drain(&mut rn);
        assert_eq!(to_anon[1]["type"], "onlineUsers");
        assert_eq!(to_anon[1]["users"], serde_json::json!(["alice"]));
        assert!(drain(&mut ra).is_empty());

        h.coord.handle_inbound(anon, r#"{"content":"hi"}"#);
        assert_eq!(drain(&mut rn)[0]["message"], ERR_NOT_AUTHENTICATED);
        assert!(drain(&mut ra).is_empty());

        assert!(h.coord.close(anon));
        assert!(drain(&mut ra).is_empty());
    }

    #[test]
    fn presence_keeps_user_with_another_tab() {
        let mut h = harness();
        let (a1, _r1) = join(&mut h, "alice");
        let (_a2, _r2) = join(&mut h, "alice");
        let (_bob, mut rb) = join(&mut h, "bob");
        drain(&mut rb);
        while h.store_rx.try_recv().is_ok() {}

        h.coord.close(a1);
        let got = drain(&mut rb);
        assert_eq!(got[1]["users"], serde_json::json!(["alice", "bob"]));
        // alice still has a tab open, so she stays online
        assert!(h.store_rx.try_recv().is_err());
        assert_eq!(
            h.coord.registry().list_usernames().len(),
            h.coord.registry().len()
        );
    }

    #[test]
    fn close_is_idempotent_and_stops_delivery() {
        let mut h = harness();
        let (alice, _ra) = join(&mut h, "alice");
        let (bob, mut rb) = join(&mut h, "bob");
        assert!(h.coord.close(bob));
        assert!(!h.coord.close(bob));
        h.coord.handle_inbound(alice, r#"{"content":"anyone?"}"#);
        // bob's sender was dropped with his connection
        drain(&mut rb);
        assert!(rb.try_recv().is_err());
        assert_eq!(h.coord.presence(), vec!["alice"]);
    }

    #[test]
    fn prune_closes_idle_connections_and_tells_peers() {
        let mut h = harness();
        let (alice, mut ra) = join(&mut h, "alice");
        let (conn, mut rb) = Connection::open("bob", 32);
        let bob = conn.conn_id();
        h.coord.connect(conn, Vec::new());
        drain(&mut ra);
        drain(&mut rb);

        h.coord
            .registry()
            .get(bob)
            .unwrap()
            .entry()
            .last_seen_at
            .store(0, std::sync::atomic::Ordering::Relaxed);
        assert_eq!(h.coord.prune_stale(300), 1);

        assert!(h.coord.registry().get(bob).is_none());
        assert!(h.coord.registry().get(alice).is_some());
        let got = drain(&mut ra);
        assert_eq!(got[0]["type"], "userLeft");
        assert_eq!(got[0]["username"], "bob");
        assert_eq!(got[1]["type"], "onlineUsers");
        assert_eq!(got[1]["users"], serde_json::json!(["alice"]));
        assert_eq!(h.coord.prune_stale(300), 0);
    }

    #[test]
    fn disconnect_user_closes_every_tab() {
        let mut h = harness();
        let (_a1, _r1) = join(&mut h, "alice");
        let (_a2, _r2) = join(&mut h, "alice");
        let (_bob, mut rb) = join(&mut h, "bob");
        drain(&mut rb);

        assert_eq!(h.coord.disconnect_user("alice"), 2);
        assert_eq!(h.coord.presence(), vec!["bob"]);
        let left: Vec<Value> = drain(&mut rb)
            .into_iter()
            .filter(|v| v["type"] == "userLeft")
            .collect();
        assert_eq!(left.len(), 2);
    }
}
