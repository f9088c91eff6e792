//! WebSocket connection registry: the ordered set of live connections and their usernames.
//! Owned by the hub task; it is never shared, so nothing here locks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

/// State shared between a connection's registry entry and its socket task.
#[derive(Debug)]
pub struct ConnectionEntry {
    pub conn_id: u64,
    /// Empty for unauthenticated connections.
    pub username: String,
    /// Unix timestamp (seconds) of the last frame received from the client.
    pub last_seen_at: AtomicU64,
}

impl ConnectionEntry {
    pub fn touch(&self) {
        self.last_seen_at.store(now_secs(), Ordering::Relaxed);
    }
}

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(0);

fn next_conn_id() -> u64 {
    NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed)
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// A live connection. The registry holds the only sender; dropping it ends the socket task.
#[derive(Debug)]
pub struct Connection {
    entry: Arc<ConnectionEntry>,
    tx: mpsc::Sender<String>,
}

impl Connection {
    /// Create a connection with a fresh id. Returns the receiver the socket task drains.
    pub fn open(username: impl Into<String>, buffer: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let entry = Arc::new(ConnectionEntry {
            conn_id: next_conn_id(),
            username: username.into(),
            last_seen_at: AtomicU64::new(now_secs()),
        });
        (Self { entry, tx }, rx)
    }

    pub fn conn_id(&self) -> u64 {
        self.entry.conn_id
    }

    pub fn username(&self) -> &str {
        &self.entry.username
    }

    pub fn is_authenticated(&self) -> bool {
        !self.entry.username.is_empty()
    }

    pub fn entry(&self) -> Arc<ConnectionEntry> {
        self.entry.clone()
    }

    /// Non-blocking send; fails if the buffer is full or the socket task is gone.
    pub fn try_send(&self, text: String) -> bool {
        self.tx.try_send(text).is_ok()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    /// Insertion order is kept so presence lists are stable.
    connections: Vec<Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. A second add with the same conn_id is ignored.
    pub fn add(&mut self, connection: Connection) {
        let conn_id = connection.conn_id();
        if self.connections.iter().any(|c| c.conn_id() == conn_id) {
            tracing::debug!(conn_id, "ws connection already registered");
            return;
        }
        self.connections.push(connection);
    }

    /// Remove a connection by id. Returns `None` when it was not registered.
    pub fn remove(&mut self, conn_id: u64) -> Option<Connection> {
        let idx = self.connections.iter().position(|c| c.conn_id() == conn_id)?;
        Some(self.connections.remove(idx))
    }

    pub fn get(&self, conn_id: u64) -> Option<&Connection> {
        self.connections.iter().find(|c| c.conn_id() == conn_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Usernames of every connection in insertion order. A user with several tabs appears
    /// several times; use [`presence`](Self::presence) for display.
    pub fn list_usernames(&self) -> Vec<String> {
        self.connections
            .iter()
            .map(|c| c.username().to_string())
            .collect()
    }

    /// Distinct non-empty usernames, ordered by each user's first connection.
    pub fn presence(&self) -> Vec<String> {
        let mut users: Vec<String> = Vec::new();
        for c in &self.connections {
            if c.is_authenticated() && !users.iter().any(|u| u == c.username()) {
                users.push(c.username().to_string());
            }
        }
        users
    }

    pub fn connection_ids_for(&self, username: &str) -> Vec<u64> {
        self.connections
            .iter()
            .filter(|c| c.username() == username)
            .map(|c| c.conn_id())
            .collect()
    }

    pub fn connection_count_for(&self, username: &str) -> usize {
        self.connections
            .iter()
            .filter(|c| c.username() == username)
            .count()
    }

    pub fn for_each<F>(&self, exclude: Option<u64>, mut f: F)
    where
        F: FnMut(&Connection),
    {
        for c in &self.connections {
            if Some(c.conn_id()) != exclude {
                f(c);
            }
        }
    }

    /// Offer `message` to every connection except `exclude`. Failures to send (full buffer,
    /// closed socket) are logged and counted but do not remove the connection here; the
    /// socket's own close event does that.
    pub fn broadcast(&self, message: &str, exclude: Option<u64>) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        self.for_each(exclude, |c| {
            if c.try_send(message.to_string()) {
                report.delivered += 1;
            } else {
                report.failed += 1;
                tracing::debug!(
                    conn_id = c.conn_id(),
                    username = c.username(),
                    "ws broadcast try_send failed"
                );
            }
        });
        report
    }

    /// Send to one connection. Returns false if it is unknown or the send failed.
    pub fn send_to(&self, conn_id: u64, message: String) -> bool {
        match self.get(conn_id) {
            Some(c) => {
                let ok = c.try_send(message);
                if !ok {
                    tracing::debug!(conn_id, "ws unicast try_send failed");
                }
                ok
            }
            None => false,
        }
    }

    /// Connections that have not been heard from in more than `max_age_secs`.
    pub fn stale_connections(&self, now: u64, max_age_secs: u64) -> Vec<u64> {
        self.connections
            .iter()
            .filter(|c| {
                now.saturating_sub(c.entry.last_seen_at.load(Ordering::Relaxed)) > max_age_secs
            })
            .map(|c| c.conn_id())
            .collect()
    }
}
