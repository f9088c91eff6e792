//! The hub task owns the [`Coordinator`] (and through it the connection registry). Socket tasks
//! and HTTP handlers talk to it only through [`HubHandle`], so every registry mutation happens
//! on this one task in arrival order.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::coordinator::Coordinator;
use crate::models::ChatMessage;
use crate::store::Store;
use crate::ws_registry::Connection;

/// How often the hub looks for connections that stopped talking.
pub const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

pub enum HubCommand {
    Connect {
        connection: Connection,
        history: Vec<ChatMessage>,
    },
    Inbound {
        conn_id: u64,
        payload: String,
    },
    Close {
        conn_id: u64,
    },
    DisconnectUser {
        username: String,
        reply: oneshot::Sender<usize>,
    },
    Presence {
        reply: oneshot::Sender<Vec<String>>,
    },
}

#[derive(Debug, thiserror::Error)]
#[error("chat hub is not running")]
pub struct HubClosed;

#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubCommand>,
}

impl HubHandle {
    pub fn connect(
        &self,
        connection: Connection,
        history: Vec<ChatMessage>,
    ) -> Result<(), HubClosed> {
        self.send(HubCommand::Connect {
            connection,
            history,
        })
    }

    pub fn inbound(&self, conn_id: u64, payload: String) -> Result<(), HubClosed> {
        self.send(HubCommand::Inbound { conn_id, payload })
    }

    pub fn close(&self, conn_id: u64) -> Result<(), HubClosed> {
        self.send(HubCommand::Close { conn_id })
    }

    /// Close all live connections of `username`. Returns how many were open.
    pub async fn disconnect_user(&self, username: &str) -> Result<usize, HubClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::DisconnectUser {
            username: username.to_string(),
            reply,
        })?;
        rx.await.map_err(|_| HubClosed)
    }

    pub async fn presence(&self) -> Result<Vec<String>, HubClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Presence { reply })?;
        rx.await.map_err(|_| HubClosed)
    }

    fn send(&self, command: HubCommand) -> Result<(), HubClosed> {
        self.tx.send(command).map_err(|_| HubClosed)
    }
}

pub struct Hub;

impl Hub {
    /// Start the hub. Connections idle for more than `max_idle_secs` are pruned every
    /// `prune_interval`.
    pub fn spawn(
        coordinator: Coordinator,
        prune_interval: Duration,
        max_idle_secs: u64,
    ) -> (HubHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(coordinator, rx, prune_interval, max_idle_secs));
        (HubHandle { tx }, task)
    }
}

async fn run(
    mut coordinator: Coordinator,
    mut rx: mpsc::UnboundedReceiver<HubCommand>,
    prune_interval: Duration,
    max_idle_secs: u64,
) {
    let mut prune = tokio::time::interval(prune_interval);
    prune.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            cmd = rx.recv() => {
                match cmd {
                    Some(cmd) => dispatch(&mut coordinator, cmd),
                    None => break,
                }
            }
            _ = prune.tick() => {
                let pruned = coordinator.prune_stale(max_idle_secs);
                if pruned > 0 {
                    tracing::info!(pruned, "pruned stale ws connections");
                }
            }
        }
    }
    tracing::debug!("chat hub stopped");
}

fn dispatch(coordinator: &mut Coordinator, cmd: HubCommand) {
    match cmd {
        HubCommand::Connect {
            connection,
            history,
        } => coordinator.connect(connection, history),
        HubCommand::Inbound { conn_id, payload } => coordinator.handle_inbound(conn_id, &payload),
        HubCommand::Close { conn_id } => {
            coordinator.close(conn_id);
        }
        HubCommand::DisconnectUser { username, reply } => {
            let closed = coordinator.disconnect_user(&username);
            let _ = reply.send(closed);
        }
        HubCommand::Presence { reply } => {
            let _ = reply.send(coordinator.presence());
        }
    }
}

/// Fire-and-forget persistence requested by the coordinator.
#[derive(Debug)]
pub enum StoreCommand {
    PersistMessage(ChatMessage),
    SetOnline { username: String, online: bool },
}

pub mod store_worker {
    use super::*;

    /// Run store commands one at a time on the blocking pool. Failures are logged and dropped;
    /// a message that failed to persist has already been broadcast.
    pub fn spawn(store: Arc<dyn Store>) -> (mpsc::UnboundedSender<StoreCommand>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<StoreCommand>();
        let task = tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                let store = store.clone();
                let result = tokio::task::spawn_blocking(move || apply(store.as_ref(), &cmd)).await;
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::error!("store command failed: {}", e),
                    Err(e) => tracing::error!("store worker task panicked: {:?}", e),
                }
            }
        });
        (tx, task)
    }

    fn apply(store: &dyn Store, cmd: &StoreCommand) -> Result<(), crate::store::StoreError> {
        match cmd {
            StoreCommand::PersistMessage(message) => store.persist_message(message),
            StoreCommand::SetOnline { username, online } => store.set_online(username, *online),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use crate::store::{MemoryStore, MessageStore};

    #[tokio::test]
    async fn hub_answers_presence_and_persists_through_worker() {
        let store = Arc::new(MemoryStore::new());
        let (store_tx, _worker) = store_worker::spawn(store.clone());
        let coordinator = Coordinator::new(store_tx, Metrics::new().unwrap(), 100);
        let (hub, _task) = Hub::spawn(coordinator, PRUNE_INTERVAL, 300);

        let (alice, _ra) = Connection::open("alice", 16);
        let alice_id = alice.conn_id();
        hub.connect(alice, Vec::new()).unwrap();
        assert_eq!(hub.presence().await.unwrap(), vec!["alice"]);

        hub.inbound(alice_id, r#"{"content":"stored"}"#.to_string())
            .unwrap();
        let mut persisted = Vec::new();
        for _ in 0..50 {
            persisted = store.fetch_recent_messages(None, 10).unwrap();
            if !persisted.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].sender, "alice");

        assert_eq!(hub.disconnect_user("alice").await.unwrap(), 1);
        assert!(hub.presence().await.unwrap().is_empty());
    }
}
