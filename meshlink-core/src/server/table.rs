use std::sync::Arc;
use std::time::Instant;

use crossbeam_utils::atomic::AtomicCell;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc::Sender;

use crate::error::{Error, Result};
use crate::pool::Block;
use crate::protocol::DrpMessage;

pub type ClientQueue = Sender<Block<DrpMessage>>;

struct ClientEntry {
    conn_id: u64,
    queue: ClientQueue,
    last_seen: AtomicCell<Instant>,
}

impl ClientEntry {
    fn new(conn_id: u64, queue: ClientQueue) -> Self {
        Self {
            conn_id,
            queue,
            last_seen: AtomicCell::new(Instant::now()),
        }
    }
}

/// Maps a client public key to the outbound queue of its connection.
#[derive(Clone, Default)]
pub struct ClientTable {
    clients: Arc<DashMap<String, ClientEntry>>,
}

impl ClientTable {
    pub fn new() -> Self {
        Self::default()
    }
    /// Returns true when a queue was installed. A repeated Register on the same
    /// connection is a no-op; a Register from another connection replaces the
    /// stale entry left by a dead stream.
    pub fn register(&self, key: &str, conn_id: u64, queue: ClientQueue) -> bool {
        match self.clients.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().conn_id == conn_id {
                    entry.get().last_seen.store(Instant::now());
                    return false;
                }
                log::info!(
                    "replace client key={key},old_conn={},new_conn={conn_id}",
                    entry.get().conn_id
                );
                entry.insert(ClientEntry::new(conn_id, queue));
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(ClientEntry::new(conn_id, queue));
                true
            }
        }
    }
    /// Remove `key` only if it is still owned by `conn_id`.
    pub fn unregister(&self, key: &str, conn_id: u64) -> bool {
        self.clients
            .remove_if(key, |_, v| v.conn_id == conn_id)
            .is_some()
    }
    pub fn touch(&self, key: &str) -> bool {
        if let Some(entry) = self.clients.get(key) {
            entry.last_seen.store(Instant::now());
            true
        } else {
            false
        }
    }
    pub fn last_seen(&self, key: &str) -> Option<Instant> {
        self.clients.get(key).map(|v| v.last_seen.load())
    }
    pub fn contains(&self, key: &str) -> bool {
        self.clients.contains_key(key)
    }
    pub fn len(&self) -> usize {
        self.clients.len()
    }
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
    pub fn keys(&self) -> Vec<String> {
        self.clients.iter().map(|v| v.key().clone()).collect()
    }
    /// Queue `msg` for the client named by `msg.to`, waiting while that queue is full.
    ///
    /// Unknown destinations drop the message; the sender is not told.
    pub async fn forward(&self, msg: Block<DrpMessage>) -> Result<()> {
        let queue = match self.clients.get(&msg.to) {
            Some(entry) => entry.queue.clone(),
            None => {
                log::debug!(
                    "drop message type={:?},from={},to={}: not registered",
                    msg.msg_type,
                    msg.from,
                    msg.to
                );
                return Err(Error::NotRegistered(msg.to.clone()));
            }
        };
        queue
            .send(msg)
            .await
            .map_err(|e| Error::NotRegistered(e.0.to.clone()))
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use crate::error::Error;
    use crate::pool::MessagePool;
    use crate::protocol::MsgType;
    use crate::server::table::ClientTable;

    #[tokio::test]
    async fn test_forward_unregistered_then_registered() {
        let pool = MessagePool::new(8, 64);
        let table = ClientTable::new();
        let mut msg = pool.alloc();
        msg.fill("a", "b", MsgType::DirectOffer, b"offer");
        assert!(matches!(
            table.forward(msg).await,
            Err(Error::NotRegistered(key)) if key == "b"
        ));

        let (sender, mut receiver) = mpsc::channel(4);
        assert!(table.register("b", 1, sender));
        let mut msg = pool.alloc();
        msg.fill("a", "b", MsgType::DirectOffer, b"offer");
        table.forward(msg).await.unwrap();
        let got = receiver.recv().await.unwrap();
        assert_eq!(got.from, "a");
        assert_eq!(got.body, b"offer");
    }

    #[tokio::test]
    async fn test_register_idempotent() {
        let table = ClientTable::new();
        let (sender, _receiver) = mpsc::channel(4);
        assert!(table.register("b", 1, sender.clone()));
        assert!(!table.register("b", 1, sender.clone()));
        assert_eq!(table.len(), 1);

        // a new connection takes over the key, the old one cannot remove it
        let (sender2, _receiver2) = mpsc::channel(4);
        assert!(table.register("b", 2, sender2));
        assert!(!table.unregister("b", 1));
        assert!(table.contains("b"));
        assert!(table.unregister("b", 2));
        assert!(table.is_empty());
    }

    #[test]
    fn test_touch() {
        let table = ClientTable::new();
        assert!(!table.touch("x"));
        let (sender, _receiver) = mpsc::channel(1);
        table.register("x", 7, sender);
        let before = table.last_seen("x").unwrap();
        assert!(table.touch("x"));
        assert!(table.last_seen("x").unwrap() >= before);
    }
}
