// ABOUTME: Server-side table of connected clients, keyed by assigned endpoint id
// ABOUTME: Owns each client's writer handle and receive task; assigns the smallest free id

use crate::connection::PacketWriter;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Ids `1..=254` are assignable; `0` is the server, `255` is reserved.
pub const MIN_CLIENT_ID: u8 = 1;
pub const MAX_CLIENT_ID: u8 = 254;

/// One connected client. The entry owns the writer half of its socket — no other
/// roster entry ever touches it. Its receive task handle lives separately in the
/// server's task list, since `JoinHandle` is not `Clone` and the entry itself is
/// removed (by that very task) before shutdown needs to join it.
pub struct RosterEntry {
    pub id: u8,
    pub name: String,
    pub addr: SocketAddr,
    pub writer: Arc<PacketWriter>,
}

/// A lightweight, cloneable snapshot of one roster entry for building a
/// `REQCLILIST` reply without holding the roster lock while formatting.
#[derive(Debug, Clone)]
pub struct RosterSnapshot {
    pub id: u8,
    pub name: String,
    pub addr: SocketAddr,
}

#[derive(Debug, Default)]
pub struct Roster {
    entries: Mutex<HashMap<u8, RosterEntry>>,
}

impl Roster {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The smallest id in `1..=max_clients` not currently assigned, or `None` if full.
    pub async fn next_free_id(&self, max_clients: usize) -> Option<u8> {
        let entries = self.entries.lock().await;
        Self::find_free_id(&entries, max_clients)
    }

    fn find_free_id(entries: &HashMap<u8, RosterEntry>, max_clients: usize) -> Option<u8> {
        let ceiling = MIN_CLIENT_ID as usize + max_clients.min(MAX_CLIENT_ID as usize) - 1;
        (MIN_CLIENT_ID as usize..=ceiling.min(MAX_CLIENT_ID as usize))
            .map(|id| id as u8)
            .find(|id| !entries.contains_key(id))
    }

    pub async fn insert(&self, entry: RosterEntry) {
        self.entries.lock().await.insert(entry.id, entry);
    }

    /// Atomically pick the smallest free id and insert the new entry under it, so a
    /// concurrent `onboard` can never observe the same id as free and race an insert
    /// — the whole find-then-reserve sequence runs under one lock acquisition.
    pub async fn assign(&self, max_clients: usize, name: String, addr: SocketAddr, writer: Arc<PacketWriter>) -> Option<u8> {
        let mut entries = self.entries.lock().await;
        let id = Self::find_free_id(&entries, max_clients)?;
        entries.insert(id, RosterEntry { id, name, addr, writer });
        Some(id)
    }

    /// Remove and return the entry for `id`, if present. Does not abort its task —
    /// the caller is assumed to be reacting to that task's own exit.
    pub async fn remove(&self, id: u8) -> Option<RosterEntry> {
        self.entries.lock().await.remove(&id)
    }

    pub async fn writer_for(&self, id: u8) -> Option<Arc<PacketWriter>> {
        self.entries.lock().await.get(&id).map(|e| Arc::clone(&e.writer))
    }

    pub async fn contains(&self, id: u8) -> bool {
        self.entries.lock().await.contains_key(&id)
    }

    pub async fn snapshot(&self) -> Vec<RosterSnapshot> {
        self.entries
            .lock()
            .await
            .values()
            .map(|e| RosterSnapshot {
                id: e.id,
                name: e.name.clone(),
                addr: e.addr,
            })
            .collect()
    }

    pub async fn all_ids(&self) -> Vec<u8> {
        self.entries.lock().await.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_entry(id: u8, writer: Arc<PacketWriter>) -> RosterEntry {
        RosterEntry {
            id,
            name: format!("client-{id}"),
            addr: "127.0.0.1:1234".parse().unwrap(),
            writer,
        }
    }

    async fn make_writer() -> Arc<PacketWriter> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (a, (b, _)) = tokio::join!(tokio::net::TcpStream::connect(addr), listener.accept());
        let (_reader, writer) = crate::connection::split(a.unwrap(), crate::heartbeat::DEFAULT_MISS_THRESHOLD);
        drop(b);
        writer
    }

    #[tokio::test]
    async fn next_free_id_is_smallest_unused() {
        let roster = Roster::new();
        let writer = make_writer().await;
        roster.insert(dummy_entry(1, Arc::clone(&writer))).await;
        roster.insert(dummy_entry(3, Arc::clone(&writer))).await;
        assert_eq!(roster.next_free_id(254).await, Some(2));
    }

    #[tokio::test]
    async fn next_free_id_respects_max_clients() {
        let roster = Roster::new();
        let writer = make_writer().await;
        roster.insert(dummy_entry(1, Arc::clone(&writer))).await;
        assert_eq!(roster.next_free_id(1).await, None);
    }

    #[tokio::test]
    async fn assign_reserves_the_id_it_returns() {
        let roster = Roster::new();
        let writer = make_writer().await;
        let id = roster
            .assign(254, "alice".to_string(), "127.0.0.1:1234".parse().unwrap(), writer)
            .await
            .unwrap();
        assert_eq!(id, 1);
        assert!(roster.contains(id).await);
    }

    #[tokio::test]
    async fn remove_then_contains_is_false() {
        let roster = Roster::new();
        let writer = make_writer().await;
        roster.insert(dummy_entry(5, writer)).await;
        assert!(roster.contains(5).await);
        roster.remove(5).await;
        assert!(!roster.contains(5).await);
    }
}
