// ABOUTME: Thread-safe packet-id keyed correlation table shared by client and server engines
// ABOUTME: Transactional insert/remove/take so no caller ever holds a reference across an .await

use std::collections::HashMap;
use tokio::sync::Mutex;

/// Maps a pending packet id to whatever continuation a caller needs once its ACK
/// arrives. Used on the client side keyed by `RequestKind` and on the server side
/// keyed by `PacketInfo` (see `server::relay`).
///
/// Every operation takes the lock, does its full work, and releases it — no
/// iterator or reference escapes a critical section, per the crate's
/// re-architecture note on the source's "mutex exposing long-lived references"
/// anti-pattern.
#[derive(Debug, Default)]
pub struct InFlightTable<V> {
    entries: Mutex<HashMap<u16, V>>,
}

/// Raised when an insert targets a packet id already pending. The allocator makes
/// this unreachable in practice; treat it as an invariant violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("packet id {0} is already in flight")]
pub struct DuplicateId(pub u16);

impl<V> InFlightTable<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Insert `value` under `packet_id`. Fails if the id is already pending.
    pub async fn insert(&self, packet_id: u16, value: V) -> Result<(), DuplicateId> {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(&packet_id) {
            return Err(DuplicateId(packet_id));
        }
        entries.insert(packet_id, value);
        Ok(())
    }

    /// Remove and return the value pending under `packet_id`, if any.
    ///
    /// An ACK whose id is not present is tolerated silently: callers get `None`
    /// and simply drop the packet.
    pub async fn take(&self, packet_id: u16) -> Option<V> {
        self.entries.lock().await.remove(&packet_id)
    }

    pub async fn contains(&self, packet_id: u16) -> bool {
        self.entries.lock().await.contains_key(&packet_id)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Remove every entry for which `predicate` returns `true`, returning the
    /// removed `(packet_id, value)` pairs. Used for roster-clearance sweeps where
    /// the caller needs to act on every entry tied to a departing endpoint.
    pub async fn drain_where<F>(&self, mut predicate: F) -> Vec<(u16, V)>
    where
        F: FnMut(&V) -> bool,
    {
        let mut entries = self.entries.lock().await;
        let keys: Vec<u16> = entries
            .iter()
            .filter(|(_, v)| predicate(v))
            .map(|(k, _)| *k)
            .collect();
        keys.into_iter()
            .map(|k| (k, entries.remove(&k).expect("key just observed present")))
            .collect()
    }
}
