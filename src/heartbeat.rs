// ABOUTME: Per-connection heartbeat liveness tracking, modeled on keepalive timeout management
// ABOUTME: A missed-heartbeat counter plus a ticker task that turns silence into a synthetic disconnect

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Heartbeats are expected at this cadence; the ticker checks for a missed beat
/// once per interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Number of consecutive missed intervals before a peer is declared dead.
pub const DEFAULT_MISS_THRESHOLD: u32 = 3;

/// Shared, lock-free liveness counter for one connection's receive side.
///
/// The receive task increments it on a timer and resets it to zero whenever a
/// `HEARTBEAT` packet is decoded; `PacketReader::read_one` polls `is_dead` before
/// every blocking read so a silent peer is evicted even while no bytes are arriving.
#[derive(Debug, Default)]
pub struct MissedHeartbeats {
    count: AtomicU32,
    threshold: AtomicU32,
}

impl MissedHeartbeats {
    pub fn new() -> Self {
        Self {
            count: AtomicU32::new(0),
            threshold: AtomicU32::new(DEFAULT_MISS_THRESHOLD),
        }
    }

    pub fn with_threshold(threshold: u32) -> Self {
        Self {
            count: AtomicU32::new(0),
            threshold: AtomicU32::new(threshold),
        }
    }

    pub fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
    }

    pub fn tick(&self) -> u32 {
        self.count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn is_dead(&self) -> bool {
        self.count.load(Ordering::Relaxed) >= self.threshold.load(Ordering::Relaxed)
    }
}

/// Drives a [`MissedHeartbeats`] counter on a fixed interval and sends outgoing
/// heartbeats of its own, spawned once per connection alongside its receive task.
///
/// Mirrors the shape of a keepalive manager: a background tick loop, a way to stop
/// it, and a status snapshot for diagnostics.
pub struct HeartbeatMonitor {
    handle: JoinHandle<()>,
    stop_tx: watch::Sender<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatStatus {
    pub missed: u32,
    pub threshold: u32,
    pub alive: bool,
}

impl HeartbeatMonitor {
    /// Spawn the ticker. `on_tick` runs once per interval and is where the caller
    /// sends its own outgoing `HEARTBEAT` packet; its failure is logged, not fatal —
    /// a write error surfaces soon enough through the read side as `PeerClosed`.
    pub fn spawn<F, Fut>(
        missed: std::sync::Arc<MissedHeartbeats>,
        interval: Duration,
        mut on_tick: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let count = missed.tick();
                        if count > 1 {
                            debug!(count, "missed heartbeat tick");
                        }
                        on_tick().await;
                    }
                    _ = stop_rx.changed() => break,
                }
            }
        });
        Self { handle, stop_tx }
    }

    pub fn stop(self) {
        let _ = self.stop_tx.send(true);
        self.handle.abort();
    }
}
