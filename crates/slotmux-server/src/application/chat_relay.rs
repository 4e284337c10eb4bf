//! ChatRelay: a multi-client chat room on top of the slot pool.
//!
//! Every tick runs one readiness scan.  Newly accepted clients receive a
//! greeting line; whatever the first ready client sent is relayed to every
//! connected client, the sender included.
//!
//! # Architecture
//!
//! The use case borrows the pool and never owns sockets, so it works with any
//! [`SocketApi`] implementation.  The pool is `!Sync`, which keeps the async
//! [`ChatRelay::run`] loop on the thread that created it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use slotmux_core::{Client, ConnectionSlotPool, SocketApi};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Maximum number of bytes relayed from one client per tick.
pub const RELAY_CHUNK: usize = 256;

/// Running totals for one relay session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub ticks: u64,
    pub accepted: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

/// What one tick did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    /// Clients accepted during this tick.
    pub accepted: usize,
    /// Bytes read from the ready client.
    pub received: usize,
    /// Sum of bytes written to all clients (greetings included).
    pub sent: usize,
}

/// Poll-driven chat relay over a borrowed pool.
pub struct ChatRelay<'p, 'a, A: SocketApi, const N: usize> {
    pool: &'p ConnectionSlotPool<'a, A, N>,
    greeting: String,
    stats: RelayStats,
}

impl<'p, 'a, A: SocketApi, const N: usize> ChatRelay<'p, 'a, A, N> {
    /// Creates a relay.  An empty `greeting` disables the welcome line.
    pub fn new(pool: &'p ConnectionSlotPool<'a, A, N>, greeting: impl Into<String>) -> Self {
        Self {
            pool,
            greeting: greeting.into(),
            stats: RelayStats::default(),
        }
    }

    pub fn stats(&self) -> RelayStats {
        self.stats
    }

    /// Runs one readiness scan and relays at most [`RELAY_CHUNK`] bytes.
    pub fn tick(&mut self) -> TickOutcome {
        let pool = self.pool;
        let mut outcome = TickOutcome::default();

        let was_connected: [bool; N] =
            std::array::from_fn(|i| pool.slot_id(i).is_some_and(|id| pool.is_slot_connected(id)));

        let ready = pool.find_readable_slot();

        if ready.new_client {
            for (index, before) in was_connected.into_iter().enumerate() {
                let Some(id) = pool.slot_id(index) else {
                    continue;
                };
                if before || !pool.is_slot_connected(id) {
                    continue;
                }
                outcome.accepted += 1;
                info!(slot = index, "client joined");
                if !self.greeting.is_empty() {
                    outcome.sent += pool.handle_for(Some(id)).println(&self.greeting);
                }
            }
        }

        let mut client = pool.handle_for(ready.slot);
        if bool::from(client) {
            let mut buf = [0u8; RELAY_CHUNK];
            let n = client.read_into(&mut buf);
            if n > 0 {
                outcome.received = n;
                outcome.sent += pool.broadcast_write(&buf[..n]);
                debug!(
                    slot = ready.slot.map(|s| s.index()),
                    bytes = n,
                    "relayed message"
                );
            }
        }

        self.stats.ticks += 1;
        self.stats.accepted += outcome.accepted as u64;
        self.stats.bytes_received += outcome.received as u64;
        self.stats.bytes_sent += outcome.sent as u64;
        outcome
    }

    /// Ticks every `interval` until `running` is cleared, then returns the
    /// session totals.
    pub async fn run(&mut self, interval: Duration, running: &AtomicBool) -> RelayStats {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while running.load(Ordering::Relaxed) {
            ticker.tick().await;
            self.tick();
        }

        info!(
            ticks = self.stats.ticks,
            accepted = self.stats.accepted,
            "relay stopped"
        );
        self.stats
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
