//! ConnectionSlotPool: a fixed-capacity TCP server over a non-blocking adapter.
//!
//! The pool owns one listening socket and `N` connection slots.  It never
//! allocates after construction and never blocks.
//!
//! # The readiness scan (for beginners)
//!
//! Small network adapters cannot notify the application when something happens.
//! Instead, the application calls [`ConnectionSlotPool::find_readable_slot`]
//! once per iteration of its control loop.  Each call does two things:
//!
//! 1. **Accept**: every slot that is not connected gets one chance to take a
//!    pending inbound connection.  The listening socket is non-blocking, so when
//!    nothing is pending the adapter answers "would block" immediately.
//! 2. **Scan**: the slots are checked in ascending order and the first one that
//!    is connected *and* has buffered input wins.
//!
//! ```text
//!   find_readable_slot()
//!     ├─ accept_pending_connections()
//!     │     slot[0] connected   → skip
//!     │     slot[1] empty       → accept() → fd#7  → slot[1] = fd#7
//!     │     slot[2] empty       → accept() → WOULD_BLOCK
//!     └─ scan
//!           slot[0] available=0 → skip
//!           slot[1] available=5 → return Some(1), new_client = true
//! ```
//!
//! The lowest index always wins.  With only a handful of slots this simple
//! priority order is predictable and cheap; no fairness rotation is attempted.
//!
//! # Slot state
//!
//! The pool does not remember which slots are in use.  "Connected" is asked of
//! the connection object every time, so a peer that hung up is noticed lazily on
//! the next pass and its slot is reused.

use std::cell::RefCell;
use std::net::{Ipv4Addr, SocketAddrV4};

use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::adapter::{
    AcceptOutcome, AdapterError, AdapterTimeouts, AddressFamily, Protocol, SocketApi, SocketFd,
    SocketKind, SocketOption,
};
use crate::client::{Client, SocketClient};
use crate::handle::ConnectionHandle;

/// Number of slots used by [`ConnectionSlotPool::new`].
pub const DEFAULT_MAX_CLIENTS: usize = 3;

/// The adapter does not support a listen backlog.
const LISTEN_BACKLOG: u8 = 0;

/// Error type for listener initialisation.  Each variant names the failed step.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("failed to configure adapter timeouts: {0}")]
    Timeouts(#[source] AdapterError),
    #[error("failed to create listening socket: {0}")]
    Socket(#[source] AdapterError),
    #[error("failed to make accept non-blocking on {fd}: {source}")]
    NonBlocking {
        fd: SocketFd,
        #[source]
        source: AdapterError,
    },
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddrV4,
        #[source]
        source: AdapterError,
    },
    #[error("failed to listen on {addr}: {source}")]
    Listen {
        addr: SocketAddrV4,
        #[source]
        source: AdapterError,
    },
}

/// Position of a slot in the pool.
///
/// Stable for the lifetime of the connection occupying it, so callers may use
/// [`SlotId::index`] to index their own per-client state arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(usize);

impl SlotId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Outcome of one readiness scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    /// The lowest connected slot with input available, if any.
    pub slot: Option<SlotId>,
    /// `true` if this scan accepted at least one new connection.
    pub new_client: bool,
}

/// Capability interface of a server endpoint.
pub trait Server {
    /// Starts listening.
    fn begin(&mut self) -> Result<(), InitError>;

    /// Writes `buf` to every connected client and returns the total written.
    fn write(&mut self, buf: &[u8]) -> usize;

    /// Writes one byte to every connected client.
    fn write_byte(&mut self, byte: u8) -> usize {
        self.write(&[byte])
    }
}

/// Handle type produced by a pool over adapter `A`.
pub type PoolHandle<'p, 'a, A> = ConnectionHandle<'p, SocketClient<'a, A>>;

/// A listening socket plus `N` reusable connection slots.
pub struct ConnectionSlotPool<'a, A: SocketApi, const N: usize = DEFAULT_MAX_CLIENTS> {
    adapter: &'a A,
    port: u16,
    timeouts: AdapterTimeouts,
    listener: Option<SocketFd>,
    slots: [RefCell<SocketClient<'a, A>>; N],
}

impl<'a, A: SocketApi> ConnectionSlotPool<'a, A> {
    /// Creates a pool with [`DEFAULT_MAX_CLIENTS`] slots that will listen on `port`.
    pub fn new(adapter: &'a A, port: u16) -> Self {
        Self::with_slots(adapter, port)
    }
}

impl<'a, A: SocketApi, const N: usize> ConnectionSlotPool<'a, A, N> {
    /// Creates a pool with `N` slots that will listen on `port`.
    ///
    /// Nothing touches the adapter until [`initialize`](Self::initialize).
    pub fn with_slots(adapter: &'a A, port: u16) -> Self {
        Self {
            adapter,
            port,
            timeouts: AdapterTimeouts::default(),
            listener: None,
            slots: std::array::from_fn(|_| RefCell::new(SocketClient::new(adapter))),
        }
    }

    /// Overrides the adapter timeouts applied by `initialize`.
    ///
    /// The inactivity timeout is always forced to zero.
    pub fn with_timeouts(mut self, timeouts: AdapterTimeouts) -> Self {
        self.timeouts = timeouts.never_idle();
        self
    }

    /// The port this pool listens (or will listen) on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        N
    }

    /// Returns `true` once `initialize` has fully succeeded.
    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    /// Validates a slot index.
    pub fn slot_id(&self, index: usize) -> Option<SlotId> {
        (index < N).then_some(SlotId(index))
    }

    /// Returns `true` if the slot currently holds an established connection.
    pub fn is_slot_connected(&self, slot: SlotId) -> bool {
        self.slots
            .get(slot.0)
            .is_some_and(|cell| cell.borrow().connected())
    }

    /// Number of slots currently holding an established connection.
    pub fn connected_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|cell| cell.borrow().connected())
            .count()
    }

    /// Configures the adapter and opens the listening socket.
    ///
    /// Steps, in order: adapter timeouts (idle disconnect disabled so the
    /// adapter does not silently close the listener), socket creation,
    /// non-blocking accept, bind to `0.0.0.0:port`, listen with backlog 0.
    ///
    /// On failure the pool stays non-listening and the caller may try again.
    /// Calling this on a listening pool does nothing.
    ///
    /// # Errors
    ///
    /// Returns the [`InitError`] variant for the step that failed.
    pub fn initialize(&mut self) -> Result<(), InitError> {
        if let Some(fd) = self.listener {
            debug!(%fd, port = self.port, "listener already initialised");
            return Ok(());
        }

        match self.open_listener() {
            Ok(fd) => {
                info!(%fd, port = self.port, slots = N, "listening for connections");
                self.listener = Some(fd);
                Ok(())
            }
            Err(err) => {
                warn!(port = self.port, error = %err, "listener initialisation failed");
                Err(err)
            }
        }
    }

    fn open_listener(&self) -> Result<SocketFd, InitError> {
        self.adapter
            .set_timeouts(&self.timeouts)
            .map_err(InitError::Timeouts)?;

        let fd = self
            .adapter
            .socket(AddressFamily::Inet, SocketKind::Stream, Protocol::Tcp)
            .map_err(InitError::Socket)?;

        if let Err(err) = self.configure_listener(fd) {
            if let Err(close_err) = self.adapter.close(fd) {
                trace!(%fd, error = %close_err, "close after failed initialisation");
            }
            return Err(err);
        }
        Ok(fd)
    }

    fn configure_listener(&self, fd: SocketFd) -> Result<(), InitError> {
        self.adapter
            .set_option(fd, SocketOption::AcceptNonBlocking(true))
            .map_err(|source| InitError::NonBlocking { fd, source })?;

        let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.port);
        self.adapter
            .bind(fd, addr)
            .map_err(|source| InitError::Bind { addr, source })?;
        self.adapter
            .listen(fd, LISTEN_BACKLOG)
            .map_err(|source| InitError::Listen { addr, source })?;
        Ok(())
    }

    /// Gives every unconnected slot one non-blocking accept attempt.
    ///
    /// Returns `true` if at least one slot received a new connection.  Slots that
    /// are connected are never touched.  To drain more pending connections than
    /// there are free slots, call again once slots free up.
    pub fn accept_pending_connections(&self) -> bool {
        let Some(listener) = self.listener else {
            trace!("accept skipped: not listening");
            return false;
        };

        let mut created = false;
        for (index, cell) in self.slots.iter().enumerate() {
            if cell.borrow().connected() {
                continue;
            }
            match self.adapter.accept(listener) {
                AcceptOutcome::Accepted(fd) => {
                    let mut client = cell.borrow_mut();
                    // Reusing a slot closes whatever dead connection it held.
                    client.stop();
                    *client = SocketClient::from_raw(self.adapter, fd);
                    debug!(slot = index, %fd, "accepted connection");
                    created = true;
                }
                AcceptOutcome::WouldBlock => {}
                AcceptOutcome::Failed(err) => {
                    trace!(slot = index, error = %err, "accept failed");
                }
            }
        }
        created
    }

    /// Accepts pending connections, then finds the lowest connected slot with
    /// input available.
    pub fn find_readable_slot(&self) -> Readiness {
        let new_client = self.accept_pending_connections();
        let slot = self
            .slots
            .iter()
            .position(|cell| {
                let client = cell.borrow();
                client.connected() && client.available() > 0
            })
            .map(SlotId);
        Readiness { slot, new_client }
    }

    /// Converts a slot identifier into a handle.  `None` gives the null handle.
    pub fn handle_for(&self, slot: Option<SlotId>) -> PoolHandle<'_, 'a, A> {
        slot.and_then(|id| self.slots.get(id.0))
            .map_or_else(ConnectionHandle::null, ConnectionHandle::bound)
    }

    /// Runs a readiness scan and returns a handle to the ready client, or the
    /// null handle when no client has data.
    pub fn available(&self) -> PoolHandle<'_, 'a, A> {
        self.handle_for(self.find_readable_slot().slot)
    }

    /// Writes `bytes` once to every connected slot and returns the sum of the
    /// per-slot counts.  Partial writes are passed through as-is.
    pub fn broadcast_write(&self, bytes: &[u8]) -> usize {
        self.slots
            .iter()
            .map(|cell| {
                let mut client = cell.borrow_mut();
                if client.connected() {
                    client.write(bytes)
                } else {
                    0
                }
            })
            .sum()
    }

    /// Writes one byte to every connected slot.
    pub fn broadcast_byte(&self, byte: u8) -> usize {
        self.broadcast_write(&[byte])
    }
}

impl<A: SocketApi, const N: usize> Server for ConnectionSlotPool<'_, A, N> {
    fn begin(&mut self) -> Result<(), InitError> {
        self.initialize()
    }

    fn write(&mut self, buf: &[u8]) -> usize {
        self.broadcast_write(buf)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
