//! Socket adapter boundary.
//!
//! The multiplexer never talks to a network stack directly.  Every socket
//! primitive it needs is consumed through the [`SocketApi`] trait, which mirrors
//! the BSD-like API exposed by small Wi-Fi/Ethernet adapter chips:
//!
//! ```text
//! socket(family, type, protocol) -> fd
//! setsockopt(fd, option)         -> status
//! bind(fd, address)              -> status
//! listen(fd, backlog)            -> status
//! accept(fd)                     -> fd | WOULD_BLOCK | error
//! ```
//!
//! plus the adapter-wide timeout call and the per-connection primitives
//! (`recv`, `send`, `close`, ...) that [`SocketClient`](crate::client::SocketClient)
//! builds on.
//!
//! # Why a trait? (for beginners)
//!
//! A trait is Rust's way of describing a capability without naming the type that
//! provides it.  The pool is generic over `A: SocketApi`, so the same pool code
//! runs against:
//!
//! - the in-memory [`mock::MockAdapter`] in unit tests and benchmarks,
//! - the `std::net` based host adapter in the `slotmux-server` crate,
//! - a real chip driver on an embedded target.
//!
//! All methods take `&self`.  Adapter drivers are process-wide singletons that
//! keep their own state, and the pool shares one adapter with every connection it
//! creates.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use thiserror::Error;

pub mod mock;

// ── Descriptors ───────────────────────────────────────────────────────────────

/// A socket descriptor handed out by the adapter.
///
/// Adapters report failures with negative return codes, so a `SocketFd` can only
/// be built from a non-negative raw value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SocketFd(i32);

impl SocketFd {
    /// Wraps a raw descriptor, returning `None` for negative (error) values.
    pub fn from_raw(raw: i32) -> Option<Self> {
        (raw >= 0).then_some(Self(raw))
    }

    /// Returns the raw descriptor value.
    pub fn raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for SocketFd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd#{}", self.0)
    }
}

// ── Socket parameters ─────────────────────────────────────────────────────────

/// Address family passed to [`SocketApi::socket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    /// IPv4 (`AF_INET`).  The only family the multiplexer uses.
    Inet,
}

/// Socket type passed to [`SocketApi::socket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    /// Connection-oriented byte stream (`SOCK_STREAM`).
    Stream,
}

/// Transport protocol passed to [`SocketApi::socket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
}

/// Per-socket options understood by [`SocketApi::set_option`].
///
/// Connection sockets are always non-blocking, so there is no option to change
/// how `recv` waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketOption {
    /// When enabled, `accept` returns [`AcceptOutcome::WouldBlock`] instead of
    /// stalling while no connection is pending.
    AcceptNonBlocking(bool),
}

/// Adapter-wide network timeouts.
///
/// Small adapters silently close sockets that have been idle for longer than the
/// inactivity timeout (60 seconds by default on common parts), including the
/// listening socket.  A zero inactivity timeout disables that behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterTimeouts {
    pub dhcp_lease: Duration,
    pub arp_cache: Duration,
    pub keepalive: Duration,
    /// Zero means "never close idle sockets".
    pub inactivity: Duration,
}

impl AdapterTimeouts {
    /// Returns a copy of these timeouts with idle disconnects disabled.
    pub fn never_idle(self) -> Self {
        Self {
            inactivity: Duration::ZERO,
            ..self
        }
    }
}

impl Default for AdapterTimeouts {
    fn default() -> Self {
        Self {
            dhcp_lease: Duration::from_secs(14_400),
            arp_cache: Duration::from_secs(3_600),
            keepalive: Duration::from_secs(30),
            inactivity: Duration::ZERO,
        }
    }
}

/// Result of a single non-blocking `accept` call.
#[derive(Debug)]
pub enum AcceptOutcome {
    /// A pending connection was accepted and bound to a fresh descriptor.
    Accepted(SocketFd),
    /// No connection is pending.
    WouldBlock,
    /// The adapter reported an error.  Callers treat this as transient.
    Failed(AdapterError),
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Error type for adapter primitives.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("invalid socket descriptor {0}")]
    InvalidDescriptor(SocketFd),
    #[error("operation would block")]
    WouldBlock,
    #[error("socket {0} is closed")]
    Closed(SocketFd),
    #[error("could not resolve host {0:?}")]
    UnresolvedHost(String),
    #[error("unsupported by this adapter: {0}")]
    Unsupported(&'static str),
    /// A raw negative status code returned by the adapter firmware.
    #[error("adapter returned status {0}")]
    Status(i32),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ── The adapter trait ─────────────────────────────────────────────────────────

/// Socket primitives exposed by a network adapter.
///
/// The production implementation wraps a chip driver or the host network stack;
/// tests use [`mock::MockAdapter`] or the `mockall`-generated `MockSocketApi`.
#[cfg_attr(test, mockall::automock)]
pub trait SocketApi {
    /// Configures adapter-wide timeouts.
    fn set_timeouts(&self, timeouts: &AdapterTimeouts) -> Result<(), AdapterError>;

    /// Creates a new socket.
    fn socket(
        &self,
        family: AddressFamily,
        kind: SocketKind,
        protocol: Protocol,
    ) -> Result<SocketFd, AdapterError>;

    /// Sets a per-socket option.
    fn set_option(&self, fd: SocketFd, option: SocketOption) -> Result<(), AdapterError>;

    /// Binds a socket to a local address.
    fn bind(&self, fd: SocketFd, addr: SocketAddrV4) -> Result<(), AdapterError>;

    /// Starts listening.  Adapters without backlog support expect `0`.
    fn listen(&self, fd: SocketFd, backlog: u8) -> Result<(), AdapterError>;

    /// Accepts one pending connection.  The peer address is not reported.
    fn accept(&self, listener: SocketFd) -> AcceptOutcome;

    /// Opens an outbound connection on a stream socket.
    fn connect(&self, fd: SocketFd, addr: SocketAddrV4) -> Result<(), AdapterError>;

    /// Resolves a hostname to an IPv4 address.
    fn resolve_host(&self, host: &str) -> Result<Ipv4Addr, AdapterError>;

    /// Returns `true` while a connection socket is open at both ends, or while
    /// bytes the peer sent before hanging up are still unread.
    fn is_open(&self, fd: SocketFd) -> bool;

    /// Number of received bytes buffered for `fd`.
    fn pending(&self, fd: SocketFd) -> Result<usize, AdapterError>;

    /// Receives up to `buf.len()` bytes without blocking.
    fn recv(&self, fd: SocketFd, buf: &mut [u8]) -> Result<usize, AdapterError>;

    /// Sends bytes once, returning how many the adapter accepted.
    fn send(&self, fd: SocketFd, buf: &[u8]) -> Result<usize, AdapterError>;

    /// Closes a socket and releases its descriptor.
    fn close(&self, fd: SocketFd) -> Result<(), AdapterError>;
}
