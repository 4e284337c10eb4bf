//! HostAdapter: the socket adapter API on top of the host's `std::net` stack.
//!
//! This lets the slot pool run on a desktop or server exactly as it would on a
//! small network chip.  Every descriptor handed out by the adapter maps to an
//! entry in a table:
//!
//! ```text
//! socket()  ──► Fresh
//! bind()    ──► Bound(TcpListener)        (std binds and listens in one call)
//! listen()  ──► Listening(TcpListener)
//! accept()  ──► Stream(TcpStream)         (new descriptor, non-blocking)
//! connect() ──► Stream(TcpStream)         (Fresh socket becomes a stream)
//! ```
//!
//! # Non-blocking behaviour
//!
//! The listener is switched to non-blocking mode when the pool sets
//! `AcceptNonBlocking`, so `accept` maps `io::ErrorKind::WouldBlock` to
//! [`AcceptOutcome::WouldBlock`].  Accepted streams are always non-blocking;
//! `recv` with nothing buffered reports [`AdapterError::WouldBlock`].
//!
//! A peer hang-up is detected lazily: a zero-length peek or read marks the
//! stream closed, after which `is_open` reports `false`.  Bytes the peer sent
//! before hanging up keep the peek non-empty, so the stream stays open until
//! they have been read.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{
    IpAddr, Ipv4Addr, Shutdown, SocketAddr, SocketAddrV4, TcpListener, TcpStream, ToSocketAddrs,
};
use std::time::Duration;

use slotmux_core::adapter::{
    AcceptOutcome, AdapterError, AdapterTimeouts, AddressFamily, Protocol, SocketApi, SocketFd,
    SocketKind, SocketOption,
};
use tracing::{debug, trace};

/// Upper bound on how many buffered bytes `pending` reports.
const PEEK_WINDOW: usize = 1460;

/// How long an outbound `connect` may take.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug)]
struct StreamEntry {
    stream: TcpStream,
    peer_closed: bool,
}

#[derive(Debug)]
enum Entry {
    Fresh { accept_nonblocking: bool },
    Bound(TcpListener),
    Listening(TcpListener),
    Stream(StreamEntry),
}

/// A [`SocketApi`] backed by `std::net` sockets.
///
/// Single-threaded like the pool that drives it.
#[derive(Debug, Default)]
pub struct HostAdapter {
    sockets: RefCell<HashMap<SocketFd, Entry>>,
    next_fd: Cell<i32>,
    timeouts: Cell<Option<AdapterTimeouts>>,
}

impl HostAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Local address of the first listening socket, if any.
    ///
    /// Useful when the pool was configured with port 0.
    pub fn listener_addr(&self) -> Option<SocketAddr> {
        self.sockets
            .borrow()
            .values()
            .find_map(|entry| match entry {
                Entry::Listening(listener) => listener.local_addr().ok(),
                _ => None,
            })
    }

    /// The timeouts most recently configured.  The host stack has no
    /// adapter-wide timeouts, so they are only recorded.
    pub fn configured_timeouts(&self) -> Option<AdapterTimeouts> {
        self.timeouts.get()
    }

    fn allocate(&self, entry: Entry) -> Result<SocketFd, AdapterError> {
        let raw = self.next_fd.get();
        let fd = SocketFd::from_raw(raw).ok_or(AdapterError::Unsupported(
            "descriptor space exhausted",
        ))?;
        self.next_fd.set(raw.wrapping_add(1));
        self.sockets.borrow_mut().insert(fd, entry);
        Ok(fd)
    }

    fn with_stream<T>(
        &self,
        fd: SocketFd,
        f: impl FnOnce(&mut StreamEntry) -> Result<T, AdapterError>,
    ) -> Result<T, AdapterError> {
        match self.sockets.borrow_mut().get_mut(&fd) {
            Some(Entry::Stream(entry)) => f(entry),
            Some(_) => Err(AdapterError::Unsupported("not a connected stream")),
            None => Err(AdapterError::Closed(fd)),
        }
    }
}

/// Peeks at the stream, returning the number of buffered bytes and marking the
/// entry closed if the peer has hung up.
fn peek_buffered(entry: &mut StreamEntry) -> usize {
    if entry.peer_closed {
        return 0;
    }
    let mut window = [0u8; PEEK_WINDOW];
    match entry.stream.peek(&mut window) {
        Ok(0) => {
            entry.peer_closed = true;
            0
        }
        Ok(n) => n,
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => 0,
        Err(err) => {
            trace!(error = %err, "peek failed; treating stream as closed");
            entry.peer_closed = true;
            0
        }
    }
}

fn to_v4(addr: SocketAddr) -> Option<Ipv4Addr> {
    match addr.ip() {
        IpAddr::V4(ip) => Some(ip),
        IpAddr::V6(_) => None,
    }
}

impl SocketApi for HostAdapter {
    fn set_timeouts(&self, timeouts: &AdapterTimeouts) -> Result<(), AdapterError> {
        debug!(?timeouts, "recording adapter timeouts");
        self.timeouts.set(Some(*timeouts));
        Ok(())
    }

    fn socket(
        &self,
        family: AddressFamily,
        kind: SocketKind,
        protocol: Protocol,
    ) -> Result<SocketFd, AdapterError> {
        let (AddressFamily::Inet, SocketKind::Stream, Protocol::Tcp) = (family, kind, protocol);
        self.allocate(Entry::Fresh {
            accept_nonblocking: false,
        })
    }

    fn set_option(&self, fd: SocketFd, option: SocketOption) -> Result<(), AdapterError> {
        let mut sockets = self.sockets.borrow_mut();
        let entry = sockets
            .get_mut(&fd)
            .ok_or(AdapterError::InvalidDescriptor(fd))?;
        match (entry, option) {
            (Entry::Fresh { accept_nonblocking }, SocketOption::AcceptNonBlocking(on)) => {
                *accept_nonblocking = on;
            }
            (
                Entry::Bound(listener) | Entry::Listening(listener),
                SocketOption::AcceptNonBlocking(on),
            ) => listener.set_nonblocking(on)?,
            (Entry::Stream(_), option) => {
                trace!(%fd, ?option, "rejected option on connection socket");
                return Err(AdapterError::Unsupported(
                    "connection sockets are always non-blocking",
                ));
            }
        }
        Ok(())
    }

    fn bind(&self, fd: SocketFd, addr: SocketAddrV4) -> Result<(), AdapterError> {
        let mut sockets = self.sockets.borrow_mut();
        let accept_nonblocking = match sockets.get(&fd) {
            Some(Entry::Fresh { accept_nonblocking }) => *accept_nonblocking,
            Some(_) => return Err(AdapterError::Unsupported("socket is already bound")),
            None => return Err(AdapterError::InvalidDescriptor(fd)),
        };
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(accept_nonblocking)?;
        debug!(%fd, addr = ?listener.local_addr().ok(), "bound listener");
        sockets.insert(fd, Entry::Bound(listener));
        Ok(())
    }

    fn listen(&self, fd: SocketFd, backlog: u8) -> Result<(), AdapterError> {
        let mut sockets = self.sockets.borrow_mut();
        match sockets.remove(&fd) {
            Some(Entry::Bound(listener)) => {
                // std already listens with its own backlog.
                trace!(%fd, backlog, "listen");
                sockets.insert(fd, Entry::Listening(listener));
                Ok(())
            }
            Some(other) => {
                sockets.insert(fd, other);
                Err(AdapterError::Unsupported("listen requires a bound socket"))
            }
            None => Err(AdapterError::InvalidDescriptor(fd)),
        }
    }

    fn accept(&self, listener: SocketFd) -> AcceptOutcome {
        let accepted = match self.sockets.borrow().get(&listener) {
            Some(Entry::Listening(socket)) => socket.accept(),
            _ => return AcceptOutcome::Failed(AdapterError::InvalidDescriptor(listener)),
        };
        match accepted {
            Ok((stream, peer)) => {
                if let Err(err) = stream.set_nonblocking(true) {
                    return AcceptOutcome::Failed(err.into());
                }
                match self.allocate(Entry::Stream(StreamEntry {
                    stream,
                    peer_closed: false,
                })) {
                    Ok(fd) => {
                        debug!(%fd, %peer, "accepted host connection");
                        AcceptOutcome::Accepted(fd)
                    }
                    Err(err) => AcceptOutcome::Failed(err),
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => AcceptOutcome::WouldBlock,
            Err(err) => AcceptOutcome::Failed(err.into()),
        }
    }

    fn connect(&self, fd: SocketFd, addr: SocketAddrV4) -> Result<(), AdapterError> {
        let mut sockets = self.sockets.borrow_mut();
        match sockets.get(&fd) {
            Some(Entry::Fresh { .. }) => {}
            Some(_) => return Err(AdapterError::Unsupported("socket is not fresh")),
            None => return Err(AdapterError::InvalidDescriptor(fd)),
        }
        let stream = TcpStream::connect_timeout(&SocketAddr::V4(addr), CONNECT_TIMEOUT)?;
        stream.set_nonblocking(true)?;
        sockets.insert(
            fd,
            Entry::Stream(StreamEntry {
                stream,
                peer_closed: false,
            }),
        );
        Ok(())
    }

    fn resolve_host(&self, host: &str) -> Result<Ipv4Addr, AdapterError> {
        (host, 0u16)
            .to_socket_addrs()
            .map_err(|_| AdapterError::UnresolvedHost(host.to_string()))?
            .find_map(to_v4)
            .ok_or_else(|| AdapterError::UnresolvedHost(host.to_string()))
    }

    fn is_open(&self, fd: SocketFd) -> bool {
        self.with_stream(fd, |entry| {
            peek_buffered(entry);
            Ok(!entry.peer_closed)
        })
        .unwrap_or(false)
    }

    fn pending(&self, fd: SocketFd) -> Result<usize, AdapterError> {
        self.with_stream(fd, |entry| Ok(peek_buffered(entry)))
    }

    fn recv(&self, fd: SocketFd, buf: &mut [u8]) -> Result<usize, AdapterError> {
        self.with_stream(fd, |entry| match entry.stream.read(buf) {
            Ok(0) if !buf.is_empty() => {
                entry.peer_closed = true;
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Err(AdapterError::WouldBlock),
            Err(err) => Err(err.into()),
        })
    }

    fn send(&self, fd: SocketFd, buf: &[u8]) -> Result<usize, AdapterError> {
        self.with_stream(fd, |entry| match entry.stream.write(buf) {
            Ok(n) => Ok(n),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(err) => {
                entry.peer_closed = true;
                Err(err.into())
            }
        })
    }

    fn close(&self, fd: SocketFd) -> Result<(), AdapterError> {
        match self.sockets.borrow_mut().remove(&fd) {
            Some(Entry::Stream(entry)) => {
                if let Err(err) = entry.stream.shutdown(Shutdown::Both) {
                    trace!(%fd, error = %err, "shutdown on close failed");
                }
                Ok(())
            }
            Some(_) => Ok(()),
            None => Err(AdapterError::InvalidDescriptor(fd)),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
