//! Per-connection objects.
//!
//! [`Client`] is the capability interface shared by every network endpoint that
//! behaves like one TCP connection: the concrete [`SocketClient`] and the
//! non-owning [`ConnectionHandle`](crate::handle::ConnectionHandle) both implement
//! it, so calling code can treat them interchangeably.
//!
//! # Neutral results instead of errors
//!
//! Byte-level operations never fail loudly.  A read with nothing buffered
//! returns `None`, a write that the adapter rejects returns `0`, and so on.  Only
//! `connect` and `close` report a [`ClientError`], because callers usually want
//! to know why those failed.

use std::fmt;
use std::net::SocketAddrV4;

use thiserror::Error;
use tracing::{debug, trace};

use crate::adapter::{AdapterError, AddressFamily, Protocol, SocketApi, SocketFd, SocketKind};

/// Error type for connection-level operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The operation was invoked through a handle that refers to no connection.
    #[error("handle is not bound to a connection")]
    NotBound,
    #[error("client is already connected")]
    AlreadyConnected,
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),
}

/// Capability interface of a single connection.
pub trait Client {
    /// Opens an outbound connection to `addr`.
    fn connect(&mut self, addr: SocketAddrV4) -> Result<(), ClientError>;

    /// Resolves `host` and opens an outbound connection to it.
    fn connect_host(&mut self, host: &str, port: u16) -> Result<(), ClientError>;

    /// Returns `true` while the connection is established.
    fn connected(&self) -> bool;

    /// Number of received bytes that can be read without blocking.
    fn available(&self) -> usize;

    /// Reads one byte, or `None` when nothing is buffered.
    fn read(&mut self) -> Option<u8>;

    /// Reads up to `buf.len()` bytes and returns how many were read.
    fn read_into(&mut self, buf: &mut [u8]) -> usize;

    /// Returns the next byte without consuming it.
    fn peek(&mut self) -> Option<u8>;

    /// Writes one byte and returns how many bytes were written (0 or 1).
    fn write_byte(&mut self, byte: u8) -> usize {
        self.write(&[byte])
    }

    /// Writes `buf` once and returns how many bytes the peer accepted.
    fn write(&mut self, buf: &[u8]) -> usize;

    /// Pushes any locally buffered output.
    fn flush(&mut self);

    /// Closes the connection.
    fn close(&mut self) -> Result<(), ClientError>;

    /// Closes the connection, discarding any error.
    fn stop(&mut self) {
        if let Err(err) = self.close() {
            trace!(error = %err, "close during stop failed");
        }
    }

    /// Writes a string and returns the number of bytes written.
    fn print(&mut self, text: &str) -> usize {
        self.write(text.as_bytes())
    }

    /// Writes a string followed by CRLF.
    fn println(&mut self, text: &str) -> usize {
        let written = self.print(text);
        written + self.write(b"\r\n")
    }
}

/// A connection backed by one adapter socket descriptor.
///
/// A default-constructed client is unconnected.  The server pool keeps one per
/// slot and replaces it with [`SocketClient::from_raw`] whenever it accepts a new
/// connection into that slot.
pub struct SocketClient<'a, A: SocketApi> {
    adapter: &'a A,
    fd: Option<SocketFd>,
    peeked: Option<u8>,
}

impl<'a, A: SocketApi> SocketClient<'a, A> {
    /// Creates an unconnected client.
    pub fn new(adapter: &'a A) -> Self {
        Self {
            adapter,
            fd: None,
            peeked: None,
        }
    }

    /// Wraps a descriptor returned by `accept`.
    pub fn from_raw(adapter: &'a A, fd: SocketFd) -> Self {
        Self {
            adapter,
            fd: Some(fd),
            peeked: None,
        }
    }

    /// The descriptor this client owns, if any.
    pub fn fd(&self) -> Option<SocketFd> {
        self.fd
    }

    fn recv_byte(&mut self, fd: SocketFd) -> Option<u8> {
        let mut byte = [0u8; 1];
        match self.adapter.recv(fd, &mut byte) {
            Ok(1) => Some(byte[0]),
            Ok(_) | Err(AdapterError::WouldBlock) => None,
            Err(err) => {
                trace!(%fd, error = %err, "recv failed");
                None
            }
        }
    }
}

impl<A: SocketApi> fmt::Debug for SocketClient<'_, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketClient")
            .field("fd", &self.fd)
            .field("peeked", &self.peeked)
            .finish()
    }
}

impl<A: SocketApi> Client for SocketClient<'_, A> {
    fn connect(&mut self, addr: SocketAddrV4) -> Result<(), ClientError> {
        if self.connected() {
            return Err(ClientError::AlreadyConnected);
        }
        // A descriptor whose peer already hung up is released before reuse.
        self.stop();

        let fd = self
            .adapter
            .socket(AddressFamily::Inet, SocketKind::Stream, Protocol::Tcp)?;
        if let Err(err) = self.adapter.connect(fd, addr) {
            if let Err(close_err) = self.adapter.close(fd) {
                trace!(%fd, error = %close_err, "close after failed connect");
            }
            return Err(err.into());
        }
        debug!(%fd, %addr, "outbound connection established");
        self.fd = Some(fd);
        Ok(())
    }

    fn connect_host(&mut self, host: &str, port: u16) -> Result<(), ClientError> {
        let ip = self.adapter.resolve_host(host)?;
        self.connect(SocketAddrV4::new(ip, port))
    }

    // A peeked byte is still unread, so it keeps a hung-up peer connected.
    fn connected(&self) -> bool {
        self.fd
            .is_some_and(|fd| self.peeked.is_some() || self.adapter.is_open(fd))
    }

    fn available(&self) -> usize {
        let Some(fd) = self.fd else {
            return 0;
        };
        let buffered = self.adapter.pending(fd).unwrap_or(0);
        buffered + usize::from(self.peeked.is_some())
    }

    fn read(&mut self) -> Option<u8> {
        let fd = self.fd?;
        self.peeked.take().or_else(|| self.recv_byte(fd))
    }

    fn read_into(&mut self, buf: &mut [u8]) -> usize {
        let Some(fd) = self.fd else {
            return 0;
        };
        if buf.is_empty() {
            return 0;
        }

        let mut filled = 0;
        if let Some(byte) = self.peeked.take() {
            buf[0] = byte;
            filled = 1;
        }
        match self.adapter.recv(fd, &mut buf[filled..]) {
            Ok(n) => filled + n,
            Err(AdapterError::WouldBlock) => filled,
            Err(err) => {
                trace!(%fd, error = %err, "bulk recv failed");
                filled
            }
        }
    }

    fn peek(&mut self) -> Option<u8> {
        let fd = self.fd?;
        if self.peeked.is_none() {
            self.peeked = self.recv_byte(fd);
        }
        self.peeked
    }

    fn write(&mut self, buf: &[u8]) -> usize {
        let Some(fd) = self.fd else {
            return 0;
        };
        match self.adapter.send(fd, buf) {
            Ok(n) => n,
            Err(err) => {
                debug!(%fd, error = %err, "send failed");
                0
            }
        }
    }

    // Sends go straight to the adapter; there is no local output buffer.
    fn flush(&mut self) {}

    fn close(&mut self) -> Result<(), ClientError> {
        self.peeked = None;
        match self.fd.take() {
            Some(fd) => {
                debug!(%fd, "closing connection");
                self.adapter.close(fd).map_err(ClientError::from)
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::adapter::mock::MockAdapter;

    fn accepted_client(adapter: &MockAdapter) -> (SocketClient<'_, MockAdapter>, SocketFd) {
        let fd = adapter.queue_connection();
        (SocketClient::from_raw(adapter, fd), fd)
    }

    #[test]
    fn test_new_client_is_not_connected() {
        let adapter = MockAdapter::new();
        let client = SocketClient::new(&adapter);
        assert!(!client.connected());
        assert_eq!(client.available(), 0);
        assert_eq!(client.fd(), None);
    }

    #[test]
    fn test_from_raw_client_reports_connected() {
        let adapter = MockAdapter::new();
        let (client, fd) = accepted_client(&adapter);
        assert!(client.connected());
        assert_eq!(client.fd(), Some(fd));
    }

    #[test]
    fn test_read_returns_bytes_then_none() {
        // Arrange
        let adapter = MockAdapter::new();
        let (mut client, fd) = accepted_client(&adapter);
        adapter.push_incoming(fd, b"ab");

        // Act / Assert
        assert_eq!(client.read(), Some(b'a'));
        assert_eq!(client.read(), Some(b'b'));
        assert_eq!(client.read(), None);
    }

    #[test]
    fn test_peek_does_not_consume_and_counts_as_available() {
        // Arrange
        let adapter = MockAdapter::new();
        let (mut client, fd) = accepted_client(&adapter);
        adapter.push_incoming(fd, b"xy");

        // Act
        let peeked = client.peek();

        // Assert
        assert_eq!(peeked, Some(b'x'));
        assert_eq!(client.available(), 2, "peeked byte still counts as available");
        assert_eq!(client.peek(), Some(b'x'));
        assert_eq!(client.read(), Some(b'x'));
        assert_eq!(client.read(), Some(b'y'));
    }

    #[test]
    fn test_read_into_includes_peeked_byte() {
        // Arrange
        let adapter = MockAdapter::new();
        let (mut client, fd) = accepted_client(&adapter);
        adapter.push_incoming(fd, b"hello");
        client.peek();

        // Act
        let mut buf = [0u8; 8];
        let n = client.read_into(&mut buf);

        // Assert
        assert_eq!(n, 5);
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn test_read_into_with_nothing_buffered_returns_zero() {
        let adapter = MockAdapter::new();
        let (mut client, _fd) = accepted_client(&adapter);
        let mut buf = [0u8; 4];
        assert_eq!(client.read_into(&mut buf), 0);
    }

    #[test]
    fn test_write_passes_partial_count_through() {
        // Arrange
        let adapter = MockAdapter::new();
        let (mut client, fd) = accepted_client(&adapter);
        adapter.limit_send(fd, Some(3));

        // Act
        let written = client.write(b"abcdef");

        // Assert
        assert_eq!(written, 3);
        assert_eq!(adapter.take_outgoing(fd), b"abc".to_vec());
    }

    #[test]
    fn test_println_appends_crlf() {
        let adapter = MockAdapter::new();
        let (mut client, fd) = accepted_client(&adapter);
        assert_eq!(client.println("hi"), 4);
        assert_eq!(adapter.take_outgoing(fd), b"hi\r\n".to_vec());
    }

    #[test]
    fn test_write_after_peer_disconnect_returns_zero() {
        let adapter = MockAdapter::new();
        let (mut client, fd) = accepted_client(&adapter);
        adapter.disconnect_peer(fd);
        assert!(!client.connected());
        assert_eq!(client.write_byte(b'z'), 0);
    }

    #[test]
    fn test_hung_up_peer_stays_connected_until_last_byte_is_read() {
        // Arrange
        let adapter = MockAdapter::new();
        let (mut client, fd) = accepted_client(&adapter);
        adapter.push_incoming(fd, b"z");
        adapter.disconnect_peer(fd);

        // Act
        let peeked = client.peek();
        let connected_while_peeked = client.connected();
        let read = client.read();

        // Assert
        assert_eq!(peeked, Some(b'z'));
        assert!(connected_while_peeked);
        assert_eq!(read, Some(b'z'));
        assert!(!client.connected());
    }

    #[test]
    fn test_close_releases_descriptor_and_disconnects() {
        // Arrange
        let adapter = MockAdapter::new();
        let (mut client, fd) = accepted_client(&adapter);

        // Act
        client.close().expect("close");

        // Assert
        assert!(adapter.is_closed(fd));
        assert!(!client.connected());
        assert!(client.close().is_ok(), "closing twice is a no-op");
    }

    #[test]
    fn test_connect_opens_outbound_socket() {
        // Arrange
        let adapter = MockAdapter::new();
        let mut client = SocketClient::new(&adapter);
        let addr = SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 20), 8080);

        // Act
        client.connect(addr).expect("connect");

        // Assert
        assert!(client.connected());
        let fd = client.fd().expect("descriptor");
        assert_eq!(adapter.remote_addr(fd), Some(addr));
    }

    #[test]
    fn test_connect_host_resolves_name() {
        let adapter = MockAdapter::new();
        adapter.add_host("sensor.lan", Ipv4Addr::new(10, 1, 2, 3));
        let mut client = SocketClient::new(&adapter);

        client.connect_host("sensor.lan", 23).expect("connect");

        let fd = client.fd().unwrap();
        assert_eq!(
            adapter.remote_addr(fd),
            Some(SocketAddrV4::new(Ipv4Addr::new(10, 1, 2, 3), 23))
        );
    }

    #[test]
    fn test_connect_when_already_connected_fails() {
        let adapter = MockAdapter::new();
        let (mut client, _fd) = accepted_client(&adapter);
        let result = client.connect(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 80));
        assert!(matches!(result, Err(ClientError::AlreadyConnected)));
    }

    #[test]
    fn test_refused_connect_closes_socket_and_stays_disconnected() {
        // Arrange
        let adapter = MockAdapter::new();
        adapter.refuse_outbound(true);
        let mut client = SocketClient::new(&adapter);

        // Act
        let result = client.connect(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 80));

        // Assert
        assert!(matches!(result, Err(ClientError::Adapter(_))));
        assert!(!client.connected());
        assert_eq!(adapter.open_sockets(), 0);
    }

    #[test]
    fn test_connect_host_with_unknown_name_fails() {
        let adapter = MockAdapter::new();
        let mut client = SocketClient::new(&adapter);
        let result = client.connect_host("unknown.invalid", 80);
        assert!(matches!(
            result,
            Err(ClientError::Adapter(AdapterError::UnresolvedHost(_)))
        ));
    }
}
