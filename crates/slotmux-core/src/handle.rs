//! ConnectionHandle: a copyable, possibly-null reference to a pooled connection.
//!
//! # Value semantics over a slot (for beginners)
//!
//! The server keeps its connections in a fixed array of slots and reuses them.
//! Calling code, however, wants to pass "a client" around like a plain value,
//! and wants "no client available" to be just another value it can check.
//!
//! A [`ConnectionHandle`] solves both:
//!
//! - It is `Copy`.  Copying a handle copies a reference, never the connection.
//! - Dropping a handle never closes or frees anything.  The pool owns the slot.
//! - A *null* handle refers to nothing.  Every operation on it returns a neutral
//!   value (`false`, `0`, `None`) instead of panicking, so a handle obtained from
//!   an empty readiness scan can be used immediately.
//!
//! ```text
//!   handle A ─┐
//!             ├──►  slot[1]: RefCell<SocketClient>   (owned by the pool)
//!   handle B ─┘
//!
//!   null handle ──► (nothing)
//! ```
//!
//! Closing a connection through a handle is delegated to the connection.  The
//! slot then reports "not connected" and becomes eligible for the next accept
//! pass; the handle itself stays valid and keeps delegating.

use std::cell::RefCell;
use std::fmt;
use std::net::SocketAddrV4;

use crate::client::{Client, ClientError};

/// A non-owning reference to one connection slot.
pub struct ConnectionHandle<'p, C> {
    client: Option<&'p RefCell<C>>,
}

impl<'p, C> ConnectionHandle<'p, C> {
    /// Creates a handle that refers to no connection.
    pub const fn null() -> Self {
        Self { client: None }
    }

    /// Creates a handle bound to `client`.
    pub fn bound(client: &'p RefCell<C>) -> Self {
        Self {
            client: Some(client),
        }
    }

    /// Returns `true` if this handle refers to no connection.
    pub fn is_null(&self) -> bool {
        self.client.is_none()
    }

    /// Returns `true` if both handles refer to the same slot.
    ///
    /// Two null handles are considered equal.
    pub fn same_slot(&self, other: &Self) -> bool {
        match (self.client, other.client) {
            (Some(a), Some(b)) => std::ptr::eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<C> Clone for ConnectionHandle<'_, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for ConnectionHandle<'_, C> {}

impl<C> Default for ConnectionHandle<'_, C> {
    fn default() -> Self {
        Self::null()
    }
}

impl<C> fmt::Debug for ConnectionHandle<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.client {
            Some(cell) => f
                .debug_tuple("ConnectionHandle")
                .field(&(cell as *const RefCell<C>))
                .finish(),
            None => f.write_str("ConnectionHandle(null)"),
        }
    }
}

/// `true` when the handle is bound and its connection is established.
impl<C: Client> From<ConnectionHandle<'_, C>> for bool {
    fn from(handle: ConnectionHandle<'_, C>) -> bool {
        handle.connected()
    }
}

impl<C: Client> Client for ConnectionHandle<'_, C> {
    fn connect(&mut self, addr: SocketAddrV4) -> Result<(), ClientError> {
        let cell = self.client.ok_or(ClientError::NotBound)?;
        cell.borrow_mut().connect(addr)
    }

    fn connect_host(&mut self, host: &str, port: u16) -> Result<(), ClientError> {
        let cell = self.client.ok_or(ClientError::NotBound)?;
        cell.borrow_mut().connect_host(host, port)
    }

    fn connected(&self) -> bool {
        self.client.is_some_and(|cell| cell.borrow().connected())
    }

    fn available(&self) -> usize {
        self.client.map_or(0, |cell| cell.borrow().available())
    }

    fn read(&mut self) -> Option<u8> {
        self.client.and_then(|cell| cell.borrow_mut().read())
    }

    fn read_into(&mut self, buf: &mut [u8]) -> usize {
        self.client
            .map_or(0, |cell| cell.borrow_mut().read_into(buf))
    }

    fn peek(&mut self) -> Option<u8> {
        self.client.and_then(|cell| cell.borrow_mut().peek())
    }

    fn write_byte(&mut self, byte: u8) -> usize {
        self.client
            .map_or(0, |cell| cell.borrow_mut().write_byte(byte))
    }

    fn write(&mut self, buf: &[u8]) -> usize {
        self.client.map_or(0, |cell| cell.borrow_mut().write(buf))
    }

    fn flush(&mut self) {
        if let Some(cell) = self.client {
            cell.borrow_mut().flush();
        }
    }

    fn close(&mut self) -> Result<(), ClientError> {
        match self.client {
            Some(cell) => cell.borrow_mut().close(),
            None => Ok(()),
        }
    }

    fn stop(&mut self) {
        if let Some(cell) = self.client {
            cell.borrow_mut().stop();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
