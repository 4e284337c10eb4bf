//! # slotmux-core
//!
//! A fixed-capacity TCP server multiplexer for small network adapters that
//! expose a BSD-socket-like API with non-blocking `accept`.
//!
//! This crate has no OS socket dependencies.  It talks to the network only
//! through the [`SocketApi`] trait, so it can run against a chip driver, the
//! host network stack, or the in-memory [`adapter::mock::MockAdapter`].
//!
//! # Architecture overview (for beginners)
//!
//! - **`adapter`** – The boundary: socket primitives the multiplexer consumes.
//!
//! - **`client`** – One connection.  [`Client`] is the capability interface;
//!   [`SocketClient`] implements it on top of an adapter descriptor.
//!
//! - **`server`** – [`ConnectionSlotPool`]: one listening socket plus a fixed
//!   array of reusable connection slots.  Its readiness scan accepts new
//!   connections and finds the first client with unread data.
//!
//! - **`handle`** – [`ConnectionHandle`]: a copyable, possibly-null reference to
//!   a slot.  Safe to use even when it refers to nothing.
//!
//! ```text
//! loop {
//!     let ready = pool.find_readable_slot();   // accept + scan
//!     let mut client = pool.handle_for(ready.slot);
//!     if ready.new_client { /* greet */ }
//!     while let Some(byte) = client.read() { /* handle */ }
//! }
//! ```
//!
//! Everything is single-threaded and poll-driven.  Slots live in `RefCell`s,
//! which makes the pool `!Sync`; a multi-threaded port would need one lock
//! around accept and scan together.

pub mod adapter;
pub mod client;
pub mod handle;
pub mod server;

pub use adapter::{AcceptOutcome, AdapterError, AdapterTimeouts, SocketApi, SocketFd};
pub use client::{Client, ClientError, SocketClient};
pub use handle::ConnectionHandle;
pub use server::{
    ConnectionSlotPool, InitError, PoolHandle, Readiness, Server, SlotId, DEFAULT_MAX_CLIENTS,
};
