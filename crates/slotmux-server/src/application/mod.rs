//! Application layer use cases for the slotmux server.
//!
//! Use cases here drive a [`slotmux_core::ConnectionSlotPool`] through its
//! public API only.  They never touch OS sockets directly, so they run the same
//! against [`crate::infrastructure::network::host_adapter::HostAdapter`] and the
//! in-memory mock adapter.
//!
//! # Sub-modules
//!
//! - **`chat_relay`** – The control loop: greets new clients and relays every
//!   byte received from one client to all connected clients.

pub mod chat_relay;
