//! Network infrastructure for the slotmux server.
//!
//! # Sub-modules
//!
//! - **`host_adapter`** – Implements `SocketApi` on top of the host's
//!   `std::net` sockets, so the pool can serve real TCP clients on a desktop
//!   or server machine.

pub mod host_adapter;
