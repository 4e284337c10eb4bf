//! Infrastructure layer for the slotmux server.
//!
//! Contains OS-facing adapters: the host TCP stack behind `SocketApi` and
//! file-system storage for the configuration.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `slotmux_core`, but MUST NOT be imported by the `application` layer.

pub mod network;
pub mod storage;
