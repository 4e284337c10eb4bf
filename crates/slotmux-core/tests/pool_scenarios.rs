//! Integration tests for the connection-slot pool.
//!
//! # Purpose
//!
//! These tests drive [`ConnectionSlotPool`] through its *public* API the same
//! way an application control loop does, against the in-memory
//! [`MockAdapter`].  They verify:
//!
//! - The documented scenarios: an idle pool, a first connection, two ready
//!   slots around an empty one, and a failed bind.
//! - The pool-wide laws: never more live connections than slots, at most one
//!   accept per empty slot per pass, lowest-index tie-break, and broadcast sums.
//! - Null-handle safety when no client is ready.
//!
//! # The control loop being simulated
//!
//! ```text
//! loop {
//!     let ready = pool.find_readable_slot();
//!     let mut client = pool.handle_for(ready.slot);
//!     if bool::from(client) { ... read / reply ... }
//! }
//! ```

use slotmux_core::adapter::mock::{MockAdapter, MockStep};
use slotmux_core::{Client, ConnectionSlotPool, Readiness};

const PORT: u16 = 23;

fn listening_pool(adapter: &MockAdapter) -> ConnectionSlotPool<'_, MockAdapter> {
    let mut pool = ConnectionSlotPool::new(adapter, PORT);
    pool.initialize().expect("initialize must succeed on a healthy adapter");
    pool
}

// ── Scenarios ─────────────────────────────────────────────────────────────────

/// Capacity 3, nothing pending: the scan finds nothing and the resulting handle
/// is falsy.
#[test]
fn test_idle_pool_yields_null_handle() {
    let adapter = MockAdapter::new();
    let pool = listening_pool(&adapter);

    let ready = pool.find_readable_slot();
    let handle = pool.handle_for(ready.slot);

    assert_eq!(ready.slot, None);
    assert!(!ready.new_client);
    assert!(!bool::from(handle));
}

/// One pending connection with slot 0 empty: the first pass fills slot 0 and
/// reports a new client; an identical second pass reports no new client and
/// leaves slot 0 connected.
#[test]
fn test_first_connection_is_reported_as_new_exactly_once() {
    // Arrange
    let adapter = MockAdapter::new();
    let pool = listening_pool(&adapter);
    adapter.queue_connection();
    let slot0 = pool.slot_id(0).unwrap();

    // Act
    let first = pool.accept_pending_connections();
    let second = pool.accept_pending_connections();

    // Assert
    assert!(first, "first pass must report a new client");
    assert!(!second, "second pass has nothing new");
    assert!(pool.is_slot_connected(slot0));
}

/// Slots 0 and 2 connected with data, slot 1 empty: slot 0 wins.
#[test]
fn test_lowest_ready_slot_wins_over_higher_one() {
    // Arrange: an accept error keeps slot 1 empty during the first pass.
    let adapter = MockAdapter::new();
    let pool = listening_pool(&adapter);
    let a = adapter.queue_connection();
    adapter.queue_accept_error(-1);
    let c = adapter.queue_connection();
    pool.accept_pending_connections();
    adapter.push_incoming(c, b"third");
    adapter.push_incoming(a, b"first");

    // Act
    let ready = pool.find_readable_slot();

    // Assert
    assert_eq!(ready.slot.map(|s| s.index()), Some(0));
    assert!(!pool.is_slot_connected(pool.slot_id(1).unwrap()));
}

/// A bind failure leaves the pool non-listening; later accept passes make no
/// accept calls and report nothing new.
#[test]
fn test_failed_bind_leaves_pool_inert() {
    // Arrange
    let adapter = MockAdapter::new();
    adapter.fail_at(MockStep::Bind);
    let mut pool = ConnectionSlotPool::new(&adapter, PORT);
    adapter.queue_connection();

    // Act
    let init = pool.initialize();
    let created = pool.accept_pending_connections();
    let ready = pool.find_readable_slot();

    // Assert
    assert!(init.is_err());
    assert!(!pool.is_listening());
    assert!(!created);
    assert_eq!(ready, Readiness::default());
    assert_eq!(adapter.accept_calls(), 0);
    assert_eq!(adapter.pending_accepts(), 1);
}

// ── Laws ──────────────────────────────────────────────────────────────────────

/// However many connections arrive, no more than `capacity()` are ever live.
#[test]
fn test_live_connections_never_exceed_capacity() {
    let adapter = MockAdapter::new();
    let pool = listening_pool(&adapter);

    for round in 0..10 {
        adapter.queue_connection();
        adapter.queue_connection();
        pool.find_readable_slot();
        assert!(
            pool.connected_count() <= pool.capacity(),
            "round {round}: {} live connections",
            pool.connected_count()
        );
    }
    assert_eq!(pool.connected_count(), 3);
}

/// One accept per empty slot per pass, so draining a backlog larger than the
/// number of free slots takes several passes as slots free up.
#[test]
fn test_backlog_drains_as_slots_are_released() {
    // Arrange
    let adapter = MockAdapter::new();
    let pool = listening_pool(&adapter);
    let fds: Vec<_> = (0..5).map(|_| adapter.queue_connection()).collect();
    pool.accept_pending_connections();
    assert_eq!(adapter.pending_accepts(), 2);

    // Act: clients in slots 0 and 1 leave
    pool.handle_for(pool.slot_id(0)).stop();
    adapter.disconnect_peer(fds[1]);
    let created = pool.accept_pending_connections();

    // Assert
    assert!(created);
    assert_eq!(adapter.pending_accepts(), 0);
    assert_eq!(pool.connected_count(), 3);
}

/// Readiness always points at the lowest-index ready slot, whatever order the
/// data arrived in.
#[test]
fn test_tie_break_is_deterministic_for_every_ready_subset() {
    for mask in 1u8..8 {
        // Arrange
        let adapter = MockAdapter::new();
        let pool = listening_pool(&adapter);
        let fds: Vec<_> = (0..3).map(|_| adapter.queue_connection()).collect();
        pool.accept_pending_connections();
        for (i, fd) in fds.iter().enumerate().rev() {
            if mask & (1 << i) != 0 {
                adapter.push_incoming(*fd, b"!");
            }
        }

        // Act
        let ready = pool.find_readable_slot();

        // Assert
        let expected = mask.trailing_zeros() as usize;
        assert_eq!(
            ready.slot.map(|s| s.index()),
            Some(expected),
            "mask {mask:03b}"
        );
    }
}

/// Broadcast returns the sum of what each connected slot accepted.
#[test]
fn test_broadcast_sums_per_slot_results() {
    // Arrange
    let adapter = MockAdapter::new();
    let pool = listening_pool(&adapter);
    let a = adapter.queue_connection();
    let b = adapter.queue_connection();
    let c = adapter.queue_connection();
    pool.accept_pending_connections();
    adapter.limit_send(b, Some(2));
    adapter.disconnect_peer(c);

    // Act
    let written = pool.broadcast_write(b"hello");

    // Assert
    assert_eq!(written, 5 + 2);
    assert_eq!(adapter.take_outgoing(a), b"hello".to_vec());
    assert_eq!(adapter.take_outgoing(b), b"he".to_vec());
    assert!(adapter.take_outgoing(c).is_empty());
}

// ── Handles in a control loop ─────────────────────────────────────────────────

/// A full echo round-trip through handles, including a client that closes.
#[test]
fn test_echo_loop_over_handles() {
    // Arrange
    let adapter = MockAdapter::new();
    let pool = listening_pool(&adapter);
    let fd = adapter.queue_connection();
    adapter.push_incoming(fd, b"ping");

    // Act: one loop iteration
    let ready = pool.find_readable_slot();
    let mut client = pool.handle_for(ready.slot);
    let mut buf = [0u8; 16];
    let n = client.read_into(&mut buf);
    client.write(&buf[..n]);
    client.stop();

    // Assert
    assert!(ready.new_client);
    assert_eq!(adapter.take_outgoing(fd), b"ping".to_vec());
    assert!(adapter.is_closed(fd));
    assert!(!bool::from(client));
    assert_eq!(pool.connected_count(), 0);

    // The next iteration finds nothing and hands out a null handle.
    let mut next = pool.available();
    assert!(next.is_null());
    assert_eq!(next.read(), None);
    assert_eq!(next.write(b"x"), 0);
}
