//! Loopback integration tests for the host adapter.
//!
//! # Purpose
//!
//! These tests run the connection-slot pool on the real host TCP stack.  They
//! bind an ephemeral port on all interfaces, connect ordinary
//! `std::net::TcpStream` clients to `127.0.0.1`, and verify that:
//!
//! - Pending connections are accepted into slots by the readiness scan.
//! - Data sent by a client makes its slot readable and can be read back.
//! - Bytes a client sent just before hanging up are still delivered.
//! - Reading a connected client with nothing buffered returns at once.
//! - A client hang-up is detected and frees its slot for the next client.
//! - The chat relay delivers one client's message to every client.
//!
//! Network timing is not deterministic, so every wait is a bounded poll.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use slotmux_core::{Client, ConnectionSlotPool, Readiness, SlotId};
use slotmux_server::application::chat_relay::ChatRelay;
use slotmux_server::infrastructure::network::host_adapter::HostAdapter;

const POLL_ATTEMPTS: usize = 200;
const POLL_DELAY: Duration = Duration::from_millis(10);

fn listening_pool(adapter: &HostAdapter) -> (ConnectionSlotPool<'_, HostAdapter>, SocketAddr) {
    let mut pool = ConnectionSlotPool::new(adapter, 0);
    pool.initialize().expect("listen on an ephemeral port");
    let port = adapter
        .listener_addr()
        .expect("listener must be registered")
        .port();
    (pool, SocketAddr::from(([127, 0, 0, 1], port)))
}

fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).expect("connect to loopback listener");
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .expect("set read timeout");
    stream
}

/// Repeats the readiness scan until `done` accepts its result.
fn poll_until(
    pool: &ConnectionSlotPool<'_, HostAdapter>,
    mut done: impl FnMut(&Readiness) -> bool,
) -> Option<Readiness> {
    for _ in 0..POLL_ATTEMPTS {
        let ready = pool.find_readable_slot();
        if done(&ready) {
            return Some(ready);
        }
        thread::sleep(POLL_DELAY);
    }
    None
}

fn slot(pool: &ConnectionSlotPool<'_, HostAdapter>, index: usize) -> SlotId {
    pool.slot_id(index).expect("slot index in range")
}

#[test]
fn test_connection_is_accepted_into_first_slot() {
    // Arrange
    let adapter = HostAdapter::new();
    let (pool, addr) = listening_pool(&adapter);

    // Act
    let _client = connect(addr);
    let accepted = poll_until(&pool, |r| r.new_client);

    // Assert
    assert!(accepted.is_some(), "connection was never accepted");
    assert!(pool.is_slot_connected(slot(&pool, 0)));
    assert_eq!(pool.connected_count(), 1);
}

#[test]
fn test_sent_bytes_make_slot_readable() {
    // Arrange
    let adapter = HostAdapter::new();
    let (pool, addr) = listening_pool(&adapter);
    let mut client = connect(addr);
    poll_until(&pool, |r| r.new_client).expect("accepted");

    // Act
    client.write_all(b"hello").expect("client write");
    let ready = poll_until(&pool, |r| r.slot.is_some()).expect("slot became readable");
    let mut handle = pool.handle_for(ready.slot);
    let mut buf = [0u8; 16];
    let n = handle.read_into(&mut buf);

    // Assert
    assert_eq!(ready.slot.map(|s| s.index()), Some(0));
    assert_eq!(&buf[..n], b"hello");
}

#[test]
fn test_reply_reaches_the_client() {
    // Arrange
    let adapter = HostAdapter::new();
    let (pool, addr) = listening_pool(&adapter);
    let mut client = connect(addr);
    poll_until(&pool, |r| r.new_client).expect("accepted");

    // Act
    let written = pool.handle_for(pool.slot_id(0)).println("ok");
    let mut buf = [0u8; 4];
    client.read_exact(&mut buf).expect("client read");

    // Assert
    assert_eq!(written, 4);
    assert_eq!(&buf, b"ok\r\n");
}

#[test]
fn test_final_bytes_before_hang_up_are_delivered() {
    // Arrange
    let adapter = HostAdapter::new();
    let (pool, addr) = listening_pool(&adapter);
    let mut client = connect(addr);
    poll_until(&pool, |r| r.new_client).expect("accepted");

    // Act: the client says goodbye and leaves straight away
    client.write_all(b"bye").expect("client write");
    drop(client);
    let ready = poll_until(&pool, |r| r.slot.is_some()).expect("final bytes readable");
    let mut handle = pool.handle_for(ready.slot);
    let mut buf = [0u8; 8];
    let n = handle.read_into(&mut buf);

    // Assert
    assert_eq!(ready.slot.map(|s| s.index()), Some(0));
    assert_eq!(&buf[..n], b"bye");
    let mut gone = false;
    for _ in 0..POLL_ATTEMPTS {
        if !pool.is_slot_connected(slot(&pool, 0)) {
            gone = true;
            break;
        }
        thread::sleep(POLL_DELAY);
    }
    assert!(gone, "drained hang-up was never detected");
}

#[test]
fn test_read_without_data_returns_immediately() {
    // Arrange
    let adapter = HostAdapter::new();
    let (pool, addr) = listening_pool(&adapter);
    let _client = connect(addr);
    poll_until(&pool, |r| r.new_client).expect("accepted");
    let mut handle = pool.handle_for(pool.slot_id(0));

    // Act
    let started = Instant::now();
    let byte = handle.read();
    let mut buf = [0u8; 8];
    let bulk = handle.read_into(&mut buf);

    // Assert
    assert_eq!(byte, None);
    assert_eq!(bulk, 0);
    assert!(started.elapsed() < Duration::from_secs(1), "read blocked");
    assert!(bool::from(handle));
}

#[test]
fn test_hang_up_frees_the_slot_for_the_next_client() {
    // Arrange
    let adapter = HostAdapter::new();
    let (pool, addr) = listening_pool(&adapter);
    let first = connect(addr);
    poll_until(&pool, |r| r.new_client).expect("first accepted");

    // Act: the first client leaves
    drop(first);
    let mut freed = false;
    for _ in 0..POLL_ATTEMPTS {
        if !pool.is_slot_connected(slot(&pool, 0)) {
            freed = true;
            break;
        }
        thread::sleep(POLL_DELAY);
    }
    let _second = connect(addr);
    let reused = poll_until(&pool, |r| r.new_client);

    // Assert
    assert!(freed, "hang-up was never detected");
    assert!(reused.is_some(), "second connection was never accepted");
    assert!(pool.is_slot_connected(slot(&pool, 0)));
    assert_eq!(pool.connected_count(), 1);
}

#[test]
fn test_relay_delivers_message_to_all_clients() {
    // Arrange
    let adapter = HostAdapter::new();
    let (pool, addr) = listening_pool(&adapter);
    let mut relay = ChatRelay::new(&pool, "");
    let mut alice = connect(addr);
    let mut bob = connect(addr);
    for _ in 0..POLL_ATTEMPTS {
        relay.tick();
        if pool.connected_count() == 2 {
            break;
        }
        thread::sleep(POLL_DELAY);
    }
    assert_eq!(pool.connected_count(), 2, "both clients must be accepted");

    // Act
    alice.write_all(b"hi bob").expect("alice write");
    for _ in 0..POLL_ATTEMPTS {
        if relay.tick().received > 0 {
            break;
        }
        thread::sleep(POLL_DELAY);
    }
    let mut to_alice = [0u8; 6];
    let mut to_bob = [0u8; 6];
    alice.read_exact(&mut to_alice).expect("alice read");
    bob.read_exact(&mut to_bob).expect("bob read");

    // Assert
    assert_eq!(&to_alice, b"hi bob");
    assert_eq!(&to_bob, b"hi bob");
    assert_eq!(relay.stats().bytes_received, 6);
}
