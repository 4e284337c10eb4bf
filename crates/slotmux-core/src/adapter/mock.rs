//! In-memory adapter for tests and benchmarks.
//!
//! [`MockAdapter`] behaves like a tiny network stack: tests queue inbound
//! connections, push bytes "from the peer", inspect what the server wrote, and
//! make any initialisation step fail on demand.  No real sockets are involved.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::net::{Ipv4Addr, SocketAddrV4};

use super::{
    AcceptOutcome, AdapterError, AdapterTimeouts, AddressFamily, Protocol, SocketApi, SocketFd,
    SocketKind, SocketOption,
};

/// An initialisation step that [`MockAdapter::fail_at`] can make fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockStep {
    Timeouts,
    Socket,
    SetOption,
    Bind,
    Listen,
}

/// Status code reported for injected failures.
const INJECTED_FAILURE: i32 = -1;

#[derive(Debug)]
enum PendingAccept {
    Connection(SocketFd),
    Error(i32),
}

#[derive(Debug, Default)]
struct MockSocket {
    options: Vec<SocketOption>,
    bound: Option<SocketAddrV4>,
    backlog: Option<u8>,
    remote: Option<SocketAddrV4>,
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
    peer_open: bool,
    closed: bool,
    send_limit: Option<usize>,
}

#[derive(Debug)]
struct MockState {
    fail_step: Option<MockStep>,
    refuse_outbound: bool,
    next_fd: i32,
    timeouts: Option<AdapterTimeouts>,
    sockets: HashMap<SocketFd, MockSocket>,
    pending: VecDeque<PendingAccept>,
    accept_calls: usize,
    hosts: HashMap<String, Ipv4Addr>,
}

impl MockState {
    fn allocate(&mut self, socket: MockSocket) -> SocketFd {
        let fd = SocketFd(self.next_fd);
        self.next_fd += 1;
        self.sockets.insert(fd, socket);
        fd
    }

    fn fails(&self, step: MockStep) -> bool {
        self.fail_step == Some(step)
    }

    fn live_socket(&mut self, fd: SocketFd) -> Result<&mut MockSocket, AdapterError> {
        match self.sockets.get_mut(&fd) {
            Some(socket) if !socket.closed => Ok(socket),
            _ => Err(AdapterError::InvalidDescriptor(fd)),
        }
    }
}

/// A scriptable, single-threaded [`SocketApi`] implementation.
#[derive(Debug)]
pub struct MockAdapter {
    state: RefCell<MockState>,
}

impl MockAdapter {
    /// Creates an adapter with no sockets and `localhost` resolvable.
    pub fn new() -> Self {
        let mut hosts = HashMap::new();
        hosts.insert("localhost".to_string(), Ipv4Addr::LOCALHOST);
        Self {
            state: RefCell::new(MockState {
                fail_step: None,
                refuse_outbound: false,
                next_fd: 0,
                timeouts: None,
                sockets: HashMap::new(),
                pending: VecDeque::new(),
                accept_calls: 0,
                hosts,
            }),
        }
    }

    /// Makes the given initialisation step return an error.
    pub fn fail_at(&self, step: MockStep) {
        self.state.borrow_mut().fail_step = Some(step);
    }

    /// Clears a failure injected with [`fail_at`](Self::fail_at).
    pub fn recover(&self) {
        self.state.borrow_mut().fail_step = None;
    }

    /// Makes outbound `connect` calls fail.
    pub fn refuse_outbound(&self, refuse: bool) {
        self.state.borrow_mut().refuse_outbound = refuse;
    }

    /// Queues an inbound connection and returns the descriptor `accept` will
    /// hand out for it.
    pub fn queue_connection(&self) -> SocketFd {
        let mut state = self.state.borrow_mut();
        let fd = state.allocate(MockSocket {
            peer_open: true,
            ..MockSocket::default()
        });
        state.pending.push_back(PendingAccept::Connection(fd));
        fd
    }

    /// Queues an `accept` failure with the given status code.
    pub fn queue_accept_error(&self, status: i32) {
        self.state
            .borrow_mut()
            .pending
            .push_back(PendingAccept::Error(status));
    }

    /// Number of queued connections and errors not yet consumed by `accept`.
    pub fn pending_accepts(&self) -> usize {
        self.state.borrow().pending.len()
    }

    /// Delivers bytes as if the peer of `fd` had sent them.
    ///
    /// Panics if `fd` is unknown.
    pub fn push_incoming(&self, fd: SocketFd, bytes: &[u8]) {
        let mut state = self.state.borrow_mut();
        let socket = state
            .sockets
            .get_mut(&fd)
            .unwrap_or_else(|| panic!("MockAdapter::push_incoming: unknown {fd}"));
        socket.inbound.extend(bytes.iter().copied());
    }

    /// Drains and returns everything written to `fd` so far.
    pub fn take_outgoing(&self, fd: SocketFd) -> Vec<u8> {
        self.state
            .borrow_mut()
            .sockets
            .get_mut(&fd)
            .map(|socket| std::mem::take(&mut socket.outbound))
            .unwrap_or_default()
    }

    /// Simulates the remote end hanging up.  Bytes it already sent stay
    /// readable, and the socket reports open until they are drained.
    pub fn disconnect_peer(&self, fd: SocketFd) {
        if let Some(socket) = self.state.borrow_mut().sockets.get_mut(&fd) {
            socket.peer_open = false;
        }
    }

    /// Caps how many bytes a single `send` on `fd` accepts.
    pub fn limit_send(&self, fd: SocketFd, limit: Option<usize>) {
        if let Some(socket) = self.state.borrow_mut().sockets.get_mut(&fd) {
            socket.send_limit = limit;
        }
    }

    /// Registers a hostname for `resolve_host`.
    pub fn add_host(&self, name: &str, addr: Ipv4Addr) {
        self.state
            .borrow_mut()
            .hosts
            .insert(name.to_string(), addr);
    }

    /// Total number of `accept` calls made so far.
    pub fn accept_calls(&self) -> usize {
        self.state.borrow().accept_calls
    }

    /// The timeouts most recently passed to `set_timeouts`.
    pub fn configured_timeouts(&self) -> Option<AdapterTimeouts> {
        self.state.borrow().timeouts
    }

    /// The open listening socket, if any.
    pub fn listener(&self) -> Option<SocketFd> {
        self.state
            .borrow()
            .sockets
            .iter()
            .find(|(_, socket)| socket.backlog.is_some() && !socket.closed)
            .map(|(fd, _)| *fd)
    }

    /// The local address `fd` was bound to.
    pub fn bound_addr(&self, fd: SocketFd) -> Option<SocketAddrV4> {
        self.state.borrow().sockets.get(&fd).and_then(|s| s.bound)
    }

    /// The backlog passed to `listen` for `fd`.
    pub fn backlog(&self, fd: SocketFd) -> Option<u8> {
        self.state.borrow().sockets.get(&fd).and_then(|s| s.backlog)
    }

    /// The options set on `fd`, in call order.
    pub fn options(&self, fd: SocketFd) -> Vec<SocketOption> {
        self.state
            .borrow()
            .sockets
            .get(&fd)
            .map(|s| s.options.clone())
            .unwrap_or_default()
    }

    /// The address an outbound socket connected to.
    pub fn remote_addr(&self, fd: SocketFd) -> Option<SocketAddrV4> {
        self.state.borrow().sockets.get(&fd).and_then(|s| s.remote)
    }

    /// Returns `true` once the local side has closed `fd`.
    pub fn is_closed(&self, fd: SocketFd) -> bool {
        self.state
            .borrow()
            .sockets
            .get(&fd)
            .is_some_and(|s| s.closed)
    }

    /// Number of sockets that have been created and not closed.
    pub fn open_sockets(&self) -> usize {
        self.state
            .borrow()
            .sockets
            .values()
            .filter(|s| !s.closed)
            .count()
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketApi for MockAdapter {
    fn set_timeouts(&self, timeouts: &AdapterTimeouts) -> Result<(), AdapterError> {
        let mut state = self.state.borrow_mut();
        if state.fails(MockStep::Timeouts) {
            return Err(AdapterError::Status(INJECTED_FAILURE));
        }
        state.timeouts = Some(*timeouts);
        Ok(())
    }

    fn socket(
        &self,
        family: AddressFamily,
        kind: SocketKind,
        protocol: Protocol,
    ) -> Result<SocketFd, AdapterError> {
        let mut state = self.state.borrow_mut();
        if state.fails(MockStep::Socket) {
            return Err(AdapterError::Status(INJECTED_FAILURE));
        }
        let (AddressFamily::Inet, SocketKind::Stream, Protocol::Tcp) = (family, kind, protocol);
        Ok(state.allocate(MockSocket::default()))
    }

    fn set_option(&self, fd: SocketFd, option: SocketOption) -> Result<(), AdapterError> {
        let mut state = self.state.borrow_mut();
        if state.fails(MockStep::SetOption) {
            return Err(AdapterError::Status(INJECTED_FAILURE));
        }
        state.live_socket(fd)?.options.push(option);
        Ok(())
    }

    fn bind(&self, fd: SocketFd, addr: SocketAddrV4) -> Result<(), AdapterError> {
        let mut state = self.state.borrow_mut();
        if state.fails(MockStep::Bind) {
            return Err(AdapterError::Status(INJECTED_FAILURE));
        }
        state.live_socket(fd)?.bound = Some(addr);
        Ok(())
    }

    fn listen(&self, fd: SocketFd, backlog: u8) -> Result<(), AdapterError> {
        let mut state = self.state.borrow_mut();
        if state.fails(MockStep::Listen) {
            return Err(AdapterError::Status(INJECTED_FAILURE));
        }
        let socket = state.live_socket(fd)?;
        if socket.bound.is_none() {
            return Err(AdapterError::Status(INJECTED_FAILURE));
        }
        socket.backlog = Some(backlog);
        Ok(())
    }

    fn accept(&self, listener: SocketFd) -> AcceptOutcome {
        let mut state = self.state.borrow_mut();
        state.accept_calls += 1;
        match state.sockets.get(&listener) {
            Some(socket) if socket.backlog.is_some() && !socket.closed => {}
            _ => return AcceptOutcome::Failed(AdapterError::InvalidDescriptor(listener)),
        }
        match state.pending.pop_front() {
            Some(PendingAccept::Connection(fd)) => AcceptOutcome::Accepted(fd),
            Some(PendingAccept::Error(status)) => {
                AcceptOutcome::Failed(AdapterError::Status(status))
            }
            None => AcceptOutcome::WouldBlock,
        }
    }

    fn connect(&self, fd: SocketFd, addr: SocketAddrV4) -> Result<(), AdapterError> {
        let mut state = self.state.borrow_mut();
        if state.refuse_outbound {
            return Err(AdapterError::Status(INJECTED_FAILURE));
        }
        let socket = state.live_socket(fd)?;
        socket.remote = Some(addr);
        socket.peer_open = true;
        Ok(())
    }

    fn resolve_host(&self, host: &str) -> Result<Ipv4Addr, AdapterError> {
        self.state
            .borrow()
            .hosts
            .get(host)
            .copied()
            .ok_or_else(|| AdapterError::UnresolvedHost(host.to_string()))
    }

    fn is_open(&self, fd: SocketFd) -> bool {
        self.state
            .borrow()
            .sockets
            .get(&fd)
            .is_some_and(|s| !s.closed && (s.peer_open || !s.inbound.is_empty()))
    }

    fn pending(&self, fd: SocketFd) -> Result<usize, AdapterError> {
        let mut state = self.state.borrow_mut();
        let socket = state.live_socket(fd).map_err(|_| AdapterError::Closed(fd))?;
        Ok(socket.inbound.len())
    }

    fn recv(&self, fd: SocketFd, buf: &mut [u8]) -> Result<usize, AdapterError> {
        let mut state = self.state.borrow_mut();
        let socket = state.live_socket(fd).map_err(|_| AdapterError::Closed(fd))?;
        if socket.inbound.is_empty() {
            return if socket.peer_open {
                Err(AdapterError::WouldBlock)
            } else {
                Ok(0)
            };
        }
        let count = buf.len().min(socket.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(socket.inbound.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }

    fn send(&self, fd: SocketFd, buf: &[u8]) -> Result<usize, AdapterError> {
        let mut state = self.state.borrow_mut();
        let socket = state.live_socket(fd).map_err(|_| AdapterError::Closed(fd))?;
        if !socket.peer_open {
            return Err(AdapterError::Closed(fd));
        }
        let count = socket.send_limit.map_or(buf.len(), |limit| limit.min(buf.len()));
        socket.outbound.extend_from_slice(&buf[..count]);
        Ok(count)
    }

    fn close(&self, fd: SocketFd) -> Result<(), AdapterError> {
        let mut state = self.state.borrow_mut();
        state.live_socket(fd)?.closed = true;
        Ok(())
    }
}
