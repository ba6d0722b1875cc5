//! Per-socket state: the state machine, buffers, callbacks and cookie.
//!
//! `cnetpp`'s `ConnectionBase` / `TcpConnection` / `ListenConnection` class
//! hierarchy becomes one tagged variant here (DESIGN NOTES §9): event
//! dispatch in [`crate::shard`] matches on the tag instead of calling a
//! virtual method.

use std::any::Any;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use mio::net::{TcpListener, TcpStream};
use socket2::SockRef;
use tracing::{debug, warn};

use crate::event::EventMask;
use crate::metrics::Metrics;
use crate::ring_buffer::RingBuffer;

/// Monotonically increasing connection identifier. Routes commands to
/// shards via `id.0 % shard_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

impl ConnectionId {
    /// Reserved value returned by `connect`/`launch` on failure.
    pub const INVALID: ConnectionId = ConnectionId(0);

    /// Allocate the next connection id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// True iff this is the reserved invalid id.
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

/// Lifecycle state of a stream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// `connect()` is in flight; waiting for the writable event that
    /// reveals success or failure via `SO_ERROR`.
    Connecting,
    /// Fully established; normal read/write traffic flows.
    Connected,
    /// A soft close was requested: drain the send queue, then close.
    Closing,
    /// Terminal. The `closed` callback has fired (at most once) and the
    /// socket is gone.
    Closed,
}

/// The four user-supplied lifecycle callbacks. Invoked inline on the
/// owning shard's worker thread; a callback must not block (contract, not
/// enforced — see spec §5).
///
/// Stored as `Option` so a handler can be swapped out at connection-adopt
/// time without heap-reallocating the `Connection` itself.
#[derive(Clone)]
pub struct Callbacks {
    /// Fires once, the moment the connection reaches `Connected`.
    pub connected: Option<Arc<dyn Fn(&mut StreamConnection) -> bool + Send + Sync>>,
    /// Fires after bytes have been appended to `recv_buffer`. Returning
    /// `false` schedules a hard close.
    pub received: Option<Arc<dyn Fn(&mut StreamConnection) -> bool + Send + Sync>>,
    /// Fires once per fully-transmitted send buffer; `success` is always
    /// `true` in the current implementation (fatal send errors close the
    /// connection instead of reporting a failed send).
    pub sent: Option<Arc<dyn Fn(&mut StreamConnection, bool) -> bool + Send + Sync>>,
    /// Fires exactly once, as the connection transitions to `Closed`.
    pub closed: Option<Arc<dyn Fn(&mut StreamConnection) -> bool + Send + Sync>>,
}

impl Default for Callbacks {
    fn default() -> Self {
        Self {
            connected: None,
            received: None,
            sent: None,
            closed: None,
        }
    }
}

/// Outcome of handling a readable event, reported back to the shard so it
/// can decide whether to post a hard-remove command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadableOutcome {
    /// Nothing more to do; interest stays as-is.
    Continue,
    /// Connection should be hard-closed (peer reset, fatal I/O, or the
    /// `received` callback returned `false`).
    Close,
}

/// Outcome of handling a writable event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritableOutcome {
    /// Queue not yet empty; keep write interest armed.
    KeepWritable,
    /// Queue drained; drop write interest, keep read interest.
    DropWritable,
    /// Connection should be hard-closed.
    Close,
}

enum ConnectingOutcome {
    NowConnected,
    StillConnecting,
    Failed,
}

/// The send-queue type shared between a [`StreamConnection`] and any
/// [`crate::tcp::ConnectionHandle`] issued for it.
pub type SendQueue = spin::Mutex<std::collections::VecDeque<RingBuffer>>;

/// A connected TCP stream: the state machine, buffers, callbacks and
/// cookie described in spec §3.
pub struct StreamConnection {
    id: ConnectionId,
    socket: TcpStream,
    remote_endpoint: SocketAddr,
    state: State,
    /// Shared with any [`crate::tcp::ConnectionHandle`] issued for this
    /// connection, so a `send` from another thread can append without
    /// round-tripping through the shard's mailbox (spec §4.4.4/§5: only the
    /// wake-up notification needs to cross threads, not the bytes).
    send_queue: Arc<SendQueue>,
    recv_buffer: RingBuffer,
    /// Last interest mask submitted to the poller; touched only by the
    /// owning shard thread, so redundant `reregister` calls can be elided
    /// (invariant 7).
    pub cached_interest: EventMask,
    errno_snapshot: Option<std::io::Error>,
    callbacks: Callbacks,
    cookie: Option<Arc<dyn Any + Send + Sync>>,
    /// Set by [`StreamConnection::request_close`] (callable from inside a
    /// callback, same-thread); the shard's dispatch loop checks this after
    /// every callback invocation and, if set, performs the table removal.
    pending_removal: Option<bool>,
}

impl StreamConnection {
    /// Wrap an already-connected or connecting non-blocking socket.
    pub fn new(
        id: ConnectionId,
        socket: TcpStream,
        remote_endpoint: SocketAddr,
        state: State,
        recv_buffer_size: usize,
        callbacks: Callbacks,
    ) -> Self {
        Self {
            id,
            socket,
            remote_endpoint,
            state,
            send_queue: Arc::new(spin::Mutex::new(std::collections::VecDeque::new())),
            recv_buffer: RingBuffer::new(recv_buffer_size),
            cached_interest: EventMask::empty(),
            errno_snapshot: None,
            callbacks,
            cookie: None,
            pending_removal: None,
        }
    }

    /// Connection identifier.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Raw fd, used as the poller registration token.
    pub fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Peer address.
    pub fn remote_endpoint(&self) -> SocketAddr {
        self.remote_endpoint
    }

    /// Last observed OS error, if any.
    pub fn errno_snapshot(&self) -> Option<&std::io::Error> {
        self.errno_snapshot.as_ref()
    }

    /// Read-only view of the receive buffer. Only ever touched by the
    /// owning shard thread.
    pub fn recv_buffer(&self) -> &RingBuffer {
        &self.recv_buffer
    }

    /// Mutable view of the receive buffer, for callbacks that want to
    /// drain framed data out of it (e.g. the HTTP framer).
    pub fn recv_buffer_mut(&mut self) -> &mut RingBuffer {
        &mut self.recv_buffer
    }

    /// Attach an opaque cookie for higher layers. Not used by this crate's
    /// own HTTP layer to decide lifetime — see module docs.
    pub fn set_cookie(&mut self, cookie: Arc<dyn Any + Send + Sync>) {
        self.cookie = Some(cookie);
    }

    /// Retrieve the cookie, if any.
    pub fn cookie(&self) -> Option<&Arc<dyn Any + Send + Sync>> {
        self.cookie.as_ref()
    }

    /// Enqueue `data` for transmission. The caller (the public `send` path
    /// on a connection handle) is responsible for then posting a
    /// `Readable | Writable` command to the owning shard.
    pub fn enqueue_send(&mut self, data: &[u8]) {
        let mut buf = RingBuffer::new(data.len());
        let wrote = buf.write(data);
        debug_assert!(wrote);
        self.send_queue.lock().push_back(buf);
    }

    /// Whether the send queue is empty, used by the shard to decide
    /// whether a soft-close can transition straight to `Closed`.
    pub fn send_queue_is_empty(&self) -> bool {
        self.send_queue.lock().is_empty()
    }

    /// A cloneable handle onto the send queue, handed to a
    /// [`crate::tcp::ConnectionHandle`] so `send` works from any thread.
    pub fn send_queue_handle(&self) -> Arc<SendQueue> {
        self.send_queue.clone()
    }

    /// Called from inside a callback (`connected`/`received`/`sent`) to
    /// request that this connection be closed once the callback returns.
    /// `immediate = true` discards the send queue (hard close); `false`
    /// drains it first (soft close).
    pub fn request_close(&mut self, immediate: bool) {
        if immediate {
            self.pending_removal = Some(true);
        } else if self.pending_removal != Some(true) {
            self.pending_removal = Some(false);
            self.begin_soft_close();
        }
    }

    /// Consumed by the shard's dispatch loop after invoking a callback.
    pub fn take_pending_removal(&mut self) -> Option<bool> {
        self.pending_removal.take()
    }

    fn check_so_error(&mut self) -> ConnectingOutcome {
        let sock_ref = SockRef::from(&self.socket);
        match sock_ref.take_error() {
            Ok(None) => ConnectingOutcome::NowConnected,
            Ok(Some(e)) => {
                if e.raw_os_error() == Some(libc::EINPROGRESS) {
                    ConnectingOutcome::StillConnecting
                } else {
                    self.errno_snapshot = Some(e);
                    ConnectingOutcome::Failed
                }
            }
            Err(e) => {
                self.errno_snapshot = Some(e);
                ConnectingOutcome::Failed
            }
        }
    }

    fn complete_connecting(&mut self) -> bool {
        match self.check_so_error() {
            ConnectingOutcome::NowConnected => {
                self.state = State::Connected;
                if let Some(cb) = self.callbacks.connected.clone() {
                    cb(self);
                }
                true
            }
            ConnectingOutcome::StillConnecting => false,
            ConnectingOutcome::Failed => {
                self.state = State::Closed;
                true
            }
        }
    }

    /// Drive the Connecting→Connected transition and, once connected, drain
    /// the kernel's receive buffer via scatter reads, invoking `received`
    /// at each chunk. Mirrors `TcpConnection::HandleReadableEvent`.
    pub fn handle_readable(&mut self, metrics: &Metrics) -> ReadableOutcome {
        if self.state == State::Connecting {
            let progressed = self.complete_connecting();
            if !progressed {
                return ReadableOutcome::Continue;
            }
            if self.state == State::Closed {
                return ReadableOutcome::Close;
            }
        }

        if self.state != State::Connected {
            return ReadableOutcome::Continue;
        }

        loop {
            if self.recv_buffer.capacity() - self.recv_buffer.len() < 512 {
                let new_capacity = (self.recv_buffer.capacity() * 2).max(4096);
                self.recv_buffer.resize(new_capacity);
            }
            let (a, b) = self.recv_buffer.write_slices();
            let mut bufs = [std::io::IoSliceMut::new(a), std::io::IoSliceMut::new(b)];
            match read_vectored_nonblocking(&self.socket, &mut bufs) {
                Ok(0) => return ReadableOutcome::Close,
                Ok(n) => {
                    self.recv_buffer.commit_write(n);
                    metrics.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
                    if let Some(cb) = self.callbacks.received.clone() {
                        if !cb(self) {
                            return ReadableOutcome::Close;
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    return ReadableOutcome::Continue;
                }
                Err(e) => {
                    self.errno_snapshot = Some(e);
                    return ReadableOutcome::Close;
                }
            }
        }
    }

    /// Drive outbound writes from the send queue. Mirrors
    /// `TcpConnection::HandleWriteableEvent`.
    pub fn handle_writable(&mut self, metrics: &Metrics) -> WritableOutcome {
        if self.state == State::Connecting {
            let progressed = self.complete_connecting();
            if !progressed {
                return WritableOutcome::KeepWritable;
            }
            if self.state == State::Closed {
                return WritableOutcome::Close;
            }
        }

        if self.state != State::Connected && self.state != State::Closing {
            return WritableOutcome::DropWritable;
        }

        loop {
            let front_len = match self.send_queue.lock().front().map(RingBuffer::len) {
                Some(len) => len,
                None => {
                    return if self.state == State::Closing {
                        WritableOutcome::Close
                    } else {
                        WritableOutcome::DropWritable
                    };
                }
            };
            let _ = front_len;

            let sent_result = {
                let mut guard = self.send_queue.lock();
                let front = guard.front_mut().expect("checked non-empty above");
                let (a, b) = front.read_slices();
                let bufs = [std::io::IoSlice::new(a), std::io::IoSlice::new(b)];
                write_vectored_nonblocking(&self.socket, &bufs)
            };

            match sent_result {
                Ok(0) => continue,
                Ok(n) => {
                    metrics.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
                    let mut guard = self.send_queue.lock();
                    let front = guard.front_mut().expect("checked non-empty above");
                    let total = front.len();
                    if n != total {
                        front.commit_read(n);
                        return WritableOutcome::KeepWritable;
                    }
                    guard.pop_front();
                    let queue_empty = guard.is_empty();
                    drop(guard);

                    if let Some(cb) = self.callbacks.sent.clone() {
                        cb(self, true);
                    }

                    if queue_empty {
                        return if self.state == State::Closing {
                            WritableOutcome::Close
                        } else {
                            WritableOutcome::DropWritable
                        };
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    return WritableOutcome::KeepWritable;
                }
                Err(e) => {
                    self.errno_snapshot = Some(e);
                    return WritableOutcome::Close;
                }
            }
        }
    }

    /// Fire the `closed` callback (at most once — the shard only calls
    /// this during table removal) and mark the state terminal.
    pub fn handle_closed(&mut self) {
        if self.state == State::Closed {
            return;
        }
        self.state = State::Closed;
        if let Some(cb) = self.callbacks.closed.clone() {
            cb(self);
        }
    }

    /// Fire the `connected` callback once. Used for accepted connections,
    /// which start life already `Connected` (no `Connecting` transition to
    /// drive it implicitly the way `handle_readable` does for outbound
    /// connects). Mirrors `ListenConnection::HandleReadableEvent` invoking
    /// the server's connected callback right after `accept`.
    pub fn fire_connected(&mut self) {
        if let Some(cb) = self.callbacks.connected.clone() {
            cb(self);
        }
    }

    /// Request a soft close: subsequent writable passes drain the queue,
    /// then the shard hard-removes.
    pub fn begin_soft_close(&mut self) {
        if self.state == State::Connected {
            self.state = State::Closing;
        }
    }
}

/// Builds the [`StreamConnection`] for a freshly accepted socket and wires
/// up its callbacks. Implemented by [`crate::tcp::TcpServer`] so the shard
/// dispatch loop (which owns no knowledge of `TcpServerOptions`) can turn a
/// raw accept into an adoptable connection.
pub trait AcceptHandler: Send + Sync {
    /// Construct the stream connection for a newly accepted socket,
    /// already assigned `new_id`.
    fn accept(
        &self,
        new_id: ConnectionId,
        socket: TcpStream,
        remote_endpoint: SocketAddr,
    ) -> StreamConnection;
}

/// A listening socket: server-side options, no per-connection state.
pub struct ListenerConnection {
    id: ConnectionId,
    socket: TcpListener,
    local_endpoint: SocketAddr,
    pub cached_interest: EventMask,
    handler: Arc<dyn AcceptHandler>,
}

impl ListenerConnection {
    /// Wrap a bound, listening, non-blocking socket.
    pub fn new(
        id: ConnectionId,
        socket: TcpListener,
        local_endpoint: SocketAddr,
        handler: Arc<dyn AcceptHandler>,
    ) -> Self {
        Self {
            id,
            socket,
            local_endpoint,
            cached_interest: EventMask::empty(),
            handler,
        }
    }

    /// The handler that turns a raw accept into a [`StreamConnection`].
    pub fn handler(&self) -> &Arc<dyn AcceptHandler> {
        &self.handler
    }

    /// Connection identifier (the listener itself has one, distinct from
    /// the ids assigned to accepted streams).
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Raw fd, used as the poller registration token.
    pub fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    /// Bound local address.
    pub fn local_endpoint(&self) -> SocketAddr {
        self.local_endpoint
    }

    /// Accept one pending connection, if any.
    pub fn accept(&self) -> std::io::Result<Option<(TcpStream, SocketAddr)>> {
        match self.socket.accept() {
            Ok((stream, addr)) => Ok(Some((stream, addr))),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Tagged union replacing the `ConnectionBase` hierarchy: event dispatch in
/// [`crate::shard`] matches on the variant instead of calling a virtual
/// method (DESIGN NOTES §9).
pub enum Connection {
    /// A listening socket.
    Listener(ListenerConnection),
    /// A connected (or connecting) stream.
    Stream(StreamConnection),
}

impl Connection {
    /// Connection identifier, regardless of variant.
    pub fn id(&self) -> ConnectionId {
        match self {
            Connection::Listener(l) => l.id(),
            Connection::Stream(s) => s.id(),
        }
    }

    /// Raw fd, regardless of variant.
    pub fn fd(&self) -> RawFd {
        match self {
            Connection::Listener(l) => l.fd(),
            Connection::Stream(s) => s.fd(),
        }
    }
}

fn read_vectored_nonblocking(
    socket: &TcpStream,
    bufs: &mut [std::io::IoSliceMut<'_>],
) -> std::io::Result<usize> {
    use std::io::Read;
    let fd = socket.as_raw_fd();
    let mut iov: [libc::iovec; 2] = unsafe { std::mem::zeroed() };
    for (slot, buf) in iov.iter_mut().zip(bufs.iter_mut()) {
        slot.iov_base = buf.as_mut_ptr() as *mut std::ffi::c_void;
        slot.iov_len = buf.len();
    }
    let raw = unsafe { libc::readv(fd, iov.as_ptr(), bufs.len() as i32) };
    if raw >= 0 {
        return Ok(raw as usize);
    }
    let err = std::io::Error::last_os_error();
    if err.kind() == std::io::ErrorKind::WouldBlock {
        return Err(err);
    }
    // Fall back to a plain read for platforms/errors readv doesn't cover,
    // matching the single-slice case transparently.
    if bufs.len() == 1 {
        let mut tmp = socket;
        return tmp.read(&mut bufs[0]);
    }
    Err(err)
}

fn write_vectored_nonblocking(
    socket: &TcpStream,
    bufs: &[std::io::IoSlice<'_>],
) -> std::io::Result<usize> {
    use std::io::Write;
    let fd = socket.as_raw_fd();
    let mut iov: [libc::iovec; 2] = unsafe { std::mem::zeroed() };
    for (slot, buf) in iov.iter_mut().zip(bufs.iter()) {
        slot.iov_base = buf.as_ptr() as *mut std::ffi::c_void;
        slot.iov_len = buf.len();
    }
    let raw = unsafe { libc::writev(fd, iov.as_ptr(), bufs.len() as i32) };
    if raw >= 0 {
        return Ok(raw as usize);
    }
    let err = std::io::Error::last_os_error();
    if err.kind() == std::io::ErrorKind::WouldBlock {
        return Err(err);
    }
    if bufs.len() == 1 {
        let mut tmp = socket;
        return tmp.write(&bufs[0]);
    }
    Err(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_invalid_is_zero() {
        assert_eq!(ConnectionId::INVALID.0, 0);
        assert!(!ConnectionId::INVALID.is_valid());
        assert!(ConnectionId::next().is_valid());
    }
}
