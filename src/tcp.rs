//! TCP server and client (C7): listener management, outbound connect, and
//! the cross-thread [`ConnectionHandle`] used to `send`/`mark_closed` from
//! any thread.
//!
//! Socket setup (`SO_REUSEADDR`/`SO_REUSEPORT`, non-blocking, backlog,
//! `TCP_NODELAY`, buffer sizes) is grounded on the teacher's
//! `net.rs::TcpListener::bind`/`TcpStream::new`
//! (`examples/pallabcodes-c-or-c-plus-plus/build-event-loop/src/net.rs`).

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, Weak};

use mio::net::{TcpListener as MioTcpListener, TcpStream as MioTcpStream};
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tracing::info;

use crate::command::{Command, CommandKind};
use crate::config::{TcpClientOptions, TcpServerOptions};
use crate::connection::{
    AcceptHandler, Callbacks, Connection, ConnectionId, ListenerConnection, SendQueue, State,
    StreamConnection,
};
use crate::error::{Error, Result};
use crate::reactor::EventCenter;
use crate::ring_buffer::RingBuffer;

/// A cross-thread-safe reference to one connection. `send`/`mark_closed`
/// work from any thread (spec §4.4.4/§5): bytes are appended straight into
/// the shared send queue, then a command wakes the owning shard to
/// recompute interest (or perform the close) on its own thread.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    center: Weak<EventCenter>,
    send_queue: Arc<SendQueue>,
}

impl ConnectionHandle {
    /// The connection this handle refers to.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Enqueue `data` for transmission and wake the owning shard to flush
    /// it. Bytes from successive `send` calls arrive in call order
    /// (ordering guarantee (b), spec §5).
    pub fn send(&self, data: &[u8]) -> Result<()> {
        if !data.is_empty() {
            let mut buf = RingBuffer::new(data.len());
            if !buf.write(data) {
                return Err(Error::network("failed to buffer outgoing data"));
            }
            self.send_queue.lock().push_back(buf);
        }
        self.submit(CommandKind::READABLE | CommandKind::WRITABLE)
    }

    /// Request the connection be closed. `immediate = true` discards the
    /// send queue; `false` drains it first (spec §4.4.4).
    pub fn mark_closed(&self, immediate: bool) -> Result<()> {
        let kind = if immediate {
            CommandKind::REMOVE_HARD
        } else {
            CommandKind::REMOVE_SOFT
        };
        self.submit(kind)
    }

    fn submit(&self, kind: CommandKind) -> Result<()> {
        match self.center.upgrade() {
            Some(center) => center.submit(Command::new(self.id, kind), true),
            None => Err(Error::network("event center is no longer running")),
        }
    }
}

/// Configure an accepted or connected socket per spec §4.4.5: non-blocking,
/// close-on-exec (handled by mio's `from_std` + `O_CLOEXEC` default on
/// modern Linux), `TCP_NODELAY`, keepalive on, linger off, and the
/// configured kernel buffer sizes.
fn tune_socket(stream: &MioTcpStream, options: &crate::config::TcpOptions) -> Result<()> {
    let sock = SockRef::from(stream);
    sock.set_nodelay(true)
        .map_err(|e| Error::network(format!("set TCP_NODELAY: {e}")))?;
    sock.set_keepalive(true)
        .map_err(|e| Error::network(format!("set SO_KEEPALIVE: {e}")))?;
    sock.set_linger(None)
        .map_err(|e| Error::network(format!("set SO_LINGER off: {e}")))?;
    sock.set_send_buffer_size(options.tcp_send_buffer_size)
        .map_err(|e| Error::network(format!("set SO_SNDBUF: {e}")))?;
    sock.set_recv_buffer_size(options.tcp_receive_buffer_size)
        .map_err(|e| Error::network(format!("set SO_RCVBUF: {e}")))?;
    Ok(())
}

/// Shared registry of every live connection's send-queue handle, keyed by
/// id, used to hand out [`ConnectionHandle`]s and to drop the entry once
/// `closed` fires. Mirrors spec §5's "HTTP connection map: guarded by a
/// mutex" pattern, one layer down at the TCP level.
#[derive(Default)]
struct Registry {
    by_id: Mutex<std::collections::HashMap<ConnectionId, Arc<SendQueue>>>,
}

impl Registry {
    fn insert(&self, id: ConnectionId, queue: Arc<SendQueue>) {
        self.by_id.lock().unwrap_or_else(|e| e.into_inner()).insert(id, queue);
    }

    fn remove(&self, id: ConnectionId) {
        self.by_id.lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
    }

    fn get(&self, id: ConnectionId) -> Option<Arc<SendQueue>> {
        self.by_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }
}

/// Wrap the caller's four lifecycle callbacks so the registry stays in
/// sync: populate it on `connected`, drop the entry on `closed`.
fn wrap_callbacks(user: Callbacks, registry: Arc<Registry>) -> Callbacks {
    let registry_for_connected = registry.clone();
    let user_connected = user.connected.clone();
    let connected = Arc::new(move |conn: &mut StreamConnection| -> bool {
        registry_for_connected.insert(conn.id(), conn.send_queue_handle());
        match &user_connected {
            Some(cb) => cb(conn),
            None => true,
        }
    });

    let registry_for_closed = registry;
    let user_closed = user.closed.clone();
    let closed = Arc::new(move |conn: &mut StreamConnection| -> bool {
        registry_for_closed.remove(conn.id());
        match &user_closed {
            Some(cb) => cb(conn),
            None => true,
        }
    });

    Callbacks {
        connected: Some(connected),
        received: user.received,
        sent: user.sent,
        closed: Some(closed),
    }
}

struct ServerAcceptHandler {
    callbacks: Callbacks,
    options: TcpServerOptions,
}

impl AcceptHandler for ServerAcceptHandler {
    fn accept(
        &self,
        new_id: ConnectionId,
        socket: MioTcpStream,
        remote_endpoint: SocketAddr,
    ) -> StreamConnection {
        if let Err(e) = tune_socket(&socket, &self.options.base) {
            tracing::warn!(error = %e, "failed to tune accepted socket");
        }
        StreamConnection::new(
            new_id,
            socket,
            remote_endpoint,
            State::Connected,
            self.options.base.receive_buffer_size,
            self.callbacks.clone(),
        )
    }
}

/// A listening TCP server wired to an [`EventCenter`] (spec §4.7).
pub struct TcpServer {
    center: Arc<EventCenter>,
    listener_id: ConnectionId,
    local_endpoint: SocketAddr,
    registry: Arc<Registry>,
}

impl TcpServer {
    /// Bind, configure (cloexec, non-blocking, `SO_REUSEADDR`, backlog from
    /// `options`), and register a listening socket on `center`. Per spec
    /// §6, a bind/listen failure is returned as an `Err` rather than a
    /// boolean, consistent with this crate's `Result`-based API.
    pub fn launch(
        center: Arc<EventCenter>,
        local_endpoint: SocketAddr,
        options: TcpServerOptions,
        callbacks: Callbacks,
    ) -> Result<Self> {
        let domain = if local_endpoint.is_ipv6() {
            Domain::IPV6
        } else {
            Domain::IPV4
        };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| Error::network(format!("create listen socket: {e}")))?;
        socket
            .set_reuse_address(true)
            .map_err(|e| Error::network(format!("set SO_REUSEADDR: {e}")))?;
        #[cfg(unix)]
        socket
            .set_reuse_port(true)
            .map_err(|e| Error::network(format!("set SO_REUSEPORT: {e}")))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| Error::network(format!("set non-blocking: {e}")))?;
        socket
            .bind(&local_endpoint.into())
            .map_err(|e| Error::network(format!("bind {local_endpoint}: {e}")))?;
        socket
            .listen(options.backlog as i32)
            .map_err(|e| Error::network(format!("listen: {e}")))?;

        let mio_listener = MioTcpListener::from_std(socket.into());
        let local_endpoint = mio_listener
            .local_addr()
            .map_err(|e| Error::network(format!("local_addr: {e}")))?;

        let registry = Arc::new(Registry::default());
        let handler = Arc::new(ServerAcceptHandler {
            callbacks: wrap_callbacks(callbacks, registry.clone()),
            options,
        });

        let listener_id = ConnectionId::next();
        let listener = ListenerConnection::new(listener_id, mio_listener, local_endpoint, handler);
        center.adopt(Connection::Listener(listener), true)?;

        info!(%local_endpoint, "TCP server listening");
        Ok(Self {
            center,
            listener_id,
            local_endpoint,
            registry,
        })
    }

    /// The bound local address (useful when `local_endpoint`'s port was 0).
    pub fn local_endpoint(&self) -> SocketAddr {
        self.local_endpoint
    }

    /// This listener's connection id.
    pub fn listener_id(&self) -> ConnectionId {
        self.listener_id
    }

    /// A handle for `connection_id`, if it is currently live.
    pub fn connection(&self, connection_id: ConnectionId) -> Option<ConnectionHandle> {
        self.registry.get(connection_id).map(|send_queue| ConnectionHandle {
            id: connection_id,
            center: Arc::downgrade(&self.center),
            send_queue,
        })
    }

    /// Post a soft-remove for `connection_id` to its owning shard (spec §4.7).
    pub fn async_close(&self, connection_id: ConnectionId) -> Result<()> {
        self.center
            .submit(Command::new(connection_id, CommandKind::REMOVE_SOFT), true)
    }

    /// Remove the listening socket from its shard and stop accepting new
    /// connections. Existing connections are unaffected.
    pub fn shutdown(&self) -> Result<()> {
        self.center.submit(
            Command::new(self.listener_id, CommandKind::REMOVE_HARD),
            true,
        )
    }
}

/// An outbound TCP client wired to an [`EventCenter`] (spec §4.7).
pub struct TcpClient {
    center: Arc<EventCenter>,
    registry: Arc<Registry>,
}

impl TcpClient {
    /// Bind this client to an event center. Multiple connects can share one
    /// client (and its registry).
    pub fn new(center: Arc<EventCenter>) -> Self {
        Self {
            center,
            registry: Arc::new(Registry::default()),
        }
    }

    /// Initiate a non-blocking connect to `remote_endpoint`. Returns the
    /// assigned connection id immediately; the `connected` callback fires
    /// once the handshake completes (or `closed` fires without `connected`
    /// if it fails). Returns [`ConnectionId::INVALID`] if socket setup
    /// itself fails (spec §6: "`connect` returns a reserved invalid-id
    /// value on failure").
    pub fn connect(
        &self,
        remote_endpoint: SocketAddr,
        options: TcpClientOptions,
        callbacks: Callbacks,
    ) -> ConnectionId {
        match self.try_connect(remote_endpoint, options, callbacks) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(error = %e, %remote_endpoint, "connect failed");
                ConnectionId::INVALID
            }
        }
    }

    fn try_connect(
        &self,
        remote_endpoint: SocketAddr,
        options: TcpClientOptions,
        callbacks: Callbacks,
    ) -> Result<ConnectionId> {
        let domain = if remote_endpoint.is_ipv6() {
            Domain::IPV6
        } else {
            Domain::IPV4
        };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| Error::network(format!("create connect socket: {e}")))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| Error::network(format!("set non-blocking: {e}")))?;

        let initial_state = match socket.connect(&remote_endpoint.into()) {
            // Even an immediate (e.g. loopback) success is adopted as
            // `Connecting`, matching `cnetpp::tcp::TcpClient::Connect`
            // (`examples/original_source/src/cnetpp/tcp/tcp_client.cc:158-168`),
            // which always posts `kAddConnectingConn | kWriteable` — that way
            // `connected` is fired exactly once, by the writable-driven
            // `complete_connecting` transition, instead of being skipped.
            Ok(()) => State::Connecting,
            Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => State::Connecting,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => State::Connecting,
            Err(e) => return Err(Error::network(format!("connect {remote_endpoint}: {e}"))),
        };

        let mio_stream = MioTcpStream::from_std(socket.into());
        tune_socket(&mio_stream, &options.base)?;

        let new_id = ConnectionId::next();
        let wrapped = wrap_callbacks(callbacks, self.registry.clone());
        let stream = StreamConnection::new(
            new_id,
            mio_stream,
            remote_endpoint,
            initial_state,
            options.base.receive_buffer_size,
            wrapped,
        );

        self.center.adopt(Connection::Stream(stream), true)?;
        Ok(new_id)
    }

    /// A handle for `connection_id`, if it is currently live.
    pub fn connection(&self, connection_id: ConnectionId) -> Option<ConnectionHandle> {
        self.registry.get(connection_id).map(|send_queue| ConnectionHandle {
            id: connection_id,
            center: Arc::downgrade(&self.center),
            send_queue,
        })
    }

    /// Post a soft-remove for `connection_id` to its owning shard (spec §4.7).
    pub fn async_close(&self, connection_id: ConnectionId) -> Result<()> {
        self.center
            .submit(Command::new(connection_id, CommandKind::REMOVE_SOFT), true)
    }
}
