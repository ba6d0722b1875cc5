//! The event loop (C5): one poller, one worker thread, a mailbox, and a
//! connection table, bundled together and run in isolation from every
//! other shard.
//!
//! Grounded on `cnetpp::tcp::EventCenter`'s worker loop
//! (`examples/original_source/src/cnetpp/tcp/event_center.cc`): the worker
//! loop is `drain_mailbox(); poll(); dispatch each event;` verbatim (spec
//! §4.5).

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};

use mio::Token;
use tracing::{debug, info, info_span, warn};

use crate::command::{Command, CommandKind};
use crate::connection::{
    Connection, ConnectionId, ReadableOutcome, State, StreamConnection, WritableOutcome,
};
use crate::error::Result;
use crate::event::{Event, EventMask};
use crate::metrics::Metrics;
use crate::poller::Poller;

/// A unit of work pushed onto a shard's mailbox: either a brand-new
/// connection to adopt (listener or stream, in whatever initial state its
/// constructor chose) or a command referring to one already in the table.
pub enum MailboxItem {
    /// Adopt a freshly created connection. Its `Connection::fd()` becomes
    /// the table key; for a `Stream` already in `State::Connected`
    /// (accepted, or connected synchronously), one readable pass runs
    /// immediately after registration (spec §4.5).
    Adopt(Connection),
    /// Apply a command to a connection already present in some shard's
    /// table (routed to the right shard by `connection_id % shard_count`).
    Command(Command),
}

#[derive(Default)]
struct Mailbox {
    items: std::sync::Mutex<Vec<MailboxItem>>,
}

impl Mailbox {
    fn push(&self, item: MailboxItem) {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(item);
    }

    fn drain(&self) -> Vec<MailboxItem> {
        std::mem::take(&mut *self.items.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// A cheaply cloneable reference to one shard, used both by the event
/// center (to submit commands) and by other shards' workers (to route a
/// newly accepted/connected stream to the shard its id is pinned to).
#[derive(Clone)]
pub struct ShardHandle {
    id: usize,
    mailbox: Arc<Mailbox>,
    interrupter: crate::interrupter::InterrupterHandle,
    thread_id: Arc<OnceLock<ThreadId>>,
    max_command_queue_len: usize,
}

impl ShardHandle {
    /// This shard's index, `0..shard_count`.
    pub fn id(&self) -> usize {
        self.id
    }

    /// True iff called from this shard's own worker thread.
    pub fn is_own_thread(&self) -> bool {
        self.thread_id.get() == Some(&thread::current().id())
    }

    /// Submit an item to this shard. `async_hint` forces mailbox delivery
    /// even when the caller happens to be this shard's own thread (used by
    /// the listener's accept loop, which must never re-enter the table
    /// it's currently iterating). Per spec §4.4.4/§6: delivery is
    /// synchronous (no extra wake) when the caller is already on the
    /// shard thread, since the mailbox will be drained at the top of the
    /// very next loop iteration before the poller blocks again; otherwise
    /// the interrupter wakes the shard out of `poll()`.
    pub fn submit(&self, item: MailboxItem, async_hint: bool) -> Result<()> {
        let len = self.mailbox.len();
        if len >= self.max_command_queue_len {
            warn!(shard = self.id, len, "mailbox exceeds configured soft cap");
        }
        let same_thread = self.is_own_thread();
        self.mailbox.push(item);
        if async_hint || !same_thread {
            self.interrupter.interrupt()?;
        }
        Ok(())
    }
}

/// Owns the worker thread backing one [`ShardHandle`].
pub struct Shard {
    handle: ShardHandle,
    shutdown: Arc<AtomicBool>,
    join: Option<thread::JoinHandle<()>>,
    router_slot: Arc<OnceLock<Arc<Vec<ShardHandle>>>>,
    metrics_slot: Arc<OnceLock<Arc<Metrics>>>,
}

impl Shard {
    /// Launch a shard: create its poller (and interrupter) on the calling
    /// thread, then hand both to a freshly spawned worker thread. The
    /// sibling router and shared metrics aren't known yet — shards need to
    /// see every sibling's handle to route accepted connections, so the
    /// event center constructs every `Shard` first and only then publishes
    /// both via [`Shard::publish`]. The worker blocks at the top of its
    /// loop until that happens.
    pub fn launch(id: usize, max_events: usize, max_command_queue_len: usize) -> Result<Self> {
        let poller = Poller::new(max_events)?;
        let interrupter = poller.interrupter_handle();
        let mailbox = Arc::new(Mailbox::default());
        let thread_id = Arc::new(OnceLock::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = ShardHandle {
            id,
            mailbox: mailbox.clone(),
            interrupter,
            thread_id: thread_id.clone(),
            max_command_queue_len,
        };

        let router_slot: Arc<OnceLock<Arc<Vec<ShardHandle>>>> = Arc::new(OnceLock::new());
        let metrics_slot: Arc<OnceLock<Arc<Metrics>>> = Arc::new(OnceLock::new());

        let worker_shutdown = shutdown.clone();
        let worker_router = router_slot.clone();
        let worker_metrics = metrics_slot.clone();
        let join = thread::Builder::new()
            .name(format!("reactor-shard-{id}"))
            .spawn(move || {
                let _ = thread_id.set(thread::current().id());
                let router = wait_for(&worker_router);
                let metrics = wait_for(&worker_metrics);
                run_worker(id, poller, mailbox, router, metrics, worker_shutdown);
            })
            .map_err(|e| crate::Error::reactor(format!("spawn shard {id}: {e}")))?;

        Ok(Self {
            handle,
            shutdown,
            join: Some(join),
            router_slot,
            metrics_slot,
        })
    }

    /// This shard's cloneable handle.
    pub fn handle(&self) -> ShardHandle {
        self.handle.clone()
    }

    /// Hand the shard its sibling router and the shared metrics. Must be
    /// called exactly once, after every [`Shard`] in a
    /// [`crate::reactor::EventCenter`] has been constructed — the worker
    /// thread is parked waiting for this before it does anything else.
    pub fn publish(&self, router: &Arc<Vec<ShardHandle>>, metrics: &Arc<Metrics>) {
        let _ = self.router_slot.set(router.clone());
        let _ = self.metrics_slot.set(metrics.clone());
    }

    /// Signal the worker to stop after its current mailbox drain and wake
    /// it out of `poll()`.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        let _ = self.handle.interrupter.interrupt();
    }

    /// Block until the worker thread has exited.
    pub fn join(&mut self) {
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

fn wait_for<T>(slot: &OnceLock<Arc<T>>) -> Arc<T> {
    loop {
        if let Some(v) = slot.get() {
            return v.clone();
        }
        thread::yield_now();
    }
}

#[derive(Default)]
struct Table {
    by_fd: HashMap<RawFd, Connection>,
    id_to_fd: HashMap<ConnectionId, RawFd>,
}

impl Table {
    fn insert(&mut self, conn: Connection) -> RawFd {
        let fd = conn.fd();
        self.id_to_fd.insert(conn.id(), fd);
        self.by_fd.insert(fd, conn);
        fd
    }

    fn remove_by_id(&mut self, id: ConnectionId) -> Option<Connection> {
        let fd = self.id_to_fd.remove(&id)?;
        self.by_fd.remove(&fd)
    }

    fn remove_by_fd(&mut self, fd: RawFd) -> Option<Connection> {
        let conn = self.by_fd.remove(&fd)?;
        self.id_to_fd.remove(&conn.id());
        Some(conn)
    }

    fn get_mut_by_id(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        let fd = *self.id_to_fd.get(&id)?;
        self.by_fd.get_mut(&fd)
    }
}

fn run_worker(
    id: usize,
    mut poller: Poller,
    mailbox: Arc<Mailbox>,
    router: Arc<Vec<ShardHandle>>,
    metrics: Arc<Metrics>,
    shutdown: Arc<AtomicBool>,
) {
    let span = info_span!("shard", shard_id = id);
    let _guard = span.enter();
    info!("shard worker started");
    let mut table = Table::default();

    loop {
        for item in mailbox.drain() {
            match item {
                MailboxItem::Adopt(conn) => adopt(&mut table, &poller, &metrics, conn),
                MailboxItem::Command(cmd) => apply_command(&mut table, &poller, &metrics, cmd),
            }
        }

        if shutdown.load(Ordering::Acquire) {
            break;
        }

        let (events, _woken) = match poller.poll(None) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "poller wait failed");
                continue;
            }
        };

        for ev in events {
            dispatch_event(id, &mut table, &poller, &router, &metrics, ev);
        }
    }

    for (_, conn) in table.by_fd.drain() {
        if let Connection::Stream(mut s) = conn {
            s.handle_closed();
            metrics.connections_active.fetch_sub(1, Ordering::Relaxed);
        }
    }
    info!("shard worker stopped");
}

fn adopt(table: &mut Table, poller: &Poller, metrics: &Metrics, conn: Connection) {
    let initial_interest = match &conn {
        Connection::Listener(_) => EventMask::READ,
        Connection::Stream(s) if s.state() == State::Connecting => {
            EventMask::READ | EventMask::WRITE
        }
        Connection::Stream(_) => EventMask::READ,
    };

    let fd = conn.fd();
    if let Err(e) = poller.register(fd, Token(fd as usize), initial_interest) {
        warn!(error = %e, fd, "failed to register adopted connection");
        return;
    }

    let becomes_connected = matches!(&conn, Connection::Stream(s) if s.state() == State::Connected);
    table.insert(conn);

    match table.by_fd.get_mut(&fd) {
        Some(Connection::Listener(l)) => l.cached_interest = initial_interest,
        Some(Connection::Stream(s)) => {
            s.cached_interest = initial_interest;
            metrics.connections_active.fetch_add(1, Ordering::Relaxed);
        }
        None => {}
    }

    if becomes_connected {
        // "AddConnected inserts into the table and immediately invokes one
        // readable pass (because data may already be buffered by the
        // kernel)" — spec §4.5.
        run_readable_pass(fd, table, poller, metrics);
    }
}

fn apply_command(table: &mut Table, poller: &Poller, metrics: &Metrics, cmd: Command) {
    let Command {
        connection_id,
        kind,
    } = cmd;

    if kind.contains(CommandKind::REMOVE_HARD) {
        remove_hard_by_id(table, poller, metrics, connection_id);
        return;
    }

    if kind.contains(CommandKind::REMOVE_SOFT) {
        let drained = match table.get_mut_by_id(connection_id) {
            Some(Connection::Stream(s)) => {
                s.begin_soft_close();
                s.send_queue_is_empty()
            }
            _ => return,
        };
        if drained {
            remove_hard_by_id(table, poller, metrics, connection_id);
        } else if let Some(Connection::Stream(s)) = table.get_mut_by_id(connection_id) {
            recompute_interest(s, poller);
        }
        return;
    }

    if kind.intersects(CommandKind::READABLE | CommandKind::WRITABLE) {
        if let Some(Connection::Stream(s)) = table.get_mut_by_id(connection_id) {
            recompute_interest(s, poller);
        }
    }
}

fn recompute_interest(s: &mut StreamConnection, poller: &Poller) {
    let wants_write = s.state() == State::Connecting || !s.send_queue_is_empty();
    let desired = match s.state() {
        State::Closed => EventMask::empty(),
        _ if wants_write => EventMask::READ | EventMask::WRITE,
        _ => EventMask::READ,
    };
    if desired != s.cached_interest {
        let fd = s.fd();
        if let Err(e) = poller.reregister(fd, Token(fd as usize), desired) {
            warn!(error = %e, fd, "failed to reregister interest");
        }
        s.cached_interest = desired;
    }
}

fn remove_hard_by_id(table: &mut Table, poller: &Poller, metrics: &Metrics, id: ConnectionId) {
    if let Some(conn) = table.remove_by_id(id) {
        finish_removal(poller, metrics, conn);
    }
}

fn remove_hard_by_fd(table: &mut Table, poller: &Poller, metrics: &Metrics, fd: RawFd) {
    if let Some(conn) = table.remove_by_fd(fd) {
        finish_removal(poller, metrics, conn);
    }
}

fn finish_removal(poller: &Poller, metrics: &Metrics, conn: Connection) {
    let fd = conn.fd();
    let _ = poller.deregister(fd);
    if let Connection::Stream(mut s) = conn {
        s.handle_closed();
        metrics.connections_active.fetch_sub(1, Ordering::Relaxed);
    }
}

fn run_readable_pass(fd: RawFd, table: &mut Table, poller: &Poller, metrics: &Metrics) {
    let outcome = match table.by_fd.get_mut(&fd) {
        Some(Connection::Stream(s)) => Some(s.handle_readable(metrics)),
        _ => None,
    };
    let forced = matches!(outcome, Some(ReadableOutcome::Close));
    check_pending_removal(fd, table, poller, metrics, forced);
}

/// After any callback-bearing pass, apply whichever of {pending removal,
/// interest recompute} the connection now needs. `forced_close` lets the
/// caller short-circuit straight to removal (readable/writable hard
/// errors) without going through `request_close`. A same-thread
/// `request_close(false)` (soft close) only hard-removes once the send
/// queue has actually drained, mirroring `apply_command`'s `REMOVE_SOFT`
/// handling (spec §4.4.1: "Closing — queue empty after flush — Closed").
/// Returns `true` iff the connection was removed from the table.
fn check_pending_removal(
    fd: RawFd,
    table: &mut Table,
    poller: &Poller,
    metrics: &Metrics,
    forced_close: bool,
) -> bool {
    let pending = if forced_close {
        Some(true)
    } else {
        match table.by_fd.get_mut(&fd) {
            Some(Connection::Stream(s)) => s.take_pending_removal(),
            _ => None,
        }
    };

    match pending {
        Some(true) => {
            remove_hard_by_fd(table, poller, metrics, fd);
            true
        }
        Some(false) => {
            let drained =
                matches!(table.by_fd.get(&fd), Some(Connection::Stream(s)) if s.send_queue_is_empty());
            if drained {
                remove_hard_by_fd(table, poller, metrics, fd);
                true
            } else {
                if let Some(Connection::Stream(s)) = table.by_fd.get_mut(&fd) {
                    recompute_interest(s, poller);
                }
                false
            }
        }
        None => {
            if let Some(Connection::Stream(s)) = table.by_fd.get_mut(&fd) {
                recompute_interest(s, poller);
            }
            false
        }
    }
}

fn dispatch_event(
    shard_id: usize,
    table: &mut Table,
    poller: &Poller,
    router: &Arc<Vec<ShardHandle>>,
    metrics: &Metrics,
    ev: Event,
) {
    let fd = ev.fd;
    let is_listener = matches!(table.by_fd.get(&fd), Some(Connection::Listener(_)));
    if is_listener {
        dispatch_listener(shard_id, table, poller, router, metrics, fd);
        return;
    }

    if !table.by_fd.contains_key(&fd) {
        return;
    }

    if ev.mask.contains(EventMask::CLOSE) {
        remove_hard_by_fd(table, poller, metrics, fd);
        return;
    }

    if ev.mask.contains(EventMask::READ) {
        let outcome = match table.by_fd.get_mut(&fd) {
            Some(Connection::Stream(s)) => Some(s.handle_readable(metrics)),
            _ => None,
        };
        match outcome {
            Some(ReadableOutcome::Close) => {
                remove_hard_by_fd(table, poller, metrics, fd);
                return;
            }
            Some(ReadableOutcome::Continue) => {
                if check_pending_removal(fd, table, poller, metrics, false) {
                    return;
                }
            }
            None => return,
        }
    }

    if ev.mask.contains(EventMask::WRITE) {
        let outcome = match table.by_fd.get_mut(&fd) {
            Some(Connection::Stream(s)) => Some(s.handle_writable(metrics)),
            _ => None,
        };
        match outcome {
            Some(WritableOutcome::Close) => {
                remove_hard_by_fd(table, poller, metrics, fd);
            }
            Some(WritableOutcome::KeepWritable) | Some(WritableOutcome::DropWritable) => {
                check_pending_removal(fd, table, poller, metrics, false);
            }
            None => {}
        }
    }
}

fn dispatch_listener(
    shard_id: usize,
    table: &mut Table,
    poller: &Poller,
    router: &Arc<Vec<ShardHandle>>,
    metrics: &Metrics,
    fd: RawFd,
) {
    loop {
        let accepted = match table.by_fd.get(&fd) {
            Some(Connection::Listener(l)) => l.accept(),
            _ => return,
        };
        let (socket, remote) = match accepted {
            Ok(Some(pair)) => pair,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, shard = shard_id, "accept failed");
                return;
            }
        };

        let handler = match table.by_fd.get(&fd) {
            Some(Connection::Listener(l)) => l.handler().clone(),
            _ => return,
        };

        let new_id = ConnectionId::next();
        let mut stream = handler.accept(new_id, socket, remote);
        stream.fire_connected();
        metrics.accept_count.fetch_add(1, Ordering::Relaxed);
        debug!(shard = shard_id, %remote, "accepted connection");

        if router.is_empty() {
            continue;
        }
        let target = (new_id.0 as usize) % router.len();
        if let Err(e) = router[target].submit(MailboxItem::Adopt(Connection::Stream(stream)), true)
        {
            warn!(error = %e, target, "failed to route accepted connection");
        }
    }
}
