//! Thin abstraction over the kernel readiness mechanism.
//!
//! `mio::Poll` already selects epoll on Linux, kqueue on BSD/macOS, and IOCP
//! on Windows at build time, which is the capability-detected backend
//! selection the original `EventPoller` hierarchy performed at
//! construction. We keep one concrete backend rather than reimplementing
//! that selection by hand.

use std::os::unix::io::RawFd;
use std::time::Duration;

use mio::{Events, Interest, Token};

use crate::error::{Error, Result};
use crate::event::{Event, EventMask};
use crate::interrupter::Interrupter;

/// The token reserved for the shard's interrupter. Never handed out to a
/// connection fd.
pub const WAKE_TOKEN: Token = Token(usize::MAX);

/// A readiness poller plus the interrupter used to wake it from other
/// threads.
pub struct Poller {
    poll: mio::Poll,
    events: Events,
    interrupter: Interrupter,
}

impl Poller {
    /// Create a poller with room for `max_events` per wake.
    pub fn new(max_events: usize) -> Result<Self> {
        let poll = mio::Poll::new().map_err(|e| Error::reactor(format!("poll create: {e}")))?;
        let interrupter = Interrupter::create(poll.registry(), WAKE_TOKEN)?;
        Ok(Self {
            poll,
            events: Events::with_capacity(max_events),
            interrupter,
        })
    }

    /// A handle that can wake this poller from any thread.
    pub fn interrupter_handle(&self) -> crate::interrupter::InterrupterHandle {
        self.interrupter.handle()
    }

    /// Register `fd` for the given interest, under `token` (the connection's
    /// fd cast to a `Token`, by convention).
    pub fn register(&self, fd: RawFd, token: Token, interest: EventMask) -> Result<()> {
        let mut source = mio::unix::SourceFd(&fd);
        self.poll
            .registry()
            .register(&mut source, token, to_mio_interest(interest))
            .map_err(|e| Error::reactor(format!("register fd {fd}: {e}")))
    }

    /// Change the interest mask for an already-registered fd. Callers are
    /// expected to elide this when the new mask equals the connection's
    /// `cached_interest` (invariant 7: interest-mask minimality).
    pub fn reregister(&self, fd: RawFd, token: Token, interest: EventMask) -> Result<()> {
        let mut source = mio::unix::SourceFd(&fd);
        self.poll
            .registry()
            .reregister(&mut source, token, to_mio_interest(interest))
            .map_err(|e| Error::reactor(format!("reregister fd {fd}: {e}")))
    }

    /// Remove `fd` from this poller's interest set.
    pub fn deregister(&self, fd: RawFd) -> Result<()> {
        let mut source = mio::unix::SourceFd(&fd);
        self.poll
            .registry()
            .deregister(&mut source)
            .map_err(|e| Error::reactor(format!("deregister fd {fd}: {e}")))
    }

    /// Block until at least one fd is ready or the interrupter fires.
    /// Returns the readiness events (excluding the wake token) and whether
    /// the interrupter fired this wake.
    pub fn poll(&mut self, timeout: Option<Duration>) -> Result<(Vec<Event>, bool)> {
        self.poll
            .poll(&mut self.events, timeout)
            .map_err(|e| Error::reactor(format!("poll: {e}")))?;

        let mut woken = false;
        let mut out = Vec::with_capacity(self.events.iter().count());
        for ev in self.events.iter() {
            if ev.token() == WAKE_TOKEN {
                woken = true;
                self.interrupter.reset();
                continue;
            }
            out.push(Event {
                fd: ev.token().0 as RawFd,
                mask: event_mask(ev),
            });
        }
        Ok((out, woken))
    }
}

/// Map a raw mio event into our `EventMask`, with hangup/error bits taking
/// precedence over readable/writable (spec §4.3's mapping rule).
fn event_mask(ev: &mio::event::Event) -> EventMask {
    if ev.is_error() || ev.is_read_closed() || ev.is_write_closed() {
        return EventMask::CLOSE;
    }
    let mut mask = EventMask::empty();
    if ev.is_readable() {
        mask |= EventMask::READ;
    }
    if ev.is_writable() {
        mask |= EventMask::WRITE;
    }
    mask
}

fn to_mio_interest(mask: EventMask) -> Interest {
    match (mask.contains(EventMask::READ), mask.contains(EventMask::WRITE)) {
        (true, true) => Interest::READABLE | Interest::WRITABLE,
        (true, false) => Interest::READABLE,
        (false, true) => Interest::WRITABLE,
        (false, false) => Interest::READABLE,
    }
}
