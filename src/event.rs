//! Readiness events reported by the poller.

use bitflags::bitflags;
use std::os::unix::io::RawFd;

bitflags! {
    /// The readiness kinds a poller can report for a file descriptor.
    /// `CLOSE` takes precedence over `READ`/`WRITE`: when hangup or error
    /// bits are present in the raw kernel event, `READ`/`WRITE` are
    /// suppressed (see `Poller::events_for`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventMask: u8 {
        /// Readable without blocking.
        const READ  = 0b001;
        /// Writable without blocking.
        const WRITE = 0b010;
        /// Peer hangup or a socket error occurred.
        const CLOSE = 0b100;
    }
}

/// A single readiness report delivered by the poller to a shard.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    /// The file descriptor the event concerns.
    pub fd: RawFd,
    /// Which readiness kinds fired.
    pub mask: EventMask,
}
