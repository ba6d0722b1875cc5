//! Self-pipe/eventfd primitive used to wake a blocked poller from another
//! thread.
//!
//! `cnetpp::tcp::Interrupter` is a hand-rolled pipe or eventfd, drained
//! explicitly by the shard thread after the poller reports it readable.
//! `mio::Waker` already is that primitive — eventfd-backed on Linux,
//! `EVFILT_USER` on BSD/macOS/iOS — and mio's own event loop drains the
//! underlying notification when it reports the wake token, so `reset` here
//! is a documented no-op rather than a raw fd read. The public shape
//! (`create`/`interrupt`/`reset`) is kept so callers don't need to know
//! which backend is in play.

use std::sync::Arc;

use crate::error::Result;

/// Wakes a shard's blocked poller from any thread.
pub struct Interrupter {
    waker: Arc<mio::Waker>,
}

impl Interrupter {
    /// Register a waker against `registry` under `token`. The shard's
    /// poller must treat `token` as reserved and never hand it out to a
    /// connection's fd.
    pub fn create(registry: &mio::Registry, token: mio::Token) -> Result<Self> {
        let waker = mio::Waker::new(registry, token)
            .map_err(|e| crate::Error::reactor(format!("failed to create waker: {e}")))?;
        Ok(Self {
            waker: Arc::new(waker),
        })
    }

    /// A cheaply cloneable handle that can be called from any thread.
    pub fn handle(&self) -> InterrupterHandle {
        InterrupterHandle {
            waker: self.waker.clone(),
        }
    }

    /// Wake the poller. Safe to call from any thread; repeated calls before
    /// the poller wakes are coalesced into a single notification.
    pub fn interrupt(&self) -> Result<()> {
        self.waker
            .wake()
            .map_err(|e| crate::Error::reactor(format!("failed to wake poller: {e}")))
    }

    /// Acknowledge the wake. `mio::Waker` drains its own notification while
    /// dispatching the wake token, so there is nothing left to do here;
    /// kept for parity with the interrupter's conceptual contract (drain
    /// before the next `interrupt` can be observed).
    pub fn reset(&self) {}
}

/// A cloneable handle to an [`Interrupter`], usable from any thread.
#[derive(Clone)]
pub struct InterrupterHandle {
    waker: Arc<mio::Waker>,
}

impl InterrupterHandle {
    /// Wake the owning shard's poller.
    pub fn interrupt(&self) -> Result<()> {
        self.waker
            .wake()
            .map_err(|e| crate::Error::reactor(format!("failed to wake poller: {e}")))
    }
}
