//! The event center (C6): owns a fixed set of shards, routes commands and
//! freshly created connections to the right one by connection id, and is
//! the top-level handle a [`crate::tcp::TcpServer`]/[`crate::tcp::TcpClient`]
//! launches against.
//!
//! Grounded on `cnetpp::tcp::EventCenter`
//! (`examples/original_source/src/cnetpp/tcp/event_center.h`): fixed shard
//! count decided at launch, `id mod shard_count` routing, `submit`/
//! `process_events` as the two operations external code calls (spec §4.6).

use std::sync::Arc;

use tracing::info;

use crate::command::Command;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::shard::{MailboxItem, Shard, ShardHandle};

/// Owns `N` shards for the lifetime of the reactor. Cloning is not
/// supported — callers that need a cross-thread-safe reference hold an
/// `Arc<EventCenter>` (see [`crate::tcp::ConnectionHandle`]).
pub struct EventCenter {
    shards: Vec<Shard>,
    router: Arc<Vec<ShardHandle>>,
    metrics: Arc<Metrics>,
}

impl EventCenter {
    /// Launch `shard_count` shards, each with its own poller, worker
    /// thread, mailbox, and connection table. Returns an error (spec §6:
    /// "`launch` returns false if the event center fails to create any
    /// shard") if any shard's poller/waker setup fails — callers should
    /// treat that as fatal and not use the partially constructed center.
    pub fn launch(
        shard_count: usize,
        max_events: usize,
        max_command_queue_len: usize,
    ) -> Result<Self> {
        let shard_count = shard_count.max(1);
        let mut shards = Vec::with_capacity(shard_count);
        for id in 0..shard_count {
            shards.push(Shard::launch(id, max_events, max_command_queue_len)?);
        }

        let router: Arc<Vec<ShardHandle>> = Arc::new(shards.iter().map(Shard::handle).collect());
        let metrics = Arc::new(Metrics::new());
        for shard in &shards {
            shard.publish(&router, &metrics);
        }

        info!(shard_count, "event center launched");
        Ok(Self {
            shards,
            router,
            metrics,
        })
    }

    /// Number of shards this center is running.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Shared counters, for logging or export.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// A cloneable handle to the shard `connection_id` is (or will be)
    /// pinned to, computed as `id mod shard_count` (spec §4.6).
    pub fn shard_for(&self, connection_id: crate::connection::ConnectionId) -> &ShardHandle {
        let idx = (connection_id.0 as usize) % self.router.len();
        &self.router[idx]
    }

    /// Hand a freshly constructed connection (listener or stream) to the
    /// shard its id routes to, to be adopted into that shard's table.
    /// `async_hint` should be `true` unless the caller is already
    /// confirmed to be running on the destination shard's thread.
    pub fn adopt(&self, conn: Connection, async_hint: bool) -> Result<()> {
        let handle = self.shard_for(conn.id()).clone();
        handle.submit(MailboxItem::Adopt(conn), async_hint)
    }

    /// Submit a command for a connection already adopted by some shard.
    /// Routes by `command.connection_id mod shard_count`; delivery is
    /// synchronous when the caller is already the destination shard's
    /// worker thread, queued (and the shard woken) otherwise (spec §4.6).
    pub fn submit(&self, command: Command, async_hint: bool) -> Result<()> {
        let handle = self.shard_for(command.connection_id).clone();
        handle.submit(MailboxItem::Command(command), async_hint)
    }

    /// Request every shard to stop after draining its mailbox, then block
    /// until all worker threads have exited. Per spec §6, shutdown always
    /// completes (there is no failure mode to report). Idempotent.
    pub fn shutdown(&mut self) {
        for shard in &self.shards {
            shard.request_shutdown();
        }
        for shard in &mut self.shards {
            shard.join();
        }
    }
}

impl Drop for EventCenter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Resolve `worker_count` (per
/// [`crate::config::TcpOptions::resolved_worker_count`]) into a launched
/// [`EventCenter`], surfacing a [`Error::Reactor`] rather than panicking if
/// no shard could be created.
pub fn launch_from_options(options: &crate::config::TcpOptions) -> Result<EventCenter> {
    let shard_count = options.resolved_worker_count();
    EventCenter::launch(shard_count, 1024, options.max_command_queue_len).map_err(|e| {
        Error::reactor(format!(
            "failed to launch event center with {shard_count} shards: {e}"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_and_shutdown_is_clean() {
        let mut center = EventCenter::launch(2, 64, 16).expect("launch");
        assert_eq!(center.shard_count(), 2);
        let snap = center.metrics();
        assert_eq!(snap.connections_active, 0);
        center.shutdown();
    }

    #[test]
    fn shard_count_floors_to_one() {
        let mut center = EventCenter::launch(0, 64, 16).expect("launch");
        assert_eq!(center.shard_count(), 1);
        center.shutdown();
    }
}
