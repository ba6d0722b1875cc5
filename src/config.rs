//! Configuration knobs for the reactor, TCP layer, and HTTP layer.
//!
//! Mirrors the teacher's `config.rs` shape (plain `Serialize`/`Deserialize`
//! structs, loadable from TOML) but scoped to what spec §6 actually
//! enumerates. Callbacks are function values, not serializable, so they are
//! attached separately via builder methods rather than living on these
//! structs — the common construction path is programmatic, not
//! file-driven.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Knobs shared by the TCP server and client: shard count, mailbox
/// capacity, and the kernel/ring-buffer sizes applied to every adopted
/// connection (spec §6 "TCP options").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpOptions {
    /// Number of shards to launch. `0` resolves to the logical CPU count
    /// (floor of one), per spec §5.
    pub worker_count: usize,
    /// Soft cap on a shard's mailbox length before `submit` starts logging
    /// warnings (not enforced as a hard backpressure limit — the mailbox
    /// is a `Vec`, not a bounded channel).
    pub max_command_queue_len: usize,
    /// `SO_SNDBUF` applied to each accepted/connected socket.
    pub tcp_send_buffer_size: usize,
    /// `SO_RCVBUF` applied to each accepted/connected socket.
    pub tcp_receive_buffer_size: usize,
    /// Initial capacity of a connection's send-side ring buffers.
    pub send_buffer_size: usize,
    /// Initial capacity of a connection's `recv_buffer`.
    pub receive_buffer_size: usize,
}

impl Default for TcpOptions {
    fn default() -> Self {
        Self {
            worker_count: 0,
            max_command_queue_len: 4096,
            tcp_send_buffer_size: 64 * 1024,
            tcp_receive_buffer_size: 64 * 1024,
            send_buffer_size: 4096,
            receive_buffer_size: 4096,
        }
    }
}

impl TcpOptions {
    /// `worker_count`, resolved per spec §5: `0` becomes the logical CPU
    /// count, with a floor of one.
    pub fn resolved_worker_count(&self) -> usize {
        if self.worker_count == 0 {
            num_cpus::get().max(1)
        } else {
            self.worker_count
        }
    }

    /// Parse options from a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::config(format!("invalid TCP options TOML: {e}")))
    }

    /// Serialize options to a TOML document.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::config(format!("failed to serialize TCP options: {e}")))
    }
}

/// Options for [`crate::tcp::TcpServer::launch`]: the shared [`TcpOptions`]
/// plus the listen backlog. Distinct from [`TcpClientOptions`] because a
/// client has no listener (spec §9 supplemented features).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpServerOptions {
    /// Knobs shared with the client.
    pub base: TcpOptions,
    /// `listen(2)` backlog.
    pub backlog: u32,
}

impl Default for TcpServerOptions {
    fn default() -> Self {
        Self {
            base: TcpOptions::default(),
            backlog: 1024,
        }
    }
}

/// Options for [`crate::tcp::TcpClient::connect`]. Identical to
/// [`TcpServerOptions`] minus the backlog/listener-only knobs (spec §6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpClientOptions {
    /// Knobs shared with the server.
    pub base: TcpOptions,
}

impl Default for TcpClientOptions {
    fn default() -> Self {
        Self {
            base: TcpOptions::default(),
        }
    }
}

/// Options for the HTTP layer (C9), layered on top of [`TcpServerOptions`]/
/// [`TcpClientOptions`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpOptions {
    /// Initial capacity reserved for an assembling packet's body.
    pub initial_body_capacity: usize,
    /// Hard ceiling on a single packet's body size; framing fails the
    /// connection (protocol error, spec §4.8.3) if a `Content-Length` or
    /// accumulated chunked body would exceed it. `0` disables the check.
    pub max_body_size: usize,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            initial_body_capacity: 4096,
            max_body_size: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_count_zero_resolves_to_cpu_count() {
        let opts = TcpOptions {
            worker_count: 0,
            ..TcpOptions::default()
        };
        assert!(opts.resolved_worker_count() >= 1);
    }

    #[test]
    fn worker_count_nonzero_passes_through() {
        let opts = TcpOptions {
            worker_count: 7,
            ..TcpOptions::default()
        };
        assert_eq!(opts.resolved_worker_count(), 7);
    }

    #[test]
    fn round_trips_through_toml() {
        let opts = TcpServerOptions::default();
        let toml_str = toml::to_string(&opts).unwrap();
        let parsed: TcpServerOptions = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.backlog, opts.backlog);
        assert_eq!(parsed.base.worker_count, opts.base.worker_count);
    }
}
