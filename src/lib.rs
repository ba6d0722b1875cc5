//! A sharded, multi-threaded, non-blocking TCP reactor with an HTTP/1.x
//! framing layer on top.
//!
//! Each shard owns a poller (epoll/kqueue via [`mio`]), a worker thread, and
//! a connection table; a connection is pinned to one shard for its whole
//! lifetime, chosen by `connection_id mod shard_count`. Cross-thread
//! operations (`send`, `mark_closed`) go through a [`tcp::ConnectionHandle`]
//! that appends to a shared send queue and wakes the owning shard via a
//! [`mio::Waker`]-backed interrupter rather than crossing threads for every
//! byte.
//!
//! Grounded throughout on `cnetpp::tcp` (reactor/connection/ring-buffer) and
//! `cnetpp::http` (packet model, framing, connection map) — see DESIGN.md
//! for the per-module ledger.
//!
//! ```no_run
//! use std::net::SocketAddr;
//! use std::sync::Arc;
//!
//! use reactor_engine::config::TcpServerOptions;
//! use reactor_engine::connection::Callbacks;
//! use reactor_engine::reactor::EventCenter;
//! use reactor_engine::tcp::TcpServer;
//!
//! let center = Arc::new(EventCenter::launch(4, 1024, 4096)?);
//! let addr: SocketAddr = "127.0.0.1:8545".parse().unwrap();
//! let server = TcpServer::launch(center, addr, TcpServerOptions::default(), Callbacks::default())?;
//! println!("listening on {}", server.local_endpoint());
//! # Ok::<(), reactor_engine::error::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]
#![allow(clippy::type_complexity)]

pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod http;
pub mod interrupter;
pub mod metrics;
pub mod poller;
pub mod reactor;
pub mod ring_buffer;
pub mod shard;
pub mod tcp;

pub use connection::ConnectionId;
pub use error::{Error, Result};
pub use reactor::EventCenter;
