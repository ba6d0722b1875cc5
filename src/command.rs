//! Commands posted to a shard's mailbox.
//!
//! Grounded on `cnetpp::tcp::Command`: a bitmask of desired actions paired
//! with the connection they apply to.

use bitflags::bitflags;

use crate::ConnectionId;

bitflags! {
    /// What a [`Command`] asks the owning shard to do. Several bits may be
    /// set at once, e.g. a client connect in progress posts
    /// `ADD_CONNECTING | WRITABLE` so the writable event drives the
    /// Connecting→Connected transition.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CommandKind: u8 {
        /// Adopt the connection in the Connecting state.
        const ADD_CONNECTING = 0b0000_0001;
        /// Adopt the connection in the Connected state.
        const ADD_CONNECTED  = 0b0000_0010;
        /// Drain the send queue, then close.
        const REMOVE_SOFT    = 0b0000_0100;
        /// Close immediately, discarding any queued sends.
        const REMOVE_HARD    = 0b0000_1000;
        /// Register/refresh read interest.
        const READABLE       = 0b0001_0000;
        /// Register/refresh write interest.
        const WRITABLE       = 0b0010_0000;
    }
}

/// A command submitted to a specific shard's mailbox.
#[derive(Debug, Clone, Copy)]
pub struct Command {
    /// The connection this command applies to.
    pub connection_id: ConnectionId,
    /// The requested action(s).
    pub kind: CommandKind,
}

impl Command {
    /// Build a new command for `connection_id`.
    pub fn new(connection_id: ConnectionId, kind: CommandKind) -> Self {
        Self {
            connection_id,
            kind,
        }
    }
}
