//! Error types for the reactor engine.

/// Result type alias for reactor engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Structured error type for reactor engine operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O operation errors (socket creation, bind, listen, connect).
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Reactor/poller/shard setup or runtime errors.
    #[error("reactor error: {message}")]
    Reactor {
        /// Descriptive error message.
        message: String,
    },

    /// Networking errors not covered by a raw `io::Error` (e.g. invalid
    /// connection id, listener already shut down).
    #[error("network error: {message}")]
    Network {
        /// Descriptive error message.
        message: String,
    },

    /// HTTP framing errors: malformed start line, unknown method or
    /// version, unparseable chunk size.
    #[error("protocol error: {message}")]
    Protocol {
        /// Descriptive error message.
        message: String,
    },

    /// Configuration errors (invalid option values, malformed TOML).
    #[error("configuration error: {message}")]
    Config {
        /// Descriptive error message.
        message: String,
    },

    /// Concurrency errors (mailbox poisoned, send-queue lock poisoned).
    #[error("concurrency error: {message}")]
    Concurrency {
        /// Descriptive error message.
        message: String,
    },
}

impl Error {
    /// Construct a reactor error.
    pub fn reactor<S: Into<String>>(message: S) -> Self {
        Self::Reactor {
            message: message.into(),
        }
    }

    /// Construct a network error.
    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Construct a protocol error.
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Construct a configuration error.
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Construct a concurrency error.
    pub fn concurrency<S: Into<String>>(message: S) -> Self {
        Self::Concurrency {
            message: message.into(),
        }
    }

    /// Whether retrying the operation that produced this error could
    /// plausibly succeed. Transient I/O (`EAGAIN`/`EINTR`) never reaches
    /// this type since the poller and connection layers handle those
    /// inline, so every `Io` variant here is already fatal.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Concurrency { .. })
    }

    /// Coarse category, useful for metrics labels and log fields.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Io { .. } => "io",
            Self::Reactor { .. } => "reactor",
            Self::Network { .. } => "network",
            Self::Protocol { .. } => "protocol",
            Self::Config { .. } => "config",
            Self::Concurrency { .. } => "concurrency",
        }
    }
}
