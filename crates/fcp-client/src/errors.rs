//! Engine error taxonomy.
//!
//! Operation-level failures travel through a job ticket's result channel and
//! may be observed by a blocking waiter, a poller, and a status observer
//! alike, so the type is `Clone`; non-clonable sources sit behind `Arc`.

use std::io;
use std::sync::Arc;

use thiserror::Error;

use fcp_wire::WireError;

/// Errors surfaced by the engine and its job tickets.
#[derive(Debug, Clone, Error)]
pub enum FcpError {
    /// The transport-level connect failed.
    #[error("failed to connect to FCP port {endpoint}: {source}")]
    ConnectionRefused {
        endpoint: String,
        #[source]
        source: Arc<io::Error>,
    },

    /// The handshake reply was not the expected acknowledgment.
    #[error("handshake failed: expected NodeHello, got {header}")]
    Handshake { header: String },

    /// A frame could not be encoded or decoded. Fatal to the coordinator.
    #[error("wire fault: {0}")]
    Wire(#[from] Arc<WireError>),

    /// Socket IO failed outside of frame decoding.
    #[error("IO error on FCP connection: {0}")]
    Io(Arc<io::Error>),

    /// The daemon closed the connection.
    #[error("FCP connection closed by the daemon")]
    Disconnected,

    /// The engine rejected a command before queueing it.
    #[error("invalid command: {reason}")]
    InvalidCommand { reason: String },

    /// The daemon reported a malformed or unserviceable request.
    #[error("protocol error from daemon: {reason}")]
    Protocol { code: Option<i64>, reason: String },

    /// A fetch reached a terminal failure.
    #[error("fetch failed: {reason}")]
    FetchFailed { code: Option<i64>, reason: String },

    /// An insert reached a terminal failure.
    #[error("insert failed: {reason}")]
    InsertFailed { code: Option<i64>, reason: String },

    /// The daemon rejected a duplicate request identifier.
    #[error("duplicate request identifier {identifier}")]
    IdentifierCollision { identifier: String },

    /// The command was still queued, unsent, when the wait deadline passed.
    #[error("command {command} took too long to be sent to the daemon")]
    SendTimeout { command: String },

    /// The command was sent but no terminal reply arrived in time.
    #[error("command {command} took too long for a daemon response")]
    NodeTimeout { command: String },

    /// The coordinator loop has terminated; the engine must be reopened.
    #[error("engine not running")]
    NotRunning,

    /// The daemon sent a header this engine does not recognise.
    #[error("unrecognised message header from daemon: {header}")]
    Unexpected { header: String },

    /// Invariant breakage inside the engine (e.g. a missing result slot).
    #[error("internal engine error: {message}")]
    Internal { message: String },
}

impl FcpError {
    /// Wraps a transport-level connect failure.
    pub fn connection_refused(endpoint: impl Into<String>, source: io::Error) -> Self {
        Self::ConnectionRefused {
            endpoint: endpoint.into(),
            source: Arc::new(source),
        }
    }

    /// Wraps a non-framing IO failure.
    pub fn io(source: io::Error) -> Self {
        Self::Io(Arc::new(source))
    }

    /// Creates a daemon-reported protocol error from its reason fields.
    pub fn protocol(code: Option<i64>, reason: impl Into<String>) -> Self {
        Self::Protocol {
            code,
            reason: reason.into(),
        }
    }

    /// Creates a local rejection for a command that never reached the queue.
    pub fn invalid_command(reason: impl Into<String>) -> Self {
        Self::InvalidCommand {
            reason: reason.into(),
        }
    }

    /// Creates an internal invariant error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True when the error means the engine itself is dead, as opposed to a
    /// single operation having failed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Wire(_) | Self::Io(_) | Self::Disconnected | Self::NotRunning
        )
    }
}

impl From<WireError> for FcpError {
    fn from(error: WireError) -> Self {
        Self::Wire(Arc::new(error))
    }
}
