//! Error types for mysqlwire-replication.
//!
//! All errors in this crate are represented by [`ReplicationError`], which covers:
//! - Transport errors (network I/O, packet sequence mismatch, idle timeout)
//! - Protocol errors (malformed packets or binlog events)
//! - Server errors (MySQL ERR packets outside the binlog stream)
//! - Authentication errors (wrong password, unsupported plugin)
//! - Configuration errors (bad buffer numbering, wrong default frequency)
//! - Play errors (the destination rejected a change event)
//! - Shutdown errors (checkpoint could not be persisted)
//! - Task errors (a stage vanished or one of its channels closed)

use thiserror::Error;

/// Error type for all mysqlwire-replication operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReplicationError {
    /// Transport error (network, sequence mismatch, idle timeout).
    ///
    /// Note: `std::io::Error` is not `Clone`, so we store the message.
    #[error("transport error: {0}")]
    Transport(String),

    /// Protocol error - malformed packet or binlog event.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Server error - MySQL returned an ERR packet.
    #[error("server error {code}: {message}")]
    Server { code: u16, message: String },

    /// Authentication error - wrong credentials or unsupported plugin.
    #[error("authentication error: {0}")]
    Auth(String),

    /// Configuration error - invalid buffer layout or filter rules.
    #[error("configuration error: {0}")]
    Config(String),

    /// Play error - the destination failed to apply an event.
    #[error("play error on buffer {buffer}: {message}")]
    Play { buffer: usize, message: String },

    /// Shutdown error - the resume checkpoint could not be persisted.
    #[error("shutdown error: {0}")]
    Shutdown(String),

    /// Task error - a stage terminated unexpectedly or its channel closed.
    #[error("task error: {0}")]
    Task(String),

    /// Internal error - bug in the library.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ReplicationError {
    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        ReplicationError::Protocol(msg.into())
    }

    /// Returns `true` if this is a transport error.
    #[inline]
    pub fn is_transport(&self) -> bool {
        matches!(self, ReplicationError::Transport(_))
    }

    /// Returns `true` if this is a protocol error.
    #[inline]
    pub fn is_protocol(&self) -> bool {
        matches!(self, ReplicationError::Protocol(_))
    }

    /// Returns `true` if this is an authentication error.
    #[inline]
    pub fn is_auth(&self) -> bool {
        matches!(self, ReplicationError::Auth(_))
    }

    /// Returns `true` if this is a configuration error.
    #[inline]
    pub fn is_config(&self) -> bool {
        matches!(self, ReplicationError::Config(_))
    }

    /// Returns `true` if this is a play error.
    #[inline]
    pub fn is_play(&self) -> bool {
        matches!(self, ReplicationError::Play { .. })
    }

    /// Returns `true` if this error is likely transient and retryable.
    ///
    /// Transport and task errors can be cured by reconnecting. Everything else
    /// (auth, config, protocol, play) needs a human or a code change.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ReplicationError::Transport(_) | ReplicationError::Task(_)
        )
    }
}

// Manual From impl since io::Error isn't Clone
impl From<std::io::Error> for ReplicationError {
    fn from(err: std::io::Error) -> Self {
        ReplicationError::Transport(err.to_string())
    }
}

/// Result type alias for mysqlwire-replication operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;
