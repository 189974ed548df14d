//! Connection and protocol errors.
//!
//! Every variant is local to one client: the client that hits it tears down,
//! the hub and the other clients carry on.

use std::time::Duration;

use thiserror::Error;

/// Failure or clean close on a single connection.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConnectionError {
    /// The peer closed the connection cleanly (or it was closed locally).
    #[error("connection closed")]
    Closed,

    /// Read or write failed in the underlying transport.
    #[error("transport error: {0}")]
    Transport(String),

    /// No inbound frame arrived within the idle window.
    #[error("no frame received within {0:?}")]
    IdleTimeout(Duration),

    /// The peer sent data the core refuses to accept.
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),
}

impl ConnectionError {
    /// Build a transport error from any displayable error.
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    /// Whether this is an orderly close rather than a failure.
    pub fn is_clean_close(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Malformed inbound data.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame exceeds the configured maximum message size.
    #[error("frame of {size} bytes exceeds limit of {max} bytes")]
    FrameTooLarge {
        /// Size of the offending frame.
        size: usize,
        /// Configured limit.
        max: usize,
    },
}
