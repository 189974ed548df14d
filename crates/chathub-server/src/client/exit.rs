//! Why and how a client session ended.

use std::fmt;
use std::time::Duration;

use chathub_core::{ClientId, ConnectionError, ProtocolError};

use crate::errors::HubError;

/// What ended a client session. The first trigger wins.
#[derive(Clone, Debug, PartialEq)]
pub enum CloseReason {
    /// The peer closed the connection in an orderly way.
    RemoteClosed,
    /// Reading from the connection failed.
    ReadFailed(ConnectionError),
    /// The peer sent something the hub refuses.
    ProtocolViolation(ProtocolError),
    /// Writing to the connection failed.
    WriteFailed(ConnectionError),
    /// Removed from the registry by an explicit unregister.
    Unregistered,
    /// Removed because its outbound queue overflowed under the disconnect policy.
    SlowConsumer,
    /// The hub shut down.
    HubShutdown,
    /// Registration was refused.
    Rejected(HubError),
}

impl CloseReason {
    /// Short label for logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RemoteClosed => "remote_closed",
            Self::ReadFailed(_) => "read_failed",
            Self::ProtocolViolation(_) => "protocol_violation",
            Self::WriteFailed(_) => "write_failed",
            Self::Unregistered => "unregistered",
            Self::SlowConsumer => "slow_consumer",
            Self::HubShutdown => "hub_shutdown",
            Self::Rejected(_) => "rejected",
        }
    }

    /// Whether the session ended without a fault on either side.
    pub fn is_clean(&self) -> bool {
        matches!(
            self,
            Self::RemoteClosed | Self::Unregistered | Self::HubShutdown
        )
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFailed(e) => write!(f, "read failed: {e}"),
            Self::ProtocolViolation(e) => write!(f, "protocol violation: {e}"),
            Self::WriteFailed(e) => write!(f, "write failed: {e}"),
            Self::Rejected(e) => write!(f, "rejected: {e}"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Summary returned by [`Client::run`](super::Client::run).
#[derive(Clone, Debug)]
pub struct ClientExit {
    /// Client id.
    pub id: ClientId,
    /// What ended the session.
    pub reason: CloseReason,
    /// Frames read from the peer and broadcast.
    pub messages_received: u64,
    /// Messages written to the peer.
    pub messages_sent: u64,
    /// Messages dropped because this client's queue was full.
    pub messages_dropped: u64,
    /// Time from `run` to teardown completion.
    pub duration: Duration,
}
