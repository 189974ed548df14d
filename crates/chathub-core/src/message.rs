//! Immutable chat message.

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::ids::ClientId;

/// One message produced by a client's inbound pump.
///
/// Fields are private so a message cannot change after it is handed to the
/// hub. The payload is opaque: the core never inspects or rewrites it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    sender: ClientId,
    payload: Bytes,
    created_at: DateTime<Utc>,
}

impl Message {
    /// Create a message stamped with the current time.
    pub fn new(sender: ClientId, payload: impl Into<Bytes>) -> Self {
        Self::with_timestamp(sender, payload, Utc::now())
    }

    /// Create a message with an explicit creation time.
    pub fn with_timestamp(
        sender: ClientId,
        payload: impl Into<Bytes>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            sender,
            payload: payload.into(),
            created_at,
        }
    }

    /// Identity of the client that produced this message.
    pub fn sender(&self) -> &ClientId {
        &self.sender
    }

    /// Payload bytes. Cloning the returned `Bytes` is a refcount bump.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// When the message was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
