//! The duplex capability a transport hands to the hub.
//!
//! The core only ever sees this trait. Framing, handshakes and sockets live
//! in the transport that implements it.

pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::ConnectionError;

/// A framed, bidirectional connection to one remote peer.
///
/// Methods take `&self` so the inbound and outbound pumps of one client can
/// drive the same connection concurrently. Implementations serialize access
/// to each direction internally.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Write one frame. Any error is terminal for the client.
    async fn send(&self, frame: Bytes) -> Result<(), ConnectionError>;

    /// Read the next frame.
    ///
    /// Returns [`ConnectionError::Closed`] on an orderly close. Any error is
    /// terminal for the client.
    async fn receive(&self) -> Result<Bytes, ConnectionError>;

    /// Release the connection. Calling it more than once is harmless.
    async fn close(&self) -> Result<(), ConnectionError>;
}
