//! Axum WebSocket adapter.

use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use bytes::Bytes;
use chathub_core::{Connection, ConnectionError, ProtocolError};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::error::{CapacityError, Error as TungsteniteError};
use tracing::trace;

/// A [`Connection`] over an upgraded Axum WebSocket.
///
/// Text and binary frames both become payloads. Outbound payloads go out
/// as text when they are valid UTF-8 and as binary otherwise. Ping and
/// pong are handled by the socket and never surface as payloads. A frame
/// over the upgrade's size limit is reported as
/// [`ProtocolError::FrameTooLarge`].
pub struct WsConnection {
    sink: Mutex<SplitSink<WebSocket, WsMessage>>,
    stream: Mutex<SplitStream<WebSocket>>,
}

impl WsConnection {
    /// Wrap an upgraded socket.
    pub fn new(socket: WebSocket) -> Self {
        let (sink, stream) = socket.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }
    }
}

fn outbound_frame(payload: Bytes) -> WsMessage {
    match String::from_utf8(payload.to_vec()) {
        Ok(text) => WsMessage::Text(text.into()),
        Err(_) => WsMessage::Binary(payload),
    }
}

fn inbound_error(err: axum::Error) -> ConnectionError {
    match err.into_inner().downcast::<TungsteniteError>() {
        Ok(err) => match *err {
            TungsteniteError::Capacity(CapacityError::MessageTooLong { size, max_size }) => {
                ProtocolError::FrameTooLarge {
                    size,
                    max: max_size,
                }
                .into()
            }
            other => ConnectionError::transport(other),
        },
        Err(other) => ConnectionError::transport(other),
    }
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&self, frame: Bytes) -> Result<(), ConnectionError> {
        self.sink
            .lock()
            .await
            .send(outbound_frame(frame))
            .await
            .map_err(ConnectionError::transport)
    }

    async fn receive(&self) -> Result<Bytes, ConnectionError> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(WsMessage::Text(text))) => return Ok(Bytes::from(text.to_string())),
                Some(Ok(WsMessage::Binary(data))) => return Ok(data),
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {
                    trace!("control frame");
                }
                Some(Ok(WsMessage::Close(_))) | None => return Err(ConnectionError::Closed),
                Some(Err(err)) => return Err(inbound_error(err)),
            }
        }
    }

    async fn close(&self) -> Result<(), ConnectionError> {
        self.sink
            .lock()
            .await
            .close()
            .await
            .map_err(ConnectionError::transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn utf8_payload_goes_out_as_text() {
        assert_matches!(
            outbound_frame(Bytes::from_static(b"hello")),
            WsMessage::Text(t) if t.as_str() == "hello"
        );
    }

    #[test]
    fn oversize_message_is_a_protocol_violation() {
        let err = axum::Error::new(TungsteniteError::Capacity(CapacityError::MessageTooLong {
            size: 10,
            max_size: 4,
        }));
        assert_matches!(
            inbound_error(err),
            ConnectionError::Protocol(ProtocolError::FrameTooLarge { size: 10, max: 4 })
        );
    }

    #[test]
    fn other_stream_errors_are_transport_errors() {
        let err = axum::Error::new(TungsteniteError::ConnectionClosed);
        assert_matches!(inbound_error(err), ConnectionError::Transport(_));
    }

    #[test]
    fn non_utf8_payload_goes_out_as_binary() {
        let raw = Bytes::from_static(&[0xff, 0xfe, 0x00]);
        assert_matches!(
            outbound_frame(raw.clone()),
            WsMessage::Binary(b) if b == raw
        );
    }
}
