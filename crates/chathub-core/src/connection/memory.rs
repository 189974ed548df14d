//! In-process connection pair.
//!
//! [`pair`] returns the local [`MemoryConnection`] (given to a client) and the
//! remote [`MemoryPeer`] (held by a test or an in-process embedder). The
//! outbound channel is bounded, so a peer that stops reading behaves like a
//! stalled network socket.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use super::Connection;
use crate::errors::ConnectionError;

type InboundItem = Result<Bytes, ConnectionError>;

struct Shared {
    closed: CancellationToken,
    fail_writes: AtomicBool,
    close_calls: AtomicUsize,
}

/// Local half of an in-memory connection.
pub struct MemoryConnection {
    inbound: Mutex<mpsc::Receiver<InboundItem>>,
    outbound: mpsc::Sender<Bytes>,
    shared: Arc<Shared>,
}

/// Remote half of an in-memory connection.
pub struct MemoryPeer {
    inbound: Option<mpsc::Sender<InboundItem>>,
    outbound: mpsc::Receiver<Bytes>,
    shared: Arc<Shared>,
}

/// Create a connected pair. `capacity` bounds each direction.
pub fn pair(capacity: usize) -> (MemoryConnection, MemoryPeer) {
    let (in_tx, in_rx) = mpsc::channel(capacity.max(1));
    let (out_tx, out_rx) = mpsc::channel(capacity.max(1));
    let shared = Arc::new(Shared {
        closed: CancellationToken::new(),
        fail_writes: AtomicBool::new(false),
        close_calls: AtomicUsize::new(0),
    });
    (
        MemoryConnection {
            inbound: Mutex::new(in_rx),
            outbound: out_tx,
            shared: Arc::clone(&shared),
        },
        MemoryPeer {
            inbound: Some(in_tx),
            outbound: out_rx,
            shared,
        },
    )
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn send(&self, frame: Bytes) -> Result<(), ConnectionError> {
        if self.shared.closed.is_cancelled() {
            return Err(ConnectionError::Closed);
        }
        if self.shared.fail_writes.load(Ordering::Relaxed) {
            return Err(ConnectionError::Transport("injected write failure".into()));
        }
        tokio::select! {
            biased;
            () = self.shared.closed.cancelled() => Err(ConnectionError::Closed),
            res = self.outbound.send(frame) => res.map_err(|_| ConnectionError::Closed),
        }
    }

    async fn receive(&self) -> Result<Bytes, ConnectionError> {
        let mut rx = self.inbound.lock().await;
        tokio::select! {
            biased;
            () = self.shared.closed.cancelled() => Err(ConnectionError::Closed),
            item = rx.recv() => item.unwrap_or(Err(ConnectionError::Closed)),
        }
    }

    async fn close(&self) -> Result<(), ConnectionError> {
        let _ = self.shared.close_calls.fetch_add(1, Ordering::Relaxed);
        self.shared.closed.cancel();
        Ok(())
    }
}

impl MemoryPeer {
    /// Deliver one inbound frame to the local side.
    ///
    /// Returns `false` once the local side is gone or the peer hung up.
    pub async fn send_frame(&self, frame: impl Into<Bytes>) -> bool {
        match &self.inbound {
            Some(tx) => tx.send(Ok(frame.into())).await.is_ok(),
            None => false,
        }
    }

    /// Make the local side's next read fail with `err`.
    pub async fn fail_read(&self, err: ConnectionError) -> bool {
        match &self.inbound {
            Some(tx) => tx.send(Err(err)).await.is_ok(),
            None => false,
        }
    }

    /// Make every subsequent local write fail.
    pub fn fail_writes(&self) {
        self.shared.fail_writes.store(true, Ordering::Relaxed);
    }

    /// Close the remote side cleanly. Pending inbound frames are still read
    /// before the local side observes the close.
    pub fn hang_up(&mut self) {
        self.inbound = None;
    }

    /// Wait for the next frame written by the local side.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.outbound.recv().await
    }

    /// Take a written frame if one is ready.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.outbound.try_recv().ok()
    }

    /// Whether the local side called `close`.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    /// How many times the local side called `close`.
    pub fn close_count(&self) -> usize {
        self.shared.close_calls.load(Ordering::Relaxed)
    }
}
