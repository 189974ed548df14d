//! Registry-side view of a client.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chathub_core::{ClientId, Message};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use super::exit::CloseReason;
use super::state::{ClientState, StateCell};

/// Outcome of a non-blocking enqueue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Enqueue {
    Queued,
    Full,
    Closed,
}

/// What the hub holds for each registered client.
///
/// Owns the sending half of the client's outbound queue plus the
/// cancellation token that stops both of its pumps.
pub struct ClientHandle {
    id: ClientId,
    tx: mpsc::Sender<Arc<Message>>,
    state: StateCell,
    stop: CancellationToken,
    close_reason: Mutex<Option<CloseReason>>,
    dropped: AtomicU64,
    sent: AtomicU64,
    connected_at: Instant,
}

impl ClientHandle {
    pub(crate) fn new(
        id: ClientId,
        capacity: usize,
        stop: CancellationToken,
    ) -> (Arc<Self>, mpsc::Receiver<Arc<Message>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Arc::new(Self {
            id,
            tx,
            state: StateCell::new(),
            stop,
            close_reason: Mutex::new(None),
            dropped: AtomicU64::new(0),
            sent: AtomicU64::new(0),
            connected_at: Instant::now(),
        });
        (handle, rx)
    }

    /// Client id.
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ClientState {
        self.state.get()
    }

    /// Whether the client is eligible for broadcast.
    pub fn is_active(&self) -> bool {
        self.state() == ClientState::Active
    }

    /// Messages dropped because the queue was full.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Messages written to the connection.
    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Messages waiting in the outbound queue.
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Time since the handle was created.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Reason recorded by the first close trigger, if any.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason.lock().clone()
    }

    /// Enqueue without waiting.
    pub(crate) fn enqueue(&self, message: Arc<Message>) -> Enqueue {
        match self.tx.try_send(message) {
            Ok(()) => Enqueue::Queued,
            Err(TrySendError::Full(_)) => Enqueue::Full,
            Err(TrySendError::Closed(_)) => Enqueue::Closed,
        }
    }

    /// Count one dropped message and return the running total.
    pub(crate) fn record_drop(&self) -> u64 {
        self.dropped.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn record_sent(&self) {
        let _ = self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn activate(&self) -> bool {
        self.state.activate()
    }

    /// Start teardown: record `reason` if none is set and stop both pumps.
    ///
    /// The state stays `Active` until the hub removes the entry; see
    /// [`ClientHandle::mark_closing`]. Returns `true` if `reason` was the one
    /// recorded.
    pub(crate) fn begin_close(&self, reason: CloseReason) -> bool {
        let recorded = {
            let mut slot = self.close_reason.lock();
            if slot.is_none() {
                *slot = Some(reason);
                true
            } else {
                false
            }
        };
        self.stop.cancel();
        recorded
    }

    /// Move to `Closing`.
    ///
    /// For a registered client the hub calls this while holding the registry
    /// write lock, so an entry in the registry is always `Active`.
    pub(crate) fn mark_closing(&self) {
        let _ = self.state.advance(ClientState::Closing);
    }

    pub(crate) fn finish(&self) {
        let _ = self.state.advance(ClientState::Closed);
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub(crate) async fn stopped(&self) {
        self.stop.cancelled().await;
    }
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("dropped", &self.drop_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn make_handle(capacity: usize) -> (Arc<ClientHandle>, mpsc::Receiver<Arc<Message>>) {
        ClientHandle::new(ClientId::new("c1"), capacity, CancellationToken::new())
    }

    fn msg(text: &str) -> Arc<Message> {
        Arc::new(Message::new(ClientId::new("sender"), text.to_owned()))
    }

    #[test]
    fn new_handle_is_connecting() {
        let (handle, _rx) = make_handle(4);
        assert_eq!(handle.id().as_str(), "c1");
        assert_eq!(handle.state(), ClientState::Connecting);
        assert!(!handle.is_active());
        assert_eq!(handle.drop_count(), 0);
        assert!(handle.close_reason().is_none());
    }

    #[tokio::test]
    async fn enqueue_delivers_shared_message() {
        let (handle, mut rx) = make_handle(4);
        let m = msg("hi");
        assert_eq!(handle.enqueue(Arc::clone(&m)), Enqueue::Queued);
        assert_eq!(handle.queued(), 1);
        let got = rx.recv().await.unwrap();
        assert!(Arc::ptr_eq(&got, &m));
        assert_eq!(handle.queued(), 0);
    }

    #[test]
    fn enqueue_full_then_closed() {
        let (handle, rx) = make_handle(1);
        assert_eq!(handle.enqueue(msg("a")), Enqueue::Queued);
        assert_eq!(handle.enqueue(msg("b")), Enqueue::Full);
        drop(rx);
        assert_eq!(handle.enqueue(msg("c")), Enqueue::Closed);
    }

    #[test]
    fn record_drop_returns_running_total() {
        let (handle, _rx) = make_handle(1);
        assert_eq!(handle.record_drop(), 1);
        assert_eq!(handle.record_drop(), 2);
        assert_eq!(handle.drop_count(), 2);
    }

    #[test]
    fn first_close_reason_wins() {
        let (handle, _rx) = make_handle(1);
        assert!(handle.activate());
        assert!(handle.begin_close(CloseReason::SlowConsumer));
        assert!(!handle.begin_close(CloseReason::HubShutdown));
        assert_matches!(handle.close_reason(), Some(CloseReason::SlowConsumer));
        assert!(handle.is_stopped());
    }

    #[test]
    fn begin_close_leaves_state_to_the_hub() {
        let (handle, _rx) = make_handle(1);
        assert!(handle.activate());
        let _ = handle.begin_close(CloseReason::RemoteClosed);
        assert_eq!(handle.state(), ClientState::Active);
        handle.mark_closing();
        assert_eq!(handle.state(), ClientState::Closing);
    }

    #[test]
    fn finish_moves_to_closed() {
        let (handle, _rx) = make_handle(1);
        let _ = handle.begin_close(CloseReason::RemoteClosed);
        handle.mark_closing();
        handle.finish();
        assert_eq!(handle.state(), ClientState::Closed);
        assert!(!handle.activate());
    }

    #[tokio::test]
    async fn stopped_resolves_after_parent_cancel() {
        let parent = CancellationToken::new();
        let (handle, _rx) = ClientHandle::new(ClientId::new("c2"), 1, parent.child_token());
        parent.cancel();
        handle.stopped().await;
        assert!(handle.is_stopped());
    }
}
