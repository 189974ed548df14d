//! One connected participant: registration, read and write pumps, teardown.
//!
//! [`Client::run`] drives a client from `Connecting` through `Closed`:
//!
//! 1. registers with the hub (refusal closes the connection immediately)
//! 2. spawns the write pump, which drains the outbound queue into the
//!    connection
//! 3. runs the read pump inline, broadcasting every inbound frame
//! 4. on any close trigger, unregisters, lets the write pump flush for at
//!    most the configured flush timeout, then closes the connection, again
//!    bounded by the flush timeout
//!
//! A failure on this client's connection only ever tears down this client.

mod exit;
mod handle;
mod state;

pub use exit::{ClientExit, CloseReason};
pub use handle::ClientHandle;
pub(crate) use handle::Enqueue;
pub use state::ClientState;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chathub_core::{ClientId, Connection, ConnectionError, Message, ProtocolError};
use metrics::histogram;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, trace, warn};

use crate::hub::Hub;
use crate::metrics::CLIENT_SESSION_DURATION_SECONDS;

/// Extra time the write pump gets beyond its own flush bound before it is
/// aborted.
const WRITER_GRACE: Duration = Duration::from_millis(250);

/// A participant bound to one [`Connection`].
pub struct Client<C: Connection> {
    handle: Arc<ClientHandle>,
    connection: Arc<C>,
    outbound: mpsc::Receiver<Arc<Message>>,
    hub: Arc<Hub>,
}

impl<C: Connection> Client<C> {
    /// Create a `Connecting` client with an outbound queue sized by the hub.
    pub fn new(id: ClientId, connection: C, hub: Arc<Hub>) -> Self {
        let (handle, outbound) = hub.new_handle(id);
        Self {
            handle,
            connection: Arc::new(connection),
            outbound,
            hub,
        }
    }

    /// Client id.
    pub fn id(&self) -> &ClientId {
        self.handle.id()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ClientState {
        self.handle.state()
    }

    /// Registry entry shared with the hub.
    pub fn handle(&self) -> &Arc<ClientHandle> {
        &self.handle
    }

    /// Run the client until it closes and report why.
    ///
    /// Registers with the hub first unless already registered via
    /// [`Hub::register`].
    pub async fn run(self) -> ClientExit {
        let span = info_span!("client", client_id = %self.handle.id());
        self.drive().instrument(span).await
    }

    async fn drive(self) -> ClientExit {
        let Self {
            handle,
            connection,
            outbound,
            hub,
        } = self;
        let _task = hub.track_task();
        let flush_timeout = hub.config().flush_timeout;

        if handle.state() == ClientState::Connecting {
            if let Err(err) = hub.register_handle(&handle).await {
                warn!(error = %err, "registration rejected");
                let _ = handle.begin_close(CloseReason::Rejected(err));
                handle.mark_closing();
                close_connection(connection.as_ref(), flush_timeout).await;
                handle.finish();
                return summarize(&handle, 0);
            }
        }
        info!("client connected");

        let writer = hub.spawn_tracked(
            write_pump(
                Arc::clone(&handle),
                Arc::clone(&connection),
                outbound,
                flush_timeout,
            )
            .in_current_span(),
        );
        let received = read_pump(&handle, connection.as_ref(), &hub).await;

        let fallback = if hub.is_shutting_down() {
            CloseReason::HubShutdown
        } else {
            CloseReason::Unregistered
        };
        let _ = handle.begin_close(fallback.clone());
        let reason = handle.close_reason().unwrap_or(fallback);
        let _ = hub.release(&handle, reason).await;
        handle.mark_closing();

        wait_for_writer(writer, flush_timeout + WRITER_GRACE).await;
        close_connection(connection.as_ref(), flush_timeout).await;
        handle.finish();

        let exit = summarize(&handle, received);
        histogram!(CLIENT_SESSION_DURATION_SECONDS).record(exit.duration.as_secs_f64());
        if exit.reason.is_clean() {
            info!(
                reason = %exit.reason,
                received = exit.messages_received,
                sent = exit.messages_sent,
                dropped = exit.messages_dropped,
                "client disconnected"
            );
        } else {
            warn!(
                reason = %exit.reason,
                received = exit.messages_received,
                sent = exit.messages_sent,
                dropped = exit.messages_dropped,
                "client disconnected"
            );
        }
        exit
    }
}

fn summarize(handle: &ClientHandle, received: u64) -> ClientExit {
    ClientExit {
        id: handle.id().clone(),
        reason: handle
            .close_reason()
            .unwrap_or(CloseReason::Unregistered),
        messages_received: received,
        messages_sent: handle.sent_count(),
        messages_dropped: handle.drop_count(),
        duration: handle.age(),
    }
}

async fn close_connection<C: Connection>(connection: &C, limit: Duration) {
    match tokio::time::timeout(limit, connection.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => debug!(error = %err, "error while closing connection"),
        Err(_) => warn!("connection close did not finish in {limit:?}, abandoning it"),
    }
}

async fn wait_for_writer(mut writer: JoinHandle<()>, limit: Duration) {
    match tokio::time::timeout(limit, &mut writer).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(error = %err, "write pump failed"),
        Err(_) => {
            warn!("write pump did not finish in {limit:?}, aborting");
            writer.abort();
        }
    }
}

async fn read_frame<C: Connection>(
    connection: &C,
    idle: Option<Duration>,
) -> Result<Bytes, ConnectionError> {
    match idle {
        Some(limit) => tokio::time::timeout(limit, connection.receive())
            .await
            .unwrap_or_else(|_| Err(ConnectionError::IdleTimeout(limit))),
        None => connection.receive().await,
    }
}

/// Read frames and broadcast them until the peer goes away, a frame is
/// rejected, or the client is stopped. Returns the number of frames
/// broadcast.
async fn read_pump<C: Connection>(handle: &ClientHandle, connection: &C, hub: &Hub) -> u64 {
    let max = hub.config().max_message_size;
    let idle = hub.config().read_idle_timeout;
    let mut received = 0u64;
    loop {
        let next = tokio::select! {
            biased;
            () = handle.stopped() => break,
            next = read_frame(connection, idle) => next,
        };
        match next {
            Ok(frame) if frame.len() > max => {
                let err = ProtocolError::FrameTooLarge {
                    size: frame.len(),
                    max,
                };
                warn!(error = %err, "rejecting inbound frame");
                let _ = handle.begin_close(CloseReason::ProtocolViolation(err));
                break;
            }
            Ok(frame) => {
                received += 1;
                let report = hub
                    .broadcast(Message::new(handle.id().clone(), frame))
                    .await;
                trace!(
                    recipients = report.recipients,
                    delivered = report.delivered,
                    "frame broadcast"
                );
            }
            Err(ConnectionError::Closed) => {
                debug!("peer closed connection");
                let _ = handle.begin_close(CloseReason::RemoteClosed);
                break;
            }
            Err(ConnectionError::Protocol(err)) => {
                warn!(error = %err, "protocol violation");
                let _ = handle.begin_close(CloseReason::ProtocolViolation(err));
                break;
            }
            Err(err) => {
                debug!(error = %err, "read failed");
                let _ = handle.begin_close(CloseReason::ReadFailed(err));
                break;
            }
        }
    }
    received
}

/// Write queued messages until stopped, then flush what is already queued
/// within `flush_timeout`.
async fn write_pump<C: Connection>(
    handle: Arc<ClientHandle>,
    connection: Arc<C>,
    mut queue: mpsc::Receiver<Arc<Message>>,
    flush_timeout: Duration,
) {
    loop {
        let next = tokio::select! {
            biased;
            () = handle.stopped() => break,
            next = queue.recv() => next,
        };
        let Some(message) = next else { break };
        if let Err(err) = connection.send(message.payload().clone()).await {
            debug!(error = %err, "write failed");
            let _ = handle.begin_close(CloseReason::WriteFailed(err));
            return;
        }
        handle.record_sent();
    }

    queue.close();
    if queue.is_empty() {
        return;
    }
    let flushed = tokio::time::timeout(flush_timeout, async {
        while let Some(message) = queue.recv().await {
            if connection.send(message.payload().clone()).await.is_err() {
                break;
            }
            handle.record_sent();
        }
    })
    .await;
    if flushed.is_err() {
        warn!(
            pending = queue.len(),
            "flush timed out, dropping queued messages"
        );
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chathub_core::connection::memory::{MemoryPeer, pair};

    use super::*;
    use crate::config::{HubConfig, OverflowPolicy};
    use crate::errors::HubError;

    fn hub(config: HubConfig) -> Arc<Hub> {
        Arc::new(Hub::new(HubConfig {
            flush_timeout: Duration::from_millis(200),
            shutdown_timeout: Duration::from_secs(2),
            ..config
        }))
    }

    fn spawn_client(hub: &Arc<Hub>, id: &str) -> (JoinHandle<ClientExit>, MemoryPeer) {
        let (conn, peer) = pair(16);
        let client = Client::new(ClientId::new(id), conn, Arc::clone(hub));
        (tokio::spawn(client.run()), peer)
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..400 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn relays_frames_to_other_clients() {
        let hub = hub(HubConfig::default());
        let (a, mut pa) = spawn_client(&hub, "a");
        let (b, mut pb) = spawn_client(&hub, "b");
        wait_until(|| hub.client_count() == 2).await;

        assert!(pa.send_frame("hello").await);
        assert_eq!(pb.recv().await.unwrap().as_ref(), b"hello");
        assert!(pa.try_recv().is_none());

        pa.hang_up();
        pb.hang_up();
        let exit_a = a.await.unwrap();
        let exit_b = b.await.unwrap();
        assert_eq!(exit_a.reason, CloseReason::RemoteClosed);
        assert_eq!(exit_a.messages_received, 1);
        assert_eq!(exit_b.messages_sent, 1);
        assert!(pa.is_closed());
        assert_eq!(hub.client_count(), 0);
    }

    #[tokio::test]
    async fn oversized_frame_closes_only_that_client() {
        let hub = hub(HubConfig {
            max_message_size: 4,
            ..HubConfig::default()
        });
        let (a, pa) = spawn_client(&hub, "a");
        let (_b, mut pb) = spawn_client(&hub, "b");
        wait_until(|| hub.client_count() == 2).await;

        assert!(pa.send_frame("too long").await);
        let exit = a.await.unwrap();
        assert_matches!(
            exit.reason,
            CloseReason::ProtocolViolation(ProtocolError::FrameTooLarge { size: 8, max: 4 })
        );
        assert!(pa.is_closed());
        assert_eq!(hub.client_count(), 1);
        assert!(pb.try_recv().is_none());
    }

    #[tokio::test]
    async fn read_failure_tears_down_client() {
        let hub = hub(HubConfig::default());
        let (a, pa) = spawn_client(&hub, "a");
        wait_until(|| hub.client_count() == 1).await;

        assert!(pa.fail_read(ConnectionError::transport("reset")).await);
        let exit = a.await.unwrap();
        assert_matches!(exit.reason, CloseReason::ReadFailed(ConnectionError::Transport(_)));
        assert_eq!(pa.close_count(), 1);
        assert_eq!(hub.client_count(), 0);
    }

    #[tokio::test]
    async fn write_failure_tears_down_client() {
        let hub = hub(HubConfig::default());
        let (a, mut pa) = spawn_client(&hub, "a");
        let (b, pb) = spawn_client(&hub, "b");
        wait_until(|| hub.client_count() == 2).await;
        let hb = hub.client(&ClientId::new("b")).await.unwrap();

        pb.fail_writes();
        assert!(pa.send_frame("x").await);
        let exit = b.await.unwrap();
        assert_matches!(exit.reason, CloseReason::WriteFailed(_));
        assert_eq!(exit.messages_sent, 0);
        assert_eq!(hb.state(), ClientState::Closed);
        assert!(pb.is_closed());
        assert!(!hub.contains(&ClientId::new("b")).await);
        assert!(hub.contains(&ClientId::new("a")).await);

        pa.hang_up();
        assert_eq!(a.await.unwrap().reason, CloseReason::RemoteClosed);
    }

    /// Never completes any operation, like a peer that stopped reading.
    struct StalledConnection;

    #[async_trait::async_trait]
    impl Connection for StalledConnection {
        async fn send(&self, _frame: Bytes) -> Result<(), ConnectionError> {
            std::future::pending().await
        }

        async fn receive(&self) -> Result<Bytes, ConnectionError> {
            std::future::pending().await
        }

        async fn close(&self) -> Result<(), ConnectionError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_close_does_not_outlive_shutdown() {
        let hub = Arc::new(Hub::new(HubConfig {
            flush_timeout: Duration::from_millis(100),
            shutdown_timeout: Duration::from_millis(500),
            ..HubConfig::default()
        }));
        let client = Client::new(ClientId::new("stalled"), StalledConnection, Arc::clone(&hub));
        let handle = Arc::clone(client.handle());
        let task = tokio::spawn(client.run());
        wait_until(|| hub.client_count() == 1).await;

        let started = tokio::time::Instant::now();
        hub.shutdown().await;
        assert!(started.elapsed() < Duration::from_millis(500));

        let exit = tokio::time::timeout(Duration::from_millis(50), task)
            .await
            .expect("client task still running after shutdown")
            .unwrap();
        assert_eq!(exit.reason, CloseReason::HubShutdown);
        assert_eq!(handle.state(), ClientState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_close_does_not_hold_up_rejection() {
        let hub = hub(HubConfig::default());
        hub.shutdown().await;
        let client = Client::new(ClientId::new("late"), StalledConnection, Arc::clone(&hub));
        let exit = tokio::time::timeout(Duration::from_secs(1), client.run())
            .await
            .expect("rejected client hung on close");
        assert_eq!(exit.reason, CloseReason::Rejected(HubError::ShuttingDown));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_client_is_closed() {
        let hub = hub(HubConfig {
            read_idle_timeout: Some(Duration::from_secs(5)),
            ..HubConfig::default()
        });
        let (a, _pa) = spawn_client(&hub, "a");
        let exit = a.await.unwrap();
        assert_matches!(
            exit.reason,
            CloseReason::ReadFailed(ConnectionError::IdleTimeout(_))
        );
    }

    #[tokio::test]
    async fn hub_unregister_closes_client() {
        let hub = hub(HubConfig::default());
        let (a, pa) = spawn_client(&hub, "a");
        wait_until(|| hub.client_count() == 1).await;

        assert!(hub.unregister(&ClientId::new("a")).await);
        let exit = a.await.unwrap();
        assert_eq!(exit.reason, CloseReason::Unregistered);
        assert!(pa.is_closed());
        assert_eq!(hub.stats().registry_inconsistencies, 0);
    }

    #[tokio::test]
    async fn shutdown_flushes_queued_messages_then_closes() {
        let hub = hub(HubConfig::default());
        let (a, pa) = spawn_client(&hub, "a");
        let (b, mut pb) = spawn_client(&hub, "b");
        wait_until(|| hub.client_count() == 2).await;

        for text in ["1", "2", "3"] {
            assert!(pa.send_frame(text).await);
        }
        let hub_ref = Arc::clone(&hub);
        wait_until(move || hub_ref.stats().deliveries == 3).await;

        hub.shutdown().await;
        let exit_a = a.await.unwrap();
        let exit_b = b.await.unwrap();
        assert_eq!(exit_a.reason, CloseReason::HubShutdown);
        assert_eq!(exit_b.reason, CloseReason::HubShutdown);

        let mut got = Vec::new();
        while let Some(frame) = pb.recv().await {
            got.push(frame);
        }
        assert_eq!(got, ["1", "2", "3"]);
        assert!(pb.is_closed());
        assert_eq!(hub.client_count(), 0);
    }

    #[tokio::test]
    async fn registration_refused_after_shutdown() {
        let hub = hub(HubConfig::default());
        hub.shutdown().await;
        let (a, pa) = spawn_client(&hub, "late");
        let exit = a.await.unwrap();
        assert_eq!(exit.reason, CloseReason::Rejected(HubError::ShuttingDown));
        assert!(pa.is_closed());
    }

    #[tokio::test]
    async fn explicit_register_before_run() {
        let hub = hub(HubConfig::default());
        let (conn, mut peer) = pair(4);
        let client = Client::new(ClientId::new("early"), conn, Arc::clone(&hub));
        hub.register(&client).await.unwrap();
        assert_eq!(client.state(), ClientState::Active);

        let _ = hub
            .broadcast(Message::new(ClientId::new("other"), "queued early"))
            .await;
        let task = tokio::spawn(client.run());
        assert_eq!(peer.recv().await.unwrap().as_ref(), b"queued early");

        peer.hang_up();
        assert_eq!(task.await.unwrap().reason, CloseReason::RemoteClosed);
    }

    #[tokio::test]
    async fn slow_consumer_disconnected_under_disconnect_policy() {
        let hub = hub(HubConfig {
            send_queue_capacity: 1,
            overflow_policy: OverflowPolicy::Disconnect,
            ..HubConfig::default()
        });
        // Peer capacity 1 and never read: the writer blocks after one frame.
        let (conn, _stalled) = pair(1);
        let slow = Client::new(ClientId::new("slow"), conn, Arc::clone(&hub));
        let slow_task = tokio::spawn(slow.run());
        let (_a, pa) = spawn_client(&hub, "a");
        wait_until(|| hub.client_count() == 2).await;

        for i in 0..8 {
            assert!(pa.send_frame(format!("m{i}")).await);
        }
        let exit = slow_task.await.unwrap();
        assert_eq!(exit.reason, CloseReason::SlowConsumer);
        assert_eq!(hub.client_count(), 1);
        assert_eq!(hub.stats().slow_client_disconnects, 1);
    }
}
