//! Client registry and broadcast fan-out.

mod report;

pub use report::{BackpressureAction, BackpressureEvent, BroadcastReport, HubStats};

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chathub_core::{ClientId, Connection, Message};
use metrics::{counter, gauge};
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::task_tracker::TaskTrackerToken;
use tracing::{debug, info, warn};

use crate::client::{Client, ClientHandle, CloseReason, Enqueue};
use crate::config::{HubConfig, OverflowPolicy};
use crate::errors::HubError;
use crate::metrics::{
    HUB_BROADCAST_DROPS_TOTAL, HUB_CLIENTS_ACTIVE, HUB_DELIVERIES_TOTAL,
    HUB_MESSAGES_BROADCAST_TOTAL, HUB_REGISTRATIONS_TOTAL, HUB_REGISTRY_INCONSISTENCIES_TOTAL,
    HUB_SLOW_CLIENT_DISCONNECTS_TOTAL, HUB_UNREGISTRATIONS_TOTAL,
};
use crate::shutdown::ShutdownCoordinator;
use report::HubCounters;

/// Shared registry of active clients.
///
/// Every broadcast enqueues with `try_send` only, so a slow recipient can
/// never stall the sender or any other recipient. The registry lock is a
/// `tokio::sync::RwLock`: broadcasts share it, register/unregister take it
/// exclusively, and nothing awaits I/O while holding it.
pub struct Hub {
    config: HubConfig,
    clients: RwLock<HashMap<ClientId, Arc<ClientHandle>>>,
    /// Mirrors `clients.len()` without taking the lock.
    active_count: AtomicUsize,
    counters: HubCounters,
    shutdown: ShutdownCoordinator,
}

impl Hub {
    /// Create an empty hub.
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            clients: RwLock::new(HashMap::new()),
            active_count: AtomicUsize::new(0),
            counters: HubCounters::default(),
            shutdown: ShutdownCoordinator::new(),
        }
    }

    /// Hub configuration.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Add a `Connecting` client to the registry and mark it `Active`.
    ///
    /// [`Client::run`] calls this itself; call it directly only to make a
    /// client visible to broadcasts before its pumps start.
    pub async fn register<C: Connection>(&self, client: &Client<C>) -> Result<(), HubError> {
        self.register_handle(client.handle()).await
    }

    pub(crate) async fn register_handle(&self, handle: &Arc<ClientHandle>) -> Result<(), HubError> {
        let id = handle.id();
        let mut clients = self.clients.write().await;
        // Checked under the write lock so shutdown's drain cannot miss an entry.
        if self.shutdown.is_shutting_down() {
            debug!(client_id = %id, "registration refused, hub shutting down");
            return Err(HubError::ShuttingDown);
        }
        if let Some(existing) = clients.get(id) {
            let err = if Arc::ptr_eq(existing, handle) {
                HubError::AlreadyRegistered(id.clone())
            } else {
                HubError::DuplicateId(id.clone())
            };
            drop(clients);
            self.note_inconsistency();
            warn!(client_id = %id, error = %err, "registry inconsistency on register");
            return Err(err);
        }
        if !handle.activate() {
            return Err(HubError::InvalidState {
                id: id.clone(),
                state: handle.state(),
            });
        }
        let _ = clients.insert(id.clone(), Arc::clone(handle));
        let count = self.active_count.fetch_add(1, Ordering::Relaxed) + 1;
        drop(clients);

        HubCounters::add(&self.counters.registrations, 1);
        counter!(HUB_REGISTRATIONS_TOTAL).increment(1);
        gauge!(HUB_CLIENTS_ACTIVE).set(count as f64);
        info!(client_id = %id, clients = count, "client registered");
        Ok(())
    }

    /// Remove a client and start its teardown.
    ///
    /// Idempotent: returns `false` and changes nothing if `id` is not
    /// registered.
    pub async fn unregister(&self, id: &ClientId) -> bool {
        let removed = {
            let mut clients = self.clients.write().await;
            clients.remove(id).inspect(|handle| handle.mark_closing())
        };
        let Some(handle) = removed else {
            self.note_inconsistency();
            debug!(client_id = %id, "unregister of unknown client");
            return false;
        };
        self.finish_removal(&handle, CloseReason::Unregistered);
        true
    }

    /// Remove `handle` if it is still the registered entry for its id.
    ///
    /// Used by the client's own teardown, where absence is expected.
    pub(crate) async fn release(&self, handle: &Arc<ClientHandle>, reason: CloseReason) -> bool {
        let removed = {
            let mut clients = self.clients.write().await;
            let owned = clients
                .get(handle.id())
                .is_some_and(|existing| Arc::ptr_eq(existing, handle));
            if owned {
                clients
                    .remove(handle.id())
                    .inspect(|handle| handle.mark_closing())
            } else {
                None
            }
        };
        match removed {
            Some(handle) => {
                self.finish_removal(&handle, reason);
                true
            }
            None => false,
        }
    }

    /// Bookkeeping for an entry already taken out of the registry and
    /// marked `Closing`.
    fn finish_removal(&self, handle: &ClientHandle, reason: CloseReason) {
        let label = reason.as_str();
        let _ = handle.begin_close(reason);
        let count = self
            .active_count
            .fetch_sub(1, Ordering::Relaxed)
            .saturating_sub(1);
        HubCounters::add(&self.counters.unregistrations, 1);
        counter!(HUB_UNREGISTRATIONS_TOTAL, "reason" => label).increment(1);
        gauge!(HUB_CLIENTS_ACTIVE).set(count as f64);
        info!(client_id = %handle.id(), reason = label, clients = count, "client unregistered");
    }

    fn note_inconsistency(&self) {
        HubCounters::add(&self.counters.registry_inconsistencies, 1);
        counter!(HUB_REGISTRY_INCONSISTENCIES_TOTAL).increment(1);
    }

    /// Enqueue `message` to every active client except, when configured,
    /// its sender.
    ///
    /// Never waits on a recipient. Full queues are handled per the
    /// configured [`OverflowPolicy`] and reported back.
    pub async fn broadcast(&self, message: Message) -> BroadcastReport {
        let message = Arc::new(message);
        let sender = message.sender();
        let mut report = BroadcastReport::default();
        let mut slow = Vec::new();
        {
            let clients = self.clients.read().await;
            for (id, handle) in clients.iter() {
                if self.config.exclude_sender && id == sender {
                    continue;
                }
                if !handle.is_active() || handle.is_stopped() {
                    report.skipped += 1;
                    continue;
                }
                report.recipients += 1;
                match handle.enqueue(Arc::clone(&message)) {
                    Enqueue::Queued => report.delivered += 1,
                    Enqueue::Closed => {
                        // outbound pump already gone
                        report.recipients -= 1;
                        report.skipped += 1;
                    }
                    Enqueue::Full => {
                        let total_drops = handle.record_drop();
                        let action = match self.config.overflow_policy {
                            OverflowPolicy::Drop => {
                                warn!(
                                    client_id = %id,
                                    sender = %sender,
                                    total_drops,
                                    "outbound queue full, message dropped"
                                );
                                BackpressureAction::Dropped
                            }
                            OverflowPolicy::Disconnect => {
                                warn!(
                                    client_id = %id,
                                    sender = %sender,
                                    total_drops,
                                    "outbound queue full, disconnecting slow client"
                                );
                                slow.push(Arc::clone(handle));
                                BackpressureAction::Disconnected
                            }
                        };
                        report.backpressure.push(BackpressureEvent {
                            recipient: id.clone(),
                            sender: sender.clone(),
                            total_drops,
                            action,
                        });
                    }
                }
            }
        }

        let dropped = report.dropped() as u64;
        HubCounters::add(&self.counters.messages_broadcast, 1);
        HubCounters::add(&self.counters.deliveries, report.delivered as u64);
        HubCounters::add(&self.counters.drops, dropped);
        counter!(HUB_MESSAGES_BROADCAST_TOTAL).increment(1);
        counter!(HUB_DELIVERIES_TOTAL).increment(report.delivered as u64);
        if dropped > 0 {
            counter!(HUB_BROADCAST_DROPS_TOTAL).increment(dropped);
        }
        debug!(
            sender = %sender,
            bytes = message.len(),
            recipients = report.recipients,
            delivered = report.delivered,
            dropped,
            "broadcast"
        );

        for handle in slow {
            if self.release(&handle, CloseReason::SlowConsumer).await {
                HubCounters::add(&self.counters.slow_client_disconnects, 1);
                counter!(HUB_SLOW_CLIENT_DISCONNECTS_TOTAL).increment(1);
            }
        }
        report
    }

    /// Refuse new clients, close every registered one, and wait up to the
    /// configured shutdown timeout for their tasks to finish.
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        let first = !self.shutdown.is_shutting_down();
        self.shutdown.shutdown();
        let drained: Vec<Arc<ClientHandle>> = {
            let mut clients = self.clients.write().await;
            clients
                .drain()
                .map(|(_, handle)| {
                    handle.mark_closing();
                    handle
                })
                .collect()
        };
        if first {
            info!(clients = drained.len(), "hub shutting down");
        }
        for handle in &drained {
            self.finish_removal(handle, CloseReason::HubShutdown);
        }
        if self.shutdown.drain(self.config.shutdown_timeout).await && first {
            info!("hub shutdown complete");
        }
    }

    /// Whether shutdown has started.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_shutting_down()
    }

    /// Token cancelled when shutdown starts.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.token()
    }

    /// Number of registered clients.
    pub fn client_count(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }

    /// Whether `id` is registered.
    pub async fn contains(&self, id: &ClientId) -> bool {
        self.clients.read().await.contains_key(id)
    }

    /// Ids of all registered clients.
    pub async fn client_ids(&self) -> Vec<ClientId> {
        self.clients.read().await.keys().cloned().collect()
    }

    /// Registered client by id.
    pub async fn client(&self, id: &ClientId) -> Option<Arc<ClientHandle>> {
        self.clients.read().await.get(id).cloned()
    }

    /// Lifetime counters.
    pub fn stats(&self) -> HubStats {
        self.counters.snapshot(self.client_count())
    }

    /// Build the registry entry and outbound queue for a new client.
    pub(crate) fn new_handle(
        &self,
        id: ClientId,
    ) -> (Arc<ClientHandle>, mpsc::Receiver<Arc<Message>>) {
        ClientHandle::new(
            id,
            self.config.send_queue_capacity,
            self.shutdown.child_token(),
        )
    }

    pub(crate) fn track_task(&self) -> TaskTrackerToken {
        self.shutdown.track()
    }

    pub(crate) fn spawn_tracked<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.shutdown.spawn(future)
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}
