//! Broadcast outcomes and hub counters.

use std::sync::atomic::{AtomicU64, Ordering};

use chathub_core::ClientId;
use serde::Serialize;

/// What the hub did about a full recipient queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressureAction {
    /// The message was dropped for this recipient only.
    Dropped,
    /// The recipient was unregistered and its connection closed.
    Disconnected,
}

/// One recipient that could not take a broadcast message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BackpressureEvent {
    /// Recipient whose queue was full.
    pub recipient: ClientId,
    /// Sender of the message that did not fit.
    pub sender: ClientId,
    /// Lifetime drops for this recipient, including this one.
    pub total_drops: u64,
    /// Action taken.
    pub action: BackpressureAction,
}

/// Result of one [`Hub::broadcast`](super::Hub::broadcast).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// Active clients the message was addressed to.
    pub recipients: usize,
    /// Recipients whose queue accepted the message.
    pub delivered: usize,
    /// Recipients skipped because they were already closing.
    pub skipped: usize,
    /// Recipients whose queue was full.
    pub backpressure: Vec<BackpressureEvent>,
}

impl BroadcastReport {
    /// Number of recipients that missed the message because of backpressure.
    pub fn dropped(&self) -> usize {
        self.backpressure.len()
    }

    /// Recipients disconnected by this broadcast.
    pub fn disconnected(&self) -> impl Iterator<Item = &ClientId> {
        self.backpressure
            .iter()
            .filter(|e| e.action == BackpressureAction::Disconnected)
            .map(|e| &e.recipient)
    }

    /// Whether every addressed recipient got the message.
    pub fn is_complete(&self) -> bool {
        self.delivered == self.recipients
    }
}

/// Snapshot of lifetime hub counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Clients registered right now.
    pub active_clients: usize,
    /// Successful registrations.
    pub registrations: u64,
    /// Removals from the registry for any reason.
    pub unregistrations: u64,
    /// Messages fanned out.
    pub messages_broadcast: u64,
    /// Per-recipient enqueues that succeeded.
    pub deliveries: u64,
    /// Per-recipient enqueues lost to a full queue.
    pub drops: u64,
    /// Clients removed for falling behind.
    pub slow_client_disconnects: u64,
    /// Duplicate registrations and unknown unregistrations.
    pub registry_inconsistencies: u64,
}

#[derive(Debug, Default)]
pub(crate) struct HubCounters {
    pub(crate) registrations: AtomicU64,
    pub(crate) unregistrations: AtomicU64,
    pub(crate) messages_broadcast: AtomicU64,
    pub(crate) deliveries: AtomicU64,
    pub(crate) drops: AtomicU64,
    pub(crate) slow_client_disconnects: AtomicU64,
    pub(crate) registry_inconsistencies: AtomicU64,
}

impl HubCounters {
    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        let _ = counter.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, active_clients: usize) -> HubStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        HubStats {
            active_clients,
            registrations: load(&self.registrations),
            unregistrations: load(&self.unregistrations),
            messages_broadcast: load(&self.messages_broadcast),
            deliveries: load(&self.deliveries),
            drops: load(&self.drops),
            slow_client_disconnects: load(&self.slow_client_disconnects),
            registry_inconsistencies: load(&self.registry_inconsistencies),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str, action: BackpressureAction) -> BackpressureEvent {
        BackpressureEvent {
            recipient: ClientId::new(id),
            sender: ClientId::new("s"),
            total_drops: 1,
            action,
        }
    }

    #[test]
    fn report_accessors() {
        let report = BroadcastReport {
            recipients: 3,
            delivered: 1,
            skipped: 0,
            backpressure: vec![
                event("a", BackpressureAction::Dropped),
                event("b", BackpressureAction::Disconnected),
            ],
        };
        assert_eq!(report.dropped(), 2);
        assert!(!report.is_complete());
        let gone: Vec<_> = report.disconnected().map(ClientId::as_str).collect();
        assert_eq!(gone, ["b"]);
    }

    #[test]
    fn empty_report_is_complete() {
        assert!(BroadcastReport::default().is_complete());
    }

    #[test]
    fn counters_snapshot() {
        let counters = HubCounters::default();
        HubCounters::add(&counters.registrations, 2);
        HubCounters::add(&counters.drops, 5);
        let stats = counters.snapshot(2);
        assert_eq!(stats.active_clients, 2);
        assert_eq!(stats.registrations, 2);
        assert_eq!(stats.drops, 5);
        assert_eq!(stats.deliveries, 0);
    }

    #[test]
    fn action_serializes_snake_case() {
        let json = serde_json::to_value(event("a", BackpressureAction::Disconnected)).unwrap();
        assert_eq!(json["action"], "disconnected");
        assert_eq!(json["recipient"], "a");
    }
}
