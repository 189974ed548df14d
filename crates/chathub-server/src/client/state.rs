//! Client lifecycle state machine.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of one client.
///
/// Transitions only move forward:
/// `Connecting → Active → Closing → Closed`, with `Connecting → Closing`
/// allowed when registration is refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ClientState {
    /// Created, not yet registered with the hub.
    Connecting = 0,
    /// Registered and eligible for broadcast.
    Active = 1,
    /// Teardown started; no longer receives broadcasts.
    Closing = 2,
    /// Both pumps exited and the connection was released.
    Closed = 3,
}

impl ClientState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Active,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }

    /// Lowercase name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomic cell holding a [`ClientState`] that can only advance.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(ClientState::Connecting as u8))
    }

    pub(crate) fn get(&self) -> ClientState {
        ClientState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move from `Connecting` to `Active`. Fails from any other state.
    pub(crate) fn activate(&self) -> bool {
        self.0
            .compare_exchange(
                ClientState::Connecting as u8,
                ClientState::Active as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Advance to `to` if it is later than the current state.
    ///
    /// Returns `true` if this call performed the transition.
    pub(crate) fn advance(&self, to: ClientState) -> bool {
        let target = to as u8;
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if current >= target {
                return false;
            }
            match self
                .0
                .compare_exchange_weak(current, target, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}
