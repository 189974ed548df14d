//! Hub and server error types.

use chathub_core::ClientId;

use crate::client::ClientState;

/// Registration failures.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    /// The hub has begun shutting down and accepts no new clients.
    #[error("hub is shutting down")]
    ShuttingDown,
    /// This client is already in the registry.
    #[error("client {0} is already registered")]
    AlreadyRegistered(ClientId),
    /// A different client holds the same id.
    #[error("client id {0} is held by another connection")]
    DuplicateId(ClientId),
    /// Only `Connecting` clients can register.
    #[error("client {id} cannot register from state {state}")]
    InvalidState {
        /// Client id.
        id: ClientId,
        /// State at the time of the attempt.
        state: ClientState,
    },
}

/// Failures starting the HTTP front end.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding or inspecting the listener failed.
    #[error("listener error: {0}")]
    Io(#[from] std::io::Error),
    /// Installing the Prometheus recorder failed.
    #[error("metrics recorder: {0}")]
    Metrics(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_error_display() {
        assert_eq!(HubError::ShuttingDown.to_string(), "hub is shutting down");
        assert_eq!(
            HubError::AlreadyRegistered(ClientId::new("a")).to_string(),
            "client a is already registered"
        );
        let err = HubError::InvalidState {
            id: ClientId::new("b"),
            state: ClientState::Closing,
        };
        assert_eq!(err.to_string(), "client b cannot register from state closing");
    }

    #[test]
    fn server_error_from_io() {
        let err: ServerError = std::io::Error::new(std::io::ErrorKind::AddrInUse, "busy").into();
        assert!(err.to_string().contains("busy"));
    }
}
