//! # chathub-server
//!
//! Real-time chat hub: a shared registry of connected clients that fans
//! out every inbound message to all other clients.
//!
//! - [`Hub`]: registry and broadcast, with a non-blocking per-recipient
//!   enqueue and a configurable [`OverflowPolicy`] for full queues
//! - [`Client`]: one participant's lifecycle over any
//!   [`Connection`](chathub_core::Connection)
//! - [`ChatServer`]: Axum front end that upgrades `/ws` requests into
//!   clients

pub mod client;
pub mod config;
pub mod errors;
pub mod health;
pub mod hub;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod transport;

pub use client::{Client, ClientExit, ClientHandle, ClientState, CloseReason};
pub use config::{HubConfig, OverflowPolicy, ServerConfig};
pub use errors::{HubError, ServerError};
pub use hub::{BackpressureAction, BackpressureEvent, BroadcastReport, Hub, HubStats};
pub use server::ChatServer;
pub use transport::WsConnection;
