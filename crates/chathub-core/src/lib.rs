//! # chathub-core
//!
//! Foundation types shared by the hub and its transports.
//!
//! - [`ids::ClientId`]: opaque client identity supplied by the transport
//! - [`message::Message`]: immutable chat message handed to the hub
//! - [`connection::Connection`]: the send/receive/close capability a transport provides
//! - [`errors`]: connection and protocol error taxonomy
//! - [`logging`]: `tracing` subscriber setup and log capture for tests

#![deny(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod message;

pub use connection::Connection;
pub use errors::{ConnectionError, ProtocolError};
pub use ids::ClientId;
pub use message::Message;
