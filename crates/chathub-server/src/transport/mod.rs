//! Network transports implementing [`chathub_core::Connection`].

pub mod ws;

pub use ws::WsConnection;
