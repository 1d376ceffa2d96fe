//! # eio-server
//!
//! Server side of the engine protocol.
//!
//! - [`Session`]: per-client state machine with heartbeat, inbound dispatch
//!   and outbound queueing over zero-capacity [`handoff`] queues
//! - Transports: HTTP long-polling and `WebSocket`, with the probe/upgrade
//!   handshake that moves a session from the former to the latter
//! - [`SessionRegistry`]: id to session map
//! - [`Server`]: Axum endpoint dispatching handshake and transport requests
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod handoff;
pub mod registry;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod transport;

pub use config::ServerConfig;
pub use registry::SessionRegistry;
pub use server::Server;
pub use session::{CloseReason, Session, SessionOptions, SessionState};
pub use transport::TransportKind;
