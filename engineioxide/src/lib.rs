//! Server-side Engine.IO v4 session layer.
//!
//! [`EngineIoService`] is a `tower::Service<http::Request<hyper::Body>>`
//! that terminates the Engine.IO wire protocol (handshake, long-polling,
//! WebSocket, upgrade, heartbeats) and drives an [`EngineIoHandler`] with
//! the resulting connect/message/disconnect events.

pub mod config;
pub mod engine;
pub mod errors;
pub mod extensions;
pub mod handler;
pub mod packet;
pub mod registry;
pub mod service;
pub mod session;
pub mod sid;
pub mod transport;

pub use config::EngineIoConfig;
pub use engine::EngineIo;
pub use errors::{DisconnectReason, Error};
pub use extensions::Extensions;
pub use handler::{EngineIoHandler, MessageData};
pub use packet::{Packet, PingData};
pub use service::EngineIoService;
pub use session::Session;
pub use sid::Sid;
pub use transport::TransportType;
