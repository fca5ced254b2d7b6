//! The application callback contract the Engine.IO transport layer drives.

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::DisconnectReason;
use crate::session::Session;

/// Implemented by whatever sits above the Engine.IO transport layer (in
/// this workspace, the Socket.IO server in `socketioxide`).
///
/// Every method runs inside a failure-isolating boundary: the transport
/// never lets a panic or error from these callbacks escape into the
/// connection-handling task, per §7's propagation policy.
#[async_trait]
pub trait EngineIoHandler: Send + Sync + 'static {
    /// A session finished its handshake (HTTP or WebSocket) and is ready
    /// to receive traffic.
    async fn on_connect(&self, socket: Arc<Session>);

    /// A `message` packet (type `4`) arrived, text or binary.
    async fn on_message(&self, socket: Arc<Session>, data: MessageData);

    /// The session is gone. Called exactly once per session, just before
    /// the session is removed from the registry.
    async fn on_disconnect(&self, socket: Arc<Session>, reason: DisconnectReason);
}

/// Payload carried by an inbound Engine.IO `message` packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageData {
    Text(String),
    Binary(Vec<u8>),
}

impl MessageData {
    pub fn is_binary(&self) -> bool {
        matches!(self, MessageData::Binary(_))
    }
}
