//! Error types for the Socket.IO multiplexing layer.

/// Errors surfaced while encoding, decoding or dispatching Socket.IO
/// packets.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed socket.io packet: {0}")]
    PacketParsing(String),
    #[error("unknown namespace: {0}")]
    UnknownNamespace(String),
    #[error("connection rejected by namespace connect handler")]
    NotAuthorized(serde_json::Value),
    #[error("engine.io transport error: {0}")]
    Transport(#[from] engineioxide::Error),
}

/// Error raised by a broadcast operation that could fail per-target
/// (e.g. waiting on acks that never arrive).
#[derive(Debug, thiserror::Error)]
pub enum AckError {
    #[error("ack timed out waiting for a reply")]
    Timeout,
    #[error("the target socket disconnected before acking")]
    Disconnected,
}

/// Error raised while dispatching a broadcast through an [`Adapter`](crate::adapter::Adapter).
#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error("failed to encode the broadcast packet: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("adapter failed to deliver the broadcast: {0}")]
    Adapter(String),
}
