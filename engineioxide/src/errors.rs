//! Error and disconnect-reason types for the Engine.IO session layer.

use std::fmt;

use http::StatusCode;

use crate::sid::Sid;

/// Reason a session was closed, propagated to
/// [`EngineIoHandler::on_disconnect`](crate::handler::EngineIoHandler::on_disconnect).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The server closed the session deliberately.
    ServerClose,
    /// The client sent a close packet.
    ClientClose,
    /// The heartbeat deadline was exceeded.
    Timeout,
    /// A second concurrent long-poll GET was rejected.
    ConcurrentGet,
    /// A second concurrent long-poll POST was rejected.
    ConcurrentPost,
    /// The attached WebSocket transport disconnected.
    WebsocketDisconnect,
    /// A non-CONNECT Socket.IO packet arrived with no matching namespace
    /// socket.
    MissingConnect,
    /// A Socket.IO EVENT packet carried a malformed (non-list / empty)
    /// payload.
    BadEventPayload,
    /// Any other application-supplied reason.
    Other(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ServerClose => "server_close",
            Self::ClientClose => "client_close",
            Self::Timeout => "timeout",
            Self::ConcurrentGet => "concurrent_get",
            Self::ConcurrentPost => "concurrent_post",
            Self::WebsocketDisconnect => "websocket_disconnect",
            Self::MissingConnect => "missing_connect",
            Self::BadEventPayload => "bad_event_payload",
            Self::Other(s) => s.as_str(),
        };
        f.write_str(s)
    }
}

/// Errors surfaced by the Engine.IO session layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The query string did not carry a supported `EIO`/`transport` pair.
    #[error("invalid engine.io query parameters")]
    InvalidQueryParams,
    /// `sid` did not match any live session.
    #[error("unknown or expired session id: {0}")]
    UnknownSessionId(Sid),
    /// A polling request arrived on a session already upgraded to
    /// WebSocket (or vice versa).
    #[error("transport mismatch for this session")]
    TransportMismatch,
    /// A WebSocket tried to attach to a session that already has one.
    #[error("session already has an attached websocket")]
    AlreadyUpgraded,
    /// Malformed Engine.IO packet.
    #[error("packet parsing error: {0}")]
    PacketParsing(String),
    /// The HTTP body exceeded `max_payload` or could not be read.
    #[error("http body error: {0}")]
    Http(String),
    /// The method used was not supported for this endpoint.
    #[error("method not allowed")]
    MethodNotAllowed,
    /// A lower-level websocket error.
    #[error("websocket error: {0}")]
    WebsocketError(String),
}

impl Error {
    /// Maps this error to the HTTP status code the spec requires.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}
