//! The two Engine.IO transports: HTTP long-polling and WebSocket.

pub mod polling;
pub mod ws;

/// Which transport a session is currently using.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    Polling,
    Websocket,
}

impl TransportType {
    pub fn as_query_str(&self) -> &'static str {
        match self {
            TransportType::Polling => "polling",
            TransportType::Websocket => "websocket",
        }
    }

    pub fn from_query_str(s: &str) -> Option<Self> {
        match s {
            "polling" => Some(TransportType::Polling),
            "websocket" => Some(TransportType::Websocket),
            _ => None,
        }
    }
}
