//! [`Namespace`]: a process-wide, registry-level Socket.IO entity (C7).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::parser::Payload;
use crate::socket::{AckSender, NamespaceSocket};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Invoked once per successful CONNECT for this namespace. Returning
/// `false` rejects the connection with a CONNECT_ERROR.
pub type ConnectHandler =
    Arc<dyn Fn(Arc<NamespaceSocket>, Value) -> BoxFuture<'static, bool> + Send + Sync>;

/// Invoked for every EVENT/BINARY_EVENT dispatched to this namespace
/// under the matching event name.
pub type EventHandler = Arc<
    dyn Fn(Arc<NamespaceSocket>, Vec<Payload>, Option<AckSender>) -> BoxFuture<'static, ()>
        + Send
        + Sync,
>;

/// A declared namespace (e.g. `/`, `/admin`), shared by every connection
/// that joins it.
pub struct Namespace {
    pub path: String,
    connect_handler: RwLock<Option<ConnectHandler>>,
    listeners: RwLock<HashMap<String, EventHandler>>,
}

impl Namespace {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            connect_handler: RwLock::new(None),
            listeners: RwLock::new(HashMap::new()),
        }
    }

    pub fn on_connect(&self, handler: ConnectHandler) {
        *self.connect_handler.write().unwrap() = Some(handler);
    }

    pub fn on(&self, event: impl Into<String>, handler: EventHandler) {
        self.listeners.write().unwrap().insert(event.into(), handler);
    }

    pub fn connect_handler(&self) -> Option<ConnectHandler> {
        self.connect_handler.read().unwrap().clone()
    }

    /// Missing listeners are silently dropped per the dispatch contract.
    pub fn listener(&self, event: &str) -> Option<EventHandler> {
        self.listeners.read().unwrap().get(event).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_event_has_no_listener() {
        let ns = Namespace::new("/");
        assert!(ns.listener("missing").is_none());
    }

    #[test]
    fn registered_listener_is_retrievable() {
        let ns = Namespace::new("/");
        ns.on("ping", Arc::new(|_socket, _args, _ack| Box::pin(async {})));
        assert!(ns.listener("ping").is_some());
    }
}
