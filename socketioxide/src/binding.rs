//! [`SocketIoBinding`] (C8): the explicit handler-registration API that
//! stands in for runtime method reflection.
//!
//! Application code declares a per-connection state type `T`, a factory
//! for it, and tagged handler closures, then installs everything onto a
//! [`Namespace`] once via [`SocketIoBinding::bind`]. A fresh `T` is built
//! and stashed on the namespace-socket's `state` for every CONNECT.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::ns::{BoxFuture, Namespace};
use crate::parser::Payload;
use crate::socket::{AckSender, NamespaceSocket};

type ConnectFn<T> = Arc<dyn Fn(Arc<T>, Arc<NamespaceSocket>, Value) -> BoxFuture<'static, bool> + Send + Sync>;
type DisconnectFn<T> = Arc<dyn Fn(Arc<T>, Arc<NamespaceSocket>) -> BoxFuture<'static, ()> + Send + Sync>;
type PlainEventFn<T> =
    Arc<dyn Fn(Arc<T>, Arc<NamespaceSocket>, Vec<Payload>) -> BoxFuture<'static, ()> + Send + Sync>;
type AckEventFn<T> = Arc<
    dyn Fn(Arc<T>, Arc<NamespaceSocket>, Vec<Payload>, AckSender) -> BoxFuture<'static, ()> + Send + Sync,
>;

enum Handler<T> {
    Plain(PlainEventFn<T>),
    WithAck(AckEventFn<T>),
}

/// Builds a namespace's handler set for a per-connection state type `T`.
pub struct SocketIoBinding<T: Send + Sync + 'static> {
    factory: Arc<dyn Fn() -> T + Send + Sync>,
    connect: Option<ConnectFn<T>>,
    disconnect: Option<DisconnectFn<T>>,
    handlers: HashMap<String, Handler<T>>,
}

impl<T: Send + Sync + 'static> SocketIoBinding<T> {
    pub fn new(factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self {
            factory: Arc::new(factory),
            connect: None,
            disconnect: None,
            handlers: HashMap::new(),
        }
    }

    /// Runs on CONNECT, after the fresh state has been stored. Returning
    /// `false` rejects the connection.
    pub fn connect(
        mut self,
        f: impl Fn(Arc<T>, Arc<NamespaceSocket>, Value) -> BoxFuture<'static, bool> + Send + Sync + 'static,
    ) -> Self {
        self.connect = Some(Arc::new(f));
        self
    }

    /// Runs once the namespace-socket has been torn down.
    pub fn disconnect(
        mut self,
        f: impl Fn(Arc<T>, Arc<NamespaceSocket>) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    ) -> Self {
        self.disconnect = Some(Arc::new(f));
        self
    }

    /// Registers a handler that doesn't need the ack callback; if the
    /// inbound packet carried an ack id, it is fired empty after `f`
    /// returns.
    pub fn on(
        mut self,
        event: impl Into<String>,
        f: impl Fn(Arc<T>, Arc<NamespaceSocket>, Vec<Payload>) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    ) -> Self {
        self.handlers.insert(event.into(), Handler::Plain(Arc::new(f)));
        self
    }

    /// Registers a handler that receives the ack callback explicitly and
    /// is responsible for firing it (or not).
    pub fn on_with_ack(
        mut self,
        event: impl Into<String>,
        f: impl Fn(Arc<T>, Arc<NamespaceSocket>, Vec<Payload>, AckSender) -> BoxFuture<'static, ()>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.handlers.insert(event.into(), Handler::WithAck(Arc::new(f)));
        self
    }

    /// Installs every registered handler onto `namespace`. Consumes
    /// `self`, so re-binding the same builder is a compile error rather
    /// than a runtime double-registration.
    pub fn bind(self, namespace: &Namespace) {
        let factory = self.factory;
        let connect = self.connect;
        namespace.on_connect(Arc::new(move |ns_socket, auth| {
            let factory = factory.clone();
            let connect = connect.clone();
            Box::pin(async move {
                let state = Arc::new(factory());
                ns_socket.state.insert(state.clone());
                match connect {
                    Some(cb) => cb(state, ns_socket, auth).await,
                    None => true,
                }
            })
        }));

        if let Some(disconnect) = self.disconnect {
            namespace.on(
                "disconnect",
                Arc::new(move |ns_socket: Arc<NamespaceSocket>, _args, _ack| {
                    let disconnect = disconnect.clone();
                    Box::pin(async move {
                        if let Some(state) = ns_socket.state.get::<Arc<T>>() {
                            disconnect(state, ns_socket).await;
                        }
                    })
                }),
            );
        }

        for (event, handler) in self.handlers {
            match handler {
                Handler::Plain(f) => {
                    namespace.on(
                        event,
                        Arc::new(move |ns_socket: Arc<NamespaceSocket>, args, ack: Option<AckSender>| {
                            let f = f.clone();
                            Box::pin(async move {
                                if let Some(state) = ns_socket.state.get::<Arc<T>>() {
                                    f(state, ns_socket, args).await;
                                }
                                if let Some(ack) = ack {
                                    ack.send(Vec::new());
                                }
                            })
                        }),
                    );
                }
                Handler::WithAck(f) => {
                    namespace.on(
                        event,
                        Arc::new(move |ns_socket: Arc<NamespaceSocket>, args, ack: Option<AckSender>| {
                            let f = f.clone();
                            Box::pin(async move {
                                let Some(ack) = ack else { return };
                                if let Some(state) = ns_socket.state.get::<Arc<T>>() {
                                    f(state, ns_socket, args, ack).await;
                                }
                            })
                        }),
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::LocalAdapter;
    use dashmap::DashMap;
    use engineioxide::{Session, Sid, TransportType};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Counter {
        greeted: AtomicBool,
    }

    fn ns_socket() -> Arc<NamespaceSocket> {
        let eio = Arc::new(Session::new(Sid::new(), TransportType::Websocket));
        let adapter = Arc::new(LocalAdapter::new(Arc::new(DashMap::new())));
        Arc::new(NamespaceSocket::new("s#0".to_string(), "/".to_string(), eio, adapter))
    }

    #[tokio::test]
    async fn connect_stores_fresh_state_and_on_event_reaches_it() {
        let namespace = Namespace::new("/");
        SocketIoBinding::new(|| Counter { greeted: AtomicBool::new(false) })
            .on(
                "greet",
                |state: Arc<Counter>, _socket, _args| {
                    Box::pin(async move {
                        state.greeted.store(true, Ordering::SeqCst);
                    })
                },
            )
            .bind(&namespace);

        let socket = ns_socket();
        let connect = namespace.connect_handler().unwrap();
        assert!(connect(socket.clone(), Value::Null).await);

        let listener = namespace.listener("greet").unwrap();
        listener(socket.clone(), Vec::new(), None).await;

        let state = socket.state.get::<Arc<Counter>>().unwrap();
        assert!(state.greeted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn rejecting_connect_handler_returns_false() {
        let namespace = Namespace::new("/");
        SocketIoBinding::new(|| Counter { greeted: AtomicBool::new(false) })
            .connect(|_state, _socket, _auth| Box::pin(async { false }))
            .bind(&namespace);

        let connect = namespace.connect_handler().unwrap();
        assert!(!connect(ns_socket(), Value::Null).await);
    }
}
