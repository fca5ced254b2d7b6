//! [`SocketIoServer`] (C7): the [`EngineIoHandler`] that turns Engine.IO
//! connect/message/disconnect events into Socket.IO namespace CONNECT,
//! EVENT/ACK dispatch, and DISCONNECT.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use engineioxide::{DisconnectReason, EngineIo, EngineIoHandler, MessageData, Session, Sid};

use crate::adapter::{Adapter, LocalAdapter, SocketRegistry};
use crate::ns::Namespace;
use crate::packet::{PacketType, SocketIoPacket, DEFAULT_NAMESPACE};
use crate::parser::{reconstruct, Fed, Payload, SocketIoParser};
use crate::socket::{deliver, NamespaceSocket};

/// Per-session bookkeeping: the packet parser and the namespace sockets
/// this Engine.IO connection has joined.
struct Connection {
    parser: std::sync::Mutex<SocketIoParser>,
    namespaces: DashMap<String, Arc<NamespaceSocket>>,
}

/// The Socket.IO multiplexing layer. One instance drives every namespace
/// declared on it, over however many concurrent Engine.IO sessions are
/// open.
pub struct SocketIoServer {
    namespaces: RwLock<HashMap<String, Arc<Namespace>>>,
    adapter: Arc<dyn Adapter>,
    sockets: SocketRegistry,
    connections: DashMap<Sid, Connection>,
    next_socket_ctr: AtomicU64,
    engine: OnceLock<Weak<EngineIo<SocketIoServer>>>,
}

impl SocketIoServer {
    pub fn new() -> Self {
        let sockets: SocketRegistry = Arc::new(DashMap::new());
        Self {
            namespaces: RwLock::new(HashMap::new()),
            adapter: Arc::new(LocalAdapter::new(sockets.clone())),
            sockets,
            connections: DashMap::new(),
            next_socket_ctr: AtomicU64::new(0),
            engine: OnceLock::new(),
        }
    }

    /// Registers `namespace` if it doesn't already exist, returning the
    /// (possibly pre-existing) handle.
    pub fn of(&self, path: impl Into<String>) -> Arc<Namespace> {
        let path = path.into();
        let mut namespaces = self.namespaces.write().unwrap();
        namespaces
            .entry(path.clone())
            .or_insert_with(|| Arc::new(Namespace::new(path)))
            .clone()
    }

    pub fn namespace(&self, path: &str) -> Option<Arc<Namespace>> {
        self.namespaces.read().unwrap().get(path).cloned()
    }

    pub fn adapter(&self) -> Arc<dyn Adapter> {
        self.adapter.clone()
    }

    /// Must be called once, right after the owning `EngineIo` is
    /// constructed, so non-CONNECT packets with no matching namespace can
    /// close the underlying Engine.IO session.
    pub fn bind(&self, engine: Weak<EngineIo<SocketIoServer>>) {
        let _ = self.engine.set(engine);
    }

    fn lookup(&self, sid: Sid, namespace: &str) -> Option<Arc<NamespaceSocket>> {
        self.connections.get(&sid)?.namespaces.get(namespace).map(|e| e.value().clone())
    }

    async fn close_engine_session(&self, sid: Sid, reason: DisconnectReason) {
        if let Some(engine) = self.engine.get().and_then(Weak::upgrade) {
            engine.close_session(sid, reason).await;
        }
    }

    async fn handle_connect(&self, socket: &Arc<Session>, packet: SocketIoPacket) {
        let namespace_path = packet.namespace.clone();
        let Some(namespace) = self.namespace(&namespace_path) else {
            let err = SocketIoPacket::connect_error(namespace_path, "Unknown namespace");
            deliver(socket, &err, &[]);
            return;
        };

        let ctr = self.next_socket_ctr.fetch_add(1, Ordering::SeqCst);
        let ns_socket = Arc::new(NamespaceSocket::new(
            format!("{}#{}", socket.id, ctr),
            namespace_path.clone(),
            socket.clone(),
            self.adapter.clone(),
        ));

        if let Some(handler) = namespace.connect_handler() {
            let accepted = handler(ns_socket.clone(), packet.data.clone()).await;
            if !accepted {
                let err = SocketIoPacket::connect_error(namespace_path, "Not authorized");
                deliver(socket, &err, &[]);
                return;
            }
        }

        self.sockets.insert((namespace_path.clone(), ns_socket.id.clone()), ns_socket.clone());
        if let Some(conn) = self.connections.get(&socket.id) {
            conn.namespaces.insert(namespace_path.clone(), ns_socket.clone());
        }

        let ack = SocketIoPacket::connect(namespace_path, serde_json::json!({ "sid": ns_socket.id }));
        deliver(socket, &ack, &[]);
    }

    async fn fire_disconnect_listener(&self, ns_socket: &Arc<NamespaceSocket>, reason: &DisconnectReason) {
        let Some(namespace) = self.namespace(&ns_socket.namespace) else { return };
        if let Some(listener) = namespace.listener("disconnect") {
            listener(ns_socket.clone(), vec![Payload::String(reason.to_string())], None).await;
        }
    }

    fn teardown_namespace_socket(&self, ns_socket: &Arc<NamespaceSocket>) {
        ns_socket.leave_all();
        self.sockets.remove(&(ns_socket.namespace.clone(), ns_socket.id.clone()));
    }

    async fn handle_client_disconnect(&self, sid: Sid, namespace: &str) {
        let removed = self.connections.get(&sid).and_then(|conn| conn.namespaces.remove(namespace)).map(|(_, s)| s);
        match removed {
            Some(ns_socket) => {
                self.fire_disconnect_listener(&ns_socket, &DisconnectReason::ClientClose).await;
                self.teardown_namespace_socket(&ns_socket);
            }
            None => self.close_engine_session(sid, DisconnectReason::MissingConnect).await,
        }
    }

    async fn handle_event(&self, socket: &Arc<Session>, packet: SocketIoPacket, attachments: Vec<Vec<u8>>) {
        let Some(ns_socket) = self.lookup(socket.id, &packet.namespace) else {
            self.close_engine_session(socket.id, DisconnectReason::MissingConnect).await;
            return;
        };
        let Some(namespace) = self.namespace(&packet.namespace) else {
            return;
        };

        let Ok(Payload::Array(mut args)) = reconstruct(&packet.data, &attachments) else {
            return;
        };
        if args.is_empty() {
            self.close_engine_session(socket.id, DisconnectReason::BadEventPayload).await;
            return;
        }
        let event = match args.remove(0) {
            Payload::String(name) => name,
            _ => return,
        };

        let Some(listener) = namespace.listener(&event) else { return };
        let ack = packet.ack_id.map(|id| ns_socket.ack_sender(id));
        listener(ns_socket, args, ack).await;
    }

    async fn handle_ack(&self, socket: &Arc<Session>, packet: SocketIoPacket, attachments: Vec<Vec<u8>>) {
        let Some(ns_socket) = self.lookup(socket.id, &packet.namespace) else {
            self.close_engine_session(socket.id, DisconnectReason::MissingConnect).await;
            return;
        };
        let Some(ack_id) = packet.ack_id else { return };
        let Ok(payload) = reconstruct(&packet.data, &attachments) else { return };
        ns_socket.handle_ack(crate::socket::as_arg_list(payload), ack_id);
    }

    async fn dispatch(&self, socket: &Arc<Session>, packet: SocketIoPacket, attachments: Vec<Vec<u8>>) {
        match packet.ty {
            PacketType::Connect => self.handle_connect(socket, packet).await,
            PacketType::Disconnect => {
                let namespace = packet.namespace.clone();
                self.handle_client_disconnect(socket.id, &namespace).await;
            }
            PacketType::Event => self.handle_event(socket, packet, attachments).await,
            PacketType::Ack => self.handle_ack(socket, packet, attachments).await,
            PacketType::BinaryEvent | PacketType::BinaryAck => {}
            PacketType::ConnectError => {}
        }
    }
}

impl Default for SocketIoServer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EngineIoHandler for SocketIoServer {
    async fn on_connect(&self, socket: Arc<Session>) {
        self.connections.insert(
            socket.id,
            Connection {
                parser: std::sync::Mutex::new(SocketIoParser::new()),
                namespaces: DashMap::new(),
            },
        );
    }

    async fn on_message(&self, socket: Arc<Session>, data: MessageData) {
        let fed = {
            let Some(conn) = self.connections.get(&socket.id) else { return };
            let mut parser = conn.parser.lock().unwrap();
            match data {
                MessageData::Text(text) => parser.feed_text(&text),
                MessageData::Binary(bytes) => parser.feed_binary(bytes),
            }
        };
        match fed {
            Ok(Fed::Complete(packet)) => self.dispatch(&socket, packet, Vec::new()).await,
            Ok(Fed::CompleteWithBinary(packet, attachments)) => self.dispatch(&socket, packet, attachments).await,
            Ok(Fed::AwaitingAttachments) | Ok(Fed::StillAwaiting) => {}
            Err(_) => {}
        }
    }

    async fn on_disconnect(&self, socket: Arc<Session>, reason: DisconnectReason) {
        if let Some((_, conn)) = self.connections.remove(&socket.id) {
            for (_, ns_socket) in conn.namespaces {
                self.fire_disconnect_listener(&ns_socket, &reason).await;
                self.teardown_namespace_socket(&ns_socket);
            }
        }
    }
}

/// Convenience: returns the `/` namespace, registering it on first use.
pub fn default_namespace(server: &SocketIoServer) -> Arc<Namespace> {
    server.of(DEFAULT_NAMESPACE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use engineioxide::{EngineIoConfig, TransportType};
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn unknown_namespace_gets_connect_error() {
        let server = SocketIoServer::new();
        let engine = Arc::new(EngineIo::new(EngineIoConfig::default(), server));
        engine.handler().bind(Arc::downgrade(&engine));

        let socket = engine.create_session(TransportType::Polling).await;
        engine
            .handler()
            .on_message(socket.clone(), MessageData::Text("0/missing,".to_string()))
            .await;

        let payload = socket.next_payload(std::time::Duration::from_millis(10), 1_000_000).await;
        let text = String::from_utf8(payload).unwrap();
        assert!(text.contains("Unknown namespace"), "got {text}");
    }

    #[tokio::test]
    async fn connect_then_event_reaches_registered_listener() {
        let server = SocketIoServer::new();
        let hit = Arc::new(AtomicBool::new(false));
        let hit2 = hit.clone();
        let ns = server.of("/");
        ns.on(
            "greet",
            Arc::new(move |_socket, _args, _ack| {
                let hit = hit2.clone();
                Box::pin(async move {
                    hit.store(true, Ordering::SeqCst);
                })
            }),
        );

        let engine = Arc::new(EngineIo::new(EngineIoConfig::default(), server));
        engine.handler().bind(Arc::downgrade(&engine));
        let socket = engine.create_session(TransportType::Polling).await;

        engine.handler().on_message(socket.clone(), MessageData::Text("0".to_string())).await;
        let _ = socket.next_payload(std::time::Duration::from_millis(10), 1_000_000).await;

        engine
            .handler()
            .on_message(socket.clone(), MessageData::Text(r#"2["greet","world"]"#.to_string()))
            .await;

        assert!(hit.load(Ordering::SeqCst));
    }
}
