//! [`NamespaceSocket`] (C7): per-(session, namespace) application-facing
//! handle, covering emit, acks, rooms and disconnect.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use engineioxide::{Extensions, Session};

use crate::adapter::Adapter;
use crate::operators::{Operators, RoomParam};
use crate::packet::{PacketType, SocketIoPacket};
use crate::parser::{deconstruct, Payload};

/// Calls back into the client with an ACK reply for one specific inbound
/// EVENT/BINARY_EVENT packet. Safe to invoke more than once; only the
/// first call actually reaches the wire, matching a client's assumption
/// that an ack fires once.
#[derive(Clone)]
pub struct AckSender {
    namespace: String,
    ack_id: u64,
    eio_socket: Arc<Session>,
    fired: Arc<std::sync::atomic::AtomicBool>,
}

impl AckSender {
    pub fn send(&self, args: Vec<Payload>) {
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        send_ack(&self.eio_socket, &self.namespace, self.ack_id, args);
    }
}

fn send_ack(eio_socket: &Arc<Session>, namespace: &str, ack_id: u64, args: Vec<Payload>) {
    let payload = Payload::Array(args);
    let (data, attachments) = deconstruct(&payload);
    let has_binary = !attachments.is_empty();
    let ty = if has_binary { PacketType::BinaryAck } else { PacketType::Ack };
    let packet = SocketIoPacket {
        ty,
        namespace: namespace.to_string(),
        data,
        ack_id: Some(ack_id),
        attachments_count: attachments.len(),
    };
    deliver(eio_socket, &packet, &attachments);
}

/// Encodes `packet` and its attachments as Engine.IO messages, in order.
pub fn deliver(eio_socket: &Arc<Session>, packet: &SocketIoPacket, attachments: &[Vec<u8>]) {
    eio_socket.send(engineioxide::Packet::Message(packet.encode_header()));
    for attachment in attachments {
        eio_socket.send(engineioxide::Packet::Binary(attachment.clone()));
    }
}

pub type PendingAck = Box<dyn FnOnce(Vec<Payload>) + Send>;

/// One per (Engine.IO session, namespace) pair, created on a successful
/// CONNECT.
pub struct NamespaceSocket {
    pub id: String,
    pub namespace: String,
    pub rooms: RwLock<HashSet<String>>,
    pending_acks: Mutex<std::collections::HashMap<u64, PendingAck>>,
    next_ack_id: AtomicU64,
    pub state: Extensions,
    pub eio_socket: Arc<Session>,
    adapter: Arc<dyn Adapter>,
}

impl NamespaceSocket {
    pub fn new(id: String, namespace: String, eio_socket: Arc<Session>, adapter: Arc<dyn Adapter>) -> Self {
        Self {
            id,
            namespace,
            rooms: RwLock::new(HashSet::new()),
            pending_acks: Mutex::new(std::collections::HashMap::new()),
            next_ack_id: AtomicU64::new(0),
            state: Extensions::new(),
            eio_socket,
            adapter,
        }
    }

    /// Emits an event to this specific socket. `ack` registers a
    /// callback invoked when the client's matching ACK packet arrives.
    pub fn emit(&self, event: &str, args: Vec<Payload>, ack: Option<PendingAck>) {
        let mut full_args = vec![Payload::String(event.to_string())];
        full_args.extend(args);
        let payload = Payload::Array(full_args);
        let (data, attachments) = deconstruct(&payload);
        let has_binary = !attachments.is_empty();

        let ack_id = ack.map(|cb| {
            let id = self.next_ack_id.fetch_add(1, Ordering::SeqCst);
            self.pending_acks.lock().unwrap().insert(id, cb);
            id
        });

        let packet = SocketIoPacket {
            ty: if has_binary { PacketType::BinaryEvent } else { PacketType::Event },
            namespace: self.namespace.clone(),
            data,
            ack_id,
            attachments_count: attachments.len(),
        };
        deliver(&self.eio_socket, &packet, &attachments);
    }

    /// Reserves the next ack id and stashes `callback` for
    /// [`NamespaceSocket::handle_ack`], without sending anything. Used by
    /// broadcast-style emits that build and send the packet themselves.
    pub fn register_ack(&self, callback: PendingAck) -> u64 {
        let id = self.next_ack_id.fetch_add(1, Ordering::SeqCst);
        self.pending_acks.lock().unwrap().insert(id, callback);
        id
    }

    /// Builds the `AckSender` handed to an event listener for an inbound
    /// packet that carried an ack id.
    pub fn ack_sender(self: &Arc<Self>, ack_id: u64) -> AckSender {
        AckSender {
            namespace: self.namespace.clone(),
            ack_id,
            eio_socket: self.eio_socket.clone(),
            fired: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    /// Resolves a pending ack by id, invoking its callback with the
    /// reconstructed argument list. Non-list data is wrapped into a
    /// single-element list, matching clients that ack with a bare value.
    pub fn handle_ack(&self, args: Vec<Payload>, ack_id: u64) {
        let callback = self.pending_acks.lock().unwrap().remove(&ack_id);
        if let Some(callback) = callback {
            callback(args);
        }
    }

    pub fn adapter(&self) -> Arc<dyn Adapter> {
        self.adapter.clone()
    }

    /// Starts a broadcast targeting `rooms`, excluding this socket.
    pub fn to(self: &Arc<Self>, rooms: impl RoomParam) -> Operators {
        Operators::new(self.namespace.clone(), self.adapter.clone(), Some(self.id.clone())).to(rooms)
    }

    /// Starts a broadcast targeting `rooms`, including this socket.
    pub fn within(self: &Arc<Self>, rooms: impl RoomParam) -> Operators {
        Operators::new(self.namespace.clone(), self.adapter.clone(), Some(self.id.clone())).within(rooms)
    }

    /// Starts a broadcast targeting every socket in the namespace,
    /// excluding this one.
    pub fn broadcast(self: &Arc<Self>) -> Operators {
        Operators::new(self.namespace.clone(), self.adapter.clone(), Some(self.id.clone())).broadcast()
    }

    pub fn disconnect(&self) {
        let packet = SocketIoPacket::disconnect(self.namespace.clone());
        deliver(&self.eio_socket, &packet, &[]);
    }

    /// Joins `room`, mirroring to the adapter when this socket is
    /// WebSocket-attached (only then is it a member of the shared bus).
    pub fn join(&self, room: impl Into<String>) {
        let room = room.into();
        self.rooms.write().unwrap().insert(room.clone());
        if self.eio_socket.is_websocket() {
            self.adapter.add_sockets(&self.namespace, &[room], &[self.id.clone()]);
        }
    }

    pub fn leave(&self, room: &str) {
        self.rooms.write().unwrap().remove(room);
        if self.eio_socket.is_websocket() {
            self.adapter.del_sockets(&self.namespace, &[room.to_string()], &[self.id.clone()]);
        }
    }

    pub fn leave_all(&self) {
        let rooms: Vec<String> = self.rooms.write().unwrap().drain().collect();
        if self.eio_socket.is_websocket() && !rooms.is_empty() {
            self.adapter.del_sockets(&self.namespace, &rooms, &[self.id.clone()]);
        }
    }
}

/// Group name the external bus uses for a room: `sio_<ns>_<room>` with
/// every character outside `[0-9A-Za-z_.-]` replaced by `_`, truncated to
/// 99 characters.
pub fn group_name(namespace: &str, room: &str) -> String {
    let raw = format!("sio_{namespace}_{room}");
    let sanitized: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') { c } else { '_' })
        .collect();
    sanitized.chars().take(99).collect()
}

/// Non-list ack/event data is wrapped into a single-element list, per
/// the client-tolerance rule §4.7 carries over from the original server.
pub fn as_arg_list(data: Payload) -> Vec<Payload> {
    match data {
        Payload::Array(items) => items,
        other => vec![other],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_name_sanitizes_and_truncates() {
        let name = group_name("/chat room", &"x".repeat(200));
        assert!(name.len() <= 99);
        assert!(name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')));
        assert!(name.starts_with("sio__chat_room_"));
    }

    #[test]
    fn as_arg_list_wraps_non_array_values() {
        assert_eq!(as_arg_list(Payload::String("x".into())), vec![Payload::String("x".into())]);
        assert_eq!(
            as_arg_list(Payload::Array(vec![Payload::Number(1.into()), Payload::Number(2.into())])),
            vec![Payload::Number(1.into()), Payload::Number(2.into())]
        );
    }
}
