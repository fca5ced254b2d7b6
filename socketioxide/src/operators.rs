//! [`Operators`]: the broadcast-target builder returned by
//! `socket.to(...)`/`io.of(ns).to(...)`-style calls.

use std::sync::Arc;
use std::time::Duration;

use itertools::Itertools;
use tokio::sync::oneshot;
use tokio::time::timeout as tokio_timeout;

use crate::adapter::Adapter;
use crate::errors::AckError;
use crate::packet::{PacketType, SocketIoPacket};
use crate::parser::{deconstruct, Payload};
use crate::socket::{deliver, NamespaceSocket};

pub type Room = String;

/// Implemented by anything that can be turned into a list of room names:
/// a single `&str`/`String`, or a collection of them.
pub trait RoomParam: 'static {
    type IntoIter: Iterator<Item = Room>;
    fn into_room_iter(self) -> Self::IntoIter;
}

impl RoomParam for Room {
    type IntoIter = std::iter::Once<Room>;
    fn into_room_iter(self) -> Self::IntoIter {
        std::iter::once(self)
    }
}
impl RoomParam for &'static str {
    type IntoIter = std::iter::Once<Room>;
    fn into_room_iter(self) -> Self::IntoIter {
        std::iter::once(self.to_string())
    }
}
impl RoomParam for Vec<Room> {
    type IntoIter = std::vec::IntoIter<Room>;
    fn into_room_iter(self) -> Self::IntoIter {
        self.into_iter()
    }
}
impl<const COUNT: usize> RoomParam for [&'static str; COUNT] {
    type IntoIter = std::iter::Map<std::array::IntoIter<&'static str, COUNT>, fn(&'static str) -> Room>;
    fn into_room_iter(self) -> Self::IntoIter {
        self.into_iter().map(|s| s.to_string())
    }
}

/// Selects a set of sockets within a namespace to emit to, join/leave a
/// room, or disconnect.
pub struct Operators {
    namespace: String,
    adapter: Arc<dyn Adapter>,
    rooms: Vec<Room>,
    except: Vec<Room>,
    /// The socket this builder was created from, if any (`socket.to(...)`
    /// excludes it by default; `socket.within(...)` keeps it in).
    origin: Option<String>,
    exclude_origin: bool,
    binary: Vec<Vec<u8>>,
    timeout: Duration,
}

impl Operators {
    pub(crate) fn new(namespace: String, adapter: Arc<dyn Adapter>, origin: Option<String>) -> Self {
        Self {
            namespace,
            adapter,
            rooms: Vec::new(),
            except: Vec::new(),
            origin,
            exclude_origin: false,
            binary: Vec::new(),
            timeout: Duration::from_secs(5),
        }
    }

    /// Targets `rooms`, excluding the originating socket (if any).
    pub fn to(mut self, rooms: impl RoomParam) -> Self {
        self.rooms.extend(rooms.into_room_iter().unique());
        self.exclude_origin = true;
        self
    }

    /// Targets `rooms`, including the originating socket.
    pub fn within(mut self, rooms: impl RoomParam) -> Self {
        self.rooms.extend(rooms.into_room_iter().unique());
        self
    }

    /// Excludes `rooms`' members from whatever was already selected.
    pub fn except(mut self, rooms: impl RoomParam) -> Self {
        self.except.extend(rooms.into_room_iter().unique());
        self
    }

    /// No-op with a single-process [`LocalAdapter`](crate::adapter::LocalAdapter);
    /// kept for call-site parity with deployments backed by a real bus.
    pub fn local(self) -> Self {
        self
    }

    /// Targets every socket in the namespace, excluding the originating
    /// one (if any).
    pub fn broadcast(mut self) -> Self {
        self.exclude_origin = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn bin(mut self, binary: Vec<Vec<u8>>) -> Self {
        self.binary = binary;
        self
    }

    fn targets(&self) -> Vec<Arc<NamespaceSocket>> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        let rooms: Vec<Option<&str>> = if self.rooms.is_empty() {
            vec![None]
        } else {
            self.rooms.iter().map(|r| Some(r.as_str())).collect()
        };
        for room in rooms {
            for socket in self.adapter.fetch_sockets(&self.namespace, room) {
                if seen.insert(socket.id.clone()) {
                    out.push(socket);
                }
            }
        }
        let excluded: std::collections::HashSet<String> = self
            .except
            .iter()
            .flat_map(|room| self.adapter.fetch_sockets(&self.namespace, Some(room)))
            .map(|s| s.id.clone())
            .collect();
        out.into_iter()
            .filter(|s| !excluded.contains(&s.id))
            .filter(|s| !(self.exclude_origin && self.origin.as_deref() == Some(s.id.as_str())))
            .collect()
    }

    fn build_packet(&mut self, event: impl Into<String>, data: impl serde::Serialize) -> Result<(SocketIoPacket, Vec<Vec<u8>>), serde_json::Error> {
        let value = serde_json::to_value(data)?;
        let mut args = vec![Payload::String(event.into())];
        args.push(Payload::from(value));
        for bytes in std::mem::take(&mut self.binary) {
            args.push(Payload::Bytes(bytes));
        }
        let (template, attachments) = deconstruct(&Payload::Array(args));
        let has_binary = !attachments.is_empty();
        let packet = SocketIoPacket {
            ty: if has_binary { PacketType::BinaryEvent } else { PacketType::Event },
            namespace: self.namespace.clone(),
            data: template,
            ack_id: None,
            attachments_count: attachments.len(),
        };
        Ok((packet, attachments))
    }

    /// Emits to every socket matched by the selectors above.
    pub fn emit(mut self, event: impl Into<String>, data: impl serde::Serialize) -> Result<(), serde_json::Error> {
        let (packet, attachments) = self.build_packet(event, data)?;
        let room = self.rooms.first().cloned();
        let except: Vec<String> = self
            .except
            .iter()
            .flat_map(|r| self.adapter.fetch_sockets(&self.namespace, Some(r)))
            .map(|s| s.id.clone())
            .chain(self.exclude_origin.then(|| self.origin.clone()).flatten())
            .collect();
        if self.rooms.len() <= 1 {
            self.adapter.broadcast(&self.namespace, room.as_deref(), &except, &packet, &attachments);
        } else {
            for socket in self.targets() {
                deliver(&socket.eio_socket, &packet, &attachments);
            }
        }
        Ok(())
    }

    /// Emits and waits (up to `timeout()`, 5s by default) for each
    /// targeted socket's ack, in no particular order.
    pub async fn emit_with_ack(mut self, event: impl Into<String>, data: impl serde::Serialize) -> Result<Vec<Result<Vec<Payload>, AckError>>, serde_json::Error> {
        let targets = self.targets();
        let (packet, attachments) = self.build_packet(event, data)?;
        let dur = self.timeout;

        let mut receivers = Vec::with_capacity(targets.len());
        for socket in &targets {
            let (tx, rx) = oneshot::channel();
            let ack_id = socket.register_ack(Box::new(move |args| {
                let _ = tx.send(args);
            }));
            let mut packet = packet.clone();
            packet.ack_id = Some(ack_id);
            deliver(&socket.eio_socket, &packet, &attachments);
            receivers.push(rx);
        }

        let mut results = Vec::with_capacity(receivers.len());
        for rx in receivers {
            let result = match tokio_timeout(dur, rx).await {
                Ok(Ok(args)) => Ok(args),
                Ok(Err(_)) => Err(AckError::Disconnected),
                Err(_) => Err(AckError::Timeout),
            };
            results.push(result);
        }
        Ok(results)
    }

    pub fn sockets(self) -> Vec<Arc<NamespaceSocket>> {
        self.targets()
    }

    pub fn disconnect(self) {
        for socket in self.targets() {
            socket.disconnect();
        }
    }

    pub fn join(self, rooms: impl RoomParam) {
        let rooms: Vec<Room> = rooms.into_room_iter().collect();
        for socket in self.targets() {
            for room in &rooms {
                socket.join(room.clone());
            }
        }
    }

    pub fn leave(self, rooms: impl RoomParam) {
        let rooms: Vec<Room> = rooms.into_room_iter().collect();
        for socket in self.targets() {
            for room in &rooms {
                socket.leave(room);
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

    fn make_socket(namespace: &str, id: &str, adapter: Arc<dyn Adapter>) -> Arc<NamespaceSocket> {
        let eio = Arc::new(Session::new(Sid::new(), TransportType::Websocket));
        Arc::new(NamespaceSocket::new(id.to_string(), namespace.to_string(), eio, adapter))
    }

    #[test]
    fn to_excludes_the_originating_socket_by_default() {
        let registry = Arc::new(DashMap::new());
        let adapter: Arc<dyn Adapter> = Arc::new(LocalAdapter::new(registry.clone()));
        let a = make_socket("/", "a", adapter.clone());
        let b = make_socket("/", "b", adapter.clone());
        registry.insert(("/".to_string(), "a".to_string()), a.clone());
        registry.insert(("/".to_string(), "b".to_string()), b.clone());
        adapter.add_sockets("/", &["room1".to_string()], &["a".to_string(), "b".to_string()]);

        let ops = Operators::new("/".to_string(), adapter, Some("a".to_string())).to("room1".to_string());
        let targets = ops.targets();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].id, "b");
    }

    #[test]
    fn within_keeps_the_originating_socket() {
        let registry = Arc::new(DashMap::new());
        let adapter: Arc<dyn Adapter> = Arc::new(LocalAdapter::new(registry.clone()));
        let a = make_socket("/", "a", adapter.clone());
        registry.insert(("/".to_string(), "a".to_string()), a.clone());
        adapter.add_sockets("/", &["room1".to_string()], &["a".to_string()]);

        let ops = Operators::new("/".to_string(), adapter, Some("a".to_string())).within("room1".to_string());
        assert_eq!(ops.targets().len(), 1);
    }
}
