//! [`Adapter`]: the abstract room/broadcast bus (§4.6's "group bus").
//!
//! Only the interface is specified; a real deployment would back this
//! with a pub/sub system shared across processes. [`LocalAdapter`] is
//! the single-process implementation used when no external bus is
//! configured.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;

use crate::packet::SocketIoPacket;
use crate::socket::{deliver, group_name, NamespaceSocket};

/// Keyed by `(namespace, ns_socket id)`.
pub type SocketRegistry = Arc<DashMap<(String, String), Arc<NamespaceSocket>>>;

/// Room/broadcast fan-out, abstracted over whatever pub/sub bus backs
/// it. `namespace` scopes every operation; room and socket identifiers
/// are otherwise opaque strings.
pub trait Adapter: Send + Sync {
    fn add_sockets(&self, namespace: &str, rooms: &[String], socket_ids: &[String]);
    fn del_sockets(&self, namespace: &str, rooms: &[String], socket_ids: &[String]);

    /// Delivers `packet`/`attachments` to every socket in `room` (or
    /// every socket in the namespace if `room` is `None`), excluding
    /// `except`.
    fn broadcast(
        &self,
        namespace: &str,
        room: Option<&str>,
        except: &[String],
        packet: &SocketIoPacket,
        attachments: &[Vec<u8>],
    );

    /// Same delivery as `broadcast`, returning the ids it reached so the
    /// caller can track outstanding acks.
    fn broadcast_with_ack(
        &self,
        namespace: &str,
        room: Option<&str>,
        except: &[String],
        packet: &SocketIoPacket,
        attachments: &[Vec<u8>],
    ) -> Vec<String>;

    fn disconnect_socket(&self, namespace: &str, room: Option<&str>, except: &[String]);

    fn fetch_sockets(&self, namespace: &str, room: Option<&str>) -> Vec<Arc<NamespaceSocket>>;
}

/// In-process room membership plus direct delivery, for deployments with
/// a single server instance.
pub struct LocalAdapter {
    /// `(namespace, group_name(namespace, room)) -> socket ids`. The room
    /// half of the key is always sanitized through [`group_name`] so every
    /// caller (direct join/leave, broadcast targeting) lands on the same
    /// key regardless of how it spelled the raw room string.
    rooms: DashMap<(String, String), HashSet<String>>,
    sockets: SocketRegistry,
}

impl LocalAdapter {
    pub fn new(sockets: SocketRegistry) -> Self {
        Self {
            rooms: DashMap::new(),
            sockets,
        }
    }

    fn members(&self, namespace: &str, room: &str) -> Vec<String> {
        self.rooms
            .get(&(namespace.to_string(), group_name(namespace, room)))
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn namespace_sockets(&self, namespace: &str) -> Vec<Arc<NamespaceSocket>> {
        self.sockets
            .iter()
            .filter(|entry| entry.key().0 == namespace)
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn resolve(&self, namespace: &str, room: Option<&str>, except: &[String]) -> Vec<Arc<NamespaceSocket>> {
        let candidates = match room {
            Some(room) => self
                .members(namespace, room)
                .into_iter()
                .filter_map(|id| self.sockets.get(&(namespace.to_string(), id)).map(|e| e.value().clone()))
                .collect(),
            None => self.namespace_sockets(namespace),
        };
        candidates
            .into_iter()
            .filter(|socket| !except.contains(&socket.id))
            .collect()
    }
}

impl Adapter for LocalAdapter {
    fn add_sockets(&self, namespace: &str, rooms: &[String], socket_ids: &[String]) {
        for room in rooms {
            let mut entry = self
                .rooms
                .entry((namespace.to_string(), group_name(namespace, room)))
                .or_default();
            entry.extend(socket_ids.iter().cloned());
        }
    }

    fn del_sockets(&self, namespace: &str, rooms: &[String], socket_ids: &[String]) {
        for room in rooms {
            if let Some(mut set) = self.rooms.get_mut(&(namespace.to_string(), group_name(namespace, room))) {
                for id in socket_ids {
                    set.remove(id);
                }
            }
        }
    }

    fn broadcast(
        &self,
        namespace: &str,
        room: Option<&str>,
        except: &[String],
        packet: &SocketIoPacket,
        attachments: &[Vec<u8>],
    ) {
        for socket in self.resolve(namespace, room, except) {
            deliver(&socket.eio_socket, packet, attachments);
        }
    }

    fn broadcast_with_ack(
        &self,
        namespace: &str,
        room: Option<&str>,
        except: &[String],
        packet: &SocketIoPacket,
        attachments: &[Vec<u8>],
    ) -> Vec<String> {
        let targets = self.resolve(namespace, room, except);
        for socket in &targets {
            deliver(&socket.eio_socket, packet, attachments);
        }
        targets.into_iter().map(|s| s.id.clone()).collect()
    }

    fn disconnect_socket(&self, namespace: &str, room: Option<&str>, except: &[String]) {
        for socket in self.resolve(namespace, room, except) {
            socket.disconnect();
        }
    }

    fn fetch_sockets(&self, namespace: &str, room: Option<&str>) -> Vec<Arc<NamespaceSocket>> {
        self.resolve(namespace, room, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engineioxide::{Session, Sid, TransportType};

    fn socket(namespace: &str, id: &str) -> Arc<NamespaceSocket> {
        let eio = Arc::new(Session::new(Sid::new(), TransportType::Websocket));
        Arc::new(NamespaceSocket::new(
            id.to_string(),
            namespace.to_string(),
            eio,
            Arc::new(LocalAdapter::new(Arc::new(DashMap::new()))),
        ))
    }

    #[test]
    fn room_membership_scopes_broadcast_targets() {
        let registry: SocketRegistry = Arc::new(DashMap::new());
        let a = socket("/", "a");
        let b = socket("/", "b");
        registry.insert(("/".to_string(), "a".to_string()), a.clone());
        registry.insert(("/".to_string(), "b".to_string()), b.clone());

        let adapter = LocalAdapter::new(registry);
        adapter.add_sockets("/", &["room1".to_string()], &["a".to_string()]);

        let fetched = adapter.fetch_sockets("/", Some("room1"));
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].id, "a");
    }

    #[test]
    fn del_sockets_removes_membership() {
        let registry: SocketRegistry = Arc::new(DashMap::new());
        let a = socket("/", "a");
        registry.insert(("/".to_string(), "a".to_string()), a);
        let adapter = LocalAdapter::new(registry);
        adapter.add_sockets("/", &["room1".to_string()], &["a".to_string()]);
        adapter.del_sockets("/", &["room1".to_string()], &["a".to_string()]);
        assert!(adapter.fetch_sockets("/", Some("room1")).is_empty());
    }

    #[test]
    fn except_list_excludes_targets() {
        let registry: SocketRegistry = Arc::new(DashMap::new());
        let a = socket("/", "a");
        let b = socket("/", "b");
        registry.insert(("/".to_string(), "a".to_string()), a);
        registry.insert(("/".to_string(), "b".to_string()), b);
        let adapter = LocalAdapter::new(registry);
        let fetched = adapter.resolve("/", None, &["a".to_string()]);
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].id, "b");
    }
}
