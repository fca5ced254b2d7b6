//! [`EngineIo`]: the orchestration handle tying together configuration,
//! the session registry and the application handler.

use std::sync::Arc;

use crate::config::EngineIoConfig;
use crate::errors::DisconnectReason;
use crate::handler::EngineIoHandler;
use crate::packet::Packet;
use crate::registry::SessionRegistry;
use crate::session::Session;
use crate::sid::Sid;
use crate::transport::TransportType;

/// Bundles the pieces every request-handling task needs: configuration,
/// the live-session table, and the application callbacks.
///
/// Cloning is cheap; every field is itself reference-counted or `Copy`.
pub struct EngineIo<H: EngineIoHandler> {
    pub config: EngineIoConfig,
    registry: SessionRegistry,
    handler: Arc<H>,
}

impl<H: EngineIoHandler> EngineIo<H> {
    pub fn new(config: EngineIoConfig, handler: H) -> Self {
        Self {
            config,
            registry: SessionRegistry::new(),
            handler: Arc::new(handler),
        }
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    /// Creates and registers a new session, then fires `on_connect`.
    pub async fn create_session(&self, transport: TransportType) -> Arc<Session> {
        let session = self.registry.create(transport);
        #[cfg(feature = "tracing")]
        tracing::debug!(sid = %session.id, ?transport, "session created");
        self.handler.on_connect(session.clone()).await;
        session
    }

    pub fn get_session(&self, sid: Sid) -> Option<Arc<Session>> {
        self.registry.get(sid)
    }

    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// Closes a session exactly once: latches it closed, wakes any
    /// blocked long poll with a final payload, detaches any WebSocket,
    /// fires `on_disconnect`, then removes it from the registry.
    ///
    /// Safe to call from both the HTTP close path and the WebSocket close
    /// path racing each other — only the caller that wins the latch runs
    /// the side effects. `on_disconnect` runs before the registry removal
    /// so a handler that calls `get_session` on the id it was just handed
    /// still finds it.
    pub async fn close_session(&self, sid: Sid, reason: DisconnectReason) {
        let Some(session) = self.registry.get(sid) else {
            return;
        };
        if !session.latch_closed() {
            return;
        }
        session.enqueue_poll_only(Packet::Noop);
        session.detach_websocket();
        #[cfg(feature = "tracing")]
        tracing::debug!(sid = %sid, %reason, "session closed");
        self.handler.on_disconnect(session, reason).await;
        self.registry.destroy(sid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::MessageData;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        connects: AtomicUsize,
        disconnects: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl EngineIoHandler for CountingHandler {
        async fn on_connect(&self, _socket: Arc<Session>) {
            self.connects.fetch_add(1, Ordering::SeqCst);
        }
        async fn on_message(&self, _socket: Arc<Session>, _data: MessageData) {}
        async fn on_disconnect(&self, _socket: Arc<Session>, _reason: DisconnectReason) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn close_session_runs_disconnect_hook_exactly_once() {
        let engine = EngineIo::new(
            EngineIoConfig::default(),
            CountingHandler {
                connects: AtomicUsize::new(0),
                disconnects: AtomicUsize::new(0),
            },
        );
        let session = engine.create_session(TransportType::Polling).await;
        assert_eq!(engine.handler().connects.load(Ordering::SeqCst), 1);

        engine.close_session(session.id, DisconnectReason::ServerClose).await;
        engine.close_session(session.id, DisconnectReason::ServerClose).await;

        assert_eq!(engine.handler().disconnects.load(Ordering::SeqCst), 1);
        assert!(engine.get_session(session.id).is_none());
    }
}
