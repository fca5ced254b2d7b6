//! The per-connection [`Session`] (C3): transport, outbound queue,
//! heartbeat timers and concurrency guards.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Notify};

use crate::errors::Error;
use crate::extensions::Extensions;
use crate::packet::Packet;
use crate::sid::Sid;
use crate::transport::TransportType;

/// The outbound queue used by the HTTP long-polling transport.
///
/// Packets enqueued here wait for the next `GET` to drain them. A
/// WebSocket upgrade atomically flips [`Session::transport`] and drains
/// this queue under the same lock, so no packet can be appended here
/// after the drain and lost (see [`Session::upgrade_to_websocket`]).
#[derive(Default)]
struct PollQueue {
    items: Mutex<VecDeque<Packet>>,
    notify: Notify,
}

/// Sender half used to forward packets directly to an attached WebSocket
/// connection's write task.
pub type WsSender = mpsc::UnboundedSender<Packet>;

/// A single logical Engine.IO connection.
pub struct Session {
    pub id: Sid,
    transport: AtomicU8,
    ws_tx: Mutex<Option<WsSender>>,
    poll_queue: PollQueue,
    pub active_get: AtomicBool,
    pub active_post: AtomicBool,
    last_seen: Mutex<Instant>,
    last_ping_sent: Mutex<Option<Instant>>,
    last_pong: Mutex<Instant>,
    closed: AtomicBool,
    /// Arbitrary application state, e.g. the Socket.IO layer's per-sid
    /// parser, or a consumer-attached user object.
    pub extensions: Extensions,
}

const POLLING: u8 = 0;
const WEBSOCKET: u8 = 1;

impl Session {
    pub fn new(id: Sid, transport: TransportType) -> Self {
        let now = Instant::now();
        Self {
            id,
            transport: AtomicU8::new(transport_tag(transport)),
            ws_tx: Mutex::new(None),
            poll_queue: PollQueue::default(),
            active_get: AtomicBool::new(false),
            active_post: AtomicBool::new(false),
            last_seen: Mutex::new(now),
            last_ping_sent: Mutex::new(None),
            last_pong: Mutex::new(now),
            closed: AtomicBool::new(false),
            extensions: Extensions::new(),
        }
    }

    pub fn transport(&self) -> TransportType {
        match self.transport.load(Ordering::SeqCst) {
            WEBSOCKET => TransportType::Websocket,
            _ => TransportType::Polling,
        }
    }

    pub fn is_websocket(&self) -> bool {
        self.transport() == TransportType::Websocket
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Attaches a WebSocket write-task sender. Fails if one is already
    /// attached: at most one WebSocket may be bound to a session.
    pub fn attach_websocket(&self, tx: WsSender) -> Result<(), Error> {
        let mut slot = self.ws_tx.lock().unwrap();
        if slot.is_some() {
            return Err(Error::AlreadyUpgraded);
        }
        *slot = Some(tx);
        Ok(())
    }

    /// Detaches the WebSocket sender, e.g. on disconnect.
    pub fn detach_websocket(&self) {
        self.ws_tx.lock().unwrap().take();
    }

    /// Completes the polling→WebSocket upgrade: flips the transport flag
    /// and drains any segments queued for HTTP delivery, in order, under
    /// one critical section so no in-flight [`Session::send`] can land in
    /// the queue after the drain and be forgotten.
    pub fn upgrade_to_websocket(&self) -> Vec<Packet> {
        let mut items = self.poll_queue.items.lock().unwrap();
        self.transport.store(WEBSOCKET, Ordering::SeqCst);
        items.drain(..).collect()
    }

    /// Creates a brand-new WebSocket-initiated session, which starts
    /// already in the `websocket` transport state.
    pub fn new_websocket(id: Sid, tx: WsSender) -> Self {
        let session = Self::new(id, TransportType::Websocket);
        *session.ws_tx.lock().unwrap() = Some(tx);
        session
    }

    /// Delivers a packet to the client: directly over the attached
    /// WebSocket if the session has completed its transport upgrade,
    /// otherwise queued for the next long-poll GET. No-op once closed.
    pub fn send(&self, packet: Packet) {
        if self.is_closed() {
            return;
        }
        let mut items = self.poll_queue.items.lock().unwrap();
        if self.transport.load(Ordering::SeqCst) == WEBSOCKET {
            let tx = self.ws_tx.lock().unwrap().clone();
            drop(items);
            if let Some(tx) = tx {
                let _ = tx.send(packet);
            }
        } else {
            items.push_back(packet);
            drop(items);
            self.poll_queue.notify.notify_one();
        }
    }

    /// Blocks up to `timeout` for at least one packet, then drains every
    /// currently-ready packet into a single HTTP payload bounded by
    /// `max_payload` bytes (§4.1's payload assembly contract).
    pub async fn next_payload(&self, timeout: Duration, max_payload: u64) -> Vec<u8> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_closed() {
                return Vec::new();
            }
            if !self.poll_queue.items.lock().unwrap().is_empty() {
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Vec::new();
            }
            if tokio::time::timeout(remaining, self.poll_queue.notify.notified())
                .await
                .is_err()
            {
                return Vec::new();
            }
        }
        self.drain_payload(max_payload)
    }

    /// Non-blocking drain honoring the `max_payload` contract: segments
    /// that would overflow are pushed back to the head of the queue.
    fn drain_payload(&self, max_payload: u64) -> Vec<u8> {
        let mut items = self.poll_queue.items.lock().unwrap();
        let mut out = String::new();
        let mut total: u64 = 0;
        let mut taken = 0usize;
        for packet in items.iter() {
            let segment = match packet.encode_http_segment() {
                Ok(s) => s,
                Err(_) => {
                    taken += 1;
                    continue;
                }
            };
            let piece_len = segment.len() as u64 + if out.is_empty() { 0 } else { 1 };
            if total + piece_len > max_payload {
                break;
            }
            if !out.is_empty() {
                out.push(crate::packet::RECORD_SEPARATOR);
            }
            out.push_str(&segment);
            total += piece_len;
            taken += 1;
        }
        items.drain(..taken);
        out.into_bytes()
    }

    /// Enqueues a packet for HTTP delivery even when already on the
    /// WebSocket transport (used to push a final `noop` to any long poll
    /// still blocked after an upgrade — see §4.4).
    pub fn enqueue_poll_only(&self, packet: Packet) {
        if self.is_closed() {
            return;
        }
        self.poll_queue.items.lock().unwrap().push_back(packet);
        self.poll_queue.notify.notify_one();
    }

    pub fn touch(&self) {
        *self.last_seen.lock().unwrap() = Instant::now();
    }

    pub fn mark_ping_sent(&self) {
        *self.last_ping_sent.lock().unwrap() = Some(Instant::now());
    }

    pub fn mark_pong_received(&self) {
        *self.last_pong.lock().unwrap() = Instant::now();
    }

    pub fn last_ping_sent(&self) -> Option<Instant> {
        *self.last_ping_sent.lock().unwrap()
    }

    pub fn should_send_ping(&self, ping_interval: Duration) -> bool {
        if self.is_closed() {
            return false;
        }
        match self.last_ping_sent() {
            None => true,
            Some(at) => at.elapsed() >= ping_interval,
        }
    }

    pub fn last_pong(&self) -> Instant {
        *self.last_pong.lock().unwrap()
    }

    /// Latches the session closed. Idempotent: returns `true` only the
    /// first time it is called, so callers can run close side effects
    /// exactly once.
    pub fn latch_closed(&self) -> bool {
        self.closed.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok()
    }
}

fn transport_tag(t: TransportType) -> u8 {
    match t {
        TransportType::Polling => POLLING,
        TransportType::Websocket => WEBSOCKET,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(Sid::new(), TransportType::Polling)
    }

    #[tokio::test]
    async fn closed_session_rejects_enqueue_and_returns_empty_payload() {
        let s = session();
        s.latch_closed();
        s.send(Packet::Message("hi".into()));
        let payload = s.next_payload(Duration::from_millis(10), 1_000_000).await;
        assert!(payload.is_empty());
    }

    #[tokio::test]
    async fn next_payload_respects_max_payload_and_keeps_overflow_at_head() {
        let s = session();
        s.send(Packet::Message("a".repeat(10)));
        s.send(Packet::Message("b".repeat(10)));

        // First segment alone ("4" + 10 a's = 11 bytes) fits under 11,
        // but together with RS + second segment it would not.
        let payload = s.next_payload(Duration::from_millis(10), 11).await;
        assert_eq!(payload, format!("4{}", "a".repeat(10)).into_bytes());

        // Raising the limit lets the second segment through next time.
        let payload2 = s.next_payload(Duration::from_millis(10), 1_000_000).await;
        assert_eq!(payload2, format!("4{}", "b".repeat(10)).into_bytes());
    }

    #[tokio::test]
    async fn oversized_first_segment_is_not_dropped() {
        let s = session();
        s.send(Packet::Message("x".repeat(100)));
        let empty = s.next_payload(Duration::from_millis(10), 5).await;
        assert!(empty.is_empty());
        // Raising the limit reveals the segment was preserved.
        let payload = s.next_payload(Duration::from_millis(10), 1_000_000).await;
        assert_eq!(payload, format!("4{}", "x".repeat(100)).into_bytes());
    }

    #[tokio::test]
    async fn next_payload_times_out_empty_when_nothing_queued() {
        let s = session();
        let payload = s.next_payload(Duration::from_millis(5), 1_000).await;
        assert!(payload.is_empty());
    }

    #[test]
    fn should_send_ping_flips_after_interval_elapses() {
        let s = session();
        assert!(s.should_send_ping(Duration::from_millis(0)));
        s.mark_ping_sent();
        assert!(!s.should_send_ping(Duration::from_secs(10)));
    }

    #[test]
    fn latch_closed_is_idempotent() {
        let s = session();
        assert!(s.latch_closed());
        assert!(!s.latch_closed());
    }

    #[test]
    fn second_websocket_attachment_is_refused() {
        let s = session();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        assert!(s.attach_websocket(tx1).is_ok());
        assert!(s.attach_websocket(tx2).is_err());
    }

    #[test]
    fn upgrade_drains_queued_segments_in_order() {
        let s = session();
        s.send(Packet::Message("one".into()));
        s.send(Packet::Message("two".into()));
        let drained = s.upgrade_to_websocket();
        assert_eq!(
            drained,
            vec![
                Packet::Message("one".into()),
                Packet::Message("two".into())
            ]
        );
        assert!(s.is_websocket());
    }
}
