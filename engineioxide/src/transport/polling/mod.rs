//! The HTTP long-polling transport (§4.3): handshake, GET-drain and
//! POST-ingest request handling.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use http::{Request, Response, StatusCode};
use hyper::body::{to_bytes, Body};

use crate::engine::EngineIo;
use crate::errors::{DisconnectReason, Error};
use crate::handler::{EngineIoHandler, MessageData};
use crate::packet::{decode_http_payload, OpenPacket, Packet};
use crate::sid::Sid;
use crate::transport::TransportType;

fn text_response(status: StatusCode, body: Vec<u8>) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("content-type", "text/plain; charset=UTF-8")
        .body(Body::from(body))
        .expect("static response parts are always valid")
}

/// Handles the handshake request: `GET /engine.io/?EIO=4&transport=polling`
/// with no `sid`. Creates a session and replies with its `open` packet.
pub async fn open_req<H: EngineIoHandler>(
    engine: Arc<EngineIo<H>>,
) -> Result<Response<Body>, Error> {
    let session = engine.create_session(TransportType::Polling).await;
    let open = OpenPacket::new(TransportType::Polling, session.id, &engine.config);
    let text = Packet::Open(open).encode_text()?;
    #[cfg(feature = "tracing")]
    tracing::debug!(sid = %session.id, "polling session opened");
    Ok(text_response(StatusCode::OK, text.into_bytes()))
}

/// Handles `GET /engine.io/?sid=...`: blocks for at least one packet (up
/// to `pingInterval + pingTimeout`), then returns whatever is ready as a
/// single payload. A second concurrent GET for the same session is
/// rejected and closes the session (§4.1's `concurrent_get` rule).
pub async fn polling_req<H: EngineIoHandler>(
    engine: Arc<EngineIo<H>>,
    sid: Sid,
) -> Result<Response<Body>, Error> {
    let session = engine.get_session(sid).ok_or(Error::UnknownSessionId(sid))?;
    if session.is_websocket() {
        return Err(Error::TransportMismatch);
    }
    if session.active_get.swap(true, Ordering::SeqCst) {
        engine.close_session(sid, DisconnectReason::ConcurrentGet).await;
        return Err(Error::TransportMismatch);
    }

    if session.should_send_ping(engine.config.ping_interval) {
        session.send(Packet::Ping(None));
        session.mark_ping_sent();
    }

    let payload = session
        .next_payload(engine.config.long_poll_timeout(), engine.config.max_payload)
        .await;
    session.active_get.store(false, Ordering::SeqCst);

    #[cfg(feature = "tracing")]
    tracing::debug!(sid = %sid, bytes = payload.len(), "polling response");
    Ok(text_response(StatusCode::OK, payload))
}

/// Handles `POST /engine.io/?sid=...`: decodes the body into packets and
/// dispatches each to the session/handler in order. A second concurrent
/// POST is rejected the same way a concurrent GET is.
pub async fn post_req<H: EngineIoHandler>(
    engine: Arc<EngineIo<H>>,
    sid: Sid,
    req: Request<Body>,
) -> Result<Response<Body>, Error> {
    let session = engine.get_session(sid).ok_or(Error::UnknownSessionId(sid))?;
    if session.is_websocket() {
        return Err(Error::TransportMismatch);
    }
    if session.active_post.swap(true, Ordering::SeqCst) {
        engine.close_session(sid, DisconnectReason::ConcurrentPost).await;
        return Err(Error::TransportMismatch);
    }

    let body = to_bytes(req.into_body())
        .await
        .map_err(|e| Error::Http(e.to_string()))?;
    if body.len() as u64 > engine.config.max_payload {
        session.active_post.store(false, Ordering::SeqCst);
        return Err(Error::Http("payload too large".into()));
    }

    let packets = match decode_http_payload(&body) {
        Ok(packets) => packets,
        Err(e) => {
            session.active_post.store(false, Ordering::SeqCst);
            return Err(e);
        }
    };

    for packet in packets {
        session.touch();
        match packet {
            Packet::Close => {
                session.active_post.store(false, Ordering::SeqCst);
                engine.close_session(sid, DisconnectReason::ClientClose).await;
                return Ok(text_response(StatusCode::OK, b"ok".to_vec()));
            }
            Packet::Pong(_) => session.mark_pong_received(),
            Packet::Message(text) => {
                engine.handler().on_message(session.clone(), MessageData::Text(text)).await;
            }
            Packet::Binary(data) => {
                engine.handler().on_message(session.clone(), MessageData::Binary(data)).await;
            }
            other => {
                #[cfg(feature = "tracing")]
                tracing::debug!(sid = %sid, packet = ?other, "unexpected packet on post");
                let _ = other;
            }
        }
    }

    session.active_post.store(false, Ordering::SeqCst);
    Ok(text_response(StatusCode::OK, b"ok".to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineIoConfig;
    use std::sync::Arc as StdArc;

    struct NoopHandler;

    #[async_trait::async_trait]
    impl EngineIoHandler for NoopHandler {
        async fn on_connect(&self, _socket: StdArc<crate::session::Session>) {}
        async fn on_message(&self, _socket: StdArc<crate::session::Session>, _data: MessageData) {}
        async fn on_disconnect(
            &self,
            _socket: StdArc<crate::session::Session>,
            _reason: DisconnectReason,
        ) {
        }
    }

    fn engine() -> Arc<EngineIo<NoopHandler>> {
        Arc::new(EngineIo::new(EngineIoConfig::default(), NoopHandler))
    }

    #[tokio::test]
    async fn open_req_creates_a_session_and_returns_its_open_packet() {
        let engine = engine();
        let resp = open_req(engine.clone()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(engine.session_count(), 1);
    }

    #[tokio::test]
    async fn polling_req_on_unknown_sid_errors() {
        let engine = engine();
        let err = polling_req(engine, Sid::new()).await.unwrap_err();
        assert!(matches!(err, Error::UnknownSessionId(_)));
    }

    #[tokio::test]
    async fn concurrent_get_closes_the_session() {
        let engine = engine();
        let session = engine.create_session(TransportType::Polling).await;
        session.active_get.store(true, Ordering::SeqCst);
        let err = polling_req(engine.clone(), session.id).await.unwrap_err();
        assert!(matches!(err, Error::TransportMismatch));
        assert!(engine.get_session(session.id).is_none());
    }

    #[tokio::test]
    async fn post_close_packet_closes_the_session() {
        let engine = engine();
        let session = engine.create_session(TransportType::Polling).await;
        let req = Request::builder()
            .body(Body::from("1"))
            .unwrap();
        let resp = post_req(engine.clone(), session.id, req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(engine.get_session(session.id).is_none());
    }

    #[tokio::test]
    async fn post_message_reaches_the_handler_via_polling_response() {
        let engine = engine();
        let session = engine.create_session(TransportType::Polling).await;
        session.send(Packet::Message("echo".into()));
        let resp = polling_req(engine, session.id).await.unwrap();
        let body = to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(body.as_ref(), b"4echo");
    }
}
