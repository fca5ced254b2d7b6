//! The WebSocket transport (§4.4): accept, upgrade-probe, frame dispatch
//! and the per-connection server heartbeat loop.

use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use http::{Request, Response, StatusCode};
use hyper::upgrade::Upgraded;
use hyper::Body;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::{handshake::derive_accept_key, protocol::Role, Message};
use tokio_tungstenite::WebSocketStream;

use crate::engine::EngineIo;
use crate::errors::{DisconnectReason, Error};
use crate::handler::{EngineIoHandler, MessageData};
use crate::packet::{OpenPacket, Packet, PingData};
use crate::session::Session;
use crate::sid::Sid;
use crate::transport::TransportType;

/// Upgrades an incoming HTTP request to a WebSocket connection and spawns
/// the connection task. `sid` is `Some` when this is an upgrade from an
/// existing polling session, `None` for a WebSocket-only connection.
pub fn new_req<H: EngineIoHandler>(
    engine: Arc<EngineIo<H>>,
    sid: Option<Sid>,
    req: Request<Body>,
) -> Result<Response<Body>, Error> {
    let key = req
        .headers()
        .get("sec-websocket-key")
        .ok_or_else(|| Error::WebsocketError("missing Sec-WebSocket-Key".into()))?
        .clone();

    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                if let Err(_e) = run_connection(engine, upgraded, sid).await {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(error = ?_e, "websocket connection ended with error");
                }
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %_e, "websocket upgrade failed");
            }
        }
    });

    let accept = derive_accept_key(key.as_bytes());
    Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header("connection", "Upgrade")
        .header("upgrade", "websocket")
        .header("sec-websocket-accept", accept)
        .body(Body::empty())
        .map_err(|e| Error::Http(e.to_string()))
}

async fn run_connection<H: EngineIoHandler>(
    engine: Arc<EngineIo<H>>,
    upgraded: Upgraded,
    sid: Option<Sid>,
) -> Result<(), Error> {
    let mut ws = WebSocketStream::from_raw_socket(upgraded, Role::Server, None).await;

    let session = match sid {
        Some(sid) => {
            let session = engine.get_session(sid).ok_or(Error::UnknownSessionId(sid))?;
            if session.is_websocket() {
                return Err(Error::AlreadyUpgraded);
            }
            run_upgrade_probe(&session, &mut ws).await?;
            session
        }
        None => {
            let session = engine.create_session(TransportType::Websocket).await;
            let open = OpenPacket::new(TransportType::Websocket, session.id, &engine.config);
            ws.send(Message::Text(Packet::Open(open).encode_text()?)).await.map_err(ws_err)?;
            session
        }
    };

    let (sink, mut stream) = ws.split();
    let (tx, rx) = mpsc::unbounded_channel();
    session
        .attach_websocket(tx.clone())
        .map_err(|_| Error::AlreadyUpgraded)?;

    let writer = tokio::spawn(forward_to_socket(sink, rx));
    let timeout_notify = Arc::new(Notify::new());
    let heartbeat = tokio::spawn(heartbeat_loop(
        engine.clone(),
        session.clone(),
        tx.clone(),
        timeout_notify.clone(),
    ));

    engine.handler().on_connect(session.clone()).await;

    let reason = loop {
        let frame = tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(frame)) => frame,
                Some(Err(_)) | None => break DisconnectReason::WebsocketDisconnect,
            },
            _ = timeout_notify.notified() => break DisconnectReason::WebsocketDisconnect,
        };
        session.touch();
        let packet = match frame {
            Message::Text(text) => Packet::decode_ws_text(&text),
            Message::Binary(data) => Packet::decode_ws_binary(&data),
            Message::Close(_) => break DisconnectReason::ClientClose,
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
        };
        match packet {
            Ok(Packet::Ping(Some(PingData::Text(ref probe)))) if probe == "probe" => {
                let pong = Packet::Pong(Some(PingData::Text("probe".into())));
                let _ = tx.send(pong);
            }
            Ok(Packet::Ping(data)) => {
                let _ = tx.send(Packet::Pong(data));
            }
            Ok(Packet::Pong(_)) => session.mark_pong_received(),
            Ok(Packet::Upgrade) => {
                let drained = session.upgrade_to_websocket();
                for packet in drained {
                    let _ = tx.send(packet);
                }
                session.enqueue_poll_only(Packet::Noop);
            }
            Ok(Packet::Message(text)) => {
                engine.handler().on_message(session.clone(), MessageData::Text(text)).await;
            }
            Ok(Packet::Binary(data)) => {
                engine.handler().on_message(session.clone(), MessageData::Binary(data)).await;
            }
            Ok(Packet::Close) => break DisconnectReason::ClientClose,
            Ok(_) | Err(_) => continue,
        }
    };

    heartbeat.abort();
    engine.close_session(session.id, reason).await;
    writer.abort();
    Ok(())
}

/// Runs the `2probe`/`3probe` handshake, then waits for the client's `5`
/// upgrade packet and flips the session's transport, draining the polling
/// out-queue onto the new WebSocket in order.
async fn run_upgrade_probe(
    session: &Arc<Session>,
    ws: &mut WebSocketStream<Upgraded>,
) -> Result<(), Error> {
    let msg = ws.next().await.ok_or_else(|| Error::WebsocketError("stream closed before probe".into()))?;
    let text = match msg.map_err(ws_err)? {
        Message::Text(t) => t,
        _ => return Err(Error::WebsocketError("expected probe ping".into())),
    };
    match Packet::decode_ws_text(&text)? {
        Packet::Ping(Some(PingData::Text(ref probe))) if probe == "probe" => {
            let pong = Packet::Pong(Some(PingData::Text("probe".into())));
            ws.send(Message::Text(pong.encode_text()?)).await.map_err(ws_err)?;
        }
        _ => return Err(Error::WebsocketError("expected probe ping".into())),
    }

    let msg = ws.next().await.ok_or_else(|| Error::WebsocketError("stream closed before upgrade".into()))?;
    let text = match msg.map_err(ws_err)? {
        Message::Text(t) => t,
        _ => return Err(Error::WebsocketError("expected upgrade packet".into())),
    };
    match Packet::decode_ws_text(&text)? {
        Packet::Upgrade => {}
        _ => return Err(Error::WebsocketError("expected upgrade packet".into())),
    }

    let drained = session.upgrade_to_websocket();
    for packet in drained {
        session.send(packet);
    }
    session.enqueue_poll_only(Packet::Noop);
    Ok(())
}

async fn forward_to_socket(
    mut sink: futures::stream::SplitSink<WebSocketStream<Upgraded>, Message>,
    mut rx: mpsc::UnboundedReceiver<Packet>,
) {
    while let Some(packet) = rx.recv().await {
        if matches!(packet, Packet::Noop) {
            continue;
        }
        let msg = if packet.is_binary() {
            Message::Binary(packet.encode_ws_binary())
        } else {
            match packet.encode_text() {
                Ok(text) => Message::Text(text),
                Err(_) => continue,
            }
        };
        if sink.feed(msg).await.is_err() {
            break;
        }
        while let Ok(packet) = rx.try_recv() {
            if matches!(packet, Packet::Noop) {
                continue;
            }
            let msg = if packet.is_binary() {
                Message::Binary(packet.encode_ws_binary())
            } else {
                match packet.encode_text() {
                    Ok(text) => Message::Text(text),
                    Err(_) => continue,
                }
            };
            if sink.feed(msg).await.is_err() {
                return;
            }
        }
        if sink.flush().await.is_err() {
            break;
        }
    }
}

/// Sleeps `pingInterval`, sends a ping, sleeps `pingTimeout`; if no pong
/// has landed since this specific ping was sent, wakes `timeout_notify`
/// so `run_connection`'s read loop breaks and runs the one real close
/// path, reported as `WebsocketDisconnect`. Runs until the session closes
/// or the sender it writes through is dropped.
async fn heartbeat_loop<H: EngineIoHandler>(
    engine: Arc<EngineIo<H>>,
    session: Arc<Session>,
    tx: mpsc::UnboundedSender<Packet>,
    timeout_notify: Arc<Notify>,
) {
    loop {
        tokio::time::sleep(engine.config.ping_interval).await;
        if session.is_closed() {
            return;
        }
        if tx.send(Packet::Ping(None)).is_err() {
            return;
        }
        let send_time = Instant::now();
        session.mark_ping_sent();
        tokio::time::sleep(engine.config.ping_timeout).await;
        if session.is_closed() {
            return;
        }
        if session.last_pong() < send_time {
            timeout_notify.notify_one();
            return;
        }
    }
}

fn ws_err(e: tokio_tungstenite::tungstenite::Error) -> Error {
    Error::WebsocketError(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_ping_is_recognized_by_payload() {
        let packet = Packet::decode_ws_text("2probe").unwrap();
        assert!(matches!(packet, Packet::Ping(Some(PingData::Text(ref s))) if s == "probe"));
    }

    #[test]
    fn probe_pong_encodes_correctly() {
        let pong = Packet::Pong(Some(PingData::Text("probe".into())));
        assert_eq!(pong.encode_text().unwrap(), "3probe");
    }
}
