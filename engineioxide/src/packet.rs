//! Engine.IO packet codec (C1): the "open" handshake packet, and the text/
//! binary wire formats used by the polling and WebSocket transports.

use serde::Serialize;

use crate::config::EngineIoConfig;
use crate::errors::Error;
use crate::sid::Sid;
use base64::Engine;
use crate::transport::TransportType;

/// The record separator used to join packet segments in an HTTP
/// long-polling payload body (U+001E).
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Payload carried by a ping/pong packet: either UTF-8 text (the common
/// case, e.g. the `"probe"` upgrade handshake) or raw bytes, when the
/// client pinged over a WebSocket binary frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PingData {
    Text(String),
    Binary(Vec<u8>),
}

impl PingData {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PingData::Text(s) => Some(s),
            PingData::Binary(_) => None,
        }
    }
}

/// An in-memory Engine.IO packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Handshake packet (type `0`), sent once per session right after
    /// creation.
    Open(OpenPacket),
    /// Close packet (type `1`).
    Close,
    /// Ping packet (type `2`).
    Ping(Option<PingData>),
    /// Pong packet (type `3`).
    Pong(Option<PingData>),
    /// Text message (type `4`), carrying an opaque application payload.
    Message(String),
    /// Binary message (type `4`, conveyed out of band from the type
    /// byte/digit), carrying an opaque application payload.
    Binary(Vec<u8>),
    /// Upgrade packet (type `5`), completes a polling-to-websocket
    /// upgrade.
    Upgrade,
    /// Noop packet (type `6`), used to unblock a pending long-poll GET.
    Noop,
}

/// Payload of the Engine.IO `open` packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenPacket {
    pub sid: String,
    pub upgrades: Vec<&'static str>,
    #[serde(rename = "pingInterval")]
    pub ping_interval: u64,
    #[serde(rename = "pingTimeout")]
    pub ping_timeout: u64,
    #[serde(rename = "maxPayload")]
    pub max_payload: u64,
}

impl OpenPacket {
    /// Builds the open packet for a freshly created session.
    ///
    /// `upgrades` advertises `["websocket"]` for polling-initiated
    /// sessions and `[]` for WebSocket-initiated ones, since a WebSocket
    /// session has nothing left to upgrade to.
    pub fn new(transport: TransportType, sid: Sid, config: &EngineIoConfig) -> Self {
        let upgrades = match transport {
            TransportType::Polling => vec!["websocket"],
            TransportType::Websocket => vec![],
        };
        Self {
            sid: sid.to_string(),
            upgrades,
            ping_interval: config.ping_interval.as_millis() as u64,
            ping_timeout: config.ping_timeout.as_millis() as u64,
            max_payload: config.max_payload,
        }
    }
}

impl Packet {
    /// Type digit of this packet, as it appears on the wire.
    fn type_digit(&self) -> char {
        match self {
            Packet::Open(_) => '0',
            Packet::Close => '1',
            Packet::Ping(_) => '2',
            Packet::Pong(_) => '3',
            Packet::Message(_) | Packet::Binary(_) => '4',
            Packet::Upgrade => '5',
            Packet::Noop => '6',
        }
    }

    /// `true` if this packet must travel as a binary frame/segment rather
    /// than a text one.
    pub fn is_binary(&self) -> bool {
        matches!(self, Packet::Binary(_))
            || matches!(self, Packet::Ping(Some(PingData::Binary(_))))
            || matches!(self, Packet::Pong(Some(PingData::Binary(_))))
    }

    /// Encodes this packet as a text segment suitable for the HTTP
    /// long-polling wire format or a WebSocket text frame.
    ///
    /// Binary packets cannot be encoded as text; use
    /// [`Packet::encode_ws_binary`] or [`Packet::encode_http_segment`]
    /// instead.
    pub fn encode_text(&self) -> Result<String, Error> {
        let data = match self {
            Packet::Open(open) => serde_json::to_string(open)
                .map_err(|e| Error::PacketParsing(e.to_string()))?,
            Packet::Close | Packet::Upgrade | Packet::Noop => String::new(),
            Packet::Ping(data) | Packet::Pong(data) => match data {
                None => String::new(),
                Some(PingData::Text(s)) => s.clone(),
                Some(PingData::Binary(_)) => {
                    return Err(Error::PacketParsing(
                        "binary ping/pong cannot be encoded as text".into(),
                    ))
                }
            },
            Packet::Message(s) => s.clone(),
            Packet::Binary(_) => {
                return Err(Error::PacketParsing(
                    "binary packets cannot be encoded as text".into(),
                ))
            }
        };
        Ok(format!("{}{data}", self.type_digit()))
    }

    /// Encodes this packet as an HTTP long-polling segment: a plain text
    /// segment, or `"b" + base64(bytes)` for a binary message.
    ///
    /// Binary ping/pong frames never occur over HTTP long-polling (they
    /// are a WebSocket-only echo of a binary client ping), so only
    /// [`Packet::Binary`] needs the base64 path here.
    pub fn encode_http_segment(&self) -> Result<String, Error> {
        match self {
            Packet::Binary(data) => Ok(format!("b{}", base64::engine::general_purpose::STANDARD.encode(data))),
            _ => self.encode_text(),
        }
    }

    /// Encodes this packet as a WebSocket binary frame payload:
    /// `<type-byte><raw-bytes>`.
    pub fn encode_ws_binary(&self) -> Vec<u8> {
        let mut out = vec![self.type_digit() as u8];
        match self {
            Packet::Binary(data) => out.extend_from_slice(data),
            Packet::Ping(Some(PingData::Binary(data))) | Packet::Pong(Some(PingData::Binary(data))) => {
                out.extend_from_slice(data)
            }
            _ => {}
        }
        out
    }

    /// Decodes a single HTTP long-polling segment.
    pub fn decode_http_segment(segment: &str) -> Result<Packet, Error> {
        if segment.is_empty() {
            return Err(Error::PacketParsing("empty segment".into()));
        }
        if let Some(b64) = segment.strip_prefix('b') {
            let data = base64::engine::general_purpose::STANDARD.decode(b64).map_err(|e| Error::PacketParsing(e.to_string()))?;
            return Ok(Packet::Binary(data));
        }
        Self::decode_text(segment)
    }

    /// Decodes a WebSocket text frame: `<type-digit><text-data>`.
    pub fn decode_ws_text(frame: &str) -> Result<Packet, Error> {
        Self::decode_text(frame)
    }

    /// Decodes a WebSocket binary frame: `<type-byte><raw-bytes>`.
    pub fn decode_ws_binary(frame: &[u8]) -> Result<Packet, Error> {
        let (&ty, rest) = frame
            .split_first()
            .ok_or_else(|| Error::PacketParsing("empty binary frame".into()))?;
        match ty as char {
            '4' => Ok(Packet::Binary(rest.to_vec())),
            '2' => Ok(Packet::Ping(Some(PingData::Binary(rest.to_vec())))),
            '3' => Ok(Packet::Pong(Some(PingData::Binary(rest.to_vec())))),
            other => Err(Error::PacketParsing(format!(
                "unsupported binary packet type: {other}"
            ))),
        }
    }

    fn decode_text(segment: &str) -> Result<Packet, Error> {
        let mut chars = segment.chars();
        let ty = chars
            .next()
            .ok_or_else(|| Error::PacketParsing("empty segment".into()))?;
        let data: String = chars.as_str().to_string();
        let opt_data = if data.is_empty() {
            None
        } else {
            Some(PingData::Text(data.clone()))
        };
        match ty {
            '0' => Err(Error::PacketParsing(
                "unexpected open packet from client".into(),
            )),
            '1' => Ok(Packet::Close),
            '2' => Ok(Packet::Ping(opt_data)),
            '3' => Ok(Packet::Pong(opt_data)),
            '4' => Ok(Packet::Message(data)),
            '5' => Ok(Packet::Upgrade),
            '6' => Ok(Packet::Noop),
            other => Err(Error::PacketParsing(format!("unknown packet type: {other}"))),
        }
    }
}

/// Splits an HTTP long-polling payload into its packet segments, applying
/// §4.1's decode contract (split on the record separator, skip empty
/// segments, `b`-prefixed segments decode as binary messages).
pub fn decode_http_payload(body: &[u8]) -> Result<Vec<Packet>, Error> {
    if body.is_empty() {
        return Ok(Vec::new());
    }
    let text = std::str::from_utf8(body).map_err(|e| Error::PacketParsing(e.to_string()))?;
    text.split(RECORD_SEPARATOR)
        .filter(|s| !s.is_empty())
        .map(Packet::decode_http_segment)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_packet_round_trips_fields() {
        let config = EngineIoConfig::default();
        let sid = Sid::new();
        let open = OpenPacket::new(TransportType::Polling, sid, &config);
        assert_eq!(open.upgrades, vec!["websocket"]);

        let packet = Packet::Open(open);
        let text = packet.encode_text().unwrap();
        assert!(text.starts_with('0'));
        assert!(text.contains(&format!("\"sid\":\"{sid}\"")));
        assert!(text.contains("\"upgrades\":[\"websocket\"]"));
    }

    #[test]
    fn websocket_initiated_session_advertises_no_upgrades() {
        let config = EngineIoConfig::default();
        let open = OpenPacket::new(TransportType::Websocket, Sid::new(), &config);
        assert!(open.upgrades.is_empty());
    }

    #[test]
    fn text_message_round_trips() {
        let packet = Packet::Message("hello".into());
        let text = packet.encode_text().unwrap();
        assert_eq!(text, "4hello");
        assert_eq!(Packet::decode_http_segment(&text).unwrap(), packet);
    }

    #[test]
    fn binary_message_http_segment_uses_base64_with_b_prefix() {
        let packet = Packet::Binary(vec![0xDE, 0xAD, 0xBE, 0xEF]);
        let segment = packet.encode_http_segment().unwrap();
        assert!(segment.starts_with('b'));
        let decoded = Packet::decode_http_segment(&segment).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn decode_http_payload_splits_on_record_separator() {
        let body = format!("2{RECORD_SEPARATOR}4hello{RECORD_SEPARATOR}bAQIDBA==");
        let packets = decode_http_payload(body.as_bytes()).unwrap();
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0], Packet::Ping(None));
        assert_eq!(packets[1], Packet::Message("hello".into()));
        assert_eq!(packets[2], Packet::Binary(vec![1, 2, 3, 4]));
    }

    #[test]
    fn decode_http_payload_skips_empty_segments() {
        let body = format!("{RECORD_SEPARATOR}{RECORD_SEPARATOR}2");
        let packets = decode_http_payload(body.as_bytes()).unwrap();
        assert_eq!(packets, vec![Packet::Ping(None)]);
    }

    #[test]
    fn ws_binary_frame_round_trips_message() {
        let packet = Packet::Binary(vec![9, 9, 9]);
        let frame = packet.encode_ws_binary();
        assert_eq!(frame[0], b'4');
        assert_eq!(Packet::decode_ws_binary(&frame).unwrap(), packet);
    }

    #[test]
    fn ws_binary_ping_is_echoed_byte_exact_as_pong() {
        let ping = Packet::decode_ws_binary(&[b'2', 0xff, 0x00, 0x7f]).unwrap();
        let PingData::Binary(data) = (match &ping {
            Packet::Ping(Some(d)) => d.clone(),
            _ => panic!("expected ping"),
        }) else {
            panic!("expected binary ping data");
        };
        let pong = Packet::Pong(Some(PingData::Binary(data)));
        assert_eq!(pong.encode_ws_binary(), vec![b'3', 0xff, 0x00, 0x7f]);
    }

    #[test]
    fn unknown_packet_type_is_rejected() {
        assert!(Packet::decode_http_segment("9garbage").is_err());
    }
}
