//! Binary attachment deconstruction/reconstruction and the stateful
//! per-session parser (C6).

use serde_json::{Map, Number, Value};

use crate::errors::Error;
use crate::packet::{PacketType, SocketIoPacket};

/// A JSON-like value that can additionally carry raw binary data,
/// mirroring what application code builds before it is deconstructed
/// into a JSON template plus a flat attachment list.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<Payload>),
    Object(Vec<(String, Payload)>),
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Payload::Null,
            Value::Bool(b) => Payload::Bool(b),
            Value::Number(n) => Payload::Number(n),
            Value::String(s) => Payload::String(s),
            Value::Array(items) => Payload::Array(items.into_iter().map(Payload::from).collect()),
            Value::Object(map) => {
                Payload::Object(map.into_iter().map(|(k, v)| (k, Payload::from(v))).collect())
            }
        }
    }
}

/// Walks `payload` depth-first, replacing every [`Payload::Bytes`] value
/// with a `{"_placeholder": true, "num": i}` marker and collecting the
/// bytes into a flat attachment list, in walk order.
pub fn deconstruct(payload: &Payload) -> (Value, Vec<Vec<u8>>) {
    let mut attachments = Vec::new();
    let template = walk_deconstruct(payload, &mut attachments);
    (template, attachments)
}

fn walk_deconstruct(payload: &Payload, attachments: &mut Vec<Vec<u8>>) -> Value {
    match payload {
        Payload::Null => Value::Null,
        Payload::Bool(b) => Value::Bool(*b),
        Payload::Number(n) => Value::Number(n.clone()),
        Payload::String(s) => Value::String(s.clone()),
        Payload::Bytes(bytes) => {
            let num = attachments.len();
            attachments.push(bytes.clone());
            placeholder(num)
        }
        Payload::Array(items) => {
            Value::Array(items.iter().map(|item| walk_deconstruct(item, attachments)).collect())
        }
        Payload::Object(fields) => {
            let mut map = Map::new();
            for (key, value) in fields {
                map.insert(key.clone(), walk_deconstruct(value, attachments));
            }
            Value::Object(map)
        }
    }
}

fn placeholder(num: usize) -> Value {
    let mut map = Map::new();
    map.insert("_placeholder".to_string(), Value::Bool(true));
    map.insert("num".to_string(), Value::Number(num.into()));
    Value::Object(map)
}

/// The inverse of [`deconstruct`]: walks `template`, replacing every
/// placeholder marker with the matching entry from `attachments`.
pub fn reconstruct(template: &Value, attachments: &[Vec<u8>]) -> Result<Payload, Error> {
    match template {
        Value::Null => Ok(Payload::Null),
        Value::Bool(b) => Ok(Payload::Bool(*b)),
        Value::Number(n) => Ok(Payload::Number(n.clone())),
        Value::String(s) => Ok(Payload::String(s.clone())),
        Value::Array(items) => items
            .iter()
            .map(|item| reconstruct(item, attachments))
            .collect::<Result<_, _>>()
            .map(Payload::Array),
        Value::Object(map) => {
            if let Some(num) = placeholder_index(map) {
                let bytes = attachments
                    .get(num)
                    .ok_or_else(|| Error::PacketParsing(format!("missing attachment {num}")))?;
                Ok(Payload::Bytes(bytes.clone()))
            } else {
                map.iter()
                    .map(|(k, v)| reconstruct(v, attachments).map(|v| (k.clone(), v)))
                    .collect::<Result<_, _>>()
                    .map(Payload::Object)
            }
        }
    }
}

fn placeholder_index(map: &Map<String, Value>) -> Option<usize> {
    if map.get("_placeholder") == Some(&Value::Bool(true)) {
        map.get("num").and_then(Value::as_u64).map(|n| n as usize)
    } else {
        None
    }
}

/// In-progress accumulation of a BINARY_EVENT/BINARY_ACK packet waiting
/// for its attachments.
struct Pending {
    header: SocketIoPacket,
    attachments: Vec<Vec<u8>>,
}

/// Per Engine.IO-session Socket.IO packet parser.
///
/// Socket.IO packets share one Engine.IO connection with no per-packet
/// framing beyond "N binary messages follow this header" — this struct
/// holds that accumulation state so packets interleaved from different
/// namespaces on the same connection still reconstruct correctly in
/// header-arrival order.
#[derive(Default)]
pub struct SocketIoParser {
    pending: Option<Pending>,
    /// Counts accumulations dropped because a text frame arrived before
    /// all attachments had landed (spec leaves this case's handling
    /// implementation-defined; dropping and continuing keeps the
    /// connection alive instead of treating it as fatal).
    pub dropped_accumulations: std::sync::atomic::AtomicU64,
}

/// Outcome of feeding one Engine.IO message into the parser.
pub enum Fed {
    /// A complete packet with no attachments to wait for.
    Complete(SocketIoPacket),
    /// A BINARY_EVENT/BINARY_ACK header is now waiting on attachments.
    AwaitingAttachments,
    /// An attachment was consumed but more are still pending.
    StillAwaiting,
    /// The final attachment arrived; the packet (still carrying
    /// placeholder markers in `data`) is complete, paired with the flat
    /// attachment list needed to call [`reconstruct`] on it.
    CompleteWithBinary(SocketIoPacket, Vec<Vec<u8>>),
}

impl SocketIoParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a text (header) frame.
    pub fn feed_text(&mut self, text: &str) -> Result<Fed, Error> {
        if self.pending.is_some() {
            self.pending = None;
            self.dropped_accumulations.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
        let header = SocketIoPacket::decode_header(text)?;
        if header.ty.has_attachments() && header.attachments_count > 0 {
            self.pending = Some(Pending {
                header,
                attachments: Vec::new(),
            });
            Ok(Fed::AwaitingAttachments)
        } else {
            Ok(Fed::Complete(header))
        }
    }

    /// Feeds a binary (attachment) frame.
    pub fn feed_binary(&mut self, data: Vec<u8>) -> Result<Fed, Error> {
        let pending = self
            .pending
            .as_mut()
            .ok_or_else(|| Error::PacketParsing("unexpected binary frame".into()))?;
        pending.attachments.push(data);
        if pending.attachments.len() < pending.header.attachments_count {
            return Ok(Fed::StillAwaiting);
        }
        let Pending { mut header, attachments } = self.pending.take().unwrap();
        header.ty = header.ty.without_binary();
        Ok(Fed::CompleteWithBinary(header, attachments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deconstruct_replaces_bytes_with_placeholder_in_walk_order() {
        let payload = Payload::Array(vec![
            Payload::String("pic".into()),
            Payload::Bytes(vec![1, 2, 3]),
            Payload::Object(vec![("thumb".to_string(), Payload::Bytes(vec![4, 5]))]),
        ]);
        let (template, attachments) = deconstruct(&payload);
        assert_eq!(attachments, vec![vec![1, 2, 3], vec![4, 5]]);
        assert_eq!(
            template,
            serde_json::json!(["pic", {"_placeholder": true, "num": 0}, {"thumb": {"_placeholder": true, "num": 1}}])
        );
    }

    #[test]
    fn reconstruct_is_the_inverse_of_deconstruct() {
        let payload = Payload::Array(vec![Payload::Bytes(vec![9, 9]), Payload::String("x".into())]);
        let (template, attachments) = deconstruct(&payload);
        let back = reconstruct(&template, &attachments).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn parser_completes_immediately_with_no_attachments() {
        let mut parser = SocketIoParser::new();
        let fed = parser.feed_text("2[\"ping\"]").unwrap();
        assert!(matches!(fed, Fed::Complete(_)));
    }

    #[test]
    fn parser_waits_for_n_attachments_then_completes() {
        let mut parser = SocketIoParser::new();
        let fed = parser
            .feed_text(r#"51-["pic",{"_placeholder":true,"num":0}]"#)
            .unwrap();
        assert!(matches!(fed, Fed::AwaitingAttachments));
        let fed = parser.feed_binary(vec![1, 2, 3]).unwrap();
        match fed {
            Fed::CompleteWithBinary(packet, attachments) => {
                assert_eq!(packet.ty as u8, PacketType::Event as u8);
                let payload = reconstruct(&packet.data, &attachments).unwrap();
                assert_eq!(
                    payload,
                    Payload::Array(vec![Payload::String("pic".into()), Payload::Bytes(vec![1, 2, 3])])
                );
            }
            _ => panic!("expected completion"),
        }
    }

    #[test]
    fn parser_drops_accumulation_when_text_arrives_mid_binary() {
        let mut parser = SocketIoParser::new();
        parser
            .feed_text(r#"51-["pic",{"_placeholder":true,"num":0}]"#)
            .unwrap();
        let fed = parser.feed_text("2[\"unrelated\"]").unwrap();
        assert!(matches!(fed, Fed::Complete(_)));
        assert_eq!(parser.dropped_accumulations.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[test]
    fn binary_frame_with_no_pending_header_is_rejected() {
        let mut parser = SocketIoParser::new();
        assert!(parser.feed_binary(vec![1]).is_err());
    }
}
