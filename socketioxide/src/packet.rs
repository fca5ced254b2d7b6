//! Socket.IO v5 packet type and text header grammar (C6).

use serde_json::Value;

use crate::errors::Error;

/// Socket.IO packet type, as it appears as the first digit of a text
/// header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Connect = 0,
    Disconnect = 1,
    Event = 2,
    Ack = 3,
    ConnectError = 4,
    BinaryEvent = 5,
    BinaryAck = 6,
}

impl PacketType {
    fn from_digit(d: u8) -> Option<Self> {
        match d {
            0 => Some(Self::Connect),
            1 => Some(Self::Disconnect),
            2 => Some(Self::Event),
            3 => Some(Self::Ack),
            4 => Some(Self::ConnectError),
            5 => Some(Self::BinaryEvent),
            6 => Some(Self::BinaryAck),
            _ => None,
        }
    }

    fn digit(self) -> u8 {
        self as u8
    }

    pub fn has_attachments(self) -> bool {
        matches!(self, Self::BinaryEvent | Self::BinaryAck)
    }

    /// The non-binary counterpart used once attachments have been
    /// reassembled (BINARY_EVENT -> EVENT, BINARY_ACK -> ACK).
    pub fn without_binary(self) -> Self {
        match self {
            Self::BinaryEvent => Self::Event,
            Self::BinaryAck => Self::Ack,
            other => other,
        }
    }

    /// The binary counterpart used once at least one attachment has been
    /// deconstructed out of `data` (EVENT -> BINARY_EVENT, ACK -> BINARY_ACK).
    pub fn with_binary(self) -> Self {
        match self {
            Self::Event => Self::BinaryEvent,
            Self::Ack => Self::BinaryAck,
            other => other,
        }
    }
}

pub const DEFAULT_NAMESPACE: &str = "/";

/// A decoded Socket.IO packet, namespace-scoped.
#[derive(Debug, Clone, PartialEq)]
pub struct SocketIoPacket {
    pub ty: PacketType,
    pub namespace: String,
    pub data: Value,
    pub ack_id: Option<u64>,
    pub attachments_count: usize,
}

impl SocketIoPacket {
    pub fn connect(namespace: impl Into<String>, data: Value) -> Self {
        Self {
            ty: PacketType::Connect,
            namespace: namespace.into(),
            data,
            ack_id: None,
            attachments_count: 0,
        }
    }

    pub fn connect_error(namespace: impl Into<String>, message: &str) -> Self {
        Self {
            ty: PacketType::ConnectError,
            namespace: namespace.into(),
            data: serde_json::json!({ "message": message }),
            ack_id: None,
            attachments_count: 0,
        }
    }

    pub fn disconnect(namespace: impl Into<String>) -> Self {
        Self {
            ty: PacketType::Disconnect,
            namespace: namespace.into(),
            data: Value::Null,
            ack_id: None,
            attachments_count: 0,
        }
    }

    /// Encodes the text header: `<type>[#atts-][ns,][ackid][json]`.
    /// Callers that deconstructed binary attachments must set
    /// `attachments_count` and pass the already-placeholder-substituted
    /// `data`.
    pub fn encode_header(&self) -> String {
        let mut out = String::new();
        out.push((b'0' + self.ty.digit()) as char);
        if self.ty.has_attachments() {
            out.push_str(&self.attachments_count.to_string());
            out.push('-');
        }
        if self.namespace != DEFAULT_NAMESPACE {
            out.push_str(&self.namespace);
            out.push(',');
        }
        if let Some(id) = self.ack_id {
            out.push_str(&id.to_string());
        }
        let has_payload = !matches!(self.data, Value::Null);
        if has_payload {
            out.push_str(&self.data.to_string());
        }
        out
    }

    /// Decodes a text header, without resolving any binary placeholders
    /// (that's [`crate::parser::SocketIoParser`]'s job once attachments
    /// have arrived).
    pub fn decode_header(header: &str) -> Result<Self, Error> {
        let mut chars = header.char_indices().peekable();
        let (_, type_char) = chars.next().ok_or_else(|| Error::PacketParsing("empty header".into()))?;
        let digit = type_char
            .to_digit(10)
            .ok_or_else(|| Error::PacketParsing(format!("bad packet type: {type_char}")))?;
        let ty = PacketType::from_digit(digit as u8)
            .ok_or_else(|| Error::PacketParsing(format!("unknown packet type: {digit}")))?;

        let mut rest_start = type_char.len_utf8();
        let mut attachments_count = 0usize;
        if ty.has_attachments() {
            let digits_start = rest_start;
            let mut end = digits_start;
            for (i, c) in header[digits_start..].char_indices() {
                if c.is_ascii_digit() {
                    end = digits_start + i + 1;
                } else {
                    break;
                }
            }
            if end == digits_start || header.as_bytes().get(end) != Some(&b'-') {
                return Err(Error::PacketParsing("missing attachment count".into()));
            }
            attachments_count = header[digits_start..end]
                .parse()
                .map_err(|_| Error::PacketParsing("bad attachment count".into()))?;
            rest_start = end + 1;
        }

        let rest = &header[rest_start..];
        let (namespace, rest) = if let Some(stripped) = rest.strip_prefix('/') {
            match stripped.find(',') {
                Some(idx) => (format!("/{}", &stripped[..idx]), &stripped[idx + 1..]),
                None => return Err(Error::PacketParsing("unterminated namespace".into())),
            }
        } else {
            (DEFAULT_NAMESPACE.to_string(), rest)
        };

        let digit_end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        let ack_id = if digit_end > 0 {
            rest[..digit_end].parse().ok()
        } else {
            None
        };
        let json_part = &rest[digit_end..];
        let data = if json_part.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(json_part).unwrap_or(Value::Null)
        };

        Ok(Self {
            ty,
            namespace,
            data,
            ack_id,
            attachments_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_to_default_namespace_omits_ns_field() {
        let p = SocketIoPacket::connect(DEFAULT_NAMESPACE, Value::Null);
        assert_eq!(p.encode_header(), "0");
    }

    #[test]
    fn connect_to_custom_namespace_includes_it() {
        let p = SocketIoPacket::connect("/admin", serde_json::json!({"token": "x"}));
        assert_eq!(p.encode_header(), r#"0/admin,{"token":"x"}"#);
    }

    #[test]
    fn event_with_ack_id_round_trips() {
        let mut p = SocketIoPacket {
            ty: PacketType::Event,
            namespace: DEFAULT_NAMESPACE.to_string(),
            data: serde_json::json!(["hello", 1]),
            ack_id: Some(12),
            attachments_count: 0,
        };
        let header = p.encode_header();
        assert_eq!(header, r#"212["hello",1]"#);
        let decoded = SocketIoPacket::decode_header(&header).unwrap();
        p.ack_id = Some(12);
        assert_eq!(decoded, p);
    }

    #[test]
    fn binary_event_header_carries_attachment_count() {
        let p = SocketIoPacket {
            ty: PacketType::BinaryEvent,
            namespace: DEFAULT_NAMESPACE.to_string(),
            data: serde_json::json!(["img", {"_placeholder": true, "num": 0}]),
            ack_id: None,
            attachments_count: 1,
        };
        assert_eq!(p.encode_header(), r#"51-["img",{"_placeholder":true,"num":0}]"#);
    }

    #[test]
    fn decode_header_defaults_namespace_to_root() {
        let decoded = SocketIoPacket::decode_header("2[\"ping\"]").unwrap();
        assert_eq!(decoded.namespace, "/");
        assert_eq!(decoded.ty as u8, PacketType::Event as u8);
    }

    #[test]
    fn decode_header_reads_explicit_namespace() {
        let decoded = SocketIoPacket::decode_header("2/chat,[\"hi\"]").unwrap();
        assert_eq!(decoded.namespace, "/chat");
    }

    #[test]
    fn decode_header_malformed_json_becomes_null() {
        let decoded = SocketIoPacket::decode_header("2not-json").unwrap();
        assert_eq!(decoded.data, Value::Null);
    }

    #[test]
    fn decode_header_rejects_unknown_type() {
        assert!(SocketIoPacket::decode_header("9oops").is_err());
    }

    #[test]
    fn decode_header_rejects_missing_attachment_count() {
        assert!(SocketIoPacket::decode_header("5[\"x\"]").is_err());
    }
}
