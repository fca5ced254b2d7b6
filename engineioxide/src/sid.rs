//! Session identifiers.
//!
//! A [`Sid`] is generated with the OS RNG, rendered URL-safe, and carries
//! at least 128 bits of entropy, as required by the Engine.IO handshake.

use std::fmt;

use base64::Engine;
use rand::Rng;

/// An opaque, unpredictable Engine.IO session id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sid([u8; 16]);

impl Sid {
    /// Generates a fresh random session id.
    pub fn new() -> Self {
        Self(rand::thread_rng().gen())
    }
}

impl Default for Sid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(self.0))
    }
}

impl serde::Serialize for Sid {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl std::str::FromStr for Sid {
    type Err = base64::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(s)?;
        let mut buf = [0u8; 16];
        if bytes.len() != buf.len() {
            return Err(base64::DecodeError::InvalidLength);
        }
        buf.copy_from_slice(&bytes);
        Ok(Self(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display_and_from_str() {
        let sid = Sid::new();
        let rendered = sid.to_string();
        let parsed: Sid = rendered.parse().unwrap();
        assert_eq!(sid, parsed);
    }

    #[test]
    fn two_freshly_generated_sids_differ() {
        assert_ne!(Sid::new(), Sid::new());
    }

    #[test]
    fn rejects_wrong_length() {
        assert!("AA".parse::<Sid>().is_err());
    }
}
