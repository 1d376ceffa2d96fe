//! Packet kinds and the immutable [`Packet`] value.
//!
//! A packet is a kind plus raw bytes. Control packets usually carry no data
//! (the probe exchange is the exception); MESSAGE carries UTF-8 text and
//! PAYLOAD carries arbitrary binary.

use std::fmt;

use bytes::Bytes;

use crate::errors::DecodeError;

/// Packet kind, identified on the wire by a single marker byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PacketKind {
    /// Handshake, first packet sent by the server.
    Open,
    /// Session close, either direction.
    Close,
    /// Heartbeat request, also used for the upgrade probe.
    Ping,
    /// Heartbeat response.
    Pong,
    /// Application text message.
    Message,
    /// Client confirmation that the probed transport takes over.
    Upgrade,
    /// Empty response used to release a stale long-poll.
    Noop,
    /// Application binary message.
    Payload,
}

impl PacketKind {
    /// All kinds, in marker order.
    pub const ALL: [Self; 8] = [
        Self::Open,
        Self::Close,
        Self::Ping,
        Self::Pong,
        Self::Message,
        Self::Upgrade,
        Self::Noop,
        Self::Payload,
    ];

    /// Marker byte written in front of the packet data.
    ///
    /// PAYLOAD uses `b`, which only appears in the batched encoding; a
    /// websocket binary frame carries no marker at all.
    pub const fn marker(self) -> u8 {
        match self {
            Self::Open => b'0',
            Self::Close => b'1',
            Self::Ping => b'2',
            Self::Pong => b'3',
            Self::Message => b'4',
            Self::Upgrade => b'5',
            Self::Noop => b'6',
            Self::Payload => b'b',
        }
    }

    /// Resolve a marker byte.
    pub const fn from_marker(marker: u8) -> Option<Self> {
        match marker {
            b'0' => Some(Self::Open),
            b'1' => Some(Self::Close),
            b'2' => Some(Self::Ping),
            b'3' => Some(Self::Pong),
            b'4' => Some(Self::Message),
            b'5' => Some(Self::Upgrade),
            b'6' => Some(Self::Noop),
            b'b' => Some(Self::Payload),
            _ => None,
        }
    }

    /// MESSAGE and PAYLOAD are handed to the application; everything else
    /// is protocol control.
    pub const fn is_application(self) -> bool {
        matches!(self, Self::Message | Self::Payload)
    }

    /// Whether the data is opaque binary rather than UTF-8 text.
    pub const fn is_binary(self) -> bool {
        matches!(self, Self::Payload)
    }

    /// Lowercase name used in logs.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Message => "message",
            Self::Upgrade => "upgrade",
            Self::Noop => "noop",
            Self::Payload => "payload",
        }
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Application-level message: what handlers receive and `send` accepts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// UTF-8 text, carried by MESSAGE packets.
    Text(String),
    /// Opaque bytes, carried by PAYLOAD packets.
    Binary(Bytes),
}

impl Payload {
    /// Packet kind that carries this payload.
    pub const fn kind(&self) -> PacketKind {
        match self {
            Self::Text(_) => PacketKind::Message,
            Self::Binary(_) => PacketKind::Payload,
        }
    }

    /// Text content, if this is a text payload.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Binary(_) => None,
        }
    }

    /// Raw bytes of either variant.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(s) => s.as_bytes(),
            Self::Binary(b) => b,
        }
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<Bytes> for Payload {
    fn from(b: Bytes) -> Self {
        Self::Binary(b)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(b: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(b))
    }
}

/// One protocol unit. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    kind: PacketKind,
    data: Bytes,
}

/// Data carried by the upgrade probe ping/pong.
const PROBE: &[u8] = b"probe";

impl Packet {
    /// Build a packet from a kind and raw data.
    ///
    /// Every kind except PAYLOAD travels as text, so its data must be UTF-8.
    pub fn new(kind: PacketKind, data: impl Into<Bytes>) -> Result<Self, DecodeError> {
        let data = data.into();
        if !kind.is_binary() && std::str::from_utf8(&data).is_err() {
            return Err(DecodeError::InvalidUtf8);
        }
        Ok(Self::from_parts(kind, data))
    }

    /// Caller guarantees text kinds carry UTF-8.
    pub(crate) fn from_parts(kind: PacketKind, data: Bytes) -> Self {
        Self { kind, data }
    }

    /// Control packet with no data.
    pub fn control(kind: PacketKind) -> Self {
        Self::from_parts(kind, Bytes::new())
    }

    /// MESSAGE packet.
    pub fn message(text: impl Into<String>) -> Self {
        Self::from_parts(PacketKind::Message, Bytes::from(text.into()))
    }

    /// PAYLOAD packet.
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::from_parts(PacketKind::Payload, data.into())
    }

    /// `ping`/`pong` carrying the `probe` marker used during upgrade.
    pub fn probe(kind: PacketKind) -> Self {
        Self::from_parts(kind, Bytes::from_static(PROBE))
    }

    /// Packet kind.
    pub fn kind(&self) -> PacketKind {
        self.kind
    }

    /// Raw data.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Data as UTF-8, if valid.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }

    /// Whether this is the `kind` half of the probe exchange.
    pub fn is_probe(&self, kind: PacketKind) -> bool {
        self.kind == kind && self.data.as_ref() == PROBE
    }

    /// Convert an application packet into the payload handed to handlers.
    ///
    /// Returns `None` for control kinds.
    pub fn into_payload(self) -> Option<Payload> {
        match self.kind {
            PacketKind::Message => Some(Payload::Text(
                String::from_utf8_lossy(&self.data).into_owned(),
            )),
            PacketKind::Payload => Some(Payload::Binary(self.data)),
            _ => None,
        }
    }
}

impl From<Payload> for Packet {
    fn from(payload: Payload) -> Self {
        match payload {
            Payload::Text(s) => Self::message(s),
            Payload::Binary(b) => Self::binary(b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_roundtrip_for_every_kind() {
        for kind in PacketKind::ALL {
            assert_eq!(PacketKind::from_marker(kind.marker()), Some(kind));
        }
    }

    #[test]
    fn digit_markers() {
        assert_eq!(PacketKind::Open.marker(), b'0');
        assert_eq!(PacketKind::Message.marker(), b'4');
        assert_eq!(PacketKind::Noop.marker(), b'6');
    }

    #[test]
    fn unknown_marker() {
        assert_eq!(PacketKind::from_marker(b'7'), None);
        assert_eq!(PacketKind::from_marker(b'x'), None);
    }

    #[test]
    fn only_message_and_payload_are_application() {
        let app: Vec<_> = PacketKind::ALL
            .into_iter()
            .filter(|k| k.is_application())
            .collect();
        assert_eq!(app, vec![PacketKind::Message, PacketKind::Payload]);
    }

    #[test]
    fn display_uses_name() {
        assert_eq!(PacketKind::Upgrade.to_string(), "upgrade");
    }

    #[test]
    fn probe_detection() {
        let ping = Packet::probe(PacketKind::Ping);
        assert!(ping.is_probe(PacketKind::Ping));
        assert!(!ping.is_probe(PacketKind::Pong));
        assert!(!Packet::control(PacketKind::Ping).is_probe(PacketKind::Ping));
    }

    #[test]
    fn message_into_payload() {
        let p = Packet::message("hello");
        assert_eq!(p.text(), Some("hello"));
        assert_eq!(p.into_payload(), Some(Payload::Text("hello".into())));
    }

    #[test]
    fn binary_into_payload() {
        let p = Packet::binary(vec![0u8, 255]);
        assert_eq!(
            p.into_payload(),
            Some(Payload::Binary(Bytes::from_static(&[0, 255])))
        );
    }

    #[test]
    fn text_kinds_require_utf8() {
        assert_eq!(
            Packet::new(PacketKind::Message, vec![0xff, b'a']),
            Err(DecodeError::InvalidUtf8)
        );
        assert_eq!(
            Packet::new(PacketKind::Ping, vec![0xc3]),
            Err(DecodeError::InvalidUtf8)
        );
        let valid = Packet::new(PacketKind::Message, "é").unwrap();
        assert_eq!(valid.text(), Some("é"));
    }

    #[test]
    fn binary_kind_accepts_any_bytes() {
        let packet = Packet::new(PacketKind::Payload, vec![0xff, 0x00]).unwrap();
        assert_eq!(packet.data().as_ref(), &[0xff, 0x00]);
    }

    #[test]
    fn control_has_no_payload() {
        assert_eq!(Packet::control(PacketKind::Pong).into_payload(), None);
    }

    #[test]
    fn payload_to_packet_kind() {
        let text: Packet = Payload::from("x").into();
        assert_eq!(text.kind(), PacketKind::Message);
        let bin: Packet = Payload::from(vec![1u8]).into();
        assert_eq!(bin.kind(), PacketKind::Payload);
    }

    #[test]
    fn payload_accessors() {
        let t = Payload::from("abc");
        assert_eq!(t.as_text(), Some("abc"));
        assert_eq!(t.as_bytes(), b"abc");
        let b = Payload::from(vec![9u8]);
        assert_eq!(b.as_text(), None);
        assert_eq!(b.kind(), PacketKind::Payload);
    }
}
