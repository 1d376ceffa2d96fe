//! Wire encodings.
//!
//! Two contexts:
//!
//! - **Batched** (polling bodies): each packet is written as
//!   `<len>:<marker><data>`, where `<len>` is the decimal byte count of
//!   marker plus data. PAYLOAD packets use marker `b` and base64 (standard
//!   alphabet, padded) data so a batch stays readable as text. The length
//!   prefix makes packet boundaries unambiguous for any content.
//! - **Single frame** (websocket): a text frame is `<marker><data>`; a
//!   binary frame is the raw PAYLOAD bytes with no marker.
//!
//! Text kinds must carry UTF-8 data to survive a round trip.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::{BufMut, Bytes, BytesMut};

use crate::errors::DecodeError;
use crate::packet::{Packet, PacketKind};

// ── Batched ──

/// Encode packets into one polling body.
pub fn encode_batch<'a>(packets: impl IntoIterator<Item = &'a Packet>) -> Bytes {
    let mut out = BytesMut::new();
    for packet in packets {
        let encoded;
        let data: &[u8] = if packet.kind().is_binary() {
            encoded = STANDARD.encode(packet.data());
            encoded.as_bytes()
        } else {
            packet.data()
        };
        out.put_slice((data.len() + 1).to_string().as_bytes());
        out.put_u8(b':');
        out.put_u8(packet.kind().marker());
        out.put_slice(data);
    }
    out.freeze()
}

/// Lazily decode a polling body. See [`BatchDecoder`].
pub fn decode_batch(input: &[u8]) -> BatchDecoder<'_> {
    BatchDecoder {
        rest: input,
        failed: false,
    }
}

/// Decode a whole polling body, failing on the first malformed packet.
pub fn decode_batch_all(input: &[u8]) -> Result<Vec<Packet>, DecodeError> {
    decode_batch(input).collect()
}

/// Iterator over the packets of a batched body.
///
/// Yields one packet per step until the buffer is exhausted. The first
/// error is yielded once and ends iteration; the remaining bytes are
/// discarded.
#[derive(Debug)]
pub struct BatchDecoder<'a> {
    rest: &'a [u8],
    failed: bool,
}

impl BatchDecoder<'_> {
    fn next_packet(&mut self) -> Result<Packet, DecodeError> {
        let colon = self
            .rest
            .iter()
            .position(|&b| b == b':')
            .ok_or(DecodeError::MissingLength)?;
        let digits = &self.rest[..colon];
        if digits.is_empty() {
            return Err(DecodeError::MissingLength);
        }
        if !digits.iter().all(u8::is_ascii_digit) {
            return Err(DecodeError::InvalidLength);
        }
        let len: usize = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|&n| n > 0)
            .ok_or(DecodeError::InvalidLength)?;

        let body = &self.rest[colon + 1..];
        if body.len() < len {
            return Err(DecodeError::Truncated {
                expected: len,
                available: body.len(),
            });
        }
        let (packet, rest) = body.split_at(len);
        self.rest = rest;

        let kind = PacketKind::from_marker(packet[0]).ok_or(DecodeError::UnknownKind(packet[0]))?;
        let data = &packet[1..];
        if kind.is_binary() {
            let raw = STANDARD
                .decode(data)
                .map_err(|_| DecodeError::InvalidBase64)?;
            Ok(Packet::binary(raw))
        } else {
            Packet::new(kind, Bytes::copy_from_slice(data))
        }
    }
}

impl Iterator for BatchDecoder<'_> {
    type Item = Result<Packet, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.rest.is_empty() {
            return None;
        }
        let result = self.next_packet();
        if result.is_err() {
            self.failed = true;
            self.rest = &[];
        }
        Some(result)
    }
}

// ── Single frame ──

/// One websocket frame's worth of data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Text frame: marker byte followed by UTF-8 data.
    Text(String),
    /// Binary frame: raw PAYLOAD bytes.
    Binary(Bytes),
}

/// Encode a packet as a single websocket frame.
pub fn encode_frame(packet: &Packet) -> Frame {
    if packet.kind().is_binary() {
        return Frame::Binary(packet.data().clone());
    }
    // Text kinds hold UTF-8 by construction, so nothing is replaced here.
    let data = String::from_utf8_lossy(packet.data());
    let mut text = String::with_capacity(data.len() + 1);
    text.push(char::from(packet.kind().marker()));
    text.push_str(&data);
    Frame::Text(text)
}

/// Decode a single websocket frame.
pub fn decode_frame(frame: Frame) -> Result<Packet, DecodeError> {
    match frame {
        Frame::Binary(data) => Ok(Packet::binary(data)),
        Frame::Text(text) => {
            let marker = *text.as_bytes().first().ok_or(DecodeError::Empty)?;
            let kind = PacketKind::from_marker(marker)
                .filter(|k| !k.is_binary())
                .ok_or(DecodeError::UnknownKind(marker))?;
            Ok(Packet::from_parts(
                kind,
                Bytes::copy_from_slice(&text.as_bytes()[1..]),
            ))
        }
    }
}
