//! Error taxonomy for the protocol core.

use thiserror::Error;

use crate::packet::PacketKind;

/// Malformed packet bytes.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Input (or a frame) had no bytes at all.
    #[error("empty packet")]
    Empty,
    /// Batched input did not start with a `<len>:` prefix.
    #[error("missing length prefix")]
    MissingLength,
    /// Length prefix was not a decimal number, or was zero.
    #[error("invalid length prefix")]
    InvalidLength,
    /// Fewer bytes remained than the length prefix promised.
    #[error("truncated packet: expected {expected} bytes, {available} available")]
    Truncated {
        /// Bytes promised by the prefix.
        expected: usize,
        /// Bytes left in the buffer.
        available: usize,
    },
    /// Marker byte did not name a packet kind.
    #[error("unknown packet marker {0:#04x}")]
    UnknownKind(u8),
    /// Text packet data was not valid UTF-8.
    #[error("packet data is not valid UTF-8")]
    InvalidUtf8,
    /// Binary packet data was not valid base64.
    #[error("packet data is not valid base64")]
    InvalidBase64,
}

/// Errors surfaced by sessions and transports.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Operation attempted on a closed session or transport.
    #[error("socket closed")]
    SocketClosed,
    /// A generic deadline passed.
    #[error("operation timed out")]
    Timeout,
    /// No PONG arrived within the ping timeout.
    #[error("ping timeout")]
    PingTimeout,
    /// `send` was given a packet kind the application may not send.
    #[error("message kind not supported: {0}")]
    MessageNotSupported(PacketKind),
    /// Wire bytes could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    /// The peer sent a packet other than the one the protocol expects next.
    #[error("unexpected packet: expected {expected}, got {actual}")]
    UnexpectedPacket {
        /// Kind the protocol step required.
        expected: PacketKind,
        /// Kind actually received.
        actual: PacketKind,
    },
    /// The handshake body could not be produced.
    #[error("handshake error: {0}")]
    Handshake(String),
    /// Read or write failure on the physical channel.
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Handshake(err.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
