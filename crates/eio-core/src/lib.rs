//! # eio-core
//!
//! Protocol vocabulary shared by the eio server crates.
//!
//! - **Packets**: [`PacketKind`], [`Packet`] and the application-facing [`Payload`]
//! - **Codec**: batched (polling) and single-frame (websocket) encodings
//! - **Handshake**: the OPEN packet body
//! - **Ids**: [`SessionId`] newtype (UUID v7)
//! - **Errors**: [`DecodeError`] and [`EngineError`] via `thiserror`

#![deny(unsafe_code)]

pub mod codec;
pub mod errors;
pub mod handshake;
pub mod ids;
pub mod packet;

pub use codec::{
    BatchDecoder, Frame, decode_batch, decode_batch_all, decode_frame, encode_batch, encode_frame,
};
pub use errors::{DecodeError, EngineError, Result};
pub use handshake::Handshake;
pub use ids::SessionId;
pub use packet::{Packet, PacketKind, Payload};

/// Protocol revision carried in the `EIO` query parameter.
pub const PROTOCOL_VERSION: u8 = 4;
