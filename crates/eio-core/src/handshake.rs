//! OPEN packet body.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::ids::SessionId;
use crate::packet::{Packet, PacketKind};

/// Handshake record sent as the data of the OPEN packet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    /// Session id the client must echo in every later request.
    pub sid: SessionId,
    /// Transports the client may upgrade to.
    pub upgrades: Vec<String>,
    /// Milliseconds between server pings.
    pub ping_interval: u64,
    /// Milliseconds the server waits for a pong.
    pub ping_timeout: u64,
    /// Largest accepted polling body, in bytes.
    pub max_payload: u64,
}

impl Handshake {
    /// Serialize into an OPEN packet.
    pub fn to_packet(&self) -> Result<Packet> {
        let body = serde_json::to_string(self)?;
        Ok(Packet::from_parts(PacketKind::Open, Bytes::from(body)))
    }
}
