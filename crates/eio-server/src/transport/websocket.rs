//! `WebSocket` transport.
//!
//! One transport per socket. A socket that joins an existing polling
//! session first runs the probe exchange; once the session switches over,
//! the socket is pumped in both directions until either side closes.

use std::fmt;
use std::sync::{Arc, Weak};

use axum::extract::ws::{Message, WebSocket};
use eio_core::{
    DecodeError, EngineError, Frame, Packet, PacketKind, Result, decode_frame, encode_frame,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{Transport, TransportId, TransportKind};
use crate::session::{CloseReason, SessionInner};

/// Transport backed by a single `WebSocket` connection.
pub struct WebSocketTransport {
    id: TransportId,
    session: Weak<SessionInner>,
    token: CancellationToken,
}

impl WebSocketTransport {
    pub(crate) fn new(session: Weak<SessionInner>, token: CancellationToken) -> Self {
        Self {
            id: TransportId::next(),
            session,
            token,
        }
    }

    /// Run this transport over `socket` until it closes.
    ///
    /// If the transport is not yet the session's active one it must first
    /// win the probe exchange; a failed probe leaves polling in charge.
    pub async fn serve(self: Arc<Self>, mut socket: WebSocket) {
        let Some(session) = self.session.upgrade() else {
            let _ = socket.send(Message::Close(None)).await;
            return;
        };

        if !session.is_active(self.id) {
            if let Err(error) = self.probe(&session, &mut socket).await {
                warn!(sid = %session.id(), transport = %self.id, %error, "upgrade failed");
                session.abort_upgrade(self.id);
                self.close();
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
        }

        self.pump(session, socket).await;
    }

    /// `2probe` → `3probe`, release the parked poll, then wait for UPGRADE.
    async fn probe(self: &Arc<Self>, session: &SessionInner, socket: &mut WebSocket) -> Result<()> {
        let exchange = async {
            let ping = read_packet(&mut *socket).await?;
            if !ping.is_probe(PacketKind::Ping) {
                return Err(EngineError::UnexpectedPacket {
                    expected: PacketKind::Ping,
                    actual: ping.kind(),
                });
            }
            write_packet(&mut *socket, &Packet::probe(PacketKind::Pong)).await?;
            if session.probe_answered(self.id) {
                debug!(sid = %session.id(), "released pending poll for upgrade");
            }

            let upgrade = read_packet(&mut *socket).await?;
            if upgrade.kind() != PacketKind::Upgrade {
                return Err(EngineError::UnexpectedPacket {
                    expected: PacketKind::Upgrade,
                    actual: upgrade.kind(),
                });
            }
            session.complete_upgrade(self)
        };

        tokio::select! {
            biased;
            () = self.token.cancelled() => Err(EngineError::SocketClosed),
            outcome = tokio::time::timeout(session.options().upgrade_timeout, exchange) => {
                outcome.map_err(|_| EngineError::Timeout)?
            }
        }
    }

    /// Forward packets both ways until the transport or session stops.
    async fn pump(self: &Arc<Self>, session: Arc<SessionInner>, socket: WebSocket) {
        let (mut sink, mut stream) = socket.split();
        let (failed_tx, mut failed_rx) = oneshot::channel::<EngineError>();

        let reader = {
            let session = session.clone();
            let token = self.token.clone();
            tokio::spawn(async move {
                loop {
                    match read_packet(&mut stream).await {
                        Ok(packet) => {
                            // Dropped when cancelled; the pump aborts this task.
                            if !session.deliver(packet, &token).await {
                                trace!(sid = %session.id(), "dropping packet for cancelled transport");
                            }
                        }
                        Err(EngineError::Decode(error)) => {
                            warn!(sid = %session.id(), %error, "discarding malformed websocket frame");
                        }
                        Err(error) => {
                            let _ = failed_tx.send(error);
                            return;
                        }
                    }
                }
            })
        };

        let mut reader_done = false;
        let outcome = loop {
            tokio::select! {
                biased;
                () = self.token.cancelled() => break Ok(()),
                failed = &mut failed_rx, if !reader_done => match failed {
                    Ok(error) => break Err(error),
                    Err(_) => reader_done = true,
                },
                outgoing = session.take_outbound() => match outgoing {
                    Some(outgoing) => {
                        let (packet, flushed) = outgoing.into_parts();
                        if let Err(error) = write_packet(&mut sink, &packet).await {
                            break Err(error);
                        }
                        if let Some(flushed) = flushed {
                            let _ = flushed.send(());
                        }
                    }
                    None => break Ok(()),
                },
            }
        };

        reader.abort();
        let _ = sink.close().await;
        self.close();

        if let Err(error) = outcome {
            if session.is_active(self.id) {
                let reason = match error {
                    EngineError::SocketClosed => CloseReason::TransportClosed,
                    _ => CloseReason::TransportError,
                };
                info!(sid = %session.id(), %error, "websocket ended");
                session.close_with(reason);
            }
        }
    }
}

impl Transport for WebSocketTransport {
    fn id(&self) -> TransportId {
        self.id
    }

    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

// ── Framing ──

/// Convert a packet into the frame that carries it.
pub(crate) fn to_message(packet: &Packet) -> Message {
    match encode_frame(packet) {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(data) => Message::Binary(data),
    }
}

/// Read the next engine packet, skipping control and empty frames.
///
/// A frame that does not decode is returned as [`EngineError::Decode`].
async fn read_packet<S>(stream: &mut S) -> Result<Packet>
where
    S: Stream<Item = std::result::Result<Message, axum::Error>> + Unpin,
{
    loop {
        let frame = match stream.next().await {
            None | Some(Ok(Message::Close(_))) => return Err(EngineError::SocketClosed),
            Some(Err(e)) => return Err(EngineError::Transport(e.to_string())),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Text(text))) => Frame::Text(text.as_str().to_owned()),
            Some(Ok(Message::Binary(data))) => Frame::Binary(data),
        };
        match decode_frame(frame) {
            Ok(packet) => return Ok(packet),
            Err(DecodeError::Empty) => {}
            Err(error) => return Err(error.into()),
        }
    }
}

async fn write_packet<S>(sink: &mut S, packet: &Packet) -> Result<()>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    sink.send(to_message(packet))
        .await
        .map_err(|e| EngineError::Transport(e.to_string()))
}
