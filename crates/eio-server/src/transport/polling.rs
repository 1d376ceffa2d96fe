//! HTTP long-polling transport.
//!
//! Polling has no background task: each request runs inside its own HTTP
//! handler. A GET parks until the session has outbound data, the poll is
//! released (upgrade), or the transport is cancelled. A POST decodes its
//! body and hands each packet to the session's control loop.

use std::convert::Infallible;
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use bytes::Bytes;
use eio_core::{EngineError, Packet, PacketKind, Result, decode_batch, encode_batch};
use futures::Stream;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Transport, TransportId, TransportKind};
use crate::session::{CloseReason, Outgoing, SessionInner};

/// Most packets drained into one polling response.
const MAX_BATCH: usize = 32;

/// Long-polling transport shared by every request of one session.
pub struct PollingTransport {
    id: TransportId,
    session: Weak<SessionInner>,
    token: CancellationToken,
}

impl PollingTransport {
    pub(crate) fn new(session: Weak<SessionInner>, token: CancellationToken) -> Self {
        Self {
            id: TransportId::next(),
            session,
            token,
        }
    }

    /// Serve a GET: wait for outbound packets.
    ///
    /// Answers CLOSE when the session is gone or closing, and NOOP when this
    /// transport is no longer the active one or the poll is released.
    pub async fn poll(&self) -> PollResponse {
        let Some(session) = self.session.upgrade() else {
            return PollResponse::control(PacketKind::Close);
        };
        if session.token().is_cancelled() {
            return PollResponse::control(PacketKind::Close);
        }
        if !session.is_active(self.id) {
            debug!(sid = %session.id(), "poll on superseded transport");
            return PollResponse::control(PacketKind::Noop);
        }

        let Some((released, _pending)) = session.register_pending_poll() else {
            debug!(sid = %session.id(), "poll during probed upgrade");
            return PollResponse::control(PacketKind::Noop);
        };
        tokio::select! {
            biased;
            () = self.token.cancelled() => {
                if session.token().is_cancelled() {
                    PollResponse::control(PacketKind::Close)
                } else {
                    PollResponse::control(PacketKind::Noop)
                }
            }
            _ = released => PollResponse::control(PacketKind::Noop),
            outgoing = session.take_outbound() => match outgoing {
                Some(first) => {
                    let mut batch = vec![first];
                    while batch.len() < MAX_BATCH {
                        match session.try_take_outbound() {
                            Some(next) => batch.push(next),
                            None => break,
                        }
                    }
                    PollResponse::deliver(session.clone(), batch)
                }
                None => PollResponse::control(PacketKind::Close),
            },
        }
    }

    /// Serve a POST: decode `body` and hand each packet to the session.
    ///
    /// A malformed packet ends the batch; packets before it are kept. If the
    /// session closes mid-batch the rest is dropped. Returns how many
    /// packets were delivered.
    ///
    /// Fails with [`EngineError::SocketClosed`] when the session is gone and
    /// [`EngineError::Transport`] once another transport has taken over.
    pub async fn receive(&self, body: &[u8]) -> Result<usize> {
        let session = self.session.upgrade().ok_or(EngineError::SocketClosed)?;
        if !session.is_active(self.id) {
            return Err(EngineError::Transport(
                "polling transport superseded".to_owned(),
            ));
        }
        let mut delivered = 0;
        for decoded in decode_batch(body) {
            let packet = match decoded {
                Ok(packet) => packet,
                Err(error) => {
                    warn!(sid = %session.id(), %error, "discarding rest of malformed polling body");
                    break;
                }
            };
            if !session.deliver(packet, session.token()).await {
                debug!(sid = %session.id(), "session closed mid-batch");
                break;
            }
            delivered += 1;
        }
        Ok(delivered)
    }
}

impl Transport for PollingTransport {
    fn id(&self) -> TransportId {
        self.id
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Polling
    }

    fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl fmt::Debug for PollingTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollingTransport")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

// ── Responses ──

/// Body of a polling GET, plus the bookkeeping owed once it is written.
pub struct PollResponse {
    body: Bytes,
    delivery: Option<Delivery>,
}

impl PollResponse {
    pub(crate) fn control(kind: PacketKind) -> Self {
        Self {
            body: encode_batch(&[Packet::control(kind)]),
            delivery: None,
        }
    }

    fn deliver(session: Arc<SessionInner>, batch: Vec<Outgoing>) -> Self {
        let mut packets = Vec::with_capacity(batch.len());
        let mut acks = Vec::new();
        for outgoing in batch {
            let (packet, flushed) = outgoing.into_parts();
            packets.push(packet);
            acks.extend(flushed);
        }
        Self {
            body: encode_batch(&packets),
            delivery: Some(Delivery {
                session,
                acks,
                completed: false,
            }),
        }
    }

    /// Whether the body carries packets taken from the session.
    pub fn has_delivery(&self) -> bool {
        self.delivery.is_some()
    }

    /// Treat the body as written and return it.
    pub fn into_body(self) -> Bytes {
        if let Some(delivery) = self.delivery {
            delivery.complete();
        }
        self.body
    }

    /// Stream that yields the body, then completes the delivery once the
    /// HTTP layer asks for more.
    pub fn into_stream(self) -> PollBody {
        PollBody {
            chunk: Some(self.body),
            delivery: self.delivery,
        }
    }
}

/// Packets handed to a response that has not been written yet.
///
/// Completing fires the senders' flush signals. Dropping without
/// completing means the response never reached the client, and since
/// polling has nothing to redeliver on, the session is closed.
pub struct Delivery {
    session: Arc<SessionInner>,
    acks: Vec<oneshot::Sender<()>>,
    completed: bool,
}

impl Delivery {
    /// Mark the response as written.
    pub fn complete(mut self) {
        self.completed = true;
        for ack in self.acks.drain(..) {
            let _ = ack.send(());
        }
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if !self.completed {
            warn!(sid = %self.session.id(), "polling response dropped before flush");
            self.session.close_with(CloseReason::TransportError);
        }
    }
}

/// Response body for a polling GET.
pub struct PollBody {
    chunk: Option<Bytes>,
    delivery: Option<Delivery>,
}

impl Stream for PollBody {
    type Item = std::result::Result<Bytes, Infallible>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(chunk) = this.chunk.take() {
            return Poll::Ready(Some(Ok(chunk)));
        }
        if let Some(delivery) = this.delivery.take() {
            delivery.complete();
        }
        Poll::Ready(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use eio_core::{Payload, SessionId};
    use futures::StreamExt;
    use tokio::sync::mpsc;

    use crate::session::{Session, SessionOptions, SessionState};

    fn polling_session() -> (Session, Arc<PollingTransport>) {
        let session = Session::new(
            SessionId::new(),
            SessionOptions::default(),
            TransportKind::Polling,
            Weak::new(),
        );
        let polling = session.polling_transport().unwrap();
        (session, polling)
    }

    /// Start the control loop and consume the handshake poll.
    async fn opened() -> (Session, Arc<PollingTransport>) {
        let (session, polling) = polling_session();
        drop(tokio::spawn(session.clone().run(None)));
        let open = polling.poll().await.into_body();
        assert!(open.windows(3).any(|w| w == b":0{"));
        while session.state() != SessionState::Open {
            tokio::task::yield_now().await;
        }
        (session, polling)
    }

    #[tokio::test]
    async fn handshake_is_first_poll() {
        let (session, polling) = polling_session();
        drop(tokio::spawn(session.clone().run(None)));

        let body = polling.poll().await.into_body();
        let text = std::str::from_utf8(&body).unwrap();
        let (_, packet) = text.split_once(':').unwrap();
        assert!(packet.starts_with('0'));
        let json: serde_json::Value = serde_json::from_str(&packet[1..]).unwrap();
        assert_eq!(json["sid"], session.id().as_str());
        session.close();
    }

    #[tokio::test]
    async fn poll_returns_sent_message() {
        let (session, polling) = opened().await;
        let sender = session.clone();
        let send = tokio::spawn(async move { sender.send("hi").await });

        let response = polling.poll().await;
        assert!(response.has_delivery());
        assert_eq!(&response.into_body()[..], b"3:4hi");
        send.await.unwrap().unwrap();
        session.close();
    }

    #[tokio::test]
    async fn written_body_fires_flush_signal() {
        let (session, polling) = opened().await;
        let sender = session.clone();
        let send = tokio::spawn(async move { sender.send_flushed(vec![1u8]).await });

        let mut stream = polling.poll().await.into_stream();
        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"5:bAQ=="));
        assert!(stream.next().await.is_none());
        send.await.unwrap().unwrap();
        assert!(session.is_connected());
        session.close();
    }

    #[tokio::test]
    async fn dropped_body_closes_session() {
        let (session, polling) = opened().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.on_closed(move |reason| {
            let _ = tx.send(reason);
        });
        let sender = session.clone();
        drop(tokio::spawn(async move { sender.send("lost").await }));

        let response = polling.poll().await;
        drop(response);
        assert_eq!(rx.recv().await, Some(CloseReason::TransportError));
    }

    #[tokio::test]
    async fn probe_answer_releases_parked_poll() {
        let (session, polling) = opened().await;
        let parked = {
            let polling = polling.clone();
            tokio::spawn(async move { polling.poll().await.into_body() })
        };
        while !session.has_pending_poll() {
            tokio::task::yield_now().await;
        }
        let ws = session.begin_upgrade().unwrap();
        assert!(session.inner().probe_answered(ws.id()));
        assert_eq!(&parked.await.unwrap()[..], b"1:6");
        assert!(!session.has_pending_poll());
        session.close();
    }

    #[tokio::test]
    async fn poll_arriving_after_probe_answers_noop() {
        let (session, polling) = opened().await;
        let ws = session.begin_upgrade().unwrap();
        assert!(!session.inner().probe_answered(TransportId::next()));
        assert!(!session.inner().probe_answered(ws.id()));

        let late = tokio::time::timeout(Duration::from_millis(500), polling.poll())
            .await
            .expect("late poll must not park during a probed upgrade");
        assert_eq!(&late.into_body()[..], b"1:6");
        assert!(!session.has_pending_poll());

        session.abort_upgrade(ws.id());
        let parked = {
            let polling = polling.clone();
            tokio::spawn(async move { polling.poll().await.into_body() })
        };
        while !session.has_pending_poll() {
            tokio::task::yield_now().await;
        }
        session.close();
        assert_eq!(&parked.await.unwrap()[..], b"1:1");
    }

    #[tokio::test]
    async fn superseded_transport_answers_noop() {
        let (session, polling) = opened().await;
        let parked = {
            let polling = polling.clone();
            tokio::spawn(async move { polling.poll().await.into_body() })
        };
        while !session.has_pending_poll() {
            tokio::task::yield_now().await;
        }

        let ws = session.begin_upgrade().unwrap();
        session.inner().complete_upgrade(&ws).unwrap();

        assert_eq!(&parked.await.unwrap()[..], b"1:6");
        assert_eq!(&polling.poll().await.into_body()[..], b"1:6");
        session.close();
    }

    #[tokio::test]
    async fn closed_session_answers_close() {
        let (session, polling) = opened().await;
        let parked = {
            let polling = polling.clone();
            tokio::spawn(async move { polling.poll().await.into_body() })
        };
        while !session.has_pending_poll() {
            tokio::task::yield_now().await;
        }
        session.close();
        assert_eq!(&parked.await.unwrap()[..], b"1:1");
        assert_eq!(&polling.poll().await.into_body()[..], b"1:1");
    }

    #[tokio::test]
    async fn dropped_session_answers_close() {
        let (session, polling) = polling_session();
        drop(session);
        assert_eq!(&polling.poll().await.into_body()[..], b"1:1");
        assert!(polling.receive(b"2:4a").await.is_err());
    }

    #[tokio::test]
    async fn receive_delivers_batch_in_order() {
        let (session, polling) = opened().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.on_message(move |payload| {
            let _ = tx.send(payload);
        });

        let delivered = polling.receive(b"2:4a5:bAQID2:4c").await.unwrap();
        assert_eq!(delivered, 3);
        assert_eq!(rx.recv().await, Some(Payload::from("a")));
        assert_eq!(rx.recv().await, Some(Payload::from(vec![1u8, 2, 3])));
        assert_eq!(rx.recv().await, Some(Payload::from("c")));
        session.close();
    }

    #[tokio::test]
    async fn malformed_tail_is_discarded() {
        let (session, polling) = opened().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.on_message(move |payload| {
            let _ = tx.send(payload);
        });

        let delivered = polling.receive(b"2:4a9:4bc").await.unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(rx.recv().await, Some(Payload::from("a")));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
        session.close();
    }

    #[tokio::test]
    async fn receive_on_superseded_transport_fails() {
        let (session, polling) = opened().await;
        let ws = session.begin_upgrade().unwrap();
        assert_eq!(polling.receive(b"2:4a").await.unwrap(), 0);

        session.inner().complete_upgrade(&ws).unwrap();
        assert!(matches!(
            polling.receive(b"2:4a").await,
            Err(EngineError::Transport(_))
        ));
        session.close();
    }

    #[tokio::test]
    async fn receive_after_close_delivers_nothing() {
        let (session, polling) = opened().await;
        session.close();
        assert_eq!(polling.receive(b"2:4a").await.unwrap(), 0);
    }
}
