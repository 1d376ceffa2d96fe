//! Per-client session.
//!
//! A [`Session`] is the logical connection to one client. It outlives any
//! single transport: it starts on either polling or `WebSocket`, and a
//! polling session may be upgraded to `WebSocket` mid-flight.
//!
//! The control loop (`Session::run`) is the single thread of control for
//! lifecycle state, heartbeat and handler invocation. Transports talk to it
//! only through the two zero-capacity handoff queues (`inbound` and
//! `outbound`) plus a small lock-guarded block holding the
//! pending long-poll and the active-transport pointer.

pub mod heartbeat;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use eio_core::{EngineError, Handshake, Packet, PacketKind, Payload, Result, SessionId};
use futures::FutureExt;
use futures::future::{BoxFuture, OptionFuture};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::handoff::{Handoff, HandoffClosed};
use crate::registry::SessionRegistry;
use crate::transport::{
    AnyTransport, PollingTransport, Transport, TransportId, TransportKind, WebSocketTransport,
};
use heartbeat::{Heartbeat, Phase};

/// Session lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Created, OPEN packet not yet delivered.
    Opening,
    /// Handshake done, traffic flowing.
    Open,
    /// A `WebSocket` probe is in progress; polling still carries traffic.
    Upgrading,
    /// Teardown started.
    Closing,
    /// Teardown finished; the session is out of the registry.
    Closed,
}

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// [`Session::close`] or server shutdown.
    Requested,
    /// The client sent a CLOSE packet.
    ClientClose,
    /// No PONG within the ping timeout.
    PingTimeout,
    /// The active transport's connection went away.
    TransportClosed,
    /// Writing to the active transport failed.
    TransportError,
}

impl CloseReason {
    /// Short name for logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::ClientClose => "client close",
            Self::PingTimeout => "ping timeout",
            Self::TransportClosed => "transport close",
            Self::TransportError => "transport error",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<CloseReason> for EngineError {
    fn from(reason: CloseReason) -> Self {
        match reason {
            CloseReason::PingTimeout => Self::PingTimeout,
            _ => Self::SocketClosed,
        }
    }
}

/// Per-session timing and size limits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionOptions {
    /// Time between PINGs.
    pub ping_interval: Duration,
    /// Time allowed for a PONG.
    pub ping_timeout: Duration,
    /// Time allowed for the probe/upgrade exchange.
    pub upgrade_timeout: Duration,
    /// Advertised maximum polling body size.
    pub max_payload: u64,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_millis(25_000),
            ping_timeout: Duration::from_millis(20_000),
            upgrade_timeout: Duration::from_millis(10_000),
            max_payload: 1_000_000,
        }
    }
}

/// Receives every decoded MESSAGE and PAYLOAD.
pub type MessageHandler = Arc<dyn Fn(Payload) + Send + Sync>;
/// Called once at teardown.
pub type ClosedHandler = Arc<dyn Fn(CloseReason) + Send + Sync>;
/// Called once per session after the OPEN packet is delivered.
pub type ConnectionHandler = Arc<dyn Fn(Session) + Send + Sync>;

// ── Outbound envelope ──

/// A packet on its way to a transport, with an optional signal fired once
/// the transport has written it.
pub(crate) struct Outgoing {
    packet: Packet,
    flushed: Option<oneshot::Sender<()>>,
}

impl Outgoing {
    pub(crate) fn new(packet: Packet) -> Self {
        Self {
            packet,
            flushed: None,
        }
    }

    fn with_ack(packet: Packet) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                packet,
                flushed: Some(tx),
            },
            rx,
        )
    }

    pub(crate) fn packet(&self) -> &Packet {
        &self.packet
    }

    pub(crate) fn into_parts(self) -> (Packet, Option<oneshot::Sender<()>>) {
        (self.packet, self.flushed)
    }
}

// ── Shared state ──

#[derive(Default)]
struct Handlers {
    message: Option<MessageHandler>,
    closed: Option<ClosedHandler>,
}

struct PendingPoll {
    ticket: u64,
    release: oneshot::Sender<()>,
}

/// Fields touched from both the control loop and transports.
struct Shared {
    state: SessionState,
    active: AnyTransport,
    upgrading: Option<TransportId>,
    /// The upgrading transport has answered the probe; polling must not park.
    probed: bool,
    pending_poll: Option<PendingPoll>,
    next_poll_ticket: u64,
}

pub(crate) struct SessionInner {
    id: SessionId,
    options: SessionOptions,
    token: CancellationToken,
    inbound: Handoff<Packet>,
    outbound: Handoff<Outgoing>,
    shared: Mutex<Shared>,
    handlers: Mutex<Handlers>,
    connected: AtomicBool,
    close_reason: Mutex<Option<CloseReason>>,
    torn_down: AtomicBool,
    polling: Option<Arc<PollingTransport>>,
    registry: Weak<SessionRegistry>,
}

/// Handle to a session. Cheap to clone.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Build a session whose first transport is `kind`. The caller must
    /// spawn `run`.
    pub(crate) fn new(
        id: SessionId,
        options: SessionOptions,
        kind: TransportKind,
        registry: Weak<SessionRegistry>,
    ) -> Self {
        let token = CancellationToken::new();
        let inner = Arc::new_cyclic(|session: &Weak<SessionInner>| {
            let child = token.child_token();
            let (active, polling) = match kind {
                TransportKind::Polling => {
                    let polling = Arc::new(PollingTransport::new(session.clone(), child));
                    (AnyTransport::Polling(polling.clone()), Some(polling))
                }
                TransportKind::WebSocket => (
                    AnyTransport::WebSocket(Arc::new(WebSocketTransport::new(
                        session.clone(),
                        child,
                    ))),
                    None,
                ),
            };
            SessionInner {
                id,
                options,
                token,
                inbound: Handoff::new(),
                outbound: Handoff::new(),
                shared: Mutex::new(Shared {
                    state: SessionState::Opening,
                    active,
                    upgrading: None,
                    probed: false,
                    pending_poll: None,
                    next_poll_ticket: 0,
                }),
                handlers: Mutex::new(Handlers::default()),
                connected: AtomicBool::new(false),
                close_reason: Mutex::new(None),
                torn_down: AtomicBool::new(false),
                polling,
                registry,
            }
        });
        Self { inner }
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<SessionInner> {
        &self.inner
    }

    /// Session id.
    pub fn id(&self) -> &SessionId {
        &self.inner.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.inner.shared.lock().state
    }

    /// True from OPEN until teardown.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// Kind of the transport currently carrying traffic.
    pub fn transport_kind(&self) -> TransportKind {
        self.inner.shared.lock().active.kind()
    }

    /// Why the session ended, once it has.
    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.inner.close_reason.lock()
    }

    /// Timing and size limits.
    pub fn options(&self) -> &SessionOptions {
        &self.inner.options
    }

    /// Whether a polling GET is parked waiting for outbound data.
    pub fn has_pending_poll(&self) -> bool {
        self.inner.shared.lock().pending_poll.is_some()
    }

    /// Queue a text or binary message. Resolves once a transport has taken
    /// it; fails with [`EngineError::SocketClosed`] if the session closes
    /// first, or [`EngineError::PingTimeout`] if the heartbeat closed it.
    pub async fn send(&self, payload: impl Into<Payload>) -> Result<()> {
        self.send_packet(Packet::from(payload.into())).await
    }

    /// Queue an application packet. Control kinds are rejected with
    /// [`EngineError::MessageNotSupported`].
    pub async fn send_packet(&self, packet: Packet) -> Result<()> {
        let kind = packet.kind();
        if !kind.is_application() {
            return Err(EngineError::MessageNotSupported(kind));
        }
        self.inner.enqueue(Outgoing::new(packet)).await
    }

    /// Like [`send`](Self::send), but resolves only after the transport has
    /// written the bytes.
    pub async fn send_flushed(&self, payload: impl Into<Payload>) -> Result<()> {
        let (outgoing, flushed) = Outgoing::with_ack(Packet::from(payload.into()));
        self.inner.enqueue(outgoing).await?;
        tokio::select! {
            biased;
            ack = flushed => ack.map_err(|_| self.inner.closed_error()),
            () = self.inner.token.cancelled() => Err(self.inner.closed_error()),
        }
    }

    /// Register the message handler. Last registration wins.
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(Payload) + Send + Sync + 'static,
    {
        self.inner.handlers.lock().message = Some(Arc::new(handler));
    }

    /// Register the close handler. Last registration wins.
    pub fn on_closed<F>(&self, handler: F)
    where
        F: Fn(CloseReason) + Send + Sync + 'static,
    {
        self.inner.handlers.lock().closed = Some(Arc::new(handler));
    }

    /// Close the session. Idempotent and safe from any task.
    pub fn close(&self) {
        self.inner.close_with(CloseReason::Requested);
    }

    // ── Control loop ──

    /// Drive the session until it closes, then tear it down.
    #[instrument(skip_all, fields(sid = %self.inner.id))]
    pub(crate) async fn run(self, on_connection: Option<ConnectionHandler>) {
        let reason = self.drive(on_connection).await;
        self.inner.teardown(reason);
    }

    async fn drive(&self, on_connection: Option<ConnectionHandler>) -> CloseReason {
        if let Err(reason) = self.open().await {
            return reason;
        }
        if let Some(on_connection) = on_connection {
            on_connection(self.clone());
        }

        let inner = &*self.inner;
        let mut heartbeat = Heartbeat::new(inner.options.ping_interval, inner.options.ping_timeout);
        let mut ping: Option<BoxFuture<'_, std::result::Result<(), HandoffClosed>>> = None;

        loop {
            tokio::select! {
                biased;
                () = inner.token.cancelled() => return inner.requested_reason(),
                () = heartbeat.expired() => match heartbeat.phase() {
                    Phase::Interval => {
                        debug!("sending ping");
                        heartbeat.ping_sent();
                        ping = Some(inner.outbound.put(Outgoing::new(Packet::control(PacketKind::Ping))).boxed());
                    }
                    Phase::Timeout => {
                        warn!("no pong within ping timeout");
                        return CloseReason::PingTimeout;
                    }
                },
                Some(sent) = OptionFuture::from(ping.as_mut()), if ping.is_some() => {
                    ping = None;
                    if sent.is_err() {
                        return inner.requested_reason();
                    }
                }
                packet = inner.inbound.take() => match packet {
                    Some(packet) => {
                        if let Some(reason) = self.dispatch(packet, &mut heartbeat) {
                            return reason;
                        }
                    }
                    None => return inner.requested_reason(),
                },
            }
        }
    }

    /// Deliver the OPEN packet and move to [`SessionState::Open`].
    ///
    /// A client that never collects OPEN gets the same budget as one that
    /// ignores a PING.
    async fn open(&self) -> std::result::Result<(), CloseReason> {
        let inner = &*self.inner;
        let packet = match inner.handshake().to_packet() {
            Ok(packet) => packet,
            Err(e) => {
                warn!(error = %e, "failed to encode handshake");
                return Err(CloseReason::TransportError);
            }
        };
        tokio::select! {
            biased;
            () = inner.token.cancelled() => return Err(inner.requested_reason()),
            sent = inner.outbound.put(Outgoing::new(packet)) => {
                if sent.is_err() {
                    return Err(inner.requested_reason());
                }
            }
            () = tokio::time::sleep(inner.options.ping_interval + inner.options.ping_timeout) => {
                warn!("handshake not collected in time");
                return Err(CloseReason::PingTimeout);
            }
        }
        {
            let mut shared = inner.shared.lock();
            if shared.state == SessionState::Opening {
                shared.state = SessionState::Open;
            }
        }
        inner.connected.store(true, Ordering::Release);
        info!(transport = %self.transport_kind(), "session open");
        Ok(())
    }

    fn dispatch(&self, packet: Packet, heartbeat: &mut Heartbeat) -> Option<CloseReason> {
        match packet.kind() {
            PacketKind::Message | PacketKind::Payload => {
                let handler = self.inner.handlers.lock().message.clone();
                if let (Some(handler), Some(payload)) = (handler, packet.into_payload()) {
                    handler(payload);
                }
                None
            }
            PacketKind::Pong => {
                if heartbeat.pong_received() {
                    debug!("pong received");
                }
                None
            }
            PacketKind::Close => Some(CloseReason::ClientClose),
            kind => {
                trace!(%kind, "ignoring control packet");
                None
            }
        }
    }

    // ── Transport-facing surface ──

    /// Polling transport, if the session opened on polling.
    pub(crate) fn polling_transport(&self) -> Option<Arc<PollingTransport>> {
        self.inner.polling.clone()
    }

    /// The `WebSocket` transport, if it is the active one.
    pub(crate) fn active_websocket(&self) -> Option<Arc<WebSocketTransport>> {
        match &self.inner.shared.lock().active {
            AnyTransport::WebSocket(ws) => Some(ws.clone()),
            AnyTransport::Polling(_) => None,
        }
    }

    /// Start an upgrade: only an open polling session with no upgrade in
    /// flight qualifies.
    pub(crate) fn begin_upgrade(&self) -> Result<Arc<WebSocketTransport>> {
        let mut shared = self.inner.shared.lock();
        if shared.state != SessionState::Open
            || shared.upgrading.is_some()
            || shared.active.kind() != TransportKind::Polling
        {
            return Err(EngineError::Transport(format!(
                "cannot upgrade {} session in state {:?}",
                shared.active.kind(),
                shared.state
            )));
        }
        let transport = Arc::new(WebSocketTransport::new(
            Arc::downgrade(&self.inner),
            self.inner.token.child_token(),
        ));
        shared.state = SessionState::Upgrading;
        shared.upgrading = Some(transport.id());
        debug!(sid = %self.inner.id, transport = %transport.id(), "upgrade started");
        Ok(transport)
    }

    /// Drop an in-flight upgrade, leaving polling authoritative.
    pub(crate) fn abort_upgrade(&self, transport: TransportId) {
        self.inner.abort_upgrade(transport);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl SessionInner {
    pub(crate) fn id(&self) -> &SessionId {
        &self.id
    }

    pub(crate) fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    fn handshake(&self) -> Handshake {
        let kind = self.shared.lock().active.kind();
        Handshake {
            sid: self.id.clone(),
            upgrades: kind.upgrades(),
            ping_interval: u64::try_from(self.options.ping_interval.as_millis()).unwrap_or(u64::MAX),
            ping_timeout: u64::try_from(self.options.ping_timeout.as_millis()).unwrap_or(u64::MAX),
            max_payload: self.options.max_payload,
        }
    }

    fn requested_reason(&self) -> CloseReason {
        self.close_reason.lock().unwrap_or(CloseReason::Requested)
    }

    /// Error handed to senders once the session has ended.
    fn closed_error(&self) -> EngineError {
        self.close_reason
            .lock()
            .map_or(EngineError::SocketClosed, EngineError::from)
    }

    async fn enqueue(&self, outgoing: Outgoing) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(self.closed_error());
        }
        tokio::select! {
            biased;
            () = self.token.cancelled() => Err(self.closed_error()),
            sent = self.outbound.put(outgoing) => sent.map_err(|_| self.closed_error()),
        }
    }

    /// Wait for the next outbound packet. `None` once the session closes.
    pub(crate) async fn take_outbound(&self) -> Option<Outgoing> {
        self.outbound.take().await
    }

    /// Claim an outbound packet only if one is already waiting.
    pub(crate) fn try_take_outbound(&self) -> Option<Outgoing> {
        self.outbound.try_take()
    }

    /// Hand `packet` to the control loop. Returns `false` if `token` was
    /// cancelled first, in which case the packet is dropped.
    pub(crate) async fn deliver(&self, packet: Packet, token: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            () = token.cancelled() => false,
            sent = self.inbound.put(packet) => sent.is_ok(),
        }
    }

    pub(crate) fn is_active(&self, transport: TransportId) -> bool {
        self.shared.lock().active.id() == transport
    }

    /// Record a parked polling GET. The returned receiver fires when the
    /// poll must give up with NOOP; the guard clears the record on drop.
    /// A newer poll supersedes (and releases) an older one.
    ///
    /// Returns `None` once an upgrade has been probed: the poll must answer
    /// NOOP right away so the client can finish the switch.
    pub(crate) fn register_pending_poll(
        &self,
    ) -> Option<(oneshot::Receiver<()>, PendingPollGuard<'_>)> {
        let (release, released) = oneshot::channel();
        let mut shared = self.shared.lock();
        if shared.probed {
            return None;
        }
        shared.next_poll_ticket += 1;
        let ticket = shared.next_poll_ticket;
        if let Some(previous) = shared
            .pending_poll
            .replace(PendingPoll { ticket, release })
        {
            let _ = previous.release.send(());
        }
        Some((
            released,
            PendingPollGuard {
                session: self,
                ticket,
            },
        ))
    }

    /// Record that `transport` answered the probe and release any parked
    /// poll. Polls arriving after this answer NOOP until the upgrade ends.
    /// Returns whether a parked poll was released.
    pub(crate) fn probe_answered(&self, transport: TransportId) -> bool {
        let pending = {
            let mut shared = self.shared.lock();
            if shared.state != SessionState::Upgrading || shared.upgrading != Some(transport) {
                return false;
            }
            shared.probed = true;
            shared.pending_poll.take()
        };
        pending.is_some_and(|p| p.release.send(()).is_ok())
    }

    /// Install `transport` as the active one and retire the old transport.
    pub(crate) fn complete_upgrade(&self, transport: &Arc<WebSocketTransport>) -> Result<()> {
        let previous = {
            let mut shared = self.shared.lock();
            if shared.state != SessionState::Upgrading || shared.upgrading != Some(transport.id()) {
                return Err(EngineError::SocketClosed);
            }
            shared.upgrading = None;
            shared.probed = false;
            shared.state = SessionState::Open;
            std::mem::replace(&mut shared.active, AnyTransport::WebSocket(transport.clone()))
        };
        previous.close();
        info!(sid = %self.id, from = %previous.kind(), to = %transport.kind(), "transport upgraded");
        Ok(())
    }

    pub(crate) fn abort_upgrade(&self, transport: TransportId) {
        let mut shared = self.shared.lock();
        if shared.state == SessionState::Upgrading && shared.upgrading == Some(transport) {
            shared.state = SessionState::Open;
            shared.upgrading = None;
            shared.probed = false;
            debug!(sid = %self.id, %transport, "upgrade aborted");
        }
    }

    /// Ask the control loop to stop. The first recorded reason wins.
    pub(crate) fn close_with(&self, reason: CloseReason) {
        {
            let mut recorded = self.close_reason.lock();
            if recorded.is_none() {
                *recorded = Some(reason);
            }
        }
        self.token.cancel();
        self.outbound.close();
    }

    fn teardown(&self, reason: CloseReason) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.lock().state = SessionState::Closing;
        let reason = {
            let mut recorded = self.close_reason.lock();
            *recorded.get_or_insert(reason)
        };
        self.token.cancel();
        self.outbound.close();
        self.inbound.close();
        self.connected.store(false, Ordering::Release);

        if let Some(registry) = self.registry.upgrade() {
            let _ = registry.remove(&self.id);
        }
        let active = {
            let mut shared = self.shared.lock();
            shared.state = SessionState::Closed;
            shared.upgrading = None;
            shared.probed = false;
            drop(shared.pending_poll.take());
            shared.active.clone()
        };
        active.close();

        let handlers = std::mem::take(&mut *self.handlers.lock());
        info!(%reason, "session closed");
        if let Some(closed) = handlers.closed {
            closed(reason);
        }
    }
}

/// Clears the pending-poll record when the polling GET finishes.
pub(crate) struct PendingPollGuard<'a> {
    session: &'a SessionInner,
    ticket: u64,
}

impl Drop for PendingPollGuard<'_> {
    fn drop(&mut self) {
        let mut shared = self.session.shared.lock();
        if shared
            .pending_poll
            .as_ref()
            .is_some_and(|p| p.ticket == self.ticket)
        {
            shared.pending_poll = None;
        }
    }
}
