//! Transport abstraction.
//!
//! A transport bridges one physical channel to a session's handoff queues.
//! Each transport owns a child of the session's cancellation token, so
//! cancelling the session stops every transport while closing one
//! transport leaves the session untouched.

pub mod polling;
pub mod websocket;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

pub use polling::{Delivery, PollResponse, PollingTransport};
pub use websocket::WebSocketTransport;

/// Which physical carrier a transport uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// HTTP long-polling.
    Polling,
    /// Persistent `WebSocket` connection.
    WebSocket,
}

impl TransportKind {
    /// Name used in the `transport` query parameter.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Polling => "polling",
            Self::WebSocket => "websocket",
        }
    }

    /// Parse a `transport` query value.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "polling" => Some(Self::Polling),
            "websocket" => Some(Self::WebSocket),
            _ => None,
        }
    }

    /// Transports a session opened on `self` may upgrade to.
    pub fn upgrades(self) -> Vec<String> {
        match self {
            Self::Polling => vec![Self::WebSocket.name().to_owned()],
            Self::WebSocket => Vec::new(),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Process-unique transport identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TransportId(u64);

impl TransportId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Behaviour common to every transport variant.
pub trait Transport: Send + Sync {
    /// Identity of this transport instance.
    fn id(&self) -> TransportId;

    /// Carrier kind.
    fn kind(&self) -> TransportKind;

    /// This transport's own cancellation token.
    fn token(&self) -> &CancellationToken;

    /// Stop this transport. Does not cancel the owning session.
    fn close(&self) {
        self.token().cancel();
    }

    /// Whether [`close`](Self::close) ran or the session was cancelled.
    fn is_closed(&self) -> bool {
        self.token().is_cancelled()
    }
}

/// A session's active transport.
#[derive(Clone)]
pub enum AnyTransport {
    /// Long-polling.
    Polling(Arc<PollingTransport>),
    /// `WebSocket`.
    WebSocket(Arc<WebSocketTransport>),
}

impl AnyTransport {
    fn inner(&self) -> &dyn Transport {
        match self {
            Self::Polling(t) => t.as_ref(),
            Self::WebSocket(t) => t.as_ref(),
        }
    }
}

impl Transport for AnyTransport {
    fn id(&self) -> TransportId {
        self.inner().id()
    }

    fn kind(&self) -> TransportKind {
        self.inner().kind()
    }

    fn token(&self) -> &CancellationToken {
        self.inner().token()
    }
}

impl fmt::Debug for AnyTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyTransport")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("closed", &self.is_closed())
            .finish()
    }
}
