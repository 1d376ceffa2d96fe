//! Axum endpoint for the engine protocol.
//!
//! One route, any method. The query string picks the transport
//! (`transport=polling|websocket`) and, for existing sessions, the session
//! (`sid=..`). Polling GETs long-poll, polling POSTs ingest a batch, and
//! `WebSocket` requests either open a fresh session or start an upgrade.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::ws::{Message, WebSocketUpgrade};
use axum::extract::{FromRequestParts, Query, Request, State};
use axum::http::request::Parts;
use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use eio_core::{EngineError, PROTOCOL_VERSION, Packet, PacketKind, SessionId};
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::field::Empty;
use tracing::{Span, debug, info, instrument, warn};

use crate::config::ServerConfig;
use crate::registry::SessionRegistry;
use crate::session::{ConnectionHandler, Session};
use crate::shutdown::ShutdownCoordinator;
use crate::transport::websocket::to_message;
use crate::transport::{PollResponse, Transport, TransportKind};

const POLLING_CONTENT_TYPE: &str = "text/plain; charset=UTF-8";

struct ServerInner {
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    shutdown: Arc<ShutdownCoordinator>,
    on_connection: RwLock<Option<ConnectionHandler>>,
}

/// The engine server. Cheap to clone; clones share sessions and handlers.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    /// Create a server with no sessions.
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        Self {
            inner: Arc::new(ServerInner {
                config,
                shutdown: Arc::new(ShutdownCoordinator::new(registry.clone())),
                registry,
                on_connection: RwLock::new(None),
            }),
        }
    }

    /// Register the handler called for every new session once its OPEN
    /// packet has been delivered. Last registration wins.
    pub fn on_connection<F>(&self, handler: F)
    where
        F: Fn(Session) + Send + Sync + 'static,
    {
        *self.inner.on_connection.write() = Some(Arc::new(handler));
    }

    /// Look up a live session.
    pub fn session(&self, id: &SessionId) -> Option<Session> {
        self.inner.registry.get(id)
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Get the session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.inner.registry
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.inner.shutdown
    }

    /// Build the Axum router.
    pub fn router(&self) -> Router {
        let path = &self.inner.config.base_path;
        let path = if path.starts_with('/') {
            path.clone()
        } else {
            format!("/{path}")
        };
        Router::new()
            .route(&path, any(engine_handler))
            .with_state(self.clone())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind and serve until the shutdown coordinator fires.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.inner.config.host, self.inner.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, base_path = %self.inner.config.base_path, "engine server listening");

        let router = self.router();
        let token = self.inner.shutdown.token();
        let handle = tokio::spawn(async move {
            if let Err(error) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                warn!(%error, "engine server stopped with error");
            }
        });
        Ok((local_addr, handle))
    }

    fn open_session(&self, kind: TransportKind) -> Session {
        let session = Session::new(
            SessionId::new(),
            self.inner.config.session_options(),
            kind,
            Arc::downgrade(&self.inner.registry),
        );
        self.inner.registry.insert(session.clone());
        let on_connection = self.inner.on_connection.read().clone();
        drop(tokio::spawn(session.clone().run(on_connection)));
        info!(sid = %session.id(), transport = %kind, "session created");
        session
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.inner.config)
            .field("sessions", &self.inner.registry.len())
            .finish_non_exhaustive()
    }
}

// ── Handlers ──

#[derive(Debug, Deserialize)]
struct EngineQuery {
    #[serde(rename = "EIO")]
    eio: Option<String>,
    transport: Option<String>,
    sid: Option<String>,
}

#[instrument(skip_all, fields(method = %request.method(), sid = Empty, transport = Empty))]
async fn engine_handler(
    State(server): State<Server>,
    Query(query): Query<EngineQuery>,
    request: Request,
) -> Response {
    let version = query.eio.as_deref().and_then(|v| v.parse::<u8>().ok());
    if version != Some(PROTOCOL_VERSION) {
        debug!(eio = ?query.eio, "rejecting protocol version");
        return bad_request("unsupported protocol version");
    }
    let kind = match query.transport.as_deref() {
        None => TransportKind::Polling,
        Some(name) => match TransportKind::from_name(name) {
            Some(kind) => kind,
            None => {
                debug!(transport = name, "rejecting unknown transport");
                return bad_request("unknown transport");
            }
        },
    };

    let span = Span::current();
    let _ = span.record("transport", kind.name());
    if let Some(sid) = &query.sid {
        let _ = span.record("sid", sid.as_str());
    }
    if server.inner.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server shutting down").into_response();
    }

    let sid = query.sid.map(SessionId::from_raw);
    let (parts, body) = request.into_parts();
    match kind {
        TransportKind::Polling => handle_polling(&server, &parts.method, sid, body).await,
        TransportKind::WebSocket => handle_websocket(&server, sid, parts).await,
    }
}

async fn handle_polling(
    server: &Server,
    method: &Method,
    sid: Option<SessionId>,
    body: Body,
) -> Response {
    if method == Method::GET {
        let session = match sid {
            None => server.open_session(TransportKind::Polling),
            Some(sid) => match server.session(&sid) {
                Some(session) => session,
                None => return control_response(PacketKind::Close),
            },
        };
        return match session.polling_transport() {
            Some(polling) => poll_response(polling.poll().await),
            None => control_response(PacketKind::Noop),
        };
    }

    if method == Method::POST {
        let Some(sid) = sid else {
            return bad_request("missing sid");
        };
        let Some(session) = server.session(&sid) else {
            return control_response(PacketKind::Close);
        };
        let Some(polling) = session.polling_transport() else {
            return bad_request("session is not using polling");
        };
        let limit = server.inner.config.max_http_buffer_size;
        let bytes = match axum::body::to_bytes(body, limit).await {
            Ok(bytes) => bytes,
            Err(error) => {
                debug!(%error, limit, "rejecting polling body");
                return bad_request("payload too large");
            }
        };
        return match polling.receive(&bytes).await {
            Ok(delivered) => {
                debug!(delivered, "polling batch received");
                ([(header::CONTENT_TYPE, "text/html")], "ok").into_response()
            }
            Err(EngineError::SocketClosed) => control_response(PacketKind::Close),
            Err(error) => {
                debug!(%error, "rejecting polling body");
                bad_request("transport superseded")
            }
        };
    }

    StatusCode::METHOD_NOT_ALLOWED.into_response()
}

async fn handle_websocket(server: &Server, sid: Option<SessionId>, mut parts: Parts) -> Response {
    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    let Some(sid) = sid else {
        let session = server.open_session(TransportKind::WebSocket);
        let Some(transport) = session.active_websocket() else {
            session.close();
            return reject(upgrade);
        };
        return upgrade
            .on_failed_upgrade(move |error| {
                warn!(sid = %session.id(), %error, "websocket handshake failed");
                session.close();
            })
            .on_upgrade(move |socket| transport.serve(socket));
    };

    let Some(session) = server.session(&sid) else {
        debug!(%sid, "websocket for unknown session");
        return reject(upgrade);
    };
    let transport = match session.begin_upgrade() {
        Ok(transport) => transport,
        Err(error) => {
            debug!(%sid, %error, "refusing upgrade");
            return reject(upgrade);
        }
    };
    let id = transport.id();
    upgrade
        .on_failed_upgrade(move |error| {
            warn!(sid = %session.id(), %error, "upgrade handshake failed");
            session.abort_upgrade(id);
        })
        .on_upgrade(move |socket| transport.serve(socket))
}

/// Accept the socket only to tell the client to go away.
fn reject(upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(|mut socket| async move {
        let _ = socket
            .send(to_message(&Packet::control(PacketKind::Close)))
            .await;
        let _ = socket.send(Message::Close(None)).await;
    })
}

fn poll_response(response: PollResponse) -> Response {
    let body = if response.has_delivery() {
        Body::from_stream(response.into_stream())
    } else {
        Body::from(response.into_body())
    };
    ([(header::CONTENT_TYPE, POLLING_CONTENT_TYPE)], body).into_response()
}

fn control_response(kind: PacketKind) -> Response {
    poll_response(PollResponse::control(kind))
}

fn bad_request(message: &'static str) -> Response {
    (StatusCode::BAD_REQUEST, message).into_response()
}
