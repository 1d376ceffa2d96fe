//! Server shutdown: stop accepting requests, close every session, then wait
//! for the listener and the sessions to wind down.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::registry::SessionRegistry;

/// Default timeout for graceful shutdown before giving up.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// How often the registry is checked while sessions tear down.
const DRAIN_POLL: Duration = Duration::from_millis(10);

/// Coordinates shutdown of the listener and every live session.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    registry: Arc<SessionRegistry>,
}

impl ShutdownCoordinator {
    /// Coordinator for the sessions held by `registry`.
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            token: CancellationToken::new(),
            registry,
        }
    }

    /// Token cancelled once shutdown starts. The listener stops on it.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Start shutdown: cancel the token and close every live session.
    /// Repeat calls only close sessions created since.
    pub fn shutdown(&self) {
        if !self.token.is_cancelled() {
            info!(sessions = self.registry.len(), "shutting down engine");
        }
        self.token.cancel();
        self.registry.close_all();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Shut down, then wait up to `timeout` for `handles` to finish and the
    /// registry to empty. Returns `false` if the timeout elapsed first.
    pub async fn graceful_shutdown(
        &self,
        handles: Vec<JoinHandle<()>>,
        timeout: Option<Duration>,
    ) -> bool {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        self.shutdown();
        info!(
            task_count = handles.len(),
            timeout_secs = timeout.as_secs(),
            "waiting for listener and sessions"
        );

        let registry = &self.registry;
        let drain = async move {
            let _ = futures::future::join_all(handles).await;
            while !registry.is_empty() {
                tokio::time::sleep(DRAIN_POLL).await;
            }
        };

        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!(
                remaining = self.registry.len(),
                "shutdown timed out after {timeout:?}"
            );
            return false;
        }
        true
    }
}

impl std::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("shutting_down", &self.is_shutting_down())
            .field("sessions", &self.registry.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use eio_core::SessionId;

    use crate::session::{CloseReason, Session, SessionOptions};
    use crate::transport::TransportKind;

    fn live_session(registry: &Arc<SessionRegistry>) -> (Session, JoinHandle<()>) {
        let session = Session::new(
            SessionId::new(),
            SessionOptions::default(),
            TransportKind::Polling,
            Arc::downgrade(registry),
        );
        registry.insert(session.clone());
        let run = tokio::spawn(session.clone().run(None));
        (session, run)
    }

    #[test]
    fn initial_state_not_shutting_down() {
        let coord = ShutdownCoordinator::new(Arc::new(SessionRegistry::new()));
        assert!(!coord.is_shutting_down());
    }

    #[tokio::test]
    async fn shutdown_cancels_token_and_closes_sessions() {
        let registry = Arc::new(SessionRegistry::new());
        let coord = ShutdownCoordinator::new(registry.clone());
        let token = coord.token();
        let (session, run) = live_session(&registry);

        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
        assert!(token.is_cancelled());

        run.await.unwrap();
        assert_eq!(session.close_reason(), Some(CloseReason::Requested));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn graceful_shutdown_waits_for_listener_and_sessions() {
        let registry = Arc::new(SessionRegistry::new());
        let coord = ShutdownCoordinator::new(registry.clone());
        let token = coord.token();
        let (_a, _run_a) = live_session(&registry);
        let (_b, _run_b) = live_session(&registry);
        let listener = tokio::spawn(async move {
            token.cancelled().await;
        });

        assert!(coord.graceful_shutdown(vec![listener], None).await);
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_shutdown_gives_up_after_timeout() {
        let coord = ShutdownCoordinator::new(Arc::new(SessionRegistry::new()));
        let stuck = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(300)).await;
        });

        assert!(
            !coord
                .graceful_shutdown(vec![stuck], Some(Duration::from_millis(100)))
                .await
        );
        assert!(coord.is_shutting_down());
    }
}
