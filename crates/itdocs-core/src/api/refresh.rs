//! Single-flight token refresh.
//!
//! Any number of requests may discover an expired access token at the same
//! time. The first one starts a refresh; every later one attaches to the same
//! shared future until it settles. The refresh runs on its own task, so a
//! caller that stops waiting cannot cancel it for the others.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::gateway::AuthGateway;
use super::ApiError;
use crate::auth::{SessionEvent, TokenStore};

/// Why a refresh did not produce a new token pair.
/// Cloneable so one outcome can be handed to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("no refresh token stored")]
    MissingRefreshToken,

    #[error("refresh token rejected: {0}")]
    Rejected(String),

    #[error("refresh request failed: {0}")]
    Transport(String),

    #[error("refresh task ended unexpectedly: {0}")]
    Aborted(String),

    #[error("session changed while the refresh was in flight")]
    Superseded,
}

impl From<ApiError> for RefreshError {
    fn from(error: ApiError) -> Self {
        match error {
            ApiError::NetworkError(e) => RefreshError::Transport(e.to_string()),
            other => RefreshError::Rejected(other.to_string()),
        }
    }
}

pub type RefreshOutcome = Result<(), RefreshError>;

type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

struct InFlight {
    generation: u64,
    outcome: SharedRefresh,
}

pub struct RefreshCoordinator {
    gateway: AuthGateway,
    store: Arc<TokenStore>,
    events: broadcast::Sender<SessionEvent>,
    in_flight: Mutex<Option<InFlight>>,
    next_generation: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(
        gateway: AuthGateway,
        store: Arc<TokenStore>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            gateway,
            store,
            events,
            in_flight: Mutex::new(None),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Refresh the token pair, or wait for the refresh already in flight.
    ///
    /// On success the store holds the new pair before this returns. On
    /// failure the store is cleared and `SessionEvent::Expired` has been
    /// broadcast exactly once for the whole group of waiters. If the session
    /// was logged out or replaced meanwhile, the store is left alone and the
    /// outcome is `RefreshError::Superseded`.
    pub async fn refresh(self: &Arc<Self>) -> RefreshOutcome {
        self.join_or_start().await
    }

    /// True while a refresh is outstanding
    pub fn is_refreshing(&self) -> bool {
        self.slot().is_some()
    }

    fn join_or_start(self: &Arc<Self>) -> SharedRefresh {
        let mut slot = self.slot();
        if let Some(in_flight) = slot.as_ref() {
            debug!(generation = in_flight.generation, "Joining in-flight refresh");
            return in_flight.outcome.clone();
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        debug!(generation, "Starting token refresh");

        // The slot lock is held until the handle is stored, so the task's own
        // reset of the slot cannot run before it.
        let coordinator = Arc::clone(self);
        let task = tokio::spawn(async move { coordinator.run(generation).await });
        let outcome = async move {
            task.await
                .unwrap_or_else(|e| Err(RefreshError::Aborted(e.to_string())))
        }
        .boxed()
        .shared();

        *slot = Some(InFlight {
            generation,
            outcome: outcome.clone(),
        });
        outcome
    }

    async fn run(&self, generation: u64) -> RefreshOutcome {
        let Some(refresh_token) = self.store.refresh_token() else {
            self.store.clear();
            self.finish(generation);
            warn!(generation, "No refresh token stored, session expired");
            let _ = self.events.send(SessionEvent::Expired);
            return Err(RefreshError::MissingRefreshToken);
        };

        let result = self
            .gateway
            .refresh(&refresh_token)
            .await
            .map_err(RefreshError::from);

        // Only the session this refresh started from may be replaced or
        // ended; a logout or new login in the meantime wins.
        let applied = match &result {
            Ok(pair) => self.store.replace_if_current(&refresh_token, pair.clone()),
            Err(_) => self.store.clear_if_current(&refresh_token),
        };

        // Reset before anyone is told to go to the login screen, so a fresh
        // login can refresh again later.
        self.finish(generation);

        if !applied {
            info!(generation, "Session changed during refresh, result discarded");
            return Err(RefreshError::Superseded);
        }

        match result {
            Ok(_) => {
                info!(generation, "Token refresh succeeded");
                let _ = self.events.send(SessionEvent::Refreshed);
                Ok(())
            }
            Err(e) => {
                warn!(generation, error = %e, "Token refresh failed, session expired");
                let _ = self.events.send(SessionEvent::Expired);
                Err(e)
            }
        }
    }

    fn finish(&self, generation: u64) {
        let mut slot = self.slot();
        if slot
            .as_ref()
            .is_some_and(|in_flight| in_flight.generation == generation)
        {
            *slot = None;
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<InFlight>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{MemoryTokenStorage, StoredTokens};
    use crate::models::TokenPair;
    use futures::future::join_all;
    use reqwest::Client;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn coordinator(
        server: &MockServer,
        store: Arc<TokenStore>,
    ) -> (Arc<RefreshCoordinator>, broadcast::Receiver<SessionEvent>) {
        let (events, rx) = broadcast::channel(16);
        let gateway = AuthGateway::new(Client::new(), server.uri());
        (Arc::new(RefreshCoordinator::new(gateway, store, events)), rx)
    }

    fn signed_in_store() -> Arc<TokenStore> {
        let store = TokenStore::open(MemoryTokenStorage::new());
        store.set_tokens(TokenPair::new("old-access", "old-refresh"));
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .and(body_json(json!({"refresh_token": "old-refresh"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(200))
                    .set_body_json(json!({
                        "access_token": "new-access",
                        "refresh_token": "new-refresh",
                        "token_type": "bearer"
                    })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = signed_in_store();
        let (coordinator, mut events) = coordinator(&server, Arc::clone(&store));

        let outcomes = join_all((0..5).map(|_| coordinator.refresh())).await;
        assert!(outcomes.iter().all(Result::is_ok));

        assert_eq!(store.access_token().as_deref(), Some("new-access"));
        assert_eq!(store.refresh_token().as_deref(), Some("new-refresh"));
        assert!(!coordinator.is_refreshing());
        assert_eq!(events.try_recv().ok(), Some(SessionEvent::Refreshed));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_refresh_clears_store_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_delay(Duration::from_millis(100))
                    .set_body_json(json!({"detail": "Invalid refresh token"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = signed_in_store();
        let (coordinator, mut events) = coordinator(&server, Arc::clone(&store));

        let outcomes = join_all((0..10).map(|_| coordinator.refresh())).await;
        assert!(outcomes
            .iter()
            .all(|outcome| matches!(outcome, Err(RefreshError::Rejected(_)))));

        assert!(!store.is_authenticated());
        assert!(!coordinator.is_refreshing());
        assert_eq!(events.try_recv().ok(), Some(SessionEvent::Expired));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_missing_refresh_token_skips_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let store = Arc::new(TokenStore::open(MemoryTokenStorage::new()));
        let (coordinator, mut events) = coordinator(&server, store);

        assert_eq!(
            coordinator.refresh().await,
            Err(RefreshError::MissingRefreshToken)
        );
        assert_eq!(events.try_recv().ok(), Some(SessionEvent::Expired));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_fatal() {
        // Bind and drop a listener so the port refuses connections
        let uri = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
            format!("http://{}", listener.local_addr().expect("local addr"))
        };
        let store = signed_in_store();
        let (events, _rx) = broadcast::channel(16);
        let coordinator = Arc::new(RefreshCoordinator::new(
            AuthGateway::new(Client::new(), uri),
            Arc::clone(&store),
            events,
        ));

        assert!(matches!(
            coordinator.refresh().await,
            Err(RefreshError::Transport(_))
        ));
        assert!(!store.is_authenticated());
    }

    #[tokio::test]
    async fn test_slot_resets_between_refreshes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "next-access",
                "refresh_token": "next-refresh",
                "token_type": "bearer"
            })))
            .expect(2)
            .mount(&server)
            .await;

        let store = signed_in_store();
        let (coordinator, _events) = coordinator(&server, store);

        coordinator.refresh().await.expect("first refresh");
        coordinator.refresh().await.expect("second refresh");
    }

    #[tokio::test]
    async fn test_logout_during_refresh_stays_logged_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(300))
                    .set_body_json(json!({
                        "access_token": "new-access",
                        "refresh_token": "new-refresh",
                        "token_type": "bearer"
                    })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let storage = MemoryTokenStorage::new();
        let store = Arc::new(TokenStore::open(storage.clone()));
        store.set_tokens(TokenPair::new("old-access", "old-refresh"));
        let (coordinator, mut events) = coordinator(&server, Arc::clone(&store));

        let refresh = tokio::spawn({
            let coordinator = Arc::clone(&coordinator);
            async move { coordinator.refresh().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.clear();

        let outcome = refresh.await.expect("refresh task");
        assert_eq!(outcome, Err(RefreshError::Superseded));
        assert!(!store.is_authenticated());
        assert_eq!(storage.snapshot(), StoredTokens::default());
        assert!(!coordinator.is_refreshing());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_newer_login() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_delay(Duration::from_millis(300))
                    .set_body_json(json!({"detail": "Invalid refresh token"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = signed_in_store();
        let (coordinator, mut events) = coordinator(&server, Arc::clone(&store));

        let refresh = tokio::spawn({
            let coordinator = Arc::clone(&coordinator);
            async move { coordinator.refresh().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.clear();
        store.set_tokens(TokenPair::new("second-access", "second-refresh"));

        let outcome = refresh.await.expect("refresh task");
        assert_eq!(outcome, Err(RefreshError::Superseded));
        assert_eq!(store.access_token().as_deref(), Some("second-access"));
        assert!(events.try_recv().is_err());
    }
}
