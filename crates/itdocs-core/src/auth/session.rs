use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use tokio::sync::broadcast;
use tracing::debug;

use super::events::EVENT_CHANNEL_CAPACITY;
use super::storage::{FileTokenStorage, KeyringTokenStorage, TokenStorage};
use super::{LoginStateMachine, SessionEvent, SessionGuard, TokenStore};
use crate::api::{ApiClient, AuthGateway, RefreshCoordinator};
use crate::config::{Config, TokenStorageKind, APP_NAME};

/// Everything that shares one token store: the authorized client, the auth
/// gateway, the refresh coordinator and the session event channel.
///
/// Build one per process. Every component handed out by it sees the same
/// tokens and the same single in-flight refresh.
pub struct Session {
    store: Arc<TokenStore>,
    gateway: AuthGateway,
    api: ApiClient,
    events: broadcast::Sender<SessionEvent>,
}

impl Session {
    /// Open the session described by `config`, restoring persisted tokens
    pub fn open(config: &Config) -> Result<Self> {
        let base_url = config.api_base_url();
        let timeout = config.request_timeout();
        match config.token_storage {
            TokenStorageKind::File => {
                let storage = FileTokenStorage::new(config.data_dir()?);
                debug!(path = %storage.path().display(), "Using file token storage");
                Self::with_storage(&base_url, timeout, storage)
            }
            TokenStorageKind::Keyring => {
                debug!("Using keychain token storage");
                Self::with_storage(&base_url, timeout, KeyringTokenStorage::new())
            }
        }
    }

    pub fn with_storage(
        base_url: &str,
        timeout: Duration,
        storage: impl TokenStorage + 'static,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("itdocs/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        let store = Arc::new(TokenStore::open(storage));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let gateway = AuthGateway::new(client.clone(), base_url);
        let refresher = Arc::new(RefreshCoordinator::new(
            gateway.clone(),
            Arc::clone(&store),
            events.clone(),
        ));
        let api = ApiClient::new(client, base_url, Arc::clone(&store), refresher);

        debug!(app = APP_NAME, base_url, "Session opened");
        Ok(Self {
            store,
            gateway,
            api,
            events,
        })
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    /// Authorized client. Clones share this session's tokens.
    pub fn api(&self) -> ApiClient {
        self.api.clone()
    }

    /// A fresh login flow bound to this session
    pub fn login(&self) -> LoginStateMachine {
        LoginStateMachine::new(self.gateway.clone(), self.api.clone())
    }

    pub fn guard(&self) -> SessionGuard {
        SessionGuard::new(Arc::clone(&self.store))
    }

    /// Receive `Refreshed` and `Expired` notifications
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}
