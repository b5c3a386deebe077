//! The token store: single source of truth for "is this client
//! authenticated" and "which bearer token goes on the next request".
//!
//! All reads and writes go through one `RwLock`, so a reader sees either the
//! old pair or the new pair, never a mix. Persistence happens after the lock
//! is released, serialized by a separate mutex so storage sees writes in the
//! same order as memory. Persistence failures are logged and swallowed; the
//! in-memory state stays authoritative for the process.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::storage::{StoredTokens, TokenStorage};
use crate::models::TokenPair;
use crate::utils::redact_token;

struct ActiveTokens {
    pair: TokenPair,
    /// When this process stored the pair; `None` when restored from storage
    issued_at: Option<DateTime<Utc>>,
}

pub struct TokenStore {
    storage: Box<dyn TokenStorage>,
    tokens: RwLock<Option<ActiveTokens>>,
    /// Held across an update and its persistence
    persist: Mutex<()>,
    authenticated: watch::Sender<bool>,
}

/// Storage write owed after an in-memory update
enum Persist {
    Save(TokenPair),
    Clear,
}

impl TokenStore {
    /// Open a store over `storage`, restoring a previously persisted pair.
    ///
    /// Unreadable, corrupt or half-written state restores as unauthenticated
    /// and the leftovers are removed.
    pub fn open(storage: impl TokenStorage + 'static) -> Self {
        let restored = match storage.load() {
            Ok(StoredTokens {
                access_token: Some(access_token),
                refresh_token: Some(refresh_token),
            }) => {
                debug!(access = %redact_token(&access_token), "Restored persisted session");
                Some(ActiveTokens {
                    pair: TokenPair::new(access_token, refresh_token),
                    issued_at: None,
                })
            }
            Ok(StoredTokens {
                access_token: None,
                refresh_token: None,
            }) => None,
            Ok(_) => {
                warn!("Persisted session is incomplete, discarding it");
                Self::discard(&storage);
                None
            }
            Err(e) => {
                warn!(error = %e, "Failed to load persisted session, discarding it");
                Self::discard(&storage);
                None
            }
        };

        let (authenticated, _) = watch::channel(restored.is_some());
        Self {
            storage: Box::new(storage),
            tokens: RwLock::new(restored),
            persist: Mutex::new(()),
            authenticated,
        }
    }

    fn discard(storage: &impl TokenStorage) {
        if let Err(e) = storage.clear() {
            warn!(error = %e, "Failed to remove unusable session state");
        }
    }

    /// Current access token, if any
    pub fn access_token(&self) -> Option<String> {
        self.read()
            .as_ref()
            .map(|tokens| tokens.pair.access_token.clone())
    }

    /// Current refresh token, if any
    pub fn refresh_token(&self) -> Option<String> {
        self.read()
            .as_ref()
            .map(|tokens| tokens.pair.refresh_token.clone())
    }

    /// Replace both tokens and mark the session authenticated.
    pub fn set_tokens(&self, pair: TokenPair) {
        self.update(|_| true, Persist::Save(pair));
    }

    /// Remove both tokens. Calling it on a cleared store is a no-op.
    pub fn clear(&self) {
        self.update(|_| true, Persist::Clear);
    }

    /// Replace the pair only if the store still holds `expected_refresh`.
    ///
    /// Returns false, leaving the store untouched, when the session was ended
    /// or replaced since that refresh token was read.
    pub fn replace_if_current(&self, expected_refresh: &str, pair: TokenPair) -> bool {
        self.update(
            |current| holds_refresh(current, expected_refresh),
            Persist::Save(pair),
        )
    }

    /// Clear the store only if it still holds `expected_refresh`.
    pub fn clear_if_current(&self, expected_refresh: &str) -> bool {
        self.update(
            |current| holds_refresh(current, expected_refresh),
            Persist::Clear,
        )
    }

    /// Apply `change` in memory if `applies` holds, then persist it.
    fn update(
        &self,
        applies: impl FnOnce(Option<&ActiveTokens>) -> bool,
        change: Persist,
    ) -> bool {
        let _persist = self.persist_lock();
        {
            let mut tokens = self.write();
            if !applies(tokens.as_ref()) {
                return false;
            }
            match change {
                Persist::Save(ref pair) => {
                    debug!(access = %redact_token(&pair.access_token), "Tokens updated");
                    *tokens = Some(ActiveTokens {
                        pair: pair.clone(),
                        issued_at: Some(Utc::now()),
                    });
                }
                Persist::Clear => {
                    if tokens.take().is_some() {
                        debug!("Tokens cleared");
                    }
                }
            }
        }

        let authenticated = matches!(change, Persist::Save(_));
        self.authenticated.send_if_modified(|value| {
            let changed = *value != authenticated;
            *value = authenticated;
            changed
        });

        // Readers are no longer blocked; storage order follows the persist lock
        let result = match change {
            Persist::Save(ref pair) => self.storage.save(pair),
            Persist::Clear => self.storage.clear(),
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist token change");
        }
        true
    }

    /// Presence check only; expiry is discovered when the backend rejects a call.
    pub fn is_authenticated(&self) -> bool {
        self.read().is_some()
    }

    /// Receiver that observes changes of the authenticated flag
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.authenticated.subscribe()
    }

    /// When the current pair was stored by this process (login or refresh)
    pub fn last_issued(&self) -> Option<DateTime<Utc>> {
        self.read().as_ref().and_then(|tokens| tokens.issued_at)
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<ActiveTokens>> {
        self.tokens.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<ActiveTokens>> {
        self.tokens.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist_lock(&self) -> MutexGuard<'_, ()> {
        self.persist.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn holds_refresh(current: Option<&ActiveTokens>, expected_refresh: &str) -> bool {
    current.is_some_and(|tokens| tokens.pair.refresh_token == expected_refresh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::storage::{FileTokenStorage, MemoryTokenStorage};

    #[test]
    fn test_empty_store_is_unauthenticated() {
        let store = TokenStore::open(MemoryTokenStorage::new());
        assert!(!store.is_authenticated());
        assert_eq!(store.access_token(), None);
        assert_eq!(store.refresh_token(), None);
        assert_eq!(store.last_issued(), None);
    }

    #[test]
    fn test_set_tokens_visible_to_every_reader() {
        let store = TokenStore::open(MemoryTokenStorage::new());
        store.set_tokens(TokenPair::new("a", "r"));

        assert!(store.is_authenticated());
        for _ in 0..3 {
            assert_eq!(store.access_token().as_deref(), Some("a"));
        }
        assert_eq!(store.refresh_token().as_deref(), Some("r"));
        assert!(store.last_issued().is_some());
    }

    #[test]
    fn test_set_tokens_replaces_both() {
        let storage = MemoryTokenStorage::new();
        let store = TokenStore::open(storage.clone());
        store.set_tokens(TokenPair::new("a1", "r1"));
        store.set_tokens(TokenPair::new("a2", "r2"));

        assert_eq!(store.access_token().as_deref(), Some("a2"));
        assert_eq!(store.refresh_token().as_deref(), Some("r2"));
        assert_eq!(storage.snapshot().access_token.as_deref(), Some("a2"));
        assert_eq!(storage.snapshot().refresh_token.as_deref(), Some("r2"));
    }

    #[test]
    fn test_clear_is_idempotent() {
        let storage = MemoryTokenStorage::new();
        let store = TokenStore::open(storage.clone());
        store.set_tokens(TokenPair::new("a", "r"));

        store.clear();
        store.clear();

        assert!(!store.is_authenticated());
        assert_eq!(store.access_token(), None);
        assert_eq!(storage.snapshot(), StoredTokens::default());
    }

    #[test]
    fn test_tokens_survive_reopen() {
        let storage = MemoryTokenStorage::new();
        TokenStore::open(storage.clone()).set_tokens(TokenPair::new("a", "r"));

        let reopened = TokenStore::open(storage);
        assert!(reopened.is_authenticated());
        assert_eq!(reopened.access_token().as_deref(), Some("a"));
        // Restored pairs were not issued by this process
        assert_eq!(reopened.last_issued(), None);
    }

    #[test]
    fn test_tokens_survive_reopen_on_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        TokenStore::open(FileTokenStorage::new(dir.path().to_path_buf()))
            .set_tokens(TokenPair::new("disk-a", "disk-r"));

        let reopened = TokenStore::open(FileTokenStorage::new(dir.path().to_path_buf()));
        assert_eq!(reopened.access_token().as_deref(), Some("disk-a"));
        assert_eq!(reopened.refresh_token().as_deref(), Some("disk-r"));
    }

    #[test]
    fn test_partial_state_is_unauthenticated_and_discarded() {
        let storage = MemoryTokenStorage::with_values(Some("a"), None);
        let store = TokenStore::open(storage.clone());

        assert!(!store.is_authenticated());
        assert_eq!(storage.snapshot(), StoredTokens::default());
    }

    #[test]
    fn test_corrupt_file_is_unauthenticated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FileTokenStorage::new(dir.path().to_path_buf());
        std::fs::write(storage.path(), "not json at all").expect("write");
        let path = storage.path().clone();

        let store = TokenStore::open(storage);
        assert!(!store.is_authenticated());
        assert!(!path.exists());
    }

    #[test]
    fn test_replace_if_current_requires_same_session() {
        let storage = MemoryTokenStorage::new();
        let store = TokenStore::open(storage.clone());
        store.set_tokens(TokenPair::new("a1", "r1"));

        assert!(store.replace_if_current("r1", TokenPair::new("a2", "r2")));
        assert_eq!(store.access_token().as_deref(), Some("a2"));

        // r1 is no longer the session's refresh token
        assert!(!store.replace_if_current("r1", TokenPair::new("a3", "r3")));
        assert_eq!(store.access_token().as_deref(), Some("a2"));
        assert_eq!(storage.snapshot().refresh_token.as_deref(), Some("r2"));
    }

    #[test]
    fn test_replace_if_current_after_clear_stays_signed_out() {
        let storage = MemoryTokenStorage::new();
        let store = TokenStore::open(storage.clone());
        store.set_tokens(TokenPair::new("a1", "r1"));
        store.clear();

        assert!(!store.replace_if_current("r1", TokenPair::new("a2", "r2")));
        assert!(!store.is_authenticated());
        assert_eq!(storage.snapshot(), StoredTokens::default());
    }

    #[test]
    fn test_clear_if_current_keeps_newer_session() {
        let store = TokenStore::open(MemoryTokenStorage::new());
        store.set_tokens(TokenPair::new("a1", "r1"));
        store.set_tokens(TokenPair::new("a2", "r2"));

        assert!(!store.clear_if_current("r1"));
        assert_eq!(store.access_token().as_deref(), Some("a2"));

        assert!(store.clear_if_current("r2"));
        assert!(!store.is_authenticated());
    }

    #[test]
    fn test_storage_matches_memory_after_racing_writers() {
        let storage = MemoryTokenStorage::new();
        let store = std::sync::Arc::new(TokenStore::open(storage.clone()));

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let store = std::sync::Arc::clone(&store);
                std::thread::spawn(move || {
                    for round in 0..50 {
                        if (i + round) % 3 == 0 {
                            store.clear();
                        } else {
                            store.set_tokens(TokenPair::new(format!("a{i}-{round}"), "r"));
                        }
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().expect("writer thread");
        }

        assert_eq!(storage.snapshot().access_token, store.access_token());
    }

    #[test]
    fn test_subscribe_observes_changes() {
        let store = TokenStore::open(MemoryTokenStorage::new());
        let mut rx = store.subscribe();
        assert!(!*rx.borrow_and_update());

        store.set_tokens(TokenPair::new("a", "r"));
        assert!(rx.has_changed().expect("sender alive"));
        assert!(*rx.borrow_and_update());

        // A refresh keeps the session authenticated: no change to observe
        store.set_tokens(TokenPair::new("a2", "r2"));
        assert!(!rx.has_changed().expect("sender alive"));

        store.clear();
        assert!(!*rx.borrow_and_update());
        store.clear();
        assert!(!rx.has_changed().expect("sender alive"));
    }
}
