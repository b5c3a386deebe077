use std::sync::Arc;

use tokio::sync::watch;

use super::TokenStore;

/// Route of the login screen
pub const LOGIN_ROUTE: &str = "/login";

/// Whether a protected screen may be shown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    RedirectToLogin,
}

/// Gate in front of every protected screen.
///
/// Only checks that a token is present. An expired token is found out on the
/// first rejected call, which then refreshes or expires the session.
#[derive(Clone)]
pub struct SessionGuard {
    store: Arc<TokenStore>,
}

impl SessionGuard {
    pub fn new(store: Arc<TokenStore>) -> Self {
        Self { store }
    }

    pub fn check(&self) -> GuardDecision {
        if self.store.is_authenticated() {
            GuardDecision::Allow
        } else {
            GuardDecision::RedirectToLogin
        }
    }

    pub fn login_route(&self) -> &'static str {
        LOGIN_ROUTE
    }

    /// Follow authentication changes, e.g. to leave a protected screen as
    /// soon as the session expires
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.store.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryTokenStorage;
    use crate::models::TokenPair;

    #[test]
    fn test_redirects_without_tokens() {
        let guard = SessionGuard::new(Arc::new(TokenStore::open(MemoryTokenStorage::new())));
        assert_eq!(guard.check(), GuardDecision::RedirectToLogin);
        assert_eq!(guard.login_route(), "/login");
    }

    #[test]
    fn test_allows_with_tokens() {
        let store = Arc::new(TokenStore::open(MemoryTokenStorage::with_values(
            Some("a"),
            Some("r"),
        )));
        let guard = SessionGuard::new(Arc::clone(&store));
        assert_eq!(guard.check(), GuardDecision::Allow);

        store.clear();
        assert_eq!(guard.check(), GuardDecision::RedirectToLogin);
    }

    #[test]
    fn test_watch_sees_expiry() {
        let store = Arc::new(TokenStore::open(MemoryTokenStorage::new()));
        let guard = SessionGuard::new(Arc::clone(&store));
        let mut rx = guard.watch();

        store.set_tokens(TokenPair::new("a", "r"));
        assert!(*rx.borrow_and_update());
        store.clear();
        assert!(rx.has_changed().expect("sender alive"));
        assert!(!*rx.borrow_and_update());
    }
}
