//! Authentication and session state.
//!
//! This module provides:
//! - `TokenStore`: the access/refresh token pair, persisted through a `TokenStorage`
//! - `LoginStateMachine`: username/password login with an optional TOTP step
//! - `SessionGuard`: allow or redirect-to-login decision for protected screens
//! - `Session`: wires the store, API client and refresh coordinator together
//!
//! Tokens live until the backend rejects them. Expiry is never predicted
//! locally; a 401 triggers one refresh, and a failed refresh ends the session.

pub mod events;
pub mod guard;
pub mod login;
pub mod session;
pub mod storage;
pub mod store;

pub use events::SessionEvent;
pub use guard::{GuardDecision, SessionGuard, LOGIN_ROUTE};
pub use login::{AuthError, LoginOutcome, LoginStateMachine, SessionState, TotpCode};
pub use session::Session;
pub use storage::{
    FileTokenStorage, KeyringTokenStorage, MemoryTokenStorage, StoredTokens, TokenStorage,
};
pub use store::TokenStore;
