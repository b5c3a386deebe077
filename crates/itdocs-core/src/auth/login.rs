//! Interactive login with optional TOTP second factor.
//!
//! ```text
//! Unauthenticated --submit (no MFA)--> Authenticated
//! Unauthenticated --submit (MFA)-----> MfaPending
//! MfaPending      --verify-----------> Authenticated
//! MfaPending      --cancel-----------> Unauthenticated
//! any             --logout-----------> Unauthenticated
//! ```
//!
//! Login and verification go straight to the auth gateway. Only the profile
//! fetch that follows a successful login uses the authorized pipeline.

use std::fmt;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::TokenStore;
use crate::api::{ApiClient, ApiError, AuthGateway, LoginGrant};
use crate::models::{TokenPair, UserProfile};

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Username and password are required")]
    MissingCredentials,

    #[error("Invalid verification code")]
    InvalidCode,

    #[error("Verification code must be {} digits", TotpCode::LENGTH)]
    MalformedCode,

    #[error("No verification is pending")]
    NoPendingChallenge,

    #[error("Already logged in")]
    AlreadyAuthenticated,

    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    MfaPending,
    Authenticated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Unauthenticated => write!(f, "logged out"),
            SessionState::MfaPending => write!(f, "verification pending"),
            SessionState::Authenticated => write!(f, "logged in"),
        }
    }
}

/// A six-digit TOTP code, validated before it is sent anywhere
#[derive(Clone, PartialEq, Eq)]
pub struct TotpCode(String);

impl TotpCode {
    pub const LENGTH: usize = 6;

    pub fn parse(input: &str) -> Result<Self, AuthError> {
        let code = input.trim();
        if code.len() == Self::LENGTH && code.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(code.to_string()))
        } else {
            Err(AuthError::MalformedCode)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TotpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TotpCode(******)")
    }
}

/// Result of a successful `submit` or `verify`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Tokens stored. `profile` is `None` when the follow-up fetch failed.
    Authenticated { profile: Option<UserProfile> },
    /// Password accepted, a TOTP code is needed
    MfaRequired,
}

struct MfaChallenge {
    mfa_token: String,
    username: String,
}

pub struct LoginStateMachine {
    gateway: AuthGateway,
    api: ApiClient,
    store: Arc<TokenStore>,
    challenge: Option<MfaChallenge>,
    profile: Option<UserProfile>,
}

impl LoginStateMachine {
    pub fn new(gateway: AuthGateway, api: ApiClient) -> Self {
        let store = Arc::clone(api.store());
        Self {
            gateway,
            api,
            store,
            challenge: None,
            profile: None,
        }
    }

    /// Authenticated follows the token store, so an expired session reads as
    /// logged out without any call into the state machine.
    pub fn state(&self) -> SessionState {
        if self.store.is_authenticated() {
            SessionState::Authenticated
        } else if self.challenge.is_some() {
            SessionState::MfaPending
        } else {
            SessionState::Unauthenticated
        }
    }

    /// Username awaiting a TOTP code
    pub fn pending_challenge(&self) -> Option<&str> {
        self.challenge
            .as_ref()
            .map(|challenge| challenge.username.as_str())
    }

    /// Cached profile of the logged-in user
    pub fn profile(&self) -> Option<&UserProfile> {
        self.profile
            .as_ref()
            .filter(|_| self.store.is_authenticated())
    }

    /// Submit username and password.
    ///
    /// A pending MFA challenge is discarded first. Any 4xx answer is reported
    /// as `InvalidCredentials` without detail.
    pub async fn submit(
        &mut self,
        username: &str,
        password: SecretString,
    ) -> Result<LoginOutcome, AuthError> {
        if self.store.is_authenticated() {
            return Err(AuthError::AlreadyAuthenticated);
        }
        let username = username.trim();
        if username.is_empty() || password.expose_secret().is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        if self.challenge.take().is_some() {
            debug!("Discarding pending MFA challenge");
        }
        self.profile = None;

        debug!(username, "Submitting credentials");
        let grant = self
            .gateway
            .login(username, &password)
            .await
            .map_err(|e| {
                if e.is_rejection() {
                    warn!(username, "Login rejected");
                    AuthError::InvalidCredentials
                } else {
                    AuthError::Api(e)
                }
            })?;

        match grant {
            LoginGrant::Tokens(pair) => {
                info!(username, "Logged in");
                Ok(self.complete(pair).await)
            }
            LoginGrant::MfaRequired { mfa_token } => {
                info!(username, "MFA verification required");
                self.challenge = Some(MfaChallenge {
                    mfa_token,
                    username: username.to_string(),
                });
                Ok(LoginOutcome::MfaRequired)
            }
        }
    }

    /// Verify a TOTP code for the pending challenge.
    ///
    /// A rejected code keeps the challenge, so the user can try again.
    pub async fn verify(&mut self, code: &str) -> Result<LoginOutcome, AuthError> {
        let Some(challenge) = self.challenge.as_ref() else {
            return Err(AuthError::NoPendingChallenge);
        };
        let code = TotpCode::parse(code)?;

        match self
            .gateway
            .verify_mfa(&challenge.mfa_token, code.as_str())
            .await
        {
            Ok(pair) => {
                info!(username = %challenge.username, "MFA verified, logged in");
                self.challenge = None;
                Ok(self.complete(pair).await)
            }
            Err(e) if e.is_rejection() => {
                warn!(username = %challenge.username, "MFA code rejected");
                Err(AuthError::InvalidCode)
            }
            Err(e) => Err(AuthError::Api(e)),
        }
    }

    /// Drop a pending challenge without contacting the backend
    pub fn cancel(&mut self) {
        if self.challenge.take().is_some() {
            debug!("MFA challenge cancelled");
        }
    }

    /// End the session.
    ///
    /// The backend is told when a token is present, but local state is
    /// cleared whatever it answers.
    pub async fn logout(&mut self) {
        self.challenge = None;
        self.profile = None;

        if let Some(access_token) = self.store.access_token() {
            if let Err(e) = self.gateway.logout(Some(&access_token)).await {
                warn!(error = %e, "Logout request failed, clearing local session anyway");
            }
        }
        self.store.clear();
        info!("Logged out");
    }

    /// Return the cached profile, fetching it once if a restored session has
    /// none yet. `None` when not logged in.
    pub async fn ensure_profile(&mut self) -> Result<Option<UserProfile>, AuthError> {
        if !self.store.is_authenticated() {
            return Ok(None);
        }
        if let Some(profile) = self.profile.clone() {
            return Ok(Some(profile));
        }
        self.reload_profile().await.map(Some)
    }

    /// Fetch the profile from the backend, replacing the cached one.
    ///
    /// An authorization failure means the restored tokens are worthless, so
    /// the store is cleared. Other failures leave the session alone.
    pub async fn reload_profile(&mut self) -> Result<UserProfile, AuthError> {
        match self.api.fetch_profile().await {
            Ok(profile) => {
                self.profile = Some(profile.clone());
                Ok(profile)
            }
            Err(e) => {
                if e.is_unauthorized() && !e.is_superseded() {
                    warn!(error = %e, "Profile fetch unauthorized, clearing session");
                    self.profile = None;
                    self.store.clear();
                }
                Err(AuthError::Api(e))
            }
        }
    }

    async fn complete(&mut self, pair: TokenPair) -> LoginOutcome {
        self.store.set_tokens(pair);
        let profile = match self.api.fetch_profile().await {
            Ok(profile) => Some(profile),
            Err(e) => {
                // Tokens are valid; the profile can be loaded later
                warn!(error = %e, "Failed to load profile after login");
                None
            }
        };
        self.profile = profile.clone();
        LoginOutcome::Authenticated { profile }
    }
}
