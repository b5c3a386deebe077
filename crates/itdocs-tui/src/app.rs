//! Application state management for the itdocs terminal client.
//!
//! This module contains the core `App` struct: the current screen, the login
//! and MFA forms, the cached user profile, and the channels that deliver
//! background results and session events.

use chrono::{DateTime, Utc};
use secrecy::zeroize::{Zeroize, Zeroizing};
use secrecy::SecretString;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use itdocs_core::api::ApiError;
use itdocs_core::auth::{
    AuthError, GuardDecision, LoginOutcome, LoginStateMachine, Session, SessionEvent,
    SessionGuard, TotpCode,
};
use itdocs_core::config::Config;
use itdocs_core::models::UserProfile;

// ============================================================================
// Constants
// ============================================================================

/// Buffer size for the background task message channel.
/// Only profile loads go through it, a handful is plenty.
const CHANNEL_BUFFER_SIZE: usize = 8;

/// Maximum length for username input.
/// Usernames are usually email addresses, 64 chars covers most.
const MAX_USERNAME_LENGTH: usize = 64;

/// Maximum length for password input.
/// 128 chars accommodates password managers and passphrases.
const MAX_PASSWORD_LENGTH: usize = 128;

/// Environment variable that pre-fills the login username
const USERNAME_ENV: &str = "ITDOCS_USERNAME";

/// Shown on the login screen after the session could not be refreshed
pub const SESSION_EXPIRED_MESSAGE: &str = "Session expired. Please log in again.";

// ============================================================================
// UI State Types
// ============================================================================

/// Top-level screens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Login,
    MfaChallenge,
    /// Protected: only reachable through the session guard
    Dashboard,
}

/// Overlay state on top of the current screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Normal,
    ShowingHelp,
    ConfirmingQuit,
    Quitting,
}

/// Login form focus state
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoginFocus {
    Username,
    Password,
    Button,
}

// ============================================================================
// Background Task Results
// ============================================================================

/// Results sent back from background tasks through the MPSC channel.
enum BackgroundResult {
    Profile(Result<UserProfile, ApiError>),
}

// ============================================================================
// Main Application Struct
// ============================================================================

pub struct App {
    pub config: Config,
    session: Session,
    login: LoginStateMachine,
    guard: SessionGuard,
    events: broadcast::Receiver<SessionEvent>,

    // UI State
    pub screen: Screen,
    pub state: AppState,

    // Login form state
    pub login_username: String,
    /// Wiped on every reset; sized up front so typing never reallocates
    pub login_password: Zeroizing<String>,
    pub login_focus: LoginFocus,
    pub login_error: Option<String>,
    /// Informational message above the login form (e.g. session expired)
    pub login_notice: Option<String>,

    // MFA form state
    pub mfa_code: String,
    pub mfa_error: Option<String>,

    // Dashboard
    pub profile: Option<UserProfile>,
    pub profile_loading: bool,
    pub last_refresh: Option<DateTime<Utc>>,

    // Background task channel
    background_rx: mpsc::Receiver<BackgroundResult>,
    background_tx: mpsc::Sender<BackgroundResult>,

    // Status message
    pub status_message: Option<String>,
}

impl App {
    pub fn new(config: Config, session: Session) -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);

        let login_username = std::env::var(USERNAME_ENV)
            .ok()
            .filter(|name| !name.trim().is_empty())
            .or_else(|| config.last_username.clone())
            .unwrap_or_default();

        Self {
            login: session.login(),
            guard: session.guard(),
            events: session.subscribe(),
            config,
            session,

            screen: Screen::Login,
            state: AppState::Normal,

            login_username,
            login_password: password_buffer(),
            login_focus: LoginFocus::Username,
            login_error: None,
            login_notice: None,

            mfa_code: String::new(),
            mfa_error: None,

            profile: None,
            profile_loading: false,
            last_refresh: None,

            background_rx: rx,
            background_tx: tx,

            status_message: None,
        }
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    /// Go to `screen`. The dashboard is guarded; without a session the login
    /// screen is shown instead.
    pub fn navigate(&mut self, screen: Screen) {
        if screen == Screen::Dashboard && self.guard.check() == GuardDecision::RedirectToLogin {
            debug!(route = self.guard.login_route(), "Dashboard requires a session");
            self.start_login();
            return;
        }
        self.screen = screen;
    }

    /// Open the dashboard if a persisted session exists, else the login form
    pub fn start(&mut self) {
        self.navigate(Screen::Dashboard);
        if self.screen == Screen::Dashboard {
            self.load_profile_background();
        }
    }

    pub fn start_login(&mut self) {
        self.screen = Screen::Login;
        self.login_focus = if self.login_username.is_empty() {
            LoginFocus::Username
        } else {
            LoginFocus::Password
        };
        self.login_password.zeroize();
        self.login_error = None;
    }

    pub fn username(&self) -> Option<&str> {
        self.profile
            .as_ref()
            .map(|p| p.username.as_str())
            .or_else(|| self.login.pending_challenge())
    }

    /// When the current tokens were issued by this process
    pub fn token_issued_at(&self) -> Option<DateTime<Utc>> {
        self.session.store().last_issued()
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    /// Attempt login with the credentials from the login form
    pub async fn attempt_login(&mut self) {
        self.login_error = None;
        self.login_notice = None;
        let password = SecretString::from(self.login_password.as_str().to_owned());
        self.login_password.zeroize();

        match self.login.submit(&self.login_username, password).await {
            Ok(LoginOutcome::MfaRequired) => {
                self.mfa_code.clear();
                self.mfa_error = None;
                self.screen = Screen::MfaChallenge;
            }
            Ok(LoginOutcome::Authenticated { profile }) => self.on_authenticated(profile),
            Err(AuthError::AlreadyAuthenticated) => self.navigate(Screen::Dashboard),
            Err(e) => {
                warn!(error = %e, "Login failed");
                self.login_error = Some(user_message(&e));
            }
        }
    }

    /// Verify the code typed into the MFA form
    pub async fn attempt_verify(&mut self) {
        self.mfa_error = None;

        match self.login.verify(&self.mfa_code).await {
            Ok(LoginOutcome::Authenticated { profile }) => self.on_authenticated(profile),
            Ok(LoginOutcome::MfaRequired) => {}
            Err(AuthError::NoPendingChallenge) => {
                self.start_login();
                self.login_error = Some(user_message(&AuthError::NoPendingChallenge));
            }
            Err(e) => {
                warn!(error = %e, "MFA verification failed");
                self.mfa_code.clear();
                self.mfa_error = Some(user_message(&e));
            }
        }
    }

    /// Abandon the MFA step and return to the login form
    pub fn cancel_mfa(&mut self) {
        self.login.cancel();
        self.mfa_code.clear();
        self.mfa_error = None;
        self.start_login();
    }

    pub async fn logout(&mut self) {
        self.login.logout().await;
        self.profile = None;
        self.last_refresh = None;
        self.status_message = None;
        self.start_login();
        self.login_notice = Some("Logged out.".to_string());
    }

    fn on_authenticated(&mut self, profile: Option<UserProfile>) {
        info!(username = %self.login_username, "Login successful");
        self.config.last_username = Some(self.login_username.trim().to_string());
        if let Err(e) = self.config.save() {
            warn!(error = %e, "Failed to save config");
        }

        self.login_password.zeroize();
        self.mfa_code.clear();
        let loaded = profile.is_some();
        self.profile = profile;
        self.navigate(Screen::Dashboard);
        if !loaded {
            self.status_message = Some(
                "Logged in, but the profile could not be loaded. Press r to retry.".to_string(),
            );
        }
    }

    /// Session ended outside of a user action
    fn expire_session(&mut self) {
        self.profile = None;
        self.profile_loading = false;
        self.last_refresh = None;
        self.status_message = None;
        self.state = AppState::Normal;
        self.start_login();
        self.login_notice = Some(SESSION_EXPIRED_MESSAGE.to_string());
    }

    // =========================================================================
    // Background work
    // =========================================================================

    /// Fetch the profile through the authorized pipeline without blocking the UI
    pub fn load_profile_background(&mut self) {
        if self.profile_loading {
            return;
        }
        self.profile_loading = true;
        self.status_message = Some("Loading profile...".to_string());

        let api = self.session.api();
        let tx = self.background_tx.clone();
        tokio::spawn(async move {
            let result = api.fetch_profile().await;
            if tx.send(BackgroundResult::Profile(result)).await.is_err() {
                debug!("App gone before profile arrived");
            }
        });
    }

    /// Drain finished background tasks and session events
    pub fn check_background_tasks(&mut self) {
        while let Ok(result) = self.background_rx.try_recv() {
            self.process_background_result(result);
        }

        loop {
            match self.events.try_recv() {
                Ok(event) => self.handle_session_event(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    debug!(skipped, "Session events lagged");
                }
                Err(_) => break,
            }
        }

        // Tokens can also vanish without an event, e.g. a rejected profile fetch
        if self.screen == Screen::Dashboard
            && self.guard.check() == GuardDecision::RedirectToLogin
        {
            self.expire_session();
        }
    }

    pub(crate) fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Refreshed => {
                debug!("Session refreshed");
                self.last_refresh = Some(Utc::now());
            }
            SessionEvent::Expired => {
                info!("Session expired");
                if self.screen == Screen::Dashboard {
                    self.expire_session();
                } else {
                    // Keep whatever the user is typing
                    self.login_notice = Some(SESSION_EXPIRED_MESSAGE.to_string());
                }
            }
        }
    }

    fn process_background_result(&mut self, result: BackgroundResult) {
        match result {
            BackgroundResult::Profile(Ok(profile)) => {
                self.profile_loading = false;
                self.status_message = None;
                self.profile = Some(profile);
            }
            BackgroundResult::Profile(Err(e)) => {
                self.profile_loading = false;
                if e.is_superseded() {
                    // Started under a session that was logged out or replaced
                    debug!("Discarding profile result from an earlier session");
                    self.status_message = None;
                } else if e.is_unauthorized() {
                    warn!(error = %e, "Profile fetch unauthorized, ending session");
                    self.session.store().clear();
                    self.expire_session();
                } else {
                    warn!(error = %e, "Failed to load profile");
                    self.status_message = Some(format!("Failed to load profile: {}", e));
                }
            }
        }
    }
}

/// Password field storage with room for the longest accepted password
fn password_buffer() -> Zeroizing<String> {
    Zeroizing::new(String::with_capacity(MAX_PASSWORD_LENGTH * 4))
}

/// User-facing text for a login or verification failure
pub fn user_message(error: &AuthError) -> String {
    match error {
        AuthError::Api(ApiError::NetworkError(e)) if e.is_timeout() => {
            "Connection timed out. Please try again.".to_string()
        }
        AuthError::Api(ApiError::NetworkError(_)) => {
            "Unable to connect to server. Check your connection.".to_string()
        }
        AuthError::Api(ApiError::RateLimited) => {
            "Too many attempts. Please wait and try again.".to_string()
        }
        AuthError::Api(e) => format!("Login failed: {}", e),
        other => other.to_string(),
    }
}

// ============================================================================
// Input validation helpers (exported for use in input.rs)
// ============================================================================

/// Check if a character is valid for input (no control characters)
fn is_valid_input_char(c: char) -> bool {
    !c.is_control()
}

/// Check if a username character should be accepted
pub fn can_add_username_char(current_len: usize, c: char) -> bool {
    current_len < MAX_USERNAME_LENGTH && is_valid_input_char(c)
}

/// Check if a password character should be accepted
pub fn can_add_password_char(current_len: usize, c: char) -> bool {
    current_len < MAX_PASSWORD_LENGTH && is_valid_input_char(c)
}

/// Check if a verification code character should be accepted (digits only)
pub fn can_add_code_char(current_len: usize, c: char) -> bool {
    current_len < TotpCode::LENGTH && c.is_ascii_digit()
}

// ============================================================================
// Tests
// ============================================================================
