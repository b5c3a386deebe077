//! Data models exchanged with the itdocs backend.
//!
//! - `TokenPair`: the access/refresh bearer pair owned by the token store
//! - `LoginResponse`, `TokenResponse`: `/auth/*` response bodies
//! - `UserProfile`: the authenticated user returned by `/auth/me`

pub mod auth;
pub mod user;

pub use auth::{
    LoginRequest, LoginResponse, MfaVerifyRequest, RefreshRequest, TokenPair, TokenResponse,
};
pub use user::UserProfile;
