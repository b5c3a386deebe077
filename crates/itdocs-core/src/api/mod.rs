//! REST API access for the itdocs backend.
//!
//! This module provides:
//! - `ApiClient`: authorized requests with one refresh-and-retry on 401
//! - `AuthGateway`: direct calls to the login, MFA, refresh and logout endpoints
//! - `RefreshCoordinator`: single-flight token refresh shared by all requests
//!
//! The backend uses JWT bearer tokens. Access tokens are short-lived and are
//! renewed with a long-lived refresh token.

pub mod client;
pub mod error;
pub mod gateway;
pub mod refresh;
pub mod request;

pub use client::ApiClient;
pub use error::ApiError;
pub use gateway::{AuthGateway, LoginGrant};
pub use refresh::{RefreshCoordinator, RefreshError, RefreshOutcome};
pub use request::ApiRequest;
