//! Authorized API client for the itdocs REST backend.
//!
//! Every call made through `ApiClient` carries the stored access token. When
//! the backend answers 401 the client joins (or starts) the single in-flight
//! refresh, then redispatches the call exactly once with the new token. If the
//! refresh fails the session is over: the store is cleared, a
//! `SessionEvent::Expired` is broadcast and the caller gets
//! `ApiError::SessionExpired`.

use std::sync::Arc;

use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::refresh::{RefreshCoordinator, RefreshError};
use super::request::{build_url, ApiRequest};
use super::ApiError;
use crate::auth::TokenStore;
use crate::models::UserProfile;

/// Profile of the authenticated user
const PROFILE_PATH: &str = "/auth/me";

/// One logical request and whether it already used its single retry.
struct Attempt<'a> {
    request: &'a ApiRequest,
    retried: bool,
}

impl<'a> Attempt<'a> {
    fn first(request: &'a ApiRequest) -> Self {
        Self {
            request,
            retried: false,
        }
    }

    fn retry(self) -> Self {
        Self {
            request: self.request,
            retried: true,
        }
    }
}

/// API client for the itdocs backend.
/// Clone is cheap - the HTTP client, store and coordinator are shared.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    store: Arc<TokenStore>,
    refresher: Arc<RefreshCoordinator>,
}

impl ApiClient {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        store: Arc<TokenStore>,
        refresher: Arc<RefreshCoordinator>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            store,
            refresher,
        }
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a request through the authorization pipeline.
    ///
    /// Any response other than 401 is returned untouched, whatever its
    /// status. A 401 triggers one refresh-and-redispatch; the redispatched
    /// response is returned as-is, even if it is another 401.
    pub async fn execute(&self, request: &ApiRequest) -> Result<Response, ApiError> {
        let mut attempt = Attempt::first(request);

        loop {
            let token = self.store.access_token();
            let response = self.dispatch(attempt.request, token.as_deref()).await?;

            if response.status() != StatusCode::UNAUTHORIZED {
                return Ok(response);
            }
            if attempt.retried {
                debug!(path = %request.path(), "Still unauthorized after retry");
                return Ok(response);
            }
            attempt = attempt.retry();

            // Another request may have refreshed or ended the session while
            // this one was out
            match (token.as_deref(), self.store.access_token()) {
                (sent, Some(current)) if sent != Some(current.as_str()) => {
                    debug!(path = %request.path(), "Token rotated meanwhile, retrying");
                    continue;
                }
                (Some(_), None) => {
                    debug!(path = %request.path(), "Session ended meanwhile");
                    return Err(ApiError::SessionExpired(RefreshError::MissingRefreshToken));
                }
                _ => {}
            }

            debug!(path = %request.path(), "Unauthorized, refreshing session");
            if let Err(e) = self.refresher.refresh().await {
                warn!(path = %request.path(), error = %e, "Session expired");
                return Err(ApiError::SessionExpired(e));
            }
        }
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        token: Option<&str>,
    ) -> Result<Response, ApiError> {
        let url = build_url(&self.base_url, request.path());
        let mut builder = self.client.request(request.method().clone(), &url);

        if !request.query_pairs().is_empty() {
            builder = builder.query(request.query_pairs());
        }
        if let Some(body) = request.body() {
            builder = builder.json(body);
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }

        debug!(
            method = %request.method(),
            url = %url,
            authorized = token.is_some(),
            "Dispatching request"
        );
        Ok(builder.send().await?)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Execute and decode a JSON response body
    pub async fn send<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T, ApiError> {
        let response = Self::check_response(self.execute(request).await?).await?;
        response.json().await.map_err(|e| {
            ApiError::InvalidResponse(format!(
                "Failed to parse JSON response from {}: {}",
                request.path(),
                e
            ))
        })
    }

    /// Execute and discard the response body
    pub async fn send_empty(&self, request: &ApiRequest) -> Result<(), ApiError> {
        Self::check_response(self.execute(request).await?).await?;
        Ok(())
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(&ApiRequest::get(path)).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send(&ApiRequest::post(path).json(body)?).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send(&ApiRequest::put(path).json(body)?).await
    }

    pub async fn post_empty(&self, path: &str) -> Result<(), ApiError> {
        self.send_empty(&ApiRequest::post(path)).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.send_empty(&ApiRequest::delete(path)).await
    }

    // ===== Session =====

    /// Fetch the authenticated user's profile
    pub async fn fetch_profile(&self) -> Result<UserProfile, ApiError> {
        self.get(PROFILE_PATH).await
    }
}
