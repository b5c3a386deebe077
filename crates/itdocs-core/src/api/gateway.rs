//! Direct calls to the backend's `/auth/*` endpoints.
//!
//! These never go through the retrying pipeline: a 401 from `login` means
//! bad credentials and a 401 from `refresh` means the session is over, so
//! neither may trigger another refresh.

use reqwest::{header, Client, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use super::request::build_url;
use super::ApiError;
use crate::models::{
    LoginRequest, LoginResponse, MfaVerifyRequest, RefreshRequest, TokenPair, TokenResponse,
};

const LOGIN_PATH: &str = "/auth/login";
const MFA_VERIFY_PATH: &str = "/auth/mfa-verify";
const REFRESH_PATH: &str = "/auth/refresh";
const LOGOUT_PATH: &str = "/auth/logout";

/// What the backend granted for a username/password pair
#[derive(Debug)]
pub enum LoginGrant {
    /// Password accepted and no second factor configured
    Tokens(TokenPair),
    /// Password accepted; a TOTP code must be verified against `mfa_token`
    MfaRequired { mfa_token: String },
}

impl TryFrom<LoginResponse> for LoginGrant {
    type Error = ApiError;

    fn try_from(response: LoginResponse) -> Result<Self, Self::Error> {
        if response.mfa_required {
            return match response.mfa_token.filter(|token| !token.is_empty()) {
                Some(mfa_token) => Ok(LoginGrant::MfaRequired { mfa_token }),
                None => Err(ApiError::InvalidResponse(
                    "MFA required but no MFA token issued".to_string(),
                )),
            };
        }

        match (response.access_token, response.refresh_token) {
            (Some(access_token), Some(refresh_token)) => {
                Ok(LoginGrant::Tokens(TokenPair::new(access_token, refresh_token)))
            }
            _ => Err(ApiError::InvalidResponse(
                "Login succeeded but tokens are missing".to_string(),
            )),
        }
    }
}

/// Client for the authentication endpoints.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct AuthGateway {
    client: Client,
    base_url: String,
}

impl AuthGateway {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Submit username and password
    pub async fn login(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<LoginGrant, ApiError> {
        let body = LoginRequest {
            username,
            password: password.expose_secret(),
        };
        let response: LoginResponse = self.post(LOGIN_PATH, &body).await?;
        LoginGrant::try_from(response)
    }

    /// Exchange an MFA token and a TOTP code for a token pair
    pub async fn verify_mfa(
        &self,
        mfa_token: &str,
        totp_code: &str,
    ) -> Result<TokenPair, ApiError> {
        let body = MfaVerifyRequest {
            mfa_token,
            totp_code,
        };
        let response: TokenResponse = self.post(MFA_VERIFY_PATH, &body).await?;
        Ok(response.into())
    }

    /// Exchange a refresh token for a new token pair
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
        let body = RefreshRequest { refresh_token };
        let response: TokenResponse = self.post(REFRESH_PATH, &body).await?;
        Ok(response.into())
    }

    /// Tell the backend the session is over. Response body is ignored.
    pub async fn logout(&self, access_token: Option<&str>) -> Result<(), ApiError> {
        let url = build_url(&self.base_url, LOGOUT_PATH);
        let mut request = self.client.post(&url);
        if let Some(token) = access_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        Self::check_response(response).await?;
        Ok(())
    }

    async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let url = build_url(&self.base_url, path);
        debug!(url = %url, "Auth request");

        let request = self
            .client
            .post(&url)
            .header(header::ACCEPT, "application/json")
            .json(body);

        let response = Self::check_response(request.send().await?).await?;
        response
            .json()
            .await
            .map_err(|e| {
                ApiError::InvalidResponse(format!("Failed to parse {} response: {}", path, e))
            })
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(server: &MockServer) -> AuthGateway {
        AuthGateway::new(Client::new(), server.uri())
    }

    #[test]
    fn test_login_grant_rejects_incomplete_responses() {
        let mfa_without_token = LoginResponse {
            mfa_required: true,
            access_token: None,
            refresh_token: None,
            mfa_token: None,
        };
        assert!(matches!(
            LoginGrant::try_from(mfa_without_token),
            Err(ApiError::InvalidResponse(_))
        ));

        let tokens_missing_refresh = LoginResponse {
            mfa_required: false,
            access_token: Some("a".to_string()),
            refresh_token: None,
            mfa_token: None,
        };
        assert!(matches!(
            LoginGrant::try_from(tokens_missing_refresh),
            Err(ApiError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_login_sends_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .and(body_json(json!({"username": "jdoe", "password": "hunter2"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "mfa_required": false,
                "access_token": "a1",
                "refresh_token": "r1",
                "token_type": "bearer",
                "mfa_token": null
            })))
            .expect(1)
            .mount(&server)
            .await;

        let grant = gateway(&server)
            .login("jdoe", &SecretString::from("hunter2".to_string()))
            .await
            .expect("login succeeds");
        assert!(matches!(grant, LoginGrant::Tokens(ref pair) if pair.access_token == "a1"));
    }

    #[tokio::test]
    async fn test_refresh_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .and(body_json(json!({"refresh_token": "stale"})))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"detail": "Invalid refresh token"})),
            )
            .mount(&server)
            .await;

        let result = gateway(&server).refresh("stale").await;
        assert!(matches!(result, Err(ApiError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_logout_carries_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/logout"))
            .and(header("authorization", "Bearer a1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"message": "Logged out"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        gateway(&server).logout(Some("a1")).await.expect("logout succeeds");
    }
}
