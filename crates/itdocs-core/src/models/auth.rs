use std::fmt;

use serde::{Deserialize, Serialize};

use crate::utils::redact_token;

/// Access/refresh bearer pair. Both values are opaque to the client.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &redact_token(&self.access_token))
            .field("refresh_token", &redact_token(&self.refresh_token))
            .finish()
    }
}

/// Body of `POST /auth/login`
#[derive(Serialize)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// Body of `POST /auth/mfa-verify`
#[derive(Serialize)]
pub struct MfaVerifyRequest<'a> {
    pub mfa_token: &'a str,
    pub totp_code: &'a str,
}

/// Body of `POST /auth/refresh`
#[derive(Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Response of `POST /auth/login`.
/// Either carries a token pair, or `mfa_required` with an `mfa_token`.
#[derive(Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub mfa_required: bool,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub mfa_token: Option<String>,
}

/// Response of `POST /auth/mfa-verify` and `POST /auth/refresh`
#[derive(Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
}

impl From<TokenResponse> for TokenPair {
    fn from(response: TokenResponse) -> Self {
        TokenPair::new(response.access_token, response.refresh_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_pair_debug_is_redacted() {
        let pair = TokenPair::new("access-secret-value", "refresh-secret-value");
        let debug = format!("{:?}", pair);
        assert!(!debug.contains("secret-value"));
        assert!(debug.contains("access"));
    }

    #[test]
    fn test_parse_login_response_mfa() {
        let json = r#"{"mfa_required": true, "access_token": null, "refresh_token": null, "token_type": "bearer", "mfa_token": "mfa-123"}"#;
        let resp: LoginResponse = serde_json::from_str(json).expect("valid login response");
        assert!(resp.mfa_required);
        assert_eq!(resp.mfa_token.as_deref(), Some("mfa-123"));
        assert!(resp.access_token.is_none());
    }

    #[test]
    fn test_parse_login_response_tokens() {
        let json = r#"{"mfa_required": false, "access_token": "a", "refresh_token": "r", "token_type": "bearer"}"#;
        let resp: LoginResponse = serde_json::from_str(json).expect("valid login response");
        assert!(!resp.mfa_required);
        assert_eq!(resp.access_token.as_deref(), Some("a"));
        assert_eq!(resp.refresh_token.as_deref(), Some("r"));
        assert!(resp.mfa_token.is_none());
    }
}
