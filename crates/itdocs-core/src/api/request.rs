use reqwest::Method;
use serde::Serialize;
use serde_json::Value;

use super::ApiError;

/// Immutable description of one logical API call.
///
/// The pipeline rebuilds the HTTP request from this on every dispatch, so a
/// retry never depends on mutating a request that was already sent.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Append a query parameter
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Attach a JSON body
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidRequest(format!("Failed to encode body: {}", e)))?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    pub(crate) fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }
}

/// Join the API base URL and a request path without doubling slashes.
pub(crate) fn build_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    let path = path.trim();

    if base.is_empty() {
        path.to_string()
    } else {
        format!("{}/{}", base, path.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_url() {
        assert_eq!(
            build_url("http://localhost:8000/api/v1/", "/auth/me"),
            "http://localhost:8000/api/v1/auth/me"
        );
        assert_eq!(
            build_url("http://localhost:8000/api/v1", "auth/me"),
            "http://localhost:8000/api/v1/auth/me"
        );
        assert_eq!(build_url("", "/auth/me"), "/auth/me");
    }

    #[test]
    fn test_request_builder() {
        let request = ApiRequest::post("/organizations")
            .query("page", "2")
            .json(&serde_json::json!({"name": "Acme"}))
            .expect("encodable body");

        assert_eq!(request.method(), &Method::POST);
        assert_eq!(request.path(), "/organizations");
        assert_eq!(request.query_pairs(), &[("page".to_string(), "2".to_string())]);
        assert_eq!(request.body(), Some(&serde_json::json!({"name": "Acme"})));
    }
}
