//! Wire-level request/response types and the HTTP transport seam.
//!
//! The pipeline only ever talks to a [`Transport`]; production code uses
//! [`ReqwestTransport`], tests plug in a scripted fake.

use async_trait::async_trait;
use reqwest::{header, Client, Method};
use serde::Serialize;
use tracing::debug;

use super::ApiError;
use crate::config::PipelineConfig;

// ============================================================================
// Constants
// ============================================================================

pub const LOGIN_PATH: &str = "/auth/login";
pub const REFRESH_PATH: &str = "/auth/refresh";
pub const LOGOUT_PATH: &str = "/auth/logout";

/// Endpoints whose 401 must never start a refresh cycle.
const REFRESH_EXCLUDED_PATHS: [&str; 2] = [LOGIN_PATH, REFRESH_PATH];

/// Returns true for the login and refresh endpoints (query string ignored).
pub fn is_auth_endpoint(path: &str) -> bool {
    let path = path.split('?').next().unwrap_or(path);
    let path = path.trim_end_matches('/');
    REFRESH_EXCLUDED_PATHS.contains(&path)
}

/// An outbound call captured with everything needed to replay it.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
    pub headers: Vec<(String, String)>,
    skip_refresh: bool,
}

impl HttpRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            headers: Vec::new(),
            skip_refresh: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attach a JSON body. Serialization failures are local validation errors.
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::Validation(format!("Failed to encode request body: {}", e)))?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Exclude this call from the refresh-and-retry path.
    pub fn without_refresh(mut self) -> Self {
        self.skip_refresh = true;
        self
    }

    /// Safe reads that can be re-sent without duplicating side effects.
    pub fn is_idempotent(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD || self.method == Method::OPTIONS
    }

    /// Whether a 401 on this call may trigger a credential refresh.
    pub fn refresh_eligible(&self) -> bool {
        !self.skip_refresh && !is_auth_endpoint(&self.path)
    }
}

/// A response that arrived, whatever its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends one request. Returns `Err` only when no response was received.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &HttpRequest, bearer: Option<&str>)
        -> Result<HttpResponse, ApiError>;
}

/// HTTP transport over reqwest.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
    base_url: String,
}

impl ReqwestTransport {
    /// Create a transport with a cookie jar, which carries the refresh side-channel.
    pub fn new(config: &PipelineConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .cookie_store(true)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: &HttpRequest,
        bearer: Option<&str>,
    ) -> Result<HttpResponse, ApiError> {
        let url = self.url(&request.path);

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .header(header::ACCEPT, "application/json");
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        debug!(method = %request.method, path = %request.path, status, "Response received");

        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_auth_endpoint() {
        assert!(is_auth_endpoint("/auth/login"));
        assert!(is_auth_endpoint("/auth/refresh"));
        assert!(is_auth_endpoint("/auth/refresh/"));
        assert!(is_auth_endpoint("/auth/login?next=classes"));
        assert!(!is_auth_endpoint("/auth/logout"));
        assert!(!is_auth_endpoint("/classes"));
        assert!(!is_auth_endpoint("/auth/loginx"));
    }

    #[test]
    fn test_refresh_eligibility() {
        assert!(HttpRequest::get("/bookings").refresh_eligible());
        assert!(!HttpRequest::post(LOGIN_PATH).refresh_eligible());
        assert!(!HttpRequest::post(REFRESH_PATH).refresh_eligible());
        assert!(!HttpRequest::post(LOGOUT_PATH).without_refresh().refresh_eligible());
    }

    #[test]
    fn test_idempotency() {
        assert!(HttpRequest::get("/classes").is_idempotent());
        assert!(HttpRequest::new(Method::HEAD, "/classes").is_idempotent());
        assert!(!HttpRequest::post("/classes/1/reserve").is_idempotent());
        assert!(!HttpRequest::delete("/bookings/1").is_idempotent());
        assert!(!HttpRequest::new(Method::PUT, "/bookings/1").is_idempotent());
    }

    #[test]
    fn test_json_body_and_headers() {
        let request = HttpRequest::post("/auth/login")
            .json(&serde_json::json!({"email": "a@b.c"}))
            .unwrap()
            .header("X-Client", "gymbook");
        assert_eq!(request.body.as_ref().unwrap()["email"], "a@b.c");
        assert_eq!(request.headers, vec![("X-Client".to_string(), "gymbook".to_string())]);
    }

    #[test]
    fn test_url_joining() {
        let config = PipelineConfig {
            base_url: "https://gym.example.com/api/".to_string(),
            ..PipelineConfig::default()
        };
        let transport = ReqwestTransport::new(&config).unwrap();
        assert_eq!(transport.url("/classes"), "https://gym.example.com/api/classes");
        assert_eq!(transport.url("classes"), "https://gym.example.com/api/classes");
    }
}
