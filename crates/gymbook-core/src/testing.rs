//! In-memory fakes shared by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Method;

use crate::api::transport::{
    HttpRequest, HttpResponse, Transport, LOGIN_PATH, LOGOUT_PATH, REFRESH_PATH,
};
use crate::api::ApiError;
use crate::auth::credentials::ACCESS_TOKEN_KEY;
use crate::auth::storage::{MemoryStorage, SecureStorage};

/// Password the fake login endpoint accepts.
pub const GOOD_PASSWORD: &str = "correct-horse";

/// Token issued by the fake login endpoint.
pub const LOGIN_TOKEN: &str = "login-token";

/// How long the fake refresh endpoint takes to answer.
pub const REFRESH_DELAY: Duration = Duration::from_millis(50);

/// Storage whose every operation fails.
pub struct FailingStorage;

impl SecureStorage for FailingStorage {
    fn read(&self, _key: &str) -> Result<Option<String>> {
        anyhow::bail!("keychain locked")
    }

    fn write(&self, _key: &str, _value: &str) -> Result<()> {
        anyhow::bail!("keychain locked")
    }

    fn remove(&self, _key: &str) -> Result<()> {
        anyhow::bail!("keychain locked")
    }
}

/// Memory storage that counts writes and removes of the access token.
#[derive(Default)]
pub struct CountingStorage {
    inner: MemoryStorage,
    token_writes: AtomicUsize,
    token_removes: AtomicUsize,
}

impl CountingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token_writes(&self) -> usize {
        self.token_writes.load(Ordering::SeqCst)
    }

    pub fn token_removes(&self) -> usize {
        self.token_removes.load(Ordering::SeqCst)
    }

    pub fn reset_counts(&self) {
        self.token_writes.store(0, Ordering::SeqCst);
        self.token_removes.store(0, Ordering::SeqCst);
    }
}

impl SecureStorage for CountingStorage {
    fn read(&self, key: &str) -> Result<Option<String>> {
        self.inner.read(key)
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        if key == ACCESS_TOKEN_KEY {
            self.token_writes.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.write(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        if key == ACCESS_TOKEN_KEY {
            self.token_removes.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.remove(key)
    }
}

/// What the fake refresh endpoint does.
#[derive(Debug, Clone)]
pub enum RefreshBehavior {
    /// Issue this token and start accepting it
    Issue(String),
    /// Answer with this status
    Reject(u16),
    /// Answer 200 with this raw body
    Body(String),
    /// Never answer
    Hang,
}

/// A canned answer for one call to a scripted path.
#[derive(Debug, Clone)]
pub enum Scripted {
    Respond(HttpResponse),
    /// Answer after a delay
    After(Duration, HttpResponse),
    Fail(ApiError),
    Hang,
}

impl Scripted {
    pub fn status(status: u16) -> Self {
        Scripted::Respond(HttpResponse::new(status, ""))
    }

    pub fn ok(data: serde_json::Value) -> Self {
        Scripted::Respond(HttpResponse::new(
            200,
            serde_json::json!({"success": true, "error": null, "data": data}).to_string(),
        ))
    }
}

/// One call as seen by the fake backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub bearer: Option<String>,
}

/// Scripted stand-in for the gym backend.
///
/// Unscripted paths answer 200 when the bearer matches the accepted token
/// and 401 otherwise.
pub struct FakeBackend {
    accepted_token: Mutex<Option<String>>,
    refresh: Mutex<RefreshBehavior>,
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<Vec<RecordedCall>>,
    refresh_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            accepted_token: Mutex::new(None),
            refresh: Mutex::new(RefreshBehavior::Reject(401)),
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            refresh_calls: AtomicUsize::new(0),
        })
    }

    pub fn accept_token(&self, token: &str) {
        *self.accepted_token.lock() = Some(token.to_string());
    }

    pub fn set_refresh(&self, behavior: RefreshBehavior) {
        *self.refresh.lock() = behavior;
    }

    /// Queue answers for `path`; once drained the path falls back to token checks.
    pub fn script(&self, path: &str, answers: Vec<Scripted>) {
        self.scripts
            .lock()
            .entry(path.to_string())
            .or_default()
            .extend(answers);
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, path: &str) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.path == path)
            .cloned()
            .collect()
    }

    async fn answer_refresh(&self) -> Result<HttpResponse, ApiError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(REFRESH_DELAY).await;

        let behavior = self.refresh.lock().clone();
        match behavior {
            RefreshBehavior::Issue(token) => {
                self.accept_token(&token);
                Ok(HttpResponse::new(
                    200,
                    serde_json::json!({"success": true, "error": null, "data": {"accessToken": token}})
                        .to_string(),
                ))
            }
            RefreshBehavior::Reject(status) => Ok(HttpResponse::new(
                status,
                serde_json::json!({"success": false, "error": "Refresh token expired"}).to_string(),
            )),
            RefreshBehavior::Body(body) => Ok(HttpResponse::new(200, body)),
            RefreshBehavior::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }

    fn answer_login(&self, request: &HttpRequest) -> HttpResponse {
        let password = request
            .body
            .as_ref()
            .and_then(|b| b.get("password"))
            .and_then(|p| p.as_str());

        if password == Some(GOOD_PASSWORD) {
            self.accept_token(LOGIN_TOKEN);
            let email = request.body.as_ref().and_then(|b| b.get("email")).cloned();
            HttpResponse::new(
                200,
                serde_json::json!({
                    "success": true,
                    "error": null,
                    "data": {
                        "accessToken": LOGIN_TOKEN,
                        "user": {"id": "u-1", "email": email, "name": "Sam Lee"}
                    }
                })
                .to_string(),
            )
        } else {
            HttpResponse::new(
                401,
                serde_json::json!({"success": false, "error": "Invalid credentials"}).to_string(),
            )
        }
    }
}

#[async_trait]
impl Transport for FakeBackend {
    async fn send(
        &self,
        request: &HttpRequest,
        bearer: Option<&str>,
    ) -> Result<HttpResponse, ApiError> {
        self.calls.lock().push(RecordedCall {
            method: request.method.clone(),
            path: request.path.clone(),
            bearer: bearer.map(str::to_string),
        });

        if request.path == REFRESH_PATH {
            return self.answer_refresh().await;
        }

        let scripted = self
            .scripts
            .lock()
            .get_mut(&request.path)
            .and_then(|answers| answers.pop_front());
        if let Some(answer) = scripted {
            return match answer {
                Scripted::Respond(response) => Ok(response),
                Scripted::After(delay, response) => {
                    tokio::time::sleep(delay).await;
                    Ok(response)
                }
                Scripted::Fail(error) => Err(error),
                Scripted::Hang => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            };
        }

        if request.path == LOGIN_PATH {
            return Ok(self.answer_login(request));
        }
        if request.path == LOGOUT_PATH {
            *self.accepted_token.lock() = None;
            return Ok(HttpResponse::new(200, r#"{"success": true}"#));
        }

        let accepted = self.accepted_token.lock().clone();
        match (bearer, accepted) {
            (Some(bearer), Some(accepted)) if bearer == accepted => Ok(HttpResponse::new(
                200,
                serde_json::json!({"success": true, "error": null, "data": {"path": request.path}})
                    .to_string(),
            )),
            _ => Ok(HttpResponse::new(401, r#"{"success": false, "error": "jwt expired"}"#)),
        }
    }
}
