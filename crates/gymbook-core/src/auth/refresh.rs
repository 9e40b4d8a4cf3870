//! Single-flight credential refresh.
//!
//! Any number of callers can ask for a valid credential after a 401. The
//! first one moves the coordinator from `Idle` to `Refreshing` and starts
//! exactly one call to the refresh endpoint; everyone else queues behind it.
//! When the call settles the outcome is persisted (or the credential cleared),
//! the state returns to `Idle` and every queued waiter receives the same
//! result in arrival order.
//!
//! The state flag and the waiter queue live behind one mutex, which is never
//! held across an await. The refresh itself runs on its own task so it always
//! completes, even if the caller that started it is dropped.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::credentials::{Credential, CredentialStore};
use crate::api::transport::{HttpRequest, Transport, REFRESH_PATH};
use crate::api::ApiError;
use crate::models::ApiEnvelope;

type Outcome = Result<Credential, ApiError>;
type Waiter = oneshot::Sender<Outcome>;

enum RefreshState {
    Idle,
    Refreshing { waiters: VecDeque<Waiter> },
}

#[derive(Debug, Deserialize)]
struct RefreshData {
    #[serde(rename = "accessToken")]
    access_token: String,
}

/// Coalesces concurrent refresh requests into one backend call.
/// Clone is cheap and every clone shares the same state.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    store: CredentialStore,
    timeout: Duration,
    state: Mutex<RefreshState>,
}

impl RefreshCoordinator {
    pub fn new(transport: Arc<dyn Transport>, store: CredentialStore, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                store,
                timeout,
                state: Mutex::new(RefreshState::Idle),
            }),
        }
    }

    /// Refresh the credential, or join the refresh already in flight.
    ///
    /// Fails with [`ApiError::SessionExpired`] when the refresh fails for any
    /// reason; the credential store is empty by then.
    pub async fn ensure_valid_credential(&self) -> Result<Credential, ApiError> {
        self.acquire(None).await
    }

    /// Like [`ensure_valid_credential`](Self::ensure_valid_credential), for a
    /// caller whose request was rejected after going out at store `generation`.
    ///
    /// If the store has changed since then, no new refresh starts: a replaced
    /// credential is returned as is, and a cleared one means the session is
    /// already over.
    pub async fn ensure_valid_credential_since(&self, generation: u64) -> Result<Credential, ApiError> {
        self.acquire(Some(generation)).await
    }

    async fn acquire(&self, sent_at: Option<u64>) -> Result<Credential, ApiError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.inner.state.lock();
            match &mut *state {
                RefreshState::Refreshing { waiters } => {
                    waiters.push_back(tx);
                    debug!(queued = waiters.len(), "Joining in-flight token refresh");
                }
                RefreshState::Idle => {
                    let (current, generation) = self.inner.store.snapshot();
                    if sent_at.is_some_and(|sent| sent != generation) {
                        return match current {
                            Some(credential) => {
                                debug!("Credential already replaced, skipping refresh");
                                Ok(credential)
                            }
                            None => {
                                debug!("Credential cleared since the request was sent, skipping refresh");
                                Err(ApiError::SessionExpired)
                            }
                        };
                    }

                    let mut waiters = VecDeque::new();
                    waiters.push_back(tx);
                    *state = RefreshState::Refreshing { waiters };

                    let inner = Arc::clone(&self.inner);
                    tokio::spawn(async move { inner.run_refresh(generation).await });
                }
            }
        }

        // The refresh task always answers; a closed channel means the runtime is going away.
        rx.await.unwrap_or(Err(ApiError::SessionExpired))
    }
}

impl Inner {
    /// Run one refresh cycle for a store last seen at `started_at`.
    ///
    /// Anything that changed the store meanwhile (logout, a 403, a new login)
    /// wins over the refresh outcome.
    async fn run_refresh(&self, started_at: u64) {
        info!("Refreshing access token");

        let outcome = match self.request_refresh().await {
            Ok(credential) => {
                if self.store.set_if_unchanged(credential.clone(), started_at) {
                    Ok(credential)
                } else {
                    warn!("Credential changed during refresh, discarding refreshed token");
                    self.store.get().ok_or(ApiError::SessionExpired)
                }
            }
            Err(e) => {
                warn!(error = %e, kind = %e.kind(), "Token refresh failed, clearing credential");
                if !self.store.clear_if_unchanged(started_at) {
                    debug!("Credential changed during refresh, leaving it in place");
                }
                Err(ApiError::SessionExpired)
            }
        };

        let waiters = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, RefreshState::Idle) {
                RefreshState::Refreshing { waiters } => waiters,
                RefreshState::Idle => VecDeque::new(),
            }
        };

        debug!(
            waiters = waiters.len(),
            success = outcome.is_ok(),
            "Token refresh settled"
        );
        for waiter in waiters {
            // A waiter whose caller went away simply misses the result.
            let _ = waiter.send(outcome.clone());
        }
    }

    async fn request_refresh(&self) -> Result<Credential, ApiError> {
        let request = HttpRequest::post(REFRESH_PATH).without_refresh();

        let response = tokio::time::timeout(self.timeout, self.transport.send(&request, None))
            .await
            .map_err(|_| ApiError::Timeout)??;

        if !response.is_success() {
            return Err(ApiError::from_status(response.status, &response.body));
        }

        let envelope: ApiEnvelope<RefreshData> = serde_json::from_str(&response.body)?;
        let data = envelope.into_result()?;
        if data.access_token.is_empty() {
            return Err(ApiError::InvalidResponse(
                "Refresh returned an empty access token".to_string(),
            ));
        }
        Ok(Credential::new(data.access_token))
    }
}
