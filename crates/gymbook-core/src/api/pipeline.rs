//! The authenticated request pipeline.
//!
//! Every call goes through [`RequestPipeline::execute`], which attaches the
//! current bearer credential, applies the per-call timeout and then decides
//! what a failure means:
//!
//! - 401 on an eligible call: wait for the single-flight refresh, replay once
//! - 403: clear the credential and surface immediately
//! - network / server failures on idempotent reads: bounded retries with backoff
//! - everything else: surfaced untouched

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::transport::{HttpRequest, HttpResponse, Transport};
use super::ApiError;
use crate::auth::{CredentialStore, RefreshCoordinator};
use crate::config::PipelineConfig;
use crate::models::ApiEnvelope;

/// Clone is cheap - all clones share the transport, store and coordinator.
#[derive(Clone)]
pub struct RequestPipeline {
    transport: Arc<dyn Transport>,
    store: CredentialStore,
    coordinator: RefreshCoordinator,
    config: PipelineConfig,
}

impl RequestPipeline {
    pub fn new(transport: Arc<dyn Transport>, store: CredentialStore, config: PipelineConfig) -> Self {
        let coordinator =
            RefreshCoordinator::new(transport.clone(), store.clone(), config.request_timeout);
        Self {
            transport,
            store,
            coordinator,
            config,
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Send `request`, recovering from an expired credential at most once.
    pub async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        let mut refreshed = false;
        let mut retries = 0;
        let mut backoff = self.config.initial_backoff;

        loop {
            let (credential, generation) = self.store.snapshot();
            let bearer = credential.as_ref().map(|c| c.token());

            let error = match self.send_once(&request, bearer).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            match error {
                ApiError::Unauthorized if request.refresh_eligible() => {
                    if refreshed {
                        // The replacement credential was rejected too; do not loop.
                        warn!(method = %request.method, path = %request.path, "Request rejected again after refresh");
                        return Err(ApiError::Unauthorized);
                    }
                    refreshed = true;
                    debug!(method = %request.method, path = %request.path, "Credential rejected, awaiting refresh");
                    self.coordinator
                        .ensure_valid_credential_since(generation)
                        .await?;
                }
                ApiError::AccessDenied(_) => {
                    if credential.is_some() {
                        warn!(method = %request.method, path = %request.path, "Access denied, clearing credential");
                        self.store.clear();
                    }
                    return Err(error);
                }
                e if e.kind().is_transient()
                    && request.is_idempotent()
                    && retries < self.config.max_read_retries =>
                {
                    retries += 1;
                    warn!(
                        method = %request.method,
                        path = %request.path,
                        retry = retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Request failed, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2); // Exponential backoff
                }
                e => return Err(e),
            }
        }
    }

    /// Execute and decode the `data` field of the response envelope.
    pub async fn execute_json<T: DeserializeOwned>(&self, request: HttpRequest) -> Result<T, ApiError> {
        let response = self.execute(request).await?;
        let envelope: ApiEnvelope<T> = serde_json::from_str(&response.body)?;
        envelope.into_result()
    }

    /// Execute and check the envelope, ignoring any payload.
    pub async fn execute_unit(&self, request: HttpRequest) -> Result<(), ApiError> {
        let response = self.execute(request).await?;
        if response.body.trim().is_empty() {
            return Ok(());
        }
        let envelope: ApiEnvelope<serde_json::Value> = serde_json::from_str(&response.body)?;
        envelope.into_data().map(|_| ())
    }

    async fn send_once(
        &self,
        request: &HttpRequest,
        bearer: Option<&str>,
    ) -> Result<HttpResponse, ApiError> {
        let response = tokio::time::timeout(
            self.config.request_timeout,
            self.transport.send(request, bearer),
        )
        .await
        .map_err(|_| ApiError::Timeout)??;

        if response.is_success() {
            Ok(response)
        } else {
            Err(ApiError::from_status(response.status, &response.body))
        }
    }
}
