//! API client for the gym backend.
//!
//! `GymClient` wires a transport, the credential store and the request
//! pipeline together and exposes the booking calls the app needs. Every call
//! goes through the pipeline, so expiry handling is shared.

use std::sync::Arc;

use tracing::debug;

use super::pipeline::RequestPipeline;
use super::transport::{HttpRequest, ReqwestTransport, Transport};
use super::ApiError;
use crate::auth::{CredentialStore, SecureStorage, SessionFacade};
use crate::config::PipelineConfig;
use crate::models::{Booking, GymClass};

/// Maximum length of a class or booking id accepted in a path segment.
const MAX_ID_LENGTH: usize = 64;

pub struct GymClient {
    pipeline: RequestPipeline,
    session: SessionFacade,
}

impl GymClient {
    /// Create a client talking HTTP to `config.base_url`.
    pub fn new(config: PipelineConfig, storage: Arc<dyn SecureStorage>) -> Result<Self, ApiError> {
        let transport = ReqwestTransport::new(&config)?;
        Ok(Self::with_transport(Arc::new(transport), storage, config))
    }

    pub fn with_transport(
        transport: Arc<dyn Transport>,
        storage: Arc<dyn SecureStorage>,
        config: PipelineConfig,
    ) -> Self {
        let store = CredentialStore::new(storage);
        let pipeline = RequestPipeline::new(transport, store, config);
        Self {
            session: SessionFacade::new(pipeline.clone()),
            pipeline,
        }
    }

    pub fn session(&self) -> &SessionFacade {
        &self.session
    }

    pub fn pipeline(&self) -> &RequestPipeline {
        &self.pipeline
    }

    /// Ids end up in URL paths, so only accept plain identifiers.
    fn validate_id<'a>(kind: &str, id: &'a str) -> Result<&'a str, ApiError> {
        let valid = !id.is_empty()
            && id.len() <= MAX_ID_LENGTH
            && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(id)
        } else {
            Err(ApiError::Validation(format!("Invalid {} id: {:?}", kind, id)))
        }
    }

    // ===== Booking calls =====

    /// Fetch the class schedule
    pub async fn list_classes(&self) -> Result<Vec<GymClass>, ApiError> {
        let classes: Vec<GymClass> = self.pipeline.execute_json(HttpRequest::get("/classes")).await?;
        debug!(count = classes.len(), "Classes fetched");
        Ok(classes)
    }

    /// Fetch the member's bookings
    pub async fn list_bookings(&self) -> Result<Vec<Booking>, ApiError> {
        let bookings: Vec<Booking> = self.pipeline.execute_json(HttpRequest::get("/bookings")).await?;
        debug!(count = bookings.len(), "Bookings fetched");
        Ok(bookings)
    }

    /// Reserve a spot in a class. Never retried automatically.
    pub async fn reserve_class(&self, class_id: &str) -> Result<Booking, ApiError> {
        let class_id = Self::validate_id("class", class_id)?;
        let request = HttpRequest::post(format!("/classes/{}/reserve", class_id));
        self.pipeline.execute_json(request).await
    }

    /// Cancel a booking. Never retried automatically.
    pub async fn cancel_booking(&self, booking_id: &str) -> Result<(), ApiError> {
        let booking_id = Self::validate_id("booking", booking_id)?;
        let request = HttpRequest::delete(format!("/bookings/{}", booking_id));
        self.pipeline.execute_unit(request).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::api::ErrorKind;
    use crate::auth::MemoryStorage;
    use crate::models::BookingStatus;
    use crate::testing::{FakeBackend, RefreshBehavior, Scripted, GOOD_PASSWORD};

    fn client(backend: &Arc<FakeBackend>) -> GymClient {
        GymClient::with_transport(
            backend.clone(),
            Arc::new(MemoryStorage::new()),
            PipelineConfig::new("http://gym.test", Duration::from_secs(5)),
        )
    }

    #[test]
    fn test_validate_id() {
        assert!(GymClient::validate_id("class", "c-1_a").is_ok());
        assert!(GymClient::validate_id("class", "").is_err());
        assert!(GymClient::validate_id("class", "../admin").is_err());
        assert!(GymClient::validate_id("class", "a/b").is_err());
        assert!(GymClient::validate_id("class", &"x".repeat(MAX_ID_LENGTH + 1)).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_classes() {
        let backend = FakeBackend::new();
        backend.script(
            "/classes",
            vec![Scripted::ok(serde_json::json!([
                {"id": "c1", "name": "Spin", "startsAt": "2026-10-20T07:00:00Z", "capacity": 12, "bookedCount": 4},
                {"id": "c2", "name": "Yoga", "startsAt": "2026-10-20T09:00:00Z"}
            ]))],
        );
        let client = client(&backend);

        let classes = client.list_classes().await.unwrap();
        assert_eq!(classes.len(), 2);
        assert_eq!(classes[0].spots_left(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserve_after_login_with_expired_token() {
        let backend = FakeBackend::new();
        backend.set_refresh(RefreshBehavior::Issue("fresh".to_string()));
        let client = client(&backend);
        client.session().login("sam@example.com", GOOD_PASSWORD).await.unwrap();
        backend.accept_token("somebody-else");

        backend.script("/classes/c1/reserve", vec![Scripted::status(401)]);
        backend.script(
            "/classes/c1/reserve",
            vec![Scripted::ok(serde_json::json!({"id": "b1", "classId": "c1", "status": "confirmed"}))],
        );

        let booking = client.reserve_class("c1").await.unwrap();
        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert_eq!(backend.refresh_calls(), 1);
        let calls = backend.calls_to("/classes/c1/reserve");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].bearer.as_deref(), Some("fresh"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserve_conflict_is_business() {
        let backend = FakeBackend::new();
        backend.script("/classes/c1/reserve", vec![Scripted::status(409)]);
        let client = client(&backend);

        let err = client.reserve_class("c1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Business);
        assert_eq!(backend.calls_to("/classes/c1/reserve").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_booking() {
        let backend = FakeBackend::new();
        backend.script(
            "/bookings/b1",
            vec![Scripted::Respond(crate::api::HttpResponse::new(204, ""))],
        );
        let client = client(&backend);

        client.cancel_booking("b1").await.unwrap();
        let calls = backend.calls_to("/bookings/b1");
        assert_eq!(calls[0].method, reqwest::Method::DELETE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_id_rejected_locally() {
        let backend = FakeBackend::new();
        let client = client(&backend);

        let err = client.cancel_booking("b1/../../admin").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(backend.calls().is_empty());
    }
}
