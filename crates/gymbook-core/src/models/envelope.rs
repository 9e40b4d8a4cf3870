use serde::Deserialize;

use crate::api::ApiError;

/// Wrapper shared by every backend response: `{success, error, data}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    /// Unwrap the payload, treating `success: false` as a business rejection.
    pub fn into_data(self) -> Result<Option<T>, ApiError> {
        if self.success {
            Ok(self.data)
        } else {
            Err(ApiError::Rejected(
                self.error
                    .unwrap_or_else(|| "Request was not successful".to_string()),
            ))
        }
    }

    /// Like [`into_data`](Self::into_data) but a missing payload is an error.
    pub fn into_result(self) -> Result<T, ApiError> {
        self.into_data()?
            .ok_or_else(|| ApiError::InvalidResponse("Response has no data".to_string()))
    }
}
