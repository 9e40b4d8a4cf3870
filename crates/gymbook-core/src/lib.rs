//! gymbook-core: the authenticated request pipeline behind the gymbook client.
//!
//! Every backend call carries the current bearer credential. When credentials
//! expire, concurrent failures are coalesced into a single refresh and the
//! affected calls are replayed; when the refresh fails, every caller sees the
//! same `auth` error and the session ends.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiError, ErrorKind, GymClient, RequestPipeline};
pub use auth::{Credential, CredentialStore, RefreshCoordinator, Session, SessionFacade};
pub use config::{Config, PipelineConfig, StorageBackend};
