//! REST API access for the gym backend.
//!
//! All traffic flows through the `RequestPipeline`, which attaches the bearer
//! credential and recovers from expiry. `GymClient` wires the pipeline to a
//! transport and exposes the typed booking calls.

pub mod client;
pub mod error;
pub mod pipeline;
pub mod transport;

pub use client::GymClient;
pub use error::{ApiError, ErrorKind};
pub use pipeline::RequestPipeline;
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
