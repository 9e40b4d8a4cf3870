//! Data models for gymbook entities.
//!
//! - `UserProfile`: the signed-in member
//! - `GymClass`, `Booking`: schedule and reservation data
//! - `ApiEnvelope`: the `{success, error, data}` wrapper every endpoint returns

pub mod booking;
pub mod envelope;
pub mod user;

pub use booking::{Booking, BookingStatus, GymClass};
pub use envelope::ApiEnvelope;
pub use user::UserProfile;
