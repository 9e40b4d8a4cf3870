//! Class schedule and reservation models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A scheduled class that members can reserve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GymClass {
    #[serde(alias = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub instructor: Option<String>,
    pub starts_at: DateTime<Utc>,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    #[serde(default)]
    pub capacity: u32,
    #[serde(default)]
    pub booked_count: u32,
}

impl GymClass {
    pub fn spots_left(&self) -> u32 {
        self.capacity.saturating_sub(self.booked_count)
    }

    pub fn is_full(&self) -> bool {
        self.capacity > 0 && self.spots_left() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Confirmed,
    Waitlisted,
    Cancelled,
    #[serde(other)]
    Unknown,
}

/// A member's reservation for one class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    #[serde(alias = "_id")]
    pub id: String,
    pub class_id: String,
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    pub status: BookingStatus,
}

impl Booking {
    pub fn is_upcoming(&self, now: DateTime<Utc>) -> bool {
        self.status != BookingStatus::Cancelled
            && self.starts_at.map(|start| start > now).unwrap_or(false)
    }
}
