//! Plain data reports emitted for display: the startup house summary and the
//! periodic statistics.

use std::collections::BTreeSet;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::room::RoomSettings;

/// Counts of what the daemon manages, with a short fingerprint for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HouseSummary {
    pub rooms: usize,
    pub lights: usize,
    pub sensors: usize,
    /// First three upper-case hex chars of the SHA-256 of the counts.
    pub fingerprint: String,
}

impl HouseSummary {
    #[must_use]
    pub fn new(rooms: usize, lights: usize, sensors: usize) -> Self {
        let digest = Sha256::digest(format!(
            "rooms: {rooms} - lights: {lights} - sensors: {sensors}"
        ));
        let mut fingerprint = hex::encode_upper(digest);
        fingerprint.truncate(3);
        Self {
            rooms,
            lights,
            sensors,
            fingerprint,
        }
    }

    /// Summarise `rooms`, counting each light and motion sensor once.
    #[must_use]
    pub fn from_rooms<'a>(rooms: impl IntoIterator<Item = &'a RoomSettings>) -> Self {
        let mut count = 0;
        let mut lights = BTreeSet::new();
        let mut sensors = BTreeSet::new();
        for room in rooms {
            count += 1;
            lights.extend(room.lights.iter());
            sensors.extend(room.motion_sensors.iter());
        }
        Self::new(count, lights.len(), sensors.len())
    }
}

/// Event statistics of one room.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomStats {
    pub name: String,
    pub events: u64,
    pub events_per_minute: f64,
    pub lights_on: bool,
}

/// Periodic statistics over all rooms.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsReport {
    pub total_events: u64,
    pub events_per_minute: f64,
    pub rooms: Vec<RoomStats>,
}

/// Events per minute over `elapsed_secs`; zero before any time has passed.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn events_per_minute(events: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs <= 0.0 {
        return 0.0;
    }
    events as f64 / (elapsed_secs / 60.0)
}
