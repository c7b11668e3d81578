use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::device::DeviceId;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement {
    pub device_id: DeviceId,
    pub measured_at: DateTime<Utc>,
    pub temperature_celsius: f32,
    pub humidity_percent: u8,
    /// Only CO2-capable meters report this.
    pub co2_ppm: Option<u16>,
    /// Coarse 0-20 ambient light scale reported by hubs.
    pub light_level: Option<u8>,
}

/// Result of a bulk ingestion: rows written and rows skipped because their key already existed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub inserted: usize,
    pub duplicates: usize,
}

impl BatchOutcome {
    pub fn merge(&mut self, other: BatchOutcome) {
        self.inserted += other.inserted;
        self.duplicates += other.duplicates;
    }
}
