use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::device::DeviceId;
use crate::models::topology::RoomId;

/// One interval of a device's location history, `[placed_at, removed_at)`.
///
/// A placement without `removed_at` is open: it is where the device is right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Placement {
    pub device_id: DeviceId,
    pub placed_at: DateTime<Utc>,
    pub removed_at: Option<DateTime<Utc>>,
    pub room_id: RoomId,
}

impl Placement {
    pub fn open(device_id: DeviceId, room_id: RoomId, placed_at: DateTime<Utc>) -> Self {
        Placement {
            device_id,
            placed_at,
            removed_at: None,
            room_id,
        }
    }

    pub fn is_open(&self) -> bool {
        self.removed_at.is_none()
    }

    /// Whether the device was in this placement's room at `ts`.
    #[cfg(test)]
    pub(crate) fn covers(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.placed_at && self.removed_at.is_none_or(|end| ts < end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn covers_is_half_open() {
        let device = DeviceId::from([0, 1, 2, 3, 4, 5]);
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 5, 2, 9, 0, 0).unwrap();

        let mut p = Placement::open(device, RoomId(1), start);
        assert!(p.covers(start));
        assert!(p.covers(end));

        p.removed_at = Some(end);
        assert!(p.covers(start));
        assert!(!p.covers(end));
        assert!(!p.covers(start - chrono::Duration::seconds(1)));
    }
}
