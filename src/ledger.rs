//! Invariant rules for the placement history and the measurement stream.
//!
//! Every store runs these checks inside its per-device unit of work, before writing. They are
//! pure functions over the rows the store has already loaded, so the in-memory and PostgreSQL
//! stores apply exactly the same rules.

use chrono::{DateTime, Duration, DurationRound, Utc};
use log::warn;

use crate::error::{LedgerError, Result};
use crate::models::device::{DeviceId, DeviceType};
use crate::models::measurement::Measurement;
use crate::models::placement::Placement;

pub const LIGHT_LEVEL_MIN: u8 = 0;
pub const LIGHT_LEVEL_MAX: u8 = 20;

/// Round `ts` down to the microsecond, the finest instant `TIMESTAMPTZ` keeps.
///
/// Both stores apply this before any check so that two instants PostgreSQL cannot tell apart
/// are the same instant everywhere.
pub fn stored_instant(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(Duration::microseconds(1)).unwrap_or(ts)
}

/// `m` with its timestamp at storage precision.
pub fn stored_measurement(m: &Measurement) -> Measurement {
    Measurement {
        measured_at: stored_instant(m.measured_at),
        ..m.clone()
    }
}

/// Check that `device` may start a new placement at `at`, given its latest placement.
///
/// An open placement means the caller wanted `move_to`. A closed one must end no later than
/// `at`, otherwise the new interval would overlap it.
pub fn check_place(device: DeviceId, latest: Option<&Placement>, at: DateTime<Utc>) -> Result<()> {
    let Some(latest) = latest else {
        return Ok(());
    };
    match latest.removed_at {
        None => Err(LedgerError::AlreadyPlaced {
            device,
            room: latest.room_id,
        }),
        Some(end) if at < end => Err(LedgerError::NonMonotonicTime {
            device,
            at,
            boundary: end,
        }),
        Some(_) => Ok(()),
    }
}

/// Check that the open placement may be closed at `at`.
pub fn check_close(device: DeviceId, open: Option<&Placement>, at: DateTime<Utc>) -> Result<()> {
    let open = open.filter(|p| p.is_open()).ok_or(LedgerError::NotPlaced(device))?;
    if at <= open.placed_at {
        return Err(LedgerError::NonMonotonicTime {
            device,
            at,
            boundary: open.placed_at,
        });
    }
    Ok(())
}

/// Field-level validation of a reading, independent of any stored state.
pub fn validate_measurement(m: &Measurement) -> Result<()> {
    if let Some(level) = m.light_level
        && !(LIGHT_LEVEL_MIN..=LIGHT_LEVEL_MAX).contains(&level)
    {
        return Err(LedgerError::OutOfRange {
            field: "light_level",
            value: i64::from(level),
            min: i64::from(LIGHT_LEVEL_MIN),
            max: i64::from(LIGHT_LEVEL_MAX),
        });
    }
    Ok(())
}

pub fn check_interval(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<()> {
    if from > to {
        return Err(LedgerError::InvalidInterval { from, to });
    }
    Ok(())
}

/// Log fields a model is not known to report. Ingestion stays lenient: the row is still written.
///
/// Returns the names of the unexpected fields.
pub fn note_unexpected_fields(device_type: DeviceType, m: &Measurement) -> Vec<&'static str> {
    let caps = device_type.capabilities();
    let mut unexpected = Vec::new();
    if !caps.climate {
        unexpected.push("temperature_celsius");
        unexpected.push("humidity_percent");
    }
    if m.co2_ppm.is_some() && !caps.co2 {
        unexpected.push("co2_ppm");
    }
    if m.light_level.is_some() && !caps.light_level {
        unexpected.push("light_level");
    }
    if !unexpected.is_empty() {
        warn!(
            "Device {} ({}) reported fields its model does not provide: {}",
            m.device_id,
            device_type,
            unexpected.join(", ")
        );
    }
    unexpected
}

/// Verify a device's full history (ordered by `placed_at`): valid intervals, no overlaps, and
/// at most one open placement, which must be the last one.
#[cfg(test)]
pub(crate) fn audit_history(history: &[Placement]) -> std::result::Result<(), String> {
    for (index, p) in history.iter().enumerate() {
        if let Some(end) = p.removed_at
            && p.placed_at >= end
        {
            return Err(format!("placement {} ends before it starts", p.placed_at));
        }
        if p.is_open() && index + 1 != history.len() {
            return Err(format!("placement {} is open but not the latest", p.placed_at));
        }
        if let Some(next) = history.get(index + 1)
            && (next.placed_at <= p.placed_at || p.covers(next.placed_at))
        {
            return Err(format!("placement {} overlaps {}", p.placed_at, next.placed_at));
        }
    }
    Ok(())
}
