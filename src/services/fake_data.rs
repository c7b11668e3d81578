//! Deterministic demo data: one home, a few rooms and devices, a move, and synthetic readings.

use std::f64::consts::PI;
use std::num::NonZeroUsize;

use chrono::{DateTime, Datelike, Duration, DurationRound, Timelike, Utc, Weekday};
use log::info;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::error::{LedgerError, Result};
use crate::models::device::{Device, DeviceId, DeviceType};
use crate::models::measurement::{BatchOutcome, Measurement};
use crate::models::topology::{Home, HomeId, Room, RoomId};
use crate::services::ingest::record_in_batches;
use crate::store::LedgerStore;

pub const DEMO_HOME_ID: HomeId = HomeId(4_201_337);
const STEP_MINUTES: i64 = 15;
const ROOMS: [(i64, &str); 4] = [(1, "Living Room"), (2, "Kitchen"), (3, "Bedroom"), (4, "Home Office")];
/// (mac suffix, model, name, initial room index, room index after the mid-period move)
const DEVICES: [(u8, DeviceType, &str, usize, Option<usize>); 3] = [
    (0x01, DeviceType::Hub2, "Hub 2", 0, None),
    (0x02, DeviceType::MeterPlus, "Travel meter", 2, Some(1)),
    (0x03, DeviceType::MeterProCO2, "Office CO2 meter", 3, None),
];

#[derive(Debug, Clone, Serialize)]
pub struct DemoSummary {
    pub home: HomeId,
    pub rooms: usize,
    pub devices: usize,
    pub moves: usize,
    pub measurements: BatchOutcome,
}

pub fn demo_device_id(suffix: u8) -> DeviceId {
    DeviceId::from([0xC0, 0xFF, 0xEE, 0xDE, 0xA0, suffix])
}

fn room_id(index: usize) -> RoomId {
    RoomId(DEMO_HOME_ID.0 * 100 + ROOMS[index].0)
}

/// Populate `store` with `days` of history ending at `end`.
///
/// Returns `None` when the demo home already exists. Demo device ids are checked before anything is
/// written and device sort orders continue after the highest registered one. The room ids derived
/// from [`DEMO_HOME_ID`] are assumed free.
pub fn seed_demo<S: LedgerStore + ?Sized>(
    store: &S,
    end: DateTime<Utc>,
    days: u32,
    batch_size: NonZeroUsize,
) -> Result<Option<DemoSummary>> {
    if store.home(DEMO_HOME_ID)?.is_some() {
        info!("Demo home {} already present; nothing to seed", DEMO_HOME_ID);
        return Ok(None);
    }

    for (suffix, ..) in DEVICES {
        let id = demo_device_id(suffix);
        if store.device(id)?.is_some() {
            return Err(LedgerError::DuplicateId {
                entity: "device",
                id: id.to_string(),
            });
        }
    }
    let first_sort_order = store.devices()?.iter().map(|d| d.sort_order + 1).max().unwrap_or(0);

    let end = align_to_step(end);
    let start = end - Duration::days(i64::from(days.max(1)));
    let midpoint = start + (end - start) / 2;

    store.create_home(Home {
        id: DEMO_HOME_ID,
        name: "Chez Villa".to_string(),
        sort_order: 0,
    })?;
    for (index, (_, name)) in ROOMS.iter().enumerate() {
        store.create_room(Room {
            id: room_id(index),
            home_id: DEMO_HOME_ID,
            name: (*name).to_string(),
            sort_order: index as i32,
        })?;
    }

    let mut rng = SmallRng::seed_from_u64(0x0420_1337_DEAD_BEEFu64);
    let mut measurements = BatchOutcome::default();
    let mut moves = 0;

    info!(
        "Demo data: generating history for home {} from {} to {} (devices={})",
        DEMO_HOME_ID,
        start,
        end,
        DEVICES.len()
    );

    for (index, (suffix, device_type, name, initial_room, moved_to)) in DEVICES.into_iter().enumerate() {
        let id = demo_device_id(suffix);
        store.register_device(Device {
            id,
            device_type,
            name: name.to_string(),
            sort_order: first_sort_order + index as i32,
        })?;
        store.place(id, room_id(initial_room), start)?;
        if let Some(target) = moved_to {
            store.move_to(id, room_id(target), midpoint)?;
            moves += 1;
        }

        let series = synthetic_series(id, device_type, index as f64, start, end, &mut rng);
        measurements.merge(record_in_batches(store, series.into_iter().map(Ok::<_, LedgerError>), batch_size)?);
    }

    info!(
        "Demo data: complete (inserted={}, duplicates={})",
        measurements.inserted, measurements.duplicates
    );

    Ok(Some(DemoSummary {
        home: DEMO_HOME_ID,
        rooms: ROOMS.len(),
        devices: DEVICES.len(),
        moves,
        measurements,
    }))
}

fn align_to_step(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(Duration::minutes(STEP_MINUTES)).unwrap_or(ts)
}

fn synthetic_series(
    device_id: DeviceId,
    device_type: DeviceType,
    device_index: f64,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    rng: &mut SmallRng,
) -> Vec<Measurement> {
    let capabilities = device_type.capabilities();
    let mut rows = Vec::new();
    let mut ts = start;
    while ts < end {
        let day_fraction = f64::from(ts.num_seconds_from_midnight()) / 86_400.0;
        let annual_fraction = f64::from(ts.ordinal0()) / 365.0;
        let weekend = matches!(ts.weekday(), Weekday::Sat | Weekday::Sun);

        let outside = (annual_fraction * 2.0 * PI).sin() * 12.0 + ((day_fraction - 0.3) * 2.0 * PI).sin() * 5.0 + 8.5;
        let routine = routine_profile(day_fraction, weekend);
        let inside = (20.2 + device_index * 0.35 + routine * 0.6 - (20.0 - outside).max(0.0) * 0.12
            + rng.random_range(-0.4..=0.4))
        .clamp(15.0, 26.5);
        let humidity = (50.0 + (18.0 - outside).clamp(-12.0, 12.0) * 0.8 + rng.random_range(-6.0..=6.0)).clamp(30.0, 75.0);

        let co2_ppm = capabilities.co2.then(|| {
            let occupancy = if weekend { 1.3 } else { 1.0 };
            (450.0 + routine * 380.0 * occupancy + rng.random_range(0.0..=60.0)).round() as u16
        });
        let light_level = capabilities.light_level.then(|| {
            let daylight = ((day_fraction - 0.5) * 2.0 * PI).cos().max(0.0);
            (daylight * 18.0 + rng.random_range(0.0..=2.0)).round().clamp(0.0, 20.0) as u8
        });

        rows.push(Measurement {
            device_id,
            measured_at: ts,
            temperature_celsius: ((inside * 10.0).round() / 10.0) as f32,
            humidity_percent: humidity.round() as u8,
            co2_ppm,
            light_level,
        });
        ts += Duration::minutes(STEP_MINUTES);
    }
    rows
}

fn routine_profile(day_fraction: f64, weekend: bool) -> f64 {
    let morning_peak = gaussian(day_fraction, 0.27, 0.045) * 1.8;
    let evening_peak = gaussian(day_fraction, 0.77, 0.05) * 2.0;
    let midday = if weekend {
        0.5 * gaussian(day_fraction, 0.45, 0.09)
    } else {
        -0.4 * gaussian(day_fraction, 0.5, 0.12)
    };
    (morning_peak + evening_peak + midday).max(0.0)
}

fn gaussian(x: f64, center: f64, width: f64) -> f64 {
    (-((x - center) * (x - center)) / (2.0 * width * width)).exp()
}
