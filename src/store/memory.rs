//! In-process ledger store.
//!
//! Each registered device owns a mutex-guarded ledger (placements + measurements) inside a
//! concurrent map. A write holds its device's mutex for the whole check-then-write, which
//! serializes writers per device while different devices proceed in parallel. Topology sits
//! behind a single read/write lock; it changes rarely.

use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::error::{LedgerError, Result};
use crate::ledger::{
    check_close, check_place, note_unexpected_fields, stored_instant, stored_measurement, validate_measurement,
};
use crate::models::device::{Device, DeviceId};
use crate::models::measurement::{BatchOutcome, Measurement};
use crate::models::placement::Placement;
use crate::models::topology::{Home, HomeId, Room, RoomId};
use crate::store::{DEFAULT_PAGE_SIZE, LedgerStore};

#[derive(Default)]
struct Topology {
    homes: BTreeMap<HomeId, Home>,
    rooms: BTreeMap<RoomId, Room>,
    home_sort_orders: HashSet<i32>,
    room_sort_orders: HashSet<(HomeId, i32)>,
}

struct DeviceLedger {
    device: Device,
    /// Ordered by `placed_at`; only the last entry may be open.
    placements: Vec<Placement>,
    measurements: BTreeMap<DateTime<Utc>, Measurement>,
}

pub struct MemoryStore {
    topology: RwLock<Topology>,
    devices: DashMap<DeviceId, Arc<Mutex<DeviceLedger>>>,
    /// Held while registering so id and sort-order checks see a stable registry.
    device_sort_orders: Mutex<HashSet<i32>>,
    page_size: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::with_page_size(DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        MemoryStore {
            topology: RwLock::new(Topology::default()),
            devices: DashMap::new(),
            device_sort_orders: Mutex::new(HashSet::new()),
            page_size: page_size.max(1),
        }
    }

    fn ledger(&self, device_id: DeviceId) -> Result<Arc<Mutex<DeviceLedger>>> {
        self.devices
            .get(&device_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LedgerError::UnknownDevice(device_id))
    }

    fn ensure_room(&self, room_id: RoomId) -> Result<()> {
        if self.topology.read().rooms.contains_key(&room_id) {
            Ok(())
        } else {
            Err(LedgerError::UnknownRoom(room_id))
        }
    }
}

impl LedgerStore for MemoryStore {
    fn create_home(&self, home: Home) -> Result<Home> {
        let mut topo = self.topology.write();
        if topo.homes.contains_key(&home.id) {
            return Err(LedgerError::DuplicateId {
                entity: "home",
                id: home.id.to_string(),
            });
        }
        if !topo.home_sort_orders.insert(home.sort_order) {
            return Err(LedgerError::DuplicateSortOrder {
                entity: "home",
                sort_order: home.sort_order,
            });
        }
        topo.homes.insert(home.id, home.clone());
        debug!("Created home {} ({})", home.id, home.name);
        Ok(home)
    }

    fn create_room(&self, room: Room) -> Result<Room> {
        let mut topo = self.topology.write();
        if !topo.homes.contains_key(&room.home_id) {
            return Err(LedgerError::UnknownHome(room.home_id));
        }
        if topo.rooms.contains_key(&room.id) {
            return Err(LedgerError::DuplicateId {
                entity: "room",
                id: room.id.to_string(),
            });
        }
        if !topo.room_sort_orders.insert((room.home_id, room.sort_order)) {
            return Err(LedgerError::DuplicateSortOrder {
                entity: "room",
                sort_order: room.sort_order,
            });
        }
        topo.rooms.insert(room.id, room.clone());
        debug!("Created room {} ({}) in home {}", room.id, room.name, room.home_id);
        Ok(room)
    }

    fn home(&self, id: HomeId) -> Result<Option<Home>> {
        Ok(self.topology.read().homes.get(&id).cloned())
    }

    fn rooms(&self, home_id: HomeId) -> Result<Vec<Room>> {
        let topo = self.topology.read();
        if !topo.homes.contains_key(&home_id) {
            return Err(LedgerError::UnknownHome(home_id));
        }
        let mut rooms: Vec<Room> = topo.rooms.values().filter(|r| r.home_id == home_id).cloned().collect();
        rooms.sort_by_key(|r| r.sort_order);
        Ok(rooms)
    }

    fn register_device(&self, device: Device) -> Result<Device> {
        let mut sort_orders = self.device_sort_orders.lock();
        if self.devices.contains_key(&device.id) {
            return Err(LedgerError::DuplicateId {
                entity: "device",
                id: device.id.to_string(),
            });
        }
        if !sort_orders.insert(device.sort_order) {
            return Err(LedgerError::DuplicateSortOrder {
                entity: "device",
                sort_order: device.sort_order,
            });
        }
        let ledger = DeviceLedger {
            device: device.clone(),
            placements: Vec::new(),
            measurements: BTreeMap::new(),
        };
        self.devices.insert(device.id, Arc::new(Mutex::new(ledger)));
        debug!("Registered device {} ({}, {})", device.id, device.device_type, device.name);
        Ok(device)
    }

    fn device(&self, id: DeviceId) -> Result<Option<Device>> {
        Ok(self.devices.get(&id).map(|entry| entry.value().lock().device.clone()))
    }

    fn devices(&self) -> Result<Vec<Device>> {
        let handles: Vec<_> = self.devices.iter().map(|entry| Arc::clone(entry.value())).collect();
        let mut devices: Vec<Device> = handles.iter().map(|h| h.lock().device.clone()).collect();
        devices.sort_by_key(|d| d.sort_order);
        Ok(devices)
    }

    fn place(&self, device_id: DeviceId, room_id: RoomId, at: DateTime<Utc>) -> Result<Placement> {
        let at = stored_instant(at);
        let handle = self.ledger(device_id)?;
        let mut ledger = handle.lock();
        self.ensure_room(room_id)?;
        check_place(device_id, ledger.placements.last(), at)?;

        let placement = Placement::open(device_id, room_id, at);
        ledger.placements.push(placement.clone());
        debug!("Placed device {} in room {} at {}", device_id, room_id, at);
        Ok(placement)
    }

    fn move_to(&self, device_id: DeviceId, room_id: RoomId, at: DateTime<Utc>) -> Result<Placement> {
        let at = stored_instant(at);
        let handle = self.ledger(device_id)?;
        let mut ledger = handle.lock();
        self.ensure_room(room_id)?;
        check_close(device_id, ledger.placements.last(), at)?;

        if let Some(open) = ledger.placements.last_mut() {
            open.removed_at = Some(at);
        }
        let placement = Placement::open(device_id, room_id, at);
        ledger.placements.push(placement.clone());
        debug!("Moved device {} to room {} at {}", device_id, room_id, at);
        Ok(placement)
    }

    fn remove(&self, device_id: DeviceId, at: DateTime<Utc>) -> Result<Placement> {
        let at = stored_instant(at);
        let handle = self.ledger(device_id)?;
        let mut ledger = handle.lock();
        check_close(device_id, ledger.placements.last(), at)?;

        let open = ledger
            .placements
            .last_mut()
            .ok_or(LedgerError::NotPlaced(device_id))?;
        open.removed_at = Some(at);
        debug!("Removed device {} from room {} at {}", device_id, open.room_id, at);
        Ok(open.clone())
    }

    fn current_placement(&self, device_id: DeviceId) -> Result<Option<Placement>> {
        let handle = self.ledger(device_id)?;
        let ledger = handle.lock();
        Ok(ledger.placements.last().filter(|p| p.is_open()).cloned())
    }

    fn history(&self, device_id: DeviceId) -> Result<Vec<Placement>> {
        let handle = self.ledger(device_id)?;
        let ledger = handle.lock();
        Ok(ledger.placements.clone())
    }

    fn record(&self, measurement: &Measurement) -> Result<()> {
        validate_measurement(measurement)?;
        let measurement = &stored_measurement(measurement);
        let handle = self.ledger(measurement.device_id)?;
        let mut ledger = handle.lock();
        note_unexpected_fields(ledger.device.device_type, measurement);

        if ledger.measurements.contains_key(&measurement.measured_at) {
            return Err(LedgerError::DuplicateMeasurement {
                device: measurement.device_id,
                measured_at: measurement.measured_at,
            });
        }
        ledger
            .measurements
            .insert(measurement.measured_at, measurement.clone());
        debug!("Recorded measurement for {} at {}", measurement.device_id, measurement.measured_at);
        Ok(())
    }

    fn record_batch(&self, measurements: &[Measurement]) -> Result<BatchOutcome> {
        let mut handles = BTreeMap::new();
        for m in measurements {
            validate_measurement(m)?;
            if !handles.contains_key(&m.device_id) {
                handles.insert(m.device_id, self.ledger(m.device_id)?);
            }
        }
        let measurements: Vec<Measurement> = measurements.iter().map(stored_measurement).collect();

        // Lock every involved device in id order so concurrent batches cannot deadlock.
        let mut guards: BTreeMap<DeviceId, _> = handles.iter().map(|(id, h)| (*id, h.lock())).collect();

        let mut outcome = BatchOutcome::default();
        for m in &measurements {
            let Some(ledger) = guards.get_mut(&m.device_id) else {
                continue;
            };
            if ledger.measurements.contains_key(&m.measured_at) {
                outcome.duplicates += 1;
                continue;
            }
            note_unexpected_fields(ledger.device.device_type, m);
            ledger.measurements.insert(m.measured_at, m.clone());
            outcome.inserted += 1;
        }
        debug!(
            "Recorded batch of {} measurement(s): inserted={}, duplicates={}",
            measurements.len(),
            outcome.inserted,
            outcome.duplicates
        );
        Ok(outcome)
    }

    fn latest(&self, device_id: DeviceId) -> Result<Option<Measurement>> {
        let handle = self.ledger(device_id)?;
        let ledger = handle.lock();
        Ok(ledger.measurements.values().next_back().cloned())
    }

    fn measurements_page(
        &self,
        device_id: DeviceId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        after: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Measurement>> {
        let (from, to, after) = (stored_instant(from), stored_instant(to), after.map(stored_instant));
        let handle = self.ledger(device_id)?;
        let ledger = handle.lock();

        let lower = match after {
            Some(cursor) if cursor >= to => return Ok(Vec::new()),
            Some(cursor) if cursor >= from => Bound::Excluded(cursor),
            _ => Bound::Included(from),
        };
        if from > to {
            return Ok(Vec::new());
        }
        Ok(ledger
            .measurements
            .range((lower, Bound::Included(to)))
            .take(limit)
            .map(|(_, m)| m.clone())
            .collect())
    }

    fn page_size(&self) -> usize {
        self.page_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::ledger::audit_history;
    use crate::models::device::DeviceType;
    use chrono::{Duration, TimeZone};
    use std::sync::Barrier;

    const D: [u8; 6] = [0xC4, 0x7C, 0x8D, 0x00, 0x00, 0x01];

    fn ts(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, day, hour, 0, 0).unwrap()
    }

    fn device_id() -> DeviceId {
        DeviceId::from(D)
    }

    fn fixture() -> MemoryStore {
        let store = MemoryStore::with_page_size(3);
        store
            .create_home(Home {
                id: HomeId(1),
                name: "Flat".into(),
                sort_order: 0,
            })
            .unwrap();
        for (id, name) in [(1, "Living"), (2, "Bedroom"), (3, "Kitchen")] {
            store
                .create_room(Room {
                    id: RoomId(id),
                    home_id: HomeId(1),
                    name: name.into(),
                    sort_order: id as i32,
                })
                .unwrap();
        }
        store
            .register_device(Device {
                id: device_id(),
                device_type: DeviceType::Hub2,
                name: "Hub".into(),
                sort_order: 0,
            })
            .unwrap();
        store
    }

    fn reading(at: DateTime<Utc>, light_level: Option<u8>) -> Measurement {
        Measurement {
            device_id: device_id(),
            measured_at: at,
            temperature_celsius: 22.5,
            humidity_percent: 41,
            co2_ppm: None,
            light_level,
        }
    }

    #[test]
    fn topology_uniqueness() {
        let store = fixture();
        let dup_home = store.create_home(Home {
            id: HomeId(2),
            name: "Cabin".into(),
            sort_order: 0,
        });
        assert!(matches!(dup_home, Err(LedgerError::DuplicateSortOrder { entity: "home", .. })));

        let orphan = store.create_room(Room {
            id: RoomId(9),
            home_id: HomeId(42),
            name: "Attic".into(),
            sort_order: 0,
        });
        assert!(matches!(orphan, Err(LedgerError::UnknownHome(HomeId(42)))));

        let clash = store.create_room(Room {
            id: RoomId(9),
            home_id: HomeId(1),
            name: "Attic".into(),
            sort_order: 2,
        });
        assert!(matches!(clash, Err(LedgerError::DuplicateSortOrder { entity: "room", .. })));

        // Sort order is scoped per home.
        store
            .create_home(Home {
                id: HomeId(2),
                name: "Cabin".into(),
                sort_order: 1,
            })
            .unwrap();
        store
            .create_room(Room {
                id: RoomId(9),
                home_id: HomeId(2),
                name: "Attic".into(),
                sort_order: 2,
            })
            .unwrap();
        assert_eq!(store.rooms(HomeId(1)).unwrap().len(), 3);
        assert_eq!(store.rooms(HomeId(2)).unwrap()[0].name, "Attic");
    }

    #[test]
    fn device_registration_conflicts() {
        let store = fixture();
        let same_id = store.register_device(Device {
            id: device_id(),
            device_type: DeviceType::Meter,
            name: "Other".into(),
            sort_order: 7,
        });
        assert!(matches!(same_id, Err(LedgerError::DuplicateId { entity: "device", .. })));

        let same_order = store.register_device(Device {
            id: DeviceId::from([1, 2, 3, 4, 5, 6]),
            device_type: DeviceType::Meter,
            name: "Other".into(),
            sort_order: 0,
        });
        assert!(matches!(same_order, Err(LedgerError::DuplicateSortOrder { .. })));

        store
            .register_device(Device {
                id: DeviceId::from([1, 2, 3, 4, 5, 6]),
                device_type: DeviceType::Meter,
                name: "Other".into(),
                sort_order: -1,
            })
            .unwrap();
        let names: Vec<_> = store.devices().unwrap().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["Other", "Hub"]);
    }

    #[test]
    fn place_then_move_builds_history() {
        let store = fixture();
        let d = device_id();
        assert_eq!(store.current_location(d).unwrap(), None);

        store.place(d, RoomId(1), ts(1, 8)).unwrap();
        store.move_to(d, RoomId(2), ts(3, 8)).unwrap();

        assert_eq!(store.current_location(d).unwrap(), Some(RoomId(2)));
        let history = store.history(d).unwrap();
        assert_eq!(
            history,
            vec![
                Placement {
                    device_id: d,
                    placed_at: ts(1, 8),
                    removed_at: Some(ts(3, 8)),
                    room_id: RoomId(1),
                },
                Placement::open(d, RoomId(2), ts(3, 8)),
            ]
        );
        assert!(audit_history(&history).is_ok());
    }

    #[test]
    fn backdated_move_is_rejected_without_side_effects() {
        let store = fixture();
        let d = device_id();
        store.place(d, RoomId(1), ts(5, 8)).unwrap();
        let before = store.history(d).unwrap();

        let err = store.move_to(d, RoomId(3), ts(4, 8)).unwrap_err();
        assert!(matches!(err, LedgerError::NonMonotonicTime { .. }));
        let err = store.move_to(d, RoomId(3), ts(5, 8)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        assert_eq!(store.history(d).unwrap(), before);
        assert_eq!(store.current_location(d).unwrap(), Some(RoomId(1)));
    }

    #[test]
    fn placement_errors() {
        let store = fixture();
        let d = device_id();
        let stranger = DeviceId::from([9, 9, 9, 9, 9, 9]);

        assert!(matches!(store.place(stranger, RoomId(1), ts(1, 0)), Err(LedgerError::UnknownDevice(_))));
        assert!(matches!(store.place(d, RoomId(77), ts(1, 0)), Err(LedgerError::UnknownRoom(RoomId(77)))));
        assert!(matches!(store.move_to(d, RoomId(1), ts(1, 0)), Err(LedgerError::NotPlaced(_))));
        assert!(matches!(store.remove(d, ts(1, 0)), Err(LedgerError::NotPlaced(_))));
        assert!(matches!(store.history(stranger), Err(LedgerError::UnknownDevice(_))));

        store.place(d, RoomId(1), ts(1, 0)).unwrap();
        assert!(matches!(
            store.place(d, RoomId(2), ts(2, 0)),
            Err(LedgerError::AlreadyPlaced { room: RoomId(1), .. })
        ));
        assert!(matches!(store.move_to(d, RoomId(77), ts(2, 0)), Err(LedgerError::UnknownRoom(_))));
    }

    #[test]
    fn remove_then_replace_cannot_overlap() {
        let store = fixture();
        let d = device_id();
        store.place(d, RoomId(1), ts(1, 0)).unwrap();
        let closed = store.remove(d, ts(2, 0)).unwrap();
        assert_eq!(closed.removed_at, Some(ts(2, 0)));
        assert_eq!(store.current_location(d).unwrap(), None);

        assert!(matches!(
            store.place(d, RoomId(2), ts(1, 12)),
            Err(LedgerError::NonMonotonicTime { .. })
        ));
        store.place(d, RoomId(2), ts(2, 0)).unwrap();
        assert_eq!(store.current_location(d).unwrap(), Some(RoomId(2)));
        assert!(audit_history(&store.history(d).unwrap()).is_ok());
    }

    #[test]
    fn duplicate_measurement_is_a_conflict_regardless_of_payload() {
        let store = fixture();
        let first = reading(ts(1, 9), Some(4));
        store.record(&first).unwrap();

        let err = store.record(&first).unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateMeasurement { .. }));

        let mut different = first.clone();
        different.temperature_celsius = 30.0;
        let err = store.record(&different).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(store.latest(device_id()).unwrap(), Some(first));
    }

    #[test]
    fn light_level_validation_runs_before_device_lookup() {
        let store = fixture();
        store.record(&reading(ts(1, 9), Some(20))).unwrap();
        let err = store.record(&reading(ts(1, 10), Some(21))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let mut stranger = reading(ts(1, 11), Some(21));
        stranger.device_id = DeviceId::from([7, 7, 7, 7, 7, 7]);
        assert!(matches!(store.record(&stranger), Err(LedgerError::OutOfRange { .. })));
        stranger.light_level = Some(1);
        assert!(matches!(store.record(&stranger), Err(LedgerError::UnknownDevice(_))));
    }

    #[test]
    fn range_is_ordered_inclusive_and_restartable() {
        let store = fixture();
        let d = device_id();
        for hour in [5, 1, 3, 2, 4, 7, 6] {
            store.record(&reading(ts(1, hour), None)).unwrap();
        }
        assert_eq!(store.latest(d).unwrap().map(|m| m.measured_at), Some(ts(1, 7)));

        let mut range = store.range(d, ts(1, 2), ts(1, 6)).unwrap();
        let first: Vec<_> = range.by_ref().map(|m| m.unwrap().measured_at).collect();
        assert_eq!(first, (2..=6).map(|h| ts(1, h)).collect::<Vec<_>>());

        range.rewind();
        let second: Vec<_> = range.map(|m| m.unwrap().measured_at).collect();
        assert_eq!(first, second);

        assert_eq!(store.range(d, ts(2, 0), ts(3, 0)).unwrap().count(), 0);
        assert!(matches!(
            store.range(d, ts(1, 6), ts(1, 2)),
            Err(LedgerError::InvalidInterval { .. })
        ));
        assert!(matches!(
            store.range(DeviceId::from([0; 6]), ts(1, 0), ts(1, 1)),
            Err(LedgerError::UnknownDevice(_))
        ));
    }

    #[test]
    fn batch_skips_existing_keys_and_rejects_invalid_rows_up_front() {
        let store = fixture();
        store.record(&reading(ts(1, 1), None)).unwrap();

        let batch = vec![
            reading(ts(1, 1), None),
            reading(ts(1, 2), None),
            reading(ts(1, 3), Some(10)),
            reading(ts(1, 3), Some(11)),
        ];
        let outcome = store.record_batch(&batch).unwrap();
        assert_eq!(
            outcome,
            BatchOutcome {
                inserted: 2,
                duplicates: 2
            }
        );

        let bad = vec![reading(ts(1, 4), None), reading(ts(1, 5), Some(25))];
        assert!(store.record_batch(&bad).is_err());
        assert_eq!(store.latest(device_id()).unwrap().map(|m| m.measured_at), Some(ts(1, 3)));
    }

    #[test]
    fn concurrent_moves_at_same_instant_have_one_winner() {
        let store = fixture();
        let d = device_id();
        store.place(d, RoomId(1), ts(1, 0)).unwrap();

        let barrier = Barrier::new(2);
        let results: Vec<Result<Placement>> = std::thread::scope(|s| {
            let handles: Vec<_> = [RoomId(2), RoomId(3)]
                .into_iter()
                .map(|room| {
                    let store = &store;
                    let barrier = &barrier;
                    s.spawn(move || {
                        barrier.wait();
                        store.move_to(d, room, ts(2, 0))
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let loser = results.into_iter().find_map(|r| r.err()).unwrap();
        assert_eq!(loser.kind(), ErrorKind::Conflict);

        let history = store.history(d).unwrap();
        assert_eq!(history.len(), 2);
        assert!(audit_history(&history).is_ok());
    }

    #[test]
    fn concurrent_mixed_writers_keep_one_open_placement() {
        let store = fixture();
        let d = device_id();
        store.place(d, RoomId(1), ts(1, 0)).unwrap();
        let start = ts(1, 0);

        std::thread::scope(|s| {
            for worker in 0..4i64 {
                let store = &store;
                s.spawn(move || {
                    for step in 1..=50i64 {
                        let at = start + Duration::minutes(step * 4 + worker);
                        let room = RoomId(1 + (step + worker) % 3);
                        let _ = match step % 5 {
                            0 => store.remove(d, at),
                            1 => store.place(d, room, at),
                            _ => store.move_to(d, room, at),
                        };
                    }
                });
            }
        });

        let history = store.history(d).unwrap();
        assert!(history.iter().filter(|p| p.is_open()).count() <= 1);
        assert!(audit_history(&history).is_ok());
    }

    #[test]
    fn instants_closer_than_a_microsecond_are_the_same_instant() {
        let store = fixture();
        let d = device_id();
        let t0 = ts(3, 8);

        let placed = store.place(d, RoomId(1), t0 + Duration::nanoseconds(200)).unwrap();
        assert_eq!(placed.placed_at, t0);
        assert!(matches!(
            store.move_to(d, RoomId(2), t0 + Duration::nanoseconds(900)),
            Err(LedgerError::NonMonotonicTime { .. })
        ));
        let moved = store
            .move_to(d, RoomId(2), t0 + Duration::microseconds(1) + Duration::nanoseconds(300))
            .unwrap();
        assert_eq!(moved.placed_at, t0 + Duration::microseconds(1));
        assert!(audit_history(&store.history(d).unwrap()).is_ok());

        store.record(&reading(t0, None)).unwrap();
        assert!(matches!(
            store.record(&reading(t0 + Duration::nanoseconds(500), None)),
            Err(LedgerError::DuplicateMeasurement { .. })
        ));

        let batch = [
            reading(t0 + Duration::nanoseconds(700), None),
            reading(t0 + Duration::microseconds(2) + Duration::nanoseconds(3), None),
        ];
        let outcome = store.record_batch(&batch).unwrap();
        assert_eq!(outcome, BatchOutcome { inserted: 1, duplicates: 1 });
        assert_eq!(
            store.latest(d).unwrap().unwrap().measured_at,
            t0 + Duration::microseconds(2)
        );

        let in_range: Vec<_> = store
            .range(d, t0 + Duration::nanoseconds(10), t0 + Duration::microseconds(2))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(in_range.len(), 2);
    }
}
