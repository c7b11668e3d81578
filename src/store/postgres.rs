//! PostgreSQL ledger store.
//!
//! Every placement write runs in one transaction that first takes a row lock on the device
//! (`SELECT ... FOR UPDATE`), which serializes writers per device. The primary keys, the
//! `placements_one_open_per_device` partial index and the CHECK constraints catch anything the
//! explicit checks miss and surface it as a conflict instead of corrupt history.

use std::time::Duration;

use chrono::{DateTime, Utc};
use diesel::dsl::exists;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use log::debug;

use crate::db::models::{DeviceRow, HomeRow, MeasurementRow, PlacementRow, RoomRow};
use crate::db::{DbConn, DbPool, apply_database_migrations, new_pool};
use crate::error::{LedgerError, Result};
use crate::ledger::{
    check_close, check_place, note_unexpected_fields, stored_instant, stored_measurement, validate_measurement,
};
use crate::models::device::{Device, DeviceId};
use crate::models::measurement::{BatchOutcome, Measurement};
use crate::models::placement::Placement;
use crate::models::topology::{Home, HomeId, Room, RoomId};
use crate::schema::{devices, homes, measurements, placements, rooms};
use crate::store::{DEFAULT_PAGE_SIZE, LedgerStore};

/// Rows per INSERT statement; keeps bind parameters well under PostgreSQL's limit.
const INSERT_CHUNK: usize = 1000;

pub struct PgStore {
    pool: DbPool,
    page_size: usize,
}

impl PgStore {
    pub fn connect(database_url: &str, pool_size: u32, connect_timeout: Duration) -> Result<Self> {
        let pool = new_pool(database_url, pool_size, connect_timeout)?;
        Ok(PgStore::from_pool(pool))
    }

    pub fn from_pool(pool: DbPool) -> Self {
        PgStore {
            pool,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn run_migrations(&self) -> Result<Vec<String>> {
        let mut conn = self.conn()?;
        apply_database_migrations(&mut conn)
    }

    fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }
}

/// Translate a unique violation on a known constraint into a domain error.
fn on_unique_violation(e: DieselError, map: impl FnOnce(&str) -> Option<LedgerError>) -> LedgerError {
    if let DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) = &e
        && let Some(mapped) = info.constraint_name().and_then(map)
    {
        return mapped;
    }
    e.into()
}

/// Only the primary key makes a failed insert a duplicate reading; anything else keeps its generic mapping.
fn measurement_conflict(e: DieselError, measurement: &Measurement) -> LedgerError {
    on_unique_violation(e, |constraint| {
        (constraint == "measurements_pkey").then_some(LedgerError::DuplicateMeasurement {
            device: measurement.device_id,
            measured_at: measurement.measured_at,
        })
    })
}

fn device_key(id: DeviceId) -> Vec<u8> {
    id.as_bytes().to_vec()
}

/// Lock the device row for the rest of the transaction.
fn lock_device(conn: &mut PgConnection, id: DeviceId) -> Result<DeviceRow> {
    devices::table
        .filter(devices::id.eq(device_key(id)))
        .select(DeviceRow::as_select())
        .for_update()
        .first(conn)
        .optional()?
        .ok_or(LedgerError::UnknownDevice(id))
}

fn find_device(conn: &mut PgConnection, id: DeviceId) -> Result<DeviceRow> {
    devices::table
        .filter(devices::id.eq(device_key(id)))
        .select(DeviceRow::as_select())
        .first(conn)
        .optional()?
        .ok_or(LedgerError::UnknownDevice(id))
}

fn ensure_room(conn: &mut PgConnection, room_id: RoomId) -> Result<()> {
    let found: bool = diesel::select(exists(rooms::table.filter(rooms::id.eq(room_id.0)))).get_result(conn)?;
    if found { Ok(()) } else { Err(LedgerError::UnknownRoom(room_id)) }
}

fn ensure_home(conn: &mut PgConnection, home_id: HomeId) -> Result<()> {
    let found: bool = diesel::select(exists(homes::table.filter(homes::id.eq(home_id.0)))).get_result(conn)?;
    if found { Ok(()) } else { Err(LedgerError::UnknownHome(home_id)) }
}

fn latest_placement(conn: &mut PgConnection, id: DeviceId) -> Result<Option<Placement>> {
    placements::table
        .filter(placements::device_id.eq(device_key(id)))
        .order(placements::placed_at.desc())
        .select(PlacementRow::as_select())
        .first(conn)
        .optional()?
        .map(Placement::try_from)
        .transpose()
}

fn open_placement(conn: &mut PgConnection, id: DeviceId) -> Result<Option<Placement>> {
    placements::table
        .filter(placements::device_id.eq(device_key(id)))
        .filter(placements::removed_at.is_null())
        .select(PlacementRow::as_select())
        .first(conn)
        .optional()?
        .map(Placement::try_from)
        .transpose()
}

fn close_placement(conn: &mut PgConnection, open: &Placement, at: DateTime<Utc>) -> Result<Placement> {
    diesel::update(
        placements::table
            .filter(placements::device_id.eq(device_key(open.device_id)))
            .filter(placements::placed_at.eq(open.placed_at)),
    )
    .set(placements::removed_at.eq(Some(at)))
    .execute(conn)?;
    let mut closed = open.clone();
    closed.removed_at = Some(at);
    Ok(closed)
}

fn insert_placement(conn: &mut PgConnection, placement: &Placement) -> Result<()> {
    diesel::insert_into(placements::table)
        .values(PlacementRow::from(placement))
        .execute(conn)?;
    Ok(())
}

impl LedgerStore for PgStore {
    fn create_home(&self, home: Home) -> Result<Home> {
        let mut conn = self.conn()?;
        diesel::insert_into(homes::table)
            .values(HomeRow::from(&home))
            .execute(&mut conn)
            .map_err(|e| {
                on_unique_violation(e, |constraint| match constraint {
                    "homes_pkey" => Some(LedgerError::DuplicateId {
                        entity: "home",
                        id: home.id.to_string(),
                    }),
                    "homes_sort_order_key" => Some(LedgerError::DuplicateSortOrder {
                        entity: "home",
                        sort_order: home.sort_order,
                    }),
                    _ => None,
                })
            })?;
        debug!("Created home {} ({})", home.id, home.name);
        Ok(home)
    }

    fn create_room(&self, room: Room) -> Result<Room> {
        let mut conn = self.conn()?;
        conn.transaction::<_, LedgerError, _>(|conn| {
            ensure_home(conn, room.home_id)?;
            diesel::insert_into(rooms::table)
                .values(RoomRow::from(&room))
                .execute(conn)
                .map_err(|e| {
                    on_unique_violation(e, |constraint| match constraint {
                        "rooms_pkey" => Some(LedgerError::DuplicateId {
                            entity: "room",
                            id: room.id.to_string(),
                        }),
                        "rooms_home_id_sort_order_key" => Some(LedgerError::DuplicateSortOrder {
                            entity: "room",
                            sort_order: room.sort_order,
                        }),
                        _ => None,
                    })
                })?;
            Ok(())
        })?;
        debug!("Created room {} ({}) in home {}", room.id, room.name, room.home_id);
        Ok(room)
    }

    fn home(&self, id: HomeId) -> Result<Option<Home>> {
        let mut conn = self.conn()?;
        let row = homes::table
            .filter(homes::id.eq(id.0))
            .select(HomeRow::as_select())
            .first(&mut conn)
            .optional()?;
        Ok(row.map(Home::from))
    }

    fn rooms(&self, home_id: HomeId) -> Result<Vec<Room>> {
        let mut conn = self.conn()?;
        ensure_home(&mut conn, home_id)?;
        let rows = rooms::table
            .filter(rooms::home_id.eq(home_id.0))
            .order(rooms::sort_order.asc())
            .select(RoomRow::as_select())
            .load(&mut conn)?;
        Ok(rows.into_iter().map(Room::from).collect())
    }

    fn register_device(&self, device: Device) -> Result<Device> {
        let mut conn = self.conn()?;
        diesel::insert_into(devices::table)
            .values(DeviceRow::from(&device))
            .execute(&mut conn)
            .map_err(|e| {
                on_unique_violation(e, |constraint| match constraint {
                    "devices_pkey" => Some(LedgerError::DuplicateId {
                        entity: "device",
                        id: device.id.to_string(),
                    }),
                    "devices_sort_order_key" => Some(LedgerError::DuplicateSortOrder {
                        entity: "device",
                        sort_order: device.sort_order,
                    }),
                    _ => None,
                })
            })?;
        debug!("Registered device {} ({}, {})", device.id, device.device_type, device.name);
        Ok(device)
    }

    fn device(&self, id: DeviceId) -> Result<Option<Device>> {
        let mut conn = self.conn()?;
        match find_device(&mut conn, id) {
            Ok(row) => Device::try_from(row).map(Some),
            Err(LedgerError::UnknownDevice(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn devices(&self) -> Result<Vec<Device>> {
        let mut conn = self.conn()?;
        devices::table
            .order(devices::sort_order.asc())
            .select(DeviceRow::as_select())
            .load(&mut conn)?
            .into_iter()
            .map(Device::try_from)
            .collect()
    }

    fn place(&self, device_id: DeviceId, room_id: RoomId, at: DateTime<Utc>) -> Result<Placement> {
        let at = stored_instant(at);
        let mut conn = self.conn()?;
        let placement = conn.transaction::<_, LedgerError, _>(|conn| {
            lock_device(conn, device_id)?;
            ensure_room(conn, room_id)?;
            let latest = latest_placement(conn, device_id)?;
            check_place(device_id, latest.as_ref(), at)?;

            let placement = Placement::open(device_id, room_id, at);
            insert_placement(conn, &placement)?;
            Ok(placement)
        })?;
        debug!("Placed device {} in room {} at {}", device_id, room_id, at);
        Ok(placement)
    }

    fn move_to(&self, device_id: DeviceId, room_id: RoomId, at: DateTime<Utc>) -> Result<Placement> {
        let at = stored_instant(at);
        let mut conn = self.conn()?;
        let placement = conn.transaction::<_, LedgerError, _>(|conn| {
            lock_device(conn, device_id)?;
            ensure_room(conn, room_id)?;
            let open = open_placement(conn, device_id)?;
            check_close(device_id, open.as_ref(), at)?;
            let open = open.ok_or(LedgerError::NotPlaced(device_id))?;

            close_placement(conn, &open, at)?;
            let placement = Placement::open(device_id, room_id, at);
            insert_placement(conn, &placement)?;
            Ok(placement)
        })?;
        debug!("Moved device {} to room {} at {}", device_id, room_id, at);
        Ok(placement)
    }

    fn remove(&self, device_id: DeviceId, at: DateTime<Utc>) -> Result<Placement> {
        let at = stored_instant(at);
        let mut conn = self.conn()?;
        let closed = conn.transaction::<_, LedgerError, _>(|conn| {
            lock_device(conn, device_id)?;
            let open = open_placement(conn, device_id)?;
            check_close(device_id, open.as_ref(), at)?;
            let open = open.ok_or(LedgerError::NotPlaced(device_id))?;
            close_placement(conn, &open, at)
        })?;
        debug!("Removed device {} from room {} at {}", device_id, closed.room_id, at);
        Ok(closed)
    }

    fn current_placement(&self, device_id: DeviceId) -> Result<Option<Placement>> {
        let mut conn = self.conn()?;
        find_device(&mut conn, device_id)?;
        open_placement(&mut conn, device_id)
    }

    fn history(&self, device_id: DeviceId) -> Result<Vec<Placement>> {
        let mut conn = self.conn()?;
        find_device(&mut conn, device_id)?;
        placements::table
            .filter(placements::device_id.eq(device_key(device_id)))
            .order(placements::placed_at.asc())
            .select(PlacementRow::as_select())
            .load(&mut conn)?
            .into_iter()
            .map(Placement::try_from)
            .collect()
    }

    fn record(&self, measurement: &Measurement) -> Result<()> {
        validate_measurement(measurement)?;
        let measurement = &stored_measurement(measurement);
        let mut conn = self.conn()?;
        let device = Device::try_from(find_device(&mut conn, measurement.device_id)?)?;
        note_unexpected_fields(device.device_type, measurement);

        diesel::insert_into(measurements::table)
            .values(MeasurementRow::from(measurement))
            .execute(&mut conn)
            .map_err(|e| measurement_conflict(e, measurement))?;
        debug!("Recorded measurement for {} at {}", measurement.device_id, measurement.measured_at);
        Ok(())
    }

    fn record_batch(&self, batch: &[Measurement]) -> Result<BatchOutcome> {
        if batch.is_empty() {
            return Ok(BatchOutcome::default());
        }
        for m in batch {
            validate_measurement(m)?;
        }
        let batch: Vec<Measurement> = batch.iter().map(stored_measurement).collect();

        let mut ids: Vec<DeviceId> = batch.iter().map(|m| m.device_id).collect();
        ids.sort_unstable();
        ids.dedup();

        let mut conn = self.conn()?;
        let outcome = conn.transaction::<_, LedgerError, _>(|conn| {
            let known: Vec<Device> = devices::table
                .filter(devices::id.eq_any(ids.iter().map(|id| device_key(*id)).collect::<Vec<_>>()))
                .select(DeviceRow::as_select())
                .load(conn)?
                .into_iter()
                .map(Device::try_from)
                .collect::<Result<_>>()?;
            if let Some(missing) = ids.iter().find(|id| !known.iter().any(|d| d.id == **id)) {
                return Err(LedgerError::UnknownDevice(*missing));
            }
            for m in &batch {
                if let Some(device) = known.iter().find(|d| d.id == m.device_id) {
                    note_unexpected_fields(device.device_type, m);
                }
            }

            let mut inserted = 0;
            for chunk in batch.chunks(INSERT_CHUNK) {
                let rows: Vec<MeasurementRow> = chunk.iter().map(MeasurementRow::from).collect();
                inserted += diesel::insert_into(measurements::table)
                    .values(&rows)
                    .on_conflict_do_nothing()
                    .execute(conn)?;
            }
            Ok(BatchOutcome {
                inserted,
                duplicates: batch.len() - inserted,
            })
        })?;
        debug!(
            "Recorded batch of {} measurement(s): inserted={}, duplicates={}",
            batch.len(),
            outcome.inserted,
            outcome.duplicates
        );
        Ok(outcome)
    }

    fn latest(&self, device_id: DeviceId) -> Result<Option<Measurement>> {
        let mut conn = self.conn()?;
        find_device(&mut conn, device_id)?;
        measurements::table
            .filter(measurements::device_id.eq(device_key(device_id)))
            .order(measurements::measured_at.desc())
            .select(MeasurementRow::as_select())
            .first(&mut conn)
            .optional()?
            .map(Measurement::try_from)
            .transpose()
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
        let mut conn = self.conn()?;
        let mut query = measurements::table
            .select(MeasurementRow::as_select())
            .filter(measurements::device_id.eq(device_key(device_id)))
            .filter(measurements::measured_at.between(from, to))
            .into_boxed::<Pg>();
        if let Some(cursor) = after {
            query = query.filter(measurements::measured_at.gt(cursor));
        }
        query
            .order(measurements::measured_at.asc())
            .limit(i64::try_from(limit).unwrap_or(i64::MAX))
            .load(&mut conn)?
            .into_iter()
            .map(Measurement::try_from)
            .collect()
    }

    fn page_size(&self) -> usize {
        self.page_size
    }
}
