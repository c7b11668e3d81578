//! Storage seam for the ledger.
//!
//! [`LedgerStore`] is implemented by [`memory::MemoryStore`] (in-process, used by tests and
//! demos) and [`postgres::PgStore`] (diesel over PostgreSQL). Both run the rules in
//! [`crate::ledger`] inside a per-device unit of work.

pub mod memory;
pub mod postgres;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::device::{Device, DeviceId};
use crate::models::measurement::{BatchOutcome, Measurement};
use crate::models::placement::Placement;
use crate::models::topology::{Home, HomeId, Room, RoomId};

pub const DEFAULT_PAGE_SIZE: usize = 500;

pub trait LedgerStore: Send + Sync {
    fn create_home(&self, home: Home) -> Result<Home>;

    /// Fails with `UnknownHome` when the owning home does not exist.
    fn create_room(&self, room: Room) -> Result<Room>;

    fn home(&self, id: HomeId) -> Result<Option<Home>>;

    /// Rooms of one home, ordered by `sort_order`.
    fn rooms(&self, home_id: HomeId) -> Result<Vec<Room>>;

    fn register_device(&self, device: Device) -> Result<Device>;

    fn device(&self, id: DeviceId) -> Result<Option<Device>>;

    /// All devices, ordered by `sort_order`.
    fn devices(&self) -> Result<Vec<Device>>;

    /// Open the device's first placement, or its next one after a `remove`.
    fn place(&self, device_id: DeviceId, room_id: RoomId, at: DateTime<Utc>) -> Result<Placement>;

    /// Close the open placement at `at` and open a new one in `room_id`, atomically.
    fn move_to(&self, device_id: DeviceId, room_id: RoomId, at: DateTime<Utc>) -> Result<Placement>;

    /// Close the open placement without opening another. Returns the closed row.
    fn remove(&self, device_id: DeviceId, at: DateTime<Utc>) -> Result<Placement>;

    fn current_placement(&self, device_id: DeviceId) -> Result<Option<Placement>>;

    fn current_location(&self, device_id: DeviceId) -> Result<Option<RoomId>> {
        Ok(self.current_placement(device_id)?.map(|p| p.room_id))
    }

    /// Every placement of the device, ordered by `placed_at`.
    fn history(&self, device_id: DeviceId) -> Result<Vec<Placement>>;

    fn record(&self, measurement: &Measurement) -> Result<()>;

    /// Validate every row, then insert them in one unit of work, skipping existing keys.
    fn record_batch(&self, measurements: &[Measurement]) -> Result<BatchOutcome>;

    fn latest(&self, device_id: DeviceId) -> Result<Option<Measurement>>;

    /// Up to `limit` measurements in `[from, to]` strictly after `after`, ordered by time.
    fn measurements_page(
        &self,
        device_id: DeviceId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        after: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Measurement>>;

    fn page_size(&self) -> usize {
        DEFAULT_PAGE_SIZE
    }

    /// Lazily walk the measurements in `[from, to]`, one page at a time.
    fn range(&self, device_id: DeviceId, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<MeasurementRange<'_, Self>>
    where
        Self: Sized,
    {
        crate::ledger::check_interval(from, to)?;
        if self.device(device_id)?.is_none() {
            return Err(crate::error::LedgerError::UnknownDevice(device_id));
        }
        Ok(MeasurementRange::new(self, device_id, from, to, self.page_size()))
    }
}

/// Keyset-paginated iterator over a device's measurements.
///
/// Holds at most one page in memory. [`MeasurementRange::rewind`] restarts it from `from`.
pub struct MeasurementRange<'a, S: ?Sized> {
    store: &'a S,
    device_id: DeviceId,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    page_size: usize,
    buffer: std::vec::IntoIter<Measurement>,
    cursor: Option<DateTime<Utc>>,
    exhausted: bool,
}

impl<'a, S: LedgerStore + ?Sized> MeasurementRange<'a, S> {
    pub fn new(store: &'a S, device_id: DeviceId, from: DateTime<Utc>, to: DateTime<Utc>, page_size: usize) -> Self {
        MeasurementRange {
            store,
            device_id,
            from,
            to,
            page_size: page_size.max(1),
            buffer: Vec::new().into_iter(),
            cursor: None,
            exhausted: false,
        }
    }

    pub fn rewind(&mut self) {
        self.buffer = Vec::new().into_iter();
        self.cursor = None;
        self.exhausted = false;
    }

    fn fill(&mut self) -> Result<bool> {
        let page = self
            .store
            .measurements_page(self.device_id, self.from, self.to, self.cursor, self.page_size)?;
        if page.len() < self.page_size {
            self.exhausted = true;
        }
        let has_rows = !page.is_empty();
        self.buffer = page.into_iter();
        Ok(has_rows)
    }
}

impl<S: LedgerStore + ?Sized> Iterator for MeasurementRange<'_, S> {
    type Item = Result<Measurement>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(m) = self.buffer.next() {
                self.cursor = Some(m.measured_at);
                return Some(Ok(m));
            }
            if self.exhausted {
                return None;
            }
            match self.fill() {
                Ok(true) => continue,
                Ok(false) => return None,
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
