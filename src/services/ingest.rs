//! Write paths shared by the importers: chunked batch recording and single advertisements.

use std::collections::HashMap;
use std::num::NonZeroUsize;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use thiserror::Error;
use uuid::Uuid;

use crate::error::LedgerError;
use crate::models::device::DeviceId;
use crate::models::measurement::{BatchOutcome, Measurement};
use crate::store::LedgerStore;
use crate::switchbot::advert::{DecodeError, decode_advertisement};

/// Drain `rows` into the store with one `record_batch` call per `batch_size` rows.
///
/// Stops at the first error; batches written before it stay written.
pub fn record_in_batches<S, I, E>(store: &S, rows: I, batch_size: NonZeroUsize) -> Result<BatchOutcome, E>
where
    S: LedgerStore + ?Sized,
    I: IntoIterator<Item = Result<Measurement, E>>,
    E: From<LedgerError>,
{
    let mut buffer = Vec::with_capacity(batch_size.get());
    let mut outcome = BatchOutcome::default();

    for row in rows {
        buffer.push(row?);
        if buffer.len() >= batch_size.get() {
            outcome.merge(flush(store, &mut buffer)?);
        }
    }
    if !buffer.is_empty() {
        outcome.merge(flush(store, &mut buffer)?);
    }
    Ok(outcome)
}

fn flush<S: LedgerStore + ?Sized>(store: &S, buffer: &mut Vec<Measurement>) -> Result<BatchOutcome, LedgerError> {
    let outcome = store.record_batch(buffer)?;
    debug!(
        "Batch written (rows={}, inserted={}, duplicates={})",
        buffer.len(),
        outcome.inserted,
        outcome.duplicates
    );
    buffer.clear();
    Ok(outcome)
}

#[derive(Debug, Error)]
pub enum AdvertIngestError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Decode one advertisement and record it for a registered device.
///
/// A model byte that disagrees with the registered device type is logged, not rejected.
pub fn record_advertisement<S: LedgerStore + ?Sized>(
    store: &S,
    device_id: DeviceId,
    manufacturer_data: &HashMap<u16, Vec<u8>>,
    service_data: &HashMap<Uuid, Vec<u8>>,
    measured_at: DateTime<Utc>,
) -> Result<Measurement, AdvertIngestError> {
    let (model, reading) = decode_advertisement(manufacturer_data, service_data)?;
    let device = store
        .device(device_id)?
        .ok_or(LedgerError::UnknownDevice(device_id))?;
    if device.device_type != model {
        warn!(
            "Advertisement for {} decodes as {} but the device is registered as {}",
            device_id, model, device.device_type
        );
    }
    let measurement = reading.into_measurement(device_id, measured_at);
    store.record(&measurement)?;
    Ok(measurement)
}
