//! Import of SwitchBot app CSV exports.
//!
//! The export layout depends on the model; the header tells which optional column is present.

use std::io::Read;
use std::num::NonZeroUsize;
use std::str::FromStr;

use chrono::{LocalResult, NaiveDateTime, Utc};
use chrono_tz::Tz;
use csv::{Reader, StringRecord};
use log::info;
use thiserror::Error;

use crate::error::LedgerError;
use crate::models::device::DeviceId;
use crate::models::measurement::{BatchOutcome, Measurement};
use crate::services::ingest::record_in_batches;
use crate::store::LedgerStore;

const MEASURED_AT_INDEX: usize = 0;
const TEMPERATURE_CELSIUS_INDEX: usize = 1;
const HUMIDITY_PERCENT_INDEX: usize = 2;
const CO2_PPM_INDEX: usize = 3;
const LIGHT_LEVEL_INDEX: usize = 6;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("reading CSV failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("line {line}: invalid timestamp {value:?}")]
    Timestamp { line: u64, value: String },

    #[error("line {line}: local time {value:?} does not exist in {timezone}")]
    NonexistentLocalTime { line: u64, value: String, timezone: Tz },

    #[error("line {line}: missing column {index} ({field})")]
    MissingColumn {
        line: u64,
        index: usize,
        field: &'static str,
    },

    #[error("line {line}: invalid {field} {value:?}")]
    Field {
        line: u64,
        field: &'static str,
        value: String,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsvFormat {
    TemperatureHumidity,
    TemperatureHumidityCo2,
    TemperatureHumidityLightLevel,
}

impl CsvFormat {
    pub fn detect(header: &StringRecord) -> Self {
        if header.iter().any(|h| h.contains("Co2")) {
            CsvFormat::TemperatureHumidityCo2
        } else if header.iter().any(|h| h.contains("Light_Value")) {
            CsvFormat::TemperatureHumidityLightLevel
        } else {
            CsvFormat::TemperatureHumidity
        }
    }
}

/// Streams measurements out of one export, one row at a time.
pub struct CsvMeasurements<R> {
    reader: Reader<R>,
    record: StringRecord,
    format: CsvFormat,
    device_id: DeviceId,
    timezone: Tz,
}

impl<R: Read> CsvMeasurements<R> {
    pub fn new(source: R, device_id: DeviceId, timezone: Tz) -> Result<Self, ImportError> {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(source);
        let format = CsvFormat::detect(reader.headers()?);
        Ok(CsvMeasurements {
            reader,
            record: StringRecord::new(),
            format,
            device_id,
            timezone,
        })
    }

    pub fn format(&self) -> CsvFormat {
        self.format
    }

    fn parse_row(&self) -> Result<Measurement, ImportError> {
        let row = &self.record;
        let line = row.position().map(|p| p.line()).unwrap_or_default();

        let raw_ts = column(row, line, MEASURED_AT_INDEX, "timestamp")?;
        let naive = NaiveDateTime::parse_from_str(raw_ts, TIMESTAMP_FORMAT).map_err(|_| ImportError::Timestamp {
            line,
            value: raw_ts.to_string(),
        })?;
        let measured_at = match naive.and_local_timezone(self.timezone) {
            LocalResult::Single(dt) => dt,
            // DST fall-back: take the first occurrence.
            LocalResult::Ambiguous(earliest, _) => earliest,
            LocalResult::None => {
                return Err(ImportError::NonexistentLocalTime {
                    line,
                    value: raw_ts.to_string(),
                    timezone: self.timezone,
                });
            }
        }
        .with_timezone(&Utc);

        let co2_ppm = match self.format {
            CsvFormat::TemperatureHumidityCo2 => Some(parse_field(row, line, CO2_PPM_INDEX, "CO2")?),
            _ => None,
        };
        let light_level = match self.format {
            CsvFormat::TemperatureHumidityLightLevel => Some(parse_field(row, line, LIGHT_LEVEL_INDEX, "light level")?),
            _ => None,
        };

        Ok(Measurement {
            device_id: self.device_id,
            measured_at,
            temperature_celsius: parse_field(row, line, TEMPERATURE_CELSIUS_INDEX, "temperature")?,
            humidity_percent: parse_field(row, line, HUMIDITY_PERCENT_INDEX, "humidity")?,
            co2_ppm,
            light_level,
        })
    }
}

impl<R: Read> Iterator for CsvMeasurements<R> {
    type Item = Result<Measurement, ImportError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.read_record(&mut self.record) {
            Ok(true) => Some(self.parse_row()),
            Ok(false) => None,
            Err(e) => Some(Err(e.into())),
        }
    }
}

fn column<'r>(row: &'r StringRecord, line: u64, index: usize, field: &'static str) -> Result<&'r str, ImportError> {
    row.get(index)
        .map(str::trim)
        .ok_or(ImportError::MissingColumn { line, index, field })
}

fn parse_field<T: FromStr>(row: &StringRecord, line: u64, index: usize, field: &'static str) -> Result<T, ImportError> {
    let raw = column(row, line, index, field)?;
    raw.parse().map_err(|_| ImportError::Field {
        line,
        field,
        value: raw.to_string(),
    })
}

/// Import one export for `device_id`, writing `batch_size` rows per unit of work.
///
/// Rows whose key already exists are counted as duplicates, so re-running an import is harmless.
pub fn import<S, R>(
    store: &S,
    source: R,
    device_id: DeviceId,
    timezone: Tz,
    batch_size: NonZeroUsize,
) -> Result<BatchOutcome, ImportError>
where
    S: LedgerStore + ?Sized,
    R: Read,
{
    if store.device(device_id)?.is_none() {
        return Err(LedgerError::UnknownDevice(device_id).into());
    }
    let rows = CsvMeasurements::new(source, device_id, timezone)?;
    info!("Importing CSV for {} (format={:?}, timezone={})", device_id, rows.format(), timezone);
    let outcome = record_in_batches(store, rows, batch_size)?;
    info!(
        "CSV import for {} complete (inserted={}, duplicates={})",
        device_id, outcome.inserted, outcome.duplicates
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::device::{Device, DeviceType};
    use crate::store::memory::MemoryStore;
    use chrono::TimeZone;

    const DEVICE: [u8; 6] = [0xC0, 0xFF, 0xEE, 0x00, 0x00, 0x01];

    fn rows(csv: &str, tz: Tz) -> Vec<Result<Measurement, ImportError>> {
        CsvMeasurements::new(csv.as_bytes(), DeviceId::from(DEVICE), tz)
            .unwrap()
            .collect()
    }

    #[test]
    fn plain_export_in_local_time() {
        let csv = "Date,Temperature_Celsius(°C),Relative_Humidity(%)\n\
                   2025-01-15 08:30,21.4,44\n\
                   2025-07-15 08:30,26.0,58\n";
        let parsed = rows(csv, chrono_tz::Europe::Amsterdam);
        let parsed: Vec<Measurement> = parsed.into_iter().map(Result::unwrap).collect();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].measured_at, Utc.with_ymd_and_hms(2025, 1, 15, 7, 30, 0).unwrap());
        assert_eq!(parsed[1].measured_at, Utc.with_ymd_and_hms(2025, 7, 15, 6, 30, 0).unwrap());
        assert_eq!(parsed[0].temperature_celsius, 21.4);
        assert_eq!(parsed[0].humidity_percent, 44);
        assert_eq!(parsed[0].co2_ppm, None);
        assert_eq!(parsed[0].light_level, None);
    }

    #[test]
    fn co2_and_light_formats_are_detected_from_header() {
        let co2 = "Date,Temperature_Celsius(°C),Relative_Humidity(%),Co2(ppm)\n2025-02-01 10:00,20.5,40,812\n";
        let parsed = rows(co2, chrono_tz::UTC);
        assert_eq!(parsed[0].as_ref().unwrap().co2_ppm, Some(812));

        let light = "Date,Temperature_Celsius(°C),Relative_Humidity(%),DPT(°C),VPD(kPa),Abs Humidity(g/m³),Light_Value\n\
                     2025-02-01 10:00,20.5,40,6.6,1.4,7.1,12\n";
        let parsed = rows(light, chrono_tz::UTC);
        let m = parsed[0].as_ref().unwrap();
        assert_eq!(m.light_level, Some(12));
        assert_eq!(m.co2_ppm, None);
    }

    #[test]
    fn dst_edges() {
        let header = "Date,Temperature_Celsius(°C),Relative_Humidity(%)\n";
        // 02:30 happens twice on the fall-back night; the earlier (CEST) instant wins.
        let parsed = rows(&format!("{header}2025-10-26 02:30,19.0,50\n"), chrono_tz::Europe::Amsterdam);
        assert_eq!(
            parsed[0].as_ref().unwrap().measured_at,
            Utc.with_ymd_and_hms(2025, 10, 26, 0, 30, 0).unwrap()
        );

        // 02:30 never happens on the spring-forward night.
        let parsed = rows(&format!("{header}2025-03-30 02:30,19.0,50\n"), chrono_tz::Europe::Amsterdam);
        assert!(matches!(parsed[0], Err(ImportError::NonexistentLocalTime { line: 2, .. })));
    }

    #[test]
    fn malformed_rows_name_their_line() {
        let csv = "Date,Temperature_Celsius(°C),Relative_Humidity(%)\n\
                   2025-01-15 08:30,21.4,44\n\
                   yesterday,21.4,44\n\
                   2025-01-15 08:45,warm,44\n\
                   2025-01-15 09:00,21.4\n";
        let parsed = rows(csv, chrono_tz::UTC);
        assert!(parsed[0].is_ok());
        assert!(matches!(parsed[1], Err(ImportError::Timestamp { line: 3, .. })));
        assert!(matches!(
            parsed[2],
            Err(ImportError::Field {
                line: 4,
                field: "temperature",
                ..
            })
        ));
        assert!(matches!(parsed[3], Err(ImportError::MissingColumn { line: 5, index: 2, .. })));
    }

    #[test]
    fn import_writes_in_batches_and_is_rerunnable() {
        let store = MemoryStore::new();
        let id = DeviceId::from(DEVICE);
        store
            .register_device(Device {
                id,
                device_type: DeviceType::MeterPlus,
                name: "Bedroom meter".into(),
                sort_order: 0,
            })
            .unwrap();

        let mut csv = String::from("Date,Temperature_Celsius(°C),Relative_Humidity(%)\n");
        for minute in 0..25 {
            csv.push_str(&format!("2025-01-15 08:{:02},21.0,45\n", minute));
        }
        let batch = NonZeroUsize::new(10).unwrap();

        let first = import(&store, csv.as_bytes(), id, chrono_tz::UTC, batch).unwrap();
        assert_eq!(first, BatchOutcome { inserted: 25, duplicates: 0 });
        let second = import(&store, csv.as_bytes(), id, chrono_tz::UTC, batch).unwrap();
        assert_eq!(second, BatchOutcome { inserted: 0, duplicates: 25 });

        let unknown = DeviceId::from([0u8; 6]);
        let err = import(&store, csv.as_bytes(), unknown, chrono_tz::UTC, batch).unwrap_err();
        assert!(matches!(err, ImportError::Ledger(LedgerError::UnknownDevice(_))));
    }
}
