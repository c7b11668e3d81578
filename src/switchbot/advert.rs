//! Decoder for SwitchBot BLE advertisement payloads.
//!
//! Ref: https://github.com/OpenWonderLabs/SwitchBotAPI-BLE
//!
//! The model is identified by the first byte of the service data; the readings live in the
//! manufacturer data at model-specific offsets.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::device::{DeviceId, DeviceType};
use crate::models::measurement::Measurement;

pub const MANUFACTURER_COMPANY_ID: u16 = 0x0969;
pub const SERVICE_DATA_UUID: Uuid = Uuid::from_u128(0x0000fd3d_0000_1000_8000_00805f9b34fb);

const HUMIDITY_MAX: u8 = 100;
const LIGHT_LEVEL_MAX: u8 = 20;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("SwitchBot service data not found: {SERVICE_DATA_UUID}")]
    MissingServiceData,

    #[error("SwitchBot service data is empty")]
    EmptyServiceData,

    #[error("SwitchBot manufacturer data not found: 0x{MANUFACTURER_COMPANY_ID:04x}")]
    MissingManufacturerData,

    #[error("unknown SwitchBot device type: 0x{0:02x}")]
    UnknownModelByte(u8),

    #[error("no advertisement layout known for {0}")]
    UnsupportedModel(DeviceType),

    #[error("{model} manufacturer data too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        model: DeviceType,
        expected: usize,
        actual: usize,
    },

    #[error("{field} out of range: expected 0-{max}, got {value}")]
    OutOfRange { field: &'static str, value: u8, max: u8 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedReading {
    pub temperature_celsius: f32,
    pub humidity_percent: u8,
    pub co2_ppm: Option<u16>,
    pub light_level: Option<u8>,
}

impl DecodedReading {
    pub fn into_measurement(self, device_id: DeviceId, measured_at: DateTime<Utc>) -> Measurement {
        Measurement {
            device_id,
            measured_at,
            temperature_celsius: self.temperature_celsius,
            humidity_percent: self.humidity_percent,
            co2_ppm: self.co2_ppm,
            light_level: self.light_level,
        }
    }
}

/// Decode one advertisement given its manufacturer data (by company id) and service data (by UUID).
pub fn decode_advertisement(
    manufacturer_data: &HashMap<u16, Vec<u8>>,
    service_data: &HashMap<Uuid, Vec<u8>>,
) -> Result<(DeviceType, DecodedReading), DecodeError> {
    let service = service_data
        .get(&SERVICE_DATA_UUID)
        .ok_or(DecodeError::MissingServiceData)?;
    let device_type = detect_device_type(service)?;
    let manufacturer = manufacturer_data
        .get(&MANUFACTURER_COMPANY_ID)
        .ok_or(DecodeError::MissingManufacturerData)?;
    let reading = decode_manufacturer_data(device_type, manufacturer)?;
    Ok((device_type, reading))
}

pub fn detect_device_type(service_data: &[u8]) -> Result<DeviceType, DecodeError> {
    let Some(&raw) = service_data.first() else {
        return Err(DecodeError::EmptyServiceData);
    };
    match raw {
        0x76 => Ok(DeviceType::Hub2),
        0x54 => Ok(DeviceType::Meter),
        0x69 => Ok(DeviceType::MeterPlus),
        0x77 => Ok(DeviceType::WoIOSensor),
        0x35 => Ok(DeviceType::MeterProCO2),
        other => Err(DecodeError::UnknownModelByte(other)),
    }
}

pub fn decode_manufacturer_data(device_type: DeviceType, data: &[u8]) -> Result<DecodedReading, DecodeError> {
    match device_type {
        DeviceType::Hub2 => {
            require_len(device_type, data, 17)?;
            Ok(DecodedReading {
                temperature_celsius: decode_temperature([data[13], data[14]]),
                humidity_percent: decode_humidity(data[15])?,
                co2_ppm: None,
                light_level: Some(decode_light_level(data[12])?),
            })
        }
        DeviceType::MeterPlus | DeviceType::WoIOSensor => {
            let expected = if device_type == DeviceType::MeterPlus { 11 } else { 12 };
            require_len(device_type, data, expected)?;
            Ok(DecodedReading {
                temperature_celsius: decode_temperature([data[8], data[9]]),
                humidity_percent: decode_humidity(data[10])?,
                co2_ppm: None,
                light_level: None,
            })
        }
        DeviceType::MeterProCO2 => {
            require_len(device_type, data, 16)?;
            Ok(DecodedReading {
                temperature_celsius: decode_temperature([data[8], data[9]]),
                humidity_percent: decode_humidity(data[10])?,
                co2_ppm: Some(u16::from_be_bytes([data[13], data[14]])),
                light_level: None,
            })
        }
        DeviceType::Hub
        | DeviceType::HubPlus
        | DeviceType::HubMini
        | DeviceType::Hub3
        | DeviceType::Meter
        | DeviceType::MeterPro => Err(DecodeError::UnsupportedModel(device_type)),
    }
}

fn require_len(model: DeviceType, data: &[u8], expected: usize) -> Result<(), DecodeError> {
    if data.len() < expected {
        return Err(DecodeError::TooShort {
            model,
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

/// Low nibble of the first byte is tenths, low 7 bits of the second are whole degrees, and the
/// high bit of the second is set for positive values.
fn decode_temperature(v: [u8; 2]) -> f32 {
    let tenths = i16::from(v[0] & 0x0f);
    let whole = i16::from(v[1] & 0x7f);
    let sign = if v[1] & 0x80 != 0 { 1i16 } else { -1i16 };
    f32::from(sign * (whole * 10 + tenths)) / 10f32
}

fn decode_humidity(v: u8) -> Result<u8, DecodeError> {
    let humidity = v & 0x7f;
    if humidity > HUMIDITY_MAX {
        return Err(DecodeError::OutOfRange {
            field: "humidity",
            value: humidity,
            max: HUMIDITY_MAX,
        });
    }
    Ok(humidity)
}

fn decode_light_level(v: u8) -> Result<u8, DecodeError> {
    let level = v & 0x7f;
    if level > LIGHT_LEVEL_MAX {
        return Err(DecodeError::OutOfRange {
            field: "light level",
            value: level,
            max: LIGHT_LEVEL_MAX,
        });
    }
    Ok(level)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub2_payload() -> Vec<u8> {
        let mut data = vec![0u8; 17];
        data[12] = 0x05;
        data[13] = 0x03;
        data[14] = 0x80 | 21;
        data[15] = 45;
        data
    }

    #[test]
    fn decodes_hub2_advertisement() {
        let manufacturer = HashMap::from([(MANUFACTURER_COMPANY_ID, hub2_payload())]);
        let service = HashMap::from([(SERVICE_DATA_UUID, vec![0x76, 0x00])]);

        let (model, reading) = decode_advertisement(&manufacturer, &service).unwrap();
        assert_eq!(model, DeviceType::Hub2);
        assert_eq!(
            reading,
            DecodedReading {
                temperature_celsius: 21.3,
                humidity_percent: 45,
                co2_ppm: None,
                light_level: Some(5),
            }
        );
    }

    #[test]
    fn negative_temperature_when_sign_bit_clear() {
        assert_eq!(decode_temperature([0x07, 0x05]), -5.7);
        assert_eq!(decode_temperature([0x00, 0x80]), 0.0);
    }

    #[test]
    fn decodes_co2_meter() {
        let mut data = vec![0u8; 16];
        data[8] = 0x01;
        data[9] = 0x80 | 19;
        data[10] = 0x80 | 52;
        data[13] = 0x03;
        data[14] = 0x20;
        let reading = decode_manufacturer_data(DeviceType::MeterProCO2, &data).unwrap();
        assert_eq!(reading.temperature_celsius, 19.1);
        assert_eq!(reading.humidity_percent, 52);
        assert_eq!(reading.co2_ppm, Some(800));
        assert_eq!(reading.light_level, None);
    }

    #[test]
    fn rejects_short_and_out_of_range_payloads() {
        assert_eq!(
            decode_manufacturer_data(DeviceType::MeterPlus, &[0u8; 10]),
            Err(DecodeError::TooShort {
                model: DeviceType::MeterPlus,
                expected: 11,
                actual: 10
            })
        );
        assert!(decode_manufacturer_data(DeviceType::WoIOSensor, &[0u8; 11]).is_err());

        let mut data = hub2_payload();
        data[12] = 21;
        assert!(matches!(
            decode_manufacturer_data(DeviceType::Hub2, &data),
            Err(DecodeError::OutOfRange { value: 21, .. })
        ));

        let mut data = hub2_payload();
        data[15] = 101;
        assert!(matches!(
            decode_manufacturer_data(DeviceType::Hub2, &data),
            Err(DecodeError::OutOfRange { field: "humidity", .. })
        ));
    }

    #[test]
    fn model_detection() {
        assert_eq!(detect_device_type(&[0x69]), Ok(DeviceType::MeterPlus));
        assert_eq!(detect_device_type(&[]), Err(DecodeError::EmptyServiceData));
        assert_eq!(detect_device_type(&[0xff]), Err(DecodeError::UnknownModelByte(0xff)));
        assert_eq!(
            decode_manufacturer_data(DeviceType::Meter, &[0u8; 32]),
            Err(DecodeError::UnsupportedModel(DeviceType::Meter))
        );
    }

    #[test]
    fn missing_sections_are_reported() {
        let empty = HashMap::new();
        let service = HashMap::from([(SERVICE_DATA_UUID, vec![0x76])]);
        assert_eq!(
            decode_advertisement(&empty, &HashMap::new()),
            Err(DecodeError::MissingServiceData)
        );
        assert_eq!(
            decode_advertisement(&empty, &service),
            Err(DecodeError::MissingManufacturerData)
        );
    }
}
