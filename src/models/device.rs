//! Device registry types: hardware identity and the closed set of supported models.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use macaddr::MacAddr6;
use serde::{Serialize, Serializer};

use crate::error::LedgerError;

/// 6-byte hardware identifier (the BLE MAC address), assigned by the manufacturer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId([u8; 6]);

impl DeviceId {
    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl From<[u8; 6]> for DeviceId {
    fn from(bytes: [u8; 6]) -> Self {
        DeviceId(bytes)
    }
}

impl From<MacAddr6> for DeviceId {
    fn from(mac: MacAddr6) -> Self {
        DeviceId(mac.into_array())
    }
}

impl TryFrom<&[u8]> for DeviceId {
    type Error = LedgerError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let raw: [u8; 6] = bytes
            .try_into()
            .map_err(|_| LedgerError::Storage(format!("invalid device id length: {}", bytes.len())))?;
        Ok(DeviceId(raw))
    }
}

impl FromStr for DeviceId {
    type Err = macaddr::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<MacAddr6>().map(DeviceId::from)
    }
}

impl Display for DeviceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl Serialize for DeviceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Hub,
    HubPlus,
    HubMini,
    Hub2,
    Hub3,
    Meter,
    MeterPlus,
    WoIOSensor,
    MeterPro,
    MeterProCO2,
}

/// Which optional measurement fields a model is able to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub climate: bool,
    pub co2: bool,
    pub light_level: bool,
}

impl DeviceType {
    pub const ALL: [DeviceType; 10] = [
        DeviceType::Hub,
        DeviceType::HubPlus,
        DeviceType::HubMini,
        DeviceType::Hub2,
        DeviceType::Hub3,
        DeviceType::Meter,
        DeviceType::MeterPlus,
        DeviceType::WoIOSensor,
        DeviceType::MeterPro,
        DeviceType::MeterProCO2,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Hub => "Hub",
            DeviceType::HubPlus => "Hub Plus",
            DeviceType::HubMini => "Hub Mini",
            DeviceType::Hub2 => "Hub 2",
            DeviceType::Hub3 => "Hub 3",
            DeviceType::Meter => "Meter",
            DeviceType::MeterPlus => "MeterPlus",
            DeviceType::WoIOSensor => "WoIOSensor",
            DeviceType::MeterPro => "MeterPro",
            DeviceType::MeterProCO2 => "MeterPro(CO2)",
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        let (climate, co2, light_level) = match self {
            DeviceType::Hub | DeviceType::HubPlus | DeviceType::HubMini => (false, false, false),
            DeviceType::Hub2 | DeviceType::Hub3 => (true, false, true),
            DeviceType::Meter | DeviceType::MeterPlus | DeviceType::WoIOSensor | DeviceType::MeterPro => {
                (true, false, false)
            }
            DeviceType::MeterProCO2 => (true, true, false),
        };
        Capabilities {
            climate,
            co2,
            light_level,
        }
    }
}

impl Display for DeviceType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| LedgerError::UnknownDeviceType(s.to_string()))
    }
}

impl Serialize for DeviceType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    pub id: DeviceId,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    pub name: String,
    pub sort_order: i32,
}
