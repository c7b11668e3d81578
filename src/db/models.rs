//! Diesel row structs for the ledger tables and their conversions to domain types.

use std::io::Write;

use chrono::{DateTime, Utc};
use diesel::deserialize::{self, FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::pg::{Pg, PgValue};
use diesel::prelude::*;
use diesel::serialize::{self, IsNull, Output, ToSql};

use crate::error::LedgerError;
use crate::models::device::{Device, DeviceId, DeviceType};
use crate::models::measurement::Measurement;
use crate::models::placement::Placement;
use crate::models::topology::{Home, HomeId, Room, RoomId};
use crate::schema;
use crate::schema::sql_types::SwitchbotDeviceType;

/// `switchbot_device_type` enum column, stored by its display name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsExpression, FromSqlRow)]
#[diesel(sql_type = SwitchbotDeviceType)]
pub struct DeviceTypeColumn(pub DeviceType);

impl ToSql<SwitchbotDeviceType, Pg> for DeviceTypeColumn {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        out.write_all(self.0.as_str().as_bytes())?;
        Ok(IsNull::No)
    }
}

impl FromSql<SwitchbotDeviceType, Pg> for DeviceTypeColumn {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        let raw = std::str::from_utf8(bytes.as_bytes())?;
        Ok(DeviceTypeColumn(raw.parse::<DeviceType>()?))
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = schema::homes)]
#[diesel(check_for_backend(Pg))]
pub struct HomeRow {
    pub id: i64,
    pub name: String,
    pub sort_order: i32,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = schema::rooms)]
#[diesel(check_for_backend(Pg))]
pub struct RoomRow {
    pub id: i64,
    pub home_id: i64,
    pub name: String,
    pub sort_order: i32,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = schema::devices)]
#[diesel(check_for_backend(Pg))]
pub struct DeviceRow {
    pub id: Vec<u8>,
    pub device_type: DeviceTypeColumn,
    pub name: String,
    pub sort_order: i32,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = schema::placements)]
#[diesel(check_for_backend(Pg))]
pub struct PlacementRow {
    pub device_id: Vec<u8>,
    pub placed_at: DateTime<Utc>,
    pub removed_at: Option<DateTime<Utc>>,
    pub room_id: i64,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = schema::measurements)]
#[diesel(check_for_backend(Pg))]
pub struct MeasurementRow {
    pub device_id: Vec<u8>,
    pub measured_at: DateTime<Utc>,
    pub temperature_celsius: f32,
    pub humidity_percent: i16,
    pub co2_ppm: Option<i32>,
    pub light_level: Option<i16>,
}

impl From<HomeRow> for Home {
    fn from(row: HomeRow) -> Self {
        Home {
            id: HomeId(row.id),
            name: row.name,
            sort_order: row.sort_order,
        }
    }
}

impl From<&Home> for HomeRow {
    fn from(home: &Home) -> Self {
        HomeRow {
            id: home.id.0,
            name: home.name.clone(),
            sort_order: home.sort_order,
        }
    }
}

impl From<RoomRow> for Room {
    fn from(row: RoomRow) -> Self {
        Room {
            id: RoomId(row.id),
            home_id: HomeId(row.home_id),
            name: row.name,
            sort_order: row.sort_order,
        }
    }
}

impl From<&Room> for RoomRow {
    fn from(room: &Room) -> Self {
        RoomRow {
            id: room.id.0,
            home_id: room.home_id.0,
            name: room.name.clone(),
            sort_order: room.sort_order,
        }
    }
}

impl TryFrom<DeviceRow> for Device {
    type Error = LedgerError;

    fn try_from(row: DeviceRow) -> Result<Self, Self::Error> {
        Ok(Device {
            id: DeviceId::try_from(row.id.as_slice())?,
            device_type: row.device_type.0,
            name: row.name,
            sort_order: row.sort_order,
        })
    }
}

impl From<&Device> for DeviceRow {
    fn from(device: &Device) -> Self {
        DeviceRow {
            id: device.id.as_bytes().to_vec(),
            device_type: DeviceTypeColumn(device.device_type),
            name: device.name.clone(),
            sort_order: device.sort_order,
        }
    }
}

impl TryFrom<PlacementRow> for Placement {
    type Error = LedgerError;

    fn try_from(row: PlacementRow) -> Result<Self, Self::Error> {
        Ok(Placement {
            device_id: DeviceId::try_from(row.device_id.as_slice())?,
            placed_at: row.placed_at,
            removed_at: row.removed_at,
            room_id: RoomId(row.room_id),
        })
    }
}

impl From<&Placement> for PlacementRow {
    fn from(p: &Placement) -> Self {
        PlacementRow {
            device_id: p.device_id.as_bytes().to_vec(),
            placed_at: p.placed_at,
            removed_at: p.removed_at,
            room_id: p.room_id.0,
        }
    }
}

impl TryFrom<MeasurementRow> for Measurement {
    type Error = LedgerError;

    fn try_from(row: MeasurementRow) -> Result<Self, Self::Error> {
        let column = |name: &str, value: i64| LedgerError::Storage(format!("{} out of range in storage: {}", name, value));
        Ok(Measurement {
            device_id: DeviceId::try_from(row.device_id.as_slice())?,
            measured_at: row.measured_at,
            temperature_celsius: row.temperature_celsius,
            humidity_percent: u8::try_from(row.humidity_percent)
                .map_err(|_| column("humidity_percent", i64::from(row.humidity_percent)))?,
            co2_ppm: row
                .co2_ppm
                .map(|v| u16::try_from(v).map_err(|_| column("co2_ppm", i64::from(v))))
                .transpose()?,
            light_level: row
                .light_level
                .map(|v| u8::try_from(v).map_err(|_| column("light_level", i64::from(v))))
                .transpose()?,
        })
    }
}

impl From<&Measurement> for MeasurementRow {
    fn from(m: &Measurement) -> Self {
        MeasurementRow {
            device_id: m.device_id.as_bytes().to_vec(),
            measured_at: m.measured_at,
            temperature_celsius: m.temperature_celsius,
            humidity_percent: i16::from(m.humidity_percent),
            co2_ppm: m.co2_ppm.map(i32::from),
            light_level: m.light_level.map(i16::from),
        }
    }
}
