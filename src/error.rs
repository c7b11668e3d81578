//! Error taxonomy shared by every ledger operation.
//!
//! Each variant belongs to exactly one [`ErrorKind`]; callers branch on the kind to decide
//! whether a failed write may be retried after re-reading state.

use chrono::{DateTime, Utc};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use thiserror::Error;

use crate::models::device::DeviceId;
use crate::models::topology::{HomeId, RoomId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Validation,
    Storage,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("unknown device: {0}")]
    UnknownDevice(DeviceId),

    #[error("unknown room: {0}")]
    UnknownRoom(RoomId),

    #[error("unknown home: {0}")]
    UnknownHome(HomeId),

    #[error("unknown device type: {0}")]
    UnknownDeviceType(String),

    #[error("device {device} is already placed in room {room}")]
    AlreadyPlaced { device: DeviceId, room: RoomId },

    #[error("device {0} has no open placement")]
    NotPlaced(DeviceId),

    #[error("device {device}: {at} is not after the previous boundary {boundary}")]
    NonMonotonicTime {
        device: DeviceId,
        at: DateTime<Utc>,
        boundary: DateTime<Utc>,
    },

    #[error("device {device} already has a measurement at {measured_at}")]
    DuplicateMeasurement {
        device: DeviceId,
        measured_at: DateTime<Utc>,
    },

    #[error("{entity} sort order {sort_order} is already taken")]
    DuplicateSortOrder { entity: &'static str, sort_order: i32 },

    #[error("{entity} {id} already exists")]
    DuplicateId { entity: &'static str, id: String },

    /// A uniqueness constraint fired inside the storage layer, usually a lost race.
    #[error("concurrent write rejected by constraint {0}")]
    ConcurrentWrite(String),

    #[error("{field} out of range: expected {min}-{max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("malformed interval: {from} is after {to}")]
    InvalidInterval { from: DateTime<Utc>, to: DateTime<Utc> },

    #[error("constraint {0} violated")]
    ConstraintViolation(String),

    #[error("referenced row missing ({0})")]
    MissingReference(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::UnknownDevice(_)
            | LedgerError::UnknownRoom(_)
            | LedgerError::UnknownHome(_)
            | LedgerError::MissingReference(_) => ErrorKind::NotFound,
            LedgerError::AlreadyPlaced { .. }
            | LedgerError::NotPlaced(_)
            | LedgerError::NonMonotonicTime { .. }
            | LedgerError::DuplicateMeasurement { .. }
            | LedgerError::DuplicateSortOrder { .. }
            | LedgerError::DuplicateId { .. }
            | LedgerError::ConcurrentWrite(_) => ErrorKind::Conflict,
            LedgerError::UnknownDeviceType(_)
            | LedgerError::OutOfRange { .. }
            | LedgerError::InvalidInterval { .. }
            | LedgerError::ConstraintViolation(_) => ErrorKind::Validation,
            LedgerError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Conflicts can succeed on resubmission once the caller has re-read current state.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

impl From<DieselError> for LedgerError {
    fn from(e: DieselError) -> Self {
        match e {
            DieselError::DatabaseError(kind, info) => {
                let constraint = info.constraint_name().unwrap_or("unnamed").to_string();
                match kind {
                    DatabaseErrorKind::UniqueViolation => LedgerError::ConcurrentWrite(constraint),
                    DatabaseErrorKind::SerializationFailure => {
                        LedgerError::ConcurrentWrite("serialization_failure".to_string())
                    }
                    DatabaseErrorKind::CheckViolation => LedgerError::ConstraintViolation(constraint),
                    DatabaseErrorKind::ForeignKeyViolation => LedgerError::MissingReference(constraint),
                    _ => LedgerError::Storage(info.message().to_string()),
                }
            }
            other => LedgerError::Storage(other.to_string()),
        }
    }
}

impl From<diesel::r2d2::PoolError> for LedgerError {
    fn from(e: diesel::r2d2::PoolError) -> Self {
        LedgerError::Storage(format!("connection pool: {}", e))
    }
}

pub type Result<T, E = LedgerError> = std::result::Result<T, E>;

/// Driver error with a chosen kind and constraint, for exercising the mappings without a server.
#[cfg(test)]
pub(crate) fn database_error(kind: DatabaseErrorKind, constraint: Option<&'static str>) -> DieselError {
    use diesel::result::DatabaseErrorInformation;

    struct Info(Option<&'static str>);

    impl DatabaseErrorInformation for Info {
        fn message(&self) -> &str {
            "constraint violated"
        }
        fn details(&self) -> Option<&str> {
            None
        }
        fn hint(&self) -> Option<&str> {
            None
        }
        fn table_name(&self) -> Option<&str> {
            None
        }
        fn column_name(&self) -> Option<&str> {
            None
        }
        fn constraint_name(&self) -> Option<&str> {
            self.0
        }
        fn statement_position(&self) -> Option<i32> {
            None
        }
    }

    DieselError::DatabaseError(kind, Box::new(Info(constraint)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn classifies_kinds() {
        let device = DeviceId::from([0xAA, 0xBB, 0xCC, 0x00, 0x11, 0x22]);
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();

        assert_eq!(LedgerError::UnknownDevice(device).kind(), ErrorKind::NotFound);
        assert_eq!(LedgerError::UnknownRoom(RoomId(4)).kind(), ErrorKind::NotFound);
        assert_eq!(
            LedgerError::NonMonotonicTime {
                device,
                at,
                boundary: at
            }
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            LedgerError::OutOfRange {
                field: "light_level",
                value: 21,
                min: 0,
                max: 20
            }
            .kind(),
            ErrorKind::Validation
        );
        assert!(LedgerError::ConcurrentWrite("placements_one_open_per_device".into()).is_retryable());
        assert!(!LedgerError::InvalidInterval { from: at, to: at }.is_retryable());
    }

    #[test]
    fn messages_name_the_device() {
        let device = DeviceId::from([0xAA, 0xBB, 0xCC, 0x00, 0x11, 0x22]);
        let msg = LedgerError::NotPlaced(device).to_string();
        assert_eq!(msg, "device AA:BB:CC:00:11:22 has no open placement");
    }

    #[test]
    fn driver_errors_map_onto_the_taxonomy() {
        let err = LedgerError::from(database_error(
            DatabaseErrorKind::UniqueViolation,
            Some("placements_one_open_per_device"),
        ));
        assert!(matches!(err, LedgerError::ConcurrentWrite(ref c) if c == "placements_one_open_per_device"));
        assert!(err.is_retryable());

        let err = LedgerError::from(database_error(DatabaseErrorKind::UniqueViolation, None));
        assert!(matches!(err, LedgerError::ConcurrentWrite(ref c) if c == "unnamed"));

        let err = LedgerError::from(database_error(DatabaseErrorKind::SerializationFailure, None));
        assert!(matches!(err, LedgerError::ConcurrentWrite(_)));
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err = LedgerError::from(database_error(
            DatabaseErrorKind::CheckViolation,
            Some("placements_interval_check"),
        ));
        assert!(matches!(err, LedgerError::ConstraintViolation(ref c) if c == "placements_interval_check"));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!err.is_retryable());

        let err = LedgerError::from(database_error(
            DatabaseErrorKind::ForeignKeyViolation,
            Some("placements_room_id_fkey"),
        ));
        assert!(matches!(err, LedgerError::MissingReference(_)));
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = LedgerError::from(database_error(DatabaseErrorKind::ClosedConnection, None));
        assert_eq!(err.kind(), ErrorKind::Storage);

        let err = LedgerError::from(DieselError::NotFound);
        assert_eq!(err.kind(), ErrorKind::Storage);
    }
}
