pub mod models {
    pub mod device;
    pub mod measurement;
    pub mod placement;
    pub mod topology;
}

pub mod config;
pub mod db;
pub mod error;
pub mod ledger;
pub mod schema;
pub mod store;
pub mod switchbot {
    pub mod advert;
}
pub mod services {
    pub mod fake_data;
    pub mod import_csv;
    pub mod ingest;
}

pub use error::{ErrorKind, LedgerError, Result};
pub use store::LedgerStore;
pub use store::memory::MemoryStore;
pub use store::postgres::PgStore;
