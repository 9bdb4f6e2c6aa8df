pub mod database;
pub mod error;
pub mod schema;

pub use database::{utc_day_period, QuotaSubject, Record, RecordStore};
pub use error::StorageError;

pub const LEDGER_DB_FILENAME: &str = "ledger.db";
pub const RECORDS_TABLE: &str = "records";
pub const SUBJECTS_TABLE: &str = "subjects";
