pub mod database;
pub mod error;
pub mod migration;
pub mod query;
pub mod worker;

pub use database::{Database, DatabaseInfo, SCHEMA_VERSION};
pub use error::StoreError;
pub use migration::{migrate_legacy, LegacyDiary, LegacySource, MigrationOutcome};
pub use query::DiaryQuery;
pub use worker::{spawn_store, StoreHandle, StoreWorker};
