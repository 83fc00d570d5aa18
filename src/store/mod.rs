//! Read-only access to silo topology and sensor readings.
//!
//! The level engine depends only on the traits in this module. Two adapters
//! ship with the crate:
//!
//! - [`SqliteStore`]: the production schema (`silos`, `cables`, `sensors`,
//!   `readings_raw`, `silo_groups`) through rusqlite
//! - [`MemoryStore`]: an immutable in-memory copy, loadable from a JSON fixture

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{GroupId, Reading, SensorId, SensorPlacement, SiloId, TimeWindow};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Error, Debug)]
pub enum StoreError {
    /// The backing store could not be reached at all.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store query failed: {0}")]
    Query(String),
    #[error("invalid fixture: {0}")]
    Fixture(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref err, _)
                if matches!(
                    err.code,
                    rusqlite::ErrorCode::CannotOpen
                        | rusqlite::ErrorCode::DatabaseBusy
                        | rusqlite::ErrorCode::DatabaseLocked
                        | rusqlite::ErrorCode::NotADatabase
                ) =>
            {
                StoreError::Unavailable(e.to_string())
            }
            other => StoreError::Query(other.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait TopologyStore: Send + Sync {
    /// Every sensor on every cable of the given silos. Unknown ids are
    /// omitted, not reported.
    async fn sensors_for_silos(&self, silo_ids: &[SiloId]) -> StoreResult<Vec<SensorPlacement>>;

    /// Silo ids carrying the given display numbers. Unknown numbers are omitted.
    async fn silo_ids_for_numbers(&self, numbers: &[u32]) -> StoreResult<Vec<SiloId>>;
}

#[async_trait]
pub trait GroupStore: Send + Sync {
    /// Members of a group; empty when the group does not exist.
    async fn silos_in_group(&self, group_id: GroupId) -> StoreResult<Vec<SiloId>>;
}

#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Most recent reading of `sensor_id` inside `window`. Among readings that
    /// share the latest timestamp, the one with the highest reading id wins.
    async fn latest_reading(
        &self,
        sensor_id: SensorId,
        window: &TimeWindow,
    ) -> StoreResult<Option<Reading>>;
}

/// Convenience bound for adapters that serve all three roles.
pub trait SiloStore: TopologyStore + GroupStore + ReadingStore {}

impl<T: TopologyStore + GroupStore + ReadingStore> SiloStore for T {}
