use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension};
use tracing::{debug, info};

use super::{GroupStore, ReadingStore, StoreError, StoreResult, TopologyStore};
use crate::model::{
    CableId, GroupId, Reading, ReadingId, SensorId, SensorPlacement, SiloId, TimeWindow,
};

/// Tables and indexes the queries below expect. Provisioning tools and tests
/// apply it; [`SqliteStore::open`] never does.
pub const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS silo_groups (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS silos (
        id INTEGER PRIMARY KEY,
        silo_number INTEGER NOT NULL,
        silo_group_id INTEGER REFERENCES silo_groups(id)
    );
    CREATE TABLE IF NOT EXISTS cables (
        id INTEGER PRIMARY KEY,
        silo_id INTEGER NOT NULL REFERENCES silos(id),
        cable_index INTEGER NOT NULL DEFAULT 0
    );
    CREATE TABLE IF NOT EXISTS sensors (
        id INTEGER PRIMARY KEY,
        cable_id INTEGER NOT NULL REFERENCES cables(id),
        sensor_index INTEGER NOT NULL,
        UNIQUE (cable_id, sensor_index)
    );
    CREATE TABLE IF NOT EXISTS readings_raw (
        id INTEGER PRIMARY KEY,
        sensor_id INTEGER NOT NULL REFERENCES sensors(id),
        value_c REAL NOT NULL,
        polled_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_silos_group ON silos(silo_group_id);
    CREATE INDEX IF NOT EXISTS idx_cables_silo ON cables(silo_id);
    CREATE INDEX IF NOT EXISTS idx_readings_raw_sensor_time ON readings_raw(sensor_id, polled_at);
";

/// SQLite-backed store. `polled_at` holds Unix milliseconds (UTC).
///
/// rusqlite is blocking, so every query runs on the blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open an existing database read-only. A missing file is reported as
    /// unavailable rather than created.
    pub fn open(path: &Path) -> StoreResult<Self> {
        info!("Opening sqlite store at {:?}", path);
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)
            .map_err(|e| StoreError::Unavailable(format!("{}: {}", path.display(), e)))?;
        Ok(Self::with_connection(conn))
    }

    /// Empty in-memory database with the schema applied.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self::with_connection(conn))
    }

    fn with_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    async fn run<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("store task aborted: {}", e)))?
    }

    /// Direct handle for seeding databases in tests and tools.
    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> StoreResult<()> {
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }
}

fn placeholders(n: usize) -> String {
    (1..=n).map(|i| format!("?{}", i)).collect::<Vec<_>>().join(",")
}

fn from_millis(ms: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Query(format!("polled_at out of range: {}", ms)))
}

#[async_trait]
impl TopologyStore for SqliteStore {
    async fn sensors_for_silos(&self, silo_ids: &[SiloId]) -> StoreResult<Vec<SensorPlacement>> {
        if silo_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = silo_ids.iter().map(|s| s.0).collect();
        self.run(move |conn| {
            let sql = format!(
                "SELECT si.id, si.silo_number, g.name, c.id, c.cable_index, s.id, s.sensor_index
                 FROM sensors s
                 INNER JOIN cables c ON s.cable_id = c.id
                 INNER JOIN silos si ON c.silo_id = si.id
                 LEFT JOIN silo_groups g ON si.silo_group_id = g.id
                 WHERE si.id IN ({})
                 ORDER BY si.silo_number, si.id, c.cable_index, c.id, s.sensor_index",
                placeholders(ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(ids.iter()), |row| {
                Ok(SensorPlacement {
                    silo_id: SiloId(row.get(0)?),
                    silo_number: row.get(1)?,
                    silo_group: row.get(2)?,
                    cable_id: CableId(row.get(3)?),
                    cable_index: row.get(4)?,
                    sensor_id: SensorId(row.get(5)?),
                    level_index: row.get(6)?,
                })
            })?;
            let placements = rows.collect::<Result<Vec<_>, _>>()?;
            debug!("sqlite: {} sensors for {} silos", placements.len(), ids.len());
            Ok(placements)
        })
        .await
    }

    async fn silo_ids_for_numbers(&self, numbers: &[u32]) -> StoreResult<Vec<SiloId>> {
        if numbers.is_empty() {
            return Ok(Vec::new());
        }
        let numbers = numbers.to_vec();
        self.run(move |conn| {
            let sql = format!(
                "SELECT id FROM silos WHERE silo_number IN ({}) ORDER BY silo_number, id",
                placeholders(numbers.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(numbers.iter()), |row| {
                Ok(SiloId(row.get(0)?))
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }
}

#[async_trait]
impl GroupStore for SqliteStore {
    async fn silos_in_group(&self, group_id: GroupId) -> StoreResult<Vec<SiloId>> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM silos WHERE silo_group_id = ?1 ORDER BY silo_number, id",
            )?;
            let rows = stmt.query_map(params![group_id.0], |row| Ok(SiloId(row.get(0)?)))?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }
}

#[async_trait]
impl ReadingStore for SqliteStore {
    async fn latest_reading(
        &self,
        sensor_id: SensorId,
        window: &TimeWindow,
    ) -> StoreResult<Option<Reading>> {
        let start = window.start.map(|t| t.timestamp_millis());
        let end = window.end.map(|t| t.timestamp_millis());
        self.run(move |conn| {
            let row = conn
                .query_row(
                    "SELECT id, value_c, polled_at FROM readings_raw
                     WHERE sensor_id = ?1
                       AND (?2 IS NULL OR polled_at >= ?2)
                       AND (?3 IS NULL OR polled_at <= ?3)
                     ORDER BY polled_at DESC, id DESC
                     LIMIT 1",
                    params![sensor_id.0, start, end],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, f64>(1)?,
                            row.get::<_, i64>(2)?,
                        ))
                    },
                )
                .optional()?;
            row.map(|(id, value_c, polled_at)| {
                Ok(Reading {
                    reading_id: ReadingId(id),
                    temperature: value_c,
                    timestamp: from_millis(polled_at)?,
                })
            })
            .transpose()
        })
        .await
    }
}
