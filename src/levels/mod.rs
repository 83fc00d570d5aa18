//! Per-level temperature aggregation.
//!
//! A query runs three stages in order:
//!
//! 1. [`topology::resolve`] loads the sensors of the requested silos
//! 2. [`latest::select_latest`] fetches each sensor's newest in-window reading
//! 3. [`aggregate::aggregate`] averages those readings per (silo, level)
//!
//! The engine holds no mutable state; one instance serves any number of
//! concurrent queries.

pub mod aggregate;
pub mod latest;
pub mod topology;

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::classify::{ColorClassifier, StatusLevel, ThresholdClassifier};
use crate::model::{LevelAverageRecord, LevelQuery, SensorPlacement, SensorReadingRecord};
use crate::settings::{Settings, StoreBackend};
use crate::store::{
    GroupStore, MemoryStore, ReadingStore, SiloStore, SqliteStore, StoreError, TopologyStore,
};

#[derive(Error, Debug)]
pub enum QueryError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("query cancelled")]
    Cancelled,
}

#[derive(Clone)]
pub struct LevelEngine {
    topology: Arc<dyn TopologyStore>,
    groups: Arc<dyn GroupStore>,
    readings: Arc<dyn ReadingStore>,
    classifier: Arc<dyn ColorClassifier>,
    max_concurrency: usize,
}

impl LevelEngine {
    /// Build an engine over a store that serves topology, groups and readings.
    pub fn new<S>(
        store: Arc<S>,
        classifier: Arc<dyn ColorClassifier>,
        max_concurrency: usize,
    ) -> Self
    where
        S: SiloStore + 'static,
    {
        Self {
            topology: store.clone(),
            groups: store.clone(),
            readings: store,
            classifier,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn from_parts(
        topology: Arc<dyn TopologyStore>,
        groups: Arc<dyn GroupStore>,
        readings: Arc<dyn ReadingStore>,
        classifier: Arc<dyn ColorClassifier>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            topology,
            groups,
            readings,
            classifier,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Open the configured store and wire up a threshold classifier.
    pub fn from_settings(settings: &Settings) -> Result<Self, StoreError> {
        let classifier: Arc<dyn ColorClassifier> =
            Arc::new(ThresholdClassifier::new(settings.colors.clone()));
        let max_concurrency = settings.query.max_concurrency;
        match settings.store.backend {
            StoreBackend::Sqlite => {
                let store = SqliteStore::open(&settings.store.sqlite_path)?;
                Ok(Self::new(Arc::new(store), classifier, max_concurrency))
            }
            StoreBackend::Fixture => {
                info!("Loading fixture store from {:?}", settings.store.fixture_path);
                let store = MemoryStore::load(&settings.store.fixture_path)?;
                Ok(Self::new(Arc::new(store), classifier, max_concurrency))
            }
        }
    }

    async fn placements(&self, query: &LevelQuery) -> Result<Vec<SensorPlacement>, QueryError> {
        let silo_ids =
            topology::expand_selector(self.topology.as_ref(), self.groups.as_ref(), &query.selector)
                .await?;
        let placements = topology::resolve(self.topology.as_ref(), &silo_ids).await?;
        debug!(
            "Resolved {} sensors across {} requested silos",
            placements.len(),
            silo_ids.len()
        );
        Ok(placements)
    }

    /// Averaged temperature per (silo, level). Unknown silos and groups yield
    /// an empty result; any store failure fails the whole query.
    pub async fn level_averages(
        &self,
        query: &LevelQuery,
    ) -> Result<Vec<LevelAverageRecord>, QueryError> {
        let placements = self.placements(query).await?;
        if placements.is_empty() {
            return Ok(Vec::new());
        }
        let selected = latest::select_latest(
            self.readings.as_ref(),
            &placements,
            &query.window,
            self.max_concurrency,
        )
        .await?;
        let records = aggregate::aggregate(&placements, &selected, self.classifier.as_ref());
        info!(
            "Level averages: {} sensors, {} with readings, {} records",
            placements.len(),
            selected.len(),
            records.len()
        );
        Ok(records)
    }

    /// Same as [`level_averages`](Self::level_averages), abandoning in-flight
    /// lookups as soon as `cancel` fires.
    pub async fn level_averages_with_cancel(
        &self,
        query: &LevelQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<LevelAverageRecord>, QueryError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(QueryError::Cancelled),
            res = self.level_averages(query) => res,
        }
    }

    /// Latest reading of every sensor of the selected silos, without
    /// cross-cable averaging.
    pub async fn latest_sensor_readings(
        &self,
        query: &LevelQuery,
    ) -> Result<Vec<SensorReadingRecord>, QueryError> {
        let placements = self.placements(query).await?;
        if placements.is_empty() {
            return Ok(Vec::new());
        }
        let selected = latest::select_latest(
            self.readings.as_ref(),
            &placements,
            &query.window,
            self.max_concurrency,
        )
        .await?;
        let rows = aggregate::sensor_rows(&placements, &selected, self.classifier.as_ref());
        let worst = StatusLevel::worst(rows.iter().map(|r| r.state));
        info!(
            "Sensor readings: {} sensors, {} rows, worst status {}",
            placements.len(),
            rows.len(),
            worst.as_str()
        );
        Ok(rows)
    }
}
