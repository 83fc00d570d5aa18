use std::collections::{HashMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{GroupStore, ReadingStore, StoreError, StoreResult, TopologyStore};
use crate::levels::latest::pick_latest;
use crate::model::{
    CableId, GroupId, LevelIndex, Reading, ReadingId, SensorId, SensorPlacement, SiloId, TimeWindow,
};

/// Serialized form of a complete plant: groups, silos, their cables and
/// sensors, and the readings recorded so far.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub groups: Vec<FixtureGroup>,
    pub silos: Vec<FixtureSilo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureGroup {
    pub id: GroupId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureSilo {
    pub id: SiloId,
    pub silo_number: u32,
    #[serde(default)]
    pub group_id: Option<GroupId>,
    pub cables: Vec<FixtureCable>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureCable {
    pub id: CableId,
    #[serde(default)]
    pub cable_index: u16,
    pub sensors: Vec<FixtureSensor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureSensor {
    pub id: SensorId,
    pub level_index: LevelIndex,
    #[serde(default)]
    pub readings: Vec<FixtureReading>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureReading {
    pub id: ReadingId,
    pub temperature: f64,
    pub timestamp: DateTime<Utc>,
}

/// Immutable in-memory store. Safe to share across any number of
/// concurrent queries.
#[derive(Debug, Default)]
pub struct MemoryStore {
    placements: HashMap<SiloId, Vec<SensorPlacement>>,
    numbers: HashMap<u32, Vec<SiloId>>,
    groups: HashMap<GroupId, Vec<SiloId>>,
    readings: HashMap<SensorId, Vec<Reading>>,
}

impl MemoryStore {
    pub fn from_fixture(fixture: Fixture) -> StoreResult<Self> {
        let group_names: HashMap<GroupId, String> = fixture
            .groups
            .iter()
            .map(|g| (g.id, g.name.clone()))
            .collect();

        let mut store = MemoryStore::default();
        for g in &fixture.groups {
            store.groups.entry(g.id).or_default();
        }

        let mut seen_sensors = HashSet::new();
        for silo in fixture.silos {
            if store.placements.contains_key(&silo.id) {
                return Err(StoreError::Fixture(format!("duplicate silo id {}", silo.id)));
            }
            if silo.cables.is_empty() {
                return Err(StoreError::Fixture(format!("silo {} has no cables", silo.id)));
            }
            let silo_group = match silo.group_id {
                Some(gid) => {
                    let name = group_names.get(&gid).cloned().ok_or_else(|| {
                        StoreError::Fixture(format!(
                            "silo {} references unknown group {}",
                            silo.id, gid
                        ))
                    })?;
                    store.groups.entry(gid).or_default().push(silo.id);
                    Some(name)
                }
                None => None,
            };

            let mut placements = Vec::new();
            for cable in silo.cables {
                let mut levels = HashSet::new();
                for sensor in cable.sensors {
                    if !levels.insert(sensor.level_index) {
                        return Err(StoreError::Fixture(format!(
                            "cable {} has two sensors at level {}",
                            cable.id, sensor.level_index
                        )));
                    }
                    if !seen_sensors.insert(sensor.id) {
                        return Err(StoreError::Fixture(format!(
                            "duplicate sensor id {}",
                            sensor.id
                        )));
                    }
                    placements.push(SensorPlacement {
                        silo_id: silo.id,
                        silo_number: silo.silo_number,
                        silo_group: silo_group.clone(),
                        cable_id: cable.id,
                        cable_index: cable.cable_index,
                        sensor_id: sensor.id,
                        level_index: sensor.level_index,
                    });
                    store.readings.insert(
                        sensor.id,
                        sensor
                            .readings
                            .into_iter()
                            .map(|r| Reading {
                                reading_id: r.id,
                                temperature: r.temperature,
                                timestamp: r.timestamp,
                            })
                            .collect(),
                    );
                }
            }

            store.numbers.entry(silo.silo_number).or_default().push(silo.id);
            store.placements.insert(silo.id, placements);
        }

        Ok(store)
    }

    pub fn load(path: &Path) -> StoreResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Unavailable(format!("{}: {}", path.display(), e)))?;
        let fixture: Fixture = serde_json::from_str(&raw)
            .map_err(|e| StoreError::Fixture(format!("{}: {}", path.display(), e)))?;
        let store = Self::from_fixture(fixture)?;
        info!(
            "Loaded fixture {:?}: {} silos, {} sensors",
            path,
            store.placements.len(),
            store.readings.len()
        );
        Ok(store)
    }
}

#[async_trait]
impl TopologyStore for MemoryStore {
    async fn sensors_for_silos(&self, silo_ids: &[SiloId]) -> StoreResult<Vec<SensorPlacement>> {
        Ok(silo_ids
            .iter()
            .filter_map(|id| self.placements.get(id))
            .flatten()
            .cloned()
            .collect())
    }

    async fn silo_ids_for_numbers(&self, numbers: &[u32]) -> StoreResult<Vec<SiloId>> {
        Ok(numbers
            .iter()
            .filter_map(|n| self.numbers.get(n))
            .flatten()
            .copied()
            .collect())
    }
}

#[async_trait]
impl GroupStore for MemoryStore {
    async fn silos_in_group(&self, group_id: GroupId) -> StoreResult<Vec<SiloId>> {
        Ok(self.groups.get(&group_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl ReadingStore for MemoryStore {
    async fn latest_reading(
        &self,
        sensor_id: SensorId,
        window: &TimeWindow,
    ) -> StoreResult<Option<Reading>> {
        Ok(self
            .readings
            .get(&sensor_id)
            .and_then(|readings| pick_latest(readings, window))
            .cloned())
    }
}
