use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::classify::{ColorClassifier, StatusLevel};
use crate::model::{
    LevelAverageRecord, LevelIndex, Reading, SensorId, SensorPlacement, SensorReadingRecord, SiloId,
};

/// Running sums for one (silo, level) group. Disconnected sensors are kept
/// apart and only stand in when the level has no live reading.
struct LevelAccumulator {
    silo_group: Option<String>,
    silo_number: u32,
    live: Contributors,
    disconnected: Contributors,
}

#[derive(Default)]
struct Contributors {
    sum: f64,
    count: usize,
    latest: Option<DateTime<Utc>>,
}

impl Contributors {
    fn add(&mut self, reading: &Reading) {
        self.sum += reading.temperature;
        self.count += 1;
        if self.latest.map_or(true, |ts| reading.timestamp > ts) {
            self.latest = Some(reading.timestamp);
        }
    }

    fn mean(&self) -> Option<(f64, DateTime<Utc>)> {
        let latest = self.latest?;
        Some((self.sum / self.count as f64, latest))
    }
}

impl LevelAccumulator {
    fn new(placement: &SensorPlacement) -> Self {
        Self {
            silo_group: placement.silo_group.clone(),
            silo_number: placement.silo_number,
            live: Contributors::default(),
            disconnected: Contributors::default(),
        }
    }

    fn add(&mut self, reading: &Reading, status: StatusLevel) {
        if status == StatusLevel::Disconnect {
            self.disconnected.add(reading);
        } else {
            self.live.add(reading);
        }
    }

    /// Mean and newest timestamp of the live readings, falling back to the
    /// disconnected ones.
    fn mean(&self) -> Option<(f64, DateTime<Utc>)> {
        self.live.mean().or_else(|| self.disconnected.mean())
    }
}

/// Average the selected readings of each (silo, level) across the silo's
/// cables.
///
/// Sensors missing from `readings` do not contribute, and neither do
/// readings the classifier reports as disconnected unless every reading of
/// the level is disconnected. A level with no contributing sensor produces
/// no record. The record timestamp is the newest contributing reading.
/// Records come out in silo order (silo number, then silo id), then by
/// ascending level.
pub fn aggregate(
    placements: &[SensorPlacement],
    readings: &HashMap<SensorId, Reading>,
    classifier: &dyn ColorClassifier,
) -> Vec<LevelAverageRecord> {
    let mut groups: BTreeMap<(u32, SiloId, LevelIndex), LevelAccumulator> = BTreeMap::new();

    for placement in placements {
        let Some(reading) = readings.get(&placement.sensor_id) else {
            continue;
        };
        groups
            .entry((placement.silo_number, placement.silo_id, placement.level_index))
            .or_insert_with(|| LevelAccumulator::new(placement))
            .add(reading, classifier.status(reading.temperature));
    }

    groups
        .into_iter()
        .filter_map(|((_, _, level_index), acc)| {
            let (temperature, timestamp) = acc.mean()?;
            Some(LevelAverageRecord {
                color: classifier.classify(temperature),
                silo_group: acc.silo_group,
                silo_number: acc.silo_number,
                level_index,
                temperature,
                timestamp,
            })
        })
        .collect()
}

/// One row per sensor that has a selected reading, in placement order.
pub fn sensor_rows(
    placements: &[SensorPlacement],
    readings: &HashMap<SensorId, Reading>,
    classifier: &dyn ColorClassifier,
) -> Vec<SensorReadingRecord> {
    placements
        .iter()
        .filter_map(|p| {
            let reading = readings.get(&p.sensor_id)?;
            let status = classifier.status(reading.temperature);
            Some(SensorReadingRecord {
                sensor_id: p.sensor_id,
                silo_group: p.silo_group.clone(),
                silo_number: p.silo_number,
                cable_index: p.cable_index,
                level_index: p.level_index,
                state: status,
                color: classifier.color_for(status),
                temperature: reading.temperature,
                timestamp: reading.timestamp,
            })
        })
        .collect()
}
