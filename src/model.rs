use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::classify::StatusLevel;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(v: i64) -> Self {
                Self(v)
            }
        }
    };
}

id_type!(
    /// Primary key of a silo row.
    SiloId
);
id_type!(CableId);
id_type!(SensorId);
id_type!(ReadingId);
id_type!(
    /// Primary key of a silo group.
    GroupId
);

/// Height position of a sensor. The same index on two cables of one silo
/// means the same physical height.
pub type LevelIndex = u16;

/// One sensor as seen from the topology store, with enough of its silo and
/// cable attached to place it in the output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorPlacement {
    pub silo_id: SiloId,
    pub silo_number: u32,
    pub silo_group: Option<String>,
    pub cable_id: CableId,
    pub cable_index: u16,
    pub sensor_id: SensorId,
    pub level_index: LevelIndex,
}

/// A single temperature observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub reading_id: ReadingId,
    pub temperature: f64,
    pub timestamp: DateTime<Utc>,
}

/// Closed time interval; a missing bound is unbounded on that side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| ts >= s) && self.end.map_or(true, |e| ts <= e)
    }
}

/// Averaged temperature for one level of one silo.
///
/// Field order is part of the wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelAverageRecord {
    pub silo_group: Option<String>,
    pub silo_number: u32,
    pub level_index: LevelIndex,
    pub temperature: f64,
    pub color: String,
    pub timestamp: DateTime<Utc>,
}

/// Latest reading of one sensor, without cross-cable averaging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReadingRecord {
    pub sensor_id: SensorId,
    pub silo_group: Option<String>,
    pub silo_number: u32,
    pub cable_index: u16,
    pub level_index: LevelIndex,
    pub state: StatusLevel,
    pub color: String,
    pub temperature: f64,
    pub timestamp: DateTime<Utc>,
}

/// What a caller asked for, after boundary validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiloSelector {
    Ids(Vec<SiloId>),
    Numbers(Vec<u32>),
    Group(GroupId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelQuery {
    pub selector: SiloSelector,
    pub window: TimeWindow,
}

impl LevelQuery {
    pub fn for_silos(ids: impl IntoIterator<Item = SiloId>) -> Self {
        Self {
            selector: SiloSelector::Ids(ids.into_iter().collect()),
            window: TimeWindow::unbounded(),
        }
    }

    pub fn for_group(group: GroupId) -> Self {
        Self {
            selector: SiloSelector::Group(group),
            window: TimeWindow::unbounded(),
        }
    }

    pub fn with_window(mut self, window: TimeWindow) -> Self {
        self.window = window;
        self
    }
}
