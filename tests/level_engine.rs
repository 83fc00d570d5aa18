use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection};
use silo_thermo::classify::{ColorClassifier, StatusLevel, ThresholdClassifier};
use silo_thermo::levels::{LevelEngine, QueryError};
use silo_thermo::model::{
    CableId, GroupId, LevelQuery, Reading, ReadingId, SensorId, SiloId, SiloSelector, TimeWindow,
};
use silo_thermo::store::memory::{
    Fixture, FixtureCable, FixtureGroup, FixtureReading, FixtureSensor, FixtureSilo,
};
use silo_thermo::store::sqlite::SCHEMA;
use silo_thermo::store::{MemoryStore, ReadingStore, SqliteStore, StoreError, StoreResult};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn t(hour: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 10, 20, hour, min, 0).unwrap()
}

fn sensor(id: i64, level: u16, readings: &[(i64, f64, DateTime<Utc>)]) -> FixtureSensor {
    FixtureSensor {
        id: SensorId(id),
        level_index: level,
        readings: readings
            .iter()
            .map(|&(rid, temperature, timestamp)| FixtureReading {
                id: ReadingId(rid),
                temperature,
                timestamp,
            })
            .collect(),
    }
}

/// S1: one cable, levels 0 and 1.
/// S2: two cables sharing level 3; cable 1 also holds an older reading.
/// Both belong to group 1.
/// S3: ungrouped, two cables with disconnected sensors on both levels.
fn plant() -> Fixture {
    Fixture {
        groups: vec![FixtureGroup { id: GroupId(1), name: "G1".to_string() }],
        silos: vec![
            FixtureSilo {
                id: SiloId(1),
                silo_number: 1,
                group_id: Some(GroupId(1)),
                cables: vec![FixtureCable {
                    id: CableId(10),
                    cable_index: 0,
                    sensors: vec![
                        sensor(100, 0, &[(1000, 18.0, t(10, 0))]),
                        sensor(101, 1, &[(1010, 20.0, t(10, 1))]),
                    ],
                }],
            },
            FixtureSilo {
                id: SiloId(2),
                silo_number: 2,
                group_id: Some(GroupId(1)),
                cables: vec![
                    FixtureCable {
                        id: CableId(20),
                        cable_index: 0,
                        sensors: vec![sensor(203, 3, &[(2030, 15.0, t(10, 0))])],
                    },
                    FixtureCable {
                        id: CableId(21),
                        cable_index: 1,
                        sensors: vec![sensor(
                            213,
                            3,
                            &[(2129, 16.0, t(9, 0)), (2130, 17.0, t(10, 5))],
                        )],
                    },
                ],
            },
            FixtureSilo {
                id: SiloId(3),
                silo_number: 3,
                group_id: None,
                cables: vec![
                    FixtureCable {
                        id: CableId(30),
                        cable_index: 0,
                        sensors: vec![
                            sensor(300, 0, &[(3000, 20.0, t(10, 0))]),
                            sensor(301, 1, &[(3010, -127.0, t(10, 0))]),
                        ],
                    },
                    FixtureCable {
                        id: CableId(31),
                        cable_index: 1,
                        sensors: vec![
                            sensor(310, 0, &[(3100, -127.0, t(10, 3))]),
                            sensor(311, 1, &[(3110, -127.0, t(10, 4))]),
                        ],
                    },
                ],
            },
        ],
    }
}

fn seed_sqlite(path: &std::path::Path, fixture: &Fixture) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(SCHEMA).unwrap();
    for g in &fixture.groups {
        conn.execute(
            "INSERT INTO silo_groups (id, name) VALUES (?1, ?2)",
            params![g.id.0, g.name],
        )
        .unwrap();
    }
    for silo in &fixture.silos {
        conn.execute(
            "INSERT INTO silos (id, silo_number, silo_group_id) VALUES (?1, ?2, ?3)",
            params![silo.id.0, silo.silo_number, silo.group_id.map(|g| g.0)],
        )
        .unwrap();
        for cable in &silo.cables {
            conn.execute(
                "INSERT INTO cables (id, silo_id, cable_index) VALUES (?1, ?2, ?3)",
                params![cable.id.0, silo.id.0, cable.cable_index],
            )
            .unwrap();
            for s in &cable.sensors {
                conn.execute(
                    "INSERT INTO sensors (id, cable_id, sensor_index) VALUES (?1, ?2, ?3)",
                    params![s.id.0, cable.id.0, s.level_index],
                )
                .unwrap();
                for r in &s.readings {
                    conn.execute(
                        "INSERT INTO readings_raw (id, sensor_id, value_c, polled_at)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![r.id.0, s.id.0, r.temperature, r.timestamp.timestamp_millis()],
                    )
                    .unwrap();
                }
            }
        }
    }
}

fn classifier() -> Arc<dyn ColorClassifier> {
    Arc::new(ThresholdClassifier::default())
}

struct Engines {
    memory: LevelEngine,
    sqlite: LevelEngine,
    _dir: TempDir,
}

impl Engines {
    fn all(&self) -> [(&'static str, &LevelEngine); 2] {
        [("memory", &self.memory), ("sqlite", &self.sqlite)]
    }
}

fn engines() -> Engines {
    let fixture = plant();
    let memory = MemoryStore::from_fixture(fixture.clone()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("silo.db");
    seed_sqlite(&path, &fixture);
    let sqlite = SqliteStore::open(&path).unwrap();

    Engines {
        memory: LevelEngine::new(Arc::new(memory), classifier(), 4),
        sqlite: LevelEngine::new(Arc::new(sqlite), classifier(), 4),
        _dir: dir,
    }
}

#[tokio::test]
async fn test_single_cable_levels_pass_through() {
    let e = engines();
    for (name, engine) in e.all() {
        let out = engine.level_averages(&LevelQuery::for_silos([SiloId(1)])).await.unwrap();
        assert_eq!(out.len(), 2, "{}", name);
        assert_eq!((out[0].level_index, out[0].temperature), (0, 18.0), "{}", name);
        assert_eq!((out[1].level_index, out[1].temperature), (1, 20.0), "{}", name);
        assert_eq!(out[0].timestamp, t(10, 0), "{}", name);
        assert_eq!(out[0].silo_group.as_deref(), Some("G1"), "{}", name);
        assert_eq!(out[0].color, "#46d446", "{}", name);
    }
}

#[tokio::test]
async fn test_two_cables_are_averaged() {
    let e = engines();
    for (name, engine) in e.all() {
        let out = engine.level_averages(&LevelQuery::for_silos([SiloId(2)])).await.unwrap();
        assert_eq!(out.len(), 1, "{}", name);
        assert_eq!(out[0].level_index, 3);
        assert!((out[0].temperature - 16.0).abs() < 1e-9, "{}", name);
        assert_eq!(out[0].timestamp, t(10, 5), "{}", name);
    }
}

#[tokio::test]
async fn test_window_drops_out_of_range_cable() {
    let e = engines();
    let window = TimeWindow::new(Some(t(9, 30)), Some(t(10, 2)));
    for (name, engine) in e.all() {
        let query = LevelQuery::for_silos([SiloId(2)]).with_window(window);
        let out = engine.level_averages(&query).await.unwrap();
        assert_eq!(out.len(), 1, "{}", name);
        assert_eq!(out[0].temperature, 15.0, "{}", name);
        assert_eq!(out[0].timestamp, t(10, 0), "{}", name);
    }
}

#[tokio::test]
async fn test_window_selects_older_reading() {
    let e = engines();
    let window = TimeWindow::new(None, Some(t(9, 59)));
    for (name, engine) in e.all() {
        let query = LevelQuery::for_silos([SiloId(2)]).with_window(window);
        let out = engine.level_averages(&query).await.unwrap();
        assert_eq!(out.len(), 1, "{}", name);
        assert_eq!(out[0].temperature, 16.0, "{}", name);
    }
}

#[tokio::test]
async fn test_unknown_silo_is_ignored() {
    let e = engines();
    for (name, engine) in e.all() {
        let alone = engine.level_averages(&LevelQuery::for_silos([SiloId(1)])).await.unwrap();
        let mixed = engine
            .level_averages(&LevelQuery::for_silos([SiloId(1), SiloId(99999)]))
            .await
            .unwrap();
        assert_eq!(alone, mixed, "{}", name);
    }
}

#[tokio::test]
async fn test_group_is_union_of_members() {
    let e = engines();
    for (name, engine) in e.all() {
        let group = engine.level_averages(&LevelQuery::for_group(GroupId(1))).await.unwrap();
        let mut expected =
            engine.level_averages(&LevelQuery::for_silos([SiloId(1)])).await.unwrap();
        let second = engine.level_averages(&LevelQuery::for_silos([SiloId(2)])).await.unwrap();
        expected.extend(second);
        assert_eq!(group, expected, "{}", name);
        assert_eq!(group.len(), 3, "{}", name);
    }
}

#[tokio::test]
async fn test_unknown_identifiers_give_empty_result() {
    let e = engines();
    for (name, engine) in e.all() {
        let by_id = engine.level_averages(&LevelQuery::for_silos([SiloId(4242)])).await.unwrap();
        let by_group = engine.level_averages(&LevelQuery::for_group(GroupId(77))).await.unwrap();
        let by_number = engine
            .level_averages(&LevelQuery {
                selector: SiloSelector::Numbers(vec![404]),
                window: TimeWindow::unbounded(),
            })
            .await
            .unwrap();
        let nothing = engine
            .level_averages(&LevelQuery::for_silos(Vec::<SiloId>::new()))
            .await
            .unwrap();
        assert!(by_id.is_empty() && by_group.is_empty() && by_number.is_empty(), "{}", name);
        assert!(nothing.is_empty(), "{}", name);
    }
}

#[tokio::test]
async fn test_query_by_silo_number() {
    let e = engines();
    for (name, engine) in e.all() {
        let by_number = engine
            .level_averages(&LevelQuery {
                selector: SiloSelector::Numbers(vec![2]),
                window: TimeWindow::unbounded(),
            })
            .await
            .unwrap();
        let by_id = engine.level_averages(&LevelQuery::for_silos([SiloId(2)])).await.unwrap();
        assert_eq!(by_number, by_id, "{}", name);
    }
}

#[tokio::test]
async fn test_results_are_deterministic() {
    let e = engines();
    for (name, engine) in e.all() {
        let a = engine
            .level_averages(&LevelQuery::for_silos([SiloId(1), SiloId(2)]))
            .await
            .unwrap();
        let b = engine
            .level_averages(&LevelQuery::for_silos([SiloId(2), SiloId(1), SiloId(2)]))
            .await
            .unwrap();
        let c = engine
            .level_averages(&LevelQuery::for_silos([SiloId(1), SiloId(2)]))
            .await
            .unwrap();
        assert_eq!(a, b, "{}", name);
        assert_eq!(a, c, "{}", name);
    }
}

#[tokio::test]
async fn test_narrowing_window_never_adds_records() {
    let e = engines();
    let windows = [
        TimeWindow::unbounded(),
        TimeWindow::new(Some(t(9, 30)), None),
        TimeWindow::new(Some(t(9, 30)), Some(t(10, 2))),
        TimeWindow::new(Some(t(10, 1)), Some(t(10, 2))),
        TimeWindow::new(Some(t(11, 0)), Some(t(12, 0))),
    ];
    for (name, engine) in e.all() {
        let mut counts = Vec::new();
        for w in windows {
            let query = LevelQuery::for_group(GroupId(1)).with_window(w);
            counts.push(engine.level_averages(&query).await.unwrap().len());
        }
        assert!(counts.windows(2).all(|p| p[0] >= p[1]), "{}: {:?}", name, counts);
        assert_eq!(counts.last(), Some(&0), "{}", name);
    }
}

#[tokio::test]
async fn test_latest_sensor_readings_keep_cables_apart() {
    let e = engines();
    for (name, engine) in e.all() {
        let rows = engine
            .latest_sensor_readings(&LevelQuery::for_silos([SiloId(2)]))
            .await
            .unwrap();
        let summary: Vec<(u16, f64)> =
            rows.iter().map(|r| (r.cable_index, r.temperature)).collect();
        assert_eq!(summary, vec![(0, 15.0), (1, 17.0)], "{}", name);
        assert_eq!(rows[0].state, StatusLevel::Normal, "{}", name);
    }
}

#[tokio::test]
async fn test_disconnected_sensors_do_not_skew_average() {
    let e = engines();
    for (name, engine) in e.all() {
        let out = engine.level_averages(&LevelQuery::for_silos([SiloId(3)])).await.unwrap();
        assert_eq!(out.len(), 2, "{}", name);

        assert_eq!(out[0].level_index, 0, "{}", name);
        assert_eq!(out[0].temperature, 20.0, "{}", name);
        assert_eq!(out[0].color, "#46d446", "{}", name);
        assert_eq!(out[0].timestamp, t(10, 0), "{}", name);

        assert_eq!(out[1].level_index, 1, "{}", name);
        assert_eq!(out[1].temperature, -127.0, "{}", name);
        assert_eq!(out[1].color, "#8c9494", "{}", name);
        assert_eq!(out[1].silo_group, None, "{}", name);
    }
}

#[tokio::test]
async fn test_sensor_rows_flag_disconnected_sensors() {
    let e = engines();
    for (name, engine) in e.all() {
        let rows = engine
            .latest_sensor_readings(&LevelQuery::for_silos([SiloId(3)]))
            .await
            .unwrap();
        let states: Vec<StatusLevel> = rows.iter().map(|r| r.state).collect();
        assert_eq!(
            states,
            vec![
                StatusLevel::Normal,
                StatusLevel::Disconnect,
                StatusLevel::Disconnect,
                StatusLevel::Disconnect
            ],
            "{}",
            name
        );
        assert_eq!(StatusLevel::worst(states), StatusLevel::Disconnect, "{}", name);
    }
}

struct BrokenReadings;

#[async_trait]
impl ReadingStore for BrokenReadings {
    async fn latest_reading(&self, _: SensorId, _: &TimeWindow) -> StoreResult<Option<Reading>> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

#[tokio::test]
async fn test_store_failure_fails_whole_query() {
    let topology = Arc::new(MemoryStore::from_fixture(plant()).unwrap());
    let engine = LevelEngine::from_parts(
        topology.clone(),
        topology,
        Arc::new(BrokenReadings),
        classifier(),
        4,
    );
    let err = engine
        .level_averages(&LevelQuery::for_group(GroupId(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::Store(StoreError::Unavailable(_))));
}

/// Sleeps on every lookup and records the peak number of concurrent calls.
struct SlowReadings {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    delay: Duration,
}

#[async_trait]
impl ReadingStore for SlowReadings {
    async fn latest_reading(
        &self,
        sensor_id: SensorId,
        _: &TimeWindow,
    ) -> StoreResult<Option<Reading>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Some(Reading {
            reading_id: ReadingId(sensor_id.0),
            temperature: 20.0,
            timestamp: t(10, 0),
        }))
    }
}

#[tokio::test]
async fn test_lookups_respect_concurrency_limit() {
    let topology = Arc::new(MemoryStore::from_fixture(plant()).unwrap());
    let readings = Arc::new(SlowReadings {
        in_flight: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
        delay: Duration::from_millis(20),
    });
    let engine =
        LevelEngine::from_parts(topology.clone(), topology, readings.clone(), classifier(), 2);
    let out = engine.level_averages(&LevelQuery::for_group(GroupId(1))).await.unwrap();
    assert_eq!(out.len(), 3);
    let peak = readings.peak.load(Ordering::SeqCst);
    assert!((1..=2).contains(&peak), "peak concurrency {}", peak);
}

#[tokio::test]
async fn test_cancel_abandons_query() {
    let topology = Arc::new(MemoryStore::from_fixture(plant()).unwrap());
    let readings = Arc::new(SlowReadings {
        in_flight: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
        delay: Duration::from_secs(3600),
    });
    let engine = LevelEngine::from_parts(topology.clone(), topology, readings, classifier(), 4);

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let query = LevelQuery::for_group(GroupId(1));
    let res = tokio::time::timeout(
        Duration::from_secs(5),
        engine.level_averages_with_cancel(&query, &token),
    )
    .await
    .expect("cancellation did not stop the query");
    assert!(matches!(res, Err(QueryError::Cancelled)));
}
