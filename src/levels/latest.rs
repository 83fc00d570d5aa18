use std::collections::HashMap;

use futures_util::stream::{self, StreamExt, TryStreamExt};
use tracing::debug;

use crate::model::{Reading, SensorId, SensorPlacement, TimeWindow};
use crate::store::{ReadingStore, StoreResult};

/// Latest reading inside `window`, ties on timestamp going to the highest
/// reading id. Stores without native ordering use this to match the SQL
/// `ORDER BY polled_at DESC, id DESC`.
pub fn pick_latest<'a, I>(readings: I, window: &TimeWindow) -> Option<&'a Reading>
where
    I: IntoIterator<Item = &'a Reading>,
{
    readings
        .into_iter()
        .filter(|r| window.contains(r.timestamp))
        .max_by_key(|r| (r.timestamp, r.reading_id))
}

/// Look up the latest in-window reading of every placed sensor, at most
/// `max_concurrency` lookups in flight.
///
/// Sensors with no qualifying reading are absent from the map. The first
/// store failure fails the whole selection and drops the remaining lookups.
pub async fn select_latest<R>(
    store: &R,
    placements: &[SensorPlacement],
    window: &TimeWindow,
    max_concurrency: usize,
) -> StoreResult<HashMap<SensorId, Reading>>
where
    R: ReadingStore + ?Sized,
{
    let ids: Vec<SensorId> = placements.iter().map(|p| p.sensor_id).collect();
    let found: Vec<(SensorId, Option<Reading>)> = stream::iter(ids)
        .map(|sensor_id| async move {
            let reading = store.latest_reading(sensor_id, window).await?;
            Ok::<_, crate::store::StoreError>((sensor_id, reading))
        })
        .buffer_unordered(max_concurrency.max(1))
        .try_collect()
        .await?;

    let total = found.len();
    let selected: HashMap<SensorId, Reading> = found
        .into_iter()
        .filter_map(|(id, r)| r.map(|r| (id, r)))
        .collect();
    debug!("Selected {} of {} sensors with in-window readings", selected.len(), total);
    Ok(selected)
}
