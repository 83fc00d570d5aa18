use std::collections::HashSet;

use crate::model::{SensorPlacement, SiloId, SiloSelector};
use crate::store::{GroupStore, StoreResult, TopologyStore};

/// Expand a selector into silo ids. Group and number lookups go through the
/// store; unknown groups and numbers simply expand to nothing.
pub async fn expand_selector<T, G>(
    topology: &T,
    groups: &G,
    selector: &SiloSelector,
) -> StoreResult<Vec<SiloId>>
where
    T: TopologyStore + ?Sized,
    G: GroupStore + ?Sized,
{
    match selector {
        SiloSelector::Ids(ids) => Ok(ids.clone()),
        SiloSelector::Numbers(numbers) => topology.silo_ids_for_numbers(numbers).await,
        SiloSelector::Group(group) => groups.silos_in_group(*group).await,
    }
}

/// Load the sensor layout of the given silos.
///
/// Output is sorted by silo number (silo id breaks ties), then cable index,
/// then level index, whatever order the store returned. Unknown silos are
/// absent and each sensor appears once.
pub async fn resolve<T>(topology: &T, silo_ids: &[SiloId]) -> StoreResult<Vec<SensorPlacement>>
where
    T: TopologyStore + ?Sized,
{
    let mut seen = HashSet::new();
    let ids: Vec<SiloId> = silo_ids.iter().copied().filter(|id| seen.insert(*id)).collect();
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut placements = topology.sensors_for_silos(&ids).await?;
    placements.sort_by_key(|p| {
        (
            p.silo_number,
            p.silo_id,
            p.cable_index,
            p.cable_id,
            p.level_index,
            p.sensor_id,
        )
    });

    let mut sensors = HashSet::new();
    placements.retain(|p| sensors.insert(p.sensor_id));
    Ok(placements)
}
