//! Way stage: raw ways + node coordinates -> feature-way shards and the
//! way-linestring lookup.
//!
//! Each group joins its flattened refs against the co-partitioned node
//! shards, collapses duplicate vertices, classifies linestring vs polygon
//! by the tag policy and repairs the result. Chunks that exceed the memory
//! budget are retried at half the group size.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use common_error::AnserResult;
use geo_types::{Coord, Geometry, LineString, Polygon};

use anser_core::{feature_id, FeatureKind, WayRecord};
use anser_geometry::repair::repair_geometry;
use anser_geometry::to_wkb;

use crate::columnar::{
    decode_nodes, decode_ways, encode_features, encode_linestrings, FeatureRow,
};
use crate::context::PipelineEnv;
use crate::{datasets, round7};

/// Rough per-row working-set cost of a joined way vertex, in bytes.
const VERTEX_COST: usize = 48;

enum ChunkOutcome {
    Done,
    BudgetExceeded,
}

/// Run the way stage: one task per raw way group.
pub async fn run(env: Arc<PipelineEnv>) -> AnserResult<()> {
    let groups = env.store.groups(datasets::WAYS_RAW)?;
    env.progress
        .step_begin("Assembling ways", Some(groups.len() as u64));

    let mut tasks = common_runtime::JoinSet::new();
    for group in groups {
        let env = Arc::clone(&env);
        tasks.spawn(async move { process_group(&env, group) });
    }
    for result in tasks.join_all().await? {
        result?;
        env.progress.tick();
    }

    env.progress.step_end("Assembling ways");
    Ok(())
}

fn process_group(env: &PipelineEnv, group: u64) -> AnserResult<()> {
    env.cancel.checkpoint()?;

    let mut ways: Vec<WayRecord> = Vec::new();
    for batch in env.store.read_group(datasets::WAYS_RAW, group)? {
        ways.extend(decode_ways(&batch)?);
    }

    let mut start = 0;
    while start < ways.len() {
        env.cancel.checkpoint()?;
        let size = env.scheduler.rows_per_group().min(ways.len() - start);
        let chunk = &ways[start..start + size];
        match process_chunk(env, group, chunk)? {
            ChunkOutcome::Done => start += size,
            ChunkOutcome::BudgetExceeded => {
                env.scheduler.downscale()?;
            }
        }
    }
    Ok(())
}

fn process_chunk(env: &PipelineEnv, group: u64, chunk: &[WayRecord]) -> AnserResult<ChunkOutcome> {
    let total_refs: usize = chunk.iter().map(|way| way.refs.len()).sum();
    let Some(_reservation) = env.scheduler.try_reserve(total_refs * VERTEX_COST) else {
        return Ok(ChunkOutcome::BudgetExceeded);
    };

    let coordinates = load_coordinates(env, chunk)?;

    let mut linestrings: Vec<(u64, Vec<u8>)> = Vec::new();
    let mut features: Vec<FeatureRow> = Vec::new();

    for way in chunk {
        let mut coords: Vec<Coord<f64>> = Vec::with_capacity(way.refs.len());
        let mut unresolved = false;
        for node_ref in &way.refs {
            match coordinates.get(node_ref) {
                Some(&(lon, lat)) => {
                    let coord = Coord {
                        x: round7(lon),
                        y: round7(lat),
                    };
                    if coords.last() != Some(&coord) {
                        coords.push(coord);
                    }
                }
                None => {
                    unresolved = true;
                    break;
                }
            }
        }
        if unresolved {
            env.counters
                .unresolved_way_refs
                .fetch_add(1, Ordering::Relaxed);
            continue;
        }
        if coords.len() < 2 {
            env.counters.degenerate_ways.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        let linestring = LineString::new(coords);
        linestrings.push((way.id, to_wkb(&Geometry::LineString(linestring.clone()))?));

        if let Some(feature) = build_feature(env, way, linestring)? {
            features.push(feature);
        }
    }

    if !linestrings.is_empty() {
        env.store.write_part(
            datasets::WAY_LINESTRINGS,
            group,
            &encode_linestrings(&linestrings)?,
        )?;
    }
    if !features.is_empty() {
        env.store
            .write_part(datasets::FEATURE_WAYS, group, &encode_features(&features)?)?;
    }
    Ok(ChunkOutcome::Done)
}

/// Load the coordinate lookup for every node group this chunk references.
fn load_coordinates(
    env: &PipelineEnv,
    chunk: &[WayRecord],
) -> AnserResult<HashMap<u64, (f64, f64)>> {
    let partition = env.partition_rows.max(1) as u64;
    let needed_groups: BTreeSet<u64> = chunk
        .iter()
        .flat_map(|way| way.refs.iter().map(|node_ref| node_ref / partition))
        .collect();

    let mut coordinates = HashMap::new();
    for node_group in needed_groups {
        for batch in env.store.read_group(datasets::NODES_RAW, node_group)? {
            for node in decode_nodes(&batch)? {
                coordinates.insert(node.id, (node.lon, node.lat));
            }
        }
    }
    Ok(coordinates)
}

/// Build the feature row for a way, if it passes every filter.
fn build_feature(
    env: &PipelineEnv,
    way: &WayRecord,
    linestring: LineString<f64>,
) -> AnserResult<Option<FeatureRow>> {
    let closed_refs = way.is_closed();
    let closed_coords =
        linestring.0.len() >= 4 && linestring.0.first() == linestring.0.last();

    let geometry = if closed_refs && closed_coords && env.polygon_config.is_polygon(&way.tags) {
        Geometry::Polygon(Polygon::new(linestring, vec![]))
    } else {
        Geometry::LineString(linestring)
    };

    let Some(geometry) = repair_geometry(geometry) else {
        env.counters
            .dropped_empty_geometries
            .fetch_add(1, Ordering::Relaxed);
        return Ok(None);
    };

    if let Some(clip) = &env.geometry_filter {
        if !clip.intersects(&geometry) {
            return Ok(None);
        }
    }

    let tags = env.effective_tags(&way.tags);
    if tags.is_empty() || !env.tags_pass(&tags) {
        return Ok(None);
    }

    let id = feature_id(FeatureKind::Way, way.id);
    if !env.id_allowed(&id) {
        return Ok(None);
    }

    Ok(Some(FeatureRow {
        feature_id: id,
        geometry: to_wkb(&geometry)?,
        tags,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columnar::{decode_features, encode_nodes, encode_ways};
    use crate::scheduler::GroupScheduler;
    use crate::store::ShardStore;
    use anser_core::tags::tag_map;
    use anser_core::NodeRecord;
    use anser_geometry::from_wkb;
    use common_progress::SilentProgress;

    fn unit_square_nodes() -> Vec<NodeRecord> {
        [
            (1u64, 0.0, 0.0),
            (2, 1.0, 0.0),
            (3, 1.0, 1.0),
            (4, 0.0, 1.0),
        ]
        .into_iter()
        .map(|(id, lon, lat)| NodeRecord {
            id,
            lon,
            lat,
            tags: Default::default(),
        })
        .collect()
    }

    fn env_for(dir: &std::path::Path) -> Arc<PipelineEnv> {
        Arc::new(PipelineEnv {
            store: Arc::new(ShardStore::new(dir.join("shards")).unwrap()),
            tags_filter: None,
            geometry_filter: None,
            polygon_config: Default::default(),
            filter_osm_ids: None,
            ignore_metadata_tags: true,
            partition_rows: 100_000,
            scheduler: Arc::new(GroupScheduler::new(100_000)),
            counters: Default::default(),
            cancel: Default::default(),
            progress: Arc::new(SilentProgress),
        })
    }

    fn run_stage(env: &Arc<PipelineEnv>) {
        common_runtime::block_on(run(Arc::clone(env)))
            .unwrap()
            .unwrap();
    }

    fn feature_rows(env: &PipelineEnv) -> Vec<FeatureRow> {
        let mut rows = Vec::new();
        for group in env.store.groups(datasets::FEATURE_WAYS).unwrap() {
            for batch in env.store.read_group(datasets::FEATURE_WAYS, group).unwrap() {
                rows.extend(decode_features(&batch).unwrap());
            }
        }
        rows
    }

    #[test]
    fn test_closed_building_becomes_polygon() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_for(dir.path());
        env.store
            .write_part(datasets::NODES_RAW, 0, &encode_nodes(&unit_square_nodes()).unwrap())
            .unwrap();
        env.store
            .write_part(
                datasets::WAYS_RAW,
                0,
                &encode_ways(&[WayRecord {
                    id: 10,
                    refs: vec![1, 2, 3, 4, 1],
                    tags: tag_map([("building", "yes")]),
                }])
                .unwrap(),
            )
            .unwrap();

        run_stage(&env);

        let rows = feature_rows(&env);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].feature_id, "way/10");
        let geometry = from_wkb(&rows[0].geometry).unwrap();
        assert!(matches!(geometry, Geometry::Polygon(_)));
    }

    #[test]
    fn test_closed_highway_stays_linestring() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_for(dir.path());
        env.store
            .write_part(datasets::NODES_RAW, 0, &encode_nodes(&unit_square_nodes()).unwrap())
            .unwrap();
        env.store
            .write_part(
                datasets::WAYS_RAW,
                0,
                &encode_ways(&[WayRecord {
                    id: 11,
                    refs: vec![1, 2, 3, 4, 1],
                    tags: tag_map([("highway", "residential")]),
                }])
                .unwrap(),
            )
            .unwrap();

        run_stage(&env);

        let rows = feature_rows(&env);
        assert_eq!(rows.len(), 1);
        let geometry = from_wkb(&rows[0].geometry).unwrap();
        assert!(matches!(geometry, Geometry::LineString(_)));
    }

    #[test]
    fn test_unresolved_ref_counts_and_drops() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_for(dir.path());
        env.store
            .write_part(datasets::NODES_RAW, 0, &encode_nodes(&unit_square_nodes()).unwrap())
            .unwrap();
        env.store
            .write_part(
                datasets::WAYS_RAW,
                0,
                &encode_ways(&[WayRecord {
                    id: 12,
                    refs: vec![1, 2, 999],
                    tags: tag_map([("highway", "path")]),
                }])
                .unwrap(),
            )
            .unwrap();

        run_stage(&env);

        assert!(feature_rows(&env).is_empty());
        assert_eq!(env.counters.snapshot().unresolved_way_refs, 1);
        // Not in the linestring lookup either.
        assert!(env
            .store
            .groups(datasets::WAY_LINESTRINGS)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_untagged_way_feeds_lookup_only() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_for(dir.path());
        env.store
            .write_part(datasets::NODES_RAW, 0, &encode_nodes(&unit_square_nodes()).unwrap())
            .unwrap();
        env.store
            .write_part(
                datasets::WAYS_RAW,
                0,
                &encode_ways(&[WayRecord {
                    id: 13,
                    refs: vec![1, 2, 3],
                    tags: Default::default(),
                }])
                .unwrap(),
            )
            .unwrap();

        run_stage(&env);

        assert!(feature_rows(&env).is_empty());
        assert_eq!(env.store.groups(datasets::WAY_LINESTRINGS).unwrap(), vec![0]);
    }
}
