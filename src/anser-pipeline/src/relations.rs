//! Relation stage: multipolygon/boundary relations -> feature-relation
//! shards.
//!
//! Members resolve against the way-linestring lookup; rings assemble with
//! the deterministic endpoint walk; inner rings classify into their outer
//! rings; the result is repaired and filtered like any other feature.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use common_error::AnserResult;
use geo_types::Geometry;

use anser_core::{feature_id, FeatureKind, RelationRecord};
use anser_geometry::repair::repair_geometry;
use anser_geometry::rings::{assemble_multipolygon, MemberLine};
use anser_geometry::{from_wkb, to_wkb};

use crate::columnar::{decode_linestrings, decode_relations, encode_features, FeatureRow};
use crate::context::PipelineEnv;
use crate::datasets;

/// Rough per-member working-set cost, in bytes.
const MEMBER_COST: usize = 256;

enum ChunkOutcome {
    Done,
    BudgetExceeded,
}

/// Run the relation stage: one task per raw relation group.
pub async fn run(env: Arc<PipelineEnv>) -> AnserResult<()> {
    let groups = env.store.groups(datasets::RELATIONS_RAW)?;
    env.progress
        .step_begin("Assembling relations", Some(groups.len() as u64));

    let mut tasks = common_runtime::JoinSet::new();
    for group in groups {
        let env = Arc::clone(&env);
        tasks.spawn(async move { process_group(&env, group) });
    }
    for result in tasks.join_all().await? {
        result?;
        env.progress.tick();
    }

    env.progress.step_end("Assembling relations");
    Ok(())
}

fn process_group(env: &PipelineEnv, group: u64) -> AnserResult<()> {
    env.cancel.checkpoint()?;

    let mut relations: Vec<RelationRecord> = Vec::new();
    for batch in env.store.read_group(datasets::RELATIONS_RAW, group)? {
        relations.extend(decode_relations(&batch)?);
    }

    let mut start = 0;
    while start < relations.len() {
        env.cancel.checkpoint()?;
        let size = env.scheduler.rows_per_group().min(relations.len() - start);
        let chunk = &relations[start..start + size];
        match process_chunk(env, group, chunk)? {
            ChunkOutcome::Done => start += size,
            ChunkOutcome::BudgetExceeded => {
                env.scheduler.downscale()?;
            }
        }
    }
    Ok(())
}

fn process_chunk(
    env: &PipelineEnv,
    group: u64,
    chunk: &[RelationRecord],
) -> AnserResult<ChunkOutcome> {
    let total_members: usize = chunk
        .iter()
        .map(|relation| relation.way_members().count())
        .sum();
    let Some(_reservation) = env.scheduler.try_reserve(total_members * MEMBER_COST) else {
        return Ok(ChunkOutcome::BudgetExceeded);
    };

    let linestrings = load_linestrings(env, chunk)?;

    let mut features: Vec<FeatureRow> = Vec::new();
    for relation in chunk {
        if let Some(feature) = build_feature(env, relation, &linestrings)? {
            features.push(feature);
        }
    }

    if !features.is_empty() {
        env.store.write_part(
            datasets::FEATURE_RELATIONS,
            group,
            &encode_features(&features)?,
        )?;
    }
    Ok(ChunkOutcome::Done)
}

/// Load the way-linestring lookup for every way group this chunk needs.
fn load_linestrings(
    env: &PipelineEnv,
    chunk: &[RelationRecord],
) -> AnserResult<HashMap<u64, Vec<u8>>> {
    let partition = env.partition_rows.max(1) as u64;
    let needed_groups: BTreeSet<u64> = chunk
        .iter()
        .flat_map(|relation| relation.way_members().map(|member| member.ref_id / partition))
        .collect();

    let mut linestrings = HashMap::new();
    for way_group in needed_groups {
        for batch in env.store.read_group(datasets::WAY_LINESTRINGS, way_group)? {
            for (id, wkb) in decode_linestrings(&batch)? {
                linestrings.insert(id, wkb);
            }
        }
    }
    Ok(linestrings)
}

fn build_feature(
    env: &PipelineEnv,
    relation: &RelationRecord,
    linestrings: &HashMap<u64, Vec<u8>>,
) -> AnserResult<Option<FeatureRow>> {
    // Resolve every way member; a single miss skips the whole relation.
    // Node and sub-relation members (admin_centre, label, subarea) carry no
    // ring geometry, and their ids live in a different id space than ways.
    let mut resolved: Vec<(u64, &str, Vec<geo_types::Coord<f64>>)> = Vec::new();
    for member in relation.way_members() {
        let Some(wkb) = linestrings.get(&member.ref_id) else {
            env.counters
                .unresolved_relation_members
                .fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };
        let Geometry::LineString(line) = from_wkb(wkb)? else {
            env.counters
                .unresolved_relation_members
                .fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };
        resolved.push((member.ref_id, member.role.as_str(), line.0));
    }

    // A missing role means outer; a relation with no outer member at all
    // treats every member as outer.
    let any_outer = resolved
        .iter()
        .any(|(_, role, _)| role.is_empty() || *role == "outer");
    let mut outers: Vec<MemberLine> = Vec::new();
    let mut inners: Vec<MemberLine> = Vec::new();
    for (way_id, role, coords) in resolved {
        let effective = if any_outer {
            if role.is_empty() {
                "outer"
            } else {
                role
            }
        } else {
            "outer"
        };
        match effective {
            "outer" => outers.push(MemberLine { way_id, coords }),
            "inner" => inners.push(MemberLine { way_id, coords }),
            _ => {}
        }
    }

    let assembly = assemble_multipolygon(&outers, &inners);
    env.counters
        .discarded_ring_fragments
        .fetch_add(assembly.discarded_fragments, Ordering::Relaxed);
    env.counters
        .orphan_inner_rings
        .fetch_add(assembly.orphan_inner_rings, Ordering::Relaxed);

    let Some(assembled) = assembly.geometry else {
        return Ok(None);
    };

    let Some(geometry) = repair_geometry(Geometry::MultiPolygon(assembled)) else {
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

    let tags = env.effective_tags(&relation.tags);
    if tags.is_empty() || !env.tags_pass(&tags) {
        return Ok(None);
    }

    let id = feature_id(FeatureKind::Relation, relation.id);
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
    use crate::columnar::{decode_features, encode_linestrings, encode_relations};
    use crate::scheduler::GroupScheduler;
    use crate::store::ShardStore;
    use anser_core::tags::tag_map;
    use anser_core::{MemberKind, RelationMember};
    use common_progress::SilentProgress;
    use geo::Winding;
    use geo_types::{line_string, LineString};

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

    fn line_wkb(line: LineString<f64>) -> Vec<u8> {
        to_wkb(&Geometry::LineString(line)).unwrap()
    }

    fn member(ref_id: u64, role: &str) -> RelationMember {
        RelationMember {
            kind: MemberKind::Way,
            ref_id,
            role: role.to_string(),
        }
    }

    fn non_way_member(kind: MemberKind, ref_id: u64, role: &str) -> RelationMember {
        RelationMember {
            kind,
            ref_id,
            role: role.to_string(),
        }
    }

    fn run_stage(env: &Arc<PipelineEnv>) {
        common_runtime::block_on(run(Arc::clone(env)))
            .unwrap()
            .unwrap();
    }

    fn feature_rows(env: &PipelineEnv) -> Vec<FeatureRow> {
        let mut rows = Vec::new();
        for group in env.store.groups(datasets::FEATURE_RELATIONS).unwrap() {
            for batch in env
                .store
                .read_group(datasets::FEATURE_RELATIONS, group)
                .unwrap()
            {
                rows.extend(decode_features(&batch).unwrap());
            }
        }
        rows
    }

    #[test]
    fn test_multipolygon_with_hole() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_for(dir.path());

        let outer = line_wkb(line_string![
            (x: 0.0, y: 0.0),
            (x: 10.0, y: 0.0),
            (x: 10.0, y: 10.0),
            (x: 0.0, y: 10.0),
            (x: 0.0, y: 0.0),
        ]);
        let inner = line_wkb(line_string![
            (x: 2.0, y: 2.0),
            (x: 4.0, y: 2.0),
            (x: 4.0, y: 4.0),
            (x: 2.0, y: 4.0),
            (x: 2.0, y: 2.0),
        ]);
        env.store
            .write_part(
                datasets::WAY_LINESTRINGS,
                0,
                &encode_linestrings(&[(10, outer), (11, inner)]).unwrap(),
            )
            .unwrap();
        env.store
            .write_part(
                datasets::RELATIONS_RAW,
                0,
                &encode_relations(&[RelationRecord {
                    id: 100,
                    members: vec![member(10, "outer"), member(11, "inner")],
                    tags: tag_map([("type", "multipolygon"), ("landuse", "forest")]),
                }])
                .unwrap(),
            )
            .unwrap();

        run_stage(&env);

        let rows = feature_rows(&env);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].feature_id, "relation/100");
        assert_eq!(
            rows[0].tags,
            tag_map([("type", "multipolygon"), ("landuse", "forest")])
        );

        let Geometry::Polygon(polygon) = from_wkb(&rows[0].geometry).unwrap() else {
            panic!("expected a polygon");
        };
        assert_eq!(polygon.interiors().len(), 1);
        assert!(polygon.exterior().is_ccw());
        assert!(polygon.interiors()[0].is_cw());
    }

    #[test]
    fn test_unresolved_member_skips_relation() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_for(dir.path());

        env.store
            .write_part(
                datasets::RELATIONS_RAW,
                0,
                &encode_relations(&[RelationRecord {
                    id: 101,
                    members: vec![member(999, "outer")],
                    tags: tag_map([("type", "multipolygon")]),
                }])
                .unwrap(),
            )
            .unwrap();

        run_stage(&env);

        assert!(feature_rows(&env).is_empty());
        assert_eq!(env.counters.snapshot().unresolved_relation_members, 1);
    }

    #[test]
    fn test_non_way_members_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_for(dir.path());

        let square = line_wkb(line_string![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 0.0, y: 1.0),
            (x: 0.0, y: 0.0),
        ]);
        // An open stray segment whose way id collides with the node
        // member's ref below. Resolving the node member against it would
        // break ring closure.
        let stray = line_wkb(line_string![
            (x: 50.0, y: 50.0),
            (x: 60.0, y: 60.0),
        ]);
        let linestrings: HashMap<u64, Vec<u8>> =
            [(10u64, square), (40u64, stray)].into_iter().collect();

        let relation = RelationRecord {
            id: 104,
            members: vec![
                non_way_member(MemberKind::Node, 40, "admin_centre"),
                member(10, "outer"),
                non_way_member(MemberKind::Relation, 999, "subarea"),
            ],
            tags: tag_map([("type", "boundary"), ("boundary", "administrative")]),
        };

        let feature = build_feature(&env, &relation, &linestrings)
            .unwrap()
            .expect("relation assembles from its way members alone");

        assert_eq!(feature.feature_id, "relation/104");
        let Geometry::Polygon(polygon) = from_wkb(&feature.geometry).unwrap() else {
            panic!("expected a polygon");
        };
        assert!(polygon.interiors().is_empty());

        let snapshot = env.counters.snapshot();
        assert_eq!(snapshot.unresolved_relation_members, 0);
        assert_eq!(snapshot.discarded_ring_fragments, 0);
    }

    #[test]
    fn test_missing_roles_default_to_outer() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_for(dir.path());

        let square = line_wkb(line_string![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 0.0, y: 1.0),
            (x: 0.0, y: 0.0),
        ]);
        env.store
            .write_part(
                datasets::WAY_LINESTRINGS,
                0,
                &encode_linestrings(&[(10, square)]).unwrap(),
            )
            .unwrap();
        env.store
            .write_part(
                datasets::RELATIONS_RAW,
                0,
                &encode_relations(&[RelationRecord {
                    id: 102,
                    members: vec![member(10, "")],
                    tags: tag_map([("type", "boundary"), ("boundary", "administrative")]),
                }])
                .unwrap(),
            )
            .unwrap();

        run_stage(&env);

        let rows = feature_rows(&env);
        assert_eq!(rows.len(), 1);
        assert!(matches!(
            from_wkb(&rows[0].geometry).unwrap(),
            Geometry::Polygon(_)
        ));
    }

    #[test]
    fn test_two_outer_rings_make_multipolygon() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_for(dir.path());

        let a = line_wkb(line_string![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 0.0, y: 1.0),
            (x: 0.0, y: 0.0),
        ]);
        let b = line_wkb(line_string![
            (x: 5.0, y: 5.0),
            (x: 6.0, y: 5.0),
            (x: 6.0, y: 6.0),
            (x: 5.0, y: 6.0),
            (x: 5.0, y: 5.0),
        ]);
        env.store
            .write_part(
                datasets::WAY_LINESTRINGS,
                0,
                &encode_linestrings(&[(20, a), (21, b)]).unwrap(),
            )
            .unwrap();
        env.store
            .write_part(
                datasets::RELATIONS_RAW,
                0,
                &encode_relations(&[RelationRecord {
                    id: 103,
                    members: vec![member(20, "outer"), member(21, "outer")],
                    tags: tag_map([("type", "multipolygon"), ("natural", "water")]),
                }])
                .unwrap(),
            )
            .unwrap();

        run_stage(&env);

        let rows = feature_rows(&env);
        assert_eq!(rows.len(), 1);
        assert!(matches!(
            from_wkb(&rows[0].geometry).unwrap(),
            Geometry::MultiPolygon(_)
        ));
    }
}
