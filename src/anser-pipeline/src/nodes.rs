//! Node stage: raw nodes -> feature-node shards.
//!
//! The raw node shards double as the coordinate lookup for the way stage,
//! so this stage only emits the tag-passing, geometry-passing features.

use std::sync::Arc;

use common_error::AnserResult;
use geo_types::{Geometry, Point};

use anser_core::{feature_id, FeatureKind};
use anser_geometry::to_wkb;

use crate::columnar::{decode_nodes, encode_features, FeatureRow};
use crate::context::PipelineEnv;
use crate::{datasets, round7};

/// Run the node stage: one task per raw node group.
pub async fn run(env: Arc<PipelineEnv>) -> AnserResult<()> {
    let groups = env.store.groups(datasets::NODES_RAW)?;
    env.progress
        .step_begin("Filtering nodes", Some(groups.len() as u64));

    let mut tasks = common_runtime::JoinSet::new();
    for group in groups {
        let env = Arc::clone(&env);
        tasks.spawn(async move { process_group(&env, group) });
    }
    for result in tasks.join_all().await? {
        result?;
        env.progress.tick();
    }

    env.progress.step_end("Filtering nodes");
    Ok(())
}

fn process_group(env: &PipelineEnv, group: u64) -> AnserResult<()> {
    env.cancel.checkpoint()?;

    let mut features: Vec<FeatureRow> = Vec::new();
    for batch in env.store.read_group(datasets::NODES_RAW, group)? {
        for node in decode_nodes(&batch)? {
            if let Some(clip) = &env.geometry_filter {
                if !clip.contains_point(node.lon, node.lat) {
                    continue;
                }
            }

            let tags = env.effective_tags(&node.tags);
            if tags.is_empty() || !env.tags_pass(&tags) {
                continue;
            }

            let id = feature_id(FeatureKind::Node, node.id);
            if !env.id_allowed(&id) {
                continue;
            }

            let point = Geometry::Point(Point::new(round7(node.lon), round7(node.lat)));
            features.push(FeatureRow {
                feature_id: id,
                geometry: to_wkb(&point)?,
                tags,
            });
        }
    }

    if !features.is_empty() {
        env.store
            .write_part(datasets::FEATURE_NODES, group, &encode_features(&features)?)?;
    }
    Ok(())
}
