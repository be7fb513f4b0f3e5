//! Ingest pass: one scan of the input writes the three raw shard datasets
//! and captures the tag-key universe for wildcard expansion.

use std::collections::{BTreeSet, HashMap};

use common_error::AnserResult;
use common_progress::ProgressReporter;

use anser_core::{NodeRecord, RelationRecord, WayRecord};
use anser_pbf::{EntitySink, EntitySource};

use crate::columnar::{encode_nodes, encode_relations, encode_ways};
use crate::datasets;
use crate::store::ShardStore;

/// Rows buffered per group before a part file is flushed.
const FLUSH_ROWS: usize = 25_000;

/// What the ingest pass learned about the input.
#[derive(Debug, Default)]
pub struct IngestStats {
    /// Total nodes written.
    pub nodes: u64,
    /// Total ways written (>= 2 refs).
    pub ways: u64,
    /// Total polygonal-type relations written.
    pub relations: u64,
    /// Every tag key observed anywhere in the input.
    pub tag_universe: BTreeSet<String>,
}

struct IngestSink<'a> {
    store: &'a ShardStore,
    partition_rows: u64,
    stats: IngestStats,
    node_buffers: HashMap<u64, Vec<NodeRecord>>,
    way_buffers: HashMap<u64, Vec<WayRecord>>,
    relation_buffers: HashMap<u64, Vec<RelationRecord>>,
}

impl<'a> IngestSink<'a> {
    fn new(store: &'a ShardStore, partition_rows: usize) -> Self {
        Self {
            store,
            partition_rows: partition_rows.max(1) as u64,
            stats: IngestStats::default(),
            node_buffers: HashMap::new(),
            way_buffers: HashMap::new(),
            relation_buffers: HashMap::new(),
        }
    }

    fn group_of(&self, id: u64) -> u64 {
        id / self.partition_rows
    }

    fn observe_tags(&mut self, tags: &anser_core::TagMap) {
        for key in tags.keys() {
            if !self.stats.tag_universe.contains(key) {
                self.stats.tag_universe.insert(key.clone());
            }
        }
    }

    fn flush_nodes(&mut self, group: u64) -> AnserResult<()> {
        if let Some(buffer) = self.node_buffers.remove(&group) {
            if !buffer.is_empty() {
                self.store
                    .write_part(datasets::NODES_RAW, group, &encode_nodes(&buffer)?)?;
            }
        }
        Ok(())
    }

    fn flush_ways(&mut self, group: u64) -> AnserResult<()> {
        if let Some(buffer) = self.way_buffers.remove(&group) {
            if !buffer.is_empty() {
                self.store
                    .write_part(datasets::WAYS_RAW, group, &encode_ways(&buffer)?)?;
            }
        }
        Ok(())
    }

    fn flush_relations(&mut self, group: u64) -> AnserResult<()> {
        if let Some(buffer) = self.relation_buffers.remove(&group) {
            if !buffer.is_empty() {
                self.store
                    .write_part(datasets::RELATIONS_RAW, group, &encode_relations(&buffer)?)?;
            }
        }
        Ok(())
    }

    fn finish(mut self) -> AnserResult<IngestStats> {
        let node_groups: Vec<u64> = self.node_buffers.keys().copied().collect();
        for group in node_groups {
            self.flush_nodes(group)?;
        }
        let way_groups: Vec<u64> = self.way_buffers.keys().copied().collect();
        for group in way_groups {
            self.flush_ways(group)?;
        }
        let relation_groups: Vec<u64> = self.relation_buffers.keys().copied().collect();
        for group in relation_groups {
            self.flush_relations(group)?;
        }
        Ok(self.stats)
    }
}

impl EntitySink for IngestSink<'_> {
    fn node(&mut self, node: NodeRecord) -> AnserResult<()> {
        self.observe_tags(&node.tags);
        if !node.lon.is_finite() || !node.lat.is_finite() {
            return Ok(());
        }
        let group = self.group_of(node.id);
        self.stats.nodes += 1;
        let buffer = self.node_buffers.entry(group).or_default();
        buffer.push(node);
        if buffer.len() >= FLUSH_ROWS {
            self.flush_nodes(group)?;
        }
        Ok(())
    }

    fn way(&mut self, way: WayRecord) -> AnserResult<()> {
        self.observe_tags(&way.tags);
        if way.refs.len() < 2 {
            return Ok(());
        }
        let group = self.group_of(way.id);
        self.stats.ways += 1;
        let buffer = self.way_buffers.entry(group).or_default();
        buffer.push(way);
        if buffer.len() >= FLUSH_ROWS {
            self.flush_ways(group)?;
        }
        Ok(())
    }

    fn relation(&mut self, relation: RelationRecord) -> AnserResult<()> {
        self.observe_tags(&relation.tags);
        if !relation.is_polygonal_type() || relation.way_members().next().is_none() {
            return Ok(());
        }
        let group = self.group_of(relation.id);
        self.stats.relations += 1;
        let buffer = self.relation_buffers.entry(group).or_default();
        buffer.push(relation);
        if buffer.len() >= FLUSH_ROWS {
            self.flush_relations(group)?;
        }
        Ok(())
    }
}

/// Run the ingest pass.
pub fn ingest(
    source: &mut dyn EntitySource,
    store: &ShardStore,
    partition_rows: usize,
    progress: &dyn ProgressReporter,
) -> AnserResult<IngestStats> {
    progress.step_begin("Reading input", None);
    let mut sink = IngestSink::new(store, partition_rows);
    source.read(&mut sink)?;
    let stats = sink.finish()?;
    progress.step_end("Reading input");
    tracing::debug!(
        nodes = stats.nodes,
        ways = stats.ways,
        relations = stats.relations,
        tag_keys = stats.tag_universe.len(),
        "ingest finished"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anser_core::tags::tag_map;
    use anser_core::{MemberKind, RelationMember};
    use anser_pbf::VecSource;
    use common_progress::SilentProgress;

    fn sample_source() -> VecSource {
        VecSource {
            nodes: vec![
                NodeRecord {
                    id: 1,
                    lon: 0.0,
                    lat: 0.0,
                    tags: tag_map([("shop", "bakery")]),
                },
                NodeRecord {
                    id: 150_000,
                    lon: 1.0,
                    lat: 1.0,
                    tags: Default::default(),
                },
            ],
            ways: vec![
                WayRecord {
                    id: 10,
                    refs: vec![1, 2],
                    tags: tag_map([("highway", "residential")]),
                },
                WayRecord {
                    id: 11,
                    refs: vec![1],
                    tags: tag_map([("single", "ref")]),
                },
            ],
            relations: vec![
                RelationRecord {
                    id: 20,
                    members: vec![RelationMember {
                        kind: MemberKind::Way,
                        ref_id: 10,
                        role: "outer".to_string(),
                    }],
                    tags: tag_map([("type", "multipolygon"), ("landuse", "forest")]),
                },
                RelationRecord {
                    id: 21,
                    members: vec![RelationMember {
                        kind: MemberKind::Way,
                        ref_id: 10,
                        role: String::new(),
                    }],
                    tags: tag_map([("type", "route")]),
                },
            ],
        }
    }

    #[test]
    fn test_ingest_partitions_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        let store = ShardStore::new(dir.path().join("shards")).unwrap();
        let mut source = sample_source();

        let stats = ingest(&mut source, &store, 100_000, &SilentProgress).unwrap();

        assert_eq!(stats.nodes, 2);
        // The single-ref way is rejected.
        assert_eq!(stats.ways, 1);
        // The route relation is rejected.
        assert_eq!(stats.relations, 1);

        // Nodes land in id-range groups.
        assert_eq!(store.groups(datasets::NODES_RAW).unwrap(), vec![0, 1]);
        assert_eq!(store.groups(datasets::WAYS_RAW).unwrap(), vec![0]);
        assert_eq!(store.groups(datasets::RELATIONS_RAW).unwrap(), vec![0]);
    }

    #[test]
    fn test_universe_includes_rejected_entities() {
        let dir = tempfile::tempdir().unwrap();
        let store = ShardStore::new(dir.path().join("shards")).unwrap();
        let mut source = sample_source();

        let stats = ingest(&mut source, &store, 100_000, &SilentProgress).unwrap();

        // Keys from the rejected single-ref way and route relation are
        // still part of the wildcard-expansion universe.
        assert!(stats.tag_universe.contains("single"));
        assert!(stats.tag_universe.contains("type"));
        assert!(stats.tag_universe.contains("shop"));
    }
}
