//! PBF input for anser.
//!
//! The pipeline consumes OSM data through the [`EntitySource`] contract:
//! three typed record streams (nodes, ways, relations), each id-ascending,
//! delivered into an [`EntitySink`]. The production implementation wraps
//! the `osmpbf` decoder; [`VecSource`] serves tests and fixtures.

use std::path::{Path, PathBuf};

use common_error::{AnserError, AnserResult};

use anser_core::{MemberKind, NodeRecord, RelationMember, RelationRecord, WayRecord};

/// Receiver for decoded entity records.
pub trait EntitySink {
    /// Deliver one node.
    fn node(&mut self, node: NodeRecord) -> AnserResult<()>;
    /// Deliver one way.
    fn way(&mut self, way: WayRecord) -> AnserResult<()>;
    /// Deliver one relation.
    fn relation(&mut self, relation: RelationRecord) -> AnserResult<()>;
}

/// A source of OSM entity records.
///
/// Implementations must deliver each entity kind in ascending id order; no
/// ordering is required between kinds.
pub trait EntitySource {
    /// Stream every record into the sink.
    fn read(&mut self, sink: &mut dyn EntitySink) -> AnserResult<()>;
}

/// `osmpbf`-backed source reading a local `.osm.pbf` file.
pub struct PbfSource {
    path: PathBuf,
}

impl PbfSource {
    /// Open a PBF file path. The file is validated lazily on `read`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The underlying file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EntitySource for PbfSource {
    fn read(&mut self, sink: &mut dyn EntitySink) -> AnserResult<()> {
        use osmpbf::{Element, ElementReader};

        let reader = ElementReader::from_path(&self.path)
            .map_err(|e| AnserError::invalid_input(format!("cannot open pbf: {e}")))?;

        let mut sink_error: Option<AnserError> = None;
        let mut negative_ids: u64 = 0;

        reader
            .for_each(|element| {
                if sink_error.is_some() {
                    return;
                }
                let result = match element {
                    Element::Node(node) => match u64::try_from(node.id()) {
                        Ok(id) => sink.node(NodeRecord {
                            id,
                            lon: node.lon(),
                            lat: node.lat(),
                            tags: node
                                .tags()
                                .map(|(k, v)| (k.to_string(), v.to_string()))
                                .collect(),
                        }),
                        Err(_) => {
                            negative_ids += 1;
                            Ok(())
                        }
                    },
                    Element::DenseNode(node) => match u64::try_from(node.id()) {
                        Ok(id) => sink.node(NodeRecord {
                            id,
                            lon: node.lon(),
                            lat: node.lat(),
                            tags: node
                                .tags()
                                .map(|(k, v)| (k.to_string(), v.to_string()))
                                .collect(),
                        }),
                        Err(_) => {
                            negative_ids += 1;
                            Ok(())
                        }
                    },
                    Element::Way(way) => match u64::try_from(way.id()) {
                        Ok(id) => sink.way(WayRecord {
                            id,
                            refs: way
                                .refs()
                                .filter_map(|r| u64::try_from(r).ok())
                                .collect(),
                            tags: way
                                .tags()
                                .map(|(k, v)| (k.to_string(), v.to_string()))
                                .collect(),
                        }),
                        Err(_) => {
                            negative_ids += 1;
                            Ok(())
                        }
                    },
                    Element::Relation(relation) => match u64::try_from(relation.id()) {
                        Ok(id) => {
                            let members = relation
                                .members()
                                .filter_map(|member| {
                                    let ref_id = u64::try_from(member.member_id).ok()?;
                                    let kind = match member.member_type {
                                        osmpbf::RelMemberType::Node => MemberKind::Node,
                                        osmpbf::RelMemberType::Way => MemberKind::Way,
                                        osmpbf::RelMemberType::Relation => MemberKind::Relation,
                                    };
                                    let role = member.role().unwrap_or_default().to_string();
                                    Some(RelationMember { kind, ref_id, role })
                                })
                                .collect();
                            sink.relation(RelationRecord {
                                id,
                                members,
                                tags: relation
                                    .tags()
                                    .map(|(k, v)| (k.to_string(), v.to_string()))
                                    .collect(),
                            })
                        }
                        Err(_) => {
                            negative_ids += 1;
                            Ok(())
                        }
                    },
                };
                if let Err(error) = result {
                    sink_error = Some(error);
                }
            })
            .map_err(|e| AnserError::invalid_input(format!("pbf decode failed: {e}")))?;

        if negative_ids > 0 {
            tracing::warn!(count = negative_ids, "skipped entities with negative ids");
        }

        match sink_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// In-memory source for tests and synthetic inputs.
#[derive(Debug, Default, Clone)]
pub struct VecSource {
    /// Nodes, id-ascending.
    pub nodes: Vec<NodeRecord>,
    /// Ways, id-ascending.
    pub ways: Vec<WayRecord>,
    /// Relations, id-ascending.
    pub relations: Vec<RelationRecord>,
}

impl VecSource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }
}

impl EntitySource for VecSource {
    fn read(&mut self, sink: &mut dyn EntitySink) -> AnserResult<()> {
        for node in &self.nodes {
            sink.node(node.clone())?;
        }
        for way in &self.ways {
            sink.way(way.clone())?;
        }
        for relation in &self.relations {
            sink.relation(relation.clone())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anser_core::tags::tag_map;

    #[derive(Default)]
    struct CountingSink {
        nodes: usize,
        ways: usize,
        relations: usize,
    }

    impl EntitySink for CountingSink {
        fn node(&mut self, _node: NodeRecord) -> AnserResult<()> {
            self.nodes += 1;
            Ok(())
        }

        fn way(&mut self, _way: WayRecord) -> AnserResult<()> {
            self.ways += 1;
            Ok(())
        }

        fn relation(&mut self, _relation: RelationRecord) -> AnserResult<()> {
            self.relations += 1;
            Ok(())
        }
    }

    #[test]
    fn test_vec_source_delivers_everything() {
        let mut source = VecSource {
            nodes: vec![NodeRecord {
                id: 1,
                lon: 7.42245,
                lat: 43.73105,
                tags: tag_map([("shop", "bakery")]),
            }],
            ways: vec![WayRecord {
                id: 10,
                refs: vec![1, 2, 3, 4, 1],
                tags: tag_map([("building", "yes")]),
            }],
            relations: vec![],
        };
        let mut sink = CountingSink::default();
        source.read(&mut sink).unwrap();
        assert_eq!((sink.nodes, sink.ways, sink.relations), (1, 1, 0));
    }

    #[test]
    fn test_sink_error_propagates() {
        struct FailingSink;
        impl EntitySink for FailingSink {
            fn node(&mut self, _: NodeRecord) -> AnserResult<()> {
                Err(AnserError::runtime("sink failed"))
            }
            fn way(&mut self, _: WayRecord) -> AnserResult<()> {
                Ok(())
            }
            fn relation(&mut self, _: RelationRecord) -> AnserResult<()> {
                Ok(())
            }
        }

        let mut source = VecSource {
            nodes: vec![NodeRecord {
                id: 1,
                lon: 0.0,
                lat: 0.0,
                tags: Default::default(),
            }],
            ..Default::default()
        };
        assert!(source.read(&mut FailingSink).is_err());
    }

    #[test]
    fn test_missing_pbf_file_is_invalid_input() {
        let mut source = PbfSource::new("/nonexistent/file.osm.pbf");
        let err = source.read(&mut CountingSink::default()).unwrap_err();
        assert!(matches!(err, AnserError::InvalidInput(_)));
    }
}
