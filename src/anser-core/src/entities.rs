//! OSM entity records as delivered by the PBF reader.

use crate::tags::TagMap;

/// A single OSM node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    /// OSM node id.
    pub id: u64,
    /// Longitude, WGS84 degrees.
    pub lon: f64,
    /// Latitude, WGS84 degrees.
    pub lat: f64,
    /// Tags, keys unique.
    pub tags: TagMap,
}

/// A single OSM way: an ordered sequence of node refs.
#[derive(Debug, Clone, PartialEq)]
pub struct WayRecord {
    /// OSM way id.
    pub id: u64,
    /// Ordered node references, length >= 2 for a usable way.
    pub refs: Vec<u64>,
    /// Tags, keys unique.
    pub tags: TagMap,
}

impl WayRecord {
    /// A way is closed iff its first ref equals its last and it has at
    /// least 4 refs.
    pub fn is_closed(&self) -> bool {
        self.refs.len() >= 4 && self.refs.first() == self.refs.last()
    }
}

/// Kind of a relation member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    /// Member references a node.
    Node,
    /// Member references a way.
    Way,
    /// Member references another relation.
    Relation,
}

/// One member of a relation.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationMember {
    /// Member kind.
    pub kind: MemberKind,
    /// Referenced entity id.
    pub ref_id: u64,
    /// Role string; empty means unspecified.
    pub role: String,
}

/// A single OSM relation.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationRecord {
    /// OSM relation id.
    pub id: u64,
    /// Ordered member list.
    pub members: Vec<RelationMember>,
    /// Tags, keys unique.
    pub tags: TagMap,
}

impl RelationRecord {
    /// Whether this relation's `type` tag marks it as polygon-assembled
    /// (`multipolygon` or `boundary`).
    pub fn is_polygonal_type(&self) -> bool {
        matches!(
            self.tags.get("type").map(String::as_str),
            Some("multipolygon") | Some("boundary")
        )
    }

    /// Way members only, in order.
    pub fn way_members(&self) -> impl Iterator<Item = &RelationMember> {
        self.members.iter().filter(|m| m.kind == MemberKind::Way)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::tag_map;

    #[test]
    fn test_way_closed() {
        let closed = WayRecord {
            id: 1,
            refs: vec![1, 2, 3, 1],
            tags: TagMap::new(),
        };
        assert!(closed.is_closed());

        let open = WayRecord {
            id: 2,
            refs: vec![1, 2, 3, 4],
            tags: TagMap::new(),
        };
        assert!(!open.is_closed());

        // A ring needs at least 4 refs even when first == last.
        let degenerate = WayRecord {
            id: 3,
            refs: vec![1, 2, 1],
            tags: TagMap::new(),
        };
        assert!(!degenerate.is_closed());
    }

    #[test]
    fn test_relation_polygonal_type() {
        let multipolygon = RelationRecord {
            id: 1,
            members: vec![],
            tags: tag_map([("type", "multipolygon")]),
        };
        assert!(multipolygon.is_polygonal_type());

        let boundary = RelationRecord {
            id: 2,
            members: vec![],
            tags: tag_map([("type", "boundary")]),
        };
        assert!(boundary.is_polygonal_type());

        let route = RelationRecord {
            id: 3,
            members: vec![],
            tags: tag_map([("type", "route")]),
        };
        assert!(!route.is_polygonal_type());
    }
}
