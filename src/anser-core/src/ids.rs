//! Feature identifiers.
//!
//! Output rows are keyed by `<kind>/<id>` strings (`node/1`, `way/10`,
//! `relation/100`), globally unique because the id carries its kind.

/// The three OSM entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FeatureKind {
    /// An OSM node.
    Node,
    /// An OSM way.
    Way,
    /// An OSM relation.
    Relation,
}

impl FeatureKind {
    /// Feature id prefix for this kind.
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Way => "way",
            Self::Relation => "relation",
        }
    }
}

impl std::fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Format a feature id string.
pub fn feature_id(kind: FeatureKind, id: u64) -> String {
    format!("{}/{id}", kind.prefix())
}

/// Parse a feature id string back into its kind and numeric id.
pub fn parse_feature_id(feature_id: &str) -> Option<(FeatureKind, u64)> {
    let (prefix, id) = feature_id.split_once('/')?;
    let kind = match prefix {
        "node" => FeatureKind::Node,
        "way" => FeatureKind::Way,
        "relation" => FeatureKind::Relation,
        _ => return None,
    };
    Some((kind, id.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_id_round_trip() {
        for (kind, id) in [
            (FeatureKind::Node, 1),
            (FeatureKind::Way, 10),
            (FeatureKind::Relation, 100),
        ] {
            let formatted = feature_id(kind, id);
            assert_eq!(parse_feature_id(&formatted), Some((kind, id)));
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_feature_id("node"), None);
        assert_eq!(parse_feature_id("street/5"), None);
        assert_eq!(parse_feature_id("way/abc"), None);
    }
}
