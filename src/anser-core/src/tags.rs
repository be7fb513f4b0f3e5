//! Tag maps and metadata-tag stripping.

use std::collections::BTreeMap;

/// Canonical tag mapping: keys unique and lexicographically ordered.
pub type TagMap = BTreeMap<String, String>;

/// Tags commonly ignored by OSM consumers (GDAL default config).
///
/// `area` appears here because it is an editing hint, not a feature
/// attribute; the way-polygon policy still reads it from the *raw* tag set.
pub const METADATA_TAGS: &[&str] = &[
    "area",
    "created_by",
    "converted_by",
    "source",
    "time",
    "ele",
    "note",
    "todo",
    "fixme",
    "FIXME",
];

/// Prefix of the openGeoDB import tags, all of which are metadata.
pub const METADATA_TAG_PREFIX: &str = "openGeoDB:";

/// Return a copy of `tags` with metadata tags removed.
pub fn strip_metadata_tags(tags: &TagMap) -> TagMap {
    tags.iter()
        .filter(|(key, _)| !is_metadata_tag(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Whether a single key is a metadata tag.
pub fn is_metadata_tag(key: &str) -> bool {
    METADATA_TAGS.contains(&key) || key.starts_with(METADATA_TAG_PREFIX)
}

/// Build a `TagMap` from string pairs. Test and fixture helper.
pub fn tag_map<K: Into<String>, V: Into<String>>(pairs: impl IntoIterator<Item = (K, V)>) -> TagMap {
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_metadata_tags() {
        let tags = tag_map([
            ("building", "yes"),
            ("created_by", "JOSM"),
            ("source", "survey"),
            ("openGeoDB:loc_id", "123"),
            ("name", "Town hall"),
        ]);
        let stripped = strip_metadata_tags(&tags);
        assert_eq!(stripped, tag_map([("building", "yes"), ("name", "Town hall")]));
    }

    #[test]
    fn test_area_is_metadata_but_fixme_case_sensitive() {
        assert!(is_metadata_tag("area"));
        assert!(is_metadata_tag("fixme"));
        assert!(is_metadata_tag("FIXME"));
        assert!(!is_metadata_tag("FixMe"));
        assert!(!is_metadata_tag("building"));
    }
}
