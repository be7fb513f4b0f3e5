//! Closed-way polygon classification policy.
//!
//! A closed way becomes a polygon iff its tags say so; geometry shape is
//! never consulted. The policy document has three parts: `all` keys where
//! any value implies an area, an `allowlist` of key -> accepted values and
//! a `denylist` of key -> rejected values. An explicit `area=yes` /
//! `area=no` tag overrides everything. Keys are case-sensitive.

use std::collections::{BTreeMap, BTreeSet};

use common_error::{AnserError, AnserResult};
use serde::Deserialize;

use crate::tags::TagMap;

/// Default policy document, derived from the community polygon-features
/// tables used by OSM editors and renderers.
const DEFAULT_CONFIG_JSON: &str = include_str!("polygon_features.json");

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    all: Vec<String>,
    #[serde(default)]
    allowlist: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    denylist: BTreeMap<String, Vec<String>>,
}

/// Deterministic closed-way polygon policy.
#[derive(Debug, Clone)]
pub struct WayPolygonConfig {
    all: BTreeSet<String>,
    allowlist: BTreeMap<String, BTreeSet<String>>,
    denylist: BTreeMap<String, BTreeSet<String>>,
}

impl WayPolygonConfig {
    /// Load a policy from its JSON document.
    pub fn from_json_str(text: &str) -> AnserResult<Self> {
        let raw: RawConfig = serde_json::from_str(text)
            .map_err(|e| AnserError::invalid_input(format!("invalid polygon config: {e}")))?;
        Ok(Self {
            all: raw.all.into_iter().collect(),
            allowlist: raw
                .allowlist
                .into_iter()
                .map(|(key, values)| (key, values.into_iter().collect()))
                .collect(),
            denylist: raw
                .denylist
                .into_iter()
                .map(|(key, values)| (key, values.into_iter().collect()))
                .collect(),
        })
    }

    /// The built-in default policy.
    pub fn default_features() -> Self {
        Self::from_json_str(DEFAULT_CONFIG_JSON).expect("embedded polygon config is valid")
    }

    /// Decide whether a *closed* way with these raw tags is an area.
    ///
    /// The caller is responsible for the closure and vertex-count checks;
    /// this only answers the tag question. Untagged ways are never areas.
    pub fn is_polygon(&self, raw_tags: &TagMap) -> bool {
        if raw_tags.is_empty() {
            return false;
        }

        match raw_tags.get("area").map(String::as_str) {
            Some("no") => return false,
            Some("yes") => return true,
            _ => {}
        }

        for (key, value) in raw_tags {
            if self.all.contains(key) {
                return true;
            }
            if let Some(accepted) = self.allowlist.get(key) {
                if accepted.contains(value) {
                    return true;
                }
            }
            if let Some(rejected) = self.denylist.get(key) {
                if !rejected.contains(value) {
                    return true;
                }
            }
        }

        false
    }
}

impl Default for WayPolygonConfig {
    fn default() -> Self {
        Self::default_features()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::tag_map;

    #[test]
    fn test_building_is_polygon() {
        let config = WayPolygonConfig::default_features();
        assert!(config.is_polygon(&tag_map([("building", "yes")])));
        assert!(config.is_polygon(&tag_map([("landuse", "forest")])));
    }

    #[test]
    fn test_highway_stays_linestring() {
        // A closed residential way is not an area.
        let config = WayPolygonConfig::default_features();
        assert!(!config.is_polygon(&tag_map([("highway", "residential")])));
    }

    #[test]
    fn test_area_overrides() {
        let config = WayPolygonConfig::default_features();
        assert!(config.is_polygon(&tag_map([("highway", "pedestrian"), ("area", "yes")])));
        assert!(!config.is_polygon(&tag_map([("building", "yes"), ("area", "no")])));
    }

    #[test]
    fn test_allowlist_values() {
        let config = WayPolygonConfig::default_features();
        assert!(config.is_polygon(&tag_map([("highway", "services")])));
        assert!(!config.is_polygon(&tag_map([("highway", "primary")])));
        assert!(config.is_polygon(&tag_map([("waterway", "riverbank")])));
        assert!(!config.is_polygon(&tag_map([("waterway", "river")])));
    }

    #[test]
    fn test_denylist_values() {
        let config = WayPolygonConfig::default_features();
        assert!(config.is_polygon(&tag_map([("natural", "water")])));
        assert!(!config.is_polygon(&tag_map([("natural", "coastline")])));
        assert!(!config.is_polygon(&tag_map([("leisure", "track")])));
        assert!(config.is_polygon(&tag_map([("leisure", "pitch")])));
    }

    #[test]
    fn test_untagged_never_polygon() {
        let config = WayPolygonConfig::default_features();
        assert!(!config.is_polygon(&TagMap::new()));
    }

    #[test]
    fn test_custom_config() {
        let config = WayPolygonConfig::from_json_str(r#"{"all": ["parking"]}"#).unwrap();
        assert!(config.is_polygon(&tag_map([("parking", "surface")])));
        assert!(!config.is_polygon(&tag_map([("building", "yes")])));
    }
}
