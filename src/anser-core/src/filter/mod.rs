//! OSM tag filters.
//!
//! A filter maps tag keys to value specs; a grouped filter additionally
//! buckets specs under named groups and labels matching features with the
//! group. The surface syntax is a JSON document:
//!
//! ```json
//! { "building": true, "shop": ["bakery", "bicycle"], "name": false }
//! ```
//!
//! ```json
//! { "greenery": { "leisure": "park", "landuse": "grass" } }
//! ```
//!
//! Keys and string values may carry `*` wildcards. Compilation (see
//! [`CompiledTagsFilter`]) expands key wildcards against the observed key
//! universe, rejects contradictory filters and produces a pure predicate
//! plus a projection set.

mod compile;
mod pattern;

pub use compile::{CompiledTagsFilter, Projection};
pub use pattern::Pattern;

use std::collections::BTreeMap;

use common_error::{AnserError, AnserResult};
use serde_json::Value;

/// Value spec attached to one tag key.
#[derive(Debug, Clone, PartialEq)]
pub enum TagSpec {
    /// Key must be present, any value.
    Present,
    /// Key must be absent.
    Absent,
    /// Key must carry exactly this value.
    Equals(String),
    /// Key must carry one of these values; entries may contain `*`.
    AnyOf(Vec<String>),
    /// Key must carry a value matching this wildcard pattern.
    Wildcard(Pattern),
}

impl TagSpec {
    /// Whether this spec is positive (everything except `Absent`).
    pub fn is_positive(&self) -> bool {
        !matches!(self, Self::Absent)
    }

    fn from_json(value: &Value) -> AnserResult<Self> {
        match value {
            Value::Bool(true) => Ok(Self::Present),
            Value::Bool(false) => Ok(Self::Absent),
            Value::String(s) if s.contains('*') => Ok(Self::Wildcard(Pattern::new(s))),
            Value::String(s) => Ok(Self::Equals(s.clone())),
            Value::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(s) => values.push(s.clone()),
                        other => {
                            return Err(AnserError::invalid_input(format!(
                                "tag filter list values must be strings, got {other}"
                            )))
                        }
                    }
                }
                Ok(Self::AnyOf(values))
            }
            other => Err(AnserError::invalid_input(format!(
                "tag filter values must be bool, string or list, got {other}"
            ))),
        }
    }
}

/// A tag filter: flat, or grouped under labels.
#[derive(Debug, Clone, PartialEq)]
pub enum TagsFilter {
    /// Plain key -> spec mapping.
    Flat(BTreeMap<String, TagSpec>),
    /// Group name -> (key -> spec) mapping.
    Grouped(BTreeMap<String, BTreeMap<String, TagSpec>>),
}

impl TagsFilter {
    /// Parse a filter from its JSON document.
    ///
    /// A JSON object whose values are all objects parses as a grouped
    /// filter; anything else parses as a flat filter.
    pub fn from_json(value: &Value) -> AnserResult<Self> {
        let object = value.as_object().ok_or_else(|| {
            AnserError::invalid_input("tag filter document must be a JSON object")
        })?;

        let grouped = !object.is_empty() && object.values().all(Value::is_object);
        if grouped {
            let mut groups = BTreeMap::new();
            for (group, inner) in object {
                let inner_object = inner.as_object().expect("checked is_object above");
                let mut specs = BTreeMap::new();
                for (key, spec) in inner_object {
                    specs.insert(key.clone(), TagSpec::from_json(spec)?);
                }
                groups.insert(group.clone(), specs);
            }
            Ok(Self::Grouped(groups))
        } else {
            let mut specs = BTreeMap::new();
            for (key, spec) in object {
                specs.insert(key.clone(), TagSpec::from_json(spec)?);
            }
            Ok(Self::Flat(specs))
        }
    }

    /// Parse a filter from a JSON string.
    pub fn from_json_str(text: &str) -> AnserResult<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_json(&value)
    }

    /// Whether any spec in the filter is positive.
    ///
    /// A purely negative filter keeps full tag sets in the output and never
    /// triggers the exploded default.
    pub fn has_positive(&self) -> bool {
        match self {
            Self::Flat(specs) => specs.values().any(TagSpec::is_positive),
            Self::Grouped(groups) => groups
                .values()
                .any(|specs| specs.values().any(TagSpec::is_positive)),
        }
    }

    /// Canonical JSON serialization used for cache hashing.
    pub fn canonical_json(&self) -> String {
        fn spec_json(spec: &TagSpec) -> Value {
            match spec {
                TagSpec::Present => Value::Bool(true),
                TagSpec::Absent => Value::Bool(false),
                TagSpec::Equals(v) => Value::String(v.clone()),
                TagSpec::AnyOf(vs) => {
                    Value::Array(vs.iter().cloned().map(Value::String).collect())
                }
                TagSpec::Wildcard(p) => Value::String(p.raw().to_string()),
            }
        }

        let value = match self {
            Self::Flat(specs) => Value::Object(
                specs
                    .iter()
                    .map(|(k, s)| (k.clone(), spec_json(s)))
                    .collect(),
            ),
            Self::Grouped(groups) => Value::Object(
                groups
                    .iter()
                    .map(|(g, specs)| {
                        (
                            g.clone(),
                            Value::Object(
                                specs
                                    .iter()
                                    .map(|(k, s)| (k.clone(), spec_json(s)))
                                    .collect(),
                            ),
                        )
                    })
                    .collect(),
            ),
        };
        value.to_string()
    }
}
