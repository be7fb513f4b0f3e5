//! Tag filter compilation.
//!
//! Compilation turns a [`TagsFilter`] into a pure predicate over tag maps
//! plus a projection set. Key wildcards are expanded against the observed
//! key universe of the input (captured once during ingest); value wildcards
//! stay as patterns and match at predicate time.

use std::collections::BTreeSet;

use common_error::{AnserError, AnserResult};

use super::{Pattern, TagSpec, TagsFilter};
use crate::tags::TagMap;

/// Projection of the tag columns for exploded output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// One column per concrete tag key (flat filters).
    Keys(Vec<String>),
    /// One column per group name (grouped filters).
    Groups(Vec<String>),
}

impl Projection {
    /// Column names in output order.
    pub fn columns(&self) -> &[String] {
        match self {
            Self::Keys(keys) => keys,
            Self::Groups(groups) => groups,
        }
    }
}

/// Value-side matcher for one positive spec.
#[derive(Debug, Clone)]
enum ValueMatcher {
    /// Any value (key presence is enough).
    Any,
    /// Exact value equality.
    Exact(String),
    /// Any of the listed values; entries containing `*` match as patterns.
    OneOf(Vec<String>),
    /// Wildcard value pattern.
    Pattern(Pattern),
}

impl ValueMatcher {
    fn from_spec(spec: &TagSpec) -> Option<Self> {
        match spec {
            TagSpec::Present => Some(Self::Any),
            TagSpec::Absent => None,
            TagSpec::Equals(value) => Some(Self::Exact(value.clone())),
            TagSpec::AnyOf(values) => Some(Self::OneOf(values.clone())),
            TagSpec::Wildcard(pattern) => Some(Self::Pattern(pattern.clone())),
        }
    }

    fn matches(&self, value: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(expected) => value == expected,
            Self::OneOf(candidates) => candidates.iter().any(|candidate| {
                if candidate.contains('*') {
                    Pattern::new(candidate).matches(value)
                } else {
                    candidate == value
                }
            }),
            Self::Pattern(pattern) => pattern.matches(value),
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledGroup {
    name: String,
    positive: Vec<(String, ValueMatcher)>,
}

/// A compiled tag filter: a pure predicate plus a projection set.
#[derive(Debug, Clone)]
pub struct CompiledTagsFilter {
    /// Positive (concrete key, value matcher) pairs after expansion.
    positive: Vec<(String, ValueMatcher)>,
    /// Concrete keys that must be absent, after expansion.
    negative: Vec<String>,
    /// Group matchers for grouped filters, in group-name order.
    groups: Vec<CompiledGroup>,
    /// Projection columns for exploded output.
    projection: Projection,
}

impl CompiledTagsFilter {
    /// Compile a filter against the observed key universe.
    ///
    /// Fails with `FilterConflict` when the same concrete key ends up both
    /// positively and negatively claimed after expansion, including across
    /// groups of a grouped filter.
    pub fn compile(filter: &TagsFilter, universe: &BTreeSet<String>) -> AnserResult<Self> {
        let sources: Vec<(Option<&str>, &std::collections::BTreeMap<String, TagSpec>)> =
            match filter {
                TagsFilter::Flat(specs) => vec![(None, specs)],
                TagsFilter::Grouped(groups) => groups
                    .iter()
                    .map(|(name, specs)| (Some(name.as_str()), specs))
                    .collect(),
            };

        // Positive specs first; negative wildcard expansion must also see
        // the concrete positive keys so that e.g. `name:en: true` together
        // with `name:*: false` conflicts even when the input never carries
        // `name:en`.
        let mut positive: Vec<(String, ValueMatcher)> = Vec::new();
        let mut groups: Vec<CompiledGroup> = Vec::new();

        for (group_name, specs) in &sources {
            let mut group_positive: Vec<(String, ValueMatcher)> = Vec::new();
            for (key, spec) in specs.iter() {
                let Some(matcher) = ValueMatcher::from_spec(spec) else {
                    continue;
                };
                for concrete in expand_key(key, universe) {
                    positive.push((concrete.clone(), matcher.clone()));
                    group_positive.push((concrete, matcher.clone()));
                }
            }
            if let Some(name) = group_name {
                groups.push(CompiledGroup {
                    name: (*name).to_string(),
                    positive: group_positive,
                });
            }
        }

        let positive_keys: BTreeSet<String> =
            positive.iter().map(|(key, _)| key.clone()).collect();
        let mut negative_universe = universe.clone();
        negative_universe.extend(positive_keys.iter().cloned());

        let mut negative: Vec<String> = Vec::new();
        for (_, specs) in &sources {
            for (key, spec) in specs.iter() {
                if !matches!(spec, TagSpec::Absent) {
                    continue;
                }
                negative.extend(expand_key(key, &negative_universe));
            }
        }
        negative.sort();
        negative.dedup();

        for key in &negative {
            if positive_keys.contains(key) {
                return Err(AnserError::filter_conflict(format!(
                    "tag key {key:?} is claimed both positively and negatively \
                     after wildcard expansion"
                )));
            }
        }

        let projection = if groups.is_empty() {
            let mut keys: Vec<String> = positive_keys.into_iter().collect();
            keys.sort();
            Projection::Keys(keys)
        } else {
            Projection::Groups(groups.iter().map(|group| group.name.clone()).collect())
        };

        Ok(Self {
            positive,
            negative,
            groups,
            projection,
        })
    }

    /// Whether any positive spec survived expansion.
    ///
    /// With no surviving positive spec the positive disjunction is vacuous
    /// and only the negative conjunction constrains features.
    pub fn has_positive(&self) -> bool {
        !self.positive.is_empty()
    }

    /// Whether this is a grouped filter.
    pub fn is_grouped(&self) -> bool {
        !self.groups.is_empty()
    }

    /// The projection columns for exploded output.
    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    /// The compiled predicate: does a tag map pass the filter?
    pub fn matches(&self, tags: &TagMap) -> bool {
        let positive_ok = self.positive.is_empty()
            || self
                .positive
                .iter()
                .any(|(key, matcher)| tags.get(key).is_some_and(|value| matcher.matches(value)));

        let negative_ok = self.negative.iter().all(|key| !tags.contains_key(key));

        positive_ok && negative_ok
    }

    /// Exploded projection of a tag map: one cell per projection key, null
    /// when the key is absent or its value fails the matcher.
    pub fn project_exploded(&self, tags: &TagMap) -> Vec<Option<String>> {
        match &self.projection {
            Projection::Keys(keys) => keys
                .iter()
                .map(|key| {
                    let value = tags.get(key)?;
                    let matched = self
                        .positive
                        .iter()
                        .any(|(k, matcher)| k == key && matcher.matches(value));
                    matched.then(|| value.clone())
                })
                .collect(),
            Projection::Groups(_) => self
                .groups
                .iter()
                .map(|group| group_value(group, tags))
                .collect(),
        }
    }

    /// Compact projection of a tag map: only entries matched by a positive
    /// spec survive. For grouped filters the result maps group names to
    /// their first matching `key=value`.
    pub fn project_compact(&self, tags: &TagMap) -> TagMap {
        if self.groups.is_empty() {
            tags.iter()
                .filter(|(key, value)| {
                    self.positive
                        .iter()
                        .any(|(k, matcher)| k == *key && matcher.matches(value))
                })
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        } else {
            self.groups
                .iter()
                .filter_map(|group| {
                    group_value(group, tags).map(|value| (group.name.clone(), value))
                })
                .collect()
        }
    }
}

/// First matching `key=value` of a group, if any.
fn group_value(group: &CompiledGroup, tags: &TagMap) -> Option<String> {
    group.positive.iter().find_map(|(key, matcher)| {
        tags.get(key)
            .filter(|value| matcher.matches(value))
            .map(|value| format!("{key}={value}"))
    })
}

/// Expand a filter key against the universe: concrete keys pass through,
/// wildcard keys enumerate every matching observed key (case-fold sorted).
fn expand_key(key: &str, universe: &BTreeSet<String>) -> Vec<String> {
    if !key.contains('*') {
        return vec![key.to_string()];
    }
    let pattern = Pattern::new(key);
    let mut matches: Vec<String> = universe
        .iter()
        .filter(|candidate| pattern.matches(candidate))
        .cloned()
        .collect();
    matches.sort_by_key(|k| k.to_lowercase());
    matches
}
