//! Core OSM data model for anser.
//!
//! This crate carries the entity records produced by the PBF reader, the
//! tag-filter compiler and the closed-way polygon classification policy.
//! Everything here is pure data and pure functions; the pipeline crate owns
//! all I/O.

pub mod entities;
pub mod filter;
pub mod ids;
pub mod polygon;
pub mod tags;

pub use entities::{MemberKind, NodeRecord, RelationMember, RelationRecord, WayRecord};
pub use filter::{CompiledTagsFilter, Projection, TagSpec, TagsFilter};
pub use ids::{feature_id, parse_feature_id, FeatureKind};
pub use polygon::WayPolygonConfig;
pub use tags::{strip_metadata_tags, TagMap};
