//! OSM extract discovery for anser.
//!
//! A caller may pass a geometry instead of a PBF path; this crate supplies
//! the catalog of downloadable extracts, the IoU-greedy coverage selection
//! and the download step.

pub mod catalog;
pub mod coverage;
pub mod download;
pub mod search;

pub use catalog::{Extract, ExtractCatalog, JsonCatalog};
pub use coverage::{find_covering_extracts, iou};
pub use download::download_extract;
pub use search::find_extract_by_query;
