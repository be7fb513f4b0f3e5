//! anser - OpenStreetMap PBF to GeoParquet conversion
//!
//! anser reconstructs full geometric features (points, linestrings,
//! polygons, multipolygons) from OSM's raw node/way/relation triples and
//! writes them as a single GeoParquet file, optionally filtered by
//! geometry and by tag predicates.
//!
//! # Example
//!
//! ```rust,ignore
//! use anser::{Converter, ConvertConfig};
//!
//! let converter = Converter::new("files")
//!     .with_config(ConvertConfig::default());
//! let summary = converter.convert_pbf_to_parquet("monaco.osm.pbf".as_ref(), None)?;
//! println!("{} rows -> {}", summary.rows, summary.path.display());
//! ```

#![forbid(unsafe_code)]

// Re-export core crates
pub use anser_core as core;
pub use anser_extracts as extracts;
pub use anser_geometry as geometry;
pub use anser_pbf as pbf;
pub use anser_pipeline as pipeline;
pub use common_error as error;

// The everyday surface.
pub use anser_core::{TagsFilter, WayPolygonConfig};
pub use anser_pipeline::{CancelToken, ConvertSummary, Converter};
pub use common_config::{Compression, ConvertConfig};
pub use common_error::{AnserError, AnserResult};

/// anser version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
