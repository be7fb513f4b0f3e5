//! Configuration management for anser.
//!
//! Provides runtime configuration for the conversion pipeline, the output
//! writer and extract auto-discovery.

use serde::{Deserialize, Serialize};

/// Parquet compression codec for the final output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Snappy, no level.
    Snappy,
    /// Zstandard, levels 1..=22.
    #[default]
    Zstd,
    /// Gzip, levels 0..=9.
    Gzip,
    /// No compression.
    None,
}

/// Default parquet compression level (zstd).
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Default rows per parquet row group in the final file.
pub const DEFAULT_ROW_GROUP_SIZE: usize = 100_000;

/// Default IoU threshold for extract coverage selection.
pub const DEFAULT_IOU_THRESHOLD: f64 = 0.01;

/// Conversion configuration.
///
/// Every option maps to one observable effect on the output or the run;
/// defaults reproduce the stock conversion (zstd-3, sorted, compact tags
/// unless a tag filter is present).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertConfig {
    /// Output parquet codec.
    pub compression: Compression,
    /// Codec-dependent compression level.
    pub compression_level: i32,
    /// Rows per parquet row group in the final file.
    pub row_group_size: usize,
    /// Hilbert-sort the output by geometry. Forced off for WKT output.
    pub sort_result: bool,
    /// With a tag filter present, keep the full tag set of matched features
    /// instead of the filtered projection.
    pub keep_all_tags: bool,
    /// Split tags into one column per key. Unset means: true iff a positive
    /// tag filter is present and `keep_all_tags` is off.
    pub explode_tags: Option<bool>,
    /// Override the scheduler's memory-derived rows-per-group.
    pub rows_per_group: Option<usize>,
    /// Minimal IoU for selecting covering extracts.
    pub iou_threshold: f64,
    /// Permit uncovered filter-geometry parts instead of failing.
    pub allow_uncovered_geometry: bool,
    /// Keep intermediate shard files on success.
    pub debug_retain_intermediates: bool,
    /// Strip GDAL-style metadata tags (`created_by`, `source`, ...,
    /// `openGeoDB:*`) from emitted tag sets.
    pub ignore_metadata_tags: bool,
    /// Restrict the output to these feature ids (`node/1`, `way/2`, ...).
    pub filter_osm_ids: Vec<String>,
    /// Save geometry as WKT text instead of WKB.
    pub save_as_wkt: bool,
    /// Ignore a cached result file and reconvert.
    pub ignore_cache: bool,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            compression: Compression::Zstd,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            row_group_size: DEFAULT_ROW_GROUP_SIZE,
            sort_result: true,
            keep_all_tags: false,
            explode_tags: None,
            rows_per_group: None,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            allow_uncovered_geometry: false,
            debug_retain_intermediates: false,
            ignore_metadata_tags: true,
            filter_osm_ids: Vec::new(),
            save_as_wkt: false,
            ignore_cache: false,
        }
    }
}

impl ConvertConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the output compression codec.
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Set the compression level.
    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    /// Set the output row group size.
    pub fn with_row_group_size(mut self, rows: usize) -> Self {
        self.row_group_size = rows;
        self
    }

    /// Enable or disable the Hilbert output sort.
    pub fn with_sort_result(mut self, sort: bool) -> Self {
        self.sort_result = sort;
        self
    }

    /// Keep the full tag set of matched features.
    pub fn with_keep_all_tags(mut self, keep: bool) -> Self {
        self.keep_all_tags = keep;
        self
    }

    /// Explicitly choose exploded or compact tags.
    pub fn with_explode_tags(mut self, explode: bool) -> Self {
        self.explode_tags = Some(explode);
        self
    }

    /// Override the scheduler's rows-per-group.
    pub fn with_rows_per_group(mut self, rows: usize) -> Self {
        self.rows_per_group = Some(rows);
        self
    }

    /// Set the extract coverage IoU threshold.
    pub fn with_iou_threshold(mut self, threshold: f64) -> Self {
        self.iou_threshold = threshold;
        self
    }

    /// Resolve the effective tag shape given whether a positive tag filter
    /// is present.
    ///
    /// Returns `true` when tags should be exploded into per-key columns.
    pub fn effective_explode_tags(&self, has_positive_tags_filter: bool) -> bool {
        match self.explode_tags {
            Some(explicit) => explicit,
            None => has_positive_tags_filter && !self.keep_all_tags,
        }
    }

    /// Whether the Hilbert sort is effectively enabled (off for WKT output).
    pub fn effective_sort_result(&self) -> bool {
        self.sort_result && !self.save_as_wkt
    }
}
