//! anser command-line interface.
//!
//! Converts a PBF file (or the extracts covering a geometry filter) into a
//! single GeoParquet file. Exit codes: 0 success, 1 validation error, 2 no
//! matching extract / uncovered geometry, 3 runtime failure.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{ArgGroup, Parser, ValueEnum};

use anser_core::TagsFilter;
use anser_extracts::JsonCatalog;
use anser_geometry::parse::{parse_geohash, parse_geojson, parse_geometry_file, parse_wkt};
use anser_pipeline::Converter;
use common_config::{Compression, ConvertConfig};
use common_error::{AnserError, AnserResult};
use common_progress::{TerminalProgress, Verbosity};
use geo_types::Geometry;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CompressionArg {
    Snappy,
    Zstd,
    Gzip,
    None,
}

impl From<CompressionArg> for Compression {
    fn from(value: CompressionArg) -> Self {
        match value {
            CompressionArg::Snappy => Compression::Snappy,
            CompressionArg::Zstd => Compression::Zstd,
            CompressionArg::Gzip => Compression::Gzip,
            CompressionArg::None => Compression::None,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum VerbosityArg {
    Silent,
    Transient,
    Verbose,
}

impl From<VerbosityArg> for Verbosity {
    fn from(value: VerbosityArg) -> Self {
        match value {
            VerbosityArg::Silent => Verbosity::Silent,
            VerbosityArg::Transient => Verbosity::Transient,
            VerbosityArg::Verbose => Verbosity::Normal,
        }
    }
}

/// Convert OpenStreetMap PBF extracts into GeoParquet.
#[derive(Debug, Parser)]
#[command(name = "anser", version, about)]
#[command(group(
    ArgGroup::new("geometry")
        .args(["geom_filter_file", "geom_filter_geojson", "geom_filter_wkt", "geom_filter_geohash"])
        .multiple(false)
))]
struct Cli {
    /// Path of the `*.osm.pbf` file to convert. May be omitted when a
    /// geometry filter selects extracts automatically.
    pbf_file: Option<PathBuf>,

    /// Tag filter as an inline JSON document.
    #[arg(long)]
    osm_tags_filter: Option<String>,

    /// Tag filter loaded from a JSON file.
    #[arg(long, conflicts_with = "osm_tags_filter")]
    osm_tags_filter_file: Option<PathBuf>,

    /// Keep full tag sets of matched features despite the filter.
    #[arg(long)]
    keep_all_tags: bool,

    /// Force one column per tag key.
    #[arg(long)]
    explode_tags: bool,

    /// Force a single map column of tags.
    #[arg(long, conflicts_with = "explode_tags")]
    compact_tags: bool,

    /// Geometry filter from a GeoJSON or WKT file.
    #[arg(long)]
    geom_filter_file: Option<PathBuf>,

    /// Geometry filter as an inline GeoJSON string.
    #[arg(long)]
    geom_filter_geojson: Option<String>,

    /// Geometry filter as an inline WKT string.
    #[arg(long)]
    geom_filter_wkt: Option<String>,

    /// Geometry filter as a geohash cell.
    #[arg(long)]
    geom_filter_geohash: Option<String>,

    /// Extract index document used for auto-discovery.
    #[arg(long)]
    extract_index: Option<PathBuf>,

    /// Where to write the result. Defaults to a content-addressed name in
    /// the working directory.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Reconvert even when a cached result exists.
    #[arg(long)]
    ignore_cache: bool,

    /// Directory for downloads, intermediates and cached results.
    #[arg(long, default_value = "files")]
    working_directory: PathBuf,

    /// Output parquet codec.
    #[arg(long, value_enum, default_value_t = CompressionArg::Zstd)]
    compression: CompressionArg,

    /// Codec-dependent compression level.
    #[arg(long, default_value_t = 3)]
    compression_level: i32,

    /// Rows per parquet row group.
    #[arg(long, default_value_t = 100_000)]
    row_group_size: usize,

    /// Disable the Hilbert output sort.
    #[arg(long)]
    no_sort: bool,

    /// Save geometry as WKT text instead of WKB.
    #[arg(long)]
    wkt: bool,

    /// Minimal IoU for selecting covering extracts.
    #[arg(long, default_value_t = 0.01)]
    iou_threshold: f64,

    /// Permit uncovered filter-geometry parts.
    #[arg(long)]
    allow_uncovered_geometry: bool,

    /// Keep intermediate shard files for debugging.
    #[arg(long)]
    debug_retain_intermediates: bool,

    /// Restrict the output to these feature ids (comma-separated
    /// `node/<id>`, `way/<id>`, `relation/<id>`).
    #[arg(long, value_delimiter = ',')]
    filter_osm_ids: Vec<String>,

    /// Progress verbosity.
    #[arg(long, value_enum, default_value_t = VerbosityArg::Transient)]
    verbosity: VerbosityArg,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(path) => {
            println!("{}", path.display());
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("{error}");
            ExitCode::from(exit_code(&error))
        }
    }
}

fn exit_code(error: &AnserError) -> u8 {
    match error {
        AnserError::InvalidInput(_) | AnserError::FilterConflict(_) => 1,
        AnserError::UncoveredGeometry(_)
        | AnserError::ExtractNotFound { .. }
        | AnserError::ExtractAmbiguous { .. } => 2,
        _ => 3,
    }
}

fn run(cli: Cli) -> AnserResult<PathBuf> {
    let config = build_config(&cli);
    let tags_filter = build_tags_filter(&cli)?;
    let geometry_filter = build_geometry_filter(&cli)?;

    if cli.pbf_file.is_none() && geometry_filter.is_none() {
        return Err(AnserError::invalid_input(
            "pass a PBF path or a geometry filter",
        ));
    }

    let progress = Arc::new(TerminalProgress::new(cli.verbosity.into()));
    let mut converter = Converter::new(&cli.working_directory)
        .with_config(config)
        .with_progress(progress);
    if let Some(filter) = tags_filter {
        converter = converter.with_tags_filter(filter);
    }
    if let Some(geometry) = geometry_filter {
        converter = converter.with_geometry_filter(geometry);
    }

    let summary = match &cli.pbf_file {
        Some(pbf) => converter.convert_pbf_to_parquet(pbf, cli.output.as_deref())?,
        None => {
            let index_path = cli.extract_index.as_ref().ok_or_else(|| {
                AnserError::invalid_input(
                    "auto-discovery needs --extract-index with a catalog document",
                )
            })?;
            let catalog = JsonCatalog::from_path(index_path)?;
            converter.convert_geometry_to_parquet(&catalog, cli.output.as_deref())?
        }
    };

    if summary.counters.total() > 0 {
        eprintln!(
            "finished with soft failures: {:?} (features are complete up to these)",
            summary.counters
        );
    }
    Ok(summary.path)
}

fn build_config(cli: &Cli) -> ConvertConfig {
    let mut config = ConvertConfig::default()
        .with_compression(cli.compression.into())
        .with_compression_level(cli.compression_level)
        .with_row_group_size(cli.row_group_size)
        .with_sort_result(!cli.no_sort)
        .with_keep_all_tags(cli.keep_all_tags)
        .with_iou_threshold(cli.iou_threshold);
    if cli.explode_tags {
        config = config.with_explode_tags(true);
    }
    if cli.compact_tags {
        config = config.with_explode_tags(false);
    }
    config.allow_uncovered_geometry = cli.allow_uncovered_geometry;
    config.debug_retain_intermediates = cli.debug_retain_intermediates;
    config.filter_osm_ids = cli.filter_osm_ids.clone();
    config.save_as_wkt = cli.wkt;
    config.ignore_cache = cli.ignore_cache;
    config
}

fn build_tags_filter(cli: &Cli) -> AnserResult<Option<TagsFilter>> {
    if let Some(inline) = &cli.osm_tags_filter {
        return TagsFilter::from_json_str(inline).map(Some);
    }
    if let Some(path) = &cli.osm_tags_filter_file {
        let text = std::fs::read_to_string(path)?;
        return TagsFilter::from_json_str(&text).map(Some);
    }
    Ok(None)
}

fn build_geometry_filter(cli: &Cli) -> AnserResult<Option<Geometry<f64>>> {
    if let Some(path) = &cli.geom_filter_file {
        return parse_geometry_file(path).map(Some);
    }
    if let Some(text) = &cli.geom_filter_geojson {
        return parse_geojson(text).map(Some);
    }
    if let Some(text) = &cli.geom_filter_wkt {
        return parse_wkt(text).map(Some);
    }
    if let Some(cell) = &cli.geom_filter_geohash {
        return parse_geohash(cell).map(Some);
    }
    Ok(None)
}
