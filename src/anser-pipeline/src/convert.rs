//! The public conversion API.
//!
//! A [`Converter`] carries the filters and configuration; each call runs
//! the staged pipeline (ingest -> nodes -> ways -> relations -> merge)
//! against one input and produces a single GeoParquet file, content-
//! addressed in the working directory.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common_config::ConvertConfig;
use common_error::{AnserError, AnserResult};
use common_progress::{ProgressReporter, SilentProgress};
use geo::BooleanOps;
use geo_types::Geometry;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use anser_core::{CompiledTagsFilter, TagsFilter, WayPolygonConfig};
use anser_extracts::{find_covering_extracts, ExtractCatalog};
use anser_geometry::clip::expect_polygonal;
use anser_geometry::GeometryPredicate;
use anser_pbf::{EntitySource, PbfSource};

use crate::cache::{
    pbf_stem, result_file_name, result_file_name_from_geometry, CacheKeyInputs, WorkDirLock,
};
use crate::context::{CancelToken, CounterSnapshot, PipelineEnv, SoftCounters};
use crate::ingest::ingest;
use crate::merge::{combine_results, merge_features, MergePlan};
use crate::scheduler::{detect_memory_budget, detect_rows_per_group, GroupScheduler};
use crate::store::ShardStore;
use crate::{merge, nodes, relations, ways};

/// Outcome of one conversion.
#[derive(Debug, Clone)]
pub struct ConvertSummary {
    /// Path of the GeoParquet result.
    pub path: PathBuf,
    /// Output row count.
    pub rows: u64,
    /// Output bounding box, when non-empty.
    pub bbox: Option<[f64; 4]>,
    /// Distinct geometry type names in the output.
    pub geometry_types: Vec<String>,
    /// Soft-failure counters accumulated during the run.
    pub counters: CounterSnapshot,
    /// Whether a cached result satisfied the call.
    pub cache_hit: bool,
}

/// PBF-to-GeoParquet converter.
pub struct Converter {
    working_directory: PathBuf,
    config: ConvertConfig,
    tags_filter: Option<TagsFilter>,
    geometry_filter: Option<Geometry<f64>>,
    polygon_config: WayPolygonConfig,
    progress: Arc<dyn ProgressReporter>,
    cancel: CancelToken,
}

impl Converter {
    /// Create a converter writing into `working_directory`.
    pub fn new(working_directory: impl Into<PathBuf>) -> Self {
        Self {
            working_directory: working_directory.into(),
            config: ConvertConfig::default(),
            tags_filter: None,
            geometry_filter: None,
            polygon_config: WayPolygonConfig::default_features(),
            progress: Arc::new(SilentProgress),
            cancel: CancelToken::new(),
        }
    }

    /// Set the conversion configuration.
    pub fn with_config(mut self, config: ConvertConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the tag filter.
    pub fn with_tags_filter(mut self, filter: TagsFilter) -> Self {
        self.tags_filter = Some(filter);
        self
    }

    /// Set the geometry filter. Validated when the conversion starts.
    pub fn with_geometry_filter(mut self, geometry: Geometry<f64>) -> Self {
        self.geometry_filter = Some(geometry);
        self
    }

    /// Override the closed-way polygon policy.
    pub fn with_polygon_config(mut self, config: WayPolygonConfig) -> Self {
        self.polygon_config = config;
        self
    }

    /// Set the progress reporter.
    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// The cancellation token of this converter. Cancelling it makes
    /// in-flight conversions finish their current group and return
    /// `Cancelled`.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// The configuration in use.
    pub fn config(&self) -> &ConvertConfig {
        &self.config
    }

    /// Convert a local PBF file. Synchronous; returns when the pipeline
    /// finished or failed.
    pub fn convert_pbf_to_parquet(
        &self,
        pbf_path: &Path,
        result_file_path: Option<&Path>,
    ) -> AnserResult<ConvertSummary> {
        common_runtime::block_on(self.convert_pbf(pbf_path, result_file_path))?
    }

    /// Convert an in-memory entity source; the test and multi-extract
    /// entry point. `stem` stands in for the PBF file name in the cache
    /// key.
    pub fn convert_source_to_parquet(
        &self,
        source: &mut dyn EntitySource,
        stem: &str,
        result_file_path: Option<&Path>,
    ) -> AnserResult<ConvertSummary> {
        common_runtime::block_on(self.convert_source(source, stem, result_file_path))?
    }

    /// Find, download and convert the extracts covering the geometry
    /// filter, merging their outputs into one file.
    pub fn convert_geometry_to_parquet(
        &self,
        catalog: &dyn ExtractCatalog,
        result_file_path: Option<&Path>,
    ) -> AnserResult<ConvertSummary> {
        common_runtime::block_on(self.convert_geometry(catalog, result_file_path))?
    }

    async fn convert_pbf(
        &self,
        pbf_path: &Path,
        result_file_path: Option<&Path>,
    ) -> AnserResult<ConvertSummary> {
        let mut source = PbfSource::new(pbf_path);
        self.convert_source(&mut source, &pbf_stem(pbf_path), result_file_path)
            .await
    }

    async fn convert_source(
        &self,
        source: &mut dyn EntitySource,
        stem: &str,
        result_file_path: Option<&Path>,
    ) -> AnserResult<ConvertSummary> {
        let predicate = self.build_predicate()?;

        let stems = vec![stem.to_string()];
        let name = result_file_name(&self.cache_inputs(&stems, predicate.as_deref()));
        let output_path = match result_file_path {
            Some(path) => path.to_path_buf(),
            None => self.working_directory.join(&name),
        };

        if output_path.exists() && !self.config.ignore_cache {
            return cached_summary(&output_path);
        }

        fs::create_dir_all(&self.working_directory)?;
        let lock_key = output_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| name.clone());
        let _lock = WorkDirLock::acquire(&self.working_directory, &lock_key)?;

        self.run_pipeline(source, predicate, &output_path, &lock_key)
            .await
    }

    async fn convert_geometry(
        &self,
        catalog: &dyn ExtractCatalog,
        result_file_path: Option<&Path>,
    ) -> AnserResult<ConvertSummary> {
        let geometry = self.geometry_filter.as_ref().ok_or_else(|| {
            AnserError::invalid_input(
                "cannot find matching extracts without a geometry filter",
            )
        })?;
        let predicate = Arc::new(GeometryPredicate::new(geometry)?);

        let name = result_file_name_from_geometry(
            &self.cache_inputs(&[], Some(predicate.as_ref())),
        );
        let output_path = match result_file_path {
            Some(path) => path.to_path_buf(),
            None => self.working_directory.join(&name),
        };
        if output_path.exists() && !self.config.ignore_cache {
            return cached_summary(&output_path);
        }

        fs::create_dir_all(&self.working_directory)?;
        let lock_key = output_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| name.clone());
        let _lock = WorkDirLock::acquire(&self.working_directory, &lock_key)?;

        let filter_polygons = expect_polygonal(geometry)?;
        let extracts = find_covering_extracts(
            &filter_polygons,
            &catalog.list_extracts()?,
            self.config.iou_threshold,
            self.config.allow_uncovered_geometry,
        )?;

        if extracts.is_empty() {
            tracing::warn!("found 0 extracts covering the geometry; writing an empty result");
            return self.write_empty_result(&output_path);
        }

        // Each extract converts separately (clipped to its boundary,
        // unsorted); the union is deduplicated and rewritten as one file.
        let mut partial_paths = Vec::with_capacity(extracts.len());
        let mut accumulated = CounterSnapshot::default();
        for extract in &extracts {
            self.cancel.checkpoint()?;
            let pbf_path = catalog.download(extract, &self.working_directory)?;
            let clipped = filter_polygons.intersection(&extract.geometry);
            let child = self.child_converter(Geometry::MultiPolygon(clipped));
            let summary = child.convert_pbf(&pbf_path, None).await?;
            accumulated = add_counters(accumulated, summary.counters);
            partial_paths.push(summary.path);
        }

        if let [only] = partial_paths.as_slice() {
            if self.config.effective_sort_result() {
                // A single covering extract still needs the configured sort.
                let output =
                    combine_results(&[only.clone()], &self.config, &output_path, &*self.progress)?;
                return Ok(summary_from_merge(output, accumulated));
            }
            fs::copy(only, &output_path)?;
            let mut summary = cached_summary(&output_path)?;
            summary.cache_hit = false;
            summary.counters = accumulated;
            return Ok(summary);
        }

        let output = combine_results(&partial_paths, &self.config, &output_path, &*self.progress)?;
        Ok(summary_from_merge(output, accumulated))
    }

    /// Child converter for one extract: same filters, clipped geometry,
    /// no final sort (the combined rewrite sorts once).
    fn child_converter(&self, geometry: Geometry<f64>) -> Converter {
        let mut config = self.config.clone();
        config.sort_result = false;
        Converter {
            working_directory: self.working_directory.clone(),
            config,
            tags_filter: self.tags_filter.clone(),
            geometry_filter: Some(geometry),
            polygon_config: self.polygon_config.clone(),
            progress: Arc::clone(&self.progress),
            cancel: self.cancel.clone(),
        }
    }

    fn build_predicate(&self) -> AnserResult<Option<Arc<GeometryPredicate>>> {
        self.geometry_filter
            .as_ref()
            .map(|geometry| GeometryPredicate::new(geometry).map(Arc::new))
            .transpose()
    }

    fn has_positive_tags_filter(&self) -> bool {
        self.tags_filter
            .as_ref()
            .map(TagsFilter::has_positive)
            .unwrap_or(false)
    }

    fn effective_explode_tags(&self) -> bool {
        self.config
            .effective_explode_tags(self.has_positive_tags_filter())
    }

    fn cache_inputs<'a>(
        &'a self,
        stems: &'a [String],
        predicate: Option<&'a GeometryPredicate>,
    ) -> CacheKeyInputs<'a> {
        CacheKeyInputs {
            pbf_stems: stems,
            tags_filter: self.tags_filter.as_ref(),
            keep_all_tags: self.config.keep_all_tags,
            ignore_metadata_tags: self.config.ignore_metadata_tags,
            geometry_fingerprint: predicate.map(GeometryPredicate::fingerprint),
            explode_tags: self.effective_explode_tags(),
            sort_result: self.config.effective_sort_result(),
            save_as_wkt: self.config.save_as_wkt,
            filter_osm_ids: &self.config.filter_osm_ids,
        }
    }

    async fn run_pipeline(
        &self,
        source: &mut dyn EntitySource,
        predicate: Option<Arc<GeometryPredicate>>,
        output_path: &Path,
        run_key: &str,
    ) -> AnserResult<ConvertSummary> {
        let shard_root = self.working_directory.join(format!(".tmp_{run_key}"));
        let store = Arc::new(ShardStore::new(&shard_root)?);

        let result = self
            .run_pipeline_inner(source, predicate, output_path, Arc::clone(&store))
            .await;

        // Intermediates go away on success and on fatal error alike.
        if !self.config.debug_retain_intermediates {
            let _ = store.remove_all();
        }
        result
    }

    async fn run_pipeline_inner(
        &self,
        source: &mut dyn EntitySource,
        predicate: Option<Arc<GeometryPredicate>>,
        output_path: &Path,
        store: Arc<ShardStore>,
    ) -> AnserResult<ConvertSummary> {
        let partition_rows = self
            .config
            .rows_per_group
            .unwrap_or_else(detect_rows_per_group);
        let scheduler = Arc::new(GroupScheduler::with_budget(
            partition_rows,
            detect_memory_budget(),
        ));

        let stats = ingest(source, &store, partition_rows, &*self.progress)?;

        let compiled = self
            .tags_filter
            .as_ref()
            .map(|filter| CompiledTagsFilter::compile(filter, &stats.tag_universe))
            .transpose()?;

        let filter_osm_ids: Option<HashSet<String>> = if self.config.filter_osm_ids.is_empty() {
            None
        } else {
            Some(self.config.filter_osm_ids.iter().cloned().collect())
        };

        let counters = Arc::new(SoftCounters::default());
        let env = Arc::new(PipelineEnv {
            store: Arc::clone(&store),
            tags_filter: compiled.clone(),
            geometry_filter: predicate,
            polygon_config: self.polygon_config.clone(),
            filter_osm_ids,
            ignore_metadata_tags: self.config.ignore_metadata_tags,
            partition_rows,
            scheduler,
            counters: Arc::clone(&counters),
            cancel: self.cancel.clone(),
            progress: Arc::clone(&self.progress),
        });

        nodes::run(Arc::clone(&env)).await?;
        ways::run(Arc::clone(&env)).await?;
        relations::run(Arc::clone(&env)).await?;

        let plan = MergePlan {
            exploded: self.effective_explode_tags(),
            filter: compiled.as_ref(),
            keep_all_tags: self.config.keep_all_tags,
        };
        let output = merge_features(&store, &plan, &self.config, output_path, &*self.progress)?;

        let snapshot = counters.snapshot();
        if snapshot.total() > 0 {
            tracing::warn!(?snapshot, "conversion finished with soft failures");
        }
        Ok(summary_from_merge(output, snapshot))
    }

    fn write_empty_result(&self, output_path: &Path) -> AnserResult<ConvertSummary> {
        let shard_root = self.working_directory.join(".tmp_empty");
        let store = ShardStore::new(&shard_root)?;
        let plan = MergePlan {
            exploded: false,
            filter: None,
            keep_all_tags: self.config.keep_all_tags,
        };
        let result = merge_features(&store, &plan, &self.config, output_path, &*self.progress);
        let _ = store.remove_all();
        Ok(summary_from_merge(result?, CounterSnapshot::default()))
    }
}

fn summary_from_merge(output: merge::MergeOutput, counters: CounterSnapshot) -> ConvertSummary {
    ConvertSummary {
        path: output.path,
        rows: output.rows,
        bbox: output.bbox,
        geometry_types: output.geometry_types,
        counters,
        cache_hit: false,
    }
}

fn add_counters(a: CounterSnapshot, b: CounterSnapshot) -> CounterSnapshot {
    CounterSnapshot {
        unresolved_way_refs: a.unresolved_way_refs + b.unresolved_way_refs,
        degenerate_ways: a.degenerate_ways + b.degenerate_ways,
        unresolved_relation_members: a.unresolved_relation_members + b.unresolved_relation_members,
        discarded_ring_fragments: a.discarded_ring_fragments + b.discarded_ring_fragments,
        orphan_inner_rings: a.orphan_inner_rings + b.orphan_inner_rings,
        dropped_empty_geometries: a.dropped_empty_geometries + b.dropped_empty_geometries,
    }
}

fn cached_summary(path: &Path) -> AnserResult<ConvertSummary> {
    let file = fs::File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let rows = builder.metadata().file_metadata().num_rows().max(0) as u64;
    Ok(ConvertSummary {
        path: path.to_path_buf(),
        rows,
        bbox: None,
        geometry_types: Vec::new(),
        counters: CounterSnapshot::default(),
        cache_hit: true,
    })
}
