//! Output merger: per-stage feature shards -> one GeoParquet file.
//!
//! Shards union in (relation, way, node) order with first-occurrence dedup
//! by feature id, tags pivot into the configured shape, rows optionally
//! sort along the Hilbert curve, and the final parquet carries GeoParquet
//! metadata with the computed bbox and geometry types.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use arrow::array::{ArrayRef, BinaryBuilder, MapBuilder, StringBuilder};
use arrow::datatypes::{DataType, Field, Fields, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use common_config::{Compression as Codec, ConvertConfig};
use common_error::{AnserError, AnserResult};
use common_progress::ProgressReporter;
use geo_types::{Geometry, Rect};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, GzipLevel, ZstdLevel};
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;
use std::sync::Arc;

use anser_core::{CompiledTagsFilter, TagMap};
use anser_geometry::hilbert::hilbert_index_for;
use anser_geometry::{from_wkb, geometry_type_name, to_wkt_string};

use crate::columnar::decode_features;
use crate::datasets;
use crate::store::ShardStore;

/// Tag shaping plan for the final file.
pub struct MergePlan<'a> {
    /// Explode tags into one column per projected key.
    pub exploded: bool,
    /// Compiled tag filter, when one was applied.
    pub filter: Option<&'a CompiledTagsFilter>,
    /// Keep full tag sets even with a filter present.
    pub keep_all_tags: bool,
}

impl MergePlan<'_> {
    /// Whether the filter's projection drives the tag shape.
    fn filtered_projection(&self) -> bool {
        self.filter.map(CompiledTagsFilter::has_positive).unwrap_or(false) && !self.keep_all_tags
    }
}

/// What the merger produced.
#[derive(Debug, Clone)]
pub struct MergeOutput {
    /// Path of the final file.
    pub path: PathBuf,
    /// Row count after dedup and projection drops.
    pub rows: u64,
    /// Output bounding box `[minx, miny, maxx, maxy]`, when non-empty.
    pub bbox: Option<[f64; 4]>,
    /// Sorted distinct geometry type names.
    pub geometry_types: Vec<String>,
}

struct OutRow {
    feature_id: String,
    geometry: Vec<u8>,
    tags: TagMap,
    cells: Vec<Option<String>>,
}

/// Merge the stage shards into the final file.
pub fn merge_features(
    store: &ShardStore,
    plan: &MergePlan<'_>,
    config: &ConvertConfig,
    output_path: &Path,
    progress: &dyn ProgressReporter,
) -> AnserResult<MergeOutput> {
    progress.step_begin("Combining features", None);

    // Dedup keeps the first occurrence in (relation, way, node) order.
    let mut seen: HashSet<String> = HashSet::new();
    let mut rows: Vec<OutRow> = Vec::new();
    for dataset in [
        datasets::FEATURE_RELATIONS,
        datasets::FEATURE_WAYS,
        datasets::FEATURE_NODES,
    ] {
        for group in store.groups(dataset)? {
            for batch in store.read_group(dataset, group)? {
                for feature in decode_features(&batch)? {
                    if !seen.insert(feature.feature_id.clone()) {
                        continue;
                    }
                    rows.push(OutRow {
                        feature_id: feature.feature_id,
                        geometry: feature.geometry,
                        tags: feature.tags,
                        cells: Vec::new(),
                    });
                }
            }
        }
    }
    progress.step_end("Combining features");

    let columns = shape_tags(&mut rows, plan);
    write_output(rows, columns, config, output_path, progress)
}

/// Apply the tag shape in place; returns the exploded column list, if any.
///
/// Rows whose projection comes out empty are removed (a filtered run never
/// emits a feature without surviving tags).
fn shape_tags(rows: &mut Vec<OutRow>, plan: &MergePlan<'_>) -> Option<Vec<String>> {
    if let (true, Some(filter)) = (plan.filtered_projection(), plan.filter) {
        if plan.exploded {
            let columns: Vec<String> = filter.projection().columns().to_vec();
            rows.retain_mut(|row| {
                row.cells = filter.project_exploded(&row.tags);
                row.tags = TagMap::new();
                row.cells.iter().any(Option::is_some)
            });
            // Projected keys that never matched anything are dropped.
            return Some(prune_empty_columns(rows, columns));
        }
        rows.retain_mut(|row| {
            row.tags = filter.project_compact(&row.tags);
            !row.tags.is_empty()
        });
        return None;
    }

    if plan.exploded {
        let mut keys: BTreeSet<String> = BTreeSet::new();
        for row in rows.iter() {
            keys.extend(row.tags.keys().cloned());
        }
        let columns: Vec<String> = keys.into_iter().collect();
        for row in rows.iter_mut() {
            row.cells = columns.iter().map(|key| row.tags.get(key).cloned()).collect();
            row.tags = TagMap::new();
        }
        return Some(columns);
    }

    None
}

/// Drop exploded columns that are null in every row.
fn prune_empty_columns(rows: &mut [OutRow], columns: Vec<String>) -> Vec<String> {
    let mut keep = vec![false; columns.len()];
    for row in rows.iter() {
        for (index, cell) in row.cells.iter().enumerate() {
            if cell.is_some() {
                keep[index] = true;
            }
        }
    }
    if keep.iter().all(|&k| k) {
        return columns;
    }
    for row in rows.iter_mut() {
        let cells = std::mem::take(&mut row.cells);
        row.cells = cells
            .into_iter()
            .zip(&keep)
            .filter_map(|(cell, &kept)| kept.then_some(cell))
            .collect();
    }
    columns
        .into_iter()
        .zip(keep)
        .filter_map(|(column, kept)| kept.then_some(column))
        .collect()
}

/// Union several final parquet files (one per extract) into one, with
/// feature-id dedup and a fresh sort.
pub fn combine_results(
    inputs: &[PathBuf],
    config: &ConvertConfig,
    output_path: &Path,
    progress: &dyn ProgressReporter,
) -> AnserResult<MergeOutput> {
    progress.step_begin("Combining results", Some(inputs.len() as u64));

    let mut columns: Vec<String> = Vec::new();
    let mut column_index: HashMap<String, usize> = HashMap::new();
    let mut compact = false;
    let mut seen: HashSet<String> = HashSet::new();
    let mut rows: Vec<OutRow> = Vec::new();

    for input in inputs {
        let file = fs::File::open(input)?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
        for batch in reader {
            let batch = batch?;
            read_result_batch(
                &batch,
                &mut columns,
                &mut column_index,
                &mut compact,
                &mut seen,
                &mut rows,
            )?;
        }
        progress.tick();
    }

    // Pad rows read before later columns appeared.
    for row in &mut rows {
        row.cells.resize(columns.len(), None);
    }
    progress.step_end("Combining results");

    // Cells are indexed by first-seen column order; keep that order.
    let columns = if compact { None } else { Some(columns) };

    write_output(rows, columns, config, output_path, progress)
}

fn read_result_batch(
    batch: &RecordBatch,
    columns: &mut Vec<String>,
    column_index: &mut HashMap<String, usize>,
    compact: &mut bool,
    seen: &mut HashSet<String>,
    rows: &mut Vec<OutRow>,
) -> AnserResult<()> {
    use arrow::array::{Array, BinaryArray, MapArray, StringArray};

    let schema = batch.schema();
    let feature_ids = batch
        .column_by_name("feature_id")
        .and_then(|col| col.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| AnserError::runtime("result file lacks a feature_id column"))?;

    let geometry_column = batch
        .column_by_name("geometry")
        .ok_or_else(|| AnserError::runtime("result file lacks a geometry column"))?;

    let wkb_geometries = geometry_column.as_any().downcast_ref::<BinaryArray>();
    let wkt_geometries = geometry_column.as_any().downcast_ref::<StringArray>();

    let tags_map = batch
        .column_by_name("tags")
        .and_then(|col| col.as_any().downcast_ref::<MapArray>());
    if tags_map.is_some() {
        *compact = true;
    }

    // Exploded value columns in file order.
    let value_columns: Vec<(usize, &StringArray)> = if tags_map.is_some() {
        Vec::new()
    } else {
        schema
            .fields()
            .iter()
            .enumerate()
            .filter(|(_, field)| field.name() != "feature_id" && field.name() != "geometry")
            .filter_map(|(file_index, field)| {
                let array = batch
                    .column(file_index)
                    .as_any()
                    .downcast_ref::<StringArray>()?;
                let output_index = *column_index.entry(field.name().clone()).or_insert_with(|| {
                    columns.push(field.name().clone());
                    columns.len() - 1
                });
                Some((output_index, array))
            })
            .collect()
    };

    for row in 0..batch.num_rows() {
        let feature_id = feature_ids.value(row).to_string();
        if !seen.insert(feature_id.clone()) {
            continue;
        }

        let geometry = match (wkb_geometries, wkt_geometries) {
            (Some(wkb), _) => wkb.value(row).to_vec(),
            (None, Some(wkt)) => {
                let parsed = anser_geometry::parse::parse_wkt(wkt.value(row))?;
                anser_geometry::to_wkb(&parsed)?
            }
            (None, None) => {
                return Err(AnserError::runtime("geometry column is neither WKB nor WKT"))
            }
        };

        let tags = match tags_map {
            Some(map) => map_row_tags(map, row),
            None => TagMap::new(),
        };

        let mut cells: Vec<Option<String>> = vec![None; columns.len()];
        for (output_index, array) in &value_columns {
            if !array.is_null(row) {
                cells[*output_index] = Some(array.value(row).to_string());
            }
        }

        rows.push(OutRow {
            feature_id,
            geometry,
            tags,
            cells,
        });
    }
    Ok(())
}

fn map_row_tags(map: &arrow::array::MapArray, row: usize) -> TagMap {
    use arrow::array::{Array, StringArray};
    let entries = map.value(row);
    let mut tags = TagMap::new();
    if let (Some(keys), Some(values)) = (
        entries.column(0).as_any().downcast_ref::<StringArray>(),
        entries.column(1).as_any().downcast_ref::<StringArray>(),
    ) {
        for i in 0..keys.len() {
            let value = if values.is_null(i) {
                String::new()
            } else {
                values.value(i).to_string()
            };
            tags.insert(keys.value(i).to_string(), value);
        }
    }
    tags
}

/// Sort, encode and write the final parquet file.
fn write_output(
    mut rows: Vec<OutRow>,
    columns: Option<Vec<String>>,
    config: &ConvertConfig,
    output_path: &Path,
    progress: &dyn ProgressReporter,
) -> AnserResult<MergeOutput> {
    // Decode geometries once for bbox, types and the sort key.
    let mut geometries: Vec<Geometry<f64>> = Vec::with_capacity(rows.len());
    let mut bbox: Option<[f64; 4]> = None;
    let mut type_names: BTreeSet<&'static str> = BTreeSet::new();
    for row in &rows {
        let geometry = from_wkb(&row.geometry)?;
        if let Some(rect) = anser_geometry::repair::bounding_rect(&geometry) {
            bbox = Some(grow_bbox(bbox, rect));
        }
        type_names.insert(geometry_type_name(&geometry));
        geometries.push(geometry);
    }

    if config.effective_sort_result() {
        progress.step_begin("Sorting result by geometry", None);
        if let Some(bounds) = bbox {
            let extent = Rect::new((bounds[0], bounds[1]), (bounds[2], bounds[3]));
            let mut order: Vec<usize> = (0..rows.len()).collect();
            order.sort_by_key(|&index| {
                (
                    hilbert_index_for(&geometries[index], &extent),
                    rows[index].feature_id.clone(),
                )
            });
            rows = reorder(rows, &order);
        }
        progress.step_end("Sorting result by geometry");
    }

    progress.step_begin("Saving final file", None);
    if rows.is_empty() {
        tracing::warn!("zero features matched; writing an empty result file");
    }

    let geometry_types: Vec<String> = type_names.into_iter().map(str::to_string).collect();
    let schema = output_schema(columns.as_deref(), config.save_as_wkt);
    let metadata = if config.save_as_wkt {
        None
    } else {
        Some(geoparquet_metadata(
            &geometry_types,
            bbox.unwrap_or([0.0, 0.0, 0.0, 0.0]),
        )?)
    };

    let properties = writer_properties(config, metadata)?;
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = fs::File::create(output_path)?;
    let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(properties))?;

    for chunk in rows.chunks(config.row_group_size.max(1)) {
        let batch = encode_output_chunk(chunk, &schema, columns.as_deref(), config.save_as_wkt)?;
        writer.write(&batch)?;
    }
    writer.close()?;
    progress.step_end("Saving final file");

    Ok(MergeOutput {
        path: output_path.to_path_buf(),
        rows: rows.len() as u64,
        bbox,
        geometry_types,
    })
}

fn reorder(rows: Vec<OutRow>, order: &[usize]) -> Vec<OutRow> {
    let mut slots: Vec<Option<OutRow>> = rows.into_iter().map(Some).collect();
    order
        .iter()
        .map(|&index| slots[index].take().expect("permutation index used once"))
        .collect()
}

fn grow_bbox(bbox: Option<[f64; 4]>, rect: Rect<f64>) -> [f64; 4] {
    match bbox {
        None => [rect.min().x, rect.min().y, rect.max().x, rect.max().y],
        Some([minx, miny, maxx, maxy]) => [
            minx.min(rect.min().x),
            miny.min(rect.min().y),
            maxx.max(rect.max().x),
            maxy.max(rect.max().y),
        ],
    }
}

fn tags_field() -> Field {
    let key = Field::new("keys", DataType::Utf8, false);
    let value = Field::new("values", DataType::Utf8, true);
    let entries = Field::new(
        "entries",
        DataType::Struct(Fields::from(vec![key, value])),
        false,
    );
    Field::new("tags", DataType::Map(Arc::new(entries), false), false)
}

fn output_schema(columns: Option<&[String]>, wkt: bool) -> SchemaRef {
    let geometry_type = if wkt { DataType::Utf8 } else { DataType::Binary };
    let mut fields = vec![
        Field::new("feature_id", DataType::Utf8, false),
        Field::new("geometry", geometry_type, false),
    ];
    match columns {
        Some(columns) => {
            for column in columns {
                fields.push(Field::new(column, DataType::Utf8, true));
            }
        }
        None => fields.push(tags_field()),
    }
    Arc::new(Schema::new(fields))
}

fn encode_output_chunk(
    rows: &[OutRow],
    schema: &SchemaRef,
    columns: Option<&[String]>,
    wkt: bool,
) -> AnserResult<RecordBatch> {
    let mut feature_ids = StringBuilder::new();
    for row in rows {
        feature_ids.append_value(&row.feature_id);
    }

    let geometry: ArrayRef = if wkt {
        let mut builder = StringBuilder::new();
        for row in rows {
            builder.append_value(to_wkt_string(&from_wkb(&row.geometry)?));
        }
        Arc::new(builder.finish())
    } else {
        let mut builder = BinaryBuilder::new();
        for row in rows {
            builder.append_value(&row.geometry);
        }
        Arc::new(builder.finish())
    };

    let mut arrays: Vec<ArrayRef> = vec![Arc::new(feature_ids.finish()), geometry];

    match columns {
        Some(columns) => {
            for (index, _) in columns.iter().enumerate() {
                let mut builder = StringBuilder::new();
                for row in rows {
                    match row.cells.get(index).and_then(Option::as_ref) {
                        Some(value) => builder.append_value(value),
                        None => builder.append_null(),
                    }
                }
                arrays.push(Arc::new(builder.finish()));
            }
        }
        None => {
            let mut builder = MapBuilder::new(None, StringBuilder::new(), StringBuilder::new());
            for row in rows {
                for (key, value) in &row.tags {
                    builder.keys().append_value(key);
                    builder.values().append_value(value);
                }
                builder.append(true)?;
            }
            arrays.push(Arc::new(builder.finish()));
        }
    }

    Ok(RecordBatch::try_new(Arc::clone(schema), arrays)?)
}

fn writer_properties(
    config: &ConvertConfig,
    geo_metadata: Option<String>,
) -> AnserResult<WriterProperties> {
    let compression = match config.compression {
        Codec::Snappy => Compression::SNAPPY,
        Codec::Zstd => Compression::ZSTD(ZstdLevel::try_new(config.compression_level)?),
        Codec::Gzip => Compression::GZIP(GzipLevel::try_new(config.compression_level as u32)?),
        Codec::None => Compression::UNCOMPRESSED,
    };

    let mut builder = WriterProperties::builder()
        .set_compression(compression)
        .set_max_row_group_size(config.row_group_size.max(1));

    if let Some(json) = geo_metadata {
        builder =
            builder.set_key_value_metadata(Some(vec![KeyValue::new("geo".to_string(), json)]));
    }

    Ok(builder.build())
}

/// GeoParquet 1.0 file metadata for the geometry column.
fn geoparquet_metadata(geometry_types: &[String], bbox: [f64; 4]) -> AnserResult<String> {
    let document = serde_json::json!({
        "version": "1.0.0",
        "primary_column": "geometry",
        "columns": {
            "geometry": {
                "encoding": "WKB",
                "geometry_types": geometry_types,
                "crs": crs_projjson(),
                "bbox": bbox,
            }
        }
    });
    Ok(serde_json::to_string(&document)?)
}

/// PROJJSON description of EPSG:4326 longitude/latitude.
fn crs_projjson() -> serde_json::Value {
    serde_json::json!({
        "$schema": "https://proj.org/schemas/v0.5/projjson.schema.json",
        "type": "GeographicCRS",
        "name": "WGS 84 longitude-latitude",
        "datum": {
            "type": "GeodeticReferenceFrame",
            "name": "World Geodetic System 1984",
            "ellipsoid": {
                "name": "WGS 84",
                "semi_major_axis": 6378137,
                "inverse_flattening": 298.257223563
            }
        },
        "coordinate_system": {
            "subtype": "ellipsoidal",
            "axis": [
                {
                    "name": "Geodetic longitude",
                    "abbreviation": "Lon",
                    "direction": "east",
                    "unit": "degree"
                },
                {
                    "name": "Geodetic latitude",
                    "abbreviation": "Lat",
                    "direction": "north",
                    "unit": "degree"
                }
            ]
        },
        "id": {"authority": "EPSG", "code": 4326}
    })
}
