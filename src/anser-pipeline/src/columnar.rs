//! Arrow schemas and codecs for the intermediate shard datasets.
//!
//! Tags are Arrow maps with lexicographically ordered keys; way refs and
//! relation members are list columns. Stages decode whole batches into
//! entity structs, join in plain Rust and encode the results back.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BinaryArray, BinaryBuilder, Float64Array, Float64Builder, ListArray,
    ListBuilder, MapArray, MapBuilder, StringArray, StringBuilder, UInt64Array, UInt64Builder,
};
use arrow::datatypes::{DataType, Field, Fields, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use common_error::{AnserError, AnserResult};

use anser_core::{MemberKind, NodeRecord, RelationMember, RelationRecord, TagMap, WayRecord};

/// One output feature row travelling between the stages and the merger.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    /// `node/<id>`, `way/<id>` or `relation/<id>`.
    pub feature_id: String,
    /// Geometry as WKB bytes.
    pub geometry: Vec<u8>,
    /// Tags of the feature (already metadata-stripped).
    pub tags: TagMap,
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

fn u64_list_field(name: &str) -> Field {
    Field::new(
        name,
        DataType::List(Arc::new(Field::new("item", DataType::UInt64, true))),
        false,
    )
}

fn utf8_list_field(name: &str) -> Field {
    Field::new(
        name,
        DataType::List(Arc::new(Field::new("item", DataType::Utf8, true))),
        false,
    )
}

/// Schema of the raw node dataset: `(id, lon, lat, tags)`.
pub fn nodes_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::UInt64, false),
        Field::new("lon", DataType::Float64, false),
        Field::new("lat", DataType::Float64, false),
        tags_field(),
    ]))
}

/// Schema of the raw way dataset: `(id, refs, tags)`.
pub fn ways_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::UInt64, false),
        u64_list_field("refs"),
        tags_field(),
    ]))
}

/// Schema of the raw relation dataset: `(id, member_refs, member_roles,
/// tags)`. Only way members survive ingest.
pub fn relations_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::UInt64, false),
        u64_list_field("member_refs"),
        utf8_list_field("member_roles"),
        tags_field(),
    ]))
}

/// Schema of the way-linestring lookup: `(id, geometry)`.
pub fn linestrings_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::UInt64, false),
        Field::new("geometry", DataType::Binary, false),
    ]))
}

/// Schema of the per-stage feature shards: `(feature_id, geometry, tags)`.
pub fn features_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("feature_id", DataType::Utf8, false),
        Field::new("geometry", DataType::Binary, false),
        tags_field(),
    ]))
}

fn append_tags(
    builder: &mut MapBuilder<StringBuilder, StringBuilder>,
    tags: &TagMap,
) -> AnserResult<()> {
    for (key, value) in tags {
        builder.keys().append_value(key);
        builder.values().append_value(value);
    }
    builder.append(true)?;
    Ok(())
}

fn column<'a, T: Array + 'static>(
    batch: &'a RecordBatch,
    index: usize,
    what: &str,
) -> AnserResult<&'a T> {
    batch
        .column(index)
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| AnserError::runtime(format!("unexpected column layout for {what}")))
}

fn read_tags(map: &MapArray, row: usize) -> AnserResult<TagMap> {
    let entries = map.value(row);
    let keys = entries
        .column(0)
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| AnserError::runtime("tag keys are not strings"))?;
    let values = entries
        .column(1)
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| AnserError::runtime("tag values are not strings"))?;

    let mut tags = TagMap::new();
    for i in 0..keys.len() {
        let value = if values.is_null(i) {
            String::new()
        } else {
            values.value(i).to_string()
        };
        tags.insert(keys.value(i).to_string(), value);
    }
    Ok(tags)
}

fn read_u64_list(list: &ListArray, row: usize, what: &str) -> AnserResult<Vec<u64>> {
    let values = list.value(row);
    let values = values
        .as_any()
        .downcast_ref::<UInt64Array>()
        .ok_or_else(|| AnserError::runtime(format!("{what} items are not u64")))?;
    Ok(values.iter().flatten().collect())
}

fn read_utf8_list(list: &ListArray, row: usize, what: &str) -> AnserResult<Vec<String>> {
    let values = list.value(row);
    let values = values
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| AnserError::runtime(format!("{what} items are not strings")))?;
    Ok(values
        .iter()
        .map(|v| v.unwrap_or_default().to_string())
        .collect())
}

/// Encode node records into a batch.
pub fn encode_nodes(records: &[NodeRecord]) -> AnserResult<RecordBatch> {
    let mut ids = UInt64Builder::with_capacity(records.len());
    let mut lons = Float64Builder::with_capacity(records.len());
    let mut lats = Float64Builder::with_capacity(records.len());
    let mut tags = MapBuilder::new(None, StringBuilder::new(), StringBuilder::new());

    for record in records {
        ids.append_value(record.id);
        lons.append_value(record.lon);
        lats.append_value(record.lat);
        append_tags(&mut tags, &record.tags)?;
    }

    let columns: Vec<ArrayRef> = vec![
        Arc::new(ids.finish()),
        Arc::new(lons.finish()),
        Arc::new(lats.finish()),
        Arc::new(tags.finish()),
    ];
    Ok(RecordBatch::try_new(nodes_schema(), columns)?)
}

/// Decode node records from a batch.
pub fn decode_nodes(batch: &RecordBatch) -> AnserResult<Vec<NodeRecord>> {
    let ids: &UInt64Array = column(batch, 0, "node id")?;
    let lons: &Float64Array = column(batch, 1, "node lon")?;
    let lats: &Float64Array = column(batch, 2, "node lat")?;
    let tags: &MapArray = column(batch, 3, "node tags")?;

    let mut records = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        records.push(NodeRecord {
            id: ids.value(row),
            lon: lons.value(row),
            lat: lats.value(row),
            tags: read_tags(tags, row)?,
        });
    }
    Ok(records)
}

/// Encode way records into a batch.
pub fn encode_ways(records: &[WayRecord]) -> AnserResult<RecordBatch> {
    let mut ids = UInt64Builder::with_capacity(records.len());
    let mut refs = ListBuilder::new(UInt64Builder::new());
    let mut tags = MapBuilder::new(None, StringBuilder::new(), StringBuilder::new());

    for record in records {
        ids.append_value(record.id);
        refs.values().append_slice(&record.refs);
        refs.append(true);
        append_tags(&mut tags, &record.tags)?;
    }

    let columns: Vec<ArrayRef> = vec![
        Arc::new(ids.finish()),
        Arc::new(refs.finish()),
        Arc::new(tags.finish()),
    ];
    Ok(RecordBatch::try_new(ways_schema(), columns)?)
}

/// Decode way records from a batch.
pub fn decode_ways(batch: &RecordBatch) -> AnserResult<Vec<WayRecord>> {
    let ids: &UInt64Array = column(batch, 0, "way id")?;
    let refs: &ListArray = column(batch, 1, "way refs")?;
    let tags: &MapArray = column(batch, 2, "way tags")?;

    let mut records = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        records.push(WayRecord {
            id: ids.value(row),
            refs: read_u64_list(refs, row, "way refs")?,
            tags: read_tags(tags, row)?,
        });
    }
    Ok(records)
}

/// Encode relation records (way members only) into a batch.
pub fn encode_relations(records: &[RelationRecord]) -> AnserResult<RecordBatch> {
    let mut ids = UInt64Builder::with_capacity(records.len());
    let mut member_refs = ListBuilder::new(UInt64Builder::new());
    let mut member_roles = ListBuilder::new(StringBuilder::new());
    let mut tags = MapBuilder::new(None, StringBuilder::new(), StringBuilder::new());

    for record in records {
        ids.append_value(record.id);
        for member in record.way_members() {
            member_refs.values().append_value(member.ref_id);
            member_roles.values().append_value(&member.role);
        }
        member_refs.append(true);
        member_roles.append(true);
        append_tags(&mut tags, &record.tags)?;
    }

    let columns: Vec<ArrayRef> = vec![
        Arc::new(ids.finish()),
        Arc::new(member_refs.finish()),
        Arc::new(member_roles.finish()),
        Arc::new(tags.finish()),
    ];
    Ok(RecordBatch::try_new(relations_schema(), columns)?)
}

/// Decode relation records from a batch.
pub fn decode_relations(batch: &RecordBatch) -> AnserResult<Vec<RelationRecord>> {
    let ids: &UInt64Array = column(batch, 0, "relation id")?;
    let member_refs: &ListArray = column(batch, 1, "relation member refs")?;
    let member_roles: &ListArray = column(batch, 2, "relation member roles")?;
    let tags: &MapArray = column(batch, 3, "relation tags")?;

    let mut records = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let refs = read_u64_list(member_refs, row, "relation member refs")?;
        let roles = read_utf8_list(member_roles, row, "relation member roles")?;
        let members = refs
            .into_iter()
            .zip(roles)
            .map(|(ref_id, role)| RelationMember {
                kind: MemberKind::Way,
                ref_id,
                role,
            })
            .collect();
        records.push(RelationRecord {
            id: ids.value(row),
            members,
            tags: read_tags(tags, row)?,
        });
    }
    Ok(records)
}

/// Encode the way-linestring lookup rows.
pub fn encode_linestrings(rows: &[(u64, Vec<u8>)]) -> AnserResult<RecordBatch> {
    let mut ids = UInt64Builder::with_capacity(rows.len());
    let mut geometries = BinaryBuilder::new();
    for (id, wkb) in rows {
        ids.append_value(*id);
        geometries.append_value(wkb);
    }
    let columns: Vec<ArrayRef> = vec![Arc::new(ids.finish()), Arc::new(geometries.finish())];
    Ok(RecordBatch::try_new(linestrings_schema(), columns)?)
}

/// Decode the way-linestring lookup rows.
pub fn decode_linestrings(batch: &RecordBatch) -> AnserResult<Vec<(u64, Vec<u8>)>> {
    let ids: &UInt64Array = column(batch, 0, "linestring id")?;
    let geometries: &BinaryArray = column(batch, 1, "linestring geometry")?;

    let mut rows = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        rows.push((ids.value(row), geometries.value(row).to_vec()));
    }
    Ok(rows)
}

/// Encode feature rows into a batch.
pub fn encode_features(rows: &[FeatureRow]) -> AnserResult<RecordBatch> {
    let mut feature_ids = StringBuilder::new();
    let mut geometries = BinaryBuilder::new();
    let mut tags = MapBuilder::new(None, StringBuilder::new(), StringBuilder::new());

    for row in rows {
        feature_ids.append_value(&row.feature_id);
        geometries.append_value(&row.geometry);
        append_tags(&mut tags, &row.tags)?;
    }

    let columns: Vec<ArrayRef> = vec![
        Arc::new(feature_ids.finish()),
        Arc::new(geometries.finish()),
        Arc::new(tags.finish()),
    ];
    Ok(RecordBatch::try_new(features_schema(), columns)?)
}

/// Decode feature rows from a batch.
pub fn decode_features(batch: &RecordBatch) -> AnserResult<Vec<FeatureRow>> {
    let feature_ids: &StringArray = column(batch, 0, "feature id")?;
    let geometries: &BinaryArray = column(batch, 1, "feature geometry")?;
    let tags: &MapArray = column(batch, 2, "feature tags")?;

    let mut rows = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        rows.push(FeatureRow {
            feature_id: feature_ids.value(row).to_string(),
            geometry: geometries.value(row).to_vec(),
            tags: read_tags(tags, row)?,
        });
    }
    Ok(rows)
}
