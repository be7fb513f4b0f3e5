//! Shard storage for intermediate datasets.
//!
//! A dataset is a directory of id-partitioned groups (`group=<n>/`), each
//! holding one or more parquet part files. Group ids are
//! `floor(entity_id / rows_per_group)` so downstream joins are
//! co-partitioned and proceed group by group.

use std::fs;
use std::path::{Path, PathBuf};

use arrow::record_batch::RecordBatch;
use common_error::{AnserError, AnserResult};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;

/// Row group size of intermediate shards.
const SHARD_ROW_GROUP_SIZE: usize = 25_000;

/// Intermediate shard store rooted at a run-scoped temp directory.
#[derive(Debug)]
pub struct ShardStore {
    root: PathBuf,
}

impl ShardStore {
    /// Create (or reuse) a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> AnserResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dataset_dir(&self, dataset: &str) -> PathBuf {
        self.root.join(dataset)
    }

    fn group_dir(&self, dataset: &str, group: u64) -> PathBuf {
        self.dataset_dir(dataset).join(format!("group={group}"))
    }

    /// Append one part file to a dataset group.
    pub fn write_part(&self, dataset: &str, group: u64, batch: &RecordBatch) -> AnserResult<()> {
        let dir = self.group_dir(dataset, group);
        fs::create_dir_all(&dir)?;

        let part_index = fs::read_dir(&dir)?.count();
        let path = dir.join(format!("part-{part_index:05}.parquet"));

        let properties = WriterProperties::builder()
            .set_compression(Compression::ZSTD(
                ZstdLevel::try_new(3).map_err(AnserError::from)?,
            ))
            .set_max_row_group_size(SHARD_ROW_GROUP_SIZE)
            .build();

        let file = fs::File::create(&path)?;
        let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(properties))?;
        writer.write(batch)?;
        writer.close()?;
        Ok(())
    }

    /// Read every batch of one dataset group, part order.
    pub fn read_group(&self, dataset: &str, group: u64) -> AnserResult<Vec<RecordBatch>> {
        let dir = self.group_dir(dataset, group);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut parts: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "parquet"))
            .collect();
        parts.sort();

        let mut batches = Vec::new();
        for part in parts {
            let file = fs::File::open(&part)?;
            let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
            for batch in reader {
                batches.push(batch?);
            }
        }
        Ok(batches)
    }

    /// Sorted group ids of a dataset; empty when the dataset is missing.
    pub fn groups(&self, dataset: &str) -> AnserResult<Vec<u64>> {
        let dir = self.dataset_dir(dataset);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut groups = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(id) = name
                .to_str()
                .and_then(|name| name.strip_prefix("group="))
                .and_then(|id| id.parse::<u64>().ok())
            else {
                continue;
            };
            groups.push(id);
        }
        groups.sort_unstable();
        Ok(groups)
    }

    /// Remove a dataset and all its shards.
    pub fn remove_dataset(&self, dataset: &str) -> AnserResult<()> {
        let dir = self.dataset_dir(dataset);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Remove the whole store.
    pub fn remove_all(&self) -> AnserResult<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
        }
        Ok(())
    }
}
