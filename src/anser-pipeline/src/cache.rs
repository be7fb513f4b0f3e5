//! Content-addressed result caching and the working-directory lock.
//!
//! A result file's name is a deterministic function of every input that
//! shapes its content; presence of the file is a cache hit, mtime is never
//! consulted. Concurrent processes targeting the same key fail fast on the
//! lock file.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use common_error::{AnserError, AnserResult};
use sha2::{Digest, Sha256};

use anser_core::TagsFilter;

/// Truncated hash length, in hex chars.
const HASH_LEN: usize = 8;

/// Inputs that shape the cache file name.
pub struct CacheKeyInputs<'a> {
    /// PBF file stems (without `.osm.pbf`), one per input file; empty for
    /// geometry-first naming.
    pub pbf_stems: &'a [String],
    /// The tag filter as configured, if any.
    pub tags_filter: Option<&'a TagsFilter>,
    /// Full tag sets kept despite the filter.
    pub keep_all_tags: bool,
    /// Metadata tags stripped (the default).
    pub ignore_metadata_tags: bool,
    /// Fingerprint of the geometry filter, if any.
    pub geometry_fingerprint: Option<&'a str>,
    /// Effective tag shape.
    pub explode_tags: bool,
    /// Hilbert sort enabled.
    pub sort_result: bool,
    /// WKT output encoding.
    pub save_as_wkt: bool,
    /// Feature-id allowlist.
    pub filter_osm_ids: &'a [String],
}

/// Truncated SHA-256 of a canonical string.
pub fn short_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    digest
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<String>()[..HASH_LEN]
        .to_string()
}

fn tags_part(inputs: &CacheKeyInputs<'_>) -> String {
    if inputs.tags_filter.is_none() && inputs.ignore_metadata_tags {
        return "nofilter".to_string();
    }
    let mut canonical = inputs
        .tags_filter
        .map(TagsFilter::canonical_json)
        .unwrap_or_else(|| "{}".to_string());
    if !inputs.ignore_metadata_tags {
        canonical.push_str("_with_metadata");
    }
    let mut part = short_hash(&canonical);
    if inputs.keep_all_tags {
        part.push_str("_alltags");
    }
    part
}

fn ids_part(inputs: &CacheKeyInputs<'_>) -> String {
    if inputs.filter_osm_ids.is_empty() {
        return String::new();
    }
    let mut ids: Vec<&str> = inputs.filter_osm_ids.iter().map(String::as_str).collect();
    ids.sort_unstable();
    ids.dedup();
    let canonical = serde_json::to_string(&ids).unwrap_or_default();
    format!("_{}", short_hash(&canonical))
}

fn suffix_parts(inputs: &CacheKeyInputs<'_>) -> String {
    let shape = if inputs.explode_tags {
        "exploded"
    } else {
        "compact"
    };
    let sorted = if inputs.sort_result { "_sorted" } else { "" };
    let wkt = if inputs.save_as_wkt { "_wkt" } else { "" };
    format!("{shape}{sorted}{wkt}{}", ids_part(inputs))
}

/// Result file name for a PBF-first conversion.
pub fn result_file_name(inputs: &CacheKeyInputs<'_>) -> String {
    let stem = inputs.pbf_stems.join("_");
    let geometry = inputs.geometry_fingerprint.unwrap_or("noclip");
    format!(
        "{stem}_{}_{geometry}_{}.parquet",
        tags_part(inputs),
        suffix_parts(inputs)
    )
}

/// Result file name for a geometry-first conversion (no PBF paths yet).
pub fn result_file_name_from_geometry(inputs: &CacheKeyInputs<'_>) -> String {
    let geometry = inputs.geometry_fingerprint.unwrap_or("noclip");
    format!(
        "{geometry}_{}_{}.parquet",
        tags_part(inputs),
        suffix_parts(inputs)
    )
}

/// Strip the `.osm.pbf` / `.pbf` suffix from an input file name.
pub fn pbf_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    name.strip_suffix(".osm.pbf")
        .or_else(|| name.strip_suffix(".pbf"))
        .unwrap_or(&name)
        .to_string()
}

/// Exclusive lock on one cache key within a working directory.
///
/// The sentinel file is removed on drop; a held lock surfaces as
/// `CacheBusy`.
#[derive(Debug)]
pub struct WorkDirLock {
    path: PathBuf,
}

impl WorkDirLock {
    /// Acquire the lock for a cache key.
    pub fn acquire(working_dir: &Path, key: &str) -> AnserResult<Self> {
        fs::create_dir_all(working_dir)?;
        let path = working_dir.join(format!("{key}.lock"));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let _ = write!(file, "{}", std::process::id());
                Ok(Self { path })
            }
            Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(AnserError::cache_busy(format!(
                    "working directory lock {} is held by another process",
                    path.display()
                )))
            }
            Err(error) => Err(error.into()),
        }
    }
}

impl Drop for WorkDirLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
