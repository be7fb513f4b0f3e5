//! The extract catalog.
//!
//! A catalog lists downloadable OSM extracts with their boundary polygons.
//! The JSON-backed implementation reads an index document; alternative
//! sources only need to implement [`ExtractCatalog`].

use std::path::{Path, PathBuf};

use common_error::{AnserError, AnserResult};
use geo::Area;
use geo_types::MultiPolygon;
use serde::Deserialize;

use anser_geometry::clip::expect_polygonal;
use anser_geometry::parse::parse_geojson;

/// One downloadable OSM extract.
#[derive(Debug, Clone)]
pub struct Extract {
    /// Stable catalog id.
    pub id: String,
    /// Short display name.
    pub name: String,
    /// Unique file name (carries the parent chain).
    pub file_name: String,
    /// Parent region, if any.
    pub parent: Option<String>,
    /// Download URL of the `.osm.pbf` file.
    pub url: String,
    /// Boundary of the extract.
    pub geometry: MultiPolygon<f64>,
    /// Approximate area in square kilometers, used for smallest-first
    /// ordering.
    pub area_km2: f64,
}

/// A source of extracts.
pub trait ExtractCatalog: Send + Sync {
    /// Every known extract, smallest area first.
    fn list_extracts(&self) -> AnserResult<Vec<Extract>>;

    /// Download one extract into `directory`, returning the local path.
    ///
    /// The default implementation fetches `extract.url` over HTTP and skips
    /// the download when the file is already present.
    fn download(&self, extract: &Extract, directory: &Path) -> AnserResult<PathBuf> {
        crate::download::download_extract(extract, directory)
    }
}

#[derive(Debug, Deserialize)]
struct RawExtract {
    id: String,
    name: String,
    file_name: String,
    #[serde(default)]
    parent: Option<String>,
    url: String,
    #[serde(default)]
    area_km2: Option<f64>,
    geometry: serde_json::Value,
}

/// Catalog backed by a JSON index document: an array of extract entries
/// with GeoJSON boundary geometries.
#[derive(Debug)]
pub struct JsonCatalog {
    extracts: Vec<Extract>,
}

impl JsonCatalog {
    /// Parse an index document.
    pub fn from_json_str(text: &str) -> AnserResult<Self> {
        let raw: Vec<RawExtract> = serde_json::from_str(text)
            .map_err(|e| AnserError::invalid_input(format!("invalid extract index: {e}")))?;

        let mut extracts = Vec::with_capacity(raw.len());
        for entry in raw {
            let geometry = parse_geojson(&entry.geometry.to_string())?;
            let geometry = expect_polygonal(&geometry)?;
            let area_km2 = entry
                .area_km2
                .unwrap_or_else(|| approximate_area_km2(&geometry));
            extracts.push(Extract {
                id: entry.id,
                name: entry.name,
                file_name: entry.file_name,
                parent: entry.parent,
                url: entry.url,
                geometry,
                area_km2,
            });
        }
        extracts.sort_by(|a, b| {
            a.area_km2
                .total_cmp(&b.area_km2)
                .then_with(|| a.file_name.cmp(&b.file_name))
        });
        Ok(Self { extracts })
    }

    /// Load an index document from disk.
    pub fn from_path(path: &Path) -> AnserResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

impl ExtractCatalog for JsonCatalog {
    fn list_extracts(&self) -> AnserResult<Vec<Extract>> {
        Ok(self.extracts.clone())
    }
}

/// Crude equirectangular area in square kilometers, good enough for the
/// smallest-first ordering when the index lacks a precomputed value.
fn approximate_area_km2(geometry: &MultiPolygon<f64>) -> f64 {
    const KM_PER_DEGREE: f64 = 111.32;
    geometry.unsigned_area() * KM_PER_DEGREE * KM_PER_DEGREE
}
