//! Geometry filter input parsing.
//!
//! Filters arrive as WKT strings, GeoJSON strings, files carrying either,
//! or geohash cells decoded into their bounding-box polygon.

use std::path::Path;

use common_error::{AnserError, AnserResult};
use geo_types::{Geometry, GeometryCollection, MultiPolygon, Polygon, Rect};

/// Parse a WKT geometry string.
pub fn parse_wkt(text: &str) -> AnserResult<Geometry<f64>> {
    let parsed: wkt::Wkt<f64> = text
        .trim()
        .parse()
        .map_err(|e| AnserError::invalid_input(format!("invalid wkt: {e}")))?;
    Geometry::try_from(parsed)
        .map_err(|e| AnserError::invalid_input(format!("unsupported wkt geometry: {e:?}")))
}

/// Parse a GeoJSON string into a single geometry.
///
/// FeatureCollections collapse into a geometry collection; the clip
/// predicate later keeps the polygonal parts.
pub fn parse_geojson(text: &str) -> AnserResult<Geometry<f64>> {
    let geojson: geojson::GeoJson = text
        .trim()
        .parse()
        .map_err(|e| AnserError::invalid_input(format!("invalid geojson: {e}")))?;
    let collection: GeometryCollection<f64> = geojson::quick_collection(&geojson)
        .map_err(|e| AnserError::invalid_input(format!("unsupported geojson geometry: {e}")))?;

    let mut geometries = collection.0;
    match geometries.len() {
        0 => Err(AnserError::invalid_input("geojson contains no geometry")),
        1 => Ok(geometries.remove(0)),
        _ => Ok(Geometry::GeometryCollection(GeometryCollection(geometries))),
    }
}

/// Parse a geometry file; the format is sniffed from the content.
pub fn parse_geometry_file(path: &Path) -> AnserResult<Geometry<f64>> {
    let text = std::fs::read_to_string(path)?;
    let trimmed = text.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        parse_geojson(&text)
    } else {
        parse_wkt(&text)
    }
}

const GEOHASH_ALPHABET: &[u8] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Decode a geohash cell into its bounding-box polygon.
pub fn parse_geohash(cell: &str) -> AnserResult<Geometry<f64>> {
    if cell.is_empty() {
        return Err(AnserError::invalid_input("empty geohash"));
    }

    let mut lon = (-180.0f64, 180.0f64);
    let mut lat = (-90.0f64, 90.0f64);
    let mut even_bit = true;

    for ch in cell.to_ascii_lowercase().bytes() {
        let value = GEOHASH_ALPHABET
            .iter()
            .position(|&alphabet_char| alphabet_char == ch)
            .ok_or_else(|| {
                AnserError::invalid_input(format!("invalid geohash character {:?}", ch as char))
            })?;
        for bit_index in (0..5).rev() {
            let bit = (value >> bit_index) & 1;
            let range = if even_bit { &mut lon } else { &mut lat };
            let mid = (range.0 + range.1) / 2.0;
            if bit == 1 {
                range.0 = mid;
            } else {
                range.1 = mid;
            }
            even_bit = !even_bit;
        }
    }

    let rect = Rect::new((lon.0, lat.0), (lon.1, lat.1));
    Ok(Geometry::Polygon(rect.to_polygon()))
}

/// Convenience: coerce any parsed filter geometry into a multipolygon.
pub fn to_multipolygon(geometry: &Geometry<f64>) -> AnserResult<MultiPolygon<f64>> {
    crate::clip::expect_polygonal(geometry)
}

/// Convenience: a bounding-box polygon.
pub fn bbox_polygon(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Polygon<f64> {
    Rect::new((min_lon, min_lat), (max_lon, max_lat)).to_polygon()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wkt_polygon() {
        let geometry = parse_wkt("POLYGON ((0 0, 1 0, 1 1, 0 1, 0 0))").unwrap();
        assert!(matches!(geometry, Geometry::Polygon(_)));
    }

    #[test]
    fn test_parse_wkt_garbage() {
        assert!(parse_wkt("POLYGO ((0 0))").is_err());
    }

    #[test]
    fn test_parse_geojson_polygon() {
        let text = r#"{"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]]}"#;
        let geometry = parse_geojson(text).unwrap();
        assert!(matches!(geometry, Geometry::Polygon(_)));
    }

    #[test]
    fn test_parse_geojson_feature() {
        let text = r#"{
            "type": "Feature",
            "properties": {},
            "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]]}
        }"#;
        let geometry = parse_geojson(text).unwrap();
        assert!(to_multipolygon(&geometry).is_ok());
    }

    #[test]
    fn test_parse_geohash() {
        // Monaco-ish cell.
        let geometry = parse_geohash("spv2bc").unwrap();
        let Geometry::Polygon(polygon) = geometry else {
            panic!("expected polygon");
        };
        use geo::BoundingRect;
        let rect = polygon.bounding_rect().unwrap();
        assert!(rect.min().x > 7.0 && rect.max().x < 8.0);
        assert!(rect.min().y > 43.0 && rect.max().y < 44.0);
    }

    #[test]
    fn test_parse_geohash_rejects_bad_chars() {
        assert!(parse_geohash("ab!").is_err());
        assert!(parse_geohash("").is_err());
    }
}
