//! WKB and WKT encoding of feature geometries.
//!
//! Feature geometry travels as WKB bytes between stages and into the final
//! parquet file; WKT is an opt-in output encoding.

use common_error::{AnserError, AnserResult};
use geo_traits::to_geo::ToGeoGeometry;
use geo_types::Geometry;

/// Encode a geometry as little-endian WKB.
pub fn to_wkb(geometry: &Geometry<f64>) -> AnserResult<Vec<u8>> {
    let mut buffer = Vec::new();
    wkb::writer::write_geometry(&mut buffer, geometry, &wkb::writer::WriteOptions::default())
        .map_err(|e| AnserError::runtime(format!("wkb encode failed: {e}")))?;
    Ok(buffer)
}

/// Decode WKB bytes into a geometry.
pub fn from_wkb(bytes: &[u8]) -> AnserResult<Geometry<f64>> {
    let parsed = wkb::reader::read_wkb(bytes)
        .map_err(|e| AnserError::invalid_input(format!("invalid wkb: {e}")))?;
    Ok(parsed.to_geometry())
}

/// Render a geometry as a WKT string.
pub fn to_wkt_string(geometry: &Geometry<f64>) -> String {
    use wkt::ToWkt;
    geometry.wkt_string()
}

/// GeoParquet metadata name of a geometry's type.
pub fn geometry_type_name(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) | Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) | Geometry::Rect(_) | Geometry::Triangle(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
    }
}
