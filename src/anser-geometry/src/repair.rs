//! Geometry validity repair.
//!
//! Per emitted geometry, in order: collapse consecutive duplicate vertices,
//! reject degenerate inputs, resolve self-intersections, reorient rings
//! (outer CCW, holes CW). Polygonal inputs keep only polygonal parts after
//! resolution; linear inputs keep only linear parts.

use geo::algorithm::orient::{Direction, Orient};
use geo::{Area, BooleanOps, BoundingRect};
use geo_types::{Coord, Geometry, LineString, MultiPolygon, Polygon, Rect};

/// Minimum vertex count of a closed ring, closing vertex included.
pub const MIN_RING_VERTICES: usize = 4;

/// Collapse consecutive duplicate vertices of a line.
pub fn collapse_duplicates(line: &LineString<f64>) -> LineString<f64> {
    let mut coords: Vec<Coord<f64>> = Vec::with_capacity(line.0.len());
    for coord in &line.0 {
        if coords.last() != Some(coord) {
            coords.push(*coord);
        }
    }
    LineString::new(coords)
}

/// Repair a linestring. Returns `None` when fewer than two distinct
/// vertices remain.
pub fn repair_linear(line: &LineString<f64>) -> Option<LineString<f64>> {
    let collapsed = collapse_duplicates(line);
    if collapsed.0.len() < 2 {
        return None;
    }
    Some(collapsed)
}

/// Repair a polygon or multipolygon. Returns `None` when nothing polygonal
/// survives.
pub fn repair_polygonal(multi: &MultiPolygon<f64>) -> Option<MultiPolygon<f64>> {
    let mut cleaned: Vec<Polygon<f64>> = Vec::new();
    for polygon in multi {
        let Some(exterior) = clean_ring(polygon.exterior()) else {
            continue;
        };
        let interiors: Vec<LineString<f64>> = polygon
            .interiors()
            .iter()
            .filter_map(clean_ring)
            .collect();
        cleaned.push(Polygon::new(exterior, interiors));
    }
    if cleaned.is_empty() {
        return None;
    }

    // Self-union resolves self-intersections; bowtie shells split into
    // separate polygons, degenerate slivers vanish.
    let cleaned = MultiPolygon(cleaned);
    let resolved = cleaned.union(&cleaned);
    if resolved.0.is_empty() || resolved.unsigned_area() == 0.0 {
        return None;
    }

    Some(resolved.orient(Direction::Default))
}

/// Repair an arbitrary feature geometry, dispatching on its class.
pub fn repair_geometry(geometry: Geometry<f64>) -> Option<Geometry<f64>> {
    match geometry {
        Geometry::Point(point) => Some(Geometry::Point(point)),
        Geometry::LineString(line) => repair_linear(&line).map(Geometry::LineString),
        Geometry::Polygon(polygon) => {
            repair_polygonal(&MultiPolygon(vec![polygon])).map(simplify_multi)
        }
        Geometry::MultiPolygon(multi) => repair_polygonal(&multi).map(simplify_multi),
        other => Some(other),
    }
}

/// Bounding box of a geometry, if it has one.
pub fn bounding_rect(geometry: &Geometry<f64>) -> Option<Rect<f64>> {
    geometry.bounding_rect()
}

/// Collapse a single-polygon multipolygon back to a polygon.
fn simplify_multi(multi: MultiPolygon<f64>) -> Geometry<f64> {
    let mut polygons = multi.0;
    if polygons.len() == 1 {
        Geometry::Polygon(polygons.remove(0))
    } else {
        Geometry::MultiPolygon(MultiPolygon(polygons))
    }
}

/// Deduplicate, close and vertex-count-check one ring.
fn clean_ring(ring: &LineString<f64>) -> Option<LineString<f64>> {
    let mut collapsed = collapse_duplicates(ring);
    if collapsed.0.len() >= 2 && collapsed.0.first() != collapsed.0.last() {
        let first = collapsed.0[0];
        collapsed.0.push(first);
    }
    if collapsed.0.len() < MIN_RING_VERTICES {
        return None;
    }
    Some(collapsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Winding;
    use geo_types::{line_string, polygon};

    #[test]
    fn test_collapse_duplicates() {
        let line = line_string![
            (x: 0.0, y: 0.0),
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 2.0, y: 0.0),
        ];
        assert_eq!(collapse_duplicates(&line).0.len(), 3);
    }

    #[test]
    fn test_repair_linear_rejects_single_point() {
        let line = line_string![
            (x: 0.0, y: 0.0),
            (x: 0.0, y: 0.0),
        ];
        assert!(repair_linear(&line).is_none());
    }

    #[test]
    fn test_repair_polygon_orients_rings() {
        // Clockwise shell with a counter-clockwise hole, both wrong.
        let shell = line_string![
            (x: 0.0, y: 0.0),
            (x: 0.0, y: 10.0),
            (x: 10.0, y: 10.0),
            (x: 10.0, y: 0.0),
            (x: 0.0, y: 0.0),
        ];
        let hole = line_string![
            (x: 2.0, y: 2.0),
            (x: 4.0, y: 2.0),
            (x: 4.0, y: 4.0),
            (x: 2.0, y: 4.0),
            (x: 2.0, y: 2.0),
        ];
        let repaired = repair_polygonal(&MultiPolygon(vec![Polygon::new(shell, vec![hole])]))
            .expect("polygon survives repair");

        let polygon = &repaired.0[0];
        assert!(polygon.exterior().is_ccw());
        assert!(polygon.interiors().iter().all(Winding::is_cw));
    }

    #[test]
    fn test_repair_drops_degenerate_ring() {
        let sliver = polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 0.0, y: 0.0),
        ];
        assert!(repair_polygonal(&MultiPolygon(vec![sliver])).is_none());
    }

    #[test]
    fn test_repair_resolves_bowtie() {
        // Self-intersecting "bowtie" splits into two triangles.
        let bowtie = polygon![
            (x: 0.0, y: 0.0),
            (x: 2.0, y: 2.0),
            (x: 2.0, y: 0.0),
            (x: 0.0, y: 2.0),
            (x: 0.0, y: 0.0),
        ];
        let repaired = repair_polygonal(&MultiPolygon(vec![bowtie])).expect("bowtie resolves");
        assert!(repaired.unsigned_area() > 0.0);
        for polygon in &repaired {
            assert!(polygon.exterior().is_ccw());
        }
    }

    #[test]
    fn test_repair_geometry_keeps_points() {
        let point = Geometry::Point(geo_types::point!(x: 1.0, y: 2.0));
        assert_eq!(repair_geometry(point.clone()), Some(point));
    }
}
