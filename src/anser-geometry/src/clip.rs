//! Geometry filter predicate.
//!
//! A clip polygon is normalized once (CCW outer rings), indexed with an
//! R-tree over ring bounding boxes and fingerprinted so that equal-but-
//! permuted filters share a cache key.

use common_error::{AnserError, AnserResult};
use geo::algorithm::orient::{Direction, Orient};
use geo::{Area, BoundingRect, Intersects};
use geo_types::{Coord, Geometry, LineString, MultiPolygon, Point, Polygon};
use rstar::{RTree, RTreeObject, AABB};
use sha2::{Digest, Sha256};

use crate::wkb::to_wkb;

/// Length of the truncated hex fingerprint.
const FINGERPRINT_LEN: usize = 8;

/// Coordinate quantum for fingerprint normalization (1e-7 degrees).
const COORD_SCALE: f64 = 1e7;

#[derive(Debug, Clone)]
struct IndexedPolygon {
    envelope: AABB<[f64; 2]>,
    index: usize,
}

impl RTreeObject for IndexedPolygon {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Prepared geometry filter.
#[derive(Debug)]
pub struct GeometryPredicate {
    clip: MultiPolygon<f64>,
    index: RTree<IndexedPolygon>,
    fingerprint: String,
}

impl GeometryPredicate {
    /// Build a predicate from a polygonal filter geometry.
    ///
    /// Rejects non-polygonal input and polygonal components with zero area.
    pub fn new(geometry: &Geometry<f64>) -> AnserResult<Self> {
        let clip = expect_polygonal(geometry)?;
        if clip.0.is_empty() {
            return Err(AnserError::invalid_input("geometry filter is empty"));
        }
        for polygon in &clip {
            if polygon.unsigned_area() == 0.0 {
                return Err(AnserError::invalid_input(
                    "geometry filter contains a component with zero area",
                ));
            }
        }

        let clip = clip.orient(Direction::Default);

        let entries = clip
            .iter()
            .enumerate()
            .filter_map(|(index, polygon)| {
                polygon.bounding_rect().map(|rect| IndexedPolygon {
                    envelope: AABB::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                    index,
                })
            })
            .collect();

        let fingerprint = fingerprint(&clip)?;

        Ok(Self {
            clip,
            index: RTree::bulk_load(entries),
            fingerprint,
        })
    }

    /// The normalized clip geometry.
    pub fn clip(&self) -> &MultiPolygon<f64> {
        &self.clip
    }

    /// Stable truncated SHA-256 fingerprint of the normalized filter.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Point-in-polygon test with an R-tree shortlist.
    pub fn contains_point(&self, lon: f64, lat: f64) -> bool {
        let point = Point::new(lon, lat);
        let probe = AABB::from_point([lon, lat]);
        self.index
            .locate_in_envelope_intersecting(&probe)
            .any(|entry| self.clip.0[entry.index].intersects(&point))
    }

    /// Intersection test against an arbitrary feature geometry.
    pub fn intersects(&self, geometry: &Geometry<f64>) -> bool {
        let Some(rect) = geometry.bounding_rect() else {
            return false;
        };
        let probe = AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]);
        self.index
            .locate_in_envelope_intersecting(&probe)
            .any(|entry| geometry.intersects(&self.clip.0[entry.index]))
    }
}

/// Coerce a geometry into its polygonal parts.
pub fn expect_polygonal(geometry: &Geometry<f64>) -> AnserResult<MultiPolygon<f64>> {
    match geometry {
        Geometry::Polygon(polygon) => Ok(MultiPolygon(vec![polygon.clone()])),
        Geometry::MultiPolygon(multi) => Ok(multi.clone()),
        Geometry::Rect(rect) => Ok(MultiPolygon(vec![rect.to_polygon()])),
        Geometry::GeometryCollection(collection) => {
            let mut polygons = Vec::new();
            for member in collection {
                polygons.extend(expect_polygonal(member)?.0);
            }
            Ok(MultiPolygon(polygons))
        }
        other => Err(AnserError::invalid_input(format!(
            "geometry filter must be polygonal, got {}",
            crate::wkb::geometry_type_name(other)
        ))),
    }
}

/// Hash the orientation-normalized geometry: every ring rotated to start at
/// its lexicographically smallest vertex, coordinates quantized to 1e-7,
/// interior rings and polygons ordered by their first vertex.
fn fingerprint(clip: &MultiPolygon<f64>) -> AnserResult<String> {
    let mut polygons: Vec<Polygon<f64>> = clip
        .iter()
        .map(|polygon| {
            let exterior = normalize_ring(polygon.exterior());
            let mut interiors: Vec<LineString<f64>> =
                polygon.interiors().iter().map(normalize_ring).collect();
            interiors.sort_by(|a, b| compare_first_vertex(a, b));
            Polygon::new(exterior, interiors)
        })
        .collect();
    polygons.sort_by(|a, b| compare_first_vertex(a.exterior(), b.exterior()));

    let normalized = Geometry::MultiPolygon(MultiPolygon(polygons));
    let bytes = to_wkb(&normalized)?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();
    Ok(hex[..FINGERPRINT_LEN].to_string())
}

fn quantize(value: f64) -> f64 {
    (value * COORD_SCALE).round() / COORD_SCALE
}

fn coord_key(coord: &Coord<f64>) -> (i64, i64) {
    (
        (coord.x * COORD_SCALE).round() as i64,
        (coord.y * COORD_SCALE).round() as i64,
    )
}

fn compare_first_vertex(a: &LineString<f64>, b: &LineString<f64>) -> std::cmp::Ordering {
    let empty = (0, 0);
    let ka = a.0.first().map(coord_key).unwrap_or(empty);
    let kb = b.0.first().map(coord_key).unwrap_or(empty);
    ka.cmp(&kb)
}

/// Rotate a closed ring so it starts at its smallest vertex, quantized.
fn normalize_ring(ring: &LineString<f64>) -> LineString<f64> {
    let mut coords: Vec<Coord<f64>> = ring
        .0
        .iter()
        .map(|c| Coord {
            x: quantize(c.x),
            y: quantize(c.y),
        })
        .collect();

    // Drop the closing duplicate while rotating.
    if coords.len() > 1 && coords.first() == coords.last() {
        coords.pop();
    }
    if coords.is_empty() {
        return LineString::new(vec![]);
    }

    let min_index = coords
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| coord_key(a).cmp(&coord_key(b)))
        .map(|(index, _)| index)
        .unwrap_or(0);
    coords.rotate_left(min_index);
    coords.push(coords[0]);
    LineString::new(coords)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::{line_string, polygon};

    fn unit_square() -> Polygon<f64> {
        polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 0.0, y: 1.0),
            (x: 0.0, y: 0.0),
        ]
    }

    #[test]
    fn test_rejects_zero_area() {
        let degenerate = Geometry::Polygon(polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 0.0, y: 0.0),
        ]);
        assert!(GeometryPredicate::new(&degenerate).is_err());
    }

    #[test]
    fn test_rejects_non_polygonal() {
        let line = Geometry::LineString(geo_types::line_string![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 1.0),
        ]);
        assert!(GeometryPredicate::new(&line).is_err());
    }

    #[test]
    fn test_contains_point() {
        let predicate = GeometryPredicate::new(&Geometry::Polygon(unit_square())).unwrap();
        assert!(predicate.contains_point(0.5, 0.5));
        assert!(!predicate.contains_point(2.0, 2.0));
    }

    #[test]
    fn test_intersects_crossing_line() {
        let predicate = GeometryPredicate::new(&Geometry::Polygon(unit_square())).unwrap();
        // Crosses the square without any vertex inside it.
        let crossing = Geometry::LineString(geo_types::line_string![
            (x: -1.0, y: 0.5),
            (x: 2.0, y: 0.5),
        ]);
        assert!(predicate.intersects(&crossing));

        let outside = Geometry::LineString(geo_types::line_string![
            (x: 5.0, y: 5.0),
            (x: 6.0, y: 6.0),
        ]);
        assert!(!predicate.intersects(&outside));
    }

    #[test]
    fn test_fingerprint_stable_under_rotation_and_winding() {
        // Set-equal rings hash identically.
        let rotated = polygon![
            (x: 1.0, y: 1.0),
            (x: 0.0, y: 1.0),
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 1.0),
        ];
        let reversed = {
            let mut coords: Vec<Coord<f64>> = unit_square().exterior().0.clone();
            coords.reverse();
            Polygon::new(LineString::new(coords), vec![])
        };

        let base = GeometryPredicate::new(&Geometry::Polygon(unit_square())).unwrap();
        let a = GeometryPredicate::new(&Geometry::Polygon(rotated)).unwrap();
        let b = GeometryPredicate::new(&Geometry::Polygon(reversed)).unwrap();

        assert_eq!(base.fingerprint(), a.fingerprint());
        assert_eq!(base.fingerprint(), b.fingerprint());
        assert_eq!(base.fingerprint().len(), 8);
    }

    #[test]
    fn test_fingerprint_differs_for_different_shapes() {
        let other = polygon![
            (x: 0.0, y: 0.0),
            (x: 2.0, y: 0.0),
            (x: 2.0, y: 2.0),
            (x: 0.0, y: 2.0),
            (x: 0.0, y: 0.0),
        ];
        let base = GeometryPredicate::new(&Geometry::Polygon(unit_square())).unwrap();
        let different = GeometryPredicate::new(&Geometry::Polygon(other)).unwrap();
        assert_ne!(base.fingerprint(), different.fingerprint());
    }
}
