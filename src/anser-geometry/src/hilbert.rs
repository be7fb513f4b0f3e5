//! Hilbert curve index for the spatial output sort.
//!
//! Features are ordered by the Hilbert index of their centroid over the
//! output bounding box, clustering spatial neighbors into the same parquet
//! row groups.

use geo::Centroid;
use geo_types::{Geometry, Rect};

/// Curve order: a 2^16 x 2^16 grid, giving 32-bit indexes.
const ORDER: u32 = 16;

/// Grid side length.
const SIDE: u32 = 1 << ORDER;

/// Hilbert index of a cell in the 2^16 x 2^16 grid.
pub fn hilbert_index(mut x: u32, mut y: u32) -> u32 {
    let mut d: u64 = 0;
    let mut s = SIDE / 2;
    while s > 0 {
        let rx = u32::from((x & s) > 0);
        let ry = u32::from((y & s) > 0);
        d += u64::from(s) * u64::from(s) * u64::from((3 * rx) ^ ry);

        // Rotate the quadrant.
        if ry == 0 {
            if rx == 1 {
                x = SIDE - 1 - x;
                y = SIDE - 1 - y;
            }
            std::mem::swap(&mut x, &mut y);
        }
        s /= 2;
    }
    d as u32
}

/// Hilbert index of a geometry's centroid scaled into `extent`.
///
/// Geometries without a centroid (empty collections) sort first.
pub fn hilbert_index_for(geometry: &Geometry<f64>, extent: &Rect<f64>) -> u32 {
    let Some(centroid) = geometry.centroid() else {
        return 0;
    };
    let x = scale(centroid.x(), extent.min().x, extent.max().x);
    let y = scale(centroid.y(), extent.min().y, extent.max().y);
    hilbert_index(x, y)
}

fn scale(value: f64, min: f64, max: f64) -> u32 {
    let span = max - min;
    if span <= 0.0 {
        return 0;
    }
    let normalized = ((value - min) / span).clamp(0.0, 1.0);
    (normalized * f64::from(SIDE - 1)).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::point;
    use proptest::prelude::*;

    #[test]
    fn test_corner_cells() {
        assert_eq!(hilbert_index(0, 0), 0);
        // The curve ends at the opposite bottom corner for even orders.
        assert_eq!(hilbert_index(SIDE - 1, 0), u32::MAX);
    }

    #[test]
    fn test_index_is_a_bijection_on_a_small_block() {
        let mut seen = std::collections::HashSet::new();
        for x in 0..32 {
            for y in 0..32 {
                assert!(seen.insert(hilbert_index(x, y)));
            }
        }
    }

    #[test]
    fn test_centroid_scaling() {
        let extent = Rect::new((0.0, 0.0), (10.0, 10.0));
        let low = hilbert_index_for(&Geometry::Point(point!(x: 0.0, y: 0.0)), &extent);
        assert_eq!(low, 0);
    }

    #[test]
    fn test_degenerate_extent() {
        let extent = Rect::new((5.0, 5.0), (5.0, 5.0));
        let index = hilbert_index_for(&Geometry::Point(point!(x: 5.0, y: 5.0)), &extent);
        assert_eq!(index, 0);
    }

    proptest! {
        /// Neighboring cells stay close on the curve often enough that the
        /// average step over a random walk is bounded; here we only assert
        /// the index stays within the grid and is stable.
        #[test]
        fn prop_index_stable(x in 0u32..SIDE, y in 0u32..SIDE) {
            let a = hilbert_index(x, y);
            let b = hilbert_index(x, y);
            prop_assert_eq!(a, b);
        }
    }
}
