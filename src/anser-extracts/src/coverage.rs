//! IoU-greedy coverage selection.
//!
//! The filter geometry is covered by repeatedly taking the smallest extract
//! that still intersects the uncovered remainder. Extracts whose
//! intersection-over-union with the filter falls below the threshold are
//! skipped (except the first, so a tiny filter inside a big region still
//! resolves).

use common_error::{AnserError, AnserResult};
use geo::{Area, BooleanOps, Intersects};
use geo_types::MultiPolygon;

use crate::catalog::Extract;

/// Area below which a remainder counts as covered (square degrees).
const COVERED_EPSILON: f64 = 1e-12;

/// Intersection over union of two polygonal areas.
pub fn iou(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> f64 {
    let intersection = a.intersection(b).unsigned_area();
    if intersection == 0.0 {
        return 0.0;
    }
    let union = a.union(b).unsigned_area();
    if union == 0.0 {
        return 0.0;
    }
    intersection / union
}

/// Select the smallest sufficient extract set covering `filter`.
///
/// `extracts` must be sorted smallest-area first (the catalog contract).
pub fn find_covering_extracts(
    filter: &MultiPolygon<f64>,
    extracts: &[Extract],
    iou_threshold: f64,
    allow_uncovered_geometry: bool,
) -> AnserResult<Vec<Extract>> {
    if !(0.0..=1.0).contains(&iou_threshold) {
        return Err(AnserError::invalid_input(format!(
            "iou threshold {iou_threshold} is outside [0, 1]"
        )));
    }
    if extracts.is_empty() {
        return Err(AnserError::uncovered_geometry("the extract index is empty"));
    }

    let mut remaining = filter.clone();
    let mut candidates: Vec<(usize, f64)> = Vec::new();
    let mut used = vec![false; extracts.len()];

    while remaining.unsigned_area() > COVERED_EPSILON {
        let next = extracts.iter().enumerate().find(|(index, extract)| {
            !used[*index] && extract.geometry.intersects(&remaining)
        });

        let Some((index, extract)) = next else {
            if allow_uncovered_geometry {
                tracing::warn!("parts of the filter geometry are covered by no extract");
                break;
            }
            return Err(AnserError::uncovered_geometry(
                "no extract covers parts of the filter geometry; \
                 pass allow_uncovered_geometry to proceed anyway",
            ));
        };

        used[index] = true;
        candidates.push((index, iou(&extract.geometry, filter)));
        remaining = remaining.difference(&extract.geometry);
    }

    let mut selected = Vec::new();
    for (index, metric) in candidates {
        if metric >= iou_threshold || selected.is_empty() {
            selected.push(extracts[index].clone());
        } else {
            tracing::warn!(
                extract = %extracts[index].file_name,
                iou = metric,
                "skipping extract with a low IoU value"
            );
        }
    }

    if selected.is_empty() && !allow_uncovered_geometry {
        return Err(AnserError::uncovered_geometry(
            "no extract intersects the filter geometry",
        ));
    }
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::{polygon, Polygon};

    fn square(minx: f64, miny: f64, size: f64) -> MultiPolygon<f64> {
        let p: Polygon<f64> = polygon![
            (x: minx, y: miny),
            (x: minx + size, y: miny),
            (x: minx + size, y: miny + size),
            (x: minx, y: miny + size),
            (x: minx, y: miny),
        ];
        MultiPolygon(vec![p])
    }

    fn extract(name: &str, geometry: MultiPolygon<f64>) -> Extract {
        Extract {
            id: name.to_string(),
            name: name.to_string(),
            file_name: name.to_string(),
            parent: None,
            url: format!("https://example.test/{name}.osm.pbf"),
            area_km2: geometry.unsigned_area(),
            geometry,
        }
    }

    #[test]
    fn test_iou_identical_is_one() {
        let a = square(0.0, 0.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_iou_disjoint_is_zero() {
        let a = square(0.0, 0.0, 1.0);
        let b = square(5.0, 5.0, 1.0);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_single_extract_covers() {
        let filter = square(0.2, 0.2, 0.5);
        let extracts = vec![
            extract("small", square(0.0, 0.0, 1.0)),
            extract("large", square(-10.0, -10.0, 40.0)),
        ];
        let selected = find_covering_extracts(&filter, &extracts, 0.01, false).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name, "small");
    }

    #[test]
    fn test_two_extracts_needed() {
        // Filter spans two adjacent unit squares.
        let filter = {
            let mut merged = square(0.2, 0.2, 0.6);
            merged = merged.union(&square(1.2, 0.2, 0.6));
            merged
        };
        let extracts = vec![
            extract("west", square(0.0, 0.0, 1.0)),
            extract("east", square(1.0, 0.0, 1.0)),
        ];
        let selected = find_covering_extracts(&filter, &extracts, 0.01, false).unwrap();
        let names: Vec<&str> = selected.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["west", "east"]);
    }

    #[test]
    fn test_uncovered_geometry_errors() {
        let filter = square(100.0, 50.0, 1.0);
        let extracts = vec![extract("west", square(0.0, 0.0, 1.0))];
        let err = find_covering_extracts(&filter, &extracts, 0.01, false).unwrap_err();
        assert!(matches!(err, AnserError::UncoveredGeometry(_)));

        let selected = find_covering_extracts(&filter, &extracts, 0.01, true).unwrap();
        assert!(selected.is_empty());
    }

    #[test]
    fn test_first_extract_kept_despite_low_iou() {
        // A tiny filter inside a huge region: IoU is far below the
        // threshold, but the only covering extract must still be selected.
        let filter = square(0.0, 0.0, 0.01);
        let extracts = vec![extract("huge", square(-50.0, -50.0, 100.0))];
        let selected = find_covering_extracts(&filter, &extracts, 0.01, false).unwrap();
        assert_eq!(selected.len(), 1);
    }

    #[test]
    fn test_bad_threshold_rejected() {
        let filter = square(0.0, 0.0, 1.0);
        let err = find_covering_extracts(&filter, &[], 1.5, false).unwrap_err();
        assert!(matches!(err, AnserError::InvalidInput(_)));
    }
}
