//! Multipolygon ring assembly.
//!
//! Relation members arrive as unordered linestring fragments. Fragments
//! stitch into closed rings by endpoint matching; the walk is deterministic,
//! always consuming the unused candidate with the smallest member way id.

use geo::Contains;
use geo_types::{Coord, LineString, MultiPolygon, Point, Polygon};

use crate::repair::{collapse_duplicates, MIN_RING_VERTICES};

/// Endpoint quantum: 1e-7 degrees, the coordinate resolution of the
/// pipeline.
const COORD_SCALE: f64 = 1e7;

/// One resolved relation member: a way id and its linestring coordinates.
#[derive(Debug, Clone)]
pub struct MemberLine {
    /// Id of the member way; the deterministic tie-breaker.
    pub way_id: u64,
    /// Linestring coordinates of the member.
    pub coords: Vec<Coord<f64>>,
}

/// Result of stitching one member set into rings.
#[derive(Debug, Default)]
pub struct RingAssembly {
    /// Closed rings, each with >= 4 vertices.
    pub rings: Vec<LineString<f64>>,
    /// Member fragments consumed by chains that never closed.
    pub discarded_fragments: u64,
}

/// Result of assembling a full (multi)polygon from outer and inner members.
#[derive(Debug, Default)]
pub struct MultiPolygonAssembly {
    /// The assembled geometry; `None` when no outer ring closed.
    pub geometry: Option<MultiPolygon<f64>>,
    /// Fragments discarded by either ring walk.
    pub discarded_fragments: u64,
    /// Inner rings contained in no outer ring.
    pub orphan_inner_rings: u64,
}

fn key(coord: &Coord<f64>) -> (i64, i64) {
    (
        (coord.x * COORD_SCALE).round() as i64,
        (coord.y * COORD_SCALE).round() as i64,
    )
}

/// Stitch member fragments into closed rings.
pub fn assemble_rings(members: &[MemberLine]) -> RingAssembly {
    let mut assembly = RingAssembly::default();

    let mut order: Vec<usize> = (0..members.len()).collect();
    order.sort_by_key(|&i| (members[i].way_id, i));

    let usable: Vec<usize> = order
        .into_iter()
        .filter(|&i| {
            if members[i].coords.len() < 2 {
                assembly.discarded_fragments += 1;
                false
            } else {
                true
            }
        })
        .collect();

    // Endpoint index: quantized coordinate -> (member index, matched at
    // start?). Candidate lists keep way-id order because `usable` does.
    let mut endpoints: std::collections::HashMap<(i64, i64), Vec<(usize, bool)>> =
        std::collections::HashMap::new();
    for &i in &usable {
        let coords = &members[i].coords;
        endpoints
            .entry(key(&coords[0]))
            .or_default()
            .push((i, true));
        endpoints
            .entry(key(&coords[coords.len() - 1]))
            .or_default()
            .push((i, false));
    }

    let mut used = vec![false; members.len()];

    for &seed in &usable {
        if used[seed] {
            continue;
        }

        let mut chain: Vec<Coord<f64>> = Vec::new();
        let mut consumed = 0u64;
        let mut current = seed;
        let mut forward = true;

        loop {
            used[current] = true;
            consumed += 1;
            let segment = &members[current].coords;
            let skip = usize::from(!chain.is_empty());
            if forward {
                chain.extend(segment.iter().skip(skip));
            } else {
                chain.extend(segment.iter().rev().skip(skip));
            }

            if chain.len() >= MIN_RING_VERTICES && key(&chain[0]) == key(&chain[chain.len() - 1]) {
                let ring = collapse_duplicates(&LineString::new(chain));
                if ring.0.len() >= MIN_RING_VERTICES {
                    assembly.rings.push(ring);
                } else {
                    assembly.discarded_fragments += consumed;
                }
                break;
            }

            let tail = key(&chain[chain.len() - 1]);
            let next = endpoints.get(&tail).and_then(|candidates| {
                candidates
                    .iter()
                    .filter(|(candidate, _)| !used[*candidate])
                    .min_by_key(|(candidate, _)| (members[*candidate].way_id, *candidate))
                    .copied()
            });

            match next {
                Some((candidate, at_start)) => {
                    current = candidate;
                    forward = at_start;
                }
                None => {
                    assembly.discarded_fragments += consumed;
                    break;
                }
            }
        }
    }

    assembly
}

/// Assemble a (multi)polygon: stitch outers and inners, then attach each
/// inner ring to the first outer ring strictly containing one of its
/// vertices.
pub fn assemble_multipolygon(
    outers: &[MemberLine],
    inners: &[MemberLine],
) -> MultiPolygonAssembly {
    let outer_assembly = assemble_rings(outers);
    let inner_assembly = assemble_rings(inners);

    let mut result = MultiPolygonAssembly {
        geometry: None,
        discarded_fragments: outer_assembly.discarded_fragments
            + inner_assembly.discarded_fragments,
        orphan_inner_rings: 0,
    };

    if outer_assembly.rings.is_empty() {
        return result;
    }

    let shells: Vec<Polygon<f64>> = outer_assembly
        .rings
        .iter()
        .map(|ring| Polygon::new(ring.clone(), vec![]))
        .collect();
    let mut holes: Vec<Vec<LineString<f64>>> = vec![Vec::new(); shells.len()];

    for inner in inner_assembly.rings {
        let home = shells.iter().enumerate().find_map(|(index, shell)| {
            inner
                .0
                .iter()
                .take(inner.0.len().saturating_sub(1))
                .any(|coord| shell.contains(&Point::new(coord.x, coord.y)))
                .then_some(index)
        });
        match home {
            Some(index) => holes[index].push(inner),
            None => result.orphan_inner_rings += 1,
        }
    }

    let polygons: Vec<Polygon<f64>> = outer_assembly
        .rings
        .into_iter()
        .zip(holes)
        .map(|(shell, shell_holes)| Polygon::new(shell, shell_holes))
        .collect();

    result.geometry = Some(MultiPolygon(polygons));
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coords(points: &[(f64, f64)]) -> Vec<Coord<f64>> {
        points.iter().map(|&(x, y)| Coord { x, y }).collect()
    }

    #[test]
    fn test_single_closed_member() {
        let members = [MemberLine {
            way_id: 1,
            coords: coords(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)]),
        }];
        let assembly = assemble_rings(&members);
        assert_eq!(assembly.rings.len(), 1);
        assert_eq!(assembly.discarded_fragments, 0);
    }

    #[test]
    fn test_two_halves_stitch() {
        // Two open arcs forming a square, the second reversed.
        let members = [
            MemberLine {
                way_id: 10,
                coords: coords(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)]),
            },
            MemberLine {
                way_id: 11,
                coords: coords(&[(0.0, 0.0), (0.0, 1.0), (1.0, 1.0)]),
            },
        ];
        let assembly = assemble_rings(&members);
        assert_eq!(assembly.rings.len(), 1);
        let ring = &assembly.rings[0];
        assert_eq!(ring.0.first(), ring.0.last());
        assert!(ring.0.len() >= MIN_RING_VERTICES);
    }

    #[test]
    fn test_unclosable_fragment_discarded() {
        let members = [MemberLine {
            way_id: 5,
            coords: coords(&[(0.0, 0.0), (1.0, 0.0)]),
        }];
        let assembly = assemble_rings(&members);
        assert!(assembly.rings.is_empty());
        assert_eq!(assembly.discarded_fragments, 1);
    }

    #[test]
    fn test_deterministic_tie_break_by_way_id() {
        // Two candidates continue from (1,0); the walk must take way 2.
        let members = [
            MemberLine {
                way_id: 1,
                coords: coords(&[(0.0, 0.0), (1.0, 0.0)]),
            },
            MemberLine {
                way_id: 3,
                coords: coords(&[(1.0, 0.0), (2.0, 5.0)]),
            },
            MemberLine {
                way_id: 2,
                coords: coords(&[(1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)]),
            },
        ];
        let assembly = assemble_rings(&members);
        assert_eq!(assembly.rings.len(), 1);
        // Way 3 is left dangling and discarded.
        assert_eq!(assembly.discarded_fragments, 1);
    }

    #[test]
    fn test_multipolygon_with_hole() {
        // Outer 10x10 square, inner 2x2 square hole.
        let outers = [MemberLine {
            way_id: 1,
            coords: coords(&[
                (0.0, 0.0),
                (10.0, 0.0),
                (10.0, 10.0),
                (0.0, 10.0),
                (0.0, 0.0),
            ]),
        }];
        let inners = [MemberLine {
            way_id: 2,
            coords: coords(&[(2.0, 2.0), (4.0, 2.0), (4.0, 4.0), (2.0, 4.0), (2.0, 2.0)]),
        }];
        let assembly = assemble_multipolygon(&outers, &inners);
        let geometry = assembly.geometry.expect("outer ring closes");
        assert_eq!(geometry.0.len(), 1);
        assert_eq!(geometry.0[0].interiors().len(), 1);
        assert_eq!(assembly.orphan_inner_rings, 0);
    }

    #[test]
    fn test_orphan_inner_ring_dropped() {
        let outers = [MemberLine {
            way_id: 1,
            coords: coords(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)]),
        }];
        // Entirely outside the outer ring.
        let inners = [MemberLine {
            way_id: 2,
            coords: coords(&[(5.0, 5.0), (6.0, 5.0), (6.0, 6.0), (5.0, 6.0), (5.0, 5.0)]),
        }];
        let assembly = assemble_multipolygon(&outers, &inners);
        assert_eq!(assembly.orphan_inner_rings, 1);
        let geometry = assembly.geometry.expect("outer survives");
        assert!(geometry.0[0].interiors().is_empty());
    }

    #[test]
    fn test_no_outer_ring_yields_none() {
        let inners = [MemberLine {
            way_id: 2,
            coords: coords(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)]),
        }];
        let assembly = assemble_multipolygon(&[], &inners);
        assert!(assembly.geometry.is_none());
    }
}
