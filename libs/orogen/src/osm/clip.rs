//! Rectangular-window clipping for vector features.
//!
//! Both algorithms sweep the four boundary half-planes in a fixed order
//! (N, S, E, W). Polygons use classic Sutherland-Hodgman; polylines use a
//! splitting variant that emits a new segment every time the line re-enters
//! the window instead of truncating at the first exit.

use crate::geo::{GeoBounds, LatLng};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    North,
    South,
    East,
    West,
}

const EDGES: [Edge; 4] = [Edge::North, Edge::South, Edge::East, Edge::West];

fn inside(p: LatLng, bounds: &GeoBounds, edge: Edge) -> bool {
    match edge {
        Edge::North => p.lat <= bounds.north,
        Edge::South => p.lat >= bounds.south,
        Edge::East => p.lng <= bounds.east,
        Edge::West => p.lng >= bounds.west,
    }
}

fn intersect(a: LatLng, b: LatLng, bounds: &GeoBounds, edge: Edge) -> LatLng {
    match edge {
        Edge::North | Edge::South => {
            let boundary = if edge == Edge::North {
                bounds.north
            } else {
                bounds.south
            };
            let lng = if b.lat == a.lat {
                a.lng
            } else {
                a.lng + (b.lng - a.lng) * (boundary - a.lat) / (b.lat - a.lat)
            };
            LatLng {
                lat: boundary,
                lng,
            }
        }
        Edge::East | Edge::West => {
            let boundary = if edge == Edge::East {
                bounds.east
            } else {
                bounds.west
            };
            let lat = if b.lng == a.lng {
                a.lat
            } else {
                a.lat + (b.lat - a.lat) * (boundary - a.lng) / (b.lng - a.lng)
            };
            LatLng {
                lat,
                lng: boundary,
            }
        }
    }
}

/// Sutherland-Hodgman polygon clip. A ring that collapses returns empty.
pub fn clip_polygon(ring: &[LatLng], bounds: &GeoBounds) -> Vec<LatLng> {
    let mut output = ring.to_vec();

    for edge in EDGES {
        if output.is_empty() {
            break;
        }
        let input = std::mem::take(&mut output);
        let mut prev = input[input.len() - 1];
        for &current in &input {
            if inside(current, bounds, edge) {
                if !inside(prev, bounds, edge) {
                    output.push(intersect(prev, current, bounds, edge));
                }
                output.push(current);
            } else if inside(prev, bounds, edge) {
                output.push(intersect(prev, current, bounds, edge));
            }
            prev = current;
        }
    }

    output
}

/// Clip a polyline, splitting it into one output segment per contiguous
/// in-window run.
pub fn clip_polyline(points: &[LatLng], bounds: &GeoBounds) -> Vec<Vec<LatLng>> {
    let mut segments = vec![points.to_vec()];

    for edge in EDGES {
        let mut next_segments = Vec::new();

        for segment in &segments {
            let mut current: Vec<LatLng> = Vec::new();

            for (i, &p) in segment.iter().enumerate() {
                let p_in = inside(p, bounds, edge);
                if i == 0 {
                    if p_in {
                        current.push(p);
                    }
                    continue;
                }
                let prev = segment[i - 1];
                let prev_in = inside(prev, bounds, edge);

                if p_in && prev_in {
                    current.push(p);
                } else if p_in && !prev_in {
                    // Entering the half-plane.
                    current.push(intersect(prev, p, bounds, edge));
                    current.push(p);
                } else if !p_in && prev_in {
                    // Leaving: close the current run.
                    current.push(intersect(prev, p, bounds, edge));
                    if !current.is_empty() {
                        next_segments.push(std::mem::take(&mut current));
                    }
                }
            }
            if !current.is_empty() {
                next_segments.push(current);
            }
        }
        segments = next_segments;
    }

    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn bounds() -> GeoBounds {
        GeoBounds {
            north: 1.0,
            south: -1.0,
            east: 1.0,
            west: -1.0,
        }
    }

    #[test]
    fn polygon_fully_inside_is_unchanged() {
        let ring = vec![
            LatLng::new(0.5, -0.5),
            LatLng::new(0.5, 0.5),
            LatLng::new(-0.5, 0.5),
            LatLng::new(-0.5, -0.5),
        ];
        let clipped = clip_polygon(&ring, &bounds());
        assert_eq!(clipped.len(), ring.len());
        for (a, b) in clipped.iter().zip(&ring) {
            assert_relative_eq!(a.lat, b.lat);
            assert_relative_eq!(a.lng, b.lng);
        }
    }

    #[test]
    fn polygon_fully_outside_is_empty() {
        let ring = vec![
            LatLng::new(5.0, 5.0),
            LatLng::new(5.0, 6.0),
            LatLng::new(6.0, 6.0),
        ];
        assert!(clip_polygon(&ring, &bounds()).is_empty());
    }

    #[test]
    fn polygon_straddling_one_edge_is_truncated() {
        let ring = vec![
            LatLng::new(0.5, -0.5),
            LatLng::new(0.5, 2.0),
            LatLng::new(-0.5, 2.0),
            LatLng::new(-0.5, -0.5),
        ];
        let clipped = clip_polygon(&ring, &bounds());
        assert!(clipped.len() > 2);
        for p in &clipped {
            assert!(p.lng <= 1.0 + 1e-12);
        }
    }

    #[test]
    fn polyline_double_crossing_splits_in_two() {
        // Runs west-east, exits the window in the middle, comes back.
        let line = vec![
            LatLng::new(0.0, -0.8),
            LatLng::new(2.0, -0.2),
            LatLng::new(2.0, 0.2),
            LatLng::new(0.0, 0.8),
        ];
        let segments = clip_polyline(&line, &bounds());
        assert_eq!(segments.len(), 2);
        for segment in &segments {
            assert!(segment.len() >= 2);
            for p in segment {
                assert!(p.lat <= 1.0 + 1e-12 && p.lat >= -1.0 - 1e-12);
                assert!(p.lng <= 1.0 + 1e-12 && p.lng >= -1.0 - 1e-12);
            }
        }
    }

    #[test]
    fn polyline_fully_inside_is_one_segment() {
        let line = vec![
            LatLng::new(0.0, -0.5),
            LatLng::new(0.1, 0.0),
            LatLng::new(0.0, 0.5),
        ];
        let segments = clip_polyline(&line, &bounds());
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].len(), 3);
    }

    #[test]
    fn polyline_fully_outside_is_empty() {
        let line = vec![LatLng::new(5.0, 5.0), LatLng::new(6.0, 5.0)];
        assert!(clip_polyline(&line, &bounds()).is_empty());
    }
}
