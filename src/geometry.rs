//! # Geometry Kernel
//!
//! Pure 2D geometry primitives used by the intersection solver.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`line_intersects_line`] | Do two polylines touch or cross |
//! | [`line_intersects_polygon`] | Does a polyline touch a polygon |
//! | [`segment_crossings`] | Every crossing of a splitter along a polyline |
//! | [`split_line_with_line`] | Cut a polyline where a splitter crosses it |
//! | [`distance_between`] | Euclidean distance between two coordinates |
//! | [`are_coordinates_within_polygon`] | Open point-in-polygon test |
//!
//! Inputs are assumed valid: the data model rejects degenerate sections and
//! non-finite coordinates before geometry is built.

use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::{Contains, Coord, Distance, Euclidean, Intersects, Line, LineString, Point, Polygon};

use crate::Coordinate;

/// Tolerance for treating two crossings as the same location.
pub const GEOMETRY_EPSILON: f64 = 1e-9;

/// A point where a splitter crosses a polyline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentCrossing {
    /// Index of the polyline segment (between vertex `segment` and `segment + 1`)
    pub segment: usize,
    /// Position within that segment, 0.0 at its start and 1.0 at its end
    pub fraction: f64,
    /// Location of the crossing
    pub coordinate: Coord<f64>,
    /// Far end of a collinear overlap starting at this crossing
    pub overlap_end: Option<Coord<f64>>,
}

/// Build a `LineString` from coordinates.
pub fn line_string_from(coordinates: &[Coordinate]) -> LineString<f64> {
    LineString::new(coordinates.iter().map(|&c| Coord::from(c)).collect())
}

/// Check if two polylines intersect (touching counts).
pub fn line_intersects_line(a: &LineString<f64>, b: &LineString<f64>) -> bool {
    a.intersects(b)
}

/// Check if a polyline touches or enters a polygon.
pub fn line_intersects_polygon(line: &LineString<f64>, polygon: &Polygon<f64>) -> bool {
    line.intersects(polygon)
}

/// Euclidean distance between two coordinates.
#[inline]
pub fn distance_between(p1: &Coordinate, p2: &Coordinate) -> f64 {
    Euclidean::distance(Point::new(p1.x, p1.y), Point::new(p2.x, p2.y))
}

/// Containment of each point in `polygon`.
///
/// Points on the polygon boundary are NOT inside.
pub fn are_coordinates_within_polygon(points: &[Coordinate], polygon: &Polygon<f64>) -> Vec<bool> {
    points
        .iter()
        .map(|p| polygon.contains(&Point::new(p.x, p.y)))
        .collect()
}

/// Relative position of `point` along `segment`, clamped to [0, 1].
fn fraction_along(segment: &Line<f64>, point: Coord<f64>) -> f64 {
    let delta = segment.delta();
    let length_sq = delta.x * delta.x + delta.y * delta.y;
    if length_sq == 0.0 {
        return 0.0;
    }
    let offset = point - segment.start;
    ((offset.x * delta.x + offset.y * delta.y) / length_sq).clamp(0.0, 1.0)
}

fn same_location(a: Coord<f64>, b: Coord<f64>) -> bool {
    (a.x - b.x).abs() <= GEOMETRY_EPSILON && (a.y - b.y).abs() <= GEOMETRY_EPSILON
}

fn is_degenerate(segment: &Line<f64>) -> bool {
    segment.start == segment.end
}

/// Find every crossing of `splitter` along `line`, ordered along `line`.
///
/// A crossing exactly at an interior vertex of `line` is reported once, on the
/// segment that starts at that vertex. Collinear overlaps report the overlap
/// point reached first along `line`, once for the whole run even when it spans
/// several segments. Zero-length segments are ignored.
pub fn segment_crossings(line: &LineString<f64>, splitter: &LineString<f64>) -> Vec<SegmentCrossing> {
    let segment_count = line.0.len().saturating_sub(1);
    let mut crossings = Vec::new();

    for (index, segment) in line.lines().enumerate() {
        if is_degenerate(&segment) {
            continue;
        }
        for cutter in splitter.lines() {
            if is_degenerate(&cutter) {
                continue;
            }
            let (coordinate, overlap_end) = match line_intersection(segment, cutter) {
                Some(LineIntersection::SinglePoint { intersection, .. }) => (intersection, None),
                Some(LineIntersection::Collinear { intersection }) => {
                    if fraction_along(&segment, intersection.start)
                        <= fraction_along(&segment, intersection.end)
                    {
                        (intersection.start, Some(intersection.end))
                    } else {
                        (intersection.end, Some(intersection.start))
                    }
                }
                None => continue,
            };

            let fraction = fraction_along(&segment, coordinate);
            let next_segment = if fraction >= 1.0 - GEOMETRY_EPSILON {
                (index + 1..segment_count).find(|&j| line.0[j] != line.0[j + 1])
            } else {
                None
            };
            match next_segment {
                Some(next) => crossings.push(SegmentCrossing {
                    segment: next,
                    fraction: 0.0,
                    coordinate: segment.end,
                    overlap_end: None,
                }),
                None => crossings.push(SegmentCrossing {
                    segment: index,
                    fraction,
                    coordinate,
                    overlap_end,
                }),
            }
        }
    }

    crossings.sort_by(|a, b| {
        a.segment
            .cmp(&b.segment)
            .then(a.fraction.total_cmp(&b.fraction))
    });
    // Same spot hit twice: a splitter vertex, or a line vertex seen from both sides
    crossings.dedup_by(|later, earlier| {
        let same = later.segment == earlier.segment
            && (later.fraction - earlier.fraction).abs() <= GEOMETRY_EPSILON;
        if same {
            earlier.overlap_end = earlier.overlap_end.or(later.overlap_end);
        }
        same
    });
    // An overlap running into the next segment is still the first crossing
    let mut run_end: Option<Coord<f64>> = None;
    crossings.retain(|crossing| {
        let continues = crossing.fraction <= GEOMETRY_EPSILON
            && run_end.is_some_and(|end| same_location(end, crossing.coordinate));
        run_end = crossing.overlap_end;
        !continues
    });
    crossings
}

/// Split `line` at every point where `splitter` crosses it.
///
/// Returns the ordered sub-lines, or `None` if `splitter` does not cut `line`
/// (touching only at an endpoint of `line` is not a cut). Self-crossings of
/// `line` are never split points on their own. When `splitter` passes through
/// a self-intersection of `line`, only the first traversal is split.
///
/// # Example
/// ```
/// use geo::LineString;
/// use trackflow::split_line_with_line;
///
/// let line = LineString::from(vec![(0.0, 0.0), (10.0, 0.0)]);
/// let splitter = LineString::from(vec![(5.0, -1.0), (5.0, 1.0)]);
/// let parts = split_line_with_line(&line, &splitter).unwrap();
/// assert_eq!(parts.len(), 2);
///
/// let far = LineString::from(vec![(20.0, -1.0), (20.0, 1.0)]);
/// assert!(split_line_with_line(&line, &far).is_none());
/// ```
pub fn split_line_with_line(
    line: &LineString<f64>,
    splitter: &LineString<f64>,
) -> Option<Vec<LineString<f64>>> {
    let coords = &line.0;
    if coords.len() < 2 {
        return None;
    }
    let last_segment = coords.len() - 2;

    let mut used: Vec<Coord<f64>> = Vec::new();
    let cuts: Vec<SegmentCrossing> = segment_crossings(line, splitter)
        .into_iter()
        .filter(|c| {
            let at_start = c.segment == 0 && c.fraction <= GEOMETRY_EPSILON;
            let at_end = c.segment == last_segment && c.fraction >= 1.0 - GEOMETRY_EPSILON;
            !at_start && !at_end
        })
        .filter(|c| {
            // Known limitation: a second pass through the same point is not cut again.
            if used.iter().any(|u| same_location(*u, c.coordinate)) {
                return false;
            }
            used.push(c.coordinate);
            true
        })
        .collect();

    if cuts.is_empty() {
        return None;
    }

    let mut parts = Vec::with_capacity(cuts.len() + 1);
    let mut current = vec![coords[0]];
    let mut pending = cuts.iter().peekable();

    for segment in 0..=last_segment {
        while let Some(cut) = pending.next_if(|c| c.segment == segment) {
            if cut.fraction > GEOMETRY_EPSILON {
                current.push(cut.coordinate);
            }
            parts.push(LineString::new(std::mem::take(&mut current)));
            current.push(cut.coordinate);
        }
        current.push(coords[segment + 1]);
    }
    parts.push(LineString::new(current));

    Some(parts)
}
