//! Track and section geometry projection.
//!
//! A track becomes a polyline with one vertex per detection (the detection's
//! bounding box point selected by a relative offset) plus a cumulative
//! arc-length table. The table maps a distance along the polyline back to the
//! pair of detections bracketing it.

use std::collections::HashMap;

use geo::{BoundingRect, Coord, LineString, Polygon, Rect};

use crate::geometry::{distance_between, line_string_from};
use crate::intersect::IntersectionPoint;
use crate::section::Section;
use crate::{Coordinate, RelativeOffsetCoordinate, Track, TrackId};

/// A track projected into 2D through one relative offset.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedTrack {
    pub track_id: TrackId,
    pub offset: RelativeOffsetCoordinate,
    /// One coordinate per detection, in detection order
    pub coordinates: Vec<Coordinate>,
    pub line: LineString<f64>,
    /// Cumulative distance at each vertex; starts at 0.0, non-decreasing
    pub arc_lengths: Vec<f64>,
}

impl ProjectedTrack {
    /// Total polyline length.
    pub fn length(&self) -> f64 {
        self.arc_lengths.last().copied().unwrap_or(0.0)
    }

    pub fn bounding_rect(&self) -> Option<Rect<f64>> {
        self.line.bounding_rect()
    }

    /// Distance along the polyline of a point on segment `segment` at
    /// `fraction` of its length.
    pub fn distance_at(&self, segment: usize, fraction: f64) -> f64 {
        let start = self.arc_lengths[segment];
        let end = self.arc_lengths[(segment + 1).min(self.arc_lengths.len() - 1)];
        start + (end - start) * fraction
    }

    /// Bracketing detection pair and relative position for a distance along
    /// the polyline.
    ///
    /// The lower index is the last vertex whose cumulative distance is `<=`
    /// `distance`, clamped so that an upper vertex exists. Zero-length
    /// brackets report a relative position of 0.0.
    pub fn locate(&self, distance: f64) -> IntersectionPoint {
        let vertex_count = self.arc_lengths.len();
        if vertex_count < 2 {
            return IntersectionPoint {
                lower_index: 0,
                upper_index: 0,
                relative_position: 0.0,
            };
        }
        let at_or_before = self.arc_lengths.partition_point(|&d| d <= distance);
        let lower_index = at_or_before.saturating_sub(1).min(vertex_count - 2);
        let upper_index = lower_index + 1;
        let span = self.arc_lengths[upper_index] - self.arc_lengths[lower_index];
        let relative_position = if span > 0.0 {
            ((distance - self.arc_lengths[lower_index]) / span).clamp(0.0, 1.0)
        } else {
            0.0
        };
        IntersectionPoint {
            lower_index,
            upper_index,
            relative_position,
        }
    }
}

/// Project a track's detections through `offset` into a polyline with its
/// cumulative arc-length table.
pub fn project_track(track: &Track, offset: &RelativeOffsetCoordinate) -> ProjectedTrack {
    let coordinates: Vec<Coordinate> = track
        .detections()
        .iter()
        .map(|d| d.offset_coordinate(offset))
        .collect();

    let mut arc_lengths = Vec::with_capacity(coordinates.len());
    let mut total = 0.0;
    arc_lengths.push(total);
    for pair in coordinates.windows(2) {
        total += distance_between(&pair[0], &pair[1]);
        arc_lengths.push(total);
    }

    ProjectedTrack {
        track_id: track.id().clone(),
        offset: *offset,
        line: line_string_from(&coordinates),
        coordinates,
        arc_lengths,
    }
}

/// Geometry of a section.
#[derive(Debug, Clone, PartialEq)]
pub enum SectionGeometry {
    Line(LineString<f64>),
    Area(Polygon<f64>),
}

impl SectionGeometry {
    pub fn bounding_rect(&self) -> Option<Rect<f64>> {
        match self {
            SectionGeometry::Line(line) => line.bounding_rect(),
            SectionGeometry::Area(polygon) => polygon.bounding_rect(),
        }
    }
}

/// Line sections become open polylines, areas closed polygons.
pub fn project_section(section: &Section) -> SectionGeometry {
    match section {
        Section::Line(line) => SectionGeometry::Line(line_string_from(line.coordinates())),
        Section::Area(area) => {
            let exterior: Vec<Coord<f64>> =
                area.coordinates().iter().map(|&c| Coord::from(c)).collect();
            SectionGeometry::Area(Polygon::new(LineString::new(exterior), vec![]))
        }
    }
}

/// Sections that share an enter offset.
#[derive(Debug, Clone)]
pub struct OffsetGroup<'a> {
    pub offset: RelativeOffsetCoordinate,
    pub sections: Vec<&'a Section>,
}

/// Group sections by their enter offset so each track is projected once per
/// offset. Sections without an enter offset use `fallback`. Groups keep the
/// order in which their offset first appears.
pub fn group_sections_by_offset(
    sections: &[Section],
    fallback: RelativeOffsetCoordinate,
) -> Vec<OffsetGroup<'_>> {
    let mut groups: Vec<OffsetGroup<'_>> = Vec::new();
    let mut index: HashMap<RelativeOffsetCoordinate, usize> = HashMap::new();

    for section in sections {
        let offset = section.enter_offset_or(fallback);
        let position = *index.entry(offset).or_insert_with(|| {
            groups.push(OffsetGroup {
                offset,
                sections: Vec::new(),
            });
            groups.len() - 1
        });
        groups[position].sections.push(section);
    }

    groups
}
