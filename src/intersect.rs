//! # Intersection/Containment Solver
//!
//! Detects where tracks enter and leave sections.
//!
//! ## Line sections (by intersection points)
//! 1. Project the track once per enter offset
//! 2. Find every crossing of each same-offset line section along the polyline
//! 3. Map each crossing's distance along the polyline back to the bracketing
//!    detections through the arc-length table
//! 4. Emit a SECTION_ENTER event per crossing, interpolated within the bracket
//!
//! ## Areas (by track points)
//! 1. Test every projected detection for containment (boundary is outside)
//! 2. A track starting inside enters at its first detection
//! 3. Every inside/outside change emits ENTER or LEAVE at that detection
//!
//! Sections whose envelope misses the track's envelope are skipped using an
//! R-tree built once per batch.

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use geo::{LineString, Rect};
use log::debug;
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};

use crate::cache::{GeometryCache, DEFAULT_CACHE_CAPACITY};
use crate::error::Result;
use crate::events::{create_crossing_event, create_detection_event, Event, EventType};
use crate::geometry::{
    are_coordinates_within_polygon, line_intersects_line, line_intersects_polygon,
    segment_crossings,
};
use crate::projection::{group_sections_by_offset, project_track, ProjectedTrack, SectionGeometry};
use crate::section::{validate_sections, LineSection, Section, SectionId};
use crate::strategy::TrackBatch;
use crate::{RelativeOffsetCoordinate, Track, TrackProvider};

/// Where a track crosses a line section: the bracketing detections and the
/// relative position of the crossing between them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntersectionPoint {
    pub lower_index: usize,
    pub upper_index: usize,
    /// 0.0 at the lower detection, 1.0 at the upper detection
    pub relative_position: f64,
}

/// A crossing tagged with the section that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionCrossing {
    pub section_id: SectionId,
    /// Distance along the projected track
    pub distance: f64,
    pub point: IntersectionPoint,
}

/// Crossings of `sections` along `projected`, ordered by distance along the
/// track. Crossings at the same distance keep the order of `sections`.
pub fn intersection_points(
    projected: &ProjectedTrack,
    sections: &[(&SectionId, &LineString<f64>)],
) -> Vec<SectionCrossing> {
    let mut crossings: Vec<SectionCrossing> = sections
        .iter()
        .flat_map(|&(section_id, line)| {
            segment_crossings(&projected.line, line)
                .into_iter()
                .map(move |crossing| {
                    let distance = projected.distance_at(crossing.segment, crossing.fraction);
                    SectionCrossing {
                        section_id: section_id.clone(),
                        distance,
                        point: projected.locate(distance),
                    }
                })
        })
        .collect();
    crossings.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    crossings
}

/// Inside/outside state of every projected detection.
pub fn containment_mask(projected: &ProjectedTrack, polygon: &geo::Polygon<f64>) -> Vec<bool> {
    are_coordinates_within_polygon(&projected.coordinates, polygon)
}

/// Detection indices where a containment mask changes, with the event type.
///
/// A mask starting inside yields an ENTER at index 0. An unchanging mask
/// yields nothing (apart from that initial ENTER).
pub fn area_transitions(mask: &[bool]) -> Vec<(usize, EventType)> {
    let mut transitions = Vec::new();
    if mask.first() == Some(&true) {
        transitions.push((0, EventType::SectionEnter));
    }
    for (index, pair) in mask.windows(2).enumerate() {
        if pair[0] != pair[1] {
            let event_type = if pair[1] {
                EventType::SectionEnter
            } else {
                EventType::SectionLeave
            };
            transitions.push((index + 1, event_type));
        }
    }
    transitions
}

fn envelope_of(rect: Rect<f64>) -> AABB<[f64; 2]> {
    AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y])
}

/// Section envelope for R-tree pre-filtering.
#[derive(Debug, Clone)]
struct SectionEnvelope {
    position: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for SectionEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Sections sharing an offset, with their geometry and spatial index.
struct PreparedGroup<'a> {
    offset: RelativeOffsetCoordinate,
    sections: Vec<(&'a Section, Rc<SectionGeometry>)>,
    tree: RTree<SectionEnvelope>,
}

impl PreparedGroup<'_> {
    /// Positions of sections whose envelope meets `projected`, in section order.
    fn candidates(&self, projected: &ProjectedTrack) -> Vec<usize> {
        let Some(rect) = projected.bounding_rect() else {
            return Vec::new();
        };
        let mut positions: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&envelope_of(rect))
            .map(|e| e.position)
            .collect();
        positions.sort_unstable();
        positions
    }
}

/// Solver for one batch: prepared section groups plus the batch's cache.
pub struct SectionSolver<'a> {
    groups: Vec<PreparedGroup<'a>>,
    cache: GeometryCache,
}

impl<'a> SectionSolver<'a> {
    /// Prepare `sections` for solving. Sections without an enter offset are
    /// projected with `default_offset`.
    pub fn new(
        sections: &'a [Section],
        default_offset: RelativeOffsetCoordinate,
        cache_capacity: usize,
    ) -> Self {
        let mut cache = GeometryCache::new(cache_capacity);
        let groups = group_sections_by_offset(sections, default_offset)
            .into_iter()
            .map(|group| {
                let sections: Vec<(&Section, Rc<SectionGeometry>)> = group
                    .sections
                    .into_iter()
                    .map(|s| (s, cache.section_geometry(s)))
                    .collect();
                let envelopes: Vec<SectionEnvelope> = sections
                    .iter()
                    .enumerate()
                    .filter_map(|(position, (_, geometry))| {
                        geometry.bounding_rect().map(|rect| SectionEnvelope {
                            position,
                            envelope: envelope_of(rect),
                        })
                    })
                    .collect();
                PreparedGroup {
                    offset: group.offset,
                    sections,
                    tree: RTree::bulk_load(envelopes),
                }
            })
            .collect();

        Self { groups, cache }
    }

    /// All section events of one track, in detection order.
    ///
    /// Tracks with fewer than two detections cannot cross anything and
    /// produce no events.
    pub fn intersect(&mut self, track: &Track) -> Result<Vec<Event>> {
        if !track.is_usable() {
            return Ok(Vec::new());
        }

        let mut events = Vec::new();
        for group in &self.groups {
            let projected = self.cache.projected_track(track, &group.offset);
            let candidates = group.candidates(&projected);
            if candidates.is_empty() {
                continue;
            }

            let lines: Vec<(&SectionId, &LineString<f64>)> = candidates
                .iter()
                .filter_map(|&p| {
                    let (section, geometry) = &group.sections[p];
                    match (*section, geometry.as_ref()) {
                        (Section::Line(line), SectionGeometry::Line(geometry)) => {
                            Some((line.id(), geometry))
                        }
                        (Section::Line(_), SectionGeometry::Area(_)) => None,
                        (Section::Area(_), _) => None,
                    }
                })
                .collect();
            for crossing in intersection_points(&projected, &lines) {
                events.push(create_crossing_event(
                    track,
                    &crossing.section_id,
                    EventType::SectionEnter,
                    &crossing.point,
                    &group.offset,
                )?);
            }

            for &p in &candidates {
                let (section, geometry) = &group.sections[p];
                let (Section::Area(area), SectionGeometry::Area(polygon)) =
                    (section, geometry.as_ref())
                else {
                    continue;
                };
                let mask = containment_mask(&projected, polygon);
                for (index, event_type) in area_transitions(&mask) {
                    events.push(create_detection_event(
                        track,
                        area.id(),
                        event_type,
                        index,
                        &group.offset,
                    )?);
                }
            }
        }

        events.sort_by(|a, b| a.interpolated_occurrence().cmp(&b.interpolated_occurrence()));
        Ok(events)
    }

    pub fn cache(&self) -> &GeometryCache {
        &self.cache
    }
}

/// Section events of a single track.
///
/// Convenience wrapper preparing the sections for one track; batch callers
/// should use [`intersect_batch`] so preparation happens once.
pub fn intersect_track(
    track: &Track,
    sections: &[Section],
    default_offset: RelativeOffsetCoordinate,
) -> Result<Vec<Event>> {
    validate_sections(sections)?;
    SectionSolver::new(sections, default_offset, DEFAULT_CACHE_CAPACITY).intersect(track)
}

/// Section events of every track in a batch, track by track.
///
/// A track id that the dataset cannot resolve fails the whole batch with
/// `TrackNotFound`.
pub fn intersect_batch<P: TrackProvider + ?Sized>(batch: &TrackBatch<'_, P>) -> Result<Vec<Event>> {
    let tracks = batch.resolve()?;
    let mut solver = SectionSolver::new(batch.sections, batch.default_offset, batch.cache_capacity);

    let mut events = Vec::new();
    for track in tracks {
        events.extend(solver.intersect(track)?);
    }

    debug!(
        "[Intersect] Batch {}: {} tracks -> {} events (cache {} hits / {} misses)",
        batch.index,
        batch.track_ids.len(),
        events.len(),
        solver.cache().hits(),
        solver.cache().misses()
    );
    Ok(events)
}

/// Which tracks touch which sections.
///
/// Lines are tested with line/line intersection, areas with line/polygon
/// intersection, using each section's enter offset.
pub fn tracks_intersecting_sections(
    tracks: &[&Track],
    sections: &[Section],
    default_offset: RelativeOffsetCoordinate,
) -> BTreeMap<SectionId, BTreeSet<crate::TrackId>> {
    let mut cache = GeometryCache::new(tracks.len());
    let mut result: BTreeMap<SectionId, BTreeSet<crate::TrackId>> = BTreeMap::new();

    for group in group_sections_by_offset(sections, default_offset) {
        for track in tracks {
            let projected = cache.projected_track(track, &group.offset);
            for section in &group.sections {
                let hit = match cache.section_geometry(section).as_ref() {
                    SectionGeometry::Line(line) => line_intersects_line(&projected.line, line),
                    SectionGeometry::Area(polygon) => {
                        line_intersects_polygon(&projected.line, polygon)
                    }
                };
                if hit {
                    result
                        .entry(section.id().clone())
                        .or_default()
                        .insert(track.id().clone());
                }
            }
        }
    }

    result
}

/// Split a track into sub-tracks where it crosses a cutting line.
///
/// The upper detection of each crossing starts a new piece. Pieces are named
/// `<track id>_<n>` counting from 0. A track that does not cross the line is
/// returned unchanged.
pub fn cut_track_with_section(
    track: &Track,
    cutting_section: &LineSection,
    offset: &RelativeOffsetCoordinate,
) -> Result<Vec<Track>> {
    if !track.is_usable() {
        return Ok(vec![track.clone()]);
    }
    let projected = project_track(track, offset);
    let geometry = crate::geometry::line_string_from(cutting_section.coordinates());
    let crossings = intersection_points(&projected, &[(cutting_section.id(), &geometry)]);

    let mut starts: Vec<usize> = crossings.iter().map(|c| c.point.upper_index).collect();
    starts.dedup();
    if starts.is_empty() {
        return Ok(vec![track.clone()]);
    }

    let detections = track.detections();
    let mut bounds = vec![0];
    bounds.extend(starts);
    bounds.push(detections.len());

    bounds
        .windows(2)
        .filter(|w| w[1] > w[0])
        .enumerate()
        .map(|(n, w)| {
            Track::new(
                format!("{}_{}", track.id(), n),
                track.classification(),
                detections[w[0]..w[1]].to_vec(),
            )
        })
        .collect()
}
