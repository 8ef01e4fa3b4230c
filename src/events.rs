//! # Event Synthesis
//!
//! Turns raw crossings and containment transitions into typed [`Event`]s.
//!
//! ## Interpolation
//! A crossing found between detection `lower` and detection `upper` at relative
//! position `r` gets:
//! - `interpolated_occurrence = previous + (current - previous) * r`
//! - `interpolated_event_coordinate = previous * (1 - r) + current * r`
//!
//! The raw occurrence, coordinate, frame and video always come from the
//! upper ("current") detection. Area transitions and scene events have no
//! sub-segment position, so their interpolated values equal the raw ones.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{OptionExt, Result};
use crate::intersect::IntersectionPoint;
use crate::section::SectionId;
use crate::{Coordinate, Detection, RelativeOffsetCoordinate, Track, TrackId};

/// Kind of occurrence an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    SectionEnter,
    SectionLeave,
    EnterScene,
    LeaveScene,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SectionEnter => "section-enter",
            EventType::SectionLeave => "section-leave",
            EventType::EnterScene => "enter-scene",
            EventType::LeaveScene => "leave-scene",
        }
    }

    /// Whether events of this type refer to a section.
    pub fn is_section_event(&self) -> bool {
        matches!(self, EventType::SectionEnter | EventType::SectionLeave)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit vector of movement between two positions.
///
/// Coincident positions give the zero vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DirectionVector {
    pub x: f64,
    pub y: f64,
}

impl DirectionVector {
    pub const ZERO: DirectionVector = DirectionVector { x: 0.0, y: 0.0 };

    /// Normalized vector pointing from `previous` to `current`.
    pub fn between(previous: &Coordinate, current: &Coordinate) -> Self {
        let dx = current.x - previous.x;
        let dy = current.y - previous.y;
        let magnitude = dx.hypot(dy);
        if magnitude == 0.0 {
            return Self::ZERO;
        }
        Self {
            x: dx / magnitude,
            y: dy / magnitude,
        }
    }

    pub fn magnitude(&self) -> f64 {
        self.x.hypot(self.y)
    }
}

/// A detected enter/leave occurrence of one road user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    road_user_id: TrackId,
    road_user_type: String,
    hostname: String,
    occurrence: DateTime<Utc>,
    frame_number: u32,
    section_id: Option<SectionId>,
    event_coordinate: Coordinate,
    event_type: EventType,
    direction_vector: DirectionVector,
    video_name: String,
    interpolated_occurrence: DateTime<Utc>,
    interpolated_event_coordinate: Coordinate,
}

impl Event {
    pub fn road_user_id(&self) -> &TrackId {
        &self.road_user_id
    }

    pub fn road_user_type(&self) -> &str {
        &self.road_user_type
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Occurrence of the bracketing (current) detection.
    pub fn occurrence(&self) -> DateTime<Utc> {
        self.occurrence
    }

    pub fn frame_number(&self) -> u32 {
        self.frame_number
    }

    /// Section that produced the event, `None` for scene events.
    pub fn section_id(&self) -> Option<&SectionId> {
        self.section_id.as_ref()
    }

    /// Position of the bracketing (current) detection.
    pub fn event_coordinate(&self) -> Coordinate {
        self.event_coordinate
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn direction_vector(&self) -> DirectionVector {
        self.direction_vector
    }

    pub fn video_name(&self) -> &str {
        &self.video_name
    }

    /// Sub-segment accurate occurrence.
    pub fn interpolated_occurrence(&self) -> DateTime<Utc> {
        self.interpolated_occurrence
    }

    /// Sub-segment accurate position.
    pub fn interpolated_event_coordinate(&self) -> Coordinate {
        self.interpolated_event_coordinate
    }
}

/// Collects the fields of an event before creating it.
///
/// Road user, event type, direction vector and event coordinate are always
/// required; section events also need a section id. Interpolated values
/// default to the raw ones when not set.
#[derive(Debug, Clone, Default)]
pub struct EventBuilder {
    road_user_id: Option<TrackId>,
    road_user_type: Option<String>,
    event_type: Option<EventType>,
    section_id: Option<SectionId>,
    direction_vector: Option<DirectionVector>,
    event_coordinate: Option<Coordinate>,
    interpolated: Option<(DateTime<Utc>, Coordinate)>,
}

impl EventBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pre-filled with a track's identity and classification.
    pub fn for_track(track: &Track) -> Self {
        Self::new().with_road_user(track.id().clone(), track.classification())
    }

    pub fn with_road_user(mut self, id: TrackId, road_user_type: impl Into<String>) -> Self {
        self.road_user_id = Some(id);
        self.road_user_type = Some(road_user_type.into());
        self
    }

    pub fn with_event_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    pub fn with_section_id(mut self, section_id: SectionId) -> Self {
        self.section_id = Some(section_id);
        self
    }

    pub fn with_direction_vector(mut self, direction_vector: DirectionVector) -> Self {
        self.direction_vector = Some(direction_vector);
        self
    }

    pub fn with_event_coordinate(mut self, coordinate: Coordinate) -> Self {
        self.event_coordinate = Some(coordinate);
        self
    }

    pub fn with_interpolation(mut self, occurrence: DateTime<Utc>, coordinate: Coordinate) -> Self {
        self.interpolated = Some((occurrence, coordinate));
        self
    }

    /// Create the event anchored at `detection`.
    ///
    /// Fails with `IncompleteBuilderSetup` naming the first missing field.
    pub fn create_event(&self, detection: &Detection) -> Result<Event> {
        let road_user_id = self.road_user_id.clone().ok_or_incomplete("road_user_id")?;
        let road_user_type = self
            .road_user_type
            .clone()
            .ok_or_incomplete("road_user_type")?;
        let event_type = self.event_type.ok_or_incomplete("event_type")?;
        let direction_vector = self.direction_vector.ok_or_incomplete("direction_vector")?;
        let event_coordinate = self.event_coordinate.ok_or_incomplete("event_coordinate")?;
        let section_id = if event_type.is_section_event() {
            Some(self.section_id.clone().ok_or_incomplete("section_id")?)
        } else {
            None
        };
        let (interpolated_occurrence, interpolated_event_coordinate) = self
            .interpolated
            .unwrap_or((detection.occurrence, event_coordinate));

        Ok(Event {
            road_user_id,
            road_user_type,
            hostname: hostname_from_video_name(&detection.video_name),
            occurrence: detection.occurrence,
            frame_number: detection.frame,
            section_id,
            event_coordinate,
            event_type,
            direction_vector,
            video_name: detection.video_name.clone(),
            interpolated_occurrence,
            interpolated_event_coordinate,
        })
    }
}

/// Camera hostname encoded in a video name (`<hostname>_<date>_<time>.<ext>`).
pub fn hostname_from_video_name(video_name: &str) -> String {
    let file_name = video_name.rsplit(&['/', '\\'][..]).next().unwrap_or(video_name);
    match file_name.split_once('_') {
        Some((hostname, _)) => hostname.to_string(),
        None => match file_name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem.to_string(),
            _ => file_name.to_string(),
        },
    }
}

/// Linear interpolation of a timestamp; exact at both ends.
pub fn interpolate_occurrence(
    previous: DateTime<Utc>,
    current: DateTime<Utc>,
    relative_position: f64,
) -> DateTime<Utc> {
    if relative_position <= 0.0 {
        return previous;
    }
    if relative_position >= 1.0 {
        return current;
    }
    let span = current - previous;
    let offset = match span.num_nanoseconds() {
        Some(nanos) => Duration::nanoseconds((nanos as f64 * relative_position).round() as i64),
        None => Duration::milliseconds(
            (span.num_milliseconds() as f64 * relative_position).round() as i64,
        ),
    };
    previous + offset
}

/// Linear interpolation of a coordinate; exact at both ends.
pub fn interpolate_coordinate(
    previous: &Coordinate,
    current: &Coordinate,
    relative_position: f64,
) -> Coordinate {
    let r = relative_position;
    Coordinate::new(
        previous.x * (1.0 - r) + current.x * r,
        previous.y * (1.0 - r) + current.y * r,
    )
}

/// Event for a track crossing a section between two detections.
///
/// Returns `InsufficientDetections` if the bracket indices fall outside the
/// track.
pub fn create_crossing_event(
    track: &Track,
    section_id: &SectionId,
    event_type: EventType,
    point: &IntersectionPoint,
    offset: &RelativeOffsetCoordinate,
) -> Result<Event> {
    let detections = track.detections();
    let (previous, current) = match (
        detections.get(point.lower_index),
        detections.get(point.upper_index),
    ) {
        (Some(previous), Some(current)) => (previous, current),
        _ => {
            return Err(crate::TrackAnalysisError::InsufficientDetections {
                track_id: track.id().0.clone(),
                detection_count: detections.len(),
                minimum_required: point.upper_index + 1,
            })
        }
    };

    let previous_coordinate = previous.offset_coordinate(offset);
    let current_coordinate = current.offset_coordinate(offset);
    let r = point.relative_position;

    EventBuilder::for_track(track)
        .with_event_type(event_type)
        .with_section_id(section_id.clone())
        .with_direction_vector(DirectionVector::between(
            &previous_coordinate,
            &current_coordinate,
        ))
        .with_event_coordinate(current_coordinate)
        .with_interpolation(
            interpolate_occurrence(previous.occurrence, current.occurrence, r),
            interpolate_coordinate(&previous_coordinate, &current_coordinate, r),
        )
        .create_event(current)
}

/// Event anchored exactly at detection `index`, without interpolation.
///
/// The direction vector points from the previous detection, or towards the
/// next one for the first detection.
pub fn create_detection_event(
    track: &Track,
    section_id: &SectionId,
    event_type: EventType,
    index: usize,
    offset: &RelativeOffsetCoordinate,
) -> Result<Event> {
    let detections = track.detections();
    let current = detections.get(index).ok_or_else(|| {
        crate::TrackAnalysisError::InsufficientDetections {
            track_id: track.id().0.clone(),
            detection_count: detections.len(),
            minimum_required: index + 1,
        }
    })?;
    let (from, to) = if index == 0 {
        (0, 1.min(detections.len() - 1))
    } else {
        (index - 1, index)
    };
    let direction = DirectionVector::between(
        &detections[from].offset_coordinate(offset),
        &detections[to].offset_coordinate(offset),
    );

    EventBuilder::for_track(track)
        .with_event_type(event_type)
        .with_section_id(section_id.clone())
        .with_direction_vector(direction)
        .with_event_coordinate(current.offset_coordinate(offset))
        .create_event(current)
}

/// ENTER_SCENE at the first detection and LEAVE_SCENE at the last.
pub fn create_scene_events(
    track: &Track,
    enter_offset: &RelativeOffsetCoordinate,
    leave_offset: &RelativeOffsetCoordinate,
) -> Result<Vec<Event>> {
    let detections = track.detections();
    let last = detections.len() - 1;
    let base = EventBuilder::for_track(track);

    let first = &detections[0];
    let second = &detections[1.min(last)];
    let enter = base
        .clone()
        .with_event_type(EventType::EnterScene)
        .with_direction_vector(DirectionVector::between(
            &first.offset_coordinate(enter_offset),
            &second.offset_coordinate(enter_offset),
        ))
        .with_event_coordinate(first.offset_coordinate(enter_offset))
        .create_event(first)?;

    let final_detection = &detections[last];
    let before_final = &detections[last.saturating_sub(1)];
    let leave = base
        .with_event_type(EventType::LeaveScene)
        .with_direction_vector(DirectionVector::between(
            &before_final.offset_coordinate(leave_offset),
            &final_detection.offset_coordinate(leave_offset),
        ))
        .with_event_coordinate(final_detection.offset_coordinate(leave_offset))
        .create_event(final_detection)?;

    Ok(vec![enter, leave])
}

/// Stable sort by `(interpolated_occurrence, road_user_id)`.
pub fn sort_events(events: &mut [Event]) {
    events.sort_by(|a, b| {
        a.interpolated_occurrence
            .cmp(&b.interpolated_occurrence)
            .then_with(|| a.road_user_id.cmp(&b.road_user_id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn sample_track() -> Track {
        let detections = [(0.0, 0.0), (10.0, 0.0), (10.0, 0.0), (10.0, 20.0)]
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| {
                Detection::new(
                    x,
                    y,
                    0.0,
                    0.0,
                    "bicycle",
                    t0() + Duration::seconds(i as i64),
                    i as u32 + 1,
                    "cam7_2024-03-01_12-00-00.mp4",
                )
            })
            .collect();
        Track::new("42", "bicycle", detections).unwrap()
    }

    #[test]
    fn test_direction_vector_is_unit_length() {
        let pairs = [
            ((0.0, 0.0), (3.0, 4.0)),
            ((1.5, -2.0), (-7.25, 9.0)),
            ((100.0, 100.0), (100.0, 100.001)),
        ];
        for ((ax, ay), (bx, by)) in pairs {
            let v = DirectionVector::between(&Coordinate::new(ax, ay), &Coordinate::new(bx, by));
            assert!((v.magnitude() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_direction_vector_zero_for_coincident_points() {
        let p = Coordinate::new(4.0, 2.0);
        assert_eq!(DirectionVector::between(&p, &p), DirectionVector::ZERO);
    }

    #[test]
    fn test_interpolation_boundaries() {
        let a = t0();
        let b = t0() + Duration::milliseconds(333);
        assert_eq!(interpolate_occurrence(a, b, 0.0), a);
        assert_eq!(interpolate_occurrence(a, b, 1.0), b);
        assert_eq!(
            interpolate_occurrence(a, b, 0.5),
            a + Duration::microseconds(166_500)
        );

        let p = Coordinate::new(0.1, 0.7);
        let c = Coordinate::new(0.3, -2.9);
        assert_eq!(interpolate_coordinate(&p, &c, 0.0), p);
        assert_eq!(interpolate_coordinate(&p, &c, 1.0), c);
    }

    #[test]
    fn test_crossing_event_fields() {
        let track = sample_track();
        let point = IntersectionPoint {
            lower_index: 0,
            upper_index: 1,
            relative_position: 0.25,
        };
        let event = create_crossing_event(
            &track,
            &SectionId::new("s1"),
            EventType::SectionEnter,
            &point,
            &RelativeOffsetCoordinate::CENTER,
        )
        .unwrap();

        assert_eq!(event.road_user_id().as_str(), "42");
        assert_eq!(event.road_user_type(), "bicycle");
        assert_eq!(event.hostname(), "cam7");
        assert_eq!(event.section_id().unwrap().as_str(), "s1");
        // Raw values come from the upper detection
        assert_eq!(event.frame_number(), 2);
        assert_eq!(event.occurrence(), t0() + Duration::seconds(1));
        assert_eq!(event.event_coordinate(), Coordinate::new(10.0, 0.0));
        // Interpolated values sit a quarter of the way along the segment
        assert_eq!(
            event.interpolated_occurrence(),
            t0() + Duration::milliseconds(250)
        );
        assert_eq!(event.interpolated_event_coordinate(), Coordinate::new(2.5, 0.0));
        assert_eq!(event.direction_vector(), DirectionVector { x: 1.0, y: 0.0 });
    }

    #[test]
    fn test_crossing_event_out_of_range() {
        let track = sample_track();
        let point = IntersectionPoint {
            lower_index: 3,
            upper_index: 4,
            relative_position: 0.0,
        };
        assert!(create_crossing_event(
            &track,
            &SectionId::new("s1"),
            EventType::SectionEnter,
            &point,
            &RelativeOffsetCoordinate::CENTER,
        )
        .is_err());
    }

    #[test]
    fn test_detection_event_uses_raw_values() {
        let track = sample_track();
        let event = create_detection_event(
            &track,
            &SectionId::new("area"),
            EventType::SectionLeave,
            3,
            &RelativeOffsetCoordinate::CENTER,
        )
        .unwrap();
        assert_eq!(event.interpolated_occurrence(), event.occurrence());
        assert_eq!(
            event.interpolated_event_coordinate(),
            event.event_coordinate()
        );
        assert_eq!(event.direction_vector(), DirectionVector { x: 0.0, y: 1.0 });
    }

    #[test]
    fn test_builder_reports_missing_fields() {
        let track = sample_track();
        let detection = track.first_detection();

        let err = EventBuilder::new().create_event(detection).unwrap_err();
        assert!(err.to_string().contains("road_user_id"));

        let err = EventBuilder::for_track(&track)
            .with_event_type(EventType::SectionEnter)
            .with_direction_vector(DirectionVector::ZERO)
            .with_event_coordinate(Coordinate::new(0.0, 0.0))
            .create_event(detection)
            .unwrap_err();
        assert_eq!(
            err,
            crate::TrackAnalysisError::IncompleteBuilderSetup {
                missing: "section_id".to_string()
            }
        );

        // Scene events need no section
        let event = EventBuilder::for_track(&track)
            .with_event_type(EventType::EnterScene)
            .with_direction_vector(DirectionVector::ZERO)
            .with_event_coordinate(Coordinate::new(0.0, 0.0))
            .create_event(detection)
            .unwrap();
        assert!(event.section_id().is_none());
    }

    #[test]
    fn test_scene_events() {
        let track = sample_track();
        let events = create_scene_events(
            &track,
            &RelativeOffsetCoordinate::CENTER,
            &RelativeOffsetCoordinate::CENTER,
        )
        .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type(), EventType::EnterScene);
        assert_eq!(events[0].frame_number(), 1);
        assert_eq!(events[0].direction_vector(), DirectionVector { x: 1.0, y: 0.0 });
        assert_eq!(events[1].event_type(), EventType::LeaveScene);
        assert_eq!(events[1].frame_number(), 4);
        assert_eq!(events[1].direction_vector(), DirectionVector { x: 0.0, y: 1.0 });
    }

    #[test]
    fn test_hostname_from_video_name() {
        assert_eq!(hostname_from_video_name("cam01_2024-05-01_08-00-00.mp4"), "cam01");
        assert_eq!(hostname_from_video_name("/data/videos/cam02_x.mp4"), "cam02");
        assert_eq!(hostname_from_video_name("plain.mp4"), "plain");
        assert_eq!(hostname_from_video_name("noext"), "noext");
    }

    #[test]
    fn test_sort_events_by_interpolated_occurrence() {
        let track = sample_track();
        let mut events = create_scene_events(
            &track,
            &RelativeOffsetCoordinate::CENTER,
            &RelativeOffsetCoordinate::CENTER,
        )
        .unwrap();
        events.reverse();
        sort_events(&mut events);
        assert_eq!(events[0].event_type(), EventType::EnterScene);
    }
}
