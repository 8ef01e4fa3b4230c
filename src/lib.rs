//! # Trackflow
//!
//! Trajectory/section intersection and flow counting for road-user tracks.
//!
//! This library provides:
//! - A geometry kernel over `geo` types (intersections, containment, splitting)
//! - Track projection into polylines with cumulative arc-length tables
//! - Line-section crossing and area-section containment detection
//! - Event synthesis with sub-segment interpolation of time and position
//! - Parallel batch execution over large track collections
//! - Flow assignment and traffic counting
//!
//! ## Features
//!
//! - **`parallel`** - Run intersection batches on a rayon worker pool (default)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use trackflow::{
//!     AnalysisConfig, AnalysisEngine, Coordinate, Detection, LineSection, Section,
//!     SectionRepository, Track, TrackDataset,
//! };
//!
//! let start = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
//! let detections: Vec<Detection> = (0..5)
//!     .map(|i| {
//!         Detection::new(
//!             i as f64 * 10.0, 0.0, 0.0, 0.0,
//!             "car", start + chrono::Duration::seconds(i), i as u32 + 1, "cam01_2024-05-01.mp4",
//!         )
//!     })
//!     .collect();
//! let track = Track::new("1", "car", detections).unwrap();
//!
//! let line = LineSection::new(
//!     "north",
//!     "North",
//!     vec![Coordinate::new(5.0, -5.0), Coordinate::new(5.0, 5.0)],
//! )
//! .unwrap();
//!
//! let engine = AnalysisEngine::new(AnalysisConfig::default()).unwrap();
//! let events = engine
//!     .create_events(
//!         &TrackDataset::new(vec![track]),
//!         &SectionRepository::new(vec![Section::Line(line)]),
//!     )
//!     .unwrap();
//! assert!(!events.is_empty());
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use geo::Coord;
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{OptionExt, Result, TrackAnalysisError};

// Geometry kernel (intersections, containment, splitting)
pub mod geometry;
pub use geometry::{
    are_coordinates_within_polygon, distance_between, line_intersects_line,
    line_intersects_polygon, split_line_with_line,
};

// Section data model
pub mod section;
pub use section::{separate_sections, validate_sections, AreaSection, LineSection, Section, SectionId};

// Track/section projection and per-batch caching
pub mod cache;
pub use cache::GeometryCache;

pub mod projection;
pub use projection::{
    group_sections_by_offset, project_section, project_track, OffsetGroup, ProjectedTrack,
    SectionGeometry,
};

// Events and their synthesis
pub mod events;
pub use events::{
    create_scene_events, sort_events, DirectionVector, Event, EventBuilder, EventType,
};

// Intersection/containment solver
pub mod intersect;
pub use intersect::{
    cut_track_with_section, intersect_batch, intersect_track, tracks_intersecting_sections,
    IntersectionPoint,
};

// Read contracts for tracks, sections and flows
pub mod providers;
pub use providers::{
    FlowProvider, FlowRepository, SectionProvider, SectionRepository, TrackDataset,
    TrackProvider,
};

// Parallel batch execution
pub mod strategy;
pub use strategy::{BatchStrategy, TrackBatch};

// Flow assignment and counting
pub mod assignment;
pub use assignment::{
    assign_road_users, EventFilter, EventPair, Flow, FlowId, FlowSelectionPolicy, FlowSelector,
    RoadUserAssignment,
};

pub mod counting;
pub use counting::{count_assignments, Count, CountTag, CountingSpec};

// Configuration
pub mod config;
pub use config::AnalysisConfig;

// End-to-end analysis runs
pub mod engine;
pub use engine::{AnalysisEngine, AnalysisResult, AnalysisStats};

// ============================================================================
// Core Types
// ============================================================================

/// A 2D coordinate in image or world space.
///
/// # Example
/// ```
/// use trackflow::Coordinate;
/// let c = Coordinate::new(3.0, 4.0);
/// assert!(c.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
}

impl Coordinate {
    /// Create a new coordinate.
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Create a coordinate, rejecting NaN and infinite components.
    pub fn try_new(x: f64, y: f64) -> Result<Self> {
        let coordinate = Self { x, y };
        if !coordinate.is_valid() {
            return Err(TrackAnalysisError::InvalidCoordinate {
                message: format!("({}, {}) is not finite", x, y),
            });
        }
        Ok(coordinate)
    }

    /// Check that both components are finite.
    pub fn is_valid(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<Coordinate> for Coord<f64> {
    fn from(c: Coordinate) -> Self {
        Coord { x: c.x, y: c.y }
    }
}

impl From<Coord<f64>> for Coordinate {
    fn from(c: Coord<f64>) -> Self {
        Coordinate::new(c.x, c.y)
    }
}

/// A point inside a detection's bounding box, relative to its size.
///
/// `(0.0, 0.0)` is the box origin, `(1.0, 1.0)` the opposite corner and
/// `(0.5, 0.5)` the center.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelativeOffsetCoordinate {
    pub x: f64,
    pub y: f64,
}

impl RelativeOffsetCoordinate {
    /// Center of the bounding box.
    pub const CENTER: RelativeOffsetCoordinate = RelativeOffsetCoordinate { x: 0.5, y: 0.5 };

    /// Create an offset, rejecting components outside [0, 1].
    pub fn new(x: f64, y: f64) -> Result<Self> {
        let offset = Self { x, y };
        if !offset.is_valid() {
            return Err(TrackAnalysisError::InvalidOffset { x, y });
        }
        Ok(offset)
    }

    pub fn is_valid(&self) -> bool {
        (0.0..=1.0).contains(&self.x) && (0.0..=1.0).contains(&self.y)
    }
}

impl Default for RelativeOffsetCoordinate {
    fn default() -> Self {
        Self::CENTER
    }
}

// Offsets are validated to [0, 1], so bitwise equality is well defined once
// negative zero is folded into positive zero.
impl Eq for RelativeOffsetCoordinate {}

impl Hash for RelativeOffsetCoordinate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.x + 0.0).to_bits().hash(state);
        (self.y + 0.0).to_bits().hash(state);
    }
}

/// Unique identifier of a track (road user).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(pub String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// One timestamped bounding-box observation of a road user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Bounding box origin
    pub x: f64,
    pub y: f64,
    /// Bounding box width (>= 0)
    pub w: f64,
    /// Bounding box height (>= 0)
    pub h: f64,
    /// Classification label reported by the detector
    pub classification: String,
    /// Occurrence timestamp
    pub occurrence: DateTime<Utc>,
    /// Frame number within the source video
    pub frame: u32,
    /// Source video identifier
    pub video_name: String,
    /// Inserted by upstream gap filling rather than observed
    pub interpolated: bool,
}

impl Detection {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        x: f64,
        y: f64,
        w: f64,
        h: f64,
        classification: impl Into<String>,
        occurrence: DateTime<Utc>,
        frame: u32,
        video_name: impl Into<String>,
    ) -> Self {
        Self {
            x,
            y,
            w,
            h,
            classification: classification.into(),
            occurrence,
            frame,
            video_name: video_name.into(),
            interpolated: false,
        }
    }

    /// Mark the detection as synthetic (inserted by gap filling).
    pub fn interpolated(mut self, interpolated: bool) -> Self {
        self.interpolated = interpolated;
        self
    }

    /// Check bounding box values: finite, non-negative size.
    pub fn is_valid(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.w.is_finite()
            && self.h.is_finite()
            && self.w >= 0.0
            && self.h >= 0.0
    }

    /// Point of the bounding box selected by `offset`.
    #[inline]
    pub fn offset_coordinate(&self, offset: &RelativeOffsetCoordinate) -> Coordinate {
        Coordinate::new(self.x + self.w * offset.x, self.y + self.h * offset.y)
    }
}

/// A road user's trajectory: ordered detections sharing one identity.
///
/// Deserialization goes through [`Track::new`], so JSON input is validated
/// the same way as tracks built in code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTrack")]
pub struct Track {
    id: TrackId,
    classification: String,
    detections: Vec<Detection>,
}

#[derive(Deserialize)]
struct RawTrack {
    id: TrackId,
    classification: String,
    detections: Vec<Detection>,
}

impl TryFrom<RawTrack> for Track {
    type Error = TrackAnalysisError;

    fn try_from(raw: RawTrack) -> Result<Self> {
        Track::new(raw.id.0, raw.classification, raw.detections)
    }
}

impl Track {
    /// Create a track, validating its detections.
    ///
    /// Detections must be non-empty, have valid bounding boxes and
    /// non-decreasing occurrence timestamps.
    pub fn new(
        id: impl Into<String>,
        classification: impl Into<String>,
        detections: Vec<Detection>,
    ) -> Result<Self> {
        let id = TrackId::new(id);
        if detections.is_empty() {
            return Err(TrackAnalysisError::InsufficientDetections {
                track_id: id.0,
                detection_count: 0,
                minimum_required: 1,
            });
        }
        if let Some(index) = detections.iter().position(|d| !d.is_valid()) {
            return Err(TrackAnalysisError::InvalidTrack {
                track_id: id.0,
                message: format!("detection {} has an invalid bounding box", index),
            });
        }
        if let Some(index) = detections
            .windows(2)
            .position(|w| w[1].occurrence < w[0].occurrence)
        {
            return Err(TrackAnalysisError::InvalidTrack {
                track_id: id.0,
                message: format!("detection {} occurs before its predecessor", index + 1),
            });
        }

        Ok(Self {
            id,
            classification: classification.into(),
            detections,
        })
    }

    pub fn id(&self) -> &TrackId {
        &self.id
    }

    pub fn classification(&self) -> &str {
        &self.classification
    }

    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }

    pub fn first_detection(&self) -> &Detection {
        &self.detections[0]
    }

    pub fn last_detection(&self) -> &Detection {
        &self.detections[self.detections.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    /// Whether the solver can use this track (at least two detections).
    pub fn is_usable(&self) -> bool {
        self.detections.len() >= 2
    }
}

// ============================================================================
// Tests
// ============================================================================
