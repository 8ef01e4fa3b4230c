//! Section data model: counting lines and areas used as detectors.
//!
//! Sections are validated at construction; the solver never sees a
//! degenerate line or an open polygon.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackAnalysisError};
use crate::events::EventType;
use crate::{Coordinate, RelativeOffsetCoordinate};

/// Minimum number of coordinates of a line section.
pub const MIN_LINE_COORDINATES: usize = 2;
/// Minimum number of coordinates of an area (closed ring, first == last).
pub const MIN_AREA_COORDINATES: usize = 4;

/// Unique identifier of a section.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SectionId(pub String);

impl SectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Offsets applied when none are configured on the section.
fn default_offsets() -> HashMap<EventType, RelativeOffsetCoordinate> {
    HashMap::from([
        (EventType::SectionEnter, RelativeOffsetCoordinate::CENTER),
        (EventType::SectionLeave, RelativeOffsetCoordinate::CENTER),
    ])
}

fn validate_common(
    id: &SectionId,
    coordinates: &[Coordinate],
    offsets: &HashMap<EventType, RelativeOffsetCoordinate>,
) -> Result<()> {
    if let Some(c) = coordinates.iter().find(|c| !c.is_valid()) {
        return Err(TrackAnalysisError::InvalidSection {
            section_id: id.0.clone(),
            message: format!("coordinate ({}, {}) is not finite", c.x, c.y),
        });
    }
    if let Some(offset) = offsets.values().find(|o| !o.is_valid()) {
        return Err(TrackAnalysisError::InvalidOffset {
            x: offset.x,
            y: offset.y,
        });
    }
    Ok(())
}

/// An open polyline counting line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineSection {
    id: SectionId,
    name: String,
    coordinates: Vec<Coordinate>,
    #[serde(default = "default_offsets")]
    relative_offset_coordinates: HashMap<EventType, RelativeOffsetCoordinate>,
}

impl LineSection {
    /// Create a line section with centered offsets.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        coordinates: Vec<Coordinate>,
    ) -> Result<Self> {
        Self::with_offsets(id, name, coordinates, default_offsets())
    }

    /// Create a line section with explicit per-event-type offsets.
    pub fn with_offsets(
        id: impl Into<String>,
        name: impl Into<String>,
        coordinates: Vec<Coordinate>,
        relative_offset_coordinates: HashMap<EventType, RelativeOffsetCoordinate>,
    ) -> Result<Self> {
        let section = Self {
            id: SectionId::new(id),
            name: name.into(),
            coordinates,
            relative_offset_coordinates,
        };
        section.validate()?;
        Ok(section)
    }

    /// Check the line invariants: at least two finite coordinates that do not
    /// collapse into a single point.
    pub fn validate(&self) -> Result<()> {
        validate_common(&self.id, &self.coordinates, &self.relative_offset_coordinates)?;
        if self.coordinates.len() < MIN_LINE_COORDINATES {
            return Err(TrackAnalysisError::InvalidSection {
                section_id: self.id.0.clone(),
                message: format!(
                    "line has {} coordinates, minimum {} required",
                    self.coordinates.len(),
                    MIN_LINE_COORDINATES
                ),
            });
        }
        let first = self.coordinates[0];
        if self.coordinates.iter().all(|c| *c == first) {
            return Err(TrackAnalysisError::InvalidSection {
                section_id: self.id.0.clone(),
                message: "line coordinates collapse to a single point".to_string(),
            });
        }
        Ok(())
    }

    pub fn id(&self) -> &SectionId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn coordinates(&self) -> &[Coordinate] {
        &self.coordinates
    }
}

/// A closed polygon area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaSection {
    id: SectionId,
    name: String,
    coordinates: Vec<Coordinate>,
    #[serde(default = "default_offsets")]
    relative_offset_coordinates: HashMap<EventType, RelativeOffsetCoordinate>,
}

impl AreaSection {
    /// Create an area with centered offsets.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        coordinates: Vec<Coordinate>,
    ) -> Result<Self> {
        Self::with_offsets(id, name, coordinates, default_offsets())
    }

    /// Create an area with explicit per-event-type offsets.
    pub fn with_offsets(
        id: impl Into<String>,
        name: impl Into<String>,
        coordinates: Vec<Coordinate>,
        relative_offset_coordinates: HashMap<EventType, RelativeOffsetCoordinate>,
    ) -> Result<Self> {
        let section = Self {
            id: SectionId::new(id),
            name: name.into(),
            coordinates,
            relative_offset_coordinates,
        };
        section.validate()?;
        Ok(section)
    }

    /// Check the area invariants: at least four finite coordinates forming a
    /// closed ring.
    pub fn validate(&self) -> Result<()> {
        validate_common(&self.id, &self.coordinates, &self.relative_offset_coordinates)?;
        if self.coordinates.len() < MIN_AREA_COORDINATES {
            return Err(TrackAnalysisError::InvalidSection {
                section_id: self.id.0.clone(),
                message: format!(
                    "area has {} coordinates, minimum {} required",
                    self.coordinates.len(),
                    MIN_AREA_COORDINATES
                ),
            });
        }
        if self.coordinates.first() != self.coordinates.last() {
            return Err(TrackAnalysisError::InvalidSection {
                section_id: self.id.0.clone(),
                message: "area is not closed (first coordinate != last coordinate)".to_string(),
            });
        }
        Ok(())
    }

    pub fn id(&self) -> &SectionId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn coordinates(&self) -> &[Coordinate] {
        &self.coordinates
    }
}

/// A geometric detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Section {
    Line(LineSection),
    Area(AreaSection),
}

impl Section {
    pub fn id(&self) -> &SectionId {
        match self {
            Section::Line(line) => &line.id,
            Section::Area(area) => &area.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Section::Line(line) => &line.name,
            Section::Area(area) => &area.name,
        }
    }

    pub fn coordinates(&self) -> &[Coordinate] {
        match self {
            Section::Line(line) => &line.coordinates,
            Section::Area(area) => &area.coordinates,
        }
    }

    fn offsets(&self) -> &HashMap<EventType, RelativeOffsetCoordinate> {
        match self {
            Section::Line(line) => &line.relative_offset_coordinates,
            Section::Area(area) => &area.relative_offset_coordinates,
        }
    }

    /// Offset configured for `event_type`, if any.
    pub fn offset(&self, event_type: EventType) -> Option<RelativeOffsetCoordinate> {
        self.offsets().get(&event_type).copied()
    }

    /// Offset used to project tracks against this section.
    pub fn enter_offset_or(&self, fallback: RelativeOffsetCoordinate) -> RelativeOffsetCoordinate {
        self.offset(EventType::SectionEnter).unwrap_or(fallback)
    }

    /// Re-check construction invariants (useful after deserialization).
    pub fn validate(&self) -> Result<()> {
        match self {
            Section::Line(line) => line.validate(),
            Section::Area(area) => area.validate(),
        }
    }
}

/// Check every section's geometry and that section ids are unique.
///
/// Section geometry is memoized by id, so a repeated id would shadow the
/// later section.
pub fn validate_sections(sections: &[Section]) -> Result<()> {
    let mut seen = HashSet::new();
    for section in sections {
        section.validate()?;
        if !seen.insert(section.id()) {
            return Err(TrackAnalysisError::InvalidSection {
                section_id: section.id().0.clone(),
                message: "duplicate section id".to_string(),
            });
        }
    }
    Ok(())
}

/// Split sections into line sections and areas, preserving order.
pub fn separate_sections(sections: &[Section]) -> (Vec<&LineSection>, Vec<&AreaSection>) {
    let mut lines = Vec::new();
    let mut areas = Vec::new();
    for section in sections {
        match section {
            Section::Line(line) => lines.push(line),
            Section::Area(area) => areas.push(area),
        }
    }
    (lines, areas)
}
