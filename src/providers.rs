//! Read contracts for the analysis inputs, with in-memory implementations.
//!
//! Tracks, sections and flows are loaded elsewhere and handed over read-only.
//! The providers are `Send + Sync` so batches running on worker threads can
//! resolve tracks from a shared dataset without locking.

use std::collections::HashMap;

use log::warn;

use crate::assignment::Flow;
use crate::error::{Result, TrackAnalysisError};
use crate::projection::{group_sections_by_offset, OffsetGroup};
use crate::section::{validate_sections, Section};
use crate::{RelativeOffsetCoordinate, Track, TrackId};

/// Source of tracks for an analysis run.
pub trait TrackProvider: Send + Sync {
    /// Ids of all tracks with at least two detections, in dataset order.
    fn usable_track_ids(&self) -> Vec<TrackId>;

    /// Track lookup by id.
    fn get(&self, id: &TrackId) -> Option<&Track>;
}

/// Source of sections for an analysis run.
pub trait SectionProvider: Send + Sync {
    fn sections(&self) -> &[Section];

    /// Sections grouped by enter offset, `fallback` for sections without one.
    fn grouped_by_offset(&self, fallback: RelativeOffsetCoordinate) -> Vec<OffsetGroup<'_>> {
        group_sections_by_offset(self.sections(), fallback)
    }
}

/// Source of flow definitions.
pub trait FlowProvider: Send + Sync {
    fn flows(&self) -> &[Flow];
}

// ============================================================================
// In-memory implementations
// ============================================================================

/// Tracks held in memory, indexed by id.
#[derive(Debug, Clone, Default)]
pub struct TrackDataset {
    tracks: Vec<Track>,
    index: HashMap<TrackId, usize>,
}

impl TrackDataset {
    /// Build a dataset. A repeated track id keeps the first track.
    pub fn new(tracks: Vec<Track>) -> Self {
        let mut dataset = Self::default();
        for track in tracks {
            dataset.add(track);
        }
        dataset
    }

    /// Add a track unless its id is already present. Returns whether it was added.
    pub fn add(&mut self, track: Track) -> bool {
        if self.index.contains_key(track.id()) {
            warn!("[Dataset] Ignoring duplicate track id {}", track.id());
            return false;
        }
        self.index.insert(track.id().clone(), self.tracks.len());
        self.tracks.push(track);
        true
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

impl TrackProvider for TrackDataset {
    fn usable_track_ids(&self) -> Vec<TrackId> {
        self.tracks
            .iter()
            .filter(|t| t.is_usable())
            .map(|t| t.id().clone())
            .collect()
    }

    fn get(&self, id: &TrackId) -> Option<&Track> {
        self.index.get(id).map(|&i| &self.tracks[i])
    }
}

/// Sections held in memory.
#[derive(Debug, Clone, Default)]
pub struct SectionRepository {
    sections: Vec<Section>,
}

impl SectionRepository {
    pub fn new(sections: Vec<Section>) -> Self {
        Self { sections }
    }

    /// Parse a JSON array of sections, validating each one.
    pub fn from_json(json: &str) -> Result<Self> {
        let sections: Vec<Section> =
            serde_json::from_str(json).map_err(|e| TrackAnalysisError::InvalidSection {
                section_id: String::new(),
                message: format!("malformed section JSON: {}", e),
            })?;
        let repository = Self::new(sections);
        repository.validate()?;
        Ok(repository)
    }

    /// Check every section's geometry and that section ids are unique.
    pub fn validate(&self) -> Result<()> {
        validate_sections(&self.sections)
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

impl SectionProvider for SectionRepository {
    fn sections(&self) -> &[Section] {
        &self.sections
    }
}

/// Flows held in memory.
#[derive(Debug, Clone, Default)]
pub struct FlowRepository {
    flows: Vec<Flow>,
}

impl FlowRepository {
    pub fn new(flows: Vec<Flow>) -> Self {
        Self { flows }
    }

    /// Parse a JSON array of flows.
    pub fn from_json(json: &str) -> Result<Self> {
        let flows: Vec<Flow> = serde_json::from_str(json).map_err(|e| {
            TrackAnalysisError::ConfigError {
                message: format!("malformed flow JSON: {}", e),
            }
        })?;
        Ok(Self::new(flows))
    }
}

impl FlowProvider for FlowRepository {
    fn flows(&self) -> &[Flow] {
        &self.flows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Detection, SectionId};
    use chrono::{TimeZone, Utc};

    fn track(id: &str, detections: usize) -> Track {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let detections = (0..detections)
            .map(|i| {
                Detection::new(
                    i as f64,
                    0.0,
                    1.0,
                    1.0,
                    "bicycle",
                    t0 + chrono::Duration::seconds(i as i64),
                    i as u32 + 1,
                    "cam_1.mp4",
                )
            })
            .collect();
        Track::new(id, "bicycle", detections).unwrap()
    }

    #[test]
    fn test_usable_tracks_skip_single_detection() {
        let dataset = TrackDataset::new(vec![track("1", 3), track("2", 1), track("3", 2)]);
        let ids: Vec<TrackId> = dataset.usable_track_ids();
        assert_eq!(ids, vec![TrackId::new("1"), TrackId::new("3")]);
        assert!(dataset.get(&TrackId::new("2")).is_some());
        assert!(dataset.get(&TrackId::new("9")).is_none());
    }

    #[test]
    fn test_duplicate_track_keeps_first() {
        let mut dataset = TrackDataset::new(vec![track("1", 3)]);
        assert!(!dataset.add(track("1", 5)));
        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.get(&TrackId::new("1")).unwrap().len(), 3);
    }

    #[test]
    fn test_sections_from_json() {
        let json = r#"[
            {"type": "line", "id": "n", "name": "North",
             "coordinates": [{"x": 0.0, "y": 0.0}, {"x": 0.0, "y": 5.0}]},
            {"type": "area", "id": "a", "name": "Plaza",
             "coordinates": [{"x": 0.0, "y": 0.0}, {"x": 0.0, "y": 1.0},
                             {"x": 1.0, "y": 1.0}, {"x": 0.0, "y": 0.0}]}
        ]"#;
        let repository = SectionRepository::from_json(json).unwrap();
        assert_eq!(repository.len(), 2);
        assert_eq!(repository.sections()[1].id(), &SectionId::new("a"));
    }

    #[test]
    fn test_sections_from_json_rejects_open_area() {
        let json = r#"[
            {"type": "area", "id": "a", "name": "Open",
             "coordinates": [{"x": 0.0, "y": 0.0}, {"x": 0.0, "y": 1.0},
                             {"x": 1.0, "y": 1.0}, {"x": 2.0, "y": 0.0}]}
        ]"#;
        assert!(matches!(
            SectionRepository::from_json(json),
            Err(TrackAnalysisError::InvalidSection { .. })
        ));
    }

    #[test]
    fn test_duplicate_section_ids_rejected() {
        let json = r#"[
            {"type": "line", "id": "n", "name": "A",
             "coordinates": [{"x": 0.0, "y": 0.0}, {"x": 0.0, "y": 5.0}]},
            {"type": "line", "id": "n", "name": "B",
             "coordinates": [{"x": 1.0, "y": 0.0}, {"x": 1.0, "y": 5.0}]}
        ]"#;
        let err = SectionRepository::from_json(json).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }
}
