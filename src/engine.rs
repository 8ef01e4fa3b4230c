//! # Analysis Engine
//!
//! Runs a complete analysis from one [`AnalysisConfig`]:
//! - Section events for every usable track, solved in parallel batches
//! - Optional scene enter/leave events per track
//! - A global sort by `(interpolated_occurrence, road_user_id)`
//! - Flow assignment with the configured selection policy
//! - Counting with the configured grouping
//!
//! The engine holds no analysis state between calls; every run starts from
//! the providers it is given.

use std::time::Instant;

use log::info;
use serde::Serialize;

use crate::assignment::{assign_road_users, EventFilter, RoadUserAssignment};
use crate::config::AnalysisConfig;
use crate::counting::{count_assignments, Count};
use crate::error::Result;
use crate::events::{create_scene_events, sort_events, Event, EventType};
use crate::intersect::intersect_batch;
use crate::providers::{FlowProvider, SectionProvider, TrackProvider};
use crate::strategy::BatchStrategy;

/// Output of [`AnalysisEngine::analyze`].
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub events: Vec<Event>,
    pub assignments: Vec<RoadUserAssignment>,
    #[serde(skip)]
    pub count: Count,
    pub stats: AnalysisStats,
}

/// Sizes and timings of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisStats {
    pub track_count: usize,
    pub section_count: usize,
    pub event_count: usize,
    pub assignment_count: usize,
    pub events_ms: u64,
    pub assignment_ms: u64,
    pub counting_ms: u64,
}

/// Orchestrates event creation, flow assignment and counting.
#[derive(Debug, Clone)]
pub struct AnalysisEngine {
    config: AnalysisConfig,
    strategy: BatchStrategy,
}

impl AnalysisEngine {
    /// Create an engine, validating `config`.
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        config.validate()?;
        let strategy = BatchStrategy::new(config.num_workers)
            .with_default_offset(config.offset_for(EventType::SectionEnter))
            .with_cache_capacity(config.cache_capacity);
        Ok(Self { config, strategy })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// All events of a run, sorted by `(interpolated_occurrence, road_user_id)`.
    pub fn create_events<T, S>(&self, tracks: &T, sections: &S) -> Result<Vec<Event>>
    where
        T: TrackProvider + ?Sized,
        S: SectionProvider + ?Sized,
    {
        self.create_events_with_progress(tracks, sections, None)
    }

    /// Like [`Self::create_events`], reporting finished tracks per batch.
    pub fn create_events_with_progress<T, S>(
        &self,
        tracks: &T,
        sections: &S,
        progress: Option<&(dyn Fn(usize) + Sync)>,
    ) -> Result<Vec<Event>>
    where
        T: TrackProvider + ?Sized,
        S: SectionProvider + ?Sized,
    {
        let start = Instant::now();
        let mut events = self
            .strategy
            .execute(intersect_batch, tracks, sections.sections(), progress)?;
        let section_events = events.len();

        if self.config.include_scene_events {
            let enter = self.config.offset_for(EventType::EnterScene);
            let leave = self.config.offset_for(EventType::LeaveScene);
            for id in tracks.usable_track_ids() {
                if let Some(track) = tracks.get(&id) {
                    events.extend(create_scene_events(track, &enter, &leave)?);
                }
            }
        }

        sort_events(&mut events);

        info!(
            "[Engine] Created {} events ({} section, {} scene) in {}ms",
            events.len(),
            section_events,
            events.len() - section_events,
            start.elapsed().as_millis()
        );
        Ok(events)
    }

    /// Match road users to flows with the configured policy.
    pub fn assign<F>(&self, events: &[Event], flows: &F, filter: &EventFilter) -> Vec<RoadUserAssignment>
    where
        F: FlowProvider + ?Sized,
    {
        assign_road_users(
            events,
            flows.flows(),
            filter,
            &self.config.flow_selection_policy,
        )
    }

    /// Count assignments with the configured grouping.
    pub fn count<F>(&self, assignments: &[RoadUserAssignment], flows: &F) -> Result<Count>
    where
        F: FlowProvider + ?Sized,
    {
        count_assignments(assignments, flows.flows(), &self.config.counting)
    }

    /// Events, assignments and counts in one run.
    pub fn analyze<T, S, F>(
        &self,
        tracks: &T,
        sections: &S,
        flows: &F,
        filter: &EventFilter,
    ) -> Result<AnalysisResult>
    where
        T: TrackProvider + ?Sized,
        S: SectionProvider + ?Sized,
        F: FlowProvider + ?Sized,
    {
        let mut stats = AnalysisStats {
            track_count: tracks.usable_track_ids().len(),
            section_count: sections.sections().len(),
            ..AnalysisStats::default()
        };

        let phase = Instant::now();
        let events = self.create_events(tracks, sections)?;
        stats.events_ms = phase.elapsed().as_millis() as u64;

        let phase = Instant::now();
        let assignments = self.assign(&events, flows, filter);
        stats.assignment_ms = phase.elapsed().as_millis() as u64;

        let phase = Instant::now();
        let count = self.count(&assignments, flows)?;
        stats.counting_ms = phase.elapsed().as_millis() as u64;

        stats.event_count = events.len();
        stats.assignment_count = assignments.len();
        info!(
            "[Engine] Analysis done: {} tracks, {} events, {} assignments ({}ms / {}ms / {}ms)",
            stats.track_count,
            stats.event_count,
            stats.assignment_count,
            stats.events_ms,
            stats.assignment_ms,
            stats.counting_ms
        );

        Ok(AnalysisResult {
            events,
            assignments,
            count,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::Flow;
    use crate::counting::CountTag;
    use crate::providers::{FlowRepository, SectionRepository, TrackDataset};
    use crate::section::{LineSection, Section, SectionId};
    use crate::{Coordinate, Detection, Track, TrackAnalysisError};
    use chrono::{Duration, TimeZone, Utc};

    fn eastbound(id: &str, start_second: i64) -> Track {
        let t0 = Utc.with_ymd_and_hms(2024, 7, 3, 6, 0, 0).unwrap() + Duration::seconds(start_second);
        let detections = (0..6)
            .map(|i| {
                Detection::new(
                    i as f64 * 10.0,
                    0.0,
                    0.0,
                    0.0,
                    "car",
                    t0 + Duration::seconds(i),
                    i as u32 + 1,
                    "cam4_2024-07-03_06-00-00.mp4",
                )
            })
            .collect();
        Track::new(id, "car", detections).unwrap()
    }

    fn gate(id: &str, x: f64) -> Section {
        Section::Line(
            LineSection::new(
                id,
                id,
                vec![Coordinate::new(x, -5.0), Coordinate::new(x, 5.0)],
            )
            .unwrap(),
        )
    }

    fn setup() -> (TrackDataset, SectionRepository, FlowRepository) {
        let tracks = TrackDataset::new(vec![eastbound("1", 0), eastbound("2", 2)]);
        let sections = SectionRepository::new(vec![gate("west", 5.0), gate("east", 45.0)]);
        let flows = FlowRepository::new(vec![
            Flow::new("we", "West to East", SectionId::new("west"), SectionId::new("east")),
            Flow::new("ew", "East to West", SectionId::new("east"), SectionId::new("west")),
        ]);
        (tracks, sections, flows)
    }

    #[test]
    fn test_create_events_sorted_with_scene_events() {
        let (tracks, sections, _) = setup();
        let engine = AnalysisEngine::new(AnalysisConfig::default().with_num_workers(2)).unwrap();
        let events = engine.create_events(&tracks, &sections).unwrap();

        // 2 crossings + 2 scene events per track
        assert_eq!(events.len(), 8);
        let times: Vec<_> = events.iter().map(|e| e.interpolated_occurrence()).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(events[0].event_type(), EventType::EnterScene);
    }

    #[test]
    fn test_scene_events_can_be_disabled() {
        let (tracks, sections, _) = setup();
        let config = AnalysisConfig::default().with_scene_events(false);
        let events = AnalysisEngine::new(config)
            .unwrap()
            .create_events(&tracks, &sections)
            .unwrap();
        assert_eq!(events.len(), 4);
        assert!(events.iter().all(|e| e.event_type() == EventType::SectionEnter));
    }

    #[test]
    fn test_analyze_counts_flows() {
        let (tracks, sections, flows) = setup();
        let engine = AnalysisEngine::new(AnalysisConfig::default()).unwrap();
        let result = engine
            .analyze(&tracks, &sections, &flows, &EventFilter::new())
            .unwrap();

        assert_eq!(result.assignments.len(), 2);
        assert_eq!(result.count.get(&CountTag::for_flow("we".into())), 2);
        assert_eq!(result.count.get(&CountTag::for_flow("ew".into())), 0);
        assert_eq!(result.stats.track_count, 2);
        assert_eq!(result.stats.event_count, 8);
    }

    #[test]
    fn test_duplicate_section_ids_rejected() {
        let (tracks, _, _) = setup();
        let sections = SectionRepository::new(vec![gate("s", 50.0), gate("s", 5.0)]);
        let engine = AnalysisEngine::new(AnalysisConfig::default()).unwrap();
        match engine.create_events(&tracks, &sections) {
            Err(TrackAnalysisError::InvalidSection { section_id, .. }) => {
                assert_eq!(section_id, "s")
            }
            other => panic!("expected InvalidSection, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = AnalysisConfig::default().with_num_workers(0);
        assert!(matches!(
            AnalysisEngine::new(config),
            Err(TrackAnalysisError::ConfigError { .. })
        ));
    }
}
