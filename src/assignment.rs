//! # Flow Assignment
//!
//! Matches each road user's section events against flow definitions.
//!
//! ## Algorithm
//! 1. Keep SECTION_ENTER events accepted by the [`EventFilter`]
//! 2. Group them per road user, stable-sorted by interpolated occurrence
//! 3. Every ordered pair `(events[i], events[j])` with `i < j` is a candidate
//!    for each flow whose start and end sections match the pair exactly
//! 4. A [`FlowSelector`] picks which candidates become assignments

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use crate::events::{Event, EventType};
use crate::section::SectionId;
use crate::TrackId;

/// Unique identifier of a flow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowId(pub String);

impl FlowId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FlowId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A named journey from a start section to an end section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub id: FlowId,
    pub name: String,
    pub start: SectionId,
    pub end: SectionId,
    /// Travel distance between the sections, if known
    #[serde(default)]
    pub distance: Option<f64>,
}

impl Flow {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        start: SectionId,
        end: SectionId,
    ) -> Self {
        Self {
            id: FlowId::new(id),
            name: name.into(),
            start,
            end,
            distance: None,
        }
    }

    pub fn with_distance(mut self, distance: f64) -> Self {
        self.distance = Some(distance);
        self
    }
}

/// The start and end events justifying a flow match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventPair {
    pub start: Event,
    pub end: Event,
}

impl EventPair {
    /// Time between the interpolated occurrences of start and end.
    pub fn duration(&self) -> Duration {
        self.end.interpolated_occurrence() - self.start.interpolated_occurrence()
    }
}

/// A road user matched to a flow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoadUserAssignment {
    pub road_user_id: TrackId,
    pub road_user_type: String,
    pub flow: Flow,
    pub events: EventPair,
}

/// Chooses which candidate assignments of one road user are kept.
///
/// Candidates arrive in pair order (by start event, then end event).
pub trait FlowSelector {
    fn select(&self, candidates: Vec<RoadUserAssignment>) -> Vec<RoadUserAssignment>;
}

/// Built-in selection policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowSelectionPolicy {
    /// Keep the candidate with the longest duration (first one on ties)
    #[default]
    MaxDuration,
    /// Keep every candidate
    AllMatches,
}

impl FlowSelector for FlowSelectionPolicy {
    fn select(&self, candidates: Vec<RoadUserAssignment>) -> Vec<RoadUserAssignment> {
        match self {
            FlowSelectionPolicy::AllMatches => candidates,
            FlowSelectionPolicy::MaxDuration => {
                let mut best: Option<RoadUserAssignment> = None;
                for candidate in candidates {
                    let longer = best
                        .as_ref()
                        .map_or(true, |b| candidate.events.duration() > b.events.duration());
                    if longer {
                        best = Some(candidate);
                    }
                }
                best.into_iter().collect()
            }
        }
    }
}

/// Restricts which events take part in assignment.
///
/// Empty filter accepts everything. The time range applies to the interpolated
/// occurrence: `start` inclusive, `end` exclusive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventFilter {
    pub classifications: Option<HashSet<String>>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_classifications<I, S>(mut self, classifications: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.classifications = Some(classifications.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_time_range(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn accepts(&self, event: &Event) -> bool {
        if let Some(classes) = &self.classifications {
            if !classes.contains(event.road_user_type()) {
                return false;
            }
        }
        let t = event.interpolated_occurrence();
        self.start.map_or(true, |s| t >= s) && self.end.map_or(true, |e| t < e)
    }
}

/// Match road users to flows.
///
/// Assignments are ordered by road user id, then in the selector's order.
pub fn assign_road_users(
    events: &[Event],
    flows: &[Flow],
    filter: &EventFilter,
    selector: &dyn FlowSelector,
) -> Vec<RoadUserAssignment> {
    let start_time = Instant::now();

    let mut flows_by_sections: HashMap<(&SectionId, &SectionId), Vec<&Flow>> = HashMap::new();
    for flow in flows {
        flows_by_sections
            .entry((&flow.start, &flow.end))
            .or_default()
            .push(flow);
    }

    let mut by_road_user: BTreeMap<&TrackId, Vec<&Event>> = BTreeMap::new();
    for event in events
        .iter()
        .filter(|e| e.event_type() == EventType::SectionEnter && filter.accepts(e))
    {
        by_road_user.entry(event.road_user_id()).or_default().push(event);
    }

    let mut assignments = Vec::new();
    let road_users = by_road_user.len();
    for (road_user_id, mut user_events) in by_road_user {
        user_events.sort_by_key(|e| e.interpolated_occurrence());

        let mut candidates = Vec::new();
        for (i, start) in user_events.iter().enumerate() {
            for end in &user_events[i + 1..] {
                let (Some(start_section), Some(end_section)) = (start.section_id(), end.section_id())
                else {
                    continue;
                };
                let Some(matching) = flows_by_sections.get(&(start_section, end_section)) else {
                    continue;
                };
                for flow in matching {
                    candidates.push(RoadUserAssignment {
                        road_user_id: road_user_id.clone(),
                        road_user_type: start.road_user_type().to_string(),
                        flow: (*flow).clone(),
                        events: EventPair {
                            start: (*start).clone(),
                            end: (*end).clone(),
                        },
                    });
                }
            }
        }
        assignments.extend(selector.select(candidates));
    }

    info!(
        "[Assign] {} road users -> {} assignments in {}ms",
        road_users,
        assignments.len(),
        start_time.elapsed().as_millis()
    );
    assignments
}
