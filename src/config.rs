//! Configuration for an analysis run.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::assignment::FlowSelectionPolicy;
use crate::cache::DEFAULT_CACHE_CAPACITY;
use crate::counting::CountingSpec;
use crate::error::{Result, TrackAnalysisError};
use crate::events::EventType;
use crate::strategy::default_num_workers;
use crate::RelativeOffsetCoordinate;

/// Settings for the solver, the batch strategy and aggregation.
///
/// Missing JSON fields take their default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Intersection batches run at once (default: CPU count, 1 = sequential)
    pub num_workers: usize,
    /// Offset per event type for sections that configure none, and for scene
    /// events (default: box center for every type)
    pub track_offset_by_event_type: HashMap<EventType, RelativeOffsetCoordinate>,
    /// How one road user's candidate flows are reduced (default: MaxDuration)
    pub flow_selection_policy: FlowSelectionPolicy,
    /// Also emit ENTER_SCENE/LEAVE_SCENE per track (default: true)
    pub include_scene_events: bool,
    /// Projected tracks kept per batch (default: 512)
    pub cache_capacity: usize,
    /// Grouping used by counting (default: per flow only)
    pub counting: CountingSpec,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            num_workers: default_num_workers(),
            track_offset_by_event_type: HashMap::new(),
            flow_selection_policy: FlowSelectionPolicy::MaxDuration,
            include_scene_events: true,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            counting: CountingSpec::default(),
        }
    }
}

impl AnalysisConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| TrackAnalysisError::ConfigError {
            message: format!("malformed configuration: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| TrackAnalysisError::Internal {
            message: format!("failed to serialize configuration: {}", e),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_workers == 0 {
            return Err(TrackAnalysisError::ConfigError {
                message: "num_workers must be at least 1".to_string(),
            });
        }
        if self.cache_capacity == 0 {
            return Err(TrackAnalysisError::ConfigError {
                message: "cache_capacity must be at least 1".to_string(),
            });
        }
        if let Some(offset) = self
            .track_offset_by_event_type
            .values()
            .find(|o| !o.is_valid())
        {
            return Err(TrackAnalysisError::InvalidOffset {
                x: offset.x,
                y: offset.y,
            });
        }
        self.counting.validate()
    }

    /// Configured offset for `event_type`, box center if none.
    pub fn offset_for(&self, event_type: EventType) -> RelativeOffsetCoordinate {
        self.track_offset_by_event_type
            .get(&event_type)
            .copied()
            .unwrap_or(RelativeOffsetCoordinate::CENTER)
    }

    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    pub fn with_offset(mut self, event_type: EventType, offset: RelativeOffsetCoordinate) -> Self {
        self.track_offset_by_event_type.insert(event_type, offset);
        self
    }

    pub fn with_flow_selection_policy(mut self, policy: FlowSelectionPolicy) -> Self {
        self.flow_selection_policy = policy;
        self
    }

    pub fn with_scene_events(mut self, include: bool) -> Self {
        self.include_scene_events = include;
        self
    }

    pub fn with_counting(mut self, counting: CountingSpec) -> Self {
        self.counting = counting;
        self
    }
}
