//! Unified error handling for the trackflow library.
//!
//! Every fallible operation in the crate returns [`TrackAnalysisError`]. Variants
//! carry the track or section id involved so callers can log them meaningfully.

use std::fmt;

/// Unified error type for trackflow operations.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackAnalysisError {
    /// A coordinate is NaN or infinite
    InvalidCoordinate { message: String },
    /// A relative offset lies outside [0, 1]
    InvalidOffset { x: f64, y: f64 },
    /// Track violates a data model invariant
    InvalidTrack { track_id: String, message: String },
    /// Track has too few detections for the requested operation
    InsufficientDetections {
        track_id: String,
        detection_count: usize,
        minimum_required: usize,
    },
    /// Section violates a data model invariant
    InvalidSection { section_id: String, message: String },
    /// An event was created before all required fields were set
    IncompleteBuilderSetup { missing: String },
    /// A batch referenced a track id that is not part of the dataset
    TrackNotFound { track_id: String },
    /// A batch of the parallel strategy failed
    BatchFailed {
        batch: usize,
        source: Box<TrackAnalysisError>,
    },
    /// Configuration error
    ConfigError { message: String },
    /// Generic internal error
    Internal { message: String },
}

impl fmt::Display for TrackAnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackAnalysisError::InvalidCoordinate { message } => {
                write!(f, "Invalid coordinate: {}", message)
            }
            TrackAnalysisError::InvalidOffset { x, y } => {
                write!(
                    f,
                    "Relative offset ({}, {}) must lie within [0, 1] x [0, 1]",
                    x, y
                )
            }
            TrackAnalysisError::InvalidTrack { track_id, message } => {
                write!(f, "Track '{}' is invalid: {}", track_id, message)
            }
            TrackAnalysisError::InsufficientDetections {
                track_id,
                detection_count,
                minimum_required,
            } => {
                write!(
                    f,
                    "Track '{}' has {} detections, minimum {} required",
                    track_id, detection_count, minimum_required
                )
            }
            TrackAnalysisError::InvalidSection {
                section_id,
                message,
            } => {
                write!(f, "Section '{}' is invalid: {}", section_id, message)
            }
            TrackAnalysisError::IncompleteBuilderSetup { missing } => {
                write!(
                    f,
                    "Event builder setup incomplete: '{}' was not set",
                    missing
                )
            }
            TrackAnalysisError::TrackNotFound { track_id } => {
                write!(
                    f,
                    "Intersection error: track '{}' not found in dataset",
                    track_id
                )
            }
            TrackAnalysisError::BatchFailed { batch, source } => {
                write!(f, "Batch {} failed: {}", batch, source)
            }
            TrackAnalysisError::ConfigError { message } => {
                write!(f, "Configuration error: {}", message)
            }
            TrackAnalysisError::Internal { message } => {
                write!(f, "Internal error: {}", message)
            }
        }
    }
}

impl std::error::Error for TrackAnalysisError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TrackAnalysisError::BatchFailed { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

/// Result type alias for trackflow operations.
pub type Result<T> = std::result::Result<T, TrackAnalysisError>;

/// Extension trait for converting Option to TrackAnalysisError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a track-not-found error.
    fn ok_or_track_not_found(self, track_id: &str) -> Result<T>;

    /// Convert Option to Result with an incomplete builder error.
    fn ok_or_incomplete(self, missing: &str) -> Result<T>;

    /// Convert Option to Result with generic internal error.
    fn ok_or_internal(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_track_not_found(self, track_id: &str) -> Result<T> {
        self.ok_or_else(|| TrackAnalysisError::TrackNotFound {
            track_id: track_id.to_string(),
        })
    }

    fn ok_or_incomplete(self, missing: &str) -> Result<T> {
        self.ok_or_else(|| TrackAnalysisError::IncompleteBuilderSetup {
            missing: missing.to_string(),
        })
    }

    fn ok_or_internal(self, message: &str) -> Result<T> {
        self.ok_or_else(|| TrackAnalysisError::Internal {
            message: message.to_string(),
        })
    }
}
