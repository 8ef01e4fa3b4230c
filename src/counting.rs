//! Traffic counting over flow assignments.
//!
//! Counts are keyed by a [`CountTag`]: the flow, plus the road user's
//! classification and a UTC time bucket when grouping by them is enabled.
//! Every flow/classification/bucket combination in range appears in the
//! result, with zero where nothing was assigned.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use crate::assignment::{Flow, FlowId, RoadUserAssignment};
use crate::error::{OptionExt, Result, TrackAnalysisError};

/// Composite counting key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CountTag {
    pub flow: FlowId,
    /// `None` unless counting by classification
    pub classification: Option<String>,
    /// Bucket start, `None` unless counting in time intervals
    pub bucket: Option<DateTime<Utc>>,
}

impl CountTag {
    pub fn for_flow(flow: FlowId) -> Self {
        Self {
            flow,
            classification: None,
            bucket: None,
        }
    }
}

/// How assignments are grouped when counting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CountingSpec {
    /// Bucket width in seconds; no time grouping when `None`
    pub interval_seconds: Option<u64>,
    pub by_classification: bool,
    /// First instant counted (inclusive); defaults to the earliest assignment
    pub start: Option<DateTime<Utc>>,
    /// Last instant counted (exclusive); defaults to past the latest assignment
    pub end: Option<DateTime<Utc>>,
}

impl CountingSpec {
    /// Count per flow only.
    pub fn per_flow() -> Self {
        Self::default()
    }

    pub fn with_interval(mut self, seconds: u64) -> Self {
        self.interval_seconds = Some(seconds);
        self
    }

    pub fn with_classification(mut self) -> Self {
        self.by_classification = true;
        self
    }

    pub fn with_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_seconds == Some(0) {
            return Err(TrackAnalysisError::ConfigError {
                message: "counting interval must be at least one second".to_string(),
            });
        }
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if end <= start {
                return Err(TrackAnalysisError::ConfigError {
                    message: format!("counting range end {} is not after start {}", end, start),
                });
            }
        }
        Ok(())
    }

    fn in_range(&self, t: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| t >= s) && self.end.map_or(true, |e| t < e)
    }
}

/// Start of the `interval`-second bucket containing `t`.
fn bucket_start(t: DateTime<Utc>, interval: u64) -> Result<DateTime<Utc>> {
    let interval = i64::try_from(interval).map_err(|_| TrackAnalysisError::ConfigError {
        message: format!("counting interval {}s is too large", interval),
    })?;
    let seconds = t.timestamp().div_euclid(interval) * interval;
    DateTime::from_timestamp(seconds, 0).ok_or_internal("bucket start out of range")
}

/// Result of counting: tag to number of road users.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Count {
    counts: BTreeMap<CountTag, u64>,
}

#[derive(Serialize)]
struct CountEntry<'a> {
    flow: &'a FlowId,
    classification: Option<&'a str>,
    bucket: Option<DateTime<Utc>>,
    count: u64,
}

impl Count {
    /// Count for a tag; tags never seen count zero.
    pub fn get(&self, tag: &CountTag) -> u64 {
        self.counts.get(tag).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Per-flow totals across classifications and buckets.
    pub fn totals_by_flow(&self) -> BTreeMap<&FlowId, u64> {
        let mut totals = BTreeMap::new();
        for (tag, n) in &self.counts {
            *totals.entry(&tag.flow).or_insert(0) += n;
        }
        totals
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CountTag, u64)> {
        self.counts.iter().map(|(tag, n)| (tag, *n))
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// JSON array of `{flow, classification, bucket, count}` in tag order.
    pub fn to_json(&self) -> Result<String> {
        let entries: Vec<CountEntry<'_>> = self
            .counts
            .iter()
            .map(|(tag, n)| CountEntry {
                flow: &tag.flow,
                classification: tag.classification.as_deref(),
                bucket: tag.bucket,
                count: *n,
            })
            .collect();
        serde_json::to_string(&entries).map_err(|e| TrackAnalysisError::Internal {
            message: format!("failed to serialize counts: {}", e),
        })
    }
}

/// Tally assignments per flow, classification and time bucket.
///
/// Buckets are keyed on the start event's interpolated occurrence. Assignments
/// outside the spec's time range are ignored. Classifications are those seen
/// in the assignments. With an interval but no explicit range and no
/// assignments, there are no buckets and the result is empty.
pub fn count_assignments(
    assignments: &[RoadUserAssignment],
    flows: &[Flow],
    spec: &CountingSpec,
) -> Result<Count> {
    spec.validate()?;
    let start_time = Instant::now();

    let counted: Vec<&RoadUserAssignment> = assignments
        .iter()
        .filter(|a| spec.in_range(a.events.start.interpolated_occurrence()))
        .collect();

    let classifications: Vec<Option<String>> = if spec.by_classification {
        counted
            .iter()
            .map(|a| a.road_user_type.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(Some)
            .collect()
    } else {
        vec![None]
    };

    let buckets: Vec<Option<DateTime<Utc>>> = match spec.interval_seconds {
        None => vec![None],
        Some(interval) => bucket_range(&counted, spec, interval)?
            .into_iter()
            .map(Some)
            .collect(),
    };

    let mut counts = BTreeMap::new();
    for flow in flows {
        for classification in &classifications {
            for bucket in &buckets {
                counts.insert(
                    CountTag {
                        flow: flow.id.clone(),
                        classification: classification.clone(),
                        bucket: *bucket,
                    },
                    0,
                );
            }
        }
    }

    for assignment in counted {
        let bucket = match spec.interval_seconds {
            Some(interval) => Some(bucket_start(
                assignment.events.start.interpolated_occurrence(),
                interval,
            )?),
            None => None,
        };
        let tag = CountTag {
            flow: assignment.flow.id.clone(),
            classification: spec
                .by_classification
                .then(|| assignment.road_user_type.clone()),
            bucket,
        };
        *counts.entry(tag).or_insert(0) += 1;
    }

    let count = Count { counts };
    info!(
        "[Count] {} assignments over {} flows -> {} tags in {}ms",
        assignments.len(),
        flows.len(),
        count.len(),
        start_time.elapsed().as_millis()
    );
    Ok(count)
}

/// Bucket starts covering the spec's range, or the assignments' span.
fn bucket_range(
    counted: &[&RoadUserAssignment],
    spec: &CountingSpec,
    interval: u64,
) -> Result<Vec<DateTime<Utc>>> {
    let times = counted.iter().map(|a| a.events.start.interpolated_occurrence());
    let first = match spec.start {
        Some(start) => Some(start),
        None => times.clone().min(),
    };
    let last = match spec.end {
        // End is exclusive: the last bucket is the one before it
        Some(end) => Some(end - chrono::Duration::nanoseconds(1)),
        None => times.max(),
    };
    let (Some(first), Some(last)) = (first, last) else {
        return Ok(Vec::new());
    };

    let mut bucket = bucket_start(first, interval)?;
    let last_bucket = bucket_start(last, interval)?;
    let step = i64::try_from(interval)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .ok_or_internal("counting interval out of range")?;
    let mut buckets = Vec::new();
    while bucket <= last_bucket {
        buckets.push(bucket);
        bucket += step;
    }
    Ok(buckets)
}
