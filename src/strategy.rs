//! # Parallel Batch Execution
//!
//! Splits the usable tracks of a dataset into one batch per worker, runs the
//! intersection function on every batch and concatenates the results in batch
//! order.
//!
//! Batches share nothing mutable: each one builds its own geometry cache and
//! returns its own event list. The merged list holds every event exactly once;
//! it is ordered by batch, then by track within the batch, which is not a
//! global time order. Use [`crate::sort_events`] when one is needed.
//!
//! A failing batch aborts the whole run.

use std::time::Instant;

use log::info;

use crate::cache::DEFAULT_CACHE_CAPACITY;
use crate::error::{OptionExt, Result, TrackAnalysisError};
use crate::events::Event;
use crate::section::{validate_sections, Section};
use crate::{RelativeOffsetCoordinate, Track, TrackId, TrackProvider};

/// Number of logical CPUs, or 1 if unknown.
pub fn default_num_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// One independent unit of work: a slice of track ids plus the shared,
/// read-only inputs needed to solve them.
pub struct TrackBatch<'a, P: TrackProvider + ?Sized> {
    /// Position in submission order
    pub index: usize,
    pub track_ids: &'a [TrackId],
    pub tracks: &'a P,
    pub sections: &'a [Section],
    /// Offset for sections without an enter offset
    pub default_offset: RelativeOffsetCoordinate,
    pub cache_capacity: usize,
}

impl<'a, P: TrackProvider + ?Sized> TrackBatch<'a, P> {
    /// Look up every track of the batch.
    ///
    /// An unknown id is an index consistency bug upstream and fails with
    /// `TrackNotFound`.
    pub fn resolve(&self) -> Result<Vec<&'a Track>> {
        self.track_ids
            .iter()
            .map(|id| {
                self.tracks.get(id).ok_or_track_not_found(&id.0)
            })
            .collect()
    }
}

/// Runs intersection batches, in parallel when more than one worker is
/// configured and the `parallel` feature is enabled.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchStrategy {
    num_workers: usize,
    default_offset: RelativeOffsetCoordinate,
    cache_capacity: usize,
}

impl Default for BatchStrategy {
    fn default() -> Self {
        Self::new(default_num_workers())
    }
}

impl BatchStrategy {
    /// Strategy with `num_workers` batches (at least one).
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers: num_workers.max(1),
            default_offset: RelativeOffsetCoordinate::CENTER,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }

    pub fn with_default_offset(mut self, offset: RelativeOffsetCoordinate) -> Self {
        self.default_offset = offset;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Partition `ids` into at most `num_workers` contiguous, non-empty chunks.
    fn partition<'i>(&self, ids: &'i [TrackId]) -> Vec<&'i [TrackId]> {
        if ids.is_empty() {
            return Vec::new();
        }
        let chunk_size = ids.len().div_ceil(self.num_workers);
        ids.chunks(chunk_size).collect()
    }

    /// Run `intersect` over all usable tracks of `tracks`.
    ///
    /// `progress`, if given, is called once per finished batch with the number
    /// of tracks the batch processed. It may be called from worker threads.
    pub fn execute<P, F>(
        &self,
        intersect: F,
        tracks: &P,
        sections: &[Section],
        progress: Option<&(dyn Fn(usize) + Sync)>,
    ) -> Result<Vec<Event>>
    where
        P: TrackProvider + ?Sized,
        F: Fn(&TrackBatch<'_, P>) -> Result<Vec<Event>> + Sync,
    {
        let start = Instant::now();
        validate_sections(sections)?;
        let ids = tracks.usable_track_ids();
        let batches: Vec<TrackBatch<'_, P>> = self
            .partition(&ids)
            .into_iter()
            .enumerate()
            .map(|(index, track_ids)| TrackBatch {
                index,
                track_ids,
                tracks,
                sections,
                default_offset: self.default_offset,
                cache_capacity: self.cache_capacity,
            })
            .collect();

        info!(
            "[Strategy] {} tracks x {} sections in {} batches ({} workers)",
            ids.len(),
            sections.len(),
            batches.len(),
            self.num_workers
        );

        let run = |batch: &TrackBatch<'_, P>| -> Result<Vec<Event>> {
            let events = intersect(batch).map_err(|e| TrackAnalysisError::BatchFailed {
                batch: batch.index,
                source: Box::new(e),
            })?;
            if let Some(report) = progress {
                report(batch.track_ids.len());
            }
            Ok(events)
        };

        let results = self.run_batches(&batches, run)?;
        let events: Vec<Event> = results.into_iter().flatten().collect();

        info!(
            "[Strategy] {} events from {} batches in {}ms",
            events.len(),
            batches.len(),
            start.elapsed().as_millis()
        );
        Ok(events)
    }

    #[cfg(feature = "parallel")]
    fn run_batches<'b, P, R>(
        &self,
        batches: &[TrackBatch<'b, P>],
        run: R,
    ) -> Result<Vec<Vec<Event>>>
    where
        P: TrackProvider + ?Sized,
        R: Fn(&TrackBatch<'b, P>) -> Result<Vec<Event>> + Sync,
    {
        use rayon::prelude::*;

        if self.num_workers == 1 || batches.len() <= 1 {
            return batches.iter().map(&run).collect();
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.num_workers)
            .build()
            .map_err(|e| TrackAnalysisError::Internal {
                message: format!("failed to start worker pool: {}", e),
            })?;

        // Indexed collect keeps submission order
        pool.install(|| batches.par_iter().map(&run).collect())
    }

    #[cfg(not(feature = "parallel"))]
    fn run_batches<'b, P, R>(
        &self,
        batches: &[TrackBatch<'b, P>],
        run: R,
    ) -> Result<Vec<Vec<Event>>>
    where
        P: TrackProvider + ?Sized,
        R: Fn(&TrackBatch<'b, P>) -> Result<Vec<Event>> + Sync,
    {
        batches.iter().map(&run).collect()
    }
}
