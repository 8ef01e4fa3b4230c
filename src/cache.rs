//! # Geometry Cache
//!
//! Per-batch memo of projected track polylines and section geometries.
//!
//! The same track is tested against every section sharing an offset, and the
//! same section against every track in a batch, so both projections are
//! memoized. One cache belongs to one worker for the duration of one batch and
//! is dropped afterwards; it is never shared between threads.
//!
//! Track projections are bounded by `capacity`; when full, the least recently
//! used projection is evicted with a linear scan, which is fine for the few
//! hundred entries a batch needs at once.

use std::collections::HashMap;
use std::rc::Rc;

use crate::projection::{project_section, project_track, ProjectedTrack, SectionGeometry};
use crate::section::{Section, SectionId};
use crate::{RelativeOffsetCoordinate, Track, TrackId};

/// Default number of projected tracks kept per batch.
pub const DEFAULT_CACHE_CAPACITY: usize = 512;

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    last_access: u64,
}

/// Memoized projections for one batch.
#[derive(Debug)]
pub struct GeometryCache {
    capacity: usize,
    tracks: HashMap<(TrackId, RelativeOffsetCoordinate), CacheEntry<Rc<ProjectedTrack>>>,
    sections: HashMap<SectionId, Rc<SectionGeometry>>,
    access_counter: u64,
    hits: u64,
    misses: u64,
}

impl Default for GeometryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl GeometryCache {
    /// Create a cache holding at most `capacity` projected tracks.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            tracks: HashMap::with_capacity(capacity.min(DEFAULT_CACHE_CAPACITY)),
            sections: HashMap::new(),
            access_counter: 0,
            hits: 0,
            misses: 0,
        }
    }

    /// Projection of `track` through `offset`, computed on first use.
    pub fn projected_track(
        &mut self,
        track: &Track,
        offset: &RelativeOffsetCoordinate,
    ) -> Rc<ProjectedTrack> {
        let key = (track.id().clone(), *offset);
        self.access_counter += 1;
        let now = self.access_counter;

        if self.tracks.contains_key(&key) {
            self.hits += 1;
        } else {
            self.misses += 1;
            if self.tracks.len() >= self.capacity {
                self.evict_oldest();
            }
        }

        let entry = self.tracks.entry(key).or_insert_with(|| CacheEntry {
            value: Rc::new(project_track(track, offset)),
            last_access: now,
        });
        entry.last_access = now;
        Rc::clone(&entry.value)
    }

    /// Geometry of `section`, computed on first use.
    pub fn section_geometry(&mut self, section: &Section) -> Rc<SectionGeometry> {
        let geometry = self
            .sections
            .entry(section.id().clone())
            .or_insert_with(|| Rc::new(project_section(section)));
        Rc::clone(geometry)
    }

    /// Drop the cached projection of one track (all offsets).
    pub fn invalidate_track(&mut self, track_id: &TrackId) {
        self.tracks.retain(|(id, _), _| id != track_id);
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .tracks
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            self.tracks.remove(&key);
        }
    }

    /// Number of cached track projections.
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}
