//! Tripwire counting from tracked detections
//!
//! Each frame, every tracked detection's centroid is joined to its previous
//! centroid and the resulting motion segment is tested against every count
//! line. A (track, line) pair counts at most once.
//!
//! Key behaviors:
//! - Untracked detections only contribute to live occupancy
//! - Last-known positions are kept for tracks missing from a frame
//! - Lines are independent: one motion may cross several lines
//! - A crossing against a line's direction filter is ignored and does not
//!   consume that line for the track

use crate::domain::geometry::{segments_intersect, Point};
use crate::domain::types::{ClassCounts, CountLine, Detection, TrackId};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use std::time::{Duration, Instant};
use tracing::debug;

/// A single tripwire crossing
#[derive(Debug, Clone, PartialEq)]
pub struct CrossingEvent {
    pub track_id: TrackId,
    /// Index into the counter's line list
    pub line: usize,
    pub approach: String,
    pub class: String,
}

/// Result of counting one frame
#[derive(Debug, Default)]
pub struct FrameCount {
    /// Class -> detections in this frame only
    pub live: ClassCounts,
    pub crossings: SmallVec<[CrossingEvent; 4]>,
}

/// Last observation of a track
#[derive(Debug, Clone, Copy)]
struct TrackEntry {
    position: Point,
    last_seen: Instant,
}

/// Per-line crossing detector with per-track de-duplication
pub struct TripwireCounter {
    lines: Vec<CountLine>,
    /// track_id -> last centroid
    memory: FxHashMap<TrackId, TrackEntry>,
    /// seen_per_line[i] = tracks already counted on line i
    seen_per_line: Vec<FxHashSet<TrackId>>,
    /// Tracks unseen for longer than this are forgotten (None = keep forever)
    idle_timeout: Option<Duration>,
}

impl TripwireCounter {
    pub fn new(lines: Vec<CountLine>) -> Self {
        let seen_per_line = vec![FxHashSet::default(); lines.len()];
        Self { lines, memory: FxHashMap::default(), seen_per_line, idle_timeout: None }
    }

    /// Forget tracks idle for longer than `timeout`.
    ///
    /// Forgetting a track also clears its per-line counted flags, so the
    /// identity is treated as retired.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Count one frame of detections observed at `now`
    pub fn update(&mut self, detections: &[Detection], now: Instant) -> FrameCount {
        self.evict_idle(now);

        let mut result = FrameCount::default();

        for det in detections {
            *result.live.entry(det.class.clone()).or_insert(0) += 1;

            let Some(track_id) = det.track_id else {
                continue;
            };
            let position = det.bbox.centroid();

            if let Some(prev) = self.memory.get(&track_id).map(|e| e.position) {
                for (i, line) in self.lines.iter().enumerate() {
                    if self.seen_per_line[i].contains(&track_id) {
                        continue;
                    }
                    if !segments_intersect(prev, position, line.p1, line.p2) {
                        continue;
                    }
                    if !line.direction.map_or(true, |d| d.admits(prev, position)) {
                        continue;
                    }

                    self.seen_per_line[i].insert(track_id);
                    debug!(
                        track_id = %track_id,
                        line = %i,
                        approach = %line.approach,
                        class = %det.class,
                        "tripwire_crossed"
                    );
                    result.crossings.push(CrossingEvent {
                        track_id,
                        line: i,
                        approach: line.approach.clone(),
                        class: det.class.clone(),
                    });
                }
            }

            self.memory.insert(track_id, TrackEntry { position, last_seen: now });
        }

        result
    }

    fn evict_idle(&mut self, now: Instant) {
        let Some(timeout) = self.idle_timeout else {
            return;
        };

        let before = self.memory.len();
        let mut retired: SmallVec<[TrackId; 8]> = SmallVec::new();
        self.memory.retain(|id, entry| {
            let keep = now.saturating_duration_since(entry.last_seen) <= timeout;
            if !keep {
                retired.push(*id);
            }
            keep
        });

        if retired.is_empty() {
            return;
        }
        for seen in &mut self.seen_per_line {
            for id in &retired {
                seen.remove(id);
            }
        }
        debug!(evicted = %retired.len(), remaining = %(before - retired.len()), "tracks_evicted");
    }

    /// Configured lines, e.g. for overlay drawing
    pub fn lines(&self) -> &[CountLine] {
        &self.lines
    }

    /// Number of track identities currently remembered
    pub fn tracks_in_memory(&self) -> usize {
        self.memory.len()
    }

    /// Whether `track_id` has already been counted on line `line`
    pub fn is_counted(&self, line: usize, track_id: TrackId) -> bool {
        self.seen_per_line.get(line).is_some_and(|s| s.contains(&track_id))
    }

    /// Forget all track memory and counted flags
    pub fn reset(&mut self) {
        self.memory.clear();
        for seen in &mut self.seen_per_line {
            seen.clear();
        }
    }
}
