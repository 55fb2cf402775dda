//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations so the frame loop never contends with
//! the reporter task. Reporting swaps the periodic counters to get a snapshot.
//!
//! NOTE: All atomics use Relaxed ordering intentionally; these are statistical
//! counters only. Do NOT use them for coordination or logic decisions.

use crate::domain::types::SignalState;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{info, warn};

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Maximum number of approaches with their own crossing counter
pub const MAX_APPROACHES: usize = 16;

/// Signal state values for the gauge
pub const SIGNAL_STATE_GREEN: u64 = 0;
pub const SIGNAL_STATE_AMBER: u64 = 1;
pub const SIGNAL_STATE_RED: u64 = 2;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Last bucket reports 2x the previous bound
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Total frames processed (monotonic)
    frames_total: AtomicU64,
    /// Frames since last report (reset on report)
    frames_since_report: AtomicU64,
    /// Sum of frame processing latencies in microseconds (reset on report)
    latency_sum_us: AtomicU64,
    /// Max frame processing latency (reset on report)
    latency_max_us: AtomicU64,
    /// Frame processing latency histogram (reset on report)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Valid detections seen (monotonic)
    detections_total: AtomicU64,
    /// Detections dropped as malformed (monotonic)
    detections_skipped: AtomicU64,
    /// Input lines that were not valid frames (monotonic)
    frames_rejected: AtomicU64,
    /// Tripwire crossings recorded (monotonic)
    crossings_total: AtomicU64,
    /// Controller decisions taken (monotonic)
    decisions_total: AtomicU64,
    /// Current signal state (0=green, 1=amber, 2=red)
    signal_state: AtomicU64,
    /// Track identities currently remembered by the counter
    tracks_in_memory: AtomicU64,
    /// Crossings per approach, index follows configuration order
    approach_crossings: [AtomicU64; MAX_APPROACHES],
    /// Approach names (set once at init)
    approach_names: parking_lot::Mutex<Vec<String>>,
    /// Pre-computed name to index mapping
    approach_index: parking_lot::RwLock<FxHashMap<String, usize>>,
    /// Last report time (only accessed from reporter)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            frames_total: AtomicU64::new(0),
            frames_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            detections_total: AtomicU64::new(0),
            detections_skipped: AtomicU64::new(0),
            frames_rejected: AtomicU64::new(0),
            crossings_total: AtomicU64::new(0),
            decisions_total: AtomicU64::new(0),
            signal_state: AtomicU64::new(SIGNAL_STATE_GREEN),
            tracks_in_memory: AtomicU64::new(0),
            approach_crossings: std::array::from_fn(|_| AtomicU64::new(0)),
            approach_names: parking_lot::Mutex::new(Vec::new()),
            approach_index: parking_lot::RwLock::new(FxHashMap::default()),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Set the approach names (call once at initialization)
    pub fn set_approaches(&self, names: &[String]) {
        if names.len() > MAX_APPROACHES {
            warn!(
                approaches = %names.len(),
                tracked = %MAX_APPROACHES,
                untracked = ?&names[MAX_APPROACHES..],
                "approach_counters_truncated"
            );
        }

        let mut approaches = self.approach_names.lock();
        approaches.clear();
        approaches.extend(names.iter().take(MAX_APPROACHES).cloned());

        let mut index_map = self.approach_index.write();
        index_map.clear();
        for (idx, name) in names.iter().take(MAX_APPROACHES).enumerate() {
            index_map.insert(name.clone(), idx);
        }
    }

    /// Record one processed frame with its processing latency
    #[inline]
    pub fn record_frame_processed(&self, latency_us: u64, detections: usize, skipped: usize) {
        self.frames_total.fetch_add(1, Ordering::Relaxed);
        self.frames_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_us, latency_us);

        self.detections_total.fetch_add(detections as u64, Ordering::Relaxed);
        self.detections_skipped.fetch_add(skipped as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_frame_rejected(&self) {
        self.frames_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a tripwire crossing for an approach
    #[inline]
    pub fn record_crossing(&self, approach: &str) {
        self.crossings_total.fetch_add(1, Ordering::Relaxed);
        let idx = self.approach_index.read().get(approach).copied();
        if let Some(idx) = idx {
            self.approach_crossings[idx].fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_decision(&self) {
        self.decisions_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_signal_state(&self, state: SignalState) {
        let value = match state {
            SignalState::Green => SIGNAL_STATE_GREEN,
            SignalState::Amber => SIGNAL_STATE_AMBER,
            SignalState::Red => SIGNAL_STATE_RED,
        };
        self.signal_state.store(value, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_tracks_in_memory(&self, count: usize) {
        self.tracks_in_memory.store(count as u64, Ordering::Relaxed);
    }

    pub fn frames_total(&self) -> u64 {
        self.frames_total.load(Ordering::Relaxed)
    }

    pub fn crossings_total(&self) -> u64 {
        self.crossings_total.load(Ordering::Relaxed)
    }

    pub fn decisions_total(&self) -> u64 {
        self.decisions_total.load(Ordering::Relaxed)
    }

    pub fn frames_rejected(&self) -> u64 {
        self.frames_rejected.load(Ordering::Relaxed)
    }

    /// Crossings per approach in configuration order
    pub fn approach_crossings(&self) -> Vec<(String, u64)> {
        let names = self.approach_names.lock();
        names
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.clone(), self.approach_crossings[idx].load(Ordering::Relaxed)))
            .collect()
    }

    /// Snapshot all counters, resetting the periodic ones
    pub fn report(&self) -> MetricsSummary {
        let now = Instant::now();
        let elapsed_secs = {
            let mut last = self.last_report_time.lock();
            let elapsed = now.duration_since(*last).as_secs_f64();
            *last = now;
            elapsed
        };

        let frames_total = self.frames_total.load(Ordering::Relaxed);
        let frames_since = self.frames_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.latency_buckets);

        let frames_per_sec =
            if elapsed_secs > 0.0 { frames_since as f64 / elapsed_secs } else { 0.0 };
        let avg_latency = if frames_since > 0 { latency_sum / frames_since } else { 0 };

        MetricsSummary {
            frames_total,
            frames_per_sec,
            avg_frame_latency_us: avg_latency,
            max_frame_latency_us: max_latency,
            lat_buckets,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p95_us: percentile_from_buckets(&lat_buckets, 0.95),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            detections_total: self.detections_total.load(Ordering::Relaxed),
            detections_skipped: self.detections_skipped.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            crossings_total: self.crossings_total.load(Ordering::Relaxed),
            decisions_total: self.decisions_total.load(Ordering::Relaxed),
            signal_state: self.signal_state.load(Ordering::Relaxed),
            tracks_in_memory: self.tracks_in_memory.load(Ordering::Relaxed),
            approach_crossings: self.approach_crossings(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct MetricsSummary {
    pub frames_total: u64,
    pub frames_per_sec: f64,
    pub avg_frame_latency_us: u64,
    pub max_frame_latency_us: u64,
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    pub detections_total: u64,
    pub detections_skipped: u64,
    pub frames_rejected: u64,
    pub crossings_total: u64,
    pub decisions_total: u64,
    /// 0=green, 1=amber, 2=red
    pub signal_state: u64,
    pub tracks_in_memory: u64,
    pub approach_crossings: Vec<(String, u64)>,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            frames_total = %self.frames_total,
            frames_per_sec = format!("{:.1}", self.frames_per_sec),
            avg_latency_us = %self.avg_frame_latency_us,
            max_latency_us = %self.max_frame_latency_us,
            p50_us = %self.lat_p50_us,
            p95_us = %self.lat_p95_us,
            p99_us = %self.lat_p99_us,
            detections = %self.detections_total,
            skipped = %self.detections_skipped,
            rejected_frames = %self.frames_rejected,
            crossings = %self.crossings_total,
            decisions = %self.decisions_total,
            signal_state = %self.signal_state,
            tracks = %self.tracks_in_memory,
            by_approach = ?self.approach_crossings,
            "metrics"
        );
    }
}
