//! Sliding-window flow rates per approach
//!
//! Crossing timestamps are queued per approach and evicted lazily on every
//! read and write. An entry is kept while `now - ts <= window`, so an event
//! exactly one window old is still counted.

use crate::domain::types::ClassCounts;
use crate::services::tripwire::CrossingEvent;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Vehicles-per-minute for one approach
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApproachRate {
    pub approach: String,
    pub veh_per_min: f64,
}

impl ApproachRate {
    pub fn new(approach: &str, veh_per_min: f64) -> Self {
        Self { approach: approach.to_string(), veh_per_min }
    }
}

/// Cumulative totals plus the current windowed rate for one approach
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApproachDetail {
    pub approach: String,
    pub total: u64,
    pub classes: ClassCounts,
    pub veh_per_min: f64,
}

/// Running state for one approach
#[derive(Debug, Default)]
struct ApproachAggregate {
    total: u64,
    classes: ClassCounts,
    crossings: VecDeque<Instant>,
}

impl ApproachAggregate {
    fn purge(&mut self, now: Instant, window: Duration) {
        while let Some(&front) = self.crossings.front() {
            if now.saturating_duration_since(front) > window {
                self.crossings.pop_front();
            } else {
                break;
            }
        }
    }
}

pub struct RateAggregator {
    /// Configuration order is preserved for every report
    approaches: Vec<(String, ApproachAggregate)>,
    index: FxHashMap<String, usize>,
    /// Class -> crossings across all approaches
    class_totals: ClassCounts,
    window_s: u64,
    window: Duration,
}

impl RateAggregator {
    pub fn new(approaches: &[String], window_s: u64) -> Self {
        let mut agg = Self {
            approaches: Vec::with_capacity(approaches.len()),
            index: FxHashMap::default(),
            class_totals: ClassCounts::new(),
            window_s,
            window: Duration::from_secs(window_s),
        };
        for name in approaches {
            agg.slot(name);
        }
        agg
    }

    fn slot(&mut self, approach: &str) -> usize {
        if let Some(&i) = self.index.get(approach) {
            return i;
        }
        let i = self.approaches.len();
        self.approaches.push((approach.to_string(), ApproachAggregate::default()));
        self.index.insert(approach.to_string(), i);
        i
    }

    /// Apply one crossing observed at `now`
    pub fn record(&mut self, event: &CrossingEvent, now: Instant) {
        let window = self.window;
        let i = self.slot(&event.approach);
        let agg = &mut self.approaches[i].1;

        agg.total += 1;
        *agg.classes.entry(event.class.clone()).or_insert(0) += 1;
        agg.crossings.push_back(now);
        agg.purge(now, window);

        *self.class_totals.entry(event.class.clone()).or_insert(0) += 1;
    }

    fn rate_of(&self, agg: &ApproachAggregate) -> f64 {
        agg.crossings.len() as f64 * 60.0 / self.window_s.max(1) as f64
    }

    fn purge_all(&mut self, now: Instant) {
        let window = self.window;
        for (_, agg) in &mut self.approaches {
            agg.purge(now, window);
        }
    }

    /// Vehicles-per-minute for every approach, zero when idle
    pub fn rates(&mut self, now: Instant) -> Vec<ApproachRate> {
        self.purge_all(now);
        self.approaches
            .iter()
            .map(|(name, agg)| ApproachRate::new(name, self.rate_of(agg)))
            .collect()
    }

    /// Totals, class breakdown and current rate for every approach
    pub fn details(&mut self, now: Instant) -> Vec<ApproachDetail> {
        self.purge_all(now);
        self.approaches
            .iter()
            .map(|(name, agg)| ApproachDetail {
                approach: name.clone(),
                total: agg.total,
                classes: agg.classes.clone(),
                veh_per_min: self.rate_of(agg),
            })
            .collect()
    }

    /// Cumulative crossings per class across all approaches
    pub fn class_totals(&self) -> &ClassCounts {
        &self.class_totals
    }

    /// Cumulative crossings per approach, in configuration order
    pub fn totals(&self) -> Vec<(String, u64)> {
        self.approaches.iter().map(|(name, agg)| (name.clone(), agg.total)).collect()
    }

    pub fn window_s(&self) -> u64 {
        self.window_s
    }

    /// Clear all totals and windows; approaches stay registered
    pub fn reset(&mut self) {
        for (_, agg) in &mut self.approaches {
            *agg = ApproachAggregate::default();
        }
        self.class_totals.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::TrackId;

    fn crossing(approach: &str, class: &str, id: i64) -> CrossingEvent {
        CrossingEvent {
            track_id: TrackId(id),
            line: 0,
            approach: approach.to_string(),
            class: class.to_string(),
        }
    }

    fn at(t0: Instant, s: f64) -> Instant {
        t0 + Duration::from_secs_f64(s)
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_window_includes_recent_and_drops_old() {
        let t0 = Instant::now();
        let mut agg = RateAggregator::new(&names(&["Principal"]), 30);
        agg.record(&crossing("Principal", "car", 1), t0);

        let inside = agg.rates(at(t0, 29.9));
        assert!((inside[0].veh_per_min - 2.0).abs() < 1e-9);

        let outside = agg.rates(at(t0, 30.1));
        assert_eq!(outside[0].veh_per_min, 0.0);
    }

    #[test]
    fn test_event_exactly_one_window_old_is_kept() {
        let t0 = Instant::now();
        let mut agg = RateAggregator::new(&names(&["A"]), 30);
        agg.record(&crossing("A", "car", 1), t0);

        let edge = agg.rates(at(t0, 30.0));
        assert!((edge[0].veh_per_min - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_idle_approaches_report_zero_in_order() {
        let t0 = Instant::now();
        let mut agg = RateAggregator::new(&names(&["Norte", "Sur", "Este"]), 60);
        agg.record(&crossing("Sur", "bus", 1), t0);
        agg.record(&crossing("Sur", "car", 2), t0);

        let rates = agg.rates(at(t0, 1.0));
        let order: Vec<&str> = rates.iter().map(|r| r.approach.as_str()).collect();
        assert_eq!(order, vec!["Norte", "Sur", "Este"]);
        assert_eq!(rates[0].veh_per_min, 0.0);
        assert!((rates[1].veh_per_min - 2.0).abs() < 1e-9);
        assert_eq!(rates[2].veh_per_min, 0.0);
    }

    #[test]
    fn test_details_are_cumulative_beyond_window() {
        let t0 = Instant::now();
        let mut agg = RateAggregator::new(&names(&["A"]), 10);
        agg.record(&crossing("A", "car", 1), t0);
        agg.record(&crossing("A", "truck", 2), at(t0, 1.0));
        agg.record(&crossing("A", "car", 3), at(t0, 2.0));

        let details = agg.details(at(t0, 100.0));
        assert_eq!(details[0].total, 3);
        assert_eq!(details[0].classes.get("car"), Some(&2));
        assert_eq!(details[0].classes.get("truck"), Some(&1));
        assert_eq!(details[0].veh_per_min, 0.0);
        assert_eq!(agg.class_totals().get("car"), Some(&2));
    }

    #[test]
    fn test_unknown_approach_is_appended() {
        let t0 = Instant::now();
        let mut agg = RateAggregator::new(&names(&["A"]), 30);
        agg.record(&crossing("B", "car", 1), t0);

        let totals = agg.totals();
        assert_eq!(totals, vec![("A".to_string(), 0), ("B".to_string(), 1)]);
    }

    #[test]
    fn test_zero_window_divides_by_one() {
        let t0 = Instant::now();
        let mut agg = RateAggregator::new(&names(&["A"]), 0);
        agg.record(&crossing("A", "car", 1), t0);

        let rates = agg.rates(t0);
        assert!((rates[0].veh_per_min - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_reset_keeps_approaches() {
        let t0 = Instant::now();
        let mut agg = RateAggregator::new(&names(&["A", "B"]), 30);
        agg.record(&crossing("A", "car", 1), t0);
        agg.reset();

        assert!(agg.class_totals().is_empty());
        let rates = agg.rates(t0);
        assert_eq!(rates.len(), 2);
        assert!(rates.iter().all(|r| r.veh_per_min == 0.0));
    }
}
