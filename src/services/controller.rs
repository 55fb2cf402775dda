//! Heuristic phase controller
//!
//! Turns per-approach flow into a weighted demand score, picks the approach
//! with the highest demand as the next green phase and maps each approach's
//! demand onto a bounded green duration.
//!
//! Demand per approach:
//! - with a class breakdown: `0.5 * veh_per_min + 0.5 * sum(weight * count)`
//! - otherwise the plain vehicles-per-minute
//! - plus `0.1 * sum(weight * occupancy)` over the live frame, added to every
//!   approach alike
//! - minus the phase-change penalty when it differs from the last choice
//! - never below zero

use crate::domain::types::ClassCounts;
use crate::infra::config::{default_class_weights, Config, DensityThresholds};
use crate::services::rates::{ApproachDetail, ApproachRate};
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

const DETAIL_RATE_SHARE: f64 = 0.5;
const OCCUPANCY_SHARE: f64 = 0.1;
const MEDIUM_GREEN_FACTOR: f64 = 1.8;
const LOW_GREEN_FACTOR: f64 = 1.3;

/// Relative weight per vehicle class, 1.0 for anything not listed
#[derive(Debug, Clone)]
pub struct ClassWeights {
    weights: HashMap<String, f64>,
    default: f64,
}

impl ClassWeights {
    pub fn new(weights: HashMap<String, f64>) -> Self {
        Self { weights, default: 1.0 }
    }

    pub fn weight(&self, class: &str) -> f64 {
        self.weights.get(class).copied().unwrap_or(self.default)
    }

    /// `sum(weight(class) * count)` over `counts`
    pub fn weighted_sum(&self, counts: &ClassCounts) -> f64 {
        counts.iter().map(|(class, n)| self.weight(class) * *n as f64).sum()
    }
}

impl Default for ClassWeights {
    fn default() -> Self {
        Self::new(default_class_weights())
    }
}

/// Controller tuning, fixed for a run
#[derive(Debug, Clone)]
pub struct ControlParams {
    pub min_green: u32,
    pub max_green: u32,
    pub green_extension: u32,
    pub clearance: u32,
    pub thresholds: DensityThresholds,
    pub class_weights: ClassWeights,
    pub phase_change_penalty: f64,
}

impl ControlParams {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_green: config.min_green(),
            max_green: config.max_green(),
            green_extension: config.green_extension(),
            clearance: config.clearance(),
            thresholds: config.density_thresholds(),
            class_weights: ClassWeights::new(config.class_weights().clone()),
            phase_change_penalty: config.phase_change_penalty(),
        }
    }
}

impl Default for ControlParams {
    fn default() -> Self {
        Self {
            min_green: 12,
            max_green: 60,
            green_extension: 3,
            clearance: 4,
            thresholds: DensityThresholds::default(),
            class_weights: ClassWeights::default(),
            phase_change_penalty: 0.0,
        }
    }
}

/// Outcome of one controller decision
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhasePlan {
    /// None when there was no rate data to decide on
    pub next_phase: Option<String>,
    /// Proposed green seconds per approach, in input order
    pub greens: Vec<(String, u32)>,
    pub clearance: u32,
}

impl PhasePlan {
    pub fn green_for(&self, approach: &str) -> Option<u32> {
        self.greens.iter().find(|(name, _)| name == approach).map(|(_, g)| *g)
    }
}

pub struct HeuristicController {
    params: ControlParams,
    last_phase: Option<String>,
}

impl HeuristicController {
    pub fn new(params: ControlParams) -> Self {
        Self { params, last_phase: None }
    }

    pub fn params(&self) -> &ControlParams {
        &self.params
    }

    /// Phase chosen by the most recent decision
    pub fn last_phase(&self) -> Option<&str> {
        self.last_phase.as_deref()
    }

    /// Weighted demand for one approach given its plain rate
    pub fn weighted_demand(
        &self,
        approach: &str,
        rate: f64,
        detail: Option<&[ApproachDetail]>,
        live: Option<&ClassCounts>,
    ) -> f64 {
        let weights = &self.params.class_weights;

        let mut demand = match detail.and_then(|d| d.iter().find(|a| a.approach == approach)) {
            Some(d) => {
                DETAIL_RATE_SHARE * d.veh_per_min
                    + (1.0 - DETAIL_RATE_SHARE) * weights.weighted_sum(&d.classes)
            }
            None => rate,
        };

        if let Some(live) = live.filter(|l| !l.is_empty()) {
            demand += OCCUPANCY_SHARE * weights.weighted_sum(live);
        }

        let penalty = self.params.phase_change_penalty;
        if penalty > 0.0 {
            if let Some(last) = &self.last_phase {
                if last != approach {
                    demand -= penalty;
                }
            }
        }

        demand.max(0.0)
    }

    /// Green seconds for a demand score, always within `[min_green, max_green]`
    pub fn suggest_green(&self, demand: f64) -> u32 {
        let p = &self.params;
        let th = p.thresholds;

        let green = if demand >= th.high {
            p.max_green
        } else if demand >= th.medium {
            let scaled = (p.min_green as f64 * MEDIUM_GREEN_FACTOR).floor() as u32;
            p.min_green.saturating_add(p.green_extension).max(scaled)
        } else if demand >= th.low {
            (p.min_green as f64 * LOW_GREEN_FACTOR).floor() as u32
        } else {
            p.min_green
        };

        green.min(p.max_green).max(p.min_green)
    }

    /// Choose the next phase and propose greens for every approach.
    ///
    /// Ties go to the earliest approach in `rates`. An empty `rates` yields
    /// a plan without a phase and leaves the last choice untouched.
    pub fn decide(
        &mut self,
        rates: &[ApproachRate],
        detail: Option<&[ApproachDetail]>,
        live: Option<&ClassCounts>,
    ) -> PhasePlan {
        if rates.is_empty() {
            return PhasePlan { next_phase: None, greens: Vec::new(), clearance: self.params.clearance };
        }

        let demands: Vec<(&str, f64)> = rates
            .iter()
            .map(|r| (r.approach.as_str(), self.weighted_demand(&r.approach, r.veh_per_min, detail, live)))
            .collect();

        let mut best = 0;
        for (i, (_, demand)) in demands.iter().enumerate().skip(1) {
            if *demand > demands[best].1 {
                best = i;
            }
        }

        let greens: Vec<(String, u32)> = demands
            .iter()
            .map(|(name, demand)| (name.to_string(), self.suggest_green(*demand)))
            .collect();

        let next_phase = demands[best].0.to_string();
        debug!(
            next_phase = %next_phase,
            demand = %demands[best].1,
            approaches = %demands.len(),
            "controller_decided"
        );
        self.last_phase = Some(next_phase.clone());

        PhasePlan { next_phase: Some(next_phase), greens, clearance: self.params.clearance }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rates(list: &[(&str, f64)]) -> Vec<ApproachRate> {
        list.iter().map(|(n, r)| ApproachRate::new(n, *r)).collect()
    }

    fn controller() -> HeuristicController {
        HeuristicController::new(ControlParams::default())
    }

    #[test]
    fn test_single_approach_green_within_bounds() {
        let mut c = controller();
        let plan = c.decide(&rates(&[("Principal", 25.0)]), None, None);

        assert_eq!(plan.next_phase.as_deref(), Some("Principal"));
        let green = plan.green_for("Principal").unwrap();
        assert!((12..=60).contains(&green));
        assert_eq!(green, 60);
        assert_eq!(plan.clearance, 4);
    }

    #[test]
    fn test_phase_follows_demand() {
        let mut c = controller();
        let first = c.decide(&rates(&[("Norte", 2.0), ("Sur", 20.0)]), None, None);
        let second = c.decide(&rates(&[("Norte", 30.0), ("Sur", 5.0)]), None, None);

        assert_eq!(first.next_phase.as_deref(), Some("Sur"));
        assert_eq!(second.next_phase.as_deref(), Some("Norte"));
        assert_eq!(c.last_phase(), Some("Norte"));
    }

    #[test]
    fn test_threshold_bands() {
        let c = controller();
        assert_eq!(c.suggest_green(0.0), 12);
        assert_eq!(c.suggest_green(5.99), 12);
        assert_eq!(c.suggest_green(6.0), 15);
        assert_eq!(c.suggest_green(12.0), 21);
        assert_eq!(c.suggest_green(19.99), 21);
        assert_eq!(c.suggest_green(20.0), 60);
    }

    #[test]
    fn test_medium_band_uses_extension_when_larger() {
        let params = ControlParams { min_green: 2, green_extension: 5, ..ControlParams::default() };
        let c = HeuristicController::new(params);
        // max(2 + 5, floor(2 * 1.8)) = 7
        assert_eq!(c.suggest_green(12.0), 7);
        // floor(2 * 1.3) = 2
        assert_eq!(c.suggest_green(6.0), 2);
    }

    #[test]
    fn test_oversized_extension_capped_at_max_green() {
        let params = ControlParams { green_extension: u32::MAX, ..ControlParams::default() };
        let c = HeuristicController::new(params);
        assert_eq!(c.suggest_green(12.0), 60);
        assert_eq!(c.suggest_green(0.0), 12);
    }

    #[test]
    fn test_green_is_bounded_and_monotone() {
        let c = HeuristicController::new(ControlParams {
            min_green: 10,
            max_green: 14,
            ..ControlParams::default()
        });
        let mut prev = 0;
        for step in 0..400 {
            let demand = step as f64 * 0.1;
            let green = c.suggest_green(demand);
            assert!((10..=14).contains(&green));
            assert!(green >= prev);
            prev = green;
        }
    }

    #[test]
    fn test_decide_is_deterministic() {
        let input = rates(&[("A", 7.0), ("B", 13.0), ("C", 1.0)]);
        let mut c1 = controller();
        let mut c2 = controller();
        assert_eq!(c1.decide(&input, None, None), c2.decide(&input, None, None));
    }

    #[test]
    fn test_ties_go_to_first_approach() {
        let mut c = controller();
        let plan = c.decide(&rates(&[("Este", 4.0), ("Oeste", 4.0)]), None, None);
        assert_eq!(plan.next_phase.as_deref(), Some("Este"));

        let idle = c.decide(&rates(&[("Oeste", 0.0), ("Este", 0.0)]), None, None);
        assert_eq!(idle.next_phase.as_deref(), Some("Oeste"));
    }

    #[test]
    fn test_empty_rates_yield_no_phase() {
        let mut c = controller();
        c.decide(&rates(&[("A", 1.0)]), None, None);
        let plan = c.decide(&[], None, None);

        assert_eq!(plan.next_phase, None);
        assert!(plan.greens.is_empty());
        assert_eq!(plan.clearance, 4);
        assert_eq!(c.last_phase(), Some("A"));
    }

    #[test]
    fn test_detail_blends_rate_and_weighted_classes() {
        let c = controller();
        let detail = vec![ApproachDetail {
            approach: "A".to_string(),
            total: 2,
            classes: ClassCounts::from([("bus".to_string(), 2)]),
            veh_per_min: 4.0,
        }];
        // 0.5 * 4 + 0.5 * (2.5 * 2)
        let demand = c.weighted_demand("A", 100.0, Some(&detail), None);
        assert!((demand - 4.5).abs() < 1e-9);

        // No detail entry for B: plain rate
        let plain = c.weighted_demand("B", 3.0, Some(&detail), None);
        assert!((plain - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_occupancy_added_to_every_approach() {
        let c = controller();
        let live = ClassCounts::from([("car".to_string(), 10), ("unknown".to_string(), 5)]);
        // 0.1 * (10 * 1.0 + 5 * 1.0)
        let a = c.weighted_demand("A", 0.0, None, Some(&live));
        let b = c.weighted_demand("B", 2.0, None, Some(&live));
        assert!((a - 1.5).abs() < 1e-9);
        assert!((b - 3.5).abs() < 1e-9);
    }

    #[test]
    fn test_phase_change_penalty_favors_current_phase() {
        let params = ControlParams { phase_change_penalty: 5.0, ..ControlParams::default() };
        let mut c = HeuristicController::new(params);

        // No previous phase: no penalty
        let first = c.decide(&rates(&[("A", 3.0), ("B", 1.0)]), None, None);
        assert_eq!(first.next_phase.as_deref(), Some("A"));

        // B = 6 - 5 = 1 < A = 3
        let second = c.decide(&rates(&[("A", 3.0), ("B", 6.0)]), None, None);
        assert_eq!(second.next_phase.as_deref(), Some("A"));

        // Penalty never drives demand negative
        assert_eq!(c.weighted_demand("B", 1.0, None, None), 0.0);
    }

    #[test]
    fn test_unknown_class_weight_defaults_to_one() {
        let weights = ClassWeights::default();
        assert_eq!(weights.weight("bus"), 2.5);
        assert_eq!(weights.weight("hovercraft"), 1.0);
    }

    #[test]
    fn test_params_from_config() {
        let config = Config::default();
        let params = ControlParams::from_config(&config);
        assert_eq!(params.min_green, config.min_green());
        assert_eq!(params.clearance, config.clearance());
        assert_eq!(params.class_weights.weight("truck"), 2.0);
    }
}
