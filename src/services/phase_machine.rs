//! GREEN -> AMBER -> RED signal cycle driven by per-frame ticks
//!
//! Deadlines are fixed when a state is entered:
//! - green ends `green` seconds after the decision that opened it
//! - amber ends `clearance` seconds after green's deadline
//! - red ends `fixed_red` seconds after amber's deadline
//!
//! The controller is consulted on the first tick and again on every
//! RED -> GREEN transition. At most one transition happens per tick, so a
//! long gap between ticks never skips a state.

use crate::domain::types::{ClassCounts, SignalState};
use crate::services::controller::{HeuristicController, PhasePlan};
use crate::services::rates::{ApproachDetail, ApproachRate};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::info;

/// Inputs offered to the controller when a decision is due
#[derive(Debug, Clone, Copy)]
pub struct Demand<'a> {
    pub rates: &'a [ApproachRate],
    pub detail: Option<&'a [ApproachDetail]>,
    pub live: Option<&'a ClassCounts>,
}

impl<'a> Demand<'a> {
    pub fn from_rates(rates: &'a [ApproachRate]) -> Self {
        Self { rates, detail: None, live: None }
    }
}

/// Cumulative seconds spent in each signal state
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StateDurations {
    pub green_s: f64,
    pub amber_s: f64,
    pub red_s: f64,
}

impl StateDurations {
    fn add(&mut self, state: SignalState, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        match state {
            SignalState::Green => self.green_s += secs,
            SignalState::Amber => self.amber_s += secs,
            SignalState::Red => self.red_s += secs,
        }
    }

    pub fn get(&self, state: SignalState) -> f64 {
        match state {
            SignalState::Green => self.green_s,
            SignalState::Amber => self.amber_s,
            SignalState::Red => self.red_s,
        }
    }

    pub fn total_s(&self) -> f64 {
        self.green_s + self.amber_s + self.red_s
    }
}

/// Signal head status after one tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalStatus {
    pub phase: String,
    pub state: SignalState,
    /// Whole seconds until the current state's deadline, never negative
    pub remaining_s: u64,
    /// Green seconds granted by the latest decision
    pub green_s: u32,
    /// True when this tick consulted the controller
    pub decided: bool,
}

pub struct PhaseStateMachine {
    controller: HeuristicController,
    fallback_phase: String,
    clearance: Duration,
    fixed_red: Duration,

    state: SignalState,
    active_phase: Option<String>,
    green_s: u32,
    green_ends: Instant,
    amber_ends: Instant,
    red_ends: Instant,

    last_tick: Option<Instant>,
    durations: StateDurations,
    last_plan: Option<PhasePlan>,
    decisions: u64,
}

impl PhaseStateMachine {
    pub fn new(controller: HeuristicController, fallback_phase: &str, fixed_red_s: u32) -> Self {
        let clearance = Duration::from_secs(u64::from(controller.params().clearance));
        let epoch = Instant::now();
        Self {
            controller,
            fallback_phase: fallback_phase.to_string(),
            clearance,
            fixed_red: Duration::from_secs(u64::from(fixed_red_s)),
            state: SignalState::Green,
            active_phase: None,
            green_s: 0,
            green_ends: epoch,
            amber_ends: epoch,
            red_ends: epoch,
            last_tick: None,
            durations: StateDurations::default(),
            last_plan: None,
            decisions: 0,
        }
    }

    /// Advance the cycle to `now`
    pub fn tick(&mut self, now: Instant, demand: Demand<'_>) -> SignalStatus {
        let Some(last) = self.last_tick else {
            self.last_tick = Some(now);
            self.state = SignalState::Green;
            self.open_green(now, demand);
            return self.status(now, true);
        };
        // Cycle clock never runs backwards
        let now = now.max(last);

        self.durations.add(self.state, now.saturating_duration_since(last));
        self.last_tick = Some(now);

        let mut decided = false;
        match self.state {
            SignalState::Green if now >= self.green_ends => {
                self.amber_ends = self.green_ends + self.clearance;
                self.transition(SignalState::Amber);
            }
            SignalState::Amber if now >= self.amber_ends => {
                self.red_ends = self.amber_ends + self.fixed_red;
                self.transition(SignalState::Red);
            }
            SignalState::Red if now >= self.red_ends => {
                self.transition(SignalState::Green);
                self.open_green(now, demand);
                decided = true;
            }
            _ => {}
        }

        self.status(now, decided)
    }

    fn open_green(&mut self, now: Instant, demand: Demand<'_>) {
        let plan = self.controller.decide(demand.rates, demand.detail, demand.live);
        let phase = plan.next_phase.clone().unwrap_or_else(|| self.fallback_phase.clone());
        let green_s = plan
            .green_for(&phase)
            .unwrap_or(self.controller.params().min_green);

        self.green_s = green_s;
        self.green_ends = now + Duration::from_secs(u64::from(green_s));
        self.decisions += 1;

        info!(
            phase = %phase,
            green_s = %green_s,
            clearance_s = %plan.clearance,
            fallback = %plan.next_phase.is_none(),
            "phase_decided"
        );

        self.active_phase = Some(phase);
        self.last_plan = Some(plan);
    }

    fn transition(&mut self, to: SignalState) {
        info!(
            phase = %self.active_phase.as_deref().unwrap_or(""),
            from = %self.state.as_str(),
            to = %to.as_str(),
            "signal_transition"
        );
        self.state = to;
    }

    fn deadline(&self) -> Instant {
        match self.state {
            SignalState::Green => self.green_ends,
            SignalState::Amber => self.amber_ends,
            SignalState::Red => self.red_ends,
        }
    }

    fn status(&self, now: Instant, decided: bool) -> SignalStatus {
        SignalStatus {
            phase: self.active_phase.clone().unwrap_or_else(|| self.fallback_phase.clone()),
            state: self.state,
            remaining_s: self.deadline().saturating_duration_since(now).as_secs(),
            green_s: self.green_s,
            decided,
        }
    }

    pub fn state(&self) -> SignalState {
        self.state
    }

    pub fn active_phase(&self) -> Option<&str> {
        self.active_phase.as_deref()
    }

    pub fn durations(&self) -> StateDurations {
        self.durations
    }

    pub fn last_plan(&self) -> Option<&PhasePlan> {
        self.last_plan.as_ref()
    }

    /// Number of controller decisions made so far
    pub fn decisions(&self) -> u64 {
        self.decisions
    }
}
