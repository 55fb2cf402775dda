//! Services - demand estimation and signal scheduling
//!
//! This module contains the engine, leaf-first:
//! - `tripwire` - Crossing detection from consecutive track positions
//! - `rates` - Sliding-window vehicles-per-minute per approach
//! - `controller` - Weighted demand scoring and green-time mapping
//! - `phase_machine` - GREEN / AMBER / RED cycle with fixed deadlines
//! - `session` - Per-stream orchestrator owning all mutable state

pub mod controller;
pub mod phase_machine;
pub mod rates;
pub mod session;
pub mod tripwire;

// Re-export commonly used types
pub use controller::{ControlParams, HeuristicController, PhasePlan};
pub use phase_machine::{PhaseStateMachine, SignalStatus, StateDurations};
pub use rates::{ApproachDetail, ApproachRate, RateAggregator};
pub use session::{Session, SessionSummary, TickStats};
pub use tripwire::{CrossingEvent, TripwireCounter};
