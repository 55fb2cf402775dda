//! Per-stream session orchestration
//!
//! A Session owns every piece of mutable engine state for one detection
//! stream and processes frames strictly one at a time:
//! - TripwireCounter (track memory, per-line counted sets)
//! - RateAggregator (cumulative totals, sliding rate windows)
//! - PhaseStateMachine (active phase, deadlines, per-state durations)
//!
//! Sessions never share state. Cancellation is checked between frames only.


use crate::domain::types::{ClassCounts, Frame, SignalState};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::egress::Egress;
use crate::services::controller::{ControlParams, HeuristicController};
use crate::services::phase_machine::{Demand, PhaseStateMachine, StateDurations};
use crate::services::rates::{ApproachDetail, ApproachRate, RateAggregator};
use crate::services::tripwire::TripwireCounter;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

/// Per-frame snapshot handed to downstream consumers
#[derive(Debug, Clone, Serialize)]
pub struct TickStats {
    pub site: String,
    /// Zero-based frame index within the session
    pub frame: u64,
    /// Seconds since the session clock origin
    pub t_s: f64,
    pub phase: String,
    pub state: SignalState,
    pub remaining_s: u64,
    pub green_s: u32,
    /// True when the controller was consulted on this frame
    pub decided: bool,
    /// Configuration order
    pub veh_per_min: Vec<ApproachRate>,
    /// Detections in this frame only
    pub live: ClassCounts,
    /// Cumulative crossings per class
    pub counts: ClassCounts,
    pub approaches: Vec<ApproachDetail>,
    pub durations: StateDurations,
    /// Crossings recorded on this frame
    pub crossings: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApproachTotal {
    pub approach: String,
    pub total: u64,
}

/// End-of-session report
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub sid: String,
    pub site: String,
    pub started_at: DateTime<Utc>,
    pub duration_s: f64,
    pub frames: u64,
    pub crossings: Vec<ApproachTotal>,
    pub counts: ClassCounts,
    pub durations: StateDurations,
    pub decisions: u64,
    pub git_hash: String,
    /// Recorded tick file, when enabled
    pub output: Option<String>,
}

pub struct Session {
    sid: String,
    site_id: String,
    counter: TripwireCounter,
    rates: RateAggregator,
    machine: PhaseStateMachine,
    metrics: Arc<Metrics>,
    egress: Egress,
    /// Clock origin for frames that carry their own timestamp
    origin: Instant,
    started_at: DateTime<Utc>,
    last_now: Option<Instant>,
    frames: u64,
}

impl Session {
    pub fn new(config: &Config, metrics: Arc<Metrics>) -> Self {
        let mut counter = TripwireCounter::new(config.count_lines().to_vec());
        if config.track_idle_timeout_secs() > 0 {
            counter = counter.with_idle_timeout(Duration::from_secs(config.track_idle_timeout_secs()));
        }

        let controller = HeuristicController::new(ControlParams::from_config(config));
        let machine = PhaseStateMachine::new(controller, config.fallback_phase(), config.fixed_red());

        metrics.set_approaches(config.approaches());

        let sid = uuid::Uuid::now_v7().to_string();
        info!(
            sid = %sid,
            site = %config.site_id(),
            approaches = ?config.approaches(),
            lines = %config.count_lines().len(),
            rate_window_s = %config.rate_window_s(),
            "session_started"
        );

        Self {
            sid,
            site_id: config.site_id().to_string(),
            counter,
            rates: RateAggregator::new(config.approaches(), config.rate_window_s()),
            machine,
            metrics,
            egress: Egress::from_config(config),
            origin: Instant::now(),
            started_at: Utc::now(),
            last_now: None,
            frames: 0,
        }
    }

    /// Replace the egress writer
    pub fn with_egress(mut self, egress: Egress) -> Self {
        self.egress = egress;
        self
    }

    /// Pin the clock origin used for timestamped frames
    pub fn with_origin(mut self, origin: Instant) -> Self {
        self.origin = origin;
        self
    }

    pub fn sid(&self) -> &str {
        &self.sid
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn signal_state(&self) -> SignalState {
        self.machine.state()
    }

    pub fn tracks_in_memory(&self) -> usize {
        self.counter.tracks_in_memory()
    }

    /// Session clock for a frame: origin + `t` when present and
    /// representable, else wall clock
    pub fn frame_time(&self, frame: &Frame) -> Instant {
        frame
            .t
            .and_then(|t| Duration::try_from_secs_f64(t).ok())
            .and_then(|offset| self.origin.checked_add(offset))
            .unwrap_or_else(Instant::now)
    }

    /// Run one frame through counter, aggregator and state machine
    pub fn process_frame(&mut self, frame: &Frame, now: Instant) -> TickStats {
        let process_start = Instant::now();

        let counted = self.counter.update(&frame.detections, now);
        for crossing in &counted.crossings {
            self.rates.record(crossing, now);
            self.metrics.record_crossing(&crossing.approach);
            info!(
                track_id = %crossing.track_id,
                approach = %crossing.approach,
                class = %crossing.class,
                "crossing_recorded"
            );
        }

        let approaches = self.rates.details(now);
        let veh_per_min: Vec<ApproachRate> = approaches
            .iter()
            .map(|d| ApproachRate::new(&d.approach, d.veh_per_min))
            .collect();

        let status = self.machine.tick(
            now,
            Demand { rates: &veh_per_min, detail: Some(&approaches), live: Some(&counted.live) },
        );

        if status.decided {
            self.metrics.record_decision();
        }
        self.metrics.set_signal_state(status.state);
        self.metrics.set_tracks_in_memory(self.counter.tracks_in_memory());
        self.metrics.record_frame_processed(
            process_start.elapsed().as_micros() as u64,
            frame.detections.len(),
            frame.skipped,
        );

        let tick = TickStats {
            site: self.site_id.clone(),
            frame: self.frames,
            t_s: now.saturating_duration_since(self.origin).as_secs_f64(),
            phase: status.phase,
            state: status.state,
            remaining_s: status.remaining_s,
            green_s: status.green_s,
            decided: status.decided,
            veh_per_min,
            live: counted.live,
            counts: self.rates.class_totals().clone(),
            approaches,
            durations: self.machine.durations(),
            crossings: counted.crossings.len(),
        };

        debug!(
            frame = %tick.frame,
            detections = %frame.detections.len(),
            crossings = %tick.crossings,
            state = %tick.state.as_str(),
            remaining_s = %tick.remaining_s,
            "frame_processed"
        );

        self.frames += 1;
        self.last_now = Some(now);
        tick
    }

    /// Explicit full reset of track memory, counted sets and aggregates.
    ///
    /// The signal cycle keeps running.
    pub fn reset(&mut self) {
        self.counter.reset();
        self.rates.reset();
        self.metrics.set_tracks_in_memory(0);
        info!(sid = %self.sid, "session_reset");
    }

    /// Close the session at `now` and produce its summary
    pub fn finish(mut self, now: Instant) -> SessionSummary {
        let summary = SessionSummary {
            sid: self.sid.clone(),
            site: self.site_id.clone(),
            started_at: self.started_at,
            duration_s: now.saturating_duration_since(self.origin).as_secs_f64(),
            frames: self.frames,
            crossings: self
                .rates
                .totals()
                .into_iter()
                .map(|(approach, total)| ApproachTotal { approach, total })
                .collect(),
            counts: self.rates.class_totals().clone(),
            durations: self.machine.durations(),
            decisions: self.machine.decisions(),
            git_hash: env!("GIT_HASH").to_string(),
            output: self.egress.ticks_path().map(str::to_string),
        };

        self.egress.write_summary(&summary);

        info!(
            sid = %summary.sid,
            frames = %summary.frames,
            duration_s = %format!("{:.1}", summary.duration_s),
            green_s = %format!("{:.1}", summary.durations.green_s),
            amber_s = %format!("{:.1}", summary.durations.amber_s),
            red_s = %format!("{:.1}", summary.durations.red_s),
            decisions = %summary.decisions,
            "session_finished"
        );

        summary
    }

    /// Consume frames until the stream ends or shutdown is signalled
    pub async fn run(
        mut self,
        mut frame_rx: mpsc::Receiver<Frame>,
        mut shutdown: watch::Receiver<bool>,
    ) -> SessionSummary {
        loop {
            if *shutdown.borrow() {
                info!(sid = %self.sid, "session_shutdown_requested");
                break;
            }

            tokio::select! {
                biased;

                Ok(()) = shutdown.changed() => {
                    continue;
                }
                frame = frame_rx.recv() => {
                    match frame {
                        Some(frame) => {
                            let now = self.frame_time(&frame);
                            let tick = self.process_frame(&frame, now);
                            self.egress.write_tick(&tick);
                        }
                        None => {
                            info!(sid = %self.sid, frames = %self.frames, "detection_stream_exhausted");
                            break;
                        }
                    }
                }
            }
        }

        let now = self.last_now.unwrap_or_else(Instant::now);
        self.finish(now)
    }
}
