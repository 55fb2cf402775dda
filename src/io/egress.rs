//! Tick and summary egress
//!
//! Per-tick records are appended in JSONL format (one JSON object per line)
//! to `egress.ticks_file`. The session summary is written once, as pretty
//! JSON, to `egress.summary_file`. Either output is disabled by leaving its
//! path empty. Write failures are logged and never abort the session.

use crate::infra::config::Config;
use crate::services::session::{SessionSummary, TickStats};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, error, info};

/// Egress writer for tick records and the session summary
pub struct Egress {
    ticks_path: Option<String>,
    summary_path: Option<String>,
    writer: Option<BufWriter<File>>,
    ticks_written: u64,
}

fn non_empty(path: &str) -> Option<String> {
    let trimmed = path.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Create parent directories if they don't exist
fn ensure_parent(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

impl Egress {
    pub fn new(ticks_file: &str, summary_file: &str) -> Self {
        let ticks_path = non_empty(ticks_file);
        let summary_path = non_empty(summary_file);
        info!(
            ticks_file = %ticks_path.as_deref().unwrap_or("-"),
            summary_file = %summary_path.as_deref().unwrap_or("-"),
            "egress_initialized"
        );
        Self { ticks_path, summary_path, writer: None, ticks_written: 0 }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.ticks_file(), config.summary_file())
    }

    /// Egress that writes nothing
    pub fn disabled() -> Self {
        Self { ticks_path: None, summary_path: None, writer: None, ticks_written: 0 }
    }

    pub fn ticks_path(&self) -> Option<&str> {
        self.ticks_path.as_deref()
    }

    pub fn summary_path(&self) -> Option<&str> {
        self.summary_path.as_deref()
    }

    pub fn ticks_written(&self) -> u64 {
        self.ticks_written
    }

    fn open_ticks(path: &str) -> std::io::Result<BufWriter<File>> {
        let path = Path::new(path);
        ensure_parent(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(BufWriter::new(file))
    }

    fn append_line(&mut self, line: &str) -> std::io::Result<()> {
        let Some(path) = self.ticks_path.as_deref() else {
            return Ok(());
        };
        if self.writer.is_none() {
            self.writer = Some(Self::open_ticks(path)?);
        }
        if let Some(writer) = self.writer.as_mut() {
            writeln!(writer, "{}", line)?;
        }
        Ok(())
    }

    /// Append one tick record. Returns true if written (or disabled).
    pub fn write_tick(&mut self, tick: &TickStats) -> bool {
        if self.ticks_path.is_none() {
            return true;
        }

        let result = serde_json::to_string(tick)
            .map_err(std::io::Error::from)
            .and_then(|json| self.append_line(&json));

        match result {
            Ok(()) => {
                self.ticks_written += 1;
                true
            }
            Err(e) => {
                error!(frame = %tick.frame, error = %e, "tick_egress_failed");
                // Reopen on the next write
                self.writer = None;
                false
            }
        }
    }

    /// Flush buffered tick records to disk
    pub fn flush(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.flush() {
                error!(error = %e, "tick_egress_flush_failed");
            }
        }
    }

    /// Write the session summary. Returns true if written (or disabled).
    pub fn write_summary(&mut self, summary: &SessionSummary) -> bool {
        self.flush();

        let Some(path) = self.summary_path.clone() else {
            return true;
        };

        let result = serde_json::to_string_pretty(summary)
            .map_err(std::io::Error::from)
            .and_then(|json| {
                let path = Path::new(&path);
                ensure_parent(path)?;
                std::fs::write(path, json)
            });

        match result {
            Ok(()) => {
                debug!(file = %path, sid = %summary.sid, "summary_written");
                true
            }
            Err(e) => {
                error!(file = %path, sid = %summary.sid, error = %e, "summary_egress_failed");
                false
            }
        }
    }
}

impl Drop for Egress {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{ClassCounts, SignalState};
    use crate::services::phase_machine::StateDurations;
    use crate::services::rates::ApproachRate;
    use crate::services::session::ApproachTotal;
    use chrono::Utc;
    use std::fs;
    use tempfile::tempdir;

    fn tick(frame: u64) -> TickStats {
        TickStats {
            site: "test".to_string(),
            frame,
            t_s: frame as f64 * 0.04,
            phase: "Principal".to_string(),
            state: SignalState::Green,
            remaining_s: 12,
            green_s: 12,
            decided: frame == 0,
            veh_per_min: vec![ApproachRate::new("Principal", 2.0)],
            live: ClassCounts::from([("car".to_string(), 1)]),
            counts: ClassCounts::new(),
            approaches: Vec::new(),
            durations: StateDurations::default(),
            crossings: 0,
        }
    }

    fn summary() -> SessionSummary {
        SessionSummary {
            sid: "sid-1".to_string(),
            site: "test".to_string(),
            started_at: Utc::now(),
            duration_s: 3.5,
            frames: 2,
            crossings: vec![ApproachTotal { approach: "Principal".to_string(), total: 1 }],
            counts: ClassCounts::new(),
            durations: StateDurations::default(),
            decisions: 1,
            git_hash: "abc1234".to_string(),
            output: None,
        }
    }

    #[test]
    fn test_write_ticks_jsonl() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out/ticks.jsonl");

        let mut egress = Egress::new(path.to_str().unwrap(), "");
        assert!(egress.write_tick(&tick(0)));
        assert!(egress.write_tick(&tick(1)));
        egress.flush();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(egress.ticks_written(), 2);

        let parsed: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed["frame"], 1);
        assert_eq!(parsed["state"], "GREEN");
        assert_eq!(parsed["veh_per_min"][0]["approach"], "Principal");
    }

    #[test]
    fn test_ticks_appended_across_writers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ticks.jsonl");
        let path_str = path.to_str().unwrap();

        {
            let mut egress = Egress::new(path_str, "");
            egress.write_tick(&tick(0));
        }
        {
            let mut egress = Egress::new(path_str, "");
            egress.write_tick(&tick(1));
        }

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_write_summary_pretty_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/summary.json");

        let mut egress = Egress::new("", path.to_str().unwrap());
        assert!(egress.write_summary(&summary()));

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains('\n'));
        let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed["sid"], "sid-1");
        assert_eq!(parsed["crossings"][0]["total"], 1);
        assert_eq!(parsed["git_hash"], "abc1234");
    }

    #[test]
    fn test_disabled_egress_writes_nothing() {
        let mut egress = Egress::disabled();
        assert!(egress.write_tick(&tick(0)));
        assert!(egress.write_summary(&summary()));
        assert_eq!(egress.ticks_path(), None);
        assert_eq!(egress.ticks_written(), 0);
    }

    #[test]
    fn test_unwritable_ticks_path_reports_failure() {
        let dir = tempdir().unwrap();
        // A directory cannot be opened for appending
        let mut egress = Egress::new(dir.path().to_str().unwrap(), "");
        assert!(!egress.write_tick(&tick(0)));
        assert_eq!(egress.ticks_written(), 0);
    }
}
