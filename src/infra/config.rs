//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! Count lines may be given inline under `[lanes]` or in a separate JSON lane
//! document referenced by `lanes.file`.

use crate::domain::geometry::Point;
use crate::domain::types::{CountLine, Direction, LabelTable};
use anyhow::{bail, ensure, Context};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct CountLineConfig {
    pub p1: [f64; 2],
    pub p2: [f64; 2],
    #[serde(default)]
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApproachConfig {
    #[serde(default = "default_approach_name")]
    pub name: String,
    #[serde(default)]
    pub count_lines: Vec<CountLineConfig>,
}

fn default_approach_name() -> String {
    "AP".to_string()
}

/// Standalone lane document (JSON). Unknown keys such as `zones` are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct LanesDocument {
    #[serde(default)]
    pub approaches: Vec<ApproachConfig>,
    #[serde(default = "default_rate_window_s")]
    pub rate_window_s: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LanesConfig {
    /// Path to a JSON lane document; overrides inline approaches
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub approaches: Vec<ApproachConfig>,
    #[serde(default = "default_rate_window_s")]
    pub rate_window_s: u64,
}

fn default_rate_window_s() -> u64 {
    30
}

/// Demand cutoffs used to map weighted demand onto green time
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct DensityThresholds {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
}

impl Default for DensityThresholds {
    fn default() -> Self {
        Self { low: 6.0, medium: 12.0, high: 20.0 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_min_green")]
    pub min_green: u32,
    #[serde(default = "default_max_green")]
    pub max_green: u32,
    #[serde(default = "default_green_extension")]
    pub green_extension: u32,
    #[serde(default = "default_clearance")]
    pub clearance: u32,
    #[serde(default = "default_fixed_red")]
    pub fixed_red: u32,
    #[serde(default)]
    pub density_thresholds: DensityThresholds,
    /// Replaces the built-in weight table entirely when present
    #[serde(default)]
    pub class_weights: Option<HashMap<String, f64>>,
    #[serde(default)]
    pub phase_change_penalty: f64,
    /// Phase used when the controller has no decision to offer
    #[serde(default = "default_fallback_phase")]
    pub fallback_phase: String,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            min_green: default_min_green(),
            max_green: default_max_green(),
            green_extension: default_green_extension(),
            clearance: default_clearance(),
            fixed_red: default_fixed_red(),
            density_thresholds: DensityThresholds::default(),
            class_weights: None,
            phase_change_penalty: 0.0,
            fallback_phase: default_fallback_phase(),
        }
    }
}

fn default_min_green() -> u32 {
    12
}

fn default_max_green() -> u32 {
    60
}

fn default_green_extension() -> u32 {
    3
}

fn default_clearance() -> u32 {
    4
}

fn default_fixed_red() -> u32 {
    10
}

fn default_fallback_phase() -> String {
    "Principal".to_string()
}

/// Built-in relative weights per vehicle class
pub fn default_class_weights() -> HashMap<String, f64> {
    HashMap::from([
        ("car".to_string(), 1.0),
        ("motorbike".to_string(), 0.6),
        ("bus".to_string(), 2.5),
        ("truck".to_string(), 2.0),
        ("van".to_string(), 1.2),
        ("bicycle".to_string(), 0.3),
        ("rickshaw".to_string(), 0.8),
    ])
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LabelsConfig {
    /// Class index (as string key) -> label
    #[serde(default)]
    pub names: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TrackingConfig {
    /// Forget tracks not seen for this many seconds (0 = never)
    #[serde(default)]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EgressConfig {
    /// JSONL file receiving one record per processed frame ("" disables)
    #[serde(default)]
    pub ticks_file: String,
    /// JSON file receiving the session summary ("" disables)
    #[serde(default)]
    pub summary_file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

fn default_metrics_interval() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Intersection identifier (e.g., "av-central-5")
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "intersection".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    pub lanes: LanesConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub labels: LabelsConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub egress: EgressConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    count_lines: Vec<CountLine>,
    approaches: Vec<String>,
    rate_window_s: u64,
    min_green: u32,
    max_green: u32,
    green_extension: u32,
    clearance: u32,
    fixed_red: u32,
    density_thresholds: DensityThresholds,
    class_weights: HashMap<String, f64>,
    phase_change_penalty: f64,
    fallback_phase: String,
    labels: LabelTable,
    track_idle_timeout_secs: u64,
    ticks_file: String,
    summary_file: String,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        let control = ControlConfig::default();
        Self {
            site_id: default_site_id(),
            count_lines: vec![CountLine {
                p1: Point::new(0.0, 40.0),
                p2: Point::new(200.0, 40.0),
                approach: "Principal".to_string(),
                direction: Some(Direction::Down),
            }],
            approaches: vec!["Principal".to_string()],
            rate_window_s: default_rate_window_s(),
            min_green: control.min_green,
            max_green: control.max_green,
            green_extension: control.green_extension,
            clearance: control.clearance,
            fixed_red: control.fixed_red,
            density_thresholds: control.density_thresholds,
            class_weights: default_class_weights(),
            phase_change_penalty: control.phase_change_penalty,
            fallback_phase: control.fallback_phase,
            labels: LabelTable::default(),
            track_idle_timeout_secs: 0,
            ticks_file: String::new(),
            summary_file: String::new(),
            metrics_interval_secs: default_metrics_interval(),
            config_file: "default".to_string(),
        }
    }
}

/// Flatten approaches into count lines, keeping approach order of first appearance
fn build_count_lines(approaches: &[ApproachConfig]) -> anyhow::Result<(Vec<CountLine>, Vec<String>)> {
    let mut lines = Vec::new();
    let mut names: Vec<String> = Vec::new();

    for ap in approaches {
        if !names.contains(&ap.name) {
            names.push(ap.name.clone());
        }
        for (i, ln) in ap.count_lines.iter().enumerate() {
            let direction = match ln.dir.as_deref() {
                Some(dir) => Direction::parse(dir)
                    .map_err(|e| anyhow::anyhow!("approach '{}' line {}: {}", ap.name, i, e))?,
                None => None,
            };
            lines.push(CountLine {
                p1: Point::from(ln.p1),
                p2: Point::from(ln.p2),
                approach: ap.name.clone(),
                direction,
            });
        }
    }

    Ok((lines, names))
}

impl Config {
    /// Determine config file path from the CONFIG_FILE environment variable
    pub fn default_config_path() -> String {
        env::var("CONFIG_FILE").unwrap_or_else(|_| "config/dev.toml".to_string())
    }

    /// Load a JSON lane document
    pub fn load_lanes_document<P: AsRef<Path>>(path: P) -> anyhow::Result<LanesDocument> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read lane file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse lane file {}", path.display()))
    }

    /// Load configuration from a TOML file and validate it
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        let (approaches, rate_window_s) = match &toml_config.lanes.file {
            Some(file) => {
                // Relative lane paths are relative to the config file
                let lane_path = match path.parent() {
                    Some(dir) if Path::new(file).is_relative() => dir.join(file),
                    _ => PathBuf::from(file),
                };
                let doc = Self::load_lanes_document(&lane_path)?;
                (doc.approaches, doc.rate_window_s)
            }
            None => (toml_config.lanes.approaches.clone(), toml_config.lanes.rate_window_s),
        };

        let (count_lines, approach_names) = build_count_lines(&approaches)
            .with_context(|| format!("Invalid lanes in {}", path.display()))?;

        let mut label_names = HashMap::new();
        for (key, value) in toml_config.labels.names {
            match key.parse::<u32>() {
                Ok(idx) => {
                    label_names.insert(idx, value);
                }
                Err(_) => bail!("labels.names key '{}' is not a class index", key),
            }
        }

        let control = toml_config.control;
        let config = Self {
            site_id: toml_config.site.id,
            count_lines,
            approaches: approach_names,
            rate_window_s,
            min_green: control.min_green,
            max_green: control.max_green,
            green_extension: control.green_extension,
            clearance: control.clearance,
            fixed_red: control.fixed_red,
            density_thresholds: control.density_thresholds,
            class_weights: control.class_weights.unwrap_or_else(default_class_weights),
            phase_change_penalty: control.phase_change_penalty,
            fallback_phase: control.fallback_phase,
            labels: LabelTable::new(label_names),
            track_idle_timeout_secs: toml_config.tracking.idle_timeout_secs,
            ticks_file: toml_config.egress.ticks_file,
            summary_file: toml_config.egress.summary_file,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file: path.display().to_string(),
        };

        config
            .validate()
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    /// Reject bounds the controller and counter cannot honour
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(!self.approaches.is_empty(), "at least one approach is required");
        ensure!(!self.count_lines.is_empty(), "at least one count line is required");
        ensure!(self.rate_window_s >= 1, "rate_window_s must be at least 1 second");
        ensure!(self.min_green >= 1, "min_green must be at least 1 second");
        ensure!(
            self.min_green <= self.max_green,
            "min_green ({}) must not exceed max_green ({})",
            self.min_green,
            self.max_green
        );
        ensure!(
            self.green_extension <= self.max_green,
            "green_extension ({}) must not exceed max_green ({})",
            self.green_extension,
            self.max_green
        );

        let th = &self.density_thresholds;
        ensure!(
            [th.low, th.medium, th.high].iter().all(|v| v.is_finite() && *v >= 0.0),
            "density thresholds must be finite and non-negative"
        );
        ensure!(
            th.low <= th.medium && th.medium <= th.high,
            "density thresholds must satisfy low <= medium <= high"
        );

        for (class, weight) in &self.class_weights {
            ensure!(
                weight.is_finite() && *weight >= 0.0,
                "class weight for '{}' must be finite and non-negative",
                class
            );
        }
        ensure!(
            self.phase_change_penalty.is_finite() && self.phase_change_penalty >= 0.0,
            "phase_change_penalty must be finite and non-negative"
        );
        ensure!(!self.fallback_phase.is_empty(), "fallback_phase must not be empty");

        for line in &self.count_lines {
            ensure!(
                [line.p1.x, line.p1.y, line.p2.x, line.p2.y].iter().all(|v| v.is_finite()),
                "count line for '{}' has non-finite coordinates",
                line.approach
            );
        }
        Ok(())
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn count_lines(&self) -> &[CountLine] {
        &self.count_lines
    }

    /// Approach names in configuration order
    pub fn approaches(&self) -> &[String] {
        &self.approaches
    }

    pub fn rate_window_s(&self) -> u64 {
        self.rate_window_s
    }

    pub fn min_green(&self) -> u32 {
        self.min_green
    }

    pub fn max_green(&self) -> u32 {
        self.max_green
    }

    pub fn green_extension(&self) -> u32 {
        self.green_extension
    }

    pub fn clearance(&self) -> u32 {
        self.clearance
    }

    pub fn fixed_red(&self) -> u32 {
        self.fixed_red
    }

    pub fn density_thresholds(&self) -> DensityThresholds {
        self.density_thresholds
    }

    pub fn class_weights(&self) -> &HashMap<String, f64> {
        &self.class_weights
    }

    pub fn phase_change_penalty(&self) -> f64 {
        self.phase_change_penalty
    }

    pub fn fallback_phase(&self) -> &str {
        &self.fallback_phase
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    pub fn track_idle_timeout_secs(&self) -> u64 {
        self.track_idle_timeout_secs
    }

    pub fn ticks_file(&self) -> &str {
        &self.ticks_file
    }

    pub fn summary_file(&self) -> &str {
        &self.summary_file
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to replace the count lines
    #[cfg(test)]
    pub fn with_count_lines(mut self, lines: Vec<CountLine>) -> Self {
        let mut names: Vec<String> = Vec::new();
        for line in &lines {
            if !names.contains(&line.approach) {
                names.push(line.approach.clone());
            }
        }
        self.approaches = names;
        self.count_lines = lines;
        self
    }

    /// Builder method for tests to set signal timings
    #[cfg(test)]
    pub fn with_timings(mut self, min_green: u32, max_green: u32, clearance: u32, fixed_red: u32) -> Self {
        self.min_green = min_green;
        self.max_green = max_green;
        self.clearance = clearance;
        self.fixed_red = fixed_red;
        self
    }

    /// Builder method for tests to set the track idle timeout
    #[cfg(test)]
    pub fn with_track_idle_timeout_secs(mut self, secs: u64) -> Self {
        self.track_idle_timeout_secs = secs;
        self
    }
}
