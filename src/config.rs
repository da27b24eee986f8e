//! Tracer configuration
//!
//! Options are nested tables. Updates are applied as deep-merged patches:
//! tables merge key by key, scalars and arrays replace. The same patch
//! mechanism backs TOML files, replay `config` events and filter presets.

use crate::matcher::MatchWeights;
use crate::operation::KindWeights;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while building or updating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Unknown filter preset: {0} (expected 'aggressive' or 'off')")]
    UnknownPreset(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid config patch: {0}")]
    Patch(#[from] serde_json::Error),
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Whether to attach raw traces to reported origins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackDisplay {
    #[default]
    None,
    Origin,
}

/// Per-scheduler noise filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerFilter {
    /// Suppress changes made inside this kind of callback
    pub ignore: bool,
    /// Occurrences still shown before suppression starts
    pub show_first: u32,
}

impl SchedulerFilter {
    pub fn new(ignore: bool, show_first: u32) -> Self {
        Self { ignore, show_first }
    }
}

impl Default for SchedulerFilter {
    fn default() -> Self {
        Self::new(false, 1)
    }
}

/// Noise and repetition filters applied by the suppression gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub interval: SchedulerFilter,
    pub timeout: SchedulerFilter,
    pub raf: SchedulerFilter,
    /// Same-signature changes closer than this are suppressed (0 disables)
    pub throttle_ms: f64,
    /// Show at most N per signature; negative disables the cap
    pub max_repeats: i64,
    /// Emit an aggregate notice every K suppressions of one signature
    pub summary_every: u64,
    pub report_suppressed: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            interval: SchedulerFilter::new(true, 1),
            timeout: SchedulerFilter::new(false, 1),
            raf: SchedulerFilter::new(false, 1),
            throttle_ms: 250.0,
            max_repeats: 8,
            summary_every: 50,
            report_suppressed: true,
        }
    }
}

/// Frame ranking weights
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameWeights {
    /// Same host, relative path or virtual scheme
    pub same_origin: i32,
    /// Script-like extension or virtual scheme
    pub code: i32,
    /// Frame has a real file name (not an opaque VM id)
    pub strong: i32,
    pub eval_penalty: i32,
}

impl Default for FrameWeights {
    fn default() -> Self {
        Self {
            same_origin: 4,
            code: 2,
            strong: 1,
            eval_penalty: -6,
        }
    }
}

/// Stack resolver options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Leading trace lines belonging to the capture boundary
    pub skip_frames: usize,
    /// Host considered same-origin (e.g. `app.example.com`)
    pub origin_host: Option<String>,
    /// Instrumentation source files, never reported
    pub self_files: Vec<String>,
    /// URL patterns of libraries whose frames are hidden
    pub hidden_libraries: Vec<String>,
    /// Line patterns dropped before parsing
    pub noise_patterns: Vec<String>,
    pub weights: FrameWeights,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            skip_frames: 2,
            origin_host: None,
            self_files: vec![
                "origin-tracer.js".to_string(),
                "class-origin-tracer.js".to_string(),
                "child-origin-tracer.js".to_string(),
            ],
            hidden_libraries: vec![
                r"(?:^|/)(?:jquery(?:-\d+\.\d+\.\d+)?(?:\.slim)?|jquery[.-]migrate(?:-\d+\.\d+\.\d+)?)(?:\.min)?\.js(?:[?#].*)?$"
                    .to_string(),
            ],
            noise_patterns: vec![
                "chrome-extension:".to_string(),
                "moz-extension:".to_string(),
                "extensions::".to_string(),
                "snippet://".to_string(),
            ],
            weights: FrameWeights::default(),
        }
    }
}

/// Complete tracer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    /// Recency window for matching journal entries
    pub window_ms: f64,
    /// Journal capacity per target
    pub per_target_max: usize,
    /// Include the scored candidate list in results
    pub verbose: bool,
    pub show_stacks: StackDisplay,
    pub filter: FilterConfig,
    pub resolver: ResolverConfig,
    pub kind_weights: KindWeights,
    pub matching: MatchWeights,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            window_ms: 1200.0,
            per_target_max: 24,
            verbose: false,
            show_stacks: StackDisplay::None,
            filter: FilterConfig::default(),
            resolver: ResolverConfig::default(),
            kind_weights: KindWeights::default(),
            matching: MatchWeights::default(),
        }
    }
}

impl TracerConfig {
    /// Load defaults overlaid with a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let patch: Value = toml::from_str(contents)?;
        let mut config = Self::default();
        config.merge(&patch)?;
        Ok(config)
    }

    /// Deep-merge a patch into this configuration
    ///
    /// The configuration is left untouched if the merged result is invalid.
    pub fn merge(&mut self, patch: &Value) -> Result<()> {
        let mut merged = serde_json::to_value(&*self)?;
        deep_merge(&mut merged, patch);
        let candidate: TracerConfig = serde_json::from_value(merged)?;
        candidate.validate()?;
        *self = candidate;
        Ok(())
    }

    pub fn apply_preset(&mut self, preset: Preset) -> Result<()> {
        self.merge(&preset.patch())
    }

    pub fn validate(&self) -> Result<()> {
        if self.per_target_max == 0 {
            return Err(ConfigError::Invalid(
                "per_target_max must be at least 1".to_string(),
            ));
        }
        if !self.window_ms.is_finite() || self.window_ms < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "window_ms must be a non-negative number, got {}",
                self.window_ms
            )));
        }
        if !self.filter.throttle_ms.is_finite() || self.filter.throttle_ms < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "filter.throttle_ms must be a non-negative number, got {}",
                self.filter.throttle_ms
            )));
        }
        Ok(())
    }
}

/// Named filter presets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    /// Hide scheduler noise and cap repeats hard
    Aggressive,
    /// Disable every noise filter
    Off,
}

impl Preset {
    pub fn patch(self) -> Value {
        match self {
            Preset::Aggressive => serde_json::json!({
                "filter": {
                    "interval": { "ignore": true, "show_first": 1 },
                    "raf": { "ignore": true, "show_first": 1 },
                    "timeout": { "ignore": true, "show_first": 0 },
                    "throttle_ms": 300.0,
                    "max_repeats": 3
                }
            }),
            Preset::Off => serde_json::json!({
                "filter": {
                    "interval": { "ignore": false },
                    "raf": { "ignore": false },
                    "timeout": { "ignore": false },
                    "throttle_ms": 0.0,
                    "max_repeats": -1
                }
            }),
        }
    }
}

impl FromStr for Preset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aggressive" => Ok(Preset::Aggressive),
            "off" => Ok(Preset::Off),
            other => Err(ConfigError::UnknownPreset(other.to_string())),
        }
    }
}

fn deep_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        deep_merge(existing, value)
                    }
                    _ => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}
