//! CLI argument parsing for origin-tracer

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Output format for attribution results
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    Text,
    /// JSON lines for machine parsing
    Json,
}

/// Filter preset selectable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PresetArg {
    /// Hide scheduler noise and cap repeats hard
    Aggressive,
    /// Disable every noise filter
    Off,
}

#[derive(Parser, Debug)]
#[command(name = "origin-tracer")]
#[command(version)]
#[command(
    about = "Attribute batched tree changes to the code that caused them",
    long_about = None
)]
pub struct Cli {
    /// Recorded session to replay (JSON lines, `-` for stdin)
    #[arg(value_name = "SESSION")]
    pub session: PathBuf,

    /// TOML configuration file
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Filter preset applied after the config file
    #[arg(long = "preset", value_enum)]
    pub preset: Option<PresetArg>,

    /// Match recency window in milliseconds
    #[arg(long = "window-ms", value_name = "MS")]
    pub window_ms: Option<f64>,

    /// Journal capacity per target
    #[arg(long = "per-target-max", value_name = "N")]
    pub per_target_max: Option<usize>,

    /// Output format (text or json)
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Include the scored candidate list for every match
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Attach the raw stack trace of each reported origin
    #[arg(long = "show-stacks")]
    pub show_stacks: bool,

    /// Enable debug tracing output to stderr
    #[arg(long = "debug")]
    pub debug: bool,
}

impl Cli {
    /// Configuration patch for the overrides given on the command line
    pub fn overrides(&self) -> serde_json::Value {
        let mut patch = serde_json::Map::new();
        if let Some(window_ms) = self.window_ms {
            patch.insert("window_ms".into(), window_ms.into());
        }
        if let Some(per_target_max) = self.per_target_max {
            patch.insert("per_target_max".into(), per_target_max.into());
        }
        if self.verbose {
            patch.insert("verbose".into(), true.into());
        }
        if self.show_stacks {
            patch.insert("show_stacks".into(), "origin".into());
        }
        serde_json::Value::Object(patch)
    }
}
