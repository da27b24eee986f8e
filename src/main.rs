use anyhow::{Context, Result};
use clap::Parser;
use origin_tracer::cli::{Cli, OutputFormat, PresetArg};
use origin_tracer::config::{Preset, TracerConfig};
use origin_tracer::engine::ResultSink;
use origin_tracer::json_output::JsonSink;
use origin_tracer::replay::{Replay, ReplaySummary};
use origin_tracer::text_output::TextSink;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Build the effective configuration: file, then preset, then flags
fn load_config(cli: &Cli) -> Result<TracerConfig> {
    let mut config = match &cli.config {
        Some(path) => TracerConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => TracerConfig::default(),
    };
    if let Some(preset) = cli.preset {
        let preset = match preset {
            PresetArg::Aggressive => Preset::Aggressive,
            PresetArg::Off => Preset::Off,
        };
        config.apply_preset(preset)?;
    }
    config
        .merge(&cli.overrides())
        .context("Invalid command-line option")?;
    Ok(config)
}

fn open_session(cli: &Cli) -> Result<Box<dyn BufRead>> {
    if cli.session.as_os_str() == "-" {
        return Ok(Box::new(BufReader::new(io::stdin())));
    }
    let file = File::open(&cli.session)
        .with_context(|| format!("Failed to open session {}", cli.session.display()))?;
    Ok(Box::new(BufReader::new(file)))
}

fn replay_into<S: ResultSink>(
    config: TracerConfig,
    sink: S,
    session: Box<dyn BufRead>,
) -> Result<(ReplaySummary, S)> {
    let mut replay = Replay::new(config, sink)?;
    let summary = replay.run(session)?;
    let (_, sink) = replay.into_parts();
    Ok((summary, sink))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let config = load_config(&cli)?;
    let session = open_session(&cli)?;
    let stdout = io::stdout().lock();

    let summary = match cli.format {
        OutputFormat::Text => {
            let (summary, sink) = replay_into(config, TextSink::new(stdout), session)?;
            sink.finish().context("Failed to write output")?;
            summary
        }
        OutputFormat::Json => {
            let (summary, sink) = replay_into(config, JsonSink::new(stdout), session)?;
            sink.finish().context("Failed to write output")?;
            summary
        }
    };

    tracing::debug!(?summary, "replay finished");
    Ok(())
}
