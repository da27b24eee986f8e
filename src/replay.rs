//! Recorded session replay
//!
//! A session is a JSON-lines file. Every line is one event with an `event`
//! tag and a timestamp `t` in milliseconds that drives a manual clock:
//!
//! ```text
//! {"t":0,"event":"enter","scheduler":"interval"}
//! {"t":0,"event":"op","target":1,"kind":"classList.add","sign":"+","keys":["on"],"trace":"..."}
//! {"t":0,"event":"exit","scheduler":"interval"}
//! {"t":16,"event":"batch","changes":[{"type":"attribute","target":1,"before":[],"after":["on"]}]}
//! ```
//!
//! `op` events with `before`/`after` class strings are treated as whole-value
//! class writes and derive their own sign and keys.

use crate::clock::{Clock, ManualClock};
use crate::change::DetectedChange;
use crate::config::{ConfigError, Preset, TracerConfig};
use crate::engine::{OriginEngine, ResultSink};
use crate::journal::TargetId;
use crate::operation::{Interception, Sign};
use crate::scheduler::{CallbackGuard, SchedulerKind};
use serde::Deserialize;
use serde_json::Value;
use std::io::BufRead;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("Failed to read session: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid event on line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Configuration rejected on line {line}: {source}")]
    Config {
        line: usize,
        #[source]
        source: ConfigError,
    },

    #[error("Line {line}: exit from {scheduler} callback without matching enter")]
    UnbalancedExit { line: usize, scheduler: SchedulerKind },
}

pub type Result<T> = std::result::Result<T, ReplayError>;

/// One session line
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReplayEvent {
    pub t: f64,
    #[serde(flatten)]
    pub action: ReplayAction,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReplayAction {
    /// An intercepted call
    Op {
        #[serde(default)]
        target: Option<TargetId>,
        kind: String,
        #[serde(default)]
        sign: Option<Sign>,
        #[serde(default)]
        keys: Vec<String>,
        #[serde(default)]
        trace: String,
        #[serde(default)]
        before: Option<String>,
        #[serde(default)]
        after: Option<String>,
    },
    Enter {
        scheduler: SchedulerKind,
    },
    Exit {
        scheduler: SchedulerKind,
    },
    Batch {
        changes: Vec<DetectedChange>,
    },
    Config {
        patch: Value,
    },
    Preset {
        name: String,
    },
    ResetDedupe,
    Release {
        target: TargetId,
    },
    Stop,
}

impl ReplayAction {
    fn interception(&self) -> Option<(Option<TargetId>, Interception)> {
        let ReplayAction::Op {
            target,
            kind,
            sign,
            keys,
            trace,
            before,
            after,
        } = self
        else {
            return None;
        };
        let interception = match (before, after) {
            (Some(before), Some(after)) if keys.is_empty() => {
                let mut write = Interception::class_write(kind.as_str(), before, after, trace.as_str());
                if let Some(sign) = sign {
                    write.sign = *sign;
                }
                write
            }
            _ => Interception::new(kind.as_str(), sign.unwrap_or(Sign::Ambiguous), trace.as_str())
                .with_keys(keys.iter().cloned()),
        };
        Some((*target, interception))
    }
}

/// Counters for a finished replay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplaySummary {
    pub events: usize,
    pub interceptions: usize,
    pub recorded: usize,
    pub batches: usize,
    pub changes: usize,
}

/// Drives an engine from session events
pub struct Replay<S: ResultSink> {
    engine: OriginEngine,
    clock: ManualClock,
    open_callbacks: Vec<CallbackGuard>,
    sink: S,
    summary: ReplaySummary,
}

impl<S: ResultSink> Replay<S> {
    pub fn new(config: TracerConfig, sink: S) -> std::result::Result<Self, ConfigError> {
        let clock = ManualClock::new(0.0);
        let engine = OriginEngine::new(config)?.with_clock(Arc::new(clock.clone()));
        Ok(Self {
            engine,
            clock,
            open_callbacks: Vec::new(),
            sink,
            summary: ReplaySummary::default(),
        })
    }

    pub fn engine(&self) -> &OriginEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut OriginEngine {
        &mut self.engine
    }

    pub fn summary(&self) -> ReplaySummary {
        self.summary
    }

    /// Replay every line of `reader`; blank lines are skipped
    pub fn run<R: BufRead>(&mut self, reader: R) -> Result<ReplaySummary> {
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let line_no = index + 1;
            if line.trim().is_empty() {
                continue;
            }
            let event: ReplayEvent = serde_json::from_str(&line)
                .map_err(|source| ReplayError::Parse {
                    line: line_no,
                    source,
                })?;
            self.apply(line_no, event)?;
        }
        if !self.open_callbacks.is_empty() {
            tracing::warn!(
                open = self.open_callbacks.len(),
                "session ended inside scheduler callbacks"
            );
            self.open_callbacks.clear();
        }
        Ok(self.summary)
    }

    pub fn apply(&mut self, line: usize, event: ReplayEvent) -> Result<()> {
        if event.t < self.clock.now_ms() {
            tracing::warn!(line, t = event.t, "timestamp went backwards; keeping clock");
        }
        self.clock.set(event.t);
        self.summary.events += 1;

        if let Some((target, interception)) = event.action.interception() {
            self.summary.interceptions += 1;
            if self.engine.intercept(target, interception) {
                self.summary.recorded += 1;
            }
            return Ok(());
        }

        match event.action {
            ReplayAction::Op { .. } => {}
            ReplayAction::Enter { scheduler } => {
                let guard = self.engine.scheduler_context().enter(scheduler);
                self.open_callbacks.push(guard);
            }
            ReplayAction::Exit { scheduler } => {
                let position = self
                    .open_callbacks
                    .iter()
                    .rposition(|g| g.kind() == scheduler)
                    .ok_or(ReplayError::UnbalancedExit { line, scheduler })?;
                self.open_callbacks.remove(position);
            }
            ReplayAction::Batch { changes } => {
                self.summary.batches += 1;
                self.summary.changes += changes.len();
                self.engine.on_change_batch(&changes, &mut self.sink);
            }
            ReplayAction::Config { patch } => self
                .engine
                .set(&patch)
                .map_err(|source| ReplayError::Config { line, source })?,
            ReplayAction::Preset { name } => {
                let preset: Preset = name
                    .parse()
                    .map_err(|source| ReplayError::Config { line, source })?;
                self.engine
                    .apply_preset(preset)
                    .map_err(|source| ReplayError::Config { line, source })?;
            }
            ReplayAction::ResetDedupe => self.engine.reset_dedupe(),
            ReplayAction::Release { target } => {
                self.engine.release(target);
            }
            ReplayAction::Stop => self.engine.stop(),
        }
        Ok(())
    }

    pub fn into_parts(self) -> (OriginEngine, S) {
        (self.engine, self.sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::AttributionResult;
    use crate::gate::SuppressionReason;

    fn replay(session: &str) -> (ReplaySummary, Vec<AttributionResult>) {
        let mut replay = Replay::new(TracerConfig::default(), Vec::new()).unwrap();
        let summary = replay.run(session.as_bytes()).unwrap();
        let (_, results) = replay.into_parts();
        (summary, results)
    }

    const TRACE: &str = r#"Error\n    at a (tracer.js:1:1)\n    at open (menu.js:12:3)"#;

    #[test]
    fn test_parse_event() {
        let event: ReplayEvent =
            serde_json::from_str(r#"{"t":5,"event":"enter","scheduler":"raf"}"#).unwrap();
        assert_eq!(event.t, 5.0);
        assert_eq!(
            event.action,
            ReplayAction::Enter {
                scheduler: SchedulerKind::AnimationFrame
            }
        );
        let event: ReplayEvent = serde_json::from_str(r#"{"t":0,"event":"reset_dedupe"}"#).unwrap();
        assert_eq!(event.action, ReplayAction::ResetDedupe);
    }

    #[test]
    fn test_op_then_batch() {
        let session = format!(
            "{{\"t\":0,\"event\":\"op\",\"target\":1,\"kind\":\"classList.add\",\"sign\":\"+\",\"keys\":[\"open\"],\"trace\":\"{TRACE}\"}}\n\
             \n\
             {{\"t\":16,\"event\":\"batch\",\"changes\":[{{\"type\":\"attribute\",\"target\":1,\"before\":[],\"after\":[\"open\"]}}]}}\n"
        );
        let (summary, results) = replay(&session);
        assert_eq!(summary.events, 2);
        assert_eq!(summary.recorded, 1);
        assert_eq!(results.len(), 1);
        let site = results[0].origin.as_ref().unwrap().call_site.as_ref().unwrap();
        assert_eq!(site.url, "menu.js");
        assert_eq!(site.line, 12);
    }

    #[test]
    fn test_class_write_op() {
        let event: ReplayEvent = serde_json::from_str(
            r#"{"t":0,"event":"op","target":1,"kind":"className=","before":"a b","after":"a c"}"#,
        )
        .unwrap();
        let (_, interception) = event.action.interception().unwrap();
        assert_eq!(interception.sign, Sign::Ambiguous);
        assert_eq!(interception.affected_keys, vec!["c", "b"]);
    }

    #[test]
    fn test_scheduler_suppression_from_enter_exit() {
        let op = |t: u32, key: &str| {
            format!(
                "{{\"t\":{t},\"event\":\"op\",\"target\":1,\"kind\":\"classList.add\",\"sign\":\"+\",\"keys\":[\"{key}\"],\"trace\":\"{TRACE}\"}}"
            )
        };
        let batch = |t: u32, key: &str| {
            format!(
                "{{\"t\":{t},\"event\":\"batch\",\"changes\":[{{\"type\":\"attribute\",\"target\":1,\"before\":[],\"after\":[\"{key}\"]}}]}}"
            )
        };
        let session = [
            r#"{"t":0,"event":"enter","scheduler":"interval"}"#.to_string(),
            op(0, "a"),
            r#"{"t":0,"event":"exit","scheduler":"interval"}"#.to_string(),
            batch(1, "a"),
            r#"{"t":2000,"event":"enter","scheduler":"interval"}"#.to_string(),
            op(2000, "b"),
            r#"{"t":2000,"event":"exit","scheduler":"interval"}"#.to_string(),
            batch(2001, "b"),
        ]
        .join("\n");
        let (_, results) = replay(&session);
        assert_eq!(results.len(), 2);
        assert!(!results[0].suppressed);
        assert_eq!(results[1].suppression_reason, Some(SuppressionReason::Scheduler));
    }

    #[test]
    fn test_unbalanced_exit() {
        let mut replay = Replay::new(TracerConfig::default(), Vec::new()).unwrap();
        let err = replay
            .run(r#"{"t":0,"event":"exit","scheduler":"timeout"}"#.as_bytes())
            .unwrap_err();
        assert!(matches!(err, ReplayError::UnbalancedExit { line: 1, .. }));
    }

    #[test]
    fn test_bad_line_reports_line_number() {
        let mut replay = Replay::new(TracerConfig::default(), Vec::new()).unwrap();
        let err = replay
            .run("{\"t\":0,\"event\":\"stop\"}\nnot json\n".as_bytes())
            .unwrap_err();
        assert!(matches!(err, ReplayError::Parse { line: 2, .. }));
    }

    #[test]
    fn test_preset_and_config_events() {
        let mut replay = Replay::new(TracerConfig::default(), Vec::new()).unwrap();
        replay
            .run(
                "{\"t\":0,\"event\":\"preset\",\"name\":\"off\"}\n{\"t\":0,\"event\":\"config\",\"patch\":{\"window_ms\":50}}\n"
                    .as_bytes(),
            )
            .unwrap();
        assert_eq!(replay.engine().config().filter.max_repeats, -1);
        assert_eq!(replay.engine().config().window_ms, 50.0);

        let err = replay
            .run("{\"t\":1,\"event\":\"preset\",\"name\":\"loud\"}".as_bytes())
            .unwrap_err();
        assert!(matches!(err, ReplayError::Config { line: 1, .. }));
    }

    #[test]
    fn test_stop_ignores_later_events() {
        let session = format!(
            "{{\"t\":0,\"event\":\"stop\"}}\n{{\"t\":1,\"event\":\"op\",\"target\":1,\"kind\":\"classList.add\",\"sign\":\"+\",\"trace\":\"{TRACE}\"}}\n"
        );
        let (summary, results) = replay(&session);
        assert_eq!(summary.interceptions, 1);
        assert_eq!(summary.recorded, 0);
        assert!(results.is_empty());
    }
}
