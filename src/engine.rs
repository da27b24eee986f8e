//! Origin attribution engine
//!
//! Wires the stack resolver, per-target journal, origin matcher and
//! suppression gate together. Interception glue feeds [`OriginEngine::intercept`];
//! the host's batched change detection feeds [`OriginEngine::on_change_batch`].
//!
//! The engine is single-owner mutable state. Hosts that deliver interceptions
//! from several threads share it through [`SharedEngine`], which serializes
//! every journal and dedupe mutation behind one mutex.

use crate::call_site::{StackResolver, TraceResolver};
use crate::change::{ChangeShape, DetectedChange};
use crate::clock::{Clock, MonotonicClock};
use crate::config::{self, Preset, StackDisplay, TracerConfig};
use crate::dedupe::Signature;
use crate::gate::{SuppressionGate, SuppressionReason};
use crate::journal::{JournalStats, OperationJournal, TargetId};
use crate::matcher::{OriginMatcher, ScoredCandidate};
use crate::operation::{Interception, OperationRecord};
use crate::scheduler::{SchedulerContext, SchedulerKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

/// Longest signature printed in a suppression notice
pub const NOTICE_SIGNATURE_CHARS: usize = 160;

/// Outcome of processing one detected change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionResult {
    pub change: ChangeShape,
    /// Best explaining operation, `None` when the origin is unknown
    pub origin: Option<OperationRecord>,
    /// Scored candidates, newest first (verbose mode only)
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub considered: Vec<ScoredCandidate>,
    pub suppressed: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub suppression_reason: Option<SuppressionReason>,
    /// Scheduler whose filter caused a scheduler suppression
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub suppressed_by: Option<SchedulerKind>,
    pub signature: Signature,
    pub suppressed_count: u64,
}

/// Aggregate line emitted every `summary_every` suppressions of a signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuppressionNotice {
    pub reason: SuppressionReason,
    pub suppressed_count: u64,
    /// Signature shortened for display
    pub signature: String,
}

/// Receiver for processed changes
pub trait ResultSink {
    fn emit(&mut self, result: AttributionResult);

    fn notice(&mut self, _notice: SuppressionNotice) {}
}

impl ResultSink for Vec<AttributionResult> {
    fn emit(&mut self, result: AttributionResult) {
        self.push(result);
    }
}

pub struct OriginEngine {
    config: TracerConfig,
    clock: Arc<dyn Clock>,
    resolver: Box<dyn StackResolver>,
    custom_resolver: bool,
    journal: OperationJournal,
    matcher: OriginMatcher,
    gate: SuppressionGate,
    scheduler: SchedulerContext,
    running: bool,
}

impl std::fmt::Debug for OriginEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OriginEngine")
            .field("config", &self.config)
            .field("journal", &self.journal.stats())
            .field("signatures", &self.gate.signatures())
            .field("running", &self.running)
            .finish()
    }
}

impl OriginEngine {
    pub fn new(config: TracerConfig) -> config::Result<Self> {
        config.validate()?;
        let resolver = TraceResolver::new(&config.resolver)?;
        Ok(Self {
            journal: OperationJournal::new(config.per_target_max),
            matcher: matcher_for(&config),
            clock: Arc::new(MonotonicClock::new()),
            resolver: Box::new(resolver),
            custom_resolver: false,
            gate: SuppressionGate::new(),
            scheduler: SchedulerContext::new(),
            running: true,
            config,
        })
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the stack resolver
    ///
    /// A custom resolver is kept across [`OriginEngine::set`] calls.
    pub fn with_resolver(mut self, resolver: Box<dyn StackResolver>) -> Self {
        self.resolver = resolver;
        self.custom_resolver = true;
        self
    }

    /// Scheduler flags shared with instrumented schedulers
    pub fn scheduler_context(&self) -> &SchedulerContext {
        &self.scheduler
    }

    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    pub fn now_ms(&self) -> f64 {
        self.clock.now_ms()
    }

    /// Merge a configuration patch
    ///
    /// On error the previous configuration stays in effect.
    pub fn set(&mut self, patch: &Value) -> config::Result<()> {
        let mut next = self.config.clone();
        next.merge(patch)?;
        if !self.custom_resolver && next.resolver != self.config.resolver {
            self.resolver = Box::new(TraceResolver::new(&next.resolver)?);
        }
        self.journal.set_capacity(next.per_target_max);
        self.matcher = matcher_for(&next);
        self.config = next;
        tracing::debug!(?patch, "configuration updated");
        Ok(())
    }

    pub fn apply_preset(&mut self, preset: Preset) -> config::Result<()> {
        self.set(&preset.patch())
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Stop attributing; later interceptions and batches are ignored
    pub fn stop(&mut self) {
        if self.running {
            self.running = false;
            tracing::info!(journal = ?self.journal.stats(), "engine stopped");
        }
    }

    /// Record one intercepted call
    ///
    /// Returns whether a journal entry was kept. Calls without a target or
    /// without a resolvable call site are dropped.
    pub fn intercept(&mut self, target: Option<TargetId>, interception: Interception) -> bool {
        if !self.running {
            return false;
        }
        let call_site = self.resolver.resolve(&interception.raw_trace);
        if call_site.is_none() {
            tracing::trace!(kind = %interception.kind, "no usable call site");
        }
        let record = OperationRecord {
            timestamp: self.clock.now_ms(),
            kind: interception.kind,
            sign: interception.sign,
            affected_keys: interception.affected_keys,
            call_site,
            raw_trace: interception.raw_trace,
            scheduler: self.scheduler.snapshot(),
        };
        self.journal.record(target, record)
    }

    /// Record an intercepted call, then run the original operation
    ///
    /// A panic while building or recording the interception is caught and
    /// discarded; `original` always runs and its result is returned as is.
    pub fn instrumented<R>(
        &mut self,
        target: Option<TargetId>,
        describe: impl FnOnce() -> Interception,
        original: impl FnOnce() -> R,
    ) -> R {
        let recorded = panic::catch_unwind(AssertUnwindSafe(|| {
            let interception = describe();
            self.intercept(target, interception)
        }));
        if recorded.is_err() {
            tracing::warn!("interception failed; calling original operation only");
        }
        original()
    }

    /// Attribute every change of one detection batch, in order
    pub fn on_change_batch(&mut self, batch: &[DetectedChange], sink: &mut dyn ResultSink) {
        if !self.running {
            return;
        }
        for change in batch {
            if let Some(result) = self.attribute(change, sink) {
                sink.emit(result);
            }
        }
    }

    fn attribute(
        &mut self,
        change: &DetectedChange,
        sink: &mut dyn ResultSink,
    ) -> Option<AttributionResult> {
        let shape = change.shape()?;
        let now = self.clock.now_ms();

        let candidates = self
            .journal
            .query(shape.target, self.matcher.window_start(now));
        let outcome = self.matcher.best_match(&shape, &candidates, now);
        let (mut origin, considered) = match outcome {
            Some(outcome) => (Some(outcome.origin), outcome.considered),
            None => (None, Vec::new()),
        };

        let site = origin.as_ref().and_then(|o| o.call_site.as_ref());
        let signature = Signature::new(site, &shape);
        let current = self.scheduler.snapshot();
        let context = origin
            .as_ref()
            .map_or(current, |o| o.scheduler.union(current));
        let decision = self
            .gate
            .decide(&self.config.filter, context, &signature, now);

        if SuppressionGate::should_summarize(&self.config.filter, &decision) {
            if let Some(reason) = decision.reason {
                let notice = SuppressionNotice {
                    reason,
                    suppressed_count: decision.suppressed_count,
                    signature: signature.shortened(NOTICE_SIGNATURE_CHARS),
                };
                tracing::info!(
                    reason = %notice.reason,
                    count = notice.suppressed_count,
                    signature = %notice.signature,
                    "suppressed repeats"
                );
                sink.notice(notice);
            }
        }

        if self.config.show_stacks == StackDisplay::None {
            if let Some(origin) = origin.as_mut() {
                origin.raw_trace.clear();
            }
        }
        let considered = if self.config.verbose {
            considered
        } else {
            Vec::new()
        };

        Some(AttributionResult {
            change: shape,
            origin,
            considered,
            suppressed: decision.is_suppressed(),
            suppression_reason: decision.reason,
            suppressed_by: decision.scheduler,
            signature,
            suppressed_count: decision.suppressed_count,
        })
    }

    /// Clear repeat counters and scheduler show-first budgets
    pub fn reset_dedupe(&mut self) {
        self.gate.reset();
        tracing::debug!("dedupe counters cleared");
    }

    /// Journal rows for `target`, oldest first
    pub fn dump(&self, target: TargetId) -> Vec<OperationRecord> {
        self.journal.dump(target).into_iter().cloned().collect()
    }

    /// Lifecycle notification: the host disposed of `target`
    pub fn release(&mut self, target: TargetId) -> bool {
        self.journal.release(target)
    }

    pub fn journal_stats(&self) -> JournalStats {
        self.journal.stats()
    }

    /// Number of distinct change signatures seen so far
    pub fn signatures(&self) -> usize {
        self.gate.signatures()
    }

    pub fn into_shared(self) -> SharedEngine {
        Arc::new(Mutex::new(self))
    }
}

/// Engine shared across threads
pub type SharedEngine = Arc<Mutex<OriginEngine>>;

fn matcher_for(config: &TracerConfig) -> OriginMatcher {
    OriginMatcher::new(
        config.window_ms,
        config.kind_weights.clone(),
        config.matching.clone(),
    )
}
