//! Suppression gate
//!
//! Decides whether a matched change is worth reporting. First match wins:
//!
//! 1. scheduler: the change ran inside an ignored scheduler callback and that
//!    scheduler's `show_first` budget is spent
//! 2. throttle: the signature was last allowed less than `throttle_ms` ago
//! 3. max: the signature already reached `max_repeats`
//!
//! Otherwise the change is allowed and the signature's counters advance.

use crate::config::{FilterConfig, SchedulerFilter};
use crate::dedupe::{DedupeEntry, DedupeStore, Signature};
use crate::scheduler::{SchedulerKind, SchedulerSnapshot};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a change was not reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
    Scheduler,
    Throttle,
    Max,
}

impl SuppressionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SuppressionReason::Scheduler => "scheduler",
            SuppressionReason::Throttle => "throttle",
            SuppressionReason::Max => "max",
        }
    }
}

impl fmt::Display for SuppressionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one gate decision
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateDecision {
    pub reason: Option<SuppressionReason>,
    /// Scheduler whose filter suppressed the change
    pub scheduler: Option<SchedulerKind>,
    /// Running suppression count of the signature
    pub suppressed_count: u64,
}

impl GateDecision {
    fn allow(entry: &DedupeEntry) -> Self {
        Self {
            reason: None,
            scheduler: None,
            suppressed_count: entry.suppressed_count,
        }
    }

    pub fn is_suppressed(&self) -> bool {
        self.reason.is_some()
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct ShownCounts {
    interval: u32,
    timeout: u32,
    animation_frame: u32,
}

impl ShownCounts {
    fn get_mut(&mut self, kind: SchedulerKind) -> &mut u32 {
        match kind {
            SchedulerKind::Interval => &mut self.interval,
            SchedulerKind::Timeout => &mut self.timeout,
            SchedulerKind::AnimationFrame => &mut self.animation_frame,
        }
    }
}

#[derive(Debug, Default)]
pub struct SuppressionGate {
    shown: ShownCounts,
    store: DedupeStore,
}

impl SuppressionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decide(
        &mut self,
        filter: &FilterConfig,
        context: SchedulerSnapshot,
        signature: &Signature,
        now_ms: f64,
    ) -> GateDecision {
        for kind in SchedulerKind::PRECEDENCE {
            if context.is_active(kind) && !self.allow_first(kind, scheduler_filter(filter, kind)) {
                return GateDecision {
                    reason: Some(SuppressionReason::Scheduler),
                    scheduler: Some(kind),
                    suppressed_count: self.store.get(signature).map_or(0, |e| e.suppressed_count),
                };
            }
        }

        let entry = self.store.entry(signature);

        let throttled = filter.throttle_ms > 0.0
            && entry
                .last_seen_at
                .is_some_and(|last| now_ms - last < filter.throttle_ms);
        if throttled {
            entry.suppressed_count += 1;
            return GateDecision {
                reason: Some(SuppressionReason::Throttle),
                scheduler: None,
                suppressed_count: entry.suppressed_count,
            };
        }

        if filter.max_repeats >= 0 && entry.count >= filter.max_repeats as u64 {
            entry.suppressed_count += 1;
            return GateDecision {
                reason: Some(SuppressionReason::Max),
                scheduler: None,
                suppressed_count: entry.suppressed_count,
            };
        }

        entry.count += 1;
        entry.last_seen_at = Some(now_ms);
        GateDecision::allow(entry)
    }

    /// Whether a suppression should produce an aggregate notice
    ///
    /// Only throttle and max suppressions count towards notices; scheduler
    /// suppressions never touch the signature's counters.
    pub fn should_summarize(filter: &FilterConfig, decision: &GateDecision) -> bool {
        matches!(
            decision.reason,
            Some(SuppressionReason::Throttle | SuppressionReason::Max)
        ) && filter.report_suppressed
            && filter.summary_every > 0
            && decision.suppressed_count > 0
            && decision.suppressed_count % filter.summary_every == 0
    }

    pub fn entry(&self, signature: &Signature) -> Option<&DedupeEntry> {
        self.store.get(signature)
    }

    pub fn signatures(&self) -> usize {
        self.store.len()
    }

    /// Clear repeat counters and scheduler show-first budgets
    pub fn reset(&mut self) {
        self.store.clear();
        self.shown = ShownCounts::default();
    }

    fn allow_first(&mut self, kind: SchedulerKind, filter: &SchedulerFilter) -> bool {
        if !filter.ignore {
            return true;
        }
        let shown = self.shown.get_mut(kind);
        if *shown < filter.show_first {
            *shown += 1;
            true
        } else {
            false
        }
    }
}

fn scheduler_filter(filter: &FilterConfig, kind: SchedulerKind) -> &SchedulerFilter {
    match kind {
        SchedulerKind::Interval => &filter.interval,
        SchedulerKind::Timeout => &filter.timeout,
        SchedulerKind::AnimationFrame => &filter.raf,
    }
}
