//! Origin matching
//!
//! Given a detected change and its target's journal, pick the journal entry
//! that most plausibly caused it.
//!
//! Candidate pool, narrowest first: entries whose sign equals the wanted
//! direction, then any signed entry, then everything in the window.
//! Ambiguous (`?`) entries are a last resort.
//!
//! Score = `kind_weight * 10` + sign bonus + token-overlap bonus + a small
//! recency bonus that decays linearly to zero. Overlap dominates: an entry
//! naming the changed token is a near-certain cause, while recency only
//! breaks ties since unrelated code can interleave within one batch window.
//! Candidates are scanned newest first and only a strictly higher score
//! replaces the best, so equal scores resolve to the most recent entry.

use crate::change::ChangeShape;
use crate::operation::{KindWeights, OperationRecord, Sign};
use serde::{Deserialize, Serialize};

/// Match scoring weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchWeights {
    /// Multiplier applied to the kind weight
    pub kind_scale: f64,
    pub sign_bonus: f64,
    pub overlap_bonus: f64,
    /// Recency bonus for a zero-age entry
    pub recency_max: f64,
    /// Milliseconds per point of recency decay
    pub recency_decay_ms: f64,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            kind_scale: 10.0,
            sign_bonus: 30.0,
            overlap_bonus: 100.0,
            recency_max: 5.0,
            recency_decay_ms: 300.0,
        }
    }
}

/// A journal entry with the score it received
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub record: OperationRecord,
    pub score: f64,
    pub age_ms: f64,
}

/// Result of a successful match
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub origin: OperationRecord,
    /// Every scored candidate, newest first
    pub considered: Vec<ScoredCandidate>,
}

#[derive(Debug, Clone)]
pub struct OriginMatcher {
    window_ms: f64,
    kind_weights: KindWeights,
    weights: MatchWeights,
}

impl OriginMatcher {
    pub fn new(window_ms: f64, kind_weights: KindWeights, weights: MatchWeights) -> Self {
        Self {
            window_ms,
            kind_weights,
            weights,
        }
    }

    /// Oldest timestamp still inside the window at `now_ms`
    pub fn window_start(&self, now_ms: f64) -> f64 {
        now_ms - self.window_ms
    }

    /// Best explaining entry for `shape`, or `None` if the window is empty
    ///
    /// `journal` must be in insertion (oldest first) order.
    pub fn best_match(
        &self,
        shape: &ChangeShape,
        journal: &[&OperationRecord],
        now_ms: f64,
    ) -> Option<MatchOutcome> {
        let window: Vec<&OperationRecord> = journal
            .iter()
            .copied()
            .filter(|r| now_ms - r.timestamp <= self.window_ms)
            .collect();
        if window.is_empty() {
            return None;
        }

        let want = shape.want();
        let pool = candidate_pool(&window, want);
        let tokens = shape.compared_tokens();

        let mut best: Option<(f64, &OperationRecord)> = None;
        let mut considered = Vec::with_capacity(pool.len());
        for record in pool.iter().rev() {
            let age_ms = now_ms - record.timestamp;
            let score = self.score(record, want, &tokens, age_ms);
            considered.push(ScoredCandidate {
                record: (*record).clone(),
                score,
                age_ms,
            });
            if best.map_or(true, |(best_score, _)| score > best_score) {
                best = Some((score, record));
            }
        }

        let (score, origin) = best?;
        tracing::debug!(
            kind = %origin.kind,
            score,
            candidates = considered.len(),
            window = window.len(),
            "matched origin"
        );
        Some(MatchOutcome {
            origin: origin.clone(),
            considered,
        })
    }

    pub fn score(
        &self,
        record: &OperationRecord,
        want: Option<Sign>,
        tokens: &[String],
        age_ms: f64,
    ) -> f64 {
        let w = &self.weights;
        let mut score = f64::from(self.kind_weights.weight(&record.kind)) * w.kind_scale;
        if want == Some(record.sign) {
            score += w.sign_bonus;
        }
        if record.overlaps(tokens) {
            score += w.overlap_bonus;
        }
        if w.recency_decay_ms > 0.0 {
            score += (w.recency_max - age_ms / w.recency_decay_ms).max(0.0);
        }
        score
    }
}

fn candidate_pool<'a>(
    window: &[&'a OperationRecord],
    want: Option<Sign>,
) -> Vec<&'a OperationRecord> {
    let Some(want) = want else {
        return window.to_vec();
    };
    let exact: Vec<_> = window.iter().copied().filter(|r| r.sign == want).collect();
    if !exact.is_empty() {
        return exact;
    }
    let signed: Vec<_> = window
        .iter()
        .copied()
        .filter(|r| r.sign != Sign::Ambiguous)
        .collect();
    if !signed.is_empty() {
        return signed;
    }
    window.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_site::CallSite;
    use crate::change::ChangeCategory;
    use crate::journal::TargetId;
    use crate::scheduler::SchedulerSnapshot;

    fn matcher() -> OriginMatcher {
        OriginMatcher::new(1200.0, KindWeights::default(), MatchWeights::default())
    }

    fn op(t: f64, kind: &str, sign: Sign, keys: &[&str], line: u32) -> OperationRecord {
        OperationRecord {
            timestamp: t,
            kind: kind.to_string(),
            sign,
            affected_keys: keys.iter().map(|k| k.to_string()).collect(),
            call_site: Some(CallSite::new("a.js", line, Some(4))),
            raw_trace: String::new(),
            scheduler: SchedulerSnapshot::default(),
        }
    }

    fn change(added: &[&str], removed: &[&str]) -> ChangeShape {
        ChangeShape {
            category: ChangeCategory::Attribute,
            target: TargetId(1),
            added: added.iter().map(|s| s.to_string()).collect(),
            removed: removed.iter().map(|s| s.to_string()).collect(),
            before: vec![],
            after: vec![],
        }
    }

    fn line_of(outcome: &MatchOutcome) -> u32 {
        outcome.origin.call_site.as_ref().unwrap().line
    }

    #[test]
    fn test_empty_window_is_none() {
        let old = op(0.0, "classList.add", Sign::Add, &["a"], 1);
        let journal = vec![&old];
        assert!(matcher().best_match(&change(&["a"], &[]), &journal, 1201.0).is_none());
        assert!(matcher().best_match(&change(&["a"], &[]), &[], 0.0).is_none());
    }

    #[test]
    fn test_simple_add_match() {
        let add = op(0.0, "classList.add", Sign::Add, &["active"], 10);
        let outcome = matcher()
            .best_match(&change(&["active"], &[]), &[&add], 50.0)
            .unwrap();
        assert_eq!(line_of(&outcome), 10);
        assert_eq!(outcome.considered.len(), 1);
    }

    #[test]
    fn test_wanted_sign_is_preferred() {
        let remove = op(0.0, "classList.remove", Sign::Remove, &["x"], 1);
        let add = op(10.0, "classList.add", Sign::Add, &["y"], 2);
        let outcome = matcher()
            .best_match(&change(&["y"], &[]), &[&remove, &add], 20.0)
            .unwrap();
        assert_eq!(line_of(&outcome), 2);
    }

    #[test]
    fn test_opposite_sign_excluded_when_wanted_exists() {
        // The removal names the token and is newer, but a '+' entry exists.
        let add = op(0.0, "className=", Sign::Add, &[], 1);
        let remove = op(5.0, "classList.remove", Sign::Remove, &["y"], 2);
        let outcome = matcher()
            .best_match(&change(&["y"], &[]), &[&add, &remove], 10.0)
            .unwrap();
        assert_eq!(outcome.origin.sign, Sign::Add);
        assert_eq!(outcome.considered.len(), 1);
    }

    #[test]
    fn test_falls_back_to_signed_before_ambiguous() {
        let toggle = op(0.0, "classList.toggle", Sign::Ambiguous, &["y"], 1);
        let remove = op(5.0, "classList.remove", Sign::Remove, &["z"], 2);
        let outcome = matcher()
            .best_match(&change(&["y"], &[]), &[&toggle, &remove], 10.0)
            .unwrap();
        assert_eq!(line_of(&outcome), 2);
    }

    #[test]
    fn test_ambiguous_only_as_last_resort() {
        let toggle = op(0.0, "classList.toggle", Sign::Ambiguous, &["y"], 1);
        let outcome = matcher()
            .best_match(&change(&["y"], &[]), &[&toggle], 10.0)
            .unwrap();
        assert_eq!(line_of(&outcome), 1);
    }

    #[test]
    fn test_overlap_dominates_kind_and_recency() {
        let weak_overlapping = op(0.0, "className=", Sign::Add, &["open"], 1);
        let strong_newer = op(900.0, "classList.add", Sign::Add, &["other"], 2);
        let outcome = matcher()
            .best_match(
                &change(&["open"], &[]),
                &[&weak_overlapping, &strong_newer],
                1000.0,
            )
            .unwrap();
        assert_eq!(line_of(&outcome), 1);
    }

    #[test]
    fn test_equal_scores_resolve_to_newest() {
        let m = OriginMatcher::new(
            1200.0,
            KindWeights::default(),
            MatchWeights {
                recency_max: 0.0,
                ..MatchWeights::default()
            },
        );
        let first = op(0.0, "classList.add", Sign::Add, &["a"], 1);
        let second = op(100.0, "classList.add", Sign::Add, &["a"], 2);
        let outcome = m
            .best_match(&change(&["a"], &[]), &[&first, &second], 200.0)
            .unwrap();
        assert_eq!(line_of(&outcome), 2);
    }

    #[test]
    fn test_recency_decays_to_zero() {
        let m = matcher();
        let record = op(0.0, "unknown.kind", Sign::Ambiguous, &[], 1);
        assert_eq!(m.score(&record, None, &[], 0.0), 15.0);
        assert_eq!(m.score(&record, None, &[], 300.0), 14.0);
        assert_eq!(m.score(&record, None, &[], 1500.0), 10.0);
        assert_eq!(m.score(&record, None, &[], 3000.0), 10.0);
    }

    #[test]
    fn test_score_components() {
        let m = matcher();
        let record = op(0.0, "classList.add", Sign::Add, &["a"], 1);
        let tokens = vec!["a".to_string()];
        assert_eq!(m.score(&record, Some(Sign::Add), &tokens, 1500.0), 90.0 + 30.0 + 100.0);
        assert_eq!(m.score(&record, Some(Sign::Remove), &[], 1500.0), 90.0);
    }

    #[test]
    fn test_replace_change_considers_all_entries() {
        let add = op(0.0, "classList.add", Sign::Add, &["n"], 1);
        let remove = op(1.0, "classList.remove", Sign::Remove, &["o"], 2);
        let write = op(2.0, "className=", Sign::Ambiguous, &[], 3);
        let outcome = matcher()
            .best_match(&change(&["n"], &["o"]), &[&add, &remove, &write], 10.0)
            .unwrap();
        assert_eq!(outcome.considered.len(), 3);
        // both explicit helpers overlap; recency favours the newer one
        assert_eq!(line_of(&outcome), 2);
    }
}
