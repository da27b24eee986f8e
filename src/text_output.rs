//! Human-readable result output
//!
//! One group per reported change: a `[CLASS]` / `[CHILD]` header, the
//! before/after state, then the origin line. Suppressed changes print
//! nothing; suppression notices print as single lines.

use crate::change::{ChangeCategory, ChangeShape};
use crate::engine::{AttributionResult, ResultSink, SuppressionNotice};
use crate::matcher::ScoredCandidate;
use crate::operation::OperationRecord;
use std::io::{self, Write};

/// Text result sink over any writer
///
/// Write errors are remembered and surfaced by [`TextSink::finish`].
pub struct TextSink<W: Write> {
    out: W,
    error: Option<io::Error>,
    reported: usize,
}

impl<W: Write> TextSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            error: None,
            reported: 0,
        }
    }

    /// Changes printed so far
    pub fn reported(&self) -> usize {
        self.reported
    }

    pub fn finish(mut self) -> io::Result<W> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        self.out.flush()?;
        Ok(self.out)
    }

    fn write_result(&mut self, result: &AttributionResult) -> io::Result<()> {
        let change = &result.change;
        writeln!(
            self.out,
            "[{}] {} → {}",
            change.category,
            change.target,
            format_delta(change)
        )?;
        if change.category == ChangeCategory::Attribute {
            writeln!(self.out, "  before: {}", join_or_none(&change.before))?;
            writeln!(self.out, "  after : {}", join_or_none(&change.after))?;
        }

        match &result.origin {
            Some(origin) => {
                writeln!(self.out, "  origin: {}", format_origin(origin))?;
                if !result.considered.is_empty() {
                    self.write_decision_trace(&result.considered)?;
                }
                if !origin.raw_trace.is_empty() {
                    writeln!(self.out, "  stack:")?;
                    for line in origin.raw_trace.lines() {
                        writeln!(self.out, "    {}", line.trim())?;
                    }
                }
            }
            None => writeln!(
                self.out,
                "  origin: (no matching frame - likely initial render, other context or eval)"
            )?,
        }
        Ok(())
    }

    fn write_decision_trace(&mut self, considered: &[ScoredCandidate]) -> io::Result<()> {
        writeln!(self.out, "  decision trace:")?;
        writeln!(
            self.out,
            "    {:<26} {:<4} {:<20} {:>7} {:>6}  at",
            "kind", "sign", "keys", "age_ms", "score"
        )?;
        for candidate in considered {
            let record = &candidate.record;
            writeln!(
                self.out,
                "    {:<26} {:<4} {:<20} {:>7.0} {:>6.0}  {}",
                record.kind,
                record.sign,
                record.affected_keys.join(" "),
                candidate.age_ms,
                candidate.score,
                record
                    .call_site
                    .as_ref()
                    .map_or_else(|| "(none)".to_string(), ToString::to_string)
            )?;
        }
        Ok(())
    }

    fn record_error(&mut self, result: io::Result<()>) {
        if let Err(err) = result {
            if self.error.is_none() {
                self.error = Some(err);
            }
        }
    }
}

impl<W: Write> ResultSink for TextSink<W> {
    fn emit(&mut self, result: AttributionResult) {
        if result.suppressed {
            return;
        }
        let written = self.write_result(&result);
        if written.is_ok() {
            self.reported += 1;
        }
        self.record_error(written);
    }

    fn notice(&mut self, notice: SuppressionNotice) {
        let written = writeln!(
            self.out,
            "suppressed x{} ({}) for {}",
            notice.suppressed_count, notice.reason, notice.signature
        );
        self.record_error(written);
    }
}

fn format_delta(change: &ChangeShape) -> String {
    let mut parts = Vec::new();
    if !change.added.is_empty() {
        parts.push(format!("+{}", change.added.join(",")));
    }
    if !change.removed.is_empty() {
        parts.push(format!("-{}", change.removed.join(",")));
    }
    parts.join(" ")
}

fn format_origin(origin: &OperationRecord) -> String {
    let keys = if origin.affected_keys.is_empty() {
        String::new()
    } else {
        format!(" [{}]", origin.affected_keys.join(" "))
    };
    match &origin.call_site {
        Some(site) => format!("{} {}{} at {}", origin.kind, origin.sign, keys, site),
        None => format!("{} {}{}", origin.kind, origin.sign, keys),
    }
}

fn join_or_none(tokens: &[String]) -> String {
    if tokens.is_empty() {
        "(none)".to_string()
    } else {
        tokens.join(" ")
    }
}
