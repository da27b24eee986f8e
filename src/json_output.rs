//! JSON-lines result output
//!
//! Every processed change becomes one `{"type":"result",...}` line,
//! suppressed ones included; notices become `{"type":"notice",...}` lines.

use crate::engine::{AttributionResult, ResultSink, SuppressionNotice};
use serde::Serialize;
use std::io::{self, Write};

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum JsonLine<'a> {
    Result(&'a AttributionResult),
    Notice(&'a SuppressionNotice),
}

/// JSON-lines result sink over any writer
pub struct JsonSink<W: Write> {
    out: W,
    error: Option<anyhow::Error>,
    lines: usize,
}

impl<W: Write> JsonSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            error: None,
            lines: 0,
        }
    }

    /// Lines written so far
    pub fn lines(&self) -> usize {
        self.lines
    }

    pub fn finish(mut self) -> anyhow::Result<W> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        self.out.flush()?;
        Ok(self.out)
    }

    fn write_line(&mut self, line: &JsonLine<'_>) {
        let written = serde_json::to_string(line)
            .map_err(anyhow::Error::from)
            .and_then(|json| writeln!(self.out, "{json}").map_err(anyhow::Error::from));
        match written {
            Ok(()) => self.lines += 1,
            Err(err) => {
                if self.error.is_none() {
                    self.error = Some(err);
                }
            }
        }
    }
}

impl<W: Write> ResultSink for JsonSink<W> {
    fn emit(&mut self, result: AttributionResult) {
        self.write_line(&JsonLine::Result(&result));
    }

    fn notice(&mut self, notice: SuppressionNotice) {
        self.write_line(&JsonLine::Notice(&notice));
    }
}

/// Parse JSON-lines output back into values
pub fn parse_lines(text: &str) -> io::Result<Vec<serde_json::Value>> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(io::Error::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::{ChangeCategory, ChangeShape};
    use crate::dedupe::Signature;
    use crate::gate::SuppressionReason;
    use crate::journal::TargetId;

    fn suppressed_result() -> AttributionResult {
        let change = ChangeShape {
            category: ChangeCategory::ChildList,
            target: TargetId(2),
            added: vec!["li.item".into()],
            removed: vec![],
            before: vec![],
            after: vec![],
        };
        AttributionResult {
            signature: Signature::new(None, &change),
            change,
            origin: None,
            considered: Vec::new(),
            suppressed: true,
            suppression_reason: Some(SuppressionReason::Throttle),
            suppressed_by: None,
            suppressed_count: 1,
        }
    }

    #[test]
    fn test_result_line_shape() {
        let mut sink = JsonSink::new(Vec::new());
        sink.emit(suppressed_result());
        assert_eq!(sink.lines(), 1);
        let text = String::from_utf8(sink.finish().unwrap()).unwrap();
        let lines = parse_lines(&text).unwrap();
        let line = &lines[0];
        assert_eq!(line["type"], "result");
        assert_eq!(line["suppressed"], true);
        assert_eq!(line["suppression_reason"], "throttle");
        assert_eq!(line["change"]["category"], "child_list");
        assert_eq!(line["change"]["target"], 2);
        assert!(line["origin"].is_null());
        assert!(line.get("considered").is_none());
    }

    #[test]
    fn test_notice_line_shape() {
        let mut sink = JsonSink::new(Vec::new());
        sink.notice(SuppressionNotice {
            reason: SuppressionReason::Max,
            suppressed_count: 10,
            signature: "sig".into(),
        });
        let text = String::from_utf8(sink.finish().unwrap()).unwrap();
        let lines = parse_lines(&text).unwrap();
        assert_eq!(lines[0]["type"], "notice");
        assert_eq!(lines[0]["reason"], "max");
        assert_eq!(lines[0]["suppressed_count"], 10);
    }
}
