//! Intercepted mutation-causing operations

use crate::call_site::CallSite;
use crate::change::{split_tokens, token_diff};
use crate::scheduler::SchedulerSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Intended direction of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sign {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Remove,
    /// Replace-style or toggle; direction unknown at interception time
    #[serde(rename = "?")]
    Ambiguous,
}

impl Sign {
    pub fn as_str(self) -> &'static str {
        match self {
            Sign::Add => "+",
            Sign::Remove => "-",
            Sign::Ambiguous => "?",
        }
    }

    /// `+` for additions only, `-` for removals only, otherwise `None`
    pub fn of_change(added: usize, removed: usize) -> Option<Sign> {
        match (added > 0, removed > 0) {
            (true, false) => Some(Sign::Add),
            (false, true) => Some(Sign::Remove),
            _ => None,
        }
    }
}

impl fmt::Display for Sign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sign {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "+" => Ok(Sign::Add),
            "-" => Ok(Sign::Remove),
            "?" => Ok(Sign::Ambiguous),
            other => Err(format!("invalid sign: {other:?} (expected +, - or ?)")),
        }
    }
}

/// What an interception wrapper reports for one wrapped call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interception {
    pub kind: String,
    pub sign: Sign,
    #[serde(default)]
    pub affected_keys: Vec<String>,
    /// Freshly captured stack trace text
    #[serde(default)]
    pub raw_trace: String,
}

impl Interception {
    pub fn new(kind: impl Into<String>, sign: Sign, raw_trace: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            sign,
            affected_keys: Vec::new(),
            raw_trace: raw_trace.into(),
        }
    }

    pub fn with_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.affected_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Interception for a whole-value class write (`className = ...`)
    ///
    /// Affected keys are the tokens that actually change; the sign is
    /// one-directional only when the write purely adds or purely removes.
    pub fn class_write(
        kind: impl Into<String>,
        before: &str,
        after: &str,
        raw_trace: impl Into<String>,
    ) -> Self {
        let (added, removed) = token_diff(&split_tokens(before), &split_tokens(after));
        let sign = Sign::of_change(added.len(), removed.len()).unwrap_or(Sign::Ambiguous);
        let mut keys = added;
        keys.extend(removed);
        Self::new(kind, sign, raw_trace).with_keys(keys)
    }
}

/// One journal entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    /// Monotonic interception time (ms)
    pub timestamp: f64,
    pub kind: String,
    pub sign: Sign,
    pub affected_keys: Vec<String>,
    pub call_site: Option<CallSite>,
    /// Kept for on-demand diagnostic display only
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub raw_trace: String,
    /// Scheduler callbacks active when the call was intercepted
    #[serde(default)]
    pub scheduler: SchedulerSnapshot,
}

impl OperationRecord {
    pub fn overlaps(&self, tokens: &[String]) -> bool {
        self.affected_keys.iter().any(|k| tokens.contains(k))
    }
}

/// Weight table ranking operation kinds
///
/// Explicit, intentional helpers outrank incidental bulk writes. Unknown
/// kinds weigh 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KindWeights(BTreeMap<String, u32>);

impl KindWeights {
    pub const UNKNOWN: u32 = 1;

    pub fn weight(&self, kind: &str) -> u32 {
        self.0.get(kind).copied().unwrap_or(Self::UNKNOWN)
    }

    pub fn set(&mut self, kind: impl Into<String>, weight: u32) {
        self.0.insert(kind.into(), weight);
    }

    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }
}

impl Default for KindWeights {
    fn default() -> Self {
        let table: &[(&str, u32)] = &[
            // class tokens
            ("classList.add", 9),
            ("classList.remove", 9),
            ("classList.toggle", 8),
            ("jQuery.addClass", 9),
            ("jQuery.removeClass", 9),
            ("jQuery.removeClass(all)", 9),
            ("jQuery.toggleClass", 8),
            ("SVG.baseVal=", 7),
            ("jQuery.attr(class)", 6),
            ("jQuery.prop(className)", 6),
            ("setAttribute(class)", 6),
            ("setAttributeNS(class)", 6),
            ("className=", 6),
            // child lists
            ("appendChild", 10),
            ("insertBefore", 10),
            ("removeChild", 10),
            ("replaceChild(+)", 10),
            ("replaceChild(-)", 10),
            ("ChildNode.remove", 10),
            ("Element.append", 9),
            ("Element.prepend", 9),
            ("Element.before", 9),
            ("Element.after", 9),
            ("jQuery.append", 8),
            ("jQuery.prepend", 8),
            ("jQuery.before", 8),
            ("jQuery.after", 8),
            ("jQuery.remove", 8),
            ("jQuery.detach", 8),
            ("jQuery.empty", 8),
            ("innerHTML=", 6),
            ("outerHTML=", 6),
            ("jQuery.html(set)", 6),
        ];
        Self(
            table
                .iter()
                .map(|(kind, weight)| (kind.to_string(), *weight))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_of_change() {
        assert_eq!(Sign::of_change(2, 0), Some(Sign::Add));
        assert_eq!(Sign::of_change(0, 1), Some(Sign::Remove));
        assert_eq!(Sign::of_change(1, 1), None);
        assert_eq!(Sign::of_change(0, 0), None);
    }

    #[test]
    fn test_sign_serde_uses_symbols() {
        assert_eq!(serde_json::to_string(&Sign::Add).unwrap(), "\"+\"");
        let sign: Sign = serde_json::from_str("\"?\"").unwrap();
        assert_eq!(sign, Sign::Ambiguous);
        assert_eq!("-".parse::<Sign>().unwrap(), Sign::Remove);
        assert!("x".parse::<Sign>().is_err());
    }

    #[test]
    fn test_kind_weights_default_table() {
        let weights = KindWeights::default();
        assert_eq!(weights.weight("classList.add"), 9);
        assert_eq!(weights.weight("appendChild"), 10);
        assert_eq!(weights.weight("className="), 6);
        assert_eq!(weights.weight("never.heard.of"), KindWeights::UNKNOWN);
        assert!(weights.weight("classList.add") > weights.weight("className="));
    }

    #[test]
    fn test_kind_weights_custom_table() {
        let mut weights = KindWeights::empty();
        assert_eq!(weights.weight("classList.add"), KindWeights::UNKNOWN);
        weights.set("host.poke", 4);
        assert_eq!(weights.weight("host.poke"), 4);
    }

    #[test]
    fn test_class_write_pure_addition() {
        let op = Interception::class_write("className=", "a b", "a b c", "trace");
        assert_eq!(op.sign, Sign::Add);
        assert_eq!(op.affected_keys, vec!["c".to_string()]);
    }

    #[test]
    fn test_class_write_replacement_is_ambiguous() {
        let op = Interception::class_write("setAttribute(class)", "a b", "a c", "");
        assert_eq!(op.sign, Sign::Ambiguous);
        assert_eq!(op.affected_keys, vec!["c".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_record_overlap() {
        let record = OperationRecord {
            timestamp: 0.0,
            kind: "classList.add".into(),
            sign: Sign::Add,
            affected_keys: vec!["active".into(), "open".into()],
            call_site: None,
            raw_trace: String::new(),
            scheduler: SchedulerSnapshot::default(),
        };
        assert!(record.overlaps(&["open".to_string()]));
        assert!(!record.overlaps(&["closed".to_string()]));
        assert!(!record.overlaps(&[]));
    }
}
