//! Detected changes delivered by the batched change-detection collaborator

use crate::journal::TargetId;
use crate::operation::Sign;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Split a whitespace-separated token string, dropping empties
pub fn split_tokens(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_string).collect()
}

/// Order-preserving `(added, removed)` between two token lists
pub fn token_diff(before: &[String], after: &[String]) -> (Vec<String>, Vec<String>) {
    let before_set: HashSet<&str> = before.iter().map(String::as_str).collect();
    let after_set: HashSet<&str> = after.iter().map(String::as_str).collect();

    let mut seen = HashSet::new();
    let added = after
        .iter()
        .filter(|t| !before_set.contains(t.as_str()) && seen.insert(t.as_str()))
        .cloned()
        .collect();

    let mut seen = HashSet::new();
    let removed = before
        .iter()
        .filter(|t| !after_set.contains(t.as_str()) && seen.insert(t.as_str()))
        .cloned()
        .collect();

    (added, removed)
}

/// A node added to or removed from a child list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildNode {
    /// Short human label (`li.item`, `#text(len=4)`)
    pub label: String,
    /// Whitespace-only text node; never counts as a change
    #[serde(default)]
    pub blank_text: bool,
}

impl ChildNode {
    pub fn element(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            blank_text: false,
        }
    }

    pub fn blank_text() -> Self {
        Self {
            label: "#text".to_string(),
            blank_text: true,
        }
    }
}

/// One entry of a change-detection batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DetectedChange {
    /// Token-list attribute change (e.g. `class`)
    Attribute {
        target: TargetId,
        #[serde(default)]
        before: Vec<String>,
        #[serde(default)]
        after: Vec<String>,
    },
    /// Structural change; `target` is the parent whose children changed
    ChildList {
        target: TargetId,
        #[serde(default)]
        added_nodes: Vec<ChildNode>,
        #[serde(default)]
        removed_nodes: Vec<ChildNode>,
    },
}

/// Which engine a change belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeCategory {
    Attribute,
    ChildList,
}

impl fmt::Display for ChangeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeCategory::Attribute => f.write_str("CLASS"),
            ChangeCategory::ChildList => f.write_str("CHILD"),
        }
    }
}

/// The observable difference of a detected change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeShape {
    pub category: ChangeCategory,
    pub target: TargetId,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub before: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub after: Vec<String>,
}

impl ChangeShape {
    /// Direction the explaining operation should have
    pub fn want(&self) -> Option<Sign> {
        Sign::of_change(self.added.len(), self.removed.len())
    }

    /// Tokens an operation's affected keys are compared against
    pub fn compared_tokens(&self) -> Vec<String> {
        match self.want() {
            Some(Sign::Add) => self.added.clone(),
            Some(Sign::Remove) => self.removed.clone(),
            _ => self
                .added
                .iter()
                .chain(self.removed.iter())
                .cloned()
                .collect(),
        }
    }
}

impl DetectedChange {
    pub fn target(&self) -> TargetId {
        match self {
            DetectedChange::Attribute { target, .. } | DetectedChange::ChildList { target, .. } => {
                *target
            }
        }
    }

    /// Derive the change shape, or `None` when nothing observable changed
    pub fn shape(&self) -> Option<ChangeShape> {
        let shape = match self {
            DetectedChange::Attribute {
                target,
                before,
                after,
            } => {
                let (added, removed) = token_diff(before, after);
                ChangeShape {
                    category: ChangeCategory::Attribute,
                    target: *target,
                    added,
                    removed,
                    before: before.clone(),
                    after: after.clone(),
                }
            }
            DetectedChange::ChildList {
                target,
                added_nodes,
                removed_nodes,
            } => ChangeShape {
                category: ChangeCategory::ChildList,
                target: *target,
                added: significant_labels(added_nodes),
                removed: significant_labels(removed_nodes),
                before: Vec::new(),
                after: Vec::new(),
            },
        };
        if shape.added.is_empty() && shape.removed.is_empty() {
            None
        } else {
            Some(shape)
        }
    }
}

fn significant_labels(nodes: &[ChildNode]) -> Vec<String> {
    nodes
        .iter()
        .filter(|n| !n.blank_text)
        .map(|n| n.label.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(s: &str) -> Vec<String> {
        split_tokens(s)
    }

    #[test]
    fn test_split_tokens() {
        assert_eq!(tokens("  a   b\tc \n"), vec!["a", "b", "c"]);
        assert!(tokens("   ").is_empty());
    }

    #[test]
    fn test_token_diff_preserves_order_and_dedups() {
        let (added, removed) = token_diff(&tokens("a b c"), &tokens("c d d e a"));
        assert_eq!(added, vec!["d", "e"]);
        assert_eq!(removed, vec!["b"]);
    }

    #[test]
    fn test_attribute_shape() {
        let change = DetectedChange::Attribute {
            target: TargetId(3),
            before: tokens("btn"),
            after: tokens("btn active"),
        };
        let shape = change.shape().unwrap();
        assert_eq!(shape.category, ChangeCategory::Attribute);
        assert_eq!(shape.added, vec!["active"]);
        assert!(shape.removed.is_empty());
        assert_eq!(shape.want(), Some(Sign::Add));
        assert_eq!(shape.compared_tokens(), vec!["active"]);
    }

    #[test]
    fn test_reordered_tokens_are_no_change() {
        let change = DetectedChange::Attribute {
            target: TargetId(3),
            before: tokens("a b"),
            after: tokens("b a"),
        };
        assert!(change.shape().is_none());
    }

    #[test]
    fn test_child_list_ignores_blank_text() {
        let change = DetectedChange::ChildList {
            target: TargetId(9),
            added_nodes: vec![ChildNode::blank_text()],
            removed_nodes: vec![],
        };
        assert!(change.shape().is_none());

        let change = DetectedChange::ChildList {
            target: TargetId(9),
            added_nodes: vec![ChildNode::blank_text(), ChildNode::element("li.item")],
            removed_nodes: vec![ChildNode::element("li.old")],
        };
        let shape = change.shape().unwrap();
        assert_eq!(shape.added, vec!["li.item"]);
        assert_eq!(shape.removed, vec!["li.old"]);
        assert_eq!(shape.want(), None);
        assert_eq!(shape.compared_tokens(), vec!["li.item", "li.old"]);
    }

    #[test]
    fn test_detected_change_json_shape() {
        let change: DetectedChange = serde_json::from_str(
            r#"{"type":"child_list","target":4,"added_nodes":[{"label":"div"}]}"#,
        )
        .unwrap();
        assert_eq!(change.target(), TargetId(4));
        assert_eq!(change.shape().unwrap().added, vec!["div"]);
    }
}
