//! Change signatures and repeat counters

use crate::call_site::CallSite;
use crate::change::ChangeShape;
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Dedupe key summarising (call site, target identity, change shape)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(String);

impl Signature {
    /// Token order does not matter: added and removed lists are sorted.
    pub fn new(site: Option<&CallSite>, shape: &ChangeShape) -> Self {
        let site_key = site.map_or_else(|| "(no-site)".to_string(), CallSite::key);
        let mut added = shape.added.clone();
        added.sort();
        let mut removed = shape.removed.clone();
        removed.sort();
        Signature(format!(
            "{} :: {} :: {} +{} -{}",
            site_key,
            shape.target,
            shape.category,
            added.join("|"),
            removed.join("|")
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// At most `max_chars` characters, with an ellipsis when cut
    pub fn shortened(&self, max_chars: usize) -> String {
        if self.0.chars().count() <= max_chars {
            self.0.clone()
        } else {
            let mut cut: String = self.0.chars().take(max_chars).collect();
            cut.push('…');
            cut
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Repeat state for one signature
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DedupeEntry {
    /// Times this signature was allowed through
    pub count: u64,
    /// When it was last allowed through
    pub last_seen_at: Option<f64>,
    pub suppressed_count: u64,
}

/// Session-scoped signature counters
///
/// Entries are never evicted; only [`DedupeStore::clear`] resets them.
#[derive(Debug, Default)]
pub struct DedupeStore {
    entries: FnvHashMap<Signature, DedupeEntry>,
}

impl DedupeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&mut self, signature: &Signature) -> &mut DedupeEntry {
        self.entries.entry(signature.clone()).or_default()
    }

    pub fn get(&self, signature: &Signature) -> Option<&DedupeEntry> {
        self.entries.get(signature)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
