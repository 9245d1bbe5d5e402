//! Bind history: which source last served an issuer/destination pair.

use dashmap::DashMap;
use serde::Serialize;

use crate::types::unix_now;

/// One remembered binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindRecord {
    pub source: String,
    /// Unix seconds.
    pub bound_at: u64,
}

/// Concurrent `(issuer, target) -> source` map.
#[derive(Debug, Default)]
pub struct BindHistory {
    entries: DashMap<(String, String), BindRecord>,
}

impl BindHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, issuer: &str, target: &str, source: &str) {
        self.entries.insert(
            (issuer.to_string(), target.to_string()),
            BindRecord {
                source: source.to_string(),
                bound_at: unix_now(),
            },
        );
    }

    pub fn lookup(&self, issuer: &str, target: &str) -> Option<BindRecord> {
        self.entries
            .get(&(issuer.to_string(), target.to_string()))
            .map(|e| e.value().clone())
    }

    /// Drop every binding pointing at `source`. Returns how many went.
    pub fn forget_source(&self, source: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, record| record.source != source);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
