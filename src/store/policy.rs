//! Selection policies.

use serde::{Deserialize, Serialize};

use crate::error::PolicyError;
use crate::types::unix_now;

/// What a policy does to source selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    /// Never select the source.
    Block,
    /// Use the source only for the target.
    Reserved,
    /// Do not use the source for the target.
    Avoid,
    /// Keep serving the target through the source that served it last.
    Sticky,
}

impl PolicyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Reserved => "reserved",
            Self::Avoid => "avoid",
            Self::Sticky => "sticky",
        }
    }
}

impl std::fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rule constraining which source may serve which destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub id: String,
    pub kind: PolicyKind,
    pub issuer: String,
    #[serde(default)]
    pub source_id: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub reason: String,
    /// Unix seconds.
    pub issued_at: u64,
}

impl Policy {
    fn build(kind: PolicyKind, issuer: &str, source_id: &str, target: &str, id: String) -> Self {
        Self {
            id,
            kind,
            issuer: issuer.to_string(),
            source_id: source_id.to_string(),
            target: target.to_string(),
            reason: String::new(),
            issued_at: unix_now(),
        }
    }

    pub fn block(issuer: &str, source_id: &str) -> Self {
        let id = format!("block_{source_id}");
        Self::build(PolicyKind::Block, issuer, source_id, "", id)
    }

    pub fn reserved(issuer: &str, source_id: &str, target: &str) -> Self {
        let id = format!("reserve_{source_id}_{target}");
        Self::build(PolicyKind::Reserved, issuer, source_id, target, id)
    }

    pub fn avoid(issuer: &str, source_id: &str, target: &str) -> Self {
        let id = format!("avoid_{source_id}_{target}");
        Self::build(PolicyKind::Avoid, issuer, source_id, target, id)
    }

    /// Affinity for `issuer`; an empty `target` covers every destination.
    pub fn sticky(issuer: &str, target: &str) -> Self {
        let id = if target.is_empty() {
            format!("sticky_{issuer}")
        } else {
            format!("sticky_{issuer}_{target}")
        };
        Self::build(PolicyKind::Sticky, issuer, "", target, id)
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Check the kind-specific required fields.
    pub fn validate(&self) -> Result<(), PolicyError> {
        match self.kind {
            PolicyKind::Block => {
                if self.source_id.is_empty() {
                    return Err(PolicyError::EmptySourceId);
                }
            }
            PolicyKind::Reserved | PolicyKind::Avoid => {
                if self.source_id.is_empty() {
                    return Err(PolicyError::EmptySourceId);
                }
                if self.target.is_empty() {
                    return Err(PolicyError::EmptyTarget);
                }
            }
            PolicyKind::Sticky => {}
        }
        Ok(())
    }

    pub(crate) fn blocks(&self, source: &str) -> bool {
        self.kind == PolicyKind::Block && self.source_id == source
    }

    pub(crate) fn reserves(&self, source: &str) -> bool {
        self.kind == PolicyKind::Reserved && self.source_id == source
    }

    pub(crate) fn reserves_for(&self, source: &str, target: &str) -> bool {
        self.reserves(source) && self.target == target
    }

    pub(crate) fn avoids(&self, source: &str, target: &str) -> bool {
        self.kind == PolicyKind::Avoid && self.source_id == source && self.target == target
    }

    pub(crate) fn sticks(&self, target: &str) -> bool {
        self.kind == PolicyKind::Sticky && (self.target.is_empty() || self.target == target)
    }
}
