//! Policy-governed source store.
//!
//! Holds the active set the listener reconciles, the policy set managed
//! through the API and the bind history written by [`SourceStore::select`].
//!
//! Selection precedence, strongest first:
//!
//! 1. Block: the source is never eligible.
//! 2. Reserved: a source reserved for other destinations is not eligible;
//!    when sources are reserved for this destination, only they are.
//! 3. Avoid: removes the pairing unless the source is reserved for it.
//! 4. Sticky: reuse the source the issuer's last binding names, if eligible.
//! 5. Round-robin over what remains, ordered by name.

mod history;
mod policy;

pub use history::{BindHistory, BindRecord};
pub use policy::{Policy, PolicyKind};

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::source::{SharedSource, Store};

/// Source as exposed through the management API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceSnapshot {
    pub name: String,
    pub mtu: Option<u32>,
    pub blocked: bool,
}

/// In-memory store of active sources and policies.
#[derive(Default)]
pub struct SourceStore {
    active: RwLock<Vec<SharedSource>>,
    policies: RwLock<Vec<Policy>>,
    history: BindHistory,
    cursor: AtomicUsize,
}

impl SourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Active sources with their block status.
    pub fn get_sources_snapshot(&self) -> Vec<SourceSnapshot> {
        let policies = self.policies.read();
        self.active
            .read()
            .iter()
            .map(|s| SourceSnapshot {
                name: s.name().to_string(),
                mtu: s.mtu(),
                blocked: policies.iter().any(|p| p.blocks(s.name())),
            })
            .collect()
    }

    /// Validate and add a policy.
    pub fn append_policy(&self, policy: Policy) -> Result<()> {
        policy.validate()?;

        let mut policies = self.policies.write();
        if policies.iter().any(|p| p.id == policy.id) {
            return Err(Error::PolicyConflict(policy.id));
        }
        info!(
            id = %policy.id,
            kind = %policy.kind,
            issuer = %policy.issuer,
            "Policy added"
        );
        policies.push(policy);
        Ok(())
    }

    /// Remove a policy by id, returning it.
    pub fn del_policy(&self, id: &str) -> Result<Policy> {
        let mut policies = self.policies.write();
        let idx = policies
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| Error::PolicyNotFound(id.to_string()))?;
        let policy = policies.remove(idx);
        info!(id = %policy.id, "Policy removed");
        Ok(policy)
    }

    pub fn get_policies_snapshot(&self) -> Vec<Policy> {
        self.policies.read().clone()
    }

    /// Source that last served `target` for `issuer`.
    pub fn query_bind_history(&self, issuer: &str, target: &str) -> Option<String> {
        self.history.lookup(issuer, target).map(|r| r.source)
    }

    pub fn bind_history(&self) -> &BindHistory {
        &self.history
    }

    /// Choose an active source for `target` honoring every policy.
    pub fn select(&self, target: &str) -> Result<SharedSource> {
        let active = self.get_active();
        let policies = self.policies.read();

        let mut eligible: Vec<SharedSource> = active
            .into_iter()
            .filter(|s| !policies.iter().any(|p| p.blocks(s.name())))
            .filter(|s| {
                let name = s.name();
                let reserved = policies.iter().any(|p| p.reserves(name));
                !reserved || policies.iter().any(|p| p.reserves_for(name, target))
            })
            .collect();

        let reserved_here: HashSet<&str> = policies
            .iter()
            .filter(|p| eligible.iter().any(|s| p.reserves_for(s.name(), target)))
            .map(|p| p.source_id.as_str())
            .collect();
        if !reserved_here.is_empty() {
            eligible.retain(|s| reserved_here.contains(s.name()));
        }

        eligible.retain(|s| {
            let name = s.name();
            reserved_here.contains(name) || !policies.iter().any(|p| p.avoids(name, target))
        });

        if eligible.is_empty() {
            return Err(Error::NoSourceAvailable {
                target: target.to_string(),
            });
        }

        let sticky: Vec<&Policy> = policies.iter().filter(|p| p.sticks(target)).collect();
        let bound = sticky.iter().find_map(|p| {
            let name = self.query_bind_history(&p.issuer, target)?;
            eligible.iter().find(|s| s.name() == name).cloned()
        });

        let chosen = match bound {
            Some(source) => {
                debug!(source = source.name(), target, "Sticky binding reused");
                source
            }
            None => {
                eligible.sort_by(|a, b| a.name().cmp(b.name()));
                let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % eligible.len();
                eligible.swap_remove(idx)
            }
        };

        for p in sticky {
            self.history.record(&p.issuer, target, chosen.name());
        }
        Ok(chosen)
    }
}

impl Store for SourceStore {
    fn put_active(&self, sources: Vec<SharedSource>) {
        let mut active = self.active.write();
        for source in sources {
            match active.iter_mut().find(|s| s.name() == source.name()) {
                Some(slot) => *slot = source,
                None => active.push(source),
            }
        }
    }

    fn del_active(&self, sources: &[SharedSource]) {
        let names: HashSet<&str> = sources.iter().map(|s| s.name()).collect();
        self.active.write().retain(|s| !names.contains(s.name()));

        for name in names {
            let pruned = self.history.forget_source(name);
            if pruned > 0 {
                debug!(source = name, pruned, "Bind history pruned");
            }
        }
    }

    fn get_active(&self) -> Vec<SharedSource> {
        self.active.read().clone()
    }
}
