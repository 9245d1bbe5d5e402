//! Source providers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::{SharedSource, Source};
use crate::error::{Error, Result};
use crate::types::Confidence;

/// Enumerates candidate sources and verifies their connectivity.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Return the sources currently available.
    async fn provide(&self) -> Result<Vec<SharedSource>>;

    /// Verify `source` provides connectivity at the requested confidence.
    async fn check(&self, source: &dyn Source, level: Confidence) -> Result<()>;
}

/// Union of several providers.
///
/// Sources are keyed by name; on a clash the earlier child wins. Checks go
/// to the child that yielded the name on the latest `provide`.
pub struct MergedProvider {
    children: Vec<Arc<dyn Provider>>,
    owners: RwLock<HashMap<String, usize>>,
}

impl MergedProvider {
    pub fn new(children: Vec<Arc<dyn Provider>>) -> Self {
        Self {
            children,
            owners: RwLock::new(HashMap::new()),
        }
    }

    /// Number of child providers.
    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

#[async_trait]
impl Provider for MergedProvider {
    async fn provide(&self) -> Result<Vec<SharedSource>> {
        let mut sources: Vec<SharedSource> = Vec::new();
        let mut owners = HashMap::new();
        let mut last_err = None;
        let mut succeeded = 0usize;

        for (idx, child) in self.children.iter().enumerate() {
            match child.provide().await {
                Ok(found) => {
                    succeeded += 1;
                    for source in found {
                        if owners.contains_key(source.name()) {
                            debug!(
                                source = source.name(),
                                child = idx,
                                "Duplicate source name, keeping earlier provider's"
                            );
                            continue;
                        }
                        owners.insert(source.name().to_string(), idx);
                        sources.push(source);
                    }
                }
                Err(e) => {
                    warn!(child = idx, "Provider failed: {}", e);
                    last_err = Some(e);
                }
            }
        }

        if succeeded == 0 {
            if let Some(e) = last_err {
                return Err(e);
            }
        }

        *self.owners.write() = owners;
        Ok(sources)
    }

    async fn check(&self, source: &dyn Source, level: Confidence) -> Result<()> {
        let owner = self.owners.read().get(source.name()).copied();
        if let Some(child) = owner.and_then(|idx| self.children.get(idx)) {
            return child.check(source, level).await;
        }

        let mut last_err = Error::SourceNotFound(source.name().to_string());
        for child in &self.children {
            match child.check(source, level).await {
                Ok(()) => return Ok(()),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }
}
