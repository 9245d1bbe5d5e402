//! Live dial fault registry.
//!
//! Traffic going through an admitted source reports failed dials here; the
//! listener consumes the fault on its next cycle and re-checks the source.
//! One slot per source name: a newer fault overwrites an unread one.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::debug;

use crate::types::Network;

/// Callback handed to sources so they can report dial failures.
///
/// Arguments: source name, network, address, error message.
pub type DialErrHook = Arc<dyn Fn(&str, Network, &str, &str) + Send + Sync>;

/// The latest dial failure observed for a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookFault {
    pub source_name: String,
    pub network: Network,
    pub address: String,
    pub error: String,
    pub received_at: Instant,
}

impl fmt::Display for HookFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "error {} produced by source {} while contacting {} using {}",
            self.error, self.source_name, self.address, self.network
        )
    }
}

impl std::error::Error for HookFault {}

/// Edge-triggered, single-slot fault registry keyed by source name.
#[derive(Debug, Default)]
pub struct Hooker {
    hooked: Mutex<HashMap<String, HookFault>>,
}

impl Hooker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a fault for `source_name`, replacing any unread one.
    pub fn record_fault(
        &self,
        source_name: &str,
        network: Network,
        address: &str,
        error: impl fmt::Display,
    ) {
        let fault = HookFault {
            source_name: source_name.to_string(),
            network,
            address: address.to_string(),
            error: error.to_string(),
            received_at: Instant::now(),
        };
        debug!("Hook fault recorded: {}", fault);

        self.hooked.lock().insert(fault.source_name.clone(), fault);
    }

    /// Take the pending fault for `source_name`, if any.
    ///
    /// A fault is returned at most once.
    pub fn consume_fault(&self, source_name: &str) -> Option<HookFault> {
        self.hooked.lock().remove(source_name)
    }

    /// Number of unread faults.
    pub fn pending(&self) -> usize {
        self.hooked.lock().len()
    }

    /// A [`DialErrHook`] that records into this registry.
    pub fn dial_hook(self: &Arc<Self>) -> DialErrHook {
        let hooker = Arc::clone(self);
        Arc::new(move |name, network, address, error| {
            hooker.record_fault(name, network, address, error);
        })
    }
}
