//! Metrics collection and Prometheus export.
//!
//! Sources and the listener report through the [`MetricsSink`] trait, which is
//! injected at construction time. [`NoopMetrics`] discards everything; with
//! the `metrics` feature [`PrometheusMetrics`] records into a registry that
//! the management API exposes on `/metrics`.

#[cfg(feature = "metrics")]
mod prometheus_export;

#[cfg(feature = "metrics")]
pub use prometheus_export::*;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::Network;

/// Receiver for source and reconciliation events.
pub trait MetricsSink: Send + Sync {
    /// A dial through `source` finished.
    fn record_dial(&self, source: &str, network: Network, ok: bool, elapsed: Duration);

    /// A source entered the active set.
    fn source_admitted(&self, source: &str);

    /// A source left the active set.
    fn source_evicted(&self, source: &str, reason: EvictionReason);

    /// A reconciliation cycle finished.
    fn record_poll(&self, elapsed: Duration, ok: bool, active: usize);
}

/// Why a source left the active set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// The provider stopped reporting it.
    Vanished,
    /// A live dial fault was followed by a failed re-check.
    Faulted,
}

impl EvictionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vanished => "vanished",
            Self::Faulted => "faulted",
        }
    }
}

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_dial(&self, _source: &str, _network: Network, _ok: bool, _elapsed: Duration) {}
    fn source_admitted(&self, _source: &str) {}
    fn source_evicted(&self, _source: &str, _reason: EvictionReason) {}
    fn record_poll(&self, _elapsed: Duration, _ok: bool, _active: usize) {}
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics collection.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Port of the local Prometheus server queried through the API proxy.
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

fn default_enabled() -> bool {
    true
}
fn default_prometheus_port() -> u16 {
    9090
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            prometheus_port: default_prometheus_port(),
        }
    }
}
