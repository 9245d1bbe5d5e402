//! Source reconciliation loop.
//!
//! Each cycle asks the provider for the current sources, admits new ones that
//! pass a high-confidence check, drops the ones that vanished and re-checks
//! active sources that live traffic reported as faulty.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    Hooker, InterfaceProvider, MergedProvider, Provider, SharedSource, Source, SourceHooks,
};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::metrics::{EvictionReason, MetricsSink, NoopMetrics};
use crate::types::Confidence;

/// Active-set storage the listener reconciles.
pub trait Store: Send + Sync {
    /// Add sources, replacing any active source with the same name.
    fn put_active(&self, sources: Vec<SharedSource>);

    /// Remove sources by name.
    fn del_active(&self, sources: &[SharedSource]);

    /// Snapshot of the active set.
    fn get_active(&self) -> Vec<SharedSource>;
}

/// Listener timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Pause between cycles.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Budget shared by every provider call in one cycle.
    #[serde(default = "default_poll_timeout", with = "humantime_serde")]
    pub poll_timeout: Duration,
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(3)
}
fn default_poll_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            poll_timeout: default_poll_timeout(),
        }
    }
}

/// Split sources into those only in `cur` (to add) and only in `old` (to
/// remove), keyed by name. Input order is preserved.
pub fn diff(old: &[SharedSource], cur: &[SharedSource]) -> (Vec<SharedSource>, Vec<SharedSource>) {
    let old_names: HashSet<&str> = old.iter().map(|s| s.name()).collect();
    let cur_names: HashSet<&str> = cur.iter().map(|s| s.name()).collect();

    let add = cur
        .iter()
        .filter(|s| !old_names.contains(s.name()))
        .cloned()
        .collect();
    let remove = old
        .iter()
        .filter(|s| !cur_names.contains(s.name()))
        .cloned()
        .collect();

    (add, remove)
}

/// Keeps a [`Store`]'s active set in line with a [`Provider`].
pub struct Listener {
    config: ListenerConfig,
    store: Arc<dyn Store>,
    provider: Arc<dyn Provider>,
    hooker: Arc<Hooker>,
    metrics: Arc<dyn MetricsSink>,
    cycle: Mutex<()>,
}

impl Listener {
    pub fn new(
        config: ListenerConfig,
        store: Arc<dyn Store>,
        provider: Arc<dyn Provider>,
        hooker: Arc<Hooker>,
    ) -> Self {
        Self {
            config,
            store,
            provider,
            hooker,
            metrics: Arc::new(NoopMetrics),
            cycle: Mutex::new(()),
        }
    }

    /// Listener over the host's interfaces.
    ///
    /// The interface provider sits behind a [`MergedProvider`], like any
    /// other set of providers handed to [`Listener::new`]. Every interface
    /// source reports dial failures into this listener's hooker and dial
    /// outcomes into `metrics`.
    pub fn with_interfaces(
        config: &Config,
        store: Arc<dyn Store>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let hooker = Arc::new(Hooker::new());
        let hooks = SourceHooks {
            on_dial_err: Some(hooker.dial_hook()),
            metrics: Arc::clone(&metrics),
        };
        let provider = InterfaceProvider::new(
            config.discovery.clone(),
            config.probe.clone(),
            hooks,
        );

        let provider = MergedProvider::new(vec![Arc::new(provider) as Arc<dyn Provider>]);

        Self::new(config.listener.clone(), store, Arc::new(provider), hooker)
            .with_metrics(metrics)
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Fault registry fed by this listener's sources.
    pub fn hooker(&self) -> &Arc<Hooker> {
        &self.hooker
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// Reconcile until `shutdown` is cancelled.
    ///
    /// Failed or timed-out cycles are logged and the loop continues. Always
    /// returns [`Error::Cancelled`].
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!(
            "Source listener started (interval {:?}, timeout {:?})",
            self.config.poll_interval, self.config.poll_timeout
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                res = self.poll() => {
                    if let Err(e) = res {
                        warn!("Source poll failed: {}", e);
                    }
                }
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        info!("Source listener stopped");
        Err(Error::Cancelled)
    }

    /// Run one reconciliation cycle.
    ///
    /// Provider calls share a deadline of `poll_timeout` from the start of the
    /// cycle. A check cut off by the deadline counts as failed, so removals
    /// and fault handling still happen. Concurrent calls are serialized.
    pub async fn poll(&self) -> Result<()> {
        let _cycle = self.cycle.lock().await;

        let start = Instant::now();
        let result = self.reconcile(start + self.config.poll_timeout).await;
        self.metrics
            .record_poll(start.elapsed(), result.is_ok(), self.store.get_active().len());
        result
    }

    async fn reconcile(&self, deadline: Instant) -> Result<()> {
        let current = tokio::time::timeout_at(deadline, self.provider.provide())
            .await
            .map_err(|_| Error::Timeout(self.config.poll_timeout))??;
        let old = self.store.get_active();
        let (add, remove) = diff(&old, &current);

        for source in add {
            match self.check_before(source.as_ref(), deadline).await {
                Ok(()) => {
                    info!(source = source.name(), "Source admitted");
                    self.metrics.source_admitted(source.name());
                    self.store.put_active(vec![source]);
                }
                Err(e) => debug!(source = source.name(), "Candidate rejected: {}", e),
            }
        }

        if !remove.is_empty() {
            self.store.del_active(&remove);
            for source in &remove {
                self.hooker.consume_fault(source.name());
                info!(source = source.name(), "Source vanished");
                self.metrics
                    .source_evicted(source.name(), EvictionReason::Vanished);
            }
        }

        let suspects: Vec<SharedSource> = self
            .store
            .get_active()
            .into_iter()
            .filter(|source| match self.hooker.consume_fault(source.name()) {
                Some(fault) => {
                    debug!("Re-checking source: {}", fault);
                    true
                }
                None => false,
            })
            .collect();

        for source in suspects {
            match self.check_before(source.as_ref(), deadline).await {
                Ok(()) => debug!(source = source.name(), "Suspect source passed re-check"),
                Err(e) => {
                    info!(source = source.name(), "Source evicted: {}", e);
                    self.store.del_active(std::slice::from_ref(&source));
                    self.metrics
                        .source_evicted(source.name(), EvictionReason::Faulted);
                }
            }
        }

        Ok(())
    }

    async fn check_before(&self, source: &dyn Source, deadline: Instant) -> Result<()> {
        let check = self.provider.check(source, Confidence::High);
        match tokio::time::timeout_at(deadline, check).await {
            Ok(res) => res,
            Err(_) => Err(Error::Timeout(self.config.poll_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Conn, Source};
    use crate::store::SourceStore;
    use crate::types::Network;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Fake(String);

    #[async_trait]
    impl Source for Fake {
        fn name(&self) -> &str {
            &self.0
        }
        fn mtu(&self) -> Option<u32> {
            Some(1500)
        }
        async fn dial(&self, _network: Network, _address: &str) -> Result<Conn> {
            Err(Error::Internal("fake".into()))
        }
    }

    fn src(name: &str) -> SharedSource {
        Arc::new(Fake(name.to_string()))
    }

    fn names(sources: &[SharedSource]) -> Vec<String> {
        let mut v: Vec<String> = sources.iter().map(|s| s.name().to_string()).collect();
        v.sort();
        v
    }

    #[derive(Default)]
    struct Scripted {
        sources: parking_lot::Mutex<Vec<&'static str>>,
        healthy: parking_lot::Mutex<HashSet<&'static str>>,
        fail: std::sync::atomic::AtomicBool,
        hang: std::sync::atomic::AtomicBool,
        provides: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl Scripted {
        fn new(sources: &[&'static str], healthy: &[&'static str]) -> Arc<Self> {
            let p = Self::default();
            *p.sources.lock() = sources.to_vec();
            *p.healthy.lock() = healthy.iter().copied().collect();
            Arc::new(p)
        }
    }

    #[async_trait]
    impl Provider for Scripted {
        async fn provide(&self) -> Result<Vec<SharedSource>> {
            self.provides.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(Duration::from_millis(10)).await;
            if self.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Provider("scripted failure".into()));
            }
            Ok(self.sources.lock().iter().map(|n| src(n)).collect())
        }

        async fn check(&self, source: &dyn Source, _level: Confidence) -> Result<()> {
            if self.healthy.lock().contains(source.name()) {
                Ok(())
            } else {
                Err(Error::CheckFailed {
                    source_name: source.name().to_string(),
                    reason: "scripted".into(),
                })
            }
        }
    }

    fn listener(provider: Arc<Scripted>) -> (Listener, Arc<SourceStore>) {
        let store = Arc::new(SourceStore::new());
        let listener = Listener::new(
            ListenerConfig::default(),
            store.clone(),
            provider,
            Arc::new(Hooker::new()),
        );
        (listener, store)
    }

    #[test]
    fn test_diff() {
        let a = src("a");
        let b = src("b");
        let c = src("c");

        let (add, remove) = diff(&[a.clone(), b.clone()], &[b.clone(), c.clone()]);
        assert_eq!(names(&add), vec!["c"]);
        assert_eq!(names(&remove), vec!["a"]);

        let (add, remove) = diff(&[a.clone(), b.clone()], &[a.clone(), b.clone()]);
        assert!(add.is_empty() && remove.is_empty());

        let (add, remove) = diff(&[], &[c.clone(), a.clone()]);
        assert_eq!(
            add.iter().map(|s| s.name()).collect::<Vec<_>>(),
            vec!["c", "a"]
        );
        assert!(remove.is_empty());
    }

    #[tokio::test]
    async fn test_interface_listener_polls_through_merged_provider() {
        let mut config = Config::default();
        config.discovery.interfaces = vec!["no-such-iface0".into()];
        let store = Arc::new(SourceStore::new());
        let listener = Listener::with_interfaces(&config, store.clone(), Arc::new(NoopMetrics));

        listener.poll().await.unwrap();
        assert!(store.get_active().is_empty());
        assert_eq!(listener.hooker().pending(), 0);
    }

    #[tokio::test]
    async fn test_poll_admits_only_healthy() {
        let provider = Scripted::new(&["ifA", "ifB"], &["ifA"]);
        let (listener, store) = listener(provider);

        listener.poll().await.unwrap();
        assert_eq!(names(&store.get_active()), vec!["ifA"]);
    }

    #[tokio::test]
    async fn test_vanished_source_removed_and_fault_cleared() {
        let provider = Scripted::new(&["ifA", "ifB"], &["ifA", "ifB"]);
        let (listener, store) = listener(provider.clone());
        listener.poll().await.unwrap();

        listener
            .hooker()
            .record_fault("ifB", Network::Tcp, "x:1", "boom");
        *provider.sources.lock() = vec!["ifA"];
        listener.poll().await.unwrap();

        assert_eq!(names(&store.get_active()), vec!["ifA"]);
        assert!(listener.hooker().consume_fault("ifB").is_none());
    }

    #[tokio::test]
    async fn test_fault_triggers_recheck() {
        let provider = Scripted::new(&["ifA", "ifB"], &["ifA", "ifB"]);
        let (listener, store) = listener(provider.clone());
        listener.poll().await.unwrap();

        // Healthy suspect stays
        listener
            .hooker()
            .record_fault("ifA", Network::Tcp, "x:1", "reset");
        listener.poll().await.unwrap();
        assert_eq!(names(&store.get_active()), vec!["ifA", "ifB"]);
        assert_eq!(listener.hooker().pending(), 0);

        // Unhealthy suspect goes
        provider.healthy.lock().remove("ifA");
        listener
            .hooker()
            .record_fault("ifA", Network::Tcp, "x:1", "reset");
        listener.poll().await.unwrap();
        assert_eq!(names(&store.get_active()), vec!["ifB"]);
    }

    #[tokio::test]
    async fn test_unfaulted_source_not_rechecked() {
        let provider = Scripted::new(&["ifA"], &["ifA"]);
        let (listener, store) = listener(provider.clone());
        listener.poll().await.unwrap();

        // Without a fault the source stays even though it would fail a check
        provider.healthy.lock().clear();
        listener.poll().await.unwrap();
        assert_eq!(names(&store.get_active()), vec!["ifA"]);
    }

    #[tokio::test]
    async fn test_provider_error_aborts_cycle() {
        let provider = Scripted::new(&["ifA"], &["ifA"]);
        let (listener, store) = listener(provider.clone());
        listener.poll().await.unwrap();

        provider.fail.store(true, Ordering::SeqCst);
        *provider.sources.lock() = Vec::new();
        assert!(listener.poll().await.is_err());
        assert_eq!(names(&store.get_active()), vec!["ifA"]);
    }

    #[tokio::test]
    async fn test_concurrent_polls_serialized() {
        let provider = Scripted::new(&["ifA"], &["ifA"]);
        let (listener, _store) = listener(provider.clone());

        let (a, b) = tokio::join!(listener.poll(), listener.poll());
        a.unwrap();
        b.unwrap();
        assert_eq!(provider.provides.load(Ordering::SeqCst), 2);
        assert_eq!(provider.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_returns_cancelled() {
        let provider = Scripted::new(&["ifA"], &["ifA"]);
        let (listener, store) = listener(provider.clone());
        let token = CancellationToken::new();

        let stopper = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            stopper.cancel();
        });

        let result = listener.run(token).await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(names(&store.get_active()), vec!["ifA"]);
        // Cycles at t=0, 3, 6 and 9
        assert!(provider.provides.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_survives_timeouts() {
        let provider = Scripted::new(&["ifA"], &["ifA"]);
        provider.hang.store(true, Ordering::SeqCst);
        let (listener, store) = listener(provider.clone());
        let token = CancellationToken::new();

        let stopper = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(20)).await;
            stopper.cancel();
        });

        let result = listener.run(token).await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(store.get_active().is_empty());
        // Each cycle is 5s timeout + 3s sleep
        assert!(provider.provides.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_inflight_poll() {
        let provider = Scripted::new(&["ifA"], &["ifA"]);
        provider.hang.store(true, Ordering::SeqCst);
        let store = Arc::new(SourceStore::new());
        let config = ListenerConfig {
            poll_interval: Duration::from_secs(3),
            poll_timeout: Duration::from_secs(3600),
        };
        let listener = Listener::new(config, store, provider, Arc::new(Hooker::new()));
        let token = CancellationToken::new();

        let stopper = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            stopper.cancel();
        });

        let start = tokio::time::Instant::now();
        assert!(matches!(listener.run(token).await, Err(Error::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
