//! Policy and selection tests.
//!
//! Policies are created through the management API router and their effect
//! is observed through `SourceStore::select` on a listener-managed active set.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use parking_lot::Mutex;
use tower::ServiceExt;

use multihome::api::{ApiConfig, ApiServer, ApiState};
use multihome::error::{Error, Result};
use multihome::source::{Conn, Hooker, Listener, ListenerConfig, Provider, SharedSource, Source};
use multihome::store::{PolicyKind, SourceStore};
use multihome::types::{Confidence, Network};

// ============================================================================
// Test Infrastructure
// ============================================================================

#[derive(Debug)]
struct Uplink(String);

#[async_trait]
impl Source for Uplink {
    fn name(&self) -> &str {
        &self.0
    }

    fn mtu(&self) -> Option<u32> {
        Some(1500)
    }

    async fn dial(&self, _network: Network, _address: &str) -> Result<Conn> {
        Err(Error::Internal("not dialable".into()))
    }
}

struct Inventory(Mutex<Vec<&'static str>>);

#[async_trait]
impl Provider for Inventory {
    async fn provide(&self) -> Result<Vec<SharedSource>> {
        Ok(self
            .0
            .lock()
            .iter()
            .map(|n| Arc::new(Uplink((*n).to_string())) as SharedSource)
            .collect())
    }

    async fn check(&self, _source: &dyn Source, _level: Confidence) -> Result<()> {
        Ok(())
    }
}

struct Setup {
    inventory: Arc<Inventory>,
    store: Arc<SourceStore>,
    listener: Listener,
    app: Router,
}

async fn setup(names: &[&'static str]) -> Setup {
    let inventory = Arc::new(Inventory(Mutex::new(names.to_vec())));
    let store = Arc::new(SourceStore::new());
    let listener = Listener::new(
        ListenerConfig::default(),
        store.clone(),
        inventory.clone(),
        Arc::new(Hooker::new()),
    );
    listener.poll().await.unwrap();

    let app = ApiServer::new(ApiConfig::default(), ApiState::new(store.clone(), 9090)).router();
    Setup {
        inventory,
        store,
        listener,
        app,
    }
}

async fn create(app: &Router, kind: &str, body: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(
            Request::post(format!("/policies/{kind}"))
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or_default())
}

fn picks(store: &SourceStore, target: &str, n: usize) -> HashSet<String> {
    (0..n)
        .map(|_| store.select(target).unwrap().name().to_string())
        .collect()
}

fn set(names: &[&str]) -> HashSet<String> {
    names.iter().map(ToString::to_string).collect()
}

// ============================================================================
// Precedence
// ============================================================================

#[tokio::test]
async fn test_default_distribution_uses_every_source() {
    let s = setup(&["eth0", "wlan0", "wwan0"]).await;
    assert_eq!(picks(&s.store, "x.com", 6), set(&["eth0", "wlan0", "wwan0"]));
}

#[tokio::test]
async fn test_block_through_api() {
    let s = setup(&["eth0", "wlan0"]).await;
    let (status, policy) = create(&s.app, "block", r#"{"source_id":"wlan0","reason":"metered"}"#).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(policy["id"], "block_wlan0");

    assert_eq!(picks(&s.store, "x.com", 4), set(&["eth0"]));
    let snapshot = s.store.get_sources_snapshot();
    assert!(snapshot.iter().any(|src| src.name == "wlan0" && src.blocked));
}

#[tokio::test]
async fn test_reserve_and_avoid_through_api() {
    let s = setup(&["eth0", "wlan0", "wwan0"]).await;
    create(&s.app, "reserve", r#"{"source_id":"wwan0","target":"vpn.example.com"}"#).await;
    create(&s.app, "avoid", r#"{"source_id":"wlan0","target":"backup.example.com"}"#).await;

    assert_eq!(picks(&s.store, "vpn.example.com", 4), set(&["wwan0"]));
    assert_eq!(picks(&s.store, "backup.example.com", 4), set(&["eth0"]));
    assert_eq!(picks(&s.store, "other.com", 4), set(&["eth0", "wlan0"]));
}

#[tokio::test]
async fn test_block_outranks_reservation() {
    let s = setup(&["eth0", "wlan0"]).await;
    create(&s.app, "reserve", r#"{"source_id":"eth0","target":"x.com"}"#).await;
    create(&s.app, "block", r#"{"source_id":"eth0"}"#).await;

    // eth0 is blocked so x.com falls back to unreserved sources
    assert_eq!(picks(&s.store, "x.com", 4), set(&["wlan0"]));
}

#[tokio::test]
async fn test_every_source_excluded() {
    let s = setup(&["eth0"]).await;
    create(&s.app, "avoid", r#"{"source_id":"eth0","target":"x.com"}"#).await;
    assert!(matches!(
        s.store.select("x.com"),
        Err(Error::NoSourceAvailable { target }) if target == "x.com"
    ));
}

#[tokio::test]
async fn test_deleting_policy_restores_selection() {
    let s = setup(&["eth0", "wlan0"]).await;
    create(&s.app, "block", r#"{"source_id":"eth0"}"#).await;
    assert_eq!(picks(&s.store, "x.com", 4), set(&["wlan0"]));

    let response = s
        .app
        .clone()
        .oneshot(Request::delete("/policies/block_eth0").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(picks(&s.store, "x.com", 4), set(&["eth0", "wlan0"]));
}

// ============================================================================
// Sticky policies and bind history
// ============================================================================

#[tokio::test]
async fn test_sticky_affinity() {
    let s = setup(&["eth0", "wlan0", "wwan0"]).await;
    let (status, policy) = create(&s.app, "stick", r#"{"issuer":"browser"}"#).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(policy["kind"], "sticky");

    let first = s.store.select("a.com").unwrap().name().to_string();
    assert_eq!(picks(&s.store, "a.com", 5), set(&[first.as_str()]));
    assert_eq!(s.store.query_bind_history("browser", "a.com"), Some(first));
}

#[tokio::test]
async fn test_sticky_rebinds_after_eviction() {
    let s = setup(&["eth0", "wlan0"]).await;
    create(&s.app, "stick", r#"{"issuer":"browser"}"#).await;

    let first = s.store.select("a.com").unwrap().name().to_string();
    let survivor = if first == "eth0" { "wlan0" } else { "eth0" };

    *s.inventory.0.lock() = vec![survivor];
    s.listener.poll().await.unwrap();
    assert!(s.store.query_bind_history("browser", "a.com").is_none());

    assert_eq!(s.store.select("a.com").unwrap().name(), survivor);
    assert_eq!(
        s.store.query_bind_history("browser", "a.com").as_deref(),
        Some(survivor)
    );
}

// ============================================================================
// Validation
// ============================================================================

#[tokio::test]
async fn test_validation_leaves_state_unchanged() {
    let s = setup(&["eth0"]).await;

    let (status, body) = create(&s.app, "reserve", r#"{"source_id":"eth0"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation error: target cannot be empty");

    let (status, _) = create(&s.app, "avoid", r#"{"target":"x.com"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = create(&s.app, "block", "[]").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(s.store.get_policies_snapshot().is_empty());
}

#[tokio::test]
async fn test_policy_listing_order() {
    let s = setup(&["eth0"]).await;
    create(&s.app, "block", r#"{"source_id":"wlan0"}"#).await;
    create(&s.app, "stick", r#"{"issuer":"app","target":"x.com"}"#).await;

    let kinds: Vec<PolicyKind> = s
        .store
        .get_policies_snapshot()
        .into_iter()
        .map(|p| p.kind)
        .collect();
    assert_eq!(kinds, vec![PolicyKind::Block, PolicyKind::Sticky]);
}
