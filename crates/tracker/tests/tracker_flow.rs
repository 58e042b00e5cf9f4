//! End-to-end tracker lifecycle against an in-memory store and capturing
//! transport.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use freshcart_core::storage::keys;
use freshcart_core::types::{CartAction, ViewSource};
use freshcart_core::{AppConfig, KeyValueStore, MemoryStore};
use freshcart_tracker::transport::capture_transport;
use freshcart_tracker::{CaptureTransport, Tracker};

fn tracker(config: AppConfig) -> (Arc<MemoryStore>, Arc<CaptureTransport>, Tracker) {
    let store = MemoryStore::shared();
    let transport = capture_transport();
    let tracker = Tracker::new(&config, store.clone(), transport.clone());
    (store, transport, tracker)
}

#[tokio::test(start_paused = true)]
async fn test_shopping_session_end_to_end() {
    let (store, transport, tracker) = tracker(AppConfig::default());
    tracker.start();
    let session_id = tracker.session_id();

    // session_start waits for sign-in to settle.
    assert_eq!(transport.count(), 0);
    store.set(keys::USER_EMAIL, "ann@example.com").unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(transport.wait_for(1, Duration::from_secs(1)).await);
    let start = transport.events_of_type("session_start");
    assert_eq!(start.len(), 1);
    assert_eq!(start[0].user_id.as_deref(), Some("ann@example.com"));
    assert_eq!(start[0].data["user_type"], "logged_in");

    tracker.track_page_view("/products");
    tracker.track_search("apples");
    tracker.track_product_view("1", json!({ "name": "Gala Apples", "price": 2.0 }));
    tracker.track_product_detail("1", ViewSource::CardClick, HashMap::new());
    tracker.track_click("1", "product_grid");

    store
        .set(keys::CART, r#"[{"id": 1, "price": 2.00, "quantity": 3}]"#)
        .unwrap();
    tracker.track_cart_add("1", json!({ "name": "Gala Apples" }));

    tracker.visibility_changed("2", 0.9);
    tokio::time::sleep(Duration::from_millis(600)).await;
    tracker.visibility_changed("2", 0.1);
    assert_eq!(tracker.impressions().pending(), 1);

    tracker.track_purchase(json!({ "order_id": 77, "total": 6.0 }));
    tracker.stop().await;

    let cart = transport.cart_events();
    assert_eq!(cart.len(), 1);
    assert_eq!(cart[0].action, CartAction::Add);
    assert_eq!(cart[0].cart_total_items, 3);
    assert!((cart[0].cart_total_value - 6.00).abs() < 1e-9);
    assert_eq!(cart[0].session_id, session_id);

    for event_type in [
        "session_page_view",
        "search",
        "product_view",
        "click",
        "cart_add",
        "purchase",
        "session_purchase",
        "session_end",
    ] {
        assert_eq!(
            transport.events_of_type(event_type).len(),
            1,
            "expected one {event_type} event"
        );
    }
    assert_eq!(transport.product_views().len(), 1);

    let batches = transport.impression_batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].impressions[0].product_id, "2");
    assert_eq!(batches[0].session_id, session_id);

    assert!(transport
        .events()
        .iter()
        .all(|e| e.session_id == session_id));
}

#[tokio::test]
async fn test_kill_switch_makes_every_method_a_noop() {
    let mut config = AppConfig::default();
    config.tracking.enabled = false;
    let (store, transport, tracker) = tracker(config);
    store
        .set(keys::CART, r#"[{"id": 9, "price": 4.0, "quantity": 1}]"#)
        .unwrap();

    tracker.start();
    tracker.emit("custom", None, json!({}));
    tracker.track_page_view("/deals");
    tracker.track_search("milk");
    tracker.track_product_view("9", json!({}));
    assert!(!tracker.track_product_detail("9", ViewSource::DetailPage, HashMap::new()));
    tracker.track_click("9", "deals");
    tracker.track_cart_add("9", json!({}));
    tracker.track_cart_remove("9");
    tracker.track_purchase(json!({}));
    tracker.visibility_changed("9", 1.0);
    tracker.unobserve("9");
    tracker.flush_impressions();
    tracker.stop().await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(transport.count(), 0);
    assert_eq!(tracker.cart_snapshot().item_count, 1);
}

#[tokio::test]
async fn test_calls_after_stop_are_dropped() {
    let (_store, transport, tracker) = tracker(AppConfig::default());
    tracker.start();
    tracker.track_search("bread");
    tracker.stop().await;
    let after_stop = transport.count();

    tracker.track_search("more bread");
    tracker.start();
    tracker.stop().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.count(), after_stop);
}

#[tokio::test]
async fn test_session_id_survives_tracker_restart() {
    let store = MemoryStore::shared();
    let first = Tracker::new(&AppConfig::default(), store.clone(), capture_transport());
    let id = first.session_id();

    let second = Tracker::new(&AppConfig::default(), store.clone(), capture_transport());
    assert_eq!(second.session_id(), id);
    assert!(second.identity().is_anonymous());
}

#[tokio::test]
async fn test_unreachable_endpoint_never_surfaces_errors() {
    let mut config = AppConfig::default();
    config.api_base = "http://127.0.0.1:9/api".to_string();
    config.tracking.session_start_delay_ms = 0;
    config.tracking.request_timeout_ms = 500;

    let store = MemoryStore::shared();
    let tracker = Tracker::with_http(&config, store).unwrap();
    tracker.start();
    tracker.track_search("cheese");
    tracker.track_cart_add("3", json!({}));
    tracker.stop().await;
}
