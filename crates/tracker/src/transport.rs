//! Transport: trait for handing a tracking payload to the tracking API.
//!
//! The dispatcher owns an `Arc<dyn Transport>`. [`HttpTransport`] posts JSON
//! with `reqwest`; [`CaptureTransport`] records deliveries for tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;
use url::Url;

use freshcart_core::config::EndpointConfig;
use freshcart_core::storage::{keys, KeyValueStore};
use freshcart_core::types::{CartEvent, ImpressionBatch, ProductView, TrackedEvent};
use freshcart_core::{FreshcartError, FreshcartResult};

/// A single payload bound for one tracking endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Event(TrackedEvent),
    Cart(CartEvent),
    ProductView(ProductView),
    Impressions(ImpressionBatch),
}

impl Delivery {
    pub fn kind(&self) -> &'static str {
        match self {
            Delivery::Event(_) => "event",
            Delivery::Cart(_) => "cart",
            Delivery::ProductView(_) => "product_view",
            Delivery::Impressions(_) => "impressions",
        }
    }

    pub fn body(&self) -> FreshcartResult<serde_json::Value> {
        let body = match self {
            Delivery::Event(e) => serde_json::to_value(e)?,
            Delivery::Cart(e) => serde_json::to_value(e)?,
            Delivery::ProductView(v) => serde_json::to_value(v)?,
            Delivery::Impressions(b) => serde_json::to_value(b)?,
        };
        Ok(body)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Make exactly one delivery attempt.
    async fn send(&self, delivery: &Delivery) -> FreshcartResult<()>;
}

/// Resolved absolute URL per endpoint.
#[derive(Debug, Clone)]
pub struct EndpointUrls {
    pub events: Url,
    pub cart_events: Url,
    pub product_view: Url,
    pub impressions: Url,
}

impl EndpointUrls {
    pub fn new(api_base: &str, endpoints: &EndpointConfig) -> FreshcartResult<Self> {
        Ok(Self {
            events: endpoint_url(api_base, &endpoints.events)?,
            cart_events: endpoint_url(api_base, &endpoints.cart_events)?,
            product_view: endpoint_url(api_base, &endpoints.product_view)?,
            impressions: endpoint_url(api_base, &endpoints.impressions)?,
        })
    }

    pub fn for_delivery(&self, delivery: &Delivery) -> &Url {
        match delivery {
            Delivery::Event(_) => &self.events,
            Delivery::Cart(_) => &self.cart_events,
            Delivery::ProductView(_) => &self.product_view,
            Delivery::Impressions(_) => &self.impressions,
        }
    }
}

/// Append `path` to `api_base`, keeping any path prefix on the base
/// (`http://host/api` + `/events/track` -> `http://host/api/events/track`).
pub fn endpoint_url(api_base: &str, path: &str) -> FreshcartResult<Url> {
    let joined = format!(
        "{}/{}",
        api_base.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Url::parse(&joined).map_err(|e| FreshcartError::Url(format!("{joined}: {e}")))
}

/// JSON-over-POST transport. Attaches the stored bearer token, if any.
pub struct HttpTransport {
    client: reqwest::Client,
    urls: EndpointUrls,
    store: Arc<dyn KeyValueStore>,
}

impl HttpTransport {
    pub fn new(
        api_base: &str,
        endpoints: &EndpointConfig,
        store: Arc<dyn KeyValueStore>,
        user_agent: &str,
        request_timeout: Option<Duration>,
    ) -> FreshcartResult<Self> {
        let mut builder = reqwest::Client::builder().user_agent(user_agent);
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            urls: EndpointUrls::new(api_base, endpoints)?,
            store,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, delivery: &Delivery) -> FreshcartResult<()> {
        let url = self.urls.for_delivery(delivery);
        let mut request = self.client.post(url.clone()).json(&delivery.body()?);
        if let Some(token) = self.store.get(keys::AUTH_TOKEN).filter(|t| !t.is_empty()) {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(FreshcartError::Status {
                endpoint: url.path().to_string(),
                status: status.as_u16(),
                body,
            });
        }

        debug!(kind = delivery.kind(), status = status.as_u16(), "tracking delivery accepted");
        Ok(())
    }
}

/// Transport that drops everything.
pub struct NoOpTransport;

#[async_trait]
impl Transport for NoOpTransport {
    async fn send(&self, _delivery: &Delivery) -> FreshcartResult<()> {
        Ok(())
    }
}

/// In-memory transport that records every delivery attempt, for tests.
/// Attempts are recorded even when configured to fail.
#[derive(Default)]
pub struct CaptureTransport {
    deliveries: Mutex<Vec<Delivery>>,
    fail_with_status: Option<u16>,
}

impl CaptureTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose every attempt is rejected with `status`.
    pub fn failing(status: u16) -> Self {
        Self {
            deliveries: Mutex::new(Vec::new()),
            fail_with_status: Some(status),
        }
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.deliveries.lock().len()
    }

    pub fn count_kind(&self, kind: &str) -> usize {
        self.deliveries
            .lock()
            .iter()
            .filter(|d| d.kind() == kind)
            .count()
    }

    pub fn events(&self) -> Vec<TrackedEvent> {
        self.deliveries
            .lock()
            .iter()
            .filter_map(|d| match d {
                Delivery::Event(e) => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn events_of_type(&self, event_type: &str) -> Vec<TrackedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }

    pub fn cart_events(&self) -> Vec<CartEvent> {
        self.deliveries
            .lock()
            .iter()
            .filter_map(|d| match d {
                Delivery::Cart(e) => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn product_views(&self) -> Vec<ProductView> {
        self.deliveries
            .lock()
            .iter()
            .filter_map(|d| match d {
                Delivery::ProductView(v) => Some(v.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn impression_batches(&self) -> Vec<ImpressionBatch> {
        self.deliveries
            .lock()
            .iter()
            .filter_map(|d| match d {
                Delivery::Impressions(b) => Some(b.clone()),
                _ => None,
            })
            .collect()
    }

    /// Wait until at least `count` deliveries were attempted.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.count() >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl Transport for CaptureTransport {
    async fn send(&self, delivery: &Delivery) -> FreshcartResult<()> {
        self.deliveries.lock().push(delivery.clone());
        match self.fail_with_status {
            Some(status) => Err(FreshcartError::Status {
                endpoint: delivery.kind().to_string(),
                status,
                body: "rejected by capture transport".to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// Convenience: create a capture transport for tests.
pub fn capture_transport() -> Arc<CaptureTransport> {
    Arc::new(CaptureTransport::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode, Uri};
    use axum::Json;
    use freshcart_core::types::CartAction;
    use freshcart_core::MemoryStore;
    use serde_json::json;

    #[derive(Debug, Clone)]
    struct Received {
        path: String,
        authorization: Option<String>,
        body: serde_json::Value,
    }

    #[derive(Clone)]
    struct TrackingApi {
        received: Arc<Mutex<Vec<Received>>>,
        status: StatusCode,
        reply: &'static str,
    }

    async fn record(
        State(api): State<TrackingApi>,
        uri: Uri,
        headers: HeaderMap,
        Json(body): Json<serde_json::Value>,
    ) -> (StatusCode, &'static str) {
        api.received.lock().push(Received {
            path: uri.path().to_string(),
            authorization: headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            body,
        });
        (api.status, api.reply)
    }

    /// Tracking API on an ephemeral port answering every POST with `status`.
    async fn serve(status: StatusCode, reply: &'static str) -> (String, Arc<Mutex<Vec<Received>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let app = axum::Router::new().fallback(record).with_state(TrackingApi {
            received: received.clone(),
            status,
            reply,
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/api"), received)
    }

    fn search_event() -> Delivery {
        Delivery::Event(TrackedEvent {
            user_id: Some("ann@example.com".into()),
            session_id: "s-1".into(),
            event_type: "search".into(),
            product_id: None,
            data: json!({ "search_query": "kale" }),
            timestamp: chrono::Utc::now(),
        })
    }

    fn http_transport(base: &str, store: Arc<MemoryStore>) -> HttpTransport {
        HttpTransport::new(base, &EndpointConfig::default(), store, "test-agent", None).unwrap()
    }

    #[test]
    fn test_endpoint_url_keeps_base_path() {
        let url = endpoint_url("http://localhost:8000/api/", "/events/track").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/api/events/track");

        let url = endpoint_url("https://shop.example.com", "track/impressions").unwrap();
        assert_eq!(url.as_str(), "https://shop.example.com/track/impressions");

        assert!(endpoint_url("not a url", "/events/track").is_err());
    }

    #[test]
    fn test_delivery_routes_to_matching_endpoint() {
        let urls = EndpointUrls::new("http://localhost:8000/api", &EndpointConfig::default()).unwrap();
        let cart = Delivery::Cart(CartEvent {
            user_id: None,
            session_id: "s".into(),
            action: CartAction::Remove,
            product_id: "9".into(),
            quantity: 1,
            cart_total_items: 0,
            cart_total_value: 0.0,
        });
        assert_eq!(urls.for_delivery(&cart).path(), "/api/events/cart");

        let body = cart.body().unwrap();
        assert_eq!(body["action"], "remove");
        assert_eq!(body["user_id"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_failing_capture_still_records_attempt() {
        let transport = CaptureTransport::failing(503);
        let delivery = Delivery::Impressions(ImpressionBatch {
            impressions: vec![],
            session_id: "s".into(),
        });
        let err = transport.send(&delivery).await.unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert_eq!(transport.count_kind("impressions"), 1);
    }

    #[tokio::test]
    async fn test_http_transport_posts_json_with_bearer_token() {
        let (base, received) = serve(StatusCode::OK, "ok").await;
        let store = MemoryStore::shared();
        store.set(keys::AUTH_TOKEN, "tok-123").unwrap();

        http_transport(&base, store).send(&search_event()).await.unwrap();

        let received = received.lock().clone();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].path, "/api/events/track");
        assert_eq!(received[0].authorization.as_deref(), Some("Bearer tok-123"));
        assert_eq!(received[0].body["event_type"], "search");
        assert_eq!(received[0].body["user_id"], "ann@example.com");
        assert_eq!(received[0].body["data"]["search_query"], "kale");
        assert!(received[0].body.get("timestamp").is_none());
    }

    #[tokio::test]
    async fn test_http_transport_omits_auth_without_token() {
        let (base, received) = serve(StatusCode::OK, "ok").await;
        let store = MemoryStore::shared();
        store.set(keys::AUTH_TOKEN, "").unwrap();

        http_transport(&base, store).send(&search_event()).await.unwrap();

        let received = received.lock().clone();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].authorization, None);
    }

    #[tokio::test]
    async fn test_http_transport_rejection_carries_status_and_body() {
        let (base, received) = serve(StatusCode::INTERNAL_SERVER_ERROR, "cart service down").await;
        let cart = Delivery::Cart(CartEvent {
            user_id: None,
            session_id: "s-1".into(),
            action: CartAction::Add,
            product_id: "7".into(),
            quantity: 1,
            cart_total_items: 2,
            cart_total_value: 4.5,
        });

        let err = http_transport(&base, MemoryStore::shared())
            .send(&cart)
            .await
            .unwrap_err();
        match err {
            FreshcartError::Status {
                endpoint,
                status,
                body,
            } => {
                assert_eq!(endpoint, "/api/events/cart");
                assert_eq!(status, 500);
                assert_eq!(body, "cart service down");
            }
            other => panic!("unexpected error: {other}"),
        }

        let received = received.lock().clone();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].path, "/api/events/cart");
        assert_eq!(received[0].body["cart_total_items"], 2);
    }
}
