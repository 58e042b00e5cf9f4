//! The tracker service: one explicitly constructed instance owning identity,
//! session, emitter, impression batcher and product view log, with a
//! `start()` / `stop()` lifecycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::info;

use freshcart_core::config::AppConfig;
use freshcart_core::types::{CartSnapshot, Identity, ViewSource};
use freshcart_core::{FreshcartResult, KeyValueStore};

use crate::cart::CartState;
use crate::dispatch::Dispatcher;
use crate::emitter::EventEmitter;
use crate::identity::IdentityResolver;
use crate::impressions::ImpressionBatcher;
use crate::product_views::ProductViewLog;
use crate::session::{Session, SessionManager};
use crate::transport::{HttpTransport, Transport};

pub struct Tracker {
    enabled: bool,
    session_start_delay: Duration,
    shutdown_grace: Duration,
    identity: Arc<IdentityResolver>,
    sessions: Arc<SessionManager>,
    dispatcher: Arc<Dispatcher>,
    emitter: EventEmitter,
    impressions: ImpressionBatcher,
    product_views: ProductViewLog,
    stopped: AtomicBool,
}

impl Tracker {
    pub fn new(config: &AppConfig, store: Arc<dyn KeyValueStore>, transport: Arc<dyn Transport>) -> Self {
        let tracking = &config.tracking;
        let enabled = tracking.enabled;

        let dispatcher = Arc::new(Dispatcher::new(transport, tracking.channel_capacity));
        let identity = Arc::new(IdentityResolver::new(store.clone()));
        let sessions = Arc::new(SessionManager::new(
            store.clone(),
            identity.clone(),
            dispatcher.clone(),
            tracking.user_agent.clone(),
        ));
        let emitter = EventEmitter::new(
            enabled,
            identity.clone(),
            sessions.clone(),
            dispatcher.clone(),
            CartState::new(store.clone()),
        );
        let impressions = ImpressionBatcher::new(
            enabled,
            config.impressions.clone(),
            sessions.clone(),
            dispatcher.clone(),
        );
        let product_views = ProductViewLog::new(enabled, store, sessions.clone(), dispatcher.clone());

        Self {
            enabled,
            session_start_delay: Duration::from_millis(tracking.session_start_delay_ms),
            shutdown_grace: Duration::from_millis(tracking.shutdown_grace_ms),
            identity,
            sessions,
            dispatcher,
            emitter,
            impressions,
            product_views,
            stopped: AtomicBool::new(false),
        }
    }

    /// Tracker posting to the configured HTTP endpoints.
    pub fn with_http(config: &AppConfig, store: Arc<dyn KeyValueStore>) -> FreshcartResult<Self> {
        let timeout = match config.tracking.request_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        let transport = HttpTransport::new(
            &config.api_base,
            &config.tracking.endpoints,
            store.clone(),
            &config.tracking.user_agent,
            timeout,
        )?;
        Ok(Self::new(config, store, Arc::new(transport)))
    }

    /// Start delivering and schedule `session_start`. Must run inside a
    /// Tokio runtime. No-op when tracking is disabled.
    pub fn start(&self) {
        if !self.enabled {
            info!("tracking disabled by configuration");
            return;
        }
        if self.stopped.load(Ordering::SeqCst) || !self.dispatcher.start() {
            return;
        }
        self.product_views.restore();
        // Make sure the id exists before anything else reads it.
        let session_id = self.sessions.get_or_create_session_id();
        self.sessions.start(self.session_start_delay);
        info!(session_id = %session_id, "tracker started");
    }

    /// Flush impressions, send `session_end`, and give pending deliveries
    /// the configured grace period. Idempotent.
    pub async fn stop(&self) {
        if !self.enabled || self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.impressions.flush();
        self.sessions.end();
        self.dispatcher.shutdown(self.shutdown_grace).await;
        info!("tracker stopped");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn identity(&self) -> Identity {
        self.identity
            .resolve(&self.sessions.get_or_create_session_id())
    }

    pub fn session_id(&self) -> String {
        self.sessions.get_or_create_session_id()
    }

    pub fn session(&self) -> Session {
        self.sessions.session()
    }

    pub fn emit(&self, event_type: &str, product_id: Option<&str>, data: Value) {
        self.emitter.emit(event_type, product_id, data);
    }

    pub fn track_page_view(&self, page: &str) {
        self.emitter.track_page_view(page);
    }

    pub fn track_product_view(&self, product_id: &str, product_data: Value) {
        self.emitter.track_product_view(product_id, product_data);
    }

    /// Deduplicated explicit view on the product-view endpoint.
    pub fn track_product_detail(
        &self,
        product_id: &str,
        source: ViewSource,
        data: HashMap<String, Value>,
    ) -> bool {
        self.product_views.track(product_id, source, data)
    }

    pub fn track_search(&self, query: &str) {
        self.emitter.track_search(query);
    }

    pub fn track_click(&self, product_id: &str, context: &str) {
        self.emitter.track_click(product_id, context);
    }

    pub fn track_cart_add(&self, product_id: &str, product_data: Value) {
        self.emitter.track_cart_add(product_id, product_data);
    }

    pub fn track_cart_remove(&self, product_id: &str) {
        self.emitter.track_cart_remove(product_id);
    }

    pub fn track_purchase(&self, order: Value) {
        self.emitter.track_purchase(order);
    }

    pub fn cart_snapshot(&self) -> CartSnapshot {
        self.emitter.cart_snapshot()
    }

    pub fn visibility_changed(&self, product_id: &str, intersection_ratio: f64) {
        self.impressions.visibility_changed(product_id, intersection_ratio);
    }

    pub fn unobserve(&self, product_id: &str) {
        self.impressions.unobserve(product_id);
    }

    pub fn flush_impressions(&self) {
        self.impressions.flush();
    }

    pub fn impressions(&self) -> &ImpressionBatcher {
        &self.impressions
    }
}
