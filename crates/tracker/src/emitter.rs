//! Event emitter: fire-and-forget behavioral events tagged with the
//! current identity and session.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::debug;

use freshcart_core::types::{CartAction, CartEvent, CartSnapshot, TrackedEvent};

use crate::cart::CartState;
use crate::dispatch::Dispatcher;
use crate::identity::IdentityResolver;
use crate::session::SessionManager;
use crate::transport::Delivery;

pub struct EventEmitter {
    enabled: bool,
    identity: Arc<IdentityResolver>,
    sessions: Arc<SessionManager>,
    dispatcher: Arc<Dispatcher>,
    cart: CartState,
}

impl EventEmitter {
    pub fn new(
        enabled: bool,
        identity: Arc<IdentityResolver>,
        sessions: Arc<SessionManager>,
        dispatcher: Arc<Dispatcher>,
        cart: CartState,
    ) -> Self {
        Self {
            enabled,
            identity,
            sessions,
            dispatcher,
            cart,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Build and queue one event. Never blocks and never fails.
    pub fn emit(&self, event_type: &str, product_id: Option<&str>, data: Value) {
        if !self.enabled {
            return;
        }
        let event = self.build_event(event_type, product_id, data);
        debug!(
            event_type = %event.event_type,
            user_id = ?event.user_id,
            session_id = %event.session_id,
            "tracking event"
        );
        self.dispatcher.dispatch(Delivery::Event(event));
    }

    pub fn build_event(&self, event_type: &str, product_id: Option<&str>, data: Value) -> TrackedEvent {
        let session_id = self.sessions.get_or_create_session_id();
        let identity = self.identity.resolve(&session_id);
        TrackedEvent {
            user_id: identity.user_id().map(str::to_string),
            session_id,
            event_type: event_type.to_string(),
            product_id: product_id.map(str::to_string),
            data: object_or_empty(data),
            timestamp: Utc::now(),
        }
    }

    pub fn track_product_view(&self, product_id: &str, product_data: Value) {
        self.emit("product_view", Some(product_id), product_data);
    }

    pub fn track_search(&self, query: &str) {
        self.emit("search", None, json!({ "search_query": query }));
    }

    pub fn track_click(&self, product_id: &str, context: &str) {
        self.emit("click", Some(product_id), json!({ "context": context }));
    }

    pub fn track_cart_add(&self, product_id: &str, product_data: Value) {
        self.track_cart(CartAction::Add, product_id, product_data);
    }

    pub fn track_cart_remove(&self, product_id: &str) {
        self.track_cart(CartAction::Remove, product_id, Value::Null);
    }

    /// Snapshot the cart as it stands after the mutation, then send the
    /// cart event and the matching behavioral event.
    fn track_cart(&self, action: CartAction, product_id: &str, product_data: Value) {
        let snapshot = self.cart.refresh();
        if !self.enabled {
            return;
        }
        let cart_event = self.build_cart_event(action, product_id, 1, snapshot);
        self.dispatcher.dispatch(Delivery::Cart(cart_event));
        self.emit(action.event_type(), Some(product_id), product_data);
    }

    pub fn build_cart_event(
        &self,
        action: CartAction,
        product_id: &str,
        quantity: u32,
        snapshot: CartSnapshot,
    ) -> CartEvent {
        let session_id = self.sessions.get_or_create_session_id();
        let identity = self.identity.resolve(&session_id);
        CartEvent {
            user_id: identity.user_id().map(str::to_string),
            session_id,
            action,
            product_id: product_id.to_string(),
            quantity,
            cart_total_items: snapshot.item_count,
            cart_total_value: snapshot.total_value,
        }
    }

    pub fn track_purchase(&self, order: Value) {
        if !self.enabled {
            return;
        }
        self.emit("purchase", None, order.clone());
        self.sessions.annotate("purchase", order);
    }

    pub fn track_page_view(&self, page: &str) {
        if !self.enabled {
            return;
        }
        self.sessions.annotate("page_view", json!({ "page": page }));
    }

    pub fn cart_snapshot(&self) -> CartSnapshot {
        self.cart.current()
    }
}

fn object_or_empty(data: Value) -> Value {
    match data {
        Value::Null => json!({}),
        other => other,
    }
}
