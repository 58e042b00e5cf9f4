//! Explicit product views (card clicks, detail pages, quick views), sent at
//! most once per session and product. Seen keys are persisted so a reload
//! does not re-send them.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashSet;
use tracing::{debug, warn};

use freshcart_core::storage::{keys, read_json, KeyValueStore};
use freshcart_core::types::{ProductView, ViewSource};
use freshcart_core::FreshcartError;

use crate::dispatch::Dispatcher;
use crate::session::SessionManager;
use crate::transport::Delivery;

pub struct ProductViewLog {
    enabled: bool,
    store: Arc<dyn KeyValueStore>,
    sessions: Arc<SessionManager>,
    dispatcher: Arc<Dispatcher>,
    seen: DashSet<String>,
}

impl ProductViewLog {
    pub fn new(
        enabled: bool,
        store: Arc<dyn KeyValueStore>,
        sessions: Arc<SessionManager>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            enabled,
            store,
            sessions,
            dispatcher,
            seen: DashSet::new(),
        }
    }

    /// Load previously persisted view keys into memory.
    pub fn restore(&self) -> usize {
        let persisted: Vec<String> =
            read_json(self.store.as_ref(), keys::VIEWED_PRODUCTS).unwrap_or_default();
        let count = persisted.len();
        for key in persisted {
            self.seen.insert(key);
        }
        debug!(count = count, "restored viewed products");
        count
    }

    /// Record and send a view unless this session already reported the
    /// product. Returns whether a view was sent.
    pub fn track(
        &self,
        product_id: &str,
        source: ViewSource,
        data: HashMap<String, serde_json::Value>,
    ) -> bool {
        if !self.enabled {
            return false;
        }
        let session_id = self.sessions.get_or_create_session_id();
        let key = view_key(&session_id, product_id);
        if !self.seen.insert(key.clone()) {
            return false;
        }
        self.persist(key);

        let mut data = data;
        data.entry("timestamp".to_string())
            .or_insert_with(|| serde_json::json!(chrono::Utc::now().to_rfc3339()));

        self.dispatcher.dispatch(Delivery::ProductView(ProductView {
            product_id: product_id.to_string(),
            session_id,
            source,
            data,
        }))
    }

    pub fn has_seen(&self, product_id: &str) -> bool {
        let session_id = self.sessions.get_or_create_session_id();
        self.seen.contains(&view_key(&session_id, product_id))
    }

    fn persist(&self, key: String) {
        let mut persisted: Vec<String> =
            read_json(self.store.as_ref(), keys::VIEWED_PRODUCTS).unwrap_or_default();
        if persisted.contains(&key) {
            return;
        }
        persisted.push(key);
        let result = serde_json::to_string(&persisted)
            .map_err(FreshcartError::from)
            .and_then(|json| self.store.set(keys::VIEWED_PRODUCTS, &json));
        if let Err(e) = result {
            warn!(error = %e, "failed to persist viewed products");
        }
    }
}

fn view_key(session_id: &str, product_id: &str) -> String {
    format!("{session_id}_{product_id}")
}
