//! Cart totals derived from the persisted cart, used to annotate cart events.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use freshcart_core::storage::{keys, read_json, KeyValueStore};
use freshcart_core::types::{CartItem, CartSnapshot};

/// Read the persisted cart. A missing or malformed cart is empty; a line
/// that does not parse is skipped on its own.
pub fn load_cart(store: &dyn KeyValueStore) -> Vec<CartItem> {
    let lines: Vec<Value> = read_json(store, keys::CART).unwrap_or_default();
    lines
        .into_iter()
        .filter_map(|line| match serde_json::from_value::<CartItem>(line) {
            Ok(item) => Some(item),
            Err(e) => {
                debug!(error = %e, "skipping unreadable cart line");
                None
            }
        })
        .collect()
}

/// Last snapshot taken, refreshed before every cart event.
pub struct CartState {
    store: Arc<dyn KeyValueStore>,
    snapshot: Mutex<CartSnapshot>,
}

impl CartState {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            snapshot: Mutex::new(CartSnapshot::default()),
        }
    }

    pub fn refresh(&self) -> CartSnapshot {
        let snapshot = CartSnapshot::from_items(&load_cart(self.store.as_ref()));
        *self.snapshot.lock() = snapshot;
        snapshot
    }

    pub fn current(&self) -> CartSnapshot {
        *self.snapshot.lock()
    }
}
