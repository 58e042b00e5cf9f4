//! Scripted storefront sessions. Each line of a script is one JSON action;
//! actions that change shopper state (sign-in, cart) write the same storage
//! slots the storefront does, then call the tracker like the page would.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use freshcart_core::storage::keys;
use freshcart_core::types::{CartItem, ViewSource};
use freshcart_core::KeyValueStore;
use freshcart_tracker::cart::load_cart;
use freshcart_tracker::Tracker;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    SignIn {
        email: String,
    },
    SignOut,
    Guest {
        guest_id: String,
        name: Option<String>,
    },
    PageView {
        page: String,
    },
    Search {
        query: String,
    },
    ProductView {
        product_id: String,
        #[serde(default)]
        data: Value,
    },
    ProductDetail {
        product_id: String,
        #[serde(default = "default_source")]
        source: ViewSource,
    },
    Click {
        product_id: String,
        #[serde(default)]
        context: String,
    },
    CartAdd {
        product_id: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        price: f64,
    },
    CartRemove {
        product_id: String,
    },
    Purchase {
        #[serde(default)]
        order: Value,
    },
    Visible {
        product_id: String,
        ratio: f64,
    },
    Wait {
        ms: u64,
    },
}

fn default_source() -> ViewSource {
    ViewSource::DetailPage
}

/// Parse a script; blank lines and `#` comments are skipped.
pub fn parse_script(raw: &str) -> anyhow::Result<Vec<Action>> {
    raw.lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(n, line)| {
            serde_json::from_str(line).with_context(|| format!("script line {}", n + 1))
        })
        .collect()
}

pub async fn run(tracker: &Tracker, store: &dyn KeyValueStore, actions: &[Action]) -> anyhow::Result<()> {
    for action in actions {
        debug!(?action, "replaying action");
        apply(tracker, store, action).await?;
    }
    info!(actions = actions.len(), "script finished");
    Ok(())
}

async fn apply(tracker: &Tracker, store: &dyn KeyValueStore, action: &Action) -> anyhow::Result<()> {
    match action {
        Action::SignIn { email } => store.set(keys::USER_EMAIL, email)?,
        Action::SignOut => {
            store.remove(keys::USER_EMAIL)?;
            store.remove(keys::GUEST_USER)?;
        }
        Action::Guest { guest_id, name } => {
            let record = json!({ "guest_id": guest_id, "name": name });
            store.set(keys::GUEST_USER, &record.to_string())?;
        }
        Action::PageView { page } => tracker.track_page_view(page),
        Action::Search { query } => tracker.track_search(query),
        Action::ProductView { product_id, data } => tracker.track_product_view(product_id, data.clone()),
        Action::ProductDetail { product_id, source } => {
            tracker.track_product_detail(product_id, *source, HashMap::new());
        }
        Action::Click { product_id, context } => tracker.track_click(product_id, context),
        Action::CartAdd {
            product_id,
            name,
            price,
        } => {
            let mut cart = load_cart(store);
            match cart.iter_mut().find(|item| &item.id == product_id) {
                Some(item) => item.quantity += 1,
                None => cart.push(CartItem {
                    id: product_id.clone(),
                    name: name.clone(),
                    price: *price,
                    quantity: 1,
                    image_url: None,
                    department: None,
                }),
            }
            save_cart(store, &cart)?;
            tracker.track_cart_add(product_id, json!({ "name": name, "price": price }));
        }
        Action::CartRemove { product_id } => {
            let mut cart = load_cart(store);
            cart.retain(|item| &item.id != product_id);
            save_cart(store, &cart)?;
            tracker.track_cart_remove(product_id);
        }
        Action::Purchase { order } => {
            tracker.track_purchase(order.clone());
            save_cart(store, &[])?;
        }
        Action::Visible { product_id, ratio } => tracker.visibility_changed(product_id, *ratio),
        Action::Wait { ms } => tokio::time::sleep(Duration::from_millis(*ms)).await,
    }
    Ok(())
}

fn save_cart(store: &dyn KeyValueStore, cart: &[CartItem]) -> anyhow::Result<()> {
    store.set(keys::CART, &serde_json::to_string(cart)?)?;
    Ok(())
}
