use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Who is browsing. Resolved fresh from storage on every tracking call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Anonymous {
        session_id: String,
    },
    Guest {
        guest_id: String,
        name: Option<String>,
        email: Option<String>,
    },
    Authenticated {
        email: String,
    },
}

impl Identity {
    /// The id sent as `user_id`. Anonymous visitors are never sent.
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Identity::Anonymous { .. } => None,
            Identity::Guest { guest_id, .. } => Some(guest_id),
            Identity::Authenticated { email } => Some(email),
        }
    }

    /// Stable reference for logs, including the synthesized anonymous one.
    pub fn reference(&self) -> String {
        match self {
            Identity::Anonymous { session_id } => format!("anonymous_{session_id}"),
            other => other.user_id().unwrap_or_default().to_string(),
        }
    }

    pub fn user_type(&self) -> UserType {
        match self {
            Identity::Anonymous { .. } => UserType::Anonymous,
            _ => UserType::LoggedIn,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Identity::Anonymous { .. })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    LoggedIn,
    Anonymous,
}

/// Guest account as written by the guest-login flow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuestRecord {
    #[serde(default, deserialize_with = "lenient_id_opt")]
    pub guest_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// A discrete behavioral event, body of `POST /events/track`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackedEvent {
    pub user_id: Option<String>,
    pub session_id: String,
    pub event_type: String,
    pub product_id: Option<String>,
    pub data: serde_json::Value,
    #[serde(skip_serializing, default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CartAction {
    Add,
    Remove,
}

impl CartAction {
    pub fn event_type(&self) -> &'static str {
        match self {
            CartAction::Add => "cart_add",
            CartAction::Remove => "cart_remove",
        }
    }
}

/// Body of `POST /events/cart`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CartEvent {
    pub user_id: Option<String>,
    pub session_id: String,
    pub action: CartAction,
    pub product_id: String,
    pub quantity: u32,
    pub cart_total_items: u64,
    pub cart_total_value: f64,
}

/// One line of the persisted cart. The id is read from `product_id`, then
/// `id`; a `null` price or quantity counts as 0.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "RawCartItem")]
pub struct CartItem {
    pub id: String,
    pub name: Option<String>,
    pub price: f64,
    pub quantity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
}

#[derive(Deserialize)]
struct RawCartItem {
    #[serde(default, deserialize_with = "lenient_id_opt")]
    id: Option<String>,
    #[serde(default, deserialize_with = "lenient_id_opt")]
    product_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    quantity: Option<u32>,
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    department: Option<String>,
}

impl TryFrom<RawCartItem> for CartItem {
    type Error = String;

    fn try_from(raw: RawCartItem) -> Result<Self, Self::Error> {
        let id = raw
            .product_id
            .or(raw.id)
            .ok_or_else(|| "cart item has neither product_id nor id".to_string())?;
        Ok(Self {
            id,
            name: raw.name,
            price: raw.price.unwrap_or_default(),
            quantity: raw.quantity.unwrap_or_default(),
            image_url: raw.image_url,
            department: raw.department,
        })
    }
}

/// Cart totals used to annotate cart events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CartSnapshot {
    pub item_count: u64,
    pub total_value: f64,
}

impl CartSnapshot {
    pub fn from_items(items: &[CartItem]) -> Self {
        items.iter().fold(Self::default(), |acc, item| Self {
            item_count: acc.item_count + u64::from(item.quantity),
            total_value: acc.total_value + item.price * f64::from(item.quantity),
        })
    }
}

/// A product element that stayed visible long enough to count as seen.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Impression {
    pub product_id: String,
    #[serde(rename = "duration")]
    pub duration_ms: u64,
    #[serde(rename = "visibility")]
    pub visibility_ratio: f64,
    pub timestamp: DateTime<Utc>,
}

/// Body of `POST /track/impressions`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImpressionBatch {
    pub impressions: Vec<Impression>,
    pub session_id: String,
}

/// Where an explicit product view came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ViewSource {
    CardClick,
    DetailPage,
    QuickView,
}

/// Body of `POST /track/product-view`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductView {
    pub product_id: String,
    pub session_id: String,
    pub source: ViewSource,
    pub data: HashMap<String, serde_json::Value>,
}

/// Product ids arrive as JSON numbers from the catalog and as strings from
/// older cart entries.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Int(n) => n.to_string(),
            RawId::Float(f) => f.to_string(),
            RawId::Str(s) => s,
        }
    }
}

pub fn lenient_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    RawId::deserialize(deserializer).map(String::from)
}

pub fn lenient_id_opt<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<RawId>::deserialize(deserializer)?.map(String::from))
}
