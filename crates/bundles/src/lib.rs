//! Bundle recommendations for the cart: frequently co-purchased product
//! sets from the recommendation API, flattened against what is already in
//! the cart.

pub mod client;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use freshcart_core::types::{lenient_id, lenient_id_opt, CartItem};

pub use client::BundleClient;

/// A backend-computed set of products frequently bought together.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bundle {
    #[serde(default, deserialize_with = "lenient_id_opt")]
    pub bundle_id: Option<String>,
    #[serde(default)]
    pub bundle_rank: Option<u32>,
    #[serde(default)]
    pub support: Option<f64>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub lift: Option<f64>,
    #[serde(default)]
    pub products: Vec<BundleProduct>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BundleProduct {
    #[serde(deserialize_with = "lenient_id")]
    pub product_id: String,
    pub name: String,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
}

impl BundleProduct {
    /// Cart line for adding a recommended product: one unit, unknown prices
    /// count as zero.
    pub fn to_cart_item(&self) -> CartItem {
        CartItem {
            id: self.product_id.clone(),
            name: Some(self.name.clone()),
            price: self.price.unwrap_or(0.0),
            quantity: 1,
            image_url: self.image_url.clone(),
            department: Some(
                self.department
                    .clone()
                    .unwrap_or_else(|| "recommended".to_string()),
            ),
        }
    }
}

/// Body of `POST /bundles/recommend`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendRequest {
    pub cart_product_ids: Vec<serde_json::Value>,
    pub limit: usize,
}

impl RecommendRequest {
    /// Numeric ids go out as numbers, anything else as strings.
    pub fn for_cart(cart: &[CartItem], limit: usize) -> Self {
        let cart_product_ids = cart
            .iter()
            .map(|item| match item.id.parse::<i64>() {
                Ok(n) => serde_json::Value::from(n),
                Err(_) => serde_json::Value::from(item.id.clone()),
            })
            .collect();
        Self {
            cart_product_ids,
            limit,
        }
    }
}

/// Products across `bundles` in bundle order, minus anything already in the
/// cart and minus repeats.
pub fn flatten_bundles(bundles: &[Bundle], cart: &[CartItem]) -> Vec<BundleProduct> {
    let in_cart: HashSet<&str> = cart.iter().map(|item| item.id.as_str()).collect();
    let mut seen = HashSet::new();

    bundles
        .iter()
        .flat_map(|bundle| bundle.products.iter())
        .filter(|p| !in_cart.contains(p.product_id.as_str()))
        .filter(|p| seen.insert(p.product_id.clone()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundles() -> Vec<Bundle> {
        serde_json::from_str(
            r#"[
                {"bundle_id": 101, "bundle_rank": 1, "lift": 2.5, "products": [
                    {"product_id": 1011, "name": "Organic Bananas", "price": 0.99},
                    {"product_id": 1012, "name": "Whole Milk"}
                ]},
                {"bundle_id": 102, "bundle_rank": 2, "products": [
                    {"product_id": 1012, "name": "Whole Milk"},
                    {"product_id": 1021, "name": "Whole Wheat Bread", "department": "bakery"}
                ]}
            ]"#,
        )
        .unwrap()
    }

    fn cart_with(ids: &[&str]) -> Vec<CartItem> {
        ids.iter()
            .map(|id| CartItem {
                id: id.to_string(),
                name: None,
                price: 1.0,
                quantity: 1,
                image_url: None,
                department: None,
            })
            .collect()
    }

    #[test]
    fn test_flatten_skips_cart_items_and_repeats() {
        let flattened = flatten_bundles(&bundles(), &cart_with(&["1011"]));
        let ids: Vec<&str> = flattened.iter().map(|p| p.product_id.as_str()).collect();
        assert_eq!(ids, vec!["1012", "1021"]);
    }

    #[test]
    fn test_flatten_empty_inputs() {
        assert!(flatten_bundles(&[], &cart_with(&["1"])).is_empty());
        assert_eq!(flatten_bundles(&bundles(), &[]).len(), 3);
    }

    #[test]
    fn test_recommended_product_to_cart_item() {
        let products = flatten_bundles(&bundles(), &[]);
        let milk = products[1].to_cart_item();
        assert_eq!(milk.id, "1012");
        assert_eq!(milk.price, 0.0);
        assert_eq!(milk.quantity, 1);
        assert_eq!(milk.department.as_deref(), Some("recommended"));

        let bread = products[2].to_cart_item();
        assert_eq!(bread.department.as_deref(), Some("bakery"));
    }

    #[test]
    fn test_request_keeps_numeric_ids_numeric() {
        let request = RecommendRequest::for_cart(&cart_with(&["1011", "sku-9"]), 6);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["cart_product_ids"], serde_json::json!([1011, "sku-9"]));
        assert_eq!(json["limit"], 6);
    }
}
