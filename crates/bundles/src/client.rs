//! HTTP client for the bundle recommendation endpoint.

use tracing::{debug, info};
use url::Url;

use freshcart_core::config::BundleConfig;
use freshcart_core::types::CartItem;
use freshcart_core::{FreshcartError, FreshcartResult};

use crate::{flatten_bundles, Bundle, BundleProduct, RecommendRequest};

pub struct BundleClient {
    client: reqwest::Client,
    recommend_url: Url,
    limit: usize,
}

impl BundleClient {
    pub fn new(client: reqwest::Client, api_base: &str, config: &BundleConfig) -> FreshcartResult<Self> {
        let joined = format!(
            "{}/{}",
            api_base.trim_end_matches('/'),
            config.recommend_path.trim_start_matches('/')
        );
        let recommend_url =
            Url::parse(&joined).map_err(|e| FreshcartError::Url(format!("{joined}: {e}")))?;
        Ok(Self {
            client,
            recommend_url,
            limit: config.limit,
        })
    }

    pub fn recommend_url(&self) -> &Url {
        &self.recommend_url
    }

    /// Raw bundles recommended for the cart. An empty cart short-circuits
    /// without a request.
    pub async fn recommend_bundles(&self, cart: &[CartItem]) -> FreshcartResult<Vec<Bundle>> {
        if cart.is_empty() {
            return Ok(Vec::new());
        }
        let request = RecommendRequest::for_cart(cart, self.limit);
        debug!(cart_items = cart.len(), limit = self.limit, "requesting bundle recommendations");

        let response = self
            .client
            .post(self.recommend_url.clone())
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FreshcartError::Status {
                endpoint: self.recommend_url.path().to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }

    /// Recommended products not already in the cart, in bundle order.
    pub async fn recommend(&self, cart: &[CartItem]) -> FreshcartResult<Vec<BundleProduct>> {
        let bundles = self.recommend_bundles(cart).await?;
        let products = flatten_bundles(&bundles, cart);
        info!(bundles = bundles.len(), products = products.len(), "bundle recommendations ready");
        Ok(products)
    }
}
