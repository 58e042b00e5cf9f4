use serde::Deserialize;

use crate::error::FreshcartResult;

/// Root application configuration. Loaded from environment variables
/// with the prefix `FRESHCART__` and an optional TOML config file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub impressions: ImpressionConfig,
    #[serde(default)]
    pub bundles: BundleConfig,
}

/// Event tracking client settings. `enabled = false` is the global kill-switch.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackingConfig {
    #[serde(default = "default_tracking_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub endpoints: EndpointConfig,
    #[serde(default = "default_session_start_delay_ms")]
    pub session_start_delay_ms: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Per-request timeout. Zero leaves requests unbounded.
    #[serde(default)]
    pub request_timeout_ms: u64,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Paths (relative to `api_base`) of the tracking endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "default_events_path")]
    pub events: String,
    #[serde(default = "default_cart_events_path")]
    pub cart_events: String,
    #[serde(default = "default_product_view_path")]
    pub product_view: String,
    #[serde(default = "default_impressions_path")]
    pub impressions: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImpressionConfig {
    #[serde(default = "default_visibility_threshold")]
    pub visibility_threshold: f64,
    #[serde(default = "default_min_visible_ms")]
    pub min_visible_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BundleConfig {
    #[serde(default = "default_recommend_path")]
    pub recommend_path: String,
    #[serde(default = "default_recommend_limit")]
    pub limit: usize,
}

// Default functions
fn default_api_base() -> String {
    "http://localhost:8000/api".to_string()
}
fn default_tracking_enabled() -> bool {
    true
}
fn default_session_start_delay_ms() -> u64 {
    100
}
fn default_channel_capacity() -> usize {
    1024
}
fn default_shutdown_grace_ms() -> u64 {
    2000
}
fn default_user_agent() -> String {
    concat!("freshcart-tracker/", env!("CARGO_PKG_VERSION")).to_string()
}
fn default_events_path() -> String {
    "/events/track".to_string()
}
fn default_cart_events_path() -> String {
    "/events/cart".to_string()
}
fn default_product_view_path() -> String {
    "/track/product-view".to_string()
}
fn default_impressions_path() -> String {
    "/track/impressions".to_string()
}
fn default_visibility_threshold() -> f64 {
    0.5
}
fn default_min_visible_ms() -> u64 {
    500
}
fn default_batch_size() -> usize {
    10
}
fn default_flush_interval_ms() -> u64 {
    5000
}
fn default_recommend_path() -> String {
    "/bundles/recommend".to_string()
}
fn default_recommend_limit() -> usize {
    6
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            enabled: default_tracking_enabled(),
            endpoints: EndpointConfig::default(),
            session_start_delay_ms: default_session_start_delay_ms(),
            channel_capacity: default_channel_capacity(),
            request_timeout_ms: 0,
            shutdown_grace_ms: default_shutdown_grace_ms(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            events: default_events_path(),
            cart_events: default_cart_events_path(),
            product_view: default_product_view_path(),
            impressions: default_impressions_path(),
        }
    }
}

impl Default for ImpressionConfig {
    fn default() -> Self {
        Self {
            visibility_threshold: default_visibility_threshold(),
            min_visible_ms: default_min_visible_ms(),
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            recommend_path: default_recommend_path(),
            limit: default_recommend_limit(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            tracking: TrackingConfig::default(),
            impressions: ImpressionConfig::default(),
            bundles: BundleConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from an optional TOML file, then environment
    /// variables (`FRESHCART__TRACKING__ENABLED=false`, ...), later sources
    /// overriding earlier ones.
    pub fn load(file: Option<&str>) -> FreshcartResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("FRESHCART")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }
}
