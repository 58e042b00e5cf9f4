//! FreshCart: storefront tracking client driver.
//!
//! Inspects the persisted shopper state, replays scripted storefront
//! sessions against the tracking API, and fetches cart recommendations.

mod script;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use freshcart_bundles::BundleClient;
use freshcart_core::config::AppConfig;
use freshcart_core::types::CartSnapshot;
use freshcart_core::{FileStore, KeyValueStore};
use freshcart_tracker::cart::load_cart;
use freshcart_tracker::{NoOpTransport, Tracker};

#[derive(Parser, Debug)]
#[command(name = "freshcart")]
#[command(about = "Storefront behavioral tracking client")]
#[command(version)]
struct Cli {
    /// Optional TOML config file
    #[arg(long, short, env = "FRESHCART_CONFIG")]
    config: Option<String>,

    /// Persisted shopper state (session id, sign-in, cart)
    #[arg(long, env = "FRESHCART_STATE", default_value = ".freshcart/state.json")]
    state: PathBuf,

    /// API base URL (overrides config)
    #[arg(long, env = "FRESHCART__API_BASE")]
    api_base: Option<String>,

    /// Disable all tracking deliveries (overrides config)
    #[arg(long, default_value_t = false)]
    no_tracking: bool,

    /// Emit logs as JSON
    #[arg(long, default_value_t = false)]
    json_logs: bool,

    /// Print tracking metrics in Prometheus text format on exit
    #[arg(long, default_value_t = false)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the resolved identity, session and cart totals
    Identity,
    /// Replay a script of storefront actions (one JSON object per line)
    Replay {
        script: PathBuf,
    },
    /// Fetch bundle recommendations for the persisted cart
    Recommend,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing(cli.json_logs);
    let metrics = telemetry::install_metrics()?;

    let mut config = AppConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });
    if let Some(api_base) = cli.api_base {
        config.api_base = api_base;
    }
    if cli.no_tracking {
        config.tracking.enabled = false;
    }

    info!(
        api_base = %config.api_base,
        tracking_enabled = config.tracking.enabled,
        state = %cli.state.display(),
        "Configuration loaded"
    );

    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(&cli.state));

    match cli.command {
        Command::Identity => {
            // Nothing is delivered here, only local state is read.
            let tracker = Tracker::new(&config, store.clone(), Arc::new(NoOpTransport));
            let session = tracker.session();
            let snapshot = CartSnapshot::from_items(&load_cart(store.as_ref()));
            let summary = serde_json::json!({
                "identity": tracker.identity().reference(),
                "user_id": tracker.identity().user_id(),
                "session_id": session.session_id,
                "cart_total_items": snapshot.item_count,
                "cart_total_value": snapshot.total_value,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Replay { script } => {
            let raw = std::fs::read_to_string(&script)
                .with_context(|| format!("reading {}", script.display()))?;
            let actions = script::parse_script(&raw)?;

            let tracker = Tracker::with_http(&config, store.clone())?;
            tracker.start();
            let outcome = script::run(&tracker, store.as_ref(), &actions).await;
            tracker.stop().await;
            outcome?;
        }
        Command::Recommend => {
            let client = BundleClient::new(reqwest::Client::new(), &config.api_base, &config.bundles)?;
            let cart = load_cart(store.as_ref());
            let products = client.recommend(&cart).await?;
            println!("{}", serde_json::to_string_pretty(&products)?);
        }
    }

    if cli.print_metrics {
        print!("{}", metrics.render());
    }
    Ok(())
}
