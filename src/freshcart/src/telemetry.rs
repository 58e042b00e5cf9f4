//! Logging and metrics setup for the binary.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

pub fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "freshcart=info,freshcart_tracker=info".into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Install the process-wide Prometheus recorder backing the tracker's
/// `metrics` counters.
pub fn install_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("Metrics recorder installed");
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use freshcart_core::{AppConfig, MemoryStore};
    use freshcart_tracker::transport::capture_transport;
    use freshcart_tracker::Tracker;

    // Only test in this binary that installs the global recorder.
    #[tokio::test]
    async fn test_tracker_counters_reach_the_recorder() {
        let handle = install_metrics().unwrap();

        let transport = capture_transport();
        let tracker = Tracker::new(&AppConfig::default(), MemoryStore::shared(), transport.clone());
        tracker.start();
        tracker.track_search("kale");
        tracker.track_page_view("/products");
        tracker.stop().await;
        assert!(transport.count() >= 2);

        let rendered = handle.render();
        assert!(rendered.contains("tracking_sent"), "{rendered}");
        assert!(rendered.contains("tracking_queued"), "{rendered}");
    }
}
