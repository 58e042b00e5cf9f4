//! Impression batcher: turns viewport visibility changes of product elements
//! into impressions and delivers them in batches.
//!
//! Per product the state is `NotVisible -> Visible -> NotVisible`. Leaving
//! the visible state after at least `min_visible_ms` queues an impression;
//! shorter exposures are noise. The queue is flushed at `batch_size` items
//! or `flush_interval_ms` after the first queued item, whichever comes first.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use freshcart_core::config::ImpressionConfig;
use freshcart_core::types::{Impression, ImpressionBatch};

use crate::dispatch::Dispatcher;
use crate::session::SessionManager;
use crate::transport::Delivery;

#[derive(Debug, Clone, Copy)]
struct Visible {
    since: Instant,
    peak_ratio: f64,
}

#[derive(Default)]
struct BatchState {
    visible: HashMap<String, Visible>,
    queue: Vec<Impression>,
    timer: Option<JoinHandle<()>>,
    // Bumped per scheduled timer; a firing with an older value is stale.
    timer_generation: u64,
}

struct BatcherInner {
    enabled: bool,
    config: ImpressionConfig,
    sessions: Arc<SessionManager>,
    dispatcher: Arc<Dispatcher>,
    state: Mutex<BatchState>,
}

/// Cheap to clone; clones share one queue.
#[derive(Clone)]
pub struct ImpressionBatcher {
    inner: Arc<BatcherInner>,
}

impl ImpressionBatcher {
    pub fn new(
        enabled: bool,
        config: ImpressionConfig,
        sessions: Arc<SessionManager>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            inner: Arc::new(BatcherInner {
                enabled,
                config,
                sessions,
                dispatcher,
                state: Mutex::new(BatchState::default()),
            }),
        }
    }

    /// Feed an intersection change for a product element.
    pub fn visibility_changed(&self, product_id: &str, intersection_ratio: f64) {
        if !self.inner.enabled {
            return;
        }
        let now = Instant::now();
        let threshold = self.inner.config.visibility_threshold;

        let mut state = self.inner.state.lock();
        if intersection_ratio >= threshold {
            state
                .visible
                .entry(product_id.to_string())
                .and_modify(|v| v.peak_ratio = v.peak_ratio.max(intersection_ratio))
                .or_insert_with(|| {
                    trace!(product_id = product_id, ratio = intersection_ratio, "product became visible");
                    Visible {
                        since: now,
                        peak_ratio: intersection_ratio,
                    }
                });
            return;
        }

        let Some(visible) = state.visible.remove(product_id) else {
            return;
        };
        let batch = self.inner.record_exit(&mut state, product_id, visible, now);
        drop(state);
        if let Some(batch) = batch {
            self.inner.send(batch);
        }
    }

    /// The element went away (unmounted, navigated off). Ends any visible
    /// period as if it had scrolled out of view.
    pub fn unobserve(&self, product_id: &str) {
        self.visibility_changed(product_id, 0.0);
    }

    /// Deliver whatever is queued now and cancel the pending timer.
    pub fn flush(&self) {
        if !self.inner.enabled {
            return;
        }
        let batch = {
            let mut state = self.inner.state.lock();
            BatcherInner::take_batch(&mut state)
        };
        if let Some(impressions) = batch {
            self.inner.send(impressions);
        }
    }

    pub fn pending(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn visible_count(&self) -> usize {
        self.inner.state.lock().visible.len()
    }

    pub fn has_pending_timer(&self) -> bool {
        self.inner.state.lock().timer.is_some()
    }
}

impl BatcherInner {
    /// Apply the Visible -> NotVisible transition. Returns a batch to send
    /// when the size threshold was hit.
    fn record_exit(
        self: &Arc<Self>,
        state: &mut BatchState,
        product_id: &str,
        visible: Visible,
        now: Instant,
    ) -> Option<Vec<Impression>> {
        let duration = now.saturating_duration_since(visible.since);
        let min_visible = Duration::from_millis(self.config.min_visible_ms);
        if duration < min_visible {
            metrics::counter!("impressions.discarded").increment(1);
            trace!(product_id = product_id, duration_ms = duration.as_millis() as u64, "exposure too short, discarded");
            return None;
        }

        metrics::counter!("impressions.queued").increment(1);
        state.queue.push(Impression {
            product_id: product_id.to_string(),
            duration_ms: duration.as_millis() as u64,
            visibility_ratio: visible.peak_ratio,
            timestamp: Utc::now(),
        });

        if state.queue.len() >= self.config.batch_size {
            return Self::take_batch(state);
        }
        if state.timer.is_none() {
            state.timer_generation += 1;
            state.timer = self.schedule_flush(state.timer_generation);
        }
        None
    }

    fn schedule_flush(self: &Arc<Self>, generation: u64) -> Option<JoinHandle<()>> {
        let interval = Duration::from_millis(self.config.flush_interval_ms);
        let weak: Weak<Self> = Arc::downgrade(self);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => Some(handle.spawn(async move {
                tokio::time::sleep(interval).await;
                if let Some(inner) = weak.upgrade() {
                    inner.timer_fired(generation);
                }
            })),
            Err(e) => {
                warn!(error = %e, "no Tokio runtime, impressions wait for size flush");
                None
            }
        }
    }

    fn timer_fired(&self, generation: u64) {
        let batch = {
            let mut state = self.state.lock();
            if state.timer.is_none() || state.timer_generation != generation {
                // Woke after a size flush or manual flush already took its batch.
                trace!(generation = generation, "ignoring stale impression timer");
                return;
            }
            // This task is the timer; clear it rather than abort ourselves.
            state.timer = None;
            Self::take_batch(&mut state)
        };
        if let Some(impressions) = batch {
            debug!(count = impressions.len(), "impression flush interval elapsed");
            self.send(impressions);
        }
    }

    /// Empty the queue and cancel the timer. The queue is cleared whether or
    /// not the delivery later succeeds.
    fn take_batch(state: &mut BatchState) -> Option<Vec<Impression>> {
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        if state.queue.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut state.queue))
    }

    fn send(&self, impressions: Vec<Impression>) {
        let count = impressions.len();
        let batch = ImpressionBatch {
            impressions,
            session_id: self.sessions.get_or_create_session_id(),
        };
        metrics::counter!("impressions.flushed").increment(count as u64);
        debug!(count = count, session_id = %batch.session_id, "flushing impression batch");
        self.dispatcher.dispatch(Delivery::Impressions(batch));
    }
}
