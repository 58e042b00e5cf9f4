//! Non-blocking delivery pipeline. Tracking calls `try_send` into a bounded
//! channel; a background worker hands each payload to the transport in its
//! own task so a hung request never holds up the next one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::transport::{Delivery, Transport};

/// Shared sending side of the pipeline, plus worker lifecycle.
pub struct Dispatcher {
    sender: mpsc::Sender<Delivery>,
    receiver: Mutex<Option<mpsc::Receiver<Delivery>>>,
    transport: Arc<dyn Transport>,
    open: AtomicBool,
    shutdown: Arc<Notify>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            transport,
            open: AtomicBool::new(false),
            shutdown: Arc::new(Notify::new()),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the background worker. Returns false when already started,
    /// already stopped, or when called outside a Tokio runtime.
    pub fn start(&self) -> bool {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                warn!(error = %e, "tracking dispatcher needs a Tokio runtime, not started");
                return false;
            }
        };
        let Some(receiver) = self.receiver.lock().take() else {
            debug!("tracking dispatcher already started");
            return false;
        };

        let worker = DeliveryWorker {
            transport: self.transport.clone(),
        };
        let shutdown = self.shutdown.clone();
        self.open.store(true, Ordering::SeqCst);
        *self.worker.lock() = Some(handle.spawn(worker.run(receiver, shutdown)));

        info!("tracking dispatcher started");
        true
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Queue a delivery without waiting. Returns whether it was accepted.
    pub fn dispatch(&self, delivery: Delivery) -> bool {
        if !self.is_open() {
            debug!(kind = delivery.kind(), "tracking dispatcher not running, delivery dropped");
            return false;
        }
        let kind = delivery.kind();
        match self.sender.try_send(delivery) {
            Ok(()) => {
                metrics::counter!("tracking.queued", "kind" => kind).increment(1);
                true
            }
            Err(e) => {
                metrics::counter!("tracking.dropped", "kind" => kind).increment(1);
                warn!(kind = kind, "tracking delivery dropped: {}", e);
                false
            }
        }
    }

    /// Stop accepting deliveries and give queued and in-flight ones up to
    /// `grace` to reach the transport. Whatever is still pending afterwards
    /// is abandoned.
    pub async fn shutdown(&self, grace: Duration) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown.notify_one();

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if tokio::time::timeout(grace, worker).await.is_err() {
                warn!(grace_ms = grace.as_millis() as u64, "tracking deliveries still pending at shutdown, abandoning");
            }
        }
        info!("tracking dispatcher stopped");
    }
}

/// Background worker that owns the receiving side.
struct DeliveryWorker {
    transport: Arc<dyn Transport>,
}

impl DeliveryWorker {
    async fn run(self, mut receiver: mpsc::Receiver<Delivery>, shutdown: Arc<Notify>) {
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                maybe = receiver.recv() => match maybe {
                    Some(delivery) => self.spawn_delivery(&mut in_flight, delivery),
                    None => break,
                },
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
                _ = shutdown.notified() => {
                    receiver.close();
                    while let Some(delivery) = receiver.recv().await {
                        self.spawn_delivery(&mut in_flight, delivery);
                    }
                    break;
                }
            }
        }

        while in_flight.join_next().await.is_some() {}
    }

    fn spawn_delivery(&self, in_flight: &mut JoinSet<()>, delivery: Delivery) {
        let transport = self.transport.clone();
        in_flight.spawn(deliver(transport, delivery));
    }
}

/// One delivery attempt. Failures are logged and counted, never retried.
async fn deliver(transport: Arc<dyn Transport>, delivery: Delivery) {
    let kind = delivery.kind();
    match transport.send(&delivery).await {
        Ok(()) => {
            metrics::counter!("tracking.sent", "kind" => kind).increment(1);
        }
        Err(e) => {
            metrics::counter!("tracking.failed", "kind" => kind).increment(1);
            warn!(kind = kind, status = ?e.status(), error = %e, "tracking delivery failed (non-critical)");
        }
    }
}
