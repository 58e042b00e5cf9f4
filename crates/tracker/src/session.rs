//! Session management: the browsing session id and its start/end signals.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use freshcart_core::storage::{keys, KeyValueStore};
use freshcart_core::types::TrackedEvent;

use crate::dispatch::Dispatcher;
use crate::identity::IdentityResolver;
use crate::transport::Delivery;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
}

pub struct SessionManager {
    store: Arc<dyn KeyValueStore>,
    identity: Arc<IdentityResolver>,
    dispatcher: Arc<Dispatcher>,
    user_agent: String,
    started_at: Mutex<DateTime<Utc>>,
    start_sent: AtomicBool,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        identity: Arc<IdentityResolver>,
        dispatcher: Arc<Dispatcher>,
        user_agent: String,
    ) -> Self {
        Self {
            store,
            identity,
            dispatcher,
            user_agent,
            started_at: Mutex::new(Utc::now()),
            start_sent: AtomicBool::new(false),
        }
    }

    /// Read the persisted session id, creating and persisting one if absent.
    pub fn get_or_create_session_id(&self) -> String {
        if let Some(existing) = self.store.get(keys::SESSION_ID).filter(|s| !s.is_empty()) {
            return existing;
        }
        let session_id = generate_session_id();
        if let Err(e) = self.store.set(keys::SESSION_ID, &session_id) {
            warn!(error = %e, "failed to persist session id, using it for this run only");
        }
        debug!(session_id = %session_id, "created tracking session id");
        session_id
    }

    pub fn session(&self) -> Session {
        Session {
            session_id: self.get_or_create_session_id(),
            started_at: *self.started_at.lock(),
        }
    }

    /// Schedule `session_start` once, after `delay`, so an in-progress
    /// sign-in can settle first. Later calls are ignored.
    pub fn start(self: &Arc<Self>, delay: Duration) {
        if self.start_sent.swap(true, Ordering::SeqCst) {
            debug!("session_start already scheduled");
            return;
        }
        *self.started_at.lock() = Utc::now();

        let manager = Arc::clone(self);
        let spawned = tokio::runtime::Handle::try_current().map(|handle| {
            handle.spawn(async move {
                tokio::time::sleep(delay).await;
                let data = json!({ "user_agent": manager.user_agent });
                if manager.annotate("start", data) {
                    info!(session_id = %manager.get_or_create_session_id(), "session started");
                }
            })
        });
        if let Err(e) = spawned {
            warn!(error = %e, "cannot schedule session_start outside a Tokio runtime");
        }
    }

    /// Best-effort `session_end`, carrying the session length.
    pub fn end(&self) {
        let started_at = *self.started_at.lock();
        let duration_seconds = (Utc::now() - started_at).num_seconds().max(0);
        self.annotate("end", json!({ "duration_seconds": duration_seconds }));
    }

    /// Emit a `session_<action>` event carrying the session context plus
    /// `extra`. Returns whether it was queued.
    pub fn annotate(&self, action: &str, extra: Value) -> bool {
        let event = self.session_event(action, extra);
        self.dispatcher.dispatch(Delivery::Event(event))
    }

    pub fn session_event(&self, action: &str, extra: Value) -> TrackedEvent {
        let session_id = self.get_or_create_session_id();
        let identity = self.identity.resolve(&session_id);

        let now = Utc::now();
        let mut data = Map::new();
        data.insert("timestamp".into(), json!(now.to_rfc3339()));
        data.insert("user_type".into(), json!(identity.user_type()));
        match extra {
            Value::Object(fields) => data.extend(fields),
            Value::Null => {}
            other => {
                data.insert("value".into(), other);
            }
        }

        TrackedEvent {
            user_id: identity.user_id().map(str::to_string),
            session_id,
            event_type: format!("session_{action}"),
            product_id: None,
            data: Value::Object(data),
            timestamp: now,
        }
    }
}

/// Millisecond clock in base 36 followed by random base-36 digits.
pub fn generate_session_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let entropy: u64 = rand::thread_rng().gen();
    format!("{}{}", to_base36(millis), to_base36(entropy))
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::with_capacity(13);
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::capture_transport;
    use freshcart_core::MemoryStore;

    fn manager(store: Arc<MemoryStore>) -> SessionManager {
        let identity = Arc::new(IdentityResolver::new(store.clone()));
        let dispatcher = Arc::new(Dispatcher::new(capture_transport(), 8));
        SessionManager::new(store, identity, dispatcher, "test-agent".into())
    }

    #[test]
    fn test_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }

    #[test]
    fn test_session_id_is_stable_once_created() {
        let store = MemoryStore::shared();
        let sessions = manager(store.clone());

        let first = sessions.get_or_create_session_id();
        assert!(!first.is_empty());
        assert_eq!(store.get(keys::SESSION_ID).as_deref(), Some(first.as_str()));
        for _ in 0..5 {
            assert_eq!(sessions.get_or_create_session_id(), first);
        }

        // A second manager over the same storage sees the same session.
        assert_eq!(manager(store).get_or_create_session_id(), first);
    }

    #[test]
    fn test_generated_ids_differ() {
        let ids: std::collections::HashSet<String> = (0..100).map(|_| generate_session_id()).collect();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn test_session_event_shape() {
        let store = MemoryStore::shared();
        let sessions = manager(store.clone());

        let anon = sessions.session_event("page_view", json!({ "page": "/cart" }));
        assert_eq!(anon.event_type, "session_page_view");
        assert_eq!(anon.user_id, None);
        assert_eq!(anon.data["user_type"], "anonymous");
        assert_eq!(anon.data["page"], "/cart");

        store.set(keys::USER_EMAIL, "ann@example.com").unwrap();
        let signed_in = sessions.session_event("end", Value::Null);
        assert_eq!(signed_in.user_id.as_deref(), Some("ann@example.com"));
        assert_eq!(signed_in.data["user_type"], "logged_in");
        assert_eq!(signed_in.session_id, anon.session_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_sends_session_start_once() {
        let store = MemoryStore::shared();
        let transport = capture_transport();
        let dispatcher = Arc::new(Dispatcher::new(transport.clone(), 8));
        dispatcher.start();
        let identity = Arc::new(IdentityResolver::new(store.clone()));
        let sessions = Arc::new(SessionManager::new(store, identity, dispatcher.clone(), "test-agent".into()));

        sessions.start(Duration::from_millis(100));
        sessions.start(Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(transport.events_of_type("session_start").is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        sessions.start(Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(200)).await;
        dispatcher.shutdown(Duration::from_secs(1)).await;

        let starts = transport.events_of_type("session_start");
        assert_eq!(starts.len(), 1);
        assert_eq!(starts[0].data["user_agent"], "test-agent");
        assert_eq!(starts[0].data["user_type"], "anonymous");
    }
}
