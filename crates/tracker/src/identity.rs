//! Identity resolution: who the current shopper is, read from persisted
//! state on every call so sign-in and sign-out show up immediately.

use std::sync::Arc;

use tracing::trace;

use freshcart_core::storage::{keys, read_json, KeyValueStore};
use freshcart_core::types::{GuestRecord, Identity};

pub struct IdentityResolver {
    store: Arc<dyn KeyValueStore>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Signed-in email, then guest record, then anonymous.
    pub fn resolve(&self, session_id: &str) -> Identity {
        if let Some(email) = self.signed_in_email() {
            trace!(user = %email, "resolved signed-in identity");
            return Identity::Authenticated { email };
        }

        if let Some(guest) = read_json::<GuestRecord>(self.store.as_ref(), keys::GUEST_USER) {
            if let Some(guest_id) = guest.guest_id.clone().filter(|id| !id.is_empty()) {
                trace!(guest_id = %guest_id, "resolved guest identity");
                return Identity::Guest {
                    guest_id,
                    name: guest.name,
                    email: guest.email,
                };
            }
            // Older guest records carry only an email; its local part is the id.
            if let Some(prefix) = guest
                .email
                .as_deref()
                .and_then(|e| e.split('@').next())
                .filter(|p| !p.is_empty())
            {
                return Identity::Guest {
                    guest_id: prefix.to_string(),
                    name: guest.name.clone(),
                    email: guest.email.clone(),
                };
            }
        }

        Identity::Anonymous {
            session_id: session_id.to_string(),
        }
    }

    fn signed_in_email(&self) -> Option<String> {
        self.store
            .get(keys::USER_EMAIL)
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty() && e != "null")
    }
}
