// Session authentication state as observed through service call outcomes.
//
// The core never manages credentials. It only watches for `Unauthorized`
// failures and flips a watch channel so the UI can redirect to sign-in.

use std::sync::Arc;

use snapfeed_common::ServiceError;
use tokio::sync::watch;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// No call has been rejected for authorization yet.
    SignedIn,
    /// A call was rejected; the session must re-authenticate.
    Expired { reason: String },
}

impl AuthState {
    pub fn is_expired(&self) -> bool {
        matches!(self, Self::Expired { .. })
    }
}

/// Shared observer of authorization failures. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AuthMonitor {
    tx: Arc<watch::Sender<AuthState>>,
}

impl Default for AuthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthMonitor {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(AuthState::SignedIn);
        Self { tx: Arc::new(tx) }
    }

    /// Inspect a service failure. Returns true when it expired the session.
    pub fn report(&self, error: &ServiceError) -> bool {
        if !error.is_unauthorized() {
            return false;
        }
        let reason = error.message().to_string();
        self.tx.send_if_modified(|state| {
            if state.is_expired() {
                return false;
            }
            warn!(reason = %reason, "session rejected by content service");
            *state = AuthState::Expired { reason: reason.clone() };
            true
        });
        true
    }

    /// Mark the session valid again (after the user re-authenticates).
    pub fn reset(&self) {
        self.tx.send_if_modified(|state| {
            let changed = state.is_expired();
            *state = AuthState::SignedIn;
            changed
        });
    }

    pub fn state(&self) -> AuthState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.tx.subscribe()
    }
}
