//! Pending connect callbacks.

use std::fmt;
use std::sync::Arc;

use crate::error::SetupError;
use crate::peer::PeerIdentity;
use crate::session::{ExchangeManager, SessionHandle};

/// Callback invoked when the session is ready.
pub type SuccessCallback = Box<dyn FnOnce(Arc<ExchangeManager>, SessionHandle) + Send>;

/// Callback invoked when session setup fails.
pub type FailureCallback = Box<dyn FnOnce(PeerIdentity, SetupError) + Send>;

/// Callbacks queued by callers awaiting an in-flight setup.
///
/// Two ordered collections, one pair pushed per caller. Fan-out is strict
/// FIFO in registration order; each entry is `FnOnce`, so a callback cannot
/// fire twice. On a given outcome the opposite collection is dropped
/// unfired.
#[derive(Default)]
pub struct PendingCallbacks {
    on_success: Vec<SuccessCallback>,
    on_failure: Vec<FailureCallback>,
}

impl PendingCallbacks {
    /// Create an empty callback set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one caller's callback pair.
    pub fn enqueue(&mut self, on_success: SuccessCallback, on_failure: FailureCallback) {
        self.on_success.push(on_success);
        self.on_failure.push(on_failure);
    }

    /// Number of callers waiting.
    pub fn len(&self) -> usize {
        self.on_success.len()
    }

    /// Check whether any callers are waiting.
    pub fn is_empty(&self) -> bool {
        self.on_success.is_empty()
    }

    /// Deliver the established session to every waiting caller, in
    /// registration order.
    pub fn notify_success(&mut self, exchange: &Arc<ExchangeManager>, session: &SessionHandle) {
        self.on_failure.clear();
        for callback in self.on_success.drain(..) {
            callback(exchange.clone(), session.clone());
        }
    }

    /// Deliver the failure to every waiting caller, in registration order.
    pub fn notify_failure(&mut self, peer: PeerIdentity, error: SetupError) {
        self.on_success.clear();
        for callback in self.on_failure.drain(..) {
            callback(peer, error.clone());
        }
    }
}

impl fmt::Debug for PendingCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCallbacks")
            .field("waiting", &self.len())
            .finish()
    }
}
