//! Payment listener fan-out.
//!
//! The observer hands every accepted [`PaymentTransferEvent`] to its registered listeners, in
//! registration order. Unlike a best-effort event bus, the first failing listener stops the
//! fan-out and the error is returned, so the observer can hold the cursor and redeliver the event
//! after backing off.

use crate::ledger::PaymentTransferEvent;
use std::sync::Arc;

/// Errors raised by payment listeners.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Notification error: {0}")]
    NotifyError(String),

    #[error("Listener {listener} failed: {source}")]
    Failed {
        listener: &'static str,
        #[source]
        source: Box<ListenerError>,
    },
}

/// Trait for consumers of observed payments.
#[async_trait::async_trait]
pub trait PaymentListener: Send + Sync {
    /// Handle one payment. An error makes the observer redeliver the event later.
    async fn on_received(&self, event: &PaymentTransferEvent) -> Result<(), ListenerError>;

    /// Get the name of this listener for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// Ordered, fail-fast set of payment listeners.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    listeners: Vec<Arc<dyn PaymentListener>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    /// Register a listener. Listeners are called in the order they are registered.
    pub fn register_listener(&mut self, listener: Arc<dyn PaymentListener>) {
        self.listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Dispatch an event to every listener, stopping at the first failure.
    pub async fn dispatch(&self, event: &PaymentTransferEvent) -> Result<(), ListenerError> {
        for listener in &self.listeners {
            if let Err(e) = listener.on_received(event).await {
                tracing::error!(
                    "Listener {} failed to process payment {}: {}",
                    listener.name(),
                    event.operation_id,
                    e
                );
                return Err(ListenerError::Failed {
                    listener: listener.name(),
                    source: Box::new(e),
                });
            }
        }
        Ok(())
    }
}
