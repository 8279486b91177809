//! Progress tracking for the payment observer.
//!
//! Tracks the latest ledger read from the backend and the latest ledger whose payments were fully
//! handled, along with event counts and the last handled event id.

use tracing::info;

/// Ledgers between two periodic progress log lines.
const LOG_INTERVAL_LEDGERS: u64 = 1000;

#[derive(Debug, Clone, Default)]
pub struct ObserverProgressTracker {
    /// The highest ledger seen on the feed
    latest_block_read: u64,
    /// The highest ledger whose events were handed to every listener
    latest_block_processed: u64,
    /// Events delivered to the listeners
    events_processed: usize,
    last_event_id: Option<String>,
    last_logged_block: u64,
}

impl ObserverProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_read(&mut self, ledger: u64) {
        self.latest_block_read = self.latest_block_read.max(ledger);
    }

    pub fn record_processed(&mut self, ledger: u64, event_id: &str) {
        self.record_read(ledger);
        self.latest_block_processed = self.latest_block_processed.max(ledger);
        self.events_processed += 1;
        self.last_event_id = Some(event_id.to_string());
    }

    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Log progress every [`LOG_INTERVAL_LEDGERS`] ledgers or when forced
    pub fn log_progress(&mut self, force: bool) {
        let since_last_log = self
            .latest_block_processed
            .saturating_sub(self.last_logged_block);
        if force || since_last_log >= LOG_INTERVAL_LEDGERS {
            info!("Observer progress: {}", self.get_stats().summary());
            self.last_logged_block = self.latest_block_processed;
        }
    }

    pub fn get_stats(&self) -> ObserverStats {
        ObserverStats {
            latest_block_read: self.latest_block_read,
            latest_block_processed: self.latest_block_processed,
            events_processed: self.events_processed,
        }
    }
}

/// Snapshot of observer progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserverStats {
    pub latest_block_read: u64,
    pub latest_block_processed: u64,
    pub events_processed: usize,
}

impl ObserverStats {
    pub fn summary(&self) -> String {
        format!(
            "read up to ledger {}, processed up to ledger {}: {} payments",
            self.latest_block_read, self.latest_block_processed, self.events_processed
        )
    }
}
