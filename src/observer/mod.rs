//! Payment Observer Module
//!
//! This module provides the logic that keeps a resilient, resumable feed of ledger payments
//! flowing into the anchor. It is composed of several submodules, each responsible for a specific
//! aspect of observation:
//!
//! - `orchestrator`: The `PaymentObserver`, which runs a streamer and owns the lifecycle, recovery and health.
//! - `strategies`: Backend streamers (Horizon SSE, Stellar RPC polling) and the sink they report to.
//! - `events`: The payment listener trait and the ordered, fail-fast fan-out.
//! - `status`: Observer states and the allowed transitions between them.
//! - `backoff`: Pure exponential backoff and a cancellable wait.
//! - `cursor`: Cursor persistence per backend.
//! - `accounts`: The watched-account registry used to filter ledger traffic.
//! - `progress_tracker`: Latest ledger read/processed metrics.
//!
//! The cursor only ever advances after every listener accepted an event, so any failure leads to
//! redelivery rather than loss.

/// Watched account registry
pub mod accounts;
/// Exponential backoff and cancellable waits
pub mod backoff;
/// Cursor persistence
pub mod cursor;
/// Payment listeners and fan-out
pub mod events;
/// Main coordinator for payment observation
pub mod orchestrator;
/// Tracks observer progress and statistics
pub mod progress_tracker;
/// Observer lifecycle states
pub mod status;
/// Backend streamers
pub mod strategies;
/// Observer error and health types
pub mod types;

pub use orchestrator::*;
pub use types::*;
