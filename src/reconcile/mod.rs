//! Reconciliation of ledger payments with off-chain transactions
//!
//! Observed payments are matched against SEP-31, SEP-24 and SEP-6 transactions waiting for funds.
//! A match is recorded on the transaction and the anchor platform is asked to move it forward.

/// Payment to transaction matching
pub mod dispatcher;
/// Platform notifications
pub mod notifier;
/// SEP transactions and their stores
pub mod store;

pub use dispatcher::{PaymentDispatcher, validate};
pub use notifier::{NotifyError, PlatformApiClient, PlatformNotifier};
pub use store::{MemoryTransactionStore, SepProtocol, SepTransaction, TransactionStore};
