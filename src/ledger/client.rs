//!
//! Backend-neutral ledger access.
//!
//! Both the Horizon and the Stellar RPC clients implement [`LedgerClient`], so the observer and
//! the reconciliation layer never depend on which backend is configured.

use async_trait::async_trait;
use backoff::{ExponentialBackoff, future::retry};
use std::time::Duration;
use tracing::debug;

use super::types::{Asset, AccountInfo, LedgerError, LedgerTransaction, SubmitTransactionResult};

/// Uniform account and transaction access over either ledger backend.
#[async_trait]
pub trait LedgerClient: Send + Sync {
	/// Fetch an account with its balances.
	async fn get_account(&self, account_id: &str) -> Result<AccountInfo, LedgerError>;

	/// Fetch a transaction by hash.
	///
	/// # Returns
	/// `Ok(None)` when the backend does not know the transaction (yet). Backend failures are
	/// returned as errors.
	async fn get_transaction(&self, hash: &str) -> Result<Option<LedgerTransaction>, LedgerError>;

	/// Submit a signed base64 transaction envelope.
	async fn submit_transaction(
		&self,
		envelope_xdr: &str,
	) -> Result<SubmitTransactionResult, LedgerError>;

	/// Whether `account_id` can hold `asset`. Native is always held.
	async fn has_trustline(&self, account_id: &str, asset: &Asset) -> Result<bool, LedgerError>;

	/// Name of the backend for logging and diagnostics.
	fn name(&self) -> &'static str;
}

/// Retry budget for [`wait_for_transaction_available`].
pub fn transaction_wait_policy() -> ExponentialBackoff {
	ExponentialBackoff {
		initial_interval: Duration::from_millis(500),
		max_interval: Duration::from_secs(5),
		max_elapsed_time: Some(Duration::from_secs(30)),
		..ExponentialBackoff::default()
	}
}

/// Poll `get_transaction` until the transaction shows up.
///
/// A transaction referenced by a fresh event may not be indexed yet, so both "not found" and
/// backend errors are retried with exponential backoff until the policy gives up.
///
/// # Errors
/// The last backend error, or [`LedgerError::TransactionNotFound`] if it never appeared.
pub async fn wait_for_transaction_available<C>(
	client: &C,
	hash: &str,
	policy: ExponentialBackoff,
) -> Result<LedgerTransaction, LedgerError>
where
	C: LedgerClient + ?Sized,
{
	retry(policy, move || async move {
		match client.get_transaction(hash).await {
			Ok(Some(transaction)) => Ok(transaction),
			Ok(None) => {
				debug!("Transaction {} not available yet on {}", hash, client.name());
				Err(backoff::Error::transient(LedgerError::TransactionNotFound(
					hash.to_string(),
				)))
			}
			Err(e) => {
				debug!("Failed to fetch transaction {}: {}", hash, e);
				Err(backoff::Error::transient(e))
			}
		}
	})
	.await
}
