//!
//! Downstream notifications.
//!
//! Matched payments are reported to the anchor platform, which owns the transaction state
//! machine. The platform speaks JSON-RPC 2.0 in batches; one request is sent per notification.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

const NOTIFY_ONCHAIN_FUNDS_RECEIVED: &str = "notify_onchain_funds_received";
const NOTIFY_ONCHAIN_FUNDS_SENT: &str = "notify_onchain_funds_sent";

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
	#[error("HTTP error: {0}")]
	HttpError(#[from] reqwest::Error),

	#[error("Platform RPC error {code}: {message}")]
	RpcError { code: i64, message: String },

	#[error("Invalid platform response: {0}")]
	InvalidResponse(String),
}

/// Requests the next status of a matched transaction.
#[async_trait]
pub trait PlatformNotifier: Send + Sync {
	/// The user's payment to the anchor arrived.
	async fn notify_onchain_funds_received(
		&self,
		transaction_id: &str,
		stellar_transaction_id: &str,
		amount: &str,
		message: &str,
	) -> Result<(), NotifyError>;

	/// The anchor's payment to the user landed.
	async fn notify_onchain_funds_sent(
		&self,
		transaction_id: &str,
		stellar_transaction_id: &str,
		message: &str,
	) -> Result<(), NotifyError>;
}

#[derive(Debug, Serialize)]
struct AmountParam<'a> {
	amount: &'a str,
}

#[derive(Debug, Serialize)]
struct NotifyParams<'a> {
	transaction_id: &'a str,
	message: &'a str,
	stellar_transaction_id: &'a str,
	#[serde(skip_serializing_if = "Option::is_none")]
	amount_in: Option<AmountParam<'a>>,
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
	jsonrpc: &'static str,
	id: String,
	method: &'static str,
	params: NotifyParams<'a>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
	#[serde(default)]
	error: Option<RpcResponseError>,
}

#[derive(Debug, Deserialize)]
struct RpcResponseError {
	code: i64,
	message: String,
}

/// Platform API client
pub struct PlatformApiClient {
	http_client: Client,
	platform_url: String,
	request_id: AtomicU64,
}

impl PlatformApiClient {
	/// Create a new platform client.
	///
	/// # Arguments
	/// * `platform_url` - The platform JSON-RPC endpoint.
	pub fn new(platform_url: String) -> Result<Self, NotifyError> {
		let http_client = Client::builder()
			.timeout(Duration::from_secs(30))
			.build()?;

		Ok(Self {
			http_client,
			platform_url,
			request_id: AtomicU64::new(1),
		})
	}

	async fn send(&self, method: &'static str, params: NotifyParams<'_>) -> Result<(), NotifyError> {
		let request = RpcRequest {
			jsonrpc: "2.0",
			id: self.request_id.fetch_add(1, Ordering::Relaxed).to_string(),
			method,
			params,
		};
		debug!(
			"Calling {} for transaction {}",
			method, request.params.transaction_id
		);

		let response = self
			.http_client
			.post(&self.platform_url)
			.json(&[&request])
			.send()
			.await?;

		if !response.status().is_success() {
			return Err(NotifyError::RpcError {
				code: i64::from(response.status().as_u16()),
				message: format!("HTTP error: {}", response.status()),
			});
		}

		let responses: Vec<RpcResponse> = response.json().await?;
		let first = responses
			.into_iter()
			.next()
			.ok_or_else(|| NotifyError::InvalidResponse("empty batch response".into()))?;
		match first.error {
			Some(error) => Err(NotifyError::RpcError {
				code: error.code,
				message: error.message,
			}),
			None => Ok(()),
		}
	}
}

#[async_trait]
impl PlatformNotifier for PlatformApiClient {
	async fn notify_onchain_funds_received(
		&self,
		transaction_id: &str,
		stellar_transaction_id: &str,
		amount: &str,
		message: &str,
	) -> Result<(), NotifyError> {
		self.send(
			NOTIFY_ONCHAIN_FUNDS_RECEIVED,
			NotifyParams {
				transaction_id,
				message,
				stellar_transaction_id,
				amount_in: Some(AmountParam { amount }),
			},
		)
		.await
	}

	async fn notify_onchain_funds_sent(
		&self,
		transaction_id: &str,
		stellar_transaction_id: &str,
		message: &str,
	) -> Result<(), NotifyError> {
		self.send(
			NOTIFY_ONCHAIN_FUNDS_SENT,
			NotifyParams {
				transaction_id,
				message,
				stellar_transaction_id,
				amount_in: None,
			},
		)
		.await
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_request_shape() {
		let request = RpcRequest {
			jsonrpc: "2.0",
			id: "7".into(),
			method: NOTIFY_ONCHAIN_FUNDS_RECEIVED,
			params: NotifyParams {
				transaction_id: "tx-1",
				message: "Funds received from user",
				stellar_transaction_id: "abc",
				amount_in: Some(AmountParam { amount: "10.5" }),
			},
		};
		let value = serde_json::to_value([&request]).unwrap();
		assert_eq!(
			value,
			serde_json::json!([{
				"jsonrpc": "2.0",
				"id": "7",
				"method": "notify_onchain_funds_received",
				"params": {
					"transaction_id": "tx-1",
					"message": "Funds received from user",
					"stellar_transaction_id": "abc",
					"amount_in": { "amount": "10.5" }
				}
			}])
		);
	}

	#[test]
	fn test_funds_sent_omits_amount() {
		let params = NotifyParams {
			transaction_id: "tx-2",
			message: "Funds sent to user",
			stellar_transaction_id: "def",
			amount_in: None,
		};
		let value = serde_json::to_value(&params).unwrap();
		assert!(value.get("amount_in").is_none());
	}
}
