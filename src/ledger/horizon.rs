//!
//! Horizon REST + SSE client.
//!
//! Provides REST access to accounts and transactions and a server-sent-events stream of
//! payment operations starting at a paging token. All methods are async and designed for use
//! with Tokio.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use reqwest::{Client, StatusCode, header::ACCEPT};
use serde::Deserialize;
use std::pin::Pin;
use std::time::Duration;
use stellar_xdr::curr::{Limits, ReadXdr, ScVal};
use tracing::{debug, error, info, warn};

use super::address::encode_muxed;
use super::client::LedgerClient;
use super::parser::{RawTransaction, TRANSFER_FUNCTION, parse_transaction};
use super::toid::Toid;
use super::types::*;
use crate::utils::parse_stellar_amount;

/// Page size of Horizon requests. Also the window used to clamp stale cursors.
pub const MAX_RESULTS: u32 = 200;

const INVOKE_CONTRACT_FUNCTION: &str = "HostFunctionTypeHostFunctionTypeInvokeContract";

/// Pinned stream of payment operations decoded from the SSE feed.
pub type OperationStream = Pin<Box<dyn Stream<Item = Result<HorizonOperation, LedgerError>> + Send>>;

/// Horizon REST + SSE client
#[derive(Clone)]
pub struct HorizonClient {
	/// Client for bounded REST requests.
	http_client: Client,
	/// Client for the long-lived event stream, without a total request timeout.
	stream_client: Client,
	/// Base URL of the Horizon server.
	horizon_url: String,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
	#[serde(rename = "_embedded")]
	embedded: Embedded<T>,
}

#[derive(Debug, Deserialize)]
struct Embedded<T> {
	records: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct PagingRecord {
	paging_token: String,
}

/// A payment-stream record as served by `/payments`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct HorizonOperation {
	pub id: String,
	pub paging_token: String,
	pub transaction_hash: String,
	pub source_account: String,
	#[serde(rename = "type")]
	pub type_: String,
	#[serde(default)]
	pub transaction_successful: Option<bool>,
	#[serde(default)]
	pub from: Option<String>,
	#[serde(default)]
	pub to: Option<String>,
	#[serde(default)]
	pub to_muxed: Option<String>,
	#[serde(default)]
	pub to_muxed_id: Option<String>,
	#[serde(default)]
	pub asset_type: Option<String>,
	#[serde(default)]
	pub asset_code: Option<String>,
	#[serde(default)]
	pub asset_issuer: Option<String>,
	#[serde(default)]
	pub amount: Option<String>,
	#[serde(default)]
	pub function: Option<String>,
	#[serde(default)]
	pub parameters: Vec<HostFunctionParameter>,
	#[serde(default)]
	pub asset_balance_changes: Vec<AssetBalanceChange>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct HostFunctionParameter {
	#[serde(rename = "type")]
	pub type_: String,
	/// Base64 XDR `ScVal`.
	pub value: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AssetBalanceChange {
	pub asset_type: String,
	#[serde(default)]
	pub asset_code: Option<String>,
	#[serde(default)]
	pub asset_issuer: Option<String>,
	#[serde(rename = "type")]
	pub type_: String,
	#[serde(default)]
	pub from: Option<String>,
	#[serde(default)]
	pub to: Option<String>,
	pub amount: String,
	#[serde(default)]
	pub destination_muxed_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HorizonTransaction {
	pub hash: String,
	pub ledger: u32,
	pub envelope_xdr: String,
	pub source_account: String,
	pub paging_token: String,
	pub created_at: DateTime<Utc>,
	#[serde(default)]
	pub successful: Option<bool>,
}

impl HorizonTransaction {
	/// Application order inside the ledger, recovered from the paging token TOID.
	pub fn application_order(&self) -> Result<u32, LedgerError> {
		let id: i64 = self.paging_token.parse().map_err(|_| {
			LedgerError::InvalidData(format!("bad paging token {}", self.paging_token))
		})?;
		Ok(Toid::decode(id).transaction_order as u32)
	}

	pub fn to_raw(&self) -> Result<RawTransaction, LedgerError> {
		Ok(RawTransaction {
			hash: self.hash.clone(),
			ledger: self.ledger,
			application_order: self.application_order()?,
			envelope_xdr: self.envelope_xdr.clone(),
			created_at: self.created_at,
		})
	}
}

#[derive(Debug, Deserialize)]
struct HorizonAccount {
	account_id: String,
	sequence: String,
	balances: Vec<HorizonBalance>,
}

#[derive(Debug, Deserialize)]
struct HorizonBalance {
	asset_type: String,
	#[serde(default)]
	asset_code: Option<String>,
	#[serde(default)]
	asset_issuer: Option<String>,
	balance: String,
}

#[derive(Debug, Deserialize)]
struct HorizonSubmitResponse {
	hash: String,
	#[serde(default)]
	successful: Option<bool>,
}

impl HorizonClient {
	/// Create a new Horizon client.
	///
	/// # Arguments
	/// * `horizon_url` - Base URL of the Horizon server.
	///
	/// # Returns
	/// A new `HorizonClient`, or an error if the HTTP clients cannot be built.
	pub fn new(horizon_url: String) -> Result<Self, LedgerError> {
		let http_client = Client::builder()
			.timeout(Duration::from_secs(30))
			.build()?;
		let stream_client = Client::builder()
			.connect_timeout(Duration::from_secs(30))
			.build()?;

		Ok(Self {
			http_client,
			stream_client,
			horizon_url: horizon_url.trim_end_matches('/').to_string(),
		})
	}

	fn url(&self, path: &str) -> String {
		format!("{}/{}", self.horizon_url, path)
	}

	/// Paging token of the most recent payment on the network, if any.
	pub async fn latest_cursor(&self) -> Result<Option<String>, LedgerError> {
		let response = self
			.http_client
			.get(self.url("payments"))
			.query(&[("order", "desc"), ("limit", "1")])
			.send()
			.await?;

		if !response.status().is_success() {
			return Err(LedgerError::HorizonError(format!(
				"HTTP error: {}",
				response.status()
			)));
		}

		let page: Page<PagingRecord> = response.json().await?;
		Ok(page
			.embedded
			.records
			.into_iter()
			.next()
			.map(|record| record.paging_token))
	}

	/// Stream payment operations after `cursor`.
	///
	/// # Arguments
	/// * `cursor` - Paging token to resume after. `"now"` starts at the tip.
	///
	/// # Returns
	/// A pinned async stream of operations. The stream ends when Horizon closes the connection.
	///
	/// # Errors
	/// Returns `LedgerError` if the connection cannot be established.
	pub async fn stream_payments(&self, cursor: &str) -> Result<OperationStream, LedgerError> {
		debug!("Opening payments stream at cursor {}", cursor);
		let limit = MAX_RESULTS.to_string();

		let response = self
			.stream_client
			.get(self.url("payments"))
			.header(ACCEPT, "text/event-stream")
			.query(&[("cursor", cursor), ("order", "asc"), ("limit", limit.as_str())])
			.send()
			.await?;

		if !response.status().is_success() {
			return Err(LedgerError::StreamError(format!(
				"HTTP error: {}",
				response.status()
			)));
		}

		info!("Payments stream connected at cursor {}", cursor);

		let messages = response
			.bytes_stream()
			.scan(SseDecoder::default(), |decoder, chunk| {
				let batch = match chunk {
					Ok(bytes) => decoder.push(&bytes).into_iter().map(Ok).collect::<Vec<_>>(),
					Err(e) => vec![Err(LedgerError::HttpError(e))],
				};
				futures::future::ready(Some(batch))
			})
			.flat_map(futures::stream::iter);

		let stream = messages.filter_map(|message| async move {
			match message {
				Ok(message) => decode_operation_message(&message),
				Err(e) => Some(Err(e)),
			}
		});

		Ok(Box::pin(stream))
	}

	/// Fetch the Horizon view of a transaction.
	pub async fn fetch_transaction(
		&self,
		hash: &str,
	) -> Result<Option<HorizonTransaction>, LedgerError> {
		let response = self
			.http_client
			.get(self.url(&format!("transactions/{}", hash)))
			.send()
			.await?;

		if response.status() == StatusCode::NOT_FOUND {
			return Ok(None);
		}
		if !response.status().is_success() {
			return Err(LedgerError::HorizonError(format!(
				"HTTP error: {}",
				response.status()
			)));
		}

		Ok(Some(response.json().await?))
	}
}

/// The payments feed of a Horizon server, as consumed by the SSE streamer.
#[async_trait]
pub trait PaymentFeed: LedgerClient {
	/// Paging token of the most recent payment on the network, if any.
	async fn latest_cursor(&self) -> Result<Option<String>, LedgerError>;

	/// Stream payment operations after `cursor`.
	async fn stream_payments(&self, cursor: &str) -> Result<OperationStream, LedgerError>;
}

#[async_trait]
impl PaymentFeed for HorizonClient {
	async fn latest_cursor(&self) -> Result<Option<String>, LedgerError> {
		HorizonClient::latest_cursor(self).await
	}

	async fn stream_payments(&self, cursor: &str) -> Result<OperationStream, LedgerError> {
		HorizonClient::stream_payments(self, cursor).await
	}
}

#[async_trait]
impl LedgerClient for HorizonClient {
	async fn get_account(&self, account_id: &str) -> Result<AccountInfo, LedgerError> {
		let response = self
			.http_client
			.get(self.url(&format!("accounts/{}", account_id)))
			.send()
			.await?;

		if !response.status().is_success() {
			return Err(LedgerError::HorizonError(format!(
				"HTTP error {} loading account {}",
				response.status(),
				account_id
			)));
		}

		let account: HorizonAccount = response.json().await?;
		let sequence_number = account
			.sequence
			.parse()
			.map_err(|_| LedgerError::InvalidData(format!("bad sequence {}", account.sequence)))?;

		let mut balances = Vec::with_capacity(account.balances.len());
		for balance in &account.balances {
			balances.push(AccountBalance {
				asset: Asset::from_horizon(
					&balance.asset_type,
					balance.asset_code.as_deref(),
					balance.asset_issuer.as_deref(),
				),
				balance: parse_stellar_amount(&balance.balance)
					.map_err(|e| LedgerError::InvalidData(e.to_string()))?,
			});
		}

		Ok(AccountInfo {
			account_id: account.account_id,
			sequence_number,
			balances,
		})
	}

	async fn get_transaction(&self, hash: &str) -> Result<Option<LedgerTransaction>, LedgerError> {
		match self.fetch_transaction(hash).await? {
			Some(transaction) => Ok(Some(parse_transaction(&transaction.to_raw()?)?)),
			None => Ok(None),
		}
	}

	async fn submit_transaction(
		&self,
		envelope_xdr: &str,
	) -> Result<SubmitTransactionResult, LedgerError> {
		let response = self
			.http_client
			.post(self.url("transactions"))
			.form(&[("tx", envelope_xdr)])
			.send()
			.await?;

		let status = response.status();
		if !status.is_success() {
			let body = response.text().await.unwrap_or_default();
			error!("Horizon rejected transaction: {} {}", status, body);
			return Err(LedgerError::HorizonError(format!(
				"submission failed with {}: {}",
				status, body
			)));
		}

		let submitted: HorizonSubmitResponse = response.json().await?;
		Ok(SubmitTransactionResult {
			hash: submitted.hash,
			status: match submitted.successful {
				Some(false) => "FAILED".to_string(),
				_ => "SUCCESS".to_string(),
			},
		})
	}

	async fn has_trustline(&self, account_id: &str, asset: &Asset) -> Result<bool, LedgerError> {
		if *asset == Asset::Native {
			return Ok(true);
		}
		let account = self.get_account(account_id).await?;
		Ok(account.balances.iter().any(|balance| &balance.asset == asset))
	}

	fn name(&self) -> &'static str {
		"horizon"
	}
}

/// One server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseMessage {
	pub id: Option<String>,
	pub event: Option<String>,
	pub data: String,
}

/// Longest line, and largest event payload, the decoder will hold. Anything bigger is dropped.
pub const MAX_SSE_PENDING_BYTES: usize = 1024 * 1024;

/// Incremental `text/event-stream` decoder.
///
/// Bytes are buffered until a full line is available, so chunk boundaries may fall anywhere,
/// including inside a multi-byte character.
#[derive(Debug, Default)]
pub struct SseDecoder {
	buffer: Vec<u8>,
	/// Set while the rest of an oversized line is being skipped.
	discarding: bool,
	last_event_id: Option<String>,
	event: Option<String>,
	data: Vec<String>,
	data_len: usize,
	/// Set once the current event grew too large. It is dropped when it ends.
	data_overflow: bool,
}

impl SseDecoder {
	/// Feed a chunk and return every message it completes.
	pub fn push(&mut self, chunk: &[u8]) -> Vec<SseMessage> {
		self.buffer.extend_from_slice(chunk);
		let mut messages = Vec::new();

		let mut start = 0;
		while let Some(offset) = self.buffer[start..].iter().position(|b| *b == b'\n') {
			let end = start + offset;
			if self.discarding {
				self.discarding = false;
			} else {
				let line = String::from_utf8_lossy(&self.buffer[start..end]).into_owned();
				if let Some(message) = self.process_line(line.trim_end_matches('\r')) {
					messages.push(message);
				}
			}
			start = end + 1;
		}
		self.buffer.drain(..start);

		if self.buffer.len() > MAX_SSE_PENDING_BYTES {
			warn!(
				"Dropping an SSE line longer than {} bytes",
				MAX_SSE_PENDING_BYTES
			);
			self.buffer.clear();
			self.discarding = true;
		}

		messages
	}

	fn process_line(&mut self, line: &str) -> Option<SseMessage> {
		if line.is_empty() {
			return self.dispatch();
		}
		if line.starts_with(':') {
			return None;
		}

		let (field, value) = match line.split_once(':') {
			Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
			None => (line, ""),
		};
		match field {
			"id" => self.last_event_id = Some(value.to_string()),
			"event" => self.event = Some(value.to_string()),
			"data" if !self.data_overflow => {
				self.data_len += value.len();
				if self.data_len > MAX_SSE_PENDING_BYTES {
					warn!("Dropping an SSE event larger than {} bytes", MAX_SSE_PENDING_BYTES);
					self.data.clear();
					self.data_overflow = true;
				} else {
					self.data.push(value.to_string());
				}
			}
			_ => {}
		}
		None
	}

	fn dispatch(&mut self) -> Option<SseMessage> {
		let event = self.event.take();
		self.data_len = 0;
		if std::mem::take(&mut self.data_overflow) || self.data.is_empty() {
			self.data.clear();
			return None;
		}
		let data = std::mem::take(&mut self.data).join("\n");
		Some(SseMessage {
			id: self.last_event_id.clone(),
			event,
			data,
		})
	}
}

/// Turn an SSE message into an operation. Horizon's `"hello"` and `"byebye"` frames are skipped.
fn decode_operation_message(message: &SseMessage) -> Option<Result<HorizonOperation, LedgerError>> {
	if message.event.as_deref() == Some("open")
		|| message.data == "\"hello\""
		|| message.data == "\"byebye\""
	{
		debug!("Ignoring control frame {}", message.data);
		return None;
	}
	Some(serde_json::from_str::<HorizonOperation>(&message.data).map_err(LedgerError::from))
}

/// Convert a payments-stream record into a ledger operation.
///
/// Returns `Ok(None)` for operation types that do not move funds to an account.
pub fn to_ledger_operation(
	operation: &HorizonOperation,
) -> Result<Option<LedgerOperation>, LedgerError> {
	match operation.type_.as_str() {
		"payment" => Ok(Some(LedgerOperation::Payment(PaymentOperation {
			id: operation.id.clone(),
			source_account: operation.source_account.clone(),
			from: required(&operation.from, "from")?,
			to: destination(operation)?,
			amount: amount(&operation.amount)?,
			asset: operation_asset(operation),
		}))),
		"path_payment_strict_receive" | "path_payment_strict_send" => {
			let kind = if operation.type_ == "path_payment_strict_receive" {
				PathPaymentKind::StrictReceive
			} else {
				PathPaymentKind::StrictSend
			};
			Ok(Some(LedgerOperation::PathPayment(PathPaymentOperation {
				kind,
				id: operation.id.clone(),
				source_account: operation.source_account.clone(),
				from: required(&operation.from, "from")?,
				to: destination(operation)?,
				amount: amount(&operation.amount)?,
				asset: operation_asset(operation),
			})))
		}
		"invoke_host_function" => contract_transfer(operation),
		_ => Ok(None),
	}
}

/// Contract `transfer` invocations are recognized by the invoked function and the symbol in the
/// second parameter. The moved amount and the classic asset come from the balance changes.
fn contract_transfer(operation: &HorizonOperation) -> Result<Option<LedgerOperation>, LedgerError> {
	if operation.function.as_deref() != Some(INVOKE_CONTRACT_FUNCTION) {
		return Ok(None);
	}
	let (Some(contract), Some(function)) = (operation.parameters.first(), operation.parameters.get(1))
	else {
		return Ok(None);
	};
	match ScVal::from_xdr_base64(&function.value, Limits::none())? {
		ScVal::Symbol(symbol) => {
			let name: &[u8] = symbol.0.as_ref();
			if name != TRANSFER_FUNCTION.as_bytes() {
				return Ok(None);
			}
		}
		_ => return Ok(None),
	}
	let contract_id = match ScVal::from_xdr_base64(&contract.value, Limits::none())? {
		ScVal::Address(address) => super::address::sc_address_to_string(&address)?,
		_ => return Ok(None),
	};

	let Some(change) = operation
		.asset_balance_changes
		.iter()
		.find(|change| change.type_ == "transfer")
	else {
		return Ok(None);
	};

	let from = required(&change.from, "from")?;
	let mut to = required(&change.to, "to")?;
	if let Some(id) = &change.destination_muxed_id {
		let id: u64 = id
			.parse()
			.map_err(|_| LedgerError::InvalidData(format!("bad muxed id {}", id)))?;
		to = encode_muxed(&to, id)?;
	}

	let asset = Asset::from_horizon(
		&change.asset_type,
		change.asset_code.as_deref(),
		change.asset_issuer.as_deref(),
	);

	Ok(Some(LedgerOperation::InvokeHostFunction(
		InvokeHostFunctionOperation::new(
			operation.id.clone(),
			operation.source_account.clone(),
			contract_id,
			TRANSFER_FUNCTION.to_string(),
			from,
			to,
			amount(&Some(change.amount.clone()))?,
		)
		.with_asset(asset),
	)))
}

fn required(value: &Option<String>, field: &str) -> Result<String, LedgerError> {
	value
		.clone()
		.ok_or_else(|| LedgerError::InvalidData(format!("missing field {}", field)))
}

fn destination(operation: &HorizonOperation) -> Result<String, LedgerError> {
	match &operation.to_muxed {
		Some(muxed) if !muxed.is_empty() => Ok(muxed.clone()),
		_ => required(&operation.to, "to"),
	}
}

fn amount(value: &Option<String>) -> Result<u128, LedgerError> {
	let value = required(value, "amount")?;
	parse_stellar_amount(&value).map_err(|e| LedgerError::InvalidData(e.to_string()))
}

fn operation_asset(operation: &HorizonOperation) -> Asset {
	Asset::from_horizon(
		operation.asset_type.as_deref().unwrap_or_default(),
		operation.asset_code.as_deref(),
		operation.asset_issuer.as_deref(),
	)
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;
	use stellar_xdr::curr::{ContractId, Hash, ScAddress, ScSymbol, StringM, WriteXdr};

	const FROM: &str = "GBBD47IF6LWK7P7MDEVSCWR7DPUWV3NY3DTQEVFL4NAT4AQH3ZLLFLA5";
	const TO: &str = "GDJJRRMBK4IWLEPJGIE6SXD2LP7REGZODU7WDC3I2D6MR37F4XSHBKX2";

	fn payment_json(asset_type: &str) -> serde_json::Value {
		json!({
			"id": "5299989663745",
			"paging_token": "5299989663745",
			"transaction_hash": "abc",
			"source_account": FROM,
			"type": "payment",
			"from": FROM,
			"to": TO,
			"asset_type": asset_type,
			"asset_code": "USDC",
			"asset_issuer": FROM,
			"amount": "12.5000000"
		})
	}

	#[test]
	fn test_sse_decoder_handles_split_chunks() {
		let mut decoder = SseDecoder::default();
		assert!(decoder.push(b"retry: 1000\nevent: open\ndata: \"hel").is_empty());
		let first = decoder.push(b"lo\"\n\nid: 12");
		assert_eq!(first.len(), 1);
		assert_eq!(first[0].data, "\"hello\"");
		assert_eq!(first[0].event.as_deref(), Some("open"));

		let second = decoder.push(b"3\ndata: {\"a\":1}\r\n\r\n");
		assert_eq!(
			second,
			vec![SseMessage {
				id: Some("123".to_string()),
				event: None,
				data: "{\"a\":1}".to_string(),
			}]
		);
	}

	#[test]
	fn test_sse_decoder_handles_many_events_per_chunk() {
		let mut decoder = SseDecoder::default();
		let messages = decoder.push(b": keepalive\ndata: 1\n\ndata: 2\n\ndata: 3\n\ndata: 4");
		let data: Vec<&str> = messages.iter().map(|m| m.data.as_str()).collect();
		assert_eq!(data, vec!["1", "2", "3"]);
		assert_eq!(decoder.push(b"\n\n")[0].data, "4");
	}

	#[test]
	fn test_sse_decoder_drops_oversized_lines() {
		let mut decoder = SseDecoder::default();
		let mut chunk = b"data: ".to_vec();
		chunk.extend(std::iter::repeat_n(b'x', MAX_SSE_PENDING_BYTES + 1));
		assert!(decoder.push(&chunk).is_empty());
		assert!(decoder.buffer.is_empty());

		// The tail of the oversized line is skipped too.
		assert!(decoder.push(b"xxxx\n\n").is_empty());
		let messages = decoder.push(b"data: {\"b\":2}\n\n");
		assert_eq!(messages.len(), 1);
		assert_eq!(messages[0].data, "{\"b\":2}");
	}

	#[test]
	fn test_sse_decoder_drops_oversized_events() {
		let mut decoder = SseDecoder::default();
		let line = format!("data: {}\n", "y".repeat(MAX_SSE_PENDING_BYTES / 2 + 1));
		assert!(decoder.push(line.as_bytes()).is_empty());
		assert!(decoder.push(line.as_bytes()).is_empty());
		assert!(decoder.push(line.as_bytes()).is_empty());
		assert!(decoder.push(b"\n").is_empty());
		assert_eq!(decoder.push(b"data: ok\n\n")[0].data, "ok");
	}

	#[test]
	fn test_control_frames_are_skipped() {
		let hello = SseMessage {
			id: None,
			event: Some("open".into()),
			data: "\"hello\"".into(),
		};
		assert!(decode_operation_message(&hello).is_none());
		let bye = SseMessage {
			id: None,
			event: None,
			data: "\"byebye\"".into(),
		};
		assert!(decode_operation_message(&bye).is_none());
	}

	#[test]
	fn test_payment_record_conversion() {
		let record: HorizonOperation =
			serde_json::from_value(payment_json("credit_alphanum4")).unwrap();
		let op = to_ledger_operation(&record).unwrap().unwrap();
		assert_eq!(op.id(), "5299989663745");
		assert_eq!(op.to(), TO);
		assert_eq!(op.amount(), 125_000_000);
		assert_eq!(op.asset().unwrap(), &Asset::credit("USDC", FROM));
	}

	#[test]
	fn test_muxed_destination_preferred() {
		let mut value = payment_json("native");
		let muxed = encode_muxed(TO, 7).unwrap();
		value["to_muxed"] = json!(muxed);
		value["to_muxed_id"] = json!("7");
		let record: HorizonOperation = serde_json::from_value(value).unwrap();
		let op = to_ledger_operation(&record).unwrap().unwrap();
		assert_eq!(op.to(), muxed);
	}

	#[test]
	fn test_unsupported_asset_is_kept_as_unsupported() {
		let record: HorizonOperation =
			serde_json::from_value(payment_json("liquidity_pool_shares")).unwrap();
		let op = to_ledger_operation(&record).unwrap().unwrap();
		assert!(!op.asset().unwrap().is_supported());
	}

	#[test]
	fn test_contract_transfer_record() {
		let contract = ScVal::Address(ScAddress::Contract(ContractId(Hash([3u8; 32]))))
			.to_xdr_base64(Limits::none())
			.unwrap();
		let function = ScVal::Symbol(ScSymbol(StringM::try_from("transfer").unwrap()))
			.to_xdr_base64(Limits::none())
			.unwrap();
		let record: HorizonOperation = serde_json::from_value(json!({
			"id": "77",
			"paging_token": "77",
			"transaction_hash": "def",
			"source_account": FROM,
			"type": "invoke_host_function",
			"function": INVOKE_CONTRACT_FUNCTION,
			"parameters": [
				{"type": "Address", "value": contract},
				{"type": "Sym", "value": function}
			],
			"asset_balance_changes": [{
				"asset_type": "native",
				"type": "transfer",
				"from": FROM,
				"to": TO,
				"amount": "1.0000000",
				"destination_muxed_id": "42"
			}]
		}))
		.unwrap();

		let op = to_ledger_operation(&record).unwrap().unwrap();
		assert_eq!(op.type_name(), "invoke_host_function");
		assert_eq!(op.to(), encode_muxed(TO, 42).unwrap());
		assert_eq!(op.amount(), 10_000_000);
		assert_eq!(op.asset().unwrap(), &Asset::Native);
	}

	#[test]
	fn test_other_operation_types_are_ignored() {
		let mut value = payment_json("native");
		value["type"] = json!("create_account");
		let record: HorizonOperation = serde_json::from_value(value).unwrap();
		assert!(to_ledger_operation(&record).unwrap().is_none());
	}

	#[test]
	fn test_application_order_from_paging_token() {
		let tx: HorizonTransaction = serde_json::from_value(json!({
			"hash": "abc",
			"ledger": 1234,
			"envelope_xdr": "AAAA",
			"source_account": FROM,
			"paging_token": Toid::new(1234, 5, 0).encode().unwrap().to_string(),
			"created_at": "2024-01-01T00:00:00Z"
		}))
		.unwrap();
		assert_eq!(tx.application_order().unwrap(), 5);
	}
}
