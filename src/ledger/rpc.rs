//!
//! Stellar RPC (JSON-RPC 2.0) client.
//!
//! Stellar RPC has no push feed, so payments are discovered by polling `getEvents` for
//! CAP-67 `transfer` contract events and fetching the enclosing transaction with
//! `getTransaction`. Account data and contract instance storage come from `getLedgerEntries`.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use itertools::Itertools;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use stellar_xdr::curr::{
	AlphaNum4, AlphaNum12, AssetCode4, AssetCode12, ContractDataDurability, LedgerEntryData,
	LedgerKey, LedgerKeyAccount, LedgerKeyContractData, LedgerKeyTrustLine, Limits, ReadXdr,
	ScMap, ScSymbol, ScVal, StringM, TrustLineAsset, WriteXdr,
};
use tracing::{debug, warn};

use super::address::{encode_muxed, parse_account_id, parse_contract_id, sc_address_to_string};
use super::client::LedgerClient;
use super::parser::{RawTransaction, TRANSFER_FUNCTION, i128_amount, parse_transaction};
use super::toid::Toid;
use super::types::*;

/// Page size of `getEvents` requests.
pub const EVENTS_PAGE_LIMIT: u32 = 100;

/// Stellar RPC client
pub struct StellarRpcClient {
	http_client: Client,
	rpc_url: String,
	request_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
	result: Option<T>,
	#[serde(default)]
	error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
	code: i64,
	message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LatestLedger {
	pub sequence: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GetEventsRequest {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub start_ledger: Option<u32>,
	pub filters: Vec<EventFilter>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EventFilter {
	#[serde(rename = "type")]
	pub type_: String,
	pub topics: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Pagination {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub cursor: Option<String>,
	pub limit: u32,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GetEventsResponse {
	#[serde(default, deserialize_with = "null_as_default")]
	pub events: Vec<EventInfo>,
	#[serde(default)]
	pub cursor: Option<String>,
	#[serde(default)]
	pub latest_ledger: Option<u32>,
}

/// A contract event as returned by `getEvents`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EventInfo {
	#[serde(rename = "type")]
	pub type_: String,
	pub ledger: u32,
	pub id: String,
	#[serde(default)]
	pub contract_id: Option<String>,
	pub topic: Vec<String>,
	pub value: String,
	pub tx_hash: String,
	#[serde(default, alias = "operationIndex")]
	pub op_index: Option<u32>,
}

impl EventInfo {
	/// 0-based index of the emitting operation inside its transaction.
	///
	/// Falls back to the TOID prefix of the event id when the server omits `opIndex`.
	pub fn operation_index(&self) -> Result<u32, LedgerError> {
		if let Some(index) = self.op_index {
			return Ok(index);
		}
		let prefix = self.id.split('-').next().unwrap_or_default();
		let toid: i64 = prefix
			.parse()
			.map_err(|_| LedgerError::InvalidData(format!("bad event id {}", self.id)))?;
		Ok((Toid::decode(toid).operation_index as u32).saturating_sub(1))
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTransactionResponse {
	pub status: String,
	#[serde(default)]
	pub ledger: Option<u32>,
	#[serde(default, deserialize_with = "flexible_timestamp")]
	pub created_at: Option<i64>,
	#[serde(default)]
	pub application_order: Option<u32>,
	#[serde(default)]
	pub envelope_xdr: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetLedgerEntriesResponse {
	#[serde(default, deserialize_with = "null_as_default")]
	entries: Vec<LedgerEntryResult>,
}

#[derive(Debug, Deserialize)]
struct LedgerEntryResult {
	xdr: String,
}

#[derive(Debug, Deserialize)]
struct SendTransactionResponse {
	hash: String,
	status: String,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
	D: Deserializer<'de>,
	T: Default + Deserialize<'de>,
{
	Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// Older servers return createdAt as a string.
fn flexible_timestamp<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
	D: Deserializer<'de>,
{
	let value = Option::<serde_json::Value>::deserialize(deserializer)?;
	Ok(match value {
		Some(serde_json::Value::Number(n)) => n.as_i64(),
		Some(serde_json::Value::String(s)) => s.parse().ok(),
		_ => None,
	})
}

/// A decoded CAP-67 `transfer` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
	pub from: String,
	/// Muxed (`M...`) when the event carries a numeric `to_muxed_id`.
	pub to: String,
	pub asset: Asset,
	pub amount: u128,
	/// String form of the `to_muxed_id` entry, if any.
	pub to_muxed_id: Option<String>,
	pub tx_hash: String,
	pub ledger: u32,
	pub operation_index: u32,
	pub event_id: String,
}

/// Decode a `transfer(from, to, sep11_asset)` event.
///
/// Returns `Ok(None)` for events of any other shape.
pub fn decode_transfer_event(event: &EventInfo) -> Result<Option<TransferEvent>, LedgerError> {
	if event.topic.len() != 4 {
		return Ok(None);
	}
	let topics: Vec<ScVal> = event
		.topic
		.iter()
		.map(|topic| ScVal::from_xdr_base64(topic, Limits::none()))
		.collect::<Result<_, _>>()?;

	match &topics[0] {
		ScVal::Symbol(symbol) => {
			let name: &[u8] = symbol.0.as_ref();
			if name != TRANSFER_FUNCTION.as_bytes() {
				return Ok(None);
			}
		}
		_ => return Ok(None),
	}
	let (ScVal::Address(from), ScVal::Address(to), ScVal::String(asset)) =
		(&topics[1], &topics[2], &topics[3])
	else {
		return Ok(None);
	};

	let from = sc_address_to_string(from)?;
	let mut to = sc_address_to_string(to)?;
	let asset_bytes: &[u8] = asset.0.as_ref();
	let asset = Asset::from_canonical(&String::from_utf8_lossy(asset_bytes));

	let value = ScVal::from_xdr_base64(&event.value, Limits::none())?;
	let (amount, to_muxed_id) = match &value {
		ScVal::I128(parts) => (i128_amount(parts)?, None),
		ScVal::Map(Some(ScMap(entries))) if entries.len() >= 2 => {
			let ScVal::I128(parts) = &entries[0].val else {
				return Ok(None);
			};
			let muxed_id = match &entries[1].val {
				ScVal::U64(id) => {
					to = encode_muxed(&to, *id)?;
					Some(id.to_string())
				}
				ScVal::String(text) => {
					let bytes: &[u8] = text.0.as_ref();
					Some(String::from_utf8_lossy(bytes).into_owned())
				}
				ScVal::Bytes(bytes) => {
					let raw: &[u8] = bytes.0.as_ref();
					Some(hex::encode(raw))
				}
				_ => None,
			};
			(i128_amount(parts)?, muxed_id)
		}
		_ => return Ok(None),
	};

	Ok(Some(TransferEvent {
		from,
		to,
		asset,
		amount,
		to_muxed_id,
		tx_hash: event.tx_hash.clone(),
		ledger: event.ledger,
		operation_index: event.operation_index()?,
		event_id: event.id.clone(),
	}))
}

fn transfer_symbol() -> Result<String, LedgerError> {
	let symbol = StringM::try_from(TRANSFER_FUNCTION)
		.map_err(|e| LedgerError::InvalidData(format!("bad symbol: {}", e)))?;
	Ok(ScVal::Symbol(ScSymbol(symbol)).to_xdr_base64(Limits::none())?)
}

fn address_topic(account: &str) -> Result<String, LedgerError> {
	let address = super::address::parse_sc_address(account)?;
	Ok(ScVal::Address(address).to_xdr_base64(Limits::none())?)
}

/// Transfer filters for the given distribution accounts.
///
/// Each account gets one filter matching it as recipient and as sender. Duplicate accounts are
/// collapsed and unparseable ones are logged and skipped.
pub fn build_transfer_filters(accounts: &[String]) -> Result<Vec<EventFilter>, LedgerError> {
	let transfer = transfer_symbol()?;
	let mut filters = Vec::new();
	for account in accounts.iter().unique() {
		let topic = match address_topic(account) {
			Ok(topic) => topic,
			Err(e) => {
				warn!("Skipping distribution account {}: {}", account, e);
				continue;
			}
		};
		filters.push(EventFilter {
			type_: "contract".to_string(),
			topics: vec![
				vec![transfer.clone(), "*".into(), topic.clone(), "*".into()],
				vec![transfer.clone(), topic, "*".into(), "*".into()],
			],
		});
	}
	Ok(filters)
}

impl StellarRpcClient {
	/// Create a new RPC client.
	///
	/// # Arguments
	/// * `rpc_url` - The JSON-RPC endpoint.
	pub fn new(rpc_url: String) -> Result<Self, LedgerError> {
		let http_client = Client::builder()
			.timeout(Duration::from_secs(30))
			.build()?;

		Ok(Self {
			http_client,
			rpc_url,
			request_id: AtomicU64::new(1),
		})
	}

	/// Execute a JSON-RPC call.
	///
	/// # Errors
	/// HTTP failures, undecodable bodies and JSON-RPC error objects.
	pub async fn call<R: DeserializeOwned>(
		&self,
		method: &str,
		params: serde_json::Value,
	) -> Result<R, LedgerError> {
		let request_body = json!({
			"jsonrpc": "2.0",
			"id": self.request_id.fetch_add(1, Ordering::Relaxed),
			"method": method,
			"params": params,
		});

		let response = self
			.http_client
			.post(&self.rpc_url)
			.header("Content-Type", "application/json")
			.json(&request_body)
			.send()
			.await?;

		if !response.status().is_success() {
			return Err(LedgerError::RpcError {
				code: response.status().as_u16() as i64,
				message: format!("HTTP error: {}", response.status()),
			});
		}

		let body: JsonRpcResponse<R> = response.json().await?;
		if let Some(error) = body.error {
			return Err(LedgerError::RpcError {
				code: error.code,
				message: error.message,
			});
		}
		body.result.ok_or_else(|| LedgerError::RpcError {
			code: 0,
			message: format!("{} returned no result", method),
		})
	}

	pub async fn get_latest_ledger(&self) -> Result<u32, LedgerError> {
		let latest: LatestLedger = self.call("getLatestLedger", json!({})).await?;
		Ok(latest.sequence)
	}

	pub async fn get_events(
		&self,
		request: &GetEventsRequest,
	) -> Result<GetEventsResponse, LedgerError> {
		self.call("getEvents", serde_json::to_value(request)?).await
	}

	pub async fn fetch_transaction(&self, hash: &str) -> Result<GetTransactionResponse, LedgerError> {
		self.call("getTransaction", json!({ "hash": hash })).await
	}

	/// Fetch and decode ledger entries. Missing entries are simply absent from the result.
	pub async fn get_ledger_entries(
		&self,
		keys: &[LedgerKey],
	) -> Result<Vec<LedgerEntryData>, LedgerError> {
		let keys = keys
			.iter()
			.map(|key| key.to_xdr_base64(Limits::none()))
			.collect::<Result<Vec<_>, _>>()?;
		let response: GetLedgerEntriesResponse =
			self.call("getLedgerEntries", json!({ "keys": keys })).await?;

		response
			.entries
			.iter()
			.map(|entry| {
				LedgerEntryData::from_xdr_base64(&entry.xdr, Limits::none()).map_err(LedgerError::from)
			})
			.collect()
	}

	/// Storage map of a contract instance, if the contract exists.
	pub async fn get_contract_instance_storage(
		&self,
		contract_id: &str,
	) -> Result<Option<ScMap>, LedgerError> {
		let key = LedgerKey::ContractData(LedgerKeyContractData {
			contract: stellar_xdr::curr::ScAddress::Contract(parse_contract_id(contract_id)?),
			key: ScVal::LedgerKeyContractInstance,
			durability: ContractDataDurability::Persistent,
		});

		for entry in self.get_ledger_entries(&[key]).await? {
			if let LedgerEntryData::ContractData(data) = entry {
				if let ScVal::ContractInstance(instance) = data.val {
					return Ok(instance.storage);
				}
			}
		}
		Ok(None)
	}
}

/// The event side of a Stellar RPC server, as consumed by the poller.
#[async_trait]
pub trait EventSource: LedgerClient {
	async fn get_latest_ledger(&self) -> Result<u32, LedgerError>;

	async fn get_events(&self, request: &GetEventsRequest) -> Result<GetEventsResponse, LedgerError>;
}

#[async_trait]
impl EventSource for StellarRpcClient {
	async fn get_latest_ledger(&self) -> Result<u32, LedgerError> {
		StellarRpcClient::get_latest_ledger(self).await
	}

	async fn get_events(&self, request: &GetEventsRequest) -> Result<GetEventsResponse, LedgerError> {
		StellarRpcClient::get_events(self, request).await
	}
}

fn created_at(seconds: Option<i64>) -> DateTime<Utc> {
	seconds
		.and_then(|s| Utc.timestamp_opt(s, 0).single())
		.unwrap_or_else(Utc::now)
}

fn trustline_asset(asset: &Asset) -> Result<Option<TrustLineAsset>, LedgerError> {
	let asset = match asset {
		Asset::CreditAlphanum4 { code, issuer } => {
			let len = code.len().min(4);
			let mut bytes = [0u8; 4];
			bytes[..len].copy_from_slice(&code.as_bytes()[..len]);
			TrustLineAsset::CreditAlphanum4(AlphaNum4 {
				asset_code: AssetCode4(bytes),
				issuer: parse_account_id(issuer)?,
			})
		}
		Asset::CreditAlphanum12 { code, issuer } => {
			let len = code.len().min(12);
			let mut bytes = [0u8; 12];
			bytes[..len].copy_from_slice(&code.as_bytes()[..len]);
			TrustLineAsset::CreditAlphanum12(AlphaNum12 {
				asset_code: AssetCode12(bytes),
				issuer: parse_account_id(issuer)?,
			})
		}
		_ => return Ok(None),
	};
	Ok(Some(asset))
}

#[async_trait]
impl LedgerClient for StellarRpcClient {
	async fn get_account(&self, account_id: &str) -> Result<AccountInfo, LedgerError> {
		let key = LedgerKey::Account(LedgerKeyAccount {
			account_id: parse_account_id(account_id)?,
		});
		let entries = self.get_ledger_entries(&[key]).await?;
		for entry in entries {
			if let LedgerEntryData::Account(account) = entry {
				return Ok(AccountInfo {
					account_id: account_id.to_string(),
					sequence_number: account.seq_num.0,
					balances: vec![AccountBalance {
						asset: Asset::Native,
						balance: u128::try_from(account.balance).unwrap_or_default(),
					}],
				});
			}
		}
		Err(LedgerError::InvalidData(format!(
			"account {} not found",
			account_id
		)))
	}

	async fn get_transaction(&self, hash: &str) -> Result<Option<LedgerTransaction>, LedgerError> {
		let response = self.fetch_transaction(hash).await?;
		match response.status.as_str() {
			"NOT_FOUND" => Ok(None),
			"SUCCESS" | "FAILED" => {
				let (Some(ledger), Some(application_order), Some(envelope_xdr)) = (
					response.ledger,
					response.application_order,
					response.envelope_xdr,
				) else {
					return Err(LedgerError::InvalidData(format!(
						"incomplete getTransaction response for {}",
						hash
					)));
				};
				let raw = RawTransaction {
					hash: hash.to_string(),
					ledger,
					application_order,
					envelope_xdr,
					created_at: created_at(response.created_at),
				};
				Ok(Some(parse_transaction(&raw)?))
			}
			other => Err(LedgerError::InvalidData(format!(
				"unknown transaction status {}",
				other
			))),
		}
	}

	async fn submit_transaction(
		&self,
		envelope_xdr: &str,
	) -> Result<SubmitTransactionResult, LedgerError> {
		let response: SendTransactionResponse = self
			.call("sendTransaction", json!({ "transaction": envelope_xdr }))
			.await?;
		debug!("sendTransaction {} -> {}", response.hash, response.status);
		Ok(SubmitTransactionResult {
			hash: response.hash,
			status: response.status,
		})
	}

	async fn has_trustline(&self, account_id: &str, asset: &Asset) -> Result<bool, LedgerError> {
		let Some(trustline) = trustline_asset(asset)? else {
			return Ok(*asset == Asset::Native);
		};
		let key = LedgerKey::Trustline(LedgerKeyTrustLine {
			account_id: parse_account_id(account_id)?,
			asset: trustline,
		});
		Ok(!self.get_ledger_entries(&[key]).await?.is_empty())
	}

	fn name(&self) -> &'static str {
		"stellar_rpc"
	}
}
