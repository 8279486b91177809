use crate::ledger::horizon::{HorizonOperation, MAX_RESULTS, PaymentFeed, to_ledger_operation};
use crate::ledger::rpc::{
	EVENTS_PAGE_LIMIT, EventFilter, EventInfo, EventSource, GetEventsRequest, Pagination,
	decode_transfer_event,
};
use crate::ledger::toid::Toid;
use crate::ledger::{
	LedgerError, LedgerOperation, PaymentTransferEvent, SacAssetResolver, transaction_wait_policy,
	wait_for_transaction_available,
};
use crate::observer::accounts::WatchedAccounts;
use crate::observer::cursor::{HORIZON_CURSOR_KEY, RPC_CURSOR_KEY};
use crate::observer::types::ObserverError;

use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Receiver of streamer output, implemented by the observer.
#[async_trait::async_trait]
pub trait StreamSink: Send + Sync {
	/// Deliver a payment. On success the observer has persisted `cursor`.
	///
	/// An error means the event was not consumed and the streamer must stop.
	async fn on_event(&self, event: PaymentTransferEvent, cursor: &str) -> Result<(), ObserverError>;

	/// Report feed activity that produced no payment, advancing the cursor to `cursor`.
	async fn on_progress(&self, cursor: &str, ledger: Option<u32>) -> Result<(), ObserverError>;
}

/// Trait for the backend-specific ingestion loops
#[async_trait::async_trait]
pub trait PaymentStreamer: Send + Sync {
	/// Key under which this streamer's cursor is persisted
	fn cursor_key(&self) -> &'static str;

	/// Turn the stored cursor into the cursor to resume from. `None` starts at the tip.
	async fn resolve_start_cursor(
		&self,
		stored: Option<String>,
	) -> Result<Option<String>, LedgerError>;

	/// Run until cancelled or until the feed fails
	async fn run(
		&self,
		cursor: Option<String>,
		sink: Arc<dyn StreamSink>,
		cancel: CancellationToken,
	) -> Result<(), ObserverError>;

	/// Get the name of this streamer
	fn name(&self) -> &'static str;
}

/// Start cursor for the SSE feed.
///
/// With no stored cursor the feed starts at the latest network cursor. A stored cursor ahead of
/// the network (a reset test network) also starts at the latest cursor, and one more than
/// `window` records behind is clamped to `latest - window`.
pub fn start_cursor(stored: Option<&str>, latest: Option<&str>, window: u64) -> Option<String> {
	let Some(stored) = stored.filter(|s| !s.is_empty()) else {
		info!("No stored cursor, starting at the latest cursor");
		return latest.map(str::to_string);
	};
	let Some(latest) = latest else {
		return Some(stored.to_string());
	};

	match (stored.parse::<i64>(), latest.parse::<i64>()) {
		(Ok(stored_value), Ok(latest_value)) => {
			if stored_value >= latest_value {
				info!(
					"Stored cursor {} is not behind the network ({}), probably a network reset",
					stored_value, latest_value
				);
				Some(latest_value.to_string())
			} else {
				let floor = latest_value.saturating_sub(window as i64);
				Some(stored_value.max(floor).to_string())
			}
		}
		_ => {
			warn!("Cannot compare cursors {} and {}, using the latest", stored, latest);
			Some(latest.to_string())
		}
	}
}

/// Streamer over Horizon's SSE payments feed
pub struct HorizonStreamer {
	client: Arc<dyn PaymentFeed>,
	accounts: Arc<dyn WatchedAccounts>,
	page_window: u32,
}

impl HorizonStreamer {
	pub fn new(client: Arc<dyn PaymentFeed>, accounts: Arc<dyn WatchedAccounts>) -> Self {
		Self {
			client,
			accounts,
			page_window: MAX_RESULTS,
		}
	}

	pub fn with_page_window(mut self, page_window: u32) -> Self {
		self.page_window = page_window;
		self
	}

	async fn is_watched(&self, from: &str, to: &str) -> bool {
		self.accounts.lookup_and_update(from).await || self.accounts.lookup_and_update(to).await
	}

	/// Filter one feed record and deliver it as a payment, or report it as progress.
	pub async fn process_record(
		&self,
		record: HorizonOperation,
		sink: &dyn StreamSink,
	) -> Result<(), ObserverError> {
		let operation = match to_ledger_operation(&record) {
			Ok(Some(operation)) => operation,
			Ok(None) => return sink.on_progress(&record.paging_token, None).await,
			Err(e) => {
				warn!("Skipping malformed operation {}: {}", record.id, e);
				return sink.on_progress(&record.paging_token, None).await;
			}
		};

		if record.transaction_successful == Some(false) {
			return sink.on_progress(&record.paging_token, None).await;
		}
		if !operation.asset().map(|asset| asset.is_supported()).unwrap_or(false) {
			debug!("Skipping operation {} with unsupported asset", record.id);
			return sink.on_progress(&record.paging_token, None).await;
		}
		if !self.is_watched(operation.from(), operation.to()).await {
			return sink.on_progress(&record.paging_token, None).await;
		}

		let transaction = wait_for_transaction_available(
			self.client.as_ref(),
			&record.transaction_hash,
			transaction_wait_policy(),
		)
		.await?;
		let event = PaymentTransferEvent::from_operation(&operation, Arc::new(transaction))?;
		debug!("Received payment {} to {}", event.operation_id, event.to);
		sink.on_event(event, &record.paging_token).await
	}
}

#[async_trait::async_trait]
impl PaymentStreamer for HorizonStreamer {
	fn cursor_key(&self) -> &'static str {
		HORIZON_CURSOR_KEY
	}

	async fn resolve_start_cursor(
		&self,
		stored: Option<String>,
	) -> Result<Option<String>, LedgerError> {
		let latest = self.client.latest_cursor().await?;
		info!("The latest cursor on the network is {:?}", latest);
		Ok(start_cursor(
			stored.as_deref(),
			latest.as_deref(),
			u64::from(self.page_window),
		))
	}

	async fn run(
		&self,
		cursor: Option<String>,
		sink: Arc<dyn StreamSink>,
		cancel: CancellationToken,
	) -> Result<(), ObserverError> {
		let cursor = cursor.unwrap_or_else(|| "now".to_string());
		let mut operations = self.client.stream_payments(&cursor).await?;

		loop {
			tokio::select! {
				biased;
				_ = cancel.cancelled() => {
					info!("Horizon stream cancelled");
					return Ok(());
				}
				next = operations.next() => {
					match next {
						Some(Ok(record)) => self.process_record(record, sink.as_ref()).await?,
						Some(Err(e)) => return Err(e.into()),
						None => {
							return Err(LedgerError::StreamError("payments stream closed".into()).into());
						}
					}
				}
			}
		}
	}

	fn name(&self) -> &'static str {
		"HorizonStreamer"
	}
}

/// Configuration for the RPC poller
#[derive(Debug, Clone)]
pub struct PollConfig {
	/// Delay between two `getEvents` calls
	pub poll_interval: Duration,
	/// Page size of `getEvents`
	pub page_limit: u32,
}

impl Default for PollConfig {
	fn default() -> Self {
		Self {
			poll_interval: Duration::from_secs(1),
			page_limit: EVENTS_PAGE_LIMIT,
		}
	}
}

/// Poller over Stellar RPC `transfer` events
pub struct RpcPoller {
	client: Arc<dyn EventSource>,
	resolver: Arc<SacAssetResolver>,
	accounts: Arc<dyn WatchedAccounts>,
	filters: Vec<EventFilter>,
	config: PollConfig,
}

impl RpcPoller {
	pub fn new(
		client: Arc<dyn EventSource>,
		resolver: Arc<SacAssetResolver>,
		accounts: Arc<dyn WatchedAccounts>,
		filters: Vec<EventFilter>,
		config: PollConfig,
	) -> Self {
		Self {
			client,
			resolver,
			accounts,
			filters,
			config,
		}
	}

	async fn build_request(&self, cursor: Option<&str>) -> Result<GetEventsRequest, LedgerError> {
		match cursor {
			Some(cursor) => Ok(GetEventsRequest {
				start_ledger: None,
				filters: self.filters.clone(),
				pagination: Some(Pagination {
					cursor: Some(cursor.to_string()),
					limit: self.config.page_limit,
				}),
			}),
			None => {
				let latest = self.client.get_latest_ledger().await?;
				info!("No RPC cursor, polling from ledger {}", latest.saturating_sub(1));
				Ok(GetEventsRequest {
					start_ledger: Some(latest.saturating_sub(1)),
					filters: self.filters.clone(),
					pagination: Some(Pagination {
						cursor: None,
						limit: self.config.page_limit,
					}),
				})
			}
		}
	}

	/// Fetch one page of events and hand the relevant ones to `sink`.
	///
	/// # Returns
	/// The cursor to poll from next.
	pub async fn poll_once(
		&self,
		cursor: Option<String>,
		sink: &dyn StreamSink,
	) -> Result<Option<String>, ObserverError> {
		let request = match self.build_request(cursor.as_deref()).await {
			Ok(request) => request,
			Err(e) => {
				warn!("Error fetching the latest ledger: {}. Waiting for the next poll", e);
				return Ok(cursor);
			}
		};
		let response = match self.client.get_events(&request).await {
			Ok(response) => response,
			Err(e) => {
				warn!("Error fetching events: {}. Waiting for the next poll", e);
				return Ok(cursor);
			}
		};

		if !response.events.is_empty() {
			debug!("Processing {} transfer events", response.events.len());
		}
		for event in &response.events {
			self.process_event(event, sink).await?;
		}

		match response.cursor.filter(|c| !c.is_empty()) {
			Some(next) => {
				let ledger = response.events.last().map(|event| event.ledger);
				sink.on_progress(&next, ledger).await?;
				Ok(Some(next))
			}
			None => Ok(cursor),
		}
	}

	async fn process_event(&self, info: &EventInfo, sink: &dyn StreamSink) -> Result<(), ObserverError> {
		let transfer = match decode_transfer_event(info) {
			Ok(Some(transfer)) => transfer,
			Ok(None) => return Ok(()),
			Err(e) => {
				warn!("Skipping undecodable event {}: {}", info.id, e);
				return Ok(());
			}
		};
		if !transfer.asset.is_supported() {
			return Ok(());
		}
		if !(self.accounts.lookup_and_update(&transfer.from).await
			|| self.accounts.lookup_and_update(&transfer.to).await)
		{
			return Ok(());
		}

		let transaction =
			wait_for_transaction_available(self.client.as_ref(), &transfer.tx_hash, transaction_wait_policy())
				.await?;
		let operation_id = Toid::new(
			i64::from(transaction.ledger),
			i64::from(transaction.application_order),
			i64::from(transfer.operation_index) + 1,
		)
		.encode()
		.map_err(LedgerError::from)?
		.to_string();

		let Some(mut operation) = transaction
			.operations
			.iter()
			.find(|operation| operation.id() == operation_id)
			.cloned()
		else {
			warn!(
				"Operation {} of transaction {} not found for event {}",
				operation_id, transfer.tx_hash, info.id
			);
			return Ok(());
		};
		let transaction = Arc::new(transaction);

		let event = match &mut operation {
			LedgerOperation::InvokeHostFunction(invoke) => {
				let resolved = self.resolver.resolve(invoke).await?;
				if !resolved || invoke.asset()? != &transfer.asset {
					warn!(
						"Event {} names {} but contract {} is not its asset contract",
						info.id, transfer.asset, invoke.contract_id
					);
					return Ok(());
				}
				PaymentTransferEvent {
					from: transfer.from,
					to: transfer.to,
					asset: transfer.asset,
					amount: transfer.amount,
					tx_hash: transfer.tx_hash,
					operation_id,
					ledger_transaction: transaction,
				}
			}
			_ => PaymentTransferEvent::from_operation(&operation, transaction)?,
		};

		if !event.asset.is_supported() {
			return Ok(());
		}
		sink.on_event(event, &info.id).await
	}
}

#[async_trait::async_trait]
impl PaymentStreamer for RpcPoller {
	fn cursor_key(&self) -> &'static str {
		RPC_CURSOR_KEY
	}

	async fn resolve_start_cursor(
		&self,
		stored: Option<String>,
	) -> Result<Option<String>, LedgerError> {
		Ok(stored.filter(|cursor| !cursor.is_empty()))
	}

	async fn run(
		&self,
		cursor: Option<String>,
		sink: Arc<dyn StreamSink>,
		cancel: CancellationToken,
	) -> Result<(), ObserverError> {
		info!("Starting Stellar RPC poller at cursor {:?}", cursor);
		let mut cursor = cursor;
		let mut ticker = tokio::time::interval(self.config.poll_interval);
		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

		loop {
			tokio::select! {
				biased;
				_ = cancel.cancelled() => {
					info!("Stellar RPC poller cancelled");
					return Ok(());
				}
				_ = ticker.tick() => {
					cursor = self.poll_once(cursor, sink.as_ref()).await?;
				}
			}
		}
	}

	fn name(&self) -> &'static str {
		"RpcPoller"
	}
}
