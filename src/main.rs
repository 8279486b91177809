use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use stellar_payment_observer::config::{self, Backend, Config};
use stellar_payment_observer::ledger::rpc::build_transfer_filters;
use stellar_payment_observer::ledger::{HorizonClient, SacAssetResolver, StellarRpcClient};
use stellar_payment_observer::observer::accounts::{PaymentObservingAccounts, WatchedAccounts};
use stellar_payment_observer::observer::cursor::FileCursorStore;
use stellar_payment_observer::observer::events::EventDispatcher;
use stellar_payment_observer::observer::strategies::{
	HorizonStreamer, PaymentStreamer, PollConfig, RpcPoller,
};
use stellar_payment_observer::observer::PaymentObserver;
use stellar_payment_observer::reconcile::{
	MemoryTransactionStore, PaymentDispatcher, PlatformApiClient, SepProtocol,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

type BoxError = Box<dyn Error + Send + Sync>;

fn resolve_config_path() -> Option<String> {
	std::env::args()
		.nth(1)
		.filter(|value| !value.trim().is_empty())
		.or_else(|| {
			std::env::var("OBSERVER_CONFIG_PATH")
				.ok()
				.filter(|value| !value.trim().is_empty())
		})
}

fn init_tracing(config: &Config) {
	let filter = EnvFilter::try_from_default_env()
		.or_else(|_| EnvFilter::try_new(&config.logging.level))
		.unwrap_or_else(|_| EnvFilter::new("info"));

	if config.logging.json {
		tracing_subscriber::fmt()
			.with_env_filter(filter)
			.with_target(false)
			.json()
			.init();
	} else {
		tracing_subscriber::fmt()
			.with_env_filter(filter)
			.with_target(false)
			.with_thread_ids(false)
			.with_thread_names(false)
			.init();
	}
}

fn build_streamer(
	config: &Config,
	accounts: Arc<dyn WatchedAccounts>,
) -> Result<Arc<dyn PaymentStreamer>, BoxError> {
	match config.observer.backend {
		Backend::Horizon => {
			let client = Arc::new(HorizonClient::new(config.horizon.url.clone())?);
			info!("Created Horizon client for {}", config.horizon.url);
			Ok(Arc::new(
				HorizonStreamer::new(client, accounts).with_page_window(config.horizon.page_window),
			))
		}
		Backend::Rpc => {
			let client = Arc::new(StellarRpcClient::new(config.rpc.url.clone())?);
			info!("Created Stellar RPC client for {}", config.rpc.url);
			let resolver = Arc::new(SacAssetResolver::new(client.clone()));
			let filters = build_transfer_filters(&config.accounts.distribution_accounts)?;
			let poll = PollConfig {
				poll_interval: Duration::from_millis(config.rpc.poll_interval_ms),
				page_limit: config.rpc.page_limit,
			};
			Ok(Arc::new(RpcPoller::new(
				client, resolver, accounts, filters, poll,
			)))
		}
	}
}

fn pending_store(
	protocol: SepProtocol,
	accounts: &Arc<PaymentObservingAccounts>,
) -> Arc<MemoryTransactionStore> {
	Arc::new(MemoryTransactionStore::new(protocol).with_watched_accounts(accounts.clone()))
}

async fn run(config: Config) -> Result<(), BoxError> {
	let accounts =
		Arc::new(PaymentObservingAccounts::with_residential(&config.accounts.distribution_accounts).await);
	info!("Watching {} distribution accounts", accounts.len().await);

	let streamer = build_streamer(&config, accounts.clone())?;

	let notifier = Arc::new(PlatformApiClient::new(config.platform.url.clone())?);
	let reconciler = PaymentDispatcher::new(notifier, &config.platform)
		.with_store(pending_store(SepProtocol::Sep31, &accounts))
		.with_store(pending_store(SepProtocol::Sep24, &accounts))
		.with_store(pending_store(SepProtocol::Sep6, &accounts));
	let mut dispatcher = EventDispatcher::new();
	dispatcher.register_listener(Arc::new(reconciler));

	let cursor_store = Arc::new(FileCursorStore::new(config.cursor_store.path.clone()));
	let observer = PaymentObserver::new(config.observer.clone(), streamer, dispatcher, cursor_store);
	observer.start().await?;

	let max_idle = Duration::from_secs(config.accounts.max_idle_time.max(1));
	let eviction = tokio::spawn({
		let accounts = accounts.clone();
		async move {
			let mut ticker = tokio::time::interval(max_idle);
			loop {
				ticker.tick().await;
				let evicted = accounts.evict(max_idle).await;
				if evicted > 0 {
					info!("Evicted {} idle accounts", evicted);
				}
			}
		}
	});

	tokio::select! {
		result = tokio::signal::ctrl_c() => {
			if let Err(e) = result {
				warn!("Cannot listen for the shutdown signal: {}", e);
			}
			info!("Shutdown signal received");
		}
		_ = observer.stopped() => warn!("The observer stopped on its own"),
	}

	observer.shutdown().await;
	eviction.abort();
	info!("{}", observer.stats().await.summary());
	Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
	let path = resolve_config_path();
	let config = match config::load_config(path.as_deref().or(Some("config.toml"))) {
		Ok(config) => config,
		Err(e) => {
			eprintln!("Failed to load configuration: {e}");
			return ExitCode::FAILURE;
		}
	};
	init_tracing(&config);
	info!("Starting the payment observer with the {:?} backend", config.observer.backend);

	match run(config).await {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			error!("The payment observer failed: {}", e);
			ExitCode::FAILURE
		}
	}
}
