//! Observer state machine tests against a scripted streamer, with tokio time paused.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use stellar_payment_observer::config::ObserverConfig;
use stellar_payment_observer::ledger::{
    Asset, LedgerError, LedgerTransaction, Memo, PaymentTransferEvent,
};
use stellar_payment_observer::observer::cursor::{
    CursorStore, CursorStoreError, MemoryCursorStore, cursor_is_newer,
};
use stellar_payment_observer::observer::events::{EventDispatcher, ListenerError, PaymentListener};
use stellar_payment_observer::observer::status::ObserverStatus;
use stellar_payment_observer::observer::strategies::{PaymentStreamer, StreamSink};
use stellar_payment_observer::observer::{HealthStatus, ObserverError, PaymentObserver};
use tokio_util::sync::CancellationToken;

const KEY: &str = "scripted";
const ACCOUNT: &str = "GADQOBYHA4DQOBYHA4DQOBYHA4DQOBYHA4DQOBYHA4DQOBYHA4DQOZPI";

fn payment(ledger: u32, operation_id: &str) -> PaymentTransferEvent {
    PaymentTransferEvent {
        from: "GBBD47IF6LWK7P7MDEVSCWR7DPUWV3NY3DTQEVFL4NAT4AQH3ZLLFLA5".to_string(),
        to: ACCOUNT.to_string(),
        asset: Asset::Native,
        amount: 10_000_000,
        tx_hash: format!("hash-{operation_id}"),
        operation_id: operation_id.to_string(),
        ledger_transaction: Arc::new(LedgerTransaction {
            hash: format!("hash-{operation_id}"),
            ledger,
            application_order: 1,
            envelope_xdr: String::new(),
            source_account: ACCOUNT.to_string(),
            memo: Memo::Id(1),
            sequence_number: 1,
            created_at: Utc::now(),
            operations: vec![],
        }),
    }
}

/// Replays a fixed feed from the requested cursor, then idles until cancelled.
#[derive(Default)]
struct ScriptedStreamer {
    feed: Vec<(u32, String)>,
    fail_resolve: AtomicBool,
    starts: AtomicUsize,
    resolves: AtomicUsize,
}

impl ScriptedStreamer {
    fn with_feed(cursors: &[&str]) -> Self {
        Self {
            feed: cursors
                .iter()
                .enumerate()
                .map(|(i, cursor)| (i as u32 + 1, cursor.to_string()))
                .collect(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl PaymentStreamer for ScriptedStreamer {
    fn cursor_key(&self) -> &'static str {
        KEY
    }

    async fn resolve_start_cursor(
        &self,
        stored: Option<String>,
    ) -> Result<Option<String>, LedgerError> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        if self.fail_resolve.load(Ordering::SeqCst) {
            return Err(LedgerError::StreamError("network unreachable".into()));
        }
        Ok(stored)
    }

    async fn run(
        &self,
        cursor: Option<String>,
        sink: Arc<dyn StreamSink>,
        cancel: CancellationToken,
    ) -> Result<(), ObserverError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        for (ledger, token) in &self.feed {
            if !cursor_is_newer(token, cursor.as_deref()) {
                continue;
            }
            sink.on_event(payment(*ledger, token), token).await?;
        }
        cancel.cancelled().await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ScriptedStreamer"
    }
}

/// Fails its first `failures` deliveries.
struct FlakyListener {
    calls: AtomicUsize,
    failures: usize,
}

impl FlakyListener {
    fn new(failures: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failures,
        }
    }
}

#[async_trait]
impl PaymentListener for FlakyListener {
    async fn on_received(&self, _event: &PaymentTransferEvent) -> Result<(), ListenerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(ListenerError::NotifyError("platform unavailable".into()));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "FlakyListener"
    }
}

/// Cursor store whose loads or saves fail on demand.
#[derive(Default)]
struct BrokenCursorStore {
    fail_load: bool,
    fail_save: bool,
    loads: AtomicUsize,
}

#[async_trait]
impl CursorStore for BrokenCursorStore {
    async fn save(&self, _key: &str, _token: &str) -> Result<(), CursorStoreError> {
        if self.fail_save {
            return Err(std::io::Error::other("disk full").into());
        }
        Ok(())
    }

    async fn load(&self, _key: &str) -> Result<Option<String>, CursorStoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_load {
            return Err(std::io::Error::other("disk gone").into());
        }
        Ok(None)
    }
}

/// Watchers tick rarely so tests drive checks by hand.
fn quiet_config() -> ObserverConfig {
    ObserverConfig {
        silence_check_interval: 3600,
        silence_timeout: 60,
        silence_timeout_retries: 2,
        initial_stream_backoff_time: 1,
        max_stream_backoff_time: 4,
        initial_event_backoff_time: 1,
        max_event_backoff_time: 4,
        initial_database_backoff_time: 1,
        max_database_backoff_time: 2,
        status_check_interval_ms: 3_600_000,
        ..ObserverConfig::default()
    }
}

fn dispatcher_with(listener: Arc<dyn PaymentListener>) -> EventDispatcher {
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register_listener(listener);
    dispatcher
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn test_cursor_is_saved_after_listeners_succeed() {
    let streamer = Arc::new(ScriptedStreamer::with_feed(&["100", "101"]));
    let listener = Arc::new(FlakyListener::new(0));
    let store = Arc::new(MemoryCursorStore::new());
    let observer = PaymentObserver::new(
        quiet_config(),
        streamer.clone(),
        dispatcher_with(listener.clone()),
        store.clone(),
    );

    observer.start().await.unwrap();
    settle().await;

    assert_eq!(listener.calls.load(Ordering::SeqCst), 2);
    assert_eq!(store.load(KEY).await.unwrap().as_deref(), Some("101"));
    assert_eq!(observer.cursor().await.as_deref(), Some("101"));
    assert_eq!(observer.status().await, ObserverStatus::Running);
    assert_eq!(observer.stats().await.events_processed, 2);

    let health = observer.health().await;
    assert_eq!(health.status, HealthStatus::Green);
    assert_eq!(health.streams[0].last_event_id, "101");

    observer.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_second_start_keeps_a_single_stream() {
    let streamer = Arc::new(ScriptedStreamer::with_feed(&["100", "101"]));
    let listener = Arc::new(FlakyListener::new(0));
    let observer = PaymentObserver::new(
        quiet_config(),
        streamer.clone(),
        dispatcher_with(listener.clone()),
        Arc::new(MemoryCursorStore::new()),
    );

    observer.start().await.unwrap();
    observer.start().await.unwrap();
    settle().await;

    assert_eq!(streamer.starts.load(Ordering::SeqCst), 1);
    assert_eq!(streamer.resolves.load(Ordering::SeqCst), 1);
    assert_eq!(listener.calls.load(Ordering::SeqCst), 2);
    assert_eq!(observer.health().await.status, HealthStatus::Green);

    observer.shutdown().await;
    assert!(observer.health().await.streams[0].thread_terminated);
    assert!(matches!(
        observer.start().await,
        Err(ObserverError::ShutdownError)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_listener_failure_keeps_cursor_and_redelivers() {
    let streamer = Arc::new(ScriptedStreamer::with_feed(&["100", "101"]));
    let listener = Arc::new(FlakyListener::new(1));
    let store = Arc::new(MemoryCursorStore::new());
    let observer = PaymentObserver::new(
        quiet_config(),
        streamer.clone(),
        dispatcher_with(listener.clone()),
        store.clone(),
    );

    observer.start().await.unwrap();
    settle().await;

    assert_eq!(observer.status().await, ObserverStatus::PublisherError);
    assert_eq!(store.load(KEY).await.unwrap(), None);
    assert_eq!(observer.health().await.status, HealthStatus::Yellow);

    observer.check_status().await;
    settle().await;

    assert_eq!(observer.status().await, ObserverStatus::Running);
    assert_eq!(streamer.starts.load(Ordering::SeqCst), 2);
    // The failed payment is delivered again before the next one.
    assert_eq!(listener.calls.load(Ordering::SeqCst), 3);
    assert_eq!(store.load(KEY).await.unwrap().as_deref(), Some("101"));

    observer.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_silence_restarts_then_shuts_down() {
    let streamer = Arc::new(ScriptedStreamer::default());
    let observer = PaymentObserver::new(
        quiet_config(),
        streamer.clone(),
        dispatcher_with(Arc::new(FlakyListener::new(0))),
        Arc::new(MemoryCursorStore::new()),
    );
    observer.start().await.unwrap();

    for restart in 1..=2 {
        tokio::time::advance(Duration::from_secs(61)).await;
        observer.check_silence().await;
        assert_eq!(observer.status().await, ObserverStatus::SilenceError);

        observer.check_status().await;
        assert_eq!(observer.status().await, ObserverStatus::Running);
        assert_eq!(streamer.starts.load(Ordering::SeqCst), restart + 1);
    }

    tokio::time::advance(Duration::from_secs(61)).await;
    observer.check_silence().await;
    observer.check_status().await;
    assert_eq!(observer.status().await, ObserverStatus::NeedsShutdown);

    observer.check_status().await;
    assert_eq!(observer.status().await, ObserverStatus::Shutdown);
    observer.stopped().await;
    assert_eq!(observer.health().await.status, HealthStatus::Red);
    assert!(matches!(
        observer.start().await,
        Err(ObserverError::ShutdownError)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_silence_within_timeout_is_ignored() {
    let observer = PaymentObserver::new(
        quiet_config(),
        Arc::new(ScriptedStreamer::default()),
        dispatcher_with(Arc::new(FlakyListener::new(0))),
        Arc::new(MemoryCursorStore::new()),
    );
    observer.start().await.unwrap();

    tokio::time::advance(Duration::from_secs(30)).await;
    observer.check_silence().await;
    assert_eq!(observer.status().await, ObserverStatus::Running);

    observer.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stream_errors_back_off_until_maxed() {
    let streamer = Arc::new(ScriptedStreamer::default());
    streamer.fail_resolve.store(true, Ordering::SeqCst);
    let observer = PaymentObserver::new(
        quiet_config(),
        streamer.clone(),
        dispatcher_with(Arc::new(FlakyListener::new(0))),
        Arc::new(MemoryCursorStore::new()),
    );

    observer.start().await.unwrap();
    assert_eq!(observer.status().await, ObserverStatus::StreamError);

    // Delays of 1s and 2s, then the 4s ceiling is reached.
    observer.check_status().await;
    observer.check_status().await;
    assert_eq!(observer.status().await, ObserverStatus::StreamError);
    assert_eq!(streamer.resolves.load(Ordering::SeqCst), 3);

    observer.check_status().await;
    assert_eq!(observer.status().await, ObserverStatus::NeedsShutdown);
}

#[tokio::test(start_paused = true)]
async fn test_stream_recovers_after_backoff() {
    let streamer = Arc::new(ScriptedStreamer::default());
    streamer.fail_resolve.store(true, Ordering::SeqCst);
    let observer = PaymentObserver::new(
        quiet_config(),
        streamer.clone(),
        dispatcher_with(Arc::new(FlakyListener::new(0))),
        Arc::new(MemoryCursorStore::new()),
    );

    observer.start().await.unwrap();
    streamer.fail_resolve.store(false, Ordering::SeqCst);
    observer.check_status().await;
    settle().await;

    assert_eq!(observer.status().await, ObserverStatus::Running);
    assert_eq!(streamer.starts.load(Ordering::SeqCst), 1);
    observer.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_cursor_load_failure_is_a_database_error() {
    let store = Arc::new(BrokenCursorStore {
        fail_load: true,
        ..BrokenCursorStore::default()
    });
    let observer = PaymentObserver::new(
        quiet_config(),
        Arc::new(ScriptedStreamer::default()),
        dispatcher_with(Arc::new(FlakyListener::new(0))),
        store.clone(),
    );

    observer.start().await.unwrap();
    assert_eq!(observer.status().await, ObserverStatus::DatabaseError);

    observer.check_status().await;
    assert_eq!(store.loads.load(Ordering::SeqCst), 2);
    assert_eq!(observer.status().await, ObserverStatus::DatabaseError);

    observer.check_status().await;
    assert_eq!(observer.status().await, ObserverStatus::NeedsShutdown);
}

#[tokio::test(start_paused = true)]
async fn test_cursor_save_failure_is_a_database_error() {
    let listener = Arc::new(FlakyListener::new(0));
    let observer = PaymentObserver::new(
        quiet_config(),
        Arc::new(ScriptedStreamer::default()),
        dispatcher_with(listener.clone()),
        Arc::new(BrokenCursorStore {
            fail_save: true,
            ..BrokenCursorStore::default()
        }),
    );
    observer.start().await.unwrap();

    let result = observer.handle_event(payment(7, "700"), "700").await;

    assert!(matches!(result, Err(ObserverError::CursorError(_))));
    assert_eq!(listener.calls.load(Ordering::SeqCst), 1);
    assert_eq!(observer.status().await, ObserverStatus::DatabaseError);

    // Events are refused until the observer recovers.
    let result = observer.handle_event(payment(7, "701"), "701").await;
    assert!(matches!(
        result,
        Err(ObserverError::NotRunning(ObserverStatus::DatabaseError))
    ));
    assert_eq!(listener.calls.load(Ordering::SeqCst), 1);

    observer.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_older_cursor_is_not_saved() {
    let store = Arc::new(MemoryCursorStore::new());
    let observer = PaymentObserver::new(
        quiet_config(),
        Arc::new(ScriptedStreamer::default()),
        dispatcher_with(Arc::new(FlakyListener::new(0))),
        store.clone(),
    );
    observer.start().await.unwrap();

    observer.handle_event(payment(9, "900"), "900").await.unwrap();
    observer.handle_event(payment(8, "800"), "800").await.unwrap();

    assert_eq!(store.load(KEY).await.unwrap().as_deref(), Some("900"));
    observer.shutdown().await;
}
