//! Payment observer orchestrator.
//!
//! This module defines the `PaymentObserver`, which owns one backend streamer and drives it
//! through the observer lifecycle. It is responsible for:
//! - Starting the stream at the persisted cursor and restarting it after failures
//! - Fanning every accepted payment out to the registered listeners
//! - Persisting the cursor only after every listener accepted the event
//! - Watching for silence and running the per-status recovery policy on a fixed tick
//! - Exposing a health snapshot
//!
//! Three activities run concurrently: the stream task, the silence watcher and the status
//! watcher. They share the status, timestamps and backoff counters through a single mutex.

use crate::config::ObserverConfig;
use crate::ledger::PaymentTransferEvent;
use crate::observer::{
    backoff::{BackoffPolicy, BackoffTimer, wait},
    cursor::{CursorStore, cursor_is_newer},
    events::EventDispatcher,
    progress_tracker::{ObserverProgressTracker, ObserverStats},
    status::ObserverStatus,
    strategies::{PaymentStreamer, StreamSink},
    types::{HealthCheckResult, HealthStatus, ObserverError, StreamHealth},
};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long a stopping stream task may take to wind down before it is aborted.
const STREAM_STOP_TIMEOUT: Duration = Duration::from_secs(5);

pub const OBSERVER_HEALTH_NAME: &str = "payment_observer";

struct StreamHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct ObserverState {
    status: ObserverStatus,
    last_activity: Instant,
    silence_retries: u32,
    stream_backoff: BackoffTimer,
    publisher_backoff: BackoffTimer,
    database_backoff: BackoffTimer,
    /// Last persisted cursor of the current run
    cursor: Option<String>,
    progress: ObserverProgressTracker,
    stream: Option<StreamHandle>,
}

impl ObserverState {
    fn new(config: &ObserverConfig) -> Self {
        Self {
            status: ObserverStatus::Running,
            last_activity: Instant::now(),
            silence_retries: 0,
            stream_backoff: BackoffTimer::new(BackoffPolicy::from_secs(
                config.initial_stream_backoff_time,
                config.max_stream_backoff_time,
            )),
            publisher_backoff: BackoffTimer::new(BackoffPolicy::from_secs(
                config.initial_event_backoff_time,
                config.max_event_backoff_time,
            )),
            database_backoff: BackoffTimer::new(BackoffPolicy::from_secs(
                config.initial_database_backoff_time,
                config.max_database_backoff_time,
            )),
            cursor: None,
            progress: ObserverProgressTracker::new(),
            stream: None,
        }
    }

    /// Move to `next` if the transition table allows it.
    fn transition(&mut self, next: ObserverStatus) -> bool {
        if self.status == next {
            return true;
        }
        if self.status.can_transition_to(next) {
            info!("Setting status to {}", next);
            self.status = next;
            true
        } else {
            warn!(
                "Cannot set status to {} while the current status is {}",
                next, self.status
            );
            false
        }
    }

    fn record_activity(&mut self) {
        self.last_activity = Instant::now();
        self.silence_retries = 0;
        self.stream_backoff.reset();
    }
}

struct ObserverCore {
    config: ObserverConfig,
    streamer: Arc<dyn PaymentStreamer>,
    dispatcher: EventDispatcher,
    cursor_store: Arc<dyn CursorStore>,
    state: Mutex<ObserverState>,
    /// Serializes stream stop/start
    restart_lock: Mutex<()>,
    /// Cancelled once on shutdown; stops the watchers and any backoff wait
    shutdown: CancellationToken,
}

impl ObserverCore {
    async fn set_status(&self, next: ObserverStatus) -> bool {
        self.state.lock().await.transition(next)
    }

    async fn status(&self) -> ObserverStatus {
        self.state.lock().await.status
    }

    /// Load the cursor, resolve the start point and spawn the stream task.
    async fn start_stream(self: &Arc<Self>) -> Result<(), ObserverError> {
        let key = self.streamer.cursor_key();
        info!("Loading the last stored {} cursor", key);
        let stored = match self.cursor_store.load(key).await {
            Ok(stored) => stored,
            Err(e) => {
                error!("Cannot load the {} cursor: {}", key, e);
                self.set_status(ObserverStatus::DatabaseError).await;
                return Err(e.into());
            }
        };
        info!("The last stored {} cursor is {:?}", key, stored);
        self.state.lock().await.database_backoff.reset();

        let start = match self.streamer.resolve_start_cursor(stored).await {
            Ok(start) => start,
            Err(e) => {
                error!("Cannot resolve the start cursor: {}", e);
                self.set_status(ObserverStatus::StreamError).await;
                return Err(e.into());
            }
        };

        let mut state = self.state.lock().await;
        if self.shutdown.is_cancelled() || !state.transition(ObserverStatus::Running) {
            return Err(ObserverError::NotRunning(state.status));
        }
        state.cursor = start.clone();
        if let Some(previous) = state.stream.take() {
            warn!("Replacing a stream of {} that was still running", self.streamer.name());
            previous.cancel.cancel();
            previous.task.abort();
        }

        info!("Starting {} at cursor {:?}", self.streamer.name(), start);
        let cancel = self.shutdown.child_token();
        let core = Arc::clone(self);
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let sink: Arc<dyn StreamSink> = core.clone();
            let result = core.streamer.run(start, sink, task_cancel.clone()).await;
            core.on_stream_end(result, &task_cancel).await;
        });
        state.stream = Some(StreamHandle { cancel, task });
        Ok(())
    }

    async fn on_stream_end(&self, result: Result<(), ObserverError>, cancel: &CancellationToken) {
        if cancel.is_cancelled() {
            debug!("Stream of {} stopped", self.streamer.name());
            return;
        }
        match result {
            Ok(()) => {
                warn!("Stream of {} ended unexpectedly", self.streamer.name());
                self.set_status(ObserverStatus::StreamError).await;
            }
            Err(ObserverError::LedgerError(e)) => {
                error!("Stream of {} failed: {}", self.streamer.name(), e);
                self.set_status(ObserverStatus::StreamError).await;
            }
            // The status was already set by whoever raised the error.
            Err(e) => debug!("Stream of {} stopped: {}", self.streamer.name(), e),
        }
    }

    async fn stop_stream(&self) {
        let handle = self.state.lock().await.stream.take();
        let Some(mut handle) = handle else {
            return;
        };
        info!("Stopping the stream of {}", self.streamer.name());
        handle.cancel.cancel();
        if tokio::time::timeout(STREAM_STOP_TIMEOUT, &mut handle.task)
            .await
            .is_err()
        {
            warn!("Stream task did not stop in time, aborting it");
            handle.task.abort();
        }
    }

    /// Stop and start the stream. Backoff timers are left as they are.
    async fn restart(self: &Arc<Self>) {
        let _guard = self.restart_lock.lock().await;
        info!("Restarting the payment observer");
        self.stop_stream().await;
        if let Err(e) = self.start_stream().await {
            warn!("Restart failed: {}", e);
        }
    }

    async fn shutdown(&self) {
        info!("Shutting down the payment observer");
        self.shutdown.cancel();
        let _guard = self.restart_lock.lock().await;
        self.stop_stream().await;
        let mut state = self.state.lock().await;
        state.transition(ObserverStatus::Shutdown);
        state.progress.log_progress(true);
    }

    async fn check_silence(&self) {
        let mut state = self.state.lock().await;
        if !state.status.is_healthy() {
            return;
        }
        let silence = state.last_activity.elapsed();
        if silence > self.config.silence_timeout() {
            debug!(
                "The observer had been silent for {} seconds. Setting status to SILENCE_ERROR",
                silence.as_secs()
            );
            state.transition(ObserverStatus::SilenceError);
        } else {
            debug!("The observer had been silent for {} seconds", silence.as_secs());
        }
    }

    /// Wait for `delay`, then restart. Returns early on shutdown.
    async fn backoff_and_restart(self: &Arc<Self>, delay: Duration) {
        if wait(delay, &self.shutdown).await {
            self.restart().await;
        }
    }

    async fn check_status(self: &Arc<Self>) {
        match self.status().await {
            ObserverStatus::NeedsShutdown => {
                info!("Shutting down the observer");
                self.shutdown().await;
            }
            ObserverStatus::StreamError => {
                let delay = {
                    let mut state = self.state.lock().await;
                    if state.stream_backoff.is_maxed() {
                        info!("The stream backoff timer is maxed. Shutting down the observer");
                        state.transition(ObserverStatus::NeedsShutdown);
                        return;
                    }
                    state.stream_backoff.next_delay()
                };
                info!("The stream needs a restart. Backing off {} seconds", delay.as_secs());
                self.backoff_and_restart(delay).await;
            }
            ObserverStatus::SilenceError => {
                let retries = self.config.silence_timeout_retries;
                {
                    let mut state = self.state.lock().await;
                    info!("The silence reconnection count: {}", state.silence_retries);
                    if retries > 0 && state.silence_retries >= retries {
                        info!(
                            "The silence error happened {} times. Shutting down the observer",
                            state.silence_retries
                        );
                        state.transition(ObserverStatus::NeedsShutdown);
                        return;
                    }
                }
                self.restart().await;
                let mut state = self.state.lock().await;
                state.last_activity = Instant::now();
                state.silence_retries += 1;
            }
            ObserverStatus::PublisherError => {
                let delay = self.state.lock().await.publisher_backoff.next_delay();
                info!("Backing off the publisher {} seconds", delay.as_secs());
                self.backoff_and_restart(delay).await;
            }
            ObserverStatus::DatabaseError => {
                let delay = {
                    let mut state = self.state.lock().await;
                    if state.database_backoff.is_maxed() {
                        info!("The database backoff timer is maxed. Shutting down the observer");
                        state.transition(ObserverStatus::NeedsShutdown);
                        return;
                    }
                    state.database_backoff.next_delay()
                };
                info!("Backing off the database {} seconds", delay.as_secs());
                self.backoff_and_restart(delay).await;
            }
            ObserverStatus::Running | ObserverStatus::Shutdown => {}
        }
    }

    /// Persist `cursor` if it is ahead of the last saved one.
    async fn advance_cursor(&self, cursor: &str) -> Result<(), ObserverError> {
        let current = self.state.lock().await.cursor.clone();
        if !cursor_is_newer(cursor, current.as_deref()) {
            return Ok(());
        }
        match self
            .cursor_store
            .save(self.streamer.cursor_key(), cursor)
            .await
        {
            Ok(()) => {
                let mut state = self.state.lock().await;
                state.cursor = Some(cursor.to_string());
                state.database_backoff.reset();
                Ok(())
            }
            Err(e) => {
                error!("Cannot save the cursor {}: {}", cursor, e);
                self.set_status(ObserverStatus::DatabaseError).await;
                Err(e.into())
            }
        }
    }

    async fn ensure_running(&self) -> Result<(), ObserverError> {
        let status = self.status().await;
        if status.is_healthy() {
            Ok(())
        } else {
            Err(ObserverError::NotRunning(status))
        }
    }
}

#[async_trait::async_trait]
impl StreamSink for ObserverCore {
    async fn on_event(&self, event: PaymentTransferEvent, cursor: &str) -> Result<(), ObserverError> {
        let ledger = u64::from(event.ledger_transaction.ledger);
        {
            let state = self.state.lock().await;
            if !state.status.is_healthy() {
                warn!(
                    "Observer is not healthy ({}). Ignoring event {}",
                    state.status, event.operation_id
                );
                return Err(ObserverError::NotRunning(state.status));
            }
        }

        if let Err(e) = self.dispatcher.dispatch(&event).await {
            error!("Failed to send event {} to payment listeners", event.operation_id);
            self.set_status(ObserverStatus::PublisherError).await;
            return Err(e.into());
        }

        {
            let mut state = self.state.lock().await;
            state.record_activity();
            state.publisher_backoff.reset();
            state.progress.record_read(ledger);
            state.progress.record_processed(ledger, &event.operation_id);
            state.progress.log_progress(false);
        }
        self.advance_cursor(cursor).await
    }

    async fn on_progress(&self, cursor: &str, ledger: Option<u32>) -> Result<(), ObserverError> {
        self.ensure_running().await?;
        {
            let mut state = self.state.lock().await;
            state.record_activity();
            if let Some(ledger) = ledger {
                state.progress.record_read(u64::from(ledger));
            }
        }
        self.advance_cursor(cursor).await
    }
}

/// Observes one ledger backend and forwards payments to listeners.
pub struct PaymentObserver {
    core: Arc<ObserverCore>,
    watchers: Mutex<Vec<JoinHandle<()>>>,
}

impl PaymentObserver {
    pub fn new(
        config: ObserverConfig,
        streamer: Arc<dyn PaymentStreamer>,
        dispatcher: EventDispatcher,
        cursor_store: Arc<dyn CursorStore>,
    ) -> Self {
        let state = ObserverState::new(&config);
        Self {
            core: Arc::new(ObserverCore {
                config,
                streamer,
                dispatcher,
                cursor_store,
                state: Mutex::new(state),
                restart_lock: Mutex::new(()),
                shutdown: CancellationToken::new(),
            }),
            watchers: Mutex::new(Vec::new()),
        }
    }

    /// Start the stream and the silence and status watchers.
    ///
    /// A failure to start the stream is not returned: it leaves the observer in an error status
    /// that the status watcher recovers from. Calling `start` again on a started observer does
    /// nothing.
    ///
    /// # Errors
    /// [`ObserverError::ShutdownError`] if the observer was already shut down.
    pub async fn start(&self) -> Result<(), ObserverError> {
        if self.core.shutdown.is_cancelled() {
            return Err(ObserverError::ShutdownError);
        }
        // Held for the whole start so concurrent calls see the watchers of the first one.
        let mut watchers = self.watchers.lock().await;
        if !watchers.is_empty() {
            debug!("The payment observer is already started");
            return Ok(());
        }
        info!("Starting the payment observer");
        self.core.state.lock().await.last_activity = Instant::now();
        {
            let _guard = self.core.restart_lock.lock().await;
            if let Err(e) = self.core.start_stream().await {
                warn!("The stream did not start: {}", e);
            }
        }

        info!("Starting the observer silence watcher");
        let core = self.core.clone();
        let interval = self.core.config.silence_check_interval();
        watchers.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = core.shutdown.cancelled() => break,
                    _ = ticker.tick() => core.check_silence().await,
                }
            }
        }));

        info!("Starting the status watcher");
        let core = self.core.clone();
        let interval = self.core.config.status_check_interval();
        watchers.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = core.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => core.check_status().await,
                }
            }
        }));

        Ok(())
    }

    /// Stop the stream and both watchers. Terminal and idempotent.
    pub async fn shutdown(&self) {
        self.core.shutdown().await;
    }

    /// Resolves once the observer has been shut down, by a caller or by its own recovery policy.
    pub async fn stopped(&self) {
        self.core.shutdown.cancelled().await;
    }

    pub async fn status(&self) -> ObserverStatus {
        self.core.status().await
    }

    pub async fn stats(&self) -> ObserverStats {
        self.core.state.lock().await.progress.get_stats()
    }

    /// Last cursor persisted in the current run.
    pub async fn cursor(&self) -> Option<String> {
        self.core.state.lock().await.cursor.clone()
    }

    /// Run one silence check now.
    pub async fn check_silence(&self) {
        self.core.check_silence().await;
    }

    /// Run one status check now.
    pub async fn check_status(&self) {
        self.core.check_status().await;
    }

    /// Deliver an event as if it came from the stream.
    pub async fn handle_event(
        &self,
        event: PaymentTransferEvent,
        cursor: &str,
    ) -> Result<(), ObserverError> {
        self.core.on_event(event, cursor).await
    }

    pub async fn health(&self) -> HealthCheckResult {
        let state = self.core.state.lock().await;
        let shut_down = self.core.shutdown.is_cancelled();
        let mut status = state.status.health();

        let (thread_terminated, stopped) = match &state.stream {
            Some(handle) => (handle.task.is_finished(), handle.cancel.is_cancelled()),
            None => (true, true),
        };
        if shut_down || (state.stream.is_some() && stopped) {
            status = HealthStatus::Red;
        }

        HealthCheckResult {
            name: OBSERVER_HEALTH_NAME.to_string(),
            status,
            streams: vec![StreamHealth {
                account: self.core.streamer.cursor_key().to_string(),
                thread_shutdown: shut_down,
                thread_terminated,
                stopped,
                last_event_id: state.cursor.clone().unwrap_or_else(|| "-1".to_string()),
                seconds_since_last_event: state.last_activity.elapsed().as_secs().to_string(),
            }],
        }
    }
}
