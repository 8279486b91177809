use crate::ledger::LedgerError;
use crate::observer::cursor::CursorStoreError;
use crate::observer::events::ListenerError;
use crate::observer::status::ObserverStatus;

use serde::Serialize;

/// Errors surfaced by the payment observer
#[allow(clippy::enum_variant_names)]
#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
	#[error("Ledger error: {0}")]
	LedgerError(#[from] LedgerError),

	#[error("Cursor store error: {0}")]
	CursorError(#[from] CursorStoreError),

	#[error("Listener error: {0}")]
	ListenerError(#[from] ListenerError),

	#[error("Observer is not running (status {0})")]
	NotRunning(ObserverStatus),

	#[error("Observer has been shut down")]
	ShutdownError,
}

/// Coarse health of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
	Green,
	Yellow,
	Red,
}

/// Health snapshot of the payment observer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheckResult {
	#[serde(skip)]
	pub name: String,
	pub status: HealthStatus,
	pub streams: Vec<StreamHealth>,
}

/// Health of the single ingestion stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamHealth {
	/// Backend the stream reads from.
	pub account: String,
	pub thread_shutdown: bool,
	pub thread_terminated: bool,
	pub stopped: bool,
	/// Last persisted cursor, `-1` when none.
	pub last_event_id: String,
	pub seconds_since_last_event: String,
}
