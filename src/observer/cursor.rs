//! Cursor persistence.
//!
//! Each backend keeps one resume token under its own key. The file store keeps all keys in a
//! single JSON document that is rewritten through a temporary file on every save.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex as StdMutex, PoisonError};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

pub const HORIZON_CURSOR_KEY: &str = "horizon";
pub const RPC_CURSOR_KEY: &str = "rpc";

#[derive(Debug, thiserror::Error)]
pub enum CursorStoreError {
	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	JsonError(#[from] serde_json::Error),
}

/// Repository for backend cursors
#[async_trait]
pub trait CursorStore: Send + Sync {
	async fn save(&self, key: &str, token: &str) -> Result<(), CursorStoreError>;
	async fn load(&self, key: &str) -> Result<Option<String>, CursorStoreError>;
}

/// Whether `candidate` is strictly ahead of `current`.
///
/// Tokens are compared as `-`-separated numeric parts (Horizon paging tokens have one part, RPC
/// event ids two). Anything that does not parse is compared as a string.
pub fn cursor_is_newer(candidate: &str, current: Option<&str>) -> bool {
	let Some(current) = current else {
		return true;
	};
	match (numeric_parts(candidate), numeric_parts(current)) {
		(Some(a), Some(b)) => a.cmp(&b) == Ordering::Greater,
		_ => candidate > current,
	}
}

fn numeric_parts(token: &str) -> Option<Vec<u128>> {
	token.split('-').map(|part| part.parse::<u128>().ok()).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CursorRecord {
	token: String,
	updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CursorDocument {
	cursors: BTreeMap<String, CursorRecord>,
}

/// File-based implementation of CursorStore
///
/// Nothing is cached. Every save re-reads the document and merges its key under a lock shared by
/// all stores on the same path, so stores for different backends never drop each other's keys.
pub struct FileCursorStore {
	path: PathBuf,
	write_lock: Arc<Mutex<()>>,
}

/// One lock per cursor file path in this process.
fn path_lock(path: &Path) -> Arc<Mutex<()>> {
	static LOCKS: LazyLock<StdMutex<HashMap<PathBuf, Arc<Mutex<()>>>>> =
		LazyLock::new(Default::default);
	let mut locks = LOCKS.lock().unwrap_or_else(PoisonError::into_inner);
	locks.entry(path.to_path_buf()).or_default().clone()
}

impl FileCursorStore {
	pub fn new(path: PathBuf) -> Self {
		Self {
			write_lock: path_lock(&path),
			path,
		}
	}

	async fn read_document(&self) -> Result<CursorDocument, CursorStoreError> {
		match tokio::fs::read_to_string(&self.path).await {
			Ok(contents) if contents.trim().is_empty() => Ok(CursorDocument::default()),
			Ok(contents) => Ok(serde_json::from_str(&contents)?),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				info!("No cursor file at {:?}, starting without cursors", self.path);
				Ok(CursorDocument::default())
			}
			Err(e) => Err(e.into()),
		}
	}

	async fn write_document(&self, document: &CursorDocument) -> Result<(), CursorStoreError> {
		if let Some(parent) = self.path.parent() {
			if !parent.as_os_str().is_empty() {
				tokio::fs::create_dir_all(parent).await?;
			}
		}
		let tmp = self.path.with_extension("json.tmp");
		tokio::fs::write(&tmp, serde_json::to_string_pretty(document)?).await?;
		tokio::fs::rename(&tmp, &self.path).await?;
		Ok(())
	}
}

#[async_trait]
impl CursorStore for FileCursorStore {
	async fn save(&self, key: &str, token: &str) -> Result<(), CursorStoreError> {
		let _guard = self.write_lock.lock().await;
		let mut document = self.read_document().await?;
		document.cursors.insert(
			key.to_string(),
			CursorRecord {
				token: token.to_string(),
				updated_at: Utc::now(),
			},
		);
		self.write_document(&document).await?;

		debug!("Saved {} cursor {} to {:?}", key, token, self.path);
		Ok(())
	}

	async fn load(&self, key: &str) -> Result<Option<String>, CursorStoreError> {
		let _guard = self.write_lock.lock().await;
		let document = self.read_document().await?;
		Ok(document.cursors.get(key).map(|record| record.token.clone()))
	}
}

/// In-memory implementation of CursorStore
#[derive(Default)]
pub struct MemoryCursorStore {
	cursors: RwLock<HashMap<String, String>>,
}

impl MemoryCursorStore {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
	async fn save(&self, key: &str, token: &str) -> Result<(), CursorStoreError> {
		self.cursors
			.write()
			.await
			.insert(key.to_string(), token.to_string());
		Ok(())
	}

	async fn load(&self, key: &str) -> Result<Option<String>, CursorStoreError> {
		Ok(self.cursors.read().await.get(key).cloned())
	}
}
