//! Accounts the observer cares about.
//!
//! Ledger traffic is filtered down to payments touching a watched account before any transaction
//! is fetched. Distribution accounts are residential and stay forever. Accounts added for a
//! pending transaction are transient and are evicted once they have gone unobserved for longer
//! than the configured idle time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::ledger::address::base_account;

/// Registry consulted by the streamers.
#[async_trait]
pub trait WatchedAccounts: Send + Sync {
    /// Whether `account` is watched. A hit refreshes the account's last-observed time.
    async fn lookup_and_update(&self, account: &str) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountType {
    /// Never evicted
    Residential,
    /// Evicted after the idle time
    Transient,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservingAccount {
    pub account: String,
    pub last_observed: DateTime<Utc>,
    pub account_type: AccountType,
}

impl ObservingAccount {
    pub fn new(account: &str, account_type: AccountType) -> Self {
        Self {
            account: account.to_string(),
            last_observed: Utc::now(),
            account_type,
        }
    }
}

/// In-memory watched account registry keyed by base account.
#[derive(Default)]
pub struct PaymentObservingAccounts {
    accounts: RwLock<HashMap<String, ObservingAccount>>,
}

impl PaymentObservingAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with residential accounts.
    pub async fn with_residential(accounts: &[String]) -> Self {
        let registry = Self::new();
        for account in accounts {
            registry.upsert(account, AccountType::Residential).await;
        }
        registry
    }

    pub async fn upsert(&self, account: &str, account_type: AccountType) {
        self.upsert_account(ObservingAccount::new(account, account_type))
            .await;
    }

    /// Insert or replace an account. Muxed addresses are stored under their base account.
    pub async fn upsert_account(&self, mut account: ObservingAccount) {
        account.account = base_account(&account.account);
        debug!(
            "Watching account {} ({:?})",
            account.account, account.account_type
        );
        self.accounts
            .write()
            .await
            .insert(account.account.clone(), account);
    }

    /// Watch `account` until it goes idle. An account that is already watched keeps its type and
    /// only has its last-observed time refreshed.
    pub async fn watch_transient(&self, account: &str) {
        let key = base_account(account);
        let mut accounts = self.accounts.write().await;
        match accounts.get_mut(&key) {
            Some(entry) => entry.last_observed = Utc::now(),
            None => {
                debug!("Watching transient account {}", key);
                let entry = ObservingAccount::new(&key, AccountType::Transient);
                accounts.insert(key, entry);
            }
        }
    }

    /// Drop transient accounts not observed within `max_idle`.
    ///
    /// # Returns
    /// The number of evicted accounts.
    pub async fn evict(&self, max_idle: Duration) -> usize {
        let max_idle = chrono::Duration::from_std(max_idle).unwrap_or(chrono::Duration::MAX);
        let now = Utc::now();
        let mut accounts = self.accounts.write().await;
        let before = accounts.len();
        accounts.retain(|_, account| {
            account.account_type == AccountType::Residential
                || now.signed_duration_since(account.last_observed) < max_idle
        });
        let evicted = before - accounts.len();
        if evicted > 0 {
            info!("Evicted {} idle watched accounts", evicted);
        }
        evicted
    }

    pub async fn len(&self) -> usize {
        self.accounts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.accounts.read().await.is_empty()
    }

    pub async fn list(&self) -> Vec<ObservingAccount> {
        self.accounts.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl WatchedAccounts for PaymentObservingAccounts {
    async fn lookup_and_update(&self, account: &str) -> bool {
        let key = base_account(account);
        match self.accounts.write().await.get_mut(&key) {
            Some(entry) => {
                entry.last_observed = Utc::now();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACCOUNT_1: &str = "GBBD47IF6LWK7P7MDEVSCWR7DPUWV3NY3DTQEVFL4NAT4AQH3ZLLFLA5";
    const ACCOUNT_2: &str = "GDJJRRMBK4IWLEPJGIE6SXD2LP7REGZODU7WDC3I2D6MR37F4XSHBKX2";
    const BASE: &str = "GADQOBYHA4DQOBYHA4DQOBYHA4DQOBYHA4DQOBYHA4DQOBYHA4DQOZPI";
    const MUXED: &str = "MADQOBYHA4DQOBYHA4DQOBYHA4DQOBYHA4DQOBYHA4DQOBYHA4DQOAAAAAAAAAAAFKY6G";

    fn aged(account: &str, hours: i64, account_type: AccountType) -> ObservingAccount {
        ObservingAccount {
            account: account.to_string(),
            last_observed: Utc::now() - chrono::Duration::hours(hours),
            account_type,
        }
    }

    #[tokio::test]
    async fn test_add_and_lookup() {
        let accounts = PaymentObservingAccounts::new();
        accounts.upsert(ACCOUNT_1, AccountType::Transient).await;
        accounts.upsert(ACCOUNT_1, AccountType::Transient).await;
        accounts.upsert(BASE, AccountType::Transient).await;
        assert_eq!(accounts.len().await, 2);

        assert!(accounts.lookup_and_update(ACCOUNT_1).await);
        assert!(accounts.lookup_and_update(MUXED).await);
        assert!(!accounts.lookup_and_update(ACCOUNT_2).await);
    }

    #[tokio::test]
    async fn test_eviction_spares_residential_and_recent() {
        let accounts = PaymentObservingAccounts::new();
        accounts.upsert(ACCOUNT_1, AccountType::Transient).await;
        accounts
            .upsert_account(aged(ACCOUNT_2, 48, AccountType::Transient))
            .await;
        accounts
            .upsert_account(aged(MUXED, 2400, AccountType::Residential))
            .await;

        assert_eq!(accounts.evict(Duration::from_secs(50 * 3600)).await, 0);
        assert_eq!(accounts.evict(Duration::from_secs(47 * 3600)).await, 1);
        assert!(!accounts.lookup_and_update(ACCOUNT_2).await);

        assert_eq!(accounts.evict(Duration::ZERO).await, 1);
        assert_eq!(accounts.len().await, 1);
        assert!(accounts.lookup_and_update(BASE).await);
    }

    #[tokio::test]
    async fn test_transient_watch_keeps_residential_accounts() {
        let accounts = PaymentObservingAccounts::with_residential(&[ACCOUNT_1.to_string()]).await;
        accounts.watch_transient(ACCOUNT_1).await;
        accounts.watch_transient(MUXED).await;
        assert_eq!(accounts.len().await, 2);

        assert_eq!(accounts.evict(Duration::ZERO).await, 1);
        assert!(accounts.lookup_and_update(ACCOUNT_1).await);
        assert!(!accounts.lookup_and_update(BASE).await);
    }
}
