//! Pending SEP transactions and the stores they live in.
//!
//! The dispatcher only needs two operations from a store: find the transaction waiting for a
//! payment to a given account and memo, and save it back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::observer::accounts::PaymentObservingAccounts;

pub const STATUS_PENDING_SENDER: &str = "pending_sender";
pub const STATUS_PENDING_RECEIVER: &str = "pending_receiver";
pub const STATUS_PENDING_USER_TRANSFER_START: &str = "pending_user_transfer_start";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SepProtocol {
    #[serde(rename = "6")]
    Sep6,
    #[serde(rename = "24")]
    Sep24,
    #[serde(rename = "31")]
    Sep31,
}

impl fmt::Display for SepProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SepProtocol::Sep6 => f.write_str("SEP-6"),
            SepProtocol::Sep24 => f.write_str("SEP-24"),
            SepProtocol::Sep31 => f.write_str("SEP-31"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionKind {
    Deposit,
    DepositExchange,
    Withdrawal,
    WithdrawalExchange,
    Receive,
}

impl TransactionKind {
    /// The anchor sends funds on the ledger for deposits.
    pub fn is_deposit(self) -> bool {
        matches!(self, TransactionKind::Deposit | TransactionKind::DepositExchange)
    }

    pub fn is_withdrawal(self) -> bool {
        matches!(
            self,
            TransactionKind::Withdrawal | TransactionKind::WithdrawalExchange
        )
    }
}

/// One ledger payment recorded against a SEP transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StellarPayment {
    pub id: String,
    pub payment_type: String,
    pub source_account: String,
    pub destination_account: String,
    pub amount: PaymentAmount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAmount {
    pub amount: String,
    pub asset: String,
}

/// A ledger transaction recorded against a SEP transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StellarTransaction {
    /// Transaction hash
    pub id: String,
    pub memo: Option<String>,
    pub memo_type: String,
    pub created_at: DateTime<Utc>,
    pub envelope: String,
    pub payments: Vec<StellarPayment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SepTransaction {
    pub id: String,
    pub protocol: SepProtocol,
    pub kind: TransactionKind,
    pub status: String,
    /// SEP-31 receiving account
    pub to_account: Option<String>,
    /// SEP-6/24 account the user pays into
    pub withdraw_anchor_account: Option<String>,
    pub memo: Option<String>,
    pub memo_type: Option<String>,
    /// `stellar:CODE:ISSUER` or `stellar:native`
    pub amount_in_asset: Option<String>,
    /// Decimal string
    pub amount_expected: Option<String>,
    pub transfer_received_at: Option<DateTime<Utc>>,
    pub stellar_transaction_id: Option<String>,
    #[serde(default)]
    pub stellar_transactions: Vec<StellarTransaction>,
}

impl SepTransaction {
    /// Account an incoming payment is matched against.
    pub fn destination_account(&self) -> Option<&str> {
        match self.protocol {
            SepProtocol::Sep31 => self.to_account.as_deref(),
            SepProtocol::Sep6 | SepProtocol::Sep24 => self.withdraw_anchor_account.as_deref(),
        }
    }

    /// Whether the transaction is still waiting for the user's payment.
    pub fn is_awaiting_payment(&self) -> bool {
        self.status == STATUS_PENDING_SENDER || self.status == STATUS_PENDING_USER_TRANSFER_START
    }

    /// Record a ledger transaction unless one with the same hash is already recorded.
    ///
    /// # Returns
    /// `true` if the record was added.
    pub fn add_stellar_transaction(&mut self, transaction: StellarTransaction) -> bool {
        if self
            .stellar_transactions
            .iter()
            .any(|existing| existing.id == transaction.id)
        {
            return false;
        }
        self.stellar_transactions.push(transaction);
        true
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    BackendError(String),
}

/// Repository for one protocol's transactions
#[async_trait]
pub trait TransactionStore: Send + Sync {
    fn protocol(&self) -> SepProtocol;

    async fn find_by_destination_memo_status(
        &self,
        account: &str,
        memo: &str,
        status: &str,
    ) -> Result<Option<SepTransaction>, StoreError>;

    async fn save(&self, transaction: &SepTransaction) -> Result<(), StoreError>;
}

/// In-memory implementation of TransactionStore
pub struct MemoryTransactionStore {
    protocol: SepProtocol,
    transactions: RwLock<HashMap<String, SepTransaction>>,
    watched: Option<Arc<PaymentObservingAccounts>>,
}

impl MemoryTransactionStore {
    pub fn new(protocol: SepProtocol) -> Self {
        Self {
            protocol,
            transactions: RwLock::new(HashMap::new()),
            watched: None,
        }
    }

    /// Watch the destination of every transaction that starts waiting for a payment.
    pub fn with_watched_accounts(mut self, accounts: Arc<PaymentObservingAccounts>) -> Self {
        self.watched = Some(accounts);
        self
    }

    pub async fn insert(&self, transaction: SepTransaction) {
        if let (Some(accounts), Some(account)) = (&self.watched, transaction.destination_account())
        {
            if transaction.is_awaiting_payment() {
                accounts.watch_transient(account).await;
            }
        }
        self.transactions
            .write()
            .await
            .insert(transaction.id.clone(), transaction);
    }

    pub async fn get(&self, id: &str) -> Option<SepTransaction> {
        self.transactions.read().await.get(id).cloned()
    }
}

#[async_trait]
impl TransactionStore for MemoryTransactionStore {
    fn protocol(&self) -> SepProtocol {
        self.protocol
    }

    async fn find_by_destination_memo_status(
        &self,
        account: &str,
        memo: &str,
        status: &str,
    ) -> Result<Option<SepTransaction>, StoreError> {
        Ok(self
            .transactions
            .read()
            .await
            .values()
            .find(|transaction| {
                transaction.destination_account() == Some(account)
                    && transaction.memo.as_deref() == Some(memo)
                    && transaction.status == status
            })
            .cloned())
    }

    async fn save(&self, transaction: &SepTransaction) -> Result<(), StoreError> {
        self.insert(transaction.clone()).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::accounts::{AccountType, WatchedAccounts};

    fn sep24(id: &str, account: &str, memo: &str) -> SepTransaction {
        SepTransaction {
            id: id.to_string(),
            protocol: SepProtocol::Sep24,
            kind: TransactionKind::Withdrawal,
            status: STATUS_PENDING_USER_TRANSFER_START.to_string(),
            to_account: None,
            withdraw_anchor_account: Some(account.to_string()),
            memo: Some(memo.to_string()),
            memo_type: Some("id".to_string()),
            amount_in_asset: None,
            amount_expected: None,
            transfer_received_at: None,
            stellar_transaction_id: None,
            stellar_transactions: vec![],
        }
    }

    #[tokio::test]
    async fn test_find_matches_account_memo_and_status() {
        let store = MemoryTransactionStore::new(SepProtocol::Sep24);
        store.insert(sep24("a", "GACCOUNT", "1")).await;
        store.insert(sep24("b", "GACCOUNT", "2")).await;

        let found = store
            .find_by_destination_memo_status("GACCOUNT", "2", STATUS_PENDING_USER_TRANSFER_START)
            .await
            .unwrap();
        assert_eq!(found.map(|t| t.id), Some("b".to_string()));

        let wrong_status = store
            .find_by_destination_memo_status("GACCOUNT", "2", STATUS_PENDING_SENDER)
            .await
            .unwrap();
        assert!(wrong_status.is_none());
    }

    #[test]
    fn test_history_is_deduplicated_by_hash() {
        let mut transaction = sep24("a", "GACCOUNT", "1");
        let record = StellarTransaction {
            id: "hash".into(),
            memo: Some("1".into()),
            memo_type: "id".into(),
            created_at: Utc::now(),
            envelope: String::new(),
            payments: vec![],
        };
        assert!(transaction.add_stellar_transaction(record.clone()));
        assert!(!transaction.add_stellar_transaction(record));
        assert_eq!(transaction.stellar_transactions.len(), 1);
    }

    #[test]
    fn test_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&TransactionKind::WithdrawalExchange).unwrap(),
            "\"withdrawal-exchange\""
        );
        assert!(TransactionKind::DepositExchange.is_deposit());
        assert!(!TransactionKind::Receive.is_withdrawal());
    }

    #[tokio::test]
    async fn test_pending_destinations_are_watched() {
        const ACCOUNT: &str = "GDJJRRMBK4IWLEPJGIE6SXD2LP7REGZODU7WDC3I2D6MR37F4XSHBKX2";
        let accounts = Arc::new(PaymentObservingAccounts::new());
        let store =
            MemoryTransactionStore::new(SepProtocol::Sep24).with_watched_accounts(accounts.clone());

        let mut completed = sep24(
            "done",
            "GBBD47IF6LWK7P7MDEVSCWR7DPUWV3NY3DTQEVFL4NAT4AQH3ZLLFLA5",
            "1",
        );
        completed.status = STATUS_PENDING_RECEIVER.to_string();
        store.insert(completed).await;
        assert!(accounts.is_empty().await);

        store.insert(sep24("a", ACCOUNT, "2")).await;
        assert!(accounts.lookup_and_update(ACCOUNT).await);
        assert_eq!(accounts.list().await[0].account_type, AccountType::Transient);
    }
}
