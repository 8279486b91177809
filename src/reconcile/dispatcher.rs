//! Reconciliation of observed payments with pending SEP transactions.
//!
//! The dispatcher is a [`PaymentListener`]. For every payment it looks for a pending transaction
//! of each protocol in turn (SEP-31, then SEP-24, then SEP-6) keyed by destination account, memo
//! and awaiting-funds status. Muxed destinations carry their memo in the address, so a miss is
//! retried with the base account and the muxed id. The first match is recorded and reported to
//! the platform.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::PlatformConfig;
use crate::ledger::address::{decode_muxed, is_contract};
use crate::ledger::{Memo, PaymentTransferEvent};
use crate::observer::events::{ListenerError, PaymentListener};
use crate::reconcile::notifier::{NotifyError, PlatformNotifier};
use crate::reconcile::store::{
    PaymentAmount, STATUS_PENDING_RECEIVER, STATUS_PENDING_SENDER,
    STATUS_PENDING_USER_TRANSFER_START, SepProtocol,
    SepTransaction, StellarPayment, StellarTransaction, StoreError, TransactionStore,
};
use crate::utils::{format_stellar_amount, parse_stellar_amount};

impl From<StoreError> for ListenerError {
    fn from(e: StoreError) -> Self {
        ListenerError::StoreError(e.to_string())
    }
}

impl From<NotifyError> for ListenerError {
    fn from(e: NotifyError) -> Self {
        ListenerError::NotifyError(e.to_string())
    }
}

/// Whether the dispatcher should look at `event` at all.
///
/// Payments without a hash, without a memo (unless the destination is muxed) or in an asset the
/// anchor cannot hold are ignored.
pub fn validate(event: &PaymentTransferEvent) -> bool {
    if event.tx_hash.is_empty() {
        debug!("Payment {} has no transaction hash", event.operation_id);
        return false;
    }
    if event.memo().is_blank() && decode_muxed(&event.to).is_none() {
        debug!("Payment {} has no memo", event.operation_id);
        return false;
    }
    if !event.asset.is_supported() {
        debug!(
            "Payment {} is not in a native or issued asset: {}",
            event.operation_id, event.asset
        );
        return false;
    }
    true
}

/// Memo as stored on SEP transactions. Hash memos are kept base64 encoded.
fn memo_match_value(memo: &Memo) -> Option<String> {
    memo.value().filter(|value| !value.is_empty())
}

/// Matches payments to pending SEP-31/24/6 transactions.
pub struct PaymentDispatcher {
    sep31_store: Option<Arc<dyn TransactionStore>>,
    sep24_store: Option<Arc<dyn TransactionStore>>,
    sep6_store: Option<Arc<dyn TransactionStore>>,
    notifier: Arc<dyn PlatformNotifier>,
    funds_received_message: String,
    funds_sent_message: String,
}

impl PaymentDispatcher {
    pub fn new(notifier: Arc<dyn PlatformNotifier>, platform: &PlatformConfig) -> Self {
        Self {
            sep31_store: None,
            sep24_store: None,
            sep6_store: None,
            notifier,
            funds_received_message: platform.funds_received_message.clone(),
            funds_sent_message: platform.funds_sent_message.clone(),
        }
    }

    /// Register the store of the protocol it serves.
    pub fn with_store(mut self, store: Arc<dyn TransactionStore>) -> Self {
        match store.protocol() {
            SepProtocol::Sep31 => self.sep31_store = Some(store),
            SepProtocol::Sep24 => self.sep24_store = Some(store),
            SepProtocol::Sep6 => self.sep6_store = Some(store),
        }
        self
    }

    fn stores(&self) -> impl Iterator<Item = &Arc<dyn TransactionStore>> {
        [&self.sep31_store, &self.sep24_store, &self.sep6_store]
            .into_iter()
            .flatten()
    }

    /// Memo to match `event` with for `protocol`.
    ///
    /// Contract transfers to a muxed address carry no classic memo, so SEP-24 and SEP-6 take it
    /// from the muxed id.
    fn event_memo(event: &PaymentTransferEvent, protocol: SepProtocol) -> Option<String> {
        if protocol != SepProtocol::Sep31 && is_contract(&event.from) {
            if let Some(muxed) = decode_muxed(&event.to) {
                return Some(muxed.id.to_string());
            }
        }
        memo_match_value(event.memo())
    }

    async fn find_match(
        store: &dyn TransactionStore,
        event: &PaymentTransferEvent,
    ) -> Result<Option<SepTransaction>, StoreError> {
        let protocol = store.protocol();
        let status = match protocol {
            SepProtocol::Sep31 => STATUS_PENDING_SENDER,
            SepProtocol::Sep24 | SepProtocol::Sep6 => STATUS_PENDING_USER_TRANSFER_START,
        };

        if let Some(memo) = Self::event_memo(event, protocol) {
            if let Some(found) = store
                .find_by_destination_memo_status(&event.to, &memo, status)
                .await?
            {
                return Ok(Some(found));
            }
        }

        match decode_muxed(&event.to) {
            Some(muxed) => {
                store
                    .find_by_destination_memo_status(
                        &muxed.base_account,
                        &muxed.id.to_string(),
                        status,
                    )
                    .await
            }
            None => Ok(None),
        }
    }

    fn history_record(event: &PaymentTransferEvent) -> StellarTransaction {
        let ledger_transaction = &event.ledger_transaction;
        let operation = ledger_transaction
            .operations
            .iter()
            .find(|operation| operation.id() == event.operation_id);

        StellarTransaction {
            id: event.tx_hash.clone(),
            memo: memo_match_value(&ledger_transaction.memo),
            memo_type: ledger_transaction.memo.type_name().to_string(),
            created_at: ledger_transaction.created_at,
            envelope: ledger_transaction.envelope_xdr.clone(),
            payments: vec![StellarPayment {
                id: event.operation_id.clone(),
                payment_type: operation
                    .map(|operation| operation.type_name())
                    .unwrap_or("payment")
                    .to_string(),
                source_account: operation
                    .map(|operation| operation.source_account().to_string())
                    .unwrap_or_else(|| event.from.clone()),
                destination_account: event.to.clone(),
                amount: PaymentAmount {
                    amount: format_stellar_amount(event.amount),
                    asset: event.asset.canonical_name(),
                },
            }],
        }
    }

    /// Log when the payment differs from what the transaction expects. Never fails.
    fn check_amount(transaction: &SepTransaction, event: &PaymentTransferEvent) {
        let paid_asset = format!("stellar:{}", event.asset.canonical_name());
        if let Some(expected_asset) = &transaction.amount_in_asset {
            if *expected_asset != paid_asset {
                warn!(
                    "Payment asset {} does not match the expected asset {} of transaction {}",
                    paid_asset, expected_asset, transaction.id
                );
            }
        }

        let Some(expected) = transaction.amount_expected.as_deref() else {
            return;
        };
        match parse_stellar_amount(expected) {
            Ok(expected) if event.amount >= expected => debug!(
                "Incoming payment for {} transaction {} covers the expected amount",
                transaction.protocol, transaction.id
            ),
            Ok(expected) => warn!(
                "The incoming payment amount was insufficient. Expected: {}, received: {}",
                format_stellar_amount(expected),
                format_stellar_amount(event.amount)
            ),
            Err(e) => warn!(
                "Transaction {} has an unreadable expected amount {}: {}",
                transaction.id, expected, e
            ),
        }
    }

    async fn notify(
        &self,
        transaction: &SepTransaction,
        event: &PaymentTransferEvent,
    ) -> Result<(), NotifyError> {
        let amount = format_stellar_amount(event.amount);
        let funds_received = match transaction.protocol {
            SepProtocol::Sep31 => true,
            SepProtocol::Sep24 | SepProtocol::Sep6 if transaction.kind.is_deposit() => false,
            SepProtocol::Sep24 | SepProtocol::Sep6 if transaction.kind.is_withdrawal() => true,
            _ => {
                warn!(
                    "{} transaction kind {:?} is not supported",
                    transaction.protocol, transaction.kind
                );
                return Ok(());
            }
        };

        if funds_received {
            self.notifier
                .notify_onchain_funds_received(
                    &transaction.id,
                    &event.tx_hash,
                    &amount,
                    &self.funds_received_message,
                )
                .await
        } else {
            self.notifier
                .notify_onchain_funds_sent(&transaction.id, &event.tx_hash, &self.funds_sent_message)
                .await
        }
    }

    async fn handle_match(
        &self,
        store: &dyn TransactionStore,
        mut transaction: SepTransaction,
        event: &PaymentTransferEvent,
    ) -> Result<(), ListenerError> {
        Self::check_amount(&transaction, event);

        if !transaction.add_stellar_transaction(Self::history_record(event)) {
            debug!(
                "Transaction {} already records ledger transaction {}",
                transaction.id, event.tx_hash
            );
        }
        transaction.transfer_received_at = Some(event.ledger_transaction.created_at);
        transaction.stellar_transaction_id = Some(event.tx_hash.clone());
        if transaction.protocol == SepProtocol::Sep31 {
            transaction.status = STATUS_PENDING_RECEIVER.to_string();
        }
        store.save(&transaction).await?;

        info!(
            "Payment {} matched {} transaction {}",
            event.operation_id, transaction.protocol, transaction.id
        );
        self.notify(&transaction, event).await?;
        Ok(())
    }
}

#[async_trait]
impl PaymentListener for PaymentDispatcher {
    async fn on_received(&self, event: &PaymentTransferEvent) -> Result<(), ListenerError> {
        debug!(
            "Received payment {} of {} {} to {}",
            event.operation_id,
            format_stellar_amount(event.amount),
            event.asset,
            event.to
        );
        if !validate(event) {
            return Ok(());
        }

        for store in self.stores() {
            let Some(transaction) = Self::find_match(store.as_ref(), event).await? else {
                continue;
            };
            let transaction_id = transaction.id.clone();
            match self.handle_match(store.as_ref(), transaction, event).await {
                Ok(()) => return Ok(()),
                Err(ListenerError::NotifyError(e)) => {
                    error!(
                        "Error notifying the {} transaction {}: {}",
                        store.protocol(),
                        transaction_id,
                        e
                    );
                }
                Err(e) => return Err(e),
            }
        }

        debug!(
            "No pending transaction matches payment {} at {}",
            event.operation_id,
            Utc::now()
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "PaymentDispatcher"
    }
}
