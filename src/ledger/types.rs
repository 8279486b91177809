//! Canonical ledger types shared by both backends

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use stellar_xdr::curr::{Hash, Limits, WriteXdr};

use crate::ledger::toid::ToidError;

/// Transaction memo as attached to a classic Stellar transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Memo {
    #[default]
    None,
    Text(String),
    Id(u64),
    Hash([u8; 32]),
    Return([u8; 32]),
}

impl Memo {
    /// String form used to match pending transactions.
    ///
    /// Text is returned as is, ids in decimal, hash and return memos base64 encoded the way
    /// Horizon renders them.
    pub fn value(&self) -> Option<String> {
        match self {
            Memo::None => None,
            Memo::Text(text) => Some(text.clone()),
            Memo::Id(id) => Some(id.to_string()),
            Memo::Hash(bytes) | Memo::Return(bytes) => {
                Hash(*bytes).to_xdr_base64(Limits::none()).ok()
            }
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Memo::None => "none",
            Memo::Text(_) => "text",
            Memo::Id(_) => "id",
            Memo::Hash(_) => "hash",
            Memo::Return(_) => "return",
        }
    }

    /// True when the memo carries nothing usable for matching.
    pub fn is_blank(&self) -> bool {
        match self {
            Memo::None => true,
            Memo::Text(text) => text.is_empty(),
            _ => false,
        }
    }
}

/// A ledger asset. Anything other than native and the two credit shapes is kept as
/// `Unsupported` so it can be filtered without failing the parse.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Asset {
    Native,
    CreditAlphanum4 { code: String, issuer: String },
    CreditAlphanum12 { code: String, issuer: String },
    Unsupported(String),
}

impl Asset {
    /// Build a credit asset, choosing the 4 or 12 variant from the code length.
    pub fn credit(code: &str, issuer: &str) -> Self {
        if code.len() <= 4 {
            Asset::CreditAlphanum4 {
                code: code.to_string(),
                issuer: issuer.to_string(),
            }
        } else {
            Asset::CreditAlphanum12 {
                code: code.to_string(),
                issuer: issuer.to_string(),
            }
        }
    }

    /// Build from Horizon's `asset_type`/`asset_code`/`asset_issuer` fields.
    pub fn from_horizon(asset_type: &str, code: Option<&str>, issuer: Option<&str>) -> Self {
        match (asset_type, code, issuer) {
            ("native", _, _) => Asset::Native,
            ("credit_alphanum4", Some(code), Some(issuer)) => Asset::CreditAlphanum4 {
                code: code.to_string(),
                issuer: issuer.to_string(),
            },
            ("credit_alphanum12", Some(code), Some(issuer)) => Asset::CreditAlphanum12 {
                code: code.to_string(),
                issuer: issuer.to_string(),
            },
            (other, _, _) => Asset::Unsupported(other.to_string()),
        }
    }

    /// Parse a SEP-11 canonical name (`native` or `CODE:ISSUER`).
    pub fn from_canonical(name: &str) -> Self {
        if name == "native" {
            return Asset::Native;
        }
        match name.split_once(':') {
            Some((code, issuer)) if !code.is_empty() && code.len() <= 12 && !issuer.is_empty() => {
                Asset::credit(code, issuer)
            }
            _ => Asset::Unsupported(name.to_string()),
        }
    }

    pub fn asset_type(&self) -> &str {
        match self {
            Asset::Native => "native",
            Asset::CreditAlphanum4 { .. } => "credit_alphanum4",
            Asset::CreditAlphanum12 { .. } => "credit_alphanum12",
            Asset::Unsupported(asset_type) => asset_type,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Asset::Unsupported(_))
    }

    /// SEP-11 canonical name.
    pub fn canonical_name(&self) -> String {
        match self {
            Asset::Native => "native".to_string(),
            Asset::CreditAlphanum4 { code, issuer } | Asset::CreditAlphanum12 { code, issuer } => {
                format!("{code}:{issuer}")
            }
            Asset::Unsupported(asset_type) => asset_type.clone(),
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_name())
    }
}

/// Which path payment flavour produced an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathPaymentKind {
    StrictReceive,
    StrictSend,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentOperation {
    pub id: String,
    pub source_account: String,
    pub from: String,
    pub to: String,
    pub amount: u128,
    pub asset: Asset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPaymentOperation {
    pub kind: PathPaymentKind,
    pub id: String,
    pub source_account: String,
    pub from: String,
    pub to: String,
    pub amount: u128,
    pub asset: Asset,
}

/// A contract `transfer` invocation.
///
/// The asset is only known once the contract id has been mapped to a classic asset, which is a
/// separate step (see [`crate::ledger::sac::SacAssetResolver`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeHostFunctionOperation {
    pub id: String,
    pub source_account: String,
    pub contract_id: String,
    pub function_name: String,
    pub from: String,
    pub to: String,
    pub amount: u128,
    asset: Option<Asset>,
}

impl InvokeHostFunctionOperation {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        source_account: String,
        contract_id: String,
        function_name: String,
        from: String,
        to: String,
        amount: u128,
    ) -> Self {
        Self {
            id,
            source_account,
            contract_id,
            function_name,
            from,
            to,
            amount,
            asset: None,
        }
    }

    /// Same as `new` but with the asset already known, e.g. from Horizon balance changes.
    pub fn with_asset(mut self, asset: Asset) -> Self {
        self.asset = Some(asset);
        self
    }

    pub fn resolve_asset(&mut self, asset: Asset) {
        self.asset = Some(asset);
    }

    pub fn is_resolved(&self) -> bool {
        self.asset.is_some()
    }

    /// The classic asset behind the contract. Errors if it was never resolved.
    pub fn asset(&self) -> Result<&Asset, LedgerError> {
        self.asset
            .as_ref()
            .ok_or_else(|| LedgerError::UnresolvedAsset(self.contract_id.clone()))
    }
}

/// A ledger operation relevant to payment observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerOperation {
    Payment(PaymentOperation),
    PathPayment(PathPaymentOperation),
    InvokeHostFunction(InvokeHostFunctionOperation),
}

impl LedgerOperation {
    pub fn id(&self) -> &str {
        match self {
            LedgerOperation::Payment(op) => &op.id,
            LedgerOperation::PathPayment(op) => &op.id,
            LedgerOperation::InvokeHostFunction(op) => &op.id,
        }
    }

    pub fn from(&self) -> &str {
        match self {
            LedgerOperation::Payment(op) => &op.from,
            LedgerOperation::PathPayment(op) => &op.from,
            LedgerOperation::InvokeHostFunction(op) => &op.from,
        }
    }

    pub fn to(&self) -> &str {
        match self {
            LedgerOperation::Payment(op) => &op.to,
            LedgerOperation::PathPayment(op) => &op.to,
            LedgerOperation::InvokeHostFunction(op) => &op.to,
        }
    }

    pub fn amount(&self) -> u128 {
        match self {
            LedgerOperation::Payment(op) => op.amount,
            LedgerOperation::PathPayment(op) => op.amount,
            LedgerOperation::InvokeHostFunction(op) => op.amount,
        }
    }

    pub fn asset(&self) -> Result<&Asset, LedgerError> {
        match self {
            LedgerOperation::Payment(op) => Ok(&op.asset),
            LedgerOperation::PathPayment(op) => Ok(&op.asset),
            LedgerOperation::InvokeHostFunction(op) => op.asset(),
        }
    }

    pub fn source_account(&self) -> &str {
        match self {
            LedgerOperation::Payment(op) => &op.source_account,
            LedgerOperation::PathPayment(op) => &op.source_account,
            LedgerOperation::InvokeHostFunction(op) => &op.source_account,
        }
    }

    /// Payment type label used in transaction history records.
    pub fn type_name(&self) -> &'static str {
        match self {
            LedgerOperation::Payment(_) => "payment",
            LedgerOperation::PathPayment(op) => match op.kind {
                PathPaymentKind::StrictReceive => "path_payment_strict_receive",
                PathPaymentKind::StrictSend => "path_payment_strict_send",
            },
            LedgerOperation::InvokeHostFunction(_) => "invoke_host_function",
        }
    }
}

/// A transaction as observed on the ledger, with its relevant operations already parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerTransaction {
    pub hash: String,
    pub ledger: u32,
    pub application_order: u32,
    /// Base64 XDR of the transaction envelope.
    pub envelope_xdr: String,
    pub source_account: String,
    pub memo: Memo,
    pub sequence_number: i64,
    pub created_at: DateTime<Utc>,
    pub operations: Vec<LedgerOperation>,
}

/// The canonical payment event handed to listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentTransferEvent {
    pub from: String,
    pub to: String,
    pub asset: Asset,
    /// Smallest unit (stroops for classic assets).
    pub amount: u128,
    pub tx_hash: String,
    /// TOID of the operation, as a decimal string.
    pub operation_id: String,
    pub ledger_transaction: Arc<LedgerTransaction>,
}

impl PaymentTransferEvent {
    /// Build an event from a parsed operation of `transaction`.
    ///
    /// Fails if the operation is a contract transfer whose asset was never resolved.
    pub fn from_operation(
        operation: &LedgerOperation,
        transaction: Arc<LedgerTransaction>,
    ) -> Result<Self, LedgerError> {
        Ok(Self {
            from: operation.from().to_string(),
            to: operation.to().to_string(),
            asset: operation.asset()?.clone(),
            amount: operation.amount(),
            tx_hash: transaction.hash.clone(),
            operation_id: operation.id().to_string(),
            ledger_transaction: transaction,
        })
    }

    pub fn memo(&self) -> &Memo {
        &self.ledger_transaction.memo
    }
}

/// Account summary returned by [`crate::ledger::LedgerClient::get_account`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub account_id: String,
    pub sequence_number: i64,
    pub balances: Vec<AccountBalance>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub asset: Asset,
    /// Smallest unit.
    pub balance: u128,
}

/// Outcome of a transaction submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitTransactionResult {
    pub hash: String,
    pub status: String,
}

/// Error types for ledger backends and parsing
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("XDR error: {0}")]
    XdrError(#[from] stellar_xdr::curr::Error),

    #[error("Strkey error: {0}")]
    StrkeyError(#[from] stellar_strkey::DecodeError),

    #[error("TOID error: {0}")]
    ToidError(#[from] ToidError),

    #[error("RPC error {code}: {message}")]
    RpcError { code: i64, message: String },

    #[error("Horizon error: {0}")]
    HorizonError(String),

    #[error("SSE stream error: {0}")]
    StreamError(String),

    #[error("Invalid ledger data: {0}")]
    InvalidData(String),

    #[error("Asset of contract {0} has not been resolved")]
    UnresolvedAsset(String),

    #[error("Transaction {0} not found")]
    TransactionNotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const ISSUER: &str = "GBBD47IF6LWK7P7MDEVSCWR7DPUWV3NY3DTQEVFL4NAT4AQH3ZLLFLA5";

    #[test]
    fn test_memo_values() {
        assert_eq!(Memo::None.value(), None);
        assert_eq!(Memo::Text("42".into()).value(), Some("42".to_string()));
        assert_eq!(Memo::Id(42).value(), Some("42".to_string()));
        assert_eq!(
            Memo::Hash([1; 32]).value().as_deref(),
            Some("AQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQE=")
        );
        assert_eq!(Memo::Return([1; 32]).type_name(), "return");
        assert!(Memo::Text(String::new()).is_blank());
        assert!(!Memo::Id(0).is_blank());
    }

    #[test]
    fn test_asset_canonical_names() {
        assert_eq!(Asset::Native.canonical_name(), "native");
        let usdc = Asset::credit("USDC", ISSUER);
        assert_eq!(usdc.asset_type(), "credit_alphanum4");
        assert_eq!(usdc.canonical_name(), format!("USDC:{ISSUER}"));
        assert_eq!(Asset::from_canonical(&usdc.canonical_name()), usdc);
        assert_eq!(
            Asset::credit("LONGERCODE", ISSUER).asset_type(),
            "credit_alphanum12"
        );
        assert!(!Asset::from_horizon("liquidity_pool_shares", None, None).is_supported());
        assert!(!Asset::from_canonical("garbage").is_supported());
    }

    #[test]
    fn test_unresolved_contract_asset_fails_loudly() {
        let mut op = InvokeHostFunctionOperation::new(
            "1".into(),
            "GA".into(),
            "CA".into(),
            "transfer".into(),
            "GA".into(),
            "GB".into(),
            10,
        );
        assert!(matches!(op.asset(), Err(LedgerError::UnresolvedAsset(_))));
        op.resolve_asset(Asset::Native);
        assert_eq!(op.asset().unwrap(), &Asset::Native);
    }
}
