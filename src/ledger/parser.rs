//! Transaction envelope parsing.
//!
//! Turns base64 XDR envelopes into [`LedgerTransaction`] values holding only the operations the
//! observer cares about: payments, path payments and contract `transfer` invocations. Anything
//! else is skipped. A malformed operation is logged and skipped without failing the transaction.

use chrono::{DateTime, Utc};
use stellar_xdr::curr::{
	AlphaNum4, AlphaNum12, Asset as XdrAsset, FeeBumpTransactionInnerTx, HostFunction,
	Int128Parts, InvokeContractArgs, Limits, Memo as XdrMemo, Operation, OperationBody, ReadXdr,
	ScVal, TransactionEnvelope,
};
use tracing::{debug, warn};

use super::address::{
	account_id_to_string, contract_id_to_string, muxed_account_to_string, sc_address_to_string,
};
use super::toid::Toid;
use super::types::{
	Asset, InvokeHostFunctionOperation, LedgerError, LedgerOperation, LedgerTransaction, Memo,
	PathPaymentKind, PathPaymentOperation, PaymentOperation,
};

/// Name of the contract function treated as a token transfer.
pub const TRANSFER_FUNCTION: &str = "transfer";

/// Transaction level data extracted from an envelope.
#[derive(Debug, Clone)]
pub struct ParsedEnvelope {
	pub source_account: String,
	pub sequence_number: i64,
	pub memo: Memo,
	pub operations: Vec<Operation>,
}

/// Position of an operation inside the ledger, used to derive its TOID.
#[derive(Debug, Clone, Copy)]
pub struct OperationContext<'a> {
	pub source_account: &'a str,
	pub ledger: u32,
	pub application_order: u32,
	/// 1-based index of the operation inside its transaction.
	pub operation_index: u32,
}

impl OperationContext<'_> {
	pub fn operation_id(&self) -> Result<String, LedgerError> {
		let id = Toid::new(
			self.ledger as i64,
			self.application_order as i64,
			self.operation_index as i64,
		)
		.encode()?;
		Ok(id.to_string())
	}
}

/// Raw transaction data as served by either backend.
#[derive(Debug, Clone)]
pub struct RawTransaction {
	pub hash: String,
	pub ledger: u32,
	pub application_order: u32,
	pub envelope_xdr: String,
	pub created_at: DateTime<Utc>,
}

/// Decode a base64 envelope into its source account, sequence number, memo and operations.
///
/// Fee bump envelopes are unwrapped to their inner transaction.
pub fn parse_envelope(envelope_xdr: &str) -> Result<ParsedEnvelope, LedgerError> {
	let envelope = TransactionEnvelope::from_xdr_base64(envelope_xdr, Limits::none())?;

	let parsed = match envelope {
		TransactionEnvelope::TxV0(env) => ParsedEnvelope {
			source_account: stellar_strkey::ed25519::PublicKey(env.tx.source_account_ed25519.0)
				.to_string(),
			sequence_number: env.tx.seq_num.0,
			memo: convert_memo(&env.tx.memo),
			operations: env.tx.operations.to_vec(),
		},
		TransactionEnvelope::Tx(env) => ParsedEnvelope {
			source_account: muxed_account_to_string(&env.tx.source_account),
			sequence_number: env.tx.seq_num.0,
			memo: convert_memo(&env.tx.memo),
			operations: env.tx.operations.to_vec(),
		},
		TransactionEnvelope::TxFeeBump(env) => {
			let FeeBumpTransactionInnerTx::Tx(inner) = env.tx.inner_tx;
			ParsedEnvelope {
				source_account: muxed_account_to_string(&inner.tx.source_account),
				sequence_number: inner.tx.seq_num.0,
				memo: convert_memo(&inner.tx.memo),
				operations: inner.tx.operations.to_vec(),
			}
		}
	};

	Ok(parsed)
}

/// Parse a full transaction. Operations that are not payment-like are dropped.
pub fn parse_transaction(raw: &RawTransaction) -> Result<LedgerTransaction, LedgerError> {
	let envelope = parse_envelope(&raw.envelope_xdr)?;

	let mut operations = Vec::new();
	for (index, operation) in envelope.operations.iter().enumerate() {
		let context = OperationContext {
			source_account: &envelope.source_account,
			ledger: raw.ledger,
			application_order: raw.application_order,
			operation_index: index as u32 + 1,
		};
		match parse_operation(operation, &context) {
			Ok(Some(parsed)) => operations.push(parsed),
			Ok(None) => {}
			Err(e) => {
				warn!(
					"Skipping malformed operation {} of transaction {}: {}",
					index, raw.hash, e
				);
			}
		}
	}

	Ok(LedgerTransaction {
		hash: raw.hash.clone(),
		ledger: raw.ledger,
		application_order: raw.application_order,
		envelope_xdr: raw.envelope_xdr.clone(),
		source_account: envelope.source_account,
		memo: envelope.memo,
		sequence_number: envelope.sequence_number,
		created_at: raw.created_at,
		operations,
	})
}

/// Convert one XDR operation. Returns `Ok(None)` for operation types the observer ignores.
pub fn parse_operation(
	operation: &Operation,
	context: &OperationContext<'_>,
) -> Result<Option<LedgerOperation>, LedgerError> {
	let source_account = match &operation.source_account {
		Some(account) => muxed_account_to_string(account),
		None => context.source_account.to_string(),
	};

	let parsed = match &operation.body {
		OperationBody::Payment(payment) => Some(LedgerOperation::Payment(PaymentOperation {
			id: context.operation_id()?,
			from: source_account.clone(),
			to: muxed_account_to_string(&payment.destination),
			amount: non_negative(payment.amount)?,
			asset: convert_asset(&payment.asset),
			source_account,
		})),
		OperationBody::PathPaymentStrictReceive(op) => {
			Some(LedgerOperation::PathPayment(PathPaymentOperation {
				kind: PathPaymentKind::StrictReceive,
				id: context.operation_id()?,
				from: source_account.clone(),
				to: muxed_account_to_string(&op.destination),
				amount: non_negative(op.dest_amount)?,
				asset: convert_asset(&op.dest_asset),
				source_account,
			}))
		}
		OperationBody::PathPaymentStrictSend(op) => {
			Some(LedgerOperation::PathPayment(PathPaymentOperation {
				kind: PathPaymentKind::StrictSend,
				id: context.operation_id()?,
				from: source_account.clone(),
				to: muxed_account_to_string(&op.destination),
				amount: non_negative(op.send_amount)?,
				asset: convert_asset(&op.dest_asset),
				source_account,
			}))
		}
		OperationBody::InvokeHostFunction(op) => match &op.host_function {
			HostFunction::InvokeContract(args) => {
				parse_transfer_invocation(args, context, source_account)?
					.map(LedgerOperation::InvokeHostFunction)
			}
			_ => None,
		},
		_ => None,
	};

	Ok(parsed)
}

/// Recognize `transfer(from: Address, to: Address, amount: i128)` on any contract.
fn parse_transfer_invocation(
	args: &InvokeContractArgs,
	context: &OperationContext<'_>,
	source_account: String,
) -> Result<Option<InvokeHostFunctionOperation>, LedgerError> {
	let function_name: &[u8] = args.function_name.0.as_ref();
	if function_name != TRANSFER_FUNCTION.as_bytes() {
		return Ok(None);
	}

	let (from, to, amount) = match args.args.as_slice() {
		[ScVal::Address(from), ScVal::Address(to), ScVal::I128(amount)] => (from, to, amount),
		_ => {
			debug!("Ignoring transfer invocation with unexpected arguments");
			return Ok(None);
		}
	};

	let contract_id = match &args.contract_address {
		stellar_xdr::curr::ScAddress::Contract(id) => contract_id_to_string(id),
		other => sc_address_to_string(other)?,
	};

	Ok(Some(InvokeHostFunctionOperation::new(
		context.operation_id()?,
		source_account,
		contract_id,
		TRANSFER_FUNCTION.to_string(),
		sc_address_to_string(from)?,
		sc_address_to_string(to)?,
		i128_amount(amount)?,
	)))
}

/// Non-negative i128 amount from its XDR parts.
pub fn i128_amount(parts: &Int128Parts) -> Result<u128, LedgerError> {
	let value = ((parts.hi as i128) << 64) | (parts.lo as i128);
	u128::try_from(value).map_err(|_| LedgerError::InvalidData(format!("negative amount {value}")))
}

fn non_negative(amount: i64) -> Result<u128, LedgerError> {
	u128::try_from(amount).map_err(|_| LedgerError::InvalidData(format!("negative amount {amount}")))
}

pub fn convert_asset(asset: &XdrAsset) -> Asset {
	match asset {
		XdrAsset::Native => Asset::Native,
		XdrAsset::CreditAlphanum4(AlphaNum4 { asset_code, issuer }) => Asset::CreditAlphanum4 {
			code: asset_code_to_string(&asset_code.0),
			issuer: account_id_to_string(issuer),
		},
		XdrAsset::CreditAlphanum12(AlphaNum12 { asset_code, issuer }) => Asset::CreditAlphanum12 {
			code: asset_code_to_string(&asset_code.0),
			issuer: account_id_to_string(issuer),
		},
	}
}

fn asset_code_to_string(bytes: &[u8]) -> String {
	let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
	String::from_utf8_lossy(&bytes[..end]).into_owned()
}

pub fn convert_memo(memo: &XdrMemo) -> Memo {
	match memo {
		XdrMemo::None => Memo::None,
		XdrMemo::Text(text) => {
			let bytes: &[u8] = text.as_ref();
			Memo::Text(String::from_utf8_lossy(bytes).into_owned())
		}
		XdrMemo::Id(id) => Memo::Id(*id),
		XdrMemo::Hash(hash) => Memo::Hash(hash.0),
		XdrMemo::Return(hash) => Memo::Return(hash.0),
	}
}

#[cfg(test)]
pub(crate) mod fixtures {
	//! Envelope builders shared by parser, backend and dispatcher tests.

	use stellar_xdr::curr::{
		AccountId, Asset as XdrAsset, ContractId, Hash, HostFunction, Int128Parts,
		InvokeContractArgs, InvokeHostFunctionOp, Limits, Memo as XdrMemo, MuxedAccount,
		Operation, OperationBody, PathPaymentStrictSendOp, PaymentOp, Preconditions, PublicKey,
		ScAddress, ScSymbol, ScVal, SequenceNumber, StringM, Transaction, TransactionEnvelope,
		TransactionExt, TransactionV1Envelope, Uint256, VecM, WriteXdr,
	};

	pub const SOURCE: &str = "GBBD47IF6LWK7P7MDEVSCWR7DPUWV3NY3DTQEVFL4NAT4AQH3ZLLFLA5";

	pub fn account_bytes(address: &str) -> [u8; 32] {
		stellar_strkey::ed25519::PublicKey::from_string(address)
			.expect("valid account")
			.0
	}

	pub fn muxed(address: &str) -> MuxedAccount {
		MuxedAccount::Ed25519(Uint256(account_bytes(address)))
	}

	pub fn account_id(address: &str) -> AccountId {
		AccountId(PublicKey::PublicKeyTypeEd25519(Uint256(account_bytes(address))))
	}

	pub fn payment(destination: MuxedAccount, amount: i64) -> Operation {
		Operation {
			source_account: None,
			body: OperationBody::Payment(PaymentOp {
				destination,
				asset: XdrAsset::Native,
				amount,
			}),
		}
	}

	pub fn path_payment_strict_send(destination: MuxedAccount, amount: i64) -> Operation {
		Operation {
			source_account: None,
			body: OperationBody::PathPaymentStrictSend(PathPaymentStrictSendOp {
				send_asset: XdrAsset::Native,
				send_amount: amount,
				destination,
				dest_asset: XdrAsset::Native,
				dest_min: 1,
				path: VecM::default(),
			}),
		}
	}

	pub fn contract_transfer(contract: [u8; 32], from: &str, to: &str, amount: i128) -> Operation {
		let args: Vec<ScVal> = vec![
			ScVal::Address(ScAddress::Account(account_id(from))),
			ScVal::Address(ScAddress::Account(account_id(to))),
			ScVal::I128(Int128Parts {
				hi: (amount >> 64) as i64,
				lo: amount as u64,
			}),
		];
		Operation {
			source_account: None,
			body: OperationBody::InvokeHostFunction(InvokeHostFunctionOp {
				host_function: HostFunction::InvokeContract(InvokeContractArgs {
					contract_address: ScAddress::Contract(ContractId(Hash(contract))),
					function_name: ScSymbol(StringM::try_from("transfer").expect("symbol")),
					args: args.try_into().expect("args"),
				}),
				auth: VecM::default(),
			}),
		}
	}

	pub fn text_memo(text: &str) -> XdrMemo {
		XdrMemo::Text(StringM::try_from(text).expect("memo"))
	}

	/// Base64 V1 envelope sourced from [`SOURCE`].
	pub fn envelope(memo: XdrMemo, operations: Vec<Operation>) -> String {
		let tx = Transaction {
			source_account: muxed(SOURCE),
			fee: 100,
			seq_num: SequenceNumber(12345),
			cond: Preconditions::None,
			memo,
			operations: operations.try_into().expect("operations"),
			ext: TransactionExt::V0,
		};
		TransactionEnvelope::Tx(TransactionV1Envelope {
			tx,
			signatures: VecM::default(),
		})
		.to_xdr_base64(Limits::none())
		.expect("encodable envelope")
	}
}

#[cfg(test)]
mod tests {
	use super::fixtures::*;
	use super::*;
	use crate::ledger::address::encode_muxed;
	use stellar_xdr::curr::{MuxedAccount, MuxedAccountMed25519, Uint256};

	const DEST: &str = "GDJJRRMBK4IWLEPJGIE6SXD2LP7REGZODU7WDC3I2D6MR37F4XSHBKX2";

	fn raw(envelope_xdr: String) -> RawTransaction {
		RawTransaction {
			hash: "abc123".to_string(),
			ledger: 1000,
			application_order: 3,
			envelope_xdr,
			created_at: Utc::now(),
		}
	}

	#[test]
	fn test_parse_payment_transaction() {
		let envelope = envelope(text_memo("42"), vec![payment(muxed(DEST), 1_000_000)]);
		let tx = parse_transaction(&raw(envelope)).unwrap();

		assert_eq!(tx.source_account, SOURCE);
		assert_eq!(tx.sequence_number, 12345);
		assert_eq!(tx.memo, Memo::Text("42".to_string()));
		assert_eq!(tx.operations.len(), 1);

		let op = &tx.operations[0];
		assert_eq!(op.id(), Toid::new(1000, 3, 1).encode().unwrap().to_string());
		assert_eq!(op.from(), SOURCE);
		assert_eq!(op.to(), DEST);
		assert_eq!(op.amount(), 1_000_000);
		assert_eq!(op.asset().unwrap(), &Asset::Native);
		assert_eq!(op.type_name(), "payment");
	}

	#[test]
	fn test_muxed_destination_is_kept() {
		let destination = MuxedAccount::MuxedEd25519(MuxedAccountMed25519 {
			id: 42,
			ed25519: Uint256(account_bytes(DEST)),
		});
		let envelope = envelope(XdrMemo::None, vec![payment(destination, 5)]);
		let tx = parse_transaction(&raw(envelope)).unwrap();
		assert_eq!(tx.operations[0].to(), encode_muxed(DEST, 42).unwrap());
	}

	#[test]
	fn test_path_payment_and_operation_indexes() {
		let envelope = envelope(
			XdrMemo::Id(9),
			vec![payment(muxed(DEST), 1), path_payment_strict_send(muxed(DEST), 77)],
		);
		let tx = parse_transaction(&raw(envelope)).unwrap();
		assert_eq!(tx.memo, Memo::Id(9));
		assert_eq!(tx.operations.len(), 2);
		let second = &tx.operations[1];
		assert_eq!(second.type_name(), "path_payment_strict_send");
		assert_eq!(second.amount(), 77);
		assert_eq!(second.id(), Toid::new(1000, 3, 2).encode().unwrap().to_string());
	}

	#[test]
	fn test_contract_transfer_needs_asset_resolution() {
		let envelope = envelope(
			XdrMemo::None,
			vec![contract_transfer([9u8; 32], SOURCE, DEST, 250)],
		);
		let tx = parse_transaction(&raw(envelope)).unwrap();
		let LedgerOperation::InvokeHostFunction(op) = &tx.operations[0] else {
			panic!("expected contract transfer");
		};
		assert_eq!(op.from, SOURCE);
		assert_eq!(op.to, DEST);
		assert_eq!(op.amount, 250);
		assert!(op.contract_id.starts_with('C'));
		assert!(matches!(
			tx.operations[0].asset(),
			Err(LedgerError::UnresolvedAsset(_))
		));
	}

	#[test]
	fn test_negative_contract_amount_is_skipped() {
		let envelope = envelope(
			XdrMemo::None,
			vec![
				contract_transfer([9u8; 32], SOURCE, DEST, -5),
				payment(muxed(DEST), 10),
			],
		);
		let tx = parse_transaction(&raw(envelope)).unwrap();
		assert_eq!(tx.operations.len(), 1);
		assert_eq!(tx.operations[0].amount(), 10);
	}

	#[test]
	fn test_garbage_envelope_is_an_error() {
		assert!(parse_envelope("not-xdr").is_err());
	}
}
