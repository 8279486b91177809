//!
//! Strkey helpers for Stellar addresses.
//!
//! Converts between XDR account/contract types and their `G...`, `M...` and `C...` string forms,
//! and splits muxed accounts into their base account and numeric id.

use stellar_strkey::{Contract, ed25519};
use stellar_xdr::curr::{
	AccountId, ContractId, Hash, MuxedAccount, MuxedAccountMed25519, PublicKey, ScAddress, Uint256,
};

use super::types::LedgerError;

/// A muxed account split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxedAddress {
	pub base_account: String,
	pub id: u64,
}

/// Decode an `M...` address. Returns `None` for anything that is not a valid muxed address.
pub fn decode_muxed(address: &str) -> Option<MuxedAddress> {
	if !address.starts_with('M') {
		return None;
	}
	let muxed = ed25519::MuxedAccount::from_string(address).ok()?;
	Some(MuxedAddress {
		base_account: ed25519::PublicKey(muxed.ed25519).to_string(),
		id: muxed.id,
	})
}

/// Encode a base `G...` account and an id into an `M...` address.
pub fn encode_muxed(base_account: &str, id: u64) -> Result<String, LedgerError> {
	let key = ed25519::PublicKey::from_string(base_account)?;
	Ok(ed25519::MuxedAccount {
		ed25519: key.0,
		id,
	}
	.to_string())
}

pub fn is_muxed(address: &str) -> bool {
	decode_muxed(address).is_some()
}

pub fn is_contract(address: &str) -> bool {
	address.starts_with('C') && Contract::from_string(address).is_ok()
}

/// Base account of a possibly muxed address. Non-muxed input is returned unchanged.
pub fn base_account(address: &str) -> String {
	match decode_muxed(address) {
		Some(muxed) => muxed.base_account,
		None => address.to_string(),
	}
}

pub fn account_id_to_string(account_id: &AccountId) -> String {
	let AccountId(PublicKey::PublicKeyTypeEd25519(Uint256(bytes))) = account_id;
	ed25519::PublicKey(*bytes).to_string()
}

pub fn muxed_account_to_string(account: &MuxedAccount) -> String {
	match account {
		MuxedAccount::Ed25519(Uint256(bytes)) => ed25519::PublicKey(*bytes).to_string(),
		MuxedAccount::MuxedEd25519(MuxedAccountMed25519 {
			id,
			ed25519: Uint256(bytes),
		}) => ed25519::MuxedAccount {
			ed25519: *bytes,
			id: *id,
		}
		.to_string(),
	}
}

pub fn contract_id_to_string(contract_id: &ContractId) -> String {
	let ContractId(Hash(bytes)) = contract_id;
	Contract(*bytes).to_string()
}

/// Render a contract-level address. Claimable balance and liquidity pool addresses cannot be
/// payment endpoints and are rejected.
pub fn sc_address_to_string(address: &ScAddress) -> Result<String, LedgerError> {
	match address {
		ScAddress::Account(account_id) => Ok(account_id_to_string(account_id)),
		ScAddress::Contract(contract_id) => Ok(contract_id_to_string(contract_id)),
		ScAddress::MuxedAccount(muxed) => {
			let Uint256(bytes) = &muxed.ed25519;
			Ok(ed25519::MuxedAccount {
				ed25519: *bytes,
				id: muxed.id,
			}
			.to_string())
		}
		other => Err(LedgerError::InvalidData(format!(
			"unsupported address kind: {:?}",
			other
		))),
	}
}

pub fn parse_account_id(address: &str) -> Result<AccountId, LedgerError> {
	let key = ed25519::PublicKey::from_string(address)?;
	Ok(AccountId(PublicKey::PublicKeyTypeEd25519(Uint256(key.0))))
}

pub fn parse_contract_id(address: &str) -> Result<ContractId, LedgerError> {
	let contract = Contract::from_string(address)?;
	Ok(ContractId(Hash(contract.0)))
}

/// Parse a `G...` or `C...` string into an `ScAddress`.
pub fn parse_sc_address(address: &str) -> Result<ScAddress, LedgerError> {
	if address.starts_with('C') {
		Ok(ScAddress::Contract(parse_contract_id(address)?))
	} else {
		Ok(ScAddress::Account(parse_account_id(address)?))
	}
}
