//! Ledger integration module for the Stellar network
//!
//! This module provides the backend clients and the canonical types used by the payment
//! observer. Horizon is consumed over REST and server-sent events, Stellar RPC over JSON-RPC.
//! Both are hidden behind the [`LedgerClient`] trait, and both feed the same parser so every
//! backend produces identical [`LedgerTransaction`] values.

/// Strkey helpers for account, muxed and contract addresses
pub mod address;
/// Backend-neutral client trait and transaction wait helper
pub mod client;
/// Horizon REST + SSE client
pub mod horizon;
/// Envelope and operation parsing
pub mod parser;
/// Stellar RPC JSON-RPC client
pub mod rpc;
/// Contract id to classic asset resolution
pub mod sac;
/// Total order id codec
pub mod toid;
/// Canonical ledger types
mod types;

pub use client::{LedgerClient, transaction_wait_policy, wait_for_transaction_available};
pub use horizon::HorizonClient;
pub use rpc::StellarRpcClient;
pub use sac::SacAssetResolver;
pub use types::*;
