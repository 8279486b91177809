//! Payment observer for Stellar anchors.
//!
//! Watches the ledger, through Horizon or Stellar RPC, for payments to the anchor's accounts and
//! reconciles them with pending SEP-31, SEP-24 and SEP-6 transactions.

pub mod config;
pub mod ledger;
pub mod observer;
pub mod reconcile;
pub mod utils;
