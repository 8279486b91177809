//!
//! Utility helpers shared across the observer.
//!
//! Re-exports amount formatting and parsing for stroop-denominated values.
/// Amount formatting and parsing
pub mod index;

pub use index::{
    AmountError, STELLAR_DECIMALS, format_stellar_amount, format_token_amount,
    parse_stellar_amount, parse_token_amount,
};
