//! Total order ids for ledger operations.
//!
//! A TOID packs a ledger sequence, the application order of a transaction inside that ledger
//! and the 1-based index of an operation inside that transaction into one 64-bit integer:
//!
//! ```text
//! | ledger sequence (32 bits) | transaction order (20 bits) | operation index (12 bits) |
//! ```
//!
//! Horizon paging tokens and Stellar RPC event ids are both derived from this layout, which is
//! what makes them usable as monotonic cursors.

use thiserror::Error;

pub const LEDGER_MASK: i64 = (1 << 32) - 1;
pub const TRANSACTION_MASK: i64 = (1 << 20) - 1;
pub const OPERATION_MASK: i64 = (1 << 12) - 1;

pub const LEDGER_SHIFT: u32 = 32;
pub const TRANSACTION_SHIFT: u32 = 12;

/// A decoded total order id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Toid {
    pub ledger_sequence: i64,
    pub transaction_order: i64,
    pub operation_index: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToidError {
    #[error("{component} {value} is out of range [0, {max}]")]
    OutOfRange {
        component: &'static str,
        value: i64,
        max: i64,
    },
}

fn check(component: &'static str, value: i64, max: i64) -> Result<(), ToidError> {
    if value < 0 || value > max {
        return Err(ToidError::OutOfRange {
            component,
            value,
            max,
        });
    }
    Ok(())
}

impl Toid {
    pub fn new(ledger_sequence: i64, transaction_order: i64, operation_index: i64) -> Self {
        Self {
            ledger_sequence,
            transaction_order,
            operation_index,
        }
    }

    /// Pack the triple into its 64-bit form.
    ///
    /// Fails when any component is negative or wider than its bit field.
    pub fn encode(&self) -> Result<i64, ToidError> {
        check("ledger sequence", self.ledger_sequence, LEDGER_MASK)?;
        check("transaction order", self.transaction_order, TRANSACTION_MASK)?;
        check("operation index", self.operation_index, OPERATION_MASK)?;

        // The ledger field spans the sign bit, so pack as u64 and reinterpret.
        let packed = ((self.ledger_sequence as u64) << LEDGER_SHIFT)
            | ((self.transaction_order as u64) << TRANSACTION_SHIFT)
            | (self.operation_index as u64);
        Ok(packed as i64)
    }

    /// Unpack a 64-bit id. Every input decodes; the inverse of [`Toid::encode`].
    pub fn decode(id: i64) -> Self {
        let raw = id as u64;
        Self {
            ledger_sequence: ((raw >> LEDGER_SHIFT) as i64) & LEDGER_MASK,
            transaction_order: ((raw >> TRANSACTION_SHIFT) as i64) & TRANSACTION_MASK,
            operation_index: (raw as i64) & OPERATION_MASK,
        }
    }
}

/// Shorthand for `Toid::new(..).encode()`.
pub fn encode(ledger_sequence: i64, transaction_order: i64, operation_index: i64) -> Result<i64, ToidError> {
    Toid::new(ledger_sequence, transaction_order, operation_index).encode()
}

pub fn decode(id: i64) -> Toid {
    Toid::decode(id)
}
