use thiserror::Error;

/// Decimal places of classic Stellar amounts (1 unit = 10^7 stroops).
pub const STELLAR_DECIMALS: u32 = 7;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid amount {0:?}")]
pub struct AmountError(pub String);

/// Render an integer amount in the smallest unit as a decimal string with `decimals` places.
pub fn format_token_amount(amount: u128, decimals: u32) -> String {
    let scale = 10u128.pow(decimals);
    if decimals == 0 {
        return amount.to_string();
    }
    format!(
        "{}.{:0width$}",
        amount / scale,
        amount % scale,
        width = decimals as usize
    )
}

/// Parse a decimal string such as `"100.0000000"` into the smallest unit.
///
/// Rejects signs, exponents and more fractional digits than `decimals`.
pub fn parse_token_amount(value: &str, decimals: u32) -> Result<u128, AmountError> {
    let invalid = || AmountError(value.to_string());
    let (whole, fraction) = value.split_once('.').unwrap_or((value, ""));
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid());
    }
    if fraction.len() > decimals as usize
        || !whole.chars().all(|c| c.is_ascii_digit())
        || !fraction.chars().all(|c| c.is_ascii_digit())
    {
        return Err(invalid());
    }

    let whole: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| invalid())?
    };
    let padded = format!("{:0<width$}", fraction, width = decimals as usize);
    let fraction: u128 = if padded.is_empty() {
        0
    } else {
        padded.parse().map_err(|_| invalid())?
    };

    whole
        .checked_mul(10u128.pow(decimals))
        .and_then(|v| v.checked_add(fraction))
        .ok_or_else(invalid)
}

/// Stroops to the 7-decimal string used by Horizon and the platform API.
pub fn format_stellar_amount(stroops: u128) -> String {
    format_token_amount(stroops, STELLAR_DECIMALS)
}

pub fn parse_stellar_amount(value: &str) -> Result<u128, AmountError> {
    parse_token_amount(value, STELLAR_DECIMALS)
}
