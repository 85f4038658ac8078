//! Conversions between lamports and the decimal SOL strings stored on wallets.

use crate::common::error::{GoalSyncError, Result};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::str::FromStr;

/// Decimal places of the native unit.
pub const NATIVE_DECIMALS: u32 = 9;

/// Balances below 0.001 SOL are not worth refunding.
pub const DUST_THRESHOLD_LAMPORTS: u64 = 1_000_000;

/// Converts lamports into SOL.
#[must_use]
pub fn lamports_to_decimal(lamports: u64) -> Decimal {
    Decimal::from_i128_with_scale(i128::from(lamports), NATIVE_DECIMALS)
}

/// Formats lamports as a normalized SOL string, e.g. `490000000` -> `"0.49"`.
#[must_use]
pub fn format_lamports(lamports: u64) -> String {
    lamports_to_decimal(lamports).normalize().to_string()
}

/// Parses a SOL decimal string back into lamports.
///
/// # Errors
///
/// Returns [`GoalSyncError::DecodingError`] when the string is not a
/// non-negative decimal with at most nine fractional digits.
pub fn parse_amount(value: &str) -> Result<u64> {
    let decimal = Decimal::from_str(value.trim())
        .map_err(|e| GoalSyncError::DecodingError(format!("invalid amount '{value}': {e}")))?;

    if decimal.is_sign_negative() {
        return Err(GoalSyncError::DecodingError(format!(
            "negative amount '{value}'"
        )));
    }

    let scaled = decimal * Decimal::from(10u64.pow(NATIVE_DECIMALS));
    if scaled.fract() != Decimal::ZERO {
        return Err(GoalSyncError::DecodingError(format!(
            "amount '{value}' has more than {NATIVE_DECIMALS} decimals"
        )));
    }

    scaled
        .to_u64()
        .ok_or_else(|| GoalSyncError::DecodingError(format!("amount '{value}' out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_normalizes_trailing_zeros() {
        assert_eq!(format_lamports(0), "0");
        assert_eq!(format_lamports(490_000_000), "0.49");
        assert_eq!(format_lamports(500_000), "0.0005");
        assert_eq!(format_lamports(2_000_000_000), "2");
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("0.5").unwrap(), 500_000_000);
        assert_eq!(parse_amount("0").unwrap(), 0);
        assert_eq!(parse_amount(" 1.000000001 ").unwrap(), 1_000_000_001);
        assert!(parse_amount("-1").is_err());
        assert!(parse_amount("0.0000000001").is_err());
        assert!(parse_amount("abc").is_err());
    }

    #[test]
    fn test_dust_threshold_is_one_thousandth() {
        assert_eq!(format_lamports(DUST_THRESHOLD_LAMPORTS), "0.001");
    }
}
