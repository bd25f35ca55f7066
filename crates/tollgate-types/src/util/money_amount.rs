//! Human-readable currency amount parsing.
//!
//! Route prices arrive as strings like `"$1.50"` or plain numbers. This
//! module parses them into precise decimals that the requirement builder
//! converts to atomic token units (`floor(value * 10^decimals)`).

use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::LazyLock;

/// A parsed, non-negative monetary amount.
///
/// Preserves the input precision: `"10.50"` has scale 2 and mantissa 1050.
#[derive(Debug, Clone, PartialEq)]
pub struct MoneyAmount(pub Decimal);

impl MoneyAmount {
    /// Number of decimal places in the original input.
    pub fn scale(&self) -> u32 {
        self.0.scale()
    }

    /// The value as an unsigned integer without the decimal point.
    pub fn mantissa(&self) -> u128 {
        self.0.mantissa().unsigned_abs()
    }

    /// Converts to atomic token units, flooring excess precision.
    ///
    /// `"$1.50"` with 6 decimals becomes `1_500_000`.
    pub fn as_atomic(&self, decimals: u32) -> Result<u128, MoneyAmountParseError> {
        let mut value = self.0;
        if value.scale() > decimals {
            value = value.trunc_with_scale(decimals);
        }
        let scale = value.scale();
        let mantissa = value.mantissa().unsigned_abs();
        let factor = 10u128
            .checked_pow(decimals - scale)
            .ok_or(MoneyAmountParseError::OutOfRange)?;
        mantissa
            .checked_mul(factor)
            .ok_or(MoneyAmountParseError::OutOfRange)
    }
}

/// Errors from parsing a monetary amount.
#[derive(Debug, thiserror::Error)]
pub enum MoneyAmountParseError {
    /// The input string could not be parsed as a number.
    #[error("invalid number format")]
    InvalidFormat,
    /// The value is outside the allowed range.
    #[error("amount must be between {} and {}", constants::MIN_STR, constants::MAX_STR)]
    OutOfRange,
    /// Negative values are not allowed.
    #[error("negative value is not allowed")]
    Negative,
}

mod constants {
    use super::*;

    pub const MIN_STR: &str = "0.000000001";
    pub const MAX_STR: &str = "999999999";

    pub static MIN: LazyLock<Decimal> =
        LazyLock::new(|| Decimal::from_str(MIN_STR).expect("valid decimal"));
    pub static MAX: LazyLock<Decimal> =
        LazyLock::new(|| Decimal::from_str(MAX_STR).expect("valid decimal"));
}

static CLEANUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\d\.\-]+").expect("valid regex"));

impl MoneyAmount {
    /// Parses a human-readable currency string.
    ///
    /// Currency symbols, thousand separators, and whitespace are stripped
    /// before parsing. The result must be non-negative and within range.
    pub fn parse(input: &str) -> Result<Self, MoneyAmountParseError> {
        let cleaned = CLEANUP.replace_all(input, "").to_string();
        let parsed =
            Decimal::from_str(&cleaned).map_err(|_| MoneyAmountParseError::InvalidFormat)?;
        if parsed.is_sign_negative() {
            return Err(MoneyAmountParseError::Negative);
        }
        if parsed < *constants::MIN || parsed > *constants::MAX {
            return Err(MoneyAmountParseError::OutOfRange);
        }
        Ok(MoneyAmount(parsed))
    }
}

impl FromStr for MoneyAmount {
    type Err = MoneyAmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MoneyAmount::parse(s)
    }
}

impl TryFrom<&str> for MoneyAmount {
    type Error = MoneyAmountParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        MoneyAmount::from_str(value)
    }
}

impl From<u64> for MoneyAmount {
    fn from(value: u64) -> Self {
        MoneyAmount(Decimal::from(value))
    }
}

impl TryFrom<f64> for MoneyAmount {
    type Error = MoneyAmountParseError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        let decimal = Decimal::from_f64(value).ok_or(MoneyAmountParseError::OutOfRange)?;
        if decimal.is_sign_negative() {
            return Err(MoneyAmountParseError::Negative);
        }
        if decimal < *constants::MIN || decimal > *constants::MAX {
            return Err(MoneyAmountParseError::OutOfRange);
        }
        Ok(MoneyAmount(decimal))
    }
}

impl Display for MoneyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dollar_prefix() {
        let amount = MoneyAmount::parse("$10.50").unwrap();
        assert_eq!(amount.scale(), 2);
        assert_eq!(amount.mantissa(), 1050);
    }

    #[test]
    fn parses_thousand_separators() {
        let amount = MoneyAmount::parse("1,000.25").unwrap();
        assert_eq!(amount.mantissa(), 100025);
    }

    #[test]
    fn rejects_negative() {
        assert!(matches!(
            MoneyAmount::parse("-5"),
            Err(MoneyAmountParseError::Negative)
        ));
    }

    #[test]
    fn atomic_conversion_floors() {
        let amount = MoneyAmount::parse("$1.50").unwrap();
        assert_eq!(amount.as_atomic(6).unwrap(), 1_500_000);

        // More precision than the token carries gets floored away.
        let tiny = MoneyAmount::parse("0.0000019").unwrap();
        assert_eq!(tiny.as_atomic(6).unwrap(), 1);
    }

    #[test]
    fn atomic_conversion_whole_numbers() {
        let amount = MoneyAmount::parse("3").unwrap();
        assert_eq!(amount.as_atomic(6).unwrap(), 3_000_000);
    }
}
