//! Shared helper types: base64 wrappers, literal strings, money amounts.

pub mod b64;
pub mod lit_str;
pub mod money_amount;

pub use b64::Base64Bytes;
pub use money_amount::{MoneyAmount, MoneyAmountParseError};
