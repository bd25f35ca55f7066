//! Wire types for the EVM "exact" scheme (ERC-3009).

use alloy_primitives::{Address, B256, Bytes, U256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use tollgate_types::lit_str;
use tollgate_types::proto::{PaymentPayload, VerifyRequestBody};
use tollgate_types::timestamp::UnixTimestamp;

lit_str!(ExactScheme, "exact");

pub(crate) fn serialize_u256_decimal<S: Serializer>(
    value: &U256,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

pub(crate) fn deserialize_u256_decimal<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<U256, D::Error> {
    let s: String = Deserialize::deserialize(deserializer)?;
    U256::from_str_radix(&s, 10).map_err(serde::de::Error::custom)
}

/// Typed view of a verify/settle request for this scheme.
pub type ExactEvmVerifyRequest = VerifyRequestBody<ExactEvmPayload>;

/// Typed view of the payment payload for this scheme.
pub type ExactEvmPaymentPayload = PaymentPayload<ExactEvmPayload>;

/// Everything needed to execute `transferWithAuthorization`: the EIP-712
/// signature and the authorization it covers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactEvmPayload {
    /// The signature over the authorization. One of:
    /// - an EOA signature (64-65 bytes, recoverable),
    /// - an ERC-1271 signature (arbitrary length, validated by the wallet
    ///   contract),
    /// - an ERC-6492 wrapped signature (wallet not deployed yet).
    pub signature: Bytes,
    /// The authorization that was signed.
    pub authorization: ExactEvmAuthorization,
}

/// ERC-3009 transfer authorization parameters.
#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactEvmAuthorization {
    /// Token owner authorizing the transfer.
    pub from: Address,
    /// Transfer recipient.
    pub to: Address,
    /// Transfer value in atomic token units.
    #[serde(
        serialize_with = "serialize_u256_decimal",
        deserialize_with = "deserialize_u256_decimal"
    )]
    pub value: U256,
    /// Authorization not valid before this time (inclusive).
    pub valid_after: UnixTimestamp,
    /// Authorization expires at this time (exclusive).
    pub valid_before: UnixTimestamp,
    /// Unique 32-byte replay nonce.
    pub nonce: B256,
}

/// EIP-712 domain parameters a seller pins in `requirements.extra`.
///
/// When absent, the facilitator falls back to querying `version()` on the
/// token contract.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactEvmExtra {
    /// Token name in the EIP-712 domain.
    pub name: String,
    /// Token version in the EIP-712 domain.
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_roundtrip() {
        let payload = ExactEvmPayload {
            signature: Bytes::from(vec![0x11u8; 65]),
            authorization: ExactEvmAuthorization {
                from: Address::repeat_byte(0xab),
                to: Address::repeat_byte(0xcd),
                value: U256::from(1000u64),
                valid_after: UnixTimestamp::from_secs(1_700_000_000),
                valid_before: UnixTimestamp::from_secs(1_700_000_300),
                nonce: B256::repeat_byte(0x42),
            },
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["authorization"]["value"], "1000");
        assert_eq!(json["authorization"]["validAfter"], "1700000000");
        let back: ExactEvmPayload = serde_json::from_str(&json.to_string()).unwrap();
        assert_eq!(back.authorization.value, U256::from(1000u64));
        assert_eq!(back.authorization.nonce, B256::repeat_byte(0x42));
    }

    #[test]
    fn scheme_tag_is_literal() {
        assert!(serde_json::from_str::<ExactScheme>("\"exact\"").is_ok());
        assert!(serde_json::from_str::<ExactScheme>("\"permit\"").is_err());
    }
}
