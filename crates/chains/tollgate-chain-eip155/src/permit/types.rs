//! Wire types for the EVM "permit" scheme (EIP-2612).

use alloy_primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use tollgate_types::lit_str;
use tollgate_types::proto::{PaymentPayload, VerifyRequestBody};
use tollgate_types::timestamp::UnixTimestamp;

use crate::exact::types::{deserialize_u256_decimal, serialize_u256_decimal};

lit_str!(PermitScheme, "permit");

/// Typed view of a verify/settle request for this scheme.
pub type PermitEvmVerifyRequest = VerifyRequestBody<PermitEvmPayload>;

/// Typed view of the payment payload for this scheme.
pub type PermitEvmPaymentPayload = PaymentPayload<PermitEvmPayload>;

/// The signed permit plus the parameters it covers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermitEvmPayload {
    /// EIP-712 signature over the `Permit` message.
    pub signature: Bytes,
    /// The permit parameters that were signed.
    pub permit: PermitAuthorization,
}

/// EIP-2612 `Permit` parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermitAuthorization {
    /// Token owner granting the allowance.
    pub owner: Address,
    /// Allowance recipient. Must be one of the settling facilitator's
    /// signers; settlement sends `transferFrom` from this account.
    pub spender: Address,
    /// Allowance value in atomic token units.
    #[serde(
        serialize_with = "serialize_u256_decimal",
        deserialize_with = "deserialize_u256_decimal"
    )]
    pub value: U256,
    /// The token's current `nonces(owner)` value.
    #[serde(
        serialize_with = "serialize_u256_decimal",
        deserialize_with = "deserialize_u256_decimal"
    )]
    pub nonce: U256,
    /// Permit deadline.
    pub deadline: UnixTimestamp,
    /// The EIP-712 domain the permit was signed under.
    pub domain: PermitDomain,
}

/// EIP-712 domain pinned into the payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PermitDomain {
    /// Token name.
    pub name: String,
    /// Token version.
    pub version: String,
    /// Numeric EIP-155 chain id.
    pub chain_id: u64,
    /// The token contract.
    pub verifying_contract: Address,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_roundtrip() {
        let payload = PermitEvmPayload {
            signature: Bytes::from(vec![0x22u8; 65]),
            permit: PermitAuthorization {
                owner: Address::repeat_byte(0x01),
                spender: Address::repeat_byte(0x02),
                value: U256::from(5000u64),
                nonce: U256::from(7u64),
                deadline: UnixTimestamp::from_secs(1_700_000_600),
                domain: PermitDomain {
                    name: "USD Coin".to_string(),
                    version: "2".to_string(),
                    chain_id: 8453,
                    verifying_contract: Address::repeat_byte(0x03),
                },
            },
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["permit"]["value"], "5000");
        assert_eq!(json["permit"]["nonce"], "7");
        assert_eq!(json["permit"]["domain"]["chainId"], 8453);
        let back: PermitEvmPayload = serde_json::from_str(&json.to_string()).unwrap();
        assert_eq!(back.permit.value, U256::from(5000u64));
    }
}
