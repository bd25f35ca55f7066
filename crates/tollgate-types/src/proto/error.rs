//! Stable error tags and structural verification errors.
//!
//! Every failure that crosses the wire is identified by a stable snake_case
//! tag. The shared tags live in [`ErrorReason`]; scheme implementations add
//! their own closed sets (e.g. `invalid_exact_evm_payload_signature`) in the
//! chain crates and surface them as plain strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::{Display, Formatter};

use crate::chain::ChainId;

/// Machine-readable failure tags shared across schemes.
///
/// Serializes as snake_case on the wire: `"insufficient_funds"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    /// The payment header or JSON body could not be decoded.
    InvalidPayload,
    /// The x402 version is not 1 or 2.
    InvalidX402Version,
    /// The scheme name is unknown.
    UnsupportedScheme,
    /// The network identifier is neither CAIP-2 nor a known alias.
    InvalidNetwork,
    /// The payment requirements are malformed.
    InvalidPaymentRequirements,
    /// No accepted requirement matches the payload's scheme and network.
    Unmatched,
    /// No scheme handler is registered for this `(scheme, network)`.
    UnsupportedKind,
    /// The asset in the payload is not the required one.
    AssetMismatch,
    /// The authorized amount does not cover the required amount.
    AmountMismatch,
    /// The nonce does not match what the ledger expects.
    NonceMismatch,
    /// The authorization's validity window has closed.
    PaymentExpired,
    /// The payer's balance cannot cover the payment.
    InsufficientFunds,
    /// The on-ledger transaction is in a state settlement cannot proceed from.
    InvalidTransactionState,
    /// Settlement failed for an unanticipated reason.
    UnexpectedSettleError,
    /// Verification failed for an unanticipated reason.
    UnexpectedVerifyError,
    /// The requested fee payer is not one of the facilitator's signers.
    FeePayerNotManagedByFacilitator,
    /// The sponsored transaction would move the fee payer's own funds.
    FeePayerTransferringFunds,
    /// The signature is ERC-6492 wrapped and the wallet is not deployed.
    UndeployedSmartWallet,
    /// Client-side: the selected requirement exceeds the configured budget.
    ExceedsMaxValue,
    /// Client-side: the retried request was rejected again.
    PaymentRejected,
}

impl ErrorReason {
    /// The wire tag for this reason.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorReason::InvalidPayload => "invalid_payload",
            ErrorReason::InvalidX402Version => "invalid_x402_version",
            ErrorReason::UnsupportedScheme => "unsupported_scheme",
            ErrorReason::InvalidNetwork => "invalid_network",
            ErrorReason::InvalidPaymentRequirements => "invalid_payment_requirements",
            ErrorReason::Unmatched => "unmatched",
            ErrorReason::UnsupportedKind => "unsupported_kind",
            ErrorReason::AssetMismatch => "asset_mismatch",
            ErrorReason::AmountMismatch => "amount_mismatch",
            ErrorReason::NonceMismatch => "nonce_mismatch",
            ErrorReason::PaymentExpired => "payment_expired",
            ErrorReason::InsufficientFunds => "insufficient_funds",
            ErrorReason::InvalidTransactionState => "invalid_transaction_state",
            ErrorReason::UnexpectedSettleError => "unexpected_settle_error",
            ErrorReason::UnexpectedVerifyError => "unexpected_verify_error",
            ErrorReason::FeePayerNotManagedByFacilitator => {
                "fee_payer_not_managed_by_facilitator"
            }
            ErrorReason::FeePayerTransferringFunds => "fee_payer_transferring_funds",
            ErrorReason::UndeployedSmartWallet => "undeployed_smart_wallet",
            ErrorReason::ExceedsMaxValue => "exceeds_max_value",
            ErrorReason::PaymentRejected => "payment_rejected",
        }
    }
}

impl Display for ErrorReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<ErrorReason> for String {
    fn from(value: ErrorReason) -> Self {
        value.as_str().to_string()
    }
}

/// Settlement tag carrying the underlying failure message:
/// `transaction_failed: <msg>`.
pub fn transaction_failed(message: impl Display) -> String {
    format!("transaction_failed: {message}")
}

/// Tag for chains whose contracts cannot validate smart-wallet signatures:
/// `smart_contract_wallet_not_supported_on_<chain>`.
pub fn smart_contract_wallet_not_supported_on(chain_name: &str) -> String {
    format!("smart_contract_wallet_not_supported_on_{chain_name}")
}

/// Structural and cross-scheme verification failures.
///
/// These are the checks the core runs before a scheme handler sees the
/// payload: format, version, scheme/network matching, amount syntax.
#[derive(Debug, thiserror::Error)]
pub enum PaymentVerificationError {
    /// The payload or request body is malformed.
    #[error("invalid format: {0}")]
    InvalidFormat(String),
    /// The amount string violates the decimal-integer invariant.
    #[error("invalid atomic amount {0:?}")]
    InvalidAmount(String),
    /// The payload scheme differs from the requirement's.
    #[error("payload scheme {payload} does not match required {requirements}")]
    SchemeMismatch {
        /// Scheme declared in the payload.
        payload: String,
        /// Scheme the requirement demands.
        requirements: String,
    },
    /// The payload network differs from the requirement's.
    #[error("payload network {payload} does not match required {requirements}")]
    NetworkMismatch {
        /// Network declared in the payload.
        payload: ChainId,
        /// Network the requirement demands.
        requirements: ChainId,
    },
    /// The v2 accepted echo does not equal the requirement being verified.
    #[error("accepted requirements do not match the requirements under verification")]
    AcceptedRequirementsMismatch,
    /// No handler is registered for the `(scheme, network)`.
    #[error("no scheme handler registered for this scheme and network")]
    UnsupportedKind,
}

impl PaymentVerificationError {
    /// The stable wire tag for this failure.
    pub fn reason(&self) -> ErrorReason {
        match self {
            PaymentVerificationError::InvalidFormat(_) => ErrorReason::InvalidPayload,
            PaymentVerificationError::InvalidAmount(_) => ErrorReason::InvalidPayload,
            PaymentVerificationError::SchemeMismatch { .. } => ErrorReason::UnsupportedScheme,
            PaymentVerificationError::NetworkMismatch { .. } => ErrorReason::InvalidNetwork,
            PaymentVerificationError::AcceptedRequirementsMismatch => {
                ErrorReason::InvalidPaymentRequirements
            }
            PaymentVerificationError::UnsupportedKind => ErrorReason::UnsupportedKind,
        }
    }
}

impl From<serde_json::Error> for PaymentVerificationError {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidFormat(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_tags_are_snake_case() {
        assert_eq!(
            serde_json::to_string(&ErrorReason::InsufficientFunds).unwrap(),
            "\"insufficient_funds\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorReason::FeePayerTransferringFunds).unwrap(),
            "\"fee_payer_transferring_funds\""
        );
    }

    #[test]
    fn reason_display_matches_serde() {
        for reason in [
            ErrorReason::InvalidPayload,
            ErrorReason::Unmatched,
            ErrorReason::PaymentRejected,
        ] {
            let display = reason.to_string();
            let serde = serde_json::to_string(&reason).unwrap();
            assert_eq!(format!("\"{display}\""), serde);
        }
    }
}
