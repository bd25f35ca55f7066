//! Wire types for the Solana "exact" scheme.

use serde::{Deserialize, Serialize};
use solana_pubkey::{Pubkey, pubkey};
use std::fmt::{Display, Formatter};
use tollgate_types::lit_str;
use tollgate_types::proto::{PaymentPayload, VerifyRequestBody};

use crate::chain::Address;

lit_str!(ExactScheme, "exact");

/// The associated-token-account program.
pub const ATA_PROGRAM_PUBKEY: Pubkey = pubkey!("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");

/// Typed view of a verify/settle request for this scheme.
pub type SolanaExactVerifyRequest = VerifyRequestBody<SolanaExactPayload>;

/// Typed view of the payment payload for this scheme.
pub type SolanaExactPaymentPayload = PaymentPayload<SolanaExactPayload>;

/// The scheme payload: a base64, bincode-serialized
/// [`VersionedTransaction`](solana_transaction::versioned::VersionedTransaction)
/// signed by the payer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolanaExactPayload {
    /// The serialized transaction.
    pub transaction: String,
}

/// Extra data the facilitator advertises for sponsored payments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedKindExtra {
    /// The account that pays transaction fees.
    pub fee_payer: Address,
}
