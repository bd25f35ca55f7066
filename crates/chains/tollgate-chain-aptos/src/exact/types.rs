//! Wire types for the Aptos "exact" scheme.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use tollgate_types::lit_str;
use tollgate_types::proto::VerifyRequestBody;

use crate::chain::AptosAddress;

lit_str!(ExactScheme, "exact");

/// Typed view of a verify/settle request for this scheme.
pub type AptosExactVerifyRequest = VerifyRequestBody<AptosExactPayload>;

/// The scheme payload: the BCS raw transaction and the sender's account
/// authenticator, both base64-encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AptosExactPayload {
    /// Base64 of the BCS [`RawTransaction`](crate::tx::RawTransaction).
    pub raw_transaction: String,
    /// Base64 of the BCS
    /// [`AccountAuthenticator`](crate::tx::AccountAuthenticator).
    pub authenticator: String,
}

/// Extra data the facilitator advertises for sponsored payments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SupportedKindExtra {
    /// The sponsoring fee payer.
    pub fee_payer: AptosAddress,
    /// Whether gas is sponsored.
    pub sponsored: bool,
}
