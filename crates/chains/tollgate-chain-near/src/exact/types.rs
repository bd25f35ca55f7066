//! Wire types for the NEAR "exact" scheme.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use tollgate_types::lit_str;
use tollgate_types::proto::VerifyRequestBody;

lit_str!(ExactScheme, "exact");

/// Typed view of a verify/settle request for this scheme.
pub type NearExactVerifyRequest = VerifyRequestBody<NearExactPayload>;

/// The two accepted transports.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NearExactPayload {
    /// NEP-366: a signed delegate action the relayer submits.
    Delegate(DelegatePayload),
    /// NEP-413: a signed off-chain payment intent.
    SignedMessage(SignedMessagePayload),
}

/// NEP-366 transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegatePayload {
    /// Base64 of the Borsh
    /// [`SignedDelegateAction`](crate::tx::SignedDelegateAction).
    pub signed_delegate_action: String,
}

/// NEP-413 transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedMessagePayload {
    /// The signing account.
    pub account_id: String,
    /// The signing key, `ed25519:`-prefixed base58.
    pub public_key: String,
    /// Base64 Ed25519 signature over the NEP-413 digest.
    pub signature: String,
    /// The canonical payment message (JSON: payTo, asset, amount).
    pub message: String,
    /// Base64 32-byte anti-replay nonce.
    pub nonce: String,
    /// The message recipient, the seller's identifier.
    pub recipient: String,
    /// Optional wallet callback URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

/// The canonical payment intent inside a NEP-413 message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalPaymentMessage {
    /// Recipient account.
    pub pay_to: String,
    /// FT contract account.
    pub asset: String,
    /// Amount in atomic units.
    pub amount: String,
}
