//! Hyperliquid "exact" scheme for x402 payments.
//!
//! The payer signs a `HyperliquidTransaction:SendAsset` EIP-712 action.
//! Verification recovers the signer and checks destination, token, amount,
//! and the nonce's age. Settlement POSTs the action to the exchange
//! endpoint and then polls the payer's non-funding ledger updates to find
//! the resulting transaction hash by `(destination, nonce, type == "send")`.

pub mod exact;
pub mod signing;

pub use exact::{
    HyperliquidConfig, HyperliquidExactClient, HyperliquidExactError, HyperliquidExactFacilitator,
    SendAssetAction, SendAssetPayload,
};
