//! Hedera "exact" scheme for x402 payments.
//!
//! The payload is a base64-encoded, fully signed Hedera transfer
//! transaction. Decoding the protobuf frame and talking to consensus nodes
//! is delegated to a [`HederaGateway`](gateway::HederaGateway); this crate
//! owns the protocol checks: the transfer must debit the payer and credit
//! `payTo` the exact amount in the required asset (HBAR under the `0.0.0`
//! sentinel, anything else a token id), and the transaction's fee payer
//! must be the facilitator's operator account.

pub mod exact;
pub mod gateway;

pub use exact::{HederaExactError, HederaExactFacilitator, HederaExactServer};
pub use gateway::{HederaGateway, HederaGatewayConfig, RestHederaGateway, TransferSummary};
