//! Aptos "exact" scheme for x402 payments.
//!
//! The payload carries a BCS-encoded [`RawTransaction`](tx::RawTransaction)
//! whose entry function is `0x1::primary_fungible_store::transfer` (or
//! `0x1::fungible_asset::transfer`), together with the sender's account
//! authenticator. The facilitator checks the entry function's asset,
//! recipient and amount against the requirements, enforces the gas cap on
//! sponsored transactions, refuses to sponsor its own signers, simulates,
//! and submits with a fee-payer signature when sponsoring.

pub mod chain;
pub mod exact;
pub mod tx;

pub use chain::{AptosAddress, AptosChainConfig, AptosChainProvider};
pub use exact::{AptosExactError, AptosExactFacilitator, AptosExactServer};
