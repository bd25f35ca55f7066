//! EVM scheme implementations for x402 payments.
//!
//! Two schemes live here, both settling ERC-20 transfers that the payer
//! authorized off-chain:
//!
//! - [`exact`]: ERC-3009 `transferWithAuthorization`. The payer signs an
//!   EIP-712 authorization for an exact value to an exact recipient; the
//!   facilitator submits it as a meta-transaction.
//! - [`permit`]: EIP-2612 `permit`. The payer grants the facilitator a
//!   spending allowance; settlement runs `permit` followed by
//!   `transferFrom`.
//!
//! The [`chain`] module carries the Alloy-backed provider shared by both.

pub mod chain;
pub mod exact;
pub mod permit;

pub use chain::{Eip155ChainConfig, Eip155ChainProvider, Eip155ChainReference};
pub use exact::{ExactEvmClient, ExactEvmFacilitator, ExactEvmServer};
pub use permit::{PermitEvmClient, PermitEvmFacilitator};
