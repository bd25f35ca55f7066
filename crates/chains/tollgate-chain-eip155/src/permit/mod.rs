//! The EVM "permit" scheme: EIP-2612 allowance plus `transferFrom`.

pub mod client;
pub mod facilitator;
pub mod types;

pub use client::PermitEvmClient;
pub use facilitator::{PermitEvmError, PermitEvmFacilitator};
pub use types::{PermitAuthorization, PermitDomain, PermitEvmPayload, PermitScheme};
