//! The EVM "exact" scheme: ERC-3009 `transferWithAuthorization`.

pub mod client;
pub mod facilitator;
pub mod server;
pub mod types;

pub use client::ExactEvmClient;
pub use facilitator::{ExactEvmError, ExactEvmFacilitator};
pub use server::ExactEvmServer;
pub use types::{ExactEvmAuthorization, ExactEvmPayload, ExactScheme};
