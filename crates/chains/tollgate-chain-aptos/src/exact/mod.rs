//! The Aptos "exact" scheme.

pub mod facilitator;
pub mod server;
pub mod types;

pub use facilitator::{AptosExactError, AptosExactFacilitator};
pub use server::AptosExactServer;
pub use types::{AptosExactPayload, ExactScheme, SupportedKindExtra};
