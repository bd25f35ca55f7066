//! The Solana "exact" scheme.

pub mod client;
pub mod facilitator;
pub mod server;
pub mod types;

pub use client::SolanaExactClient;
pub use facilitator::{SolanaExactError, SolanaExactFacilitator};
pub use server::SolanaExactServer;
pub use types::{ExactScheme, SolanaExactPayload};
