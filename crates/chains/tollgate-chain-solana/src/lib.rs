//! Solana "exact" scheme for x402 payments.
//!
//! The payload carries a base64, bincode-serialized [`VersionedTransaction`]
//! built by the payer: two compute-budget instructions followed by an SPL
//! `TransferChecked` into the recipient's associated token account. The
//! facilitator validates the instruction layout, makes sure its fee payer
//! never moves funds, simulates, co-signs, and submits.
//!
//! [`VersionedTransaction`]: solana_transaction::versioned::VersionedTransaction

pub mod chain;
pub mod exact;

pub use chain::{SolanaChainConfig, SolanaChainProvider};
pub use exact::{SolanaExactClient, SolanaExactError, SolanaExactFacilitator, SolanaExactServer};
