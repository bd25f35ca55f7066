//! Cashu "cashu-token" scheme for x402 payments.
//!
//! The payload is a list of Cashu proofs. Verification sums their amounts
//! against the requirement and checks every proof belongs to a keyset the
//! mint still accepts; settlement redeems the proofs at the mint, which
//! marks them consumed. The blinded-signature cryptography lives behind
//! [`CashuMint`](mint::CashuMint); this crate owns the protocol checks.

pub mod mint;
pub mod token;

pub use mint::{CashuMint, CashuMintConfig, RestCashuMint};
pub use token::{CashuClient, CashuProof, CashuTokenError, CashuTokenFacilitator};
