//! The NEAR "exact" scheme.

pub mod facilitator;
pub mod server;
pub mod types;

pub use facilitator::{NearExactError, NearExactFacilitator};
pub use server::NearExactServer;
pub use types::{ExactScheme, NearExactPayload};
