//! Bitcoin Lightning "exact" scheme for x402 payments.
//!
//! The payload carries a BOLT11 invoice the payer settles out of band.
//! Verification decodes the invoice through LND's REST API and checks the
//! satoshi amount and expiry; settlement looks the invoice up by payment
//! hash and succeeds once it is settled for at least the required amount.
//! The settlement identifier is the invoice's payment hash.

pub mod exact;
pub mod lnd;

pub use exact::{LightningExactError, LightningExactFacilitator, LightningExactPayload};
pub use lnd::{LndConfig, LndRestClient};
