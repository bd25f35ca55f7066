//! Well-known x402 protocol extensions.
//!
//! Everything here implements
//! [`PaymentExtension`](tollgate_types::extensions::PaymentExtension) and
//! plugs into the resource-server pipeline's extension stack:
//!
//! - [`offer_receipt`]: the server signs its offers and settlement
//!   receipts (JWS or EIP-712 style), so buyers hold verifiable evidence
//!   of the price they were quoted and the payment that settled.
//! - [`sponsoring`]: validates attached EIP-2612 permits that grant the
//!   canonical Permit2 contract allowance, letting facilitators settle
//!   without a separate approval transaction.
//! - [`negotiated`]: multi-round price negotiation with a pluggable
//!   pricing strategy; accepted proposals flow into the normal exact
//!   scheme at the negotiated amount.
//! - [`discovery`]: a bazaar index of paid resources, fed by outgoing
//!   offers and served as a JSON listing.

pub mod discovery;
pub mod negotiated;
pub mod offer_receipt;
pub mod sponsoring;

pub use discovery::{DiscoveryExtension, DiscoveryIndex};
pub use negotiated::{
    NegotiatedPricingExtension, NegotiationConfig, NegotiationOutcome, NegotiationProposal,
    PricingStrategy, SplitDifferenceStrategy,
};
pub use offer_receipt::{OfferReceiptExtension, SigningFormat, verify_jws_attestation};
pub use sponsoring::GasSponsoringExtension;
