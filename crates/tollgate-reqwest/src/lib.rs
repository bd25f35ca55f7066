//! Client-side x402 payment flow for `reqwest`.
//!
//! [`X402Payments`] is a [`reqwest_middleware::Middleware`] that turns a
//! 402 response into a paid retry: it parses the server's offer, selects a
//! requirement it can satisfy (registered scheme client, within budget,
//! matching preferences), signs a payload through the scheme client, and
//! retries the request exactly once with the payment header attached. A
//! second 402 surfaces as [`X402PaymentsError::PaymentRejected`]; there is
//! never a second retry.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tollgate_reqwest::X402Payments;
//! use tollgate_types::chain::ChainIdPattern;
//! use tollgate_types::scheme::ClientRegistry;
//!
//! # fn scheme_client() -> Arc<dyn tollgate_types::scheme::SchemeClient> { unimplemented!() }
//! let mut clients = ClientRegistry::new();
//! clients
//!     .register("exact", ChainIdPattern::wildcard("eip155"), scheme_client())
//!     .unwrap();
//!
//! let payments = X402Payments::new(clients).with_max_value("eip155:8453", 1_000_000);
//! let client = reqwest_middleware::ClientBuilder::new(reqwest::Client::new())
//!     .with(payments)
//!     .build();
//! ```

pub mod middleware;
pub mod receipt;
pub mod serialize;

pub use middleware::{PaymentPreferences, X402Payments, X402PaymentsError};
pub use receipt::decode_receipt;
pub use serialize::SerializedSchemeClient;
