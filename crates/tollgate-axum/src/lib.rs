//! Axum middleware for enforcing x402 payments on protected routes.
//!
//! The middleware wraps a router, matches incoming requests against the
//! seller's route table, and runs the payment pipeline on matches:
//!
//! 1. build the accepted [`PaymentRequirements`] for the route,
//! 2. answer unpaid requests with 402 (JSON plus the `PAYMENT-REQUIRED`
//!    header, or an HTML paywall for browsers),
//! 3. decode and match the payment header,
//! 4. verify through the configured facilitator,
//! 5. run the protected handler (buffered),
//! 6. settle, and only then release the handler's response with an
//!    `X-PAYMENT-RESPONSE` receipt attached.
//!
//! A failed settlement is a terminal 402: the handler's body is never
//! released unpaid. Routes that must stream can opt into `settle_first`.
//!
//! ## Example
//!
//! ```rust,no_run
//! use axum::{Router, routing::get};
//! use tollgate_axum::{FacilitatorClient, X402Middleware};
//! use tollgate_types::routes::RouteSet;
//!
//! let facilitator = FacilitatorClient::try_from("https://facilitator.example/").unwrap();
//! let routes: RouteSet = r#"{
//!     "GET /weather": {
//!         "accepts": [{
//!             "network": "base-sepolia",
//!             "payTo": "0xBAc675C310721717Cd4A37F6cbeA1F081b1C2a07",
//!             "price": "$0.01"
//!         }]
//!     }
//! }"#.parse().unwrap();
//!
//! let x402 = X402Middleware::new(facilitator).with_routes(routes);
//! let app: Router = Router::new()
//!     .route("/weather", get(|| async { "sunny" }))
//!     .layer(x402);
//! ```
//!
//! [`PaymentRequirements`]: tollgate_types::proto::PaymentRequirements

pub mod facilitator_client;
pub mod layer;
pub mod paywall;
pub mod requirements;

pub use facilitator_client::{FacilitatorClient, FacilitatorClientError};
pub use layer::{X402Middleware, X402MiddlewareService};
pub use requirements::build_requirements;
