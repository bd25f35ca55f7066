//! In-process x402 facilitator.
//!
//! [`FacilitatorLocal`] implements the
//! [`Facilitator`](tollgate_types::facilitator::Facilitator) contract by
//! routing each request through the
//! [`FacilitatorRegistry`](tollgate_types::scheme::FacilitatorRegistry):
//! the `(scheme, network)` key is probed out of the raw request, the
//! matching handler verifies or settles, and `/supported` is the union of
//! every handler's capabilities.
//!
//! The [`handlers`] module exposes the HTTP surface (`GET /supported`,
//! `POST /verify`, `POST /settle`) as an axum router. Business rejections
//! travel as 200 responses with `isValid: false` / `success: false`;
//! non-2xx statuses are reserved for transport and parse failures.

pub mod facilitator_local;
pub mod handlers;
pub mod util;

pub use facilitator_local::{FacilitatorLocal, FacilitatorLocalError};
pub use util::SigDown;
