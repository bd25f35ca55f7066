//! Core types for the x402 payment protocol.
//!
//! This crate provides the foundational types shared by every role in an x402
//! deployment: the resource server that prices its routes, the client that
//! pays for them, and the facilitator that verifies and settles payments.
//! It is chain-agnostic; chain-specific scheme implementations live in the
//! `tollgate-chain-*` crates.
//!
//! # Overview
//!
//! The x402 protocol runs micropayments over HTTP 402 Payment Required. A
//! server answers an unpaid request with payment requirements, the client
//! signs a payment authorization and retries once, and a facilitator checks
//! the authorization and submits it to the ledger.
//!
//! # Modules
//!
//! - [`chain`] - CAIP-2 chain identifiers and match patterns
//! - [`extensions`] - Hook points around the verify/settle pipeline
//! - [`facilitator`] - The facilitator verify/settle/supported contract
//! - [`headers`] - HTTP header framing: base64 JSON codecs and header names
//! - [`networks`] - Legacy network name aliases and stablecoin deployments
//! - [`price`] - Human prices, money parsers, and atomic asset amounts
//! - [`proto`] - Wire format types for protocol messages
//! - [`routes`] - Route pattern compilation and matching
//! - [`scheme`] - Scheme faces (client/server/facilitator) and the registry
//! - [`timestamp`] - Unix timestamps for authorization validity windows
//! - [`util`] - Base64 wrappers, literal strings, decimal money amounts

pub mod chain;
pub mod extensions;
pub mod facilitator;
pub mod headers;
pub mod networks;
pub mod price;
pub mod proto;
pub mod routes;
pub mod scheme;
pub mod timestamp;
pub mod util;
