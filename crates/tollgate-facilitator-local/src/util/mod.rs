//! Operational helpers for the facilitator process.

pub mod sig_down;

pub use sig_down::SigDown;
