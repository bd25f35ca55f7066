//! The facilitator contract: verify, settle, and supported.
//!
//! A [`Facilitator`] is anything that can check a payment payload against
//! requirements and push an accepted payment onto its ledger — whether it
//! runs in-process over a scheme registry or behind a remote HTTP endpoint.

use std::fmt::{Debug, Display};
use std::sync::Arc;

use crate::proto;

/// Asynchronous verify/settle/supported interface.
///
/// Implementations must be callable concurrently from many request tasks;
/// nothing here may hold per-request state.
pub trait Facilitator {
    /// The error type returned by this facilitator. Transport and internal
    /// failures only — business rejections travel inside the responses.
    type Error: Debug + Display + Send;

    /// Verifies a payment payload against requirements. Pure: balance reads
    /// and simulations are fine, ledger writes are not.
    fn verify(
        &self,
        request: &proto::VerifyRequest,
    ) -> impl Future<Output = Result<proto::VerifyResponse, Self::Error>> + Send;

    /// Settles a verified payment. Implementations re-verify before
    /// submitting anything.
    fn settle(
        &self,
        request: &proto::SettleRequest,
    ) -> impl Future<Output = Result<proto::SettleResponse, Self::Error>> + Send;

    /// The payment kinds and extensions this facilitator supports.
    fn supported(
        &self,
    ) -> impl Future<Output = Result<proto::SupportedResponse, Self::Error>> + Send;
}

impl<T: Facilitator> Facilitator for Arc<T> {
    type Error = T::Error;

    fn verify(
        &self,
        request: &proto::VerifyRequest,
    ) -> impl Future<Output = Result<proto::VerifyResponse, Self::Error>> + Send {
        self.as_ref().verify(request)
    }

    fn settle(
        &self,
        request: &proto::SettleRequest,
    ) -> impl Future<Output = Result<proto::SettleResponse, Self::Error>> + Send {
        self.as_ref().settle(request)
    }

    fn supported(
        &self,
    ) -> impl Future<Output = Result<proto::SupportedResponse, Self::Error>> + Send {
        self.as_ref().supported()
    }
}
