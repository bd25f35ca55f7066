//! Server face of the Aptos "exact" scheme.

use tollgate_types::chain::ChainId;
use tollgate_types::price::{AssetAmount, Price, PriceError, resolve_price};
use tollgate_types::scheme::SchemeServer;

use crate::exact::types::ExactScheme;

/// Prices routes for the Aptos "exact" scheme. Money prices resolve to
/// the network's canonical USDC metadata object.
pub struct AptosExactServer;

impl SchemeServer for AptosExactServer {
    fn scheme(&self) -> &'static str {
        ExactScheme::VALUE
    }

    fn parse_price(&self, price: &Price, network: &ChainId) -> Result<AssetAmount, PriceError> {
        resolve_price(price, network, &[])
    }
}
