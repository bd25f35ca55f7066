//! Server face of the NEAR "exact" scheme.

use tollgate_types::chain::ChainId;
use tollgate_types::price::{AssetAmount, Price, PriceError, resolve_price};
use tollgate_types::scheme::SchemeServer;

use crate::exact::types::ExactScheme;

/// Prices routes for the NEAR "exact" scheme. NEAR routes declare
/// explicit asset amounts; money prices fail for lack of a canonical
/// stablecoin deployment.
pub struct NearExactServer;

impl SchemeServer for NearExactServer {
    fn scheme(&self) -> &'static str {
        ExactScheme::VALUE
    }

    fn parse_price(&self, price: &Price, network: &ChainId) -> Result<AssetAmount, PriceError> {
        resolve_price(price, network, &[])
    }
}
