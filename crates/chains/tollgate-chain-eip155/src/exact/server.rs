//! Server face of the EVM "exact" scheme.

use tollgate_types::chain::ChainId;
use tollgate_types::price::{AssetAmount, Price, PriceError, resolve_price};
use tollgate_types::scheme::SchemeServer;

use crate::exact::types::ExactScheme;

/// Prices routes for the EVM "exact" scheme.
///
/// Money prices resolve to the network's canonical USDC deployment, which
/// also pins the EIP-712 name/version the client needs for signing.
pub struct ExactEvmServer;

impl SchemeServer for ExactEvmServer {
    fn scheme(&self) -> &'static str {
        ExactScheme::VALUE
    }

    fn parse_price(&self, price: &Price, network: &ChainId) -> Result<AssetAmount, PriceError> {
        resolve_price(price, network, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dollar_price_carries_eip712_extras() {
        let server = ExactEvmServer;
        let price = Price::try_from("$0.025").unwrap();
        let network = ChainId::new("eip155", "8453");
        let amount = server.parse_price(&price, &network).unwrap();
        assert_eq!(amount.amount, "25000");
        let extra = amount.extra.unwrap();
        assert_eq!(extra["name"], "USD Coin");
    }
}
