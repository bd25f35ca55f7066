//! Server face of the Solana "exact" scheme.

use tollgate_types::chain::ChainId;
use tollgate_types::price::{AssetAmount, Price, PriceError, resolve_price};
use tollgate_types::scheme::SchemeServer;

use crate::exact::types::ExactScheme;

/// Prices routes for the Solana "exact" scheme. Money prices resolve to
/// the cluster's canonical USDC mint.
pub struct SolanaExactServer;

impl SchemeServer for SolanaExactServer {
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
    fn dollar_price_resolves_to_usdc_mint() {
        let server = SolanaExactServer;
        let price = Price::try_from("$1").unwrap();
        let network = ChainId::new("solana", "5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp");
        let amount = server.parse_price(&price, &network).unwrap();
        assert_eq!(amount.amount, "1000000");
        assert_eq!(amount.asset, "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v");
    }
}
