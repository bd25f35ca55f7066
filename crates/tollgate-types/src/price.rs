//! Route prices: human money, explicit asset amounts, and the parsers that
//! bridge them.
//!
//! A route declares what it costs either as money (`"$0.10"`, `0.1`) or as
//! an explicit atomic asset amount. Money runs through the registered
//! [`MoneyParser`] chain; the final fallback converts to the canonical USDC
//! deployment of the target network.

use serde::{Deserialize, Serialize};

use crate::chain::ChainId;
use crate::networks;
use crate::util::money_amount::{MoneyAmount, MoneyAmountParseError};

/// An atomic amount of a concrete asset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssetAmount {
    /// Amount in atomic units, as a decimal integer string.
    pub amount: String,
    /// Token contract / mint / asset identifier.
    pub asset: String,
    /// Token decimals, when the declarer knows them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u32>,
    /// Scheme-specific extras to carry into the requirements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// A route price as the seller wrote it.
#[derive(Debug, Clone, PartialEq)]
pub enum Price {
    /// Human money: `"$1.50"`, `"0.10"`, `1.5`.
    Money(MoneyAmount),
    /// An explicit atomic asset amount, passed through unchanged.
    Atomic(AssetAmount),
}

impl Serialize for Price {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Price::Money(amount) => serializer.serialize_str(&amount.to_string()),
            Price::Atomic(asset_amount) => asset_amount.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Price {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum PriceWire {
            Text(String),
            Number(f64),
            Atomic(AssetAmount),
        }

        match PriceWire::deserialize(deserializer)? {
            PriceWire::Text(s) => MoneyAmount::parse(&s)
                .map(Price::Money)
                .map_err(serde::de::Error::custom),
            PriceWire::Number(n) => MoneyAmount::try_from(n)
                .map(Price::Money)
                .map_err(serde::de::Error::custom),
            PriceWire::Atomic(asset_amount) => Ok(Price::Atomic(asset_amount)),
        }
    }
}

impl From<MoneyAmount> for Price {
    fn from(value: MoneyAmount) -> Self {
        Price::Money(value)
    }
}

impl From<AssetAmount> for Price {
    fn from(value: AssetAmount) -> Self {
        Price::Atomic(value)
    }
}

impl TryFrom<&str> for Price {
    type Error = MoneyAmountParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Ok(Price::Money(MoneyAmount::parse(value)?))
    }
}

/// Errors from resolving a price into an asset amount.
#[derive(Debug, thiserror::Error)]
pub enum PriceError {
    /// The money string failed to parse.
    #[error(transparent)]
    Money(#[from] MoneyAmountParseError),
    /// No money parser could resolve an asset for this network.
    #[error("no stablecoin deployment known for {0}")]
    UnknownStablecoin(ChainId),
    /// The explicit asset amount failed a sanity check.
    #[error("invalid asset amount: {0}")]
    InvalidAssetAmount(String),
}

/// Converts money to an asset amount on a specific network.
///
/// Parsers run in registration order; the first `Some` wins. Returning
/// `None` defers to the next parser.
pub trait MoneyParser: Send + Sync {
    /// Attempts to resolve `amount` as an asset amount on `network`.
    fn parse_money(
        &self,
        amount: &MoneyAmount,
        network: &ChainId,
    ) -> Option<Result<AssetAmount, PriceError>>;
}

/// Fallback parser: canonical USDC deployment of the network.
pub struct UsdcMoneyParser;

impl MoneyParser for UsdcMoneyParser {
    fn parse_money(
        &self,
        amount: &MoneyAmount,
        network: &ChainId,
    ) -> Option<Result<AssetAmount, PriceError>> {
        let deployment = match networks::usdc_deployment(network) {
            Some(deployment) => deployment,
            None => return Some(Err(PriceError::UnknownStablecoin(network.clone()))),
        };
        let atomic = match amount.as_atomic(deployment.decimals) {
            Ok(atomic) => atomic,
            Err(e) => return Some(Err(PriceError::Money(e))),
        };
        let extra = deployment.eip712_name.map(|name| {
            serde_json::json!({
                "name": name,
                "version": deployment.eip712_version,
            })
        });
        Some(Ok(AssetAmount {
            amount: atomic.to_string(),
            asset: deployment.address.to_string(),
            decimals: Some(deployment.decimals),
            extra,
        }))
    }
}

/// Resolves a [`Price`] through a parser chain, ending at the USDC fallback.
///
/// Explicit atomic amounts only get an amount-syntax sanity check and pass
/// through untouched.
pub fn resolve_price(
    price: &Price,
    network: &ChainId,
    parsers: &[&dyn MoneyParser],
) -> Result<AssetAmount, PriceError> {
    match price {
        Price::Atomic(asset_amount) => {
            if asset_amount.amount.is_empty()
                || !asset_amount.amount.bytes().all(|b| b.is_ascii_digit())
            {
                return Err(PriceError::InvalidAssetAmount(asset_amount.amount.clone()));
            }
            if asset_amount.asset.is_empty() {
                return Err(PriceError::InvalidAssetAmount("empty asset".to_string()));
            }
            Ok(asset_amount.clone())
        }
        Price::Money(amount) => {
            for parser in parsers {
                if let Some(result) = parser.parse_money(amount, network) {
                    return result;
                }
            }
            UsdcMoneyParser
                .parse_money(amount, network)
                .expect("fallback parser always answers")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dollar_price_resolves_to_usdc() {
        let price = Price::try_from("$1.50").unwrap();
        let network = ChainId::new("eip155", "84532");
        let resolved = resolve_price(&price, &network, &[]).unwrap();
        assert_eq!(resolved.amount, "1500000");
        assert_eq!(resolved.asset, "0x036CbD53842c5426634e7929541eC2318f3dCF7e");
        assert_eq!(resolved.extra.unwrap()["version"], "2");
    }

    #[test]
    fn atomic_price_passes_through() {
        let price = Price::Atomic(AssetAmount {
            amount: "1000".to_string(),
            asset: "0x036CbD53842c5426634e7929541eC2318f3dCF7e".to_string(),
            decimals: Some(6),
            extra: None,
        });
        let network = ChainId::new("eip155", "84532");
        let resolved = resolve_price(&price, &network, &[]).unwrap();
        assert_eq!(resolved.amount, "1000");
    }

    #[test]
    fn atomic_price_rejects_non_integer_amount() {
        let price = Price::Atomic(AssetAmount {
            amount: "1.5".to_string(),
            asset: "0xToken".to_string(),
            decimals: None,
            extra: None,
        });
        let network = ChainId::new("eip155", "84532");
        assert!(resolve_price(&price, &network, &[]).is_err());
    }

    #[test]
    fn money_fails_on_network_without_usdc() {
        let price = Price::try_from("$1").unwrap();
        let network = ChainId::new("lightning", "signet");
        assert!(matches!(
            resolve_price(&price, &network, &[]),
            Err(PriceError::UnknownStablecoin(_))
        ));
    }

    #[test]
    fn custom_parser_wins_over_fallback() {
        struct SatsParser;
        impl MoneyParser for SatsParser {
            fn parse_money(
                &self,
                amount: &MoneyAmount,
                network: &ChainId,
            ) -> Option<Result<AssetAmount, PriceError>> {
                if network.namespace != "lightning" {
                    return None;
                }
                let sats = amount.as_atomic(8).ok()?.checked_div(1000)?;
                Some(Ok(AssetAmount {
                    amount: sats.to_string(),
                    asset: "sat".to_string(),
                    decimals: Some(0),
                    extra: None,
                }))
            }
        }

        let price = Price::try_from("0.00001").unwrap();
        let network = ChainId::new("lightning", "signet");
        let resolved = resolve_price(&price, &network, &[&SatsParser]).unwrap();
        assert_eq!(resolved.asset, "sat");
    }

    #[test]
    fn price_deserializes_from_string_number_and_object() {
        let from_string: Price = serde_json::from_str("\"$0.10\"").unwrap();
        assert!(matches!(from_string, Price::Money(_)));

        let from_number: Price = serde_json::from_str("0.1").unwrap();
        assert!(matches!(from_number, Price::Money(_)));

        let from_object: Price =
            serde_json::from_str(r#"{"amount":"1000","asset":"0xToken"}"#).unwrap();
        assert!(matches!(from_object, Price::Atomic(_)));
    }
}
