//! The requirement builder: route configuration to concrete offers.

use tollgate_types::chain::ChainId;
use tollgate_types::price::{PriceError, resolve_price};
use tollgate_types::proto::{PaymentRequirements, SupportedResponse};
use tollgate_types::routes::RouteConfig;
use tollgate_types::scheme::ServerRegistry;
use url::Url;

/// Builds one [`PaymentRequirements`] per accepted option on a route.
///
/// Each option's price resolves through the scheme's server face when one
/// is registered (falling back to the shared resolver), the route's
/// extension declarations merge into `extra`, and facilitator-advertised
/// extras (fee payers, sponsors) overlay on top. Options whose price
/// cannot resolve are dropped with a warning rather than failing the
/// request.
pub fn build_requirements(
    config: &RouteConfig,
    resource: Option<Url>,
    servers: &ServerRegistry,
    supported: &SupportedResponse,
) -> Vec<PaymentRequirements> {
    config
        .accepts
        .iter()
        .filter_map(|option| {
            let asset_amount = match servers.lookup(&option.scheme, &option.network) {
                Some(server) => server.parse_price(&option.price, &option.network),
                None => resolve_price(&option.price, &option.network, &[]),
            };
            let asset_amount = match asset_amount {
                Ok(asset_amount) => asset_amount,
                Err(error) => {
                    tracing::warn!(
                        scheme = %option.scheme,
                        network = %option.network,
                        error = %error,
                        "dropping unpriceable payment option"
                    );
                    return None;
                }
            };

            let mut requirements = PaymentRequirements {
                scheme: option.scheme.clone(),
                network: option.network.clone(),
                pay_to: option.pay_to.clone(),
                asset: asset_amount.asset,
                amount: asset_amount.amount,
                max_timeout_seconds: config.max_timeout_seconds,
                description: config.description.clone(),
                mime_type: config
                    .mime_type
                    .clone()
                    .unwrap_or_else(|| "application/json".to_string()),
                resource: resource.clone(),
                output_schema: config.output_schema.clone(),
                extra: asset_amount.extra,
            };

            // Route-declared extension data.
            for (key, value) in &config.extensions {
                merge_extra(&mut requirements, key, value.clone());
            }

            // Facilitator extras for this kind (fee payer, sponsor, ...).
            if let Some(kind) = supported
                .kinds
                .iter()
                .find(|k| k.scheme == option.scheme && k.network == option.network)
            {
                if let Some(server) = servers.lookup(&option.scheme, &option.network) {
                    server.enhance_requirements(&mut requirements, kind);
                } else if let Some(extra) = &kind.extra {
                    if let Some(object) = extra.as_object() {
                        for (key, value) in object {
                            merge_extra(&mut requirements, key, value.clone());
                        }
                    }
                }
            }

            Some(requirements)
        })
        .collect()
}

fn merge_extra(requirements: &mut PaymentRequirements, key: &str, value: serde_json::Value) {
    match &mut requirements.extra {
        Some(serde_json::Value::Object(map)) => {
            map.entry(key.to_string()).or_insert(value);
        }
        Some(_) => {}
        None => {
            let mut map = serde_json::Map::new();
            map.insert(key.to_string(), value);
            requirements.extra = Some(serde_json::Value::Object(map));
        }
    }
}

/// Validates a built requirement set against a matched payment: same
/// scheme and CAIP-2 network selects the single candidate.
pub fn find_matching<'a>(
    accepts: &'a [PaymentRequirements],
    scheme: &str,
    network: &ChainId,
) -> Option<&'a PaymentRequirements> {
    accepts
        .iter()
        .find(|r| r.scheme == scheme && &r.network == network)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tollgate_types::price::Price;
    use tollgate_types::proto::SupportedPaymentKind;
    use tollgate_types::routes::PriceOption;

    fn route_config() -> RouteConfig {
        RouteConfig {
            accepts: vec![PriceOption {
                scheme: "exact".to_string(),
                network: ChainId::new("eip155", "84532"),
                pay_to: "0xBAc675C310721717Cd4A37F6cbeA1F081b1C2a07".to_string(),
                price: Price::try_from("$0.001").unwrap(),
            }],
            description: "weather".to_string(),
            mime_type: None,
            output_schema: None,
            max_timeout_seconds: 300,
            extensions: BTreeMap::new(),
            settle_first: false,
        }
    }

    #[test]
    fn builds_usdc_requirements_from_dollar_price() {
        let accepts = build_requirements(
            &route_config(),
            Some("https://api.example/weather".parse().unwrap()),
            &ServerRegistry::new(),
            &SupportedResponse::default(),
        );
        assert_eq!(accepts.len(), 1);
        let requirement = &accepts[0];
        assert_eq!(requirement.amount, "1000");
        assert_eq!(requirement.mime_type, "application/json");
        assert_eq!(
            requirement.extra.as_ref().unwrap()["name"],
            serde_json::json!("USDC")
        );
    }

    #[test]
    fn merges_facilitator_extras() {
        let supported = SupportedResponse {
            kinds: vec![SupportedPaymentKind {
                x402_version: 2,
                scheme: "exact".to_string(),
                network: ChainId::new("eip155", "84532"),
                extra: Some(serde_json::json!({"feePayer": "0xFEE"})),
            }],
            extensions: Vec::new(),
            signers: Default::default(),
        };
        let accepts = build_requirements(
            &route_config(),
            None,
            &ServerRegistry::new(),
            &supported,
        );
        assert_eq!(
            accepts[0].extra.as_ref().unwrap()["feePayer"],
            serde_json::json!("0xFEE")
        );
    }

    #[test]
    fn drops_unpriceable_options() {
        let mut config = route_config();
        config.accepts.push(PriceOption {
            scheme: "exact".to_string(),
            network: ChainId::new("lightning", "signet"),
            pay_to: "node".to_string(),
            price: Price::try_from("$1").unwrap(),
        });
        let accepts = build_requirements(
            &config,
            None,
            &ServerRegistry::new(),
            &SupportedResponse::default(),
        );
        // No stablecoin on lightning: the option is dropped, the EVM one
        // survives.
        assert_eq!(accepts.len(), 1);
    }

    #[test]
    fn find_matching_selects_by_scheme_and_network() {
        let accepts = build_requirements(
            &route_config(),
            None,
            &ServerRegistry::new(),
            &SupportedResponse::default(),
        );
        let network = ChainId::new("eip155", "84532");
        assert!(find_matching(&accepts, "exact", &network).is_some());
        assert!(find_matching(&accepts, "permit", &network).is_none());
        assert!(find_matching(&accepts, "exact", &ChainId::new("eip155", "1")).is_none());
    }
}
