//! Discovery: a bazaar of paid resources.
//!
//! Every offer the server makes feeds a shared index keyed by resource
//! URL. The index can be served as a JSON listing so crawlers and agent
//! marketplaces learn what a server sells without paying first.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tollgate_types::extensions::PaymentExtension;
use tollgate_types::proto::{PaymentRequired, PaymentRequirements};

/// Extension key, as advertised in `/supported`.
pub const EXTENSION_KEY: &str = "discovery";

/// One discoverable resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredResource {
    /// Resource URL.
    pub resource: String,
    /// Human-readable description.
    pub description: String,
    /// The payment options the resource accepts.
    pub accepts: Vec<PaymentRequirements>,
}

/// The shared index of discoverable resources.
#[derive(Default)]
pub struct DiscoveryIndex {
    entries: DashMap<String, DiscoveredResource>,
}

impl DiscoveryIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records (or refreshes) a resource from an outgoing offer.
    pub fn record(&self, required: &PaymentRequired) {
        let Some(resource) = required
            .resource
            .as_ref()
            .map(|u| u.to_string())
            .or_else(|| {
                required
                    .accepts
                    .first()
                    .and_then(|r| r.resource.as_ref().map(|u| u.to_string()))
            })
        else {
            return;
        };
        let description = required
            .accepts
            .first()
            .map(|r| r.description.clone())
            .unwrap_or_default();
        self.entries.insert(
            resource.clone(),
            DiscoveredResource {
                resource,
                description,
                accepts: required.accepts.clone(),
            },
        );
    }

    /// The current listing, sorted by resource URL.
    pub fn listing(&self) -> Vec<DiscoveredResource> {
        let mut entries: Vec<DiscoveredResource> =
            self.entries.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| a.resource.cmp(&b.resource));
        entries
    }
}

/// Feeds the index from outgoing 402 offers.
pub struct DiscoveryExtension {
    index: Arc<DiscoveryIndex>,
}

impl DiscoveryExtension {
    /// Creates the extension over a shared index.
    pub fn new(index: Arc<DiscoveryIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl PaymentExtension for DiscoveryExtension {
    fn key(&self) -> &'static str {
        EXTENSION_KEY
    }

    async fn on_payment_required(&self, required: &mut PaymentRequired) {
        self.index.record(required);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_types::chain::ChainId;
    use tollgate_types::proto::X402Version;

    fn offer(resource: &str, description: &str) -> PaymentRequired {
        PaymentRequired {
            x402_version: X402Version::V2,
            accepts: vec![PaymentRequirements {
                scheme: "exact".to_string(),
                network: ChainId::new("eip155", "84532"),
                pay_to: "0xBAc6".to_string(),
                asset: "0x036C".to_string(),
                amount: "1000".to_string(),
                max_timeout_seconds: 300,
                description: description.to_string(),
                mime_type: "application/json".to_string(),
                resource: Some(resource.parse().unwrap()),
                output_schema: None,
                extra: None,
            }],
            error: None,
            resource: Some(resource.parse().unwrap()),
            extensions: None,
        }
    }

    #[tokio::test]
    async fn offers_populate_the_index() {
        let index = Arc::new(DiscoveryIndex::new());
        let extension = DiscoveryExtension::new(Arc::clone(&index));

        let mut first = offer("https://api.example/weather", "weather data");
        let mut second = offer("https://api.example/reports", "daily reports");
        extension.on_payment_required(&mut first).await;
        extension.on_payment_required(&mut second).await;

        let listing = index.listing();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].resource, "https://api.example/reports");
        assert_eq!(listing[1].description, "weather data");
    }

    #[tokio::test]
    async fn repeated_offers_refresh_in_place() {
        let index = Arc::new(DiscoveryIndex::new());
        let extension = DiscoveryExtension::new(Arc::clone(&index));
        let mut offer_a = offer("https://api.example/weather", "v1");
        let mut offer_b = offer("https://api.example/weather", "v2");
        extension.on_payment_required(&mut offer_a).await;
        extension.on_payment_required(&mut offer_b).await;
        let listing = index.listing();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].description, "v2");
    }
}
