//! Minimal LND REST client: payment request decoding and invoice lookup.

use serde::{Deserialize, Serialize};
use tollgate_types::chain::ChainId;
use url::Url;

/// LND connection settings, usually sourced from `LND_REST_URL`,
/// `LND_MACAROON_HEX`, and `LIGHTNING_NETWORK`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LndConfig {
    /// Network reference: `mainnet`, `testnet`, or `signet`.
    pub network: String,
    /// The LND REST base URL.
    pub rest_url: Url,
    /// Hex-encoded macaroon with invoice read permissions.
    pub macaroon_hex: String,
}

impl LndConfig {
    /// The network as a CAIP-2 id.
    pub fn chain_id(&self) -> ChainId {
        ChainId::new("lightning", self.network.clone())
    }
}

/// Failures talking to LND.
#[derive(Debug, thiserror::Error)]
pub enum LndError {
    /// HTTP transport failure.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    /// LND answered with an error body.
    #[error("lnd error: {0}")]
    Api(String),
}

/// A decoded BOLT11 payment request, the fields this scheme reads.
#[derive(Debug, Clone, Deserialize)]
pub struct DecodedPayReq {
    /// Invoice amount in satoshis, as a decimal string.
    #[serde(default)]
    pub num_satoshis: String,
    /// Hex payment hash.
    pub payment_hash: String,
    /// Invoice creation time, seconds since epoch, as a decimal string.
    #[serde(default)]
    pub timestamp: String,
    /// Invoice lifetime in seconds, as a decimal string.
    #[serde(default)]
    pub expiry: String,
}

/// An invoice as reported by LND's lookup endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct LookedUpInvoice {
    /// Whether the invoice is settled.
    #[serde(default)]
    pub settled: bool,
    /// Amount actually paid, in satoshis, as a decimal string.
    #[serde(default)]
    pub amt_paid_sat: String,
}

/// REST client over one LND node.
pub struct LndRestClient {
    http: reqwest::Client,
    base_url: Url,
    macaroon_hex: String,
}

impl LndRestClient {
    /// Creates a client from connection settings.
    pub fn new(config: &LndConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.rest_url.clone(),
            macaroon_hex: config.macaroon_hex.clone(),
        }
    }

    async fn get(&self, path: &str) -> Result<serde_json::Value, LndError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| LndError::Api(e.to_string()))?;
        let response = self
            .http
            .get(url)
            .header("Grpc-Metadata-macaroon", &self.macaroon_hex)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(LndError::Api(response.text().await?));
        }
        Ok(response.json().await?)
    }

    /// Decodes a BOLT11 payment request.
    pub async fn decode_pay_req(&self, bolt11: &str) -> Result<DecodedPayReq, LndError> {
        let value = self.get(&format!("v1/payreq/{bolt11}")).await?;
        serde_json::from_value(value).map_err(|e| LndError::Api(e.to_string()))
    }

    /// Looks up an invoice by its hex payment hash.
    pub async fn lookup_invoice(&self, payment_hash: &str) -> Result<LookedUpInvoice, LndError> {
        let value = self.get(&format!("v1/invoice/{payment_hash}")).await?;
        serde_json::from_value(value).map_err(|e| LndError::Api(e.to_string()))
    }
}
