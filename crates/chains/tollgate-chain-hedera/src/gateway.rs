//! Gateway contract for Hedera transaction decoding and submission.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tollgate_types::chain::ChainId;
use url::Url;

/// The asset id under which plain HBAR transfers are priced.
pub const HBAR_ASSET: &str = "0.0.0";

/// One ledger movement inside a transfer transaction. Debits are
/// negative, credits positive, in the asset's atomic unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LedgerMovement {
    /// The account moved against, `shard.realm.num` form.
    pub account: String,
    /// Signed amount in atomic units.
    pub amount: i128,
    /// Token id, or [`HBAR_ASSET`] for plain HBAR.
    #[serde(default = "default_hbar")]
    pub token: String,
}

fn default_hbar() -> String {
    HBAR_ASSET.to_string()
}

/// What a decoded transfer transaction looks like to the scheme.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSummary {
    /// The account paying the node and network fees.
    pub fee_payer: String,
    /// Every movement the transaction performs.
    pub movements: Vec<LedgerMovement>,
    /// The transaction id, `account@seconds.nanos` form.
    pub transaction_id: String,
}

/// Failures at the gateway.
#[derive(Debug, thiserror::Error)]
pub enum HederaGatewayError {
    /// The bytes are not a decodable signed transfer.
    #[error("undecodable transaction: {0}")]
    Undecodable(String),
    /// Transport failure.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    /// The gateway answered with an error body.
    #[error("gateway error: {0}")]
    Api(String),
}

/// Decodes and submits signed Hedera transactions.
///
/// The concrete protobuf codec and consensus-node connectivity live behind
/// this trait; the bundled [`RestHederaGateway`] delegates both to an
/// operator-run relay service.
#[async_trait]
pub trait HederaGateway: Send + Sync {
    /// Decodes a signed transfer into its movements.
    async fn decode_transfer(&self, bytes: &[u8]) -> Result<TransferSummary, HederaGatewayError>;

    /// Submits a signed transfer; returns the transaction id.
    async fn submit(&self, bytes: &[u8]) -> Result<String, HederaGatewayError>;

    /// Waits for a receipt; `Ok(true)` means SUCCESS.
    async fn receipt(&self, transaction_id: &str) -> Result<bool, HederaGatewayError>;
}

/// Configuration for the REST gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HederaGatewayConfig {
    /// Network reference: `mainnet` or `testnet`.
    pub network: String,
    /// The relay service base URL.
    pub gateway_url: Url,
    /// The facilitator's operator account, `shard.realm.num` form.
    pub operator_account: String,
}

impl HederaGatewayConfig {
    /// The network as a CAIP-2 id.
    pub fn chain_id(&self) -> ChainId {
        ChainId::new("hedera", self.network.clone())
    }
}

/// A gateway backed by an operator-run relay service exposing
/// `/transactions/decode`, `/transactions`, and
/// `/transactions/{id}/receipt`.
pub struct RestHederaGateway {
    http: reqwest::Client,
    base_url: Url,
}

impl RestHederaGateway {
    /// Creates a gateway from configuration.
    pub fn new(config: &HederaGatewayConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.gateway_url.clone(),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, HederaGatewayError> {
        self.base_url
            .join(path)
            .map_err(|e| HederaGatewayError::Api(e.to_string()))
    }
}

#[async_trait]
impl HederaGateway for RestHederaGateway {
    async fn decode_transfer(&self, bytes: &[u8]) -> Result<TransferSummary, HederaGatewayError> {
        let response = self
            .http
            .post(self.endpoint("transactions/decode")?)
            .header("Content-Type", "application/octet-stream")
            .body(bytes.to_vec())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(HederaGatewayError::Undecodable(response.text().await?));
        }
        Ok(response.json().await?)
    }

    async fn submit(&self, bytes: &[u8]) -> Result<String, HederaGatewayError> {
        let response = self
            .http
            .post(self.endpoint("transactions")?)
            .header("Content-Type", "application/octet-stream")
            .body(bytes.to_vec())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(HederaGatewayError::Api(response.text().await?));
        }
        let body: serde_json::Value = response.json().await?;
        body.get("transactionId")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| HederaGatewayError::Api("submit response missing id".into()))
    }

    async fn receipt(&self, transaction_id: &str) -> Result<bool, HederaGatewayError> {
        let response = self
            .http
            .get(self.endpoint(&format!("transactions/{transaction_id}/receipt"))?)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(HederaGatewayError::Api(response.text().await?));
        }
        let body: serde_json::Value = response.json().await?;
        Ok(body.get("status").and_then(|v| v.as_str()) == Some("SUCCESS"))
    }
}
