//! Mint contract: keyset listing and proof redemption.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tollgate_types::chain::ChainId;
use url::Url;

use crate::token::CashuProof;

/// Mint connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashuMintConfig {
    /// The mint base URL.
    pub mint_url: Url,
    /// The unit this facilitator accepts (e.g. `sat`).
    #[serde(default = "default_unit")]
    pub unit: String,
}

fn default_unit() -> String {
    "sat".to_string()
}

impl CashuMintConfig {
    /// Cashu payments are not chain-bound; one well-known id covers them.
    pub fn chain_id(&self) -> ChainId {
        ChainId::new("cashu", "mainnet")
    }
}

/// Failures at the mint.
#[derive(Debug, thiserror::Error)]
pub enum CashuMintError {
    /// HTTP transport failure.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    /// The mint answered with an error body.
    #[error("mint error: {0}")]
    Api(String),
}

/// The mint operations this scheme needs.
#[async_trait]
pub trait CashuMint: Send + Sync {
    /// Keyset ids the mint currently accepts for the configured unit.
    async fn active_keysets(&self) -> Result<Vec<String>, CashuMintError>;

    /// Redeems proofs, marking them consumed. Returns a redemption id.
    ///
    /// A proof that was already spent makes the whole redemption fail.
    async fn redeem(&self, proofs: &[CashuProof]) -> Result<String, CashuMintError>;
}

/// A mint reached over its REST API.
pub struct RestCashuMint {
    http: reqwest::Client,
    base_url: Url,
    unit: String,
}

impl RestCashuMint {
    /// Creates a mint client from configuration.
    pub fn new(config: &CashuMintConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.mint_url.clone(),
            unit: config.unit.clone(),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, CashuMintError> {
        self.base_url
            .join(path)
            .map_err(|e| CashuMintError::Api(e.to_string()))
    }
}

#[async_trait]
impl CashuMint for RestCashuMint {
    async fn active_keysets(&self) -> Result<Vec<String>, CashuMintError> {
        let response = self.http.get(self.endpoint("v1/keysets")?).send().await?;
        if !response.status().is_success() {
            return Err(CashuMintError::Api(response.text().await?));
        }
        let body: serde_json::Value = response.json().await?;
        let keysets = body
            .get("keysets")
            .and_then(|v| v.as_array())
            .ok_or_else(|| CashuMintError::Api("malformed keysets response".into()))?;
        Ok(keysets
            .iter()
            .filter(|k| {
                k.get("active").and_then(|v| v.as_bool()).unwrap_or(false)
                    && k.get("unit").and_then(|v| v.as_str()) == Some(self.unit.as_str())
            })
            .filter_map(|k| k.get("id").and_then(|v| v.as_str()).map(str::to_string))
            .collect())
    }

    async fn redeem(&self, proofs: &[CashuProof]) -> Result<String, CashuMintError> {
        let response = self
            .http
            .post(self.endpoint("v1/redeem")?)
            .json(&serde_json::json!({ "proofs": proofs }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(CashuMintError::Api(response.text().await?));
        }
        let body: serde_json::Value = response.json().await?;
        body.get("redemptionId")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| CashuMintError::Api("redeem response missing id".into()))
    }
}
