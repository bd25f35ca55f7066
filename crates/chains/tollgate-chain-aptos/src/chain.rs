//! Aptos chain plumbing: addresses, configuration, fullnode REST provider.

use ed25519_dalek::{Signer, SigningKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tollgate_types::chain::ChainId;
use url::Url;

use crate::tx::{AccountAddress, ed25519_auth_key};

/// An Aptos account address, serialized as `0x`-prefixed hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AptosAddress(pub AccountAddress);

impl fmt::Display for AptosAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_hex())
    }
}

impl FromStr for AptosAddress {
    type Err = AptosAddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AccountAddress::from_hex(s)
            .map(AptosAddress)
            .ok_or_else(|| AptosAddressParseError(s.to_string()))
    }
}

/// Error parsing an Aptos address.
#[derive(Debug, thiserror::Error)]
#[error("invalid aptos address {0:?}")]
pub struct AptosAddressParseError(String);

impl Serialize for AptosAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for AptosAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        AptosAddress::from_str(&s).map_err(de::Error::custom)
    }
}

/// Configuration for one Aptos network.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AptosChainConfig {
    /// On-chain id byte: 1 for mainnet, 2 for testnet.
    pub chain_id: u8,
    /// Fullnode REST endpoint, up to and including `/v1`.
    pub rest_url: Url,
    /// Hex-encoded Ed25519 signing key of the sponsoring fee payer.
    pub signer: String,
    /// Whether this facilitator sponsors gas.
    #[serde(default = "default_true")]
    pub sponsored: bool,
}

fn default_true() -> bool {
    true
}

impl AptosChainConfig {
    /// The network as a CAIP-2 id.
    pub fn caip2(&self) -> ChainId {
        ChainId::new("aptos", self.chain_id.to_string())
    }
}

/// Failures talking to the fullnode.
#[derive(Debug, thiserror::Error)]
pub enum AptosProviderError {
    /// HTTP transport failure.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    /// The fullnode answered with an error body.
    #[error("fullnode error: {0}")]
    Api(String),
    /// BCS encoding failure.
    #[error(transparent)]
    Bcs(#[from] bcs::Error),
    /// Signer misconfiguration.
    #[error("signer configuration: {0}")]
    Config(String),
}

/// Provider for one Aptos network: sponsor key, simulation, submission.
pub struct AptosChainProvider {
    chain_id: u8,
    caip2: ChainId,
    rest_url: Url,
    http: reqwest::Client,
    signing_key: SigningKey,
    sponsor_address: AccountAddress,
    sponsored: bool,
}

impl fmt::Debug for AptosChainProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AptosChainProvider")
            .field("chain", &self.caip2)
            .field("sponsor", &self.sponsor_address.to_hex())
            .finish()
    }
}

impl AptosChainProvider {
    /// Connects a provider from network configuration.
    pub fn from_config(config: &AptosChainConfig) -> Result<Self, AptosProviderError> {
        let key_hex = config.signer.strip_prefix("0x").unwrap_or(&config.signer);
        let key_bytes: [u8; 32] = hex::decode(key_hex)
            .map_err(|e| AptosProviderError::Config(e.to_string()))?
            .try_into()
            .map_err(|_| AptosProviderError::Config("signing key must be 32 bytes".into()))?;
        let signing_key = SigningKey::from_bytes(&key_bytes);
        let sponsor_address =
            AccountAddress(ed25519_auth_key(signing_key.verifying_key().as_bytes()));
        tracing::info!(
            chain = %config.caip2(),
            sponsor = %sponsor_address.to_hex(),
            "connected Aptos provider"
        );
        Ok(Self {
            chain_id: config.chain_id,
            caip2: config.caip2(),
            rest_url: config.rest_url.clone(),
            http: reqwest::Client::new(),
            signing_key,
            sponsor_address,
            sponsored: config.sponsored,
        })
    }

    /// The on-chain id byte.
    pub fn chain_byte(&self) -> u8 {
        self.chain_id
    }

    /// The network as a CAIP-2 id.
    pub fn chain_id(&self) -> ChainId {
        self.caip2.clone()
    }

    /// The sponsoring account address.
    pub fn sponsor_address(&self) -> AccountAddress {
        self.sponsor_address
    }

    /// Whether gas sponsorship is enabled.
    pub fn sponsored(&self) -> bool {
        self.sponsored
    }

    /// Signs a fee-payer message with the sponsor key.
    pub fn sign_as_sponsor(&self, message: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let signature = self.signing_key.sign(message);
        (
            self.signing_key.verifying_key().as_bytes().to_vec(),
            signature.to_bytes().to_vec(),
        )
    }

    fn endpoint(&self, path: &str) -> Result<Url, AptosProviderError> {
        self.rest_url
            .join(path)
            .map_err(|e| AptosProviderError::Api(e.to_string()))
    }

    /// Fungible-asset balance of `owner` via the `primary_fungible_store`
    /// view function.
    pub async fn fungible_balance(
        &self,
        owner: &AccountAddress,
        metadata: &AccountAddress,
    ) -> Result<u128, AptosProviderError> {
        let body = serde_json::json!({
            "function": "0x1::primary_fungible_store::balance",
            "type_arguments": ["0x1::fungible_asset::Metadata"],
            "arguments": [owner.to_hex(), metadata.to_hex()],
        });
        let response = self
            .http
            .post(self.endpoint("view")?)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AptosProviderError::Api(response.text().await?));
        }
        let values: Vec<serde_json::Value> = response.json().await?;
        values
            .first()
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<u128>().ok())
            .ok_or_else(|| AptosProviderError::Api("malformed balance response".into()))
    }

    /// Simulates a BCS signed transaction; an on-chain abort is an `Api`
    /// error carrying the VM status.
    pub async fn simulate(&self, signed_bcs: Vec<u8>) -> Result<(), AptosProviderError> {
        let response = self
            .http
            .post(self.endpoint("transactions/simulate")?)
            .header("Content-Type", "application/x.aptos.signed_transaction+bcs")
            .body(signed_bcs)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AptosProviderError::Api(response.text().await?));
        }
        let results: Vec<serde_json::Value> = response.json().await?;
        let result = results
            .first()
            .ok_or_else(|| AptosProviderError::Api("empty simulation response".into()))?;
        if result.get("success").and_then(|v| v.as_bool()) == Some(true) {
            Ok(())
        } else {
            let status = result
                .get("vm_status")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown vm status");
            Err(AptosProviderError::Api(status.to_string()))
        }
    }

    /// Submits a BCS signed transaction; returns its hash.
    pub async fn submit(&self, signed_bcs: Vec<u8>) -> Result<String, AptosProviderError> {
        let response = self
            .http
            .post(self.endpoint("transactions")?)
            .header("Content-Type", "application/x.aptos.signed_transaction+bcs")
            .body(signed_bcs)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AptosProviderError::Api(response.text().await?));
        }
        let body: serde_json::Value = response.json().await?;
        body.get("hash")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| AptosProviderError::Api("submit response missing hash".into()))
    }

    /// Polls a transaction by hash until it commits; returns its success
    /// flag and VM status.
    pub async fn wait_for_transaction(
        &self,
        hash: &str,
    ) -> Result<(bool, String), AptosProviderError> {
        for _ in 0..30 {
            let response = self
                .http
                .get(self.endpoint(&format!("transactions/by_hash/{hash}"))?)
                .send()
                .await?;
            if response.status().is_success() {
                let body: serde_json::Value = response.json().await?;
                if body.get("type").and_then(|v| v.as_str()) != Some("pending_transaction") {
                    let success =
                        body.get("success").and_then(|v| v.as_bool()).unwrap_or(false);
                    let vm_status = body
                        .get("vm_status")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown")
                        .to_string();
                    return Ok((success, vm_status));
                }
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        Err(AptosProviderError::Api(format!(
            "transaction {hash} did not commit in time"
        )))
    }
}
