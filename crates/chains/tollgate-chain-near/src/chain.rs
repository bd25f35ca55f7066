//! NEAR chain plumbing: configuration and JSON-RPC provider.

use ed25519_dalek::{Signer, SigningKey};
use serde::{Deserialize, Serialize};
use tollgate_types::chain::ChainId;
use tollgate_types::util::Base64Bytes;
use url::Url;

use crate::tx::{
    AccountId, PublicKey, Signature, SignedTransaction, Transaction, transaction_signing_digest,
};

/// Configuration for one NEAR network.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearChainConfig {
    /// Network reference: `mainnet` or `testnet`.
    pub network: String,
    /// JSON-RPC endpoint.
    pub rpc_url: Url,
    /// The relayer account submitting delegated transactions.
    pub relayer_id: AccountId,
    /// The relayer's Ed25519 secret key, `ed25519:`-prefixed base58.
    pub relayer_key: String,
}

impl NearChainConfig {
    /// The network as a CAIP-2 id.
    pub fn chain_id(&self) -> ChainId {
        ChainId::new("near", self.network.clone())
    }
}

/// Failures talking to the RPC.
#[derive(Debug, thiserror::Error)]
pub enum NearProviderError {
    /// HTTP transport failure.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    /// The RPC answered with an error.
    #[error("rpc error: {0}")]
    Rpc(String),
    /// Relayer key misconfiguration.
    #[error("relayer configuration: {0}")]
    Config(String),
    /// Borsh encoding failure.
    #[error(transparent)]
    Borsh(#[from] borsh::io::Error),
}

/// Provider for one NEAR network: relayer key, view calls, broadcast.
pub struct NearChainProvider {
    chain_id: ChainId,
    rpc_url: Url,
    http: reqwest::Client,
    relayer_id: AccountId,
    relayer_key: SigningKey,
}

impl NearChainProvider {
    /// Connects a provider from network configuration.
    pub fn from_config(config: &NearChainConfig) -> Result<Self, NearProviderError> {
        let encoded = config
            .relayer_key
            .strip_prefix("ed25519:")
            .ok_or_else(|| NearProviderError::Config("key must be ed25519:-prefixed".into()))?;
        let bytes = bs58::decode(encoded)
            .into_vec()
            .map_err(|e| NearProviderError::Config(e.to_string()))?;
        // NEAR secret keys are 64 bytes: seed then public key.
        let seed: [u8; 32] = bytes
            .get(..32)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| NearProviderError::Config("key must be 64 bytes".into()))?;
        let relayer_key = SigningKey::from_bytes(&seed);
        tracing::info!(
            chain = %config.chain_id(),
            relayer = %config.relayer_id,
            "connected NEAR provider"
        );
        Ok(Self {
            chain_id: config.chain_id(),
            rpc_url: config.rpc_url.clone(),
            http: reqwest::Client::new(),
            relayer_id: config.relayer_id.clone(),
            relayer_key,
        })
    }

    /// The network as a CAIP-2 id.
    pub fn chain_id(&self) -> ChainId {
        self.chain_id.clone()
    }

    /// The relayer account id.
    pub fn relayer_id(&self) -> &AccountId {
        &self.relayer_id
    }

    /// The relayer's public key.
    pub fn relayer_public_key(&self) -> PublicKey {
        PublicKey::Ed25519(self.relayer_key.verifying_key().to_bytes())
    }

    async fn rpc(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, NearProviderError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": "tollgate",
            "method": method,
            "params": params,
        });
        let response: serde_json::Value = self
            .http
            .post(self.rpc_url.clone())
            .json(&body)
            .send()
            .await?
            .json()
            .await?;
        if let Some(error) = response.get("error") {
            return Err(NearProviderError::Rpc(error.to_string()));
        }
        response
            .get("result")
            .cloned()
            .ok_or_else(|| NearProviderError::Rpc("missing result".into()))
    }

    /// Calls a view function with JSON arguments.
    pub async fn view_call(
        &self,
        contract: &AccountId,
        method: &str,
        args: &serde_json::Value,
    ) -> Result<serde_json::Value, NearProviderError> {
        let result = self
            .rpc(
                "query",
                serde_json::json!({
                    "request_type": "call_function",
                    "finality": "final",
                    "account_id": contract,
                    "method_name": method,
                    "args_base64": Base64Bytes::encode(args.to_string()).to_string(),
                }),
            )
            .await?;
        let bytes: Vec<u8> = result
            .get("result")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|n| n.as_u64().map(|n| n as u8)).collect())
            .ok_or_else(|| NearProviderError::Rpc("malformed view result".into()))?;
        serde_json::from_slice(&bytes).map_err(|e| NearProviderError::Rpc(e.to_string()))
    }

    /// The payer's FT balance on a token contract.
    pub async fn ft_balance_of(
        &self,
        contract: &AccountId,
        account: &AccountId,
    ) -> Result<u128, NearProviderError> {
        let result = self
            .view_call(
                contract,
                "ft_balance_of",
                &serde_json::json!({ "account_id": account }),
            )
            .await?;
        result
            .as_str()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| NearProviderError::Rpc("malformed ft_balance_of result".into()))
    }

    /// Current nonce of an access key.
    pub async fn access_key_nonce(
        &self,
        account: &AccountId,
        public_key_b58: &str,
    ) -> Result<u64, NearProviderError> {
        let result = self
            .rpc(
                "query",
                serde_json::json!({
                    "request_type": "view_access_key",
                    "finality": "final",
                    "account_id": account,
                    "public_key": public_key_b58,
                }),
            )
            .await?;
        result
            .get("nonce")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| NearProviderError::Rpc("access key has no nonce".into()))
    }

    /// Latest block hash and height.
    pub async fn latest_block(&self) -> Result<([u8; 32], u64), NearProviderError> {
        let result = self
            .rpc("block", serde_json::json!({ "finality": "final" }))
            .await?;
        let header = result
            .get("header")
            .ok_or_else(|| NearProviderError::Rpc("block has no header".into()))?;
        let hash_b58 = header
            .get("hash")
            .and_then(|v| v.as_str())
            .ok_or_else(|| NearProviderError::Rpc("block has no hash".into()))?;
        let hash: [u8; 32] = bs58::decode(hash_b58)
            .into_vec()
            .map_err(|e| NearProviderError::Rpc(e.to_string()))?
            .try_into()
            .map_err(|_| NearProviderError::Rpc("block hash must be 32 bytes".into()))?;
        let height = header
            .get("height")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| NearProviderError::Rpc("block has no height".into()))?;
        Ok((hash, height))
    }

    /// Signs a transaction with the relayer key and broadcasts it,
    /// waiting for execution. Returns the transaction hash.
    pub async fn sign_and_broadcast(
        &self,
        transaction: Transaction,
    ) -> Result<String, NearProviderError> {
        let digest = transaction_signing_digest(&transaction)?;
        let signature = self.relayer_key.sign(&digest);
        let signed = SignedTransaction {
            transaction,
            signature: Signature::Ed25519(signature.to_bytes()),
        };
        let bytes = borsh::to_vec(&signed)?;
        let result = self
            .rpc(
                "broadcast_tx_commit",
                serde_json::json!([Base64Bytes::encode(bytes).to_string()]),
            )
            .await?;
        let status = result
            .get("status")
            .ok_or_else(|| NearProviderError::Rpc("missing execution status".into()))?;
        if status.get("Failure").is_some() {
            return Err(NearProviderError::Rpc(status.to_string()));
        }
        result
            .get("transaction")
            .and_then(|t| t.get("hash"))
            .and_then(|h| h.as_str())
            .map(str::to_string)
            .ok_or_else(|| NearProviderError::Rpc("missing transaction hash".into()))
    }
}
