//! Configuration for one EVM chain.

use serde::{Deserialize, Serialize};
use url::Url;

use super::Eip155ChainReference;
use tollgate_types::chain::ChainId;

/// Everything needed to talk to one EVM chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Eip155ChainConfig {
    /// Numeric EIP-155 chain id.
    pub chain_id: u64,
    /// HTTP JSON-RPC endpoint.
    pub rpc_url: Url,
    /// Hex-encoded signer private keys. At least one is required for a
    /// settling facilitator.
    #[serde(default)]
    pub signers: Vec<String>,
    /// Whether the chain prices gas via EIP-1559. Legacy chains get an
    /// explicit `gasPrice`.
    #[serde(default = "default_true")]
    pub eip1559: bool,
    /// How long to wait for a transaction receipt.
    #[serde(default = "default_receipt_timeout")]
    pub receipt_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_receipt_timeout() -> u64 {
    30
}

impl Eip155ChainConfig {
    /// The chain as a typed reference.
    pub fn chain_reference(&self) -> Eip155ChainReference {
        Eip155ChainReference(self.chain_id)
    }

    /// The chain as a CAIP-2 id.
    pub fn chain_id(&self) -> ChainId {
        ChainId::new("eip155", self.chain_id.to_string())
    }
}
