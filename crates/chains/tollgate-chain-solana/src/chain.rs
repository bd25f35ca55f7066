//! Solana chain plumbing: addresses, configuration, provider.

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use solana_account::Account;
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::{RpcSendTransactionConfig, RpcSimulateTransactionConfig};
use solana_commitment_config::CommitmentConfig;
use solana_keypair::Keypair;
use solana_pubkey::Pubkey;
use solana_signature::Signature;
use solana_signer::{Signer, SignerError};
use solana_transaction::versioned::VersionedTransaction;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tollgate_types::chain::ChainId;

/// A Solana address, serialized as base58.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address(pub Pubkey);

impl Address {
    /// Wraps a public key.
    pub fn new(pubkey: Pubkey) -> Self {
        Self(pubkey)
    }

    /// The underlying public key.
    pub fn pubkey(&self) -> &Pubkey {
        &self.0
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Address {
    type Err = solana_pubkey::ParsePubkeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Address(Pubkey::from_str(s)?))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::from_str(&s).map_err(de::Error::custom)
    }
}

/// Configuration for one Solana cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolanaChainConfig {
    /// CAIP-2 reference of the cluster (genesis hash prefix).
    pub reference: String,
    /// HTTP JSON-RPC endpoint.
    pub rpc_url: String,
    /// Base58-encoded fee payer keypair.
    pub signer: String,
    /// Maximum compute units a payment transaction may request.
    #[serde(default = "default_max_compute_unit_limit")]
    pub max_compute_unit_limit: u32,
    /// Maximum priority price per compute unit, in micro-lamports.
    #[serde(default = "default_max_compute_unit_price")]
    pub max_compute_unit_price: u64,
}

fn default_max_compute_unit_limit() -> u32 {
    1_400_000
}

fn default_max_compute_unit_price() -> u64 {
    1_000_000
}

impl SolanaChainConfig {
    /// The cluster as a CAIP-2 id.
    pub fn chain_id(&self) -> ChainId {
        ChainId::new("solana", self.reference.clone())
    }
}

/// Failures talking to the cluster.
#[derive(thiserror::Error, Debug)]
pub enum SolanaChainProviderError {
    /// Signing failed.
    #[error(transparent)]
    Signer(#[from] SignerError),
    /// The transaction failed simulation or cannot be signed into shape.
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),
    /// RPC transport error.
    #[error(transparent)]
    Transport(Box<ClientErrorKind>),
}

impl From<ClientError> for SolanaChainProviderError {
    fn from(value: ClientError) -> Self {
        SolanaChainProviderError::Transport(value.kind)
    }
}

/// Provider for one Solana cluster: fee-payer keypair, simulation,
/// submission, confirmation.
pub struct SolanaChainProvider {
    chain_id: ChainId,
    keypair: Arc<Keypair>,
    rpc_client: Arc<RpcClient>,
    max_compute_unit_limit: u32,
    max_compute_unit_price: u64,
}

impl fmt::Debug for SolanaChainProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SolanaChainProvider")
            .field("pubkey", &self.keypair.pubkey())
            .field("chain", &self.chain_id)
            .finish()
    }
}

impl SolanaChainProvider {
    /// Connects a provider from cluster configuration.
    pub fn from_config(config: &SolanaChainConfig) -> Self {
        let keypair = Keypair::from_base58_string(&config.signer);
        tracing::info!(
            chain = %config.chain_id(),
            fee_payer = %keypair.pubkey(),
            "connected Solana provider"
        );
        Self {
            chain_id: config.chain_id(),
            keypair: Arc::new(keypair),
            rpc_client: Arc::new(RpcClient::new(config.rpc_url.clone())),
            max_compute_unit_limit: config.max_compute_unit_limit,
            max_compute_unit_price: config.max_compute_unit_price,
        }
    }

    /// The cluster as a CAIP-2 id.
    pub fn chain_id(&self) -> ChainId {
        self.chain_id.clone()
    }

    /// The fee payer's public key.
    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    /// The fee payer as an [`Address`].
    pub fn fee_payer(&self) -> Address {
        Address::new(self.keypair.pubkey())
    }

    /// Maximum compute units a payment transaction may request.
    pub fn max_compute_unit_limit(&self) -> u32 {
        self.max_compute_unit_limit
    }

    /// Maximum priority price per compute unit.
    pub fn max_compute_unit_price(&self) -> u64 {
        self.max_compute_unit_price
    }

    /// Simulates a transaction; an error in the simulation result is an
    /// error here.
    pub async fn simulate(
        &self,
        tx: &VersionedTransaction,
    ) -> Result<(), SolanaChainProviderError> {
        let cfg = RpcSimulateTransactionConfig {
            sig_verify: false,
            replace_recent_blockhash: false,
            commitment: Some(CommitmentConfig::confirmed()),
            ..RpcSimulateTransactionConfig::default()
        };
        let sim = self
            .rpc_client
            .simulate_transaction_with_config(tx, cfg)
            .await?;
        match sim.value.err {
            None => Ok(()),
            Some(e) => Err(SolanaChainProviderError::InvalidTransaction(format!(
                "{e:?}"
            ))),
        }
    }

    /// Fetches multiple accounts in one call.
    pub async fn get_multiple_accounts(
        &self,
        pubkeys: &[Pubkey],
    ) -> Result<Vec<Option<Account>>, SolanaChainProviderError> {
        let accounts = self.rpc_client.get_multiple_accounts(pubkeys).await?;
        Ok(accounts)
    }

    /// Places the fee payer's signature into its slot of the transaction.
    pub fn sign(
        &self,
        tx: VersionedTransaction,
    ) -> Result<VersionedTransaction, SolanaChainProviderError> {
        let mut tx = tx;
        let msg_bytes = tx.message.serialize();
        let signature = self.keypair.try_sign_message(msg_bytes.as_slice())?;
        let num_required = tx.message.header().num_required_signatures as usize;
        let static_keys = tx.message.static_account_keys();
        let pos = static_keys[..num_required.min(static_keys.len())]
            .iter()
            .position(|k| *k == self.pubkey())
            .ok_or_else(|| {
                SolanaChainProviderError::InvalidTransaction(
                    "fee payer is not a required signer".to_string(),
                )
            })?;
        if tx.signatures.len() < num_required {
            tx.signatures.resize(num_required, Signature::default());
        }
        tx.signatures[pos] = signature;
        Ok(tx)
    }

    /// Whether every required signature slot is populated.
    pub fn is_fully_signed(tx: &VersionedTransaction) -> bool {
        let num_required = tx.message.header().num_required_signatures as usize;
        tx.signatures.len() >= num_required
            && tx.signatures[..num_required]
                .iter()
                .all(|s| *s != Signature::default())
    }

    /// Submits a transaction and polls until it confirms.
    pub async fn send_and_confirm(
        &self,
        tx: &VersionedTransaction,
    ) -> Result<Signature, SolanaChainProviderError> {
        let tx_sig = tx.signatures[0];
        self.rpc_client
            .send_transaction_with_config(
                tx,
                RpcSendTransactionConfig {
                    skip_preflight: true,
                    ..RpcSendTransactionConfig::default()
                },
            )
            .await?;
        loop {
            let confirmed = self
                .rpc_client
                .confirm_transaction_with_commitment(&tx_sig, CommitmentConfig::confirmed())
                .await?;
            if confirmed.value {
                return Ok(tx_sig);
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
}
