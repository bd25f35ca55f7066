//! Alloy-backed provider for EVM chains.
//!
//! The facilitator never sends value of its own; every settlement is a
//! meta-transaction calling into a token contract with calldata carrying the
//! payer's authorization. The provider signs those calls with its configured
//! wallet, handles gas pricing on legacy chains, and waits for receipts with
//! a bounded timeout.

use alloy_network::{Ethereum, EthereumWallet, NetworkWallet, TransactionBuilder};
use alloy_primitives::{Address, B256, Bytes};
use alloy_provider::fillers::{
    BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller, WalletFiller,
};
use alloy_provider::{
    Identity, PendingTransactionError, Provider, ProviderBuilder, RootProvider, WalletProvider,
};
use alloy_rpc_types_eth::{TransactionReceipt, TransactionRequest};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use alloy_transport::TransportError;
use std::time::Duration;
use tollgate_types::chain::ChainId;
use tracing::instrument;

use super::config::Eip155ChainConfig;
use super::Eip155ChainReference;

/// Combined filler type for gas, blob gas, nonce, and chain ID.
pub type InnerFiller =
    JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>;

/// The composed Alloy provider: recommended fillers plus a signing wallet
/// over a [`RootProvider`].
pub type InnerProvider = FillProvider<
    JoinFill<JoinFill<Identity, InnerFiller>, WalletFiller<EthereumWallet>>,
    RootProvider,
>;

/// A contract call the facilitator submits on the payer's behalf.
pub struct MetaTransaction {
    /// Target contract address (the token).
    pub to: Address,
    /// Encoded function call.
    pub calldata: Bytes,
    /// Block confirmations to wait for.
    pub confirmations: u64,
}

/// Transaction submission failures.
#[derive(Debug, thiserror::Error)]
pub enum MetaTransactionError {
    /// The RPC transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The transaction was submitted but its receipt never arrived.
    #[error(transparent)]
    PendingTransaction(#[from] PendingTransactionError),
    /// The signer set is misconfigured.
    #[error("{0}")]
    Config(String),
}

/// Provider for one EVM chain: signing wallet, gas strategy, receipts.
#[derive(Debug, Clone)]
pub struct Eip155ChainProvider {
    chain: Eip155ChainReference,
    eip1559: bool,
    receipt_timeout_secs: u64,
    inner: InnerProvider,
}

impl Eip155ChainProvider {
    /// Connects a provider from chain configuration.
    ///
    /// # Errors
    ///
    /// Fails when no signer is configured or a private key is invalid.
    pub fn from_config(config: &Eip155ChainConfig) -> Result<Self, MetaTransactionError> {
        let signers = config
            .signers
            .iter()
            .map(|s| {
                let hex = s.strip_prefix("0x").unwrap_or(s);
                let bytes = B256::from_slice(
                    &alloy_primitives::hex::decode(hex)
                        .map_err(|e| MetaTransactionError::Config(e.to_string()))?,
                );
                PrivateKeySigner::from_bytes(&bytes)
                    .map(|signer| signer.with_chain_id(Some(config.chain_id)))
                    .map_err(|e| MetaTransactionError::Config(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mut signers = signers.into_iter();
        let first = signers
            .next()
            .ok_or_else(|| MetaTransactionError::Config("at least one signer required".into()))?;
        let mut wallet = EthereumWallet::from(first);
        for signer in signers {
            wallet.register_signer(signer);
        }

        let inner = ProviderBuilder::new()
            .wallet(wallet)
            .connect_http(config.rpc_url.clone());

        tracing::info!(chain = %config.chain_id(), "connected EVM provider");

        Ok(Self {
            chain: config.chain_reference(),
            eip1559: config.eip1559,
            receipt_timeout_secs: config.receipt_timeout_secs,
            inner,
        })
    }

    /// The underlying Alloy provider, for contract reads.
    pub fn inner(&self) -> &InnerProvider {
        &self.inner
    }

    /// The chain this provider talks to.
    pub fn chain(&self) -> &Eip155ChainReference {
        &self.chain
    }

    /// The chain as a CAIP-2 id.
    pub fn chain_id(&self) -> ChainId {
        (&self.chain).into()
    }

    /// Addresses of the provider's signers.
    pub fn signer_addresses(&self) -> Vec<Address> {
        NetworkWallet::<Ethereum>::signer_addresses(self.inner.wallet()).collect()
    }

    /// Submits a meta-transaction and waits for its receipt.
    ///
    /// Legacy chains get an explicit gas price; EIP-1559 chains rely on the
    /// provider's fillers. Receipt waiting is bounded by the configured
    /// timeout.
    #[instrument(skip_all, err, fields(chain = %self.chain, to = %tx.to))]
    pub async fn send_transaction(
        &self,
        tx: MetaTransaction,
    ) -> Result<TransactionReceipt, MetaTransactionError> {
        let from = NetworkWallet::<Ethereum>::default_signer_address(self.inner.wallet());
        let mut request = TransactionRequest::default()
            .with_to(tx.to)
            .with_from(from)
            .with_input(tx.calldata);

        if !self.eip1559 {
            let gas_price = self.inner.get_gas_price().await?;
            request.set_gas_price(gas_price);
        }

        let pending = self.inner.send_transaction(request).await?;
        let receipt = pending
            .with_required_confirmations(tx.confirmations)
            .with_timeout(Some(Duration::from_secs(self.receipt_timeout_secs)))
            .get_receipt()
            .await?;
        Ok(receipt)
    }
}
