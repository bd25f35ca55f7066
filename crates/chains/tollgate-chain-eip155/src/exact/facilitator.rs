//! Facilitator face of the EVM "exact" scheme.
//!
//! Verification recovers the EIP-712 signer over the token's domain and
//! checks the authorization against the requirements: recipient, validity
//! window, value, and the payer's on-chain balance. Settlement re-runs the
//! same checks and submits `transferWithAuthorization` as a
//! meta-transaction.
//!
//! Signature handling:
//!
//! - EOA signatures (65 bytes) are recovered directly.
//! - Deployed smart wallets are validated through ERC-1271
//!   `isValidSignature`.
//! - ERC-6492 wrapped signatures from wallets with no code are rejected
//!   with `undeployed_smart_wallet`.

use alloy_primitives::{Address, Bytes, Signature, U256};
use alloy_provider::Provider;
use alloy_sol_types::{Eip712Domain, SolCall, SolStruct, eip712_domain};
use async_trait::async_trait;
use std::sync::Arc;
use tollgate_types::chain::ChainId;
use tollgate_types::proto::error::transaction_failed;
use tollgate_types::proto::{
    self, ErrorReason, PaymentVerificationError, SettleResponse, SupportedPaymentKind,
    SupportedResponse, VerifyResponse,
};
use tollgate_types::scheme::{SchemeFacilitator, SchemeFacilitatorError};
use tollgate_types::timestamp::UnixTimestamp;
use tracing::instrument;

use crate::chain::contracts::{
    ERC1271_MAGIC_VALUE, IEip3009, IErc1271, TransferWithAuthorization, is_erc6492_wrapped,
};
use crate::chain::{Eip155ChainProvider, MetaTransaction};
use crate::exact::types::{ExactEvmAuthorization, ExactEvmExtra, ExactEvmVerifyRequest};

/// Grace buffer against clock skew and settlement latency: an authorization
/// must stay valid at least this long past "now".
const EXPIRY_BUFFER_SECS: u64 = 6;

/// Signatures longer than this with no code at `from` are treated as
/// ERC-6492 counterfactual wallet signatures (200 hex chars).
const ERC6492_MIN_LEN: usize = 100;

#[cfg(feature = "scroll-legacy-usdc")]
const SCROLL_MAINNET: u64 = 534352;

/// Per-scheme closed set of verification failures.
#[derive(Debug, thiserror::Error)]
pub enum ExactEvmError {
    /// Cross-scheme structural failure.
    #[error(transparent)]
    Verification(#[from] PaymentVerificationError),
    /// The payload network is not the provider's chain.
    #[error("payment is for {payload}, this facilitator settles {chain}")]
    WrongChain {
        /// Network in the payload.
        payload: ChainId,
        /// Network this facilitator serves.
        chain: ChainId,
    },
    /// `authorization.to` differs from the required recipient.
    #[error("authorization recipient does not match payTo")]
    RecipientMismatch,
    /// The authorization expired (or expires within the buffer).
    #[error("authorization is expired or expires too soon")]
    ValidBefore,
    /// The authorization is not valid yet.
    #[error("authorization is not valid yet")]
    ValidAfter,
    /// The authorized value does not cover the required amount.
    #[error("authorized value is below the required amount")]
    Value,
    /// The signature is malformed or recovers to the wrong address.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    /// ERC-6492 signature from a wallet with no deployed code.
    #[error("smart wallet is not deployed")]
    UndeployedSmartWallet,
    /// The payer's balance cannot cover the amount.
    #[error("insufficient on-chain balance")]
    InsufficientFunds,
    /// A contract read failed; not a business rejection.
    #[error(transparent)]
    Contract(#[from] alloy_contract::Error),
}

impl ExactEvmError {
    /// The stable wire tag for this failure.
    pub fn reason(&self) -> String {
        match self {
            ExactEvmError::Verification(e) => e.reason().into(),
            ExactEvmError::WrongChain { .. } => ErrorReason::InvalidNetwork.into(),
            ExactEvmError::RecipientMismatch => {
                "invalid_exact_evm_payload_recipient_mismatch".into()
            }
            ExactEvmError::ValidBefore => {
                "invalid_exact_evm_payload_authorization_valid_before".into()
            }
            ExactEvmError::ValidAfter => {
                "invalid_exact_evm_payload_authorization_valid_after".into()
            }
            ExactEvmError::Value => "invalid_exact_evm_payload_value".into(),
            ExactEvmError::InvalidSignature(_) => "invalid_exact_evm_payload_signature".into(),
            ExactEvmError::UndeployedSmartWallet => ErrorReason::UndeployedSmartWallet.into(),
            ExactEvmError::InsufficientFunds => ErrorReason::InsufficientFunds.into(),
            ExactEvmError::Contract(_) => ErrorReason::UnexpectedVerifyError.into(),
        }
    }
}

/// Facilitator for the EVM "exact" scheme on one chain.
pub struct ExactEvmFacilitator {
    provider: Arc<Eip155ChainProvider>,
}

impl ExactEvmFacilitator {
    /// Creates a facilitator over the given chain provider.
    pub fn new(provider: Arc<Eip155ChainProvider>) -> Self {
        Self { provider }
    }

    /// Runs every precondition of a successful payment and returns the
    /// payer address.
    #[instrument(skip_all, err)]
    async fn assert_valid_payment(
        &self,
        body: &ExactEvmVerifyRequest,
    ) -> Result<Address, ExactEvmError> {
        let requirements = &body.payment_requirements;
        let payload = &body.payment_payload;
        payload.ensure_matches(requirements)?;

        let chain_id = self.provider.chain_id();
        if requirements.network != chain_id {
            return Err(ExactEvmError::WrongChain {
                payload: requirements.network.clone(),
                chain: chain_id,
            });
        }

        let authorization = &payload.payload.authorization;
        let pay_to: Address = requirements
            .pay_to
            .parse()
            .map_err(|_| PaymentVerificationError::InvalidFormat("payTo".into()))?;
        if authorization.to != pay_to {
            return Err(ExactEvmError::RecipientMismatch);
        }

        assert_time(authorization)?;

        let amount = U256::from(requirements.parsed_amount()?);
        if authorization.value < amount {
            return Err(ExactEvmError::Value);
        }

        let asset: Address = requirements
            .asset
            .parse()
            .map_err(|_| PaymentVerificationError::InvalidFormat("asset".into()))?;
        let contract = IEip3009::new(asset, self.provider.inner());

        let domain = self
            .domain(&asset, requirements.extra.as_ref(), &contract)
            .await?;
        self.assert_signature(authorization, &payload.payload.signature, &domain)
            .await?;

        let balance = contract.balanceOf(authorization.from).call().await?;
        if balance < amount {
            return Err(ExactEvmError::InsufficientFunds);
        }

        Ok(authorization.from)
    }

    /// Builds the EIP-712 domain from pinned extras, falling back to
    /// querying the contract.
    async fn domain(
        &self,
        asset: &Address,
        extra: Option<&serde_json::Value>,
        contract: &IEip3009::IEip3009Instance<&crate::chain::provider::InnerProvider>,
    ) -> Result<Eip712Domain, ExactEvmError> {
        let pinned = extra
            .cloned()
            .and_then(|e| serde_json::from_value::<ExactEvmExtra>(e).ok());
        let (name, version) = match pinned {
            Some(extra) => (extra.name, extra.version),
            None => {
                let name = contract.name().call().await?;
                let version = contract.version().call().await?;
                (name, version)
            }
        };
        Ok(eip712_domain! {
            name: name,
            version: version,
            chain_id: self.provider.chain().inner(),
            verifying_contract: *asset,
        })
    }

    /// Validates the signature: EOA recovery, ERC-1271 for deployed
    /// wallets, `undeployed_smart_wallet` for ERC-6492 wrappers.
    async fn assert_signature(
        &self,
        authorization: &ExactEvmAuthorization,
        signature: &Bytes,
        domain: &Eip712Domain,
    ) -> Result<(), ExactEvmError> {
        let message = TransferWithAuthorization {
            from: authorization.from,
            to: authorization.to,
            value: authorization.value,
            validAfter: U256::from(authorization.valid_after.as_secs()),
            validBefore: U256::from(authorization.valid_before.as_secs()),
            nonce: authorization.nonce,
        };
        let digest = message.eip712_signing_hash(domain);

        if signature.len() <= 65 {
            let parsed = Signature::try_from(signature.as_ref())
                .map_err(|e| ExactEvmError::InvalidSignature(e.to_string()))?;
            let recovered = parsed
                .recover_address_from_prehash(&digest)
                .map_err(|e| ExactEvmError::InvalidSignature(e.to_string()))?;
            if recovered != authorization.from {
                return Err(ExactEvmError::InvalidSignature(format!(
                    "recovered {recovered}, expected {}",
                    authorization.from
                )));
            }
            return Ok(());
        }

        // Longer than an EOA signature: smart wallet territory.
        let code = self
            .provider
            .inner()
            .get_code_at(authorization.from)
            .await
            .map_err(|e| ExactEvmError::Contract(e.into()))?;
        if code.is_empty() {
            if is_erc6492_wrapped(signature) || signature.len() > ERC6492_MIN_LEN {
                return Err(ExactEvmError::UndeployedSmartWallet);
            }
            return Err(ExactEvmError::InvalidSignature(
                "no code at signer address".to_string(),
            ));
        }
        let wallet = IErc1271::new(authorization.from, self.provider.inner());
        let magic = wallet
            .isValidSignature(digest, signature.clone())
            .call()
            .await?;
        if magic.0 != ERC1271_MAGIC_VALUE {
            return Err(ExactEvmError::InvalidSignature(
                "ERC-1271 validation failed".to_string(),
            ));
        }
        Ok(())
    }

    /// Encodes the settlement calldata, choosing the `(v, r, s)` entrypoint
    /// on chains whose token predates the bytes form.
    fn settlement_calldata(
        &self,
        authorization: &ExactEvmAuthorization,
        signature: &Bytes,
    ) -> Result<Bytes, ExactEvmError> {
        #[cfg(feature = "scroll-legacy-usdc")]
        if self.provider.chain().inner() == SCROLL_MAINNET && signature.len() == 65 {
            let r = alloy_primitives::B256::from_slice(&signature[0..32]);
            let s = alloy_primitives::B256::from_slice(&signature[32..64]);
            let v = signature[64];
            let call = IEip3009::transferWithAuthorization_1Call {
                from: authorization.from,
                to: authorization.to,
                value: authorization.value,
                validAfter: U256::from(authorization.valid_after.as_secs()),
                validBefore: U256::from(authorization.valid_before.as_secs()),
                nonce: authorization.nonce,
                v,
                r,
                s,
            };
            return Ok(call.abi_encode().into());
        }
        let call = IEip3009::transferWithAuthorization_0Call {
            from: authorization.from,
            to: authorization.to,
            value: authorization.value,
            validAfter: U256::from(authorization.valid_after.as_secs()),
            validBefore: U256::from(authorization.valid_before.as_secs()),
            nonce: authorization.nonce,
            signature: signature.clone(),
        };
        Ok(call.abi_encode().into())
    }
}

fn assert_time(authorization: &ExactEvmAuthorization) -> Result<(), ExactEvmError> {
    let now = UnixTimestamp::now();
    if authorization.valid_before.as_secs() < now.as_secs() + EXPIRY_BUFFER_SECS {
        return Err(ExactEvmError::ValidBefore);
    }
    if authorization.valid_after.as_secs() > now.as_secs() {
        return Err(ExactEvmError::ValidAfter);
    }
    Ok(())
}

fn business_or_ledger(
    error: ExactEvmError,
    payer: Option<String>,
) -> Result<VerifyResponse, SchemeFacilitatorError> {
    match error {
        ExactEvmError::Contract(e) => Err(SchemeFacilitatorError::Ledger(e.to_string())),
        business => Ok(VerifyResponse::invalid(business.reason(), payer)),
    }
}

#[async_trait]
impl SchemeFacilitator for ExactEvmFacilitator {
    #[instrument(skip_all, fields(chain = %self.provider.chain_id()))]
    async fn verify(
        &self,
        request: &proto::VerifyRequest,
    ) -> Result<VerifyResponse, SchemeFacilitatorError> {
        let body: ExactEvmVerifyRequest = request.deserialize_as()?;
        let payer = body.payment_payload.payload.authorization.from.to_string();
        match self.assert_valid_payment(&body).await {
            Ok(payer) => Ok(VerifyResponse::valid(payer.to_string())),
            Err(error) => business_or_ledger(error, Some(payer)),
        }
    }

    #[instrument(skip_all, fields(chain = %self.provider.chain_id()))]
    async fn settle(
        &self,
        request: &proto::SettleRequest,
    ) -> Result<SettleResponse, SchemeFacilitatorError> {
        let body: ExactEvmVerifyRequest = request.deserialize_as()?;
        let network = body.payment_requirements.network.clone();
        let payer = body.payment_payload.payload.authorization.from.to_string();

        if let Err(error) = self.assert_valid_payment(&body).await {
            return match error {
                ExactEvmError::Contract(e) => Err(SchemeFacilitatorError::Ledger(e.to_string())),
                business => Ok(SettleResponse::Error {
                    reason: business.reason(),
                    network,
                    payer: Some(payer),
                }),
            };
        }

        let authorization = &body.payment_payload.payload.authorization;
        let asset: Address = body
            .payment_requirements
            .asset
            .parse()
            .map_err(|_| PaymentVerificationError::InvalidFormat("asset".into()))?;
        let calldata =
            match self.settlement_calldata(authorization, &body.payment_payload.payload.signature)
            {
                Ok(calldata) => calldata,
                Err(error) => {
                    return Ok(SettleResponse::Error {
                        reason: error.reason(),
                        network,
                        payer: Some(payer),
                    });
                }
            };

        let receipt = self
            .provider
            .send_transaction(MetaTransaction {
                to: asset,
                calldata,
                confirmations: 1,
            })
            .await
            .map_err(|e| SchemeFacilitatorError::Ledger(e.to_string()))?;

        if receipt.status() {
            tracing::info!(tx = %receipt.transaction_hash, "transferWithAuthorization succeeded");
            Ok(SettleResponse::Success {
                transaction: receipt.transaction_hash.to_string(),
                network,
                payer,
            })
        } else {
            tracing::warn!(tx = %receipt.transaction_hash, "transferWithAuthorization reverted");
            Ok(SettleResponse::Error {
                reason: transaction_failed("transaction reverted"),
                network,
                payer: Some(payer),
            })
        }
    }

    async fn supported(&self) -> SupportedResponse {
        let network = self.provider.chain_id();
        let signers = self
            .provider
            .signer_addresses()
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>();
        SupportedResponse {
            kinds: vec![
                SupportedPaymentKind {
                    x402_version: 2,
                    scheme: "exact".to_string(),
                    network: network.clone(),
                    extra: None,
                },
                SupportedPaymentKind {
                    x402_version: 1,
                    scheme: "exact".to_string(),
                    network: network.clone(),
                    extra: None,
                },
            ],
            extensions: Vec::new(),
            signers: [(network, signers)].into_iter().collect(),
        }
    }
}
