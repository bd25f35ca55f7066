//! Facilitator face of the EVM "permit" scheme.
//!
//! Verification recovers the `Permit` signer and checks the allowance
//! grant: the spender must be this facilitator, the nonce must be the
//! token's current `nonces(owner)`, the deadline must clear the buffer, and
//! funds must cover the amount. Settlement runs two meta-transactions:
//! `permit(...)` then `transferFrom(owner, payTo, value)`. Either reverting
//! fails the settlement.

use alloy_primitives::{Address, Signature, U256};
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

use crate::chain::contracts::{IErc20Permit, Permit};
use crate::chain::{Eip155ChainProvider, MetaTransaction};
use crate::permit::types::{PermitEvmVerifyRequest, PermitScheme};

const DEADLINE_BUFFER_SECS: u64 = 6;

/// Per-scheme closed set of verification failures.
#[derive(Debug, thiserror::Error)]
pub enum PermitEvmError {
    /// Cross-scheme structural failure.
    #[error(transparent)]
    Verification(#[from] PaymentVerificationError),
    /// The payload network is not the provider's chain.
    #[error("payment network does not match this facilitator's chain")]
    WrongChain,
    /// The permit's spender is not a facilitator signer.
    #[error("permit spender is not the settling facilitator")]
    SpenderMismatch,
    /// The pinned domain disagrees with the requirements.
    #[error("permit domain does not cover the required asset and chain")]
    DomainMismatch,
    /// The permit deadline is too close or already passed.
    #[error("permit deadline is expired or expires too soon")]
    Deadline,
    /// The permit nonce is not the token's current `nonces(owner)`.
    #[error("permit nonce is not current")]
    NonceMismatch,
    /// The permitted value does not cover the required amount.
    #[error("permitted value is below the required amount")]
    Value,
    /// The signature is malformed or recovers to the wrong address.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    /// The owner's balance cannot cover the amount.
    #[error("insufficient on-chain balance")]
    InsufficientFunds,
    /// A contract read failed; not a business rejection.
    #[error(transparent)]
    Contract(#[from] alloy_contract::Error),
}

impl PermitEvmError {
    /// The stable wire tag for this failure.
    pub fn reason(&self) -> String {
        match self {
            PermitEvmError::Verification(e) => e.reason().into(),
            PermitEvmError::WrongChain => ErrorReason::InvalidNetwork.into(),
            PermitEvmError::SpenderMismatch => {
                "invalid_permit_evm_payload_spender_mismatch".into()
            }
            PermitEvmError::DomainMismatch => "invalid_permit_evm_payload_domain".into(),
            PermitEvmError::Deadline => "invalid_permit_evm_payload_deadline".into(),
            PermitEvmError::NonceMismatch => ErrorReason::NonceMismatch.into(),
            PermitEvmError::Value => "invalid_permit_evm_payload_value".into(),
            PermitEvmError::InvalidSignature(_) => "invalid_permit_evm_payload_signature".into(),
            PermitEvmError::InsufficientFunds => ErrorReason::InsufficientFunds.into(),
            PermitEvmError::Contract(_) => ErrorReason::UnexpectedVerifyError.into(),
        }
    }
}

/// Facilitator for the EVM "permit" scheme on one chain.
pub struct PermitEvmFacilitator {
    provider: Arc<Eip155ChainProvider>,
}

impl PermitEvmFacilitator {
    /// Creates a facilitator over the given chain provider.
    pub fn new(provider: Arc<Eip155ChainProvider>) -> Self {
        Self { provider }
    }

    #[instrument(skip_all, err)]
    async fn assert_valid_payment(
        &self,
        body: &PermitEvmVerifyRequest,
    ) -> Result<Address, PermitEvmError> {
        let requirements = &body.payment_requirements;
        let payload = &body.payment_payload;
        payload.ensure_matches(requirements)?;

        if requirements.network != self.provider.chain_id() {
            return Err(PermitEvmError::WrongChain);
        }

        let permit = &payload.payload.permit;
        if !self
            .provider
            .signer_addresses()
            .contains(&permit.spender)
        {
            return Err(PermitEvmError::SpenderMismatch);
        }

        let asset: Address = requirements
            .asset
            .parse()
            .map_err(|_| PaymentVerificationError::InvalidFormat("asset".into()))?;
        if permit.domain.verifying_contract != asset
            || permit.domain.chain_id != self.provider.chain().inner()
        {
            return Err(PermitEvmError::DomainMismatch);
        }

        let now = UnixTimestamp::now();
        if permit.deadline.as_secs() < now.as_secs() + DEADLINE_BUFFER_SECS {
            return Err(PermitEvmError::Deadline);
        }

        let amount = U256::from(requirements.parsed_amount()?);
        if permit.value < amount {
            return Err(PermitEvmError::Value);
        }

        self.assert_signature(&body.payment_payload.payload)?;

        let contract = IErc20Permit::new(asset, self.provider.inner());
        let current_nonce = contract.nonces(permit.owner).call().await?;
        if current_nonce != permit.nonce {
            return Err(PermitEvmError::NonceMismatch);
        }

        let balance = contract.balanceOf(permit.owner).call().await?;
        if balance < amount {
            return Err(PermitEvmError::InsufficientFunds);
        }

        Ok(permit.owner)
    }

    fn assert_signature(
        &self,
        payload: &crate::permit::types::PermitEvmPayload,
    ) -> Result<(), PermitEvmError> {
        let permit = &payload.permit;
        let domain: Eip712Domain = eip712_domain! {
            name: permit.domain.name.clone(),
            version: permit.domain.version.clone(),
            chain_id: permit.domain.chain_id,
            verifying_contract: permit.domain.verifying_contract,
        };
        let message = Permit {
            owner: permit.owner,
            spender: permit.spender,
            value: permit.value,
            nonce: permit.nonce,
            deadline: U256::from(permit.deadline.as_secs()),
        };
        let digest = message.eip712_signing_hash(&domain);
        let signature = Signature::try_from(payload.signature.as_ref())
            .map_err(|e| PermitEvmError::InvalidSignature(e.to_string()))?;
        let recovered = signature
            .recover_address_from_prehash(&digest)
            .map_err(|e| PermitEvmError::InvalidSignature(e.to_string()))?;
        if recovered != permit.owner {
            return Err(PermitEvmError::InvalidSignature(format!(
                "recovered {recovered}, expected {}",
                permit.owner
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SchemeFacilitator for PermitEvmFacilitator {
    #[instrument(skip_all, fields(chain = %self.provider.chain_id()))]
    async fn verify(
        &self,
        request: &proto::VerifyRequest,
    ) -> Result<VerifyResponse, SchemeFacilitatorError> {
        let body: PermitEvmVerifyRequest = request.deserialize_as()?;
        let payer = body.payment_payload.payload.permit.owner.to_string();
        match self.assert_valid_payment(&body).await {
            Ok(owner) => Ok(VerifyResponse::valid(owner.to_string())),
            Err(PermitEvmError::Contract(e)) => Err(SchemeFacilitatorError::Ledger(e.to_string())),
            Err(business) => Ok(VerifyResponse::invalid(business.reason(), Some(payer))),
        }
    }

    #[instrument(skip_all, fields(chain = %self.provider.chain_id()))]
    async fn settle(
        &self,
        request: &proto::SettleRequest,
    ) -> Result<SettleResponse, SchemeFacilitatorError> {
        let body: PermitEvmVerifyRequest = request.deserialize_as()?;
        let network = body.payment_requirements.network.clone();
        let payer = body.payment_payload.payload.permit.owner.to_string();

        if let Err(error) = self.assert_valid_payment(&body).await {
            return match error {
                PermitEvmError::Contract(e) => Err(SchemeFacilitatorError::Ledger(e.to_string())),
                business => Ok(SettleResponse::Error {
                    reason: business.reason(),
                    network,
                    payer: Some(payer),
                }),
            };
        }

        let permit = &body.payment_payload.payload.permit;
        let signature = Signature::try_from(body.payment_payload.payload.signature.as_ref())
            .map_err(|e| SchemeFacilitatorError::Verification(
                PaymentVerificationError::InvalidFormat(e.to_string()),
            ))?;
        let asset: Address = body
            .payment_requirements
            .asset
            .parse()
            .map_err(|_| PaymentVerificationError::InvalidFormat("asset".into()))?;
        let pay_to: Address = body
            .payment_requirements
            .pay_to
            .parse()
            .map_err(|_| PaymentVerificationError::InvalidFormat("payTo".into()))?;

        let permit_call = IErc20Permit::permitCall {
            owner: permit.owner,
            spender: permit.spender,
            value: permit.value,
            deadline: U256::from(permit.deadline.as_secs()),
            v: 27 + signature.v() as u8,
            r: signature.r().into(),
            s: signature.s().into(),
        };
        let permit_receipt = self
            .provider
            .send_transaction(MetaTransaction {
                to: asset,
                calldata: permit_call.abi_encode().into(),
                confirmations: 1,
            })
            .await
            .map_err(|e| SchemeFacilitatorError::Ledger(e.to_string()))?;
        if !permit_receipt.status() {
            tracing::warn!(tx = %permit_receipt.transaction_hash, "permit reverted");
            return Ok(SettleResponse::Error {
                reason: transaction_failed("permit reverted"),
                network,
                payer: Some(payer),
            });
        }

        let transfer_call = IErc20Permit::transferFromCall {
            from: permit.owner,
            to: pay_to,
            value: permit.value,
        };
        let transfer_receipt = self
            .provider
            .send_transaction(MetaTransaction {
                to: asset,
                calldata: transfer_call.abi_encode().into(),
                confirmations: 1,
            })
            .await
            .map_err(|e| SchemeFacilitatorError::Ledger(e.to_string()))?;

        if transfer_receipt.status() {
            tracing::info!(tx = %transfer_receipt.transaction_hash, "permit settlement succeeded");
            Ok(SettleResponse::Success {
                transaction: transfer_receipt.transaction_hash.to_string(),
                network,
                payer,
            })
        } else {
            tracing::warn!(tx = %transfer_receipt.transaction_hash, "transferFrom reverted");
            Ok(SettleResponse::Error {
                reason: transaction_failed("transferFrom reverted"),
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
            kinds: vec![SupportedPaymentKind {
                x402_version: 2,
                scheme: PermitScheme::VALUE.to_string(),
                network: network.clone(),
                extra: self.spender_extra(),
            }],
            extensions: Vec::new(),
            signers: [(network, signers)].into_iter().collect(),
        }
    }

    async fn extra(&self, network: &ChainId) -> Option<serde_json::Value> {
        if network != &self.provider.chain_id() {
            return None;
        }
        self.spender_extra()
    }
}

impl PermitEvmFacilitator {
    fn spender_extra(&self) -> Option<serde_json::Value> {
        self.provider
            .signer_addresses()
            .first()
            .map(|spender| serde_json::json!({ "spender": spender.to_string() }))
    }
}
