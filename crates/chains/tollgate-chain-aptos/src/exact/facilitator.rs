//! Facilitator face of the Aptos "exact" scheme.
//!
//! Verification decodes the BCS transaction, pins the entry function to a
//! fungible-asset transfer, checks asset/recipient/amount against the
//! requirements, enforces the sponsored gas cap and the expiration buffer,
//! refuses to sponsor a sender from its own signer set, checks balance,
//! and simulates. Settlement re-verifies, attaches the fee-payer signature
//! when sponsoring, submits, and waits for commitment.

use async_trait::async_trait;
use ed25519_dalek::{Verifier, VerifyingKey};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tollgate_types::chain::ChainId;
use tollgate_types::proto::error::transaction_failed;
use tollgate_types::proto::{
    self, ErrorReason, PaymentVerificationError, SettleResponse, SupportedPaymentKind,
    SupportedResponse, VerifyResponse,
};
use tollgate_types::scheme::{SchemeFacilitator, SchemeFacilitatorError};
use tollgate_types::util::Base64Bytes;
use tracing::instrument;

use crate::chain::{AptosAddress, AptosChainProvider, AptosProviderError};
use crate::exact::types::{AptosExactVerifyRequest, ExactScheme, SupportedKindExtra};
use crate::tx::{
    AccountAddress, AccountAuthenticator, EntryFunction, RawTransaction, SignedTransaction,
    TransactionAuthenticator, TransactionPayload, ed25519_auth_key, fee_payer_signing_message,
    raw_transaction_signing_message,
};

/// Gas cap on sponsored transactions.
const MAX_SPONSORED_GAS: u64 = 500_000;

/// Minimum remaining lifetime of a transaction at verification.
const EXPIRY_BUFFER_SECS: u64 = 5;

/// Per-scheme closed set of verification failures.
#[derive(Debug, thiserror::Error)]
pub enum AptosExactError {
    /// Cross-scheme structural failure.
    #[error(transparent)]
    Verification(#[from] PaymentVerificationError),
    /// The payload network is not the provider's network.
    #[error("payment network does not match this facilitator's network")]
    WrongChain,
    /// The BCS bytes could not be decoded.
    #[error("transaction could not be decoded: {0}")]
    TransactionDecoding(String),
    /// The sender does not match the authenticator's public key.
    #[error("sender does not match the authenticator public key")]
    SenderMismatch,
    /// The Ed25519 signature does not verify.
    #[error("invalid signature")]
    InvalidSignature,
    /// A sponsored transaction requests too much gas.
    #[error("sponsored transaction exceeds the gas cap")]
    GasCapExceeded,
    /// The transaction expires too soon.
    #[error("transaction expires too soon")]
    Expired,
    /// The entry function is not a fungible-asset transfer.
    #[error("entry function is not a fungible-asset transfer")]
    WrongEntryFunction,
    /// The transferred asset is not the required one.
    #[error("transfer asset does not match the required asset")]
    AssetMismatch,
    /// The transfer recipient is not payTo.
    #[error("transfer recipient does not match payTo")]
    RecipientMismatch,
    /// The transfer amount is below the required amount.
    #[error("transfer amount is below the required amount")]
    AmountMismatch,
    /// The sender is one of the facilitator's own signers.
    #[error("fee payer would be transferring its own funds")]
    FeePayerTransferringFunds,
    /// The sender's balance cannot cover the amount.
    #[error("insufficient balance")]
    InsufficientFunds,
    /// Simulation aborted.
    #[error("simulation failed: {0}")]
    SimulationFailed(String),
    /// Fullnode failure; not a business rejection.
    #[error(transparent)]
    Provider(AptosProviderError),
}

impl AptosExactError {
    /// The stable wire tag for this failure.
    pub fn reason(&self) -> String {
        match self {
            AptosExactError::Verification(e) => e.reason().into(),
            AptosExactError::WrongChain => ErrorReason::InvalidNetwork.into(),
            AptosExactError::TransactionDecoding(_) => {
                "invalid_exact_aptos_payload_transaction".into()
            }
            AptosExactError::SenderMismatch => {
                "invalid_exact_aptos_payload_sender_mismatch".into()
            }
            AptosExactError::InvalidSignature => "invalid_exact_aptos_payload_signature".into(),
            AptosExactError::GasCapExceeded => "invalid_exact_aptos_payload_max_gas".into(),
            AptosExactError::Expired => ErrorReason::PaymentExpired.into(),
            AptosExactError::WrongEntryFunction => {
                "invalid_exact_aptos_payload_entry_function".into()
            }
            AptosExactError::AssetMismatch => ErrorReason::AssetMismatch.into(),
            AptosExactError::RecipientMismatch => {
                "invalid_exact_aptos_payload_recipient_mismatch".into()
            }
            AptosExactError::AmountMismatch => ErrorReason::AmountMismatch.into(),
            AptosExactError::FeePayerTransferringFunds => {
                "invalid_exact_aptos_payload_fee_payer_transferring_funds".into()
            }
            AptosExactError::InsufficientFunds => ErrorReason::InsufficientFunds.into(),
            AptosExactError::SimulationFailed(_) => {
                "invalid_exact_aptos_payload_simulation_failed".into()
            }
            AptosExactError::Provider(_) => ErrorReason::UnexpectedVerifyError.into(),
        }
    }
}

struct DecodedPayment {
    raw: RawTransaction,
    authenticator: AccountAuthenticator,
    sender: AccountAddress,
}

/// Facilitator for the Aptos "exact" scheme on one network.
pub struct AptosExactFacilitator {
    provider: Arc<AptosChainProvider>,
}

impl AptosExactFacilitator {
    /// Creates a facilitator over the given network provider.
    pub fn new(provider: Arc<AptosChainProvider>) -> Self {
        Self { provider }
    }

    fn decode(&self, body: &AptosExactVerifyRequest) -> Result<DecodedPayment, AptosExactError> {
        let payload = &body.payment_payload.payload;
        let raw_bytes = Base64Bytes::from(payload.raw_transaction.as_bytes())
            .decode()
            .map_err(|e| AptosExactError::TransactionDecoding(e.to_string()))?;
        let raw: RawTransaction = bcs::from_bytes(&raw_bytes)
            .map_err(|e| AptosExactError::TransactionDecoding(e.to_string()))?;
        let auth_bytes = Base64Bytes::from(payload.authenticator.as_bytes())
            .decode()
            .map_err(|e| AptosExactError::TransactionDecoding(e.to_string()))?;
        let authenticator: AccountAuthenticator = bcs::from_bytes(&auth_bytes)
            .map_err(|e| AptosExactError::TransactionDecoding(e.to_string()))?;
        let sender = raw.sender;
        Ok(DecodedPayment {
            raw,
            authenticator,
            sender,
        })
    }

    #[instrument(skip_all, err)]
    async fn assert_valid_payment(
        &self,
        body: &AptosExactVerifyRequest,
    ) -> Result<DecodedPayment, AptosExactError> {
        let requirements = &body.payment_requirements;
        body.payment_payload.ensure_matches(requirements)?;
        if requirements.network != self.provider.chain_id() {
            return Err(AptosExactError::WrongChain);
        }

        let decoded = self.decode(body)?;
        let raw = &decoded.raw;

        if raw.chain_id != self.provider.chain_byte() {
            return Err(AptosExactError::WrongChain);
        }

        // Ed25519 senders prove themselves here; SingleKey/MultiKey
        // authenticators are deferred to simulation.
        if let Some(public_key) = decoded.authenticator.ed25519_public_key() {
            let auth_key = ed25519_auth_key(public_key);
            if auth_key != decoded.sender.0 {
                return Err(AptosExactError::SenderMismatch);
            }
            self.assert_ed25519_signature(&decoded, public_key)?;
        }

        let sponsored = self.provider.sponsored();
        if sponsored && raw.max_gas_amount > MAX_SPONSORED_GAS {
            return Err(AptosExactError::GasCapExceeded);
        }
        if sponsored && decoded.sender == self.provider.sponsor_address() {
            return Err(AptosExactError::FeePayerTransferringFunds);
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("SystemTime before UNIX epoch?!?")
            .as_secs();
        if raw.expiration_timestamp_secs < now + EXPIRY_BUFFER_SECS {
            return Err(AptosExactError::Expired);
        }

        let entry = match &raw.payload {
            TransactionPayload::EntryFunction(entry) => entry,
            _ => return Err(AptosExactError::WrongEntryFunction),
        };
        let (asset, recipient, amount) = parse_transfer(entry)?;

        let required_asset = AccountAddress::from_hex(&requirements.asset)
            .ok_or_else(|| PaymentVerificationError::InvalidFormat("asset".into()))?;
        if asset != required_asset {
            return Err(AptosExactError::AssetMismatch);
        }
        let required_recipient = AccountAddress::from_hex(&requirements.pay_to)
            .ok_or_else(|| PaymentVerificationError::InvalidFormat("payTo".into()))?;
        if recipient != required_recipient {
            return Err(AptosExactError::RecipientMismatch);
        }
        let required_amount = requirements.parsed_amount()?;
        if u128::from(amount) < required_amount {
            return Err(AptosExactError::AmountMismatch);
        }

        let balance = self
            .provider
            .fungible_balance(&decoded.sender, &asset)
            .await
            .map_err(AptosExactError::Provider)?;
        if balance < required_amount {
            return Err(AptosExactError::InsufficientFunds);
        }

        let signed = self.assemble(&decoded)?;
        let signed_bcs = bcs::to_bytes(&signed)
            .map_err(|e| AptosExactError::TransactionDecoding(e.to_string()))?;
        self.provider.simulate(signed_bcs).await.map_err(|e| match e {
            AptosProviderError::Api(status) => AptosExactError::SimulationFailed(status),
            other => AptosExactError::Provider(other),
        })?;

        Ok(decoded)
    }

    fn assert_ed25519_signature(
        &self,
        decoded: &DecodedPayment,
        public_key: &[u8],
    ) -> Result<(), AptosExactError> {
        let signature = match &decoded.authenticator {
            AccountAuthenticator::Ed25519 { signature, .. } => signature,
            _ => return Ok(()),
        };
        let message = if self.provider.sponsored() {
            fee_payer_signing_message(&decoded.raw, self.provider.sponsor_address())
        } else {
            raw_transaction_signing_message(&decoded.raw)
        }
        .map_err(|e| AptosExactError::TransactionDecoding(e.to_string()))?;

        let key_bytes: [u8; 32] = public_key
            .try_into()
            .map_err(|_| AptosExactError::InvalidSignature)?;
        let verifying_key =
            VerifyingKey::from_bytes(&key_bytes).map_err(|_| AptosExactError::InvalidSignature)?;
        let sig_bytes: [u8; 64] = signature
            .as_slice()
            .try_into()
            .map_err(|_| AptosExactError::InvalidSignature)?;
        verifying_key
            .verify(&message, &ed25519_dalek::Signature::from_bytes(&sig_bytes))
            .map_err(|_| AptosExactError::InvalidSignature)
    }

    /// Wraps the sender authenticator into a full transaction
    /// authenticator, signing as fee payer when sponsoring.
    fn assemble(&self, decoded: &DecodedPayment) -> Result<SignedTransaction, AptosExactError> {
        let authenticator = if self.provider.sponsored() {
            let message = fee_payer_signing_message(&decoded.raw, self.provider.sponsor_address())
                .map_err(|e| AptosExactError::TransactionDecoding(e.to_string()))?;
            let (public_key, signature) = self.provider.sign_as_sponsor(&message);
            TransactionAuthenticator::FeePayer {
                sender: decoded.authenticator.clone(),
                secondary_signer_addresses: Vec::new(),
                secondary_signers: Vec::new(),
                fee_payer_address: self.provider.sponsor_address(),
                fee_payer_signer: AccountAuthenticator::Ed25519 {
                    public_key,
                    signature,
                },
            }
        } else {
            TransactionAuthenticator::SingleSender {
                sender: decoded.authenticator.clone(),
            }
        };
        Ok(SignedTransaction {
            raw_txn: decoded.raw.clone(),
            authenticator,
        })
    }
}

/// Extracts `(asset, recipient, amount)` from a fungible-asset transfer
/// entry function.
fn parse_transfer(
    entry: &EntryFunction,
) -> Result<(AccountAddress, AccountAddress, u64), AptosExactError> {
    let framework = AccountAddress::from_hex("0x1").expect("framework address");
    let is_transfer = entry.module.address == framework
        && entry.function == "transfer"
        && (entry.module.name == "primary_fungible_store"
            || entry.module.name == "fungible_asset");
    if !is_transfer || entry.args.len() != 3 {
        return Err(AptosExactError::WrongEntryFunction);
    }
    let asset: AccountAddress = bcs::from_bytes(&entry.args[0])
        .map_err(|_| AptosExactError::WrongEntryFunction)?;
    let recipient: AccountAddress = bcs::from_bytes(&entry.args[1])
        .map_err(|_| AptosExactError::WrongEntryFunction)?;
    let amount: u64 =
        bcs::from_bytes(&entry.args[2]).map_err(|_| AptosExactError::WrongEntryFunction)?;
    Ok((asset, recipient, amount))
}

#[async_trait]
impl SchemeFacilitator for AptosExactFacilitator {
    #[instrument(skip_all, fields(chain = %self.provider.chain_id()))]
    async fn verify(
        &self,
        request: &proto::VerifyRequest,
    ) -> Result<VerifyResponse, SchemeFacilitatorError> {
        let body: AptosExactVerifyRequest = request.deserialize_as()?;
        match self.assert_valid_payment(&body).await {
            Ok(decoded) => Ok(VerifyResponse::valid(decoded.sender.to_hex())),
            Err(AptosExactError::Provider(e)) => {
                Err(SchemeFacilitatorError::Ledger(e.to_string()))
            }
            Err(business) => Ok(VerifyResponse::invalid(business.reason(), None)),
        }
    }

    #[instrument(skip_all, fields(chain = %self.provider.chain_id()))]
    async fn settle(
        &self,
        request: &proto::SettleRequest,
    ) -> Result<SettleResponse, SchemeFacilitatorError> {
        let body: AptosExactVerifyRequest = request.deserialize_as()?;
        let network = body.payment_requirements.network.clone();

        let decoded = match self.assert_valid_payment(&body).await {
            Ok(decoded) => decoded,
            Err(AptosExactError::Provider(e)) => {
                return Err(SchemeFacilitatorError::Ledger(e.to_string()));
            }
            Err(business) => {
                return Ok(SettleResponse::Error {
                    reason: business.reason(),
                    network,
                    payer: None,
                });
            }
        };
        let payer = decoded.sender.to_hex();

        let signed = match self.assemble(&decoded) {
            Ok(signed) => signed,
            Err(error) => {
                return Ok(SettleResponse::Error {
                    reason: error.reason(),
                    network,
                    payer: Some(payer),
                });
            }
        };
        let signed_bcs = bcs::to_bytes(&signed)
            .map_err(|e| SchemeFacilitatorError::Ledger(e.to_string()))?;

        let hash = self
            .provider
            .submit(signed_bcs)
            .await
            .map_err(|e| SchemeFacilitatorError::Ledger(e.to_string()))?;
        let (success, vm_status) = self
            .provider
            .wait_for_transaction(&hash)
            .await
            .map_err(|e| SchemeFacilitatorError::Ledger(e.to_string()))?;

        if success {
            tracing::info!(tx = %hash, "fungible asset transfer committed");
            Ok(SettleResponse::Success {
                transaction: hash,
                network,
                payer,
            })
        } else {
            tracing::warn!(tx = %hash, vm_status, "fungible asset transfer aborted");
            Ok(SettleResponse::Error {
                reason: transaction_failed(vm_status),
                network,
                payer: Some(payer),
            })
        }
    }

    async fn supported(&self) -> SupportedResponse {
        let chain_id = self.provider.chain_id();
        let extra = serde_json::to_value(SupportedKindExtra {
            fee_payer: AptosAddress(self.provider.sponsor_address()),
            sponsored: self.provider.sponsored(),
        })
        .ok();
        let mut signers = HashMap::with_capacity(1);
        signers.insert(
            chain_id.clone(),
            vec![self.provider.sponsor_address().to_hex()],
        );
        SupportedResponse {
            kinds: vec![SupportedPaymentKind {
                x402_version: 2,
                scheme: ExactScheme::VALUE.to_string(),
                network: chain_id,
                extra,
            }],
            extensions: Vec::new(),
            signers,
        }
    }

    async fn extra(&self, network: &ChainId) -> Option<serde_json::Value> {
        if network != &self.provider.chain_id() {
            return None;
        }
        serde_json::to_value(SupportedKindExtra {
            fee_payer: AptosAddress(self.provider.sponsor_address()),
            sponsored: self.provider.sponsored(),
        })
        .ok()
    }
}
