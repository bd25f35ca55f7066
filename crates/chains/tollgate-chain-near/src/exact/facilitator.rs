//! Facilitator face of the NEAR "exact" scheme.
//!
//! NEP-366 payloads verify end to end and settle by relaying
//! `Action::Delegate`. NEP-413 payloads verify the signed payment intent
//! and guard replays with a nonce set; they carry no executable
//! transaction, so settlement demands the delegate transport.

use async_trait::async_trait;
use dashmap::DashSet;
use ed25519_dalek::{Verifier, VerifyingKey};
use std::collections::HashMap;
use std::sync::Arc;
use tollgate_types::chain::ChainId;
use tollgate_types::proto::{
    self, ErrorReason, PaymentVerificationError, SettleResponse, SupportedPaymentKind,
    SupportedResponse, VerifyResponse,
};
use tollgate_types::scheme::{SchemeFacilitator, SchemeFacilitatorError};
use tollgate_types::util::Base64Bytes;
use tracing::instrument;

use crate::chain::{NearChainProvider, NearProviderError};
use crate::exact::types::{
    CanonicalPaymentMessage, DelegatePayload, ExactScheme, NearExactPayload,
    NearExactVerifyRequest, SignedMessagePayload,
};
use crate::tx::{
    Action, DelegateAction, Nep413Payload, PublicKey, Signature, SignedDelegateAction,
    Transaction, delegate_action_signing_digest, nep413_signing_digest,
};

/// Blocks of validity a delegate action must have left at verification.
const MIN_REMAINING_BLOCKS: u64 = 10;

/// One yoctoNEAR, the deposit `ft_transfer` requires.
const FT_TRANSFER_DEPOSIT: u128 = 1;

/// Per-scheme closed set of verification failures.
#[derive(Debug, thiserror::Error)]
pub enum NearExactError {
    /// Cross-scheme structural failure.
    #[error(transparent)]
    Verification(#[from] PaymentVerificationError),
    /// The payload network is not the provider's network.
    #[error("payment network does not match this facilitator's network")]
    WrongChain,
    /// Borsh or base64 decoding failed.
    #[error("payload could not be decoded: {0}")]
    Decoding(String),
    /// The signature does not verify.
    #[error("invalid signature")]
    InvalidSignature,
    /// The delegated call is not `ft_transfer` on the required contract.
    #[error("delegated action is not the required ft_transfer")]
    WrongAction,
    /// The transfer recipient is not payTo.
    #[error("transfer recipient does not match payTo")]
    RecipientMismatch,
    /// The transfer amount is below the required amount.
    #[error("transfer amount is below the required amount")]
    AmountMismatch,
    /// The nonce is stale or already seen.
    #[error("nonce is stale or replayed")]
    NonceMismatch,
    /// The delegate action expires too soon.
    #[error("delegate action expires too soon")]
    Expired,
    /// The sender is the facilitator's own relayer.
    #[error("relayer would be transferring its own funds")]
    FeePayerTransferringFunds,
    /// The sender's FT balance cannot cover the amount.
    #[error("insufficient balance")]
    InsufficientFunds,
    /// A NEP-413 payload cannot be settled.
    #[error("signed-message payloads carry no executable transaction")]
    NotSettleable,
    /// RPC failure; not a business rejection.
    #[error(transparent)]
    Provider(NearProviderError),
}

impl NearExactError {
    /// The stable wire tag for this failure.
    pub fn reason(&self) -> String {
        match self {
            NearExactError::Verification(e) => e.reason().into(),
            NearExactError::WrongChain => ErrorReason::InvalidNetwork.into(),
            NearExactError::Decoding(_) => "invalid_exact_near_payload_transaction".into(),
            NearExactError::InvalidSignature => "invalid_exact_near_payload_signature".into(),
            NearExactError::WrongAction => "invalid_exact_near_payload_action".into(),
            NearExactError::RecipientMismatch => {
                "invalid_exact_near_payload_recipient_mismatch".into()
            }
            NearExactError::AmountMismatch => ErrorReason::AmountMismatch.into(),
            NearExactError::NonceMismatch => ErrorReason::NonceMismatch.into(),
            NearExactError::Expired => ErrorReason::PaymentExpired.into(),
            NearExactError::FeePayerTransferringFunds => {
                ErrorReason::FeePayerTransferringFunds.into()
            }
            NearExactError::InsufficientFunds => ErrorReason::InsufficientFunds.into(),
            NearExactError::NotSettleable => ErrorReason::InvalidTransactionState.into(),
            NearExactError::Provider(_) => ErrorReason::UnexpectedVerifyError.into(),
        }
    }
}

enum Verified {
    Delegate {
        payer: String,
        action: SignedDelegateAction,
    },
    SignedMessage {
        payer: String,
    },
}

impl Verified {
    fn payer(&self) -> &str {
        match self {
            Verified::Delegate { payer, .. } => payer,
            Verified::SignedMessage { payer } => payer,
        }
    }
}

/// Facilitator for the NEAR "exact" scheme on one network.
pub struct NearExactFacilitator {
    provider: Arc<NearChainProvider>,
    /// Replay guard for NEP-413 nonces, keyed `(account, nonce)`.
    seen_nonces: DashSet<(String, [u8; 32])>,
}

impl NearExactFacilitator {
    /// Creates a facilitator over the given network provider.
    pub fn new(provider: Arc<NearChainProvider>) -> Self {
        Self {
            provider,
            seen_nonces: DashSet::new(),
        }
    }

    #[instrument(skip_all, err)]
    async fn assert_valid_payment(
        &self,
        body: &NearExactVerifyRequest,
        consume_nonce: bool,
    ) -> Result<Verified, NearExactError> {
        let requirements = &body.payment_requirements;
        body.payment_payload.ensure_matches(requirements)?;
        if requirements.network != self.provider.chain_id() {
            return Err(NearExactError::WrongChain);
        }

        match &body.payment_payload.payload {
            NearExactPayload::Delegate(payload) => {
                self.verify_delegate(payload, requirements).await
            }
            NearExactPayload::SignedMessage(payload) => {
                self.verify_signed_message(payload, requirements, consume_nonce)
            }
        }
    }

    async fn verify_delegate(
        &self,
        payload: &DelegatePayload,
        requirements: &proto::PaymentRequirements,
    ) -> Result<Verified, NearExactError> {
        let bytes = Base64Bytes::from(payload.signed_delegate_action.as_bytes())
            .decode()
            .map_err(|e| NearExactError::Decoding(e.to_string()))?;
        let signed: SignedDelegateAction =
            borsh::from_slice(&bytes).map_err(|e| NearExactError::Decoding(e.to_string()))?;
        let action = &signed.delegate_action;

        if &action.sender_id == self.provider.relayer_id() {
            return Err(NearExactError::FeePayerTransferringFunds);
        }
        if action.receiver_id != requirements.asset {
            return Err(NearExactError::WrongAction);
        }

        let transfer = parse_ft_transfer(action)?;
        if transfer.receiver_id != requirements.pay_to {
            return Err(NearExactError::RecipientMismatch);
        }
        let required = requirements.parsed_amount()?;
        let amount: u128 = transfer
            .amount
            .parse()
            .map_err(|_| NearExactError::WrongAction)?;
        if amount < required {
            return Err(NearExactError::AmountMismatch);
        }

        self.verify_delegate_signature(&signed)?;

        let public_key_b58 = match &action.public_key {
            PublicKey::Ed25519(bytes) => {
                format!("ed25519:{}", bs58::encode(bytes).into_string())
            }
            PublicKey::Secp256k1(_) => return Err(NearExactError::InvalidSignature),
        };
        let current_nonce = self
            .provider
            .access_key_nonce(&action.sender_id, &public_key_b58)
            .await
            .map_err(NearExactError::Provider)?;
        if action.nonce <= current_nonce {
            return Err(NearExactError::NonceMismatch);
        }

        let (_, height) = self
            .provider
            .latest_block()
            .await
            .map_err(NearExactError::Provider)?;
        if action.max_block_height < height + MIN_REMAINING_BLOCKS {
            return Err(NearExactError::Expired);
        }

        let balance = self
            .provider
            .ft_balance_of(&action.receiver_id, &action.sender_id)
            .await
            .map_err(NearExactError::Provider)?;
        if balance < required {
            return Err(NearExactError::InsufficientFunds);
        }

        Ok(Verified::Delegate {
            payer: action.sender_id.clone(),
            action: signed,
        })
    }

    fn verify_delegate_signature(
        &self,
        signed: &SignedDelegateAction,
    ) -> Result<(), NearExactError> {
        let digest = delegate_action_signing_digest(&signed.delegate_action)
            .map_err(|e| NearExactError::Decoding(e.to_string()))?;
        let (key_bytes, sig_bytes) = match (&signed.delegate_action.public_key, &signed.signature)
        {
            (PublicKey::Ed25519(key), Signature::Ed25519(sig)) => (key, sig),
            _ => return Err(NearExactError::InvalidSignature),
        };
        let verifying_key =
            VerifyingKey::from_bytes(key_bytes).map_err(|_| NearExactError::InvalidSignature)?;
        verifying_key
            .verify(&digest, &ed25519_dalek::Signature::from_bytes(sig_bytes))
            .map_err(|_| NearExactError::InvalidSignature)
    }

    fn verify_signed_message(
        &self,
        payload: &SignedMessagePayload,
        requirements: &proto::PaymentRequirements,
        consume_nonce: bool,
    ) -> Result<Verified, NearExactError> {
        let intent: CanonicalPaymentMessage = serde_json::from_str(&payload.message)
            .map_err(|e| NearExactError::Decoding(e.to_string()))?;
        if intent.pay_to != requirements.pay_to {
            return Err(NearExactError::RecipientMismatch);
        }
        if intent.asset != requirements.asset {
            return Err(NearExactError::WrongAction);
        }
        let required = requirements.parsed_amount()?;
        let amount: u128 = intent
            .amount
            .parse()
            .map_err(|_| NearExactError::Decoding("amount".into()))?;
        if amount < required {
            return Err(NearExactError::AmountMismatch);
        }

        let nonce: [u8; 32] = Base64Bytes::from(payload.nonce.as_bytes())
            .decode()
            .map_err(|e| NearExactError::Decoding(e.to_string()))?
            .try_into()
            .map_err(|_| NearExactError::Decoding("nonce must be 32 bytes".into()))?;
        let replay_key = (payload.account_id.clone(), nonce);
        if self.seen_nonces.contains(&replay_key) {
            return Err(NearExactError::NonceMismatch);
        }

        let key_b58 = payload
            .public_key
            .strip_prefix("ed25519:")
            .ok_or(NearExactError::InvalidSignature)?;
        let key_bytes: [u8; 32] = bs58::decode(key_b58)
            .into_vec()
            .map_err(|_| NearExactError::InvalidSignature)?
            .try_into()
            .map_err(|_| NearExactError::InvalidSignature)?;
        let verifying_key =
            VerifyingKey::from_bytes(&key_bytes).map_err(|_| NearExactError::InvalidSignature)?;

        let digest = nep413_signing_digest(&Nep413Payload {
            message: payload.message.clone(),
            nonce,
            recipient: payload.recipient.clone(),
            callback_url: payload.callback_url.clone(),
        })
        .map_err(|e| NearExactError::Decoding(e.to_string()))?;
        let sig_bytes: [u8; 64] = Base64Bytes::from(payload.signature.as_bytes())
            .decode()
            .map_err(|_| NearExactError::InvalidSignature)?
            .try_into()
            .map_err(|_| NearExactError::InvalidSignature)?;
        verifying_key
            .verify(&digest, &ed25519_dalek::Signature::from_bytes(&sig_bytes))
            .map_err(|_| NearExactError::InvalidSignature)?;

        if consume_nonce {
            self.seen_nonces.insert(replay_key);
        }
        Ok(Verified::SignedMessage {
            payer: payload.account_id.clone(),
        })
    }
}

struct FtTransferArgs {
    receiver_id: String,
    amount: String,
}

fn parse_ft_transfer(action: &DelegateAction) -> Result<FtTransferArgs, NearExactError> {
    if action.actions.len() != 1 {
        return Err(NearExactError::WrongAction);
    }
    let call = match &action.actions[0].0 {
        Action::FunctionCall(call) => call,
        _ => return Err(NearExactError::WrongAction),
    };
    if call.method_name != "ft_transfer" || call.deposit != FT_TRANSFER_DEPOSIT {
        return Err(NearExactError::WrongAction);
    }
    let args: serde_json::Value =
        serde_json::from_slice(&call.args).map_err(|e| NearExactError::Decoding(e.to_string()))?;
    let receiver_id = args
        .get("receiver_id")
        .and_then(|v| v.as_str())
        .ok_or(NearExactError::WrongAction)?
        .to_string();
    let amount = args
        .get("amount")
        .and_then(|v| v.as_str())
        .ok_or(NearExactError::WrongAction)?
        .to_string();
    Ok(FtTransferArgs {
        receiver_id,
        amount,
    })
}

#[async_trait]
impl SchemeFacilitator for NearExactFacilitator {
    #[instrument(skip_all, fields(chain = %self.provider.chain_id()))]
    async fn verify(
        &self,
        request: &proto::VerifyRequest,
    ) -> Result<VerifyResponse, SchemeFacilitatorError> {
        let body: NearExactVerifyRequest = request.deserialize_as()?;
        match self.assert_valid_payment(&body, false).await {
            Ok(verified) => Ok(VerifyResponse::valid(verified.payer())),
            Err(NearExactError::Provider(e)) => {
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
        let body: NearExactVerifyRequest = request.deserialize_as()?;
        let network = body.payment_requirements.network.clone();

        let verified = match self.assert_valid_payment(&body, true).await {
            Ok(verified) => verified,
            Err(NearExactError::Provider(e)) => {
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

        let (payer, signed_action) = match verified {
            Verified::Delegate { payer, action } => (payer, action),
            Verified::SignedMessage { payer } => {
                return Ok(SettleResponse::Error {
                    reason: NearExactError::NotSettleable.reason(),
                    network,
                    payer: Some(payer),
                });
            }
        };

        let relayer_id = self.provider.relayer_id().clone();
        let relayer_key_b58 = match self.provider.relayer_public_key() {
            PublicKey::Ed25519(bytes) => format!("ed25519:{}", bs58::encode(bytes).into_string()),
            PublicKey::Secp256k1(_) => unreachable!("relayer keys are ed25519"),
        };
        let relayer_nonce = self
            .provider
            .access_key_nonce(&relayer_id, &relayer_key_b58)
            .await
            .map_err(|e| SchemeFacilitatorError::Ledger(e.to_string()))?;
        let (block_hash, _) = self
            .provider
            .latest_block()
            .await
            .map_err(|e| SchemeFacilitatorError::Ledger(e.to_string()))?;

        let sender_id = signed_action.delegate_action.sender_id.clone();
        let transaction = Transaction {
            signer_id: relayer_id,
            public_key: self.provider.relayer_public_key(),
            nonce: relayer_nonce + 1,
            receiver_id: sender_id,
            block_hash,
            actions: vec![Action::Delegate(Box::new(signed_action))],
        };

        match self.provider.sign_and_broadcast(transaction).await {
            Ok(hash) => {
                tracing::info!(tx = %hash, "delegated ft_transfer committed");
                Ok(SettleResponse::Success {
                    transaction: hash,
                    network,
                    payer,
                })
            }
            Err(NearProviderError::Rpc(detail)) => Ok(SettleResponse::Error {
                reason: proto::error::transaction_failed(detail),
                network,
                payer: Some(payer),
            }),
            Err(e) => Err(SchemeFacilitatorError::Ledger(e.to_string())),
        }
    }

    async fn supported(&self) -> SupportedResponse {
        let chain_id = self.provider.chain_id();
        let mut signers = HashMap::with_capacity(1);
        signers.insert(chain_id.clone(), vec![self.provider.relayer_id().clone()]);
        SupportedResponse {
            kinds: vec![SupportedPaymentKind {
                x402_version: 2,
                scheme: ExactScheme::VALUE.to_string(),
                network: chain_id,
                extra: Some(serde_json::json!({
                    "relayer": self.provider.relayer_id(),
                })),
            }],
            extensions: Vec::new(),
            signers,
        }
    }

    async fn extra(&self, network: &ChainId) -> Option<serde_json::Value> {
        if network != &self.provider.chain_id() {
            return None;
        }
        Some(serde_json::json!({ "relayer": self.provider.relayer_id() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::FunctionCallAction;

    fn delegate(method: &str, deposit: u128, args: &str) -> DelegateAction {
        DelegateAction {
            sender_id: "alice.near".to_string(),
            receiver_id: "usdc.near".to_string(),
            actions: vec![crate::tx::NonDelegateAction(Action::FunctionCall(
                Box::new(FunctionCallAction {
                    method_name: method.to_string(),
                    args: args.as_bytes().to_vec(),
                    gas: 30_000_000_000_000,
                    deposit,
                }),
            ))],
            nonce: 42,
            max_block_height: 100_000_000,
            public_key: PublicKey::Ed25519([7u8; 32]),
        }
    }

    #[test]
    fn parses_ft_transfer_args() {
        let action = delegate(
            "ft_transfer",
            1,
            r#"{"receiver_id":"bob.near","amount":"1000"}"#,
        );
        let transfer = parse_ft_transfer(&action).unwrap();
        assert_eq!(transfer.receiver_id, "bob.near");
        assert_eq!(transfer.amount, "1000");
    }

    #[test]
    fn rejects_wrong_method_and_deposit() {
        let wrong_method = delegate("ft_transfer_call", 1, "{}");
        assert!(matches!(
            parse_ft_transfer(&wrong_method),
            Err(NearExactError::WrongAction)
        ));

        let wrong_deposit = delegate(
            "ft_transfer",
            0,
            r#"{"receiver_id":"bob.near","amount":"1000"}"#,
        );
        assert!(matches!(
            parse_ft_transfer(&wrong_deposit),
            Err(NearExactError::WrongAction)
        ));
    }
}
