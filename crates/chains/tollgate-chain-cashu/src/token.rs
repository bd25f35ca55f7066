//! The "cashu-token" scheme: proofs, facilitator, client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::value::to_raw_value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tollgate_types::chain::ChainId;
use tollgate_types::lit_str;
use tollgate_types::proto::{
    self, ErrorReason, PaymentVerificationError, PaymentPayload, PaymentRequirements,
    SettleResponse, SupportedPaymentKind, SupportedResponse, VerifyRequestBody, VerifyResponse,
    X402Version,
};
use tollgate_types::scheme::{
    SchemeClient, SchemeClientError, SchemeFacilitator, SchemeFacilitatorError,
};
use tracing::instrument;

use crate::mint::{CashuMint, CashuMintConfig, CashuMintError};

lit_str!(CashuTokenScheme, "cashu-token");

/// One Cashu proof.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CashuProof {
    /// Denomination in the mint's unit.
    pub amount: u64,
    /// Keyset id the proof was signed under.
    pub id: String,
    /// The proof secret.
    pub secret: String,
    /// The unblinded mint signature, hex.
    #[serde(rename = "C")]
    pub c: String,
}

/// The scheme payload: a list of proofs covering the price.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashuTokenPayload {
    /// The proofs being spent.
    pub proofs: Vec<CashuProof>,
}

type CashuVerifyRequest = VerifyRequestBody<CashuTokenPayload>;

/// Per-scheme closed set of verification failures.
#[derive(Debug, thiserror::Error)]
pub enum CashuTokenError {
    /// Cross-scheme structural failure.
    #[error(transparent)]
    Verification(#[from] PaymentVerificationError),
    /// The payload network is not the cashu id.
    #[error("payment network is not the cashu network")]
    WrongChain,
    /// The payload carries no proofs.
    #[error("no proofs in payload")]
    NoProofs,
    /// The proofs sum below the required amount.
    #[error("proofs sum below the required amount")]
    AmountMismatch,
    /// A proof's keyset is no longer accepted.
    #[error("keyset {0} is not accepted by the mint")]
    KeysetNotAccepted(String),
    /// The mint refused redemption (already spent, bad signature).
    #[error("redemption refused: {0}")]
    RedemptionRefused(String),
    /// Mint failure; not a business rejection.
    #[error(transparent)]
    Mint(CashuMintError),
}

impl CashuTokenError {
    /// The stable wire tag for this failure.
    pub fn reason(&self) -> String {
        match self {
            CashuTokenError::Verification(e) => e.reason().into(),
            CashuTokenError::WrongChain => ErrorReason::InvalidNetwork.into(),
            CashuTokenError::NoProofs => "invalid_cashu_token_payload_proofs".into(),
            CashuTokenError::AmountMismatch => ErrorReason::AmountMismatch.into(),
            CashuTokenError::KeysetNotAccepted(_) => {
                "invalid_cashu_token_payload_keyset".into()
            }
            CashuTokenError::RedemptionRefused(_) => ErrorReason::InvalidTransactionState.into(),
            CashuTokenError::Mint(_) => ErrorReason::UnexpectedVerifyError.into(),
        }
    }
}

/// Facilitator for the "cashu-token" scheme over one mint.
pub struct CashuTokenFacilitator<M = crate::mint::RestCashuMint> {
    mint: Arc<M>,
    chain_id: ChainId,
}

impl<M> CashuTokenFacilitator<M> {
    /// Creates a facilitator over a mint.
    pub fn new(mint: Arc<M>, config: &CashuMintConfig) -> Self {
        Self {
            mint,
            chain_id: config.chain_id(),
        }
    }
}

impl<M: CashuMint> CashuTokenFacilitator<M> {
    #[instrument(skip_all, err)]
    async fn assert_valid_proofs(
        &self,
        body: &CashuVerifyRequest,
    ) -> Result<(), CashuTokenError> {
        let requirements = &body.payment_requirements;
        body.payment_payload.ensure_matches(requirements)?;
        if requirements.network != self.chain_id {
            return Err(CashuTokenError::WrongChain);
        }

        let proofs = &body.payment_payload.payload.proofs;
        if proofs.is_empty() {
            return Err(CashuTokenError::NoProofs);
        }

        let required = requirements.parsed_amount()?;
        let total: u128 = proofs.iter().map(|p| u128::from(p.amount)).sum();
        if total < required {
            return Err(CashuTokenError::AmountMismatch);
        }

        let accepted = self
            .mint
            .active_keysets()
            .await
            .map_err(CashuTokenError::Mint)?;
        for proof in proofs {
            if !accepted.contains(&proof.id) {
                return Err(CashuTokenError::KeysetNotAccepted(proof.id.clone()));
            }
        }
        Ok(())
    }
}

/// Cashu is bearer cash; the payer identity is a fingerprint over the
/// spent proofs.
fn proofs_fingerprint(proofs: &[CashuProof]) -> String {
    let mut hasher = Sha256::new();
    for proof in proofs {
        hasher.update(proof.secret.as_bytes());
    }
    hex_string(&hasher.finalize())
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[async_trait]
impl<M: CashuMint> SchemeFacilitator for CashuTokenFacilitator<M> {
    #[instrument(skip_all)]
    async fn verify(
        &self,
        request: &proto::VerifyRequest,
    ) -> Result<VerifyResponse, SchemeFacilitatorError> {
        let body: CashuVerifyRequest = request.deserialize_as()?;
        match self.assert_valid_proofs(&body).await {
            Ok(()) => Ok(VerifyResponse::valid(proofs_fingerprint(
                &body.payment_payload.payload.proofs,
            ))),
            Err(CashuTokenError::Mint(e)) => Err(SchemeFacilitatorError::Ledger(e.to_string())),
            Err(business) => Ok(VerifyResponse::invalid(business.reason(), None)),
        }
    }

    #[instrument(skip_all)]
    async fn settle(
        &self,
        request: &proto::SettleRequest,
    ) -> Result<SettleResponse, SchemeFacilitatorError> {
        let body: CashuVerifyRequest = request.deserialize_as()?;
        let network = body.payment_requirements.network.clone();

        if let Err(error) = self.assert_valid_proofs(&body).await {
            return match error {
                CashuTokenError::Mint(e) => Err(SchemeFacilitatorError::Ledger(e.to_string())),
                business => Ok(SettleResponse::Error {
                    reason: business.reason(),
                    network,
                    payer: None,
                }),
            };
        }

        let proofs = &body.payment_payload.payload.proofs;
        let payer = proofs_fingerprint(proofs);
        match self.mint.redeem(proofs).await {
            Ok(redemption_id) => {
                tracing::info!(redemption = %redemption_id, "proofs redeemed");
                Ok(SettleResponse::Success {
                    transaction: redemption_id,
                    network,
                    payer,
                })
            }
            Err(CashuMintError::Api(detail)) => Ok(SettleResponse::Error {
                reason: CashuTokenError::RedemptionRefused(detail).reason(),
                network,
                payer: Some(payer),
            }),
            Err(e) => Err(SchemeFacilitatorError::Ledger(e.to_string())),
        }
    }

    async fn supported(&self) -> SupportedResponse {
        SupportedResponse {
            kinds: vec![SupportedPaymentKind {
                x402_version: 2,
                scheme: CashuTokenScheme::VALUE.to_string(),
                network: self.chain_id.clone(),
                extra: None,
            }],
            extensions: Vec::new(),
            signers: HashMap::new(),
        }
    }
}

/// A proof-holding wallet implementing the client face.
pub struct CashuClient {
    proofs: Vec<CashuProof>,
}

impl CashuClient {
    /// Creates a client around a set of spendable proofs.
    pub fn new(proofs: Vec<CashuProof>) -> Self {
        Self { proofs }
    }
}

#[async_trait]
impl SchemeClient for CashuClient {
    async fn create_payment_payload(
        &self,
        requirements: &PaymentRequirements,
    ) -> Result<PaymentPayload, SchemeClientError> {
        let required = requirements
            .parsed_amount()
            .map_err(|e| SchemeClientError::UnsupportedRequirements(e.to_string()))?;

        // Smallest prefix of proofs covering the price.
        let mut selected = Vec::new();
        let mut total: u128 = 0;
        for proof in &self.proofs {
            if total >= required {
                break;
            }
            total += u128::from(proof.amount);
            selected.push(proof.clone());
        }
        if total < required {
            return Err(SchemeClientError::UnsupportedRequirements(
                "wallet does not hold enough proofs".into(),
            ));
        }

        let raw = to_raw_value(&CashuTokenPayload { proofs: selected })
            .map_err(|e| SchemeClientError::Construction(e.to_string()))?;
        Ok(PaymentPayload {
            x402_version: X402Version::V2,
            scheme: requirements.scheme.clone(),
            network: requirements.network.clone(),
            payload: raw,
            accepted: Some(requirements.clone()),
            extensions: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeMint {
        keysets: Vec<String>,
    }

    #[async_trait]
    impl CashuMint for FakeMint {
        async fn active_keysets(&self) -> Result<Vec<String>, CashuMintError> {
            Ok(self.keysets.clone())
        }

        async fn redeem(&self, _proofs: &[CashuProof]) -> Result<String, CashuMintError> {
            Ok("redemption-1".to_string())
        }
    }

    fn proof(amount: u64, id: &str) -> CashuProof {
        CashuProof {
            amount,
            id: id.to_string(),
            secret: format!("secret-{amount}"),
            c: "02deadbeef".to_string(),
        }
    }

    fn requirements() -> PaymentRequirements {
        PaymentRequirements {
            scheme: "cashu-token".to_string(),
            network: ChainId::new("cashu", "mainnet"),
            pay_to: "mint".to_string(),
            asset: "sat".to_string(),
            amount: "96".to_string(),
            max_timeout_seconds: 300,
            description: String::new(),
            mime_type: "application/json".to_string(),
            resource: None,
            output_schema: None,
            extra: None,
        }
    }

    fn facilitator(keysets: &[&str]) -> CashuTokenFacilitator<FakeMint> {
        let config = CashuMintConfig {
            mint_url: "http://localhost:3338/".parse().unwrap(),
            unit: "sat".to_string(),
        };
        CashuTokenFacilitator::new(
            Arc::new(FakeMint {
                keysets: keysets.iter().map(|s| s.to_string()).collect(),
            }),
            &config,
        )
    }

    fn request(requirements: &PaymentRequirements, proofs: Vec<CashuProof>) -> proto::VerifyRequest {
        let payload = PaymentPayload {
            x402_version: X402Version::V2,
            scheme: "cashu-token".to_string(),
            network: requirements.network.clone(),
            payload: serde_json::value::to_raw_value(&CashuTokenPayload { proofs }).unwrap(),
            accepted: Some(requirements.clone()),
            extensions: None,
        };
        let body = serde_json::json!({
            "paymentPayload": payload,
            "paymentRequirements": requirements,
        });
        proto::VerifyRequest::from(serde_json::value::to_raw_value(&body).unwrap())
    }

    #[tokio::test]
    async fn accepts_covering_proofs() {
        let requirements = requirements();
        let facilitator = facilitator(&["ks1"]);
        let proofs = vec![proof(64, "ks1"), proof(32, "ks1")];
        let response = facilitator.verify(&request(&requirements, proofs)).await.unwrap();
        assert!(response.is_valid());
    }

    #[tokio::test]
    async fn rejects_short_proofs() {
        let requirements = requirements();
        let facilitator = facilitator(&["ks1"]);
        let proofs = vec![proof(64, "ks1")];
        let response = facilitator.verify(&request(&requirements, proofs)).await.unwrap();
        match response {
            VerifyResponse::Invalid { reason, .. } => assert_eq!(reason, "amount_mismatch"),
            other => panic!("expected invalid, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejects_retired_keyset() {
        let requirements = requirements();
        let facilitator = facilitator(&["ks2"]);
        let proofs = vec![proof(128, "ks1")];
        let response = facilitator.verify(&request(&requirements, proofs)).await.unwrap();
        match response {
            VerifyResponse::Invalid { reason, .. } => {
                assert_eq!(reason, "invalid_cashu_token_payload_keyset");
            }
            other => panic!("expected invalid, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn settles_by_redeeming() {
        let requirements = requirements();
        let facilitator = facilitator(&["ks1"]);
        let proofs = vec![proof(128, "ks1")];
        let response = facilitator.settle(&request(&requirements, proofs)).await.unwrap();
        match response {
            SettleResponse::Success { transaction, .. } => {
                assert_eq!(transaction, "redemption-1");
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn client_selects_covering_prefix() {
        let client = CashuClient::new(vec![proof(64, "ks1"), proof(32, "ks1"), proof(16, "ks1")]);
        let payment = client.create_payment_payload(&requirements()).await.unwrap();
        let payload: CashuTokenPayload = serde_json::from_str(payment.payload.get()).unwrap();
        assert_eq!(payload.proofs.len(), 2);
    }
}
