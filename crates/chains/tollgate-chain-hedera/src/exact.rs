//! Facilitator and server faces of the Hedera "exact" scheme.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tollgate_types::chain::ChainId;
use tollgate_types::price::{AssetAmount, Price, PriceError, resolve_price};
use tollgate_types::proto::error::transaction_failed;
use tollgate_types::proto::{
    self, ErrorReason, PaymentVerificationError, SettleResponse, SupportedPaymentKind,
    SupportedResponse, VerifyRequestBody, VerifyResponse,
};
use tollgate_types::scheme::{SchemeFacilitator, SchemeFacilitatorError, SchemeServer};
use tollgate_types::util::Base64Bytes;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use tollgate_types::lit_str;
use tracing::instrument;

use crate::gateway::{HederaGateway, HederaGatewayConfig, HederaGatewayError, TransferSummary};

lit_str!(ExactScheme, "exact");

/// The scheme payload: a base64, fully signed Hedera transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HederaExactPayload {
    /// The serialized signed transaction.
    pub transaction: String,
}

type HederaExactVerifyRequest = VerifyRequestBody<HederaExactPayload>;

/// Per-scheme closed set of verification failures.
#[derive(Debug, thiserror::Error)]
pub enum HederaExactError {
    /// Cross-scheme structural failure.
    #[error(transparent)]
    Verification(#[from] PaymentVerificationError),
    /// The payload network is not the gateway's network.
    #[error("payment network does not match this facilitator's network")]
    WrongChain,
    /// The transaction could not be decoded.
    #[error("transaction could not be decoded: {0}")]
    Decoding(String),
    /// The transaction's fee payer is not the facilitator's operator.
    #[error("fee payer is not the facilitator's operator account")]
    FeePayerNotManaged,
    /// The transfer does not credit payTo the exact amount.
    #[error("transfer does not credit payTo the required amount")]
    RecipientMismatch,
    /// The transfer moves the wrong asset.
    #[error("transfer asset does not match the required asset")]
    AssetMismatch,
    /// No debit matches the credited amount.
    #[error("transfer does not debit the payer the required amount")]
    AmountMismatch,
    /// Gateway failure; not a business rejection.
    #[error(transparent)]
    Gateway(HederaGatewayError),
}

impl HederaExactError {
    /// The stable wire tag for this failure.
    pub fn reason(&self) -> String {
        match self {
            HederaExactError::Verification(e) => e.reason().into(),
            HederaExactError::WrongChain => ErrorReason::InvalidNetwork.into(),
            HederaExactError::Decoding(_) => "invalid_exact_hedera_payload_transaction".into(),
            HederaExactError::FeePayerNotManaged => {
                ErrorReason::FeePayerNotManagedByFacilitator.into()
            }
            HederaExactError::RecipientMismatch => {
                "invalid_exact_hedera_payload_recipient_mismatch".into()
            }
            HederaExactError::AssetMismatch => ErrorReason::AssetMismatch.into(),
            HederaExactError::AmountMismatch => ErrorReason::AmountMismatch.into(),
            HederaExactError::Gateway(_) => ErrorReason::UnexpectedVerifyError.into(),
        }
    }
}

/// Facilitator for the Hedera "exact" scheme on one network.
pub struct HederaExactFacilitator<G = crate::gateway::RestHederaGateway> {
    gateway: Arc<G>,
    chain_id: ChainId,
    operator_account: String,
}

impl<G> HederaExactFacilitator<G> {
    /// Creates a facilitator over a gateway.
    pub fn new(gateway: Arc<G>, config: &HederaGatewayConfig) -> Self {
        Self {
            gateway,
            chain_id: config.chain_id(),
            operator_account: config.operator_account.clone(),
        }
    }
}

impl<G: HederaGateway> HederaExactFacilitator<G> {
    #[instrument(skip_all, err)]
    async fn assert_valid_payment(
        &self,
        body: &HederaExactVerifyRequest,
    ) -> Result<(String, Vec<u8>, TransferSummary), HederaExactError> {
        let requirements = &body.payment_requirements;
        body.payment_payload.ensure_matches(requirements)?;
        if requirements.network != self.chain_id {
            return Err(HederaExactError::WrongChain);
        }

        let bytes = Base64Bytes::from(body.payment_payload.payload.transaction.as_bytes())
            .decode()
            .map_err(|e| HederaExactError::Decoding(e.to_string()))?;
        let summary = self.gateway.decode_transfer(&bytes).await.map_err(|e| match e {
            HederaGatewayError::Undecodable(detail) => HederaExactError::Decoding(detail),
            other => HederaExactError::Gateway(other),
        })?;

        if summary.fee_payer != self.operator_account {
            return Err(HederaExactError::FeePayerNotManaged);
        }

        let required = requirements.parsed_amount()? as i128;
        let credited = summary
            .movements
            .iter()
            .find(|m| {
                m.account == requirements.pay_to && m.token == requirements.asset && m.amount > 0
            })
            .ok_or(HederaExactError::RecipientMismatch)?;
        if credited.amount != required {
            return Err(HederaExactError::AmountMismatch);
        }

        let debit = summary
            .movements
            .iter()
            .find(|m| m.token == requirements.asset && m.amount == -required)
            .ok_or(HederaExactError::AmountMismatch)?;
        if summary
            .movements
            .iter()
            .any(|m| m.token != requirements.asset)
        {
            return Err(HederaExactError::AssetMismatch);
        }

        Ok((debit.account.clone(), bytes, summary))
    }
}

#[async_trait]
impl<G: HederaGateway> SchemeFacilitator for HederaExactFacilitator<G> {
    #[instrument(skip_all, fields(chain = %self.chain_id))]
    async fn verify(
        &self,
        request: &proto::VerifyRequest,
    ) -> Result<VerifyResponse, SchemeFacilitatorError> {
        let body: HederaExactVerifyRequest = request.deserialize_as()?;
        match self.assert_valid_payment(&body).await {
            Ok((payer, _, _)) => Ok(VerifyResponse::valid(payer)),
            Err(HederaExactError::Gateway(e)) => {
                Err(SchemeFacilitatorError::Ledger(e.to_string()))
            }
            Err(business) => Ok(VerifyResponse::invalid(business.reason(), None)),
        }
    }

    #[instrument(skip_all, fields(chain = %self.chain_id))]
    async fn settle(
        &self,
        request: &proto::SettleRequest,
    ) -> Result<SettleResponse, SchemeFacilitatorError> {
        let body: HederaExactVerifyRequest = request.deserialize_as()?;
        let network = body.payment_requirements.network.clone();

        let (payer, bytes, _) = match self.assert_valid_payment(&body).await {
            Ok(verified) => verified,
            Err(HederaExactError::Gateway(e)) => {
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

        let transaction_id = self
            .gateway
            .submit(&bytes)
            .await
            .map_err(|e| SchemeFacilitatorError::Ledger(e.to_string()))?;
        let success = self
            .gateway
            .receipt(&transaction_id)
            .await
            .map_err(|e| SchemeFacilitatorError::Ledger(e.to_string()))?;

        if success {
            tracing::info!(tx = %transaction_id, "transfer reached consensus");
            Ok(SettleResponse::Success {
                transaction: transaction_id,
                network,
                payer,
            })
        } else {
            tracing::warn!(tx = %transaction_id, "transfer failed at consensus");
            Ok(SettleResponse::Error {
                reason: transaction_failed("receipt status is not SUCCESS"),
                network,
                payer: Some(payer),
            })
        }
    }

    async fn supported(&self) -> SupportedResponse {
        let mut signers = HashMap::with_capacity(1);
        signers.insert(self.chain_id.clone(), vec![self.operator_account.clone()]);
        SupportedResponse {
            kinds: vec![SupportedPaymentKind {
                x402_version: 2,
                scheme: ExactScheme::VALUE.to_string(),
                network: self.chain_id.clone(),
                extra: Some(serde_json::json!({ "feePayer": self.operator_account })),
            }],
            extensions: Vec::new(),
            signers,
        }
    }

    async fn extra(&self, network: &ChainId) -> Option<serde_json::Value> {
        if network != &self.chain_id {
            return None;
        }
        Some(serde_json::json!({ "feePayer": self.operator_account }))
    }
}

/// Prices routes for the Hedera "exact" scheme. Routes declare explicit
/// asset amounts (tinybars or token units).
pub struct HederaExactServer;

impl SchemeServer for HederaExactServer {
    fn scheme(&self) -> &'static str {
        ExactScheme::VALUE
    }

    fn parse_price(&self, price: &Price, network: &ChainId) -> Result<AssetAmount, PriceError> {
        resolve_price(price, network, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{HBAR_ASSET, LedgerMovement};
    use tollgate_types::proto::{PaymentPayload, PaymentRequirements, X402Version};

    struct FakeGateway {
        summary: TransferSummary,
    }

    #[async_trait]
    impl HederaGateway for FakeGateway {
        async fn decode_transfer(
            &self,
            _bytes: &[u8],
        ) -> Result<TransferSummary, HederaGatewayError> {
            Ok(self.summary.clone())
        }

        async fn submit(&self, _bytes: &[u8]) -> Result<String, HederaGatewayError> {
            Ok(self.summary.transaction_id.clone())
        }

        async fn receipt(&self, _transaction_id: &str) -> Result<bool, HederaGatewayError> {
            Ok(true)
        }
    }

    fn requirements() -> PaymentRequirements {
        PaymentRequirements {
            scheme: "exact".to_string(),
            network: ChainId::new("hedera", "testnet"),
            pay_to: "0.0.5005".to_string(),
            asset: HBAR_ASSET.to_string(),
            amount: "100000000".to_string(),
            max_timeout_seconds: 300,
            description: String::new(),
            mime_type: "application/json".to_string(),
            resource: None,
            output_schema: None,
            extra: None,
        }
    }

    fn facilitator(summary: TransferSummary) -> HederaExactFacilitator<FakeGateway> {
        let config = HederaGatewayConfig {
            network: "testnet".to_string(),
            gateway_url: "http://localhost:7546/".parse().unwrap(),
            operator_account: "0.0.900".to_string(),
        };
        HederaExactFacilitator::new(Arc::new(FakeGateway { summary }), &config)
    }

    fn request(requirements: &PaymentRequirements) -> proto::VerifyRequest {
        let payload = PaymentPayload {
            x402_version: X402Version::V2,
            scheme: "exact".to_string(),
            network: requirements.network.clone(),
            payload: serde_json::value::to_raw_value(&HederaExactPayload {
                transaction: "AAAA".to_string(),
            })
            .unwrap(),
            accepted: Some(requirements.clone()),
            extensions: None,
        };
        let body = serde_json::json!({
            "paymentPayload": payload,
            "paymentRequirements": requirements,
        });
        proto::VerifyRequest::from(serde_json::value::to_raw_value(&body).unwrap())
    }

    fn summary(fee_payer: &str, credit: i128) -> TransferSummary {
        TransferSummary {
            fee_payer: fee_payer.to_string(),
            movements: vec![
                LedgerMovement {
                    account: "0.0.1234".to_string(),
                    amount: -credit,
                    token: HBAR_ASSET.to_string(),
                },
                LedgerMovement {
                    account: "0.0.5005".to_string(),
                    amount: credit,
                    token: HBAR_ASSET.to_string(),
                },
            ],
            transaction_id: "0.0.1234@1700000000.000000001".to_string(),
        }
    }

    #[tokio::test]
    async fn accepts_exact_transfer_with_operator_fee_payer() {
        let requirements = requirements();
        let facilitator = facilitator(summary("0.0.900", 100_000_000));
        let response = facilitator.verify(&request(&requirements)).await.unwrap();
        assert!(response.is_valid());
        assert_eq!(response.payer(), Some("0.0.1234"));
    }

    #[tokio::test]
    async fn rejects_foreign_fee_payer() {
        let requirements = requirements();
        let facilitator = facilitator(summary("0.0.666", 100_000_000));
        let response = facilitator.verify(&request(&requirements)).await.unwrap();
        match response {
            VerifyResponse::Invalid { reason, .. } => {
                assert_eq!(reason, "fee_payer_not_managed_by_facilitator");
            }
            _ => panic!("expected invalid"),
        }
    }

    #[tokio::test]
    async fn rejects_wrong_amount() {
        let requirements = requirements();
        let facilitator = facilitator(summary("0.0.900", 50_000_000));
        let response = facilitator.verify(&request(&requirements)).await.unwrap();
        match response {
            VerifyResponse::Invalid { reason, .. } => assert_eq!(reason, "amount_mismatch"),
            _ => panic!("expected invalid"),
        }
    }

    #[tokio::test]
    async fn settles_through_the_gateway() {
        let requirements = requirements();
        let facilitator = facilitator(summary("0.0.900", 100_000_000));
        let response = facilitator.settle(&request(&requirements)).await.unwrap();
        match response {
            SettleResponse::Success { transaction, payer, .. } => {
                assert_eq!(transaction, "0.0.1234@1700000000.000000001");
                assert_eq!(payer, "0.0.1234");
            }
            _ => panic!("expected success"),
        }
    }
}
