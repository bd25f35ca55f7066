//! Facilitator face of the Lightning "exact" scheme.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use tollgate_types::chain::ChainId;
use tollgate_types::lit_str;
use tollgate_types::proto::{
    self, ErrorReason, PaymentVerificationError, SettleResponse, SupportedPaymentKind,
    SupportedResponse, VerifyRequestBody, VerifyResponse,
};
use tollgate_types::scheme::{SchemeFacilitator, SchemeFacilitatorError};
use tracing::instrument;

use crate::lnd::{LndConfig, LndError, LndRestClient};

lit_str!(ExactScheme, "exact");

/// Seconds of validity an invoice must have left at verification.
const EXPIRY_BUFFER_SECS: u64 = 30;

/// The scheme payload: an invoice the payer settles out of band.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LightningExactPayload {
    /// The BOLT11 payment request.
    pub bolt11: String,
    /// An optional seller-side invoice correlation id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_id: Option<String>,
}

type LightningVerifyRequest = VerifyRequestBody<LightningExactPayload>;

/// Per-scheme closed set of verification failures.
#[derive(Debug, thiserror::Error)]
pub enum LightningExactError {
    /// Cross-scheme structural failure.
    #[error(transparent)]
    Verification(#[from] PaymentVerificationError),
    /// The payload network is not this node's network.
    #[error("payment network does not match this facilitator's network")]
    WrongChain,
    /// The invoice could not be decoded.
    #[error("invoice could not be decoded: {0}")]
    Decoding(String),
    /// The invoice amount is below the required satoshis.
    #[error("invoice amount is below the required amount")]
    AmountMismatch,
    /// The invoice expired or expires within the buffer.
    #[error("invoice is expired or expires too soon")]
    Expired,
    /// The invoice has not been settled (or was underpaid).
    #[error("invoice is not settled for the required amount")]
    NotSettled,
    /// Node failure; not a business rejection.
    #[error(transparent)]
    Lnd(LndError),
}

impl LightningExactError {
    /// The stable wire tag for this failure.
    pub fn reason(&self) -> String {
        match self {
            LightningExactError::Verification(e) => e.reason().into(),
            LightningExactError::WrongChain => ErrorReason::InvalidNetwork.into(),
            LightningExactError::Decoding(_) => "invalid_exact_lightning_payload_invoice".into(),
            LightningExactError::AmountMismatch => ErrorReason::AmountMismatch.into(),
            LightningExactError::Expired => ErrorReason::PaymentExpired.into(),
            LightningExactError::NotSettled => ErrorReason::InvalidTransactionState.into(),
            LightningExactError::Lnd(_) => ErrorReason::UnexpectedVerifyError.into(),
        }
    }
}

/// Facilitator for the Lightning "exact" scheme over one LND node.
pub struct LightningExactFacilitator {
    lnd: Arc<LndRestClient>,
    chain_id: ChainId,
}

impl LightningExactFacilitator {
    /// Creates a facilitator over an LND client.
    pub fn new(lnd: Arc<LndRestClient>, config: &LndConfig) -> Self {
        Self {
            lnd,
            chain_id: config.chain_id(),
        }
    }

    #[instrument(skip_all, err)]
    async fn assert_valid_invoice(
        &self,
        body: &LightningVerifyRequest,
    ) -> Result<String, LightningExactError> {
        let requirements = &body.payment_requirements;
        body.payment_payload.ensure_matches(requirements)?;
        if requirements.network != self.chain_id {
            return Err(LightningExactError::WrongChain);
        }

        let decoded = self
            .lnd
            .decode_pay_req(&body.payment_payload.payload.bolt11)
            .await
            .map_err(|e| match e {
                LndError::Api(detail) => LightningExactError::Decoding(detail),
                other => LightningExactError::Lnd(other),
            })?;

        let required = requirements.parsed_amount()?;
        let sats: u128 = decoded
            .num_satoshis
            .parse()
            .map_err(|_| LightningExactError::Decoding("num_satoshis".into()))?;
        if sats < required {
            return Err(LightningExactError::AmountMismatch);
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("SystemTime before UNIX epoch?!?")
            .as_secs();
        let timestamp: u64 = decoded.timestamp.parse().unwrap_or(0);
        let expiry: u64 = decoded.expiry.parse().unwrap_or(3600);
        if timestamp + expiry < now + EXPIRY_BUFFER_SECS {
            return Err(LightningExactError::Expired);
        }

        Ok(decoded.payment_hash)
    }
}

#[async_trait]
impl SchemeFacilitator for LightningExactFacilitator {
    #[instrument(skip_all, fields(chain = %self.chain_id))]
    async fn verify(
        &self,
        request: &proto::VerifyRequest,
    ) -> Result<VerifyResponse, SchemeFacilitatorError> {
        let body: LightningVerifyRequest = request.deserialize_as()?;
        match self.assert_valid_invoice(&body).await {
            // Lightning payers have no on-ledger identity; the payment
            // hash stands in.
            Ok(payment_hash) => Ok(VerifyResponse::valid(payment_hash)),
            Err(LightningExactError::Lnd(e)) => {
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
        let body: LightningVerifyRequest = request.deserialize_as()?;
        let network = body.payment_requirements.network.clone();

        let payment_hash = match self.assert_valid_invoice(&body).await {
            Ok(payment_hash) => payment_hash,
            Err(LightningExactError::Lnd(e)) => {
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

        let invoice = self
            .lnd
            .lookup_invoice(&payment_hash)
            .await
            .map_err(|e| SchemeFacilitatorError::Ledger(e.to_string()))?;
        let required = body
            .payment_requirements
            .parsed_amount()
            .map_err(SchemeFacilitatorError::Verification)?;
        let paid: u128 = invoice.amt_paid_sat.parse().unwrap_or(0);

        if invoice.settled && paid >= required {
            tracing::info!(payment_hash = %payment_hash, paid, "invoice settled");
            Ok(SettleResponse::Success {
                transaction: payment_hash.clone(),
                network,
                payer: payment_hash,
            })
        } else {
            Ok(SettleResponse::Error {
                reason: LightningExactError::NotSettled.reason(),
                network,
                payer: Some(payment_hash),
            })
        }
    }

    async fn supported(&self) -> SupportedResponse {
        SupportedResponse {
            kinds: vec![SupportedPaymentKind {
                x402_version: 2,
                scheme: ExactScheme::VALUE.to_string(),
                network: self.chain_id.clone(),
                extra: None,
            }],
            extensions: Vec::new(),
            signers: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_types::proto::{PaymentPayload, PaymentRequirements, X402Version};
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn requirements() -> PaymentRequirements {
        PaymentRequirements {
            scheme: "exact".to_string(),
            network: ChainId::new("lightning", "signet"),
            pay_to: "tollgate-node".to_string(),
            asset: "sat".to_string(),
            amount: "1000".to_string(),
            max_timeout_seconds: 300,
            description: String::new(),
            mime_type: "application/json".to_string(),
            resource: None,
            output_schema: None,
            extra: None,
        }
    }

    fn request(requirements: &PaymentRequirements) -> proto::VerifyRequest {
        let payload = PaymentPayload {
            x402_version: X402Version::V2,
            scheme: "exact".to_string(),
            network: requirements.network.clone(),
            payload: serde_json::value::to_raw_value(&LightningExactPayload {
                bolt11: "lntbs10u1pexample".to_string(),
                invoice_id: None,
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

    async fn facilitator(server: &MockServer) -> LightningExactFacilitator {
        let config = LndConfig {
            network: "signet".to_string(),
            rest_url: server.uri().parse().unwrap(),
            macaroon_hex: "0201".to_string(),
        };
        LightningExactFacilitator::new(Arc::new(LndRestClient::new(&config)), &config)
    }

    fn now_secs() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    #[tokio::test]
    async fn verifies_and_settles_a_paid_invoice() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/v1/payreq/.*$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "num_satoshis": "1000",
                "payment_hash": "ab".repeat(32),
                "timestamp": now_secs().to_string(),
                "expiry": "3600",
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/v1/invoice/.*$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "settled": true,
                "amt_paid_sat": "1000",
            })))
            .mount(&server)
            .await;

        let requirements = requirements();
        let facilitator = facilitator(&server).await;

        let verified = facilitator.verify(&request(&requirements)).await.unwrap();
        assert!(verified.is_valid());

        let settled = facilitator.settle(&request(&requirements)).await.unwrap();
        match settled {
            SettleResponse::Success { transaction, .. } => {
                assert_eq!(transaction, "ab".repeat(32));
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejects_underfunded_invoice() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/v1/payreq/.*$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "num_satoshis": "500",
                "payment_hash": "ab".repeat(32),
                "timestamp": now_secs().to_string(),
                "expiry": "3600",
            })))
            .mount(&server)
            .await;

        let requirements = requirements();
        let facilitator = facilitator(&server).await;
        let verified = facilitator.verify(&request(&requirements)).await.unwrap();
        match verified {
            VerifyResponse::Invalid { reason, .. } => assert_eq!(reason, "amount_mismatch"),
            other => panic!("expected invalid, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unsettled_invoice_fails_settlement() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/v1/payreq/.*$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "num_satoshis": "1000",
                "payment_hash": "cd".repeat(32),
                "timestamp": now_secs().to_string(),
                "expiry": "3600",
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/v1/invoice/.*$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "settled": false,
                "amt_paid_sat": "0",
            })))
            .mount(&server)
            .await;

        let requirements = requirements();
        let facilitator = facilitator(&server).await;
        let settled = facilitator.settle(&request(&requirements)).await.unwrap();
        match settled {
            SettleResponse::Error { reason, .. } => {
                assert_eq!(reason, "invalid_transaction_state");
            }
            other => panic!("expected error, got {other:?}"),
        }
    }
}
