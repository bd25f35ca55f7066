//! The 402-paying middleware.

use http::{Extensions, HeaderValue, StatusCode};
use reqwest::{Request, Response};
use reqwest_middleware as rqm;
use std::collections::HashMap;
use std::sync::Arc;
use tollgate_types::chain::ChainId;
use tollgate_types::headers;
use tollgate_types::proto::{ErrorReason, PaymentRequired, PaymentRequirements};
use tollgate_types::scheme::{ClientRegistry, SchemeClientError};
use tracing::instrument;

/// Marker preventing a second paid retry of the same logical request.
#[derive(Clone, Copy)]
struct RetriedWithPayment;

/// What the client prefers to pay with, applied after hard constraints.
#[derive(Debug, Clone, Default)]
pub struct PaymentPreferences {
    /// Networks in preference order.
    pub networks: Vec<ChainId>,
    /// Asset identifiers in preference order.
    pub assets: Vec<String>,
}

impl PaymentPreferences {
    fn rank(&self, requirement: &PaymentRequirements) -> (usize, usize) {
        let network_rank = self
            .networks
            .iter()
            .position(|n| n == &requirement.network)
            .unwrap_or(usize::MAX);
        let asset_rank = self
            .assets
            .iter()
            .position(|a| a == &requirement.asset)
            .unwrap_or(usize::MAX);
        (network_rank, asset_rank)
    }
}

/// A pluggable requirement selector: given the server's offers, return the
/// index to pay, or `None` to fall back to the built-in selection.
pub type Selector = Arc<dyn Fn(&[PaymentRequirements]) -> Option<usize> + Send + Sync>;

/// Errors from the payment flow.
#[derive(Debug, thiserror::Error)]
pub enum X402PaymentsError {
    /// The 402 carried no offer this client can satisfy.
    #[error("no suitable payment method among {count} offered")]
    NoSuitablePaymentMethod {
        /// How many offers the server made.
        count: usize,
    },
    /// The selected offer exceeds the configured budget.
    #[error("offer of {amount} exceeds the configured maximum {max} on {network}")]
    ExceedsMaxValue {
        /// Offered amount in atomic units.
        amount: u128,
        /// Configured ceiling.
        max: u128,
        /// Network of the offer.
        network: ChainId,
    },
    /// The retried request was rejected again.
    #[error("payment rejected: {error}")]
    PaymentRejected {
        /// The server's stable error tag, when it sent one.
        error: String,
    },
    /// Scheme-client failure while building the payload.
    #[error(transparent)]
    Scheme(#[from] SchemeClientError),
    /// The original request body cannot be replayed.
    #[error("request is not cloneable; streaming bodies cannot be retried with payment")]
    RequestNotCloneable,
    /// The payload did not fit in a header.
    #[error("payment header encoding failed: {0}")]
    HeaderEncoding(String),
}

impl From<X402PaymentsError> for rqm::Error {
    fn from(error: X402PaymentsError) -> Self {
        rqm::Error::Middleware(error.into())
    }
}

/// Middleware that answers 402 responses with a signed payment and one
/// retry.
#[derive(Clone)]
pub struct X402Payments {
    clients: Arc<ClientRegistry>,
    max_value: HashMap<ChainId, u128>,
    preferences: PaymentPreferences,
    selector: Option<Selector>,
}

impl X402Payments {
    /// Creates the middleware over a scheme client registry.
    pub fn new(clients: ClientRegistry) -> Self {
        Self {
            clients: Arc::new(clients),
            max_value: HashMap::new(),
            preferences: PaymentPreferences::default(),
            selector: None,
        }
    }

    /// Caps what this client will pay on a network, in atomic units.
    pub fn with_max_value(mut self, network: &str, max: u128) -> Self {
        if let Ok(network) = ChainId::normalize(network) {
            self.max_value.insert(network, max);
        }
        self
    }

    /// Sets network/asset preferences.
    pub fn with_preferences(mut self, preferences: PaymentPreferences) -> Self {
        self.preferences = preferences;
        self
    }

    /// Installs a custom requirement selector.
    pub fn with_selector(mut self, selector: Selector) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Picks the requirement to pay: the user selector when installed,
    /// otherwise the cheapest-ranked offer with a registered client within
    /// budget.
    pub fn select_requirement<'a>(
        &self,
        accepts: &'a [PaymentRequirements],
    ) -> Result<&'a PaymentRequirements, X402PaymentsError> {
        if let Some(selector) = &self.selector {
            if let Some(index) = selector(accepts) {
                if let Some(requirement) = accepts.get(index) {
                    return Ok(requirement);
                }
            }
        }

        let mut candidates: Vec<&PaymentRequirements> = accepts
            .iter()
            .filter(|r| {
                self.clients.lookup(&r.scheme, &r.network).is_some()
                    && self.within_budget(r).is_ok()
            })
            .collect();
        candidates.sort_by_key(|r| self.preferences.rank(r));
        candidates
            .first()
            .copied()
            .ok_or(X402PaymentsError::NoSuitablePaymentMethod {
                count: accepts.len(),
            })
    }

    fn within_budget(&self, requirement: &PaymentRequirements) -> Result<(), X402PaymentsError> {
        let Some(max) = self.max_value.get(&requirement.network) else {
            return Ok(());
        };
        let amount = requirement
            .parsed_amount()
            .map_err(|_| X402PaymentsError::NoSuitablePaymentMethod { count: 1 })?;
        if amount > *max {
            return Err(X402PaymentsError::ExceedsMaxValue {
                amount,
                max: *max,
                network: requirement.network.clone(),
            });
        }
        Ok(())
    }

    /// Builds the payment header for one selected requirement.
    #[instrument(name = "x402.build_payment_header", skip_all, fields(
        scheme = %requirement.scheme,
        network = %requirement.network,
        amount = %requirement.amount,
    ))]
    pub async fn build_payment_header(
        &self,
        requirement: &PaymentRequirements,
    ) -> Result<HeaderValue, X402PaymentsError> {
        self.within_budget(requirement)?;
        let client = self
            .clients
            .lookup(&requirement.scheme, &requirement.network)
            .ok_or(X402PaymentsError::NoSuitablePaymentMethod { count: 1 })?;
        let payload = client.create_payment_payload(requirement).await?;
        let encoded = headers::encode_payment(&payload)
            .map_err(|e| X402PaymentsError::HeaderEncoding(e.to_string()))?;
        HeaderValue::from_str(&encoded)
            .map_err(|e| X402PaymentsError::HeaderEncoding(e.to_string()))
    }

    /// Parses a 402 response's offer: `PAYMENT-REQUIRED` header first,
    /// JSON body as the fallback.
    async fn parse_payment_required(
        response: Response,
    ) -> Result<PaymentRequired, rqm::Error> {
        if let Some(header) = response.headers().get(headers::HEADER_PAYMENT_REQUIRED) {
            if let Ok(required) = headers::decode_payment_required(header.as_bytes()) {
                return Ok(required);
            }
        }
        let required = response
            .json::<PaymentRequired>()
            .await
            .map_err(rqm::Error::Reqwest)?;
        Ok(required)
    }
}

#[async_trait::async_trait]
impl rqm::Middleware for X402Payments {
    #[instrument(name = "x402.pay", skip_all, fields(url = %req.url()))]
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: rqm::Next<'_>,
    ) -> rqm::Result<Response> {
        let retry_req = req.try_clone();

        let response = next.clone().run(req, extensions).await?;
        if response.status() != StatusCode::PAYMENT_REQUIRED {
            return Ok(response);
        }

        let required = Self::parse_payment_required(response).await?;

        // Retry guard: one payment per logical request, ever.
        if extensions.get::<RetriedWithPayment>().is_some() {
            return Err(X402PaymentsError::PaymentRejected {
                error: required.error.unwrap_or_else(|| {
                    ErrorReason::PaymentRejected.into()
                }),
            }
            .into());
        }

        tracing::debug!(offers = required.accepts.len(), "received 402, paying");
        let requirement = self
            .select_requirement(&required.accepts)
            .map_err(Into::<rqm::Error>::into)?;
        let header = self
            .build_payment_header(requirement)
            .await
            .map_err(Into::<rqm::Error>::into)?;

        let mut retry_req = retry_req.ok_or(X402PaymentsError::RequestNotCloneable)?;
        let request_headers = retry_req.headers_mut();
        request_headers.insert(headers::HEADER_PAYMENT, header.clone());
        request_headers.insert(headers::HEADER_PAYMENT_SIGNATURE, header);
        extensions.insert(RetriedWithPayment);

        let retried = next.run(retry_req, extensions).await?;
        if retried.status() == StatusCode::PAYMENT_REQUIRED {
            let rejected = Self::parse_payment_required(retried).await?;
            return Err(X402PaymentsError::PaymentRejected {
                error: rejected
                    .error
                    .unwrap_or_else(|| ErrorReason::PaymentRejected.into()),
            }
            .into());
        }
        Ok(retried)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tollgate_types::chain::ChainIdPattern;
    use tollgate_types::proto::{PaymentPayload, X402Version};
    use tollgate_types::scheme::SchemeClient;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, Request as WireRequest, ResponseTemplate};

    struct StubClient;

    #[async_trait]
    impl SchemeClient for StubClient {
        async fn create_payment_payload(
            &self,
            requirements: &PaymentRequirements,
        ) -> Result<PaymentPayload, SchemeClientError> {
            Ok(PaymentPayload {
                x402_version: X402Version::V2,
                scheme: requirements.scheme.clone(),
                network: requirements.network.clone(),
                payload: serde_json::value::to_raw_value(&serde_json::json!({
                    "signature": "0xstub",
                }))
                .unwrap(),
                accepted: Some(requirements.clone()),
                extensions: None,
            })
        }
    }

    fn requirement(amount: &str, network: ChainId) -> PaymentRequirements {
        PaymentRequirements {
            scheme: "exact".to_string(),
            network,
            pay_to: "0xBAc675C310721717Cd4A37F6cbeA1F081b1C2a07".to_string(),
            asset: "0x036CbD53842c5426634e7929541eC2318f3dCF7e".to_string(),
            amount: amount.to_string(),
            max_timeout_seconds: 300,
            description: String::new(),
            mime_type: "application/json".to_string(),
            resource: None,
            output_schema: None,
            extra: None,
        }
    }

    fn payments() -> X402Payments {
        let mut clients = ClientRegistry::new();
        clients
            .register(
                "exact",
                ChainIdPattern::wildcard("eip155"),
                Arc::new(StubClient),
            )
            .unwrap();
        X402Payments::new(clients)
    }

    fn payment_required_body(accepts: Vec<PaymentRequirements>, error: Option<&str>) -> serde_json::Value {
        serde_json::to_value(PaymentRequired {
            x402_version: X402Version::V2,
            accepts,
            error: error.map(str::to_string),
            resource: None,
            extensions: None,
        })
        .unwrap()
    }

    fn client(payments: X402Payments) -> rqm::ClientWithMiddleware {
        rqm::ClientBuilder::new(reqwest::Client::new())
            .with(payments)
            .build()
    }

    #[test]
    fn selection_prefers_registered_clients() {
        let payments = payments();
        let accepts = vec![
            requirement("1000", ChainId::new("solana", "devnet-ish")),
            requirement("1000", ChainId::new("eip155", "84532")),
        ];
        let selected = payments.select_requirement(&accepts).unwrap();
        assert_eq!(selected.network, ChainId::new("eip155", "84532"));
    }

    #[test]
    fn selection_honors_preferences() {
        let payments = payments().with_preferences(PaymentPreferences {
            networks: vec![ChainId::new("eip155", "8453")],
            assets: vec![],
        });
        let accepts = vec![
            requirement("1000", ChainId::new("eip155", "84532")),
            requirement("1000", ChainId::new("eip155", "8453")),
        ];
        let selected = payments.select_requirement(&accepts).unwrap();
        assert_eq!(selected.network, ChainId::new("eip155", "8453"));
    }

    #[test]
    fn budget_excludes_expensive_offers() {
        let payments = payments().with_max_value("eip155:84532", 500);
        let accepts = vec![requirement("1000", ChainId::new("eip155", "84532"))];
        assert!(matches!(
            payments.select_requirement(&accepts),
            Err(X402PaymentsError::NoSuitablePaymentMethod { .. })
        ));
    }

    #[tokio::test]
    async fn non_402_passes_through() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/free"))
            .respond_with(ResponseTemplate::new(200).set_body_string("gratis"))
            .mount(&server)
            .await;

        let response = client(payments())
            .get(format!("{}/free", server.uri()))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn pays_a_402_and_retries_once() {
        let server = MockServer::start().await;
        let accepts = vec![requirement("1000", ChainId::new("eip155", "84532"))];

        // Unpaid requests get a 402; paid ones get the goods.
        Mock::given(method("GET"))
            .and(path("/paid"))
            .and(header_exists("x-payment"))
            .respond_with(ResponseTemplate::new(200).set_body_string("the goods"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/paid"))
            .respond_with(
                ResponseTemplate::new(402).set_body_json(payment_required_body(accepts, None)),
            )
            .mount(&server)
            .await;

        let response = client(payments())
            .get(format!("{}/paid", server.uri()))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "the goods");

        // Exactly two upstream requests: the probe and the paid retry.
        let received = server.received_requests().await.unwrap();
        assert_eq!(received.len(), 2);
        let paid: &WireRequest = &received[1];
        assert!(paid.headers.get("x-payment").is_some());
    }

    #[tokio::test]
    async fn second_402_is_payment_rejected_not_a_loop() {
        let server = MockServer::start().await;
        let accepts = vec![requirement("1000", ChainId::new("eip155", "84532"))];
        Mock::given(method("GET"))
            .and(path("/always402"))
            .respond_with(ResponseTemplate::new(402).set_body_json(payment_required_body(
                accepts,
                Some("insufficient_funds"),
            )))
            .mount(&server)
            .await;

        let error = client(payments())
            .get(format!("{}/always402", server.uri()))
            .send()
            .await
            .unwrap_err();
        assert!(error.to_string().contains("payment rejected"));
        assert!(error.to_string().contains("insufficient_funds"));

        // The guard capped us at two upstream requests.
        let received = server.received_requests().await.unwrap();
        assert_eq!(received.len(), 2);
    }

    #[tokio::test]
    async fn unpayable_offer_fails_without_retry() {
        let server = MockServer::start().await;
        let accepts = vec![requirement("1000", ChainId::new("solana", "nope"))];
        Mock::given(method("GET"))
            .and(path("/solana-only"))
            .respond_with(
                ResponseTemplate::new(402).set_body_json(payment_required_body(accepts, None)),
            )
            .mount(&server)
            .await;

        let error = client(payments())
            .get(format!("{}/solana-only", server.uri()))
            .send()
            .await
            .unwrap_err();
        assert!(error.to_string().contains("no suitable payment method"));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }
}
