//! The payment-gating tower layer.

use axum_core::body::Body;
use axum_core::extract::Request;
use axum_core::response::{IntoResponse, Response};
use http::{HeaderMap, HeaderValue, StatusCode};
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service, ServiceExt};
use tracing::instrument;
use url::Url;

use tollgate_types::extensions::{ExtensionStack, RouteContext, StackOutcome};
use tollgate_types::facilitator::Facilitator;
use tollgate_types::headers;
use tollgate_types::proto::{
    ErrorReason, PaymentPayload, PaymentRequired, PaymentRequirements, SettleResponse,
    VerifyRequest, VerifyRequestBody, VerifyResponse, X402Version,
};
use tollgate_types::routes::RouteSet;
use tollgate_types::scheme::ServerRegistry;

use crate::paywall;
use crate::requirements::{build_requirements, find_matching};

/// Middleware that enforces x402 payment on the routes of a
/// [`RouteSet`]. Everything else passes through untouched.
pub struct X402Middleware<F> {
    facilitator: Arc<F>,
    routes: Arc<RouteSet>,
    servers: Arc<ServerRegistry>,
    extensions: ExtensionStack,
    base_url: Option<Url>,
    paywall_enabled: bool,
}

impl<F> Clone for X402Middleware<F> {
    fn clone(&self) -> Self {
        Self {
            facilitator: Arc::clone(&self.facilitator),
            routes: Arc::clone(&self.routes),
            servers: Arc::clone(&self.servers),
            extensions: self.extensions.clone(),
            base_url: self.base_url.clone(),
            paywall_enabled: self.paywall_enabled,
        }
    }
}

impl<F> X402Middleware<F> {
    /// Creates a middleware over a facilitator. No routes are protected
    /// until [`with_routes`](Self::with_routes) is called.
    pub fn new(facilitator: F) -> Self {
        Self {
            facilitator: Arc::new(facilitator),
            routes: Arc::new(RouteSet::default()),
            servers: Arc::new(ServerRegistry::new()),
            extensions: ExtensionStack::new(),
            base_url: None,
            paywall_enabled: true,
        }
    }

    /// Sets the protected route table.
    pub fn with_routes(mut self, routes: RouteSet) -> Self {
        self.routes = Arc::new(routes);
        self
    }

    /// Sets the scheme server registry used for price parsing and
    /// requirement enrichment.
    pub fn with_server_registry(mut self, servers: ServerRegistry) -> Self {
        self.servers = Arc::new(servers);
        self
    }

    /// Attaches the extension stack.
    pub fn with_extensions(mut self, extensions: ExtensionStack) -> Self {
        self.extensions = extensions;
        self
    }

    /// Sets the base URL used to build each offer's `resource` field.
    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = Some(base_url);
        self
    }

    /// Disables the HTML paywall; browsers get JSON like everyone else.
    pub fn without_paywall(mut self) -> Self {
        self.paywall_enabled = false;
        self
    }
}

impl<S, F> Layer<S> for X402Middleware<F>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    F: Facilitator + Send + Sync + 'static,
{
    type Service = X402MiddlewareService<F>;

    fn layer(&self, inner: S) -> Self::Service {
        X402MiddlewareService {
            middleware: self.clone(),
            inner: BoxCloneSyncService::new(inner),
        }
    }
}

/// The wrapped service.
pub struct X402MiddlewareService<F> {
    middleware: X402Middleware<F>,
    inner: BoxCloneSyncService<Request, Response, Infallible>,
}

impl<F> Clone for X402MiddlewareService<F> {
    fn clone(&self) -> Self {
        Self {
            middleware: self.middleware.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<F> Service<Request> for X402MiddlewareService<F>
where
    F: Facilitator + Send + Sync + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let middleware = self.middleware.clone();
        let inner = self.inner.clone();
        Box::pin(async move { Ok(middleware.handle_request(inner, req).await) })
    }
}

impl<F> X402Middleware<F>
where
    F: Facilitator + Send + Sync + 'static,
{
    /// Runs the full pipeline for one request.
    #[instrument(name = "x402.handle_request", skip_all, fields(path = %req.uri().path()))]
    async fn handle_request(
        &self,
        inner: BoxCloneSyncService<Request, Response, Infallible>,
        req: Request,
    ) -> Response {
        let path = req.uri().path().to_string();
        let method = req.method().as_str().to_string();
        let request_headers = req.headers().clone();

        // 1. Route lookup. A miss is none of our business.
        let Some(pattern) = self.routes.matches(&path, &method) else {
            return match inner.oneshot(req).await {
                Ok(response) => response,
                Err(never) => match never {},
            };
        };
        let config = pattern.config.clone();

        // 2. Route-matched hooks.
        let route_context = RouteContext {
            path: &path,
            method: &method,
            config: &config,
        };
        if let StackOutcome::Abort {
            extension,
            reason,
            detail,
        } = self.extensions.route_matched(route_context).await
        {
            return self
                .payment_required(vec![], Some(reason), detail.map(|d| (extension, d)), req.headers())
                .await;
        }

        // 3. Accepted requirements, enriched from the facilitator's
        // supported listing (cached by the client).
        let supported = match self.facilitator.supported().await {
            Ok(supported) => supported,
            Err(error) => {
                tracing::error!(error = %error, "facilitator supported listing unavailable");
                Default::default()
            }
        };
        let resource = self.base_url.as_ref().and_then(|base| base.join(&path).ok());
        let accepts = build_requirements(&config, resource, &self.servers, &supported);

        // 4. Payment header.
        let header = req
            .headers()
            .get(headers::HEADER_PAYMENT)
            .or_else(|| req.headers().get(headers::HEADER_PAYMENT_SIGNATURE))
            .map(|v| v.as_bytes().to_vec());
        let Some(header) = header else {
            return self.payment_required(accepts, None, None, req.headers()).await;
        };

        // 5. Decode, normalizing network aliases.
        let mut payload = match headers::decode_payment(&header) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::debug!(error = %error, "payment header failed to decode");
                return self
                    .payment_required(
                        accepts,
                        Some(ErrorReason::InvalidPayload.into()),
                        None,
                        req.headers(),
                    )
                    .await;
            }
        };

        // 6. The single matching requirement.
        let Some(matched) =
            find_matching(&accepts, &payload.scheme, &payload.network).cloned()
        else {
            return self
                .payment_required(
                    accepts,
                    Some(ErrorReason::Unmatched.into()),
                    None,
                    req.headers(),
                )
                .await;
        };

        // 7. Verify. A pre-verify recovery substitutes the requirements
        // under verification (negotiated pricing lands here).
        let matched = match self.extensions.before_verify(&payload, &matched).await {
            StackOutcome::Abort {
                extension,
                reason,
                detail,
            } => {
                return self
                    .payment_required(
                        accepts,
                        Some(reason),
                        detail.map(|d| (extension, d)),
                        req.headers(),
                    )
                    .await;
            }
            StackOutcome::Recover(result) => {
                match serde_json::from_value::<PaymentRequirements>(result) {
                    Ok(substituted) => {
                        // The buyer proposed these terms; its accepted echo
                        // follows the substitution or every v2 scheme
                        // rejects the mismatch.
                        if payload.accepted.is_some() {
                            payload.accepted = Some(substituted.clone());
                        }
                        substituted
                    }
                    Err(_) => matched,
                }
            }
            StackOutcome::Continue => matched,
        };
        let verify_request = match build_verify_request(&payload, &matched) {
            Ok(request) => request,
            Err(response) => return response,
        };
        let verify_response = match self.facilitator.verify(&verify_request).await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(error = %error, "facilitator verify transport failure");
                return self
                    .payment_required(
                        accepts,
                        Some(ErrorReason::UnexpectedVerifyError.into()),
                        None,
                        req.headers(),
                    )
                    .await;
            }
        };
        let verify_response = match self
            .extensions
            .after_verify(&payload, &matched, &verify_response)
            .await
        {
            StackOutcome::Abort {
                extension,
                reason,
                detail,
            } => {
                return self
                    .payment_required(
                        accepts,
                        Some(reason),
                        detail.map(|d| (extension, d)),
                        req.headers(),
                    )
                    .await;
            }
            StackOutcome::Recover(result) => serde_json::from_value(result)
                .unwrap_or(verify_response),
            StackOutcome::Continue => verify_response,
        };
        if let VerifyResponse::Invalid { reason, .. } = &verify_response {
            return self
                .payment_required(accepts, Some(reason.clone()), None, req.headers())
                .await;
        }

        // 8. Pre-execution hooks.
        if let StackOutcome::Abort {
            extension,
            reason,
            detail,
        } = self.extensions.before_execution(&payload, &matched).await
        {
            return self
                .payment_required(
                    accepts,
                    Some(reason),
                    detail.map(|d| (extension, d)),
                    req.headers(),
                )
                .await;
        }

        if config.settle_first {
            // Streaming mode: settle up front, then hand over to the
            // handler without buffering.
            let settlement = match self.settle(&payload, &matched, &accepts, req.headers()).await {
                Ok(settlement) => settlement,
                Err(response) => return response,
            };
            let mut response = match inner.oneshot(req).await {
                Ok(response) => response,
                Err(never) => match never {},
            };
            self.attach_receipt(&mut response, &settlement).await;
            return response;
        }

        // 9. The protected handler, buffered. Its errors skip settlement.
        let response = match inner.oneshot(req).await {
            Ok(response) => response,
            Err(never) => match never {},
        };
        if response.status().is_client_error() || response.status().is_server_error() {
            return response;
        }
        let (parts, body) = response.into_parts();
        let body_bytes = match axum::body::to_bytes(body, usize::MAX).await {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::error!(error = %error, "failed to buffer handler response");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };

        // 10. Settle. Failure is a terminal 402; the buffered body is
        // dropped, never sent unpaid.
        let settlement = match self
            .settle(&payload, &matched, &accepts, &request_headers)
            .await
        {
            Ok(settlement) => settlement,
            Err(response) => return response,
        };

        // 11. Receipt attachment and post-settlement hooks.
        let mut response = Response::from_parts(parts, Body::from(body_bytes));
        self.attach_receipt(&mut response, &settlement).await;
        response
    }

    /// Settles to completion, detached from the request future so a client
    /// disconnect cannot abandon a verified authorization half-way.
    async fn settle(
        &self,
        payload: &PaymentPayload,
        matched: &PaymentRequirements,
        accepts: &[PaymentRequirements],
        request_headers: &HeaderMap,
    ) -> Result<SettleResponse, Response> {
        if let StackOutcome::Abort {
            extension,
            reason,
            detail,
        } = self.extensions.before_settle(payload, matched).await
        {
            return Err(self
                .payment_required(
                    accepts.to_vec(),
                    Some(reason),
                    detail.map(|d| (extension, d)),
                    request_headers,
                )
                .await);
        }

        let settle_request = build_verify_request(payload, matched)?;
        let facilitator = Arc::clone(&self.facilitator);
        let settle_task =
            tokio::spawn(async move { facilitator.settle(&settle_request).await });
        let settlement = match settle_task.await {
            Ok(Ok(settlement)) => settlement,
            Ok(Err(error)) => {
                tracing::warn!(error = %error, "facilitator settle transport failure");
                return Err(self
                    .payment_required(
                        accepts.to_vec(),
                        Some(ErrorReason::UnexpectedSettleError.into()),
                        None,
                        request_headers,
                    )
                    .await);
            }
            Err(join_error) => {
                tracing::error!(error = %join_error, "settle task panicked");
                return Err(self
                    .payment_required(
                        accepts.to_vec(),
                        Some(ErrorReason::UnexpectedSettleError.into()),
                        None,
                        request_headers,
                    )
                    .await);
            }
        };

        let settlement = match self
            .extensions
            .after_settle(payload, matched, &settlement)
            .await
        {
            StackOutcome::Abort {
                extension,
                reason,
                detail,
            } => {
                return Err(self
                    .payment_required(
                        accepts.to_vec(),
                        Some(reason),
                        detail.map(|d| (extension, d)),
                        request_headers,
                    )
                    .await);
            }
            StackOutcome::Recover(result) => {
                serde_json::from_value(result).unwrap_or(settlement)
            }
            StackOutcome::Continue => settlement,
        };

        match settlement {
            SettleResponse::Success { .. } => Ok(settlement),
            SettleResponse::Error { ref reason, ref payer, .. } => {
                tracing::warn!(reason = %reason, payer = ?payer, "settlement rejected");
                Err(self
                    .payment_required(
                        accepts.to_vec(),
                        Some(reason.clone()),
                        None,
                        request_headers,
                    )
                    .await)
            }
        }
    }

    async fn attach_receipt(&self, response: &mut Response, settlement: &SettleResponse) {
        if let Ok(receipt) = headers::encode_settle_response(settlement) {
            if let Ok(value) = HeaderValue::from_str(&receipt) {
                response
                    .headers_mut()
                    .insert(headers::HEADER_PAYMENT_RESPONSE, value);
                response.headers_mut().insert(
                    http::header::ACCESS_CONTROL_EXPOSE_HEADERS,
                    HeaderValue::from_static(headers::EXPOSE_HEADERS),
                );
            }
        }
        for (name, value) in self.extensions.after_settlement(settlement).await {
            if let (Ok(name), Ok(value)) = (
                http::header::HeaderName::try_from(name.as_str()),
                HeaderValue::from_str(&value),
            ) {
                response.headers_mut().insert(name, value);
            }
        }
    }

    /// Builds the 402 response: JSON body plus the `PAYMENT-REQUIRED`
    /// mirror header, or the HTML paywall for browsers.
    async fn payment_required(
        &self,
        accepts: Vec<PaymentRequirements>,
        error: Option<String>,
        detail: Option<(String, serde_json::Value)>,
        request_headers: &HeaderMap,
    ) -> Response {
        let mut required = PaymentRequired {
            x402_version: X402Version::V2,
            accepts,
            error,
            resource: None,
            extensions: detail.map(|(extension, data)| {
                let mut map = std::collections::BTreeMap::new();
                map.insert(extension, data);
                map
            }),
        };
        self.extensions.payment_required(&mut required).await;

        let mirror = headers::encode_payment_required(&required)
            .ok()
            .and_then(|encoded| HeaderValue::from_str(&encoded).ok());

        let mut response = if self.paywall_enabled && paywall::wants_paywall(request_headers) {
            (
                StatusCode::PAYMENT_REQUIRED,
                [(http::header::CONTENT_TYPE, "text/html; charset=utf-8")],
                paywall::render(&required),
            )
                .into_response()
        } else {
            let body = serde_json::to_vec(&required).unwrap_or_default();
            (
                StatusCode::PAYMENT_REQUIRED,
                [(http::header::CONTENT_TYPE, "application/json")],
                body,
            )
                .into_response()
        };
        if let Some(mirror) = mirror {
            response
                .headers_mut()
                .insert(headers::HEADER_PAYMENT_REQUIRED, mirror);
        }
        response
    }
}

fn build_verify_request(
    payload: &PaymentPayload,
    matched: &PaymentRequirements,
) -> Result<VerifyRequest, Response> {
    let body = VerifyRequestBody {
        payment_payload: payload.clone(),
        payment_requirements: matched.clone(),
    };
    VerifyRequest::from_body(&body).map_err(|error| {
        tracing::error!(error = %error, "failed to serialize verify request");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::routing::get;
    use http_body_util::BodyExt;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tollgate_types::chain::ChainId;
    use tollgate_types::price::Price;
    use tollgate_types::proto::{self, SupportedResponse};
    use tollgate_types::routes::{PriceOption, RouteConfig, RoutesConfig};
    use tollgate_types::util::Base64Bytes;

    #[derive(Debug, thiserror::Error)]
    #[error("mock transport error")]
    struct MockError;

    struct MockFacilitator {
        verify_response: Mutex<VerifyResponse>,
        settle_response: Mutex<SettleResponse>,
        settle_calls: AtomicUsize,
    }

    impl MockFacilitator {
        fn happy() -> Self {
            Self {
                verify_response: Mutex::new(VerifyResponse::valid("0xabcd000000000000000000000000000000001234")),
                settle_response: Mutex::new(SettleResponse::Success {
                    transaction: "0xabc".to_string(),
                    network: ChainId::new("eip155", "84532"),
                    payer: "0xabcd000000000000000000000000000000001234".to_string(),
                }),
                settle_calls: AtomicUsize::new(0),
            }
        }

        fn rejecting(reason: &str) -> Self {
            let mock = Self::happy();
            *mock.verify_response.lock().unwrap() =
                VerifyResponse::invalid(reason, Some("0xabcd".to_string()));
            mock
        }

        fn failing_settle(reason: &str) -> Self {
            let mock = Self::happy();
            *mock.settle_response.lock().unwrap() = SettleResponse::Error {
                reason: reason.to_string(),
                network: ChainId::new("eip155", "84532"),
                payer: Some("0xabcd".to_string()),
            };
            mock
        }
    }

    impl Facilitator for MockFacilitator {
        type Error = MockError;

        async fn verify(
            &self,
            _request: &proto::VerifyRequest,
        ) -> Result<proto::VerifyResponse, Self::Error> {
            Ok(self.verify_response.lock().unwrap().clone())
        }

        async fn settle(
            &self,
            _request: &proto::SettleRequest,
        ) -> Result<proto::SettleResponse, Self::Error> {
            self.settle_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.settle_response.lock().unwrap().clone())
        }

        async fn supported(&self) -> Result<proto::SupportedResponse, Self::Error> {
            Ok(SupportedResponse::default())
        }
    }

    fn routes() -> RouteSet {
        let mut table = RoutesConfig::new();
        table.insert(
            "GET /paid".to_string(),
            RouteConfig {
                accepts: vec![PriceOption {
                    scheme: "exact".to_string(),
                    network: ChainId::new("eip155", "84532"),
                    pay_to: "0xBAc675C310721717Cd4A37F6cbeA1F081b1C2a07".to_string(),
                    price: Price::try_from("$0.001").unwrap(),
                }],
                description: String::new(),
                mime_type: None,
                output_schema: None,
                max_timeout_seconds: 300,
                extensions: BTreeMap::new(),
                settle_first: false,
            },
        );
        RouteSet::compile(&table).unwrap()
    }

    fn app(facilitator: Arc<MockFacilitator>) -> Router {
        let middleware = X402Middleware::new(facilitator).with_routes(routes());
        Router::new()
            .route("/paid", get(|| async { "the goods" }))
            .route(
                "/paid-broken",
                get(|| async { (StatusCode::BAD_GATEWAY, "upstream died") }),
            )
            .route("/free", get(|| async { "gratis" }))
            .layer(middleware)
    }

    fn payment_header() -> String {
        let requirements = proto::PaymentRequirements {
            scheme: "exact".to_string(),
            network: ChainId::new("eip155", "84532"),
            pay_to: "0xBAc675C310721717Cd4A37F6cbeA1F081b1C2a07".to_string(),
            asset: "0x036CbD53842c5426634e7929541eC2318f3dCF7e".to_string(),
            amount: "1000".to_string(),
            max_timeout_seconds: 300,
            description: String::new(),
            mime_type: "application/json".to_string(),
            resource: None,
            output_schema: None,
            extra: Some(serde_json::json!({"name": "USDC", "version": "2"})),
        };
        let payload = PaymentPayload {
            x402_version: X402Version::V2,
            scheme: "exact".to_string(),
            network: requirements.network.clone(),
            payload: serde_json::value::to_raw_value(&serde_json::json!({
                "signature": "0xsig",
                "authorization": {},
            }))
            .unwrap(),
            accepted: Some(requirements),
            extensions: None,
        };
        headers::encode_payment(&payload).unwrap()
    }

    async fn send(
        app: Router,
        uri: &str,
        header: Option<&str>,
    ) -> (StatusCode, HeaderMap, Vec<u8>) {
        use tower::ServiceExt;
        let mut request = http::Request::get(uri);
        if let Some(header_value) = header {
            request = request.header("X-PAYMENT", header_value);
        }
        let response = app
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, headers, body.to_vec())
    }

    #[tokio::test]
    async fn unprotected_routes_pass_through() {
        let (status, headers, body) = send(app(Arc::new(MockFacilitator::happy())), "/free", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"gratis");
        assert!(headers.get(headers::HEADER_PAYMENT_REQUIRED).is_none());
    }

    #[tokio::test]
    async fn missing_header_yields_402_with_offer() {
        let (status, headers, body) =
            send(app(Arc::new(MockFacilitator::happy())), "/paid", None).await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);

        let parsed: PaymentRequired = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.accepts.len(), 1);
        assert_eq!(parsed.accepts[0].amount, "1000");

        // Header mirror decodes to the same offer.
        let mirror = headers.get(headers::HEADER_PAYMENT_REQUIRED).unwrap();
        let mirrored = headers::decode_payment_required(mirror.as_bytes()).unwrap();
        assert_eq!(mirrored.accepts[0].amount, "1000");
    }

    #[tokio::test]
    async fn garbage_header_is_invalid_payload() {
        let (status, _, body) = send(
            app(Arc::new(MockFacilitator::happy())),
            "/paid",
            Some("!!!not-base64!!!"),
        )
        .await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        let parsed: PaymentRequired = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.error.as_deref(), Some("invalid_payload"));
    }

    #[tokio::test]
    async fn mismatched_network_is_unmatched() {
        let requirements = proto::PaymentRequirements {
            scheme: "exact".to_string(),
            network: ChainId::new("eip155", "1"),
            pay_to: "0xBAc6".to_string(),
            asset: "0x036C".to_string(),
            amount: "1000".to_string(),
            max_timeout_seconds: 300,
            description: String::new(),
            mime_type: "application/json".to_string(),
            resource: None,
            output_schema: None,
            extra: None,
        };
        let payload = PaymentPayload {
            x402_version: X402Version::V2,
            scheme: "exact".to_string(),
            network: ChainId::new("eip155", "1"),
            payload: serde_json::value::to_raw_value(&serde_json::json!({})).unwrap(),
            accepted: Some(requirements),
            extensions: None,
        };
        let header = headers::encode_payment(&payload).unwrap();
        let (status, _, body) = send(
            app(Arc::new(MockFacilitator::happy())),
            "/paid",
            Some(&header),
        )
        .await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        let parsed: PaymentRequired = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.error.as_deref(), Some("unmatched"));
    }

    #[tokio::test]
    async fn happy_path_returns_body_and_receipt() {
        let facilitator = Arc::new(MockFacilitator::happy());
        let (status, headers_map, body) = send(
            app(Arc::clone(&facilitator)),
            "/paid",
            Some(&payment_header()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"the goods");
        assert_eq!(facilitator.settle_calls.load(Ordering::SeqCst), 1);

        let receipt = headers_map.get(headers::HEADER_PAYMENT_RESPONSE).unwrap();
        let settlement = headers::decode_settle_response(receipt.as_bytes()).unwrap();
        match settlement {
            SettleResponse::Success { transaction, network, .. } => {
                assert_eq!(transaction, "0xabc");
                assert_eq!(network, ChainId::new("eip155", "84532"));
            }
            other => panic!("expected success receipt, got {other:?}"),
        }
        assert_eq!(
            headers_map
                .get(http::header::ACCESS_CONTROL_EXPOSE_HEADERS)
                .unwrap(),
            headers::EXPOSE_HEADERS
        );
    }

    #[tokio::test]
    async fn invalid_verification_never_settles() {
        let facilitator = Arc::new(MockFacilitator::rejecting(
            "invalid_exact_evm_payload_authorization_valid_before",
        ));
        let (status, _, body) = send(
            app(Arc::clone(&facilitator)),
            "/paid",
            Some(&payment_header()),
        )
        .await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        let parsed: PaymentRequired = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            parsed.error.as_deref(),
            Some("invalid_exact_evm_payload_authorization_valid_before")
        );
        assert_eq!(facilitator.settle_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn handler_errors_skip_settlement() {
        let facilitator = Arc::new(MockFacilitator::happy());
        let (status, _, body) = send(
            app(Arc::clone(&facilitator)),
            "/paid-broken",
            Some(&payment_header()),
        )
        .await;
        // The handler's error comes back verbatim; settle never ran.
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body, b"upstream died");
        assert_eq!(facilitator.settle_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_settlement_never_leaks_the_body() {
        let facilitator = Arc::new(MockFacilitator::failing_settle("insufficient_funds"));
        let (status, _, body) = send(
            app(Arc::clone(&facilitator)),
            "/paid",
            Some(&payment_header()),
        )
        .await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        let parsed: PaymentRequired = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.error.as_deref(), Some("insufficient_funds"));
        let text = String::from_utf8_lossy(&body);
        assert!(!text.contains("the goods"));
    }

    #[tokio::test]
    async fn browsers_get_the_paywall() {
        use tower::ServiceExt;
        let response = app(Arc::new(MockFacilitator::happy()))
            .oneshot(
                http::Request::get("/paid")
                    .header(http::header::ACCEPT, "text/html")
                    .header(http::header::USER_AGENT, "Mozilla/5.0")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let content_type = response
            .headers()
            .get(http::header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(content_type.starts_with("text/html"));
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(String::from_utf8_lossy(&body).contains("402 Payment required"));
    }

    #[tokio::test]
    async fn payment_signature_header_name_is_accepted() {
        use tower::ServiceExt;
        let facilitator = Arc::new(MockFacilitator::happy());
        let response = app(Arc::clone(&facilitator))
            .oneshot(
                http::Request::get("/paid")
                    .header("payment-signature", payment_header())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    // A decoded base64 check for the happy-path receipt shape, matching
    // what programmatic clients parse.
    #[tokio::test]
    async fn receipt_is_base64_json() {
        let facilitator = Arc::new(MockFacilitator::happy());
        let (_, headers_map, _) = send(
            app(facilitator),
            "/paid",
            Some(&payment_header()),
        )
        .await;
        let receipt = headers_map.get(headers::HEADER_PAYMENT_RESPONSE).unwrap();
        let decoded = Base64Bytes::from(receipt.as_bytes()).decode().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["network"], "eip155:84532");
    }
}
