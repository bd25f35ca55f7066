//! HTTP endpoints implemented by the x402 facilitator.
//!
//! - `GET /supported` - payment kinds, extensions, and signer addresses
//! - `POST /verify` - pure verification of a payment payload
//! - `POST /settle` - re-verification plus on-ledger submission
//! - `GET /health` - liveness, answered from `/supported`
//!
//! Business rejections are 200 responses carrying `isValid: false` or
//! `success: false` with a stable reason tag; non-2xx statuses mean the
//! request itself could not be processed.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router, response::IntoResponse};
use serde_json::json;
use tollgate_types::chain::ChainId;
use tollgate_types::facilitator::Facilitator;
use tollgate_types::proto::{self, ErrorReason, SettleResponse, VerifyResponse};
use tollgate_types::scheme::SchemeFacilitatorError;
use tracing::instrument;

use crate::facilitator_local::FacilitatorLocalError;

/// Routes for the facilitator HTTP surface.
pub fn routes<A>() -> Router<A>
where
    A: Facilitator<Error = FacilitatorLocalError> + Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/", get(get_root))
        .route("/verify", get(get_verify_info))
        .route("/verify", post(post_verify::<A>))
        .route("/settle", get(get_settle_info))
        .route("/settle", post(post_settle::<A>))
        .route("/health", get(get_health::<A>))
        .route("/supported", get(get_supported::<A>))
}

/// `GET /`: a greeting, useful as a smoke check.
#[instrument(skip_all)]
async fn get_root() -> impl IntoResponse {
    let pkg_name = env!("CARGO_PKG_NAME");
    (StatusCode::OK, format!("Hello from {pkg_name}!"))
}

/// `GET /verify`: a machine-readable description of the endpoint.
#[instrument(skip_all)]
async fn get_verify_info() -> impl IntoResponse {
    Json(json!({
        "endpoint": "/verify",
        "description": "POST to verify x402 payments",
        "body": {
            "paymentPayload": "PaymentPayload",
            "paymentRequirements": "PaymentRequirements",
        }
    }))
}

/// `GET /settle`: a machine-readable description of the endpoint.
#[instrument(skip_all)]
async fn get_settle_info() -> impl IntoResponse {
    Json(json!({
        "endpoint": "/settle",
        "description": "POST to settle x402 payments",
        "body": {
            "paymentPayload": "PaymentPayload",
            "paymentRequirements": "PaymentRequirements",
        }
    }))
}

/// `GET /supported`: payment kinds this facilitator serves.
#[instrument(skip_all)]
async fn get_supported<A>(State(facilitator): State<A>) -> impl IntoResponse
where
    A: Facilitator<Error = FacilitatorLocalError>,
{
    match facilitator.supported().await {
        Ok(supported) => (StatusCode::OK, Json(json!(supported))).into_response(),
        Err(error) => {
            tracing::error!(error = %error, "supported listing failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({}))).into_response()
        }
    }
}

/// `GET /health`: alive iff `/supported` can be answered.
#[instrument(skip_all)]
async fn get_health<A>(State(facilitator): State<A>) -> impl IntoResponse
where
    A: Facilitator<Error = FacilitatorLocalError>,
{
    get_supported(State(facilitator)).await
}

fn error_reason(error: &SchemeFacilitatorError, fallback: ErrorReason) -> String {
    match error {
        SchemeFacilitatorError::Verification(e) => e.reason().into(),
        SchemeFacilitatorError::Ledger(_) => fallback.into(),
    }
}

fn probed_network(request: &proto::VerifyRequest) -> ChainId {
    request
        .scheme_kind()
        .map(|kind| kind.network)
        .unwrap_or_else(|| ChainId::new("unknown", "unknown"))
}

/// `POST /verify`: check a payment payload against requirements.
#[instrument(skip_all)]
async fn post_verify<A>(
    State(facilitator): State<A>,
    Json(body): Json<proto::VerifyRequest>,
) -> impl IntoResponse
where
    A: Facilitator<Error = FacilitatorLocalError>,
{
    match facilitator.verify(&body).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(FacilitatorLocalError::Verification(error))
        | Err(FacilitatorLocalError::Settlement(error)) => {
            tracing::warn!(error = %error, "verification failed before scheme checks");
            let response = VerifyResponse::invalid(
                error_reason(&error, ErrorReason::UnexpectedVerifyError),
                None,
            );
            (StatusCode::OK, Json(response)).into_response()
        }
    }
}

/// `POST /settle`: execute a verified payment on-ledger.
#[instrument(skip_all)]
async fn post_settle<A>(
    State(facilitator): State<A>,
    Json(body): Json<proto::SettleRequest>,
) -> impl IntoResponse
where
    A: Facilitator<Error = FacilitatorLocalError>,
{
    match facilitator.settle(&body).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(FacilitatorLocalError::Verification(error))
        | Err(FacilitatorLocalError::Settlement(error)) => {
            tracing::warn!(error = %error, "settlement failed before scheme checks");
            let response = SettleResponse::Error {
                reason: error_reason(&error, ErrorReason::UnexpectedSettleError),
                network: probed_network(&body),
                payer: None,
            };
            (StatusCode::OK, Json(response)).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tollgate_types::chain::ChainIdPattern;
    use tollgate_types::scheme::{FacilitatorRegistry, SchemeFacilitator};
    use tower::ServiceExt;

    use crate::FacilitatorLocal;

    struct AlwaysValid;

    #[async_trait]
    impl SchemeFacilitator for AlwaysValid {
        async fn verify(
            &self,
            _request: &proto::VerifyRequest,
        ) -> Result<proto::VerifyResponse, SchemeFacilitatorError> {
            Ok(VerifyResponse::valid("0xabcd"))
        }

        async fn settle(
            &self,
            _request: &proto::SettleRequest,
        ) -> Result<proto::SettleResponse, SchemeFacilitatorError> {
            Ok(SettleResponse::Success {
                transaction: "0xabc".to_string(),
                network: ChainId::new("eip155", "84532"),
                payer: "0xabcd".to_string(),
            })
        }

        async fn supported(&self) -> proto::SupportedResponse {
            proto::SupportedResponse {
                kinds: vec![proto::SupportedPaymentKind {
                    x402_version: 2,
                    scheme: "exact".to_string(),
                    network: ChainId::new("eip155", "84532"),
                    extra: None,
                }],
                extensions: Vec::new(),
                signers: HashMap::new(),
            }
        }
    }

    fn app() -> Router {
        let mut registry = FacilitatorRegistry::new();
        registry
            .register(
                "exact",
                ChainIdPattern::exact("eip155", "84532"),
                Arc::new(AlwaysValid),
            )
            .unwrap();
        let facilitator = Arc::new(FacilitatorLocal::new(registry));
        routes().with_state(facilitator)
    }

    fn verify_body(network: &str) -> String {
        json!({
            "paymentPayload": {
                "x402Version": 2,
                "scheme": "exact",
                "network": network,
                "payload": {},
            },
            "paymentRequirements": {},
        })
        .to_string()
    }

    async fn post_json(app: Router, uri: &str, body: String) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::post(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn supported_lists_kinds() {
        let response = app()
            .oneshot(Request::get("/supported").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["kinds"][0]["network"], "eip155:84532");
    }

    #[tokio::test]
    async fn verify_round_trips() {
        let (status, body) = post_json(app(), "/verify", verify_body("eip155:84532")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isValid"], true);
        assert_eq!(body["payer"], "0xabcd");
    }

    #[tokio::test]
    async fn unsupported_kind_is_a_business_failure() {
        // 200 with isValid false, per the transport contract.
        let (status, body) = post_json(app(), "/verify", verify_body("eip155:1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isValid"], false);
        assert_eq!(body["invalidReason"], "unsupported_kind");
    }

    #[tokio::test]
    async fn settle_round_trips() {
        let (status, body) = post_json(app(), "/settle", verify_body("eip155:84532")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["transaction"], "0xabc");
    }
}
