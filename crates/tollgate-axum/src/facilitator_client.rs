//! HTTP client for a remote x402 facilitator.
//!
//! Implements the [`Facilitator`] contract over `POST /verify`,
//! `POST /settle`, and `GET /supported`. The supported listing is cached
//! with a bounded TTL and refreshed under a lock, so concurrent cache
//! misses collapse into one upstream request.

use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tollgate_types::facilitator::Facilitator;
use tollgate_types::proto;
use tracing::instrument;
use url::Url;

/// Default deadline for verify/settle when the request names none.
const DEFAULT_DEADLINE_SECS: u64 = 30;

/// How long a `/supported` listing stays fresh.
const SUPPORTED_TTL: Duration = Duration::from_secs(300);

/// Errors from talking to a remote facilitator.
///
/// These are transport-level: business rejections arrive inside the
/// response bodies, not here.
#[derive(Debug, thiserror::Error)]
pub enum FacilitatorClientError {
    /// The facilitator URL is invalid.
    #[error("invalid facilitator url: {0}")]
    InvalidUrl(String),
    /// The HTTP exchange failed.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    /// The facilitator answered non-2xx.
    #[error("facilitator answered {status}: {body}")]
    Status {
        /// The HTTP status.
        status: StatusCode,
        /// The response body, for diagnostics.
        body: String,
    },
}

/// A remote facilitator reached over HTTP.
#[derive(Clone)]
pub struct FacilitatorClient {
    http: reqwest::Client,
    base_url: Url,
    supported_cache: Arc<Mutex<Option<(Instant, proto::SupportedResponse)>>>,
}

impl std::fmt::Debug for FacilitatorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FacilitatorClient")
            .field("base_url", &self.base_url.as_str())
            .finish()
    }
}

impl TryFrom<&str> for FacilitatorClient {
    type Error = FacilitatorClientError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let base_url = Url::parse(value)
            .map_err(|e| FacilitatorClientError::InvalidUrl(e.to_string()))?;
        Ok(Self::new(base_url))
    }
}

impl FacilitatorClient {
    /// Creates a client for the given base URL.
    pub fn new(base_url: Url) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            supported_cache: Arc::new(Mutex::new(None)),
        }
    }

    /// Creates a client from the `FACILITATOR_URL` environment variable.
    pub fn from_env() -> Result<Self, FacilitatorClientError> {
        let url = std::env::var("FACILITATOR_URL")
            .map_err(|_| FacilitatorClientError::InvalidUrl("FACILITATOR_URL is not set".into()))?;
        Self::try_from(url.as_str())
    }

    /// The facilitator's base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, FacilitatorClientError> {
        self.base_url
            .join(path)
            .map_err(|e| FacilitatorClientError::InvalidUrl(e.to_string()))
    }

    /// Deadline for one verify/settle exchange: the requirement's
    /// `maxTimeoutSeconds` when present.
    fn deadline(request: &proto::VerifyRequest) -> Duration {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Probe {
            payment_requirements: ProbeRequirements,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct ProbeRequirements {
            max_timeout_seconds: u64,
        }
        let secs = serde_json::from_str::<Probe>(request.as_str())
            .map(|p| p.payment_requirements.max_timeout_seconds)
            .unwrap_or(DEFAULT_DEADLINE_SECS);
        Duration::from_secs(secs)
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        request: &proto::VerifyRequest,
    ) -> Result<T, FacilitatorClientError> {
        let response = self
            .http
            .post(self.endpoint(path)?)
            .timeout(Self::deadline(request))
            .header("content-type", "application/json")
            .body(request.as_str().to_string())
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FacilitatorClientError::Status {
                status,
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response.json().await?)
    }
}

impl Facilitator for FacilitatorClient {
    type Error = FacilitatorClientError;

    #[instrument(name = "facilitator_client.verify", skip_all)]
    async fn verify(
        &self,
        request: &proto::VerifyRequest,
    ) -> Result<proto::VerifyResponse, Self::Error> {
        self.post("verify", request).await
    }

    #[instrument(name = "facilitator_client.settle", skip_all)]
    async fn settle(
        &self,
        request: &proto::SettleRequest,
    ) -> Result<proto::SettleResponse, Self::Error> {
        self.post("settle", request).await
    }

    /// Cached with a bounded TTL; one in-flight refresh at a time.
    #[instrument(name = "facilitator_client.supported", skip_all)]
    async fn supported(&self) -> Result<proto::SupportedResponse, Self::Error> {
        let mut cache = self.supported_cache.lock().await;
        if let Some((fetched_at, supported)) = cache.as_ref() {
            if fetched_at.elapsed() < SUPPORTED_TTL {
                return Ok(supported.clone());
            }
        }
        let response = self.http.get(self.endpoint("supported")?).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FacilitatorClientError::Status {
                status,
                body: response.text().await.unwrap_or_default(),
            });
        }
        let supported: proto::SupportedResponse = response.json().await?;
        *cache = Some((Instant::now(), supported.clone()));
        Ok(supported)
    }
}
