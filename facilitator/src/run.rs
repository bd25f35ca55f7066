//! Facilitator HTTP entrypoint.
//!
//! Launches an axum server exposing the x402 facilitator interface:
//!
//! - `GET /supported` - payment kinds, extensions, signer addresses
//! - `POST /verify` - verify a payment payload against requirements
//! - `POST /settle` - settle an accepted payment on its ledger
//! - `GET /health` - liveness
//!
//! `.env` values are honored; `HOST` and `PORT` control binding. Shutdown
//! is graceful on SIGINT/SIGTERM.

use axum::Router;
use axum::http::Method;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors;

use tollgate_extensions::{NegotiatedPricingExtension, SplitDifferenceStrategy};
use tollgate_facilitator_local::{FacilitatorLocal, SigDown, handlers};
use tollgate_types::extensions::ExtensionStack;

use crate::config::Config;
use crate::schemes::build_registry;
use crate::telemetry;

/// Builds everything and serves until shutdown.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::CryptoProvider::install_default(rustls::crypto::ring::default_provider())
        .expect("failed to initialize rustls crypto provider");

    dotenv().ok();
    telemetry::init();

    let config = Config::load();
    let registry = build_registry(&config)?;
    if registry.is_empty() {
        tracing::warn!("no chains configured; /verify and /settle will reject everything");
    }

    let extensions = ExtensionStack::new().with(Arc::new(NegotiatedPricingExtension::new(
        Arc::new(SplitDifferenceStrategy),
    )));
    let facilitator = Arc::new(FacilitatorLocal::new(registry).with_extensions(extensions));

    let app = Router::new()
        .merge(handlers::routes().with_state(facilitator))
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host, config.port);
    tracing::info!("starting facilitator at http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .inspect_err(|e| tracing::error!("failed to bind to {addr}: {e}"))?;

    let sig_down = SigDown::try_new()?;
    let cancellation_token = sig_down.cancellation_token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancellation_token.cancelled().await })
        .await?;

    Ok(())
}
