//! x402 facilitator entrypoint.

mod config;
mod run;
mod schemes;
mod telemetry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    run::run().await
}
