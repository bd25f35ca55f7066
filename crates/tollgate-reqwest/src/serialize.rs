//! Per-account signing serialization.
//!
//! HSMs and most wallets refuse concurrent signing sessions, so payload
//! construction for one account must not overlap itself. Wrapping a
//! scheme client in [`SerializedSchemeClient`] queues its signing calls
//! behind an async mutex; requests for different accounts use different
//! wrappers and still run in parallel.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tollgate_types::proto::{PaymentPayload, PaymentRequirements};
use tollgate_types::scheme::{SchemeClient, SchemeClientError};

/// Serializes all payload construction through one inner client.
pub struct SerializedSchemeClient {
    inner: Arc<dyn SchemeClient>,
    lock: Mutex<()>,
}

impl SerializedSchemeClient {
    /// Wraps a scheme client.
    pub fn new(inner: Arc<dyn SchemeClient>) -> Self {
        Self {
            inner,
            lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl SchemeClient for SerializedSchemeClient {
    async fn create_payment_payload(
        &self,
        requirements: &PaymentRequirements,
    ) -> Result<PaymentPayload, SchemeClientError> {
        let _guard = self.lock.lock().await;
        self.inner.create_payment_payload(requirements).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tollgate_types::chain::ChainId;
    use tollgate_types::proto::X402Version;

    struct SlowSigner {
        in_flight: AtomicUsize,
        max_observed: AtomicUsize,
    }

    #[async_trait]
    impl SchemeClient for SlowSigner {
        async fn create_payment_payload(
            &self,
            requirements: &PaymentRequirements,
        ) -> Result<PaymentPayload, SchemeClientError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_observed.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(PaymentPayload {
                x402_version: X402Version::V2,
                scheme: requirements.scheme.clone(),
                network: requirements.network.clone(),
                payload: serde_json::value::to_raw_value(&serde_json::json!({})).unwrap(),
                accepted: Some(requirements.clone()),
                extensions: None,
            })
        }
    }

    #[tokio::test]
    async fn concurrent_signing_is_serialized() {
        let signer = Arc::new(SlowSigner {
            in_flight: AtomicUsize::new(0),
            max_observed: AtomicUsize::new(0),
        });
        let serialized = Arc::new(SerializedSchemeClient::new(
            Arc::clone(&signer) as Arc<dyn SchemeClient>
        ));

        let requirements = PaymentRequirements {
            scheme: "exact".to_string(),
            network: ChainId::new("eip155", "84532"),
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

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let client = Arc::clone(&serialized);
                let requirements = requirements.clone();
                tokio::spawn(async move { client.create_payment_payload(&requirements).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(signer.max_observed.load(Ordering::SeqCst), 1);
    }
}
