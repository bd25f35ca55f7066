//! Registry-dispatching facilitator implementation.

use std::collections::HashMap;
use std::sync::Arc;

use tollgate_types::extensions::ExtensionStack;
use tollgate_types::facilitator::Facilitator;
use tollgate_types::proto;
use tollgate_types::proto::PaymentVerificationError;
use tollgate_types::scheme::{FacilitatorRegistry, SchemeFacilitatorError};

/// A [`Facilitator`] that verifies and settles in-process through
/// registered scheme handlers.
///
/// Settlement never runs a handler that verification would reject: every
/// scheme handler re-verifies before submitting. The registry is fixed at
/// construction; requests only read it.
pub struct FacilitatorLocal {
    handlers: Arc<FacilitatorRegistry>,
    extensions: ExtensionStack,
}

impl FacilitatorLocal {
    /// Creates a facilitator over a scheme registry.
    pub fn new(handlers: FacilitatorRegistry) -> Self {
        FacilitatorLocal {
            handlers: Arc::new(handlers),
            extensions: ExtensionStack::new(),
        }
    }

    /// Attaches extensions advertised through `/supported`.
    pub fn with_extensions(mut self, extensions: ExtensionStack) -> Self {
        self.extensions = extensions;
        self
    }

    fn handler_for(
        &self,
        request: &proto::VerifyRequest,
    ) -> Result<Arc<dyn tollgate_types::scheme::SchemeFacilitator>, FacilitatorLocalError> {
        let kind = request
            .scheme_kind()
            .ok_or(FacilitatorLocalError::Verification(
                PaymentVerificationError::InvalidFormat("missing scheme or network".into()).into(),
            ))?;
        self.handlers
            .lookup_kind(&kind)
            .ok_or(FacilitatorLocalError::Verification(
                PaymentVerificationError::UnsupportedKind.into(),
            ))
    }
}

impl Facilitator for FacilitatorLocal {
    type Error = FacilitatorLocalError;

    async fn verify(
        &self,
        request: &proto::VerifyRequest,
    ) -> Result<proto::VerifyResponse, Self::Error> {
        let handler = self.handler_for(request)?;
        let response = handler
            .verify(request)
            .await
            .map_err(FacilitatorLocalError::Verification)?;
        Ok(response)
    }

    async fn settle(
        &self,
        request: &proto::SettleRequest,
    ) -> Result<proto::SettleResponse, Self::Error> {
        let handler = self.handler_for(request)?;
        let response = handler
            .settle(request)
            .await
            .map_err(FacilitatorLocalError::Settlement)?;
        Ok(response)
    }

    async fn supported(&self) -> Result<proto::SupportedResponse, Self::Error> {
        let mut kinds = vec![];
        let mut signers = HashMap::new();
        for handler in self.handlers.values() {
            let mut supported = handler.supported().await;
            kinds.append(&mut supported.kinds);
            for (chain_id, signer_addresses) in supported.signers {
                signers.entry(chain_id).or_insert(signer_addresses);
            }
        }
        Ok(proto::SupportedResponse {
            kinds,
            extensions: self.extensions.keys(),
            signers,
        })
    }
}

/// Errors from local facilitation.
///
/// Verification and settlement failures are kept apart so the HTTP layer
/// can shape each into its business-failure body.
#[derive(Debug, thiserror::Error)]
pub enum FacilitatorLocalError {
    /// Verification could not run (bad request or unreachable ledger).
    #[error(transparent)]
    Verification(SchemeFacilitatorError),
    /// Settlement could not run.
    #[error(transparent)]
    Settlement(SchemeFacilitatorError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tollgate_types::chain::{ChainId, ChainIdPattern};
    use tollgate_types::proto::{SupportedResponse, VerifyResponse};
    use tollgate_types::scheme::SchemeFacilitator;

    struct StaticHandler {
        payer: &'static str,
    }

    #[async_trait]
    impl SchemeFacilitator for StaticHandler {
        async fn verify(
            &self,
            _request: &proto::VerifyRequest,
        ) -> Result<proto::VerifyResponse, SchemeFacilitatorError> {
            Ok(VerifyResponse::valid(self.payer))
        }

        async fn settle(
            &self,
            _request: &proto::SettleRequest,
        ) -> Result<proto::SettleResponse, SchemeFacilitatorError> {
            Ok(proto::SettleResponse::Success {
                transaction: "0xabc".to_string(),
                network: ChainId::new("eip155", "84532"),
                payer: self.payer.to_string(),
            })
        }

        async fn supported(&self) -> SupportedResponse {
            SupportedResponse {
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

    fn request(scheme: &str, network: &str) -> proto::VerifyRequest {
        let body = serde_json::json!({
            "paymentPayload": {
                "x402Version": 2,
                "scheme": scheme,
                "network": network,
                "payload": {},
            },
            "paymentRequirements": {},
        });
        proto::VerifyRequest::from(serde_json::value::to_raw_value(&body).unwrap())
    }

    fn facilitator() -> FacilitatorLocal {
        let mut registry = FacilitatorRegistry::new();
        registry
            .register(
                "exact",
                ChainIdPattern::exact("eip155", "84532"),
                Arc::new(StaticHandler { payer: "0xabcd" }),
            )
            .unwrap();
        FacilitatorLocal::new(registry)
    }

    #[tokio::test]
    async fn dispatches_to_registered_handler() {
        let facilitator = facilitator();
        let response = facilitator
            .verify(&request("exact", "eip155:84532"))
            .await
            .unwrap();
        assert!(response.is_valid());
    }

    #[tokio::test]
    async fn unknown_kind_is_unsupported() {
        let facilitator = facilitator();
        let error = facilitator
            .verify(&request("exact", "eip155:1"))
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            FacilitatorLocalError::Verification(SchemeFacilitatorError::Verification(
                PaymentVerificationError::UnsupportedKind
            ))
        ));
    }

    #[tokio::test]
    async fn supported_unions_handlers() {
        let facilitator = facilitator();
        let supported = facilitator.supported().await.unwrap();
        assert_eq!(supported.kinds.len(), 1);
        assert_eq!(supported.kinds[0].scheme, "exact");
    }
}
