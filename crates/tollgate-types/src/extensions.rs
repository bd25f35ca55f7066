//! Extension hook points around the payment pipeline.
//!
//! Extensions attach optional behavior before and after each pipeline
//! stage: route match, verify, handler execution, settle, and final
//! response decoration. A hook can wave the request through, abort it with
//! a stable reason, or recover a failed stage with a substitute result.
//!
//! Well-known extensions (signed offers and receipts, gas sponsoring,
//! negotiated pricing, discovery) live in the `tollgate-extensions` crate;
//! this module only defines the contract they implement.

use async_trait::async_trait;

use crate::proto::{
    PaymentPayload, PaymentRequired, PaymentRequirements, SettleResponse, VerifyResponse,
};
use crate::routes::RouteConfig;
use std::sync::Arc;

/// What a hook decided.
#[derive(Debug, Clone)]
pub enum HookOutcome {
    /// Proceed with the pipeline.
    Continue,
    /// Stop the pipeline; the engine answers 402 with this reason.
    Abort {
        /// Stable tag surfaced as the 402 `error`.
        reason: String,
        /// Extension-defined data carried in the 402's extension map
        /// (e.g. a counter-offer).
        detail: Option<serde_json::Value>,
    },
    /// Replace a stage's input or result and continue.
    Recover {
        /// Extension-defined substitute.
        result: serde_json::Value,
    },
}

impl HookOutcome {
    /// A bare abort with no extension data.
    pub fn abort(reason: impl Into<String>) -> Self {
        HookOutcome::Abort {
            reason: reason.into(),
            detail: None,
        }
    }
}

/// The route about to be charged.
#[derive(Debug, Clone, Copy)]
pub struct RouteContext<'a> {
    /// Request path.
    pub path: &'a str,
    /// Request method.
    pub method: &'a str,
    /// The matched route's configuration.
    pub config: &'a RouteConfig,
}

/// An extension participating in the payment pipeline.
///
/// Every hook defaults to [`HookOutcome::Continue`]; implementations
/// override only the stages they care about.
#[async_trait]
pub trait PaymentExtension: Send + Sync {
    /// The extension key, as listed in `/supported` `extensions` and used
    /// in payload/response extension maps.
    fn key(&self) -> &'static str;

    /// A protected route matched, before requirements are built.
    async fn on_route_matched(&self, route: RouteContext<'_>) -> HookOutcome {
        let _ = route;
        HookOutcome::Continue
    }

    /// A 402 offer is about to be sent; the extension may decorate it.
    async fn on_payment_required(&self, required: &mut PaymentRequired) {
        let _ = required;
    }

    /// Verification is about to run.
    async fn on_before_verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> HookOutcome {
        let _ = (payload, requirements);
        HookOutcome::Continue
    }

    /// Verification passed.
    async fn on_after_verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
        response: &VerifyResponse,
    ) -> HookOutcome {
        let _ = (payload, requirements, response);
        HookOutcome::Continue
    }

    /// Verification failed; a hook may recover with a substitute result.
    async fn on_verify_failure(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
        response: &VerifyResponse,
    ) -> HookOutcome {
        let _ = (payload, requirements, response);
        HookOutcome::Continue
    }

    /// The protected handler is about to run.
    async fn on_before_execution(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> HookOutcome {
        let _ = (payload, requirements);
        HookOutcome::Continue
    }

    /// Settlement is about to run.
    async fn on_before_settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> HookOutcome {
        let _ = (payload, requirements);
        HookOutcome::Continue
    }

    /// Settlement succeeded.
    async fn on_after_settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
        response: &SettleResponse,
    ) -> HookOutcome {
        let _ = (payload, requirements, response);
        HookOutcome::Continue
    }

    /// Settlement failed; a hook may recover with a substitute result.
    async fn on_settle_failure(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
        response: &SettleResponse,
    ) -> HookOutcome {
        let _ = (payload, requirements, response);
        HookOutcome::Continue
    }

    /// The paid response is about to be returned; the extension may append
    /// response headers (e.g. a signed receipt).
    async fn on_after_settlement(
        &self,
        response: &SettleResponse,
        headers: &mut Vec<(String, String)>,
    ) {
        let _ = (response, headers);
    }
}

/// An ordered stack of extensions.
///
/// Hooks run in registration order. The first abort stops the stack; the
/// first recovery is returned to the engine.
#[derive(Clone, Default)]
pub struct ExtensionStack {
    extensions: Vec<Arc<dyn PaymentExtension>>,
}

/// Outcome of running a hook across the whole stack.
#[derive(Debug, Clone)]
pub enum StackOutcome {
    /// Every hook continued.
    Continue,
    /// A hook aborted.
    Abort {
        /// The aborting extension's key.
        extension: String,
        /// Stable tag for the 402 `error`.
        reason: String,
        /// Extension data for the 402's extension map.
        detail: Option<serde_json::Value>,
    },
    /// A hook recovered with this result.
    Recover(serde_json::Value),
}

impl ExtensionStack {
    /// Creates an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an extension.
    pub fn push(&mut self, extension: Arc<dyn PaymentExtension>) {
        self.extensions.push(extension);
    }

    /// Chained registration.
    pub fn with(mut self, extension: Arc<dyn PaymentExtension>) -> Self {
        self.push(extension);
        self
    }

    /// The extension keys, for `/supported` advertising.
    pub fn keys(&self) -> Vec<String> {
        self.extensions.iter().map(|e| e.key().to_string()).collect()
    }

    /// The registered extensions.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn PaymentExtension>> {
        self.extensions.iter()
    }

    /// True when no extensions are registered.
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    fn fold(&self, outcomes: impl IntoIterator<Item = HookOutcome>) -> StackOutcome {
        for (extension, outcome) in self.extensions.iter().zip(outcomes) {
            match outcome {
                HookOutcome::Continue => continue,
                HookOutcome::Abort { reason, detail } => {
                    return StackOutcome::Abort {
                        extension: extension.key().to_string(),
                        reason,
                        detail,
                    };
                }
                HookOutcome::Recover { result } => return StackOutcome::Recover(result),
            }
        }
        StackOutcome::Continue
    }

    /// Runs `on_route_matched` across the stack.
    pub async fn route_matched(&self, route: RouteContext<'_>) -> StackOutcome {
        let mut outcomes = Vec::with_capacity(self.extensions.len());
        for extension in &self.extensions {
            outcomes.push(extension.on_route_matched(route).await);
        }
        self.fold(outcomes)
    }

    /// Runs `on_payment_required` across the stack.
    pub async fn payment_required(&self, required: &mut PaymentRequired) {
        for extension in &self.extensions {
            extension.on_payment_required(required).await;
        }
    }

    /// Runs `on_before_verify` across the stack.
    pub async fn before_verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> StackOutcome {
        let mut outcomes = Vec::with_capacity(self.extensions.len());
        for extension in &self.extensions {
            outcomes.push(extension.on_before_verify(payload, requirements).await);
        }
        self.fold(outcomes)
    }

    /// Runs the post-verify hook matching the verification result.
    pub async fn after_verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
        response: &VerifyResponse,
    ) -> StackOutcome {
        let mut outcomes = Vec::with_capacity(self.extensions.len());
        for extension in &self.extensions {
            let outcome = if response.is_valid() {
                extension.on_after_verify(payload, requirements, response).await
            } else {
                extension
                    .on_verify_failure(payload, requirements, response)
                    .await
            };
            outcomes.push(outcome);
        }
        self.fold(outcomes)
    }

    /// Runs `on_before_execution` across the stack.
    pub async fn before_execution(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> StackOutcome {
        let mut outcomes = Vec::with_capacity(self.extensions.len());
        for extension in &self.extensions {
            outcomes.push(extension.on_before_execution(payload, requirements).await);
        }
        self.fold(outcomes)
    }

    /// Runs `on_before_settle` across the stack.
    pub async fn before_settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> StackOutcome {
        let mut outcomes = Vec::with_capacity(self.extensions.len());
        for extension in &self.extensions {
            outcomes.push(extension.on_before_settle(payload, requirements).await);
        }
        self.fold(outcomes)
    }

    /// Runs the post-settle hook matching the settlement result.
    pub async fn after_settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
        response: &SettleResponse,
    ) -> StackOutcome {
        let mut outcomes = Vec::with_capacity(self.extensions.len());
        for extension in &self.extensions {
            let outcome = if response.is_success() {
                extension.on_after_settle(payload, requirements, response).await
            } else {
                extension
                    .on_settle_failure(payload, requirements, response)
                    .await
            };
            outcomes.push(outcome);
        }
        self.fold(outcomes)
    }

    /// Runs `on_after_settlement` across the stack, collecting extra
    /// response headers.
    pub async fn after_settlement(&self, response: &SettleResponse) -> Vec<(String, String)> {
        let mut headers = Vec::new();
        for extension in &self.extensions {
            extension.on_after_settlement(response, &mut headers).await;
        }
        headers
    }
}

impl std::fmt::Debug for ExtensionStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionStack")
            .field("keys", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainId;
    use crate::proto::X402Version;

    struct Gatekeeper;

    #[async_trait]
    impl PaymentExtension for Gatekeeper {
        fn key(&self) -> &'static str {
            "gatekeeper"
        }

        async fn on_before_execution(
            &self,
            _payload: &PaymentPayload,
            requirements: &PaymentRequirements,
        ) -> HookOutcome {
            if requirements.description == "blocked" {
                HookOutcome::abort("gatekeeper_denied")
            } else {
                HookOutcome::Continue
            }
        }
    }

    fn fixture() -> (PaymentPayload, PaymentRequirements) {
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
        let payload = PaymentPayload {
            x402_version: X402Version::V2,
            scheme: "exact".to_string(),
            network: requirements.network.clone(),
            payload: serde_json::value::to_raw_value(&serde_json::json!({})).unwrap(),
            accepted: Some(requirements.clone()),
            extensions: None,
        };
        (payload, requirements)
    }

    #[tokio::test]
    async fn empty_stack_continues() {
        let stack = ExtensionStack::new();
        let (payload, requirements) = fixture();
        assert!(matches!(
            stack.before_verify(&payload, &requirements).await,
            StackOutcome::Continue
        ));
    }

    #[tokio::test]
    async fn abort_stops_the_pipeline() {
        let stack = ExtensionStack::new().with(Arc::new(Gatekeeper));
        let (payload, mut requirements) = fixture();
        requirements.description = "blocked".to_string();
        match stack.before_execution(&payload, &requirements).await {
            StackOutcome::Abort {
                extension, reason, ..
            } => {
                assert_eq!(extension, "gatekeeper");
                assert_eq!(reason, "gatekeeper_denied");
            }
            other => panic!("expected abort, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn keys_are_advertised() {
        let stack = ExtensionStack::new().with(Arc::new(Gatekeeper));
        assert_eq!(stack.keys(), vec!["gatekeeper".to_string()]);
    }
}
