//! Payment scheme faces and the `(scheme, network)` registry.
//!
//! A payment scheme exposes up to three faces, one per protocol role:
//!
//! - [`SchemeClient`] builds and signs payment payloads; it knows nothing
//!   about HTTP.
//! - [`SchemeServer`] turns route prices into payment requirements and
//!   enriches them with facilitator-provided extras.
//! - [`SchemeFacilitator`] verifies payloads and settles them on-ledger.
//!
//! All three are looked up through a [`SchemeRegistry`] keyed by the scheme
//! name plus a [`ChainIdPattern`]: an exact registration
//! (`exact`, `eip155:8453`) always shadows a family wildcard
//! (`exact`, `eip155:*`). There is no scheme wildcard.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use crate::chain::{ChainId, ChainIdPattern};
use crate::price::{AssetAmount, Price, PriceError};
use crate::proto;
use crate::proto::PaymentVerificationError;

/// The dispatch key of the protocol: a scheme name plus a concrete network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemeKind {
    /// Payment scheme name (e.g. "exact").
    pub scheme: String,
    /// CAIP-2 network.
    pub network: ChainId,
}

impl SchemeKind {
    /// Creates a kind from scheme name and network.
    pub fn new(scheme: impl Into<String>, network: ChainId) -> Self {
        Self {
            scheme: scheme.into(),
            network,
        }
    }
}

impl Display for SchemeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scheme, self.network)
    }
}

/// Errors from registry mutation.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Another implementation already claims this key.
    #[error("already registered: {scheme} on {pattern}")]
    AlreadyRegistered {
        /// Scheme name of the collision.
        scheme: String,
        /// Network pattern of the collision.
        pattern: ChainIdPattern,
    },
}

/// A registry from `(scheme, network pattern)` to one face of a scheme.
///
/// Lookup precedence, most to least specific:
///
/// 1. exact `(scheme, eip155:8453)`
/// 2. family wildcard `(scheme, eip155:*)`
///
/// Registration happens at startup; lookups are read-only and contention
/// free afterwards.
pub struct SchemeRegistry<T: ?Sized> {
    exact: HashMap<(String, ChainId), Arc<T>>,
    wildcard: HashMap<(String, String), Arc<T>>,
}

/// Registry of facilitator faces.
pub type FacilitatorRegistry = SchemeRegistry<dyn SchemeFacilitator>;
/// Registry of client faces.
pub type ClientRegistry = SchemeRegistry<dyn SchemeClient>;
/// Registry of server faces.
pub type ServerRegistry = SchemeRegistry<dyn SchemeServer>;

impl<T: ?Sized> Default for SchemeRegistry<T> {
    fn default() -> Self {
        Self {
            exact: HashMap::new(),
            wildcard: HashMap::new(),
        }
    }
}

impl<T: ?Sized> SchemeRegistry<T> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an implementation under a scheme name and network pattern.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AlreadyRegistered`] when the exact key is
    /// already taken.
    pub fn register(
        &mut self,
        scheme: impl Into<String>,
        pattern: ChainIdPattern,
        implementation: Arc<T>,
    ) -> Result<(), RegistryError> {
        let scheme = scheme.into();
        match &pattern {
            ChainIdPattern::Exact(chain_id) => {
                let key = (scheme.clone(), chain_id.clone());
                if self.exact.contains_key(&key) {
                    return Err(RegistryError::AlreadyRegistered { scheme, pattern });
                }
                self.exact.insert(key, implementation);
            }
            ChainIdPattern::Wildcard { namespace } => {
                let key = (scheme.clone(), namespace.clone());
                if self.wildcard.contains_key(&key) {
                    return Err(RegistryError::AlreadyRegistered { scheme, pattern });
                }
                self.wildcard.insert(key, implementation);
            }
        }
        Ok(())
    }

    /// Chained registration for startup wiring.
    pub fn and_register(
        mut self,
        scheme: impl Into<String>,
        pattern: ChainIdPattern,
        implementation: Arc<T>,
    ) -> Result<Self, RegistryError> {
        self.register(scheme, pattern, implementation)?;
        Ok(self)
    }

    /// Looks up the implementation for a concrete `(scheme, network)`:
    /// exact match first, family wildcard second.
    pub fn lookup(&self, scheme: &str, network: &ChainId) -> Option<Arc<T>> {
        if let Some(exact) = self
            .exact
            .get(&(scheme.to_string(), network.clone()))
        {
            return Some(Arc::clone(exact));
        }
        self.wildcard
            .get(&(scheme.to_string(), network.namespace.clone()))
            .map(Arc::clone)
    }

    /// Looks up by [`SchemeKind`].
    pub fn lookup_kind(&self, kind: &SchemeKind) -> Option<Arc<T>> {
        self.lookup(&kind.scheme, &kind.network)
    }

    /// All registered implementations, each once, registration order not
    /// guaranteed.
    pub fn values(&self) -> Vec<Arc<T>> {
        let mut seen: Vec<Arc<T>> = Vec::new();
        for implementation in self.exact.values().chain(self.wildcard.values()) {
            if !seen.iter().any(|s| Arc::ptr_eq(s, implementation)) {
                seen.push(Arc::clone(implementation));
            }
        }
        seen
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.wildcard.is_empty()
    }
}

/// Facilitator-side failures that are not business rejections.
///
/// Business rejections (bad signature, expired window, not enough funds)
/// come back as `Ok(VerifyResponse::Invalid { .. })`. This error type covers
/// what remains: malformed requests and ledger transport failures.
#[derive(Debug, thiserror::Error)]
pub enum SchemeFacilitatorError {
    /// Structural validation failed before scheme logic ran.
    #[error(transparent)]
    Verification(#[from] PaymentVerificationError),
    /// The ledger or its RPC could not be reached or errored out.
    #[error("ledger interaction failed: {0}")]
    Ledger(String),
}

/// The facilitator face of a payment scheme: verify and settle.
#[async_trait]
pub trait SchemeFacilitator: Send + Sync {
    /// Verifies a payment payload against requirements. Pure: no ledger
    /// writes, though balance reads and simulations are expected.
    async fn verify(
        &self,
        request: &proto::VerifyRequest,
    ) -> Result<proto::VerifyResponse, SchemeFacilitatorError>;

    /// Settles a verified payment on-ledger. Implementations re-verify
    /// before submitting.
    async fn settle(
        &self,
        request: &proto::SettleRequest,
    ) -> Result<proto::SettleResponse, SchemeFacilitatorError>;

    /// The payment kinds this face serves, plus its signer addresses.
    async fn supported(&self) -> proto::SupportedResponse;

    /// Scheme-specific extra data a seller should advertise for this
    /// network (e.g. the sponsoring fee payer address).
    async fn extra(&self, network: &ChainId) -> Option<serde_json::Value> {
        let _ = network;
        None
    }
}

/// Client-side payload construction failures.
#[derive(Debug, thiserror::Error)]
pub enum SchemeClientError {
    /// The requirements cannot be satisfied by this client face.
    #[error("unsupported requirements: {0}")]
    UnsupportedRequirements(String),
    /// Signing failed.
    #[error("signing failed: {0}")]
    Signing(String),
    /// Building the payload failed for another reason.
    #[error("payload construction failed: {0}")]
    Construction(String),
}

/// The client face of a payment scheme: build and sign a payload for one
/// accepted requirement. No HTTP here; header framing is the engine's job.
#[async_trait]
pub trait SchemeClient: Send + Sync {
    /// Constructs a signed [`proto::PaymentPayload`] satisfying the given
    /// requirements.
    async fn create_payment_payload(
        &self,
        requirements: &proto::PaymentRequirements,
    ) -> Result<proto::PaymentPayload, SchemeClientError>;
}

/// The server face of a payment scheme: price parsing and requirement
/// enrichment. Pure.
pub trait SchemeServer: Send + Sync {
    /// The scheme name this face serves.
    fn scheme(&self) -> &'static str;

    /// Converts a route price into an atomic asset amount on this network.
    fn parse_price(&self, price: &Price, network: &ChainId) -> Result<AssetAmount, PriceError>;

    /// Merges facilitator-advertised extras into the requirements. The
    /// default overlays `kind.extra` onto `requirements.extra`.
    fn enhance_requirements(
        &self,
        requirements: &mut proto::PaymentRequirements,
        kind: &proto::SupportedPaymentKind,
    ) {
        if let Some(extra) = &kind.extra {
            match &mut requirements.extra {
                Some(existing) => {
                    if let (Some(existing), Some(incoming)) =
                        (existing.as_object_mut(), extra.as_object())
                    {
                        for (key, value) in incoming {
                            existing.entry(key.clone()).or_insert(value.clone());
                        }
                    }
                }
                None => requirements.extra = Some(extra.clone()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tag(&'static str);

    trait Named: Send + Sync {
        fn name(&self) -> &'static str;
    }

    impl Named for Tag {
        fn name(&self) -> &'static str {
            self.0
        }
    }

    fn registry() -> SchemeRegistry<dyn Named> {
        let mut registry: SchemeRegistry<dyn Named> = SchemeRegistry::new();
        registry
            .register(
                "exact",
                ChainIdPattern::wildcard("eip155"),
                Arc::new(Tag("evm-wildcard")),
            )
            .unwrap();
        registry
            .register(
                "exact",
                ChainIdPattern::exact("eip155", "8453"),
                Arc::new(Tag("base-exact")),
            )
            .unwrap();
        registry
    }

    #[test]
    fn exact_beats_wildcard() {
        let registry = registry();
        let base = ChainId::new("eip155", "8453");
        assert_eq!(registry.lookup("exact", &base).unwrap().name(), "base-exact");
    }

    #[test]
    fn wildcard_covers_rest_of_family() {
        let registry = registry();
        let polygon = ChainId::new("eip155", "137");
        assert_eq!(
            registry.lookup("exact", &polygon).unwrap().name(),
            "evm-wildcard"
        );
    }

    #[test]
    fn miss_returns_none() {
        let registry = registry();
        let solana = ChainId::new("solana", "5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp");
        assert!(registry.lookup("exact", &solana).is_none());
        assert!(
            registry
                .lookup("permit", &ChainId::new("eip155", "8453"))
                .is_none()
        );
    }

    #[test]
    fn collision_is_rejected() {
        let mut registry = registry();
        let result = registry.register(
            "exact",
            ChainIdPattern::exact("eip155", "8453"),
            Arc::new(Tag("duplicate")),
        );
        assert!(matches!(
            result,
            Err(RegistryError::AlreadyRegistered { .. })
        ));
    }

    #[test]
    fn values_deduplicates() {
        let mut registry: SchemeRegistry<dyn Named> = SchemeRegistry::new();
        let shared: Arc<dyn Named> = Arc::new(Tag("shared"));
        registry
            .register("exact", ChainIdPattern::exact("eip155", "1"), Arc::clone(&shared))
            .unwrap();
        registry
            .register("exact", ChainIdPattern::exact("eip155", "2"), shared)
            .unwrap();
        assert_eq!(registry.values().len(), 1);
    }
}
