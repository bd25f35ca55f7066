//! CAIP-2 chain identifiers and match patterns.
//!
//! Every network in the protocol is keyed by a
//! [CAIP-2](https://standards.chainagnostic.org/CAIPs/caip-2) identifier of
//! the form `namespace:reference`, e.g. `eip155:8453` for Base or
//! `solana:5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp` for Solana mainnet. Protocol v1
//! used bare network names (`base`, `solana-devnet`); those are accepted on
//! deserialization through the alias table in [`crate::networks`] so that the
//! rest of the system only ever sees CAIP-2 keys.

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::fmt;
use std::str::FromStr;

use crate::networks;

/// A CAIP-2 compliant blockchain identifier.
///
/// # Serialization
///
/// Serializes to the colon-separated string form: `"eip155:8453"`.
/// Deserialization additionally accepts legacy v1 network names
/// (`"base-sepolia"`, `"near-mainnet"`, ...) and normalizes them, so a
/// `ChainId` in memory is always in canonical CAIP-2 form.
///
/// # Example
///
/// ```
/// use tollgate_types::chain::ChainId;
///
/// let base: ChainId = serde_json::from_str("\"eip155:8453\"").unwrap();
/// let alias: ChainId = serde_json::from_str("\"base\"").unwrap();
/// assert_eq!(base, alias);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChainId {
    /// The blockchain namespace (e.g., `eip155`, `solana`, `lightning`).
    pub namespace: String,
    /// The chain-specific reference (e.g., `8453`, `signet`).
    pub reference: String,
}

impl ChainId {
    /// Creates a new chain ID from namespace and reference components.
    pub fn new<N: Into<String>, R: Into<String>>(namespace: N, reference: R) -> Self {
        Self {
            namespace: namespace.into(),
            reference: reference.into(),
        }
    }

    /// Returns the namespace component of the chain ID.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the reference component of the chain ID.
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Resolves a wire-format network string: canonical CAIP-2 form first,
    /// legacy v1 network name second.
    pub fn normalize(s: &str) -> Result<Self, ChainIdFormatError> {
        if s.contains(':') {
            return s.parse();
        }
        networks::chain_id_by_network_name(s)
            .cloned()
            .ok_or_else(|| ChainIdFormatError(s.into()))
    }

    /// Returns the legacy v1 network name for this chain ID, if any.
    pub fn as_network_name(&self) -> Option<&'static str> {
        networks::network_name_by_chain_id(self)
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.reference)
    }
}

impl From<ChainId> for String {
    fn from(value: ChainId) -> Self {
        value.to_string()
    }
}

/// Error returned for a string that is neither CAIP-2 nor a known alias.
#[derive(Debug, thiserror::Error)]
#[error("invalid network identifier {0:?}")]
pub struct ChainIdFormatError(pub String);

impl FromStr for ChainId {
    type Err = ChainIdFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, reference) = s.split_once(':').ok_or(ChainIdFormatError(s.into()))?;
        if namespace.is_empty() || reference.is_empty() {
            return Err(ChainIdFormatError(s.into()));
        }
        Ok(ChainId {
            namespace: namespace.into(),
            reference: reference.into(),
        })
    }
}

impl Serialize for ChainId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ChainId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ChainId::normalize(&s).map_err(de::Error::custom)
    }
}

/// A pattern for matching chain IDs during scheme registration.
///
/// Exactly two forms exist:
///
/// - **Exact**: `eip155:8453` matches only Base
/// - **Wildcard**: `eip155:*` matches every chain in the `eip155` namespace
///
/// A wildcard over the scheme name is deliberately not expressible.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChainIdPattern {
    /// Matches any chain within the namespace.
    Wildcard {
        /// The namespace to match (e.g., `eip155`).
        namespace: String,
    },
    /// Matches exactly one chain.
    Exact(ChainId),
}

impl ChainIdPattern {
    /// Creates a wildcard pattern over a namespace.
    pub fn wildcard<S: Into<String>>(namespace: S) -> Self {
        Self::Wildcard {
            namespace: namespace.into(),
        }
    }

    /// Creates an exact pattern for one chain.
    pub fn exact<N: Into<String>, R: Into<String>>(namespace: N, reference: R) -> Self {
        Self::Exact(ChainId::new(namespace, reference))
    }

    /// Check whether a [`ChainId`] matches this pattern.
    pub fn matches(&self, chain_id: &ChainId) -> bool {
        match self {
            ChainIdPattern::Wildcard { namespace } => chain_id.namespace == *namespace,
            ChainIdPattern::Exact(exact) => exact == chain_id,
        }
    }

    /// Returns the namespace of this pattern.
    pub fn namespace(&self) -> &str {
        match self {
            ChainIdPattern::Wildcard { namespace } => namespace,
            ChainIdPattern::Exact(exact) => &exact.namespace,
        }
    }
}

impl fmt::Display for ChainIdPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainIdPattern::Wildcard { namespace } => write!(f, "{namespace}:*"),
            ChainIdPattern::Exact(exact) => write!(f, "{exact}"),
        }
    }
}

impl FromStr for ChainIdPattern {
    type Err = ChainIdFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, rest) = s.split_once(':').ok_or(ChainIdFormatError(s.into()))?;
        if namespace.is_empty() || rest.is_empty() {
            return Err(ChainIdFormatError(s.into()));
        }
        if rest == "*" {
            Ok(ChainIdPattern::wildcard(namespace))
        } else {
            Ok(ChainIdPattern::exact(namespace, rest))
        }
    }
}

impl Serialize for ChainIdPattern {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ChainIdPattern {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ChainIdPattern::from_str(&s).map_err(de::Error::custom)
    }
}

impl From<ChainId> for ChainIdPattern {
    fn from(chain_id: ChainId) -> Self {
        ChainIdPattern::Exact(chain_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_id_serializes_as_caip2() {
        let chain_id = ChainId::new("eip155", "8453");
        let serialized = serde_json::to_string(&chain_id).unwrap();
        assert_eq!(serialized, "\"eip155:8453\"");
    }

    #[test]
    fn chain_id_roundtrip() {
        let original = ChainId::new("solana", "5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp");
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: ChainId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(original, deserialized);
    }

    #[test]
    fn chain_id_accepts_legacy_alias() {
        let chain_id: ChainId = serde_json::from_str("\"base-sepolia\"").unwrap();
        assert_eq!(chain_id, ChainId::new("eip155", "84532"));

        let lightning: ChainId = serde_json::from_str("\"btc-lightning-signet\"").unwrap();
        assert_eq!(lightning, ChainId::new("lightning", "signet"));
    }

    #[test]
    fn chain_id_rejects_unknown_name() {
        let result: Result<ChainId, _> = serde_json::from_str("\"not-a-network\"");
        assert!(result.is_err());
    }

    #[test]
    fn chain_id_accepts_unknown_caip2() {
        let result: Result<ChainId, _> = serde_json::from_str("\"eip155:999999\"");
        assert!(result.is_ok());
    }

    #[test]
    fn pattern_wildcard_matches_namespace() {
        let pattern = ChainIdPattern::wildcard("eip155");
        assert!(pattern.matches(&ChainId::new("eip155", "1")));
        assert!(pattern.matches(&ChainId::new("eip155", "8453")));
        assert!(!pattern.matches(&ChainId::new("solana", "mainnet")));
    }

    #[test]
    fn pattern_exact_matches_single_chain() {
        let pattern = ChainIdPattern::exact("eip155", "8453");
        assert!(pattern.matches(&ChainId::new("eip155", "8453")));
        assert!(!pattern.matches(&ChainId::new("eip155", "137")));
    }

    #[test]
    fn pattern_parses_both_forms() {
        let wildcard: ChainIdPattern = "eip155:*".parse().unwrap();
        assert_eq!(wildcard, ChainIdPattern::wildcard("eip155"));

        let exact: ChainIdPattern = "eip155:8453".parse().unwrap();
        assert_eq!(exact, ChainIdPattern::exact("eip155", "8453"));
    }
}
