//! EVM chain plumbing: reference type, configuration, provider, contracts.

pub mod config;
pub mod contracts;
pub mod provider;

pub use config::Eip155ChainConfig;
pub use provider::{Eip155ChainProvider, MetaTransaction, MetaTransactionError};

use serde::{Deserialize, Serialize};
use std::fmt;
use tollgate_types::chain::ChainId;

/// A numeric EIP-155 chain id, e.g. `8453` for Base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Eip155ChainReference(pub u64);

impl Eip155ChainReference {
    /// The numeric chain id.
    pub fn inner(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Eip155ChainReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "eip155:{}", self.0)
    }
}

impl From<&Eip155ChainReference> for ChainId {
    fn from(value: &Eip155ChainReference) -> Self {
        ChainId::new("eip155", value.0.to_string())
    }
}

impl TryFrom<&ChainId> for Eip155ChainReference {
    type Error = Eip155ChainReferenceError;

    fn try_from(value: &ChainId) -> Result<Self, Self::Error> {
        if value.namespace != "eip155" {
            return Err(Eip155ChainReferenceError::WrongNamespace(value.clone()));
        }
        let id = value
            .reference
            .parse::<u64>()
            .map_err(|_| Eip155ChainReferenceError::BadReference(value.clone()))?;
        Ok(Eip155ChainReference(id))
    }
}

/// Errors converting a [`ChainId`] to an EIP-155 reference.
#[derive(Debug, thiserror::Error)]
pub enum Eip155ChainReferenceError {
    /// The chain id is not in the `eip155` namespace.
    #[error("not an eip155 chain: {0}")]
    WrongNamespace(ChainId),
    /// The reference is not a decimal chain id.
    #[error("invalid eip155 reference: {0}")]
    BadReference(ChainId),
}
