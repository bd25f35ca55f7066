//! Known networks: legacy name aliases and canonical stablecoin deployments.
//!
//! Protocol v1 identified networks by bare names (`base`, `solana-devnet`,
//! `near-mainnet`). This module keeps the alias table that maps those names
//! to their CAIP-2 form, plus a registry of canonical USDC deployments used
//! as the fallback asset when a route prices itself in dollars.
//!
//! The alias table is applied once, at wire ingress (see
//! [`ChainId::normalize`](crate::chain::ChainId::normalize)); everything past
//! the codec layer keys on CAIP-2 only.

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::chain::ChainId;

/// A known network with its legacy name and CAIP-2 components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    /// Legacy v1 network name (e.g., "base-sepolia", "near-mainnet").
    pub name: &'static str,
    /// CAIP-2 namespace (e.g., "eip155", "near").
    pub namespace: &'static str,
    /// Chain reference within the namespace.
    pub reference: &'static str,
}

impl NetworkInfo {
    /// Create a [`ChainId`] from this network info.
    pub fn chain_id(&self) -> ChainId {
        ChainId::new(self.namespace, self.reference)
    }
}

/// Registry of networks that have a legacy v1 name.
pub static KNOWN_NETWORKS: &[NetworkInfo] = &[
    // EVM
    NetworkInfo {
        name: "base",
        namespace: "eip155",
        reference: "8453",
    },
    NetworkInfo {
        name: "base-sepolia",
        namespace: "eip155",
        reference: "84532",
    },
    NetworkInfo {
        name: "polygon",
        namespace: "eip155",
        reference: "137",
    },
    NetworkInfo {
        name: "polygon-amoy",
        namespace: "eip155",
        reference: "80002",
    },
    NetworkInfo {
        name: "avalanche",
        namespace: "eip155",
        reference: "43114",
    },
    NetworkInfo {
        name: "avalanche-fuji",
        namespace: "eip155",
        reference: "43113",
    },
    NetworkInfo {
        name: "scroll",
        namespace: "eip155",
        reference: "534352",
    },
    // Solana
    NetworkInfo {
        name: "solana",
        namespace: "solana",
        reference: "5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp",
    },
    NetworkInfo {
        name: "solana-devnet",
        namespace: "solana",
        reference: "EtWTRABZaYq6iMfeYKouRu166VU2xqa1",
    },
    // Aptos
    NetworkInfo {
        name: "aptos",
        namespace: "aptos",
        reference: "1",
    },
    NetworkInfo {
        name: "aptos-testnet",
        namespace: "aptos",
        reference: "2",
    },
    // NEAR
    NetworkInfo {
        name: "near-mainnet",
        namespace: "near",
        reference: "mainnet",
    },
    NetworkInfo {
        name: "near-testnet",
        namespace: "near",
        reference: "testnet",
    },
    // Hedera
    NetworkInfo {
        name: "hedera-mainnet",
        namespace: "hedera",
        reference: "mainnet",
    },
    NetworkInfo {
        name: "hedera-testnet",
        namespace: "hedera",
        reference: "testnet",
    },
    // Hyperliquid
    NetworkInfo {
        name: "hyperliquid",
        namespace: "hyperliquid",
        reference: "mainnet",
    },
    NetworkInfo {
        name: "hyperliquid-testnet",
        namespace: "hyperliquid",
        reference: "testnet",
    },
    // Bitcoin Lightning
    NetworkInfo {
        name: "btc-lightning",
        namespace: "lightning",
        reference: "mainnet",
    },
    NetworkInfo {
        name: "btc-lightning-signet",
        namespace: "lightning",
        reference: "signet",
    },
    // Cashu
    NetworkInfo {
        name: "cashu",
        namespace: "cashu",
        reference: "mainnet",
    },
];

static NAME_TO_CHAIN_ID: LazyLock<HashMap<&'static str, ChainId>> = LazyLock::new(|| {
    KNOWN_NETWORKS
        .iter()
        .map(|n| (n.name, n.chain_id()))
        .collect()
});

static CHAIN_ID_TO_NAME: LazyLock<HashMap<ChainId, &'static str>> = LazyLock::new(|| {
    KNOWN_NETWORKS
        .iter()
        .map(|n| (n.chain_id(), n.name))
        .collect()
});

/// Look up a [`ChainId`] by its legacy v1 network name.
pub fn chain_id_by_network_name(name: &str) -> Option<&ChainId> {
    NAME_TO_CHAIN_ID.get(name)
}

/// Reverse lookup: legacy v1 network name for a [`ChainId`].
pub fn network_name_by_chain_id(chain_id: &ChainId) -> Option<&'static str> {
    CHAIN_ID_TO_NAME.get(chain_id).copied()
}

/// A canonical stablecoin deployment on one network.
///
/// Used as the fallback asset by the requirement builder when a route
/// declares a dollar price instead of an explicit asset amount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsdcDeployment {
    /// Network the token is deployed on.
    pub namespace: &'static str,
    /// Chain reference within the namespace.
    pub reference: &'static str,
    /// Token contract address or mint id, in the network's native format.
    pub address: &'static str,
    /// Token decimals.
    pub decimals: u32,
    /// EIP-712 domain name, for EVM deployments.
    pub eip712_name: Option<&'static str>,
    /// EIP-712 domain version, for EVM deployments.
    pub eip712_version: Option<&'static str>,
}

impl UsdcDeployment {
    /// Chain this deployment lives on.
    pub fn chain_id(&self) -> ChainId {
        ChainId::new(self.namespace, self.reference)
    }
}

/// Canonical USDC deployments per network.
pub static USDC_DEPLOYMENTS: &[UsdcDeployment] = &[
    UsdcDeployment {
        namespace: "eip155",
        reference: "8453",
        address: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
        decimals: 6,
        eip712_name: Some("USD Coin"),
        eip712_version: Some("2"),
    },
    UsdcDeployment {
        namespace: "eip155",
        reference: "84532",
        address: "0x036CbD53842c5426634e7929541eC2318f3dCF7e",
        decimals: 6,
        eip712_name: Some("USDC"),
        eip712_version: Some("2"),
    },
    UsdcDeployment {
        namespace: "eip155",
        reference: "137",
        address: "0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359",
        decimals: 6,
        eip712_name: Some("USD Coin"),
        eip712_version: Some("2"),
    },
    UsdcDeployment {
        namespace: "eip155",
        reference: "43114",
        address: "0xB97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E",
        decimals: 6,
        eip712_name: Some("USD Coin"),
        eip712_version: Some("2"),
    },
    UsdcDeployment {
        namespace: "eip155",
        reference: "534352",
        address: "0x06eFdBFf2a14a7c8E15944D1F4A48F9F95F663A4",
        decimals: 6,
        eip712_name: Some("USD Coin"),
        eip712_version: Some("2"),
    },
    UsdcDeployment {
        namespace: "solana",
        reference: "5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp",
        address: "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v",
        decimals: 6,
        eip712_name: None,
        eip712_version: None,
    },
    UsdcDeployment {
        namespace: "solana",
        reference: "EtWTRABZaYq6iMfeYKouRu166VU2xqa1",
        address: "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU",
        decimals: 6,
        eip712_name: None,
        eip712_version: None,
    },
    UsdcDeployment {
        namespace: "aptos",
        reference: "1",
        address: "0xbae207659db88bea0cbead6da0ed00aac12edcdda169e591cd41c94180b46f3b",
        decimals: 6,
        eip712_name: None,
        eip712_version: None,
    },
];

static USDC_BY_CHAIN_ID: LazyLock<HashMap<ChainId, &'static UsdcDeployment>> =
    LazyLock::new(|| {
        USDC_DEPLOYMENTS
            .iter()
            .map(|d| (d.chain_id(), d))
            .collect()
    });

/// Canonical USDC deployment for a network, if one is known.
pub fn usdc_deployment(chain_id: &ChainId) -> Option<&'static UsdcDeployment> {
    USDC_BY_CHAIN_ID.get(chain_id).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_lookup_covers_all_families() {
        let base = chain_id_by_network_name("base").unwrap();
        assert_eq!(base, &ChainId::new("eip155", "8453"));

        let near = chain_id_by_network_name("near-mainnet").unwrap();
        assert_eq!(near, &ChainId::new("near", "mainnet"));

        let signet = chain_id_by_network_name("btc-lightning-signet").unwrap();
        assert_eq!(signet, &ChainId::new("lightning", "signet"));

        assert!(chain_id_by_network_name("unknown").is_none());
    }

    #[test]
    fn reverse_lookup_returns_legacy_name() {
        let chain_id = ChainId::new("eip155", "84532");
        assert_eq!(network_name_by_chain_id(&chain_id), Some("base-sepolia"));

        let unknown = ChainId::new("eip155", "999999");
        assert!(network_name_by_chain_id(&unknown).is_none());
    }

    #[test]
    fn usdc_deployment_by_chain() {
        let base_sepolia = ChainId::new("eip155", "84532");
        let usdc = usdc_deployment(&base_sepolia).unwrap();
        assert_eq!(usdc.decimals, 6);
        assert_eq!(usdc.eip712_version, Some("2"));

        assert!(usdc_deployment(&ChainId::new("lightning", "signet")).is_none());
    }
}
