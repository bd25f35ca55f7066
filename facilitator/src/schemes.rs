//! Scheme registration: configuration to a populated registry.
//!
//! Every configured chain registers its facilitator face under its
//! `(scheme, network)` key. Misconfiguration of one chain fails startup
//! rather than silently serving a partial facilitator.

use std::sync::Arc;
use tollgate_types::chain::ChainIdPattern;
use tollgate_types::scheme::FacilitatorRegistry;

use tollgate_chain_aptos::{AptosChainConfig, AptosChainProvider, AptosExactFacilitator};
use tollgate_chain_cashu::{CashuMintConfig, CashuTokenFacilitator, RestCashuMint};
use tollgate_chain_eip155::{
    Eip155ChainConfig, Eip155ChainProvider, ExactEvmFacilitator, PermitEvmFacilitator,
};
use tollgate_chain_hedera::{
    HederaExactFacilitator, HederaGatewayConfig, RestHederaGateway,
};
use tollgate_chain_hyperliquid::{HyperliquidConfig, HyperliquidExactFacilitator};
use tollgate_chain_lightning::{LightningExactFacilitator, LndConfig, LndRestClient};
use tollgate_chain_near::{NearChainConfig, NearChainProvider, NearExactFacilitator};
use tollgate_chain_solana::{SolanaChainConfig, SolanaChainProvider, SolanaExactFacilitator};

use crate::config::Config;

/// Builds the facilitator registry from configuration.
pub fn build_registry(config: &Config) -> Result<FacilitatorRegistry, Box<dyn std::error::Error>> {
    let mut registry = FacilitatorRegistry::new();

    if let (Some(rpc_url), Some(chain_id), Some(key)) = (
        config.evm_rpc_url.clone(),
        config.evm_chain_id,
        config.evm_private_key.clone(),
    ) {
        let chain_config = Eip155ChainConfig {
            chain_id,
            rpc_url,
            signers: vec![key],
            eip1559: true,
            receipt_timeout_secs: 30,
        };
        let provider = Arc::new(Eip155ChainProvider::from_config(&chain_config)?);
        let network = ChainIdPattern::exact("eip155", chain_id.to_string());
        registry.register(
            "exact",
            network.clone(),
            Arc::new(ExactEvmFacilitator::new(Arc::clone(&provider))),
        )?;
        registry.register(
            "permit",
            network,
            Arc::new(PermitEvmFacilitator::new(provider)),
        )?;
    }

    if let (Some(rpc_url), Some(reference), Some(signer)) = (
        config.solana_rpc_url.clone(),
        config.solana_reference.clone(),
        config.solana_private_key.clone(),
    ) {
        let chain_config = SolanaChainConfig {
            reference: reference.clone(),
            rpc_url,
            signer,
            max_compute_unit_limit: 1_400_000,
            max_compute_unit_price: 1_000_000,
        };
        let provider = Arc::new(SolanaChainProvider::from_config(&chain_config));
        registry.register(
            "exact",
            ChainIdPattern::exact("solana", reference),
            Arc::new(SolanaExactFacilitator::new(provider)),
        )?;
    }

    if let (Some(rest_url), Some(chain_id), Some(signer)) = (
        config.aptos_rest_url.clone(),
        config.aptos_chain_id,
        config.aptos_private_key.clone(),
    ) {
        let chain_config = AptosChainConfig {
            chain_id,
            rest_url,
            signer,
            sponsored: true,
        };
        let provider = Arc::new(AptosChainProvider::from_config(&chain_config)?);
        registry.register(
            "exact",
            ChainIdPattern::exact("aptos", chain_id.to_string()),
            Arc::new(AptosExactFacilitator::new(provider)),
        )?;
    }

    if let (Some(rpc_url), Some(network), Some(relayer_id), Some(relayer_key)) = (
        config.near_rpc_url.clone(),
        config.near_network.clone(),
        config.near_relayer_id.clone(),
        config.near_relayer_key.clone(),
    ) {
        let chain_config = NearChainConfig {
            network: network.clone(),
            rpc_url,
            relayer_id,
            relayer_key,
        };
        let provider = Arc::new(NearChainProvider::from_config(&chain_config)?);
        registry.register(
            "exact",
            ChainIdPattern::exact("near", network),
            Arc::new(NearExactFacilitator::new(provider)),
        )?;
    }

    if let (Some(gateway_url), Some(network), Some(operator_account)) = (
        config.hedera_gateway_url.clone(),
        config.hedera_network.clone(),
        config.hedera_operator_account.clone(),
    ) {
        let gateway_config = HederaGatewayConfig {
            network: network.clone(),
            gateway_url,
            operator_account,
        };
        let gateway = Arc::new(RestHederaGateway::new(&gateway_config));
        registry.register(
            "exact",
            ChainIdPattern::exact("hedera", network),
            Arc::new(HederaExactFacilitator::new(gateway, &gateway_config)),
        )?;
    }

    if let (Some(exchange_url), Some(info_url), Some(network)) = (
        config.hyperliquid_exchange_url.clone(),
        config.hyperliquid_info_url.clone(),
        config.hyperliquid_network.clone(),
    ) {
        let hl_config: HyperliquidConfig = serde_json::from_value(serde_json::json!({
            "network": network,
            "exchangeUrl": exchange_url,
            "infoUrl": info_url,
        }))?;
        registry.register(
            "exact",
            ChainIdPattern::exact("hyperliquid", network),
            Arc::new(HyperliquidExactFacilitator::new(hl_config)),
        )?;
    }

    if let (Some(rest_url), Some(macaroon_hex)) = (
        config.lnd_rest_url.clone(),
        config.lnd_macaroon_hex.clone(),
    ) {
        let lnd_config = LndConfig {
            network: config.lightning_network.clone(),
            rest_url,
            macaroon_hex,
        };
        let lnd = Arc::new(LndRestClient::new(&lnd_config));
        registry.register(
            "exact",
            ChainIdPattern::exact("lightning", config.lightning_network.clone()),
            Arc::new(LightningExactFacilitator::new(lnd, &lnd_config)),
        )?;
    }

    if let Some(mint_url) = config.cashu_mint_url.clone() {
        let mint_config = CashuMintConfig {
            mint_url,
            unit: "sat".to_string(),
        };
        let mint = Arc::new(RestCashuMint::new(&mint_config));
        registry.register(
            "cashu-token",
            ChainIdPattern::exact("cashu", "mainnet"),
            Arc::new(CashuTokenFacilitator::new(mint, &mint_config)),
        )?;
    }

    Ok(registry)
}
