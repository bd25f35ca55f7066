//! Facilitator configuration: CLI flags backed by environment variables.
//!
//! Every chain is optional; the facilitator serves whatever is
//! configured. A `.env` file is honored at startup.

use clap::Parser;
use std::net::IpAddr;
use url::Url;

/// Command line and environment configuration.
#[derive(Debug, Parser)]
#[command(name = "tollgate-facilitator", about, version)]
pub struct Config {
    /// Bind address.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Bind port.
    #[arg(long, env = "PORT", default_value_t = 8402)]
    pub port: u16,

    // EVM
    /// EVM JSON-RPC endpoint.
    #[arg(long, env = "EVM_RPC_URL")]
    pub evm_rpc_url: Option<Url>,
    /// Numeric EIP-155 chain id for the EVM endpoint.
    #[arg(long, env = "EVM_CHAIN_ID")]
    pub evm_chain_id: Option<u64>,
    /// Hex private key settling EVM payments.
    #[arg(long, env = "PRIVATE_KEY", hide_env_values = true)]
    pub evm_private_key: Option<String>,

    // Solana
    /// Solana JSON-RPC endpoint.
    #[arg(long, env = "SOLANA_RPC_URL")]
    pub solana_rpc_url: Option<String>,
    /// CAIP-2 reference of the Solana cluster.
    #[arg(long, env = "SOLANA_REFERENCE")]
    pub solana_reference: Option<String>,
    /// Base58 keypair paying Solana fees.
    #[arg(long, env = "SOLANA_PRIVATE_KEY", hide_env_values = true)]
    pub solana_private_key: Option<String>,

    // Aptos
    /// Aptos fullnode REST endpoint (through `/v1/`).
    #[arg(long, env = "APTOS_REST_URL")]
    pub aptos_rest_url: Option<Url>,
    /// Aptos chain id byte (1 mainnet, 2 testnet).
    #[arg(long, env = "APTOS_CHAIN_ID")]
    pub aptos_chain_id: Option<u8>,
    /// Hex Ed25519 key sponsoring Aptos gas.
    #[arg(long, env = "APTOS_PRIVATE_KEY", hide_env_values = true)]
    pub aptos_private_key: Option<String>,

    // NEAR
    /// NEAR JSON-RPC endpoint.
    #[arg(long, env = "NEAR_RPC_URL")]
    pub near_rpc_url: Option<Url>,
    /// NEAR network: mainnet or testnet.
    #[arg(long, env = "NEAR_NETWORK")]
    pub near_network: Option<String>,
    /// NEAR relayer account id.
    #[arg(long, env = "NEAR_RELAYER_ID")]
    pub near_relayer_id: Option<String>,
    /// NEAR relayer key, `ed25519:`-prefixed base58.
    #[arg(long, env = "NEAR_RELAYER_KEY", hide_env_values = true)]
    pub near_relayer_key: Option<String>,

    // Hedera
    /// Hedera gateway URL.
    #[arg(long, env = "HEDERA_GATEWAY_URL")]
    pub hedera_gateway_url: Option<Url>,
    /// Hedera network: mainnet or testnet.
    #[arg(long, env = "HEDERA_NETWORK")]
    pub hedera_network: Option<String>,
    /// Hedera operator account, `shard.realm.num`.
    #[arg(long, env = "HEDERA_OPERATOR_ACCOUNT")]
    pub hedera_operator_account: Option<String>,

    // Hyperliquid
    /// Hyperliquid exchange endpoint.
    #[arg(long, env = "HYPERLIQUID_EXCHANGE_URL")]
    pub hyperliquid_exchange_url: Option<Url>,
    /// Hyperliquid info endpoint.
    #[arg(long, env = "HYPERLIQUID_INFO_URL")]
    pub hyperliquid_info_url: Option<Url>,
    /// Hyperliquid network: mainnet or testnet.
    #[arg(long, env = "HYPERLIQUID_NETWORK")]
    pub hyperliquid_network: Option<String>,

    // Lightning
    /// LND REST endpoint.
    #[arg(long, env = "LND_REST_URL")]
    pub lnd_rest_url: Option<Url>,
    /// Hex macaroon with invoice read permission.
    #[arg(long, env = "LND_MACAROON_HEX", hide_env_values = true)]
    pub lnd_macaroon_hex: Option<String>,
    /// Lightning network: mainnet, testnet, or signet.
    #[arg(long, env = "LIGHTNING_NETWORK", default_value = "mainnet")]
    pub lightning_network: String,

    // Cashu
    /// Cashu mint URL.
    #[arg(long, env = "CASHU_MINT_URL")]
    pub cashu_mint_url: Option<Url>,
}

impl Config {
    /// Loads configuration from CLI arguments and the environment.
    pub fn load() -> Self {
        Config::parse()
    }
}
