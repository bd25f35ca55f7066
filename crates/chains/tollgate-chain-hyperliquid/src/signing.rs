//! EIP-712 hashing for `HyperliquidTransaction:SendAsset`.
//!
//! The type name carries a colon, which the `sol!` macro cannot express,
//! so the struct hash is assembled by hand against the exchange's domain
//! (`HyperliquidSignTransaction`, version 1, zero verifying contract).

use alloy_primitives::{Address, B256, U256, keccak256};
use alloy_sol_types::{Eip712Domain, eip712_domain};

use crate::exact::SendAssetAction;

const SEND_ASSET_TYPE: &str = "HyperliquidTransaction:SendAsset(string hyperliquidChain,string destination,string sourceDex,string destinationDex,string token,string amount,uint64 nonce)";

/// The signing domain for a given signature chain id.
pub fn domain(signature_chain_id: u64) -> Eip712Domain {
    eip712_domain! {
        name: "HyperliquidSignTransaction",
        version: "1",
        chain_id: signature_chain_id,
        verifying_contract: Address::ZERO,
    }
}

fn hash_string(s: &str) -> B256 {
    keccak256(s.as_bytes())
}

/// `hashStruct` of a [`SendAssetAction`].
pub fn send_asset_struct_hash(action: &SendAssetAction, nonce: u64) -> B256 {
    let type_hash = keccak256(SEND_ASSET_TYPE.as_bytes());
    let mut encoded = Vec::with_capacity(32 * 8);
    encoded.extend_from_slice(type_hash.as_slice());
    encoded.extend_from_slice(hash_string(&action.hyperliquid_chain).as_slice());
    encoded.extend_from_slice(hash_string(&action.destination).as_slice());
    encoded.extend_from_slice(hash_string(&action.source_dex).as_slice());
    encoded.extend_from_slice(hash_string(&action.destination_dex).as_slice());
    encoded.extend_from_slice(hash_string(&action.token).as_slice());
    encoded.extend_from_slice(hash_string(&action.amount).as_slice());
    encoded.extend_from_slice(U256::from(nonce).to_be_bytes::<32>().as_slice());
    keccak256(&encoded)
}

/// The digest a payer signs: `keccak256(0x1901 || domainSeparator ||
/// hashStruct)`.
pub fn send_asset_signing_digest(
    action: &SendAssetAction,
    nonce: u64,
    signature_chain_id: u64,
) -> B256 {
    let domain_separator = domain(signature_chain_id).separator();
    let struct_hash = send_asset_struct_hash(action, nonce);
    let mut preimage = Vec::with_capacity(2 + 32 + 32);
    preimage.extend_from_slice(&[0x19, 0x01]);
    preimage.extend_from_slice(domain_separator.as_slice());
    preimage.extend_from_slice(struct_hash.as_slice());
    keccak256(&preimage)
}
