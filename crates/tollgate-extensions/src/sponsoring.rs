//! EIP-2612 gas sponsoring via Permit2.
//!
//! A client may attach a permit under this extension's key granting the
//! canonical Permit2 contract an allowance, so the facilitator can settle
//! with `permitTransferFrom` instead of requiring a prior approval
//! transaction. This extension validates the attachment before
//! verification: the spender must be Permit2 itself and the signature
//! must recover to the payer.

use alloy_primitives::{Address, B256, Signature, U256, address, keccak256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tollgate_types::extensions::{HookOutcome, PaymentExtension};
use tollgate_types::proto::{PaymentPayload, PaymentRequirements};
use tollgate_types::timestamp::UnixTimestamp;

/// Extension key, as advertised in `/supported`.
pub const EXTENSION_KEY: &str = "eip2612-gas-sponsoring";

/// The canonical Permit2 deployment, identical on every chain.
pub const PERMIT2_ADDRESS: Address = address!("000000000022D473030F116dDEE9F6B43aC78BA3");

/// The permit a client attaches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsoringPermit {
    /// Token owner granting the allowance.
    pub owner: Address,
    /// Must be [`PERMIT2_ADDRESS`].
    pub spender: Address,
    /// Allowance value, decimal string.
    pub value: String,
    /// EIP-2612 nonce, decimal string.
    pub nonce: String,
    /// Permit deadline.
    pub deadline: UnixTimestamp,
    /// 65-byte signature, hex.
    pub signature: String,
}

/// Validates attached sponsoring permits.
pub struct GasSponsoringExtension {
    /// Numeric chain ids this server sponsors on.
    chain_ids: Vec<u64>,
}

impl GasSponsoringExtension {
    /// Creates the extension for the given EVM chains.
    pub fn new(chain_ids: Vec<u64>) -> Self {
        Self { chain_ids }
    }

    fn permit(payload: &PaymentPayload) -> Option<SponsoringPermit> {
        payload
            .extensions
            .as_ref()?
            .get(EXTENSION_KEY)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
    }

    fn validate(
        &self,
        permit: &SponsoringPermit,
        requirements: &PaymentRequirements,
    ) -> Result<(), &'static str> {
        if permit.spender != PERMIT2_ADDRESS {
            return Err("invalid_sponsoring_permit_spender");
        }
        let chain_id: u64 = requirements
            .network
            .reference
            .parse()
            .map_err(|_| "invalid_sponsoring_permit_network")?;
        if !self.chain_ids.contains(&chain_id) {
            return Err("invalid_sponsoring_permit_network");
        }
        if permit.deadline < UnixTimestamp::now() {
            return Err("invalid_sponsoring_permit_deadline");
        }

        let asset: Address = requirements
            .asset
            .parse()
            .map_err(|_| "invalid_sponsoring_permit_asset")?;
        let digest = permit_digest(permit, chain_id, asset)
            .ok_or("invalid_sponsoring_permit_signature")?;
        let sig_hex = permit.signature.strip_prefix("0x").unwrap_or(&permit.signature);
        let bytes = alloy_primitives::hex::decode(sig_hex)
            .map_err(|_| "invalid_sponsoring_permit_signature")?;
        let signature = Signature::try_from(bytes.as_slice())
            .map_err(|_| "invalid_sponsoring_permit_signature")?;
        let recovered = signature
            .recover_address_from_prehash(&digest)
            .map_err(|_| "invalid_sponsoring_permit_signature")?;
        if recovered != permit.owner {
            return Err("invalid_sponsoring_permit_signature");
        }
        Ok(())
    }
}

/// The EIP-2612 `Permit` digest under a plain token domain.
///
/// `name`/`version` are not known here, so the domain binds chain and
/// contract only; facilitators that settle through the permit re-derive
/// the full domain on-chain.
fn permit_digest(permit: &SponsoringPermit, chain_id: u64, asset: Address) -> Option<B256> {
    const PERMIT_TYPE: &str =
        "Permit(address owner,address spender,uint256 value,uint256 nonce,uint256 deadline)";
    const DOMAIN_TYPE: &str = "EIP712Domain(uint256 chainId,address verifyingContract)";

    let value = U256::from_str_radix(&permit.value, 10).ok()?;
    let nonce = U256::from_str_radix(&permit.nonce, 10).ok()?;

    let mut domain = Vec::with_capacity(32 * 3);
    domain.extend_from_slice(keccak256(DOMAIN_TYPE.as_bytes()).as_slice());
    domain.extend_from_slice(U256::from(chain_id).to_be_bytes::<32>().as_slice());
    domain.extend_from_slice(B256::left_padding_from(asset.as_slice()).as_slice());
    let domain_separator = keccak256(&domain);

    let mut body = Vec::with_capacity(32 * 6);
    body.extend_from_slice(keccak256(PERMIT_TYPE.as_bytes()).as_slice());
    body.extend_from_slice(B256::left_padding_from(permit.owner.as_slice()).as_slice());
    body.extend_from_slice(B256::left_padding_from(permit.spender.as_slice()).as_slice());
    body.extend_from_slice(value.to_be_bytes::<32>().as_slice());
    body.extend_from_slice(nonce.to_be_bytes::<32>().as_slice());
    body.extend_from_slice(
        U256::from(permit.deadline.as_secs())
            .to_be_bytes::<32>()
            .as_slice(),
    );
    let struct_hash = keccak256(&body);

    let mut preimage = Vec::with_capacity(2 + 64);
    preimage.extend_from_slice(&[0x19, 0x01]);
    preimage.extend_from_slice(domain_separator.as_slice());
    preimage.extend_from_slice(struct_hash.as_slice());
    Some(keccak256(&preimage))
}

#[async_trait]
impl PaymentExtension for GasSponsoringExtension {
    fn key(&self) -> &'static str {
        EXTENSION_KEY
    }

    async fn on_before_verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> HookOutcome {
        let Some(permit) = Self::permit(payload) else {
            return HookOutcome::Continue;
        };
        match self.validate(&permit, requirements) {
            Ok(()) => HookOutcome::Continue,
            Err(reason) => HookOutcome::abort(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_signer::SignerSync;
    use alloy_signer_local::PrivateKeySigner;
    use tollgate_types::chain::ChainId;
    use tollgate_types::proto::X402Version;

    fn requirements() -> PaymentRequirements {
        PaymentRequirements {
            scheme: "exact".to_string(),
            network: ChainId::new("eip155", "84532"),
            pay_to: "0xBAc675C310721717Cd4A37F6cbeA1F081b1C2a07".to_string(),
            asset: "0x036CbD53842c5426634e7929541eC2318f3dCF7e".to_string(),
            amount: "1000".to_string(),
            max_timeout_seconds: 300,
            description: String::new(),
            mime_type: "application/json".to_string(),
            resource: None,
            output_schema: None,
            extra: None,
        }
    }

    fn signed_permit(signer: &PrivateKeySigner, spender: Address) -> SponsoringPermit {
        let mut permit = SponsoringPermit {
            owner: signer.address(),
            spender,
            value: "1000".to_string(),
            nonce: "0".to_string(),
            deadline: UnixTimestamp::now() + 600,
            signature: String::new(),
        };
        let digest = permit_digest(
            &permit,
            84532,
            requirements().asset.parse().unwrap(),
        )
        .unwrap();
        let signature = signer.sign_hash_sync(&digest).unwrap();
        permit.signature = format!("0x{}", alloy_primitives::hex::encode(signature.as_bytes()));
        permit
    }

    fn payload_with(permit: &SponsoringPermit) -> PaymentPayload {
        let mut extensions = std::collections::BTreeMap::new();
        extensions.insert(
            EXTENSION_KEY.to_string(),
            serde_json::to_value(permit).unwrap(),
        );
        PaymentPayload {
            x402_version: X402Version::V2,
            scheme: "exact".to_string(),
            network: ChainId::new("eip155", "84532"),
            payload: serde_json::value::to_raw_value(&serde_json::json!({})).unwrap(),
            accepted: Some(requirements()),
            extensions: Some(extensions),
        }
    }

    #[tokio::test]
    async fn valid_permit_continues() {
        let signer = PrivateKeySigner::random();
        let permit = signed_permit(&signer, PERMIT2_ADDRESS);
        let extension = GasSponsoringExtension::new(vec![84532]);
        assert!(matches!(
            extension
                .on_before_verify(&payload_with(&permit), &requirements())
                .await,
            HookOutcome::Continue
        ));
    }

    #[tokio::test]
    async fn wrong_spender_aborts() {
        let signer = PrivateKeySigner::random();
        let permit = signed_permit(&signer, Address::repeat_byte(0x99));
        let extension = GasSponsoringExtension::new(vec![84532]);
        match extension
            .on_before_verify(&payload_with(&permit), &requirements())
            .await
        {
            HookOutcome::Abort { reason, .. } => {
                assert_eq!(reason, "invalid_sponsoring_permit_spender");
            }
            other => panic!("expected abort, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn tampered_value_breaks_recovery() {
        let signer = PrivateKeySigner::random();
        let mut permit = signed_permit(&signer, PERMIT2_ADDRESS);
        permit.value = "999999".to_string();
        let extension = GasSponsoringExtension::new(vec![84532]);
        match extension
            .on_before_verify(&payload_with(&permit), &requirements())
            .await
        {
            HookOutcome::Abort { reason, .. } => {
                assert_eq!(reason, "invalid_sponsoring_permit_signature");
            }
            other => panic!("expected abort, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn absent_permit_is_ignored() {
        let extension = GasSponsoringExtension::new(vec![84532]);
        let payload = PaymentPayload {
            x402_version: X402Version::V2,
            scheme: "exact".to_string(),
            network: ChainId::new("eip155", "84532"),
            payload: serde_json::value::to_raw_value(&serde_json::json!({})).unwrap(),
            accepted: Some(requirements()),
            extensions: None,
        };
        assert!(matches!(
            extension.on_before_verify(&payload, &requirements()).await,
            HookOutcome::Continue
        ));
    }
}
