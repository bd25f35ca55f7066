//! Client face of the EVM "permit" scheme.
//!
//! Signing a permit needs the token's current `nonces(owner)` value, so
//! this client carries a read-only RPC connection alongside the signer.

use alloy_primitives::{Address, U256};
use alloy_provider::{Provider, RootProvider};
use alloy_signer::Signer;
use alloy_sol_types::{SolStruct, eip712_domain};
use async_trait::async_trait;
use serde_json::value::to_raw_value;
use tollgate_types::proto::{PaymentPayload, PaymentRequirements, X402Version};
use tollgate_types::scheme::{SchemeClient, SchemeClientError};
use tollgate_types::timestamp::UnixTimestamp;
use url::Url;

use crate::chain::contracts::{IErc20Permit, Permit};
use crate::exact::types::ExactEvmExtra;
use crate::permit::types::{PermitAuthorization, PermitDomain, PermitEvmPayload};

/// Signs "permit" payments with any Alloy [`Signer`].
pub struct PermitEvmClient<S> {
    signer: S,
    rpc: RootProvider,
}

impl<S> PermitEvmClient<S> {
    /// Creates a client around a signer and a read-only RPC endpoint.
    pub fn new(signer: S, rpc_url: Url) -> Self {
        Self {
            signer,
            rpc: RootProvider::new_http(rpc_url),
        }
    }
}

impl<S: Signer + Send + Sync> PermitEvmClient<S> {
    async fn sign_permit(
        &self,
        requirements: &PaymentRequirements,
    ) -> Result<PermitEvmPayload, SchemeClientError> {
        let chain_id: u64 = requirements
            .network
            .reference
            .parse()
            .map_err(|_| SchemeClientError::UnsupportedRequirements("non-eip155 network".into()))?;
        let asset: Address = requirements.asset.parse().map_err(|_| {
            SchemeClientError::UnsupportedRequirements("asset is not an EVM address".into())
        })?;
        let amount = requirements
            .parsed_amount()
            .map_err(|e| SchemeClientError::UnsupportedRequirements(e.to_string()))?;

        let extra = requirements.extra.clone().unwrap_or_default();
        let domain_extra: ExactEvmExtra = serde_json::from_value(extra.clone()).map_err(|_| {
            SchemeClientError::UnsupportedRequirements(
                "requirements carry no EIP-712 name/version".into(),
            )
        })?;
        // The facilitator's settlement signer, advertised through the
        // requirement's `spender` extra. Settlement runs `transferFrom`
        // from this account, so a requirement without one cannot be paid
        // over this scheme.
        let spender: Address = extra
            .get("spender")
            .and_then(|s| s.as_str())
            .ok_or_else(|| {
                SchemeClientError::UnsupportedRequirements(
                    "requirements carry no facilitator spender".into(),
                )
            })?
            .parse()
            .map_err(|_| {
                SchemeClientError::UnsupportedRequirements("spender is not an EVM address".into())
            })?;

        let owner = self.signer.address();
        let contract = IErc20Permit::new(asset, &self.rpc);
        let nonce = contract
            .nonces(owner)
            .call()
            .await
            .map_err(|e| SchemeClientError::Construction(e.to_string()))?;

        let deadline = UnixTimestamp::now() + requirements.max_timeout_seconds;
        let domain = eip712_domain! {
            name: domain_extra.name.clone(),
            version: domain_extra.version.clone(),
            chain_id: chain_id,
            verifying_contract: asset,
        };
        let message = Permit {
            owner,
            spender,
            value: U256::from(amount),
            nonce,
            deadline: U256::from(deadline.as_secs()),
        };
        let digest = message.eip712_signing_hash(&domain);
        let signature = self
            .signer
            .sign_hash(&digest)
            .await
            .map_err(|e| SchemeClientError::Signing(e.to_string()))?;

        Ok(PermitEvmPayload {
            signature: signature.as_bytes().into(),
            permit: PermitAuthorization {
                owner,
                spender,
                value: U256::from(amount),
                nonce,
                deadline,
                domain: PermitDomain {
                    name: domain_extra.name,
                    version: domain_extra.version,
                    chain_id,
                    verifying_contract: asset,
                },
            },
        })
    }
}

#[async_trait]
impl<S: Signer + Send + Sync> SchemeClient for PermitEvmClient<S> {
    async fn create_payment_payload(
        &self,
        requirements: &PaymentRequirements,
    ) -> Result<PaymentPayload, SchemeClientError> {
        let payload = self.sign_permit(requirements).await?;
        let raw = to_raw_value(&payload)
            .map_err(|e| SchemeClientError::Construction(e.to_string()))?;
        Ok(PaymentPayload {
            x402_version: X402Version::V2,
            scheme: requirements.scheme.clone(),
            network: requirements.network.clone(),
            payload: raw,
            accepted: Some(requirements.clone()),
            extensions: None,
        })
    }
}
