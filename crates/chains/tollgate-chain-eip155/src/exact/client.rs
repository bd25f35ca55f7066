//! Client face of the EVM "exact" scheme: signing ERC-3009 authorizations.

use alloy_primitives::{Address, B256, U256};
use alloy_signer::Signer;
use alloy_sol_types::{SolStruct, eip712_domain};
use async_trait::async_trait;
use rand::{Rng, rng};
use serde_json::value::to_raw_value;
use tollgate_types::proto::{PaymentPayload, PaymentRequirements, X402Version};
use tollgate_types::scheme::{SchemeClient, SchemeClientError};
use tollgate_types::timestamp::UnixTimestamp;

use crate::exact::types::{ExactEvmAuthorization, ExactEvmExtra, ExactEvmPayload};

/// How far in the past `validAfter` is set, to absorb clock skew between
/// client and chain.
const VALID_AFTER_SLACK_SECS: u64 = 10 * 60;

/// Signs "exact" payments with any Alloy [`Signer`].
pub struct ExactEvmClient<S> {
    signer: S,
}

impl<S> ExactEvmClient<S> {
    /// Creates a client around a signer.
    pub fn new(signer: S) -> Self {
        Self { signer }
    }
}

impl<S: Signer + Send + Sync> ExactEvmClient<S> {
    async fn sign_authorization(
        &self,
        requirements: &PaymentRequirements,
    ) -> Result<ExactEvmPayload, SchemeClientError> {
        let chain_id: u64 = requirements
            .network
            .reference
            .parse()
            .map_err(|_| SchemeClientError::UnsupportedRequirements("non-eip155 network".into()))?;
        let asset: Address = requirements.asset.parse().map_err(|_| {
            SchemeClientError::UnsupportedRequirements("asset is not an EVM address".into())
        })?;
        let pay_to: Address = requirements.pay_to.parse().map_err(|_| {
            SchemeClientError::UnsupportedRequirements("payTo is not an EVM address".into())
        })?;
        let amount = requirements
            .parsed_amount()
            .map_err(|e| SchemeClientError::UnsupportedRequirements(e.to_string()))?;
        let extra = requirements
            .extra
            .clone()
            .and_then(|e| serde_json::from_value::<ExactEvmExtra>(e).ok())
            .ok_or_else(|| {
                SchemeClientError::UnsupportedRequirements(
                    "requirements carry no EIP-712 name/version".into(),
                )
            })?;

        let domain = eip712_domain! {
            name: extra.name,
            version: extra.version,
            chain_id: chain_id,
            verifying_contract: asset,
        };

        let now = UnixTimestamp::now();
        let authorization = ExactEvmAuthorization {
            from: self.signer.address(),
            to: pay_to,
            value: U256::from(amount),
            valid_after: now - VALID_AFTER_SLACK_SECS,
            valid_before: now + requirements.max_timeout_seconds,
            nonce: B256::from(rng().random::<[u8; 32]>()),
        };

        let message = crate::chain::contracts::TransferWithAuthorization {
            from: authorization.from,
            to: authorization.to,
            value: authorization.value,
            validAfter: U256::from(authorization.valid_after.as_secs()),
            validBefore: U256::from(authorization.valid_before.as_secs()),
            nonce: authorization.nonce,
        };
        let digest = message.eip712_signing_hash(&domain);
        let signature = self
            .signer
            .sign_hash(&digest)
            .await
            .map_err(|e| SchemeClientError::Signing(e.to_string()))?;

        Ok(ExactEvmPayload {
            signature: signature.as_bytes().into(),
            authorization,
        })
    }
}

#[async_trait]
impl<S: Signer + Send + Sync> SchemeClient for ExactEvmClient<S> {
    async fn create_payment_payload(
        &self,
        requirements: &PaymentRequirements,
    ) -> Result<PaymentPayload, SchemeClientError> {
        let payload = self.sign_authorization(requirements).await?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Signature;
    use alloy_signer_local::PrivateKeySigner;
    use tollgate_types::chain::ChainId;

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
            extra: Some(serde_json::json!({"name": "USDC", "version": "2"})),
        }
    }

    #[tokio::test]
    async fn signs_a_recoverable_authorization() {
        let signer = PrivateKeySigner::random();
        let expected = signer.address();
        let client = ExactEvmClient::new(signer);
        let requirements = requirements();

        let payload = client.sign_authorization(&requirements).await.unwrap();
        assert_eq!(payload.authorization.from, expected);
        assert_eq!(payload.authorization.value, U256::from(1000u64));

        // The facilitator must recover the same address.
        let domain = eip712_domain! {
            name: "USDC",
            version: "2",
            chain_id: 84532u64,
            verifying_contract: requirements.asset.parse::<Address>().unwrap(),
        };
        let message = crate::chain::contracts::TransferWithAuthorization {
            from: payload.authorization.from,
            to: payload.authorization.to,
            value: payload.authorization.value,
            validAfter: U256::from(payload.authorization.valid_after.as_secs()),
            validBefore: U256::from(payload.authorization.valid_before.as_secs()),
            nonce: payload.authorization.nonce,
        };
        let digest = message.eip712_signing_hash(&domain);
        let signature = Signature::try_from(payload.signature.as_ref()).unwrap();
        let recovered = signature.recover_address_from_prehash(&digest).unwrap();
        assert_eq!(recovered, expected);
    }

    #[tokio::test]
    async fn payload_echoes_accepted_requirements() {
        let client = ExactEvmClient::new(PrivateKeySigner::random());
        let requirements = requirements();
        let payment = client.create_payment_payload(&requirements).await.unwrap();
        assert_eq!(payment.x402_version, X402Version::V2);
        assert_eq!(payment.scheme, "exact");
        assert_eq!(payment.accepted.as_ref(), Some(&requirements));
    }

    #[tokio::test]
    async fn refuses_requirements_without_domain_extra() {
        let client = ExactEvmClient::new(PrivateKeySigner::random());
        let mut requirements = requirements();
        requirements.extra = None;
        assert!(matches!(
            client.create_payment_payload(&requirements).await,
            Err(SchemeClientError::UnsupportedRequirements(_))
        ));
    }
}
