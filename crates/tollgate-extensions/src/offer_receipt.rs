//! Signed offers and receipts.
//!
//! The server signs the requirements it offers (the **offer**) and the
//! settlement it received (the **receipt**). Two formats exist, selected
//! by `SIGNING_FORMAT`:
//!
//! - `jws`: an EdDSA JWS whose `iss` is the server's DID. Verifiers
//!   resolve the key via `did:key`, `did:jwk`, or `did:web`.
//! - `eip712`: a typed-data style signature over the attestation digest;
//!   verifiers recover the signing address.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tollgate_types::extensions::PaymentExtension;
use tollgate_types::proto::{PaymentRequired, SettleResponse};

use alloy_primitives::keccak256;
use alloy_signer::Signer;

/// Extension key, as advertised in `/supported`.
pub const EXTENSION_KEY: &str = "offer-receipt";

/// Response header carrying the signed receipt.
pub const RECEIPT_HEADER: &str = "X-PAYMENT-RECEIPT";

/// How attestations are signed. Matches `SIGNING_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SigningFormat {
    /// EdDSA JWS with DID-resolvable keys.
    Jws,
    /// EIP-712 style signature, recoverable to an address.
    Eip712,
}

/// Attestation claims inside a JWS.
#[derive(Debug, Serialize, Deserialize)]
pub struct AttestationClaims {
    /// The signing party's DID.
    pub iss: String,
    /// Issued-at, seconds since epoch.
    pub iat: u64,
    /// The attested document: offer or receipt JSON.
    pub attested: serde_json::Value,
}

enum SigningScheme {
    Jws {
        encoding_key: EncodingKey,
        issuer: String,
    },
    Eip712 {
        signer: Arc<dyn Signer + Send + Sync>,
    },
}

/// Errors from signing or verification.
#[derive(Debug, thiserror::Error)]
pub enum AttestationError {
    /// JWS encode/decode failure.
    #[error(transparent)]
    Jwt(#[from] jsonwebtoken::errors::Error),
    /// The DID could not be resolved to a verification key.
    #[error("unresolvable did: {0}")]
    UnresolvableDid(String),
    /// EIP-712 signing failure.
    #[error("signing failed: {0}")]
    Signing(String),
    /// The document could not be serialized.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Signs offers into 402 responses and receipts onto paid responses.
pub struct OfferReceiptExtension {
    scheme: SigningScheme,
}

impl OfferReceiptExtension {
    /// A JWS-signing extension. `signing_key_pem` is an Ed25519 PKCS#8
    /// PEM (`SIGNING_PRIVATE_KEY`); `issuer` is the server's DID.
    pub fn jws(signing_key_pem: &[u8], issuer: impl Into<String>) -> Result<Self, AttestationError> {
        Ok(Self {
            scheme: SigningScheme::Jws {
                encoding_key: EncodingKey::from_ed_pem(signing_key_pem)?,
                issuer: issuer.into(),
            },
        })
    }

    /// An EIP-712-signing extension around any Alloy signer.
    pub fn eip712(signer: Arc<dyn Signer + Send + Sync>) -> Self {
        Self {
            scheme: SigningScheme::Eip712 { signer },
        }
    }

    async fn attest(&self, document: &serde_json::Value) -> Result<String, AttestationError> {
        match &self.scheme {
            SigningScheme::Jws {
                encoding_key,
                issuer,
            } => {
                let claims = AttestationClaims {
                    iss: issuer.clone(),
                    iat: SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .expect("SystemTime before UNIX epoch?!?")
                        .as_secs(),
                    attested: document.clone(),
                };
                let token = jsonwebtoken::encode(
                    &Header::new(Algorithm::EdDSA),
                    &claims,
                    encoding_key,
                )?;
                Ok(token)
            }
            SigningScheme::Eip712 { signer } => {
                let digest = attestation_digest(document)?;
                let signature = signer
                    .sign_hash(&digest)
                    .await
                    .map_err(|e| AttestationError::Signing(e.to_string()))?;
                Ok(format!(
                    "0x{}",
                    alloy_primitives::hex::encode(signature.as_bytes())
                ))
            }
        }
    }
}

/// The digest an EIP-712 attestation signs: a domain-separated hash over
/// the canonical JSON bytes.
pub fn attestation_digest(
    document: &serde_json::Value,
) -> Result<alloy_primitives::B256, AttestationError> {
    let domain = keccak256("x402-attestation:v1".as_bytes());
    let body = keccak256(serde_json::to_vec(document)?.as_slice());
    let mut preimage = Vec::with_capacity(2 + 64);
    preimage.extend_from_slice(&[0x19, 0x01]);
    preimage.extend_from_slice(domain.as_slice());
    preimage.extend_from_slice(body.as_slice());
    Ok(keccak256(&preimage))
}

#[async_trait]
impl PaymentExtension for OfferReceiptExtension {
    fn key(&self) -> &'static str {
        EXTENSION_KEY
    }

    async fn on_payment_required(&self, required: &mut PaymentRequired) {
        let document = match serde_json::to_value(&required.accepts) {
            Ok(document) => document,
            Err(error) => {
                tracing::warn!(error = %error, "offer serialization failed");
                return;
            }
        };
        match self.attest(&document).await {
            Ok(signed_offer) => {
                required
                    .extensions
                    .get_or_insert_with(Default::default)
                    .insert(
                        EXTENSION_KEY.to_string(),
                        serde_json::json!({ "signedOffer": signed_offer }),
                    );
            }
            Err(error) => tracing::warn!(error = %error, "offer signing failed"),
        }
    }

    async fn on_after_settlement(
        &self,
        response: &SettleResponse,
        headers: &mut Vec<(String, String)>,
    ) {
        let document = match serde_json::to_value(response) {
            Ok(document) => document,
            Err(error) => {
                tracing::warn!(error = %error, "receipt serialization failed");
                return;
            }
        };
        match self.attest(&document).await {
            Ok(signed_receipt) => {
                headers.push((RECEIPT_HEADER.to_string(), signed_receipt));
            }
            Err(error) => tracing::warn!(error = %error, "receipt signing failed"),
        }
    }
}

/// Resolves a DID to an Ed25519 decoding key.
///
/// Supported methods: `did:key` (multibase Ed25519), `did:jwk` (inline
/// JWK), `did:web` (fetched DID document).
pub async fn resolve_did_key(did: &str) -> Result<DecodingKey, AttestationError> {
    if let Some(multibase) = did.strip_prefix("did:key:") {
        let encoded = multibase
            .strip_prefix('z')
            .ok_or_else(|| AttestationError::UnresolvableDid(did.to_string()))?;
        let bytes = bs58::decode(encoded)
            .into_vec()
            .map_err(|_| AttestationError::UnresolvableDid(did.to_string()))?;
        // Multicodec prefix 0xed 0x01 tags an Ed25519 public key.
        let raw = bytes
            .strip_prefix(&[0xed, 0x01][..])
            .ok_or_else(|| AttestationError::UnresolvableDid(did.to_string()))?;
        return Ok(DecodingKey::from_ed_components(
            &URL_SAFE_NO_PAD.encode(raw),
        )?);
    }
    if let Some(encoded) = did.strip_prefix("did:jwk:") {
        let jwk_bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| AttestationError::UnresolvableDid(did.to_string()))?;
        let jwk: serde_json::Value = serde_json::from_slice(&jwk_bytes)?;
        let x = jwk
            .get("x")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AttestationError::UnresolvableDid(did.to_string()))?;
        return Ok(DecodingKey::from_ed_components(x)?);
    }
    if let Some(domain) = did.strip_prefix("did:web:") {
        let url = format!("https://{domain}/.well-known/did.json");
        let document: serde_json::Value = reqwest::get(&url)
            .await
            .map_err(|e| AttestationError::UnresolvableDid(e.to_string()))?
            .json()
            .await
            .map_err(|e| AttestationError::UnresolvableDid(e.to_string()))?;
        let x = document
            .get("verificationMethod")
            .and_then(|v| v.as_array())
            .and_then(|methods| methods.first())
            .and_then(|m| m.get("publicKeyJwk"))
            .and_then(|jwk| jwk.get("x"))
            .and_then(|x| x.as_str())
            .ok_or_else(|| AttestationError::UnresolvableDid(did.to_string()))?;
        return Ok(DecodingKey::from_ed_components(x)?);
    }
    Err(AttestationError::UnresolvableDid(did.to_string()))
}

/// Verifies a JWS attestation against the issuer's DID and returns its
/// claims.
pub async fn verify_jws_attestation(
    token: &str,
    issuer_did: &str,
) -> Result<AttestationClaims, AttestationError> {
    let key = resolve_did_key(issuer_did).await?;
    let mut validation = Validation::new(Algorithm::EdDSA);
    validation.validate_exp = false;
    validation.required_spec_claims.clear();
    let decoded = jsonwebtoken::decode::<AttestationClaims>(token, &key, &validation)?;
    Ok(decoded.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Signature;
    use alloy_signer_local::PrivateKeySigner;
    use ed25519_dalek::SigningKey;
    use ed25519_dalek::pkcs8::EncodePrivateKey;

    fn ed25519_fixture() -> (Vec<u8>, String) {
        let signing_key = SigningKey::from_bytes(&[7u8; 32]);
        let pem = signing_key
            .to_pkcs8_pem(Default::default())
            .unwrap()
            .to_string()
            .into_bytes();
        // did:key multibase: 0xed 0x01 prefix plus the raw public key.
        let mut prefixed = vec![0xed, 0x01];
        prefixed.extend_from_slice(signing_key.verifying_key().as_bytes());
        let did = format!("did:key:z{}", bs58::encode(prefixed).into_string());
        (pem, did)
    }

    #[tokio::test]
    async fn jws_offer_roundtrip() {
        let (pem, did) = ed25519_fixture();
        let extension = OfferReceiptExtension::jws(&pem, did.clone()).unwrap();

        let mut required = PaymentRequired {
            x402_version: tollgate_types::proto::X402Version::V2,
            accepts: vec![],
            error: None,
            resource: None,
            extensions: None,
        };
        extension.on_payment_required(&mut required).await;

        let token = required.extensions.unwrap()[EXTENSION_KEY]["signedOffer"]
            .as_str()
            .unwrap()
            .to_string();
        let claims = verify_jws_attestation(&token, &did).await.unwrap();
        assert_eq!(claims.iss, did);
        assert_eq!(claims.attested, serde_json::json!([]));
    }

    #[tokio::test]
    async fn jws_rejects_wrong_key() {
        let (pem, _) = ed25519_fixture();
        let extension = OfferReceiptExtension::jws(&pem, "did:key:zwrong").unwrap();

        let other_key = SigningKey::from_bytes(&[9u8; 32]);
        let mut prefixed = vec![0xed, 0x01];
        prefixed.extend_from_slice(other_key.verifying_key().as_bytes());
        let other_did = format!("did:key:z{}", bs58::encode(prefixed).into_string());

        let mut required = PaymentRequired {
            x402_version: tollgate_types::proto::X402Version::V2,
            accepts: vec![],
            error: None,
            resource: None,
            extensions: None,
        };
        extension.on_payment_required(&mut required).await;
        let token = required.extensions.unwrap()[EXTENSION_KEY]["signedOffer"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(verify_jws_attestation(&token, &other_did).await.is_err());
    }

    #[tokio::test]
    async fn eip712_receipt_recovers_to_signer() {
        let signer = PrivateKeySigner::random();
        let address = signer.address();
        let extension = OfferReceiptExtension::eip712(Arc::new(signer));

        let settlement = SettleResponse::Success {
            transaction: "0xabc".to_string(),
            network: tollgate_types::chain::ChainId::new("eip155", "84532"),
            payer: "0xabcd".to_string(),
        };
        let mut headers = Vec::new();
        extension.on_after_settlement(&settlement, &mut headers).await;
        let (name, signature_hex) = &headers[0];
        assert_eq!(name, RECEIPT_HEADER);

        let digest =
            attestation_digest(&serde_json::to_value(&settlement).unwrap()).unwrap();
        let bytes =
            alloy_primitives::hex::decode(signature_hex.strip_prefix("0x").unwrap()).unwrap();
        let signature = Signature::try_from(bytes.as_slice()).unwrap();
        assert_eq!(
            signature.recover_address_from_prehash(&digest).unwrap(),
            address
        );
    }
}
