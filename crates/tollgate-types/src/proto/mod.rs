//! Wire format types for x402 protocol messages.
//!
//! Everything that crosses the HTTP boundary lives here: the payment
//! requirements a server advertises, the payload a client signs, the
//! verify/settle exchange with a facilitator, and the stable error tags that
//! ride along when something fails.
//!
//! # Protocol versions
//!
//! Version 2 is current; version 1 is accepted for back-compat. The two
//! differ on the wire in how networks are named (v1 network names vs CAIP-2
//! chain IDs, normalized at ingress by [`ChainId`]) and in the v2 `accepted`
//! echo, which lets a facilitator confirm the buyer agreed to the exact
//! terms it is asked to verify.
//!
//! # Wire format
//!
//! All types serialize to JSON with camelCase field names. `decode(encode(x))
//! == x` holds for every valid value; anything that fails structural
//! validation surfaces as [`ErrorReason::InvalidPayload`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_with::{VecSkipError, serde_as};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fmt::{Display, Formatter};
use url::Url;

use crate::chain::ChainId;
use crate::scheme::SchemeKind;

pub mod error;
pub use error::{ErrorReason, PaymentVerificationError};

/// x402 protocol version tag.
///
/// Serializes as a bare integer (`1` or `2`). Any other number is rejected
/// with `invalid_x402_version` at the decode layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum X402Version {
    /// Original protocol: network names, no accepted echo.
    V1,
    /// Current protocol: CAIP-2 networks, accepted echo, extension map.
    V2,
}

impl X402Version {
    /// The numeric wire value.
    pub fn as_u8(&self) -> u8 {
        match self {
            X402Version::V1 => 1,
            X402Version::V2 => 2,
        }
    }
}

impl Default for X402Version {
    fn default() -> Self {
        X402Version::V2
    }
}

impl Display for X402Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

impl Serialize for X402Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for X402Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            1 => Ok(X402Version::V1),
            2 => Ok(X402Version::V2),
            other => Err(serde::de::Error::custom(format!(
                "unsupported x402 version {other}"
            ))),
        }
    }
}

/// One accepted payment option, as advertised in a 402 response.
///
/// Immutable once built for a request. The `amount` is always atomic token
/// units as a decimal integer string; conversion from human prices happens
/// in the requirement builder, never here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    /// Payment scheme name (e.g. "exact", "permit", "cashu-token").
    pub scheme: String,
    /// CAIP-2 network the payment settles on.
    pub network: ChainId,
    /// Recipient address in the network's native format.
    pub pay_to: String,
    /// Token contract / mint / asset identifier.
    pub asset: String,
    /// Amount in atomic units, as a decimal integer string.
    pub amount: String,
    /// Upper bound on how long verification plus settlement may take.
    pub max_timeout_seconds: u64,
    /// Human-readable description of what is being bought.
    #[serde(default)]
    pub description: String,
    /// MIME type of the protected resource.
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    /// URL of the protected resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Url>,
    /// JSON schema of the response body, when the seller publishes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
    /// Scheme-specific extras: EIP-712 name/version, feePayer, and so on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

fn default_mime_type() -> String {
    "application/json".to_string()
}

impl PaymentRequirements {
    /// Parses `amount` under the wire invariant: a non-negative decimal
    /// integer string, no sign, no decimals, no leading junk.
    pub fn parsed_amount(&self) -> Result<u128, PaymentVerificationError> {
        parse_atomic_amount(&self.amount)
    }

    /// The `(scheme, network)` key this requirement dispatches on.
    pub fn kind(&self) -> SchemeKind {
        SchemeKind {
            scheme: self.scheme.clone(),
            network: self.network.clone(),
        }
    }
}

/// Parses an atomic amount string: digits only, non-empty, within u128.
pub fn parse_atomic_amount(s: &str) -> Result<u128, PaymentVerificationError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PaymentVerificationError::InvalidAmount(s.to_string()));
    }
    s.parse::<u128>()
        .map_err(|_| PaymentVerificationError::InvalidAmount(s.to_string()))
}

/// Body of an HTTP 402 response.
///
/// Also rides base64-encoded in the `PAYMENT-REQUIRED` response header so
/// programmatic clients never have to parse an HTML paywall body.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    /// Protocol version of this offer.
    pub x402_version: X402Version,
    /// Accepted payment options. Non-empty for a well-formed 402.
    #[serde_as(as = "VecSkipError<_>")]
    pub accepts: Vec<PaymentRequirements>,
    /// Stable error tag when the 402 is a rejection rather than an offer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// URL of the protected resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Url>,
    /// Extension key to extension-defined data (e.g. a signed offer).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<BTreeMap<String, serde_json::Value>>,
}

/// A signed payment from the buyer.
///
/// `payload` is scheme-opaque: the generic parameter defaults to raw JSON so
/// the core can route without understanding it, and scheme crates
/// re-deserialize with their concrete payload type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload<TPayload = Box<serde_json::value::RawValue>> {
    /// Protocol version the client speaks.
    pub x402_version: X402Version,
    /// Payment scheme name.
    pub scheme: String,
    /// CAIP-2 network, normalized at ingress.
    pub network: ChainId,
    /// Scheme-specific signed payload.
    pub payload: TPayload,
    /// V2: the requirements the buyer accepted, echoed back verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted: Option<PaymentRequirements>,
    /// Extension key to extension-defined data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<BTreeMap<String, serde_json::Value>>,
}

impl<TPayload> PaymentPayload<TPayload> {
    /// Checks the payload targets the given requirement: same scheme, same
    /// (CAIP-2 normalized) network, and on v2 an `accepted` echo equal to
    /// the requirement.
    pub fn ensure_matches(
        &self,
        requirements: &PaymentRequirements,
    ) -> Result<(), PaymentVerificationError> {
        if self.scheme != requirements.scheme {
            return Err(PaymentVerificationError::SchemeMismatch {
                payload: self.scheme.clone(),
                requirements: requirements.scheme.clone(),
            });
        }
        if self.network != requirements.network {
            return Err(PaymentVerificationError::NetworkMismatch {
                payload: self.network.clone(),
                requirements: requirements.network.clone(),
            });
        }
        if self.x402_version == X402Version::V2 {
            match &self.accepted {
                Some(accepted) if accepted == requirements => {}
                _ => return Err(PaymentVerificationError::AcceptedRequirementsMismatch),
            }
        }
        Ok(())
    }
}

/// Request body for `POST /verify` and `POST /settle`.
///
/// Held as raw JSON so the facilitator can route on `(scheme, network)`
/// before any scheme-specific deserialization happens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequest(Box<serde_json::value::RawValue>);

/// Settlement uses the same body as verification.
pub type SettleRequest = VerifyRequest;

impl From<Box<serde_json::value::RawValue>> for VerifyRequest {
    fn from(value: Box<serde_json::value::RawValue>) -> Self {
        Self(value)
    }
}

impl VerifyRequest {
    /// The raw JSON text of the request.
    pub fn as_str(&self) -> &str {
        self.0.get()
    }

    /// Builds a request from a typed body.
    pub fn from_body<TPayload: Serialize>(
        body: &VerifyRequestBody<TPayload>,
    ) -> Result<Self, serde_json::Error> {
        let raw = serde_json::value::to_raw_value(body)?;
        Ok(Self(raw))
    }

    /// Extracts the `(scheme, network)` key that selects the scheme handler.
    ///
    /// Returns `None` if the request is structurally invalid or names an
    /// unknown network.
    pub fn scheme_kind(&self) -> Option<SchemeKind> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Probe {
            payment_payload: ProbePayload,
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct ProbePayload {
            scheme: String,
            network: ChainId,
        }

        let probe = serde_json::from_str::<Probe>(self.as_str()).ok()?;
        Some(SchemeKind {
            scheme: probe.payment_payload.scheme,
            network: probe.payment_payload.network,
        })
    }

    /// Re-deserializes with a scheme-typed body.
    pub fn deserialize_as<T: DeserializeOwned>(&self) -> Result<T, PaymentVerificationError> {
        serde_json::from_str(self.as_str())
            .map_err(|e| PaymentVerificationError::InvalidFormat(e.to_string()))
    }
}

/// Typed view of a verify/settle request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequestBody<TPayload = Box<serde_json::value::RawValue>> {
    /// The signed payment.
    pub payment_payload: PaymentPayload<TPayload>,
    /// The requirements to verify against.
    pub payment_requirements: PaymentRequirements,
}

/// Result of payment verification.
#[derive(Debug, Clone, PartialEq)]
pub enum VerifyResponse {
    /// The payload passes every check.
    Valid {
        /// Payer identity recovered from the payload.
        payer: String,
    },
    /// The payload was recognized but rejected.
    Invalid {
        /// Stable machine-readable tag from the scheme's closed set.
        reason: String,
        /// Payer identity, when recoverable despite the failure.
        payer: Option<String>,
    },
}

impl VerifyResponse {
    /// A passing verification for the given payer.
    pub fn valid(payer: impl Into<String>) -> Self {
        VerifyResponse::Valid {
            payer: payer.into(),
        }
    }

    /// A failing verification with a stable reason tag.
    pub fn invalid(reason: impl Into<String>, payer: Option<String>) -> Self {
        VerifyResponse::Invalid {
            reason: reason.into(),
            payer,
        }
    }

    /// True for [`VerifyResponse::Valid`].
    pub fn is_valid(&self) -> bool {
        matches!(self, VerifyResponse::Valid { .. })
    }

    /// The payer, when one was identified.
    pub fn payer(&self) -> Option<&str> {
        match self {
            VerifyResponse::Valid { payer } => Some(payer),
            VerifyResponse::Invalid { payer, .. } => payer.as_deref(),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyResponseWire {
    is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    invalid_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payer: Option<String>,
}

impl Serialize for VerifyResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let wire = match self {
            VerifyResponse::Valid { payer } => VerifyResponseWire {
                is_valid: true,
                invalid_reason: None,
                payer: Some(payer.clone()),
            },
            VerifyResponse::Invalid { reason, payer } => VerifyResponseWire {
                is_valid: false,
                invalid_reason: Some(reason.clone()),
                payer: payer.clone(),
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for VerifyResponse {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = VerifyResponseWire::deserialize(deserializer)?;
        if wire.is_valid {
            let payer = wire
                .payer
                .ok_or_else(|| serde::de::Error::missing_field("payer"))?;
            Ok(VerifyResponse::Valid { payer })
        } else {
            let reason = wire
                .invalid_reason
                .ok_or_else(|| serde::de::Error::missing_field("invalidReason"))?;
            Ok(VerifyResponse::Invalid {
                reason,
                payer: wire.payer,
            })
        }
    }
}

/// Result of payment settlement.
#[derive(Debug, Clone, PartialEq)]
pub enum SettleResponse {
    /// The payment landed on the ledger.
    Success {
        /// Chain-specific settlement identifier: tx hash, signature,
        /// invoice payment hash.
        transaction: String,
        /// Network the settlement happened on.
        network: ChainId,
        /// Payer identity.
        payer: String,
    },
    /// Settlement failed; nothing was (knowingly) transferred.
    Error {
        /// Stable machine-readable tag.
        reason: String,
        /// Network the settlement was attempted on.
        network: ChainId,
        /// Payer identity, when known.
        payer: Option<String>,
    },
}

impl SettleResponse {
    /// True for [`SettleResponse::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, SettleResponse::Success { .. })
    }

    /// The network this settlement relates to.
    pub fn network(&self) -> &ChainId {
        match self {
            SettleResponse::Success { network, .. } => network,
            SettleResponse::Error { network, .. } => network,
        }
    }

    /// The payer, when one was identified.
    pub fn payer(&self) -> Option<&str> {
        match self {
            SettleResponse::Success { payer, .. } => Some(payer),
            SettleResponse::Error { payer, .. } => payer.as_deref(),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettleResponseWire {
    success: bool,
    #[serde(default)]
    transaction: String,
    network: ChainId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_reason: Option<String>,
}

impl Serialize for SettleResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let wire = match self {
            SettleResponse::Success {
                transaction,
                network,
                payer,
            } => SettleResponseWire {
                success: true,
                transaction: transaction.clone(),
                network: network.clone(),
                payer: Some(payer.clone()),
                error_reason: None,
            },
            SettleResponse::Error {
                reason,
                network,
                payer,
            } => SettleResponseWire {
                success: false,
                transaction: String::new(),
                network: network.clone(),
                payer: payer.clone(),
                error_reason: Some(reason.clone()),
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SettleResponse {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = SettleResponseWire::deserialize(deserializer)?;
        if wire.success {
            Ok(SettleResponse::Success {
                transaction: wire.transaction,
                network: wire.network,
                payer: wire.payer.unwrap_or_default(),
            })
        } else {
            let reason = wire
                .error_reason
                .ok_or_else(|| serde::de::Error::missing_field("errorReason"))?;
            Ok(SettleResponse::Error {
                reason,
                network: wire.network,
                payer: wire.payer,
            })
        }
    }
}

/// One payment method a facilitator supports.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SupportedPaymentKind {
    /// Protocol version the facilitator speaks for this kind.
    pub x402_version: u8,
    /// Payment scheme name.
    pub scheme: String,
    /// Network, in CAIP-2 form.
    pub network: ChainId,
    /// Scheme-specific extra data a seller should merge into its
    /// requirements (e.g. the facilitator's fee payer address).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// Response from a facilitator's `GET /supported` endpoint.
#[serde_as]
#[derive(Clone, Default, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedResponse {
    /// Payment kinds the facilitator can verify and settle.
    #[serde_as(as = "VecSkipError<_>")]
    pub kinds: Vec<SupportedPaymentKind>,
    /// Protocol extensions the facilitator understands.
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Chain id to facilitator signer addresses on that chain.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub signers: HashMap<ChainId, Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requirements() -> PaymentRequirements {
        PaymentRequirements {
            scheme: "exact".to_string(),
            network: ChainId::new("eip155", "84532"),
            pay_to: "0xBAc675C310721717Cd4A37F6cbeA1F081b1C2a07".to_string(),
            asset: "0x036CbD53842c5426634e7929541eC2318f3dCF7e".to_string(),
            amount: "1000".to_string(),
            max_timeout_seconds: 300,
            description: "test".to_string(),
            mime_type: "application/json".to_string(),
            resource: None,
            output_schema: None,
            extra: Some(serde_json::json!({"name": "USDC", "version": "2"})),
        }
    }

    #[test]
    fn requirements_roundtrip() {
        let original = requirements();
        let json = serde_json::to_string(&original).unwrap();
        let back: PaymentRequirements = serde_json::from_str(&json).unwrap();
        assert_eq!(original, back);
    }

    #[test]
    fn requirements_use_camel_case() {
        let json = serde_json::to_value(requirements()).unwrap();
        assert!(json.get("payTo").is_some());
        assert!(json.get("maxTimeoutSeconds").is_some());
        assert!(json.get("mimeType").is_some());
    }

    #[test]
    fn amount_invariant() {
        let mut req = requirements();
        assert_eq!(req.parsed_amount().unwrap(), 1000);

        req.amount = "-5".to_string();
        assert!(req.parsed_amount().is_err());
        req.amount = "1.5".to_string();
        assert!(req.parsed_amount().is_err());
        req.amount = "".to_string();
        assert!(req.parsed_amount().is_err());
        req.amount = "0".to_string();
        assert_eq!(req.parsed_amount().unwrap(), 0);
    }

    #[test]
    fn payload_matching() {
        let req = requirements();
        let payload: PaymentPayload<serde_json::Value> = PaymentPayload {
            x402_version: X402Version::V2,
            scheme: "exact".to_string(),
            network: req.network.clone(),
            payload: serde_json::json!({}),
            accepted: Some(req.clone()),
            extensions: None,
        };
        assert!(payload.ensure_matches(&req).is_ok());

        let mut wrong_scheme = payload.clone();
        wrong_scheme.scheme = "permit".to_string();
        assert!(wrong_scheme.ensure_matches(&req).is_err());

        let mut no_echo = payload.clone();
        no_echo.accepted = None;
        assert!(no_echo.ensure_matches(&req).is_err());

        let mut v1 = payload;
        v1.x402_version = X402Version::V1;
        v1.accepted = None;
        assert!(v1.ensure_matches(&req).is_ok());
    }

    #[test]
    fn verify_response_wire_shape() {
        let valid = VerifyResponse::valid("0xabcd");
        let json = serde_json::to_value(&valid).unwrap();
        assert_eq!(json["isValid"], true);
        assert_eq!(json["payer"], "0xabcd");
        assert!(json.get("invalidReason").is_none());

        let invalid = VerifyResponse::invalid("insufficient_funds", None);
        let json = serde_json::to_value(&invalid).unwrap();
        assert_eq!(json["isValid"], false);
        assert_eq!(json["invalidReason"], "insufficient_funds");
    }

    #[test]
    fn verify_response_roundtrip() {
        for response in [
            VerifyResponse::valid("0xabcd"),
            VerifyResponse::invalid("payment_expired", Some("0xabcd".to_string())),
        ] {
            let json = serde_json::to_string(&response).unwrap();
            let back: VerifyResponse = serde_json::from_str(&json).unwrap();
            assert_eq!(response, back);
        }
    }

    #[test]
    fn settle_response_roundtrip() {
        let success = SettleResponse::Success {
            transaction: "0xabc".to_string(),
            network: ChainId::new("eip155", "84532"),
            payer: "0xabcd".to_string(),
        };
        let json = serde_json::to_value(&success).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["transaction"], "0xabc");
        assert_eq!(json["network"], "eip155:84532");
        let back: SettleResponse = serde_json::from_str(&json.to_string()).unwrap();
        assert_eq!(success, back);
    }

    #[test]
    fn verify_request_scheme_kind() {
        let body = serde_json::json!({
            "x402Version": 2,
            "paymentPayload": {
                "x402Version": 2,
                "scheme": "exact",
                "network": "base-sepolia",
                "payload": {},
            },
            "paymentRequirements": {},
        });
        let raw = serde_json::value::to_raw_value(&body).unwrap();
        let request = VerifyRequest::from(raw);
        let kind = request.scheme_kind().unwrap();
        assert_eq!(kind.scheme, "exact");
        // Legacy alias normalized at ingress.
        assert_eq!(kind.network, ChainId::new("eip155", "84532"));
    }

    #[test]
    fn version_rejects_unknown() {
        assert!(serde_json::from_str::<X402Version>("3").is_err());
        assert_eq!(
            serde_json::from_str::<X402Version>("2").unwrap(),
            X402Version::V2
        );
    }
}
