//! HTTP header framing for protocol messages.
//!
//! Three protocol messages ride in headers as base64-encoded JSON:
//!
//! - the client's signed payment, in `X-PAYMENT` (v1 name) or
//!   `PAYMENT-SIGNATURE` (v2 name) — decoders accept both,
//!   case-insensitively;
//! - the server's accepted requirements, copied into `PAYMENT-REQUIRED` on
//!   402 responses so programmatic clients never parse an HTML body;
//! - the settlement receipt, in `X-PAYMENT-RESPONSE` (also accepted as
//!   `PAYMENT-RESPONSE`).
//!
//! Encoding uses the standard base64 alphabet; decoding also accepts the
//! URL-safe alphabet. A payment header longer than [`MAX_HEADER_BYTES`] is
//! rejected before any decoding happens.

use crate::proto::{PaymentPayload, PaymentRequired, SettleResponse};
use crate::util::Base64Bytes;

/// V1 request header carrying the payment payload.
pub const HEADER_PAYMENT: &str = "X-PAYMENT";
/// V2 request header carrying the payment payload.
pub const HEADER_PAYMENT_SIGNATURE: &str = "PAYMENT-SIGNATURE";
/// Response header mirroring the 402 body for programmatic clients.
pub const HEADER_PAYMENT_REQUIRED: &str = "PAYMENT-REQUIRED";
/// Response header carrying the settlement receipt.
pub const HEADER_PAYMENT_RESPONSE: &str = "X-PAYMENT-RESPONSE";
/// Alternate casing-family name for the settlement receipt header.
pub const HEADER_PAYMENT_RESPONSE_BARE: &str = "PAYMENT-RESPONSE";

/// Value for `Access-Control-Expose-Headers` on paid responses.
pub const EXPOSE_HEADERS: &str = "X-PAYMENT-RESPONSE,PAYMENT-RESPONSE";

/// Upper bound on an inbound payment header, pre-decoding.
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Header framing failures. All of them surface on the wire as
/// `invalid_payload`.
#[derive(Debug, thiserror::Error)]
pub enum HeaderCodecError {
    /// The header exceeds [`MAX_HEADER_BYTES`].
    #[error("payment header too large: {0} bytes")]
    TooLarge(usize),
    /// The header is not base64 in either accepted alphabet.
    #[error("payment header is not valid base64")]
    Base64(#[from] base64::DecodeError),
    /// The decoded bytes are not a valid protocol message.
    #[error("payment header JSON is invalid: {0}")]
    Json(#[from] serde_json::Error),
}

fn encode_json<T: serde::Serialize>(value: &T) -> Result<String, HeaderCodecError> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64Bytes::encode(json).to_string())
}

fn decode_json<T: serde::de::DeserializeOwned>(header: &[u8]) -> Result<T, HeaderCodecError> {
    if header.len() > MAX_HEADER_BYTES {
        return Err(HeaderCodecError::TooLarge(header.len()));
    }
    let bytes = Base64Bytes::from(header).decode()?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Encodes a payment payload for the request header.
pub fn encode_payment(payload: &PaymentPayload) -> Result<String, HeaderCodecError> {
    encode_json(payload)
}

/// Decodes a payment payload from a request header value.
///
/// Network aliases are normalized to CAIP-2 during deserialization, so the
/// returned payload is already canonical.
pub fn decode_payment(header: &[u8]) -> Result<PaymentPayload, HeaderCodecError> {
    decode_json(header)
}

/// Encodes the accepted-requirements mirror for the `PAYMENT-REQUIRED`
/// response header.
pub fn encode_payment_required(required: &PaymentRequired) -> Result<String, HeaderCodecError> {
    encode_json(required)
}

/// Decodes a `PAYMENT-REQUIRED` header value.
pub fn decode_payment_required(header: &[u8]) -> Result<PaymentRequired, HeaderCodecError> {
    decode_json(header)
}

/// Encodes a settlement receipt for the `X-PAYMENT-RESPONSE` header.
pub fn encode_settle_response(response: &SettleResponse) -> Result<String, HeaderCodecError> {
    encode_json(response)
}

/// Decodes an `X-PAYMENT-RESPONSE` header value.
pub fn decode_settle_response(header: &[u8]) -> Result<SettleResponse, HeaderCodecError> {
    decode_json(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainId;
    use crate::proto::{PaymentRequirements, X402Version};

    fn payload() -> PaymentPayload {
        let raw = serde_json::value::to_raw_value(&serde_json::json!({
            "signature": "0xdead",
            "authorization": {"from": "0xabcd"},
        }))
        .unwrap();
        PaymentPayload {
            x402_version: X402Version::V2,
            scheme: "exact".to_string(),
            network: ChainId::new("eip155", "84532"),
            payload: raw,
            accepted: Some(PaymentRequirements {
                scheme: "exact".to_string(),
                network: ChainId::new("eip155", "84532"),
                pay_to: "0xBAc6".to_string(),
                asset: "0x036C".to_string(),
                amount: "1000".to_string(),
                max_timeout_seconds: 300,
                description: String::new(),
                mime_type: "application/json".to_string(),
                resource: None,
                output_schema: None,
                extra: None,
            }),
            extensions: None,
        }
    }

    #[test]
    fn payment_roundtrip() {
        let original = payload();
        let header = encode_payment(&original).unwrap();
        let decoded = decode_payment(header.as_bytes()).unwrap();
        assert_eq!(decoded.scheme, original.scheme);
        assert_eq!(decoded.network, original.network);
        assert_eq!(decoded.accepted, original.accepted);
        assert_eq!(
            decoded.payload.get().replace(char::is_whitespace, ""),
            original.payload.get().replace(char::is_whitespace, "")
        );
    }

    #[test]
    fn decode_accepts_url_safe_alphabet() {
        let header = encode_payment(&payload()).unwrap();
        let url_safe = header.replace('+', "-").replace('/', "_");
        assert!(decode_payment(url_safe.as_bytes()).is_ok());
    }

    #[test]
    fn oversized_header_rejected_before_decode() {
        let huge = vec![b'A'; MAX_HEADER_BYTES + 1];
        assert!(matches!(
            decode_payment(&huge),
            Err(HeaderCodecError::TooLarge(_))
        ));
    }

    #[test]
    fn garbage_is_invalid_payload() {
        assert!(decode_payment(b"not base64 at all!").is_err());
        let valid_b64_bad_json = Base64Bytes::encode(b"{not json").to_string();
        assert!(decode_payment(valid_b64_bad_json.as_bytes()).is_err());
    }

    #[test]
    fn settle_response_roundtrip() {
        let response = SettleResponse::Success {
            transaction: "0xabc".to_string(),
            network: ChainId::new("eip155", "84532"),
            payer: "0xabcd".to_string(),
        };
        let header = encode_settle_response(&response).unwrap();
        let decoded = decode_settle_response(header.as_bytes()).unwrap();
        assert_eq!(decoded, response);
    }
}
