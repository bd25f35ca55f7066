//! Settlement receipt decoding for paid responses.

use reqwest::Response;
use tollgate_types::headers;
use tollgate_types::proto::SettleResponse;

/// Decodes the `X-PAYMENT-RESPONSE` receipt from a paid response, if the
/// server attached one. Both receipt header names are accepted.
pub fn decode_receipt(response: &Response) -> Option<SettleResponse> {
    let header = response
        .headers()
        .get(headers::HEADER_PAYMENT_RESPONSE)
        .or_else(|| response.headers().get(headers::HEADER_PAYMENT_RESPONSE_BARE))?;
    headers::decode_settle_response(header.as_bytes()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_types::chain::ChainId;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn decodes_attached_receipt() {
        let settlement = SettleResponse::Success {
            transaction: "0xabc".to_string(),
            network: ChainId::new("eip155", "84532"),
            payer: "0xabcd".to_string(),
        };
        let encoded = headers::encode_settle_response(&settlement).unwrap();

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).insert_header("X-PAYMENT-RESPONSE", encoded.as_str()),
            )
            .mount(&server)
            .await;

        let response = reqwest::get(server.uri()).await.unwrap();
        let receipt = decode_receipt(&response).unwrap();
        assert_eq!(receipt, settlement);
    }

    #[tokio::test]
    async fn absent_receipt_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let response = reqwest::get(server.uri()).await.unwrap();
        assert!(decode_receipt(&response).is_none());
    }
}
