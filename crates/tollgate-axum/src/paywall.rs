//! HTML paywall for browser traffic.
//!
//! Programmatic clients get JSON 402s; a browser asking for `text/html`
//! with a Mozilla-class user agent gets a rendered page carrying the same
//! offer, with the machine-readable form embedded for wallet extensions.

use http::HeaderMap;
use tollgate_types::headers;
use tollgate_types::proto::PaymentRequired;

/// Whether this request should receive the HTML paywall.
pub fn wants_paywall(request_headers: &HeaderMap) -> bool {
    let accepts_html = request_headers
        .get(http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/html"));
    let mozilla_class = request_headers
        .get(http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ua| ua.starts_with("Mozilla"));
    accepts_html && mozilla_class
}

fn humanize(tag: &str) -> String {
    let mut out: String = tag.replace('_', " ");
    if let Some(first) = out.get_mut(0..1) {
        first.make_ascii_uppercase();
    }
    out
}

/// Renders the paywall page for a 402 offer.
pub fn render(required: &PaymentRequired) -> String {
    let offers = required
        .accepts
        .iter()
        .map(|requirement| {
            format!(
                "<li><code>{}</code> on <code>{}</code>: {} atomic units of <code>{}</code> to <code>{}</code></li>",
                escape(&requirement.scheme),
                escape(&requirement.network.to_string()),
                escape(&requirement.amount),
                escape(&requirement.asset),
                escape(&requirement.pay_to),
            )
        })
        .collect::<Vec<_>>()
        .join("\n      ");
    let error_banner = required
        .error
        .as_deref()
        .map(|tag| format!("<p class=\"error\">{}</p>", escape(&humanize(tag))))
        .unwrap_or_default();
    let embedded = headers::encode_payment_required(required).unwrap_or_default();

    format!(
        r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="utf-8">
    <title>Payment required</title>
    <meta name="x-payment-required" content="{embedded}">
    <style>
      body {{ font-family: system-ui, sans-serif; max-width: 40rem; margin: 4rem auto; padding: 0 1rem; }}
      .error {{ color: #b00020; }}
      code {{ background: #f4f4f4; padding: 0 0.25rem; }}
    </style>
  </head>
  <body>
    <h1>402 Payment required</h1>
    {error_banner}
    <p>This resource is paid. Complete one of the accepted payments and retry with the payment header.</p>
    <ul>
      {offers}
    </ul>
  </body>
</html>
"#
    )
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{ACCEPT, USER_AGENT};

    #[test]
    fn browser_detection() {
        let mut browser = HeaderMap::new();
        browser.insert(ACCEPT, "text/html,application/xhtml+xml".parse().unwrap());
        browser.insert(USER_AGENT, "Mozilla/5.0 (X11; Linux x86_64)".parse().unwrap());
        assert!(wants_paywall(&browser));

        let mut curl = HeaderMap::new();
        curl.insert(ACCEPT, "*/*".parse().unwrap());
        curl.insert(USER_AGENT, "curl/8.5.0".parse().unwrap());
        assert!(!wants_paywall(&curl));

        let mut api_client = HeaderMap::new();
        api_client.insert(ACCEPT, "application/json".parse().unwrap());
        api_client.insert(USER_AGENT, "Mozilla/5.0".parse().unwrap());
        assert!(!wants_paywall(&api_client));
    }
}
