use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use super::NotificationSender;
use crate::{
    config::WebhookConfig,
    error::{GreenhouseError, Result},
};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookPayload<'a> {
    recipients: &'a [String],
    subject: &'a str,
    body: &'a str,
}

/// Posts notifications as signed JSON to an HTTP relay that owns delivery.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    http: Client,
    url: String,
    secret: String,
}

impl WebhookNotifier {
    pub fn new(config: &WebhookConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build webhook HTTP client")?;
        Ok(Self {
            http,
            url: config.url.clone(),
            secret: config.secret.clone(),
        })
    }

    async fn post(&self, body_bytes: Vec<u8>) -> anyhow::Result<()> {
        let headers = build_signed_headers(&body_bytes, &self.secret);
        debug!(url = %self.url, "Posting notification webhook");

        self.http
            .post(&self.url)
            .headers(to_header_map(headers)?)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body_bytes)
            .send()
            .await
            .context("notification webhook request failed")?
            .error_for_status()
            .context("notification webhook returned error status")?;
        Ok(())
    }
}

#[async_trait]
impl NotificationSender for WebhookNotifier {
    async fn send(&self, recipients: &[String], subject: &str, body: &str) -> Result<()> {
        let payload = WebhookPayload {
            recipients,
            subject,
            body,
        };
        let bytes = serde_json::to_vec(&payload)
            .map_err(|e| GreenhouseError::Notification(e.to_string()))?;
        self.post(bytes)
            .await
            .map_err(|e| GreenhouseError::Notification(format!("{e:#}")))
    }
}

// ---------------------------------------------------------------------------
// Signing helpers
// ---------------------------------------------------------------------------

/// Deterministic signing inputs used by tests.
#[derive(Debug)]
pub(crate) struct SigningContext<'a> {
    pub body_bytes: &'a [u8],
    /// 13-digit Unix timestamp in milliseconds
    pub t: &'a str,
    pub nonce: &'a str,
}

pub(crate) fn build_signed_headers(body_bytes: &[u8], secret: &str) -> HashMap<String, String> {
    let t = chrono::Utc::now().timestamp_millis().to_string();
    let nonce = Uuid::new_v4().simple().to_string();
    let ctx = SigningContext {
        body_bytes,
        t: &t,
        nonce: &nonce,
    };
    build_signed_headers_inner(secret, &ctx)
}

/// Signature is `HMAC-SHA256(secret, t + nonce + hex(sha256(body)))`, lowercase hex.
pub(crate) fn build_signed_headers_inner(
    secret: &str,
    ctx: &SigningContext<'_>,
) -> HashMap<String, String> {
    let SigningContext { body_bytes, t, nonce } = ctx;
    let content_sha256 = hex::encode(Sha256::digest(body_bytes));

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(t.as_bytes());
    mac.update(nonce.as_bytes());
    mac.update(content_sha256.as_bytes());
    let sign = hex::encode(mac.finalize().into_bytes());

    let mut headers = HashMap::new();
    headers.insert("x-greenhouse-timestamp".to_owned(), t.to_string());
    headers.insert("x-greenhouse-nonce".to_owned(), nonce.to_string());
    headers.insert("x-greenhouse-content-sha256".to_owned(), content_sha256);
    headers.insert("x-greenhouse-signature".to_owned(), sign);
    headers
}

fn to_header_map(map: HashMap<String, String>) -> anyhow::Result<reqwest::header::HeaderMap> {
    let mut header_map = reqwest::header::HeaderMap::new();
    for (k, v) in map {
        let name = reqwest::header::HeaderName::from_bytes(k.as_bytes())
            .with_context(|| format!("invalid header name: {k}"))?;
        let value = reqwest::header::HeaderValue::from_str(&v)
            .with_context(|| format!("invalid header value for {k}"))?;
        header_map.insert(name, value);
    }
    Ok(header_map)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "relay-shared-secret";
    const T: &str = "1718000000000";
    const NONCE: &str = "5138cc3a9033d69856923fd07b491173";

    const EMPTY_BODY_SHA256: &str =
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    fn hmac_sign(s: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(s.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn sign_matches_manual_computation() {
        let ctx = SigningContext {
            body_bytes: &[],
            t: T,
            nonce: NONCE,
        };
        let headers = build_signed_headers_inner(SECRET, &ctx);

        let expected = hmac_sign(&format!("{T}{NONCE}{EMPTY_BODY_SHA256}"));
        assert_eq!(headers["x-greenhouse-signature"], expected);
        assert_eq!(headers["x-greenhouse-content-sha256"], EMPTY_BODY_SHA256);
        assert_eq!(headers["x-greenhouse-timestamp"], T);
        assert_eq!(headers["x-greenhouse-nonce"], NONCE);
        assert!(
            !headers.values().any(|v| v == SECRET),
            "secret must never appear in outgoing headers"
        );
    }

    #[test]
    fn body_affects_signature() {
        let body = br#"{"subject":"Temperature alert"}"#;
        let empty = build_signed_headers_inner(
            SECRET,
            &SigningContext {
                body_bytes: &[],
                t: T,
                nonce: NONCE,
            },
        );
        let with_body = build_signed_headers_inner(
            SECRET,
            &SigningContext {
                body_bytes: body,
                t: T,
                nonce: NONCE,
            },
        );
        assert_ne!(empty["x-greenhouse-signature"], with_body["x-greenhouse-signature"]);
    }

    #[test]
    fn signature_is_64_hex_chars() {
        let headers = build_signed_headers(b"{}", SECRET);
        let sign = &headers["x-greenhouse-signature"];
        assert_eq!(sign.len(), 64);
        assert!(sign.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn to_header_map_converts_correctly() {
        let headers = build_signed_headers_inner(
            SECRET,
            &SigningContext {
                body_bytes: b"{}",
                t: T,
                nonce: NONCE,
            },
        );
        let hm = to_header_map(headers).unwrap();
        assert_eq!(hm["x-greenhouse-timestamp"], T);
        assert_eq!(hm.len(), 4);
    }

    #[test]
    fn payload_serialises_camel_case() {
        let recipients = vec!["ops@example.com".to_owned()];
        let json = serde_json::to_value(WebhookPayload {
            recipients: &recipients,
            subject: "s",
            body: "b",
        })
        .unwrap();
        assert_eq!(json["recipients"][0], "ops@example.com");
        assert_eq!(json["subject"], "s");
    }

    #[tokio::test]
    async fn unresponsive_relay_times_out() {
        // accepts connections but never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let notifier = WebhookNotifier::new(&WebhookConfig {
            url: format!("http://{addr}/notify"),
            secret: SECRET.into(),
            timeout: std::time::Duration::from_millis(200),
        })
        .unwrap();

        let sent = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            notifier.send(&["ops@example.com".to_owned()], "subject", "body"),
        )
        .await
        .expect("client timeout should fire first");
        assert!(matches!(sent, Err(GreenhouseError::Notification(_))));
    }
}
