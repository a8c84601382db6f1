//! Webhook event verification and parsing.
//!
//! Verification fails closed and happens on the raw request bytes, before
//! anything is parsed: a payload is only JSON once its signature checks out.
//!
//! The signature header has the form `t=<unix-seconds>,v1=<hex-hmac>` and
//! the signed payload is `"{t}.{raw body}"`, authenticated with
//! HMAC-SHA256 under the endpoint's shared secret. The timestamp bounds
//! replay; comparison of the digest itself is constant-time via
//! [`Mac::verify_slice`].

use chrono::Utc;
use ecometal_core::OrderId;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

use super::StripeError;

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted age (and future skew) of a signed timestamp.
const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Signature verification failures. All of them reject the request before
/// the payload is parsed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    /// Header did not contain a `t=` and `v1=` pair.
    #[error("malformed signature header")]
    Malformed,

    /// Signed timestamp outside the tolerance window.
    #[error("signature timestamp outside tolerance")]
    StaleTimestamp,

    /// No candidate signature matched the payload digest.
    #[error("signature mismatch")]
    Mismatch,
}

/// Verifies webhook signatures against a shared secret.
pub struct WebhookVerifier {
    secret: SecretString,
    tolerance_secs: i64,
}

impl WebhookVerifier {
    /// Create a verifier with the default timestamp tolerance.
    #[must_use]
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret,
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
        }
    }

    /// Verify `header` against `raw_body`.
    ///
    /// # Errors
    ///
    /// Returns a [`SignatureError`] when the header is malformed, the
    /// timestamp is outside tolerance, or no signature matches.
    pub fn verify(&self, raw_body: &[u8], header: &str) -> Result<(), SignatureError> {
        self.verify_at(raw_body, header, Utc::now().timestamp())
    }

    fn verify_at(&self, raw_body: &[u8], header: &str, now: i64) -> Result<(), SignatureError> {
        let mut timestamp: Option<&str> = None;
        let mut candidates: Vec<&str> = Vec::new();

        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = Some(value),
                Some(("v1", value)) => candidates.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
        if candidates.is_empty() {
            return Err(SignatureError::Malformed);
        }

        let signed_at: i64 = timestamp.parse().map_err(|_| SignatureError::Malformed)?;
        if (now - signed_at).abs() > self.tolerance_secs {
            return Err(SignatureError::StaleTimestamp);
        }

        for candidate in candidates {
            let Ok(digest) = hex::decode(candidate) else {
                continue;
            };

            let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
                .map_err(|_| SignatureError::Mismatch)?;
            mac.update(timestamp.as_bytes());
            mac.update(b".");
            mac.update(raw_body);

            if mac.verify_slice(&digest).is_ok() {
                return Ok(());
            }
        }

        Err(SignatureError::Mismatch)
    }
}

// =============================================================================
// Event Parsing
// =============================================================================

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: RawEventData,
}

#[derive(Debug, Deserialize)]
struct RawEventData {
    object: RawSession,
}

#[derive(Debug, Deserialize)]
struct RawSession {
    id: String,
    #[serde(default)]
    payment_status: Option<String>,
    /// Either a string id or an expanded object; anything non-string is
    /// dropped, as only the reference is stored.
    #[serde(default)]
    payment_intent: Option<serde_json::Value>,
    #[serde(default)]
    metadata: Option<std::collections::HashMap<String, String>>,
}

/// A verified, parsed webhook event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    /// `checkout.session.completed`
    Completed {
        session_id: String,
        /// `paid` means money moved; anything else is acknowledged and
        /// ignored.
        payment_status: Option<String>,
        /// Correlation token round-tripped through session metadata.
        order_id: Option<OrderId>,
        payment_intent: Option<String>,
    },
    /// `checkout.session.expired`
    Expired {
        session_id: String,
        order_id: Option<OrderId>,
    },
    /// Any other event type; acknowledged without processing.
    Other(String),
}

/// Parse a verified payload into a [`WebhookEvent`].
///
/// Must only be called after [`WebhookVerifier::verify`] has succeeded.
///
/// # Errors
///
/// Returns [`StripeError::Parse`] when the payload is not a well-formed
/// event envelope.
pub fn parse_event(raw_body: &[u8]) -> Result<WebhookEvent, StripeError> {
    let raw: RawEvent =
        serde_json::from_slice(raw_body).map_err(|e| StripeError::Parse(e.to_string()))?;

    let order_id = raw
        .data
        .object
        .metadata
        .as_ref()
        .and_then(|m| m.get("orderId"))
        .map(OrderId::new);

    Ok(match raw.event_type.as_str() {
        "checkout.session.completed" => WebhookEvent::Completed {
            session_id: raw.data.object.id,
            payment_status: raw.data.object.payment_status,
            order_id,
            payment_intent: raw
                .data
                .object
                .payment_intent
                .as_ref()
                .and_then(serde_json::Value::as_str)
                .map(String::from),
        },
        "checkout.session.expired" => WebhookEvent::Expired {
            session_id: raw.data.object.id,
            order_id,
        },
        _ => WebhookEvent::Other(raw.event_type),
    })
}
