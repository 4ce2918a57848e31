//! Stripe webhook verification and event parsing.
//!
//! The signature covers the raw request body byte for byte, so callers must
//! hand over the body exactly as received, before any JSON parsing.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Event type that confirms a completed checkout.
pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("missing or malformed Stripe-Signature header")]
    MalformedHeader,
    #[error("no v1 signature matches the payload")]
    SignatureMismatch,
    #[error("signature timestamp {0} is outside the tolerance window")]
    TimestampOutsideTolerance(i64),
    #[error("webhook secret is not configured")]
    MissingSecret,
    #[error("invalid event payload: {0}")]
    InvalidPayload(String),
}

/// Verifies `Stripe-Signature` headers against the endpoint secret.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    secret: String,
    tolerance_secs: u64,
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<String>, tolerance_secs: u64) -> Self {
        Self { secret: secret.into(), tolerance_secs }
    }

    /// Check `header` (`t=<unix>,v1=<hex>[,v1=<hex>…]`) against `payload`,
    /// with `now` as the current unix time.
    pub fn verify(&self, payload: &[u8], header: &str, now: i64) -> Result<(), WebhookError> {
        if self.secret.is_empty() {
            return Err(WebhookError::MissingSecret);
        }

        let mut timestamp = None;
        let mut candidates = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", v)) => timestamp = v.parse::<i64>().ok(),
                Some(("v1", v)) => {
                    if let Ok(bytes) = hex::decode(v) {
                        candidates.push(bytes);
                    }
                }
                _ => {}
            }
        }
        let timestamp = timestamp.ok_or(WebhookError::MalformedHeader)?;
        if candidates.is_empty() {
            return Err(WebhookError::MalformedHeader);
        }

        let expected = self.mac(timestamp, payload)?;
        let matched = candidates
            .iter()
            .any(|c| c.len() == expected.len() && bool::from(c.as_slice().ct_eq(&expected)));
        if !matched {
            return Err(WebhookError::SignatureMismatch);
        }

        if self.tolerance_secs > 0 && now.abs_diff(timestamp) > self.tolerance_secs {
            return Err(WebhookError::TimestampOutsideTolerance(timestamp));
        }
        Ok(())
    }

    /// Build a header the way Stripe does. Used by tests and local tooling to
    /// replay events.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> Result<String, WebhookError> {
        let mac = self.mac(timestamp, payload)?;
        Ok(format!("t={timestamp},v1={}", hex::encode(mac)))
    }

    fn mac(&self, timestamp: i64, payload: &[u8]) -> Result<Vec<u8>, WebhookError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| WebhookError::MissingSecret)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

// --- Event payload ---

#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

impl Event {
    pub fn parse(payload: &[u8]) -> Result<Self, WebhookError> {
        serde_json::from_slice(payload).map_err(|e| WebhookError::InvalidPayload(e.to_string()))
    }

    /// `metadata.reservationId` of the event object, as set when the checkout
    /// session was created.
    pub fn reservation_ref(&self) -> Option<&str> {
        self.data.object.get("metadata")?.get("reservationId")?.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &[u8] = br#"{"id":"evt_1","type":"checkout.session.completed","data":{"object":{"metadata":{"reservationId":"42","seatClass":"1trida"}}}}"#;

    fn verifier() -> SignatureVerifier {
        SignatureVerifier::new("whsec_test", 300)
    }

    #[test]
    fn accepts_own_signature() {
        let v = verifier();
        let header = v.sign(PAYLOAD, 1_700_000_000).unwrap();
        assert_eq!(v.verify(PAYLOAD, &header, 1_700_000_010), Ok(()));
    }

    #[test]
    fn accepts_any_matching_v1_entry() {
        let v = verifier();
        let good = v.sign(PAYLOAD, 1_700_000_000).unwrap();
        let sig = good.split_once("v1=").unwrap().1;
        let header = format!("t=1700000000,v1=deadbeef,v0=abc,v1={sig}");
        assert_eq!(v.verify(PAYLOAD, &header, 1_700_000_000), Ok(()));
    }

    #[test]
    fn rejects_tampered_payload() {
        let v = verifier();
        let header = v.sign(PAYLOAD, 1_700_000_000).unwrap();
        let tampered = PAYLOAD.to_vec().into_iter().map(|b| if b == b'2' { b'3' } else { b }).collect::<Vec<_>>();
        assert_eq!(v.verify(&tampered, &header, 1_700_000_000), Err(WebhookError::SignatureMismatch));
    }

    #[test]
    fn rejects_other_secret() {
        let header = SignatureVerifier::new("whsec_other", 300).sign(PAYLOAD, 1_700_000_000).unwrap();
        assert_eq!(verifier().verify(PAYLOAD, &header, 1_700_000_000), Err(WebhookError::SignatureMismatch));
    }

    #[test]
    fn rejects_stale_timestamp() {
        let v = verifier();
        let header = v.sign(PAYLOAD, 1_700_000_000).unwrap();
        assert_eq!(
            v.verify(PAYLOAD, &header, 1_700_000_301),
            Err(WebhookError::TimestampOutsideTolerance(1_700_000_000))
        );
    }

    #[test]
    fn rejects_malformed_header() {
        let v = verifier();
        assert_eq!(v.verify(PAYLOAD, "", 0), Err(WebhookError::MalformedHeader));
        assert_eq!(v.verify(PAYLOAD, "t=1700000000", 0), Err(WebhookError::MalformedHeader));
        assert_eq!(v.verify(PAYLOAD, "v1=abcd", 0), Err(WebhookError::MalformedHeader));
    }

    #[test]
    fn refuses_without_secret() {
        let v = SignatureVerifier::new("", 300);
        assert_eq!(v.verify(PAYLOAD, "t=1,v1=00", 1), Err(WebhookError::MissingSecret));
    }

    #[test]
    fn extracts_reservation_reference() {
        let event = Event::parse(PAYLOAD).unwrap();
        assert_eq!(event.id, "evt_1");
        assert_eq!(event.event_type, CHECKOUT_COMPLETED);
        assert_eq!(event.reservation_ref(), Some("42"));
    }
}
