//! Stripe webhook verification and event parsing.
//!
//! The `Stripe-Signature` header looks like `t=1700000000,v1=<hex>,v1=<hex>`.
//! The signed payload is `"{t}.{raw body}"`, HMAC-SHA256 with the endpoint
//! secret. Stripe may send several `v1` entries during secret rotation; any
//! one matching is enough.

use std::collections::HashMap;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

/// Default tolerance between the signed timestamp and now, in seconds.
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature header has no timestamp")]
    MissingTimestamp,

    #[error("signature header has no v1 signature")]
    MissingSignature,

    #[error("malformed signature header")]
    Malformed,

    #[error("signature timestamp outside tolerance")]
    Expired,

    #[error("signature mismatch")]
    Mismatch,
}

/// Verify a webhook payload against its `Stripe-Signature` header.
///
/// `now` is unix seconds. Timestamps further than `tolerance_secs` from `now`
/// in either direction are rejected to stop replays.
///
/// # Errors
///
/// Returns a [`SignatureError`] describing the first check that failed.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
    tolerance_secs: i64,
) -> Result<(), SignatureError> {
    let mut timestamp: Option<&str> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        let (key, value) = part
            .trim()
            .split_once('=')
            .ok_or(SignatureError::Malformed)?;
        match key {
            "t" => timestamp = Some(value),
            "v1" => signatures.push(value),
            // v0 and future schemes are ignored
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::MissingTimestamp)?;
    if signatures.is_empty() {
        return Err(SignatureError::MissingSignature);
    }

    let ts: i64 = timestamp.parse().map_err(|_| SignatureError::Malformed)?;
    if now.abs_diff(ts) > tolerance_secs.unsigned_abs() {
        return Err(SignatureError::Expired);
    }

    let expected = compute_signature(timestamp, payload, secret)?;
    if signatures
        .iter()
        .any(|candidate| constant_time_compare(&expected, candidate))
    {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Hex HMAC-SHA256 of `"{timestamp}.{payload}"`.
///
/// # Errors
///
/// Returns [`SignatureError::Malformed`] if the key is rejected by the MAC.
pub fn compute_signature(
    timestamp: &str,
    payload: &[u8],
    secret: &str,
) -> Result<String, SignatureError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::Malformed)?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

// =============================================================================
// Events
// =============================================================================

/// A Stripe event envelope. Only the fields we act on are parsed.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
struct SessionObject {
    id: String,
    payment_intent: Option<String>,
    payment_status: Option<String>,
    client_reference_id: Option<String>,
    amount_total: Option<i64>,
    currency: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
struct IntentObject {
    id: String,
    amount: i64,
    amount_received: Option<i64>,
    currency: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
    last_payment_error: Option<LastPaymentError>,
}

#[derive(Debug, Clone, Deserialize)]
struct LastPaymentError {
    message: Option<String>,
    code: Option<String>,
}

/// What an event asks us to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventAction {
    /// Money was received for a lead.
    Paid {
        form_id: Option<String>,
        transaction_id: String,
        amount_minor: Option<i64>,
        currency: Option<String>,
    },
    /// A payment attempt failed.
    Failed {
        form_id: Option<String>,
        transaction_id: String,
        reason: String,
    },
    /// Acknowledge and do nothing.
    Ignore,
}

impl StripeEvent {
    /// Parse a raw webhook body.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if the envelope is malformed.
    pub fn from_slice(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// Interpret the event.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if a handled event type carries an object of
    /// the wrong shape.
    pub fn action(&self) -> Result<EventAction, serde_json::Error> {
        match self.event_type.as_str() {
            "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
                let session: SessionObject = serde_json::from_value(self.data.object.clone())?;
                // Sessions for delayed methods complete unpaid and are
                // followed by async_payment_succeeded.
                if session.payment_status.as_deref() != Some("paid") {
                    return Ok(EventAction::Ignore);
                }
                let form_id = session
                    .metadata
                    .get("formId")
                    .cloned()
                    .or(session.client_reference_id);
                Ok(EventAction::Paid {
                    form_id,
                    transaction_id: session.payment_intent.unwrap_or(session.id),
                    amount_minor: session.amount_total,
                    currency: session.currency,
                })
            }
            "payment_intent.succeeded" => {
                let intent: IntentObject = serde_json::from_value(self.data.object.clone())?;
                Ok(EventAction::Paid {
                    form_id: intent.metadata.get("formId").cloned(),
                    amount_minor: Some(intent.amount_received.unwrap_or(intent.amount)),
                    currency: Some(intent.currency),
                    transaction_id: intent.id,
                })
            }
            "payment_intent.payment_failed" => {
                let intent: IntentObject = serde_json::from_value(self.data.object.clone())?;
                let reason = intent
                    .last_payment_error
                    .and_then(|e| e.message.or(e.code))
                    .unwrap_or_else(|| "payment failed".to_owned());
                Ok(EventAction::Failed {
                    form_id: intent.metadata.get("formId").cloned(),
                    transaction_id: intent.id,
                    reason,
                })
            }
            _ => Ok(EventAction::Ignore),
        }
    }
}
