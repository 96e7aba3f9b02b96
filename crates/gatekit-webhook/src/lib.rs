//! C7 — Webhook claim queue: ingestion-time validation and the backoff math
//! shared with the C9 retry tick (spec §4.7).
//!
//! The claim transition itself lives behind the opaque
//! `claim_stripe_webhook_event` RPC in [`gatekit_db::rpc`]; this crate owns
//! everything around it — signature verification, the request-body size
//! guard, row insertion, and turning a claimed row into a terminal
//! completed/failed update.

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use sqlx::PgPool;
use uuid::Uuid;

use gatekit_billing::client::BillingClient;

type HmacSha256 = Hmac<Sha256>;

/// Stripe tolerates signatures timestamped within this many seconds of now.
const DEFAULT_TOLERANCE_SECONDS: i64 = 300;

/// `max_attempts=8` from spec §4.7/§4.9.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 8;

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("missing stripe-signature header")]
    MissingSignatureHeader,
    #[error("request body exceeds the configured limit")]
    BodyTooLarge,
    #[error("invalid Stripe signature")]
    InvalidSignature,
    #[error("malformed webhook payload")]
    MalformedPayload,
    #[error(transparent)]
    Db(#[from] gatekit_db::DbError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Freshly inserted; carries the row id so the caller can schedule a
    /// claim attempt for it off the request path.
    Accepted { event_id: Uuid },
    Duplicate,
}

/// Verify a Stripe `Stripe-Signature` header against the raw request body.
///
/// The header carries `t=<unix ts>,v1=<hex hmac>[,v1=<hex hmac>...]` — a
/// rotated signing secret produces more than one `v1` candidate, any one of
/// which is accepted. Timestamps outside `tolerance_seconds` of now are
/// rejected even when the signature itself is valid, to bound replay.
pub fn verify_signature(
    body: &[u8],
    header: &str,
    signing_secret: &str,
    tolerance_seconds: i64,
) -> Result<(), WebhookError> {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<&str> = Vec::new();

    for part in header.split(',') {
        let mut kv = part.splitn(2, '=');
        match (kv.next(), kv.next()) {
            (Some("t"), Some(v)) => timestamp = v.trim().parse().ok(),
            (Some("v1"), Some(v)) => candidates.push(v.trim()),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(WebhookError::InvalidSignature)?;
    if candidates.is_empty() {
        return Err(WebhookError::InvalidSignature);
    }

    let mut signed_payload = timestamp.to_string().into_bytes();
    signed_payload.push(b'.');
    signed_payload.extend_from_slice(body);

    let matched = candidates
        .iter()
        .any(|candidate| verify_one(signing_secret.as_bytes(), &signed_payload, candidate));
    if !matched {
        return Err(WebhookError::InvalidSignature);
    }

    if (Utc::now().timestamp() - timestamp).abs() > tolerance_seconds {
        return Err(WebhookError::InvalidSignature);
    }

    Ok(())
}

fn verify_one(key: &[u8], signed_payload: &[u8], candidate_hex: &str) -> bool {
    let Ok(signature) = hex::decode(candidate_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        return false;
    };
    mac.update(signed_payload);
    mac.verify_slice(&signature).is_ok()
}

/// Reject oversized request bodies before any signature verification work is
/// done on them (spec §4.7 step 2 — a 413 must not pay for an HMAC pass).
pub fn check_body_size(len: usize, max_body_bytes: usize) -> Result<(), WebhookError> {
    if len > max_body_bytes {
        return Err(WebhookError::BodyTooLarge);
    }
    Ok(())
}

/// Validate and record one inbound webhook delivery (spec §4.7 steps 1-4).
///
/// Ordering matters: a missing header is rejected before the size guard runs,
/// the size guard runs before the (comparatively expensive) signature check,
/// and the body is only parsed as JSON once signature verification has
/// passed. An oversized or malformed body never pays for a parse it doesn't
/// need, and never reaches the insert path unverified.
pub async fn ingest_event(
    pool: &PgPool,
    signature_header: Option<&str>,
    body: &[u8],
    max_body_bytes: usize,
    signing_secret: &str,
) -> Result<IngestOutcome, WebhookError> {
    let header = signature_header.ok_or(WebhookError::MissingSignatureHeader)?;
    check_body_size(body.len(), max_body_bytes)?;
    verify_signature(body, header, signing_secret, DEFAULT_TOLERANCE_SECONDS)?;

    let payload: Value = serde_json::from_slice(body).map_err(|_| WebhookError::MalformedPayload)?;
    let external_event_id = payload.get("id").and_then(Value::as_str).ok_or(WebhookError::MalformedPayload)?;
    let event_type = payload.get("type").and_then(Value::as_str).ok_or(WebhookError::MalformedPayload)?;

    let inserted = gatekit_db::webhooks::insert_pending(pool, external_event_id, event_type, &payload).await?;
    Ok(match inserted {
        Some(event_id) => IngestOutcome::Accepted { event_id },
        None => IngestOutcome::Duplicate,
    })
}

/// `min(3600, 15 * 2^min(attempts, 10))` seconds (spec §4.9).
pub fn compute_backoff(attempts: i32) -> Duration {
    let exponent = attempts.clamp(0, 10) as u32;
    let seconds = 15i64.saturating_mul(2i64.saturating_pow(exponent)).min(3600);
    Duration::seconds(seconds)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    NotClaimed,
    Completed,
    Failed,
}

/// Claim one event by id and run it to a terminal outcome.
///
/// Claiming is the opaque RPC; success marks the row `completed`, failure
/// computes the next backoff from the row's (post-claim) attempt count and
/// marks it `failed` with the truncated error message attached.
#[allow(clippy::too_many_arguments)]
pub async fn claim_and_process(
    pool: &PgPool,
    billing: &dyn BillingClient,
    catalog_env: Option<&str>,
    billing_grace_days: i64,
    event_id: Uuid,
    processor_id: &str,
    ttl_seconds: i64,
    max_attempts: i32,
) -> Result<ClaimOutcome, WebhookError> {
    let claimed = gatekit_db::rpc::claim_stripe_webhook_event(pool, event_id, processor_id, ttl_seconds, max_attempts)
        .await?;
    let Some(row) = claimed else {
        return Ok(ClaimOutcome::NotClaimed);
    };

    match gatekit_billing::events::apply_event(
        pool,
        billing,
        catalog_env,
        billing_grace_days,
        &row.external_event_id,
        &row.event_type,
        &row.payload,
    )
    .await
    {
        Ok(()) => {
            gatekit_db::webhooks::mark_completed(pool, row.id).await?;
            Ok(ClaimOutcome::Completed)
        }
        Err(err) => {
            let next_attempt_at: DateTime<Utc> = Utc::now() + compute_backoff(row.attempts);
            gatekit_db::webhooks::mark_failed(pool, row.id, next_attempt_at, &err.to_string()).await?;
            Ok(ClaimOutcome::Failed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, timestamp: i64, body: &[u8]) -> String {
        let mut signed_payload = timestamp.to_string().into_bytes();
        signed_payload.push(b'.');
        signed_payload.extend_from_slice(body);
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(&signed_payload);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn verify_signature_accepts_a_freshly_signed_payload() {
        let secret = "whsec_test";
        let body = br#"{"id":"evt_1"}"#;
        let timestamp = Utc::now().timestamp();
        let signature = sign(secret, timestamp, body);
        let header = format!("t={timestamp},v1={signature}");

        assert!(verify_signature(body, &header, secret, DEFAULT_TOLERANCE_SECONDS).is_ok());
    }

    #[test]
    fn verify_signature_accepts_any_matching_candidate_during_secret_rotation() {
        let secret = "whsec_new";
        let body = br#"{"id":"evt_1"}"#;
        let timestamp = Utc::now().timestamp();
        let signature = sign(secret, timestamp, body);
        let header = format!("t={timestamp},v1=deadbeef,v1={signature}");

        assert!(verify_signature(body, &header, secret, DEFAULT_TOLERANCE_SECONDS).is_ok());
    }

    #[test]
    fn verify_signature_rejects_a_tampered_body() {
        let secret = "whsec_test";
        let timestamp = Utc::now().timestamp();
        let signature = sign(secret, timestamp, br#"{"id":"evt_1"}"#);
        let header = format!("t={timestamp},v1={signature}");

        assert!(matches!(
            verify_signature(br#"{"id":"evt_2"}"#, &header, secret, DEFAULT_TOLERANCE_SECONDS),
            Err(WebhookError::InvalidSignature)
        ));
    }

    #[test]
    fn verify_signature_rejects_a_stale_timestamp() {
        let secret = "whsec_test";
        let body = br#"{"id":"evt_1"}"#;
        let timestamp = Utc::now().timestamp() - 10_000;
        let signature = sign(secret, timestamp, body);
        let header = format!("t={timestamp},v1={signature}");

        assert!(matches!(
            verify_signature(body, &header, secret, DEFAULT_TOLERANCE_SECONDS),
            Err(WebhookError::InvalidSignature)
        ));
    }

    #[test]
    fn check_body_size_rejects_oversized_bodies() {
        assert!(check_body_size(262_145, 262_144).is_err());
        assert!(check_body_size(262_144, 262_144).is_ok());
    }

    #[test]
    fn compute_backoff_caps_at_one_hour() {
        assert_eq!(compute_backoff(0), Duration::seconds(15));
        assert_eq!(compute_backoff(1), Duration::seconds(30));
        assert_eq!(compute_backoff(10), Duration::seconds(3600));
        assert_eq!(compute_backoff(99), Duration::seconds(3600));
    }
}
