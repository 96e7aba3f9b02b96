//! C5 — Idempotency ledger for checkout-session creation.
//!
//! This module owns only the `(workspace, client_key)` state machine from
//! spec §4.5. It never talks to the upstream provider itself — the daemon's
//! checkout-session handler calls [`begin_checkout`] first, creates the
//! upstream session on [`CheckoutDecision::Proceed`], then reports the
//! outcome back through [`complete_checkout`] or [`fail_checkout`].

use chrono::{Duration, Utc};
use gatekit_db::DbError;
use gatekit_schemas::CheckoutIdempotencyStatus;
use uuid::Uuid;

use crate::fingerprint::{checkout_request_fingerprint, checkout_upstream_idempotency_key};

/// What the caller should do next, having presented `(workspace, client_key,
/// plan_variant_id, requested_by_user_id)`.
#[derive(Debug, Clone)]
pub enum CheckoutDecision {
    /// No prior attempt (or a prior attempt that failed) with this key and
    /// payload exists — the caller should create an upstream session using
    /// `upstream_idempotency_key`, then call [`complete_checkout`] or
    /// [`fail_checkout`].
    Proceed { upstream_idempotency_key: String },
    /// A prior attempt with the same key and payload already completed.
    /// Return the cached session to the caller with `idempotent_replay: true`.
    ReplayCompleted {
        session_id: String,
        session_url: String,
    },
    /// A concurrent request with the same key and payload is still
    /// in-flight. Maps to 409 `CHECKOUT_IN_PROGRESS`.
    InProgress,
    /// Same key, different payload, not yet expired. Maps to 409
    /// `IDEMPOTENCY_KEY_REUSED_WITH_DIFFERENT_PAYLOAD`.
    ReusedWithDifferentPayload,
    /// Same key, past its 24h expiry. Maps to 409 `IDEMPOTENCY_KEY_EXPIRED`.
    Expired,
}

const LEDGER_TTL_HOURS: i64 = 24;

/// Evaluate the ledger for `(workspace_id, client_key)` and decide the next
/// action. Inserts a fresh `in_progress` row when none exists; on a
/// unique-conflict race (two concurrent requests racing the same key) it
/// reloads the row a competing request just inserted and re-evaluates the
/// replay rules against it, rather than erroring (spec §4.5: "Race on first
/// insert is resolved by reloading the row").
pub async fn begin_checkout(
    pool: &sqlx::PgPool,
    workspace_id: Uuid,
    client_key: Uuid,
    plan_variant_id: Uuid,
    requested_by_user_id: Option<Uuid>,
) -> Result<CheckoutDecision, DbError> {
    let fingerprint = checkout_request_fingerprint(workspace_id, plan_variant_id, requested_by_user_id);
    let upstream_idempotency_key =
        checkout_upstream_idempotency_key(workspace_id, plan_variant_id, client_key);
    let expires_at = Utc::now() + Duration::hours(LEDGER_TTL_HOURS);

    let inserted = gatekit_db::checkout::insert_in_progress(
        pool,
        workspace_id,
        client_key,
        plan_variant_id,
        &fingerprint,
        &upstream_idempotency_key,
        expires_at,
    )
    .await?;

    if inserted.is_some() {
        return Ok(CheckoutDecision::Proceed {
            upstream_idempotency_key,
        });
    }

    let existing = gatekit_db::checkout::load(pool, workspace_id, client_key)
        .await?
        .ok_or_else(|| DbError::Other(anyhow::anyhow!("checkout row vanished after conflicting insert")))?;

    Ok(evaluate_replay(&existing, &fingerprint, &upstream_idempotency_key))
}

fn evaluate_replay(
    existing: &gatekit_schemas::CheckoutIdempotencyRow,
    fingerprint: &str,
    upstream_idempotency_key: &str,
) -> CheckoutDecision {
    if existing.expires_at <= Utc::now() {
        return CheckoutDecision::Expired;
    }
    if existing.request_fingerprint != fingerprint {
        return CheckoutDecision::ReusedWithDifferentPayload;
    }

    match existing.status {
        CheckoutIdempotencyStatus::Completed => match (
            &existing.upstream_session_id,
            &existing.upstream_session_url,
        ) {
            (Some(id), Some(url)) => CheckoutDecision::ReplayCompleted {
                session_id: id.clone(),
                session_url: url.clone(),
            },
            _ => CheckoutDecision::Proceed {
                upstream_idempotency_key: upstream_idempotency_key.to_string(),
            },
        },
        CheckoutIdempotencyStatus::InProgress => CheckoutDecision::InProgress,
        // A previously failed attempt with the identical payload is safe to
        // retry: the ledger's purpose is deduping upstream side effects, not
        // permanently wedging a caller behind one bad attempt.
        CheckoutIdempotencyStatus::Failed => CheckoutDecision::Proceed {
            upstream_idempotency_key: upstream_idempotency_key.to_string(),
        },
    }
}

pub async fn complete_checkout(
    pool: &sqlx::PgPool,
    workspace_id: Uuid,
    client_key: Uuid,
    session_id: &str,
    session_url: &str,
) -> Result<(), DbError> {
    gatekit_db::checkout::mark_completed(pool, workspace_id, client_key, session_id, session_url).await
}

pub async fn fail_checkout(
    pool: &sqlx::PgPool,
    workspace_id: Uuid,
    client_key: Uuid,
    error: &str,
) -> Result<(), DbError> {
    gatekit_db::checkout::mark_failed(pool, workspace_id, client_key, error).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatekit_schemas::CheckoutIdempotencyRow;

    fn row(
        status: CheckoutIdempotencyStatus,
        fingerprint: &str,
        expires_at: chrono::DateTime<Utc>,
        session: Option<(&str, &str)>,
    ) -> CheckoutIdempotencyRow {
        CheckoutIdempotencyRow {
            workspace_id: Uuid::new_v4(),
            client_key: Uuid::new_v4(),
            plan_variant_id: Uuid::new_v4(),
            request_fingerprint: fingerprint.to_string(),
            upstream_idempotency_key: "checkout:v1:x".to_string(),
            upstream_session_id: session.map(|(id, _)| id.to_string()),
            upstream_session_url: session.map(|(_, url)| url.to_string()),
            status,
            expires_at,
            last_error: None,
        }
    }

    #[test]
    fn completed_same_fingerprint_replays_session() {
        let r = row(
            CheckoutIdempotencyStatus::Completed,
            "fp",
            Utc::now() + Duration::hours(1),
            Some(("sess_1", "https://example.com/sess_1")),
        );
        match evaluate_replay(&r, "fp", "upstream-key") {
            CheckoutDecision::ReplayCompleted { session_id, .. } => assert_eq!(session_id, "sess_1"),
            other => panic!("expected ReplayCompleted, got {other:?}"),
        }
    }

    #[test]
    fn different_fingerprint_is_rejected() {
        let r = row(
            CheckoutIdempotencyStatus::Completed,
            "fp-a",
            Utc::now() + Duration::hours(1),
            Some(("sess_1", "https://example.com/sess_1")),
        );
        assert!(matches!(
            evaluate_replay(&r, "fp-b", "upstream-key"),
            CheckoutDecision::ReusedWithDifferentPayload
        ));
    }

    #[test]
    fn expired_row_is_rejected_regardless_of_fingerprint() {
        let r = row(
            CheckoutIdempotencyStatus::Completed,
            "fp",
            Utc::now() - Duration::hours(1),
            Some(("sess_1", "https://example.com/sess_1")),
        );
        assert!(matches!(evaluate_replay(&r, "fp", "upstream-key"), CheckoutDecision::Expired));
    }

    #[test]
    fn in_progress_same_fingerprint_is_in_progress() {
        let r = row(CheckoutIdempotencyStatus::InProgress, "fp", Utc::now() + Duration::hours(1), None);
        assert!(matches!(evaluate_replay(&r, "fp", "upstream-key"), CheckoutDecision::InProgress));
    }

    #[test]
    fn failed_same_fingerprint_may_retry() {
        let r = row(CheckoutIdempotencyStatus::Failed, "fp", Utc::now() + Duration::hours(1), None);
        assert!(matches!(
            evaluate_replay(&r, "fp", "upstream-key"),
            CheckoutDecision::Proceed { .. }
        ));
    }
}
