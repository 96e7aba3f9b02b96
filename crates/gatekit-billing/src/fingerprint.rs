//! Deterministic hashing helpers shared by C5 (checkout idempotency) and C6
//! (customer mapping idempotency keys).

use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)
}

/// `request_fingerprint = SHA-256(json{workspace_id, plan_variant_id,
/// requested_by_user_id||"anonymous"})` (spec §4.5).
pub fn checkout_request_fingerprint(
    workspace_id: Uuid,
    plan_variant_id: Uuid,
    requested_by_user_id: Option<Uuid>,
) -> String {
    let payload = json!({
        "workspace_id": workspace_id,
        "plan_variant_id": plan_variant_id,
        "requested_by_user_id": requested_by_user_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "anonymous".to_string()),
    });
    sha256_hex(&payload.to_string())
}

/// `upstream_idempotency_key = "checkout:v1:{workspace}:{variant}:{client_key}"`,
/// truncated to 255 chars via SHA-256 when longer (spec §4.5). UUIDs are
/// fixed-width, so this only ever engages defensively.
pub fn checkout_upstream_idempotency_key(
    workspace_id: Uuid,
    plan_variant_id: Uuid,
    client_key: Uuid,
) -> String {
    let raw = format!("checkout:v1:{workspace_id}:{plan_variant_id}:{client_key}");
    truncate_via_hash(raw, 255)
}

/// `customer:v2:{workspace}:{scope_hash}` (spec §4.6). `scope` is an
/// arbitrary caller-supplied string (a checkout/portal scope label, or that
/// label suffixed `:retry:{correlation_id}` on the one-shot retry path).
pub fn customer_idempotency_key(workspace_id: Uuid, scope: &str) -> String {
    let scope_hash = sha256_hex(scope);
    format!("customer:v2:{workspace_id}:{scope_hash}")
}

fn truncate_via_hash(raw: String, max_len: usize) -> String {
    if raw.len() <= max_len {
        raw
    } else {
        sha256_hex(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic_and_sensitive_to_each_input() {
        let ws = Uuid::new_v4();
        let variant = Uuid::new_v4();
        let a = checkout_request_fingerprint(ws, variant, None);
        let b = checkout_request_fingerprint(ws, variant, None);
        assert_eq!(a, b);

        let c = checkout_request_fingerprint(ws, variant, Some(Uuid::new_v4()));
        assert_ne!(a, c);
    }

    #[test]
    fn upstream_key_is_stable_for_same_inputs() {
        let ws = Uuid::new_v4();
        let variant = Uuid::new_v4();
        let key = Uuid::new_v4();
        assert_eq!(
            checkout_upstream_idempotency_key(ws, variant, key),
            checkout_upstream_idempotency_key(ws, variant, key)
        );
    }

    #[test]
    fn customer_key_differs_by_scope() {
        let ws = Uuid::new_v4();
        assert_ne!(
            customer_idempotency_key(ws, "checkout"),
            customer_idempotency_key(ws, "portal")
        );
    }
}
