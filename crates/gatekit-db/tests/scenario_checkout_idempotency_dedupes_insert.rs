use chrono::{Duration, Utc};
use uuid::Uuid;

/// A second `insert_in_progress` with the same `(workspace_id, client_key)`
/// must not create a second row (C5 idempotency ledger).
///
/// DB-backed test, skipped if GATEKIT_DATABASE_URL is not set.
#[tokio::test]
async fn checkout_idempotency_key_dedupes_inserts() -> anyhow::Result<()> {
    let url = match std::env::var(gatekit_db::ENV_DATABASE_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: GATEKIT_DATABASE_URL not set");
            return Ok(());
        }
    };

    let pool = gatekit_db::connect(&url).await?;
    gatekit_db::migrate(&pool).await?;

    let workspace_id = Uuid::new_v4();
    let client_key = Uuid::new_v4();
    let plan_variant_id = Uuid::new_v4();
    let expires_at = Utc::now() + Duration::minutes(10);

    let first = gatekit_db::checkout::insert_in_progress(
        &pool,
        workspace_id,
        client_key,
        plan_variant_id,
        "fingerprint-a",
        "idem-key-a",
        expires_at,
    )
    .await?;
    assert!(first.is_some(), "expected first insert to create the row");

    let second = gatekit_db::checkout::insert_in_progress(
        &pool,
        workspace_id,
        client_key,
        plan_variant_id,
        "fingerprint-b",
        "idem-key-b",
        expires_at,
    )
    .await?;
    assert!(second.is_none(), "expected second insert to be deduped");

    let loaded = gatekit_db::checkout::load(&pool, workspace_id, client_key).await?;
    assert!(loaded.is_some());
    assert_eq!(loaded.unwrap().request_fingerprint, "fingerprint-a");

    Ok(())
}
