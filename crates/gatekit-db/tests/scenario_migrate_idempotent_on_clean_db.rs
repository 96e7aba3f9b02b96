/// Migrating twice on a clean database must be idempotent.
///
/// DB-backed test, skipped if GATEKIT_DATABASE_URL is not set.
#[tokio::test]
async fn migrate_idempotent_on_clean_db() -> anyhow::Result<()> {
    let url = match std::env::var(gatekit_db::ENV_DATABASE_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: GATEKIT_DATABASE_URL not set");
            return Ok(());
        }
    };

    let pool = gatekit_db::connect(&url).await?;

    gatekit_db::migrate(&pool).await?;
    gatekit_db::migrate(&pool).await?;

    Ok(())
}
