use anyhow::Result;
use sqlx::SqlitePool;

/// Create the ledger schema if it does not exist yet. Safe to run on every
/// open.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Create notes table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS notes (
            path TEXT PRIMARY KEY,
            note_hash TEXT NOT NULL,
            metadata_json TEXT,
            seen_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create emissions table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS emissions (
            consumer TEXT NOT NULL,
            note_path TEXT NOT NULL,
            note_hash TEXT NOT NULL,
            emitted_at INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'success',
            metadata_json TEXT,
            PRIMARY KEY (consumer, note_path)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_emissions_consumer_hash ON emissions(consumer, note_hash)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_emissions_note_path ON emissions(note_path)")
        .execute(pool)
        .await?;

    Ok(())
}
