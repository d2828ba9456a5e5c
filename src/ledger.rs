//! Durable change ledger.
//!
//! Two tables back the ledger: `notes` holds the last fingerprint seen for
//! every record, and `emissions` holds the fingerprint each consumer last
//! settled for each record. A (consumer, record) pair is pending whenever
//! the two disagree or the emission row is missing.
//!
//! The ledger assumes a single writer per run. Each upsert runs in its own
//! transaction, which is all the atomicity that model needs.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use crate::db;
use crate::migrate;
use crate::models::{EmissionEntry, EmissionStatus, NoteEntry, Record};

pub struct Ledger {
    pool: SqlitePool,
}

impl Ledger {
    /// Open (creating if needed) the ledger at `path` and ensure the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path)
            .await
            .with_context(|| format!("Failed to open ledger: {}", path.display()))?;
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Insert or update the record's row and return the fingerprint that
    /// was stored before, `None` if the record was never seen.
    pub async fn upsert(&self, record: &Record) -> Result<Option<String>> {
        let path = record.key();
        let header_json = serde_json::to_string(&record.header)?;
        let now = chrono::Utc::now().timestamp();

        let mut tx = self.pool.begin().await?;

        let previous: Option<String> =
            sqlx::query_scalar("SELECT note_hash FROM notes WHERE path = ?")
                .bind(&path)
                .fetch_optional(&mut *tx)
                .await?;

        sqlx::query(
            r#"
            INSERT INTO notes (path, note_hash, metadata_json, seen_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                note_hash = excluded.note_hash,
                metadata_json = excluded.metadata_json,
                seen_at = excluded.seen_at
            "#,
        )
        .bind(&path)
        .bind(&record.fingerprint)
        .bind(&header_json)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(previous)
    }

    /// Delete every note row (and every emission row) whose path is not in
    /// `still_present`. Returns the number of note rows removed.
    pub async fn prune<I, S>(&self, still_present: I) -> Result<u64>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keep: HashSet<String> = still_present
            .into_iter()
            .map(|p| p.as_ref().to_string())
            .collect();

        let known: Vec<String> = sqlx::query_scalar(
            "SELECT path FROM notes UNION SELECT DISTINCT note_path FROM emissions",
        )
        .fetch_all(&self.pool)
        .await?;

        let missing: Vec<String> = known.into_iter().filter(|p| !keep.contains(p)).collect();
        if missing.is_empty() {
            return Ok(0);
        }

        let mut removed = 0u64;
        let mut tx = self.pool.begin().await?;
        for path in &missing {
            removed += sqlx::query("DELETE FROM notes WHERE path = ?")
                .bind(path)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            sqlx::query("DELETE FROM emissions WHERE note_path = ?")
                .bind(path)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        tracing::debug!(removed, "pruned vanished notes from ledger");
        Ok(removed)
    }

    /// True when `consumer` has never settled `path`, or settled a
    /// different fingerprint.
    pub async fn needs_emission(&self, consumer: &str, path: &str, fingerprint: &str) -> Result<bool> {
        let recorded: Option<String> = sqlx::query_scalar(
            "SELECT note_hash FROM emissions WHERE consumer = ? AND note_path = ?",
        )
        .bind(consumer)
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(recorded.as_deref() != Some(fingerprint))
    }

    /// Record that `consumer` handled `path` at `fingerprint`.
    pub async fn mark_emitted(
        &self,
        consumer: &str,
        path: &str,
        fingerprint: &str,
        status: EmissionStatus,
        metadata: &Value,
    ) -> Result<()> {
        let metadata_json = match metadata {
            Value::Null => None,
            Value::Object(map) if map.is_empty() => None,
            other => Some(serde_json::to_string(other)?),
        };
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO emissions (consumer, note_path, note_hash, emitted_at, status, metadata_json)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(consumer, note_path) DO UPDATE SET
                note_hash = excluded.note_hash,
                emitted_at = excluded.emitted_at,
                status = excluded.status,
                metadata_json = excluded.metadata_json
            "#,
        )
        .bind(consumer)
        .bind(path)
        .bind(fingerprint)
        .bind(now)
        .bind(status.as_str())
        .bind(metadata_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn note(&self, path: &str) -> Result<Option<NoteEntry>> {
        let row = sqlx::query(
            "SELECT path, note_hash, metadata_json, seen_at FROM notes WHERE path = ?",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<NoteEntry> {
            Ok(NoteEntry {
                path: row.try_get("path")?,
                fingerprint: row.try_get("note_hash")?,
                header_json: row
                    .try_get::<Option<String>, _>("metadata_json")?
                    .unwrap_or_else(|| "{}".to_string()),
                seen_at: row.try_get("seen_at")?,
            })
        })
        .transpose()
    }

    /// Stored fingerprint for `path`, if the note is known.
    pub async fn note_fingerprint(&self, path: &str) -> Result<Option<String>> {
        let fingerprint: Option<String> = sqlx::query_scalar("SELECT note_hash FROM notes WHERE path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(fingerprint)
    }

    pub async fn note_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notes")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn emission(&self, consumer: &str, path: &str) -> Result<Option<EmissionEntry>> {
        let row = sqlx::query(
            r#"
            SELECT consumer, note_path, note_hash, emitted_at, status, metadata_json
            FROM emissions
            WHERE consumer = ? AND note_path = ?
            "#,
        )
        .bind(consumer)
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(emission_from_row).transpose()
    }

    /// All emission rows for a consumer, ordered by path.
    pub async fn emissions_for(&self, consumer: &str) -> Result<Vec<EmissionEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT consumer, note_path, note_hash, emitted_at, status, metadata_json
            FROM emissions
            WHERE consumer = ?
            ORDER BY note_path
            "#,
        )
        .bind(consumer)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(emission_from_row).collect()
    }
}

fn emission_from_row(row: &SqliteRow) -> Result<EmissionEntry> {
    let status: String = row.try_get("status")?;
    let metadata = row
        .try_get::<Option<String>, _>("metadata_json")?
        .map(|json| serde_json::from_str(&json))
        .transpose()?;

    Ok(EmissionEntry {
        consumer: row.try_get("consumer")?,
        path: row.try_get("note_path")?,
        fingerprint: row.try_get("note_hash")?,
        status: status.parse()?,
        emitted_at: row.try_get("emitted_at")?,
        metadata,
    })
}
