//! Build log storage. Size bounds are enforced at the API edge; the store
//! persists whatever it is handed.

use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::Row;

use refinery_types::LogEntry;

use crate::{Store, StoreError};

impl Store {
    pub async fn put_log(&self, entry: &LogEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO build_logs (name, version, content, timestamp)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(&entry.name)
        .bind(&entry.version)
        .bind(&entry.content)
        .bind(entry.timestamp.unwrap_or_else(Utc::now))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Latest log for one (name, version).
    pub async fn get_log(&self, name: &str, version: &str) -> Result<LogEntry, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM build_logs WHERE name = $1 AND version = $2
             ORDER BY id DESC LIMIT 1",
        )
        .bind(name)
        .bind(version)
        .fetch_optional(self.pool())
        .await?
        .ok_or(StoreError::NotFound)?;
        row_to_log(&row)
    }

    pub async fn search_logs(&self, query: &str, limit: i64) -> Result<Vec<LogEntry>, StoreError> {
        let needle = format!("%{}%", query.replace('%', r"\%").replace('_', r"\_"));
        let rows = sqlx::query(
            "SELECT * FROM build_logs WHERE content ILIKE $1 ORDER BY id DESC LIMIT $2",
        )
        .bind(needle)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_log).collect()
    }
}

fn row_to_log(row: &PgRow) -> Result<LogEntry, StoreError> {
    Ok(LogEntry {
        name: row.try_get("name")?,
        version: row.try_get("version")?,
        content: row.try_get("content")?,
        timestamp: Some(row.try_get("timestamp")?),
    })
}
