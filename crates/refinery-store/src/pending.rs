//! Pending-input rows, including restoration by digest on re-upload.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::Row;

use refinery_types::{PendingInput, PendingStatus};

use crate::{Store, StoreError};

impl Store {
    /// Insert a new pending input, or restore a soft-deleted row carrying
    /// the same content digest: same id, timestamps cleared, back to
    /// `pending`. Re-uploading identical content never duplicates rows.
    pub async fn insert_pending(
        &self,
        filename: &str,
        digest: &str,
        size: i64,
        source_type: &str,
        bucket: &str,
        key: &str,
        content_type: &str,
    ) -> Result<PendingInput, StoreError> {
        let restored = sqlx::query(
            "UPDATE pending_inputs
             SET status = 'pending', filename = $2, size = $3, deleted_at = NULL,
                 planned_at = NULL, processed_at = NULL, loaded_at = now(), updated_at = now()
             WHERE digest = $1 AND deleted_at IS NOT NULL
             RETURNING *",
        )
        .bind(digest)
        .bind(filename)
        .bind(size)
        .fetch_optional(self.pool())
        .await?;
        if let Some(row) = restored {
            tracing::info!(digest, "restored soft-deleted pending input");
            return row_to_pending(&row);
        }

        let row = sqlx::query(
            "INSERT INTO pending_inputs
                 (filename, digest, size, status, source_type, bucket, key, content_type, loaded_at)
             VALUES ($1, $2, $3, 'pending', $4, $5, $6, $7, now())
             RETURNING *",
        )
        .bind(filename)
        .bind(digest)
        .bind(size)
        .bind(source_type)
        .bind(bucket)
        .bind(key)
        .bind(content_type)
        .fetch_one(self.pool())
        .await?;
        row_to_pending(&row)
    }

    /// List non-deleted rows, optionally restricted to one status.
    pub async fn list_pending(
        &self,
        status: Option<PendingStatus>,
    ) -> Result<Vec<PendingInput>, StoreError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT * FROM pending_inputs
                     WHERE deleted_at IS NULL AND status = $1
                     ORDER BY id DESC",
                )
                .bind(status.as_str())
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM pending_inputs WHERE deleted_at IS NULL ORDER BY id DESC",
                )
                .fetch_all(self.pool())
                .await?
            }
        };
        rows.iter().map(row_to_pending).collect()
    }

    pub async fn get_pending(&self, id: i64) -> Result<PendingInput, StoreError> {
        let row = sqlx::query("SELECT * FROM pending_inputs WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or(StoreError::NotFound)?;
        row_to_pending(&row)
    }

    /// Move a row through its lifecycle, stamping the matching timestamp.
    pub async fn mark_pending(
        &self,
        id: i64,
        status: PendingStatus,
        error: Option<&str>,
    ) -> Result<PendingInput, StoreError> {
        let row = sqlx::query(
            "UPDATE pending_inputs
             SET status = $2,
                 planned_at = CASE WHEN $2 = 'planned' THEN now() ELSE planned_at END,
                 processed_at = CASE WHEN $2 IN ('build_queued', 'failed') THEN now()
                                     ELSE processed_at END,
                 metadata = CASE WHEN $3::text IS NULL THEN metadata
                                 ELSE jsonb_build_object('error', $3::text) END,
                 updated_at = now()
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(error)
        .fetch_optional(self.pool())
        .await?
        .ok_or(StoreError::NotFound)?;
        row_to_pending(&row)
    }

    pub async fn soft_delete_pending(&self, id: i64) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE pending_inputs
             SET status = 'deleted', deleted_at = now(), updated_at = now()
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub async fn restore_pending(&self, id: i64) -> Result<PendingInput, StoreError> {
        let row = sqlx::query(
            "UPDATE pending_inputs
             SET status = 'pending', deleted_at = NULL, updated_at = now()
             WHERE id = $1 AND deleted_at IS NOT NULL
             RETURNING *",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?
        .ok_or(StoreError::NotFound)?;
        row_to_pending(&row)
    }

    /// Atomically claim up to `max` pending rows for planning, flipping them
    /// to `planning` so a concurrent popper cannot claim the same row.
    pub async fn pop_pending_bulk(&self, max: i64) -> Result<Vec<PendingInput>, StoreError> {
        let rows = sqlx::query(
            "UPDATE pending_inputs
             SET status = 'planning', updated_at = now()
             WHERE id IN (
                 SELECT id FROM pending_inputs
                 WHERE deleted_at IS NULL AND status = 'pending'
                 ORDER BY id ASC
                 LIMIT $1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING *",
        )
        .bind(max)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_pending).collect()
    }
}

fn row_to_pending(row: &PgRow) -> Result<PendingInput, StoreError> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<PendingStatus>()
        .map_err(StoreError::Validation)?;
    let metadata: Option<serde_json::Value> = row.try_get("metadata")?;
    let loaded_at: Option<DateTime<Utc>> = row.try_get("loaded_at")?;
    Ok(PendingInput {
        id: row.try_get("id")?,
        filename: row.try_get("filename")?,
        digest: row.try_get("digest")?,
        size: row.try_get("size")?,
        status,
        source_type: row.try_get("source_type")?,
        bucket: row.try_get("bucket")?,
        key: row.try_get("key")?,
        content_type: row.try_get("content_type")?,
        metadata: metadata.unwrap_or(serde_json::Value::Null),
        loaded_at,
        planned_at: row.try_get("planned_at")?,
        processed_at: row.try_get("processed_at")?,
        deleted_at: row.try_get("deleted_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
