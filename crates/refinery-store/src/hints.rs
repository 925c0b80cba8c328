//! Hint catalog persistence with soft delete and substring search.

use sqlx::postgres::PgRow;
use sqlx::Row;

use refinery_types::Hint;

use crate::{json_strings, Store, StoreError};

impl Store {
    /// Validate, normalize, and upsert a hint by id.
    pub async fn upsert_hint(&self, hint: Hint) -> Result<Hint, StoreError> {
        let hint = hint.normalize();
        hint.validate()?;
        sqlx::query(
            "INSERT INTO hints
                 (id, pattern, recipes, note, tags, severity, applies_to, confidence, examples)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (id) DO UPDATE
             SET pattern = EXCLUDED.pattern, recipes = EXCLUDED.recipes,
                 note = EXCLUDED.note, tags = EXCLUDED.tags,
                 severity = EXCLUDED.severity, applies_to = EXCLUDED.applies_to,
                 confidence = EXCLUDED.confidence, examples = EXCLUDED.examples,
                 deleted_at = NULL, updated_at = now()",
        )
        .bind(&hint.id)
        .bind(&hint.pattern)
        .bind(serde_json::to_value(&hint.recipes)?)
        .bind(&hint.note)
        .bind(serde_json::to_value(&hint.tags)?)
        .bind(&hint.severity)
        .bind(serde_json::to_value(&hint.applies_to)?)
        .bind(&hint.confidence)
        .bind(serde_json::to_value(&hint.examples)?)
        .execute(self.pool())
        .await?;
        Ok(hint)
    }

    pub async fn get_hint(&self, id: &str) -> Result<Hint, StoreError> {
        let row = sqlx::query("SELECT * FROM hints WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or(StoreError::NotFound)?;
        row_to_hint(&row)
    }

    /// All live hints; soft-deleted rows are excluded.
    pub async fn list_hints(&self) -> Result<Vec<Hint>, StoreError> {
        let rows = sqlx::query("SELECT * FROM hints WHERE deleted_at IS NULL ORDER BY id")
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_hint).collect()
    }

    pub async fn delete_hint(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE hints SET deleted_at = now(), updated_at = now()
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

    /// Case-insensitive substring search across every descriptive field.
    pub async fn search_hints(&self, query: &str) -> Result<Vec<Hint>, StoreError> {
        let needle = format!("%{}%", query.replace('%', r"\%").replace('_', r"\_"));
        let rows = sqlx::query(
            "SELECT * FROM hints
             WHERE deleted_at IS NULL
               AND (id ILIKE $1 OR pattern ILIKE $1 OR note ILIKE $1
                    OR tags::text ILIKE $1 OR recipes::text ILIKE $1
                    OR applies_to::text ILIKE $1 OR examples::text ILIKE $1)
             ORDER BY id",
        )
        .bind(needle)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_hint).collect()
    }
}

fn row_to_hint(row: &PgRow) -> Result<Hint, StoreError> {
    let recipes: serde_json::Value = row.try_get("recipes")?;
    let applies_to: Option<serde_json::Value> = row.try_get("applies_to")?;
    Ok(Hint {
        id: row.try_get("id")?,
        pattern: row.try_get("pattern")?,
        recipes: serde_json::from_value(recipes)?,
        note: row.try_get("note")?,
        tags: json_strings(row.try_get("tags")?),
        severity: row.try_get("severity")?,
        applies_to: match applies_to {
            Some(value) if !value.is_null() => serde_json::from_value(value)?,
            _ => std::collections::BTreeMap::new(),
        },
        confidence: row.try_get("confidence")?,
        examples: json_strings(row.try_get("examples")?),
        deleted_at: row.try_get("deleted_at")?,
    })
}
