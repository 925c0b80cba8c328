//! The build-queue leasing engine.
//!
//! A row is leasable when `status IN ('pending', 'retry')` and its backoff
//! has elapsed. Leasing is one transaction with `FOR UPDATE SKIP LOCKED`, so
//! two workers can lease concurrently without ever sharing a row.

use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::Row;

use refinery_types::{BuildOutcome, BuildRow, BuildStatus, PlanSnapshot};

use crate::{backoff, json_strings, Store, StoreError};

pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

const LEASE_SQL: &str = r"
    UPDATE build_status
    SET status = 'building', attempts = attempts + 1, updated_at = now()
    WHERE id IN (
        SELECT id FROM build_status
        WHERE status IN ('pending', 'retry')
          AND (backoff_until IS NULL OR backoff_until <= now())
        ORDER BY created_at ASC
        LIMIT $1
        FOR UPDATE SKIP LOCKED
    )
    RETURNING *";

impl Store {
    /// Lease up to `max` rows: flip them to `building` and bump attempts,
    /// atomically.
    pub async fn lease_builds(&self, max: i64) -> Result<Vec<BuildRow>, StoreError> {
        let mut txn = self.pool().begin().await?;
        let rows = sqlx::query(LEASE_SQL)
            .bind(max)
            .fetch_all(&mut *txn)
            .await?;
        txn.commit().await?;
        rows.iter().map(row_to_build).collect()
    }

    /// Apply a worker's status report.
    ///
    /// `building` confirms execution is starting. Failures re-enter the
    /// queue as `retry` with exponential backoff until `max_attempts` is
    /// reached, after which the row is terminally `failed`. Recipes and hint
    /// ids mined by the auto-fix pass are persisted on the row so the next
    /// lease carries them back out.
    pub async fn report_build(
        &self,
        package: &str,
        version: &str,
        outcome: &BuildOutcome,
        max_attempts: i32,
    ) -> Result<BuildRow, StoreError> {
        let mut txn = self.pool().begin().await?;
        let current = sqlx::query(
            "SELECT attempts FROM build_status WHERE package = $1 AND version = $2 FOR UPDATE",
        )
        .bind(package)
        .bind(version)
        .fetch_optional(&mut *txn)
        .await?
        .ok_or(StoreError::NotFound)?;
        let attempts: i32 = current.try_get("attempts")?;

        let row = match outcome {
            BuildOutcome::Building => {
                sqlx::query(
                    "UPDATE build_status
                     SET status = 'building', updated_at = now()
                     WHERE package = $1 AND version = $2
                     RETURNING *",
                )
                .bind(package)
                .bind(version)
                .fetch_one(&mut *txn)
                .await?
            }
            BuildOutcome::Built => {
                sqlx::query(
                    "UPDATE build_status
                     SET status = 'built', backoff_until = NULL, last_error = '', updated_at = now()
                     WHERE package = $1 AND version = $2
                     RETURNING *",
                )
                .bind(package)
                .bind(version)
                .fetch_one(&mut *txn)
                .await?
            }
            BuildOutcome::Retry {
                error,
                recipes,
                hint_ids,
            } => {
                complete_failure(
                    &mut txn,
                    package,
                    version,
                    attempts,
                    max_attempts,
                    error,
                    Some(recipes),
                    Some(hint_ids),
                )
                .await?
            }
            BuildOutcome::Failed { error } => {
                complete_failure(
                    &mut txn,
                    package,
                    version,
                    attempts,
                    max_attempts,
                    error,
                    None,
                    None,
                )
                .await?
            }
        };
        txn.commit().await?;
        row_to_build(&row)
    }

    /// Seed `build_status` rows for every build-labeled node of a plan.
    /// Runs inside the caller's transaction so plan save and seeding commit
    /// together; upserts by (package, version).
    pub(crate) async fn seed_builds(
        txn: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        snapshot: &PlanSnapshot,
        plan_id: i64,
    ) -> Result<i64, StoreError> {
        let mut seeded = 0;
        for node in &snapshot.plan {
            if node.action != refinery_filename::PlanAction::Build {
                continue;
            }
            sqlx::query(
                "INSERT INTO build_status
                     (package, version, python_tag, platform_tag, status, attempts,
                      backoff_until, last_error, run_id, plan_id)
                 VALUES ($1, $2, $3, $4, 'pending', 0, NULL, '', $5, $6)
                 ON CONFLICT (package, version) DO UPDATE
                 SET status = 'pending', attempts = 0, backoff_until = NULL,
                     last_error = '', python_tag = EXCLUDED.python_tag,
                     platform_tag = EXCLUDED.platform_tag, run_id = EXCLUDED.run_id,
                     plan_id = EXCLUDED.plan_id, updated_at = now()",
            )
            .bind(&node.name)
            .bind(&node.version)
            .bind(&node.python_tag)
            .bind(&node.platform_tag)
            .bind(&snapshot.run_id)
            .bind(plan_id)
            .execute(&mut **txn)
            .await?;
            seeded += 1;
        }
        Ok(seeded)
    }

    pub async fn get_build(&self, package: &str, version: &str) -> Result<BuildRow, StoreError> {
        let row = sqlx::query("SELECT * FROM build_status WHERE package = $1 AND version = $2")
            .bind(package)
            .bind(version)
            .fetch_optional(self.pool())
            .await?
            .ok_or(StoreError::NotFound)?;
        row_to_build(&row)
    }

    pub async fn list_builds(&self, limit: i64) -> Result<Vec<BuildRow>, StoreError> {
        let rows = sqlx::query("SELECT * FROM build_status ORDER BY updated_at DESC LIMIT $1")
            .bind(limit)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_build).collect()
    }
}

/// Shared failure path: retry with backoff below the attempt cap, terminal
/// `failed` at it. Recipes/hint-ids update the row only when the report
/// carried a non-empty list (COALESCE keeps the previous value on NULL).
async fn complete_failure(
    txn: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    package: &str,
    version: &str,
    attempts: i32,
    max_attempts: i32,
    error: &str,
    recipes: Option<&Vec<String>>,
    hint_ids: Option<&Vec<String>>,
) -> Result<PgRow, StoreError> {
    let recipes_json = match recipes {
        Some(recipes) if !recipes.is_empty() => Some(serde_json::to_value(recipes)?),
        _ => None,
    };
    let hint_ids_json = match hint_ids {
        Some(hint_ids) if !hint_ids.is_empty() => Some(serde_json::to_value(hint_ids)?),
        _ => None,
    };

    let row = if attempts >= max_attempts {
        sqlx::query(
            "UPDATE build_status
             SET status = 'failed', backoff_until = NULL, last_error = $3,
                 recipes = COALESCE($4, recipes), hint_ids = COALESCE($5, hint_ids),
                 updated_at = now()
             WHERE package = $1 AND version = $2
             RETURNING *",
        )
        .bind(package)
        .bind(version)
        .bind(error)
        .bind(recipes_json)
        .bind(hint_ids_json)
        .fetch_one(&mut **txn)
        .await?
    } else {
        let delay = chrono::Duration::from_std(backoff(attempts))
            .unwrap_or_else(|_| chrono::Duration::seconds(600));
        sqlx::query(
            "UPDATE build_status
             SET status = 'retry', backoff_until = $3, last_error = $4,
                 recipes = COALESCE($5, recipes), hint_ids = COALESCE($6, hint_ids),
                 updated_at = now()
             WHERE package = $1 AND version = $2
             RETURNING *",
        )
        .bind(package)
        .bind(version)
        .bind(Utc::now() + delay)
        .bind(error)
        .bind(recipes_json)
        .bind(hint_ids_json)
        .fetch_one(&mut **txn)
        .await?
    };
    Ok(row)
}

fn row_to_build(row: &PgRow) -> Result<BuildRow, StoreError> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<BuildStatus>()
        .map_err(StoreError::Validation)?;
    Ok(BuildRow {
        id: row.try_get("id")?,
        package: row.try_get("package")?,
        version: row.try_get("version")?,
        python_tag: row.try_get("python_tag")?,
        platform_tag: row.try_get("platform_tag")?,
        status,
        attempts: row.try_get("attempts")?,
        backoff_until: row.try_get("backoff_until")?,
        last_error: row.try_get("last_error")?,
        recipes: json_strings(row.try_get("recipes")?),
        hint_ids: json_strings(row.try_get("hint_ids")?),
        run_id: row.try_get("run_id")?,
        plan_id: row.try_get("plan_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
