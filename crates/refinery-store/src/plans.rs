//! Plan persistence. Saving a plan and seeding its build rows commit in one
//! transaction: an orphan plan with no seeds (or seeds with no plan) cannot
//! be observed.

use sqlx::postgres::PgRow;
use sqlx::Row;

use refinery_types::PlanSnapshot;

use crate::{Store, StoreError};

/// Outcome of a plan save: the new id and how many build rows were seeded.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct SavedPlan {
    pub id: i64,
    pub seeded: i64,
}

impl Store {
    pub async fn save_plan(&self, snapshot: &PlanSnapshot) -> Result<SavedPlan, StoreError> {
        let mut txn = self.pool().begin().await?;
        let row = sqlx::query(
            "INSERT INTO plans (run_id, plan, dag) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(&snapshot.run_id)
        .bind(serde_json::to_value(&snapshot.plan)?)
        .bind(serde_json::to_value(&snapshot.dag)?)
        .fetch_one(&mut *txn)
        .await?;
        let id: i64 = row.try_get("id")?;
        let seeded = Self::seed_builds(&mut txn, snapshot, id).await?;
        txn.commit().await?;
        tracing::info!(plan_id = id, run_id = %snapshot.run_id, seeded, "plan saved");
        Ok(SavedPlan { id, seeded })
    }

    pub async fn latest_plan(&self) -> Result<PlanSnapshot, StoreError> {
        let row = sqlx::query("SELECT * FROM plans ORDER BY id DESC LIMIT 1")
            .fetch_optional(self.pool())
            .await?
            .ok_or(StoreError::NotFound)?;
        row_to_plan(&row)
    }

    pub async fn get_plan(&self, id: i64) -> Result<PlanSnapshot, StoreError> {
        let row = sqlx::query("SELECT * FROM plans WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or(StoreError::NotFound)?;
        row_to_plan(&row)
    }

    pub async fn list_plans(&self, limit: i64) -> Result<Vec<PlanSnapshot>, StoreError> {
        let rows = sqlx::query("SELECT * FROM plans ORDER BY id DESC LIMIT $1")
            .bind(limit)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_plan).collect()
    }

    pub async fn delete_plan(&self, id: i64) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM plans WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

fn row_to_plan(row: &PgRow) -> Result<PlanSnapshot, StoreError> {
    let plan: serde_json::Value = row.try_get("plan")?;
    let dag: Option<serde_json::Value> = row.try_get("dag")?;
    Ok(PlanSnapshot {
        id: row.try_get("id")?,
        run_id: row.try_get("run_id")?,
        plan: serde_json::from_value(plan)?,
        dag: match dag {
            Some(value) if !value.is_null() => serde_json::from_value(value)?,
            _ => Vec::new(),
        },
    })
}
