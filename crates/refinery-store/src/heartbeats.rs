//! Latest heartbeat per worker.

use sqlx::Row;

use refinery_types::Heartbeat;

use crate::{Store, StoreError};

impl Store {
    pub async fn record_heartbeat(&self, beat: &Heartbeat) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO worker_heartbeats
                 (worker_id, run_id, active_builds, build_pool_size, plan_pool_size, interval_sec)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (worker_id) DO UPDATE
             SET run_id = EXCLUDED.run_id, active_builds = EXCLUDED.active_builds,
                 build_pool_size = EXCLUDED.build_pool_size,
                 plan_pool_size = EXCLUDED.plan_pool_size,
                 interval_sec = EXCLUDED.interval_sec, updated_at = now()",
        )
        .bind(&beat.worker_id)
        .bind(&beat.run_id)
        .bind(i32::try_from(beat.active_builds).unwrap_or(i32::MAX))
        .bind(i32::try_from(beat.build_pool_size).unwrap_or(i32::MAX))
        .bind(i32::try_from(beat.plan_pool_size).unwrap_or(i32::MAX))
        .bind(i64::try_from(beat.interval_sec).unwrap_or(i64::MAX))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn list_heartbeats(&self) -> Result<Vec<Heartbeat>, StoreError> {
        let rows = sqlx::query("SELECT * FROM worker_heartbeats ORDER BY worker_id")
            .fetch_all(self.pool())
            .await?;
        rows.iter()
            .map(|row| {
                Ok(Heartbeat {
                    worker_id: row.try_get("worker_id")?,
                    run_id: row.try_get("run_id")?,
                    active_builds: usize::try_from(row.try_get::<i32, _>("active_builds")?)
                        .unwrap_or(0),
                    build_pool_size: usize::try_from(row.try_get::<i32, _>("build_pool_size")?)
                        .unwrap_or(0),
                    plan_pool_size: usize::try_from(row.try_get::<i32, _>("plan_pool_size")?)
                        .unwrap_or(0),
                    interval_sec: u64::try_from(row.try_get::<i64, _>("interval_sec")?)
                        .unwrap_or(0),
                })
            })
            .collect()
    }
}
