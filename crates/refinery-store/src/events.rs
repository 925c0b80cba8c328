//! Append-only event history.

use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{QueryBuilder, Row};

use refinery_types::{Event, EventFilter};

use crate::{json_strings, Store, StoreError};

impl Store {
    /// Append one event. Timestamps default to now when the sender omitted
    /// them; rows are never updated afterwards.
    pub async fn append_event(&self, event: &Event) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO events
                 (run_id, name, version, python_tag, platform_tag, status, detail,
                  metadata, matched_hint_ids, duration_ms, timestamp)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(&event.run_id)
        .bind(&event.name)
        .bind(&event.version)
        .bind(&event.python_tag)
        .bind(&event.platform_tag)
        .bind(&event.status)
        .bind(&event.detail)
        .bind(&event.metadata)
        .bind(serde_json::to_value(&event.matched_hint_ids)?)
        .bind(event.duration_ms)
        .bind(event.timestamp.unwrap_or_else(Utc::now))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn list_events(&self, filter: &EventFilter) -> Result<Vec<Event>, StoreError> {
        let mut query: QueryBuilder<sqlx::Postgres> =
            QueryBuilder::new("SELECT * FROM events WHERE 1 = 1");
        if let Some(package) = &filter.package {
            query.push(" AND name = ").push_bind(package);
        }
        if let Some(status) = &filter.status {
            query.push(" AND status = ").push_bind(status);
        }
        if let Some(run_id) = &filter.run_id {
            query.push(" AND run_id = ").push_bind(run_id);
        }
        if let Some(since) = filter.since {
            query.push(" AND timestamp >= ").push_bind(since);
        }
        if let Some(until) = filter.until {
            query.push(" AND timestamp <= ").push_bind(until);
        }
        query.push(" ORDER BY timestamp DESC");
        query
            .push(" LIMIT ")
            .push_bind(filter.limit.unwrap_or(100));
        query
            .push(" OFFSET ")
            .push_bind(filter.offset.unwrap_or(0));

        let rows = query.build().fetch_all(self.pool()).await?;
        rows.iter().map(row_to_event).collect()
    }
}

fn row_to_event(row: &PgRow) -> Result<Event, StoreError> {
    let metadata: Option<serde_json::Value> = row.try_get("metadata")?;
    Ok(Event {
        run_id: row.try_get("run_id")?,
        name: row.try_get("name")?,
        version: row.try_get("version")?,
        python_tag: row.try_get("python_tag")?,
        platform_tag: row.try_get("platform_tag")?,
        status: row.try_get("status")?,
        detail: row.try_get("detail")?,
        metadata: metadata.unwrap_or(serde_json::Value::Null),
        matched_hint_ids: json_strings(row.try_get("matched_hint_ids")?),
        duration_ms: row.try_get("duration_ms")?,
        timestamp: Some(row.try_get("timestamp")?),
    })
}
