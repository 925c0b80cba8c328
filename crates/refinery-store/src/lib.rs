//! The persistent store: a Postgres pool plus every durable record the
//! refinery keeps (events, hints, logs, manifests, plans, pending inputs,
//! build-status rows, heartbeats, settings).
//!
//! The schema is bootstrapped in place with `CREATE TABLE IF NOT EXISTS`;
//! there is no external migration step to run before first use.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub use backoff::{backoff, BACKOFF_BASE, BACKOFF_CAP, BACKOFF_JITTER};
pub use builds::DEFAULT_MAX_ATTEMPTS;

mod backoff;
mod builds;
mod events;
mod heartbeats;
mod hints;
mod logs;
mod manifests;
mod pending;
mod plans;
mod schema;
mod settings;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("{0}")]
    Validation(String),
    #[error("database error")]
    Sqlx(#[from] sqlx::Error),
    #[error("stored JSON was malformed")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Hint(#[from] refinery_types::HintError),
}

#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Connect and bootstrap the schema.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.bootstrap().await?;
        Ok(store)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn bootstrap(&self) -> Result<(), StoreError> {
        for statement in schema::STATEMENTS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::debug!("store schema bootstrapped");
        Ok(())
    }

    /// Readiness probe.
    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Decode a JSONB array column into strings, treating NULL as empty.
pub(crate) fn json_strings(value: Option<serde_json::Value>) -> Vec<String> {
    match value {
        Some(serde_json::Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| item.as_str().map(String::from))
            .collect(),
        _ => Vec::new(),
    }
}
