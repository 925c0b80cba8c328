//! Singleton settings row, stored as JSONB.

use sqlx::Row;

use refinery_types::Settings;

use crate::{Store, StoreError};

impl Store {
    /// Read settings with defaults applied. A missing row reads as the
    /// defaults; an explicit `false` in the stored JSON survives.
    pub async fn get_settings(&self) -> Result<Settings, StoreError> {
        let row = sqlx::query("SELECT settings FROM app_settings WHERE id = 1")
            .fetch_optional(self.pool())
            .await?;
        let settings = match row {
            Some(row) => {
                let value: serde_json::Value = row.try_get("settings")?;
                serde_json::from_value(value)?
            }
            None => Settings::default(),
        };
        Ok(settings.apply_defaults())
    }

    pub async fn put_settings(&self, settings: &Settings) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO app_settings (id, settings) VALUES (1, $1)
             ON CONFLICT (id) DO UPDATE SET settings = EXCLUDED.settings, updated_at = now()",
        )
        .bind(serde_json::to_value(settings)?)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
