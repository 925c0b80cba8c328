//! Manifest entries, upserted by (name, version).

use sqlx::postgres::PgRow;
use sqlx::Row;

use refinery_types::ManifestEntry;

use crate::{json_strings, Store, StoreError};

impl Store {
    pub async fn upsert_manifest_entry(&self, entry: &ManifestEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO manifest_entries
                 (name, version, wheel_url, repair_url, repair_digest, runtime_url,
                  pack_urls, python_tag, platform_tag, status)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (name, version) DO UPDATE
             SET wheel_url = EXCLUDED.wheel_url, repair_url = EXCLUDED.repair_url,
                 repair_digest = EXCLUDED.repair_digest, runtime_url = EXCLUDED.runtime_url,
                 pack_urls = EXCLUDED.pack_urls, python_tag = EXCLUDED.python_tag,
                 platform_tag = EXCLUDED.platform_tag, status = EXCLUDED.status",
        )
        .bind(&entry.name)
        .bind(&entry.version)
        .bind(&entry.wheel_url)
        .bind(&entry.repair_url)
        .bind(&entry.repair_digest)
        .bind(&entry.runtime_url)
        .bind(serde_json::to_value(&entry.pack_urls)?)
        .bind(&entry.python_tag)
        .bind(&entry.platform_tag)
        .bind(&entry.status)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn list_manifest(&self) -> Result<Vec<ManifestEntry>, StoreError> {
        let rows = sqlx::query("SELECT * FROM manifest_entries ORDER BY name, version")
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_manifest).collect()
    }
}

fn row_to_manifest(row: &PgRow) -> Result<ManifestEntry, StoreError> {
    Ok(ManifestEntry {
        name: row.try_get("name")?,
        version: row.try_get("version")?,
        wheel_url: row.try_get("wheel_url")?,
        repair_url: row.try_get("repair_url")?,
        repair_digest: row.try_get("repair_digest")?,
        runtime_url: row.try_get("runtime_url")?,
        pack_urls: json_strings(row.try_get("pack_urls")?),
        python_tag: row.try_get("python_tag")?,
        platform_tag: row.try_get("platform_tag")?,
        status: row.try_get("status")?,
        created_at: Some(row.try_get("created_at")?),
    })
}
