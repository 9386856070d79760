use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::params;

use super::StoreError;
use super::models::Site;
use super::repository::LibsqlStore;

/// A stored option, possibly already expired
#[derive(Debug, Clone, PartialEq)]
pub struct OptionRecord {
    pub value: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl OptionRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// Keyed string records with an optional expiry.
///
/// `insert_if_absent` and `compare_and_set` are single statements, which is
/// what the run lock relies on for mutual exclusion.
#[async_trait]
pub trait OptionStore: Send + Sync {
    /// Insert unless the key exists (expired or not); `true` if inserted.
    async fn insert_if_absent(
        &self,
        key: &str,
        value: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError>;

    /// Raw record, including an expired one
    async fn get_record(&self, key: &str) -> Result<Option<OptionRecord>, StoreError>;

    /// Replace the record only if its expiry still equals `expected_expiry`.
    async fn compare_and_set(
        &self,
        key: &str,
        expected_expiry: Option<DateTime<Utc>>,
        value: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError>;

    /// Insert or overwrite
    async fn put(&self, key: &str, value: &str, expires_at: Option<DateTime<Utc>>) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Value of a live (non-expired) record
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .get_record(key)
            .await?
            .filter(|record| !record.is_expired(Utc::now()))
            .map(|record| record.value))
    }
}

#[async_trait]
impl OptionStore for LibsqlStore {
    async fn insert_if_absent(
        &self,
        key: &str,
        value: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let conn = self.get_conn().await?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO options (key, value, expires_at, updated_at) VALUES (?, ?, ?, ?)",
                params![
                    key.to_string(),
                    value.to_string(),
                    expires_at.map(Site::timestamp_to_i64),
                    Utc::now().timestamp()
                ],
            )
            .await?;
        Ok(inserted > 0)
    }

    async fn get_record(&self, key: &str) -> Result<Option<OptionRecord>, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query("SELECT value, expires_at FROM options WHERE key = ? LIMIT 1", params![key.to_string()])
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };

        Ok(Some(OptionRecord {
            value: row.get(0)?,
            expires_at: row.get::<Option<i64>>(1)?.map(Site::i64_to_timestamp),
        }))
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected_expiry: Option<DateTime<Utc>>,
        value: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let conn = self.get_conn().await?;
        let updated = conn
            .execute(
                "UPDATE options SET value = ?, expires_at = ?, updated_at = ? WHERE key = ? AND expires_at IS ?",
                params![
                    value.to_string(),
                    expires_at.map(Site::timestamp_to_i64),
                    Utc::now().timestamp(),
                    key.to_string(),
                    expected_expiry.map(Site::timestamp_to_i64)
                ],
            )
            .await?;
        Ok(updated > 0)
    }

    async fn put(&self, key: &str, value: &str, expires_at: Option<DateTime<Utc>>) -> Result<(), StoreError> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO options (key, value, expires_at, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET value = ?2, expires_at = ?3, updated_at = ?4",
            params![
                key.to_string(),
                value.to_string(),
                expires_at.map(Site::timestamp_to_i64),
                Utc::now().timestamp()
            ],
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let conn = self.get_conn().await?;
        let deleted = conn.execute("DELETE FROM options WHERE key = ?", params![key.to_string()]).await?;
        Ok(deleted > 0)
    }
}
