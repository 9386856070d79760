use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Row, TransactionBehavior, params};

use super::StoreError;
use super::models::{Site, SiteEvent, SiteFilter, Stats, StatusUpdate};
use crate::monitoring::types::{CheckResult, SSL_WARNING_DAYS, SiteStatus};
use crate::pool::{LibsqlManager, LibsqlPool};

const SITE_COLUMNS: &str = "id, url, notify_email, status, last_checked, response_time, \
     ssl_expiry_date, ssl_issuer, ssl_days_remaining, check_count, down_count, created_at, updated_at";

/// Keyed store of monitored sites
#[async_trait]
pub trait SiteStore: Send + Sync {
    async fn get_site(&self, id: i64) -> Result<Option<Site>, StoreError>;

    async fn get_sites(&self, filter: &SiteFilter) -> Result<Vec<Site>, StoreError>;

    /// Sites never checked or last checked longer than `interval_minutes`
    /// ago, never-checked first, at most `limit`.
    async fn get_sites_for_checking(&self, limit: u32, interval_minutes: f64) -> Result<Vec<Site>, StoreError>;

    /// Insert a validated URL and return its id
    async fn add_site(&self, url: &str, notify_email: Option<&str>) -> Result<i64, StoreError>;

    async fn url_exists(&self, url: &str) -> Result<bool, StoreError>;

    /// Record a check atomically and report the transitions it caused.
    async fn update_status(&self, id: i64, result: &CheckResult) -> Result<StatusUpdate, StoreError>;

    async fn delete_site(&self, id: i64) -> Result<bool, StoreError>;

    async fn get_stats(&self) -> Result<Stats, StoreError>;
}

/// LibSQL implementation of [`SiteStore`] and [`super::OptionStore`]
#[derive(Clone)]
pub struct LibsqlStore {
    pool: LibsqlPool,
}

impl LibsqlStore {
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    pub(super) async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>, StoreError> {
        Ok(self.pool.get().await?)
    }

    async fn fetch_site(conn: &Connection, id: i64) -> Result<Option<Site>, StoreError> {
        let mut rows = conn
            .query(&format!("SELECT {SITE_COLUMNS} FROM sites WHERE id = ? LIMIT 1"), params![id])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row_to_site(&row)?)),
            None => Ok(None),
        }
    }

    async fn collect_sites(mut rows: libsql::Rows) -> Result<Vec<Site>, StoreError> {
        let mut sites = Vec::new();
        while let Some(row) = rows.next().await? {
            sites.push(row_to_site(&row)?);
        }
        Ok(sites)
    }
}

fn row_to_site(row: &Row) -> Result<Site, StoreError> {
    let status = row
        .get::<Option<String>>(3)?
        .map(|text| text.parse::<SiteStatus>())
        .transpose()
        .map_err(StoreError::Corrupt)?;

    Ok(Site {
        id: row.get(0)?,
        url: row.get(1)?,
        notify_email: row.get::<Option<String>>(2)?.filter(|email| !email.is_empty()),
        status,
        last_checked: row.get::<Option<i64>>(4)?.map(Site::i64_to_timestamp),
        response_time: row.get(5)?,
        ssl_expiry_date: row.get::<Option<i64>>(6)?.map(Site::i64_to_timestamp),
        ssl_issuer: row.get(7)?,
        ssl_days_remaining: row.get(8)?,
        check_count: row.get(9)?,
        down_count: row.get(10)?,
        created_at: Site::i64_to_timestamp(row.get(11)?),
        updated_at: Site::i64_to_timestamp(row.get(12)?),
    })
}

/// Events caused by applying `result` to a site whose previous status was
/// `old_status`.
///
/// A status change is reported when the status differs and either a
/// previous status was known or the first check already found a problem.
pub(crate) fn transition_events(
    site_id: i64,
    url: &str,
    old_status: Option<&SiteStatus>,
    result: &CheckResult,
) -> Vec<SiteEvent> {
    let mut events = Vec::new();
    let new_status = &result.status;

    if old_status != Some(new_status) && (old_status.is_some() || new_status.is_problem()) {
        events.push(SiteEvent::StatusChanged {
            site_id,
            url: url.to_string(),
            old_status: old_status.cloned(),
            new_status: new_status.clone(),
        });
    }

    if let Some(days) = result.ssl_days_remaining {
        if days > 0 && days <= SSL_WARNING_DAYS {
            events.push(SiteEvent::SslExpiring { site_id, url: url.to_string(), days_remaining: days });
        }
    }

    events
}

fn is_unique_violation(err: &libsql::Error) -> bool {
    err.to_string().contains("UNIQUE constraint failed")
}

#[async_trait]
impl SiteStore for LibsqlStore {
    async fn get_site(&self, id: i64) -> Result<Option<Site>, StoreError> {
        let conn = self.get_conn().await?;
        Self::fetch_site(&conn, id).await
    }

    async fn get_sites(&self, filter: &SiteFilter) -> Result<Vec<Site>, StoreError> {
        let conn = self.get_conn().await?;

        // Column and direction come from enums, never from caller text.
        let mut sql = format!("SELECT {SITE_COLUMNS} FROM sites");
        if filter.status.is_some() {
            sql.push_str(" WHERE status = ?1");
        }
        sql.push_str(&format!(" ORDER BY {} {}, id {}", filter.order_by.column(), filter.order.keyword(), filter.order.keyword()));
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let rows = match &filter.status {
            Some(status) => conn.query(&sql, params![status.clone()]).await?,
            None => conn.query(&sql, ()).await?,
        };

        Self::collect_sites(rows).await
    }

    async fn get_sites_for_checking(&self, limit: u32, interval_minutes: f64) -> Result<Vec<Site>, StoreError> {
        let conn = self.get_conn().await?;
        let cutoff = Utc::now().timestamp() - (interval_minutes * 60.0).round() as i64;

        let rows = conn
            .query(
                &format!(
                    "SELECT {SITE_COLUMNS} FROM sites
                     WHERE last_checked IS NULL OR last_checked < ?
                     ORDER BY last_checked ASC, id ASC
                     LIMIT ?"
                ),
                params![cutoff, limit as i64],
            )
            .await?;

        Self::collect_sites(rows).await
    }

    async fn add_site(&self, url: &str, notify_email: Option<&str>) -> Result<i64, StoreError> {
        let conn = self.get_conn().await?;
        let now = Utc::now().timestamp();
        let email = notify_email.filter(|email| !email.is_empty()).map(str::to_string);

        let inserted = conn
            .execute(
                "INSERT INTO sites (url, notify_email, check_count, down_count, created_at, updated_at)
                 VALUES (?, ?, 0, 0, ?, ?)",
                params![url.to_string(), email, now, now],
            )
            .await;

        match inserted {
            Ok(_) => Ok(conn.last_insert_rowid()),
            Err(err) if is_unique_violation(&err) => Err(StoreError::DuplicateUrl(url.to_string())),
            Err(err) => Err(err.into()),
        }
    }

    async fn url_exists(&self, url: &str) -> Result<bool, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn.query("SELECT COUNT(*) FROM sites WHERE url = ?", params![url.to_string()]).await?;

        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)? > 0),
            None => Ok(false),
        }
    }

    async fn update_status(&self, id: i64, result: &CheckResult) -> Result<StatusUpdate, StoreError> {
        result.validate().map_err(StoreError::InvalidCheckResult)?;

        let conn = self.get_conn().await?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate).await?;

        let current = Self::fetch_site(&tx, id).await?.ok_or(StoreError::NotFound(id))?;
        let now = Utc::now().timestamp();
        let down_increment: i64 = if result.status.is_problem() { 1 } else { 0 };

        tx.execute(
            "UPDATE sites SET
                status = ?,
                last_checked = ?,
                updated_at = ?,
                check_count = check_count + 1,
                down_count = down_count + ?,
                response_time = COALESCE(?, response_time),
                ssl_expiry_date = COALESCE(?, ssl_expiry_date),
                ssl_issuer = COALESCE(?, ssl_issuer),
                ssl_days_remaining = COALESCE(?, ssl_days_remaining)
             WHERE id = ?",
            params![
                result.status.to_string(),
                now,
                now,
                down_increment,
                result.response_time,
                result.ssl_expiry_date.map(Site::timestamp_to_i64),
                result.ssl_issuer.clone(),
                result.ssl_days_remaining,
                id
            ],
        )
        .await?;

        let site = Self::fetch_site(&tx, id).await?.ok_or(StoreError::NotFound(id))?;
        tx.commit().await?;

        let events = transition_events(id, &current.url, current.status.as_ref(), result);
        Ok(StatusUpdate { site, events })
    }

    async fn delete_site(&self, id: i64) -> Result<bool, StoreError> {
        let conn = self.get_conn().await?;
        let deleted = conn.execute("DELETE FROM sites WHERE id = ?", params![id]).await?;
        Ok(deleted > 0)
    }

    async fn get_stats(&self) -> Result<Stats, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT
                    COUNT(*),
                    COALESCE(SUM(CASE WHEN status = 'UP' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'DOWN' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status LIKE 'ERROR%' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status IS NULL THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN ssl_days_remaining IS NOT NULL
                        AND ssl_days_remaining <= ?
                        AND ssl_days_remaining > 0 THEN 1 ELSE 0 END), 0)
                 FROM sites",
                params![SSL_WARNING_DAYS],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(Stats::default());
        };

        Ok(Stats {
            total: row.get(0)?,
            up: row.get(1)?,
            down: row.get(2)?,
            error: row.get(3)?,
            unknown: row.get(4)?,
            ssl_expiring_soon: row.get(5)?,
        })
    }
}
