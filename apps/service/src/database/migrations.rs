use anyhow::Result;
use chrono::Utc;
use libsql::{Connection, Transaction, TransactionBehavior};

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 2;

/// Run database migrations
///
/// Both binaries call this on startup. Each step runs in its own
/// `BEGIN IMMEDIATE` transaction and re-reads the version after taking the
/// write lock, so concurrent starters apply every step exactly once.
pub async fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            description TEXT
        )",
        (),
    )
    .await?;

    let current_version = get_current_version(conn).await?;

    if current_version >= SCHEMA_VERSION {
        tracing::debug!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    tracing::info!("Running migrations from version {} to {}", current_version, SCHEMA_VERSION);

    if current_version < 1 {
        if let Some(tx) = begin_step(conn, 1).await? {
            run_migration_v1(&tx).await?;
            record_migration(&tx, 1, "Create sites table").await?;
            tx.commit().await?;
        }
    }

    if current_version < 2 {
        if let Some(tx) = begin_step(conn, 2).await? {
            run_migration_v2(&tx).await?;
            record_migration(&tx, 2, "Create options table").await?;
            tx.commit().await?;
        }
    }

    tracing::info!("Database migrations completed successfully (now at version {})", SCHEMA_VERSION);
    Ok(())
}

/// Take the write lock for one step; `None` when another connection applied it first.
async fn begin_step(conn: &Connection, version: i32) -> Result<Option<Transaction>> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate).await?;
    if get_current_version(&tx).await? >= version {
        tx.rollback().await?;
        return Ok(None);
    }
    Ok(Some(tx))
}

async fn get_current_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn.query("SELECT MAX(version) FROM schema_migrations", ()).await?;

    if let Some(row) = rows.next().await? {
        let version: Option<i32> = row.get(0)?;
        Ok(version.unwrap_or(0))
    } else {
        Ok(0)
    }
}

async fn record_migration(conn: &Connection, version: i32, description: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        libsql::params![version, Utc::now().timestamp(), description],
    )
    .await?;

    tracing::info!("Applied migration v{}: {}", version, description);
    Ok(())
}

/// Migration v1: monitored sites with rolling counters
async fn run_migration_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sites (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            url TEXT NOT NULL UNIQUE,
            notify_email TEXT,
            status TEXT,
            last_checked INTEGER,
            response_time REAL,
            ssl_expiry_date INTEGER,
            ssl_issuer TEXT,
            ssl_days_remaining INTEGER,
            check_count INTEGER NOT NULL DEFAULT 0,
            down_count INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute("CREATE INDEX IF NOT EXISTS idx_sites_status ON sites(status)", ()).await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_sites_last_checked ON sites(last_checked)", ()).await?;

    Ok(())
}

/// Migration v2: keyed options with optional expiry (lock, settings, markers)
async fn run_migration_v2(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS options (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            expires_at INTEGER,
            updated_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute("CREATE INDEX IF NOT EXISTS idx_options_expires_at ON options(expires_at)", ()).await?;

    Ok(())
}
