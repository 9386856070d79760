/// Persistence layer
///
/// Sites live in their own table behind [`SiteStore`]; the run lock,
/// settings, last-run summary and alert markers share the keyed
/// [`OptionStore`]. Both are implemented by [`LibsqlStore`].

pub mod migrations;
pub mod models;
pub mod options;
pub mod repository;

pub use options::{OptionRecord, OptionStore};
pub use repository::{LibsqlStore, SiteStore};

use anyhow::Result;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] libsql::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool::managed::PoolError<libsql::Error>),
    #[error("site already monitored: {0}")]
    DuplicateUrl(String),
    #[error("site {0} not found")]
    NotFound(i64),
    #[error("invalid check result: {0}")]
    InvalidCheckResult(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}
