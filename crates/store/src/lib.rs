//! Postgres persistence for the voxlane runtime.
//!
//! The database is the single source of truth: every cross-process
//! handshake (handoff, dispatch claim, launch delivery) is a row
//! transition here, claimed with `FOR UPDATE SKIP LOCKED` so worker
//! replicas cooperate without an external queue.

pub mod calls;
pub mod dispatches;
pub mod events;
pub mod launch_jobs;
pub mod secrets;
pub mod tools;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use vx_domain::config::DatabaseConfig;
use vx_domain::{Error, Result};

/// Map a sqlx failure into the shared error type.
pub(crate) fn db_err(e: sqlx::Error) -> Error {
    Error::Database(e.to_string())
}

/// Open the shared connection pool. Lazy — the first query connects.
pub fn connect(cfg: &DatabaseConfig) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(cfg.max_connections)
        .connect_lazy(&cfg.url)
        .map_err(db_err)
}

/// Apply the bundled migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))
}
