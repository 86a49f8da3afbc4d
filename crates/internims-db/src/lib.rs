//! Storage layer for the InterNIMS peer registry.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! and the embedded migrations that create the four registry tables:
//!
//! | Table | Owner |
//! |-------|-------|
//! | `authorized_hosts` | authorized host store |
//! | `cram_challenges` | challenge manager |
//! | `peers` | peer registry |
//! | `peer_history` | peer history |
//!
//! The registry core relies only on single-statement atomicity (upserts,
//! `DELETE ... RETURNING`) and transactions, never on in-process locking.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};

use thiserror::Error;

/// Errors from [`open_registry`].
#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("failed to get database connection: {0}")]
    Connection(#[from] r2d2::Error),

    #[error(transparent)]
    Migration(#[from] MigrationError),
}

/// Opens the registry database at `path`, creating it if needed, and brings
/// its schema up to date.
///
/// # Errors
///
/// Returns [`DbError`] if the pool cannot be built or a migration fails.
pub fn open_registry(path: &str, settings: DbRuntimeSettings) -> Result<DbPool, DbError> {
    let pool = create_pool(path, settings)?;
    let applied = run_migrations(&*pool.get()?)?;
    if applied > 0 {
        tracing::info!(count = applied, path, "applied database migrations");
    }
    Ok(pool)
}
