//! PostgreSQL layer for the Hydra evaluation scheduler.
//!
//! Provides the jobset store trait, its Postgres implementation, and
//! the change-notification listener.

pub mod error;
pub mod jobsets;
pub mod listen;

pub use error::{DbError, DbResult};
pub use jobsets::{JobsetRow, JobsetStore, PgJobsetStore};
pub use listen::JobsetListener;

pub use sqlx::PgPool;

use sqlx::postgres::PgPoolOptions;

/// Create a new database connection pool.
pub async fn create_pool(database_url: &str) -> DbResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}
