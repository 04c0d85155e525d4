use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

pub mod memory;
pub mod queries;
pub mod store;
pub mod users;

pub use memory::MemoryJobStore;
pub use queries::PgJobStore;
pub use store::{JobFilter, JobStore, StoreError};
pub use users::{MemoryUserStore, PgUserStore, UserStore};

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}
