use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;

use crate::retry::RetryConfig;

/// Create a fresh RelayRepository backed by an in-memory SQLite database.
/// Each call returns an isolated database with all migrations applied.
pub async fn test_repository() -> super::RelayRepository {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory SQLite pool");

    crate::db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    let retry = RetryConfig {
        max_retries: 1,
        initial_backoff: Duration::from_millis(1),
        jitter: false,
        ..Default::default()
    };

    super::RelayRepository::new(pool, retry)
}
