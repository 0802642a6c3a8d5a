// Store layer: each table lives in its own file with `impl RelayRepository`.

use sqlx::sqlite::SqlitePool;

use crate::retry::RetryConfig;

mod messages;
mod sessions;

#[cfg(test)]
pub(crate) mod test_helpers;

#[derive(Clone)]
pub struct RelayRepository {
    pub(crate) pool: SqlitePool,
    pub(crate) retry: RetryConfig,
}

impl RelayRepository {
    pub fn new(pool: SqlitePool, retry: RetryConfig) -> Self {
        Self { pool, retry }
    }

    /// Round-trip to the database, for readiness probes.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
