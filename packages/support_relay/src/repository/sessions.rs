use std::time::Duration;

use crate::error::RelayResult;
use crate::models::AdminSession;
use crate::retry::{is_transient_sqlx, with_retry};

use super::{RelayRepository, now_millis};

impl RelayRepository {
    /// Create the admin session for `token`, or extend it if one exists.
    /// An existing row keeps its `seq`, so the admin name is stable.
    pub async fn upsert_admin_session(
        &self,
        token: &str,
        ttl: Duration,
    ) -> RelayResult<AdminSession> {
        let pool = &self.pool;
        let now = now_millis();
        let expires_at = now.saturating_add(ttl.as_millis().min(i64::MAX as u128) as i64);

        let session = with_retry(&self.retry, is_transient_sqlx, move || async move {
            sqlx::query_as::<_, AdminSession>(
                r#"
                INSERT INTO admin_sessions (token, created_at, expires_at)
                VALUES (?, ?, ?)
                ON CONFLICT(token) DO UPDATE SET expires_at = excluded.expires_at
                RETURNING seq, token, created_at, expires_at
                "#,
            )
            .bind(token)
            .bind(now)
            .bind(expires_at)
            .fetch_one(pool)
            .await
        })
        .await?;

        Ok(session)
    }

    /// Live (unexpired) admin session for `token`.
    pub async fn get_admin_session(&self, token: &str) -> RelayResult<Option<AdminSession>> {
        let pool = &self.pool;
        let now = now_millis();
        let session = with_retry(&self.retry, is_transient_sqlx, move || async move {
            sqlx::query_as::<_, AdminSession>(
                "SELECT seq, token, created_at, expires_at FROM admin_sessions
                 WHERE token = ? AND expires_at > ?",
            )
            .bind(token)
            .bind(now)
            .fetch_optional(pool)
            .await
        })
        .await?;

        Ok(session)
    }

    /// Returns whether a session existed.
    pub async fn delete_admin_session(&self, token: &str) -> RelayResult<bool> {
        let pool = &self.pool;
        let result = with_retry(&self.retry, is_transient_sqlx, move || async move {
            sqlx::query("DELETE FROM admin_sessions WHERE token = ?")
                .bind(token)
                .execute(pool)
                .await
        })
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn cleanup_expired_sessions(&self) -> RelayResult<u64> {
        let pool = &self.pool;
        let now = now_millis();
        let result = with_retry(&self.retry, is_transient_sqlx, move || async move {
            sqlx::query("DELETE FROM admin_sessions WHERE expires_at <= ?")
                .bind(now)
                .execute(pool)
                .await
        })
        .await?;

        Ok(result.rows_affected())
    }

    /// Log every admin out (`relay server --reset-sessions`).
    pub async fn delete_all_admin_sessions(&self) -> RelayResult<u64> {
        let pool = &self.pool;
        let result = with_retry(&self.retry, is_transient_sqlx, move || async move {
            sqlx::query("DELETE FROM admin_sessions")
                .execute(pool)
                .await
        })
        .await?;

        Ok(result.rows_affected())
    }
}
