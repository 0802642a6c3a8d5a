use crate::error::{RelayError, RelayResult};
use crate::models::ChatMessage;
use crate::retry::{is_transient_sqlx, with_retry};

use super::{RelayRepository, now_millis};

impl RelayRepository {
    /// Durably append one message and return its store-assigned id.
    ///
    /// The row is committed when this returns, so callers may acknowledge.
    pub async fn append_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        sender_name: &str,
        text: &str,
    ) -> RelayResult<i64> {
        if text.trim().is_empty() {
            return Err(RelayError::validation("message text is empty"));
        }

        let pool = &self.pool;
        let created_at = now_millis();
        let result = with_retry(&self.retry, is_transient_sqlx, move || async move {
            sqlx::query(
                r#"
                INSERT INTO chat_messages (sender_id, receiver_id, sender_name, text, created_at, user_deleted)
                VALUES (?, ?, ?, ?, ?, 0)
                "#,
            )
            .bind(sender_id)
            .bind(receiver_id)
            .bind(sender_name)
            .bind(text)
            .bind(created_at)
            .execute(pool)
            .await
        })
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// History for one connection: everything it sent or received that has
    /// not been cleared, oldest first.
    pub async fn visible_messages(&self, connection_id: &str) -> RelayResult<Vec<ChatMessage>> {
        let pool = &self.pool;
        let messages = with_retry(&self.retry, is_transient_sqlx, move || async move {
            sqlx::query_as::<_, ChatMessage>(
                r#"
                SELECT id, sender_id, receiver_id, sender_name, text, created_at, user_deleted
                FROM chat_messages
                WHERE (sender_id = ? OR receiver_id = ?) AND user_deleted = 0
                ORDER BY created_at ASC, id ASC
                "#,
            )
            .bind(connection_id)
            .bind(connection_id)
            .fetch_all(pool)
            .await
        })
        .await?;

        Ok(messages)
    }

    /// Hide every message this connection sent. Idempotent; returns the
    /// number of rows newly hidden.
    pub async fn soft_delete_by_sender(&self, connection_id: &str) -> RelayResult<u64> {
        let pool = &self.pool;
        let result = with_retry(&self.retry, is_transient_sqlx, move || async move {
            sqlx::query(
                "UPDATE chat_messages SET user_deleted = 1 WHERE sender_id = ? AND user_deleted = 0",
            )
            .bind(connection_id)
            .execute(pool)
            .await
        })
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use crate::error::RelayError;
    use crate::models::ADMINS_RECEIVER;
    use crate::repository::test_helpers;

    #[tokio::test]
    async fn append_assigns_increasing_ids() {
        let repo = test_helpers::test_repository().await;
        let a = repo
            .append_message("v1", ADMINS_RECEIVER, "User-1111", "hello")
            .await
            .unwrap();
        let b = repo
            .append_message("v1", ADMINS_RECEIVER, "User-1111", "anyone?")
            .await
            .unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn append_rejects_blank_text() {
        let repo = test_helpers::test_repository().await;
        let err = repo
            .append_message("v1", ADMINS_RECEIVER, "User-1111", "   \n")
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));
        assert!(repo.visible_messages("v1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn history_round_trip_preserves_order() {
        let repo = test_helpers::test_repository().await;
        let texts = ["one", "two", "three", "four", "five"];
        for t in texts {
            repo.append_message("v1", ADMINS_RECEIVER, "User-1111", t)
                .await
                .unwrap();
        }
        repo.append_message("admin-1", "v1", "ADMIN", "reply")
            .await
            .unwrap();

        let history = repo.visible_messages("v1").await.unwrap();
        let got: Vec<&str> = history.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(got, vec!["one", "two", "three", "four", "five", "reply"]);
        assert_eq!(history[5].sender_name, "ADMIN");
    }

    #[tokio::test]
    async fn history_excludes_other_connections() {
        let repo = test_helpers::test_repository().await;
        repo.append_message("v1", ADMINS_RECEIVER, "User-1111", "mine")
            .await
            .unwrap();
        repo.append_message("v2", ADMINS_RECEIVER, "User-2222", "theirs")
            .await
            .unwrap();
        repo.append_message("admin-1", "v2", "ADMIN", "for v2")
            .await
            .unwrap();

        let history = repo.visible_messages("v1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].text, "mine");
    }

    #[tokio::test]
    async fn clear_is_idempotent_and_sender_scoped() {
        let repo = test_helpers::test_repository().await;
        repo.append_message("v1", ADMINS_RECEIVER, "User-1111", "question")
            .await
            .unwrap();
        repo.append_message("admin-1", "v1", "ADMIN", "answer")
            .await
            .unwrap();

        assert_eq!(repo.soft_delete_by_sender("v1").await.unwrap(), 1);
        let once: Vec<i64> = repo
            .visible_messages("v1")
            .await
            .unwrap()
            .iter()
            .map(|m| m.id)
            .collect();

        assert_eq!(repo.soft_delete_by_sender("v1").await.unwrap(), 0);
        let twice: Vec<i64> = repo
            .visible_messages("v1")
            .await
            .unwrap()
            .iter()
            .map(|m| m.id)
            .collect();

        assert_eq!(once, twice);
        // The reply v1 only received stays visible
        let remaining = repo.visible_messages("v1").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].text, "answer");
        // The admin still sees the reply they sent
        assert_eq!(repo.visible_messages("admin-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cleared_rows_are_kept() {
        let repo = test_helpers::test_repository().await;
        repo.append_message("v1", ADMINS_RECEIVER, "User-1111", "gone")
            .await
            .unwrap();
        repo.soft_delete_by_sender("v1").await.unwrap();

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chat_messages")
            .fetch_one(&repo.pool)
            .await
            .unwrap();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn closed_pool_is_a_persistence_error() {
        let repo = test_helpers::test_repository().await;
        repo.pool.close().await;
        let err = repo
            .append_message("v1", ADMINS_RECEIVER, "User-1111", "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Persistence(_)));
    }
}
