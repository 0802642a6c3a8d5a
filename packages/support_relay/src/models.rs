use serde::{Deserialize, Serialize};

/// Receiver id for visitor messages addressed to the whole admin pool.
pub const ADMINS_RECEIVER: &str = "ADMINS";

/// Sender label stored on every admin reply, whichever admin wrote it.
pub const ADMIN_SENDER_NAME: &str = "ADMIN";

/// One persisted chat line.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChatMessage {
    pub id: i64,
    pub sender_id: String,
    /// A connection id, or [`ADMINS_RECEIVER`]
    pub receiver_id: String,
    pub sender_name: String,
    pub text: String,
    /// Unix millis, UTC
    pub created_at: i64,
    /// Set when the sender cleared their own chat
    pub user_deleted: bool,
}

/// Durable admin login bound to a browser's session token.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AdminSession {
    pub seq: i64,
    pub token: String,
    pub created_at: i64,
    pub expires_at: i64,
}

impl AdminSession {
    /// `ADMIN-<seq>`: stable for the token, never reused.
    pub fn display_name(&self) -> String {
        format!("ADMIN-{}", self.seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(seq: i64, expires_at: i64) -> AdminSession {
        AdminSession {
            seq,
            token: "tok".into(),
            created_at: 0,
            expires_at,
        }
    }

    #[test]
    fn admin_display_name_uses_sequence() {
        assert_eq!(session(1, 10).display_name(), "ADMIN-1");
        assert_eq!(session(42, 10).display_name(), "ADMIN-42");
    }

    #[test]
    fn chat_message_serializes_flag_as_bool() {
        let msg = ChatMessage {
            id: 3,
            sender_id: "v1".into(),
            receiver_id: ADMINS_RECEIVER.into(),
            sender_name: "User-1234".into(),
            text: "hello".into(),
            created_at: 1_700_000_000_000,
            user_deleted: false,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["receiver_id"], "ADMINS");
        assert_eq!(json["user_deleted"], false);
    }
}
