//! WebSocket Protocol Types
//!
//! Named events exchanged between the browser client and the relay. Every
//! frame is one JSON object whose `event` field names the event.

use serde::{Deserialize, Serialize};

/// Events sent FROM the client TO the server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Start of a session; the token comes from the transport (cookie).
    Join,

    AdminLoginAttempt {
        #[serde(default)]
        password: String,
    },

    /// Chat line. `target_sid` is required for admins, ignored for visitors.
    Message {
        #[serde(default)]
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_sid: Option<String>,
    },

    ClearMyChat,
}

/// Events sent FROM the server TO the client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    SetIdentity {
        name: String,
        id: String,
    },

    AdminStatus {
        is_admin: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// System notice shown inline in the transcript
    SysMsg {
        msg: String,
    },

    NewMsg {
        user: String,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_sid: Option<String>,
    },

    /// Sent to the sender once the message is durably stored
    MessageAck {
        status: AckStatus,
        id: Option<i64>,
    },

    /// Full roster of non-admin participants, sent to admins only
    UpdateUserList {
        users: Vec<RosterEntry>,
    },

    ClearScreen,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Saved,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RosterEntry {
    pub sid: String,
    pub name: String,
}

impl ServerEvent {
    pub fn sys(msg: impl Into<String>) -> Self {
        ServerEvent::SysMsg { msg: msg.into() }
    }

    /// Wire name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::SetIdentity { .. } => "set_identity",
            ServerEvent::AdminStatus { .. } => "admin_status",
            ServerEvent::SysMsg { .. } => "sys_msg",
            ServerEvent::NewMsg { .. } => "new_msg",
            ServerEvent::MessageAck { .. } => "message_ack",
            ServerEvent::UpdateUserList { .. } => "update_user_list",
            ServerEvent::ClearScreen => "clear_screen",
        }
    }
}
